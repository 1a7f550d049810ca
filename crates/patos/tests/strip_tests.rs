use std::fs;

use patos::{parse_file, ParseOptions, StripPass};

/// Parses one file and runs the stripping pass over it in memory.
fn strip(source: &str) -> String {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("header.h");
    fs::write(&path, source).unwrap();

    let unit = parse_file(&path, &[], &ParseOptions::default()).unwrap();
    let mut pass = StripPass::new(&unit.source);
    pass.apply(&unit.tu).unwrap();
    pass.rewriter().rendered_text(unit.source.main_file())
}

#[test]
fn class_templates_are_removed_with_their_semicolon() {
    let source = "\
template<typename T>
struct Vec
{
    T x;
    T get()
    {
        return x;
    }
};

typedef struct __Patos_Vec_int
{
\tint x;
} __Patos_Vec_int;
";
    let out = strip(source);
    assert!(!out.contains("template"), "template removed:\n{out}");
    assert!(!out.contains("T get()"), "template body removed:\n{out}");
    assert!(
        out.contains("typedef struct __Patos_Vec_int"),
        "inserted flat record survives:\n{out}"
    );
}

#[test]
fn function_templates_are_removed() {
    let source = "\
template<typename T>
T max_of(T a, T b)
{
    if (a < b)
        return b;
    return a;
}

int __patos_max_of_int(int a, int b);
";
    let out = strip(source);
    assert!(!out.contains("template"), "{out}");
    assert!(!out.contains("max_of(T a, T b)"), "{out}");
    assert!(out.contains("int __patos_max_of_int(int a, int b);"), "{out}");
}

#[test]
fn records_containing_methods_are_removed_entirely() {
    let source = "\
struct Helper
{
    int x;
    int get()
    {
        return x;
    }
};

struct Plain
{
    int y;
};
";
    let out = strip(source);
    assert!(!out.contains("struct Helper"), "method-bearing record removed:\n{out}");
    assert!(!out.contains("int get()"), "{out}");
    assert!(out.contains("struct Plain"), "plain record kept:\n{out}");
    assert!(out.contains("int y;"), "{out}");
}

#[test]
fn stray_method_definitions_are_removed() {
    let source = "\
struct Plain
{
    int y;
};

int Plain::take()
{
    return y;
}

int keep(int v);
";
    let out = strip(source);
    assert!(!out.contains("Plain::take"), "out-of-line method removed:\n{out}");
    assert!(out.contains("struct Plain"), "{out}");
    assert!(out.contains("int keep(int v);"), "free function kept:\n{out}");
}
