use std::{fs, path::PathBuf};

use indexmap::IndexSet;
use patos::{analyze, parse_file, ParseOptions, TransformationPass};
use pretty_assertions::assert_eq;

/// Runs the transformation pass over a single in-memory source and returns
/// the rewritten main file plus the deferred template files.
fn transform(source: &str) -> (String, Vec<PathBuf>) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("input.m");
    fs::write(&path, source).unwrap();

    let mut unit = parse_file(&path, &[], &ParseOptions::default()).unwrap();
    analyze(&mut unit.tu).unwrap();

    let mut template_files = IndexSet::new();
    let mut pass = TransformationPass::new(&unit.source, &mut template_files);
    pass.apply(&unit.tu).unwrap();
    let rendered = pass.rewriter().rendered_text(unit.source.main_file());
    drop(pass);
    (rendered, template_files.into_iter().collect())
}

#[test]
fn plain_record_gets_a_typedef() {
    let (out, _) = transform("struct Foo\n{\n    int x;\n};\n");
    assert!(out.contains("struct Foo"), "original record is kept:\n{out}");
    assert!(out.contains("typedef struct Foo Foo;"), "typedef inserted:\n{out}");
}

#[test]
fn existing_typedef_is_not_duplicated() {
    let source = "struct Foo\n{\n    int x;\n};\ntypedef struct Foo Foo;\n";
    let (out, _) = transform(source);
    assert_eq!(out.matches("typedef struct Foo Foo;").count(), 1);
}

#[test]
fn template_specialization_is_flattened() {
    let source = "\
template<typename T>
struct Vec
{
    T x;
};

Vec<int> v;
";
    let (out, template_files) = transform(source);
    assert!(!out.contains("template"), "template declaration removed:\n{out}");
    assert!(
        out.contains("typedef struct __Patos_Vec_int\n{\n\tint x;\n} __Patos_Vec_int;"),
        "flat record emitted:\n{out}"
    );
    assert!(out.contains("__Patos_Vec_int v;"), "type reference rewritten:\n{out}");
    assert!(template_files.is_empty());
}

#[test]
fn method_calls_are_lowered_to_free_functions() {
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

Vec<int> v;

int use()
{
    return v.get();
}
";
    let (out, _) = transform(source);
    assert!(
        out.contains("int __Patos_Vec_int__get(struct __Patos_Vec_int *thisRef);"),
        "forward declaration near the record:\n{out}"
    );
    assert!(out.contains("return thisRef->x;"), "implicit this rewritten:\n{out}");
    assert!(out.contains("__Patos_Vec_int__get(&v)"), "call site lowered:\n{out}");
    // the definition is appended at the end of the module
    let definition_at = out.rfind("int __Patos_Vec_int__get(struct __Patos_Vec_int *thisRef)\n").unwrap();
    let call_at = out.find("__Patos_Vec_int__get(&v)").unwrap();
    assert!(definition_at > call_at, "definition goes to end of module:\n{out}");
}

#[test]
fn explicit_this_and_argument_methods() {
    let source = "\
template<typename T>
struct Vec
{
    T x;
    void set(T value)
    {
        this->x = value;
    }
};

Vec<int> v;

void use()
{
    v.set(3);
}
";
    let (out, _) = transform(source);
    assert!(
        out.contains("void __Patos_Vec_int__set(struct __Patos_Vec_int *thisRef,  int value);"),
        "thisRef precedes the first parameter:\n{out}"
    );
    assert!(out.contains("thisRef->x = value;"), "explicit this rewritten:\n{out}");
    assert!(out.contains("__Patos_Vec_int__set(&v, 3)"), "receiver passed first:\n{out}");
}

#[test]
fn operator_calls_become_plain_calls() {
    let source = "\
template<typename T>
struct Vec
{
    T x;
    Vec<T> operator+(Vec<T> other)
    {
        Vec<T> result;
        result.x = x + other.x;
        return result;
    }
};

Vec<int> combine(Vec<int> a, Vec<int> b)
{
    return a + b;
}
";
    let (out, _) = transform(source);
    assert!(
        out.contains("__Patos_Vec_int__operator__plus(&(a), b)"),
        "operator call lowered:\n{out}"
    );
    assert!(
        out.contains("__Patos_Vec_int __Patos_Vec_int__operator__plus(struct __Patos_Vec_int *thisRef,  __Patos_Vec_int other);"),
        "operator declaration mangled:\n{out}"
    );
}

#[test]
fn kernel_function_template_keeps_its_kernel_prefix() {
    let source = "\
template<typename T>
__kernel void run(T value)
{
    T local = value;
}

void host(int v)
{
    run<int>(v);
}
";
    let (out, _) = transform(source);
    assert!(
        out.contains("__kernel void __patos_run_int(int value);"),
        "forward declaration with kernel prefix:\n{out}"
    );
    assert!(out.contains("__patos_run_int(v)"), "call site mangled:\n{out}");
    assert!(out.contains("int local = value;"), "substituted local type:\n{out}");
    assert!(!out.contains("template"), "template removed:\n{out}");
}

#[test]
fn constructors_build_the_record_value() {
    let source = "\
template<typename T>
struct Vec
{
    T x;
    Vec(T a)
    {
        x = a;
    }
};

void host()
{
    Vec<int> v(1);
}
";
    let (out, _) = transform(source);
    assert!(
        out.contains("struct __Patos_Vec_int __Patos_Vec_int__constructor(int a);"),
        "constructor declared as struct-returning function:\n{out}"
    );
    assert!(
        out.contains("struct __Patos_Vec_int __patos_constructed;"),
        "constructed value declared in prologue:\n{out}"
    );
    assert!(
        out.contains("struct __Patos_Vec_int *thisRef = &(__patos_constructed);"),
        "thisRef aliases the constructed value:\n{out}"
    );
    assert!(out.contains("return __patos_constructed;"), "epilogue returns the value:\n{out}");
    assert!(out.contains("thisRef->x = a;"), "field store rewritten:\n{out}");
    assert!(
        out.contains("__Patos_Vec_int v = __Patos_Vec_int__constructor(1);"),
        "call-initialization becomes assignment:\n{out}"
    );
}

#[test]
fn temporaries_get_hoisted_helpers() {
    let source = "\
template<typename T>
struct Vec
{
    T x;
    Vec(T a)
    {
        x = a;
    }
};

void sink(Vec<int> value);

void host()
{
    sink(Vec<int>(1));
}
";
    let (out, _) = transform(source);
    assert!(out.contains("/* BEGIN USAGE OF TEMPORARY OBJECT */"), "begin marker:\n{out}");
    assert!(out.contains("/* END USAGE OF TEMPORARY OBJECT */"), "end marker:\n{out}");
    assert!(
        out.contains("struct __Patos_Vec_int __patos_temporary_0 = __Patos_Vec_int__constructor(1);"),
        "helper variable with constructor call:\n{out}"
    );
    assert!(out.contains("sink(__patos_temporary_0);"), "argument replaced by helper:\n{out}");
}

#[test]
fn call_operator_on_temporary_comparator() {
    let source = "\
template<typename T>
struct Comparator
{
    int dummy;
    int operator()(T *e1, T *e2)
    {
        return *e1 - *e2;
    }
};

template<typename T, typename COMP>
void sort(T *items, int count)
{
    int comp = COMP()(&items[0], &items[1]);
}

void host(int *data)
{
    sort<int, Comparator<int> >(data, 2);
}
";
    let (out, _) = transform(source);
    assert!(
        out.contains("struct __Patos_Comparator_int __patos_temporary_0;"),
        "temporary comparator hoisted (implicit constructor, no call):\n{out}"
    );
    assert!(
        out.contains("__Patos_Comparator_int__operator__call(&(__patos_temporary_0), &items[0], &items[1])"),
        "call operator lowered with the temporary as receiver:\n{out}"
    );
    assert!(
        out.contains("int __Patos_Comparator_int__operator__call(struct __Patos_Comparator_int *thisRef,  int *e1, int *e2);"),
        "operator() declaration:\n{out}"
    );
}

#[test]
fn member_function_templates_mangle_their_arguments() {
    let source = "\
template<typename T>
struct Vec
{
    T x;
    template<typename U>
    U convert()
    {
        return x;
    }
};

Vec<int> v;

float use()
{
    return v.convert<float>();
}
";
    let (out, _) = transform(source);
    assert!(
        out.contains("float __Patos_Vec_int__convert_float(struct __Patos_Vec_int *thisRef);"),
        "member template specialization declared:\n{out}"
    );
    assert!(out.contains("__Patos_Vec_int__convert_float(&v)"), "call site lowered:\n{out}");
}

#[test]
fn out_of_line_definitions_are_rewritten_in_place() {
    let source = "\
struct Counter
{
    int value;
    int bump();
};

int Counter::bump()
{
    value = value + 1;
    return value;
}

Counter c;

int use()
{
    return c.bump();
}
";
    let (out, _) = transform(source);
    // the record itself is removed, its flat version emitted
    assert!(out.contains("typedef struct Counter\n{\n\tint value;\n} Counter;"), "flat record:\n{out}");
    assert!(
        out.contains("int __Patos_Counter__bump(struct Counter *thisRef)"),
        "out-of-line definition mangled in place:\n{out}"
    );
    assert!(out.contains("thisRef->value = thisRef->value + 1;"), "field accesses rewritten:\n{out}");
    assert!(out.contains("__Patos_Counter__bump(&c)"), "call site lowered:\n{out}");
}

#[test]
fn transformation_is_idempotent_on_its_own_output() {
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

Vec<int> v;

int use()
{
    return v.get();
}
";
    let (first, _) = transform(source);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("round2.m");
    fs::write(&path, &first).unwrap();

    let mut unit = parse_file(&path, &[], &ParseOptions::default()).unwrap();
    analyze(&mut unit.tu).unwrap();
    let mut template_files = IndexSet::new();
    let mut pass = TransformationPass::new(&unit.source, &mut template_files);
    pass.apply(&unit.tu).unwrap();

    assert!(!pass.is_changed(), "no edits on already-transformed output");
    let rendered = pass.rewriter().rendered_text(unit.source.main_file());
    assert_eq!(rendered, first);
    drop(pass);
    assert!(template_files.is_empty());
}

#[test]
fn explicit_destructors_are_rejected() {
    let source = "\
struct Holder
{
    int x;
    ~Holder()
    {
    }
};

Holder h;
";
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("input.m");
    fs::write(&path, source).unwrap();

    let mut unit = parse_file(&path, &[], &ParseOptions::default()).unwrap();
    analyze(&mut unit.tu).unwrap();
    let mut template_files = IndexSet::new();
    let mut pass = TransformationPass::new(&unit.source, &mut template_files);
    let err = pass.apply(&unit.tu).unwrap_err();
    assert!(
        err.to_string().contains("explicit destructors not supported"),
        "unexpected error: {err}"
    );
}

#[test]
fn duplicate_specializations_are_emitted_once() {
    let source = "\
template<typename T>
struct Vec
{
    T x;
};

Vec<int> a;
Vec<int> b;
Vec<float> c;
";
    let (out, _) = transform(source);
    assert_eq!(out.matches("typedef struct __Patos_Vec_int\n").count(), 1);
    assert_eq!(out.matches("typedef struct __Patos_Vec_float\n").count(), 1);
    assert!(out.contains("__Patos_Vec_int a;"));
    assert!(out.contains("__Patos_Vec_int b;"));
    assert!(out.contains("__Patos_Vec_float c;"));
}
