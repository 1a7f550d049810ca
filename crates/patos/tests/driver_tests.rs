use std::fs;

use patos::{instantiate_kernel, run_transformation, Arguments};

#[test]
fn transforms_a_directory_with_an_included_template_header() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();

    fs::write(
        input.path().join("header.h"),
        "\
template<typename T>
struct Vec
{
    T x;
    T get()
    {
        return x;
    }
};
",
    )
    .unwrap();
    fs::write(
        input.path().join("main.m"),
        "\
#include \"header.h\"

Vec<int> v;

int use()
{
    return v.get();
}
",
    )
    .unwrap();

    let arguments = Arguments {
        input_directory: input.path().to_path_buf(),
        output_directory: output.path().to_path_buf(),
        ..Arguments::default()
    };
    run_transformation(&arguments).unwrap();

    let main = fs::read_to_string(output.path().join("main.m")).unwrap();
    assert!(main.contains("__Patos_Vec_int v;"), "type reference rewritten:\n{main}");
    assert!(main.contains("__Patos_Vec_int__get(&v)"), "call lowered:\n{main}");
    assert!(
        main.contains("int __Patos_Vec_int__get(struct __Patos_Vec_int *thisRef)\n"),
        "definition appended to the module:\n{main}"
    );

    let header = fs::read_to_string(output.path().join("header.h")).unwrap();
    assert!(!header.contains("template"), "template stripped from header:\n{header}");
    assert!(
        header.contains("typedef struct __Patos_Vec_int"),
        "flat record emitted next to the template:\n{header}"
    );
    assert!(
        header.contains("int __Patos_Vec_int__get(struct __Patos_Vec_int *thisRef);"),
        "forward declaration stays in the header:\n{header}"
    );

    // the driver works on copies only
    let original = fs::read_to_string(input.path().join("header.h")).unwrap();
    assert!(original.contains("template"), "input tree untouched");
}

#[test]
fn explicit_instantiation_returns_the_mangled_kernel_name() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();

    fs::write(
        input.path().join("kernel.m"),
        "\
template<typename T>
__kernel void compute(T value)
{
    T local = value;
}
",
    )
    .unwrap();

    let arguments = Arguments {
        input_directory: input.path().to_path_buf(),
        output_directory: output.path().to_path_buf(),
        explicit_instantiation: true,
        ..Arguments::default()
    };
    let mangled = instantiate_kernel(
        &arguments,
        "kernel.m",
        "compute",
        &["int".to_owned()],
        &["int".to_owned()],
    )
    .unwrap();
    assert_eq!(mangled, "__patos_compute_int");

    let kernel = fs::read_to_string(output.path().join("kernel.m")).unwrap();
    assert!(
        kernel.contains("__kernel void __patos_compute_int(int value);"),
        "kernel forward declaration:\n{kernel}"
    );
    assert!(kernel.contains("int local = value;"), "substituted body:\n{kernel}");
    assert!(
        !kernel.contains("template"),
        "template declaration and directive both removed:\n{kernel}"
    );
}

#[test]
fn missing_kernel_file_is_an_error() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    fs::write(input.path().join("kernel.m"), "int x;\n").unwrap();

    let arguments = Arguments {
        input_directory: input.path().to_path_buf(),
        output_directory: output.path().to_path_buf(),
        explicit_instantiation: true,
        ..Arguments::default()
    };
    let err = instantiate_kernel(&arguments, "nope.m", "compute", &[], &[]).unwrap_err();
    assert!(err.to_string().contains("kernel file does not exist"), "{err}");
}

#[test]
fn missing_input_directory_is_an_error() {
    let output = tempfile::tempdir().unwrap();
    let arguments = Arguments {
        input_directory: "/nonexistent/patos-in".into(),
        output_directory: output.path().to_path_buf(),
        ..Arguments::default()
    };
    let err = run_transformation(&arguments).unwrap_err();
    assert!(err.to_string().contains("does not exist"), "{err}");
}

#[test]
fn sanitize_reparses_the_output() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    fs::write(
        input.path().join("plain.m"),
        "\
struct Foo
{
    int x;
};
",
    )
    .unwrap();

    let arguments = Arguments {
        input_directory: input.path().to_path_buf(),
        output_directory: output.path().to_path_buf(),
        sanitize: true,
        ..Arguments::default()
    };
    run_transformation(&arguments).unwrap();

    let plain = fs::read_to_string(output.path().join("plain.m")).unwrap();
    assert!(plain.contains("typedef struct Foo Foo;"), "{plain}");
}
