//! Deterministic name mangling for the flattened output dialect.
//!
//! Every emitted name is assembled from fixed prefixes and the `_` type
//! delimiter; the scheme is what makes monomorphized specializations and
//! de-classed methods unique in a single flat namespace:
//!
//! * kernels / free function specializations: `__patos_name_arg1_arg2`
//! * record specializations: `__Patos_Record_arg1_arg2`
//! * methods: `__Patos_Record_args__tail`, where the tail is
//!   `operator__<token>`, `constructor`, or the plain method name, plus the
//!   method's own template arguments when it is itself a specialization.

use strum::{FromRepr, IntoStaticStr};

use crate::{
    ast::{DeclId, FunctionKind, TemplateArg, TemplatedKind, TranslationUnit},
    error::TransformError,
};

pub const MANGLED_NAME_FUNCTION_PREFIX: &str = "__patos_";
pub const MANGLED_NAME_RECORD_PREFIX: &str = "__Patos_";
pub const MANGLED_NAME_TYPE_DELIMITER: &str = "_";
pub const MANGLED_NAME_METHOD_RECORD_SEPARATOR: &str = "__";
pub const MANGLED_NAME_OPERATOR: &str = "operator__";

/// Annotation text marking kernel entry points.
pub const KERNEL_ANNOTATION: &str = "__patos__kernel";

/// The overloadable operators, in the front end's enumerator order.
///
/// The discriminants are a wire-stable table: [`OperatorKind::from_index`]
/// rejects anything outside it.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromRepr, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum OperatorKind {
    None,
    New,
    Delete,
    ArrayNew,
    ArrayDelete,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Caret,
    Amp,
    Pipe,
    Tilde,
    Exclaim,
    Equal,
    Less,
    Greater,
    PlusEqual,
    MinusEqual,
    StarEqual,
    SlashEqual,
    PercentEqual,
    CaretEqual,
    AmpEqual,
    PipeEqual,
    LessLess,
    GreaterGreater,
    LessLessEqual,
    GreaterGreaterEqual,
    EqualEqual,
    ExclaimEqual,
    LessEqual,
    GreaterEqual,
    AmpAmp,
    PipePipe,
    PlusPlus,
    MinusMinus,
    Comma,
    ArrowStar,
    Arrow,
    Call,
    Subscript,
    Conditional,
}

impl OperatorKind {
    /// Looks an operator up by its raw enumerator index.
    pub fn from_index(index: u32) -> Result<Self, TransformError> {
        Self::from_repr(index).ok_or(TransformError::UnknownOperator { index })
    }

    /// The token name used in mangled operator tails (`plus`, `less_less`, ...).
    pub fn token_name(self) -> &'static str {
        self.into()
    }
}

/// Mangles a kernel (or free function) name from its plain name and ordered
/// template-argument spellings.
pub fn mangled_name_for_kernel(name: &str, template_arguments: &[String]) -> String {
    let mut mangled = String::from(MANGLED_NAME_FUNCTION_PREFIX);
    mangled.push_str(name);
    for argument in template_arguments {
        mangled.push_str(MANGLED_NAME_TYPE_DELIMITER);
        mangled.push_str(argument);
    }
    mangled
}

/// Mangled name of a class template specialization.
pub fn mangled_name_for_record(tu: &TranslationUnit, record: DeclId) -> String {
    let decl = tu.record(record);
    let mut mangled = String::from(MANGLED_NAME_RECORD_PREFIX);
    mangled.push_str(&decl.name);
    if let Some(specialization) = &decl.specialization {
        for argument in &specialization.args {
            mangled.push_str(MANGLED_NAME_TYPE_DELIMITER);
            mangled.push_str(&argument.text);
        }
    }
    mangled
}

/// The spelling a record contributes to emitted text: the mangled name for
/// specializations, the plain name otherwise.
pub fn record_name(tu: &TranslationUnit, record: DeclId) -> String {
    let decl = tu.record(record);
    if decl.is_specialization() {
        mangled_name_for_record(tu, record)
    } else {
        decl.name.clone()
    }
}

fn method_argument_text(tu: &TranslationUnit, argument: &TemplateArg) -> String {
    // arguments that are themselves specialized records recurse into the
    // record-name form
    match argument.record {
        Some(record) if tu.record(record).is_specialization() => mangled_name_for_record(tu, record),
        _ => argument.text.clone(),
    }
}

/// Mangled name of a function, method, constructor or overloaded operator.
pub fn mangled_name_for_function(tu: &TranslationUnit, function: DeclId) -> String {
    let decl = tu.function(function);

    if !decl.is_method() {
        // free function template specialization: same form as kernels
        let args: Vec<String> = match &decl.templated {
            TemplatedKind::FunctionTemplateSpecialization { args, .. } => {
                args.iter().map(|a| a.text.clone()).collect()
            }
            TemplatedKind::None => Vec::new(),
        };
        return mangled_name_for_kernel(&decl.name, &args);
    }

    let parent = decl.parent.expect("method without parent record");
    let parent_decl = tu.record(parent);

    let mut mangled = String::from(MANGLED_NAME_RECORD_PREFIX);
    mangled.push_str(&parent_decl.name);
    if let Some(specialization) = &parent_decl.specialization {
        for argument in &specialization.args {
            mangled.push_str(MANGLED_NAME_TYPE_DELIMITER);
            mangled.push_str(&argument.text);
        }
    }
    mangled.push_str(MANGLED_NAME_METHOD_RECORD_SEPARATOR);

    match decl.kind {
        FunctionKind::Constructor => mangled.push_str("constructor"),
        _ => {
            if let Some(operator) = decl.operator {
                mangled.push_str(MANGLED_NAME_OPERATOR);
                mangled.push_str(operator.token_name());
            } else {
                mangled.push_str(&decl.name);
            }
        }
    }

    if let TemplatedKind::FunctionTemplateSpecialization { args, .. } = &decl.templated {
        for argument in args {
            mangled.push_str(MANGLED_NAME_TYPE_DELIMITER);
            mangled.push_str(&method_argument_text(tu, argument));
        }
    }

    mangled
}

#[cfg(test)]
mod tests {
    use smallvec::smallvec;

    use super::*;
    use crate::{
        ast::{Decl, DeclKind, FunctionDecl, RecordDecl, SpecializationInfo, TemplateArgs},
        source::{SourceLocation, SourceRange},
    };

    fn dummy_range() -> SourceRange {
        let mut sm = crate::source::SourceManager::new();
        let file = sm.add_file("t.m".into(), String::new(), crate::source::Characteristic::User);
        SourceRange::at(SourceLocation { file, offset: 0 })
    }

    fn placeholder(tu: &mut TranslationUnit) -> DeclId {
        // mangling never looks through the template link; any decl id works
        let range = dummy_range();
        tu.add_decl(Decl {
            kind: DeclKind::Typedef(crate::ast::TypedefDecl {
                name: "__placeholder".to_owned(),
            }),
            range,
        })
    }

    fn record(tu: &mut TranslationUnit, name: &str, args: &[&str]) -> DeclId {
        let template = placeholder(tu);
        let specialization = (!args.is_empty()).then(|| SpecializationInfo {
            template,
            args: args.iter().map(|a| TemplateArg::plain(*a)).collect(),
        });
        tu.add_decl(Decl {
            kind: DeclKind::Record(RecordDecl {
                name: name.to_owned(),
                children: Vec::new(),
                specialization,
                described_template: None,
                has_user_constructor: false,
            }),
            range: dummy_range(),
        })
    }

    fn method(
        tu: &mut TranslationUnit,
        parent: DeclId,
        name: &str,
        kind: FunctionKind,
        operator: Option<OperatorKind>,
        targs: Option<TemplateArgs>,
    ) -> DeclId {
        let range = dummy_range();
        let template = placeholder(tu);
        let templated = match targs {
            Some(args) => TemplatedKind::FunctionTemplateSpecialization { template, args },
            None => TemplatedKind::None,
        };
        tu.add_decl(Decl {
            kind: DeclKind::Function(FunctionDecl {
                name: name.to_owned(),
                kind,
                operator,
                parent: Some(parent),
                lexical_parent_is_record: true,
                qualifier: None,
                templated,
                params: Vec::new(),
                return_type: None,
                name_range: range,
                body: None,
                is_definition: false,
                attrs: Vec::new(),
            }),
            range,
        })
    }

    #[test]
    fn record_specialization_name() {
        let mut tu = TranslationUnit::new();
        let vec_int = record(&mut tu, "Vec", &["int"]);
        assert_eq!(mangled_name_for_record(&tu, vec_int), "__Patos_Vec_int");
    }

    #[test]
    fn kernel_name_with_arguments() {
        assert_eq!(
            mangled_name_for_kernel("foo", &["float".to_owned(), "int".to_owned()]),
            "__patos_foo_float_int"
        );
        assert_eq!(mangled_name_for_kernel("run", &[]), "__patos_run");
    }

    #[test]
    fn free_function_specialization_uses_the_kernel_form() {
        let mut tu = TranslationUnit::new();
        let template = placeholder(&mut tu);
        let args: TemplateArgs = smallvec![TemplateArg::plain("float"), TemplateArg::plain("int")];
        let range = dummy_range();
        let foo = tu.add_decl(Decl {
            kind: DeclKind::Function(FunctionDecl {
                name: "foo".to_owned(),
                kind: FunctionKind::Free,
                operator: None,
                parent: None,
                lexical_parent_is_record: true,
                qualifier: None,
                templated: TemplatedKind::FunctionTemplateSpecialization { template, args },
                params: Vec::new(),
                return_type: None,
                name_range: range,
                body: None,
                is_definition: false,
                attrs: Vec::new(),
            }),
            range,
        });
        assert_eq!(mangled_name_for_function(&tu, foo), "__patos_foo_float_int");
    }

    #[test]
    fn method_of_specialization() {
        let mut tu = TranslationUnit::new();
        let vec_int = record(&mut tu, "Vec", &["int"]);
        let add = method(&mut tu, vec_int, "add", FunctionKind::Method, None, None);
        assert_eq!(mangled_name_for_function(&tu, add), "__Patos_Vec_int__add");
    }

    #[test]
    fn operator_method_of_plain_record() {
        let mut tu = TranslationUnit::new();
        let foo = record(&mut tu, "Foo", &[]);
        let plus = method(
            &mut tu,
            foo,
            "operator+",
            FunctionKind::Method,
            Some(OperatorKind::Plus),
            None,
        );
        assert_eq!(mangled_name_for_function(&tu, plus), "__Patos_Foo__operator__plus");
    }

    #[test]
    fn constructor_of_specialization() {
        let mut tu = TranslationUnit::new();
        let vec_int = record(&mut tu, "Vec", &["int"]);
        let ctor = method(&mut tu, vec_int, "Vec", FunctionKind::Constructor, None, None);
        assert_eq!(
            mangled_name_for_function(&tu, ctor),
            "__Patos_Vec_int__constructor"
        );
    }

    #[test]
    fn method_template_argument_recurses_into_record_form() {
        let mut tu = TranslationUnit::new();
        let pair = record(&mut tu, "Pair", &["int", "float"]);
        let vec_int = record(&mut tu, "Vec", &["int"]);
        let convert_args: TemplateArgs = smallvec![TemplateArg {
            text: "Pair<int, float>".to_owned(),
            record: Some(pair),
        }];
        let convert = method(
            &mut tu,
            vec_int,
            "convert",
            FunctionKind::Method,
            None,
            Some(convert_args),
        );
        assert_eq!(
            mangled_name_for_function(&tu, convert),
            "__Patos_Vec_int__convert___Patos_Pair_int_float"
        );
    }

    #[test]
    fn operator_token_names_follow_the_table() {
        assert_eq!(OperatorKind::Plus.token_name(), "plus");
        assert_eq!(OperatorKind::ArrayNew.token_name(), "array_new");
        assert_eq!(OperatorKind::LessLessEqual.token_name(), "less_less_equal");
        assert_eq!(OperatorKind::AmpAmp.token_name(), "amp_amp");
        assert_eq!(OperatorKind::Call.token_name(), "call");
        assert_eq!(OperatorKind::Conditional.token_name(), "conditional");
    }

    #[test]
    fn operator_index_lookup() {
        assert_eq!(OperatorKind::from_index(5).unwrap(), OperatorKind::Plus);
        assert_eq!(OperatorKind::from_index(43).unwrap(), OperatorKind::Conditional);
        assert!(OperatorKind::from_index(44).is_err());
    }
}
