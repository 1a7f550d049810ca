//! Front end for the kernel dialect.
//!
//! Resolves includes, applies the built-in type predefines, and builds the
//! arena AST with a recursive-descent parser. OpenCL keywords (`__kernel`,
//! `__global`, ...) become `__patos*` annotations on the declarations they
//! qualify while their source spelling stays in place, so kernel detection
//! is uniform and the rewriter sees unmodified text.
//!
//! Cloning of template specializations and name resolution inside bodies
//! happen afterwards, in `sema`; the parser leaves declaration references
//! and member accesses unresolved.

use std::{
    fs,
    path::{Path, PathBuf},
};

use ahash::{AHashMap, AHashSet};
use log::debug;

use crate::{
    ast::{
        Attribute, CallData, ConstructData, Decl, DeclId, DeclKind, FieldDecl, FunctionDecl, FunctionKind,
        FunctionTemplateDecl, InitStyle, InstantiationRequest, MemberCallData, MemberData, Node, NodeId, NodeKind,
        ParamDecl, RecordDecl, TemplatedKind, TranslationUnit, TypeLoc, TypeLocId, TypeRef, TypedefDecl, VarDecl,
        ClassTemplateDecl,
    },
    error::{Error, ParseError},
    lex::{self, Token, TokenKind},
    mangle::OperatorKind,
    source::{Characteristic, SourceLocation, SourceManager, SourceRange},
};

/// The OpenCL keywords the front end maps onto `__patos*` annotations when
/// parsing the C++ dialect.
pub const OPENCL_KEYWORDS: [&str; 8] = [
    "__global",
    "__local",
    "__constant",
    "__private",
    "__read_only",
    "__write_only",
    "__read_write",
    "__kernel",
];

const BUILTIN_TYPES: [&str; 12] = [
    "void", "bool", "char", "short", "int", "long", "float", "double", "unsigned", "signed", "size_t", "uint",
];

/// Language flags for one parse: the transformation passes parse C++, the
/// sanitize re-parse checks the output as plain OpenCL C.
#[derive(Debug, Clone)]
pub struct ParseOptions {
    pub cplusplus: bool,
    pub opencl: bool,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            cplusplus: true,
            opencl: false,
        }
    }
}

/// One include search directory and how files found through it are marked.
#[derive(Debug, Clone)]
pub struct IncludePath {
    pub dir: PathBuf,
    pub kind: Characteristic,
}

/// A parsed translation unit together with the files it was read from.
#[derive(Debug)]
pub struct ParsedUnit {
    pub source: SourceManager,
    pub tu: TranslationUnit,
}

/// Parses `path` (and its non-system includes) into an AST.
pub fn parse_file(path: &Path, include_paths: &[IncludePath], options: &ParseOptions) -> Result<ParsedUnit, Error> {
    let absolute = std::path::absolute(path)
        .map_err(|e| ParseError::new(format!("unable to resolve path: {e}"), path, 0))?;

    let mut source = SourceManager::new();
    let mut preprocessor = Preprocessor {
        include_paths,
        defines: predefines(),
        loaded: Vec::new(),
    };
    let mut tokens = preprocessor.load_file(&mut source, &absolute, Characteristic::User)?;
    let main_file = source
        .file_by_path(&absolute)
        .expect("main file was just loaded");
    source.set_main_file(main_file);
    tokens.push(Token {
        kind: TokenKind::Eof,
        loc: source.end_of_file(main_file),
        len: 0,
    });

    debug!("start parsing {}", absolute.display());
    let parser = Parser {
        sm: &source,
        options,
        defines: preprocessor.defines,
        tokens,
        pos: 0,
        tu: TranslationUnit::new(),
        type_names: AHashMap::new(),
        member_template_names: AHashSet::new(),
        template_params: Vec::new(),
        split_log: Vec::new(),
    };
    let tu = parser.run()?;
    debug!("finished parsing {}", absolute.display());

    Ok(ParsedUnit { source, tu })
}

/// Built-in type macros every translation unit starts with.
fn predefines() -> AHashMap<String, String> {
    let mut defines = AHashMap::new();
    defines.insert("__SIZE_TYPE__".to_owned(), "unsigned".to_owned());
    defines.insert("__WINT_TYPE__".to_owned(), "unsigned".to_owned());
    defines
}

struct Preprocessor<'a> {
    include_paths: &'a [IncludePath],
    defines: AHashMap<String, String>,
    loaded: Vec<PathBuf>,
}

impl Preprocessor<'_> {
    fn load_file(
        &mut self,
        sm: &mut SourceManager,
        path: &Path,
        characteristic: Characteristic,
    ) -> Result<Vec<Token>, Error> {
        let text = fs::read_to_string(path)
            .map_err(|e| ParseError::new(format!("unable to read file: {e}"), path, 0))?;
        let file = sm.add_file(path.to_path_buf(), text.clone(), characteristic);
        self.loaded.push(path.to_path_buf());

        let mut tokens = Vec::new();
        let mut pos = 0u32;
        loop {
            let scanned = lex::scan_token(&text, pos);
            match scanned.kind {
                TokenKind::Eof => break,
                TokenKind::Hash => {
                    pos = self.directive(sm, &text, scanned.end, path, &mut tokens)?;
                }
                _ => {
                    tokens.push(Token {
                        kind: scanned.kind,
                        loc: SourceLocation {
                            file,
                            offset: scanned.start,
                        },
                        len: scanned.len(),
                    });
                    pos = scanned.end;
                }
            }
        }
        Ok(tokens)
    }

    /// Handles one preprocessor line; returns the position after it.
    fn directive(
        &mut self,
        sm: &mut SourceManager,
        text: &str,
        after_hash: u32,
        path: &Path,
        out: &mut Vec<Token>,
    ) -> Result<u32, Error> {
        let line_end = text[after_hash as usize..]
            .find('\n')
            .map_or(text.len() as u32, |i| after_hash + i as u32 + 1);
        let name_tok = lex::scan_token(text, after_hash);
        let name = &text[name_tok.start as usize..name_tok.end as usize];

        match name {
            "include" => {
                let rest = text[name_tok.end as usize..line_end as usize].trim();
                let (file_name, quoted) = if let Some(inner) = rest.strip_prefix('"') {
                    (inner.split('"').next().unwrap_or(""), true)
                } else if let Some(inner) = rest.strip_prefix('<') {
                    (inner.split('>').next().unwrap_or(""), false)
                } else {
                    return Err(ParseError::new("malformed include directive", path, after_hash).into());
                };
                let resolved = self.resolve_include(path, file_name, quoted);
                let Some((resolved, characteristic)) = resolved else {
                    return Err(
                        ParseError::new(format!("include file not found: {file_name}"), path, after_hash).into(),
                    );
                };
                if !self.loaded.contains(&resolved) {
                    let mut included = self.load_file(sm, &resolved, characteristic)?;
                    out.append(&mut included);
                }
            }
            "define" => {
                let rest = text[name_tok.end as usize..line_end as usize].trim();
                let mut parts = rest.splitn(2, char::is_whitespace);
                if let (Some(macro_name), Some(value)) = (parts.next(), parts.next()) {
                    // object-like macros only; enough for the predefines
                    if !macro_name.contains('(') && !value.trim().is_empty() {
                        self.defines.insert(macro_name.to_owned(), value.trim().to_owned());
                    }
                }
            }
            // include guards and pragmas carry no information we need
            _ => {}
        }
        Ok(line_end)
    }

    fn resolve_include(&self, includer: &Path, file_name: &str, quoted: bool) -> Option<(PathBuf, Characteristic)> {
        if quoted {
            let local = includer.parent().unwrap_or(Path::new(".")).join(file_name);
            if local.is_file() {
                return Some((local, Characteristic::User));
            }
        }
        for include_path in self.include_paths {
            let candidate = include_path.dir.join(file_name);
            if candidate.is_file() {
                return Some((candidate, include_path.kind));
            }
        }
        None
    }
}

#[derive(Debug, Clone, Copy)]
enum TypeName {
    Record(DeclId),
    ClassTemplate(DeclId),
    Alias,
}

struct Parser<'a> {
    sm: &'a SourceManager,
    options: &'a ParseOptions,
    defines: AHashMap<String, String>,
    tokens: Vec<Token>,
    pos: usize,
    tu: TranslationUnit,
    type_names: AHashMap<String, TypeName>,
    member_template_names: AHashSet<String>,
    template_params: Vec<Vec<String>>,
    /// `>>` tokens split while closing nested template argument lists, so a
    /// rolled-back template-id attempt can restore them.
    split_log: Vec<(usize, Token)>,
}

impl<'a> Parser<'a> {
    fn run(mut self) -> Result<TranslationUnit, Error> {
        while self.peek().kind != TokenKind::Eof {
            self.parse_top_level()?;
        }
        Ok(self.tu)
    }

    // ----- token plumbing -----

    fn peek(&self) -> Token {
        self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_n(&self, n: usize) -> Token {
        self.tokens[(self.pos + n).min(self.tokens.len() - 1)]
    }

    fn prev_loc(&self) -> SourceLocation {
        self.tokens[self.pos.saturating_sub(1).min(self.tokens.len() - 1)].loc
    }

    fn bump(&mut self) -> Token {
        let tok = self.peek();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn tok_text(&self, tok: Token) -> &'a str {
        let file = self.sm.file(tok.loc.file);
        &file.text[tok.loc.offset as usize..(tok.loc.offset + tok.len) as usize]
    }

    fn at(&self, kind: TokenKind) -> bool {
        self.peek().kind == kind
    }

    fn at_ident(&self, word: &str) -> bool {
        self.peek().kind == TokenKind::Ident && self.tok_text(self.peek()) == word
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.at(kind) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn eat_ident(&mut self, word: &str) -> bool {
        if self.at_ident(word) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> Result<Token, Error> {
        if self.at(kind) {
            Ok(self.bump())
        } else {
            Err(self.err(format!("expected {what}")))
        }
    }

    fn expect_ident(&mut self, what: &str) -> Result<Token, Error> {
        self.expect(TokenKind::Ident, what)
    }

    fn err(&self, message: impl Into<String>) -> Error {
        let tok = self.peek();
        ParseError::new(message, self.sm.filename(tok.loc), tok.loc.offset).into()
    }

    /// Consumes a closing `>`; splits a `>>` token in two so nested template
    /// argument lists close one level at a time.
    fn expect_close_angle(&mut self) -> Result<Token, Error> {
        match self.peek().kind {
            TokenKind::Greater => Ok(self.bump()),
            TokenKind::GreaterGreater => {
                let tok = self.peek();
                let first = Token {
                    kind: TokenKind::Greater,
                    loc: tok.loc,
                    len: 1,
                };
                self.split_log.push((self.pos, tok));
                self.tokens[self.pos] = Token {
                    kind: TokenKind::Greater,
                    loc: tok.loc.with_offset(1),
                    len: 1,
                };
                Ok(first)
            }
            _ => Err(self.err("expected '>'")),
        }
    }

    // ----- classification -----

    fn is_template_param(&self, name: &str) -> bool {
        self.template_params.iter().any(|scope| scope.iter().any(|p| p == name))
    }

    fn is_type_start(&self, tok: Token) -> bool {
        if tok.kind != TokenKind::Ident {
            return false;
        }
        let text = self.tok_text(tok);
        BUILTIN_TYPES.contains(&text)
            || text == "const"
            || text == "struct"
            || text == "class"
            || OPENCL_KEYWORDS.contains(&text)
            || self.defines.contains_key(text)
            || self.type_names.contains_key(text)
            || self.is_template_param(text)
    }

    fn collect_annotations(&mut self) -> Vec<Attribute> {
        let mut attrs = Vec::new();
        while self.peek().kind == TokenKind::Ident {
            let text = self.tok_text(self.peek());
            if OPENCL_KEYWORDS.contains(&text) {
                attrs.push(Attribute {
                    annotation: format!("__patos{text}"),
                });
                self.bump();
            } else {
                break;
            }
        }
        attrs
    }

    // ----- types -----

    fn parse_type(&mut self) -> Result<TypeLocId, Error> {
        // qualifiers and address-space keywords keep their spelling in the
        // source; the type location starts at the base type
        loop {
            if self.at_ident("const") {
                self.bump();
                continue;
            }
            let text = if self.peek().kind == TokenKind::Ident {
                self.tok_text(self.peek())
            } else {
                ""
            };
            if OPENCL_KEYWORDS.contains(&text) {
                self.bump();
                continue;
            }
            break;
        }
        self.eat_ident("struct");
        self.eat_ident("class");

        let start = self.expect_ident("a type name")?;
        let mut base = self.tok_text(start).to_owned();
        if let Some(alias) = self.defines.get(&base) {
            base = alias.clone();
        }

        let mut end_loc = start.loc;
        if BUILTIN_TYPES.contains(&base.as_str()) {
            // multiword builtins: unsigned int, long long, ...
            let mut words = vec![base];
            while self.peek().kind == TokenKind::Ident && BUILTIN_TYPES.contains(&self.tok_text(self.peek())) {
                let tok = self.bump();
                words.push(self.tok_text(tok).to_owned());
                end_loc = tok.loc;
            }
            base = words.join(" ");
        }

        let mut children = Vec::new();
        let mut text = base.clone();
        let is_class_template = matches!(self.type_names.get(&base), Some(TypeName::ClassTemplate(_)));
        if is_class_template && self.at(TokenKind::Less) {
            self.bump();
            let mut child_texts = Vec::new();
            loop {
                let child = self.parse_type()?;
                child_texts.push(self.tu.type_loc(child).ty.text.clone());
                children.push(child);
                if !self.eat(TokenKind::Comma) {
                    break;
                }
            }
            let close = self.expect_close_angle()?;
            end_loc = close.loc;
            text = format!("{base}<{}>", child_texts.join(", "));
        }

        let record = match self.type_names.get(&base) {
            Some(TypeName::Record(id)) => Some(*id),
            _ => None,
        };

        let mut id = self.tu.add_type_loc(TypeLoc {
            range: SourceRange::new(start.loc, end_loc),
            ty: TypeRef {
                text: text.clone(),
                base,
                record,
            },
            substituted: None,
            pointer: false,
            children,
        });

        while self.at(TokenKind::Star) {
            let star = self.bump();
            let inner = self.tu.type_loc(id);
            let wrapped = TypeLoc {
                range: SourceRange::new(start.loc, star.loc),
                ty: TypeRef {
                    text: format!("{} *", inner.ty.text),
                    base: inner.ty.base.clone(),
                    record: None,
                },
                substituted: None,
                pointer: true,
                children: vec![id],
            };
            id = self.tu.add_type_loc(wrapped);
        }
        // references keep value semantics for member resolution
        self.eat(TokenKind::Amp);

        Ok(id)
    }

    // ----- top level -----

    fn parse_top_level(&mut self) -> Result<(), Error> {
        if self.eat(TokenKind::Semi) {
            return Ok(());
        }
        if self.at_ident("typedef") {
            return self.parse_typedef();
        }
        if self.at_ident("template") {
            return self.parse_template_or_directive();
        }
        if (self.at_ident("struct") || self.at_ident("class"))
            && self.peek_n(1).kind == TokenKind::Ident
            && matches!(self.peek_n(2).kind, TokenKind::LBrace | TokenKind::Semi)
        {
            let record = self.parse_record_decl(false)?;
            self.tu.top_level.push(record);
            self.expect(TokenKind::Semi, "';' after record declaration")?;
            return Ok(());
        }
        self.parse_function_or_var()
    }

    fn parse_typedef(&mut self) -> Result<(), Error> {
        let typedef_kw = self.bump();
        if self.at_ident("struct") && self.peek_n(2).kind == TokenKind::LBrace {
            // typedef struct N { ... } Alias;
            let record = self.parse_record_decl(false)?;
            self.tu.top_level.push(record);
            let alias = self.expect_ident("typedef alias name")?;
            self.expect(TokenKind::Semi, "';' after typedef")?;
            let name = self.tok_text(alias).to_owned();
            let decl = self.tu.add_decl(Decl {
                kind: DeclKind::Typedef(TypedefDecl { name: name.clone() }),
                range: SourceRange::new(typedef_kw.loc, alias.loc),
            });
            self.tu.top_level.push(decl);
            self.type_names.entry(name).or_insert(TypeName::Alias);
            return Ok(());
        }

        // typedef TYPE Alias;
        let _ty = self.parse_type()?;
        let alias = self.expect_ident("typedef alias name")?;
        self.expect(TokenKind::Semi, "';' after typedef")?;
        let name = self.tok_text(alias).to_owned();
        let decl = self.tu.add_decl(Decl {
            kind: DeclKind::Typedef(TypedefDecl { name: name.clone() }),
            range: SourceRange::new(typedef_kw.loc, alias.loc),
        });
        self.tu.top_level.push(decl);
        self.type_names.entry(name).or_insert(TypeName::Alias);
        Ok(())
    }

    fn parse_template_or_directive(&mut self) -> Result<(), Error> {
        if !self.options.cplusplus {
            return Err(self.err("template declarations are not valid in this language mode"));
        }
        let template_kw = self.bump();

        if !self.at(TokenKind::Less) {
            return self.parse_instantiation_directive();
        }

        let params = self.parse_template_params()?;
        self.template_params.push(params.clone());

        let result = if self.at_ident("struct") || self.at_ident("class") {
            let pattern = self.parse_record_decl(true)?;
            self.expect(TokenKind::Semi, "';' after class template")?;
            let name = self.tu.record(pattern).name.clone();
            let end = self.tu.decl(pattern).range.end;
            let template = self.tu.add_decl(Decl {
                kind: DeclKind::ClassTemplate(ClassTemplateDecl {
                    name: name.clone(),
                    params,
                    pattern,
                    specializations: Vec::new(),
                }),
                range: SourceRange::new(template_kw.loc, end),
            });
            if let DeclKind::Record(record) = &mut self.tu.decl_mut(pattern).kind {
                record.described_template = Some(template);
            }
            self.tu.top_level.push(template);
            self.type_names.insert(name.clone(), TypeName::ClassTemplate(template));
            self.tu.globals.insert(name, template);
            Ok(())
        } else {
            let attrs = self.collect_annotations();
            let pattern = self.parse_function_declaration(attrs)?;
            let function = self.tu.function(pattern);
            if function.qualifier.is_some() {
                return Err(self.err("out-of-line template member definitions are not supported"));
            }
            let name = function.name.clone();
            let is_definition = function.is_definition;
            let end = self.tu.decl(pattern).range.end;
            let template = self.tu.add_decl(Decl {
                kind: DeclKind::FunctionTemplate(FunctionTemplateDecl {
                    name: name.clone(),
                    params,
                    pattern,
                    specializations: Vec::new(),
                    parent: None,
                    is_definition,
                    base_subst: Vec::new(),
                }),
                range: SourceRange::new(template_kw.loc, end),
            });
            self.tu.top_level.push(template);
            self.tu.globals.insert(name, template);
            Ok(())
        };

        self.template_params.pop();
        result
    }

    /// `template __kernel void name<A,B >(T1, T2);` is consumed as an
    /// instantiation request, not materialized as a declaration.
    fn parse_instantiation_directive(&mut self) -> Result<(), Error> {
        let _attrs = self.collect_annotations();
        let _return_type = self.parse_type()?;
        let name = self.expect_ident("kernel name")?;
        let name = self.tok_text(name).to_owned();

        self.expect(TokenKind::Less, "'<'")?;
        let mut template_args = Vec::new();
        if !self.at(TokenKind::Greater) && !self.at(TokenKind::GreaterGreater) {
            loop {
                let arg = self.parse_type()?;
                template_args.push(self.tu.type_loc(arg).ty.text.clone());
                if !self.eat(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect_close_angle()?;

        self.expect(TokenKind::LParen, "'('")?;
        if !self.at(TokenKind::RParen) {
            loop {
                let _arg_type = self.parse_type()?;
                if !self.eat(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenKind::RParen, "')'")?;
        self.expect(TokenKind::Semi, "';' after explicit instantiation")?;

        debug!("explicit instantiation request: {name}<{}>", template_args.join(","));
        self.tu
            .instantiation_requests
            .push(InstantiationRequest { name, template_args });
        Ok(())
    }

    fn parse_template_params(&mut self) -> Result<Vec<String>, Error> {
        self.expect(TokenKind::Less, "'<'")?;
        let mut params = Vec::new();
        loop {
            if !self.eat_ident("typename") && !self.eat_ident("class") {
                return Err(self.err("expected 'typename' or 'class'"));
            }
            let name = self.expect_ident("template parameter name")?;
            params.push(self.tok_text(name).to_owned());
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }
        self.expect_close_angle()?;
        Ok(params)
    }

    // ----- records -----

    fn parse_record_decl(&mut self, template_pattern: bool) -> Result<DeclId, Error> {
        let kw = self.bump(); // struct | class
        let name_tok = self.expect_ident("record name")?;
        let name = self.tok_text(name_tok).to_owned();

        // register before the body so fields may refer back to the record
        let decl = self.tu.add_decl(Decl {
            kind: DeclKind::Record(RecordDecl {
                name: name.clone(),
                children: Vec::new(),
                specialization: None,
                described_template: None,
                has_user_constructor: false,
            }),
            range: SourceRange::at(kw.loc),
        });
        if template_pattern {
            // the enclosing template declaration replaces this entry once
            // it exists; the body only needs the name's classification
            self.type_names.insert(name.clone(), TypeName::ClassTemplate(decl));
        } else {
            self.type_names.insert(name.clone(), TypeName::Record(decl));
        }
        self.tu.globals.insert(name.clone(), decl);

        if !self.at(TokenKind::LBrace) {
            // forward declaration
            self.tu.decl_mut(decl).range = SourceRange::new(kw.loc, name_tok.loc);
            return Ok(decl);
        }

        self.bump(); // {
        let mut children = Vec::new();
        let mut has_user_constructor = false;
        while !self.at(TokenKind::RBrace) {
            if self.at(TokenKind::Eof) {
                return Err(self.err("unterminated record body"));
            }
            if (self.at_ident("public") || self.at_ident("private") || self.at_ident("protected"))
                && self.peek_n(1).kind == TokenKind::Colon
            {
                self.bump();
                self.bump();
                continue;
            }
            let member = self.parse_member(decl, &name)?;
            if let Some(member) = member {
                if matches!(
                    &self.tu.decl(member).kind,
                    DeclKind::Function(f) if f.kind == FunctionKind::Constructor
                ) {
                    has_user_constructor = true;
                }
                children.push(member);
            }
        }
        let rbrace = self.bump();

        let range = SourceRange::new(kw.loc, rbrace.loc);
        let decl_mut = self.tu.decl_mut(decl);
        decl_mut.range = range;
        if let DeclKind::Record(record) = &mut decl_mut.kind {
            record.children = children;
            record.has_user_constructor = has_user_constructor;
        }
        Ok(decl)
    }

    fn parse_member(&mut self, record: DeclId, record_name: &str) -> Result<Option<DeclId>, Error> {
        if self.eat(TokenKind::Semi) {
            return Ok(None);
        }

        if self.at_ident("template") {
            let template_kw = self.bump();
            let params = self.parse_template_params()?;
            self.template_params.push(params.clone());
            let pattern = self.parse_method(record, record_name)?;
            self.template_params.pop();

            let function = self.tu.function(pattern);
            let name = function.name.clone();
            let is_definition = function.is_definition;
            let end = self.tu.decl(pattern).range.end;
            self.member_template_names.insert(name.clone());
            let template = self.tu.add_decl(Decl {
                kind: DeclKind::FunctionTemplate(FunctionTemplateDecl {
                    name,
                    params,
                    pattern,
                    specializations: Vec::new(),
                    parent: Some(record),
                    is_definition,
                    base_subst: Vec::new(),
                }),
                range: SourceRange::new(template_kw.loc, end),
            });
            return Ok(Some(template));
        }

        if self.at(TokenKind::Tilde) {
            let tilde = self.bump();
            let name_tok = self.expect_ident("destructor name")?;
            self.expect(TokenKind::LParen, "'('")?;
            self.expect(TokenKind::RParen, "')'")?;
            let body = if self.at(TokenKind::LBrace) {
                Some(self.parse_compound()?)
            } else {
                self.expect(TokenKind::Semi, "';'")?;
                None
            };
            let end = self.prev_loc();
            let decl = self.tu.add_decl(Decl {
                kind: DeclKind::Function(FunctionDecl {
                    name: format!("~{}", self.tok_text(name_tok)),
                    kind: FunctionKind::Destructor,
                    operator: None,
                    parent: Some(record),
                    lexical_parent_is_record: true,
                    qualifier: None,
                    templated: TemplatedKind::None,
                    params: Vec::new(),
                    return_type: None,
                    name_range: SourceRange::new(tilde.loc, name_tok.loc),
                    body,
                    is_definition: body.is_some(),
                    attrs: Vec::new(),
                }),
                range: SourceRange::new(tilde.loc, end),
            });
            return Ok(Some(decl));
        }

        if self.at(TokenKind::Ident)
            && self.tok_text(self.peek()) == record_name
            && self.peek_n(1).kind == TokenKind::LParen
        {
            // constructor
            let name_tok = self.bump();
            let params = self.parse_params()?;
            let body = if self.at(TokenKind::LBrace) {
                Some(self.parse_compound()?)
            } else {
                self.expect(TokenKind::Semi, "';'")?;
                None
            };
            let end = self.prev_loc();
            let decl = self.tu.add_decl(Decl {
                kind: DeclKind::Function(FunctionDecl {
                    name: record_name.to_owned(),
                    kind: FunctionKind::Constructor,
                    operator: None,
                    parent: Some(record),
                    lexical_parent_is_record: true,
                    qualifier: None,
                    templated: TemplatedKind::None,
                    params,
                    return_type: None,
                    name_range: SourceRange::at(name_tok.loc),
                    body,
                    is_definition: body.is_some(),
                    attrs: Vec::new(),
                }),
                range: SourceRange::new(name_tok.loc, end),
            });
            return Ok(Some(decl));
        }

        let method = self.parse_method(record, record_name)?;
        Ok(Some(method))
    }

    /// A method or field member, after constructors/destructors/member
    /// templates have been ruled out.
    fn parse_method(&mut self, record: DeclId, _record_name: &str) -> Result<DeclId, Error> {
        let start = self.peek();
        let return_type = self.parse_type()?;

        if self.at_ident("operator") {
            let op_kw = self.bump();
            let (operator, op_text, op_end) = self.parse_operator_name()?;
            let params = self.parse_params()?;
            let body = if self.at(TokenKind::LBrace) {
                Some(self.parse_compound()?)
            } else {
                self.expect(TokenKind::Semi, "';'")?;
                None
            };
            let end = self.prev_loc();
            let decl = self.tu.add_decl(Decl {
                kind: DeclKind::Function(FunctionDecl {
                    name: format!("operator{op_text}"),
                    kind: FunctionKind::Method,
                    operator: Some(operator),
                    parent: Some(record),
                    lexical_parent_is_record: true,
                    qualifier: None,
                    templated: TemplatedKind::None,
                    params,
                    return_type: Some(return_type),
                    name_range: SourceRange::new(op_kw.loc, op_end),
                    body,
                    is_definition: body.is_some(),
                    attrs: Vec::new(),
                }),
                range: SourceRange::new(start.loc, end),
            });
            return Ok(decl);
        }

        let name_tok = self.expect_ident("member name")?;
        if self.at(TokenKind::LParen) {
            let params = self.parse_params()?;
            let body = if self.at(TokenKind::LBrace) {
                Some(self.parse_compound()?)
            } else {
                self.expect(TokenKind::Semi, "';'")?;
                None
            };
            let end = self.prev_loc();
            let decl = self.tu.add_decl(Decl {
                kind: DeclKind::Function(FunctionDecl {
                    name: self.tok_text(name_tok).to_owned(),
                    kind: FunctionKind::Method,
                    operator: None,
                    parent: Some(record),
                    lexical_parent_is_record: true,
                    qualifier: None,
                    templated: TemplatedKind::None,
                    params,
                    return_type: Some(return_type),
                    name_range: SourceRange::at(name_tok.loc),
                    body,
                    is_definition: body.is_some(),
                    attrs: Vec::new(),
                }),
                range: SourceRange::new(start.loc, end),
            });
            return Ok(decl);
        }

        // field, possibly with an array suffix
        while self.eat(TokenKind::LBracket) {
            while !self.at(TokenKind::RBracket) && !self.at(TokenKind::Eof) {
                self.bump();
            }
            self.expect(TokenKind::RBracket, "']'")?;
        }
        let end = self.prev_loc();
        self.expect(TokenKind::Semi, "';' after field")?;
        let decl = self.tu.add_decl(Decl {
            kind: DeclKind::Field(FieldDecl {
                name: self.tok_text(name_tok).to_owned(),
                ty: return_type,
            }),
            range: SourceRange::new(start.loc, end),
        });
        Ok(decl)
    }

    fn parse_operator_name(&mut self) -> Result<(OperatorKind, String, SourceLocation), Error> {
        use TokenKind as T;

        let tok = self.peek();
        let simple = match tok.kind {
            T::Plus => Some(OperatorKind::Plus),
            T::Minus => Some(OperatorKind::Minus),
            T::Star => Some(OperatorKind::Star),
            T::Slash => Some(OperatorKind::Slash),
            T::Percent => Some(OperatorKind::Percent),
            T::Caret => Some(OperatorKind::Caret),
            T::Amp => Some(OperatorKind::Amp),
            T::Pipe => Some(OperatorKind::Pipe),
            T::Tilde => Some(OperatorKind::Tilde),
            T::Exclaim => Some(OperatorKind::Exclaim),
            T::Equal => Some(OperatorKind::Equal),
            T::Less => Some(OperatorKind::Less),
            T::Greater => Some(OperatorKind::Greater),
            T::PlusEqual => Some(OperatorKind::PlusEqual),
            T::MinusEqual => Some(OperatorKind::MinusEqual),
            T::StarEqual => Some(OperatorKind::StarEqual),
            T::SlashEqual => Some(OperatorKind::SlashEqual),
            T::PercentEqual => Some(OperatorKind::PercentEqual),
            T::CaretEqual => Some(OperatorKind::CaretEqual),
            T::AmpEqual => Some(OperatorKind::AmpEqual),
            T::PipeEqual => Some(OperatorKind::PipeEqual),
            T::LessLess => Some(OperatorKind::LessLess),
            T::GreaterGreater => Some(OperatorKind::GreaterGreater),
            T::LessLessEqual => Some(OperatorKind::LessLessEqual),
            T::GreaterGreaterEqual => Some(OperatorKind::GreaterGreaterEqual),
            T::EqualEqual => Some(OperatorKind::EqualEqual),
            T::ExclaimEqual => Some(OperatorKind::ExclaimEqual),
            T::LessEqual => Some(OperatorKind::LessEqual),
            T::GreaterEqual => Some(OperatorKind::GreaterEqual),
            T::AmpAmp => Some(OperatorKind::AmpAmp),
            T::PipePipe => Some(OperatorKind::PipePipe),
            T::PlusPlus => Some(OperatorKind::PlusPlus),
            T::MinusMinus => Some(OperatorKind::MinusMinus),
            T::Comma => Some(OperatorKind::Comma),
            T::Arrow => Some(OperatorKind::Arrow),
            _ => None,
        };
        if let Some(operator) = simple {
            let tok = self.bump();
            return Ok((operator, self.tok_text(tok).to_owned(), tok.loc));
        }
        match tok.kind {
            T::LParen => {
                self.bump();
                let close = self.expect(T::RParen, "')'")?;
                Ok((OperatorKind::Call, "()".to_owned(), close.loc))
            }
            T::LBracket => {
                self.bump();
                let close = self.expect(T::RBracket, "']'")?;
                Ok((OperatorKind::Subscript, "[]".to_owned(), close.loc))
            }
            T::Ident if self.tok_text(tok) == "new" => {
                self.bump();
                Ok((OperatorKind::New, "new".to_owned(), tok.loc))
            }
            T::Ident if self.tok_text(tok) == "delete" => {
                self.bump();
                Ok((OperatorKind::Delete, "delete".to_owned(), tok.loc))
            }
            _ => Err(self.err("unsupported overloaded operator")),
        }
    }

    fn parse_params(&mut self) -> Result<Vec<DeclId>, Error> {
        self.expect(TokenKind::LParen, "'('")?;
        let mut params = Vec::new();
        if self.eat(TokenKind::RParen) {
            return Ok(params);
        }
        loop {
            let start = self.peek();
            let _annotations = self.collect_annotations();
            let ty = self.parse_type()?;
            let (name, end_loc) = if self.at(TokenKind::Ident) {
                let tok = self.bump();
                (self.tok_text(tok).to_owned(), tok.loc)
            } else {
                (String::new(), self.prev_loc())
            };
            let decl = self.tu.add_decl(Decl {
                kind: DeclKind::Param(ParamDecl { name, ty }),
                range: SourceRange::new(start.loc, end_loc),
            });
            params.push(decl);
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RParen, "')'")?;
        Ok(params)
    }

    // ----- free functions, out-of-line methods, variables -----

    fn parse_function_or_var(&mut self) -> Result<(), Error> {
        let attrs = self.collect_annotations();
        if !self.is_type_start(self.peek()) {
            return Err(self.err(format!(
                "expected a declaration, found '{}'",
                self.tok_text(self.peek())
            )));
        }
        let decl = self.parse_function_or_var_declaration(attrs)?;
        if let Some(decl) = decl {
            self.tu.top_level.push(decl);
        }
        Ok(())
    }

    /// Parses a function after its `template` header (pattern position).
    fn parse_function_declaration(&mut self, attrs: Vec<Attribute>) -> Result<DeclId, Error> {
        match self.parse_function_or_var_declaration(attrs)? {
            Some(decl) if matches!(self.tu.decl(decl).kind, DeclKind::Function(_)) => Ok(decl),
            _ => Err(self.err("expected a function declaration")),
        }
    }

    fn parse_function_or_var_declaration(&mut self, attrs: Vec<Attribute>) -> Result<Option<DeclId>, Error> {
        let start = self.peek();
        let ty = self.parse_type()?;

        let name_tok = self.expect_ident("a declarator name")?;
        let mut name = self.tok_text(name_tok).to_owned();
        let mut name_range = SourceRange::at(name_tok.loc);
        let mut qualifier: Option<(String, Vec<String>)> = None;

        let qualifies = matches!(self.type_names.get(&name), Some(TypeName::ClassTemplate(_)))
            && self.at(TokenKind::Less);
        if qualifies {
            // Vec<int>::method
            self.bump();
            let mut targs = Vec::new();
            loop {
                let arg = self.parse_type()?;
                targs.push(self.tu.type_loc(arg).ty.text.clone());
                if !self.eat(TokenKind::Comma) {
                    break;
                }
            }
            self.expect_close_angle()?;
            self.expect(TokenKind::ColonColon, "'::'")?;
            let method_tok = self.expect_ident("method name")?;
            qualifier = Some((name, targs));
            name = self.tok_text(method_tok).to_owned();
            name_range = SourceRange::at(method_tok.loc);
        } else if self.at(TokenKind::ColonColon) {
            // Foo::method
            self.bump();
            let method_tok = self.expect_ident("method name")?;
            qualifier = Some((name, Vec::new()));
            name = self.tok_text(method_tok).to_owned();
            name_range = SourceRange::at(method_tok.loc);
        }

        if self.at(TokenKind::LParen) {
            let params = self.parse_params()?;
            let body = if self.at(TokenKind::LBrace) {
                Some(self.parse_compound()?)
            } else {
                self.expect(TokenKind::Semi, "';'")?;
                None
            };
            let end = self.prev_loc();
            let is_method = qualifier.is_some();
            let decl = self.tu.add_decl(Decl {
                kind: DeclKind::Function(FunctionDecl {
                    name: name.clone(),
                    kind: if is_method { FunctionKind::Method } else { FunctionKind::Free },
                    operator: None,
                    parent: None,
                    lexical_parent_is_record: !is_method,
                    qualifier,
                    templated: TemplatedKind::None,
                    params,
                    return_type: Some(ty),
                    name_range,
                    body,
                    is_definition: body.is_some(),
                    attrs,
                }),
                range: SourceRange::new(start.loc, end),
            });
            if !is_method {
                self.register_function(&name, decl);
            }
            return Ok(Some(decl));
        }

        // variable
        let (init, init_style) = if self.eat(TokenKind::Equal) {
            let init = self.parse_expr()?;
            (Some(init), InitStyle::Copy)
        } else if self.at(TokenKind::LParen) {
            let lparen = self.bump();
            let mut args = Vec::new();
            if !self.at(TokenKind::RParen) {
                loop {
                    args.push(self.parse_expr()?);
                    if !self.eat(TokenKind::Comma) {
                        break;
                    }
                }
            }
            let rparen = self.expect(TokenKind::RParen, "')'")?;
            let var_type = self.tu.type_loc(ty).ty.clone();
            let construct = self.tu.add_node(Node {
                kind: NodeKind::Construct(ConstructData {
                    ctor: None,
                    ty: var_type,
                    args,
                    paren_range: Some(SourceRange::new(lparen.loc, rparen.loc)),
                }),
                range: SourceRange::new(lparen.loc, rparen.loc),
            });
            (Some(construct), InitStyle::Call)
        } else {
            (None, InitStyle::None)
        };
        let end = self.prev_loc();
        self.expect(TokenKind::Semi, "';' after variable declaration")?;

        let decl = self.tu.add_decl(Decl {
            kind: DeclKind::Var(VarDecl {
                name: name.clone(),
                ty,
                init,
                init_style,
            }),
            range: SourceRange::new(start.loc, end),
        });
        self.tu.globals.insert(name, decl);
        Ok(Some(decl))
    }

    fn register_function(&mut self, name: &str, decl: DeclId) {
        // prefer the definition over forward declarations
        let is_definition = self.tu.function(decl).is_definition;
        match self.tu.globals.get(name) {
            Some(&existing)
                if matches!(&self.tu.decl(existing).kind, DeclKind::Function(f) if f.is_definition)
                    && !is_definition => {}
            _ => {
                self.tu.globals.insert(name.to_owned(), decl);
            }
        }
    }

    // ----- statements -----

    fn parse_compound(&mut self) -> Result<NodeId, Error> {
        let lbrace = self.expect(TokenKind::LBrace, "'{'")?;
        let mut stmts = Vec::new();
        while !self.at(TokenKind::RBrace) {
            if self.at(TokenKind::Eof) {
                return Err(self.err("unterminated compound statement"));
            }
            stmts.push(self.parse_stmt()?);
        }
        let rbrace = self.bump();
        Ok(self.tu.add_node(Node {
            kind: NodeKind::Compound {
                stmts,
                lbrace: lbrace.loc,
                rbrace: rbrace.loc,
            },
            range: SourceRange::new(lbrace.loc, rbrace.loc),
        }))
    }

    fn parse_stmt(&mut self) -> Result<NodeId, Error> {
        if self.at(TokenKind::LBrace) {
            return self.parse_compound();
        }
        if self.at_ident("return") {
            let kw = self.bump();
            let value = if self.at(TokenKind::Semi) {
                None
            } else {
                Some(self.parse_expr()?)
            };
            let end = self.prev_loc();
            self.expect(TokenKind::Semi, "';' after return")?;
            return Ok(self.tu.add_node(Node {
                kind: NodeKind::Return { value },
                range: SourceRange::new(kw.loc, end),
            }));
        }
        if self.at_ident("if") {
            let kw = self.bump();
            self.expect(TokenKind::LParen, "'('")?;
            let cond = self.parse_expr()?;
            self.expect(TokenKind::RParen, "')'")?;
            let then_branch = self.parse_stmt()?;
            let else_branch = if self.eat_ident("else") {
                Some(self.parse_stmt()?)
            } else {
                None
            };
            let end = self.prev_loc();
            return Ok(self.tu.add_node(Node {
                kind: NodeKind::If {
                    cond,
                    then_branch,
                    else_branch,
                },
                range: SourceRange::new(kw.loc, end),
            }));
        }
        if self.at_ident("while") {
            let kw = self.bump();
            self.expect(TokenKind::LParen, "'('")?;
            let cond = self.parse_expr()?;
            self.expect(TokenKind::RParen, "')'")?;
            let body = self.parse_stmt()?;
            let end = self.prev_loc();
            return Ok(self.tu.add_node(Node {
                kind: NodeKind::While { cond, body },
                range: SourceRange::new(kw.loc, end),
            }));
        }
        if self.at_ident("for") {
            let kw = self.bump();
            self.expect(TokenKind::LParen, "'('")?;
            let init = if self.eat(TokenKind::Semi) {
                None
            } else if self.is_type_start(self.peek()) {
                Some(self.parse_var_decl_stmt()?)
            } else {
                let expr = self.parse_expr()?;
                self.expect(TokenKind::Semi, "';'")?;
                Some(expr)
            };
            let cond = if self.at(TokenKind::Semi) {
                None
            } else {
                Some(self.parse_expr()?)
            };
            self.expect(TokenKind::Semi, "';'")?;
            let step = if self.at(TokenKind::RParen) {
                None
            } else {
                Some(self.parse_expr()?)
            };
            self.expect(TokenKind::RParen, "')'")?;
            let body = self.parse_stmt()?;
            let end = self.prev_loc();
            return Ok(self.tu.add_node(Node {
                kind: NodeKind::For { init, cond, step, body },
                range: SourceRange::new(kw.loc, end),
            }));
        }
        if self.is_type_start(self.peek()) {
            return self.parse_var_decl_stmt();
        }

        let expr = self.parse_expr()?;
        self.expect(TokenKind::Semi, "';' after expression")?;
        Ok(expr)
    }

    /// `T name [= init | (args)] ;` consumes the semicolon; the statement
    /// range ends at the last token before it.
    fn parse_var_decl_stmt(&mut self) -> Result<NodeId, Error> {
        let start = self.peek();
        let ty = self.parse_type()?;
        let name_tok = self.expect_ident("variable name")?;
        let name = self.tok_text(name_tok).to_owned();

        let (init, init_style) = if self.eat(TokenKind::Equal) {
            (Some(self.parse_expr()?), InitStyle::Copy)
        } else if self.at(TokenKind::LParen) {
            let lparen = self.bump();
            let mut args = Vec::new();
            if !self.at(TokenKind::RParen) {
                loop {
                    args.push(self.parse_expr()?);
                    if !self.eat(TokenKind::Comma) {
                        break;
                    }
                }
            }
            let rparen = self.expect(TokenKind::RParen, "')'")?;
            let var_type = self.tu.type_loc(ty).ty.clone();
            let construct = self.tu.add_node(Node {
                kind: NodeKind::Construct(ConstructData {
                    ctor: None,
                    ty: var_type,
                    args,
                    paren_range: Some(SourceRange::new(lparen.loc, rparen.loc)),
                }),
                range: SourceRange::new(lparen.loc, rparen.loc),
            });
            (Some(construct), InitStyle::Call)
        } else {
            (None, InitStyle::None)
        };

        let end = self.prev_loc();
        self.expect(TokenKind::Semi, "';' after variable declaration")?;
        let decl = self.tu.add_decl(Decl {
            kind: DeclKind::Var(VarDecl {
                name,
                ty,
                init,
                init_style,
            }),
            range: SourceRange::new(start.loc, end),
        });
        Ok(self.tu.add_node(Node {
            kind: NodeKind::DeclStmt { decl },
            range: SourceRange::new(start.loc, end),
        }))
    }

    // ----- expressions -----

    fn parse_expr(&mut self) -> Result<NodeId, Error> {
        self.parse_assign()
    }

    fn parse_assign(&mut self) -> Result<NodeId, Error> {
        use TokenKind as T;

        let lhs = self.parse_conditional()?;
        let op = match self.peek().kind {
            T::Equal => Some(OperatorKind::Equal),
            T::PlusEqual => Some(OperatorKind::PlusEqual),
            T::MinusEqual => Some(OperatorKind::MinusEqual),
            T::StarEqual => Some(OperatorKind::StarEqual),
            T::SlashEqual => Some(OperatorKind::SlashEqual),
            T::PercentEqual => Some(OperatorKind::PercentEqual),
            T::CaretEqual => Some(OperatorKind::CaretEqual),
            T::AmpEqual => Some(OperatorKind::AmpEqual),
            T::PipeEqual => Some(OperatorKind::PipeEqual),
            T::LessLessEqual => Some(OperatorKind::LessLessEqual),
            T::GreaterGreaterEqual => Some(OperatorKind::GreaterGreaterEqual),
            _ => None,
        };
        let Some(op) = op else {
            return Ok(lhs);
        };
        self.bump();
        let rhs = self.parse_assign()?;
        let begin = self.tu.node(lhs).range.begin;
        Ok(self.tu.add_node(Node {
            kind: NodeKind::Assign { op, lhs, rhs },
            range: SourceRange::new(begin, self.prev_loc()),
        }))
    }

    fn parse_conditional(&mut self) -> Result<NodeId, Error> {
        let cond = self.parse_binary(0)?;
        if !self.eat(TokenKind::Question) {
            return Ok(cond);
        }
        let then_expr = self.parse_expr()?;
        self.expect(TokenKind::Colon, "':'")?;
        let else_expr = self.parse_conditional()?;
        let begin = self.tu.node(cond).range.begin;
        Ok(self.tu.add_node(Node {
            kind: NodeKind::Conditional {
                cond,
                then_expr,
                else_expr,
            },
            range: SourceRange::new(begin, self.prev_loc()),
        }))
    }

    fn binary_op(&self, kind: TokenKind) -> Option<(OperatorKind, u8)> {
        use TokenKind as T;

        Some(match kind {
            T::PipePipe => (OperatorKind::PipePipe, 1),
            T::AmpAmp => (OperatorKind::AmpAmp, 2),
            T::Pipe => (OperatorKind::Pipe, 3),
            T::Caret => (OperatorKind::Caret, 4),
            T::Amp => (OperatorKind::Amp, 5),
            T::EqualEqual => (OperatorKind::EqualEqual, 6),
            T::ExclaimEqual => (OperatorKind::ExclaimEqual, 6),
            T::Less => (OperatorKind::Less, 7),
            T::Greater => (OperatorKind::Greater, 7),
            T::LessEqual => (OperatorKind::LessEqual, 7),
            T::GreaterEqual => (OperatorKind::GreaterEqual, 7),
            T::LessLess => (OperatorKind::LessLess, 8),
            T::GreaterGreater => (OperatorKind::GreaterGreater, 8),
            T::Plus => (OperatorKind::Plus, 9),
            T::Minus => (OperatorKind::Minus, 9),
            T::Star => (OperatorKind::Star, 10),
            T::Slash => (OperatorKind::Slash, 10),
            T::Percent => (OperatorKind::Percent, 10),
            _ => return None,
        })
    }

    fn parse_binary(&mut self, min_prec: u8) -> Result<NodeId, Error> {
        let mut lhs = self.parse_unary()?;
        while let Some((op, prec)) = self.binary_op(self.peek().kind) {
            if prec < min_prec {
                break;
            }
            self.bump();
            let rhs = self.parse_binary(prec + 1)?;
            let begin = self.tu.node(lhs).range.begin;
            lhs = self.tu.add_node(Node {
                kind: NodeKind::Binary { op, lhs, rhs },
                range: SourceRange::new(begin, self.prev_loc()),
            });
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<NodeId, Error> {
        use TokenKind as T;

        let op = match self.peek().kind {
            T::Amp => Some("&"),
            T::Star => Some("*"),
            T::Minus => Some("-"),
            T::Plus => Some("+"),
            T::Exclaim => Some("!"),
            T::Tilde => Some("~"),
            T::PlusPlus => Some("++"),
            T::MinusMinus => Some("--"),
            _ => None,
        };
        if let Some(op) = op {
            let tok = self.bump();
            let operand = self.parse_unary()?;
            return Ok(self.tu.add_node(Node {
                kind: NodeKind::Unary {
                    op,
                    operand,
                    prefix: true,
                },
                range: SourceRange::new(tok.loc, self.prev_loc()),
            }));
        }
        self.parse_postfix()
    }

    fn parse_args(&mut self) -> Result<(Vec<NodeId>, Token), Error> {
        self.expect(TokenKind::LParen, "'('")?;
        let mut args = Vec::new();
        if !self.at(TokenKind::RParen) {
            loop {
                args.push(self.parse_expr()?);
                if !self.eat(TokenKind::Comma) {
                    break;
                }
            }
        }
        let rparen = self.expect(TokenKind::RParen, "')'")?;
        Ok((args, rparen))
    }

    /// Tries to parse `<T1, T2>` followed by `(`; rolls back when the angle
    /// bracket turns out to be a comparison.
    fn try_parse_explicit_targs(&mut self) -> Option<Vec<String>> {
        if !self.at(TokenKind::Less) {
            return None;
        }
        let save_pos = self.pos;
        let save_types = self.tu.types.len();
        let save_splits = self.split_log.len();
        let attempt = (|| -> Result<Vec<String>, Error> {
            self.bump();
            let mut targs = Vec::new();
            loop {
                let ty = self.parse_type()?;
                targs.push(self.tu.type_loc(ty).ty.text.clone());
                if !self.eat(TokenKind::Comma) {
                    break;
                }
            }
            self.expect_close_angle()?;
            if !self.at(TokenKind::LParen) {
                return Err(self.err("not a template-id"));
            }
            Ok(targs)
        })();
        match attempt {
            Ok(targs) => Some(targs),
            Err(_) => {
                self.pos = save_pos;
                self.tu.types.truncate(save_types);
                while self.split_log.len() > save_splits {
                    let (index, original) = self.split_log.pop().expect("split log entry");
                    self.tokens[index] = original;
                }
                None
            }
        }
    }

    fn parse_postfix(&mut self) -> Result<NodeId, Error> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek().kind {
                TokenKind::Dot | TokenKind::Arrow => {
                    let is_arrow = self.bump().kind == TokenKind::Arrow;
                    let name_tok = self.expect_ident("member name")?;
                    let name = self.tok_text(name_tok).to_owned();
                    let begin = self.tu.node(expr).range.begin;
                    let explicit_targs = if self.member_template_names.contains(&name) {
                        self.try_parse_explicit_targs()
                    } else {
                        None
                    };
                    // written template arguments belong to the callee range
                    let member_end = if explicit_targs.is_some() {
                        self.prev_loc()
                    } else {
                        name_tok.loc
                    };
                    let member = self.tu.add_node(Node {
                        kind: NodeKind::Member(MemberData {
                            base: expr,
                            member: None,
                            name,
                            is_arrow,
                        }),
                        range: SourceRange::new(begin, member_end),
                    });
                    if self.at(TokenKind::LParen) {
                        let (args, rparen) = self.parse_args()?;
                        expr = self.tu.add_node(Node {
                            kind: NodeKind::MemberCall(MemberCallData {
                                callee: member,
                                explicit_targs,
                                args,
                                rparen: rparen.loc,
                            }),
                            range: SourceRange::new(begin, rparen.loc),
                        });
                    } else {
                        expr = member;
                    }
                }
                TokenKind::LParen => {
                    let begin = self.tu.node(expr).range.begin;
                    let (args, rparen) = self.parse_args()?;
                    expr = self.tu.add_node(Node {
                        kind: NodeKind::Call(CallData {
                            callee: expr,
                            callee_decl: None,
                            explicit_targs: None,
                            args,
                            rparen: rparen.loc,
                        }),
                        range: SourceRange::new(begin, rparen.loc),
                    });
                }
                TokenKind::LBracket => {
                    self.bump();
                    let index = self.parse_expr()?;
                    let rbracket = self.expect(TokenKind::RBracket, "']'")?;
                    let begin = self.tu.node(expr).range.begin;
                    expr = self.tu.add_node(Node {
                        kind: NodeKind::Subscript { base: expr, index },
                        range: SourceRange::new(begin, rbracket.loc),
                    });
                }
                TokenKind::PlusPlus | TokenKind::MinusMinus => {
                    let tok = self.bump();
                    let op = if tok.kind == TokenKind::PlusPlus { "++" } else { "--" };
                    let begin = self.tu.node(expr).range.begin;
                    expr = self.tu.add_node(Node {
                        kind: NodeKind::Unary {
                            op,
                            operand: expr,
                            prefix: false,
                        },
                        range: SourceRange::new(begin, tok.loc),
                    });
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<NodeId, Error> {
        use TokenKind as T;

        let tok = self.peek();
        match tok.kind {
            T::IntLiteral => {
                self.bump();
                Ok(self.literal(tok, "int"))
            }
            T::FloatLiteral => {
                self.bump();
                Ok(self.literal(tok, "float"))
            }
            T::StrLiteral => {
                self.bump();
                Ok(self.literal(tok, "const char *"))
            }
            T::CharLiteral => {
                self.bump();
                Ok(self.literal(tok, "char"))
            }
            T::LParen => {
                let lparen = self.bump();
                let sub = self.parse_expr()?;
                let rparen = self.expect(T::RParen, "')'")?;
                Ok(self.tu.add_node(Node {
                    kind: NodeKind::Paren { sub },
                    range: SourceRange::new(lparen.loc, rparen.loc),
                }))
            }
            T::Ident => {
                let text = self.tok_text(tok);
                match text {
                    "this" => {
                        self.bump();
                        Ok(self.tu.add_node(Node {
                            kind: NodeKind::This { implicit: false },
                            range: SourceRange::at(tok.loc),
                        }))
                    }
                    "true" | "false" => {
                        self.bump();
                        Ok(self.literal(tok, "bool"))
                    }
                    "sizeof" => {
                        let kw = self.bump();
                        self.expect(T::LParen, "'('")?;
                        // operand may be a type or an expression; skip either
                        if self.is_type_start(self.peek()) {
                            let _ty = self.parse_type()?;
                        } else {
                            let _expr = self.parse_expr()?;
                        }
                        let rparen = self.expect(T::RParen, "')'")?;
                        Ok(self.tu.add_node(Node {
                            kind: NodeKind::Literal { ty: "unsigned" },
                            range: SourceRange::new(kw.loc, rparen.loc),
                        }))
                    }
                    _ => self.parse_name_expr(),
                }
            }
            _ => Err(self.err("expected an expression")),
        }
    }

    fn literal(&mut self, tok: Token, ty: &'static str) -> NodeId {
        self.tu.add_node(Node {
            kind: NodeKind::Literal { ty },
            range: SourceRange::at(tok.loc),
        })
    }

    /// An identifier in expression position: a temporary object when it
    /// names a record or class template, a (possibly template-id) reference
    /// otherwise.
    fn parse_name_expr(&mut self) -> Result<NodeId, Error> {
        let name_tok = self.bump();
        let name = self.tok_text(name_tok).to_owned();

        if self.is_template_param(&name) && self.at(TokenKind::LParen) {
            let ty = TypeRef {
                text: name.clone(),
                base: name,
                record: None,
            };
            return self.parse_temporary(name_tok.loc, ty);
        }

        match self.type_names.get(&name).copied() {
            Some(TypeName::ClassTemplate(_)) if self.at(TokenKind::Less) => {
                self.bump();
                let mut child_texts = Vec::new();
                loop {
                    let child = self.parse_type()?;
                    child_texts.push(self.tu.type_loc(child).ty.text.clone());
                    if !self.eat(TokenKind::Comma) {
                        break;
                    }
                }
                self.expect_close_angle()?;
                let text = format!("{name}<{}>", child_texts.join(", "));
                let ty = TypeRef {
                    text,
                    base: name,
                    record: None,
                };
                self.parse_temporary(name_tok.loc, ty)
            }
            Some(TypeName::Record(record)) if self.at(TokenKind::LParen) => {
                let ty = TypeRef {
                    text: name.clone(),
                    base: name,
                    record: Some(record),
                };
                self.parse_temporary(name_tok.loc, ty)
            }
            _ => {
                let is_function_template = matches!(
                    self.tu.globals.get(&name).map(|&d| &self.tu.decl(d).kind),
                    Some(DeclKind::FunctionTemplate(_))
                );
                let explicit_targs = if is_function_template {
                    self.try_parse_explicit_targs()
                } else {
                    None
                };
                let decl_ref = self.tu.add_node(Node {
                    kind: NodeKind::DeclRef { decl: None, name },
                    range: SourceRange::at(name_tok.loc),
                });
                if explicit_targs.is_some() {
                    // template-id in call position
                    let (args, rparen) = self.parse_args()?;
                    return Ok(self.tu.add_node(Node {
                        kind: NodeKind::Call(CallData {
                            callee: decl_ref,
                            callee_decl: None,
                            explicit_targs,
                            args,
                            rparen: rparen.loc,
                        }),
                        range: SourceRange::new(name_tok.loc, rparen.loc),
                    }));
                }
                Ok(decl_ref)
            }
        }
    }

    /// `T(args)`: a functional cast for a single argument, a temporary
    /// object expression otherwise; both carry the construct underneath.
    fn parse_temporary(&mut self, begin: SourceLocation, ty: TypeRef) -> Result<NodeId, Error> {
        let lparen = self.expect(TokenKind::LParen, "'('")?;
        let mut args = Vec::new();
        if !self.at(TokenKind::RParen) {
            loop {
                args.push(self.parse_expr()?);
                if !self.eat(TokenKind::Comma) {
                    break;
                }
            }
        }
        let rparen = self.expect(TokenKind::RParen, "')'")?;
        let range = SourceRange::new(begin, rparen.loc);
        let paren_range = Some(SourceRange::new(lparen.loc, rparen.loc));

        if args.len() == 1 {
            let construct = self.tu.add_node(Node {
                kind: NodeKind::Construct(ConstructData {
                    ctor: None,
                    ty: ty.clone(),
                    args,
                    paren_range,
                }),
                range,
            });
            Ok(self.tu.add_node(Node {
                kind: NodeKind::FunctionalCast { ty, sub: construct },
                range,
            }))
        } else {
            Ok(self.tu.add_node(Node {
                kind: NodeKind::TemporaryObject(ConstructData {
                    ctor: None,
                    ty,
                    args,
                    paren_range,
                }),
                range,
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::ast::DeclKind;

    fn parse_source(source: &str) -> ParsedUnit {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.m");
        fs::write(&path, source).unwrap();
        parse_file(&path, &[], &ParseOptions::default()).unwrap()
    }

    #[test]
    fn parses_a_record_with_fields_and_methods() {
        let unit = parse_source("struct Vec\n{\n    int x;\n    int get()\n    {\n        return x;\n    }\n};\n");
        let record = unit
            .tu
            .top_level
            .iter()
            .find_map(|&d| match &unit.tu.decl(d).kind {
                DeclKind::Record(r) => Some(r),
                _ => None,
            })
            .expect("record parsed");
        assert_eq!(record.name, "Vec");
        assert_eq!(record.children.len(), 2);
        assert!(!record.has_user_constructor);
    }

    #[test]
    fn class_templates_register_their_pattern() {
        let unit = parse_source("template<typename T>\nstruct Vec\n{\n    T x;\n    Vec<T> *next;\n};\n");
        let template = unit
            .tu
            .top_level
            .iter()
            .find_map(|&d| match &unit.tu.decl(d).kind {
                DeclKind::ClassTemplate(t) => Some(t),
                _ => None,
            })
            .expect("class template parsed");
        assert_eq!(template.name, "Vec");
        assert_eq!(template.params, vec!["T".to_owned()]);
        let pattern = unit.tu.record(template.pattern);
        assert_eq!(pattern.children.len(), 2);
        assert!(pattern.described_template.is_some());
    }

    #[test]
    fn instantiation_directives_become_requests() {
        let unit = parse_source(
            "template<typename T>\n__kernel void run(T value)\n{\n}\n\ntemplate __kernel void run<int >(int);\n",
        );
        assert_eq!(unit.tu.instantiation_requests.len(), 1);
        let request = &unit.tu.instantiation_requests[0];
        assert_eq!(request.name, "run");
        assert_eq!(request.template_args, vec!["int".to_owned()]);
        // the directive is not a walkable declaration
        assert_eq!(unit.tu.top_level.len(), 1);
    }

    #[test]
    fn kernel_keyword_becomes_an_annotation() {
        let unit = parse_source("__kernel void run(int value)\n{\n}\n");
        let function = unit
            .tu
            .top_level
            .iter()
            .find_map(|&d| match &unit.tu.decl(d).kind {
                DeclKind::Function(f) => Some(f),
                _ => None,
            })
            .expect("function parsed");
        assert!(function.attrs.iter().any(|a| a.annotation == "__patos__kernel"));
        assert!(function.is_kernel());
    }

    #[test]
    fn quoted_includes_are_spliced_once() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("header.h"), "struct Foo\n{\n    int x;\n};\n").unwrap();
        fs::write(
            dir.path().join("main.m"),
            "#include \"header.h\"\n#include \"header.h\"\n\nFoo f;\n",
        )
        .unwrap();
        let unit = parse_file(&dir.path().join("main.m"), &[], &ParseOptions::default()).unwrap();

        let records = unit
            .tu
            .top_level
            .iter()
            .filter(|&&d| matches!(unit.tu.decl(d).kind, DeclKind::Record(_)))
            .count();
        assert_eq!(records, 1, "the header is entered once");
        assert_eq!(unit.source.files().count(), 2);
    }

    #[test]
    fn templates_are_rejected_in_opencl_mode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.m");
        fs::write(&path, "template<typename T>\nstruct Vec\n{\n    T x;\n};\n").unwrap();
        let options = ParseOptions {
            cplusplus: false,
            opencl: true,
        };
        assert!(parse_file(&path, &[], &options).is_err());
    }
}
