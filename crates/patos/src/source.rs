//! Files, locations and ranges of one translation unit.
//!
//! `SourceRange` follows the clang convention the rewriting engine was built
//! against: a range ends at the *start* of its last token. Consumers that
//! need a character span widen the end with [`SourceManager::end_of_token`].

use std::path::{Path, PathBuf};

use crate::lex::{self, TokenKind};

/// Index into the source manager's file table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileId(u32);

impl FileId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A byte position inside one file of the translation unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceLocation {
    pub file: FileId,
    pub offset: u32,
}

impl SourceLocation {
    /// Shifts the location by a (possibly negative) number of bytes.
    #[must_use]
    pub fn with_offset(self, delta: i32) -> Self {
        Self {
            file: self.file,
            offset: self.offset.wrapping_add_signed(delta),
        }
    }
}

/// A token-bounded region: `begin` is the first byte of the first token,
/// `end` the first byte of the last token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceRange {
    pub begin: SourceLocation,
    pub end: SourceLocation,
}

impl SourceRange {
    pub fn new(begin: SourceLocation, end: SourceLocation) -> Self {
        Self { begin, end }
    }

    /// A degenerate range covering the single token at `loc`.
    pub fn at(loc: SourceLocation) -> Self {
        Self { begin: loc, end: loc }
    }
}

/// Whether a file belongs to the user's program or to a system include path.
/// Declarations in system files are never rewritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Characteristic {
    User,
    System,
}

#[derive(Debug)]
pub struct SourceFile {
    pub path: PathBuf,
    pub text: String,
    pub characteristic: Characteristic,
}

/// Owns every file loaded into one translation unit and answers the location
/// queries the passes need.
#[derive(Debug, Default)]
pub struct SourceManager {
    files: Vec<SourceFile>,
    main_file: Option<FileId>,
}

impl SourceManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_file(&mut self, path: PathBuf, text: String, characteristic: Characteristic) -> FileId {
        let id = FileId(u32::try_from(self.files.len()).unwrap_or(u32::MAX));
        self.files.push(SourceFile {
            path,
            text,
            characteristic,
        });
        id
    }

    pub fn set_main_file(&mut self, file: FileId) {
        self.main_file = Some(file);
    }

    /// The file the pass was invoked on.
    ///
    /// # Panics
    /// Panics if no main file was registered; the front end always sets one.
    pub fn main_file(&self) -> FileId {
        self.main_file.expect("no main file registered")
    }

    pub fn file(&self, id: FileId) -> &SourceFile {
        &self.files[id.index()]
    }

    pub fn file_by_path(&self, path: &Path) -> Option<FileId> {
        self.files
            .iter()
            .position(|f| f.path == path)
            .map(|i| FileId(i as u32))
    }

    pub fn files(&self) -> impl Iterator<Item = (FileId, &SourceFile)> {
        self.files.iter().enumerate().map(|(i, f)| (FileId(i as u32), f))
    }

    pub fn text(&self, file: FileId) -> &str {
        &self.file(file).text
    }

    pub fn characteristic(&self, loc: SourceLocation) -> Characteristic {
        self.file(loc.file).characteristic
    }

    pub fn filename(&self, loc: SourceLocation) -> &Path {
        &self.file(loc.file).path
    }

    pub fn is_in_main_file(&self, loc: SourceLocation) -> bool {
        loc.file == self.main_file()
    }

    /// The location one past the last byte of `file`.
    pub fn end_of_file(&self, file: FileId) -> SourceLocation {
        SourceLocation {
            file,
            offset: self.text(file).len() as u32,
        }
    }

    /// Advances past the token at `loc` (skipping leading whitespace and
    /// comments first) and returns the location just after it.
    pub fn end_of_token(&self, loc: SourceLocation) -> SourceLocation {
        let token = lex::scan_token(self.text(loc.file), loc.offset);
        SourceLocation {
            file: loc.file,
            offset: token.end,
        }
    }

    /// Scans the token *after* the token at `loc`; if it has the wanted kind,
    /// returns the location just past it.
    pub fn location_after_token(&self, loc: SourceLocation, kind: TokenKind) -> Option<SourceLocation> {
        let text = self.text(loc.file);
        let current = lex::scan_token(text, loc.offset);
        let next = lex::scan_token(text, current.end);
        (next.kind == kind).then_some(SourceLocation {
            file: loc.file,
            offset: next.end,
        })
    }

    /// The character span `[begin, end)` a token range covers.
    pub fn char_span(&self, range: SourceRange) -> (u32, u32) {
        debug_assert_eq!(range.begin.file, range.end.file, "range spans files");
        (range.begin.offset, self.end_of_token(range.end).offset)
    }

    /// The original (unrewritten) text of a token range.
    pub fn text_of(&self, range: SourceRange) -> &str {
        let (begin, end) = self.char_span(range);
        &self.text(range.begin.file)[begin as usize..end.max(begin) as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(text: &str) -> (SourceManager, FileId) {
        let mut sm = SourceManager::new();
        let id = sm.add_file(PathBuf::from("test.m"), text.to_owned(), Characteristic::User);
        sm.set_main_file(id);
        (sm, id)
    }

    #[test]
    fn end_of_token_skips_whitespace_first() {
        let (sm, file) = manager("int   get ( )");
        // querying inside whitespace lands after the next token
        let loc = SourceLocation { file, offset: 3 };
        assert_eq!(sm.end_of_token(loc).offset, 9);
    }

    #[test]
    fn location_after_token_finds_semicolon() {
        let (sm, file) = manager("struct Foo { int x; } ;");
        // token at offset 20 is '}'; the next token is ';'
        let loc = SourceLocation { file, offset: 20 };
        let after = sm.location_after_token(loc, TokenKind::Semi).unwrap();
        assert_eq!(after.offset, 23);
        assert_eq!(sm.location_after_token(loc, TokenKind::Comma), None);
    }

    #[test]
    fn text_of_widens_to_token_end() {
        let (sm, file) = manager("Vec<int> value;");
        let range = SourceRange::new(
            SourceLocation { file, offset: 0 },
            SourceLocation { file, offset: 9 },
        );
        assert_eq!(sm.text_of(range), "Vec<int> value");
    }
}
