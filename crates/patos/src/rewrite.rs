//! Buffered rewrite overlays over the original source text.
//!
//! A `Rewriter` never mutates the text it was created over; it records edits
//! keyed by original byte offsets and composes them on demand. Several
//! independent overlays may coexist over the same source manager: the
//! passes stack a fresh overlay per specialization so identical source
//! ranges can be rewritten once per instantiation.
//!
//! Replacement ranges on a single rewriter must be pairwise disjoint; a
//! violation is a programmer error and panics. Insertions may sit on
//! replacement boundaries. At one offset the composition order is:
//! insert-before edits (latest first), insert-after edits (in call order),
//! then the replacement starting there.

use std::{fs, path::PathBuf};

use ahash::AHashMap;

use crate::{
    error::TransformError,
    source::{FileId, SourceLocation, SourceManager, SourceRange},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Flavor {
    InsertBefore,
    InsertAfter,
    Replace,
}

#[derive(Debug)]
struct Edit {
    start: u32,
    end: u32,
    text: String,
    flavor: Flavor,
    seq: u32,
}

#[derive(Debug, Default)]
struct EditBuffer {
    edits: Vec<Edit>,
}

#[derive(Debug)]
pub struct Rewriter<'sm> {
    source: &'sm SourceManager,
    buffers: AHashMap<FileId, EditBuffer>,
    seq: u32,
}

impl<'sm> Rewriter<'sm> {
    pub fn new(source: &'sm SourceManager) -> Self {
        Self {
            source,
            buffers: AHashMap::new(),
            seq: 0,
        }
    }

    pub fn source_manager(&self) -> &'sm SourceManager {
        self.source
    }

    fn push_edit(&mut self, file: FileId, edit: Edit) {
        let buffer = self.buffers.entry(file).or_default();
        if edit.flavor == Flavor::Replace && edit.start < edit.end {
            for existing in &buffer.edits {
                let disjoint = match existing.flavor {
                    Flavor::Replace => existing.end <= edit.start || edit.end <= existing.start,
                    // insertions may sit on the boundary but not strictly inside
                    _ => existing.start <= edit.start || existing.start >= edit.end,
                };
                assert!(
                    disjoint,
                    "overlapping rewrite at {}..{} (existing edit at {}..{})",
                    edit.start, edit.end, existing.start, existing.end
                );
            }
        } else if edit.flavor != Flavor::Replace {
            for existing in &buffer.edits {
                let ok = existing.flavor != Flavor::Replace
                    || existing.start >= existing.end
                    || existing.start >= edit.start
                    || edit.start >= existing.end;
                assert!(
                    ok,
                    "insertion at {} lands inside replaced range {}..{}",
                    edit.start, existing.start, existing.end
                );
            }
        }
        buffer.edits.push(edit);
    }

    fn next_seq(&mut self) -> u32 {
        self.seq += 1;
        self.seq
    }

    /// Inserts `text` immediately before the byte at `loc`. Repeated inserts
    /// at one location stack up front (the latest ends up first).
    pub fn insert_before(&mut self, loc: SourceLocation, text: impl Into<String>) {
        let seq = self.next_seq();
        self.push_edit(
            loc.file,
            Edit {
                start: loc.offset,
                end: loc.offset,
                text: text.into(),
                flavor: Flavor::InsertBefore,
                seq,
            },
        );
    }

    /// Inserts `text` at `loc`, after any text previously inserted there.
    pub fn insert_after(&mut self, loc: SourceLocation, text: impl Into<String>) {
        let seq = self.next_seq();
        self.push_edit(
            loc.file,
            Edit {
                start: loc.offset,
                end: loc.offset,
                text: text.into(),
                flavor: Flavor::InsertAfter,
                seq,
            },
        );
    }

    /// Replaces the token range (widened past its final token) with `text`.
    pub fn replace_range(&mut self, range: SourceRange, text: impl Into<String>) {
        let (start, end) = self.source.char_span(range);
        self.replace_chars(range.begin, end.max(start), text);
    }

    /// Replaces the raw character span `[begin, end_offset)`.
    ///
    /// Used where a token range is the wrong shape, e.g. a callee range that
    /// must swallow the opening parenthesis and trailing whitespace.
    pub fn replace_chars(&mut self, begin: SourceLocation, end_offset: u32, text: impl Into<String>) {
        let seq = self.next_seq();
        self.push_edit(
            begin.file,
            Edit {
                start: begin.offset,
                end: end_offset,
                text: text.into(),
                flavor: Flavor::Replace,
                seq,
            },
        );
    }

    /// Removes the token range from the output.
    pub fn remove_range(&mut self, range: SourceRange) {
        self.replace_range(range, String::new());
    }

    fn ordered_edits(&self, file: FileId) -> Vec<&Edit> {
        let Some(buffer) = self.buffers.get(&file) else {
            return Vec::new();
        };
        let mut edits: Vec<&Edit> = buffer.edits.iter().collect();
        edits.sort_by_key(|e| {
            let seq_key = if e.flavor == Flavor::InsertBefore {
                u32::MAX - e.seq
            } else {
                e.seq
            };
            (e.start, e.flavor, seq_key)
        });
        edits
    }

    fn compose(&self, file: FileId, from: u32, to: u32, include_end_insertions: bool) -> String {
        let text = self.source.text(file);
        let mut result = String::new();
        let mut pos = from;
        for edit in self.ordered_edits(file) {
            let insertion = edit.start == edit.end && edit.flavor != Flavor::Replace;
            let inside = if insertion {
                edit.start >= from && (edit.start < to || (include_end_insertions && edit.start == to))
            } else {
                edit.start >= from && edit.end <= to
            };
            if !inside || edit.start < pos {
                continue;
            }
            result.push_str(&text[pos as usize..edit.start as usize]);
            result.push_str(&edit.text);
            pos = edit.end.max(edit.start);
        }
        if pos < to {
            result.push_str(&text[pos as usize..to as usize]);
        }
        result
    }

    /// The in-progress rewritten text of a token range: the original text
    /// with every edit inside the range composed in order.
    pub fn rewritten_text_of(&self, range: SourceRange) -> String {
        let (from, to) = self.source.char_span(range);
        self.compose(range.begin.file, from, to.max(from), false)
    }

    /// The complete rewritten buffer for one file.
    pub fn rendered_text(&self, file: FileId) -> String {
        let len = self.source.text(file).len() as u32;
        self.compose(file, 0, len, true)
    }

    pub fn has_edits(&self, file: FileId) -> bool {
        self.buffers.get(&file).is_some_and(|b| !b.edits.is_empty())
    }

    pub fn is_changed(&self) -> bool {
        self.buffers.values().any(|b| !b.edits.is_empty())
    }

    pub fn changed_files(&self) -> impl Iterator<Item = FileId> + '_ {
        self.buffers
            .iter()
            .filter(|(_, b)| !b.edits.is_empty())
            .map(|(&file, _)| file)
    }

    /// Writes every changed buffer back over its file on disk.
    pub fn flush_changed_files(&self) -> Result<(), TransformError> {
        let mut files: Vec<FileId> = self.changed_files().collect();
        files.sort_by_key(|f| f.index());
        for file in files {
            let path: PathBuf = self.source.file(file).path.clone();
            let rendered = self.rendered_text(file);
            fs::write(&path, rendered).map_err(|source| TransformError::UnsavedOutput { path: path.clone(), source })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::Characteristic;

    fn manager(text: &str) -> SourceManager {
        let mut sm = SourceManager::new();
        let id = sm.add_file("test.m".into(), text.to_owned(), Characteristic::User);
        sm.set_main_file(id);
        sm
    }

    fn loc(sm: &SourceManager, offset: u32) -> SourceLocation {
        SourceLocation {
            file: sm.main_file(),
            offset,
        }
    }

    #[test]
    fn untouched_range_yields_original_text() {
        let sm = manager("int x = 1;");
        let rewriter = Rewriter::new(&sm);
        let range = SourceRange::new(loc(&sm, 0), loc(&sm, 8));
        assert_eq!(rewriter.rewritten_text_of(range), "int x = 1");
    }

    #[test]
    fn replace_and_insert_compose() {
        let sm = manager("Vec<int> v(1);");
        let mut rewriter = Rewriter::new(&sm);
        // type reference 0..8, paren range 10..13
        rewriter.replace_range(SourceRange::new(loc(&sm, 0), loc(&sm, 7)), "__Patos_Vec_int");
        rewriter.insert_before(loc(&sm, 10), " = ");
        rewriter.replace_range(SourceRange::new(loc(&sm, 10), loc(&sm, 12)), "__Patos_Vec_int__constructor(1)");
        assert_eq!(
            rewriter.rendered_text(sm.main_file()),
            "__Patos_Vec_int v = __Patos_Vec_int__constructor(1);"
        );
    }

    #[test]
    fn insert_after_accumulates_in_call_order() {
        let sm = manager("a;");
        let mut rewriter = Rewriter::new(&sm);
        rewriter.insert_after(loc(&sm, 2), "b;");
        rewriter.insert_after(loc(&sm, 2), "c;");
        assert_eq!(rewriter.rendered_text(sm.main_file()), "a;b;c;");
    }

    #[test]
    fn insert_before_stacks_in_reverse_call_order() {
        let sm = manager("x");
        let mut rewriter = Rewriter::new(&sm);
        rewriter.insert_before(loc(&sm, 0), "first");
        rewriter.insert_before(loc(&sm, 0), "second");
        assert_eq!(rewriter.rendered_text(sm.main_file()), "secondfirstx");
    }

    #[test]
    fn removal_drops_the_range() {
        let sm = manager("struct Foo { int x; }; int y;");
        let mut rewriter = Rewriter::new(&sm);
        rewriter.remove_range(SourceRange::new(loc(&sm, 0), loc(&sm, 20)));
        assert_eq!(rewriter.rendered_text(sm.main_file()), "; int y;");
    }

    #[test]
    #[should_panic(expected = "overlapping rewrite")]
    fn overlapping_replacements_are_rejected() {
        let sm = manager("abcdefgh;");
        let mut rewriter = Rewriter::new(&sm);
        rewriter.replace_chars(loc(&sm, 0), 4, "x");
        rewriter.replace_chars(loc(&sm, 2), 6, "y");
    }

    #[test]
    fn pseudo_random_edits_keep_the_disjointness_check_honest() {
        let text = "abcdefghijklmnopqrstuvwxyz0123456789abcdefghijklmnopqrstuvwxyz";
        let sm = manager(text);
        let mut state: u64 = 0x2545_F491_4F6C_DD1D;
        let mut next = move || {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            state
        };
        let mut applied: Vec<(u32, u32)> = Vec::new();
        let mut rewriter = Rewriter::new(&sm);
        for _ in 0..200 {
            let start = (next() % (text.len() as u64 - 4)) as u32;
            let end = start + 1 + (next() % 4) as u32;
            let disjoint = applied.iter().all(|&(s, e)| e <= start || end <= s);
            let attempt = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                let mut probe = Rewriter::new(&sm);
                for &(s, e) in &applied {
                    probe.replace_chars(loc(&sm, s), e, "_");
                }
                probe.replace_chars(loc(&sm, start), end, "_");
            }));
            assert_eq!(attempt.is_ok(), disjoint);
            if disjoint {
                rewriter.replace_chars(loc(&sm, start), end, "_");
                applied.push((start, end));
            }
        }
        assert!(rewriter.is_changed());

        // the composed buffer equals the edits applied to the original text
        let mut expected = String::new();
        applied.sort_unstable();
        let mut pos = 0usize;
        for &(s, e) in &applied {
            expected.push_str(&text[pos..s as usize]);
            expected.push('_');
            pos = e as usize;
        }
        expected.push_str(&text[pos..]);
        assert_eq!(rewriter.rendered_text(sm.main_file()), expected);
    }
}
