//! Replays a diff keeping only selected hunks.
//!
//! Header policy: a file's header lines are held back and written right before
//! the first selected hunk of that file. A file with no selected hunk writes
//! nothing, so the output is always an applicable patch. Text preceding the
//! first file header is passed through.
//!
//! Lines are copied as the exact bytes read. File sections without any hunk
//! (binary files, mode-only changes) have nothing to select and are always
//! dropped, so selecting every hunk reproduces the input byte for byte only
//! when each file section carries at least one hunk.

use crate::split::{self, SplitError, is_file_header, is_separator, line_text, parse_separator};
use crate::{FileId, HunkId};
use std::collections::BTreeSet;
use std::io::{BufRead, Write};

pub struct DiffRecombiner<'a> {
    selection: &'a BTreeSet<HunkId>,
    file: Option<FileId>,
    pending_header: Vec<Vec<u8>>,
    header_written: bool,
    in_header: bool,
    enabled: bool,
    line_no: usize,
    emitted: usize,
}

impl<'a> DiffRecombiner<'a> {
    pub fn new(selection: &'a BTreeSet<HunkId>) -> Self {
        Self {
            selection,
            file: None,
            pending_header: Vec::new(),
            header_written: false,
            in_header: false,
            enabled: false,
            line_no: 0,
            emitted: 0,
        }
    }

    /// Number of hunks written so far.
    pub fn emitted(&self) -> usize {
        self.emitted
    }

    /// Process one raw line, terminator included.
    pub fn push_line<W: Write>(&mut self, raw: &[u8], out: &mut W) -> split::Result<()> {
        self.line_no += 1;
        let line = line_text(raw);

        if is_file_header(&line) {
            self.file = Some(FileId::from_header(&line));
            self.pending_header.clear();
            self.pending_header.push(raw.to_vec());
            self.header_written = false;
            self.in_header = true;
            self.enabled = false;
            return Ok(());
        }

        if is_separator(&line) {
            let new_start = parse_separator(&line).ok_or_else(|| SplitError::BadSeparator {
                line: self.line_no,
                text: line.to_string(),
            })?;
            let file = self
                .file
                .clone()
                .ok_or(SplitError::OrphanSeparator { line: self.line_no })?;

            self.in_header = false;
            self.enabled = self.selection.contains(&HunkId::new(file, new_start));
            if self.enabled {
                if !self.header_written {
                    for header_line in &self.pending_header {
                        out.write_all(header_line)?;
                    }
                    self.header_written = true;
                }
                self.emitted += 1;
                out.write_all(raw)?;
            }
            return Ok(());
        }

        if self.in_header {
            self.pending_header.push(raw.to_vec());
        } else if self.file.is_none() || self.enabled {
            out.write_all(raw)?;
        }
        Ok(())
    }
}

/// Write the hunks of `reader` that are in `selection` to `out`. Returns the
/// number of hunks written.
pub fn recombine<R, W>(mut reader: R, selection: &BTreeSet<HunkId>, out: &mut W) -> split::Result<usize>
where
    R: BufRead,
    W: Write,
{
    let mut recombiner = DiffRecombiner::new(selection);
    let mut line = Vec::new();
    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line)? == 0 {
            break;
        }
        recombiner.push_line(&line, out)?;
    }
    out.flush()?;
    Ok(recombiner.emitted())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::split::split_diff;

    const DIFF: &str = r#"diff --git a/a.txt b/a.txt
index 1111111..2222222 100644
--- a/a.txt
+++ b/a.txt
@@ -1,3 +1,3 @@
 one
-two
+TWO
 three
@@ -20,2 +20,3 @@ section
 twenty
+twenty-bis
 twenty-one
diff --git a/b.txt b/b.txt
index 3333333..4444444 100644
--- a/b.txt
+++ b/b.txt
@@ -5,2 +5,2 @@
-five
+FIVE
"#;

    fn run(selection: &BTreeSet<HunkId>) -> (String, usize) {
        let mut out = Vec::new();
        let n = recombine(DIFF.as_bytes(), selection, &mut out).unwrap();
        (String::from_utf8(out).unwrap(), n)
    }

    #[test]
    fn selecting_everything_reproduces_the_diff() {
        let all: BTreeSet<HunkId> = split_diff(DIFF).unwrap().into_iter().map(|h| h.id).collect();
        let (out, n) = run(&all);
        assert_eq!(n, 3);
        assert_eq!(out, DIFF);
    }

    #[test]
    fn selecting_nothing_writes_nothing() {
        let (out, n) = run(&BTreeSet::new());
        assert_eq!(n, 0);
        assert!(out.is_empty());
    }

    #[test]
    fn single_hunk_gets_its_file_header_once() {
        let hunks = split_diff(DIFF).unwrap();
        let second = hunks[1].id.clone();
        let (out, n) = run(&BTreeSet::from([second]));
        assert_eq!(n, 1);
        assert_eq!(out.as_bytes(), hunks[1].to_patch());
    }

    #[test]
    fn unselected_files_are_left_out() {
        let hunks = split_diff(DIFF).unwrap();
        let (out, _) = run(&BTreeSet::from([hunks[2].id.clone()]));
        assert!(!out.contains("a.txt"));
        assert!(out.starts_with("diff --git a/b.txt b/b.txt\n"));
    }

    #[test]
    fn same_line_in_another_file_is_not_selected() {
        let hunks = split_diff(DIFF).unwrap();
        let other_file = HunkId::new(hunks[2].id.file.clone(), 1);
        let (_, n) = run(&BTreeSet::from([other_file]));
        assert_eq!(n, 0);
    }

    #[test]
    fn raw_bytes_survive_recombination() {
        let diff: &[u8] = b"note\r\ndiff --git a/w.bat b/w.bat\r\n--- a/w.bat\r\n+++ b/w.bat\r\n@@ -1 +1 @@\r\n-caf\xE9\r\n+cafe\r\n@@ -9 +9 @@\r\n-x\r\n+y";
        let hunks = split_diff(diff).unwrap();
        let all: BTreeSet<HunkId> = hunks.iter().map(|h| h.id.clone()).collect();

        let mut out = Vec::new();
        assert_eq!(recombine(diff, &all, &mut out).unwrap(), 2);
        assert_eq!(out, diff);

        let mut out = Vec::new();
        recombine(diff, &BTreeSet::from([hunks[1].id.clone()]), &mut out).unwrap();
        let mut expected = b"note\r\n".to_vec();
        expected.extend(hunks[1].to_patch());
        assert_eq!(out, expected);
    }

    #[test]
    fn hunkless_sections_are_dropped_even_when_all_is_selected() {
        let diff = "diff --git a/logo.png b/logo.png\nBinary files a/logo.png and b/logo.png differ\ndiff --git a/f b/f\n--- a/f\n+++ b/f\n@@ -1 +1 @@\n-a\n+b\n";
        let all: BTreeSet<HunkId> = split_diff(diff).unwrap().into_iter().map(|h| h.id).collect();
        let mut out = Vec::new();
        recombine(diff.as_bytes(), &all, &mut out).unwrap();
        assert_eq!(out, b"diff --git a/f b/f\n--- a/f\n+++ b/f\n@@ -1 +1 @@\n-a\n+b\n");
    }

    #[test]
    fn bad_separator_is_fatal() {
        let diff = "diff --git a/f b/f\n@@ nonsense @@\n";
        let mut out = Vec::new();
        let err = recombine(diff.as_bytes(), &BTreeSet::new(), &mut out).unwrap_err();
        assert!(matches!(err, SplitError::BadSeparator { line: 2, .. }));
    }
}
