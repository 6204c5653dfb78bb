use crate::{FileId, Hunk, HunkId};
use std::borrow::Cow;
use std::fs;
use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// Errors raised while splitting a diff into hunks.
#[derive(Debug, Error)]
pub enum SplitError {
    #[error("line {line}: malformed hunk separator: {text}")]
    BadSeparator { line: usize, text: String },
    #[error("line {line}: hunk separator before any file header")]
    OrphanSeparator { line: usize },
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, SplitError>;

/// Streaming splitter turning diff lines into self-contained hunks.
///
/// Feed raw lines (terminator included) with [`push_line`](Self::push_line);
/// a hunk is handed back once the next file header or hunk separator closes
/// it. Call [`finish`](Self::finish) at end of stream for the last one.
#[derive(Debug, Default)]
pub struct HunkSplitter {
    file: Option<FileId>,
    path: Option<PathBuf>,
    header: Vec<Vec<u8>>,
    reading_header: bool,
    current: Option<Hunk>,
    line_no: usize,
}

impl HunkSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_line(&mut self, raw: &[u8]) -> Result<Option<Hunk>> {
        self.line_no += 1;
        let line = line_text(raw);

        if is_file_header(&line) {
            let done = self.current.take();
            self.file = Some(FileId::from_header(&line));
            self.path = path_from_git_header(&line);
            self.header.clear();
            self.header.push(raw.to_vec());
            self.reading_header = true;
            return Ok(done);
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

            let done = self.current.take();
            self.reading_header = false;
            self.current = Some(Hunk {
                id: HunkId::new(file, new_start),
                path: self.path.clone(),
                header: self.header.clone(),
                body: vec![raw.to_vec()],
            });
            return Ok(done);
        }

        if self.reading_header {
            if let Some(path) = path_from_marker(&line) {
                self.path = Some(path);
            }
            self.header.push(raw.to_vec());
        } else if let Some(hunk) = self.current.as_mut() {
            hunk.body.push(raw.to_vec());
        }

        Ok(None)
    }

    /// Close the hunk still open at end of stream, if any.
    pub fn finish(&mut self) -> Option<Hunk> {
        self.reading_header = false;
        self.current.take()
    }
}

/// Split a diff read from `reader`, handing each hunk to `sink` as soon as it is
/// complete. Returns the number of hunks produced.
pub fn split_lines<R, F>(mut reader: R, mut sink: F) -> Result<usize>
where
    R: BufRead,
    F: FnMut(Hunk) -> Result<()>,
{
    let mut splitter = HunkSplitter::new();
    let mut line = Vec::new();
    let mut count = 0;

    loop {
        line.clear();
        if BufRead::read_until(&mut reader, b'\n', &mut line)? == 0 {
            break;
        }
        if let Some(hunk) = splitter.push_line(&line)? {
            count += 1;
            sink(hunk)?;
        }
    }
    if let Some(hunk) = splitter.finish() {
        count += 1;
        sink(hunk)?;
    }

    Ok(count)
}

/// Async counterpart of [`split_lines`], used on a child process' stdout.
pub async fn split_stream<R, F>(mut reader: R, mut sink: F) -> Result<usize>
where
    R: AsyncBufRead + Unpin,
    F: FnMut(Hunk) -> Result<()>,
{
    let mut splitter = HunkSplitter::new();
    let mut line = Vec::new();
    let mut count = 0;

    loop {
        line.clear();
        if AsyncBufReadExt::read_until(&mut reader, b'\n', &mut line).await? == 0 {
            break;
        }
        if let Some(hunk) = splitter.push_line(&line)? {
            count += 1;
            sink(hunk)?;
        }
    }
    if let Some(hunk) = splitter.finish() {
        count += 1;
        sink(hunk)?;
    }

    Ok(count)
}

/// Split a whole diff held in memory.
pub fn split_diff(input: impl AsRef<[u8]>) -> Result<Vec<Hunk>> {
    let mut hunks = Vec::new();
    split_lines(input.as_ref(), |hunk| {
        hunks.push(hunk);
        Ok(())
    })?;
    Ok(hunks)
}

/// Text of a raw line for classification: terminator (`\n` or `\r\n`)
/// stripped, invalid UTF-8 replaced. The raw bytes are what gets written out.
pub(crate) fn line_text(raw: &[u8]) -> Cow<'_, str> {
    let line = raw.strip_suffix(b"\n").unwrap_or(raw);
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    String::from_utf8_lossy(line)
}

pub(crate) fn is_file_header(line: &str) -> bool {
    line.starts_with("diff")
}

pub(crate) fn is_separator(line: &str) -> bool {
    line.starts_with("@@")
}

/// Parse the new-file start line out of `@@ -a[,b] +c[,d] @@[context]`.
pub(crate) fn parse_separator(line: &str) -> Option<u32> {
    let rest = line.strip_prefix("@@ ")?;
    let ranges = &rest[..rest.find(" @@")?];
    let mut parts = ranges.split(' ');

    let old_part = parts.next()?.strip_prefix('-')?;
    parse_range(old_part)?;

    let new_part = parts.next()?.strip_prefix('+')?;
    let (new_start, _) = parse_range(new_part)?;

    if parts.next().is_some() {
        return None;
    }
    Some(new_start)
}

/// Parse a range like "start,count" or "start" (count defaults to 1).
fn parse_range(s: &str) -> Option<(u32, u32)> {
    match s.split_once(',') {
        Some((start, count)) => Some((start.parse().ok()?, count.parse().ok()?)),
        None => Some((s.parse().ok()?, 1)),
    }
}

/// Path from `diff --git a/x b/x`, taken from the `b/` side.
fn path_from_git_header(line: &str) -> Option<PathBuf> {
    let rest = line.strip_prefix("diff --git ")?;
    let (_, new) = rest.rsplit_once(" b/")?;
    Some(PathBuf::from(new))
}

/// Path from a `+++ b/x` marker, or from `--- a/x` for deleted files.
fn path_from_marker(line: &str) -> Option<PathBuf> {
    let (raw, prefix) = if let Some(p) = line.strip_prefix("+++ ") {
        (p, "b/")
    } else if let Some(p) = line.strip_prefix("--- ") {
        (p, "a/")
    } else {
        return None;
    };

    if raw == "/dev/null" {
        return None;
    }
    Some(PathBuf::from(raw.strip_prefix(prefix).unwrap_or(raw)))
}

/// Directory holding the per-hunk patches, reports and executables of a run.
#[derive(Debug, Clone)]
pub struct PatchStore {
    dir: PathBuf,
}

impl PatchStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn patch_path(&self, id: &HunkId) -> PathBuf {
        self.dir.join(format!("{id}.diff"))
    }

    pub fn report_path(&self, id: &HunkId) -> PathBuf {
        self.dir.join(format!("{id}.csv"))
    }

    pub fn exe_path(&self, id: &HunkId) -> PathBuf {
        self.dir.join(format!("{id}.exe"))
    }

    /// Persist a hunk as `<id>.diff`.
    pub fn write(&self, hunk: &Hunk) -> io::Result<PathBuf> {
        let path = self.patch_path(&hunk.id);
        fs::write(&path, hunk.to_patch())?;
        Ok(path)
    }

    /// Identities of every patch stored in the directory, sorted.
    pub fn list(&self) -> io::Result<Vec<HunkId>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let name = entry?.file_name();
            let name = name.to_string_lossy();
            if name.ends_with(".diff")
                && let Some(id) = HunkId::from_file_name(&name)
            {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }
}
