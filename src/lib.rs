pub mod archive;
pub mod cli;
pub mod gate;
pub mod git;
pub mod plan;
pub mod recombine;
pub mod report;
pub mod select;
pub mod split;

use sha2::{Digest, Sha256};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Stable identity of one file section of a diff.
///
/// Derived from the `diff ...` header line, so the same file header maps to the
/// same identity across separate invocations.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FileId(String);

impl FileId {
    const HEX_LEN: usize = 16;

    /// Hash a file header line into its identity.
    pub fn from_header(header_line: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(header_line.as_bytes());
        let digest = format!("{:x}", hasher.finalize());
        Self(digest[..Self::HEX_LEN].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of a hunk: its file plus the starting line in the new file.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HunkId {
    pub file: FileId,
    pub line: u32,
}

impl HunkId {
    pub fn new(file: FileId, line: u32) -> Self {
        Self { file, line }
    }

    /// Shell variable set when this hunk fails to build.
    pub fn skip_flag(&self) -> String {
        format!("SKIP_{}_{}", self.file, self.line)
    }

    /// Recover a hunk identity from a stored artifact name such as
    /// `./0123abcd-42.csv` or `dir/0123abcd-42.diff`.
    pub fn from_file_name(name: &str) -> Option<Self> {
        let base = name.rsplit('/').next()?;
        let stem = match base.rfind('.') {
            Some(pos) => &base[..pos],
            None => base,
        };
        stem.parse().ok()
    }
}

impl fmt::Display for HunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.file, self.line)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid hunk id: {0}")]
pub struct ParseHunkIdError(pub String);

impl FromStr for HunkId {
    type Err = ParseHunkIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseHunkIdError(s.to_string());
        let (file, line) = s.rsplit_once('-').ok_or_else(err)?;
        if file.is_empty() || !file.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(err());
        }
        let line = line.parse().map_err(|_| err())?;
        Ok(Self::new(FileId(file.to_ascii_lowercase()), line))
    }
}

/// A single hunk split out of a diff, together with its file header.
///
/// Lines are kept as the exact bytes read, terminator included, so `header`
/// followed by `body` is a standalone patch that matches the source byte for
/// byte (CRLF endings and non-UTF-8 content survive).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hunk {
    pub id: HunkId,
    /// Path of the changed file, as far as the header names it.
    pub path: Option<PathBuf>,
    pub header: Vec<Vec<u8>>,
    pub body: Vec<Vec<u8>>,
}

impl Hunk {
    /// Render the patch: header lines then body lines, unchanged.
    pub fn to_patch(&self) -> Vec<u8> {
        self.header.iter().chain(&self.body).flatten().copied().collect()
    }
}
