//! Gated process pipeline that turns stored benchmark output into a
//! [`ResultSet`].
//!
//! Each per-hunk report is piped through the comparison tool; the tool's
//! table is folded line by line. Every spawned process holds a gate slot for
//! its whole lifetime.

use crate::HunkId;
use crate::gate::{ConcurrencyGate, GateError};
use crate::report::ResultSet;
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::task::JoinSet;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("could not list {path}: {reason}")]
    ListFailed { path: PathBuf, reason: String },
    #[error("{program} exited with {status}")]
    Exit { program: String, status: String },
    #[error(transparent)]
    Gate(#[from] GateError),
    #[error("worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, ArchiveError>;

/// The benchmark comparison tool, e.g. `Rscript benchmark/compare.R`. It reads
/// raw benchmark output on stdin and prints a comparison table.
#[derive(Debug, Clone)]
pub struct CompareTool {
    pub program: String,
    pub args: Vec<String>,
}

impl CompareTool {
    pub fn new(program: impl Into<String>, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

/// Where the per-hunk reports live.
#[derive(Debug, Clone)]
pub enum ReportSource {
    /// Gzip tarball produced by the plan.
    Archive(PathBuf),
    /// A run directory that was not packaged.
    Directory(PathBuf),
}

impl ReportSource {
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        if path.is_dir() {
            Self::Directory(path)
        } else {
            Self::Archive(path)
        }
    }
}

/// One stored report and the hunk it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportMember {
    pub name: String,
    pub hunk: HunkId,
}

impl ReportMember {
    /// Name of the patch stored next to this report.
    pub fn patch_name(&self) -> String {
        match self.name.strip_suffix(".csv") {
            Some(stem) => format!("{stem}.diff"),
            None => format!("{}.diff", self.name),
        }
    }
}

fn spawn(command: &mut Command, program: &str) -> Result<tokio::process::Child> {
    command.spawn().map_err(|source| ArchiveError::Spawn {
        program: program.to_string(),
        source,
    })
}

fn members_from_listing(listing: &str) -> Vec<ReportMember> {
    let mut members: Vec<ReportMember> = listing
        .lines()
        .map(str::trim)
        .filter(|name| name.ends_with(".csv"))
        .filter_map(|name| {
            let hunk = HunkId::from_file_name(name)?;
            Some(ReportMember {
                name: name.to_string(),
                hunk,
            })
        })
        .collect();
    members.sort_by(|a, b| a.hunk.cmp(&b.hunk));
    members
}

/// Reports available in `source`, sorted by hunk.
pub async fn list_reports(gate: &ConcurrencyGate, source: &ReportSource) -> Result<Vec<ReportMember>> {
    match source {
        ReportSource::Directory(dir) => {
            let mut names = String::new();
            for entry in fs::read_dir(dir)? {
                names.push_str(&entry?.file_name().to_string_lossy());
                names.push('\n');
            }
            Ok(members_from_listing(&names))
        }
        ReportSource::Archive(path) => {
            let _slot = gate.acquire().await?;
            let output = spawn(
                Command::new("tar")
                    .arg("-tzf")
                    .arg(path)
                    .stdin(Stdio::null())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::piped()),
                "tar",
            )?
            .wait_with_output()
            .await?;

            if !output.status.success() {
                return Err(ArchiveError::ListFailed {
                    path: path.clone(),
                    reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
                });
            }
            Ok(members_from_listing(&String::from_utf8_lossy(&output.stdout)))
        }
    }
}

/// Extract one archive member into memory (`tar -xOzf <archive> <member>`).
async fn read_member(path: &Path, member: &ReportMember) -> Result<Vec<u8>> {
    let output = Command::new("tar")
        .arg("-xOzf")
        .arg(path)
        .arg(&member.name)
        .stdin(Stdio::null())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|source| ArchiveError::Spawn {
            program: "tar".to_string(),
            source,
        })?;

    if !output.status.success() {
        tracing::warn!(hunk = %member.hunk, status = %output.status, "tar extraction failed");
    }
    Ok(output.stdout)
}

/// Run one report through the comparison tool and fold its table.
///
/// From an archive with at least two slots, `tar` streams straight into the
/// tool and both run under one double slot. With a single slot the member is
/// extracted first and fed to the tool afterwards, so only one process runs
/// at a time. A non-zero exit of either process is logged and whatever rows
/// were printed still count.
pub async fn compare_report(
    gate: &ConcurrencyGate,
    source: &ReportSource,
    tool: &CompareTool,
    member: &ReportMember,
) -> Result<ResultSet> {
    let mut feed = None;
    let (_slot, input, mut extractor) = match source {
        ReportSource::Directory(dir) => {
            let slot = gate.acquire().await?;
            let file = fs::File::open(dir.join(&member.name))?;
            (slot, Stdio::from(file), None)
        }
        ReportSource::Archive(path) if gate.capacity() < 2 => {
            let data = {
                let _slot = gate.acquire().await?;
                read_member(path, member).await?
            };
            feed = Some(data);
            (gate.acquire().await?, Stdio::piped(), None)
        }
        ReportSource::Archive(path) => {
            let slot = gate.acquire_many(2).await?;
            let mut tar = spawn(
                Command::new("tar")
                    .arg("-xOzf")
                    .arg(path)
                    .arg(&member.name)
                    .stdin(Stdio::null())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::inherit())
                    .kill_on_drop(true),
                "tar",
            )?;
            let stdout = tar
                .stdout
                .take()
                .ok_or_else(|| io::Error::other("tar stdout not captured"))?;
            let input: Stdio = stdout.try_into()?;
            (slot, input, Some(tar))
        }
    };

    tracing::debug!(hunk = %member.hunk, report = %member.name, "comparing");
    let mut compare = spawn(
        Command::new(&tool.program)
            .args(&tool.args)
            .stdin(input)
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit()),
        &tool.program,
    )?;

    let stdout = compare
        .stdout
        .take()
        .ok_or_else(|| io::Error::other("comparison stdout not captured"))?;
    let stdin = compare.stdin.take();

    let write_input = async move {
        if let (Some(mut stdin), Some(data)) = (stdin, feed) {
            // The tool may stop reading early; its exit status tells the rest.
            if let Err(err) = stdin.write_all(&data).await {
                tracing::debug!(%err, "comparison closed its input");
            }
        }
    };
    let fold = async {
        let mut results = ResultSet::new();
        let mut rows = 0usize;
        let mut lines = BufReader::new(stdout).lines();
        while let Some(line) = lines.next_line().await? {
            if results.ingest_line(&member.hunk, &line) {
                rows += 1;
            }
        }
        Ok::<_, io::Error>((results, rows))
    };
    let ((), folded) = tokio::join!(write_input, fold);
    let (results, rows) = folded?;

    let status = compare.wait().await?;
    if !status.success() {
        tracing::warn!(hunk = %member.hunk, %status, program = %tool.program, "comparison failed");
    }
    if let Some(tar) = extractor.as_mut() {
        let status = tar.wait().await?;
        if !status.success() {
            tracing::warn!(hunk = %member.hunk, %status, "tar extraction failed");
        }
    }

    tracing::debug!(hunk = %member.hunk, rows, "report folded");
    Ok(results)
}

/// Compare every listed report, at most `gate.capacity()` processes at a
/// time, and merge the results.
pub async fn aggregate(
    gate: &ConcurrencyGate,
    source: &ReportSource,
    tool: &CompareTool,
    members: &[ReportMember],
) -> Result<ResultSet> {
    tracing::info!(reports = members.len(), capacity = gate.capacity(), "aggregating reports");

    let mut tasks = JoinSet::new();
    for member in members.iter().cloned() {
        let gate = gate.clone();
        let source = source.clone();
        let tool = tool.clone();
        tasks.spawn(async move { compare_report(&gate, &source, &tool, &member).await });
    }

    let mut results = ResultSet::new();
    while let Some(joined) = tasks.join_next().await {
        results.merge(joined??);
    }
    Ok(results)
}

/// Concatenated patches of the selected hunks.
pub async fn extract_patches(
    gate: &ConcurrencyGate,
    source: &ReportSource,
    members: &[ReportMember],
    selection: &BTreeSet<HunkId>,
) -> Result<Vec<u8>> {
    let names: Vec<String> = members
        .iter()
        .filter(|m| selection.contains(&m.hunk))
        .map(ReportMember::patch_name)
        .collect();
    if names.is_empty() {
        return Ok(Vec::new());
    }

    match source {
        ReportSource::Directory(dir) => read_patches(dir, &names),
        ReportSource::Archive(path) => {
            let _slot = gate.acquire().await?;
            let output = spawn(
                Command::new("tar")
                    .arg("-xOzf")
                    .arg(path)
                    .args(&names)
                    .stdin(Stdio::null())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::inherit()),
                "tar",
            )?
            .wait_with_output()
            .await?;

            if !output.status.success() {
                return Err(ArchiveError::Exit {
                    program: "tar".to_string(),
                    status: output.status.to_string(),
                });
            }
            Ok(output.stdout)
        }
    }
}

fn read_patches(dir: &Path, names: &[String]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for name in names {
        out.extend(fs::read(dir.join(name))?);
    }
    Ok(out)
}
