//! Shell plan generation.
//!
//! Nothing here runs a process. The plan is text for `sh`: one build line per
//! hunk, run sequentially, then one backgrounded benchmark group per hunk with
//! a `wait` after every `batch_size` groups.

use crate::HunkId;
use crate::split::PatchStore;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

pub const DEFAULT_RESET_CMD: &str = "git reset --hard";
pub const DEFAULT_APPLY_CMD: &str = "git apply";
pub const DEFAULT_ARTIFACT: &str = "out/Release/node";
pub const DEFAULT_BASELINE: &str = "./node_master";
pub const DEFAULT_COMPARE_CMD: &str = "node benchmark/compare.js";

/// Everything the emitted plan needs to know about the build and benchmark tools.
#[derive(Debug, Clone)]
pub struct PlanConfig {
    pub store: PatchStore,
    pub benchmark: String,
    /// Extra arguments for the comparison tool, spliced verbatim.
    pub extra_args: Option<String>,
    pub reset_command: String,
    pub apply_command: String,
    pub build_command: String,
    /// Where the build leaves the executable.
    pub artifact: PathBuf,
    /// Executable every hunk is compared against.
    pub baseline: PathBuf,
    pub compare_command: String,
    /// Benchmark groups started before each `wait`.
    pub batch_size: usize,
    pub archive: PathBuf,
}

impl PlanConfig {
    pub fn new(store: PatchStore, benchmark: impl Into<String>, jobs: usize) -> Self {
        let benchmark = benchmark.into();
        let jobs = jobs.max(1);
        Self {
            store,
            archive: PathBuf::from(format!("{benchmark}.tar.gz")),
            benchmark,
            extra_args: None,
            reset_command: DEFAULT_RESET_CMD.to_string(),
            apply_command: DEFAULT_APPLY_CMD.to_string(),
            build_command: format!("make -j{jobs}"),
            artifact: PathBuf::from(DEFAULT_ARTIFACT),
            baseline: PathBuf::from(DEFAULT_BASELINE),
            compare_command: DEFAULT_COMPARE_CMD.to_string(),
            batch_size: jobs,
        }
    }
}

/// Single-quote a path for `sh`.
pub fn shell_quote(path: &Path) -> String {
    let raw = path.to_string_lossy();
    format!("'{}'", raw.replace('\'', r"'\''"))
}

/// Reset, apply, build and move the artifact aside. Any failure sets the
/// hunk's skip flag instead of stopping the plan.
pub fn build_step(config: &PlanConfig, id: &HunkId) -> String {
    let store = &config.store;
    format!(
        "{reset} && {apply} {diff} && {build} && mv {artifact} {exe} || {flag}=1",
        reset = config.reset_command,
        apply = config.apply_command,
        diff = shell_quote(&store.patch_path(id)),
        build = config.build_command,
        artifact = shell_quote(&config.artifact),
        exe = shell_quote(&store.exe_path(id)),
        flag = id.skip_flag(),
    )
}

/// Compare the hunk's executable against the baseline unless its build
/// failed, drop the report if the comparison failed, then always remove the
/// executable. Runs in the background.
pub fn benchmark_step(config: &PlanConfig, id: &HunkId) -> String {
    let store = &config.store;
    let csv = shell_quote(&store.report_path(id));
    let exe = shell_quote(&store.exe_path(id));
    let args = match config.extra_args.as_deref() {
        Some(a) if !a.trim().is_empty() => format!(" {a}"),
        _ => String::new(),
    };
    format!(
        "( if [ -z \"${{{flag}:-}}\" ]; then {compare} --new {exe} --old {baseline}{args} -- {bench} > {csv} || rm -f {csv}; fi; rm -f {exe} ) &",
        flag = id.skip_flag(),
        compare = config.compare_command,
        baseline = shell_quote(&config.baseline),
        bench = shell_quote(Path::new(&config.benchmark)),
    )
}

/// Render the whole plan for the given hunks, in order.
pub fn render_plan(config: &PlanConfig, ids: &[HunkId]) -> Vec<String> {
    let batch = config.batch_size.max(1);
    let mut lines = vec![
        "#!/bin/sh".to_string(),
        format!("# {} hunks, {} benchmark(s) per batch", ids.len(), batch),
    ];

    lines.extend(ids.iter().map(|id| build_step(config, id)));

    for (i, id) in ids.iter().enumerate() {
        lines.push(benchmark_step(config, id));
        if i % batch == batch - 1 {
            lines.push("wait".to_string());
        }
    }
    lines.push("wait".to_string());

    lines.push(format!(
        "tar -czf {} -C {} .",
        shell_quote(&config.archive),
        shell_quote(config.store.dir())
    ));
    lines.push(format!("rm -r {}", shell_quote(config.store.dir())));
    lines
}

pub fn write_plan<W: Write>(out: &mut W, config: &PlanConfig, ids: &[HunkId]) -> io::Result<()> {
    for line in render_plan(config, ids) {
        writeln!(out, "{line}")?;
    }
    Ok(())
}
