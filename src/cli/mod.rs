use crate::HunkId;
use crate::plan::{DEFAULT_ARTIFACT, DEFAULT_BASELINE, DEFAULT_COMPARE_CMD};
use crate::select::DEFAULT_OUTLIER_THRESHOLD;
use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "hunk-bench",
    about = "Find which hunks of a diff are responsible for a benchmark regression"
)]
pub struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace). RUST_LOG wins when set.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Split the diff into per-hunk patches and print a build/benchmark shell plan.
    Plan(PlanArgs),
    /// Aggregate benchmark reports and print the patches of the flagged hunks.
    Select(SelectArgs),
    /// Split a diff into per-hunk patch files.
    Split(SplitArgs),
    /// Print only the given hunks of a diff.
    Recombine(RecombineArgs),
}

#[derive(Args, Debug)]
pub struct PlanArgs {
    /// Path filter passed to `git diff` (e.g. "lib/").
    pub path: String,

    /// Benchmark to run (e.g. "events").
    pub benchmark: String,

    /// Extra arguments for the comparison tool, as one shell fragment
    /// (e.g. '--runs 99 --filter ee').
    #[arg(allow_hyphen_values = true)]
    pub args: Option<String>,

    /// First side of the diff.
    #[arg(long, default_value = "HEAD")]
    pub base: String,

    /// Second side of the diff.
    #[arg(long, default_value = "upstream/master")]
    pub head: String,

    /// Read the diff from this file ("-" for stdin) instead of running git.
    #[arg(long)]
    pub diff_file: Option<PathBuf>,

    /// Directory for patches, reports and executables (default: a new temp dir).
    #[arg(long)]
    pub work_dir: Option<PathBuf>,

    /// Build command (default: "make -j<jobs>").
    #[arg(long)]
    pub build_cmd: Option<String>,

    /// Where the build leaves the executable.
    #[arg(long, default_value = DEFAULT_ARTIFACT)]
    pub artifact: PathBuf,

    /// Baseline executable to compare against.
    #[arg(long, default_value = DEFAULT_BASELINE)]
    pub baseline: PathBuf,

    /// Benchmark comparison command.
    #[arg(long, default_value = DEFAULT_COMPARE_CMD)]
    pub compare_cmd: String,

    /// Concurrent benchmarks per batch (default: available CPUs).
    #[arg(short, long)]
    pub jobs: Option<usize>,
}

#[derive(Args, Debug)]
pub struct SelectArgs {
    /// Comparison script fed each raw report on stdin (e.g. benchmark/compare.R).
    pub compare_script: PathBuf,

    /// Archive produced by the plan, or an unpacked run directory.
    pub archive: PathBuf,

    /// Minimum gap between the best hunk and the median to flag it.
    #[arg(default_value_t = DEFAULT_OUTLIER_THRESHOLD)]
    pub threshold: f64,

    /// Interpreter used to run the comparison script.
    #[arg(long, default_value = "Rscript")]
    pub rscript: String,

    /// Maximum concurrent processes (default: available CPUs).
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Print per-test statistics and decisions to stderr.
    #[arg(long)]
    pub explain: bool,
}

#[derive(Args, Debug)]
pub struct SplitArgs {
    /// Diff file to split ("-" for stdin).
    pub diff: PathBuf,

    /// Output directory for the patch files.
    #[arg(short, long)]
    pub out: PathBuf,
}

#[derive(Args, Debug)]
pub struct RecombineArgs {
    /// Diff file to filter ("-" for stdin).
    pub diff: PathBuf,

    /// Hunks to keep, as printed by `split` (e.g. 3f2a9c0d11e4b7a8-120).
    #[arg(required = true)]
    pub hunks: Vec<HunkId>,
}

/// Parse CLI arguments.
pub fn parse_args() -> Cli {
    Cli::parse()
}
