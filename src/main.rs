use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Write};
use std::path::Path;
use tracing_subscriber::EnvFilter;

use hunk_bench::Hunk;
use hunk_bench::archive::{self, CompareTool, ReportSource};
use hunk_bench::cli::{self, Commands, PlanArgs, RecombineArgs, SelectArgs, SplitArgs};
use hunk_bench::gate::ConcurrencyGate;
use hunk_bench::git::{self, DiffRange};
use hunk_bench::plan::{PlanConfig, write_plan};
use hunk_bench::recombine::recombine;
use hunk_bench::select::{RegressionSelector, summarize};
use hunk_bench::split::{PatchStore, split_lines};

/// Log to stderr; `-v` flags pick the level unless RUST_LOG is set.
fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = cli::parse_args();
    init_tracing(args.verbose);

    match args.command {
        Commands::Plan(plan_args) => handle_plan(plan_args).await?,
        Commands::Select(select_args) => handle_select(select_args).await?,
        Commands::Split(split_args) => handle_split(split_args)?,
        Commands::Recombine(recombine_args) => handle_recombine(recombine_args)?,
    }

    Ok(())
}

fn gate_for(jobs: Option<usize>) -> ConcurrencyGate {
    match jobs {
        Some(n) => ConcurrencyGate::new(n),
        None => ConcurrencyGate::from_available_parallelism(),
    }
}

/// Open a diff file, or stdin for "-".
fn open_diff(path: &Path) -> Result<Box<dyn BufRead>> {
    if path == Path::new("-") {
        return Ok(Box::new(io::stdin().lock()));
    }
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    Ok(Box::new(BufReader::new(file)))
}

/// Handle plan command - split the diff into the run directory, print the shell plan.
async fn handle_plan(args: PlanArgs) -> Result<()> {
    let gate = gate_for(args.jobs);

    let dir = match args.work_dir {
        Some(dir) => {
            fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
            dir
        }
        None => tempfile::Builder::new()
            .prefix("hunk-bench-")
            .tempdir()
            .context("Failed to create run directory")?
            .keep(),
    };
    let store = PatchStore::new(&dir);

    let mut ids = Vec::new();
    let sink = |hunk: Hunk| -> hunk_bench::split::Result<()> {
        let path = store.write(&hunk)?;
        tracing::debug!(hunk = %hunk.id, file = ?hunk.path, patch = %path.display(), "patch written");
        ids.push(hunk.id);
        Ok(())
    };

    match &args.diff_file {
        Some(diff_file) => {
            split_lines(open_diff(diff_file)?, sink).context("Failed to split diff")?;
        }
        None => {
            let range = DiffRange {
                base: args.base.clone(),
                head: args.head.clone(),
                path: Some(args.path.clone()),
            };
            git::split_diff_range(&gate, &range, sink)
                .await
                .context("Failed to split git diff")?;
        }
    }
    tracing::info!(hunks = ids.len(), dir = %dir.display(), "diff split");

    let mut config = PlanConfig::new(store, args.benchmark, gate.capacity());
    config.extra_args = args.args;
    if let Some(build) = args.build_cmd {
        config.build_command = build;
    }
    config.artifact = args.artifact;
    config.baseline = args.baseline;
    config.compare_command = args.compare_cmd;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    write_plan(&mut out, &config, &ids).context("Failed to write plan")?;
    out.flush()?;
    Ok(())
}

/// Handle select command - aggregate reports, pick hunks, print their patches.
async fn handle_select(args: SelectArgs) -> Result<()> {
    let gate = gate_for(args.jobs);
    let source = ReportSource::from_path(&args.archive);
    let tool = CompareTool::new(args.rscript, [args.compare_script.to_string_lossy()]);

    let members = archive::list_reports(&gate, &source)
        .await
        .with_context(|| format!("Failed to list reports in {}", args.archive.display()))?;
    let results = archive::aggregate(&gate, &source, &tool, &members)
        .await
        .context("Failed to aggregate benchmark reports")?;

    let selector = RegressionSelector::new(args.threshold);
    if args.explain {
        for (test, set) in results.tests() {
            if let Some(s) = summarize(set) {
                eprintln!(
                    "{test}: {} results ({} confident), mean {:.2}, median {:.2}, best {:.2} ({}), worst {:.2} ({})",
                    s.count, s.confident, s.mean, s.median, s.best.1, s.best.0, s.worst.1, s.worst.0
                );
            }
        }
        for decision in selector.decide(&results) {
            eprintln!("{decision}");
        }
    }

    let selection: BTreeSet<_> = selector.select(&results);
    tracing::info!(
        tests = results.tests().count(),
        selected = selection.len(),
        "selection done"
    );

    let patches = archive::extract_patches(&gate, &source, &members, &selection)
        .await
        .context("Failed to extract selected patches")?;
    let stdout = io::stdout();
    let mut out = stdout.lock();
    out.write_all(&patches)?;
    out.flush()?;
    Ok(())
}

/// Handle split command - write one patch per hunk and list them.
fn handle_split(args: SplitArgs) -> Result<()> {
    fs::create_dir_all(&args.out)
        .with_context(|| format!("Failed to create {}", args.out.display()))?;
    let store = PatchStore::new(&args.out);

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let count = split_lines(open_diff(&args.diff)?, |hunk| {
        let path = store.write(&hunk)?;
        writeln!(out, "{}\t{}", hunk.id, path.display())?;
        Ok(())
    })
    .context("Failed to split diff")?;

    tracing::info!(hunks = count, dir = %args.out.display(), "diff split");
    Ok(())
}

/// Handle recombine command - keep only the named hunks.
fn handle_recombine(args: RecombineArgs) -> Result<()> {
    let selection: BTreeSet<_> = args.hunks.into_iter().collect();
    let stdout = io::stdout();
    let mut out = stdout.lock();
    let emitted = recombine(open_diff(&args.diff)?, &selection, &mut out)
        .context("Failed to recombine diff")?;

    if emitted < selection.len() {
        tracing::warn!(
            requested = selection.len(),
            found = emitted,
            "some requested hunks are not in the diff"
        );
    }
    Ok(())
}
