use hunk_bench::archive::{self, CompareTool, ReportSource};
use hunk_bench::gate::ConcurrencyGate;
use hunk_bench::split::{PatchStore, split_diff};
use std::fs;
use std::path::Path;
use std::process::Command;
use std::sync::Mutex;
use std::time::Duration;

const DIFF: &str = r#"diff --git a/lib/url.js b/lib/url.js
--- a/lib/url.js
+++ b/lib/url.js
@@ -10,2 +10,2 @@
-const a = 1;
+const a = 2;
@@ -70,2 +70,2 @@
-const b = 1;
+const b = 2;
"#;

const ROW: &str = "url/parse.js n=1  ***  -4.00 %  ±1.00% ±2.00% ±3.00%";

// Tests here inspect the `tar` children of this process, so they run one at a
// time.
static CHILDREN: Mutex<()> = Mutex::new(());

fn tools_available() -> bool {
    Command::new("tar").arg("--version").output().is_ok()
        && Command::new("pgrep").arg("-V").output().is_ok()
}

fn pack(run: &Path, archive: &Path) {
    let store = PatchStore::new(run);
    for hunk in split_diff(DIFF).unwrap() {
        store.write(&hunk).unwrap();
        fs::write(store.report_path(&hunk.id), format!("{ROW}\n")).unwrap();
    }
    let status = Command::new("tar")
        .arg("-czf")
        .arg(archive)
        .arg("-C")
        .arg(run)
        .arg(".")
        .status()
        .unwrap();
    assert!(status.success());
}

/// `tar` children of this process that have not exited yet.
fn live_tar_children() -> usize {
    let output = Command::new("pgrep")
        .args(["-x", "-P", &std::process::id().to_string(), "tar"])
        .output()
        .unwrap();
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .filter(|pid| {
            fs::read_to_string(format!("/proc/{pid}/stat"))
                .map(|stat| !stat.rsplit(')').next().unwrap_or("").trim_start().starts_with('Z'))
                .unwrap_or(false)
        })
        .count()
}

#[tokio::test]
async fn single_slot_runs_extraction_and_comparison_one_after_the_other() {
    if !tools_available() {
        return;
    }
    let _serial = CHILDREN.lock().unwrap_or_else(|e| e.into_inner());
    let run = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let archive_path = out.path().join("url.tar.gz");
    pack(run.path(), &archive_path);

    let script = out.path().join("compare.sh");
    fs::write(
        &script,
        "n=$(pgrep -c -x -P \"$PPID\" tar)\n\
         echo \"url/tar_alive.js n=$n  ***  -1.00 %  ±1.00% ±2.00% ±3.00%\"\n\
         cat\n",
    )
    .unwrap();
    let tool = CompareTool::new("sh", [script.to_string_lossy()]);

    let gate = ConcurrencyGate::new(1);
    let source = ReportSource::Archive(archive_path);
    let members = archive::list_reports(&gate, &source).await.unwrap();
    assert_eq!(members.len(), 2);

    let results = archive::aggregate(&gate, &source, &tool, &members).await.unwrap();
    assert_eq!(results.get("url/parse.js n=1").unwrap().len(), 2);
    assert_eq!(results.get("url/tar_alive.js n=0").unwrap().len(), 2);
    assert!(results.get("url/tar_alive.js n=1").is_none());
    assert_eq!(gate.peak(), 1);
    assert_eq!(gate.outstanding(), 0);
}

#[tokio::test]
async fn failed_comparison_spawn_stops_the_extractor() {
    if !tools_available() || !Path::new("/proc/self/stat").exists() {
        return;
    }
    let _serial = CHILDREN.lock().unwrap_or_else(|e| e.into_inner());
    let run = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let archive_path = out.path().join("url.tar.gz");
    pack(run.path(), &archive_path);

    let gate = ConcurrencyGate::new(2);
    let source = ReportSource::Archive(archive_path);
    let members = archive::list_reports(&gate, &source).await.unwrap();
    let tool = CompareTool::new("hunk-bench-no-such-tool", Vec::<String>::new());

    let err = archive::compare_report(&gate, &source, &tool, &members[0])
        .await
        .unwrap_err();
    assert!(matches!(err, archive::ArchiveError::Spawn { .. }));
    assert_eq!(gate.outstanding(), 0);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(live_tar_children(), 0);
}
