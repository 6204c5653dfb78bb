use hunk_bench::plan::{PlanConfig, shell_quote, write_plan};
use hunk_bench::split::{PatchStore, split_diff};
use std::fs;
use std::path::Path;
use std::process::Command;

const DIFF: &str = r#"diff --git a/src/a.c b/src/a.c
--- a/src/a.c
+++ b/src/a.c
@@ -1,2 +1,2 @@
-int a = 1;
+int a = 2;
@@ -30,2 +30,2 @@
-int b = 1;
+int b = BROKEN;
diff --git a/src/c.c b/src/c.c
--- a/src/c.c
+++ b/src/c.c
@@ -7,2 +7,2 @@
-int c = 1;
+int c = 2;
"#;

fn tar_available() -> bool {
    Command::new("tar").arg("--version").output().is_ok()
}

/// Plan wired to stub tools: `apply` fails on patches containing BROKEN, the
/// build touches an artifact, the comparison logs which executable it ran.
fn stub_config(root: &Path, store: PatchStore) -> PlanConfig {
    fs::write(root.join("apply.sh"), "! grep -q BROKEN \"$1\"\n").unwrap();
    fs::write(
        root.join("compare.sh"),
        format!(
            "echo \"$2\" >> {log}\necho \"bench  ***  -1.00 %  ±1.00% ±2.00% ±3.00%\"\n",
            log = shell_quote(&root.join("ran.log"))
        ),
    )
    .unwrap();

    let mut config = PlanConfig::new(store, "bench", 2);
    config.reset_command = "true".to_string();
    config.apply_command = format!("sh {}", shell_quote(&root.join("apply.sh")));
    config.build_command = format!("touch {}", shell_quote(&root.join("artifact")));
    config.artifact = root.join("artifact");
    config.baseline = root.join("baseline");
    config.compare_command = format!("sh {}", shell_quote(&root.join("compare.sh")));
    config.archive = root.join("bench.tar.gz");
    config
}

#[test]
fn failed_build_skips_only_its_own_benchmark() {
    let root = tempfile::tempdir().unwrap();
    let run_dir = root.path().join("run");
    fs::create_dir(&run_dir).unwrap();
    let store = PatchStore::new(&run_dir);

    let hunks = split_diff(DIFF).unwrap();
    for hunk in &hunks {
        store.write(hunk).unwrap();
    }
    let ids: Vec<_> = hunks.iter().map(|h| h.id.clone()).collect();
    let broken = ids[1].clone();

    let config = stub_config(root.path(), store.clone());
    let mut plan = Vec::new();
    write_plan(&mut plan, &config, &ids).unwrap();
    let plan_path = root.path().join("plan.sh");
    fs::write(&plan_path, &plan).unwrap();

    let output = Command::new("sh")
        .arg(&plan_path)
        .current_dir(root.path())
        .output()
        .unwrap();

    let ran = fs::read_to_string(root.path().join("ran.log")).unwrap();
    let ran: Vec<&str> = ran.lines().collect();
    assert_eq!(ran.len(), 2, "plan output: {}", String::from_utf8_lossy(&output.stderr));
    assert!(ran.iter().any(|l| l.contains(&ids[0].to_string())));
    assert!(ran.iter().any(|l| l.contains(&ids[2].to_string())));
    assert!(!ran.iter().any(|l| l.contains(&broken.to_string())));

    // The run directory is packaged and removed at the end.
    assert!(!run_dir.exists());

    if tar_available() {
        assert!(output.status.success());
        let listing = Command::new("tar")
            .arg("-tzf")
            .arg(&config.archive)
            .output()
            .unwrap();
        let listing = String::from_utf8_lossy(&listing.stdout);
        assert!(listing.contains(&format!("{}.csv", ids[0])));
        assert!(listing.contains(&format!("{}.csv", ids[2])));
        assert!(!listing.contains(&format!("{broken}.csv")));
        assert!(listing.contains(&format!("{broken}.diff")));
        assert!(!listing.contains(".exe"));
    }
}

#[test]
fn failed_comparison_leaves_no_report() {
    let root = tempfile::tempdir().unwrap();
    let run_dir = root.path().join("run");
    fs::create_dir(&run_dir).unwrap();
    let store = PatchStore::new(&run_dir);

    let hunks = split_diff(DIFF).unwrap();
    let first = hunks[0].clone();
    store.write(&first).unwrap();

    let mut config = stub_config(root.path(), store.clone());
    config.compare_command = "false".to_string();

    let lines: Vec<String> = hunk_bench::plan::render_plan(&config, &[first.id.clone()])
        .into_iter()
        .filter(|l| !l.starts_with("tar ") && !l.starts_with("rm -r "))
        .collect();
    let script = lines.join("\n") + "\n";

    let status = Command::new("sh")
        .arg("-c")
        .arg(&script)
        .current_dir(root.path())
        .status()
        .unwrap();
    assert!(status.success());

    assert!(store.patch_path(&first.id).exists());
    assert!(!store.report_path(&first.id).exists());
    assert!(!store.exe_path(&first.id).exists());
}
