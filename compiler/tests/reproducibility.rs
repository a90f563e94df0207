// CLI tests: exit codes, emitted artifacts and byte-identical reruns.
//
// Runs the `stencilopt` binary against the inputs in demos/.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

fn stencilopt_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_stencilopt"))
}

fn demo(name: &str) -> String {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .unwrap()
        .join("demos")
        .join(name)
        .to_str()
        .unwrap()
        .to_string()
}

fn run(args: &[&str]) -> Output {
    Command::new(stencilopt_binary())
        .args(args)
        .env_remove("STENCILOPT_LOG")
        .output()
        .expect("failed to run stencilopt")
}

fn run_ok(args: &[&str]) -> String {
    let output = run(args);
    assert!(
        output.status.success(),
        "stencilopt failed with args {:?}\nstderr: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8(output.stdout).expect("non-UTF8 output")
}

#[test]
fn same_input_identical_iir() {
    let input = demo("hori_diff.json");
    let first = run_ok(&[&input]);
    let second = run_ok(&[&input]);
    assert_eq!(first, second);
    assert!(first.contains("\"u_1\""));
}

#[test]
fn emitted_iir_is_a_fixed_point() {
    let dir = std::env::temp_dir().join(format!("stencilopt-fixpoint-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let once = dir.join("once.json");
    run_ok(&[&demo("hori_diff.json"), "-o", once.to_str().unwrap()]);

    // Re-optimizing the output renames nothing and keeps the layout.
    let report = run_ok(&[once.to_str().unwrap(), "--emit", "report"]);
    let report: serde_json::Value = serde_json::from_str(&report).unwrap();
    assert_eq!(report["renames"].as_array().map(Vec::len), Some(0));
    assert_eq!(report["stencils"][0]["multi_stages"][0], "parallel [s0 s1]");
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn report_lists_renames_and_passes() {
    let report = run_ok(&[&demo("swap.json"), "--emit", "report"]);
    let report: serde_json::Value = serde_json::from_str(&report).unwrap();
    assert_eq!(report["instantiation"], "swap");
    assert_eq!(report["renames"][0]["old_name"], "b");
    assert_eq!(report["renames"][0]["new_name"], "b_1");
    assert_eq!(
        report["passes"],
        serde_json::json!(["field-versioning", "set-stage-graph", "reorder-stages"])
    );
}

#[test]
fn build_info_is_stable_and_tracks_options() {
    let input = demo("disjoint.json");
    let a = run_ok(&[&input, "--emit", "build-info"]);
    let b = run_ok(&[&input, "--emit", "build-info"]);
    assert_eq!(a, b);
    let wide = run_ok(&[&input, "--emit", "build-info", "--max-halo", "7"]);

    let a: serde_json::Value = serde_json::from_str(&a).unwrap();
    let wide: serde_json::Value = serde_json::from_str(&wide).unwrap();
    assert_eq!(a["source_hash"], wide["source_hash"]);
    assert_ne!(a["options_fingerprint"], wide["options_fingerprint"]);
    assert_eq!(a["compiler_version"], env!("CARGO_PKG_VERSION"));
}

#[test]
fn until_skips_reordering() {
    let text = run_ok(&[&demo("disjoint.json"), "--emit", "text", "--until", "set-stage-graph"]);
    assert_eq!(text.matches("multistage").count(), 5);
    let text = run_ok(&[&demo("disjoint.json"), "--emit", "text"]);
    assert_eq!(text.matches("multistage").count(), 1);
}

#[test]
fn unresolvable_race_exits_with_one() {
    let output = run(&[&demo("conditional_race.json")]);
    assert_eq!(output.status.code(), Some(1));
    assert!(output.stdout.is_empty());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("error[E0100]"), "stderr: {stderr}");
    assert!(stderr.contains("stencil-call 'masked_shift'"), "stderr: {stderr}");
    assert!(stderr.contains("unresolvable race-condition in stencil instantiation 'conditional_race'"));
}

#[test]
fn race_graph_is_dumped_on_request() {
    let dir = std::env::temp_dir().join(format!("stencilopt-rc-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let output = run(&[
        &demo("conditional_race.json"),
        "--dump-rc-graph",
        "--dump-dir",
        dir.to_str().unwrap(),
    ]);
    assert_eq!(output.status.code(), Some(1));
    let dot = std::fs::read_to_string(dir.join("rc_conditional_race.dot")).unwrap();
    assert!(dot.starts_with("digraph rc_conditional_race {"));
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn halo_budget_is_configurable() {
    let input = demo("wide_halo.json");
    let output = run(&[&input]);
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("exceeds maximum number of allowed halo lines (3)"), "stderr: {stderr}");

    run_ok(&[&input, "--max-halo", "5"]);
}

#[test]
fn unreadable_input_exits_with_two() {
    let output = run(&["/nonexistent/stencil.json"]);
    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("cannot read"));
}

#[test]
fn unregistered_access_is_rejected_before_optimizing() {
    let dir = std::env::temp_dir().join(format!("stencilopt-unreg-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let source = std::fs::read_to_string(demo("swap.json"))
        .unwrap()
        .replace(r#""rhs": [0]"#, r#""rhs": [4]"#)
        .replace(r#""reads": [{"id": 0}]"#, r#""reads": [{"id": 4}]"#);
    let input = dir.join("unregistered.json");
    std::fs::write(&input, source).unwrap();

    let output = run(&[input.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("line 9: access #4 is not registered in the metadata"),
        "stderr: {stderr}"
    );
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn unknown_pass_is_rejected_by_cli() {
    let output = run(&[&demo("swap.json"), "--until", "inline"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("unknown pass 'inline'"));
}
