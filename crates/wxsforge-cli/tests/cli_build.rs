use std::path::Path;
use std::process::{Command, Output};

use serde_json::{json, Value};
use wxsforge_contracts::{WIX_NAMESPACE, WXSFORGE_REPORT_SCHEMA_VERSION};

fn wxsforge(args: &[&str], cwd: &Path) -> Output {
    Command::new(env!("CARGO_BIN_EXE_wxsforge"))
        .args(args)
        .current_dir(cwd)
        .output()
        .expect("run wxsforge")
}

fn assert_success(out: &Output) {
    assert!(
        out.status.success(),
        "status={}\nstderr={}",
        out.status,
        String::from_utf8_lossy(&out.stderr)
    );
}

fn write_document(dir: &Path, root: Value) {
    let doc = json!({ "schema_version": "wxsforge.document@0.1.0", "root": root });
    std::fs::write(dir.join("installer.json"), doc.to_string()).expect("write document");
}

fn sample_root() -> Value {
    json!({
        "kind": "Product",
        "attributes": { "Name": "Acme", "Version": "1.0.0" },
        "children": [{
            "kind": "Directory",
            "attributes": { "Id": "TARGETDIR", "Name": "SourceDir" },
            "children": [{
                "kind": "Directory",
                "attributes": { "Name": "%ProgramFiles%" },
                "children": [{
                    "kind": "Directory",
                    "install_dir": true,
                    "attributes": { "Name": "Acme" },
                    "children": [{
                        "kind": "Component",
                        "children": [{ "kind": "File", "attributes": { "Source": "app.exe" } }],
                    }],
                }],
            }],
        }],
    })
}

#[test]
fn build_writes_wxs_report_and_json() {
    let dir = tempfile::tempdir().unwrap();
    write_document(dir.path(), sample_root());

    let out = wxsforge(
        &[
            "build",
            "--input",
            "installer.json",
            "--out",
            "out/installer.wxs",
            "--report-json",
            "out/report.json",
            "--emit-json",
            "out/rewritten.json",
        ],
        dir.path(),
    );
    assert_success(&out);

    let wxs = std::fs::read_to_string(dir.path().join("out/installer.wxs")).unwrap();
    assert!(wxs.starts_with("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n"));
    assert!(wxs.contains(&format!("<Wix xmlns=\"{WIX_NAMESPACE}\">")));
    assert!(wxs.contains("<Directory Id=\"INSTALLDIR\" Name=\"Acme\">"));
    assert!(wxs.contains("<ComponentRef Id=\"Component.app.exe\" />"));

    let report: Value =
        serde_json::from_slice(&std::fs::read(dir.path().join("out/report.json")).unwrap()).unwrap();
    assert_eq!(report["schema_version"], WXSFORGE_REPORT_SCHEMA_VERSION);
    assert_eq!(report["ok"], true);
    assert_eq!(report["meta"]["wxs_sha256"].as_str().map(str::len), Some(64));

    let rewritten: Value =
        serde_json::from_slice(&std::fs::read(dir.path().join("out/rewritten.json")).unwrap()).unwrap();
    assert_eq!(rewritten["root"]["kind"], "Product");
}

#[test]
fn check_mode_detects_stale_output() {
    let dir = tempfile::tempdir().unwrap();
    write_document(dir.path(), sample_root());

    assert_success(&wxsforge(&["build", "--input", "installer.json", "--out", "a.wxs"], dir.path()));
    assert_success(&wxsforge(
        &["build", "--input", "installer.json", "--out", "a.wxs", "--check"],
        dir.path(),
    ));

    std::fs::write(dir.path().join("a.wxs"), "stale").unwrap();
    let out = wxsforge(
        &["build", "--input", "installer.json", "--out", "a.wxs", "--check"],
        dir.path(),
    );
    assert_eq!(out.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&out.stderr).contains("generated output differs"));
}

#[test]
fn stdout_output_matches_file_output() {
    let dir = tempfile::tempdir().unwrap();
    write_document(dir.path(), sample_root());

    let printed = wxsforge(&["build", "--input", "installer.json"], dir.path());
    assert_success(&printed);
    assert_success(&wxsforge(&["build", "--input", "installer.json", "--out", "b.wxs"], dir.path()));
    let written = std::fs::read(dir.path().join("b.wxs")).unwrap();
    assert_eq!(printed.stdout, written);
}

#[test]
fn build_errors_produce_an_error_report() {
    let dir = tempfile::tempdir().unwrap();
    write_document(
        dir.path(),
        json!({
            "kind": "Product",
            "children": [{
                "kind": "Directory",
                "attributes": { "Id": "TARGETDIR", "Name": "SourceDir" },
                "children": [{ "kind": "Directory", "attributes": { "Name": "%Nowhere%" } }],
            }],
        }),
    );

    let out = wxsforge(
        &["build", "--input", "installer.json", "--report-json", "report.json"],
        dir.path(),
    );
    assert_eq!(out.status.code(), Some(2));

    let report: Value =
        serde_json::from_slice(&std::fs::read(dir.path().join("report.json")).unwrap()).unwrap();
    assert_eq!(report["ok"], false);
    assert_eq!(report["diagnostics"][0]["code"], "WXS0203");
    assert_eq!(report["diagnostics"][0]["severity"], "error");
}

#[test]
fn guid_and_id_commands_print_allocations() {
    let dir = tempfile::tempdir().unwrap();

    let out = wxsforge(&["guid", "--seed", "Component.Foo"], dir.path());
    assert_success(&out);
    assert_eq!(
        String::from_utf8_lossy(&out.stdout).trim(),
        "6f330b47-2577-43ad-9095-186198f1e755"
    );

    let out = wxsforge(
        &["guid", "--sequential", "--base", "00000000-0000-0000-0000-0000000000ff", "--count", "2"],
        dir.path(),
    );
    assert_success(&out);
    let lines: Vec<String> = String::from_utf8_lossy(&out.stdout).lines().map(str::to_string).collect();
    assert_eq!(
        lines,
        vec![
            "00000000-0000-0000-0000-000000000100".to_string(),
            "00000000-0000-0000-0000-000000000101".to_string(),
        ]
    );

    let out = wxsforge(&["id", "--kind", "Directory", "Config", "Config", "config"], dir.path());
    assert_success(&out);
    assert_eq!(String::from_utf8_lossy(&out.stdout), "Config\nConfig.1\nconfig.2\n");
}
