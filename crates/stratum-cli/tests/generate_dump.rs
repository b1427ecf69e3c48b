use assert_cmd::Command;
use predicates::prelude::*;
use stratum_domain::{Feature, FeatureVersion, Namespace, Severity, Vulnerability};

fn stratum() -> Command {
    Command::cargo_bin("stratum").expect("stratum binary")
}

fn sample_vulns() -> Vec<Vulnerability> {
    let namespace = Namespace::new("debian:7", "dpkg");
    vec![Vulnerability {
        name: "CVE-OPENSSL-1-DEB7".to_string(),
        namespace: namespace.clone(),
        description: "A vulnerability affecting OpenSSL < 2.0 on Debian 7.0".to_string(),
        link: "http://google.com/#q=CVE-OPENSSL-1-DEB7".to_string(),
        severity: Severity::High,
        fixed_in: vec![FeatureVersion::new(
            Feature::new(namespace, "openssl"),
            "2.0",
        )],
        ..Vulnerability::default()
    }]
}

#[test]
fn help_lists_subcommands() {
    stratum()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("generate-dump"))
        .stdout(predicate::str::contains("import-dump"))
        .stdout(predicate::str::contains("update"));
}

#[test]
fn generate_dump_rejects_non_zip_outfile() {
    let temp = tempfile::tempdir().unwrap();
    stratum()
        .args(["generate-dump", "--out-file"])
        .arg(temp.path().join("dump.tar"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("must end in .zip"));
}

#[test]
fn generate_dump_fails_on_empty_source() {
    let temp = tempfile::tempdir().unwrap();
    let source = temp.path().join("empty-source");
    std::fs::create_dir(&source).unwrap();

    stratum()
        .args(["generate-dump", "--out-file"])
        .arg(temp.path().join("dump.zip"))
        .arg("--source-dir")
        .arg(&source)
        .assert()
        .failure()
        .stderr(predicate::str::contains("expected 1"));
}

#[test]
fn generated_dump_imports_into_a_fresh_ledger() {
    let temp = tempfile::tempdir().unwrap();
    let source = temp.path().join("debian");
    std::fs::create_dir(&source).unwrap();
    std::fs::write(
        source.join("vulns.json"),
        serde_json::to_vec(&sample_vulns()).unwrap(),
    )
    .unwrap();

    let out_file = temp.path().join("dump.zip");
    stratum()
        .args(["generate-dump", "--out-file"])
        .arg(&out_file)
        .arg("--source-dir")
        .arg(&source)
        .assert()
        .success();
    assert!(out_file.exists());

    let db = temp.path().join("ledger.sqlite");
    stratum()
        .args(["import-dump", "--db"])
        .arg(&db)
        .arg("--dump")
        .arg(&out_file)
        .assert()
        .success();

    // Applying the same dump twice is idempotent.
    stratum()
        .args(["import-dump", "--db"])
        .arg(&db)
        .arg("--dump")
        .arg(&out_file)
        .assert()
        .success();
}
