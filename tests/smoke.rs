//! Smoke tests -- verify the binary runs and the subcommands work end to end.

use assert_cmd::Command;
use std::io::Write;

#[test]
fn test_cli_help() {
    Command::cargo_bin("logsleuth")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicates::str::contains("root-cause ranking"));
}

#[test]
fn test_cli_version() {
    Command::cargo_bin("logsleuth")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicates::str::contains("logsleuth"));
}

#[test]
fn test_subcommands_exist() {
    for args in [
        vec!["investigate", "--help"],
        vec!["search", "--help"],
        vec!["ingest", "--help"],
        vec!["incidents", "list", "--help"],
        vec!["serve", "--help"],
    ] {
        Command::cargo_bin("logsleuth")
            .unwrap()
            .args(&args)
            .assert()
            .success();
    }
}

#[test]
fn test_ingest_then_investigate() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("logs.db");
    let config = dir.path().join("logsleuth.toml");
    std::fs::write(
        &config,
        format!(
            "[store]\nsqlite_path = {:?}\ncorpus_path = {:?}\n",
            db.display().to_string(),
            db.display().to_string()
        ),
    )
    .unwrap();

    let events = dir.path().join("events.jsonl");
    let mut f = std::fs::File::create(&events).unwrap();
    writeln!(f, r#"{{"id":"p","timestamp":"2024-03-14T10:00:00Z","service":"payment-service","level":"error","message":"Connection pool exhausted"}}"#).unwrap();
    writeln!(f, r#"{{"id":"c","timestamp":"2024-03-14T10:01:00Z","service":"checkout-service","level":"error","message":"Timeout calling payment-service"}}"#).unwrap();
    writeln!(f, "not json").unwrap();
    drop(f);

    Command::cargo_bin("logsleuth")
        .unwrap()
        .arg("--config")
        .arg(&config)
        .arg("ingest")
        .arg(&events)
        .assert()
        .success()
        .stdout(predicates::str::contains("Ingested 2 events (1 skipped)"));

    Command::cargo_bin("logsleuth")
        .unwrap()
        .arg("--config")
        .arg(&config)
        .args([
            "investigate",
            "connection pool exhausted",
            "--start",
            "2024-03-14T09:00:00Z",
            "--end",
            "2024-03-14T11:00:00Z",
        ])
        .assert()
        .success()
        .stdout(predicates::str::contains("payment-service -> checkout-service"));

    Command::cargo_bin("logsleuth")
        .unwrap()
        .arg("--config")
        .arg(&config)
        .args([
            "search",
            "--service",
            "checkout-service",
            "--start",
            "2024-03-14T09:00:00Z",
            "--end",
            "2024-03-14T11:00:00Z",
        ])
        .assert()
        .success()
        .stdout(predicates::str::contains("Timeout calling payment-service"));
}
