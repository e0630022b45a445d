//! Black-box tests of the `collector` binary's CLI surface: `list` and
//! `utils --conf --totoml`. Exercises the compiled binary directly, the way
//! an operator would invoke it, rather than calling into `src/` (which is
//! not exposed as a library).

use assert_cmd::Command;
use predicates::str::contains;

#[test]
fn list_prints_registered_collector_names() {
    Command::cargo_bin("collector")
        .unwrap()
        .arg("list")
        .assert()
        .success()
        .stdout(contains("fake"));
}

#[test]
fn utils_converts_legacy_config_to_toml() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("legacy.conf");
    let output = dir.path().join("collector.toml");
    std::fs::write(&input, "host=tsdb.internal:4242\nfilter=cpu,mem\nfreq=15\n").unwrap();

    Command::cargo_bin("collector")
        .unwrap()
        .args(["utils", "--conf"])
        .arg(&input)
        .arg("--totoml")
        .arg(&output)
        .assert()
        .success();

    let converted = std::fs::read_to_string(&output).unwrap();
    assert!(converted.contains("tsdb.internal:4242"));
    assert!(converted.contains("freq = 15"));
}

#[test]
fn utils_exits_nonzero_on_unknown_legacy_key() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("legacy.conf");
    let output = dir.path().join("collector.toml");
    std::fs::write(&input, "snmp=public@127.0.0.1\n").unwrap();

    Command::cargo_bin("collector")
        .unwrap()
        .args(["utils", "--conf"])
        .arg(&input)
        .arg("--totoml")
        .arg(&output)
        .assert()
        .failure()
        .code(1);
}

#[test]
fn utils_exits_nonzero_on_missing_input_file() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("does-not-exist.conf");
    let output = dir.path().join("collector.toml");

    Command::cargo_bin("collector")
        .unwrap()
        .args(["utils", "--conf"])
        .arg(&input)
        .arg("--totoml")
        .arg(&output)
        .assert()
        .failure()
        .code(1);
}
