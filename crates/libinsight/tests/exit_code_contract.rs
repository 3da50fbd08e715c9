mod support;

use std::process::Command;

use serde_json::Value;
use support::{remove_store, seeded_store, unique_temp_dir};

const EXIT_SUCCESS: i32 = 0;
const EXIT_RUNTIME_FAILURE: i32 = 1;
const EXIT_TURN_FAILURE: i32 = 2;
const EXIT_USAGE_ERROR: i32 = 64;

fn libinsight() -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_libinsight"));
    command.env_remove("OPENAI_API_KEY").env_remove("RUST_LOG");
    command
}

fn envelope_line(stdout: &[u8]) -> Value {
    let text = String::from_utf8_lossy(stdout);
    let line = text
        .lines()
        .find(|line| line.starts_with('{'))
        .expect("stdout should contain an envelope line");
    serde_json::from_str(line).expect("envelope should be valid JSON")
}

#[test]
fn help_exits_zero() {
    let status = libinsight()
        .arg("--help")
        .status()
        .expect("command should execute");
    assert_eq!(status.code(), Some(EXIT_SUCCESS));
}

#[test]
fn missing_required_args_exits_with_usage_code() {
    let status = libinsight()
        .arg("sql")
        .status()
        .expect("command should execute");
    assert_eq!(status.code(), Some(EXIT_USAGE_ERROR));
}

#[test]
fn runtime_path_resolution_failures_exit_with_runtime_code() {
    let status = libinsight()
        .args(["--home-dir", "relative", "sql", "SELECT 1"])
        .status()
        .expect("command should execute");
    assert_eq!(status.code(), Some(EXIT_RUNTIME_FAILURE));
}

#[test]
fn guard_violations_exit_with_turn_failure_code() {
    let home_dir = unique_temp_dir("libinsight-exit-guard");
    std::fs::create_dir_all(&home_dir).expect("home dir should be creatable");

    let output = libinsight()
        .arg("--home-dir")
        .arg(&home_dir)
        .args(["sql", "DELETE FROM base_info"])
        .output()
        .expect("command should execute");

    assert_eq!(output.status.code(), Some(EXIT_TURN_FAILURE));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("libinsight: failed `sql` (exit_code=2)"));
    assert!(stderr.contains("sql_guardrail_violation"));
    assert!(!home_dir.join(".libinsight").join("CatDewey.db").exists());
    let _ = std::fs::remove_dir_all(&home_dir);
}

#[test]
fn successful_sql_prints_ok_envelope() {
    let db_path = seeded_store("libinsight-exit-sql");
    let output = libinsight()
        .arg("--db-path")
        .arg(&db_path)
        .args([
            "sql",
            "SELECT 도서관명 FROM base_info WHERE 시도 = '서울특별시' ORDER BY 도서관코드",
        ])
        .output()
        .expect("command should execute");

    assert_eq!(output.status.code(), Some(EXIT_SUCCESS));
    let envelope = envelope_line(&output.stdout);
    assert_eq!(envelope["ok"], Value::Bool(true));
    assert_eq!(envelope["command"], "sql");
    assert_eq!(envelope["meta"]["schema_version"], "libinsight.envelope.v1");
    assert_eq!(envelope["meta"]["row_count"], 2);
    assert_eq!(envelope["data"]["rows"][0]["도서관명"], "정독도서관");
    remove_store(&db_path);
}

#[test]
fn missing_store_exits_with_turn_failure_code() {
    let temp = unique_temp_dir("libinsight-exit-missing-store");
    let output = libinsight()
        .arg("--db-path")
        .arg(temp.join("absent.db"))
        .args(["sql", "SELECT 1"])
        .output()
        .expect("command should execute");

    assert_eq!(output.status.code(), Some(EXIT_TURN_FAILURE));
    assert!(String::from_utf8_lossy(&output.stderr).contains("query_execution_failed"));
}

#[test]
fn ask_without_api_key_reports_unavailable_oracle() {
    let db_path = seeded_store("libinsight-exit-ask");
    let output = libinsight()
        .arg("--db-path")
        .arg(&db_path)
        .args(["ask", "서울 도서관 알려줘"])
        .output()
        .expect("command should execute");

    assert_eq!(output.status.code(), Some(EXIT_TURN_FAILURE));
    assert!(String::from_utf8_lossy(&output.stderr).contains("oracle_unavailable"));
    remove_store(&db_path);
}

#[test]
fn schema_needs_no_runtime_paths() {
    let output = libinsight()
        .args(["--home-dir", "relative", "schema"])
        .output()
        .expect("command should execute");

    assert_eq!(output.status.code(), Some(EXIT_SUCCESS));
    assert!(String::from_utf8_lossy(&output.stdout).contains("[데이터베이스 스키마]"));
}
