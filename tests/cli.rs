use chrono::{Duration, Local, NaiveDate};
use rusqlite::Connection;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

fn home_path(home: &TempDir) -> &Path {
    home.path()
}

fn bin_path() -> &'static str {
    env!("CARGO_BIN_EXE_quota-meter")
}

fn run_cmd(home: &TempDir, args: &[&str]) -> Output {
    run_cmd_with_env(home, args, &[])
}

fn run_cmd_with_env(home: &TempDir, args: &[&str], envs: &[(&str, &str)]) -> Output {
    Command::new(bin_path())
        .args(args)
        .env("QUOTA_METER_HOME", home_path(home))
        .env_remove("QUOTA_METER_LOG")
        .envs(envs.iter().copied())
        .output()
        .expect("run quota-meter command")
}

fn db_path(home: &TempDir) -> PathBuf {
    home.path().join("data").join("history.sqlite")
}

fn calibration_path(home: &TempDir) -> PathBuf {
    home.path().join("config").join("calibration.toml")
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

fn daily_row(day: NaiveDate, sonnet: f64, haiku: f64) -> String {
    format!(
        r#"{{
            "date": "{day}",
            "inputTokens": 1000,
            "outputTokens": 200,
            "cacheCreationTokens": 10,
            "cacheReadTokens": 5000,
            "totalCost": {total},
            "modelsUsed": ["claude-sonnet-4-5-20250929", "claude-haiku-4-5-20251001"],
            "modelBreakdowns": [
                {{"modelName": "claude-sonnet-4-5-20250929", "cost": {sonnet}}},
                {{"modelName": "claude-haiku-4-5-20251001", "cost": {haiku}}}
            ]
        }}"#,
        total = sonnet + haiku,
    )
}

/// Points the usage source at `sh -c 'cat <report>'`; the trailing
/// `--since DATE` arguments land in `$0`/`$1` and are ignored.
fn install_fake_source(home: &TempDir, rows: &[String]) {
    let report = home.path().join("usage.json");
    fs::write(&report, format!(r#"{{"daily": [{}]}}"#, rows.join(","))).expect("write report");

    let config_dir = home.path().join("config");
    fs::create_dir_all(&config_dir).expect("config dir");
    let toml = format!(
        "[source]\ncommand = \"sh\"\nargs = [\"-c\", \"cat '{}'\"]\n",
        report.display()
    );
    fs::write(config_dir.join("config.toml"), toml).expect("write config");
}

#[test]
fn init_creates_config_and_data_paths() {
    let home = TempDir::new().expect("temp home");
    let output = run_cmd(&home, &["init"]);
    assert!(output.status.success());

    assert!(home.path().join("config").exists());
    assert!(home.path().join("data").exists());
    assert!(home.path().join("config").join("config.toml").exists());
}

#[test]
fn init_is_idempotent() {
    let home = TempDir::new().expect("temp home");

    assert!(run_cmd(&home, &["init"]).status.success());
    let first = fs::read_to_string(home.path().join("config").join("config.toml"))
        .expect("read config after first init");

    assert!(run_cmd(&home, &["init"]).status.success());
    let second = fs::read_to_string(home.path().join("config").join("config.toml"))
        .expect("read config after second init");

    assert_eq!(first, second);
}

#[test]
fn dashboard_once_survives_missing_source() {
    let home = TempDir::new().expect("temp home");
    let output = run_cmd_with_env(
        &home,
        &["dashboard", "--once"],
        &[("QUOTA_METER_SOURCE__COMMAND", "quota-meter-no-such-binary")],
    );
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("! usage source unavailable"));
    assert!(stdout.contains("$0.00 / $607.00"));
    assert!(stdout.contains("$0.00 / $789.00"));
}

#[test]
fn corrupt_config_falls_back_to_defaults() {
    let home = TempDir::new().expect("temp home");
    let config_dir = home.path().join("config");
    fs::create_dir_all(&config_dir).expect("config dir");
    fs::write(config_dir.join("config.toml"), "refresh_seconds = [not toml").expect("write");

    let output = run_cmd_with_env(
        &home,
        &["dashboard", "--once"],
        &[("QUOTA_METER_SOURCE__COMMAND", "quota-meter-no-such-binary")],
    );
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("all-models"));
}

#[cfg(unix)]
#[test]
fn dashboard_once_renders_fetched_usage() {
    let home = TempDir::new().expect("temp home");
    install_fake_source(&home, &[daily_row(today(), 30.0, 5.0)]);

    let output = run_cmd(&home, &["dashboard", "--once"]);
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(!stdout.contains("! "), "unexpected warning: {stdout}");
    assert!(stdout.contains("$35.00 / $607.00"));
    assert!(stdout.contains("$30.00 / $789.00"));
    assert!(stdout.contains("sonnet-4-5"));
    assert!(stdout.contains("haiku-4-5"));
}

#[cfg(unix)]
#[test]
fn dashboard_once_json_exposes_snapshot() {
    let home = TempDir::new().expect("temp home");
    install_fake_source(&home, &[daily_row(today(), 30.0, 5.0)]);

    let output = run_cmd(&home, &["dashboard", "--once", "--json"]);
    assert!(output.status.success());

    let parsed: Value = serde_json::from_slice(&output.stdout).expect("valid json output");
    let week_cost = parsed["week"]["week_cost"].as_f64().expect("week cost");
    assert!((week_cost - 35.0).abs() < 1e-9);
    assert_eq!(parsed["quota"]["binding"], "AllModels");
    assert_eq!(parsed["trend"].as_array().expect("trend").len(), 7);
    assert!(parsed["reset"]["state"].is_string());
}

#[test]
fn calibrate_rejects_zero_percent_without_writing() {
    let home = TempDir::new().expect("temp home");
    let output = run_cmd_with_env(
        &home,
        &["calibrate", "--all-models-pct", "0"],
        &[("QUOTA_METER_SOURCE__COMMAND", "quota-meter-no-such-binary")],
    );
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("percent used must be greater than 0"));
    assert!(!calibration_path(&home).exists());
}

#[cfg(unix)]
#[test]
fn calibrate_refuses_to_run_without_the_usage_source() {
    let home = TempDir::new().expect("temp home");
    install_fake_source(&home, &[daily_row(today(), 30.0, 5.0)]);
    assert!(run_cmd(&home, &["sync"]).status.success());
    assert!(db_path(&home).exists());

    let output = run_cmd_with_env(
        &home,
        &["calibrate", "--all-models-pct", "15"],
        &[("QUOTA_METER_SOURCE__COMMAND", "quota-meter-no-such-binary")],
    );
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("cannot calibrate against incomplete week cost"));
    assert!(!calibration_path(&home).exists());
}

#[test]
fn calibrate_requires_a_percent() {
    let home = TempDir::new().expect("temp home");
    let output = run_cmd(&home, &["calibrate"]);
    assert!(!output.status.success());
}

#[cfg(unix)]
#[test]
fn calibrating_one_cap_preserves_the_other() {
    let home = TempDir::new().expect("temp home");
    install_fake_source(&home, &[daily_row(today(), 30.0, 5.0)]);

    let output = run_cmd(&home, &["calibrate", "--all-models-pct", "10"]);
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("limit $350.00"));

    let output = run_cmd(&home, &["calibrate", "--primary-pct", "15"]);
    assert!(output.status.success());

    let raw = fs::read_to_string(calibration_path(&home)).expect("read calibration");
    let record: toml::Value = toml::from_str(&raw).expect("valid toml");
    let all = record["all_models"]["limit_usd"].as_float().expect("all limit");
    let primary = record["primary"]["limit_usd"].as_float().expect("primary limit");
    assert!((all - 350.0).abs() < 1e-6);
    assert!((primary - 200.0).abs() < 1e-6);

    let output = run_cmd(&home, &["dashboard", "--once"]);
    assert!(String::from_utf8_lossy(&output.stdout).contains("$35.00 / $350.00"));
}

#[test]
fn sync_with_missing_source_leaves_history_untouched() {
    let home = TempDir::new().expect("temp home");
    let output = run_cmd_with_env(
        &home,
        &["sync"],
        &[("QUOTA_METER_SOURCE__COMMAND", "quota-meter-no-such-binary")],
    );
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("history not updated"));
    assert!(!db_path(&home).exists());
}

#[cfg(unix)]
#[test]
fn sync_then_export_json_and_csv() {
    let home = TempDir::new().expect("temp home");
    let yesterday = today() - Duration::days(1);
    install_fake_source(
        &home,
        &[daily_row(yesterday, 10.0, 2.0), daily_row(today(), 30.0, 5.0)],
    );

    let output = run_cmd(&home, &["sync"]);
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("Recorded 2 days"));

    let conn = Connection::open(db_path(&home)).expect("open sqlite");
    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM efficiency_daily", [], |r| r.get(0))
        .expect("count rows");
    assert_eq!(count, 2);

    let output = run_cmd(&home, &["export", "--format", "json"]);
    assert!(output.status.success());
    let parsed: Value = serde_json::from_slice(&output.stdout).expect("valid json output");
    let arr = parsed.as_array().expect("json array");
    assert_eq!(arr.len(), 2);
    assert_eq!(arr[0]["date"], today().to_string());
    assert_eq!(arr[0]["api_cost_usd"], 35.0);

    let output = run_cmd(&home, &["export", "--format", "csv"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("date,api_cost_usd,plan_prorata_usd,efficiency_ratio"));
    assert!(stdout.contains("claude-sonnet-4-5-20250929;claude-haiku-4-5-20251001"));
}

#[test]
fn export_rejects_unknown_format() {
    let home = TempDir::new().expect("temp home");
    let output = run_cmd(&home, &["export", "--format", "xml"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Unsupported export format"));
}
