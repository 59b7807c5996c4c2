mod aggregate;
mod calendar;
mod calibration;
mod config;
mod engine;
mod error;
mod models;
mod projection;
mod quota;
mod report;
mod service;
mod source;
mod storage;
mod ui;

use chrono::Local;
use clap::{ArgGroup, Parser, Subcommand};
use crate::config::{data_dir, ensure_initialized, history_db_path, load_config_or_default, log_path};
use error::AppError;
use models::CapKind;
use service::{CalibrationRequest, MeterService, SourceStatus};
use std::fs::{self, OpenOptions};
use std::io;
use std::sync::Mutex;
use storage::Storage;
use tracing_subscriber::EnvFilter;
use ui::run::{run_dashboard, LoopTiming};

const LOG_ENV: &str = "QUOTA_METER_LOG";

#[derive(Debug, Parser)]
#[command(name = "quota-meter")]
#[command(about = "Weekly quota and spend dashboard for two competing usage caps")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    Init,
    /// Live dashboard, or a single plain-text render with --once.
    Dashboard {
        /// Seconds between usage fetches; defaults to refresh_seconds.
        #[arg(long)]
        interval: Option<u64>,
        #[arg(long)]
        once: bool,
        /// With --once, print the snapshot as JSON.
        #[arg(long, requires = "once")]
        json: bool,
    },
    /// Derive cap limits from the percentages the provider reports.
    #[command(group(
        ArgGroup::new("observed")
            .required(true)
            .multiple(true)
            .args(["all_models_pct", "primary_pct"])
    ))]
    Calibrate {
        #[arg(long, allow_negative_numbers = true)]
        all_models_pct: Option<f64>,
        #[arg(long, allow_negative_numbers = true)]
        primary_pct: Option<f64>,
    },
    /// Record fetched days into the history store.
    Sync,
    Export {
        #[arg(long, default_value = "json")]
        format: String,
    },
}

fn csv_field(raw: &str) -> String {
    if raw.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", raw.replace('"', "\"\""))
    } else {
        raw.to_string()
    }
}

fn open_log_file() -> Result<fs::File, AppError> {
    fs::create_dir_all(data_dir()?)?;
    Ok(OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path()?)?)
}

/// The live view owns the terminal, so its logs go to a file instead.
fn init_tracing(to_file: bool) {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let _ = if to_file {
        match open_log_file() {
            Ok(file) => builder.with_ansi(false).with_writer(Mutex::new(file)).try_init(),
            Err(_) => builder.with_writer(io::sink).try_init(),
        }
    } else {
        builder.with_writer(io::stderr).try_init()
    };
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let cli = Cli::parse();
    let live = matches!(cli.command, Commands::Dashboard { once: false, .. });
    init_tracing(live);

    match cli.command {
        Commands::Init => {
            ensure_initialized()?;
            println!("Initialized quota-meter config and data directories.");
        }
        Commands::Dashboard {
            interval,
            once,
            json,
        } => {
            ensure_initialized()?;
            let cfg = load_config_or_default();
            let svc = MeterService::new(&cfg)?;
            if once {
                let refreshed = svc.refresh(Local::now().naive_local()).await;
                if json {
                    println!("{}", serde_json::to_string_pretty(&refreshed.snapshot)?);
                } else {
                    print!("{}", report::render_text(&refreshed, &cfg.engine));
                }
            } else {
                let timing =
                    LoopTiming::new(cfg.tick_seconds, interval.unwrap_or(cfg.refresh_seconds));
                run_dashboard(svc, timing).await?;
            }
        }
        Commands::Calibrate {
            all_models_pct,
            primary_pct,
        } => {
            ensure_initialized()?;
            let cfg = load_config_or_default();
            let svc = MeterService::new(&cfg)?;
            let outcome = svc
                .calibrate(
                    CalibrationRequest {
                        all_models_pct,
                        primary_pct,
                    },
                    Local::now().naive_local(),
                )
                .await?;
            for cap in &outcome.updated {
                let entry = outcome.record.cap(*cap);
                let observed = match cap {
                    CapKind::AllModels => outcome.week_cost,
                    CapKind::Primary => outcome.primary_week_cost,
                };
                println!(
                    "{}: limit ${:.2} ({:.1}% at ${:.2} observed)",
                    cap.display_name(&cfg.engine.primary_label),
                    entry.limit_usd,
                    entry.observed_pct.unwrap_or_default(),
                    observed,
                );
            }
            println!("Calibration saved to {}", outcome.path.display());
        }
        Commands::Sync => {
            ensure_initialized()?;
            let cfg = load_config_or_default();
            let svc = MeterService::new(&cfg)?;
            let report = svc.sync(Local::now().naive_local()).await?;
            match &report.source {
                SourceStatus::Fresh { .. } => println!(
                    "Recorded {} days to {} (week to date ${:.2})",
                    report.days_written,
                    svc.history_db().display(),
                    report.week_to_date,
                ),
                SourceStatus::NoData => {
                    eprintln!("Usage source returned no days; history not updated.")
                }
                SourceStatus::Unavailable { reason } => {
                    eprintln!("Usage source unavailable ({reason}); history not updated.")
                }
            }
        }
        Commands::Export { format } => {
            ensure_initialized()?;
            let cfg = load_config_or_default();
            let storage = Storage::open(&history_db_path(&cfg)?)?;
            if format.eq_ignore_ascii_case("json") {
                println!("{}", storage.export_json()?);
            } else if format.eq_ignore_ascii_case("csv") {
                println!(
                    "date,api_cost_usd,plan_prorata_usd,efficiency_ratio,input_tokens,output_tokens,cache_read_tokens,cache_write_tokens,models_used,week_budget_pct,recorded_at"
                );
                for r in storage.export_rows()? {
                    println!(
                        "{},{:.4},{:.4},{:.2},{},{},{},{},{},{},{}",
                        csv_field(&r.date),
                        r.api_cost_usd,
                        r.plan_prorata_usd,
                        r.efficiency_ratio,
                        r.input_tokens,
                        r.output_tokens,
                        r.cache_read_tokens,
                        r.cache_write_tokens,
                        csv_field(&r.models_used.join(";")),
                        r.week_budget_pct
                            .map(|pct| format!("{pct:.4}"))
                            .unwrap_or_default(),
                        csv_field(&r.recorded_at),
                    );
                }
            } else {
                return Err(AppError::Config(
                    "Unsupported export format. Use json or csv".into(),
                ));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_field_escapes_special_characters() {
        assert_eq!(csv_field("plain"), "plain");
        assert_eq!(csv_field("a,b"), "\"a,b\"");
        assert_eq!(csv_field("a\"b"), "\"a\"\"b\"");
        assert_eq!(csv_field("a\nb"), "\"a\nb\"");
    }

    #[test]
    fn calibrate_requires_at_least_one_percent() {
        let err = Cli::try_parse_from(["quota-meter", "calibrate"]).expect_err("expected error");
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn calibrate_accepts_negative_values_for_validation() {
        let cli = Cli::try_parse_from(["quota-meter", "calibrate", "--primary-pct", "-5"])
            .expect("parse");
        match cli.command {
            Commands::Calibrate { primary_pct, .. } => assert_eq!(primary_pct, Some(-5.0)),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn json_output_requires_once() {
        assert!(Cli::try_parse_from(["quota-meter", "dashboard", "--json"]).is_err());
        assert!(Cli::try_parse_from(["quota-meter", "dashboard", "--once", "--json"]).is_ok());
    }
}
