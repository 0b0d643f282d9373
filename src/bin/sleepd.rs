//! sleepd - Command-line interface for the sleep detector
//!
//! Commands:
//! - serve: Run the tick loop and HTTP API until ctrl-c
//! - history: Print recent sleep episodes from the store
//! - doctor: Diagnose configuration and store health
//! - config: Print the effective configuration

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn};

use sleep_detector::calibrator::ThresholdCalibrator;
use sleep_detector::http;
use sleep_detector::logging::{init_logging, LogError, LogFormat};
use sleep_detector::notifier::{LogNotifier, Notifier, WebhookNotifier};
use sleep_detector::service::DEFAULT_HISTORY_COUNT;
use sleep_detector::{
    DetectorConfig, DetectorError, MemoryStore, SleepDetector, SleepEpisode, SleepStore,
    SqliteStore, DETECTOR_VERSION, SERVICE_NAME,
};

/// sleepd - Heart-rate based sleep episode detection service
#[derive(Parser)]
#[command(name = "sleepd")]
#[command(version = DETECTOR_VERSION)]
#[command(about = "Detect sleep episodes from wearable heart-rate data", long_about = None)]
struct Cli {
    #[command(flatten)]
    overrides: ConfigOverrides,

    #[command(subcommand)]
    command: Commands,
}

/// Flags taking precedence over the environment
#[derive(Args, Debug, Default)]
struct ConfigOverrides {
    /// SQLite database file
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    /// Use an in-process store (nothing is persisted)
    #[arg(long, global = true)]
    memory: bool,

    /// HTTP listen address
    #[arg(long, global = true)]
    bind_addr: Option<String>,

    /// Tick period in seconds
    #[arg(long, global = true)]
    tick_interval: Option<u64>,

    /// Sleep onset webhook URL
    #[arg(long, global = true)]
    webhook_url: Option<String>,

    /// Log level filter
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Log format (pretty or json)
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,
}

impl ConfigOverrides {
    fn apply(&self, config: &mut DetectorConfig) {
        if let Some(path) = &self.db_path {
            config.db_path = path.clone();
        }
        if let Some(addr) = &self.bind_addr {
            config.bind_addr = addr.clone();
        }
        if let Some(secs) = self.tick_interval {
            config.tick_interval_secs = secs;
        }
        if let Some(url) = &self.webhook_url {
            config.webhook_url = Some(url.clone());
        }
        if let Some(level) = &self.log_level {
            config.log.level = level.clone();
        }
        if let Some(format) = self.log_format {
            config.log.format = format;
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run the tick loop and HTTP API until ctrl-c
    Serve,

    /// Print recent sleep episodes
    History {
        /// Number of episodes to print
        #[arg(long, default_value_t = DEFAULT_HISTORY_COUNT)]
        count: usize,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Diagnose configuration and store health
    Doctor {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration as JSON
    Config,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), SleepdCliError> {
    match cli.command {
        Commands::Serve => {
            let config = load_config(&cli.overrides)?;
            cmd_serve(config, cli.overrides.memory).await
        }
        Commands::History { count, json } => {
            let config = load_config(&cli.overrides)?;
            cmd_history(&config, cli.overrides.memory, count, json).await
        }
        Commands::Doctor { json } => cmd_doctor(&cli.overrides, json).await,
        Commands::Config => {
            let config = load_config(&cli.overrides)?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

fn load_config(overrides: &ConfigOverrides) -> Result<DetectorConfig, DetectorError> {
    let mut config = DetectorConfig::from_env()?;
    overrides.apply(&mut config);
    config.validate()?;
    Ok(config)
}

fn open_store(config: &DetectorConfig, memory: bool) -> Result<Arc<dyn SleepStore>, DetectorError> {
    if memory {
        return Ok(Arc::new(MemoryStore::new()));
    }
    Ok(Arc::new(SqliteStore::open(&config.db_path)?))
}

fn build_notifier(config: &DetectorConfig) -> Result<Arc<dyn Notifier>, DetectorError> {
    match &config.webhook_url {
        Some(url) => {
            let webhook = WebhookNotifier::new(url.clone(), config.webhook_timeout())?;
            info!(url = webhook.url(), "sleep onset webhook configured");
            Ok(Arc::new(webhook))
        }
        None => Ok(Arc::new(LogNotifier)),
    }
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown requested"),
        Err(e) => {
            warn!(error = %e, "cannot listen for ctrl-c, running until killed");
            std::future::pending::<()>().await;
        }
    }
}

async fn cmd_serve(config: DetectorConfig, memory: bool) -> Result<(), SleepdCliError> {
    init_logging(&config.log)?;

    let store = open_store(&config, memory)?;
    let notifier = build_notifier(&config)?;
    let bind_addr = config.bind_addr.clone();
    info!(
        version = DETECTOR_VERSION,
        db_path = %config.db_path.display(),
        memory,
        "starting {}",
        SERVICE_NAME
    );

    let detector = Arc::new(SleepDetector::new(config, store, notifier));
    detector.bootstrap().await;
    let handle = detector.start();

    let served = http::serve(&bind_addr, Arc::clone(&detector), shutdown_signal()).await;
    handle.stop();
    served?;
    Ok(())
}

async fn cmd_history(
    config: &DetectorConfig,
    memory: bool,
    count: usize,
    json: bool,
) -> Result<(), SleepdCliError> {
    let store = open_store(config, memory)?;
    store.ensure_schema().await?;
    let episodes = store.recent_episodes(count).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&episodes)?);
        return Ok(());
    }

    if episodes.is_empty() {
        println!("No sleep episodes recorded");
        return Ok(());
    }
    println!("{:<26} {:<26} {:>8} {:>5}", "START", "END", "DURATION", "HR");
    for episode in &episodes {
        println!(
            "{:<26} {:<26} {:>8} {:>5}",
            episode.start.to_rfc3339(),
            episode.end.to_rfc3339(),
            format_duration(episode),
            episode.representative_heart_rate
        );
    }
    Ok(())
}

fn format_duration(episode: &SleepEpisode) -> String {
    let minutes = episode.duration().num_minutes();
    format!("{}h{:02}m", minutes / 60, minutes % 60)
}

async fn cmd_doctor(overrides: &ConfigOverrides, json: bool) -> Result<(), SleepdCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "version".to_string(),
        status: CheckStatus::Ok,
        message: format!("sleepd version {}", DETECTOR_VERSION),
    });

    match load_config(overrides) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Ok,
                message: format!(
                    "valid band {}-{} bpm, tick every {}s, minimum episode {} min",
                    config.hr_valid_low,
                    config.hr_valid_high,
                    config.tick_interval_secs,
                    config.minimal_sleep_minutes
                ),
            });
            checks.push(check_store(&config, overrides.memory).await);
            checks.push(check_webhook(&config));
        }
        Err(e) => checks.push(DoctorCheck {
            name: "config".to_string(),
            status: CheckStatus::Error,
            message: e.to_string(),
        }),
    }

    let report = DoctorReport {
        service: SERVICE_NAME.to_string(),
        version: DETECTOR_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("sleepd Doctor Report");
        println!("====================");
        println!("Service: {}", report.service);
        println!("Version: {}", report.version);
        println!("\nChecks:");

        for check in &report.checks {
            let status_icon = match check.status {
                CheckStatus::Ok => "[OK]",
                CheckStatus::Warning => "[WARN]",
                CheckStatus::Error => "[ERR]",
            };
            println!("  {} {}: {}", status_icon, check.name, check.message);
        }
    }

    let has_errors = report.checks.iter().any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(SleepdCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

async fn check_store(config: &DetectorConfig, memory: bool) -> DoctorCheck {
    if memory {
        return DoctorCheck {
            name: "store".to_string(),
            status: CheckStatus::Warning,
            message: "in-memory store, episodes are lost on exit".to_string(),
        };
    }

    let reachability = async {
        let store = open_store(config, false)?;
        store.ensure_schema().await?;
        store.recent_episodes(config.threshold_samples).await
    };
    match tokio::time::timeout(config.store_timeout(), reachability).await {
        Ok(Ok(episodes)) => DoctorCheck {
            name: "store".to_string(),
            status: CheckStatus::Ok,
            message: format!(
                "{} reachable, {} episode(s) in calibration window, threshold {} bpm",
                config.db_path.display(),
                episodes.len(),
                ThresholdCalibrator::threshold_from(&episodes)
            ),
        },
        Ok(Err(e)) => DoctorCheck {
            name: "store".to_string(),
            status: CheckStatus::Error,
            message: format!("{}: {}", config.db_path.display(), e),
        },
        Err(_) => DoctorCheck {
            name: "store".to_string(),
            status: CheckStatus::Error,
            message: format!(
                "{} did not answer within {}s",
                config.db_path.display(),
                config.store_timeout_secs
            ),
        },
    }
}

fn check_webhook(config: &DetectorConfig) -> DoctorCheck {
    match &config.webhook_url {
        Some(url) => match reqwest::Url::parse(url) {
            Ok(_) => DoctorCheck {
                name: "webhook".to_string(),
                status: CheckStatus::Ok,
                message: format!("sleep onset posted to {}", url),
            },
            Err(e) => DoctorCheck {
                name: "webhook".to_string(),
                status: CheckStatus::Error,
                message: format!("invalid WEBHOOK_URL {}: {}", url, e),
            },
        },
        None => DoctorCheck {
            name: "webhook".to_string(),
            status: CheckStatus::Warning,
            message: "WEBHOOK_URL unset, sleep onset is only logged".to_string(),
        },
    }
}

// Error types

#[derive(Debug)]
enum SleepdCliError {
    Detector(DetectorError),
    Logging(LogError),
    Json(serde_json::Error),
    DoctorFailed,
}

impl From<DetectorError> for SleepdCliError {
    fn from(e: DetectorError) -> Self {
        SleepdCliError::Detector(e)
    }
}

impl From<LogError> for SleepdCliError {
    fn from(e: LogError) -> Self {
        SleepdCliError::Logging(e)
    }
}

impl From<serde_json::Error> for SleepdCliError {
    fn from(e: serde_json::Error) -> Self {
        SleepdCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<SleepdCliError> for CliError {
    fn from(e: SleepdCliError) -> Self {
        match e {
            SleepdCliError::Detector(e @ DetectorError::Config { .. }) => CliError {
                code: "CONFIG_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check environment variables and command-line flags".to_string()),
            },
            SleepdCliError::Detector(
                e @ (DetectorError::Store(_) | DetectorError::Sqlite(_) | DetectorError::Timeout(_)),
            ) => CliError {
                code: "STORE_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check DB_PATH and file permissions, or pass --memory".to_string()),
            },
            SleepdCliError::Detector(e @ DetectorError::Io(_)) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check that BIND_ADDR is free".to_string()),
            },
            SleepdCliError::Detector(e) => CliError {
                code: "RUNTIME_ERROR".to_string(),
                message: e.to_string(),
                hint: None,
            },
            SleepdCliError::Logging(e) => CliError {
                code: "LOGGING_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check LOG_LEVEL and RUST_LOG".to_string()),
            },
            SleepdCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: None,
            },
            SleepdCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct DoctorReport {
    service: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(serde::Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(serde::Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
