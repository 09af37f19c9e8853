//! blegw - BLE gateway orchestrator for D600 NFC scanners
//!
//! Logs in to the gateway account, scans for scanners, lets the operator pick
//! the ones to use and prints every card read until Ctrl-C.

mod config;
mod output;
mod prompts;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use blegw_core::{Credentials, DeviceDescriptor, ScanMode};
use blegw_gateway::{
    authenticate, create_account, AutoSelector, DeviceSelector, Orchestrator, OrchestratorContext,
};

use crate::config::{Config, Preferences};
use crate::output::{ConsoleReporter, DataFile};
use crate::prompts::DialoguerSelector;

const DEFAULT_LOG_FILTER: &str = "blegw=info,blegw_gateway=info,blegw_core=warn";
const CTRL_C: &str = "Received Ctrl-C - shutting down.. please wait";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ScanKind {
    /// Request scan responses
    Active,
    Passive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ScanModeArg {
    /// One read per trigger
    Single,
    Continuous,
}

impl From<ScanModeArg> for ScanMode {
    fn from(mode: ScanModeArg) -> Self {
        match mode {
            ScanModeArg::Single => ScanMode::Single,
            ScanModeArg::Continuous => ScanMode::Continuous,
        }
    }
}

#[derive(Parser)]
#[command(name = "blegw")]
#[command(author, version, about = "BLE gateway orchestrator for D600 NFC scanners")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "BLEGW_CONFIG")]
    config: Option<PathBuf>,

    /// Account user name (e-mail)
    #[arg(short, long, env = "BLEGW_USER")]
    user: Option<String>,

    /// Account password
    #[arg(long, env = "BLEGW_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Gateway to use instead of asking
    #[arg(short, long)]
    gateway: Option<String>,

    /// Scan type
    #[arg(long, value_enum)]
    scan: Option<ScanKind>,

    /// Discovery scan period in seconds
    #[arg(long)]
    period: Option<u32>,

    /// Reconnect to selected devices after they drop
    #[arg(long)]
    reconnect: Option<bool>,

    /// D600 scanner mode
    #[arg(long, value_enum)]
    scan_mode: Option<ScanModeArg>,

    /// Append card reads to this CSV file
    #[arg(long, conflicts_with = "no_data_file")]
    data_file: Option<PathBuf>,

    /// Do not save card reads
    #[arg(long)]
    no_data_file: bool,

    /// Connect to every matching device without prompting
    #[arg(long)]
    auto_select: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    /// Prompts are skipped in auto-select mode
    fn interactive(&self) -> bool {
        !self.auto_select
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load().unwrap_or_else(|e| {
            warn!(error = %e, "Using default configuration");
            Config::default()
        }),
    };

    let prefs_path = Preferences::path().ok();
    let mut prefs = prefs_path
        .as_deref()
        .map(Preferences::load_from)
        .unwrap_or_default();

    let result = run(cli, config, &mut prefs).await;

    if let Some(path) = &prefs_path {
        if let Err(e) = prefs.save_to(path) {
            warn!(error = %e, "Failed to save preferences");
        }
    }
    println!("Goodbye!");
    result
}

async fn run(cli: Cli, config: Config, prefs: &mut Preferences) -> Result<()> {
    let mut settings = config.orchestrator.clone();
    let account = create_account(&settings.transport);

    let credentials = match (cli.user.clone(), cli.password.clone()) {
        (Some(user), Some(password)) => Credentials::new(user, password),
        (user, _) => {
            let default_user = user.or(config.user.clone()).or(prefs.user.clone());
            prompts::credentials(default_user).await?
        }
    };
    prefs.user = Some(credentials.user.clone());

    let gateways = authenticate(account.as_ref(), &credentials)
        .await
        .context("Login failed")?;
    info!(gateways = gateways.len(), "Logged in");

    let gateway = match cli.gateway.clone().or(config.gateway.clone()) {
        Some(gateway) => Some(gateway),
        None if cli.interactive() => prompts::gateway(gateways.clone()).await?,
        None => gateways.first().cloned(),
    };
    let gateway_ids: Vec<String> = gateway.into_iter().collect();

    let mut data_file = cli.data_file.clone().or(config.data_file.clone());
    if !gateway_ids.is_empty() {
        settings.scan.active = match cli.scan {
            Some(kind) => kind == ScanKind::Active,
            None if cli.interactive() => prompts::scan_active(settings.scan.active).await?,
            None => settings.scan.active,
        };
        let default_period = prefs.period_secs.unwrap_or(settings.scan.period_secs);
        settings.scan.period_secs = match cli.period {
            Some(period) => period,
            None if cli.interactive() => prompts::scan_period(default_period).await?,
            None => default_period,
        };
        prefs.period_secs = Some(settings.scan.period_secs);

        settings.reconnect = match cli.reconnect {
            Some(reconnect) => reconnect,
            None if cli.interactive() => {
                prompts::confirm("Reconnect to devices?", settings.reconnect).await?
            }
            None => settings.reconnect,
        };
        settings.scan_mode = match cli.scan_mode {
            Some(mode) => mode.into(),
            None if cli.interactive() => prompts::scan_mode(settings.scan_mode).await?,
            None => settings.scan_mode,
        };

        if cli.no_data_file {
            data_file = None;
        } else if data_file.is_none() && cli.interactive() {
            data_file = prompts::data_file(prefs.data_file.clone()).await?;
        }
    }

    let data_file = match data_file {
        Some(path) => {
            prefs.data_file = Some(path.display().to_string());
            Some(DataFile::open(&path)?)
        }
        None => None,
    };

    let reporter = Arc::new(ConsoleReporter::new(data_file));
    let selector: Arc<dyn DeviceSelector> = if cli.interactive() {
        Arc::new(DialoguerSelector::default())
    } else {
        Arc::new(AutoSelector)
    };
    let descriptor =
        DeviceDescriptor::d600(settings.connection).context("Invalid device profile")?;
    let ctx = OrchestratorContext::new(settings, descriptor, reporter, selector);

    let shutdown = ctx.shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            shutdown.trigger(CTRL_C);
        }
    });

    let reason = Orchestrator::new(account, ctx)
        .run(&gateway_ids, &credentials)
        .await;
    info!(%reason, "Stopped");
    Ok(())
}
