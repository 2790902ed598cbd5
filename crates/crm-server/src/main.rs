//! Marketing automation server
//!
//! Loads configuration and stored state from a config directory, then runs
//! the scheduled rule poller until interrupted.
//!
//! Usage: `crm-automation [CONFIG_DIR]` (default: `CRM_CONFIG_DIR` or `.`)

use anyhow::{anyhow, Context, Result};
use crm_config::{AppConfig, EngineConfig};
use crm_engine::{AutomationService, EngineSettings, ScheduleZone};
use crm_notify::{Channel, LogTransport, TransportRegistry};
use crm_storage::{load_customers, PersistentExecutionLog, PersistentRuleStore, Storage};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// The wired automation server
pub struct CrmServer {
    pub service: AutomationService,
    pub config: AppConfig,
}

impl CrmServer {
    /// Open stored rules, history and customers and build the service
    pub async fn open(config_dir: &Path, config: AppConfig) -> Result<Self> {
        let storage = Storage::new(config.storage_dir(config_dir));
        info!(dir = %storage.dir().display(), "Opening storage");

        let rules = PersistentRuleStore::load(storage.clone())
            .await
            .context("loading automation rules")?;
        let logs = PersistentExecutionLog::load(storage.clone())
            .await
            .context("loading execution history")?;
        let customers = load_customers(&storage)
            .await
            .context("loading customer data")?;

        // No providers in the standalone server; every channel is logged
        let transports = TransportRegistry::new();
        let log_transport = Arc::new(LogTransport::new());
        for channel in [Channel::Email, Channel::Sms, Channel::WhatsApp] {
            transports.register_shared(channel, log_transport.clone());
        }

        let service = AutomationService::builder(
            Arc::new(rules),
            Arc::new(logs),
            Arc::new(customers),
            Arc::new(transports),
        )
        .settings(engine_settings(&config.engine)?)
        .build();

        Ok(Self { service, config })
    }

    /// Run the poller until ctrl-c
    pub async fn run(&self) -> Result<()> {
        self.service.start(self.config.engine.poll_interval());
        info!("Automation server is running");

        tokio::signal::ctrl_c().await?;
        info!("Shutting down...");
        self.service.stop().await;
        Ok(())
    }
}

/// Map file configuration onto engine settings
pub fn engine_settings(engine: &EngineConfig) -> Result<EngineSettings> {
    let zone = match engine.utc_offset_minutes {
        Some(minutes) => ScheduleZone::from_offset_minutes(minutes)
            .ok_or_else(|| anyhow!("invalid UTC offset: {} minutes", minutes))?,
        None => ScheduleZone::Local,
    };

    Ok(EngineSettings {
        max_concurrent_rules: engine.max_concurrent_rules,
        email_batch_size: engine.email_batch_size,
        sms_delay: engine.sms_delay(),
        whatsapp_delay: engine.whatsapp_delay(),
        zone,
    })
}

fn config_dir() -> PathBuf {
    std::env::args_os()
        .nth(1)
        .or_else(|| std::env::var_os("CRM_CONFIG_DIR"))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

#[tokio::main]
async fn main() -> Result<()> {
    let config_dir = config_dir();
    let config = AppConfig::load(&config_dir)
        .with_context(|| format!("loading configuration from {}", config_dir.display()))?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))
        .context("invalid logging level")?;
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!(
        config_dir = %config_dir.display(),
        poll_interval_secs = config.engine.poll_interval_secs,
        "Starting marketing automation server"
    );

    let server = CrmServer::open(&config_dir, config).await?;
    server.run().await
}
