//! Hydroponics telemetry gateway.
//!
//! Ingests sensor readings over HTTP, runs them through the analytic
//! feature engine and rule engine, and dispatches notifications, HVAC
//! commands, and storage writes.
//!
//! # Usage
//!
//! ```bash
//! cargo run --release
//! cargo run --release -- --addr 0.0.0.0:9090
//! ```
//!
//! # Environment Variables
//!
//! - `GATEWAY_CONFIG`: path to a TOML config file (default: `gateway.toml`)
//! - `RUST_LOG`: logging level (default: info)
//! - `API_KEY`, `NOTIFICATION_COOLDOWN`, `NTFY_TOPIC`, `NTFY_URL`,
//!   `TWILIO_ACCOUNT_SID`, `TWILIO_AUTH_TOKEN`, `TWILIO_FROM_NUMBER`,
//!   `SMTP_HOST`, `SMTP_PORT`, `SMTP_USER`, `SMTP_PASSWORD`,
//!   `ALERT_EMAIL_TO`, `TSDB_URL`, `TSDB_TOKEN`, `TSDB_ORG`, `TSDB_BUCKET`,
//!   `HON_BASE_URL`, `HON_API_KEY`, `DB_URL`: see `gateway.toml` and
//!   `config::GatewayConfig` for the full set of overrides.

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing::info;

use hydro_gateway::analytics::AnalyticEngine;
use hydro_gateway::api::{self, AppState};
use hydro_gateway::cache::ReadingCache;
use hydro_gateway::commands::CommandQueue;
use hydro_gateway::config::{self, GatewayConfig};
use hydro_gateway::cooldown::{AlertHistory, CooldownLedger};
use hydro_gateway::crops::CropStore;
use hydro_gateway::drift::DriftDetector;
use hydro_gateway::escalation::{self, EscalationManager};
use hydro_gateway::harvesters::{self, ContextStore};
use hydro_gateway::hvac::HvacDriver;
use hydro_gateway::notify::ChannelRegistry;
use hydro_gateway::pipeline::IngestOrchestrator;
use hydro_gateway::rules::RuleEngine;
use hydro_gateway::storage::RelationalStore;
use hydro_gateway::tsdb::{Influx2Sink, NullSink, TsdbSink, TsdbWriter};

#[derive(Parser, Debug)]
#[command(name = "hydro-gateway")]
#[command(about = "Hydroponics telemetry gateway")]
#[command(version)]
struct CliArgs {
    /// Override the server bind address (default from config, else
    /// "0.0.0.0:8080")
    #[arg(short, long)]
    addr: Option<String>,

    /// Path to the rules JSON file.
    #[arg(long, default_value = "rules.json")]
    rules: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = CliArgs::parse();

    let mut gateway_config = GatewayConfig::load();
    if let Some(addr) = args.addr {
        gateway_config.server.bind_addr = addr;
    }
    config::init(gateway_config.clone());
    info!(bind_addr = %gateway_config.server.bind_addr, "starting hydro-gateway");

    let store = Arc::new(
        RelationalStore::connect(&gateway_config.db.url)
            .await
            .context("failed to connect to relational store")?,
    );

    let rules = Arc::new(RuleEngine::load(&args.rules).context("failed to load rules")?);
    let cache = Arc::new(ReadingCache::new());
    let cooldown = Arc::new(CooldownLedger::new());
    let channels = Arc::new(ChannelRegistry::from_config(&gateway_config));
    let escalation = Arc::new(EscalationManager::new(
        gateway_config.notifications.escalation_dwell_seconds.clone(),
        channels.clone(),
    ));
    let analytics = Arc::new(AnalyticEngine::new(
        gateway_config.analytics.anomaly_warning_sigma,
        gateway_config.analytics.anomaly_critical_sigma,
        gateway_config.analytics.min_samples_for_anomaly,
        gateway_config.analytics.dli_photoperiod_hours,
    ));
    let drift = Arc::new(DriftDetector::new(
        gateway_config.drift.warning_delta,
        gateway_config.drift.critical_delta,
        gateway_config.drift.min_samples,
    ));
    let crops = Arc::new(CropStore::new());
    for crop in store.crops().await.context("failed to load crops")? {
        crops.upsert(crop);
    }
    let alert_history = Arc::new(AlertHistory::new());
    let commands = Arc::new(CommandQueue::new());
    let hvac = Arc::new(HvacDriver::from_config(&gateway_config.hvac));
    let context = ContextStore::new();
    let _harvester_handles = harvesters::spawn_all(context.clone(), &gateway_config.harvesters);

    let sink: Arc<dyn TsdbSink> = match (&gateway_config.tsdb.url, &gateway_config.tsdb.org, &gateway_config.tsdb.bucket) {
        (Some(url), Some(org), Some(bucket)) => {
            Arc::new(Influx2Sink::new(url, org, bucket, gateway_config.tsdb.token.clone()))
        }
        _ => {
            tracing::warn!("TSDB not configured, using null sink");
            Arc::new(NullSink)
        }
    };
    let tsdb = Arc::new(TsdbWriter::spawn(sink));

    let orchestrator = Arc::new(IngestOrchestrator::new(
        cache.clone(),
        analytics.clone(),
        drift.clone(),
        rules.clone(),
        crops.clone(),
        cooldown.clone(),
        alert_history.clone(),
        escalation.clone(),
        channels.clone(),
        commands.clone(),
        hvac.clone(),
        tsdb.clone(),
        store.clone(),
        context.clone(),
    ));

    let store_for_escalation = store.clone();
    let _escalation_ticker = escalation::spawn_ticker(escalation.clone(), move || {
        let store = store_for_escalation.clone();
        async move {
            store.unacknowledged_alerts().await.unwrap_or_else(|e| {
                tracing::warn!(error = %e, "failed to fetch unacknowledged alerts");
                Vec::new()
            })
        }
    });

    let crops_for_sweep = crops.clone();
    let store_for_sweep = store.clone();
    let _crop_sweep_ticker = tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(
            hydro_gateway::config::defaults::CROP_SWEEP_INTERVAL_SECS,
        ));
        loop {
            interval.tick().await;
            for advance in crops_for_sweep.auto_advance(chrono::Utc::now()) {
                if let Some(crop) = crops_for_sweep.get(&advance.crop_id) {
                    if let Err(e) = store_for_sweep.upsert_crop(&crop).await {
                        tracing::warn!(error = %e, crop_id = %advance.crop_id, "failed to persist stage advance");
                    }
                }
                let _ = store_for_sweep
                    .record_event(
                        "stage_advance",
                        &format!("{} {} -> {}", advance.crop_id, advance.from_stage, advance.to_stage),
                    )
                    .await;
            }
        }
    });

    let state = AppState {
        orchestrator,
        rules,
        cache,
        cooldown,
        alert_history,
        escalation,
        analytics,
        drift,
        crops,
        channels,
        commands,
        hvac,
        tsdb,
        store,
        context,
        api_key: Arc::new(gateway_config.server.api_key.clone()),
    };

    let app = api::create_app(state);
    let listener = tokio::net::TcpListener::bind(&gateway_config.server.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", gateway_config.server.bind_addr))?;
    info!(addr = %gateway_config.server.bind_addr, "listening");
    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}
