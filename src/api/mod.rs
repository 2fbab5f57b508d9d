//! Thin HTTP transport over the core components.
//!
//! Routing, auth, and serialization live outside the core component set;
//! this module exists so the crate ships as a runnable service. See
//! `routes.rs` for the endpoint table, `middleware.rs` for the `X-API-Key`
//! check.

pub mod handlers;
pub mod middleware;
pub mod routes;

use std::sync::Arc;

use crate::analytics::AnalyticEngine;
use crate::cache::ReadingCache;
use crate::commands::CommandQueue;
use crate::cooldown::{AlertHistory, CooldownLedger};
use crate::crops::CropStore;
use crate::drift::DriftDetector;
use crate::escalation::EscalationManager;
use crate::harvesters::ContextStore;
use crate::hvac::HvacDriver;
use crate::notify::ChannelRegistry;
use crate::pipeline::IngestOrchestrator;
use crate::rules::RuleEngine;
use crate::storage::RelationalStore;
use crate::tsdb::TsdbWriter;

/// Shared application state handed to every axum handler.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<IngestOrchestrator>,
    pub rules: Arc<RuleEngine>,
    pub cache: Arc<ReadingCache>,
    pub cooldown: Arc<CooldownLedger>,
    pub alert_history: Arc<AlertHistory>,
    pub escalation: Arc<EscalationManager>,
    pub analytics: Arc<AnalyticEngine>,
    pub drift: Arc<DriftDetector>,
    pub crops: Arc<CropStore>,
    pub channels: Arc<ChannelRegistry>,
    pub commands: Arc<CommandQueue>,
    pub hvac: Arc<HvacDriver>,
    pub tsdb: Arc<TsdbWriter>,
    pub store: Arc<RelationalStore>,
    pub context: Arc<ContextStore>,
    pub api_key: Arc<String>,
}

pub fn create_app(state: AppState) -> axum::Router {
    routes::api_routes(state)
}
