//! Hydroponics telemetry gateway.
//!
//! Ingests sensor readings from grow-room devices, runs them through an
//! analytic feature engine and a rule engine, and dispatches notifications,
//! HVAC commands, and time-series/relational persistence. Modules roughly
//! correspond to the pipeline stages: ingest (`pipeline`), rule evaluation
//! (`rules`), anomaly/drift detection (`analytics`, `drift`), dispatch
//! (`notify`, `hvac`, `commands`), and persistence (`storage`, `tsdb`).

pub mod analytics;
pub mod api;
pub mod cache;
pub mod commands;
pub mod config;
pub mod cooldown;
pub mod crops;
pub mod drift;
pub mod error;
pub mod escalation;
pub mod harvesters;
pub mod hvac;
pub mod notify;
pub mod pipeline;
pub mod rules;
pub mod storage;
pub mod tsdb;
pub mod types;

pub use error::GatewayError;
pub use pipeline::IngestOrchestrator;
pub use types::Reading;
