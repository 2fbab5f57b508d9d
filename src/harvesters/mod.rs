//! External-context harvesters.
//!
//! Six independent sources (weather current conditions, weather forecast,
//! solar irradiance, electricity spot pricing, produce market pricing,
//! tourism/footfall index) each poll on their own interval and merge into a
//! single `ContextStore` snapshot via `arc_swap::ArcSwap`, so readers never
//! block on a harvester in flight and always see a consistent whole
//! snapshot rather than a half-updated one. Each entry carries a
//! `valid_until` deadline; a source that keeps failing backs off
//! exponentially rather than hammering a flaky upstream, capped at
//! `HARVESTER_BACKOFF_CAP_SECS`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use chrono::Utc;

use crate::config::defaults;
use crate::config::HarvestersConfig;
use crate::types::{ExternalContextEntry, ExternalContextSnapshot};

pub struct ContextStore {
    snapshot: ArcSwap<ExternalContextSnapshot>,
}

impl ContextStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            snapshot: ArcSwap::from_pointee(ExternalContextSnapshot::default()),
        })
    }

    pub fn current(&self) -> Arc<ExternalContextSnapshot> {
        self.snapshot.load_full()
    }

    /// Merge a source's freshly fetched fields into the snapshot, keyed
    /// `"<source_name>.<field>"`, each with its own `valid_until` deadline.
    fn merge(&self, source_name: &str, fields: HashMap<String, f64>, freshness: Duration) {
        let now = Utc::now();
        let valid_until = now + chrono::Duration::from_std(freshness).unwrap_or(chrono::Duration::hours(1));
        let mut next = (**self.snapshot.load()).clone();
        for (field, value) in fields {
            next.entries.insert(
                format!("{source_name}.{field}"),
                ExternalContextEntry {
                    value,
                    fetched_at: now,
                    valid_until,
                },
            );
        }
        self.snapshot.store(Arc::new(next));
    }
}

/// A source of external-context fields. Kept deliberately narrow — one
/// `fetch` returning a flat field map — so adding a seventh source never
/// touches the other six.
#[async_trait::async_trait]
pub trait ExternalSource: Send + Sync {
    fn name(&self) -> &'static str;
    fn freshness(&self) -> Duration;
    async fn fetch(&self) -> anyhow::Result<HashMap<String, f64>>;
}

pub struct HttpJsonSource {
    name: &'static str,
    freshness: Duration,
    client: reqwest::Client,
    url: String,
}

impl HttpJsonSource {
    pub fn new(name: &'static str, url: String, freshness: Duration) -> Self {
        Self {
            name,
            freshness,
            client: reqwest::Client::new(),
            url,
        }
    }
}

#[async_trait::async_trait]
impl ExternalSource for HttpJsonSource {
    fn name(&self) -> &'static str {
        self.name
    }

    fn freshness(&self) -> Duration {
        self.freshness
    }

    async fn fetch(&self) -> anyhow::Result<HashMap<String, f64>> {
        let resp = self.client.get(&self.url).send().await?;
        let fields: HashMap<String, f64> = resp.json().await?;
        Ok(fields)
    }
}

/// Build the six configured sources, skipping any whose base URL is unset.
pub fn build_sources(config: &HarvestersConfig) -> Vec<Arc<dyn ExternalSource>> {
    let mut sources: Vec<Arc<dyn ExternalSource>> = Vec::new();
    if let Some(url) = &config.weather_base_url {
        let base = url.trim_end_matches('/');
        sources.push(Arc::new(HttpJsonSource::new(
            "weather_current",
            format!("{base}/current"),
            Duration::from_secs(defaults::WEATHER_CURRENT_FRESHNESS_SECS),
        )));
        sources.push(Arc::new(HttpJsonSource::new(
            "weather_forecast",
            format!("{base}/forecast"),
            Duration::from_secs(defaults::WEATHER_FORECAST_FRESHNESS_SECS),
        )));
        sources.push(Arc::new(HttpJsonSource::new(
            "solar",
            format!("{base}/solar"),
            Duration::from_secs(defaults::SOLAR_FRESHNESS_SECS),
        )));
    }
    if let Some(url) = &config.electricity_base_url {
        sources.push(Arc::new(HttpJsonSource::new(
            "electricity",
            url.clone(),
            Duration::from_secs(defaults::ELECTRICITY_FRESHNESS_SECS),
        )));
    }
    if let Some(url) = &config.market_base_url {
        sources.push(Arc::new(HttpJsonSource::new(
            "market",
            url.clone(),
            Duration::from_secs(defaults::MARKET_FRESHNESS_SECS),
        )));
    }
    if let Some(url) = &config.tourism_base_url {
        sources.push(Arc::new(HttpJsonSource::new(
            "tourism",
            url.clone(),
            Duration::from_secs(defaults::TOURISM_FRESHNESS_SECS),
        )));
    }
    sources
}

/// Spawn a ticker for one source: polls at its freshness interval on
/// success, backing off exponentially (doubling, capped at
/// `HARVESTER_BACKOFF_CAP_SECS`) after consecutive failures.
pub fn spawn_harvester(store: Arc<ContextStore>, source: Arc<dyn ExternalSource>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut backoff = source.freshness();
        loop {
            tokio::time::sleep(backoff).await;
            match source.fetch().await {
                Ok(fields) => {
                    store.merge(source.name(), fields, source.freshness());
                    backoff = source.freshness();
                }
                Err(e) => {
                    tracing::warn!(error = %e, source = source.name(), "harvester fetch failed");
                    backoff = (backoff * 2).min(Duration::from_secs(defaults::HARVESTER_BACKOFF_CAP_SECS));
                }
            }
        }
    })
}

/// Spawn all configured sources, returning their join handles.
pub fn spawn_all(store: Arc<ContextStore>, config: &HarvestersConfig) -> Vec<tokio::task::JoinHandle<()>> {
    if !config.enabled {
        return Vec::new();
    }
    build_sources(config)
        .into_iter()
        .map(|source| spawn_harvester(store.clone(), source))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn merge_namespaces_fields_by_source() {
        let store = ContextStore::new();
        let mut fields = HashMap::new();
        fields.insert("outdoor_temp_c".to_string(), 18.5);
        store.merge("weather_current", fields, Duration::from_secs(900));
        let snap = store.current();
        assert_eq!(snap.entries.get("weather_current.outdoor_temp_c").map(|e| e.value), Some(18.5));
    }

    #[tokio::test]
    async fn readers_see_whole_snapshots_not_partial_updates() {
        let store = ContextStore::new();
        let mut weather = HashMap::new();
        weather.insert("outdoor_temp_c".to_string(), 10.0);
        store.merge("weather_current", weather, Duration::from_secs(900));
        let mut pricing = HashMap::new();
        pricing.insert("price_per_kwh".to_string(), 0.22);
        store.merge("electricity", pricing, Duration::from_secs(3600));

        let snap = store.current();
        assert_eq!(snap.entries.get("weather_current.outdoor_temp_c").map(|e| e.value), Some(10.0));
        assert_eq!(snap.entries.get("electricity.price_per_kwh").map(|e| e.value), Some(0.22));
    }

    #[tokio::test]
    async fn disabled_config_spawns_nothing() {
        let store = ContextStore::new();
        let config = HarvestersConfig::default();
        assert!(spawn_all(store, &config).is_empty());
    }

    #[test]
    fn build_sources_skips_unconfigured_urls() {
        let config = HarvestersConfig::default();
        assert!(build_sources(&config).is_empty());
    }
}
