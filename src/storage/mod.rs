//! Relational store.
//!
//! Crops, stages, harvests, calibrations, alerts, events, and pre-aggregated
//! daily/hourly rollups live in a single SQLite database (a file-backed
//! database fits the single-writer assumption better than a client/server
//! RDBMS). Schema is created at startup if absent. The `alerts` table here
//! is the durable audit trail; the in-memory `AlertHistory` ring is the
//! fast path for `GET /api/notifications` and is not meant to agree with
//! this table's full history.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use thiserror::Error;

use crate::types::{Alert, Crop, Severity, StageOverrides};

fn parse_severity(s: &str) -> Severity {
    match s {
        "emergency" => Severity::Emergency,
        "urgent" => Severity::Urgent,
        "critical" => Severity::Critical,
        "warning" => Severity::Warning,
        "preventive" => Severity::Preventive,
        _ => Severity::Info,
    }
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("not found: {0}")]
    NotFound(String),
}

pub struct RelationalStore {
    pool: SqlitePool,
}

impl RelationalStore {
    pub async fn connect(url: &str) -> Result<Self, StorageError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(url)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS crops (
                id TEXT PRIMARY KEY,
                variety TEXT NOT NULL,
                zone TEXT NOT NULL,
                plant_date TEXT NOT NULL,
                status TEXT NOT NULL,
                current_stage TEXT NOT NULL,
                stage_entered_at TEXT NOT NULL,
                stage_expected_duration_days INTEGER NOT NULL,
                stage_overrides TEXT NOT NULL
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS harvests (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                crop_id TEXT NOT NULL,
                harvested_at TEXT NOT NULL,
                yield_grams REAL,
                notes TEXT
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS calibrations (
                sensor_id TEXT NOT NULL,
                field TEXT NOT NULL,
                last_calibrated_at TEXT NOT NULL,
                interval_days INTEGER NOT NULL,
                PRIMARY KEY (sensor_id, field)
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS alerts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                rule_id TEXT NOT NULL,
                severity TEXT NOT NULL,
                message TEXT NOT NULL,
                sensor_snapshot TEXT NOT NULL,
                recommended_action TEXT,
                triggered_at TEXT NOT NULL,
                acknowledged INTEGER NOT NULL DEFAULT 0
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                kind TEXT NOT NULL,
                detail TEXT NOT NULL
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS hourly_aggregates (
                sensor_id TEXT NOT NULL,
                field TEXT NOT NULL,
                hour_start TEXT NOT NULL,
                min_value REAL NOT NULL,
                max_value REAL NOT NULL,
                avg_value REAL NOT NULL,
                sample_count INTEGER NOT NULL,
                PRIMARY KEY (sensor_id, field, hour_start)
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS daily_aggregates (
                sensor_id TEXT NOT NULL,
                field TEXT NOT NULL,
                day_start TEXT NOT NULL,
                min_value REAL NOT NULL,
                max_value REAL NOT NULL,
                avg_value REAL NOT NULL,
                sample_count INTEGER NOT NULL,
                PRIMARY KEY (sensor_id, field, day_start)
            )"#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn upsert_crop(&self, crop: &Crop) -> Result<(), StorageError> {
        let overrides_json = serde_json::to_string(&crop.stage_overrides)?;
        sqlx::query(
            r#"
            INSERT INTO crops (id, variety, zone, plant_date, status, current_stage, stage_entered_at, stage_expected_duration_days, stage_overrides)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(id) DO UPDATE SET
                variety = excluded.variety,
                zone = excluded.zone,
                plant_date = excluded.plant_date,
                status = excluded.status,
                current_stage = excluded.current_stage,
                stage_entered_at = excluded.stage_entered_at,
                stage_expected_duration_days = excluded.stage_expected_duration_days,
                stage_overrides = excluded.stage_overrides
            "#,
        )
        .bind(&crop.id)
        .bind(&crop.variety)
        .bind(&crop.zone)
        .bind(crop.plant_date.to_rfc3339())
        .bind(&crop.status)
        .bind(&crop.current_stage)
        .bind(crop.stage_entered_at.to_rfc3339())
        .bind(crop.stage_expected_duration_days)
        .bind(overrides_json)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn record_alert(&self, alert: &Alert) -> Result<(), StorageError> {
        let snapshot_json = serde_json::to_string(&alert.sensor_snapshot)?;
        sqlx::query(
            r#"
            INSERT INTO alerts (rule_id, severity, message, sensor_snapshot, recommended_action, triggered_at, acknowledged)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0)
            "#,
        )
        .bind(&alert.rule_id)
        .bind(alert.severity.to_string())
        .bind(&alert.message)
        .bind(snapshot_json)
        .bind(alert.recommended_action.clone())
        .bind(alert.timestamp.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// The most recent unacknowledged alert per rule id, for the escalation
    /// ticker to re-check each cycle. Only the latest row per rule matters:
    /// older unacknowledged firings of the same rule don't each need their
    /// own escalation clock.
    pub async fn unacknowledged_alerts(&self) -> Result<Vec<Alert>, StorageError> {
        let rows = sqlx::query(
            r#"
            SELECT a.rule_id, a.severity, a.message, a.sensor_snapshot, a.recommended_action, a.triggered_at
            FROM alerts a
            INNER JOIN (
                SELECT rule_id, MAX(triggered_at) AS max_triggered_at
                FROM alerts WHERE acknowledged = 0 GROUP BY rule_id
            ) latest ON a.rule_id = latest.rule_id AND a.triggered_at = latest.max_triggered_at
            WHERE a.acknowledged = 0
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        let mut alerts = Vec::with_capacity(rows.len());
        for row in rows {
            let severity: String = row.try_get("severity")?;
            let triggered_at: String = row.try_get("triggered_at")?;
            let snapshot_json: String = row.try_get("sensor_snapshot")?;
            let sensor_snapshot: HashMap<String, f64> = serde_json::from_str(&snapshot_json).unwrap_or_default();
            alerts.push(Alert {
                rule_id: row.try_get("rule_id")?,
                severity: parse_severity(&severity),
                message: row.try_get("message")?,
                sensor_snapshot,
                recommended_action: row.try_get("recommended_action")?,
                timestamp: DateTime::parse_from_rfc3339(&triggered_at)
                    .map(|t| t.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc::now()),
            });
        }
        Ok(alerts)
    }

    /// Mark every unacknowledged row for a rule as acknowledged.
    pub async fn acknowledge_rule(&self, rule_id: &str) -> Result<(), StorageError> {
        sqlx::query("UPDATE alerts SET acknowledged = 1 WHERE rule_id = ?1 AND acknowledged = 0")
            .bind(rule_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Append an audit event. Used by StateCorruption handling: the
    /// affected component halts and this durably records what happened.
    pub async fn record_event(&self, kind: &str, detail: &str) -> Result<(), StorageError> {
        sqlx::query("INSERT INTO events (timestamp, kind, detail) VALUES (?1, ?2, ?3)")
            .bind(Utc::now().to_rfc3339())
            .bind(kind)
            .bind(detail)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn record_calibration_due(
        &self,
        sensor_id: &str,
        field: &str,
        last_calibrated_at: DateTime<Utc>,
        interval_days: i64,
    ) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO calibrations (sensor_id, field, last_calibrated_at, interval_days)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(sensor_id, field) DO UPDATE SET
                last_calibrated_at = excluded.last_calibrated_at,
                interval_days = excluded.interval_days
            "#,
        )
        .bind(sensor_id)
        .bind(field)
        .bind(last_calibrated_at.to_rfc3339())
        .bind(interval_days)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn record_harvest(&self, harvest: &crate::types::Harvest) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO harvests (crop_id, harvested_at, yield_grams, notes)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(&harvest.crop_id)
        .bind(harvest.harvested_at.to_rfc3339())
        .bind(harvest.yield_grams)
        .bind(&harvest.notes)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn crops(&self) -> Result<Vec<Crop>, StorageError> {
        let rows = sqlx::query(
            "SELECT id, variety, zone, plant_date, status, current_stage, stage_entered_at, stage_expected_duration_days, stage_overrides FROM crops",
        )
        .fetch_all(&self.pool)
        .await?;
        let mut crops = Vec::with_capacity(rows.len());
        for row in rows {
            let plant_date: String = row.try_get("plant_date")?;
            let stage_entered_at: String = row.try_get("stage_entered_at")?;
            let overrides_json: String = row.try_get("stage_overrides")?;
            let stage_overrides: StageOverrides = serde_json::from_str(&overrides_json).unwrap_or_default();
            crops.push(Crop {
                id: row.try_get("id")?,
                variety: row.try_get("variety")?,
                zone: row.try_get("zone")?,
                plant_date: DateTime::parse_from_rfc3339(&plant_date)
                    .map(|t| t.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc::now()),
                status: row.try_get("status")?,
                current_stage: row.try_get("current_stage")?,
                stage_entered_at: DateTime::parse_from_rfc3339(&stage_entered_at)
                    .map(|t| t.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc::now()),
                stage_expected_duration_days: row.try_get("stage_expected_duration_days")?,
                stage_overrides,
            });
        }
        Ok(crops)
    }

    /// Calibrations whose interval has elapsed since `last_calibrated_at`.
    pub async fn calibrations_due(&self, now: DateTime<Utc>) -> Result<Vec<(String, String)>, StorageError> {
        let rows = sqlx::query("SELECT sensor_id, field, last_calibrated_at, interval_days FROM calibrations")
            .fetch_all(&self.pool)
            .await?;
        let mut due = Vec::new();
        for row in rows {
            let sensor_id: String = row.try_get("sensor_id")?;
            let field: String = row.try_get("field")?;
            let last: String = row.try_get("last_calibrated_at")?;
            let interval_days: i64 = row.try_get("interval_days")?;
            if let Ok(last_at) = DateTime::parse_from_rfc3339(&last) {
                let due_at = last_at.with_timezone(&Utc) + chrono::Duration::days(interval_days);
                if due_at <= now {
                    due.push((sensor_id, field));
                }
            }
        }
        Ok(due)
    }
}
