//! Configuration module
//!
//! Env-driven configuration for the pipeline: database, object storage,
//! event channel, and the reconciliation windows/cadences. Windows are held
//! as `Duration`s so deployments tune them independently and tests construct
//! settings directly with sub-second values.

use std::env;
use std::time::Duration;

const DB_MAX_CONNECTIONS: u32 = 20;
const DB_TIMEOUT_SECS: u64 = 30;
const STUCK_UPLOAD_WINDOW_SECS: u64 = 600;
const MISSING_EVENT_WINDOW_SECS: u64 = 300;
const ORPHANED_INTENT_WINDOW_SECS: u64 = 3600;
const ORPHANED_BLOB_MIN_AGE_SECS: u64 = 3600;
const RECONCILE_INTERVAL_SECS: u64 = 60;
const ORPHAN_SWEEP_INTERVAL_SECS: u64 = 3600;
const MAX_UPLOAD_ATTEMPTS: i32 = 3;
const EXTERNAL_CALL_TIMEOUT_SECS: u64 = 10;
const RECONCILE_BATCH_SIZE: i64 = 100;

/// Grace windows and limits for the reconciliation passes.
#[derive(Clone, Debug)]
pub struct ReconcileSettings {
    /// Minimum age of an `uploading` row before it counts as stuck.
    pub stuck_upload_window: Duration,
    /// Minimum age of a `stored` row before its completion event counts as
    /// missing.
    pub missing_event_window: Duration,
    /// Minimum age of an `initiated` row before it is deleted.
    pub orphaned_intent_window: Duration,
    /// Minimum age of a blob object before the orphan sweep may delete it.
    pub orphaned_blob_min_age: Duration,
    /// Recovery attempts from `uploading` before a row goes `failed`.
    pub max_upload_attempts: i32,
    /// Bound on each blob/event call made while a row claim is held.
    pub external_call_timeout: Duration,
    /// Candidate rows examined per pass per cycle.
    pub batch_size: i64,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            stuck_upload_window: Duration::from_secs(STUCK_UPLOAD_WINDOW_SECS),
            missing_event_window: Duration::from_secs(MISSING_EVENT_WINDOW_SECS),
            orphaned_intent_window: Duration::from_secs(ORPHANED_INTENT_WINDOW_SECS),
            orphaned_blob_min_age: Duration::from_secs(ORPHANED_BLOB_MIN_AGE_SECS),
            max_upload_attempts: MAX_UPLOAD_ATTEMPTS,
            external_call_timeout: Duration::from_secs(EXTERNAL_CALL_TIMEOUT_SECS),
            batch_size: RECONCILE_BATCH_SIZE,
        }
    }
}

/// Cadences for the scheduler loop.
#[derive(Clone, Debug)]
pub struct ScheduleSettings {
    /// Cadence of the three time-sensitive passes.
    pub reconcile_interval: Duration,
    /// Cadence of the blob-orphan sweep (full listing, so much coarser).
    pub orphan_sweep_interval: Duration,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            reconcile_interval: Duration::from_secs(RECONCILE_INTERVAL_SECS),
            orphan_sweep_interval: Duration::from_secs(ORPHAN_SWEEP_INTERVAL_SECS),
        }
    }
}

/// Application configuration for the pipeline service.
#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub db_max_connections: u32,
    pub db_timeout_seconds: u64,
    pub s3_bucket: String,
    pub s3_region: Option<String>,
    pub aws_region: Option<String>,
    /// Custom endpoint for S3-compatible providers (e.g. MinIO).
    pub s3_endpoint: Option<String>,
    pub nats_url: String,
    pub reconcile: ReconcileSettings,
    pub schedule: ScheduleSettings,
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .unwrap_or(default)
}

fn env_secs(name: &str, default: u64) -> Duration {
    Duration::from_secs(env_u64(name, default))
}

impl Config {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        let reconcile = ReconcileSettings {
            stuck_upload_window: env_secs("STUCK_UPLOAD_WINDOW_SECS", STUCK_UPLOAD_WINDOW_SECS),
            missing_event_window: env_secs("MISSING_EVENT_WINDOW_SECS", MISSING_EVENT_WINDOW_SECS),
            orphaned_intent_window: env_secs(
                "ORPHANED_INTENT_WINDOW_SECS",
                ORPHANED_INTENT_WINDOW_SECS,
            ),
            orphaned_blob_min_age: env_secs(
                "ORPHANED_BLOB_MIN_AGE_SECS",
                ORPHANED_BLOB_MIN_AGE_SECS,
            ),
            max_upload_attempts: env::var("MAX_UPLOAD_ATTEMPTS")
                .unwrap_or_else(|_| MAX_UPLOAD_ATTEMPTS.to_string())
                .parse()
                .unwrap_or(MAX_UPLOAD_ATTEMPTS),
            external_call_timeout: env_secs(
                "EXTERNAL_CALL_TIMEOUT_SECS",
                EXTERNAL_CALL_TIMEOUT_SECS,
            ),
            batch_size: env::var("RECONCILE_BATCH_SIZE")
                .unwrap_or_else(|_| RECONCILE_BATCH_SIZE.to_string())
                .parse()
                .unwrap_or(RECONCILE_BATCH_SIZE),
        };

        let schedule = ScheduleSettings {
            reconcile_interval: env_secs("RECONCILE_INTERVAL_SECS", RECONCILE_INTERVAL_SECS),
            orphan_sweep_interval: env_secs(
                "ORPHAN_SWEEP_INTERVAL_SECS",
                ORPHAN_SWEEP_INTERVAL_SECS,
            ),
        };

        let config = Config {
            database_url: env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?,
            db_max_connections: env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| DB_MAX_CONNECTIONS.to_string())
                .parse()
                .unwrap_or(DB_MAX_CONNECTIONS),
            db_timeout_seconds: env_u64("DB_TIMEOUT_SECONDS", DB_TIMEOUT_SECS),
            s3_bucket: env::var("S3_BUCKET")
                .map_err(|_| anyhow::anyhow!("S3_BUCKET must be set"))?,
            s3_region: env::var("S3_REGION").ok(),
            aws_region: env::var("AWS_REGION").ok(),
            s3_endpoint: env::var("S3_ENDPOINT").ok(),
            nats_url: env::var("NATS_URL")
                .map_err(|_| anyhow::anyhow!("NATS_URL must be set"))?,
            reconcile,
            schedule,
        };

        config.validate()?;
        Ok(config)
    }

    /// Resolved object-storage region (S3_REGION wins over AWS_REGION).
    pub fn region(&self) -> Option<&str> {
        self.s3_region.as_deref().or(self.aws_region.as_deref())
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if !self.database_url.starts_with("postgresql://")
            && !self.database_url.starts_with("postgres://")
        {
            return Err(anyhow::anyhow!(
                "DATABASE_URL must be a valid PostgreSQL connection string"
            ));
        }

        if self.s3_bucket.trim().is_empty() {
            return Err(anyhow::anyhow!("S3_BUCKET must not be empty"));
        }

        if self.region().is_none() {
            return Err(anyhow::anyhow!("S3_REGION or AWS_REGION must be set"));
        }

        if self.reconcile.max_upload_attempts < 1 {
            return Err(anyhow::anyhow!("MAX_UPLOAD_ATTEMPTS must be at least 1"));
        }

        if self.reconcile.batch_size < 1 {
            return Err(anyhow::anyhow!("RECONCILE_BATCH_SIZE must be at least 1"));
        }

        for (name, window) in [
            ("STUCK_UPLOAD_WINDOW_SECS", self.reconcile.stuck_upload_window),
            ("MISSING_EVENT_WINDOW_SECS", self.reconcile.missing_event_window),
            (
                "ORPHANED_INTENT_WINDOW_SECS",
                self.reconcile.orphaned_intent_window,
            ),
            ("RECONCILE_INTERVAL_SECS", self.schedule.reconcile_interval),
            (
                "ORPHAN_SWEEP_INTERVAL_SECS",
                self.schedule.orphan_sweep_interval,
            ),
        ] {
            if window.is_zero() {
                return Err(anyhow::anyhow!("{} must be greater than zero", name));
            }
        }

        Ok(())
    }
}
