//! Sync orchestration: fetch pictures upstream, skip dates already archived,
//! persist the rest.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use apod_core::{validate_sync_range, ApodRecord, DateRange, RangeError};
use apod_storage::{
    ApodClient, ApodClientConfig, ApodRepository, ApodSource, SqlApodRepository,
    DEFAULT_API_BASE_URL, DEFAULT_API_KEY,
};
use chrono::NaiveDate;
use serde::Serialize;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "apod-sync";

pub const DEFAULT_DATABASE_URL: &str = "sqlite://apod.db?mode=rwc";

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub database_url: String,
    pub client: ApodClientConfig,
}

impl SyncConfig {
    pub fn from_env() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string()),
            client: ApodClientConfig {
                base_url: std::env::var("APOD_API_URL")
                    .unwrap_or_else(|_| DEFAULT_API_BASE_URL.to_string()),
                api_key: std::env::var("NASA_API_KEY")
                    .ok()
                    .filter(|v| !v.trim().is_empty())
                    .unwrap_or_else(|| DEFAULT_API_KEY.to_string()),
                timeout: Duration::from_secs(
                    std::env::var("APOD_HTTP_TIMEOUT_SECS")
                        .ok()
                        .and_then(|v| v.parse().ok())
                        .unwrap_or(20),
                ),
                user_agent: Some(
                    std::env::var("APOD_USER_AGENT")
                        .unwrap_or_else(|_| "apod-archive/0.1".to_string()),
                ),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Error,
}

/// User-facing status line shown on the browse view after a sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub text: String,
}

impl Notice {
    pub fn info(text: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            text: text.into(),
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    Saved(ApodRecord),
    AlreadyStored(ApodRecord),
    FetchFailed,
    RangeSynced {
        range: DateRange,
        fetched: usize,
        saved: usize,
    },
    RangeFetchFailed {
        range: DateRange,
    },
    RangeRejected(RangeError),
}

impl SyncOutcome {
    pub fn notice(&self) -> Notice {
        match self {
            SyncOutcome::Saved(record) => Notice::info(format!("Saved: {}", record.title)),
            SyncOutcome::AlreadyStored(record) => Notice::info(format!(
                "The picture for {} is already in the archive.",
                record.date_key()
            )),
            SyncOutcome::FetchFailed => {
                Notice::error("Could not fetch today's picture from the APOD API.")
            }
            SyncOutcome::RangeSynced { fetched, saved, .. } => Notice::info(format!(
                "Saved {saved} new picture(s) out of {fetched} fetched."
            )),
            SyncOutcome::RangeFetchFailed { range } => Notice::error(format!(
                "Could not fetch pictures for {range} from the APOD API."
            )),
            SyncOutcome::RangeRejected(err) => Notice::error(format!("Rejected: {err}.")),
        }
    }

    /// Range the browse view should be filtered to after this sync.
    pub fn browse_range(&self) -> Option<DateRange> {
        match self {
            SyncOutcome::Saved(record) | SyncOutcome::AlreadyStored(record) => {
                Some(DateRange::single(record.date))
            }
            SyncOutcome::RangeSynced { range, .. } | SyncOutcome::RangeFetchFailed { range } => {
                Some(*range)
            }
            SyncOutcome::FetchFailed | SyncOutcome::RangeRejected(_) => None,
        }
    }
}

pub struct SyncService {
    source: Arc<dyn ApodSource>,
    repository: Arc<dyn ApodRepository>,
}

impl SyncService {
    pub fn new(source: Arc<dyn ApodSource>, repository: Arc<dyn ApodRepository>) -> Self {
        Self { source, repository }
    }

    pub fn repository(&self) -> Arc<dyn ApodRepository> {
        Arc::clone(&self.repository)
    }

    /// Fetch the upstream's current picture and archive it unless its date is known.
    pub async fn sync_today(&self) -> Result<SyncOutcome> {
        let run_id = Uuid::new_v4();
        self.store_today()
            .instrument(info_span!("sync_today", %run_id))
            .await
    }

    async fn store_today(&self) -> Result<SyncOutcome> {
        let record = match self.source.fetch_today().await {
            Ok(record) => record,
            Err(err) => {
                warn!(kind = err.kind(), error = %err, "fetching today's picture failed");
                return Ok(SyncOutcome::FetchFailed);
            }
        };

        let inserted = self
            .repository
            .insert(&record)
            .await
            .with_context(|| format!("storing picture for {}", record.date_key()))?;

        match inserted {
            Some(id) => {
                info!(date = %record.date_key(), id, "saved today's picture");
                Ok(SyncOutcome::Saved(record))
            }
            None => {
                info!(date = %record.date_key(), "today's picture already stored");
                Ok(SyncOutcome::AlreadyStored(record))
            }
        }
    }

    /// Fetch every picture in `[start, end]` and archive the dates not yet stored.
    ///
    /// Inverted ranges and spans over 30 days are rejected before any upstream call.
    pub async fn sync_range(&self, start: NaiveDate, end: NaiveDate) -> Result<SyncOutcome> {
        let range = match validate_sync_range(start, end) {
            Ok(range) => range,
            Err(err) => {
                warn!(%start, %end, error = %err, "range sync rejected");
                return Ok(SyncOutcome::RangeRejected(err));
            }
        };

        let run_id = Uuid::new_v4();
        self.store_range(range)
            .instrument(info_span!("sync_range", %run_id, %range))
            .await
    }

    async fn store_range(&self, range: DateRange) -> Result<SyncOutcome> {
        let records = match self.source.fetch_range(range).await {
            Ok(records) => records,
            Err(err) => {
                warn!(kind = err.kind(), error = %err, "fetching picture range failed");
                return Ok(SyncOutcome::RangeFetchFailed { range });
            }
        };

        let fetched = records.len();
        let mut saved = 0usize;
        for record in &records {
            let inserted = self
                .repository
                .insert(record)
                .await
                .with_context(|| format!("storing picture for {}", record.date_key()))?;
            if inserted.is_some() {
                saved += 1;
            }
        }

        info!(fetched, saved, "range sync complete");
        Ok(SyncOutcome::RangeSynced {
            range,
            fetched,
            saved,
        })
    }
}

/// Connect the store (creating its table) and the upstream client described by `config`.
pub async fn build_from_config(config: &SyncConfig) -> Result<SyncService> {
    let repository = SqlApodRepository::connect(&config.database_url)
        .await
        .context("connecting to database")?;
    repository.migrate().await.context("creating apod table")?;
    let client = ApodClient::new(config.client.clone())?;
    Ok(SyncService::new(Arc::new(client), Arc::new(repository)))
}
