//! Upstream APOD HTTP client + SQL record store.

use std::time::Duration;

use anyhow::Context;
use apod_core::{format_date, parse_date, ApodRecord, DateRange};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{AnyPool, Row};
use thiserror::Error;
use tracing::{debug, info_span, Instrument};

pub const CRATE_NAME: &str = "apod-storage";

pub const DEFAULT_API_BASE_URL: &str = "https://api.nasa.gov/planetary/apod";

/// Public rate-limited key accepted by the upstream API when none is configured.
pub const DEFAULT_API_KEY: &str = "DEMO_KEY";

#[derive(Debug, Clone)]
pub struct ApodClientConfig {
    pub base_url: String,
    pub api_key: String,
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

impl Default for ApodClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_BASE_URL.to_string(),
            api_key: DEFAULT_API_KEY.to_string(),
            timeout: Duration::from_secs(20),
            user_agent: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    /// Transport failure. The URL is stripped because its query carries the api key.
    #[error("request failed: {0}")]
    Request(reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("malformed response body: {0}")]
    Decode(#[from] serde_json::Error),
}

impl FetchError {
    /// Short failure category for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::Request(_) => "network",
            FetchError::HttpStatus { .. } => "status",
            FetchError::Decode(_) => "parse",
        }
    }
}

/// Where pictures come from. The production implementation is [`ApodClient`].
#[async_trait]
pub trait ApodSource: Send + Sync {
    /// The upstream's current picture; the upstream decides which day "today" is.
    async fn fetch_today(&self) -> Result<ApodRecord, FetchError>;

    async fn fetch_range(&self, range: DateRange) -> Result<Vec<ApodRecord>, FetchError>;
}

#[derive(Debug, Clone)]
pub struct ApodClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl ApodClient {
    pub fn new(config: ApodClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self {
            client,
            base_url: config.base_url,
            api_key: config.api_key,
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        params: &[(&'static str, String)],
    ) -> Result<T, FetchError> {
        let mut query = vec![("api_key", self.api_key.clone())];
        query.extend_from_slice(params);

        let resp = self
            .client
            .get(&self.base_url)
            .query(&query)
            .send()
            .await
            .map_err(|err| FetchError::Request(err.without_url()))?;
        let status = resp.status();
        if !status.is_success() {
            // the query string carries the api key
            let mut url = resp.url().clone();
            url.set_query(None);
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let body = resp
            .bytes()
            .await
            .map_err(|err| FetchError::Request(err.without_url()))?;
        debug!(bytes = body.len(), "upstream response received");
        Ok(serde_json::from_slice(&body)?)
    }
}

#[async_trait]
impl ApodSource for ApodClient {
    async fn fetch_today(&self) -> Result<ApodRecord, FetchError> {
        self.get_json(&[])
            .instrument(info_span!("apod_fetch", mode = "today"))
            .await
    }

    async fn fetch_range(&self, range: DateRange) -> Result<Vec<ApodRecord>, FetchError> {
        let start = format_date(range.start);
        let end = format_date(range.end);
        let span = info_span!("apod_fetch", mode = "range", start = %start, end = %end);
        self.get_json(&[("start_date", start), ("end_date", end)])
            .instrument(span)
            .await
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("unsupported database url scheme in {0:?}; expected sqlite: or postgres:")]
    UnsupportedBackend(String),
    #[error("stored date {value:?} is not YYYY-MM-DD")]
    InvalidDate {
        value: String,
        #[source]
        source: chrono::ParseError,
    },
}

/// Single-table persistence for picture records, keyed by date.
#[async_trait]
pub trait ApodRepository: Send + Sync {
    async fn exists(&self, date: NaiveDate) -> Result<bool, StoreError>;

    /// Insert unless a record with the same date is already stored.
    ///
    /// Returns the generated id, or `None` when the date was already present.
    async fn insert(&self, record: &ApodRecord) -> Result<Option<i64>, StoreError>;

    /// Every stored record, newest date first.
    async fn get_all(&self) -> Result<Vec<ApodRecord>, StoreError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlBackend {
    Sqlite,
    Postgres,
}

impl SqlBackend {
    pub fn from_url(database_url: &str) -> Result<Self, StoreError> {
        let scheme = database_url.split(':').next().unwrap_or_default();
        match scheme {
            "sqlite" => Ok(SqlBackend::Sqlite),
            "postgres" | "postgresql" => Ok(SqlBackend::Postgres),
            _ => Err(StoreError::UnsupportedBackend(scheme.to_string())),
        }
    }

    fn create_table_sql(self) -> &'static str {
        match self {
            SqlBackend::Sqlite => {
                r#"
                CREATE TABLE IF NOT EXISTS apod (
                    id              INTEGER PRIMARY KEY AUTOINCREMENT,
                    date            TEXT NOT NULL UNIQUE,
                    title           TEXT NOT NULL,
                    explanation     TEXT NOT NULL,
                    url             TEXT NOT NULL,
                    hd_url          TEXT,
                    media_type      TEXT NOT NULL,
                    service_version TEXT NOT NULL,
                    copyright       TEXT,
                    thumbnail_url   TEXT
                )
                "#
            }
            SqlBackend::Postgres => {
                r#"
                CREATE TABLE IF NOT EXISTS apod (
                    id              BIGSERIAL PRIMARY KEY,
                    date            TEXT NOT NULL UNIQUE,
                    title           TEXT NOT NULL,
                    explanation     TEXT NOT NULL,
                    url             TEXT NOT NULL,
                    hd_url          TEXT,
                    media_type      TEXT NOT NULL,
                    service_version TEXT NOT NULL,
                    copyright       TEXT,
                    thumbnail_url   TEXT
                )
                "#
            }
        }
    }
}

/// [`ApodRepository`] over sqlx's `Any` driver (SQLite or Postgres).
///
/// Dates are stored as `YYYY-MM-DD` text, so ordering by the column is
/// chronological on both backends.
#[derive(Debug, Clone)]
pub struct SqlApodRepository {
    pool: AnyPool,
    backend: SqlBackend,
}

impl SqlApodRepository {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        sqlx::any::install_default_drivers();
        let backend = SqlBackend::from_url(database_url)?;

        let options = if database_url.contains(":memory:") {
            // each connection to an in-memory SQLite database gets its own database
            AnyPoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None::<Duration>)
                .max_lifetime(None::<Duration>)
        } else {
            AnyPoolOptions::new().max_connections(5)
        };

        let pool = options.connect(database_url).await?;
        Ok(Self { pool, backend })
    }

    pub fn backend(&self) -> SqlBackend {
        self.backend
    }

    /// Create the `apod` table if it is missing.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(self.backend.create_table_sql())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn record_from_row(row: &AnyRow) -> Result<ApodRecord, StoreError> {
    let raw_date: String = row.try_get("date")?;
    let date = parse_date(&raw_date).map_err(|source| StoreError::InvalidDate {
        value: raw_date.clone(),
        source,
    })?;
    Ok(ApodRecord {
        date,
        title: row.try_get("title")?,
        explanation: row.try_get("explanation")?,
        url: row.try_get("url")?,
        hd_url: row.try_get("hd_url")?,
        media_type: row.try_get("media_type")?,
        service_version: row.try_get("service_version")?,
        copyright: row.try_get("copyright")?,
        thumbnail_url: row.try_get("thumbnail_url")?,
    })
}

#[async_trait]
impl ApodRepository for SqlApodRepository {
    async fn exists(&self, date: NaiveDate) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT id FROM apod WHERE date = $1 LIMIT 1")
            .bind(format_date(date))
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn insert(&self, record: &ApodRecord) -> Result<Option<i64>, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO apod (date, title, explanation, url, hd_url, media_type, service_version, copyright, thumbnail_url)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (date) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(record.date_key())
        .bind(record.title.clone())
        .bind(record.explanation.clone())
        .bind(record.url.clone())
        .bind(record.hd_url.clone())
        .bind(record.media_type.clone())
        .bind(record.service_version.clone())
        .bind(record.copyright.clone())
        .bind(record.thumbnail_url.clone())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let id: i64 = row.try_get("id")?;
                debug!(date = %record.date_key(), id, "apod record inserted");
                Ok(Some(id))
            }
            None => {
                debug!(date = %record.date_key(), "apod record already stored");
                Ok(None)
            }
        }
    }

    async fn get_all(&self) -> Result<Vec<ApodRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT date, title, explanation, url, hd_url, media_type, service_version, copyright, thumbnail_url
              FROM apod
             ORDER BY date DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(record_from_row).collect()
    }
}
