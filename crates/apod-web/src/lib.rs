//! Axum + Askama browse UI and sync endpoints for the APOD archive.

use std::sync::Arc;

use apod_core::{browse, format_date, parse_date, ApodRecord, BrowsePage, DateRange};
use apod_sync::{Notice, NoticeLevel, SyncOutcome, SyncService};
use askama::Template;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
    Form, Json, Router,
};
use chrono::NaiveDate;
use serde::Deserialize;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

pub const CRATE_NAME: &str = "apod-web";

#[derive(Clone)]
pub struct AppState {
    pub sync: Arc<SyncService>,
}

impl AppState {
    pub fn new(sync: SyncService) -> Self {
        Self {
            sync: Arc::new(sync),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WebConfig {
    pub host: String,
    pub port: u16,
}

impl WebConfig {
    pub fn from_env() -> Self {
        Self {
            host: std::env::var("APOD_WEB_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: std::env::var("APOD_WEB_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8000),
        }
    }
}

/// Browse query. Date inputs from HTML forms arrive as empty strings when unset.
#[derive(Debug, Deserialize, Default)]
struct BrowseQuery {
    #[serde(rename = "startDate")]
    start_date: Option<String>,
    #[serde(rename = "endDate")]
    end_date: Option<String>,
    page: Option<String>,
    notice: Option<String>,
    error: Option<String>,
}

impl BrowseQuery {
    fn range(&self) -> Result<Option<DateRange>, String> {
        let start = non_empty(&self.start_date);
        let end = non_empty(&self.end_date);
        let (Some(start), Some(end)) = (start, end) else {
            return Ok(None);
        };
        let start = parse_date(start).map_err(|_| format!("invalid startDate {start:?}"))?;
        let end = parse_date(end).map_err(|_| format!("invalid endDate {end:?}"))?;
        Ok(Some(DateRange::new(start, end)))
    }

    fn page(&self) -> Result<i64, String> {
        match non_empty(&self.page) {
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|_| format!("invalid page {raw:?}")),
            None => Ok(1),
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}

#[derive(Debug, Deserialize)]
struct FetchRangeForm {
    #[serde(rename = "startDate", default)]
    start_date: String,
    #[serde(rename = "endDate", default)]
    end_date: String,
}

struct PictureView {
    date: String,
    title: String,
    explanation: String,
    image_url: String,
    link_url: String,
    is_video: bool,
    copyright: Option<String>,
}

impl From<ApodRecord> for PictureView {
    fn from(record: ApodRecord) -> Self {
        let is_video = record.is_video();
        let image_url = if is_video {
            record.thumbnail_url.clone().unwrap_or_default()
        } else {
            record.url.clone()
        };
        Self {
            date: record.date_key(),
            link_url: record.hd_url.clone().unwrap_or_else(|| record.url.clone()),
            copyright: record
                .copyright
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty()),
            title: record.title,
            explanation: record.explanation,
            image_url,
            is_video,
        }
    }
}

#[derive(Template)]
#[template(path = "index.html")]
struct IndexTemplate {
    pictures: Vec<PictureView>,
    current_page: usize,
    total_pages: usize,
    total_items: usize,
    filtered_range: Option<String>,
    start_date: String,
    end_date: String,
    prev_href: Option<String>,
    next_href: Option<String>,
    notice: Option<String>,
    error: Option<String>,
}

impl IndexTemplate {
    fn new(page: BrowsePage, query: &BrowseQuery) -> Self {
        let prev_href = page
            .has_previous()
            .then(|| page_href(page.current_page - 1, page.range));
        let next_href = page
            .has_next()
            .then(|| page_href(page.current_page + 1, page.range));
        Self {
            current_page: page.current_page,
            total_pages: page.total_pages,
            total_items: page.total_items,
            filtered_range: page.range.map(|r| r.to_string()),
            start_date: form_value(page.range.map(|r| r.start), &query.start_date),
            end_date: form_value(page.range.map(|r| r.end), &query.end_date),
            prev_href,
            next_href,
            notice: non_empty(&query.notice).map(ToString::to_string),
            error: non_empty(&query.error).map(ToString::to_string),
            pictures: page.records.into_iter().map(PictureView::from).collect(),
        }
    }
}

/// A lone start or end date does not filter, but stays in the form as typed.
fn form_value(applied: Option<NaiveDate>, raw: &Option<String>) -> String {
    match applied {
        Some(day) => format_date(day),
        None => non_empty(raw).map(|v| v.trim().to_string()).unwrap_or_default(),
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/fetch-today", post(fetch_today_handler))
        .route("/fetch-range", post(fetch_range_handler))
        .route("/api/apods", get(api_apods_handler))
        .route("/healthz", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

pub async fn serve(config: WebConfig, sync: SyncService) -> anyhow::Result<()> {
    let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
    info!(addr = %listener.local_addr()?, "apod web listening");
    axum::serve(listener, app(AppState::new(sync))).await?;
    Ok(())
}

async fn index_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<BrowseQuery>,
) -> Response {
    match load_page(&state, &query).await {
        Ok(page) => render_html(IndexTemplate::new(page, &query)),
        Err(resp) => resp,
    }
}

async fn api_apods_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<BrowseQuery>,
) -> Response {
    match load_page(&state, &query).await {
        Ok(page) => Json(page).into_response(),
        Err(resp) => resp,
    }
}

async fn fetch_today_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.sync.sync_today().await {
        Ok(outcome) => redirect_after(&outcome),
        Err(err) => {
            error!(error = %format!("{err:#}"), "sync today failed");
            browse_redirect(&Notice::error("Saving today's picture failed."), None)
        }
    }
}

async fn fetch_range_handler(
    State(state): State<Arc<AppState>>,
    Form(form): Form<FetchRangeForm>,
) -> Response {
    let (Ok(start), Ok(end)) = (parse_date(&form.start_date), parse_date(&form.end_date)) else {
        return browse_redirect(
            &Notice::error("Start and end dates must be given as YYYY-MM-DD."),
            None,
        );
    };
    match state.sync.sync_range(start, end).await {
        Ok(outcome) => redirect_after(&outcome),
        Err(err) => {
            error!(error = %format!("{err:#}"), "range sync failed");
            browse_redirect(
                &Notice::error("Saving the fetched pictures failed."),
                Some(DateRange::new(start, end)),
            )
        }
    }
}

async fn health_handler() -> &'static str {
    "ok"
}

async fn load_page(state: &AppState, query: &BrowseQuery) -> Result<BrowsePage, Response> {
    let range = query.range().map_err(bad_request)?;
    let page = query.page().map_err(bad_request)?;
    let all = state
        .sync
        .repository()
        .get_all()
        .await
        .map_err(|err| server_error(err.into()))?;
    Ok(browse(all, range, page))
}

fn redirect_after(outcome: &SyncOutcome) -> Response {
    browse_redirect(&outcome.notice(), outcome.browse_range())
}

fn browse_redirect(notice: &Notice, range: Option<DateRange>) -> Response {
    let mut params = range_params(range);
    let key = match notice.level {
        NoticeLevel::Info => "notice",
        NoticeLevel::Error => "error",
    };
    params.push((key, notice.text.clone()));
    Redirect::to(&format!("/?{}", encode_query(&params))).into_response()
}

fn page_href(page: usize, range: Option<DateRange>) -> String {
    let mut params = vec![("page", page.to_string())];
    params.extend(range_params(range));
    format!("/?{}", encode_query(&params))
}

fn range_params(range: Option<DateRange>) -> Vec<(&'static str, String)> {
    match range {
        Some(r) => vec![
            ("startDate", format_date(r.start)),
            ("endDate", format_date(r.end)),
        ],
        None => Vec::new(),
    }
}

fn encode_query(params: &[(&str, String)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{k}={}", urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

fn render_html<T: Template>(tpl: T) -> Response {
    match tpl.render() {
        Ok(html) => Html(html).into_response(),
        Err(err) => server_error(anyhow::anyhow!(err.to_string())),
    }
}

fn bad_request(message: String) -> Response {
    (StatusCode::BAD_REQUEST, Html(format!("Bad request: {message}"))).into_response()
}

fn server_error(err: anyhow::Error) -> Response {
    error!(error = %format!("{err:#}"), "request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Html("Server error".to_string()),
    )
        .into_response()
}
