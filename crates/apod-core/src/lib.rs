//! Core domain model for the APOD archive: the picture record, date ranges and
//! the paginated browse view.

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CRATE_NAME: &str = "apod-core";

/// Wire and storage format for record dates.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Records shown per browse page.
pub const PAGE_SIZE: usize = 12;

/// Longest span (in days between start and end) a single range sync may request.
pub const MAX_SYNC_SPAN_DAYS: i64 = 30;

/// One day's astronomy picture, shaped like the upstream JSON object.
///
/// `date` is the natural key. Only `hd_url`, `copyright` and `thumbnail_url`
/// are optional; missing string fields from upstream decode as empty strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApodRecord {
    pub date: NaiveDate,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub explanation: String,
    #[serde(default)]
    pub url: String,
    #[serde(default, rename = "hdurl")]
    pub hd_url: Option<String>,
    #[serde(default)]
    pub media_type: String,
    #[serde(default)]
    pub service_version: String,
    #[serde(default)]
    pub copyright: Option<String>,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
}

impl ApodRecord {
    pub fn date_key(&self) -> String {
        format_date(self.date)
    }

    pub fn is_video(&self) -> bool {
        self.media_type.eq_ignore_ascii_case("video")
    }
}

pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

pub fn parse_date(input: &str) -> Result<NaiveDate, chrono::ParseError> {
    NaiveDate::parse_from_str(input.trim(), DATE_FORMAT)
}

/// Inclusive calendar date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    pub fn single(date: NaiveDate) -> Self {
        Self {
            start: date,
            end: date,
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }

    /// Whole days between `start` and `end`; a single-day range spans 0.
    pub fn span_days(&self) -> i64 {
        (self.end - self.start).num_days()
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} to {}", format_date(self.start), format_date(self.end))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RangeError {
    #[error("start date {start} is after end date {end}")]
    Inverted { start: NaiveDate, end: NaiveDate },
    #[error("date range spans {days} days; at most {max} are allowed", max = MAX_SYNC_SPAN_DAYS)]
    TooLong { days: i64 },
}

/// Validate a range sync request before anything touches the upstream API.
pub fn validate_sync_range(start: NaiveDate, end: NaiveDate) -> Result<DateRange, RangeError> {
    if start > end {
        return Err(RangeError::Inverted { start, end });
    }
    let range = DateRange::new(start, end);
    let days = range.span_days();
    if days > MAX_SYNC_SPAN_DAYS {
        return Err(RangeError::TooLong { days });
    }
    Ok(range)
}

/// One page of the browse view plus the metadata needed to render its pager.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BrowsePage {
    pub records: Vec<ApodRecord>,
    pub current_page: usize,
    pub total_pages: usize,
    pub total_items: usize,
    pub range: Option<DateRange>,
}

impl BrowsePage {
    pub fn has_previous(&self) -> bool {
        self.current_page > 1
    }

    pub fn has_next(&self) -> bool {
        self.current_page < self.total_pages
    }
}

/// Filter `all` (already newest-first) to `range` and cut out the requested page.
///
/// `requested_page` is clamped into `[1, total_pages]`; an empty result still
/// reports page 1 with `total_pages == 0`.
pub fn browse(all: Vec<ApodRecord>, range: Option<DateRange>, requested_page: i64) -> BrowsePage {
    let filtered = match range {
        Some(range) => all
            .into_iter()
            .filter(|r| range.contains(r.date))
            .collect::<Vec<_>>(),
        None => all,
    };

    let total_items = filtered.len();
    let total_pages = total_items.div_ceil(PAGE_SIZE);
    let last_page = total_pages.max(1) as i64;
    let current_page = requested_page.clamp(1, last_page) as usize;
    let start = (current_page - 1) * PAGE_SIZE;
    let records = filtered
        .into_iter()
        .skip(start)
        .take(PAGE_SIZE)
        .collect::<Vec<_>>();

    BrowsePage {
        records,
        current_page,
        total_pages,
        total_items,
        range,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        parse_date(s).unwrap()
    }

    fn record(day: NaiveDate) -> ApodRecord {
        ApodRecord {
            date: day,
            title: format!("Picture for {}", format_date(day)),
            explanation: "stars".into(),
            url: format!("https://apod.example/{}.jpg", format_date(day)),
            hd_url: None,
            media_type: "image".into(),
            service_version: "v1".into(),
            copyright: None,
            thumbnail_url: None,
        }
    }

    /// `count` consecutive days from 2024-01-01, newest first.
    fn newest_first(count: usize) -> Vec<ApodRecord> {
        let first = date("2024-01-01");
        let mut out = (0..count)
            .map(|i| record(first + chrono::Days::new(i as u64)))
            .collect::<Vec<_>>();
        out.reverse();
        out
    }

    #[test]
    fn total_pages_and_clamping_follow_page_size() {
        let cases = [(0, 0), (1, 1), (12, 1), (13, 2), (24, 2)];
        for (items, pages) in cases {
            let page = browse(newest_first(items), None, 1);
            assert_eq!(page.total_pages, pages, "{items} items");
            assert_eq!(page.total_items, items);
            assert_eq!(page.current_page, 1);
        }

        let page = browse(newest_first(13), None, 5);
        assert_eq!(page.current_page, 2);
        assert_eq!(page.records.len(), 1);

        let page = browse(newest_first(13), None, 0);
        assert_eq!(page.current_page, 1);
        assert_eq!(page.records.len(), PAGE_SIZE);

        let page = browse(Vec::new(), None, 7);
        assert_eq!(page.current_page, 1);
        assert!(page.records.is_empty());
        assert!(!page.has_previous());
        assert!(!page.has_next());
    }

    #[test]
    fn second_page_continues_where_first_stopped() {
        let all = newest_first(24);
        let first = browse(all.clone(), None, 1);
        let second = browse(all.clone(), None, 2);
        assert_eq!(first.records.last().unwrap().date, date("2024-01-13"));
        assert_eq!(second.records.first().unwrap().date, date("2024-01-12"));
        assert!(first.has_next());
        assert!(second.has_previous());
        assert!(!second.has_next());
    }

    #[test]
    fn date_filter_is_inclusive_and_keeps_order() {
        let range = DateRange::new(date("2024-01-03"), date("2024-01-05"));
        let page = browse(newest_first(10), Some(range), 1);
        let dates = page.records.iter().map(ApodRecord::date_key).collect::<Vec<_>>();
        assert_eq!(dates, vec!["2024-01-05", "2024-01-04", "2024-01-03"]);
        assert_eq!(page.total_pages, 1);
        assert_eq!(page.range, Some(range));
    }

    #[test]
    fn sync_range_validation() {
        let start = date("2024-01-01");
        assert_eq!(
            validate_sync_range(date("2024-01-02"), start),
            Err(RangeError::Inverted {
                start: date("2024-01-02"),
                end: start
            })
        );
        assert_eq!(
            validate_sync_range(start, date("2024-02-01")),
            Err(RangeError::TooLong { days: 31 })
        );
        let ok = validate_sync_range(start, date("2024-01-31")).unwrap();
        assert_eq!(ok.span_days(), 30);
        assert!(validate_sync_range(start, start).is_ok());
    }

    #[test]
    fn record_decodes_upstream_shape() {
        let json = r#"{
            "date": "2024-03-14",
            "title": "Pi Nebula",
            "explanation": "A nebula.",
            "url": "https://apod.example/pi.jpg",
            "hdurl": "https://apod.example/pi_hd.jpg",
            "media_type": "image",
            "service_version": "v1",
            "copyright": null
        }"#;
        let rec: ApodRecord = serde_json::from_str(json).unwrap();
        assert_eq!(rec.date_key(), "2024-03-14");
        assert_eq!(rec.hd_url.as_deref(), Some("https://apod.example/pi_hd.jpg"));
        assert_eq!(rec.copyright, None);
        assert_eq!(rec.thumbnail_url, None);
        assert!(!rec.is_video());

        let encoded = serde_json::to_value(&rec).unwrap();
        assert_eq!(encoded["date"], "2024-03-14");
        assert_eq!(encoded["hdurl"], "https://apod.example/pi_hd.jpg");
    }

    #[test]
    fn range_display_uses_iso_dates() {
        let range = DateRange::new(date("2024-01-03"), date("2024-01-05"));
        assert_eq!(range.to_string(), "2024-01-03 to 2024-01-05");
    }
}
