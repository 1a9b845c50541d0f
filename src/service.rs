#![forbid(unsafe_code)]

//! Gallery service: turns request-level filter/pagination parameters into
//! store queries and shapes the rows into the client-facing representation
//! (formatted duration and file size, absolute media URLs, pagination
//! metadata). The HTTP router stays a thin dispatch layer on top of this.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;
use chrono::{DateTime, NaiveDateTime};
use serde::Serialize;

use crate::store::{AnalyticsEvent, CategoryWithCount, GalleryStore, VideoFilter, VideoRow};

pub const DEFAULT_PAGE_SIZE: i64 = 12;
pub const MAX_PAGE_SIZE: i64 = 50;
pub const RELATED_LIMIT: i64 = 4;

/// Scheme and host of the inbound request, used to absolutize media paths.
#[derive(Debug, Clone)]
pub struct RequestOrigin {
    pub scheme: String,
    pub host: String,
}

impl RequestOrigin {
    pub fn new(scheme: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
            host: host.into(),
        }
    }

    /// `http://host/path` with a single slash between host and path. Empty
    /// stored paths stay absent rather than becoming a bare origin.
    pub fn full_url(&self, path: &str) -> Option<String> {
        if path.is_empty() {
            return None;
        }
        Some(format!(
            "{}://{}/{}",
            self.scheme,
            self.host,
            path.trim_start_matches('/')
        ))
    }
}

/// Raw, unclamped listing parameters as they arrived in the query string.
/// `featured` stays a string because the response echoes it verbatim.
#[derive(Debug, Clone, Default)]
pub struct ListParams {
    pub category: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub featured: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Pagination {
    pub current_page: i64,
    pub per_page: i64,
    pub total: i64,
    pub total_pages: i64,
    pub has_next: bool,
    pub has_prev: bool,
}

/// Filters echoed back to the client exactly as they were interpreted.
#[derive(Debug, Clone, Serialize)]
pub struct EchoedFilters {
    pub category: String,
    pub featured: Option<String>,
    pub status: String,
}

/// Listing projection of a video. The detail-only columns (file size, status,
/// audit fields) are deliberately absent here.
#[derive(Debug, Clone, Serialize)]
pub struct VideoSummary {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub slug: String,
    pub video_file: String,
    pub thumbnail: String,
    pub poster: String,
    pub category: String,
    pub featured: bool,
    pub duration: i64,
    pub duration_formatted: String,
    pub resolution: String,
    pub upload_date: String,
    pub views: i64,
    pub likes: i64,
    pub downloads: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seo_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seo_description: Option<String>,
    pub tags: Vec<String>,
    pub metadata: serde_json::Value,
    pub sort_order: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poster_url: Option<String>,
}

/// Full projection returned by the detail endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct VideoDetail {
    #[serde(flatten)]
    pub summary: VideoSummary,
    pub file_size: i64,
    pub file_size_formatted: String,
    pub last_modified: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VideoListing {
    pub videos: Vec<VideoSummary>,
    pub pagination: Pagination,
    pub filters: EchoedFilters,
}

#[derive(Debug, Clone)]
pub struct VideoWithRelated {
    pub video: VideoDetail,
    pub related: Vec<crate::store::RelatedVideoRow>,
}

/// Request metadata captured alongside a tracked event.
#[derive(Debug, Clone, Default)]
pub struct ClientContext {
    pub user_ip: String,
    pub user_agent: String,
    pub referrer: String,
    pub session_id: Option<String>,
}

pub struct VideoService {
    store: Arc<GalleryStore>,
}

impl VideoService {
    pub fn new(store: Arc<GalleryStore>) -> Self {
        Self { store }
    }

    /// Filtered, paginated listing. Page and limit are clamped here so the
    /// store never sees out-of-range values.
    pub async fn list_videos(
        &self,
        params: &ListParams,
        origin: &RequestOrigin,
    ) -> Result<VideoListing> {
        let category_raw = params
            .category
            .clone()
            .unwrap_or_else(|| "all".to_string());
        let status = params
            .status
            .clone()
            .unwrap_or_else(|| "published".to_string());
        let page = params.page.unwrap_or(1).max(1);
        let limit = params.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
        let offset = (page - 1) * limit;

        let filter = VideoFilter {
            category: if category_raw == "all" {
                None
            } else {
                Some(category_raw.clone())
            },
            // Any present value other than "true" filters for non-featured.
            featured: params.featured.as_deref().map(|value| value == "true"),
            status: status.clone(),
        };

        let rows = self.store.list_videos(&filter, limit, offset).await?;
        let total = self.store.count_videos(&filter).await?;
        let total_pages = if total == 0 { 0 } else { (total + limit - 1) / limit };

        Ok(VideoListing {
            videos: rows
                .into_iter()
                .map(|row| summarize(row, origin))
                .collect(),
            pagination: Pagination {
                current_page: page,
                per_page: limit,
                total,
                total_pages,
                has_next: page < total_pages,
                has_prev: page > 1,
            },
            filters: EchoedFilters {
                category: category_raw,
                featured: params.featured.clone(),
                status,
            },
        })
    }

    /// Published video by id with derived fields and up to four related
    /// videos. Increments the view counter once per successful fetch; the
    /// returned `views` value is the pre-increment reading.
    pub async fn get_video(
        &self,
        id: i64,
        origin: &RequestOrigin,
    ) -> Result<Option<VideoWithRelated>> {
        let Some(row) = self.store.get_published_video(id).await? else {
            return Ok(None);
        };

        self.store.increment_views(id).await?;
        let related = self
            .store
            .related_videos(&row.category, id, RELATED_LIMIT)
            .await?;

        let file_size = row.file_size;
        let last_modified = to_iso8601(&row.last_modified);
        let status = row.status.clone();
        let created_by = row.created_by.clone();
        Ok(Some(VideoWithRelated {
            video: VideoDetail {
                summary: summarize(row, origin),
                file_size,
                file_size_formatted: format_file_size(file_size),
                last_modified,
                status,
                created_by,
            },
            related,
        }))
    }

    pub async fn list_categories(&self) -> Result<Vec<CategoryWithCount>> {
        self.store.list_active_categories().await
    }

    /// Records one analytics event. `video_id` and `event_type` are required;
    /// validating their presence is the router's job since it owns the 400.
    pub async fn track_event(
        &self,
        video_id: i64,
        event_type: String,
        duration_watched: i64,
        client: ClientContext,
    ) -> Result<i64> {
        let event = AnalyticsEvent {
            video_id,
            device_type: detect_device_type(&client.user_agent).to_string(),
            browser: detect_browser(&client.user_agent).to_string(),
            event_type,
            user_ip: client.user_ip,
            user_agent: client.user_agent,
            referrer: client.referrer,
            session_id: client.session_id.unwrap_or_else(fallback_session_id),
            duration_watched,
        };
        self.store.insert_event(&event).await
    }
}

fn summarize(row: VideoRow, origin: &RequestOrigin) -> VideoSummary {
    VideoSummary {
        id: row.id,
        title: row.title,
        description: row.description,
        slug: row.slug,
        category: row.category,
        featured: row.featured,
        duration: row.duration,
        duration_formatted: format_duration(row.duration),
        resolution: row.resolution,
        upload_date: to_iso8601(&row.upload_date),
        views: row.views,
        likes: row.likes,
        downloads: row.downloads,
        seo_title: row.seo_title,
        seo_description: row.seo_description,
        tags: row.tags,
        metadata: row.metadata,
        sort_order: row.sort_order,
        video_url: origin.full_url(&row.video_file),
        thumbnail_url: origin.full_url(&row.thumbnail),
        poster_url: origin.full_url(&row.poster),
        video_file: row.video_file,
        thumbnail: row.thumbnail,
        poster: row.poster,
    }
}

/// `"M:SS"`; zero or negative durations render as `"0:00"`.
pub fn format_duration(seconds: i64) -> String {
    if seconds <= 0 {
        return "0:00".to_string();
    }
    format!("{}:{:02}", seconds / 60, seconds % 60)
}

/// Binary-prefix units, two decimals, trailing zeros dropped. The unit index
/// is `floor(log(bytes)/log(1024))` clamped to GB.
pub fn format_file_size(bytes: i64) -> String {
    if bytes <= 0 {
        return "0 B".to_string();
    }
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let exponent = ((bytes as f64).ln() / 1024f64.ln()).floor() as usize;
    let exponent = exponent.min(UNITS.len() - 1);
    let value = bytes as f64 / 1024f64.powi(exponent as i32);
    let rounded = (value * 100.0).round() / 100.0;
    format!("{} {}", rounded, UNITS[exponent])
}

/// Normalizes stored timestamps to ISO 8601. Unparseable values pass through
/// unchanged rather than failing a whole listing.
pub fn to_iso8601(raw: &str) -> String {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return parsed.to_rfc3339();
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return naive.and_utc().to_rfc3339();
    }
    if let Ok(date) = chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        if let Some(start) = date.and_hms_opt(0, 0, 0) {
            return start.and_utc().to_rfc3339();
        }
    }
    raw.to_string()
}

/// Tablet patterns are checked before mobile so "iPad" does not get swallowed
/// by the mobile branch.
pub fn detect_device_type(user_agent: &str) -> &'static str {
    let lowered = user_agent.to_ascii_lowercase();
    if lowered.contains("tablet") || lowered.contains("ipad") {
        "tablet"
    } else if lowered.contains("mobile")
        || lowered.contains("android")
        || lowered.contains("iphone")
    {
        "mobile"
    } else {
        "desktop"
    }
}

/// First substring match wins; Chromium-based Edge therefore reports as
/// Chrome, matching the site's historical analytics.
pub fn detect_browser(user_agent: &str) -> &'static str {
    if user_agent.contains("Chrome") {
        "Chrome"
    } else if user_agent.contains("Firefox") {
        "Firefox"
    } else if user_agent.contains("Safari") {
        "Safari"
    } else if user_agent.contains("Edge") {
        "Edge"
    } else {
        "Other"
    }
}

/// Header precedence for the client address: Client-IP, then X-Forwarded-For,
/// then the peer address of the connection itself.
pub fn resolve_client_ip(
    client_ip: Option<&str>,
    forwarded_for: Option<&str>,
    peer: Option<&str>,
) -> String {
    for candidate in [client_ip, forwarded_for, peer] {
        if let Some(value) = candidate {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                return trimmed.to_string();
            }
        }
    }
    "0.0.0.0".to_string()
}

/// Session ids are normally supplied by the client; when absent we derive one
/// from the clock, the same shape PHP's `uniqid()` produced.
pub fn fallback_session_id() -> String {
    let micros = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_micros())
        .unwrap_or(0);
    format!("{micros:x}")
}
