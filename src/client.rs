#![forbid(unsafe_code)]

//! Consumer-side gallery client. Probes the backend once on first use and
//! then serves every read either live over HTTP or from an embedded snapshot
//! of the gallery, with a shared TTL cache in front of both paths. A live
//! failure demotes the client to fallback mode; it re-probes the backend at
//! most once per interval after that.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5 * 60);
const DEFAULT_REPROBE_AFTER: Duration = Duration::from_secs(60);
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Where the next read will be answered from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterMode {
    /// No probe has run yet; the first read decides.
    Probing,
    Live,
    Fallback,
}

/// Minimal HTTP surface the client needs, kept as a trait so tests can swap
/// the network out.
pub trait Transport: Send + Sync {
    fn get_json(&self, url: &str) -> Result<Value>;
    fn post_json(&self, url: &str, body: &Value) -> Result<Value>;
}

/// `ureq`-backed transport with a bounded request timeout.
pub struct HttpTransport {
    agent: ureq::Agent,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(HTTP_TIMEOUT).build(),
        }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for HttpTransport {
    fn get_json(&self, url: &str) -> Result<Value> {
        self.agent
            .get(url)
            .set("Accept", "application/json")
            .call()
            .with_context(|| format!("GET {url}"))?
            .into_json()
            .with_context(|| format!("decoding response from {url}"))
    }

    fn post_json(&self, url: &str, body: &Value) -> Result<Value> {
        self.agent
            .post(url)
            .send_json(body)
            .with_context(|| format!("POST {url}"))?
            .into_json()
            .with_context(|| format!("decoding response from {url}"))
    }
}

/// Video record in the shape page scripts consume: URLs already resolved,
/// duration pre-formatted.
#[derive(Debug, Clone, Serialize)]
pub struct GalleryVideo {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub thumbnail: String,
    pub video: String,
    pub poster: String,
    pub category: String,
    pub featured: bool,
    pub duration: i64,
    pub duration_formatted: String,
    pub views: i64,
    pub likes: i64,
    pub downloads: i64,
    pub upload_date: String,
    pub tags: Vec<String>,
    pub metadata: Value,
    pub seo_title: Option<String>,
    pub seo_description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageInfo {
    pub current_page: i64,
    pub per_page: i64,
    pub total: i64,
    pub total_pages: i64,
    pub has_next: bool,
    pub has_prev: bool,
}

#[derive(Debug, Clone)]
pub struct VideoPage {
    pub videos: Vec<GalleryVideo>,
    pub pagination: PageInfo,
    pub total: i64,
    pub has_more: bool,
}

#[derive(Debug, Clone)]
pub struct VideoLookup {
    pub video: GalleryVideo,
    pub related: Vec<GalleryVideo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryInfo {
    pub id: i64,
    pub name: String,
    pub slug: String,
    #[serde(default)]
    pub description: String,
    pub color: String,
    pub icon: String,
    #[serde(default)]
    pub sort_order: i64,
    pub video_count: i64,
}

/// Listing request. `category: None` means all categories; `featured: None`
/// means no featured filter.
#[derive(Debug, Clone)]
pub struct ListQuery {
    pub category: Option<String>,
    pub page: i64,
    pub limit: i64,
    pub featured: Option<bool>,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            category: None,
            page: 1,
            limit: 12,
            featured: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheStats {
    pub entries: usize,
    pub keys: Vec<String>,
    pub mode: AdapterMode,
}

struct ModeState {
    mode: AdapterMode,
    last_probe: Instant,
}

#[derive(Clone)]
enum CachedValue {
    Page(VideoPage),
    Lookup(VideoLookup),
    Categories(Vec<CategoryInfo>),
}

struct CacheEntry {
    value: CachedValue,
    stored_at: Instant,
}

pub struct GalleryClient {
    base_url: String,
    transport: Box<dyn Transport>,
    cache_ttl: Duration,
    reprobe_after: Duration,
    state: Mutex<ModeState>,
    cache: Mutex<HashMap<String, CacheEntry>>,
}

impl GalleryClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_transport(base_url, Box::new(HttpTransport::new()))
    }

    pub fn with_transport(base_url: impl Into<String>, transport: Box<dyn Transport>) -> Self {
        Self {
            base_url: base_url.into(),
            transport,
            cache_ttl: DEFAULT_CACHE_TTL,
            reprobe_after: DEFAULT_REPROBE_AFTER,
            state: Mutex::new(ModeState {
                mode: AdapterMode::Probing,
                last_probe: Instant::now(),
            }),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn with_reprobe_after(mut self, interval: Duration) -> Self {
        self.reprobe_after = interval;
        self
    }

    /// Paginated listing, from cache when fresh, otherwise live or from the
    /// embedded snapshot depending on the current mode.
    pub fn videos(&self, query: &ListQuery, force_refresh: bool) -> Result<VideoPage> {
        let key = format!(
            "videos_{}_{}_{}_{}",
            query.category.as_deref().unwrap_or("all"),
            query.page,
            query.limit,
            query
                .featured
                .map(|flag| flag.to_string())
                .unwrap_or_else(|| "any".to_string()),
        );
        if !force_refresh {
            if let Some(CachedValue::Page(page)) = self.cache_get(&key) {
                return Ok(page);
            }
        }

        let page = match self.current_mode() {
            AdapterMode::Live => match self.videos_live(query) {
                Ok(page) => page,
                Err(err) => {
                    self.demote(err);
                    fallback_page(query)
                }
            },
            _ => fallback_page(query),
        };
        self.cache_put(key, CachedValue::Page(page.clone()));
        Ok(page)
    }

    /// Single video with its related set. In fallback mode an unknown id is
    /// an error, mirroring the live 404.
    pub fn video(&self, id: i64, force_refresh: bool) -> Result<VideoLookup> {
        let key = format!("video_{id}");
        if !force_refresh {
            if let Some(CachedValue::Lookup(lookup)) = self.cache_get(&key) {
                return Ok(lookup);
            }
        }

        let lookup = match self.current_mode() {
            AdapterMode::Live => match self.video_live(id) {
                Ok(lookup) => lookup,
                Err(err) => {
                    self.demote(err);
                    fallback_lookup(id)?
                }
            },
            _ => fallback_lookup(id)?,
        };
        self.cache_put(key, CachedValue::Lookup(lookup.clone()));
        Ok(lookup)
    }

    pub fn categories(&self, force_refresh: bool) -> Result<Vec<CategoryInfo>> {
        let key = "categories".to_string();
        if !force_refresh {
            if let Some(CachedValue::Categories(categories)) = self.cache_get(&key) {
                return Ok(categories);
            }
        }

        let categories = match self.current_mode() {
            AdapterMode::Live => match self.categories_live() {
                Ok(categories) => categories,
                Err(err) => {
                    self.demote(err);
                    fallback_categories()
                }
            },
            _ => fallback_categories(),
        };
        self.cache_put(key, CachedValue::Categories(categories.clone()));
        Ok(categories)
    }

    /// Fire-and-forget analytics. Delivery failures are logged, never
    /// surfaced, and never demote the client.
    pub fn track(&self, video_id: i64, event_type: &str, duration_watched: Option<i64>) {
        match self.current_mode() {
            AdapterMode::Live => {
                let mut body = serde_json::json!({
                    "video_id": video_id,
                    "event_type": event_type,
                });
                if let Some(watched) = duration_watched {
                    body["duration_watched"] = Value::from(watched);
                }
                let url = format!("{}?action=track", self.base_url);
                if let Err(err) = self.transport.post_json(&url, &body) {
                    tracing::warn!("event delivery failed: {err:#}");
                }
            }
            _ => {
                tracing::info!(video_id, event_type, "event tracked locally");
            }
        }
    }

    pub fn mode(&self) -> AdapterMode {
        self.state.lock().mode
    }

    pub fn clear_cache(&self) {
        self.cache.lock().clear();
    }

    pub fn cache_stats(&self) -> CacheStats {
        let cache = self.cache.lock();
        CacheStats {
            entries: cache.len(),
            keys: cache.keys().cloned().collect(),
            mode: self.mode(),
        }
    }

    /// Resolves the mode the next read should use, probing when the state
    /// calls for it. Fallback mode re-probes at most once per interval.
    fn current_mode(&self) -> AdapterMode {
        let mut state = self.state.lock();
        let due = match state.mode {
            AdapterMode::Probing => true,
            AdapterMode::Fallback => state.last_probe.elapsed() >= self.reprobe_after,
            AdapterMode::Live => false,
        };
        if due {
            state.mode = self.probe();
            state.last_probe = Instant::now();
        }
        state.mode
    }

    fn probe(&self) -> AdapterMode {
        let url = format!("{}?limit=1", self.base_url);
        match self.transport.get_json(&url) {
            Ok(body) if body["success"] == Value::Bool(true) => {
                tracing::debug!("backend reachable, serving live data");
                AdapterMode::Live
            }
            Ok(_) => {
                tracing::info!("backend answered without success flag, using fallback data");
                AdapterMode::Fallback
            }
            Err(err) => {
                tracing::info!("backend unreachable, using fallback data: {err:#}");
                AdapterMode::Fallback
            }
        }
    }

    fn demote(&self, err: anyhow::Error) {
        tracing::warn!("live request failed, switching to fallback data: {err:#}");
        let mut state = self.state.lock();
        state.mode = AdapterMode::Fallback;
        state.last_probe = Instant::now();
    }

    fn videos_live(&self, query: &ListQuery) -> Result<VideoPage> {
        let mut params = Vec::new();
        if let Some(category) = &query.category {
            if category != "all" {
                params.push(format!("category={category}"));
            }
        }
        params.push(format!("page={}", query.page));
        params.push(format!("limit={}", query.limit));
        if let Some(featured) = query.featured {
            params.push(format!("featured={featured}"));
        }
        let url = format!("{}?{}", self.base_url, params.join("&"));

        let body = self.transport.get_json(&url)?;
        ensure_success(&body)?;
        let videos = body["data"]
            .as_array()
            .context("listing payload missing data array")?
            .iter()
            .map(transform_api_video)
            .collect::<Result<Vec<_>>>()?;
        let pagination: PageInfo = serde_json::from_value(body["pagination"].clone())
            .context("listing payload missing pagination")?;
        Ok(VideoPage {
            total: pagination.total,
            has_more: pagination.has_next,
            videos,
            pagination,
        })
    }

    fn video_live(&self, id: i64) -> Result<VideoLookup> {
        let url = format!("{}?id={id}", self.base_url);
        let body = self.transport.get_json(&url)?;
        ensure_success(&body)?;
        let video = transform_api_video(&body["data"])?;
        let related = body["related"]
            .as_array()
            .map(|entries| entries.iter().map(transform_api_video).collect())
            .transpose()?
            .unwrap_or_default();
        Ok(VideoLookup { video, related })
    }

    fn categories_live(&self) -> Result<Vec<CategoryInfo>> {
        let url = format!("{}?action=categories", self.base_url);
        let body = self.transport.get_json(&url)?;
        ensure_success(&body)?;
        serde_json::from_value(body["data"].clone()).context("decoding categories payload")
    }

    fn cache_get(&self, key: &str) -> Option<CachedValue> {
        let cache = self.cache.lock();
        let entry = cache.get(key)?;
        if entry.stored_at.elapsed() < self.cache_ttl {
            Some(entry.value.clone())
        } else {
            None
        }
    }

    fn cache_put(&self, key: String, value: CachedValue) {
        self.cache.lock().insert(
            key,
            CacheEntry {
                value,
                stored_at: Instant::now(),
            },
        );
    }
}

fn ensure_success(body: &Value) -> Result<()> {
    if body["success"] == Value::Bool(true) {
        Ok(())
    } else {
        let message = body["error"].as_str().unwrap_or("backend returned error");
        Err(anyhow!("{message}"))
    }
}

/// Backend rows carry both the stored path and the absolutized URL; the URL
/// wins when present. The featured flag arrives as a bool from this backend
/// but as 0/1 from older exports, so both are accepted.
fn transform_api_video(raw: &Value) -> Result<GalleryVideo> {
    #[derive(Deserialize)]
    struct ApiVideo {
        id: i64,
        title: String,
        #[serde(default)]
        description: String,
        #[serde(default)]
        thumbnail: String,
        thumbnail_url: Option<String>,
        #[serde(default)]
        video_file: String,
        video_url: Option<String>,
        #[serde(default)]
        poster: String,
        poster_url: Option<String>,
        #[serde(default)]
        category: String,
        #[serde(default, deserialize_with = "flexible_flag")]
        featured: bool,
        #[serde(default)]
        duration: i64,
        #[serde(default)]
        duration_formatted: String,
        #[serde(default)]
        views: i64,
        #[serde(default)]
        likes: i64,
        #[serde(default)]
        downloads: i64,
        #[serde(default)]
        upload_date: String,
        #[serde(default)]
        tags: Vec<String>,
        #[serde(default)]
        metadata: Value,
        seo_title: Option<String>,
        seo_description: Option<String>,
    }

    let api: ApiVideo = serde_json::from_value(raw.clone())
        .with_context(|| format!("decoding video payload: {raw}"))?;
    Ok(GalleryVideo {
        id: api.id,
        title: api.title,
        description: api.description,
        thumbnail: api.thumbnail_url.unwrap_or(api.thumbnail),
        video: api.video_url.unwrap_or(api.video_file),
        poster: api.poster_url.unwrap_or(api.poster),
        category: api.category,
        featured: api.featured,
        duration: api.duration,
        duration_formatted: api.duration_formatted,
        views: api.views,
        likes: api.likes,
        downloads: api.downloads,
        upload_date: api.upload_date,
        tags: api.tags,
        metadata: if api.metadata.is_null() {
            serde_json::json!({})
        } else {
            api.metadata
        },
        seo_title: api.seo_title,
        seo_description: api.seo_description,
    })
}

fn flexible_flag<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    match value {
        Value::Bool(flag) => Ok(flag),
        Value::Number(number) => Ok(number.as_i64().unwrap_or(0) != 0),
        Value::String(text) => Ok(text == "1" || text == "true"),
        _ => Ok(false),
    }
}

fn fallback_page(query: &ListQuery) -> VideoPage {
    let mut videos = fallback_videos();
    if let Some(category) = &query.category {
        if category != "all" {
            videos.retain(|video| &video.category == category);
        }
    }
    if let Some(featured) = query.featured {
        videos.retain(|video| video.featured == featured);
    }

    let total = videos.len() as i64;
    let page = query.page.max(1);
    let limit = query.limit.max(1);
    let start = ((page - 1) * limit) as usize;
    let end = (start + limit as usize).min(videos.len());
    let window = if start < videos.len() {
        videos[start..end].to_vec()
    } else {
        Vec::new()
    };
    let total_pages = if total == 0 { 0 } else { (total + limit - 1) / limit };

    VideoPage {
        videos: window,
        pagination: PageInfo {
            current_page: page,
            per_page: limit,
            total,
            total_pages,
            has_next: ((end) as i64) < total,
            has_prev: page > 1,
        },
        total,
        has_more: (end as i64) < total,
    }
}

fn fallback_lookup(id: i64) -> Result<VideoLookup> {
    let videos = fallback_videos();
    let video = videos
        .iter()
        .find(|candidate| candidate.id == id)
        .cloned()
        .ok_or_else(|| anyhow!("video {id} not found"))?;
    let related = videos
        .into_iter()
        .filter(|candidate| candidate.id != id && candidate.category == video.category)
        .take(4)
        .collect();
    Ok(VideoLookup { video, related })
}

fn snapshot_video(
    id: i64,
    title: &str,
    description: &str,
    thumbnail: &str,
    category: &str,
    duration: i64,
    duration_formatted: &str,
    views: i64,
    likes: i64,
    downloads: i64,
    upload_date: &str,
    tags: &[&str],
    metadata: Value,
) -> GalleryVideo {
    GalleryVideo {
        id,
        title: title.to_string(),
        description: description.to_string(),
        thumbnail: thumbnail.to_string(),
        video: "video/wheat-field.mp4".to_string(),
        poster: thumbnail.to_string(),
        category: category.to_string(),
        featured: true,
        duration,
        duration_formatted: duration_formatted.to_string(),
        views,
        likes,
        downloads,
        upload_date: upload_date.to_string(),
        tags: tags.iter().map(|tag| tag.to_string()).collect(),
        metadata,
        seo_title: None,
        seo_description: None,
    }
}

/// Embedded snapshot of the public gallery, served when the backend is
/// unreachable.
pub fn fallback_videos() -> Vec<GalleryVideo> {
    vec![
        snapshot_video(
            1,
            "Mountain Escape",
            "A cinematic journey through the Rocky Mountains showcasing the serene beauty of nature.",
            "img/tn-01.jpg",
            "nature",
            225,
            "3:45",
            1250,
            89,
            23,
            "2024-01-15T10:00:00Z",
            &["nature", "mountains", "cinematic", "colorado"],
            serde_json::json!({"fps": 24, "codec": "h264", "bitrate": "8000kbps"}),
        ),
        snapshot_video(
            2,
            "Urban Chronicles",
            "Dynamic timelapse capturing the pulse of city life in downtown Denver.",
            "img/tn-02.jpg",
            "lifestyle",
            180,
            "3:00",
            980,
            67,
            15,
            "2024-01-12T14:30:00Z",
            &["urban", "timelapse", "city", "denver"],
            serde_json::json!({}),
        ),
        snapshot_video(
            3,
            "Coastal Dreams",
            "Romantic wedding film capturing precious moments by the Pacific Coast.",
            "img/tn-03.jpg",
            "wedding",
            300,
            "5:00",
            2100,
            156,
            45,
            "2024-01-10T16:45:00Z",
            &["wedding", "romance", "coast", "love"],
            serde_json::json!({}),
        ),
        snapshot_video(
            4,
            "Creative Vision",
            "Experimental artistic piece exploring light, shadow, and movement.",
            "img/tn-04.jpg",
            "creative",
            150,
            "2:30",
            750,
            92,
            18,
            "2024-01-08T11:20:00Z",
            &["creative", "artistic", "experimental", "visual"],
            serde_json::json!({}),
        ),
    ]
}

pub fn fallback_categories() -> Vec<CategoryInfo> {
    let entries = [
        (1, "Nature & Landscapes", "nature", "#22c55e", "fas fa-mountain", 3),
        (2, "Lifestyle & Events", "lifestyle", "#3b82f6", "fas fa-heart", 2),
        (3, "Corporate & Business", "corporate", "#6366f1", "fas fa-building", 1),
        (4, "Creative & Artistic", "creative", "#8b5cf6", "fas fa-palette", 2),
        (5, "Adventure & Sports", "adventure", "#f59e0b", "fas fa-bicycle", 1),
        (6, "Wedding & Romance", "wedding", "#ec4899", "fas fa-rings-wedding", 4),
    ];
    entries
        .into_iter()
        .map(|(id, name, slug, color, icon, video_count)| CategoryInfo {
            id,
            name: name.to_string(),
            slug: slug.to_string(),
            description: String::new(),
            color: color.to_string(),
            icon: icon.to_string(),
            sort_order: id,
            video_count,
        })
        .collect()
}
