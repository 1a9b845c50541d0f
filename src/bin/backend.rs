#![forbid(unsafe_code)]

//! HTTP backend for the portfolio gallery. One API route carries the whole
//! surface, dispatched on query parameters the way the static frontend calls
//! it; everything else falls through to the static site on disk.

use std::{
    net::SocketAddr,
    path::{Component, Path, PathBuf},
    sync::Arc,
};

use anyhow::{anyhow, Context, Result};
use axum::{
    Json, Router,
    body::{Body, Bytes},
    extract::{ConnectInfo, Query, State},
    http::{header, HeaderMap, Request, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
};
use reelfolio::config::{resolve_runtime_settings, RuntimeOverrides, RuntimeSettings};
use reelfolio::service::{
    resolve_client_ip, ClientContext, ListParams, RequestOrigin, VideoService,
};
use reelfolio::store::GalleryStore;
use serde::Deserialize;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone)]
struct BackendArgs {
    settings: RuntimeSettings,
}

impl BackendArgs {
    fn parse() -> Result<Self> {
        Self::from_iter(std::env::args().skip(1))
    }

    fn from_iter<I>(iter: I) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut db_override: Option<PathBuf> = None;
        let mut www_root_override: Option<PathBuf> = None;
        let mut port_override: Option<u16> = None;
        let mut host_override: Option<String> = None;
        let mut args = iter.into_iter();
        while let Some(arg) = args.next() {
            if let Some(value) = arg.strip_prefix("--db=") {
                db_override = Some(PathBuf::from(value));
                continue;
            }
            if let Some(value) = arg.strip_prefix("--www-root=") {
                www_root_override = Some(PathBuf::from(value));
                continue;
            }
            if let Some(value) = arg.strip_prefix("--port=") {
                port_override = Some(parse_port_arg(value)?);
                continue;
            }
            if let Some(value) = arg.strip_prefix("--host=") {
                host_override = Some(value.to_string());
                continue;
            }

            match arg.as_str() {
                "--db" => {
                    let value = args.next().ok_or_else(|| anyhow!("--db requires a value"))?;
                    db_override = Some(PathBuf::from(value));
                }
                "--www-root" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow!("--www-root requires a value"))?;
                    www_root_override = Some(PathBuf::from(value));
                }
                "--port" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow!("--port requires a value"))?;
                    port_override = Some(parse_port_arg(&value)?);
                }
                "--host" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow!("--host requires a value"))?;
                    host_override = Some(value);
                }
                _ => return Err(anyhow!("unknown argument: {arg}")),
            }
        }

        let settings = resolve_runtime_settings(RuntimeOverrides {
            db_path: db_override,
            www_root: www_root_override,
            port: port_override,
            host: host_override,
            env_path: None,
        })?;

        Ok(Self { settings })
    }
}

fn parse_port_arg(value: &str) -> Result<u16> {
    value
        .parse::<u16>()
        .context("expected a numeric port between 0 and 65535")
}

/// Shared state injected into every handler.
#[derive(Clone)]
struct AppState {
    service: Arc<VideoService>,
    www_root: Arc<PathBuf>,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn method_not_allowed(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::METHOD_NOT_ALLOWED,
            message: message.into(),
        }
    }

    fn internal(err: anyhow::Error) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "success": false,
            "error": self.message,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let BackendArgs { settings } = BackendArgs::parse()?;

    let store = GalleryStore::open(&settings.db_path)
        .await
        .context("opening gallery database")?;

    let state = AppState {
        service: Arc::new(VideoService::new(Arc::new(store))),
        www_root: Arc::new(settings.www_root),
    };

    // The static frontend calls a single endpoint and selects the operation
    // through query parameters, so the router stays tiny.
    let app = Router::new()
        .route(
            "/api/videos",
            get(videos_get)
                .post(videos_post)
                .options(preflight)
                .fallback(method_not_allowed),
        )
        .fallback(static_fallback)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state);

    let addr = format!("{}:{}", settings.host, settings.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;
    tracing::info!("gallery API listening on http://{addr}");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("running gallery API")?;

    Ok(())
}

async fn shutdown_signal() {
    // Failure here only affects graceful shutdown; the process still dies on
    // Ctrl+C.
    if let Err(err) = signal::ctrl_c().await {
        tracing::error!("failed to install Ctrl+C handler: {err}");
    }
}

#[derive(Debug, Default, Deserialize)]
struct VideosQuery {
    id: Option<i64>,
    action: Option<String>,
    category: Option<String>,
    page: Option<i64>,
    limit: Option<i64>,
    featured: Option<String>,
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TrackBody {
    video_id: Option<i64>,
    event_type: Option<String>,
    duration_watched: Option<i64>,
    session_id: Option<String>,
}

fn request_origin(headers: &HeaderMap) -> RequestOrigin {
    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("http");
    let host = headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("localhost");
    RequestOrigin::new(scheme, host)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

async fn videos_get(
    State(state): State<AppState>,
    Query(query): Query<VideosQuery>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let origin = request_origin(&headers);

    if let Some(id) = query.id {
        let lookup = state
            .service
            .get_video(id, &origin)
            .await
            .map_err(ApiError::internal)?
            .ok_or_else(|| ApiError::not_found("Video not found"))?;
        let body = serde_json::json!({
            "success": true,
            "data": lookup.video,
            "related": lookup.related,
        });
        return Ok(Json(body).into_response());
    }

    if query.action.as_deref() == Some("categories") {
        let categories = state
            .service
            .list_categories()
            .await
            .map_err(ApiError::internal)?;
        let body = serde_json::json!({
            "success": true,
            "data": categories,
        });
        return Ok(Json(body).into_response());
    }

    let params = ListParams {
        category: query.category,
        page: query.page,
        limit: query.limit,
        featured: query.featured,
        status: query.status,
    };
    let listing = state
        .service
        .list_videos(&params, &origin)
        .await
        .map_err(ApiError::internal)?;
    let body = serde_json::json!({
        "success": true,
        "data": listing.videos,
        "pagination": listing.pagination,
        "filters": listing.filters,
    });
    Ok(Json(body).into_response())
}

async fn videos_post(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Query(query): Query<VideosQuery>,
    headers: HeaderMap,
    payload: Bytes,
) -> ApiResult<Response> {
    if query.action.as_deref() != Some("track") {
        return Err(ApiError::not_found("Endpoint not found"));
    }

    // The frontend fires these as beacons; an empty or malformed body is the
    // same as one with the fields missing.
    let body: TrackBody = serde_json::from_slice(&payload)
        .map_err(|_| ApiError::bad_request("Missing required fields"))?;
    let video_id = body.video_id.filter(|id| *id != 0);
    let event_type = body.event_type.filter(|kind| !kind.is_empty());
    let (Some(video_id), Some(event_type)) = (video_id, event_type) else {
        return Err(ApiError::bad_request("Missing required fields"));
    };

    let peer_ip = peer.ip().to_string();
    let client = ClientContext {
        user_ip: resolve_client_ip(
            header_str(&headers, "client-ip"),
            header_str(&headers, "x-forwarded-for"),
            Some(&peer_ip),
        ),
        user_agent: header_str(&headers, "user-agent").unwrap_or("").to_string(),
        referrer: header_str(&headers, "referer").unwrap_or("").to_string(),
        session_id: body.session_id,
    };

    state
        .service
        .track_event(video_id, event_type, body.duration_watched.unwrap_or(0), client)
        .await
        .map_err(ApiError::internal)?;

    let response = serde_json::json!({
        "success": true,
        "message": "Event tracked",
    });
    Ok(Json(response).into_response())
}

async fn preflight() -> StatusCode {
    StatusCode::OK
}

async fn method_not_allowed() -> ApiError {
    ApiError::method_not_allowed("Method not allowed")
}

async fn static_fallback(State(state): State<AppState>, req: Request<Body>) -> Response {
    let path = req.uri().path();
    if path == "/api" || path.starts_with("/api/") {
        return ApiError::not_found("Endpoint not found").into_response();
    }

    match serve_www_path(&state.www_root, path).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

async fn serve_www_path(root: &Path, request_path: &str) -> ApiResult<Response> {
    let target = resolve_www_path(root, request_path)?;

    match tokio::fs::metadata(&target).await {
        Ok(meta) if meta.is_dir() => send_file(root.join("index.html")).await,
        Ok(_) => send_file(target).await,
        Err(_) => {
            // Extensionless paths are frontend routes; the SPA shell handles
            // them client side.
            if should_fallback_to_index(request_path) {
                send_file(root.join("index.html")).await
            } else {
                Err(ApiError::not_found("file not found"))
            }
        }
    }
}

fn resolve_www_path(root: &Path, request_path: &str) -> ApiResult<PathBuf> {
    let trimmed = request_path.trim_start_matches('/');
    if trimmed.is_empty() {
        return Ok(root.join("index.html"));
    }
    let candidate = Path::new(trimmed);
    if candidate
        .components()
        .any(|component| !matches!(component, Component::Normal(_)))
    {
        return Err(ApiError::not_found("file not found"));
    }
    Ok(root.join(candidate))
}

fn should_fallback_to_index(request_path: &str) -> bool {
    let trimmed = request_path.trim_start_matches('/');
    if trimmed.is_empty() {
        return true;
    }
    Path::new(trimmed).extension().is_none()
}

async fn send_file(path: PathBuf) -> ApiResult<Response> {
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|_| ApiError::not_found("file not found"))?;

    let mut response = Body::from(bytes).into_response();
    if let Some(mime) = mime_guess::MimeGuess::from_path(&path).first() {
        if let Ok(value) = mime.to_string().parse() {
            response.headers_mut().insert(header::CONTENT_TYPE, value);
        }
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use libsql::{params, Builder};
    use reelfolio::store::{CategoryRow, VideoRow};
    use serde_json::{json, Value};
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::Mutex;
    use std::{env, sync::Arc};
    use tempfile::tempdir;

    struct BackendTestContext {
        _temp: tempfile::TempDir,
        db_path: PathBuf,
        store: Arc<GalleryStore>,
        state: AppState,
    }

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn with_env_file(vars: &[(&str, &str)], f: impl FnOnce()) {
        let _lock = ENV_LOCK.lock().unwrap();
        let dir = tempdir().unwrap();
        let mut contents = String::new();
        for (key, value) in vars {
            contents.push_str(&format!("{key}=\"{value}\"\n"));
        }
        std::fs::write(dir.path().join(".env"), contents).unwrap();
        let cwd = env::current_dir().unwrap();
        env::set_current_dir(dir.path()).unwrap();
        f();
        env::set_current_dir(cwd).unwrap();
    }

    impl BackendTestContext {
        async fn new() -> Self {
            let temp = tempdir().unwrap();
            let db_path = temp.path().join("gallery.db");
            let store = Arc::new(GalleryStore::open(&db_path).await.unwrap());
            let www_root = temp.path().join("www");
            std::fs::create_dir_all(&www_root).unwrap();

            Self {
                state: AppState {
                    service: Arc::new(VideoService::new(store.clone())),
                    www_root: Arc::new(www_root),
                },
                db_path,
                store,
                _temp: temp,
            }
        }

        async fn insert_video(&self, id: i64, category: &str) {
            self.store
                .upsert_video(&sample_video(id, category))
                .await
                .unwrap();
        }

        async fn insert_category(&self, id: i64, slug: &str) {
            self.store
                .upsert_category(&CategoryRow {
                    id,
                    name: format!("Category {slug}"),
                    slug: slug.into(),
                    description: String::new(),
                    color: "#22c55e".into(),
                    icon: "fas fa-mountain".into(),
                    sort_order: id,
                    active: true,
                })
                .await
                .unwrap();
        }

        fn www_root(&self) -> &Path {
            &self.state.www_root
        }
    }

    fn sample_video(id: i64, category: &str) -> VideoRow {
        VideoRow {
            id,
            title: format!("Video {id}"),
            description: "desc".into(),
            slug: format!("video-{id}"),
            video_file: format!("video/clip-{id}.mp4"),
            thumbnail: format!("img/tn-{id}.jpg"),
            poster: format!("img/poster-{id}.jpg"),
            category: category.into(),
            featured: false,
            duration: 125,
            file_size: 1536,
            resolution: "1920x1080".into(),
            upload_date: "2024-01-15T10:00:00+00:00".into(),
            last_modified: "2024-01-16T10:00:00+00:00".into(),
            views: 0,
            likes: 0,
            downloads: 0,
            status: "published".into(),
            seo_title: None,
            seo_description: None,
            tags: vec!["cinematic".into()],
            metadata: json!({}),
            sort_order: id,
            created_by: None,
        }
    }

    fn host_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, "gallery.test".parse().unwrap());
        headers
    }

    fn peer() -> ConnectInfo<SocketAddr> {
        ConnectInfo(SocketAddr::new(
            IpAddr::V4(Ipv4Addr::new(198, 51, 100, 1)),
            50000,
        ))
    }

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn parse_backend_args(env_values: &[(&str, &str)], extra: &[&str]) -> BackendArgs {
        let argv = extra
            .iter()
            .map(|value| value.to_string())
            .collect::<Vec<_>>();
        let mut parsed = None;
        with_env_file(env_values, || {
            parsed = Some(BackendArgs::from_iter(argv.clone()).expect("parsed args"));
        });
        parsed.expect("args set")
    }

    #[test]
    fn backend_args_read_env_file() {
        let args = parse_backend_args(
            &[
                ("REELFOLIO_DB", "/srv/gallery.db"),
                ("REELFOLIO_WWW_ROOT", "/srv/www"),
                ("REELFOLIO_PORT", "4242"),
                ("REELFOLIO_HOST", "0.0.0.0"),
            ],
            &[],
        );
        assert_eq!(args.settings.db_path, PathBuf::from("/srv/gallery.db"));
        assert_eq!(args.settings.www_root, PathBuf::from("/srv/www"));
        assert_eq!(args.settings.port, 4242);
        assert_eq!(args.settings.host, "0.0.0.0");
    }

    #[test]
    fn backend_args_flags_override_env() {
        let args = parse_backend_args(
            &[
                ("REELFOLIO_DB", "/srv/gallery.db"),
                ("REELFOLIO_WWW_ROOT", "/srv/www"),
            ],
            &["--db", "/custom/gallery.db", "--port=9000"],
        );
        assert_eq!(args.settings.db_path, PathBuf::from("/custom/gallery.db"));
        assert_eq!(args.settings.port, 9000);
    }

    #[test]
    fn backend_args_reject_unknown_flags() {
        with_env_file(
            &[
                ("REELFOLIO_DB", "/srv/gallery.db"),
                ("REELFOLIO_WWW_ROOT", "/srv/www"),
            ],
            || {
                let err =
                    BackendArgs::from_iter(vec!["--bogus".to_string()]).expect_err("rejected");
                assert!(err.to_string().contains("unknown argument"));
            },
        );
    }

    #[tokio::test]
    async fn listing_returns_envelope_with_pagination_and_filters() {
        let ctx = BackendTestContext::new().await;
        ctx.insert_video(1, "nature").await;
        ctx.insert_video(2, "nature").await;

        let response = videos_get(
            State(ctx.state.clone()),
            Query(VideosQuery::default()),
            host_headers(),
        )
        .await
        .unwrap();
        let body = body_json(response).await;

        assert_eq!(body["success"], json!(true));
        assert_eq!(body["data"].as_array().unwrap().len(), 2);
        assert_eq!(body["pagination"]["total"], json!(2));
        assert_eq!(body["pagination"]["per_page"], json!(12));
        assert_eq!(body["filters"]["category"], json!("all"));
        assert_eq!(
            body["data"][0]["video_url"],
            json!("http://gallery.test/video/clip-1.mp4")
        );
    }

    #[tokio::test]
    async fn listing_respects_forwarded_proto() {
        let ctx = BackendTestContext::new().await;
        ctx.insert_video(1, "nature").await;

        let mut headers = host_headers();
        headers.insert("x-forwarded-proto", "https".parse().unwrap());
        let response = videos_get(
            State(ctx.state.clone()),
            Query(VideosQuery::default()),
            headers,
        )
        .await
        .unwrap();
        let body = body_json(response).await;
        assert_eq!(
            body["data"][0]["thumbnail_url"],
            json!("https://gallery.test/img/tn-1.jpg")
        );
    }

    #[tokio::test]
    async fn detail_includes_related_and_increments_views() {
        let ctx = BackendTestContext::new().await;
        for id in 1..=3 {
            ctx.insert_video(id, "nature").await;
        }

        let query = VideosQuery {
            id: Some(1),
            ..VideosQuery::default()
        };
        let response = videos_get(State(ctx.state.clone()), Query(query), host_headers())
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["success"], json!(true));
        assert_eq!(body["data"]["id"], json!(1));
        assert_eq!(body["data"]["views"], json!(0));
        assert_eq!(body["data"]["file_size_formatted"], json!("1.5 KB"));
        assert_eq!(body["related"].as_array().unwrap().len(), 2);

        let query = VideosQuery {
            id: Some(1),
            ..VideosQuery::default()
        };
        let response = videos_get(State(ctx.state.clone()), Query(query), host_headers())
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["data"]["views"], json!(1));
    }

    #[tokio::test]
    async fn detail_unknown_id_is_404() {
        let ctx = BackendTestContext::new().await;
        let query = VideosQuery {
            id: Some(99),
            ..VideosQuery::default()
        };
        let err = videos_get(State(ctx.state.clone()), Query(query), host_headers())
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn categories_action_lists_active_categories() {
        let ctx = BackendTestContext::new().await;
        ctx.insert_category(1, "nature").await;
        ctx.insert_video(1, "nature").await;

        let query = VideosQuery {
            action: Some("categories".into()),
            ..VideosQuery::default()
        };
        let response = videos_get(State(ctx.state.clone()), Query(query), host_headers())
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["success"], json!(true));
        assert_eq!(body["data"][0]["slug"], json!("nature"));
        assert_eq!(body["data"][0]["video_count"], json!(1));
    }

    #[tokio::test]
    async fn track_persists_event_and_answers_with_message() {
        let ctx = BackendTestContext::new().await;
        ctx.insert_video(1, "nature").await;

        let mut headers = host_headers();
        headers.insert("user-agent", "Mozilla/5.0 (iPad) Safari/605".parse().unwrap());
        headers.insert("x-forwarded-for", "203.0.113.9".parse().unwrap());
        let query = VideosQuery {
            action: Some("track".into()),
            ..VideosQuery::default()
        };
        let body = track_bytes(&json!({
            "video_id": 1,
            "event_type": "play",
            "duration_watched": 15,
            "session_id": "abc123",
        }));
        let response = videos_post(State(ctx.state.clone()), peer(), Query(query), headers, body)
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["success"], json!(true));
        assert_eq!(body["message"], json!("Event tracked"));

        let db = Builder::new_local(&ctx.db_path).build().await.unwrap();
        let conn = db.connect().unwrap();
        let mut rows = conn
            .query(
                "SELECT event_type, user_ip, device_type, session_id FROM video_analytics",
                params![],
            )
            .await
            .unwrap();
        let row = rows.next().await.unwrap().expect("event stored");
        assert_eq!(row.get::<String>(0).unwrap(), "play");
        assert_eq!(row.get::<String>(1).unwrap(), "203.0.113.9");
        assert_eq!(row.get::<String>(2).unwrap(), "tablet");
        assert_eq!(row.get::<String>(3).unwrap(), "abc123");
    }

    async fn track_request(ctx: &BackendTestContext, body: Bytes) -> ApiResult<Response> {
        let query = VideosQuery {
            action: Some("track".into()),
            ..VideosQuery::default()
        };
        videos_post(State(ctx.state.clone()), peer(), Query(query), host_headers(), body).await
    }

    fn track_bytes(value: &Value) -> Bytes {
        Bytes::from(value.to_string())
    }

    #[tokio::test]
    async fn track_without_required_fields_is_400() {
        let ctx = BackendTestContext::new().await;

        let incomplete = [
            json!({"video_id": 1}),
            json!({"event_type": "play"}),
            json!({"video_id": 0, "event_type": "play"}),
            json!({"video_id": 1, "event_type": ""}),
        ];
        for payload in &incomplete {
            let err = track_request(&ctx, track_bytes(payload)).await.unwrap_err();
            assert_eq!(err.status, StatusCode::BAD_REQUEST);
            assert_eq!(err.message, "Missing required fields");
        }

        let err = track_request(&ctx, Bytes::new()).await.unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);

        // Rejected requests leave no analytics row behind.
        let db = Builder::new_local(&ctx.db_path).build().await.unwrap();
        let conn = db.connect().unwrap();
        let mut rows = conn
            .query("SELECT COUNT(*) FROM video_analytics", params![])
            .await
            .unwrap();
        let row = rows.next().await.unwrap().unwrap();
        assert_eq!(row.get::<i64>(0).unwrap(), 0);
    }

    #[tokio::test]
    async fn track_with_malformed_body_keeps_error_envelope() {
        let ctx = BackendTestContext::new().await;
        let err = track_request(&ctx, Bytes::from_static(b"{\"video_id\": 1,"))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.message, "Missing required fields");

        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["success"], json!(false));
        assert_eq!(body["error"], json!("Missing required fields"));
        assert!(body["timestamp"].is_string());
    }

    #[tokio::test]
    async fn post_without_track_action_is_404() {
        let ctx = BackendTestContext::new().await;
        let err = videos_post(
            State(ctx.state.clone()),
            peer(),
            Query(VideosQuery::default()),
            host_headers(),
            Bytes::new(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unsupported_method_answers_with_envelope() {
        let response = method_not_allowed().await.into_response();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        let body = body_json(response).await;
        assert_eq!(body["success"], json!(false));
        assert_eq!(body["error"], json!("Method not allowed"));
        assert!(body["timestamp"].is_string());
    }

    #[tokio::test]
    async fn static_fallback_serves_files_and_spa_shell() {
        let ctx = BackendTestContext::new().await;
        std::fs::write(ctx.www_root().join("index.html"), "<html>shell</html>").unwrap();
        std::fs::write(ctx.www_root().join("style.css"), "body{}").unwrap();

        let req = Request::builder()
            .uri("/style.css")
            .body(Body::empty())
            .unwrap();
        let response = static_fallback(State(ctx.state.clone()), req).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/css"
        );

        // Extensionless paths get the SPA shell.
        let req = Request::builder()
            .uri("/portfolio")
            .body(Body::empty())
            .unwrap();
        let response = static_fallback(State(ctx.state.clone()), req).await;
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(bytes.as_ref(), b"<html>shell</html>");

        // Missing assets with an extension stay a 404.
        let req = Request::builder()
            .uri("/missing.png")
            .body(Body::empty())
            .unwrap();
        let response = static_fallback(State(ctx.state.clone()), req).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn static_fallback_rejects_traversal_and_unknown_api_paths() {
        let ctx = BackendTestContext::new().await;
        std::fs::write(ctx.www_root().join("index.html"), "shell").unwrap();

        let req = Request::builder()
            .uri("/api/nope")
            .body(Body::empty())
            .unwrap();
        let response = static_fallback(State(ctx.state.clone()), req).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = body_json(response).await;
        assert_eq!(body["success"], json!(false));
        assert!(body["timestamp"].is_string());

        let err = resolve_www_path(ctx.www_root(), "/../secret.txt").unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }
}
