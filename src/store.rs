#![forbid(unsafe_code)]

//! Persistence layer for the gallery. All reads and writes go through
//! [`GalleryStore`], which owns a single libsql connection and exposes typed
//! rows instead of raw SQL results. The `tags` and `metadata` columns are
//! stored as JSON text and (de)serialized here so callers never see them in
//! their encoded form.

use std::path::Path;

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use libsql::{Builder, Connection, Row, Value, params};
use serde::{Deserialize, Serialize};

/// Rows stored in the `videos` table.
///
/// `id` is assigned out of band (content is loaded by the seeder, never via
/// HTTP), so it travels with the record rather than being generated here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoRow {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub slug: String,
    #[serde(default)]
    pub video_file: String,
    #[serde(default)]
    pub thumbnail: String,
    #[serde(default)]
    pub poster: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub featured: bool,
    #[serde(default)]
    pub duration: i64,
    #[serde(default)]
    pub file_size: i64,
    #[serde(default)]
    pub resolution: String,
    pub upload_date: String,
    #[serde(default)]
    pub last_modified: String,
    #[serde(default)]
    pub views: i64,
    #[serde(default)]
    pub likes: i64,
    #[serde(default)]
    pub downloads: i64,
    #[serde(default = "default_status")]
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seo_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seo_description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "default_metadata")]
    pub metadata: serde_json::Value,
    #[serde(default)]
    pub sort_order: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
}

fn default_status() -> String {
    "published".to_string()
}

fn default_metadata() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

/// Rows stored in the `categories` table. Managed out of band; the API only
/// ever reads them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryRow {
    pub id: i64,
    pub name: String,
    pub slug: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub color: String,
    #[serde(default)]
    pub icon: String,
    #[serde(default)]
    pub sort_order: i64,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

/// Active category annotated with a live count of published videos. The count
/// is computed on every read, never stored.
#[derive(Debug, Clone, Serialize)]
pub struct CategoryWithCount {
    pub id: i64,
    pub name: String,
    pub slug: String,
    pub description: String,
    pub color: String,
    pub icon: String,
    pub sort_order: i64,
    pub video_count: i64,
}

/// Trimmed projection used for the related-videos strip on the detail page.
#[derive(Debug, Clone, Serialize)]
pub struct RelatedVideoRow {
    pub id: i64,
    pub title: String,
    pub slug: String,
    pub thumbnail: String,
    pub duration: i64,
    pub views: i64,
}

/// Append-only analytics fact. Written exactly once per tracked client event.
#[derive(Debug, Clone)]
pub struct AnalyticsEvent {
    pub video_id: i64,
    pub event_type: String,
    pub user_ip: String,
    pub user_agent: String,
    pub referrer: String,
    pub session_id: String,
    pub duration_watched: i64,
    pub device_type: String,
    pub browser: String,
}

/// Listing filter. `category: None` means "all"; `status` is always present
/// because only one status is ever queried at a time.
#[derive(Debug, Clone)]
pub struct VideoFilter {
    pub category: Option<String>,
    pub featured: Option<bool>,
    pub status: String,
}

async fn configure_connection(conn: &Connection) -> Result<()> {
    // `PRAGMA journal_mode` returns a row, which `execute` rejects, so it has
    // to go through `query`.
    conn.query("PRAGMA journal_mode=WAL", ()).await?;
    conn.execute_batch(
        r#"
        PRAGMA synchronous=NORMAL;
        PRAGMA foreign_keys=ON;
        "#,
    )
    .await?;
    Ok(())
}

async fn ensure_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS videos (
            id INTEGER PRIMARY KEY,
            title TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            slug TEXT NOT NULL,
            video_file TEXT NOT NULL DEFAULT '',
            thumbnail TEXT NOT NULL DEFAULT '',
            poster TEXT NOT NULL DEFAULT '',
            category TEXT NOT NULL DEFAULT '',
            featured INTEGER NOT NULL DEFAULT 0,
            duration INTEGER NOT NULL DEFAULT 0,
            file_size INTEGER NOT NULL DEFAULT 0,
            resolution TEXT NOT NULL DEFAULT '',
            upload_date TEXT NOT NULL,
            last_modified TEXT NOT NULL DEFAULT '',
            views INTEGER NOT NULL DEFAULT 0,
            likes INTEGER NOT NULL DEFAULT 0,
            downloads INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'draft',
            seo_title TEXT,
            seo_description TEXT,
            tags_json TEXT NOT NULL DEFAULT '[]',
            metadata_json TEXT NOT NULL DEFAULT '{}',
            sort_order INTEGER NOT NULL DEFAULT 0,
            created_by TEXT
        );

        CREATE TABLE IF NOT EXISTS categories (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            slug TEXT NOT NULL UNIQUE,
            description TEXT NOT NULL DEFAULT '',
            color TEXT NOT NULL DEFAULT '',
            icon TEXT NOT NULL DEFAULT '',
            sort_order INTEGER NOT NULL DEFAULT 0,
            active INTEGER NOT NULL DEFAULT 1
        );

        CREATE TABLE IF NOT EXISTS video_analytics (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            video_id INTEGER NOT NULL,
            event_type TEXT NOT NULL,
            user_ip TEXT NOT NULL DEFAULT '',
            user_agent TEXT NOT NULL DEFAULT '',
            referrer TEXT NOT NULL DEFAULT '',
            session_id TEXT NOT NULL DEFAULT '',
            duration_watched INTEGER NOT NULL DEFAULT 0,
            device_type TEXT NOT NULL DEFAULT '',
            browser TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_videos_category ON videos(category);
        CREATE INDEX IF NOT EXISTS idx_videos_status ON videos(status);
        CREATE INDEX IF NOT EXISTS idx_analytics_video ON video_analytics(video_id);
        "#,
    )
    .await?;
    Ok(())
}

const VIDEO_COLUMNS: &str = "id, title, description, slug, video_file, thumbnail, poster, \
     category, featured, duration, file_size, resolution, upload_date, last_modified, \
     views, likes, downloads, status, seo_title, seo_description, tags_json, \
     metadata_json, sort_order, created_by";

/// Wrapper around the libsql connection used by the backend, the seeder and
/// the tests. Opened once per process and shared behind an `Arc`.
pub struct GalleryStore {
    conn: Connection,
}

impl GalleryStore {
    /// Opens (and if necessary creates) the database and ensures the expected
    /// schema exists. Bootstrap is idempotent so repeated opens are harmless.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating database directory {}", parent.display()))?;
        }

        let db = Builder::new_local(path)
            .build()
            .await
            .with_context(|| format!("opening gallery DB {}", path.display()))?;

        let conn = db.connect()?;
        configure_connection(&conn).await?;
        ensure_schema(&conn).await?;
        Ok(Self { conn })
    }

    /// Checks `sqlite_master` for a table; used by the seeder's sanity checks.
    pub async fn table_exists(&self, name: &str) -> Result<bool> {
        let mut rows = self
            .conn
            .query(
                "SELECT name FROM sqlite_master WHERE type='table' AND name=?1",
                [name],
            )
            .await
            .map_err(opaque)?;
        Ok(rows.next().await.map_err(opaque)?.is_some())
    }

    /// Inserts or updates a video. Only the seeder and tests call this; there
    /// is no HTTP write path for videos.
    pub async fn upsert_video(&self, record: &VideoRow) -> Result<()> {
        let tags_json = serde_json::to_string(&record.tags).context("serializing tags")?;
        let metadata_json =
            serde_json::to_string(&record.metadata).context("serializing metadata")?;
        let last_modified = if record.last_modified.is_empty() {
            record.upload_date.clone()
        } else {
            record.last_modified.clone()
        };

        self.conn
            .execute(
                r#"
                INSERT INTO videos (
                    id, title, description, slug, video_file, thumbnail, poster,
                    category, featured, duration, file_size, resolution,
                    upload_date, last_modified, views, likes, downloads, status,
                    seo_title, seo_description, tags_json, metadata_json,
                    sort_order, created_by
                ) VALUES (
                    ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12,
                    ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24
                )
                ON CONFLICT(id) DO UPDATE SET
                    title = excluded.title,
                    description = excluded.description,
                    slug = excluded.slug,
                    video_file = excluded.video_file,
                    thumbnail = excluded.thumbnail,
                    poster = excluded.poster,
                    category = excluded.category,
                    featured = excluded.featured,
                    duration = excluded.duration,
                    file_size = excluded.file_size,
                    resolution = excluded.resolution,
                    upload_date = excluded.upload_date,
                    last_modified = excluded.last_modified,
                    status = excluded.status,
                    seo_title = excluded.seo_title,
                    seo_description = excluded.seo_description,
                    tags_json = excluded.tags_json,
                    metadata_json = excluded.metadata_json,
                    sort_order = excluded.sort_order,
                    created_by = excluded.created_by
                "#,
                params![
                    record.id,
                    record.title.as_str(),
                    record.description.as_str(),
                    record.slug.as_str(),
                    record.video_file.as_str(),
                    record.thumbnail.as_str(),
                    record.poster.as_str(),
                    record.category.as_str(),
                    record.featured as i64,
                    record.duration,
                    record.file_size,
                    record.resolution.as_str(),
                    record.upload_date.as_str(),
                    last_modified,
                    record.views,
                    record.likes,
                    record.downloads,
                    record.status.as_str(),
                    record.seo_title.as_deref(),
                    record.seo_description.as_deref(),
                    tags_json,
                    metadata_json,
                    record.sort_order,
                    record.created_by.as_deref(),
                ],
            )
            .await
            .map_err(opaque)?;

        Ok(())
    }

    pub async fn upsert_category(&self, record: &CategoryRow) -> Result<()> {
        self.conn
            .execute(
                r#"
                INSERT INTO categories (
                    id, name, slug, description, color, icon, sort_order, active
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    slug = excluded.slug,
                    description = excluded.description,
                    color = excluded.color,
                    icon = excluded.icon,
                    sort_order = excluded.sort_order,
                    active = excluded.active
                "#,
                params![
                    record.id,
                    record.name.as_str(),
                    record.slug.as_str(),
                    record.description.as_str(),
                    record.color.as_str(),
                    record.icon.as_str(),
                    record.sort_order,
                    record.active as i64,
                ],
            )
            .await
            .map_err(opaque)?;

        Ok(())
    }

    /// Lists videos matching `filter`, featured first, then by manual sort
    /// order, newest upload last within ties. `limit`/`offset` are applied
    /// verbatim; clamping is the service's job.
    pub async fn list_videos(
        &self,
        filter: &VideoFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<VideoRow>> {
        let (clause, mut args) = filter_clause(filter);
        let sql = format!(
            r#"
            SELECT {VIDEO_COLUMNS}
            FROM videos
            WHERE {clause}
            ORDER BY
                CASE WHEN featured = 1 THEN 0 ELSE 1 END,
                sort_order ASC,
                upload_date DESC
            LIMIT ? OFFSET ?
            "#
        );
        args.push(Value::from(limit));
        args.push(Value::from(offset));

        let mut stmt = self.conn.prepare(&sql).await.map_err(opaque)?;
        let mut rows = stmt.query(args).await.map_err(opaque)?;
        let mut records = Vec::new();
        while let Some(row) = rows.next().await.map_err(opaque)? {
            records.push(row_to_video(&row)?);
        }
        Ok(records)
    }

    /// Counts videos matching `filter`, for pagination metadata.
    pub async fn count_videos(&self, filter: &VideoFilter) -> Result<i64> {
        let (clause, args) = filter_clause(filter);
        let sql = format!("SELECT COUNT(*) FROM videos WHERE {clause}");
        let mut stmt = self.conn.prepare(&sql).await.map_err(opaque)?;
        let mut rows = stmt.query(args).await.map_err(opaque)?;
        let row = rows
            .next()
            .await
            .map_err(opaque)?
            .context("missing count row")?;
        Ok(row.get(0)?)
    }

    /// Fetches a single video by id, published only. Draft and archived
    /// records are invisible to every read path.
    pub async fn get_published_video(&self, id: i64) -> Result<Option<VideoRow>> {
        let sql = format!(
            "SELECT {VIDEO_COLUMNS} FROM videos WHERE id = ?1 AND status = 'published'"
        );
        let mut stmt = self.conn.prepare(&sql).await.map_err(opaque)?;
        let mut rows = stmt.query([id]).await.map_err(opaque)?;
        if let Some(row) = rows.next().await.map_err(opaque)? {
            Ok(Some(row_to_video(&row)?))
        } else {
            Ok(None)
        }
    }

    /// Bumps the view counter by exactly one. A single UPDATE statement, so
    /// concurrent increments rely on the engine's row-level atomicity.
    pub async fn increment_views(&self, id: i64) -> Result<()> {
        self.conn
            .execute("UPDATE videos SET views = views + 1 WHERE id = ?1", [id])
            .await
            .map_err(opaque)?;
        Ok(())
    }

    /// Published videos sharing `category`, excluding `exclude_id`, most
    /// viewed first, newest upload breaking ties.
    pub async fn related_videos(
        &self,
        category: &str,
        exclude_id: i64,
        limit: i64,
    ) -> Result<Vec<RelatedVideoRow>> {
        let mut stmt = self
            .conn
            .prepare(
                r#"
                SELECT id, title, slug, thumbnail, duration, views
                FROM videos
                WHERE category = ?1 AND id != ?2 AND status = 'published'
                ORDER BY views DESC, upload_date DESC
                LIMIT ?3
                "#,
            )
            .await
            .map_err(opaque)?;

        let mut rows = stmt
            .query(params![category, exclude_id, limit])
            .await
            .map_err(opaque)?;
        let mut records = Vec::new();
        while let Some(row) = rows.next().await.map_err(opaque)? {
            records.push(RelatedVideoRow {
                id: row.get(0)?,
                title: row.get(1)?,
                slug: row.get(2)?,
                thumbnail: row.get(3)?,
                duration: row.get(4)?,
                views: row.get(5)?,
            });
        }
        Ok(records)
    }

    /// Active categories ordered by sort_order then name, each with a live
    /// count of published videos referencing its slug.
    pub async fn list_active_categories(&self) -> Result<Vec<CategoryWithCount>> {
        let mut stmt = self
            .conn
            .prepare(
                r#"
                SELECT
                    c.id, c.name, c.slug, c.description, c.color, c.icon, c.sort_order,
                    COUNT(v.id) AS video_count
                FROM categories c
                LEFT JOIN videos v ON c.slug = v.category AND v.status = 'published'
                WHERE c.active = 1
                GROUP BY c.id
                ORDER BY c.sort_order ASC, c.name ASC
                "#,
            )
            .await
            .map_err(opaque)?;

        let mut rows = stmt.query(params![]).await.map_err(opaque)?;
        let mut records = Vec::new();
        while let Some(row) = rows.next().await.map_err(opaque)? {
            records.push(CategoryWithCount {
                id: row.get(0)?,
                name: row.get(1)?,
                slug: row.get(2)?,
                description: row.get(3)?,
                color: row.get(4)?,
                icon: row.get(5)?,
                sort_order: row.get(6)?,
                video_count: row.get(7)?,
            });
        }
        Ok(records)
    }

    /// Appends one analytics row and returns its generated id.
    pub async fn insert_event(&self, event: &AnalyticsEvent) -> Result<i64> {
        self.conn
            .execute(
                r#"
                INSERT INTO video_analytics (
                    video_id, event_type, user_ip, user_agent, referrer,
                    session_id, duration_watched, device_type, browser, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                "#,
                params![
                    event.video_id,
                    event.event_type.as_str(),
                    event.user_ip.as_str(),
                    event.user_agent.as_str(),
                    event.referrer.as_str(),
                    event.session_id.as_str(),
                    event.duration_watched,
                    event.device_type.as_str(),
                    event.browser.as_str(),
                    Utc::now().to_rfc3339(),
                ],
            )
            .await
            .map_err(opaque)?;
        Ok(self.conn.last_insert_rowid())
    }
}

/// Logs the raw driver error server-side and replaces it with an opaque one.
/// SQL text and driver details never reach the HTTP boundary.
fn opaque(err: libsql::Error) -> anyhow::Error {
    tracing::error!(error = %err, "gallery store query failed");
    anyhow!("data access error")
}

fn filter_clause(filter: &VideoFilter) -> (String, Vec<Value>) {
    let mut conditions = vec!["status = ?".to_string()];
    let mut args = vec![Value::from(filter.status.clone())];
    if let Some(category) = &filter.category {
        conditions.push("category = ?".to_string());
        args.push(Value::from(category.clone()));
    }
    if let Some(featured) = filter.featured {
        conditions.push("featured = ?".to_string());
        args.push(Value::from(featured as i64));
    }
    (conditions.join(" AND "), args)
}

/// Converts a SQL row into a `VideoRow`, deserializing the JSON columns.
fn row_to_video(row: &Row) -> Result<VideoRow> {
    // Column order must match VIDEO_COLUMNS.
    let tags_json: String = row.get(20)?;
    let metadata_json: String = row.get(21)?;

    let tags: Vec<String> = serde_json::from_str(&tags_json).context("parsing stored tags")?;
    let metadata: serde_json::Value =
        serde_json::from_str(&metadata_json).context("parsing stored metadata")?;

    Ok(VideoRow {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        slug: row.get(3)?,
        video_file: row.get(4)?,
        thumbnail: row.get(5)?,
        poster: row.get(6)?,
        category: row.get(7)?,
        featured: row.get::<i64>(8).map(|value| value != 0)?,
        duration: row.get(9)?,
        file_size: row.get(10)?,
        resolution: row.get(11)?,
        upload_date: row.get(12)?,
        last_modified: row.get(13)?,
        views: row.get(14)?,
        likes: row.get(15)?,
        downloads: row.get(16)?,
        status: row.get(17)?,
        seo_title: row.get(18)?,
        seo_description: row.get(19)?,
        tags,
        metadata,
        sort_order: row.get(22)?,
        created_by: row.get(23)?,
    })
}
