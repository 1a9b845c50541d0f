#![forbid(unsafe_code)]

//! Loads gallery content from a JSON file into the database. Content is
//! curated offline, so this runs whenever the portfolio changes; re-running
//! it on an existing database updates rows in place without touching the
//! live view counters.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use reelfolio::config::{resolve_runtime_settings, RuntimeOverrides};
use reelfolio::store::{CategoryRow, GalleryStore, VideoRow};
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

const CONTENT_ENV_VAR: &str = "REELFOLIO_CONTENT";

#[derive(Debug, Clone)]
struct SeedArgs {
    db_path: PathBuf,
    content_path: PathBuf,
}

impl SeedArgs {
    fn parse() -> Result<Self> {
        Self::from_iter(env::args().skip(1))
    }

    fn from_iter<I>(iter: I) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut db_override: Option<PathBuf> = None;
        let mut content_override: Option<PathBuf> = None;
        let mut args = iter.into_iter();

        while let Some(arg) = args.next() {
            if let Some(value) = arg.strip_prefix("--db=") {
                db_override = Some(PathBuf::from(value));
                continue;
            }
            if let Some(value) = arg.strip_prefix("--content=") {
                content_override = Some(PathBuf::from(value));
                continue;
            }

            match arg.as_str() {
                "--db" => {
                    let value = args.next().ok_or_else(|| anyhow!("--db requires a value"))?;
                    db_override = Some(PathBuf::from(value));
                }
                "--content" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow!("--content requires a value"))?;
                    content_override = Some(PathBuf::from(value));
                }
                _ => bail!("unknown argument: {arg}"),
            }
        }

        // The seeder only needs the database; consult the runtime config
        // when no explicit path was given.
        let db_path = match db_override {
            Some(path) => path,
            None => resolve_runtime_settings(RuntimeOverrides::default())?.db_path,
        };

        let content_path = content_override
            .or_else(|| env::var(CONTENT_ENV_VAR).ok().map(PathBuf::from))
            .ok_or_else(|| anyhow!("content file required (--content or {CONTENT_ENV_VAR})"))?;

        Ok(Self {
            db_path,
            content_path,
        })
    }
}

#[derive(Debug, Deserialize)]
struct SeedFile {
    #[serde(default)]
    categories: Vec<CategoryRow>,
    #[serde(default)]
    videos: Vec<VideoRow>,
}

fn load_seed_file(path: &Path) -> Result<SeedFile> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading content file {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

async fn seed(store: &GalleryStore, seed_file: &SeedFile) -> Result<(usize, usize)> {
    for category in &seed_file.categories {
        store
            .upsert_category(category)
            .await
            .with_context(|| format!("seeding category {}", category.slug))?;
    }
    for video in &seed_file.videos {
        store
            .upsert_video(video)
            .await
            .with_context(|| format!("seeding video {}", video.id))?;
    }
    Ok((seed_file.categories.len(), seed_file.videos.len()))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = SeedArgs::parse()?;
    let seed_file = load_seed_file(&args.content_path)?;
    let store = GalleryStore::open(&args.db_path)
        .await
        .context("opening gallery database")?;

    let (categories, videos) = seed(&store, &seed_file).await?;
    tracing::info!(categories, videos, db = %args.db_path.display(), "gallery content seeded");

    Ok(())
}
