//! Document fetching: HTTP(S) URLs or local files, with a SQLite body cache.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use indicatif::{ProgressBar, ProgressStyle};
use rusqlite::Connection;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::config::FetchConfig;
use crate::db;
use crate::error::ExtractError;

/// Where a document comes from. Anything that is not an http(s) URL is a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    Url(String),
    Path(PathBuf),
}

impl Source {
    pub fn parse(s: &str) -> Source {
        let s = s.trim();
        if s.starts_with("http://") || s.starts_with("https://") {
            Source::Url(s.to_string())
        } else {
            Source::Path(PathBuf::from(s))
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Url(u) => f.write_str(u),
            Source::Path(p) => write!(f, "{}", p.display()),
        }
    }
}

pub struct HttpFetcher {
    client: reqwest::Client,
    max_retries: u32,
    base_backoff_ms: u64,
}

impl HttpFetcher {
    pub fn new(cfg: &FetchConfig) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(cfg.user_agent.as_str())
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()?;
        Ok(HttpFetcher {
            client,
            max_retries: cfg.max_retries,
            base_backoff_ms: cfg.base_backoff_ms,
        })
    }

    /// GET `url`, retrying rate limits and server errors with exponential backoff.
    pub async fn fetch(&self, url: &str) -> Result<Vec<u8>, ExtractError> {
        let mut attempt = 0;
        loop {
            match self.fetch_once(url).await {
                Ok(body) => return Ok(body),
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    let backoff = Duration::from_millis(self.base_backoff_ms * 2u64.pow(attempt));
                    warn!(
                        "{} (attempt {}/{}), backing off {:.1}s",
                        e,
                        attempt + 1,
                        self.max_retries,
                        backoff.as_secs_f64()
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn fetch_once(&self, url: &str) -> Result<Vec<u8>, ExtractError> {
        let request_err = |source: reqwest::Error| ExtractError::Request {
            url: url.to_string(),
            source,
        };
        let resp = self.client.get(url).send().await.map_err(request_err)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ExtractError::Http {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        let body = resp.bytes().await.map_err(request_err)?;
        Ok(body.to_vec())
    }

    pub async fn load(&self, source: &Source) -> Result<Vec<u8>, ExtractError> {
        match source {
            Source::Url(url) => self.fetch(url).await,
            Source::Path(path) => Ok(tokio::fs::read(path).await?),
        }
    }
}

/// Load every source, using cached URL bodies younger than `cfg.cache_ttl_hours`.
///
/// Misses are fetched concurrently; results come back in `sources` order so
/// later merge steps see documents in a fixed order.
pub async fn load_documents(
    conn: &Connection,
    fetcher: Arc<HttpFetcher>,
    sources: &[Source],
    cfg: &FetchConfig,
) -> anyhow::Result<Vec<Vec<u8>>> {
    let mut bodies: Vec<Option<Vec<u8>>> = Vec::with_capacity(sources.len());
    for source in sources {
        let cached = match source {
            Source::Url(url) if cfg.cache_ttl_hours > 0 => {
                db::cached_document(conn, url, cfg.cache_ttl_hours)?
            }
            _ => None,
        };
        if cached.is_some() {
            debug!("Cache hit: {}", source);
        }
        bodies.push(cached);
    }

    let misses: Vec<usize> = (0..sources.len()).filter(|&i| bodies[i].is_none()).collect();
    if misses.is_empty() {
        return Ok(bodies.into_iter().flatten().collect());
    }

    let pb = ProgressBar::new(misses.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} {msg}")?
            .progress_chars("=> "),
    );

    let semaphore = Arc::new(Semaphore::new(cfg.concurrency.max(1)));
    let handles: Vec<_> = misses
        .iter()
        .map(|&i| {
            let fetcher = Arc::clone(&fetcher);
            let sem = Arc::clone(&semaphore);
            let source = sources[i].clone();
            tokio::spawn(async move {
                let _permit = sem.acquire_owned().await;
                fetcher.load(&source).await
            })
        })
        .collect();

    for (&i, handle) in misses.iter().zip(handles) {
        let source = &sources[i];
        pb.set_message(source.to_string());
        let body = handle
            .await?
            .with_context(|| format!("Failed to load {}", source))?;
        if let Source::Url(url) = source {
            if cfg.cache_ttl_hours > 0 {
                db::save_document(conn, url, &body)?;
            }
        }
        info!("Loaded {} ({} bytes)", source, body.len());
        bodies[i] = Some(body);
        pb.inc(1);
    }
    pb.finish_and_clear();

    Ok(bodies.into_iter().flatten().collect())
}
