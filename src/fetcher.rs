//! Page retrieval for taxonomy documents and HTML pages.

use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use reqwest::blocking::Client;
use url::Url;

use crate::error::FetchError;

const USER_AGENT: &str = concat!("docrag/", env!("CARGO_PKG_VERSION"));

/// Source of documentation pages addressed by site-relative path.
pub trait PageSource: Send + Sync {
    /// Returns the body of the page at `path` (e.g. `/cloudhelp/ENU/.../Sketch.htm`).
    fn fetch(&self, path: &str) -> Result<String, FetchError>;
}

/// Blocking HTTP page source rooted at a host prefix.
pub struct HttpPageSource {
    client: Client,
    base: Url,
    politeness_delay: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl HttpPageSource {
    /// Builds a new HTTP source.
    ///
    /// `timeout` bounds every request; `politeness_delay` is the minimum gap between
    /// consecutive requests issued through this source, shared across worker threads.
    pub fn new(base: &str, timeout: Duration, politeness_delay: Duration) -> anyhow::Result<Self> {
        let base = Url::parse(base).with_context(|| format!("invalid page host {base:?}"))?;
        anyhow::ensure!(
            matches!(base.scheme(), "http" | "https"),
            "page host must be an http(s) URL"
        );
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .context("failed to build page HTTP client")?;
        Ok(Self {
            client,
            base,
            politeness_delay,
            last_request: Mutex::new(None),
        })
    }

    /// Appends a site-relative path to the host prefix, keeping any path the prefix carries.
    pub fn url_for(&self, path: &str) -> Result<Url, FetchError> {
        let base = self.base.as_str().trim_end_matches('/');
        let path = path.trim();
        let joined = if path.starts_with('/') {
            format!("{base}{path}")
        } else {
            format!("{base}/{path}")
        };
        Url::parse(&joined).map_err(|source| FetchError::InvalidPath {
            path: path.to_string(),
            source,
        })
    }

    fn wait_turn(&self) {
        if self.politeness_delay.is_zero() {
            return;
        }
        let mut last = match self.last_request.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.politeness_delay {
                thread::sleep(self.politeness_delay - elapsed);
            }
        }
        *last = Some(Instant::now());
    }
}

impl PageSource for HttpPageSource {
    fn fetch(&self, path: &str) -> Result<String, FetchError> {
        let url = self.url_for(path)?;
        self.wait_turn();
        let http_error = |source| FetchError::Http {
            url: url.to_string(),
            source,
        };
        let response = self.client.get(url.clone()).send().map_err(http_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        response.text().map_err(http_error)
    }
}

/// Page source backed by a local mirror of the site.
///
/// A path such as `/cloudhelp/Sketch.htm` maps to `<root>/cloudhelp/Sketch.htm`.
pub struct DirectoryPageSource {
    root: PathBuf,
}

impl DirectoryPageSource {
    /// Serves pages from `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl PageSource for DirectoryPageSource {
    fn fetch(&self, path: &str) -> Result<String, FetchError> {
        let relative = path.split(['?', '#']).next().unwrap_or(path);
        let file = self.root.join(relative.trim_start_matches('/'));
        fs::read_to_string(&file).map_err(|source| FetchError::Io {
            path: file.display().to_string(),
            source,
        })
    }
}
