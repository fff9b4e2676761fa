//! Loading VAST documents from URLs and local files.

use crate::config::ResolveConfig;
use crate::error::{Result, VastError};
use crate::xml::{Element, parse_document};
use log::{debug, info};
use rand::distributions::Alphanumeric;
use rand::{Rng, thread_rng};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Source of parsed documents for wrapper targets and top-level queries
pub trait Fetch {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<Element>>;
}

/// Fetches over HTTP(S) with a cookie store, and reads `file://` URLs and
/// plain paths from disk
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(config: &ResolveConfig) -> Result<Self> {
        Self::with_timeout(config.fetch_timeout())
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .cookie_store(true)
            .build()
            .map_err(|e| VastError::Other(format!("Failed to build HTTP client: {}", e)))?;
        Ok(HttpFetcher { client })
    }

    /// The underlying client, shared with beacons so cookies carry over
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Raw content of a URL or path
    pub async fn fetch_content(&self, url_or_path: &str) -> Result<String> {
        if let Some(path) = url_or_path.strip_prefix("file://") {
            let path = PathBuf::from(path);
            debug!("Reading from file: {}", path.display());
            return Ok(tokio::fs::read_to_string(path).await?);
        }

        if Path::new(url_or_path).exists() {
            debug!("Reading from local file: {}", url_or_path);
            return Ok(tokio::fs::read_to_string(url_or_path).await?);
        }

        self.fetch_url(url_or_path).await
    }

    async fn fetch_url(&self, url: &str) -> Result<String> {
        // Random request id to correlate log lines
        let req_id: String = thread_rng()
            .sample_iter(&Alphanumeric)
            .take(6)
            .map(char::from)
            .collect();

        let parsed = url::Url::parse(url)?;
        info!("[{}] Fetching from URL: {}", req_id, parsed);
        let start_time = Instant::now();

        let fetch_error = |reason: String| VastError::FetchError {
            url: url.to_string(),
            reason,
        };

        let response = self.client.get(parsed).send().await.map_err(|e| {
            debug!("[{}] Request failed after {:?}", req_id, start_time.elapsed());
            fetch_error(e.to_string())
        })?;

        if !response.status().is_success() {
            return Err(fetch_error(format!("HTTP status {}", response.status())));
        }

        let body = response
            .text()
            .await
            .map_err(|e| fetch_error(format!("Failed to read response body: {}", e)))?;

        debug!("[{}] Request completed in {:?}", req_id, start_time.elapsed());
        Ok(body)
    }
}

impl Fetch for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Element> {
        let content = self.fetch_content(url).await?;
        parse_document(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn fetcher() -> HttpFetcher {
        HttpFetcher::new(&ResolveConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn reads_local_paths_and_file_urls() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "<VAST version=\"3.0\"><Ad/></VAST>").unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let root = fetcher().fetch(&path).await.unwrap();
        assert_eq!(root.attr("version"), Some("3.0"));

        let root = fetcher().fetch(&format!("file://{}", path)).await.unwrap();
        assert_eq!(root.descendants("Ad").len(), 1);
    }

    #[tokio::test]
    async fn non_xml_body_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "<VAST><Ad></VAST>").unwrap();
        let path = file.path().to_str().unwrap().to_string();

        assert!(fetcher().fetch(&path).await.is_err());
    }

    #[tokio::test]
    async fn rejects_invalid_urls() {
        let err = fetcher().fetch("not a url").await.unwrap_err();
        assert!(matches!(err, VastError::UrlError(_)));

        let err = fetcher().fetch("file:///definitely/missing.xml").await.unwrap_err();
        assert!(matches!(err, VastError::IoError(_)));
    }
}
