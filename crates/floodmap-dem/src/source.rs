//! Remote tile sources.
//!
//! The cache only needs "give me the bytes at this URL". Keeping that behind a
//! trait lets tests serve tiles from memory instead of the network.

use crate::{DemError, Result};
use std::time::Duration;

/// Default HTTP timeout for a single tile download.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(60);

/// Default User-Agent sent with tile requests.
pub const DEFAULT_USER_AGENT: &str = concat!("floodmap/", env!("CARGO_PKG_VERSION"));

/// Something that can download a raster file.
pub trait TileSource: Send + Sync {
    /// Fetch the body at `url`.
    ///
    /// A non-success HTTP status is reported as [`DemError::HttpStatus`].
    fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// Blocking HTTP tile source backed by reqwest.
#[derive(Debug, Clone)]
pub struct HttpTileSource {
    client: reqwest::blocking::Client,
}

impl HttpTileSource {
    /// Create a source with the default timeout and User-Agent.
    pub fn new() -> Result<Self> {
        Self::with_timeout(DEFAULT_FETCH_TIMEOUT, DEFAULT_USER_AGENT)
    }

    /// Create a source with an explicit per-request timeout.
    pub fn with_timeout(timeout: Duration, user_agent: &str) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()?;
        Ok(Self { client })
    }
}

impl TileSource for HttpTileSource {
    fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.client.get(url).send()?;

        if !response.status().is_success() {
            return Err(DemError::HttpStatus {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        Ok(response.bytes()?.to_vec())
    }
}

impl<T: TileSource + ?Sized> TileSource for std::sync::Arc<T> {
    fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        (**self).fetch(url)
    }
}
