//! Disk cache for DGM1 tiles with remote fetch on miss.
//!
//! Tiles are stored under the last path segment of their source URL. A file
//! that exists is a cache hit; there is no eviction.
//!
//! ## Thread Safety
//!
//! `TileCache` is `Send + Sync` and meant to be shared as `Arc<TileCache>`:
//! - Different tiles are downloaded in parallel
//! - Threads requesting the same uncached tile coordinate, with only one
//!   performing the download while the others wait for it
//! - Files are written to a temporary name and renamed into place, so
//!   readers (including other processes) never see a partial tile

use crate::index::TileIndex;
use crate::source::TileSource;
use crate::tile::RasterTile;
use crate::{DemError, Result, TileId};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

/// Default number of retries for transient fetch failures.
pub const DEFAULT_FETCH_RETRIES: u32 = 2;

/// Default delay before the first retry; doubled on each further attempt.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// Counter making temporary file names unique within the process.
static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Retry behaviour for remote fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchPolicy {
    /// Retries after the first attempt. Zero disables retrying.
    pub retries: u32,
    /// Delay before the first retry.
    pub backoff: Duration,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            retries: DEFAULT_FETCH_RETRIES,
            backoff: DEFAULT_RETRY_BACKOFF,
        }
    }
}

impl FetchPolicy {
    fn delay_for(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(2u32.saturating_pow(attempt))
    }
}

/// Where a loaded tile came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileOrigin {
    /// The file was already on disk.
    Cache,
    /// The file was downloaded by this call.
    Remote,
}

/// Result of resolving one tile.
#[derive(Debug)]
pub enum TileOutcome {
    /// The tile was decoded.
    Loaded {
        /// The decoded raster.
        tile: RasterTile,
        /// Whether it was read from disk or fetched.
        origin: TileOrigin,
    },
    /// The tile index has no entry for this tile.
    NotIndexed,
    /// The remote fetch or the cache write failed.
    FetchFailed(DemError),
    /// The file exists but is not a valid raster; it has been removed.
    DecodeFailed(DemError),
}

impl TileOutcome {
    /// The decoded tile, dropping every non-loaded outcome.
    pub fn into_tile(self) -> Option<RasterTile> {
        match self {
            TileOutcome::Loaded { tile, .. } => Some(tile),
            _ => None,
        }
    }

    /// Whether a tile was decoded.
    pub fn is_loaded(&self) -> bool {
        matches!(self, TileOutcome::Loaded { .. })
    }
}

/// Session statistics for a cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Tiles served from disk without a fetch.
    pub cache_hits: usize,
    /// Tiles downloaded this session.
    pub tiles_downloaded: usize,
    /// Total bytes downloaded this session.
    pub bytes_downloaded: u64,
    /// Fetches that ended in an error.
    pub fetch_failures: usize,
    /// Files that could not be decoded.
    pub decode_failures: usize,
}

/// Status of a tile download in progress.
#[derive(Debug, Clone)]
enum DownloadStatus {
    /// Download is in progress.
    InProgress,
    /// Download completed successfully.
    Complete,
    /// Download failed with an error message.
    Failed(String),
}

/// One in-flight download that other threads can wait on.
struct InFlight {
    status: Mutex<DownloadStatus>,
    done: Condvar,
}

impl InFlight {
    fn new() -> Self {
        Self {
            status: Mutex::new(DownloadStatus::InProgress),
            done: Condvar::new(),
        }
    }

    fn finish(&self, status: DownloadStatus) -> Result<()> {
        let mut current = self.status.lock().map_err(|_| DemError::CacheLockPoisoned)?;
        *current = status;
        self.done.notify_all();
        Ok(())
    }

    fn wait(&self) -> Result<DownloadStatus> {
        let mut status = self.status.lock().map_err(|_| DemError::CacheLockPoisoned)?;
        while matches!(*status, DownloadStatus::InProgress) {
            status = self
                .done
                .wait(status)
                .map_err(|_| DemError::CacheLockPoisoned)?;
        }
        Ok(status.clone())
    }
}

/// Either we own the download or someone else does.
enum Claim {
    Owner(Arc<InFlight>),
    Waiter(Arc<InFlight>),
}

/// Resolves tile identifiers to decoded rasters through a local directory.
pub struct TileCache {
    /// Shared tile index.
    index: Arc<TileIndex>,
    /// Directory holding cached tile files.
    cache_dir: PathBuf,
    /// Remote side.
    source: Box<dyn TileSource>,
    /// Retry behaviour.
    policy: FetchPolicy,
    /// EPSG code reported for files without a CRS GeoKey.
    fallback_epsg: u16,
    /// Downloads currently running, keyed by tile.
    in_flight: Mutex<HashMap<TileId, Arc<InFlight>>>,
    cache_hits: AtomicUsize,
    tiles_downloaded: AtomicUsize,
    bytes_downloaded: AtomicU64,
    fetch_failures: AtomicUsize,
    decode_failures: AtomicUsize,
}

impl std::fmt::Debug for TileCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileCache")
            .field("cache_dir", &self.cache_dir)
            .field("indexed_tiles", &self.index.len())
            .field("policy", &self.policy)
            .finish()
    }
}

impl TileCache {
    /// Create a cache in `cache_dir`, creating the directory if needed.
    pub fn new<P, S>(index: Arc<TileIndex>, cache_dir: P, source: S) -> Result<Self>
    where
        P: AsRef<Path>,
        S: TileSource + 'static,
    {
        let cache_dir = cache_dir.as_ref().to_path_buf();
        fs::create_dir_all(&cache_dir)?;

        Ok(Self {
            index,
            cache_dir,
            source: Box::new(source),
            policy: FetchPolicy::default(),
            fallback_epsg: crate::coords::DEFAULT_PROJECTED_EPSG,
            in_flight: Mutex::new(HashMap::new()),
            cache_hits: AtomicUsize::new(0),
            tiles_downloaded: AtomicUsize::new(0),
            bytes_downloaded: AtomicU64::new(0),
            fetch_failures: AtomicUsize::new(0),
            decode_failures: AtomicUsize::new(0),
        })
    }

    /// Set the retry policy.
    pub fn with_policy(mut self, policy: FetchPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Set the EPSG code used when a file has no CRS GeoKey.
    pub fn with_fallback_epsg(mut self, epsg: u16) -> Self {
        self.fallback_epsg = epsg;
        self
    }

    /// Get the cache directory.
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// The tile index this cache resolves against.
    pub fn index(&self) -> &TileIndex {
        &self.index
    }

    /// Get statistics for this session.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            tiles_downloaded: self.tiles_downloaded.load(Ordering::Relaxed),
            bytes_downloaded: self.bytes_downloaded.load(Ordering::Relaxed),
            fetch_failures: self.fetch_failures.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
        }
    }

    /// Local path a tile downloaded from `url` is stored under.
    pub fn cache_path_for_url(&self, url: &str) -> Result<PathBuf> {
        Ok(self.cache_dir.join(cache_file_name(url)?))
    }

    /// Check if a tile is cached locally.
    pub fn is_cached(&self, id: &TileId) -> bool {
        self.index
            .get(id)
            .and_then(|url| self.cache_path_for_url(url).ok())
            .is_some_and(|path| path.exists())
    }

    /// Resolve a tile to a decoded raster, downloading it on a cache miss.
    ///
    /// Failures are reported in the outcome and never abort the caller.
    pub fn resolve(&self, id: &TileId) -> TileOutcome {
        let Some(url) = self.index.get(id) else {
            debug!(tile = %id, "Tile not in index");
            return TileOutcome::NotIndexed;
        };

        let path = match self.cache_path_for_url(url) {
            Ok(path) => path,
            Err(e) => return self.fetch_failed(id, e),
        };

        if path.exists() {
            debug!(tile = %id, path = %path.display(), "Cache hit");
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
            return self.load(id, &path);
        }

        debug!(tile = %id, url, "Cache miss");
        match self.fetch_once(id, url, &path) {
            Ok(TileOrigin::Remote) => match self.load(id, &path) {
                TileOutcome::Loaded { tile, .. } => TileOutcome::Loaded {
                    tile,
                    origin: TileOrigin::Remote,
                },
                other => other,
            },
            Ok(TileOrigin::Cache) => {
                self.cache_hits.fetch_add(1, Ordering::Relaxed);
                self.load(id, &path)
            }
            Err(e) => self.fetch_failed(id, e),
        }
    }

    fn fetch_failed(&self, id: &TileId, error: DemError) -> TileOutcome {
        warn!(tile = %id, error = %error, "Tile fetch failed");
        self.fetch_failures.fetch_add(1, Ordering::Relaxed);
        TileOutcome::FetchFailed(error)
    }

    /// Decode a file on disk, removing it if its contents are corrupt.
    ///
    /// A file that merely could not be read is kept for the next request.
    fn load(&self, id: &TileId, path: &Path) -> TileOutcome {
        match RasterTile::from_file(path, id.clone(), self.fallback_epsg) {
            Ok(tile) => TileOutcome::Loaded {
                tile,
                origin: TileOrigin::Cache,
            },
            Err(e) if e.is_corrupt_data() => {
                warn!(
                    tile = %id,
                    path = %path.display(),
                    error = %e,
                    "Removing undecodable tile file"
                );
                if let Err(remove_err) = fs::remove_file(path) {
                    warn!(path = %path.display(), error = %remove_err, "Could not remove tile file");
                }
                self.decode_failures.fetch_add(1, Ordering::Relaxed);
                TileOutcome::DecodeFailed(e)
            }
            Err(e) => {
                warn!(tile = %id, path = %path.display(), error = %e, "Could not read tile file");
                self.decode_failures.fetch_add(1, Ordering::Relaxed);
                TileOutcome::DecodeFailed(e)
            }
        }
    }

    /// Make sure the tile is on disk, downloading it at most once per process
    /// at a time.
    ///
    /// Returns `Remote` if this call downloaded the file and `Cache` if another
    /// thread did.
    fn fetch_once(&self, id: &TileId, url: &str, path: &Path) -> Result<TileOrigin> {
        let claim = {
            let mut in_flight = self
                .in_flight
                .lock()
                .map_err(|_| DemError::CacheLockPoisoned)?;

            match in_flight.get(id) {
                Some(entry) => Claim::Waiter(Arc::clone(entry)),
                None => {
                    // Another thread may have finished between our exists() check and now
                    if path.exists() {
                        return Ok(TileOrigin::Cache);
                    }
                    let entry = Arc::new(InFlight::new());
                    in_flight.insert(id.clone(), Arc::clone(&entry));
                    Claim::Owner(entry)
                }
            }
        };

        match claim {
            Claim::Waiter(entry) => {
                debug!(tile = %id, "Waiting for download in another thread");
                match entry.wait()? {
                    DownloadStatus::Failed(reason) => Err(DemError::TileDownloadFailed {
                        tile_id: id.to_string(),
                        reason,
                    }),
                    _ => Ok(TileOrigin::Cache),
                }
            }
            Claim::Owner(entry) => {
                let result = self.download(id, url, path);

                if let Ok(mut in_flight) = self.in_flight.lock() {
                    in_flight.remove(id);
                }
                let status = match &result {
                    Ok(()) => DownloadStatus::Complete,
                    Err(e) => DownloadStatus::Failed(e.to_string()),
                };
                entry.finish(status)?;

                result.map(|()| TileOrigin::Remote)
            }
        }
    }

    /// Fetch with retries and persist the body atomically.
    fn download(&self, id: &TileId, url: &str, path: &Path) -> Result<()> {
        let mut attempt = 0;
        let bytes = loop {
            match self.source.fetch(url) {
                Ok(bytes) => break bytes,
                Err(e) if e.is_transient() && attempt < self.policy.retries => {
                    let delay = self.policy.delay_for(attempt);
                    warn!(
                        tile = %id,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient fetch failure, retrying"
                    );
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        };

        if bytes.is_empty() {
            return Err(DemError::TileDownloadFailed {
                tile_id: id.to_string(),
                reason: "empty response body".to_string(),
            });
        }

        self.tiles_downloaded.fetch_add(1, Ordering::Relaxed);
        self.bytes_downloaded
            .fetch_add(bytes.len() as u64, Ordering::Relaxed);

        write_atomically(path, &bytes)?;
        debug!(tile = %id, bytes = bytes.len(), path = %path.display(), "Tile downloaded");
        Ok(())
    }
}

/// Derive the cache file name from the last URL path segment.
fn cache_file_name(url: &str) -> Result<&str> {
    let end = url.find(['?', '#']).unwrap_or(url.len());
    let path = &url[..end];
    let name = path.rsplit('/').next().unwrap_or(path);

    if name.is_empty() || name == "." || name == ".." || name.contains(['\\', ':']) {
        return Err(DemError::InvalidFilename(url.to_string()));
    }
    Ok(name)
}

/// Write `bytes` to a temporary sibling of `path`, sync it, then rename.
fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| DemError::InvalidFilename(path.display().to_string()))?;
    fs::create_dir_all(dir)?;

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| DemError::InvalidFilename(path.display().to_string()))?;
    let temp_path = dir.join(format!(
        ".{file_name}.{}.{}.part",
        std::process::id(),
        TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));

    let written = (|| -> Result<()> {
        let mut file = fs::File::create(&temp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&temp_path, path)?;
        Ok(())
    })();

    if written.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    written
}
