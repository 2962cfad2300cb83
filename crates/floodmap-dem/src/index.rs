//! Tile index: the mapping from tile identifier to source URL.
//!
//! The index is produced by an external build step and loaded once at
//! startup. It is read-only afterwards, so a shared `Arc<TileIndex>` can be
//! queried from any number of threads without locking.

use crate::{Result, TileId};
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Read-only map from [`TileId`] to the URL the tile is downloaded from.
#[derive(Debug, Clone, Default)]
pub struct TileIndex {
    urls: HashMap<String, String>,
}

impl TileIndex {
    /// Load an index stored as a JSON object of `"tile id": "url"` pairs.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let urls: HashMap<String, String> = serde_json::from_reader(BufReader::new(file))?;
        tracing::info!(
            path = %path.as_ref().display(),
            tiles = urls.len(),
            "Loaded tile index"
        );
        Ok(Self { urls })
    }

    /// Parse an index from a JSON string.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let urls = serde_json::from_str(json)?;
        Ok(Self { urls })
    }

    /// Build an index from `(tile id, url)` pairs.
    pub fn from_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            urls: entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Source URL for a tile, if the provider covers it.
    pub fn get(&self, id: &TileId) -> Option<&str> {
        self.urls.get(id.as_str()).map(String::as_str)
    }

    /// Whether the index has an entry for `id`.
    pub fn contains(&self, id: &TileId) -> bool {
        self.urls.contains_key(id.as_str())
    }

    /// Number of indexed tiles.
    pub fn len(&self) -> usize {
        self.urls.len()
    }

    /// Whether the index is empty.
    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_json_str() {
        let index = TileIndex::from_json_str(
            r#"{
                "323625618": "https://example.org/dgm1/dgm1_32_362_5618_1_nw_2021.tif",
                "323625619": "https://example.org/dgm1/dgm1_32_362_5619_1_nw_2021.tif"
            }"#,
        )
        .unwrap();

        assert_eq!(index.len(), 2);
        assert_eq!(
            index.get(&TileId::from("323625618")),
            Some("https://example.org/dgm1/dgm1_32_362_5618_1_nw_2021.tif")
        );
        assert!(index.get(&TileId::from("329995999")).is_none());
    }

    #[test]
    fn test_rejects_non_string_values() {
        assert!(TileIndex::from_json_str(r#"{"323625618": 5}"#).is_err());
    }
}
