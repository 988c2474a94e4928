use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;

use super::{AvailabilityFeed, AvailabilityMap, FeedError};

/// One entry in the stock file: a bare flag or a record.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StockEntry {
    Flag(bool),
    Record {
        #[serde(default, alias = "in_stock")]
        available: Option<bool>,
        #[serde(default)]
        status: Option<String>,
    },
}

impl StockEntry {
    fn is_available(&self) -> bool {
        match self {
            StockEntry::Flag(flag) => *flag,
            StockEntry::Record {
                available: Some(flag),
                ..
            } => *flag,
            StockEntry::Record {
                available: None,
                status,
            } => status
                .as_deref()
                .is_some_and(|s| s.eq_ignore_ascii_case("in_stock")),
        }
    }
}

/// Reads a JSON stock file written by an external monitor, once per poll.
///
/// Accepted shapes per item: `true`, `{"available": true}`,
/// `{"in_stock": true}` or `{"status": "IN_STOCK"}`.
pub struct FileAvailabilityFeed {
    path: PathBuf,
}

impl FileAvailabilityFeed {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parse a stock document.
    pub fn parse(raw: &str) -> Result<AvailabilityMap, FeedError> {
        let entries: BTreeMap<String, StockEntry> =
            serde_json::from_str(raw).map_err(|e| FeedError::Parse(e.to_string()))?;
        Ok(entries
            .into_iter()
            .map(|(id, entry)| {
                let available = entry.is_available();
                (id, available)
            })
            .collect())
    }
}

#[async_trait]
impl AvailabilityFeed for FileAvailabilityFeed {
    fn name(&self) -> &str {
        "file"
    }

    async fn poll(&self) -> Result<AvailabilityMap, FeedError> {
        let raw = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            FeedError::Unavailable(format!("failed to read {}: {}", self.path.display(), e))
        })?;
        Self::parse(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_mixed_shapes() {
        let raw = r#"{
            "94724987": true,
            "94681785": false,
            "94681770": {"available": true, "price": 49.99},
            "94336414": {"in_stock": false},
            "89542109": {"status": "IN_STOCK"},
            "94734932": {"status": "OUT_OF_STOCK"}
        }"#;

        let map = FileAvailabilityFeed::parse(raw).unwrap();
        assert_eq!(map.len(), 6);
        assert_eq!(map["94724987"], true);
        assert_eq!(map["94681785"], false);
        assert_eq!(map["94681770"], true);
        assert_eq!(map["94336414"], false);
        assert_eq!(map["89542109"], true);
        assert_eq!(map["94734932"], false);
    }

    #[test]
    fn test_parse_rejects_non_object() {
        let err = FileAvailabilityFeed::parse("[1, 2]").unwrap_err();
        assert!(matches!(err, FeedError::Parse(_)));
    }

    #[tokio::test]
    async fn test_poll_rereads_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stock.json");
        std::fs::write(&path, r#"{"a": false}"#).unwrap();

        let feed = FileAvailabilityFeed::new(&path);
        assert_eq!(feed.poll().await.unwrap()["a"], false);

        std::fs::write(&path, r#"{"a": true}"#).unwrap();
        assert_eq!(feed.poll().await.unwrap()["a"], true);
    }

    #[tokio::test]
    async fn test_missing_file_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let feed = FileAvailabilityFeed::new(dir.path().join("missing.json"));
        assert!(matches!(
            feed.poll().await.unwrap_err(),
            FeedError::Unavailable(_)
        ));
    }
}
