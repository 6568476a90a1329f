//! Candle Source: loads and caches per-symbol candle series from disk.

use crate::error::AppError;
use crate::models::Candle;
use async_trait::async_trait;
use dashmap::DashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[async_trait]
pub trait CandleSource: Send + Sync {
    /// Full ordered candle series for a symbol.
    async fn series(&self, symbol: &str) -> Result<Arc<Vec<Candle>>, AppError>;

    /// All symbols this source can draw a match from.
    fn symbols(&self) -> Vec<String>;
}

/// Reads one JSON file per symbol from `root`, keyed by filename stem, and
/// caches the parsed series for the process lifetime — the data files are
/// immutable market history, not something a running match ever mutates.
pub struct FilesystemCandleSource {
    root: PathBuf,
    cache: DashMap<String, Arc<Vec<Candle>>>,
}

impl FilesystemCandleSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            cache: DashMap::new(),
        }
    }

    fn path_for(&self, symbol: &str) -> PathBuf {
        self.root.join(format!("{symbol}.json"))
    }
}

#[async_trait]
impl CandleSource for FilesystemCandleSource {
    async fn series(&self, symbol: &str) -> Result<Arc<Vec<Candle>>, AppError> {
        if let Some(cached) = self.cache.get(symbol) {
            return Ok(cached.clone());
        }

        let path = self.path_for(symbol);
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|_| AppError::NotFound(format!("no candle data for symbol '{symbol}'")))?;

        let candles: Vec<Candle> = serde_json::from_slice(&bytes)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("malformed candle file {path:?}: {e}")))?;

        if candles.is_empty() {
            warn!(symbol, "candle file parsed but contains zero candles");
        }

        let series = Arc::new(candles);
        self.cache.insert(symbol.to_string(), series.clone());
        info!(symbol, candles = series.len(), "loaded candle series");
        Ok(series)
    }

    fn symbols(&self) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(&self.root) else {
            return Vec::new();
        };

        entries
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                let path = e.path();
                if path.extension().and_then(|s| s.to_str()) == Some("json") {
                    path.file_stem().and_then(|s| s.to_str()).map(String::from)
                } else {
                    None
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn loads_and_caches_a_symbol() {
        let dir = tempfile::tempdir().unwrap();
        let candles = vec![Candle {
            date: "2024-01-01".into(),
            open: 1.0,
            high: 2.0,
            low: 0.5,
            close: 1.5,
            volume: 100.0,
        }];
        std::fs::write(
            dir.path().join("ABC.json"),
            serde_json::to_vec(&candles).unwrap(),
        )
        .unwrap();

        let source = FilesystemCandleSource::new(dir.path());
        let loaded = source.series("ABC").await.unwrap();
        assert_eq!(loaded.len(), 1);

        // second call should hit the cache, not the filesystem
        std::fs::remove_file(dir.path().join("ABC.json")).unwrap();
        let cached = source.series("ABC").await.unwrap();
        assert_eq!(cached.len(), 1);
    }

    #[tokio::test]
    async fn missing_symbol_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let source = FilesystemCandleSource::new(dir.path());
        assert!(source.series("NOPE").await.is_err());
    }
}
