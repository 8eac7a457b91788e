//! Kline snapshots on disk, for offline and repeatable runs

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use tracing::info;

use crate::types::Kline;

/// Read a JSON array of klines, sorted by open time
pub fn load_klines(path: impl AsRef<Path>) -> Result<Vec<Kline>> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read klines from {}", path.display()))?;
    let mut klines: Vec<Kline> = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse klines in {}", path.display()))?;
    klines.sort_by_key(|k| k.open_time);

    info!(path = %path.display(), count = klines.len(), "Loaded klines");
    Ok(klines)
}

/// Write klines as pretty JSON, creating parent directories if needed
pub fn save_klines(path: impl AsRef<Path>, klines: &[Kline]) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(klines)?;
    fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?;

    info!(path = %path.display(), count = klines.len(), "Saved klines");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn kline(open_time: i64, close: rust_decimal::Decimal) -> Kline {
        Kline {
            open_time,
            open: close,
            high: close + dec!(1),
            low: close - dec!(1),
            close,
            volume: dec!(10),
            close_time: open_time + 3_599_999,
        }
    }

    #[test]
    fn test_save_then_load_sorts_by_time() {
        let path = std::env::temp_dir()
            .join(format!("engine-klines-{}", std::process::id()))
            .join("snapshot.json");
        let klines = vec![kline(7_200_000, dec!(101.5)), kline(0, dec!(100))];

        save_klines(&path, &klines).unwrap();
        let loaded = load_klines(&path).unwrap();

        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0], klines[1]);
        assert_eq!(loaded[1], klines[0]);

        fs::remove_dir_all(path.parent().unwrap()).ok();
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let err = load_klines("/nonexistent/klines.json").unwrap_err();
        assert!(err.to_string().contains("failed to read klines"));
    }
}
