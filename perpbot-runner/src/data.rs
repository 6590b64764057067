//! Candle loading for replay and signal scans.
//!
//! One CSV file per symbol, `<dir>/<SYMBOL>.csv`, with a header row:
//!
//! ```text
//! timestamp,open,high,low,close,volume
//! 2024-03-01T00:00:00Z,100000.0,100010.0,99990.0,100000.0,12.5
//! ```
//!
//! `timestamp` is the candle start, either RFC 3339 or epoch milliseconds.
//! Rows must be strictly ascending and pass the OHLC sanity check. Every
//! loaded candle is closed.

use chrono::{DateTime, TimeZone, Utc};
use perpbot_core::domain::Candle;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DataError {
    #[error("cannot read {path}: {source}")]
    Csv { path: PathBuf, source: csv::Error },

    #[error("{path} line {line}: bad timestamp '{value}'")]
    BadTimestamp {
        path: PathBuf,
        line: u64,
        value: String,
    },

    #[error("{path} line {line}: candle is not after the previous one")]
    Unsorted { path: PathBuf, line: u64 },

    #[error("{path} line {line}: OHLCV values are inconsistent")]
    Insane { path: PathBuf, line: u64 },

    #[error("{path} contains no candles")]
    Empty { path: PathBuf },
}

#[derive(Debug, Deserialize)]
struct CandleRow {
    timestamp: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(millis) = raw.parse::<i64>() {
        return Utc.timestamp_millis_opt(millis).single();
    }
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Load and check one candle file.
pub fn load_candles(path: &Path) -> Result<Vec<Candle>, DataError> {
    let csv_err = |source| DataError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(csv_err)?;

    let mut candles: Vec<Candle> = Vec::new();
    for result in reader.deserialize::<CandleRow>() {
        let row = result.map_err(csv_err)?;
        // header is line 1
        let line = candles.len() as u64 + 2;

        let start_time = parse_timestamp(&row.timestamp).ok_or_else(|| DataError::BadTimestamp {
            path: path.to_path_buf(),
            line,
            value: row.timestamp.clone(),
        })?;
        let candle = Candle {
            start_time,
            open: row.open,
            high: row.high,
            low: row.low,
            close: row.close,
            volume: row.volume,
            is_closed: true,
        };

        if !candle.is_sane() {
            return Err(DataError::Insane {
                path: path.to_path_buf(),
                line,
            });
        }
        if candles.last().is_some_and(|prev| prev.start_time >= start_time) {
            return Err(DataError::Unsorted {
                path: path.to_path_buf(),
                line,
            });
        }
        candles.push(candle);
    }

    if candles.is_empty() {
        return Err(DataError::Empty {
            path: path.to_path_buf(),
        });
    }
    Ok(candles)
}

/// Load `<dir>/<SYMBOL>.csv` for every symbol.
pub fn load_dir(dir: &Path, symbols: &[String]) -> Result<BTreeMap<String, Vec<Candle>>, DataError> {
    symbols
        .iter()
        .map(|symbol| {
            let path = dir.join(format!("{symbol}.csv"));
            load_candles(&path).map(|candles| (symbol.clone(), candles))
        })
        .collect()
}

/// BLAKE3 over every candle of every symbol, in symbol order.
pub fn dataset_hash(data: &BTreeMap<String, Vec<Candle>>) -> String {
    let mut hasher = blake3::Hasher::new();
    for (symbol, candles) in data {
        hasher.update(symbol.as_bytes());
        for c in candles {
            hasher.update(&c.start_time.timestamp_millis().to_le_bytes());
            for value in [c.open, c.high, c.low, c.close, c.volume] {
                hasher.update(&value.to_le_bytes());
            }
        }
    }
    hasher.finalize().to_hex()[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_csv(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "timestamp,open,high,low,close,volume").unwrap();
        file.write_all(body.as_bytes()).unwrap();
        path
    }

    #[test]
    fn loads_rfc3339_and_millis() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(
            dir.path(),
            "BTCUSDT.csv",
            "2024-03-01T00:00:00Z,100,101,99,100.5,10\n1709251260000,100.5,102,100,101,12\n",
        );
        let candles = load_candles(&path).unwrap();
        assert_eq!(candles.len(), 2);
        assert_eq!(
            candles[1].start_time - candles[0].start_time,
            chrono::Duration::minutes(1)
        );
        assert!(candles.iter().all(|c| c.is_closed));
        assert_eq!(candles[1].close, 101.0);
    }

    #[test]
    fn rejects_unsorted_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(
            dir.path(),
            "X.csv",
            "2024-03-01T00:01:00Z,100,101,99,100,1\n2024-03-01T00:00:00Z,100,101,99,100,1\n",
        );
        assert!(matches!(
            load_candles(&path),
            Err(DataError::Unsorted { line: 3, .. })
        ));
    }

    #[test]
    fn rejects_insane_candle() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(dir.path(), "X.csv", "2024-03-01T00:00:00Z,100,99,101,100,1\n");
        assert!(matches!(
            load_candles(&path),
            Err(DataError::Insane { line: 2, .. })
        ));
    }

    #[test]
    fn rejects_bad_timestamp_and_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let bad = write_csv(dir.path(), "A.csv", "yesterday,100,101,99,100,1\n");
        assert!(matches!(
            load_candles(&bad),
            Err(DataError::BadTimestamp { .. })
        ));
        let empty = write_csv(dir.path(), "B.csv", "");
        assert!(matches!(load_candles(&empty), Err(DataError::Empty { .. })));
    }

    #[test]
    fn load_dir_and_hash() {
        let dir = tempfile::tempdir().unwrap();
        write_csv(dir.path(), "BTCUSDT.csv", "2024-03-01T00:00:00Z,100,101,99,100,1\n");
        write_csv(dir.path(), "ETHUSDT.csv", "2024-03-01T00:00:00Z,10,11,9,10,1\n");
        let symbols = vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()];

        let data = load_dir(dir.path(), &symbols).unwrap();
        assert_eq!(data.len(), 2);
        assert_eq!(dataset_hash(&data), dataset_hash(&data.clone()));

        let mut changed = data.clone();
        if let Some(candles) = changed.get_mut("ETHUSDT") {
            candles[0].close = 10.5;
        }
        assert_ne!(dataset_hash(&data), dataset_hash(&changed));

        assert!(load_dir(dir.path(), &["SOLUSDT".to_string()]).is_err());
    }
}
