//! Market data storage (CSV/Arrow/Parquet)
//!
//! Raw input for a run is one strictly time-ordered OHLCV series. Loading is
//! the only I/O the evaluation loop depends on; once a [`MarketData`] exists
//! every fold works on borrowed slices of it.
//!
//! Load pattern:
//! - Sort by timestamp, keep the last row of duplicated timestamps
//! - Column names are matched case-insensitively
//! - Required columns: `open`, `high`, `low`, `close`, `volume`

use crate::{Error, Result};
use arrow::array::{Array, ArrayRef, Float64Array, Int64Array};
use arrow::compute::cast;
use arrow::datatypes::{DataType, TimeUnit};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use std::ops::Range;
use std::path::Path;
use tracing::{info, warn};

/// Price columns every data source must provide
pub const REQUIRED_COLUMNS: [&str; 5] = ["open", "high", "low", "close", "volume"];

/// Accepted names for the time index column
const TIMESTAMP_COLUMNS: [&str; 4] = ["timestamp", "ts", "date", "datetime"];

/// One OHLCV bar; `ts` is unix seconds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bar {
    /// Bar open time (unix seconds, UTC)
    pub ts: i64,
    /// Open price
    pub open: f64,
    /// High price
    pub high: f64,
    /// Low price
    pub low: f64,
    /// Close price
    pub close: f64,
    /// Traded volume
    pub volume: f64,
}

/// Time-ordered market data for one instrument
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MarketData {
    bars: Vec<Bar>,
}

impl MarketData {
    /// Build from bars, sorting by time and de-duplicating timestamps.
    ///
    /// When two bars share a timestamp the one that came later in the input
    /// wins.
    #[must_use]
    pub fn new(mut bars: Vec<Bar>) -> Self {
        bars.sort_by_key(|b| b.ts);
        let before = bars.len();
        let mut deduped: Vec<Bar> = Vec::with_capacity(bars.len());
        for bar in bars {
            match deduped.last_mut() {
                Some(last) if last.ts == bar.ts => *last = bar,
                _ => deduped.push(bar),
            }
        }
        let dropped = before - deduped.len();
        if dropped > 0 {
            warn!(duplicates = dropped, "duplicate timestamps removed, kept last");
        }
        Self { bars: deduped }
    }

    /// Load a data file, choosing the reader from the extension.
    ///
    /// # Errors
    /// Returns error if the file is missing, unreadable or lacks required columns
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        match path.extension().and_then(|e| e.to_str()) {
            Some("parquet" | "pq") => Self::load_parquet(path),
            Some("csv") => Self::load_csv(path),
            other => Err(Error::Data(format!(
                "Unsupported data file extension {other:?} for {}",
                path.display()
            ))),
        }
    }

    /// Load OHLCV rows from a headered CSV file
    ///
    /// # Errors
    /// Returns error if the file cannot be read or a row fails to parse
    pub fn load_csv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::Data(format!("Data file not found: {}", path.display())));
        }
        let content = std::fs::read_to_string(path)?;
        let data = Self::parse_csv(&content)?;
        info!(path = %path.display(), rows = data.len(), "market data loaded");
        Ok(data)
    }

    /// Parse CSV text with a header row
    ///
    /// # Errors
    /// Returns error on a missing column or an unparseable field
    pub fn parse_csv(content: &str) -> Result<Self> {
        let mut lines = content
            .lines()
            .filter(|l| !l.trim().is_empty() && !l.starts_with('#'));
        let header = lines
            .next()
            .ok_or_else(|| Error::Data("CSV input is empty".to_string()))?;
        let columns: Vec<String> = header
            .split(',')
            .map(|c| c.trim().to_lowercase())
            .collect();

        let ts_idx = columns
            .iter()
            .position(|c| TIMESTAMP_COLUMNS.contains(&c.as_str()))
            .unwrap_or(0);
        let mut price_idx = [0usize; 5];
        for (slot, name) in price_idx.iter_mut().zip(REQUIRED_COLUMNS) {
            *slot = columns
                .iter()
                .position(|c| c == name)
                .ok_or_else(|| Error::Data(format!("CSV is missing required column '{name}'")))?;
        }

        let mut bars = Vec::new();
        for (line_no, line) in lines.enumerate() {
            let fields: Vec<&str> = line.split(',').map(str::trim).collect();
            let field = |idx: usize| {
                fields.get(idx).copied().ok_or_else(|| {
                    Error::Data(format!("CSV row {} has too few fields", line_no + 2))
                })
            };
            let number = |idx: usize| -> Result<f64> {
                let raw = field(idx)?;
                raw.parse::<f64>().map_err(|e| {
                    Error::Data(format!("CSV row {}: bad number '{raw}': {e}", line_no + 2))
                })
            };
            bars.push(Bar {
                ts: parse_timestamp(field(ts_idx)?)?,
                open: number(price_idx[0])?,
                high: number(price_idx[1])?,
                low: number(price_idx[2])?,
                close: number(price_idx[3])?,
                volume: number(price_idx[4])?,
            });
        }
        Ok(Self::new(bars))
    }

    /// Load table from Parquet file
    ///
    /// # Errors
    /// Returns error if file cannot be read or parsed
    pub fn load_parquet<P: AsRef<Path>>(path: P) -> Result<Self> {
        use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
        use std::fs::File;

        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            Error::Data(format!("Failed to open Parquet file {}: {e}", path.display()))
        })?;
        let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;

        let mut batches = Vec::new();
        for batch in reader {
            batches.push(batch?);
        }
        let data = Self::from_record_batches(&batches)?;
        info!(path = %path.display(), rows = data.len(), "market data loaded");
        Ok(data)
    }

    /// Convert Arrow record batches into bars
    ///
    /// # Errors
    /// Returns error if a required column is missing, null, or not numeric
    pub fn from_record_batches(batches: &[RecordBatch]) -> Result<Self> {
        let mut bars = Vec::new();
        for batch in batches {
            let schema = batch.schema();
            let find = |names: &[&str]| {
                schema
                    .fields()
                    .iter()
                    .position(|f| names.contains(&f.name().to_lowercase().as_str()))
            };
            let ts_idx = find(&TIMESTAMP_COLUMNS[..]).unwrap_or(0);
            let ts = timestamp_column(batch.column(ts_idx))?;

            let mut prices = Vec::with_capacity(REQUIRED_COLUMNS.len());
            for name in REQUIRED_COLUMNS {
                let idx = find(&[name][..]).ok_or_else(|| {
                    Error::Data(format!("Record batch is missing required column '{name}'"))
                })?;
                prices.push(float_column(batch.column(idx), name)?);
            }

            for (row, &ts) in ts.iter().enumerate() {
                bars.push(Bar {
                    ts,
                    open: prices[0][row],
                    high: prices[1][row],
                    low: prices[2][row],
                    close: prices[3][row],
                    volume: prices[4][row],
                });
            }
        }
        Ok(Self::new(bars))
    }

    /// All bars in time order
    #[must_use]
    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    /// Bars in a half-open index range
    ///
    /// # Panics
    /// Panics if the range is out of bounds; ranges come from the splitter,
    /// which never exceeds `len()`.
    #[must_use]
    pub fn slice(&self, range: Range<usize>) -> &[Bar] {
        &self.bars[range]
    }

    /// Number of bars
    #[must_use]
    pub fn len(&self) -> usize {
        self.bars.len()
    }

    /// Whether there are no bars
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }
}

/// Parse a timestamp field: unix seconds, a date, a naive datetime, or RFC 3339
fn parse_timestamp(raw: &str) -> Result<i64> {
    if let Ok(secs) = raw.parse::<i64>() {
        return Ok(secs);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.timestamp());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Ok(dt.and_utc().timestamp());
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        if let Some(dt) = date.and_hms_opt(0, 0, 0) {
            return Ok(dt.and_utc().timestamp());
        }
    }
    Err(Error::Data(format!("Unrecognised timestamp '{raw}'")))
}

fn timestamp_column(array: &ArrayRef) -> Result<Vec<i64>> {
    let (as_int, scale) = match array.data_type() {
        DataType::Timestamp(_, _) => (
            cast(
                &cast(array, &DataType::Timestamp(TimeUnit::Second, None))?,
                &DataType::Int64,
            )?,
            1,
        ),
        DataType::Date32 => (
            cast(&cast(array, &DataType::Int32)?, &DataType::Int64)?,
            86_400,
        ),
        _ => (cast(array, &DataType::Int64)?, 1),
    };
    let ints = as_int
        .as_any()
        .downcast_ref::<Int64Array>()
        .ok_or_else(|| Error::Data("timestamp column is not integral".to_string()))?;
    if ints.null_count() > 0 {
        return Err(Error::Data("timestamp column contains nulls".to_string()));
    }
    Ok(ints.values().iter().map(|v| v * scale).collect())
}

fn float_column(array: &ArrayRef, name: &str) -> Result<Vec<f64>> {
    let floats = cast(array, &DataType::Float64)?;
    let floats = floats
        .as_any()
        .downcast_ref::<Float64Array>()
        .ok_or_else(|| Error::Data(format!("column '{name}' is not numeric")))?;
    if floats.null_count() > 0 {
        return Err(Error::Data(format!("column '{name}' contains nulls")));
    }
    Ok(floats.values().to_vec())
}
