//! Loading of Shiller's annual market data.
//!
//! Expects a CSV with a header row containing at least `YEAR`, `P`, `D`,
//! `R`, `RLONG` and `CPI`. Interest rates are stored in percent and are
//! converted to decimals here.

use std::io::Read;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::core::YearlyRecord;

#[derive(Debug, Error)]
pub enum DataError {
    #[error("failed to read market data: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse market data: {0}")]
    Csv(#[from] csv::Error),

    #[error("market data file contains no rows")]
    Empty,
}

#[derive(Debug, Deserialize)]
struct ShillerRow {
    #[serde(rename = "YEAR")]
    year: i32,
    #[serde(rename = "P")]
    price: f64,
    #[serde(rename = "D")]
    dividend: f64,
    #[serde(rename = "R")]
    rate_pct: f64,
    #[serde(rename = "RLONG")]
    rate_long_pct: f64,
    #[serde(rename = "CPI")]
    cpi: f64,
}

impl From<ShillerRow> for YearlyRecord {
    fn from(row: ShillerRow) -> Self {
        YearlyRecord {
            year: row.year,
            stock_price: row.price,
            stock_dividend: row.dividend,
            short_rate: row.rate_pct / 100.0,
            long_rate: row.rate_long_pct / 100.0,
            cpi: row.cpi,
        }
    }
}

pub fn parse_shiller_csv<R: Read>(reader: R) -> Result<Vec<YearlyRecord>, DataError> {
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);

    let mut records = Vec::new();
    for row in reader.deserialize::<ShillerRow>() {
        records.push(YearlyRecord::from(row?));
    }
    if records.is_empty() {
        return Err(DataError::Empty);
    }

    records.sort_by_key(|r| r.year);
    debug!(
        rows = records.len(),
        first_year = records[0].year,
        last_year = records[records.len() - 1].year,
        "parsed market data"
    );
    Ok(records)
}

pub fn load_shiller_csv(path: impl AsRef<Path>) -> Result<Vec<YearlyRecord>, DataError> {
    let file = std::fs::File::open(path.as_ref())?;
    parse_shiller_csv(file)
}
