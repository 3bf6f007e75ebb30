use tracing::debug;

use super::bonds::derive_bond_returns;
use super::error::EngineError;
use super::types::{AnnualReturn, ReturnSeries, YearlyRecord};

pub fn stock_total_return(current: &YearlyRecord, next: &YearlyRecord) -> f64 {
    (next.stock_price - current.stock_price + current.stock_dividend) / current.stock_price
}

pub fn inflation_rate(current: &YearlyRecord, next: &YearlyRecord) -> f64 {
    next.cpi / current.cpi - 1.0
}

fn validate_records(records: &[YearlyRecord]) -> Result<(), EngineError> {
    if records.len() < 2 {
        return Err(EngineError::InsufficientData {
            records: records.len(),
        });
    }

    for record in records {
        if !record.stock_price.is_finite() || record.stock_price <= 0.0 {
            return Err(EngineError::invalid_record(
                record.year,
                format!("stock price must be > 0, got {}", record.stock_price),
            ));
        }
        if !record.stock_dividend.is_finite() || record.stock_dividend < 0.0 {
            return Err(EngineError::invalid_record(
                record.year,
                format!("stock dividend must be >= 0, got {}", record.stock_dividend),
            ));
        }
        if !record.cpi.is_finite() || record.cpi <= 0.0 {
            return Err(EngineError::invalid_record(
                record.year,
                format!("cpi must be > 0, got {}", record.cpi),
            ));
        }
    }

    for pair in records.windows(2) {
        if pair[1].year != pair[0].year + 1 {
            return Err(EngineError::invalid_record(
                pair[1].year,
                format!("expected year {} to follow {}", pair[0].year + 1, pair[0].year),
            ));
        }
    }

    Ok(())
}

/// Derives the aligned stock, bond and inflation series. Entry `i` covers the
/// transition from `records[i]` to `records[i + 1]`.
pub fn derive_returns(records: &[YearlyRecord]) -> Result<ReturnSeries, EngineError> {
    validate_records(records)?;
    let bond_returns = derive_bond_returns(records)?;

    let entries = records
        .windows(2)
        .zip(bond_returns)
        .map(|(pair, bond_return)| AnnualReturn {
            year: pair[0].year,
            stock_return: stock_total_return(&pair[0], &pair[1]),
            bond_return,
            inflation_rate: inflation_rate(&pair[0], &pair[1]),
        })
        .collect::<Vec<_>>();

    debug!(
        records = records.len(),
        returns = entries.len(),
        first_year = records[0].year,
        "derived return series"
    );
    Ok(ReturnSeries::new(entries))
}
