//! Bond fund total returns simulated from interest rates.
//!
//! The fund is a ladder of ten bonds maturing one year apart. Every year the
//! coupons are collected, the rung that reached maturity is redeemed at par
//! and the whole proceeds buy a new ten-year bond at the current long rate.
//! Each rung earns the coupon fixed when it was bought; its market value is
//! marked against a yield curve interpolated linearly between the current
//! short (1-year) and long (10-year) rates.

use std::collections::VecDeque;

use super::error::EngineError;
use super::types::YearlyRecord;

pub const LADDER_RUNGS: usize = 10;

#[derive(Debug, Clone, Copy)]
struct Rung {
    par: f64,
    coupon_rate: f64,
}

#[derive(Debug)]
struct BondLadder {
    rungs: VecDeque<Rung>,
}

impl BondLadder {
    /// Rungs bought at `long_rate`; the shortest rung has par 1 and each
    /// longer rung carries the coupons reinvested into it since.
    fn bootstrap(long_rate: f64) -> Self {
        let rungs = (0..LADDER_RUNGS)
            .map(|n| Rung {
                par: (1.0 + long_rate).powi(n as i32),
                coupon_rate: long_rate,
            })
            .collect();
        Self { rungs }
    }

    fn roll(&mut self, long_rate: f64) {
        let income: f64 = self.rungs.iter().map(|r| r.par * r.coupon_rate).sum();
        let redeemed = self.rungs.pop_front().map_or(0.0, |r| r.par);
        self.rungs.push_back(Rung {
            par: income + redeemed,
            coupon_rate: long_rate,
        });
    }

    fn net_asset_value(&self, short_rate: f64, long_rate: f64) -> f64 {
        self.rungs
            .iter()
            .enumerate()
            .map(|(idx, rung)| {
                let maturity = idx as u32 + 1;
                present_value(
                    curve_rate(short_rate, long_rate, maturity),
                    maturity,
                    rung.par * rung.coupon_rate,
                    rung.par,
                )
            })
            .sum()
    }
}

fn curve_rate(short_rate: f64, long_rate: f64, maturity: u32) -> f64 {
    short_rate + (long_rate - short_rate) * f64::from(maturity - 1) / (LADDER_RUNGS - 1) as f64
}

fn present_value(rate: f64, periods: u32, payment: f64, face: f64) -> f64 {
    if rate == 0.0 {
        return face + payment * f64::from(periods);
    }
    let growth = (1.0 + rate).powi(periods as i32);
    (face + payment * (growth - 1.0) / rate) / growth
}

fn validate_rates(record: &YearlyRecord) -> Result<(), EngineError> {
    for (label, rate) in [
        ("short rate", record.short_rate),
        ("long rate", record.long_rate),
    ] {
        if !rate.is_finite() || rate <= -1.0 {
            return Err(EngineError::invalid_record(
                record.year,
                format!("{label} must be finite and greater than -100%, got {rate}"),
            ));
        }
    }
    Ok(())
}

/// Total return of the ladder fund for every year-over-year transition in
/// `records`. The result has one entry fewer than `records`.
pub fn derive_bond_returns(records: &[YearlyRecord]) -> Result<Vec<f64>, EngineError> {
    let Some((first, rest)) = records.split_first() else {
        return Err(EngineError::InsufficientData { records: 0 });
    };
    if rest.is_empty() {
        return Err(EngineError::InsufficientData { records: 1 });
    }

    validate_rates(first)?;
    let mut ladder = BondLadder::bootstrap(first.long_rate);
    let mut nav = ladder.net_asset_value(first.short_rate, first.long_rate);
    if !nav.is_finite() || nav <= 0.0 {
        return Err(EngineError::invalid_record(
            first.year,
            "bond ladder value is not positive",
        ));
    }

    let mut returns = Vec::with_capacity(rest.len());
    for record in rest {
        validate_rates(record)?;
        ladder.roll(record.long_rate);
        let next_nav = ladder.net_asset_value(record.short_rate, record.long_rate);
        if !next_nav.is_finite() || next_nav <= 0.0 {
            return Err(EngineError::invalid_record(
                record.year,
                "bond ladder value is not positive",
            ));
        }
        returns.push(next_nav / nav - 1.0);
        nav = next_nav;
    }

    Ok(returns)
}
