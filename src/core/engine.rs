#[cfg(feature = "parallel")]
use rayon::prelude::*;
use tracing::{debug, info, warn};

use super::error::EngineError;
use super::returns::derive_returns;
use super::types::{
    AnnualReturn, PeriodOutcome, ReturnSeries, SimulationParameters, SimulationReport,
    SuccessRate, YearlyRecord,
};

const INITIAL_BALANCE: f64 = 1.0;

pub fn validate_parameters(params: &SimulationParameters) -> Result<(), EngineError> {
    if params.period_length == 0 {
        return Err(EngineError::InvalidParameter(
            "period length must be > 0".to_string(),
        ));
    }
    if !(0.0..=1.0).contains(&params.stock_allocation) {
        return Err(EngineError::InvalidParameter(format!(
            "stock allocation must be between 0 and 1, got {}",
            params.stock_allocation
        )));
    }
    if !params.withdrawal_rate.is_finite() || params.withdrawal_rate < 0.0 {
        return Err(EngineError::InvalidParameter(format!(
            "withdrawal rate must be >= 0, got {}",
            params.withdrawal_rate
        )));
    }
    if let Some(window) = params.window {
        if window.start_year > window.end_year {
            return Err(EngineError::InvalidParameter(format!(
                "study window start {} is after end {}",
                window.start_year, window.end_year
            )));
        }
    }
    Ok(())
}

/// Indices into `series` at which a complete period of `params.period_length`
/// years starts, restricted to the study window when one is set.
pub fn candidate_starts(series: &ReturnSeries, params: &SimulationParameters) -> Vec<usize> {
    let len = params.period_length as usize;
    let entries = series.entries();
    if len == 0 || len > entries.len() {
        return Vec::new();
    }

    (0..=entries.len() - len)
        .filter(|&start| match params.window {
            Some(window) => {
                entries[start].year >= window.start_year
                    && entries[start + len - 1].year <= window.end_year
            }
            None => true,
        })
        .collect()
}

/// Replays one retirement over `years`. The withdrawal comes out at the start
/// of each year, before that year's return is applied, and grows with
/// inflation afterwards. A balance below zero after a withdrawal ends the
/// period as a failure; exactly zero survives.
pub fn simulate_period(
    years: &[AnnualReturn],
    stock_allocation: f64,
    withdrawal_rate: f64,
) -> PeriodOutcome {
    let start_year = years.first().map_or(0, |y| y.year);
    let end_year = years.last().map_or(start_year, |y| y.year);

    let mut balance = INITIAL_BALANCE;
    let mut withdrawal = withdrawal_rate * INITIAL_BALANCE;

    for year in years {
        balance -= withdrawal;
        if balance < 0.0 {
            return PeriodOutcome {
                start_year,
                end_year,
                survived: false,
                failure_year: Some(year.year),
                ending_balance: balance,
            };
        }
        balance *= 1.0 + year.blended(stock_allocation);
        withdrawal *= 1.0 + year.inflation_rate;
    }

    PeriodOutcome {
        start_year,
        end_year,
        survived: true,
        failure_year: None,
        ending_balance: balance,
    }
}

fn simulate_starts(
    entries: &[AnnualReturn],
    starts: &[usize],
    params: &SimulationParameters,
) -> Vec<PeriodOutcome> {
    let len = params.period_length as usize;
    let run = |&start: &usize| {
        simulate_period(
            &entries[start..start + len],
            params.stock_allocation,
            params.withdrawal_rate,
        )
    };

    #[cfg(feature = "parallel")]
    let outcomes = starts.par_iter().map(run).collect();
    #[cfg(not(feature = "parallel"))]
    let outcomes = starts.iter().map(run).collect();

    outcomes
}

pub fn run_periods(
    series: &ReturnSeries,
    params: &SimulationParameters,
) -> Result<Vec<PeriodOutcome>, EngineError> {
    validate_parameters(params)?;

    let starts = candidate_starts(series, params);
    if starts.is_empty() {
        warn!(
            period_length = params.period_length,
            available = series.len(),
            window = ?params.window,
            "no complete period fits in the return history"
        );
        return Err(EngineError::NoPeriods);
    }

    let outcomes = simulate_starts(series.entries(), &starts, params);
    for outcome in outcomes.iter().filter(|o| !o.survived) {
        debug!(
            start_year = outcome.start_year,
            failure_year = ?outcome.failure_year,
            "portfolio depleted"
        );
    }
    Ok(outcomes)
}

pub fn aggregate_success_rate(outcomes: &[PeriodOutcome]) -> Result<SuccessRate, EngineError> {
    if outcomes.is_empty() {
        return Err(EngineError::NoPeriods);
    }
    let successful_periods = outcomes.iter().filter(|o| o.survived).count();
    let total_periods = outcomes.len();
    Ok(SuccessRate {
        successful_periods,
        total_periods,
        rate: successful_periods as f64 / total_periods as f64,
    })
}

pub fn run_simulation(
    series: &ReturnSeries,
    params: &SimulationParameters,
) -> Result<SimulationReport, EngineError> {
    let periods = run_periods(series, params)?;
    let success_rate = aggregate_success_rate(&periods)?;
    info!(
        stock_allocation = params.stock_allocation,
        period_length = params.period_length,
        withdrawal_rate = params.withdrawal_rate,
        successful = success_rate.successful_periods,
        total = success_rate.total_periods,
        rate = success_rate.rate,
        "simulation complete"
    );
    Ok(SimulationReport {
        success_rate,
        periods,
    })
}

pub fn success_rate(
    records: &[YearlyRecord],
    params: &SimulationParameters,
) -> Result<SuccessRate, EngineError> {
    validate_parameters(params)?;
    let series = derive_returns(records)?;
    run_simulation(&series, params).map(|report| report.success_rate)
}
