mod bonds;
mod engine;
mod error;
mod returns;
mod types;

pub use bonds::{LADDER_RUNGS, derive_bond_returns};
pub use engine::{
    aggregate_success_rate, candidate_starts, run_periods, run_simulation, simulate_period,
    success_rate, validate_parameters,
};
pub use error::EngineError;
pub use returns::{derive_returns, inflation_rate, stock_total_return};
pub use types::{
    AnnualReturn, MAX_ROUNDING_DECIMALS, PeriodOutcome, ReturnSeries, SimulationParameters,
    SimulationReport, StudyWindow, SuccessRate, YearlyRecord,
};
