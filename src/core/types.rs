use serde::Serialize;

/// One calendar year of raw market data. Rates are decimals, not percent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct YearlyRecord {
    pub year: i32,
    pub stock_price: f64,
    pub stock_dividend: f64,
    pub short_rate: f64,
    pub long_rate: f64,
    pub cpi: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnualReturn {
    pub year: i32,
    pub stock_return: f64,
    pub bond_return: f64,
    pub inflation_rate: f64,
}

impl AnnualReturn {
    pub fn real_stock_return(&self) -> f64 {
        real_return(self.stock_return, self.inflation_rate)
    }

    pub fn real_bond_return(&self) -> f64 {
        real_return(self.bond_return, self.inflation_rate)
    }

    pub(crate) fn blended(&self, stock_allocation: f64) -> f64 {
        stock_allocation * self.stock_return + (1.0 - stock_allocation) * self.bond_return
    }
}

fn real_return(nominal: f64, inflation: f64) -> f64 {
    (1.0 + nominal) / (1.0 + inflation) - 1.0
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ReturnSeries {
    entries: Vec<AnnualReturn>,
}

impl ReturnSeries {
    pub(crate) fn new(entries: Vec<AnnualReturn>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[AnnualReturn] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn first_year(&self) -> Option<i32> {
        self.entries.first().map(|e| e.year)
    }

    pub fn last_year(&self) -> Option<i32> {
        self.entries.last().map(|e| e.year)
    }
}

/// Inclusive range of years every simulated period must fall inside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudyWindow {
    pub start_year: i32,
    pub end_year: i32,
}

impl StudyWindow {
    /// The 1926-1995 span covered by the original Trinity study.
    pub const TRINITY: StudyWindow = StudyWindow {
        start_year: 1926,
        end_year: 1995,
    };
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulationParameters {
    pub stock_allocation: f64,
    pub period_length: u32,
    pub withdrawal_rate: f64,
    pub window: Option<StudyWindow>,
}

impl SimulationParameters {
    pub fn new(stock_allocation: f64, period_length: u32, withdrawal_rate: f64) -> Self {
        Self {
            stock_allocation,
            period_length,
            withdrawal_rate,
            window: None,
        }
    }

    pub fn with_window(mut self, window: StudyWindow) -> Self {
        self.window = Some(window);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodOutcome {
    pub start_year: i32,
    pub end_year: i32,
    pub survived: bool,
    pub failure_year: Option<i32>,
    pub ending_balance: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SuccessRate {
    pub successful_periods: usize,
    pub total_periods: usize,
    pub rate: f64,
}

pub const MAX_ROUNDING_DECIMALS: u32 = 15;

impl SuccessRate {
    /// `decimals` above `MAX_ROUNDING_DECIMALS` are clamped; the scale would
    /// overflow to infinity well before `u32::MAX`.
    pub fn rounded(&self, decimals: u32) -> f64 {
        let scale = 10f64.powi(decimals.min(MAX_ROUNDING_DECIMALS) as i32);
        (self.rate * scale).round() / scale
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationReport {
    pub success_rate: SuccessRate,
    pub periods: Vec<PeriodOutcome>,
}
