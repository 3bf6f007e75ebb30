use axum::{
    Router,
    extract::{Json, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use clap::{Args, Parser, Subcommand, error::ErrorKind};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

use crate::core::{
    AnnualReturn, EngineError, MAX_ROUNDING_DECIMALS, PeriodOutcome, ReturnSeries,
    SimulationParameters, SimulationReport, StudyWindow, derive_returns, run_simulation,
};
use crate::data::load_shiller_csv;

pub const INVALID_INPUT_EXIT_CODE: i32 = 1;

const DEFAULT_STOCK_ALLOCATION: f64 = 0.5;
const DEFAULT_YEARS: u32 = 30;
const DEFAULT_WITHDRAWAL_RATE: f64 = 0.04;

#[derive(Parser, Debug)]
#[command(
    name = "trinity",
    about = "Historical success rate of a fixed retirement withdrawal (Trinity study)"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the fraction of historical periods the portfolio survived.
    Rate(RateArgs),
    /// Serve the calculator as a JSON HTTP API.
    Serve(ServeArgs),
}

#[derive(Args, Debug, Clone, PartialEq)]
pub struct ParameterArgs {
    #[arg(
        short = 's',
        long,
        help = "Fraction of the portfolio invested in equities, e.g. 0.75"
    )]
    pub stock_allocation: f64,
    #[arg(short = 'y', long, help = "Length of the retirement period in years")]
    pub years: u32,
    #[arg(
        short = 'w',
        long,
        help = "Withdrawal rate as a fraction of the initial portfolio, e.g. 0.04"
    )]
    pub withdrawal_rate: f64,
    #[arg(long, help = "First year a simulated period may start in")]
    pub start_year: Option<i32>,
    #[arg(long, help = "Last year a simulated period may end in")]
    pub end_year: Option<i32>,
}

#[derive(Args, Debug, Clone)]
pub struct RateArgs {
    #[arg(long, help = "Shiller annual data CSV (YEAR, P, D, R, RLONG, CPI)")]
    pub data: PathBuf,
    #[command(flatten)]
    pub parameters: ParameterArgs,
    #[arg(
        long,
        default_value_t = 2,
        value_parser = clap::value_parser!(u32).range(0..=i64::from(MAX_ROUNDING_DECIMALS)),
        help = "Decimal places of the printed rate"
    )]
    pub decimals: u32,
    #[arg(long, help = "Print the full per-period report as JSON")]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    #[arg(long, help = "Shiller annual data CSV (YEAR, P, D, R, RLONG, CPI)")]
    pub data: PathBuf,
    #[arg(long, default_value_t = 8080)]
    pub port: u16,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SuccessRatePayload {
    stock_allocation: Option<f64>,
    years: Option<u32>,
    withdrawal_rate: Option<f64>,
    start_year: Option<i32>,
    end_year: Option<i32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SuccessRateResponse {
    stock_allocation: f64,
    years: u32,
    withdrawal_rate: f64,
    window: Option<StudyWindow>,
    success_rate: f64,
    successful_periods: usize,
    total_periods: usize,
    periods: Vec<PeriodOutcome>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReturnRow {
    year: i32,
    stock_return: f64,
    bond_return: f64,
    inflation_rate: f64,
    real_stock_return: f64,
    real_bond_return: f64,
}

impl From<&AnnualReturn> for ReturnRow {
    fn from(value: &AnnualReturn) -> Self {
        Self {
            year: value.year,
            stock_return: value.stock_return,
            bond_return: value.bond_return,
            inflation_rate: value.inflation_rate,
            real_stock_return: value.real_stock_return(),
            real_bond_return: value.real_bond_return(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug)]
struct AppState {
    series: ReturnSeries,
}

/// Help and version output are not failures; every other parse error is
/// invalid input.
pub fn is_informational(err: &clap::Error) -> bool {
    matches!(err.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion)
}

pub fn build_parameters(args: &ParameterArgs) -> Result<SimulationParameters, String> {
    if !(0.0..=1.0).contains(&args.stock_allocation) {
        return Err("--stock-allocation must be between 0 and 1".to_string());
    }

    if args.years == 0 {
        return Err("--years must be > 0".to_string());
    }

    if !args.withdrawal_rate.is_finite() || args.withdrawal_rate < 0.0 {
        return Err("--withdrawal-rate must be >= 0".to_string());
    }

    let mut parameters =
        SimulationParameters::new(args.stock_allocation, args.years, args.withdrawal_rate);

    if args.start_year.is_some() || args.end_year.is_some() {
        let window = StudyWindow {
            start_year: args.start_year.unwrap_or(i32::MIN),
            end_year: args.end_year.unwrap_or(i32::MAX),
        };
        if window.start_year > window.end_year {
            return Err("--end-year must be >= --start-year".to_string());
        }
        parameters = parameters.with_window(window);
    }

    Ok(parameters)
}

fn load_series(path: &Path) -> Result<ReturnSeries, String> {
    let records = load_shiller_csv(path).map_err(|e| format!("{}: {e}", path.display()))?;
    derive_returns(&records).map_err(|e| format!("{}: {e}", path.display()))
}

pub fn rate_command(args: &RateArgs) -> Result<String, String> {
    let parameters = build_parameters(&args.parameters)?;
    let series = load_series(&args.data)?;
    let report = run_simulation(&series, &parameters).map_err(|e| e.to_string())?;

    if args.json {
        let response = build_success_rate_response(&parameters, report);
        return serde_json::to_string_pretty(&response)
            .map_err(|e| format!("failed to encode report: {e}"));
    }

    let decimals = args.decimals.min(MAX_ROUNDING_DECIMALS) as usize;
    Ok(format!(
        "{:.decimals$}",
        report.success_rate.rounded(args.decimals)
    ))
}

pub async fn serve_command(args: ServeArgs) -> Result<(), String> {
    let series = load_series(&args.data)?;
    info!(
        returns = series.len(),
        first_year = ?series.first_year(),
        last_year = ?series.last_year(),
        "loaded return history"
    );
    run_http_server(args.port, series)
        .await
        .map_err(|e| format!("Server error: {e}"))
}

pub async fn run_http_server(port: u16, series: ReturnSeries) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let app = router(series);

    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "trinity HTTP API listening");

    axum::serve(listener, app).await
}

fn router(series: ReturnSeries) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/returns", get(returns_handler))
        .route(
            "/api/success-rate",
            get(success_rate_get_handler).post(success_rate_post_handler),
        )
        .fallback(not_found_handler)
        .with_state(Arc::new(AppState { series }))
}

async fn health_handler() -> Response {
    json_response(StatusCode::OK, HealthResponse { status: "ok" })
}

async fn returns_handler(State(state): State<Arc<AppState>>) -> Response {
    let rows = state
        .series
        .entries()
        .iter()
        .map(ReturnRow::from)
        .collect::<Vec<_>>();
    json_response(StatusCode::OK, rows)
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn success_rate_get_handler(
    State(state): State<Arc<AppState>>,
    Query(payload): Query<SuccessRatePayload>,
) -> Response {
    success_rate_handler_impl(&state, payload)
}

async fn success_rate_post_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SuccessRatePayload>,
) -> Response {
    success_rate_handler_impl(&state, payload)
}

fn success_rate_handler_impl(state: &AppState, payload: SuccessRatePayload) -> Response {
    let parameters = match parameters_from_payload(payload) {
        Ok(parameters) => parameters,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, &msg),
    };

    match run_simulation(&state.series, &parameters) {
        Ok(report) => json_response(
            StatusCode::OK,
            build_success_rate_response(&parameters, report),
        ),
        Err(err) => error_response(engine_error_status(&err), &err.to_string()),
    }
}

fn engine_error_status(err: &EngineError) -> StatusCode {
    match err {
        EngineError::InvalidParameter(_) | EngineError::NoPeriods => StatusCode::BAD_REQUEST,
        EngineError::InsufficientData { .. } | EngineError::InvalidRecord { .. } => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("no-store"),
    );
    response
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
        },
    )
}

fn default_parameters_for_api() -> ParameterArgs {
    ParameterArgs {
        stock_allocation: DEFAULT_STOCK_ALLOCATION,
        years: DEFAULT_YEARS,
        withdrawal_rate: DEFAULT_WITHDRAWAL_RATE,
        start_year: None,
        end_year: None,
    }
}

fn parameters_from_payload(payload: SuccessRatePayload) -> Result<SimulationParameters, String> {
    let mut args = default_parameters_for_api();

    if let Some(v) = payload.stock_allocation {
        args.stock_allocation = v;
    }
    if let Some(v) = payload.years {
        args.years = v;
    }
    if let Some(v) = payload.withdrawal_rate {
        args.withdrawal_rate = v;
    }
    if payload.start_year.is_some() {
        args.start_year = payload.start_year;
    }
    if payload.end_year.is_some() {
        args.end_year = payload.end_year;
    }

    build_parameters(&args)
}

#[cfg(test)]
fn parameters_from_json(json: &str) -> Result<SimulationParameters, String> {
    let payload = serde_json::from_str::<SuccessRatePayload>(json)
        .map_err(|e| format!("Invalid API JSON payload: {e}"))?;
    parameters_from_payload(payload)
}

fn build_success_rate_response(
    parameters: &SimulationParameters,
    report: SimulationReport,
) -> SuccessRateResponse {
    SuccessRateResponse {
        stock_allocation: parameters.stock_allocation,
        years: parameters.period_length,
        withdrawal_rate: parameters.withdrawal_rate,
        window: parameters.window,
        success_rate: report.success_rate.rate,
        successful_periods: report.success_rate.successful_periods,
        total_periods: report.success_rate.total_periods,
        periods: report.periods,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::YearlyRecord;
    use std::io::Write;

    const EPS: f64 = 1e-9;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    fn sample_args() -> ParameterArgs {
        ParameterArgs {
            stock_allocation: 0.75,
            years: 30,
            withdrawal_rate: 0.04,
            start_year: None,
            end_year: None,
        }
    }

    fn growing_records(first_year: i32, count: i32) -> Vec<YearlyRecord> {
        (0..count)
            .map(|i| YearlyRecord {
                year: first_year + i,
                stock_price: 100.0 * 1.06f64.powi(i),
                stock_dividend: 4.0,
                short_rate: 0.03,
                long_rate: 0.05,
                cpi: 50.0 * 1.02f64.powi(i),
            })
            .collect()
    }

    fn sample_state() -> AppState {
        AppState {
            series: derive_returns(&growing_records(1920, 81)).expect("valid records"),
        }
    }

    fn write_csv(records: &[YearlyRecord]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "YEAR,P,D,R,RLONG,CPI").expect("write header");
        for r in records {
            writeln!(
                file,
                "{},{},{},{},{},{}",
                r.year,
                r.stock_price,
                r.stock_dividend,
                r.short_rate * 100.0,
                r.long_rate * 100.0,
                r.cpi
            )
            .expect("write row");
        }
        file
    }

    #[test]
    fn build_parameters_accepts_valid_args() {
        let parameters = build_parameters(&sample_args()).expect("valid args");
        assert_approx(parameters.stock_allocation, 0.75);
        assert_eq!(parameters.period_length, 30);
        assert_approx(parameters.withdrawal_rate, 0.04);
        assert_eq!(parameters.window, None);
    }

    #[test]
    fn build_parameters_rejects_allocation_outside_unit_range() {
        let mut args = sample_args();
        args.stock_allocation = 1.5;
        let err = build_parameters(&args).expect_err("must reject allocation");
        assert!(err.contains("--stock-allocation"));
    }

    #[test]
    fn build_parameters_rejects_zero_years() {
        let mut args = sample_args();
        args.years = 0;
        let err = build_parameters(&args).expect_err("must reject zero years");
        assert!(err.contains("--years"));
    }

    #[test]
    fn build_parameters_rejects_negative_withdrawal() {
        let mut args = sample_args();
        args.withdrawal_rate = -0.01;
        let err = build_parameters(&args).expect_err("must reject negative withdrawal");
        assert!(err.contains("--withdrawal-rate"));
    }

    #[test]
    fn build_parameters_opens_missing_window_bound() {
        let mut args = sample_args();
        args.start_year = Some(1926);
        let parameters = build_parameters(&args).expect("valid args");
        assert_eq!(
            parameters.window,
            Some(StudyWindow {
                start_year: 1926,
                end_year: i32::MAX,
            })
        );
    }

    #[test]
    fn build_parameters_rejects_inverted_window() {
        let mut args = sample_args();
        args.start_year = Some(1995);
        args.end_year = Some(1926);
        let err = build_parameters(&args).expect_err("must reject inverted window");
        assert!(err.contains("--end-year"));
    }

    #[test]
    fn cli_parses_short_flags() {
        let cli = Cli::try_parse_from([
            "trinity", "rate", "--data", "shiller.csv", "-s", "0.75", "-y", "20", "-w", "0.04",
            "--start-year", "1926", "--end-year", "1995",
        ])
        .expect("valid command line");
        let Command::Rate(args) = cli.command else {
            panic!("expected rate command");
        };
        assert_eq!(args.data, PathBuf::from("shiller.csv"));
        assert_eq!(args.decimals, 2);
        assert!(!args.json);
        assert_eq!(
            args.parameters,
            ParameterArgs {
                stock_allocation: 0.75,
                years: 20,
                withdrawal_rate: 0.04,
                start_year: Some(1926),
                end_year: Some(1995),
            }
        );
    }

    #[test]
    fn cli_requires_withdrawal_rate() {
        let err = Cli::try_parse_from(["trinity", "rate", "--data", "x.csv", "-s", "0.5", "-y", "30"])
            .expect_err("withdrawal rate is required");
        assert!(err.to_string().contains("--withdrawal-rate"));
    }

    #[test]
    fn cli_serve_defaults_port() {
        let cli = Cli::try_parse_from(["trinity", "serve", "--data", "x.csv"]).expect("valid");
        let Command::Serve(args) = cli.command else {
            panic!("expected serve command");
        };
        assert_eq!(args.port, 8080);
    }

    #[test]
    fn cli_malformed_values_are_invalid_input() {
        for argv in [
            ["trinity", "rate", "--data", "x.csv", "-s", "abc", "-y", "30", "-w", "0.04"],
            ["trinity", "rate", "--data", "x.csv", "-s", "0.5", "-y", "-3", "-w", "0.04"],
        ] {
            let err = Cli::try_parse_from(argv).expect_err("malformed value");
            assert!(!is_informational(&err), "{argv:?}");
        }
    }

    #[test]
    fn cli_help_is_informational() {
        let err = Cli::try_parse_from(["trinity", "rate", "--help"]).expect_err("help exits");
        assert!(is_informational(&err));
    }

    #[test]
    fn cli_rejects_decimals_above_limit() {
        let base = ["trinity", "rate", "--data", "x.csv", "-s", "0.5", "-y", "30", "-w", "0.04"];
        let err = Cli::try_parse_from(base.iter().copied().chain(["--decimals", "16"]))
            .expect_err("16 decimals is out of range");
        assert!(!is_informational(&err));
        let cli = Cli::try_parse_from(base.iter().copied().chain(["--decimals", "15"]))
            .expect("15 decimals is allowed");
        let Command::Rate(args) = cli.command else {
            panic!("expected rate command");
        };
        assert_eq!(args.decimals, MAX_ROUNDING_DECIMALS);
    }

    #[test]
    fn parameters_from_json_parses_web_keys() {
        let json = r#"{
          "stockAllocation": 0.6,
          "years": 25,
          "withdrawalRate": 0.05,
          "startYear": 1926,
          "endYear": 1995
        }"#;
        let parameters = parameters_from_json(json).expect("json should parse");
        assert_approx(parameters.stock_allocation, 0.6);
        assert_eq!(parameters.period_length, 25);
        assert_approx(parameters.withdrawal_rate, 0.05);
        assert_eq!(parameters.window, Some(StudyWindow::TRINITY));
    }

    #[test]
    fn parameters_from_json_falls_back_to_defaults() {
        let parameters = parameters_from_json("{}").expect("empty payload is valid");
        assert_approx(parameters.stock_allocation, DEFAULT_STOCK_ALLOCATION);
        assert_eq!(parameters.period_length, DEFAULT_YEARS);
        assert_approx(parameters.withdrawal_rate, DEFAULT_WITHDRAWAL_RATE);
    }

    #[test]
    fn parameters_from_json_rejects_bad_types() {
        let err = parameters_from_json(r#"{"years": "thirty"}"#).expect_err("must reject");
        assert!(err.contains("Invalid API JSON payload"));
    }

    #[test]
    fn success_rate_handler_returns_ok_for_valid_payload() {
        let state = sample_state();
        let payload = SuccessRatePayload {
            stock_allocation: Some(0.75),
            years: Some(30),
            withdrawal_rate: Some(0.04),
            ..SuccessRatePayload::default()
        };
        let response = success_rate_handler_impl(&state, payload);
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CACHE_CONTROL).map(|v| v.as_bytes()),
            Some(&b"no-store"[..])
        );
    }

    #[test]
    fn success_rate_handler_rejects_invalid_payload() {
        let state = sample_state();
        let payload = SuccessRatePayload {
            stock_allocation: Some(2.0),
            ..SuccessRatePayload::default()
        };
        let response = success_rate_handler_impl(&state, payload);
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn success_rate_handler_reports_no_periods_as_bad_request() {
        let state = sample_state();
        let payload = SuccessRatePayload {
            years: Some(200),
            ..SuccessRatePayload::default()
        };
        let response = success_rate_handler_impl(&state, payload);
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn success_rate_response_serialization_contains_expected_fields() {
        let state = sample_state();
        let parameters = build_parameters(&sample_args()).expect("valid args");
        let report = run_simulation(&state.series, &parameters).expect("valid simulation");
        let response = build_success_rate_response(&parameters, report);
        let value = serde_json::to_value(&response).expect("serializable");

        for key in [
            "stockAllocation",
            "years",
            "withdrawalRate",
            "window",
            "successRate",
            "successfulPeriods",
            "totalPeriods",
            "periods",
        ] {
            assert!(value.get(key).is_some(), "missing key {key}");
        }
        assert_eq!(value["totalPeriods"], 51);
        assert_eq!(value["successRate"], 1.0);
        assert_eq!(value["periods"][0]["startYear"], 1920);
        assert!(value["periods"][0].get("failureYear").is_some());
    }

    #[test]
    fn return_rows_include_real_returns() {
        let state = sample_state();
        let row = ReturnRow::from(&state.series.entries()[0]);
        assert_eq!(row.year, 1920);
        assert_approx(
            row.real_stock_return,
            (1.0 + row.stock_return) / (1.0 + row.inflation_rate) - 1.0,
        );
    }

    #[test]
    fn engine_errors_map_to_statuses() {
        assert_eq!(
            engine_error_status(&EngineError::NoPeriods),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            engine_error_status(&EngineError::InsufficientData { records: 1 }),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn rate_command_prints_rounded_rate() {
        let file = write_csv(&growing_records(1920, 81));
        let args = RateArgs {
            data: file.path().to_path_buf(),
            parameters: ParameterArgs {
                stock_allocation: 0.75,
                years: 20,
                withdrawal_rate: 0.04,
                start_year: Some(1926),
                end_year: Some(1995),
            },
            decimals: 2,
            json: false,
        };
        assert_eq!(rate_command(&args).expect("valid run"), "1.00");
    }

    #[test]
    fn rate_command_clamps_huge_decimals() {
        let file = write_csv(&growing_records(1920, 81));
        let args = RateArgs {
            data: file.path().to_path_buf(),
            parameters: sample_args(),
            decimals: 400,
            json: false,
        };
        assert_eq!(rate_command(&args).expect("valid run"), "1.000000000000000");
    }

    #[test]
    fn rate_command_json_reports_periods() {
        let file = write_csv(&growing_records(1920, 81));
        let args = RateArgs {
            data: file.path().to_path_buf(),
            parameters: sample_args(),
            decimals: 2,
            json: true,
        };
        let output = rate_command(&args).expect("valid run");
        let value: serde_json::Value = serde_json::from_str(&output).expect("valid json");
        assert_eq!(value["totalPeriods"], 51);
    }

    #[test]
    fn rate_command_reports_missing_file() {
        let dir = tempfile::tempdir().expect("temp dir");
        let args = RateArgs {
            data: dir.path().join("missing.csv"),
            parameters: sample_args(),
            decimals: 2,
            json: false,
        };
        let err = rate_command(&args).expect_err("missing file");
        assert!(err.contains("missing.csv"));
    }
}
