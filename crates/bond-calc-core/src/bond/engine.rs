//! Single pure entry point: normalize → schedule → IRR × 2 → metrics.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::metrics::{compute_metrics, IrrEstimate, MetricSet, MetricTerms};
use super::params::{normalize, BondInput, NormalizedBond};
use super::schedule::{generate_schedule, PaymentCalendar, PeriodRecord, ScheduleTerms};
use crate::error::{BondCalcError, FieldViolation};
use crate::time_value::{solve_irr_with_fallback, IrrFallback, FULL_IRR_SEED};
use crate::types::{with_metadata, CashFlowVector, ComputationOutput, Currency, Money, Rate};
use crate::BondCalcResult;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Time-zero amounts and the cost breakdown behind them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuanceSummary {
    pub issuance_price: Money,
    pub registry_fee: Money,
    pub placement_fee: Money,
    pub structuring_fee: Money,
    pub total_costs: Money,
    /// Price received net of costs
    pub issuer_initial_flow: Money,
    /// Price paid, negative
    pub investor_initial_flow: Money,
}

/// Full output of one engine run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BondCalculation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
    pub currency: Currency,
    pub face_value: Money,
    pub periods_per_year: u32,
    pub total_periods: u32,
    pub coupon_per_period: Money,
    pub issuance: IssuanceSummary,
    pub schedule: Vec<PeriodRecord>,
    pub issuer_flows: CashFlowVector,
    pub investor_flows: CashFlowVector,
    pub metrics: MetricSet,
}

/// Outcome of checking an input without running the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub violations: Vec<FieldViolation>,
    pub warnings: Vec<String>,
}

fn default_irr_guess() -> Rate {
    FULL_IRR_SEED
}

fn default_periods_per_year() -> u32 {
    1
}

/// A standalone IRR request over an arbitrary cash-flow vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IrrRequest {
    /// Index 0 is undiscounted
    pub cash_flows: Vec<Money>,
    #[serde(default = "default_irr_guess")]
    pub guess: Rate,
    /// Used only to annualize the periodic rate
    #[serde(default = "default_periods_per_year")]
    pub periods_per_year: u32,
    #[serde(default)]
    pub fallback: IrrFallback,
    /// Fail instead of reporting an unconverged rate
    #[serde(default)]
    pub strict: bool,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Validate `input` and run the engine. Nothing is cached between calls.
pub fn compute(input: &BondInput) -> BondCalcResult<BondCalculation> {
    let bond = normalize(input)?;
    compute_normalized(&bond)
}

/// Run the engine on already-validated parameters.
pub fn compute_normalized(bond: &NormalizedBond) -> BondCalcResult<BondCalculation> {
    let time_zero = bond.time_zero_flows();

    let mut terms = ScheduleTerms::new(
        bond.face_value,
        bond.periodic_rate,
        bond.total_periods,
        bond.grace,
    )
    .with_time_zero(time_zero);
    if let Some(issue_date) = bond.issue_date {
        terms = terms.with_calendar(PaymentCalendar {
            issue_date,
            days_per_period: bond.days_per_period,
        });
    }

    let schedule = generate_schedule(&terms)?;

    let seed = bond.capabilities.irr_seed;
    let issuer_irr =
        solve_irr_with_fallback(schedule.issuer_flows.as_slice(), seed, bond.irr_fallback);
    let investor_irr =
        solve_irr_with_fallback(schedule.investor_flows.as_slice(), seed, bond.irr_fallback);

    let metrics = compute_metrics(
        &schedule.periods,
        issuer_irr,
        investor_irr,
        &MetricTerms {
            periodic_rate: bond.periodic_rate,
            discount_rate: bond.discount_rate,
            periods_per_year: bond.periods_per_year,
            face_value: bond.face_value,
            coupon_per_period: bond.coupon_per_period,
        },
    )?;

    debug!(
        periods = schedule.periods.len(),
        price = %metrics.price,
        "bond schedule computed"
    );

    Ok(BondCalculation {
        issuer: bond.issuer.clone(),
        currency: bond.currency.clone(),
        face_value: bond.face_value,
        periods_per_year: bond.periods_per_year,
        total_periods: bond.total_periods,
        coupon_per_period: bond.coupon_per_period,
        issuance: IssuanceSummary {
            issuance_price: bond.issuance_price,
            registry_fee: bond.costs.registry_fee,
            placement_fee: bond.costs.placement_fee,
            structuring_fee: bond.costs.structuring_fee,
            total_costs: bond.costs.total(),
            issuer_initial_flow: time_zero.issuer,
            investor_initial_flow: time_zero.investor,
        },
        schedule: schedule.periods,
        issuer_flows: schedule.issuer_flows,
        investor_flows: schedule.investor_flows,
        metrics,
    })
}

/// [`compute`] wrapped in the standard output envelope, with warnings for
/// ignored inputs, degenerate schedules and unconverged IRRs.
pub fn calculate_bond(
    input: &BondInput,
) -> BondCalcResult<ComputationOutput<BondCalculation>> {
    let start = Instant::now();

    let bond = normalize(input)?;
    let mut warnings = bond.warnings.clone();
    let output = compute_normalized(&bond)?;

    if output.schedule.is_empty() {
        warnings.push("Zero coupon periods: schedule is empty and metrics are zeroed".into());
    }
    for (label, estimate) in [
        ("Issuer IRR (TCEA)", &output.metrics.issuer_irr),
        ("Investor IRR (TCREA)", &output.metrics.investor_irr),
    ] {
        if let Some(msg) = irr_warning(label, estimate) {
            warn!("{msg}");
            warnings.push(msg);
        }
    }

    let elapsed = start.elapsed().as_micros() as u64;
    let assumptions = serde_json::json!({
        "amortization": "bullet (American): interest each period, principal at maturity",
        "periodic_rate": "(1 + annual coupon rate)^(1/periods_per_year) - 1",
        "discount_rate": if bond.market_rate.is_some() { "market_rate" } else { "coupon rate" },
        "grace_kind": bond.grace.kind,
        "grace_periods": bond.grace.periods,
        "irr_seed": bond.capabilities.irr_seed.to_string(),
        "irr_fallback": bond.irr_fallback,
        "days_per_year": bond.days_per_year,
        "days_per_period": bond.days_per_period,
    });

    Ok(with_metadata(
        "Bullet Bond Schedule, Newton-Raphson IRR (TCEA/TCREA), Macaulay Duration & Convexity",
        &assumptions,
        warnings,
        elapsed,
        output,
    ))
}

/// Run the normalizer only. Constraint violations are reported in the
/// returned value; other failures (e.g. a rate that cannot be derived) are
/// still errors.
pub fn validate_bond(input: &BondInput) -> BondCalcResult<ValidationReport> {
    match normalize(input) {
        Ok(bond) => Ok(ValidationReport {
            valid: true,
            violations: Vec::new(),
            warnings: bond.warnings,
        }),
        Err(BondCalcError::Validation(errors)) => Ok(ValidationReport {
            valid: false,
            violations: errors.violations,
            warnings: Vec::new(),
        }),
        Err(e) => Err(e),
    }
}

/// Solve the periodic IRR of `request.cash_flows` and annualize it.
pub fn calculate_irr(request: &IrrRequest) -> BondCalcResult<ComputationOutput<IrrEstimate>> {
    let start = Instant::now();

    if request.periods_per_year == 0 {
        return Err(BondCalcError::InvalidInput {
            field: "periods_per_year".into(),
            reason: "Periods per year must be > 0".into(),
        });
    }

    if request.strict && request.cash_flows.len() < 2 {
        return Err(BondCalcError::InvalidInput {
            field: "cash_flows".into(),
            reason: "At least two cash flows are required".into(),
        });
    }

    let outcome = solve_irr_with_fallback(&request.cash_flows, request.guess, request.fallback);
    if request.strict {
        outcome.clone().into_result()?;
    }
    let estimate = IrrEstimate::from_outcome(outcome, request.periods_per_year);

    let mut warnings = Vec::new();
    if let Some(msg) = irr_warning("IRR", &estimate) {
        warn!("{msg}");
        warnings.push(msg);
    }

    let elapsed = start.elapsed().as_micros() as u64;
    let assumptions = serde_json::json!({
        "guess": request.guess.to_string(),
        "periods_per_year": request.periods_per_year,
        "fallback": request.fallback,
        "tolerance": "|npv| < 1e-6, at most 100 Newton iterations",
    });

    Ok(with_metadata(
        "Newton-Raphson IRR with optional bisection fallback",
        &assumptions,
        warnings,
        elapsed,
        estimate,
    ))
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

fn irr_warning(label: &str, estimate: &IrrEstimate) -> Option<String> {
    if estimate.converged {
        return None;
    }
    let failure = estimate.failure.as_ref()?;
    let annual = estimate
        .annual_rate
        .map(|r| r.round_dp(6).to_string())
        .unwrap_or_else(|| "n/a".into());
    Some(format!(
        "{label} did not converge ({}) after {} iterations; reported rate {} is approximate (annual {annual})",
        failure.reason,
        failure.iterations,
        estimate.periodic_rate.round_dp(10)
    ))
}
