//! Discounting, rate conversion and internal-rate-of-return solving.
//!
//! The IRR solver is a plain Newton-Raphson iteration from a fixed seed. It
//! never bounds or brackets the rate on its own; when it cannot reach
//! `|npv| < 1e-6` it reports [`NonConvergence`] carrying the best rate it got
//! to. An opt-in bisection fallback is available through
//! [`solve_irr_with_fallback`].

use std::fmt;

use rust_decimal::Decimal;
use rust_decimal::MathematicalOps;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::error::BondCalcError;
use crate::types::{Money, Rate};
use crate::BondCalcResult;

const CONVERGENCE_THRESHOLD: Decimal = dec!(0.000001);
const MAX_IRR_ITERATIONS: u32 = 100;
const MAX_BISECTION_ITERATIONS: u32 = 200;
const BISECTION_MIN_WIDTH: Decimal = dec!(0.000000000001);

/// Newton seed for instruments carrying issuance costs or grace periods.
pub const FULL_IRR_SEED: Rate = dec!(0.10);
/// Newton seed for plain bullet instruments.
pub const COMPACT_IRR_SEED: Rate = dec!(0.09);

/// Candidate bracket points for the bisection fallback, ascending.
const BISECTION_GRID: [Decimal; 10] = [
    dec!(-0.5),
    dec!(-0.25),
    dec!(-0.1),
    dec!(-0.01),
    dec!(0),
    dec!(0.05),
    dec!(0.1),
    dec!(0.25),
    dec!(0.5),
    dec!(1.0),
];

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Why a solver stopped without reaching the convergence threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// `|dNPV/dr|` fell below the tolerance; a Newton step would blow up.
    FlatDerivative,
    /// The iteration budget ran out.
    IterationCap,
    /// `1 + rate` reached zero or below; discounting is undefined there.
    RateOutOfDomain,
    /// Discount factors left the range representable by `Decimal`.
    NumericOverflow,
    /// Fewer than two flows, or every flow is zero.
    DegenerateFlows,
    /// No sign change in NPV across the bisection grid.
    NoBracket,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::FlatDerivative => "flat derivative",
            StopReason::IterationCap => "iteration cap",
            StopReason::RateOutOfDomain => "rate out of domain",
            StopReason::NumericOverflow => "numeric overflow",
            StopReason::DegenerateFlows => "degenerate cash flows",
            StopReason::NoBracket => "no bracketing interval",
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An IRR search that stopped short. `best_rate` is the last iterate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("IRR did not converge ({reason}) after {iterations} iterations; best rate {best_rate}")]
pub struct NonConvergence {
    pub best_rate: Rate,
    pub iterations: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_npv: Option<Money>,
    pub reason: StopReason,
}

/// Policy applied when Newton-Raphson does not converge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IrrFallback {
    /// Report the unconverged Newton iterate as-is.
    #[default]
    None,
    /// Retry with bisection over a fixed rate grid.
    Bisection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IrrMethod {
    NewtonRaphson,
    Bisection,
}

/// A periodic IRR together with how (and whether) it was reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IrrOutcome {
    pub rate: Rate,
    pub converged: bool,
    pub method: IrrMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<NonConvergence>,
}

impl IrrOutcome {
    /// The rate if it converged, otherwise the stored failure.
    pub fn into_result(self) -> Result<Rate, NonConvergence> {
        match self.failure {
            Some(failure) if !self.converged => Err(failure),
            _ => Ok(self.rate),
        }
    }
}

// ---------------------------------------------------------------------------
// Rate conversion
// ---------------------------------------------------------------------------

/// Effective periodic rate equivalent to an effective annual rate:
/// `(1 + annual)^(1/periods_per_year) - 1`.
pub fn periodic_rate(annual_rate: Rate, periods_per_year: u32) -> BondCalcResult<Rate> {
    if periods_per_year == 0 {
        return Err(BondCalcError::InvalidInput {
            field: "periods_per_year".into(),
            reason: "Periods per year must be > 0".into(),
        });
    }
    if annual_rate <= dec!(-1) {
        return Err(BondCalcError::InvalidInput {
            field: "annual_rate".into(),
            reason: "Annual rate must be greater than -100%".into(),
        });
    }
    if periods_per_year == 1 || annual_rate.is_zero() {
        return Ok(annual_rate);
    }

    let exponent = Decimal::ONE / Decimal::from(periods_per_year);
    Decimal::ONE
        .checked_add(annual_rate)
        .and_then(|base| base.checked_powd(exponent))
        .map(|factor| factor - Decimal::ONE)
        .ok_or_else(|| {
            BondCalcError::FinancialImpossibility(format!(
                "(1 + {annual_rate})^(1/{periods_per_year}) is not representable"
            ))
        })
}

/// Effective annual rate compounded from a periodic rate:
/// `(1 + periodic)^periods_per_year - 1`. `None` when not representable.
pub fn annualize(periodic_rate: Rate, periods_per_year: u32) -> Option<Rate> {
    Decimal::ONE
        .checked_add(periodic_rate)?
        .checked_powi(i64::from(periods_per_year))
        .map(|factor| factor - Decimal::ONE)
}

// ---------------------------------------------------------------------------
// Discounting
// ---------------------------------------------------------------------------

/// Net Present Value of a series of cash flows, index 0 undiscounted.
pub fn npv(rate: Rate, cash_flows: &[Money]) -> BondCalcResult<Money> {
    if rate <= dec!(-1) {
        return Err(BondCalcError::InvalidInput {
            field: "rate".into(),
            reason: "Discount rate must be greater than -100%".into(),
        });
    }

    npv_and_derivative(rate, cash_flows)
        .map(|(value, _)| value)
        .ok_or_else(|| {
            BondCalcError::FinancialImpossibility(format!(
                "NPV at rate {rate} overflows decimal range"
            ))
        })
}

/// NPV and dNPV/dr with checked arithmetic. Discount factors are built by
/// iterative multiplication.
fn npv_and_derivative(rate: Rate, cash_flows: &[Money]) -> Option<(Money, Decimal)> {
    let one_plus_r = Decimal::ONE.checked_add(rate)?;
    let mut npv_val = Decimal::ZERO;
    let mut dnpv = Decimal::ZERO;
    let mut discount = Decimal::ONE;

    for (t, cf) in cash_flows.iter().enumerate() {
        if t > 0 {
            discount = discount.checked_mul(one_plus_r)?;
        }
        npv_val = npv_val.checked_add(cf.checked_div(discount)?)?;
        if t > 0 {
            let next_discount = discount.checked_mul(one_plus_r)?;
            let weighted = Decimal::from(t as u64).checked_mul(*cf)?;
            dnpv = dnpv.checked_sub(weighted.checked_div(next_discount)?)?;
        }
    }

    Some((npv_val, dnpv))
}

fn is_degenerate(cash_flows: &[Money]) -> bool {
    cash_flows.len() < 2 || cash_flows.iter().all(|cf| cf.is_zero())
}

// ---------------------------------------------------------------------------
// Solvers
// ---------------------------------------------------------------------------

/// Periodic internal rate of return using Newton-Raphson from `guess`.
///
/// Stops after 100 iterations, when `|npv| < 1e-6` (converged) or when
/// `|dnpv| < 1e-6` (flat derivative). Iterates are not bounded; if
/// `1 + rate` reaches zero the search stops with
/// [`StopReason::RateOutOfDomain`].
pub fn solve_irr(cash_flows: &[Money], guess: Rate) -> Result<Rate, NonConvergence> {
    if is_degenerate(cash_flows) {
        return Err(NonConvergence {
            best_rate: guess,
            iterations: 0,
            last_npv: None,
            reason: StopReason::DegenerateFlows,
        });
    }

    let stop = |rate: Rate, iterations: u32, last_npv: Option<Money>, reason: StopReason| {
        debug!(%rate, iterations, %reason, "Newton-Raphson IRR stopped");
        NonConvergence {
            best_rate: rate,
            iterations,
            last_npv,
            reason,
        }
    };

    let mut rate = guess;
    let mut last_npv = None;

    for i in 0..MAX_IRR_ITERATIONS {
        if rate <= dec!(-1) {
            return Err(stop(rate, i, last_npv, StopReason::RateOutOfDomain));
        }

        let Some((npv_val, dnpv)) = npv_and_derivative(rate, cash_flows) else {
            return Err(stop(rate, i, last_npv, StopReason::NumericOverflow));
        };
        last_npv = Some(npv_val);

        if npv_val.abs() < CONVERGENCE_THRESHOLD {
            debug!(%rate, iterations = i, "Newton-Raphson IRR converged");
            return Ok(rate);
        }

        if dnpv.abs() < CONVERGENCE_THRESHOLD {
            return Err(stop(rate, i, last_npv, StopReason::FlatDerivative));
        }

        let Some(next) = npv_val
            .checked_div(dnpv)
            .and_then(|step| rate.checked_sub(step))
        else {
            return Err(stop(rate, i, last_npv, StopReason::NumericOverflow));
        };
        rate = next;
    }

    let final_npv = npv_and_derivative(rate, cash_flows)
        .map(|(value, _)| value)
        .or(last_npv);
    Err(stop(
        rate,
        MAX_IRR_ITERATIONS,
        final_npv,
        StopReason::IterationCap,
    ))
}

/// Periodic IRR by bisection. The bracket is the first adjacent pair of
/// grid rates (from -50% to +100% per period) whose NPVs differ in sign.
pub fn bisect_irr(cash_flows: &[Money]) -> Result<Rate, NonConvergence> {
    if is_degenerate(cash_flows) {
        return Err(NonConvergence {
            best_rate: Decimal::ZERO,
            iterations: 0,
            last_npv: None,
            reason: StopReason::DegenerateFlows,
        });
    }

    let evaluated: Vec<(Rate, Money)> = BISECTION_GRID
        .iter()
        .filter_map(|&r| npv(r, cash_flows).ok().map(|value| (r, value)))
        .collect();

    if let Some(&(r, _)) = evaluated
        .iter()
        .find(|(_, value)| value.abs() < CONVERGENCE_THRESHOLD)
    {
        return Ok(r);
    }

    let bracket = evaluated
        .windows(2)
        .find(|w| w[0].1.is_sign_negative() != w[1].1.is_sign_negative());

    let Some(window) = bracket else {
        let closest = evaluated.iter().min_by_key(|(_, value)| value.abs());
        return Err(NonConvergence {
            best_rate: closest.map(|(r, _)| *r).unwrap_or(Decimal::ZERO),
            iterations: 0,
            last_npv: closest.map(|(_, value)| *value),
            reason: StopReason::NoBracket,
        });
    };

    let (mut lo, mut npv_lo) = window[0];
    let (mut hi, _) = window[1];
    let mut mid = (lo + hi) / dec!(2);
    let mut npv_mid = npv_lo;

    for i in 0..MAX_BISECTION_ITERATIONS {
        mid = (lo + hi) / dec!(2);
        npv_mid = match npv(mid, cash_flows) {
            Ok(value) => value,
            Err(_) => {
                return Err(NonConvergence {
                    best_rate: mid,
                    iterations: i,
                    last_npv: Some(npv_mid),
                    reason: StopReason::NumericOverflow,
                })
            }
        };

        if npv_mid.abs() < CONVERGENCE_THRESHOLD || hi - lo < BISECTION_MIN_WIDTH {
            debug!(rate = %mid, iterations = i, "bisection IRR converged");
            return Ok(mid);
        }

        if npv_mid.is_sign_negative() == npv_lo.is_sign_negative() {
            lo = mid;
            npv_lo = npv_mid;
        } else {
            hi = mid;
        }
    }

    Err(NonConvergence {
        best_rate: mid,
        iterations: MAX_BISECTION_ITERATIONS,
        last_npv: Some(npv_mid),
        reason: StopReason::IterationCap,
    })
}

/// Newton-Raphson, then the configured fallback if Newton stops short.
/// When every attempt fails the Newton iterate is reported, tagged as
/// unconverged.
pub fn solve_irr_with_fallback(
    cash_flows: &[Money],
    guess: Rate,
    fallback: IrrFallback,
) -> IrrOutcome {
    let newton_failure = match solve_irr(cash_flows, guess) {
        Ok(rate) => {
            return IrrOutcome {
                rate,
                converged: true,
                method: IrrMethod::NewtonRaphson,
                failure: None,
            }
        }
        Err(failure) => failure,
    };

    if fallback == IrrFallback::Bisection && newton_failure.reason != StopReason::DegenerateFlows
    {
        if let Ok(rate) = bisect_irr(cash_flows) {
            return IrrOutcome {
                rate,
                converged: true,
                method: IrrMethod::Bisection,
                failure: None,
            };
        }
    }

    IrrOutcome {
        rate: newton_failure.best_rate,
        converged: false,
        method: IrrMethod::NewtonRaphson,
        failure: Some(newton_failure),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn flat_coupon_flows(coupon: Decimal, periods: usize) -> Vec<Decimal> {
        let mut cfs = vec![dec!(-1000)];
        for t in 1..=periods {
            if t == periods {
                cfs.push(dec!(1000) + coupon);
            } else {
                cfs.push(coupon);
            }
        }
        cfs
    }

    #[test]
    fn test_npv_basic() {
        let cfs = vec![dec!(-1000), dec!(300), dec!(400), dec!(500)];
        let result = npv(dec!(0.10), &cfs).unwrap();
        // NPV at 10%: -1000 + 300/1.1 + 400/1.21 + 500/1.331 ≈ -21.04
        assert!((result - dec!(-21.04)).abs() < dec!(0.01));
    }

    #[test]
    fn test_npv_rejects_rate_below_minus_one() {
        let cfs = vec![dec!(-100), dec!(110)];
        assert!(npv(dec!(-1), &cfs).is_err());
    }

    #[test]
    fn test_irr_recovers_flat_coupon_rate() {
        let cfs = flat_coupon_flows(dec!(110), 10);
        let rate = solve_irr(&cfs, FULL_IRR_SEED).unwrap();
        assert!((rate - dec!(0.11)).abs() < dec!(0.000001), "got {rate}");
    }

    #[test]
    fn test_irr_compact_seed_recovers_same_rate() {
        let cfs = flat_coupon_flows(dec!(110), 10);
        let rate = solve_irr(&cfs, COMPACT_IRR_SEED).unwrap();
        assert!((rate - dec!(0.11)).abs() < dec!(0.000001), "got {rate}");
    }

    #[test]
    fn test_irr_at_seed_converges_immediately() {
        // 10% coupon priced at par: NPV at the 10% seed is exactly zero
        let cfs = flat_coupon_flows(dec!(100), 5);
        assert_eq!(solve_irr(&cfs, dec!(0.10)).unwrap(), dec!(0.10));
    }

    #[test]
    fn test_irr_positive_only_flows_report_flat_derivative() {
        let cfs = vec![dec!(1000), dec!(0), dec!(0)];
        let err = solve_irr(&cfs, FULL_IRR_SEED).unwrap_err();
        assert_eq!(err.reason, StopReason::FlatDerivative);
        assert_eq!(err.best_rate, FULL_IRR_SEED);
        assert_eq!(err.iterations, 0);
        assert_eq!(err.last_npv, Some(dec!(1000)));
    }

    #[test]
    fn test_irr_all_zero_flows_are_degenerate() {
        let err = solve_irr(&[dec!(0), dec!(0), dec!(0)], FULL_IRR_SEED).unwrap_err();
        assert_eq!(err.reason, StopReason::DegenerateFlows);
    }

    #[test]
    fn test_irr_single_flow_is_degenerate() {
        let err = solve_irr(&[dec!(-100)], FULL_IRR_SEED).unwrap_err();
        assert_eq!(err.reason, StopReason::DegenerateFlows);
    }

    #[test]
    fn test_bisection_recovers_flat_coupon_rate() {
        let cfs = flat_coupon_flows(dec!(80), 8);
        let rate = bisect_irr(&cfs).unwrap();
        assert!((rate - dec!(0.08)).abs() < dec!(0.000001), "got {rate}");
    }

    #[test]
    fn test_bisection_without_sign_change_reports_no_bracket() {
        let err = bisect_irr(&[dec!(100), dec!(10), dec!(10)]).unwrap_err();
        assert_eq!(err.reason, StopReason::NoBracket);
    }

    #[test]
    fn test_fallback_none_keeps_unconverged_newton_rate() {
        let outcome =
            solve_irr_with_fallback(&[dec!(1000), dec!(0), dec!(0)], FULL_IRR_SEED, IrrFallback::None);
        assert!(!outcome.converged);
        assert_eq!(outcome.rate, FULL_IRR_SEED);
        assert_eq!(
            outcome.failure.as_ref().map(|f| f.reason),
            Some(StopReason::FlatDerivative)
        );
        assert!(outcome.into_result().is_err());
    }

    #[test]
    fn test_fallback_converged_outcome_into_result() {
        let cfs = flat_coupon_flows(dec!(110), 10);
        let outcome = solve_irr_with_fallback(&cfs, FULL_IRR_SEED, IrrFallback::Bisection);
        assert!(outcome.converged);
        assert_eq!(outcome.method, IrrMethod::NewtonRaphson);
        assert!(outcome.into_result().is_ok());
    }

    #[test]
    fn test_fallback_bisection_rescues_failed_newton() {
        // Deep negative IRR: Newton from 10% never settles
        let cfs = vec![dec!(-1000), dec!(1), dec!(1), dec!(300)];
        assert!(solve_irr(&cfs, FULL_IRR_SEED).is_err());

        let outcome = solve_irr_with_fallback(&cfs, FULL_IRR_SEED, IrrFallback::Bisection);
        assert!(outcome.converged);
        assert_eq!(outcome.method, IrrMethod::Bisection);
        assert!(outcome.failure.is_none());
        assert!(outcome.rate > dec!(-0.5) && outcome.rate < dec!(-0.25), "got {}", outcome.rate);
        let residual = npv(outcome.rate, &cfs).unwrap();
        assert!(residual.abs() < dec!(0.000001), "residual {residual}");
    }

    #[test]
    fn test_irr_step_below_minus_one_is_out_of_domain() {
        let cfs = vec![dec!(100), dec!(-300), dec!(250)];
        let err = solve_irr(&cfs, FULL_IRR_SEED).unwrap_err();
        assert_eq!(err.reason, StopReason::RateOutOfDomain);
        assert!(err.best_rate <= dec!(-1));

        let outcome = solve_irr_with_fallback(&cfs, FULL_IRR_SEED, IrrFallback::None);
        assert!(!outcome.converged);
        assert_eq!(outcome.method, IrrMethod::NewtonRaphson);
    }

    #[test]
    fn test_irr_overflowing_flows_report_numeric_overflow() {
        let err = solve_irr(&[Decimal::MAX, Decimal::MAX], FULL_IRR_SEED).unwrap_err();
        assert_eq!(err.reason, StopReason::NumericOverflow);
        assert_eq!(err.iterations, 0);
    }

    #[test]
    fn test_annualize_rate_beyond_range_is_none() {
        assert_eq!(annualize(Decimal::MAX, 2), None);
    }

    #[test]
    fn test_periodic_rate_semiannual() {
        let tep = periodic_rate(dec!(0.026), 2).unwrap();
        let expected = dec!(1.026).sqrt().unwrap() - Decimal::ONE;
        assert!((tep - expected).abs() < dec!(0.00000001), "got {tep}");
    }

    #[test]
    fn test_periodic_rate_annual_is_identity() {
        assert_eq!(periodic_rate(dec!(0.07), 1).unwrap(), dec!(0.07));
    }

    #[test]
    fn test_periodic_rate_zero_periods_rejected() {
        assert!(periodic_rate(dec!(0.05), 0).is_err());
    }

    #[test]
    fn test_annualize_inverts_periodic_rate() {
        let tep = periodic_rate(dec!(0.08), 4).unwrap();
        let annual = annualize(tep, 4).unwrap();
        assert!((annual - dec!(0.08)).abs() < dec!(0.0000001), "got {annual}");
    }

    #[test]
    fn test_annualize_zero_rate() {
        assert_eq!(annualize(Decimal::ZERO, 12), Some(Decimal::ZERO));
    }
}
