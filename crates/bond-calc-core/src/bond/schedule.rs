//! Period-by-period coupon schedule for a bullet (American) bond.
//!
//! Interest is paid every period on the full face value and the whole
//! principal is repaid at the final period. Leading grace periods either waive
//! everything (`total`) or waive principal only (`partial`).

use chrono::{Days, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::params::{GraceKind, GracePolicy};
use crate::error::BondCalcError;
use crate::types::{CashFlowVector, Money, Rate};
use crate::BondCalcResult;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Signed flows at issuance (index 0 of each cash-flow vector).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeZeroFlows {
    pub issuer: Money,
    pub investor: Money,
}

/// Flat payment grid: period `i` pays `i × days_per_period` days after issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentCalendar {
    pub issue_date: NaiveDate,
    pub days_per_period: u32,
}

impl PaymentCalendar {
    pub fn payment_date(&self, period: u32) -> BondCalcResult<NaiveDate> {
        let offset = u64::from(period) * u64::from(self.days_per_period);
        self.issue_date
            .checked_add_days(Days::new(offset))
            .ok_or_else(|| {
                BondCalcError::DateError(format!(
                    "payment date for period {period} overflows the calendar"
                ))
            })
    }
}

/// Everything the generator needs for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleTerms {
    pub face_value: Money,
    pub periodic_rate: Rate,
    pub total_periods: u32,
    pub grace: GracePolicy,
    pub time_zero: TimeZeroFlows,
    pub calendar: Option<PaymentCalendar>,
}

impl ScheduleTerms {
    pub fn new(face_value: Money, periodic_rate: Rate, total_periods: u32, grace: GracePolicy) -> Self {
        Self {
            face_value,
            periodic_rate,
            total_periods,
            grace,
            time_zero: TimeZeroFlows::default(),
            calendar: None,
        }
    }

    pub fn with_time_zero(mut self, time_zero: TimeZeroFlows) -> Self {
        self.time_zero = time_zero;
        self
    }

    pub fn with_calendar(mut self, calendar: PaymentCalendar) -> Self {
        self.calendar = Some(calendar);
        self
    }
}

/// One row of the amortization table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodRecord {
    /// 1-based period index
    pub period: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_date: Option<NaiveDate>,
    /// Periodic coupon rate (TEP)
    pub periodic_rate: Rate,
    pub opening_balance: Money,
    pub interest: Money,
    pub amortization: Money,
    /// interest + amortization
    pub payment: Money,
    pub closing_balance: Money,
    /// Signed flow from the issuer's side (payments negative)
    pub issuer_flow: Money,
    /// Signed flow from the investor's side (receipts positive)
    pub investor_flow: Money,
    pub grace: GraceKind,
}

/// The full table plus both counterparties' cash-flow vectors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    pub periods: Vec<PeriodRecord>,
    pub issuer_flows: CashFlowVector,
    pub investor_flows: CashFlowVector,
}

impl Schedule {
    pub fn is_empty(&self) -> bool {
        self.periods.is_empty()
    }

    pub fn len(&self) -> usize {
        self.periods.len()
    }
}

// ---------------------------------------------------------------------------
// Generator
// ---------------------------------------------------------------------------

/// Build the bullet schedule for periods `1..=total_periods`.
///
/// The opening balance is the face value in every period; the final period
/// amortizes it in full and closes at zero. `total_periods == 0` yields an
/// empty table whose cash-flow vectors hold only the time-zero flows.
pub fn generate_schedule(terms: &ScheduleTerms) -> BondCalcResult<Schedule> {
    let n = terms.total_periods;
    let coupon = terms
        .face_value
        .checked_mul(terms.periodic_rate)
        .ok_or_else(|| out_of_range("coupon", 0))?;
    let opening_balance = terms.face_value;

    let mut periods: Vec<PeriodRecord> = Vec::with_capacity(n as usize);
    let mut issuer_flows = CashFlowVector::new(terms.time_zero.issuer);
    let mut investor_flows = CashFlowVector::new(terms.time_zero.investor);

    for i in 1..=n {
        let grace = terms.grace.applies_to(i);
        let is_final = i == n;

        let (interest, amortization) = match grace {
            GraceKind::Total => (Decimal::ZERO, Decimal::ZERO),
            GraceKind::Partial => (coupon, Decimal::ZERO),
            GraceKind::None => {
                let principal = if is_final {
                    opening_balance
                } else {
                    Decimal::ZERO
                };
                (coupon, principal)
            }
        };
        let payment = interest
            .checked_add(amortization)
            .ok_or_else(|| out_of_range("payment", i))?;

        // Keep waived periods at an unsigned zero
        let issuer_flow = if payment.is_zero() {
            Decimal::ZERO
        } else {
            -payment
        };

        let payment_date = terms
            .calendar
            .map(|calendar| calendar.payment_date(i))
            .transpose()?;

        periods.push(PeriodRecord {
            period: i,
            payment_date,
            periodic_rate: terms.periodic_rate,
            opening_balance,
            interest,
            amortization,
            payment,
            closing_balance: if is_final {
                Decimal::ZERO
            } else {
                opening_balance
            },
            issuer_flow,
            investor_flow: payment,
            grace,
        });
        issuer_flows.push(issuer_flow);
        investor_flows.push(payment);
    }

    Ok(Schedule {
        periods,
        issuer_flows,
        investor_flows,
    })
}

fn out_of_range(what: &str, period: u32) -> BondCalcError {
    BondCalcError::FinancialImpossibility(format!(
        "{what} for period {period} exceeds the decimal range"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    fn terms(grace: GracePolicy, n: u32) -> ScheduleTerms {
        ScheduleTerms::new(dec!(1000), dec!(0.05), n, grace)
    }

    #[test]
    fn test_bullet_without_grace() {
        let schedule = generate_schedule(&terms(GracePolicy::default(), 3)).unwrap();
        assert_eq!(schedule.len(), 3);
        for p in &schedule.periods[..2] {
            assert_eq!(p.interest, dec!(50));
            assert_eq!(p.amortization, Decimal::ZERO);
            assert_eq!(p.closing_balance, p.opening_balance);
        }
        let last = &schedule.periods[2];
        assert_eq!(last.amortization, dec!(1000));
        assert_eq!(last.payment, dec!(1050));
        assert_eq!(last.closing_balance, Decimal::ZERO);
        assert_eq!(last.issuer_flow, dec!(-1050));
    }

    #[test]
    fn test_flow_vectors_prepend_time_zero() {
        let t = terms(GracePolicy::default(), 2).with_time_zero(TimeZeroFlows {
            issuer: dec!(980),
            investor: dec!(-1000),
        });
        let schedule = generate_schedule(&t).unwrap();
        assert_eq!(
            schedule.issuer_flows.as_slice(),
            &[dec!(980), dec!(-50), dec!(-1050)]
        );
        assert_eq!(
            schedule.investor_flows.as_slice(),
            &[dec!(-1000), dec!(50), dec!(1050)]
        );
    }

    #[test]
    fn test_partial_grace_pays_interest_only() {
        let schedule =
            generate_schedule(&terms(GracePolicy::new(GraceKind::Partial, 2), 4)).unwrap();
        for p in &schedule.periods[..2] {
            assert_eq!(p.grace, GraceKind::Partial);
            assert_eq!(p.payment, dec!(50));
            assert_eq!(p.amortization, Decimal::ZERO);
        }
        assert_eq!(schedule.periods[2].grace, GraceKind::None);
        let principal: Decimal = schedule.periods.iter().map(|p| p.amortization).sum();
        assert_eq!(principal, dec!(1000));
    }

    #[test]
    fn test_total_grace_moves_no_cash() {
        let schedule =
            generate_schedule(&terms(GracePolicy::new(GraceKind::Total, 1), 3)).unwrap();
        let first = &schedule.periods[0];
        assert_eq!(first.payment, Decimal::ZERO);
        assert_eq!(first.issuer_flow, Decimal::ZERO);
        assert!(!first.issuer_flow.is_sign_negative());
        assert_eq!(first.investor_flow, Decimal::ZERO);
        let interest: Decimal = schedule.periods.iter().map(|p| p.interest).sum();
        assert_eq!(interest, dec!(100));
    }

    #[test]
    fn test_zero_grace_length_matches_no_grace() {
        let plain = generate_schedule(&terms(GracePolicy::default(), 4)).unwrap();
        let zero_total =
            generate_schedule(&terms(GracePolicy::new(GraceKind::Total, 0), 4)).unwrap();
        assert_eq!(plain, zero_total);
    }

    #[test]
    fn test_zero_periods_yield_empty_schedule() {
        let t = terms(GracePolicy::default(), 0).with_time_zero(TimeZeroFlows {
            issuer: dec!(1000),
            investor: dec!(-1000),
        });
        let schedule = generate_schedule(&t).unwrap();
        assert!(schedule.is_empty());
        assert_eq!(schedule.issuer_flows.as_slice(), &[dec!(1000)]);
        assert!(schedule.periods.is_empty());
    }

    #[test]
    fn test_final_payment_beyond_decimal_range_is_an_error() {
        let t = ScheduleTerms::new(Decimal::MAX, dec!(0.05), 2, GracePolicy::default());
        assert!(matches!(
            generate_schedule(&t),
            Err(BondCalcError::FinancialImpossibility(_))
        ));
    }

    #[test]
    fn test_payment_dates_follow_flat_grid() {
        let calendar = PaymentCalendar {
            issue_date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            days_per_period: 180,
        };
        let schedule =
            generate_schedule(&terms(GracePolicy::default(), 2).with_calendar(calendar)).unwrap();
        assert_eq!(
            schedule.periods[0].payment_date,
            NaiveDate::from_ymd_opt(2025, 6, 30)
        );
        assert_eq!(
            schedule.periods[1].payment_date,
            NaiveDate::from_ymd_opt(2025, 12, 27)
        );
    }
}
