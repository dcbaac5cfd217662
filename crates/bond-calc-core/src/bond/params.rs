//! Instrument parameters and the normalizer that validates them and derives
//! the secondary fields (period count, periodic coupon rate, cost amounts).

use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::schedule::TimeZeroFlows;
use crate::error::{BondCalcError, ValidationErrors};
use crate::time_value::{self, IrrFallback, COMPACT_IRR_SEED, FULL_IRR_SEED};
use crate::types::{Currency, Money, Rate};
use crate::BondCalcResult;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

const MAX_COUPON_RATE: Rate = dec!(0.12);
const MIN_FEE_RATE: Rate = dec!(0.01);
const MAX_FEE_RATE: Rate = dec!(0.10);
const MIN_DAYS_PER_PERIOD: u32 = 10;
const DEFAULT_DAYS_PER_YEAR: u32 = 360;

fn default_days_per_year() -> u32 {
    DEFAULT_DAYS_PER_YEAR
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Grace-period treatment for the first `grace_periods` periods.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GraceKind {
    /// No special treatment.
    #[default]
    None,
    /// Interest is paid, principal is not.
    Partial,
    /// Nothing is paid.
    Total,
}

/// Engine preset. `Full` carries issuance costs and grace periods,
/// `Compact` is a plain bullet bond.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineVariant {
    #[default]
    Full,
    Compact,
}

impl EngineVariant {
    pub fn capabilities(self) -> EngineCapabilities {
        match self {
            EngineVariant::Full => EngineCapabilities::full(),
            EngineVariant::Compact => EngineCapabilities::compact(),
        }
    }
}

/// Feature switches of a single engine run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineCapabilities {
    pub has_issuance_costs: bool,
    pub has_grace_period: bool,
    /// Newton-Raphson starting point for both IRR searches
    pub irr_seed: Rate,
}

impl EngineCapabilities {
    pub fn full() -> Self {
        Self {
            has_issuance_costs: true,
            has_grace_period: true,
            irr_seed: FULL_IRR_SEED,
        }
    }

    pub fn compact() -> Self {
        Self {
            has_issuance_costs: false,
            has_grace_period: false,
            irr_seed: COMPACT_IRR_SEED,
        }
    }
}

impl Default for EngineCapabilities {
    fn default() -> Self {
        Self::full()
    }
}

/// Grace kind plus the number of leading periods it covers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GracePolicy {
    pub kind: GraceKind,
    pub periods: u32,
}

impl GracePolicy {
    pub fn new(kind: GraceKind, periods: u32) -> Self {
        Self { kind, periods }
    }

    /// Grace treatment in force for a 1-based period index.
    pub fn applies_to(&self, period: u32) -> GraceKind {
        if period <= self.periods {
            self.kind
        } else {
            GraceKind::None
        }
    }
}

/// Raw instrument description as supplied by a caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BondInput {
    /// Issuer display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
    /// Display currency label
    #[serde(default)]
    pub currency: Currency,
    /// Face / nominal value
    pub face_value: Money,
    /// Effective annual coupon rate as a decimal (0.026 = 2.6%)
    pub coupon_rate: Rate,
    /// Tenor in whole years
    pub years: u32,
    /// Coupons per year. Derived as days_per_year / days_per_period when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub periods_per_year: Option<u32>,
    #[serde(default = "default_days_per_year")]
    pub days_per_year: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days_per_period: Option<u32>,
    /// Placement price; defaults to face value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuance_price: Option<Money>,
    /// Registry (securities depository) fee as a fraction of face value
    #[serde(default)]
    pub registry_fee_rate: Rate,
    /// Placement fee as a fraction of face value
    #[serde(default)]
    pub placement_fee_rate: Rate,
    /// Structuring fee as a fraction of face value
    #[serde(default)]
    pub structuring_fee_rate: Rate,
    #[serde(default)]
    pub grace_kind: GraceKind,
    #[serde(default)]
    pub grace_periods: u32,
    /// Annual market yield for price/duration/convexity. The coupon rate is
    /// used when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub market_rate: Option<Rate>,
    /// Issue date; when set each period carries a payment date
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_date: Option<NaiveDate>,
    #[serde(default)]
    pub variant: EngineVariant,
    #[serde(default)]
    pub irr_fallback: IrrFallback,
}

/// Issuance cost amounts, each `face_value × rate`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuanceCosts {
    pub registry_fee: Money,
    pub placement_fee: Money,
    pub structuring_fee: Money,
}

impl IssuanceCosts {
    pub fn from_rates(
        face_value: Money,
        registry_rate: Rate,
        placement_rate: Rate,
        structuring_rate: Rate,
    ) -> Self {
        Self {
            registry_fee: face_value * registry_rate,
            placement_fee: face_value * placement_rate,
            structuring_fee: face_value * structuring_rate,
        }
    }

    pub fn total(&self) -> Money {
        self.registry_fee + self.placement_fee + self.structuring_fee
    }
}

/// Validated parameters with every derived field resolved.
#[derive(Debug, Clone, Serialize)]
pub struct NormalizedBond {
    pub issuer: Option<String>,
    pub currency: Currency,
    pub face_value: Money,
    pub annual_coupon_rate: Rate,
    pub periods_per_year: u32,
    pub days_per_year: u32,
    pub days_per_period: u32,
    pub total_periods: u32,
    /// TEP: `(1 + annual)^(1/periods_per_year) - 1`
    pub periodic_rate: Rate,
    pub coupon_per_period: Money,
    pub market_rate: Option<Rate>,
    /// Periodic rate used to discount the promised stream
    pub discount_rate: Rate,
    pub issuance_price: Money,
    pub costs: IssuanceCosts,
    pub grace: GracePolicy,
    pub issue_date: Option<NaiveDate>,
    pub capabilities: EngineCapabilities,
    pub irr_fallback: IrrFallback,
    /// Inputs that were accepted but ignored
    #[serde(skip)]
    pub warnings: Vec<String>,
}

impl NormalizedBond {
    /// Issuer receives the price net of costs; investor pays the price.
    pub fn time_zero_flows(&self) -> TimeZeroFlows {
        TimeZeroFlows {
            issuer: self.issuance_price - self.costs.total(),
            investor: -self.issuance_price,
        }
    }
}

// ---------------------------------------------------------------------------
// Normalizer
// ---------------------------------------------------------------------------

/// Validate `input` and derive the secondary fields. On failure every
/// violated constraint is reported in a single [`BondCalcError::Validation`].
pub fn normalize(input: &BondInput) -> BondCalcResult<NormalizedBond> {
    let capabilities = input.variant.capabilities();
    let mut errors = ValidationErrors::default();
    let mut warnings: Vec<String> = Vec::new();

    if input.face_value <= Decimal::ZERO {
        errors.push("face_value", "Face value must be positive");
    }
    if input.coupon_rate < Decimal::ZERO || input.coupon_rate > MAX_COUPON_RATE {
        errors.push("coupon_rate", "Coupon rate must be between 0% and 12%");
    }
    if input.days_per_year == 0 {
        errors.push("days_per_year", "Days per year must be positive");
    }

    let periods_per_year = resolve_periods_per_year(input, &mut errors);
    let days_per_period = match (input.days_per_period, periods_per_year) {
        (Some(days), _) => Some(days),
        (None, Some(ppy)) if input.days_per_year > 0 => Some(input.days_per_year / ppy),
        _ => None,
    };
    if let Some(days) = days_per_period {
        if days < MIN_DAYS_PER_PERIOD {
            errors.push(
                "days_per_period",
                format!("Days per period cannot be below {MIN_DAYS_PER_PERIOD} (got {days})"),
            );
        }
    }

    let total_periods = periods_per_year.and_then(|ppy| input.years.checked_mul(ppy));
    if periods_per_year.is_some() && total_periods.is_none() {
        errors.push("years", "Years × periods per year exceeds the supported range");
    }

    let issuance_price = input.issuance_price.unwrap_or(input.face_value);
    if input.issuance_price.is_some() && issuance_price <= Decimal::ZERO {
        errors.push("issuance_price", "Issuance price must be positive");
    }

    let costs = if capabilities.has_issuance_costs {
        check_rate_range(
            &mut errors,
            "registry_fee_rate",
            input.registry_fee_rate,
            Decimal::ZERO,
            MAX_FEE_RATE,
        );
        check_rate_range(
            &mut errors,
            "placement_fee_rate",
            input.placement_fee_rate,
            MIN_FEE_RATE,
            MAX_FEE_RATE,
        );
        check_rate_range(
            &mut errors,
            "structuring_fee_rate",
            input.structuring_fee_rate,
            MIN_FEE_RATE,
            MAX_FEE_RATE,
        );
        IssuanceCosts::from_rates(
            input.face_value,
            input.registry_fee_rate,
            input.placement_fee_rate,
            input.structuring_fee_rate,
        )
    } else {
        if !(input.registry_fee_rate.is_zero()
            && input.placement_fee_rate.is_zero()
            && input.structuring_fee_rate.is_zero())
        {
            warnings.push("Issuance cost rates are ignored by the compact engine".into());
        }
        IssuanceCosts::default()
    };

    let grace = if !capabilities.has_grace_period {
        if input.grace_kind != GraceKind::None || input.grace_periods > 0 {
            warnings.push("Grace period settings are ignored by the compact engine".into());
        }
        GracePolicy::default()
    } else if input.grace_kind == GraceKind::None {
        if input.grace_periods > 0 {
            warnings.push(format!(
                "grace_periods = {} ignored because grace_kind is none",
                input.grace_periods
            ));
        }
        GracePolicy::default()
    } else {
        if let Some(total) = total_periods {
            if input.grace_periods >= total {
                errors.push(
                    "grace_periods",
                    format!(
                        "Grace periods ({}) must be fewer than total periods ({total})",
                        input.grace_periods
                    ),
                );
            }
        }
        GracePolicy::new(input.grace_kind, input.grace_periods)
    };

    if let Some(market) = input.market_rate {
        if market <= dec!(-1) {
            errors.push("market_rate", "Market rate must be greater than -100%");
        }
    }

    if !errors.is_empty() {
        return Err(errors.into());
    }

    let (Some(periods_per_year), Some(days_per_period), Some(total_periods)) =
        (periods_per_year, days_per_period, total_periods)
    else {
        return Err(BondCalcError::InvalidInput {
            field: "periods_per_year".into(),
            reason: "Could not resolve the coupon period structure".into(),
        });
    };

    let periodic_rate = time_value::periodic_rate(input.coupon_rate, periods_per_year)?;
    let discount_rate = match input.market_rate {
        Some(market) => time_value::periodic_rate(market, periods_per_year)?,
        None => periodic_rate,
    };

    for w in &warnings {
        warn!(warning = %w, "bond input normalized with warning");
    }

    Ok(NormalizedBond {
        issuer: input.issuer.clone(),
        currency: input.currency.clone(),
        face_value: input.face_value,
        annual_coupon_rate: input.coupon_rate,
        periods_per_year,
        days_per_year: input.days_per_year,
        days_per_period,
        total_periods,
        periodic_rate,
        coupon_per_period: input.face_value * periodic_rate,
        market_rate: input.market_rate,
        discount_rate,
        issuance_price,
        costs,
        grace,
        issue_date: input.issue_date,
        capabilities,
        irr_fallback: input.irr_fallback,
        warnings,
    })
}

fn resolve_periods_per_year(input: &BondInput, errors: &mut ValidationErrors) -> Option<u32> {
    match (input.periods_per_year, input.days_per_period) {
        (Some(0), _) => {
            errors.push("periods_per_year", "Periods per year must be at least 1");
            None
        }
        (Some(ppy), Some(days)) => {
            // below the floor is reported by the caller
            if days >= MIN_DAYS_PER_PERIOD && input.days_per_year / days != ppy {
                errors.push(
                    "days_per_period",
                    format!(
                        "Days per period ({days}) gives {} periods per year, not {ppy}",
                        input.days_per_year / days
                    ),
                );
            }
            Some(ppy)
        }
        (Some(ppy), None) => Some(ppy),
        (None, Some(days))
            if days > 0 && input.days_per_year > 0 && input.days_per_year % days == 0 =>
        {
            Some(input.days_per_year / days)
        }
        (None, Some(days)) => {
            errors.push(
                "days_per_period",
                format!(
                    "Days per period ({days}) must divide days per year ({}) to derive periods per year",
                    input.days_per_year
                ),
            );
            None
        }
        (None, None) => {
            errors.push(
                "periods_per_year",
                "Provide periods_per_year or days_per_period",
            );
            None
        }
    }
}

fn check_rate_range(errors: &mut ValidationErrors, field: &str, value: Rate, min: Rate, max: Rate) {
    if value < min || value > max {
        errors.push(
            field,
            format!(
                "Must be between {}% and {}% (got {}%)",
                (min * dec!(100)).normalize(),
                (max * dec!(100)).normalize(),
                (value * dec!(100)).normalize()
            ),
        );
    }
}
