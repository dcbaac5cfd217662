use chrono::NaiveDate;
use clap::{Args, ValueEnum};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::Value;

use bond_calc_core::bond::{self, BondInput, EngineVariant, GraceKind};
use bond_calc_core::time_value::IrrFallback;
use bond_calc_core::types::Currency;

use crate::input;

const DEFAULT_FACE_VALUE: Decimal = dec!(200000);
const DEFAULT_COUPON_RATE: Decimal = dec!(0.026);
const DEFAULT_REGISTRY_FEE: Decimal = dec!(0.000375);
const DEFAULT_PLACEMENT_FEE: Decimal = dec!(0.02);
const DEFAULT_STRUCTURING_FEE: Decimal = dec!(0.015);
const DEFAULT_PERIODS_PER_YEAR: u32 = 2;

/// Keys of the full result that the metrics view leaves out
const SCHEDULE_KEYS: [&str; 3] = ["schedule", "issuer_flows", "investor_flows"];

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum GraceArg {
    None,
    Partial,
    Total,
}

impl From<GraceArg> for GraceKind {
    fn from(arg: GraceArg) -> Self {
        match arg {
            GraceArg::None => GraceKind::None,
            GraceArg::Partial => GraceKind::Partial,
            GraceArg::Total => GraceKind::Total,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum VariantArg {
    Full,
    Compact,
}

impl From<VariantArg> for EngineVariant {
    fn from(arg: VariantArg) -> Self {
        match arg {
            VariantArg::Full => EngineVariant::Full,
            VariantArg::Compact => EngineVariant::Compact,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum FallbackArg {
    None,
    Bisection,
}

impl From<FallbackArg> for IrrFallback {
    fn from(arg: FallbackArg) -> Self {
        match arg {
            FallbackArg::None => IrrFallback::None,
            FallbackArg::Bisection => IrrFallback::Bisection,
        }
    }
}

/// Bond description shared by `schedule`, `metrics` and `validate`
#[derive(Args)]
pub struct BondArgs {
    /// Path to JSON input file (overrides individual flags)
    #[arg(long)]
    pub input: Option<String>,

    /// Issuer display name
    #[arg(long)]
    pub issuer: Option<String>,

    /// Currency label (PEN, USD, EUR or any other code)
    #[arg(long, default_value = "PEN")]
    pub currency: String,

    /// Face / nominal value
    #[arg(long, default_value_t = DEFAULT_FACE_VALUE)]
    pub face_value: Decimal,

    /// Effective annual coupon rate as a decimal (0.026 = 2.6%)
    #[arg(long, default_value_t = DEFAULT_COUPON_RATE)]
    pub coupon_rate: Decimal,

    /// Tenor in whole years
    #[arg(long, default_value_t = 8)]
    pub years: u32,

    /// Coupons per year (defaults to 2 unless --days-per-period is given)
    #[arg(long)]
    pub periods_per_year: Option<u32>,

    /// Days per year used for the day-count derivation
    #[arg(long, default_value_t = 360)]
    pub days_per_year: u32,

    /// Days per coupon period
    #[arg(long)]
    pub days_per_period: Option<u32>,

    /// Placement price (defaults to face value)
    #[arg(long)]
    pub issuance_price: Option<Decimal>,

    /// Registry fee as a fraction of face value
    #[arg(long, default_value_t = DEFAULT_REGISTRY_FEE)]
    pub registry_fee: Decimal,

    /// Placement fee as a fraction of face value
    #[arg(long, default_value_t = DEFAULT_PLACEMENT_FEE)]
    pub placement_fee: Decimal,

    /// Structuring fee as a fraction of face value
    #[arg(long, default_value_t = DEFAULT_STRUCTURING_FEE)]
    pub structuring_fee: Decimal,

    /// Grace treatment of the leading periods
    #[arg(long, value_enum, default_value = "none")]
    pub grace: GraceArg,

    /// Number of leading grace periods
    #[arg(long, default_value_t = 0)]
    pub grace_periods: u32,

    /// Annual market yield for price, duration and convexity
    #[arg(long)]
    pub market_rate: Option<Decimal>,

    /// Issue date (YYYY-MM-DD); adds payment dates to the schedule
    #[arg(long)]
    pub issue_date: Option<NaiveDate>,

    /// Engine preset
    #[arg(long, value_enum, default_value = "full")]
    pub variant: VariantArg,

    /// What to do when Newton-Raphson does not converge
    #[arg(long, value_enum, default_value = "none")]
    pub fallback: FallbackArg,
}

impl BondArgs {
    fn into_input(self) -> BondInput {
        let periods_per_year = match (self.periods_per_year, self.days_per_period) {
            (None, None) => Some(DEFAULT_PERIODS_PER_YEAR),
            (ppy, _) => ppy,
        };

        BondInput {
            issuer: self.issuer,
            currency: Currency::from_code(&self.currency),
            face_value: self.face_value,
            coupon_rate: self.coupon_rate,
            years: self.years,
            periods_per_year,
            days_per_year: self.days_per_year,
            days_per_period: self.days_per_period,
            issuance_price: self.issuance_price,
            registry_fee_rate: self.registry_fee,
            placement_fee_rate: self.placement_fee,
            structuring_fee_rate: self.structuring_fee,
            grace_kind: self.grace.into(),
            grace_periods: self.grace_periods,
            market_rate: self.market_rate,
            issue_date: self.issue_date,
            variant: self.variant.into(),
            irr_fallback: self.fallback.into(),
        }
    }
}

fn resolve_input(args: BondArgs) -> Result<BondInput, Box<dyn std::error::Error>> {
    if let Some(ref path) = args.input {
        input::file::read_json(path)
    } else if let Some(piped) = input::stdin::read_stdin()? {
        Ok(piped)
    } else {
        Ok(args.into_input())
    }
}

pub fn run_schedule(args: BondArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let bond_input = resolve_input(args)?;
    let result = bond::calculate_bond(&bond_input)?;
    Ok(serde_json::to_value(result)?)
}

pub fn run_metrics(args: BondArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let bond_input = resolve_input(args)?;
    let result = bond::calculate_bond(&bond_input)?;
    let mut value = serde_json::to_value(result)?;
    if let Some(Value::Object(result)) = value.get_mut("result") {
        for key in SCHEDULE_KEYS {
            result.remove(key);
        }
    }
    Ok(value)
}

pub fn run_validate(args: BondArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let bond_input = resolve_input(args)?;
    let report = bond::validate_bond(&bond_input)?;
    Ok(serde_json::json!({ "result": report }))
}
