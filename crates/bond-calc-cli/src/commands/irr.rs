use clap::Args;
use rust_decimal::Decimal;
use serde_json::Value;

use bond_calc_core::bond::{self, IrrRequest};
use bond_calc_core::time_value::FULL_IRR_SEED;

use super::bond::FallbackArg;
use crate::input;

/// Arguments for a standalone IRR solve
#[derive(Args)]
pub struct IrrArgs {
    /// Path to JSON input file (overrides individual flags)
    #[arg(long)]
    pub input: Option<String>,

    /// Cash flows, index 0 first (comma-separated, e.g. "-1000,50,50,1050")
    #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
    pub flows: Option<Vec<Decimal>>,

    /// Newton-Raphson starting rate
    #[arg(long, default_value_t = FULL_IRR_SEED)]
    pub guess: Decimal,

    /// Periods per year, used to annualize the result
    #[arg(long, default_value_t = 1)]
    pub periods_per_year: u32,

    /// What to do when Newton-Raphson does not converge
    #[arg(long, value_enum, default_value = "none")]
    pub fallback: FallbackArg,

    /// Exit with an error instead of reporting an unconverged rate
    #[arg(long)]
    pub strict: bool,
}

pub fn run_irr(args: IrrArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let request: IrrRequest = if let Some(ref path) = args.input {
        input::file::read_json(path)?
    } else if let Some(piped) = input::stdin::read_stdin()? {
        piped
    } else {
        let cash_flows = args
            .flows
            .ok_or("--flows is required (or provide --input)")?;
        IrrRequest {
            cash_flows,
            guess: args.guess,
            periods_per_year: args.periods_per_year,
            fallback: args.fallback.into(),
            strict: args.strict,
        }
    };

    let result = bond::calculate_irr(&request)?;
    Ok(serde_json::to_value(result)?)
}
