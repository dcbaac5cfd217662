use napi::Result as NapiResult;
use napi_derive::napi;

use bond_calc_core::bond::{self, BondInput, IrrRequest};

/// Convert any Display error into a napi::Error.
fn to_napi_error(e: impl std::fmt::Display) -> napi::Error {
    napi::Error::from_reason(e.to_string())
}

// ---------------------------------------------------------------------------
// Bond engine
// ---------------------------------------------------------------------------

/// Full calculation: schedule, cash-flow vectors, costs and metrics.
#[napi]
pub fn calculate_bond(input_json: String) -> NapiResult<String> {
    let input: BondInput = serde_json::from_str(&input_json).map_err(to_napi_error)?;
    let output = bond::calculate_bond(&input).map_err(to_napi_error)?;
    serde_json::to_string(&output).map_err(to_napi_error)
}

/// Every violated constraint of a bond description, without computing it.
#[napi]
pub fn validate_bond(input_json: String) -> NapiResult<String> {
    let input: BondInput = serde_json::from_str(&input_json).map_err(to_napi_error)?;
    let report = bond::validate_bond(&input).map_err(to_napi_error)?;
    serde_json::to_string(&report).map_err(to_napi_error)
}

// ---------------------------------------------------------------------------
// Root finding
// ---------------------------------------------------------------------------

#[napi]
pub fn solve_irr(input_json: String) -> NapiResult<String> {
    let request: IrrRequest = serde_json::from_str(&input_json).map_err(to_napi_error)?;
    let output = bond::calculate_irr(&request).map_err(to_napi_error)?;
    serde_json::to_string(&output).map_err(to_napi_error)
}
