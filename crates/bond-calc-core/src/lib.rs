pub mod bond;
pub mod error;
pub mod time_value;
pub mod types;

pub use error::{BondCalcError, FieldViolation, ValidationErrors};
pub use types::*;

/// Standard result type for all bond-calc operations
pub type BondCalcResult<T> = Result<T, BondCalcError>;
