pub mod engine;
pub mod metrics;
pub mod params;
pub mod schedule;

pub use engine::{
    calculate_bond, calculate_irr, compute, compute_normalized, validate_bond, BondCalculation,
    IrrRequest, IssuanceSummary, ValidationReport,
};
pub use metrics::{compute_metrics, IrrEstimate, MetricSet, MetricTerms};
pub use params::{
    normalize, BondInput, EngineCapabilities, EngineVariant, GraceKind, GracePolicy,
    IssuanceCosts, NormalizedBond,
};
pub use schedule::{
    generate_schedule, PaymentCalendar, PeriodRecord, Schedule, ScheduleTerms, TimeZeroFlows,
};
