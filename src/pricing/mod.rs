pub mod calculator;
pub mod models;

pub use calculator::CostCalculator;
pub use models::{CostBreakdown, PricingTable};
