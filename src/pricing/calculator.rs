use arc_swap::ArcSwap;
use std::sync::Arc;
use tracing::info;

use crate::models::GenerationRequest;
use crate::pricing::models::{CostBreakdown, PricingTable};

/// Calculator for computing request costs from the active pricing table.
///
/// The table can be replaced at runtime (SIGHUP reload); every estimate reads
/// a single snapshot, so one request is always priced against one table.
pub struct CostCalculator {
    table: ArcSwap<PricingTable>,
}

impl CostCalculator {
    /// Create a new cost calculator
    pub fn new(table: PricingTable) -> Self {
        Self {
            table: ArcSwap::from_pointee(table),
        }
    }

    /// Estimate the cost of a request without contacting the provider
    pub fn estimate_cost(&self, request: &GenerationRequest) -> CostBreakdown {
        self.table.load().estimate_cost(request)
    }

    /// Current pricing table snapshot
    pub fn table(&self) -> Arc<PricingTable> {
        self.table.load_full()
    }

    /// Atomically replace the pricing table
    pub fn replace_table(&self, table: PricingTable) {
        self.table.store(Arc::new(table));
        info!("Pricing table replaced");
    }
}

impl Default for CostCalculator {
    fn default() -> Self {
        Self::new(PricingTable::default())
    }
}
