use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-vendor counters the delivery side effects touch. The vendor
/// directory itself is an external service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VendorStats {
    pub completed_orders: u64,
    pub updated_at: DateTime<Utc>,
}

impl Default for VendorStats {
    fn default() -> Self {
        Self {
            completed_orders: 0,
            updated_at: Utc::now(),
        }
    }
}
