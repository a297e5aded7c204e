//! Common identifier types shared by every simulation layer.

use serde::{Deserialize, Serialize};

/// Unique identifier of a simulated transaction.
///
/// Assigned monotonically by the workload generator. Sharded runs stride the
/// ids so that shards never collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TxnId(pub u64);

impl TxnId {
    /// Returns the raw id.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for TxnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "txn#{}", self.0)
    }
}
