//! Plan fingerprints.

use std::fmt;

use blake3::Hasher;
use serde::{Deserialize, Serialize};

use crate::dag::PhysicalPlan;
use crate::error::{Error, Result};

/// blake3 digest of a plan's JSON encoding. Params are JSON objects with
/// sorted keys, so equal plans always hash equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlanHash([u8; 32]);

impl PlanHash {
    pub fn of(plan: &PhysicalPlan) -> Result<Self> {
        let mut hasher = Hasher::new();
        serde_json::to_writer(&mut hasher, plan).map_err(|e| Error::Hash(e.to_string()))?;
        Ok(Self(*hasher.finalize().as_bytes()))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for PlanHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form; enough to tell plans apart in logs.
        for b in &self.0[..8] {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::PlanNode;
    use serde_json::json;

    #[test]
    fn params_affect_the_hash() {
        let a = PhysicalPlan::new(vec![PlanNode::new(1, "from", json!({ "dataset": "a" }))]);
        let b = PhysicalPlan::new(vec![PlanNode::new(1, "from", json!({ "dataset": "b" }))]);
        assert_eq!(PlanHash::of(&a).unwrap(), PlanHash::of(&a.clone()).unwrap());
        assert_ne!(PlanHash::of(&a).unwrap(), PlanHash::of(&b).unwrap());
        assert_eq!(PlanHash::of(&a).unwrap().to_string().len(), 16);
    }
}
