//! Physical plan DAG handed to the engine by the (external) compiler.
//!
//! Each node names an operator *kind* (resolved by the exec crate's registry),
//! an opaque JSON parameter payload, and the ids of its predecessors. The
//! plan is plain data: validation (unknown kinds, cycles) happens in the
//! graph builder.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::id::NodeId;

/// Kind of the named result sink.
pub const YIELD_KIND: &str = "yield";

/// Result name used when a plan has a single terminal node and no `yield`.
pub const DEFAULT_RESULT_NAME: &str = "_result";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanNode {
    pub id: NodeId,
    pub kind: String,
    /// Operator-specific configuration (future-proof, opaque to the engine).
    #[serde(default)]
    pub params: serde_json::Value,
    #[serde(default)]
    pub predecessors: Vec<NodeId>,
}

impl PlanNode {
    pub fn new(id: u64, kind: impl Into<String>, params: serde_json::Value) -> Self {
        Self {
            id: NodeId::new(id),
            kind: kind.into(),
            params,
            predecessors: vec![],
        }
    }

    pub fn after(mut self, preds: &[u64]) -> Self {
        self.predecessors = preds.iter().copied().map(NodeId::new).collect();
        self
    }

    pub fn is_yield(&self) -> bool {
        self.kind == YIELD_KIND
    }

    /// Number of inputs for this node.
    pub fn inputs(&self) -> usize {
        self.predecessors.len()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhysicalPlan {
    pub nodes: Vec<PlanNode>,
}

impl PhysicalPlan {
    pub fn new(nodes: Vec<PlanNode>) -> Self {
        Self { nodes }
    }

    pub fn push(&mut self, node: PlanNode) -> &mut Self {
        self.nodes.push(node);
        self
    }

    pub fn node(&self, id: NodeId) -> Option<&PlanNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Number of plan edges (sum of predecessor lists).
    pub fn num_edges(&self) -> usize {
        self.nodes.iter().map(|n| n.predecessors.len()).sum()
    }

    pub fn from_json(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn from_yaml(s: &str) -> Result<Self> {
        let plan: PhysicalPlan = serde_yaml::from_str(s)?;
        if plan.nodes.is_empty() {
            return Err(Error::Plan("plan has no nodes".into()));
        }
        Ok(plan)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
