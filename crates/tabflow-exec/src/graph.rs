//! Physical plan -> executable graph.
//!
//! The graph is an arena: nodes live in a `Vec` in topological order and
//! refer to each other through indices into a shared edge table. Every plan
//! node becomes exactly one graph node (one operator instance) and every plan
//! edge exactly one `Edge`.

use std::collections::{BTreeSet, HashMap, HashSet};

use tabflow_core::dag::{PhysicalPlan, DEFAULT_RESULT_NAME, YIELD_KIND};
use tabflow_core::hash::PlanHash;
use tabflow_core::id::NodeId;
use tabflow_operators::{BuildContext, Operator, Port, Registry};
use tracing::{debug, error};

use crate::error::{ExecError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    /// Producer node index.
    pub from: usize,
    /// Consumer node index.
    pub to: usize,
    /// Input port on the consumer.
    pub port: Port,
}

#[derive(Debug)]
pub enum NodeRole {
    Source,
    Transform,
    /// Named result sink.
    Yield(String),
}

#[derive(Debug)]
pub struct GraphNode {
    pub id: NodeId,
    pub kind: String,
    pub role: NodeRole,
    /// Indices into `Graph::edges`, in port order.
    pub inputs: Vec<usize>,
    /// Indices into `Graph::edges`; more than one forms a multicast set.
    pub outputs: Vec<usize>,
    pub(crate) operator: Option<Operator>,
}

#[derive(Debug)]
pub struct Graph {
    pub(crate) nodes: Vec<GraphNode>,
    pub(crate) edges: Vec<Edge>,
    pub(crate) plan_hash: PlanHash,
}

impl Graph {
    pub fn nodes(&self) -> &[GraphNode] {
        &self.nodes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    /// Nodes that carry an operator instance (everything but result sinks).
    pub fn num_operators(&self) -> usize {
        self.nodes.iter().filter(|n| n.operator.is_some()).count()
    }

    pub fn result_names(&self) -> Vec<&str> {
        self.nodes
            .iter()
            .filter_map(|n| match &n.role {
                NodeRole::Yield(name) => Some(name.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn plan_hash(&self) -> PlanHash {
        self.plan_hash
    }

    /// Topological position of plan node `id`.
    pub fn index_of(&self, id: NodeId) -> Option<usize> {
        self.nodes.iter().position(|n| n.id == id)
    }
}

pub struct GraphBuilder<'a> {
    registry: &'a Registry,
    ctx: BuildContext,
}

impl<'a> GraphBuilder<'a> {
    pub fn new(registry: &'a Registry, ctx: BuildContext) -> Self {
        Self { registry, ctx }
    }

    pub fn build(&self, plan: &PhysicalPlan) -> Result<Graph> {
        if plan.nodes.is_empty() {
            return Err(ExecError::Compile("plan has no nodes".into()));
        }
        let plan_hash = PlanHash::of(plan)?;

        // id -> plan index, rejecting duplicates and dangling predecessors.
        let mut by_id: HashMap<NodeId, usize> = HashMap::with_capacity(plan.nodes.len());
        for (i, n) in plan.nodes.iter().enumerate() {
            if by_id.insert(n.id, i).is_some() {
                return Err(ExecError::Compile(format!("duplicate node id {}", n.id)));
            }
        }
        for n in &plan.nodes {
            let mut seen = HashSet::new();
            for p in &n.predecessors {
                if !by_id.contains_key(p) {
                    return Err(ExecError::Compile(format!(
                        "node {} names unknown predecessor {p}",
                        n.id
                    )));
                }
                if !seen.insert(*p) {
                    return Err(ExecError::Compile(format!(
                        "node {} lists predecessor {p} twice",
                        n.id
                    )));
                }
            }
        }

        let order = topo_order(plan, &by_id)?;

        let mut arena_of = vec![usize::MAX; plan.nodes.len()];
        let mut nodes: Vec<GraphNode> = Vec::with_capacity(plan.nodes.len() + 1);
        for &pi in &order {
            let pn = &plan.nodes[pi];
            let inputs = pn.predecessors.len();
            let (role, operator) = if pn.is_yield() {
                if inputs != 1 {
                    return Err(ExecError::Compile(format!(
                        "yield {} needs exactly one input, got {inputs}",
                        pn.id
                    )));
                }
                let name = pn
                    .params
                    .get("name")
                    .and_then(|v| v.as_str())
                    .unwrap_or(DEFAULT_RESULT_NAME)
                    .to_string();
                (NodeRole::Yield(name), None)
            } else {
                let ctx = self.ctx.clone().with_inputs(inputs);
                let op = self
                    .registry
                    .create(&pn.kind, &pn.params, &ctx)
                    .ok_or_else(|| {
                        ExecError::Compile(format!("unknown operator kind '{}'", pn.kind))
                    })?
                    .map_err(|e| {
                        ExecError::Compile(format!("node {} ({}): {e}", pn.id, pn.kind))
                    })?;
                let role = match (&op, inputs) {
                    (Operator::Source(_), 0) => NodeRole::Source,
                    (Operator::Transform(_), n) if n > 0 => NodeRole::Transform,
                    (Operator::Source(_), n) => {
                        return Err(ExecError::Compile(format!(
                            "source {} ({}) cannot have inputs, got {n}",
                            pn.id, pn.kind
                        )))
                    }
                    (Operator::Transform(_), _) => {
                        return Err(ExecError::Compile(format!(
                            "transformation {} ({}) needs at least one input",
                            pn.id, pn.kind
                        )))
                    }
                };
                (role, Some(op))
            };
            arena_of[pi] = nodes.len();
            nodes.push(GraphNode {
                id: pn.id,
                kind: pn.kind.clone(),
                role,
                inputs: Vec::new(),
                outputs: Vec::new(),
                operator,
            });
        }

        let mut edges = Vec::with_capacity(plan.num_edges() + 1);
        for &pi in &order {
            let to = arena_of[pi];
            for (port, pred) in plan.nodes[pi].predecessors.iter().enumerate() {
                let from = arena_of[by_id[pred]];
                connect(&mut nodes, &mut edges, from, to, port);
            }
        }

        attach_results(&mut nodes, &mut edges)?;

        debug!(
            nodes = nodes.len(),
            edges = edges.len(),
            plan = %plan_hash,
            "graph built"
        );
        Ok(Graph {
            nodes,
            edges,
            plan_hash,
        })
    }
}

fn connect(nodes: &mut [GraphNode], edges: &mut Vec<Edge>, from: usize, to: usize, port: Port) {
    let e = edges.len();
    edges.push(Edge { from, to, port });
    nodes[from].outputs.push(e);
    nodes[to].inputs.push(e);
}

/// Kahn's algorithm; ties broken by node id so the order is deterministic.
fn topo_order(plan: &PhysicalPlan, by_id: &HashMap<NodeId, usize>) -> Result<Vec<usize>> {
    let n = plan.nodes.len();
    let mut indegree: Vec<usize> = plan.nodes.iter().map(|p| p.predecessors.len()).collect();
    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (i, node) in plan.nodes.iter().enumerate() {
        for p in &node.predecessors {
            successors[by_id[p]].push(i);
        }
    }

    let mut ready: BTreeSet<(NodeId, usize)> = plan
        .nodes
        .iter()
        .enumerate()
        .filter(|(i, _)| indegree[*i] == 0)
        .map(|(i, node)| (node.id, i))
        .collect();
    let mut order = Vec::with_capacity(n);
    while let Some((_, i)) = ready.pop_first() {
        order.push(i);
        for &s in &successors[i] {
            indegree[s] -= 1;
            if indegree[s] == 0 {
                ready.insert((plan.nodes[s].id, s));
            }
        }
    }

    if order.len() != n {
        let stuck: Vec<String> = plan
            .nodes
            .iter()
            .enumerate()
            .filter(|(i, _)| indegree[*i] > 0)
            .map(|(_, node)| node.id.to_string())
            .collect();
        error!(nodes = ?stuck, "plan graph contains a cycle");
        return Err(ExecError::Compile(format!(
            "plan contains a cycle through [{}]",
            stuck.join(", ")
        )));
    }
    Ok(order)
}

/// Terminal nodes must be yields. A plan without any yield and a single
/// terminal node gets an implicit default result.
fn attach_results(nodes: &mut Vec<GraphNode>, edges: &mut Vec<Edge>) -> Result<()> {
    let has_yield = nodes.iter().any(|n| matches!(n.role, NodeRole::Yield(_)));
    let terminals: Vec<usize> = (0..nodes.len())
        .filter(|&i| nodes[i].outputs.is_empty() && !matches!(nodes[i].role, NodeRole::Yield(_)))
        .collect();

    if !has_yield {
        if let [only] = terminals.as_slice() {
            let max_id = nodes.iter().map(|n| n.id.get()).max().unwrap_or(0);
            let sink = nodes.len();
            nodes.push(GraphNode {
                id: NodeId::new(max_id + 1),
                kind: YIELD_KIND.to_string(),
                role: NodeRole::Yield(DEFAULT_RESULT_NAME.to_string()),
                inputs: Vec::new(),
                outputs: Vec::new(),
                operator: None,
            });
            connect(nodes, edges, *only, sink, 0);
            return Ok(());
        }
        return Err(ExecError::Compile(format!(
            "plan has {} terminal nodes and no yield",
            terminals.len()
        )));
    }

    if let Some(&t) = terminals.first() {
        return Err(ExecError::Compile(format!(
            "terminal node {} ({}) is not a yield",
            nodes[t].id, nodes[t].kind
        )));
    }

    let mut names = HashSet::new();
    for n in nodes.iter() {
        if let NodeRole::Yield(name) = &n.role {
            if !n.outputs.is_empty() {
                return Err(ExecError::Compile(format!(
                    "yield {} ('{name}') must be terminal",
                    n.id
                )));
            }
            if !names.insert(name.clone()) {
                return Err(ExecError::Compile(format!("duplicate result name '{name}'")));
            }
        }
    }
    Ok(())
}
