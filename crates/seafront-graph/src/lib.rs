//! `seafront-graph` — sea-of-nodes intermediate representation.
//!
//! A graph is a flat arena of nodes. Each node is an operator plus an
//! ordered list of input edges; data, effect, and control are all edges, so
//! basic blocks are implicit. The graph owns a distinguished `Start` node
//! (root of parameters, initial effect and control) and an `End` node that
//! collects every terminator (returns, trap exits, loop terminates).
//!
//! Nodes are append-only: an operator never changes after creation, with one
//! deliberate exception — variadic joins (`Merge`, `Loop`, `Phi`,
//! `EffectPhi`, `End`) grow by one input at a time when a late predecessor
//! is attached, and their operator's count field is bumped in the same step.
//! This is how lazily shared trap blocks and loop back-edges are wired in
//! after the join was first created.

mod operator;

pub use operator::{BranchHint, CallDescriptor, CallKind, MachineType, Operator};

use std::collections::BTreeMap;
use std::fmt;

/// Identifier of a node within its graph's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A single vertex: operator plus ordered input edges.
#[derive(Debug, Clone)]
pub struct Node {
    pub op: Operator,
    pub inputs: Vec<NodeId>,
}

/// Arena of nodes for one function.
#[derive(Debug, Default)]
pub struct Graph {
    nodes: Vec<Node>,
    start: Option<NodeId>,
    end: Option<NodeId>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a new node.
    pub fn new_node(&mut self, op: Operator, inputs: &[NodeId]) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node {
            op,
            inputs: inputs.to_vec(),
        });
        id
    }

    pub fn op(&self, id: NodeId) -> &Operator {
        &self.nodes[id.index()].op
    }

    pub fn inputs(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.index()].inputs
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (NodeId(i as u32), n))
    }

    // ── Start / End ──────────────────────────────────────────────────────

    pub fn set_start(&mut self, id: NodeId) {
        debug_assert!(matches!(self.op(id), Operator::Start { .. }));
        self.start = Some(id);
    }

    pub fn start(&self) -> Option<NodeId> {
        self.start
    }

    pub fn end(&self) -> Option<NodeId> {
        self.end
    }

    /// Route a terminator into `End`, creating `End` on first use.
    pub fn merge_control_to_end(&mut self, terminator: NodeId) {
        match self.end {
            None => {
                let end = self.new_node(Operator::End { count: 1 }, &[terminator]);
                self.end = Some(end);
            }
            Some(end) => {
                let node = &mut self.nodes[end.index()];
                node.inputs.push(terminator);
                let count = node.inputs.len() as u32;
                node.op = Operator::End { count };
            }
        }
    }

    // ── Variadic join growth ─────────────────────────────────────────────

    /// Append a control input to a `Merge` or `Loop`, bumping its count.
    pub fn append_merge_input(&mut self, merge: NodeId, from: NodeId) {
        let node = &mut self.nodes[merge.index()];
        node.inputs.push(from);
        let count = node.inputs.len() as u32;
        match node.op {
            Operator::Merge { .. } => node.op = Operator::Merge { count },
            Operator::Loop { .. } => node.op = Operator::Loop { count },
            ref op => panic!("append_merge_input on non-join operator {}", op),
        }
    }

    /// Append a value (or effect) input to a `Phi`/`EffectPhi`, keeping the
    /// control input last and bumping the count.
    pub fn append_phi_input(&mut self, phi: NodeId, from: NodeId) {
        let node = &mut self.nodes[phi.index()];
        let control_slot = node.inputs.len() - 1;
        node.inputs.insert(control_slot, from);
        let count = node.inputs.len() as u32 - 1;
        match node.op {
            Operator::Phi { rep, .. } => node.op = Operator::Phi { rep, count },
            Operator::EffectPhi { .. } => node.op = Operator::EffectPhi { count },
            ref op => panic!("append_phi_input on non-phi operator {}", op),
        }
    }

    // ── Queries ──────────────────────────────────────────────────────────

    /// Node counts grouped by operator mnemonic. Two graphs decoded from
    /// the same bytes must produce equal censuses.
    pub fn operator_census(&self) -> BTreeMap<&'static str, usize> {
        let mut census = BTreeMap::new();
        for node in &self.nodes {
            *census.entry(node.op.mnemonic()).or_insert(0) += 1;
        }
        census
    }

    /// Walk effect inputs from `from` back to `Start`, returning the chain
    /// (including both endpoints) or `None` if a cycle is hit that does not
    /// pass through a loop-carried `EffectPhi`.
    pub fn effect_chain_acyclic(&self, from: NodeId) -> bool {
        let mut seen = vec![false; self.nodes.len()];
        let mut cur = from;
        loop {
            if seen[cur.index()] {
                // Loop-carried effect phis legitimately close a cycle; any
                // other repeat means a malformed chain.
                return matches!(self.op(cur), Operator::EffectPhi { .. });
            }
            seen[cur.index()] = true;
            let node = &self.nodes[cur.index()];
            let effects = node.op.effect_inputs(&node.inputs);
            match effects.first() {
                None => return true,
                Some(&prev) => cur = prev,
            }
        }
    }
}
