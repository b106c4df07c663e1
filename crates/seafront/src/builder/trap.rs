//! Lazily shared trap blocks.
//!
//! Emitting a full runtime-throw call at every trap site would bloat the
//! graph, so the builder keeps one trap block per reason per function. The
//! first site for a reason materializes a `Merge(1)` + `EffectPhi(1)` pair
//! ending in the runtime-throw (or a sentinel return when no module context
//! is attached); every later site widens both joins by one input. These are
//! the only variadic control joins that grow after construction, besides
//! loop back-edges.

use seafront_graph::{BranchHint, CallDescriptor, CallKind, NodeId, Operator};

use super::GraphBuilder;

/// Runtime reasons compiled code can trap for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapReason {
    Unreachable,
    MemOutOfBounds,
    DivByZero,
    DivUnrepresentable,
    RemByZero,
    FloatUnrepresentable,
    FuncInvalid,
    FuncSigMismatch,
}

pub(super) const TRAP_COUNT: usize = 8;

impl TrapReason {
    /// Diagnostic string passed to the runtime throw.
    pub fn message(self) -> &'static str {
        match self {
            TrapReason::Unreachable => "unreachable",
            TrapReason::MemOutOfBounds => "memory access out of bounds",
            TrapReason::DivByZero => "divide by zero",
            TrapReason::DivUnrepresentable => "divide result unrepresentable",
            TrapReason::RemByZero => "remainder by zero",
            TrapReason::FloatUnrepresentable => "integer result unrepresentable",
            TrapReason::FuncInvalid => "invalid function",
            TrapReason::FuncSigMismatch => "function signature mismatch",
        }
    }

    pub(super) fn index(self) -> usize {
        self as usize
    }
}

/// Per-function cache of materialized trap blocks.
///
/// A reason is either uninitialized (`None`) or materialized; later sites
/// only ever widen the existing joins.
#[derive(Debug, Default)]
pub(super) struct TrapBank {
    /// The `Merge` heading each reason's trap block.
    pub(super) traps: [Option<NodeId>; TRAP_COUNT],
    /// The matching `EffectPhi`.
    pub(super) effects: [Option<NodeId>; TRAP_COUNT],
}

impl GraphBuilder<'_> {
    /// Make the current control path trap unconditionally.
    pub fn unreachable(&mut self) {
        self.connect_trap(TrapReason::Unreachable);
    }

    /// Trap if `node` is zero (i32).
    ///
    /// Returns the surviving control node, which dominates the checked
    /// operation.
    pub fn zero_check32(&mut self, reason: TrapReason, node: NodeId) -> NodeId {
        self.trap_if_eq32(reason, node, 0)
    }

    /// Trap if `node` is zero (i64).
    pub fn zero_check64(&mut self, reason: TrapReason, node: NodeId) -> NodeId {
        self.trap_if_eq64(reason, node, 0)
    }

    /// Trap if `node` equals `val` (i32). A constant `node` known to differ
    /// from `val` elides the check.
    pub fn trap_if_eq32(&mut self, reason: TrapReason, node: NodeId, val: i32) -> NodeId {
        if let Operator::Int32Constant(k) = *self.graph.op(node) {
            if k != val {
                return self.control();
            }
        }
        if val == 0 {
            self.trap_if_false(reason, node);
        } else {
            let rhs = self.int32_constant(val);
            let cond = self.graph.new_node(Operator::Word32Equal, &[node, rhs]);
            self.trap_if_true(reason, cond);
        }
        self.control()
    }

    /// Trap if `node` equals `val` (i64).
    pub fn trap_if_eq64(&mut self, reason: TrapReason, node: NodeId, val: i64) -> NodeId {
        if let Operator::Int64Constant(k) = *self.graph.op(node) {
            if k != val {
                return self.control();
            }
        }
        let rhs = self.int64_constant(val);
        let cond = self.graph.new_node(Operator::Word64Equal, &[node, rhs]);
        self.trap_if_true(reason, cond);
        self.control()
    }

    /// Trap when `cond` is true.
    pub fn trap_if_true(&mut self, reason: TrapReason, cond: NodeId) {
        self.add_trap_if(reason, cond, true);
    }

    /// Trap when `cond` is false.
    pub fn trap_if_false(&mut self, reason: TrapReason, cond: NodeId) {
        self.add_trap_if(reason, cond, false);
    }

    /// Branch at the current control; one side joins the trap block for
    /// `reason`, the other becomes the new current control with the effect
    /// restored to its pre-branch value.
    fn add_trap_if(&mut self, reason: TrapReason, cond: NodeId, iftrue_means_trap: bool) {
        let before_effect = self.effect();
        let hint = if iftrue_means_trap {
            BranchHint::False
        } else {
            BranchHint::True
        };
        let control = self.control();
        let branch = self
            .graph
            .new_node(Operator::Branch { hint }, &[cond, control]);
        let if_true = self.graph.new_node(Operator::IfTrue, &[branch]);
        let if_false = self.graph.new_node(Operator::IfFalse, &[branch]);

        let (trap_side, live_side) = if iftrue_means_trap {
            (if_true, if_false)
        } else {
            (if_false, if_true)
        };
        self.set_control(trap_side);
        self.connect_trap(reason);
        self.set_control(live_side);
        self.set_effect(before_effect);
    }

    /// Route the current control and effect into the trap block for
    /// `reason`, materializing it on first use.
    fn connect_trap(&mut self, reason: TrapReason) {
        let r = reason.index();
        match self.trap.traps[r] {
            None => self.build_trap_code(reason),
            Some(merge) => {
                let ephi = self.trap.effects[r].expect("materialized trap has an effect phi");
                let control = self.control();
                let effect = self.effect();
                self.graph.append_merge_input(merge, control);
                self.graph.append_phi_input(ephi, effect);
            }
        }
    }

    /// Build the shared trap code for `reason`: merge + effect phi, a
    /// runtime-throw call when a module context is attached, then a return
    /// of the sentinel word so the graph stays terminated either way.
    fn build_trap_code(&mut self, reason: TrapReason) {
        let r = reason.index();
        let exception = self
            .graph
            .new_node(Operator::StringConstant(reason.message()), &[]);

        let control = self.control();
        let effect = self.effect();
        let merge = self
            .graph
            .new_node(Operator::Merge { count: 1 }, &[control]);
        let ephi = self
            .graph
            .new_node(Operator::EffectPhi { count: 1 }, &[effect, merge]);
        self.trap.traps[r] = Some(merge);
        self.trap.effects[r] = Some(ephi);
        self.set_control(merge);
        self.set_effect(ephi);

        if let Some(context) = self.module.and_then(|m| m.context) {
            // Call the runtime to throw; the call ends the effect chain and
            // control of the trap block.
            let context = self.graph.new_node(Operator::HeapConstant(context.0), &[]);
            let effect = self.effect();
            let control = self.control();
            let call = self.graph.new_node(
                Operator::Call(CallDescriptor {
                    kind: CallKind::Runtime,
                    param_count: 2,
                    return_count: 0,
                }),
                &[exception, context, effect, control],
            );
            self.set_control(call);
            self.set_effect(call);
        }

        // Returning 0xdeadbeef keeps the graph well-formed in
        // verification-only setups where no runtime call is possible.
        let sentinel = self.int32_constant(0xdeadbeefu32 as i32);
        self.ret(&[sentinel]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::GraphBuilder;
    use crate::env::{HeapHandle, ModuleEnv};
    use crate::opcodes::MachineConfig;
    use seafront_graph::Graph;

    fn builder_fixture(graph: &mut Graph) -> GraphBuilder<'_> {
        let mut b = GraphBuilder::new(graph, None, MachineConfig::default());
        b.start(0);
        b
    }

    #[test]
    fn first_site_materializes_trap_block() {
        let mut graph = Graph::new();
        let mut b = builder_fixture(&mut graph);
        let cond = b.int32_constant(1);
        b.trap_if_true(TrapReason::DivByZero, cond);
        drop(b);

        let census = graph.operator_census();
        assert_eq!(census["Merge"], 1);
        assert_eq!(census["EffectPhi"], 1);
        assert_eq!(census["StringConstant"], 1);
        assert_eq!(census["Return"], 1);
        // No module context: the trap block must not call the runtime.
        assert!(!census.contains_key("Call"));
    }

    #[test]
    fn later_sites_widen_the_same_block() {
        let mut graph = Graph::new();
        let mut b = builder_fixture(&mut graph);
        let cond = b.int32_constant(1);
        b.trap_if_true(TrapReason::DivByZero, cond);
        b.trap_if_true(TrapReason::DivByZero, cond);
        b.trap_if_true(TrapReason::DivByZero, cond);

        let merge = b.trap.traps[TrapReason::DivByZero.index()].unwrap();
        let ephi = b.trap.effects[TrapReason::DivByZero.index()].unwrap();
        drop(b);

        assert_eq!(*graph.op(merge), Operator::Merge { count: 3 });
        assert_eq!(*graph.op(ephi), Operator::EffectPhi { count: 3 });
        // Still a single trap block.
        assert_eq!(graph.operator_census()["Return"], 1);
    }

    #[test]
    fn distinct_reasons_get_distinct_blocks() {
        let mut graph = Graph::new();
        let mut b = builder_fixture(&mut graph);
        let cond = b.int32_constant(1);
        b.trap_if_true(TrapReason::DivByZero, cond);
        b.trap_if_true(TrapReason::MemOutOfBounds, cond);
        drop(b);

        let census = graph.operator_census();
        assert_eq!(census["Merge"], 2);
        assert_eq!(census["EffectPhi"], 2);
        assert_eq!(census["Return"], 2);
    }

    #[test]
    fn module_context_adds_runtime_call() {
        let module = ModuleEnv {
            context: Some(HeapHandle(3)),
            ..Default::default()
        };
        let mut graph = Graph::new();
        let mut b = GraphBuilder::new(&mut graph, Some(&module), MachineConfig::default());
        b.start(0);
        let cond = b.int32_constant(1);
        b.trap_if_true(TrapReason::FuncInvalid, cond);
        drop(b);

        let census = graph.operator_census();
        assert_eq!(census["Call"], 1);
        assert_eq!(census["HeapConstant"], 1);
        // The sentinel return still terminates the trap block.
        assert_eq!(census["Return"], 1);
    }

    #[test]
    fn constant_known_nonequal_elides_check() {
        let mut graph = Graph::new();
        let mut b = builder_fixture(&mut graph);
        let divisor = b.int32_constant(10);
        let before = graph_nodes(&b);
        let control = b.trap_if_eq32(TrapReason::DivByZero, divisor, 0);
        assert_eq!(control, b.control());
        assert_eq!(graph_nodes(&b), before, "no nodes for an elided check");
    }

    #[test]
    fn constant_equal_still_builds_trap() {
        let mut graph = Graph::new();
        let mut b = builder_fixture(&mut graph);
        let divisor = b.int32_constant(0);
        b.trap_if_eq32(TrapReason::DivByZero, divisor, 0);
        drop(b);
        assert_eq!(graph.operator_census()["Merge"], 1);
    }

    #[test]
    fn unreachable_routes_into_trap_block() {
        let mut graph = Graph::new();
        let mut b = builder_fixture(&mut graph);
        b.unreachable();
        drop(b);
        let census = graph.operator_census();
        assert_eq!(census["Merge"], 1);
        assert_eq!(census["StringConstant"], 1);
    }

    fn graph_nodes(b: &GraphBuilder<'_>) -> usize {
        b.graph_ref().node_count()
    }
}
