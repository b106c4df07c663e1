//! Graph builder: constructs sea-of-nodes IR under direction of the
//! decoder.
//!
//! The builder owns the construction cursor — the current *control* node
//! and the current *effect* node — plus per-function caches (memory base,
//! memory size, function table constants, trap blocks). The decoder drives
//! it one production at a time and never touches the graph directly; the
//! builder never parses bytes.
//!
//! Division and remainder insert their trap checks here, not in the
//! decoder: a decoded function always compiles, and traps are runtime
//! control flow (branches into the shared trap blocks).

mod lowering;
mod trap;

pub use trap::TrapReason;

use seafront_graph::{
    BranchHint, CallDescriptor, CallKind, Graph, MachineType, NodeId, Operator,
};

use crate::env::{FunctionSig, ModuleEnv};
use crate::opcodes::{LocalType, MachineConfig, MemType, Opcode, OpcodeSupport};
use trap::TrapBank;

/// Builder over one function's graph.
pub struct GraphBuilder<'a> {
    graph: &'a mut Graph,
    module: Option<&'a ModuleEnv>,
    config: MachineConfig,
    control: Option<NodeId>,
    effect: Option<NodeId>,
    mem_buffer: Option<NodeId>,
    mem_size: Option<NodeId>,
    function_table: Option<NodeId>,
    trap: TrapBank,
}

impl<'a> GraphBuilder<'a> {
    pub fn new(
        graph: &'a mut Graph,
        module: Option<&'a ModuleEnv>,
        config: MachineConfig,
    ) -> Self {
        Self {
            graph,
            module,
            config,
            control: None,
            effect: None,
            mem_buffer: None,
            mem_size: None,
            function_table: None,
            trap: TrapBank::default(),
        }
    }

    // ── Cursor ───────────────────────────────────────────────────────────

    pub fn control(&self) -> NodeId {
        self.control.expect("builder invoked with no live control")
    }

    pub fn effect(&self) -> NodeId {
        self.effect.expect("builder invoked with no live effect")
    }

    pub fn set_control(&mut self, control: NodeId) {
        self.control = Some(control);
    }

    pub fn set_effect(&mut self, effect: NodeId) {
        self.effect = Some(effect);
    }

    pub fn graph_ref(&self) -> &Graph {
        self.graph
    }

    /// Allocate a pure node (no effect/control inputs).
    fn new_pure(&mut self, op: Operator, inputs: &[NodeId]) -> NodeId {
        self.graph.new_node(op, inputs)
    }

    pub fn config(&self) -> &MachineConfig {
        &self.config
    }

    // ── Function skeleton ────────────────────────────────────────────────

    /// Create the Start node and point both cursors at it.
    pub fn start(&mut self, params: u32) -> NodeId {
        let start = self.graph.new_node(Operator::Start { params }, &[]);
        self.graph.set_start(start);
        self.control = Some(start);
        self.effect = Some(start);
        start
    }

    /// Parameter token `index`, rooted at Start.
    pub fn param(&mut self, index: u32) -> NodeId {
        let start = self.graph.start().expect("start() not called");
        self.graph
            .new_node(Operator::Parameter { index }, &[start])
    }

    // ── Constants ────────────────────────────────────────────────────────

    pub fn int32_constant(&mut self, value: i32) -> NodeId {
        self.graph.new_node(Operator::Int32Constant(value), &[])
    }

    pub fn int64_constant(&mut self, value: i64) -> NodeId {
        self.graph.new_node(Operator::Int64Constant(value), &[])
    }

    pub fn float32_constant(&mut self, value: f32) -> NodeId {
        self.graph
            .new_node(Operator::Float32Constant(value.to_bits()), &[])
    }

    pub fn float64_constant(&mut self, value: f64) -> NodeId {
        self.graph
            .new_node(Operator::Float64Constant(value.to_bits()), &[])
    }

    pub fn intptr_constant(&mut self, value: u64) -> NodeId {
        self.graph.new_node(Operator::IntPtrConstant(value), &[])
    }

    /// The zero value of a local's type (local initialization, void
    /// returns).
    pub fn zero_constant(&mut self, ty: LocalType) -> NodeId {
        match ty {
            LocalType::I32 => self.int32_constant(0),
            LocalType::I64 => self.int64_constant(0),
            LocalType::F32 => self.float32_constant(0.0),
            LocalType::F64 => self.float64_constant(0.0),
            LocalType::Stmt | LocalType::End => unreachable!("no zero value for {ty}"),
        }
    }

    // ── Control primitives ───────────────────────────────────────────────

    /// Branch on `cond` at the current control. Returns the
    /// (if-true, if-false) projections; the caller decides which becomes
    /// the current control.
    pub fn branch(&mut self, cond: NodeId) -> (NodeId, NodeId) {
        let control = self.control();
        let branch = self.graph.new_node(
            Operator::Branch {
                hint: BranchHint::None,
            },
            &[cond, control],
        );
        let if_true = self.graph.new_node(Operator::IfTrue, &[branch]);
        let if_false = self.graph.new_node(Operator::IfFalse, &[branch]);
        (if_true, if_false)
    }

    /// Multi-way dispatch on `key` with `count` successors (cases plus
    /// default). Fan out with [`if_value`](Self::if_value) and
    /// [`if_default`](Self::if_default).
    pub fn switch_(&mut self, count: u32, key: NodeId) -> NodeId {
        let control = self.control();
        self.graph
            .new_node(Operator::Switch { count }, &[key, control])
    }

    pub fn if_value(&mut self, value: i32, sw: NodeId) -> NodeId {
        debug_assert!(matches!(self.graph.op(sw), Operator::Switch { .. }));
        self.graph.new_node(Operator::IfValue { value }, &[sw])
    }

    pub fn if_default(&mut self, sw: NodeId) -> NodeId {
        debug_assert!(matches!(self.graph.op(sw), Operator::Switch { .. }));
        self.graph.new_node(Operator::IfDefault, &[sw])
    }

    pub fn merge(&mut self, controls: &[NodeId]) -> NodeId {
        self.graph.new_node(
            Operator::Merge {
                count: controls.len() as u32,
            },
            controls,
        )
    }

    /// Loop header with a single entry edge; back-edges are appended later
    /// through [`append_to_merge`](Self::append_to_merge).
    pub fn loop_(&mut self, entry: NodeId) -> NodeId {
        self.graph.new_node(Operator::Loop { count: 1 }, &[entry])
    }

    pub fn phi(&mut self, ty: LocalType, vals: &[NodeId], control: NodeId) -> NodeId {
        debug_assert!(self.is_merge(control));
        let mut inputs = vals.to_vec();
        inputs.push(control);
        self.graph.new_node(
            Operator::Phi {
                rep: ty.machine_type(),
                count: vals.len() as u32,
            },
            &inputs,
        )
    }

    pub fn effect_phi(&mut self, effects: &[NodeId], control: NodeId) -> NodeId {
        debug_assert!(self.is_merge(control));
        let mut inputs = effects.to_vec();
        inputs.push(control);
        self.graph.new_node(
            Operator::EffectPhi {
                count: effects.len() as u32,
            },
            &inputs,
        )
    }

    /// Whether `phi` is a (value or effect) phi anchored at `merge`.
    pub fn is_phi_with_merge(&self, phi: NodeId, merge: NodeId) -> bool {
        matches!(
            self.graph.op(phi),
            Operator::Phi { .. } | Operator::EffectPhi { .. }
        ) && self.graph.inputs(phi).last() == Some(&merge)
    }

    pub fn append_to_merge(&mut self, merge: NodeId, from: NodeId) {
        self.graph.append_merge_input(merge, from);
    }

    pub fn append_to_phi(&mut self, phi: NodeId, from: NodeId) {
        self.graph.append_phi_input(phi, from);
    }

    fn is_merge(&self, node: NodeId) -> bool {
        matches!(
            self.graph.op(node),
            Operator::Merge { .. } | Operator::Loop { .. }
        )
    }

    /// Return `vals` (a void return yields the zero word), appending the
    /// effect and control inputs and merging into End.
    pub fn ret(&mut self, vals: &[NodeId]) -> NodeId {
        let mut inputs = if vals.is_empty() {
            vec![self.int32_constant(0)]
        } else {
            vals.to_vec()
        };
        inputs.push(self.effect());
        inputs.push(self.control());
        let ret = self.graph.new_node(Operator::Return, &inputs);
        self.graph.merge_control_to_end(ret);
        ret
    }

    pub fn return_void(&mut self) -> NodeId {
        self.ret(&[])
    }

    /// Terminate a non-exiting loop so End stays reachable from it.
    pub fn terminate(&mut self, effect: NodeId, control: NodeId) -> NodeId {
        let terminate = self
            .graph
            .new_node(Operator::Terminate, &[effect, control]);
        self.graph.merge_control_to_end(terminate);
        terminate
    }

    // ── Operator dispatch ────────────────────────────────────────────────

    /// Emit a binary operation. Trap checks for division/remainder and
    /// lowering for target-absent operators happen here; the opcode table
    /// decides which (its support classification is authoritative).
    pub fn binop(&mut self, opcode: Opcode, left: NodeId, right: NodeId) -> NodeId {
        use Opcode::*;
        let op = match opcode {
            I32Add => Operator::Int32Add,
            I32Sub => Operator::Int32Sub,
            I32Mul => Operator::Int32Mul,
            I32DivS => return self.build_i32_div_s(left, right),
            I32DivU => {
                let control = self.zero_check32(TrapReason::DivByZero, right);
                return self
                    .graph
                    .new_node(Operator::Uint32Div, &[left, right, control]);
            }
            I32RemS => return self.build_i32_rem_s(left, right),
            I32RemU => {
                let control = self.zero_check32(TrapReason::RemByZero, right);
                return self
                    .graph
                    .new_node(Operator::Uint32Mod, &[left, right, control]);
            }
            I32And => Operator::Word32And,
            I32Ior => Operator::Word32Or,
            I32Xor => Operator::Word32Xor,
            I32Shl => Operator::Word32Shl,
            I32ShrU => Operator::Word32Shr,
            I32ShrS => Operator::Word32Sar,
            I32Eq => Operator::Word32Equal,
            I32Ne => {
                let eq = self.binop(I32Eq, left, right);
                return self.invert(eq);
            }
            I32LtS => Operator::Int32LessThan,
            I32LeS => Operator::Int32LessThanOrEqual,
            I32LtU => Operator::Uint32LessThan,
            I32LeU => Operator::Uint32LessThanOrEqual,
            // Greater-than forms are the mirrored less-than operators.
            I32GtS => return self.graph.new_node(Operator::Int32LessThan, &[right, left]),
            I32GeS => {
                return self
                    .graph
                    .new_node(Operator::Int32LessThanOrEqual, &[right, left])
            }
            I32GtU => return self.graph.new_node(Operator::Uint32LessThan, &[right, left]),
            I32GeU => {
                return self
                    .graph
                    .new_node(Operator::Uint32LessThanOrEqual, &[right, left])
            }

            I64Add => Operator::Int64Add,
            I64Sub => Operator::Int64Sub,
            I64Mul => Operator::Int64Mul,
            I64DivS => return self.build_i64_div_s(left, right),
            I64DivU => {
                let control = self.zero_check64(TrapReason::DivByZero, right);
                return self
                    .graph
                    .new_node(Operator::Uint64Div, &[left, right, control]);
            }
            I64RemS => return self.build_i64_rem_s(left, right),
            I64RemU => {
                let control = self.zero_check64(TrapReason::RemByZero, right);
                return self
                    .graph
                    .new_node(Operator::Uint64Mod, &[left, right, control]);
            }
            I64And => Operator::Word64And,
            I64Ior => Operator::Word64Or,
            I64Xor => Operator::Word64Xor,
            I64Shl => Operator::Word64Shl,
            I64ShrU => Operator::Word64Shr,
            I64ShrS => Operator::Word64Sar,
            I64Eq => Operator::Word64Equal,
            I64Ne => {
                let eq = self.binop(I64Eq, left, right);
                return self.invert(eq);
            }
            I64LtS => Operator::Int64LessThan,
            I64LeS => Operator::Int64LessThanOrEqual,
            I64LtU => Operator::Uint64LessThan,
            I64LeU => Operator::Uint64LessThanOrEqual,
            I64GtS => return self.graph.new_node(Operator::Int64LessThan, &[right, left]),
            I64GeS => {
                return self
                    .graph
                    .new_node(Operator::Int64LessThanOrEqual, &[right, left])
            }
            I64GtU => return self.graph.new_node(Operator::Uint64LessThan, &[right, left]),
            I64GeU => {
                return self
                    .graph
                    .new_node(Operator::Uint64LessThanOrEqual, &[right, left])
            }

            F32CopySign => return self.make_f32_copysign(left, right),
            F64CopySign => return self.make_f64_copysign(left, right),
            F32Add => Operator::Float32Add,
            F32Sub => Operator::Float32Sub,
            F32Mul => Operator::Float32Mul,
            F32Div => Operator::Float32Div,
            F32Eq => Operator::Float32Equal,
            F32Ne => {
                let eq = self.binop(F32Eq, left, right);
                return self.invert(eq);
            }
            F32Lt => Operator::Float32LessThan,
            F32Le => Operator::Float32LessThanOrEqual,
            F32Gt => {
                return self
                    .graph
                    .new_node(Operator::Float32LessThan, &[right, left])
            }
            F32Ge => {
                return self
                    .graph
                    .new_node(Operator::Float32LessThanOrEqual, &[right, left])
            }
            F32Min => self.native_only(opcode, Operator::Float32Min),
            F32Max => self.native_only(opcode, Operator::Float32Max),

            F64Add => Operator::Float64Add,
            F64Sub => Operator::Float64Sub,
            F64Mul => Operator::Float64Mul,
            F64Div => Operator::Float64Div,
            F64Eq => Operator::Float64Equal,
            F64Ne => {
                let eq = self.binop(F64Eq, left, right);
                return self.invert(eq);
            }
            F64Lt => Operator::Float64LessThan,
            F64Le => Operator::Float64LessThanOrEqual,
            F64Gt => {
                return self
                    .graph
                    .new_node(Operator::Float64LessThan, &[right, left])
            }
            F64Ge => {
                return self
                    .graph
                    .new_node(Operator::Float64LessThanOrEqual, &[right, left])
            }
            F64Min => self.native_only(opcode, Operator::Float64Min),
            F64Max => self.native_only(opcode, Operator::Float64Max),

            _ => panic!("binop: unsupported opcode {}", opcode.mnemonic()),
        };
        self.graph.new_node(op, &[left, right])
    }

    /// Emit a unary operation; same contract as [`binop`](Self::binop).
    pub fn unop(&mut self, opcode: Opcode, input: NodeId) -> NodeId {
        use Opcode::*;
        let op = match opcode {
            BoolNot => {
                let zero = self.int32_constant(0);
                return self.graph.new_node(Operator::Word32Equal, &[input, zero]);
            }
            F32Abs => Operator::Float32Abs,
            F32Neg => {
                let zero = self.float32_constant(0.0);
                return self.graph.new_node(Operator::Float32Sub, &[zero, input]);
            }
            F32Sqrt => Operator::Float32Sqrt,
            F64Abs => Operator::Float64Abs,
            F64Neg => {
                let zero = self.float64_constant(0.0);
                return self.graph.new_node(Operator::Float64Sub, &[zero, input]);
            }
            F64Sqrt => Operator::Float64Sqrt,

            I32SConvertF64 => Operator::ChangeFloat64ToInt32,
            I32UConvertF64 => Operator::ChangeFloat64ToUint32,
            F32ConvertF64 => Operator::TruncateFloat64ToFloat32,
            F64SConvertI32 => Operator::ChangeInt32ToFloat64,
            F64UConvertI32 => Operator::ChangeUint32ToFloat64,
            F64ConvertF32 => Operator::ChangeFloat32ToFloat64,
            // float32 ↔ int has no direct machine form; round-trip through
            // float64.
            F32SConvertI32 => {
                let wide = self
                    .graph
                    .new_node(Operator::ChangeInt32ToFloat64, &[input]);
                return self
                    .graph
                    .new_node(Operator::TruncateFloat64ToFloat32, &[wide]);
            }
            F32UConvertI32 => {
                let wide = self
                    .graph
                    .new_node(Operator::ChangeUint32ToFloat64, &[input]);
                return self
                    .graph
                    .new_node(Operator::TruncateFloat64ToFloat32, &[wide]);
            }
            I32SConvertF32 => {
                let wide = self
                    .graph
                    .new_node(Operator::ChangeFloat32ToFloat64, &[input]);
                return self
                    .graph
                    .new_node(Operator::ChangeFloat64ToInt32, &[wide]);
            }
            I32UConvertF32 => {
                let wide = self
                    .graph
                    .new_node(Operator::ChangeFloat32ToFloat64, &[input]);
                return self
                    .graph
                    .new_node(Operator::ChangeFloat64ToUint32, &[wide]);
            }

            F32ReinterpretI32 => Operator::BitcastInt32ToFloat32,
            I32ReinterpretF32 => Operator::BitcastFloat32ToInt32,

            I32Clz => Operator::Word32Clz,
            I32Ctz => {
                if self.config.word32_ctz {
                    Operator::Word32Ctz
                } else {
                    return self.make_i32_ctz(input);
                }
            }
            I32Popcnt => {
                if self.config.word32_popcnt {
                    Operator::Word32Popcnt
                } else {
                    return self.make_i32_popcnt(input);
                }
            }

            F32Floor => self.native_only(opcode, Operator::Float32RoundDown),
            F32Ceil => self.native_only(opcode, Operator::Float32RoundUp),
            F32Trunc => self.native_only(opcode, Operator::Float32RoundTruncate),
            F32NearestInt => self.native_only(opcode, Operator::Float32RoundTiesEven),
            F64Floor => self.native_only(opcode, Operator::Float64RoundDown),
            F64Ceil => self.native_only(opcode, Operator::Float64RoundUp),
            F64Trunc => self.native_only(opcode, Operator::Float64RoundTruncate),
            F64NearestInt => self.native_only(opcode, Operator::Float64RoundTiesEven),

            I32ConvertI64 => Operator::TruncateInt64ToInt32,
            I64SConvertI32 => Operator::ChangeInt32ToInt64,
            I64UConvertI32 => Operator::ChangeUint32ToUint64,
            F32SConvertI64 => Operator::RoundInt64ToFloat32,
            F32UConvertI64 => Operator::RoundUint64ToFloat32,
            F64SConvertI64 => Operator::RoundInt64ToFloat64,
            F64UConvertI64 => Operator::RoundUint64ToFloat64,
            F64ReinterpretI64 => Operator::BitcastInt64ToFloat64,
            I64ReinterpretF64 => Operator::BitcastFloat64ToInt64,
            I64Clz => Operator::Word64Clz,
            I64Ctz => {
                if self.config.word64_ctz {
                    Operator::Word64Ctz
                } else {
                    return self.make_i64_ctz(input);
                }
            }
            I64Popcnt => {
                if self.config.word64_popcnt {
                    Operator::Word64Popcnt
                } else {
                    return self.make_i64_popcnt(input);
                }
            }
            _ => panic!("unop: unsupported opcode {}", opcode.mnemonic()),
        };
        self.graph.new_node(op, &[input])
    }

    /// Boolean inversion (`x == 0`).
    pub fn invert(&mut self, node: NodeId) -> NodeId {
        self.unop(Opcode::BoolNot, node)
    }

    /// The opcode table promised this operator is native on the configured
    /// target; a mismatch here is a table/builder contract violation.
    fn native_only(&self, opcode: Opcode, op: Operator) -> Operator {
        assert_eq!(
            opcode.support(&self.config),
            OpcodeSupport::Native,
            "opcode {} reported as supported but has no native operator",
            opcode.mnemonic()
        );
        op
    }

    // ── Integer division with trap checks ────────────────────────────────

    fn build_i32_div_s(&mut self, left: NodeId, right: NodeId) -> NodeId {
        self.zero_check32(TrapReason::DivByZero, right);
        // INT_MIN / -1 overflows: branch on divisor == -1 and trap-check
        // the dividend on that path only.
        let before = self.control();
        let m1 = self.int32_constant(-1);
        let denom_is_m1_cond = self.graph.new_node(Operator::Word32Equal, &[right, m1]);
        let (denom_is_m1, denom_is_not_m1) = self.branch(denom_is_m1_cond);
        self.set_control(denom_is_m1);
        self.trap_if_eq32(TrapReason::DivUnrepresentable, left, i32::MIN);
        if self.control() != denom_is_m1 {
            let merged = self.merge(&[denom_is_not_m1, self.control()]);
            self.set_control(merged);
        } else {
            self.set_control(before);
        }
        let control = self.control();
        self.graph
            .new_node(Operator::Int32Div, &[left, right, control])
    }

    fn build_i64_div_s(&mut self, left: NodeId, right: NodeId) -> NodeId {
        self.zero_check64(TrapReason::DivByZero, right);
        let before = self.control();
        let m1 = self.int64_constant(-1);
        let denom_is_m1_cond = self.graph.new_node(Operator::Word64Equal, &[right, m1]);
        let (denom_is_m1, denom_is_not_m1) = self.branch(denom_is_m1_cond);
        self.set_control(denom_is_m1);
        self.trap_if_eq64(TrapReason::DivUnrepresentable, left, i64::MIN);
        if self.control() != denom_is_m1 {
            let merged = self.merge(&[denom_is_not_m1, self.control()]);
            self.set_control(merged);
        } else {
            self.set_control(before);
        }
        let control = self.control();
        self.graph
            .new_node(Operator::Int64Div, &[left, right, control])
    }

    /// Signed remainder: remainder by −1 is 0 without dividing, so the
    /// modulo sits on the not-−1 side of a diamond and a phi selects.
    fn build_i32_rem_s(&mut self, left: NodeId, right: NodeId) -> NodeId {
        self.zero_check32(TrapReason::RemByZero, right);
        let m1 = self.int32_constant(-1);
        let cond = self.graph.new_node(Operator::Word32Equal, &[right, m1]);
        let d = self.diamond(cond);
        let rem = self
            .graph
            .new_node(Operator::Int32Mod, &[left, right, d.if_false]);
        let zero = self.int32_constant(0);
        self.diamond_phi(&d, MachineType::Int32, zero, rem)
    }

    fn build_i64_rem_s(&mut self, left: NodeId, right: NodeId) -> NodeId {
        self.zero_check64(TrapReason::RemByZero, right);
        let m1 = self.int64_constant(-1);
        let cond = self.graph.new_node(Operator::Word64Equal, &[right, m1]);
        let d = self.diamond(cond);
        let rem = self
            .graph
            .new_node(Operator::Int64Mod, &[left, right, d.if_false]);
        let zero = self.int64_constant(0);
        self.diamond_phi(&d, MachineType::Int64, zero, rem)
    }

    /// A floating two-way diamond anchored at the current control. The
    /// builder's cursor is left untouched; only the value phi escapes.
    fn diamond(&mut self, cond: NodeId) -> Diamond {
        let control = self.control();
        let branch = self.graph.new_node(
            Operator::Branch {
                hint: BranchHint::None,
            },
            &[cond, control],
        );
        let if_true = self.graph.new_node(Operator::IfTrue, &[branch]);
        let if_false = self.graph.new_node(Operator::IfFalse, &[branch]);
        let merge = self
            .graph
            .new_node(Operator::Merge { count: 2 }, &[if_true, if_false]);
        Diamond { if_false, merge }
    }

    fn diamond_phi(
        &mut self,
        d: &Diamond,
        rep: MachineType,
        tval: NodeId,
        fval: NodeId,
    ) -> NodeId {
        self.graph.new_node(
            Operator::Phi { rep, count: 2 },
            &[tval, fval, d.merge],
        )
    }

    // ── Linear memory ────────────────────────────────────────────────────

    fn module_env(&self) -> &'a ModuleEnv {
        self.module
            .expect("memory operation without a module environment")
    }

    /// Cached base-pointer constant, offset folded in when nonzero.
    fn mem_buffer(&mut self, offset: u32) -> NodeId {
        let mem_start = self.module_env().mem_start;
        if offset == 0 {
            match self.mem_buffer {
                Some(node) => node,
                None => {
                    let node = self.intptr_constant(mem_start);
                    self.mem_buffer = Some(node);
                    node
                }
            }
        } else {
            self.intptr_constant(mem_start + u64::from(offset))
        }
    }

    /// Cached memory-size constant, offset folded in when nonzero.
    fn mem_size(&mut self, offset: u32) -> NodeId {
        let size = self.module_env().mem_size() as u32;
        if offset == 0 {
            match self.mem_size {
                Some(node) => node,
                None => {
                    let node = self.int32_constant(size as i32);
                    self.mem_size = Some(node);
                    node
                }
            }
        } else {
            self.int32_constant((size + offset) as i32)
        }
    }

    /// Insert the bounds check dominating a linear-memory access.
    ///
    /// A statically out-of-range `offset` reduces the condition to constant
    /// false: the access always traps, but the check (and with it the trap
    /// branch) still materializes.
    fn bounds_check_mem(&mut self, memtype: MemType, index: NodeId, offset: u32) {
        let size = self.module_env().mem_size();
        let width = u64::from(memtype.size());
        let offset = u64::from(offset);
        let cond = if offset >= size || offset + width > size {
            self.int32_constant(0)
        } else {
            let limit = size - offset - width;
            debug_assert!(limit <= u64::from(u32::MAX));
            let limit = self.int32_constant(limit as u32 as i32);
            self.graph
                .new_node(Operator::Uint32LessThanOrEqual, &[index, limit])
        };
        self.trap_if_false(TrapReason::MemOutOfBounds, cond);
    }

    /// Typed linear-memory load producing a `ty` value.
    ///
    /// Under asm.js semantics the load is checked (out-of-bounds reads
    /// yield zero, no trap); otherwise a bounds check dominates a plain
    /// load. Narrow loads into i64 widen explicitly from 32 bits.
    pub fn load_mem(
        &mut self,
        ty: LocalType,
        memtype: MemType,
        index: NodeId,
        offset: u32,
    ) -> NodeId {
        let asm_js = self.module_env().asm_js;
        let effect = self.effect();
        let mut load = if asm_js {
            debug_assert_eq!(offset, 0, "asm.js accesses carry no static offset");
            let buffer = self.mem_buffer(0);
            let length = self.mem_size(0);
            let control = self.control();
            self.graph.new_node(
                Operator::CheckedLoad(memtype.machine_type()),
                &[buffer, index, length, effect, control],
            )
        } else {
            self.bounds_check_mem(memtype, index, offset);
            let base = self.mem_buffer(offset);
            let control = self.control();
            self.graph.new_node(
                Operator::Load(memtype.machine_type()),
                &[base, index, effect, control],
            )
        };
        self.set_effect(load);

        if ty == LocalType::I64 && memtype.size() < 8 {
            // Sub-word loads produce a 32-bit value; widen per signedness.
            let widen = if memtype.is_signed() {
                Operator::ChangeInt32ToInt64
            } else {
                Operator::ChangeUint32ToUint64
            };
            load = self.graph.new_node(widen, &[load]);
        }
        load
    }

    /// Typed linear-memory store. Same asm.js split as
    /// [`load_mem`](Self::load_mem).
    pub fn store_mem(
        &mut self,
        memtype: MemType,
        index: NodeId,
        offset: u32,
        val: NodeId,
    ) -> NodeId {
        let asm_js = self.module_env().asm_js;
        let effect = self.effect();
        let store = if asm_js {
            debug_assert_eq!(offset, 0, "asm.js accesses carry no static offset");
            let buffer = self.mem_buffer(0);
            let length = self.mem_size(0);
            let control = self.control();
            self.graph.new_node(
                Operator::CheckedStore(memtype.machine_type()),
                &[buffer, index, length, val, effect, control],
            )
        } else {
            self.bounds_check_mem(memtype, index, offset);
            let base = self.mem_buffer(offset);
            let control = self.control();
            self.graph.new_node(
                Operator::Store(memtype.machine_type()),
                &[base, index, val, effect, control],
            )
        };
        self.set_effect(store);
        store
    }

    // ── Globals ──────────────────────────────────────────────────────────

    pub fn load_global(&mut self, index: u32) -> NodeId {
        let module = self.module_env();
        let global = module.globals[index as usize];
        let addr = self.intptr_constant(module.globals_area + u64::from(global.offset));
        let zero = self.int32_constant(0);
        let effect = self.effect();
        let control = self.control();
        let load = self.graph.new_node(
            Operator::Load(global.mem_type.machine_type()),
            &[addr, zero, effect, control],
        );
        self.set_effect(load);
        load
    }

    pub fn store_global(&mut self, index: u32, val: NodeId) -> NodeId {
        let module = self.module_env();
        let global = module.globals[index as usize];
        let addr = self.intptr_constant(module.globals_area + u64::from(global.offset));
        let zero = self.int32_constant(0);
        let effect = self.effect();
        let control = self.control();
        let store = self.graph.new_node(
            Operator::Store(global.mem_type.machine_type()),
            &[addr, zero, val, effect, control],
        );
        self.set_effect(store);
        store
    }

    // ── Calls ────────────────────────────────────────────────────────────

    /// Compose a call node: `[target, args…, effect, control]`. The call
    /// becomes the new effect.
    fn wasm_call(&mut self, sig: &FunctionSig, target: NodeId, args: &[NodeId]) -> NodeId {
        debug_assert_eq!(args.len() as u32, sig.param_count());
        let mut inputs = Vec::with_capacity(args.len() + 3);
        inputs.push(target);
        inputs.extend_from_slice(args);
        inputs.push(self.effect());
        inputs.push(self.control());
        let call = self.graph.new_node(
            Operator::Call(CallDescriptor {
                kind: CallKind::Wasm,
                param_count: args.len() as u32,
                return_count: sig.return_count(),
            }),
            &inputs,
        );
        self.set_effect(call);
        call
    }

    /// Direct call: the callee's code handle is the call target.
    pub fn call_direct(&mut self, index: u32, args: &[NodeId]) -> NodeId {
        let module = self.module_env();
        let code = module
            .code_of(index)
            .expect("call_direct: function index verified by decoder");
        let sig = module
            .signature_of(index)
            .expect("call_direct: function index verified by decoder")
            .clone();
        let target = self.graph.new_node(Operator::CodeConstant(code.0), &[]);
        self.wasm_call(&sig, target, args)
    }

    /// Cached function-table constant.
    fn function_table(&mut self) -> NodeId {
        match self.function_table {
            Some(node) => node,
            None => {
                let table = self
                    .module_env()
                    .function_table
                    .expect("call_indirect: table verified by decoder");
                let node = self
                    .graph
                    .new_node(Operator::HeapConstant(table.handle.0), &[]);
                self.function_table = Some(node);
                node
            }
        }
    }

    /// Indirect call through the function table.
    ///
    /// `key` is bounds-checked against the table size, the table's
    /// signature slot is checked against `sig_index` (tagged as a small
    /// integer), then the code handle is loaded from the upper half of the
    /// table and dispatched like a direct call.
    pub fn call_indirect(&mut self, sig_index: u32, key: NodeId, args: &[NodeId]) -> NodeId {
        let module = self.module_env();
        let table_size = module
            .function_table
            .expect("call_indirect: table verified by decoder")
            .size;
        let sig = module
            .signature_of_table_slot(sig_index)
            .expect("call_indirect: signature index verified by decoder")
            .clone();
        let table = self.function_table();

        // Bounds check the key.
        let size = self.int32_constant(table_size as i32);
        let in_bounds = self.graph.new_node(Operator::Uint32LessThan, &[key, size]);
        self.trap_if_false(TrapReason::FuncInvalid, in_bounds);

        // Table layout: header, then size signature slots (tagged small
        // integers), then size code slots.
        let log2 = self.config.pointer_size_log2();
        let fixed_offset = 2 * self.config.pointer_size();
        let shift = self.int32_constant(log2 as i32);
        let scaled = self.graph.new_node(Operator::Word32Shl, &[key, shift]);

        let sig_offset = self.int32_constant(fixed_offset as i32);
        let sig_index_addr = self
            .graph
            .new_node(Operator::Int32Add, &[scaled, sig_offset]);
        let effect = self.effect();
        let control = self.control();
        let load_sig = self.graph.new_node(
            Operator::Load(MachineType::AnyTagged),
            &[table, sig_index_addr, effect, control],
        );
        let expected = self
            .graph
            .new_node(Operator::SmiConstant(sig_index as i32), &[]);
        let sig_match = self
            .graph
            .new_node(Operator::WordEqual, &[load_sig, expected]);
        self.trap_if_false(TrapReason::FuncSigMismatch, sig_match);

        let code_offset =
            self.int32_constant((fixed_offset + self.config.pointer_size() * table_size) as i32);
        let code_addr = self
            .graph
            .new_node(Operator::Int32Add, &[scaled, code_offset]);
        let effect = self.effect();
        let control = self.control();
        let load_code = self.graph.new_node(
            Operator::Load(MachineType::AnyTagged),
            &[table, code_addr, effect, control],
        );

        self.wasm_call(&sig, load_code, args)
    }
}

/// A two-way control diamond (branch, projections, merge) used for value
/// selection without moving the builder's cursor.
struct Diamond {
    if_false: NodeId,
    merge: NodeId,
}
