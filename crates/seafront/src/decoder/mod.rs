//! Bytecode decoder / verifier.
//!
//! Walks one function body from a `[start, end)` byte window in a single
//! recursive-descent pass, verifying structure and types while driving the
//! graph builder production by production. The decoder owns the byte
//! cursor; nothing else advances it.
//!
//! Per production the contract is: the cursor advances by exactly the
//! production's length, the builder produces exactly one value (or none for
//! statement productions), and the value's type matches the opcode's
//! declared type. On the first failure the decoder stops and returns the
//! diagnostic; the partially built graph is the caller's to discard.
//!
//! Code after a terminator (`Return`, `Break`, `Continue`, a never-exiting
//! loop) is still decoded and verified, but builds nothing: the SSA
//! environment goes unreachable and every builder call is gated on it.

mod ssa;

use seafront_graph::{Graph, NodeId};
use tracing::debug;

use crate::builder::GraphBuilder;
use crate::env::FunctionEnv;
use crate::error::{DecodeError, DecodeResult, ErrorCode};
use crate::opcodes::{LocalType, MachineConfig, Opcode, OpcodeSupport};
use ssa::SsaEnv;

/// Decode `body` into `graph`, verifying as it goes.
///
/// The graph is left terminated (every path reaches End) on success; on
/// error its contents are unspecified and the caller discards it.
pub fn decode_function_body(
    graph: &mut Graph,
    env: &FunctionEnv<'_>,
    config: MachineConfig,
    body: &[u8],
) -> DecodeResult<()> {
    let mut builder = GraphBuilder::new(graph, env.module, config);

    let param_count = env.sig.param_count();
    builder.start(param_count);
    let total = env.total_locals();
    let mut locals = Vec::with_capacity(total as usize);
    for i in 0..param_count {
        locals.push(builder.param(i));
    }
    // Declared locals are zero-initialized.
    for index in param_count..total {
        let ty = env.local_type(index).expect("index within local layout");
        locals.push(builder.zero_constant(ty));
    }

    debug!(
        body_len = body.len(),
        params = param_count,
        locals = total - param_count,
        "decoding function body"
    );

    let decoder = Decoder {
        data: body,
        pc: 0,
        env,
        builder,
        locals,
        reachable: true,
        blocks: Vec::new(),
    };
    decoder.run()
}

/// A frame on the decoder's control stack, pushed for every compound
/// statement. `break K` resolves to the K-th frame from the top.
struct BlockContext {
    is_loop: bool,
    /// Accumulates every path that exits the construct forward.
    break_env: SsaEnv,
    /// Loop header for back-edges; `None` for non-loops and for loops
    /// entered in dead code.
    header: Option<SsaEnv>,
}

pub(crate) struct Decoder<'a, 'm> {
    data: &'a [u8],
    pc: usize,
    env: &'a FunctionEnv<'m>,
    builder: GraphBuilder<'a>,
    /// Node currently holding each flat local index (current path).
    locals: Vec<NodeId>,
    /// Whether any control path reaches the current cursor.
    reachable: bool,
    blocks: Vec<BlockContext>,
}

impl Decoder<'_, '_> {
    fn run(mut self) -> DecodeResult<()> {
        while self.pc < self.data.len() {
            // Statement position: the value, if any, is discarded.
            self.production()?;
        }
        if self.reachable {
            // Falling off the end (or an empty body) returns void, which
            // the builder renders as a return of the zero word.
            self.builder.return_void();
        }
        Ok(())
    }

    // ── Byte reading ─────────────────────────────────────────────────────

    fn read_u8(&mut self, opcode_pc: usize, opcode: Opcode, what: &str) -> DecodeResult<u8> {
        match self.data.get(self.pc) {
            Some(&byte) => {
                self.pc += 1;
                Ok(byte)
            }
            None => Err(DecodeError::new(
                ErrorCode::Truncated,
                opcode_pc,
                format!("{}: body ends before {what}", opcode.mnemonic()),
            )
            .with_pt(self.pc)),
        }
    }

    fn read_bytes<const N: usize>(
        &mut self,
        opcode_pc: usize,
        opcode: Opcode,
    ) -> DecodeResult<[u8; N]> {
        match self.data.get(self.pc..self.pc + N) {
            Some(slice) => {
                self.pc += N;
                Ok(slice.try_into().expect("slice length checked"))
            }
            None => Err(DecodeError::new(
                ErrorCode::Truncated,
                opcode_pc,
                format!("{}: body ends inside immediate", opcode.mnemonic()),
            )
            .with_pt(self.pc)),
        }
    }

    // ── Typed child productions ──────────────────────────────────────────

    /// Decode a child production that must have exactly type `expected`.
    fn expr(&mut self, parent_pc: usize, expected: LocalType) -> DecodeResult<Option<NodeId>> {
        let child_pc = self.pc;
        let (ty, node) = self.production()?;
        if ty != expected {
            let mnemonic = self
                .data
                .get(child_pc)
                .and_then(|&b| Opcode::from_byte(b))
                .map_or("?", Opcode::mnemonic);
            return Err(DecodeError::new(
                ErrorCode::TypeError,
                child_pc,
                format!("{mnemonic}: expected {expected}, got {ty}"),
            )
            .with_pt(parent_pc));
        }
        Ok(node)
    }

    /// Decode a child production that must have some value type (ternary
    /// arms, whose type is dictated by each other rather than the parent).
    fn expr_value(&mut self, parent_pc: usize) -> DecodeResult<(LocalType, Option<NodeId>)> {
        let child_pc = self.pc;
        let (ty, node) = self.production()?;
        if !ty.is_value() {
            let mnemonic = self
                .data
                .get(child_pc)
                .and_then(|&b| Opcode::from_byte(b))
                .map_or("?", Opcode::mnemonic);
            return Err(DecodeError::new(
                ErrorCode::TypeError,
                child_pc,
                format!("{mnemonic}: expected a value, got {ty}"),
            )
            .with_pt(parent_pc));
        }
        Ok((ty, node))
    }

    /// A value produced by a child while the environment was (and still
    /// is) reachable. Absence is a decoder bug, not an input error.
    fn live_value(node: Option<NodeId>) -> NodeId {
        node.expect("reachable production must have produced a value")
    }

    // ── Production dispatch ──────────────────────────────────────────────

    /// Decode one production and return its type and value.
    ///
    /// Statements yield `(Stmt, None)`; terminators `(End, None)`;
    /// expressions their value type and node (`None` in dead code).
    fn production(&mut self) -> DecodeResult<(LocalType, Option<NodeId>)> {
        let opcode_pc = self.pc;
        let Some(&byte) = self.data.get(self.pc) else {
            return Err(DecodeError::new(
                ErrorCode::Truncated,
                opcode_pc,
                "body ends where a production is required",
            ));
        };
        let Some(opcode) = Opcode::from_byte(byte) else {
            return Err(DecodeError::new(
                ErrorCode::UnknownOpcode,
                opcode_pc,
                format!("unknown opcode 0x{byte:02x}"),
            ));
        };
        self.pc += 1;

        if opcode.support(self.builder.config()) == OpcodeSupport::Unsupported {
            return Err(DecodeError::new(
                ErrorCode::UnsupportedOpcode,
                opcode_pc,
                format!("{}: not supported on this target", opcode.mnemonic()),
            ));
        }

        match opcode {
            Opcode::Nop => Ok((LocalType::Stmt, None)),
            Opcode::If => self.decode_if(opcode_pc),
            Opcode::IfThen => self.decode_if_then(opcode_pc),
            Opcode::Block => self.decode_block(opcode_pc),
            Opcode::Switch | Opcode::SwitchNf => self.decode_switch(opcode_pc, opcode),
            Opcode::Loop => self.decode_loop(opcode_pc),
            Opcode::Continue => self.decode_continue(opcode_pc),
            Opcode::Break => self.decode_break(opcode_pc),
            Opcode::Return => self.decode_return(opcode_pc),

            Opcode::I8Const => {
                let value = self.read_u8(opcode_pc, opcode, "constant byte")? as i8;
                let node = self
                    .reachable
                    .then(|| self.builder.int32_constant(value as i32));
                Ok((LocalType::I32, node))
            }
            Opcode::I32Const => {
                let bytes = self.read_bytes::<4>(opcode_pc, opcode)?;
                let value = i32::from_le_bytes(bytes);
                let node = self.reachable.then(|| self.builder.int32_constant(value));
                Ok((LocalType::I32, node))
            }
            Opcode::I64Const => {
                let bytes = self.read_bytes::<8>(opcode_pc, opcode)?;
                let value = i64::from_le_bytes(bytes);
                let node = self.reachable.then(|| self.builder.int64_constant(value));
                Ok((LocalType::I64, node))
            }
            Opcode::F32Const => {
                let bytes = self.read_bytes::<4>(opcode_pc, opcode)?;
                let value = f32::from_le_bytes(bytes);
                let node = self.reachable.then(|| self.builder.float32_constant(value));
                Ok((LocalType::F32, node))
            }
            Opcode::F64Const => {
                let bytes = self.read_bytes::<8>(opcode_pc, opcode)?;
                let value = f64::from_le_bytes(bytes);
                let node = self.reachable.then(|| self.builder.float64_constant(value));
                Ok((LocalType::F64, node))
            }

            Opcode::GetLocal => {
                let index = self.read_local_index(opcode_pc, opcode)?;
                let ty = self.env.local_type(index).expect("index checked");
                let node = self.reachable.then(|| self.locals[index as usize]);
                Ok((ty, node))
            }
            Opcode::SetLocal => {
                let index = self.read_local_index(opcode_pc, opcode)?;
                let ty = self.env.local_type(index).expect("index checked");
                let value = self.expr(opcode_pc, ty)?;
                if self.reachable {
                    self.locals[index as usize] = Self::live_value(value);
                }
                Ok((ty, value))
            }

            Opcode::LoadGlobal => {
                let index = self.read_global_index(opcode_pc, opcode)?;
                let ty = self.env.module.expect("module checked").globals[index as usize]
                    .mem_type
                    .local_type();
                let node = self.reachable.then(|| self.builder.load_global(index));
                Ok((ty, node))
            }
            Opcode::StoreGlobal => {
                let index = self.read_global_index(opcode_pc, opcode)?;
                let ty = self.env.module.expect("module checked").globals[index as usize]
                    .mem_type
                    .local_type();
                let value = self.expr(opcode_pc, ty)?;
                if self.reachable {
                    let value = Self::live_value(value);
                    self.builder.store_global(index, value);
                }
                Ok((ty, value))
            }

            Opcode::CallFunction => self.decode_call_function(opcode_pc),
            Opcode::CallIndirect => self.decode_call_indirect(opcode_pc),
            Opcode::Ternary => self.decode_ternary(opcode_pc),
            Opcode::Comma => {
                // The left value is evaluated and discarded; the comma has
                // the right child's type.
                self.production()?;
                self.production()
            }

            _ if opcode.is_load() => {
                let memtype = opcode.mem_type().expect("load opcode");
                self.require_memory(opcode_pc, opcode)?;
                let index = self.expr(opcode_pc, LocalType::I32)?;
                let ty = memtype.local_type();
                let node = self.reachable.then(|| {
                    let index = Self::live_value(index);
                    self.builder.load_mem(ty, memtype, index, 0)
                });
                Ok((ty, node))
            }
            _ if opcode.is_store() => {
                let memtype = opcode.mem_type().expect("store opcode");
                self.require_memory(opcode_pc, opcode)?;
                let index = self.expr(opcode_pc, LocalType::I32)?;
                let ty = memtype.local_type();
                let value = self.expr(opcode_pc, ty)?;
                if self.reachable {
                    let index = Self::live_value(index);
                    let value = Self::live_value(value);
                    self.builder.store_mem(memtype, index, 0, value);
                }
                Ok((ty, value))
            }

            _ => self.decode_simple(opcode_pc, opcode),
        }
    }

    /// Simple operators: fixed signature from the opcode table.
    fn decode_simple(
        &mut self,
        opcode_pc: usize,
        opcode: Opcode,
    ) -> DecodeResult<(LocalType, Option<NodeId>)> {
        let sig = opcode.signature().ok_or_else(|| {
            DecodeError::new(
                ErrorCode::InternalError,
                opcode_pc,
                format!("{}: opcode missing from the signature table", opcode.mnemonic()),
            )
        })?;
        match sig.params {
            &[p0] => {
                let input = self.expr(opcode_pc, p0)?;
                let node = self.reachable.then(|| {
                    let input = Self::live_value(input);
                    self.builder.unop(opcode, input)
                });
                Ok((sig.ret, node))
            }
            &[p0, p1] => {
                let left = self.expr(opcode_pc, p0)?;
                let right = self.expr(opcode_pc, p1)?;
                let node = self.reachable.then(|| {
                    let left = Self::live_value(left);
                    let right = Self::live_value(right);
                    self.builder.binop(opcode, left, right)
                });
                Ok((sig.ret, node))
            }
            _ => Err(DecodeError::new(
                ErrorCode::InternalError,
                opcode_pc,
                format!("{}: malformed table signature", opcode.mnemonic()),
            )),
        }
    }

    // ── Control statements ───────────────────────────────────────────────

    fn decode_if(&mut self, opcode_pc: usize) -> DecodeResult<(LocalType, Option<NodeId>)> {
        let cond = self.expr(opcode_pc, LocalType::I32)?;
        if !self.reachable {
            self.production()?;
            return Ok((LocalType::Stmt, None));
        }
        let cond = Self::live_value(cond);
        let (if_true, if_false) = self.builder.branch(cond);
        // The not-taken path joins with the pre-if effect and locals.
        let mut end_env = self.save_env_with_control(if_false);
        self.builder.set_control(if_true);
        self.production()?;
        let from = self.save_env();
        self.goto(from, &mut end_env);
        self.restore_env(end_env);
        Ok((LocalType::Stmt, None))
    }

    fn decode_if_then(&mut self, opcode_pc: usize) -> DecodeResult<(LocalType, Option<NodeId>)> {
        let cond = self.expr(opcode_pc, LocalType::I32)?;
        if !self.reachable {
            self.production()?;
            self.production()?;
            return Ok((LocalType::Stmt, None));
        }
        let cond = Self::live_value(cond);
        let (if_true, if_false) = self.builder.branch(cond);
        let else_env = self.save_env_with_control(if_false);

        self.builder.set_control(if_true);
        self.production()?;
        let then_exit = self.save_env();

        self.restore_env(else_env);
        self.production()?;
        let else_exit = self.save_env();

        let mut end_env = SsaEnv::Unreachable;
        self.goto(then_exit, &mut end_env);
        self.goto(else_exit, &mut end_env);
        self.restore_env(end_env);
        Ok((LocalType::Stmt, None))
    }

    fn decode_block(&mut self, opcode_pc: usize) -> DecodeResult<(LocalType, Option<NodeId>)> {
        let count = self.read_u8(opcode_pc, Opcode::Block, "statement count")?;
        self.blocks.push(BlockContext {
            is_loop: false,
            break_env: SsaEnv::Unreachable,
            header: None,
        });
        for _ in 0..count {
            self.production()?;
        }
        let ctx = self.blocks.pop().expect("own frame");
        let from = self.save_env();
        let mut break_env = ctx.break_env;
        self.goto(from, &mut break_env);
        self.restore_env(break_env);
        Ok((LocalType::Stmt, None))
    }

    fn decode_loop(&mut self, opcode_pc: usize) -> DecodeResult<(LocalType, Option<NodeId>)> {
        let count = self.read_u8(opcode_pc, Opcode::Loop, "statement count")?;
        let header = self.reachable.then(|| self.prepare_loop_header());
        self.blocks.push(BlockContext {
            is_loop: true,
            break_env: SsaEnv::Unreachable,
            header,
        });
        for _ in 0..count {
            self.production()?;
        }
        let ctx = self.blocks.pop().expect("own frame");

        if let Some(mut header) = ctx.header {
            // The end of the body is the implicit back-edge.
            let from = self.save_env();
            self.goto(from, &mut header);

            if ctx.break_env.reachable() {
                self.restore_env(ctx.break_env);
            } else {
                let SsaEnv::Live {
                    control, effect, ..
                } = header
                else {
                    unreachable!("loop header is always live")
                };
                // A loop that cycles (has a back-edge) and never breaks
                // can only be left through the terminate edge; emit it so
                // End stays anchored. A loop whose body always escapes
                // outward never cycles and needs nothing here.
                if self.builder.graph_ref().inputs(control).len() > 1 {
                    self.builder.terminate(effect, control);
                }
                self.reachable = false;
            }
        } else {
            // Loop in dead code; anything breaking out of it is dead too.
            self.restore_env(ctx.break_env);
        }
        Ok((LocalType::Stmt, None))
    }

    fn decode_continue(&mut self, opcode_pc: usize) -> DecodeResult<(LocalType, Option<NodeId>)> {
        let depth_pt = self.pc;
        let depth = self.read_u8(opcode_pc, Opcode::Continue, "depth byte")? as usize;
        let index = self.resolve_depth(opcode_pc, depth_pt, Opcode::Continue, depth)?;
        if !self.blocks[index].is_loop {
            return Err(DecodeError::new(
                ErrorCode::BreakDepth,
                opcode_pc,
                format!("Continue: target at depth {depth} is not a loop"),
            )
            .with_pt(depth_pt));
        }
        if self.reachable {
            let mut header = self.blocks[index]
                .header
                .take()
                .expect("reachable continue implies a live loop header");
            let from = self.save_env();
            self.goto(from, &mut header);
            self.blocks[index].header = Some(header);
        }
        self.reachable = false;
        Ok((LocalType::End, None))
    }

    fn decode_break(&mut self, opcode_pc: usize) -> DecodeResult<(LocalType, Option<NodeId>)> {
        let depth_pt = self.pc;
        let depth = self.read_u8(opcode_pc, Opcode::Break, "depth byte")? as usize;
        let index = self.resolve_depth(opcode_pc, depth_pt, Opcode::Break, depth)?;
        if self.reachable {
            let mut target = std::mem::replace(&mut self.blocks[index].break_env, SsaEnv::Unreachable);
            let from = self.save_env();
            self.goto(from, &mut target);
            self.blocks[index].break_env = target;
        }
        self.reachable = false;
        Ok((LocalType::End, None))
    }

    fn resolve_depth(
        &self,
        opcode_pc: usize,
        depth_pt: usize,
        opcode: Opcode,
        depth: usize,
    ) -> DecodeResult<usize> {
        let height = self.blocks.len();
        if depth >= height {
            return Err(DecodeError::new(
                ErrorCode::BreakDepth,
                opcode_pc,
                format!(
                    "{}: depth {depth} exceeds control stack depth {height}",
                    opcode.mnemonic()
                ),
            )
            .with_pt(depth_pt));
        }
        Ok(height - 1 - depth)
    }

    fn decode_return(&mut self, opcode_pc: usize) -> DecodeResult<(LocalType, Option<NodeId>)> {
        let mut vals = Vec::new();
        if let Some(ty) = self.env.sig.return_type() {
            let val = self.expr(opcode_pc, ty)?;
            if self.reachable {
                vals.push(Self::live_value(val));
            }
        }
        if self.reachable {
            self.builder.ret(&vals);
        }
        self.reachable = false;
        Ok((LocalType::End, None))
    }

    fn decode_switch(
        &mut self,
        opcode_pc: usize,
        opcode: Opcode,
    ) -> DecodeResult<(LocalType, Option<NodeId>)> {
        let count = self.read_u8(opcode_pc, opcode, "case count")? as usize;
        let key = self.expr(opcode_pc, LocalType::I32)?;
        if !self.reachable {
            for _ in 0..count {
                self.production()?;
            }
            return Ok((LocalType::Stmt, None));
        }
        let key = Self::live_value(key);
        let fall_through = opcode == Opcode::Switch;

        // Cases plus the default successor.
        let sw = self.builder.switch_(count as u32 + 1, key);
        let base = self.save_env();
        self.blocks.push(BlockContext {
            is_loop: false,
            break_env: SsaEnv::Unreachable,
            header: None,
        });

        let mut fall = SsaEnv::Unreachable;
        for case in 0..count {
            let projection = self.builder.if_value(case as i32, sw);
            let mut case_env = base.with_control(projection);
            if fall_through {
                // The previous case body falls into this one.
                let prev = std::mem::replace(&mut fall, SsaEnv::Unreachable);
                self.goto(prev, &mut case_env);
            }
            self.restore_env(case_env);
            self.production()?;
            if fall_through {
                fall = self.save_env();
            } else {
                // No fall-through: the case body exits the switch.
                let from = self.save_env();
                let top = self.blocks.last_mut().expect("own frame");
                let mut target = std::mem::replace(&mut top.break_env, SsaEnv::Unreachable);
                self.goto(from, &mut target);
                self.blocks.last_mut().expect("own frame").break_env = target;
                self.reachable = false;
            }
        }

        let mut ctx = self.blocks.pop().expect("own frame");
        if fall_through {
            // Falling out of the last case exits the switch.
            self.goto(fall, &mut ctx.break_env);
        }
        // A key outside 0..count exits through the default projection.
        let projection = self.builder.if_default(sw);
        let default_env = base.with_control(projection);
        self.goto(default_env, &mut ctx.break_env);

        self.restore_env(ctx.break_env);
        Ok((LocalType::Stmt, None))
    }

    fn decode_ternary(&mut self, opcode_pc: usize) -> DecodeResult<(LocalType, Option<NodeId>)> {
        let cond = self.expr(opcode_pc, LocalType::I32)?;
        if !self.reachable {
            let (then_ty, _) = self.expr_value(opcode_pc)?;
            let else_pc = self.pc;
            let (else_ty, _) = self.expr_value(opcode_pc)?;
            if else_ty != then_ty {
                return Err(Self::arm_mismatch(else_pc, opcode_pc, then_ty, else_ty));
            }
            return Ok((then_ty, None));
        }
        let cond = Self::live_value(cond);
        let (if_true, if_false) = self.builder.branch(cond);
        let else_env = self.save_env_with_control(if_false);

        self.builder.set_control(if_true);
        let (then_ty, then_val) = self.expr_value(opcode_pc)?;
        let then_exit = self.save_env();

        self.restore_env(else_env);
        let else_pc = self.pc;
        let (else_ty, else_val) = self.expr_value(opcode_pc)?;
        if else_ty != then_ty {
            return Err(Self::arm_mismatch(else_pc, opcode_pc, then_ty, else_ty));
        }
        let else_exit = self.save_env();

        match (then_exit.reachable(), else_exit.reachable()) {
            (true, true) => {
                let mut end_env = SsaEnv::Unreachable;
                self.goto(then_exit, &mut end_env);
                self.goto(else_exit, &mut end_env);
                self.restore_env(end_env);
                let merge = self.builder.control();
                let then_val = Self::live_value(then_val);
                let else_val = Self::live_value(else_val);
                let phi = self.builder.phi(then_ty, &[then_val, else_val], merge);
                Ok((then_ty, Some(phi)))
            }
            (true, false) => {
                self.restore_env(then_exit);
                Ok((then_ty, then_val))
            }
            (false, true) => {
                self.restore_env(else_exit);
                Ok((then_ty, else_val))
            }
            (false, false) => {
                self.reachable = false;
                Ok((then_ty, None))
            }
        }
    }

    fn arm_mismatch(pc: usize, parent_pc: usize, then_ty: LocalType, else_ty: LocalType) -> DecodeError {
        DecodeError::new(
            ErrorCode::TypeError,
            pc,
            format!("Ternary: arms disagree: {then_ty} vs {else_ty}"),
        )
        .with_pt(parent_pc)
    }

    // ── Calls ────────────────────────────────────────────────────────────

    fn decode_call_function(
        &mut self,
        opcode_pc: usize,
    ) -> DecodeResult<(LocalType, Option<NodeId>)> {
        let index_pt = self.pc;
        let index = self.read_u8(opcode_pc, Opcode::CallFunction, "function index")? as u32;
        let sig = self
            .env
            .module
            .and_then(|m| m.signature_of(index))
            .cloned()
            .ok_or_else(|| {
                DecodeError::new(
                    ErrorCode::FunctionIndexOutOfBounds,
                    opcode_pc,
                    format!("CallFunction: function index {index} out of range"),
                )
                .with_pt(index_pt)
            })?;
        self.check_callable_arity(opcode_pc, index_pt, Opcode::CallFunction, &sig)?;

        let args = self.decode_call_args(opcode_pc, &sig)?;
        let ty = sig.return_type().unwrap_or(LocalType::Stmt);
        let node = match (self.reachable, args) {
            (true, Some(args)) => Some(self.builder.call_direct(index, &args)),
            _ => None,
        };
        Ok((ty, if ty.is_value() { node } else { None }))
    }

    fn decode_call_indirect(
        &mut self,
        opcode_pc: usize,
    ) -> DecodeResult<(LocalType, Option<NodeId>)> {
        let index_pt = self.pc;
        let sig_index = self.read_u8(opcode_pc, Opcode::CallIndirect, "signature index")? as u32;
        let module = self.env.module.filter(|m| m.function_table.is_some());
        let sig = module
            .and_then(|m| m.signature_of_table_slot(sig_index))
            .cloned()
            .ok_or_else(|| {
                DecodeError::new(
                    ErrorCode::FunctionIndexOutOfBounds,
                    opcode_pc,
                    format!("CallIndirect: signature index {sig_index} out of range"),
                )
                .with_pt(index_pt)
            })?;
        self.check_callable_arity(opcode_pc, index_pt, Opcode::CallIndirect, &sig)?;

        let key = self.expr(opcode_pc, LocalType::I32)?;
        let args = self.decode_call_args(opcode_pc, &sig)?;
        let ty = sig.return_type().unwrap_or(LocalType::Stmt);
        let node = match (self.reachable, args) {
            (true, Some(args)) => {
                let key = Self::live_value(key);
                Some(self.builder.call_indirect(sig_index, key, &args))
            }
            _ => None,
        };
        Ok((ty, if ty.is_value() { node } else { None }))
    }

    /// Decode one argument expression per parameter. `None` when the
    /// environment went dead while decoding them.
    fn decode_call_args(
        &mut self,
        opcode_pc: usize,
        sig: &crate::env::FunctionSig,
    ) -> DecodeResult<Option<Vec<NodeId>>> {
        let mut args = Vec::with_capacity(sig.param_count() as usize);
        for &param in sig.params() {
            let val = self.expr(opcode_pc, param)?;
            if let Some(val) = val {
                args.push(val);
            }
        }
        Ok((args.len() as u32 == sig.param_count()).then_some(args))
    }

    /// The byte format drives argument decoding off the signature, so a
    /// signature wider than one count byte can express is uncallable.
    fn check_callable_arity(
        &self,
        opcode_pc: usize,
        index_pt: usize,
        opcode: Opcode,
        sig: &crate::env::FunctionSig,
    ) -> DecodeResult<()> {
        if sig.param_count() > 255 {
            return Err(DecodeError::new(
                ErrorCode::ArityMismatch,
                opcode_pc,
                format!(
                    "{}: signature has {} parameters; the wire format caps calls at 255",
                    opcode.mnemonic(),
                    sig.param_count()
                ),
            )
            .with_pt(index_pt));
        }
        Ok(())
    }

    // ── Index validation ─────────────────────────────────────────────────

    fn read_local_index(&mut self, opcode_pc: usize, opcode: Opcode) -> DecodeResult<u32> {
        let index_pt = self.pc;
        let index = self.read_u8(opcode_pc, opcode, "local index")? as u32;
        let total = self.env.total_locals();
        if index >= total {
            return Err(DecodeError::new(
                ErrorCode::LocalIndexOutOfBounds,
                opcode_pc,
                format!(
                    "{}: local index {index} out of range ({total} locals)",
                    opcode.mnemonic()
                ),
            )
            .with_pt(index_pt));
        }
        Ok(index)
    }

    fn read_global_index(&mut self, opcode_pc: usize, opcode: Opcode) -> DecodeResult<u32> {
        let index_pt = self.pc;
        let index = self.read_u8(opcode_pc, opcode, "global index")? as u32;
        let module = self.require_memory(opcode_pc, opcode)?;
        let total = module.globals.len() as u32;
        if index >= total {
            return Err(DecodeError::new(
                ErrorCode::GlobalIndexOutOfBounds,
                opcode_pc,
                format!(
                    "{}: global index {index} out of range ({total} globals)",
                    opcode.mnemonic()
                ),
            )
            .with_pt(index_pt));
        }
        Ok(index)
    }

    fn require_memory(
        &self,
        opcode_pc: usize,
        opcode: Opcode,
    ) -> DecodeResult<&crate::env::ModuleEnv> {
        self.env.module.ok_or_else(|| {
            DecodeError::new(
                ErrorCode::NoMemory,
                opcode_pc,
                format!("{}: no module environment attached", opcode.mnemonic()),
            )
        })
    }
}
