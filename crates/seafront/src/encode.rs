//! Function-body encoding helpers.
//!
//! The write-side dual of the decoder: composable functions that assemble
//! prefix-encoded byte sequences for each production. Tests and tools
//! build bodies out of these instead of hand-writing byte arrays.

use crate::opcodes::{MemType, Opcode};

fn seq(opcode: Opcode, immediates: &[u8], children: &[Vec<u8>]) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + immediates.len());
    out.push(opcode as u8);
    out.extend_from_slice(immediates);
    for child in children {
        out.extend_from_slice(child);
    }
    out
}

// ── Constants ────────────────────────────────────────────────────────────

pub fn i8_const(value: i8) -> Vec<u8> {
    seq(Opcode::I8Const, &[value as u8], &[])
}

pub fn i32_const(value: i32) -> Vec<u8> {
    seq(Opcode::I32Const, &value.to_le_bytes(), &[])
}

pub fn i64_const(value: i64) -> Vec<u8> {
    seq(Opcode::I64Const, &value.to_le_bytes(), &[])
}

pub fn f32_const(value: f32) -> Vec<u8> {
    seq(Opcode::F32Const, &value.to_le_bytes(), &[])
}

pub fn f64_const(value: f64) -> Vec<u8> {
    seq(Opcode::F64Const, &value.to_le_bytes(), &[])
}

pub fn zero() -> Vec<u8> {
    i8_const(0)
}

// ── Locals and globals ───────────────────────────────────────────────────

pub fn get_local(index: u8) -> Vec<u8> {
    seq(Opcode::GetLocal, &[index], &[])
}

pub fn set_local(index: u8, value: Vec<u8>) -> Vec<u8> {
    seq(Opcode::SetLocal, &[index], &[value])
}

pub fn load_global(index: u8) -> Vec<u8> {
    seq(Opcode::LoadGlobal, &[index], &[])
}

pub fn store_global(index: u8, value: Vec<u8>) -> Vec<u8> {
    seq(Opcode::StoreGlobal, &[index], &[value])
}

// ── Memory ───────────────────────────────────────────────────────────────

pub fn load_mem(mem_type: MemType, index: Vec<u8>) -> Vec<u8> {
    seq(Opcode::load_for(mem_type), &[], &[index])
}

pub fn store_mem(mem_type: MemType, index: Vec<u8>, value: Vec<u8>) -> Vec<u8> {
    seq(Opcode::store_for(mem_type), &[], &[index, value])
}

// ── Operators ────────────────────────────────────────────────────────────

pub fn unop(opcode: Opcode, input: Vec<u8>) -> Vec<u8> {
    seq(opcode, &[], &[input])
}

pub fn binop(opcode: Opcode, left: Vec<u8>, right: Vec<u8>) -> Vec<u8> {
    seq(opcode, &[], &[left, right])
}

pub fn not(input: Vec<u8>) -> Vec<u8> {
    unop(Opcode::BoolNot, input)
}

pub fn ternary(cond: Vec<u8>, if_true: Vec<u8>, if_false: Vec<u8>) -> Vec<u8> {
    seq(Opcode::Ternary, &[], &[cond, if_true, if_false])
}

pub fn comma(left: Vec<u8>, right: Vec<u8>) -> Vec<u8> {
    seq(Opcode::Comma, &[], &[left, right])
}

// ── Calls ────────────────────────────────────────────────────────────────

pub fn call_function(index: u8, args: Vec<Vec<u8>>) -> Vec<u8> {
    seq(Opcode::CallFunction, &[index], &args)
}

pub fn call_indirect(sig_index: u8, key: Vec<u8>, mut args: Vec<Vec<u8>>) -> Vec<u8> {
    args.insert(0, key);
    seq(Opcode::CallIndirect, &[sig_index], &args)
}

// ── Statements ───────────────────────────────────────────────────────────

pub fn nop() -> Vec<u8> {
    seq(Opcode::Nop, &[], &[])
}

pub fn block(stmts: Vec<Vec<u8>>) -> Vec<u8> {
    seq(Opcode::Block, &[stmts.len() as u8], &stmts)
}

pub fn loop_(stmts: Vec<Vec<u8>>) -> Vec<u8> {
    seq(Opcode::Loop, &[stmts.len() as u8], &stmts)
}

pub fn if_(cond: Vec<u8>, then: Vec<u8>) -> Vec<u8> {
    seq(Opcode::If, &[], &[cond, then])
}

pub fn if_then(cond: Vec<u8>, then: Vec<u8>, otherwise: Vec<u8>) -> Vec<u8> {
    seq(Opcode::IfThen, &[], &[cond, then, otherwise])
}

pub fn switch(key: Vec<u8>, mut cases: Vec<Vec<u8>>) -> Vec<u8> {
    let count = cases.len() as u8;
    cases.insert(0, key);
    seq(Opcode::Switch, &[count], &cases)
}

pub fn switch_nf(key: Vec<u8>, mut cases: Vec<Vec<u8>>) -> Vec<u8> {
    let count = cases.len() as u8;
    cases.insert(0, key);
    seq(Opcode::SwitchNf, &[count], &cases)
}

pub fn break_(depth: u8) -> Vec<u8> {
    seq(Opcode::Break, &[depth], &[])
}

pub fn continue_(depth: u8) -> Vec<u8> {
    seq(Opcode::Continue, &[depth], &[])
}

pub fn ret(value: Vec<u8>) -> Vec<u8> {
    seq(Opcode::Return, &[], &[value])
}

pub fn ret_void() -> Vec<u8> {
    seq(Opcode::Return, &[], &[])
}

/// `while (cond) body` in its canonical rendering:
/// `loop { if (!cond) break; body }`.
pub fn while_(cond: Vec<u8>, body: Vec<u8>) -> Vec<u8> {
    loop_(vec![if_(not(cond), break_(0)), body])
}

/// A loop whose only successor is the terminate edge.
pub fn infinite_loop() -> Vec<u8> {
    loop_(vec![])
}
