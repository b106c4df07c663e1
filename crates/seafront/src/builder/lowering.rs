//! Graph templates for opcodes the target cannot express as one operator.
//!
//! Each template is expressed through the builder's own `binop`/`unop`
//! dispatch, so a lowered sequence automatically picks up native operators
//! where the target has them (a lowered ctz still uses a native popcount
//! when one exists).

use seafront_graph::{NodeId, Operator};

use super::GraphBuilder;
use crate::opcodes::Opcode;

impl GraphBuilder<'_> {
    /// Count trailing zeros by smearing the lowest set bit upward, then
    /// popcounting the complement:
    ///
    /// ```text
    /// x |= x << 1; x |= x << 2; x |= x << 4; x |= x << 8; x |= x << 16;
    /// ctz = popcnt(0xffffffff ^ x)
    /// ```
    pub(super) fn make_i32_ctz(&mut self, input: NodeId) -> NodeId {
        let mut result = input;
        for shift in [1, 2, 4, 8, 16] {
            let amount = self.int32_constant(shift);
            let shifted = self.binop(Opcode::I32Shl, result, amount);
            result = self.binop(Opcode::I32Ior, result, shifted);
        }
        let all_ones = self.int32_constant(-1);
        let inverted = self.binop(Opcode::I32Xor, all_ones, result);
        self.unop(Opcode::I32Popcnt, inverted)
    }

    /// 64-bit variant of [`make_i32_ctz`](Self::make_i32_ctz) with one more
    /// smear step.
    pub(super) fn make_i64_ctz(&mut self, input: NodeId) -> NodeId {
        let mut result = input;
        for shift in [1, 2, 4, 8, 16, 32] {
            let amount = self.int64_constant(shift);
            let shifted = self.binop(Opcode::I64Shl, result, amount);
            result = self.binop(Opcode::I64Ior, result, shifted);
        }
        let all_ones = self.int64_constant(-1);
        let inverted = self.binop(Opcode::I64Xor, all_ones, result);
        self.unop(Opcode::I64Popcnt, inverted)
    }

    /// SWAR population count: sum bit pairs, nibbles, bytes, half-words.
    ///
    /// ```text
    /// x = ((x >> 1) & 0x55555555) + (x & 0x55555555);
    /// x = ((x >> 2) & 0x33333333) + (x & 0x33333333);
    /// x = ((x >> 4) & 0x0f0f0f0f) + (x & 0x0f0f0f0f);
    /// x = ((x >> 8) & 0x00ff00ff) + (x & 0x00ff00ff);
    /// x = ((x >> 16) & 0x0000ffff) + (x & 0x0000ffff);
    /// ```
    pub(super) fn make_i32_popcnt(&mut self, input: NodeId) -> NodeId {
        const STEPS: [(i32, u32); 5] = [
            (1, 0x5555_5555),
            (2, 0x3333_3333),
            (4, 0x0f0f_0f0f),
            (8, 0x00ff_00ff),
            (16, 0x0000_ffff),
        ];
        let mut result = input;
        for (shift, mask) in STEPS {
            let amount = self.int32_constant(shift);
            let mask = self.int32_constant(mask as i32);
            let shifted = self.binop(Opcode::I32ShrU, result, amount);
            let high = self.binop(Opcode::I32And, shifted, mask);
            let low = self.binop(Opcode::I32And, result, mask);
            result = self.binop(Opcode::I32Add, high, low);
        }
        result
    }

    pub(super) fn make_i64_popcnt(&mut self, input: NodeId) -> NodeId {
        const STEPS: [(i64, u64); 6] = [
            (1, 0x5555_5555_5555_5555),
            (2, 0x3333_3333_3333_3333),
            (4, 0x0f0f_0f0f_0f0f_0f0f),
            (8, 0x00ff_00ff_00ff_00ff),
            (16, 0x0000_ffff_0000_ffff),
            (32, 0x0000_0000_ffff_ffff),
        ];
        let mut result = input;
        for (shift, mask) in STEPS {
            let amount = self.int64_constant(shift);
            let mask = self.int64_constant(mask as i64);
            let shifted = self.binop(Opcode::I64ShrU, result, amount);
            let high = self.binop(Opcode::I64And, shifted, mask);
            let low = self.binop(Opcode::I64And, result, mask);
            result = self.binop(Opcode::I64Add, high, low);
        }
        result
    }

    /// Copysign as bit surgery: magnitude of `left`, sign bit of `right`.
    pub(super) fn make_f32_copysign(&mut self, left: NodeId, right: NodeId) -> NodeId {
        let left_bits = self.unop(Opcode::I32ReinterpretF32, left);
        let right_bits = self.unop(Opcode::I32ReinterpretF32, right);
        let magnitude_mask = self.int32_constant(0x7fff_ffff);
        let sign_mask = self.int32_constant(0x8000_0000u32 as i32);
        let magnitude = self.binop(Opcode::I32And, left_bits, magnitude_mask);
        let sign = self.binop(Opcode::I32And, right_bits, sign_mask);
        let combined = self.binop(Opcode::I32Ior, magnitude, sign);
        self.unop(Opcode::F32ReinterpretI32, combined)
    }

    /// 64-bit copysign. Without 64-bit word operations the sign lives in
    /// the high word, so the 32-bit path extracts, patches, and reinserts
    /// the high word only.
    pub(super) fn make_f64_copysign(&mut self, left: NodeId, right: NodeId) -> NodeId {
        if self.config().pointer64 {
            let left_bits = self.unop(Opcode::I64ReinterpretF64, left);
            let right_bits = self.unop(Opcode::I64ReinterpretF64, right);
            let magnitude_mask = self.int64_constant(0x7fff_ffff_ffff_ffff);
            let sign_mask = self.int64_constant(0x8000_0000_0000_0000u64 as i64);
            let magnitude = self.binop(Opcode::I64And, left_bits, magnitude_mask);
            let sign = self.binop(Opcode::I64And, right_bits, sign_mask);
            let combined = self.binop(Opcode::I64Ior, magnitude, sign);
            return self.unop(Opcode::F64ReinterpretI64, combined);
        }

        let high_left = self.new_pure(Operator::Float64ExtractHighWord32, &[left]);
        let high_right = self.new_pure(Operator::Float64ExtractHighWord32, &[right]);
        let magnitude_mask = self.int32_constant(0x7fff_ffff);
        let sign_mask = self.int32_constant(0x8000_0000u32 as i32);
        let magnitude = self.binop(Opcode::I32And, high_left, magnitude_mask);
        let sign = self.binop(Opcode::I32And, high_right, sign_mask);
        let new_high = self.binop(Opcode::I32Ior, magnitude, sign);
        self.new_pure(Operator::Float64InsertHighWord32, &[left, new_high])
    }
}
