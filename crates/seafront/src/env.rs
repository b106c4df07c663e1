//! Function and module environments.
//!
//! A `FunctionEnv` scopes one function-body decode: its signature, the
//! declared-local layout, and the module bindings it may reference. The
//! `ModuleEnv` is produced by the surrounding module loader and is strictly
//! read-only here.

use crate::opcodes::{LocalType, MemType};

/// A function signature: ordered parameter types and zero or one return.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSig {
    params: Vec<LocalType>,
    ret: Option<LocalType>,
}

impl FunctionSig {
    /// Build a signature. Parameter and return types must be value types.
    pub fn new(ret: Option<LocalType>, params: &[LocalType]) -> Self {
        debug_assert!(params.iter().all(|t| t.is_value()));
        debug_assert!(ret.map_or(true, |t| t.is_value()));
        Self {
            params: params.to_vec(),
            ret,
        }
    }

    pub fn param_count(&self) -> u32 {
        self.params.len() as u32
    }

    pub fn param(&self, index: u32) -> Option<LocalType> {
        self.params.get(index as usize).copied()
    }

    pub fn params(&self) -> &[LocalType] {
        &self.params
    }

    pub fn return_count(&self) -> u32 {
        self.ret.map_or(0, |_| 1)
    }

    pub fn return_type(&self) -> Option<LocalType> {
        self.ret
    }
}

/// Stable handle to a declared local, resolved to a flat index against the
/// grouped layout once allocation is complete. Handles never move when
/// later locals are allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalHandle {
    ty: LocalType,
    ordinal: u32,
}

/// Per-function decode/build state.
///
/// Flat local indices are laid out as: parameters in declaration order,
/// then i32 locals, i64 locals, f32 locals, f64 locals. The allocation API
/// mints only i32/f32/f64 locals; the i64 count participates in the layout
/// but can only be set directly by the module layer.
#[derive(Debug, Clone)]
pub struct FunctionEnv<'m> {
    pub sig: FunctionSig,
    pub local_i32_count: u32,
    pub local_i64_count: u32,
    pub local_f32_count: u32,
    pub local_f64_count: u32,
    pub module: Option<&'m ModuleEnv>,
}

impl<'m> FunctionEnv<'m> {
    pub fn new(sig: FunctionSig, module: Option<&'m ModuleEnv>) -> Self {
        Self {
            sig,
            local_i32_count: 0,
            local_i64_count: 0,
            local_f32_count: 0,
            local_f64_count: 0,
            module,
        }
    }

    /// Parameters plus declared locals.
    pub fn total_locals(&self) -> u32 {
        self.sig.param_count()
            + self.local_i32_count
            + self.local_i64_count
            + self.local_f32_count
            + self.local_f64_count
    }

    /// Declare one local of the given type and return its stable handle.
    ///
    /// Only i32/f32/f64 locals are allocable here; i64 locals have no
    /// allocation path (module loaders set `local_i64_count` directly).
    pub fn allocate_local(&mut self, ty: LocalType) -> LocalHandle {
        let ordinal = match ty {
            LocalType::I32 => {
                self.local_i32_count += 1;
                self.local_i32_count - 1
            }
            LocalType::F32 => {
                self.local_f32_count += 1;
                self.local_f32_count - 1
            }
            LocalType::F64 => {
                self.local_f64_count += 1;
                self.local_f64_count - 1
            }
            _ => panic!("cannot allocate a local of type {ty}"),
        };
        LocalHandle { ty, ordinal }
    }

    /// Resolve a handle to its flat index in the grouped layout.
    pub fn local_index(&self, handle: LocalHandle) -> u32 {
        let base = self.sig.param_count();
        match handle.ty {
            LocalType::I32 => base + handle.ordinal,
            LocalType::F32 => base + self.local_i32_count + self.local_i64_count + handle.ordinal,
            LocalType::F64 => {
                base + self.local_i32_count
                    + self.local_i64_count
                    + self.local_f32_count
                    + handle.ordinal
            }
            _ => unreachable!("handle with non-allocable type"),
        }
    }

    /// The declared type of flat local index `index`, or `None` when the
    /// index is past the last local.
    pub fn local_type(&self, index: u32) -> Option<LocalType> {
        let params = self.sig.param_count();
        if index < params {
            return self.sig.param(index);
        }
        let mut rest = index - params;
        for (count, ty) in [
            (self.local_i32_count, LocalType::I32),
            (self.local_i64_count, LocalType::I64),
            (self.local_f32_count, LocalType::F32),
            (self.local_f64_count, LocalType::F64),
        ] {
            if rest < count {
                return Some(ty);
            }
            rest -= count;
        }
        None
    }
}

/// Code handle of a compiled function, opaque to the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeHandle(pub u32);

/// Opaque host object handle (function table, module context).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapHandle(pub u32);

/// One entry of the module's globals area.
#[derive(Debug, Clone, Copy)]
pub struct GlobalDef {
    /// Byte offset within the globals area.
    pub offset: u32,
    /// Stored representation.
    pub mem_type: MemType,
}

/// A function callable through the direct-call index space.
#[derive(Debug, Clone)]
pub struct FunctionDef {
    pub sig: FunctionSig,
    pub code: CodeHandle,
}

/// The module's indirect-call table: a host array holding signature indices
/// (small-integer tagged) in slots `0..size` and code handles in slots
/// `size..2*size`.
#[derive(Debug, Clone, Copy)]
pub struct FunctionTable {
    pub handle: HeapHandle,
    pub size: u32,
}

/// Bindings a function body may reference. Owned by the caller, read-only
/// for the whole decode.
#[derive(Debug, Clone, Default)]
pub struct ModuleEnv {
    /// Linear memory window, inclusive-exclusive.
    pub mem_start: u64,
    pub mem_end: u64,
    /// asm.js semantics: out-of-bounds loads read zero and stores are
    /// dropped, instead of trapping.
    pub asm_js: bool,
    /// Base address of the globals area.
    pub globals_area: u64,
    pub globals: Vec<GlobalDef>,
    /// Direct-call index space.
    pub functions: Vec<FunctionDef>,
    /// Indirect-call signature index space.
    pub signatures: Vec<FunctionSig>,
    pub function_table: Option<FunctionTable>,
    /// Host context used to construct the runtime-throw call in trap
    /// blocks; absent in verification-only setups.
    pub context: Option<HeapHandle>,
}

impl ModuleEnv {
    /// Linear memory size in bytes.
    pub fn mem_size(&self) -> u64 {
        debug_assert!(self.mem_end >= self.mem_start);
        self.mem_end - self.mem_start
    }

    pub fn signature_of(&self, function_index: u32) -> Option<&FunctionSig> {
        self.functions.get(function_index as usize).map(|f| &f.sig)
    }

    pub fn code_of(&self, function_index: u32) -> Option<CodeHandle> {
        self.functions.get(function_index as usize).map(|f| f.code)
    }

    pub fn signature_of_table_slot(&self, sig_index: u32) -> Option<&FunctionSig> {
        self.signatures.get(sig_index as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sig_i_ii() -> FunctionSig {
        FunctionSig::new(Some(LocalType::I32), &[LocalType::I32, LocalType::I32])
    }

    #[test]
    fn signature_accessors() {
        let sig = sig_i_ii();
        assert_eq!(sig.param_count(), 2);
        assert_eq!(sig.param(0), Some(LocalType::I32));
        assert_eq!(sig.param(2), None);
        assert_eq!(sig.return_count(), 1);
        assert_eq!(sig.return_type(), Some(LocalType::I32));

        let void = FunctionSig::new(None, &[]);
        assert_eq!(void.return_count(), 0);
        assert_eq!(void.return_type(), None);
    }

    #[test]
    fn params_resolve_before_locals() {
        let env = FunctionEnv::new(sig_i_ii(), None);
        assert_eq!(env.total_locals(), 2);
        assert_eq!(env.local_type(0), Some(LocalType::I32));
        assert_eq!(env.local_type(1), Some(LocalType::I32));
        assert_eq!(env.local_type(2), None);
    }

    #[test]
    fn allocation_is_grouped_and_stable() {
        let mut env = FunctionEnv::new(sig_i_ii(), None);
        let a = env.allocate_local(LocalType::I32);
        let b = env.allocate_local(LocalType::F32);
        let c = env.allocate_local(LocalType::I32);

        let ia = env.local_index(a);
        let ib = env.local_index(b);
        let ic = env.local_index(c);

        // i32 locals keep allocation order and precede all f32 locals.
        assert!(ia < ic);
        assert!(ib > ic);
        assert_eq!(env.local_type(ia), Some(LocalType::I32));
        assert_eq!(env.local_type(ic), Some(LocalType::I32));
        assert_eq!(env.local_type(ib), Some(LocalType::F32));
        assert_eq!(env.total_locals(), 5);
    }

    #[test]
    fn f64_group_comes_last() {
        let mut env = FunctionEnv::new(FunctionSig::new(None, &[]), None);
        let d = env.allocate_local(LocalType::F64);
        let f = env.allocate_local(LocalType::F32);
        let i = env.allocate_local(LocalType::I32);
        assert_eq!(env.local_index(i), 0);
        assert_eq!(env.local_index(f), 1);
        assert_eq!(env.local_index(d), 2);
    }

    #[test]
    fn i64_count_participates_in_layout() {
        let mut env = FunctionEnv::new(FunctionSig::new(None, &[]), None);
        env.allocate_local(LocalType::I32);
        env.local_i64_count = 2;
        let f = env.allocate_local(LocalType::F32);
        assert_eq!(env.local_type(0), Some(LocalType::I32));
        assert_eq!(env.local_type(1), Some(LocalType::I64));
        assert_eq!(env.local_type(2), Some(LocalType::I64));
        assert_eq!(env.local_index(f), 3);
        assert_eq!(env.local_type(3), Some(LocalType::F32));
    }

    #[test]
    #[should_panic(expected = "cannot allocate a local of type")]
    fn i64_locals_are_not_allocable() {
        let mut env = FunctionEnv::new(FunctionSig::new(None, &[]), None);
        env.allocate_local(LocalType::I64);
    }

    #[test]
    fn module_lookups() {
        let sig = sig_i_ii();
        let module = ModuleEnv {
            mem_start: 0x1000,
            mem_end: 0x1020,
            functions: vec![FunctionDef {
                sig: sig.clone(),
                code: CodeHandle(7),
            }],
            signatures: vec![sig.clone()],
            ..Default::default()
        };
        assert_eq!(module.mem_size(), 0x20);
        assert_eq!(module.signature_of(0), Some(&sig));
        assert_eq!(module.signature_of(1), None);
        assert_eq!(module.code_of(0), Some(CodeHandle(7)));
        assert_eq!(module.signature_of_table_slot(0), Some(&sig));
        assert_eq!(module.signature_of_table_slot(1), None);
    }
}
