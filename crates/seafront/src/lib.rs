//! seafront — verifying decoder and sea-of-nodes graph builder for
//! pre-standard WebAssembly function bodies.
//!
//! This crate consumes the tree-structured bytecode of one function at a
//! time and lowers it, in a single verification-driven pass, into a
//! dataflow + effect + control graph ([`seafront_graph::Graph`]) ready for
//! downstream machine-code generation. Module-level decoding, the host
//! runtime, and code emission are external collaborators reached only
//! through [`env::ModuleEnv`].

pub mod builder;
pub mod decoder;
pub mod encode;
pub mod env;
pub mod error;
pub mod opcodes;

// Re-export key types for convenience
pub use anyhow::{Context, Result};
pub use builder::{GraphBuilder, TrapReason};
pub use decoder::decode_function_body;
pub use env::{FunctionEnv, FunctionSig, ModuleEnv};
pub use error::{DecodeError, DecodeResult, ErrorCode};
pub use opcodes::{LocalType, MachineConfig, MemType, Opcode};
pub use seafront_graph as graph;
pub use seafront_graph::Graph;

use tracing::debug;

/// Decode and build the graph for one function body.
///
/// This is the main entry point for compilation. On success the returned
/// graph is fully terminated (every control path reaches End, including
/// trap blocks and non-exiting loops).
///
/// # Example
/// ```no_run
/// use seafront::{build_graph, encode, FunctionEnv, FunctionSig, LocalType, MachineConfig};
///
/// let sig = FunctionSig::new(Some(LocalType::I32), &[]);
/// let env = FunctionEnv::new(sig, None);
/// let body = encode::ret(encode::i32_const(42));
/// let graph = build_graph(&env, MachineConfig::default(), &body).unwrap();
/// assert!(graph.end().is_some());
/// ```
pub fn build_graph(
    env: &FunctionEnv<'_>,
    config: MachineConfig,
    body: &[u8],
) -> DecodeResult<Graph> {
    let mut graph = Graph::new();
    decode_function_body(&mut graph, env, config, body)?;
    debug!(nodes = graph.node_count(), "function body built");
    Ok(graph)
}

/// Verify one function body without keeping the graph.
///
/// Decoding and building are a single walk, so verification runs the same
/// pass and discards the result.
pub fn verify_function(
    env: &FunctionEnv<'_>,
    config: MachineConfig,
    body: &[u8],
) -> DecodeResult<()> {
    build_graph(env, config, body).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_graph_terminates_the_graph() {
        let sig = FunctionSig::new(Some(LocalType::I32), &[]);
        let env = FunctionEnv::new(sig, None);
        let body = encode::ret(encode::i32_const(7));
        let graph = build_graph(&env, MachineConfig::default(), &body).unwrap();
        assert!(graph.start().is_some());
        assert!(graph.end().is_some());
    }

    #[test]
    fn verify_function_reports_errors() {
        let sig = FunctionSig::new(None, &[]);
        let env = FunctionEnv::new(sig, None);
        let err = verify_function(&env, MachineConfig::default(), &[0xff]).unwrap_err();
        assert_eq!(err.code, ErrorCode::UnknownOpcode);
        assert_eq!(err.pc, 0);
    }
}
