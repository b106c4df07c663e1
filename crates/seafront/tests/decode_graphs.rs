//! End-to-end decode tests: function bodies in, graph shapes out.
//!
//! Machine-code emission lives downstream of this crate, so runtime
//! behavior is asserted structurally: the nodes, edges, and trap blocks
//! that make each behavior inevitable.

use seafront::encode::*;
use seafront::env::{FunctionEnv, FunctionSig, ModuleEnv};
use seafront::graph::{Graph, NodeId, Operator};
use seafront::{build_graph, LocalType, MachineConfig, MemType, Opcode};

fn config() -> MachineConfig {
    MachineConfig {
        pointer64: true,
        ..MachineConfig::default()
    }
}

fn sig_i_v() -> FunctionSig {
    FunctionSig::new(Some(LocalType::I32), &[])
}

fn sig_i_i() -> FunctionSig {
    FunctionSig::new(Some(LocalType::I32), &[LocalType::I32])
}

fn sig_i_ii() -> FunctionSig {
    FunctionSig::new(Some(LocalType::I32), &[LocalType::I32, LocalType::I32])
}

fn decode(env: &FunctionEnv<'_>, body: &[u8]) -> Graph {
    build_graph(env, config(), body).expect("body should decode")
}

fn find_node(graph: &Graph, op: &Operator) -> Option<NodeId> {
    graph.nodes().find(|(_, n)| n.op == *op).map(|(id, _)| id)
}

fn count_op(graph: &Graph, mnemonic: &str) -> usize {
    graph.operator_census().get(mnemonic).copied().unwrap_or(0)
}

fn has_trap_message(graph: &Graph, message: &str) -> bool {
    graph
        .nodes()
        .any(|(_, n)| matches!(n.op, Operator::StringConstant(s) if s == message))
}

// Scenario: return(int32 0x11223344).
#[test]
fn constant_return() {
    let env = FunctionEnv::new(sig_i_v(), None);
    let graph = decode(&env, &ret(i32_const(0x11223344)));

    let ret_node = find_node(&graph, &Operator::Return).unwrap();
    let inputs = graph.inputs(ret_node);
    assert_eq!(inputs.len(), 3);
    assert_eq!(
        *graph.op(inputs[0]),
        Operator::Int32Constant(0x11223344),
        "return value is the constant"
    );
    // Straight-line body: effect and control both come from Start.
    assert_eq!(Some(inputs[1]), graph.start());
    assert_eq!(Some(inputs[2]), graph.start());
    assert_eq!(count_op(&graph, "End"), 1);
}

// Scenario: return(local[0] + local[1]).
#[test]
fn two_parameter_add() {
    let env = FunctionEnv::new(sig_i_ii(), None);
    let graph = decode(
        &env,
        &ret(binop(Opcode::I32Add, get_local(0), get_local(1))),
    );

    let add = find_node(&graph, &Operator::Int32Add).unwrap();
    let inputs = graph.inputs(add);
    assert_eq!(*graph.op(inputs[0]), Operator::Parameter { index: 0 });
    assert_eq!(*graph.op(inputs[1]), Operator::Parameter { index: 1 });

    let ret_node = find_node(&graph, &Operator::Return).unwrap();
    assert_eq!(graph.inputs(ret_node)[0], add);
}

// Scenario: return(local[0] / local[1]) — signed division carries both
// trap checks, and the divide cannot float above them.
#[test]
fn signed_division_traps() {
    let env = FunctionEnv::new(sig_i_ii(), None);
    let graph = decode(
        &env,
        &ret(binop(Opcode::I32DivS, get_local(0), get_local(1))),
    );

    assert!(has_trap_message(&graph, "divide by zero"));
    assert!(has_trap_message(&graph, "divide result unrepresentable"));

    let div = find_node(&graph, &Operator::Int32Div).unwrap();
    assert_eq!(
        graph.inputs(div).len(),
        3,
        "divide is control-anchored below its checks"
    );
    // Both trap blocks return the sentinel, plus the function's own return.
    assert_eq!(count_op(&graph, "Return"), 3);
}

#[test]
fn unsigned_remainder_single_trap() {
    let env = FunctionEnv::new(sig_i_ii(), None);
    let graph = decode(
        &env,
        &ret(binop(Opcode::I32RemU, get_local(0), get_local(1))),
    );
    assert!(has_trap_message(&graph, "remainder by zero"));
    assert!(!has_trap_message(&graph, "divide by zero"));
    assert_eq!(count_op(&graph, "Uint32Mod"), 1);
}

// Scenario: memory size 32; return(load_i32(local[0])) — the bounds check
// dominates the load, with limit 32 − 4 = 28.
#[test]
fn bounded_load() {
    let module = ModuleEnv {
        mem_start: 0x10000,
        mem_end: 0x10020,
        ..Default::default()
    };
    let env = FunctionEnv::new(sig_i_i(), Some(&module));
    let graph = decode(&env, &ret(load_mem(MemType::I32, get_local(0))));

    assert_eq!(count_op(&graph, "Load"), 1);
    assert_eq!(count_op(&graph, "Uint32LessThanOrEqual"), 1);
    assert!(find_node(&graph, &Operator::Int32Constant(28)).is_some());
    assert!(find_node(&graph, &Operator::IntPtrConstant(0x10000)).is_some());
    assert!(has_trap_message(&graph, "memory access out of bounds"));

    // The load sits on the effect chain.
    let load = graph
        .nodes()
        .find(|(_, n)| matches!(n.op, Operator::Load(_)))
        .map(|(id, _)| id)
        .unwrap();
    assert!(graph.effect_chain_acyclic(load));
}

#[test]
fn asm_js_load_has_no_trap_block() {
    let module = ModuleEnv {
        mem_start: 0x10000,
        mem_end: 0x10020,
        asm_js: true,
        ..Default::default()
    };
    let env = FunctionEnv::new(sig_i_i(), Some(&module));
    let graph = decode(&env, &ret(load_mem(MemType::I32, get_local(0))));
    assert_eq!(count_op(&graph, "CheckedLoad"), 1);
    assert_eq!(count_op(&graph, "Load"), 0);
    assert!(!has_trap_message(&graph, "memory access out of bounds"));
}

// Scenario: fall-through switch over four cases, then a final return.
#[test]
fn fall_through_switch() {
    let env = FunctionEnv::new(sig_i_i(), None);
    let body = block(vec![
        switch(
            get_local(0),
            vec![
                nop(),                 // case 0 falls into case 1
                ret(i8_const(45)),     // case 1
                nop(),                 // case 2 falls into case 3
                ret(i8_const(47)),     // case 3
            ],
        ),
        ret(get_local(0)),
    ]);
    let graph = decode(&env, &body);

    assert!(find_node(&graph, &Operator::Switch { count: 5 }).is_some());
    assert_eq!(count_op(&graph, "IfValue"), 4);
    assert_eq!(count_op(&graph, "IfDefault"), 1);
    // Returns 45, 47, and the fall-out return of local[0].
    assert_eq!(count_op(&graph, "Return"), 3);
    // Fall-through edges: case 0 → case 1 and case 2 → case 3.
    assert_eq!(count_op(&graph, "Merge"), 2);
}

#[test]
fn no_fallthrough_switch_exits_each_case() {
    let env = FunctionEnv::new(sig_i_i(), None);
    let body = block(vec![
        switch_nf(
            get_local(0),
            vec![
                set_local(0, i8_const(44)),
                set_local(0, i8_const(55)),
            ],
        ),
        ret(get_local(0)),
    ]);
    let graph = decode(&env, &body);

    assert!(find_node(&graph, &Operator::Switch { count: 3 }).is_some());
    // Case exits and the default all join the code after the switch, which
    // needs a phi for the rewritten local.
    assert_eq!(count_op(&graph, "Return"), 1);
    assert!(count_op(&graph, "Phi") >= 1);
}

// Scenario: while (local[0]) { local[0] = local[0] - 1 } — the loop header
// merges the entry edge and one back-edge.
#[test]
fn countdown_loop() {
    let env = FunctionEnv::new(sig_i_i(), None);
    let body = block(vec![
        while_(
            get_local(0),
            set_local(0, binop(Opcode::I32Sub, get_local(0), i8_const(1))),
        ),
        ret(get_local(0)),
    ]);
    let graph = decode(&env, &body);

    let loop_node = find_node(&graph, &Operator::Loop { count: 2 }).unwrap();
    // Entry edge from Start's side, back edge from inside the body.
    assert_eq!(graph.inputs(loop_node).len(), 2);

    // local[0] circulates through a two-input phi on the loop.
    let phi = graph
        .nodes()
        .find(|(_, n)| matches!(n.op, Operator::Phi { count: 2, .. }))
        .map(|(id, _)| id)
        .unwrap();
    assert_eq!(*graph.inputs(phi).last().unwrap(), loop_node);

    assert_eq!(count_op(&graph, "EffectPhi"), 1);
    assert_eq!(count_op(&graph, "Int32Sub"), 1);
    assert_eq!(count_op(&graph, "Return"), 1);
}

// An infinite loop's only successor is the terminate edge into End.
#[test]
fn infinite_loop_terminates_graph() {
    let env = FunctionEnv::new(FunctionSig::new(None, &[]), None);
    let graph = decode(&env, &infinite_loop());

    assert_eq!(count_op(&graph, "Terminate"), 1);
    assert_eq!(count_op(&graph, "Return"), 0);
    let end = graph.end().unwrap();
    assert_eq!(*graph.op(end), Operator::End { count: 1 });
    // The back edge of the empty body is the loop itself.
    let loop_node = find_node(&graph, &Operator::Loop { count: 2 }).unwrap();
    assert_eq!(graph.inputs(loop_node)[1], loop_node);
}

#[test]
fn infinite_loop_on_one_branch_only() {
    let env = FunctionEnv::new(sig_i_i(), None);
    let body = if_then(get_local(0), infinite_loop(), ret(i8_const(45)));
    let graph = decode(&env, &body);
    assert_eq!(count_op(&graph, "Terminate"), 1);
    assert_eq!(count_op(&graph, "Return"), 1);
    let end = graph.end().unwrap();
    assert_eq!(*graph.op(end), Operator::End { count: 2 });
}

#[test]
fn empty_body_returns_void() {
    let env = FunctionEnv::new(FunctionSig::new(None, &[]), None);
    let graph = decode(&env, &[]);
    let ret_node = find_node(&graph, &Operator::Return).unwrap();
    assert_eq!(
        *graph.op(graph.inputs(ret_node)[0]),
        Operator::Int32Constant(0),
        "void return is synthesized as a zero-word return"
    );
}

#[test]
fn ternary_builds_value_phi() {
    let env = FunctionEnv::new(sig_i_i(), None);
    let graph = decode(
        &env,
        &ret(ternary(get_local(0), i8_const(11), i8_const(22))),
    );
    let phi = graph
        .nodes()
        .find(|(_, n)| matches!(n.op, Operator::Phi { count: 2, .. }))
        .map(|(id, _)| id)
        .unwrap();
    let inputs = graph.inputs(phi);
    assert_eq!(*graph.op(inputs[0]), Operator::Int32Constant(11));
    assert_eq!(*graph.op(inputs[1]), Operator::Int32Constant(22));
    assert!(matches!(*graph.op(inputs[2]), Operator::Merge { count: 2 }));
}

#[test]
fn comma_discards_left_value() {
    let env = FunctionEnv::new(sig_i_i(), None);
    let graph = decode(&env, &ret(comma(get_local(0), i8_const(17))));
    let ret_node = find_node(&graph, &Operator::Return).unwrap();
    assert_eq!(
        *graph.op(graph.inputs(ret_node)[0]),
        Operator::Int32Constant(17)
    );
}

#[test]
fn if_without_else_joins_preif_state() {
    let env = FunctionEnv::new(sig_i_i(), None);
    let body = block(vec![
        if_(get_local(0), set_local(0, i8_const(61))),
        ret(get_local(0)),
    ]);
    let graph = decode(&env, &body);
    // Taken and not-taken paths merge; the rewritten local needs a phi.
    assert_eq!(count_op(&graph, "Merge"), 1);
    assert_eq!(count_op(&graph, "Phi"), 1);
    let ret_node = find_node(&graph, &Operator::Return).unwrap();
    assert!(matches!(
        *graph.op(graph.inputs(ret_node)[0]),
        Operator::Phi { .. }
    ));
}

#[test]
fn explicit_void_return() {
    let env = FunctionEnv::new(FunctionSig::new(None, &[]), None);
    let graph = decode(&env, &ret_void());
    let ret_node = find_node(&graph, &Operator::Return).unwrap();
    let val = graph.inputs(ret_node)[0];
    assert_eq!(*graph.op(val), Operator::Int32Constant(0));
    assert_eq!(count_op(&graph, "Return"), 1);
}

#[test]
fn globals_read_and_write_the_area() {
    let module = ModuleEnv {
        globals_area: 0x4000,
        globals: vec![
            seafront::env::GlobalDef {
                offset: 0,
                mem_type: MemType::I32,
            },
            seafront::env::GlobalDef {
                offset: 4,
                mem_type: MemType::I32,
            },
        ],
        ..Default::default()
    };
    let env = FunctionEnv::new(FunctionSig::new(Some(LocalType::I32), &[]), Some(&module));
    let body = block(vec![
        store_global(1, load_global(0)),
        ret(load_global(1)),
    ]);
    let graph = decode(&env, &body);

    assert_eq!(count_op(&graph, "Store"), 1);
    assert_eq!(count_op(&graph, "Load"), 2);
    assert!(find_node(&graph, &Operator::IntPtrConstant(0x4000)).is_some());
    assert!(find_node(&graph, &Operator::IntPtrConstant(0x4004)).is_some());

    // The reload observes the store through the effect chain.
    let store = graph
        .nodes()
        .find(|(_, n)| matches!(n.op, Operator::Store(_)))
        .map(|(id, _)| id)
        .unwrap();
    let ret_node = find_node(&graph, &Operator::Return).unwrap();
    let reload = graph.inputs(ret_node)[0];
    let reload_effect = graph.op(reload).effect_inputs(graph.inputs(reload))[0];
    assert_eq!(reload_effect, store);
}

#[test]
fn direct_call_graph_shape() {
    let callee = FunctionSig::new(Some(LocalType::I32), &[LocalType::I32, LocalType::I32]);
    let module = ModuleEnv {
        functions: vec![seafront::env::FunctionDef {
            sig: callee,
            code: seafront::env::CodeHandle(5),
        }],
        ..Default::default()
    };
    let env = FunctionEnv::new(sig_i_ii(), Some(&module));
    let graph = decode(
        &env,
        &ret(call_function(0, vec![get_local(0), get_local(1)])),
    );
    let call = graph
        .nodes()
        .find(|(_, n)| matches!(n.op, Operator::Call(_)))
        .map(|(id, _)| id)
        .unwrap();
    let inputs = graph.inputs(call);
    assert_eq!(inputs.len(), 5); // code, two args, effect, control
    assert_eq!(*graph.op(inputs[0]), Operator::CodeConstant(5));
    // The call is the return's effect input.
    let ret_node = find_node(&graph, &Operator::Return).unwrap();
    assert_eq!(graph.inputs(ret_node)[1], call);
}

#[test]
fn indirect_call_graph_shape() {
    let callee = FunctionSig::new(Some(LocalType::I32), &[]);
    let module = ModuleEnv {
        signatures: vec![callee],
        function_table: Some(seafront::env::FunctionTable {
            handle: seafront::env::HeapHandle(2),
            size: 4,
        }),
        ..Default::default()
    };
    let env = FunctionEnv::new(sig_i_i(), Some(&module));
    let graph = decode(&env, &ret(call_indirect(0, get_local(0), vec![])));

    assert!(has_trap_message(&graph, "invalid function"));
    assert!(has_trap_message(&graph, "function signature mismatch"));
    // Signature word and code handle both load from the table.
    assert_eq!(count_op(&graph, "Load"), 2);
    assert_eq!(count_op(&graph, "SmiConstant"), 1);
    assert_eq!(count_op(&graph, "Call"), 1);
}

// ── Universal invariants ─────────────────────────────────────────────────

#[test]
fn redecoding_is_isomorphic() {
    let module = ModuleEnv {
        mem_start: 0x10000,
        mem_end: 0x10040,
        ..Default::default()
    };
    let env = FunctionEnv::new(sig_i_i(), Some(&module));
    let body = block(vec![
        while_(
            get_local(0),
            set_local(
                0,
                binop(
                    Opcode::I32Sub,
                    load_mem(MemType::I32, get_local(0)),
                    i8_const(4),
                ),
            ),
        ),
        ret(get_local(0)),
    ]);
    let first = decode(&env, &body);
    let second = decode(&env, &body);
    assert_eq!(first.node_count(), second.node_count());
    assert_eq!(first.operator_census(), second.operator_census());
}

#[test]
fn effectful_nodes_have_exactly_one_effect_input() {
    let module = ModuleEnv {
        mem_start: 0x10000,
        mem_end: 0x10020,
        ..Default::default()
    };
    let env = FunctionEnv::new(sig_i_i(), Some(&module));
    let body = block(vec![
        store_mem(MemType::I32, get_local(0), i8_const(7)),
        ret(load_mem(MemType::I32, get_local(0))),
    ]);
    let graph = decode(&env, &body);

    for (id, node) in graph.nodes() {
        if node.op.is_effectful() {
            assert_eq!(
                node.op.effect_inputs(&node.inputs).len(),
                1,
                "{} has a single effect input",
                node.op
            );
            assert!(graph.effect_chain_acyclic(id), "effect chain from {id}");
        }
    }
    // The load observes the store: its effect input is the store node.
    let load = graph
        .nodes()
        .find(|(_, n)| matches!(n.op, Operator::Load(_)))
        .map(|(id, _)| id)
        .unwrap();
    let store = graph
        .nodes()
        .find(|(_, n)| matches!(n.op, Operator::Store(_)))
        .map(|(id, _)| id)
        .unwrap();
    let load_effect = graph.op(load).effect_inputs(graph.inputs(load))[0];
    assert_eq!(load_effect, store);
}

#[test]
fn lowered_opcode_leaves_no_native_operator() {
    let env = FunctionEnv::new(sig_i_i(), None);
    let graph = decode(&env, &ret(unop(Opcode::I32Ctz, get_local(0))));
    let census = graph.operator_census();
    assert!(!census.contains_key("Word32Ctz"));
    assert!(!census.contains_key("Word32Popcnt"));
    assert!(census.contains_key("Word32Shl"));
}

#[test]
fn allocated_locals_resolve_in_group_order() {
    let mut env = FunctionEnv::new(sig_i_i(), None);
    let a = env.allocate_local(LocalType::I32);
    let b = env.allocate_local(LocalType::F64);
    let c = env.allocate_local(LocalType::I32);
    let (ia, ib, ic) = (env.local_index(a), env.local_index(b), env.local_index(c));
    assert!(ia < ic && ic < ib);

    // The allocated slots are addressable by their resolved indices.
    let body = block(vec![
        set_local(ia as u8, i8_const(3)),
        set_local(ib as u8, f64_const(0.5)),
        ret(get_local(ic as u8)),
    ]);
    let graph = decode(&env, &body);
    let ret_node = find_node(&graph, &Operator::Return).unwrap();
    // local c was never written: it returns its zero initializer.
    assert_eq!(
        *graph.op(graph.inputs(ret_node)[0]),
        Operator::Int32Constant(0)
    );
}

#[test]
fn dead_code_after_return_builds_nothing() {
    let env = FunctionEnv::new(sig_i_v(), None);
    let mut body = ret(i32_const(1));
    body.extend(ret(i32_const(2))); // decoded, verified, not built
    let graph = decode(&env, &body);
    assert_eq!(count_op(&graph, "Return"), 1);
    assert!(find_node(&graph, &Operator::Int32Constant(2)).is_none());
}

#[test]
fn dead_code_is_still_verified() {
    let env = FunctionEnv::new(sig_i_v(), None);
    let mut body = ret(i32_const(1));
    body.push(0xff); // junk after the terminator still fails the decode
    let err = build_graph(&env, config(), &body).unwrap_err();
    assert_eq!(err.code, seafront::ErrorCode::UnknownOpcode);
}

#[test]
fn nested_breaks_resolve_by_depth() {
    let env = FunctionEnv::new(sig_i_i(), None);
    // loop { loop { break 1 } } — the inner break exits the outer loop.
    let body = block(vec![
        loop_(vec![loop_(vec![break_(1)])]),
        ret(get_local(0)),
    ]);
    let graph = decode(&env, &body);
    // The outer loop is escapable; only the inner one is self-cycling.
    assert_eq!(count_op(&graph, "Return"), 1);
    assert_eq!(count_op(&graph, "Terminate"), 0);
}
