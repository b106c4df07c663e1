//! SSA environments for the decoder.
//!
//! The decoder tracks, per control path, which IR node currently holds each
//! local plus the live control and effect nodes. Joining two paths creates
//! a merge and phis for every local whose node differs; joining into an
//! already-merged target widens the existing merge and phis instead. Loop
//! headers are pre-merged with one-input phis for every local so back-edges
//! (explicit `Continue` or the implicit end-of-body edge) reduce to the
//! same widening step.

use seafront_graph::NodeId;

use super::Decoder;

/// One control path's view of the world.
#[derive(Debug, Clone)]
pub(super) enum SsaEnv {
    /// No control path reaches this point.
    Unreachable,
    Live {
        /// Whether `control` is a merge/loop this env owns, so further
        /// incoming edges widen it in place.
        merged: bool,
        control: NodeId,
        effect: NodeId,
        /// Node currently holding each flat local index.
        locals: Vec<NodeId>,
    },
}

impl SsaEnv {
    pub(super) fn reachable(&self) -> bool {
        matches!(self, SsaEnv::Live { .. })
    }

    /// A copy of this environment entered through a different control node
    /// (switch-case projections).
    pub(super) fn with_control(&self, new_control: NodeId) -> SsaEnv {
        match self {
            SsaEnv::Live { effect, locals, .. } => SsaEnv::Live {
                merged: false,
                control: new_control,
                effect: *effect,
                locals: locals.clone(),
            },
            SsaEnv::Unreachable => unreachable!("with_control on a dead environment"),
        }
    }
}

impl Decoder<'_, '_> {
    /// Snapshot the current environment.
    pub(super) fn save_env(&self) -> SsaEnv {
        if self.reachable {
            SsaEnv::Live {
                merged: false,
                control: self.builder.control(),
                effect: self.builder.effect(),
                locals: self.locals.clone(),
            }
        } else {
            SsaEnv::Unreachable
        }
    }

    /// Snapshot the current environment with a different control node
    /// (branch projections).
    pub(super) fn save_env_with_control(&self, control: NodeId) -> SsaEnv {
        debug_assert!(self.reachable);
        SsaEnv::Live {
            merged: false,
            control,
            effect: self.builder.effect(),
            locals: self.locals.clone(),
        }
    }

    /// Install `env` as the current environment.
    pub(super) fn restore_env(&mut self, env: SsaEnv) {
        match env {
            SsaEnv::Unreachable => self.reachable = false,
            SsaEnv::Live {
                control,
                effect,
                locals,
                ..
            } => {
                self.builder.set_control(control);
                self.builder.set_effect(effect);
                self.locals = locals;
                self.reachable = true;
            }
        }
    }

    /// Route `from` into `to`, creating or widening merges and phis as
    /// needed. A dead `from` contributes nothing.
    pub(super) fn goto(&mut self, from: SsaEnv, to: &mut SsaEnv) {
        let SsaEnv::Live {
            control: from_control,
            effect: from_effect,
            locals: from_locals,
            ..
        } = from
        else {
            return;
        };

        match to {
            SsaEnv::Unreachable => {
                *to = SsaEnv::Live {
                    merged: false,
                    control: from_control,
                    effect: from_effect,
                    locals: from_locals,
                };
            }
            SsaEnv::Live {
                merged,
                control,
                effect,
                locals,
            } => {
                if !*merged {
                    // Second edge in: materialize the merge.
                    let merge = self.builder.merge(&[*control, from_control]);
                    if *effect != from_effect {
                        *effect = self.builder.effect_phi(&[*effect, from_effect], merge);
                    }
                    for (i, local) in locals.iter_mut().enumerate() {
                        if *local != from_locals[i] {
                            let ty = self
                                .env
                                .local_type(i as u32)
                                .expect("local index within layout");
                            *local = self.builder.phi(ty, &[*local, from_locals[i]], merge);
                        }
                    }
                    *control = merge;
                    *merged = true;
                } else {
                    // Widen the existing merge by one input.
                    let merge = *control;
                    self.builder.append_to_merge(merge, from_control);
                    let width = self.builder.graph_ref().inputs(merge).len();

                    if self.builder.is_phi_with_merge(*effect, merge) {
                        self.builder.append_to_phi(*effect, from_effect);
                    } else if *effect != from_effect {
                        let mut effects = vec![*effect; width - 1];
                        effects.push(from_effect);
                        *effect = self.builder.effect_phi(&effects, merge);
                    }

                    for (i, local) in locals.iter_mut().enumerate() {
                        if self.builder.is_phi_with_merge(*local, merge) {
                            self.builder.append_to_phi(*local, from_locals[i]);
                        } else if *local != from_locals[i] {
                            let ty = self
                                .env
                                .local_type(i as u32)
                                .expect("local index within layout");
                            let mut vals = vec![*local; width - 1];
                            vals.push(from_locals[i]);
                            *local = self.builder.phi(ty, &vals, merge);
                        }
                    }
                }
            }
        }
    }

    /// Turn the current environment into a loop header: a one-input loop
    /// node and one-input phis for the effect and every local. Back-edges
    /// later widen all of them through [`goto`](Self::goto).
    pub(super) fn prepare_loop_header(&mut self) -> SsaEnv {
        debug_assert!(self.reachable);
        let entry_control = self.builder.control();
        let entry_effect = self.builder.effect();
        let loop_node = self.builder.loop_(entry_control);
        let effect_phi = self.builder.effect_phi(&[entry_effect], loop_node);

        let mut phis = Vec::with_capacity(self.locals.len());
        for (i, &local) in self.locals.iter().enumerate() {
            let ty = self
                .env
                .local_type(i as u32)
                .expect("local index within layout");
            phis.push(self.builder.phi(ty, &[local], loop_node));
        }

        let header = SsaEnv::Live {
            merged: true,
            control: loop_node,
            effect: effect_phi,
            locals: phis,
        };
        self.restore_env(header.clone());
        header
    }
}
