// Copyright 2025 The Godley Engine Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

use std::collections::HashMap;

use crate::common::Result;
use crate::dag::{Node, NodeId, Op, SubexpressionCache};
use crate::eprintln;
use crate::variable::{Addr, ValueVector, VariableKind, VariableValue, VariableValues};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Ln,
    Exp,
    Sin,
    Cos,
    Sinh,
    Cosh,
    Sqrt,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Lt,
    Le,
}

/// One step of the linearized evaluation sequence: compute a value and
/// store it at `dst`.
#[derive(Clone, Debug, PartialEq)]
pub struct EvalOp {
    pub dst: Addr,
    pub op: Opcode,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Opcode {
    Const { value: f64 },
    Assign { src: Addr },
    Op1 { op: UnaryOp, a: Addr },
    Op2 { op: BinaryOp, a: Addr, b: Addr },
}

/// Walks the DAG once per distinct node and appends the evaluation-op
/// sequence consumed by the external stepper.
///
/// Emission is memoized per canonical node: a subexpression shared by N
/// parents is evaluated exactly once per step.
pub struct Compiler<'a> {
    cache: &'a SubexpressionCache,
    variables: &'a mut VariableValues,
    vector: &'a mut ValueVector,
    emitted: HashMap<NodeId, VariableValue>,
    next_temp: usize,
}

impl<'a> Compiler<'a> {
    pub fn new(
        cache: &'a SubexpressionCache,
        variables: &'a mut VariableValues,
        vector: &'a mut ValueVector,
    ) -> Self {
        Compiler {
            cache,
            variables,
            vector,
            emitted: HashMap::new(),
            next_temp: 0,
        }
    }

    /// Emit ops computing `id`, returning the storage descriptor holding
    /// the result.
    ///
    /// If `result` is supplied and is flow-compatible it receives the
    /// value directly (or via an explicit copy when the node already has
    /// a home); an incompatible slot is ignored with a warning and a
    /// fresh temporary is used instead.
    pub fn add_eval_ops(
        &mut self,
        id: NodeId,
        ops: &mut Vec<EvalOp>,
        result: Option<VariableValue>,
    ) -> Result<VariableValue> {
        if let Some(loc) = self.emitted.get(&id) {
            let loc = loc.clone();
            return self.deliver(ops, loc, result);
        }

        match self.cache.node(id) {
            Node::Constant { value } => {
                let dst = self.target(result)?;
                ops.push(EvalOp {
                    dst: addr_of(&dst),
                    op: Opcode::Const { value },
                });
                self.emitted.insert(id, dst.clone());
                Ok(dst)
            }

            Node::Variable {
                value_id,
                name,
                kind,
                rhs,
                init,
            } => {
                let own = {
                    if self.variables.get(&value_id).is_none() {
                        self.variables
                            .insert(value_id.clone(), VariableValue::new(kind, &name, &init));
                    }
                    let vv = self
                        .variables
                        .get_mut(&value_id)
                        .expect("just inserted variable value");
                    vv.alloc_value(self.vector);
                    vv.clone()
                };
                // memoize before descending: a self-referencing rhs
                // resolves to this slot instead of recursing forever
                self.emitted.insert(id, own.clone());
                if let Some(rhs) = rhs
                    && !own.godley_overridden
                {
                    self.add_eval_ops(rhs, ops, Some(own.clone()))?;
                }
                self.deliver(ops, own, result)
            }

            Node::Operation { op, pos, neg } => {
                let pos_locs = self.eval_group(&pos, ops)?;
                let neg_locs = self.eval_group(&neg, ops)?;
                let dst_vv = self.target(result)?;
                let dst = addr_of(&dst_vv);
                match op {
                    Op::Add | Op::Sub => {
                        self.fold(ops, dst, BinaryOp::Add, BinaryOp::Sub, &pos_locs, &neg_locs)
                    }
                    Op::Mul | Op::Div => {
                        self.fold(ops, dst, BinaryOp::Mul, BinaryOp::Div, &pos_locs, &neg_locs)
                    }
                    Op::Lt | Op::Le => {
                        let op = if op == Op::Lt {
                            BinaryOp::Lt
                        } else {
                            BinaryOp::Le
                        };
                        ops.push(EvalOp {
                            dst,
                            op: Opcode::Op2 {
                                op,
                                a: pos_locs[0],
                                b: neg_locs[0],
                            },
                        });
                    }
                    Op::Ln | Op::Exp | Op::Sin | Op::Cos | Op::Sinh | Op::Cosh | Op::Sqrt => {
                        let op = match op {
                            Op::Ln => UnaryOp::Ln,
                            Op::Exp => UnaryOp::Exp,
                            Op::Sin => UnaryOp::Sin,
                            Op::Cos => UnaryOp::Cos,
                            Op::Sinh => UnaryOp::Sinh,
                            Op::Cosh => UnaryOp::Cosh,
                            Op::Sqrt => UnaryOp::Sqrt,
                            _ => unreachable!(),
                        };
                        ops.push(EvalOp {
                            dst,
                            op: Opcode::Op1 { op, a: pos_locs[0] },
                        });
                    }
                }
                self.emitted.insert(id, dst_vv.clone());
                Ok(dst_vv)
            }
        }
    }

    fn eval_group(&mut self, group: &[NodeId], ops: &mut Vec<EvalOp>) -> Result<Vec<Addr>> {
        group
            .iter()
            .map(|arg| Ok(addr_of(&self.add_eval_ops(*arg, ops, None)?)))
            .collect()
    }

    /// Left-to-right accumulation of a two-group operation into `dst`:
    /// fold the positive group with `pos_op`, then the negative group
    /// with `neg_op`.  The order is fixed so non-associative floating
    /// point accumulation is deterministic.
    fn fold(
        &mut self,
        ops: &mut Vec<EvalOp>,
        dst: Addr,
        pos_op: BinaryOp,
        neg_op: BinaryOp,
        pos: &[Addr],
        neg: &[Addr],
    ) {
        debug_assert!(!pos.is_empty());
        if pos.len() == 1 && neg.is_empty() {
            ops.push(EvalOp {
                dst,
                op: Opcode::Assign { src: pos[0] },
            });
            return;
        }
        let mut rest: Vec<(BinaryOp, Addr)> = Vec::with_capacity(pos.len() + neg.len() - 2);
        let first = if pos.len() >= 2 {
            rest.extend(pos[2..].iter().map(|a| (pos_op, *a)));
            rest.extend(neg.iter().map(|a| (neg_op, *a)));
            Opcode::Op2 {
                op: pos_op,
                a: pos[0],
                b: pos[1],
            }
        } else {
            rest.extend(neg[1..].iter().map(|a| (neg_op, *a)));
            Opcode::Op2 {
                op: neg_op,
                a: pos[0],
                b: neg[0],
            }
        };
        ops.push(EvalOp { dst, op: first });
        for (op, b) in rest {
            ops.push(EvalOp {
                dst,
                op: Opcode::Op2 { op, a: dst, b },
            });
        }
    }

    /// Pick the destination slot for a freshly computed value.
    fn target(&mut self, result: Option<VariableValue>) -> Result<VariableValue> {
        match result {
            Some(mut vv) if vv.is_flow_var() => {
                vv.alloc_value(self.vector);
                Ok(vv)
            }
            Some(vv) => {
                eprintln!(
                    "warning: result slot for '{}' is not flow storage, using a temporary",
                    vv.name
                );
                self.new_temp()
            }
            None => self.new_temp(),
        }
    }

    /// Route an already-homed value to the caller's slot, copying only
    /// when the caller supplied a different, compatible one.
    fn deliver(
        &mut self,
        ops: &mut Vec<EvalOp>,
        loc: VariableValue,
        result: Option<VariableValue>,
    ) -> Result<VariableValue> {
        let Some(mut result) = result else {
            return Ok(loc);
        };
        if !result.is_flow_var() {
            eprintln!(
                "warning: result slot for '{}' is not flow storage, leaving value in '{}'",
                result.name, loc.name
            );
            return Ok(loc);
        }
        result.alloc_value(self.vector);
        if result.addr() == loc.addr() {
            return Ok(loc);
        }
        ops.push(EvalOp {
            dst: addr_of(&result),
            op: Opcode::Assign { src: addr_of(&loc) },
        });
        Ok(result)
    }

    fn new_temp(&mut self) -> Result<VariableValue> {
        let name = format!("tmp{}", self.next_temp);
        self.next_temp += 1;
        let id = self.variables.new_name(None, &name)?;
        let mut vv = VariableValue::new(VariableKind::TempFlow, id.name(), "");
        vv.alloc_value(self.vector);
        self.variables.insert(id, vv.clone());
        Ok(vv)
    }
}

fn addr_of(vv: &VariableValue) -> Addr {
    vv.addr().expect("internal compiler error: unallocated slot")
}
