// Copyright 2025 The Godley Engine Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

use float_cmp::approx_eq;

use crate::compiler::{BinaryOp, EvalOp, Opcode, UnaryOp};
use crate::variable::{Addr, ValueVector};

pub(crate) fn is_truthy(n: f64) -> bool {
    let is_false = approx_eq!(f64, n, 0.0);
    !is_false
}

fn read(values: &ValueVector, addr: Addr) -> f64 {
    values.segment(addr.segment)[addr.idx]
}

/// Execute a compiled op sequence against the value vector.
///
/// Invoked once per integrator sub-step by the external stepper.  All
/// arithmetic follows IEEE 754: division by zero and domain errors
/// produce inf/NaN, which pass through; comparisons produce 0.0/1.0.
pub fn eval(ops: &[EvalOp], values: &mut ValueVector) {
    for op in ops {
        let result = match op.op {
            Opcode::Const { value } => value,
            Opcode::Assign { src } => read(values, src),
            Opcode::Op1 { op, a } => {
                let a = read(values, a);
                match op {
                    UnaryOp::Ln => a.ln(),
                    UnaryOp::Exp => a.exp(),
                    UnaryOp::Sin => a.sin(),
                    UnaryOp::Cos => a.cos(),
                    UnaryOp::Sinh => a.sinh(),
                    UnaryOp::Cosh => a.cosh(),
                    UnaryOp::Sqrt => a.sqrt(),
                }
            }
            Opcode::Op2 { op, a, b } => {
                let a = read(values, a);
                let b = read(values, b);
                match op {
                    BinaryOp::Add => a + b,
                    BinaryOp::Sub => a - b,
                    BinaryOp::Mul => a * b,
                    BinaryOp::Div => a / b,
                    BinaryOp::Lt => (a < b) as i8 as f64,
                    BinaryOp::Le => (a <= b) as i8 as f64,
                }
            }
        };
        values.segment_mut(op.dst.segment)[op.dst.idx] = result;
    }
}
