// Copyright 2025 The Godley Engine Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

#![forbid(unsafe_code)]

pub mod common;
mod compiler;
mod dag;
mod derivative;
mod expr;
mod godley;
mod variable;
mod vm;

pub use self::common::{Error, ErrorCode, ErrorKind, Result, ValueId};
pub use self::compiler::{BinaryOp, Compiler, EvalOp, Opcode, UnaryOp};
pub use self::dag::{ArgGroup, Node, NodeId, Op, Side, SubexpressionCache};
pub use self::derivative::{Differentiator, differentiate_name};
pub use self::expr::{Expr, IntoExpr};
pub use self::godley::{FlowCoef, GodleyEvaluator, GodleySource, GodleyTable};
pub use self::variable::{Addr, Segment, ValueVector, VariableKind, VariableValue, VariableValues};
pub use self::vm::eval;
