// Copyright 2025 The Godley Engine Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

use std::ops;

use crate::dag::{Node, NodeId, Op, SubexpressionCache};

/// A cache-aware handle to a published node, composing arithmetic
/// through the subexpression cache.
///
/// Every composition publishes the result anonymously, so two
/// semantically identical expressions built through different call paths
/// still deduplicate to the same canonical node.
#[derive(Copy, Clone)]
pub struct Expr<'a> {
    cache: &'a SubexpressionCache,
    id: NodeId,
}

impl<'a> Expr<'a> {
    /// Publish `node` (or find its canonical instance) and wrap it.
    pub fn new(cache: &'a SubexpressionCache, node: Node) -> Self {
        let id = cache.insert_anonymous(node);
        Expr { cache, id }
    }

    /// Wrap an already-published node.
    pub fn wrap(cache: &'a SubexpressionCache, id: NodeId) -> Self {
        Expr { cache, id }
    }

    /// A numeric literal, promoted to a cached constant node.
    pub fn constant(cache: &'a SubexpressionCache, value: f64) -> Self {
        Expr::new(cache, Node::constant(value))
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn cache(&self) -> &'a SubexpressionCache {
        self.cache
    }

    fn unary(self, op: Op) -> Self {
        Expr {
            cache: self.cache,
            id: self.cache.op(op, &[self.id], &[]),
        }
    }

    fn two_group(self, op: Op, rhs: Expr<'a>) -> Self {
        debug_assert!(std::ptr::eq(self.cache, rhs.cache));
        Expr {
            cache: self.cache,
            id: self.cache.op(op, &[self.id], &[rhs.id]),
        }
    }

    pub fn ln(self) -> Self {
        self.unary(Op::Ln)
    }

    pub fn exp(self) -> Self {
        self.unary(Op::Exp)
    }

    pub fn sin(self) -> Self {
        self.unary(Op::Sin)
    }

    pub fn cos(self) -> Self {
        self.unary(Op::Cos)
    }

    pub fn sinh(self) -> Self {
        self.unary(Op::Sinh)
    }

    pub fn cosh(self) -> Self {
        self.unary(Op::Cosh)
    }

    pub fn sqrt(self) -> Self {
        self.unary(Op::Sqrt)
    }

    pub fn lt(self, rhs: impl IntoExpr<'a>) -> Self {
        let rhs = rhs.into_expr(self.cache);
        self.two_group(Op::Lt, rhs)
    }

    pub fn le(self, rhs: impl IntoExpr<'a>) -> Self {
        let rhs = rhs.into_expr(self.cache);
        self.two_group(Op::Le, rhs)
    }
}

/// Operand promotion: raw node ids and numeric literals normalize to the
/// same cache as the expression they combine with.
pub trait IntoExpr<'a> {
    fn into_expr(self, cache: &'a SubexpressionCache) -> Expr<'a>;
}

impl<'a> IntoExpr<'a> for Expr<'a> {
    fn into_expr(self, cache: &'a SubexpressionCache) -> Expr<'a> {
        debug_assert!(std::ptr::eq(self.cache, cache));
        self
    }
}

impl<'a> IntoExpr<'a> for NodeId {
    fn into_expr(self, cache: &'a SubexpressionCache) -> Expr<'a> {
        Expr::wrap(cache, self)
    }
}

impl<'a> IntoExpr<'a> for f64 {
    fn into_expr(self, cache: &'a SubexpressionCache) -> Expr<'a> {
        Expr::constant(cache, self)
    }
}

impl<'a, T: IntoExpr<'a>> ops::Add<T> for Expr<'a> {
    type Output = Expr<'a>;
    fn add(self, rhs: T) -> Expr<'a> {
        let rhs = rhs.into_expr(self.cache);
        Expr {
            cache: self.cache,
            id: self.cache.op(Op::Add, &[self.id, rhs.id], &[]),
        }
    }
}

impl<'a, T: IntoExpr<'a>> ops::Sub<T> for Expr<'a> {
    type Output = Expr<'a>;
    fn sub(self, rhs: T) -> Expr<'a> {
        let rhs = rhs.into_expr(self.cache);
        self.two_group(Op::Sub, rhs)
    }
}

impl<'a, T: IntoExpr<'a>> ops::Mul<T> for Expr<'a> {
    type Output = Expr<'a>;
    fn mul(self, rhs: T) -> Expr<'a> {
        let rhs = rhs.into_expr(self.cache);
        Expr {
            cache: self.cache,
            id: self.cache.op(Op::Mul, &[self.id, rhs.id], &[]),
        }
    }
}

impl<'a, T: IntoExpr<'a>> ops::Div<T> for Expr<'a> {
    type Output = Expr<'a>;
    fn div(self, rhs: T) -> Expr<'a> {
        let rhs = rhs.into_expr(self.cache);
        self.two_group(Op::Div, rhs)
    }
}

// commutative ops with a literal on the left reorder onto the
// expression so both spellings hit the same cache entry
impl<'a> ops::Add<Expr<'a>> for f64 {
    type Output = Expr<'a>;
    fn add(self, rhs: Expr<'a>) -> Expr<'a> {
        rhs + self
    }
}

impl<'a> ops::Mul<Expr<'a>> for f64 {
    type Output = Expr<'a>;
    fn mul(self, rhs: Expr<'a>) -> Expr<'a> {
        rhs * self
    }
}

impl<'a> ops::Sub<Expr<'a>> for f64 {
    type Output = Expr<'a>;
    fn sub(self, rhs: Expr<'a>) -> Expr<'a> {
        Expr::constant(rhs.cache, self) - rhs
    }
}

impl<'a> ops::Div<Expr<'a>> for f64 {
    type Output = Expr<'a>;
    fn div(self, rhs: Expr<'a>) -> Expr<'a> {
        Expr::constant(rhs.cache, self) / rhs
    }
}
