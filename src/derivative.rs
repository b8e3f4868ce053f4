// Copyright 2025 The Godley Engine Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

use crate::common::Result;
use crate::dag::{Node, NodeId, Op, SubexpressionCache};
use crate::expr::Expr;
use crate::model_err;
use crate::variable::VariableKind;

/// Symbolic differentiation with respect to the model-wide
/// differentiation target (time).
///
/// One derivative rule per node variant and operator; the match is
/// closed, so adding an operator without a rule is a compile error
/// rather than a runtime dispatch failure.
pub struct Differentiator<'a> {
    cache: &'a SubexpressionCache,
}

impl<'a> Differentiator<'a> {
    pub fn new(cache: &'a SubexpressionCache) -> Self {
        Differentiator { cache }
    }

    pub fn derivative(&self, id: NodeId) -> Result<NodeId> {
        let cache = self.cache;
        match cache.node(id) {
            Node::Constant { .. } => Ok(cache.zero()),

            Node::Variable {
                value_id,
                kind,
                rhs,
                ..
            } => {
                if let Some(rhs) = rhs {
                    return self.derivative(rhs);
                }
                match kind {
                    VariableKind::Stock | VariableKind::Integral => {
                        let Some(input) = cache.get_integral_input(&value_id) else {
                            return model_err!(MissingIntegralInput, value_id.to_string());
                        };
                        // if the input has an rhs, elide the input
                        // variable in case it is a redundant temporary
                        match cache.node(input) {
                            Node::Variable { rhs: Some(rhs), .. } => Ok(rhs),
                            _ => Ok(input),
                        }
                    }
                    // temporaries with neither rhs nor integral linkage
                    _ => Ok(cache.zero()),
                }
            }

            Node::Operation { op, pos, neg } => match op {
                // linearity: the same grouping over each argument's
                // derivative
                Op::Add | Op::Sub => {
                    let dpos = pos
                        .iter()
                        .map(|a| self.derivative(*a))
                        .collect::<Result<Vec<_>>>()?;
                    let dneg = neg
                        .iter()
                        .map(|a| self.derivative(*a))
                        .collect::<Result<Vec<_>>>()?;
                    Ok(cache.op(op, &dpos, &dneg))
                }

                // multiplies are n-ary, not binary:
                // (uvw)' = u'(vw) + v'(uw) + w'(uv)
                Op::Mul => {
                    let mut terms = Vec::with_capacity(pos.len());
                    for i in 0..pos.len() {
                        let mut factors: Vec<NodeId> = Vec::with_capacity(pos.len());
                        for (j, arg) in pos.iter().enumerate() {
                            if j != i {
                                factors.push(*arg);
                            }
                        }
                        factors.push(self.derivative(pos[i])?);
                        terms.push(cache.op(Op::Mul, &factors, &[]));
                    }
                    Ok(cache.op(Op::Add, &terms, &[]))
                }

                // divides are n-ary too: collapse each group into a
                // single product and apply the binary quotient rule
                // d(u/v) = (v*du - u*dv)/v^2
                Op::Div => {
                    let u = Expr::wrap(cache, collapse_product(cache, &pos));
                    let v = Expr::wrap(cache, collapse_product(cache, &neg));
                    let du = Expr::wrap(cache, self.derivative(u.id())?);
                    let dv = Expr::wrap(cache, self.derivative(v.id())?);
                    Ok(((v * du - u * dv) / (v * v)).id())
                }

                Op::Ln => {
                    let x = Expr::wrap(cache, pos[0]);
                    self.chain_rule(x.id(), (1.0 / x).id())
                }
                Op::Exp => self.chain_rule(pos[0], id),
                Op::Sin => {
                    let x = Expr::wrap(cache, pos[0]);
                    self.chain_rule(x.id(), x.cos().id())
                }
                Op::Cos => {
                    let x = Expr::wrap(cache, pos[0]);
                    let neg_sin = Expr::wrap(cache, cache.zero()) - x.sin();
                    self.chain_rule(x.id(), neg_sin.id())
                }
                Op::Sinh => {
                    let x = Expr::wrap(cache, pos[0]);
                    self.chain_rule(x.id(), x.cosh().id())
                }
                Op::Cosh => {
                    let x = Expr::wrap(cache, pos[0]);
                    self.chain_rule(x.id(), x.sinh().id())
                }
                Op::Sqrt => {
                    let x = Expr::wrap(cache, pos[0]);
                    let inner = 1.0 / (2.0 * Expr::wrap(cache, id));
                    self.chain_rule(x.id(), inner.id())
                }

                // piecewise constant: zero derivative almost everywhere
                Op::Lt | Op::Le => Ok(cache.zero()),
            },
        }
    }

    /// Compose an outer derivative with an inner derivative:
    /// `d(f(x)) = x' * inner` where `inner = f'(x)`.
    ///
    /// Folds the multiply-by-zero and multiply-by-one cases so derivative
    /// construction does not bloat the cache with garbage nodes.
    pub fn chain_rule(&self, x: NodeId, inner: NodeId) -> Result<NodeId> {
        let dx = self.derivative(x)?;
        if dx == self.cache.zero() {
            Ok(self.cache.zero())
        } else if dx == self.cache.one() {
            Ok(inner)
        } else {
            Ok((Expr::wrap(self.cache, dx) * Expr::wrap(self.cache, inner)).id())
        }
    }
}

fn collapse_product(cache: &SubexpressionCache, group: &[NodeId]) -> NodeId {
    match group {
        [single] => *single,
        _ => cache.op(Op::Mul, group, &[]),
    }
}

/// Name for the derivative of the variable called `name`:
/// `x` becomes `dx/dt`, `dx/dt` becomes `d^{2}x/dt^{2}`, and so on.
/// Anything that only looks like a derivative name is wrapped verbatim.
pub fn differentiate_name(name: &str) -> String {
    fn parse(name: &str) -> Option<(u32, &str)> {
        let rest = name.strip_prefix('d')?;
        let (order, rest) = if let Some(r) = rest.strip_prefix("^{") {
            let close = r.find('}')?;
            let n: u32 = r[..close].parse().ok()?;
            (n, &r[close + 1..])
        } else {
            (1u32, rest)
        };
        let idx = rest.rfind("/dt")?;
        let (base, tail) = (&rest[..idx], &rest[idx + 3..]);
        let tail_order: u32 = if tail.is_empty() {
            1
        } else {
            tail.strip_prefix("^{")?.strip_suffix('}')?.parse().ok()?
        };
        if tail_order == order && !base.is_empty() {
            Some((order, base))
        } else {
            None
        }
    }
    match parse(name) {
        Some((n, base)) => format!("d^{{{}}}{}/dt^{{{}}}", n + 1, base, n + 1),
        None => format!("d{name}/dt"),
    }
}
