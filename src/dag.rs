// Copyright 2025 The Godley Engine Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

use std::cell::RefCell;
use std::collections::HashMap;

use ordered_float::OrderedFloat;
use smallvec::{SmallVec, smallvec};

use crate::common::{Result, ValueId};
use crate::model_err;
use crate::variable::VariableKind;

/// Non-owning handle to a node in the subexpression cache's arena.
///
/// All cross-node references (operand lists, rhs links) are NodeIds; the
/// cache is the sole owner of node storage, so a handle can always be
/// resolved or rejected, never dangle.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

pub type ArgGroup = SmallVec<[NodeId; 2]>;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Op {
    Add,
    Sub,
    Mul,
    Div,
    Ln,
    Exp,
    Sin,
    Cos,
    Sinh,
    Cosh,
    Sqrt,
    Lt,
    Le,
}

impl Op {
    /// Algebraic hierarchy level, used only to decide whether brackets
    /// are necessary when rendering.  Never used for evaluation.
    pub fn bodmas_level(&self) -> u8 {
        use Op::*;
        match self {
            Ln | Exp | Sin | Cos | Sinh | Cosh | Sqrt => 0,
            Mul | Div => 1,
            Add | Sub => 2,
            Lt | Le => 3,
        }
    }

    /// Does this operator carry a second (negative/denominator/rhs)
    /// argument group?
    pub fn two_group(&self) -> bool {
        matches!(self, Op::Sub | Op::Div | Op::Lt | Op::Le)
    }

    /// Binary commutative/associative operators flatten nested
    /// same-operator nodes into a single n-ary group at construction.
    pub fn flattens(&self) -> bool {
        matches!(self, Op::Add | Op::Mul)
    }
}

/// Role of an operation node's argument group.
///
/// `Positive` is the additive group for Add/Sub and the numerator for
/// Div; `Negative` is the subtracted group for Sub and the denominator
/// for Div.  One-group operators (Add, Mul, unary functions) keep all
/// operands in `Positive`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Side {
    Positive,
    Negative,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Node {
    Constant {
        value: f64,
    },
    Variable {
        value_id: ValueId,
        name: String,
        kind: VariableKind,
        /// node defining this variable, absent for pure state variables
        rhs: Option<NodeId>,
        init: String,
    },
    Operation {
        op: Op,
        pos: ArgGroup,
        neg: ArgGroup,
    },
}

impl Node {
    pub fn constant(value: f64) -> Self {
        Node::Constant { value }
    }

    pub fn variable(value_id: ValueId, name: &str, kind: VariableKind) -> Self {
        Node::Variable {
            value_id,
            name: name.to_owned(),
            kind,
            rhs: None,
            init: String::new(),
        }
    }

    pub fn bodmas_level(&self) -> u8 {
        match self {
            Node::Operation { op, .. } => op.bodmas_level(),
            _ => 0,
        }
    }

    pub fn group(&self, side: Side) -> &[NodeId] {
        match self {
            Node::Operation { pos, neg, .. } => match side {
                Side::Positive => pos,
                Side::Negative => neg,
            },
            _ => &[],
        }
    }
}

/// Structural identity of a node, the deduplication key.
///
/// Operation identity is order-sensitive within a group; variable
/// identity is the valueId alone (an rhs attached later never changes a
/// variable's key).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum NodeKey {
    Const(OrderedFloat<f64>),
    Var(ValueId),
    Op(Op, ArgGroup, ArgGroup),
}

impl NodeKey {
    fn of(node: &Node) -> Self {
        match node {
            Node::Constant { value } => NodeKey::Const(OrderedFloat(*value)),
            Node::Variable { value_id, .. } => NodeKey::Var(value_id.clone()),
            Node::Operation { op, pos, neg } => NodeKey::Op(*op, pos.clone(), neg.clone()),
        }
    }
}

struct CacheInner {
    nodes: Vec<Node>,
    index: HashMap<NodeKey, NodeId>,
    /// maps a stock/integral valueId to the variable node feeding its
    /// integral operation
    integral_inputs: HashMap<ValueId, NodeId>,
}

/// Hash-consing store owning every published node.
///
/// `insert_anonymous` deduplicates by structural identity, guaranteeing
/// at most one canonical instance per distinct subexpression; this keeps
/// the generated op sequence minimal and makes identity comparison (used
/// for zero/one constant folding) a reliable equality check.
///
/// Interior mutability lets the `Expr` builder compose through a shared
/// reference; the engine is single-threaded by design.
pub struct SubexpressionCache {
    inner: RefCell<CacheInner>,
    zero: NodeId,
    one: NodeId,
}

impl Default for SubexpressionCache {
    fn default() -> Self {
        Self::new()
    }
}

impl SubexpressionCache {
    pub fn new() -> Self {
        let cache = SubexpressionCache {
            inner: RefCell::new(CacheInner {
                nodes: Vec::new(),
                index: HashMap::new(),
                integral_inputs: HashMap::new(),
            }),
            zero: NodeId(0),
            one: NodeId(1),
        };
        // canonical zero and one are interned first, so their NodeIds
        // are fixed and constant folding is an O(1) id comparison
        let zero = cache.insert_anonymous(Node::constant(0.0));
        let one = cache.insert_anonymous(Node::constant(1.0));
        debug_assert_eq!(zero, cache.zero);
        debug_assert_eq!(one, cache.one);
        cache
    }

    /// The canonical `0` node.
    pub fn zero(&self) -> NodeId {
        self.zero
    }

    /// The canonical `1` node.
    pub fn one(&self) -> NodeId {
        self.one
    }

    /// Publish a freshly built, unnamed node, returning the canonical
    /// instance.  If a structurally equal node is already cached that
    /// instance is returned and the new node discarded.
    pub fn insert_anonymous(&self, node: Node) -> NodeId {
        let key = NodeKey::of(&node);
        let mut inner = self.inner.borrow_mut();
        if let Some(&id) = inner.index.get(&key) {
            return id;
        }
        let id = NodeId(inner.nodes.len() as u32);
        inner.nodes.push(node);
        inner.index.insert(key, id);
        id
    }

    /// Map a raw node back to its canonical cached instance.
    pub fn reverse_lookup(&self, node: &Node) -> Result<NodeId> {
        let key = NodeKey::of(node);
        match self.inner.borrow().index.get(&key) {
            Some(&id) => Ok(id),
            None => model_err!(CacheLookupFailed, format!("{node:?}")),
        }
    }

    /// A copy of the canonical node for `id`.
    pub fn node(&self, id: NodeId) -> Node {
        self.inner.borrow().nodes[id.0 as usize].clone()
    }

    pub fn len(&self) -> usize {
        self.inner.borrow().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Convenience: publish a named variable node.
    pub fn variable(&self, value_id: ValueId, name: &str, kind: VariableKind) -> NodeId {
        self.insert_anonymous(Node::variable(value_id, name, kind))
    }

    /// Attach a defining rhs to a published variable node.  The dedup
    /// key for variables is the valueId alone, so this never invalidates
    /// the index.
    pub fn set_rhs(&self, var: NodeId, rhs: NodeId) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        match inner.nodes.get_mut(var.0 as usize) {
            Some(Node::Variable { rhs: slot, .. }) => {
                *slot = Some(rhs);
                Ok(())
            }
            _ => model_err!(DoesNotExist, format!("{var:?} is not a variable node")),
        }
    }

    /// Record the variable node feeding the integral that advances the
    /// stock identified by `id`.
    pub fn set_integral_input(&self, id: ValueId, input: NodeId) {
        self.inner.borrow_mut().integral_inputs.insert(id, input);
    }

    /// Resolve the node feeding an integral variable, if one is defined.
    pub fn get_integral_input(&self, id: &ValueId) -> Option<NodeId> {
        self.inner.borrow().integral_inputs.get(id).copied()
    }

    /// Topological depth of `id` in the sequence of variable
    /// definitions.
    ///
    /// Only variable `rhs` hops consume the recursion budget: legitimate
    /// graphs have depth bounded by the number of distinct variables, so
    /// a caller passes that bound (or larger) and treats the error as
    /// proof of a circular definition.
    pub fn order(&self, id: NodeId, max_depth: usize) -> Result<usize> {
        match self.node(id) {
            Node::Constant { .. } => Ok(0),
            Node::Variable { value_id, rhs, .. } => match rhs {
                None => Ok(0),
                Some(rhs) => {
                    if max_depth == 0 {
                        return model_err!(CircularDependency, value_id.to_string());
                    }
                    Ok(1 + self.order(rhs, max_depth - 1)?)
                }
            },
            Node::Operation { pos, neg, .. } => {
                let mut order = 0;
                for arg in pos.iter().chain(neg.iter()) {
                    order = order.max(self.order(*arg, max_depth)?);
                }
                Ok(order)
            }
        }
    }

    /// Render `id` as infix text, bracketing by BODMAS level.
    pub fn to_infix(&self, id: NodeId) -> String {
        let node = self.node(id);
        let level = node.bodmas_level();
        let bracketed = |arg: NodeId| {
            let s = self.to_infix(arg);
            if self.node(arg).bodmas_level() > level {
                format!("({s})")
            } else {
                s
            }
        };
        let joined = |args: &[NodeId], sep: &str| {
            args.iter()
                .map(|a| bracketed(*a))
                .collect::<Vec<_>>()
                .join(sep)
        };
        match &node {
            Node::Constant { value } => format!("{value}"),
            Node::Variable { name, .. } => name.clone(),
            Node::Operation { op, pos, neg } => match op {
                Op::Add if neg.is_empty() => joined(pos, "+"),
                Op::Add | Op::Sub => format!("{}-{}", joined(pos, "+"), joined(neg, "-")),
                Op::Mul => joined(pos, "*"),
                Op::Div => format!("{}/{}", joined(pos, "*"), joined(neg, "/")),
                Op::Lt => format!("{}<{}", joined(pos, ""), joined(neg, "")),
                Op::Le => format!("{}<={}", joined(pos, ""), joined(neg, "")),
                Op::Ln => format!("ln({})", self.to_infix(pos[0])),
                Op::Exp => format!("exp({})", self.to_infix(pos[0])),
                Op::Sin => format!("sin({})", self.to_infix(pos[0])),
                Op::Cos => format!("cos({})", self.to_infix(pos[0])),
                Op::Sinh => format!("sinh({})", self.to_infix(pos[0])),
                Op::Cosh => format!("cosh({})", self.to_infix(pos[0])),
                Op::Sqrt => format!("sqrt({})", self.to_infix(pos[0])),
            },
        }
    }

    /// Build an operation node, flattening nested Add into Add and Mul
    /// into Mul so `a+b+c` and `a*b*c` are single n-ary groups.
    pub fn op(&self, op: Op, pos: &[NodeId], neg: &[NodeId]) -> NodeId {
        debug_assert!(op.two_group() || neg.is_empty());
        let mut flat_pos: ArgGroup = smallvec![];
        if op.flattens() {
            for &arg in pos {
                match self.node(arg) {
                    Node::Operation {
                        op: inner_op,
                        pos: inner_pos,
                        neg: inner_neg,
                    } if inner_op == op && inner_neg.is_empty() => {
                        flat_pos.extend_from_slice(&inner_pos);
                    }
                    _ => flat_pos.push(arg),
                }
            }
        } else {
            flat_pos.extend_from_slice(pos);
        }
        self.insert_anonymous(Node::Operation {
            op,
            pos: flat_pos,
            neg: neg.iter().copied().collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::ErrorCode;

    fn var(cache: &SubexpressionCache, name: &str) -> NodeId {
        cache.variable(
            ValueId::global(name).unwrap(),
            name,
            VariableKind::Flow,
        )
    }

    #[test]
    fn test_insert_anonymous_deduplicates() {
        let cache = SubexpressionCache::new();
        let a = var(&cache, "a");
        let b = var(&cache, "b");

        let x = cache.op(Op::Add, &[a, b], &[]);
        let y = cache.op(Op::Add, &[a, b], &[]);
        assert_eq!(x, y);

        // order within a group is significant
        let z = cache.op(Op::Add, &[b, a], &[]);
        assert_ne!(x, z);

        // a different operator is a different entry
        let w = cache.op(Op::Mul, &[a, b], &[]);
        assert_ne!(x, w);
    }

    #[test]
    fn test_constants_dedupe_to_canonical_zero_one() {
        let cache = SubexpressionCache::new();
        assert_eq!(cache.insert_anonymous(Node::constant(0.0)), cache.zero());
        assert_eq!(cache.insert_anonymous(Node::constant(1.0)), cache.one());
        assert_ne!(cache.insert_anonymous(Node::constant(2.0)), cache.zero());
    }

    #[test]
    fn test_reverse_lookup_fails_for_unpublished() {
        let cache = SubexpressionCache::new();
        let node = Node::constant(7.5);
        let err = cache.reverse_lookup(&node).unwrap_err();
        assert_eq!(err.code, ErrorCode::CacheLookupFailed);

        let id = cache.insert_anonymous(node.clone());
        assert_eq!(cache.reverse_lookup(&node).unwrap(), id);
    }

    #[test]
    fn test_add_and_mul_flatten() {
        let cache = SubexpressionCache::new();
        let a = var(&cache, "a");
        let b = var(&cache, "b");
        let c = var(&cache, "c");

        let ab = cache.op(Op::Add, &[a, b], &[]);
        let abc = cache.op(Op::Add, &[ab, c], &[]);
        assert_eq!(cache.node(abc).group(Side::Positive), &[a, b, c]);

        let ab = cache.op(Op::Mul, &[a, b], &[]);
        let abc = cache.op(Op::Mul, &[c, ab], &[]);
        assert_eq!(cache.node(abc).group(Side::Positive), &[c, a, b]);
    }

    #[test]
    fn test_sub_does_not_flatten_into_groups() {
        let cache = SubexpressionCache::new();
        let a = var(&cache, "a");
        let b = var(&cache, "b");
        let c = var(&cache, "c");

        let ab = cache.op(Op::Sub, &[a], &[b]);
        let abc = cache.op(Op::Sub, &[ab], &[c]);
        assert_eq!(cache.node(abc).group(Side::Positive), &[ab]);
        assert_eq!(cache.node(abc).group(Side::Negative), &[c]);
    }

    #[test]
    fn test_order_counts_variable_hops() {
        let cache = SubexpressionCache::new();
        // v0.rhs = v1, v1.rhs = v2, v2.rhs = None
        let v2 = var(&cache, "v2");
        let v1 = var(&cache, "v1");
        let v0 = var(&cache, "v0");
        cache.set_rhs(v1, v2).unwrap();
        cache.set_rhs(v0, v1).unwrap();

        assert_eq!(cache.order(v2, 10).unwrap(), 0);
        assert_eq!(cache.order(v0, 3).unwrap(), 2);
        // exactly N+1 budget suffices for a chain of depth N
        assert_eq!(cache.order(v0, 2).unwrap(), 2);
    }

    #[test]
    fn test_order_detects_cycles() {
        let cache = SubexpressionCache::new();
        let v0 = var(&cache, "v0");
        let v1 = var(&cache, "v1");
        cache.set_rhs(v0, v1).unwrap();
        cache.set_rhs(v1, v0).unwrap();

        for budget in 0..8 {
            let err = cache.order(v0, budget).unwrap_err();
            assert_eq!(err.code, ErrorCode::CircularDependency);
        }
    }

    #[test]
    fn test_operations_do_not_consume_budget() {
        let cache = SubexpressionCache::new();
        let a = var(&cache, "a");
        let b = var(&cache, "b");
        // deep operation tree over order-0 variables still orders with
        // a tiny budget
        let mut e = cache.op(Op::Add, &[a, b], &[]);
        for _ in 0..32 {
            e = cache.op(Op::Mul, &[e, a], &[]);
        }
        assert_eq!(cache.order(e, 1).unwrap(), 0);
    }

    #[test]
    fn test_to_infix_brackets_by_bodmas() {
        let cache = SubexpressionCache::new();
        let a = var(&cache, "a");
        let b = var(&cache, "b");
        let c = var(&cache, "c");

        let sum = cache.op(Op::Add, &[a, b], &[]);
        let prod = cache.op(Op::Mul, &[sum, c], &[]);
        assert_eq!(cache.to_infix(prod), "(a+b)*c");

        let quot = cache.op(Op::Div, &[a], &[sum]);
        assert_eq!(cache.to_infix(quot), "a/(a+b)");
    }
}
