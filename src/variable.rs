// Copyright 2025 The Godley Engine Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

use std::collections::{HashMap, HashSet};

use crate::common::{Result, ValueId};
use crate::model_err;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum VariableKind {
    Stock,
    Flow,
    TempFlow,
    Integral,
    Constant,
    Undefined,
}

/// Which of the two flat storage segments a value lives in.
///
/// Stocks and integrals are advanced by the external integrator; every
/// other kind is recomputed each step from the equation DAG.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Segment {
    Stock,
    Flow,
}

/// A concrete storage slot: which segment, and the offset within it.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Addr {
    pub segment: Segment,
    pub idx: usize,
}

/// Storage descriptor for a single variable: where (and whether) it is
/// allocated in the value vector, and how its initial value is defined.
#[derive(Clone, Debug, PartialEq)]
pub struct VariableValue {
    kind: VariableKind,
    /// slot offset in the value vector; `None` until allocated
    pub idx: Option<usize>,
    /// constant or symbolic (valueId reference) initial value
    pub init: String,
    pub name: String,
    /// true if a Godley table supplies this variable's value, overriding
    /// a locally computed rhs
    pub godley_overridden: bool,
}

impl VariableValue {
    pub fn new(kind: VariableKind, name: &str, init: &str) -> Self {
        VariableValue {
            kind,
            idx: None,
            init: init.to_owned(),
            name: name.to_owned(),
            godley_overridden: false,
        }
    }

    pub fn kind(&self) -> VariableKind {
        self.kind
    }

    /// variable has an input port
    pub fn lhs(&self) -> bool {
        matches!(self.kind, VariableKind::Flow | VariableKind::TempFlow)
    }

    /// variable is a temporary
    pub fn temp(&self) -> bool {
        matches!(self.kind, VariableKind::TempFlow | VariableKind::Undefined)
    }

    /// true if this variable's data is allocated on the flow segment
    pub fn is_flow_var(&self) -> bool {
        !matches!(self.kind, VariableKind::Stock | VariableKind::Integral)
    }

    pub fn segment(&self) -> Segment {
        if self.is_flow_var() {
            Segment::Flow
        } else {
            Segment::Stock
        }
    }

    /// The storage slot this variable occupies, if allocated.
    pub fn addr(&self) -> Option<Addr> {
        self.idx.map(|idx| Addr {
            segment: self.segment(),
            idx,
        })
    }

    /// Allocate space in the value vector, if not already allocated.
    pub fn alloc_value(&mut self, values: &mut ValueVector) -> usize {
        match self.idx {
            Some(idx) => idx,
            None => {
                let idx = values.alloc(self.segment());
                self.idx = Some(idx);
                idx
            }
        }
    }
}

/// Flat numeric storage for all variables, partitioned into the stock
/// segment (integrated by the external stepper) and the flow segment
/// (recomputed every step).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ValueVector {
    pub stock_vars: Vec<f64>,
    pub flow_vars: Vec<f64>,
}

impl ValueVector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, segment: Segment) -> usize {
        let seg = self.segment_mut(segment);
        seg.push(0.0);
        seg.len() - 1
    }

    pub fn segment(&self, segment: Segment) -> &[f64] {
        match segment {
            Segment::Stock => &self.stock_vars,
            Segment::Flow => &self.flow_vars,
        }
    }

    pub fn segment_mut(&mut self, segment: Segment) -> &mut Vec<f64> {
        match segment {
            Segment::Stock => &mut self.stock_vars,
            Segment::Flow => &mut self.flow_vars,
        }
    }
}

/// Registry of every `VariableValue` in the system, keyed by valueId.
///
/// Constructed with the special `constant:zero` and `constant:one`
/// entries used by the derivative operator.
#[derive(Clone, Debug, PartialEq)]
pub struct VariableValues {
    map: HashMap<ValueId, VariableValue>,
}

impl Default for VariableValues {
    fn default() -> Self {
        Self::new()
    }
}

impl VariableValues {
    pub fn new() -> Self {
        let mut v = VariableValues {
            map: HashMap::new(),
        };
        v.clear();
        v
    }

    pub fn clear(&mut self) {
        self.map.clear();
        // special values for zero and one, used by the derivative operator
        self.map.insert(
            ValueId::literal("zero").unwrap(),
            VariableValue::new(VariableKind::Constant, "zero", "0"),
        );
        self.map.insert(
            ValueId::literal("one").unwrap(),
            VariableValue::new(VariableKind::Constant, "one", "1"),
        );
    }

    pub fn insert(&mut self, id: ValueId, value: VariableValue) -> Option<VariableValue> {
        self.map.insert(id, value)
    }

    pub fn get<Q>(&self, id: &Q) -> Option<&VariableValue>
    where
        ValueId: std::borrow::Borrow<Q>,
        Q: std::hash::Hash + Eq + ?Sized,
    {
        self.map.get(id)
    }

    pub fn get_mut<Q>(&mut self, id: &Q) -> Option<&mut VariableValue>
    where
        ValueId: std::borrow::Borrow<Q>,
        Q: std::hash::Hash + Eq + ?Sized,
    {
        self.map.get_mut(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ValueId, &VariableValue)> {
        self.map.iter()
    }

    /// Generate a name not otherwise in the system, based on `name`.
    /// Fails if `name` cannot form a valid valueId at all.
    pub fn new_name(&self, scope: Option<u32>, name: &str) -> Result<ValueId> {
        let mk = |name: &str| match scope {
            Some(scope) => ValueId::scoped(scope, name),
            None => ValueId::global(name),
        };
        let id = mk(name)?;
        if !self.map.contains_key(&id) {
            return Ok(id);
        }
        // a valid base stays valid with a numeric suffix
        for i in 1.. {
            let id = mk(&format!("{name}_{i}"))?;
            if !self.map.contains_key(&id) {
                return Ok(id);
            }
        }
        unreachable!();
    }

    /// Check that all entry keys satisfy the valueId grammar.
    pub fn valid_entries(&self) -> bool {
        self.map.keys().all(|k| ValueId::is_valid(k.as_str()))
    }

    /// Evaluate the initial value of `id`, chasing symbolic references.
    /// `visited` detects circular initial-value definitions.
    fn init_value(&self, id: &ValueId, visited: &mut HashSet<ValueId>) -> Result<f64> {
        if !visited.insert(id.clone()) {
            return model_err!(CircularDependency, id.to_string());
        }
        let Some(vv) = self.map.get(id) else {
            return model_err!(DoesNotExist, id.to_string());
        };
        let init = vv.init.trim();
        if init.is_empty() {
            return Ok(0.0);
        }
        if let Ok(n) = init.parse::<f64>() {
            return Ok(n);
        }
        let referent = ValueId::parse(init)?;
        self.init_value(&referent, visited)
    }

    /// Re-evaluate every allocated variable's initial value into the
    /// value vector.
    pub fn reset(&self, values: &mut ValueVector) -> Result<()> {
        for (id, vv) in self.map.iter() {
            if let Some(idx) = vv.idx {
                let mut visited = HashSet::new();
                let v = self.init_value(id, &mut visited)?;
                values.segment_mut(vv.segment())[idx] = v;
            }
        }
        Ok(())
    }
}
