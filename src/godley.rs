// Copyright 2025 The Godley Engine Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

use std::collections::HashSet;

use float_cmp::approx_eq;

use crate::common::{Result, ValueId};
use crate::sim_err;
use crate::variable::{ValueVector, VariableKind, VariableValue, VariableValues};

/// Access to a Godley table's structure, implemented by the table
/// editor: stock rows, flow columns, raw cell text, per-column sign
/// convention, and which rows hold initial conditions.
pub trait GodleySource {
    fn rows(&self) -> usize;
    fn cols(&self) -> usize;
    /// raw text of the cell at (row, col); empty cells contribute
    /// nothing
    fn cell(&self, row: usize, col: usize) -> &str;
    /// liability/equity columns carry a reversed sign convention
    fn sign_convention_reversed(&self, col: usize) -> bool;
    /// initial-condition rows set stocks once instead of accumulating
    /// every step
    fn initial_condition_row(&self, row: usize) -> bool;
    /// valueId of the stock variable labelling `row`
    fn stock_value_id(&self, row: usize) -> Option<ValueId>;
    /// valueId of the flow variable labelling `col`
    fn flow_value_id(&self, col: usize) -> Option<ValueId>;
}

/// A parsed Godley cell: a signed numeric coefficient and an optional
/// flow-variable name, e.g. `dr`, `-dr`, `2*dr`, `-0.5`.
#[derive(Clone, Debug, PartialEq)]
pub struct FlowCoef {
    pub coef: f64,
    pub name: String,
}

impl FlowCoef {
    pub fn parse(text: &str) -> Result<Self> {
        let mut rest = text.trim();
        let mut sign = 1.0;
        while let Some(stripped) = rest.strip_prefix(['+', '-']) {
            if rest.starts_with('-') {
                sign = -sign;
            }
            rest = stripped.trim_start();
        }
        let digits = rest
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .unwrap_or(rest.len());
        let mut coef = sign;
        if digits > 0 {
            let Ok(n) = rest[..digits].parse::<f64>() else {
                return sim_err!(BadTable, text.to_owned());
            };
            coef *= n;
            rest = rest[digits..].trim_start();
            rest = rest.strip_prefix('*').unwrap_or(rest);
        }
        Ok(FlowCoef {
            coef,
            name: rest.trim().to_owned(),
        })
    }
}

/// Compiled form of a Godley table: a coordinate-list (COO) sparse
/// matrix mapping flow values to stock deltas, applied once per step.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GodleyEvaluator {
    /// stock (destination) index per coefficient
    sidx: Vec<usize>,
    /// flow (source) index per coefficient
    fidx: Vec<usize>,
    coef: Vec<f64>,
    /// stock indices zeroed before accumulation: stocks wholly defined
    /// by the table's flows, as opposed to stocks with an initial or
    /// external definition
    zero_init_idx: Vec<usize>,
}

impl GodleyEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Walk the table once, resolving each non-empty cell to a
    /// (stock, flow, coefficient) entry.  Initial-condition rows set
    /// the stock's initial value instead of joining the runtime list.
    pub fn init(
        &mut self,
        table: &impl GodleySource,
        variables: &mut VariableValues,
        vector: &mut ValueVector,
    ) -> Result<()> {
        self.sidx.clear();
        self.fidx.clear();
        self.coef.clear();
        self.zero_init_idx.clear();

        let mut ic_stocks: HashSet<usize> = HashSet::new();

        for row in 0..table.rows() {
            let Some(stock_id) = table.stock_value_id(row) else {
                continue;
            };
            let stock_idx = {
                if variables.get(&stock_id).is_none() {
                    variables.insert(
                        stock_id.clone(),
                        VariableValue::new(VariableKind::Stock, stock_id.name(), ""),
                    );
                }
                let vv = variables
                    .get_mut(&stock_id)
                    .expect("just inserted stock variable");
                vv.godley_overridden = true;
                vv.alloc_value(vector)
            };

            for col in 0..table.cols() {
                let text = table.cell(row, col).trim();
                if text.is_empty() {
                    continue;
                }
                let parsed = FlowCoef::parse(text)?;
                let coef = if table.sign_convention_reversed(col) {
                    -parsed.coef
                } else {
                    parsed.coef
                };
                if approx_eq!(f64, coef, 0.0) {
                    continue;
                }

                if table.initial_condition_row(row) {
                    // set once at start, never accumulated
                    if !parsed.name.is_empty() {
                        return sim_err!(
                            BadTable,
                            format!("initial condition '{text}' must be numeric")
                        );
                    }
                    let vv = variables
                        .get_mut(&stock_id)
                        .expect("stock variable resolved above");
                    vv.init = format!("{coef}");
                    ic_stocks.insert(stock_idx);
                    continue;
                }

                let Some(flow_id) = table.flow_value_id(col) else {
                    return sim_err!(BadTable, format!("column {col} has no flow variable"));
                };
                if !parsed.name.is_empty() && parsed.name != flow_id.name() {
                    return sim_err!(
                        BadTable,
                        format!(
                            "cell '{text}' names a flow other than column '{}'",
                            flow_id.name()
                        )
                    );
                }
                let flow_idx = {
                    if variables.get(&flow_id).is_none() {
                        variables.insert(
                            flow_id.clone(),
                            VariableValue::new(VariableKind::Flow, flow_id.name(), ""),
                        );
                    }
                    let vv = variables
                        .get_mut(&flow_id)
                        .expect("just inserted flow variable");
                    vv.alloc_value(vector)
                };

                self.sidx.push(stock_idx);
                self.fidx.push(flow_idx);
                self.coef.push(coef);
            }
        }

        let mut seen = HashSet::new();
        for &s in &self.sidx {
            if seen.insert(s) && !ic_stocks.contains(&s) {
                self.zero_init_idx.push(s);
            }
        }
        Ok(())
    }

    /// Accumulate the net flow into every stock implied by the table's
    /// double-entry structure:
    /// `sv[sidx[i]] += coef[i] * fv[fidx[i]]` after zero-init.
    pub fn eval(&self, sv: &mut [f64], fv: &[f64]) {
        for &i in &self.zero_init_idx {
            sv[i] = 0.0;
        }
        for k in 0..self.sidx.len() {
            sv[self.sidx[k]] += self.coef[k] * fv[self.fidx[k]];
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sidx.is_empty()
    }

    pub fn len(&self) -> usize {
        self.sidx.len()
    }
}

/// An owned Godley table, the simplest `GodleySource`: stock-labelled
/// rows, flow-labelled columns, and a grid of cell text.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GodleyTable {
    stocks: Vec<Option<ValueId>>,
    flows: Vec<ValueId>,
    cells: Vec<Vec<String>>,
    reversed: Vec<bool>,
    initial: Vec<bool>,
}

impl GodleyTable {
    pub fn new(flows: Vec<ValueId>) -> Self {
        let cols = flows.len();
        GodleyTable {
            stocks: Vec::new(),
            flows,
            cells: Vec::new(),
            reversed: vec![false; cols],
            initial: Vec::new(),
        }
    }

    pub fn set_sign_reversed(&mut self, col: usize, reversed: bool) {
        self.reversed[col] = reversed;
    }

    pub fn push_row(&mut self, stock: ValueId, cells: &[&str]) {
        self.push(Some(stock), cells, false);
    }

    pub fn push_initial_condition_row(&mut self, stock: ValueId, cells: &[&str]) {
        self.push(Some(stock), cells, true);
    }

    fn push(&mut self, stock: Option<ValueId>, cells: &[&str], initial: bool) {
        assert_eq!(cells.len(), self.flows.len());
        self.stocks.push(stock);
        self.cells
            .push(cells.iter().map(|c| (*c).to_owned()).collect());
        self.initial.push(initial);
    }
}

impl GodleySource for GodleyTable {
    fn rows(&self) -> usize {
        self.stocks.len()
    }

    fn cols(&self) -> usize {
        self.flows.len()
    }

    fn cell(&self, row: usize, col: usize) -> &str {
        &self.cells[row][col]
    }

    fn sign_convention_reversed(&self, col: usize) -> bool {
        self.reversed[col]
    }

    fn initial_condition_row(&self, row: usize) -> bool {
        self.initial[row]
    }

    fn stock_value_id(&self, row: usize) -> Option<ValueId> {
        self.stocks[row].clone()
    }

    fn flow_value_id(&self, col: usize) -> Option<ValueId> {
        self.flows.get(col).cloned()
    }
}
