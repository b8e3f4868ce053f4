// Copyright 2025 The Godley Engine Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! End-to-end tests driving the whole pipeline: build an equation DAG,
//! order it, compile it to an op sequence, and step the value vector
//! with forward Euler the way an external integrator would.

use float_cmp::approx_eq;
use proptest::prelude::*;

use godley_engine::{
    Compiler, Differentiator, Expr, GodleyEvaluator, GodleyTable, SubexpressionCache, ValueId,
    ValueVector, VariableKind, VariableValues, eval,
};

fn flow<'a>(cache: &'a SubexpressionCache, name: &str) -> Expr<'a> {
    let id = ValueId::global(name).unwrap();
    Expr::wrap(cache, cache.variable(id, name, VariableKind::Flow))
}

#[test]
fn exponential_growth_matches_euler_recurrence() {
    let cache = SubexpressionCache::new();

    // dy/dt = 0.5 * y, y(0) = 1
    let y_id = ValueId::global("y").unwrap();
    let y = Expr::wrap(&cache, cache.variable(y_id.clone(), "y", VariableKind::Stock));
    let f = flow(&cache, "growth");
    cache.set_rhs(f.id(), (0.5 * y).id()).unwrap();
    cache.set_integral_input(y_id.clone(), f.id());

    // 2 variables in the system bounds the definition depth
    assert_eq!(cache.order(f.id(), 2).unwrap(), 1);

    let mut variables = VariableValues::new();
    let mut vector = ValueVector::new();
    let mut compiler = Compiler::new(&cache, &mut variables, &mut vector);
    let mut ops = Vec::new();
    let f_loc = compiler.add_eval_ops(f.id(), &mut ops, None).unwrap();

    variables.get_mut(&y_id).unwrap().init = "1".to_owned();
    variables.reset(&mut vector).unwrap();

    let y_idx = variables.get(&y_id).unwrap().idx.unwrap();
    let f_idx = f_loc.idx.unwrap();

    let dt = 0.125;
    let mut expected = 1.0;
    for _ in 0..32 {
        eval(&ops, &mut vector);
        vector.stock_vars[y_idx] += dt * vector.flow_vars[f_idx];
        expected *= 1.0 + 0.5 * dt;
        assert!(approx_eq!(f64, vector.stock_vars[y_idx], expected, ulps = 4));
    }
}

#[test]
fn godley_table_conserves_double_entry_balance() {
    let cache = SubexpressionCache::new();

    // a bank lends a constant 10 per unit time: cash shrinks, loans grow
    let lend = flow(&cache, "lend");
    cache
        .set_rhs(lend.id(), Expr::constant(&cache, 10.0).id())
        .unwrap();

    let mut table = GodleyTable::new(vec![ValueId::global("lend").unwrap()]);
    table.push_row(ValueId::global("cash").unwrap(), &["-lend"]);
    table.push_row(ValueId::global("loans").unwrap(), &["lend"]);

    let mut variables = VariableValues::new();
    let mut vector = ValueVector::new();
    let mut godley = GodleyEvaluator::new();
    godley.init(&table, &mut variables, &mut vector).unwrap();

    let mut compiler = Compiler::new(&cache, &mut variables, &mut vector);
    let mut ops = Vec::new();
    compiler.add_eval_ops(lend.id(), &mut ops, None).unwrap();

    variables.get_mut(":cash").unwrap().init = "100".to_owned();
    variables.reset(&mut vector).unwrap();

    let cash_idx = variables.get(":cash").unwrap().idx.unwrap();
    let loans_idx = variables.get(":loans").unwrap().idx.unwrap();

    let dt = 1.0;
    let mut deltas = vec![0.0; vector.stock_vars.len()];
    for _ in 0..3 {
        eval(&ops, &mut vector);
        godley.eval(&mut deltas, &vector.flow_vars);
        for (stock, delta) in vector.stock_vars.iter_mut().zip(&deltas) {
            *stock += dt * delta;
        }
    }

    assert!(approx_eq!(f64, vector.stock_vars[cash_idx], 70.0));
    assert!(approx_eq!(f64, vector.stock_vars[loans_idx], 30.0));
    // double entry: every lend leaves the total unchanged
    assert!(approx_eq!(
        f64,
        vector.stock_vars[cash_idx] + vector.stock_vars[loans_idx],
        100.0
    ));
}

#[test]
fn symbolic_derivative_agrees_with_numeric_evaluation() {
    let cache = SubexpressionCache::new();

    // y is a stock fed by growth = 0.5*y, so d(y*y)/dt = 2*y*(0.5*y)
    let y_id = ValueId::global("y").unwrap();
    let y = Expr::wrap(&cache, cache.variable(y_id.clone(), "y", VariableKind::Stock));
    let f = flow(&cache, "growth");
    cache.set_rhs(f.id(), (0.5 * y).id()).unwrap();
    cache.set_integral_input(y_id.clone(), f.id());

    let e = y * y;
    let de = Differentiator::new(&cache).derivative(e.id()).unwrap();

    let mut variables = VariableValues::new();
    let mut vector = ValueVector::new();
    let mut compiler = Compiler::new(&cache, &mut variables, &mut vector);
    let mut ops = Vec::new();
    let de_loc = compiler.add_eval_ops(de, &mut ops, None).unwrap();

    variables.get_mut(&y_id).unwrap().init = "3".to_owned();
    variables.reset(&mut vector).unwrap();
    eval(&ops, &mut vector);

    let expected = 2.0 * 3.0 * (0.5 * 3.0);
    assert!(approx_eq!(
        f64,
        vector.flow_vars[de_loc.idx.unwrap()],
        expected
    ));
}

proptest! {
    #[test]
    fn scoped_value_ids_satisfy_the_grammar(
        scope in 0u32..1000,
        name in "[a-z][a-z0-9_]{0,11}",
    ) {
        let id = ValueId::scoped(scope, &name).unwrap();
        prop_assert!(ValueId::is_valid(id.as_str()));
        prop_assert_eq!(id.scope(), Some(scope));
        prop_assert_eq!(id.name(), name.as_str());
    }

    #[test]
    fn names_with_whitespace_or_colons_are_rejected(
        name in "[a-z]{1,4}[ :\\\\][a-z]{1,4}",
    ) {
        prop_assert!(ValueId::global(&name).is_err());
        prop_assert!(ValueId::scoped(7, &name).is_err());
    }
}
