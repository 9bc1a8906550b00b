use super::*;
use crate::condition::{Backtrace, FieldTests, Operand, Relation, Test};
use crate::instantiation::PrefKind;

struct Vars {
    symbols: SymbolTable,
    s: SymbolId,
    x: SymbolId,
    y: SymbolId,
    foo: SymbolId,
    bar: SymbolId,
}

fn vars() -> Vars {
    let mut symbols = SymbolTable::new();
    let s = symbols.variable("s");
    let x = symbols.variable("x");
    let y = symbols.variable("y");
    let foo = symbols.str_constant("foo");
    let bar = symbols.str_constant("bar");
    Vars {
        symbols,
        s,
        x,
        y,
        foo,
        bar,
    }
}

fn pos(id: SymbolId, attr: SymbolId, value: SymbolId) -> ChunkCondition {
    ChunkCondition::new(Condition::positive(
        FieldTests::new(Test::literal(id), Test::literal(attr), Test::literal(value)),
        Backtrace::default(),
    ))
}

fn neg(id: SymbolId, attr: SymbolId, value: SymbolId) -> ChunkCondition {
    ChunkCondition::new(Condition::negative(FieldTests::new(
        Test::literal(id),
        Test::literal(attr),
        Test::literal(value),
    )))
}

fn action(id: SymbolId, attr: SymbolId, value: SymbolId) -> Action {
    Action {
        kind: PrefKind::Acceptable,
        id,
        attr,
        value,
        referent: None,
    }
}

fn ids(conds: &[ChunkCondition]) -> Vec<Option<SymbolId>> {
    conds.iter().map(|c| c.variablized.id_referent()).collect()
}

// ========== ORDERING ==========

#[test]
fn conditions_are_ordered_from_the_root() {
    let v = vars();
    let mut conds = vec![pos(v.y, v.bar, v.foo), pos(v.x, v.foo, v.y), pos(v.s, v.foo, v.x)];
    validate(&v.symbols, &mut conds, &[], v.s).expect("connected rule");
    assert_eq!(ids(&conds), vec![Some(v.s), Some(v.x), Some(v.y)]);
}

#[test]
fn negations_go_last() {
    let v = vars();
    let mut conds = vec![neg(v.x, v.bar, v.foo), pos(v.s, v.foo, v.x)];
    validate(&v.symbols, &mut conds, &[], v.s).expect("connected rule");
    assert!(conds[0].variablized.is_positive());
    assert!(!conds[1].variablized.is_positive());
}

// ========== FAILURES ==========

#[test]
fn unreachable_condition_is_dangling() {
    let v = vars();
    let mut conds = vec![pos(v.s, v.foo, v.x), pos(v.y, v.bar, v.foo)];
    let err = validate(&v.symbols, &mut conds, &[], v.s).unwrap_err();
    assert_eq!(
        err,
        ValidationError::Unconnected {
            dangling: vec!["<y>".to_string()]
        }
    );
    assert!(err.is_connectivity());
    let connectivity = connect(&v.symbols, &conds, v.s);
    assert_eq!(connectivity.dangling, vec![1]);
}

#[test]
fn unbound_negation_identifier_is_dangling() {
    let v = vars();
    let mut conds = vec![pos(v.s, v.foo, v.x), neg(v.y, v.bar, v.foo)];
    assert!(matches!(
        validate(&v.symbols, &mut conds, &[], v.s),
        Err(ValidationError::Unconnected { .. })
    ));
}

#[test]
fn empty_lhs_has_no_conditions() {
    let v = vars();
    let mut conds = vec![neg(v.s, v.bar, v.foo)];
    assert_eq!(
        validate(&v.symbols, &mut conds, &[], v.s),
        Err(ValidationError::NoConditions)
    );
}

#[test]
fn unbound_constraint_operand_fails() {
    let v = vars();
    let mut cond = pos(v.s, v.foo, v.x);
    if let Some(tests) = cond.variablized.tests_mut() {
        tests.value.add_constraint(Constraint::Relational {
            relation: Relation::NotEqual,
            operand: Operand::literal(v.y),
        });
    }
    let mut conds = vec![cond];
    assert_eq!(
        validate(&v.symbols, &mut conds, &[], v.s),
        Err(ValidationError::UnboundConstraint {
            variable: "<y>".to_string()
        })
    );
}

#[test]
fn actions_need_bound_or_created_identifiers() {
    let mut v = vars();
    let n = v.symbols.variable("n");
    let red = v.symbols.str_constant("red");
    let mut conds = vec![pos(v.s, v.foo, v.x)];

    let creating = [action(v.s, v.bar, n), action(n, v.foo, red)];
    validate(&v.symbols, &mut conds, &creating, v.s).expect("new identifier is created");

    let floating = [action(v.y, v.foo, red)];
    assert_eq!(
        validate(&v.symbols, &mut conds, &floating, v.s),
        Err(ValidationError::UnconnectedAction {
            variable: "<y>".to_string()
        })
    );
}

#[test]
fn floating_action_is_repairable() {
    let mut v = vars();
    let red = v.symbols.str_constant("red");
    let n = v.symbols.variable("n");
    let conds = vec![pos(v.s, v.foo, v.x)];
    let actions = [
        action(v.x, v.bar, red),
        action(v.y, v.foo, red),
        action(v.s, v.bar, n),
        action(n, v.foo, red),
    ];
    assert_eq!(unconnected_actions(&v.symbols, &conds, &actions, v.s), vec![1]);

    let mut ordered = conds.clone();
    let err = validate(&v.symbols, &mut ordered, &actions, v.s).unwrap_err();
    assert!(err.is_connectivity());
}

#[test]
fn dangling_identifiers_come_from_instantiated_halves() {
    let mut v = vars();
    let z1 = v.symbols.new_identifier('Z');
    let mut cond = pos(v.y, v.bar, v.foo);
    cond.instantiated = Condition::positive(
        FieldTests::new(Test::literal(z1), Test::literal(v.bar), Test::literal(v.foo)),
        Backtrace::default(),
    );
    let conds = vec![pos(v.s, v.foo, v.x), cond];
    assert_eq!(dangling_identifiers(&v.symbols, &conds, v.s), vec![z1]);
}
