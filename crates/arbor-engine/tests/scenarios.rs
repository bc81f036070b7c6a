//! End-to-end flows: author a template, compile it, create live entities,
//! and evaluate calculations through the store.

use arbor_engine::{
    compile_template, EvalErrorKind, Evaluator, InstanceStore, MemoryStore, Value,
};
use arbor_model::{
    AttributeDef, AttributeDefId, CalculationDef, CalculationDefId, DataType, Entity, EntityDefId,
    Expr, Formula, RefToken, Scalar, Template,
};
use pretty_assertions::assert_eq;

struct Fixture {
    template: Template,
    trunk: EntityDefId,
    line: EntityDefId,
    item: EntityDefId,
    policy_factor: AttributeDefId,
    book_label: AttributeDefId,
    base_cost: AttributeDefId,
    replacement_cost: AttributeDefId,
    adjusted_cost: CalculationDefId,
    building_total: CalculationDefId,
    building_count: CalculationDefId,
    twice_total: CalculationDefId,
    cost_note: CalculationDefId,
}

fn fixture() -> Fixture {
    let mut template = Template::new("Policies", "Policy Book");
    let trunk = template.trunk_id();
    let policy_factor = template
        .add_attribute(
            trunk,
            AttributeDef::new(trunk, "Policy Factor", DataType::Percentage),
        )
        .unwrap();
    let book_label = template
        .add_attribute(trunk, AttributeDef::new(trunk, "Book Label", DataType::ShortText))
        .unwrap();

    let line = template.add_child_entity(trunk, "Coverage Line").unwrap();
    let base_cost = template
        .add_attribute(line, AttributeDef::new(line, "Base Cost", DataType::Decimal))
        .unwrap();

    let item = template.add_child_entity(line, "Building Item").unwrap();
    let replacement_cost = template
        .add_attribute(
            item,
            AttributeDef::new(item, "Replacement Cost", DataType::Decimal),
        )
        .unwrap();
    template
        .add_calculation(
            item,
            CalculationDef::new(
                item,
                "Twice Cost",
                DataType::Decimal,
                ".replacement_cost * 2",
            ),
        )
        .unwrap();

    let adjusted_cost = template
        .add_calculation(
            line,
            CalculationDef::new(
                line,
                "Adjusted Cost",
                DataType::Decimal,
                "IF(..policy_factor > 0.5, .base_cost, .base_cost * 2)",
            ),
        )
        .unwrap();
    let building_total = template
        .add_calculation(
            line,
            CalculationDef::new(
                line,
                "Building Total",
                DataType::Decimal,
                "SUM(.building_item.replacement_cost)",
            ),
        )
        .unwrap();
    let building_count = template
        .add_calculation(
            line,
            CalculationDef::new(
                line,
                "Building Count",
                DataType::WholeNumber,
                "COUNT(.building_item.replacement_cost)",
            ),
        )
        .unwrap();
    let twice_total = template
        .add_calculation(
            line,
            CalculationDef::new(
                line,
                "Twice Total",
                DataType::Decimal,
                "SUM(.building_item.twice_cost)",
            ),
        )
        .unwrap();
    let cost_note = template
        .add_calculation(
            line,
            CalculationDef::new(
                line,
                "Cost Note",
                DataType::ShortText,
                "CONCATENATE(.base_cost, ..book_label)",
            ),
        )
        .unwrap();

    let template = compile_template(&template).unwrap();
    Fixture {
        template,
        trunk,
        line,
        item,
        policy_factor,
        book_label,
        base_cost,
        replacement_cost,
        adjusted_cost,
        building_total,
        building_count,
        twice_total,
        cost_note,
    }
}

/// A policy book with one coverage line and three live building items
/// (replacement costs 1, 2, 3) plus one soft-deleted item.
fn populate(f: &Fixture, factor: f64) -> (MemoryStore, arbor_model::EntityId) {
    let mut store = MemoryStore::new();
    let book = store.insert(
        Entity::new(f.trunk, None)
            .with_value(f.policy_factor, factor)
            .with_value(f.book_label, "Standard Book"),
    );
    let line = store.insert(
        Entity::new(f.line, Some(book)).with_value(f.base_cost, 100.0),
    );
    for cost in [1.0, 2.0, 3.0] {
        store.insert(Entity::new(f.item, Some(line)).with_value(f.replacement_cost, cost));
    }
    let mut deleted = Entity::new(f.item, Some(line)).with_value(f.replacement_cost, 99.0);
    deleted.deleted = true;
    store.insert(deleted);
    (store, line)
}

#[test]
fn conditional_on_an_uncle_attribute_takes_the_then_branch() {
    let f = fixture();
    let (store, line) = populate(&f, 0.7);
    let evaluator = Evaluator::new(&f.template, &store);
    assert_eq!(
        evaluator.evaluate(line, f.adjusted_cost),
        Ok(Value::Number(100.0))
    );
}

#[test]
fn conditional_takes_the_else_branch_below_the_threshold() {
    let f = fixture();
    let (store, line) = populate(&f, 0.4);
    let evaluator = Evaluator::new(&f.template, &store);
    assert_eq!(
        evaluator.evaluate(line, f.adjusted_cost),
        Ok(Value::Number(200.0))
    );
}

#[test]
fn fan_out_aggregates_live_children_only() {
    let f = fixture();
    let (store, line) = populate(&f, 0.7);
    let evaluator = Evaluator::new(&f.template, &store);
    assert_eq!(
        evaluator.evaluate(line, f.building_total),
        Ok(Value::Number(6.0))
    );
    assert_eq!(
        evaluator.evaluate(line, f.building_count),
        Ok(Value::Number(3.0))
    );
}

#[test]
fn fan_out_recurses_into_child_calculations() {
    let f = fixture();
    let (store, line) = populate(&f, 0.7);
    let evaluator = Evaluator::new(&f.template, &store);
    assert_eq!(
        evaluator.evaluate(line, f.twice_total),
        Ok(Value::Number(12.0))
    );
}

#[test]
fn concatenation_reads_self_then_parent() {
    let f = fixture();
    let (store, line) = populate(&f, 0.7);
    let evaluator = Evaluator::new(&f.template, &store);
    assert_eq!(
        evaluator.evaluate(line, f.cost_note),
        Ok(Value::Text("100Standard Book".into()))
    );
}

#[test]
fn literal_only_formulas_are_context_independent() {
    let mut template = Template::new("Constants", "Trunk Node");
    let trunk = template.trunk_id();
    let calc = template
        .add_calculation(
            trunk,
            CalculationDef::new(trunk, "Plain Number", DataType::Decimal, "2 * 3 + 4"),
        )
        .unwrap();
    let template = compile_template(&template).unwrap();

    let mut store = MemoryStore::new();
    let first = store.insert(Entity::new(trunk, None));
    let second = store.insert(Entity::new(trunk, None));

    let evaluator = Evaluator::new(&template, &store);
    assert_eq!(evaluator.evaluate(first, calc), Ok(Value::Number(10.0)));
    assert_eq!(evaluator.evaluate(second, calc), Ok(Value::Number(10.0)));
}

#[test]
fn division_by_zero_is_a_typed_failure() {
    let mut template = Template::new("Failures", "Trunk Node");
    let trunk = template.trunk_id();
    let calc = template
        .add_calculation(
            trunk,
            CalculationDef::new(trunk, "Bad Ratio", DataType::Decimal, "QUOTIENT(1, 0)"),
        )
        .unwrap();
    let template = compile_template(&template).unwrap();

    let mut store = MemoryStore::new();
    let entity = store.insert(Entity::new(trunk, None));
    let evaluator = Evaluator::new(&template, &store);
    let err = evaluator.evaluate(entity, calc).unwrap_err();
    assert_eq!(err.calculation, calc);
    assert_eq!(err.kind, EvalErrorKind::DivisionByZero);
}

#[test]
fn missing_attribute_values_are_not_defaulted() {
    let f = fixture();
    let (mut store, _) = populate(&f, 0.7);
    // A second line with no stored base cost at all.
    let book = store.insert(
        Entity::new(f.trunk, None).with_value(f.policy_factor, 0.9),
    );
    let bare_line = store.insert(Entity::new(f.line, Some(book)));

    let evaluator = Evaluator::new(&f.template, &store);
    let err = evaluator.evaluate(bare_line, f.adjusted_cost).unwrap_err();
    assert_eq!(err.kind, EvalErrorKind::MissingAttribute(f.base_cost));
}

#[test]
fn stored_null_fails_coercion_rather_than_defaulting() {
    let f = fixture();
    let mut store = MemoryStore::new();
    // Below the threshold the else branch multiplies the null.
    let book = store.insert(
        Entity::new(f.trunk, None).with_value(f.policy_factor, 0.4),
    );
    let line = store.insert(
        Entity::new(f.line, Some(book)).with_value(f.base_cost, Scalar::Null),
    );

    let evaluator = Evaluator::new(&f.template, &store);
    let err = evaluator.evaluate(line, f.adjusted_cost).unwrap_err();
    assert!(matches!(err.kind, EvalErrorKind::Coercion { .. }), "{err}");

    // Above it, the then branch passes the stored null through untouched:
    // a real null result, distinct from a failure.
    let book = store.insert(
        Entity::new(f.trunk, None).with_value(f.policy_factor, 0.9),
    );
    let line = store.insert(
        Entity::new(f.line, Some(book)).with_value(f.base_cost, Scalar::Null),
    );
    let evaluator = Evaluator::new(&f.template, &store);
    assert_eq!(evaluator.evaluate(line, f.adjusted_cost), Ok(Value::Null));
}

#[test]
fn count_of_an_empty_child_collection_is_zero() {
    let f = fixture();
    let mut store = MemoryStore::new();
    let book = store.insert(
        Entity::new(f.trunk, None).with_value(f.policy_factor, 0.9),
    );
    let line = store.insert(
        Entity::new(f.line, Some(book)).with_value(f.base_cost, 100.0),
    );

    let evaluator = Evaluator::new(&f.template, &store);
    assert_eq!(
        evaluator.evaluate(line, f.building_count),
        Ok(Value::Number(0.0))
    );
    assert_eq!(
        evaluator.evaluate(line, f.building_total),
        Ok(Value::Number(0.0))
    );
}

#[test]
fn hand_edited_self_reference_trips_the_runtime_guard() {
    // The compile-time cycle check would reject this, so install the
    // compiled tree directly: a calculation that references itself.
    let mut template = Template::new("Loop Test", "Trunk Node");
    let trunk = template.trunk_id();
    let calc = template
        .add_calculation(
            trunk,
            CalculationDef::new(trunk, "Loop Calc", DataType::Decimal, "1"),
        )
        .unwrap();
    template.calculation_mut(calc).unwrap().compiled = Some(Formula::new(vec![Expr::Ref(
        RefToken::Calculation(calc),
    )]));

    let mut store = MemoryStore::new();
    let entity = store.insert(Entity::new(trunk, None));
    let evaluator = Evaluator::new(&template, &store);
    let err = evaluator.evaluate(entity, calc).unwrap_err();
    assert!(
        matches!(err.kind, EvalErrorKind::RecursionCycle { .. }),
        "{err}"
    );
}

#[test]
fn cyclic_instance_links_trip_the_runtime_guard() {
    // Schema-acyclic, but the store links an entity as its own parent, so a
    // child-calculation fan-out revisits the same (entity, calculation).
    let mut template = Template::new("Loop Test", "Trunk Node");
    let trunk = template.trunk_id();
    let calc = template
        .add_calculation(
            trunk,
            CalculationDef::new(trunk, "Loop Calc", DataType::Decimal, "1"),
        )
        .unwrap();
    template.calculation_mut(calc).unwrap().compiled = Some(Formula::new(vec![Expr::Call(
        arbor_model::FuncName::Sum,
        vec![Expr::Ref(RefToken::ChildCalculations(calc))],
    )]));

    let mut store = MemoryStore::new();
    let mut entity = Entity::new(trunk, None);
    entity.parent = Some(entity.id);
    let id = store.insert(entity);

    let evaluator = Evaluator::new(&template, &store);
    let err = evaluator.evaluate(id, calc).unwrap_err();
    assert!(
        matches!(
            err.kind,
            EvalErrorKind::RecursionCycle { .. } | EvalErrorKind::RecursionDepth(_)
        ),
        "{err}"
    );
}

#[test]
fn evaluation_never_touches_the_store_contents() {
    let f = fixture();
    let (store, line) = populate(&f, 0.7);
    let before = store.clone();
    let evaluator = Evaluator::new(&f.template, &store);
    evaluator.evaluate(line, f.building_total).unwrap();
    evaluator.evaluate(line, f.adjusted_cost).unwrap();
    assert_eq!(store.children_of(line).len(), before.children_of(line).len());
}
