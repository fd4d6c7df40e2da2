mod common;

use common::{calculated_line_items, line_item_sheet, rows};
use formula_facets::{FacetError, Selected, Sheet, Value};
use pretty_assertions::assert_eq;

#[test]
fn select_from_where_yields_matching_values() {
    let table = calculated_line_items(&line_item_sheet());

    let selected = table
        .select(&["line_cost"])
        .unwrap()
        .from(["default"])
        .filter(|row| Ok(row.number("quantity")? > 2.0))
        .rows()
        .unwrap();

    assert_eq!(selected, vec![Selected::Value(Value::from(12.0))]);
}

#[test]
fn tuples_follow_schema_order() {
    let table = calculated_line_items(&line_item_sheet());

    let selected = table
        .select(&["line_cost", "quantity", "line_cost"])
        .unwrap()
        .rows()
        .unwrap();

    assert_eq!(
        selected,
        vec![
            Selected::Tuple(vec![Value::from(2.0), Value::from(10.0)]),
            Selected::Tuple(vec![Value::from(3.0), Value::from(12.0)]),
        ]
    );
}

#[test]
fn no_columns_selects_whole_rows() {
    let table = calculated_line_items(&line_item_sheet());

    let first = table.select(&[]).unwrap().into_iter().next().unwrap().unwrap();
    assert_eq!(
        first,
        Selected::Row(vec![
            Value::from(2.0),
            Value::from(5.0),
            Value::from(8.0),
            Value::from(10.0),
            Value::from(16.0),
        ])
    );
    assert_eq!(first.into_value(), Value::from(2.0));
}

#[test]
fn unknown_columns_fail_up_front() {
    let table = calculated_line_items(&line_item_sheet());
    assert_eq!(
        table.select(&["quantity", "colour", "size"]).unwrap_err(),
        FacetError::InvalidColumn("colour, size".to_string())
    );
}

#[test]
fn predicates_short_circuit_in_order() {
    let table = calculated_line_items(&line_item_sheet());

    let none = table
        .select(&["quantity"])
        .unwrap()
        .filter(|_| Ok(false))
        .filter(|row| row.get("missing").map(|_| true))
        .rows()
        .unwrap();
    assert!(none.is_empty());

    let failed = table
        .select(&["quantity"])
        .unwrap()
        .filter(|row| row.at(42).map(|_| true))
        .rows();
    assert!(matches!(failed, Err(FacetError::InvalidColumn(_))));
}

#[test]
fn predicates_address_cells_by_index() {
    let table = calculated_line_items(&line_item_sheet());

    let selected: Vec<Value> = table
        .select(&["line_offer"])
        .unwrap()
        .filter(|row| Ok(row.at(1)? == &Value::from(5.0)))
        .into_iter()
        .map(|item| item.unwrap().into_value())
        .collect();

    assert_eq!(selected, vec![Value::from(16.0)]);
}

#[test]
fn from_visits_populations_in_table_order() {
    let table = Sheet::new(["a"]).new_table().unwrap();
    table.load_population(rows(&[&[1.0]]), "early").unwrap();
    table.load_population(rows(&[&[2.0], &[3.0]]), "late").unwrap();
    table.load_population(rows(&[&[4.0]]), "ignored").unwrap();

    let values: Vec<Value> = table
        .select(&["a"])
        .unwrap()
        .from(["late", "early"])
        .rows()
        .unwrap()
        .into_iter()
        .map(Selected::into_value)
        .collect();

    assert_eq!(
        values,
        vec![Value::from(1.0), Value::from(2.0), Value::from(3.0)]
    );
}

#[test]
fn is_empty_reports_whether_anything_matches() {
    let table = calculated_line_items(&line_item_sheet());

    assert!(!table.select(&["quantity"]).unwrap().is_empty().unwrap());
    assert!(table
        .select(&["quantity"])
        .unwrap()
        .filter(|row| Ok(row.number("quantity")? > 100.0))
        .is_empty()
        .unwrap());
    assert!(table
        .select(&[])
        .unwrap()
        .from(["missing"])
        .is_empty()
        .unwrap());
}

#[test]
fn a_live_iterator_blocks_writes() {
    let table = calculated_line_items(&line_item_sheet());

    let mut iter = table.select(&["quantity"]).unwrap().into_iter();
    assert_eq!(iter.next().unwrap().unwrap(), Selected::Value(Value::from(2.0)));
    assert!(matches!(
        table.set_cell(0, "quantity", 5.0),
        Err(FacetError::Reentrant(_))
    ));
    drop(iter);

    table.set_cell(0, "quantity", 5.0).unwrap();
    assert_eq!(table.aggregate("total_cost").unwrap(), Value::from(37.0));
}
