mod common;

use common::{calculated_line_items, line_item_sheet, numbers, rows};
use formula_facets::{
    functions, CalcSettings, Consolidator, Facet, FacetError, ReferenceFacet, Sheet, Table, Value,
};
use pretty_assertions::assert_eq;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// A sheet of exchange rates consolidated into `average_rate`.
fn rates_sheet() -> Sheet {
    let sheet = Sheet::new(["rate"]);
    sheet
        .consolidate_all([Consolidator::new("rates").aggregate("average_rate", |sheet| {
            Ok(functions::average(&sheet.column("rate")?)
                .unwrap_or(1.0)
                .into())
        })])
        .unwrap();
    sheet
}

fn reads_rate_from(source: &Sheet) -> ReferenceFacet {
    let source = source.clone();
    ReferenceFacet::new("exchange", move |scope| {
        let rates = scope.sheet(&source)?;
        let rate = rates.aggregate("average_rate")?;
        scope.set("rate", if rate.is_blank() { Value::from(1.0) } else { rate });
        Ok(())
    })
}

fn converted() -> Facet {
    Facet::new("converted").column("converted_cost", |row| {
        Ok(Value::from(row.number("line_cost")? * row.reference_number("rate")?))
    })
}

#[test]
fn dependents_recalculate_after_consolidation() {
    let rates = rates_sheet();
    let orders = line_item_sheet();
    orders.add_facets([converted()]).unwrap();
    orders.set_default_references(reads_rate_from(&rates)).unwrap();
    assert_eq!(rates.dependents().unwrap(), vec![orders.id()]);

    let order_table = calculated_line_items(&orders);
    assert_eq!(
        numbers(&order_table.column("converted_cost").unwrap()),
        vec![10.0, 12.0]
    );

    let rate_table = rates.new_table().unwrap();
    rate_table.load(rows(&[&[1.5], &[2.5]])).unwrap();
    rate_table.calculate().unwrap();

    assert_eq!(
        numbers(&order_table.column("converted_cost").unwrap()),
        vec![20.0, 24.0]
    );
    assert_eq!(order_table.ticks().unwrap(), 2);
}

#[test]
fn cycles_are_rejected_and_leave_edges_unchanged() {
    let a = rates_sheet();
    let b = rates_sheet();
    b.set_default_references(reads_rate_from(&a)).unwrap();

    assert_eq!(
        a.set_default_references(reads_rate_from(&b)).unwrap_err(),
        FacetError::CircularDependency {
            from: b.id().to_string(),
            to: a.id().to_string()
        }
    );
    assert_eq!(a.dependents().unwrap(), vec![b.id()]);
    assert!(b.dependents().unwrap().is_empty());
}

#[test]
fn longer_cycles_are_rejected() {
    let a = rates_sheet();
    let b = rates_sheet();
    let c = rates_sheet();
    b.set_default_references(reads_rate_from(&a)).unwrap();
    c.set_default_references(reads_rate_from(&b)).unwrap();

    assert!(matches!(
        a.set_consolidation_references(reads_rate_from(&c)),
        Err(FacetError::CircularDependency { .. })
    ));
    assert!(c.dependents().unwrap().is_empty());
}

#[test]
fn reading_the_registering_sheet_is_a_self_reference() {
    let sheet = rates_sheet();
    assert_eq!(
        sheet
            .set_default_references(reads_rate_from(&sheet))
            .unwrap_err(),
        FacetError::SelfReference("sheet")
    );

    let own = sheet.new_table().unwrap();
    let own_table = ReferenceFacet::new("own_table", move |scope| {
        scope.table(&own)?;
        Ok(())
    });
    assert_eq!(
        sheet.set_default_references(own_table).unwrap_err(),
        FacetError::SelfReference("table")
    );
    assert!(sheet.dependents().unwrap().is_empty());
}

#[test]
fn external_tables_are_read_through_the_scope() {
    let budget = line_item_sheet();
    let budget_table = calculated_line_items(&budget);

    let report = Sheet::new(["weight"]);
    report
        .add_facets([Facet::new("share").column("weighted_profit", |row| {
            Ok(Value::from(row.number("weight")? * row.reference_number("profit")?))
        })])
        .unwrap();
    let source = budget_table.clone();
    report
        .set_default_references(ReferenceFacet::new("budget", move |scope| {
            let discovering = scope.is_discovering();
            let table = scope.table(&source)?;
            let profit = table.aggregate("profit")?;
            assert_eq!(profit.is_blank(), discovering);
            scope.set("profit", profit);
            Ok(())
        }))
        .unwrap();
    assert_eq!(budget.dependents().unwrap(), vec![report.id()]);

    let report_table = report.new_table().unwrap();
    report_table.load(rows(&[&[0.5]])).unwrap();
    report_table.calculate().unwrap();
    assert_eq!(
        numbers(&report_table.column("weighted_profit").unwrap()),
        vec![6.0]
    );

    budget_table.set_cell(0, "quantity", 3.0).unwrap();
    assert_eq!(
        numbers(&report_table.column("weighted_profit").unwrap()),
        vec![7.5]
    );
}

fn discount(amount: f64) -> ReferenceFacet {
    ReferenceFacet::new(format!("discount_{amount}"), move |scope| {
        scope.set("discount", amount);
        Ok(())
    })
}

fn discounted_sheet() -> Sheet {
    let sheet = line_item_sheet();
    sheet
        .add_facets([Facet::new("discounted").column("net_cost", |row| {
            Ok(Value::from(
                row.number("line_cost")? * (1.0 - row.reference_number("discount")?),
            ))
        })])
        .unwrap();
    sheet.set_default_references(discount(0.0)).unwrap();
    sheet
}

fn load_line_items(table: &Table) {
    table
        .load(rows(&[&[2.0, 5.0, 8.0], &[3.0, 4.0, 6.0]]))
        .unwrap();
}

#[test]
fn tagged_references_override_the_default() {
    let sheet = discounted_sheet();
    let vip = sheet.create_table(["vip"]).unwrap();
    let regular = sheet.create_table(["regular"]).unwrap();
    load_line_items(&vip);
    load_line_items(&regular);

    sheet.tables(["vip"]).set_references(discount(0.5)).unwrap();
    sheet.all_tables().calculate().unwrap();

    assert_eq!(numbers(&vip.column("net_cost").unwrap()), vec![5.0, 6.0]);
    assert_eq!(numbers(&regular.column("net_cost").unwrap()), vec![10.0, 12.0]);
    assert_eq!(
        sheet.resolve_references(None).unwrap()["discount"],
        Value::from(0.0)
    );
}

#[test]
fn reference_handles_override_and_recalculate() {
    let sheet = discounted_sheet();
    let vip = sheet.create_table(["vip"]).unwrap();
    let regular = sheet.create_table(["regular"]).unwrap();
    load_line_items(&vip);
    load_line_items(&regular);
    sheet.all_tables().calculate().unwrap();

    let handle = sheet.tables(["vip"]).reference_handle("discount", 0.1).unwrap();
    assert_eq!(handle.get(), Value::from(0.1));
    handle.set(0.5).unwrap();
    assert_eq!(handle.get(), Value::from(0.5));
    assert_eq!(numbers(&vip.column("net_cost").unwrap()), vec![5.0, 6.0]);
    assert_eq!(numbers(&regular.column("net_cost").unwrap()), vec![10.0, 12.0]);

    let table_handle = regular.reference_handle("discount", 0.0).unwrap();
    table_handle.set(0.25).unwrap();
    assert_eq!(numbers(&regular.column("net_cost").unwrap()), vec![7.5, 9.0]);
}

#[test]
fn reference_handles_respect_manual_mode() {
    let sheet = discounted_sheet();
    sheet.set_settings(CalcSettings::manual()).unwrap();
    let table = sheet.new_table().unwrap();
    load_line_items(&table);
    table.calculate().unwrap();

    let handle = table.reference_handle("discount", 0.0).unwrap();
    handle.set(0.5).unwrap();
    assert_eq!(numbers(&table.column("net_cost").unwrap()), vec![10.0, 12.0]);

    table.calculate().unwrap();
    assert_eq!(numbers(&table.column("net_cost").unwrap()), vec![5.0, 6.0]);
}

#[test]
fn consolidation_references_feed_consolidators() {
    let sheet = line_item_sheet();
    sheet
        .set_consolidation_references(ReferenceFacet::new("fx", |scope| {
            scope.set("fx", 1.0);
            Ok(())
        }))
        .unwrap();
    sheet
        .consolidate_all([Consolidator::new("reporting").aggregate("reported_profit", |sheet| {
            let profit = functions::sum(&sheet.tables().aggregate("profit")?);
            Ok(Value::from(profit * sheet.reference_number("fx")?))
        })])
        .unwrap();
    calculated_line_items(&sheet);
    assert_eq!(
        sheet.consolidation_aggregate("reported_profit").unwrap(),
        Value::from(12.0)
    );

    let fx = sheet.consolidation_reference_handle("fx", 1.0).unwrap();
    fx.set(2.0).unwrap();
    assert_eq!(
        sheet.consolidation_aggregate("reported_profit").unwrap(),
        Value::from(24.0)
    );
}

#[test]
fn detaching_prunes_unused_reference_facets() {
    let runs = Rc::new(Cell::new(0));
    let counter = Rc::clone(&runs);
    let counted = ReferenceFacet::new("counted", move |scope| {
        counter.set(counter.get() + 1);
        scope.set("discount", 0.5);
        Ok(())
    });

    let sheet = discounted_sheet();
    let vip = sheet.create_table(["vip"]).unwrap();
    let regular = sheet.new_table().unwrap();
    load_line_items(&vip);
    load_line_items(&regular);
    vip.set_references(counted).unwrap();
    assert_eq!(runs.get(), 1);

    regular.calculate().unwrap();
    assert_eq!(runs.get(), 2);

    vip.detach(false).unwrap();
    regular.calculate().unwrap();
    assert_eq!(runs.get(), 2);
    assert_eq!(numbers(&regular.column("net_cost").unwrap()), vec![10.0, 12.0]);
}

#[test]
fn cascade_follows_edge_insertion_order() {
    let source = rates_sheet();
    let first = rates_sheet();
    let second = rates_sheet();
    second.set_default_references(reads_rate_from(&source)).unwrap();
    first.set_default_references(reads_rate_from(&source)).unwrap();
    assert_eq!(source.dependents().unwrap(), vec![second.id(), first.id()]);

    let order = Rc::new(RefCell::new(Vec::new()));
    for sheet in [&first, &second] {
        let order = Rc::clone(&order);
        sheet
            .after_consolidation(move |sheet| order.borrow_mut().push(sheet.id()))
            .unwrap();
    }

    source.do_consolidation().unwrap();
    assert_eq!(*order.borrow(), vec![second.id(), first.id()]);
}
