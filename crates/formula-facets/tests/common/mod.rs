#![allow(dead_code)]

use formula_facets::{functions, Facet, Sheet, Table, Value};

pub const LINE_ITEM_COLUMNS: [&str; 3] = ["quantity", "unit_cost", "unit_offer"];

pub fn rows(data: &[&[f64]]) -> Vec<Vec<Value>> {
    data.iter()
        .map(|row| row.iter().copied().map(Value::from).collect())
        .collect()
}

pub fn numbers(values: &[Value]) -> Vec<f64> {
    values
        .iter()
        .map(|value| value.as_number().expect("numeric value"))
        .collect()
}

pub fn line_items() -> Facet {
    Facet::new("line_items")
        .column("line_cost", |row| {
            Ok(Value::from(row.number("quantity")? * row.number("unit_cost")?))
        })
        .column("line_offer", |row| {
            Ok(Value::from(row.number("quantity")? * row.number("unit_offer")?))
        })
        .aggregate("total_cost", |table| {
            Ok(functions::sum(&table.column("line_cost")?).into())
        })
        .aggregate("total_offer", |table| {
            Ok(functions::sum(&table.column("line_offer")?).into())
        })
        .aggregate("profit", |table| {
            Ok(Value::from(
                table.number("total_offer")? - table.number("total_cost")?,
            ))
        })
}

pub fn line_item_sheet() -> Sheet {
    let sheet = Sheet::new(LINE_ITEM_COLUMNS);
    sheet.add_facets([line_items()]).unwrap();
    sheet
}

/// A table holding the two reference line items, calculated once.
pub fn calculated_line_items(sheet: &Sheet) -> Table {
    let table = sheet.new_table().unwrap();
    table
        .load(rows(&[&[2.0, 5.0, 8.0], &[3.0, 4.0, 6.0]]))
        .unwrap();
    table.calculate().unwrap();
    table
}
