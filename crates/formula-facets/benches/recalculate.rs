use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use formula_facets::{functions, Consolidator, Facet, Sheet, Table, Value};

fn bench_rows() -> usize {
    std::env::var("FORMULA_FACETS_BENCH_ROWS")
        .ok()
        .and_then(|v| v.replace('_', "").parse::<usize>().ok())
        .filter(|&v| v >= 1_000 && v <= 1_000_000)
        .unwrap_or(100_000)
}

fn line_items() -> Facet {
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
            Ok(Value::from(table.number("total_offer")? - table.number("total_cost")?))
        })
}

fn build_table(sheet: &Sheet, rows: usize) -> Table {
    let table = sheet.new_table().expect("table");
    let data = (0..rows)
        .map(|i| {
            let quantity = (i % 17 + 1) as f64;
            vec![
                Value::from(quantity),
                Value::from(quantity * 0.5),
                Value::from(quantity * 0.75),
            ]
        })
        .collect();
    table.load(data).expect("load rows");
    table
}

fn line_item_sheet() -> Sheet {
    let sheet = Sheet::new(["quantity", "unit_cost", "unit_offer"]);
    sheet.add_facets([line_items()]).expect("register facets");
    sheet
}

fn bench_recalculate(c: &mut Criterion) {
    let rows = bench_rows();
    let mut group = c.benchmark_group("recalculate");
    group.sample_size(10);

    let sheet = line_item_sheet();
    let table = build_table(&sheet, rows);
    group.bench_with_input(BenchmarkId::new("single_table", rows), &table, |b, table| {
        b.iter(|| {
            table.calculate().expect("calculate");
            black_box(table.aggregate("profit").expect("profit"))
        })
    });

    let sheet = line_item_sheet();
    sheet
        .consolidate_all([Consolidator::new("totals").aggregate("grand_profit", |sheet| {
            Ok(functions::sum(&sheet.tables().aggregate("profit")?).into())
        })])
        .expect("register consolidator");
    for _ in 0..8 {
        build_table(&sheet, rows / 8);
    }
    group.bench_with_input(BenchmarkId::new("eight_tables", rows), &sheet, |b, sheet| {
        b.iter(|| {
            sheet.all_tables().calculate().expect("calculate");
            black_box(sheet.consolidation_aggregate("grand_profit").expect("grand profit"))
        })
    });

    group.finish();
}

criterion_group!(benches, bench_recalculate);
criterion_main!(benches);
