//! Live contexts handed to formulas while a table calculates or a sheet consolidates.
//!
//! Every context enforces the forward-reference rule: a calculated column or aggregate can only
//! be read once its own formula has run in the current pass. Data columns are always readable.

use crate::error::{FacetError, FacetResult};
use crate::schema::{Schema, SlotKind};
use crate::select::ConsolidationSelect;
use crate::sheet::{SheetState, TableId};
use crate::table::TableState;
use crate::value::Value;
use indexmap::IndexMap;

/// How many columns and aggregates have been written so far in a pass.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Cursor {
    pub(crate) columns: usize,
    pub(crate) aggregates: usize,
}

impl Cursor {
    pub(crate) fn start(data_columns: usize) -> Self {
        Self {
            columns: data_columns,
            aggregates: 0,
        }
    }
}

fn forward_reference(kind: SlotKind, name: &str) -> FacetError {
    FacetError::ForwardReference {
        kind: kind.label(),
        name: name.to_string(),
    }
}

fn to_number(name: &str, value: Value) -> FacetResult<f64> {
    value.as_number().ok_or_else(|| FacetError::NotANumber {
        name: name.to_string(),
        value,
    })
}

fn readable_column(schema: &Schema, cursor: Cursor, name: &str) -> FacetResult<usize> {
    let index = schema
        .column_index(name)
        .ok_or_else(|| FacetError::InvalidColumn(name.to_string()))?;
    if index >= cursor.columns {
        return Err(forward_reference(SlotKind::Column, name));
    }
    Ok(index)
}

fn readable_aggregate(
    schema: &Schema,
    table: &TableState,
    cursor: Cursor,
    name: &str,
) -> FacetResult<Value> {
    let index = schema
        .aggregate_index(name)
        .ok_or_else(|| FacetError::InvalidAggregate(name.to_string()))?;
    if index >= cursor.aggregates {
        return Err(forward_reference(SlotKind::Aggregate, name));
    }
    Ok(table.aggregates.get(name).cloned().unwrap_or_default())
}

fn lookup_reference(references: &IndexMap<String, Value>, name: &str) -> FacetResult<Value> {
    references
        .get(name)
        .cloned()
        .ok_or_else(|| FacetError::InvalidReference(name.to_string()))
}

/// Context for a calculated-column formula, positioned on one row.
pub struct RowContext<'a> {
    schema: &'a Schema,
    table: &'a TableState,
    row: &'a [Value],
    position: usize,
    cursor: Cursor,
    references: &'a IndexMap<String, Value>,
}

impl<'a> RowContext<'a> {
    pub(crate) fn new(
        schema: &'a Schema,
        table: &'a TableState,
        row: &'a [Value],
        position: usize,
        cursor: Cursor,
        references: &'a IndexMap<String, Value>,
    ) -> Self {
        Self {
            schema,
            table,
            row,
            position,
            cursor,
            references,
        }
    }

    /// Value of `column` on the current row.
    pub fn get(&self, column: &str) -> FacetResult<Value> {
        let index = readable_column(self.schema, self.cursor, column)?;
        Ok(self.row.get(index).cloned().unwrap_or_default())
    }

    pub fn number(&self, column: &str) -> FacetResult<f64> {
        to_number(column, self.get(column)?)
    }

    pub fn aggregate(&self, name: &str) -> FacetResult<Value> {
        readable_aggregate(self.schema, self.table, self.cursor, name)
    }

    pub fn reference(&self, name: &str) -> FacetResult<Value> {
        lookup_reference(self.references, name)
    }

    pub fn reference_number(&self, name: &str) -> FacetResult<f64> {
        to_number(name, self.reference(name)?)
    }

    /// Position of the current row in the table.
    pub fn position(&self) -> usize {
        self.position
    }
}

/// Context for a table-aggregate formula.
pub struct AggregateContext<'a> {
    schema: &'a Schema,
    table: &'a TableState,
    cursor: Cursor,
    references: &'a IndexMap<String, Value>,
}

impl<'a> AggregateContext<'a> {
    pub(crate) fn new(
        schema: &'a Schema,
        table: &'a TableState,
        cursor: Cursor,
        references: &'a IndexMap<String, Value>,
    ) -> Self {
        Self {
            schema,
            table,
            cursor,
            references,
        }
    }

    pub fn aggregate(&self, name: &str) -> FacetResult<Value> {
        readable_aggregate(self.schema, self.table, self.cursor, name)
    }

    pub fn number(&self, name: &str) -> FacetResult<f64> {
        to_number(name, self.aggregate(name)?)
    }

    /// Every value of `column`, in row order.
    pub fn column(&self, column: &str) -> FacetResult<Vec<Value>> {
        let index = readable_column(self.schema, self.cursor, column)?;
        Ok(self
            .table
            .rows
            .iter()
            .map(|row| row.get(index).cloned().unwrap_or_default())
            .collect())
    }

    /// One entry per row holding the requested columns in schema order.
    pub fn columns(&self, columns: &[&str]) -> FacetResult<Vec<Vec<Value>>> {
        let mut indexes = columns
            .iter()
            .map(|column| readable_column(self.schema, self.cursor, column))
            .collect::<FacetResult<Vec<_>>>()?;
        indexes.sort_unstable();
        indexes.dedup();

        Ok(self
            .table
            .rows
            .iter()
            .map(|row| {
                indexes
                    .iter()
                    .map(|&i| row.get(i).cloned().unwrap_or_default())
                    .collect()
            })
            .collect())
    }

    pub fn reference(&self, name: &str) -> FacetResult<Value> {
        lookup_reference(self.references, name)
    }

    pub fn reference_number(&self, name: &str) -> FacetResult<f64> {
        to_number(name, self.reference(name)?)
    }

    pub fn row_count(&self) -> usize {
        self.table.rows.len()
    }
}

/// Context for a consolidation formula.
pub struct ConsolidationContext<'a> {
    state: &'a SheetState,
    tables: &'a [TableId],
    written: usize,
    references: &'a IndexMap<String, Value>,
}

impl<'a> ConsolidationContext<'a> {
    pub(crate) fn new(
        state: &'a SheetState,
        tables: &'a [TableId],
        written: usize,
        references: &'a IndexMap<String, Value>,
    ) -> Self {
        Self {
            state,
            tables,
            written,
            references,
        }
    }

    /// A consolidation aggregate computed earlier in this pass.
    pub fn aggregate(&self, name: &str) -> FacetResult<Value> {
        let index = self
            .state
            .schema
            .consolidation_index(name)
            .ok_or_else(|| FacetError::InvalidAggregate(name.to_string()))?;
        if index >= self.written {
            return Err(forward_reference(SlotKind::Consolidation, name));
        }
        Ok(self
            .state
            .consolidation_values
            .get(name)
            .cloned()
            .unwrap_or_default())
    }

    pub fn number(&self, name: &str) -> FacetResult<f64> {
        to_number(name, self.aggregate(name)?)
    }

    /// The tables matched by this consolidator's tag filter.
    pub fn tables(&self) -> TableProjection<'a> {
        TableProjection {
            state: self.state,
            tables: self.tables,
        }
    }

    /// A selection across the matched tables' rows, concatenated in table order.
    pub fn select(&self, columns: &[&str]) -> FacetResult<ConsolidationSelect<'a>> {
        ConsolidationSelect::new(self.state, self.tables, columns)
    }

    /// Every value of `column` across the matched tables.
    pub fn column(&self, column: &str) -> FacetResult<Vec<Value>> {
        Ok(self
            .select(&[column])?
            .rows()?
            .into_iter()
            .map(|selected| selected.into_value())
            .collect())
    }

    pub fn reference(&self, name: &str) -> FacetResult<Value> {
        lookup_reference(self.references, name)
    }

    pub fn reference_number(&self, name: &str) -> FacetResult<f64> {
        to_number(name, self.reference(name)?)
    }
}

/// Aggregate projection over a set of tables.
pub struct TableProjection<'a> {
    state: &'a SheetState,
    tables: &'a [TableId],
}

impl<'a> TableProjection<'a> {
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn ids(&self) -> &'a [TableId] {
        self.tables
    }

    /// One value of the table aggregate `name` per matched table.
    pub fn aggregate(&self, name: &str) -> FacetResult<Vec<Value>> {
        self.state.aggregate_values(self.tables, name)
    }

    pub fn numbers(&self, name: &str) -> FacetResult<Vec<f64>> {
        self.aggregate(name)?
            .into_iter()
            .map(|value| to_number(name, value))
            .collect()
    }
}
