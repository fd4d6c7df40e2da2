//! Row selection with population and predicate filters.
//!
//! A selection names columns up front, then narrows rows with [`Select::from`] and
//! [`Select::filter`]. Iterating consumes the builder, so the query is frozen once rows start
//! flowing.

use crate::error::{FacetError, FacetResult};
use crate::schema::Schema;
use crate::sheet::{SheetState, TableId};
use crate::table::Table;
use crate::value::Value;
use std::cell::Ref;
use std::fmt;

static BLANK: Value = Value::Blank;

type Predicate = Box<dyn Fn(&RowView<'_>) -> FacetResult<bool>>;

/// One selected row.
#[derive(Clone, Debug, PartialEq)]
pub enum Selected {
    /// Every column, when the selection named none.
    Row(Vec<Value>),
    /// The single named column.
    Value(Value),
    /// Several named columns, in schema order.
    Tuple(Vec<Value>),
}

impl Selected {
    /// Collapse to a single value; rows and tuples yield their first entry.
    pub fn into_value(self) -> Value {
        match self {
            Selected::Value(value) => value,
            Selected::Row(values) | Selected::Tuple(values) => {
                values.into_iter().next().unwrap_or_default()
            }
        }
    }

    pub fn into_values(self) -> Vec<Value> {
        match self {
            Selected::Value(value) => vec![value],
            Selected::Row(values) | Selected::Tuple(values) => values,
        }
    }
}

/// Read-only view of one row handed to filter predicates.
pub struct RowView<'a> {
    schema: &'a Schema,
    row: &'a [Value],
}

impl<'a> RowView<'a> {
    pub(crate) fn new(schema: &'a Schema, row: &'a [Value]) -> Self {
        Self { schema, row }
    }

    pub fn get(&self, column: &str) -> FacetResult<&'a Value> {
        let index = self
            .schema
            .column_index(column)
            .ok_or_else(|| FacetError::InvalidColumn(column.to_string()))?;
        self.at(index)
    }

    pub fn at(&self, index: usize) -> FacetResult<&'a Value> {
        if index >= self.schema.width() {
            return Err(FacetError::InvalidColumn(format!("#{index}")));
        }
        Ok(self.row.get(index).unwrap_or(&BLANK))
    }

    pub fn number(&self, column: &str) -> FacetResult<f64> {
        let value = self.get(column)?;
        value.as_number().ok_or_else(|| FacetError::NotANumber {
            name: column.to_string(),
            value: value.clone(),
        })
    }

    pub fn values(&self) -> &'a [Value] {
        self.row
    }
}

/// Validated column list plus the filters applied to every row.
pub(crate) struct Query {
    columns: Vec<usize>,
    populations: Vec<String>,
    predicates: Vec<Predicate>,
}

impl Query {
    pub(crate) fn new(schema: &Schema, columns: &[&str]) -> FacetResult<Self> {
        let unknown: Vec<&str> = columns
            .iter()
            .copied()
            .filter(|name| schema.column_index(name).is_none())
            .collect();
        if !unknown.is_empty() {
            return Err(FacetError::InvalidColumn(unknown.join(", ")));
        }

        let mut indexes: Vec<usize> = columns
            .iter()
            .filter_map(|name| schema.column_index(name))
            .collect();
        indexes.sort_unstable();
        indexes.dedup();

        Ok(Self {
            columns: indexes,
            populations: Vec::new(),
            predicates: Vec::new(),
        })
    }

    fn from<I, S>(&mut self, populations: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.populations.extend(populations.into_iter().map(Into::into));
    }

    fn filter<F>(&mut self, predicate: F)
    where
        F: Fn(&RowView<'_>) -> FacetResult<bool> + 'static,
    {
        self.predicates.push(Box::new(predicate));
    }

    /// Apply the predicates to `row` and project the selected columns.
    pub(crate) fn evaluate(&self, schema: &Schema, row: &[Value]) -> FacetResult<Option<Selected>> {
        let view = RowView::new(schema, row);
        for predicate in &self.predicates {
            if !predicate(&view)? {
                return Ok(None);
            }
        }

        let cell = |index: usize| row.get(index).cloned().unwrap_or_default();
        let selected = match self.columns.as_slice() {
            [] => Selected::Row((0..schema.width()).map(cell).collect()),
            [index] => Selected::Value(cell(*index)),
            indexes => Selected::Tuple(indexes.iter().map(|&i| cell(i)).collect()),
        };
        Ok(Some(selected))
    }
}

/// Selection over one table's rows.
pub struct Select<'t> {
    table: &'t Table,
    query: Query,
}

impl<'t> Select<'t> {
    pub(crate) fn new(table: &'t Table, query: Query) -> Self {
        Self { table, query }
    }

    /// Restrict rows to the named populations.
    pub fn from<I, S>(mut self, populations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.query.from(populations);
        self
    }

    /// Keep rows for which `predicate` holds. Multiple filters must all hold.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&RowView<'_>) -> FacetResult<bool> + 'static,
    {
        self.query.filter(predicate);
        self
    }

    /// Evaluate eagerly.
    pub fn rows(self) -> FacetResult<Vec<Selected>> {
        self.into_iter().collect()
    }

    pub fn is_empty(self) -> FacetResult<bool> {
        match self.into_iter().next() {
            None => Ok(true),
            Some(result) => result.map(|_| false),
        }
    }
}

impl fmt::Debug for Select<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Select")
            .field("table", &self.table.id())
            .field("columns", &self.query.columns)
            .field("populations", &self.query.populations)
            .field("filters", &self.query.predicates.len())
            .finish()
    }
}

impl<'t> IntoIterator for Select<'t> {
    type Item = FacetResult<Selected>;
    type IntoIter = SelectIter<'t>;

    fn into_iter(self) -> Self::IntoIter {
        let id = self.table.id();
        let started = self.table.sheet_cell().try_borrow().map_err(|_| {
            FacetError::Reentrant(format!("sheet {} is calculating", id.sheet()))
        });
        let started = started.and_then(|state| {
            let positions: Vec<usize> = state
                .table(id)?
                .rows
                .row_positions(&self.query.populations)
                .collect();
            Ok((state, positions))
        });

        match started {
            Ok((state, positions)) => SelectIter {
                state: Some(state),
                table: id,
                query: self.query,
                positions: positions.into_iter(),
                error: None,
            },
            Err(err) => SelectIter {
                state: None,
                table: id,
                query: self.query,
                positions: Vec::new().into_iter(),
                error: Some(err),
            },
        }
    }
}

/// Lazy iterator over a table selection.
///
/// Holds a shared borrow of the sheet until dropped; mutating the sheet while it is alive fails
/// with [`FacetError::Reentrant`].
pub struct SelectIter<'t> {
    state: Option<Ref<'t, SheetState>>,
    table: TableId,
    query: Query,
    positions: std::vec::IntoIter<usize>,
    error: Option<FacetError>,
}

impl Iterator for SelectIter<'_> {
    type Item = FacetResult<Selected>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(err) = self.error.take() {
            return Some(Err(err));
        }
        let state = self.state.as_ref()?;
        let table = match state.table(self.table) {
            Ok(table) => table,
            Err(err) => return Some(Err(err)),
        };

        for position in self.positions.by_ref() {
            let Some(row) = table.rows.row_at(position) else {
                continue;
            };
            match self.query.evaluate(&state.schema, row) {
                Ok(Some(selected)) => return Some(Ok(selected)),
                Ok(None) => {}
                Err(err) => return Some(Err(err)),
            }
        }
        None
    }
}

/// Selection across the tables matched by a consolidator, used inside consolidation formulas.
pub struct ConsolidationSelect<'a> {
    state: &'a SheetState,
    tables: &'a [TableId],
    query: Query,
}

impl<'a> ConsolidationSelect<'a> {
    pub(crate) fn new(
        state: &'a SheetState,
        tables: &'a [TableId],
        columns: &[&str],
    ) -> FacetResult<Self> {
        Ok(Self {
            state,
            tables,
            query: Query::new(&state.schema, columns)?,
        })
    }

    pub fn from<I, S>(mut self, populations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.query.from(populations);
        self
    }

    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&RowView<'_>) -> FacetResult<bool> + 'static,
    {
        self.query.filter(predicate);
        self
    }

    /// Selected rows of every matched table, concatenated in table order.
    pub fn rows(self) -> FacetResult<Vec<Selected>> {
        let mut selected = Vec::new();
        for &id in self.tables {
            let table = self.state.table(id)?;
            for position in table.rows.row_positions(&self.query.populations) {
                let Some(row) = table.rows.row_at(position) else {
                    continue;
                };
                if let Some(value) = self.query.evaluate(&self.state.schema, row)? {
                    selected.push(value);
                }
            }
        }
        Ok(selected)
    }

    pub fn values(self) -> FacetResult<Vec<Value>> {
        Ok(self.rows()?.into_iter().map(Selected::into_value).collect())
    }
}
