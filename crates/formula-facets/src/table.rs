//! Tables: row data, the calculation pass and row-level accessors.
//!
//! A [`Table`] is a cheap handle (sheet handle plus id). All state lives in the owning sheet, so
//! every operation borrows the sheet for its duration and fails with [`FacetError::Reentrant`]
//! when called from inside a formula of the same sheet.

use crate::context::{AggregateContext, Cursor, RowContext};
use crate::error::{FacetError, FacetResult};
use crate::facet::{Formula, ReferenceFacet};
use crate::population::{PopulationStore, Row, RowId, Span, DEFAULT_POPULATION};
use crate::reference::{ReferenceFacetId, ReferenceHandle};
use crate::select::{Query, Select};
use crate::sheet::{Sheet, SheetState, TableId, Tag};
use crate::value::Value;
use indexmap::IndexMap;
use std::cell::{Ref, RefCell};
use std::fmt;
use std::rc::Rc;

/// Callback run before or after a table's calculation pass.
pub type Callback = Rc<dyn Fn(&Table)>;

pub(crate) struct TableState {
    pub(crate) rows: PopulationStore,
    pub(crate) aggregates: IndexMap<String, Value>,
    pub(crate) ticks: u64,
    pub(crate) calculating: bool,
    pub(crate) reference_facet: Option<ReferenceFacetId>,
    pub(crate) reference_overrides: IndexMap<String, Value>,
    pub(crate) before_calculate: Vec<Callback>,
    pub(crate) after_calculate: Vec<Callback>,
}

impl TableState {
    pub(crate) fn new() -> Self {
        Self {
            rows: PopulationStore::new(),
            aggregates: IndexMap::new(),
            ticks: 0,
            calculating: false,
            reference_facet: None,
            reference_overrides: IndexMap::new(),
            before_calculate: Vec::new(),
            after_calculate: Vec::new(),
        }
    }
}

/// Row ids added and rows removed by a data operation.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RowChanges {
    pub ids: Vec<RowId>,
    pub removed: Vec<Row>,
}

/// Run every facet over the table `id`, writing calculated cells and aggregates.
///
/// The caller owns the sheet borrow; formulas only see immutable views of the state.
fn run_facets(state: &mut SheetState, id: TableId) -> FacetResult<()> {
    let facets = state.facets.clone();
    let references = state.table_references(id)?;
    let width = state.schema.width();
    let mut cursor = Cursor::start(state.schema.data_width());

    let table = state.table_mut(id)?;
    table.rows.ensure_width(width);
    let row_count = table.rows.len();

    for facet in &facets {
        log::trace!("table {id}: running facet '{}'", facet.name());
        for formula in facet.formulas() {
            match formula {
                Formula::Column { name, formula } => {
                    let column = state
                        .schema
                        .column_index(name)
                        .ok_or_else(|| FacetError::InvalidColumn(name.clone()))?;
                    for position in 0..row_count {
                        let value = {
                            let table = state.table(id)?;
                            let row = table.rows.row_at(position).ok_or(FacetError::InvalidRow {
                                position,
                                len: row_count,
                            })?;
                            let ctx = RowContext::new(
                                &state.schema,
                                table,
                                row,
                                position,
                                cursor,
                                &references,
                            );
                            formula(&ctx)?
                        };
                        state.table_mut(id)?.rows.set_cell(position, column, value)?;
                    }
                    cursor.columns += 1;
                }
                Formula::Aggregate { name, formula } => {
                    let value = {
                        let table = state.table(id)?;
                        let ctx = AggregateContext::new(&state.schema, table, cursor, &references);
                        formula(&ctx)?
                    };
                    state.table_mut(id)?.aggregates.insert(name.clone(), value);
                    cursor.aggregates += 1;
                }
            }
        }
    }

    state.table_mut(id)?.ticks += 1;
    Ok(())
}

/// Handle to a table owned by a [`Sheet`].
#[derive(Clone)]
pub struct Table {
    id: TableId,
    sheet: Sheet,
}

impl Table {
    pub(crate) fn new(id: TableId, sheet: Sheet) -> Self {
        Self { id, sheet }
    }

    pub fn id(&self) -> TableId {
        self.id
    }

    pub fn sheet(&self) -> Sheet {
        self.sheet.clone()
    }

    pub(crate) fn sheet_cell(&self) -> &RefCell<SheetState> {
        self.sheet.cell()
    }

    fn read<T>(&self, f: impl FnOnce(&SheetState, &TableState) -> FacetResult<T>) -> FacetResult<T> {
        let state = self.sheet.state()?;
        let table = state.table(self.id)?;
        f(&state, table)
    }

    fn write<T>(
        &self,
        f: impl FnOnce(&mut TableState, usize) -> FacetResult<T>,
    ) -> FacetResult<T> {
        let mut state = self.sheet.state_mut()?;
        let data_width = state.schema.data_width();
        let table = state.table_mut(self.id)?;
        f(table, data_width)
    }

    pub fn is_attached(&self) -> bool {
        self.sheet
            .state()
            .map(|state| state.tables.contains_key(&self.id))
            .unwrap_or(false)
    }

    /// Completed calculation passes.
    pub fn ticks(&self) -> FacetResult<u64> {
        self.read(|_, table| Ok(table.ticks))
    }

    pub fn row_count(&self) -> FacetResult<usize> {
        self.read(|_, table| Ok(table.rows.len()))
    }

    pub fn populations(&self) -> FacetResult<IndexMap<String, Span>> {
        self.read(|_, table| Ok(table.rows.populations().clone()))
    }

    /// Last computed value of a table aggregate; blank before the first pass.
    pub fn aggregate(&self, name: &str) -> FacetResult<Value> {
        self.read(|state, table| {
            if state.schema.aggregate_index(name).is_none() {
                return Err(FacetError::InvalidAggregate(name.to_string()));
            }
            Ok(table.aggregates.get(name).cloned().unwrap_or_default())
        })
    }

    /// Every aggregate, in registration order.
    pub fn aggregates(&self) -> FacetResult<IndexMap<String, Value>> {
        self.read(|state, table| {
            Ok(state
                .schema
                .aggregates()
                .map(|name| {
                    let value = table.aggregates.get(name).cloned().unwrap_or_default();
                    (name.to_string(), value)
                })
                .collect())
        })
    }

    /// Every value of `column` in row order, as of the last pass.
    pub fn column(&self, column: &str) -> FacetResult<Vec<Value>> {
        self.read(|state, table| {
            let index = state
                .schema
                .column_index(column)
                .ok_or_else(|| FacetError::InvalidColumn(column.to_string()))?;
            Ok(table
                .rows
                .iter()
                .map(|row| row.get(index).cloned().unwrap_or_default())
                .collect())
        })
    }

    /// Run every registered facet over this table.
    pub fn execute_facets(&self) -> FacetResult<()> {
        let before = {
            let mut state = self.sheet.state_mut()?;
            let table = state.table_mut(self.id)?;
            if table.calculating {
                return Err(FacetError::Reentrant(format!("table {}", self.id)));
            }
            table.calculating = true;
            table.before_calculate.clone()
        };

        let result = self.run_pass(&before);

        if let Ok(mut state) = self.sheet.state_mut() {
            if let Ok(table) = state.table_mut(self.id) {
                table.calculating = false;
            }
        }
        result
    }

    fn run_pass(&self, before: &[Callback]) -> FacetResult<()> {
        for callback in before {
            callback(self);
        }
        let after = {
            let mut state = self.sheet.state_mut()?;
            run_facets(&mut state, self.id)?;
            state.table(self.id)?.after_calculate.clone()
        };
        for callback in &after {
            callback(self);
        }
        Ok(())
    }

    /// Refresh references, run the facets, then consolidate the sheet.
    pub fn calculate(&self) -> FacetResult<()> {
        if self.read(|_, table| Ok(table.calculating))? {
            return Err(FacetError::Reentrant(format!("table {}", self.id)));
        }
        self.sheet.ensure_idle()?;
        self.sheet.refresh_references()?;
        self.execute_facets()?;
        self.sheet.do_consolidation()
    }

    pub fn load(&self, rows: Vec<Vec<Value>>) -> FacetResult<RowChanges> {
        self.load_population(rows, DEFAULT_POPULATION)
    }

    /// Append rows at the end of the dataset into `population`.
    pub fn load_population(&self, rows: Vec<Vec<Value>>, population: &str) -> FacetResult<RowChanges> {
        self.write(|table, width| {
            check_shape(&rows, width)?;
            let ids = table.rows.load(rows, population)?;
            Ok(RowChanges {
                ids,
                removed: Vec::new(),
            })
        })
    }

    pub fn unload(&self, population: &str) -> FacetResult<RowChanges> {
        self.write(|table, _| {
            Ok(RowChanges {
                ids: Vec::new(),
                removed: table.rows.unload(population),
            })
        })
    }

    pub fn replace(&self, rows: Vec<Vec<Value>>, population: &str) -> FacetResult<RowChanges> {
        self.write(|table, width| {
            check_shape(&rows, width)?;
            let (ids, removed) = table.rows.replace(rows, population)?;
            Ok(RowChanges { ids, removed })
        })
    }

    /// Insert rows before `population`; with a distinct `new_population` they form a new range.
    pub fn prepend(
        &self,
        rows: Vec<Vec<Value>>,
        population: &str,
        new_population: Option<&str>,
    ) -> FacetResult<RowChanges> {
        self.write(|table, width| {
            check_shape(&rows, width)?;
            let ids = table.rows.prepend(rows, population, new_population)?;
            Ok(RowChanges {
                ids,
                removed: Vec::new(),
            })
        })
    }

    /// Insert rows after `population`; with a distinct `new_population` they form a new range.
    pub fn append(
        &self,
        rows: Vec<Vec<Value>>,
        population: &str,
        new_population: Option<&str>,
    ) -> FacetResult<RowChanges> {
        self.write(|table, width| {
            check_shape(&rows, width)?;
            let ids = table.rows.append(rows, population, new_population)?;
            Ok(RowChanges {
                ids,
                removed: Vec::new(),
            })
        })
    }

    /// Select `columns` (all of them when empty).
    pub fn select(&self, columns: &[&str]) -> FacetResult<Select<'_>> {
        let query = {
            let state = self.sheet.state()?;
            state.table(self.id)?;
            Query::new(&state.schema, columns)?
        };
        Ok(Select::new(self, query))
    }

    /// Write a data cell. Calculated columns are read only.
    pub fn set_row_cell_value(
        &self,
        position: usize,
        column: usize,
        value: impl Into<Value>,
        recalculate: bool,
    ) -> FacetResult<()> {
        let automatic = {
            let mut state = self.sheet.state_mut()?;
            check_writable(&state, column)?;
            let automatic = state.settings.is_automatic();
            state.table_mut(self.id)?.rows.set_cell(position, column, value.into())?;
            automatic
        };
        if recalculate && automatic {
            self.calculate()?;
        }
        Ok(())
    }

    /// Write a data cell addressed by column name and recalculate per the sheet settings.
    pub fn set_cell(&self, position: usize, column: &str, value: impl Into<Value>) -> FacetResult<()> {
        let index = self.sheet.column_index(column)?;
        self.set_row_cell_value(position, index, value, true)
    }

    pub fn row(&self, id: RowId) -> RowHandle {
        RowHandle {
            table: self.clone(),
            id,
        }
    }

    pub fn rows(&self, ids: &[RowId]) -> Vec<RowHandle> {
        ids.iter().map(|&id| self.row(id)).collect()
    }

    /// Handles for the rows of `populations`; every row when empty.
    pub fn population_rows(&self, populations: &[&str]) -> FacetResult<Vec<RowHandle>> {
        let names: Vec<String> = populations.iter().map(|name| name.to_string()).collect();
        let ids = self.read(|_, table| Ok(table.rows.population_row_ids(&names)))?;
        Ok(self.rows(&ids))
    }

    /// Read-only view over the live rows. Holds a shared borrow of the sheet while alive.
    pub fn rows_view(&self) -> FacetResult<RowsView<'_>> {
        let state = self.sheet.state()?;
        let columns: Vec<String> = state.schema.columns().map(str::to_string).collect();
        let id = self.id;
        let rows = Ref::filter_map(state, |state| state.tables.get(&id).map(|t| &t.rows))
            .map_err(|_| FacetError::DetachedTable(id.to_string()))?;
        Ok(RowsView { rows, columns })
    }

    /// Register `facet` as this table's reference facet.
    pub fn set_references(&self, facet: ReferenceFacet) -> FacetResult<()> {
        self.sheet.tables([Tag::Table(self.id)]).set_references(facet)
    }

    /// A reference override scoped to this table.
    pub fn reference_handle(
        &self,
        name: &str,
        initial: impl Into<Value>,
    ) -> FacetResult<ReferenceHandle> {
        ReferenceHandle::for_table(name, initial.into(), self.clone())
    }

    pub(crate) fn set_reference_override(&self, name: &str, value: Value) -> FacetResult<()> {
        self.write(|table, _| {
            table.reference_overrides.insert(name.to_string(), value);
            Ok(())
        })
    }

    pub fn before_calculate<F>(&self, callback: F) -> FacetResult<()>
    where
        F: Fn(&Table) + 'static,
    {
        self.push_before(Rc::new(callback))
    }

    pub fn after_calculate<F>(&self, callback: F) -> FacetResult<()>
    where
        F: Fn(&Table) + 'static,
    {
        self.push_after(Rc::new(callback))
    }

    pub(crate) fn push_before(&self, callback: Callback) -> FacetResult<()> {
        self.write(|table, _| {
            table.before_calculate.push(callback);
            Ok(())
        })
    }

    pub(crate) fn push_after(&self, callback: Callback) -> FacetResult<()> {
        self.write(|table, _| {
            table.after_calculate.push(callback);
            Ok(())
        })
    }

    /// Remove this table from its sheet.
    pub fn detach(&self, consolidate: bool) -> FacetResult<()> {
        self.sheet.detach_table(self.id, consolidate)
    }
}

impl fmt::Debug for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Table").field("id", &self.id).finish()
    }
}

impl PartialEq for Table {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

fn check_shape(rows: &[Vec<Value>], width: usize) -> FacetResult<()> {
    match rows.iter().find(|row| row.len() != width) {
        Some(row) => Err(FacetError::ArrayShape {
            expected: width,
            actual: row.len(),
        }),
        None => Ok(()),
    }
}

fn check_writable(state: &SheetState, column: usize) -> FacetResult<()> {
    if state.schema.is_calculated(column) {
        let name = state.schema.column_name(column).unwrap_or_default();
        return Err(FacetError::ReadOnlyViolation(format!(
            "calculated column '{name}'"
        )));
    }
    if column >= state.schema.data_width() {
        return Err(FacetError::InvalidColumn(format!("#{column}")));
    }
    Ok(())
}

/// Handle to one row, addressed by its stable id.
#[derive(Clone, Debug)]
pub struct RowHandle {
    table: Table,
    id: RowId,
}

impl RowHandle {
    pub fn id(&self) -> RowId {
        self.id
    }

    /// False once the row has been unloaded or replaced.
    pub fn exists(&self) -> FacetResult<bool> {
        self.table.read(|_, table| Ok(table.rows.contains(self.id)))
    }

    pub fn values(&self) -> FacetResult<Vec<Value>> {
        self.table.read(|_, table| {
            table
                .rows
                .row(self.id)
                .map(<[Value]>::to_vec)
                .ok_or_else(|| FacetError::UnknownId(format!("row {}", self.id)))
        })
    }

    pub fn get(&self, column: &str) -> FacetResult<Value> {
        self.table.read(|state, table| {
            let index = state
                .schema
                .column_index(column)
                .ok_or_else(|| FacetError::InvalidColumn(column.to_string()))?;
            let row = table
                .rows
                .row(self.id)
                .ok_or_else(|| FacetError::UnknownId(format!("row {}", self.id)))?;
            Ok(row.get(index).cloned().unwrap_or_default())
        })
    }

    /// Write a data cell of this row and recalculate per the sheet settings.
    pub fn set(&self, column: &str, value: impl Into<Value>) -> FacetResult<()> {
        let automatic = {
            let mut state = self.table.sheet.state_mut()?;
            let index = state
                .schema
                .column_index(column)
                .ok_or_else(|| FacetError::InvalidColumn(column.to_string()))?;
            check_writable(&state, index)?;
            let automatic = state.settings.is_automatic();
            state
                .table_mut(self.table.id)?
                .rows
                .set_cell_by_id(self.id, index, value.into())?;
            automatic
        };
        if automatic {
            self.table.calculate()?;
        }
        Ok(())
    }
}

/// Read-only view of a table's rows.
pub struct RowsView<'t> {
    rows: Ref<'t, PopulationStore>,
    columns: Vec<String>,
}

impl RowsView<'_> {
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, position: usize) -> Option<&[Value]> {
        self.rows.row_at(position)
    }

    pub fn id_at(&self, position: usize) -> Option<RowId> {
        self.rows.id_at(position)
    }

    pub fn populations(&self) -> &IndexMap<String, Span> {
        self.rows.populations()
    }

    pub fn iter(&self) -> impl Iterator<Item = &[Value]> + '_ {
        self.rows.iter()
    }
}
