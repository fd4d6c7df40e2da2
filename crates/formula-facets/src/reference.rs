//! External references.
//!
//! A [`ReferenceFacet`] publishes named values into a [`ReferenceScope`]. Registration runs the
//! facet once in *discovery* mode, where reads of other sheets return blanks and are recorded as
//! dependency edges. Every later calculation cycle runs it in *resolve* mode to refresh the cached
//! values.

use crate::error::{FacetError, FacetResult};
use crate::facet::ReferenceFacet;
use crate::sheet::{Sheet, SheetId};
use crate::table::Table;
use crate::tables::Tables;
use crate::value::Value;
use indexmap::IndexMap;
use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;

/// Identifies a reference facet registered on a sheet.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ReferenceFacetId(u32);

/// Scope a reference facet writes into.
pub struct ReferenceScope {
    owner: SheetId,
    discovering: bool,
    values: IndexMap<String, Value>,
    dependencies: Vec<Sheet>,
}

impl ReferenceScope {
    pub(crate) fn discover(owner: SheetId) -> Self {
        Self::new(owner, true)
    }

    pub(crate) fn resolve(owner: SheetId) -> Self {
        Self::new(owner, false)
    }

    fn new(owner: SheetId, discovering: bool) -> Self {
        Self {
            owner,
            discovering,
            values: IndexMap::new(),
            dependencies: Vec::new(),
        }
    }

    /// True while the facet runs at registration time to discover its dependencies.
    pub fn is_discovering(&self) -> bool {
        self.discovering
    }

    /// Publish `name`.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(name.into(), value.into());
    }

    /// Read another sheet's consolidation aggregates.
    pub fn sheet(&mut self, sheet: &Sheet) -> FacetResult<ExternalSheet> {
        if sheet.id() == self.owner {
            return Err(FacetError::SelfReference("sheet"));
        }
        self.record(sheet);
        Ok(ExternalSheet {
            sheet: (!self.discovering).then(|| sheet.clone()),
        })
    }

    /// Read a table aggregate on another sheet.
    pub fn table(&mut self, table: &Table) -> FacetResult<ExternalTable> {
        if table.id().sheet() == self.owner {
            return Err(FacetError::SelfReference("table"));
        }
        self.record(&table.sheet());
        Ok(ExternalTable {
            table: (!self.discovering).then(|| table.clone()),
        })
    }

    fn record(&mut self, sheet: &Sheet) {
        if self.discovering && !self.dependencies.iter().any(|s| s.id() == sheet.id()) {
            self.dependencies.push(sheet.clone());
        }
    }

    pub(crate) fn finish(self) -> (IndexMap<String, Value>, Vec<Sheet>) {
        (self.values, self.dependencies)
    }
}

/// Read access to a dependency sheet from inside a reference facet.
pub struct ExternalSheet {
    sheet: Option<Sheet>,
}

impl ExternalSheet {
    /// Blank during discovery.
    pub fn aggregate(&self, name: &str) -> FacetResult<Value> {
        match &self.sheet {
            Some(sheet) => sheet.consolidation_aggregate(name),
            None => Ok(Value::Blank),
        }
    }

    pub fn number(&self, name: &str) -> FacetResult<f64> {
        numeric(name, self.aggregate(name)?)
    }
}

/// Read access to a table on a dependency sheet.
pub struct ExternalTable {
    table: Option<Table>,
}

impl ExternalTable {
    /// Blank during discovery.
    pub fn aggregate(&self, name: &str) -> FacetResult<Value> {
        match &self.table {
            Some(table) => table.aggregate(name),
            None => Ok(Value::Blank),
        }
    }

    pub fn number(&self, name: &str) -> FacetResult<f64> {
        numeric(name, self.aggregate(name)?)
    }
}

fn numeric(name: &str, value: Value) -> FacetResult<f64> {
    value.as_number().ok_or_else(|| FacetError::NotANumber {
        name: name.to_string(),
        value,
    })
}

/// A reference facet plus the values it produced on its last run.
#[derive(Clone, Debug)]
pub(crate) struct CachedReferences {
    pub(crate) facet: ReferenceFacet,
    pub(crate) values: IndexMap<String, Value>,
}

/// Reference facets registered on one sheet.
#[derive(Debug, Default)]
pub(crate) struct ReferenceRegistry {
    facets: IndexMap<ReferenceFacetId, CachedReferences>,
    default: Option<ReferenceFacetId>,
    next_id: u32,
    consolidation: Option<CachedReferences>,
    consolidation_overrides: IndexMap<String, Value>,
}

impl ReferenceRegistry {
    pub(crate) fn insert(
        &mut self,
        facet: ReferenceFacet,
        values: IndexMap<String, Value>,
    ) -> ReferenceFacetId {
        self.next_id += 1;
        let id = ReferenceFacetId(self.next_id);
        self.facets.insert(id, CachedReferences { facet, values });
        id
    }

    pub(crate) fn set_default(&mut self, facet: ReferenceFacet, values: IndexMap<String, Value>) {
        if let Some(previous) = self.default.take() {
            self.facets.shift_remove(&previous);
        }
        self.default = Some(self.insert(facet, values));
    }

    pub(crate) fn set_consolidation(
        &mut self,
        facet: ReferenceFacet,
        values: IndexMap<String, Value>,
    ) {
        self.consolidation = Some(CachedReferences { facet, values });
    }

    #[cfg(test)]
    fn contains(&self, id: ReferenceFacetId) -> bool {
        self.facets.contains_key(&id)
    }

    /// Facets to rerun at the start of a cycle.
    pub(crate) fn facets(&self) -> Vec<(ReferenceFacetId, ReferenceFacet)> {
        self.facets
            .iter()
            .map(|(id, cached)| (*id, cached.facet.clone()))
            .collect()
    }

    pub(crate) fn consolidation_facet(&self) -> Option<ReferenceFacet> {
        self.consolidation.as_ref().map(|cached| cached.facet.clone())
    }

    pub(crate) fn store(&mut self, id: ReferenceFacetId, values: IndexMap<String, Value>) {
        if let Some(cached) = self.facets.get_mut(&id) {
            cached.values = values;
        }
    }

    pub(crate) fn store_consolidation(&mut self, values: IndexMap<String, Value>) {
        if let Some(cached) = self.consolidation.as_mut() {
            cached.values = values;
        }
    }

    /// Values visible to a table: the default facet overlaid with the table's own facet.
    pub(crate) fn resolve(&self, facet: Option<ReferenceFacetId>) -> IndexMap<String, Value> {
        let mut values = IndexMap::new();
        for id in [self.default, facet].into_iter().flatten() {
            if let Some(cached) = self.facets.get(&id) {
                values.extend(cached.values.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
        }
        values
    }

    pub(crate) fn consolidation_values(&self) -> IndexMap<String, Value> {
        let mut values = self
            .consolidation
            .as_ref()
            .map(|cached| cached.values.clone())
            .unwrap_or_default();
        for (name, value) in &self.consolidation_overrides {
            values.insert(name.clone(), value.clone());
        }
        values
    }

    pub(crate) fn set_consolidation_override(&mut self, name: &str, value: Value) {
        self.consolidation_overrides.insert(name.to_string(), value);
    }

    /// Drop non-default facets no table uses any more. Returns how many were removed.
    pub(crate) fn prune(&mut self, in_use: &HashSet<ReferenceFacetId>) -> usize {
        let before = self.facets.len();
        let default = self.default;
        self.facets
            .retain(|id, _| Some(*id) == default || in_use.contains(id));
        before - self.facets.len()
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.facets.len()
    }
}

#[derive(Clone)]
enum HandleTarget {
    Tables(Tables),
    Table(Table),
    Consolidation(Sheet),
}

/// A settable named reference value.
///
/// Setting it writes an override that wins over any reference facet, then recalculates the
/// target when the sheet is in automatic mode.
#[derive(Clone)]
pub struct ReferenceHandle {
    name: String,
    value: Rc<RefCell<Value>>,
    target: HandleTarget,
}

impl ReferenceHandle {
    pub(crate) fn for_tables(name: &str, initial: Value, tables: Tables) -> FacetResult<Self> {
        Self::bind(name, initial, HandleTarget::Tables(tables))
    }

    pub(crate) fn for_table(name: &str, initial: Value, table: Table) -> FacetResult<Self> {
        Self::bind(name, initial, HandleTarget::Table(table))
    }

    pub(crate) fn for_consolidation(name: &str, initial: Value, sheet: Sheet) -> FacetResult<Self> {
        Self::bind(name, initial, HandleTarget::Consolidation(sheet))
    }

    fn bind(name: &str, initial: Value, target: HandleTarget) -> FacetResult<Self> {
        let handle = Self {
            name: name.to_string(),
            value: Rc::new(RefCell::new(Value::Blank)),
            target,
        };
        handle.write(initial)?;
        Ok(handle)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self) -> Value {
        self.value.borrow().clone()
    }

    /// Store `value` and recalculate the target in automatic mode.
    pub fn set(&self, value: impl Into<Value>) -> FacetResult<()> {
        self.write(value.into())?;
        let sheet = self.sheet();
        if !sheet.settings()?.is_automatic() {
            return Ok(());
        }
        match &self.target {
            HandleTarget::Tables(tables) => tables.calculate(),
            HandleTarget::Table(table) => table.calculate(),
            HandleTarget::Consolidation(sheet) => sheet.do_consolidation(),
        }
    }

    fn write(&self, value: Value) -> FacetResult<()> {
        match &self.target {
            HandleTarget::Tables(tables) => tables.set_reference_override(&self.name, &value)?,
            HandleTarget::Table(table) => table.set_reference_override(&self.name, value.clone())?,
            HandleTarget::Consolidation(sheet) => {
                sheet.set_consolidation_override(&self.name, value.clone())?
            }
        }
        *self.value.borrow_mut() = value;
        Ok(())
    }

    fn sheet(&self) -> Sheet {
        match &self.target {
            HandleTarget::Tables(tables) => tables.sheet(),
            HandleTarget::Table(table) => table.sheet(),
            HandleTarget::Consolidation(sheet) => sheet.clone(),
        }
    }
}

impl fmt::Debug for ReferenceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReferenceHandle")
            .field("name", &self.name)
            .field("value", &self.get())
            .finish()
    }
}
