//! Sheets: the schema, tables, consolidation and the inter-sheet dependency graph.
//!
//! A [`Sheet`] owns a shared schema (data columns plus every calculated column and aggregate
//! registered through facets), the tables created from it, and the sheet-level consolidators.
//! Sheets that read another sheet through a reference facet become its *dependents* and are
//! recalculated after it consolidates.

use crate::context::ConsolidationContext;
use crate::dependency::reaches;
use crate::error::{FacetError, FacetResult};
use crate::facet::{Consolidator, Facet, ReferenceFacet};
use crate::reference::{ReferenceFacetId, ReferenceHandle, ReferenceRegistry, ReferenceScope};
use crate::schema::{require_name, Schema, Slot};
use crate::settings::CalcSettings;
use crate::table::{Table, TableState};
use crate::tables::Tables;
use crate::tags::TagIndex;
use crate::value::Value;
use indexmap::IndexMap;
use std::cell::{Ref, RefCell, RefMut};
use std::collections::HashSet;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU32, Ordering};

static NEXT_SHEET_ID: AtomicU32 = AtomicU32::new(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SheetId(u32);

impl fmt::Display for SheetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// Identifies a table; unique across sheets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableId {
    sheet: SheetId,
    index: u32,
}

impl TableId {
    pub fn sheet(&self) -> SheetId {
        self.sheet
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.T{}", self.sheet, self.index)
    }
}

/// A tag tables can be looked up by.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Tag {
    Label(String),
    Key(i64),
    Table(TableId),
}

impl From<&str> for Tag {
    fn from(value: &str) -> Self {
        Tag::Label(value.to_string())
    }
}

impl From<String> for Tag {
    fn from(value: String) -> Self {
        Tag::Label(value)
    }
}

impl From<i64> for Tag {
    fn from(value: i64) -> Self {
        Tag::Key(value)
    }
}

impl From<i32> for Tag {
    fn from(value: i32) -> Self {
        Tag::Key(value.into())
    }
}

impl From<TableId> for Tag {
    fn from(value: TableId) -> Self {
        Tag::Table(value)
    }
}

/// Hook run around consolidation.
pub type Hook = Rc<dyn Fn(&Sheet)>;

#[derive(Clone)]
pub(crate) struct RegisteredConsolidator {
    pub(crate) tags: Vec<Tag>,
    pub(crate) consolidator: Consolidator,
}

#[derive(Default)]
struct Hooks {
    before_consolidation: Vec<Hook>,
    after_consolidation: Vec<Hook>,
    after_dependents: Vec<Hook>,
}

pub(crate) struct SheetState {
    pub(crate) id: SheetId,
    pub(crate) settings: CalcSettings,
    pub(crate) schema: Schema,
    pub(crate) facets: Vec<Facet>,
    pub(crate) consolidators: Vec<RegisteredConsolidator>,
    pub(crate) consolidation_values: IndexMap<String, Value>,
    pub(crate) tags: TagIndex<Tag, TableId>,
    pub(crate) tables: IndexMap<TableId, TableState>,
    pub(crate) references: ReferenceRegistry,
    dependents: Vec<(SheetId, Weak<RefCell<SheetState>>)>,
    hooks: Hooks,
    next_table: u32,
    consolidating: bool,
}

impl SheetState {
    pub(crate) fn table(&self, id: TableId) -> FacetResult<&TableState> {
        self.tables
            .get(&id)
            .ok_or_else(|| FacetError::DetachedTable(id.to_string()))
    }

    pub(crate) fn table_mut(&mut self, id: TableId) -> FacetResult<&mut TableState> {
        self.tables
            .get_mut(&id)
            .ok_or_else(|| FacetError::DetachedTable(id.to_string()))
    }

    /// References visible to one table: overrides, then its own facet, then the sheet default.
    pub(crate) fn table_references(&self, id: TableId) -> FacetResult<IndexMap<String, Value>> {
        let table = self.table(id)?;
        let mut values = self.references.resolve(table.reference_facet);
        for (name, value) in &table.reference_overrides {
            values.insert(name.clone(), value.clone());
        }
        Ok(values)
    }

    /// The table aggregate `name` of each table in `ids`.
    pub(crate) fn aggregate_values(&self, ids: &[TableId], name: &str) -> FacetResult<Vec<Value>> {
        if self.schema.aggregate_index(name).is_none() {
            return Err(FacetError::InvalidAggregate(name.to_string()));
        }
        ids.iter()
            .map(|id| {
                let table = self.table(*id)?;
                Ok(table.aggregates.get(name).cloned().unwrap_or_default())
            })
            .collect()
    }

    pub(crate) fn prune_references(&mut self) {
        let in_use: HashSet<ReferenceFacetId> = self
            .tables
            .values()
            .filter_map(|table| table.reference_facet)
            .collect();
        let removed = self.references.prune(&in_use);
        if removed > 0 {
            log::debug!("sheet {}: pruned {removed} unused reference facet(s)", self.id);
        }
    }

    fn run_consolidators(&mut self) -> FacetResult<()> {
        let consolidators = self.consolidators.clone();
        let references = self.references.consolidation_values();
        let mut written = 0;

        for registered in &consolidators {
            log::trace!(
                "sheet {}: running consolidator '{}'",
                self.id,
                registered.consolidator.name()
            );
            let tables = self.tags.list(&registered.tags);
            for (name, formula) in registered.consolidator.formulas() {
                let value = {
                    let ctx = ConsolidationContext::new(self, &tables, written, &references);
                    formula(&ctx)?
                };
                self.consolidation_values.insert(name.clone(), value);
                written += 1;
            }
        }
        Ok(())
    }
}

/// Handle to a sheet. Clones share the same sheet.
#[derive(Clone)]
pub struct Sheet {
    id: SheetId,
    inner: Rc<RefCell<SheetState>>,
}

impl Sheet {
    /// A sheet whose rows carry `data_columns`.
    pub fn new<I, S>(data_columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_settings(data_columns, CalcSettings::default())
    }

    pub fn with_settings<I, S>(data_columns: I, settings: CalcSettings) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let id = SheetId(NEXT_SHEET_ID.fetch_add(1, Ordering::Relaxed));
        let state = SheetState {
            id,
            settings,
            schema: Schema::new(data_columns),
            facets: Vec::new(),
            consolidators: Vec::new(),
            consolidation_values: IndexMap::new(),
            tags: TagIndex::new(),
            tables: IndexMap::new(),
            references: ReferenceRegistry::default(),
            dependents: Vec::new(),
            hooks: Hooks::default(),
            next_table: 0,
            consolidating: false,
        };
        log::debug!("sheet {id}: created");
        Self {
            id,
            inner: Rc::new(RefCell::new(state)),
        }
    }

    fn from_inner(inner: Rc<RefCell<SheetState>>, id: SheetId) -> Self {
        Self { id, inner }
    }

    pub fn id(&self) -> SheetId {
        self.id
    }

    pub(crate) fn cell(&self) -> &RefCell<SheetState> {
        &self.inner
    }

    pub(crate) fn state(&self) -> FacetResult<Ref<'_, SheetState>> {
        self.inner.try_borrow().map_err(|_| busy(self.id))
    }

    pub(crate) fn state_mut(&self) -> FacetResult<RefMut<'_, SheetState>> {
        self.inner.try_borrow_mut().map_err(|_| busy(self.id))
    }

    pub(crate) fn ensure_idle(&self) -> FacetResult<()> {
        if self.state()?.consolidating {
            return Err(FacetError::Reentrant(format!("sheet {} is consolidating", self.id)));
        }
        Ok(())
    }

    pub fn settings(&self) -> FacetResult<CalcSettings> {
        Ok(self.state()?.settings.clone())
    }

    pub fn set_settings(&self, settings: CalcSettings) -> FacetResult<()> {
        self.state_mut()?.settings = settings;
        Ok(())
    }

    /// Register facets; see [`Facet`]. Nothing is registered when any name is rejected.
    pub fn add_facets<I>(&self, facets: I) -> FacetResult<Vec<Slot>>
    where
        I: IntoIterator<Item = Facet>,
    {
        let facets: Vec<Facet> = facets.into_iter().collect();
        let mut state = self.state_mut()?;
        let slots = state.schema.register_facets(&facets)?;
        for facet in &facets {
            log::debug!("sheet {}: registered facet '{}'", self.id, facet.name());
        }
        state.facets.extend(facets);
        Ok(slots)
    }

    /// Register consolidators running over the tables carrying any of `tags`.
    pub fn consolidate<T, It, C>(&self, tags: It, consolidators: C) -> FacetResult<Vec<Slot>>
    where
        T: Into<Tag>,
        It: IntoIterator<Item = T>,
        C: IntoIterator<Item = Consolidator>,
    {
        let tags: Vec<Tag> = tags.into_iter().map(Into::into).collect();
        let consolidators: Vec<Consolidator> = consolidators.into_iter().collect();
        let mut state = self.state_mut()?;
        let slots = state.schema.register_consolidators(&consolidators)?;
        state
            .consolidators
            .extend(consolidators.into_iter().map(|consolidator| RegisteredConsolidator {
                tags: tags.clone(),
                consolidator,
            }));
        Ok(slots)
    }

    /// Register consolidators running over every table.
    pub fn consolidate_all<C>(&self, consolidators: C) -> FacetResult<Vec<Slot>>
    where
        C: IntoIterator<Item = Consolidator>,
    {
        self.consolidate(Vec::<Tag>::new(), consolidators)
    }

    pub fn create_table<T, It>(&self, tags: It) -> FacetResult<Table>
    where
        T: Into<Tag>,
        It: IntoIterator<Item = T>,
    {
        let mut state = self.state_mut()?;
        state.next_table += 1;
        let id = TableId {
            sheet: self.id,
            index: state.next_table,
        };
        let mut tags: Vec<Tag> = tags.into_iter().map(Into::into).collect();
        tags.push(Tag::Table(id));
        state.tags.add(tags, id);
        state.tables.insert(id, TableState::new());
        log::debug!("sheet {}: created table {id}", self.id);
        Ok(Table::new(id, self.clone()))
    }

    /// A table carrying no tags besides its own id.
    pub fn new_table(&self) -> FacetResult<Table> {
        self.create_table(Vec::<Tag>::new())
    }

    /// Remove a table, prune reference facets nothing uses, and optionally consolidate.
    pub fn detach_table(&self, id: TableId, consolidate: bool) -> FacetResult<()> {
        {
            let mut state = self.state_mut()?;
            if state.tables.shift_remove(&id).is_none() {
                return Err(FacetError::UnknownTable(id.to_string()));
            }
            state.tags.remove(&id);
            state.prune_references();
        }
        log::debug!("sheet {}: detached table {id}", self.id);
        if consolidate {
            self.do_consolidation()?;
        }
        Ok(())
    }

    pub fn table_by_id(&self, id: TableId) -> FacetResult<Option<Table>> {
        let state = self.state()?;
        Ok(state
            .tables
            .contains_key(&id)
            .then(|| Table::new(id, self.clone())))
    }

    /// The one table carrying any of `tags`; `None` when nothing matches.
    pub fn unique_table<T, It>(&self, tags: It) -> FacetResult<Option<Table>>
    where
        T: Into<Tag>,
        It: IntoIterator<Item = T>,
    {
        let tags: Vec<Tag> = tags.into_iter().map(Into::into).collect();
        let ids = self.state()?.tags.list(&tags);
        match ids.as_slice() {
            [] => Ok(None),
            [id] => Ok(Some(Table::new(*id, self.clone()))),
            _ => Err(FacetError::MultipleMatch(format!("{tags:?}"))),
        }
    }

    /// The tables carrying any of `tags`; every table when `tags` is empty.
    pub fn tables<T, It>(&self, tags: It) -> Tables
    where
        T: Into<Tag>,
        It: IntoIterator<Item = T>,
    {
        Tables::new(self.clone(), tags.into_iter().map(Into::into).collect())
    }

    pub fn all_tables(&self) -> Tables {
        Tables::new(self.clone(), Vec::new())
    }

    pub(crate) fn table_ids(&self, tags: &[Tag]) -> FacetResult<Vec<TableId>> {
        Ok(self.state()?.tags.list(tags))
    }

    /// Install the reference facet every table falls back to.
    pub fn set_default_references(&self, facet: ReferenceFacet) -> FacetResult<()> {
        let values = self.discover_references(&facet)?;
        self.state_mut()?.references.set_default(facet, values);
        Ok(())
    }

    /// Install the reference facet read by consolidators.
    pub fn set_consolidation_references(&self, facet: ReferenceFacet) -> FacetResult<()> {
        let values = self.discover_references(&facet)?;
        self.state_mut()?.references.set_consolidation(facet, values);
        Ok(())
    }

    /// A consolidation reference whose writes re-run consolidation in automatic mode.
    pub fn consolidation_reference_handle(
        &self,
        name: &str,
        initial: impl Into<Value>,
    ) -> FacetResult<ReferenceHandle> {
        ReferenceHandle::for_consolidation(name, initial.into(), self.clone())
    }

    pub(crate) fn set_consolidation_override(&self, name: &str, value: Value) -> FacetResult<()> {
        self.state_mut()?
            .references
            .set_consolidation_override(name, value);
        Ok(())
    }

    /// Register a table-scoped reference facet and return its id.
    pub(crate) fn register_references(
        &self,
        facet: ReferenceFacet,
    ) -> FacetResult<ReferenceFacetId> {
        let values = self.discover_references(&facet)?;
        Ok(self.state_mut()?.references.insert(facet, values))
    }

    /// Run `facet` in discovery mode and commit the dependency edges it records.
    fn discover_references(&self, facet: &ReferenceFacet) -> FacetResult<IndexMap<String, Value>> {
        require_name("reference facet", facet.name())?;
        let mut scope = ReferenceScope::discover(self.id);
        facet.run(&mut scope)?;
        let (values, dependencies) = scope.finish();

        for dependency in &dependencies {
            dependency.check_dependent(self)?;
        }
        for dependency in &dependencies {
            dependency.add_dependent(self)?;
        }
        log::debug!(
            "sheet {}: registered reference facet '{}' reading {} sheet(s)",
            self.id,
            facet.name(),
            dependencies.len()
        );
        Ok(values)
    }

    /// Reject `dependent` when it is this sheet or already reaches it.
    fn check_dependent(&self, dependent: &Sheet) -> FacetResult<()> {
        if dependent.id == self.id {
            return Err(FacetError::SelfReference("sheet"));
        }
        let cycle = reaches(
            dependent.clone(),
            &self.id,
            Sheet::id,
            |sheet| sheet.dependent_sheets(),
        )?;
        if cycle {
            return Err(FacetError::CircularDependency {
                from: self.id.to_string(),
                to: dependent.id.to_string(),
            });
        }
        Ok(())
    }

    fn add_dependent(&self, dependent: &Sheet) -> FacetResult<()> {
        let mut state = self.state_mut()?;
        if state.dependents.iter().any(|(id, _)| *id == dependent.id) {
            return Ok(());
        }
        state
            .dependents
            .push((dependent.id, Rc::downgrade(&dependent.inner)));
        log::debug!("dependency edge {} -> {}", self.id, dependent.id);
        Ok(())
    }

    fn dependent_sheets(&self) -> FacetResult<Vec<Sheet>> {
        Ok(self
            .state()?
            .dependents
            .iter()
            .filter_map(|(id, weak)| weak.upgrade().map(|inner| Sheet::from_inner(inner, *id)))
            .collect())
    }

    /// Sheets recalculated after this one consolidates, in edge insertion order.
    pub fn dependents(&self) -> FacetResult<Vec<SheetId>> {
        Ok(self.dependent_sheets()?.iter().map(Sheet::id).collect())
    }

    /// Merge the default facet's cached values with those of `facet`; `facet` wins.
    pub fn resolve_references(
        &self,
        facet: Option<ReferenceFacetId>,
    ) -> FacetResult<IndexMap<String, Value>> {
        Ok(self.state()?.references.resolve(facet))
    }

    /// Re-run every table reference facet against live values.
    pub fn refresh_references(&self) -> FacetResult<()> {
        let facets = self.state()?.references.facets();
        for (id, facet) in facets {
            let values = self.run_references(&facet)?;
            self.state_mut()?.references.store(id, values);
        }
        Ok(())
    }

    fn refresh_consolidation_references(&self) -> FacetResult<()> {
        let Some(facet) = self.state()?.references.consolidation_facet() else {
            return Ok(());
        };
        let values = self.run_references(&facet)?;
        self.state_mut()?.references.store_consolidation(values);
        Ok(())
    }

    fn run_references(&self, facet: &ReferenceFacet) -> FacetResult<IndexMap<String, Value>> {
        let mut scope = ReferenceScope::resolve(self.id);
        facet.run(&mut scope)?;
        Ok(scope.finish().0)
    }

    /// Run the consolidators, then recalculate every dependent sheet.
    pub fn do_consolidation(&self) -> FacetResult<()> {
        {
            let mut state = self.state_mut()?;
            if state.consolidating {
                return Err(FacetError::Reentrant(format!(
                    "sheet {} is consolidating",
                    self.id
                )));
            }
            state.consolidating = true;
        }

        let result = self.consolidate_and_cascade();

        if let Ok(mut state) = self.state_mut() {
            state.consolidating = false;
        }
        result
    }

    fn consolidate_and_cascade(&self) -> FacetResult<()> {
        self.refresh_consolidation_references()?;
        self.run_hooks(|hooks| &hooks.before_consolidation)?;
        self.state_mut()?.run_consolidators()?;
        self.run_hooks(|hooks| &hooks.after_consolidation)?;

        for dependent in self.dependent_sheets()? {
            log::debug!("sheet {}: recalculating dependent {}", self.id, dependent.id);
            dependent.all_tables().calculate()?;
        }

        self.run_hooks(|hooks| &hooks.after_dependents)
    }

    fn run_hooks(&self, select: impl Fn(&Hooks) -> &Vec<Hook>) -> FacetResult<()> {
        let hooks = select(&self.state()?.hooks).clone();
        for hook in &hooks {
            hook(self);
        }
        Ok(())
    }

    pub fn before_consolidation<F>(&self, hook: F) -> FacetResult<()>
    where
        F: Fn(&Sheet) + 'static,
    {
        self.state_mut()?
            .hooks
            .before_consolidation
            .push(Rc::new(hook));
        Ok(())
    }

    pub fn after_consolidation<F>(&self, hook: F) -> FacetResult<()>
    where
        F: Fn(&Sheet) + 'static,
    {
        self.state_mut()?
            .hooks
            .after_consolidation
            .push(Rc::new(hook));
        Ok(())
    }

    pub fn after_dependents<F>(&self, hook: F) -> FacetResult<()>
    where
        F: Fn(&Sheet) + 'static,
    {
        self.state_mut()?.hooks.after_dependents.push(Rc::new(hook));
        Ok(())
    }

    /// Last computed value of a consolidation aggregate; blank before the first consolidation.
    pub fn consolidation_aggregate(&self, name: &str) -> FacetResult<Value> {
        let state = self.state()?;
        if state.schema.consolidation_index(name).is_none() {
            return Err(FacetError::InvalidAggregate(name.to_string()));
        }
        Ok(state
            .consolidation_values
            .get(name)
            .cloned()
            .unwrap_or_default())
    }

    pub fn consolidation_aggregates(&self) -> FacetResult<IndexMap<String, Value>> {
        let state = self.state()?;
        Ok(state
            .schema
            .consolidation_aggregates()
            .map(|name| {
                let value = state
                    .consolidation_values
                    .get(name)
                    .cloned()
                    .unwrap_or_default();
                (name.to_string(), value)
            })
            .collect())
    }

    pub fn data_column_names(&self) -> FacetResult<Vec<String>> {
        Ok(self.state()?.schema.data_columns().map(str::to_string).collect())
    }

    pub fn calculated_column_names(&self) -> FacetResult<Vec<String>> {
        Ok(self
            .state()?
            .schema
            .calculated_columns()
            .map(str::to_string)
            .collect())
    }

    pub fn column_names(&self) -> FacetResult<Vec<String>> {
        Ok(self.state()?.schema.columns().map(str::to_string).collect())
    }

    pub fn aggregate_names(&self) -> FacetResult<Vec<String>> {
        Ok(self.state()?.schema.aggregates().map(str::to_string).collect())
    }

    pub fn consolidation_aggregate_names(&self) -> FacetResult<Vec<String>> {
        Ok(self
            .state()?
            .schema
            .consolidation_aggregates()
            .map(str::to_string)
            .collect())
    }

    pub fn has_column(&self, name: &str) -> FacetResult<bool> {
        Ok(self.state()?.schema.column_index(name).is_some())
    }

    pub fn column_index(&self, name: &str) -> FacetResult<usize> {
        self.state()?
            .schema
            .column_index(name)
            .ok_or_else(|| FacetError::InvalidColumn(name.to_string()))
    }

    pub fn has_aggregate(&self, name: &str) -> FacetResult<bool> {
        Ok(self.state()?.schema.aggregate_index(name).is_some())
    }

    pub fn aggregate_index(&self, name: &str) -> FacetResult<usize> {
        self.state()?
            .schema
            .aggregate_index(name)
            .ok_or_else(|| FacetError::InvalidAggregate(name.to_string()))
    }
}

impl fmt::Debug for Sheet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sheet").field("id", &self.id).finish()
    }
}

impl PartialEq for Sheet {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

fn busy(id: SheetId) -> FacetError {
    FacetError::Reentrant(format!("sheet {id} is borrowed by a running calculation"))
}

/// Build a sheet over `data_columns`, register `facets`, and return its first table.
pub fn create_table<I, S, F>(data_columns: I, facets: F) -> FacetResult<Table>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
    F: IntoIterator<Item = Facet>,
{
    let sheet = Sheet::new(data_columns);
    sheet.add_facets(facets)?;
    sheet.new_table()
}
