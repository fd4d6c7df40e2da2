use crate::error::{FacetError, FacetResult};
use crate::facet::ReferenceFacet;
use crate::reference::ReferenceHandle;
use crate::sheet::{Sheet, TableId, Tag};
use crate::table::{Callback, Table};
use crate::value::Value;
use indexmap::IndexMap;
use std::fmt;
use std::rc::Rc;

/// Aggregate values projected over a set of tables.
#[derive(Clone, Debug, PartialEq)]
pub enum Projection {
    /// One value per table for a single aggregate.
    Single(Vec<Value>),
    /// One value per table for each aggregate, keyed in registration order.
    Multiple(IndexMap<String, Vec<Value>>),
}

/// The tables of a sheet matching a tag lookup.
///
/// The lookup is re-evaluated by every call, so tables created after the view still show up.
#[derive(Clone)]
pub struct Tables {
    sheet: Sheet,
    tags: Vec<Tag>,
}

impl Tables {
    pub(crate) fn new(sheet: Sheet, tags: Vec<Tag>) -> Self {
        Self { sheet, tags }
    }

    pub fn sheet(&self) -> Sheet {
        self.sheet.clone()
    }

    pub fn tags(&self) -> &[Tag] {
        &self.tags
    }

    /// Matched ids in creation order.
    pub fn ids(&self) -> FacetResult<Vec<TableId>> {
        self.sheet.table_ids(&self.tags)
    }

    pub fn handles(&self) -> FacetResult<Vec<Table>> {
        Ok(self
            .ids()?
            .into_iter()
            .map(|id| Table::new(id, self.sheet.clone()))
            .collect())
    }

    pub fn iter(&self) -> std::vec::IntoIter<FacetResult<Table>> {
        self.into_iter()
    }

    pub fn len(&self) -> FacetResult<usize> {
        Ok(self.ids()?.len())
    }

    pub fn is_empty(&self) -> FacetResult<bool> {
        Ok(self.len()? == 0)
    }

    /// One value of aggregate `name` per matched table.
    pub fn aggregate(&self, name: &str) -> FacetResult<Vec<Value>> {
        let ids = self.ids()?;
        self.sheet.state()?.aggregate_values(&ids, name)
    }

    /// Several aggregates at once. No names selects every aggregate.
    pub fn aggregates(&self, names: &[&str]) -> FacetResult<Projection> {
        if let [name] = names {
            return self.aggregate(name).map(Projection::Single);
        }

        let ids = self.ids()?;
        let state = self.sheet.state()?;
        let unknown: Vec<&str> = names
            .iter()
            .copied()
            .filter(|name| state.schema.aggregate_index(name).is_none())
            .collect();
        if !unknown.is_empty() {
            return Err(FacetError::InvalidAggregate(unknown.join(", ")));
        }

        let mut projection = IndexMap::new();
        for name in state.schema.aggregates() {
            if names.is_empty() || names.contains(&name) {
                projection.insert(name.to_string(), state.aggregate_values(&ids, name)?);
            }
        }
        Ok(Projection::Multiple(projection))
    }

    /// Register `facet` and make it the reference facet of every matched table.
    pub fn set_references(&self, facet: ReferenceFacet) -> FacetResult<()> {
        let ids = self.ids()?;
        let id = self.sheet.register_references(facet)?;
        let mut state = self.sheet.state_mut()?;
        for table in ids {
            state.table_mut(table)?.reference_facet = Some(id);
        }
        state.prune_references();
        Ok(())
    }

    /// A reference override shared by every matched table.
    pub fn reference_handle(
        &self,
        name: &str,
        initial: impl Into<Value>,
    ) -> FacetResult<ReferenceHandle> {
        ReferenceHandle::for_tables(name, initial.into(), self.clone())
    }

    pub(crate) fn set_reference_override(&self, name: &str, value: &Value) -> FacetResult<()> {
        for table in self.handles()? {
            table.set_reference_override(name, value.clone())?;
        }
        Ok(())
    }

    pub fn before_calculate<F>(&self, callback: F) -> FacetResult<()>
    where
        F: Fn(&Table) + 'static,
    {
        let callback: Callback = Rc::new(callback);
        for table in self.handles()? {
            table.push_before(Rc::clone(&callback))?;
        }
        Ok(())
    }

    pub fn after_calculate<F>(&self, callback: F) -> FacetResult<()>
    where
        F: Fn(&Table) + 'static,
    {
        let callback: Callback = Rc::new(callback);
        for table in self.handles()? {
            table.push_after(Rc::clone(&callback))?;
        }
        Ok(())
    }

    /// Refresh references, run the facets of every matched table, then consolidate once.
    pub fn calculate(&self) -> FacetResult<()> {
        self.sheet.ensure_idle()?;
        self.sheet.refresh_references()?;
        for table in self.handles()? {
            table.execute_facets()?;
        }
        self.sheet.do_consolidation()
    }

    /// Detach every matched table, then consolidate once.
    pub fn detach(&self) -> FacetResult<()> {
        for id in self.ids()? {
            self.sheet.detach_table(id, false)?;
        }
        self.sheet.do_consolidation()
    }
}

impl<'a> IntoIterator for &'a Tables {
    type Item = FacetResult<Table>;
    type IntoIter = std::vec::IntoIter<FacetResult<Table>>;

    /// Matched tables in creation order. A failed lookup yields a single error.
    fn into_iter(self) -> Self::IntoIter {
        let items: Vec<FacetResult<Table>> = match self.handles() {
            Ok(handles) => handles.into_iter().map(Ok).collect(),
            Err(err) => vec![Err(err)],
        };
        items.into_iter()
    }
}

impl fmt::Debug for Tables {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tables")
            .field("sheet", &self.sheet.id())
            .field("tags", &self.tags)
            .finish()
    }
}
