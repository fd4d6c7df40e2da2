use crate::error::{FacetError, FacetResult};
use crate::facet::{Consolidator, Facet, Formula};
use indexmap::IndexSet;
use std::fmt;

/// The surface a registered name lives on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SlotKind {
    /// A calculated column.
    Column,
    /// A table aggregate.
    Aggregate,
    /// A sheet-level consolidation aggregate.
    Consolidation,
}

impl SlotKind {
    pub(crate) fn label(self) -> &'static str {
        match self {
            SlotKind::Column => "column",
            SlotKind::Aggregate => "aggregate",
            SlotKind::Consolidation => "consolidation aggregate",
        }
    }
}

impl fmt::Display for SlotKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A named slot returned by registration.
///
/// `index` is the slot's position on its surface; for columns it is the column index in the row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Slot {
    pub kind: SlotKind,
    pub name: String,
    pub index: usize,
}

/// Column and aggregate names of a sheet, in registration order.
#[derive(Clone, Debug, Default)]
pub(crate) struct Schema {
    columns: IndexSet<String>,
    data_columns: usize,
    aggregates: IndexSet<String>,
    consolidation: IndexSet<String>,
}

impl Schema {
    pub(crate) fn new<I, S>(data_columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let columns: IndexSet<String> = data_columns.into_iter().map(Into::into).collect();
        Self {
            data_columns: columns.len(),
            columns,
            aggregates: IndexSet::new(),
            consolidation: IndexSet::new(),
        }
    }

    pub(crate) fn width(&self) -> usize {
        self.columns.len()
    }

    pub(crate) fn data_width(&self) -> usize {
        self.data_columns
    }

    pub(crate) fn columns(&self) -> impl Iterator<Item = &str> + '_ {
        self.columns.iter().map(String::as_str)
    }

    pub(crate) fn data_columns(&self) -> impl Iterator<Item = &str> + '_ {
        self.columns().take(self.data_columns)
    }

    pub(crate) fn calculated_columns(&self) -> impl Iterator<Item = &str> + '_ {
        self.columns().skip(self.data_columns)
    }

    pub(crate) fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.get_index_of(name)
    }

    pub(crate) fn column_name(&self, index: usize) -> Option<&str> {
        self.columns.get_index(index).map(String::as_str)
    }

    pub(crate) fn is_calculated(&self, index: usize) -> bool {
        index >= self.data_columns && index < self.columns.len()
    }

    pub(crate) fn aggregates(&self) -> impl Iterator<Item = &str> + '_ {
        self.aggregates.iter().map(String::as_str)
    }

    pub(crate) fn aggregate_index(&self, name: &str) -> Option<usize> {
        self.aggregates.get_index_of(name)
    }

    pub(crate) fn consolidation_aggregates(&self) -> impl Iterator<Item = &str> + '_ {
        self.consolidation.iter().map(String::as_str)
    }

    pub(crate) fn consolidation_index(&self, name: &str) -> Option<usize> {
        self.consolidation.get_index_of(name)
    }

    /// Record the column and aggregate names declared by `facets`.
    ///
    /// Validates the whole batch first so a failure leaves the schema untouched.
    pub(crate) fn register_facets(&mut self, facets: &[Facet]) -> FacetResult<Vec<Slot>> {
        let mut columns = Pending::new(SlotKind::Column, &self.columns);
        let mut aggregates = Pending::new(SlotKind::Aggregate, &self.aggregates);

        for facet in facets {
            require_name("facet", facet.name())?;
            for formula in facet.formulas() {
                match formula {
                    Formula::Column { name, .. } => columns.push(name)?,
                    Formula::Aggregate { name, .. } => aggregates.push(name)?,
                }
            }
        }

        let mut slots = columns.slots();
        slots.extend(aggregates.slots());
        for slot in &slots {
            match slot.kind {
                SlotKind::Column => self.columns.insert(slot.name.clone()),
                _ => self.aggregates.insert(slot.name.clone()),
            };
        }
        Ok(slots)
    }

    pub(crate) fn register_consolidators(
        &mut self,
        consolidators: &[Consolidator],
    ) -> FacetResult<Vec<Slot>> {
        let mut pending = Pending::new(SlotKind::Consolidation, &self.consolidation);
        for consolidator in consolidators {
            require_name("consolidator", consolidator.name())?;
            for (name, _) in consolidator.formulas() {
                pending.push(name)?;
            }
        }

        let slots = pending.slots();
        for slot in &slots {
            self.consolidation.insert(slot.name.clone());
        }
        Ok(slots)
    }
}

pub(crate) fn require_name(what: &str, name: &str) -> FacetResult<()> {
    if name.trim().is_empty() {
        return Err(FacetError::UnsupportedFunctionShape(format!(
            "{what} must be named"
        )));
    }
    Ok(())
}

/// Names queued for one surface during a registration call.
struct Pending<'a> {
    kind: SlotKind,
    existing: &'a IndexSet<String>,
    names: IndexSet<String>,
}

impl<'a> Pending<'a> {
    fn new(kind: SlotKind, existing: &'a IndexSet<String>) -> Self {
        Self {
            kind,
            existing,
            names: IndexSet::new(),
        }
    }

    fn push(&mut self, name: &str) -> FacetResult<()> {
        require_name(self.kind.label(), name)?;
        if self.existing.contains(name) || !self.names.insert(name.to_string()) {
            return Err(FacetError::DuplicateRegistration {
                kind: self.kind.label(),
                name: name.to_string(),
            });
        }
        Ok(())
    }

    fn slots(self) -> Vec<Slot> {
        let offset = self.existing.len();
        let kind = self.kind;
        self.names
            .into_iter()
            .enumerate()
            .map(|(i, name)| Slot {
                kind,
                name,
                index: offset + i,
            })
            .collect()
    }
}
