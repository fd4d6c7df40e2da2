//! Reactive tabular computation.
//!
//! A [`Sheet`] declares data columns and registers [`Facet`]s (calculated columns and table
//! aggregates) and [`Consolidator`]s (aggregates across tables). Tables created from a sheet share
//! its schema; calculating a table runs every facet over its rows, then the sheet consolidates and
//! recalculates every sheet that depends on it through a [`ReferenceFacet`].

mod context;
mod dependency;
mod error;
mod facet;
pub mod functions;
mod population;
mod reference;
mod schema;
mod select;
mod settings;
mod sheet;
mod table;
mod tables;
mod tags;
mod value;

pub use crate::context::{AggregateContext, ConsolidationContext, RowContext, TableProjection};
pub use crate::error::{FacetError, FacetResult};
pub use crate::facet::{Consolidator, Facet, ReferenceFacet};
pub use crate::population::{PopulationStore, Row, RowId, Span, DEFAULT_POPULATION};
pub use crate::reference::{
    ExternalSheet, ExternalTable, ReferenceFacetId, ReferenceHandle, ReferenceScope,
};
pub use crate::schema::{Slot, SlotKind};
pub use crate::select::{ConsolidationSelect, RowView, Select, SelectIter, Selected};
pub use crate::settings::{CalcSettings, CalculationMode};
pub use crate::sheet::{create_table, Hook, Sheet, SheetId, TableId, Tag};
pub use crate::table::{Callback, RowChanges, RowHandle, RowsView, Table};
pub use crate::tables::{Projection, Tables};
pub use crate::tags::{TagIndex, Upserted};
pub use crate::value::Value;
