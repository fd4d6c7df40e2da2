//! Formula definitions.
//!
//! A [`Facet`] is a named, ordered list of calculated-column and table-aggregate formulas. A
//! [`Consolidator`] is the sheet-level equivalent producing consolidation aggregates, and a
//! [`ReferenceFacet`] publishes named external values.
//!
//! Building one of these only *declares* names; nothing is computed until a table calculates.
//! The stored closures are re-invoked every tick with live contexts.

use crate::context::{AggregateContext, ConsolidationContext, RowContext};
use crate::error::FacetResult;
use crate::reference::ReferenceScope;
use crate::value::Value;
use std::fmt;
use std::rc::Rc;

pub type ColumnFormula = Rc<dyn Fn(&RowContext<'_>) -> FacetResult<Value>>;
pub type AggregateFormula = Rc<dyn Fn(&AggregateContext<'_>) -> FacetResult<Value>>;
pub type ConsolidationFormula = Rc<dyn Fn(&ConsolidationContext<'_>) -> FacetResult<Value>>;
pub type ReferenceFormula = Rc<dyn Fn(&mut ReferenceScope) -> FacetResult<()>>;

#[derive(Clone)]
pub(crate) enum Formula {
    Column { name: String, formula: ColumnFormula },
    Aggregate { name: String, formula: AggregateFormula },
}

impl Formula {
    pub(crate) fn name(&self) -> &str {
        match self {
            Formula::Column { name, .. } | Formula::Aggregate { name, .. } => name,
        }
    }
}

/// A named group of row and aggregate formulas.
///
/// ```
/// use formula_facets::{Facet, Value};
///
/// let line_items = Facet::new("line_items")
///     .column("line_cost", |row| {
///         Ok(Value::from(row.number("quantity")? * row.number("unit_cost")?))
///     })
///     .aggregate("total_cost", |table| Ok(formula_facets::functions::sum(&table.column("line_cost")?).into()));
/// assert_eq!(line_items.names().collect::<Vec<_>>(), ["line_cost", "total_cost"]);
/// ```
#[derive(Clone)]
pub struct Facet {
    name: String,
    formulas: Vec<Formula>,
}

impl Facet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            formulas: Vec::new(),
        }
    }

    /// Declare a calculated column computed once per row.
    pub fn column<F>(mut self, name: impl Into<String>, formula: F) -> Self
    where
        F: Fn(&RowContext<'_>) -> FacetResult<Value> + 'static,
    {
        self.formulas.push(Formula::Column {
            name: name.into(),
            formula: Rc::new(formula),
        });
        self
    }

    /// Declare a table aggregate computed once per tick.
    pub fn aggregate<F>(mut self, name: impl Into<String>, formula: F) -> Self
    where
        F: Fn(&AggregateContext<'_>) -> FacetResult<Value> + 'static,
    {
        self.formulas.push(Formula::Aggregate {
            name: name.into(),
            formula: Rc::new(formula),
        });
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared names in declaration order.
    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.formulas.iter().map(Formula::name)
    }

    pub(crate) fn formulas(&self) -> &[Formula] {
        &self.formulas
    }
}

impl fmt::Debug for Facet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Facet")
            .field("name", &self.name)
            .field("formulas", &self.names().collect::<Vec<_>>())
            .finish()
    }
}

/// A named group of consolidation-aggregate formulas run across a tag-filtered set of tables.
#[derive(Clone)]
pub struct Consolidator {
    name: String,
    formulas: Vec<(String, ConsolidationFormula)>,
}

impl Consolidator {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            formulas: Vec::new(),
        }
    }

    pub fn aggregate<F>(mut self, name: impl Into<String>, formula: F) -> Self
    where
        F: Fn(&ConsolidationContext<'_>) -> FacetResult<Value> + 'static,
    {
        self.formulas.push((name.into(), Rc::new(formula)));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.formulas.iter().map(|(name, _)| name.as_str())
    }

    pub(crate) fn formulas(&self) -> &[(String, ConsolidationFormula)] {
        &self.formulas
    }
}

impl fmt::Debug for Consolidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Consolidator")
            .field("name", &self.name)
            .field("formulas", &self.names().collect::<Vec<_>>())
            .finish()
    }
}

/// A named function publishing external values into a [`ReferenceScope`].
///
/// It runs once when registered (to discover which sheets and tables it reads) and again at the
/// start of every calculation cycle.
#[derive(Clone)]
pub struct ReferenceFacet {
    name: String,
    formula: ReferenceFormula,
}

impl ReferenceFacet {
    pub fn new<F>(name: impl Into<String>, formula: F) -> Self
    where
        F: Fn(&mut ReferenceScope) -> FacetResult<()> + 'static,
    {
        Self {
            name: name.into(),
            formula: Rc::new(formula),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn run(&self, scope: &mut ReferenceScope) -> FacetResult<()> {
        (self.formula)(scope)
    }
}

impl fmt::Debug for ReferenceFacet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReferenceFacet")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
