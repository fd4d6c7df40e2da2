//! Row storage for a single table.
//!
//! Rows live in an arena keyed by a stable [`RowId`]; the live row sequence is a vector of ids.
//! A *population* is a named contiguous range `[start, start + len)` over that sequence. Every
//! mutation keeps all other populations' offsets consistent with the new sequence length.

use crate::error::{FacetError, FacetResult};
use crate::value::Value;
use indexmap::IndexMap;
use std::collections::HashMap;

pub type RowId = u64;

/// Population used when callers do not name one.
pub const DEFAULT_POPULATION: &str = "default";

/// A row removed from the store, together with the id it had.
#[derive(Clone, Debug, PartialEq)]
pub struct Row {
    pub id: RowId,
    pub values: Vec<Value>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub len: usize,
}

impl Span {
    pub fn end(&self) -> usize {
        self.start + self.len
    }
}

#[derive(Clone, Debug, Default)]
pub struct PopulationStore {
    order: Vec<RowId>,
    records: HashMap<RowId, Vec<Value>>,
    populations: IndexMap<String, Span>,
    next_id: RowId,
}

impl PopulationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn populations(&self) -> &IndexMap<String, Span> {
        &self.populations
    }

    pub fn population(&self, name: &str) -> Option<Span> {
        self.populations.get(name).copied()
    }

    pub fn id_at(&self, position: usize) -> Option<RowId> {
        self.order.get(position).copied()
    }

    pub fn position_of(&self, id: RowId) -> Option<usize> {
        if !self.records.contains_key(&id) {
            return None;
        }
        self.order.iter().position(|r| *r == id)
    }

    pub fn row_at(&self, position: usize) -> Option<&[Value]> {
        let id = self.order.get(position)?;
        self.records.get(id).map(Vec::as_slice)
    }

    pub fn row(&self, id: RowId) -> Option<&[Value]> {
        self.records.get(&id).map(Vec::as_slice)
    }

    pub fn contains(&self, id: RowId) -> bool {
        self.records.contains_key(&id)
    }

    /// Rows in live order.
    pub fn iter(&self) -> impl Iterator<Item = &[Value]> + '_ {
        self.order
            .iter()
            .filter_map(|id| self.records.get(id).map(Vec::as_slice))
    }

    pub fn set_cell(&mut self, position: usize, column: usize, value: Value) -> FacetResult<()> {
        let len = self.order.len();
        let row = self
            .order
            .get(position)
            .and_then(|id| self.records.get_mut(id))
            .ok_or(FacetError::InvalidRow { position, len })?;
        let slot = row
            .get_mut(column)
            .ok_or_else(|| FacetError::InvalidColumn(column.to_string()))?;
        *slot = value;
        Ok(())
    }

    pub fn set_cell_by_id(&mut self, id: RowId, column: usize, value: Value) -> FacetResult<()> {
        let row = self
            .records
            .get_mut(&id)
            .ok_or_else(|| FacetError::UnknownId(format!("row {id}")))?;
        let slot = row
            .get_mut(column)
            .ok_or_else(|| FacetError::InvalidColumn(column.to_string()))?;
        *slot = value;
        Ok(())
    }

    /// Pad every row with blanks up to `width` cells.
    pub fn ensure_width(&mut self, width: usize) {
        for row in self.records.values_mut() {
            if row.len() < width {
                row.resize(width, Value::Blank);
            }
        }
    }

    /// Append rows to the end of the store.
    ///
    /// A population that already ends at the end of the dataset is extended; one that exists
    /// anywhere else cannot be continued.
    pub fn load(&mut self, rows: Vec<Vec<Value>>, population: &str) -> FacetResult<Vec<RowId>> {
        let end = self.order.len();
        let existing = self.populations.get(population).copied();
        if let Some(span) = existing {
            if span.end() != end {
                return Err(FacetError::NonContiguousPopulation(population.to_string()));
            }
        }
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let count = rows.len();
        let ids = self.store(rows);
        self.order.extend_from_slice(&ids);

        match existing {
            Some(span) => {
                self.populations.insert(
                    population.to_string(),
                    Span {
                        start: span.start,
                        len: span.len + count,
                    },
                );
            }
            None => {
                self.populations
                    .insert(population.to_string(), Span { start: end, len: count });
            }
        }
        Ok(ids)
    }

    /// Remove a population and its rows. Unknown populations remove nothing.
    pub fn unload(&mut self, population: &str) -> Vec<Row> {
        let Some(span) = self.populations.shift_remove(population) else {
            return Vec::new();
        };

        for other in self.populations.values_mut() {
            if other.start > span.start {
                other.start -= span.len;
            }
        }

        let removed: Vec<RowId> = self.order.drain(span.start..span.end()).collect();
        self.take_records(removed)
    }

    /// Replace a population's rows in place, returning the new ids and the removed rows.
    pub fn replace(
        &mut self,
        rows: Vec<Vec<Value>>,
        population: &str,
    ) -> FacetResult<(Vec<RowId>, Vec<Row>)> {
        let span = self
            .population(population)
            .ok_or_else(|| FacetError::UnknownPopulation(population.to_string()))?;

        let count = rows.len();
        let ids = self.store(rows);

        for (name, other) in self.populations.iter_mut() {
            if name == population {
                other.len = count;
            } else if other.start > span.start || (other.start == span.start && other.len > 0) {
                // Shift by the signed length delta. An emptied target shares its start with the
                // range that followed it, which still has to move past the new rows.
                other.start = other.start + count - span.len;
            }
        }

        let removed: Vec<RowId> = self
            .order
            .splice(span.start..span.end(), ids.iter().copied())
            .collect();
        Ok((ids, self.take_records(removed)))
    }

    pub fn prepend(
        &mut self,
        rows: Vec<Vec<Value>>,
        population: &str,
        new_population: Option<&str>,
    ) -> FacetResult<Vec<RowId>> {
        self.insert_rows(true, rows, population, new_population)
    }

    pub fn append(
        &mut self,
        rows: Vec<Vec<Value>>,
        population: &str,
        new_population: Option<&str>,
    ) -> FacetResult<Vec<RowId>> {
        self.insert_rows(false, rows, population, new_population)
    }

    fn insert_rows(
        &mut self,
        before: bool,
        rows: Vec<Vec<Value>>,
        population: &str,
        new_population: Option<&str>,
    ) -> FacetResult<Vec<RowId>> {
        let span = self
            .population(population)
            .ok_or_else(|| FacetError::UnknownPopulation(population.to_string()))?;
        let expanding = new_population.map_or(true, |name| name == population);
        if let Some(name) = new_population.filter(|_| !expanding) {
            if self.populations.contains_key(name) {
                return Err(FacetError::NonContiguousPopulation(name.to_string()));
            }
        }

        let count = rows.len();
        let at = if before { span.start } else { span.end() };
        let ids = self.store(rows);
        self.order.splice(at..at, ids.iter().copied());

        for (name, other) in self.populations.iter_mut() {
            if name == population {
                if expanding {
                    other.len += count;
                } else if before {
                    other.start += count;
                }
            } else if other.start > at
                || (other.start == at && (other.len > 0 || !(before && expanding)))
            {
                // Empty ranges at the splice point stay ahead of a range growing at its front.
                other.start += count;
            }
        }

        if let Some(name) = new_population.filter(|_| !expanding) {
            self.populations
                .insert(name.to_string(), Span { start: at, len: count });
        }
        Ok(ids)
    }

    /// Dataset positions covered by `populations`, or every position when none are named.
    ///
    /// Named ranges are visited in the populations map's own order, not the order given.
    pub fn row_positions<'a>(
        &'a self,
        populations: &'a [String],
    ) -> Box<dyn Iterator<Item = usize> + 'a> {
        if populations.is_empty() {
            return Box::new(0..self.order.len());
        }
        Box::new(
            self.populations
                .iter()
                .filter(move |(name, _)| populations.contains(*name))
                .flat_map(|(_, span)| span.start..span.end()),
        )
    }

    pub fn population_row_ids(&self, populations: &[String]) -> Vec<RowId> {
        self.row_positions(populations)
            .filter_map(|position| self.id_at(position))
            .collect()
    }

    fn store(&mut self, rows: Vec<Vec<Value>>) -> Vec<RowId> {
        rows.into_iter()
            .map(|row| {
                let id = self.next_id;
                self.next_id += 1;
                self.records.insert(id, row);
                id
            })
            .collect()
    }

    fn take_records(&mut self, ids: Vec<RowId>) -> Vec<Row> {
        ids.into_iter()
            .filter_map(|id| self.records.remove(&id).map(|values| Row { id, values }))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn rows(values: &[i64]) -> Vec<Vec<Value>> {
        values.iter().map(|v| vec![Value::from(*v)]).collect()
    }

    fn firsts(store: &PopulationStore) -> Vec<Value> {
        store.iter().map(|row| row[0].clone()).collect()
    }

    #[test]
    fn contiguous_loads_extend_the_population() {
        let mut store = PopulationStore::new();
        store.load(rows(&[1, 2]), "a").unwrap();
        store.load(rows(&[3]), "a").unwrap();
        assert_eq!(store.population("a"), Some(Span { start: 0, len: 3 }));
    }

    #[test]
    fn non_contiguous_load_fails() {
        let mut store = PopulationStore::new();
        store.load(rows(&[1]), "a").unwrap();
        store.load(rows(&[2]), "b").unwrap();
        assert_eq!(
            store.load(rows(&[3]), "a"),
            Err(FacetError::NonContiguousPopulation("a".into()))
        );
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn unload_shifts_later_populations_and_keeps_ids() {
        let mut store = PopulationStore::new();
        store.load(rows(&[1, 2]), "a").unwrap();
        let b = store.load(rows(&[3, 4, 5]), "b").unwrap();
        store.load(rows(&[6]), "c").unwrap();

        let removed = store.unload("a");
        assert_eq!(removed.len(), 2);
        assert_eq!(store.population("b"), Some(Span { start: 0, len: 3 }));
        assert_eq!(store.population("c"), Some(Span { start: 3, len: 1 }));
        assert_eq!(store.population_row_ids(&["b".to_string()]), b);
        assert!(store.unload("missing").is_empty());
    }

    #[test]
    fn replace_adjusts_later_starts_by_delta() {
        let mut store = PopulationStore::new();
        store.load(rows(&[1, 2, 3]), "a").unwrap();
        store.load(rows(&[4]), "b").unwrap();

        let (ids, removed) = store.replace(rows(&[7]), "a").unwrap();
        assert_eq!(ids, vec![4]);
        assert_eq!(removed.iter().map(|r| r.id).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert_eq!(store.population("a"), Some(Span { start: 0, len: 1 }));
        assert_eq!(store.population("b"), Some(Span { start: 1, len: 1 }));
        assert_eq!(firsts(&store), vec![Value::from(7), Value::from(4)]);
    }

    #[test]
    fn prepend_into_new_population_shifts_target() {
        let mut store = PopulationStore::new();
        store.load(rows(&[1]), "a").unwrap();
        store.load(rows(&[2, 3]), "b").unwrap();

        store.prepend(rows(&[9, 9]), "b", Some("header")).unwrap();
        assert_eq!(store.population("a"), Some(Span { start: 0, len: 1 }));
        assert_eq!(store.population("header"), Some(Span { start: 1, len: 2 }));
        assert_eq!(store.population("b"), Some(Span { start: 3, len: 2 }));
    }

    #[test]
    fn append_absorbs_rows_when_no_new_name() {
        let mut store = PopulationStore::new();
        store.load(rows(&[1]), "a").unwrap();
        store.load(rows(&[2]), "b").unwrap();

        store.append(rows(&[5, 6]), "a", None).unwrap();
        assert_eq!(store.population("a"), Some(Span { start: 0, len: 3 }));
        assert_eq!(store.population("b"), Some(Span { start: 3, len: 1 }));
        assert_eq!(
            firsts(&store),
            vec![Value::from(1), Value::from(5), Value::from(6), Value::from(2)]
        );
    }

    #[test]
    fn refilling_an_emptied_population_shifts_the_next_one() {
        let mut store = PopulationStore::new();
        store.load(vec![vec![Value::from("P0")]], "p").unwrap();
        store.load(vec![vec![Value::from("Q0")]], "q").unwrap();
        store.load(vec![vec![Value::from("R0")]], "r").unwrap();

        store.replace(Vec::new(), "p").unwrap();
        assert_eq!(store.population("p"), Some(Span { start: 0, len: 0 }));
        assert_eq!(store.population("q"), Some(Span { start: 0, len: 1 }));

        store.replace(rows(&[1, 2]), "p").unwrap();
        assert_eq!(store.population("p"), Some(Span { start: 0, len: 2 }));
        assert_eq!(store.population("q"), Some(Span { start: 2, len: 1 }));
        assert_eq!(store.population("r"), Some(Span { start: 3, len: 1 }));

        let removed = store.unload("q");
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].values, vec![Value::from("Q0")]);
    }

    #[test]
    fn empty_populations_stay_outside_grown_ranges() {
        let mut store = PopulationStore::new();
        store.load(rows(&[1]), "a").unwrap();
        store.load(rows(&[2]), "e").unwrap();
        store.load(rows(&[3]), "b").unwrap();
        store.replace(Vec::new(), "e").unwrap();

        store.append(rows(&[4]), "a", None).unwrap();
        assert_eq!(store.population("a"), Some(Span { start: 0, len: 2 }));
        assert_eq!(store.population("e"), Some(Span { start: 2, len: 0 }));
        assert_eq!(store.population("b"), Some(Span { start: 2, len: 1 }));

        store.prepend(rows(&[5]), "b", None).unwrap();
        assert_eq!(store.population("e"), Some(Span { start: 2, len: 0 }));
        assert_eq!(store.population("b"), Some(Span { start: 2, len: 2 }));
    }

    #[test]
    fn row_positions_follow_population_order() {
        let mut store = PopulationStore::new();
        store.load(rows(&[1]), "a").unwrap();
        store.load(rows(&[2, 3]), "b").unwrap();
        let names = vec!["b".to_string(), "a".to_string()];
        assert_eq!(store.row_positions(&names).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert_eq!(store.row_positions(&[]).count(), 3);
    }
}
