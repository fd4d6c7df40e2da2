//! Order-preserving tag index.
//!
//! Maps tags to the identifiers carrying them and identifiers back to their tags. Listing is
//! always reported in the *global* identifier insertion order, never in per-tag order, so a
//! filtered listing is a subsequence of the unfiltered one.

use crate::error::{FacetError, FacetResult};
use indexmap::{IndexMap, IndexSet};
use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::hash::Hash;

/// Result of [`TagIndex::upsert`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Upserted<T: Hash + Eq> {
    Added,
    /// The id already existed; carries the tags that were dropped.
    Updated(IndexSet<T>),
}

#[derive(Clone, Debug)]
pub struct TagIndex<T, I> {
    tags: HashMap<T, HashSet<I>>,
    ids: IndexMap<I, IndexSet<T>>,
}

impl<T, I> Default for TagIndex<T, I> {
    fn default() -> Self {
        Self {
            tags: HashMap::new(),
            ids: IndexMap::new(),
        }
    }
}

impl<T, I> TagIndex<T, I>
where
    T: Hash + Eq + Clone,
    I: Hash + Eq + Clone + Debug,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_id(&self, id: &I) -> bool {
        self.ids.contains_key(id)
    }

    pub fn has_tag(&self, tag: &T) -> bool {
        self.tags.contains_key(tag)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn tags_of(&self, id: &I) -> Option<&IndexSet<T>> {
        self.ids.get(id)
    }

    /// Add `tags` to `id`, creating the id if it is new.
    pub fn add<It>(&mut self, tags: It, id: I)
    where
        It: IntoIterator<Item = T>,
    {
        let entry = self.ids.entry(id.clone()).or_default();
        for tag in tags {
            self.tags.entry(tag.clone()).or_default().insert(id.clone());
            entry.insert(tag);
        }
    }

    /// Ids carrying any of `tags`, in global insertion order. No tags lists every id.
    pub fn list(&self, tags: &[T]) -> Vec<I> {
        if tags.is_empty() {
            return self.ids.keys().cloned().collect();
        }

        let mut candidates: HashSet<&I> = HashSet::new();
        for tag in tags {
            if let Some(ids) = self.tags.get(tag) {
                candidates.extend(ids.iter());
            }
        }

        if candidates.len() == self.ids.len() {
            return self.ids.keys().cloned().collect();
        }

        self.ids
            .keys()
            .filter(|id| candidates.contains(id))
            .cloned()
            .collect()
    }

    /// Replace the tags of an existing id and return the tags it lost.
    ///
    /// The id keeps its place in the global order.
    pub fn update<It>(&mut self, id: &I, tags: It) -> FacetResult<IndexSet<T>>
    where
        It: IntoIterator<Item = T>,
    {
        let new_tags: IndexSet<T> = tags.into_iter().collect();
        let Some(previous) = self.ids.get_mut(id) else {
            return Err(FacetError::UnknownId(format!("{id:?}")));
        };
        let previous = std::mem::replace(previous, new_tags.clone());

        let dropped: IndexSet<T> = previous
            .iter()
            .filter(|tag| !new_tags.contains(*tag))
            .cloned()
            .collect();

        for tag in &dropped {
            self.detach_tag(tag, id);
        }
        for tag in new_tags {
            self.tags.entry(tag).or_default().insert(id.clone());
        }

        Ok(dropped)
    }

    /// Remove an id, pruning tags left without members. Returns its former tags.
    pub fn remove(&mut self, id: &I) -> Option<IndexSet<T>> {
        let tags = self.ids.shift_remove(id)?;
        for tag in &tags {
            self.detach_tag(tag, id);
        }
        Some(tags)
    }

    pub fn upsert<It>(&mut self, id: I, tags: It) -> FacetResult<Upserted<T>>
    where
        It: IntoIterator<Item = T>,
    {
        if !self.has_id(&id) {
            self.add(tags, id);
            return Ok(Upserted::Added);
        }
        self.update(&id, tags).map(Upserted::Updated)
    }

    fn detach_tag(&mut self, tag: &T, id: &I) {
        if let Some(members) = self.tags.get_mut(tag) {
            members.remove(id);
            if members.is_empty() {
                self.tags.remove(tag);
            }
        }
    }
}
