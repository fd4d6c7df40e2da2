use crate::error::FacetResult;
use std::collections::{HashSet, VecDeque};
use std::hash::Hash;

/// Breadth-first search from `start` along `successors`, reporting whether `target` is reachable.
///
/// Used to reject a new dependency edge `dep -> dependent` when `dep` is already reachable from
/// `dependent`.
pub(crate) fn reaches<N, K>(
    start: N,
    target: &K,
    key: impl Fn(&N) -> K,
    mut successors: impl FnMut(&N) -> FacetResult<Vec<N>>,
) -> FacetResult<bool>
where
    K: Hash + Eq,
{
    let mut seen = HashSet::new();
    let mut queue = VecDeque::new();
    seen.insert(key(&start));
    queue.push_back(start);

    while let Some(current) = queue.pop_front() {
        if key(&current) == *target {
            return Ok(true);
        }
        for next in successors(&current)? {
            if seen.insert(key(&next)) {
                queue.push_back(next);
            }
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn graph(edges: &[(u32, u32)]) -> HashMap<u32, Vec<u32>> {
        let mut graph: HashMap<u32, Vec<u32>> = HashMap::new();
        for &(from, to) in edges {
            graph.entry(from).or_default().push(to);
        }
        graph
    }

    fn reachable(graph: &HashMap<u32, Vec<u32>>, start: u32, target: u32) -> bool {
        reaches(start, &target, |n| *n, |n| {
            Ok(graph.get(n).cloned().unwrap_or_default())
        })
        .unwrap()
    }

    #[test]
    fn follows_transitive_edges() {
        let g = graph(&[(1, 2), (2, 3), (3, 4)]);
        assert!(reachable(&g, 1, 4));
        assert!(!reachable(&g, 4, 1));
        assert!(reachable(&g, 2, 2));
    }

    #[test]
    fn terminates_on_cycles() {
        let g = graph(&[(1, 2), (2, 1), (2, 3)]);
        assert!(reachable(&g, 1, 3));
        assert!(!reachable(&g, 1, 5));
    }
}
