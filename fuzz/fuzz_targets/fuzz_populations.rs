#![no_main]

use formula_facets::{PopulationStore, Value};
use libfuzzer_sys::fuzz_target;

/// Bound the number of operations decoded from one input.
const MAX_OPS: usize = 256;
const NAMES: [&str; 4] = ["a", "b", "c", "d"];

fn rows(count: u8) -> Vec<Vec<Value>> {
    (0..count % 4).map(|i| vec![Value::from(i as f64)]).collect()
}

fn check_spans(store: &PopulationStore) {
    let mut spans: Vec<_> = store.populations().values().copied().collect();
    spans.sort_by_key(|span| (span.start, span.end()));
    for pair in spans.windows(2) {
        assert!(pair[0].end() <= pair[1].start, "overlapping populations: {spans:?}");
    }
    if let Some(last) = spans.last() {
        assert!(last.end() <= store.len(), "population past the dataset end");
    }
}

fuzz_target!(|data: &[u8]| {
    let mut store = PopulationStore::new();
    for op in data.chunks_exact(3).take(MAX_OPS) {
        let name = NAMES[(op[1] % 4) as usize];
        let other = NAMES[(op[2] % 4) as usize];
        // Errors are expected; only the invariants matter.
        let _ = match op[0] % 6 {
            0 => store.load(rows(op[2]), name).map(drop),
            1 => {
                store.unload(name);
                Ok(())
            }
            2 => store.replace(rows(op[2]), name).map(drop),
            3 => store.prepend(rows(op[2]), name, Some(other)).map(drop),
            4 => store.append(rows(op[2]), name, Some(other)).map(drop),
            _ => store.append(rows(op[2]), name, None).map(drop),
        };
        check_spans(&store);
    }
});
