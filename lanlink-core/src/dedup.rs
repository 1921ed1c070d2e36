//! At-most-once delivery: remember which message ids were already processed.
//! Retransmissions are acknowledged again but must not be reprocessed.

use std::collections::{HashMap, HashSet};

/// Per-kind sets of processed message ids.
#[derive(Default)]
pub struct SeenIds {
    seen: HashMap<&'static str, HashSet<String>>,
}

impl SeenIds {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `id` under `kind`. Returns true if it had not been seen before,
    /// i.e. the caller should process the message.
    pub fn insert(&mut self, kind: &'static str, id: &str) -> bool {
        self.seen.entry(kind).or_default().insert(id.to_string())
    }

    pub fn contains(&self, kind: &'static str, id: &str) -> bool {
        self.seen.get(kind).is_some_and(|set| set.contains(id))
    }
}
