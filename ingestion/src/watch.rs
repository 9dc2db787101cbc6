use postwatch_core::Item;
use std::collections::HashMap;

/// Result of comparing an item against the last observation of its id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    New,
    Changed { previous: i64 },
    Unchanged,
}

impl Observation {
    pub fn should_emit(&self) -> bool {
        !matches!(self, Observation::Unchanged)
    }
}

/// Last observed `ups` per item id. Owned by a single feed loop; entries
/// are only ever added or raised.
#[derive(Debug, Default)]
pub struct WatchedItems {
    ups_by_id: HashMap<String, i64>,
}

impl WatchedItems {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, item: &Item) -> Observation {
        match self.ups_by_id.get_mut(&item.id) {
            None => {
                self.ups_by_id.insert(item.id.clone(), item.ups);
                Observation::New
            }
            Some(previous) if *previous < item.ups => {
                let observation = Observation::Changed {
                    previous: *previous,
                };
                *previous = item.ups;
                observation
            }
            Some(_) => Observation::Unchanged,
        }
    }

    pub fn get(&self, id: &str) -> Option<i64> {
        self.ups_by_id.get(id).copied()
    }

    pub fn len(&self) -> usize {
        self.ups_by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ups_by_id.is_empty()
    }
}
