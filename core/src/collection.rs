use std::collections::BTreeSet;

use rkyv::Archive;

use crate::tile::is_tile_value;

/// Every tier the team has ever reached. Only grows.
#[derive(
    Debug,
    Clone,
    Default,
    PartialEq,
    Eq,
    Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(from = "Vec<u32>", into = "Vec<u32>")]
pub struct Collection {
    values: BTreeSet<u32>,
}

impl Collection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the collection with `value` added and whether it was a first unlock.
    pub fn register(&self, value: u32) -> (Collection, bool) {
        if !is_tile_value(value) {
            return (self.clone(), false);
        }
        let mut next = self.clone();
        let unlocked = next.values.insert(value);
        (next, unlocked)
    }

    pub fn invalid_value(&self) -> Option<u32> {
        self.values().find(|value| !is_tile_value(*value))
    }

    /// Drops values that are not tiers, as decoded frames may carry them.
    pub fn sanitize(self) -> Self {
        if self.invalid_value().is_none() {
            return self;
        }
        tracing::warn!(values = ?self.values, "dropping non-tile collection values");
        Self::from(Vec::from(self))
    }

    pub fn contains(&self, value: u32) -> bool {
        self.values.contains(&value)
    }

    pub fn highest(&self) -> Option<u32> {
        self.values.last().copied()
    }

    pub fn values(&self) -> impl Iterator<Item = u32> + '_ {
        self.values.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl From<Vec<u32>> for Collection {
    fn from(values: Vec<u32>) -> Self {
        Self {
            values: values.into_iter().filter(|value| is_tile_value(*value)).collect(),
        }
    }
}

impl From<Collection> for Vec<u32> {
    fn from(collection: Collection) -> Self {
        collection.values.into_iter().collect()
    }
}

impl FromIterator<u32> for Collection {
    fn from_iter<I: IntoIterator<Item = u32>>(iter: I) -> Self {
        Self::from(iter.into_iter().collect::<Vec<_>>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_reports_first_unlock_only() {
        let collection = Collection::new();
        let (collection, first) = collection.register(100);
        assert!(first);
        let (collection, again) = collection.register(100);
        assert!(!again);
        assert_eq!(collection.len(), 1);
    }

    #[test]
    fn register_never_drops_values() {
        let mut collection = Collection::new();
        for value in [200, 100, 800, 100, 400] {
            let before: Vec<u32> = collection.values().collect();
            let (next, _) = collection.register(value);
            assert!(before.iter().all(|seen| next.contains(*seen)));
            collection = next;
        }
        assert_eq!(collection.values().collect::<Vec<_>>(), vec![100, 200, 400, 800]);
        assert_eq!(collection.highest(), Some(800));
    }

    #[test]
    fn register_ignores_non_tiles() {
        let (collection, _) = Collection::new().register(200);
        let (next, unlocked) = collection.register(7);
        assert!(!unlocked);
        assert_eq!(next, collection);
        assert!(!next.contains(7));
    }

    #[test]
    fn remote_arrays_keep_only_tiles() {
        let collection = Collection::from(vec![100, 100, 7, 400]);
        assert_eq!(Vec::<u32>::from(collection), vec![100, 400]);
    }
}
