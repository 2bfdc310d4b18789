use std::collections::BTreeMap;

use rkyv::Archive;

use crate::board::Board;
use crate::collection::Collection;

/// Shared per-team state. The store owns it; clients only mirror it.
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
#[serde(default)]
pub struct TeamDocument {
    pub coins: i64,
    pub missions: BTreeMap<String, u32>,
    pub board: Board,
    pub collection: Collection,
    /// Bumped by the store on every accepted write.
    pub revision: u64,
}

impl TeamDocument {
    pub fn new(starting_coins: i64) -> Self {
        Self {
            coins: starting_coins,
            ..Self::default()
        }
    }

    pub fn mission_count(&self, mission_id: &str) -> u32 {
        self.missions.get(mission_id).copied().unwrap_or(0)
    }

    pub fn total_completions(&self) -> u32 {
        self.missions.values().sum()
    }

    /// Clears board cells and collection values that are not tile tiers.
    pub fn sanitize(mut self) -> Self {
        self.board = self.board.sanitize();
        self.collection = self.collection.sanitize();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let doc: TeamDocument = serde_json::from_str(r#"{"coins": 30}"#).expect("parse");
        assert_eq!(doc.coins, 30);
        assert!(doc.missions.is_empty());
        assert_eq!(doc.board, Board::empty());
        assert!(doc.collection.is_empty());
        assert_eq!(doc.revision, 0);
    }

    #[test]
    fn persisted_shape_uses_plain_arrays() {
        let mut doc = TeamDocument::new(1250);
        doc.missions.insert("m10_1".to_string(), 2);
        let (collection, _) = doc.collection.register(100);
        doc.collection = collection;
        let json = serde_json::to_value(&doc).expect("serialize");
        assert_eq!(json["coins"], 1250);
        assert_eq!(json["missions"]["m10_1"], 2);
        assert_eq!(json["board"].as_array().map(Vec::len), Some(16));
        assert_eq!(json["collection"], serde_json::json!([100]));
        assert_eq!(doc.mission_count("m10_1"), 2);
        assert_eq!(doc.mission_count("m30_1"), 0);
    }
}
