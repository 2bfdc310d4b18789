use rkyv::Archive;

use crate::board::{Board, BoardError};
use crate::collection::Collection;
use crate::document::TeamDocument;

/// One field-level write. Increments commute; replacements are last-writer-wins.
#[derive(Debug, Clone, PartialEq, Eq, Archive, rkyv::Serialize, rkyv::Deserialize)]
pub enum FieldOp {
    IncrementCoins(i64),
    IncrementMission { mission_id: String, delta: u32 },
    ReplaceBoard(Board),
    ReplaceCollection(Collection),
}

impl FieldOp {
    pub fn path(&self) -> String {
        match self {
            FieldOp::IncrementCoins(_) => "coins".to_string(),
            FieldOp::IncrementMission { mission_id, .. } => format!("missions.{mission_id}"),
            FieldOp::ReplaceBoard(_) => "board".to_string(),
            FieldOp::ReplaceCollection(_) => "collection".to_string(),
        }
    }
}

/// Batch of field ops sent as a single partial update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Archive, rkyv::Serialize, rkyv::Deserialize)]
pub struct TeamPatch {
    ops: Vec<FieldOp>,
}

impl TeamPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_coins(mut self, delta: i64) -> Self {
        if delta != 0 {
            self.ops.push(FieldOp::IncrementCoins(delta));
        }
        self
    }

    pub fn increment_mission(mut self, mission_id: impl Into<String>, delta: u32) -> Self {
        if delta != 0 {
            self.ops.push(FieldOp::IncrementMission {
                mission_id: mission_id.into(),
                delta,
            });
        }
        self
    }

    pub fn replace_board(mut self, board: Board) -> Self {
        self.ops.push(FieldOp::ReplaceBoard(board));
        self
    }

    pub fn replace_collection(mut self, collection: Collection) -> Self {
        self.ops.push(FieldOp::ReplaceCollection(collection));
        self
    }

    pub fn ops(&self) -> &[FieldOp] {
        &self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn paths(&self) -> Vec<String> {
        self.ops.iter().map(FieldOp::path).collect()
    }

    /// Rejects replacements carrying values that are not tile tiers.
    pub fn validate(&self) -> Result<(), BoardError> {
        for op in &self.ops {
            let invalid = match op {
                FieldOp::ReplaceBoard(board) => board.invalid_value(),
                FieldOp::ReplaceCollection(collection) => collection.invalid_value(),
                FieldOp::IncrementCoins(_) | FieldOp::IncrementMission { .. } => None,
            };
            if let Some(value) = invalid {
                return Err(BoardError::InvalidValue { value });
            }
        }
        Ok(())
    }

    pub fn coin_delta(&self) -> i64 {
        self.ops
            .iter()
            .map(|op| match op {
                FieldOp::IncrementCoins(delta) => *delta,
                _ => 0,
            })
            .sum()
    }
}

/// Applies every op in order. Returns whether the document changed.
pub fn apply_patch(document: &mut TeamDocument, patch: &TeamPatch) -> bool {
    let mut changed = false;
    for op in patch.ops() {
        match op {
            FieldOp::IncrementCoins(delta) => {
                if *delta != 0 {
                    document.coins = document.coins.saturating_add(*delta);
                    changed = true;
                }
            }
            FieldOp::IncrementMission { mission_id, delta } => {
                if *delta != 0 {
                    let count = document.missions.entry(mission_id.clone()).or_insert(0);
                    *count = count.saturating_add(*delta);
                    changed = true;
                }
            }
            FieldOp::ReplaceBoard(board) => {
                if document.board != *board {
                    document.board = *board;
                    changed = true;
                }
            }
            FieldOp::ReplaceCollection(collection) => {
                if document.collection != *collection {
                    document.collection = collection.clone();
                    changed = true;
                }
            }
        }
    }
    changed
}
