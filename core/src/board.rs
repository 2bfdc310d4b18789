use std::fmt;

use rand::Rng;
use rkyv::Archive;

use crate::tile::{is_tile_value, next_tier};

pub const BOARD_SIDE: usize = 4;
pub const BOARD_CELLS: usize = BOARD_SIDE * BOARD_SIDE;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BoardError {
    #[error("board has no empty cell")]
    Full,
    #[error("cell index {index} is outside the board")]
    IndexOutOfRange { index: usize },
    #[error("{value} is not a tile value")]
    InvalidValue { value: u32 },
    #[error("board must have 16 cells, got {found}")]
    WrongLength { found: usize },
}

/// Row-major 4x4 grid of tile values.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(from = "Vec<Option<u32>>", into = "Vec<Option<u32>>")]
pub struct Board {
    cells: [Option<u32>; BOARD_CELLS],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Spawned {
    pub board: Board,
    pub index: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
    Moved { board: Board },
    Merged { board: Board, value: u32 },
    Swapped { board: Board },
    RejectedAtMax { value: u32 },
    Ghost,
}

impl ActionOutcome {
    pub fn board(&self) -> Option<&Board> {
        match self {
            ActionOutcome::Moved { board }
            | ActionOutcome::Merged { board, .. }
            | ActionOutcome::Swapped { board } => Some(board),
            ActionOutcome::RejectedAtMax { .. } | ActionOutcome::Ghost => None,
        }
    }
}

impl Board {
    pub const fn empty() -> Self {
        Self {
            cells: [None; BOARD_CELLS],
        }
    }

    pub fn from_cells(cells: &[Option<u32>]) -> Result<Self, BoardError> {
        if cells.len() != BOARD_CELLS {
            return Err(BoardError::WrongLength { found: cells.len() });
        }
        let mut board = Self::empty();
        for (slot, cell) in board.cells.iter_mut().zip(cells) {
            if let Some(value) = cell {
                if !is_tile_value(*value) {
                    return Err(BoardError::InvalidValue { value: *value });
                }
            }
            *slot = *cell;
        }
        Ok(board)
    }

    /// Builds a board from untrusted cells, dropping anything that is not a tile.
    pub fn sanitized(cells: &[Option<u32>]) -> Self {
        if cells.len() != BOARD_CELLS {
            tracing::warn!(found = cells.len(), "board length mismatch, padding/truncating");
        }
        let mut board = Self::empty();
        for (index, (slot, cell)) in board.cells.iter_mut().zip(cells).enumerate() {
            match cell {
                Some(value) if is_tile_value(*value) => *slot = Some(*value),
                Some(value) => {
                    tracing::warn!(index, value, "dropping non-tile cell");
                }
                None => {}
            }
        }
        board
    }

    /// First occupied cell value that is not a tile tier.
    ///
    /// Binary frames bypass the checked constructors, so decoded boards must
    /// go through this or [`Board::sanitize`] before use.
    pub fn invalid_value(&self) -> Option<u32> {
        self.cells
            .iter()
            .flatten()
            .copied()
            .find(|value| !is_tile_value(*value))
    }

    pub fn is_valid(&self) -> bool {
        self.invalid_value().is_none()
    }

    pub fn sanitize(self) -> Self {
        if self.is_valid() {
            self
        } else {
            Self::sanitized(&self.cells)
        }
    }

    pub fn cells(&self) -> &[Option<u32>; BOARD_CELLS] {
        &self.cells
    }

    pub fn get(&self, index: usize) -> Option<u32> {
        self.cells.get(index).copied().flatten()
    }

    pub fn row_col(index: usize) -> (usize, usize) {
        (index / BOARD_SIDE, index % BOARD_SIDE)
    }

    pub fn occupied_count(&self) -> usize {
        self.cells.iter().filter(|cell| cell.is_some()).count()
    }

    pub fn empty_indices(&self) -> Vec<usize> {
        self.cells
            .iter()
            .enumerate()
            .filter_map(|(index, cell)| cell.is_none().then_some(index))
            .collect()
    }

    pub fn is_full(&self) -> bool {
        self.cells.iter().all(Option::is_some)
    }

    pub fn highest_tile(&self) -> Option<u32> {
        self.cells.iter().flatten().copied().max()
    }

    /// Places `value` on a uniformly chosen empty cell.
    pub fn spawn<R: Rng + ?Sized>(&self, value: u32, rng: &mut R) -> Result<Spawned, BoardError> {
        if !is_tile_value(value) {
            return Err(BoardError::InvalidValue { value });
        }
        let empties = self.empty_indices();
        if empties.is_empty() {
            return Err(BoardError::Full);
        }
        let index = empties[rng.random_range(0..empties.len())];
        let mut board = *self;
        board.cells[index] = Some(value);
        Ok(Spawned { board, index })
    }

    /// Resolves a drag from `from` onto `to` into a move, merge, swap or rejection.
    pub fn resolve_action(&self, from: usize, to: usize) -> Result<ActionOutcome, BoardError> {
        self.check_index(from)?;
        self.check_index(to)?;
        if from == to {
            return Ok(ActionOutcome::Ghost);
        }
        let Some(source) = self.cells[from] else {
            return Ok(ActionOutcome::Ghost);
        };
        let mut board = *self;
        match self.cells[to] {
            None => {
                board.cells[to] = Some(source);
                board.cells[from] = None;
                Ok(ActionOutcome::Moved { board })
            }
            Some(target) if target == source => match next_tier(source) {
                Some(value) => {
                    board.cells[to] = Some(value);
                    board.cells[from] = None;
                    Ok(ActionOutcome::Merged { board, value })
                }
                None => Ok(ActionOutcome::RejectedAtMax { value: source }),
            },
            Some(target) => {
                board.cells[to] = Some(source);
                board.cells[from] = Some(target);
                Ok(ActionOutcome::Swapped { board })
            }
        }
    }

    fn check_index(&self, index: usize) -> Result<(), BoardError> {
        if index >= BOARD_CELLS {
            return Err(BoardError::IndexOutOfRange { index });
        }
        Ok(())
    }
}

impl Default for Board {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<Vec<Option<u32>>> for Board {
    fn from(cells: Vec<Option<u32>>) -> Self {
        Self::sanitized(&cells)
    }
}

impl From<Board> for Vec<Option<u32>> {
    fn from(board: Board) -> Self {
        board.cells.to_vec()
    }
}

impl fmt::Display for Board {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for row in self.cells.chunks(BOARD_SIDE) {
            let line: Vec<String> = row
                .iter()
                .map(|cell| match cell {
                    Some(value) => format!("{value:>4}"),
                    None => format!("{:>4}", "."),
                })
                .collect();
            writeln!(f, "{}", line.join(" "))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn board_with(cells: &[(usize, u32)]) -> Board {
        let mut raw = vec![None; BOARD_CELLS];
        for (index, value) in cells {
            raw[*index] = Some(*value);
        }
        Board::from_cells(&raw).expect("valid board")
    }

    #[test]
    fn merge_of_two_fifties() {
        let board = board_with(&[(0, 50), (1, 50)]);
        let outcome = board.resolve_action(1, 0).expect("in range");
        let expected = board_with(&[(0, 100)]);
        assert_eq!(
            outcome,
            ActionOutcome::Merged {
                board: expected,
                value: 100
            }
        );
    }

    #[test]
    fn max_tier_merge_is_rejected() {
        let board = board_with(&[(3, 800), (7, 800)]);
        let outcome = board.resolve_action(3, 7).expect("in range");
        assert_eq!(outcome, ActionOutcome::RejectedAtMax { value: 800 });
    }

    #[test]
    fn empty_source_is_ghost() {
        let board = board_with(&[(5, 100)]);
        assert_eq!(board.resolve_action(4, 5), Ok(ActionOutcome::Ghost));
        assert_eq!(board.resolve_action(5, 5), Ok(ActionOutcome::Ghost));
    }

    #[test]
    fn out_of_range_index_is_an_error() {
        let board = Board::empty();
        assert_eq!(
            board.resolve_action(0, 16),
            Err(BoardError::IndexOutOfRange { index: 16 })
        );
    }

    #[test]
    fn spawn_on_single_empty_cell_is_deterministic() {
        let mut raw = vec![Some(50); BOARD_CELLS];
        raw[15] = None;
        let board = Board::from_cells(&raw).expect("valid board");
        let mut rng = StdRng::seed_from_u64(7);
        let spawned = board.spawn(50, &mut rng).expect("one free cell");
        assert_eq!(spawned.index, 15);
        assert!(spawned.board.is_full());
        assert_eq!(spawned.board.spawn(50, &mut rng), Err(BoardError::Full));
    }

    #[test]
    fn from_cells_rejects_non_tiles() {
        let mut raw = vec![None; BOARD_CELLS];
        raw[2] = Some(60);
        assert_eq!(
            Board::from_cells(&raw),
            Err(BoardError::InvalidValue { value: 60 })
        );
        assert_eq!(
            Board::from_cells(&raw[..4]),
            Err(BoardError::WrongLength { found: 4 })
        );
    }

    #[test]
    fn sanitized_drops_bad_cells_and_pads() {
        let board = Board::sanitized(&[Some(50), Some(3), None, Some(800)]);
        assert_eq!(board.get(0), Some(50));
        assert_eq!(board.get(1), None);
        assert_eq!(board.get(3), Some(800));
        assert_eq!(board.occupied_count(), 2);
    }

    #[test]
    fn json_shape_is_a_flat_array() {
        let board = board_with(&[(0, 50), (15, 400)]);
        let json = serde_json::to_string(&board).expect("serialize");
        assert!(json.starts_with("[50,null"));
        assert!(json.ends_with("null,400]"));
        let back: Board = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, board);
    }
}
