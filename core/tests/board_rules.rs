use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tinsel_core::{ActionOutcome, Board, BoardError, BOARD_CELLS, MAX_TILE, TILE_TIERS};

fn random_board(rng: &mut StdRng, fill: f64) -> Board {
    let cells: Vec<Option<u32>> = (0..BOARD_CELLS)
        .map(|_| {
            if rng.random_bool(fill) {
                Some(TILE_TIERS[rng.random_range(0..TILE_TIERS.len())])
            } else {
                None
            }
        })
        .collect();
    Board::from_cells(&cells).expect("generated board is valid")
}

fn sorted_tiles(board: &Board) -> Vec<u32> {
    let mut tiles: Vec<u32> = board.cells().iter().flatten().copied().collect();
    tiles.sort_unstable();
    tiles
}

fn with_cells(board: &Board, changes: &[(usize, Option<u32>)]) -> Board {
    let mut cells = board.cells().to_vec();
    for (index, value) in changes {
        cells[*index] = *value;
    }
    Board::from_cells(&cells).expect("valid board")
}

#[test]
fn spawn_fills_exactly_one_empty_cell() {
    let mut rng = StdRng::seed_from_u64(0x7135e1);
    for _ in 0..500 {
        let board = random_board(&mut rng, 0.6);
        let before = board.occupied_count();
        match board.spawn(50, &mut rng) {
            Ok(spawned) => {
                assert_eq!(board.get(spawned.index), None);
                assert_eq!(spawned.board.get(spawned.index), Some(50));
                assert_eq!(spawned.board.occupied_count(), before + 1);
                let restored = with_cells(&spawned.board, &[(spawned.index, None)]);
                assert_eq!(restored, board);
            }
            Err(err) => {
                assert_eq!(err, BoardError::Full);
                assert!(board.is_full());
            }
        }
    }
}

#[test]
fn spawn_reaches_every_empty_cell() {
    let board = Board::empty();
    let mut rng = StdRng::seed_from_u64(11);
    let mut seen = [false; BOARD_CELLS];
    for _ in 0..2_000 {
        let spawned = board.spawn(50, &mut rng).expect("empty board");
        seen[spawned.index] = true;
    }
    assert!(seen.iter().all(|hit| *hit));
}

#[test]
fn actions_follow_merge_rules() {
    let mut rng = StdRng::seed_from_u64(0xb0a2d);
    for _ in 0..2_000 {
        let board = random_board(&mut rng, 0.7);
        let from = rng.random_range(0..BOARD_CELLS);
        let to = rng.random_range(0..BOARD_CELLS);
        let outcome = board.resolve_action(from, to).expect("indices in range");
        let source = board.get(from);
        let target = board.get(to);
        if from == to || source.is_none() {
            assert_eq!(outcome, ActionOutcome::Ghost);
            continue;
        }
        let source = source.expect("checked above");
        match target {
            None => {
                let expected = with_cells(&board, &[(to, Some(source)), (from, None)]);
                assert_eq!(outcome, ActionOutcome::Moved { board: expected });
                assert_eq!(sorted_tiles(&expected), sorted_tiles(&board));
            }
            Some(target) if target == source && source < MAX_TILE => {
                let expected = with_cells(&board, &[(to, Some(source * 2)), (from, None)]);
                assert_eq!(
                    outcome,
                    ActionOutcome::Merged {
                        board: expected,
                        value: source * 2
                    }
                );
                assert_eq!(expected.occupied_count() + 1, board.occupied_count());
            }
            Some(target) if target == source => {
                assert_eq!(outcome, ActionOutcome::RejectedAtMax { value: MAX_TILE });
            }
            Some(target) => {
                let expected = with_cells(&board, &[(to, Some(source)), (from, Some(target))]);
                assert_eq!(outcome, ActionOutcome::Swapped { board: expected });
                assert_eq!(sorted_tiles(&expected), sorted_tiles(&board));
            }
        }
    }
}

#[test]
fn merge_scenario_from_two_base_tiles() {
    let mut cells = vec![None; BOARD_CELLS];
    cells[0] = Some(50);
    cells[1] = Some(50);
    let board = Board::from_cells(&cells).expect("valid board");
    let ActionOutcome::Merged { board, value } = board.resolve_action(1, 0).expect("in range")
    else {
        panic!("expected a merge");
    };
    assert_eq!(value, 100);
    assert_eq!(board.get(0), Some(100));
    assert_eq!(board.occupied_count(), 1);
}

#[test]
fn resolve_is_deterministic() {
    let mut rng = StdRng::seed_from_u64(3);
    for _ in 0..200 {
        let board = random_board(&mut rng, 0.8);
        let from = rng.random_range(0..BOARD_CELLS);
        let to = rng.random_range(0..BOARD_CELLS);
        assert_eq!(board.resolve_action(from, to), board.resolve_action(from, to));
    }
}
