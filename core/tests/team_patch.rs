use tinsel_core::{apply_patch, Board, Collection, FieldOp, TeamDocument, TeamPatch, BOARD_CELLS};

fn board_with(cells: &[(usize, u32)]) -> Board {
    let mut raw = vec![None; BOARD_CELLS];
    for (index, value) in cells {
        raw[*index] = Some(*value);
    }
    Board::from_cells(&raw).expect("valid board")
}

#[test]
fn increments_accumulate_across_writers() {
    let mut doc = TeamDocument::new(0);
    let first = TeamPatch::new().increment_coins(10).increment_mission("m10_1", 1);
    let second = TeamPatch::new().increment_coins(30).increment_mission("m10_1", 1);
    assert!(apply_patch(&mut doc, &first));
    assert!(apply_patch(&mut doc, &second));
    assert_eq!(doc.coins, 40);
    assert_eq!(doc.mission_count("m10_1"), 2);
}

#[test]
fn board_replacement_is_last_writer_wins() {
    let mut doc = TeamDocument::new(100);
    let from_a = board_with(&[(0, 100)]);
    let from_b = board_with(&[(9, 50), (10, 50)]);
    apply_patch(&mut doc, &TeamPatch::new().replace_board(from_a));
    apply_patch(&mut doc, &TeamPatch::new().replace_board(from_b));
    assert_eq!(doc.board, from_b);
}

#[test]
fn stale_collection_write_can_shrink_the_document() {
    let mut doc = TeamDocument::new(0);
    let (newer, _) = Collection::new().register(100);
    let (newer, _) = newer.register(200);
    apply_patch(&mut doc, &TeamPatch::new().replace_collection(newer));
    let (stale, _) = Collection::new().register(100);
    apply_patch(&mut doc, &TeamPatch::new().replace_collection(stale.clone()));
    assert_eq!(doc.collection, stale);
}

#[test]
fn unchanged_fields_report_no_change() {
    let mut doc = TeamDocument::new(5);
    let patch = TeamPatch::new()
        .increment_coins(0)
        .replace_board(Board::empty())
        .replace_collection(Collection::new());
    assert!(!apply_patch(&mut doc, &patch));
    assert_eq!(patch.ops().len(), 2);
}

#[test]
fn spawn_patch_lists_changed_fields_in_order() {
    let board = board_with(&[(4, 50)]);
    let patch = TeamPatch::new().increment_coins(-50).replace_board(board);
    assert_eq!(patch.paths(), vec!["coins".to_string(), "board".to_string()]);
    assert_eq!(patch.ops()[0], FieldOp::IncrementCoins(-50));
    let mut doc = TeamDocument::new(40);
    apply_patch(&mut doc, &patch);
    assert_eq!(doc.coins, -10);
    assert_eq!(doc.board, board);
}
