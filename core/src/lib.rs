pub mod board;
pub mod codec;
pub mod collection;
pub mod document;
pub mod mission;
pub mod patch;
pub mod protocol;
pub mod rules;
pub mod team;
pub mod tile;

pub use board::{ActionOutcome, Board, BoardError, Spawned, BOARD_CELLS, BOARD_SIDE};
pub use codec::{decode, encode, CodecError};
pub use collection::Collection;
pub use document::TeamDocument;
pub use mission::{
    availability, completion_patch, mission_by_id, MissionAvailability, MissionCategory,
    MissionDef, MissionError, UnlockTime, MISSION_CATALOG,
};
pub use patch::{apply_patch, FieldOp, TeamPatch};
pub use protocol::{ClientMsg, ServerMsg};
pub use rules::{GameRules, RulesError, SHOP_STARTING_COINS};
pub use team::{is_valid_team_key, TeamId, TeamIdError, Zone};
pub use tile::{is_tile_value, next_tier, BASE_TILE, MAX_TILE, TILE_TIERS};
