pub mod memory_store;
pub mod pending;
pub mod runtime;
pub mod session;
pub mod store;
pub mod sync;
#[cfg(not(target_arch = "wasm32"))]
pub mod ws_store;

pub use memory_store::MemoryTeamStore;
pub use pending::{ActionKind, ActionPhase, PendingAction, PendingLedger};
pub use runtime::{spawn_local, ConnectionState, GameEvent, SyncHooks, SyncView};
pub use session::{SessionSnapshot, TeamSession};
pub use store::{CloseHandler, SnapshotHandler, StoreError, StoreSubscription, TeamStore, WriteAck};
pub use sync::{ActionError, MissionReport, MoveReport, SpawnReport, SyncController};
#[cfg(not(target_arch = "wasm32"))]
pub use ws_store::{NetDelay, WsTeamStore};
