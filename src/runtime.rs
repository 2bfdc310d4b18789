use std::future::Future;
use std::rc::Rc;

use time::{OffsetDateTime, Time};

use crate::session::SessionSnapshot;

/// Hooks the presentation layer installs to observe the controller.
#[derive(Clone)]
pub struct SyncHooks {
    pub on_snapshot: Rc<dyn Fn(&SessionSnapshot)>,
    pub on_event: Rc<dyn Fn(GameEvent)>,
}

impl SyncHooks {
    pub fn empty() -> Self {
        Self {
            on_snapshot: Rc::new(|_: &SessionSnapshot| {}),
            on_event: Rc::new(|_: GameEvent| {}),
        }
    }
}

impl Default for SyncHooks {
    fn default() -> Self {
        Self::empty()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GameEvent {
    Connected { team_key: String, created: bool },
    RemoteUnavailable { reason: String },
    SnapshotApplied { revision: u64 },
    TileSpawned { index: usize, value: u32 },
    TileMoved { from: usize, to: usize },
    TilesSwapped { from: usize, to: usize },
    TilesMerged { from: usize, to: usize, value: u32, reward: i64 },
    MergeRejectedAtMax { from: usize, to: usize, value: u32 },
    CollectionUnlocked { value: u32 },
    MissionCompleted { mission_id: String, points: u32, count: u32 },
    InsufficientFunds { balance: i64, cost: i64 },
    SpaceFullOnSpawn,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Live,
    /// Remote store could not be reached; play continues on local state.
    Degraded,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncView {
    pub connection: ConnectionState,
    pub team_key: String,
    pub revision: Option<u64>,
    pub in_flight: usize,
    pub reconciled: u64,
    pub superseded: u64,
    pub failed_writes: u64,
}

/// Runs a fire-and-forget task on the current thread's executor.
///
/// Native callers must be inside a `tokio::task::LocalSet`.
pub fn spawn_local<F>(future: F)
where
    F: Future<Output = ()> + 'static,
{
    #[cfg(target_arch = "wasm32")]
    {
        wasm_bindgen_futures::spawn_local(future);
    }
    #[cfg(not(target_arch = "wasm32"))]
    {
        tokio::task::spawn_local(future);
    }
}

/// Wall-clock time used for mission unlocks. Falls back to UTC when the
/// local offset cannot be determined.
pub fn local_time_of_day() -> Time {
    OffsetDateTime::now_local()
        .unwrap_or_else(|_| OffsetDateTime::now_utc())
        .time()
}
