use std::cell::RefCell;
use std::rc::{Rc, Weak};

use rand::rngs::StdRng;
use rand::SeedableRng;
use tinsel_core::{
    availability, completion_patch, mission_by_id, ActionOutcome, BoardError, GameRules,
    MissionAvailability, MissionDef, MissionError, TeamDocument, TeamId, TeamPatch,
    MISSION_CATALOG,
};
use time::Time;
use tracing::{debug, info, warn};

use crate::pending::{ActionKind, PendingAction, PendingLedger};
use crate::runtime::{spawn_local, ConnectionState, GameEvent, SyncHooks, SyncView};
use crate::session::{SessionSnapshot, TeamSession};
use crate::store::{CloseHandler, SnapshotHandler, StoreError, StoreSubscription, TeamStore};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ActionError {
    #[error("balance {balance} is below the spawn cost {cost}")]
    InsufficientFunds { balance: i64, cost: i64 },
    #[error("no empty cell to spawn into")]
    BoardFull,
    #[error("tiles of value {value} are already at the top tier")]
    MaxTierMerge { value: u32 },
    #[error(transparent)]
    Board(#[from] BoardError),
    #[error(transparent)]
    Mission(#[from] MissionError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpawnReport {
    pub index: usize,
    pub value: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveReport {
    Moved { from: usize, to: usize },
    Swapped { from: usize, to: usize },
    Merged {
        from: usize,
        to: usize,
        value: u32,
        reward: i64,
        unlocked: bool,
    },
    /// Empty source or same cell; nothing happened.
    Ignored,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissionReport {
    pub mission_id: String,
    pub points: u32,
    pub count: u32,
}

struct SyncState {
    session: TeamSession,
    pending: PendingLedger,
    connection: ConnectionState,
}

struct Shared<S> {
    store: S,
    team: TeamId,
    key: String,
    rules: GameRules,
    state: RefCell<SyncState>,
    hooks: RefCell<SyncHooks>,
    rng: RefCell<StdRng>,
    subscription: RefCell<Option<StoreSubscription>>,
    close_watch: RefCell<Option<StoreSubscription>>,
}

/// Owns one team session and keeps it in step with the shared team store.
///
/// Actions apply locally first and then issue one fire-and-forget write each.
/// Every snapshot from the store overwrites the local mirror, so concurrent
/// board edits resolve last-writer-wins.
pub struct SyncController<S: TeamStore + 'static> {
    shared: Rc<Shared<S>>,
}

impl<S: TeamStore + 'static> Clone for SyncController<S> {
    fn clone(&self) -> Self {
        Self {
            shared: Rc::clone(&self.shared),
        }
    }
}

impl<S: TeamStore + 'static> SyncController<S> {
    pub fn new(store: S, team: TeamId, rules: GameRules) -> Self {
        Self {
            shared: Rc::new(Shared {
                store,
                team,
                key: team.key(),
                rules,
                state: RefCell::new(SyncState {
                    session: TeamSession::new(team, rules.starting_coins),
                    pending: PendingLedger::new(),
                    connection: ConnectionState::Disconnected,
                }),
                hooks: RefCell::new(SyncHooks::empty()),
                rng: RefCell::new(StdRng::from_rng(&mut rand::rng())),
                subscription: RefCell::new(None),
                close_watch: RefCell::new(None),
            }),
        }
    }

    /// Replaces the spawn placement source, for reproducible runs.
    pub fn with_rng(self, rng: StdRng) -> Self {
        *self.shared.rng.borrow_mut() = rng;
        self
    }

    pub fn set_hooks(&self, hooks: SyncHooks) {
        *self.shared.hooks.borrow_mut() = hooks;
    }

    pub fn team(&self) -> TeamId {
        self.shared.team
    }

    pub fn team_key(&self) -> &str {
        &self.shared.key
    }

    pub fn rules(&self) -> GameRules {
        self.shared.rules
    }

    pub fn store(&self) -> &S {
        &self.shared.store
    }

    /// Fetches the team document, creates it when absent and subscribes.
    ///
    /// The fetched document replaces local state before this returns, so
    /// actions issued right after see the team's real balance and board.
    /// On failure the controller stays usable on local state in degraded mode;
    /// calling `connect` again retries.
    pub async fn connect(&self) -> Result<bool, StoreError> {
        self.shared.subscription.borrow_mut().take();
        self.shared.close_watch.borrow_mut().take();
        self.set_connection(ConnectionState::Connecting);
        match self.open_subscription().await {
            Ok(created) => {
                self.set_connection(ConnectionState::Live);
                info!(team = %self.shared.key, created, "team store connected");
                self.emit(GameEvent::Connected {
                    team_key: self.shared.key.clone(),
                    created,
                });
                Ok(created)
            }
            Err(err) => {
                self.set_connection(ConnectionState::Degraded);
                warn!(team = %self.shared.key, error = %err, "team store unavailable, playing on local state");
                self.emit(GameEvent::RemoteUnavailable {
                    reason: err.to_string(),
                });
                Err(err)
            }
        }
    }

    async fn open_subscription(&self) -> Result<bool, StoreError> {
        let key = self.shared.key.as_str();
        let (document, created) = match self.shared.store.get(key).await? {
            Some(document) => (Some(document), false),
            None => {
                let created = self
                    .shared
                    .store
                    .create(key, TeamDocument::new(self.shared.rules.starting_coins))
                    .await?;
                (self.shared.store.get(key).await?, created)
            }
        };
        if let Some(document) = document {
            self.adopt(&document);
        }
        let weak: Weak<Shared<S>> = Rc::downgrade(&self.shared);
        let handler: SnapshotHandler = Rc::new(move |document: Option<TeamDocument>| {
            if let Some(shared) = weak.upgrade() {
                SyncController { shared }.apply_remote_snapshot(document);
            }
        });
        let subscription = self.shared.store.subscribe(key, handler).await?;
        *self.shared.subscription.borrow_mut() = Some(subscription);

        let weak: Weak<Shared<S>> = Rc::downgrade(&self.shared);
        let on_closed: CloseHandler = Rc::new(move || {
            if let Some(shared) = weak.upgrade() {
                SyncController { shared }.connection_lost();
            }
        });
        let close_watch = self.shared.store.watch_closed(on_closed);
        *self.shared.close_watch.borrow_mut() = close_watch;
        Ok(created)
    }

    fn connection_lost(&self) {
        if self.connection() == ConnectionState::Disconnected {
            return;
        }
        self.shared.subscription.borrow_mut().take();
        self.set_connection(ConnectionState::Degraded);
        warn!(team = %self.shared.key, "team store connection lost, playing on local state");
        self.emit(GameEvent::RemoteUnavailable {
            reason: StoreError::Closed.to_string(),
        });
    }

    pub fn disconnect(&self) {
        self.shared.subscription.borrow_mut().take();
        self.shared.close_watch.borrow_mut().take();
        self.set_connection(ConnectionState::Disconnected);
        info!(team = %self.shared.key, "team store disconnected");
    }

    /// Buys a base tile and drops it on a random empty cell.
    pub fn spawn_tile(&self) -> Result<SpawnReport, ActionError> {
        let rules = self.shared.rules;
        let (balance, board) = {
            let state = self.shared.state.borrow();
            (state.session.coins(), *state.session.board())
        };
        if !rules.can_afford_spawn(balance) {
            self.emit(GameEvent::InsufficientFunds {
                balance,
                cost: rules.spawn_cost,
            });
            return Err(ActionError::InsufficientFunds {
                balance,
                cost: rules.spawn_cost,
            });
        }
        let spawned = {
            let mut rng = self.shared.rng.borrow_mut();
            board.spawn(rules.spawn_value, &mut *rng)
        };
        let spawned = match spawned {
            Ok(spawned) => spawned,
            Err(BoardError::Full) => {
                self.emit(GameEvent::SpaceFullOnSpawn);
                return Err(ActionError::BoardFull);
            }
            Err(err) => return Err(err.into()),
        };
        let patch = TeamPatch::new()
            .increment_coins(-rules.spawn_cost)
            .replace_board(spawned.board);
        self.apply_local(&patch);
        self.emit(GameEvent::TileSpawned {
            index: spawned.index,
            value: rules.spawn_value,
        });
        self.publish();
        self.dispatch(ActionKind::Spawn, patch);
        Ok(SpawnReport {
            index: spawned.index,
            value: rules.spawn_value,
        })
    }

    /// Drags the tile at `from` onto `to`: move, merge or swap.
    pub fn move_tile(&self, from: usize, to: usize) -> Result<MoveReport, ActionError> {
        let (board, collection) = {
            let state = self.shared.state.borrow();
            (*state.session.board(), state.session.collection().clone())
        };
        match board.resolve_action(from, to)? {
            ActionOutcome::Ghost => {
                debug!(from, to, "ignoring move from an empty cell");
                Ok(MoveReport::Ignored)
            }
            ActionOutcome::RejectedAtMax { value } => {
                self.emit(GameEvent::MergeRejectedAtMax { from, to, value });
                Err(ActionError::MaxTierMerge { value })
            }
            ActionOutcome::Moved { board } => {
                let patch = TeamPatch::new().replace_board(board);
                self.apply_local(&patch);
                self.emit(GameEvent::TileMoved { from, to });
                self.publish();
                self.dispatch(ActionKind::Move, patch);
                Ok(MoveReport::Moved { from, to })
            }
            ActionOutcome::Swapped { board } => {
                let patch = TeamPatch::new().replace_board(board);
                self.apply_local(&patch);
                self.emit(GameEvent::TilesSwapped { from, to });
                self.publish();
                self.dispatch(ActionKind::Swap, patch);
                Ok(MoveReport::Swapped { from, to })
            }
            ActionOutcome::Merged { board, value } => {
                let reward = self.shared.rules.reward_for(value);
                let (collection, unlocked) = collection.register(value);
                let mut patch = TeamPatch::new().increment_coins(reward).replace_board(board);
                if unlocked {
                    patch = patch.replace_collection(collection);
                }
                self.apply_local(&patch);
                self.emit(GameEvent::TilesMerged {
                    from,
                    to,
                    value,
                    reward,
                });
                if unlocked {
                    self.emit(GameEvent::CollectionUnlocked { value });
                }
                self.publish();
                self.dispatch(ActionKind::Merge, patch);
                Ok(MoveReport::Merged {
                    from,
                    to,
                    value,
                    reward,
                    unlocked,
                })
            }
        }
    }

    /// Completes one mission for the team as seen at local time `now`.
    pub fn complete_mission(
        &self,
        def: &MissionDef,
        now: Time,
    ) -> Result<MissionReport, ActionError> {
        let count = self.shared.state.borrow().session.mission_count(def.id);
        let patch = completion_patch(def, count, now)?;
        self.apply_local(&patch);
        let count = self.shared.state.borrow().session.mission_count(def.id);
        self.emit(GameEvent::MissionCompleted {
            mission_id: def.id.to_string(),
            points: def.points,
            count,
        });
        self.publish();
        self.dispatch(ActionKind::Mission, patch);
        Ok(MissionReport {
            mission_id: def.id.to_string(),
            points: def.points,
            count,
        })
    }

    pub fn complete_mission_by_id(
        &self,
        mission_id: &str,
        now: Time,
    ) -> Result<MissionReport, ActionError> {
        let def = mission_by_id(mission_id)
            .ok_or_else(|| MissionError::Unknown(mission_id.to_string()))?;
        self.complete_mission(def, now)
    }

    /// Every catalog mission with its state for the local completion counts.
    pub fn mission_availability(
        &self,
        now: Time,
    ) -> Vec<(&'static MissionDef, MissionAvailability)> {
        let state = self.shared.state.borrow();
        MISSION_CATALOG
            .iter()
            .flat_map(|category| category.missions.iter())
            .map(|def| (def, availability(def, state.session.mission_count(def.id), now)))
            .collect()
    }

    /// Replaces the local mirror with the remote document.
    ///
    /// `None` means the document is gone; it is recreated with defaults.
    pub fn apply_remote_snapshot(&self, document: Option<TeamDocument>) {
        let Some(document) = document else {
            self.recreate_document();
            return;
        };
        self.adopt(&document);
        self.shared.state.borrow_mut().connection = ConnectionState::Live;
        self.emit(GameEvent::SnapshotApplied {
            revision: document.revision,
        });
        self.publish();
    }

    fn adopt(&self, document: &TeamDocument) {
        let settled = {
            let mut state = self.shared.state.borrow_mut();
            state.session.overwrite(document);
            state.pending.observe_snapshot(document.revision)
        };
        for (id, phase) in settled {
            debug!(action = id, ?phase, revision = document.revision, "pending action settled");
        }
    }

    fn recreate_document(&self) {
        info!(team = %self.shared.key, "team document missing, creating defaults");
        let shared = Rc::clone(&self.shared);
        spawn_local(async move {
            let document = TeamDocument::new(shared.rules.starting_coins);
            if let Err(err) = shared.store.create(&shared.key, document).await {
                warn!(team = %shared.key, error = %err, "create-if-absent failed");
            }
        });
    }

    fn dispatch(&self, kind: ActionKind, patch: TeamPatch) {
        let id = self.shared.state.borrow_mut().pending.begin(kind);
        let shared = Rc::clone(&self.shared);
        spawn_local(async move {
            shared.state.borrow_mut().pending.mark_in_flight(id);
            let result = shared.store.apply_update(&shared.key, patch).await;
            let mut state = shared.state.borrow_mut();
            match result {
                Ok(ack) => {
                    if let Some(phase) = state.pending.acknowledge(id, ack.revision) {
                        debug!(action = id, ?phase, revision = ack.revision, "pending action settled");
                    }
                }
                Err(err) => {
                    state.pending.fail(id);
                    warn!(team = %shared.key, action = id, ?kind, error = %err, "team write failed, keeping local state");
                }
            }
        });
    }

    fn apply_local(&self, patch: &TeamPatch) {
        self.shared.state.borrow_mut().session.apply_local(patch);
    }

    fn set_connection(&self, connection: ConnectionState) {
        self.shared.state.borrow_mut().connection = connection;
    }

    fn emit(&self, event: GameEvent) {
        let on_event = Rc::clone(&self.shared.hooks.borrow().on_event);
        on_event(event);
    }

    fn publish(&self) {
        let snapshot = self.snapshot();
        let on_snapshot = Rc::clone(&self.shared.hooks.borrow().on_snapshot);
        on_snapshot(&snapshot);
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.shared.state.borrow().session.snapshot()
    }

    pub fn connection(&self) -> ConnectionState {
        self.shared.state.borrow().connection
    }

    pub fn pending_actions(&self) -> Vec<PendingAction> {
        self.shared.state.borrow().pending.actions().cloned().collect()
    }

    pub fn is_idle(&self) -> bool {
        self.shared.state.borrow().pending.is_idle()
    }

    pub fn sync_view(&self) -> SyncView {
        let state = self.shared.state.borrow();
        SyncView {
            connection: state.connection,
            team_key: self.shared.key.clone(),
            revision: state.session.revision(),
            in_flight: state.pending.in_flight(),
            reconciled: state.pending.reconciled(),
            superseded: state.pending.superseded(),
            failed_writes: state.pending.failed(),
        }
    }
}
