use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::{Rc, Weak};

use tinsel_core::{apply_patch, TeamDocument, TeamPatch};
use tokio::sync::oneshot;

use crate::store::{CloseHandler, SnapshotHandler, StoreError, StoreSubscription, TeamStore, WriteAck};

struct Subscriber {
    id: u64,
    team: String,
    handler: SnapshotHandler,
}

struct HeldWrite {
    team: String,
    patch: TeamPatch,
    reply: oneshot::Sender<Result<WriteAck, StoreError>>,
}

#[derive(Default)]
struct MemoryState {
    documents: HashMap<String, TeamDocument>,
    subscribers: Vec<Subscriber>,
    close_watchers: Vec<(u64, CloseHandler)>,
    next_subscriber_id: u64,
    offline: bool,
    fail_writes: u32,
    hold_writes: bool,
    held: VecDeque<HeldWrite>,
    write_count: u64,
}

impl MemoryState {
    fn handlers_for(&self, team: &str) -> Vec<SnapshotHandler> {
        self.subscribers
            .iter()
            .filter(|subscriber| subscriber.team == team)
            .map(|subscriber| Rc::clone(&subscriber.handler))
            .collect()
    }
}

/// In-process team store. Clones share the same documents and subscribers.
///
/// Writes can be failed, held and released in any order to reproduce
/// network races deterministically.
#[derive(Clone, Default)]
pub struct MemoryTeamStore {
    inner: Rc<RefCell<MemoryState>>,
}

impl MemoryTeamStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_offline(&self, offline: bool) {
        self.inner.borrow_mut().offline = offline;
    }

    /// Goes offline and tells every close watcher the connection is gone.
    pub fn drop_connections(&self) {
        let watchers = {
            let mut state = self.inner.borrow_mut();
            state.offline = true;
            std::mem::take(&mut state.close_watchers)
        };
        for (_, on_closed) in watchers {
            on_closed();
        }
    }

    pub fn fail_next_writes(&self, count: u32) {
        self.inner.borrow_mut().fail_writes = count;
    }

    /// While set, writes queue up instead of landing.
    pub fn hold_writes(&self, hold: bool) {
        self.inner.borrow_mut().hold_writes = hold;
    }

    pub fn held_writes(&self) -> usize {
        self.inner.borrow().held.len()
    }

    /// Lands the oldest held write.
    pub fn release_next_write(&self) -> bool {
        self.release_write_at(0)
    }

    /// Lands the held write at `position` in arrival order.
    pub fn release_write_at(&self, position: usize) -> bool {
        let held = self.inner.borrow_mut().held.remove(position);
        let Some(held) = held else {
            return false;
        };
        let result = self.commit(&held.team, &held.patch);
        let _ = held.reply.send(result);
        true
    }

    pub fn release_all_writes(&self) -> usize {
        let mut released = 0;
        while self.release_next_write() {
            released += 1;
        }
        released
    }

    pub fn write_count(&self) -> u64 {
        self.inner.borrow().write_count
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.borrow().subscribers.len()
    }

    pub fn document(&self, team_key: &str) -> Option<TeamDocument> {
        self.inner.borrow().documents.get(team_key).cloned()
    }

    /// Seeds or overwrites a document and pushes it to subscribers.
    pub fn put_document(&self, team_key: &str, mut document: TeamDocument) {
        let handlers = {
            let mut state = self.inner.borrow_mut();
            let revision = state
                .documents
                .get(team_key)
                .map(|current| current.revision)
                .unwrap_or(0);
            document.revision = revision + 1;
            state.documents.insert(team_key.to_string(), document.clone());
            state.handlers_for(team_key)
        };
        for handler in handlers {
            handler(Some(document.clone()));
        }
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.inner.borrow().offline {
            return Err(StoreError::Unavailable("memory store offline".to_string()));
        }
        Ok(())
    }

    fn commit(&self, team_key: &str, patch: &TeamPatch) -> Result<WriteAck, StoreError> {
        let (document, handlers) = {
            let mut state = self.inner.borrow_mut();
            let Some(document) = state.documents.get_mut(team_key) else {
                return Err(StoreError::NotFound(team_key.to_string()));
            };
            apply_patch(document, patch);
            document.revision += 1;
            let document = document.clone();
            state.write_count += 1;
            (document, state.handlers_for(team_key))
        };
        for handler in handlers {
            handler(Some(document.clone()));
        }
        Ok(WriteAck {
            revision: document.revision,
        })
    }
}

impl TeamStore for MemoryTeamStore {
    async fn get(&self, team_key: &str) -> Result<Option<TeamDocument>, StoreError> {
        self.check_online()?;
        Ok(self.document(team_key))
    }

    async fn create(&self, team_key: &str, mut document: TeamDocument) -> Result<bool, StoreError> {
        self.check_online()?;
        let handlers = {
            let mut state = self.inner.borrow_mut();
            if state.documents.contains_key(team_key) {
                return Ok(false);
            }
            document.revision = 1;
            state.documents.insert(team_key.to_string(), document.clone());
            state.handlers_for(team_key)
        };
        for handler in handlers {
            handler(Some(document.clone()));
        }
        Ok(true)
    }

    async fn apply_update(&self, team_key: &str, patch: TeamPatch) -> Result<WriteAck, StoreError> {
        let pending = {
            let mut state = self.inner.borrow_mut();
            if state.offline {
                return Err(StoreError::Unavailable("memory store offline".to_string()));
            }
            if state.fail_writes > 0 {
                state.fail_writes -= 1;
                return Err(StoreError::Unavailable("injected write failure".to_string()));
            }
            if state.hold_writes {
                let (reply, receiver) = oneshot::channel();
                state.held.push_back(HeldWrite {
                    team: team_key.to_string(),
                    patch,
                    reply,
                });
                Err(receiver)
            } else {
                Ok(patch)
            }
        };
        match pending {
            Ok(patch) => self.commit(team_key, &patch),
            Err(receiver) => receiver.await.unwrap_or(Err(StoreError::Closed)),
        }
    }

    async fn subscribe(
        &self,
        team_key: &str,
        on_snapshot: SnapshotHandler,
    ) -> Result<StoreSubscription, StoreError> {
        self.check_online()?;
        let (id, current) = {
            let mut state = self.inner.borrow_mut();
            let id = state.next_subscriber_id;
            state.next_subscriber_id += 1;
            state.subscribers.push(Subscriber {
                id,
                team: team_key.to_string(),
                handler: Rc::clone(&on_snapshot),
            });
            (id, state.documents.get(team_key).cloned())
        };
        on_snapshot(current);
        let weak: Weak<RefCell<MemoryState>> = Rc::downgrade(&self.inner);
        Ok(StoreSubscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner
                    .borrow_mut()
                    .subscribers
                    .retain(|subscriber| subscriber.id != id);
            }
        }))
    }

    fn watch_closed(&self, on_closed: CloseHandler) -> Option<StoreSubscription> {
        let id = {
            let mut state = self.inner.borrow_mut();
            let id = state.next_subscriber_id;
            state.next_subscriber_id += 1;
            state.close_watchers.push((id, on_closed));
            id
        };
        let weak: Weak<RefCell<MemoryState>> = Rc::downgrade(&self.inner);
        Some(StoreSubscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner
                    .borrow_mut()
                    .close_watchers
                    .retain(|(watcher, _)| *watcher != id);
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    fn block_on<F: std::future::Future>(future: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .expect("runtime")
            .block_on(future)
    }

    #[test]
    fn subscribers_see_every_write_until_dropped() {
        block_on(async {
            let store = MemoryTeamStore::new();
            assert_eq!(store.create("team_01", TeamDocument::new(0)).await, Ok(true));
            assert_eq!(store.create("team_01", TeamDocument::new(99)).await, Ok(false));

            let seen = Rc::new(Cell::new(0));
            let counter = Rc::clone(&seen);
            let subscription = store
                .subscribe(
                    "team_01",
                    Rc::new(move |_: Option<TeamDocument>| counter.set(counter.get() + 1)),
                )
                .await
                .expect("subscribe");
            assert_eq!(seen.get(), 1);

            let ack = store
                .apply_update("team_01", TeamPatch::new().increment_coins(10))
                .await
                .expect("write");
            assert_eq!(ack.revision, 2);
            assert_eq!(seen.get(), 2);

            drop(subscription);
            assert_eq!(store.subscriber_count(), 0);
            store
                .apply_update("team_01", TeamPatch::new().increment_coins(10))
                .await
                .expect("write");
            assert_eq!(seen.get(), 2);
            assert_eq!(store.document("team_01").map(|doc| doc.coins), Some(20));
        });
    }

    #[test]
    fn update_on_missing_document_is_not_found() {
        block_on(async {
            let store = MemoryTeamStore::new();
            let result = store
                .apply_update("team_09", TeamPatch::new().increment_coins(1))
                .await;
            assert_eq!(result, Err(StoreError::NotFound("team_09".to_string())));
        });
    }

    #[test]
    fn injected_failures_and_offline_mode() {
        block_on(async {
            let store = MemoryTeamStore::new();
            store.create("team_02", TeamDocument::new(0)).await.expect("create");
            store.fail_next_writes(1);
            assert!(matches!(
                store
                    .apply_update("team_02", TeamPatch::new().increment_coins(1))
                    .await,
                Err(StoreError::Unavailable(_))
            ));
            assert!(store
                .apply_update("team_02", TeamPatch::new().increment_coins(1))
                .await
                .is_ok());
            store.set_offline(true);
            assert!(matches!(
                store.get("team_02").await,
                Err(StoreError::Unavailable(_))
            ));
        });
    }
}
