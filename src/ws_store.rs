use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::{Rc, Weak};
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tinsel_core::protocol::ERROR_NOT_FOUND;
use tinsel_core::{decode, encode, ClientMsg, ServerMsg, TeamDocument, TeamPatch};
use tokio::sync::{mpsc, oneshot};
use tokio::time::sleep;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use url::Url;

use crate::store::{CloseHandler, SnapshotHandler, StoreError, StoreSubscription, TeamStore, WriteAck};

/// Artificial latency added to every frame, for exercising races by hand.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NetDelay {
    pub inbound_ms: u64,
    pub outbound_ms: u64,
    pub jitter_ms: u64,
}

impl NetDelay {
    pub fn is_zero(&self) -> bool {
        self.inbound_ms == 0 && self.outbound_ms == 0 && self.jitter_ms == 0
    }
}

fn sample_delay_ms(rng: &RefCell<StdRng>, base_ms: u64, jitter_ms: u64) -> u64 {
    if jitter_ms == 0 {
        return base_ms;
    }
    base_ms.saturating_add(rng.borrow_mut().random_range(0..=jitter_ms))
}

struct WsSubscriber {
    id: u64,
    team: String,
    handler: SnapshotHandler,
}

struct WsInner {
    outgoing: mpsc::UnboundedSender<Vec<u8>>,
    pending: RefCell<HashMap<u64, oneshot::Sender<ServerMsg>>>,
    subscribers: RefCell<Vec<WsSubscriber>>,
    /// Last snapshot per subscribed team, replayed to later subscribers.
    latest: RefCell<HashMap<String, Option<TeamDocument>>>,
    close_watchers: RefCell<Vec<(u64, CloseHandler)>>,
    next_id: Cell<u64>,
    closed: Cell<bool>,
    delay: NetDelay,
    rng: RefCell<StdRng>,
}

impl WsInner {
    fn next_id(&self) -> u64 {
        let id = self.next_id.get() + 1;
        self.next_id.set(id);
        id
    }

    fn send(&self, msg: &ClientMsg) -> Result<(), StoreError> {
        if self.closed.get() {
            return Err(StoreError::Closed);
        }
        let bytes = encode(msg).map_err(|err| StoreError::Codec(err.to_string()))?;
        self.outgoing.send(bytes).map_err(|_| StoreError::Closed)
    }

    fn dispatch(&self, msg: ServerMsg) {
        match msg {
            ServerMsg::Snapshot { team, document } => {
                let document = document.map(TeamDocument::sanitize);
                self.latest.borrow_mut().insert(team.clone(), document.clone());
                let handlers: Vec<SnapshotHandler> = self
                    .subscribers
                    .borrow()
                    .iter()
                    .filter(|subscriber| subscriber.team == team)
                    .map(|subscriber| Rc::clone(&subscriber.handler))
                    .collect();
                for handler in handlers {
                    handler(document.clone());
                }
            }
            ServerMsg::Pong { nonce: Some(nonce) } => self.resolve(nonce, msg),
            ServerMsg::Pong { nonce: None } => debug!("unsolicited pong"),
            msg => match msg.request_id() {
                Some(request_id) => self.resolve(request_id, msg),
                None => {
                    if let ServerMsg::Error { code, message, .. } = &msg {
                        warn!(%code, %message, "team store error");
                    }
                }
            },
        }
    }

    fn resolve(&self, request_id: u64, msg: ServerMsg) {
        let sender = self.pending.borrow_mut().remove(&request_id);
        match sender {
            Some(sender) => {
                let _ = sender.send(msg);
            }
            None => debug!(request_id, "reply for unknown request dropped"),
        }
    }

    fn shut_down(&self) {
        if self.closed.replace(true) {
            return;
        }
        // Dropping the senders fails every waiting request with `Closed`.
        self.pending.borrow_mut().clear();
        let watchers = std::mem::take(&mut *self.close_watchers.borrow_mut());
        for (_, on_closed) in watchers {
            on_closed();
        }
    }
}

/// Team store reached over a websocket, speaking the binary frame protocol.
///
/// The reader and writer run as local tasks, so this must be used inside a
/// `tokio::task::LocalSet`.
#[derive(Clone)]
pub struct WsTeamStore {
    inner: Rc<WsInner>,
}

impl WsTeamStore {
    pub async fn connect(url: &str, delay: NetDelay) -> Result<Self, StoreError> {
        let url = Url::parse(url.trim())
            .map_err(|err| StoreError::Unavailable(format!("bad store url {url}: {err}")))?;
        let (ws, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|err| StoreError::Unavailable(err.to_string()))?;
        let (mut write, mut read) = ws.split();
        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let inner = Rc::new(WsInner {
            outgoing,
            pending: RefCell::new(HashMap::new()),
            subscribers: RefCell::new(Vec::new()),
            latest: RefCell::new(HashMap::new()),
            close_watchers: RefCell::new(Vec::new()),
            next_id: Cell::new(0),
            closed: Cell::new(false),
            delay,
            rng: RefCell::new(StdRng::from_rng(&mut rand::rng())),
        });
        info!(%url, "connected to team store");

        let writer = Rc::downgrade(&inner);
        tokio::task::spawn_local(async move {
            while let Some(bytes) = outgoing_rx.recv().await {
                let delay_ms = match writer.upgrade() {
                    Some(inner) => {
                        sample_delay_ms(&inner.rng, inner.delay.outbound_ms, inner.delay.jitter_ms)
                    }
                    None => 0,
                };
                if delay_ms > 0 {
                    sleep(Duration::from_millis(delay_ms)).await;
                }
                if let Err(err) = write.send(Message::Binary(bytes.into())).await {
                    warn!(error = %err, "team store send failed");
                    break;
                }
            }
            let _ = write.close().await;
        });

        let reader: Weak<WsInner> = Rc::downgrade(&inner);
        tokio::task::spawn_local(async move {
            while let Some(message) = read.next().await {
                let bytes = match message {
                    Ok(Message::Binary(bytes)) => bytes,
                    Ok(Message::Close(frame)) => {
                        debug!(?frame, "team store closed the socket");
                        break;
                    }
                    Ok(_) => continue,
                    Err(err) => {
                        warn!(error = %err, "team store socket error");
                        break;
                    }
                };
                let Some(inner) = reader.upgrade() else {
                    return;
                };
                let delay_ms =
                    sample_delay_ms(&inner.rng, inner.delay.inbound_ms, inner.delay.jitter_ms);
                if delay_ms > 0 {
                    sleep(Duration::from_millis(delay_ms)).await;
                }
                match decode::<ServerMsg>(&bytes) {
                    Ok(msg) => inner.dispatch(msg),
                    Err(err) => warn!(error = %err, "dropping undecodable frame"),
                }
            }
            if let Some(inner) = reader.upgrade() {
                inner.shut_down();
            }
        });

        Ok(Self { inner })
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.get()
    }

    /// Stops the connection; requests still waiting fail with `Closed`.
    pub fn close(&self) {
        self.inner.shut_down();
    }

    /// Round trip time to the store.
    pub async fn ping(&self) -> Result<Duration, StoreError> {
        let started = Instant::now();
        let nonce = self.inner.next_id();
        let reply = self.request(nonce, ClientMsg::Ping { nonce: Some(nonce) }).await?;
        match reply {
            ServerMsg::Pong { .. } => Ok(started.elapsed()),
            other => Err(unexpected(&other)),
        }
    }

    async fn request(&self, request_id: u64, msg: ClientMsg) -> Result<ServerMsg, StoreError> {
        let (sender, receiver) = oneshot::channel();
        self.inner.pending.borrow_mut().insert(request_id, sender);
        if let Err(err) = self.inner.send(&msg) {
            self.inner.pending.borrow_mut().remove(&request_id);
            return Err(err);
        }
        match receiver.await {
            Ok(ServerMsg::Error { code, message, .. }) => Err(StoreError::Rejected { code, message }),
            Ok(reply) => Ok(reply),
            Err(_) => Err(StoreError::Closed),
        }
    }
}

fn unexpected(reply: &ServerMsg) -> StoreError {
    StoreError::Codec(format!("unexpected reply {reply:?}"))
}

impl TeamStore for WsTeamStore {
    async fn get(&self, team_key: &str) -> Result<Option<TeamDocument>, StoreError> {
        let request_id = self.inner.next_id();
        let msg = ClientMsg::Get {
            request_id,
            team: team_key.to_string(),
        };
        match self.request(request_id, msg).await? {
            ServerMsg::Document { document, .. } => Ok(document.map(TeamDocument::sanitize)),
            other => Err(unexpected(&other)),
        }
    }

    async fn create(&self, team_key: &str, document: TeamDocument) -> Result<bool, StoreError> {
        let request_id = self.inner.next_id();
        let msg = ClientMsg::Create {
            request_id,
            team: team_key.to_string(),
            document,
        };
        match self.request(request_id, msg).await? {
            ServerMsg::Created { created, .. } => Ok(created),
            other => Err(unexpected(&other)),
        }
    }

    async fn apply_update(&self, team_key: &str, patch: TeamPatch) -> Result<WriteAck, StoreError> {
        let request_id = self.inner.next_id();
        let msg = ClientMsg::Update {
            request_id,
            team: team_key.to_string(),
            patch,
        };
        match self.request(request_id, msg).await {
            Ok(ServerMsg::Ack { revision, .. }) => Ok(WriteAck { revision }),
            Ok(other) => Err(unexpected(&other)),
            Err(StoreError::Rejected { code, .. }) if code == ERROR_NOT_FOUND => {
                Err(StoreError::NotFound(team_key.to_string()))
            }
            Err(err) => Err(err),
        }
    }

    async fn subscribe(
        &self,
        team_key: &str,
        on_snapshot: SnapshotHandler,
    ) -> Result<StoreSubscription, StoreError> {
        if self.inner.closed.get() {
            return Err(StoreError::Closed);
        }
        let id = self.inner.next_id();
        let first_for_team = {
            let mut subscribers = self.inner.subscribers.borrow_mut();
            let first = !subscribers.iter().any(|subscriber| subscriber.team == team_key);
            subscribers.push(WsSubscriber {
                id,
                team: team_key.to_string(),
                handler: Rc::clone(&on_snapshot),
            });
            first
        };
        if !first_for_team {
            // The server only snapshots on the first subscribe for a team.
            let cached = self.inner.latest.borrow().get(team_key).cloned();
            if let Some(document) = cached {
                on_snapshot(document);
            }
        } else {
            let sent = self.inner.send(&ClientMsg::Subscribe {
                team: team_key.to_string(),
            });
            if let Err(err) = sent {
                self.inner
                    .subscribers
                    .borrow_mut()
                    .retain(|subscriber| subscriber.id != id);
                return Err(err);
            }
        }
        let weak = Rc::downgrade(&self.inner);
        let team = team_key.to_string();
        Ok(StoreSubscription::new(move || {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let last_for_team = {
                let mut subscribers = inner.subscribers.borrow_mut();
                subscribers.retain(|subscriber| subscriber.id != id);
                !subscribers.iter().any(|subscriber| subscriber.team == team)
            };
            if last_for_team {
                inner.latest.borrow_mut().remove(&team);
                if !inner.closed.get() {
                    let _ = inner.send(&ClientMsg::Unsubscribe { team });
                }
            }
        }))
    }

    fn watch_closed(&self, on_closed: CloseHandler) -> Option<StoreSubscription> {
        if self.inner.closed.get() {
            on_closed();
            return None;
        }
        let id = self.inner.next_id();
        self.inner.close_watchers.borrow_mut().push((id, on_closed));
        let weak = Rc::downgrade(&self.inner);
        Some(StoreSubscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner
                    .close_watchers
                    .borrow_mut()
                    .retain(|(watcher, _)| *watcher != id);
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_without_jitter_is_fixed() {
        let rng = RefCell::new(StdRng::seed_from_u64(3));
        assert_eq!(sample_delay_ms(&rng, 40, 0), 40);
        for _ in 0..50 {
            let delay = sample_delay_ms(&rng, 40, 10);
            assert!((40..=50).contains(&delay));
        }
        assert!(NetDelay::default().is_zero());
    }
}
