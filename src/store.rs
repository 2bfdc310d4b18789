use std::rc::Rc;

use tinsel_core::{TeamDocument, TeamPatch};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("team store unavailable: {0}")]
    Unavailable(String),
    #[error("team document {0} not found")]
    NotFound(String),
    #[error("team store rejected request ({code}): {message}")]
    Rejected { code: String, message: String },
    #[error("team store connection closed")]
    Closed,
    #[error("team store frame error: {0}")]
    Codec(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteAck {
    pub revision: u64,
}

/// Receives the full document on every change, `None` while it does not exist.
pub type SnapshotHandler = Rc<dyn Fn(Option<TeamDocument>)>;

/// Runs once when the connection behind a store is lost.
pub type CloseHandler = Rc<dyn Fn()>;

/// Keeps a subscription alive; dropping it tears the subscription down.
pub struct StoreSubscription {
    cancel: Option<Box<dyn FnOnce()>>,
}

impl StoreSubscription {
    pub fn new(cancel: impl FnOnce() + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }
}

impl Drop for StoreSubscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

/// Per-team shared document service.
///
/// Futures are driven on a single thread and are not `Send`.
#[allow(async_fn_in_trait)]
pub trait TeamStore {
    async fn get(&self, team_key: &str) -> Result<Option<TeamDocument>, StoreError>;

    /// Creates the document only if it is absent. Returns whether it was created.
    async fn create(&self, team_key: &str, document: TeamDocument) -> Result<bool, StoreError>;

    async fn apply_update(&self, team_key: &str, patch: TeamPatch) -> Result<WriteAck, StoreError>;

    async fn subscribe(
        &self,
        team_key: &str,
        on_snapshot: SnapshotHandler,
    ) -> Result<StoreSubscription, StoreError>;

    /// Registers `on_closed` for connection loss. Stores that cannot lose a
    /// connection return `None` and never call it.
    fn watch_closed(&self, on_closed: CloseHandler) -> Option<StoreSubscription> {
        let _ = on_closed;
        None
    }
}
