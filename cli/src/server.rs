use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use futures_util::{SinkExt, StreamExt};
use tinsel_core::protocol::{ERROR_INVALID_PATCH, ERROR_INVALID_TEAM, ERROR_NOT_FOUND, ERROR_STORAGE};
use tinsel_core::{apply_patch, decode, encode, is_valid_team_key, ClientMsg, ServerMsg, TeamDocument};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub(crate) enum StorageError {
    #[error("team file io failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("team file is not valid json: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Default)]
struct TeamEntry {
    loaded: bool,
    document: Option<TeamDocument>,
}

struct Connection {
    sender: mpsc::UnboundedSender<Vec<u8>>,
    teams: HashSet<String>,
}

#[derive(Default)]
struct HubInner {
    teams: HashMap<String, TeamEntry>,
    connections: HashMap<u64, Connection>,
    next_connection_id: u64,
}

/// Owns every team document and the sockets subscribed to them.
#[derive(Clone)]
pub(crate) struct TeamHub {
    inner: Rc<RefCell<HubInner>>,
    state_dir: Option<PathBuf>,
}

impl TeamHub {
    pub(crate) fn new(state_dir: Option<PathBuf>) -> Self {
        Self {
            inner: Rc::new(RefCell::new(HubInner::default())),
            state_dir,
        }
    }

    fn add_connection(&self, sender: mpsc::UnboundedSender<Vec<u8>>) -> u64 {
        let mut inner = self.inner.borrow_mut();
        inner.next_connection_id += 1;
        let id = inner.next_connection_id;
        inner.connections.insert(
            id,
            Connection {
                sender,
                teams: HashSet::new(),
            },
        );
        id
    }

    fn remove_connection(&self, connection_id: u64) {
        self.inner.borrow_mut().connections.remove(&connection_id);
    }

    fn team_path(&self, team: &str) -> Option<PathBuf> {
        self.state_dir
            .as_ref()
            .map(|dir| dir.join(format!("{team}.json")))
    }

    fn ensure_loaded(&self, team: &str) -> Result<Option<TeamDocument>, StorageError> {
        if let Some(entry) = self.inner.borrow().teams.get(team) {
            if entry.loaded {
                return Ok(entry.document.clone());
            }
        }
        let document = match self.team_path(team) {
            Some(path) => load_document(&path)?,
            None => None,
        };
        if document.is_some() {
            info!(%team, "loaded team document from disk");
        }
        self.inner.borrow_mut().teams.insert(
            team.to_string(),
            TeamEntry {
                loaded: true,
                document: document.clone(),
            },
        );
        Ok(document)
    }

    fn store(&self, team: &str, document: &TeamDocument) {
        self.inner.borrow_mut().teams.insert(
            team.to_string(),
            TeamEntry {
                loaded: true,
                document: Some(document.clone()),
            },
        );
        if let Some(path) = self.team_path(team) {
            if let Err(err) = persist_document(&path, document) {
                warn!(%team, error = %err, "failed to persist team document");
            }
        }
    }

    fn handle(&self, connection_id: u64, msg: ClientMsg) {
        match msg {
            ClientMsg::Get { request_id, team } => {
                if !self.check_team(connection_id, Some(request_id), &team) {
                    return;
                }
                let reply = match self.ensure_loaded(&team) {
                    Ok(document) => ServerMsg::Document {
                        request_id,
                        document,
                    },
                    Err(err) => storage_error(Some(request_id), &err),
                };
                self.send(connection_id, &reply);
            }
            ClientMsg::Create {
                request_id,
                team,
                mut document,
            } => {
                if !self.check_team(connection_id, Some(request_id), &team) {
                    return;
                }
                match self.ensure_loaded(&team) {
                    Ok(Some(existing)) => self.send(
                        connection_id,
                        &ServerMsg::Created {
                            request_id,
                            created: false,
                            revision: existing.revision,
                        },
                    ),
                    Ok(None) => {
                        document = document.sanitize();
                        document.revision = 1;
                        self.store(&team, &document);
                        info!(%team, "team document created");
                        self.broadcast(&team, Some(document));
                        self.send(
                            connection_id,
                            &ServerMsg::Created {
                                request_id,
                                created: true,
                                revision: 1,
                            },
                        );
                    }
                    Err(err) => self.send(connection_id, &storage_error(Some(request_id), &err)),
                }
            }
            ClientMsg::Update {
                request_id,
                team,
                patch,
            } => {
                if !self.check_team(connection_id, Some(request_id), &team) {
                    return;
                }
                if let Err(err) = patch.validate() {
                    warn!(%team, error = %err, "rejecting update");
                    self.send(
                        connection_id,
                        &ServerMsg::Error {
                            request_id: Some(request_id),
                            code: ERROR_INVALID_PATCH.to_string(),
                            message: err.to_string(),
                        },
                    );
                    return;
                }
                let mut document = match self.ensure_loaded(&team) {
                    Ok(Some(document)) => document,
                    Ok(None) => {
                        self.send(
                            connection_id,
                            &ServerMsg::Error {
                                request_id: Some(request_id),
                                code: ERROR_NOT_FOUND.to_string(),
                                message: format!("{team} does not exist"),
                            },
                        );
                        return;
                    }
                    Err(err) => {
                        self.send(connection_id, &storage_error(Some(request_id), &err));
                        return;
                    }
                };
                apply_patch(&mut document, &patch);
                document.revision += 1;
                let revision = document.revision;
                debug!(%team, revision, fields = ?patch.paths(), "update applied");
                self.store(&team, &document);
                self.broadcast(&team, Some(document));
                self.send(connection_id, &ServerMsg::Ack { request_id, revision });
            }
            ClientMsg::Subscribe { team } => {
                if !self.check_team(connection_id, None, &team) {
                    return;
                }
                if let Some(connection) = self.inner.borrow_mut().connections.get_mut(&connection_id) {
                    connection.teams.insert(team.clone());
                }
                let reply = match self.ensure_loaded(&team) {
                    Ok(document) => ServerMsg::Snapshot { team, document },
                    Err(err) => storage_error(None, &err),
                };
                self.send(connection_id, &reply);
            }
            ClientMsg::Unsubscribe { team } => {
                if let Some(connection) = self.inner.borrow_mut().connections.get_mut(&connection_id) {
                    connection.teams.remove(&team);
                }
            }
            ClientMsg::Ping { nonce } => {
                self.send(connection_id, &ServerMsg::Pong { nonce });
            }
        }
    }

    fn check_team(&self, connection_id: u64, request_id: Option<u64>, team: &str) -> bool {
        if is_valid_team_key(team) {
            return true;
        }
        warn!(%team, "rejecting invalid team key");
        self.send(
            connection_id,
            &ServerMsg::Error {
                request_id,
                code: ERROR_INVALID_TEAM.to_string(),
                message: format!("{team:?} is not a team key"),
            },
        );
        false
    }

    fn send(&self, connection_id: u64, msg: &ServerMsg) {
        let bytes = match encode(msg) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(error = %err, "failed to encode reply");
                return;
            }
        };
        if let Some(connection) = self.inner.borrow().connections.get(&connection_id) {
            let _ = connection.sender.send(bytes);
        }
    }

    /// Pushes the full document to every connection subscribed to `team`.
    fn broadcast(&self, team: &str, document: Option<TeamDocument>) {
        let msg = ServerMsg::Snapshot {
            team: team.to_string(),
            document,
        };
        let bytes = match encode(&msg) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(error = %err, "failed to encode snapshot");
                return;
            }
        };
        for connection in self.inner.borrow().connections.values() {
            if connection.teams.contains(team) {
                let _ = connection.sender.send(bytes.clone());
            }
        }
    }
}

fn storage_error(request_id: Option<u64>, err: &StorageError) -> ServerMsg {
    warn!(error = %err, "team storage failure");
    ServerMsg::Error {
        request_id,
        code: ERROR_STORAGE.to_string(),
        message: err.to_string(),
    }
}

fn load_document(path: &Path) -> Result<Option<TeamDocument>, StorageError> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn persist_document(path: &Path, document: &TeamDocument) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, serde_json::to_vec_pretty(document)?)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

pub(crate) async fn run(
    bind: SocketAddr,
    state_dir: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let listener = TcpListener::bind(bind).await?;
    let local_addr = listener.local_addr()?;
    info!(addr = %local_addr, state_dir = ?state_dir, "team store listening");
    println!("listening on ws://{local_addr}");
    let hub = TeamHub::new(state_dir);
    loop {
        let (stream, peer) = listener.accept().await?;
        let hub = hub.clone();
        tokio::task::spawn_local(async move {
            if let Err(err) = serve_connection(hub, stream).await {
                debug!(%peer, error = %err, "connection ended with error");
            }
        });
    }
}

async fn serve_connection(
    hub: TeamHub,
    stream: TcpStream,
) -> Result<(), Box<dyn std::error::Error>> {
    let ws = tokio_tungstenite::accept_async(stream).await?;
    let (mut write, mut read) = ws.split();
    let (sender, mut outgoing) = mpsc::unbounded_channel::<Vec<u8>>();
    let connection_id = hub.add_connection(sender);
    debug!(connection_id, "client connected");

    tokio::task::spawn_local(async move {
        while let Some(bytes) = outgoing.recv().await {
            if write.send(Message::Binary(bytes.into())).await.is_err() {
                break;
            }
        }
        let _ = write.close().await;
    });

    while let Some(message) = read.next().await {
        let bytes = match message {
            Ok(Message::Binary(bytes)) => bytes,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(err) => {
                hub.remove_connection(connection_id);
                return Err(err.into());
            }
        };
        match decode::<ClientMsg>(&bytes) {
            Ok(msg) => hub.handle(connection_id, msg),
            Err(err) => warn!(connection_id, error = %err, "dropping undecodable frame"),
        }
    }
    hub.remove_connection(connection_id);
    debug!(connection_id, "client disconnected");
    Ok(())
}
