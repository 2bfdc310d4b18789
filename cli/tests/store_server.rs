use std::cell::RefCell;
use std::net::TcpListener;
use std::process::{Child, Command, Stdio};
use std::rc::Rc;
use std::time::Duration;

use tinsel::{
    ConnectionState, GameEvent, NetDelay, SessionSnapshot, StoreError, SyncController, SyncHooks,
    TeamStore, WsTeamStore,
};
use tinsel_core::protocol::ERROR_INVALID_TEAM;
use tinsel_core::{GameRules, TeamDocument, TeamId};
use tokio::task::LocalSet;
use tokio::time::{sleep, Instant};

struct ServerGuard {
    child: Child,
    url: String,
}

impl Drop for ServerGuard {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .and_then(|listener| listener.local_addr())
        .map(|addr| addr.port())
        .expect("free port")
}

fn start_server() -> ServerGuard {
    let port = free_port();
    let child = Command::new(env!("CARGO_BIN_EXE_tinsel-cli"))
        .args(["serve", "--bind", &format!("127.0.0.1:{port}")])
        .env_remove("TINSEL_STATE_DIR")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn server");
    ServerGuard {
        child,
        url: format!("ws://127.0.0.1:{port}/teams"),
    }
}

async fn connect_store(url: &str) -> WsTeamStore {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        match WsTeamStore::connect(url, NetDelay::default()).await {
            Ok(store) => return store,
            Err(_) if Instant::now() < deadline => sleep(Duration::from_millis(100)).await,
            Err(err) => panic!("server never came up: {err}"),
        }
    }
}

async fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(20)).await;
    }
    condition()
}

#[tokio::test]
async fn two_clients_share_one_team_document() {
    let server = start_server();
    LocalSet::new()
        .run_until(async {
            let team = TeamId::new(42).expect("team");
            let rules = GameRules {
                starting_coins: 200,
                ..GameRules::default()
            };
            let client_a = SyncController::new(connect_store(&server.url).await, team, rules);
            let client_b = SyncController::new(connect_store(&server.url).await, team, rules);
            assert_eq!(client_a.connect().await, Ok(true));
            assert_eq!(client_b.connect().await, Ok(false));

            let spawned = client_a.spawn_tile().expect("spawn");
            assert!(
                wait_for(|| client_b.snapshot().board.get(spawned.index) == Some(50)).await,
                "second client never saw the spawned tile"
            );
            assert_eq!(client_b.snapshot().coins, 150);
            assert!(wait_for(|| client_a.is_idle()).await);
            assert_eq!(client_a.sync_view().reconciled, 1);

            let remote = client_b
                .store()
                .get(&team.key())
                .await
                .expect("get")
                .expect("document");
            assert_eq!(remote.coins, 150);
            assert_eq!(remote.revision, 2);
        })
        .await;
}

#[tokio::test]
async fn server_rejects_bad_keys_and_answers_pings() {
    let server = start_server();
    LocalSet::new()
        .run_until(async {
            let store = connect_store(&server.url).await;
            store.ping().await.expect("pong");
            match store.get("team_100").await {
                Err(StoreError::Rejected { code, .. }) => assert_eq!(code, ERROR_INVALID_TEAM),
                other => panic!("unexpected {other:?}"),
            }
            let missing = store
                .apply_update("team_77", tinsel_core::TeamPatch::new().increment_coins(5))
                .await;
            assert_eq!(missing, Err(StoreError::NotFound("team_77".to_string())));
        })
        .await;
}

#[tokio::test]
async fn late_client_acts_on_remote_state_right_after_connect() {
    let server = start_server();
    LocalSet::new()
        .run_until(async {
            let team = TeamId::new(43).expect("team");
            let funded = GameRules {
                starting_coins: 500,
                ..GameRules::default()
            };
            let founder = SyncController::new(connect_store(&server.url).await, team, funded);
            assert_eq!(founder.connect().await, Ok(true));
            let first = founder.spawn_tile().expect("spawn");
            assert!(wait_for(|| founder.is_idle()).await);

            let late = SyncController::new(
                connect_store(&server.url).await,
                team,
                GameRules::default(),
            );
            assert_eq!(late.connect().await, Ok(false));
            let snapshot = late.snapshot();
            assert_eq!(snapshot.coins, 450);
            assert_eq!(snapshot.board.get(first.index), Some(50));
            assert_eq!(snapshot.revision, Some(2));

            let second = late.spawn_tile().expect("funded by the team document");
            assert_ne!(second.index, first.index);
            assert_eq!(late.snapshot().coins, 400);
            assert!(wait_for(|| late.is_idle()).await);
            assert_eq!(late.sync_view().failed_writes, 0);
            assert!(wait_for(|| founder.snapshot().coins == 400).await);
        })
        .await;
}

#[tokio::test]
async fn second_subscriber_on_one_socket_sees_current_document() {
    let server = start_server();
    LocalSet::new()
        .run_until(async {
            let team = TeamId::new(44).expect("team");
            let store = connect_store(&server.url).await;
            let first = SyncController::new(store.clone(), team, GameRules::default());
            let pushed = Rc::new(RefCell::new(0));
            let counter = Rc::clone(&pushed);
            first.set_hooks(SyncHooks {
                on_snapshot: Rc::new(move |_: &SessionSnapshot| *counter.borrow_mut() += 1),
                ..SyncHooks::empty()
            });
            first.connect().await.expect("connect");
            assert!(wait_for(|| *pushed.borrow() > 0).await, "no snapshot pushed");

            let seen: Rc<RefCell<Vec<Option<TeamDocument>>>> = Rc::new(RefCell::new(Vec::new()));
            let sink = Rc::clone(&seen);
            let _subscription = store
                .subscribe(
                    &team.key(),
                    Rc::new(move |document: Option<TeamDocument>| sink.borrow_mut().push(document)),
                )
                .await
                .expect("subscribe");
            let seen = seen.borrow();
            assert_eq!(seen.len(), 1);
            assert_eq!(seen[0].as_ref().map(|doc| doc.revision), Some(1));
        })
        .await;
}

#[tokio::test]
async fn stopped_server_degrades_connected_clients() {
    let server = start_server();
    let url = server.url.clone();
    LocalSet::new()
        .run_until(async move {
            let team = TeamId::new(45).expect("team");
            let controller = SyncController::new(connect_store(&url).await, team, GameRules::default());
            let lost = Rc::new(RefCell::new(false));
            let flag = Rc::clone(&lost);
            controller.set_hooks(SyncHooks {
                on_event: Rc::new(move |event: GameEvent| {
                    if matches!(event, GameEvent::RemoteUnavailable { .. }) {
                        *flag.borrow_mut() = true;
                    }
                }),
                ..SyncHooks::empty()
            });
            controller.connect().await.expect("connect");
            assert_eq!(controller.connection(), ConnectionState::Live);

            drop(server);
            assert!(wait_for(|| controller.connection() == ConnectionState::Degraded).await);
            assert!(*lost.borrow());
            assert!(controller.store().is_closed());
        })
        .await;
}
