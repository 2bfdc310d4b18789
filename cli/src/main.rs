use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tinsel::{NetDelay, SyncController, WsTeamStore};
use tinsel_core::{GameRules, TeamId, Zone, SHOP_STARTING_COINS};
use tokio::task::LocalSet;
use tracing_subscriber::EnvFilter;
use url::Url;

mod bot;
mod server;
mod team;

#[derive(Parser)]
#[command(name = "tinsel-cli", version, about = "Team store server and tools for tinsel boards")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a websocket team store.
    Serve {
        #[arg(long, env = "TINSEL_BIND", default_value = "127.0.0.1:8787")]
        bind: SocketAddr,
        #[arg(long, env = "TINSEL_STATE_DIR")]
        state_dir: Option<PathBuf>,
    },
    Team {
        #[command(subcommand)]
        command: team::TeamCommand,
    },
    Bot {
        #[command(subcommand)]
        command: bot::BotCommand,
    },
}

#[derive(Args, Clone, Debug)]
pub(crate) struct StoreArgs {
    #[arg(long, env = "TINSEL_STORE_URL", default_value = "ws://127.0.0.1:8787/teams")]
    store_url: Url,
    #[arg(long, default_value_t = 0)]
    net_in_delay_ms: u64,
    #[arg(long, default_value_t = 0)]
    net_out_delay_ms: u64,
    #[arg(long, default_value_t = 0)]
    net_jitter_ms: u64,
}

impl StoreArgs {
    fn delay(&self) -> NetDelay {
        NetDelay {
            inbound_ms: self.net_in_delay_ms,
            outbound_ms: self.net_out_delay_ms,
            jitter_ms: self.net_jitter_ms,
        }
    }
}

#[derive(Args, Clone, Debug)]
pub(crate) struct TeamArgs {
    #[arg(long, env = "TINSEL_TEAM")]
    team: TeamId,
    /// Zone within the team, only used for log context.
    #[arg(long)]
    zone: Option<u8>,
    /// Start newly created teams with the shop bonus.
    #[arg(long)]
    shop: bool,
    #[command(flatten)]
    store: StoreArgs,
}

impl TeamArgs {
    fn rules(&self) -> GameRules {
        let mut rules = GameRules::default();
        if self.shop {
            rules.starting_coins = SHOP_STARTING_COINS;
        }
        rules
    }

    fn zone(&self) -> Result<Option<Zone>, Box<dyn std::error::Error>> {
        match self.zone {
            Some(zone) => Ok(Some(Zone::new(self.team, zone)?)),
            None => Ok(None),
        }
    }
}

pub(crate) fn err_msg(message: impl Into<String>) -> Box<dyn std::error::Error> {
    let message: String = message.into();
    message.into()
}

/// Opens a websocket store and connects a controller for the team.
pub(crate) async fn connect_controller(
    args: &TeamArgs,
) -> Result<SyncController<WsTeamStore>, Box<dyn std::error::Error>> {
    args.rules().validate()?;
    if let Some(zone) = args.zone()? {
        tracing::info!(team = %args.team, zone = zone.get(), "playing from zone");
    }
    let store = WsTeamStore::connect(args.store.store_url.as_str(), args.store.delay()).await?;
    let controller = SyncController::new(store, args.team, args.rules());
    controller.connect().await?;
    Ok(controller)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    // Stores and controllers are single-threaded; everything runs on one LocalSet.
    LocalSet::new()
        .run_until(async move {
            match cli.command {
                Commands::Serve { bind, state_dir } => server::run(bind, state_dir).await,
                Commands::Team { command } => team::run(command).await,
                Commands::Bot { command } => bot::run(command).await,
            }
        })
        .await
}
