use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tinsel::{ActionError, SyncController, SyncView, TeamStore, WsTeamStore};
use tinsel_core::{Board, GameRules, MissionAvailability, BOARD_CELLS};
use tokio::time::{sleep, Instant};

use super::*;

#[derive(clap::Subcommand)]
pub(super) enum BotCommand {
    /// Drive several clients against one team at once.
    Run {
        #[command(flatten)]
        team: TeamArgs,
        #[arg(long, default_value_t = 4)]
        clients: usize,
        #[arg(long, default_value_t = 30)]
        duration_secs: u64,
        #[arg(long)]
        seed: Option<u64>,
        #[arg(long, default_value_t = 150)]
        think_min_ms: u64,
        #[arg(long, default_value_t = 900)]
        think_max_ms: u64,
        #[arg(long, default_value_t = 0.05)]
        mission_rate: f64,
    },
}

#[derive(Clone, Copy, Debug)]
struct BotRunConfig {
    clients: usize,
    duration_secs: u64,
    think_min_ms: u64,
    think_max_ms: u64,
    mission_rate: f64,
}

#[derive(Debug, Default, Clone, Copy)]
struct BotTally {
    spawns: u64,
    merges: u64,
    moves: u64,
    missions: u64,
    rejected: u64,
}

pub(super) async fn run(command: BotCommand) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        BotCommand::Run {
            team,
            clients,
            duration_secs,
            seed,
            think_min_ms,
            think_max_ms,
            mission_rate,
        } => {
            let config = BotRunConfig {
                clients,
                duration_secs,
                think_min_ms,
                think_max_ms,
                mission_rate,
            };
            run_bots(team, config, seed).await
        }
    }
}

async fn run_bots(
    team: TeamArgs,
    config: BotRunConfig,
    seed: Option<u64>,
) -> Result<(), Box<dyn std::error::Error>> {
    validate_bot_config(config)?;
    let seed = seed.unwrap_or_else(|| rand::rng().random());
    eprintln!(
        "bot run: team={} clients={} duration={}s seed={seed} think={}..{}ms mission_rate={:.3}",
        team.team,
        config.clients,
        config.duration_secs,
        config.think_min_ms,
        config.think_max_ms,
        config.mission_rate
    );

    let mut controllers = Vec::with_capacity(config.clients);
    for index in 0..config.clients {
        let controller = connect_controller(&team).await?;
        let controller = controller.with_rng(StdRng::seed_from_u64(seed.wrapping_add(index as u64)));
        controllers.push(controller);
    }

    let deadline = Instant::now() + Duration::from_secs(config.duration_secs);
    let mut handles = Vec::with_capacity(controllers.len());
    for (index, controller) in controllers.iter().enumerate() {
        let controller = controller.clone();
        let rng = StdRng::seed_from_u64(seed.rotate_left(17).wrapping_add(index as u64));
        handles.push(tokio::task::spawn_local(drive_client(
            controller, config, rng, deadline,
        )));
    }
    let mut tallies = Vec::with_capacity(handles.len());
    for handle in handles {
        tallies.push(handle.await?);
    }

    let drain_deadline = Instant::now() + Duration::from_secs(5);
    while controllers.iter().any(|controller| !controller.is_idle()) {
        if Instant::now() >= drain_deadline {
            eprintln!("some writes were still in flight after 5s");
            break;
        }
        sleep(Duration::from_millis(20)).await;
    }

    if let Some(first) = controllers.first() {
        let document = first.store().get(first.team_key()).await?;
        println!("{}", serde_json::to_string_pretty(&document)?);
    }
    for (index, (controller, tally)) in controllers.iter().zip(&tallies).enumerate() {
        print_client_summary(index, &controller.sync_view(), tally);
    }
    Ok(())
}

async fn drive_client(
    controller: SyncController<WsTeamStore>,
    config: BotRunConfig,
    mut rng: StdRng,
    deadline: Instant,
) -> BotTally {
    let mut tally = BotTally::default();
    while Instant::now() < deadline {
        let think = rng.random_range(config.think_min_ms..=config.think_max_ms);
        sleep(Duration::from_millis(think)).await;
        act_once(&controller, config, &mut rng, &mut tally);
    }
    tally
}

fn act_once(
    controller: &SyncController<WsTeamStore>,
    config: BotRunConfig,
    rng: &mut StdRng,
    tally: &mut BotTally,
) {
    if rng.random_bool(config.mission_rate) {
        let now = tinsel::runtime::local_time_of_day();
        let open: Vec<_> = controller
            .mission_availability(now)
            .into_iter()
            .filter(|(_, state)| matches!(state, MissionAvailability::Available { .. }))
            .collect();
        if !open.is_empty() {
            let (def, _) = open[rng.random_range(0..open.len())];
            if controller.complete_mission(def, now).is_ok() {
                tally.missions += 1;
            }
            return;
        }
    }

    let snapshot = controller.snapshot();
    let rules = controller.rules();
    if let Some((from, to)) = merge_candidate(&snapshot.board) {
        match controller.move_tile(from, to) {
            Ok(_) => tally.merges += 1,
            Err(_) => tally.rejected += 1,
        }
        return;
    }
    if can_spawn(&snapshot.board, snapshot.coins, rules) {
        match controller.spawn_tile() {
            Ok(_) => tally.spawns += 1,
            Err(ActionError::InsufficientFunds { .. } | ActionError::BoardFull) => {
                tally.rejected += 1
            }
            Err(err) => tracing::warn!(error = %err, "bot spawn failed"),
        }
        return;
    }
    let from = rng.random_range(0..BOARD_CELLS);
    let to = rng.random_range(0..BOARD_CELLS);
    match controller.move_tile(from, to) {
        Ok(_) => tally.moves += 1,
        Err(_) => tally.rejected += 1,
    }
}

fn can_spawn(board: &Board, coins: i64, rules: GameRules) -> bool {
    rules.can_afford_spawn(coins) && !board.is_full()
}

/// First pair of equal tiles below the top tier, lowest value first.
fn merge_candidate(board: &Board) -> Option<(usize, usize)> {
    let mut best: Option<(u32, usize, usize)> = None;
    for from in 0..BOARD_CELLS {
        let Some(value) = board.get(from) else {
            continue;
        };
        if tinsel_core::next_tier(value).is_none() {
            continue;
        }
        for to in (from + 1)..BOARD_CELLS {
            if board.get(to) == Some(value) && best.map_or(true, |(current, _, _)| value < current) {
                best = Some((value, from, to));
            }
        }
    }
    best.map(|(_, from, to)| (from, to))
}

fn print_client_summary(index: usize, view: &SyncView, tally: &BotTally) {
    println!(
        "client {index}: spawns={} merges={} moves={} missions={} rejected={} reconciled={} superseded={} failed={} in_flight={}",
        tally.spawns,
        tally.merges,
        tally.moves,
        tally.missions,
        tally.rejected,
        view.reconciled,
        view.superseded,
        view.failed_writes,
        view.in_flight
    );
}

fn validate_bot_config(config: BotRunConfig) -> Result<(), Box<dyn std::error::Error>> {
    if config.clients == 0 {
        return Err(err_msg("need at least one client"));
    }
    if config.duration_secs == 0 {
        return Err(err_msg("duration must be positive"));
    }
    if config.think_min_ms == 0 || config.think_max_ms < config.think_min_ms {
        return Err(err_msg("invalid think-time range"));
    }
    if !(0.0..=1.0).contains(&config.mission_rate) {
        return Err(err_msg("mission-rate must be between 0 and 1"));
    }
    Ok(())
}
