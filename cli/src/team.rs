use std::time::Duration;

use tinsel::{MoveReport, SessionSnapshot, SyncController, TeamStore, WsTeamStore};
use tinsel_core::{tile::tier_label, MissionAvailability, MISSION_CATALOG};
use tokio::time::{sleep, Instant};

use super::*;

const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(clap::Subcommand)]
pub(super) enum TeamCommand {
    /// Print the team board, coins, collection and mission counts.
    Show {
        #[command(flatten)]
        team: TeamArgs,
        #[arg(long)]
        json: bool,
    },
    /// Buy a base tile.
    Spawn {
        #[command(flatten)]
        team: TeamArgs,
    },
    /// Drag a tile from one cell onto another (0..=15, row-major).
    Move {
        #[command(flatten)]
        team: TeamArgs,
        #[arg(long)]
        from: usize,
        #[arg(long)]
        to: usize,
    },
    /// Complete a mission once.
    Mission {
        #[command(flatten)]
        team: TeamArgs,
        #[arg(long)]
        id: String,
    },
    /// List missions with their availability at the current local time.
    Missions {
        #[command(flatten)]
        team: TeamArgs,
    },
}

pub(super) async fn run(command: TeamCommand) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        TeamCommand::Show { team, json } => {
            let controller = connect_controller(&team).await?;
            let snapshot = controller.snapshot();
            if json {
                let document = controller.store().get(controller.team_key()).await?;
                println!("{}", serde_json::to_string_pretty(&document)?);
            } else {
                print_snapshot(&snapshot);
            }
        }
        TeamCommand::Spawn { team } => {
            let controller = connect_controller(&team).await?;
            let report = controller.spawn_tile()?;
            println!("spawned {} at {}", report.value, report.index);
            finish(&controller).await?;
        }
        TeamCommand::Move { team, from, to } => {
            let controller = connect_controller(&team).await?;
            match controller.move_tile(from, to)? {
                MoveReport::Moved { from, to } => println!("moved {from} -> {to}"),
                MoveReport::Swapped { from, to } => println!("swapped {from} <-> {to}"),
                MoveReport::Merged {
                    to,
                    value,
                    reward,
                    unlocked,
                    ..
                } => {
                    println!("merged into {value} ({}) at {to}, +{reward} coins", tier_label(value));
                    if unlocked {
                        println!("collection unlocked: {value}");
                    }
                }
                MoveReport::Ignored => println!("nothing to move at {from}"),
            }
            finish(&controller).await?;
        }
        TeamCommand::Mission { team, id } => {
            let controller = connect_controller(&team).await?;
            let report = controller.complete_mission_by_id(&id, tinsel::runtime::local_time_of_day())?;
            println!(
                "{} completed ({} total), +{} coins",
                report.mission_id, report.count, report.points
            );
            finish(&controller).await?;
        }
        TeamCommand::Missions { team } => {
            let controller = connect_controller(&team).await?;
            let now = tinsel::runtime::local_time_of_day();
            let snapshot = controller.snapshot();
            let states = controller.mission_availability(now);
            for category in MISSION_CATALOG {
                println!("{} ({} pts)", category.title, category.points);
                for (def, state) in states
                    .iter()
                    .filter(|(def, _)| category.missions.iter().any(|m| m.id == def.id))
                {
                    let status = match state {
                        MissionAvailability::Locked { unlock_at } => format!("locked until {unlock_at}"),
                        MissionAvailability::Exhausted { .. } => "done".to_string(),
                        MissionAvailability::Available { remaining: Some(left) } => {
                            format!("available ({left} left)")
                        }
                        MissionAvailability::Available { remaining: None } => "available".to_string(),
                    };
                    println!(
                        "  {:<6} {:<40} x{:<3} {status}",
                        def.id,
                        def.label,
                        snapshot.mission_count(def.id)
                    );
                }
            }
        }
    }
    Ok(())
}

/// Waits for in-flight writes to settle, then prints the team state.
async fn finish(controller: &SyncController<WsTeamStore>) -> Result<(), Box<dyn std::error::Error>> {
    let deadline = Instant::now() + DRAIN_TIMEOUT;
    while !controller.is_idle() {
        if Instant::now() >= deadline {
            return Err(err_msg("timed out waiting for the team store to confirm the write"));
        }
        sleep(Duration::from_millis(20)).await;
    }
    let view = controller.sync_view();
    if view.failed_writes > 0 {
        return Err(err_msg("team store refused the write"));
    }
    print_snapshot(&controller.snapshot());
    Ok(())
}

fn print_snapshot(snapshot: &SessionSnapshot) {
    println!("team {} revision {}", snapshot.team, snapshot.revision.unwrap_or(0));
    print!("{}", snapshot.board);
    println!("coins: {}", snapshot.coins);
    let collection: Vec<String> = snapshot
        .collection
        .values()
        .map(|value| format!("{value} {}", tier_label(value)))
        .collect();
    println!("collection: [{}]", collection.join(", "));
    let completed: Vec<String> = snapshot
        .missions
        .iter()
        .filter(|(_, count)| **count > 0)
        .map(|(id, count)| format!("{id}x{count}"))
        .collect();
    if !completed.is_empty() {
        println!("missions: {}", completed.join(" "));
    }
}
