//! Arena Session Server
//!
//! Headless demo: runs one round of a variant with scripted occupants,
//! streams it through the replication channel and checks that the
//! observer's reconstruction and a replay both match the server.

use anyhow::{bail, Context, Result};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use arena_session::{
    TICK_RATE, VERSION,
    game::{
        command::{cue_piece, Command, InboundAction},
        events::GameEventData,
        replication::{Delta, DeltaTracker, Snapshot},
        state::{PlayerId, SessionPhase},
        tick::{replay_session, ScriptedInput, Simulation},
        variant::{ControlScheme, GameVariant},
    },
    network::ServerMessage,
    Vec2,
};

/// Hard stop for the demo loop (five simulated minutes).
const DEMO_TICK_LIMIT: u64 = 300 * TICK_RATE as u64;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Arena Session Server v{}", VERSION);

    let arg = std::env::args().nth(1).unwrap_or_else(|| "racing".to_string());
    let variant = load_variant(&arg)?;
    info!("Variant: {} ({} Hz)", variant.name, variant.tick_rate);
    debug!("Descriptor: {}", variant.to_json()?);

    demo_session(variant, 12345)
}

/// Preset name, or a path to a JSON descriptor.
fn load_variant(arg: &str) -> Result<GameVariant> {
    if let Some(preset) = GameVariant::preset(arg) {
        return Ok(preset);
    }
    let json = std::fs::read_to_string(arg).with_context(|| format!("reading variant file {arg}"))?;
    let variant = GameVariant::from_json(&json).with_context(|| format!("parsing variant file {arg}"))?;
    Ok(variant)
}

/// Scripted intent for one occupant at tick `t`.
fn scripted_command(sim: &Simulation, player: &PlayerId, index: usize, t: u64) -> Option<Command> {
    let state = sim.state();
    match sim.variant().control {
        ControlScheme::Vehicle => {
            if t % 90 == 45 && sim.variant().projectile.is_some() {
                return Some(Command::Fire);
            }
            let phase = (t as f64 / 40.0) + index as f64;
            Some(Command::Steer { throttle: 1.0, steering: phase.sin() * 0.6 })
        }
        ControlScheme::Cue => {
            let holds = state.turn.holder.as_ref() == Some(player);
            if !holds || state.turn.move_in_flight {
                return None;
            }
            let cue = cue_piece(state).and_then(|id| state.objects.get(&id))?;
            // Aim at the nearest remaining piece.
            let target = state
                .objects
                .values()
                .filter(|o| o.active && o.piece().is_some_and(|p| !p.cue))
                .min_by(|a, b| a.position.distance_squared(cue.position).total_cmp(&b.position.distance_squared(cue.position)))?;
            let angle = (target.position - cue.position).angle();
            Some(Command::Shoot { angle, power: 70.0 + (t % 30) as f64 })
        }
        ControlScheme::Blade => {
            if t % 20 != (index as u64 * 7) % 20 {
                return None;
            }
            let arena = sim.variant().arena;
            let y = ((t / 20) % 7) as f64 - 3.0;
            Some(Command::Slice {
                start: Vec2::new(-arena.half_width, y * 2.0),
                end: Vec2::new(arena.half_width, -y),
            })
        }
    }
}

/// Run one round headless and verify replication and replay.
fn demo_session(variant: GameVariant, seed: u64) -> Result<()> {
    info!("=== Starting Demo Session ===");
    info!("RNG Seed: {}", seed);

    let mut sim = Simulation::new(variant.clone(), seed).context("invalid variant")?;
    let mut tracker = DeltaTracker::new(sim.state(), &variant);
    let mut view = Snapshot::from_bytes(&tracker.baseline().to_bytes()?)?;
    let mut script = Vec::new();

    let seats = variant.rules.min_occupants.max(2).min(variant.rules.max_occupants);
    let players: Vec<PlayerId> = (0..seats).map(|i| PlayerId::new(format!("bot-{i}"))).collect();
    for player in &players {
        let admission = sim.admit(player.clone(), player.as_str()).context("admitting demo occupant")?;
        info!("Admitted {} (entity {:?})", player, admission.entity);
        script.push(ScriptedInput {
            tick: 1,
            action: InboundAction::Join { player: player.clone(), display_name: player.to_string(), entity: None },
        });
    }

    let mut total_events = 0;
    let mut event_bytes = 0;
    let mut delta_bytes = 0;

    while sim.current_tick() < DEMO_TICK_LIMIT {
        let next = sim.current_tick() + 1;
        if sim.phase() == SessionPhase::Playing {
            for (index, player) in players.iter().enumerate() {
                let Some(command) = scripted_command(&sim, player, index, next) else { continue };
                if sim.submit(player, command.clone()).is_ok() {
                    script.push(ScriptedInput {
                        tick: next,
                        action: InboundAction::Command { sender: player.clone(), command },
                    });
                }
            }
        }

        let result = sim.tick();
        total_events += result.events.len();

        for event in &result.events {
            event_bytes += ServerMessage::Event { event: event.clone() }.to_json()?.len();
            match &event.data {
                GameEventData::PhaseChanged { from, to, round } => {
                    info!("Tick {}: {} -> {} (round {})", event.tick, from, to, round);
                }
                GameEventData::CheckpointReached { player, lap, checkpoint: 0 } if *lap > 0 => {
                    info!("Tick {}: {} completed lap {}", event.tick, player, lap);
                }
                GameEventData::MatchEnded { winner, reason, standings } => {
                    info!("Round ended ({:?}); winner: {:?}", reason, winner.as_ref().map(|w| w.as_str()));
                    for (place, standing) in standings.iter().enumerate() {
                        info!("#{}: {} - Score: {}", place + 1, standing.player, standing.score);
                    }
                }
                _ => {}
            }
        }

        if let Some(delta) = tracker.update(sim.state(), &variant) {
            let frame = delta.to_bytes()?;
            delta_bytes += frame.len();
            Delta::from_bytes(&frame)?.apply(&mut view)?;
        }

        if result.round_ended() {
            break;
        }
    }

    if sim.phase() != SessionPhase::Ended {
        warn!("Demo stopped at tick {} without the round ending", sim.current_tick());
    }

    info!("Total events: {} ({} bytes as JSON)", total_events, event_bytes);
    info!("Delta bytes: {}", delta_bytes);

    // Observer reconstruction
    info!("=== Verifying Replication ===");
    let server_view = tracker.baseline().compute_hash();
    let observer_view = view.compute_hash();
    info!("Server View Hash:   {}", hex::encode(server_view));
    info!("Observer View Hash: {}", hex::encode(observer_view));
    if server_view != observer_view {
        bail!("replication mismatch: observer view differs from server");
    }
    info!("REPLICATION VERIFIED: Hashes match!");

    // Replay from seed and script
    info!("=== Verifying Determinism ===");
    let final_hash = sim.state().compute_hash();
    let (replayed, _) = replay_session(variant, seed, &script, sim.current_tick())?;
    let replay_hash = replayed.compute_hash();
    info!("Final State Hash:  {}", hex::encode(final_hash));
    info!("Replay State Hash: {}", hex::encode(replay_hash));
    if final_hash != replay_hash {
        bail!("determinism failure: replay diverged");
    }
    info!("DETERMINISM VERIFIED: Hashes match!");

    Ok(())
}
