//! # oilfield_app — headless runner
//!
//! Builds a random fleet, runs the simulation for a fixed wall-clock
//! duration while tailing the event stream into the log, then stops it and
//! prints the final statistics.

use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use oilfield_sim::{EventStream, SimConfig, SimEvent, Simulation};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "oilfield_app", about = "Oil field simulation runner")]
struct Args {
    /// Number of randomly generated rigs
    #[arg(long, default_value_t = 5)]
    rigs: usize,

    /// Number of randomly generated mechanics
    #[arg(long, default_value_t = 2)]
    mechanics: usize,

    /// Number of randomly generated loaders
    #[arg(long, default_value_t = 2)]
    loaders: usize,

    /// How long to run before stopping, in seconds
    #[arg(short, long, default_value_t = 30)]
    duration_secs: u64,

    /// Production tick length in milliseconds; every other duration scales with it
    #[arg(short, long, default_value_t = 100)]
    tick_ms: u64,

    /// RNG seed for a reproducible run
    #[arg(short, long)]
    seed: Option<u64>,

    /// Print the final statistics as JSON
    #[arg(long)]
    json: bool,
}

impl Args {
    fn config(&self) -> SimConfig {
        let config = SimConfig::scaled(Duration::from_millis(self.tick_ms.max(1)));
        match self.seed {
            Some(seed) => config.with_seed(seed),
            None => config,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("oilfield_app=info".parse()?)
                .add_directive("oilfield_sim=info".parse()?),
        )
        .init();

    let args = Args::parse();
    let sim = Simulation::new(args.config());

    for _ in 0..args.rigs {
        sim.add_random_rig()?;
    }
    for _ in 0..args.mechanics {
        sim.add_random_mechanic()?;
    }
    for _ in 0..args.loaders {
        sim.add_random_loader()?;
    }

    let tail = tokio::spawn(tail_events(sim.subscribe()));

    info!(duration_secs = args.duration_secs, "running simulation");
    sim.start();
    tokio::select! {
        () = tokio::time::sleep(Duration::from_secs(args.duration_secs)) => {}
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("interrupted");
        }
    }
    sim.stop().await;

    let stats = sim.statistics();
    // The tail ends once the last event sink goes away with the engine.
    drop(sim);
    match tokio::time::timeout(Duration::from_secs(1), tail).await {
        Ok(joined) => {
            let skipped = joined?;
            if skipped > 0 {
                warn!(skipped, "event tail fell behind");
            }
        }
        Err(_) => debug!("event tail still draining, abandoning it"),
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        print!("{stats}");
    }
    Ok(())
}

/// Mirror engine events into the log until the engine is dropped. Returns
/// how many events were lost to lag.
async fn tail_events(mut events: EventStream) -> u64 {
    while let Some(event) = events.next().await {
        match event {
            SimEvent::FireStarted { rig, severity } => {
                warn!(rig = %rig, severity, "fire");
            }
            SimEvent::RepairCompleted {
                mechanic,
                rig,
                outcome,
            } => {
                info!(mechanic = %mechanic, rig = %rig, ?outcome, "repair ended");
            }
            SimEvent::TransportCompleted { loader, amount } => {
                info!(loader = %loader, amount, "oil delivered");
            }
            // Already logged by the engine as it emitted them.
            SimEvent::Log { .. } => {}
            other => debug!(event = ?other, "event"),
        }
    }
    events.skipped()
}
