//! Program execution command.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use clap::Args;
use strand_net::{NetError, SyncState};

use super::common::{load_network, load_program};

/// Extra time allowed past the handshake timeout before giving up on the worker.
const SYNC_GRACE: Duration = Duration::from_secs(1);

#[derive(Args)]
pub struct RunArgs {
    /// Program name or path (TOML)
    program: String,

    /// Network roster (TOML); required for programs with remote connections
    #[arg(short, long)]
    network: Option<PathBuf>,

    /// Stop after this many cycles (runs until Ctrl+C otherwise)
    #[arg(short, long)]
    cycles: Option<u64>,

    /// Pace cycles to the block duration instead of running flat out
    #[arg(long)]
    realtime: bool,
}

pub fn run(args: RunArgs) -> anyhow::Result<()> {
    let (path, program) = load_program(&args.program)?;
    let network = load_network(args.network.as_deref(), &program)?;
    let mut session = program.instantiate(strand_units::builtin_registry(), network.as_ref())?;

    println!("Running {} ({})", program.name, path.display());
    println!(
        "  {} instance(s), {} Hz, {} frames per cycle",
        session.graph().len(),
        program.sample_rate,
        program.frames_per_cycle
    );
    if let Some(net) = &network {
        println!("  node '{}' of {}", net.local, net.nodes.len());
    }

    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    let timeout = network
        .as_ref()
        .map_or(Duration::ZERO, |net| net.sync.policy().timeout)
        + SYNC_GRACE;
    let mut state = session.sync()?;
    let deadline = Instant::now() + timeout;
    while state == SyncState::Pending && running.load(Ordering::SeqCst) && Instant::now() < deadline {
        state = session.wait_sync(Duration::from_millis(100))?;
    }
    if state != SyncState::Success {
        session.cancel_sync()?;
        anyhow::bail!("network synchronization did not complete");
    }
    tracing::info!("synchronized");

    let config = program.graph_config();
    let block = Duration::from_secs_f64(config.frames_per_cycle as f64 / f64::from(config.sample_rate));
    println!("\nPress Ctrl+C to stop...\n");

    let mut next = Instant::now();
    let mut executed = 0_u64;
    while running.load(Ordering::SeqCst) && args.cycles.is_none_or(|n| executed < n) {
        match session.execute_cycle() {
            Ok(_) => {}
            Err(NetError::Cycle(err)) => tracing::warn!(cycle = executed + 1, "{err}"),
            Err(err) => return Err(err.into()),
        }
        executed += 1;
        if args.realtime {
            next += block;
            let now = Instant::now();
            if next > now {
                std::thread::sleep(next - now);
            } else {
                // Fell behind; don't try to catch up with a burst.
                next = now;
            }
        }
    }

    let stats = *session.graph().stats();
    println!("Cycles:        {}", stats.cycles);
    println!("Failed cycles: {}", stats.failed_cycles);
    println!("Mean sweep:    {:?}", stats.mean());
    println!("Max sweep:     {:?}", stats.max);
    println!("Load:          {:.2}%", stats.load(block) * 100.0);

    session.unload()?;
    Ok(())
}
