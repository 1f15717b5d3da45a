//! Synthetic command-lifecycle workload for the penumbra profiler.
//!
//! Drives the profiling core the way a busy client would: worker threads
//! simulate command attempts with seeded jitter, a fraction of attempts get
//! redirected and retransmitted, and everything lands in one shared session
//! log whose contents are summarized, printed, and optionally exported.
#![forbid(unsafe_code)]

use std::error::Error;
use std::fs::File;
use std::io::BufWriter;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::Parser;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing_subscriber::EnvFilter;

use penumbra::{
    clock, CommandDescriptor, CommandFlags, CommandProfile, ConnectionKind, ProfileCollector,
    ProfileSnapshot, RetransmissionReason, SessionLog, Tick,
};

/// Redirect chains are short in practice; servers cap how often a command
/// may bounce before the client gives up.
const MAX_REDIRECT_HOPS: usize = 3;

const ENDPOINTS: [&str; 3] = ["10.77.0.1:6379", "10.77.0.2:6379", "10.77.0.3:6379"];

const COMMANDS: [&str; 6] = ["GET", "SET", "DEL", "INCR", "MGET", "EXPIRE"];

#[derive(Parser, Debug)]
#[command(
    name = "latency_bench",
    version,
    about = "Simulates command traffic through the profiler and reports latency breakdowns",
    disable_help_subcommand = true
)]
struct Cli {
    #[arg(long, default_value_t = 4, help = "Worker threads simulating command traffic")]
    threads: usize,

    #[arg(long, default_value_t = 1_000, help = "Command lifecycles simulated per thread")]
    commands: usize,

    #[arg(
        long,
        env = "PENUMBRA_BENCH_SEED",
        default_value_t = 42,
        help = "Seed for the deterministic jitter source"
    )]
    seed: u64,

    #[arg(
        long,
        default_value_t = 0.05,
        help = "Probability that an attempt is answered with a redirect"
    )]
    redirect_rate: f64,

    #[arg(
        long,
        value_name = "FILE",
        help = "Write every collected profile to FILE as a JSON array"
    )]
    json: Option<PathBuf>,

    #[arg(
        long,
        default_value_t = 0,
        value_name = "N",
        help = "Print the first N collected profiles in full"
    )]
    show: usize,
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_env("PENUMBRA_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .try_init();
}

fn format_duration(d: Duration) -> String {
    let micros = d.as_micros();
    if micros < 1_000 {
        format!("{} µs", micros)
    } else if micros < 1_000_000 {
        format!("{:.2} ms", micros as f64 / 1_000.0)
    } else {
        format!("{:.2} s", micros as f64 / 1_000_000.0)
    }
}

fn percentile(values: &[u64], pct: f64) -> u64 {
    if values.is_empty() {
        return 0;
    }
    let max_index = values.len() - 1;
    let idx = ((max_index as f64) * pct).round() as usize;
    values[idx.min(max_index)]
}

/// Walks one command through its lifecycle with injected ticks, possibly
/// chaining retransmissions, and leaves every attempt completed.
fn simulate_command(
    rng: &mut ChaCha8Rng,
    session: &Arc<SessionLog>,
    endpoints: &[SocketAddr],
    redirect_rate: f64,
) {
    let name = COMMANDS[rng.gen_range(0..COMMANDS.len())];
    let db = rng.gen_range(0..8);
    let flags = if rng.gen_bool(0.1) {
        CommandFlags::HIGH_PRIORITY
    } else {
        CommandFlags::NONE
    };

    let mut now = clock::now().0;
    let mut endpoint_idx = rng.gen_range(0..endpoints.len());
    let collector: Arc<dyn ProfileCollector> = session.clone();

    let mut profile = CommandProfile::for_attempt(endpoints[endpoint_idx], collector);
    attach(&profile, db, name, flags, Tick(now));
    now = advance_to_sent(&profile, rng, now);

    let mut hops = 0;
    while hops < MAX_REDIRECT_HOPS && rng.gen_bool(redirect_rate) {
        // A redirect answer closes this attempt and opens the next one
        // against a different endpoint.
        now += rng.gen_range(5_000..120_000);
        profile.mark_response_received_at(Tick(now));
        now += rng.gen_range(300..2_000);
        profile.mark_completed_at(Tick(now));

        let reason = if rng.gen_bool(0.8) {
            RetransmissionReason::Moved
        } else {
            RetransmissionReason::Ask
        };
        endpoint_idx = (endpoint_idx + 1) % endpoints.len();
        let retry =
            CommandProfile::for_retransmission(&profile, endpoints[endpoint_idx], reason);
        now += rng.gen_range(100..800);
        attach(&retry, db, name, flags, Tick(now));
        now = advance_to_sent(&retry, rng, now);
        profile = retry;
        hops += 1;
    }

    if rng.gen_bool(0.02) {
        // Timeouts and fire-and-forget commands complete without a response;
        // completion backfills the response milestone.
        now += rng.gen_range(1_000..50_000);
        profile.mark_completed_at(Tick(now));
    } else {
        now += rng.gen_range(5_000..400_000);
        profile.mark_response_received_at(Tick(now));
        now += rng.gen_range(300..3_000);
        profile.mark_completed_at(Tick(now));
    }
}

fn attach(profile: &CommandProfile, db: i32, name: &str, flags: CommandFlags, created: Tick) {
    let descriptor = CommandDescriptor {
        db,
        name: name.to_string(),
        flags,
        created_at: time::OffsetDateTime::now_utc(),
        created_tick: created,
    };
    profile.attach_command(descriptor).unwrap();
}

fn advance_to_sent(profile: &CommandProfile, rng: &mut ChaCha8Rng, mut now: u64) -> u64 {
    now += rng.gen_range(200..2_000);
    profile.mark_enqueued_at(ConnectionKind::Interactive, Tick(now));
    now += rng.gen_range(100..1_500);
    profile.mark_request_sent_at(Tick(now));
    now
}

fn print_summary(profiles: &[Arc<CommandProfile>]) {
    let redirected = profiles
        .iter()
        .filter(|p| p.retransmission_reason().is_some())
        .count();
    let mut elapsed_ns: Vec<u64> = profiles
        .iter()
        .filter_map(|p| p.elapsed())
        .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
        .collect();
    elapsed_ns.sort_unstable();
    let sum: u64 = elapsed_ns.iter().sum();
    let avg = if elapsed_ns.is_empty() {
        0
    } else {
        sum / elapsed_ns.len() as u64
    };

    println!("\nSESSION");
    println!("{:<16} {:>12}", "METRIC", "VALUE");
    println!("{:<16} {:>12}", "attempts", profiles.len());
    println!("{:<16} {:>12}", "redirected", redirected);

    println!("\nELAPSED (creation to completion)");
    println!("{:<16} {:>12}", "STAT", "TIME");
    let stats = [
        ("min", elapsed_ns.first().copied().unwrap_or(0)),
        ("avg", avg),
        ("p50", percentile(&elapsed_ns, 0.5)),
        ("p95", percentile(&elapsed_ns, 0.95)),
        ("max", elapsed_ns.last().copied().unwrap_or(0)),
    ];
    for (label, ns) in stats {
        println!(
            "{:<16} {:>12}",
            label,
            format_duration(clock::ticks_to_duration(ns))
        );
    }
}

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_tracing();

    let endpoints: Vec<SocketAddr> = ENDPOINTS
        .iter()
        .map(|e| e.parse())
        .collect::<Result<_, _>>()?;
    let redirect_rate = cli.redirect_rate.clamp(0.0, 1.0);
    let session = Arc::new(SessionLog::new());

    println!("=== Penumbra Latency Simulation ===");
    println!(
        "threads={} commands={} seed={} redirect_rate={}",
        cli.threads, cli.commands, cli.seed, redirect_rate
    );

    let workers: Vec<_> = (0..cli.threads)
        .map(|worker| {
            let session = Arc::clone(&session);
            let endpoints = endpoints.clone();
            let commands = cli.commands;
            let seed = cli.seed.wrapping_add(worker as u64);
            thread::spawn(move || {
                let mut rng = ChaCha8Rng::seed_from_u64(seed);
                for _ in 0..commands {
                    simulate_command(&mut rng, &session, &endpoints, redirect_rate);
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().expect("worker thread panicked");
    }

    let profiles: Vec<Arc<CommandProfile>> = session.drain().collect();
    print_summary(&profiles);

    if cli.show > 0 {
        println!("\nPROFILES (most recent first)");
        for profile in profiles.iter().take(cli.show) {
            println!("---");
            println!("{profile}");
        }
    }

    if let Some(path) = &cli.json {
        let snapshots: Vec<ProfileSnapshot> =
            profiles.iter().map(|p| ProfileSnapshot::of(p)).collect();
        let file = File::create(path)?;
        serde_json::to_writer_pretty(BufWriter::new(file), &snapshots)?;
        println!("\nwrote {} profiles to {}", snapshots.len(), path.display());
    }

    println!("\n=== Simulation Complete ===");
    Ok(())
}
