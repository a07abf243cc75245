//! Badgelink - simulated meeting demo
//!
//! Runs the full pipeline against the in-memory badge simulator: connection
//! lifecycle, badge dialogue, chunk ingestion, and speaking-time analytics,
//! then prints per-member talk intervals and the arbitrated turn sequence.

use anyhow::Result;
use badgelink::analytics::GroupAnalyzer;
use badgelink::config::Config;
use badgelink::dialogue::BadgeDialogue;
use badgelink::link::{ConnectionLock, DeviceLink, LinkEvent};
use badgelink::sim::SimTransport;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

/// Sample spacing used by the simulated badges (ms)
const SAMPLE_INTERVAL_MS: u16 = 50;

/// Samples per simulated chunk (5 s at 50 ms)
const CHUNK_SAMPLES: usize = 100;

/// Names given to simulated roster members, in registration order
const MEMBER_NAMES: &[&str] = &["alice", "bob", "carol", "dave", "erin", "frank"];

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("badgelink=info".parse().unwrap()),
        )
        .init();

    // Parse command line arguments
    let args: Vec<String> = std::env::args().collect();
    let mut members = 3usize;
    let mut duration_secs = 60u32;
    let mut increment_ms = 500i64;
    let mut config = Config::default();
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "--version" | "-v" => {
                println!("badgelink {}", badgelink::VERSION);
                return Ok(());
            }
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            "--members" | "-m" => {
                if i + 1 >= args.len() {
                    eprintln!("Error: --members requires a count");
                    return Ok(());
                }
                match args[i + 1].parse::<usize>() {
                    Ok(n) if (1..=MEMBER_NAMES.len()).contains(&n) => members = n,
                    _ => {
                        eprintln!(
                            "Error: member count must be 1-{}",
                            MEMBER_NAMES.len()
                        );
                        return Ok(());
                    }
                }
                i += 2;
                continue;
            }
            "--duration" | "-d" => {
                if i + 1 >= args.len() {
                    eprintln!("Error: --duration requires seconds");
                    return Ok(());
                }
                duration_secs = match args[i + 1].parse() {
                    Ok(n) => n,
                    Err(_) => {
                        eprintln!("Error: invalid duration: {}", args[i + 1]);
                        return Ok(());
                    }
                };
                i += 2;
                continue;
            }
            "--increment" => {
                if i + 1 >= args.len() {
                    eprintln!("Error: --increment requires milliseconds");
                    return Ok(());
                }
                increment_ms = match args[i + 1].parse() {
                    Ok(n) => n,
                    Err(_) => {
                        eprintln!("Error: invalid increment: {}", args[i + 1]);
                        return Ok(());
                    }
                };
                i += 2;
                continue;
            }
            "--config" | "-c" => {
                if i + 1 >= args.len() {
                    eprintln!("Error: --config requires a path");
                    return Ok(());
                }
                config = Config::load(&args[i + 1])?;
                i += 2;
                continue;
            }
            arg => {
                eprintln!("Unknown argument: {}", arg);
                print_help();
                return Ok(());
            }
        }
    }

    println!("Badgelink v{} - simulated meeting", badgelink::VERSION);
    println!(
        "Members: {} | Duration: {}s | Arbitration increment: {}ms",
        members, duration_secs, increment_ms
    );
    println!();

    // the fresh-session data request must reach back past the whole meeting
    config.dialogue.resync_lookback_secs = duration_secs + 5;

    let names: Vec<&str> = MEMBER_NAMES[..members].to_vec();
    let now_ms = Utc::now().timestamp_millis();
    let window_start_ms = now_ms - duration_secs as i64 * 1000;

    // Build the simulated roster: each badge holds the meeting's chunks,
    // with members taking turns speaking.
    let sim = Arc::new(SimTransport::new());
    for (index, name) in names.iter().enumerate() {
        sim.add_badge(*name, 2.6 + index as f32 * 0.1);
        load_meeting(&sim, name, index, members, window_start_ms, duration_secs);
    }

    // One session per badge, serialized by the shared connection lock
    let lock = ConnectionLock::new();
    let mut group = GroupAnalyzer::new(config.analytics.clone());
    for name in &names {
        group.add_member(*name);
    }

    for name in &names {
        let (link, mut events) = DeviceLink::new(
            *name,
            Arc::clone(&sim) as Arc<dyn badgelink::transport::Transport>,
            lock.clone(),
            config.link.clone(),
        );
        let (mut dialogue, mut chunks) =
            BadgeDialogue::new(link.clone(), config.dialogue.clone());

        link.open_dialogue();
        let session = async {
            while let Some(event) = events.recv().await {
                let done = event == LinkEvent::Disconnected;
                dialogue.handle_event(event).await;
                if done {
                    break;
                }
            }
        };
        if tokio::time::timeout(Duration::from_secs(30), session)
            .await
            .is_err()
        {
            eprintln!("Warning: session with {} timed out", name);
            link.close().await;
        }

        let mut received = 0usize;
        let mut accepted = 0usize;
        while let Ok(chunk) = chunks.try_recv() {
            received += 1;
            accepted += group.ingest_chunk(name, &chunk);
        }
        println!(
            "{:8} | {:2} chunks | {:4} samples ingested",
            name, received, accepted
        );
    }

    println!();
    println!("Talk intervals");
    println!("────────────────────────────────────────");
    for name in &names {
        let intervals = group.talk_intervals(name, window_start_ms, now_ms);
        let total_ms: i64 = intervals.iter().map(|iv| iv.duration_ms()).sum();
        println!(
            "{:8} | {:4.1}s speaking in {} interval(s)",
            name,
            total_ms as f64 / 1000.0,
            intervals.len()
        );
        for interval in &intervals {
            println!(
                "         | +{:5.1}s .. +{:5.1}s ({:4.1}s)",
                (interval.start_ms - window_start_ms) as f64 / 1000.0,
                (interval.end_ms - window_start_ms) as f64 / 1000.0,
                interval.duration_ms() as f64 / 1000.0
            );
        }
    }

    println!();
    println!("Turn sequence ({}ms increments)", increment_ms);
    println!("────────────────────────────────────────");
    let turns = group.arbitrate(window_start_ms, now_ms, increment_ms);
    for turn in &turns {
        println!(
            "+{:5.1}s  {:8} {:4.1}s",
            (turn.start_ms - window_start_ms) as f64 / 1000.0,
            turn.member,
            turn.duration_ms() as f64 / 1000.0
        );
    }

    Ok(())
}

fn print_help() {
    println!("Usage: badgelink [OPTIONS]");
    println!();
    println!("Options:");
    println!("  -m, --members N       Simulated roster size (1-6, default 3)");
    println!("  -d, --duration SECS   Simulated meeting length (default 60)");
    println!("      --increment MS    Arbitration increment (default 500)");
    println!("  -c, --config PATH     JSON config file");
    println!("  -v, --version         Show version");
    println!("  -h, --help            Show this help");
}

/// Pre-load one member's badge with a meeting where members speak in
/// round-robin turns. Volume is loud pseudo-noise during the member's own
/// turns and near-quiet otherwise.
fn load_meeting(
    sim: &SimTransport,
    name: &str,
    member_index: usize,
    member_count: usize,
    window_start_ms: i64,
    duration_secs: u32,
) {
    let chunk_span_ms = CHUNK_SAMPLES as i64 * SAMPLE_INTERVAL_MS as i64;
    let chunk_count = (duration_secs as i64 * 1000) / chunk_span_ms;
    let mut noise = 0x2545_F491u64.wrapping_add(member_index as u64);

    for c in 0..chunk_count {
        let chunk_start_ms = window_start_ms + c * chunk_span_ms;
        let mut samples = Vec::with_capacity(CHUNK_SAMPLES);
        for s in 0..CHUNK_SAMPLES {
            let at_ms = chunk_start_ms + s as i64 * SAMPLE_INTERVAL_MS as i64;
            // 5-second turns rotating through the roster
            let turn = ((at_ms - window_start_ms) / 5000) as usize % member_count;
            noise = noise
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            let jitter = (noise >> 59) as u8; // 0-31
            let volume = if turn == member_index {
                30 + jitter / 2
            } else {
                2 + jitter / 16
            };
            samples.push(volume);
        }
        sim.load_chunk(
            name,
            (chunk_start_ms / 1000) as u32,
            (chunk_start_ms % 1000) as u16,
            SAMPLE_INTERVAL_MS,
            samples,
        );
    }
}
