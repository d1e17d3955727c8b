use anyhow::{Context, Result};
use clap::Parser;
use ioprobe::cli::Cli;
use ioprobe::clock::ManualClock;
use ioprobe::config::{ConfigKey, Env};
use ioprobe::detector::DetectorKind;
use ioprobe::engine::Engine;
use ioprobe::event::{self, IoEvent};
use ioprobe::issue::Issue;
use ioprobe::report;
use std::fs::File;
use std::io::{self, BufReader, Write};
use std::path::Path;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Upper bound for the worker to catch up after a close
const IDLE_TIMEOUT: Duration = Duration::from_secs(10);

/// Initialize tracing subscriber on stderr: warnings always, everything with --debug
fn init_tracing(debug: bool) {
    let level = if debug {
        tracing::Level::TRACE
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_writer(std::io::stderr)
        .init();
}

fn load_env(cli: &Cli) -> Result<Env> {
    let mut env = match &cli.config {
        Some(path) => Env::from_toml_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => Env::default(),
    };
    for &(key, value) in &cli.overrides {
        env.set(key, value)
            .with_context(|| format!("Invalid --set {}={}", key.name(), value))?;
    }
    if let Some(tid) = cli.main_thread {
        env.set(ConfigKey::MainThreadId, tid)?;
    }
    Ok(env)
}

fn load_trace(path: &Path) -> Result<Vec<IoEvent>> {
    if path == Path::new("-") {
        return event::read_trace(io::stdin().lock());
    }
    let file =
        File::open(path).with_context(|| format!("Failed to open trace {}", path.display()))?;
    event::read_trace(BufReader::new(file))
}

fn main() -> Result<()> {
    let args = Cli::parse();

    init_tracing(args.debug);

    let env = load_env(&args)?;

    if args.dump_config {
        print!("{}", env.to_toml_string()?);
        return Ok(());
    }

    let trace_path = args.trace.as_deref().context("No trace file given")?;
    let events = load_trace(trace_path)?;
    tracing::debug!(events = events.len(), "trace loaded");

    let kinds = args.detector_kinds();
    if kinds.contains(&DetectorKind::MainThread) && env.main_thread_id.is_none() {
        // The fallback is this process's pid, which never appears in a recorded trace
        tracing::warn!(
            "no main thread id configured; main-thread detection will not match the trace \
             (use --main-thread or --set main_thread_id=TID)"
        );
    }

    // Replay runs on the trace's own timeline
    let clock = Arc::new(ManualClock::new(0));
    let mut engine = Engine::with_clock(env, clock.clone())?;
    for kind in kinds {
        engine.register_detector(kind)?;
    }

    let (tx, rx) = mpsc::channel::<Vec<Issue>>();
    engine.set_publish_callback(move |issues| {
        let _ = tx.send(issues.to_vec());
    })?;
    engine.start()?;

    for event in &events {
        if let Some(at_us) = event.at_us() {
            clock.set_us(at_us);
        }
        engine.dispatch(event);

        // Detectors read the clock, so analysis must finish before time moves on
        if matches!(event, IoEvent::Close { .. }) && !engine.wait_idle(IDLE_TIMEOUT) {
            anyhow::bail!("Analysis worker did not catch up within {:?}", IDLE_TIMEOUT);
        }
    }

    let stats = engine.stats();
    if engine.live_descriptors() > 0 {
        tracing::warn!(
            open = engine.live_descriptors(),
            "trace ended with descriptors still open; they were not analyzed"
        );
    }
    // Joins the worker, which drops the callback and closes the channel
    engine.shutdown();
    drop(engine);

    let stdout = io::stdout();
    let mut out = stdout.lock();
    for issue in rx.iter().flatten() {
        report::write_issue(&mut out, &issue, args.format)?;
    }
    if args.summary {
        report::write_summary(&mut out, &stats, args.format)?;
    }
    out.flush()?;

    Ok(())
}
