// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Headless Noema client.
//! Tails one session (or replays a window of it) and logs what a renderer would draw.

mod settings;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use noema_app_core::config::ConfigService;
use noema_app_core::prefs::{ClientPrefs, PREFS_KEY};
use noema_config_fs::FsConfigStore;
use noema_session_client::ws::WsConnector;
use noema_session_client::{ApiClient, HistorySource};
use noema_sync::{PlaybackMode, SyncSession, VisualSnapshot};
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::settings::{apply_overrides, sync_config, tick_period, Overrides};

const RESYNC_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(author, version, about = "Noema headless session tail")]
struct Args {
    /// Backend HTTP base (e.g. http://127.0.0.1:8000); the stream URL is derived from it
    #[arg(long, env = "NOEMA_API_BASE")]
    api_base: Option<String>,
    /// Session to open
    #[arg(long)]
    session: Option<String>,
    /// List known sessions and exit
    #[arg(long)]
    list: bool,
    /// Print the session's rogue-variable events and exit
    #[arg(long, requires = "session")]
    qrv_events: bool,
    /// Print the phase trace of one decision and exit
    #[arg(long, requires = "session")]
    decision: Option<String>,
    /// Message kind to subscribe to (repeatable; default all)
    #[arg(long = "kind")]
    kinds: Vec<String>,
    /// Replay window start (ms since session start)
    #[arg(long, requires = "replay_to")]
    replay_from: Option<i64>,
    /// Replay window end (ms since session start)
    #[arg(long, requires = "replay_from")]
    replay_to: Option<i64>,
    /// Server-side cap on replayed messages
    #[arg(long)]
    replay_max: Option<u32>,
    /// Replay speed multiplier
    #[arg(long)]
    rate: Option<f64>,
    /// Switch to live tailing once the replay window is exhausted
    #[arg(long)]
    follow: bool,
    /// Builder ticks per second
    #[arg(long)]
    tick_hz: Option<u32>,
    /// Smoothing factor in (0, 1]
    #[arg(long)]
    alpha: Option<f64>,
    /// Keep-alive probe interval in seconds
    #[arg(long)]
    keepalive_secs: Option<u64>,
    /// Silence tolerated before the connection is declared dead, in seconds
    #[arg(long)]
    probe_timeout_secs: Option<u64>,
    /// Log a snapshot summary every N ticks
    #[arg(long, default_value_t = 30)]
    log_every: u64,
    /// Stop after this many ticks
    #[arg(long)]
    max_ticks: Option<u64>,
    /// HTTP request timeout in seconds
    #[arg(long, default_value_t = 10)]
    http_timeout_secs: u64,
    /// Directory holding client-prefs.json (defaults to the platform config dir)
    #[arg(long)]
    config_dir: Option<PathBuf>,
    /// Persist the effective preferences before connecting
    #[arg(long)]
    save_prefs: bool,
}

impl Args {
    fn overrides(&self) -> Overrides {
        Overrides {
            api_base: self.api_base.clone(),
            message_kinds: self.kinds.clone(),
            tick_hz: self.tick_hz,
            alpha: self.alpha,
            playback_rate: self.rate,
            keepalive_secs: self.keepalive_secs,
            probe_timeout_secs: self.probe_timeout_secs,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let prefs = load_prefs(&args)?;
    let history = ApiClient::new(&prefs.api_base, Duration::from_secs(args.http_timeout_secs))
        .context("build http client")?;

    if args.list {
        return list_sessions(&history).await;
    }
    let session_id = args
        .session
        .clone()
        .ok_or_else(|| anyhow!("--session is required unless --list is given"))?;

    if args.qrv_events {
        return log_qrv_events(&history, &session_id).await;
    }
    if let Some(decision_id) = &args.decision {
        return log_decision_trace(&history, &session_id, decision_id).await;
    }

    let connector = WsConnector::new(&prefs.api_base);
    info!(url = %connector.url(), session_id = %session_id, "connecting");
    let config = sync_config(&prefs, args.replay_max)?;
    let mut sync = SyncSession::new(connector, history, config).context("build sync session")?;
    sync.open(&session_id)
        .await
        .with_context(|| format!("open session {session_id}"))?;

    let replaying = match (args.replay_from, args.replay_to) {
        (Some(from), Some(to)) => {
            let frames = sync
                .load_replay(from, to)
                .await
                .context("load replay window")?;
            sync.seek(from);
            sync.play();
            info!(from_ms = from, to_ms = to, frames, "replaying");
            true
        }
        _ => false,
    };

    run(&mut sync, &args, tick_period(&prefs), replaying).await?;
    sync.close().await;
    Ok(())
}

fn load_prefs(args: &Args) -> Result<ClientPrefs> {
    let store = match &args.config_dir {
        Some(dir) => FsConfigStore::with_base(dir),
        None => FsConfigStore::new(),
    }
    .context("open config store")?;
    let config = ConfigService::new(store);
    let stored = config
        .load_or_default::<ClientPrefs>(PREFS_KEY)
        .context("load client prefs")?;
    let prefs = apply_overrides(stored, &args.overrides())?;
    if args.save_prefs {
        config.save(PREFS_KEY, &prefs).context("save client prefs")?;
        info!(dir = %config.store().base().display(), "client prefs saved");
    }
    Ok(prefs)
}

async fn list_sessions<H: HistorySource>(history: &H) -> Result<()> {
    let sessions = history.list_sessions().await.context("list sessions")?;
    info!(count = sessions.len(), "sessions");
    for s in sessions {
        info!(
            session_id = %s.session_id,
            subject_id = %s.subject_id,
            status = %s.status,
            started = %s.started_utc,
            ended = s.ended_utc.as_deref().unwrap_or("-"),
            "session"
        );
    }
    Ok(())
}

async fn log_qrv_events(history: &ApiClient, session_id: &str) -> Result<()> {
    let events = history
        .fetch_qrv_events(session_id)
        .await
        .context("fetch qrv events")?;
    info!(session_id, count = events.len(), "qrv events");
    for ev in events {
        let triggered = ev
            .detection
            .as_ref()
            .and_then(|d| d.get("triggered"))
            .and_then(serde_json::Value::as_bool);
        info!(
            id = %ev.id,
            t_rel_ms = ev.t_rel_ms,
            prompt_id = ev.prompt_id.as_deref().unwrap_or("-"),
            ?triggered,
            "qrv event"
        );
    }
    Ok(())
}

async fn log_decision_trace(
    history: &ApiClient,
    session_id: &str,
    decision_id: &str,
) -> Result<()> {
    let trace = history
        .fetch_decision_trace(session_id, decision_id)
        .await
        .with_context(|| format!("fetch decision {decision_id}"))?;
    info!(
        session_id,
        decision_id,
        phases = trace.phases.len(),
        flips = trace.mufs_events.as_ref().map_or(0, Vec::len),
        rogue = trace.rogue_variable_events.as_ref().map_or(0, Vec::len),
        graph_nodes = trace.mpg_full.as_ref().map_or(0, |g| g.nodes.len()),
        "decision trace"
    );
    for cycle in &trace.phases {
        info!(
            cycle_id = %cycle.cycle_id,
            phase = ?cycle.phase,
            started = %cycle.phase_started_utc,
            ended = cycle.phase_ended_utc.as_deref().unwrap_or("-"),
            "phase"
        );
    }
    Ok(())
}

async fn run(
    sync: &mut SyncSession<WsConnector, ApiClient>,
    args: &Args,
    period: Duration,
    mut replaying: bool,
) -> Result<()> {
    let mut ticker = time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let mut last = Instant::now();
    let mut last_resync: Option<Instant> = None;
    let mut ticks: u64 = 0;
    loop {
        tokio::select! {
            res = &mut shutdown => {
                res.context("install ctrl-c handler")?;
                info!("interrupted");
                return Ok(());
            }
            now = ticker.tick() => {
                let snapshot = sync.tick(now.saturating_duration_since(last));
                last = now;
                ticks += 1;
                if args.log_every > 0 && ticks.is_multiple_of(args.log_every) {
                    log_snapshot(&snapshot, sync.playback().mode());
                }
            }
        }

        if let Some(reason) = sync.close_reason() {
            warn!(%reason, stats = ?sync.stats(), "session ended");
            return Ok(());
        }
        if sync.needs_resync()
            && last_resync.is_none_or(|at| at.elapsed() >= RESYNC_BACKOFF)
        {
            last_resync = Some(Instant::now());
            if let Err(err) = sync.resync().await {
                warn!(%err, "resync failed");
            }
        }
        if replaying && !sync.playback().is_playing() {
            info!(cursor_ms = sync.playback().cursor_ms(), "replay window exhausted");
            if !args.follow {
                return Ok(());
            }
            sync.resume_live();
            replaying = false;
        }
        if args.max_ticks.is_some_and(|max| ticks >= max) {
            info!(ticks, stats = ?sync.stats(), "tick limit reached");
            return Ok(());
        }
    }
}

fn log_snapshot(snapshot: &VisualSnapshot, mode: PlaybackMode) {
    info!(
        tick = snapshot.tick,
        ?mode,
        time_ms = snapshot.time_ms,
        nodes = snapshot.nodes.len(),
        edges = snapshot.edges.len(),
        coherence = format_args!("{:.3}", snapshot.coherence),
        somatic = format_args!("{:.3}", snapshot.somatic.activity),
        symbolic = format_args!("{:.3}", snapshot.symbolic.uncertainty),
        noetic = format_args!("{:.3}", snapshot.noetic.activity),
        phase = ?snapshot.phase.map(|p| p.phase),
        highlighted = snapshot.highlighted.len(),
        flipped = snapshot.flipped.len(),
        "snapshot"
    );
}
