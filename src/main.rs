//! # arrows
//!
//! Experiment server binary: loads settings, installs telemetry and metrics,
//! seeds scheduled sessions and serves until Ctrl-C.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use arrows_core::{
    Orientation, Position, ResearcherId, Scenario, Session, SessionId, SubjectId, SubjectRole,
    SubjectsCouple, SystemClock, Trial, TrialList,
};
use arrows_server::{ArrowsServer, Settings};
use clap::Parser;
use tracing::info;

/// Session id of the built-in demo session.
const DEMO_SESSION_ID: &str = "ddf5ddfa-0990-4c30-9c4c-db2214ed06c1";

/// Live two-subject arrows experiment server.
#[derive(Parser, Debug)]
#[command(name = "arrows", about = "Live two-subject arrows experiment server")]
struct Cli {
    /// JSON settings file (defaults to `arrows.json` if present).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Seed the four-trial demo session.
    #[arg(long)]
    demo: bool,

    /// Researcher allowed to observe the demo session (random if omitted).
    #[arg(long, requires = "demo")]
    demo_researcher: Option<ResearcherId>,
}

fn demo_session(researcher: ResearcherId) -> Result<Session> {
    use Orientation::{Left, Right};

    let rows = [
        [Left, Right, Left],
        [Right, Right, Left],
        [Left, Right, Right],
        [Left, Left, Right],
    ];
    let trials = rows
        .into_iter()
        .map(|cues| Trial::new(Position::Top, cues.to_vec()))
        .collect::<Result<Vec<_>, _>>()?;
    let id: SessionId = DEMO_SESSION_ID.parse().context("Invalid demo session id")?;

    Ok(Session::new(
        id,
        Scenario::new(TrialList::try_from(trials)?),
        SubjectsCouple::new(SubjectId::new(), SubjectId::new()),
        researcher,
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::load(cli.config.as_deref()).context("Failed to load settings")?;
    if let Some(host) = cli.host {
        settings.server.host = host;
    }
    if let Some(port) = cli.port {
        settings.server.port = port;
    }

    arrows_telemetry::init_telemetry(&settings.telemetry)
        .context("Failed to initialise telemetry")?;
    let metrics = arrows_server::metrics::install_recorder()
        .context("Failed to install metrics recorder")?;

    let schedule = std::mem::take(&mut settings.schedule);
    let server = ArrowsServer::new(settings, Arc::new(SystemClock)).with_metrics(metrics);

    for scheduled in schedule {
        let _ = server.registry().persist(scheduled.into_session());
    }
    if cli.demo {
        let researcher = cli.demo_researcher.unwrap_or_default();
        let session = demo_session(researcher)?;
        let subjects = session.subjects();
        let _ = server.registry().persist(session);
        info!(
            session_id = DEMO_SESSION_ID,
            %researcher,
            subject_one = %subjects.get(SubjectRole::One),
            subject_two = %subjects.get(SubjectRole::Two),
            "demo session seeded"
        );
    }

    let sessions = server.registry().len();
    let handle = server.start().await.context("Failed to start server")?;
    info!(addr = %handle.local_addr(), sessions, "arrows server ready");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl+c")?;

    handle.shutdown().await;
    Ok(())
}
