use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use owo_colors::OwoColorize;
use tandem_core::clock::SystemClock;
use tandem_core::config::TandemConfig;
use tandem_core::history::{EventAction, HistoryLogger, SessionEvent};
use tandem_core::model::*;
use tandem_core::service::SessionService;
use tandem_core::storage::{create_backend, Storage, StorageBackend};
use tandem_core::sweeper::SweepReport;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "tandem", about = "Tandem: mentoring session lifecycle", version)]
enum Cli {
    /// Run the expiry sweep once (or keep running with --watch)
    Sweep {
        /// Keep sweeping on the configured interval until Ctrl+C
        #[arg(long)]
        watch: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List sessions for a participant
    List {
        /// Participant ID
        participant_id: String,
        /// Side the participant acts for (mentor, learner)
        #[arg(short, long, default_value = "learner")]
        role: String,
        /// Filter by status (scheduled, ongoing, completed, cancelled, expired)
        #[arg(short, long)]
        status: Option<String>,
        /// Maximum number of sessions
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show a single session
    Show {
        /// Session ID
        id: String,
        /// Participant ID to view as
        #[arg(long = "as")]
        participant_id: String,
        /// Side the participant acts for (mentor, learner)
        #[arg(short, long, default_value = "learner")]
        role: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show lifecycle history (all sessions or a single one)
    History {
        /// Session ID (omit for recent events across all sessions)
        id: Option<String>,
        /// Maximum number of events
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Create or update the engagement that links a mentor and a learner
    Engagement {
        /// Project ID
        project_id: String,
        /// Mentor ID
        #[arg(long)]
        mentor: String,
        /// Learner ID
        #[arg(long)]
        learner: String,
        /// Project title
        #[arg(long)]
        title: Option<String>,
        /// Engagement status (open, in-progress, completed, cancelled)
        #[arg(long, default_value = "in-progress")]
        status: String,
    },
    /// Show a participant's session counters
    Counters {
        /// Participant ID
        participant_id: String,
        /// Side the counters belong to (mentor, learner)
        #[arg(short, long, default_value = "learner")]
        role: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show store, sweeper and history status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let cli = Cli::parse();
    let config = TandemConfig::load(Some(&std::env::current_dir()?))
        .unwrap_or_else(|_| TandemConfig::default_config());

    run(cli, &config).await
}

async fn run(cli: Cli, config: &TandemConfig) -> Result<()> {
    match cli {
        Cli::History { id, limit, json } => {
            let history = HistoryLogger::from_config(&config.history);
            cmd_history(&history, id, limit, json)
        }
        Cli::Sweep { watch, json } => {
            let service = make_service(config)?;
            cmd_sweep(&service, config, watch, json).await
        }
        Cli::List {
            participant_id,
            role,
            status,
            limit,
            json,
        } => {
            let service = make_service(config)?;
            let actor = parse_actor(participant_id, &role)?;
            let status = status
                .map(|s| s.parse::<SessionStatus>())
                .transpose()
                .map_err(anyhow::Error::msg)?;
            cmd_list(&service, &actor, status, limit, json).await
        }
        Cli::Show {
            id,
            participant_id,
            role,
            json,
        } => {
            let service = make_service(config)?;
            let actor = parse_actor(participant_id, &role)?;
            let id = Uuid::parse_str(&id).context("invalid session ID")?;
            cmd_show(&service, &actor, id, json).await
        }
        Cli::Engagement {
            project_id,
            mentor,
            learner,
            title,
            status,
        } => {
            let service = make_service(config)?;
            let status: EngagementStatus = status.parse().map_err(anyhow::Error::msg)?;
            let engagement = Engagement::new(project_id, mentor, learner)
                .with_title(title.unwrap_or_default())
                .with_status(status);
            cmd_engagement(&service, engagement).await
        }
        Cli::Counters {
            participant_id,
            role,
            json,
        } => {
            let service = make_service(config)?;
            let role: Role = role.parse().map_err(anyhow::Error::msg)?;
            cmd_counters(&service, &participant_id, role, json).await
        }
        Cli::Status => {
            let service = make_service(config)?;
            cmd_status(&service, config).await
        }
    }
}

fn make_service(config: &TandemConfig) -> Result<SessionService<Storage>> {
    let storage = create_backend(config).context("failed to open session store")?;
    Ok(SessionService::new(
        Arc::new(storage),
        Arc::new(SystemClock),
        Arc::new(HistoryLogger::from_config(&config.history)),
        &config.sessions,
    ))
}

fn parse_actor(id: String, role: &str) -> Result<Actor> {
    let role: Role = role.parse().map_err(anyhow::Error::msg)?;
    Ok(Actor { id, role })
}

fn colored_status(status: SessionStatus) -> String {
    let s = status.to_string();
    match status {
        SessionStatus::Scheduled | SessionStatus::Rescheduled => s.cyan().to_string(),
        SessionStatus::Ongoing => s.yellow().to_string(),
        SessionStatus::Completed => s.green().to_string(),
        SessionStatus::Cancelled => s.dimmed().to_string(),
        SessionStatus::Expired => s.red().to_string(),
    }
}

fn presence(attendance: &Attendance) -> String {
    match attendance.attended_at {
        Some(at) if attendance.present => format!("joined {}", at.format("%H:%M:%S"))
            .green()
            .to_string(),
        _ => "absent".dimmed().to_string(),
    }
}

// -- Sweep --

async fn cmd_sweep(
    service: &SessionService<Storage>,
    config: &TandemConfig,
    watch: bool,
    json: bool,
) -> Result<()> {
    if !watch {
        let report = service.sweep().await.context("sweep failed")?;
        print_sweep_report(&report, json)?;
        return Ok(());
    }

    let every = std::time::Duration::from_secs(config.sweeper.interval_secs);
    println!(
        "{} every {}s {}",
        "Sweeping".bold(),
        config.sweeper.interval_secs,
        "(Ctrl+C to stop)".dimmed()
    );

    let cancel = CancellationToken::new();
    let handle = service.sweeper().clone().spawn(every, cancel.clone());
    tokio::signal::ctrl_c()
        .await
        .context("failed to install Ctrl+C handler")?;
    cancel.cancel();
    handle.await.context("sweeper task panicked")?;
    println!("{}", "Sweeper stopped.".dimmed());
    Ok(())
}

fn print_sweep_report(report: &SweepReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }
    if report.skipped {
        println!("{}", "Another sweep is already running; skipped.".yellow());
        return Ok(());
    }
    if report.total() == 0 && report.stale == 0 && report.errors == 0 {
        println!("{}", "Nothing to sweep.".dimmed());
        return Ok(());
    }

    println!("{}", "Sweep complete".bold());
    println!("  {}   {}", "Started:".dimmed(), report.started.to_string().yellow());
    println!("  {} {}", "Completed:".dimmed(), report.completed.to_string().green());
    println!("  {}   {}", "Expired:".dimmed(), report.expired.to_string().red());
    if report.stale > 0 {
        println!("  {}     {}", "Stale:".dimmed(), report.stale);
    }
    if report.errors > 0 {
        println!("  {}    {}", "Errors:".dimmed(), report.errors.to_string().red());
    }
    Ok(())
}

// -- Sessions --

async fn cmd_list(
    service: &SessionService<Storage>,
    actor: &Actor,
    status: Option<SessionStatus>,
    limit: usize,
    json: bool,
) -> Result<()> {
    let sessions = service
        .list_for(actor, status, Some(limit))
        .await
        .context("failed to list sessions")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&sessions)?);
        return Ok(());
    }
    if sessions.is_empty() {
        println!("{}", "No sessions found.".dimmed());
        return Ok(());
    }

    println!(
        "{:<8} {:<17} {:<11} {:<12} {}",
        "ID".dimmed(),
        "Scheduled".dimmed(),
        "Status".dimmed(),
        "Type".dimmed(),
        "Project".dimmed()
    );
    for session in &sessions {
        let short_id = &session.id.to_string()[..8];
        println!(
            "{:<8} {:<17} {:<20} {:<12} {}",
            short_id.cyan(),
            session.scheduled_at.format("%Y-%m-%d %H:%M"),
            colored_status(session.status),
            session.session_type,
            session.project_id
        );
    }
    println!("\n{} session(s)", sessions.len());
    Ok(())
}

async fn cmd_show(
    service: &SessionService<Storage>,
    actor: &Actor,
    id: Uuid,
    json: bool,
) -> Result<()> {
    let session = service
        .get(actor, id)
        .await
        .context("failed to load session")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&session)?);
        return Ok(());
    }

    println!("{}", format!("Session {}", session.id).bold());
    println!("  {}    {}", "Status:".dimmed(), colored_status(session.status));
    println!(
        "  {} {} ({} min)",
        "Scheduled:".dimmed(),
        session.scheduled_at.format("%Y-%m-%d %H:%M %Z"),
        session.duration_minutes
    );
    println!("  {}      {}", "Type:".dimmed(), session.session_type);
    println!("  {}   {}", "Project:".dimmed(), session.project_id);
    println!(
        "  {}    {} ({})",
        "Mentor:".dimmed(),
        session.mentor_id,
        presence(&session.mentor_attendance)
    );
    println!(
        "  {}   {} ({})",
        "Learner:".dimmed(),
        session.learner_id,
        presence(&session.learner_attendance)
    );
    if let Some(ref link) = session.meeting_link {
        println!("  {}   {}", "Meeting:".dimmed(), link.cyan());
    }
    if let Some(ref link) = session.recording_link {
        println!("  {} {}", "Recording:".dimmed(), link.cyan());
    }
    for (label, reason) in [
        ("Mentor note:", &session.mentor_reason),
        ("Learner note:", &session.learner_reason),
        ("Expired:", &session.expire_reason),
    ] {
        if let Some(reason) = reason {
            println!("  {} {}", label.dimmed(), reason.yellow());
        }
    }
    Ok(())
}

// -- History --

fn cmd_history(
    history: &HistoryLogger,
    id: Option<String>,
    limit: usize,
    json: bool,
) -> Result<()> {
    let events: Vec<SessionEvent> = if let Some(ref id_str) = id {
        let session_id = Uuid::parse_str(id_str).context("invalid session ID")?;
        history.history_for(session_id)
    } else {
        history.recent(limit)
    };

    if events.is_empty() {
        println!("{}", "No history events found.".dimmed());
        return Ok(());
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&events)?);
        return Ok(());
    }

    println!(
        "{:<20} {:<18} {:<8} {:<24} {}",
        "Timestamp".dimmed(),
        "Action".dimmed(),
        "Session".dimmed(),
        "Actor".dimmed(),
        "Detail".dimmed()
    );
    for event in events.iter().take(limit) {
        let short_id = &event.session_id.to_string()[..8];
        let action_str = event.action.to_string();
        let action_colored = match event.action {
            EventAction::Created | EventAction::Completed => action_str.green().to_string(),
            EventAction::Started | EventAction::Rescheduled => action_str.yellow().to_string(),
            EventAction::Expired | EventAction::Deleted => action_str.red().to_string(),
            EventAction::Cancelled => action_str.dimmed().to_string(),
            EventAction::AttendanceMarked
            | EventAction::RecordingAdded
            | EventAction::AbsenceReason => action_str.cyan().to_string(),
        };
        print!(
            "{:<20} {:<27} {:<8} {:<24}",
            event
                .timestamp
                .format("%Y-%m-%d %H:%M:%S")
                .to_string()
                .dimmed(),
            action_colored,
            short_id.cyan(),
            event.actor,
        );
        if let (Some(from), Some(to)) = (event.from_status, event.to_status) {
            print!(" {} -> {}", from.to_string().dimmed(), to.to_string().green());
        }
        if let Some(ref detail) = event.detail {
            print!("  {}", detail.dimmed());
        }
        println!();
    }
    Ok(())
}

// -- Engagements & counters --

async fn cmd_engagement(service: &SessionService<Storage>, engagement: Engagement) -> Result<()> {
    let saved = service
        .upsert_engagement(engagement)
        .await
        .context("failed to save engagement")?;
    println!(
        "{} {} ({} / {}) {}",
        "Saved engagement".green(),
        saved.project_id.bold(),
        saved.mentor_id,
        saved.learner_id,
        format!("[{}]", saved.status).dimmed()
    );
    Ok(())
}

async fn cmd_counters(
    service: &SessionService<Storage>,
    participant_id: &str,
    role: Role,
    json: bool,
) -> Result<()> {
    let counters = service
        .counters(participant_id, role)
        .await
        .context("failed to load counters")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&counters)?);
        return Ok(());
    }

    println!("{}", format!("{} ({role})", counters.participant_id).bold());
    println!("  {}  {}", "Scheduled:".dimmed(), counters.sessions_scheduled.to_string().cyan());
    println!("  {}  {}", "Completed:".dimmed(), counters.sessions_completed.to_string().green());
    println!("  {}     {}", "Booked:".dimmed(), counters.sessions_booked);
    if role == Role::Mentor {
        println!(
            "  {}   {:.2}",
            "Earnings:".dimmed(),
            counters.earnings_cents as f64 / 100.0
        );
    }
    Ok(())
}

// -- Status --

async fn cmd_status(service: &SessionService<Storage>, config: &TandemConfig) -> Result<()> {
    let version = env!("CARGO_PKG_VERSION");
    println!("{}", format!("Tandem Status v{version}").bold());
    println!("  {}    {}", "Version:".dimmed(), version);

    let storage = service.engine().storage();
    println!("  {}    {}", "Storage:".dimmed(), storage.backend_name());
    if let Some(schema_ver) = storage.schema_info() {
        println!("  {}   schema v{schema_ver}", "Database:".dimmed());
    }

    match storage.list_sessions(&SessionQuery::default()).await {
        Ok(sessions) => {
            let mut by_status: BTreeMap<String, usize> = BTreeMap::new();
            for session in &sessions {
                *by_status.entry(session.status.to_string()).or_default() += 1;
            }
            println!(
                "  {}   {}",
                "Sessions:".dimmed(),
                sessions.len().to_string().cyan()
            );
            for (status, count) in &by_status {
                println!("    {:<12} {}", status.dimmed(), count);
            }
        }
        Err(e) => println!("  {}   {} - {e}", "Sessions:".dimmed(), "unknown".yellow()),
    }

    let sweeper = if config.sweeper.enabled {
        format!("every {}s", config.sweeper.interval_secs)
            .green()
            .to_string()
    } else {
        "disabled".red().to_string()
    };
    println!("  {}    {}", "Sweeper:".dimmed(), sweeper);
    println!(
        "  {}     {} min after start",
        "Window:".dimmed(),
        config.sessions.attendance_window_minutes
    );

    let history = HistoryLogger::from_config(&config.history);
    if history.is_enabled() {
        println!(
            "  {}    {}",
            "History:".dimmed(),
            history.path().display().to_string().cyan()
        );
    } else {
        println!("  {}    {}", "History:".dimmed(), "disabled".red());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_list() {
        let cli = Cli::try_parse_from([
            "tandem", "list", "mentor-ada", "--role", "mentor", "--status", "completed", "--json",
        ])
        .unwrap();
        match cli {
            Cli::List {
                participant_id,
                role,
                status,
                limit,
                json,
            } => {
                assert_eq!(participant_id, "mentor-ada");
                assert_eq!(role, "mentor");
                assert_eq!(status.as_deref(), Some("completed"));
                assert_eq!(limit, 20);
                assert!(json);
            }
            _ => panic!("expected list"),
        }
    }

    #[test]
    fn test_parse_show_as() {
        let cli = Cli::try_parse_from(["tandem", "show", "abc", "--as", "learner-lin"]).unwrap();
        assert!(matches!(
            cli,
            Cli::Show { ref participant_id, ref role, .. }
                if participant_id == "learner-lin" && role == "learner"
        ));
    }

    #[test]
    fn test_parse_engagement_defaults_in_progress() {
        let cli = Cli::try_parse_from([
            "tandem", "engagement", "p1", "--mentor", "m1", "--learner", "l1",
        ])
        .unwrap();
        match cli {
            Cli::Engagement { status, title, .. } => {
                assert_eq!(status, "in-progress");
                assert!(title.is_none());
                assert!(status.parse::<EngagementStatus>().is_ok());
            }
            _ => panic!("expected engagement"),
        }
    }

    #[test]
    fn test_parse_actor_rejects_unknown_role() {
        assert!(parse_actor("x".into(), "admin").is_err());
        let actor = parse_actor("x".into(), "Mentor").unwrap();
        assert_eq!(actor, Actor::mentor("x"));
    }
}
