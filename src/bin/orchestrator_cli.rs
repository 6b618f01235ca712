use anyhow::{bail, Context, Result};
use std::env;
use tokio::sync::broadcast::{self, error::RecvError};

use media_orchestrator::core::models::{format_bytes, Discovery, DownloadSession, SessionEvent};
use media_orchestrator::core::registry::RecentEntry;
use media_orchestrator::core::transport::ProgressReport;
use media_orchestrator::utils::logging::init_tracing;
use media_orchestrator::{MediaOrchestrator, Reachability};

const USAGE: &str = "Usage: orchestrator-cli <command>

Commands:
  status                      Check the backend and print its health
  formats <url>               List the formats offered for a media page
  download <url> <format_id>  Download one format and follow its progress
  recent [limit]              Show recent downloads
  set-endpoint <url>          Change and persist the backend endpoint
  delete <name>               Delete a file on the backend";

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().skip(1).collect();

    if args.is_empty() {
        eprintln!("{USAGE}");
        std::process::exit(1);
    }

    if let Err(error) = run(&args).await {
        eprintln!("Error: {error:#}");
        std::process::exit(1);
    }
}

async fn run(args: &[String]) -> Result<()> {
    let orchestrator = MediaOrchestrator::load()?;
    init_tracing(Some(&orchestrator.config().advanced.log_level));

    let arg = |index: usize, name: &str| -> Result<String> {
        args.get(index)
            .cloned()
            .with_context(|| format!("missing <{name}>\n\n{USAGE}"))
    };

    match args[0].as_str() {
        "status" => status(&orchestrator).await,
        "formats" => formats(&orchestrator, &arg(1, "url")?).await,
        "download" => download(&orchestrator, &arg(1, "url")?, &arg(2, "format_id")?).await,
        "recent" => {
            let limit = args
                .get(1)
                .and_then(|value| value.parse::<usize>().ok())
                .unwrap_or(orchestrator.config().history.capacity);
            recent(&orchestrator, limit).await;
            Ok(())
        }
        "set-endpoint" => {
            let snapshot = orchestrator.set_endpoint(&arg(1, "url")?)?;
            println!("Endpoint set to {}", snapshot.url);
            Ok(())
        }
        "delete" => {
            let name = arg(1, "name")?;
            let report = orchestrator.delete_server_file(&name).await?;
            println!(
                "{}",
                report.message.unwrap_or_else(|| format!("Deleted {name}"))
            );
            Ok(())
        }
        other => bail!("unknown command '{other}'\n\n{USAGE}"),
    }
}

async fn status(orchestrator: &MediaOrchestrator) -> Result<()> {
    let endpoint = orchestrator.endpoint();
    println!("Endpoint: {}", endpoint.url);

    match orchestrator.check_backend().await {
        Reachability::Reachable => println!("Backend: reachable"),
        Reachability::Unreachable(reason) => {
            println!("Backend: unreachable ({reason})");
            return Ok(());
        }
    }

    match orchestrator.health().await {
        Ok(health) => {
            println!("Status: {}", health.status);
            if let Some(dir) = health.download_dir {
                println!("Download dir: {dir}");
            }
            if let Some(free) = health.free_space_gb {
                println!("Free space: {free:.1} GB");
            }
            if let Some(count) = health.files_count {
                println!("Files: {count}");
            }
            if let Some(active) = health.active_downloads {
                println!("Active downloads: {active}");
            }
        }
        Err(error) => println!("Health: unavailable ({error})"),
    }
    Ok(())
}

async fn formats(orchestrator: &MediaOrchestrator, url: &str) -> Result<()> {
    match orchestrator.discover(url).await? {
        Discovery::Available(catalog) => {
            println!("Title: {}", catalog.title);
            println!("Video formats:");
            for entry in &catalog.video_formats {
                println!("  {}", entry.label());
            }
            println!("Audio formats:");
            for entry in &catalog.audio_formats {
                println!("  {}", entry.label());
            }
        }
        Discovery::NoFormats { title, .. } => {
            println!("No downloadable formats for '{title}'");
        }
    }
    Ok(())
}

async fn download(orchestrator: &MediaOrchestrator, url: &str, format_id: &str) -> Result<()> {
    let active = orchestrator.begin_download(url, format_id).await?;
    let events = active.events;
    println!("Session {}", active.handle.id());

    let printer = tokio::spawn(follow_events(events, |line| println!("{line}")));

    let handle = active.handle.clone();
    let session = tokio::select! {
        outcome = active.task => outcome.context("download task stopped unexpectedly")??,
        _ = tokio::signal::ctrl_c() => {
            orchestrator.cancel(&handle)?
        }
    };
    let _ = printer.await;

    print_session(&session);
    Ok(())
}

async fn recent(orchestrator: &MediaOrchestrator, limit: usize) {
    let entries = orchestrator.recent(limit).await;
    if entries.is_empty() {
        println!("No recent downloads");
        return;
    }

    for entry in entries {
        match &entry {
            RecentEntry::Local(session) => {
                let progress = session
                    .progress_fraction
                    .map(|fraction| format!(" {:.0}%", fraction * 100.0))
                    .unwrap_or_default();
                println!("  [{}{}] {}", session.state, progress, entry.display_name());
            }
            RecentEntry::Server(file) => {
                let size = file.size.map(format_bytes).unwrap_or_default();
                println!("  [server] {} {}", file.name, size);
            }
        }
    }
}

/// Render session events until the terminal one. Lagging only skips lines.
async fn follow_events(mut events: broadcast::Receiver<SessionEvent>, mut emit: impl FnMut(String)) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                emit(format!("({skipped} updates skipped)"));
                continue;
            }
            Err(RecvError::Closed) => break,
        };
        emit(match &event {
            SessionEvent::Started { .. } => "Started".to_string(),
            SessionEvent::Progress { fraction, report, .. } => {
                format!("Progress: {}", describe_progress(*fraction, report))
            }
            SessionEvent::Completed { result_location, .. } => format!("Completed: {result_location}"),
            SessionEvent::Failed { error, .. } => format!("Failed: {error}"),
            SessionEvent::Cancelled { .. } => "Cancelled".to_string(),
        });
        if event.is_terminal() {
            break;
        }
    }
}

fn describe_progress(fraction: f64, report: &ProgressReport) -> String {
    let mut line = format!("{:.1}%", fraction * 100.0);
    if let (Some(done), Some(total)) = (report.downloaded_bytes, report.total_bytes) {
        line.push_str(&format!(" ({} of {})", format_bytes(done), format_bytes(total)));
    }
    if let Some(speed) = report.speed {
        line.push_str(&format!(" at {}/s", format_bytes(speed as u64)));
    }
    if let Some(eta) = report.eta {
        line.push_str(&format!(", ETA {}:{:02}", eta / 60, eta % 60));
    }
    if let Some(text) = report.message.as_ref().or(report.status.as_ref()) {
        line.push_str(&format!(" [{text}]"));
    }
    line
}

fn print_session(session: &DownloadSession) {
    println!("State: {}", session.state);
    if let Some(location) = &session.result_location {
        println!("Location: {location}");
    }
    if let Some(detail) = &session.error_detail {
        println!("Error: {detail}");
    }
}
