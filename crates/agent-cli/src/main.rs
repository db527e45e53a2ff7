mod cli;
mod config;
mod logging;

use agent_client::{CommandClient, PollOutcome, StatusPoller};
use agent_protocol::{BackupDir, BackupKind, StartOutcome};
use anyhow::Context;
use clap::Parser;
use cli::{Action, Args, KindArgs};
use serde::Serialize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const RECONNECT_DELAY: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let _log_guard = logging::init_tracing(args.log_dir.as_deref())?;
    let config = config::resolve_config(&args)?;

    let shutdown = CancellationToken::new();
    spawn_shutdown_handler(shutdown.clone());
    let client = CommandClient::from_config(config).with_cancel(shutdown.clone());

    run(&client, args.command, &shutdown).await
}

fn spawn_shutdown_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!(event = "shutdown.signal", "interrupt received");
            shutdown.cancel();
        }
    });
}

async fn run(
    client: &CommandClient,
    action: Action,
    shutdown: &CancellationToken,
) -> anyhow::Result<()> {
    match action {
        Action::Dirs => {
            let dirs = client.get_backup_dirs().await;
            ensure_available(client, "backup directories")?;
            print_json(&dirs)
        }
        Action::SaveDirs { file } => {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let dirs: Vec<BackupDir> = serde_json::from_str(&raw)
                .with_context(|| format!("failed to parse {}", file.display()))?;
            ensure_accepted(client.save_backup_dirs(&dirs).await, "SAVE BACKUP DIRS")
        }
        Action::StartBackup(kind) => report_start(client.start_backup(backup_kind(kind)).await),
        Action::StartImage(kind) => report_start(client.start_image(backup_kind(kind)).await),
        Action::UpdateSettings { data } => {
            ensure_accepted(client.update_settings(&data).await, "UPDATE SETTINGS")
        }
        Action::Logs => {
            let entries = client.get_log_entries().await;
            ensure_available(client, "log entries")?;
            print_json(&entries)
        }
        Action::LogData { id, level } => {
            let lines = client.get_log_data(id, level).await;
            ensure_available(client, "log data")?;
            print_json(&lines)
        }
        Action::Pause { paused } => ensure_accepted(client.set_pause(paused).await, "PAUSE"),
        Action::NewServer { ident } => {
            ensure_accepted(client.add_new_server(&ident).await, "NEW SERVER")
        }
        Action::Status => {
            let details = client.get_status_details().await;
            if !details.ok {
                anyhow::bail!("status details unavailable");
            }
            print_json(&details)
        }
        Action::AccessParams { tokens } => {
            let params = client.get_access_parameters(&tokens).await;
            ensure_available(client, "access parameters")?;
            println!("{params}");
            Ok(())
        }
        Action::Capabilities => {
            let capabilities = client.get_capabilities().await;
            ensure_available(client, "capabilities")?;
            println!("{capabilities}");
            Ok(())
        }
        Action::RestoreOk { ok } => {
            let ack = client.restore_ok(ok).await;
            print_json(&ack)?;
            if !ack.ok {
                anyhow::bail!("restore acknowledgement rejected");
            }
            Ok(())
        }
        Action::Watch {
            fast,
            timeout,
            reconnect,
        } => {
            let timeout = timeout.unwrap_or_else(|| client.config().status_timeout());
            watch_status(client, fast, timeout, reconnect, shutdown).await
        }
    }
}

async fn watch_status(
    client: &CommandClient,
    fast: bool,
    timeout: Duration,
    reconnect: bool,
    shutdown: &CancellationToken,
) -> anyhow::Result<()> {
    let mut poller = StatusPoller::new();
    loop {
        if !poller.init(client, None, fast, timeout).await {
            if shutdown.is_cancelled() {
                return Ok(());
            }
            if !reconnect {
                anyhow::bail!("could not open status stream");
            }
            tracing::info!(
                event = "status.reconnect",
                delay_ms = RECONNECT_DELAY.as_millis() as u64
            );
            tokio::time::sleep(RECONNECT_DELAY).await;
            continue;
        }
        loop {
            match poller.poll().await {
                PollOutcome::Updated => print_json(poller.snapshot())?,
                PollOutcome::Pending => {}
                PollOutcome::Errored => break,
            }
        }
        if shutdown.is_cancelled() {
            return Ok(());
        }
        if !reconnect {
            anyhow::bail!("status stream ended");
        }
        tokio::time::sleep(RECONNECT_DELAY).await;
    }
}

fn backup_kind(kind: KindArgs) -> BackupKind {
    if kind.full {
        BackupKind::Full
    } else {
        BackupKind::Incremental
    }
}

fn report_start(outcome: StartOutcome) -> anyhow::Result<()> {
    print_json(&outcome)?;
    match outcome {
        StartOutcome::Started => Ok(()),
        StartOutcome::AlreadyRunning => anyhow::bail!("a backup is already running"),
        StartOutcome::NoServer => anyhow::bail!("no backup server available"),
        StartOutcome::Failed => anyhow::bail!("agent refused to start the backup"),
    }
}

fn ensure_available(client: &CommandClient, what: &str) -> anyhow::Result<()> {
    if client.has_error() {
        anyhow::bail!("{what} unavailable: agent request failed");
    }
    Ok(())
}

fn ensure_accepted(accepted: bool, verb: &str) -> anyhow::Result<()> {
    if !accepted {
        anyhow::bail!("{verb} was not accepted by the agent");
    }
    println!("OK");
    Ok(())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    let text = serde_json::to_string_pretty(value)?;
    println!("{text}");
    Ok(())
}
