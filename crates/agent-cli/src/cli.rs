use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(
    name = "agentctl",
    version,
    about = "Control client for the local backup agent"
)]
pub(crate) struct Args {
    #[arg(long)]
    pub(crate) config: Option<PathBuf>,
    #[arg(long)]
    pub(crate) endpoint: Option<String>,
    #[arg(long)]
    pub(crate) credentials_dir: Option<PathBuf>,
    #[arg(long, value_parser = humantime::parse_duration)]
    pub(crate) timeout: Option<Duration>,
    #[arg(long)]
    pub(crate) log_dir: Option<PathBuf>,
    #[command(subcommand)]
    pub(crate) command: Action,
}

#[derive(ClapArgs, Debug, Clone, Copy)]
#[group(required = true, multiple = false)]
pub(crate) struct KindArgs {
    #[arg(long)]
    pub(crate) full: bool,
    #[arg(long)]
    pub(crate) incr: bool,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Action {
    /// List configured backup directories.
    Dirs,
    /// Replace the backup directories with the JSON array in FILE.
    SaveDirs {
        #[arg(long)]
        file: PathBuf,
    },
    StartBackup(KindArgs),
    StartImage(KindArgs),
    UpdateSettings {
        data: String,
    },
    Logs,
    LogData {
        id: i32,
        #[arg(long, default_value_t = 0)]
        level: i32,
    },
    Pause {
        #[arg(action = clap::ArgAction::Set)]
        paused: bool,
    },
    NewServer {
        ident: String,
    },
    Status,
    AccessParams {
        tokens: String,
    },
    Capabilities,
    RestoreOk {
        #[arg(action = clap::ArgAction::Set)]
        ok: bool,
    },
    /// Follow the pushed status line until the stream ends or Ctrl-C.
    Watch {
        #[arg(long)]
        fast: bool,
        #[arg(long, value_parser = humantime::parse_duration)]
        timeout: Option<Duration>,
        #[arg(long)]
        reconnect: bool,
    },
}
