use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};
use url::Url;

pub const OTA_BEFORE_HELP: &str = concat!(
    "ota ",
    env!("CARGO_PKG_VERSION"),
    " – over-the-air update store\n\n",
    "  launch           Resolve the update to run and print its files.\n",
    "  check            Ask the update server whether a newer update exists.\n",
    "  fetch            Download the newest update into the store.\n",
    "  status           List catalogued updates.\n",
    "  gc               Remove updates superseded by the launched one.\n",
);

#[derive(Parser, Debug)]
#[command(
    name = "ota",
    author,
    version,
    disable_help_subcommand = true,
    before_help = OTA_BEFORE_HELP
)]
#[allow(clippy::struct_excessive_bools)]
pub struct OtaCli {
    #[arg(long, value_name = "DIR", global = true, help = "Store directory [env: OTA_ROOT]")]
    pub root: Option<PathBuf>,
    #[arg(
        long,
        value_name = "VERSION",
        global = true,
        help = "Build token of the running binary [env: OTA_BINARY_VERSION]"
    )]
    pub binary_version: Option<String>,
    #[arg(
        long,
        value_name = "URL",
        global = true,
        help = "Remote manifest endpoint [env: OTA_MANIFEST_URL]"
    )]
    pub manifest_url: Option<Url>,
    #[arg(
        long,
        value_name = "DIR",
        global = true,
        help = "Directory holding the embedded app.manifest.json [env: OTA_EMBEDDED_DIR]"
    )]
    pub embedded_dir: Option<PathBuf>,
    #[arg(long, global = true, help = "Never contact the update server (same as OTA_ONLINE=0)")]
    pub offline: bool,
    #[arg(long, global = true, help = "Do not relaunch when a newer update is adopted (same as OTA_RELOAD_ON_UPDATE=0)")]
    pub no_reload: bool,
    #[arg(
        long,
        value_name = "N",
        global = true,
        help = "Concurrent asset downloads [env: OTA_DOWNLOAD_PARALLELISM]"
    )]
    pub parallelism: Option<usize>,
    #[arg(short, long, action = ArgAction::Count, global = true, help = "Increase logging (-vv reaches trace)")]
    pub verbose: u8,
    #[arg(long, global = true, help = "Force trace logging")]
    pub trace: bool,
    #[arg(long, global = true, help = "Emit {status,message,details} JSON envelopes")]
    pub json: bool,
    #[command(subcommand)]
    pub command: CommandGroupCli,
}

#[derive(Subcommand, Debug)]
pub enum CommandGroupCli {
    #[command(about = "Resolve the update to run and print its launch asset and asset map.")]
    Launch(LaunchArgs),
    #[command(about = "Check the update server for an update newer than the launched one.")]
    Check,
    #[command(about = "Download the newest compatible update into the store.")]
    Fetch,
    #[command(about = "List catalogued updates with their status.")]
    Status,
    #[command(about = "Remove updates and files the launched update no longer needs.")]
    Gc,
}

#[derive(Args, Debug)]
pub struct LaunchArgs {
    #[arg(long, help = "Skip the background update check")]
    pub no_check: bool,
}
