use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "wallflow",
    author,
    version,
    about = "Per-output wallpaper daemon for wlroots compositors",
    arg_required_else_help = false
)]
pub struct Cli {
    #[command(flatten)]
    pub run: RunArgs,
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Path to the config file (defaults to the XDG config location).
    #[arg(long, value_name = "PATH", env = "WALLFLOW_CONFIG")]
    pub config: Option<PathBuf>,

    /// Surface size used when the compositor reports none (e.g. `1920x1080`).
    #[arg(long, value_name = "WIDTHxHEIGHT")]
    pub size: Option<String>,

    /// Disable the config file watcher; reloads only happen on request.
    #[arg(long)]
    pub no_watch: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the last known status of each output.
    Status,
    /// Tell the running daemon to advance one output, or all of them.
    Skip {
        /// Output name (e.g. `DP-1`); omit to advance every output.
        #[arg(value_name = "OUTPUT")]
        output: Option<String>,
    },
    /// Pause rotation on all outputs.
    Pause,
    /// Resume rotation on all outputs.
    Resume,
    /// Tell the running daemon to re-read its config file.
    Reload,
    /// Stop the running daemon.
    Stop,
}

pub fn parse() -> Cli {
    Cli::parse()
}

/// Parses `WIDTHxHEIGHT` into a pixel size.
pub fn parse_surface_size(value: &str) -> anyhow::Result<(u32, u32)> {
    let (width, height) = value
        .split_once(['x', 'X'])
        .ok_or_else(|| anyhow::anyhow!("expected WIDTHxHEIGHT, got '{value}'"))?;
    let width: u32 = width
        .trim()
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid width in '{value}'"))?;
    let height: u32 = height
        .trim()
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid height in '{value}'"))?;
    if width == 0 || height == 0 {
        anyhow::bail!("surface size must be non-zero, got '{value}'");
    }
    Ok((width, height))
}
