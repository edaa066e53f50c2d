use std::sync::Arc;

use anyhow::{Context, Result};
use engine::EngineControl;
use notify::RecommendedWatcher;
use paperconfig::ConfigFile;
use renderer::RuntimeOptions;
use tracing_subscriber::EnvFilter;

use crate::cli::{parse_surface_size, Cli, Command};
use crate::ipc;
use crate::paths::AppPaths;
use crate::status::{self, StatusWriter};
use crate::watcher;

const DEFAULT_FALLBACK_SIZE: (u32, u32) = (1920, 1080);

pub fn run(cli: Cli) -> Result<()> {
    initialise_tracing();

    let paths = AppPaths::discover()?;
    match cli.command {
        Some(Command::Status) => status::print_all(&paths.status_dir()),
        Some(Command::Skip { output }) => {
            let command = match output {
                Some(name) => format!("skip {name}"),
                None => "skip".to_string(),
            };
            send_command(&paths, &command)
        }
        Some(Command::Pause) => send_command(&paths, "pause"),
        Some(Command::Resume) => send_command(&paths, "resume"),
        Some(Command::Reload) => send_command(&paths, "reload"),
        Some(Command::Stop) => send_command(&paths, "stop"),
        None => run_daemon(cli, paths),
    }
}

fn send_command(paths: &AppPaths, command: &str) -> Result<()> {
    let reply = ipc::send(&paths.socket_path(), command)?;
    println!("{reply}");
    if reply.starts_with("err") {
        anyhow::bail!("daemon rejected command: {reply}");
    }
    Ok(())
}

fn run_daemon(cli: Cli, paths: AppPaths) -> Result<()> {
    let config_path = cli
        .run
        .config
        .unwrap_or_else(|| paths.default_config_file());
    let raw = std::fs::read_to_string(&config_path)
        .with_context(|| format!("failed to read config at {}", config_path.display()))?;
    let config = ConfigFile::from_toml_str(&raw)
        .with_context(|| format!("invalid config at {}", config_path.display()))?;

    let fallback_size = match cli.run.size.as_deref() {
        Some(value) => parse_surface_size(value)?,
        None => DEFAULT_FALLBACK_SIZE,
    };

    std::fs::create_dir_all(paths.runtime_dir())
        .with_context(|| format!("failed to create {}", paths.runtime_dir().display()))?;
    let status_writer = StatusWriter::new(paths.status_dir())?;
    let status_sink = Box::new(move |record: &engine::StatusRecord| {
        tracing::debug!(output = %record.output, path = %record.path, "status update");
        if let Err(err) = status_writer.write(record) {
            tracing::warn!(error = %err, "failed to persist status");
        }
    });

    let control = Arc::new(EngineControl::new());
    let socket_path = paths.socket_path();
    tracing::info!(
        config = %config_path.display(),
        socket = %socket_path.display(),
        "starting wallflow daemon"
    );

    let watch = !cli.run.no_watch;
    let watch_path = config_path.clone();
    // Kept alive for the lifetime of the daemon; dropping it stops the watch.
    let mut config_watcher: Option<RecommendedWatcher> = None;
    renderer::run(
        RuntimeOptions {
            config_path,
            config,
            fallback_size,
        },
        control,
        status_sink,
        |sender| {
            if watch {
                match watcher::spawn(&watch_path, sender.clone()) {
                    Ok(active) => config_watcher = Some(active),
                    Err(err) => {
                        tracing::warn!(error = %err, "config watcher disabled");
                    }
                }
            }
            if let Err(err) = ipc::spawn_server(socket_path, sender) {
                tracing::warn!(error = %err, "control socket disabled");
            }
        },
    )?;
    drop(config_watcher);
    Ok(())
}

fn initialise_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
