//! Config file watcher feeding reloads into the daemon's control channel.

use std::path::Path;
use std::sync::mpsc;
use std::time::Duration;

use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use renderer::{ControlMsg, ControlSender};

/// How long to wait for an event burst to settle before reloading. Editors
/// tend to write via truncate+write or rename, producing several events.
const DEBOUNCE: Duration = Duration::from_millis(200);

/// Watches the config file's parent directory and sends a coalesced
/// [`ControlMsg::Reload`] when the file changes. The returned watcher must
/// stay alive for the watch to keep running.
pub fn spawn(config_path: &Path, sender: ControlSender) -> Result<RecommendedWatcher> {
    let parent = config_path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf();
    let file_name = config_path
        .file_name()
        .context("config path has no file name")?
        .to_owned();

    let (event_tx, event_rx) = mpsc::channel::<()>();
    let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
        let event = match result {
            Ok(event) => event,
            Err(err) => {
                tracing::warn!(error = %err, "config watcher error");
                return;
            }
        };
        // Watching the parent directory survives rename-based saves, but
        // means we see events for sibling files too.
        let relevant = matches!(
            event.kind,
            EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
        ) && event
            .paths
            .iter()
            .any(|path| path.file_name() == Some(file_name.as_os_str()));
        if relevant {
            let _ = event_tx.send(());
        }
    })
    .context("failed to create config watcher")?;

    watcher
        .watch(&parent, RecursiveMode::NonRecursive)
        .with_context(|| format!("failed to watch {}", parent.display()))?;
    tracing::info!(dir = %parent.display(), "watching config for changes");

    std::thread::Builder::new()
        .name("wallflow-watch".into())
        .spawn(move || {
            while event_rx.recv().is_ok() {
                while event_rx.recv_timeout(DEBOUNCE).is_ok() {}
                if sender.send(ControlMsg::Reload).is_err() {
                    break;
                }
            }
        })
        .context("failed to spawn watcher thread")?;

    Ok(watcher)
}
