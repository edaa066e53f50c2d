//! Line-oriented control socket.
//!
//! One command per line: `reload`, `skip [output]`, `pause`, `resume`,
//! `stop`, `ping`. The daemon answers `ok` or `err <reason>`.

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use renderer::{ControlMsg, ControlSender};

fn parse_command(line: &str) -> Result<Option<ControlMsg>, String> {
    let mut parts = line.split_whitespace();
    let command = parts.next().unwrap_or("");
    let argument = parts.next().map(str::to_owned);
    if parts.next().is_some() {
        return Err(format!("too many arguments for '{command}'"));
    }
    match command {
        "reload" => Ok(Some(ControlMsg::Reload)),
        "skip" => Ok(Some(ControlMsg::Skip(argument))),
        "pause" => Ok(Some(ControlMsg::Pause)),
        "resume" => Ok(Some(ControlMsg::Resume)),
        "stop" => Ok(Some(ControlMsg::Shutdown)),
        "ping" => Ok(None),
        other => Err(format!("unknown command '{other}'")),
    }
}

fn handle_client(stream: UnixStream, sender: &ControlSender) {
    let mut reader = BufReader::new(match stream.try_clone() {
        Ok(clone) => clone,
        Err(err) => {
            tracing::warn!(error = %err, "failed to clone control stream");
            return;
        }
    });
    let mut writer = stream;
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {}
            Err(err) => {
                tracing::debug!(error = %err, "control stream read failed");
                break;
            }
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let reply = match parse_command(trimmed) {
            Ok(Some(msg)) => {
                if sender.send(msg).is_err() {
                    "err daemon is shutting down".to_string()
                } else {
                    "ok".to_string()
                }
            }
            Ok(None) => "ok".to_string(),
            Err(reason) => format!("err {reason}"),
        };
        if writeln!(writer, "{reply}").is_err() {
            break;
        }
    }
}

/// Binds the control socket and serves it from a background thread.
pub fn spawn_server(socket_path: PathBuf, sender: ControlSender) -> Result<()> {
    if socket_path.exists() {
        std::fs::remove_file(&socket_path)
            .with_context(|| format!("failed to remove stale socket {}", socket_path.display()))?;
    }
    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let listener = UnixListener::bind(&socket_path)
        .with_context(|| format!("failed to bind {}", socket_path.display()))?;
    tracing::info!(socket = %socket_path.display(), "control socket ready");

    std::thread::Builder::new()
        .name("wallflow-ipc".into())
        .spawn(move || {
            for stream in listener.incoming() {
                match stream {
                    Ok(stream) => handle_client(stream, &sender),
                    Err(err) => tracing::warn!(error = %err, "control socket accept failed"),
                }
            }
        })
        .context("failed to spawn IPC thread")?;
    Ok(())
}

/// Sends one command to a running daemon and returns its reply line.
pub fn send(socket_path: &Path, command: &str) -> Result<String> {
    let stream = UnixStream::connect(socket_path).with_context(|| {
        format!(
            "failed to connect to {} (is the daemon running?)",
            socket_path.display()
        )
    })?;
    let mut writer = stream.try_clone().context("failed to clone stream")?;
    writeln!(writer, "{command}").context("failed to send command")?;
    let mut reply = String::new();
    BufReader::new(stream)
        .read_line(&mut reply)
        .context("failed to read reply")?;
    Ok(reply.trim_end().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_commands() {
        assert!(matches!(parse_command("reload"), Ok(Some(ControlMsg::Reload))));
        assert!(matches!(parse_command("skip"), Ok(Some(ControlMsg::Skip(None)))));
        assert!(matches!(
            parse_command("skip DP-1"),
            Ok(Some(ControlMsg::Skip(Some(ref name)))) if name == "DP-1"
        ));
        assert!(matches!(parse_command("pause"), Ok(Some(ControlMsg::Pause))));
        assert!(matches!(parse_command("ping"), Ok(None)));
        assert!(parse_command("dance").is_err());
        assert!(parse_command("skip DP-1 DP-2").is_err());
    }
}
