//! Status persistence: one JSON file per output under the runtime dir, so
//! `wallflow status` works without a round-trip to the daemon.

use std::path::PathBuf;

use anyhow::{Context, Result};
use engine::StatusRecord;
use serde::Serialize;

#[derive(Serialize)]
struct StatusFile<'a> {
    #[serde(flatten)]
    record: &'a StatusRecord,
    updated_at: String,
}

pub struct StatusWriter {
    dir: PathBuf,
}

impl StatusWriter {
    pub fn new(dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
        Ok(Self { dir })
    }

    /// Writes via a temp file and rename so readers never see a torn file.
    pub fn write(&self, record: &StatusRecord) -> Result<()> {
        let file = StatusFile {
            record,
            updated_at: chrono::Local::now().to_rfc3339(),
        };
        let json = serde_json::to_string_pretty(&file).context("failed to serialize status")?;
        let path = self.dir.join(format!("{}.json", sanitize(&record.output)));
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json).with_context(|| format!("failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &path)
            .with_context(|| format!("failed to move status into {}", path.display()))?;
        Ok(())
    }
}

/// Prints every persisted status record, most recently named outputs first.
pub fn print_all(dir: &std::path::Path) -> Result<()> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => {
            println!("no status recorded (is the daemon running?)");
            return Ok(());
        }
    };
    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.extension().map_or(false, |ext| ext == "json"))
        .collect();
    paths.sort();
    if paths.is_empty() {
        println!("no status recorded (is the daemon running?)");
        return Ok(());
    }
    for path in paths {
        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        println!("{}", contents.trim_end());
    }
    Ok(())
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c == '/' || c == '\0' { '_' } else { c })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine::ContentKind;

    fn record() -> StatusRecord {
        StatusRecord {
            output: "DP-1".into(),
            path: "/walls/a.png".into(),
            kind: ContentKind::Image,
            position: 0,
            rotation_len: 3,
            paused: false,
            degraded: false,
        }
    }

    #[test]
    fn writes_one_file_per_output() {
        let dir = tempfile::tempdir().unwrap();
        let writer = StatusWriter::new(dir.path().to_path_buf()).unwrap();
        writer.write(&record()).unwrap();

        let path = dir.path().join("DP-1.json");
        let contents = std::fs::read_to_string(path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&contents).unwrap();
        assert_eq!(value["output"], "DP-1");
        assert_eq!(value["kind"], "image");
        assert!(value["updated_at"].is_string());
    }

    #[test]
    fn rewrite_replaces_previous_status() {
        let dir = tempfile::tempdir().unwrap();
        let writer = StatusWriter::new(dir.path().to_path_buf()).unwrap();
        writer.write(&record()).unwrap();

        let mut updated = record();
        updated.path = "/walls/b.png".into();
        updated.position = 1;
        writer.write(&updated).unwrap();

        let contents = std::fs::read_to_string(dir.path().join("DP-1.json")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&contents).unwrap();
        assert_eq!(value["path"], "/walls/b.png");
        assert_eq!(value["position"], 1);
    }

    #[test]
    fn sanitizes_output_names() {
        assert_eq!(sanitize("DP-1"), "DP-1");
        assert_eq!(sanitize("weird/name"), "weird_name");
    }
}
