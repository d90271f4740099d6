//! Local JSON-lines log of every submission accepted at intake, written
//! before the submission is queued.

use std::io;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Append-only file of `{"timestamp", "data"}` lines.
pub struct AuditLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl AuditLog {
    /// Open `path` for appending, creating it and its parent directory.
    pub async fn open(path: &Path) -> io::Result<Self> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir).await?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one line and flush it.
    pub async fn record<T: Serialize + ?Sized>(&self, data: &T) -> io::Result<()> {
        let mut line = serde_json::to_vec(&json!({
            "timestamp": Utc::now(),
            "data": data,
        }))?;
        line.push(b'\n');

        let mut file = self.file.lock().await;
        file.write_all(&line).await?;
        file.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reopening_appends_instead_of_truncating() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("audit.log");

        let log = AuditLog::open(&path).await.unwrap();
        log.record(&json!({ "department": "Math" })).await.unwrap();
        drop(log);

        let log = AuditLog::open(&path).await.unwrap();
        log.record(&json!({ "department": "Art" })).await.unwrap();

        let contents = tokio::fs::read_to_string(log.path()).await.unwrap();
        let lines: Vec<serde_json::Value> = contents
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["data"]["department"], "Math");
        assert_eq!(lines[1]["data"]["department"], "Art");
        assert!(lines[1]["timestamp"].is_string());
    }
}
