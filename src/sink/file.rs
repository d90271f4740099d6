use std::path::Path;

use async_trait::async_trait;

use super::{Sink, SinkError};
use crate::audit::AuditLog;
use crate::models::Submission;

/// Appends `{"timestamp", "data"}` JSON lines to a local file.
pub struct FileSink {
    log: AuditLog,
}

impl FileSink {
    pub async fn open(path: &Path) -> Result<Self, SinkError> {
        Ok(Self {
            log: AuditLog::open(path).await?,
        })
    }

    pub fn path(&self) -> &Path {
        self.log.path()
    }
}

#[async_trait]
impl Sink for FileSink {
    fn name(&self) -> &str {
        "file"
    }

    async fn append(&self, submission: &Submission) -> Result<(), SinkError> {
        self.log.record(submission).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SubmissionFields;

    #[tokio::test]
    async fn appends_one_line_per_submission() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("submissions.log");
        let sink = FileSink::open(&path).await.unwrap();

        let first = Submission::accept(SubmissionFields {
            department: "Math".into(),
            ..Default::default()
        });
        let second = Submission::accept(SubmissionFields::default());
        sink.append(&first).await.unwrap();
        sink.append(&second).await.unwrap();

        let contents = tokio::fs::read_to_string(sink.path()).await.unwrap();
        let lines: Vec<serde_json::Value> = contents
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["data"]["id"], first.id().to_string());
        assert_eq!(lines[0]["data"]["department"], "Math");
        assert_eq!(lines[1]["data"]["id"], second.id().to_string());
        assert!(lines[0]["timestamp"].is_string());
    }
}
