//! CSV interaction log.
//!
//! The file gets a header row when it is first created; every record after
//! that is one RFC 4180 row appended at the end.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::InteractionLogger;
use crate::error::LogError;
use crate::pipeline::types::{InteractionRecord, RECORD_HEADERS};

pub struct CsvLogger {
    path: PathBuf,
    /// Serializes appends from this process.
    write_lock: Mutex<()>,
}

impl CsvLogger {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: Mutex::new(()),
        }
    }

    fn io_error(&self, source: std::io::Error) -> LogError {
        LogError::Csv {
            path: self.path.display().to_string(),
            source,
        }
    }
}

#[async_trait]
impl InteractionLogger for CsvLogger {
    async fn append(&self, record: &InteractionRecord) -> Result<(), LogError> {
        let _guard = self.write_lock.lock().await;

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.io_error(e))?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| self.io_error(e))?;

        let mut out = String::new();
        let is_new = file.metadata().await.map_err(|e| self.io_error(e))?.len() == 0;
        if is_new {
            out.push_str(&format_row(RECORD_HEADERS.iter().copied()));
        }
        let row = record.to_row();
        out.push_str(&format_row(row.iter().map(String::as_str)));

        file.write_all(out.as_bytes())
            .await
            .map_err(|e| self.io_error(e))?;
        file.flush().await.map_err(|e| self.io_error(e))?;

        tracing::debug!(
            message_id = %record.message_id,
            outcome = record.outcome.label(),
            "Interaction appended to CSV"
        );
        Ok(())
    }
}

/// One CRLF-terminated row.
fn format_row<'a>(fields: impl Iterator<Item = &'a str>) -> String {
    let mut line = fields.map(quote_field).collect::<Vec<_>>().join(",");
    line.push_str("\r\n");
    line
}

/// Quote a field when it contains a separator, quote or line break.
fn quote_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
