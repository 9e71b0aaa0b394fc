//! Append-only interaction log sinks.

pub mod csv;
pub mod sheets;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::SinkConfig;
use crate::error::LogError;
use crate::pipeline::types::InteractionRecord;

pub use csv::CsvLogger;
pub use sheets::SheetsLogger;

/// Destination for interaction records. Rows are only ever appended.
#[async_trait]
pub trait InteractionLogger: Send + Sync {
    async fn append(&self, record: &InteractionRecord) -> Result<(), LogError>;
}

/// Build the configured sink once at startup.
pub fn create_logger(config: &SinkConfig) -> Result<Arc<dyn InteractionLogger>, LogError> {
    match config {
        SinkConfig::Csv { file_path } => {
            tracing::info!(path = %file_path.display(), "Logging interactions to CSV");
            Ok(Arc::new(CsvLogger::new(file_path.clone())))
        }
        SinkConfig::GoogleSheets(sheets) => {
            let logger = SheetsLogger::new(sheets)?;
            tracing::info!(
                spreadsheet = %sheets.spreadsheet_id,
                worksheet = %sheets.worksheet,
                "Logging interactions to Google Sheets"
            );
            Ok(Arc::new(logger))
        }
    }
}
