//! Google Sheets interaction log.
//!
//! Authenticates with a service account, writes the header row when row 1
//! of the worksheet is empty, then appends one row per record.

use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;
use tokio::sync::Mutex;

use super::InteractionLogger;
use crate::config::SheetsConfig;
use crate::error::{AuthError, LogError};
use crate::google_auth::{SHEETS_SCOPE, TokenProvider};
use crate::pipeline::types::{InteractionRecord, RECORD_HEADERS};

const SHEETS_API_BASE: &str = "https://sheets.googleapis.com/v4/spreadsheets";

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
}

pub struct SheetsLogger {
    http: reqwest::Client,
    tokens: TokenProvider,
    base_url: String,
    spreadsheet_id: String,
    worksheet: String,
    /// Set once the header row is known to exist.
    header_ready: Mutex<bool>,
}

impl SheetsLogger {
    pub fn new(config: &SheetsConfig) -> Result<Self, LogError> {
        let http = reqwest::Client::new();
        let tokens = TokenProvider::service_account(&config.credentials_path, SHEETS_SCOPE, http.clone())?;
        Ok(Self::with_tokens(
            http,
            tokens,
            &config.spreadsheet_id,
            &config.worksheet,
        ))
    }

    pub fn with_tokens(
        http: reqwest::Client,
        tokens: TokenProvider,
        spreadsheet_id: &str,
        worksheet: &str,
    ) -> Self {
        Self {
            http,
            tokens,
            base_url: SHEETS_API_BASE.to_string(),
            spreadsheet_id: spreadsheet_id.to_string(),
            worksheet: worksheet.to_string(),
            header_ready: Mutex::new(false),
        }
    }

    /// Point the logger at a different API root (`.../v4/spreadsheets`).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// `{base}/{spreadsheet}/values/{range}` with each segment escaped.
    fn values_url(&self, range: &str) -> Result<Url, LogError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| LogError::Sheets(format!("invalid API base {}: {e}", self.base_url)))?;
        url.path_segments_mut()
            .map_err(|_| LogError::Sheets(format!("API base {} cannot take a path", self.base_url)))?
            .extend([self.spreadsheet_id.as_str(), "values", range]);
        Ok(url)
    }

    async fn header_row_is_empty(&self) -> Result<bool, LogError> {
        let url = self.values_url(&format!("{}!1:1", self.worksheet))?;
        let range: ValueRange = self.send(self.http.get(url)).await?.json().await.map_err(|e| {
            LogError::Sheets(format!("parse header response: {e}"))
        })?;
        Ok(range.values.iter().all(|row| row.is_empty()))
    }

    async fn append_row(&self, row: Vec<String>) -> Result<(), LogError> {
        let mut url = self.values_url(&format!("{}!A1:append", self.worksheet))?;
        url.query_pairs_mut()
            .append_pair("valueInputOption", "RAW")
            .append_pair("insertDataOption", "INSERT_ROWS");
        let body = serde_json::json!({ "values": [row] });
        self.send(self.http.post(url).json(&body)).await?;
        Ok(())
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, LogError> {
        let token = self.tokens.access_token().await?;
        let response = request
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| LogError::Sheets(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            self.tokens.invalidate().await;
            return Err(LogError::Auth(AuthError::GrantRejected {
                provider: "sheets".into(),
                reason: format!("{status}: {body}"),
            }));
        }
        Err(LogError::Sheets(format!("{status}: {body}")))
    }
}

#[async_trait]
impl InteractionLogger for SheetsLogger {
    async fn append(&self, record: &InteractionRecord) -> Result<(), LogError> {
        {
            let mut ready = self.header_ready.lock().await;
            if !*ready {
                if self.header_row_is_empty().await? {
                    self.append_row(RECORD_HEADERS.iter().map(|h| h.to_string()).collect())
                        .await?;
                    tracing::info!(worksheet = %self.worksheet, "Header row written");
                }
                *ready = true;
            }
        }

        self.append_row(record.to_row()).await?;
        tracing::debug!(
            message_id = %record.message_id,
            outcome = record.outcome.label(),
            "Interaction appended to Google Sheets"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn logger(worksheet: &str) -> SheetsLogger {
        let key = std::path::PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("tests/fixtures/service_account.json");
        let http = reqwest::Client::new();
        let tokens = TokenProvider::service_account(&key, SHEETS_SCOPE, http.clone()).unwrap();
        SheetsLogger::with_tokens(http, tokens, "sheet-id", worksheet)
    }

    #[test]
    fn values_url_escapes_worksheet_names() {
        let url = logger("Email Log").values_url("Email Log!1:1").unwrap();
        assert_eq!(
            url.as_str(),
            "https://sheets.googleapis.com/v4/spreadsheets/sheet-id/values/Email%20Log!1:1"
        );
    }

    #[test]
    fn empty_value_range_parses() {
        let range: ValueRange =
            serde_json::from_str(r#"{"range":"Sheet1!A1:Z1","majorDimension":"ROWS"}"#).unwrap();
        assert!(range.values.is_empty());
    }
}
