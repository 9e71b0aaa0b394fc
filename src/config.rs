//! Run configuration, loaded once from a TOML file at startup.
//!
//! The file is organized in sections (`[Email]`, `[Gmail]`, `[IMAP]`,
//! `[SMTP]`, `[LLM]`, `[Assistant]`, `[Logging]`, `[CSV]`, `[GoogleSheets]`).
//! Raw sections are deserialized first and then validated into a typed,
//! read-only [`RunConfig`] that components receive through their
//! constructors.

use std::path::{Path, PathBuf};

use secrecy::SecretString;
use serde::Deserialize;

use crate::error::ConfigError;
use crate::llm::{LlmBackend, LlmConfig};

/// Default config file path.
pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

/// Default persona when `[Assistant] persona` is absent.
pub const DEFAULT_PERSONA: &str = "A helpful, professional assistant";

/// Subject markers that opt a message out of automated replies.
pub const DEFAULT_OPT_OUT_MARKERS: &[&str] = &["no-auto-reply", "no-auto", "human-only"];

const DEFAULT_MAX_MESSAGES: u32 = 25;

// ── Typed configuration ─────────────────────────────────────────────

/// Immutable configuration snapshot for one process invocation.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// The assistant's own mailbox address.
    pub email_address: String,
    /// Upper bound on messages fetched per cycle.
    pub max_messages: u32,
    pub mail: MailProviderConfig,
    pub llm: LlmConfig,
    pub assistant: AssistantConfig,
    pub sink: SinkConfig,
    /// Optional file for diagnostic logs (in addition to stderr).
    pub log_file: Option<PathBuf>,
}

/// Which mailbox provider to poll and reply through.
#[derive(Debug, Clone)]
pub enum MailProviderConfig {
    Gmail(GmailConfig),
    Imap(ImapConfig),
}

#[derive(Debug, Clone)]
pub struct GmailConfig {
    /// Installed-app client secrets (`credentials.json`).
    pub credentials_path: PathBuf,
    /// Authorized-user token cache holding the refresh token.
    pub token_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ImapConfig {
    pub imap_host: String,
    pub imap_port: u16,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub username: String,
    pub password: SecretString,
}

#[derive(Debug, Clone)]
pub struct AssistantConfig {
    pub persona: String,
    /// Generate an LLM summary of each sent interaction for the log row.
    pub summarize: bool,
    pub opt_out_markers: Vec<String>,
}

/// Where interaction records are appended.
#[derive(Debug, Clone)]
pub enum SinkConfig {
    Csv { file_path: PathBuf },
    GoogleSheets(SheetsConfig),
}

#[derive(Debug, Clone)]
pub struct SheetsConfig {
    /// Service-account key file.
    pub credentials_path: PathBuf,
    pub spreadsheet_id: String,
    pub worksheet: String,
}

// ── Raw file layout ─────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    #[serde(rename = "Email")]
    email: Option<RawEmail>,
    #[serde(rename = "Gmail", default)]
    gmail: RawGmail,
    #[serde(rename = "IMAP")]
    imap: Option<RawServer>,
    #[serde(rename = "SMTP")]
    smtp: Option<RawServer>,
    #[serde(rename = "LLM")]
    llm: Option<RawLlm>,
    #[serde(rename = "Assistant", default)]
    assistant: RawAssistant,
    #[serde(rename = "Logging")]
    logging: Option<RawLogging>,
    #[serde(rename = "CSV", default)]
    csv: RawCsv,
    #[serde(rename = "GoogleSheets", default)]
    google_sheets: RawSheets,
}

#[derive(Debug, Deserialize)]
struct RawEmail {
    #[serde(rename = "type")]
    kind: Option<String>,
    email_address: Option<String>,
    password: Option<String>,
    max_messages: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct RawGmail {
    credentials_path: Option<PathBuf>,
    token_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct RawServer {
    host: Option<String>,
    port: Option<u16>,
}

#[derive(Debug, Deserialize)]
struct RawLlm {
    provider: Option<String>,
    api_key: Option<String>,
    model_name: Option<String>,
    temperature: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct RawAssistant {
    persona: Option<String>,
    summarize: Option<bool>,
    opt_out_markers: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct RawLogging {
    #[serde(rename = "type")]
    kind: Option<String>,
    log_file: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct RawCsv {
    file_path: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct RawSheets {
    credentials_path: Option<PathBuf>,
    spreadsheet_id: Option<String>,
    worksheet: Option<String>,
}

// ── Loading ─────────────────────────────────────────────────────────

impl RunConfig {
    /// Load and validate the config file, reading API-key fallbacks from the
    /// process environment.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text, |key| std::env::var(key).ok())
    }

    /// Parse and validate config text. `env` resolves environment fallbacks.
    pub fn from_toml_str(
        text: &str,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let raw: RawConfig =
            toml::from_str(text).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        let email = raw
            .email
            .ok_or_else(|| missing("Email", "Add an [Email] section."))?;
        let email_address = non_empty(email.email_address)
            .ok_or_else(|| missing("Email.email_address", "Set the assistant's own address."))?;
        let kind = non_empty(email.kind)
            .ok_or_else(|| missing("Email.type", "Use \"gmail\" or \"imap\"."))?;

        let mail = match kind.to_lowercase().as_str() {
            "gmail" => MailProviderConfig::Gmail(GmailConfig {
                credentials_path: raw
                    .gmail
                    .credentials_path
                    .unwrap_or_else(|| PathBuf::from("credentials.json")),
                token_path: raw
                    .gmail
                    .token_path
                    .unwrap_or_else(|| PathBuf::from("token.json")),
            }),
            "imap" => {
                let password = non_empty(email.password).ok_or_else(|| {
                    missing("Email.password", "IMAP/SMTP login needs a password.")
                })?;
                let imap = raw
                    .imap
                    .ok_or_else(|| missing("IMAP", "Add an [IMAP] section with host."))?;
                let smtp = raw
                    .smtp
                    .ok_or_else(|| missing("SMTP", "Add an [SMTP] section with host."))?;
                MailProviderConfig::Imap(ImapConfig {
                    imap_host: non_empty(imap.host)
                        .ok_or_else(|| missing("IMAP.host", "Set the IMAP server host."))?,
                    imap_port: imap.port.unwrap_or(993),
                    smtp_host: non_empty(smtp.host)
                        .ok_or_else(|| missing("SMTP.host", "Set the SMTP server host."))?,
                    smtp_port: smtp.port.unwrap_or(465),
                    username: email_address.clone(),
                    password: SecretString::from(password),
                })
            }
            other => {
                return Err(ConfigError::InvalidValue {
                    key: "Email.type".into(),
                    message: format!("unsupported email type '{other}'"),
                });
            }
        };

        let max_messages = email.max_messages.unwrap_or(DEFAULT_MAX_MESSAGES);
        if max_messages == 0 {
            return Err(ConfigError::InvalidValue {
                key: "Email.max_messages".into(),
                message: "must be at least 1".into(),
            });
        }

        let llm = parse_llm(raw.llm, &env)?;

        let assistant = AssistantConfig {
            persona: non_empty(raw.assistant.persona).unwrap_or_else(|| DEFAULT_PERSONA.into()),
            summarize: raw.assistant.summarize.unwrap_or(true),
            opt_out_markers: raw.assistant.opt_out_markers.unwrap_or_else(|| {
                DEFAULT_OPT_OUT_MARKERS.iter().map(|s| s.to_string()).collect()
            }),
        };

        let logging = raw
            .logging
            .ok_or_else(|| missing("Logging", "Add a [Logging] section."))?;
        let sink_kind = non_empty(logging.kind)
            .ok_or_else(|| missing("Logging.type", "Use \"csv\" or \"googlesheets\"."))?;
        let sink = match sink_kind.to_lowercase().as_str() {
            "csv" => SinkConfig::Csv {
                file_path: raw
                    .csv
                    .file_path
                    .unwrap_or_else(|| PathBuf::from("email_log.csv")),
            },
            "googlesheets" => SinkConfig::GoogleSheets(SheetsConfig {
                credentials_path: raw.google_sheets.credentials_path.ok_or_else(|| {
                    missing(
                        "GoogleSheets.credentials_path",
                        "Point it at a service-account JSON key.",
                    )
                })?,
                spreadsheet_id: non_empty(raw.google_sheets.spreadsheet_id).ok_or_else(|| {
                    missing("GoogleSheets.spreadsheet_id", "Copy it from the sheet URL.")
                })?,
                worksheet: non_empty(raw.google_sheets.worksheet)
                    .unwrap_or_else(|| "Sheet1".into()),
            }),
            other => {
                return Err(ConfigError::InvalidValue {
                    key: "Logging.type".into(),
                    message: format!("unsupported logging type '{other}'"),
                });
            }
        };

        Ok(Self {
            email_address,
            max_messages,
            mail,
            llm,
            assistant,
            sink,
            log_file: logging.log_file,
        })
    }
}

fn parse_llm(
    raw: Option<RawLlm>,
    env: &impl Fn(&str) -> Option<String>,
) -> Result<LlmConfig, ConfigError> {
    let raw = raw.ok_or_else(|| missing("LLM", "Add an [LLM] section."))?;

    let backend = match non_empty(raw.provider)
        .unwrap_or_else(|| "google".into())
        .to_lowercase()
        .as_str()
    {
        "google" | "gemini" => LlmBackend::Gemini,
        "anthropic" => LlmBackend::Anthropic,
        "openai" => LlmBackend::OpenAi,
        other => {
            return Err(ConfigError::InvalidValue {
                key: "LLM.provider".into(),
                message: format!("unsupported LLM provider '{other}'"),
            });
        }
    };

    let api_key = non_empty(raw.api_key)
        .or_else(|| env(backend.api_key_env()).filter(|v| !v.trim().is_empty()))
        .ok_or_else(|| {
            missing(
                "LLM.api_key",
                &format!("Set it in the file or export {}.", backend.api_key_env()),
            )
        })?;

    let model = non_empty(raw.model_name)
        .ok_or_else(|| missing("LLM.model_name", "Name the model to draft replies with."))?;

    if let Some(t) = raw.temperature
        && !(0.0..=2.0).contains(&t)
    {
        return Err(ConfigError::InvalidValue {
            key: "LLM.temperature".into(),
            message: format!("{t} is outside 0.0..=2.0"),
        });
    }

    Ok(LlmConfig {
        backend,
        api_key: SecretString::from(api_key),
        model,
        temperature: raw.temperature,
    })
}

fn missing(key: &str, hint: &str) -> ConfigError {
    ConfigError::MissingRequired {
        key: key.to_string(),
        hint: hint.to_string(),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
