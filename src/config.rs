//! Application configuration.
//!
//! Settings are layered, lowest precedence first:
//! 1. Built-in defaults
//! 2. A TOML file: `--config`, `$MAILGRAB_CONFIG`, or
//!    `~/.config/mailgrab/config.toml` (Linux/macOS),
//!    `%APPDATA%\mailgrab\config.toml` (Windows) when it exists
//! 3. Command-line flags and their environment variables
//!
//! The layers are merged once at startup into an immutable [`Config`]
//! that is passed by reference to every component.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::Level;

use crate::error::{Error, Result};
use crate::filter::AllowList;
use crate::mailbox::imap::ServerAddress;
use crate::mailbox::SearchCriteria;
use crate::postprocess::{CommandTemplate, OutputPolicy};

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "MAILGRAB_CONFIG";

/// Default number of fetched messages buffered ahead of processing.
pub const DEFAULT_FETCH_QUEUE: usize = 10;

// ── File layer ──────────────────────────────────────────────────

/// Contents of the TOML config file. Every field is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    /// Server and credentials.
    pub server: ServerSection,
    /// Folder selection and search filters.
    pub mailbox: MailboxSection,
    /// What to extract and what to run on it.
    pub output: OutputSection,
    /// Logging and run policy.
    pub general: GeneralSection,
}

/// Server and credentials.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// `host[:port]`, port defaults to 993.
    pub address: Option<String>,
    /// Login name.
    pub username: Option<String>,
    /// Login password.
    pub password: Option<String>,
}

/// Folder selection and search filters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MailboxSection {
    /// Folder to open.
    pub folder: String,
    /// Open the folder with EXAMINE so no flags change.
    pub read_only: bool,
    /// Only fetch messages without `\Seen`.
    pub unseen_only: bool,
    /// Subject substring filter (empty = any).
    pub subject_filter: String,
    /// Sender substring filter (empty = any).
    pub sender_filter: String,
}

/// What to extract and what to run on it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSection {
    /// Directory attachments are written to.
    pub dir: PathBuf,
    /// Allowed content types, comma-separated.
    pub attachment_types: String,
    /// Post-processing command with one `%s`; empty disables it.
    pub command: String,
    /// Force (`true`) or disable (`false`) output capture; unset follows the log level.
    pub capture_output: Option<bool>,
    /// Warn about allowed parts that carry no filename.
    pub strict_names: bool,
}

/// Logging and run policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralSection {
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub log_level: String,
    /// Log line format.
    pub log_format: LogFormat,
    /// Also append logs to this file.
    pub log_file: Option<PathBuf>,
    /// What a message that cannot be parsed does to the run.
    pub on_message_error: MessageErrorPolicy,
    /// Fetched messages buffered ahead of processing.
    pub fetch_queue: usize,
}

impl Default for MailboxSection {
    fn default() -> Self {
        Self {
            folder: "INBOX".to_string(),
            read_only: true,
            unseen_only: true,
            subject_filter: String::new(),
            sender_filter: String::new(),
        }
    }
}

impl Default for OutputSection {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("output"),
            attachment_types: "application/pdf".to_string(),
            command: "stat '%s'".to_string(),
            capture_output: None,
            strict_names: false,
        }
    }
}

impl Default for GeneralSection {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            log_file: None,
            on_message_error: MessageErrorPolicy::Abort,
            fetch_queue: DEFAULT_FETCH_QUEUE,
        }
    }
}

// ── Policies ────────────────────────────────────────────────────

/// Log line format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    Text,
    /// One JSON object per line.
    Json,
}

/// Severity of a message whose body cannot be parsed as MIME.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum MessageErrorPolicy {
    /// Stop the whole run at the first such message.
    Abort,
    /// Log it and go on with the next message.
    Continue,
}

// ── Command-line layer ──────────────────────────────────────────

/// Values given on the command line or through environment variables.
///
/// `None` leaves the file/default value in place.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub server: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub output_dir: Option<PathBuf>,
    pub folder: Option<String>,
    pub subject_filter: Option<String>,
    pub sender_filter: Option<String>,
    pub unseen_only: Option<bool>,
    pub read_only: Option<bool>,
    pub attachment_types: Option<String>,
    pub command: Option<String>,
    pub capture_output: Option<bool>,
    pub strict_names: Option<bool>,
    pub log_level: Option<String>,
    pub log_format: Option<LogFormat>,
    pub log_file: Option<PathBuf>,
    pub on_message_error: Option<MessageErrorPolicy>,
    pub fetch_queue: Option<usize>,
}

// ── Resolved configuration ──────────────────────────────────────

/// A password that never shows up in `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    /// The clear-text value.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// Logging setup.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Maximum level emitted.
    pub level: Level,
    /// Line format.
    pub format: LogFormat,
    /// Optional file that receives a copy of every line.
    pub file: Option<PathBuf>,
}

impl LogConfig {
    /// Debug or trace: log lines replace the progress bar and command output is captured.
    pub fn is_verbose(&self) -> bool {
        self.level == Level::DEBUG || self.level == Level::TRACE
    }
}

/// The validated, immutable configuration for one run.
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerAddress,
    pub username: String,
    pub password: Secret,
    pub folder: String,
    pub read_only: bool,
    pub criteria: SearchCriteria,
    pub output_dir: PathBuf,
    pub attachment_types: AllowList,
    pub command: Option<CommandTemplate>,
    pub output_policy: OutputPolicy,
    pub strict_names: bool,
    pub on_message_error: MessageErrorPolicy,
    pub fetch_queue: usize,
    pub log: LogConfig,
}

impl Config {
    /// Merge the file layer with command-line overrides and validate the result.
    pub fn resolve(file: FileConfig, cli: Overrides) -> Result<Self> {
        let FileConfig {
            server,
            mailbox,
            output,
            general,
        } = file;

        let address = required(cli.server.or(server.address), "IMAP_SERVER")?;
        let username = required(cli.username.or(server.username), "EMAIL_USERNAME")?;
        let password = required(cli.password.or(server.password), "EMAIL_PASSWORD")?;

        let level_name = cli.log_level.unwrap_or(general.log_level);
        let level = level_name
            .trim()
            .parse::<Level>()
            .map_err(|_| Error::Config(format!("unknown log level {level_name:?}")))?;
        let log = LogConfig {
            level,
            format: cli.log_format.unwrap_or(general.log_format),
            file: cli.log_file.or(general.log_file),
        };

        let attachment_types =
            AllowList::parse(&cli.attachment_types.unwrap_or(output.attachment_types));
        if attachment_types.is_empty() {
            return Err(Error::Config("no attachment types configured".into()));
        }

        let command_text = cli.command.unwrap_or(output.command);
        let command = if command_text.trim().is_empty() {
            None
        } else {
            Some(CommandTemplate::parse(&command_text)?)
        };

        let capture = cli
            .capture_output
            .or(output.capture_output)
            .unwrap_or_else(|| log.is_verbose());
        let output_policy = if capture {
            OutputPolicy::Capture
        } else {
            OutputPolicy::Inherit
        };

        let fetch_queue = cli.fetch_queue.unwrap_or(general.fetch_queue);
        if fetch_queue == 0 {
            return Err(Error::Config("fetch queue capacity must be at least 1".into()));
        }

        let filter = |value: String| Some(value).filter(|v| !v.is_empty());

        Ok(Self {
            server: address.parse()?,
            username,
            password: Secret(password),
            folder: cli.folder.unwrap_or(mailbox.folder),
            read_only: cli.read_only.unwrap_or(mailbox.read_only),
            criteria: SearchCriteria {
                unseen_only: cli.unseen_only.unwrap_or(mailbox.unseen_only),
                subject_contains: filter(cli.subject_filter.unwrap_or(mailbox.subject_filter)),
                sender_contains: filter(cli.sender_filter.unwrap_or(mailbox.sender_filter)),
            },
            output_dir: cli.output_dir.unwrap_or(output.dir),
            attachment_types,
            command,
            output_policy,
            strict_names: cli.strict_names.unwrap_or(output.strict_names),
            on_message_error: cli.on_message_error.unwrap_or(general.on_message_error),
            fetch_queue,
            log,
        })
    }
}

fn required(value: Option<String>, name: &str) -> Result<String> {
    value.filter(|v| !v.trim().is_empty()).ok_or_else(|| {
        Error::Config(format!(
            "IMAP_SERVER, EMAIL_USERNAME and EMAIL_PASSWORD must be set ({name} is missing)"
        ))
    })
}

// ── Load ────────────────────────────────────────────────────────

/// Load the TOML layer.
///
/// An explicitly named file must exist; the default location is optional.
pub fn load_file_config(explicit: Option<&Path>) -> Result<FileConfig> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => match default_config_path() {
            Some(path) if path.exists() => path,
            _ => return Ok(FileConfig::default()),
        },
    };

    let contents = std::fs::read_to_string(&path)
        .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
    toml::from_str(&contents)
        .map_err(|e| Error::Config(format!("cannot parse {}: {e}", path.display())))
}

/// `<config_dir>/mailgrab/config.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("mailgrab").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credentials() -> Overrides {
        Overrides {
            server: Some("imap.example.com".into()),
            username: Some("me@example.com".into()),
            password: Some("hunter2".into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults() {
        let cfg = Config::resolve(FileConfig::default(), credentials()).unwrap();
        assert_eq!(cfg.server.port, 993);
        assert_eq!(cfg.folder, "INBOX");
        assert!(cfg.read_only);
        assert!(cfg.criteria.unseen_only);
        assert_eq!(cfg.criteria.subject_contains, None);
        assert_eq!(cfg.output_dir, PathBuf::from("output"));
        assert!(cfg.attachment_types.contains("application/pdf"));
        assert_eq!(cfg.command.as_ref().map(|c| c.to_string()).as_deref(), Some("stat '%s'"));
        assert_eq!(cfg.output_policy, OutputPolicy::Inherit);
        assert_eq!(cfg.on_message_error, MessageErrorPolicy::Abort);
        assert_eq!(cfg.fetch_queue, DEFAULT_FETCH_QUEUE);
        assert_eq!(cfg.log.level, Level::INFO);
    }

    #[test]
    fn test_missing_credentials() {
        let mut cli = credentials();
        cli.password = Some(String::new());
        let err = Config::resolve(FileConfig::default(), cli).unwrap_err();
        assert!(err.to_string().contains("EMAIL_PASSWORD"));
    }

    #[test]
    fn test_debug_level_captures_output() {
        let mut cli = credentials();
        cli.log_level = Some("DEBUG".into());
        let cfg = Config::resolve(FileConfig::default(), cli).unwrap();
        assert_eq!(cfg.output_policy, OutputPolicy::Capture);

        let mut cli = credentials();
        cli.log_level = Some("debug".into());
        cli.capture_output = Some(false);
        let cfg = Config::resolve(FileConfig::default(), cli).unwrap();
        assert_eq!(cfg.output_policy, OutputPolicy::Inherit);
    }

    #[test]
    fn test_empty_command_disables_post_processing() {
        let mut cli = credentials();
        cli.command = Some(String::new());
        let cfg = Config::resolve(FileConfig::default(), cli).unwrap();
        assert!(cfg.command.is_none());
    }

    #[test]
    fn test_bad_values_are_rejected() {
        let mut cli = credentials();
        cli.command = Some("echo".into());
        assert!(Config::resolve(FileConfig::default(), cli).is_err());

        let mut cli = credentials();
        cli.log_level = Some("loud".into());
        assert!(Config::resolve(FileConfig::default(), cli).is_err());

        let mut cli = credentials();
        cli.fetch_queue = Some(0);
        assert!(Config::resolve(FileConfig::default(), cli).is_err());
    }

    #[test]
    fn test_partial_file_uses_defaults_and_cli_wins() {
        let partial = r#"
[server]
address = "mail.example.org:143"
username = "file-user"
password = "file-pass"

[mailbox]
folder = "Invoices"
subject_filter = "Factura"

[general]
on_message_error = "continue"
log_format = "json"
"#;
        let file: FileConfig = toml::from_str(partial).expect("parse partial");
        let cli = Overrides {
            username: Some("cli-user".into()),
            ..Default::default()
        };
        let cfg = Config::resolve(file, cli).unwrap();
        assert_eq!(cfg.server.to_string(), "mail.example.org:143");
        assert_eq!(cfg.username, "cli-user");
        assert_eq!(cfg.password.expose(), "file-pass");
        assert_eq!(cfg.folder, "Invoices");
        assert_eq!(cfg.criteria.subject_contains.as_deref(), Some("Factura"));
        assert!(cfg.criteria.unseen_only);
        assert_eq!(cfg.on_message_error, MessageErrorPolicy::Continue);
        assert_eq!(cfg.log.format, LogFormat::Json);
    }

    #[test]
    fn test_password_is_redacted() {
        let cfg = Config::resolve(FileConfig::default(), credentials()).unwrap();
        assert!(!format!("{cfg:?}").contains("hunter2"));
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(load_file_config(Some(&tmp.path().join("nope.toml"))).is_err());
    }

    #[test]
    fn test_serialize_deserialize_roundtrip() {
        let cfg = FileConfig::default();
        let toml_str = toml::to_string_pretty(&cfg).expect("serialize");
        let parsed: FileConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.mailbox.folder, cfg.mailbox.folder);
        assert_eq!(parsed.output.command, cfg.output.command);
        assert_eq!(parsed.general.fetch_queue, cfg.general.fetch_queue);
    }
}
