//! CLI entry point for `mailgrab`.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing::{debug, error};

use mailgrab::config::{self, Config, LogConfig, LogFormat, MessageErrorPolicy, Overrides};
use mailgrab::mailbox::imap::ImapSession;
use mailgrab::mailbox::MailboxSession;
use mailgrab::pipeline::{Outcome, Pipeline};

/// Every setting is a named flag that can also come from the environment
/// variable shown in `--help`.
#[derive(Parser)]
#[command(
    name = "mailgrab",
    version,
    about = "Save attachments from an IMAP mailbox and run a command on each one"
)]
struct Cli {
    /// TOML config file with defaults for any of the settings below
    #[arg(long, env = config::CONFIG_ENV, value_name = "FILE")]
    config: Option<PathBuf>,

    /// IMAP server, port defaults to 993
    #[arg(long, env = "IMAP_SERVER", value_name = "HOST[:PORT]")]
    server: Option<String>,

    /// Login name
    #[arg(long, env = "EMAIL_USERNAME")]
    username: Option<String>,

    /// Login password
    #[arg(long, env = "EMAIL_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Directory attachments are saved to [default: output]
    #[arg(short, long, env = "OUTPUT_DIR", value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// Folder to process [default: INBOX]
    #[arg(long, env = "IMAP_FOLDER")]
    folder: Option<String>,

    /// Only messages whose subject contains this text
    #[arg(long, env = "SUBJECT_FILTER", value_name = "TEXT")]
    subject: Option<String>,

    /// Only messages whose sender contains this text
    #[arg(long, env = "SENDER_FILTER", value_name = "TEXT")]
    sender: Option<String>,

    /// Only unseen messages [default: true]
    #[arg(long, env = "UNSEEN_ONLY", value_name = "BOOL")]
    unseen_only: Option<bool>,

    /// Open the folder read-only so no flags change [default: true]
    #[arg(long, env = "READ_ONLY", value_name = "BOOL")]
    read_only: Option<bool>,

    /// Comma-separated content types to save [default: application/pdf]
    #[arg(short = 't', long, env = "ATTACHMENT_TYPES", value_name = "TYPES")]
    attachment_types: Option<String>,

    /// Command run for each saved file, `%s` is the path; empty disables [default: stat '%s']
    #[arg(short, long, env = "COMMAND")]
    command: Option<String>,

    /// Capture command output into `<file>.out` [default: true at debug level]
    #[arg(long, env = "CAPTURE_OUTPUT", value_name = "BOOL")]
    capture_output: Option<bool>,

    /// Warn about allowed parts that carry no filename
    #[arg(long, env = "STRICT_NAMES", value_name = "BOOL")]
    strict_names: Option<bool>,

    /// What an unparseable message does to the run [default: abort]
    #[arg(long, env = "ON_MESSAGE_ERROR", value_enum)]
    on_message_error: Option<MessageErrorPolicy>,

    /// Messages fetched ahead of processing [default: 10]
    #[arg(long, env = "FETCH_QUEUE", value_name = "N")]
    fetch_queue: Option<usize>,

    /// Log level: error, warn, info, debug, trace [default: info]
    #[arg(long, env = "LOG_LEVEL", value_name = "LEVEL")]
    log_level: Option<String>,

    /// Log line format [default: text]
    #[arg(long, env = "LOG_FORMAT", value_enum)]
    log_format: Option<LogFormat>,

    /// Also append logs to this file
    #[arg(long, env = "LOG_FILE", value_name = "FILE")]
    log_file: Option<PathBuf>,

    /// Verbose logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn into_overrides(self) -> Overrides {
        let log_level = match self.verbose {
            0 => self.log_level,
            1 => Some("debug".to_string()),
            _ => Some("trace".to_string()),
        };
        Overrides {
            server: self.server,
            username: self.username,
            password: self.password,
            output_dir: self.output_dir,
            folder: self.folder,
            subject_filter: self.subject,
            sender_filter: self.sender,
            unseen_only: self.unseen_only,
            read_only: self.read_only,
            attachment_types: self.attachment_types,
            command: self.command,
            capture_output: self.capture_output,
            strict_names: self.strict_names,
            log_level,
            log_format: self.log_format,
            log_file: self.log_file,
            on_message_error: self.on_message_error,
            fetch_queue: self.fetch_queue,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let file = match config::load_file_config(cli.config.as_deref()) {
        Ok(file) => file,
        Err(e) => return config_failure(&e),
    };
    let config = match Config::resolve(file, cli.into_overrides()) {
        Ok(config) => config,
        Err(e) => return config_failure(&e),
    };

    setup_logging(&config.log);
    debug!(?config, "Resolved configuration");

    match run(&config) {
        Ok(outcome) if outcome.is_success() => ExitCode::SUCCESS,
        Ok(_) => ExitCode::FAILURE,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Log a configuration error with a default subscriber, since the
/// configured one could not be built.
fn config_failure(e: &mailgrab::error::Error) -> ExitCode {
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();
    error!("{e}");
    ExitCode::FAILURE
}

/// Connect, run the pipeline and report.
fn run(config: &Config) -> anyhow::Result<Outcome> {
    let pipeline = Pipeline::new(config);
    pipeline.prepare()?;

    let mut session = ImapSession::connect(
        &config.server,
        &config.username,
        config.password.expose(),
    )
    .context("Failed with IMAP client")?;

    let outcome = pipeline.run(&mut session);
    session.logout();
    let outcome = outcome?;

    if let Outcome::Finished { summary, failure } = &outcome {
        println!("{summary}");
        if let Some(e) = failure {
            error!(error = %e, "Run failed");
        }
    }
    Ok(outcome)
}

/// Set up tracing with stderr output and optional file logging.
///
/// `RUST_LOG` takes precedence over the configured level.
fn setup_logging(log: &LogConfig) {
    use tracing_subscriber::filter::LevelFilter;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::{EnvFilter, Layer, Registry};

    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(log.level).into())
        .from_env_lossy();

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();
    layers.push(match log.format {
        LogFormat::Text => tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .boxed(),
    });

    if let Some(path) = &log.file {
        let dir = path
            .parent()
            .filter(|d| !d.as_os_str().is_empty())
            .unwrap_or(std::path::Path::new("."));
        match path.file_name() {
            Some(name) if std::fs::create_dir_all(dir).is_ok() => {
                let file_appender = tracing_appender::rolling::never(dir, name);
                layers.push(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(file_appender)
                        .boxed(),
                );
            }
            _ => eprintln!("Cannot log to {}, using stderr only", path.display()),
        }
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(env_filter)
        .init();
}
