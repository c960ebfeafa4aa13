//! Post-processing: run a shell command template against each saved attachment.
//!
//! The template is run through `sh -c`, so it may use pipes and
//! redirection. The substituted path is escaped for the quoting context
//! the `%s` placeholder sits in, which keeps names taken from message
//! headers from injecting shell syntax.

use std::fmt;
use std::fs;
use std::path::Path;
use std::process::{Command, Stdio};

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::model::attachment::{CommandResult, SavedAttachment};

/// Shell quoting state at the position of the placeholder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Quoting {
    Bare,
    Single,
    Double,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Path(Quoting),
}

/// A command line containing exactly one `%s` placeholder for the saved path.
///
/// `%%` stands for a literal `%`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl CommandTemplate {
    /// Parse a template, requiring exactly one `%s`.
    pub fn parse(template: &str) -> Result<Self> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut quoting = Quoting::Bare;
        let mut escaped = false;
        let mut placeholders = 0usize;
        let mut chars = template.chars().peekable();

        while let Some(c) = chars.next() {
            if c == '%' {
                match chars.peek() {
                    Some('s') => {
                        chars.next();
                        placeholders += 1;
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                        segments.push(Segment::Path(quoting));
                        escaped = false;
                        continue;
                    }
                    Some('%') => {
                        chars.next();
                    }
                    _ => {}
                }
                literal.push('%');
                escaped = false;
                continue;
            }

            literal.push(c);
            if escaped {
                escaped = false;
                continue;
            }
            quoting = match (quoting, c) {
                (Quoting::Bare, '\'') => Quoting::Single,
                (Quoting::Bare, '"') => Quoting::Double,
                (Quoting::Single, '\'') | (Quoting::Double, '"') => Quoting::Bare,
                (Quoting::Bare | Quoting::Double, '\\') => {
                    escaped = true;
                    quoting
                }
                (q, _) => q,
            };
        }
        segments.push(Segment::Literal(literal));

        if placeholders != 1 {
            return Err(Error::Config(format!(
                "command template must contain exactly one %s placeholder, found {placeholders}: {template:?}"
            )));
        }

        Ok(Self {
            source: template.to_string(),
            segments,
        })
    }

    /// Produce the shell command line for `path`.
    pub fn render(&self, path: &Path) -> String {
        let value = path.to_string_lossy();
        let mut out = String::with_capacity(self.source.len() + value.len() + 8);
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Path(Quoting::Single) => out.push_str(&value.replace('\'', r"'\''")),
                Segment::Path(Quoting::Double) => {
                    for c in value.chars() {
                        if matches!(c, '\\' | '"' | '$' | '`') {
                            out.push('\\');
                        }
                        out.push(c);
                    }
                }
                Segment::Path(Quoting::Bare) => {
                    out.push('\'');
                    out.push_str(&value.replace('\'', r"'\''"));
                    out.push('\'');
                }
            }
        }
        out
    }
}

impl fmt::Display for CommandTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// How command output is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputPolicy {
    /// Inherit the standard streams; only the exit status is observed.
    Inherit,
    /// Capture stdout and stderr together into `<path>.out`.
    Capture,
}

/// Runs the configured command once per saved attachment. Never retries.
#[derive(Debug, Clone)]
pub struct PostProcessor {
    template: CommandTemplate,
    policy: OutputPolicy,
}

impl PostProcessor {
    /// Create a post-processor.
    pub fn new(template: CommandTemplate, policy: OutputPolicy) -> Self {
        Self { template, policy }
    }

    /// Run the command for one saved attachment.
    ///
    /// Under [`OutputPolicy::Capture`] the sidecar file is written before a
    /// non-zero exit status is turned into [`Error::Command`], so the
    /// diagnostic output survives the failure.
    pub fn run(&self, saved: &SavedAttachment) -> Result<CommandResult> {
        let line = self.template.render(&saved.path);
        debug!(command = %line, "Running command");

        let result = match self.policy {
            OutputPolicy::Inherit => {
                let status = Command::new("sh")
                    .arg("-c")
                    .arg(&line)
                    .status()
                    .map_err(|source| Error::CommandSpawn {
                        path: saved.path.clone(),
                        source,
                    })?;
                CommandResult {
                    status,
                    output: Vec::new(),
                }
            }
            OutputPolicy::Capture => {
                let output = Command::new("sh")
                    .arg("-c")
                    .arg(format!("exec 2>&1\n{line}"))
                    .stdin(Stdio::null())
                    .output()
                    .map_err(|source| Error::CommandSpawn {
                        path: saved.path.clone(),
                        source,
                    })?;
                let sidecar = saved.sidecar_path();
                fs::write(&sidecar, &output.stdout).map_err(|e| Error::write(&sidecar, e))?;
                debug!(
                    sidecar = %sidecar.display(),
                    "Command output written"
                );
                CommandResult {
                    status: output.status,
                    output: output.stdout,
                }
            }
        };

        if !result.status.success() {
            return Err(Error::Command {
                path: saved.path.clone(),
                status: result.status,
            });
        }

        info!(path = %saved.path.display(), "Command executed successfully");
        Ok(result)
    }
}
