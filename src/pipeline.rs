//! The pipeline driver: select, search, then stream messages through
//! extraction, filtering, writing and post-processing.
//!
//! Fetching runs on a scoped producer thread that feeds a bounded channel;
//! the calling thread consumes one message at a time. The producer's final
//! result is joined after the channel drains, and the run succeeds only if
//! both sides do.

use std::fmt;
use std::sync::mpsc::{self, Receiver};
use std::thread;

use humansize::{format_size, BINARY};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, error, info, warn};

use crate::config::{Config, MessageErrorPolicy};
use crate::error::{Error, Result};
use crate::export::attachment::AttachmentWriter;
use crate::filter::{AttachmentFilter, Decision, Rejection};
use crate::mailbox::{MailboxSession, SearchCriteria};
use crate::model::attachment::MimePart;
use crate::model::message::Message;
use crate::parser::mime::MimeEntity;
use crate::postprocess::PostProcessor;

/// Counters for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Messages matched by the search.
    pub matched: usize,
    /// Messages received from the fetch and processed.
    pub messages: usize,
    /// Messages whose body could not be parsed.
    pub failed_messages: usize,
    /// Attachments written to disk.
    pub saved: usize,
    /// Parts skipped by the filter (type not allowed or no name).
    pub skipped: usize,
    /// Unreadable sections, bad content types and write failures.
    pub part_errors: usize,
    /// Post-processing commands that failed or could not start.
    pub command_failures: usize,
    /// Total bytes written.
    pub bytes_written: u64,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Processing complete: {}/{} message(s), {} attachment(s) saved ({}), {} part(s) skipped",
            self.messages,
            self.matched,
            self.saved,
            format_size(self.bytes_written, BINARY),
            self.skipped,
        )?;
        let errors = self.failed_messages + self.part_errors + self.command_failures;
        if errors > 0 {
            write!(f, ", {errors} error(s)")?;
        }
        Ok(())
    }
}

/// How a run ended.
#[derive(Debug)]
pub enum Outcome {
    /// The selected folder holds no messages.
    EmptyFolder,
    /// No message matched the search criteria.
    NoMatches,
    /// Messages were streamed. `failure` is the fatal error, if any,
    /// from either the fetch or the processing side.
    Finished {
        summary: RunSummary,
        failure: Option<Error>,
    },
}

impl Outcome {
    /// Whether the process should exit with status 0.
    pub fn is_success(&self) -> bool {
        !matches!(
            self,
            Self::Finished {
                failure: Some(_),
                ..
            }
        )
    }
}

/// Drives one run against a [`MailboxSession`].
pub struct Pipeline {
    folder: String,
    read_only: bool,
    criteria: SearchCriteria,
    filter: AttachmentFilter,
    writer: AttachmentWriter,
    post: Option<PostProcessor>,
    strict_names: bool,
    on_message_error: MessageErrorPolicy,
    fetch_queue: usize,
    show_progress: bool,
}

impl Pipeline {
    /// Build every stage from the run configuration.
    pub fn new(config: &Config) -> Self {
        Self {
            folder: config.folder.clone(),
            read_only: config.read_only,
            criteria: config.criteria.clone(),
            filter: AttachmentFilter::new(config.attachment_types.clone(), &config.output_dir),
            writer: AttachmentWriter::new(&config.output_dir),
            post: config
                .command
                .clone()
                .map(|template| PostProcessor::new(template, config.output_policy)),
            strict_names: config.strict_names,
            on_message_error: config.on_message_error,
            fetch_queue: config.fetch_queue,
            show_progress: !config.log.is_verbose(),
        }
    }

    /// Enable or disable the progress bar.
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Create the output directory. Must succeed before [`run`](Self::run).
    pub fn prepare(&self) -> Result<()> {
        self.writer.prepare()
    }

    /// Select, search and process.
    ///
    /// Returns `Err` only for failures before streaming starts (selection,
    /// search); everything after that is reported through [`Outcome`].
    pub fn run<S: MailboxSession>(&self, session: &mut S) -> Result<Outcome> {
        let info = session.select_folder(&self.folder, self.read_only)?;
        if info.message_count == 0 {
            info!(folder = %info.name, "No messages found in the mailbox");
            return Ok(Outcome::EmptyFolder);
        }

        let ids = session.search(&self.criteria)?;
        if ids.is_empty() {
            info!(folder = %info.name, "No matching messages found");
            return Ok(Outcome::NoMatches);
        }
        debug!(count = ids.len(), "Processing filtered messages");

        let mut summary = RunSummary {
            matched: ids.len(),
            ..Default::default()
        };
        let progress = self.progress_bar(ids.len() as u64);

        let (consumed, fetched) = thread::scope(|scope| {
            let (tx, rx) = mpsc::sync_channel(self.fetch_queue);
            let ids = &ids;
            let producer = scope.spawn(move || session.fetch(ids, tx));
            let consumed = self.consume(rx, &progress, &mut summary);
            let fetched = producer.join().unwrap_or(Err(Error::ProducerPanicked));
            (consumed, fetched)
        });
        progress.finish_and_clear();

        let failure = match (consumed, fetched) {
            (Ok(()), Ok(())) => None,
            (Err(e), Ok(())) | (Ok(()), Err(e)) => Some(e),
            (Err(consumer), Err(producer)) => {
                error!(error = %producer, "Fetch also failed");
                Some(consumer)
            }
        };
        Ok(Outcome::Finished { summary, failure })
    }

    /// Drain the channel, one message at a time.
    fn consume(
        &self,
        rx: Receiver<Message>,
        progress: &ProgressBar,
        summary: &mut RunSummary,
    ) -> Result<()> {
        for message in rx {
            summary.messages += 1;
            debug!(
                seq = summary.messages,
                id = message.id,
                subject = %message.envelope.subject,
                sender = %message.envelope.sender,
                date = %message.envelope.date,
                "Processing message"
            );

            if let Err(e) = self.process_message(&message, summary) {
                summary.failed_messages += 1;
                error!(id = message.id, error = %e, "Failed to process message");
                if self.on_message_error == MessageErrorPolicy::Abort {
                    return Err(Error::MessageAborted {
                        id: message.id,
                        source: Box::new(e),
                    });
                }
            }
            progress.inc(1);
        }
        Ok(())
    }

    /// Run every leaf part of one message through the stages.
    ///
    /// Only a message that does not parse at all is an error here; part
    /// failures are logged, counted and skipped.
    fn process_message(&self, message: &Message, summary: &mut RunSummary) -> Result<()> {
        let entity = MimeEntity::parse(message.id, &message.body)?;
        debug!(id = message.id, multipart = entity.is_multipart(), "Parsed message body");

        for part in entity.parts() {
            let part = match part {
                Ok(part) => part,
                Err(e) => {
                    summary.part_errors += 1;
                    error!(id = message.id, error = %e, "Failed to read multipart section");
                    continue;
                }
            };

            let index = part.index;
            if let Err(e) = self.process_part(part, message, summary) {
                match e {
                    Error::Command { .. } | Error::CommandSpawn { .. } => {
                        summary.command_failures += 1
                    }
                    _ => summary.part_errors += 1,
                }
                error!(id = message.id, part = index, error = %e, "Failed to process attachment");
            }
        }
        Ok(())
    }

    fn process_part(
        &self,
        part: MimePart<'_>,
        message: &Message,
        summary: &mut RunSummary,
    ) -> Result<()> {
        let index = part.index;
        let candidate = match self.filter.accept(part)? {
            Decision::Accepted(candidate) => candidate,
            Decision::Rejected(Rejection::ContentType(_)) => {
                summary.skipped += 1;
                return Ok(());
            }
            Decision::Rejected(Rejection::NoName) => {
                summary.skipped += 1;
                if self.strict_names {
                    warn!(id = message.id, part = index, "Skipping unrecognized attachment");
                } else {
                    debug!(id = message.id, part = index, "Skipping part without a name");
                }
                return Ok(());
            }
        };

        let saved = self.writer.write(&candidate, message.envelope.date)?;
        summary.saved += 1;
        summary.bytes_written += saved.size;

        if let Some(post) = &self.post {
            post.run(&saved)?;
        }
        Ok(())
    }

    fn progress_bar(&self, total: u64) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(total);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} Progress [{bar:40.cyan/blue}] {percent}% ({pos}/{len})")
        {
            pb.set_style(style.progress_chars("#>-"));
        }
        pb
    }
}
