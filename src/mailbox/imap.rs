//! IMAP over TLS implementation of [`MailboxSession`].

use std::fmt;
use std::net::TcpStream;
use std::str::FromStr;
use std::sync::mpsc::SyncSender;

use chrono::Utc;
use native_tls::{TlsConnector, TlsStream};
use tracing::{debug, warn};

use super::{MailboxInfo, MailboxSession, SearchCriteria};
use crate::error::{Error, Result};
use crate::model::message::{Message, MessageId};

/// Implicit-TLS IMAP port.
pub const DEFAULT_PORT: u16 = 993;

/// Items requested per message. `RFC822` (unlike `BODY.PEEK[]`) marks the
/// message `\Seen` when the folder was selected read-write.
const FETCH_ITEMS: &str = "(UID INTERNALDATE RFC822)";

/// `host[:port]` of the IMAP server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerAddress {
    /// Host name, also used for TLS certificate verification.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl FromStr for ServerAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (host, port) = match s.rsplit_once(':') {
            Some((host, port)) if !host.contains(':') => {
                let port = port
                    .parse()
                    .map_err(|_| Error::Config(format!("invalid port in server address {s:?}")))?;
                (host, port)
            }
            _ => (s, DEFAULT_PORT),
        };
        if host.is_empty() {
            return Err(Error::Config("server address is empty".into()));
        }
        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// An authenticated IMAP session.
pub struct ImapSession {
    session: ::imap::Session<TlsStream<TcpStream>>,
}

impl ImapSession {
    /// Open a TLS connection and log in.
    pub fn connect(server: &ServerAddress, username: &str, password: &str) -> Result<Self> {
        let connect_err = |reason: String| Error::Connect {
            server: server.to_string(),
            reason,
        };

        let tls = TlsConnector::builder()
            .build()
            .map_err(|e| connect_err(e.to_string()))?;
        let client = ::imap::connect(
            (server.host.as_str(), server.port),
            server.host.as_str(),
            &tls,
        )
        .map_err(|e| connect_err(e.to_string()))?;

        let session = client
            .login(username, password)
            .map_err(|(e, _client)| Error::Auth {
                user: username.to_string(),
                reason: e.to_string(),
            })?;

        debug!(server = %server, user = username, "Logged in");
        Ok(Self { session })
    }
}

impl MailboxSession for ImapSession {
    fn select_folder(&mut self, name: &str, read_only: bool) -> Result<MailboxInfo> {
        let selected = if read_only {
            self.session.examine(name)
        } else {
            self.session.select(name)
        };
        let mailbox = selected.map_err(|e| Error::Select {
            folder: name.to_string(),
            reason: e.to_string(),
        })?;

        debug!(
            folder = name,
            messages = mailbox.exists,
            read_only,
            "Connected to mailbox"
        );
        Ok(MailboxInfo {
            name: name.to_string(),
            message_count: mailbox.exists,
        })
    }

    fn search(&mut self, criteria: &SearchCriteria) -> Result<Vec<MessageId>> {
        let query = criteria.to_imap_query();
        debug!(query = %query, "Searching");
        let mut uids: Vec<MessageId> = self
            .session
            .uid_search(&query)
            .map_err(|e| Error::Search(e.to_string()))?
            .into_iter()
            .collect();
        uids.sort_unstable();
        Ok(uids)
    }

    // One UID per round trip: the `imap` crate buffers a whole FETCH
    // response, so this is what lets parsing overlap with the transfer.
    fn fetch(&mut self, ids: &[MessageId], sink: SyncSender<Message>) -> Result<()> {
        for &uid in ids {
            let fetches = self
                .session
                .uid_fetch(uid.to_string(), FETCH_ITEMS)
                .map_err(|e| Error::Fetch(format!("uid {uid}: {e}")))?;

            for fetch in fetches.iter() {
                let Some(body) = fetch.body() else {
                    warn!(uid, "Server returned no body");
                    continue;
                };
                let internal_date = fetch.internal_date().map(|d| d.with_timezone(&Utc));
                let message =
                    Message::from_rfc822(fetch.uid.unwrap_or(uid), body.to_vec(), internal_date);

                if sink.send(message).is_err() {
                    debug!(uid, "Consumer stopped, ending fetch");
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    fn logout(&mut self) {
        if let Err(e) = self.session.logout() {
            debug!(error = %e, "Logout failed");
        }
    }
}
