//! Minimal IMAP4rev1 client over TLS.
//!
//! Blocking I/O on a `rustls` stream; [`ImapMailbox`] moves the session onto
//! `spawn_blocking` for every command so the async relay never blocks the runtime.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rustls_pki_types::ServerName;
use secrecy::ExposeSecret;
use tracing::{debug, info, warn};

use super::{Mailbox, MessageId};
use crate::config::MailboxConfig;
use crate::error::MailboxError;

const SOCKET_TIMEOUT: Duration = Duration::from_secs(30);
/// Largest `{n}` literal accepted from the server.
const MAX_LITERAL_BYTES: usize = 64 * 1024 * 1024;

/// TLS stream used for real sessions.
pub type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

// ── Protocol session ────────────────────────────────────────────────

/// One logical response line, with any `{n}` literals it carried.
#[derive(Debug, Default)]
struct ResponseLine {
    text: String,
    literals: Vec<Vec<u8>>,
}

/// A logged-in (or about to be) IMAP session over any byte stream.
pub struct ImapSession<S: Read + Write> {
    stream: BufReader<S>,
    next_tag: u32,
}

impl ImapSession<TlsStream> {
    /// Open a TCP + TLS connection and consume the server greeting.
    pub fn connect(host: &str, port: u16) -> Result<Self, MailboxError> {
        let connect_err = |reason: String| MailboxError::Connect {
            host: host.to_string(),
            port,
            reason,
        };

        let addrs = (host, port)
            .to_socket_addrs()
            .map_err(|e| connect_err(e.to_string()))?;
        let mut last_err = "no addresses resolved".to_string();
        let mut tcp = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, SOCKET_TIMEOUT) {
                Ok(stream) => {
                    tcp = Some(stream);
                    break;
                }
                Err(e) => last_err = e.to_string(),
            }
        }
        let tcp = tcp.ok_or_else(|| connect_err(last_err))?;
        tcp.set_read_timeout(Some(SOCKET_TIMEOUT))?;
        tcp.set_write_timeout(Some(SOCKET_TIMEOUT))?;

        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls_config = Arc::new(
            rustls::ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth(),
        );
        let server_name = ServerName::try_from(host.to_string())
            .map_err(|e| MailboxError::Tls(format!("invalid server name {host}: {e}")))?;
        let conn = rustls::ClientConnection::new(tls_config, server_name)
            .map_err(|e| MailboxError::Tls(e.to_string()))?;

        Self::handshake(rustls::StreamOwned::new(conn, tcp))
    }
}

impl<S: Read + Write> ImapSession<S> {
    /// Wrap an established stream and read the greeting.
    pub fn handshake(stream: S) -> Result<Self, MailboxError> {
        let mut session = Self {
            stream: BufReader::new(stream),
            next_tag: 1,
        };
        let greeting = session.read_response_line()?;
        if greeting.text.starts_with("* OK") || greeting.text.starts_with("* PREAUTH") {
            debug!(greeting = %greeting.text.trim_end(), "IMAP greeting");
            Ok(session)
        } else {
            Err(MailboxError::Protocol(format!(
                "unexpected greeting: {}",
                greeting.text.trim_end()
            )))
        }
    }

    pub fn login(&mut self, user: &str, password: &str) -> Result<(), MailboxError> {
        self.command_with("LOGIN", &[user, password])
            .map(drop)
            .map_err(|e| match e {
                MailboxError::CommandFailed { reason, .. } => MailboxError::AuthFailed {
                    user: user.to_string(),
                    reason,
                },
                other => other,
            })
    }

    pub fn select(&mut self, mailbox: &str) -> Result<(), MailboxError> {
        self.command_with("SELECT", &[mailbox]).map(drop)
    }

    /// UIDs of every message without the `\Seen` flag.
    pub fn search_unseen(&mut self) -> Result<Vec<MessageId>, MailboxError> {
        let lines = self.command("UID SEARCH UNSEEN")?;
        let mut ids = Vec::new();
        for line in &lines {
            let Some(rest) = line.text.strip_prefix("* SEARCH") else {
                continue;
            };
            for token in rest.split_whitespace() {
                let uid = token.parse::<u32>().map_err(|_| {
                    MailboxError::Protocol(format!("bad UID in SEARCH response: {token}"))
                })?;
                ids.push(MessageId(uid));
            }
        }
        Ok(ids)
    }

    /// Full RFC 822 source. `BODY.PEEK[]` leaves the `\Seen` flag untouched.
    pub fn fetch_raw(&mut self, id: MessageId) -> Result<Vec<u8>, MailboxError> {
        let lines = self.command(&format!("UID FETCH {id} BODY.PEEK[]"))?;
        lines
            .into_iter()
            .filter(|l| l.text.starts_with("* ") && l.text.contains("FETCH"))
            .find_map(|l| l.literals.into_iter().next())
            .ok_or_else(|| MailboxError::Protocol(format!("no body returned for UID {id}")))
    }

    /// Add `\Seen`. Storing a flag that is already set is a no-op on the server.
    pub fn mark_read(&mut self, id: MessageId) -> Result<(), MailboxError> {
        self.command(&format!("UID STORE {id} +FLAGS.SILENT (\\Seen)"))
            .map(drop)
    }

    pub fn logout(&mut self) -> Result<(), MailboxError> {
        self.command("LOGOUT").map(drop)
    }

    /// Send a tagged command without string arguments.
    fn command(&mut self, cmd: &str) -> Result<Vec<ResponseLine>, MailboxError> {
        self.command_with(cmd, &[])
    }

    /// Send a tagged command and collect responses up to its completion line.
    ///
    /// Each of `args` is sent as a quoted string when it is 7-bit, otherwise
    /// as a synchronizing `{n}` literal after the server's `+` continuation.
    fn command_with(
        &mut self,
        cmd: &str,
        args: &[&str],
    ) -> Result<Vec<ResponseLine>, MailboxError> {
        let tag = format!("A{:04}", self.next_tag);
        self.next_tag += 1;
        let prefix = format!("{tag} ");

        // Never includes the second argument (the password for LOGIN).
        let verb = match args.first() {
            Some(first) => format!("{cmd} \"{first}\""),
            None => cmd.split_whitespace().take(2).collect::<Vec<_>>().join(" "),
        };
        debug!(tag = %tag, command = %verb, "IMAP command");

        let mut lines = Vec::new();
        let mut pending = format!("{tag} {cmd}").into_bytes();
        for arg in args {
            match encode_string(arg)? {
                ImapString::Quoted(quoted) => {
                    pending.push(b' ');
                    pending.extend_from_slice(quoted.as_bytes());
                }
                ImapString::Literal(bytes) => {
                    pending.extend_from_slice(format!(" {{{}}}\r\n", bytes.len()).as_bytes());
                    self.send_bytes(&pending)?;
                    self.await_continuation(&prefix, &verb, &mut lines)?;
                    pending = bytes.to_vec();
                }
            }
        }
        pending.extend_from_slice(b"\r\n");
        self.send_bytes(&pending)?;

        loop {
            let line = self.read_response_line()?;
            if let Some(status) = line.text.strip_prefix(&prefix) {
                return tagged_result(status, verb).map(|()| lines);
            }
            if line.text.starts_with("* BYE") && verb != "LOGOUT" {
                warn!(response = %line.text.trim_end(), "IMAP server closing connection");
            }
            lines.push(line);
        }
    }

    fn send_bytes(&mut self, bytes: &[u8]) -> Result<(), MailboxError> {
        let writer = self.stream.get_mut();
        writer.write_all(bytes)?;
        writer.flush()?;
        Ok(())
    }

    /// Wait for `+` before sending literal bytes. A tagged reply here means
    /// the server refused the command.
    fn await_continuation(
        &mut self,
        prefix: &str,
        verb: &str,
        lines: &mut Vec<ResponseLine>,
    ) -> Result<(), MailboxError> {
        loop {
            let line = self.read_response_line()?;
            if line.text.starts_with('+') {
                return Ok(());
            }
            if let Some(status) = line.text.strip_prefix(prefix) {
                tagged_result(status, verb.to_string())?;
                return Err(MailboxError::Protocol(format!(
                    "{verb} completed before its literal was sent"
                )));
            }
            lines.push(line);
        }
    }

    /// Read one logical line, consuming any literals embedded in it.
    fn read_response_line(&mut self) -> Result<ResponseLine, MailboxError> {
        let mut response = ResponseLine::default();
        loop {
            let mut raw = Vec::new();
            if self.stream.read_until(b'\n', &mut raw)? == 0 {
                return Err(MailboxError::Closed);
            }
            let chunk = String::from_utf8_lossy(&raw);
            response.text.push_str(&chunk);

            let Some(len) = literal_len(&chunk) else {
                return Ok(response);
            };
            if len > MAX_LITERAL_BYTES {
                return Err(MailboxError::Protocol(format!(
                    "server literal of {len} bytes exceeds the {MAX_LITERAL_BYTES}-byte limit"
                )));
            }
            let mut literal = vec![0; len];
            self.stream.read_exact(&mut literal)?;
            response.literals.push(literal);
        }
    }
}

/// Length announced by a trailing `{n}` literal marker, if any.
fn literal_len(line: &str) -> Option<usize> {
    let body = line.trim_end_matches(['\r', '\n']).strip_suffix('}')?;
    let open = body.rfind('{')?;
    body[open + 1..].parse().ok()
}

/// How a string argument goes on the wire.
#[derive(Debug, PartialEq, Eq)]
enum ImapString<'a> {
    Quoted(String),
    Literal(&'a [u8]),
}

/// Encode a string argument: quoted strings must be 7-bit, anything else is
/// sent as a literal.
fn encode_string(value: &str) -> Result<ImapString<'_>, MailboxError> {
    if value.contains(['\r', '\n', '\0']) {
        return Err(MailboxError::Protocol(
            "line breaks are not allowed in IMAP strings".into(),
        ));
    }
    if !value.is_ascii() {
        return Ok(ImapString::Literal(value.as_bytes()));
    }
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    Ok(ImapString::Quoted(format!("\"{escaped}\"")))
}

/// Map the status after a tag to success or `CommandFailed`.
fn tagged_result(status: &str, command: String) -> Result<(), MailboxError> {
    let status = status.trim_end();
    if status.starts_with("OK") {
        Ok(())
    } else {
        Err(MailboxError::CommandFailed {
            command,
            reason: status.to_string(),
        })
    }
}

// ── Async collaborator ──────────────────────────────────────────────

/// [`Mailbox`] backed by a real IMAP session.
pub struct ImapMailbox<S: Read + Write + Send + 'static = TlsStream> {
    session: Option<ImapSession<S>>,
}

impl ImapMailbox<TlsStream> {
    /// Connect and log in. Fails the run if either step fails.
    pub async fn connect(config: &MailboxConfig) -> Result<Self, MailboxError> {
        let host = config.imap_host.clone();
        let port = config.imap_port;
        let user = config.username.clone();
        let password = config.password.clone();

        let session = tokio::task::spawn_blocking(move || {
            let mut session = ImapSession::connect(&host, port)?;
            session.login(&user, password.expose_secret())?;
            Ok::<_, MailboxError>(session)
        })
        .await
        .map_err(|e| MailboxError::Protocol(format!("IMAP connect task failed: {e}")))??;

        info!(host = %config.imap_host, user = %config.username, "Logged in to IMAP");
        Ok(Self::from_session(session))
    }
}

impl<S: Read + Write + Send + 'static> ImapMailbox<S> {
    pub fn from_session(session: ImapSession<S>) -> Self {
        Self {
            session: Some(session),
        }
    }

    /// Run one blocking step on the session off the async runtime.
    async fn blocking<T, F>(&mut self, step: F) -> Result<T, MailboxError>
    where
        T: Send + 'static,
        F: FnOnce(&mut ImapSession<S>) -> Result<T, MailboxError> + Send + 'static,
    {
        let mut session = self.session.take().ok_or(MailboxError::Closed)?;
        let (session, result) = tokio::task::spawn_blocking(move || {
            let result = step(&mut session);
            (session, result)
        })
        .await
        .map_err(|e| MailboxError::Protocol(format!("IMAP task failed: {e}")))?;
        self.session = Some(session);
        result
    }
}

#[async_trait]
impl<S: Read + Write + Send + 'static> Mailbox for ImapMailbox<S> {
    async fn select(&mut self, mailbox: &str) -> Result<(), MailboxError> {
        let mailbox = mailbox.to_string();
        self.blocking(move |s| s.select(&mailbox)).await
    }

    async fn search_unseen(&mut self) -> Result<Vec<MessageId>, MailboxError> {
        self.blocking(|s| s.search_unseen()).await
    }

    async fn fetch_raw(&mut self, id: MessageId) -> Result<Vec<u8>, MailboxError> {
        self.blocking(move |s| s.fetch_raw(id)).await
    }

    async fn mark_read(&mut self, id: MessageId) -> Result<(), MailboxError> {
        self.blocking(move |s| s.mark_read(id)).await
    }

    async fn logout(&mut self) -> Result<(), MailboxError> {
        let result = self.blocking(|s| s.logout()).await;
        self.session = None;
        result
    }
}
