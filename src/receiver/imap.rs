use async_imap::{Client, Session};
use async_trait::async_trait;
use futures::TryStreamExt;
use log::info;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_native_tls::TlsStream;
use tokio_util::compat::{Compat, TokioAsyncReadCompatExt};

use crate::receiver::error::ReceiverError;
use crate::receiver::settings::ConnectionSpec;

/// The transport operations the execution pipeline needs. The real
/// implementation is [`ImapTransport`]; tests substitute a recording
/// fake to verify ordering and cleanup behavior.
#[async_trait]
pub trait MailTransport: Send {
    /// Session-scoped identifiers of unseen messages, in mailbox order.
    async fn search_unseen(&mut self) -> Result<Vec<u32>, ReceiverError>;

    /// Raw RFC822 bytes of one message, fetched without touching flags.
    async fn fetch(&mut self, id: u32) -> Result<Vec<u8>, ReceiverError>;

    async fn logout(&mut self) -> Result<(), ReceiverError>;
}

/// An authenticated IMAP session with INBOX opened read-only.
///
/// Two variants because the stream type differs between an upgraded
/// TLS connection and a plaintext one (opportunistic mode against a
/// server without STARTTLS).
pub enum ImapTransport {
    Tls(Session<Compat<TlsStream<TcpStream>>>),
    Plain(Session<Compat<TcpStream>>),
}

impl ImapTransport {
    /// Connect to the configured server, negotiate transport security,
    /// authenticate, and open INBOX read-only.
    ///
    /// `use_ssl = true` makes STARTTLS mandatory: the connection fails
    /// when the server refuses the upgrade. `use_ssl = false` upgrades
    /// only when the server advertises STARTTLS and otherwise stays in
    /// plaintext.
    pub async fn connect(spec: &ConnectionSpec) -> Result<Self, ReceiverError> {
        let mut tcp_stream = TcpStream::connect((spec.host.as_str(), spec.port))
            .await
            .map_err(|e| {
                ReceiverError::Connection(format!(
                    "cannot reach {}:{}: {}",
                    spec.host, spec.port, e
                ))
            })?;

        let greeting = read_response_line(&mut tcp_stream).await?;
        if !greeting.starts_with("* OK") && !greeting.starts_with("* PREAUTH") {
            return Err(ReceiverError::Connection(format!(
                "unexpected server greeting: {}",
                greeting.trim_end()
            )));
        }

        let upgrade = if spec.use_ssl {
            true
        } else {
            starttls_advertised(&mut tcp_stream).await?
        };

        if upgrade {
            request_starttls(&mut tcp_stream).await?;
            let connector = native_tls::TlsConnector::new()
                .map_err(|e| ReceiverError::Connection(format!("TLS setup failed: {}", e)))?;
            let tls = tokio_native_tls::TlsConnector::from(connector);
            let tls_stream = tls.connect(&spec.host, tcp_stream).await.map_err(|e| {
                ReceiverError::Connection(format!("TLS handshake with {} failed: {}", spec.host, e))
            })?;
            info!("-- connected to {}:{} (TLS)", spec.host, spec.port);

            let client = Client::new(tls_stream.compat());
            Ok(Self::Tls(login_and_open_inbox(client, spec).await?))
        } else {
            info!("-- connected to {}:{} (plaintext)", spec.host, spec.port);

            let client = Client::new(tcp_stream.compat());
            Ok(Self::Plain(login_and_open_inbox(client, spec).await?))
        }
    }
}

#[async_trait]
impl MailTransport for ImapTransport {
    async fn search_unseen(&mut self) -> Result<Vec<u32>, ReceiverError> {
        match self {
            Self::Tls(session) => search_unseen_in(session).await,
            Self::Plain(session) => search_unseen_in(session).await,
        }
    }

    async fn fetch(&mut self, id: u32) -> Result<Vec<u8>, ReceiverError> {
        match self {
            Self::Tls(session) => fetch_in(session, id).await,
            Self::Plain(session) => fetch_in(session, id).await,
        }
    }

    async fn logout(&mut self) -> Result<(), ReceiverError> {
        match self {
            Self::Tls(session) => session.logout().await,
            Self::Plain(session) => session.logout().await,
        }
        .map_err(|e| ReceiverError::Connection(format!("logout failed: {}", e)))
    }
}

// Login to the IMAP server and open INBOX read-only (EXAMINE keeps
// every flag untouched, matching the never-mark-seen contract).
async fn login_and_open_inbox<S>(
    client: Client<S>,
    spec: &ConnectionSpec,
) -> Result<Session<S>, ReceiverError>
where
    S: futures::AsyncRead + futures::AsyncWrite + Unpin + std::fmt::Debug + Send,
{
    let mut session = client
        .login(&spec.username, &spec.password)
        .await
        .map_err(|(e, _)| {
            ReceiverError::Authentication(format!("login rejected for {}: {}", spec.username, e))
        })?;
    info!("-- logged in as {}", spec.username);

    session
        .examine("INBOX")
        .await
        .map_err(|e| ReceiverError::Search(format!("cannot open INBOX: {}", e)))?;
    info!("-- INBOX selected read-only");

    Ok(session)
}

async fn search_unseen_in<S>(session: &mut Session<S>) -> Result<Vec<u32>, ReceiverError>
where
    S: futures::AsyncRead + futures::AsyncWrite + Unpin + std::fmt::Debug + Send,
{
    let ids = session
        .search("UNSEEN")
        .await
        .map_err(|e| ReceiverError::Search(format!("UNSEEN search failed: {}", e)))?;

    // The search result arrives as a set; sorting restores the
    // ascending mailbox order the server reported.
    let mut ids: Vec<u32> = ids.into_iter().collect();
    ids.sort_unstable();
    Ok(ids)
}

async fn fetch_in<S>(session: &mut Session<S>, id: u32) -> Result<Vec<u8>, ReceiverError>
where
    S: futures::AsyncRead + futures::AsyncWrite + Unpin + std::fmt::Debug + Send,
{
    let fetch_error = |reason: String| ReceiverError::Fetch { id, reason };

    let messages_stream = session
        .fetch(id.to_string(), "BODY.PEEK[]")
        .await
        .map_err(|e| fetch_error(e.to_string()))?;
    let messages: Vec<_> = messages_stream
        .try_collect()
        .await
        .map_err(|e| fetch_error(e.to_string()))?;

    let message = messages
        .first()
        .ok_or_else(|| fetch_error("server returned no data".to_string()))?;
    let body = message
        .body()
        .ok_or_else(|| fetch_error("message has no body".to_string()))?;
    Ok(body.to_vec())
}

// ── STARTTLS pre-handshake ──────────────────────────────────────────
//
// async-imap takes over the stream only after the transport security
// question is settled, so the greeting/CAPABILITY/STARTTLS exchange
// happens directly on the TCP stream. Tags use an "x" prefix to stay
// clear of the tags async-imap generates afterwards.

async fn read_response_line(stream: &mut TcpStream) -> Result<String, ReceiverError> {
    let mut buf = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        let n = stream.read(&mut byte).await.map_err(|e| {
            ReceiverError::Connection(format!("read failed during handshake: {}", e))
        })?;
        if n == 0 {
            return Err(ReceiverError::Connection(
                "connection closed during handshake".to_string(),
            ));
        }
        buf.push(byte[0]);
        if buf.ends_with(b"\r\n") {
            return Ok(String::from_utf8_lossy(&buf).into_owned());
        }
    }
}

// Send one command and collect response lines up to the tagged one.
async fn send_handshake_command(
    stream: &mut TcpStream,
    tag: &str,
    command: &str,
) -> Result<Vec<String>, ReceiverError> {
    stream
        .write_all(format!("{} {}\r\n", tag, command).as_bytes())
        .await
        .map_err(|e| ReceiverError::Connection(format!("write failed during handshake: {}", e)))?;

    let mut lines = Vec::new();
    loop {
        let line = read_response_line(stream).await?;
        let done = line.starts_with(tag);
        lines.push(line);
        if done {
            return Ok(lines);
        }
    }
}

async fn starttls_advertised(stream: &mut TcpStream) -> Result<bool, ReceiverError> {
    let lines = send_handshake_command(stream, "x1", "CAPABILITY").await?;
    Ok(capabilities_include_starttls(&lines))
}

async fn request_starttls(stream: &mut TcpStream) -> Result<(), ReceiverError> {
    let lines = send_handshake_command(stream, "x2", "STARTTLS").await?;
    match lines.last() {
        Some(line) if is_tagged_ok(line, "x2") => Ok(()),
        Some(line) => Err(ReceiverError::Connection(format!(
            "server refused STARTTLS: {}",
            line.trim_end()
        ))),
        None => Err(ReceiverError::Connection(
            "no response to STARTTLS".to_string(),
        )),
    }
}

fn capabilities_include_starttls(lines: &[String]) -> bool {
    lines
        .iter()
        .any(|line| line.to_ascii_uppercase().contains("STARTTLS"))
}

fn is_tagged_ok(line: &str, tag: &str) -> bool {
    line.strip_prefix(tag)
        .and_then(|rest| rest.strip_prefix(' '))
        .is_some_and(|rest| rest.starts_with("OK"))
}
