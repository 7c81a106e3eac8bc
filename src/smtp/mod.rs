//! SMTP intake — accepts submissions and hands each completed DATA
//! transaction to the [`SessionHandler`].
//!
//! Plain ESMTP only: no TLS, no AUTH, no pipelining. Every completed
//! transaction is answered with the handler's acknowledgment, so clients
//! never see a policy outcome.

pub mod command;

pub use command::Command;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::config::SmtpConfig;
use crate::error::SmtpError;
use crate::session::{InboundEnvelope, SessionHandler};

/// Longest command line accepted, terminator included.
const MAX_COMMAND_LINE: u64 = 4096;

pub struct SmtpServer {
    listener: TcpListener,
    config: Arc<SmtpConfig>,
    handler: Arc<SessionHandler>,
}

impl SmtpServer {
    pub async fn bind(config: SmtpConfig, handler: Arc<SessionHandler>) -> crate::error::Result<Self> {
        let listener = TcpListener::bind(config.listen_addr)
            .await
            .map_err(|source| SmtpError::Bind {
                addr: config.listen_addr.to_string(),
                source,
            })?;
        Ok(Self {
            listener,
            config: Arc::new(config),
            handler,
        })
    }

    pub fn local_addr(&self) -> crate::error::Result<SocketAddr> {
        Ok(self.listener.local_addr().map_err(SmtpError::from)?)
    }

    /// Accept connections until `shutdown` resolves.
    pub async fn run<F>(self, shutdown: F) -> crate::error::Result<()>
    where
        F: Future<Output = ()>,
    {
        info!(addr = %self.local_addr()?, "SMTP intake listening");
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("SMTP intake shutting down");
                    return Ok(());
                }
                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            warn!(error = %e, "Failed to accept SMTP connection");
                            continue;
                        }
                    };
                    let config = Arc::clone(&self.config);
                    let handler = Arc::clone(&self.handler);
                    tokio::spawn(async move {
                        debug!(%peer, "SMTP connection opened");
                        if let Err(e) = serve_connection(stream, &config, &handler).await {
                            debug!(%peer, error = %e, "SMTP connection ended with error");
                        }
                    });
                }
            }
        }
    }
}

/// Envelope fields collected between MAIL and DATA.
#[derive(Default)]
struct Transaction {
    mail_from: Option<String>,
    rcpt_tos: Vec<String>,
}

/// Result of reading one DATA section.
enum DataBody {
    Complete(Vec<u8>),
    TooLarge,
    TimedOut,
    Closed,
}

/// Speak SMTP on one connection until QUIT, EOF, or idle timeout.
pub async fn serve_connection<S>(
    stream: S,
    config: &SmtpConfig,
    handler: &SessionHandler,
) -> Result<(), SmtpError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut conn = BufReader::new(stream);
    let host = config.hostname.as_str();
    let mut greeted = false;
    let mut txn = Transaction::default();

    reply(&mut conn, &format!("220 {host} ESMTP")).await?;

    loop {
        let mut line = Vec::new();
        let read = tokio::time::timeout(
            config.idle_timeout,
            (&mut conn).take(MAX_COMMAND_LINE).read_until(b'\n', &mut line),
        )
        .await;

        let n = match read {
            Ok(result) => result?,
            Err(_) => {
                reply(&mut conn, &format!("421 {host} Error: timeout exceeded")).await?;
                return Ok(());
            }
        };
        if n == 0 {
            return Ok(());
        }
        if !line.ends_with(b"\n") {
            reply(&mut conn, "500 Error: line too long").await?;
            return Ok(());
        }

        let text = String::from_utf8_lossy(&line);
        match Command::parse(&text) {
            Command::Ehlo(client) => {
                greeted = true;
                txn = Transaction::default();
                let lines = [
                    format!("250-{host} greets {client}"),
                    format!("250-SIZE {}", config.max_message_bytes),
                    "250-8BITMIME".to_string(),
                    "250 HELP".to_string(),
                ];
                reply(&mut conn, &lines.join("\r\n")).await?;
            }
            Command::Helo(_) => {
                greeted = true;
                txn = Transaction::default();
                reply(&mut conn, &format!("250 {host}")).await?;
            }
            Command::Mail { from, size } => {
                if !greeted {
                    reply(&mut conn, "503 Error: send HELO first").await?;
                } else if txn.mail_from.is_some() {
                    reply(&mut conn, "503 Error: nested MAIL command").await?;
                } else if size.is_some_and(|s| s > config.max_message_bytes) {
                    reply(&mut conn, "552 Error: message size exceeds fixed maximum message size").await?;
                } else {
                    txn.mail_from = Some(from);
                    reply(&mut conn, "250 OK").await?;
                }
            }
            Command::Rcpt { to } => {
                if txn.mail_from.is_none() {
                    reply(&mut conn, "503 Error: need MAIL command").await?;
                } else {
                    txn.rcpt_tos.push(to);
                    reply(&mut conn, "250 OK").await?;
                }
            }
            Command::Data => {
                if txn.rcpt_tos.is_empty() {
                    reply(&mut conn, "503 Error: need RCPT command").await?;
                    continue;
                }
                reply(&mut conn, "354 End data with <CR><LF>.<CR><LF>").await?;

                let finished = std::mem::take(&mut txn);
                match read_data(&mut conn, config).await? {
                    DataBody::Complete(content) => {
                        let envelope = InboundEnvelope {
                            mail_from: finished.mail_from.unwrap_or_default(),
                            rcpt_tos: finished.rcpt_tos,
                            content,
                        };
                        let outcome = handler.handle(envelope).await;
                        debug!(
                            session_id = %outcome.session_id,
                            state = %outcome.state(),
                            "SMTP transaction complete"
                        );
                        reply(&mut conn, outcome.ack.smtp_reply()).await?;
                    }
                    DataBody::TooLarge => {
                        reply(&mut conn, "552 Error: Too much mail data").await?;
                    }
                    DataBody::TimedOut => {
                        reply(&mut conn, &format!("421 {host} Error: timeout exceeded")).await?;
                        return Ok(());
                    }
                    DataBody::Closed => return Ok(()),
                }
            }
            Command::Rset => {
                txn = Transaction::default();
                reply(&mut conn, "250 OK").await?;
            }
            Command::Noop => reply(&mut conn, "250 OK").await?,
            Command::Vrfy => {
                reply(
                    &mut conn,
                    "252 Cannot VRFY user, but will accept message and attempt delivery",
                )
                .await?
            }
            Command::Help => {
                reply(
                    &mut conn,
                    "214 Supported commands: EHLO HELO MAIL RCPT DATA RSET NOOP QUIT VRFY",
                )
                .await?
            }
            Command::Quit => {
                reply(&mut conn, &format!("221 {host} closing connection")).await?;
                return Ok(());
            }
            Command::StartTls | Command::Auth => {
                reply(&mut conn, "502 Error: command not implemented").await?
            }
            Command::Invalid(usage) => reply(&mut conn, &format!("501 {usage}")).await?,
            Command::Unknown(verb) => {
                reply(&mut conn, &format!("500 Error: command \"{verb}\" not recognized")).await?
            }
        }
    }
}

/// Read message lines up to the lone-dot terminator, undoing dot-stuffing.
///
/// Each read is capped just above the size limit, so a line without a
/// terminator cannot grow past it. Oversized messages are read to the
/// terminator and dropped.
async fn read_data<S>(conn: &mut BufReader<S>, config: &SmtpConfig) -> Result<DataBody, SmtpError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let chunk_limit = config.max_message_bytes as u64 + 3;
    let mut content = Vec::new();
    let mut too_large = false;
    let mut line_start = true;
    let mut line = Vec::new();

    loop {
        line.clear();
        let read = tokio::time::timeout(
            config.idle_timeout,
            (&mut *conn).take(chunk_limit).read_until(b'\n', &mut line),
        )
        .await;
        let n = match read {
            Ok(result) => result?,
            Err(_) => return Ok(DataBody::TimedOut),
        };
        if n == 0 {
            return Ok(DataBody::Closed);
        }

        let at_line_start = line_start;
        line_start = line.ends_with(b"\n");

        if at_line_start && (line == b".\r\n" || line == b".\n") {
            break;
        }
        if too_large {
            continue;
        }

        let unstuffed = match line.strip_prefix(b".") {
            Some(rest) if at_line_start => rest,
            _ => &line[..],
        };
        if content.len() + unstuffed.len() > config.max_message_bytes {
            too_large = true;
            content = Vec::new();
            continue;
        }
        content.extend_from_slice(unstuffed);
    }

    if too_large {
        Ok(DataBody::TooLarge)
    } else {
        Ok(DataBody::Complete(content))
    }
}

async fn reply<S>(conn: &mut BufReader<S>, line: &str) -> Result<(), SmtpError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let stream = conn.get_mut();
    stream.write_all(line.as_bytes()).await?;
    stream.write_all(b"\r\n").await?;
    stream.flush().await?;
    Ok(())
}
