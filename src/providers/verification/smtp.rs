//! L4 SMTP probe: connect to a mailbox's MX host and issue `EHLO`/`MAIL
//! FROM`/`RCPT TO` without `DATA`, interpreting the server's response to
//! `RCPT TO` (spec §4.5). Many servers grey-list unknown senders, so a 4xx
//! response is treated as inconclusive rather than negative.

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::Duration;

use crate::logging::log_debug;

/// Outcome of a single `RCPT TO` probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmtpProbeOutcome {
    /// Server accepted the recipient (250).
    Accepted,
    /// Server rejected the recipient (550 or similar 5xx).
    Rejected,
    /// Server grey-listed, timed out, or gave an ambiguous response.
    Inconclusive,
}

const PROBE_TIMEOUT: Duration = Duration::from_secs(8);

/// Probe `mailbox` at `mx_host:25` using `probe_from` as the envelope
/// sender. Never sends `DATA`.
pub async fn probe_mailbox(mx_host: &str, probe_from: &str, mailbox: &str) -> SmtpProbeOutcome {
    match tokio::time::timeout(PROBE_TIMEOUT, run_probe(mx_host, probe_from, mailbox)).await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(err)) => {
            log_debug!(mx_host = %mx_host, error = %err, "SMTP probe failed");
            SmtpProbeOutcome::Inconclusive
        }
        Err(_) => SmtpProbeOutcome::Inconclusive,
    }
}

async fn run_probe(
    mx_host: &str,
    probe_from: &str,
    mailbox: &str,
) -> std::io::Result<SmtpProbeOutcome> {
    let stream = TcpStream::connect((mx_host, 25)).await?;
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    read_line(&mut reader).await?; // greeting

    write_half
        .write_all(format!("EHLO captely.com\r\n").as_bytes())
        .await?;
    drain_multiline(&mut reader).await?;

    write_half
        .write_all(format!("MAIL FROM:<{probe_from}>\r\n").as_bytes())
        .await?;
    let mail_from_reply = read_line(&mut reader).await?;
    if !mail_from_reply.starts_with('2') {
        return Ok(SmtpProbeOutcome::Inconclusive);
    }

    write_half
        .write_all(format!("RCPT TO:<{mailbox}>\r\n").as_bytes())
        .await?;
    let rcpt_reply = read_line(&mut reader).await?;

    write_half.write_all(b"QUIT\r\n").await?;

    Ok(match rcpt_reply.as_bytes().first() {
        Some(b'2') => SmtpProbeOutcome::Accepted,
        Some(b'5') => SmtpProbeOutcome::Rejected,
        _ => SmtpProbeOutcome::Inconclusive,
    })
}

async fn read_line<R: tokio::io::AsyncBufRead + Unpin>(reader: &mut R) -> std::io::Result<String> {
    let mut line = String::new();
    reader.read_line(&mut line).await?;
    Ok(line)
}

async fn drain_multiline<R: tokio::io::AsyncBufRead + Unpin>(reader: &mut R) -> std::io::Result<()> {
    loop {
        let line = read_line(reader).await?;
        if line.len() < 4 || line.as_bytes()[3] != b'-' {
            break;
        }
    }
    Ok(())
}
