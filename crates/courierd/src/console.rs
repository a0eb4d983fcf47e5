//! Operator console: prompt, stdin lines, and the lines printed back.

use std::io::{BufRead, Write};

use courier_core::TERMINATOR;
use courier_services::{InboundMessage, MessageRecord};
use tokio::sync::mpsc;

pub const PROMPT: &str = "Enter the message to send: ";

/// Read stdin lines on a plain thread and forward them as raw bytes.
///
/// A blocked read cannot be cancelled, so the thread is left detached and
/// dies with the process. The channel closes on EOF.
pub fn spawn_reader() -> mpsc::UnboundedReceiver<Vec<u8>> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || forward_lines(std::io::stdin().lock(), tx));
    rx
}

/// Forward each line of `reader` without its line ending. Lines need not be
/// UTF-8; only EOF or a read error stops the loop.
fn forward_lines<R: BufRead>(mut reader: R, tx: mpsc::UnboundedSender<Vec<u8>>) {
    loop {
        let mut line = Vec::new();
        match reader.read_until(b'\n', &mut line) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "stdin read failed");
                break;
            }
        }
        if line.last() == Some(&b'\n') {
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
        }
        if tx.send(line).is_err() {
            break;
        }
    }
}

pub fn prompt() {
    let mut out = std::io::stdout().lock();
    let _ = write!(out, "{PROMPT}");
    let _ = out.flush();
}

/// Line reported after a submission resolves.
pub fn outcome_line(record: &MessageRecord) -> String {
    match &record.failure {
        None => format!("The encrypted message has {} bytes.", ciphertext_len(record)),
        Some(reason) => format!("Message {} was not sent: {reason}", record.id),
    }
}

/// Ciphertext bytes in the envelope, terminators excluded.
fn ciphertext_len(record: &MessageRecord) -> usize {
    record
        .envelope_len
        .saturating_sub(record.chunks * TERMINATOR.len())
}

pub fn inbound_line(message: &InboundMessage) -> String {
    format!(
        "{}: {}",
        message.channel,
        String::from_utf8_lossy(&message.payload)
    )
}
