//! Interactive terminal approval transport.
//!
//! Prints each mediation request to stderr with its numbered pattern
//! options and reads the operator's answer from `/dev/tty` (not stdin,
//! which may belong to whatever started the proxy). Fails closed:
//! no terminal, unreadable input, an unparsable answer, or a timeout all
//! count as a rejection.

use std::io::{BufRead, IsTerminal, Write};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use tollgate::{audit, ApprovalDecision, ApprovalPrompt, ApprovalTransport};

pub struct TerminalApproval {
    timeout: Duration,
}

impl TerminalApproval {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl ApprovalTransport for TerminalApproval {
    async fn request(
        &self,
        prompt: ApprovalPrompt,
        cancel: CancellationToken,
    ) -> ApprovalDecision {
        if !std::io::stderr().is_terminal() {
            warn!("no terminal available for approval; rejecting");
            return ApprovalDecision::RejectOnce;
        }

        render_prompt(&prompt);

        // The blocking tty read runs on the blocking pool; if the prompt
        // is cancelled or times out the read is abandoned and its result
        // discarded.
        let read = tokio::task::spawn_blocking(read_tty_line);

        let line = tokio::select! {
            _ = cancel.cancelled() => {
                eprintln!("[tollgate] prompt withdrawn (request cancelled)");
                return ApprovalDecision::RejectOnce;
            }
            _ = tokio::time::sleep(self.timeout) => {
                eprintln!("[tollgate] prompt timed out");
                audit::log_approval_timeout(&prompt.host, &prompt.resource);
                return ApprovalDecision::RejectOnce;
            }
            result = read => match result {
                Ok(Some(line)) => line,
                _ => return ApprovalDecision::RejectOnce,
            },
        };

        parse_answer(&line, &prompt)
    }

    fn name(&self) -> &str {
        "terminal"
    }
}

fn render_prompt(prompt: &ApprovalPrompt) {
    eprintln!();
    eprintln!(
        "[tollgate] {} wants: {} {}",
        prompt.host, prompt.method_label, prompt.resource
    );
    for (i, option) in prompt.options.iter().enumerate() {
        eprintln!("[tollgate]   {}. {}  ({})", i + 1, option.pattern, option.description);
    }
    eprint!("[tollgate] y = allow once, f <n> = allow forever, n = reject once, r <n> = reject forever [n]: ");
    let _ = std::io::stderr().flush();
}

fn read_tty_line() -> Option<String> {
    let tty = std::fs::File::open("/dev/tty").ok()?;
    let mut reader = std::io::BufReader::new(tty);
    let mut line = String::new();
    reader.read_line(&mut line).ok()?;
    Some(line)
}

/// Parse the operator's answer. Anything unrecognized rejects once.
fn parse_answer(line: &str, prompt: &ApprovalPrompt) -> ApprovalDecision {
    let answer = line.trim().to_lowercase();
    match answer.as_str() {
        "y" | "yes" => return ApprovalDecision::AllowOnce,
        "" | "n" | "no" => return ApprovalDecision::RejectOnce,
        _ => {}
    }

    let (verb, index) = match answer.split_once(' ') {
        Some((verb, rest)) => (verb, rest.trim().parse::<usize>().ok()),
        None => (answer.as_str(), None),
    };
    let pattern = index
        .and_then(|n| n.checked_sub(1))
        .and_then(|i| prompt.options.get(i))
        .map(|o| o.pattern.clone());

    match (verb, pattern) {
        ("f", Some(pattern)) => ApprovalDecision::AllowForever(pattern),
        ("r", Some(pattern)) => ApprovalDecision::RejectForever(pattern),
        _ => ApprovalDecision::RejectOnce,
    }
}
