//! Approval of vote requests
//!
//! Before pledging anything, a participant asks an approver whether it wants
//! its images used in the proposed collage. Approvers may block (on a human,
//! for instance); the participant calls them from a blocking thread.

use parking_lot::Mutex;
use std::io::{self, BufRead, Write};

/// Decides whether a vote request may be answered `yes`
pub trait Approver: Send + Sync {
    fn approve(&self, artifact: &[u8], sources: &[String]) -> bool;
}

/// Approves every request
#[derive(Debug, Clone, Copy, Default)]
pub struct ApproveAll;

impl Approver for ApproveAll {
    fn approve(&self, _artifact: &[u8], _sources: &[String]) -> bool {
        true
    }
}

impl<F> Approver for F
where
    F: Fn(&[u8], &[String]) -> bool + Send + Sync,
{
    fn approve(&self, artifact: &[u8], sources: &[String]) -> bool {
        self(artifact, sources)
    }
}

/// Asks the operator on the terminal
///
/// Prompts are serialized so concurrent requests do not interleave. Anything
/// but an answer starting with `y` declines.
#[derive(Default)]
pub struct ConsoleApprover {
    prompt: Mutex<()>,
}

impl ConsoleApprover {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Approver for ConsoleApprover {
    fn approve(&self, artifact: &[u8], sources: &[String]) -> bool {
        let _guard = self.prompt.lock();

        let mut stdout = io::stdout().lock();
        if writeln!(
            stdout,
            "Collage of {} bytes wants {}. Approve? [y/N]",
            artifact.len(),
            sources.join(", ")
        )
        .and_then(|_| stdout.flush())
        .is_err()
        {
            return false;
        }

        let mut answer = String::new();
        match io::stdin().lock().read_line(&mut answer) {
            Ok(_) => answer.trim_start().to_ascii_lowercase().starts_with('y'),
            Err(e) => {
                tracing::warn!("Cannot read approval: {}", e);
                false
            }
        }
    }
}
