//! Presentation of long-running engine output.
//!
//! Build output is a stream of lines. Depending on [`ProgressMode`] it either
//! drives a single-line [`Spinner`] on stderr or is forwarded line by line to
//! `tracing` at debug level. The build itself does not care which.

use crossterm::{cursor, queue, style, terminal};
use std::io::{IsTerminal, Write};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::UnboundedReceiver;

const FRAMES: [char; 10] = ['⠋', '⠙', '⠹', '⠸', '⠼', '⠴', '⠦', '⠧', '⠇', '⠏'];

/// How streamed engine output is presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProgressMode {
    /// Every non-empty line becomes a debug-level log event.
    #[default]
    Log,
    /// A single, continuously rewritten status line on stderr.
    Spinner,
}

impl ProgressMode {
    /// Spinner when informational output is wanted and stderr is a terminal.
    pub fn detect(informational: bool) -> Self {
        if informational && std::io::stderr().is_terminal() {
            Self::Spinner
        } else {
            Self::Log
        }
    }
}

#[derive(Debug)]
struct SpinnerState {
    label: String,
    frame: usize,
    active: bool,
}

/// Single-line progress indicator on stderr.
///
/// Clones share the same line. After [`stop`](Self::stop) all updates are
/// ignored, so a late output line cannot resurrect a cleared spinner.
#[derive(Debug, Clone)]
pub struct Spinner {
    state: Arc<Mutex<SpinnerState>>,
}

impl Spinner {
    /// Draw the spinner with an initial label.
    pub fn start(label: impl Into<String>) -> Self {
        let label = label.into();
        let spinner = Self {
            state: Arc::new(Mutex::new(SpinnerState {
                label: label.clone(),
                frame: 0,
                active: true,
            })),
        };
        spinner.update("");
        spinner
    }

    /// Advance the animation and show `text` next to the label.
    pub fn update(&self, text: &str) {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        if !state.active {
            return;
        }
        let frame = FRAMES[state.frame % FRAMES.len()];
        state.frame = state.frame.wrapping_add(1);
        let line = if text.is_empty() {
            format!("{frame} {}", state.label)
        } else {
            format!("{frame} {}: {}", state.label, text)
        };
        // Drawing is best effort; a broken stderr must not fail the build.
        let _ = draw(&fit_to_terminal(&line));
    }

    /// Clear the spinner line. Idempotent.
    pub fn stop(&self) -> std::io::Result<()> {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        if !state.active {
            return Ok(());
        }
        state.active = false;
        draw("")
    }

    /// Whether the spinner is still drawn.
    pub fn is_active(&self) -> bool {
        self.state.lock().map(|s| s.active).unwrap_or(false)
    }
}

fn draw(line: &str) -> std::io::Result<()> {
    let mut err = std::io::stderr().lock();
    queue!(
        err,
        cursor::MoveToColumn(0),
        terminal::Clear(terminal::ClearType::CurrentLine),
        style::Print(line)
    )?;
    err.flush()
}

fn fit_to_terminal(line: &str) -> String {
    let width = terminal::size().map(|(cols, _)| cols as usize).unwrap_or(80);
    line.chars().take(width.saturating_sub(1)).collect()
}

/// Consume build output until the producer hangs up.
pub(crate) async fn report(spinner: Option<Spinner>, mut lines: UnboundedReceiver<String>) {
    while let Some(line) = lines.recv().await {
        let line = line.trim_end();
        if line.trim().is_empty() {
            continue;
        }
        match &spinner {
            Some(spinner) => spinner.update(line.trim()),
            None => tracing::debug!(target: "capsula_core::build", "{line}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn test_default_mode_is_log() {
        assert_eq!(ProgressMode::default(), ProgressMode::Log);
        assert_eq!(ProgressMode::detect(false), ProgressMode::Log);
    }

    #[test]
    fn test_stop_is_idempotent() {
        let spinner = Spinner::start("building");
        let clone = spinner.clone();
        assert!(spinner.is_active());
        spinner.stop().unwrap();
        assert!(!clone.is_active());
        clone.stop().unwrap();
        clone.update("ignored after stop");
        assert!(!spinner.is_active());
    }

    #[tokio::test]
    async fn test_report_drains_until_sender_drops() {
        let (tx, rx) = mpsc::unbounded_channel();
        for line in ["#1 load", "", "   ", "#2 done"] {
            tx.send(line.to_string()).unwrap();
        }
        drop(tx);
        // Completes only once the channel is closed and empty.
        report(None, rx).await;
    }

    #[tokio::test]
    async fn test_report_updates_spinner() {
        let spinner = Spinner::start("building");
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send("step 1".to_string()).unwrap();
        drop(tx);
        report(Some(spinner.clone()), rx).await;
        assert!(spinner.is_active());
        spinner.stop().unwrap();
    }
}
