//! Implements ProgressPort with indicatif bars, one per in-flight transfer.

use crate::ports::{ProgressCallback, ProgressPort};
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io::IsTerminal;
use std::sync::Arc;

const TEMPLATE: &str = "{msg} [{bar:30.cyan/blue}] {bytes}/{total_bytes} ({eta})";

/// Progress bars stacked in one `MultiProgress`.
///
/// Draws nothing when stdout is not a terminal (piped output, cron jobs).
pub struct IndicatifProgress {
    bars: MultiProgress,
    style: ProgressStyle,
}

impl IndicatifProgress {
    pub fn new() -> Self {
        if std::io::stdout().is_terminal() {
            Self::with_target(ProgressDrawTarget::stderr())
        } else {
            Self::hidden()
        }
    }

    pub fn hidden() -> Self {
        Self::with_target(ProgressDrawTarget::hidden())
    }

    fn with_target(target: ProgressDrawTarget) -> Self {
        let style = ProgressStyle::with_template(TEMPLATE)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> ");
        Self {
            bars: MultiProgress::with_draw_target(target),
            style,
        }
    }

    fn bar(&self, label: &str, total: u64) -> ProgressBar {
        let bar = self.bars.add(ProgressBar::new(total));
        bar.set_style(self.style.clone());
        bar.set_message(label.to_string());
        bar
    }
}

impl Default for IndicatifProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressPort for IndicatifProgress {
    fn track(&self, label: &str, total: u64) -> ProgressCallback {
        let bar = self.bar(label, total);
        Arc::new(move |done: u64, total: u64| {
            if total > 0 {
                bar.set_length(total);
            }
            bar.set_position(done);
            if total > 0 && done >= total {
                bar.finish_and_clear();
            }
        })
    }
}

/// Discards progress.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentProgress;

impl ProgressPort for SilentProgress {
    fn track(&self, _label: &str, _total: u64) -> ProgressCallback {
        Arc::new(|_: u64, _: u64| {})
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bar_follows_callback() {
        let progress = IndicatifProgress::hidden();
        let bar = progress.bar("Downloading a.pdf", 100);
        assert_eq!(bar.length(), Some(100));
        assert_eq!(bar.message(), "Downloading a.pdf");

        let callback = progress.track("Downloading b.pdf", 0);
        callback(10, 40);
        callback(40, 40);
    }

    #[test]
    fn test_silent_progress_accepts_updates() {
        let callback = SilentProgress.track("x", 5);
        callback(1, 5);
        callback(5, 5);
    }
}
