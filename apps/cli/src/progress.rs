//! Terminal progress display.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use pencraft_core::ProgressObserver;

/// Spinner showing the current job and stage.
pub(crate) struct CliProgress {
    spinner: ProgressBar,
    total: usize,
}

impl CliProgress {
    pub(crate) fn new(total: usize) -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self { spinner, total }
    }

    pub(crate) fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}

impl ProgressObserver for CliProgress {
    fn on_progress(&self, job_index: usize, message: &str) {
        self.spinner
            .set_message(format!("[{}/{}] {message}", job_index + 1, self.total));
    }
}
