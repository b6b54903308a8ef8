use ctxpack_core::{Phase, ProgressReporter, ProgressSnapshot};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Terminal spinner driven by [`ProgressReporter`] snapshots.
pub struct Spinner {
    bar: Option<ProgressBar>,
}

impl Spinner {
    /// Subscribes a spinner to `reporter`. With `quiet` nothing is drawn.
    pub fn attach(reporter: &ProgressReporter, quiet: bool) -> Self {
        if quiet {
            return Self { bar: None };
        }
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::default_spinner()
            .template("{spinner} {prefix} {pos} {wide_msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", " "]);
        bar.set_style(style);
        bar.enable_steady_tick(Duration::from_millis(80));

        let handle = bar.clone();
        reporter.subscribe(move |snapshot: &ProgressSnapshot| {
            let prefix = match snapshot.phase {
                Phase::Flatten => "Flattening",
                Phase::Bundle => "Bundling",
            };
            handle.set_prefix(prefix);
            handle.set_position(snapshot.processed as u64);
            handle.set_message(snapshot.current_path.clone());
        });
        Self { bar: Some(bar) }
    }

    pub fn finish(self) {
        if let Some(bar) = self.bar {
            bar.finish_and_clear();
        }
    }
}
