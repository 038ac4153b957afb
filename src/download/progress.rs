//! Per-job download progress.
//!
//! Completion order within a batch is whatever the I/O layer resolves first,
//! so observers must key on `job_id`, never on submission order.

use std::collections::HashMap;
use std::io::IsTerminal;
use std::sync::Mutex;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

/// Progress of one download job, emitted on every chunk boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    pub job_id: u64,
    pub photo_id: String,
    pub bytes_downloaded: u64,
    /// `-1` when the server sent no `Content-Length`. Unknown, not zero.
    pub bytes_total: i64,
    pub completed: bool,
    pub error: Option<String>,
}

impl ProgressEvent {
    pub fn total(&self) -> Option<u64> {
        u64::try_from(self.bytes_total).ok()
    }
}

pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, event: &ProgressEvent);

    /// Run `f` without interleaving with whatever the observer draws.
    fn suspend(&self, f: &mut dyn FnMut()) {
        f()
    }
}

/// Renders one `indicatif` bar per in-flight job.
pub struct BarObserver {
    multi: MultiProgress,
    bars: Mutex<HashMap<u64, ProgressBar>>,
    hidden: bool,
}

impl BarObserver {
    /// Bars are hidden when stdout is not a terminal or `no_progress_bar` is set.
    pub fn new(no_progress_bar: bool) -> Self {
        let hidden = no_progress_bar || !std::io::stdout().is_terminal();
        Self {
            multi: MultiProgress::new(),
            bars: Mutex::new(HashMap::new()),
            hidden,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, ProgressBar>> {
        self.bars.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn create_bar(&self, event: &ProgressEvent) -> ProgressBar {
        if self.hidden {
            return ProgressBar::hidden();
        }
        let bar = match event.total() {
            Some(total) => {
                let pb = ProgressBar::new(total);
                if let Ok(style) = ProgressStyle::with_template(
                    "[{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta}) {msg}",
                ) {
                    pb.set_style(style.progress_chars("=> "));
                }
                pb
            }
            None => {
                let pb = ProgressBar::new_spinner();
                if let Ok(style) =
                    ProgressStyle::with_template("[{elapsed_precise}] {spinner} {bytes} {msg}")
                {
                    pb.set_style(style);
                }
                pb
            }
        };
        bar.set_message(event.photo_id.clone());
        self.multi.add(bar)
    }
}

impl ProgressObserver for BarObserver {
    fn on_progress(&self, event: &ProgressEvent) {
        let mut bars = self.lock();
        if event.completed || event.error.is_some() {
            if let Some(bar) = bars.remove(&event.job_id) {
                if let Some(error) = &event.error {
                    bar.abandon_with_message(format!("{} failed: {error}", event.photo_id));
                    self.multi.remove(&bar);
                } else {
                    bar.finish_and_clear();
                }
            }
            return;
        }
        let bar = bars
            .entry(event.job_id)
            .or_insert_with(|| self.create_bar(event));
        bar.set_position(event.bytes_downloaded);
    }

    fn suspend(&self, f: &mut dyn FnMut()) {
        self.multi.suspend(f)
    }
}
