//! Terminal rendering of download and launch progress

use indicatif::{ProgressBar, ProgressStyle};
use log::info;

use super::environment::is_interactive_terminal;

/// One progress update: percent complete (0-100) and a status label
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadProgress {
    pub percent: u8,
    pub label: String,
}

/// Renders progress callbacks as a bar on terminals, as log lines otherwise
pub struct ProgressReporter {
    bar: Option<ProgressBar>,
    last_logged: Option<u8>,
}

impl ProgressReporter {
    pub fn new(title: &str) -> Self {
        let bar = is_interactive_terminal().then(|| {
            let bar = ProgressBar::new(100);
            if let Ok(style) = ProgressStyle::default_bar().template("[{bar:50.cyan/blue}] {pos:>3}%  {msg}") {
                bar.set_style(style.progress_chars("█▓░"));
            }
            bar.set_message(title.to_string());
            bar
        });

        Self {
            bar,
            last_logged: None,
        }
    }

    pub fn update(&mut self, progress: DownloadProgress) {
        match &self.bar {
            Some(bar) => {
                bar.set_position(u64::from(progress.percent.min(100)));
                if !progress.label.is_empty() {
                    bar.set_message(progress.label);
                }
            }
            None => {
                // Log only every tenth percent
                let bucket = progress.percent / 10;
                if self.last_logged != Some(bucket) {
                    self.last_logged = Some(bucket);
                    info!("{} {}%", progress.label, progress.percent);
                }
            }
        }
    }

    /// Callback form accepted by the installer and launch operations
    pub fn callback(&mut self) -> impl FnMut(u8, &str) + '_ {
        move |percent: u8, label: &str| {
            self.update(DownloadProgress {
                percent,
                label: label.to_string(),
            })
        }
    }

    pub fn finish(self) {
        if let Some(bar) = self.bar {
            bar.finish_and_clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_reporter_logs_each_decile_once() {
        let mut reporter = ProgressReporter {
            bar: None,
            last_logged: None,
        };
        for p in [0, 3, 9, 10, 15, 100] {
            reporter.update(DownloadProgress {
                percent: p,
                label: "Downloading".to_string(),
            });
        }
        assert_eq!(reporter.last_logged, Some(10));
    }
}
