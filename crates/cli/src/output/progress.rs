//! Progress bar for transfers
//!
//! Progress goes to stderr and is suppressed in quiet or JSON mode, or with
//! `--no-progress`.

use std::io::{self, Read};

use super::OutputConfig;

const BAR_TEMPLATE: &str = "{spinner:.green} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})";

/// Progress bar wrapper
#[derive(Debug)]
pub struct ProgressBar {
    bar: Option<indicatif::ProgressBar>,
}

impl ProgressBar {
    /// Create a new progress bar with the given total size
    pub fn new(config: &OutputConfig, total: u64) -> Self {
        if config.quiet || config.json || config.no_progress {
            return Self { bar: None };
        }

        let bar = indicatif::ProgressBar::new(total);
        let style = indicatif::ProgressStyle::default_bar()
            .template(BAR_TEMPLATE)
            .unwrap_or_else(|_| indicatif::ProgressStyle::default_bar())
            .progress_chars("#>-");
        bar.set_style(style);
        Self { bar: Some(bar) }
    }

    /// Wrap a reader so that every read advances the bar
    pub fn wrap_read<R: Read>(&self, reader: R) -> ProgressReader<'_, R> {
        ProgressReader {
            inner: reader,
            progress: self,
        }
    }

    pub fn inc(&self, delta: u64) {
        if let Some(bar) = &self.bar {
            bar.inc(delta);
        }
    }

    pub fn finish_and_clear(&self) {
        if let Some(bar) = &self.bar {
            bar.finish_and_clear();
        }
    }

    pub fn is_visible(&self) -> bool {
        self.bar.is_some()
    }
}

/// Reader adapter returned by [`ProgressBar::wrap_read`]
pub struct ProgressReader<'a, R> {
    inner: R,
    progress: &'a ProgressBar,
}

impl<R: Read> Read for ProgressReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.progress.inc(n as u64);
        Ok(n)
    }
}
