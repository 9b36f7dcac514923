//! Unified logging and progress UI.
//!
//! [`Notifier`] wraps `env_logger` (text logs) and `indicatif` (spinners/bars) under a single
//! verbosity switch:
//! - [`VerbosityLevel::Quiet`] → warnings only; shows a live spinner and progress bars.
//! - [`VerbosityLevel::Info`]/[`VerbosityLevel::Debug`]/[`VerbosityLevel::Trace`] → standard logs.
//!
//! [`Notifier::install`] also routes the `log` macros used across the crate through the same
//! logger, printing above any active bar so output does not get mangled.

use anyhow::{anyhow, Result};
use env_logger::Env;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use log::{Level, LevelFilter, Log, Metadata, Record};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VerbosityLevel {
    Quiet = 0, // Progress UI, warnings only
    Info = 1,  // Text logs at info level
    Debug = 2, // Text logs at debug level
    Trace = 3, // Text logs at trace level
}

impl From<u8> for VerbosityLevel {
    fn from(level: u8) -> Self {
        match level {
            0 => VerbosityLevel::Quiet,
            1 => VerbosityLevel::Info,
            2 => VerbosityLevel::Debug,
            _ => VerbosityLevel::Trace,
        }
    }
}

impl VerbosityLevel {
    fn to_log_level(self) -> LevelFilter {
        match self {
            VerbosityLevel::Quiet => LevelFilter::Warn,
            VerbosityLevel::Info => LevelFilter::Info,
            VerbosityLevel::Debug => LevelFilter::Debug,
            VerbosityLevel::Trace => LevelFilter::Trace,
        }
    }
}

/// Global `log` sink sharing the notifier's logger.
struct ProgressAwareLogger {
    logger: Arc<env_logger::Logger>,
    multi_progress: Option<MultiProgress>,
}

impl Log for ProgressAwareLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        self.logger.enabled(metadata)
    }

    fn log(&self, record: &Record) {
        if !self.logger.matches(record) {
            return;
        }
        match &self.multi_progress {
            Some(multi_progress) => multi_progress.suspend(|| self.logger.log(record)),
            None => self.logger.log(record),
        }
    }

    fn flush(&self) {
        self.logger.flush();
    }
}

pub struct Notifier {
    verbosity: VerbosityLevel,
    logger: Arc<env_logger::Logger>,
    multi_progress: Option<MultiProgress>,
    active_spinner: Mutex<Option<ProgressBar>>,
}

impl Notifier {
    pub fn new(verbosity_level: u8) -> Self {
        let verbosity = VerbosityLevel::from(verbosity_level);

        let logger = env_logger::Builder::from_env(Env::default())
            .filter_level(verbosity.to_log_level())
            .build();

        let multi_progress = if verbosity == VerbosityLevel::Quiet {
            Some(MultiProgress::new())
        } else {
            None
        };

        Self {
            verbosity,
            logger: Arc::new(logger),
            multi_progress,
            active_spinner: Mutex::new(None),
        }
    }

    /// Installs this notifier's logger as the process-wide `log` backend.
    pub fn install(&self) -> Result<()> {
        let sink = ProgressAwareLogger {
            logger: Arc::clone(&self.logger),
            multi_progress: self.multi_progress.clone(),
        };
        log::set_boxed_logger(Box::new(sink)).map_err(|e| anyhow!("Failed to install logger: {}", e))?;
        log::set_max_level(self.logger.filter());
        Ok(())
    }

    fn emit(&self, level: Level, message: &str) {
        self.logger.log(
            &Record::builder()
                .args(format_args!("{}", message))
                .level(level)
                .target(module_path!())
                .build(),
        );
    }

    pub fn info(&self, message: &str) {
        match self.verbosity {
            VerbosityLevel::Quiet => {
                let Some(multi_progress) = &self.multi_progress else {
                    return;
                };
                let Ok(mut active) = self.active_spinner.lock() else {
                    return;
                };
                // Lazy initialize spinner on first info call
                let spinner = active.get_or_insert_with(|| {
                    let spinner_style = ProgressStyle::default_spinner()
                        .template("{spinner:.green} {msg}")
                        .unwrap_or_else(|_| ProgressStyle::default_spinner());

                    let spinner = multi_progress.add(ProgressBar::new_spinner());
                    spinner.set_style(spinner_style);
                    spinner.enable_steady_tick(Duration::from_millis(100));
                    spinner
                });
                spinner.set_message(message.to_string());
            }
            _ => self.emit(Level::Info, message),
        }
    }

    pub fn debug(&self, message: &str) {
        if self.verbosity != VerbosityLevel::Quiet {
            self.emit(Level::Debug, message);
        }
    }

    pub fn warn(&self, message: &str) {
        match &self.multi_progress {
            Some(multi_progress) => multi_progress.suspend(|| self.emit(Level::Warn, message)),
            None => self.emit(Level::Warn, message),
        }
    }

    pub fn trace(&self, message: &str) {
        if self.verbosity != VerbosityLevel::Quiet {
            self.emit(Level::Trace, message);
        }
    }

    pub fn create_progress_bar(&self, length: u64, message: &str) -> Option<ProgressBar> {
        let multi_progress = self.multi_progress.as_ref()?;
        let progress_style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {pos:>7}/{len:7} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> ");

        let progress_bar = multi_progress.add(ProgressBar::new(length));
        progress_bar.set_style(progress_style);
        progress_bar.set_message(message.to_string());
        Some(progress_bar)
    }

    pub fn progress(&self, current: u64, total: u64, message: &str) {
        if self.verbosity != VerbosityLevel::Quiet {
            self.info(&format!("{}: {}/{}", message, current, total));
        }
    }

    /// Clears the Quiet-mode spinner.
    pub fn finish(&self) {
        if let Ok(mut active) = self.active_spinner.lock() {
            if let Some(spinner) = active.take() {
                spinner.finish_and_clear();
            }
        }
    }

    pub fn use_beautiful_progress(&self) -> bool {
        self.verbosity == VerbosityLevel::Quiet
    }

    pub fn verbosity_level(&self) -> VerbosityLevel {
        self.verbosity
    }
}
