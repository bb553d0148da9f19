use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::{Duration, Instant};

use ptz_seek::{CapturedObject, RunStats, ScanObserver, SweepPosition};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UiMode {
    Auto,
    Plain,
    Pretty,
}

#[derive(Clone, Debug)]
pub struct Ui {
    mode: UiMode,
    is_tty: bool,
    disable_pretty: bool,
}

impl Ui {
    pub fn new(mode: UiMode, is_tty: bool, disable_pretty: bool) -> Self {
        Self {
            mode,
            is_tty,
            disable_pretty,
        }
    }

    pub fn from_args(ui_flag: Option<&str>, is_tty: bool, disable_pretty: bool) -> Self {
        let mode = match ui_flag {
            Some("plain") => UiMode::Plain,
            Some("pretty") => UiMode::Pretty,
            _ => UiMode::Auto,
        };
        Self::new(mode, is_tty, disable_pretty)
    }

    fn use_pretty(&self) -> bool {
        self.is_tty
            && match self.mode {
                UiMode::Pretty => true,
                UiMode::Auto => !self.disable_pretty,
                UiMode::Plain => false,
            }
    }

    pub fn stage(&self, name: &str) -> StageGuard {
        if self.use_pretty() {
            let spinner = ProgressBar::new_spinner();
            spinner.set_draw_target(ProgressDrawTarget::stderr());
            spinner.enable_steady_tick(Duration::from_millis(120));
            let style = ProgressStyle::with_template("{spinner} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner());
            spinner.set_style(style);
            spinner.set_message(format!("{name}…"));
            StageGuard::new(name.to_string(), Some(spinner))
        } else {
            eprintln!("==> {}", name);
            StageGuard::new(name.to_string(), None)
        }
    }

    /// Per-round sweep progress, or `None` in plain mode.
    pub fn scan_progress(&self, rounds: u32) -> Option<ScanProgress> {
        self.use_pretty().then(|| ScanProgress::new(rounds))
    }
}

pub struct StageGuard {
    name: String,
    start: Instant,
    spinner: Option<ProgressBar>,
}

impl StageGuard {
    fn new(name: String, spinner: Option<ProgressBar>) -> Self {
        Self {
            name,
            start: Instant::now(),
            spinner,
        }
    }
}

impl Drop for StageGuard {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed();
        let message = format!("✔ {} ({})", self.name, format_duration(elapsed));
        if let Some(spinner) = &self.spinner {
            spinner.finish_with_message(message);
        } else {
            eprintln!("{message}");
        }
    }
}

/// Progress bar over the positions of the current round.
pub struct ScanProgress {
    rounds: u32,
    bar: Option<ProgressBar>,
    captures: u64,
}

impl ScanProgress {
    fn new(rounds: u32) -> Self {
        Self {
            rounds,
            bar: None,
            captures: 0,
        }
    }
}

impl ScanObserver for ScanProgress {
    fn on_round_start(&mut self, round: u32, positions: usize, tilt: f64) {
        let bar = ProgressBar::new(positions as u64);
        bar.set_draw_target(ProgressDrawTarget::stderr());
        let style = ProgressStyle::with_template("{prefix} [{bar:30}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        bar.set_style(style.progress_chars("=> "));
        bar.set_prefix(format!("round {}/{} tilt {:.0}°", round + 1, self.rounds, tilt));
        self.bar = Some(bar);
    }

    fn on_position(&mut self, _round: u32, index: usize, position: &SweepPosition) {
        if let Some(bar) = &self.bar {
            bar.set_position(index as u64);
            bar.set_message(format!("pan {:.0}° · {} captured", position.pan, self.captures));
        }
    }

    fn on_capture(&mut self, captured: &CapturedObject) {
        self.captures += 1;
        if let Some(bar) = &self.bar {
            bar.println(format!(
                "captured {} ({:.2}) at pan {:.1}°",
                captured.label, captured.confidence, captured.position.pan
            ));
        }
    }

    fn on_round_end(&mut self, _round: u32, stats: &RunStats) {
        if let Some(bar) = self.bar.take() {
            bar.finish_with_message(format!(
                "{} captured, {} abandoned",
                stats.captures, stats.seeks_abandoned
            ));
        }
    }
}

fn format_duration(duration: Duration) -> String {
    if duration.as_secs() >= 1 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        format!("{}ms", duration.as_millis())
    }
}
