use std::time::{Duration, Instant};

use crate::config::CalibrationConfig;

/// Observed heading range used to judge calibration
#[derive(Debug, Clone, Copy, PartialEq, Default, serde::Serialize)]
pub struct CalibrationState {
    pub min_seen: f64,
    pub max_seen: f64,
    pub sample_count: usize,
    pub calibrated: bool,
}

impl CalibrationState {
    fn observe(&mut self, heading: f64) {
        if self.sample_count == 0 {
            self.min_seen = heading;
            self.max_seen = heading;
        } else {
            self.min_seen = self.min_seen.min(heading);
            self.max_seen = self.max_seen.max(heading);
        }
        self.sample_count += 1;
    }

    /// Linear range between the smallest and largest heading seen
    pub fn range(&self) -> f64 {
        if self.sample_count == 0 {
            0.0
        } else {
            self.max_seen - self.min_seen
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct ActiveRun {
    remaining: usize,
    next_tick: Instant,
}

/// Declares the compass calibrated once it has seen a wide enough range
///
/// Passive mode inspects the heading history every sample and latches
/// `calibrated` once at least `min_samples` headings span more than the range
/// threshold. Manual mode (`begin`) resets the state, samples a heading every
/// tick until the tick budget is spent, then renders a verdict that replaces
/// whatever passive mode had decided. Passive checks are suspended while a
/// manual run is in progress. After a manual verdict the passive check only
/// looks at headings that arrived after the run, and waits until there are
/// `min_samples` of them.
#[derive(Debug, Clone)]
pub struct CalibrationDetector {
    min_samples: usize,
    range_threshold: f64,
    tick_interval: Duration,
    tick_budget: usize,
    state: CalibrationState,
    run: Option<ActiveRun>,
    /// Headings observed since the last manual verdict
    since_manual: Option<usize>,
}

impl CalibrationDetector {
    pub fn new(config: &CalibrationConfig) -> Self {
        Self {
            min_samples: config.min_samples,
            range_threshold: config.range_threshold_degrees,
            tick_interval: config.tick_interval(),
            tick_budget: config.tick_budget,
            state: CalibrationState::default(),
            run: None,
            since_manual: None,
        }
    }

    pub fn state(&self) -> &CalibrationState {
        &self.state
    }

    pub fn is_calibrated(&self) -> bool {
        self.state.calibrated
    }

    pub fn is_running(&self) -> bool {
        self.run.is_some()
    }

    /// Passive check against a chronological heading history
    ///
    /// Returns `true` when this call flipped the state to calibrated.
    ///
    /// Call once per heading appended to the history.
    pub fn observe_history(&mut self, headings: &[f64]) -> bool {
        if self.run.is_some() {
            return false;
        }
        let fresh = match self.since_manual.as_mut() {
            Some(count) => {
                *count = count.saturating_add(1);
                &headings[headings.len().saturating_sub(*count)..]
            }
            None => headings,
        };
        if self.state.calibrated || fresh.len() < self.min_samples {
            return false;
        }

        let mut window = CalibrationState::default();
        for &h in fresh {
            window.observe(h);
        }
        window.calibrated = window.range() > self.range_threshold;
        self.state = window;

        if window.calibrated {
            log::info!(
                "Compass calibrated passively: range {:.1}° over {} samples",
                window.range(),
                window.sample_count
            );
        }
        window.calibrated
    }

    /// Start (or restart) a manual calibration run
    pub fn begin(&mut self, now: Instant) {
        if self.run.is_some() {
            log::debug!("Restarting manual calibration");
        }
        self.state = CalibrationState::default();
        self.since_manual = None;
        self.run = Some(ActiveRun {
            remaining: self.tick_budget,
            next_tick: now + self.tick_interval,
        });
    }

    /// When the next manual calibration sample is due
    pub fn next_tick(&self) -> Option<Instant> {
        self.run.map(|run| run.next_tick)
    }

    /// Take a manual calibration sample if one is due
    ///
    /// Returns the verdict when this tick spent the last of the budget.
    pub fn tick(&mut self, now: Instant, heading: f64) -> Option<bool> {
        let run = self.run.as_mut()?;
        if now < run.next_tick {
            return None;
        }

        self.state.observe(heading);
        run.remaining -= 1;
        run.next_tick = now + self.tick_interval;

        if run.remaining > 0 {
            return None;
        }

        self.run = None;
        self.since_manual = Some(0);
        self.state.calibrated =
            self.state.sample_count >= self.min_samples && self.state.range() > self.range_threshold;
        log::info!(
            "Manual calibration finished: range {:.1}° over {} samples, calibrated={}",
            self.state.range(),
            self.state.sample_count,
            self.state.calibrated
        );
        Some(self.state.calibrated)
    }

    pub fn cancel(&mut self) {
        self.run = None;
    }

    pub fn reset(&mut self) {
        self.run = None;
        self.since_manual = None;
        self.state = CalibrationState::default();
    }
}

impl Default for CalibrationDetector {
    fn default() -> Self {
        Self::new(&CalibrationConfig::default())
    }
}
