//! Drives a `HeadingFusionController` through a recording on a simulated clock.
#![allow(dead_code)]

use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use headingfusion::config::FusionConfig;
use headingfusion::sensor::{ManualFeeder, ManualSource, Recording, SensorEvent};
use headingfusion::{FusionOutput, HeadingFusionController};

pub struct Harness {
    pub controller: HeadingFusionController,
    pub feeder: ManualFeeder,
    events: Receiver<SensorEvent>,
    outputs: Receiver<FusionOutput>,
    start: Instant,
    /// Every notification with the simulated time it was published at
    pub published: Vec<(u64, FusionOutput)>,
}

impl Harness {
    pub fn new(config: &FusionConfig) -> Self {
        let (source, feeder) = ManualSource::new();
        let (tx, events) = crossbeam_channel::unbounded();
        let mut controller = HeadingFusionController::new(config, Box::new(source), tx).unwrap();
        let outputs = controller.subscribe();
        Self {
            controller,
            feeder,
            events,
            outputs,
            start: Instant::now(),
            published: Vec::new(),
        }
    }

    pub fn at(&self, t_ms: u64) -> Instant {
        self.start + Duration::from_millis(t_ms)
    }

    /// Run timers due up to `t_ms`, in deadline order
    pub fn advance(&mut self, t_ms: u64) {
        let now = self.at(t_ms);
        for _ in 0..10_000 {
            match self.controller.next_deadline() {
                Some(deadline) if deadline <= now => {
                    self.controller.on_timer(deadline);
                    let ms = deadline.duration_since(self.start).as_millis() as u64;
                    self.collect(ms);
                }
                _ => break,
            }
        }
    }

    /// Replay every compass record at its recorded offset
    pub fn replay(&mut self, recording: &Recording) {
        for record in &recording.records {
            let Some(reading) = record.reading() else {
                continue;
            };
            let t_ms = record.t_ms();
            self.advance(t_ms);
            self.feeder.push(reading);
            let now = self.at(t_ms);
            while let Ok(event) = self.events.try_recv() {
                self.controller.handle_event(event, now);
            }
            self.collect(t_ms);
        }
    }

    fn collect(&mut self, t_ms: u64) {
        while let Ok(output) = self.outputs.try_recv() {
            self.published.push((t_ms, output));
        }
    }

    pub fn last_heading(&self) -> Option<f64> {
        self.published
            .iter()
            .rev()
            .find(|(_, o)| o.is_active)
            .map(|(_, o)| o.heading)
    }
}
