//! Recorded sensor sessions.
//!
//! A recording is a JSON-lines file, one record per line, each tagged with
//! its kind and a millisecond offset from the start of the recording:
//!
//! ```text
//! {"kind":"heading","t_ms":0,"degrees":271.5,"accuracy":5.0}
//! {"kind":"vector","t_ms":100,"x":0.12,"y":-0.31}
//! {"kind":"fix","t_ms":1000,"latitude":37.77,"longitude":-122.42,"gps_heading":null,"accuracy":8.0}
//! ```
//!
//! A `null` heading stands for a reading the sensor delivered without a
//! usable number.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use serde::{Deserialize, Serialize};

use super::{
    EventSink, HeadingSource, LocationFix, LocationSource, RawReading, SourceSubscription,
    WatchOptions,
};
use crate::error::{FusionError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReplayRecord {
    Heading {
        t_ms: u64,
        degrees: Option<f64>,
        #[serde(default)]
        accuracy: Option<f64>,
    },
    Vector {
        t_ms: u64,
        x: f64,
        y: f64,
    },
    Fix {
        t_ms: u64,
        latitude: f64,
        longitude: f64,
        #[serde(default)]
        gps_heading: Option<f64>,
        accuracy: f64,
    },
}

impl ReplayRecord {
    pub fn t_ms(&self) -> u64 {
        match *self {
            Self::Heading { t_ms, .. } | Self::Vector { t_ms, .. } | Self::Fix { t_ms, .. } => t_ms,
        }
    }

    /// Compass reading carried by this record, if any
    pub fn reading(&self) -> Option<RawReading> {
        match *self {
            Self::Heading {
                degrees, accuracy, ..
            } => Some(RawReading::Heading {
                degrees: degrees.unwrap_or(f64::NAN),
                accuracy,
            }),
            Self::Vector { x, y, .. } => Some(RawReading::Vector { x, y }),
            Self::Fix { .. } => None,
        }
    }

    /// Location fix carried by this record, timestamped relative to `epoch`
    pub fn fix(&self, epoch: DateTime<Utc>) -> Option<LocationFix> {
        match *self {
            Self::Fix {
                t_ms,
                latitude,
                longitude,
                gps_heading,
                accuracy,
            } => Some(LocationFix {
                latitude,
                longitude,
                gps_heading,
                accuracy,
                timestamp: epoch + chrono::Duration::milliseconds(t_ms as i64),
            }),
            _ => None,
        }
    }
}

/// An ordered set of recorded records
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Recording {
    pub records: Vec<ReplayRecord>,
}

impl Recording {
    pub fn parse(text: &str) -> anyhow::Result<Self> {
        let mut records = Vec::new();
        for (line_no, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let record: ReplayRecord = serde_json::from_str(line)
                .map_err(|e| anyhow::anyhow!("line {}: {}", line_no + 1, e))?;
            records.push(record);
        }
        records.sort_by_key(ReplayRecord::t_ms);
        Ok(Self { records })
    }

    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&text)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let mut writer = BufWriter::new(File::create(path.as_ref())?);
        for record in &self.records {
            serde_json::to_writer(&mut writer, record)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.records.last().map(ReplayRecord::t_ms).unwrap_or(0))
    }

    pub fn heading_count(&self) -> usize {
        self.records.iter().filter(|r| r.reading().is_some()).count()
    }
}

/// Replays a [`Recording`] in real time (scaled by `speed`)
///
/// Hands out a heading source and a location source over the same
/// recording. `finished()` yields once per subscription that reached the end
/// of the recording.
pub struct ReplaySource {
    recording: Arc<Recording>,
    speed: f64,
    epoch: DateTime<Utc>,
    done_tx: Sender<()>,
    done_rx: Receiver<()>,
}

impl ReplaySource {
    pub fn new(recording: Recording, speed: f64) -> Self {
        let (done_tx, done_rx) = crossbeam_channel::unbounded();
        Self {
            recording: Arc::new(recording),
            speed: if speed > 0.0 { speed } else { 1.0 },
            epoch: Utc::now(),
            done_tx,
            done_rx,
        }
    }

    pub fn open<P: AsRef<Path>>(path: P, speed: f64) -> anyhow::Result<Self> {
        Ok(Self::new(Recording::load(path)?, speed))
    }

    pub fn finished(&self) -> Receiver<()> {
        self.done_rx.clone()
    }

    pub fn heading_source(&self) -> ReplayHeadingSource {
        ReplayHeadingSource {
            player: self.player(),
        }
    }

    pub fn location_source(&self) -> ReplayLocationSource {
        ReplayLocationSource {
            player: self.player(),
        }
    }

    fn player(&self) -> Player {
        Player {
            recording: Arc::clone(&self.recording),
            speed: self.speed,
            epoch: self.epoch,
            done_tx: self.done_tx.clone(),
        }
    }
}

#[derive(Clone)]
struct Player {
    recording: Arc<Recording>,
    speed: f64,
    epoch: DateTime<Utc>,
    done_tx: Sender<()>,
}

impl Player {
    /// Spawn a thread delivering the records `deliver` accepts
    fn spawn<F>(&self, name: &str, deliver: F) -> Result<Box<dyn SourceSubscription>>
    where
        F: Fn(&ReplayRecord, DateTime<Utc>) -> Option<bool> + Send + 'static,
    {
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(0);
        let player = self.clone();

        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || player.run(stop_rx, deliver))
            .map_err(|e| FusionError::SourceUnavailable(format!("replay thread: {}", e)))?;

        Ok(Box::new(ReplaySubscription {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        }))
    }

    fn run<F>(&self, stop_rx: Receiver<()>, deliver: F)
    where
        F: Fn(&ReplayRecord, DateTime<Utc>) -> Option<bool>,
    {
        let start = Instant::now();
        for record in &self.recording.records {
            let due = start + Duration::from_secs_f64(record.t_ms() as f64 / 1000.0 / self.speed);
            let wait = due.saturating_duration_since(Instant::now());
            if !wait.is_zero() {
                match stop_rx.recv_timeout(wait) {
                    Err(RecvTimeoutError::Timeout) => {}
                    _ => return,
                }
            }
            let timestamp = self.epoch + chrono::Duration::milliseconds(record.t_ms() as i64);
            if deliver(record, timestamp) == Some(false) {
                log::debug!("Replay receiver gone, stopping");
                return;
            }
        }
        let _ = self.done_tx.send(());
    }
}

struct ReplaySubscription {
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl SourceSubscription for ReplaySubscription {
    fn cancel(&mut self) {
        // disconnecting the stop channel wakes the player
        self.stop_tx.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::warn!("Replay thread panicked");
            }
        }
    }
}

impl Drop for ReplaySubscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Heading half of a [`ReplaySource`]
pub struct ReplayHeadingSource {
    player: Player,
}

impl HeadingSource for ReplayHeadingSource {
    fn subscribe(
        &mut self,
        update_interval: Duration,
        sink: EventSink,
    ) -> Result<Box<dyn SourceSubscription>> {
        if self.player.recording.heading_count() == 0 {
            return Err(FusionError::SourceUnavailable(
                "recording has no heading data".into(),
            ));
        }
        log::debug!(
            "Replaying headings (requested interval {:?}, recorded rate used)",
            update_interval
        );
        self.player.spawn("replay-heading", move |record, timestamp| {
            record
                .reading()
                .map(|reading| sink.reading_at(reading, timestamp))
        })
    }
}

/// Location half of a [`ReplaySource`]
pub struct ReplayLocationSource {
    player: Player,
}

impl LocationSource for ReplayLocationSource {
    fn current_fix(&mut self) -> Result<LocationFix> {
        let epoch = self.player.epoch;
        self.player
            .recording
            .records
            .iter()
            .find_map(|record| record.fix(epoch))
            .ok_or_else(|| FusionError::SourceUnavailable("recording has no fixes".into()))
    }

    fn watch(
        &mut self,
        _options: WatchOptions,
        sink: EventSink,
    ) -> Result<Box<dyn SourceSubscription>> {
        let epoch = self.player.epoch;
        self.player.spawn("replay-location", move |record, _| {
            record.fix(epoch).map(|fix| sink.fix(fix))
        })
    }
}
