//! In-process sources fed by hand.
//!
//! A `ManualSource` pairs with a `ManualFeeder` that pushes readings to every
//! live subscription. The feeder can also make the next subscriptions fail
//! and reports how many subscriptions are live, which is how the simulator
//! and the tests drive the engine.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::{
    EventSink, HeadingSource, LocationFix, LocationSource, RawReading, SourceSubscription,
    WatchOptions,
};
use crate::error::{FusionError, Result};

#[derive(Default)]
struct Hub {
    subscribers: Vec<(u64, EventSink)>,
    next_id: u64,
    reject: Option<String>,
    last_interval: Option<Duration>,
}

impl Hub {
    fn attach(shared: &Arc<Mutex<Hub>>, sink: EventSink) -> Result<Box<dyn SourceSubscription>> {
        let mut hub = shared
            .lock()
            .map_err(|_| FusionError::SourceUnavailable("source state poisoned".into()))?;
        if let Some(reason) = hub.reject.clone() {
            return Err(FusionError::SourceUnavailable(reason));
        }
        let id = hub.next_id;
        hub.next_id += 1;
        hub.subscribers.push((id, sink));
        Ok(Box::new(ManualSubscription {
            id,
            shared: Arc::clone(shared),
        }))
    }

    fn broadcast(shared: &Arc<Mutex<Hub>>, send: impl Fn(&EventSink) -> bool) -> usize {
        match shared.lock() {
            Ok(mut hub) => {
                hub.subscribers.retain(|(_, sink)| send(sink));
                hub.subscribers.len()
            }
            Err(_) => 0,
        }
    }

    fn live(shared: &Arc<Mutex<Hub>>) -> usize {
        shared.lock().map(|hub| hub.subscribers.len()).unwrap_or(0)
    }

    fn set_reject(shared: &Arc<Mutex<Hub>>, reason: Option<String>) {
        if let Ok(mut hub) = shared.lock() {
            hub.reject = reason;
        }
    }
}

struct ManualSubscription {
    id: u64,
    shared: Arc<Mutex<Hub>>,
}

impl SourceSubscription for ManualSubscription {
    fn cancel(&mut self) {
        if let Ok(mut hub) = self.shared.lock() {
            hub.subscribers.retain(|(id, _)| *id != self.id);
        }
    }
}

impl Drop for ManualSubscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Heading source driven through a [`ManualFeeder`]
pub struct ManualSource {
    shared: Arc<Mutex<Hub>>,
}

/// Feeding end of a [`ManualSource`]
#[derive(Clone)]
pub struct ManualFeeder {
    shared: Arc<Mutex<Hub>>,
}

impl ManualSource {
    pub fn new() -> (Self, ManualFeeder) {
        let shared = Arc::new(Mutex::new(Hub::default()));
        (
            Self {
                shared: Arc::clone(&shared),
            },
            ManualFeeder { shared },
        )
    }
}

impl HeadingSource for ManualSource {
    fn subscribe(
        &mut self,
        update_interval: Duration,
        sink: EventSink,
    ) -> Result<Box<dyn SourceSubscription>> {
        if let Ok(mut hub) = self.shared.lock() {
            hub.last_interval = Some(update_interval);
        }
        Hub::attach(&self.shared, sink)
    }
}

impl ManualFeeder {
    /// Deliver a reading to every live subscription; returns how many received it
    pub fn push(&self, reading: RawReading) -> usize {
        let timestamp = Utc::now();
        Hub::broadcast(&self.shared, |sink| sink.reading_at(reading, timestamp))
    }

    pub fn push_heading(&self, degrees: f64) -> usize {
        self.push(RawReading::Heading {
            degrees,
            accuracy: None,
        })
    }

    pub fn push_at(&self, reading: RawReading, timestamp: DateTime<Utc>) -> usize {
        Hub::broadcast(&self.shared, |sink| sink.reading_at(reading, timestamp))
    }

    /// Report a runtime sensor failure to every live subscription
    pub fn fail(&self, message: &str) -> usize {
        Hub::broadcast(&self.shared, |sink| sink.failure(message))
    }

    /// Make subsequent subscriptions fail (`None` accepts them again)
    pub fn reject_subscriptions(&self, reason: Option<&str>) {
        Hub::set_reject(&self.shared, reason.map(str::to_string));
    }

    pub fn live_subscriptions(&self) -> usize {
        Hub::live(&self.shared)
    }

    /// Update interval requested by the most recent subscription
    pub fn requested_interval(&self) -> Option<Duration> {
        self.shared.lock().ok().and_then(|hub| hub.last_interval)
    }
}

#[derive(Default)]
struct FixState {
    permission_denied: bool,
    current: Option<LocationFix>,
    last_options: Option<WatchOptions>,
}

/// Location source driven through a [`ManualLocationFeeder`]
pub struct ManualLocationSource {
    shared: Arc<Mutex<Hub>>,
    state: Arc<Mutex<FixState>>,
}

/// Feeding end of a [`ManualLocationSource`]
#[derive(Clone)]
pub struct ManualLocationFeeder {
    shared: Arc<Mutex<Hub>>,
    state: Arc<Mutex<FixState>>,
}

impl ManualLocationSource {
    pub fn new() -> (Self, ManualLocationFeeder) {
        let shared = Arc::new(Mutex::new(Hub::default()));
        let state = Arc::new(Mutex::new(FixState::default()));
        (
            Self {
                shared: Arc::clone(&shared),
                state: Arc::clone(&state),
            },
            ManualLocationFeeder { shared, state },
        )
    }
}

impl LocationSource for ManualLocationSource {
    fn request_permission(&mut self) -> Result<()> {
        match self.state.lock() {
            Ok(state) if !state.permission_denied => Ok(()),
            _ => Err(FusionError::PermissionDenied),
        }
    }

    fn current_fix(&mut self) -> Result<LocationFix> {
        self.state
            .lock()
            .ok()
            .and_then(|state| state.current)
            .ok_or_else(|| FusionError::SourceUnavailable("no position available".into()))
    }

    fn watch(
        &mut self,
        options: WatchOptions,
        sink: EventSink,
    ) -> Result<Box<dyn SourceSubscription>> {
        if let Ok(mut state) = self.state.lock() {
            state.last_options = Some(options);
        }
        Hub::attach(&self.shared, sink)
    }
}

impl ManualLocationFeeder {
    pub fn deny_permission(&self, denied: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.permission_denied = denied;
        }
    }

    /// Fix returned by `current_fix`
    pub fn set_current_fix(&self, fix: Option<LocationFix>) {
        if let Ok(mut state) = self.state.lock() {
            state.current = fix;
        }
    }

    /// Deliver a fix to every live watch; also becomes the current fix
    pub fn push(&self, fix: LocationFix) -> usize {
        self.set_current_fix(Some(fix));
        Hub::broadcast(&self.shared, |sink| sink.fix(fix))
    }

    pub fn fail(&self, message: &str) -> usize {
        Hub::broadcast(&self.shared, |sink| sink.fix_failure(message))
    }

    pub fn reject_watches(&self, reason: Option<&str>) {
        Hub::set_reject(&self.shared, reason.map(str::to_string));
    }

    pub fn live_watches(&self) -> usize {
        Hub::live(&self.shared)
    }

    pub fn watch_options(&self) -> Option<WatchOptions> {
        self.state.lock().ok().and_then(|state| state.last_options)
    }
}
