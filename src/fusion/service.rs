//! Single-threaded owner of the fusion state.
//!
//! `FusionService::spawn` moves the heading controller and the location
//! fusion onto one thread. Everything else talks to them through a
//! [`FusionHandle`]: control calls are request/reply, so once `stop()`
//! returns the session is over and no later output can belong to it.

use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender, select};

use super::controller::{FusionOutput, FusionState, HeadingFusionController};
use super::location::{LocationHeadingFusion, LocationState};
use crate::config::FusionConfig;
use crate::error::{ErrorKind, FusionError, Result};
use crate::sensor::{HeadingSource, LocationSource, SensorEvent};
use crate::signal_processing::CalibrationState;

/// Point-in-time view of the service
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct Snapshot {
    pub output: FusionOutput,
    pub state: FusionState,
    pub calibration: CalibrationState,
    pub calibrating: bool,
    pub tracking: bool,
    pub location: Option<LocationState>,
    /// Last location tracking failure, cleared by the next accepted fix
    pub location_error: Option<ErrorKind>,
}

enum Command {
    Start(Sender<Result<()>>),
    Stop(Sender<()>),
    Calibrate(Sender<()>),
    StartTracking(Sender<Result<()>>),
    StopTracking(Sender<()>),
    Snapshot(Sender<Snapshot>),
    Subscribe(Sender<Receiver<FusionOutput>>),
    SubscribeLocation(Sender<Receiver<LocationState>>),
    Shutdown,
}

pub struct FusionService;

impl FusionService {
    /// Validate the configuration and start the service thread
    ///
    /// Without a location source, `start_tracking` fails with
    /// `SourceUnavailable`.
    pub fn spawn(
        config: &FusionConfig,
        heading_source: Box<dyn HeadingSource>,
        location_source: Option<Box<dyn LocationSource>>,
    ) -> Result<FusionHandle> {
        let (event_tx, event_rx) = crossbeam_channel::unbounded();
        let (command_tx, command_rx) = crossbeam_channel::unbounded();

        let controller = HeadingFusionController::new(config, heading_source, event_tx.clone())?;
        let location = location_source
            .map(|source| LocationHeadingFusion::new(&config.location, source, event_tx));

        let actor = Actor {
            controller,
            location,
            commands: command_rx,
            events: event_rx,
        };

        let thread = thread::Builder::new()
            .name("heading-fusion".into())
            .spawn(move || actor.run())
            .map_err(|e| FusionError::Service(format!("failed to spawn service thread: {}", e)))?;

        Ok(FusionHandle {
            commands: command_tx,
            thread: Some(thread),
        })
    }
}

/// Message-passing front end of a running [`FusionService`]
///
/// Dropping the handle shuts the service down.
pub struct FusionHandle {
    commands: Sender<Command>,
    thread: Option<JoinHandle<()>>,
}

impl FusionHandle {
    /// Start the compass
    pub fn start(&self) -> Result<()> {
        self.request(Command::Start)?
    }

    /// Stop the compass; returns once the session is fully torn down
    pub fn stop(&self) -> Result<()> {
        self.request(Command::Stop)
    }

    /// Begin the manual calibration routine
    pub fn calibrate(&self) -> Result<()> {
        self.request(Command::Calibrate)
    }

    /// Start GPS tracking, then the compass
    ///
    /// A compass that fails to start does not fail tracking: the GPS heading
    /// remains as the fallback.
    pub fn start_tracking(&self) -> Result<()> {
        self.request(Command::StartTracking)?
    }

    /// Stop GPS tracking and the compass
    pub fn stop_tracking(&self) -> Result<()> {
        self.request(Command::StopTracking)
    }

    pub fn snapshot(&self) -> Result<Snapshot> {
        self.request(Command::Snapshot)
    }

    /// Receive every `FusionOutput` notification from now on
    pub fn subscribe(&self) -> Result<Receiver<FusionOutput>> {
        self.request(Command::Subscribe)
    }

    /// Receive every `LocationState` update from now on
    pub fn subscribe_location(&self) -> Result<Receiver<LocationState>> {
        self.request(Command::SubscribeLocation)
    }

    /// Stop everything and wait for the service thread to exit
    pub fn shutdown(mut self) {
        self.join();
    }

    fn request<T>(&self, make: impl FnOnce(Sender<T>) -> Command) -> Result<T> {
        let (tx, rx) = crossbeam_channel::bounded(1);
        self.commands.send(make(tx)).map_err(|_| closed())?;
        rx.recv().map_err(|_| closed())
    }

    fn join(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = self.commands.send(Command::Shutdown);
            if thread.join().is_err() {
                log::error!("Fusion service thread panicked");
            }
        }
    }
}

impl Drop for FusionHandle {
    fn drop(&mut self) {
        self.join();
    }
}

fn closed() -> FusionError {
    FusionError::Service("service has shut down".into())
}

struct Actor {
    controller: HeadingFusionController,
    location: Option<LocationHeadingFusion>,
    commands: Receiver<Command>,
    events: Receiver<SensorEvent>,
}

impl Actor {
    fn run(mut self) {
        log::debug!("Fusion service running");
        let commands = self.commands.clone();
        let events = self.events.clone();

        loop {
            let timer = match self.controller.next_deadline() {
                Some(deadline) => crossbeam_channel::at(deadline),
                None => crossbeam_channel::never(),
            };

            select! {
                recv(commands) -> command => match command {
                    Ok(Command::Shutdown) | Err(_) => break,
                    Ok(command) => self.handle_command(command),
                },
                recv(events) -> event => {
                    if let Ok(event) = event {
                        self.handle_event(event);
                    }
                }
                recv(timer) -> _ => self.controller.on_timer(Instant::now()),
            }

            self.sync_location();
        }

        if let Some(location) = self.location.as_mut() {
            location.stop_tracking();
        }
        self.controller.stop();
        log::debug!("Fusion service stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start(reply) => {
                let _ = reply.send(self.controller.start());
            }
            Command::Stop(reply) => {
                self.controller.stop();
                self.sync_location();
                let _ = reply.send(());
            }
            Command::Calibrate(reply) => {
                self.controller.calibrate(Instant::now());
                let _ = reply.send(());
            }
            Command::StartTracking(reply) => {
                let _ = reply.send(self.start_tracking());
            }
            Command::StopTracking(reply) => {
                if let Some(location) = self.location.as_mut() {
                    location.stop_tracking();
                }
                self.controller.stop();
                self.sync_location();
                let _ = reply.send(());
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
            Command::Subscribe(reply) => {
                let _ = reply.send(self.controller.subscribe());
            }
            Command::SubscribeLocation(reply) => {
                let rx = match self.location.as_mut() {
                    Some(location) => location.subscribe(),
                    // nothing will ever be sent
                    None => crossbeam_channel::never(),
                };
                let _ = reply.send(rx);
            }
            Command::Shutdown => {}
        }
    }

    fn handle_event(&mut self, event: SensorEvent) {
        match event {
            SensorEvent::Reading { .. } | SensorEvent::SourceFailed { .. } => {
                self.controller.handle_event(event, Instant::now());
            }
            SensorEvent::Fix { .. } | SensorEvent::FixFailed { .. } => {
                if let Some(location) = self.location.as_mut() {
                    location.handle_event(event);
                }
            }
        }
    }

    fn start_tracking(&mut self) -> Result<()> {
        let Some(location) = self.location.as_mut() else {
            return Err(FusionError::SourceUnavailable(
                "no location source configured".into(),
            ));
        };
        location.start_tracking()?;

        if let Err(e) = self.controller.start() {
            log::warn!("Compass unavailable, using GPS heading only: {}", e);
        }
        self.sync_location();
        Ok(())
    }

    fn sync_location(&mut self) {
        if let Some(location) = self.location.as_mut() {
            location.update_compass(self.controller.output());
        }
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            output: self.controller.output(),
            state: self.controller.state(),
            calibration: *self.controller.calibration_state(),
            calibrating: self.controller.is_calibrating(),
            tracking: self.location.as_ref().is_some_and(|l| l.is_tracking()),
            location: self.location.as_ref().and_then(|l| l.state()),
            location_error: self.location.as_ref().and_then(|l| l.error()),
        }
    }
}
