//! Streaming controller: owns the worker thread that turns raw blocks into
//! published device-to-head transforms.
//!
//! The worker walks `WaitGeometry → Streaming → Stopped`. It polls for
//! measurement info at a bounded interval and waits indefinitely if none is
//! ever supplied. Once streaming it pops blocks, accumulates them into a
//! window and runs one localization per full cycle of samples. Stopping
//! shuts the buffer down, which releases a producer parked in `push` and the
//! worker parked in `pop` even when no data is arriving.

use crate::{
    config::Config,
    geometry::{MeasurementInfo, SensorGeometry},
    pipeline::{LocalizationPipeline, SampleWindow},
    stream_buffer::{DataBlock, StreamBuffer},
    transform::{Localization, TransformPublisher},
    Error, Result,
};
use log::{debug, error, info, warn};
use nalgebra::Matrix4;
use parking_lot::Mutex;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, OnceLock,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

/// Worker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    /// Waiting for measurement info
    WaitGeometry,
    /// Consuming blocks and publishing transforms
    Streaming,
    /// Not running
    Stopped,
}

/// What happened to a pushed block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Handed to the worker
    Queued,
    /// Dropped because the worker was not streaming
    Discarded,
}

struct Shared {
    config: Config,
    buffer: OnceLock<StreamBuffer>,
    info: Mutex<Option<Arc<MeasurementInfo>>>,
    running: AtomicBool,
    state: Mutex<ControllerState>,
    publisher: TransformPublisher,
}

impl Shared {
    fn set_state(&self, state: ControllerState) {
        let mut current = self.state.lock();
        if *current != state {
            debug!("Controller state {:?} -> {:?}", *current, state);
            *current = state;
        }
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// Real-time HPI localization controller
///
/// Cloneable handles are not provided; share the controller by reference
/// between the producer and consumers.
pub struct HpiController {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl HpiController {
    /// Create a stopped controller
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration does not validate
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                buffer: OnceLock::new(),
                info: Mutex::new(None),
                running: AtomicBool::new(false),
                state: Mutex::new(ControllerState::Stopped),
                publisher: TransformPublisher::default(),
            }),
            worker: Mutex::new(None),
        })
    }

    /// Configuration in use
    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    /// Launch the worker thread
    ///
    /// # Errors
    ///
    /// Returns an error if the controller is already running or the thread
    /// cannot be spawned
    pub fn start(&self) -> Result<()> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Err(Error::ControllerError("Controller is already running".to_string()));
        }

        if let Some(buffer) = self.shared.buffer.get() {
            buffer.clear();
            buffer.reopen();
        }
        self.shared.running.store(true, Ordering::Release);
        self.shared.set_state(ControllerState::WaitGeometry);

        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("hpi-localization".to_string())
            .spawn(move || run_worker(&shared));

        match handle {
            Ok(handle) => {
                *worker = Some(handle);
                info!("HPI controller started");
                Ok(())
            }
            Err(e) => {
                self.shared.running.store(false, Ordering::Release);
                self.shared.set_state(ControllerState::Stopped);
                Err(e.into())
            }
        }
    }

    /// Stop the worker and release anything blocked on the buffer
    ///
    /// Stopping a stopped controller is a no-op.
    pub fn stop(&self) {
        let handle = self.worker.lock().take();
        let Some(handle) = handle else {
            return;
        };

        self.shared.running.store(false, Ordering::Release);
        if let Some(buffer) = self.shared.buffer.get() {
            buffer.shutdown();
        }

        if handle.join().is_err() {
            error!("HPI worker thread panicked");
        }

        if let Some(buffer) = self.shared.buffer.get() {
            buffer.clear();
        }
        self.shared.set_state(ControllerState::Stopped);
        info!("HPI controller stopped");
    }

    /// Supply measurement info; accepted once per controller
    ///
    /// # Errors
    ///
    /// Returns an error if measurement info was already supplied
    pub fn set_measurement_info(&self, info: MeasurementInfo) -> Result<()> {
        let mut slot = self.shared.info.lock();
        if slot.is_some() {
            return Err(Error::ControllerError("Measurement info already set".to_string()));
        }
        info!(
            "Measurement info: {} channels at {} Hz",
            info.num_channels(),
            info.sample_rate
        );
        *slot = Some(Arc::new(info));
        Ok(())
    }

    /// Seed the transform used to place coils before their first fit
    ///
    /// # Errors
    ///
    /// Returns an error while the worker is running
    pub fn set_initial_transform(&self, transform: Matrix4<f64>) -> Result<()> {
        let worker = self.worker.lock();
        if worker.is_some() {
            return Err(Error::ControllerError(
                "Cannot seed the transform while the controller is running".to_string(),
            ));
        }
        self.shared.publisher.reset(transform);
        Ok(())
    }

    /// Hand a raw `[channels × samples]` block to the worker
    ///
    /// Blocks while the buffer is full. Blocks arriving while the worker is
    /// not streaming, or while it is being stopped, are discarded.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BlockShape`] if the block does not match the first
    /// block pushed or the measurement's channel count
    pub fn push_block(&self, block: DataBlock) -> Result<PushOutcome> {
        if let Some(info) = self.shared.info.lock().as_ref() {
            if block.channels() != info.num_channels() {
                return Err(Error::BlockShape {
                    expected: (info.num_channels(), block.samples()),
                    actual: block.shape(),
                });
            }
        }

        let buffer = self.buffer_for(&block)?;
        if buffer.block_shape() != block.shape() {
            return Err(Error::BlockShape {
                expected: buffer.block_shape(),
                actual: block.shape(),
            });
        }

        if self.state() != ControllerState::Streaming {
            return Ok(PushOutcome::Discarded);
        }

        match buffer.push(block) {
            Ok(()) => Ok(PushOutcome::Queued),
            Err(Error::BufferShutdown) => {
                debug!("Block dropped during shutdown");
                Ok(PushOutcome::Discarded)
            }
            Err(e) => Err(e),
        }
    }

    /// Current worker state
    pub fn state(&self) -> ControllerState {
        *self.shared.state.lock()
    }

    /// Whether the worker thread is running
    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    /// Transform publisher shared with consumers
    pub fn publisher(&self) -> &TransformPublisher {
        &self.shared.publisher
    }

    /// Latest published localization
    pub fn latest(&self) -> Arc<Localization> {
        self.shared.publisher.latest()
    }

    /// Poll until the worker reaches `state` or `timeout` passes
    pub fn wait_for_state(&self, state: ControllerState, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.state() == state {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(self.shared.config.localization.poll_interval());
        }
    }

    /// Poll until a localization with at least `version` is published or `timeout` passes
    pub fn wait_for_version(&self, version: u64, timeout: Duration) -> Option<Arc<Localization>> {
        let deadline = Instant::now() + timeout;
        loop {
            let latest = self.latest();
            if latest.version >= version {
                return Some(latest);
            }
            if Instant::now() >= deadline {
                return None;
            }
            thread::sleep(self.shared.config.localization.poll_interval());
        }
    }

    fn buffer_for(&self, block: &DataBlock) -> Result<&StreamBuffer> {
        if let Some(buffer) = self.shared.buffer.get() {
            return Ok(buffer);
        }
        let (channels, samples) = block.shape();
        let created = StreamBuffer::new(self.shared.config.buffer.capacity_blocks, channels, samples)?;
        if self.shared.buffer.set(created).is_ok() {
            info!(
                "Stream buffer sized for {} blocks of {}x{}",
                self.shared.config.buffer.capacity_blocks, channels, samples
            );
        }
        self.shared
            .buffer
            .get()
            .ok_or_else(|| Error::ControllerError("Stream buffer unavailable".to_string()))
    }
}

impl Drop for HpiController {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_worker(shared: &Shared) {
    let Some(info) = wait_for_geometry(shared) else {
        shared.set_state(ControllerState::Stopped);
        return;
    };

    let pipeline = SensorGeometry::from_info(&info, &shared.config.geometry)
        .and_then(|geometry| LocalizationPipeline::new(geometry, &shared.config));
    let mut pipeline = match pipeline {
        Ok(pipeline) => pipeline,
        Err(e) => {
            error!("Cannot localize with this measurement: {}", e);
            shared.running.store(false, Ordering::Release);
            shared.set_state(ControllerState::Stopped);
            return;
        }
    };

    shared.set_state(ControllerState::Streaming);
    stream(shared, &mut pipeline);
    shared.set_state(ControllerState::Stopped);
}

fn wait_for_geometry(shared: &Shared) -> Option<Arc<MeasurementInfo>> {
    let interval = shared.config.localization.poll_interval();
    while shared.is_running() {
        if let Some(info) = shared.info.lock().clone() {
            return Some(info);
        }
        thread::sleep(interval);
    }
    None
}

fn stream(shared: &Shared, pipeline: &mut LocalizationPipeline) {
    let interval = shared.config.localization.poll_interval();
    let samples_per_cycle = pipeline.samples_per_cycle();
    let mut window = SampleWindow::new();

    while shared.is_running() {
        // The buffer only exists once the first block has been pushed
        let Some(buffer) = shared.buffer.get() else {
            thread::sleep(interval);
            continue;
        };

        match buffer.pop() {
            Ok(block) => window.push(block),
            Err(Error::BufferShutdown) => break,
            Err(e) => {
                error!("Stream buffer failed: {}", e);
                break;
            }
        }

        if !window.is_ready(samples_per_cycle) {
            continue;
        }

        let result = window
            .concatenated()
            .and_then(|data| pipeline.process_window(&data, &shared.publisher));
        if let Err(e) = result {
            warn!("Localization cycle skipped: {}", e);
        }
        window.clear();
    }

    debug!("Streaming loop exited with {} samples pending", window.samples());
}
