use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
        mpsc::{self, Receiver, RecvTimeoutError, Sender},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use bytes::Bytes;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use super::{
    jpeg,
    store::CameraSlot,
    traits::{CaptureDevice, Worker},
};
use crate::{
    config::{CameraConfig, CapturePolicy, InitialOpenPolicy},
    core::state::WorkerPhase,
};

// Upper bound on how long a sleeping or parked worker takes to notice a stop request.
const STOP_POLL: Duration = Duration::from_millis(50);

enum Command {
    Reconnect(oneshot::Sender<bool>),
}

/// Capture loop for one device. Runs on its own thread and is the only owner
/// of the device handle.
pub struct CaptureWorker {
    config: CameraConfig,
    policy: CapturePolicy,
    device: Box<dyn CaptureDevice>,
    slot: Arc<CameraSlot>,
    stop: Arc<AtomicBool>,
    commands: Receiver<Command>,
    consecutive_errors: u32,
    reconnect_attempts: u32,
}

pub struct WorkerHandle {
    camera_id: u32,
    stop: Arc<AtomicBool>,
    commands: Sender<Command>,
    exited: Receiver<()>,
    thread: Option<JoinHandle<()>>,
}

impl CaptureWorker {
    pub fn spawn(
        config: CameraConfig,
        policy: CapturePolicy,
        device: Box<dyn CaptureDevice>,
        slot: Arc<CameraSlot>,
    ) -> std::io::Result<WorkerHandle> {
        let camera_id = config.id;
        let stop = Arc::new(AtomicBool::new(false));
        let (command_tx, command_rx) = mpsc::channel();
        // Never written to: the sender is dropped when the thread ends, panics included.
        let (exit_tx, exit_rx) = mpsc::channel::<()>();

        let worker = Self {
            config,
            policy,
            device,
            slot,
            stop: stop.clone(),
            commands: command_rx,
            consecutive_errors: 0,
            reconnect_attempts: 0,
        };
        let thread = thread::Builder::new()
            .name(format!("capture-{camera_id}"))
            .spawn(move || {
                let _exit_guard = exit_tx;
                worker.run();
            })?;

        Ok(WorkerHandle {
            camera_id,
            stop,
            commands: command_tx,
            exited: exit_rx,
            thread: Some(thread),
        })
    }

    fn run(mut self) {
        let id = self.config.id;
        info!(
            "starting camera {id} capture worker ({}x{} @ {} fps, {})",
            self.config.width, self.config.height, self.config.fps, self.config.device
        );
        self.set_phase(WorkerPhase::Initializing);

        let mut phase = if self.initialize() {
            WorkerPhase::Capturing
        } else {
            match self.policy.initial_open {
                InitialOpenPolicy::FailFast => {
                    error!("camera {id} failed to initialize at startup; waiting for explicit reconnect");
                    self.enter_stopped()
                }
                InitialOpenPolicy::Retry => {
                    warn!("camera {id} failed to initialize at startup; retrying");
                    self.enter_reconnecting(false)
                }
            }
        };

        while !self.stopping() {
            phase = match phase {
                WorkerPhase::Capturing => self.capture_once(),
                WorkerPhase::Reconnecting => self.reconnect(),
                WorkerPhase::Stopped | WorkerPhase::Initializing => self.wait_parked(),
            };
        }

        self.device.release();
        self.slot.clear();
        self.slot.update_status(|status| {
            status.connected = false;
            status.state = WorkerPhase::Stopped;
        });
        info!("camera {id} capture worker stopped");
    }

    fn stopping(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    fn set_phase(&self, phase: WorkerPhase) {
        self.slot.update_status(|status| status.state = phase);
    }

    /// Opens the device and confirms a live signal with warm-up reads.
    fn initialize(&mut self) -> bool {
        let id = self.config.id;
        self.device.release();
        if let Err(err) = self.device.open(&self.config, self.policy.buffer_frames) {
            error!("camera {id} failed to open: {err}");
            self.slot.update_status(|status| status.connected = false);
            return false;
        }

        for attempt in 1..=self.policy.warmup_reads {
            if self.stopping() {
                break;
            }
            match self.device.read() {
                Ok(_) => {
                    self.consecutive_errors = 0;
                    self.reconnect_attempts = 0;
                    self.slot.update_status(|status| {
                        status.connected = true;
                        status.reconnect_attempts = 0;
                        status.state = WorkerPhase::Capturing;
                    });
                    info!("camera {id} initialized (warm-up read {attempt}/{})", self.policy.warmup_reads);
                    return true;
                }
                Err(err) => {
                    debug!("camera {id} warm-up read {attempt} failed: {err}");
                    self.pause(self.policy.warmup_delay);
                }
            }
        }

        error!("camera {id} test capture failed after {} warm-up reads", self.policy.warmup_reads);
        self.device.release();
        self.slot.update_status(|status| status.connected = false);
        false
    }

    fn capture_once(&mut self) -> WorkerPhase {
        let id = self.config.id;
        // A failed explicit reconnect leaves the device closed; recover through
        // the normal sequence without counting it as a read failure.
        match self.serve_commands() {
            Some(false) => return self.enter_reconnecting(false),
            Some(true) | None => {}
        }

        let started = Instant::now();
        match self.device.read() {
            Ok(image) => {
                self.consecutive_errors = 0;
                let image = jpeg::fit_to(image, self.config.width, self.config.height);
                match jpeg::encode_jpeg(&image, self.policy.jpeg_quality) {
                    Ok(encoded) => {
                        self.slot.put(Bytes::from(encoded));
                    }
                    Err(err) => warn!("camera {id} jpeg encode failed: {err}"),
                }
                if let Some(rest) = self.config.frame_interval().checked_sub(started.elapsed()) {
                    thread::sleep(rest);
                }
                WorkerPhase::Capturing
            }
            Err(err) => {
                self.consecutive_errors += 1;
                warn!(
                    "camera {id} frame capture failed ({}/{}): {err}",
                    self.consecutive_errors, self.policy.error_threshold
                );
                if self.consecutive_errors >= self.policy.error_threshold {
                    return self.enter_reconnecting(true);
                }
                WorkerPhase::Capturing
            }
        }
    }

    /// Marks the device disconnected. `persistent_failure` counts the event in `error_count`.
    fn enter_reconnecting(&mut self, persistent_failure: bool) -> WorkerPhase {
        self.consecutive_errors = 0;
        self.slot.update_status(|status| {
            status.connected = false;
            if persistent_failure {
                status.error_count += 1;
            }
            status.state = WorkerPhase::Reconnecting;
        });
        warn!("camera {} disconnected; entering reconnect", self.config.id);
        WorkerPhase::Reconnecting
    }

    fn reconnect(&mut self) -> WorkerPhase {
        let id = self.config.id;
        let max = self.policy.max_reconnect_attempts;
        loop {
            if self.stopping() {
                return WorkerPhase::Reconnecting;
            }
            if self.serve_commands() == Some(true) {
                return WorkerPhase::Capturing;
            }
            if self.reconnect_attempts >= max {
                error!("camera {id} reached the reconnect limit ({max}); device lost until an explicit reconnect");
                return self.enter_stopped();
            }

            self.reconnect_attempts += 1;
            let attempt = self.reconnect_attempts;
            self.slot.update_status(|status| {
                status.reconnect_attempts = attempt;
                status.state = WorkerPhase::Reconnecting;
            });
            info!("attempting reconnect camera {id} ({attempt}/{max})");

            if !self.pause(self.policy.reconnect_backoff) {
                return WorkerPhase::Reconnecting;
            }
            if self.initialize() {
                info!("camera {id} reconnected after {attempt} attempt(s)");
                return WorkerPhase::Capturing;
            }
            self.set_phase(WorkerPhase::Reconnecting);
        }
    }

    fn enter_stopped(&mut self) -> WorkerPhase {
        self.device.release();
        self.slot.clear();
        self.slot.update_status(|status| {
            status.connected = false;
            status.state = WorkerPhase::Stopped;
        });
        WorkerPhase::Stopped
    }

    fn wait_parked(&mut self) -> WorkerPhase {
        match self.commands.recv_timeout(STOP_POLL) {
            Ok(Command::Reconnect(reply)) => {
                if self.forced_reconnect(reply) {
                    WorkerPhase::Capturing
                } else {
                    self.enter_stopped()
                }
            }
            Err(RecvTimeoutError::Timeout) => WorkerPhase::Stopped,
            Err(RecvTimeoutError::Disconnected) => {
                // The handle is gone, nobody can reconnect or stop us anymore.
                self.stop.store(true, Ordering::Release);
                WorkerPhase::Stopped
            }
        }
    }

    /// Runs pending explicit reconnect requests. Returns the result of the last one, if any.
    fn serve_commands(&mut self) -> Option<bool> {
        let mut outcome = None;
        while let Ok(Command::Reconnect(reply)) = self.commands.try_recv() {
            outcome = Some(self.forced_reconnect(reply));
        }
        outcome
    }

    fn forced_reconnect(&mut self, reply: oneshot::Sender<bool>) -> bool {
        info!("camera {} explicit reconnect requested", self.config.id);
        let success = self.initialize();
        if reply.send(success).is_err() {
            debug!("camera {} reconnect requester went away", self.config.id);
        }
        success
    }

    /// Sleeps for `duration` unless stopped first. Returns false when a stop was requested.
    fn pause(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.stopping() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep((deadline - now).min(STOP_POLL));
        }
    }
}

impl Worker for WorkerHandle {
    fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    fn request_reconnect(&self) -> oneshot::Receiver<bool> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.commands.send(Command::Reconnect(reply_tx)).is_err() {
            warn!("camera {} capture worker is not running", self.camera_id);
        }
        reply_rx
    }

    fn join(&mut self, timeout: Duration) -> bool {
        let Some(thread) = self.thread.take() else {
            return true;
        };
        match self.exited.recv_timeout(timeout) {
            Err(RecvTimeoutError::Timeout) => {
                self.thread = Some(thread);
                false
            }
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if thread.join().is_err() {
                    error!("camera {} capture thread panicked", self.camera_id);
                }
                true
            }
        }
    }
}
