//! Recording lifecycle controller.
//!
//! A single control task owns the device handle and the stream accumulator
//! and runs the fixed-tick polling loop. Callers drive it through
//! [`RecorderHandle`], an explicit command API, and subscribe to
//! [`RecorderEvent`] notifications. Device handshakes run on a blocking
//! worker so the control loop never stalls; at most one connect worker is in
//! flight at a time.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use biosig_device::{ConnectError, Connector, Device, DeviceKind};
use chrono::Local;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bundle::{
    default_recording_name, save_bundle, DataKind, RecordingBundle, RecordingMetadata,
    SavedRecording,
};
use crate::error::{RecorderError, RecordingStateError};
use crate::stream::{demux_with_epoch, StreamAccumulator, StreamRecord};

/// Lifecycle states of the recording controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecorderState {
    /// No device connected.
    Idle,
    /// Device connected, ready to record.
    Armed,
    /// Polling loop active, accumulator filling.
    Recording,
    /// Recording finished, bundle pending save.
    Stopped,
    /// Last recording persisted to durable storage.
    Saved,
}

impl std::fmt::Display for RecorderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RecorderState::Idle => "idle",
            RecorderState::Armed => "armed",
            RecorderState::Recording => "recording",
            RecorderState::Stopped => "stopped",
            RecorderState::Saved => "saved",
        };
        write!(f, "{name}")
    }
}

/// State-change notifications emitted to subscribers.
#[derive(Debug, Clone)]
pub enum RecorderEvent {
    StateChanged(RecorderState),
    ConnectFailed(String),
    RecordingSaved(PathBuf),
}

#[derive(Debug, Clone)]
pub struct RecorderConfig {
    /// Polling loop cadence.
    pub tick_interval: Duration,
    /// Bound on the device handshake; a slower connect is reported as
    /// `ConnectError::Timeout` and its late result discarded.
    pub connect_timeout: Duration,
    /// Initial trailing display window, seconds.
    pub window_seconds: f64,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(100),
            connect_timeout: Duration::from_secs(15),
            window_seconds: 10.0,
        }
    }
}

/// Parameters for persisting the pending recording.
#[derive(Debug, Clone)]
pub struct SaveRequest {
    pub folder: PathBuf,
    /// Defaults to a wall-clock timestamp name when absent.
    pub name: Option<String>,
    pub subject_id: Option<String>,
    pub description: String,
    /// Write per-kind CSV exports alongside the bundle.
    pub flat_exports: bool,
}

enum Command {
    Connect {
        kind: DeviceKind,
        reply: oneshot::Sender<Result<(), RecorderError>>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
    Start {
        reply: oneshot::Sender<Result<(), RecorderError>>,
    },
    Stop {
        reply: oneshot::Sender<Result<(), RecorderError>>,
    },
    Save {
        request: SaveRequest,
        reply: oneshot::Sender<Result<SavedRecording, RecorderError>>,
    },
    SetWindow {
        seconds: f64,
    },
    WindowSnapshot {
        reply: oneshot::Sender<StreamRecord>,
    },
    State {
        reply: oneshot::Sender<RecorderState>,
    },
}

struct ConnectOutcome {
    result: Result<Box<dyn Device>, ConnectError>,
}

enum ConnectWorker {
    Idle,
    InFlight {
        /// Drop the result instead of arming when it arrives.
        discard: bool,
        /// None once the timeout already fired.
        deadline: Option<Instant>,
        reply: Option<oneshot::Sender<Result<(), RecorderError>>>,
    },
}

/// Cloneable handle to a spawned recorder task.
#[derive(Clone)]
pub struct RecorderHandle {
    tx: mpsc::Sender<Command>,
    events: broadcast::Sender<RecorderEvent>,
}

impl RecorderHandle {
    pub async fn connect(&self, kind: DeviceKind) -> Result<(), RecorderError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Connect { kind, reply }).await?;
        rx.await.map_err(|_| RecorderError::ControllerStopped)?
    }

    pub async fn disconnect(&self) -> Result<(), RecorderError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Disconnect { reply }).await?;
        rx.await.map_err(|_| RecorderError::ControllerStopped)
    }

    pub async fn start_recording(&self) -> Result<(), RecorderError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Start { reply }).await?;
        rx.await.map_err(|_| RecorderError::ControllerStopped)?
    }

    pub async fn stop_recording(&self) -> Result<(), RecorderError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Stop { reply }).await?;
        rx.await.map_err(|_| RecorderError::ControllerStopped)?
    }

    pub async fn save_recording(
        &self,
        request: SaveRequest,
    ) -> Result<SavedRecording, RecorderError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Save { request, reply }).await?;
        rx.await.map_err(|_| RecorderError::ControllerStopped)?
    }

    /// Adjust the trailing display window without touching buffered history.
    pub async fn set_window(&self, seconds: f64) -> Result<(), RecorderError> {
        self.send(Command::SetWindow { seconds }).await
    }

    /// Snapshot of the current trailing window of the live stream.
    pub async fn window_snapshot(&self) -> Result<StreamRecord, RecorderError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::WindowSnapshot { reply }).await?;
        rx.await.map_err(|_| RecorderError::ControllerStopped)
    }

    pub async fn state(&self) -> Result<RecorderState, RecorderError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::State { reply }).await?;
        rx.await.map_err(|_| RecorderError::ControllerStopped)
    }

    /// Subscribe to state-change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<RecorderEvent> {
        self.events.subscribe()
    }

    async fn send(&self, command: Command) -> Result<(), RecorderError> {
        self.tx
            .send(command)
            .await
            .map_err(|_| RecorderError::ControllerStopped)
    }
}

/// Spawn the recorder control task. The task exits when `shutdown` fires or
/// every handle is dropped.
pub fn spawn(
    config: RecorderConfig,
    connector: Arc<dyn Connector>,
    shutdown: CancellationToken,
) -> RecorderHandle {
    let (tx, rx) = mpsc::channel(32);
    let (events, _) = broadcast::channel(32);
    let recorder = Recorder {
        config,
        connector,
        state: RecorderState::Idle,
        device: None,
        kind: None,
        accumulator: None,
        pending: None,
        connect: ConnectWorker::Idle,
        window_seconds_override: None,
        events: events.clone(),
    };
    tokio::spawn(recorder.run(rx, shutdown));
    RecorderHandle { tx, events }
}

struct Recorder {
    config: RecorderConfig,
    connector: Arc<dyn Connector>,
    state: RecorderState,
    device: Option<Box<dyn Device>>,
    kind: Option<DeviceKind>,
    accumulator: Option<StreamAccumulator>,
    /// Records captured by the last stop, awaiting save.
    pending: Option<BTreeMap<DataKind, StreamRecord>>,
    connect: ConnectWorker,
    /// Window length requested before any device was connected.
    window_seconds_override: Option<f64>,
    events: broadcast::Sender<RecorderEvent>,
}

impl Recorder {
    async fn run(mut self, mut rx: mpsc::Receiver<Command>, shutdown: CancellationToken) {
        let (conn_tx, mut conn_rx) = mpsc::channel::<ConnectOutcome>(1);
        let mut tick = tokio::time::interval(self.config.tick_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("recorder control loop running");

        loop {
            let connect_deadline = match &self.connect {
                ConnectWorker::InFlight {
                    deadline: Some(deadline),
                    ..
                } => Some(*deadline),
                _ => None,
            };
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                Some(outcome) = conn_rx.recv() => self.on_connect_outcome(outcome),
                _ = tokio::time::sleep_until(
                    connect_deadline.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600))
                ), if connect_deadline.is_some() => self.on_connect_timeout(),
                command = rx.recv() => match command {
                    Some(command) => {
                        if self.handle_command(command, &conn_tx) {
                            tick.reset();
                        }
                    }
                    None => break,
                },
                _ = tick.tick(), if self.state == RecorderState::Recording => self.on_tick(),
            }
        }

        if let Some(mut device) = self.device.take() {
            // Best-effort hardware release on shutdown; must not block the
            // runtime.
            tokio::task::spawn_blocking(move || device.disconnect());
        }
        info!("recorder control loop stopped");
    }

    /// Returns true when the polling tick should be realigned (recording
    /// start).
    fn handle_command(&mut self, command: Command, conn_tx: &mpsc::Sender<ConnectOutcome>) -> bool {
        match command {
            Command::Connect { kind, reply } => {
                self.begin_connect(kind, reply, conn_tx);
                false
            }
            Command::Disconnect { reply } => {
                self.do_disconnect();
                let _ = reply.send(());
                false
            }
            Command::Start { reply } => {
                let result = self.do_start();
                let reset_tick = result.is_ok();
                let _ = reply.send(result);
                reset_tick
            }
            Command::Stop { reply } => {
                let _ = reply.send(self.do_stop());
                false
            }
            Command::Save { request, reply } => {
                let _ = reply.send(self.do_save(request));
                false
            }
            Command::SetWindow { seconds } => {
                match self.accumulator.as_mut() {
                    Some(acc) => acc.set_window_seconds(seconds),
                    None => self.window_seconds_override = Some(seconds),
                }
                false
            }
            Command::WindowSnapshot { reply } => {
                let snapshot = self
                    .accumulator
                    .as_ref()
                    .map(StreamAccumulator::window_record)
                    .unwrap_or_default();
                let _ = reply.send(snapshot);
                false
            }
            Command::State { reply } => {
                let _ = reply.send(self.state);
                false
            }
        }
    }

    fn begin_connect(
        &mut self,
        kind: DeviceKind,
        reply: oneshot::Sender<Result<(), RecorderError>>,
        conn_tx: &mpsc::Sender<ConnectOutcome>,
    ) {
        if matches!(self.connect, ConnectWorker::InFlight { .. }) {
            let _ = reply.send(Err(ConnectError::Pending.into()));
            return;
        }
        if self.state != RecorderState::Idle {
            let _ = reply.send(Err(ConnectError::AlreadyConnected.into()));
            return;
        }
        debug!(%kind, "starting connect worker");
        let connector = self.connector.clone();
        let tx = conn_tx.clone();
        tokio::task::spawn_blocking(move || {
            let result = connector.connect(kind);
            let _ = tx.blocking_send(ConnectOutcome { result });
        });
        // The reply resolves on the worker outcome or the timeout, whichever
        // comes first. The control loop stays responsive throughout.
        self.connect = ConnectWorker::InFlight {
            discard: false,
            deadline: Some(Instant::now() + self.config.connect_timeout),
            reply: Some(reply),
        };
    }

    fn on_connect_outcome(&mut self, outcome: ConnectOutcome) {
        let worker = std::mem::replace(&mut self.connect, ConnectWorker::Idle);
        let (discard, reply) = match worker {
            ConnectWorker::InFlight { discard, reply, .. } => (discard, reply),
            ConnectWorker::Idle => (true, None),
        };
        match outcome.result {
            Ok(mut device) => {
                if discard {
                    // Cancelled or timed out: the hardware session finished
                    // on its own; release it and drop the handle.
                    debug!("discarding late connect result");
                    tokio::task::spawn_blocking(move || device.disconnect());
                    return;
                }
                let kind = device.kind();
                let window = self
                    .window_seconds_override
                    .take()
                    .unwrap_or(self.config.window_seconds);
                self.accumulator =
                    Some(StreamAccumulator::new(kind.layout(kind.primary_preset()), window));
                self.device = Some(device);
                self.kind = Some(kind);
                self.set_state(RecorderState::Armed);
                info!(%kind, "device connected");
                if let Some(reply) = reply {
                    let _ = reply.send(Ok(()));
                }
            }
            Err(err) => {
                if !discard {
                    warn!(error = %err, "device connect failed");
                    let _ = self
                        .events
                        .send(RecorderEvent::ConnectFailed(err.to_string()));
                    if let Some(reply) = reply {
                        let _ = reply.send(Err(err.into()));
                    }
                }
            }
        }
    }

    fn on_connect_timeout(&mut self) {
        if let ConnectWorker::InFlight {
            discard,
            deadline,
            reply,
        } = &mut self.connect
        {
            warn!(timeout = ?self.config.connect_timeout, "connect attempt timed out");
            *discard = true;
            *deadline = None;
            let err = ConnectError::Timeout(self.config.connect_timeout);
            let _ = self
                .events
                .send(RecorderEvent::ConnectFailed(err.to_string()));
            if let Some(reply) = reply.take() {
                let _ = reply.send(Err(err.into()));
            }
        }
    }

    fn do_disconnect(&mut self) {
        if let ConnectWorker::InFlight {
            discard,
            deadline,
            reply,
        } = &mut self.connect
        {
            // Let the handshake finish on its own; its result is discarded.
            *discard = true;
            *deadline = None;
            if let Some(reply) = reply.take() {
                let _ = reply.send(Err(ConnectError::Cancelled.into()));
            }
        }
        if self.state == RecorderState::Recording {
            warn!("device disconnect during recording; recording aborted, not saved");
        }
        if let Some(mut device) = self.device.take() {
            tokio::task::spawn_blocking(move || device.disconnect());
        }
        self.kind = None;
        self.accumulator = None;
        self.pending = None;
        if self.state != RecorderState::Idle {
            self.set_state(RecorderState::Idle);
        }
    }

    fn do_start(&mut self) -> Result<(), RecorderError> {
        match self.state {
            RecorderState::Armed | RecorderState::Stopped | RecorderState::Saved => {}
            state => {
                return Err(RecordingStateError::Illegal {
                    action: "start recording",
                    state,
                }
                .into())
            }
        }
        let (device, kind, accumulator) =
            match (self.device.as_mut(), self.kind, self.accumulator.as_mut()) {
                (Some(device), Some(kind), Some(accumulator)) => (device, kind, accumulator),
                _ => {
                    return Err(RecordingStateError::Illegal {
                        action: "start recording",
                        state: self.state,
                    }
                    .into())
                }
            };

        accumulator.reset();
        self.pending = None;
        // Drain every preset so samples buffered before the recording
        // started are not included.
        for &preset in kind.presets() {
            if let Err(err) = device.poll(preset) {
                warn!(?preset, error = %err, "drain poll failed");
            }
        }
        self.set_state(RecorderState::Recording);
        info!("recording started");
        Ok(())
    }

    fn do_stop(&mut self) -> Result<(), RecorderError> {
        if self.state != RecorderState::Recording {
            return Err(RecordingStateError::Illegal {
                action: "stop recording",
                state: self.state,
            }
            .into());
        }
        // The primary group keeps the tick-by-tick accumulated record; each
        // secondary preset is fetched in a single bulk read because those
        // groups update too infrequently to be captured reliably per tick.
        let mut records = BTreeMap::new();
        if let (Some(device), Some(kind), Some(accumulator)) =
            (self.device.as_mut(), self.kind, self.accumulator.as_ref())
        {
            let primary = accumulator.snapshot();
            let epoch = accumulator.epoch();
            if !primary.is_empty() {
                records.insert(DataKind::from(kind.primary_preset()), primary);
            }
            for &preset in kind.secondary_presets() {
                match device.poll(preset) {
                    Ok(block) if !block.is_empty() => {
                        let layout = kind.layout(preset);
                        let epoch = epoch.unwrap_or(block.timestamps[0]);
                        records.insert(
                            DataKind::from(preset),
                            demux_with_epoch(&block, layout, epoch),
                        );
                    }
                    Ok(_) => {}
                    Err(err) => warn!(?preset, error = %err, "bulk read failed"),
                }
            }
        }
        self.pending = Some(records);
        self.set_state(RecorderState::Stopped);
        info!("recording stopped");
        Ok(())
    }

    fn do_save(&mut self, request: SaveRequest) -> Result<SavedRecording, RecorderError> {
        if self.state != RecorderState::Stopped {
            return Err(RecordingStateError::Illegal {
                action: "save recording",
                state: self.state,
            }
            .into());
        }
        let records = self
            .pending
            .clone()
            .ok_or(RecordingStateError::NothingToSave)?;
        let duration_secs = records
            .get(&DataKind::Eeg)
            .map(StreamRecord::duration_secs)
            .unwrap_or(0.0);
        let bundle = RecordingBundle {
            records,
            metadata: RecordingMetadata {
                name: request.name.unwrap_or_else(default_recording_name),
                subject_id: request.subject_id,
                description: request.description,
                duration_secs,
                created: Local::now(),
            },
        };
        let saved = save_bundle(&bundle, &request.folder, request.flat_exports)
            .map_err(RecorderError::Persist)?;
        self.set_state(RecorderState::Saved);
        let _ = self
            .events
            .send(RecorderEvent::RecordingSaved(saved.bundle_path.clone()));
        Ok(saved)
    }

    fn on_tick(&mut self) {
        self.poll_primary();
    }

    fn poll_primary(&mut self) {
        let (device, kind) = match (self.device.as_mut(), self.kind) {
            (Some(device), Some(kind)) => (device, kind),
            _ => return,
        };
        match device.poll(kind.primary_preset()) {
            Ok(block) => {
                if !block.is_empty() {
                    if let Some(accumulator) = self.accumulator.as_mut() {
                        accumulator.append(&block);
                    }
                }
            }
            // Transient: no data this tick.
            Err(err) => warn!(error = %err, "poll failed; treating as no new data"),
        }
    }

    fn set_state(&mut self, state: RecorderState) {
        if self.state != state {
            debug!(from = %self.state, to = %state, "recorder state change");
            self.state = state;
            let _ = self.events.send(RecorderEvent::StateChanged(state));
        }
    }
}
