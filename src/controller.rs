use anyhow::{Context, Result};
use opencv::core::Mat;
use opencv::prelude::*;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Instant;

use crate::capture::{FrameSource, OpenCvSource};
use crate::command::{command_queue, Command, CommandReceiver, CommandSender};
use crate::config::{Config, InputMode, SendMode};
use crate::error::{ErrorCounters, PipelineError};
use crate::osc::{self, FrameMeta, TelemetrySender};
use crate::overlay;
use crate::pose::{create_detector, ModelKind, Person, PoseBackend};
use crate::video::{TcpJpegSink, VideoSink};

/// Consecutive per-frame detector failures before a user-visible warning.
const DETECTOR_FAILURE_WARN_THRESHOLD: u32 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Stopped,
    Running,
    Paused,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped => write!(f, "STOPPED"),
            Self::Running => write!(f, "RUNNING"),
            Self::Paused => write!(f, "PAUSED"),
        }
    }
}

/// Read-only state published once per loop iteration for UIs and probes.
#[derive(Debug, Clone)]
pub struct StatusSnapshot {
    pub state: RunState,
    pub frame_count: u64,
    pub osc_active: bool,
    pub video_active: bool,
    pub config: Config,
    pub counters: ErrorCounters,
    pub last_warning: Option<String>,
}

/// Latest output frame, single slot, last writer wins. Stale reads are fine.
pub struct PreviewFrame {
    pub frame: Mat,
    pub frame_count: u64,
}

/// Cloneable access to a running controller: the command queue plus the
/// read-only snapshot and preview cells.
#[derive(Clone)]
pub struct ControllerHandle {
    tx: CommandSender,
    status: Arc<Mutex<StatusSnapshot>>,
    preview: Arc<Mutex<Option<PreviewFrame>>>,
}

impl ControllerHandle {
    pub fn send(&self, command: Command) {
        if self.tx.send(command).is_err() {
            log::warn!("[controller] command dropped, loop has exited");
        }
    }

    /// Clone of the queue's sending half for additional producers.
    pub fn sender(&self) -> CommandSender {
        self.tx.clone()
    }

    pub fn status(&self) -> StatusSnapshot {
        self.status.lock().unwrap().clone()
    }

    pub fn preview(&self) -> Option<PreviewFrame> {
        let guard = self.preview.lock().unwrap();
        let preview = guard.as_ref()?;
        let frame = preview.frame.try_clone().ok()?;
        Some(PreviewFrame {
            frame,
            frame_count: preview.frame_count,
        })
    }
}

type SourceFactory = Box<dyn FnMut(&Config) -> Result<Box<dyn FrameSource>> + Send>;
type DetectorFactory = Box<dyn FnMut(&Config) -> Result<Box<dyn PoseBackend>> + Send>;
type VideoFactory = Box<dyn FnMut(&Config) -> Result<Box<dyn VideoSink>> + Send>;

/// The pipeline core. Owns the capture source, detector and both output
/// channels exclusively; the only writer of Config and RunState. All outside
/// interaction goes through the command queue and the snapshot cells.
pub struct Controller {
    config: Config,
    state: RunState,
    rx: CommandReceiver,
    status: Arc<Mutex<StatusSnapshot>>,
    preview: Arc<Mutex<Option<PreviewFrame>>>,

    source: Option<Box<dyn FrameSource>>,
    detector: Option<Box<dyn PoseBackend>>,
    telemetry: Option<TelemetrySender>,
    video: Option<Box<dyn VideoSink>>,

    frame_count: u64,
    counters: ErrorCounters,
    consecutive_detector_failures: u32,
    last_warning: Option<String>,
    shutdown: bool,

    source_factory: SourceFactory,
    detector_factory: DetectorFactory,
    video_factory: VideoFactory,
}

/// Create the controller and its loop thread in one go.
pub fn spawn(config: Config) -> Result<(ControllerHandle, thread::JoinHandle<()>)> {
    let (tx, rx) = command_queue();
    let controller = Controller::new(config, rx);
    let handle = controller.handle(tx);
    let join = thread::Builder::new()
        .name("controller".to_string())
        .spawn(move || controller.run())
        .context("failed to spawn controller thread")?;
    Ok((handle, join))
}

impl Controller {
    pub fn new(config: Config, rx: CommandReceiver) -> Self {
        let status = Arc::new(Mutex::new(StatusSnapshot {
            state: RunState::Stopped,
            frame_count: 0,
            osc_active: false,
            video_active: false,
            config: config.clone(),
            counters: ErrorCounters::default(),
            last_warning: None,
        }));
        Self {
            config,
            state: RunState::Stopped,
            rx,
            status,
            preview: Arc::new(Mutex::new(None)),
            source: None,
            detector: None,
            telemetry: None,
            video: None,
            frame_count: 0,
            counters: ErrorCounters::default(),
            consecutive_detector_failures: 0,
            last_warning: None,
            shutdown: false,
            source_factory: Box::new(|config| {
                Ok(Box::new(OpenCvSource::open(config)?) as Box<dyn FrameSource>)
            }),
            detector_factory: Box::new(|config| {
                create_detector(config.detector.model, &config.detector.models_dir)
            }),
            video_factory: Box::new(|config| {
                Ok(Box::new(TcpJpegSink::bind(
                    &config.video.bind_addr,
                    &config.video.stream_name,
                    config.video.jpeg_quality,
                )?) as Box<dyn VideoSink>)
            }),
        }
    }

    pub fn handle(&self, tx: CommandSender) -> ControllerHandle {
        ControllerHandle {
            tx,
            status: Arc::clone(&self.status),
            preview: Arc::clone(&self.preview),
        }
    }

    /// The main loop. One iteration per tick; runs until Shutdown.
    pub fn run(mut self) {
        log::info!("[controller] loop started");
        while !self.shutdown {
            let tick_start = Instant::now();
            let tick = self.config.tick();

            self.drain_commands();
            if self.shutdown {
                break;
            }

            if self.state == RunState::Running {
                let result = panic::catch_unwind(AssertUnwindSafe(|| self.running_iteration()));
                if let Err(payload) = result {
                    let message = panic_message(payload);
                    log::error!("[controller] {}", PipelineError::Fatal(message.clone()));
                    self.last_warning = Some(format!("fatal: {message}"));
                    self.do_stop();
                }
            }

            self.publish_snapshot();

            // The remaining tick budget doubles as the command wait, so a
            // command arriving mid-sleep is applied without waiting out the
            // tick. Overruns skip the sleep; frames are never queued.
            let budget = tick.saturating_sub(tick_start.elapsed());
            if !budget.is_zero() {
                let received = self.rx.recv_timeout(budget);
                if let Ok(command) = received {
                    self.apply_command(command);
                }
            }
        }

        self.do_stop();
        self.publish_snapshot();
        log::info!("[controller] loop exited");
    }

    fn drain_commands(&mut self) {
        loop {
            let received = self.rx.try_recv();
            match received {
                Ok(command) => self.apply_command(command),
                Err(_) => break,
            }
        }
    }

    fn apply_command(&mut self, command: Command) {
        match command {
            Command::Start => self.handle_start(),
            Command::Stop => {
                log::info!("[controller] stopping");
                self.do_stop();
            }
            Command::Pause => match self.state {
                RunState::Running => self.set_state(RunState::Paused),
                RunState::Paused => self.set_state(RunState::Running),
                RunState::Stopped => log::debug!("[controller] pause ignored while stopped"),
            },
            Command::SelectInput(mode) => {
                self.config.input.mode = mode;
                log::info!("[config] input = {mode}");
            }
            Command::SetCamera(id) => {
                self.config.input.camera_id = id;
                log::info!("[config] camera_id = {id}");
            }
            Command::SetFile(path) => {
                log::info!("[config] video_file = {path}");
                self.config.input.video_file = Some(path);
            }
            Command::SetLoop(enabled) => {
                self.config.input.loop_video = enabled;
                log::info!("[config] loop_video = {enabled}");
            }
            Command::SetOscIp(ip) => {
                log::info!("[config] osc_ip = {ip} (takes effect on next osc start)");
                self.config.telemetry.osc_ip = ip;
            }
            Command::SetOscPort(port) => {
                self.config.telemetry.osc_port = port;
                log::info!("[config] osc_port = {port} (takes effect on next osc start)");
            }
            Command::SetModel(id) => self.handle_set_model(&id),
            Command::SetDrawOverlay(enabled) => {
                self.config.video.draw_overlay = enabled;
                log::info!("[config] draw_overlay = {enabled}");
            }
            Command::SetSendMode(mode) => {
                self.config.telemetry.send_mode = mode;
                log::info!("[config] send_mode = {mode}");
            }
            Command::SetStreamName(name) => {
                log::info!("[config] stream_name = {name} (takes effect on next video start)");
                self.config.video.stream_name = name;
            }
            Command::StartOsc => self.start_osc(),
            Command::StopOsc => self.stop_osc(),
            Command::StartVideo => self.start_video(),
            Command::StopVideo => self.stop_video(),
            Command::Shutdown => {
                log::info!("[controller] shutdown requested");
                self.shutdown = true;
            }
        }
    }

    fn handle_start(&mut self) {
        if self.state != RunState::Stopped {
            self.config_error(&format!("start ignored: pipeline is {}", self.state));
            return;
        }
        match self.open_pipeline() {
            Ok(()) => {
                self.frame_count = 0;
                self.consecutive_detector_failures = 0;
                self.write_mapping_file();
                self.set_state(RunState::Running);
            }
            Err(e) => {
                self.release_capture();
                self.source_error(&format!("{e:#}"));
            }
        }
    }

    fn open_pipeline(&mut self) -> Result<()> {
        let detector =
            (self.detector_factory)(&self.config).context("failed to create detector")?;
        let source = (self.source_factory)(&self.config).context("failed to open source")?;
        let (width, height) = source.resolution();
        log::info!(
            "[capture] source opened: {} ({width}x{height})",
            self.config.input.mode
        );
        self.detector = Some(detector);
        self.source = Some(source);
        Ok(())
    }

    fn handle_set_model(&mut self, id: &str) {
        if self.state != RunState::Stopped {
            self.config_error(&format!(
                "model change to {id:?} rejected while {}",
                self.state
            ));
            return;
        }
        match ModelKind::parse(id) {
            Some(kind) => {
                self.config.detector.model = kind;
                log::info!("[config] model = {kind}");
                self.write_mapping_file();
            }
            None => self.config_error(&format!("unknown model {id:?}")),
        }
    }

    fn start_osc(&mut self) {
        if self.telemetry.is_some() {
            log::warn!("[osc] client is already running");
            return;
        }
        match TelemetrySender::new(&self.config.osc_target()) {
            Ok(sender) => {
                log::info!("[osc] client started, sending to {}", sender.target());
                self.telemetry = Some(sender);
            }
            Err(e) => {
                self.counters.sink_errors += 1;
                log::error!("[osc] {}", PipelineError::Sink(format!("{e:#}")));
            }
        }
    }

    fn stop_osc(&mut self) {
        if self.telemetry.take().is_some() {
            log::info!("[osc] client closed");
        }
    }

    fn start_video(&mut self) {
        if self.video.is_some() {
            log::warn!("[video] publisher is already running");
            return;
        }
        match (self.video_factory)(&self.config) {
            Ok(sink) => self.video = Some(sink),
            Err(e) => {
                self.counters.sink_errors += 1;
                log::error!("[video] {}", PipelineError::Sink(format!("{e:#}")));
            }
        }
    }

    fn stop_video(&mut self) {
        if self.video.take().is_some() {
            log::info!("[video] publisher closed");
        }
    }

    /// Stop semantics shared by the Stop command, end-of-stream, source
    /// failure and the fatal path: release the capture pipeline, deactivate
    /// both outputs, transition to Stopped. Idempotent.
    fn do_stop(&mut self) {
        self.release_capture();
        self.stop_osc();
        self.stop_video();
        if self.state != RunState::Stopped {
            self.set_state(RunState::Stopped);
        }
    }

    fn release_capture(&mut self) {
        if let Some(mut source) = self.source.take() {
            if let Err(e) = source.close() {
                log::warn!("[capture] release failed: {e:#}");
            } else {
                log::info!("[capture] source released");
            }
        }
        self.detector = None;
    }

    fn running_iteration(&mut self) {
        let Some(frame) = self.read_frame() else {
            return;
        };
        self.frame_count += 1;
        let timestamp = unix_time();

        if self.frame_count == 1 || self.frame_count % self.config.app.fps_limit as u64 == 0 {
            log::debug!("[capture] processing frame {}", self.frame_count);
        }

        let persons = self.detect(&frame);

        let output = if self.config.video.draw_overlay {
            match frame.try_clone() {
                Ok(mut copy) => {
                    let schema = self.config.detector.model.schema();
                    if let Err(e) = overlay::draw_persons(&mut copy, &persons, schema) {
                        log::warn!("[overlay] draw failed: {e:#}");
                    }
                    copy
                }
                Err(e) => {
                    log::warn!("[overlay] frame copy failed: {e:#}");
                    frame
                }
            }
        } else {
            frame
        };

        if let Some(video) = self.video.as_mut() {
            if let Err(e) = video.publish(&output) {
                self.counters.sink_errors += 1;
                log::warn!("[video] {}", PipelineError::Sink(format!("{e:#}")));
            }
        }

        if self.telemetry.is_some() {
            let meta = FrameMeta {
                frame_count: self.frame_count,
                timestamp,
                width: output.cols() as u32,
                height: output.rows() as u32,
            };
            self.send_telemetry(&meta, &persons);
        }

        *self.preview.lock().unwrap() = Some(PreviewFrame {
            frame: output,
            frame_count: self.frame_count,
        });
    }

    fn read_frame(&mut self) -> Option<Mat> {
        let should_loop =
            self.config.input.mode == InputMode::File && self.config.input.loop_video;
        let result = match self.source.as_mut() {
            Some(source) => read_with_loop(source.as_mut(), should_loop),
            None => Err(anyhow::anyhow!("running without an open source")),
        };
        match result {
            Ok(Some(frame)) => Some(frame),
            Ok(None) => {
                log::info!("[capture] end of stream, stopping");
                self.do_stop();
                None
            }
            Err(e) => {
                self.source_error(&format!("{e:#}"));
                self.do_stop();
                None
            }
        }
    }

    fn detect(&mut self, frame: &Mat) -> Vec<Person> {
        let Some(detector) = self.detector.as_mut() else {
            return Vec::new();
        };
        match detector.process(frame) {
            Ok(persons) => {
                self.consecutive_detector_failures = 0;
                persons
            }
            Err(e) => {
                self.counters.detector_errors += 1;
                self.consecutive_detector_failures += 1;
                log::warn!("[detector] {}", PipelineError::Detector(format!("{e:#}")));
                if self.consecutive_detector_failures == DETECTOR_FAILURE_WARN_THRESHOLD {
                    let warning = format!(
                        "detector failed {DETECTOR_FAILURE_WARN_THRESHOLD} frames in a row"
                    );
                    log::error!("[detector] {warning}");
                    self.last_warning = Some(warning);
                }
                Vec::new()
            }
        }
    }

    fn send_telemetry(&mut self, meta: &FrameMeta, persons: &[Person]) {
        let Some(telemetry) = self.telemetry.as_ref() else {
            return;
        };
        let model = self.config.detector.model;
        let schema = model.schema();

        let per_frame = match self.config.telemetry.send_mode {
            SendMode::Bundle => telemetry.send_packet(&osc::frame_bundle(meta, persons)),
            SendMode::Legacy => {
                telemetry.send_messages(&osc::legacy_messages(meta, persons, schema))
            }
        };
        let periodic = if osc::is_periodic_tick(meta.frame_count, self.config.app.fps_limit) {
            telemetry.send_packet(&osc::periodic_bundle(meta, model.display_name(), schema))
        } else {
            Ok(())
        };

        for result in [per_frame, periodic] {
            if let Err(e) = result {
                self.counters.sink_errors += 1;
                log::warn!("[osc] {}", PipelineError::Sink(format!("{e:#}")));
            }
        }
    }

    fn write_mapping_file(&mut self) {
        let schema = self.config.detector.model.schema();
        let path = &self.config.app.mapping_file;
        match schema.write_mapping_file(path) {
            Ok(()) => log::info!("[config] landmark mapping written to {path}"),
            Err(e) => log::warn!("[config] mapping file write failed: {e:#}"),
        }
    }

    fn set_state(&mut self, new_state: RunState) {
        log::info!("[state] {} -> {}", self.state, new_state);
        self.state = new_state;
    }

    fn config_error(&mut self, message: &str) {
        self.counters.config_errors += 1;
        log::warn!("[controller] {}", PipelineError::Config(message.to_string()));
    }

    fn source_error(&mut self, message: &str) {
        log::error!("[capture] {}", PipelineError::Source(message.to_string()));
        self.last_warning = Some(message.to_string());
    }

    fn publish_snapshot(&self) {
        let snapshot = StatusSnapshot {
            state: self.state,
            frame_count: self.frame_count,
            osc_active: self.telemetry.is_some(),
            video_active: self.video.is_some(),
            config: self.config.clone(),
            counters: self.counters,
            last_warning: self.last_warning.clone(),
        };
        *self.status.lock().unwrap() = snapshot;
    }
}

/// Read one frame, seeking back to the start once at end-of-stream when the
/// source loops. `Ok(None)` is a definitive end-of-stream.
fn read_with_loop(source: &mut dyn FrameSource, should_loop: bool) -> Result<Option<Mat>> {
    match source.read()? {
        Some(frame) => Ok(Some(frame)),
        None if should_loop => {
            log::info!("[capture] end of stream, looping");
            source.rewind()?;
            source.read()
        }
        None => Ok(None),
    }
}

fn unix_time() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::SyntheticDetector;
    use opencv::core::{Scalar, CV_8UC3};
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::time::Duration;

    struct StubSource {
        remaining: u32,
        total: u32,
        rewinds: Arc<AtomicU32>,
        closed: Arc<AtomicBool>,
    }

    impl FrameSource for StubSource {
        fn read(&mut self) -> Result<Option<Mat>> {
            if self.remaining == 0 {
                return Ok(None);
            }
            self.remaining -= 1;
            let frame =
                Mat::new_rows_cols_with_default(48, 64, CV_8UC3, Scalar::all(0.0))?;
            Ok(Some(frame))
        }

        fn rewind(&mut self) -> Result<()> {
            self.remaining = self.total;
            self.rewinds.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn resolution(&self) -> (u32, u32) {
            (64, 48)
        }

        fn close(&mut self) -> Result<()> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingDetector;

    impl PoseBackend for FailingDetector {
        fn process(&mut self, _frame: &Mat) -> Result<Vec<Person>> {
            anyhow::bail!("backend exploded")
        }

        fn kind(&self) -> ModelKind {
            ModelKind::Synthetic
        }
    }

    struct Harness {
        handle: ControllerHandle,
        join: thread::JoinHandle<()>,
        rewinds: Arc<AtomicU32>,
        closed: Arc<AtomicBool>,
    }

    impl Harness {
        fn shutdown(self) {
            self.handle.send(Command::Shutdown);
            self.join.join().unwrap();
        }
    }

    fn test_config() -> Config {
        let mut config = Config::default();
        config.app.fps_limit = 100;
        config.detector.model = ModelKind::Synthetic;
        config.video.draw_overlay = false;
        // Leaked so the directory outlives the controller thread
        let dir = Box::leak(Box::new(tempfile::tempdir().unwrap()));
        config.app.mapping_file = dir
            .path()
            .join("landmark_map.csv")
            .to_string_lossy()
            .into_owned();
        config
    }

    fn spawn_with_stub(config: Config, frames: u32, failing_detector: bool) -> Harness {
        let rewinds = Arc::new(AtomicU32::new(0));
        let closed = Arc::new(AtomicBool::new(false));
        let (tx, rx) = command_queue();
        let mut controller = Controller::new(config, rx);

        let rewinds_ref = Arc::clone(&rewinds);
        let closed_ref = Arc::clone(&closed);
        controller.source_factory = Box::new(move |_| {
            closed_ref.store(false, Ordering::SeqCst);
            Ok(Box::new(StubSource {
                remaining: frames,
                total: frames,
                rewinds: Arc::clone(&rewinds_ref),
                closed: Arc::clone(&closed_ref),
            }) as Box<dyn FrameSource>)
        });
        controller.detector_factory = Box::new(move |_| {
            if failing_detector {
                Ok(Box::new(FailingDetector) as Box<dyn PoseBackend>)
            } else {
                Ok(Box::new(SyntheticDetector::new()) as Box<dyn PoseBackend>)
            }
        });

        let handle = controller.handle(tx);
        let join = thread::spawn(move || controller.run());
        Harness {
            handle,
            join,
            rewinds,
            closed,
        }
    }

    fn wait_for<F: Fn() -> bool>(condition: F, what: &str) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return;
            }
            thread::sleep(Duration::from_millis(10));
        }
        panic!("timeout waiting for {what}");
    }

    #[test]
    fn test_start_stop_lifecycle() {
        let harness = spawn_with_stub(test_config(), 100_000, false);
        let handle = harness.handle.clone();

        handle.send(Command::Start);
        wait_for(
            || handle.status().state == RunState::Running && handle.status().frame_count > 0,
            "running with frames",
        );

        handle.send(Command::Stop);
        wait_for(|| handle.status().state == RunState::Stopped, "stopped");
        assert!(harness.closed.load(Ordering::SeqCst), "source not released");

        harness.shutdown();
    }

    #[test]
    fn test_stop_is_idempotent() {
        let harness = spawn_with_stub(test_config(), 100, false);
        let handle = harness.handle.clone();
        handle.send(Command::Stop);
        handle.send(Command::Stop);
        wait_for(|| handle.status().state == RunState::Stopped, "stopped");
        harness.shutdown();
    }

    #[test]
    fn test_set_model_rejected_while_running() {
        let harness = spawn_with_stub(test_config(), 100_000, false);
        let handle = harness.handle.clone();

        handle.send(Command::Start);
        wait_for(|| handle.status().state == RunState::Running, "running");

        handle.send(Command::SetModel("movenet".to_string()));
        wait_for(
            || handle.status().counters.config_errors >= 1,
            "config error counted",
        );
        let status = handle.status();
        assert_eq!(status.state, RunState::Running);
        assert_eq!(status.config.detector.model, ModelKind::Synthetic);

        // Accepted while stopped
        handle.send(Command::Stop);
        wait_for(|| handle.status().state == RunState::Stopped, "stopped");
        handle.send(Command::SetModel("movenet".to_string()));
        wait_for(
            || handle.status().config.detector.model == ModelKind::MoveNet,
            "model applied",
        );

        harness.shutdown();
    }

    #[test]
    fn test_unknown_model_is_config_error() {
        let harness = spawn_with_stub(test_config(), 100, false);
        let handle = harness.handle.clone();
        handle.send(Command::SetModel("blazepose".to_string()));
        wait_for(
            || handle.status().counters.config_errors >= 1,
            "config error counted",
        );
        assert_eq!(handle.status().config.detector.model, ModelKind::Synthetic);
        harness.shutdown();
    }

    #[test]
    fn test_pause_keeps_frame_count_monotonic() {
        let harness = spawn_with_stub(test_config(), 100_000, false);
        let handle = harness.handle.clone();

        handle.send(Command::Start);
        wait_for(|| handle.status().frame_count > 5, "frames flowing");

        handle.send(Command::Pause);
        wait_for(|| handle.status().state == RunState::Paused, "paused");
        let paused_at = handle.status().frame_count;
        thread::sleep(Duration::from_millis(150));
        assert_eq!(handle.status().frame_count, paused_at);

        handle.send(Command::Pause);
        wait_for(|| handle.status().state == RunState::Running, "resumed");
        wait_for(
            || handle.status().frame_count > paused_at,
            "frames continue after resume",
        );

        harness.shutdown();
    }

    #[test]
    fn test_frame_count_resets_on_restart() {
        let harness = spawn_with_stub(test_config(), 100_000, false);
        let handle = harness.handle.clone();

        handle.send(Command::Start);
        wait_for(|| handle.status().frame_count >= 50, "first session frames");
        handle.send(Command::Stop);
        wait_for(|| handle.status().state == RunState::Stopped, "stopped");

        handle.send(Command::Start);
        wait_for(
            || handle.status().state == RunState::Running && handle.status().frame_count >= 1,
            "second session running",
        );
        assert!(handle.status().frame_count < 50, "frame_count did not reset");

        harness.shutdown();
    }

    #[test]
    fn test_end_of_stream_stops_and_releases() {
        let harness = spawn_with_stub(test_config(), 5, false);
        let handle = harness.handle.clone();

        handle.send(Command::Start);
        wait_for(|| handle.status().state == RunState::Stopped, "auto-stopped");
        assert_eq!(handle.status().frame_count, 5);
        assert!(harness.closed.load(Ordering::SeqCst));
        assert_eq!(harness.rewinds.load(Ordering::SeqCst), 0);

        harness.shutdown();
    }

    #[test]
    fn test_end_of_stream_loops_when_enabled() {
        let mut config = test_config();
        config.input.mode = InputMode::File;
        config.input.video_file = Some("clip.mp4".to_string());
        config.input.loop_video = true;
        let harness = spawn_with_stub(config, 5, false);
        let handle = harness.handle.clone();

        handle.send(Command::Start);
        wait_for(
            || handle.status().frame_count > 12,
            "frame count continues across loops",
        );
        assert_eq!(handle.status().state, RunState::Running);
        assert!(harness.rewinds.load(Ordering::SeqCst) >= 2);

        harness.shutdown();
    }

    #[test]
    fn test_start_failure_stays_stopped() {
        let (tx, rx) = command_queue();
        let mut controller = Controller::new(test_config(), rx);
        controller.source_factory = Box::new(|_| anyhow::bail!("device busy"));
        let handle = controller.handle(tx);
        let join = thread::spawn(move || controller.run());

        handle.send(Command::Start);
        wait_for(|| handle.status().last_warning.is_some(), "warning surfaced");
        let status = handle.status();
        assert_eq!(status.state, RunState::Stopped);
        assert!(status.last_warning.unwrap().contains("device busy"));

        handle.send(Command::Shutdown);
        join.join().unwrap();
    }

    #[test]
    fn test_detector_failures_absorbed_and_escalated() {
        let harness = spawn_with_stub(test_config(), 100_000, true);
        let handle = harness.handle.clone();

        handle.send(Command::Start);
        wait_for(
            || handle.status().counters.detector_errors >= DETECTOR_FAILURE_WARN_THRESHOLD as u64,
            "detector errors counted",
        );
        let status = handle.status();
        // Failures are non-fatal: the loop keeps running on zero persons
        assert_eq!(status.state, RunState::Running);
        assert!(status
            .last_warning
            .expect("warning not surfaced")
            .contains("in a row"));

        harness.shutdown();
    }

    #[test]
    fn test_telemetry_end_to_end() {
        use std::net::UdpSocket;

        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let port = receiver.local_addr().unwrap().port();

        let mut config = test_config();
        config.telemetry.osc_ip = "127.0.0.1".to_string();
        config.telemetry.osc_port = port;
        config.app.fps_limit = 20;

        let harness = spawn_with_stub(config, 100_000, false);
        let handle = harness.handle.clone();
        handle.send(Command::StartOsc);
        handle.send(Command::Start);

        // Scan incoming packets for one frame bundle and one periodic bundle
        let mut saw_frame = false;
        let mut saw_periodic = false;
        let mut buf = [0u8; 8192];
        let deadline = Instant::now() + Duration::from_secs(5);
        while (!saw_frame || !saw_periodic) && Instant::now() < deadline {
            let Ok((size, _)) = receiver.recv_from(&mut buf) else {
                break;
            };
            let Ok((_, packet)) = rosc::decoder::decode_udp(&buf[..size]) else {
                continue;
            };
            if let rosc::OscPacket::Bundle(bundle) = packet {
                for inner in &bundle.content {
                    if let rosc::OscPacket::Message(msg) = inner {
                        if msg.addr == "/pose/frame_count" {
                            saw_frame = true;
                        }
                        if msg.addr == "/pose/model_name" {
                            saw_periodic = true;
                        }
                    }
                }
            }
        }
        assert!(saw_frame, "no frame bundle received");
        assert!(saw_periodic, "no periodic metadata bundle received");

        let status = handle.status();
        assert!(status.osc_active);

        harness.shutdown();
    }

    #[test]
    fn test_config_updates_while_running_do_not_touch_source() {
        let harness = spawn_with_stub(test_config(), 100_000, false);
        let handle = harness.handle.clone();

        handle.send(Command::Start);
        wait_for(|| handle.status().state == RunState::Running, "running");
        let frames_before = handle.status().frame_count;

        handle.send(Command::SelectInput(InputMode::File));
        handle.send(Command::SetFile("clip.mp4".to_string()));
        wait_for(
            || handle.status().config.input.mode == InputMode::File,
            "config updated",
        );
        // Still running off the originally opened source
        assert_eq!(handle.status().state, RunState::Running);
        wait_for(
            || handle.status().frame_count > frames_before,
            "frames still flowing",
        );

        harness.shutdown();
    }

    #[test]
    fn test_mapping_file_written_on_start() {
        let config = test_config();
        let mapping_path = config.app.mapping_file.clone();
        let harness = spawn_with_stub(config, 100_000, false);
        let handle = harness.handle.clone();

        handle.send(Command::Start);
        wait_for(|| handle.status().state == RunState::Running, "running");

        let content = std::fs::read_to_string(&mapping_path).unwrap();
        assert_eq!(content.lines().count(), 33);
        assert!(content.starts_with("0,head"));

        harness.shutdown();
    }
}
