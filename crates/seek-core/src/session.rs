//! Device session: handshake, acquisition thread and consumer controls.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::calibration::{CalibrationPayload, CalibrationStore};
use crate::config::{DeviceConfig, SharedConfig};
use crate::events::{CameraEvent, CameraObserver, DeviceDescriptor, TracingObserver};
use crate::exposure::{ExposureController, ExposureRange};
use crate::pipeline::{self, ProcessedFrame};
use crate::protocol::constants::START_GET_IMAGE_TRANSFER;
use crate::protocol::{CalibrationKind, FrameKind, FrameSequencer, RawFrame, SensorModel, SequenceStep};
use crate::radiometry;
use crate::shutter::{ShutterController, ShutterMode};
use crate::state::{DriverState, HandshakeError, InvalidTransition, StateMachine, run_handshake};
use crate::transport::{ControlTransfer, Expect, TransportError, UsbTransport};

/// Pause after a transient transfer failure before the next attempt.
const TRANSIENT_BACKOFF: Duration = Duration::from_millis(50);

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Unsupported device: VID={vid:04X} PID={pid:04X}")]
    UnsupportedDevice { vid: u16, pid: u16 },

    #[error(transparent)]
    Handshake(#[from] HandshakeError),

    #[error(transparent)]
    State(#[from] InvalidTransition),

    #[error("Session is not streaming")]
    NotRunning,

    #[error("Failed to spawn acquisition thread: {0}")]
    Spawn(std::io::Error),
}

/// Requests queued from the consumer to the acquisition thread, which owns
/// every USB transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    ToggleShutter,
    TriggerShutter,
}

/// One camera, from handshake to disconnect.
pub struct DeviceSession<T: UsbTransport + 'static, O: CameraObserver + 'static> {
    transport: Option<Arc<T>>,
    observer: Arc<O>,
    descriptor: DeviceDescriptor,
    config: SharedConfig,
    state: StateMachine,
    stop: Arc<AtomicBool>,
    exposure: Arc<Mutex<ExposureController>>,
    commands: Option<Sender<Command>>,
    worker: Option<JoinHandle<()>>,
}

impl<T: UsbTransport + 'static> DeviceSession<T, TracingObserver> {
    /// Create a new session with the default tracing observer.
    pub fn new(transport: T, config: DeviceConfig) -> Result<Self, SessionError> {
        Self::with_observer(transport, config, Arc::new(TracingObserver))
    }
}

impl<T: UsbTransport + 'static, O: CameraObserver + 'static> DeviceSession<T, O> {
    /// Create a new session with a custom observer. Fails if the product id
    /// is not a known sensor.
    pub fn with_observer(
        transport: T,
        config: DeviceConfig,
        observer: Arc<O>,
    ) -> Result<Self, SessionError> {
        let vid = transport.vendor_id();
        let pid = transport.product_id();
        let model =
            SensorModel::from_product_id(pid).ok_or(SessionError::UnsupportedDevice { vid, pid })?;

        Ok(Self {
            transport: Some(Arc::new(transport)),
            observer,
            descriptor: DeviceDescriptor::new(vid, pid, model),
            config: SharedConfig::new(config),
            state: StateMachine::new(),
            stop: Arc::new(AtomicBool::new(false)),
            exposure: Arc::new(Mutex::new(ExposureController::new())),
            commands: None,
            worker: None,
        })
    }

    /// Run the handshake on the calling thread, then start acquisition on a
    /// worker thread. A failed handshake releases the device and reports one
    /// `on_disconnect`.
    #[instrument(skip(self), fields(device = %self.descriptor))]
    pub fn start(&mut self) -> Result<(), SessionError> {
        let transport = self.transport.clone().ok_or(SessionError::NotRunning)?;
        self.transition(DriverState::Handshaking)?;

        let report = match run_handshake(transport.as_ref()) {
            Ok(report) => report,
            Err(e) => {
                warn!(step = %e.step(), error = %e, "Handshake failed");
                self.transport = None;
                drop(transport);
                if self.transition(DriverState::Disconnected).is_ok() {
                    self.observer.on_disconnect(&self.descriptor);
                }
                return Err(e.into());
            }
        };
        self.descriptor.apply_report(report);
        self.transition(DriverState::Ready)?;
        self.observer.on_connect(&self.descriptor);

        let (tx, rx) = mpsc::channel();
        let worker = Worker {
            transport,
            observer: Arc::clone(&self.observer),
            descriptor: self.descriptor.clone(),
            model: self.descriptor.model,
            config: self.config.clone(),
            state: self.state.clone(),
            stop: Arc::clone(&self.stop),
            commands: rx,
            exposure: Arc::clone(&self.exposure),
            shutter: ShutterController::new(ShutterMode::Auto),
            calibration: CalibrationStore::new(),
            sequencer: FrameSequencer::new(),
        };
        self.transport = None;

        let handle = thread::Builder::new()
            .name("seek-acquisition".into())
            .spawn(move || worker.run())
            .map_err(|e| {
                let _ = self.state.goto(DriverState::Disconnected);
                SessionError::Spawn(e)
            })?;
        self.commands = Some(tx);
        self.worker = Some(handle);
        Ok(())
    }

    /// Stop acquisition and release the device. No callbacks fire once this
    /// has been called. Safe to call repeatedly.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        self.commands = None;
        self.join();
        self.transport = None;
        if self.state.goto(DriverState::Disconnected).is_ok() {
            info!(device = %self.descriptor, "Session stopped");
        }
    }

    /// Block until the acquisition thread exits on its own, i.e. after a
    /// disconnect.
    pub fn join(&mut self) {
        if let Some(handle) = self.worker.take()
            && handle.join().is_err()
        {
            warn!("Acquisition thread panicked");
        }
    }

    /// Flip between Auto and Manual shutter. The command is issued by the
    /// acquisition thread before its next frame request.
    pub fn toggle_shutter(&self) -> Result<(), SessionError> {
        self.send(Command::ToggleShutter)
    }

    /// Fire one shutter cycle, producing a fresh FSC frame.
    pub fn trigger_shutter(&self) -> Result<(), SessionError> {
        self.send(Command::TriggerShutter)
    }

    /// Store the range of the most recent frame as the locked exposure
    /// thresholds. Returns `None` before the first image frame.
    pub fn reset_exposure_thresholds(&self) -> Option<ExposureRange> {
        self.exposure
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .reset_thresholds(&self.config)
    }

    /// Shared configuration; updates apply from the next frame.
    pub fn config(&self) -> SharedConfig {
        self.config.clone()
    }

    pub fn state(&self) -> DriverState {
        self.state.current()
    }

    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    pub fn is_running(&self) -> bool {
        self.state.current().is_active()
    }

    fn send(&self, command: Command) -> Result<(), SessionError> {
        if !self.is_running() {
            return Err(SessionError::NotRunning);
        }
        self.commands
            .as_ref()
            .ok_or(SessionError::NotRunning)?
            .send(command)
            .map_err(|_| SessionError::NotRunning)
    }

    fn transition(&self, to: DriverState) -> Result<(), InvalidTransition> {
        let from = self.state.goto(to)?;
        self.observer.on_event(&CameraEvent::StateChanged { from, to });
        Ok(())
    }
}

impl<T: UsbTransport + 'static, O: CameraObserver + 'static> Drop for DeviceSession<T, O> {
    fn drop(&mut self) {
        self.stop();
    }
}

/// State owned by the acquisition thread.
struct Worker<T: UsbTransport, O: CameraObserver> {
    transport: Arc<T>,
    observer: Arc<O>,
    descriptor: DeviceDescriptor,
    model: SensorModel,
    config: SharedConfig,
    state: StateMachine,
    stop: Arc<AtomicBool>,
    commands: Receiver<Command>,
    exposure: Arc<Mutex<ExposureController>>,
    shutter: ShutterController,
    calibration: CalibrationStore,
    sequencer: FrameSequencer,
}

impl<T: UsbTransport, O: CameraObserver> Worker<T, O> {
    fn run(mut self) {
        if let Ok(from) = self.state.goto(DriverState::Streaming) {
            self.emit(CameraEvent::StateChanged {
                from,
                to: DriverState::Streaming,
            });
        }

        while !self.stopped() {
            match self.iterate() {
                Ok(()) => {}
                Err(e) if e.is_fatal() => {
                    self.teardown(&e);
                    return;
                }
                Err(e) => {
                    warn!(error = %e, "Transient transfer error, continuing");
                    self.emit(CameraEvent::TransientError {
                        message: e.to_string(),
                    });
                    thread::sleep(TRANSIENT_BACKOFF);
                }
            }
        }
        debug!("Acquisition loop stopped");
    }

    fn stopped(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    fn emit(&self, event: CameraEvent) {
        if !self.stopped() {
            self.observer.on_event(&event);
        }
    }

    /// Fatal path. The state transition guards against reporting twice.
    fn teardown(&self, error: &TransportError) {
        if self.state.goto(DriverState::Disconnected).is_ok() && !self.stopped() {
            warn!(device = %self.descriptor, error = %error, "Device lost");
            self.observer.on_disconnect(&self.descriptor);
        }
    }

    fn iterate(&mut self) -> Result<(), TransportError> {
        self.run_commands()?;

        let config = self.config.snapshot().sanitized();
        if config.shutter_mode != self.shutter.mode() {
            self.shutter.set_mode(self.transport.as_ref(), config.shutter_mode)?;
            self.emit(CameraEvent::ShutterModeChanged {
                mode: config.shutter_mode,
            });
        }

        if self.stopped() {
            return Ok(());
        }
        let frame_words = self.model.frame_words() as u32;
        self.transport.control_transfer(
            ControlTransfer::Out {
                request: START_GET_IMAGE_TRANSFER,
                data: &frame_words.to_le_bytes(),
            },
            Expect::ExactLength,
        )?;
        let data = self.transport.bulk_read(self.model.frame_bytes())?;

        match RawFrame::decode(&data, self.model) {
            Ok(frame) => self.route(frame, &config),
            Err(e) => {
                debug!(error = %e, "Malformed frame");
                self.emit(CameraEvent::FrameDiscarded {
                    reason: e.to_string(),
                });
            }
        }
        Ok(())
    }

    fn run_commands(&mut self) -> Result<(), TransportError> {
        while let Ok(command) = self.commands.try_recv() {
            match command {
                Command::ToggleShutter => {
                    let mode = self.shutter.toggle(self.transport.as_ref())?;
                    self.config.update(|c| c.shutter_mode = mode);
                    self.emit(CameraEvent::ShutterModeChanged { mode });
                }
                Command::TriggerShutter => {
                    self.shutter.trigger(self.transport.as_ref())?;
                    self.emit(CameraEvent::ShutterTriggered);
                }
            }
        }
        Ok(())
    }

    fn route(&mut self, frame: RawFrame, config: &DeviceConfig) {
        let frame_count = frame.header().frame_count;
        let (sequence, step) = self.sequencer.observe(frame_count);

        match frame.kind() {
            FrameKind::Calibration(kind) => {
                if step == SequenceStep::Backwards {
                    self.calibration.rearm();
                    self.emit(CameraEvent::CalibrationRearmed { frame_count });
                }
                let payload = CalibrationPayload {
                    frame_count,
                    pixels: frame.region(self.model.image_region()),
                };
                let became_ready = self.calibration.record(kind, payload);
                self.emit(CameraEvent::CalibrationRecorded { kind, frame_count });
                if became_ready {
                    self.emit(CameraEvent::CalibrationReady);
                }
            }
            FrameKind::Image => {
                if step == SequenceStep::Backwards {
                    debug!(frame_count, sequence, "Counter went backwards on an image frame");
                }
                self.process_image(&frame, sequence, config);
            }
            FrameKind::Unknown(tag) => {
                debug!(tag, frame_count, "Unknown frame type");
                self.emit(CameraEvent::FrameDiscarded {
                    reason: format!("unknown frame type {tag}"),
                });
            }
        }
    }

    fn process_image(&mut self, frame: &RawFrame, sequence: u64, config: &DeviceConfig) {
        let calibration = self.calibration.snapshot();
        let pixels = frame.region(self.model.image_region());
        let correction = radiometry::correct(&pixels, &calibration);

        // Observed on the corrected values, before filtering.
        let range = self
            .exposure
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .range_for(&correction.matrix, config);
        let sharpness = pipeline::sharpness_gain(calibration.get(CalibrationKind::Sharpness));
        let filtered = pipeline::filter(&correction.matrix, config, sharpness);
        let intensity = pipeline::map_exposure(&filtered, range);
        let image = pipeline::colorize(&intensity, config);

        let processed = ProcessedFrame {
            image,
            sequence,
            frame_count: frame.header().frame_count,
            corrected: correction.corrected,
            exposure: range,
        };
        if !self.stopped() {
            self.observer.on_frame(&self.descriptor, &processed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    use crate::protocol::constants::*;
    use crate::protocol::frame::tests::frame_bytes;
    use crate::transport::{MockFault, MockTransport};

    #[derive(Debug, Clone, Copy)]
    struct FrameRecord {
        sequence: u64,
        frame_count: u16,
        corrected: bool,
        dims: (u32, u32),
        exposure: ExposureRange,
    }

    #[derive(Default)]
    struct Recorder {
        connects: AtomicUsize,
        disconnects: AtomicUsize,
        frames: Mutex<Vec<FrameRecord>>,
        events: Mutex<Vec<CameraEvent>>,
    }

    impl CameraObserver for Recorder {
        fn on_connect(&self, _device: &DeviceDescriptor) {
            self.connects.fetch_add(1, Ordering::SeqCst);
        }

        fn on_disconnect(&self, _device: &DeviceDescriptor) {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
        }

        fn on_frame(&self, _device: &DeviceDescriptor, frame: &ProcessedFrame) {
            self.frames.lock().unwrap().push(FrameRecord {
                sequence: frame.sequence,
                frame_count: frame.frame_count,
                corrected: frame.corrected,
                dims: frame.image.dimensions(),
                exposure: frame.exposure,
            });
        }

        fn on_event(&self, event: &CameraEvent) {
            self.events.lock().unwrap().push(event.clone());
        }
    }

    const MODEL: SensorModel = SensorModel::S104SP;

    impl Recorder {
        fn has_event(&self, event: &CameraEvent) -> bool {
            self.events.lock().unwrap().contains(event)
        }
    }

    fn session(mock: &MockTransport) -> (DeviceSession<MockTransport, Recorder>, Arc<Recorder>) {
        session_with(mock, DeviceConfig::default())
    }

    fn session_with(
        mock: &MockTransport,
        config: DeviceConfig,
    ) -> (DeviceSession<MockTransport, Recorder>, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        let session = DeviceSession::with_observer(mock.clone(), config, recorder.clone()).unwrap();
        (session, recorder)
    }

    fn queue_calibration(mock: &MockTransport, first_count: u16) {
        let kinds = [
            (FRAME_TYPE_FSC_CALIBRATION, 100),
            (FRAME_TYPE_DP_CALIBRATION, 1),
            (FRAME_TYPE_GRADIENT_CALIBRATION, 50),
            (FRAME_TYPE_SHARPNESS_CALIBRATION, 10),
        ];
        for (i, (tag, fill)) in kinds.into_iter().enumerate() {
            mock.queue_frame(frame_bytes(MODEL, first_count + i as u16, tag, fill));
        }
    }

    fn wait_until(mut cond: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(Instant::now() < deadline, "timed out");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_calibration_then_image() {
        let mock = MockTransport::new();
        mock.queue_frame(frame_bytes(MODEL, 10, FRAME_TYPE_FSC_CALIBRATION, 100));
        mock.queue_frame(frame_bytes(MODEL, 11, FRAME_TYPE_DP_CALIBRATION, 1));
        mock.queue_frame(frame_bytes(MODEL, 12, FRAME_TYPE_GRADIENT_CALIBRATION, 50));
        mock.queue_frame(frame_bytes(MODEL, 13, FRAME_TYPE_SHARPNESS_CALIBRATION, 10));
        mock.queue_frame(frame_bytes(MODEL, 14, FRAME_TYPE_IMAGE, 500));
        mock.disconnect_when_drained();

        let (mut session, recorder) = session(&mock);
        session.start().unwrap();
        session.join();

        let frames = recorder.frames.lock().unwrap().clone();
        assert_eq!(frames.len(), 1);
        assert_eq!((frames[0].sequence, frames[0].frame_count), (14, 14));
        assert!(frames[0].corrected);
        let roi = MODEL.image_region();
        assert_eq!(frames[0].dims, (roi.width as u32, roi.height as u32));

        assert_eq!(recorder.connects.load(Ordering::SeqCst), 1);
        assert_eq!(recorder.disconnects.load(Ordering::SeqCst), 1);
        assert_eq!(session.state(), DriverState::Disconnected);
        assert!(recorder
            .events
            .lock()
            .unwrap()
            .contains(&CameraEvent::CalibrationReady));

        let start = mock.requests(START_GET_IMAGE_TRANSFER);
        assert_eq!(start[0].data, (MODEL.frame_words() as u32).to_le_bytes());
    }

    #[test]
    fn test_image_before_calibration_is_uncorrected() {
        let mock = MockTransport::new();
        mock.queue_frame(frame_bytes(MODEL, 1, FRAME_TYPE_IMAGE, 300));
        mock.queue_frame(vec![0; 10]);
        mock.queue_frame(frame_bytes(MODEL, 2, 99, 0));
        mock.disconnect_when_drained();

        let (mut session, recorder) = session(&mock);
        session.start().unwrap();
        session.join();

        let frames = recorder.frames.lock().unwrap().clone();
        assert_eq!(frames.len(), 1);
        assert!(!frames[0].corrected);
        let discarded = recorder
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| matches!(e, CameraEvent::FrameDiscarded { .. }))
            .count();
        assert_eq!(discarded, 2);
    }

    #[test]
    fn test_handshake_failure_reports_once() {
        let mock = MockTransport::new();
        mock.fail_request(SET_IMAGE_PROCESSING_MODE, MockFault::Stall);

        let (mut session, recorder) = session(&mock);
        let err = session.start().unwrap_err();
        assert!(matches!(err, SessionError::Handshake(_)));
        assert_eq!(session.state(), DriverState::Disconnected);

        session.stop();
        drop(session);
        assert_eq!(recorder.connects.load(Ordering::SeqCst), 0);
        assert_eq!(recorder.disconnects.load(Ordering::SeqCst), 1);
        assert!(recorder.frames.lock().unwrap().is_empty());
        assert!(mock.requests(START_GET_IMAGE_TRANSFER).is_empty());
    }

    #[test]
    fn test_double_toggle_returns_to_auto() {
        let mock = MockTransport::new();
        let (mut session, _recorder) = session(&mock);
        session.start().unwrap();

        session.toggle_shutter().unwrap();
        session.toggle_shutter().unwrap();
        wait_until(|| mock.requests(SHUTTER_CONTROL).len() >= 2);
        wait_until(|| mock.requests(START_GET_IMAGE_TRANSFER).len() >= 2);
        session.stop();

        let sent = mock.requests(SHUTTER_CONTROL);
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].data, SHUTTER_MANUAL);
        assert_eq!(sent[1].data, SHUTTER_AUTO);
        assert_eq!(session.config().snapshot().shutter_mode, ShutterMode::Auto);
        assert!(session.toggle_shutter().is_err());
    }

    #[test]
    fn test_disconnect_then_stop_is_single_report() {
        let mock = MockTransport::new();
        mock.queue_fault(MockFault::Timeout);
        mock.disconnect_when_drained();

        let (mut session, recorder) = session(&mock);
        session.start().unwrap();
        session.join();
        session.stop();
        session.stop();

        assert_eq!(recorder.disconnects.load(Ordering::SeqCst), 1);
        assert!(recorder
            .events
            .lock()
            .unwrap()
            .iter()
            .any(|e| matches!(e, CameraEvent::TransientError { .. })));
    }

    #[test]
    fn test_stop_fires_no_disconnect() {
        let mock = MockTransport::new();
        let (mut session, recorder) = session(&mock);
        session.start().unwrap();
        wait_until(|| !mock.requests(START_GET_IMAGE_TRANSFER).is_empty());
        session.stop();

        assert_eq!(session.state(), DriverState::Disconnected);
        assert_eq!(recorder.disconnects.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_sequence_never_decreases() {
        let mock = MockTransport::new();
        for count in [65534u16, 65535, 0, 1, 7, 3, 4] {
            mock.queue_frame(frame_bytes(MODEL, count, FRAME_TYPE_IMAGE, 200));
        }
        mock.disconnect_when_drained();

        let (mut session, recorder) = session(&mock);
        session.start().unwrap();
        session.join();

        let sequences: Vec<u64> = recorder.frames.lock().unwrap().iter().map(|f| f.sequence).collect();
        assert_eq!(sequences.len(), 7);
        assert!(sequences.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(&sequences[..4], &[65534, 65535, 65536, 65537]);
    }

    #[test]
    fn test_reset_exposure_after_frame() {
        let mock = MockTransport::new();
        mock.queue_frame(frame_bytes(MODEL, 1, FRAME_TYPE_IMAGE, 250));
        mock.disconnect_when_drained();

        let (mut session, _recorder) = session(&mock);
        assert!(session.reset_exposure_thresholds().is_none());
        session.start().unwrap();
        session.join();

        let range = session.reset_exposure_thresholds().unwrap();
        assert_eq!((range.min(), range.max()), (250.0, 251.0));
        let cfg = session.config().snapshot();
        assert_eq!((cfg.exposure_min, cfg.exposure_max), (250.0, 251.0));
    }

    #[test]
    fn test_unsupported_product() {
        let mock = MockTransport::with_ids(SEEK_VENDOR_ID, 0x1234);
        let result = DeviceSession::new(mock, DeviceConfig::default());
        assert!(matches!(
            result,
            Err(SessionError::UnsupportedDevice { pid: 0x1234, .. })
        ));
    }

    #[test]
    fn test_counter_reset_rearms_calibration() {
        let mock = MockTransport::new();
        queue_calibration(&mock, 40000);
        mock.queue_frame(frame_bytes(MODEL, 40004, FRAME_TYPE_IMAGE, 500));
        mock.queue_frame(frame_bytes(MODEL, 2, FRAME_TYPE_FSC_CALIBRATION, 100));
        mock.queue_frame(frame_bytes(MODEL, 3, FRAME_TYPE_IMAGE, 500));
        mock.disconnect_when_drained();

        let (mut session, recorder) = session(&mock);
        session.start().unwrap();
        session.join();

        assert!(recorder.has_event(&CameraEvent::CalibrationRearmed { frame_count: 2 }));
        let frames = recorder.frames.lock().unwrap().clone();
        assert_eq!(frames.len(), 2);
        assert!(frames[0].corrected);
        assert!(!frames[1].corrected);
        assert!(frames[1].sequence > frames[0].sequence);
    }

    #[test]
    fn test_fresh_fsc_keeps_images_corrected() {
        let mock = MockTransport::new();
        queue_calibration(&mock, 1);
        mock.queue_frame(frame_bytes(MODEL, 5, FRAME_TYPE_IMAGE, 500));
        mock.queue_frame(frame_bytes(MODEL, 6, FRAME_TYPE_FSC_CALIBRATION, 200));
        mock.queue_frame(frame_bytes(MODEL, 7, FRAME_TYPE_IMAGE, 500));
        mock.disconnect_when_drained();

        let (mut session, recorder) = session(&mock);
        session.start().unwrap();
        session.join();

        let frames = recorder.frames.lock().unwrap().clone();
        assert_eq!(frames.len(), 2);
        assert!(frames.iter().all(|f| f.corrected));
        assert_eq!(frames[0].exposure.min(), 400.0);
        assert_eq!(frames[1].exposure.min(), 300.0);
        assert!(
            !recorder
                .events
                .lock()
                .unwrap()
                .iter()
                .any(|e| matches!(e, CameraEvent::CalibrationRearmed { .. }))
        );
    }

    #[test]
    fn test_trigger_shutter_keeps_mode() {
        let mock = MockTransport::new();
        let (mut session, recorder) = session(&mock);
        session.start().unwrap();

        session.trigger_shutter().unwrap();
        wait_until(|| recorder.has_event(&CameraEvent::ShutterTriggered));
        session.stop();

        let sent = mock.requests(SHUTTER_CONTROL);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].data, SHUTTER_TRIGGER);
        assert_eq!(session.config().snapshot().shutter_mode, ShutterMode::Auto);
    }

    #[test]
    fn test_config_shutter_mode_sent_once() {
        let mock = MockTransport::new();
        let (mut session, recorder) = session(&mock);
        session.start().unwrap();

        session.config().update(|c| c.shutter_mode = ShutterMode::Manual);
        wait_until(|| {
            recorder.has_event(&CameraEvent::ShutterModeChanged {
                mode: ShutterMode::Manual,
            })
        });
        let seen = mock.requests(START_GET_IMAGE_TRANSFER).len();
        wait_until(|| mock.requests(START_GET_IMAGE_TRANSFER).len() >= seen + 3);
        session.stop();

        let sent = mock.requests(SHUTTER_CONTROL);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].data, SHUTTER_MANUAL);
    }

    #[test]
    fn test_exposure_observed_before_blur() {
        let mock = MockTransport::new();
        let mut bytes = frame_bytes(MODEL, 1, FRAME_TYPE_IMAGE, 100);
        let hot = 10 * S104SP_FRAME_WIDTH + 10;
        bytes[hot * 2..hot * 2 + 2].copy_from_slice(&1000u16.to_le_bytes());
        mock.queue_frame(bytes);
        mock.disconnect_when_drained();

        let config = DeviceConfig {
            blur_factor: 2.0,
            ..Default::default()
        };
        let (mut session, recorder) = session_with(&mock, config);
        session.start().unwrap();
        session.join();

        let frames = recorder.frames.lock().unwrap().clone();
        assert_eq!(frames.len(), 1);
        assert!(!frames[0].corrected);
        let range = session.reset_exposure_thresholds().unwrap();
        assert_eq!((range.min(), range.max()), (100.0, 1000.0));
        assert_eq!(frames[0].exposure, range);
    }
}
