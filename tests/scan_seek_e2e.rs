use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ptz_seek::{
    BoundingBox, CameraFault, CameraPort, CaptureMetadata, CaptureSession, CaptureView,
    Clock, Detection, DetectionBackend, DetectionCapability, Frame, GeoLocation,
    InferenceError, ManualClock, PublishError, PublishSink, RoundScheduler, RunError, RunState,
    ScanConfig, ScanObserver, SimBackend, SimCamera, SimObject, SimWorld, SweepPosition,
};

#[derive(Clone, Debug, PartialEq)]
enum Cmd {
    Absolute(f64, f64, f64),
    Relative(f64, f64),
    Capture,
}

/// SimCamera that records every command and charges virtual time per move.
struct RecordingCamera {
    inner: SimCamera,
    clock: ManualClock,
    move_cost: Duration,
    log: Arc<Mutex<Vec<Cmd>>>,
}

impl RecordingCamera {
    fn new(world: SimWorld, clock: ManualClock) -> (Self, Arc<Mutex<Vec<Cmd>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let camera = Self {
            inner: SimCamera::new(world, Default::default()),
            clock,
            move_cost: Duration::ZERO,
            log: Arc::clone(&log),
        };
        (camera, log)
    }

    fn with_move_cost(mut self, cost: Duration) -> Self {
        self.move_cost = cost;
        self
    }

    fn record(&self, cmd: Cmd) {
        self.log.lock().unwrap().push(cmd);
    }
}

impl CameraPort for RecordingCamera {
    fn move_absolute(&mut self, pan: f64, tilt: f64, zoom: f64) -> Result<(), CameraFault> {
        self.record(Cmd::Absolute(pan, tilt, zoom));
        self.clock.advance(self.move_cost);
        self.inner.move_absolute(pan, tilt, zoom)
    }

    fn move_relative(&mut self, d_pan: f64, d_tilt: f64) -> Result<(), CameraFault> {
        self.record(Cmd::Relative(d_pan, d_tilt));
        self.clock.advance(self.move_cost);
        self.inner.move_relative(d_pan, d_tilt)
    }

    fn capture(&mut self) -> Result<Frame, CameraFault> {
        self.record(Cmd::Capture);
        self.inner.capture()
    }

    fn location(&self) -> Option<GeoLocation> {
        Some(GeoLocation {
            lat: 41.88,
            lon: -87.63,
            alt: None,
        })
    }
}

/// Backend answering from a closure over the frame's camera position.
struct ScriptedBackend<F>(F);

impl<F> DetectionBackend for ScriptedBackend<F>
where
    F: FnMut(&SweepPosition) -> Vec<Detection> + Send,
{
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn supports(&self, capability: DetectionCapability) -> bool {
        matches!(capability, DetectionCapability::ClosedVocabulary)
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, InferenceError> {
        Ok((self.0)(&frame.position()))
    }
}

/// Like `ScriptedBackend`, but the closure decides failures too.
struct FallibleBackend<F>(F);

impl<F> DetectionBackend for FallibleBackend<F>
where
    F: FnMut(&SweepPosition) -> Result<Vec<Detection>, InferenceError> + Send,
{
    fn name(&self) -> &'static str {
        "fallible"
    }

    fn supports(&self, capability: DetectionCapability) -> bool {
        matches!(capability, DetectionCapability::ClosedVocabulary)
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, InferenceError> {
        (self.0)(&frame.position())
    }
}

type Published = Arc<Mutex<Vec<(usize, CaptureMetadata)>>>;

#[derive(Default)]
struct MemorySink {
    published: Published,
}

impl PublishSink for MemorySink {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn submit(&mut self, image: &[u8], metadata: &CaptureMetadata) -> Result<(), PublishError> {
        self.published
            .lock()
            .unwrap()
            .push((image.len(), metadata.clone()));
        Ok(())
    }
}

/// Records round starts against the shared virtual clock.
struct RoundLog {
    clock: ManualClock,
    starts: Arc<Mutex<Vec<(Duration, f64)>>>,
    stop_at: Option<(usize, Arc<AtomicBool>)>,
}

impl ScanObserver for RoundLog {
    fn on_round_start(&mut self, _round: u32, _positions: usize, tilt: f64) {
        self.starts.lock().unwrap().push((self.clock.now(), tilt));
    }

    fn on_position(&mut self, _round: u32, index: usize, _position: &SweepPosition) {
        if let Some((at, stop)) = &self.stop_at {
            if index == *at {
                stop.store(true, Ordering::SeqCst);
            }
        }
    }
}

fn config(objects: &str, world: &SimWorld) -> ScanConfig {
    let mut cfg = ScanConfig {
        iterations: 1,
        model: "sim".to_string(),
        objects: objects.to_string(),
        confidence: 0.1,
        pan_step: 15.0,
        iter_delay: Duration::ZERO,
        ..ScanConfig::default()
    };
    cfg.camera.move_settle = Duration::ZERO;
    cfg.camera.sim_objects = world.objects.clone();
    cfg.validate().expect("valid config");
    cfg
}

fn session(cfg: &ScanConfig) -> (CaptureSession, Published) {
    let sink = MemorySink::default();
    let published = Arc::clone(&sink.published);
    (
        CaptureSession::new(Box::new(sink), &cfg.capture, cfg.camera.optics),
        published,
    )
}

fn centered_person_at_45(position: &SweepPosition) -> Vec<Detection> {
    if (position.pan - 45.0).abs() < 1e-6 {
        vec![Detection::new(
            "person",
            0.3,
            BoundingBox::centered_at(0.5, 0.5, 0.05, 0.1),
        )]
    } else {
        Vec::new()
    }
}

#[test]
fn centered_person_is_captured_once_without_relative_moves() {
    let world = SimWorld::default();
    let cfg = config("person", &world);
    let clock = ManualClock::new();
    let (camera, log) = RecordingCamera::new(world, clock.clone());
    let (session, published) = session(&cfg);

    let mut state = RunState::new(cfg.tilt);
    let mut scheduler = RoundScheduler::new(
        cfg,
        Box::new(camera),
        Box::new(ScriptedBackend(centered_person_at_45)),
        session,
        Arc::new(clock),
    );
    let stats = scheduler.run(&mut state).expect("run");

    assert_eq!(state.captures.len(), 1);
    let captured = &state.captures[0];
    assert_eq!(captured.label, "person");
    assert_eq!(captured.confidence, 0.3);
    assert!((captured.position.pan - 45.0).abs() < 1e-9);
    assert!((captured.angular.pan - 45.0).abs() < 1e-6);
    assert_eq!(captured.location.map(|l| l.lat), Some(41.88));
    assert_eq!(stats.positions, 24);
    assert_eq!(stats.seeks_converged, 1);

    let log = log.lock().unwrap();
    assert!(!log.iter().any(|cmd| matches!(cmd, Cmd::Relative(..))));

    let published = published.lock().unwrap();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].1.view, CaptureView::After);
    assert_eq!(published[0].1.event_id, captured.event_id);
    assert_eq!(published[0].1.event_id.len(), 32);
}

#[test]
fn simulated_person_is_captured_once_per_round_across_overlapping_views() {
    let world = SimWorld::new(vec![SimObject::new("person", 45.0, 0.0, 2.0, 5.0, 0.3)]);
    let cfg = config("person", &world);
    let clock = ManualClock::new();
    let (camera, _log) = RecordingCamera::new(world.clone(), clock.clone());
    let backend = SimBackend::new(world, cfg.camera.optics);
    let (session, _published) = session(&cfg);

    let mut state = RunState::new(cfg.tilt);
    let mut scheduler =
        RoundScheduler::new(cfg, Box::new(camera), Box::new(backend), session, Arc::new(clock));
    let stats = scheduler.run(&mut state).expect("run");

    // first seen from pan 15, centered to 45; later views are duplicates
    assert_eq!(state.captures.len(), 1);
    assert!((state.captures[0].position.pan - 45.0).abs() < 1e-3);
    assert_eq!(state.captures[0].confidence, 0.3);
    assert!(stats.duplicates_skipped >= 1);
}

#[test]
fn objects_further_apart_than_dedup_tolerance_are_both_captured() {
    let world = SimWorld::new(vec![
        SimObject::new("person", 100.0, 0.0, 2.0, 5.0, 0.5),
        SimObject::new("person", 140.0, 0.0, 2.0, 5.0, 0.5),
    ]);
    let cfg = config("person", &world);
    let clock = ManualClock::new();
    let (camera, _log) = RecordingCamera::new(world.clone(), clock.clone());
    let backend = SimBackend::new(world, cfg.camera.optics);
    let (session, _published) = session(&cfg);

    let mut state = RunState::new(cfg.tilt);
    let mut scheduler =
        RoundScheduler::new(cfg, Box::new(camera), Box::new(backend), session, Arc::new(clock));
    scheduler.run(&mut state).expect("run");

    let mut pans: Vec<f64> = state.captures.iter().map(|c| c.angular.pan).collect();
    pans.sort_by(f64::total_cmp);
    assert_eq!(pans.len(), 2);
    assert!((pans[0] - 100.0).abs() < 0.5);
    assert!((pans[1] - 140.0).abs() < 0.5);
}

#[test]
fn abandoned_seek_resumes_at_next_planned_position() {
    let world = SimWorld::default();
    let cfg = config("*", &world);
    let clock = ManualClock::new();
    let (camera, log) = RecordingCamera::new(world, clock.clone());
    // off-center ghost that is only reported from the exact sweep stop
    let backend = ScriptedBackend(|position: &SweepPosition| {
        if (position.pan - 90.0).abs() < 1e-9 && position.zoom == 1.0 {
            vec![Detection::new(
                "deer",
                0.9,
                BoundingBox::centered_at(0.8, 0.5, 0.05, 0.05),
            )]
        } else {
            Vec::new()
        }
    });
    let (session, published) = session(&cfg);

    let mut state = RunState::new(cfg.tilt);
    let mut scheduler =
        RoundScheduler::new(cfg, Box::new(camera), Box::new(backend), session, Arc::new(clock));
    let stats = scheduler.run(&mut state).expect("run");

    assert_eq!(stats.seeks_abandoned, 1);
    assert_eq!(stats.captures, 0);
    assert_eq!(stats.positions, 24);
    assert!(published.lock().unwrap().is_empty());

    let log = log.lock().unwrap();
    let relative_at = log
        .iter()
        .position(|cmd| matches!(cmd, Cmd::Relative(..)))
        .expect("centering move");
    let next_absolute = log[relative_at..]
        .iter()
        .find_map(|cmd| match cmd {
            Cmd::Absolute(pan, _, _) => Some(*pan),
            _ => None,
        })
        .expect("scan resumed");
    assert_eq!(next_absolute, 105.0);
}

#[test]
fn round_spacing_sleeps_out_the_remaining_delay() {
    let world = SimWorld::default();
    let mut cfg = config("person", &world);
    cfg.iterations = 2;
    cfg.pan_step = 90.0;
    cfg.iter_delay = Duration::from_secs(60);
    let clock = ManualClock::new();
    // 4 positions x 5s = 20s of work per round
    let (camera, _log) = RecordingCamera::new(world, clock.clone());
    let camera = camera.with_move_cost(Duration::from_secs(5));
    let backend = ScriptedBackend(|_: &SweepPosition| Vec::new());
    let (session, _published) = session(&cfg);
    let starts = Arc::new(Mutex::new(Vec::new()));
    let observer = RoundLog {
        clock: clock.clone(),
        starts: Arc::clone(&starts),
        stop_at: None,
    };

    let mut state = RunState::new(cfg.tilt);
    let mut scheduler = RoundScheduler::new(
        cfg,
        Box::new(camera),
        Box::new(backend),
        session,
        Arc::new(clock.clone()),
    )
    .with_observer(Box::new(observer));
    let stats = scheduler.run(&mut state).expect("run");

    assert_eq!(stats.rounds, 2);
    assert_eq!(clock.total_slept(), Duration::from_secs(40));
    let starts = starts.lock().unwrap();
    assert_eq!(starts.len(), 2);
    assert_eq!(starts[0].0, Duration::ZERO);
    assert_eq!(starts[1].0, Duration::from_secs(60));
    // nothing found: the second round looks lower
    assert_eq!(starts[0].1, 0.0);
    assert_eq!(starts[1].1, -5.0);
}

#[test]
fn slow_round_starts_next_round_immediately() {
    let world = SimWorld::default();
    let mut cfg = config("person", &world);
    cfg.iterations = 2;
    cfg.pan_step = 90.0;
    cfg.iter_delay = Duration::from_secs(60);
    let clock = ManualClock::new();
    let (camera, _log) = RecordingCamera::new(world, clock.clone());
    let camera = camera.with_move_cost(Duration::from_secs(20));
    let (session, _published) = session(&cfg);

    let mut state = RunState::new(cfg.tilt);
    let mut scheduler = RoundScheduler::new(
        cfg,
        Box::new(camera),
        Box::new(ScriptedBackend(|_: &SweepPosition| Vec::new())),
        session,
        Arc::new(clock.clone()),
    );
    scheduler.run(&mut state).expect("run");

    assert_eq!(clock.total_slept(), Duration::ZERO);
}

#[test]
fn consecutive_camera_faults_end_the_run() {
    let world = SimWorld::default();
    let cfg = config("person", &world);
    let clock = ManualClock::new();
    let mut camera = SimCamera::new(world, cfg.camera.optics);
    camera.inject_capture_faults(u32::MAX);
    let (session, _published) = session(&cfg);

    let mut state = RunState::new(cfg.tilt);
    let mut scheduler = RoundScheduler::new(
        cfg,
        Box::new(camera),
        Box::new(ScriptedBackend(|_: &SweepPosition| Vec::new())),
        session,
        Arc::new(clock),
    );
    let err = scheduler.run(&mut state).expect_err("faults are fatal");
    match err {
        RunError::CameraFaults { count, last } => {
            assert_eq!(count, 3);
            assert!(matches!(last, CameraFault::Capture(_)));
        }
    }
    assert_eq!(state.stats.positions, 3);
}

#[test]
fn isolated_camera_faults_are_tolerated() {
    let world = SimWorld::default();
    let cfg = config("person", &world);
    let clock = ManualClock::new();
    let mut camera = SimCamera::new(world, cfg.camera.optics);
    camera.inject_capture_faults(2);
    let (session, _published) = session(&cfg);

    let mut state = RunState::new(cfg.tilt);
    let mut scheduler = RoundScheduler::new(
        cfg,
        Box::new(camera),
        Box::new(ScriptedBackend(|_: &SweepPosition| Vec::new())),
        session,
        Arc::new(clock),
    );
    let stats = scheduler.run(&mut state).expect("run");
    assert_eq!(stats.camera_faults, 2);
    assert_eq!(stats.positions, 24);
    assert_eq!(state.consecutive_faults, 0);
}

#[test]
fn keep_images_writes_image_and_metadata() {
    let dir = tempfile::tempdir().expect("temp dir");
    let world = SimWorld::default();
    let mut cfg = config("person", &world);
    cfg.capture.keep_images = true;
    cfg.capture.keep_dir = dir.path().join("kept");
    let clock = ManualClock::new();
    let (camera, _log) = RecordingCamera::new(world, clock.clone());
    let (session, _published) = session(&cfg);

    let mut state = RunState::new(cfg.tilt);
    let mut scheduler = RoundScheduler::new(
        cfg,
        Box::new(camera),
        Box::new(ScriptedBackend(centered_person_at_45)),
        session,
        Arc::new(clock),
    );
    scheduler.run(&mut state).expect("run");

    let mut names: Vec<String> = std::fs::read_dir(dir.path().join("kept"))
        .expect("keep dir")
        .map(|entry| entry.expect("entry").file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(names.len(), 2);
    assert!(names[0].ends_with("_person_conf0.30.json"));
    assert!(names[1].ends_with("_person_conf0.30.rgb"));

    let meta: serde_json::Value = serde_json::from_slice(
        &std::fs::read(dir.path().join("kept").join(&names[0])).expect("read metadata"),
    )
    .expect("metadata json");
    assert_eq!(meta["event_id"], state.captures[0].event_id.as_str());
    assert_eq!(meta["view"], "after");
    assert_eq!(meta["object_type"], "person");
}

#[test]
fn before_view_shares_event_id_with_capture() {
    let world = SimWorld::default();
    let mut cfg = config("person", &world);
    cfg.capture.publish_before = true;
    let clock = ManualClock::new();
    let (camera, _log) = RecordingCamera::new(world, clock.clone());
    let (session, published) = session(&cfg);

    let mut state = RunState::new(cfg.tilt);
    let mut scheduler = RoundScheduler::new(
        cfg,
        Box::new(camera),
        Box::new(ScriptedBackend(centered_person_at_45)),
        session,
        Arc::new(clock),
    );
    scheduler.run(&mut state).expect("run");

    let published = published.lock().unwrap();
    assert_eq!(published.len(), 2);
    assert_eq!(published[0].1.view, CaptureView::Before);
    assert_eq!(published[1].1.view, CaptureView::After);
    assert_eq!(published[0].1.event_id, published[1].1.event_id);
    assert_eq!(published[0].1.zoom, 1.0);
    assert!(published[1].1.zoom > 1.0);
}

#[test]
fn stop_flag_is_honored_at_the_next_position() {
    let world = SimWorld::default();
    let mut cfg = config("person", &world);
    cfg.iterations = 3;
    let clock = ManualClock::new();
    let (camera, _log) = RecordingCamera::new(world, clock.clone());
    let (session, _published) = session(&cfg);
    let stop = Arc::new(AtomicBool::new(false));
    let observer = RoundLog {
        clock: clock.clone(),
        starts: Arc::new(Mutex::new(Vec::new())),
        stop_at: Some((2, Arc::clone(&stop))),
    };

    let mut state = RunState::new(cfg.tilt);
    let mut scheduler = RoundScheduler::new(
        cfg,
        Box::new(camera),
        Box::new(ScriptedBackend(|_: &SweepPosition| Vec::new())),
        session,
        Arc::new(clock),
    )
    .with_stop_flag(Arc::clone(&stop))
    .with_observer(Box::new(observer));
    let stats = scheduler.run(&mut state).expect("run");

    assert_eq!(stats.positions, 3);
    assert_eq!(stats.rounds, 0);
}

#[test]
fn inference_error_at_one_position_is_counted_and_the_scan_continues() {
    let world = SimWorld::default();
    let cfg = config("person", &world);
    let clock = ManualClock::new();
    let (camera, _log) = RecordingCamera::new(world, clock.clone());
    let backend = FallibleBackend(|position: &SweepPosition| {
        if position.pan == 150.0 {
            Err(InferenceError::Backend("out of memory".to_string()))
        } else {
            Ok(Vec::new())
        }
    });
    let (session, _published) = session(&cfg);

    let mut state = RunState::new(cfg.tilt);
    let mut scheduler =
        RoundScheduler::new(cfg, Box::new(camera), Box::new(backend), session, Arc::new(clock));
    let stats = scheduler.run(&mut state).expect("inference errors are not fatal");

    assert_eq!(stats.inference_errors, 1);
    assert_eq!(stats.positions, 24);
    assert_eq!(stats.rounds, 1);
    assert_eq!(stats.camera_faults, 0);
}

#[test]
fn failing_re_detects_during_seek_abandon_as_target_lost() {
    let world = SimWorld::default();
    let cfg = config("*", &world);
    let misses = cfg.seek.max_consecutive_misses as usize;
    let clock = ManualClock::new();
    let (camera, log) = RecordingCamera::new(world, clock.clone());
    // off-center hit at the pan 90 stop; every frame off the sweep grid fails
    let backend = FallibleBackend(|position: &SweepPosition| {
        if (position.pan % 15.0).abs() > 1e-6 {
            Err(InferenceError::Backend("timeout".to_string()))
        } else if position.pan == 90.0 {
            Ok(vec![Detection::new(
                "deer",
                0.9,
                BoundingBox::centered_at(0.8, 0.5, 0.05, 0.05),
            )])
        } else {
            Ok(Vec::new())
        }
    });
    let (session, published) = session(&cfg);

    let mut state = RunState::new(cfg.tilt);
    let mut scheduler =
        RoundScheduler::new(cfg, Box::new(camera), Box::new(backend), session, Arc::new(clock));
    let stats = scheduler.run(&mut state).expect("run");

    assert_eq!(stats.seeks_abandoned, 1);
    assert_eq!(stats.seeks_converged, 0);
    assert_eq!(stats.captures, 0);
    assert_eq!(stats.positions, 24);
    assert!(published.lock().unwrap().is_empty());

    // one capture per failed re-detect between the centering move and the
    // next sweep position
    let log = log.lock().unwrap();
    let relative_at = log
        .iter()
        .position(|cmd| matches!(cmd, Cmd::Relative(..)))
        .expect("centering move");
    let re_detects = log[relative_at..]
        .iter()
        .take_while(|cmd| !matches!(cmd, Cmd::Absolute(..)))
        .filter(|cmd| matches!(cmd, Cmd::Capture))
        .count();
    assert_eq!(re_detects, misses);
    assert_eq!(
        log.iter().filter(|cmd| matches!(cmd, Cmd::Relative(..))).count(),
        1
    );
}

#[test]
fn already_captured_object_does_not_hide_a_new_one_in_the_same_frame() {
    // With 60 degree steps the person at 30 is seen from pan 0 and pan 60;
    // the person at 70 is only ever seen from pan 60, next to the first.
    let world = SimWorld::new(vec![
        SimObject::new("person", 30.0, 0.0, 2.0, 5.0, 0.9),
        SimObject::new("person", 70.0, 0.0, 2.0, 5.0, 0.5),
    ]);
    let mut cfg = config("person", &world);
    cfg.pan_step = 60.0;
    let clock = ManualClock::new();
    let (camera, _log) = RecordingCamera::new(world.clone(), clock.clone());
    let backend = SimBackend::new(world, cfg.camera.optics);
    let (session, _published) = session(&cfg);

    let mut state = RunState::new(cfg.tilt);
    let mut scheduler =
        RoundScheduler::new(cfg, Box::new(camera), Box::new(backend), session, Arc::new(clock));
    let stats = scheduler.run(&mut state).expect("run");

    let pans: Vec<f64> = state.captures.iter().map(|c| c.angular.pan).collect();
    assert_eq!(pans.len(), 2, "captures at {:?}", pans);
    assert!((pans[0] - 30.0).abs() < 0.5);
    assert!((pans[1] - 70.0).abs() < 0.5);
    assert_eq!(stats.duplicates_skipped, 1);
}
