//! End-to-end behaviour of the detect -> track -> decide -> save pipeline,
//! driven by scripted detections and simulated capture clocks (1 frame/s).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use anyhow::{anyhow, Result};
use image::RgbImage;

use frame_sentinel::annotate::Annotator;
use frame_sentinel::{
    BoundingBox, Decision, DecisionPolicy, Detection, DispatchConfig, Frame, FrameDispatcher,
    FrameProcessor, FrameResult, MemorySink, PersistReason, ScriptedBackend, SkipReason,
    SnapshotConfig, SnapshotSink, SnapshotWriter, TargetClasses, TrackEvent, TrackingConfig,
};

fn car() -> Detection {
    Detection::new("car", 0.9, BoundingBox::new(100.0, 100.0, 80.0, 40.0))
}

fn car_at(x: f32) -> Detection {
    Detection::new("car", 0.9, BoundingBox::new(x, 100.0, 80.0, 40.0))
}

fn person_at(x: f32) -> Detection {
    Detection::new("person", 0.8, BoundingBox::new(x, 300.0, 30.0, 90.0))
}

struct Replay {
    dispatcher: FrameDispatcher,
    sink: Arc<MemorySink>,
    t0: Instant,
    wall0: SystemTime,
}

impl Replay {
    fn new(script: Vec<Vec<Detection>>) -> Self {
        Self::with_threads(script, 1)
    }

    fn with_threads(script: Vec<Vec<Detection>>, num_threads: usize) -> Self {
        let sink = Arc::new(MemorySink::new());
        let writer = SnapshotWriter::with_sink(
            DecisionPolicy::default(),
            Annotator::new(),
            Box::new(Arc::clone(&sink)),
        );
        let processor = FrameProcessor::new(
            Arc::new(ScriptedBackend::new(script)),
            TargetClasses::default(),
            TrackingConfig::default(),
            writer,
        );
        let dispatcher = FrameDispatcher::new(
            DispatchConfig {
                num_threads,
                max_queue_size: 4,
            },
            processor,
        )
        .expect("dispatcher");
        Self {
            dispatcher,
            sink,
            t0: Instant::now(),
            wall0: SystemTime::now(),
        }
    }

    /// Submit frames `0..count` (frame i captured at t0 + i s) and collect
    /// results in submission order.
    fn run(&self, count: u64) -> Vec<FrameResult> {
        let handles: Vec<_> = (0..count)
            .map(|seq| {
                let offset = Duration::from_secs(seq);
                let frame = Frame::with_capture_time(
                    RgbImage::new(640, 480),
                    seq,
                    self.wall0 + offset,
                    self.t0 + offset,
                );
                self.dispatcher.submit(&frame).expect("submit")
            })
            .collect();
        handles.into_iter().map(|handle| handle.wait()).collect()
    }
}

fn saved_frames(results: &[FrameResult]) -> Vec<u64> {
    results
        .iter()
        .filter(|result| result.saved())
        .map(|result| result.sequence)
        .collect()
}

fn has_event(result: &FrameResult, pred: impl Fn(&TrackEvent) -> bool) -> bool {
    result.events.iter().any(pred)
}

#[test]
fn single_car_saves_on_arrival_then_on_interval() {
    // t=0 new type, t=3 rate limited, t=10 interval elapsed.
    let replay = Replay::new(vec![vec![car()]; 11]);
    let results = replay.run(11);

    assert!(matches!(
        results[0].decision,
        Some(Decision::Persist(PersistReason::NewObjectType { .. }))
    ));
    assert!(matches!(
        results[3].decision,
        Some(Decision::Skip(SkipReason::RateLimited { .. }))
    ));
    assert!(matches!(
        results[10].decision,
        Some(Decision::Persist(PersistReason::Interval))
    ));
    assert_eq!(saved_frames(&results), vec![0, 10]);

    let memory = replay.dispatcher.processor().snapshot_memory().unwrap();
    assert_eq!(memory.last_saved_object_counts.get("car"), Some(&1));
    assert_eq!(memory.last_photo_time, Some(replay.t0 + Duration::from_secs(10)));
}

#[test]
fn stationary_car_stops_saving_after_timeout() {
    let replay = Replay::new(vec![vec![car()]; 141]);
    let results = replay.run(141);

    let saved = saved_frames(&results);
    assert!(saved.contains(&0));
    assert!(saved.contains(&120));
    assert!(saved.iter().all(|&seq| seq <= 122), "saved {:?}", saved);
    assert!(matches!(
        results[130].decision,
        Some(Decision::Skip(SkipReason::StationaryTimeout))
    ));
}

#[test]
fn movement_resumes_saves_after_stationary_timeout() {
    let mut script = vec![vec![car_at(100.0)]; 150];
    script.push(vec![car_at(150.0)]);
    let replay = Replay::new(script);
    let results = replay.run(151);

    assert!(matches!(
        results[149].decision,
        Some(Decision::Skip(SkipReason::StationaryTimeout))
    ));
    assert!(results[150].saved());
    assert!(has_event(&results[150], |e| matches!(e, TrackEvent::Moved { .. })));
}

#[test]
fn five_frame_gap_keeps_identity() {
    let mut script = vec![vec![car()]; 5];
    script.extend(vec![Vec::new(); 5]);
    script.push(vec![car()]);
    let replay = Replay::new(script);
    let results = replay.run(11);

    for result in &results[1..] {
        assert!(!has_event(result, |e| matches!(
            e,
            TrackEvent::Entered { .. } | TrackEvent::Exited { .. }
        )));
    }
    let tracked = replay.dispatcher.processor().tracked_objects().unwrap();
    assert_eq!(tracked.len(), 1);
    assert_eq!(tracked[0].id, 1);
    assert!(tracked[0].is_present());
}

#[test]
fn six_frame_gap_exits_and_reenters() {
    let mut script = vec![vec![car()]; 5];
    script.extend(vec![Vec::new(); 6]);
    script.push(vec![car()]);
    let replay = Replay::new(script);
    let results = replay.run(12);

    let exits: Vec<u64> = results
        .iter()
        .filter(|r| has_event(r, |e| matches!(e, TrackEvent::Exited { .. })))
        .map(|r| r.sequence)
        .collect();
    assert_eq!(exits, vec![10]);
    assert!(has_event(&results[11], |e| matches!(e, TrackEvent::Entered { id: 1, .. })));
    assert!(matches!(
        results[11].decision,
        Some(Decision::Persist(PersistReason::NewlyEntered { id: 1, .. }))
    ));
}

#[test]
fn long_absence_removes_track() {
    let mut script = vec![vec![car()]];
    script.extend(vec![Vec::new(); 31]);
    let replay = Replay::new(script);
    let results = replay.run(32);

    assert!(!has_event(&results[30], |e| matches!(e, TrackEvent::Removed { .. })));
    assert!(has_event(&results[31], |e| matches!(e, TrackEvent::Removed { id: 1, .. })));
    assert!(replay
        .dispatcher
        .processor()
        .tracked_objects()
        .unwrap()
        .is_empty());
}

#[test]
fn second_person_saves_immediately() {
    let replay = Replay::new(vec![
        vec![person_at(50.0)],
        vec![person_at(50.0), person_at(400.0)],
    ]);
    let results = replay.run(2);

    assert_eq!(saved_frames(&results), vec![0, 1]);
    assert!(matches!(
        &results[1].decision,
        Some(Decision::Persist(PersistReason::NewInstance { previous: 1, current: 2, .. }))
    ));
    let memory = replay.dispatcher.processor().snapshot_memory().unwrap();
    assert_eq!(memory.last_saved_object_counts.get("person"), Some(&2));
}

#[test]
fn new_type_beside_stationary_car_saves_on_first_sighting() {
    let mut script = vec![vec![car()]; 200];
    script.push(vec![car(), person_at(400.0)]);
    let replay = Replay::new(script);
    let results = replay.run(201);

    assert!(!results[199].saved());
    assert!(results[200].saved());
    assert!(matches!(
        &results[200].decision,
        Some(Decision::Persist(PersistReason::NewObjectType { class_name })) if class_name == "person"
    ));
}

#[test]
fn unchanged_scene_never_saves_inside_interval() {
    let replay = Replay::new(vec![vec![car_at(100.0), person_at(400.0)]; 35]);
    let results = replay.run(35);

    let saved = saved_frames(&results);
    for pair in saved.windows(2) {
        assert!(pair[1] - pair[0] >= 10, "saves too close: {:?}", saved);
    }
    assert_eq!(saved, vec![0, 10, 20, 30]);
}

#[test]
fn parallel_mode_matches_sequential_decisions() {
    let mut script = vec![vec![car()]; 5];
    script.extend(vec![Vec::new(); 6]);
    script.extend(vec![vec![car(), person_at(400.0)]; 15]);

    let sequential = Replay::new(script.clone()).run(26);
    let parallel = Replay::with_threads(script, 4).run(26);

    assert_eq!(saved_frames(&sequential), saved_frames(&parallel));
    for (a, b) in sequential.iter().zip(&parallel) {
        assert_eq!(a.sequence, b.sequence);
        assert_eq!(a.decision, b.decision);
        assert_eq!(a.events.len(), b.events.len());
    }
}

#[test]
fn snapshot_names_carry_classes() {
    let replay = Replay::new(vec![vec![car(), person_at(400.0)]]);
    replay.run(1);

    let saved = replay.sink.saved();
    assert_eq!(saved.len(), 1);
    assert!(saved[0].ends_with(" car person detected.jpg"), "{}", saved[0]);
}

struct FailingSink;

impl SnapshotSink for FailingSink {
    fn persist(&self, _file_name: &str, _image: &RgbImage) -> Result<PathBuf> {
        Err(anyhow!("read-only filesystem"))
    }
}

#[test]
fn failed_save_does_not_stop_pipeline() {
    let writer = SnapshotWriter::with_sink(
        DecisionPolicy::default(),
        Annotator::new(),
        Box::new(FailingSink),
    );
    let processor = FrameProcessor::new(
        Arc::new(ScriptedBackend::new(vec![vec![car()]; 3])),
        TargetClasses::default(),
        TrackingConfig::default(),
        writer,
    );
    let dispatcher = FrameDispatcher::new(DispatchConfig::default(), processor).unwrap();

    let t0 = Instant::now();
    let results: Vec<_> = (0..3)
        .map(|seq| {
            let frame = Frame::with_capture_time(
                RgbImage::new(64, 64),
                seq,
                SystemTime::now(),
                t0 + Duration::from_secs(seq),
            );
            dispatcher.submit(&frame).unwrap().wait()
        })
        .collect();

    assert!(results.iter().all(|result| result.processed));
    assert!(results.iter().all(|result| !result.saved()));
    let stats = dispatcher.stats().snapshot();
    // Memory never records the failed saves, so every frame keeps retrying.
    assert_eq!(stats.snapshot_failures, 3);
    assert_eq!(stats.processed, 3);
    assert_eq!(
        dispatcher.processor().snapshot_memory().unwrap().last_photo_time,
        None
    );
}

#[test]
fn filesystem_snapshots_are_annotated_jpegs() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config = SnapshotConfig {
        output_dir: dir.path().join("snapshots"),
        ..SnapshotConfig::default()
    };
    let writer = SnapshotWriter::new(&config, DecisionPolicy::default())?;
    let processor = FrameProcessor::new(
        Arc::new(ScriptedBackend::new(vec![vec![car()]])),
        TargetClasses::default(),
        TrackingConfig::default(),
        writer,
    );

    let frame = Frame::blank(320, 240, 0);
    let result = processor.process(0, frame.clone());
    let path = result.snapshot.expect("snapshot path");

    assert!(path.starts_with(dir.path()));
    assert!(path
        .file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.ends_with(" car detected.jpg")));
    let written = image::open(&path)?.to_rgb8();
    assert_eq!(written.dimensions(), (320, 240));
    // The box outline is drawn on the copy only.
    assert_ne!(written.get_pixel(100, 120), frame.pixels().get_pixel(100, 120));
    assert_eq!(frame.pixels().get_pixel(100, 120), &image::Rgb([0, 0, 0]));
    Ok(())
}
