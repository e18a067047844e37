//! Integration tests for the practice player
//!
//! Drive a real `Player` task through its handle with tokio's paused clock,
//! so every timing assertion is exact and the tests run instantly.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{sleep, Instant};

use etude::capture::{CaptureDevice, CaptureFormat, NoCapture};
use etude::evaluator::{ProficiencyEvaluator, ProficiencyRequest, ProficiencyResponse};
use etude::synth::ToneSynth;
use etude::{
    DifficultyVariantSet, EngineConfig, EtudeError, MeasureLabel, PlaybackStyle, Player,
    PlayerEvent, PlayerHandle,
};

const LABELS: [&str; 8] = ["1", "2", "3", "4", "5", "6", "7", "8"];

/// 4/4 score, four quarter-note Cs per measure in the given octave.
fn ladder_xml(labels: &[&str], octave: i8) -> String {
    let mut xml = String::from("<score-partwise version=\"4.0\"><part id=\"P1\">");
    for (i, label) in labels.iter().enumerate() {
        xml.push_str(&format!("<measure number=\"{}\">", label));
        if i == 0 {
            xml.push_str("<attributes><divisions>1</divisions><time><beats>4</beats><beat-type>4</beat-type></time></attributes>");
        }
        for _ in 0..4 {
            xml.push_str(&format!(
                "<note><pitch><step>C</step><octave>{}</octave></pitch><duration>1</duration></note>",
                octave
            ));
        }
        xml.push_str("</measure>");
    }
    xml.push_str("</part></score-partwise>");
    xml
}

/// Tier N is written in octave N + 1
fn variants(labels: &[&str], tiers: u8) -> DifficultyVariantSet {
    let documents: Vec<String> = (1..=tiers)
        .map(|tier| ladder_xml(labels, tier as i8 + 1))
        .collect();
    DifficultyVariantSet::from_documents(&documents).unwrap()
}

fn c_in_octave(octave: i32) -> f64 {
    440.0 * 2f64.powf(((octave + 1) * 12 - 69) as f64 / 12.0)
}

type Played = Arc<Mutex<Vec<(Vec<f64>, f64, Instant)>>>;

#[derive(Default)]
struct RecordingSynth {
    played: Played,
}

impl ToneSynth for RecordingSynth {
    fn play_tone(&mut self, frequency: f64, duration_ms: f64) -> Result<(), EtudeError> {
        self.play_chord(&[frequency], duration_ms)
    }

    fn play_chord(&mut self, frequencies: &[f64], duration_ms: f64) -> Result<(), EtudeError> {
        self.played
            .lock()
            .unwrap()
            .push((frequencies.to_vec(), duration_ms, Instant::now()));
        Ok(())
    }
}

/// Microphone that grants access and never delivers audio.
struct SilentMicrophone;

impl CaptureDevice for SilentMicrophone {
    fn request_access(&mut self) -> Result<CaptureFormat, EtudeError> {
        Ok(CaptureFormat {
            sample_rate: Some(8_000),
        })
    }

    fn read_next_frame(&mut self) -> Option<Vec<f32>> {
        None
    }

    fn release(&mut self) {}
}

/// Microphone whose callback delivers ten samples every 10 ms and keeps at
/// most `MIC_QUEUE` buffers, dropping the rest like a real input queue.
struct TimedMicrophone {
    started: Option<Instant>,
    delivered: u64,
    dropped: Arc<Mutex<u64>>,
}

const MIC_QUEUE: u64 = 4;

impl CaptureDevice for TimedMicrophone {
    fn request_access(&mut self) -> Result<CaptureFormat, EtudeError> {
        self.started = Some(Instant::now());
        self.delivered = 0;
        Ok(CaptureFormat {
            sample_rate: Some(1000),
        })
    }

    fn read_next_frame(&mut self) -> Option<Vec<f32>> {
        let started = self.started?;
        let produced = (Instant::now() - started).as_millis() as u64 / 10;
        let waiting = produced - self.delivered;
        if waiting > MIC_QUEUE {
            *self.dropped.lock().unwrap() += waiting - MIC_QUEUE;
            self.delivered += waiting - MIC_QUEUE;
        }
        if produced > self.delivered {
            self.delivered += 1;
            Some(vec![0.5; 10])
        } else {
            None
        }
    }

    fn release(&mut self) {
        self.started = None;
    }
}

struct FixedEvaluator {
    proficiency: f64,
    requests: Arc<Mutex<Vec<ProficiencyRequest>>>,
}

impl ProficiencyEvaluator for FixedEvaluator {
    fn evaluate(&self, request: &ProficiencyRequest) -> Result<ProficiencyResponse, EtudeError> {
        self.requests.lock().unwrap().push(request.clone());
        Ok(ProficiencyResponse {
            proficiency: self.proficiency,
        })
    }
}

struct Setup {
    handle: PlayerHandle,
    events: UnboundedReceiver<PlayerEvent>,
    played: Played,
}

fn spawn_player(
    variants: DifficultyVariantSet,
    capture: Box<dyn CaptureDevice>,
    evaluator: Option<Arc<dyn ProficiencyEvaluator>>,
) -> Setup {
    let synth = RecordingSynth::default();
    let played = Arc::clone(&synth.played);
    let (player, handle, events) = Player::new(
        EngineConfig::default(),
        variants,
        Box::new(synth),
        capture,
        evaluator,
    )
    .unwrap();
    tokio::spawn(player.run());
    Setup {
        handle,
        events,
        played,
    }
}

/// Receive events up to and including the first one matching `stop`.
async fn collect_until(
    events: &mut UnboundedReceiver<PlayerEvent>,
    stop: impl Fn(&PlayerEvent) -> bool,
) -> Vec<PlayerEvent> {
    let mut collected = Vec::new();
    while let Some(event) = events.recv().await {
        let done = stop(&event);
        collected.push(event);
        if done {
            break;
        }
    }
    collected
}

fn is_stopped(event: &PlayerEvent) -> bool {
    matches!(event, PlayerEvent::PlaybackStopped)
}

fn sealed(events: &[PlayerEvent]) -> Vec<(String, usize, usize)> {
    events
        .iter()
        .filter_map(|e| match e {
            PlayerEvent::SegmentSealed {
                label,
                expected_notes,
                samples,
            } => Some((label.to_string(), *expected_notes, *samples)),
            _ => None,
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_five_measures_seal_five_segments() {
    let mut setup = spawn_player(variants(&LABELS[..5], 2), Box::new(SilentMicrophone), None);

    setup.handle.play().unwrap();
    let events = collect_until(&mut setup.events, is_stopped).await;

    assert!(matches!(events[0], PlayerEvent::PlaybackStarted { tier: 0, .. }));
    let segments = sealed(&events);
    assert_eq!(
        segments,
        vec![
            ("1".to_string(), 4, 0),
            ("2".to_string(), 4, 0),
            ("3".to_string(), 4, 0),
            ("4".to_string(), 4, 0),
            ("5".to_string(), 4, 0),
        ]
    );
    let scrolls = events
        .iter()
        .filter(|e| matches!(e, PlayerEvent::ScrollToMeasure { .. }))
        .count();
    assert_eq!(scrolls, 5);
    assert_eq!(setup.played.lock().unwrap().len(), 20);
}

#[tokio::test(start_paused = true)]
async fn test_pause_seals_partial_segment_once() {
    let mut setup = spawn_player(variants(&LABELS[..3], 1), Box::new(SilentMicrophone), None);

    setup.handle.play().unwrap();
    sleep(Duration::from_millis(2250)).await;
    setup.handle.pause().unwrap();
    let events = collect_until(&mut setup.events, is_stopped).await;

    let segments = sealed(&events);
    assert_eq!(segments.len(), 2);
    assert_eq!(segments[1], ("2".to_string(), 1, 0));

    // A second pause is a no-op
    setup.handle.pause().unwrap();
    setup.handle.shutdown().unwrap();
    let rest = collect_until(&mut setup.events, |_| false).await;
    assert!(sealed(&rest).is_empty());
    assert!(!rest.iter().any(is_stopped));
}

#[tokio::test(start_paused = true)]
async fn test_quarter_notes_at_120_bpm_are_500ms_apart() {
    let mut setup = spawn_player(variants(&LABELS[..2], 1), Box::new(NoCapture), None);

    setup.handle.set_recording_enabled(false).unwrap();
    setup.handle.play().unwrap();
    collect_until(&mut setup.events, is_stopped).await;

    let played = setup.played.lock().unwrap();
    assert_eq!(played.len(), 8);
    for pair in played.windows(2) {
        let gap = pair[1].2 - pair[0].2;
        assert!(gap >= Duration::from_millis(500), "step fired early: {:?}", gap);
        assert!(gap < Duration::from_millis(510), "step fired late: {:?}", gap);
    }
    assert!(played.iter().all(|(_, ms, _)| *ms == 500.0));
}

#[tokio::test(start_paused = true)]
async fn test_tempo_change_applies_to_next_step() {
    let mut setup = spawn_player(variants(&LABELS[..1], 1), Box::new(NoCapture), None);

    setup.handle.play().unwrap();
    sleep(Duration::from_millis(250)).await;
    // 120 - 60 = 60 BPM: one second per quarter
    setup.handle.set_tempo_offset(-60.0).unwrap();
    collect_until(&mut setup.events, is_stopped).await;

    let played = setup.played.lock().unwrap();
    assert_eq!(played[0].1, 500.0);
    assert_eq!(played[1].1, 1000.0);
    let gap = played[2].2 - played[1].2;
    assert!(gap >= Duration::from_millis(1000));
}

#[tokio::test(start_paused = true)]
async fn test_reported_proficiency_patches_ahead_of_cursor() {
    let mut setup = spawn_player(variants(&LABELS, 5), Box::new(NoCapture), None);

    setup.handle.set_recording_enabled(false).unwrap();
    setup.handle.play().unwrap();
    // Third beat of measure "4" (index 3)
    sleep(Duration::from_millis(6250)).await;
    setup.handle.report_proficiency(7.0).unwrap();

    let events = collect_until(&mut setup.events, |e| {
        matches!(e, PlayerEvent::ScoreChanged { .. })
    })
    .await;
    assert!(events
        .iter()
        .any(|e| matches!(e, PlayerEvent::ProficiencyUpdated(p) if *p == 7.0)));
    match events.last() {
        Some(PlayerEvent::ScoreChanged {
            tier,
            patched_from,
            difficulty_map,
            ..
        }) => {
            assert_eq!(*tier, 0);
            assert_eq!(patched_from.as_ref(), Some(&MeasureLabel::from("6")));
            let tiers: Vec<u8> = difficulty_map.iter().map(|s| s.difficulty).collect();
            assert_eq!(tiers, vec![1, 1, 1, 1, 1, 3, 3, 3]);
        }
        other => panic!("expected ScoreChanged, got {:?}", other),
    }

    collect_until(&mut setup.events, is_stopped).await;
    let played = setup.played.lock().unwrap();
    assert_eq!(played.len(), 32);
    // Measures 1..=5 keep tier 1 (octave 2), 6..=8 now sound tier 3 (octave 4)
    let low = c_in_octave(2);
    let high = c_in_octave(4);
    assert!(played[..20].iter().all(|(f, _, _)| (f[0] - low).abs() < 1e-6));
    assert!(played[20..].iter().all(|(f, _, _)| (f[0] - high).abs() < 1e-6));
}

#[tokio::test(start_paused = true)]
async fn test_fixed_difficulty_ignores_proficiency() {
    let mut setup = spawn_player(variants(&LABELS[..4], 3), Box::new(NoCapture), None);

    setup.handle.set_difficulty(3).unwrap();
    setup.handle.report_proficiency(2.0).unwrap();
    setup.handle.set_recording_enabled(false).unwrap();
    setup.handle.play().unwrap();
    let events = collect_until(&mut setup.events, is_stopped).await;

    let changes: Vec<(u8, bool)> = events
        .iter()
        .filter_map(|e| match e {
            PlayerEvent::ScoreChanged {
                tier, patched_from, ..
            } => Some((*tier, patched_from.is_some())),
            _ => None,
        })
        .collect();
    assert_eq!(changes, vec![(3, false)]);

    let tier3 = c_in_octave(4);
    assert!(setup
        .played
        .lock()
        .unwrap()
        .iter()
        .all(|(f, _, _)| (f[0] - tier3).abs() < 1e-6));
}

#[tokio::test(start_paused = true)]
async fn test_difficulty_change_stops_playback_first() {
    let mut setup = spawn_player(variants(&LABELS[..4], 2), Box::new(NoCapture), None);

    setup.handle.play().unwrap();
    sleep(Duration::from_millis(1000)).await;
    setup.handle.set_difficulty(2).unwrap();
    setup.handle.set_difficulty(9).unwrap();

    let events = collect_until(&mut setup.events, |e| matches!(e, PlayerEvent::Error(_))).await;
    let stopped = events.iter().position(is_stopped).unwrap();
    let changed = events
        .iter()
        .position(|e| matches!(e, PlayerEvent::ScoreChanged { tier: 2, .. }))
        .unwrap();
    assert!(stopped < changed);
    match events.last() {
        Some(PlayerEvent::Error(message)) => assert!(message.contains("Difficulty tier 9")),
        other => panic!("expected Error, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_capture_denied_gives_one_notice_and_empty_segments() {
    let mut setup = spawn_player(variants(&LABELS[..3], 1), Box::new(NoCapture), None);

    setup.handle.play().unwrap();
    let events = collect_until(&mut setup.events, is_stopped).await;

    let notices = events
        .iter()
        .filter(|e| matches!(e, PlayerEvent::Notice(_)))
        .count();
    assert_eq!(notices, 1);
    let segments = sealed(&events);
    assert_eq!(segments.len(), 3);
    assert!(segments.iter().all(|(_, notes, samples)| *notes == 4 && *samples == 0));
}

#[tokio::test(start_paused = true)]
async fn test_malformed_accompaniment_keeps_previous() {
    let mut setup = spawn_player(variants(&LABELS[..2], 1), Box::new(NoCapture), None);

    setup
        .handle
        .load_accompaniment("<score-partwise><part id=\"P1\"><measure>")
        .unwrap();
    let events = collect_until(&mut setup.events, |e| matches!(e, PlayerEvent::Error(_))).await;
    assert!(matches!(events.last(), Some(PlayerEvent::Error(m)) if m.contains("Accompaniment")));

    // Nothing was loaded, so accompaniment style plays silently
    setup.handle.set_recording_enabled(false).unwrap();
    setup.handle.set_style(PlaybackStyle::Accompaniment).unwrap();
    setup.handle.play().unwrap();
    let events = collect_until(&mut setup.events, is_stopped).await;
    assert!(events
        .iter()
        .any(|e| matches!(e, PlayerEvent::Notice(m) if m.contains("No accompaniment"))));
    assert!(setup.played.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_accompaniment_style_plays_accompaniment() {
    let mut setup = spawn_player(variants(&LABELS[..2], 1), Box::new(NoCapture), None);

    setup
        .handle
        .load_accompaniment(ladder_xml(&["A"], 5))
        .unwrap();
    // Score -> Metronome -> Accompaniment
    setup.handle.cycle_style().unwrap();
    setup.handle.cycle_style().unwrap();
    setup.handle.set_recording_enabled(false).unwrap();
    setup.handle.play().unwrap();
    let events = collect_until(&mut setup.events, is_stopped).await;

    assert!(events
        .iter()
        .any(|e| matches!(e, PlayerEvent::StyleChanged(PlaybackStyle::Accompaniment))));
    let played = setup.played.lock().unwrap();
    assert_eq!(played.len(), 8);
    let accompaniment = c_in_octave(5);
    assert!(played.iter().all(|(f, _, _)| (f[0] - accompaniment).abs() < 1e-6));
}

#[tokio::test(start_paused = true)]
async fn test_metronome_clicks_every_beat() {
    let mut setup = spawn_player(variants(&LABELS[..1], 1), Box::new(NoCapture), None);

    setup.handle.set_style(PlaybackStyle::Metronome).unwrap();
    setup.handle.set_recording_enabled(false).unwrap();
    setup.handle.play().unwrap();
    collect_until(&mut setup.events, is_stopped).await;

    let played = setup.played.lock().unwrap();
    assert_eq!(played.len(), 4);
    assert!(played.iter().all(|(f, ms, _)| f == &vec![880.0] && *ms == 50.0));
    for pair in played.windows(2) {
        assert!(pair[1].2 - pair[0].2 >= Duration::from_millis(500));
    }
}

#[tokio::test(start_paused = true)]
async fn test_evaluator_feeds_patcher() {
    let requests = Arc::new(Mutex::new(Vec::new()));
    let evaluator = FixedEvaluator {
        proficiency: 9.0,
        requests: Arc::clone(&requests),
    };
    let mut setup = spawn_player(
        variants(&LABELS, 5),
        Box::new(SilentMicrophone),
        Some(Arc::new(evaluator)),
    );

    setup.handle.play().unwrap();
    let events = collect_until(&mut setup.events, |e| {
        matches!(e, PlayerEvent::ScoreChanged { .. })
    })
    .await;
    assert!(events
        .iter()
        .any(|e| matches!(e, PlayerEvent::ProficiencyUpdated(p) if *p == 9.0)));

    let requests = requests.lock().unwrap();
    assert_eq!(requests[0].difficulty_tier, 1);
    assert_eq!(requests[0].expected_notes.len(), 4);
    assert_eq!(requests[0].sample_rate, 8_000);
}

#[tokio::test(start_paused = true)]
async fn test_capture_keeps_up_during_long_steps() {
    let dropped = Arc::new(Mutex::new(0));
    let microphone = TimedMicrophone {
        started: None,
        delivered: 0,
        dropped: Arc::clone(&dropped),
    };
    let mut setup = spawn_player(variants(&LABELS[..2], 1), Box::new(microphone), None);

    // Each 500 ms step outlasts the device queue many times over
    setup.handle.play().unwrap();
    let events = collect_until(&mut setup.events, is_stopped).await;

    assert_eq!(*dropped.lock().unwrap(), 0);
    let segments = sealed(&events);
    assert_eq!(segments.len(), 2);
    for (_, notes, samples) in &segments {
        assert_eq!(*notes, 4);
        assert!((1900..=2100).contains(samples), "{} samples", samples);
    }
}

/// Evaluator that is slow on the first measure and echoes the measure
/// number as the proficiency.
struct MeasureEchoEvaluator;

impl ProficiencyEvaluator for MeasureEchoEvaluator {
    fn evaluate(&self, request: &ProficiencyRequest) -> Result<ProficiencyResponse, EtudeError> {
        let measure = request.captured_samples.first().copied().unwrap_or(0.0) as f64;
        if measure == 1.0 {
            std::thread::sleep(Duration::from_millis(50));
        }
        Ok(ProficiencyResponse {
            proficiency: measure,
        })
    }
}

/// Microphone that fills each measure with its 1-based position.
struct CountingMicrophone {
    started: Option<Instant>,
    delivered: u64,
}

impl CaptureDevice for CountingMicrophone {
    fn request_access(&mut self) -> Result<CaptureFormat, EtudeError> {
        self.started = Some(Instant::now());
        self.delivered = 0;
        Ok(CaptureFormat {
            sample_rate: Some(1000),
        })
    }

    fn read_next_frame(&mut self) -> Option<Vec<f32>> {
        let started = self.started?;
        let produced = (Instant::now() - started).as_millis() as u64 / 10;
        if produced <= self.delivered {
            return None;
        }
        // Buffer n covers ((n - 1) * 10, n * 10] ms; a measure lasts 2000 ms
        let measure = self.delivered / 200 + 1;
        self.delivered += 1;
        Some(vec![measure as f32; 10])
    }

    fn release(&mut self) {
        self.started = None;
    }
}

#[tokio::test(start_paused = true)]
async fn test_evaluations_apply_in_measure_order() {
    let microphone = CountingMicrophone {
        started: None,
        delivered: 0,
    };
    let mut setup = spawn_player(
        variants(&LABELS[..3], 1),
        Box::new(microphone),
        Some(Arc::new(MeasureEchoEvaluator)),
    );

    setup.handle.play().unwrap();
    let mut updates = Vec::new();
    while updates.len() < 3 {
        match setup.events.recv().await {
            Some(PlayerEvent::ProficiencyUpdated(p)) => updates.push(p),
            Some(_) => {}
            None => break,
        }
    }
    assert_eq!(updates, vec![1.0, 2.0, 3.0]);
}

#[tokio::test]
async fn test_handle_reports_closed_player() {
    let (player, handle, _events) = Player::new(
        EngineConfig::default(),
        variants(&LABELS[..1], 1),
        Box::new(RecordingSynth::default()),
        Box::new(NoCapture),
        None,
    )
    .unwrap();
    drop(player);
    assert!(matches!(handle.play(), Err(EtudeError::PlayerClosed)));
}
