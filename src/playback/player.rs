//! Player task
//!
//! One tokio task owns the scheduler, the patcher and all playback settings.
//! UI requests arrive as [`Command`]s, results flow back as [`PlayerEvent`]s,
//! and proficiency evaluations run one at a time, in measure order, on the
//! blocking pool and report back into the same loop. The automatic score is
//! therefore only patched between two steps, never during one.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};

use super::scheduler::{Lineup, Scheduler};
use super::types::{Command, PlaybackStyle, PlayerEvent, SchedulerEvent};
use crate::adaptive::{DifficultyPatcher, DifficultyVariantSet, AUTO_TIER};
use crate::capture::{CaptureDevice, CapturedSegment};
use crate::config::EngineConfig;
use crate::error::EtudeError;
use crate::evaluator::{ProficiencyEvaluator, ProficiencyRequest, ProficiencyResponse};
use crate::score::{parse_musicxml, MeasureLabel, Score, ScoreWalker};
use crate::synth::ToneSynth;
use crate::timing::Tempo;

struct Evaluation {
    label: MeasureLabel,
    result: Result<ProficiencyResponse, EtudeError>,
}

/// Queue of sealed measures waiting for the evaluator.
type EvaluationQueue = mpsc::UnboundedSender<(MeasureLabel, ProficiencyRequest)>;

/// Cloneable remote control for a running [`Player`].
#[derive(Debug, Clone)]
pub struct PlayerHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl PlayerHandle {
    pub fn send(&self, command: Command) -> Result<(), EtudeError> {
        self.commands
            .send(command)
            .map_err(|_| EtudeError::PlayerClosed)
    }

    pub fn play(&self) -> Result<(), EtudeError> {
        self.send(Command::Play)
    }

    pub fn pause(&self) -> Result<(), EtudeError> {
        self.send(Command::Pause)
    }

    pub fn set_tempo_offset(&self, offset: f64) -> Result<(), EtudeError> {
        self.send(Command::SetTempoOffset(offset))
    }

    pub fn tempo_up(&self) -> Result<(), EtudeError> {
        self.send(Command::TempoUp)
    }

    pub fn tempo_down(&self) -> Result<(), EtudeError> {
        self.send(Command::TempoDown)
    }

    pub fn set_difficulty(&self, tier: u8) -> Result<(), EtudeError> {
        self.send(Command::SetDifficulty(tier))
    }

    pub fn set_recording_enabled(&self, enabled: bool) -> Result<(), EtudeError> {
        self.send(Command::SetRecordingEnabled(enabled))
    }

    pub fn set_style(&self, style: PlaybackStyle) -> Result<(), EtudeError> {
        self.send(Command::SetStyle(style))
    }

    pub fn cycle_style(&self) -> Result<(), EtudeError> {
        self.send(Command::CycleStyle)
    }

    pub fn load_accompaniment(&self, musicxml: impl Into<String>) -> Result<(), EtudeError> {
        self.send(Command::LoadAccompaniment(musicxml.into()))
    }

    pub fn report_proficiency(&self, proficiency: f64) -> Result<(), EtudeError> {
        self.send(Command::ReportProficiency(proficiency))
    }

    pub fn shutdown(&self) -> Result<(), EtudeError> {
        self.send(Command::Shutdown)
    }
}

/// The adaptive practice player.
pub struct Player {
    scheduler: Scheduler,
    patcher: DifficultyPatcher,
    tempo: Tempo,
    style: PlaybackStyle,
    /// Selected tier, `AUTO_TIER` for the adaptive score
    difficulty: u8,
    record: bool,
    accompaniment: Option<Arc<Score>>,
    evaluator: Option<Arc<dyn ProficiencyEvaluator>>,
    evaluation_queue: Option<EvaluationQueue>,
    capture_poll: Duration,
    commands: mpsc::UnboundedReceiver<Command>,
    evaluations_tx: mpsc::UnboundedSender<Evaluation>,
    evaluations: mpsc::UnboundedReceiver<Evaluation>,
    events: mpsc::UnboundedSender<PlayerEvent>,
}

impl Player {
    /// Build a player over a variant set.
    ///
    /// Starts on the adaptive score, score style, recording on. Fails on an
    /// invalid configuration or when the adaptive score cannot be walked.
    pub fn new(
        config: EngineConfig,
        variants: DifficultyVariantSet,
        synth: Box<dyn ToneSynth>,
        capture: Box<dyn CaptureDevice>,
        evaluator: Option<Arc<dyn ProficiencyEvaluator>>,
    ) -> Result<(Self, PlayerHandle, mpsc::UnboundedReceiver<PlayerEvent>), EtudeError> {
        config.validate()?;
        let patcher = DifficultyPatcher::new(variants, &config)?;
        ScoreWalker::new(patcher.auto_score())?;

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (evaluations_tx, evaluations) = mpsc::unbounded_channel();

        let player = Self {
            tempo: config.tempo(),
            capture_poll: Duration::from_millis(config.capture.poll_ms),
            scheduler: Scheduler::new(config, synth, capture),
            patcher,
            style: PlaybackStyle::Score,
            difficulty: AUTO_TIER,
            record: true,
            accompaniment: None,
            evaluator,
            evaluation_queue: None,
            commands: command_rx,
            evaluations_tx,
            evaluations,
            events: event_tx,
        };
        let handle = PlayerHandle {
            commands: command_tx,
        };
        Ok((player, handle, event_rx))
    }

    pub fn patcher(&self) -> &DifficultyPatcher {
        &self.patcher
    }

    /// Run until `Shutdown` or until every handle is dropped.
    pub async fn run(mut self) {
        log::debug!("Player task running");
        if let Some(evaluator) = self.evaluator.take() {
            let results = self.evaluations_tx.clone();
            self.evaluation_queue = Some(spawn_evaluation_worker(evaluator, results));
        }
        let mut capture_poll = interval(self.capture_poll);
        capture_poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let deadline = self.scheduler.next_due();
            let capturing = self.scheduler.is_capturing();
            tokio::select! {
                biased;

                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle(command),
                },
                Some(evaluation) = self.evaluations.recv() => self.on_evaluation(evaluation),
                _ = wait_until(deadline) => self.scheduler.run_due(Instant::now()),
                _ = capture_poll.tick(), if capturing => self.scheduler.pump_capture(),
            }
            self.forward_scheduler_events();
        }

        if self.scheduler.is_running() {
            self.scheduler.stop(Instant::now());
            self.forward_scheduler_events();
            self.emit(PlayerEvent::PlaybackStopped);
        }
        log::debug!("Player task finished");
    }

    fn handle(&mut self, command: Command) {
        log::debug!("Command: {:?}", CommandName(&command));
        match command {
            Command::Play => self.play(),
            Command::Pause => {
                if self.scheduler.is_running() {
                    self.stop();
                }
            }
            Command::SetTempoOffset(offset) => {
                self.tempo.set_offset(offset);
                self.apply_tempo();
            }
            Command::TempoUp => {
                self.tempo.step_up();
                self.apply_tempo();
            }
            Command::TempoDown => {
                self.tempo.step_down();
                self.apply_tempo();
            }
            Command::SetDifficulty(tier) => self.set_difficulty(tier),
            Command::SetRecordingEnabled(enabled) => self.record = enabled,
            Command::SetStyle(style) => self.set_style(style),
            Command::CycleStyle => {
                let next = self.style.next(self.accompaniment.is_some());
                self.set_style(next);
            }
            Command::LoadAccompaniment(document) => match parse_musicxml(&document) {
                Ok(score) => {
                    log::info!("Accompaniment loaded: {} measures", score.measure_count());
                    self.accompaniment = Some(Arc::new(score));
                }
                Err(e) => {
                    log::error!("Accompaniment rejected: {}", e);
                    self.emit(PlayerEvent::Error(format!("Accompaniment not loaded: {}", e)));
                }
            },
            Command::ReportProficiency(proficiency) => self.apply_proficiency(proficiency),
            Command::Shutdown => {}
        }
    }

    fn play(&mut self) {
        if self.scheduler.is_running() {
            return;
        }
        let Some(main) = self.patcher.score_for(self.difficulty) else {
            self.emit(PlayerEvent::Error(format!(
                "Difficulty tier {} is not loaded",
                self.difficulty
            )));
            return;
        };
        if self.style == PlaybackStyle::Accompaniment && self.accompaniment.is_none() {
            self.emit(PlayerEvent::Notice(
                "No accompaniment loaded, playing without sound".to_string(),
            ));
        }

        let lineup = Lineup {
            main,
            style: self.style,
            accompaniment: self.accompaniment.clone(),
            record: self.record,
        };
        let bpm = self.tempo.bpm();
        match self.scheduler.start(bpm, lineup, Instant::now()) {
            Ok(()) => self.emit(PlayerEvent::PlaybackStarted {
                style: self.style,
                tier: self.difficulty,
                bpm,
            }),
            Err(e) => {
                log::error!("Playback could not start: {}", e);
                self.emit(PlayerEvent::Error(e.to_string()));
            }
        }
    }

    fn stop(&mut self) {
        self.scheduler.stop(Instant::now());
        self.forward_scheduler_events();
        self.emit(PlayerEvent::PlaybackStopped);
    }

    fn apply_tempo(&mut self) {
        let bpm = self.tempo.bpm();
        self.scheduler.set_bpm(bpm);
        self.emit(PlayerEvent::TempoChanged(bpm));
    }

    fn set_style(&mut self, style: PlaybackStyle) {
        if self.scheduler.is_running() {
            self.stop();
        }
        self.style = style;
        self.emit(PlayerEvent::StyleChanged(style));
    }

    fn set_difficulty(&mut self, tier: u8) {
        let Some(score) = self.patcher.score_for(tier) else {
            self.emit(PlayerEvent::Error(
                EtudeError::VariantError {
                    tier,
                    message: format!("only tiers 0..={} exist", self.patcher.variants().max_tier()),
                }
                .to_string(),
            ));
            return;
        };
        if self.scheduler.is_running() {
            self.stop();
        }
        self.difficulty = tier;
        log::info!("Difficulty set to tier {}", tier);
        self.emit(PlayerEvent::ScoreChanged {
            tier,
            score,
            patched_from: None,
            difficulty_map: self.patcher.map().settings(),
        });
    }

    fn apply_proficiency(&mut self, proficiency: f64) {
        self.emit(PlayerEvent::ProficiencyUpdated(proficiency));
        if self.difficulty != AUTO_TIER {
            return;
        }

        let current = self.scheduler.main_label();
        if let Some(patch) = self.patcher.retarget(proficiency, current.as_ref()) {
            let score = self.patcher.auto_score();
            self.scheduler.reload_main(Arc::clone(&score));
            self.emit(PlayerEvent::ScoreChanged {
                tier: AUTO_TIER,
                score,
                patched_from: Some(patch.from_label),
                difficulty_map: self.patcher.map().settings(),
            });
        }
    }

    fn on_evaluation(&mut self, evaluation: Evaluation) {
        match evaluation.result {
            Ok(response) => self.apply_proficiency(response.proficiency),
            Err(e) => {
                log::warn!("Evaluation of measure '{}' failed: {}", evaluation.label, e);
            }
        }
    }

    fn forward_scheduler_events(&mut self) {
        for event in self.scheduler.drain_events() {
            match event {
                SchedulerEvent::ScrollToMeasure { label, smooth } => {
                    self.emit(PlayerEvent::ScrollToMeasure { label, smooth })
                }
                SchedulerEvent::SegmentSealed(segment) => {
                    self.emit(PlayerEvent::SegmentSealed {
                        label: segment.label.clone(),
                        expected_notes: segment.expected_notes.len(),
                        samples: segment.samples.len(),
                    });
                    self.evaluate(segment);
                }
                SchedulerEvent::Notice(message) => self.emit(PlayerEvent::Notice(message)),
                SchedulerEvent::Finished => self.emit(PlayerEvent::PlaybackStopped),
            }
        }
    }

    /// Queue a sealed segment for evaluation.
    fn evaluate(&self, segment: CapturedSegment) {
        let Some(queue) = self.evaluation_queue.as_ref() else {
            return;
        };
        let tier = if self.difficulty == AUTO_TIER {
            self.patcher.tier_at(&segment.label).unwrap_or(1)
        } else {
            self.difficulty
        };
        let request = ProficiencyRequest::from_segment(&segment, tier);
        if queue.send((segment.label, request)).is_err() {
            log::warn!("Evaluation worker stopped, segment not evaluated");
        }
    }

    fn emit(&self, event: PlayerEvent) {
        if self.events.send(event).is_err() {
            log::trace!("No listener for player events");
        }
    }
}

/// Evaluate queued segments one after the other on the blocking pool.
///
/// Results come back in the order the segments were sealed. The worker ends
/// when the queue is dropped with the player.
fn spawn_evaluation_worker(
    evaluator: Arc<dyn ProficiencyEvaluator>,
    results: mpsc::UnboundedSender<Evaluation>,
) -> EvaluationQueue {
    let (queue, mut pending) = mpsc::unbounded_channel::<(MeasureLabel, ProficiencyRequest)>();
    tokio::spawn(async move {
        while let Some((label, request)) = pending.recv().await {
            let evaluator = Arc::clone(&evaluator);
            let result = tokio::task::spawn_blocking(move || evaluator.evaluate(&request))
                .await
                .unwrap_or_else(|e| Err(EtudeError::EvaluatorError(e.to_string())));
            if results.send(Evaluation { label, result }).is_err() {
                break;
            }
        }
        log::debug!("Evaluation worker finished");
    });
    queue
}

/// Sleep until `deadline`, or forever when nothing is scheduled.
async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Log-friendly command name (accompaniment documents can be large).
struct CommandName<'a>(&'a Command);

impl std::fmt::Debug for CommandName<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            Command::LoadAccompaniment(doc) => write!(f, "LoadAccompaniment({} bytes)", doc.len()),
            other => write!(f, "{:?}", other),
        }
    }
}
