//! Capture session lifecycle.
//!
//! A session is a periodic task that samples the engine, evaluates the face
//! position and feeds the capture sequencer. When the set is complete the
//! stills are handed to the uploader and the task ends; the upload reports
//! back into the shared [`SessionContext`].

use crate::engine::EngineHandle;
use chrono::{DateTime, Utc};
use facekiosk_client::{MatchSetId, UploadCoordinator};
use facekiosk_core::{
    evaluate, CaptureConfig, CaptureError, CaptureFailurePolicy, CaptureSequencer,
    CompletedSession, ConfigError, EvaluatorConfig, GrabError, Tick, TickOutcome,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("session label must not be empty")]
    EmptyLabel,
    #[error("no previous session to retry")]
    NothingToRetry,
    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Idle,
    Collecting,
    Uploading,
    Matched,
    UploadFailed,
}

/// State of the current (or last) capture session, as reported by `Status`.
#[derive(Debug, Clone, Serialize)]
pub struct SessionContext {
    pub id: Uuid,
    pub label: String,
    pub started_at: DateTime<Utc>,
    pub phase: SessionPhase,
    /// Capture strategy driving this session (`pose-gated` or `timed`).
    pub strategy: &'static str,
    pub captured: usize,
    pub target: usize,
    /// Time until the next timed shot; `None` for pose-gated sessions.
    pub countdown_ms: Option<u64>,
    pub last_error: Option<String>,
    pub match_set: Option<MatchSetId>,
}

impl SessionContext {
    fn new(label: &str, strategy: &'static str, target: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            label: label.to_string(),
            started_at: Utc::now(),
            phase: SessionPhase::Collecting,
            strategy,
            captured: 0,
            target,
            countdown_ms: None,
            last_error: None,
            match_set: None,
        }
    }
}

type SharedContext = Arc<Mutex<Option<SessionContext>>>;

/// Per-session settings copied into the task.
#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    pub tick: Duration,
    pub jpeg_quality: u8,
}

struct RunningSession {
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Starts, stops and reports on capture sessions. One session at a time.
pub struct SessionController {
    engine: EngineHandle,
    uploader: Arc<dyn UploadCoordinator>,
    capture: CaptureConfig,
    settings: SessionSettings,
    context: SharedContext,
    running: Mutex<Option<RunningSession>>,
}

impl SessionController {
    pub fn new(
        engine: EngineHandle,
        uploader: Arc<dyn UploadCoordinator>,
        capture: CaptureConfig,
        settings: SessionSettings,
    ) -> Self {
        Self {
            engine,
            uploader,
            capture,
            settings,
            context: Arc::new(Mutex::new(None)),
            running: Mutex::new(None),
        }
    }

    /// Start collecting for `label`. A running session is stopped first.
    pub async fn start(&self, label: &str) -> Result<Uuid, SessionError> {
        let label = label.trim();
        if label.is_empty() {
            return Err(SessionError::EmptyLabel);
        }
        let sequencer = CaptureSequencer::new(self.capture.build_strategy()?);

        let mut running = self.running.lock().await;
        if let Some(previous) = running.take() {
            shutdown(previous).await;
        }

        let (_, target) = sequencer.progress();
        let ctx = SessionContext::new(label, sequencer.strategy_name(), target);
        let id = ctx.id;
        *self.context.lock().await = Some(ctx);

        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(run_session(SessionTask {
            id,
            label: label.to_string(),
            engine: self.engine.clone(),
            uploader: Arc::clone(&self.uploader),
            sequencer,
            evaluator: self.capture.evaluator(),
            on_failure: self.capture.on_capture_failure,
            settings: self.settings,
            context: Arc::clone(&self.context),
            stop: stop_rx,
        }));
        *running = Some(RunningSession {
            stop: stop_tx,
            task,
        });

        tracing::info!(label, session_id = %id, target, "session started");
        Ok(id)
    }

    /// Stop the detection loop. Partial captures are discarded; an upload
    /// already in flight keeps going. Returns whether a loop was running.
    pub async fn stop(&self) -> bool {
        let Some(previous) = self.running.lock().await.take() else {
            return false;
        };
        // A loop that completed its set has already ended.
        let finished = previous.task.is_finished();
        shutdown(previous).await;
        if finished {
            return false;
        }

        if let Some(ctx) = self.context.lock().await.as_mut() {
            if ctx.phase == SessionPhase::Collecting {
                ctx.phase = SessionPhase::Idle;
                ctx.captured = 0;
                ctx.countdown_ms = None;
            }
            tracing::info!(session_id = %ctx.id, "session stopped");
        }
        true
    }

    /// Start a fresh session with the last label.
    pub async fn retry(&self) -> Result<Uuid, SessionError> {
        let label = self
            .context
            .lock()
            .await
            .as_ref()
            .map(|ctx| ctx.label.clone())
            .ok_or(SessionError::NothingToRetry)?;
        tracing::info!(label = %label, "retrying session");
        self.start(&label).await
    }

    /// Stop and forget the session. Returns whether there was one.
    pub async fn abort(&self) -> bool {
        self.stop().await;
        let cleared = self.context.lock().await.take();
        if let Some(ctx) = &cleared {
            tracing::info!(session_id = %ctx.id, "session aborted");
        }
        cleared.is_some()
    }

    pub async fn status(&self) -> Option<SessionContext> {
        self.context.lock().await.clone()
    }
}

async fn shutdown(session: RunningSession) {
    // The task may already have finished on its own.
    let _ = session.stop.send(());
    if let Err(e) = session.task.await {
        tracing::warn!(error = %e, "session task ended abnormally");
    }
}

struct SessionTask {
    id: Uuid,
    label: String,
    engine: EngineHandle,
    uploader: Arc<dyn UploadCoordinator>,
    sequencer: CaptureSequencer,
    evaluator: EvaluatorConfig,
    on_failure: CaptureFailurePolicy,
    settings: SessionSettings,
    context: SharedContext,
    stop: oneshot::Receiver<()>,
}

async fn run_session(mut task: SessionTask) {
    let mut interval = tokio::time::interval(task.settings.tick);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last_countdown = None;

    loop {
        tokio::select! {
            _ = &mut task.stop => {
                tracing::debug!(session_id = %task.id, "detection loop stopped");
                return;
            }
            _ = interval.tick() => {}
        }

        let sample = match task.engine.sample().await {
            Ok(sample) => sample,
            Err(e) => {
                tracing::warn!(error = %e, "sample failed");
                let error = CaptureError::ProviderUnavailable.to_string();
                update_context(&task.context, task.id, |ctx| ctx.last_error = Some(error)).await;
                continue;
            }
        };

        let now = Instant::now();
        let tick = match &sample.snapshot {
            Some(snapshot) => {
                let position = evaluate(snapshot, sample.frame.geometry(), &task.evaluator);
                tracing::trace!(?position, "position evaluated");
                Tick::new(now, position)
            }
            None => Tick::empty(now),
        };

        let quality = task.settings.jpeg_quality;
        let frame = &sample.frame;
        let mut still = || -> Result<Vec<u8>, GrabError> {
            frame
                .encode_jpeg(quality)
                .map_err(|e| GrabError::Encode(e.to_string()))
        };

        let outcome = task.sequencer.on_tick(&tick, &mut still);
        let (captured, target) = task.sequencer.progress();
        let countdown = task.sequencer.countdown(now).map(countdown_ms);
        if countdown != last_countdown {
            last_countdown = countdown;
            update_context(&task.context, task.id, |ctx| ctx.countdown_ms = countdown).await;
        }
        match outcome {
            Ok(TickOutcome::Captured(_)) => {
                update_context(&task.context, task.id, |ctx| {
                    ctx.captured = captured;
                    ctx.target = target;
                })
                .await;
            }
            Ok(TickOutcome::Completed(_)) => {
                update_context(&task.context, task.id, |ctx| {
                    ctx.captured = captured;
                    ctx.target = target;
                    ctx.phase = SessionPhase::Uploading;
                })
                .await;
                if let Some(done) = task.sequencer.take_completed() {
                    begin_upload(&task, done);
                }
                return;
            }
            Ok(TickOutcome::Waiting | TickOutcome::Idle) => {}
            Err(e) => {
                let reset = task.on_failure == CaptureFailurePolicy::Reset;
                if reset {
                    tracing::info!(session_id = %task.id, "discarding partial set after capture failure");
                    task.sequencer.reset();
                }
                let error = e.to_string();
                update_context(&task.context, task.id, |ctx| {
                    ctx.last_error = Some(error);
                    if reset {
                        ctx.captured = 0;
                    }
                })
                .await;
            }
        }
    }
}

fn countdown_ms(remaining: Duration) -> u64 {
    u64::try_from(remaining.as_millis()).unwrap_or(u64::MAX)
}

/// Apply `f` to the shared context if it still belongs to session `id`.
async fn update_context(
    context: &SharedContext,
    id: Uuid,
    f: impl FnOnce(&mut SessionContext),
) {
    if let Some(ctx) = context.lock().await.as_mut().filter(|c| c.id == id) {
        f(ctx);
    }
}

fn begin_upload(task: &SessionTask, done: CompletedSession) {
    let id = task.id;
    let label = task.label.clone();
    let uploader = Arc::clone(&task.uploader);
    let context = Arc::clone(&task.context);
    let count = done.images.len();
    tracing::info!(session_id = %id, count, "capture set complete, uploading");

    tokio::spawn(async move {
        let result = uploader.submit(done.images, &label).await;
        let mut guard = context.lock().await;
        let Some(ctx) = guard.as_mut().filter(|c| c.id == id) else {
            tracing::debug!(session_id = %id, "upload finished for a session that is gone");
            return;
        };
        match result {
            Ok(match_set) => {
                tracing::info!(session_id = %id, match_set = %match_set, "upload complete");
                ctx.phase = SessionPhase::Matched;
                ctx.match_set = Some(match_set);
            }
            Err(e) => {
                tracing::warn!(session_id = %id, error = %e, "upload failed");
                ctx.phase = SessionPhase::UploadFailed;
                ctx.last_error = Some(e.to_string());
            }
        }
    });
}
