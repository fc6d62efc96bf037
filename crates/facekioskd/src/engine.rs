use facekiosk_core::LandmarkSnapshot;
use facekiosk_hw::{CameraError, Frame, FrameSource, LandmarkProvider, ProviderError};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("landmark provider error: {0}")]
    Provider(#[from] ProviderError),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// One frame plus whatever the landmark provider found in it.
pub struct Sample {
    pub frame: Frame,
    /// `None` when no face was found or the frame was dark.
    pub snapshot: Option<LandmarkSnapshot>,
}

/// Messages sent from the session task to the engine thread.
enum EngineRequest {
    Sample {
        reply: oneshot::Sender<Result<Sample, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Capture one frame and run the landmark provider on it.
    pub async fn sample(&self) -> Result<Sample, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Sample { reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The thread owns the frame source and the landmark provider; both do
/// blocking I/O. Warmup frames are discarded before the request loop starts.
pub fn spawn_engine(
    mut frames: Box<dyn FrameSource>,
    mut provider: Box<dyn LandmarkProvider>,
    warmup_frames: usize,
) -> EngineHandle {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("facekiosk-engine".into())
        .spawn(move || {
            if warmup_frames > 0 {
                tracing::info!(count = warmup_frames, "discarding warmup frames");
                for _ in 0..warmup_frames {
                    let _ = frames.capture_frame();
                }
            }

            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Sample { reply } => {
                        let result = run_sample(frames.as_mut(), provider.as_mut());
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .expect("failed to spawn engine thread");

    EngineHandle { tx }
}

fn run_sample(
    frames: &mut dyn FrameSource,
    provider: &mut dyn LandmarkProvider,
) -> Result<Sample, EngineError> {
    let frame = frames.capture_frame()?;
    if frame.is_dark {
        tracing::debug!(sequence = frame.sequence, "dark frame, skipping landmark provider");
        return Ok(Sample {
            frame,
            snapshot: None,
        });
    }

    let snapshot = provider.detect(&frame)?;
    if let Some(s) = &snapshot {
        tracing::trace!(
            sequence = frame.sequence,
            confidence = s.confidence,
            landmarks = s.annotations.len(),
            "landmarks detected"
        );
    }
    Ok(Sample { frame, snapshot })
}
