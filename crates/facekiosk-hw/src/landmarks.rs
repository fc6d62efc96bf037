//! Landmark provider boundary.
//!
//! The face-mesh model runs outside this process. Its raw JSON output
//! (`faceInViewConfidence`, `boundingBox`, `annotations`) is validated and
//! normalised here into a typed [`LandmarkSnapshot`], so nothing downstream
//! handles untyped model output.

use crate::frame::{Frame, CHANNELS};
use facekiosk_core::{FaceBox, LandmarkName, LandmarkSnapshot, Point2D, Point3D};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("landmark provider unavailable: {0}")]
    Unavailable(String),
    #[error("malformed landmark record: {0}")]
    Malformed(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Produces at most one landmark snapshot per frame.
pub trait LandmarkProvider: Send {
    fn detect(&mut self, frame: &Frame) -> Result<Option<LandmarkSnapshot>, ProviderError>;
}

/// Face record as emitted by the face-mesh model.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawFace {
    #[serde(default)]
    pub face_in_view_confidence: Option<f32>,
    #[serde(default)]
    pub bounding_box: Option<RawBox>,
    #[serde(default)]
    pub annotations: HashMap<String, Vec<Vec<f32>>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawBox {
    pub top_left: Vec<f32>,
    pub bottom_right: Vec<f32>,
}

/// One model output line: a list of faces, a single face, or `null`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawDetection {
    Many(Vec<RawFace>),
    Single(RawFace),
}

impl RawFace {
    /// Validate and convert into a typed snapshot.
    ///
    /// Annotation lists contribute their first point; names the evaluator
    /// does not know are dropped.
    pub fn normalize(&self) -> Result<LandmarkSnapshot, ProviderError> {
        let confidence = self.face_in_view_confidence.unwrap_or(0.0);
        if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
            return Err(ProviderError::Malformed(format!(
                "confidence out of range: {confidence}"
            )));
        }

        let mut snapshot = LandmarkSnapshot::new(confidence);

        if let Some(raw_box) = &self.bounding_box {
            snapshot = snapshot.with_box(FaceBox::new(
                point2(&raw_box.top_left, "boundingBox.topLeft")?,
                point2(&raw_box.bottom_right, "boundingBox.bottomRight")?,
            ));
        }

        for (key, points) in &self.annotations {
            let Some(name) = LandmarkName::from_key(key) else {
                continue;
            };
            let Some(first) = points.first() else {
                continue;
            };
            snapshot = snapshot.with_landmark(name, point3(first, key)?);
        }

        Ok(snapshot)
    }
}

fn point2(raw: &[f32], field: &str) -> Result<Point2D, ProviderError> {
    match raw {
        [x, y, ..] if x.is_finite() && y.is_finite() => Ok(Point2D::new(*x, *y)),
        _ => Err(ProviderError::Malformed(format!("{field}: expected [x, y], got {raw:?}"))),
    }
}

fn point3(raw: &[f32], field: &str) -> Result<Point3D, ProviderError> {
    match raw {
        [x, y, z, ..] if x.is_finite() && y.is_finite() && z.is_finite() => {
            Ok(Point3D::new(*x, *y, *z))
        }
        _ => Err(ProviderError::Malformed(format!(
            "{field}: expected [x, y, z], got {raw:?}"
        ))),
    }
}

/// Parse one model output line. Multiple faces: the first one wins.
pub fn parse_detection(line: &str) -> Result<Option<LandmarkSnapshot>, ProviderError> {
    let detection: Option<RawDetection> = serde_json::from_str(line.trim())
        .map_err(|e| ProviderError::Malformed(e.to_string()))?;
    let face = match detection {
        None => return Ok(None),
        Some(RawDetection::Single(face)) => face,
        Some(RawDetection::Many(faces)) => match faces.into_iter().next() {
            Some(face) => face,
            None => return Ok(None),
        },
    };
    face.normalize().map(Some)
}

/// Header line preceding each frame sent to the sidecar.
#[derive(Debug, Serialize)]
struct FrameHeader {
    width: u32,
    height: u32,
    channels: usize,
    len: usize,
}

impl FrameHeader {
    fn for_frame(frame: &Frame) -> Self {
        Self {
            width: frame.width,
            height: frame.height,
            channels: CHANNELS,
            len: frame.data.len(),
        }
    }
}

/// Runs the face-mesh model as a child process.
///
/// Per frame: one JSON header line plus `len` packed RGB bytes on the
/// child's stdin, then one JSON detection line back on its stdout.
pub struct SidecarProvider {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    line: String,
}

impl SidecarProvider {
    /// Spawn the model from a whitespace-separated command line.
    pub fn spawn(command_line: &str) -> Result<Self, ProviderError> {
        let mut parts = command_line.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| ProviderError::Unavailable("empty sidecar command".into()))?;

        let mut child = Command::new(program)
            .args(parts)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| ProviderError::Unavailable(format!("failed to spawn {program}: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ProviderError::Unavailable("sidecar stdin not piped".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ProviderError::Unavailable("sidecar stdout not piped".into()))?;

        tracing::info!(program, pid = child.id(), "landmark sidecar started");

        Ok(Self {
            child,
            stdin,
            stdout: BufReader::new(stdout),
            line: String::new(),
        })
    }
}

impl LandmarkProvider for SidecarProvider {
    fn detect(&mut self, frame: &Frame) -> Result<Option<LandmarkSnapshot>, ProviderError> {
        let mut header_line = serde_json::to_vec(&FrameHeader::for_frame(frame))
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;
        header_line.push(b'\n');

        let write = self
            .stdin
            .write_all(&header_line)
            .and_then(|_| self.stdin.write_all(&frame.data))
            .and_then(|_| self.stdin.flush());
        if let Err(e) = write {
            return Err(ProviderError::Unavailable(format!("sidecar stdin closed: {e}")));
        }

        self.line.clear();
        if self.stdout.read_line(&mut self.line)? == 0 {
            return Err(ProviderError::Unavailable("sidecar closed its output".into()));
        }
        parse_detection(&self.line)
    }
}

impl Drop for SidecarProvider {
    fn drop(&mut self) {
        if let Err(e) = self.child.kill() {
            tracing::debug!(error = %e, "landmark sidecar already exited");
        }
        let _ = self.child.wait();
    }
}

/// Replays recorded detection lines, one per frame, ignoring frame content.
///
/// End of input reads as "no face".
pub struct ReplayProvider<R> {
    reader: R,
    line: String,
}

impl<R: BufRead + Send> ReplayProvider<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: String::new(),
        }
    }
}

impl<R: BufRead + Send> LandmarkProvider for ReplayProvider<R> {
    fn detect(&mut self, _frame: &Frame) -> Result<Option<LandmarkSnapshot>, ProviderError> {
        loop {
            self.line.clear();
            if self.reader.read_line(&mut self.line)? == 0 {
                return Ok(None);
            }
            if !self.line.trim().is_empty() {
                return parse_detection(&self.line);
            }
        }
    }
}
