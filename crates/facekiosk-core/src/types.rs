use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// 2D point in provider pixel space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point2D {
    pub x: f32,
    pub y: f32,
}

impl Point2D {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to another point.
    pub fn distance(&self, other: &Point2D) -> f32 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// 3D landmark point. `z` is a relative depth unit from the provider, not a
/// physical distance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point3D {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Point3D {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

/// Axis-aligned face box as reported by the landmark model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceBox {
    pub top_left: Point2D,
    pub bottom_right: Point2D,
}

impl FaceBox {
    pub fn new(top_left: Point2D, bottom_right: Point2D) -> Self {
        Self {
            top_left,
            bottom_right,
        }
    }

    /// Length of the box diagonal. Grows as the face approaches the camera.
    pub fn diagonal(&self) -> f32 {
        self.bottom_right.distance(&self.top_left)
    }
}

/// Named facial landmarks understood by the evaluator.
///
/// Keys follow the face-mesh annotation names (`noseTip`, `leftCheek`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LandmarkName {
    NoseTip,
    NoseBottom,
    MidwayBetweenEyes,
    LeftCheek,
    RightCheek,
}

impl LandmarkName {
    pub const ALL: [LandmarkName; 5] = [
        LandmarkName::NoseTip,
        LandmarkName::NoseBottom,
        LandmarkName::MidwayBetweenEyes,
        LandmarkName::LeftCheek,
        LandmarkName::RightCheek,
    ];

    /// Annotation key used by the face-mesh model.
    pub fn key(&self) -> &'static str {
        match self {
            LandmarkName::NoseTip => "noseTip",
            LandmarkName::NoseBottom => "noseBottom",
            LandmarkName::MidwayBetweenEyes => "midwayBetweenEyes",
            LandmarkName::LeftCheek => "leftCheek",
            LandmarkName::RightCheek => "rightCheek",
        }
    }

    /// Look up a landmark by annotation key. Unknown keys return `None`.
    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|name| name.key() == key)
    }
}

/// One detection tick worth of landmark data, in sensor (un-mirrored)
/// coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LandmarkSnapshot {
    /// Face-in-view confidence in [0, 1].
    pub confidence: f32,
    pub bounding_box: Option<FaceBox>,
    pub annotations: BTreeMap<LandmarkName, Point3D>,
}

impl LandmarkSnapshot {
    pub fn new(confidence: f32) -> Self {
        Self {
            confidence,
            bounding_box: None,
            annotations: BTreeMap::new(),
        }
    }

    pub fn with_box(mut self, bounding_box: FaceBox) -> Self {
        self.bounding_box = Some(bounding_box);
        self
    }

    pub fn with_landmark(mut self, name: LandmarkName, point: Point3D) -> Self {
        self.annotations.insert(name, point);
        self
    }

    /// Landmark by name, skipping points with non-finite coordinates.
    pub fn landmark(&self, name: LandmarkName) -> Option<Point3D> {
        self.annotations
            .get(&name)
            .copied()
            .filter(Point3D::is_finite)
    }
}

/// Dimensions of the preview canvas the kiosk shows to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameGeometry {
    pub width: u32,
    pub height: u32,
}

impl FrameGeometry {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Project a sensor-space point into the mirrored preview.
    ///
    /// The preview is flipped horizontally so users see themselves as in a
    /// mirror. This is the only place the flip is applied.
    pub fn to_preview(&self, point: Point3D) -> Option<(i64, i64)> {
        let x = round_half_up(point.x)?;
        let y = round_half_up(point.y)?;
        Some((i64::from(self.width) - i64::from(x), i64::from(y)))
    }
}

/// Round half toward positive infinity, the way the face-mesh tooling does.
/// Non-finite input yields `None`; values beyond the `i32` range saturate.
pub fn round_half_up(value: f32) -> Option<i32> {
    if !value.is_finite() {
        return None;
    }
    Some((value + 0.5).floor() as i32)
}

/// Discrete head orientation derived from left-cheek depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PoseBucket {
    Center,
    Left,
    Right,
    ObliqueLeft,
    ObliqueRight,
}

impl PoseBucket {
    pub const ALL: [PoseBucket; 5] = [
        PoseBucket::Center,
        PoseBucket::Left,
        PoseBucket::Right,
        PoseBucket::ObliqueLeft,
        PoseBucket::ObliqueRight,
    ];

    /// The three frontal/profile buckets used by short sessions.
    pub const PRIMARY: [PoseBucket; 3] = [PoseBucket::Center, PoseBucket::Left, PoseBucket::Right];

    pub fn as_str(&self) -> &'static str {
        match self {
            PoseBucket::Center => "center",
            PoseBucket::Left => "left",
            PoseBucket::Right => "right",
            PoseBucket::ObliqueLeft => "oblique-left",
            PoseBucket::ObliqueRight => "oblique-right",
        }
    }
}

impl fmt::Display for PoseBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Evaluator output for one snapshot. Flags are independent of each other.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionResult {
    pub in_frame: bool,
    pub distance_valid: bool,
    pub angle_valid: bool,
    pub pose: Option<PoseBucket>,
}

impl PositionResult {
    /// True when the face is centred, at the right distance and level.
    pub fn all_valid(&self) -> bool {
        self.in_frame && self.distance_valid && self.angle_valid
    }
}

/// Key of one entry in a capture set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureSlot {
    /// Pose-gated sessions: one still per pose bucket.
    Pose(PoseBucket),
    /// Timed sessions: the n-th countdown shot.
    Shot(u8),
}

impl fmt::Display for CaptureSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureSlot::Pose(bucket) => write!(f, "pose:{bucket}"),
            CaptureSlot::Shot(n) => write!(f, "shot:{n}"),
        }
    }
}

/// Encoded still frame with its upload filename.
#[derive(Clone, PartialEq, Eq)]
pub struct CapturedImage {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl CapturedImage {
    /// Wrap encoded bytes, generating a unique filename for position `index`.
    pub fn new(index: usize, bytes: Vec<u8>) -> Self {
        Self {
            file_name: crate::naming::generate_still_name(index),
            bytes,
        }
    }
}

impl fmt::Debug for CapturedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapturedImage")
            .field("file_name", &self.file_name)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Stills collected during one session, at most one per slot, kept in
/// capture order.
#[derive(Debug, Clone, Default)]
pub struct CaptureSet {
    entries: Vec<(CaptureSlot, CapturedImage)>,
}

impl CaptureSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, slot: CaptureSlot) -> bool {
        self.entries.iter().any(|(s, _)| *s == slot)
    }

    /// Insert a still. Returns `false` and leaves the set untouched when the
    /// slot is already filled.
    pub fn insert(&mut self, slot: CaptureSlot, image: CapturedImage) -> bool {
        if self.contains(slot) {
            return false;
        }
        self.entries.push((slot, image));
        true
    }

    pub fn get(&self, slot: CaptureSlot) -> Option<&CapturedImage> {
        self.entries
            .iter()
            .find(|(s, _)| *s == slot)
            .map(|(_, image)| image)
    }

    /// Filled slots in capture order.
    pub fn slots(&self) -> impl Iterator<Item = CaptureSlot> + '_ {
        self.entries.iter().map(|(slot, _)| *slot)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Consume the set, yielding entries in capture order.
    pub fn into_ordered(self) -> Vec<(CaptureSlot, CapturedImage)> {
        self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(name: &str) -> CapturedImage {
        CapturedImage {
            file_name: name.into(),
            bytes: vec![0xFF, 0xD8],
        }
    }

    #[test]
    fn test_face_box_diagonal() {
        let b = FaceBox::new(Point2D::new(0.0, 0.0), Point2D::new(300.0, 400.0));
        assert!((b.diagonal() - 500.0).abs() < 1e-4);
    }

    #[test]
    fn test_round_half_up() {
        assert_eq!(round_half_up(2.5), Some(3));
        assert_eq!(round_half_up(-2.5), Some(-2));
        assert_eq!(round_half_up(-2.6), Some(-3));
        assert_eq!(round_half_up(f32::NAN), None);
        assert_eq!(round_half_up(f32::INFINITY), None);
    }

    #[test]
    fn test_to_preview_mirrors_x_only() {
        let g = FrameGeometry::new(640, 480);
        assert_eq!(g.to_preview(Point3D::new(100.4, 50.6, -7.0)), Some((540, 51)));
    }

    #[test]
    fn test_to_preview_saturated_coordinates() {
        let g = FrameGeometry::new(640, 480);
        let (x, _) = g.to_preview(Point3D::new(-3.0e9, 0.0, 0.0)).unwrap();
        assert_eq!(x, 640 - i64::from(i32::MIN));
        let (x, y) = g.to_preview(Point3D::new(f32::MAX, f32::MIN, 0.0)).unwrap();
        assert_eq!(x, 640 - i64::from(i32::MAX));
        assert_eq!(y, i64::from(i32::MIN));
    }

    #[test]
    fn test_landmark_key_roundtrip() {
        for name in LandmarkName::ALL {
            assert_eq!(LandmarkName::from_key(name.key()), Some(name));
        }
        assert_eq!(LandmarkName::from_key("silhouette"), None);
    }

    #[test]
    fn test_snapshot_skips_non_finite_landmarks() {
        let s = LandmarkSnapshot::new(0.95)
            .with_landmark(LandmarkName::LeftCheek, Point3D::new(1.0, 2.0, f32::NAN));
        assert!(s.landmark(LandmarkName::LeftCheek).is_none());
    }

    #[test]
    fn test_capture_set_rejects_duplicate_slot() {
        let mut set = CaptureSet::new();
        assert!(set.insert(CaptureSlot::Pose(PoseBucket::Center), image("a")));
        assert!(!set.insert(CaptureSlot::Pose(PoseBucket::Center), image("b")));
        assert_eq!(set.len(), 1);
        assert_eq!(
            set.get(CaptureSlot::Pose(PoseBucket::Center)).map(|i| i.file_name.as_str()),
            Some("a")
        );
    }

    #[test]
    fn test_capture_set_keeps_capture_order() {
        let mut set = CaptureSet::new();
        set.insert(CaptureSlot::Pose(PoseBucket::Right), image("r"));
        set.insert(CaptureSlot::Pose(PoseBucket::Center), image("c"));
        let names: Vec<_> = set.into_ordered().into_iter().map(|(_, i)| i.file_name).collect();
        assert_eq!(names, vec!["r", "c"]);
    }

    #[test]
    fn test_slot_display() {
        assert_eq!(CaptureSlot::Pose(PoseBucket::ObliqueLeft).to_string(), "pose:oblique-left");
        assert_eq!(CaptureSlot::Shot(2).to_string(), "shot:2");
    }
}
