//! Face position evaluation.
//!
//! Maps one landmark snapshot to independent validity flags (centred in the
//! guide box, at capture distance, head level) and a pose bucket. Stateless:
//! every call looks at a single snapshot only.

use crate::config::EvaluatorConfig;
use crate::types::{
    round_half_up, FrameGeometry, LandmarkName, LandmarkSnapshot, PoseBucket, PositionResult,
};

/// Side length of the centred guide box the nose tip must fall inside.
const GUIDE_BOX_SIZE: f32 = 200.0;

/// Evaluate one snapshot against the preview geometry.
pub fn evaluate(
    snapshot: &LandmarkSnapshot,
    frame: FrameGeometry,
    config: &EvaluatorConfig,
) -> PositionResult {
    PositionResult {
        in_frame: in_frame(snapshot, frame),
        distance_valid: distance_valid(snapshot, config),
        angle_valid: angle_valid(snapshot, config),
        pose: pose_bucket(snapshot, config),
    }
}

/// Rounded face-box diagonal, or `None` when the box is missing.
pub fn face_distance(snapshot: &LandmarkSnapshot) -> Option<i32> {
    let face_box = snapshot.bounding_box?;
    if !face_box.top_left.is_finite() || !face_box.bottom_right.is_finite() {
        return None;
    }
    round_half_up(face_box.diagonal())
}

/// Face is within the configured distance band (inclusive on both ends).
pub fn distance_valid(snapshot: &LandmarkSnapshot, config: &EvaluatorConfig) -> bool {
    let [min, max] = config.distance_range;
    face_distance(snapshot)
        .map(|d| (d as f32) >= min && (d as f32) <= max)
        .unwrap_or(false)
}

/// Absolute difference of rounded cheek depths.
///
/// Computed in `i64`: rounded depths saturate at the `i32` bounds.
pub fn cheek_difference(snapshot: &LandmarkSnapshot) -> Option<i64> {
    let left = round_half_up(snapshot.landmark(LandmarkName::LeftCheek)?.z)?;
    let right = round_half_up(snapshot.landmark(LandmarkName::RightCheek)?.z)?;
    Some((i64::from(left) - i64::from(right)).abs())
}

/// Head is level: both cheeks at roughly the same depth.
pub fn angle_valid(snapshot: &LandmarkSnapshot, config: &EvaluatorConfig) -> bool {
    cheek_difference(snapshot)
        .map(|diff| diff <= i64::from(config.angle_tolerance))
        .unwrap_or(false)
}

/// Nose tip lies strictly inside the guide box centred in the preview.
pub fn in_frame(snapshot: &LandmarkSnapshot, frame: FrameGeometry) -> bool {
    let Some(nose) = snapshot.landmark(LandmarkName::NoseTip) else {
        return false;
    };
    let Some((x, y)) = frame.to_preview(nose) else {
        return false;
    };

    let box_x = (frame.width as f32 - GUIDE_BOX_SIZE) / 2.0;
    let box_y = (frame.height as f32 - GUIDE_BOX_SIZE) / 2.0;
    let (x, y) = (x as f32, y as f32);

    x > box_x && x < box_x + GUIDE_BOX_SIZE && y > box_y && y < box_y + GUIDE_BOX_SIZE
}

/// Bucket for a rounded left-cheek depth. First match wins; 4, 5, -4, -5 and
/// anything beyond ±25 are a dead zone.
pub fn classify_depth(z: i32) -> Option<PoseBucket> {
    match z {
        -3..=3 => Some(PoseBucket::Center),
        20..=25 => Some(PoseBucket::Left),
        -25..=-20 => Some(PoseBucket::Right),
        6..=19 => Some(PoseBucket::ObliqueLeft),
        -19..=-6 => Some(PoseBucket::ObliqueRight),
        _ => None,
    }
}

/// Pose bucket, only reported when detection confidence is high enough.
pub fn pose_bucket(snapshot: &LandmarkSnapshot, config: &EvaluatorConfig) -> Option<PoseBucket> {
    // NaN confidence fails the comparison too.
    if !(snapshot.confidence >= config.confidence_threshold) {
        tracing::debug!(
            confidence = snapshot.confidence,
            threshold = config.confidence_threshold,
            "lighting might be poor or face detection is unclear"
        );
        return None;
    }
    let z = round_half_up(snapshot.landmark(LandmarkName::LeftCheek)?.z)?;
    classify_depth(z)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FaceBox, Point2D, Point3D};
    use rstest::rstest;

    const FRAME: FrameGeometry = FrameGeometry {
        width: 640,
        height: 480,
    };

    fn config() -> EvaluatorConfig {
        EvaluatorConfig::default()
    }

    /// Box whose diagonal is exactly `d` (horizontal).
    fn box_with_diagonal(d: f32) -> FaceBox {
        FaceBox::new(Point2D::new(100.0, 100.0), Point2D::new(100.0 + d, 100.0))
    }

    fn snapshot_with_cheeks(confidence: f32, left_z: f32, right_z: f32) -> LandmarkSnapshot {
        LandmarkSnapshot::new(confidence)
            .with_landmark(LandmarkName::LeftCheek, Point3D::new(250.0, 260.0, left_z))
            .with_landmark(LandmarkName::RightCheek, Point3D::new(390.0, 260.0, right_z))
    }

    #[test]
    fn test_missing_box_is_not_distance_valid() {
        let s = snapshot_with_cheeks(0.99, 0.0, 0.0);
        assert_eq!(face_distance(&s), None);
        assert!(!distance_valid(&s, &config()));
    }

    #[rstest]
    #[case::lower_bound(400.0, true)]
    #[case::upper_bound(500.0, true)]
    #[case::inside(450.0, true)]
    #[case::just_below(399.0, false)]
    #[case::just_above(501.0, false)]
    #[case::rounds_up_into_range(399.5, true)]
    #[case::rounds_up_out_of_range(500.5, false)]
    fn test_distance_boundaries(#[case] diagonal: f32, #[case] valid: bool) {
        let s = LandmarkSnapshot::new(0.95).with_box(box_with_diagonal(diagonal));
        assert_eq!(distance_valid(&s, &config()), valid);
    }

    #[test]
    fn test_distance_uses_euclidean_diagonal() {
        // 240-320-400 triangle
        let s = LandmarkSnapshot::new(0.95).with_box(FaceBox::new(
            Point2D::new(10.0, 20.0),
            Point2D::new(250.0, 340.0),
        ));
        assert_eq!(face_distance(&s), Some(400));
        assert!(distance_valid(&s, &config()));
    }

    #[rstest]
    #[case::level(1.0, 1.0, true)]
    #[case::at_tolerance(3.0, 0.0, true)]
    #[case::negative_at_tolerance(-2.0, 1.0, true)]
    #[case::over_tolerance(4.0, 0.0, false)]
    #[case::over_tolerance_rounded(3.6, 0.0, false)]
    #[case::within_after_rounding(3.4, 0.0, true)]
    fn test_angle_boundaries(#[case] left: f32, #[case] right: f32, #[case] valid: bool) {
        let s = snapshot_with_cheeks(0.95, left, right);
        assert_eq!(angle_valid(&s, &config()), valid);
    }

    #[rstest]
    #[case::opposite_extremes(3.0e9, -3.0e9, false)]
    #[case::both_huge(3.0e9, 3.0e9, true)]
    #[case::max_against_zero(f32::MAX, 0.0, false)]
    #[case::min_against_max(f32::MIN, f32::MAX, false)]
    fn test_extreme_cheek_depths_do_not_overflow(
        #[case] left: f32,
        #[case] right: f32,
        #[case] valid: bool,
    ) {
        let s = snapshot_with_cheeks(0.95, left, right);
        assert_eq!(angle_valid(&s, &config()), valid);
        assert!(cheek_difference(&s).is_some());
    }

    #[test]
    fn test_missing_cheek_is_not_angle_valid() {
        let s = LandmarkSnapshot::new(0.95)
            .with_landmark(LandmarkName::LeftCheek, Point3D::new(0.0, 0.0, 0.0));
        assert!(!angle_valid(&s, &config()));
        assert_eq!(cheek_difference(&s), None);
    }

    #[test]
    fn test_in_frame_centered_nose() {
        // Sensor x 320 mirrors to 320 in a 640-wide preview; box spans 220..420 x 140..340.
        let s = LandmarkSnapshot::new(0.95)
            .with_landmark(LandmarkName::NoseTip, Point3D::new(320.0, 240.0, -10.0));
        assert!(in_frame(&s, FRAME));
    }

    #[test]
    fn test_in_frame_rejects_off_center_noses() {
        // Sensor x 400 lands at preview x 240, inside the 220..420 box.
        let inside = LandmarkSnapshot::new(0.95)
            .with_landmark(LandmarkName::NoseTip, Point3D::new(400.0, 240.0, 0.0));
        assert!(in_frame(&inside, FRAME));

        for (x, y) in [(215.0, 240.0), (430.0, 240.0), (320.0, 100.0), (320.0, 400.0)] {
            let s = LandmarkSnapshot::new(0.95)
                .with_landmark(LandmarkName::NoseTip, Point3D::new(x, y, 0.0));
            assert!(!in_frame(&s, FRAME), "nose at ({x}, {y})");
        }
    }

    #[rstest]
    #[case::left_edge_excluded(420.0, 240.0, false)]
    #[case::right_edge_excluded(220.0, 240.0, false)]
    #[case::top_edge_excluded(320.0, 140.0, false)]
    #[case::bottom_edge_excluded(320.0, 340.0, false)]
    #[case::just_inside(419.0, 141.0, true)]
    fn test_in_frame_edges_are_strict(#[case] x: f32, #[case] y: f32, #[case] inside: bool) {
        let s = LandmarkSnapshot::new(0.95)
            .with_landmark(LandmarkName::NoseTip, Point3D::new(x, y, 0.0));
        assert_eq!(in_frame(&s, FRAME), inside);
    }

    #[rstest]
    #[case::far_left(-3.0e9, 240.0)]
    #[case::far_right(3.0e9, 240.0)]
    #[case::min_x(f32::MIN, 240.0)]
    #[case::max_y(320.0, f32::MAX)]
    fn test_extreme_nose_is_out_of_frame(#[case] x: f32, #[case] y: f32) {
        let s = LandmarkSnapshot::new(0.95)
            .with_landmark(LandmarkName::NoseTip, Point3D::new(x, y, 0.0));
        assert!(!in_frame(&s, FRAME));
    }

    #[test]
    fn test_missing_nose_is_not_in_frame() {
        assert!(!in_frame(&LandmarkSnapshot::new(0.95), FRAME));
    }

    #[rstest]
    #[case::center_low(-3, Some(PoseBucket::Center))]
    #[case::center_mid(0, Some(PoseBucket::Center))]
    #[case::center_high(3, Some(PoseBucket::Center))]
    #[case::dead_zone_pos_4(4, None)]
    #[case::dead_zone_neg_4(-4, None)]
    #[case::dead_zone_pos_5(5, None)]
    #[case::dead_zone_neg_5(-5, None)]
    #[case::oblique_left_low(6, Some(PoseBucket::ObliqueLeft))]
    #[case::oblique_left_high(19, Some(PoseBucket::ObliqueLeft))]
    #[case::left_low(20, Some(PoseBucket::Left))]
    #[case::left_high(25, Some(PoseBucket::Left))]
    #[case::beyond_left(26, None)]
    #[case::oblique_right_high(-6, Some(PoseBucket::ObliqueRight))]
    #[case::oblique_right_low(-19, Some(PoseBucket::ObliqueRight))]
    #[case::right_high(-20, Some(PoseBucket::Right))]
    #[case::right_low(-25, Some(PoseBucket::Right))]
    #[case::beyond_right(-26, None)]
    fn test_classify_depth(#[case] z: i32, #[case] expected: Option<PoseBucket>) {
        assert_eq!(classify_depth(z), expected);
    }

    #[test]
    fn test_buckets_are_mutually_exclusive() {
        for z in -40..=40 {
            let matches = PoseBucket::ALL
                .iter()
                .filter(|b| {
                    let (lo, hi) = match b {
                        PoseBucket::Center => (-3, 3),
                        PoseBucket::Left => (20, 25),
                        PoseBucket::Right => (-25, -20),
                        PoseBucket::ObliqueLeft => (6, 19),
                        PoseBucket::ObliqueRight => (-19, -6),
                    };
                    (lo..=hi).contains(&z)
                })
                .count();
            assert!(matches <= 1, "z={z} matched {matches} buckets");
            assert_eq!(classify_depth(z).is_some(), matches == 1, "z={z}");
        }
    }

    #[test]
    fn test_low_confidence_never_has_pose() {
        for z in [-22.0, -10.0, 0.0, 10.0, 22.0] {
            let s = snapshot_with_cheeks(0.5, z, z);
            assert_eq!(pose_bucket(&s, &config()), None, "z={z}");
        }
    }

    #[test]
    fn test_confidence_threshold_is_inclusive() {
        let s = snapshot_with_cheeks(0.9, 0.0, 0.0);
        assert_eq!(pose_bucket(&s, &config()), Some(PoseBucket::Center));
    }

    #[test]
    fn test_nan_confidence_has_no_pose() {
        let s = snapshot_with_cheeks(f32::NAN, 0.0, 0.0);
        assert_eq!(pose_bucket(&s, &config()), None);
    }

    #[test]
    fn test_empty_snapshot_is_all_false() {
        let result = evaluate(&LandmarkSnapshot::new(0.99), FRAME, &config());
        assert_eq!(result, PositionResult::default());
    }

    #[test]
    fn test_evaluate_full_snapshot() {
        let s = snapshot_with_cheeks(0.95, 22.2, 21.0)
            .with_box(box_with_diagonal(450.0))
            .with_landmark(LandmarkName::NoseTip, Point3D::new(320.0, 240.0, -30.0));
        let result = evaluate(&s, FRAME, &config());
        assert!(result.in_frame);
        assert!(result.distance_valid);
        assert!(result.angle_valid);
        assert_eq!(result.pose, Some(PoseBucket::Left));
    }

    #[test]
    fn test_custom_ranges() {
        let cfg = EvaluatorConfig {
            distance_range: [200.0, 300.0],
            angle_tolerance: 1,
            confidence_threshold: 0.5,
        };
        let s = snapshot_with_cheeks(0.6, 2.0, 0.0).with_box(box_with_diagonal(250.0));
        assert!(distance_valid(&s, &cfg));
        assert!(!angle_valid(&s, &cfg));
        assert_eq!(pose_bucket(&s, &cfg), Some(PoseBucket::Center));
    }
}
