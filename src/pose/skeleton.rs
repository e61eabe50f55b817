use super::keypoint::{Keypoint, KeypointIndex, Pose};

/// 骨格の接続定義 (開始キーポイント, 終了キーポイント)
pub const SKELETON_CONNECTIONS: [(KeypointIndex, KeypointIndex); 16] = [
    // 上半身
    (KeypointIndex::LeftShoulder, KeypointIndex::RightShoulder),
    (KeypointIndex::LeftShoulder, KeypointIndex::LeftElbow),
    (KeypointIndex::LeftElbow, KeypointIndex::LeftWrist),
    (KeypointIndex::RightShoulder, KeypointIndex::RightElbow),
    (KeypointIndex::RightElbow, KeypointIndex::RightWrist),
    // 胴体
    (KeypointIndex::LeftShoulder, KeypointIndex::LeftHip),
    (KeypointIndex::RightShoulder, KeypointIndex::RightHip),
    (KeypointIndex::LeftHip, KeypointIndex::RightHip),
    // 下半身
    (KeypointIndex::LeftHip, KeypointIndex::LeftKnee),
    (KeypointIndex::LeftKnee, KeypointIndex::LeftAnkle),
    (KeypointIndex::RightHip, KeypointIndex::RightKnee),
    (KeypointIndex::RightKnee, KeypointIndex::RightAnkle),
    // 頭 (肩から耳、耳から鼻。目は結ばない)
    (KeypointIndex::LeftShoulder, KeypointIndex::LeftEar),
    (KeypointIndex::RightShoulder, KeypointIndex::RightEar),
    (KeypointIndex::LeftEar, KeypointIndex::Nose),
    (KeypointIndex::RightEar, KeypointIndex::Nose),
];

/// 表示してよいキーポイント (score > threshold)
pub fn visible_keypoints(pose: &Pose, threshold: f32) -> Vec<Keypoint> {
    pose.confident(threshold).copied().collect()
}

/// 両端とも表示閾値を超える骨格線
pub fn visible_segments(pose: &Pose, threshold: f32) -> Vec<(Keypoint, Keypoint)> {
    SKELETON_CONNECTIONS
        .iter()
        .map(|&(a, b)| (*pose.get(a), *pose.get(b)))
        .filter(|(a, b)| a.is_confident(threshold) && b.is_confident(threshold))
        .collect()
}
