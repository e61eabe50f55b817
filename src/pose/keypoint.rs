use std::fmt;

/// MoveNet の 17 キーポイントインデックス (検出器の出力順)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum KeypointIndex {
    Nose = 0,
    LeftEye = 1,
    RightEye = 2,
    LeftEar = 3,
    RightEar = 4,
    LeftShoulder = 5,
    RightShoulder = 6,
    LeftElbow = 7,
    RightElbow = 8,
    LeftWrist = 9,
    RightWrist = 10,
    LeftHip = 11,
    RightHip = 12,
    LeftKnee = 13,
    RightKnee = 14,
    LeftAnkle = 15,
    RightAnkle = 16,
}

impl KeypointIndex {
    pub const COUNT: usize = 17;

    /// 正準順の全キーポイント
    pub const ALL: [KeypointIndex; KeypointIndex::COUNT] = [
        Self::Nose,
        Self::LeftEye,
        Self::RightEye,
        Self::LeftEar,
        Self::RightEar,
        Self::LeftShoulder,
        Self::RightShoulder,
        Self::LeftElbow,
        Self::RightElbow,
        Self::LeftWrist,
        Self::RightWrist,
        Self::LeftHip,
        Self::RightHip,
        Self::LeftKnee,
        Self::RightKnee,
        Self::LeftAnkle,
        Self::RightAnkle,
    ];

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// snake_case のラベル ("left_shoulder" など)
    pub fn name(self) -> &'static str {
        match self {
            Self::Nose => "nose",
            Self::LeftEye => "left_eye",
            Self::RightEye => "right_eye",
            Self::LeftEar => "left_ear",
            Self::RightEar => "right_ear",
            Self::LeftShoulder => "left_shoulder",
            Self::RightShoulder => "right_shoulder",
            Self::LeftElbow => "left_elbow",
            Self::RightElbow => "right_elbow",
            Self::LeftWrist => "left_wrist",
            Self::RightWrist => "right_wrist",
            Self::LeftHip => "left_hip",
            Self::RightHip => "right_hip",
            Self::LeftKnee => "left_knee",
            Self::RightKnee => "right_knee",
            Self::LeftAnkle => "left_ankle",
            Self::RightAnkle => "right_ankle",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.name() == name)
    }
}

impl fmt::Display for KeypointIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 左右
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub const BOTH: [Side; 2] = [Side::Left, Side::Right];

    pub fn shoulder(self) -> KeypointIndex {
        match self {
            Self::Left => KeypointIndex::LeftShoulder,
            Self::Right => KeypointIndex::RightShoulder,
        }
    }

    pub fn elbow(self) -> KeypointIndex {
        match self {
            Self::Left => KeypointIndex::LeftElbow,
            Self::Right => KeypointIndex::RightElbow,
        }
    }

    pub fn wrist(self) -> KeypointIndex {
        match self {
            Self::Left => KeypointIndex::LeftWrist,
            Self::Right => KeypointIndex::RightWrist,
        }
    }

    pub fn hip(self) -> KeypointIndex {
        match self {
            Self::Left => KeypointIndex::LeftHip,
            Self::Right => KeypointIndex::RightHip,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Left => "left",
            Self::Right => "right",
        }
    }
}

/// 座標系
///
/// キーポイントの座標がどの空間にあるかは常に `Pose` 側で保持する。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CoordinateSpace {
    /// 検出器の正規化出力 (0.0〜1.0)
    Normalized,
    /// モデル入力テンソルのピクセル (0〜target_size)
    Model,
    /// 撮影フレームのピクセル
    Source,
    /// 表示面のピクセル
    Display,
}

/// 単一キーポイント
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keypoint {
    pub name: KeypointIndex,
    pub x: f32,
    pub y: f32,
    /// 信頼度スコア (常に 0.0〜1.0)
    pub score: f32,
}

impl Keypoint {
    /// スコアは [0, 1] にクランプされる (NaN は 0)
    pub fn new(name: KeypointIndex, x: f32, y: f32, score: f32) -> Self {
        let score = if score.is_nan() { 0.0 } else { score.clamp(0.0, 1.0) };
        Self { name, x, y, score }
    }

    /// 未検出 (原点・スコア 0)
    pub fn missing(name: KeypointIndex) -> Self {
        Self { name, x: 0.0, y: 0.0, score: 0.0 }
    }

    /// 信頼度が閾値を超えているか (score > threshold)
    pub fn is_confident(&self, threshold: f32) -> bool {
        self.score > threshold
    }

    pub fn with_position(&self, x: f32, y: f32) -> Self {
        Self { x, y, ..*self }
    }
}

/// 17キーポイントからなる姿勢 (不変スナップショット)
#[derive(Debug, Clone, PartialEq)]
pub struct Pose {
    keypoints: [Keypoint; KeypointIndex::COUNT],
    space: CoordinateSpace,
    overall_score: f32,
}

impl Pose {
    /// `keypoints[i].name` は正準順に揃えられる
    pub fn new(keypoints: [Keypoint; KeypointIndex::COUNT], space: CoordinateSpace) -> Self {
        let keypoints: [Keypoint; KeypointIndex::COUNT] = std::array::from_fn(|i| Keypoint {
            name: KeypointIndex::ALL[i],
            ..keypoints[i]
        });
        let sum: f32 = keypoints.iter().map(|k| k.score).sum();
        Self {
            keypoints,
            space,
            overall_score: sum / KeypointIndex::COUNT as f32,
        }
    }

    /// 名前付きのキーポイント列から構築 (欠けたものは未検出扱い)
    pub fn from_keypoints<I>(keypoints: I, space: CoordinateSpace) -> Self
    where
        I: IntoIterator<Item = Keypoint>,
    {
        let mut slots: [Keypoint; KeypointIndex::COUNT] =
            std::array::from_fn(|i| Keypoint::missing(KeypointIndex::ALL[i]));
        for kp in keypoints {
            slots[kp.name as usize] = kp;
        }
        Self::new(slots, space)
    }

    /// インデックスでキーポイントを取得
    pub fn get(&self, index: KeypointIndex) -> &Keypoint {
        &self.keypoints[index as usize]
    }

    pub fn keypoints(&self) -> &[Keypoint; KeypointIndex::COUNT] {
        &self.keypoints
    }

    pub fn space(&self) -> CoordinateSpace {
        self.space
    }

    /// 全キーポイントの平均信頼度
    pub fn overall_score(&self) -> f32 {
        self.overall_score
    }

    /// 各キーポイントの座標を変換した新しい Pose を返す
    pub fn map_positions<F>(&self, space: CoordinateSpace, mut f: F) -> Pose
    where
        F: FnMut(&Keypoint) -> (f32, f32),
    {
        let keypoints = self.keypoints.map(|kp| {
            let (x, y) = f(&kp);
            kp.with_position(x, y)
        });
        Pose { keypoints, space, overall_score: self.overall_score }
    }

    /// 閾値を超えるキーポイントのみ
    pub fn confident(&self, threshold: f32) -> impl Iterator<Item = &Keypoint> {
        self.keypoints.iter().filter(move |k| k.is_confident(threshold))
    }
}
