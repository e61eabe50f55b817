use super::detector::{OutputScale, RawKeypoint};
use super::keypoint::{CoordinateSpace, Pose};
use super::preprocess::{FrameGeometry, ScaleFactors};

/// 座標系間の変換 (状態なし)
///
/// 各座標系を「正規化単位あたりのピクセル数」で表し、任意の2空間の変換を
/// 軸ごとの比1つで行う。モデル→表示も中間点を経由せずに直接計算される。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoordinateMapper {
    target_size: u32,
    source: (u32, u32),
    display: (u32, u32),
}

impl CoordinateMapper {
    /// 表示サイズ未指定ならソース解像度をそのまま使う
    pub fn new(geometry: FrameGeometry, display: Option<(u32, u32)>) -> Self {
        let source = (geometry.source_width, geometry.source_height);
        Self {
            target_size: geometry.target_size,
            source,
            display: display.unwrap_or(source),
        }
    }

    fn units(&self, space: CoordinateSpace) -> (f32, f32) {
        match space {
            CoordinateSpace::Normalized => (1.0, 1.0),
            CoordinateSpace::Model => (self.target_size as f32, self.target_size as f32),
            CoordinateSpace::Source => (self.source.0 as f32, self.source.1 as f32),
            CoordinateSpace::Display => (self.display.0 as f32, self.display.1 as f32),
        }
    }

    /// `from` から `to` への軸ごとの倍率
    pub fn ratio(&self, from: CoordinateSpace, to: CoordinateSpace) -> ScaleFactors {
        let (fx, fy) = self.units(from);
        let (tx, ty) = self.units(to);
        ScaleFactors {
            x: if fx > 0.0 { tx / fx } else { 0.0 },
            y: if fy > 0.0 { ty / fy } else { 0.0 },
        }
    }

    pub fn map_point(&self, x: f32, y: f32, from: CoordinateSpace, to: CoordinateSpace) -> (f32, f32) {
        if from == to {
            return (x, y);
        }
        let r = self.ratio(from, to);
        (x * r.x, y * r.y)
    }

    /// 新しい Pose を返す (元の Pose は変更しない)
    pub fn map_pose(&self, pose: &Pose, to: CoordinateSpace) -> Pose {
        if pose.space() == to {
            return pose.clone();
        }
        let r = self.ratio(pose.space(), to);
        pose.map_positions(to, |kp| (kp.x * r.x, kp.y * r.y))
    }

    /// ソース → 表示 の倍率
    pub fn display_scale(&self) -> ScaleFactors {
        self.ratio(CoordinateSpace::Source, CoordinateSpace::Display)
    }
}

/// 値域から座標系を推定する。
///
/// 全キーポイントが x <= 1.0 かつ y <= 1.0 なら正規化出力とみなす (1.0 ちょうども含む)。
/// 判定は姿勢単位で行い、1つの姿勢が2つの座標系に分かれることはない。
pub fn infer_space(keypoints: &[RawKeypoint]) -> CoordinateSpace {
    if keypoints.iter().all(|k| k.x <= 1.0 && k.y <= 1.0) {
        CoordinateSpace::Normalized
    } else {
        CoordinateSpace::Model
    }
}

/// 検出器が申告した出力スケールを優先し、Auto のときだけ推定する
pub fn resolve_space(scale: OutputScale, keypoints: &[RawKeypoint]) -> CoordinateSpace {
    match scale {
        OutputScale::Normalized => CoordinateSpace::Normalized,
        OutputScale::Pixels => CoordinateSpace::Model,
        OutputScale::Auto => infer_space(keypoints),
    }
}
