use ndarray::Array4;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;
use serde::Deserialize;
use std::path::PathBuf;

use super::keypoint::KeypointIndex;
use crate::config::DetectorConfig;
use crate::error::DetectorError;

/// 検出器が返す座標の種類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputScale {
    /// 0.0〜1.0 (MoveNet)
    #[default]
    Normalized,
    /// モデル入力テンソルのピクセル
    Pixels,
    /// 姿勢ごとに値域から判定
    Auto,
}

/// 検出器の生出力 (座標系の解決前)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawKeypoint {
    pub index: KeypointIndex,
    pub x: f32,
    pub y: f32,
    pub score: f32,
}

/// 1枚の入力テンソルから 17 キーポイントを推定するバックエンド
pub trait PoseEstimator: Send {
    /// 入力: [1, T, T, 3] (または NCHW) の f32 テンソル。推論後に解放される。
    fn estimate(&mut self, input: Array4<f32>) -> Result<Vec<RawKeypoint>, DetectorError>;

    fn output_scale(&self) -> OutputScale {
        OutputScale::Normalized
    }
}

/// 推定器の生成 (モデル読み込み) を担う
pub trait EstimatorLoader: Send + Sync {
    fn load(&self) -> Result<Box<dyn PoseEstimator>, DetectorError>;
}

impl<F> EstimatorLoader for F
where
    F: Fn() -> Result<Box<dyn PoseEstimator>, DetectorError> + Send + Sync,
{
    fn load(&self) -> Result<Box<dyn PoseEstimator>, DetectorError> {
        self()
    }
}

/// ONNX Runtime で MoveNet を動かす推定器
pub struct OnnxPoseEstimator {
    session: Session,
    input_name: String,
    output_name: String,
    output_scale: OutputScale,
}

impl OnnxPoseEstimator {
    /// ONNXモデルを読み込んで初期化
    pub fn new(config: &DetectorConfig) -> Result<Self, DetectorError> {
        let session = build_session(&PathBuf::from(&config.model_path))?;
        Ok(Self {
            session,
            input_name: config.input_name.clone(),
            output_name: config.output_name.clone(),
            output_scale: config.output_scale,
        })
    }
}

fn init_error(path: &std::path::Path, e: impl std::fmt::Display) -> DetectorError {
    DetectorError::Initialization(format!("{}: {}", path.display(), e))
}

fn inference_error(e: impl std::fmt::Display) -> DetectorError {
    DetectorError::Inference(e.to_string())
}

fn build_session(path: &std::path::Path) -> Result<Session, DetectorError> {
    #[allow(unused_mut)]
    let mut builder = Session::builder()
        .map_err(|e| init_error(path, e))?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(|e| init_error(path, e))?;

    #[cfg(feature = "cuda")]
    {
        use ort::execution_providers::CUDAExecutionProvider;
        builder = builder
            .with_execution_providers([CUDAExecutionProvider::default().build()])
            .map_err(|e| init_error(path, e))?;
    }

    builder.commit_from_file(path).map_err(|e| init_error(path, e))
}

impl PoseEstimator for OnnxPoseEstimator {
    fn estimate(&mut self, input: Array4<f32>) -> Result<Vec<RawKeypoint>, DetectorError> {
        let input_tensor = Tensor::from_array(input).map_err(inference_error)?;
        let outputs = self
            .session
            .run(ort::inputs![self.input_name.clone() => input_tensor])
            .map_err(inference_error)?;

        // MoveNet の出力は [1, 1, 17, 3] (y, x, confidence)
        let output: ndarray::ArrayViewD<f32> = outputs[self.output_name.as_str()]
            .try_extract_array()
            .map_err(inference_error)?;
        let values: Vec<f32> = output.iter().copied().collect();
        decode_movenet(&values)
    }

    fn output_scale(&self) -> OutputScale {
        self.output_scale
    }
}

/// (y, x, score) × 17 の平坦な配列をキーポイントに変換
pub fn decode_movenet(values: &[f32]) -> Result<Vec<RawKeypoint>, DetectorError> {
    if values.len() < KeypointIndex::COUNT * 3 {
        return Err(DetectorError::Inference(format!(
            "expected {} output values, got {}",
            KeypointIndex::COUNT * 3,
            values.len()
        )));
    }

    Ok(KeypointIndex::ALL
        .iter()
        .zip(values.chunks_exact(3))
        .map(|(&index, v)| RawKeypoint { index, x: v[1], y: v[0], score: v[2] })
        .collect())
}

/// 設定からONNX推定器を生成するローダー
#[derive(Debug, Clone)]
pub struct OnnxLoader {
    config: DetectorConfig,
}

impl OnnxLoader {
    pub fn new(config: DetectorConfig) -> Self {
        Self { config }
    }
}

impl EstimatorLoader for OnnxLoader {
    fn load(&self) -> Result<Box<dyn PoseEstimator>, DetectorError> {
        tracing::info!(model = %self.config.model_path, "loading pose model");
        Ok(Box::new(OnnxPoseEstimator::new(&self.config)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_movenet_swaps_yx() {
        let mut values = vec![0.0; 51];
        // left_shoulder: y=0.4, x=0.6, score=0.9
        values[15] = 0.4;
        values[16] = 0.6;
        values[17] = 0.9;
        let keypoints = decode_movenet(&values).unwrap();
        assert_eq!(keypoints.len(), 17);
        let ls = keypoints[KeypointIndex::LeftShoulder as usize];
        assert_eq!(ls.index, KeypointIndex::LeftShoulder);
        assert_eq!(ls.x, 0.6);
        assert_eq!(ls.y, 0.4);
        assert_eq!(ls.score, 0.9);
    }

    #[test]
    fn test_decode_movenet_short_output() {
        let err = decode_movenet(&[0.0; 10]).unwrap_err();
        assert!(matches!(err, DetectorError::Inference(_)));
    }

    #[test]
    fn test_missing_model_is_initialization_error() {
        let config = DetectorConfig {
            model_path: "does/not/exist.onnx".to_string(),
            ..DetectorConfig::default()
        };
        let result = OnnxLoader::new(config).load();
        assert!(matches!(result, Err(DetectorError::Initialization(_))));
    }
}
