use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::admission::AdmissionMode;
use crate::pose::detector::OutputScale;
use crate::pose::preprocess::{ChannelOrder, TensorLayout};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub preprocess: PreprocessConfig,
    #[serde(default)]
    pub admission: AdmissionConfig,
    #[serde(default)]
    pub angles: AngleConfig,
    #[serde(default)]
    pub smoothing: SmoothingConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub camera: CameraConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DetectorConfig {
    /// ONNXモデルのパス
    #[serde(default = "default_model_path")]
    pub model_path: String,
    /// 入力テンソル名
    #[serde(default = "default_input_name")]
    pub input_name: String,
    /// 出力テンソル名 ([1, 1, 17, 3] = y, x, score)
    #[serde(default = "default_output_name")]
    pub output_name: String,
    /// モデル入力の一辺 (正方形)
    #[serde(default = "default_target_size")]
    pub target_size: u32,
    /// これ未満の平均スコアは「姿勢なし」として扱う
    #[serde(default = "default_min_pose_score")]
    pub min_pose_score: f32,
    /// 出力座標の種類 ("normalized" / "pixels" / "auto")
    #[serde(default)]
    pub output_scale: OutputScale,
}

fn default_model_path() -> String { "models/movenet_thunder.onnx".to_string() }
fn default_input_name() -> String { "serving_default_input_0".to_string() }
fn default_output_name() -> String { "StatefulPartitionedCall_0".to_string() }
fn default_target_size() -> u32 { 256 }
fn default_min_pose_score() -> f32 { 0.1 }

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            model_path: default_model_path(),
            input_name: default_input_name(),
            output_name: default_output_name(),
            target_size: default_target_size(),
            min_pose_score: default_min_pose_score(),
            output_scale: OutputScale::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct PreprocessConfig {
    /// 検出器が期待するチャンネル順
    #[serde(default)]
    pub channel_order: ChannelOrder,
    /// テンソルレイアウト (NHWC / NCHW)
    #[serde(default)]
    pub layout: TensorLayout,
    /// true なら 0.0-1.0 に正規化、false なら 0.0-255.0 のまま
    #[serde(default)]
    pub normalize: bool,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AdmissionKind {
    /// 静止画キャプチャを一定間隔で取得
    #[default]
    Interval,
    /// ストリームの N フレームごとに採用
    Stride,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AdmissionConfig {
    #[serde(default)]
    pub mode: AdmissionKind,
    /// interval モードの周期 (ミリ秒)
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// stride モードの間引き幅
    #[serde(default = "default_stride")]
    pub stride: u32,
}

fn default_interval_ms() -> u64 { 300 }
fn default_stride() -> u32 { 2 }

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            mode: AdmissionKind::default(),
            interval_ms: default_interval_ms(),
            stride: default_stride(),
        }
    }
}

impl AdmissionConfig {
    pub fn to_mode(&self) -> AdmissionMode {
        match self.mode {
            AdmissionKind::Interval => AdmissionMode::Interval(Duration::from_millis(self.interval_ms)),
            AdmissionKind::Stride => AdmissionMode::Stride(self.stride.max(1)),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AngleConfig {
    /// 角度計算に使うキーポイントの信頼度閾値 (score > threshold)
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,
    /// オーバーレイ表示用の閾値
    #[serde(default = "default_visibility_threshold")]
    pub visibility_threshold: f32,
    /// 動作方向判定の閾値 (度)
    #[serde(default = "default_movement_threshold")]
    pub movement_threshold_deg: f32,
}

fn default_confidence_threshold() -> f32 { 0.15 }
fn default_visibility_threshold() -> f32 { 0.3 }
fn default_movement_threshold() -> f32 { 10.0 }

impl Default for AngleConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: default_confidence_threshold(),
            visibility_threshold: default_visibility_threshold(),
            movement_threshold_deg: default_movement_threshold(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SmoothingConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_min_cutoff")]
    pub min_cutoff: f32,
    #[serde(default = "default_beta")]
    pub beta: f32,
    #[serde(default = "default_d_cutoff")]
    pub d_cutoff: f32,
}

fn default_min_cutoff() -> f32 { 1.0 }
fn default_beta() -> f32 { 0.01 }
fn default_d_cutoff() -> f32 { 1.0 }

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            min_cutoff: default_min_cutoff(),
            beta: default_beta(),
            d_cutoff: default_d_cutoff(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    /// 1フレームの処理上限 (ミリ秒, 0 で無効)
    #[serde(default = "default_frame_timeout_ms")]
    pub frame_timeout_ms: u64,
    /// 連続タイムアウトがこの回数に達したら検出器を再ロード
    #[serde(default = "default_timeout_reload_after")]
    pub timeout_reload_after: u32,
    /// 表示面の解像度 (未指定ならソース解像度)
    #[serde(default)]
    pub display_width: Option<u32>,
    #[serde(default)]
    pub display_height: Option<u32>,
    /// ストリーム待機時のポーリング間隔 (ミリ秒)
    #[serde(default = "default_idle_poll_ms")]
    pub idle_poll_ms: u64,
    /// FPSログの出力間隔 (ミリ秒)
    #[serde(default = "default_stats_interval_ms")]
    pub stats_interval_ms: u64,
}

fn default_frame_timeout_ms() -> u64 { 2000 }
fn default_timeout_reload_after() -> u32 { 2 }
fn default_idle_poll_ms() -> u64 { 5 }
fn default_stats_interval_ms() -> u64 { 5000 }

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            frame_timeout_ms: default_frame_timeout_ms(),
            timeout_reload_after: default_timeout_reload_after(),
            display_width: None,
            display_height: None,
            idle_poll_ms: default_idle_poll_ms(),
            stats_interval_ms: default_stats_interval_ms(),
        }
    }
}

impl PipelineConfig {
    pub fn frame_timeout(&self) -> Option<Duration> {
        (self.frame_timeout_ms > 0).then(|| Duration::from_millis(self.frame_timeout_ms))
    }

    pub fn display_size(&self) -> Option<(u32, u32)> {
        match (self.display_width, self.display_height) {
            (Some(w), Some(h)) if w > 0 && h > 0 => Some((w, h)),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CameraConfig {
    /// カメラインデックス
    #[serde(default)]
    pub index: i32,
    #[serde(default = "default_camera_width")]
    pub width: u32,
    #[serde(default = "default_camera_height")]
    pub height: u32,
    #[serde(default = "default_camera_fps")]
    pub fps: u32,
}

fn default_camera_width() -> u32 { 640 }
fn default_camera_height() -> u32 { 480 }
fn default_camera_fps() -> u32 { 30 }

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            index: 0,
            width: default_camera_width(),
            height: default_camera_height(),
            fps: default_camera_fps(),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// ファイルが無い・壊れている場合はデフォルト設定を返す
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!("{} not found, using defaults", path.display());
            return Self::default();
        }
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("{:#}; using defaults", e);
                Self::default()
            }
        }
    }
}
