use fast_image_resize::images::Image;
use image::DynamicImage;
use fast_image_resize::{FilterType, PixelType, ResizeAlg, ResizeOptions, Resizer};
use ndarray::Array4;
use serde::Deserialize;

use crate::camera::frame::{FramePayload, FrameTask, PixelLayout};
use crate::config::PreprocessConfig;
use crate::error::FrameError;

/// 検出器が期待するチャンネル順
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelOrder {
    #[default]
    Rgb,
    Bgr,
}

/// テンソルのレイアウト
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TensorLayout {
    /// [1, T, T, 3] (MoveNet)
    #[default]
    Nhwc,
    /// [1, 3, T, T]
    Nchw,
}

/// ソース画素 / モデル画素 の比
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleFactors {
    pub x: f32,
    pub y: f32,
}

/// 1フレーム分の幾何情報。テンソルを手放した後の座標変換に使う。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameGeometry {
    pub target_size: u32,
    pub source_width: u32,
    pub source_height: u32,
}

impl FrameGeometry {
    pub fn scale(&self) -> ScaleFactors {
        ScaleFactors {
            x: self.source_width as f32 / self.target_size as f32,
            y: self.source_height as f32 / self.target_size as f32,
        }
    }
}

/// 検出器への入力
#[derive(Debug, Clone)]
pub struct ModelInput {
    pub tensor: Array4<f32>,
    pub geometry: FrameGeometry,
}

impl ModelInput {
    pub fn scale(&self) -> ScaleFactors {
        self.geometry.scale()
    }
}

/// 3チャンネル RGB8 のパック済み画素
#[derive(Debug, Clone)]
pub struct RgbFrame {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

/// フレームの入力形式ごとの変換 (RGB8 へ)
pub trait FrameAdapter {
    fn to_rgb(&self, task: FrameTask) -> Result<RgbFrame, FrameError>;
}

/// JPEG / PNG などの圧縮フレーム
#[derive(Debug, Clone, Copy, Default)]
pub struct CompressedFrameAdapter;

impl FrameAdapter for CompressedFrameAdapter {
    fn to_rgb(&self, task: FrameTask) -> Result<RgbFrame, FrameError> {
        let bytes = match task.payload {
            FramePayload::Encoded(bytes) => bytes,
            FramePayload::Raw { .. } => return Err(FrameError::decode("expected compressed frame")),
        };
        if bytes.is_empty() {
            return Err(FrameError::decode("empty compressed frame"));
        }

        let decoded = image::load_from_memory(&bytes)?;
        drop(bytes);

        // 申告サイズよりデコード後の実寸を優先
        let (width, height) = (decoded.width(), decoded.height());
        if width == 0 || height == 0 {
            return Err(FrameError::resize(format!("zero-size image {}x{}", width, height)));
        }
        // RGB 以外は RGBA に寄せてからアルファを詰める (フル解像度バッファは常に 1 枚)
        let pixels = match decoded {
            DynamicImage::ImageRgb8(buffer) => buffer.into_raw(),
            other => {
                let mut pixels = other.into_rgba8().into_raw();
                strip_alpha_in_place(&mut pixels);
                pixels
            }
        };
        Ok(RgbFrame { width, height, pixels })
    }
}

/// カメラストリームからの生ピクセル (RGB / RGBA)
#[derive(Debug, Clone, Copy, Default)]
pub struct RawPixelFrameAdapter;

impl FrameAdapter for RawPixelFrameAdapter {
    fn to_rgb(&self, task: FrameTask) -> Result<RgbFrame, FrameError> {
        let (layout, mut pixels) = match task.payload {
            FramePayload::Raw { layout, pixels } => (layout, pixels),
            FramePayload::Encoded(_) => return Err(FrameError::decode("expected raw frame")),
        };
        let (width, height) = (task.width, task.height);
        if width == 0 || height == 0 {
            return Err(FrameError::resize(format!("zero-size frame {}x{}", width, height)));
        }

        let expected = width as usize * height as usize * layout.bytes_per_pixel();
        if pixels.len() != expected {
            return Err(FrameError::decode(format!(
                "buffer holds {} bytes, {}x{} {:?} needs {}",
                pixels.len(),
                width,
                height,
                layout,
                expected
            )));
        }

        if layout == PixelLayout::Rgba {
            strip_alpha_in_place(&mut pixels);
        }
        Ok(RgbFrame { width, height, pixels })
    }
}

/// RGBA → RGB (同じバッファ内で詰める)
fn strip_alpha_in_place(pixels: &mut Vec<u8>) {
    let count = pixels.len() / 4;
    for i in 0..count {
        pixels.copy_within(i * 4..i * 4 + 3, i * 3);
    }
    pixels.truncate(count * 3);
}

/// フレームをモデル入力テンソルに変換する
///
/// - 圧縮フレームはデコード、RGBA はアルファを除去
/// - T×T にバイリニアリサイズ (クロップなし、縦横比は保持しない)
/// - チャンネル順・レイアウト・値域は設定に従う
pub struct Preprocessor {
    target_size: u32,
    channel_order: ChannelOrder,
    layout: TensorLayout,
    normalize: bool,
    resizer: Resizer,
}

impl Preprocessor {
    pub fn new(target_size: u32, config: &PreprocessConfig) -> Self {
        Self {
            target_size: target_size.max(1),
            channel_order: config.channel_order,
            layout: config.layout,
            normalize: config.normalize,
            resizer: Resizer::new(),
        }
    }

    pub fn target_size(&self) -> u32 {
        self.target_size
    }

    /// 既定のアダプタ (圧縮なら [`CompressedFrameAdapter`]、生ピクセルなら
    /// [`RawPixelFrameAdapter`]) で変換する
    pub fn prepare(&mut self, task: FrameTask) -> Result<ModelInput, FrameError> {
        if task.is_encoded() {
            self.prepare_with(&CompressedFrameAdapter, task)
        } else {
            self.prepare_with(&RawPixelFrameAdapter, task)
        }
    }

    /// 呼び出し側が選んだアダプタで変換する
    pub fn prepare_with(&mut self, adapter: &dyn FrameAdapter, task: FrameTask) -> Result<ModelInput, FrameError> {
        let frame = adapter.to_rgb(task)?;
        self.prepare_rgb(frame)
    }

    pub fn prepare_rgb(&mut self, frame: RgbFrame) -> Result<ModelInput, FrameError> {
        let geometry = FrameGeometry {
            target_size: self.target_size,
            source_width: frame.width,
            source_height: frame.height,
        };
        let resized = self.resize(frame)?;
        let tensor = self.build_tensor(resized)?;
        Ok(ModelInput { tensor, geometry })
    }

    fn resize(&mut self, frame: RgbFrame) -> Result<Vec<u8>, FrameError> {
        let t = self.target_size;
        let src = Image::from_vec_u8(frame.width, frame.height, frame.pixels, PixelType::U8x3)
            .map_err(|e| FrameError::resize(e.to_string()))?;
        let mut dst = Image::new(t, t, PixelType::U8x3);

        let options = ResizeOptions::new().resize_alg(ResizeAlg::Convolution(FilterType::Bilinear));
        self.resizer
            .resize(&src, &mut dst, Some(&options))
            .map_err(|e| FrameError::resize(e.to_string()))?;
        // ソース解像度のバッファはここで解放
        drop(src);

        let mut resized = dst.into_vec();
        if self.channel_order == ChannelOrder::Bgr {
            for px in resized.chunks_exact_mut(3) {
                px.swap(0, 2);
            }
        }
        Ok(resized)
    }

    fn build_tensor(&self, resized: Vec<u8>) -> Result<Array4<f32>, FrameError> {
        let t = self.target_size as usize;
        let k = if self.normalize { 1.0 / 255.0 } else { 1.0 };

        match self.layout {
            TensorLayout::Nhwc => {
                let values: Vec<f32> = resized.iter().map(|&v| v as f32 * k).collect();
                drop(resized);
                Array4::from_shape_vec((1, t, t, 3), values).map_err(|e| FrameError::resize(e.to_string()))
            }
            TensorLayout::Nchw => Ok(Array4::from_shape_fn((1, 3, t, t), |(_, c, y, x)| {
                resized[(y * t + x) * 3 + c] as f32 * k
            })),
        }
    }
}
