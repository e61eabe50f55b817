use std::time::Instant;

/// 生ピクセルの並び
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelLayout {
    Rgb,
    Rgba,
}

impl PixelLayout {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Rgb => 3,
            Self::Rgba => 4,
        }
    }
}

/// フレームの中身: 生ピクセルか、圧縮済み (JPEG/PNG) バイト列
#[derive(Debug, Clone)]
pub enum FramePayload {
    Raw { layout: PixelLayout, pixels: Vec<u8> },
    Encoded(Vec<u8>),
}

/// パイプラインに投入される 1 フレーム分の作業単位
///
/// 圧縮フレームの `width`/`height` はキャプチャ側の申告値で、デコード後の実寸が優先される。
#[derive(Debug, Clone)]
pub struct FrameTask {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub payload: FramePayload,
    pub captured_at: Instant,
}

impl FrameTask {
    pub fn raw(sequence: u64, width: u32, height: u32, layout: PixelLayout, pixels: Vec<u8>) -> Self {
        Self {
            sequence,
            width,
            height,
            payload: FramePayload::Raw { layout, pixels },
            captured_at: Instant::now(),
        }
    }

    pub fn encoded(sequence: u64, width: u32, height: u32, bytes: Vec<u8>) -> Self {
        Self {
            sequence,
            width,
            height,
            payload: FramePayload::Encoded(bytes),
            captured_at: Instant::now(),
        }
    }

    pub fn is_encoded(&self) -> bool {
        matches!(self.payload, FramePayload::Encoded(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_per_pixel() {
        assert_eq!(PixelLayout::Rgb.bytes_per_pixel(), 3);
        assert_eq!(PixelLayout::Rgba.bytes_per_pixel(), 4);
    }

    #[test]
    fn test_constructors() {
        let raw = FrameTask::raw(3, 2, 1, PixelLayout::Rgb, vec![0; 6]);
        assert_eq!(raw.sequence, 3);
        assert!(!raw.is_encoded());

        let jpeg = FrameTask::encoded(4, 640, 480, vec![0xFF, 0xD8]);
        assert!(jpeg.is_encoded());
        assert_eq!((jpeg.width, jpeg.height), (640, 480));
    }
}
