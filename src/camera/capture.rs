use anyhow::{Context, Result};
use opencv::{
    core::{AlgorithmHint, Mat},
    imgproc,
    prelude::*,
    videoio::{self, VideoCapture, VideoCaptureAPIs},
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

use super::frame::PixelLayout;
use super::source::StreamFeeder;
use crate::config::CameraConfig;

/// OpenCVを使用したカメラキャプチャ
pub struct OpenCvCamera {
    capture: VideoCapture,
    width: u32,
    height: u32,
}

impl OpenCvCamera {
    /// 解像度とFPSを指定してカメラを開く
    pub fn open(config: &CameraConfig) -> Result<Self> {
        let mut capture = VideoCapture::new(config.index, VideoCaptureAPIs::CAP_ANY as i32)
            .context("Failed to open camera")?;

        if !capture.is_opened()? {
            anyhow::bail!("Camera {} is not available", config.index);
        }

        capture.set(videoio::CAP_PROP_FRAME_WIDTH, config.width as f64)?;
        capture.set(videoio::CAP_PROP_FRAME_HEIGHT, config.height as f64)?;
        capture.set(videoio::CAP_PROP_FPS, config.fps as f64)?;
        // 古いフレームを溜めない
        capture.set(videoio::CAP_PROP_BUFFERSIZE, 1.0)?;

        let width = capture.get(videoio::CAP_PROP_FRAME_WIDTH)? as u32;
        let height = capture.get(videoio::CAP_PROP_FRAME_HEIGHT)? as u32;
        let fps = capture.get(videoio::CAP_PROP_FPS)?;
        info!(index = config.index, width, height, fps, "camera opened");

        Ok(Self { capture, width, height })
    }

    /// 解像度を取得
    pub fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// 1フレーム読み込み、RGB のパック済みバイト列で返す
    pub fn read_rgb(&mut self) -> Result<(u32, u32, Vec<u8>)> {
        let mut frame = Mat::default();
        self.capture.read(&mut frame).context("Failed to read frame")?;
        if frame.empty() {
            anyhow::bail!("Empty frame received");
        }

        let mut rgb = Mat::default();
        imgproc::cvt_color(&frame, &mut rgb, imgproc::COLOR_BGR2RGB, 0, AlgorithmHint::ALGO_HINT_DEFAULT)?;
        let width = rgb.cols() as u32;
        let height = rgb.rows() as u32;
        Ok((width, height, rgb.data_bytes()?.to_vec()))
    }

    /// 別スレッドでキャプチャし続け、到着したフレームを feeder に渡す
    ///
    /// 採用判定は feeder 側で行われるので、このスレッドは推論を待たない。
    pub fn spawn_stream(
        mut self,
        feeder: StreamFeeder,
        shutdown: Arc<AtomicBool>,
    ) -> std::io::Result<thread::JoinHandle<()>> {
        thread::Builder::new().name("camera".to_string()).spawn(move || {
            let mut failures = 0u32;
            while !shutdown.load(Ordering::Relaxed) {
                match self.read_rgb() {
                    Ok((width, height, pixels)) => {
                        failures = 0;
                        feeder.push_raw(pixels, width, height, PixelLayout::Rgb);
                    }
                    Err(e) => {
                        failures += 1;
                        if failures == 1 || failures % 100 == 0 {
                            warn!(failures, "camera read failed: {:#}", e);
                        }
                        thread::sleep(Duration::from_millis(10));
                    }
                }
            }
            info!("camera thread stopped");
        })
    }
}
