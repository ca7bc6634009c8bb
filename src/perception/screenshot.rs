use async_trait::async_trait;

use crate::errors::{TileGridError, TileGridResult};
use crate::perception::traits::ScreenCapture;
use crate::perception::types::Frame;

/// Captures the primary monitor through `xcap`.
#[derive(Debug, Default, Clone, Copy)]
pub struct PrimaryMonitorCapture;

impl PrimaryMonitorCapture {
    fn capture_blocking() -> TileGridResult<Frame> {
        let monitors = xcap::Monitor::all()
            .map_err(|e| TileGridError::Perception(format!("list monitors: {e}")))?;
        let monitor = monitors
            .iter()
            .find(|m| m.is_primary())
            .or_else(|| monitors.first())
            .ok_or_else(|| TileGridError::Perception("no monitor available".into()))?;

        let shot = monitor
            .capture_image()
            .map_err(|e| TileGridError::Perception(format!("capture: {e}")))?;
        let (w, h) = (shot.width(), shot.height());
        let rgba = image::RgbaImage::from_raw(w, h, shot.into_raw())
            .ok_or_else(|| TileGridError::Perception("capture buffer size mismatch".into()))?;
        let rgb = image::DynamicImage::ImageRgba8(rgba).to_rgb8();

        tracing::debug!(width = w, height = h, "primary monitor captured");
        Ok(Frame::new(rgb))
    }
}

#[async_trait]
impl ScreenCapture for PrimaryMonitorCapture {
    async fn capture(&self) -> TileGridResult<Frame> {
        tokio::task::spawn_blocking(Self::capture_blocking)
            .await
            .map_err(|e| TileGridError::Perception(format!("join: {e}")))?
    }
}
