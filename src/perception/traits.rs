use async_trait::async_trait;

use crate::errors::TileGridResult;
use crate::perception::types::Frame;

/// Source of full-screen frames. Capturing has no side effects.
#[async_trait]
pub trait ScreenCapture: Send + Sync {
    async fn capture(&self) -> TileGridResult<Frame>;
}
