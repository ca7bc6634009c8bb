use async_trait::async_trait;
use image::RgbImage;

use crate::errors::TileGridResult;

/// Loosely-typed vision classification capability.
///
/// Implementations send the images and instructions to some model and return
/// whatever JSON object it produced. Callers must treat every field as
/// optional and untyped (see `vision::coerce`).
#[async_trait]
pub trait VisionClassifier: Send + Sync {
    /// Identifier used in logs and audit records.
    fn name(&self) -> &str;

    async fn classify(
        &self,
        images: &[RgbImage],
        instructions: &str,
    ) -> TileGridResult<serde_json::Value>;
}
