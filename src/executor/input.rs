use async_trait::async_trait;
use enigo::{Button, Coordinate, Direction, Enigo, Mouse, Settings};

use crate::errors::{TileGridError, TileGridResult};
use crate::perception::types::Point;

/// Fire-and-forget pointer actuation in absolute screen coordinates.
#[async_trait]
pub trait PointerActuator: Send + Sync {
    async fn click_at(&self, point: Point) -> TileGridResult<()>;
}

/// Physical mouse via enigo. A fresh connection is opened per click on a
/// blocking thread, since enigo handles are not `Send` on every platform.
#[derive(Debug, Default)]
pub struct EnigoActuator;

fn left_click(point: Point) -> TileGridResult<()> {
    let mut enigo = Enigo::new(&Settings::default())
        .map_err(|e| TileGridError::Executor(format!("input connection failed: {e}")))?;
    enigo
        .move_mouse(point.x, point.y, Coordinate::Abs)
        .map_err(|e| TileGridError::Executor(format!("move to ({}, {}) failed: {e}", point.x, point.y)))?;
    enigo
        .button(Button::Left, Direction::Click)
        .map_err(|e| TileGridError::Executor(format!("click failed: {e}")))?;
    Ok(())
}

#[async_trait]
impl PointerActuator for EnigoActuator {
    async fn click_at(&self, point: Point) -> TileGridResult<()> {
        tokio::task::spawn_blocking(move || left_click(point))
            .await
            .map_err(|e| TileGridError::Executor(format!("click task panicked: {e}")))??;
        tracing::debug!(x = point.x, y = point.y, "mouse click");
        Ok(())
    }
}
