//! In-memory collaborators for solver tests.
use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use image::RgbImage;
use serde_json::Value;

use crate::errors::{TileGridError, TileGridResult};
use crate::executor::input::PointerActuator;
use crate::perception::traits::ScreenCapture;
use crate::perception::types::{Frame, Point};
use crate::vision::provider::VisionClassifier;

/// Replays scripted replies in order; the last one repeats once the script runs out.
pub(crate) struct ScriptedClassifier {
    script: Mutex<VecDeque<Result<Value, String>>>,
    last: Mutex<Option<Result<Value, String>>>,
    images: Mutex<Vec<usize>>,
    instructions: Mutex<Vec<String>>,
}

impl ScriptedClassifier {
    pub(crate) fn new(script: Vec<Result<Value, String>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            last: Mutex::new(None),
            images: Mutex::new(Vec::new()),
            instructions: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.images.lock().unwrap().len()
    }

    pub(crate) fn image_counts(&self) -> Vec<usize> {
        self.images.lock().unwrap().clone()
    }

    pub(crate) fn instructions(&self) -> Vec<String> {
        self.instructions.lock().unwrap().clone()
    }
}

#[async_trait]
impl VisionClassifier for ScriptedClassifier {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn classify(&self, images: &[RgbImage], instructions: &str) -> TileGridResult<Value> {
        self.images.lock().unwrap().push(images.len());
        self.instructions.lock().unwrap().push(instructions.to_string());
        let next = self.script.lock().unwrap().pop_front();
        let reply = match next {
            Some(r) => {
                *self.last.lock().unwrap() = Some(r.clone());
                r
            }
            None => self.last.lock().unwrap().clone().unwrap_or(Ok(Value::Null)),
        };
        reply.map_err(TileGridError::ClassifierFormat)
    }
}

/// Serves frames in order, repeating the last one.
pub(crate) struct FrameSequence {
    frames: Mutex<VecDeque<Frame>>,
    last: Mutex<Option<Frame>>,
}

impl FrameSequence {
    pub(crate) fn new(frames: Vec<RgbImage>) -> Self {
        Self {
            frames: Mutex::new(frames.into_iter().map(Frame::new).collect()),
            last: Mutex::new(None),
        }
    }
}

#[async_trait]
impl ScreenCapture for FrameSequence {
    async fn capture(&self) -> TileGridResult<Frame> {
        let next = self.frames.lock().unwrap().pop_front();
        if let Some(frame) = next {
            *self.last.lock().unwrap() = Some(frame.clone());
            return Ok(frame);
        }
        self.last
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| TileGridError::Perception("no frames scripted".into()))
    }
}

/// Records every click; points listed in `fail_at` report an executor error.
#[derive(Default)]
pub(crate) struct RecordingActuator {
    pub(crate) clicks: Mutex<Vec<Point>>,
    pub(crate) fail_at: Vec<Point>,
}

impl RecordingActuator {
    pub(crate) fn clicks(&self) -> Vec<Point> {
        self.clicks.lock().unwrap().clone()
    }
}

#[async_trait]
impl PointerActuator for RecordingActuator {
    async fn click_at(&self, point: Point) -> TileGridResult<()> {
        self.clicks.lock().unwrap().push(point);
        if self.fail_at.contains(&point) {
            return Err(TileGridError::Executor("scripted failure".into()));
        }
        Ok(())
    }
}
