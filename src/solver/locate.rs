use crate::perception::types::{Frame, Point};
use crate::vision::coerce::point_from_value;
use crate::vision::prompts::{PromptSet, LOCATE_POINT};
use crate::vision::provider::VisionClassifier;

/// Ask the classifier for the centre of `query` in the frame.
/// `None` when it reports "not found", replies off-frame, or the call fails.
pub async fn locate_point(
    classifier: &dyn VisionClassifier,
    prompts: &PromptSet,
    frame: &Frame,
    query: &str,
) -> Option<Point> {
    let instructions = prompts.render(LOCATE_POINT, &[("query", query)]);
    let reply = match classifier.classify(std::slice::from_ref(frame.image()), &instructions).await {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(query, error = %e, "point locate failed");
            return None;
        }
    };
    let point = point_from_value(&reply)?;
    if point.x as u32 >= frame.width() || point.y as u32 >= frame.height() {
        tracing::warn!(query, x = point.x, y = point.y, "located point outside frame");
        return None;
    }
    tracing::info!(query, x = point.x, y = point.y, "point located by vision");
    Some(point)
}
