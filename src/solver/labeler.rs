use crate::perception::grid::Tile;
use crate::taxonomy::{normalize_label, Taxonomy};
use crate::vision::coerce::TileLabel;
use crate::vision::prompts::{PromptSet, GRID_TILE_LABEL};
use crate::vision::provider::VisionClassifier;

/// Label every tile in place, one classifier call per tile.
/// A failed call leaves that tile unlabeled (empty label, confidence 0).
pub async fn label_tiles(
    classifier: &dyn VisionClassifier,
    prompts: &PromptSet,
    taxonomy: &Taxonomy,
    tiles: &mut [Tile],
) {
    let instructions = prompts.render(GRID_TILE_LABEL, &[]);
    for tile in tiles.iter_mut() {
        let reply = match classifier.classify(std::slice::from_ref(&tile.crop), &instructions).await {
            Ok(v) => TileLabel::from_value(&v),
            Err(e) => {
                tracing::warn!(index = tile.index, error = %e, "tile label failed");
                TileLabel::default()
            }
        };
        apply_label(tile, reply, taxonomy);
    }
}

fn apply_label(tile: &mut Tile, reply: TileLabel, taxonomy: &Taxonomy) {
    tile.normalized_label = normalize_label(&reply.label);
    tile.categories = taxonomy.categories_from_label(&reply.label);
    tile.label = reply.label;
    tile.label_confidence = reply.confidence;
    tracing::debug!(
        index = tile.index,
        label = %tile.label,
        confidence = tile.label_confidence,
        categories = ?tile.categories,
        "tile labeled"
    );
}
