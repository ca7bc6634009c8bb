/// Selection engine: turns the classifier's tentative index list plus taxonomy
/// signals into the final index set acted on for a round.
///
/// Steps, in order:
///   1. sanitize raw indexes against `index_order` (positional remap for out-of-domain values)
///   2. category fallback when nothing survived and the question has targets
///   3. creature fallback for generic "living thing" tasks
///   4. target/exclude category filter, applied only when it keeps something
///   5. "select all" expansion by similar label or shared category
///   6. shelter-for-birds override (replaces the set)
///   7. clamp to `index_order`
use std::collections::{BTreeMap, BTreeSet};

use image::RgbImage;
use serde::Serialize;
use serde_json::Value;

use crate::perception::grid::Tile;
use crate::solver::question::Question;
use crate::taxonomy::{labels_similar, normalize_label, Category, Taxonomy};
use crate::vision::coerce::{as_list, coerce_int, SelectionReply};
use crate::vision::prompts::{PromptSet, GRID_SELECTION};
use crate::vision::provider::VisionClassifier;

/// Audit record of one round's selection.
#[derive(Debug, Clone, Serialize)]
pub struct SelectionDecision {
    pub task_text: String,
    pub selection_criteria: String,
    pub index_order: Vec<u8>,
    pub chosen_indexes: Vec<u8>,
    pub raw_from_model: Value,
    pub reason: String,
    pub rationale: Vec<String>,
}

/// Coerce raw values into valid tile indexes.
///
/// A value already in `index_order` is kept; a value usable as a position into
/// `index_order` is remapped to the index at that position; anything else is
/// dropped. The result is sorted and deduplicated. Non-array input is empty.
pub fn sanitize_indexes(raw: &Value, index_order: &[u8]) -> Vec<u8> {
    let mut out = BTreeSet::new();
    for value in as_list(Some(raw)) {
        let Some(v) = coerce_int(value) else {
            continue;
        };
        if let Some(&idx) = index_order.iter().find(|&&i| i as i64 == v) {
            out.insert(idx);
        } else if v >= 0 && (v as u64) < index_order.len() as u64 {
            out.insert(index_order[v as usize]);
        }
    }
    out.into_iter().collect()
}

fn fmt_set(set: &BTreeSet<u8>) -> String {
    format!("{:?}", set.iter().collect::<Vec<_>>())
}

pub struct SelectionEngine<'a> {
    taxonomy: &'a Taxonomy,
    min_label_confidence: f64,
}

impl<'a> SelectionEngine<'a> {
    pub fn new(taxonomy: &'a Taxonomy, min_label_confidence: f64) -> Self {
        Self { taxonomy, min_label_confidence }
    }

    /// Run all steps. Never fails; an empty `chosen_indexes` is a valid outcome.
    pub fn select(
        &self,
        reply: &SelectionReply,
        tiles: &[Tile],
        question: &Question,
        index_order: &[u8],
    ) -> SelectionDecision {
        let by_index: BTreeMap<u8, &Tile> = tiles.iter().map(|t| (t.index, t)).collect();
        let cue_text = question.cue_text();
        let mut rationale = Vec::new();

        // 1. sanitize
        let mut chosen: BTreeSet<u8> = sanitize_indexes(&reply.indexes, index_order).into_iter().collect();
        rationale.push(format!("model indexes sanitized to {}", fmt_set(&chosen)));

        // 2. category fallback
        if chosen.is_empty() && !question.target_categories.is_empty() {
            chosen = tiles
                .iter()
                .filter(|t| t.has_any(&question.target_categories))
                .map(|t| t.index)
                .collect();
            if !chosen.is_empty() {
                rationale.push(format!("category fallback selected {}", fmt_set(&chosen)));
            }
        }

        // 3. creature fallback
        if chosen.is_empty() && self.taxonomy.has_living_cue(&cue_text) {
            let living = Category::living();
            chosen = tiles
                .iter()
                .filter(|t| t.has_any(&living) && t.label_confidence >= self.min_label_confidence)
                .map(|t| t.index)
                .collect();
            if !chosen.is_empty() {
                rationale.push(format!("creature fallback selected {}", fmt_set(&chosen)));
            }
        }

        // 4. category filter
        let filtered: BTreeSet<u8> = chosen
            .iter()
            .copied()
            .filter(|idx| by_index.get(idx).is_some_and(|t| self.passes_filter(t, question)))
            .collect();
        if !filtered.is_empty() && filtered != chosen {
            rationale.push(format!(
                "category filter narrowed {} to {}",
                fmt_set(&chosen),
                fmt_set(&filtered)
            ));
            chosen = filtered;
        }

        // 5. select-all expansion
        if !chosen.is_empty() && self.taxonomy.has_exhaustive_cue(&cue_text) {
            let added = expand_similar(&chosen, tiles, &by_index);
            if !added.is_empty() {
                rationale.push(format!("select-all expansion added {}", fmt_set(&added)));
                chosen.extend(added);
            }
        }

        // 6. shelter-for-birds override
        if self.taxonomy.is_bird_shelter(&question.example_container) {
            chosen = tiles
                .iter()
                .filter(|t| {
                    t.categories.contains(&Category::Bird) || self.taxonomy.label_has_bird_term(&t.label)
                })
                .map(|t| t.index)
                .collect();
            rationale.push(format!("bird shelter example, bird tiles only: {}", fmt_set(&chosen)));
        }

        // 7. clamp
        let chosen_indexes: Vec<u8> = chosen.into_iter().filter(|i| index_order.contains(i)).collect();

        tracing::info!(
            chosen = ?chosen_indexes,
            raw = %reply.indexes,
            "selection decided"
        );

        SelectionDecision {
            task_text: question.task_text.clone(),
            selection_criteria: question.selection_criteria.clone(),
            index_order: index_order.to_vec(),
            chosen_indexes,
            raw_from_model: reply.indexes.clone(),
            reason: reply.reason.clone(),
            rationale,
        }
    }

    fn passes_filter(&self, tile: &Tile, question: &Question) -> bool {
        if !question.target_categories.is_empty() && !tile.has_any(&question.target_categories) {
            return false;
        }
        if !question.exclude_categories.is_empty() && tile.has_any(&question.exclude_categories) {
            return false;
        }
        true
    }
}

fn tile_norm(tile: &Tile) -> String {
    if tile.normalized_label.is_empty() {
        normalize_label(&tile.label)
    } else {
        tile.normalized_label.clone()
    }
}

/// Unselected tiles whose label is similar to, or whose categories overlap,
/// those of the already selected tiles. The pools are fixed before scanning.
fn expand_similar(chosen: &BTreeSet<u8>, tiles: &[Tile], by_index: &BTreeMap<u8, &Tile>) -> BTreeSet<u8> {
    let mut label_pool = BTreeSet::new();
    let mut category_pool = BTreeSet::new();
    for tile in chosen.iter().filter_map(|i| by_index.get(i)) {
        let norm = tile_norm(tile);
        if !norm.is_empty() {
            label_pool.insert(norm);
        }
        category_pool.extend(tile.categories.iter().copied());
    }

    tiles
        .iter()
        .filter(|t| !chosen.contains(&t.index))
        .filter(|t| {
            let norm = tile_norm(t);
            label_pool.iter().any(|other| labels_similar(&norm, other)) || t.has_any(&category_pool)
        })
        .map(|t| t.index)
        .collect()
}

/// Ask the classifier for its tentative pick: task panel first, then the tile
/// crops in `index_order`. A failed call yields an empty reply.
pub async fn request_selection(
    classifier: &dyn VisionClassifier,
    prompts: &PromptSet,
    question: &Question,
    panel: &RgbImage,
    tiles: &[Tile],
    index_order: &[u8],
) -> SelectionReply {
    let mut images = Vec::with_capacity(index_order.len() + 1);
    images.push(panel.clone());
    images.extend(
        index_order
            .iter()
            .filter_map(|i| tiles.iter().find(|t| t.index == *i))
            .map(|t| t.crop.clone()),
    );
    let order = format!("{index_order:?}");
    let instructions = prompts.render(
        GRID_SELECTION,
        &[
            ("task_text", question.task_text.as_str()),
            ("selection_criteria", question.selection_criteria.as_str()),
            ("index_order", order.as_str()),
        ],
    );
    match classifier.classify(&images, &instructions).await {
        Ok(v) => SelectionReply::from_value(&v),
        Err(e) => {
            tracing::warn!(error = %e, "selection request failed, relying on fallbacks");
            SelectionReply::empty()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::perception::grid::partition;
    use crate::solver::testing::ScriptedClassifier;
    use serde_json::json;

    fn taxonomy() -> Taxonomy {
        Taxonomy::builtin().unwrap()
    }

    /// Nine tiles labeled from `labels` (index order), confidence 0.9.
    fn labeled_tiles(tx: &Taxonomy, labels: &[&str]) -> Vec<Tile> {
        let mut tiles = partition(&RgbImage::new(9, 9)).unwrap();
        for (tile, label) in tiles.iter_mut().zip(labels) {
            tile.label = label.to_string();
            tile.normalized_label = normalize_label(label);
            tile.categories = tx.categories_from_label(label);
            tile.label_confidence = 0.9;
        }
        tiles
    }

    fn reply(indexes: Value) -> SelectionReply {
        SelectionReply { indexes, reason: String::new() }
    }

    fn all_order() -> Vec<u8> {
        (0..9).collect()
    }

    #[test]
    fn sanitize_remaps_positions_and_drops_strays() {
        let order = [0, 2, 5, 7];
        assert_eq!(sanitize_indexes(&json!([1]), &order), vec![2]);
        assert_eq!(sanitize_indexes(&json!([2]), &order), vec![2]);
        assert!(sanitize_indexes(&json!([9]), &order).is_empty());
        assert_eq!(sanitize_indexes(&json!([7, "0", 3.2, -1, null, true, 7]), &order), vec![0, 7]);
        assert!(sanitize_indexes(&json!({"indexes": [1]}), &order).is_empty());
        assert_eq!(sanitize_indexes(&json!(["2.0", " 5 "]), &order), vec![5]);
    }

    #[test]
    fn category_fallback_on_empty_model_output() {
        let tx = taxonomy();
        let tiles = labeled_tiles(&tx, &["", "", "", "", "sparrow", "", "", "", ""]);
        let question = Question {
            target_categories: [Category::Bird].into_iter().collect(),
            ..Question::default()
        };
        let d = SelectionEngine::new(&tx, 0.5).select(&reply(json!([])), &tiles, &question, &all_order());
        assert_eq!(d.chosen_indexes, vec![4]);
        assert!(d.rationale.iter().any(|r| r.contains("category fallback")));
    }

    #[test]
    fn creature_fallback_respects_confidence() {
        let tx = taxonomy();
        let mut tiles = labeled_tiles(&tx, &["cat", "fish", "car", "", "жук", "", "", "", ""]);
        tiles[1].label = "рыба".into();
        tiles[1].categories = tx.categories_from_label("рыба");
        tiles[4].label_confidence = 0.3;
        let question = Question { task_text: "Click every creature".into(), ..Question::default() };
        let d = SelectionEngine::new(&tx, 0.5).select(&reply(json!([])), &tiles, &question, &all_order());
        // "every" also expands by shared category, but nothing else is living.
        assert_eq!(d.chosen_indexes, vec![0, 1]);
    }

    #[test]
    fn filter_applies_only_when_it_keeps_something() {
        let tx = taxonomy();
        let tiles = labeled_tiles(&tx, &["sparrow", "cat", "car", "", "", "", "", "", ""]);
        let birds = Question {
            target_categories: [Category::Bird].into_iter().collect(),
            ..Question::default()
        };
        let d = SelectionEngine::new(&tx, 0.5).select(&reply(json!([0, 1, 2])), &tiles, &birds, &all_order());
        assert_eq!(d.chosen_indexes, vec![0]);

        let fish = Question {
            target_categories: [Category::Fish].into_iter().collect(),
            ..Question::default()
        };
        let d = SelectionEngine::new(&tx, 0.5).select(&reply(json!([1, 2])), &tiles, &fish, &all_order());
        assert_eq!(d.chosen_indexes, vec![1, 2]);
    }

    #[test]
    fn exclude_categories_are_dropped() {
        let tx = taxonomy();
        let tiles = labeled_tiles(&tx, &["sparrow", "cat", "car", "", "", "", "", "", ""]);
        let question = Question {
            exclude_categories: [Category::Mammal].into_iter().collect(),
            ..Question::default()
        };
        let d = SelectionEngine::new(&tx, 0.5).select(&reply(json!([0, 1, 2])), &tiles, &question, &all_order());
        assert_eq!(d.chosen_indexes, vec![0, 2]);
    }

    #[test]
    fn select_all_expands_by_label_and_category() {
        let tx = taxonomy();
        let tiles = labeled_tiles(
            &tx,
            &["teapot", "teapots", "sparrow", "pigeon", "car", "", "", "", ""],
        );
        let question = Question { task_text: "Select all".into(), ..Question::default() };
        let d = SelectionEngine::new(&tx, 0.5).select(&reply(json!([0, 2])), &tiles, &question, &all_order());
        assert_eq!(d.chosen_indexes, vec![0, 1, 2, 3]);

        let single = Question { task_text: "Pick one".into(), ..Question::default() };
        let d = SelectionEngine::new(&tx, 0.5).select(&reply(json!([0, 2])), &tiles, &single, &all_order());
        assert_eq!(d.chosen_indexes, vec![0, 2]);
    }

    #[test]
    fn bird_shelter_override_replaces_set_even_when_empty() {
        let tx = taxonomy();
        let tiles = labeled_tiles(&tx, &["голубь", "cat", "bird feeder", "голубка", "", "", "", "", ""]);
        let question = Question { example_container: "Скворечник".into(), ..Question::default() };
        let d = SelectionEngine::new(&tx, 0.5).select(&reply(json!([1])), &tiles, &question, &all_order());
        assert_eq!(d.chosen_indexes, vec![0, 3]);

        let no_birds = labeled_tiles(&tx, &["cat", "dog", "", "", "", "", "", "", ""]);
        let d = SelectionEngine::new(&tx, 0.5).select(&reply(json!([1])), &no_birds, &question, &all_order());
        assert!(d.chosen_indexes.is_empty());
    }

    #[test]
    fn never_selects_outside_index_order() {
        let tx = taxonomy();
        let pool = ["sparrow", "cat", "car", "", "жук", "рыба", "teapot", "голубь", "mouse"];
        let cues = ["", "select all creature", "каждую птицу", "every"];
        let examples = ["", "birdhouse", "box"];
        let mut state = 0x2545_f491_4f6c_dd1du64;
        let mut next = move || {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            state
        };

        for _ in 0..400 {
            let labels: Vec<&str> = (0..9).map(|_| pool[(next() % pool.len() as u64) as usize]).collect();
            let tiles = labeled_tiles(&tx, &labels);
            let order: Vec<u8> = (0..9u8).filter(|_| next() % 3 != 0).collect();
            let raw: Vec<Value> = (0..(next() % 6))
                .map(|_| match next() % 4 {
                    0 => json!((next() % 20) as i64 - 5),
                    1 => json!(format!("{}", next() % 12)),
                    2 => json!((next() % 100) as f64 / 7.0),
                    _ => json!(null),
                })
                .collect();
            let question = Question {
                task_text: cues[(next() % cues.len() as u64) as usize].into(),
                example_container: examples[(next() % examples.len() as u64) as usize].into(),
                target_categories: if next() % 2 == 0 {
                    [Category::Bird].into_iter().collect()
                } else {
                    BTreeSet::new()
                },
                exclude_categories: if next() % 3 == 0 {
                    [Category::Mammal].into_iter().collect()
                } else {
                    BTreeSet::new()
                },
                ..Question::default()
            };
            let d = SelectionEngine::new(&tx, 0.5).select(&reply(Value::Array(raw)), &tiles, &question, &order);
            assert!(d.chosen_indexes.iter().all(|i| order.contains(i)), "{d:?}");
            assert!(d.chosen_indexes.windows(2).all(|w| w[0] < w[1]));
        }
    }

    #[tokio::test]
    async fn request_sends_panel_then_tiles_in_order() {
        let tiles = partition(&RgbImage::new(9, 9)).unwrap();
        let classifier = ScriptedClassifier::new(vec![Ok(json!({"indexes": [1, "2"], "reason": " birds "}))]);
        let question = Question { task_text: "pick birds".into(), ..Question::default() };
        let r = request_selection(&classifier, &PromptSet::default(), &question, &RgbImage::new(5, 5), &tiles, &[0, 2, 5]).await;
        assert_eq!(r.indexes, json!([1, "2"]));
        assert_eq!(r.reason, "birds");
        assert_eq!(classifier.image_counts(), vec![4]);
        let sent = classifier.instructions();
        assert!(sent[0].contains("pick birds"));
        assert!(sent[0].contains("[0, 2, 5]"));
    }
}
