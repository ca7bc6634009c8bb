use std::collections::BTreeSet;

use image::RgbImage;
use serde::Serialize;

use crate::taxonomy::{Category, Taxonomy};
use crate::vision::coerce::TaskParse;
use crate::vision::prompts::{PromptSet, QUESTION_EXTRACTION};
use crate::vision::provider::VisionClassifier;

/// Parsed task descriptor for one round.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Question {
    pub task_text: String,
    pub selection_criteria: String,
    pub positive_keywords: Vec<String>,
    pub negative_keywords: Vec<String>,
    pub example_container: String,
    pub example_container_for_creature: String,
    pub target_creature_category: String,
    pub exclude_creature_category: String,
    pub target_categories: BTreeSet<Category>,
    pub exclude_categories: BTreeSet<Category>,
    /// Match score of the task panel this question was read from.
    pub score: f64,
}

impl Question {
    /// Combine the classifier's parse with local taxonomy inference.
    ///
    /// Targets are the union of whole-word hits in the task text and hint hits
    /// in the "for which creature" and target-category fields; excludes come
    /// from the exclude-category field only.
    pub fn from_parse(parse: TaskParse, taxonomy: &Taxonomy, score: f64) -> Self {
        let mut target_categories = taxonomy.categories_from_text(&parse.task_text);
        target_categories.extend(taxonomy.categories_from_hint(&parse.example_container_for_creature));
        target_categories.extend(taxonomy.categories_from_hint(&parse.target_creature_category));
        let exclude_categories = taxonomy.categories_from_hint(&parse.exclude_creature_category);

        Self {
            task_text: parse.task_text,
            selection_criteria: parse.selection_criteria,
            positive_keywords: parse.positive_keywords,
            negative_keywords: parse.negative_keywords,
            example_container: parse.example_container,
            example_container_for_creature: parse.example_container_for_creature,
            target_creature_category: parse.target_creature_category,
            exclude_creature_category: parse.exclude_creature_category,
            target_categories,
            exclude_categories,
            score,
        }
    }

    /// Lowercased text the cue heuristics look at.
    pub fn cue_text(&self) -> String {
        format!("{} {}", self.task_text, self.selection_criteria).to_lowercase()
    }
}

/// Ask the classifier to read the task panel. A failed or malformed reply
/// degrades to an empty parse; the selection fallbacks take it from there.
pub async fn read_question(
    classifier: &dyn VisionClassifier,
    prompts: &PromptSet,
    taxonomy: &Taxonomy,
    panel: &RgbImage,
    score: f64,
) -> Question {
    let instructions = prompts.render(QUESTION_EXTRACTION, &[]);
    let parse = match classifier.classify(std::slice::from_ref(panel), &instructions).await {
        Ok(v) => TaskParse::from_value(&v),
        Err(e) => {
            tracing::warn!(classifier = classifier.name(), error = %e, "question extraction failed, continuing with an empty task");
            TaskParse::default()
        }
    };
    let question = Question::from_parse(parse, taxonomy, score);
    tracing::info!(
        task = %question.task_text,
        targets = ?question.target_categories,
        excludes = ?question.exclude_categories,
        "question read"
    );
    question
}
