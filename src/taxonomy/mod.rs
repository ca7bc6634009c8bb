/// Static vocabulary-to-category taxonomy and the heuristic cue lists built on it.
///
/// The data lives in `assets/taxonomy.toml` (embedded at build time). A
/// `Taxonomy` is constructed once and passed by reference into every
/// classification and selection call; it is never mutated afterwards.
pub mod label;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::errors::{TileGridError, TileGridResult};

pub use label::{labels_similar, normalize_label, similarity_ratio};

const BUILTIN_TAXONOMY: &str = include_str!("../../assets/taxonomy.toml");

/// Closed set of semantic categories a tile or task can be tagged with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Bird,
    Mammal,
    Insect,
    Fish,
    Reptile,
    Vehicle,
    Clothing,
    Container,
    ComputerAccessory,
}

impl Category {
    pub const ALL: [Category; 9] = [
        Category::Bird,
        Category::Mammal,
        Category::Insect,
        Category::Fish,
        Category::Reptile,
        Category::Vehicle,
        Category::Clothing,
        Category::Container,
        Category::ComputerAccessory,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Bird => "bird",
            Category::Mammal => "mammal",
            Category::Insect => "insect",
            Category::Fish => "fish",
            Category::Reptile => "reptile",
            Category::Vehicle => "vehicle",
            Category::Clothing => "clothing",
            Category::Container => "container",
            Category::ComputerAccessory => "computer_accessory",
        }
    }

    pub fn is_living(&self) -> bool {
        matches!(
            self,
            Category::Bird | Category::Mammal | Category::Insect | Category::Fish | Category::Reptile
        )
    }

    pub fn living() -> BTreeSet<Category> {
        Self::ALL.into_iter().filter(Category::is_living).collect()
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = TileGridError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == key)
            .ok_or_else(|| TileGridError::Config(format!("unknown category '{s}'")))
    }
}

// ── Asset schema ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct TaxonomyFile {
    version: u32,
    categories: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    overrides: BTreeMap<String, Category>,
    #[serde(default)]
    cues: CueLists,
}

/// Substring cues consulted by the selection heuristics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CueLists {
    /// Generic "living thing" wording in the task text.
    #[serde(default)]
    pub living: Vec<String>,
    /// "all / every / each" wording in the task text.
    #[serde(default)]
    pub exhaustive: Vec<String>,
    /// Example-object descriptions meaning "a shelter for birds".
    #[serde(default)]
    pub bird_shelter: Vec<String>,
    /// Label fragments that mark a tile as a bird even without a category tag.
    #[serde(default)]
    pub bird_label_terms: Vec<String>,
}

// ── Taxonomy ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Taxonomy {
    version: u32,
    vocabulary: BTreeMap<Category, Vec<String>>,
    word_patterns: Vec<(Category, Regex)>,
    overrides: BTreeMap<String, Category>,
    token_split: Regex,
    cues: CueLists,
}

impl Taxonomy {
    /// The taxonomy shipped with the crate.
    pub fn builtin() -> TileGridResult<Self> {
        Self::from_toml_str(BUILTIN_TAXONOMY)
    }

    pub fn load(path: &Path) -> TileGridResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let taxonomy = Self::from_toml_str(&content)?;
        tracing::info!(path = %path.display(), version = taxonomy.version, "taxonomy loaded");
        Ok(taxonomy)
    }

    pub fn from_toml_str(content: &str) -> TileGridResult<Self> {
        let file: TaxonomyFile = toml::from_str(content)?;

        let mut vocabulary = BTreeMap::new();
        for (key, words) in file.categories {
            let category = Category::from_str(&key)?;
            let words: Vec<String> = words
                .iter()
                .map(|w| w.trim().to_lowercase())
                .filter(|w| !w.is_empty())
                .collect();
            vocabulary.insert(category, words);
        }

        let mut word_patterns = Vec::new();
        for (category, words) in &vocabulary {
            if words.is_empty() {
                continue;
            }
            let alternation = words.iter().map(|w| regex::escape(w)).collect::<Vec<_>>().join("|");
            let pattern = Regex::new(&format!(r"\b(?:{alternation})\b"))
                .map_err(|e| TileGridError::Config(format!("taxonomy pattern for {category}: {e}")))?;
            word_patterns.push((*category, pattern));
        }

        let overrides = file
            .overrides
            .into_iter()
            .map(|(token, cat)| (token.to_lowercase(), cat))
            .collect();

        let token_split = Regex::new("[^a-zа-яё]+")
            .map_err(|e| TileGridError::Config(format!("token split pattern: {e}")))?;

        let lower = |v: Vec<String>| v.into_iter().map(|s| s.to_lowercase()).collect::<Vec<_>>();
        let cues = CueLists {
            living: lower(file.cues.living),
            exhaustive: lower(file.cues.exhaustive),
            bird_shelter: lower(file.cues.bird_shelter),
            bird_label_terms: lower(file.cues.bird_label_terms),
        };

        Ok(Self {
            version: file.version,
            vocabulary,
            word_patterns,
            overrides,
            token_split,
            cues,
        })
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn cues(&self) -> &CueLists {
        &self.cues
    }

    pub fn vocabulary(&self, category: Category) -> &[String] {
        self.vocabulary.get(&category).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Whole-word hits of any vocabulary term in free text.
    pub fn categories_from_text(&self, text: &str) -> BTreeSet<Category> {
        let t = text.to_lowercase();
        if t.trim().is_empty() {
            return BTreeSet::new();
        }
        self.word_patterns
            .iter()
            .filter(|(_, re)| re.is_match(&t))
            .map(|(cat, _)| *cat)
            .collect()
    }

    /// Substring hits of any vocabulary term inside a short label.
    pub fn categories_from_label(&self, label: &str) -> BTreeSet<Category> {
        let s = label.to_lowercase();
        if s.is_empty() {
            return BTreeSet::new();
        }
        self.vocabulary
            .iter()
            .filter(|(_, words)| words.iter().any(|w| s.contains(w.as_str())))
            .map(|(cat, _)| *cat)
            .collect()
    }

    /// Label substring hits plus the whole-token override table, for hints such as
    /// "домик для птиц" or "pets".
    pub fn categories_from_hint(&self, hint: &str) -> BTreeSet<Category> {
        let s = hint.to_lowercase();
        if s.trim().is_empty() {
            return BTreeSet::new();
        }
        let mut out = self.categories_from_label(&s);
        for token in self.token_split.split(&s).filter(|t| !t.is_empty()) {
            if let Some(cat) = self.overrides.get(token) {
                out.insert(*cat);
            }
        }
        out
    }

    fn contains_any(text: &str, cues: &[String]) -> bool {
        let t = text.to_lowercase();
        cues.iter().any(|c| t.contains(c.as_str()))
    }

    pub fn has_living_cue(&self, text: &str) -> bool {
        Self::contains_any(text, &self.cues.living)
    }

    pub fn has_exhaustive_cue(&self, text: &str) -> bool {
        Self::contains_any(text, &self.cues.exhaustive)
    }

    pub fn is_bird_shelter(&self, example: &str) -> bool {
        Self::contains_any(example, &self.cues.bird_shelter)
    }

    pub fn label_has_bird_term(&self, label: &str) -> bool {
        Self::contains_any(label, &self.cues.bird_label_terms)
    }
}
