// Run configuration for databanka, loaded from TOML with built-in defaults
use crate::types::{CategoryGroup, DatabankaError, QuestionId, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable consulted when no `--config` flag is given.
pub const CONFIG_ENV: &str = "DATABANKA_CONFIG";

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub layout: LayoutConfig,
    pub dataset: DatasetConfig,
    pub images: ImageConfig,
    pub validation: ValidationConfig,
}

/// Layout cues the boundary detector looks for.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LayoutConfig {
    /// Baselines closer than this (in points) are merged into one visual line.
    pub row_tolerance: f32,
    /// Running titles repeated on every page.
    pub running_titles: Vec<String>,
    pub answer_marker: String,
    pub date_marker: String,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            row_tolerance: 3.0,
            running_titles: vec!["TESTOVÉ ÚLOHY".to_string(), "OBČANSKÝ ZÁKLAD".to_string()],
            answer_marker: "SPRÁVNÉ ŘEŠENÍ".to_string(),
            date_marker: "Datum aktualizace testové úlohy:".to_string(),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct GroupRange {
    pub group: CategoryGroup,
    pub first: u8,
    pub last: u8,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DatasetConfig {
    pub categories: u8,
    pub questions_per_category: u8,
    pub groups: Vec<GroupRange>,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            categories: 30,
            questions_per_category: 10,
            groups: vec![
                GroupRange { group: CategoryGroup::CivicBasics, first: 1, last: 16 },
                GroupRange { group: CategoryGroup::Geography, first: 17, last: 21 },
                GroupRange { group: CategoryGroup::History, first: 22, last: 30 },
            ],
        }
    }
}

impl DatasetConfig {
    pub fn group_for(&self, category_id: u8) -> Option<CategoryGroup> {
        self.groups
            .iter()
            .find(|range| (range.first..=range.last).contains(&category_id))
            .map(|range| range.group)
    }

    pub fn total_questions(&self) -> usize {
        self.categories as usize * self.questions_per_category as usize
    }

    /// Every `(category, sequence)` slot a complete dataset must fill, in order.
    pub fn slots(&self) -> impl Iterator<Item = QuestionId> + '_ {
        (1..=self.categories).flat_map(move |category| {
            (1..=self.questions_per_category).map(move |sequence| QuestionId::new(category, sequence))
        })
    }

    pub fn contains(&self, id: QuestionId) -> bool {
        (1..=self.categories).contains(&id.category_id)
            && (1..=self.questions_per_category).contains(&id.sequence_number)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ImageConfig {
    /// Encoded images smaller than this are dropped as artifacts.
    pub min_bytes: usize,
    /// Options shorter than this may each carry a picture.
    pub short_option_chars: usize,
    /// `[category, sequence]` pairs that never carry an image.
    pub exclude: Vec<[u8; 2]>,
    /// Phrases a question must contain (case-insensitive) before a picture links to it.
    pub keywords: Vec<String>,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            min_bytes: 200,
            short_option_chars: 50,
            // the mountain question refers back to an earlier one, not to a picture
            exclude: vec![[17, 8]],
            keywords: [
                "obrázku",
                "obrázek",
                "obrázků",
                "na mapě",
                "bankovce",
                "tato socha",
                "této sochy",
                "tato panovnice",
                "tato budova",
                "této budovy",
                "tato stavba",
                "tato hora",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

impl ImageConfig {
    pub fn is_excluded(&self, id: QuestionId) -> bool {
        self.exclude
            .iter()
            .any(|[category, sequence]| *category == id.category_id && *sequence == id.sequence_number)
    }

    /// Whether `text` refers to a picture. An empty keyword list accepts everything.
    pub fn mentions_picture(&self, text: &str) -> bool {
        if self.keywords.is_empty() {
            return true;
        }
        let lower = text.to_lowercase();
        self.keywords.iter().any(|k| lower.contains(&k.to_lowercase()))
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Unreferenced images tolerated before the validator warns.
    pub orphan_tolerance: usize,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self { orphan_tolerance: 4 }
    }
}

impl Config {
    /// Load from an explicit path, else from `DATABANKA_CONFIG`, else defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path: Option<PathBuf> = match path {
            Some(p) => Some(p.to_path_buf()),
            None => env::var_os(CONFIG_ENV).map(PathBuf::from),
        };
        match path {
            Some(p) => {
                log::debug!("[config] loading {}", p.display());
                let content = fs::read_to_string(&p)
                    .map_err(|e| DatabankaError::Config(format!("{}: {e}", p.display())))?;
                Self::from_toml_str(&content)
            }
            None => Ok(Self::default()),
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(content).map_err(|e| DatabankaError::Config(e.to_string()))?;
        config.check()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| DatabankaError::Config(e.to_string()))
    }

    fn check(&self) -> Result<()> {
        if self.dataset.categories == 0 || self.dataset.questions_per_category == 0 {
            return Err(DatabankaError::Config(
                "dataset needs at least one category and one question per category".to_string(),
            ));
        }
        if self.layout.row_tolerance < 0.0 {
            return Err(DatabankaError::Config("row_tolerance must not be negative".to_string()));
        }
        if self.layout.answer_marker.trim().is_empty() {
            return Err(DatabankaError::Config("answer_marker must not be empty".to_string()));
        }
        if let Some(id) = (1..=self.dataset.categories).find(|id| self.dataset.group_for(*id).is_none()) {
            return Err(DatabankaError::Config(format!("category {id} is not covered by any group")));
        }
        Ok(())
    }
}
