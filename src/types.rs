// Core types for databanka: dataset entities, run severities and the error taxonomy
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Option labels in the order they must appear on every question.
pub const OPTION_LABELS: [char; 4] = ['A', 'B', 'C', 'D'];

/// Thematic group a category belongs to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoryGroup {
    CivicBasics,
    Geography,
    History,
}

impl fmt::Display for CategoryGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CategoryGroup::CivicBasics => "Civic Basics",
            CategoryGroup::Geography => "Geography",
            CategoryGroup::History => "History",
        };
        f.write_str(name)
    }
}

/// Stable `(category, sequence)` identifier, rendered as `category.sequence`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QuestionId {
    pub category_id: u8,
    pub sequence_number: u8,
}

impl QuestionId {
    pub const fn new(category_id: u8, sequence_number: u8) -> Self {
        Self { category_id, sequence_number }
    }
}

impl fmt::Display for QuestionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.category_id, self.sequence_number)
    }
}

impl FromStr for QuestionId {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (category, sequence) = s
            .split_once('.')
            .ok_or_else(|| format!("expected `category.sequence`, got `{s}`"))?;
        let category_id = category
            .trim()
            .parse::<u8>()
            .map_err(|e| format!("bad category in `{s}`: {e}"))?;
        let sequence_number = sequence
            .trim()
            .parse::<u8>()
            .map_err(|e| format!("bad sequence number in `{s}`: {e}"))?;
        Ok(Self::new(category_id, sequence_number))
    }
}

impl From<(u8, u8)> for QuestionId {
    fn from((category_id, sequence_number): (u8, u8)) -> Self {
        Self::new(category_id, sequence_number)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: u8,
    pub name: String,
    pub group: CategoryGroup,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerOption {
    pub label: char,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_ref: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub category_id: u8,
    pub sequence_number: u8,
    pub text: String,
    pub options: Vec<AnswerOption>,
    pub correct_option_index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_ref: Option<String>,
    /// "Last updated" note printed under the question in the bank.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<String>,
    /// Page the question number was found on.
    pub page: u32,
}

impl Question {
    pub fn id(&self) -> QuestionId {
        QuestionId::new(self.category_id, self.sequence_number)
    }

    /// Every image file this question points at, question slot first.
    pub fn image_refs(&self) -> impl Iterator<Item = &str> {
        self.image_ref
            .as_deref()
            .into_iter()
            .chain(self.options.iter().filter_map(|o| o.image_ref.as_deref()))
    }
}

/// Where a linked image sits within its question.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageSlot {
    Question,
    Option(char),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrphanReason {
    /// Before the first category heading.
    Cover,
    /// Between a category heading and its first question.
    SectionHeader,
    /// After the last question.
    Trailing,
}

/// Outcome of associating one extracted image with the question set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Disposition {
    Linked {
        category_id: u8,
        sequence_number: u8,
        slot: ImageSlot,
    },
    ExpectedOrphan {
        reason: OrphanReason,
    },
    Anomaly {
        reason: String,
    },
}

impl Disposition {
    pub fn linked(id: QuestionId, slot: ImageSlot) -> Self {
        Disposition::Linked {
            category_id: id.category_id,
            sequence_number: id.sequence_number,
            slot,
        }
    }

    pub fn anomaly<S: Into<String>>(reason: S) -> Self {
        Disposition::Anomaly { reason: reason.into() }
    }

    pub fn question(&self) -> Option<QuestionId> {
        match self {
            Disposition::Linked { category_id, sequence_number, .. } => {
                Some(QuestionId::new(*category_id, *sequence_number))
            }
            _ => None,
        }
    }

    pub fn is_anomaly(&self) -> bool {
        matches!(self, Disposition::Anomaly { .. })
    }
}

/// An extracted image persisted in the image store, with its provenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageAsset {
    pub file: String,
    pub page: u32,
    pub extraction_order: u32,
    pub width: u32,
    pub height: u32,
    pub format: String,
    pub byte_len: usize,
    pub disposition: Disposition,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dataset {
    pub source_file: String,
    pub categories: Vec<Category>,
    pub questions: Vec<Question>,
    pub images: Vec<ImageAsset>,
    #[serde(default)]
    pub artifacts_discarded: usize,
}

impl Dataset {
    pub fn question(&self, id: QuestionId) -> Option<&Question> {
        self.questions.iter().find(|q| q.id() == id)
    }

    pub fn category(&self, id: u8) -> Option<&Category> {
        self.categories.iter().find(|c| c.id == id)
    }

    /// `(question, file)` for every image reference carried by a question or its options.
    pub fn image_references(&self) -> Vec<(QuestionId, &str)> {
        self.questions
            .iter()
            .flat_map(|q| q.image_refs().map(move |file| (q.id(), file)))
            .collect()
    }
}

/// Worst outcome of a run; ordered so `max` picks the one that decides the exit status.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Clean,
    Warning,
    Fatal,
}

impl Severity {
    pub fn exit_code(self) -> i32 {
        match self {
            Severity::Clean => 0,
            Severity::Fatal => 1,
            Severity::Warning => 2,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Severity::Clean => "OK",
            Severity::Warning => "WARNING",
            Severity::Fatal => "FAILED",
        };
        f.write_str(label)
    }
}

/// Page and 1-based line index of a detected problem.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub struct Position {
    pub page: u32,
    pub line: usize,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "page {}, line {}", self.page, self.line)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SegmentationErrorKind {
    OptionCount { sequence: u8, found: usize },
    OptionOrder { sequence: u8, labels: String },
    SequenceOutOfRange { number: u32 },
    QuestionCount { found: usize },
    DuplicateSequence { sequence: u8 },
    MissingAnswer { sequence: u8 },
    MissingCategory,
    DuplicateCategory,
    CategoryOutOfRange { id: u32 },
    OrphanQuestion { number: u32 },
    StrayOption { label: char },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SegmentationError {
    /// `None` when the problem was found before any category heading.
    pub category: Option<u8>,
    pub position: Option<Position>,
    pub kind: SegmentationErrorKind,
}

impl fmt::Display for SegmentationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.category {
            Some(id) => write!(f, "category {id}")?,
            None => write!(f, "before first heading")?,
        }
        if let Some(position) = self.position {
            write!(f, " ({position})")?;
        }
        f.write_str(": ")?;
        match &self.kind {
            SegmentationErrorKind::OptionCount { sequence, found } => {
                write!(f, "question {sequence} has {found} options, expected 4")
            }
            SegmentationErrorKind::OptionOrder { sequence, labels } => {
                write!(f, "question {sequence} has options labelled {labels}, expected ABCD")
            }
            SegmentationErrorKind::SequenceOutOfRange { number } => {
                write!(f, "question number {number} is out of range")
            }
            SegmentationErrorKind::QuestionCount { found } => {
                write!(f, "found {found} questions")
            }
            SegmentationErrorKind::DuplicateSequence { sequence } => {
                write!(f, "question {sequence} appears more than once")
            }
            SegmentationErrorKind::MissingAnswer { sequence } => {
                write!(f, "no correct answer marked for question {sequence}")
            }
            SegmentationErrorKind::MissingCategory => write!(f, "heading not found"),
            SegmentationErrorKind::DuplicateCategory => write!(f, "heading appears more than once"),
            SegmentationErrorKind::CategoryOutOfRange { id } => {
                write!(f, "heading number {id} is out of range")
            }
            SegmentationErrorKind::OrphanQuestion { number } => {
                write!(f, "question {number} appears before any category heading")
            }
            SegmentationErrorKind::StrayOption { label } => {
                write!(f, "option {label}) does not belong to any question")
            }
        }
    }
}

impl std::error::Error for SegmentationError {}

// Error types
#[derive(Debug, thiserror::Error)]
pub enum DatabankaError {
    #[error("unreadable PDF {}: {reason}", .path.display())]
    UnreadablePdf { path: PathBuf, reason: String },

    #[error("segmentation failed with {} problem(s)", .0.len())]
    Segmentation(Vec<SegmentationError>),

    #[error("incomplete dataset: {} slot(s) missing, {} unexpected", .missing.len(), .unexpected.len())]
    IncompleteDataset {
        missing: Vec<QuestionId>,
        unexpected: Vec<QuestionId>,
    },

    #[error("unreadable dataset {}: {reason}", .path.display())]
    UnreadableDataset { path: PathBuf, reason: String },

    #[error("config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
}

pub type Result<T> = std::result::Result<T, DatabankaError>;
