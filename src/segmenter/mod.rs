// Question segmenter - turns the line stream into categories, questions and options
pub mod boundary;

pub use boundary::{BoundaryDetector, BoundaryKind, PatternDetector};

use crate::config::DatasetConfig;
use crate::pdf_extraction::TextLine;
use crate::types::{DatabankaError, Position, QuestionId, Result, SegmentationError, SegmentationErrorKind};
use std::collections::{BTreeMap, BTreeSet};

/// Where a boundary sits in reading order: page, then distance from the page top.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Anchor {
    pub page: u32,
    pub depth: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OptionBlock {
    pub label: char,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QuestionBlock {
    pub category_id: u8,
    pub sequence_number: u8,
    pub text: String,
    pub options: Vec<OptionBlock>,
    /// Filled from the category's answer key when the category closes.
    pub correct_option_index: Option<usize>,
    pub updated: Option<String>,
    pub anchor: Anchor,
    pub position: Position,
}

impl QuestionBlock {
    pub fn id(&self) -> QuestionId {
        QuestionId::new(self.category_id, self.sequence_number)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CategoryBlock {
    pub id: u8,
    pub name: String,
    pub anchor: Anchor,
    pub position: Position,
    pub questions: Vec<QuestionBlock>,
}

/// Everything the segmenter recovered, plus every problem it ran into.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Segmentation {
    pub categories: Vec<CategoryBlock>,
    pub errors: Vec<SegmentationError>,
}

impl Segmentation {
    pub fn into_result(self) -> Result<Vec<CategoryBlock>> {
        if self.errors.is_empty() {
            Ok(self.categories)
        } else {
            Err(DatabankaError::Segmentation(self.errors))
        }
    }

    pub fn questions(&self) -> impl Iterator<Item = &QuestionBlock> {
        self.categories.iter().flat_map(|c| c.questions.iter())
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum OpenField {
    None,
    Heading,
    Question,
    Option,
    AnswerKey,
    /// Inside a question that was rejected; its lines are swallowed.
    Discarded,
}

struct OpenCategory {
    block: CategoryBlock,
    answers: BTreeMap<u8, char>,
    // questions numbered outside the grid still count towards the total
    rejected: usize,
}

/// Run state threaded through every page of one segmentation pass.
struct SegmentState {
    closed: Vec<CategoryBlock>,
    category: Option<OpenCategory>,
    question: Option<QuestionBlock>,
    field: OpenField,
    // set after a rejected heading so its questions are not reported twice
    skipping: bool,
    seen_categories: BTreeSet<u8>,
    errors: Vec<SegmentationError>,
}

impl SegmentState {
    fn new() -> Self {
        Self {
            closed: Vec::new(),
            category: None,
            question: None,
            field: OpenField::None,
            skipping: false,
            seen_categories: BTreeSet::new(),
            errors: Vec::new(),
        }
    }

    fn error(&mut self, category: Option<u8>, position: Option<Position>, kind: SegmentationErrorKind) {
        let error = SegmentationError { category, position, kind };
        log::debug!("[segmenter] {}", error);
        self.errors.push(error);
    }

    fn current_category_id(&self) -> Option<u8> {
        self.category.as_ref().map(|c| c.block.id)
    }
}

pub struct Segmenter<D: BoundaryDetector> {
    detector: D,
    dataset: DatasetConfig,
    state: SegmentState,
}

impl<D: BoundaryDetector> Segmenter<D> {
    pub fn new(detector: D, dataset: &DatasetConfig) -> Self {
        Self { detector, dataset: dataset.clone(), state: SegmentState::new() }
    }

    /// Feed the visual lines of one page, top to bottom.
    pub fn feed_page(&mut self, page: u32, lines: &[TextLine]) {
        for line in lines {
            let position = Position { page, line: line.index };
            let anchor = Anchor { page, depth: line.depth };
            let kind = self.detector.detect(&line.text);
            self.apply(kind, &line.text, position, anchor);
        }
    }

    pub fn finish(mut self) -> Segmentation {
        self.close_category();
        let state = &mut self.state;
        for id in 1..=self.dataset.categories {
            if !state.seen_categories.contains(&id) {
                state.error(Some(id), None, SegmentationErrorKind::MissingCategory);
            }
        }
        let mut categories = std::mem::take(&mut state.closed);
        categories.sort_by_key(|c| c.id);
        log::info!(
            "[segmenter] {} categories, {} questions, {} problems",
            categories.len(),
            categories.iter().map(|c| c.questions.len()).sum::<usize>(),
            state.errors.len()
        );
        Segmentation { categories, errors: std::mem::take(&mut state.errors) }
    }

    fn apply(&mut self, kind: BoundaryKind, raw: &str, position: Position, anchor: Anchor) {
        match kind {
            BoundaryKind::Blank | BoundaryKind::PageFurniture => {}
            BoundaryKind::CategoryHeading { id, name } => self.open_category(id, name, position, anchor),
            BoundaryKind::QuestionStart { number, text } => self.open_question(number, text, position, anchor),
            BoundaryKind::Options(options) => self.add_options(options, position),
            BoundaryKind::AnswerKey(tokens) => {
                self.close_question();
                if let Some(category) = self.state.category.as_mut() {
                    category.answers.extend(tokens);
                    self.state.field = OpenField::AnswerKey;
                } else {
                    self.state.field = OpenField::None;
                }
            }
            BoundaryKind::AnswerTokens(tokens) if self.state.field == OpenField::AnswerKey => {
                if let Some(category) = self.state.category.as_mut() {
                    category.answers.extend(tokens);
                }
            }
            BoundaryKind::AnswerTokens(_) => self.append_text(raw),
            BoundaryKind::UpdateDate(date) => {
                if let Some(question) = self.state.question.as_mut() {
                    question.updated = Some(date);
                }
                if self.state.field != OpenField::Discarded {
                    self.state.field = OpenField::None;
                }
            }
            BoundaryKind::Text(text) => self.append_text(&text),
        }
    }

    fn open_category(&mut self, id: u32, name: String, position: Position, anchor: Anchor) {
        self.close_category();
        let state = &mut self.state;
        state.field = OpenField::None;

        let id = match u8::try_from(id) {
            Ok(id) if (1..=self.dataset.categories).contains(&id) => id,
            _ => {
                state.error(None, Some(position), SegmentationErrorKind::CategoryOutOfRange { id });
                state.skipping = true;
                return;
            }
        };
        if !state.seen_categories.insert(id) {
            state.error(Some(id), Some(position), SegmentationErrorKind::DuplicateCategory);
            state.skipping = true;
            return;
        }

        log::debug!("[segmenter] category {} {} at {}", id, name, position);
        state.skipping = false;
        state.field = OpenField::Heading;
        state.category = Some(OpenCategory {
            block: CategoryBlock { id, name, anchor, position, questions: Vec::new() },
            answers: BTreeMap::new(),
            rejected: 0,
        });
    }

    fn open_question(&mut self, number: u32, text: String, position: Position, anchor: Anchor) {
        self.close_question();
        let state = &mut self.state;
        let Some(category_id) = state.current_category_id() else {
            if !state.skipping {
                state.error(None, Some(position), SegmentationErrorKind::OrphanQuestion { number });
            }
            state.field = OpenField::Discarded;
            return;
        };
        let sequence_number = match u8::try_from(number) {
            Ok(n) if (1..=self.dataset.questions_per_category).contains(&n) => n,
            _ => {
                state.error(
                    Some(category_id),
                    Some(position),
                    SegmentationErrorKind::SequenceOutOfRange { number },
                );
                if let Some(category) = state.category.as_mut() {
                    category.rejected += 1;
                }
                state.field = OpenField::Discarded;
                return;
            }
        };
        state.question = Some(QuestionBlock {
            category_id,
            sequence_number,
            text,
            options: Vec::new(),
            correct_option_index: None,
            updated: None,
            anchor,
            position,
        });
        state.field = OpenField::Question;
    }

    fn add_options(&mut self, options: Vec<(char, String)>, position: Position) {
        let state = &mut self.state;
        if state.field == OpenField::Discarded {
            return;
        }
        let Some(question) = state.question.as_mut() else {
            if !state.skipping {
                let label = options.first().map(|o| o.0).unwrap_or('?');
                let category = state.current_category_id();
                state.error(category, Some(position), SegmentationErrorKind::StrayOption { label });
            }
            return;
        };
        question
            .options
            .extend(options.into_iter().map(|(label, text)| OptionBlock { label, text }));
        state.field = OpenField::Option;
    }

    fn append_text(&mut self, text: &str) {
        let state = &mut self.state;
        let target = match state.field {
            OpenField::Question => state.question.as_mut().map(|q| &mut q.text),
            OpenField::Option => state.question.as_mut().and_then(|q| q.options.last_mut()).map(|o| &mut o.text),
            OpenField::Heading if boundary::is_all_upper(text) => {
                state.category.as_mut().map(|c| &mut c.block.name)
            }
            _ => None,
        };
        match target {
            Some(field) => {
                if !field.is_empty() {
                    field.push(' ');
                }
                field.push_str(text.trim());
            }
            None => log::debug!("[segmenter] ignoring text outside any question: {}", text),
        }
    }

    fn close_question(&mut self) {
        let state = &mut self.state;
        if state.field == OpenField::Discarded {
            state.field = OpenField::None;
        }
        let Some(question) = state.question.take() else {
            return;
        };
        let labels: String = question.options.iter().map(|o| o.label).collect();
        if question.options.len() != 4 {
            state.error(
                Some(question.category_id),
                Some(question.position),
                SegmentationErrorKind::OptionCount { sequence: question.sequence_number, found: question.options.len() },
            );
        } else if labels != "ABCD" {
            state.error(
                Some(question.category_id),
                Some(question.position),
                SegmentationErrorKind::OptionOrder { sequence: question.sequence_number, labels },
            );
        }
        if let Some(category) = state.category.as_mut() {
            category.block.questions.push(question);
        }
    }

    fn close_category(&mut self) {
        self.close_question();
        let expected = self.dataset.questions_per_category as usize;
        let state = &mut self.state;
        let Some(OpenCategory { mut block, answers, rejected }) = state.category.take() else {
            return;
        };

        let mut seen = BTreeSet::new();
        for question in &mut block.questions {
            let sequence = question.sequence_number;
            if !seen.insert(sequence) {
                state.errors.push(SegmentationError {
                    category: Some(block.id),
                    position: Some(question.position),
                    kind: SegmentationErrorKind::DuplicateSequence { sequence },
                });
            }
            question.correct_option_index = answers
                .get(&sequence)
                .and_then(|label| question.options.iter().position(|o| o.label == *label));
            if question.correct_option_index.is_none() {
                state.errors.push(SegmentationError {
                    category: Some(block.id),
                    position: Some(question.position),
                    kind: SegmentationErrorKind::MissingAnswer { sequence },
                });
            }
        }
        let found = block.questions.len() + rejected;
        if found != expected {
            state.error(Some(block.id), Some(block.position), SegmentationErrorKind::QuestionCount { found });
        }
        block.questions.sort_by_key(|q| q.sequence_number);
        state.closed.push(block);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, LayoutConfig};

    fn lines(page: u32, texts: &[&str]) -> Vec<TextLine> {
        texts
            .iter()
            .enumerate()
            .map(|(i, text)| TextLine {
                page,
                index: i + 1,
                text: text.to_string(),
                x: 72.0,
                depth: 40.0 + 15.0 * i as f32,
            })
            .collect()
    }

    fn small_dataset() -> DatasetConfig {
        DatasetConfig { categories: 2, questions_per_category: 2, ..Config::default().dataset }
    }

    fn segmenter(dataset: &DatasetConfig) -> Segmenter<PatternDetector> {
        let detector = PatternDetector::new(&LayoutConfig::default(), dataset.questions_per_category).unwrap();
        Segmenter::new(detector, dataset)
    }

    fn category(id: u8, answers: &str) -> Vec<String> {
        let mut out = vec![format!("{id}. KATEGORIE {id}")];
        for q in 1..=2 {
            out.push(format!("{q}. Otázka {q} v kategorii {id}?"));
            out.push("A) první".to_string());
            out.push("B) druhá C) třetí".to_string());
            out.push("D) čtvrtá".to_string());
        }
        out.push(format!("SPRÁVNÉ ŘEŠENÍ: {answers}"));
        out
    }

    fn feed(segmenter: &mut Segmenter<PatternDetector>, page: u32, texts: &[String]) {
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        segmenter.feed_page(page, &lines(page, &refs));
    }

    #[test]
    fn segments_categories_questions_and_answers() {
        let dataset = small_dataset();
        let mut s = segmenter(&dataset);
        feed(&mut s, 1, &category(1, "1B, 2D"));
        feed(&mut s, 2, &category(2, "1A, 2C"));
        let segmentation = s.finish();
        assert!(segmentation.errors.is_empty(), "{:?}", segmentation.errors);
        assert_eq!(segmentation.categories.len(), 2);
        let first = &segmentation.categories[0].questions[0];
        assert_eq!(first.text, "Otázka 1 v kategorii 1?");
        assert_eq!(first.options.len(), 4);
        assert_eq!(first.options[2].text, "třetí");
        assert_eq!(first.correct_option_index, Some(1));
        assert_eq!(segmentation.categories[1].questions[1].correct_option_index, Some(2));
    }

    #[test]
    fn continuation_lines_extend_open_field() {
        let dataset = DatasetConfig { categories: 1, questions_per_category: 1, ..Config::default().dataset };
        let mut s = segmenter(&dataset);
        feed(
            &mut s,
            1,
            &[
                "1. ÚSTAVNÍ".to_string(),
                "POŘÁDEK".to_string(),
                "1. Která instituce".to_string(),
                "schvaluje zákony?".to_string(),
                "A) vláda".to_string(),
                "B) Parlament".to_string(),
                "České republiky".to_string(),
                "C) prezident D) soudy".to_string(),
                "Datum aktualizace testové úlohy: 1. 9. 2023".to_string(),
                "SPRÁVNÉ ŘEŠENÍ:".to_string(),
                "1B".to_string(),
            ],
        );
        let categories = s.finish().into_result().unwrap();
        assert_eq!(categories[0].name, "ÚSTAVNÍ POŘÁDEK");
        let q = &categories[0].questions[0];
        assert_eq!(q.text, "Která instituce schvaluje zákony?");
        assert_eq!(q.options[1].text, "Parlament České republiky");
        assert_eq!(q.updated.as_deref(), Some("1. 9. 2023"));
        assert_eq!(q.correct_option_index, Some(1));
    }

    #[test]
    fn missing_heading_is_reported_for_that_category() {
        let dataset = small_dataset();
        let mut s = segmenter(&dataset);
        feed(&mut s, 1, &category(1, "1B, 2D"));
        let segmentation = s.finish();
        assert_eq!(segmentation.errors.len(), 1);
        assert_eq!(segmentation.errors[0].category, Some(2));
        assert_eq!(segmentation.errors[0].kind, SegmentationErrorKind::MissingCategory);
        assert!(matches!(segmentation.into_result(), Err(DatabankaError::Segmentation(_))));
    }

    #[test]
    fn restarted_numbering_stays_in_headed_category() {
        let dataset = small_dataset();
        let mut s = segmenter(&dataset);
        let mut first = category(1, "1B, 2D");
        first.extend(category(1, "1B, 2D").into_iter().skip(1));
        feed(&mut s, 1, &first);
        feed(&mut s, 2, &category(2, "1A, 2C"));
        let segmentation = s.finish();
        let kinds: Vec<_> = segmentation.errors.iter().map(|e| (e.category, e.kind.clone())).collect();
        assert!(kinds.contains(&(Some(1), SegmentationErrorKind::QuestionCount { found: 4 })));
        assert!(kinds.contains(&(Some(1), SegmentationErrorKind::DuplicateSequence { sequence: 1 })));
        assert_eq!(segmentation.categories[1].questions.len(), 2);
    }

    #[test]
    fn malformed_options_are_collected_not_dropped() {
        let dataset = DatasetConfig { categories: 1, questions_per_category: 2, ..Config::default().dataset };
        let mut s = segmenter(&dataset);
        feed(
            &mut s,
            3,
            &[
                "1. OBEC".to_string(),
                "1. První otázka?".to_string(),
                "A) a B) b C) c".to_string(),
                "2. Druhá otázka?".to_string(),
                "A) a B) b D) d C) c".to_string(),
                "SPRÁVNÉ ŘEŠENÍ: 1A, 2A".to_string(),
            ],
        );
        let errors = s.finish().errors;
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].kind, SegmentationErrorKind::OptionCount { sequence: 1, found: 3 });
        assert_eq!(errors[0].position, Some(Position { page: 3, line: 2 }));
        assert_eq!(
            errors[1].kind,
            SegmentationErrorKind::OptionOrder { sequence: 2, labels: "ABDC".to_string() }
        );
    }

    #[test]
    fn question_before_any_heading_is_an_orphan() {
        let dataset = DatasetConfig { categories: 1, questions_per_category: 2, ..Config::default().dataset };
        let mut s = segmenter(&dataset);
        feed(&mut s, 1, &["1. Kde to jsme?".to_string(), "A) tady".to_string()]);
        let errors = s.finish().errors;
        assert_eq!(errors[0].kind, SegmentationErrorKind::OrphanQuestion { number: 1 });
        assert_eq!(errors[1].kind, SegmentationErrorKind::MissingCategory);
        assert_eq!(errors.len(), 2);
    }
}
