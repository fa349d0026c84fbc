// Boundary detection - classifies one visual line of the question bank
use crate::config::LayoutConfig;
use crate::types::{DatabankaError, Result};
use regex::Regex;

/// What a single line means to the segmenter.
#[derive(Debug, Clone, PartialEq)]
pub enum BoundaryKind {
    Blank,
    /// Page numbers and running titles.
    PageFurniture,
    CategoryHeading { id: u32, name: String },
    QuestionStart { number: u32, text: String },
    /// One or more `A) text` options found on the line.
    Options(Vec<(char, String)>),
    /// The answer key line, with whatever `1C, 2D...` tokens it carries.
    AnswerKey(Vec<(u8, char)>),
    /// A line made only of answer tokens; continues a key that wrapped.
    AnswerTokens(Vec<(u8, char)>),
    UpdateDate(String),
    Text(String),
}

pub trait BoundaryDetector {
    fn detect(&self, line: &str) -> BoundaryKind;
}

/// Regex-driven detector for the published bank layout.
#[derive(Debug, Clone)]
pub struct PatternDetector {
    heading: Regex,
    question: Regex,
    option: Regex,
    answer_token: Regex,
    answer_line: Regex,
    page_number: Regex,
    running_titles: Vec<String>,
    answer_marker: String,
    date_marker: String,
    question_limit: u32,
}

impl PatternDetector {
    pub fn new(layout: &LayoutConfig, question_limit: u8) -> Result<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| DatabankaError::Config(format!("bad pattern {pattern}: {e}")))
        };
        Ok(Self {
            heading: compile(r"^(\d{1,2})\.\s+(\p{Lu}[\p{Lu}\p{N}\s,.\-–()]*)$")?,
            question: compile(r"^(\d{1,3})\.\s*(.*)$")?,
            option: compile(r"(?:^|\s)([A-D])\)")?,
            answer_token: compile(r"(\d{1,2})\s*([A-D])\b")?,
            answer_line: compile(r"^(?:\d{1,2}\s*[A-D][\s,;.]*)+$")?,
            page_number: compile(r"^(?:\d+|\d+\s*/\s*\d+)$")?,
            running_titles: layout.running_titles.iter().map(|t| t.trim().to_string()).collect(),
            answer_marker: layout.answer_marker.clone(),
            date_marker: layout.date_marker.clone(),
            question_limit: question_limit as u32,
        })
    }

    fn answer_tokens(&self, text: &str) -> Vec<(u8, char)> {
        self.answer_token
            .captures_iter(text)
            .filter_map(|caps| {
                let number = caps[1].parse::<u8>().ok()?;
                let label = caps[2].chars().next()?;
                Some((number, label))
            })
            .collect()
    }

    fn options(&self, line: &str) -> Option<Vec<(char, String)>> {
        let marks: Vec<(usize, usize, char)> = self
            .option
            .captures_iter(line)
            .filter_map(|caps| {
                let label = caps.get(1)?;
                let whole = caps.get(0)?;
                Some((label.start(), whole.end(), label.as_str().chars().next()?))
            })
            .collect();
        if marks.first().map(|m| m.0) != Some(0) {
            return None;
        }
        let options = marks
            .iter()
            .enumerate()
            .map(|(i, &(_, text_start, label))| {
                let text_end = marks.get(i + 1).map(|m| m.0).unwrap_or(line.len());
                (label, line[text_start..text_end].trim().to_string())
            })
            .collect();
        Some(options)
    }
}

impl BoundaryDetector for PatternDetector {
    fn detect(&self, line: &str) -> BoundaryKind {
        let line = line.trim();
        if line.is_empty() {
            return BoundaryKind::Blank;
        }
        if self.page_number.is_match(line) || self.running_titles.iter().any(|t| t == line) {
            return BoundaryKind::PageFurniture;
        }
        if let Some(at) = line.find(&self.answer_marker) {
            return BoundaryKind::AnswerKey(self.answer_tokens(&line[at + self.answer_marker.len()..]));
        }
        if let Some(rest) = line.strip_prefix(&self.date_marker) {
            return BoundaryKind::UpdateDate(rest.trim().to_string());
        }
        if let Some(caps) = self.heading.captures(line) {
            if let Ok(id) = caps[1].parse::<u32>() {
                return BoundaryKind::CategoryHeading { id, name: caps[2].trim().to_string() };
            }
        }
        if let Some(caps) = self.question.captures(line) {
            if let Ok(number) = caps[1].parse::<u32>() {
                if !is_all_upper(line) && (number <= self.question_limit || line.contains('?')) {
                    return BoundaryKind::QuestionStart { number, text: caps[2].trim().to_string() };
                }
            }
        }
        if let Some(options) = self.options(line) {
            return BoundaryKind::Options(options);
        }
        if self.answer_line.is_match(line) {
            return BoundaryKind::AnswerTokens(self.answer_tokens(line));
        }
        BoundaryKind::Text(line.to_string())
    }
}

/// True when the text has letters and none of them is lowercase.
pub fn is_all_upper(text: &str) -> bool {
    let mut letters = text.chars().filter(|c| c.is_alphabetic()).peekable();
    letters.peek().is_some() && letters.all(|c| !c.is_lowercase())
}
