// Validator - read-only cross-check of a persisted dataset against its source PDF
use crate::config::Config;
use crate::pipeline;
use crate::store;
use crate::types::{Dataset, Disposition, QuestionId, Result, Severity, OPTION_LABELS};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Finding {
    MissingImage { category_id: u8, sequence_number: u8, file: String },
    OrphansOverTolerance { count: usize, tolerance: usize },
    UntrackedImage { file: String },
    /// Found in the PDF but not recorded in the manifest.
    NotInManifest { page: u32, extraction_order: u32 },
    /// Recorded in the manifest but no longer found in the PDF.
    NotInPdf { file: String },
    Anomaly { file: String, reason: String },
    InvalidStructure { detail: String },
}

impl Finding {
    pub fn severity(&self) -> Severity {
        match self {
            Finding::MissingImage { .. } | Finding::InvalidStructure { .. } => Severity::Fatal,
            _ => Severity::Warning,
        }
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Finding::MissingImage { category_id, sequence_number, file } => {
                write!(f, "question {category_id}.{sequence_number} references missing image {file}")
            }
            Finding::OrphansOverTolerance { count, tolerance } => {
                write!(f, "{count} unreferenced images, more than the {tolerance} tolerated")
            }
            Finding::UntrackedImage { file } => write!(f, "{file} is in the image store but not in the manifest"),
            Finding::NotInManifest { page, extraction_order } => {
                write!(f, "image #{extraction_order} on page {page} is not recorded in the manifest")
            }
            Finding::NotInPdf { file } => write!(f, "{file} is recorded but no longer found in the PDF"),
            Finding::Anomaly { file, reason } => write!(f, "{file} could not be placed: {reason}"),
            Finding::InvalidStructure { detail } => write!(f, "invalid dataset: {detail}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationReport {
    pub source_file: String,
    pub out_dir: PathBuf,
    pub images_extracted: usize,
    pub images_recorded: usize,
    pub images_referenced: usize,
    pub images_on_disk: usize,
    pub orphaned: Vec<String>,
    pub orphan_tolerance: usize,
    pub missing: Vec<String>,
    pub untracked: Vec<String>,
    pub findings: Vec<Finding>,
}

impl ValidationReport {
    pub fn severity(&self) -> Severity {
        self.findings.iter().map(Finding::severity).max().unwrap_or(Severity::Clean)
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.findings.iter().filter(|f| f.severity() == severity).count()
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Validation of {} against {}", self.source_file, self.out_dir.display())?;
        writeln!(f, "  images extracted:  {}", self.images_extracted)?;
        writeln!(f, "  images recorded:   {}", self.images_recorded)?;
        writeln!(f, "  images referenced: {}", self.images_referenced)?;
        writeln!(f, "  images on disk:    {}", self.images_on_disk)?;
        writeln!(f, "  orphaned:  {} (tolerance {})", self.orphaned.len(), self.orphan_tolerance)?;
        writeln!(f, "  missing:   {}", self.missing.len())?;
        writeln!(f, "  untracked: {}", self.untracked.len())?;
        writeln!(
            f,
            "{}: {} fatal, {} warning(s)",
            self.severity(),
            self.count(Severity::Fatal),
            self.count(Severity::Warning)
        )?;
        for finding in &self.findings {
            let tag = match finding.severity() {
                Severity::Fatal => "fatal",
                _ => "warn",
            };
            writeln!(f, "  [{tag}] {finding}")?;
        }
        Ok(())
    }
}

pub fn validate(pdf: &Path, out_dir: &Path, config: &Config) -> Result<ValidationReport> {
    log::info!("[validator] checking {} against {}", out_dir.display(), pdf.display());
    let dataset = store::load_dataset(out_dir)?;
    let (extracted, _) = pipeline::extract_images(pdf, config)?;
    let on_disk = list_image_store(&store::image_dir(out_dir))?;

    let mut findings = structure_problems(&dataset, config);

    let recorded: BTreeSet<&str> = dataset.images.iter().map(|i| i.file.as_str()).collect();
    let references = dataset.image_references();
    let referenced: BTreeSet<&str> = references.iter().map(|(_, file)| *file).collect();

    let mut missing = Vec::new();
    for (id, file) in &references {
        if !recorded.contains(file) || !on_disk.contains(*file) {
            missing.push(file.to_string());
            findings.push(Finding::MissingImage {
                category_id: id.category_id,
                sequence_number: id.sequence_number,
                file: file.to_string(),
            });
        }
    }

    let orphaned: Vec<String> = dataset
        .images
        .iter()
        .filter(|i| !referenced.contains(i.file.as_str()))
        .map(|i| i.file.clone())
        .collect();
    let tolerance = config.validation.orphan_tolerance;
    if orphaned.len() > tolerance {
        findings.push(Finding::OrphansOverTolerance { count: orphaned.len(), tolerance });
    }

    let untracked: Vec<String> = on_disk.iter().filter(|f| !recorded.contains(f.as_str())).cloned().collect();
    findings.extend(untracked.iter().map(|file| Finding::UntrackedImage { file: file.clone() }));

    // drift between the manifest and a fresh read of the PDF
    let fresh: BTreeMap<u32, (u32, usize)> = extracted
        .iter()
        .map(|i| (i.extraction_order, (i.page, i.encoded.bytes.len())))
        .collect();
    let manifest: BTreeMap<u32, (u32, usize)> =
        dataset.images.iter().map(|i| (i.extraction_order, (i.page, i.byte_len))).collect();
    for (order, (page, _)) in fresh.iter().filter(|(order, key)| manifest.get(*order) != Some(*key)) {
        findings.push(Finding::NotInManifest { page: *page, extraction_order: *order });
    }
    for asset in dataset.images.iter().filter(|i| fresh.get(&i.extraction_order) != Some(&(i.page, i.byte_len))) {
        findings.push(Finding::NotInPdf { file: asset.file.clone() });
    }

    for asset in &dataset.images {
        if let Disposition::Anomaly { reason } = &asset.disposition {
            findings.push(Finding::Anomaly { file: asset.file.clone(), reason: reason.clone() });
        }
    }

    let report = ValidationReport {
        source_file: dataset.source_file.clone(),
        out_dir: out_dir.to_path_buf(),
        images_extracted: extracted.len(),
        images_recorded: dataset.images.len(),
        images_referenced: referenced.len(),
        images_on_disk: on_disk.len(),
        orphaned,
        orphan_tolerance: tolerance,
        missing,
        untracked,
        findings,
    };
    log::info!(
        "[validator] {}: {} fatal, {} warnings",
        report.severity(),
        report.count(Severity::Fatal),
        report.count(Severity::Warning)
    );
    Ok(report)
}

fn list_image_store(dir: &Path) -> Result<BTreeSet<String>> {
    if !dir.is_dir() {
        log::warn!("[validator] image store {} does not exist", dir.display());
        return Ok(BTreeSet::new());
    }
    let mut files = BTreeSet::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            files.insert(entry.file_name().to_string_lossy().into_owned());
        }
    }
    Ok(files)
}

/// Grid and option checks on a dataset that may have been edited by hand.
pub fn structure_problems(dataset: &Dataset, config: &Config) -> Vec<Finding> {
    let mut problems = Vec::new();
    let mut invalid = |detail: String| problems.push(Finding::InvalidStructure { detail });

    let mut category_ids: BTreeMap<u8, usize> = BTreeMap::new();
    for category in &dataset.categories {
        *category_ids.entry(category.id).or_default() += 1;
        if config.dataset.group_for(category.id) != Some(category.group) {
            invalid(format!("category {} is filed under the wrong group {}", category.id, category.group));
        }
    }
    for id in 1..=config.dataset.categories {
        match category_ids.get(&id) {
            None => invalid(format!("category {id} is missing")),
            Some(1) => {}
            Some(n) => invalid(format!("category {id} appears {n} times")),
        }
    }
    for id in category_ids.keys().filter(|id| !(1..=config.dataset.categories).contains(*id)) {
        invalid(format!("category {id} is outside the expected range"));
    }

    let mut slots: BTreeMap<QuestionId, usize> = BTreeMap::new();
    for question in &dataset.questions {
        let id = question.id();
        *slots.entry(id).or_default() += 1;
        if !config.dataset.contains(id) {
            invalid(format!("question {id} is outside the expected grid"));
        }
        let labels: Vec<char> = question.options.iter().map(|o| o.label).collect();
        if labels != OPTION_LABELS {
            invalid(format!(
                "question {id} has options {}, expected ABCD",
                labels.iter().collect::<String>()
            ));
        }
        if question.correct_option_index >= question.options.len() {
            invalid(format!(
                "question {id} marks option {} correct but has {} options",
                question.correct_option_index,
                question.options.len()
            ));
        }
    }
    for id in config.dataset.slots() {
        match slots.get(&id) {
            None => invalid(format!("question {id} is missing")),
            Some(1) => {}
            Some(n) => invalid(format!("question {id} appears {n} times")),
        }
    }
    problems
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatasetConfig;
    use crate::types::{AnswerOption, Category, CategoryGroup, Question};

    fn config() -> Config {
        let mut config = Config::default();
        config.dataset = DatasetConfig { categories: 1, questions_per_category: 2, ..config.dataset };
        config
    }

    fn dataset() -> Dataset {
        Dataset {
            source_file: "bank.pdf".to_string(),
            categories: vec![Category { id: 1, name: "OBEC".to_string(), group: CategoryGroup::CivicBasics }],
            questions: (1..=2)
                .map(|seq| Question {
                    category_id: 1,
                    sequence_number: seq,
                    text: format!("Otázka {seq}?"),
                    options: OPTION_LABELS
                        .iter()
                        .map(|&label| AnswerOption { label, text: label.to_string(), image_ref: None })
                        .collect(),
                    correct_option_index: 0,
                    image_ref: None,
                    updated: None,
                    page: 1,
                })
                .collect(),
            images: Vec::new(),
            artifacts_discarded: 0,
        }
    }

    #[test]
    fn well_formed_dataset_has_no_structure_problems() {
        assert!(structure_problems(&dataset(), &config()).is_empty());
    }

    #[test]
    fn hand_edits_are_caught() {
        let mut edited = dataset();
        edited.questions[0].options.pop();
        edited.questions[1].correct_option_index = 7;
        let problems = structure_problems(&edited, &config());
        assert_eq!(problems.len(), 2);
        assert!(problems.iter().all(|p| p.severity() == Severity::Fatal));
    }

    #[test]
    fn dropped_question_is_reported_missing() {
        let mut edited = dataset();
        edited.questions.remove(1);
        let problems = structure_problems(&edited, &config());
        assert_eq!(problems, vec![Finding::InvalidStructure { detail: "question 1.2 is missing".to_string() }]);
    }

    #[test]
    fn report_severity_is_worst_finding() {
        let mut report = ValidationReport {
            source_file: "bank.pdf".to_string(),
            out_dir: PathBuf::from("out"),
            images_extracted: 0,
            images_recorded: 0,
            images_referenced: 0,
            images_on_disk: 0,
            orphaned: Vec::new(),
            orphan_tolerance: 4,
            missing: Vec::new(),
            untracked: Vec::new(),
            findings: Vec::new(),
        };
        assert_eq!(report.severity(), Severity::Clean);
        report.findings.push(Finding::UntrackedImage { file: "x.png".to_string() });
        assert_eq!(report.severity(), Severity::Warning);
        report.findings.push(Finding::MissingImage { category_id: 22, sequence_number: 5, file: "c22_q05_001.jpg".to_string() });
        assert_eq!(report.severity(), Severity::Fatal);
        let text = report.to_string();
        assert!(text.contains("FAILED: 1 fatal, 1 warning(s)"));
        assert!(text.contains("question 22.5 references missing image c22_q05_001.jpg"));
    }
}
