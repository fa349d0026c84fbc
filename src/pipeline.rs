// Pipeline driver - reader, segmenter, associator, assembler and store in one pass
use crate::assembler::{self, Assembly};
use crate::associator;
use crate::config::Config;
use crate::pdf_extraction::{PdfReader, RawImage};
use crate::segmenter::{PatternDetector, Segmentation, Segmenter};
use crate::store;
use crate::types::{Result, Severity};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// What one read of the PDF produced, before association.
#[derive(Debug)]
pub struct Extraction {
    pub pages: usize,
    pub segmentation: Segmentation,
    pub images: Vec<RawImage>,
    pub artifacts_discarded: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub out_dir: PathBuf,
    pub pages: usize,
    pub categories: usize,
    pub questions: usize,
    pub images: usize,
    pub linked: usize,
    pub anomalies: usize,
    pub artifacts_discarded: usize,
}

impl RunSummary {
    pub fn severity(&self) -> Severity {
        if self.anomalies > 0 {
            Severity::Warning
        } else {
            Severity::Clean
        }
    }
}

/// `<stem>_dataset` next to the PDF.
pub fn default_output_dir(pdf: &Path) -> PathBuf {
    let stem = pdf.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_else(|| "questions".to_string());
    pdf.with_file_name(format!("{stem}_dataset"))
}

pub fn source_name(pdf: &Path) -> String {
    pdf.file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| pdf.display().to_string())
}

/// Drop images below the artifact threshold, returning the survivors and how many went.
pub fn discard_artifacts(images: Vec<RawImage>, min_bytes: usize) -> (Vec<RawImage>, usize) {
    let before = images.len();
    let kept: Vec<RawImage> = images.into_iter().filter(|i| i.encoded.bytes.len() >= min_bytes).collect();
    let discarded = before - kept.len();
    if discarded > 0 {
        log::info!("[reader] discarded {} artifact images under {} bytes", discarded, min_bytes);
    }
    (kept, discarded)
}

/// Read every page once, segmenting text and collecting images as it goes.
pub fn read_document(pdf: &Path, config: &Config) -> Result<Extraction> {
    let reader = PdfReader::open(pdf)?;
    let detector = PatternDetector::new(&config.layout, config.dataset.questions_per_category)?;
    let mut segmenter = Segmenter::new(detector, &config.dataset);
    let mut images = Vec::new();

    for page in reader.pages() {
        let page = page?;
        segmenter.feed_page(page.number, &page.lines(config.layout.row_tolerance));
        images.extend(page.images);
    }

    let (images, artifacts_discarded) = discard_artifacts(images, config.images.min_bytes);
    Ok(Extraction {
        pages: reader.page_count(),
        segmentation: segmenter.finish(),
        images,
        artifacts_discarded,
    })
}

/// Images only, with the same artifact filter the extraction applies.
pub fn extract_images(pdf: &Path, config: &Config) -> Result<(Vec<RawImage>, usize)> {
    let reader = PdfReader::open(pdf)?;
    let mut images = Vec::new();
    for page in reader.pages() {
        images.extend(page?.images);
    }
    Ok(discard_artifacts(images, config.images.min_bytes))
}

/// Build the dataset in memory without touching the output directory.
pub fn build(pdf: &Path, config: &Config) -> Result<(Assembly, usize)> {
    let extraction = read_document(pdf, config)?;
    let categories = extraction.segmentation.into_result()?;
    let association = associator::associate(&categories, &extraction.images, &config.images);
    let assembly = assembler::assemble(
        &source_name(pdf),
        categories,
        extraction.images,
        &association,
        extraction.artifacts_discarded,
        config,
    )?;
    Ok((assembly, extraction.pages))
}

pub fn extract(pdf: &Path, out_dir: &Path, config: &Config) -> Result<RunSummary> {
    log::info!("[pipeline] extracting {} into {}", pdf.display(), out_dir.display());
    let (assembly, pages) = build(pdf, config)?;
    store::write_output(out_dir, &assembly)?;

    let dataset = &assembly.dataset;
    Ok(RunSummary {
        out_dir: out_dir.to_path_buf(),
        pages,
        categories: dataset.categories.len(),
        questions: dataset.questions.len(),
        images: dataset.images.len(),
        linked: dataset.images.iter().filter(|i| i.disposition.question().is_some()).count(),
        anomalies: dataset.images.iter().filter(|i| i.disposition.is_anomaly()).count(),
        artifacts_discarded: dataset.artifacts_discarded,
    })
}
