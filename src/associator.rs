// Image associator - decides which question (or option) each extracted image belongs to
use crate::config::ImageConfig;
use crate::pdf_extraction::RawImage;
use crate::segmenter::{Anchor, CategoryBlock, QuestionBlock};
use crate::types::{Disposition, ImageSlot, OrphanReason, QuestionId, OPTION_LABELS};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// One disposition per extracted image, keyed by extraction order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Association {
    pub dispositions: BTreeMap<u32, Disposition>,
}

impl Association {
    pub fn get(&self, extraction_order: u32) -> Option<&Disposition> {
        self.dispositions.get(&extraction_order)
    }

    pub fn linked(&self) -> usize {
        self.dispositions.values().filter(|d| d.question().is_some()).count()
    }

    pub fn anomalies(&self) -> usize {
        self.dispositions.values().filter(|d| d.is_anomaly()).count()
    }
}

#[derive(Debug, Copy, Clone)]
enum Boundary<'a> {
    Heading,
    Question(&'a QuestionBlock),
}

// A boundary and the slice of its page it owns: from its own depth down to the next
// boundary on the same page, or to the bottom of the page.
#[derive(Debug, Copy, Clone)]
struct Region<'a> {
    anchor: Anchor,
    end: f32,
    boundary: Boundary<'a>,
}

impl Region<'_> {
    fn overlap(&self, image: &RawImage) -> f32 {
        if self.anchor.page != image.page {
            return 0.0;
        }
        let (top, bottom) = image_span(image);
        bottom.min(self.end) - top.max(self.anchor.depth)
    }
}

fn reading_order(a: &Anchor, b: &Anchor) -> Ordering {
    a.page.cmp(&b.page).then(a.depth.total_cmp(&b.depth))
}

fn image_anchor(image: &RawImage) -> Anchor {
    Anchor { page: image.page, depth: image.depth }
}

fn image_span(image: &RawImage) -> (f32, f32) {
    (image.depth, image.depth + image.rect.height().max(0.0))
}

fn regions(categories: &[CategoryBlock]) -> Vec<Region<'_>> {
    let mut boundaries: Vec<(Anchor, Boundary<'_>)> = Vec::new();
    for category in categories {
        boundaries.push((category.anchor, Boundary::Heading));
        for question in &category.questions {
            boundaries.push((question.anchor, Boundary::Question(question)));
        }
    }
    boundaries.sort_by(|a, b| reading_order(&a.0, &b.0));

    let mut regions = Vec::with_capacity(boundaries.len());
    for (i, (anchor, boundary)) in boundaries.iter().enumerate() {
        let end = match boundaries.get(i + 1) {
            Some((next, _)) if next.page == anchor.page => next.depth,
            _ => f32::INFINITY,
        };
        regions.push(Region { anchor: *anchor, end, boundary: *boundary });
    }
    regions
}

// The region the image overlaps most on its own page, else the last one above it.
fn owning_region<'r, 'a>(regions: &'r [Region<'a>], image: &RawImage) -> Option<&'r Region<'a>> {
    let overlapping = regions
        .iter()
        .map(|region| (region.overlap(image), region))
        .filter(|(overlap, _)| *overlap > 0.0)
        .max_by(|a, b| a.0.total_cmp(&b.0).then(reading_order(&b.1.anchor, &a.1.anchor)))
        .map(|(_, region)| region);
    overlapping.or_else(|| {
        let anchor = image_anchor(image);
        regions
            .iter()
            .take_while(|region| reading_order(&region.anchor, &anchor) != Ordering::Greater)
            .last()
    })
}

pub fn associate(categories: &[CategoryBlock], images: &[RawImage], config: &ImageConfig) -> Association {
    let regions = regions(categories);

    let first_heading_page = categories.iter().map(|c| c.anchor.page).min();
    let last_question_page = categories
        .iter()
        .flat_map(|c| c.questions.iter())
        .map(|q| q.anchor.page)
        .max();

    let mut association = Association::default();
    let mut candidates: BTreeMap<QuestionId, (&QuestionBlock, Vec<&RawImage>)> = BTreeMap::new();

    for image in images {
        let disposition = match owning_region(&regions, image) {
            _ if first_heading_page.map_or(true, |page| image.page < page) => {
                Disposition::ExpectedOrphan { reason: OrphanReason::Cover }
            }
            None => Disposition::ExpectedOrphan { reason: OrphanReason::Cover },
            _ if last_question_page.map_or(false, |page| image.page > page) => {
                Disposition::ExpectedOrphan { reason: OrphanReason::Trailing }
            }
            Some(Region { boundary: Boundary::Heading, .. }) => {
                Disposition::ExpectedOrphan { reason: OrphanReason::SectionHeader }
            }
            Some(Region { anchor, boundary: Boundary::Question(question), .. }) => {
                if anchor.page == image.page || anchor.page + 1 == image.page {
                    candidates
                        .entry(question.id())
                        .or_insert_with(|| (*question, Vec::new()))
                        .1
                        .push(image);
                    continue;
                }
                Disposition::anomaly(format!(
                    "nearest question {} is on page {}, image on page {}",
                    question.id(),
                    anchor.page,
                    image.page
                ))
            }
        };
        association.dispositions.insert(image.extraction_order, disposition);
    }

    for (id, (question, mut linked)) in candidates {
        let refusal = if config.is_excluded(id) {
            Some(format!("question {id} is excluded from images"))
        } else if !mentions_picture(question, config) {
            Some(format!("question {id} does not refer to a picture"))
        } else {
            None
        };
        if let Some(reason) = refusal {
            log::debug!("[associator] {}, {} image(s) marked anomalous", reason, linked.len());
            for image in linked {
                association.dispositions.insert(image.extraction_order, Disposition::anomaly(reason.clone()));
            }
            continue;
        }

        let short_options = question.options.len() == OPTION_LABELS.len()
            && question.options.iter().all(|o| o.text.chars().count() < config.short_option_chars);

        if linked.len() >= OPTION_LABELS.len() && short_options {
            for (i, image) in grid_order(linked).into_iter().enumerate() {
                let disposition = match OPTION_LABELS.get(i) {
                    Some(label) => Disposition::linked(id, ImageSlot::Option(*label)),
                    None => Disposition::anomaly(format!("extra picture for question {id}")),
                };
                association.dispositions.insert(image.extraction_order, disposition);
            }
        } else {
            linked.sort_by(|a, b| reading_order(&image_anchor(a), &image_anchor(b)).then(a.rect.x0.total_cmp(&b.rect.x0)));
            for (i, image) in linked.iter().enumerate() {
                let disposition = if i == 0 {
                    Disposition::linked(id, ImageSlot::Question)
                } else {
                    Disposition::anomaly(format!("question {id} already has a picture"))
                };
                association.dispositions.insert(image.extraction_order, disposition);
            }
        }
    }

    log::info!(
        "[associator] {} images: {} linked, {} anomalies",
        association.dispositions.len(),
        association.linked(),
        association.anomalies()
    );
    association
}

fn mentions_picture(question: &QuestionBlock, config: &ImageConfig) -> bool {
    config.mentions_picture(&question.text) || question.options.iter().any(|o| config.mentions_picture(&o.text))
}

// Reading order for a grid of pictures: rows are runs of images whose vertical spans
// overlap, taken top to bottom per page, left to right within a row.
fn grid_order(mut images: Vec<&RawImage>) -> Vec<&RawImage> {
    images.sort_by(|a, b| reading_order(&image_anchor(a), &image_anchor(b)));
    let mut rows: Vec<(u32, f32, f32, Vec<&RawImage>)> = Vec::new();
    for image in images {
        let (top, bottom) = image_span(image);
        match rows.last_mut() {
            Some((page, row_top, row_bottom, row))
                if *page == image.page && (top < *row_bottom || top <= *row_top) =>
            {
                *row_bottom = (*row_bottom).max(bottom);
                row.push(image);
            }
            _ => rows.push((image.page, top, bottom, vec![image])),
        }
    }
    rows.into_iter()
        .flat_map(|(_, _, _, mut row)| {
            row.sort_by(|a, b| a.rect.x0.total_cmp(&b.rect.x0));
            row
        })
        .collect()
}
