// Dataset assembler - merges segmentation and association into the persisted dataset
use crate::associator::Association;
use crate::config::Config;
use crate::pdf_extraction::RawImage;
use crate::segmenter::CategoryBlock;
use crate::types::{
    AnswerOption, Category, DatabankaError, Dataset, Disposition, ImageAsset, ImageSlot, Question, QuestionId, Result,
};
use std::collections::{BTreeMap, BTreeSet};

/// Bytes for one file of the image store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

/// A finished dataset together with the image files it describes.
#[derive(Debug, Clone, PartialEq)]
pub struct Assembly {
    pub dataset: Dataset,
    pub files: Vec<ImageFile>,
}

/// Deterministic file name for an image given where it ended up.
pub fn image_file_name(image: &RawImage, disposition: &Disposition) -> String {
    let ext = image.encoded.format;
    match disposition.question() {
        Some(id) => format!(
            "c{:02}_q{:02}_{:03}.{}",
            id.category_id, id.sequence_number, image.extraction_order, ext
        ),
        None => format!("p{:03}_{:03}.{}", image.page, image.extraction_order, ext),
    }
}

pub fn assemble(
    source_file: &str,
    categories: Vec<CategoryBlock>,
    images: Vec<RawImage>,
    association: &Association,
    artifacts_discarded: usize,
    config: &Config,
) -> Result<Assembly> {
    let mut by_slot: BTreeMap<QuestionId, usize> = BTreeMap::new();
    let mut unexpected = BTreeSet::new();
    let mut unresolved = BTreeSet::new();
    for question in categories.iter().flat_map(|c| c.questions.iter()) {
        let id = question.id();
        if !config.dataset.contains(id) {
            unexpected.insert(id);
        } else if question.correct_option_index.is_none() {
            unresolved.insert(id);
        } else {
            *by_slot.entry(id).or_default() += 1;
        }
    }
    let missing: Vec<QuestionId> = config
        .dataset
        .slots()
        .filter(|id| by_slot.get(id) != Some(&1) || unresolved.contains(id))
        .collect();
    if !missing.is_empty() || !unexpected.is_empty() {
        log::warn!("[assembler] {} slots missing, {} unexpected", missing.len(), unexpected.len());
        return Err(DatabankaError::IncompleteDataset { missing, unexpected: unexpected.into_iter().collect() });
    }

    // image references per question, in slot order
    let mut refs: BTreeMap<QuestionId, Vec<(ImageSlot, String)>> = BTreeMap::new();
    let mut assets = Vec::with_capacity(images.len());
    let mut files = Vec::with_capacity(images.len());
    let mut images = images;
    images.sort_by_key(|image| image.extraction_order);
    for image in images {
        let disposition = association
            .get(image.extraction_order)
            .cloned()
            .unwrap_or_else(|| Disposition::anomaly("not considered by the associator"));
        let name = image_file_name(&image, &disposition);
        if let Disposition::Linked { slot, .. } = &disposition {
            if let Some(id) = disposition.question() {
                refs.entry(id).or_default().push((*slot, name.clone()));
            }
        }
        assets.push(ImageAsset {
            file: name.clone(),
            page: image.page,
            extraction_order: image.extraction_order,
            width: image.encoded.width,
            height: image.encoded.height,
            format: image.encoded.format.to_string(),
            byte_len: image.encoded.bytes.len(),
            disposition,
        });
        files.push(ImageFile { name, bytes: image.encoded.bytes });
    }

    let mut dataset_categories = Vec::with_capacity(categories.len());
    let mut questions = Vec::with_capacity(config.dataset.total_questions());
    for block in categories {
        let group = config
            .dataset
            .group_for(block.id)
            .ok_or_else(|| DatabankaError::Config(format!("category {} has no group", block.id)))?;
        dataset_categories.push(Category { id: block.id, name: block.name, group });

        for q in block.questions {
            let id = q.id();
            let slots = refs.remove(&id).unwrap_or_default();
            let image_ref = slots
                .iter()
                .find(|(slot, _)| *slot == ImageSlot::Question)
                .map(|(_, name)| name.clone());
            let options = q
                .options
                .into_iter()
                .map(|o| AnswerOption {
                    label: o.label,
                    image_ref: slots
                        .iter()
                        .find(|(slot, _)| *slot == ImageSlot::Option(o.label))
                        .map(|(_, name)| name.clone()),
                    text: o.text,
                })
                .collect();
            questions.push(Question {
                category_id: q.category_id,
                sequence_number: q.sequence_number,
                text: q.text,
                options,
                correct_option_index: q.correct_option_index.unwrap_or_default(),
                image_ref,
                updated: q.updated,
                page: q.anchor.page,
            });
        }
    }
    dataset_categories.sort_by_key(|c| c.id);
    questions.sort_by_key(|q| q.id());

    log::info!(
        "[assembler] {} categories, {} questions, {} images ({} discarded as artifacts)",
        dataset_categories.len(),
        questions.len(),
        assets.len(),
        artifacts_discarded
    );
    Ok(Assembly {
        dataset: Dataset {
            source_file: source_file.to_string(),
            categories: dataset_categories,
            questions,
            images: assets,
            artifacts_discarded,
        },
        files,
    })
}
