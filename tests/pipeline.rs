// End-to-end runs of extraction and validation over synthetic banks
mod common;

use common::{correct_label, write_bank, write_encrypted_bank, BankOptions, CATEGORIES};
use databanka::types::{
    CategoryGroup, Disposition, ImageSlot, OrphanReason, QuestionId, SegmentationErrorKind, OPTION_LABELS,
};
use databanka::validator::{self, Finding};
use databanka::{pipeline, store, Config, DatabankaError, Severity};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

fn extract_into(dir: &Path, options: &BankOptions) -> (std::path::PathBuf, std::path::PathBuf) {
    let pdf = write_bank(dir, options);
    let out = pipeline::default_output_dir(&pdf);
    pipeline::extract(&pdf, &out, &Config::default()).unwrap();
    (pdf, out)
}

#[test]
fn full_bank_yields_three_hundred_questions() {
    let dir = tempfile::tempdir().unwrap();
    let (_, out) = extract_into(dir.path(), &BankOptions::default());
    let dataset = store::load_dataset(&out).unwrap();

    assert_eq!(dataset.source_file, "banka.pdf");
    assert_eq!(dataset.categories.len(), CATEGORIES as usize);
    assert_eq!(dataset.questions.len(), 300);
    let ids: BTreeSet<QuestionId> = dataset.questions.iter().map(|q| q.id()).collect();
    assert_eq!(ids.len(), 300);

    for question in &dataset.questions {
        let labels: Vec<char> = question.options.iter().map(|o| o.label).collect();
        assert_eq!(labels, OPTION_LABELS);
        let expected = correct_label(question.category_id, question.sequence_number);
        assert_eq!(question.options[question.correct_option_index].label, expected);
        assert_eq!(question.updated.as_deref(), Some("1. 9. 2023"));
    }

    assert_eq!(dataset.category(16).unwrap().group, CategoryGroup::CivicBasics);
    assert_eq!(dataset.category(21).unwrap().group, CategoryGroup::Geography);
    assert_eq!(dataset.category(22).unwrap().name, "TÉMATICKÝ OKRUH 22");
    assert_eq!(dataset.category(22).unwrap().group, CategoryGroup::History);
}

#[test]
fn pictures_are_linked_to_their_questions() {
    let dir = tempfile::tempdir().unwrap();
    let (_, out) = extract_into(dir.path(), &BankOptions::default());
    let dataset = store::load_dataset(&out).unwrap();

    let history = dataset.question(QuestionId::new(22, 5)).unwrap();
    assert_eq!(history.options.len(), 4);
    let file = history.image_ref.as_deref().unwrap();
    assert!(store::image_dir(&out).join(file).is_file());

    let grid = dataset.question(QuestionId::new(20, 5)).unwrap();
    assert_eq!(grid.image_ref, None);
    assert!(grid.options.iter().all(|o| o.image_ref.is_some()));

    assert!(dataset.question(QuestionId::new(5, 10)).unwrap().image_ref.is_some());
    assert_eq!(dataset.image_references().len(), 6);

    assert_eq!(dataset.artifacts_discarded, 1);
    assert_eq!(dataset.images.len(), 7);
    let cover = &dataset.images[0];
    assert_eq!(cover.page, 1);
    assert_eq!(cover.disposition, Disposition::ExpectedOrphan { reason: OrphanReason::Cover });
    let option_slots: Vec<ImageSlot> = dataset
        .images
        .iter()
        .filter_map(|i| match &i.disposition {
            Disposition::Linked { category_id: 20, slot, .. } => Some(*slot),
            _ => None,
        })
        .collect();
    assert_eq!(option_slots.len(), 4);
}

#[test]
fn rerun_is_byte_identical() {
    let dir = tempfile::tempdir().unwrap();
    let (pdf, out) = extract_into(dir.path(), &BankOptions::default());
    let first_json = fs::read(store::dataset_path(&out)).unwrap();
    let first_images: Vec<(String, Vec<u8>)> = read_images(&out);

    pipeline::extract(&pdf, &out, &Config::default()).unwrap();
    assert_eq!(fs::read(store::dataset_path(&out)).unwrap(), first_json);
    assert_eq!(read_images(&out), first_images);
}

fn read_images(out: &Path) -> Vec<(String, Vec<u8>)> {
    let mut files: Vec<(String, Vec<u8>)> = fs::read_dir(store::image_dir(out))
        .unwrap()
        .map(|e| e.unwrap())
        .map(|e| (e.file_name().to_string_lossy().into_owned(), fs::read(e.path()).unwrap()))
        .collect();
    files.sort();
    files
}

#[test]
fn fresh_output_validates_clean() {
    let dir = tempfile::tempdir().unwrap();
    let (pdf, out) = extract_into(dir.path(), &BankOptions::default());
    let report = validator::validate(&pdf, &out, &Config::default()).unwrap();

    assert_eq!(report.severity(), Severity::Clean, "{report}");
    assert!(report.missing.is_empty());
    assert_eq!(report.orphaned.len(), 1);
    assert!(report.orphaned.len() <= report.orphan_tolerance);
    assert_eq!(report.images_extracted, 7);
    assert_eq!(report.images_recorded, 7);
    assert_eq!(report.images_on_disk, 7);
    assert_eq!(report.images_referenced, 6);
}

#[test]
fn deleted_image_is_reported_for_exactly_its_question() {
    let dir = tempfile::tempdir().unwrap();
    let (pdf, out) = extract_into(dir.path(), &BankOptions::default());
    let dataset = store::load_dataset(&out).unwrap();
    let file = dataset.question(QuestionId::new(22, 5)).unwrap().image_ref.clone().unwrap();
    fs::remove_file(store::image_dir(&out).join(&file)).unwrap();

    let report = validator::validate(&pdf, &out, &Config::default()).unwrap();
    assert_eq!(report.severity(), Severity::Fatal);
    assert_eq!(report.missing, vec![file.clone()]);
    let missing: Vec<&Finding> = report
        .findings
        .iter()
        .filter(|f| matches!(f, Finding::MissingImage { .. }))
        .collect();
    assert_eq!(
        missing,
        vec![&Finding::MissingImage { category_id: 22, sequence_number: 5, file }]
    );
}

#[test]
fn tighter_tolerance_turns_orphans_into_a_warning() {
    let dir = tempfile::tempdir().unwrap();
    let (pdf, out) = extract_into(dir.path(), &BankOptions::default());
    let mut config = Config::default();
    config.validation.orphan_tolerance = 0;
    let report = validator::validate(&pdf, &out, &config).unwrap();
    assert_eq!(report.severity(), Severity::Warning);
    assert!(report
        .findings
        .contains(&Finding::OrphansOverTolerance { count: 1, tolerance: 0 }));
}

#[test]
fn stray_file_in_image_store_is_untracked() {
    let dir = tempfile::tempdir().unwrap();
    let (pdf, out) = extract_into(dir.path(), &BankOptions::default());
    fs::write(store::image_dir(&out).join("extra.png"), b"not ours").unwrap();
    let report = validator::validate(&pdf, &out, &Config::default()).unwrap();
    assert_eq!(report.untracked, vec!["extra.png".to_string()]);
    assert_eq!(report.severity(), Severity::Warning);
}

#[test]
fn missing_heading_names_the_category() {
    let dir = tempfile::tempdir().unwrap();
    let pdf = write_bank(dir.path(), &BankOptions { skip_heading: Some(12), ..Default::default() });
    let out = pipeline::default_output_dir(&pdf);

    match pipeline::extract(&pdf, &out, &Config::default()) {
        Err(DatabankaError::Segmentation(errors)) => {
            assert!(errors
                .iter()
                .any(|e| e.category == Some(12) && e.kind == SegmentationErrorKind::MissingCategory));
        }
        other => panic!("expected segmentation failure, got {other:?}"),
    }
    assert!(!out.exists());
}

#[test]
fn eleven_questions_is_a_count_mismatch() {
    let dir = tempfile::tempdir().unwrap();
    let pdf = write_bank(dir.path(), &BankOptions { extra_question: Some(7), ..Default::default() });
    let out = pipeline::default_output_dir(&pdf);

    match pipeline::extract(&pdf, &out, &Config::default()) {
        Err(DatabankaError::Segmentation(errors)) => {
            assert!(errors
                .iter()
                .any(|e| e.category == Some(7) && e.kind == SegmentationErrorKind::QuestionCount { found: 11 }));
        }
        other => panic!("expected segmentation failure, got {other:?}"),
    }
    assert!(!out.exists());
}

#[test]
fn failed_run_leaves_previous_output_alone() {
    let dir = tempfile::tempdir().unwrap();
    let (_, out) = extract_into(dir.path(), &BankOptions::default());
    let before = fs::read(store::dataset_path(&out)).unwrap();

    let broken = write_bank(dir.path(), &BankOptions { extra_question: Some(3), ..Default::default() });
    assert!(pipeline::extract(&broken, &out, &Config::default()).is_err());
    assert_eq!(fs::read(store::dataset_path(&out)).unwrap(), before);
}

#[test]
fn unreadable_input_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let pdf = dir.path().join("banka.pdf");
    fs::write(&pdf, b"<html>not a pdf</html>").unwrap();
    let out = dir.path().join("out");

    let err = pipeline::extract(&pdf, &out, &Config::default()).unwrap_err();
    assert!(matches!(err, DatabankaError::UnreadablePdf { .. }), "{err}");
    let err = pipeline::extract(&dir.path().join("missing.pdf"), &out, &Config::default()).unwrap_err();
    assert!(matches!(err, DatabankaError::UnreadablePdf { .. }), "{err}");
    assert!(!out.exists());
}

#[test]
fn encrypted_input_is_rejected_before_anything_is_written() {
    let dir = tempfile::tempdir().unwrap();
    let pdf = write_encrypted_bank(dir.path());
    let out = dir.path().join("out");

    match pipeline::extract(&pdf, &out, &Config::default()) {
        Err(DatabankaError::UnreadablePdf { path, reason }) => {
            assert_eq!(path, pdf);
            assert!(reason.contains("encrypted"), "{reason}");
        }
        other => panic!("expected an unreadable PDF, got {other:?}"),
    }
    assert!(!out.exists());

    let (_, out) = extract_into(dir.path(), &BankOptions::default());
    let err = validator::validate(&pdf, &out, &Config::default()).unwrap_err();
    assert!(matches!(err, DatabankaError::UnreadablePdf { .. }), "{err}");
}

#[test]
fn validating_without_output_fails() {
    let dir = tempfile::tempdir().unwrap();
    let pdf = write_bank(dir.path(), &BankOptions::default());
    let err = validator::validate(&pdf, &dir.path().join("nowhere"), &Config::default()).unwrap_err();
    assert!(matches!(err, DatabankaError::UnreadableDataset { .. }));
}
