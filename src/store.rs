// Output store - all-or-nothing write of questions.json and the image directory
use crate::assembler::Assembly;
use crate::types::{DatabankaError, Dataset, Result};
use std::fs;
use std::path::{Path, PathBuf};

pub const DATASET_FILE: &str = "questions.json";
pub const IMAGE_DIR: &str = "images";

pub fn dataset_path(out_dir: &Path) -> PathBuf {
    out_dir.join(DATASET_FILE)
}

pub fn image_dir(out_dir: &Path) -> PathBuf {
    out_dir.join(IMAGE_DIR)
}

/// Serialized form of a dataset: pretty JSON with a trailing newline.
pub fn to_json(dataset: &Dataset) -> Result<String> {
    let mut json = serde_json::to_string_pretty(dataset)?;
    json.push('\n');
    Ok(json)
}

/// Write the assembly into `out_dir`, replacing any previous output as a whole.
///
/// Everything is staged in a sibling temporary directory first; the previous
/// output is only moved aside once staging succeeded, and is put back if the
/// final rename fails.
pub fn write_output(out_dir: &Path, assembly: &Assembly) -> Result<()> {
    let parent = match out_dir.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent)?;

    let staging = tempfile::Builder::new().prefix(".databanka-staging-").tempdir_in(&parent)?;
    let images = staging.path().join(IMAGE_DIR);
    fs::create_dir_all(&images)?;
    for file in &assembly.files {
        fs::write(images.join(&file.name), &file.bytes)?;
    }
    fs::write(staging.path().join(DATASET_FILE), to_json(&assembly.dataset)?)?;
    log::debug!("[store] staged {} images in {}", assembly.files.len(), staging.path().display());

    let backup = if out_dir.exists() {
        let backup = tempfile::Builder::new().prefix(".databanka-previous-").tempdir_in(&parent)?;
        let backup_path = backup.path().join("output");
        fs::rename(out_dir, &backup_path)?;
        Some((backup, backup_path))
    } else {
        None
    };

    let staged = staging.into_path();
    if let Err(e) = fs::rename(&staged, out_dir) {
        log::warn!("[store] could not move output into place: {}", e);
        if let Some((backup, backup_path)) = backup {
            if let Err(restore) = fs::rename(&backup_path, out_dir) {
                let kept = backup.into_path();
                log::warn!("[store] previous output left at {}: {}", kept.display(), restore);
            }
        }
        let _ = fs::remove_dir_all(&staged);
        return Err(e.into());
    }

    // dropping the backup TempDir removes the previous output
    drop(backup);
    log::info!("[store] wrote {} and {} images to {}", DATASET_FILE, assembly.files.len(), out_dir.display());
    Ok(())
}

pub fn load_dataset(out_dir: &Path) -> Result<Dataset> {
    let path = dataset_path(out_dir);
    let unreadable = |reason: String| DatabankaError::UnreadableDataset { path: path.clone(), reason };
    let content = fs::read_to_string(&path).map_err(|e| unreadable(e.to_string()))?;
    serde_json::from_str(&content).map_err(|e| unreadable(e.to_string()))
}
