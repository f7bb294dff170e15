//! Corpus loading from plain-text files.
//!
//! Training data lives in one subdirectory per label; documents to classify
//! sit directly in a single directory. Only `.txt` files are read.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use docsort_classifier::Document;
use tracing::{debug, info};
use walkdir::WalkDir;

/// Load labeled documents from `<root>/<label>/*.txt`.
///
/// Labels are lowercased directory names.
pub fn load_training(root: &Path) -> Result<Vec<Document>> {
    let mut documents = Vec::new();

    let label_dirs = WalkDir::new(root)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir());

    for dir in label_dirs {
        let label = dir.file_name().to_string_lossy().to_lowercase();
        let before = documents.len();
        for (identifier, text) in read_text_files(dir.path())? {
            documents.push(Document::training(identifier, label.as_str(), text));
        }
        debug!("Label {label}: {} documents", documents.len() - before);
    }

    info!(
        "Loaded {} training documents from {}",
        documents.len(),
        root.display()
    );
    Ok(documents)
}

/// Load unlabeled documents from `<dir>/*.txt`.
pub fn load_queries(dir: &Path) -> Result<Vec<Document>> {
    let documents: Vec<Document> = read_text_files(dir)?
        .into_iter()
        .map(|(identifier, text)| Document::query(identifier, text))
        .collect();

    info!("Loaded {} documents to classify from {}", documents.len(), dir.display());
    Ok(documents)
}

/// Read every `.txt` file directly inside `dir`, sorted by name.
///
/// Identifiers are file names with spaces replaced by `_`.
fn read_text_files(dir: &Path) -> Result<Vec<(String, String)>> {
    if !dir.is_dir() {
        anyhow::bail!("not a directory: {}", dir.display());
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.with_context(|| format!("reading {}", dir.display()))?;
        let path = entry.path();
        if !entry.file_type().is_file()
            || !path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("txt"))
        {
            continue;
        }

        let text =
            fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let identifier = entry.file_name().to_string_lossy().replace(' ', "_");
        files.push((identifier, text));
    }

    Ok(files)
}
