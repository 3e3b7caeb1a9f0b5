//! Reads the data folder into documents.

use docchat_core::Document;
use std::path::Path;
use walkdir::WalkDir;

const SUPPORTED_EXTENSIONS: &[&str] = &["txt", "md"];

/// Load every `.txt` and `.md` file under `dir`, in file-name order.
///
/// The path relative to `dir` becomes the document id, so chunk ids stay
/// stable between runs. Unreadable files are logged and skipped.
pub fn load_documents(dir: &Path) -> anyhow::Result<Vec<Document>> {
    if !dir.is_dir() {
        anyhow::bail!("Data folder not found: {}", dir.display());
    }

    let mut documents = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name().into_iter().flatten() {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let supported = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| SUPPORTED_EXTENSIONS.contains(&ext.to_lowercase().as_str()));
        if !supported {
            continue;
        }

        match std::fs::read_to_string(path) {
            Ok(text) => {
                let id = path
                    .strip_prefix(dir)
                    .unwrap_or(path)
                    .to_string_lossy()
                    .replace('\\', "/");
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| id.clone());
                documents.push(Document::with_id(id, text, name));
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable file");
            }
        }
    }

    tracing::info!(folder = %dir.display(), documents = documents.len(), "Loaded documents");
    Ok(documents)
}
