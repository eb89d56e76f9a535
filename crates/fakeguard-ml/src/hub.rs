//! Model file resolution: HuggingFace Hub download or a local directory.

use fakeguard_core::{FakeguardError, Result};
use std::path::{Path, PathBuf};

/// Resolve `files` inside the model repository `model_id`.
///
/// If `model_id` names an existing local directory the files are taken from
/// it directly (offline use). Otherwise they are downloaded from the
/// HuggingFace Hub into `cache_dir` (or the hub's default cache).
///
/// Returns the local paths in the order of `files`.
pub async fn resolve_model_files(
    model_id: &str,
    files: &[&str],
    cache_dir: Option<&str>,
) -> Result<Vec<PathBuf>> {
    let local = Path::new(model_id);
    if local.is_dir() {
        return files
            .iter()
            .map(|file| {
                let path = local.join(file);
                if path.is_file() {
                    Ok(path)
                } else {
                    Err(FakeguardError::Embedding(format!(
                        "{} not found in local model directory {}",
                        file,
                        local.display()
                    )))
                }
            })
            .collect();
    }

    use hf_hub::api::tokio::{Api, ApiBuilder};

    let api = match cache_dir {
        Some(dir) => ApiBuilder::new().with_cache_dir(PathBuf::from(dir)).build(),
        None => Api::new(),
    }
    .map_err(|e| FakeguardError::Embedding(format!("Failed to create HF API client: {e}")))?;

    let repo = api.model(model_id.to_string());

    let mut paths = Vec::with_capacity(files.len());
    for file in files {
        let path = repo.get(file).await.map_err(|e| {
            FakeguardError::Embedding(format!("Failed to download {file} from {model_id}: {e}"))
        })?;
        paths.push(path);
    }

    tracing::debug!(model_id, files = files.len(), "Model files resolved");
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_local_directory_resolution() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.json"), "{}").unwrap();

        let model_id = dir.path().to_str().unwrap();
        let paths = resolve_model_files(model_id, &["config.json"], None)
            .await
            .unwrap();
        assert_eq!(paths, vec![dir.path().join("config.json")]);

        let missing = resolve_model_files(model_id, &["tokenizer.json"], None).await;
        assert!(missing.is_err());
    }
}
