use crate::{
    error::{Result, StemError},
    io::{
        crypto::verify_sha256,
        net::{download_with_progress, http_client},
        paths::models_cache_dir,
    },
    model::registry::resolve_manifest_url,
    types::ModelManifest,
};

use once_cell::sync::Lazy;
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

// One lock per cached artifact path. Different registry names and devices can
// resolve to the same file.
static ARTIFACT_LOCKS: Lazy<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

fn artifact_lock(path: &Path) -> Arc<Mutex<()>> {
    let mut locks = ARTIFACT_LOCKS.lock().unwrap_or_else(|p| p.into_inner());
    Arc::clone(locks.entry(path.to_path_buf()).or_default())
}

/// A verified model artifact on local disk.
#[derive(Debug, Clone)]
pub struct ModelHandle {
    pub manifest: ModelManifest,
    pub local_path: PathBuf,
}

/// Fetches the manifest, downloads the primary artifact if the cached copy is
/// missing or fails its checksum, and returns the local path.
pub fn ensure_model(model_name: &str, manifest_url_override: Option<&str>) -> Result<ModelHandle> {
    let manifest_url = match manifest_url_override {
        Some(url) => url.to_string(),
        None => resolve_manifest_url(model_name)?,
    };

    let client = http_client()?;
    let manifest: ModelManifest = client
        .get(&manifest_url)
        .send()?
        .error_for_status()?
        .json()?;

    let a = manifest
        .resolve_primary_artifact()
        .map_err(StemError::Manifest)?;
    if a.sha256.len() < 8 {
        return Err(StemError::Manifest(format!(
            "artifact `{}` has no usable sha256",
            a.file
        )));
    }

    let cache_dir = models_cache_dir()?;
    fs::create_dir_all(&cache_dir)?;
    let ext = a
        .file
        .rsplit_once('.')
        .map(|(_, s)| format!(".{s}"))
        .unwrap_or_default();
    let file_name = format!("{}-{}{}", manifest.name, &a.sha256[..8], ext);
    let local_path = cache_dir.join(file_name);

    // Held across verify, download and re-verify so a concurrent loader never
    // sees a half-written file or loses one to a failed checksum here.
    let lock = artifact_lock(&local_path);
    let _held = lock.lock().unwrap_or_else(|p| p.into_inner());

    let need_download = !matches!(verify_sha256(&local_path, &a.sha256), Ok(true));
    if need_download {
        tracing::info!(model = %manifest.name, url = %a.url, "downloading model artifact");
        download_with_progress(&client, &a.url, &local_path)?;
        if !verify_sha256(&local_path, &a.sha256)? {
            fs::remove_file(&local_path).ok();
            return Err(StemError::Checksum {
                path: local_path.display().to_string(),
            });
        }
        if a.size_bytes > 0 {
            let size = fs::metadata(&local_path).map(|m| m.len()).unwrap_or(0);
            if size != a.size_bytes {
                tracing::warn!(
                    path = %local_path.display(),
                    expected = a.size_bytes,
                    got = size,
                    "model size mismatch"
                );
            }
        }
    } else {
        tracing::debug!(path = %local_path.display(), "model artifact cache hit");
    }

    Ok(ModelHandle {
        manifest,
        local_path,
    })
}
