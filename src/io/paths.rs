use crate::error::{Result, StemError};
use directories::ProjectDirs;
use std::{env, path::PathBuf};

/// Where verified model artifacts are kept between runs.
pub fn models_cache_dir() -> Result<PathBuf> {
    if let Ok(dir) = env::var("STEM_SPLITTER_MODEL_DIR") {
        return Ok(PathBuf::from(dir));
    }
    let proj = ProjectDirs::from("dev", "StemSplitter", "stem-splitter")
        .ok_or(StemError::CacheDirUnavailable)?;
    let mut p = PathBuf::from(proj.cache_dir());
    p.push("models");
    Ok(p)
}

/// Root under which per-job workspaces are created.
pub fn workspace_root() -> PathBuf {
    env::var("STEM_SPLITTER_TMP_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| env::temp_dir().join("stem-splitter"))
}
