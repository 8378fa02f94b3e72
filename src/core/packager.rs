use std::{
    collections::BTreeMap,
    fs::{self, File},
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
};

use zip::{write::SimpleFileOptions, CompressionMethod, ZipWriter};

use crate::{
    error::{Result, StemError},
    types::{StemLabel, StemSet},
};

pub fn archive_name(stems: &StemSet) -> String {
    format!("{}_stems.zip", stems.source_stem())
}

/// Zips the stem set into `dest_dir/<source>_stems.zip`.
///
/// Members are flat file names in canonical label order with a fixed timestamp.
pub fn package(stems: &StemSet, dest_dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(dest_dir)?;
    let archive_path = dest_dir.join(archive_name(stems));

    let file = File::create(&archive_path)?;
    let mut zip = ZipWriter::new(BufWriter::new(file));
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(zip::DateTime::default());

    for (label, path) in stems.iter() {
        let member = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_owned)
            .unwrap_or_else(|| format!("{}_{label}", stems.source_stem()));
        zip.start_file(member, options)?;
        let mut src = File::open(path)?;
        io::copy(&mut src, &mut zip)?;
    }

    zip.finish()?.flush()?;
    tracing::debug!(archive = %archive_path.display(), "packaged stems");
    Ok(archive_path)
}

/// Copies every stem into `dest`, returning the new paths in label order.
pub fn copy_stems(stems: &StemSet, dest: &Path) -> Result<BTreeMap<StemLabel, PathBuf>> {
    fs::create_dir_all(dest)?;
    let mut copied = BTreeMap::new();
    for (label, path) in stems.iter() {
        let file_name = path.file_name().ok_or_else(|| {
            StemError::Separation(format!("stem path has no file name: {}", path.display()))
        })?;
        let target = dest.join(file_name);
        fs::copy(path, &target)?;
        copied.insert(label, target);
    }
    Ok(copied)
}
