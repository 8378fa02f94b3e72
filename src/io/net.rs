use crate::{error::Result, io::progress::emit_download_progress};
use reqwest::blocking::Client;
use std::{
    io::{Read, Write},
    path::Path,
    time::Duration,
};
use tempfile::NamedTempFile;

pub fn http_client() -> Result<Client> {
    let client = Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(60 * 60))
        .build()?;
    Ok(client)
}

/// Streams `url` into a uniquely named temp file next to `dest`, then renames it
/// into place. A crash never leaves a truncated artifact under the final name.
pub fn download_with_progress(client: &Client, url: &str, dest: &Path) -> Result<()> {
    let dir = dest.parent().unwrap_or_else(|| Path::new("."));

    let mut resp = client.get(url).send()?.error_for_status()?;

    let total = resp.content_length().unwrap_or(0);

    emit_download_progress(0, total);

    let mut file = NamedTempFile::new_in(dir)?;
    let mut downloaded: u64 = 0;
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = resp.read(&mut buf)?;
        if n == 0 {
            break;
        }
        file.write_all(&buf[..n])?;
        downloaded += n as u64;
        emit_download_progress(downloaded, total);
    }
    file.flush()?;
    file.persist(dest).map_err(|e| e.error)?;

    tracing::debug!(url, bytes = downloaded, dest = %dest.display(), "download complete");
    emit_download_progress(total.max(downloaded), total.max(downloaded));

    Ok(())
}
