// datasnap/src/restore/s3_download.rs
use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io::{BufReader, ErrorKind, Write, copy};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use crate::backup::s3_upload::s3_client;
use crate::config::SpacesConfig;
use crate::errors::SnapshotError;

/// Parses an S3 URI (s3://bucket/key) into bucket and key.
pub fn parse_s3_uri(s3_uri: &str) -> Result<(String, String)> {
    let uri = url::Url::parse(s3_uri)
        .with_context(|| format!("Invalid S3 URI format: {}", s3_uri))?;
    if uri.scheme() != "s3" {
        return Err(anyhow::anyhow!("S3 URI must start with s3://"));
    }
    let bucket = uri.host_str().context("S3 URI missing bucket name")?.to_string();
    let key = uri.path().trim_start_matches('/').to_string();
    if key.is_empty() {
        return Err(anyhow::anyhow!("S3 URI missing key (object path)"));
    }
    Ok((bucket, key))
}

/// Local file name for a downloaded key, with any `.gz` suffix removed.
pub fn local_snapshot_name(s3_key: &str) -> String {
    let file_name = s3_key.rsplit('/').next().unwrap_or(s3_key);
    file_name.strip_suffix(".gz").unwrap_or(file_name).to_string()
}

fn parent_dir(path: &Path) -> &Path {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."))
}

/// Moves a fully written temp file to `destination` without ever replacing
/// an existing file. A local file with identical content is reused; any other
/// existing file is left untouched and reported as `AlreadyExists`.
fn persist_snapshot(tmp: NamedTempFile, destination: &Path) -> Result<PathBuf> {
    match tmp.persist_noclobber(destination) {
        Ok(_) => Ok(destination.to_path_buf()),
        Err(e) if e.error.kind() == ErrorKind::AlreadyExists => {
            let incoming = fs::read(e.file.path())
                .with_context(|| format!("Failed to read {}", e.file.path().display()))?;
            let existing = fs::read(destination)
                .with_context(|| format!("Failed to read {}", destination.display()))?;
            if incoming == existing {
                println!("ℹ️  {} already present locally with the same content", destination.display());
                Ok(destination.to_path_buf())
            } else {
                Err(SnapshotError::AlreadyExists(destination.to_path_buf())).with_context(|| {
                    format!(
                        "A different local snapshot already uses this name; restore {} directly or move it aside",
                        destination.display()
                    )
                })
            }
        }
        Err(e) => Err(e.error).with_context(|| format!("Failed to persist {}", destination.display())),
    }
}

/// Decompresses `gz_path` into `destination`. Nothing is written at
/// `destination` unless decompression succeeds completely.
pub fn gunzip_file(gz_path: &Path, destination: &Path) -> Result<PathBuf> {
    let reader = BufReader::new(
        File::open(gz_path).with_context(|| format!("Failed to open {}", gz_path.display()))?,
    );
    let mut decoder = GzDecoder::new(reader);

    let dir = parent_dir(destination);
    let mut tmp = NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to create a temp file in {}", dir.display()))?;
    copy(&mut decoder, &mut tmp)
        .with_context(|| format!("Failed to decompress {}", gz_path.display()))?;
    tmp.as_file()
        .sync_all()
        .with_context(|| format!("Failed to sync decompressed {}", gz_path.display()))?;

    persist_snapshot(tmp, destination)
}

/// Downloads a snapshot object into `download_dir` and returns the path of
/// the plain JSON file, gunzipping keys that end in `.gz`.
pub async fn download_snapshot(
    spaces_config: &SpacesConfig,
    s3_uri: &str,
    download_dir: &Path,
) -> Result<PathBuf> {
    let (s3_bucket, s3_key) = parse_s3_uri(s3_uri)?;
    let snapshot_path = download_dir.join(local_snapshot_name(&s3_key));

    println!(
        "☁️  Downloading s3://{}/{} into {}",
        s3_bucket,
        s3_key,
        download_dir.display()
    );

    tokio::fs::create_dir_all(download_dir)
        .await
        .with_context(|| format!("Failed to create directory for download: {}", download_dir.display()))?;

    let client = s3_client(spaces_config).await;
    let mut object = client
        .get_object()
        .bucket(&s3_bucket)
        .key(&s3_key)
        .send()
        .await
        .with_context(|| format!("Failed to get object s3://{}/{}", s3_bucket, s3_key))?;

    let mut download = NamedTempFile::new_in(download_dir)
        .with_context(|| format!("Failed to create a temp file in {}", download_dir.display()))?;

    let mut total_bytes_downloaded = 0;
    while let Some(bytes_chunk) = object
        .body
        .try_next()
        .await
        .with_context(|| format!("Failed to read object body s3://{}/{}", s3_bucket, s3_key))?
    {
        download
            .write_all(&bytes_chunk)
            .with_context(|| format!("Failed to write to {}", download.path().display()))?;
        total_bytes_downloaded += bytes_chunk.len();
    }
    download
        .as_file()
        .sync_all()
        .with_context(|| format!("Failed to sync {}", download.path().display()))?;

    println!(
        "✅ Downloaded {} bytes from s3://{}/{}",
        total_bytes_downloaded, s3_bucket, s3_key
    );

    if s3_key.ends_with(".gz") {
        // `download` is removed when dropped at the end of this scope.
        let path = gunzip_file(download.path(), &snapshot_path)?;
        println!("📦 Decompressed snapshot to {}", path.display());
        Ok(path)
    } else {
        persist_snapshot(download, &snapshot_path)
    }
}
