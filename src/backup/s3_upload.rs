// datasnap/src/backup/s3_upload.rs
use anyhow::{Context, Result};
use aws_sdk_s3 as s3;
use flate2::write::GzEncoder;
use flate2::Compression;
use s3::config::Region;
use s3::primitives::ByteStream;
use std::fs::File;
use std::io::{BufReader, copy};
use std::path::{Path, PathBuf};

use crate::config::SpacesConfig;

pub(crate) async fn s3_client(spaces_config: &SpacesConfig) -> s3::Client {
    let sdk_config = aws_config::defaults(s3::config::BehaviorVersion::latest())
        .endpoint_url(&spaces_config.endpoint_url)
        .region(Region::new(spaces_config.region.clone()))
        .credentials_provider(s3::config::Credentials::new(
            &spaces_config.access_key_id,
            &spaces_config.secret_access_key,
            None, // session_token
            None, // expiry
            "Static", // provider_name
        ))
        .load()
        .await;

    s3::Client::new(&sdk_config)
}

/// Object key for a snapshot file under the configured folder prefix.
pub fn object_key(spaces_config: &SpacesConfig, file_name: &str) -> String {
    match &spaces_config.folder_prefix {
        Some(prefix) => format!("{}/{}", prefix.trim_end_matches('/'), file_name),
        None => file_name.to_string(),
    }
}

/// Writes `<snapshot>.gz` next to the snapshot and returns its path.
pub fn gzip_snapshot(snapshot_path: &Path) -> Result<PathBuf> {
    let mut gz_name = snapshot_path
        .file_name()
        .context("Snapshot path has no file name")?
        .to_os_string();
    gz_name.push(".gz");
    let gz_path = snapshot_path.with_file_name(gz_name);

    let mut reader = BufReader::new(
        File::open(snapshot_path)
            .with_context(|| format!("Failed to open snapshot {}", snapshot_path.display()))?,
    );
    let gz_file = File::create(&gz_path)
        .with_context(|| format!("Failed to create {}", gz_path.display()))?;
    let mut encoder = GzEncoder::new(gz_file, Compression::default());
    copy(&mut reader, &mut encoder)
        .with_context(|| format!("Failed to compress {}", snapshot_path.display()))?;
    encoder
        .finish()
        .with_context(|| format!("Failed to finish Gzip encoding for {}", gz_path.display()))?;
    Ok(gz_path)
}

/// Compresses a written snapshot and uploads it to the S3-compatible bucket.
/// Returns the `s3://` URI of the uploaded object.
pub async fn upload_snapshot(spaces_config: &SpacesConfig, snapshot_path: &Path) -> Result<String> {
    let gz_path = gzip_snapshot(snapshot_path)?;
    let file_name = gz_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .context("Compressed snapshot has no file name")?;
    let s3_key = object_key(spaces_config, &file_name);

    println!(
        "☁️  Uploading {} to S3 bucket {} with key {}",
        gz_path.display(),
        spaces_config.bucket_name,
        s3_key
    );

    let client = s3_client(spaces_config).await;
    let body = ByteStream::from_path(&gz_path)
        .await
        .with_context(|| format!("Failed to create ByteStream from file: {}", gz_path.display()))?;

    client
        .put_object()
        .bucket(&spaces_config.bucket_name)
        .key(&s3_key)
        .body(body)
        .send()
        .await
        .with_context(|| {
            format!(
                "Failed to upload file {} to S3 bucket {} with key {}",
                gz_path.display(),
                spaces_config.bucket_name,
                s3_key
            )
        })?;

    let uri = format!("s3://{}/{}", spaces_config.bucket_name, s3_key);
    println!("✅ Uploaded snapshot to {}", uri);
    Ok(uri)
}
