//! Multipart upload decoding
//!
//! Streams the `file` field of a multipart body to disk chunk by chunk and
//! hands the pipeline an [`UploadHandle`]. Other fields are skipped.

use axum::extract::multipart::{Field, MultipartError};
use axum::extract::Multipart;
use axum::http::StatusCode;
use std::path::Path;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use uuid::Uuid;

use crate::error::{Result, SplitError};
use crate::pipeline::workspace::{ScratchGuard, WorkspaceManager};
use crate::pipeline::UploadHandle;

/// Name of the multipart field carrying the media file
pub const UPLOAD_FIELD: &str = "file";

/// Upload filename prefix inside the temp root
pub const UPLOAD_PREFIX: &str = "upload-";

/// Save the `file` field of `multipart` under `dir`.
///
/// Returns `Ok(None)` when the body has no such field. A field larger than
/// `max_bytes` is rejected with `UploadTooLarge` and its partial file removed.
/// The file is also removed if this future is dropped before it completes.
pub async fn save_upload(
    multipart: &mut Multipart,
    dir: &Path,
    max_bytes: u64,
) -> Result<Option<UploadHandle>> {
    let manager = WorkspaceManager::new(dir);
    let mut saved: Option<(UploadHandle, ScratchGuard)> = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                if let Some((_, guard)) = saved {
                    guard.release().await;
                }
                return Err(multipart_error(e));
            }
        };

        if field.name() != Some(UPLOAD_FIELD) || saved.is_some() {
            debug!("Skipping multipart field {:?}", field.name());
            continue;
        }

        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(format!("{}{}", UPLOAD_PREFIX, Uuid::new_v4()));
        let guard = ScratchGuard::new(manager.clone(), vec![path.clone()]);
        match write_field(field, &path, max_bytes).await {
            Ok(size) => {
                debug!("Saved upload to {} ({} bytes)", path.display(), size);
                saved = Some((UploadHandle { path, size }, guard));
            }
            Err(e) => {
                guard.release().await;
                return Err(e);
            }
        }
    }

    // From here on the pipeline owns the file
    Ok(saved.map(|(upload, guard)| {
        guard.disarm();
        upload
    }))
}

async fn write_field(mut field: Field<'_>, path: &Path, max_bytes: u64) -> Result<u64> {
    let mut file = File::create(path).await?;
    let mut size = 0u64;

    while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
        size += chunk.len() as u64;
        if size > max_bytes {
            return Err(SplitError::UploadTooLarge);
        }
        file.write_all(&chunk).await?;
    }

    file.flush().await?;
    Ok(size)
}

fn multipart_error(err: MultipartError) -> SplitError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        SplitError::UploadTooLarge
    } else {
        SplitError::InvalidUpload(err.body_text())
    }
}
