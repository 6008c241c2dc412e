use actix_multipart::Multipart;
use actix_web::web;
use futures_util::StreamExt;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use uuid::Uuid;

use crate::config::Config;
use crate::error::ApiError;

/// Fixed ceiling for image uploads, enforced while streaming the body and
/// before anything touches the database.
const MAX_IMAGE_BYTES: u64 = 5 * 1024 * 1024;

/// Where an uploaded image lives under the media root.
#[derive(Debug, Clone, Copy)]
pub enum ImageKind {
    Avatar,
    PostImage,
}

impl ImageKind {
    fn folder(self) -> &'static str {
        match self {
            ImageKind::Avatar => "avatars",
            ImageKind::PostImage => "post-images",
        }
    }
}

/// Maps a validated image MIME type to a safe extension. Intentionally not
/// configurable.
fn mime_to_safe_extension(mime_type: &str) -> Option<&'static str> {
    match mime_type {
        "image/jpeg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/gif" => Some("gif"),
        "image/webp" => Some("webp"),
        _ => None,
    }
}

/// Streams one image field out of a multipart payload onto disk, fanning
/// files out by id prefix. Returns the public `/media/...` path.
pub async fn save_image(
    config: &Config,
    kind: ImageKind,
    mut payload: Multipart,
) -> Result<String, ApiError> {
    let file_id = Uuid::new_v4().to_string();

    while let Some(item) = payload.next().await {
        let mut field =
            item.map_err(|e| ApiError::Validation(format!("Malformed upload: {}", e)))?;
        let field_name = field
            .content_disposition()
            .get_name()
            .unwrap_or_default()
            .to_string();
        if field_name != "avatar" && field_name != "image" && field_name != "file" {
            continue;
        }

        let content_type = field
            .content_type()
            .map(|m| m.to_string())
            .ok_or_else(|| ApiError::Validation("Content-Type not available".to_string()))?;
        let ext = mime_to_safe_extension(&content_type).ok_or_else(|| {
            ApiError::Validation(format!(
                "Unsupported file type: '{}'. Only images are accepted",
                content_type
            ))
        })?;

        let dir1 = &file_id[0..2];
        let dir2 = &file_id[2..4];
        let dir = PathBuf::from(&config.media_path)
            .join(kind.folder())
            .join(dir1)
            .join(dir2);
        web::block({
            let dir = dir.clone();
            move || fs::create_dir_all(&dir)
        })
        .await?
        .map_err(|e| ApiError::internal("Failed to create media directory", e))?;

        let final_path = dir.join(format!("{}.{}", file_id, ext));
        let mut f = web::block({
            let final_path = final_path.clone();
            move || fs::File::create(final_path)
        })
        .await?
        .map_err(|e| ApiError::internal("Failed to create media file", e))?;

        let mut file_size: u64 = 0;
        while let Some(chunk) = field.next().await {
            let data =
                chunk.map_err(|e| ApiError::Validation(format!("Malformed upload: {}", e)))?;
            file_size += data.len() as u64;
            if file_size > MAX_IMAGE_BYTES {
                drop(f);
                let _ = fs::remove_file(&final_path);
                return Err(ApiError::Validation(format!(
                    "File is too large. Maximum size is {}MB",
                    MAX_IMAGE_BYTES / (1024 * 1024)
                )));
            }
            f = web::block(move || f.write_all(&data).map(|_| f))
                .await?
                .map_err(|e| ApiError::internal("Failed to write media file", e))?;
        }

        return Ok(format!(
            "/media/{}/{}/{}/{}.{}",
            kind.folder(),
            dir1,
            dir2,
            file_id,
            ext
        ));
    }

    Err(ApiError::Validation("No file was uploaded".to_string()))
}

/// Best-effort removal of a previously stored image. Upstream-store
/// failures are logged and never block the request that triggered them.
pub async fn delete_image(config: &Config, public_path: &str) {
    let relative = match public_path.strip_prefix("/media/") {
        Some(rest) => rest,
        None => {
            log::warn!("Refusing to delete non-media path '{}'", public_path);
            return;
        }
    };
    if relative.contains("..") {
        log::warn!("Refusing to delete suspicious media path '{}'", public_path);
        return;
    }

    let fs_path = PathBuf::from(&config.media_path).join(relative);
    let result = web::block(move || fs::remove_file(&fs_path)).await;
    match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => log::warn!("Failed to delete media file '{}': {}", public_path, e),
        Err(e) => log::warn!("Blocking error deleting media file '{}': {}", public_path, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_image_mimes_map_to_extensions() {
        assert_eq!(mime_to_safe_extension("image/png"), Some("png"));
        assert_eq!(mime_to_safe_extension("image/jpeg"), Some("jpg"));
        assert_eq!(mime_to_safe_extension("application/pdf"), None);
        assert_eq!(mime_to_safe_extension("video/mp4"), None);
    }
}
