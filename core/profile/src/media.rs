//! Avatar and banner uploads.

use profilekit_backend::UploadOptions;
use profilekit_common::{Error, MediaKind, ObjectPath, Result, UserId};

use crate::context::ProfileContext;

/// Extension used when the file name has none.
pub const DEFAULT_EXTENSION: &str = "png";

/// Suffix after the last '.', or [`DEFAULT_EXTENSION`] when missing, empty
/// or containing a path separator.
///
/// Case is preserved.
pub fn file_extension(file_name: &str) -> &str {
    match file_name.rsplit_once('.') {
        Some((_, ext)) if !ext.is_empty() && !ext.contains(['/', '\\']) => ext,
        _ => DEFAULT_EXTENSION,
    }
}

/// Object key for an upload: `{user}/{kind}-{millis}.{ext}`.
pub fn media_object_path(
    user: &UserId,
    kind: MediaKind,
    millis: i64,
    file_name: &str,
) -> Result<ObjectPath> {
    let name = format!("{}-{}.{}", kind, millis, file_extension(file_name));
    ObjectPath::from_components(vec![user.as_str().to_string(), name])
}

/// MIME type sent with the upload.
pub fn content_type_for(extension: &str) -> &'static str {
    match extension.to_ascii_lowercase().as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "avif" => "image/avif",
        _ => "application/octet-stream",
    }
}

/// Store an image for the signed-in user and return its public URL.
///
/// Each call writes a new object; a call landing on the same millisecond
/// overwrites the earlier one.
///
/// # Errors
/// - `Unauthenticated` when nobody is signed in; the blob store is not called
/// - Upload and URL failures from the blob store
pub async fn upload_profile_image(
    ctx: &ProfileContext,
    data: Vec<u8>,
    file_name: &str,
    kind: MediaKind,
) -> Result<String> {
    let identity = ctx
        .auth()
        .current_user()
        .await?
        .ok_or(Error::Unauthenticated)?;

    let path = media_object_path(&identity.id, kind, ctx.clock().now_millis(), file_name)?;
    let bucket = &ctx.settings().media_bucket;
    let options = UploadOptions {
        upsert: true,
        cache_control_secs: ctx.settings().cache_control_secs,
        content_type: Some(content_type_for(file_extension(file_name)).to_string()),
    };

    tracing::debug!(%bucket, %path, size = data.len(), "Uploading profile image");
    ctx.blobs().upload(bucket, &path, data, &options).await?;

    let url = ctx.blobs().public_url(bucket, &path).await?;
    tracing::info!(user = %identity.id, %kind, %path, "Uploaded profile image");
    Ok(url)
}
