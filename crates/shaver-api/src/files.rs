use std::path::{Path as FsPath, PathBuf};

use axum::{
    Extension, Json,
    body::{Body, Bytes},
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::IntoResponse,
};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::{error, info};
use uuid::Uuid;

use shaver_db::models::FileRow;
use shaver_gateway::identity::Identity;
use shaver_gateway::service::download_path;
use shaver_gateway::{ChatError, convert};
use shaver_types::api::UploadResponse;
use shaver_types::roles::Action;

use crate::AppState;

const MAX_NAME_CHARS: usize = 255;

#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    pub name: String,
}

/// Display names end up in a Content-Disposition header; keep them to one
/// plain path segment.
fn clean_file_name(name: &str) -> Result<String, ChatError> {
    let name = name.trim();
    if name.is_empty() || name.chars().count() > MAX_NAME_CHARS {
        return Err(ChatError::validation(format!(
            "file name must be 1-{} characters",
            MAX_NAME_CHARS
        )));
    }
    if name == "." || name == ".." || name.chars().any(|c| c == '/' || c == '\\' || c == '"' || c.is_control()) {
        return Err(ChatError::validation("file name contains forbidden characters"));
    }
    Ok(name.to_string())
}

/// Blobs live at `{upload_dir}/{group_id}/{file_id}`; both parts are UUIDs,
/// so nothing from the client reaches the filesystem path.
fn blob_path(upload_dir: &FsPath, group_id: Uuid, file_id: Uuid) -> PathBuf {
    upload_dir.join(group_id.to_string()).join(file_id.to_string())
}

/// POST /groups/{group_id}/files?name= accepts the raw bytes
/// (application/octet-stream), stores them and returns a reference that a
/// `file` message can point at.
pub async fn upload_file(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(group_id): Path<Uuid>,
    Query(query): Query<UploadQuery>,
    bytes: Bytes,
) -> Result<impl IntoResponse, ChatError> {
    let name = clean_file_name(&query.name)?;
    if bytes.is_empty() {
        return Err(ChatError::validation("file is empty"));
    }
    if bytes.len() > state.max_upload_bytes {
        return Err(ChatError::PayloadTooLarge(state.max_upload_bytes));
    }

    state
        .chat
        .authority()
        .require(identity.user_id, group_id, Action::PostMessage, None)
        .await?;

    let file_id = Uuid::new_v4();
    let sha256 = hex::encode(Sha256::digest(&bytes));
    let path = blob_path(&state.upload_dir, group_id, file_id);

    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir).await.map_err(|e| {
            error!("Failed to create upload directory {}: {}", dir.display(), e);
            anyhow::anyhow!("upload directory unavailable")
        })?;
    }
    let mut file = tokio::fs::File::create(&path).await.map_err(|e| {
        error!("Failed to create file {}: {}", path.display(), e);
        anyhow::anyhow!("could not store upload")
    })?;
    file.write_all(&bytes).await.map_err(|e| {
        error!("Failed to write file {}: {}", path.display(), e);
        anyhow::anyhow!("could not store upload")
    })?;
    file.flush().await.map_err(|e| anyhow::anyhow!("could not store upload: {}", e))?;

    let row = FileRow {
        id: file_id.to_string(),
        group_id: group_id.to_string(),
        uploader_id: identity.user_id.to_string(),
        name: name.clone(),
        size: bytes.len() as i64,
        sha256: sha256.clone(),
        created_at: convert::stamp(convert::now()),
    };
    if let Err(e) = state.chat.store().call(move |db| db.insert_file(&row)).await {
        // No row means nobody can reach the blob; do not leave it behind.
        let _ = tokio::fs::remove_file(&path).await;
        return Err(e);
    }

    info!(
        "{} uploaded '{}' ({} bytes) to group {}",
        identity.username,
        name,
        bytes.len(),
        group_id
    );
    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            file_id,
            path: download_path(group_id, file_id),
            name,
            size: bytes.len() as u64,
            sha256,
        }),
    ))
}

/// GET /groups/{group_id}/files/{file_id} streams the blob back to a member.
pub async fn download_file(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path((group_id, file_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, ChatError> {
    state
        .chat
        .authority()
        .require(identity.user_id, group_id, Action::PostMessage, None)
        .await?;

    let (gid, fid) = (group_id.to_string(), file_id.to_string());
    let row = state
        .chat
        .store()
        .call(move |db| db.get_file(&gid, &fid))
        .await?
        .ok_or(ChatError::NotFound("file"))?;

    let path = blob_path(&state.upload_dir, group_id, file_id);
    let file = tokio::fs::File::open(&path).await.map_err(|e| {
        error!("File {} is in the database but not on disk: {}", path.display(), e);
        ChatError::NotFound("file")
    })?;

    let headers = [
        (header::CONTENT_TYPE, "application/octet-stream".to_string()),
        (header::CONTENT_LENGTH, row.size.to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", row.name),
        ),
    ];
    Ok((headers, Body::from_stream(ReaderStream::new(file))))
}
