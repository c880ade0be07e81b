use axum::{
    Json,
    extract::{
        Multipart, State,
        multipart::{MultipartError, MultipartRejection},
    },
    http::StatusCode,
};
use uuid::Uuid;

use crate::{
    AppState,
    auth::{AnyRole, AuthUser, Authorized},
    error::ApiError,
    extract::IdPath,
    handlers::issues::load_accessible_issue,
    models::{Attachment, AttachmentKind, MessageResponse, NewAttachment, UploadResponse},
    storage::{StoredFile, generated_filename, process_image},
};

/// Upper bound on files accepted by `POST /upload/multiple`.
pub const MAX_FILES_PER_UPLOAD: usize = 5;

/// One file part read from the multipart body, already type- and size-checked.
struct IncomingFile {
    original_name: String,
    mime_type: String,
    kind: AttachmentKind,
    bytes: Vec<u8>,
}

struct UploadForm {
    issue_id: Option<String>,
    files: Vec<IncomingFile>,
}

fn multipart_error(err: MultipartError) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge("File too large".to_string())
    } else {
        ApiError::BadRequest(err.body_text())
    }
}

/// read_form
///
/// Drains the multipart body. Files are only accepted under `file_field`, must be
/// `image/*` or `audio/*` (415 otherwise) and at most `max_size` bytes each (413). The
/// body is read chunk by chunk so an oversized part is rejected without buffering it.
async fn read_form(
    multipart: Result<Multipart, MultipartRejection>,
    file_field: &str,
    max_files: usize,
    max_size: usize,
) -> Result<UploadForm, ApiError> {
    let mut multipart = multipart.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
    let mut form = UploadForm {
        issue_id: None,
        files: Vec::new(),
    };

    while let Some(mut field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();

        if name == "issueId" {
            form.issue_id = Some(field.text().await.map_err(multipart_error)?.trim().to_string());
            continue;
        }
        if name != file_field {
            return Err(ApiError::BadRequest(format!("Unexpected field: {name}")));
        }
        if form.files.len() >= max_files {
            return Err(ApiError::BadRequest("Too many files".to_string()));
        }

        let mime_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        let kind = AttachmentKind::from_mime(&mime_type).ok_or_else(|| {
            ApiError::UnsupportedMediaType("Only image and audio files are allowed.".to_string())
        })?;
        let original_name = field.file_name().unwrap_or("upload").to_string();

        let mut bytes = Vec::new();
        while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
            if bytes.len() + chunk.len() > max_size {
                return Err(ApiError::PayloadTooLarge("File too large".to_string()));
            }
            bytes.extend_from_slice(&chunk);
        }

        form.files.push(IncomingFile {
            original_name,
            mime_type,
            kind,
            bytes,
        });
    }

    Ok(form)
}

/// Resolves `issueId` to an issue the caller may modify.
async fn target_issue(
    state: &AppState,
    user: &AuthUser,
    issue_id: Option<String>,
) -> Result<Uuid, ApiError> {
    let raw = issue_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ApiError::BadRequest("Issue ID is required".to_string()))?;
    let id = Uuid::parse_str(&raw).map_err(|_| ApiError::NotFound("Issue not found".to_string()))?;
    load_accessible_issue(state, user, id).await?;
    Ok(id)
}

/// Shrinks and re-encodes images on the blocking pool. On failure the original bytes are
/// kept and the error is only logged.
async fn prepare_bytes(file: &IncomingFile) -> Vec<u8> {
    if file.kind != AttachmentKind::Image {
        return file.bytes.clone();
    }
    let original = file.bytes.clone();
    match tokio::task::spawn_blocking(move || process_image(&original)).await {
        Ok(Ok(processed)) => processed,
        Ok(Err(e)) => {
            tracing::warn!(error = %e, file = %file.original_name, "image processing failed, keeping original");
            file.bytes.clone()
        }
        Err(e) => {
            tracing::warn!(error = %e, file = %file.original_name, "image processing task failed, keeping original");
            file.bytes.clone()
        }
    }
}

/// persist_files
///
/// Writes every file and its attachment row. If any step fails, the files and rows
/// written so far are removed before the error is returned.
async fn persist_files(
    state: &AppState,
    issue_id: Uuid,
    files: Vec<IncomingFile>,
) -> Result<Vec<Attachment>, ApiError> {
    let mut written: Vec<(AttachmentKind, StoredFile)> = Vec::new();
    let mut attachments: Vec<Attachment> = Vec::new();

    for file in files {
        let result = async {
            let bytes = prepare_bytes(&file).await;
            let stored = state
                .storage
                .save(file.kind, &generated_filename(&file.original_name), &bytes)
                .await
                .map_err(ApiError::internal)?;
            written.push((file.kind, stored.clone()));

            let attachment = state
                .repo
                .create_attachment(NewAttachment {
                    issue_id,
                    filename: stored.filename,
                    original_name: file.original_name,
                    mime_type: file.mime_type,
                    size: stored.size,
                    url: stored.url,
                    kind: file.kind,
                })
                .await?;
            Ok::<_, ApiError>(attachment)
        }
        .await;

        match result {
            Ok(attachment) => attachments.push(attachment),
            Err(err) => {
                cleanup(state, &written, &attachments).await;
                return Err(err);
            }
        }
    }

    Ok(attachments)
}

async fn cleanup(state: &AppState, written: &[(AttachmentKind, StoredFile)], rows: &[Attachment]) {
    for (kind, stored) in written {
        if let Err(e) = state.storage.delete(*kind, &stored.filename).await {
            tracing::warn!(error = %e, file = %stored.filename, "failed to remove file after upload error");
        }
    }
    for row in rows {
        if let Err(e) = state.repo.delete_attachment(row.id).await {
            tracing::warn!(error = %e, attachment_id = %row.id, "failed to remove attachment row after upload error");
        }
    }
}

/// upload_single
///
/// [Authenticated Route] Multipart upload of one `file` plus `issueId`.
#[utoipa::path(
    post,
    path = "/api/upload/single",
    request_body(content_type = "multipart/form-data", description = "`file` and `issueId` fields"),
    responses(
        (status = 201, description = "Uploaded", body = UploadResponse),
        (status = 400, description = "Missing file or issue id"),
        (status = 403, description = "Not the reporter"),
        (status = 404, description = "Issue not found"),
        (status = 413, description = "File too large"),
        (status = 415, description = "Not an image or audio file")
    )
)]
pub async fn upload_single(
    user: Authorized<AnyRole>,
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<(StatusCode, Json<UploadResponse>), ApiError> {
    let form = read_form(multipart, "file", 1, state.config.max_file_size).await?;
    if form.files.is_empty() {
        return Err(ApiError::BadRequest("No file uploaded".to_string()));
    }
    let issue_id = target_issue(&state, &user, form.issue_id).await?;

    let attachments = persist_files(&state, issue_id, form.files).await?;
    tracing::info!(%issue_id, count = attachments.len(), "attachment uploaded");

    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            message: "File uploaded successfully".to_string(),
            attachments,
        }),
    ))
}

/// upload_multiple
///
/// [Authenticated Route] Multipart upload of up to five `files` plus `issueId`.
#[utoipa::path(
    post,
    path = "/api/upload/multiple",
    request_body(content_type = "multipart/form-data", description = "`files` (max 5) and `issueId` fields"),
    responses(
        (status = 201, description = "Uploaded", body = UploadResponse),
        (status = 400, description = "Missing files, issue id or too many files"),
        (status = 403, description = "Not the reporter"),
        (status = 404, description = "Issue not found"),
        (status = 413, description = "File too large"),
        (status = 415, description = "Not an image or audio file")
    )
)]
pub async fn upload_multiple(
    user: Authorized<AnyRole>,
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<(StatusCode, Json<UploadResponse>), ApiError> {
    let form = read_form(
        multipart,
        "files",
        MAX_FILES_PER_UPLOAD,
        state.config.max_file_size,
    )
    .await?;
    if form.files.is_empty() {
        return Err(ApiError::BadRequest("No files uploaded".to_string()));
    }
    let issue_id = target_issue(&state, &user, form.issue_id).await?;

    let attachments = persist_files(&state, issue_id, form.files).await?;
    tracing::info!(%issue_id, count = attachments.len(), "attachments uploaded");

    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            message: format!("{} files uploaded successfully", attachments.len()),
            attachments,
        }),
    ))
}

/// delete_attachment
///
/// [Authenticated Route] Removes the stored file, then the attachment row. Same
/// ownership rule as issue updates.
#[utoipa::path(
    delete,
    path = "/api/upload/{id}",
    params(("id" = Uuid, Path, description = "Attachment ID")),
    responses(
        (status = 200, description = "Deleted", body = MessageResponse),
        (status = 403, description = "Not the reporter"),
        (status = 404, description = "Attachment not found")
    )
)]
pub async fn delete_attachment(
    user: Authorized<AnyRole>,
    State(state): State<AppState>,
    IdPath(id): IdPath,
) -> Result<Json<MessageResponse>, ApiError> {
    let attachment = state
        .repo
        .find_attachment(id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Attachment not found".to_string()))?;
    load_accessible_issue(&state, &user, attachment.issue_id).await?;

    state
        .storage
        .delete(attachment.kind, &attachment.filename)
        .await
        .map_err(ApiError::internal)?;
    state.repo.delete_attachment(id).await?;

    Ok(Json(MessageResponse::new("Attachment deleted successfully")))
}
