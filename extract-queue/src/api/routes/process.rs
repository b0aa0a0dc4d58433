//! Document processing routes.
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | POST | `/process` | Submit a PDF (multipart: `pdf`, `compress_images`, `use_cache`) |
//! | GET | `/process/{job_id}/status` | Job status |
//! | GET | `/process/{job_id}/result` | Result archive download |

use axum::{
    Json, Router,
    extract::{Multipart, Path, State},
    http::{HeaderValue, StatusCode, header::CONTENT_DISPOSITION},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use bytes::Bytes;
use tower_http::services::ServeFile;

use crate::api::error::{ApiError, ApiResult};
use crate::api::models::JobCreationResponse;
use crate::api::server::AppState;
use crate::services::{JobStatus, SubmitOptions};

const MALFORMED_UPLOAD: &str = "Poorly constructed form upload";

/// Create the process router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/process", post(submit_document))
        .route("/process/", post(submit_document))
        .route("/process/{job_id}/status", get(get_status))
        .route("/process/{job_id}/result", get(get_result))
}

/// Parse an HTML form boolean.
fn parse_form_bool(field: &str, value: &str) -> ApiResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(ApiError::bad_request(format!(
            "Invalid boolean for '{}': '{}'",
            field, other
        ))),
    }
}

/// Accept a PDF for extraction and queue it.
async fn submit_document(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<(StatusCode, Json<JobCreationResponse>)> {
    let mut upload: Option<(String, Bytes)> = None;
    let mut options = SubmitOptions::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("{}: {}", MALFORMED_UPLOAD, e)))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("pdf") => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let content = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("{}: {}", MALFORMED_UPLOAD, e)))?;
                upload = Some((file_name, content));
            }
            Some(key @ ("compress_images" | "use_cache")) => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("{}: {}", MALFORMED_UPLOAD, e)))?;
                let flag = parse_form_bool(key, &value)?;
                if key == "compress_images" {
                    options.compress_images = flag;
                } else {
                    options.use_cache = flag;
                }
            }
            _ => {}
        }
    }

    let (file_name, content) = upload
        .filter(|(file_name, content)| !file_name.trim().is_empty() && !content.is_empty())
        .ok_or_else(|| ApiError::bad_request(MALFORMED_UPLOAD))?;

    let outcome = state
        .job_service
        .submit(content, &file_name, options)
        .await?;

    let message = if outcome.cached {
        "Existing PDF processing job found"
    } else {
        "PDF processing in background"
    };
    let base = format!("{}/process/{}", state.api_prefix, outcome.job_id);

    Ok((
        StatusCode::ACCEPTED,
        Json(JobCreationResponse {
            message: message.to_string(),
            status_endpoint: format!("{}/status", base),
            result_endpoint: format!("{}/result", base),
            job_id: outcome.job_id,
        }),
    ))
}

async fn get_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobStatus>> {
    Ok(Json(state.job_service.status(&job_id).await?))
}

/// Download the result archive of a completed job.
async fn get_result(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Response> {
    let path = state.job_service.result(&job_id).await?;

    if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
        tracing::warn!(%job_id, path = %path.display(), "Completed job has no result archive");
        return Err(ApiError::not_found(format!(
            "Result archive for job '{}' not found",
            job_id
        )));
    }

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().replace('"', "_"))
        .unwrap_or_else(|| format!("{}.zip", job_id));
    let disposition = HeaderValue::from_str(&format!("attachment; filename=\"{}\"", file_name))
        .map_err(|e| ApiError::internal(format!("Invalid file name: {}", e)))?;

    let req = axum::http::Request::builder()
        .body(axum::body::Body::empty())
        .map_err(|e| ApiError::internal(e.to_string()))?;

    let mut response = match ServeFile::new(&path).try_call(req).await {
        Ok(response) => response.into_response(),
        Err(e) => return Err(ApiError::internal(format!("Failed to serve file: {}", e))),
    };
    response.headers_mut().insert(CONTENT_DISPOSITION, disposition);

    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_form_bool() {
        assert!(parse_form_bool("use_cache", "true").unwrap());
        assert!(parse_form_bool("use_cache", "True").unwrap());
        assert!(!parse_form_bool("use_cache", "false").unwrap());
        assert!(!parse_form_bool("use_cache", "0").unwrap());

        let err = parse_form_bool("use_cache", "maybe").unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }
}
