//! The form page and photo uploads

use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};
use tracing::{error, info, warn};

use agronomicare::AgronomicareError;

use crate::render;
use crate::state::SharedState;

/// Multipart field carrying the photo
pub const UPLOAD_FIELD: &str = "file";

/// GET / - the empty form
pub async fn index(State(state): State<SharedState>) -> Html<String> {
    Html(render::index_page(state.examples()))
}

/// POST /diagnose - classify an uploaded photo and show remedies
pub async fn diagnose(State(state): State<SharedState>, mut multipart: Multipart) -> Response {
    let upload = match read_upload(&mut multipart).await {
        Ok(Some(bytes)) => bytes,
        Ok(None) => return bad_request(&state, "Please choose a photo to upload."),
        Err(message) => return bad_request(&state, &message),
    };
    info!("Received upload of {} bytes", upload.len());

    let worker = state.clone();
    let outcome = tokio::task::spawn_blocking(move || worker.diagnose(&upload)).await;

    match outcome {
        Ok(Ok(diagnosis)) => {
            info!(
                "Diagnosed {} ({:.3})",
                diagnosis.prediction.class_name, diagnosis.prediction.confidence
            );
            Html(render::result_page(state.examples(), &diagnosis)).into_response()
        }
        Ok(Err(AgronomicareError::ImageDecode(e))) => {
            warn!("Rejected upload: {}", e);
            bad_request(&state, "The uploaded file could not be read as a JPG or PNG image.")
        }
        Ok(Err(e)) => {
            error!("Diagnosis failed: {}", e);
            server_error(&state)
        }
        Err(e) => {
            error!("Diagnosis task failed: {}", e);
            server_error(&state)
        }
    }
}

async fn read_upload(multipart: &mut Multipart) -> Result<Option<Vec<u8>>, String> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| format!("Malformed upload: {}", e))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        let bytes = field
            .bytes()
            .await
            .map_err(|e| format!("Malformed upload: {}", e))?;
        return Ok((!bytes.is_empty()).then(|| bytes.to_vec()));
    }
    Ok(None)
}

fn bad_request(state: &SharedState, message: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Html(render::error_page(state.examples(), message)),
    )
        .into_response()
}

fn server_error(state: &SharedState) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Html(render::error_page(
            state.examples(),
            "Something went wrong while diagnosing the photo. Please try again.",
        )),
    )
        .into_response()
}
