//! HTTP routes

pub mod diagnose;
pub mod health;

use std::path::Path;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::state::SharedState;

/// Largest accepted upload
pub const MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

/// Build the application router
pub fn router(state: SharedState, images_dir: &Path) -> Router {
    Router::new()
        .route("/", get(diagnose::index))
        .route("/diagnose", post(diagnose::diagnose))
        .route("/health", get(health::health_check))
        .nest_service("/images", ServeDir::new(images_dir))
        .with_state(state)
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::Arc;

    use agronomicare::inference::{PreprocessedImage, ProbabilityModel};
    use agronomicare::recommend::RemedyTable;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use http_body_util::BodyExt;
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use tower::ServiceExt;

    use crate::render::DISCLAIMER;
    use crate::state::{AppState, ExampleImage};

    const BOUNDARY: &str = "agronomicare-test-boundary";

    const REMEDIES: &str = "disease,disease_name,natural_remedies,chemical_control\n\
blast,Rice blast,Neem oil,Tricyclazole\n";

    struct FixedModel(Vec<f32>);

    impl ProbabilityModel for FixedModel {
        fn predict(&self, _image: &PreprocessedImage) -> agronomicare::Result<Vec<f32>> {
            Ok(self.0.clone())
        }
    }

    fn app(probabilities: Vec<f32>, images_dir: &Path) -> Router {
        let state = AppState::new(
            Box::new(FixedModel(probabilities)),
            vec!["healthy".to_string(), "blast".to_string()],
            RemedyTable::from_reader(REMEDIES.as_bytes()).unwrap(),
            vec![ExampleImage {
                url: "/images/leaf.png".to_string(),
                caption: "uniform background, good focus".to_string(),
            }],
        );
        router(Arc::new(state), images_dir)
    }

    fn png_bytes() -> Vec<u8> {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(64, 48, Rgb([30, 140, 50])));
        let mut bytes = Cursor::new(Vec::new());
        image.write_to(&mut bytes, ImageFormat::Png).unwrap();
        bytes.into_inner()
    }

    fn upload_request(field: &str, content: &[u8]) -> Request<Body> {
        let mut body = Vec::new();
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"{}\"; filename=\"leaf.png\"\r\nContent-Type: image/png\r\n\r\n",
                field
            )
            .as_bytes(),
        );
        body.extend_from_slice(content);
        body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());

        Request::builder()
            .method("POST")
            .uri("/diagnose")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(body))
            .unwrap()
    }

    async fn body_text(response: axum::response::Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_index_renders_form() {
        let dir = tempfile::tempdir().unwrap();
        let response = app(vec![0.5, 0.5], dir.path())
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let html = body_text(response).await;
        assert!(html.contains("Agronomicare"));
        assert!(html.contains("action=\"/diagnose\""));
        assert!(html.contains("#EBEBEB"));
    }

    #[tokio::test]
    async fn test_diagnose_disease_shows_remedies() {
        let dir = tempfile::tempdir().unwrap();
        let response = app(vec![0.2, 0.8], dir.path())
            .oneshot(upload_request("file", &png_bytes()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let html = body_text(response).await;
        assert!(html.contains("<h2>blast</h2>"));
        assert!(html.contains("score: 80.0%"));
        assert!(html.contains("suffering from blast"));
        assert!(html.contains("Neem oil"));
        assert!(html.contains("Tricyclazole"));
        assert!(html.contains(DISCLAIMER));
    }

    #[tokio::test]
    async fn test_diagnose_healthy_congratulates() {
        let dir = tempfile::tempdir().unwrap();
        let response = app(vec![0.9, 0.1], dir.path())
            .oneshot(upload_request("file", &png_bytes()))
            .await
            .unwrap();

        let html = body_text(response).await;
        assert!(html.contains("Congratulations, your crop seems to be healthy!"));
        assert!(!html.contains("Chemical Remedy Recommendation"));
    }

    #[tokio::test]
    async fn test_undecodable_upload_is_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let response = app(vec![0.2, 0.8], dir.path())
            .oneshot(upload_request("file", b"not an image at all"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_text(response).await.contains("could not be read as a JPG or PNG image"));
    }

    #[tokio::test]
    async fn test_bmp_upload_is_bad_request() {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(64, 48, Rgb([30, 140, 50])));
        let mut bmp = Cursor::new(Vec::new());
        image.write_to(&mut bmp, ImageFormat::Bmp).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let response = app(vec![0.2, 0.8], dir.path())
            .oneshot(upload_request("file", &bmp.into_inner()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_text(response).await.contains("JPG or PNG"));
    }

    #[tokio::test]
    async fn test_missing_file_field_is_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let response = app(vec![0.2, 0.8], dir.path())
            .oneshot(upload_request("photo", &png_bytes()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_health_reports_classes() {
        let dir = tempfile::tempdir().unwrap();
        let response = app(vec![0.2, 0.8], dir.path())
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["classes"], 2);
        assert!(json["started_at"].as_str().unwrap().contains('T'));
    }

    #[tokio::test]
    async fn test_example_images_are_served() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("leaf.png"), png_bytes()).unwrap();

        let response = app(vec![0.2, 0.8], dir.path())
            .oneshot(Request::builder().uri("/images/leaf.png").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }
}
