mod api;
mod error;
mod types;

use std::sync::Arc;

use anyhow::Result;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::services::ServeDir;

use crate::context::AppContext;

pub use self::error::ApiError;
pub use self::types::{HealthResponse, PredictResponse};

/// Build the HTTP API router.
pub fn create_app(ctx: Arc<AppContext>) -> Router {
    let static_dir = ServeDir::new(&ctx.config.artifacts.static_dir);
    Router::new()
        .route("/predict", post(api::predict_handler))
        .route("/health", get(api::health_handler))
        .nest_service("/static", static_dir)
        .layer(DefaultBodyLimit::disable())
        // uploads are capped at 10M
        .layer(RequestBodyLimitLayer::new(1024 * 1024 * 10))
        .with_state(ctx)
}

pub async fn serve(ctx: Arc<AppContext>, addr: &str) -> Result<()> {
    std::fs::create_dir_all(&ctx.config.artifacts.static_dir)?;
    let app = create_app(ctx);
    log::info!("listening on http://{}", addr);
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::gallery::{Gallery, GalleryEntry};
    use crate::{BoundingBox, Embedding, EmbeddingExtractor, FaceLocator, Pipeline};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use image::{DynamicImage, Rgb, RgbImage};
    use std::io::Cursor;
    use std::path::Path;
    use tower::ServiceExt;

    const BOUNDARY: &str = "celebmatch-test-boundary";

    /// Finds a face unless the top-left pixel is pure black.
    struct CornerLocator;

    impl FaceLocator for CornerLocator {
        fn locate(&mut self, img: &DynamicImage) -> anyhow::Result<Option<BoundingBox>> {
            let lit = img.to_rgb8().get_pixel(0, 0).0 != [0, 0, 0];
            Ok(lit.then(|| BoundingBox {
                x: 0,
                y: 0,
                width: img.width(),
                height: img.height(),
            }))
        }
    }

    struct CornerColour;

    impl EmbeddingExtractor for CornerColour {
        fn embed(&mut self, face: &DynamicImage) -> anyhow::Result<Embedding> {
            let p = face.to_rgb8().get_pixel(0, 0).0;
            Ok(Embedding::from_vec(p.iter().map(|&c| c as f32).collect()))
        }
    }

    fn png(colour: [u8; 3]) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(RgbImage::from_pixel(4, 4, Rgb(colour)))
            .write_to(&mut out, image::ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    fn context(root: &Path, gallery: Gallery) -> Arc<AppContext> {
        let mut config = Config::default();
        config.artifacts.upload_dir = root.join("uploads");
        config.artifacts.static_dir = root.join("static");
        config.server.public_url = "http://faces.test/".to_string();
        Arc::new(AppContext::new(
            config,
            gallery,
            Pipeline::new(CornerLocator, CornerColour),
        ))
    }

    fn sample_gallery(root: &Path) -> Gallery {
        let red = root.join("gallery/Red_Star/1.jpg");
        let blue = root.join("gallery/Blue_Star/1.jpg");
        std::fs::create_dir_all(red.parent().unwrap()).unwrap();
        std::fs::create_dir_all(blue.parent().unwrap()).unwrap();
        std::fs::write(&red, b"red image").unwrap();
        std::fs::write(&blue, b"blue image").unwrap();
        Gallery::new(vec![
            GalleryEntry::new(red, Embedding::from_vec(vec![1.0, 0.0, 0.0])),
            GalleryEntry::new(blue, Embedding::from_vec(vec![0.0, 0.0, 1.0])),
        ])
        .unwrap()
    }

    fn predict_request(file_name: &str, bytes: &[u8]) -> Request<Body> {
        let mut body = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\nContent-Type: image/png\r\n\r\n"
        )
        .into_bytes();
        body.extend_from_slice(bytes);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

        Request::builder()
            .method("POST")
            .uri("/predict")
            .header(
                "content-type",
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    async fn json_body(resp: axum::response::Response) -> serde_json::Value {
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_predict_returns_match() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), sample_gallery(dir.path()));
        let app = create_app(ctx);

        let resp = app
            .oneshot(predict_request("me.png", &png([10, 0, 250])))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body: PredictResponse = serde_json::from_value(json_body(resp).await).unwrap();
        assert_eq!(body.name, "Blue Star");
        assert!(body.match_percentage > 99.0 && body.match_percentage <= 100.0);

        let published = body
            .matched_image_url
            .strip_prefix("http://faces.test/static/")
            .unwrap();
        assert!(published.ends_with(".jpg"));
        assert_eq!(
            std::fs::read(dir.path().join("static").join(published)).unwrap(),
            b"blue image"
        );
        let uploads: Vec<_> = std::fs::read_dir(dir.path().join("uploads"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(uploads.len(), 1);
        assert!(uploads[0].ends_with("_me.png"));
    }

    #[tokio::test]
    async fn test_predict_without_face() {
        let dir = tempfile::tempdir().unwrap();
        let app = create_app(context(dir.path(), sample_gallery(dir.path())));

        let resp = app
            .oneshot(predict_request("dark.png", &png([0, 0, 0])))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(resp).await["error"], "No face detected");
    }

    #[tokio::test]
    async fn test_predict_with_empty_gallery() {
        let dir = tempfile::tempdir().unwrap();
        let app = create_app(context(dir.path(), Gallery::default()));

        let resp = app
            .oneshot(predict_request("me.png", &png([200, 10, 10])))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json_body(resp).await["error"], "Gallery is empty");
    }

    #[tokio::test]
    async fn test_predict_rejects_undecodable_upload() {
        let dir = tempfile::tempdir().unwrap();
        let app = create_app(context(dir.path(), sample_gallery(dir.path())));

        let resp = app
            .oneshot(predict_request("junk.png", b"definitely not an image"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = json_body(resp).await;
        assert!(body["error"].as_str().unwrap().starts_with("Cannot decode image"));
        // rejected uploads are not kept
        assert!(!dir.path().join("uploads").exists());
    }

    #[tokio::test]
    async fn test_health_and_static() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), sample_gallery(dir.path()));
        std::fs::create_dir_all(&ctx.config.artifacts.static_dir).unwrap();
        std::fs::write(ctx.config.artifacts.static_dir.join("hello.txt"), "hi").unwrap();
        let app = create_app(ctx);

        let resp = app
            .clone()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let health: HealthResponse = serde_json::from_value(json_body(resp).await).unwrap();
        assert_eq!(health.gallery_size, 2);
        assert_eq!(health.dimension, Some(3));

        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/static/hello.txt")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"hi");
    }
}
