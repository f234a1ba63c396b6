//! REST API for the image catalog
//!
//! Registers slides (and their mask overlays) under stable identifiers.
//! Creation probes each referenced file through the slide adapter so only
//! readable slides enter the catalog.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::slide::SlideOpener;

use super::registry::{Catalog, ImageRecord, OverlayRecord};

#[derive(Clone)]
pub struct CatalogAppState {
    pub catalog: Arc<Catalog>,
    pub opener: Arc<dyn SlideOpener>,
}

#[derive(Debug, Serialize)]
pub struct CatalogErrorResponse {
    pub error: String,
    pub code: String,
}

impl IntoResponse for CatalogErrorResponse {
    fn into_response(self) -> Response {
        let status = match self.code.as_str() {
            "not_found" => StatusCode::NOT_FOUND,
            "bad_request" => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(self)).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateImageInput {
    pub path: std::path::PathBuf,
    pub identifier: String,
    #[serde(default)]
    pub overlays: Vec<OverlayRecord>,
}

/// GET /images - list all registered images
pub async fn list_images(State(state): State<CatalogAppState>) -> Json<Vec<ImageRecord>> {
    Json(state.catalog.list())
}

/// POST /images - register a new image
pub async fn create_image(
    State(state): State<CatalogAppState>,
    Json(input): Json<CreateImageInput>,
) -> Result<Json<ImageRecord>, CatalogErrorResponse> {
    let vendor = state.opener.detect_vendor(&input.path).map_err(|e| {
        warn!("Cannot detect vendor for slide {:?}: {}", input.path, e);
        CatalogErrorResponse {
            error: e.to_string(),
            code: "bad_request".to_string(),
        }
    })?;
    info!("Importing {:?} with vendor {}", input.path, vendor);

    for overlay in &input.overlays {
        let vendor = state.opener.detect_vendor(&overlay.path).map_err(|e| {
            warn!("Cannot detect vendor for mask {:?}: {}", overlay.path, e);
            CatalogErrorResponse {
                error: e.to_string(),
                code: "bad_request".to_string(),
            }
        })?;
        info!("Importing mask {:?} with vendor {}", overlay.path, vendor);
    }

    let record = ImageRecord {
        identifier: input.identifier,
        path: input.path,
        overlays: input.overlays,
    };
    state.catalog.insert(record.clone());

    Ok(Json(record))
}

/// GET /images/:identifier - fetch one image record
pub async fn find_image(
    State(state): State<CatalogAppState>,
    Path(identifier): Path<String>,
) -> Result<Json<ImageRecord>, CatalogErrorResponse> {
    state
        .catalog
        .get(&identifier)
        .map(Json)
        .ok_or_else(|| CatalogErrorResponse {
            error: format!("image not found: {}", identifier),
            code: "not_found".to_string(),
        })
}

/// DELETE /images/:identifier - remove an image record
pub async fn delete_image(
    State(state): State<CatalogAppState>,
    Path(identifier): Path<String>,
) -> Result<Json<bool>, CatalogErrorResponse> {
    if state.catalog.remove(&identifier) {
        Ok(Json(true))
    } else {
        Err(CatalogErrorResponse {
            error: format!("image not found: {}", identifier),
            code: "not_found".to_string(),
        })
    }
}

/// Build catalog API routes
pub fn catalog_routes(state: CatalogAppState) -> Router {
    Router::new()
        .route("/images", get(list_images).post(create_image))
        .route(
            "/images/:identifier",
            get(find_image).delete(delete_image),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{MockOpener, body_json, get_request, request_with_json};
    use axum::http::StatusCode;
    use tower::util::ServiceExt;

    fn router(opener: Arc<MockOpener>) -> (Router, Arc<Catalog>) {
        let catalog = Arc::new(Catalog::new());
        let state = CatalogAppState {
            catalog: Arc::clone(&catalog),
            opener,
        };
        (catalog_routes(state), catalog)
    }

    #[tokio::test]
    async fn test_create_and_fetch_image() {
        let (router, catalog) = router(Arc::new(MockOpener::new(512, 512)));

        let response = router
            .clone()
            .oneshot(request_with_json(
                "POST",
                "/images",
                serde_json::json!({"identifier": "s1", "path": "/slides/s1.svs"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(catalog.len(), 1);

        let response = router
            .oneshot(get_request("/images/s1"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let record: ImageRecord = body_json(response).await;
        assert_eq!(record.identifier, "s1");
    }

    #[tokio::test]
    async fn test_create_rejects_unreadable_slide() {
        let (router, catalog) = router(Arc::new(MockOpener::new(512, 512).failing()));

        let response = router
            .oneshot(request_with_json(
                "POST",
                "/images",
                serde_json::json!({"identifier": "s1", "path": "/slides/s1.svs"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(catalog.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_image_is_404() {
        let (router, _) = router(Arc::new(MockOpener::new(512, 512)));
        let response = router
            .oneshot(get_request("/images/nope"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
