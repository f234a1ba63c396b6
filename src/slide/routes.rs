//! HTTP route handlers for the DeepZoom API
//!
//! URL shape follows the DeepZoom file layout: a `.dzi` descriptor next to
//! a `slide_files/{level}/{col}_{row}.{ext}` tile tree, plus thumbnail and
//! properties endpoints, and the same tree per overlay keyed by the
//! overlay's own identifier.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::deepzoom::{DeepZoomError, TileFormat};
use crate::slide::SlideError;

use super::service::DeepZoomService;

/// Thumbnails never exceed this edge length
const MAX_THUMBNAIL_DIM: u32 = 1024;
const DEFAULT_THUMBNAIL_DIM: u32 = 512;
const DEFAULT_THUMBNAIL_JPEG_QUALITY: u8 = 75;

#[derive(Clone)]
pub struct DeepZoomAppState {
    pub service: Arc<DeepZoomService>,
}

/// Error response for the DeepZoom API
#[derive(Debug, Serialize)]
pub struct DeepZoomErrorResponse {
    pub error: String,
    pub code: String,
}

impl DeepZoomErrorResponse {
    fn not_found(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: "not_found".to_string(),
        }
    }

    fn bad_request(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: "bad_request".to_string(),
        }
    }
}

impl From<DeepZoomError> for DeepZoomErrorResponse {
    fn from(e: DeepZoomError) -> Self {
        let code = match &e {
            DeepZoomError::InvalidAddress { .. }
            | DeepZoomError::AssociatedImageNotFound(_)
            | DeepZoomError::Slide(SlideError::NotFound(_)) => "not_found",
            DeepZoomError::InvalidFormat(_) | DeepZoomError::InvalidColor(_) => "bad_request",
            DeepZoomError::UnsupportedAlpha { .. }
            | DeepZoomError::Slide(_)
            | DeepZoomError::Codec(_) => "internal_error",
        };
        Self {
            error: e.to_string(),
            code: code.to_string(),
        }
    }
}

impl IntoResponse for DeepZoomErrorResponse {
    fn into_response(self) -> Response {
        let status = match self.code.as_str() {
            "not_found" => StatusCode::NOT_FOUND,
            "bad_request" => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(self)).into_response()
    }
}

/// Tile address parsed from `{level}/{col}_{row}.{ext}`
#[derive(Debug, PartialEq, Eq)]
struct TileAddress {
    level: u32,
    col: u32,
    row: u32,
    format: TileFormat,
    /// URL extension, echoed in the Content-Type
    extension: String,
}

/// Parse a tile path. Any malformed component is a 404: the addressed file
/// does not exist in the virtual DeepZoom tree.
fn parse_tile_address(level: &str, location: &str) -> Result<TileAddress, DeepZoomErrorResponse> {
    let malformed = || DeepZoomErrorResponse::not_found(format!("no such tile: {}", location));

    let level = level.parse::<u32>().map_err(|_| malformed())?;
    let (coords, extension) = location.split_once('.').ok_or_else(malformed)?;
    let format = TileFormat::from_extension(extension).map_err(|_| malformed())?;
    let (col, row) = coords.split_once('_').ok_or_else(malformed)?;
    let col = col.parse::<u32>().map_err(|_| malformed())?;
    let row = row.parse::<u32>().map_err(|_| malformed())?;

    Ok(TileAddress {
        level,
        col,
        row,
        format,
        extension: extension.to_string(),
    })
}

fn image_response(content_type: String, bytes: bytes::Bytes) -> Response {
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type),
            (
                header::CACHE_CONTROL,
                "public, max-age=31536000, immutable".to_string(),
            ),
        ],
        bytes,
    )
        .into_response()
}

fn log_and_convert(identifier: &str, e: DeepZoomError) -> DeepZoomErrorResponse {
    warn!("DeepZoom request failed for {}: {}", identifier, e);
    DeepZoomErrorResponse::from(e)
}

/// GET /:identifier/slide_files/:level/:location - one tile
pub async fn get_tile(
    State(state): State<DeepZoomAppState>,
    Path((identifier, level, location)): Path<(String, String, String)>,
) -> Result<Response, DeepZoomErrorResponse> {
    let address = parse_tile_address(&level, &location)?;

    let bytes = state
        .service
        .get_tile(
            &identifier,
            address.level,
            address.col,
            address.row,
            address.format,
        )
        .await
        .map_err(|e| log_and_convert(&identifier, e))?;

    Ok(image_response(format!("image/{}", address.extension), bytes))
}

/// GET /:identifier/overlays/:overlay/slide_files/:level/:location
pub async fn get_overlay_tile(
    State(state): State<DeepZoomAppState>,
    Path((identifier, overlay, level, location)): Path<(String, String, String, String)>,
) -> Result<Response, DeepZoomErrorResponse> {
    let address = parse_tile_address(&level, &location)?;

    let bytes = state
        .service
        .get_overlay_tile(
            &identifier,
            &overlay,
            address.level,
            address.col,
            address.row,
            address.format,
        )
        .await
        .map_err(|e| log_and_convert(&overlay, e))?;

    Ok(image_response(format!("image/{}", address.extension), bytes))
}

fn xml_response(xml: String) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/xml")],
        xml,
    )
        .into_response()
}

/// GET /:identifier/slide.dzi - DZI descriptor
pub async fn get_dzi(
    State(state): State<DeepZoomAppState>,
    Path(identifier): Path<String>,
) -> Result<Response, DeepZoomErrorResponse> {
    let xml = state
        .service
        .get_dzi(&identifier)
        .await
        .map_err(|e| log_and_convert(&identifier, e))?;
    Ok(xml_response(xml))
}

/// GET /:identifier/overlays/:overlay/slide.dzi - overlay DZI descriptor
pub async fn get_overlay_dzi(
    State(state): State<DeepZoomAppState>,
    Path((identifier, overlay)): Path<(String, String)>,
) -> Result<Response, DeepZoomErrorResponse> {
    let xml = state
        .service
        .get_overlay_dzi(&identifier, &overlay)
        .await
        .map_err(|e| log_and_convert(&overlay, e))?;
    Ok(xml_response(xml))
}

#[derive(Debug, Deserialize)]
pub struct ThumbnailQuery {
    size: Option<String>,
    #[serde(rename = "Q")]
    quality: Option<String>,
}

async fn thumbnail(
    state: DeepZoomAppState,
    identifier: String,
    format: TileFormat,
    query: ThumbnailQuery,
) -> Result<Response, DeepZoomErrorResponse> {
    let size = match query.size {
        Some(raw) => raw
            .parse::<u32>()
            .map_err(|_| DeepZoomErrorResponse::bad_request("incorrect value for size"))?,
        None => DEFAULT_THUMBNAIL_DIM,
    };
    if size > MAX_THUMBNAIL_DIM {
        return Err(DeepZoomErrorResponse::bad_request(
            "too large thumbnail requested",
        ));
    }

    // The quality knob only exists for jpg
    let quality = match (format, query.quality) {
        (TileFormat::Png, Some(_)) => {
            return Err(DeepZoomErrorResponse::bad_request(
                "compression quality only makes sense for jpg",
            ));
        }
        (TileFormat::Png, None) => 0,
        (TileFormat::Jpeg, None) => DEFAULT_THUMBNAIL_JPEG_QUALITY,
        (TileFormat::Jpeg, Some(raw)) => {
            let quality = raw
                .parse::<u8>()
                .map_err(|_| DeepZoomErrorResponse::bad_request("incorrect value for quality"))?;
            if quality > 100 {
                return Err(DeepZoomErrorResponse::bad_request(
                    "incorrect value for quality",
                ));
            }
            quality
        }
    };

    let bytes = state
        .service
        .get_thumbnail(&identifier, size, format, quality)
        .await
        .map_err(|e| log_and_convert(&identifier, e))?;

    let extension = match format {
        TileFormat::Jpeg => "jpg",
        TileFormat::Png => "png",
    };
    Ok(image_response(format!("image/{}", extension), bytes))
}

/// GET /:identifier/thumbnail.jpg
pub async fn get_thumbnail_jpg(
    State(state): State<DeepZoomAppState>,
    Path(identifier): Path<String>,
    Query(query): Query<ThumbnailQuery>,
) -> Result<Response, DeepZoomErrorResponse> {
    thumbnail(state, identifier, TileFormat::Jpeg, query).await
}

/// GET /:identifier/thumbnail.png
pub async fn get_thumbnail_png(
    State(state): State<DeepZoomAppState>,
    Path(identifier): Path<String>,
    Query(query): Query<ThumbnailQuery>,
) -> Result<Response, DeepZoomErrorResponse> {
    thumbnail(state, identifier, TileFormat::Png, query).await
}

/// GET /:identifier/properties - all slide properties as JSON
pub async fn get_properties(
    State(state): State<DeepZoomAppState>,
    Path(identifier): Path<String>,
) -> Result<Json<HashMap<String, String>>, DeepZoomErrorResponse> {
    let properties = state
        .service
        .get_properties(&identifier)
        .await
        .map_err(|e| log_and_convert(&identifier, e))?;
    Ok(Json(properties))
}

/// Build DeepZoom API routes
pub fn deepzoom_routes(state: DeepZoomAppState) -> Router {
    Router::new()
        .route("/:identifier/slide_files/:level/:location", get(get_tile))
        .route("/:identifier/slide.dzi", get(get_dzi))
        .route(
            "/:identifier/overlays/:overlay/slide_files/:level/:location",
            get(get_overlay_tile),
        )
        .route(
            "/:identifier/overlays/:overlay/slide.dzi",
            get(get_overlay_dzi),
        )
        .route("/:identifier/thumbnail.jpg", get(get_thumbnail_jpg))
        .route("/:identifier/thumbnail.png", get(get_thumbnail_png))
        .route("/:identifier/properties", get(get_properties))
        .with_state(state)
}
