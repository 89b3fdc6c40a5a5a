use crate::api::error::AppError;
use crate::entities::prelude::*;
use crate::services::short_link_service::{ShortLinkError, ShortLinkService};
use axum::{
    Json,
    extract::{Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use sea_orm::EntityTrait;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

#[derive(Deserialize, ToSchema, Validate)]
pub struct CreateShareRequest {
    #[validate(range(min = 1))]
    pub material_id: i32,
}

#[derive(Serialize, ToSchema)]
pub struct ShortLinkResponse {
    pub code: String,
    pub short_url: String,
    pub original_url: String,
    pub clicks: i32,
}

fn redirect(location: &str) -> Result<Response, AppError> {
    Response::builder()
        .status(StatusCode::FOUND)
        .header(header::LOCATION, location)
        .body(axum::body::Body::empty())
        .map_err(|e| AppError::Internal(e.to_string()))
}

/// Mint (or reuse) the short link for a material's detail page
#[utoipa::path(
    post,
    path = "/shares",
    request_body = CreateShareRequest,
    responses(
        (status = 201, description = "Short link for the material", body = ShortLinkResponse),
        (status = 400, description = "Invalid request"),
        (status = 404, description = "Material not found")
    ),
    tag = "shares"
)]
pub async fn create_share(
    State(state): State<crate::AppState>,
    Json(req): Json<CreateShareRequest>,
) -> Result<impl IntoResponse, AppError> {
    req.validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    Materials::find_by_id(req.material_id)
        .one(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Material not found".to_string()))?;

    let base_url = &state.config.public_base_url;
    let target = ShortLinkService::material_detail_url(base_url, req.material_id);
    let link = ShortLinkService::get_or_create(&state.db, &target).await?;

    tracing::info!("🔗 Short link {} -> {}", link.code, link.original_url);

    Ok((
        StatusCode::CREATED,
        Json(ShortLinkResponse {
            short_url: ShortLinkService::short_url(base_url, &link.code),
            code: link.code,
            original_url: link.original_url,
            clicks: link.clicks,
        }),
    ))
}

/// Follow a short link
#[utoipa::path(
    get,
    path = "/s/{code}",
    params(("code" = String, Path, description = "Short code")),
    responses(
        (status = 302, description = "Redirect to the solution file or the original URL"),
        (status = 404, description = "Unknown, expired or exhausted link")
    ),
    tag = "shares"
)]
pub async fn follow_short_link(
    State(state): State<crate::AppState>,
    Path(code): Path<String>,
) -> Result<Response, AppError> {
    let link = match ShortLinkService::resolve(&state.db, &code).await {
        Ok(link) => link,
        Err(ShortLinkError::NotFound) => {
            return Err(AppError::NotFound("Link not found".to_string()));
        }
        Err(e) => return Err(e.into()),
    };

    // Solution downloads skip the click counter
    if let Some(material_id) = ShortLinkService::material_id_from_url(&link.original_url) {
        let solution = Materials::find_by_id(material_id)
            .one(&state.db)
            .await?
            .and_then(|m| m.solution_file)
            .filter(|f| !f.is_empty());

        if let Some(solution) = solution {
            tracing::debug!("Short link {} -> solution of material {}", code, material_id);
            return redirect(&format!("/files/{}", solution));
        }
    }

    let link = ShortLinkService::click(&state.db, &link).await?;
    tracing::debug!("Short link {} followed ({} clicks)", code, link.clicks);

    redirect(&link.original_url)
}
