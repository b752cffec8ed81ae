use axum::{
    Json, Router,
    extract::State,
    http::header,
    response::{IntoResponse, Response},
    routing::get,
};
use chrono::Utc;
use serde::Deserialize;
use tracing::info;

use super::QueryParams;
use crate::{
    auth::AuthContext,
    error::AppError,
    inventory::{EXPORT_CSV_NAME, EXPORT_JSON_NAME, ExportFormat, InventoryQuery, to_csv},
    server::AppState,
};

#[derive(Debug, Default, Deserialize)]
struct ExportQuery {
    format: Option<String>,
}

fn attachment(name: &str) -> String {
    format!("attachment; filename=\"{}\"", name)
}

async fn inventory(
    State(state): State<AppState>,
    ctx: AuthContext,
    QueryParams(query): QueryParams<InventoryQuery>,
) -> Result<impl IntoResponse, AppError> {
    let page = state.analytics.inventory(ctx.user_id, &query, Utc::now()).await?;
    Ok(Json(page))
}

async fn export(
    State(state): State<AppState>,
    ctx: AuthContext,
    QueryParams(query): QueryParams<ExportQuery>,
) -> Result<Response, AppError> {
    let format = ExportFormat::from_query(query.format.as_deref());
    let export = state.analytics.export(ctx.user_id, &ctx.username, Utc::now()).await?;
    info!(user_id = ctx.user_id, items = export.inventory.len(), ?format, "Inventory exported");

    let response = match format {
        ExportFormat::Csv => (
            [
                (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
                (header::CONTENT_DISPOSITION, attachment(EXPORT_CSV_NAME)),
            ],
            to_csv(&export.inventory),
        )
            .into_response(),
        ExportFormat::Json => (
            [(header::CONTENT_DISPOSITION, attachment(EXPORT_JSON_NAME))],
            Json(export),
        )
            .into_response(),
    };
    Ok(response)
}

async fn insights(State(state): State<AppState>, ctx: AuthContext) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.analytics.inventory_insights(ctx.user_id, Utc::now()).await?))
}

async fn my_benefits(State(state): State<AppState>, ctx: AuthContext) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.analytics.my_benefits(ctx.user_id).await?))
}

async fn community_overview(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.analytics.community_overview(Utc::now()).await?))
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/inventory", get(inventory))
        .route("/inventory/export", get(export))
        .route("/inventory/insights", get(insights))
        .route("/benefits/my-benefits", get(my_benefits))
        .route("/benefits/community-overview", get(community_overview))
}
