use axum::extract::State;
use serde::Deserialize;

use crate::db::{queries, AppState};
use crate::error::{msg, AppError, OptionExt, Result};
use crate::extractors::{Json, Path, Query};
use crate::id::is_valid_prefixed_id;
use crate::models::Purchase;
use crate::pagination::{Paginated, PaginationQuery};

#[derive(Debug, Deserialize)]
pub struct ListPurchasesQuery {
    /// Filter on processed state when set
    pub processed: Option<bool>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// GET /admin/purchases - Browse recorded provider sales, newest first
pub async fn list_purchases(
    State(state): State<AppState>,
    Query(query): Query<ListPurchasesQuery>,
) -> Result<Json<Paginated<Purchase>>> {
    let page = PaginationQuery {
        limit: query.limit,
        offset: query.offset,
    };
    let (limit, offset) = (page.limit(), page.offset());

    let conn = state.db.get()?;
    let (items, total) = queries::list_purchases(&conn, query.processed, limit, offset)?;

    Ok(Json(Paginated::new(items, total, limit, offset)))
}

/// GET /admin/purchases/{id} - One purchase, raw provider payload included
pub async fn get_purchase(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Purchase>> {
    if !is_valid_prefixed_id(&id) {
        return Err(AppError::NotFound(msg::PURCHASE_NOT_FOUND.into()));
    }
    let conn = state.db.get()?;
    let purchase = queries::get_purchase_by_id(&conn, &id)?.or_not_found(msg::PURCHASE_NOT_FOUND)?;
    Ok(Json(purchase))
}
