mod activations;
mod purchases;

pub use activations::*;
pub use purchases::*;

use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};

use crate::db::AppState;
use crate::middleware::admin_auth;

pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/admin/activations", post(issue_activation))
        .route("/admin/activations", get(list_activations))
        .route("/admin/activations/{id}", get(get_activation))
        .route("/admin/activations/{id}/revoke", post(revoke_activation))
        // Remote release for lost devices (support desk)
        .route(
            "/admin/activations/{id}/devices/{device_id}",
            delete(release_device_admin),
        )
        .route("/admin/purchases", get(list_purchases))
        .route("/admin/purchases/{id}", get(get_purchase))
        .layer(middleware::from_fn_with_state(state, admin_auth))
}
