use axum::extract::State;
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};

use crate::db::{queries, AppState};
use crate::email::{ActivationEmail, EmailTrigger};
use crate::error::{msg, AppError, OptionExt, Result};
use crate::extractors::{Json, Path, Query};
use crate::id::is_valid_prefixed_id;
use crate::models::{Activation, CreateActivation, DeviceBinding, ProductTier};
use crate::pagination::{Paginated, PaginationQuery};
use crate::util::mask_code;

/// Request body for POST /admin/activations
#[derive(Debug, Deserialize)]
pub struct IssueRequest {
    pub email: String,
    pub product_type: ProductTier,
    /// Overrides the tier default when set
    pub days_valid: Option<i64>,
    /// Overrides the tier default when set
    pub max_devices: Option<i64>,
    pub note: Option<String>,
    pub metadata: Option<serde_json::Value>,
    /// Email the code to the owner (default true)
    pub send_email: Option<bool>,
}

/// POST /admin/activations - Issue an activation directly
///
/// The response is the only place the plaintext code appears besides the
/// owner's email; log lines carry a masked form.
pub async fn issue_activation(
    State(state): State<AppState>,
    Json(body): Json<IssueRequest>,
) -> Result<(StatusCode, Json<Activation>)> {
    let tier = body.product_type;
    let input = CreateActivation {
        email: body.email.trim().to_string(),
        product_type: tier,
        days_valid: body.days_valid.unwrap_or_else(|| tier.default_days_valid()),
        max_devices: body
            .max_devices
            .unwrap_or_else(|| tier.default_max_devices()),
        purchase_id: None,
        metadata: body.metadata.unwrap_or_else(|| serde_json::json!({})),
        note: body.note,
    };

    let conn = state.db.get()?;
    let activation = queries::issue_activation(&conn, &state.code_prefix, &input)?;

    tracing::info!(
        activation_id = %activation.id,
        code = %mask_code(&activation.code),
        tier = %activation.product_type,
        "Admin issued activation"
    );

    if body.send_email.unwrap_or(true) {
        deliver_code_email(&state, &activation);
    }

    Ok((StatusCode::CREATED, Json(activation)))
}

#[derive(Debug, Deserialize)]
pub struct ListActivationsQuery {
    pub email: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// GET /admin/activations - List issued activations, newest first
pub async fn list_activations(
    State(state): State<AppState>,
    Query(query): Query<ListActivationsQuery>,
) -> Result<Json<Paginated<Activation>>> {
    let page = PaginationQuery {
        limit: query.limit,
        offset: query.offset,
    };
    let (limit, offset) = (page.limit(), page.offset());

    let conn = state.db.get()?;
    let (items, total) =
        queries::list_activations(&conn, query.email.as_deref(), limit, offset)?;

    Ok(Json(Paginated::new(items, total, limit, offset)))
}

/// Activation plus its device bindings, for the detail endpoint.
#[derive(Debug, Serialize)]
pub struct ActivationDetail {
    #[serde(flatten)]
    pub activation: Activation,
    pub active_device_count: i64,
    pub devices: Vec<DeviceBinding>,
}

/// GET /admin/activations/{id} - Inspect one activation and its devices
pub async fn get_activation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ActivationDetail>> {
    if !is_valid_prefixed_id(&id) {
        return Err(AppError::NotFound(msg::ACTIVATION_NOT_FOUND.into()));
    }
    let conn = state.db.get()?;
    let activation =
        queries::get_activation_by_id(&conn, &id)?.or_not_found(msg::ACTIVATION_NOT_FOUND)?;
    let devices = queries::list_bindings(&conn, &activation.id)?;
    let active_device_count = devices.iter().filter(|d| d.active).count() as i64;

    Ok(Json(ActivationDetail {
        activation,
        active_device_count,
        devices,
    }))
}

/// POST /admin/activations/{id}/revoke - Soft-revoke an activation
///
/// Idempotent: revoking twice keeps the original revoked_at. The row is
/// never deleted, so the audit trail survives.
pub async fn revoke_activation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Activation>> {
    if !is_valid_prefixed_id(&id) {
        return Err(AppError::NotFound(msg::ACTIVATION_NOT_FOUND.into()));
    }
    let conn = state.db.get()?;
    queries::get_activation_by_id(&conn, &id)?.or_not_found(msg::ACTIVATION_NOT_FOUND)?;

    let revoked_now = queries::revoke_activation(&conn, &id)?;
    if revoked_now {
        tracing::info!(activation_id = %id, "Admin revoked activation");
    }

    let activation =
        queries::get_activation_by_id(&conn, &id)?.or_not_found(msg::ACTIVATION_NOT_FOUND)?;
    Ok(Json(activation))
}

#[derive(Debug, Serialize)]
pub struct AdminReleaseResponse {
    /// Whether this call freed a slot (false if the device held none)
    pub released: bool,
    pub device_count: i64,
    pub device_quota: i64,
}

/// DELETE /admin/activations/{id}/devices/{device_id} - Forced release
///
/// Support-desk path for lost or retired devices; idempotent like the
/// public release.
pub async fn release_device_admin(
    State(state): State<AppState>,
    Path((id, device_id)): Path<(String, String)>,
) -> Result<Json<AdminReleaseResponse>> {
    if !is_valid_prefixed_id(&id) {
        return Err(AppError::NotFound(msg::ACTIVATION_NOT_FOUND.into()));
    }
    let conn = state.db.get()?;
    let activation =
        queries::get_activation_by_id(&conn, &id)?.or_not_found(msg::ACTIVATION_NOT_FOUND)?;

    let released = queries::release_binding(&conn, &activation.id, &device_id)?;
    let device_count = queries::active_device_count(&conn, &activation.id)?;

    if released {
        tracing::info!(activation_id = %id, "Admin released device slot");
    }

    Ok(Json(AdminReleaseResponse {
        released,
        device_count,
        device_quota: activation.max_devices,
    }))
}

fn deliver_code_email(state: &AppState, activation: &Activation) {
    let email_service = state.email_service.clone();
    let to_email = activation.email.clone();
    let code = activation.code.clone();
    let product_name = activation.product_type.to_string();
    let activation_id = activation.id.clone();
    let expires_at = activation.expires_at;
    let max_devices = activation.max_devices;

    tokio::spawn(async move {
        let message = ActivationEmail {
            to_email: &to_email,
            code: &code,
            product_name: &product_name,
            activation_id: &activation_id,
            expires_at,
            max_devices,
            trigger: EmailTrigger::AdminIssued,
        };
        if let Err(e) = email_service.send_activation_email(message).await {
            tracing::warn!(
                activation_id = %activation_id,
                "Failed to deliver activation email: {}",
                e
            );
        }
    });
}
