//! HTTP routes over the custody engine.

use std::collections::BTreeSet;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use handreceipt_core::{
    AttachRequest, AttachmentEdge, AttachmentKind, AttachmentPoint, Category, CustodyEngine,
    CustodyStore, EntityRef, InitiationMethod, NewProperty, NewTransfer, Property, PropertyId,
    TransferId, TransferRequest, TransferSubject, UserId, VerifiedCredential,
};
use handreceipt_ledger::{LedgerClient, LedgerRecord};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::error::{ApiError, Result};
use crate::extract::ActingUser;

/// Shared handler state.
pub struct AppState<S: CustodyStore, L: LedgerClient> {
    pub engine: Arc<CustodyEngine<S>>,
    pub ledger: Arc<L>,
}

impl<S: CustodyStore, L: LedgerClient> Clone for AppState<S, L> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
            ledger: self.ledger.clone(),
        }
    }
}

impl<S: CustodyStore, L: LedgerClient> AppState<S, L> {
    pub fn new(engine: Arc<CustodyEngine<S>>, ledger: Arc<L>) -> Self {
        Self { engine, ledger }
    }
}

pub fn create_app<S: CustodyStore, L: LedgerClient>(state: AppState<S, L>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/properties", post(register_property::<S, L>))
        .route("/properties/{id}", get(get_property::<S, L>))
        .route("/properties/{id}/retire", post(retire_property::<S, L>))
        .route(
            "/properties/{id}/components",
            get(list_components::<S, L>).post(attach_component::<S, L>),
        )
        .route(
            "/properties/{id}/components/{component_id}",
            put(reposition_component::<S, L>).delete(detach_component::<S, L>),
        )
        .route(
            "/properties/{id}/available-components",
            get(available_components::<S, L>),
        )
        .route("/properties/{id}/qr-credential", post(issue_credential::<S, L>))
        .route("/properties/{id}/history", get(property_history::<S, L>))
        .route("/credentials/verify", post(verify_credential::<S, L>))
        .route(
            "/transfer-requests",
            get(list_transfers::<S, L>).post(create_transfer::<S, L>),
        )
        .route("/transfer-requests/{id}", get(get_transfer::<S, L>))
        .route("/transfer-requests/{id}/approve", post(approve_transfer::<S, L>))
        .route("/transfer-requests/{id}/reject", post(reject_transfer::<S, L>))
        .route("/transfer-requests/{id}/cancel", post(cancel_transfer::<S, L>))
        .layer(axum::middleware::from_fn(crate::middleware::correlate))
        .layer(cors)
        .with_state(state)
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// ============================================================================
// Request and response bodies
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterPropertyBody {
    pub serial_number: String,
    pub name: String,
    pub category: String,
    /// Defaults to the acting user.
    pub holder: Option<UserId>,
    #[serde(default)]
    pub is_attachable: bool,
    #[serde(default)]
    pub attachment_points: Vec<AttachmentPoint>,
    #[serde(default)]
    pub compatible_with: BTreeSet<Category>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachBody {
    pub component_id: PropertyId,
    pub slot: Option<String>,
    #[serde(default)]
    pub kind: AttachmentKind,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RepositionBody {
    pub slot: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailableQuery {
    /// Defaults to the acting user.
    pub owner_id: Option<UserId>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTransferBody {
    pub subject_id: Option<PropertyId>,
    pub serial_number: Option<String>,
    /// Required for offers; otherwise defaults to the acting user.
    pub destination_user_id: Option<UserId>,
    #[serde(default)]
    pub include_components: bool,
    pub method: InitiationMethod,
    pub credential: Option<String>,
    pub notes: Option<String>,
}

impl CreateTransferBody {
    fn into_new_transfer(self, initiator: UserId) -> Result<NewTransfer> {
        let subject = match (self.subject_id, self.serial_number) {
            (Some(id), None) => TransferSubject::Id(id),
            (None, Some(serial)) => TransferSubject::Serial(serial),
            _ => {
                return Err(ApiError::BadRequest(
                    "exactly one of subjectId or serialNumber is required".into(),
                ));
            }
        };
        let destination = match (self.method, self.destination_user_id) {
            (_, Some(destination)) => destination,
            (InitiationMethod::Offer, None) => {
                return Err(ApiError::BadRequest(
                    "offers require destinationUserId".into(),
                ));
            }
            (_, None) => initiator,
        };

        Ok(NewTransfer {
            subject,
            initiator,
            destination,
            include_components: self.include_components,
            method: self.method,
            credential: self.credential,
            notes: self.notes,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialPayload {
    pub payload: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedCredential {
    pub payload: String,
    pub property_id: PropertyId,
    pub expires_at: i64,
}

// ============================================================================
// Handlers
// ============================================================================

async fn health() -> &'static str {
    "ok"
}

async fn register_property<S: CustodyStore, L: LedgerClient>(
    State(state): State<AppState<S, L>>,
    ActingUser(actor): ActingUser,
    Json(body): Json<RegisterPropertyBody>,
) -> Result<(StatusCode, Json<Property>)> {
    let new = NewProperty {
        serial_number: body.serial_number,
        name: body.name,
        category: Category::new(body.category),
        holder: body.holder.unwrap_or(actor),
        is_attachable: body.is_attachable,
        attachment_points: body.attachment_points,
        compatible_with: body.compatible_with,
    };
    let property = state.engine.register_property(new, actor, now_ms())?;
    Ok((StatusCode::CREATED, Json(property)))
}

async fn get_property<S: CustodyStore, L: LedgerClient>(
    State(state): State<AppState<S, L>>,
    _actor: ActingUser,
    Path(id): Path<PropertyId>,
) -> Result<Json<Property>> {
    Ok(Json(state.engine.property(id)?))
}

async fn retire_property<S: CustodyStore, L: LedgerClient>(
    State(state): State<AppState<S, L>>,
    ActingUser(actor): ActingUser,
    Path(id): Path<PropertyId>,
) -> Result<Json<Property>> {
    Ok(Json(state.engine.retire_property(id, actor, now_ms())?))
}

async fn list_components<S: CustodyStore, L: LedgerClient>(
    State(state): State<AppState<S, L>>,
    _actor: ActingUser,
    Path(id): Path<PropertyId>,
) -> Result<Json<Vec<AttachmentEdge>>> {
    Ok(Json(state.engine.list_components(id)?))
}

async fn attach_component<S: CustodyStore, L: LedgerClient>(
    State(state): State<AppState<S, L>>,
    ActingUser(actor): ActingUser,
    Path(id): Path<PropertyId>,
    Json(body): Json<AttachBody>,
) -> Result<(StatusCode, Json<AttachmentEdge>)> {
    let request = AttachRequest {
        parent: id,
        component: body.component_id,
        actor,
        slot: body.slot,
        kind: body.kind,
        notes: body.notes,
    };
    let edge = state.engine.attach(request, now_ms())?;
    Ok((StatusCode::CREATED, Json(edge)))
}

async fn reposition_component<S: CustodyStore, L: LedgerClient>(
    State(state): State<AppState<S, L>>,
    ActingUser(actor): ActingUser,
    Path((id, component)): Path<(PropertyId, PropertyId)>,
    Json(body): Json<RepositionBody>,
) -> Result<Json<AttachmentEdge>> {
    let edge = state
        .engine
        .reposition(id, component, actor, body.slot, now_ms())?;
    Ok(Json(edge))
}

async fn detach_component<S: CustodyStore, L: LedgerClient>(
    State(state): State<AppState<S, L>>,
    ActingUser(actor): ActingUser,
    Path((id, component)): Path<(PropertyId, PropertyId)>,
) -> Result<StatusCode> {
    state.engine.detach(id, component, actor, now_ms())?;
    Ok(StatusCode::NO_CONTENT)
}

async fn available_components<S: CustodyStore, L: LedgerClient>(
    State(state): State<AppState<S, L>>,
    ActingUser(actor): ActingUser,
    Path(id): Path<PropertyId>,
    Query(query): Query<AvailableQuery>,
) -> Result<Json<Vec<Property>>> {
    let owner = query.owner_id.unwrap_or(actor);
    Ok(Json(state.engine.list_available_components(id, owner)?))
}

async fn issue_credential<S: CustodyStore, L: LedgerClient>(
    State(state): State<AppState<S, L>>,
    ActingUser(actor): ActingUser,
    Path(id): Path<PropertyId>,
) -> Result<Json<IssuedCredential>> {
    let credential = state.engine.issue_credential(id, actor, now_ms())?;
    let expires_at = credential
        .issued_at()
        .saturating_add(state.engine.credential_validity_ms());
    info!(property = %id, holder = %actor, "credential issued");
    Ok(Json(IssuedCredential {
        payload: credential.encode()?,
        property_id: id,
        expires_at,
    }))
}

async fn verify_credential<S: CustodyStore, L: LedgerClient>(
    State(state): State<AppState<S, L>>,
    _actor: ActingUser,
    Json(body): Json<CredentialPayload>,
) -> Result<Json<VerifiedCredential>> {
    Ok(Json(state.engine.verify_credential(&body.payload, now_ms())?))
}

async fn property_history<S: CustodyStore, L: LedgerClient>(
    State(state): State<AppState<S, L>>,
    _actor: ActingUser,
    Path(id): Path<PropertyId>,
) -> Result<Json<Vec<LedgerRecord>>> {
    // 404 for unknown properties rather than an empty history.
    state.engine.property(id)?;
    Ok(Json(state.ledger.history(EntityRef::Property(id)).await?))
}

async fn create_transfer<S: CustodyStore, L: LedgerClient>(
    State(state): State<AppState<S, L>>,
    ActingUser(actor): ActingUser,
    Json(body): Json<CreateTransferBody>,
) -> Result<(StatusCode, Json<TransferRequest>)> {
    let new = body.into_new_transfer(actor)?;
    let request = state.engine.create_transfer(new, now_ms())?;
    Ok((StatusCode::CREATED, Json(request)))
}

async fn list_transfers<S: CustodyStore, L: LedgerClient>(
    State(state): State<AppState<S, L>>,
    ActingUser(actor): ActingUser,
) -> Result<Json<Vec<TransferRequest>>> {
    Ok(Json(state.engine.transfers_for_user(actor)?))
}

async fn get_transfer<S: CustodyStore, L: LedgerClient>(
    State(state): State<AppState<S, L>>,
    _actor: ActingUser,
    Path(id): Path<TransferId>,
) -> Result<Json<TransferRequest>> {
    Ok(Json(state.engine.transfer(id)?))
}

async fn approve_transfer<S: CustodyStore, L: LedgerClient>(
    State(state): State<AppState<S, L>>,
    ActingUser(actor): ActingUser,
    Path(id): Path<TransferId>,
) -> Result<Json<TransferRequest>> {
    Ok(Json(state.engine.approve_transfer(id, actor, now_ms())?))
}

async fn reject_transfer<S: CustodyStore, L: LedgerClient>(
    State(state): State<AppState<S, L>>,
    ActingUser(actor): ActingUser,
    Path(id): Path<TransferId>,
) -> Result<Json<TransferRequest>> {
    Ok(Json(state.engine.reject_transfer(id, actor, now_ms())?))
}

async fn cancel_transfer<S: CustodyStore, L: LedgerClient>(
    State(state): State<AppState<S, L>>,
    ActingUser(actor): ActingUser,
    Path(id): Path<TransferId>,
) -> Result<Json<TransferRequest>> {
    Ok(Json(state.engine.cancel_transfer(id, actor, now_ms())?))
}
