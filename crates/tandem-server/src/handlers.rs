//! RPC method handlers organized by domain.

use std::sync::Arc;

use chrono::NaiveDate;

use tandem_core::ids::{AccountId, PairingRequestId, PartnershipId};
use tandem_core::progress::PartnershipProgress;
use tandem_engine::pairing::{request_pairing, respond_to_pairing};
use tandem_engine::reminder::send_reminder;
use tandem_engine::{EngineContext, EngineError};

use crate::rpc::{self, RpcResponse};

/// Shared state available to all RPC handlers.
pub struct HandlerState {
    pub ctx: EngineContext,
}

impl HandlerState {
    pub fn new(ctx: EngineContext) -> Self {
        Self { ctx }
    }
}

const AUTHENTICATED_METHODS: &[&str] = &[
    "partner.remind",
    "pairing.request",
    "pairing.respond",
    "pairing.pending",
    "assignment.current",
    "assignment.complete",
    "progress.get",
    "device.register",
];

/// Dispatch an RPC method to the appropriate handler. `caller` is the
/// verified account id, if the request carried a valid token.
pub async fn dispatch(
    state: &Arc<HandlerState>,
    caller: Option<&AccountId>,
    method: &str,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let caller = match caller {
        Some(caller) => caller,
        None if AUTHENTICATED_METHODS.contains(&method) => return RpcResponse::unauthorized(id),
        None => {
            return match method {
                "system.ping" | "health" => health(state, id),
                _ => RpcResponse::method_not_found(id, method),
            }
        }
    };

    match method {
        // Partner
        "partner.remind" => partner_remind(state, caller, params, id).await,

        // Pairing
        "pairing.request" => pairing_request(state, caller, params, id),
        "pairing.respond" => pairing_respond(state, caller, params, id),
        "pairing.pending" => pairing_pending(state, caller, id),

        // Assignment
        "assignment.current" => assignment_current(state, caller, params, id),
        "assignment.complete" => assignment_complete(state, caller, params, id),

        // Progress
        "progress.get" => progress_get(state, caller, params, id),

        // Device
        "device.register" => device_register(state, caller, params, id),

        // System
        "system.ping" | "health" => health(state, id),

        _ => RpcResponse::method_not_found(id, method),
    }
}

fn fail(id: Option<serde_json::Value>, err: impl Into<EngineError>) -> RpcResponse {
    RpcResponse::from_engine_error(id, &err.into())
}

fn to_result<T: serde::Serialize>(id: Option<serde_json::Value>, value: &T) -> RpcResponse {
    match serde_json::to_value(value) {
        Ok(json) => RpcResponse::success(id, json),
        Err(e) => RpcResponse::internal_error(id, e.to_string()),
    }
}

/// Progress for `partnershipId`, visible only to its members.
fn member_progress(
    state: &HandlerState,
    caller: &AccountId,
    params: &serde_json::Value,
    id: &Option<serde_json::Value>,
) -> Result<PartnershipProgress, RpcResponse> {
    let partnership = rpc::require_str(params, "partnershipId")
        .map(PartnershipId::from_raw)
        .map_err(|e| RpcResponse::invalid_params(id.clone(), e))?;
    match state.ctx.store.progress().find(&partnership) {
        Ok(Some(progress)) if progress.is_member(caller) => Ok(progress),
        Ok(_) => Err(RpcResponse::error(
            id.clone(),
            rpc::NOT_FOUND,
            format!("Not found: partnership {partnership}"),
        )),
        Err(e) => Err(fail(id.clone(), e)),
    }
}

// ── Partner ──

async fn partner_remind(
    state: &Arc<HandlerState>,
    caller: &AccountId,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let partnership = match rpc::require_str(params, "partnershipId") {
        Ok(s) => PartnershipId::from_raw(s),
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    let partner = match rpc::require_str(params, "partnerId") {
        Ok(s) => AccountId::from_raw(s),
        Err(e) => return RpcResponse::invalid_params(id, e),
    };

    match send_reminder(&state.ctx, caller, &partnership, &partner).await {
        Ok(receipt) => to_result(id, &receipt),
        Err(e) => fail(id, e),
    }
}

// ── Pairing ──

fn pairing_request(
    state: &Arc<HandlerState>,
    caller: &AccountId,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let to = match rpc::require_str(params, "toAccountId") {
        Ok(s) => AccountId::from_raw(s),
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    match request_pairing(&state.ctx, caller, &to) {
        Ok(request) => to_result(id, &request),
        Err(e) => fail(id, e),
    }
}

fn pairing_respond(
    state: &Arc<HandlerState>,
    caller: &AccountId,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let request_id = match rpc::require_str(params, "requestId") {
        Ok(s) => PairingRequestId::from_raw(s),
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    let accept = match rpc::require_bool(params, "accept") {
        Ok(b) => b,
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    match respond_to_pairing(&state.ctx, caller, &request_id, accept) {
        Ok(request) => to_result(id, &request),
        Err(e) => fail(id, e),
    }
}

fn pairing_pending(
    state: &Arc<HandlerState>,
    caller: &AccountId,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    match state.ctx.store.pairing().pending_for(caller) {
        Ok(requests) => to_result(id, &serde_json::json!({ "requests": requests })),
        Err(e) => fail(id, e),
    }
}

// ── Assignment ──

fn assignment_current(
    state: &Arc<HandlerState>,
    caller: &AccountId,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let progress = match member_progress(state, caller, params, &id) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let store = &state.ctx.store;
    let assignments = store.assignments();
    let current = match assignments.open_for(&progress.partnership_id) {
        Ok(Some(open)) => Some(open),
        Ok(None) => match assignments.latest_for(&progress.partnership_id) {
            Ok(latest) => latest,
            Err(e) => return fail(id, e),
        },
        Err(e) => return fail(id, e),
    };
    let Some(assignment) = current else {
        return RpcResponse::success(
            id,
            serde_json::json!({ "assignment": null, "isComplete": progress.is_complete }),
        );
    };

    let subtopic = match store.catalog().load() {
        Ok(catalog) => catalog.subtopic(assignment.subtopic_id).cloned(),
        Err(e) => return fail(id, e),
    };
    RpcResponse::success(
        id,
        serde_json::json!({
            "assignment": assignment,
            "state": assignment.state(),
            "callerCompleted": assignment.has_completed(caller),
            "subtopic": subtopic.map(|s| serde_json::json!({
                "id": s.id,
                "topicId": s.topic_id,
                "name": s.name,
                "round": s.order,
            })),
            "isComplete": progress.is_complete,
        }),
    )
}

fn assignment_complete(
    state: &Arc<HandlerState>,
    caller: &AccountId,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let progress = match member_progress(state, caller, params, &id) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let assignments = state.ctx.store.assignments();

    let date = match rpc::optional_str(params, "date") {
        Some(raw) => match NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
            Ok(date) => date,
            Err(_) => return RpcResponse::invalid_params(id, format!("Invalid date: {raw}")),
        },
        None => match assignments.open_for(&progress.partnership_id) {
            Ok(Some(open)) => open.date,
            Ok(None) => {
                return RpcResponse::error(id, rpc::NOT_FOUND, "Not found: no open assignment");
            }
            Err(e) => return fail(id, e),
        },
    };

    match assignments.record_completion(&progress.partnership_id, date, caller, state.ctx.now()) {
        Ok(assignment) => to_result(id, &assignment),
        Err(e) => fail(id, e),
    }
}

// ── Progress ──

fn progress_get(
    state: &Arc<HandlerState>,
    caller: &AccountId,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let catalog = match state.ctx.store.catalog().load() {
        Ok(c) => c,
        Err(e) => return fail(id, e),
    };
    let describe = |progress: &PartnershipProgress| {
        serde_json::json!({
            "progress": progress,
            "remainingSubtopics": catalog.remaining_subtopics(&progress.completed_subtopics),
        })
    };

    if rpc::optional_str(params, "partnershipId").is_some() {
        return match member_progress(state, caller, params, &id) {
            Ok(progress) => RpcResponse::success(id, describe(&progress)),
            Err(resp) => resp,
        };
    }

    match state.ctx.store.progress().list_for_account(caller) {
        Ok(all) => RpcResponse::success(
            id,
            serde_json::json!({ "partnerships": all.iter().map(describe).collect::<Vec<_>>() }),
        ),
        Err(e) => fail(id, e),
    }
}

// ── Device ──

fn device_register(
    state: &Arc<HandlerState>,
    caller: &AccountId,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let token = rpc::optional_str(params, "deviceToken").filter(|t| !t.is_empty());
    match state.ctx.store.accounts().set_push_token(caller, token, state.ctx.now()) {
        Ok(()) => RpcResponse::success(id, serde_json::json!({ "registered": token.is_some() })),
        Err(e) => fail(id, e),
    }
}

// ── System ──

fn health(state: &Arc<HandlerState>, id: Option<serde_json::Value>) -> RpcResponse {
    let pending = state.ctx.store.changes().pending_count();
    let db_ok = pending.is_ok();

    RpcResponse::success(
        id,
        serde_json::json!({
            "status": if db_ok { "healthy" } else { "degraded" },
            "timestamp": state.ctx.now().to_rfc3339(),
            "components": {
                "database": if db_ok { "ok" } else { "error" },
            },
            "pendingChanges": pending.unwrap_or_default(),
        }),
    )
}
