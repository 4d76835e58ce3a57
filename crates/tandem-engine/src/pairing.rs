use tracing::{debug, instrument, warn};

use tandem_core::ids::{AccountId, PairingRequestId};
use tandem_core::notify::PushMessage;
use tandem_store::pairing::{PairingRequest, PairingStatus};
use tandem_store::StoreError;

use crate::bootstrap::{bootstrap_partnership, BootstrapOutcome};
use crate::context::EngineContext;
use crate::error::EngineError;

/// Create a pending request. The recipient is told through the change
/// feed, not here.
#[instrument(skip(ctx), fields(account_id = %from))]
pub fn request_pairing(
    ctx: &EngineContext,
    from: &AccountId,
    to: &AccountId,
) -> Result<PairingRequest, EngineError> {
    let accounts = ctx.store.accounts();
    accounts.get(from)?;
    accounts.get(to)?;
    Ok(ctx.store.pairing().create(from, to, ctx.now())?)
}

/// Accept or decline a request addressed to `responder`.
#[instrument(skip(ctx), fields(account_id = %responder, request_id = %id))]
pub fn respond_to_pairing(
    ctx: &EngineContext,
    responder: &AccountId,
    id: &PairingRequestId,
    accept: bool,
) -> Result<PairingRequest, EngineError> {
    let repo = ctx.store.pairing();
    let request = repo.get(id)?;
    if &request.to_account != responder {
        return Err(StoreError::NotFound(format!("pairing request {id}")).into());
    }
    let status = if accept {
        PairingStatus::Accepted
    } else {
        PairingStatus::Declined
    };
    Ok(repo.respond(id, status, ctx.now())?)
}

/// What a pairing-request change led to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PairingEffect {
    Ignored,
    RecipientNotified,
    Bootstrapped(BootstrapOutcome),
}

/// Change-feed handler for `pairing_requests`.
#[instrument(skip_all, fields(request_id = %after.id))]
pub async fn handle_pairing_change(
    ctx: &EngineContext,
    before: Option<&PairingRequest>,
    after: &PairingRequest,
) -> Result<PairingEffect, EngineError> {
    let was_accepted = before.is_some_and(|b| b.status == PairingStatus::Accepted);

    match after.status {
        PairingStatus::Pending if before.is_none() => {
            let requester = display_name(ctx, &after.from_account)?;
            ctx.notifier
                .send_logged(PushMessage::new_pairing_request(
                    after.to_account.clone(),
                    &requester,
                    after.id.as_str(),
                ))
                .await;
            Ok(PairingEffect::RecipientNotified)
        }
        PairingStatus::Accepted if !was_accepted => {
            let outcome = bootstrap_partnership(ctx, &after.from_account, &after.to_account).await?;
            let partner = display_name(ctx, &after.to_account)?;
            ctx.notifier
                .send_logged(PushMessage::pairing_accepted(
                    after.from_account.clone(),
                    &partner,
                    outcome.partnership_id(),
                ))
                .await;
            Ok(PairingEffect::Bootstrapped(outcome))
        }
        status => {
            debug!(%status, "pairing change needs no action");
            Ok(PairingEffect::Ignored)
        }
    }
}

fn display_name(ctx: &EngineContext, account: &AccountId) -> Result<String, EngineError> {
    Ok(match ctx.store.accounts().find(account)? {
        Some(profile) => profile.display_name,
        None => {
            warn!(account_id = %account, "profile missing, using placeholder name");
            "Someone".to_string()
        }
    })
}
