use std::sync::Arc;

use axum::extract::{
    rejection::{FormRejection, QueryRejection},
    Form, Query, State,
};
use chrono::DateTime;
use serde_json::{json, Value};
use tracing::{info, instrument};

use super::caller::RemoteCaller;
use super::forms::{
    parse_address, parse_token, AddressQuery, AllQuery, DeleteForm, MessageForm, NodeForm,
    VerifyQuery,
};
use super::response::{ApiResult, Envelope};
use crate::atlas::Atlas;
use crate::error::{AtlasError, Result};
use crate::gate::require_token;
use crate::model::feature_collection;
use crate::notify::MESSAGE_TEMPLATE;
use crate::queue::VerifyOutcome;

fn form<T>(extracted: std::result::Result<Form<T>, FormRejection>) -> Result<T> {
    extracted
        .map(|Form(inner)| inner)
        .map_err(|e| validation_error!("formInvalid: {}", e.body_text()))
}

fn query<T>(extracted: std::result::Result<Query<T>, QueryRejection>) -> Result<T> {
    extracted
        .map(|Query(inner)| inner)
        .map_err(|e| validation_error!("queryInvalid: {}", e.body_text()))
}

fn writable(atlas: &Atlas) -> Result<()> {
    if atlas.read_only() {
        return Err(AtlasError::ReadOnly);
    }
    Ok(())
}

/// A single node without its owner's email. `?geojson` returns it as a
/// GeoJSON Feature.
pub async fn get_node(
    State(atlas): State<Arc<Atlas>>,
    params: std::result::Result<Query<AddressQuery>, QueryRejection>,
) -> ApiResult<Value> {
    let params = query(params)?;
    let addr = parse_address(&params.address)?;
    let node = atlas
        .store
        .get_node(&addr)
        .await?
        .ok_or_else(|| AtlasError::NotFound("No matching node".to_string()))?
        .public();

    if params.geojson.is_some() {
        Ok(Envelope(node.feature()))
    } else {
        Ok(Envelope(serde_json::to_value(&node)?))
    }
}

#[instrument(skip_all, level = "debug")]
pub async fn post_node(
    State(atlas): State<Arc<Atlas>>,
    RemoteCaller(caller): RemoteCaller,
    submitted: std::result::Result<Form<NodeForm>, FormRejection>,
) -> ApiResult<&'static str> {
    writable(&atlas)?;
    let submitted = form(submitted)?;
    require_token(&atlas.tokens, &caller, parse_token(&submitted.token))?;
    let node = submitted.to_node(true)?;

    let settings = atlas.settings();
    let registration = atlas.queue.register(node, &caller, &settings).await?;
    Ok(Envelope(registration.message()))
}

/// Replace a local node's details. No verification email is sent; the
/// owner email on record is kept.
#[instrument(skip_all, level = "debug")]
pub async fn update_node(
    State(atlas): State<Arc<Atlas>>,
    RemoteCaller(caller): RemoteCaller,
    submitted: std::result::Result<Form<NodeForm>, FormRejection>,
) -> ApiResult<&'static str> {
    writable(&atlas)?;
    let submitted = form(submitted)?;
    require_token(&atlas.tokens, &caller, parse_token(&submitted.token))?;

    let addr = parse_address(&submitted.address)?;
    match atlas.store.get_node(&addr).await? {
        Some(existing) if !existing.is_cached() => {}
        _ => return Err(validation_error!("no matching local node")),
    }
    if !caller.may_modify(&addr) {
        return Err(policy_error!(
            "verify: remote address does not match Node address"
        ));
    }

    let node = submitted.to_node(false)?;
    if !atlas.store.update_node(&node).await? {
        return Err(validation_error!("no matching local node"));
    }
    info!("Node {} updated", node.addr);
    Ok(Envelope("successful"))
}

#[instrument(skip_all, level = "debug")]
pub async fn delete_node(
    State(atlas): State<Arc<Atlas>>,
    RemoteCaller(caller): RemoteCaller,
    submitted: std::result::Result<Form<DeleteForm>, FormRejection>,
) -> ApiResult<&'static str> {
    writable(&atlas)?;
    let submitted = form(submitted)?;
    require_token(&atlas.tokens, &caller, parse_token(&submitted.token))?;

    let addr = parse_address(&submitted.address)?;
    if !caller.may_modify(&addr) {
        return Err(policy_error!(
            "verify: remote address does not match Node address"
        ));
    }
    if !atlas.store.delete_node(&addr).await? {
        return Err(AtlasError::NotFound("no matching node".to_string()));
    }
    info!("Node {} deleted", addr);
    Ok(Envelope("deleted"))
}

/// Follow a verification link: promote the queued node with `?id=`.
pub async fn verify(
    State(atlas): State<Arc<Atlas>>,
    RemoteCaller(caller): RemoteCaller,
    params: std::result::Result<Query<VerifyQuery>, QueryRejection>,
) -> ApiResult<&'static str> {
    writable(&atlas)?;
    let id: i64 = query(params)?
        .id
        .as_deref()
        .and_then(|id| id.trim().parse().ok())
        .ok_or_else(|| validation_error!("idInvalid"))?;

    let settings = atlas.settings();
    match atlas
        .queue
        .verify_queued_node(id, &caller.address, &settings.verify)
        .await?
    {
        VerifyOutcome::Verified(_) => Ok(Envelope("successful")),
        VerifyOutcome::InvalidId => Err(validation_error!("invalid id")),
        VerifyOutcome::Rejected(e) => Err(e),
    }
}

/// Every local and cached node, grouped by source map. `?since=` takes
/// an RFC3339 time and limits the dump to newer changes; `?geojson`
/// returns a FeatureCollection instead.
pub async fn all(
    State(atlas): State<Arc<Atlas>>,
    params: std::result::Result<Query<AllQuery>, QueryRejection>,
) -> ApiResult<Value> {
    let params = query(params)?;
    let nodes = match params.since.as_deref().filter(|s| !s.is_empty()) {
        Some(since) => {
            let since = DateTime::parse_from_rfc3339(since)
                .map_err(|_| validation_error!("invalidTime"))?;
            atlas.store.dump_changes(since.timestamp()).await?
        }
        None => atlas.store.dump_nodes().await?,
    };

    if params.geojson.is_some() {
        return Ok(Envelope(feature_collection(&nodes)));
    }
    let grouped = atlas.federation.cache_format_nodes(nodes).await?;
    Ok(Envelope(serde_json::to_value(grouped)?))
}

/// Email a node's owner on behalf of the caller. Needs a token and a
/// solved CAPTCHA.
#[instrument(skip_all, level = "debug")]
pub async fn message(
    State(atlas): State<Arc<Atlas>>,
    RemoteCaller(caller): RemoteCaller,
    submitted: std::result::Result<Form<MessageForm>, FormRejection>,
) -> ApiResult<()> {
    let submitted = form(submitted)?;
    require_token(&atlas.tokens, &caller, parse_token(&submitted.token))?;
    atlas
        .captcha
        .verify(&caller, submitted.captcha.as_deref().unwrap_or_default())
        .await?;

    let addr = parse_address(&submitted.address)?;
    let reply_to = submitted.reply_to()?;
    let message = submitted.message()?;

    let node = atlas
        .store
        .get_node(&addr)
        .await?
        .ok_or_else(|| validation_error!("address unknown"))?;
    if node.owner_email.is_empty() {
        return Err(validation_error!("address belongs to cached node"));
    }

    let settings = atlas.settings();
    let smtp = settings
        .smtp
        .as_ref()
        .ok_or_else(|| AtlasError::Notify("SMTP disabled in the configuration".to_string()))?;
    let data = json!({
        "Subject": format!("Message via {}", settings.name),
        "From": smtp.email_address,
        "ReplyTo": reply_to,
        "Message": message,
        "Name": settings.name,
        "Link": format!("{}/node/{}", settings.public_link(), addr),
        "AdminContact": settings.admin_contact,
    });
    atlas
        .notifier
        .send(MESSAGE_TEMPLATE, &node.owner_email, data)
        .await?;

    // Kept in the log in case of abuse
    info!(
        "{} sent a message to {:?} from {:?}",
        caller.address, node.owner_email, reply_to
    );
    Ok(Envelope(()))
}
