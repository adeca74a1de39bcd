use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::header;
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use super::caller::RemoteCaller;
use super::response::{ApiResult, Envelope};
use crate::atlas::Atlas;
use crate::error::AtlasError;
use crate::gate::ChallengeMedia;
use crate::network::Pair;
use crate::settings::{APP_NAME, APP_VERSION};
use crate::store::{MapSource, NodeTables};

// basic handler that responds with a static string
pub async fn root() -> &'static str {
    "Welcome to meshmap"
}

pub async fn health() -> &'static str {
    "OK"
}

#[derive(Serialize, Deserialize)]
pub struct AboutResponse {
    name: String,
    version: String,
}

impl Default for AboutResponse {
    fn default() -> Self {
        Self {
            name: APP_NAME.to_string(),
            version: APP_VERSION.to_string(),
        }
    }
}

#[instrument]
pub async fn about() -> axum::Json<AboutResponse> {
    axum::Json(AboutResponse::default())
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct StatusResponse {
    pub name: String,
    pub local_nodes: usize,
    pub cached_nodes: usize,
    pub cached_maps: usize,
}

pub async fn status(State(atlas): State<Arc<Atlas>>) -> ApiResult<StatusResponse> {
    let settings = atlas.settings();
    Ok(Envelope(StatusResponse {
        name: settings.name.clone(),
        local_nodes: atlas.store.count_nodes(NodeTables::Local).await?,
        cached_nodes: atlas.store.count_nodes(NodeTables::Cached).await?,
        cached_maps: settings.child_maps.len(),
    }))
}

/// The caller's own address, if it lies within the registration netmask.
pub async fn echo(
    State(atlas): State<Arc<Atlas>>,
    RemoteCaller(caller): RemoteCaller,
) -> ApiResult<String> {
    match &atlas.settings().verify.netmask {
        None => Err(validation_error!("netmask not set")),
        Some(netmask) if netmask.contains(&caller.address) => {
            Ok(Envelope(caller.address.to_string()))
        }
        Some(_) => Err(validation_error!("remote address not in subnet")),
    }
}

/// Issue a single-use token bound to the caller's address.
pub async fn token(
    State(atlas): State<Arc<Atlas>>,
    RemoteCaller(caller): RemoteCaller,
) -> ApiResult<u32> {
    Ok(Envelope(atlas.tokens.issue(caller.address)))
}

/// Issue a CAPTCHA challenge and return its ID. The challenge itself is
/// fetched from `/captcha/<id>.png` or `/captcha/<id>.wav`.
pub async fn key(State(atlas): State<Arc<Atlas>>) -> ApiResult<String> {
    let challenge = atlas.captcha.issue().await?;
    Ok(Envelope(challenge.id))
}

pub async fn challenge(
    State(atlas): State<Arc<Atlas>>,
    Path(file): Path<String>,
) -> Result<impl IntoResponse, AtlasError> {
    let (id, media) = ChallengeMedia::from_file_name(&file)
        .ok_or_else(|| AtlasError::NotFound("no such CAPTCHA".to_string()))?;
    let body = atlas.captcha.render(id, media).await?;
    Ok((
        [
            (header::CONTENT_TYPE, media.content_type()),
            (header::CACHE_CONTROL, "no-store"),
        ],
        body,
    ))
}

pub async fn child_maps(State(atlas): State<Arc<Atlas>>) -> ApiResult<Vec<MapSource>> {
    Ok(Envelope(atlas.store.dump_child_maps().await?))
}

pub async fn peers(State(atlas): State<Arc<Atlas>>) -> ApiResult<Vec<Pair>> {
    if !atlas.has_network() {
        return Err(validation_error!("network admin interface not configured"));
    }
    Ok(Envelope(atlas.known_peers()))
}
