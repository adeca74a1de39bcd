use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    async_trait,
    extract::{ConnectInfo, FromRequestParts},
    http::{request::Parts, HeaderMap},
};

use crate::atlas::Atlas;
use crate::error::{AtlasError, Result};
use crate::gate::Caller;
use crate::model::Address;

/// The requesting address, resolved through any configured proxy
/// headers, and whether it belongs to an admin.
#[derive(Clone, Copy, Debug)]
pub struct RemoteCaller(pub Caller);

#[async_trait]
impl FromRequestParts<Arc<Atlas>> for RemoteCaller {
    type Rejection = AtlasError;

    async fn from_request_parts(
        parts: &mut Parts,
        atlas: &Arc<Atlas>,
    ) -> std::result::Result<Self, Self::Rejection> {
        let settings = atlas.settings();
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        let address = remote_address(&parts.headers, peer, &settings.web.deproxy_header_fields)?;
        Ok(RemoteCaller(Caller {
            address,
            is_admin: settings.is_admin(&address),
        }))
    }
}

/// The first configured header present wins over the socket peer.
pub fn remote_address(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    deproxy_fields: &[String],
) -> Result<Address> {
    for field in deproxy_fields {
        if let Some(value) = headers.get(field.as_str()) {
            let value = value
                .to_str()
                .map_err(|_| validation_error!("addressInvalid"))?;
            // X-Forwarded-For style lists put the client first
            let first = value.split(',').next().unwrap_or_default().trim();
            return Address::parse(first);
        }
    }
    peer.map(|addr| Address::from_ip(addr.ip()))
        .ok_or_else(|| validation_error!("remote address unknown"))
}
