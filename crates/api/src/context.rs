use axum::http::HeaderMap;

use shopledger_auth::{JwtClaims, RequestContext};

/// Header set by the reverse proxy in front of the API.
pub const FORWARDED_FOR: &str = "x-forwarded-for";

/// Build the per-request context from verified claims and request headers.
pub fn request_context(claims: JwtClaims, headers: &HeaderMap) -> RequestContext {
    let ctx = RequestContext::new(claims.into_actor());
    match client_ip(headers) {
        Some(ip) => ctx.with_ip(ip),
        None => ctx,
    }
}

/// First hop of `x-forwarded-for`, the originating client.
fn client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get(FORWARDED_FOR)?
        .to_str()
        .ok()?
        .split(',')
        .map(str::trim)
        .find(|hop| !hop.is_empty())
        .map(str::to_string)
}
