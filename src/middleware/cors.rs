//! CORS for the request/response surface. Replaces the teacher's hand-rolled
//! origin-reflection middleware with `tower_http`'s `CorsLayer`, configured
//! once from the gateway's CORS allow-list and applied as an ordinary
//! `tower` layer rather than a bespoke `axum::middleware::from_fn`.

use axum::http::HeaderValue;
use tower_http::cors::{AllowOrigin, CorsLayer};

/// Builds the CORS layer from a configured allow-list. `["*"]` reflects any
/// origin (still without `Access-Control-Allow-Credentials: *`, which
/// browsers reject); anything else is matched exactly.
pub fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods(tower_http::cors::Any)
        .allow_headers(tower_http::cors::Any)
        .allow_credentials(true);

    if allowed_origins.iter().any(|o| o == "*") {
        return layer.allow_origin(AllowOrigin::mirror_request());
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();
    layer.allow_origin(AllowOrigin::list(origins))
}
