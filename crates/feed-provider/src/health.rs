//! Liveness and health endpoints
//!
//! `/ping` is an unauthenticated liveness probe. `/health` reports this
//! instance's shard view (trigger count, active host, canary status) and is
//! guarded by the configured basic-auth credential when one is set.

use std::sync::Arc;

use actix_web::http::header::AUTHORIZATION;
use actix_web::{web, HttpRequest, HttpResponse, Responder};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::json;

use crate::manager::TriggerManager;

pub struct AppState {
    pub manager: Arc<TriggerManager>,
    pub endpoint_auth: Option<String>,
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/ping", web::get().to(ping))
        .route("/health", web::get().to(health));
}

async fn ping() -> impl Responder {
    HttpResponse::Ok().body("pong")
}

async fn health(req: HttpRequest, state: web::Data<AppState>) -> impl Responder {
    if let Err(rejection) = authorize(&req, state.endpoint_auth.as_deref()) {
        return rejection;
    }

    let manager = &state.manager;
    HttpResponse::Ok().json(json!({
        "worker": manager.worker(),
        "host": manager.host(),
        "activeHost": manager.active_host(),
        "triggerCount": manager.registry().len(),
        "monitor": manager.monitor_status(),
    }))
}

/// Compare the request's basic-auth credential against the configured
/// `user:key` string. No configured credential means the endpoint is open.
/// A header that is not well-formed basic auth is a 400; a well-formed
/// credential that does not match is a 401.
fn authorize(req: &HttpRequest, expected: Option<&str>) -> Result<(), HttpResponse> {
    let Some(expected) = expected else {
        return Ok(());
    };
    let Some(header) = req.headers().get(AUTHORIZATION) else {
        return Err(HttpResponse::Unauthorized().json(json!({
            "error": "Authorization required"
        })));
    };

    let decoded = header
        .to_str()
        .ok()
        .and_then(|value| value.strip_prefix("Basic "))
        .and_then(|encoded| STANDARD.decode(encoded).ok());

    match decoded {
        Some(credential) if credential == expected.as_bytes() => Ok(()),
        Some(_) => Err(HttpResponse::Unauthorized().json(json!({
            "error": "Invalid credentials"
        }))),
        None => Err(HttpResponse::BadRequest().json(json!({
            "error": "Malformed authorization header"
        }))),
    }
}
