use crate::router::SessionRouter;
use actix_web::{web, HttpResponse, Responder};
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use std::sync::Arc;

/// Ambient scaffolding only (spec §6: "status/health surface out of core
/// scope"); carries no business rules.
#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
    paused: bool,
}

pub async fn health_check(router: web::Data<Arc<SessionRouter>>) -> impl Responder {
    HttpResponse::Ok().json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        paused: router.is_paused(),
    })
}

#[derive(Serialize)]
struct ReferenceCounts {
    logged_on_initiator: Option<String>,
}

pub async fn reference_status(router: web::Data<Arc<SessionRouter>>) -> impl Responder {
    HttpResponse::Ok().json(ReferenceCounts {
        logged_on_initiator: router.find_logged_on_initiator(),
    })
}

pub async fn metrics() -> impl Responder {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %err, "failed to encode prometheus metrics");
        return HttpResponse::InternalServerError().finish();
    }
    HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer)
}

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/health").route(web::get().to(health_check)))
        .service(web::resource("/status/sessions").route(web::get().to(reference_status)))
        .service(web::resource("/metrics").route(web::get().to(metrics)));
}
