use actix_web::{get, web, HttpResponse, Responder};
use serde::Serialize;
use tracing::error;

use super::job::JobService;

/// Health check response
#[derive(Serialize)]
struct HealthResponse {
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    storage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Health check endpoint
///
/// Static liveness probe. Does not check dependencies and needs no API key.
#[get("/health")]
async fn health_check() -> impl Responder {
    HttpResponse::Ok().json(HealthResponse {
        status: "ok".to_string(),
        storage: None,
        error: None,
    })
}

/// Readiness check endpoint
///
/// Checks that the upload and output directories are usable.
/// Returns 503 while they are not, the process recovers once they are back.
#[get("/ready")]
async fn readiness_check(service: web::Data<JobService>) -> impl Responder {
    match service.storage_ready().await {
        Ok(()) => HttpResponse::Ok().json(HealthResponse {
            status: "ready".to_string(),
            storage: Some("available".to_string()),
            error: None,
        }),
        Err(e) => {
            error!("Readiness check failed: storage unavailable: {}", e);
            HttpResponse::ServiceUnavailable().json(HealthResponse {
                status: "not_ready".to_string(),
                storage: Some("unavailable".to_string()),
                error: Some(e),
            })
        }
    }
}

pub fn health_config(config: &mut web::ServiceConfig) {
    config.service(health_check).service(readiness_check);
}
