use actix_multipart::form::MultipartFormConfig;
use actix_web::{web, HttpResponse, ResponseError};
use serde::Serialize;

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub fields: serde_json::Value,
}

impl ErrorResponse {
    pub fn new(error: &str, message: impl Into<String>) -> Self {
        ErrorResponse {
            error: error.to_string(),
            fields: serde_json::json!({ "message": message.into() }),
        }
    }
}

/// Path extractor config: a job id that is not a UUID names no job
pub fn path_config() -> web::PathConfig {
    web::PathConfig::default().error_handler(|err, _req| {
        let error_response = ErrorResponse::new("Not found", "Malformed job id");
        actix_web::error::InternalError::from_response(
            err,
            HttpResponse::NotFound().json(error_response),
        )
        .into()
    })
}

/// Multipart config with the project's error body and the global size limit
pub fn multipart_config(max_payload_size: usize) -> MultipartFormConfig {
    MultipartFormConfig::default()
        .total_limit(max_payload_size)
        .error_handler(|err, _req| {
            let status = err.status_code();
            let error_response = ErrorResponse::new("Invalid upload", err.to_string());
            actix_web::error::InternalError::from_response(
                err,
                HttpResponse::build(status).json(error_response),
            )
            .into()
        })
}
