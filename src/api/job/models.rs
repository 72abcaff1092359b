use actix_multipart::form::{tempfile::TempFile, text::Text, MultipartForm};
use std::borrow::Cow;
use validator::{Validate, ValidationError};

use crate::media::MediaFormat;

/// Multipart body of a conversion submission
#[derive(MultipartForm)]
pub struct ConvertForm {
    pub file: TempFile,
    pub output_format: Text<String>,
}

/// Conversion parameters, validated before the upload is touched
#[derive(Debug, Validate)]
pub struct ConversionRequest {
    #[validate(custom(function = "validate_output_format"))]
    pub output_format: String,
}

impl ConversionRequest {
    /// Normalizes the requested extension (trimmed, lowercase, no leading dot)
    pub fn new(output_format: &str) -> Self {
        ConversionRequest {
            output_format: output_format
                .trim()
                .trim_start_matches('.')
                .to_ascii_lowercase(),
        }
    }

    pub fn target_format(&self) -> Option<MediaFormat> {
        MediaFormat::from_extension(&self.output_format)
    }
}

fn validate_output_format(output_format: &str) -> Result<(), ValidationError> {
    if MediaFormat::from_extension(output_format).is_some() {
        return Ok(());
    }

    let message = if output_format.is_empty() {
        "Output format is required".to_string()
    } else {
        format!("Unsupported output format: {}", output_format)
    };
    Err(ValidationError::new("unsupported_output_format").with_message(Cow::Owned(message)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_is_normalized() {
        let request = ConversionRequest::new("  .WEBP ");
        assert_eq!(request.output_format, "webp");
        assert_eq!(request.target_format(), Some(MediaFormat::Webp));
        assert!(request.validate().is_ok());
    }

    #[test]
    fn executables_are_not_an_output_format() {
        let errors = ConversionRequest::new("exe").validate().unwrap_err();
        let field_errors = errors.field_errors();
        let messages: Vec<String> = field_errors["output_format"]
            .iter()
            .filter_map(|e| e.message.as_ref().map(|m| m.to_string()))
            .collect();
        assert_eq!(messages, vec!["Unsupported output format: exe".to_string()]);
    }

    #[test]
    fn empty_format_is_rejected() {
        assert!(ConversionRequest::new("").validate().is_err());
    }
}
