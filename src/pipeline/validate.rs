use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

use super::PipelineError;
use crate::media::{sniff_mime, MediaFormat, SAMPLE_LEN};

/// Step 1: map the declared filename's extension to a supported format
///
/// Returns the lowercased extension alongside the format so the persisted
/// file keeps the name the client used (`jpg` stays `jpg`).
pub fn check_extension(file_name: &str) -> Result<(String, MediaFormat), PipelineError> {
    let extension = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    match MediaFormat::from_extension(&extension) {
        Some(format) => Ok((extension, format)),
        None => Err(PipelineError::UnsupportedExtension(extension)),
    }
}

/// Step 2: the client-declared content type must be the canonical one
pub fn check_declared_type(
    extension: &str,
    expected: MediaFormat,
    declared: Option<&str>,
) -> Result<(), PipelineError> {
    let declared = declared.map(|d| d.trim().to_ascii_lowercase()).unwrap_or_default();
    if declared == expected.mime_type() {
        return Ok(());
    }

    Err(PipelineError::DeclaredTypeMismatch {
        extension: extension.to_string(),
        expected: expected.mime_type(),
        declared: if declared.is_empty() {
            "none".to_string()
        } else {
            declared
        },
    })
}

/// Step 3: classify the leading bytes and compare with the expected format
///
/// The reader is rewound to where it started, so the whole upload can still
/// be persisted afterwards.
pub fn check_sniffed_type<R: Read + Seek>(
    extension: &str,
    expected: MediaFormat,
    reader: &mut R,
) -> Result<(), PipelineError> {
    let start = reader.stream_position()?;
    let sample = read_sample(reader)?;
    reader.seek(SeekFrom::Start(start))?;

    let detected = sniff_mime(&sample);
    if detected == expected.mime_type() {
        return Ok(());
    }

    Err(PipelineError::SniffedTypeMismatch {
        extension: extension.to_string(),
        expected: expected.mime_type(),
        detected,
    })
}

fn read_sample<R: Read>(reader: &mut R) -> io::Result<Vec<u8>> {
    let mut sample = Vec::with_capacity(SAMPLE_LEN);
    reader.take(SAMPLE_LEN as u64).read_to_end(&mut sample)?;
    Ok(sample)
}
