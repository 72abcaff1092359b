//! Trust pipeline applied to every untrusted upload.
//!
//! Gates run in a fixed order and each one aborts the rest:
//! 1. declared extension is supported
//! 2. declared content type matches the extension
//! 3. sniffed leading bytes match the extension
//! 4. the upload is persisted under a job-namespaced path
//! 5. the persisted file passes the antivirus scan
//!
//! Nothing reaches the conversion stage unless all five pass.

pub mod scanner;
pub mod validate;

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::jobs::JobId;
pub use scanner::{ClamdAddress, ClamdScanner, DisabledScanner, MalwareScanner, ScanVerdict};

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("unsupported extension: .{0}")]
    UnsupportedExtension(String),

    #[error("content type mismatch for .{extension}: expected {expected}, got {declared}")]
    DeclaredTypeMismatch {
        extension: String,
        expected: &'static str,
        declared: String,
    },

    #[error("file content does not match .{extension}: expected {expected}, detected {detected}")]
    SniffedTypeMismatch {
        extension: String,
        expected: &'static str,
        detected: &'static str,
    },

    #[error("malware detected")]
    MalwareDetected { signature: String },

    #[error("scan unavailable")]
    ScanUnavailable { reason: String },

    #[error("failed to store upload: {0}")]
    Storage(#[from] io::Error),
}

impl PipelineError {
    /// True for rejections caused by the upload itself
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            PipelineError::UnsupportedExtension(_)
                | PipelineError::DeclaredTypeMismatch { .. }
                | PipelineError::SniffedTypeMismatch { .. }
        )
    }
}

/// An untrusted upload as received from the client
pub struct Upload<R> {
    pub reader: R,
    pub file_name: String,
    pub content_type: Option<String>,
}

/// Validates, persists and scans uploads
#[derive(Clone)]
pub struct TrustPipeline {
    upload_dir: PathBuf,
    scanner: Arc<dyn MalwareScanner>,
}

impl TrustPipeline {
    pub fn new(upload_dir: impl Into<PathBuf>, scanner: Arc<dyn MalwareScanner>) -> Self {
        Self {
            upload_dir: upload_dir.into(),
            scanner,
        }
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    /// Run every gate and return the path of the persisted, scanned input
    pub async fn validate_and_persist<R>(
        &self,
        upload: Upload<R>,
        job_id: JobId,
    ) -> Result<PathBuf, PipelineError>
    where
        R: Read + Seek + Send + 'static,
    {
        let upload_dir = self.upload_dir.clone();
        let input_path = tokio::task::spawn_blocking(move || stage(upload, &upload_dir, job_id))
            .await
            .map_err(io::Error::other)??;

        self.scan(&input_path, job_id).await?;
        Ok(input_path)
    }

    async fn scan(&self, input_path: &Path, job_id: JobId) -> Result<(), PipelineError> {
        match self.scanner.scan(input_path).await {
            ScanVerdict::Clean => Ok(()),
            ScanVerdict::Infected(signature) => {
                warn!(job_id = %job_id, signature = %signature, "Rejecting infected upload");
                discard(input_path).await;
                Err(PipelineError::MalwareDetected { signature })
            }
            ScanVerdict::Unavailable(reason) => {
                // Unscanned files are treated like infected ones and never kept
                warn!(job_id = %job_id, reason = %reason, "Rejecting upload that could not be scanned");
                discard(input_path).await;
                Err(PipelineError::ScanUnavailable { reason })
            }
        }
    }
}

/// Steps 1-4, run on the blocking pool
fn stage<R: Read + Seek>(
    mut upload: Upload<R>,
    upload_dir: &Path,
    job_id: JobId,
) -> Result<PathBuf, PipelineError> {
    // The upload begins wherever the reader stands now
    let start = upload.reader.stream_position()?;
    let (extension, expected) = validate::check_extension(&upload.file_name)?;
    validate::check_declared_type(&extension, expected, upload.content_type.as_deref())?;
    validate::check_sniffed_type(&extension, expected, &mut upload.reader)?;
    debug!(job_id = %job_id, format = ?expected, "Upload passed type checks");

    let input_path = upload_dir.join(format!("{}.{}", job_id, extension));
    persist(&mut upload.reader, start, &input_path)?;
    info!(job_id = %job_id, path = %input_path.display(), "Upload persisted");
    Ok(input_path)
}

/// Copy the upload from `start` to the end of the reader into a new file
fn persist<R: Read + Seek>(reader: &mut R, start: u64, path: &Path) -> io::Result<u64> {
    reader.seek(SeekFrom::Start(start))?;
    // create_new: an input path is never reused
    let mut file: File = OpenOptions::new().write(true).create_new(true).open(path)?;

    match io::copy(reader, &mut file).and_then(|written| file.sync_all().map(|_| written)) {
        Ok(written) => Ok(written),
        Err(e) => {
            drop(file);
            let _ = fs::remove_file(path);
            Err(e)
        }
    }
}

async fn discard(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Failed to delete rejected upload");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::MediaFormat;
    use crate::test_support::{media_samples, FakeScanner, JPEG_BYTES, PNG_BYTES};
    use std::io::Cursor;

    fn upload(bytes: &[u8], name: &str, content_type: &str) -> Upload<Cursor<Vec<u8>>> {
        Upload {
            reader: Cursor::new(bytes.to_vec()),
            file_name: name.to_string(),
            content_type: Some(content_type.to_string()),
        }
    }

    fn pipeline(dir: &Path, verdict: ScanVerdict) -> TrustPipeline {
        TrustPipeline::new(dir, Arc::new(FakeScanner::new(verdict)))
    }

    fn stored_files(dir: &Path) -> usize {
        fs::read_dir(dir).unwrap().count()
    }

    #[tokio::test]
    async fn valid_upload_is_persisted_in_full() {
        let dir = tempfile::tempdir().unwrap();
        let job_id = JobId::new();

        let path = pipeline(dir.path(), ScanVerdict::Clean)
            .validate_and_persist(upload(PNG_BYTES, "Cat.PNG", "image/png"), job_id)
            .await
            .unwrap();

        assert_eq!(path, dir.path().join(format!("{}.png", job_id)));
        assert_eq!(fs::read(&path).unwrap(), PNG_BYTES);
    }

    #[tokio::test]
    async fn each_signal_can_veto_and_nothing_is_stored() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path(), ScanVerdict::Clean);

        let cases = [
            upload(PNG_BYTES, "cat.bmp", "image/png"),
            upload(PNG_BYTES, "cat.png", "image/jpeg"),
            upload(JPEG_BYTES, "cat.png", "image/png"),
        ];
        for case in cases {
            let err = pipeline.validate_and_persist(case, JobId::new()).await.unwrap_err();
            assert!(err.is_validation(), "unexpected error: {:?}", err);
        }
        assert_eq!(stored_files(dir.path()), 0);
    }

    #[tokio::test]
    async fn jpeg_disguised_as_png_names_both_types() {
        let dir = tempfile::tempdir().unwrap();
        let err = pipeline(dir.path(), ScanVerdict::Clean)
            .validate_and_persist(upload(JPEG_BYTES, "cat.png", "image/png"), JobId::new())
            .await
            .unwrap_err();

        let message = err.to_string();
        assert!(message.contains("expected image/png"));
        assert!(message.contains("detected image/jpeg"));
    }

    #[tokio::test]
    async fn infected_upload_is_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let scanner = Arc::new(FakeScanner::new(ScanVerdict::Infected("Eicar".to_string())));
        let pipeline = TrustPipeline::new(dir.path(), scanner.clone());

        let err = pipeline
            .validate_and_persist(upload(PNG_BYTES, "cat.png", "image/png"), JobId::new())
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::MalwareDetected { .. }));
        assert_eq!(err.to_string(), "malware detected");
        assert_eq!(scanner.calls(), 1);
        assert_eq!(stored_files(dir.path()), 0);
    }

    #[tokio::test]
    async fn unscannable_upload_is_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let err = pipeline(dir.path(), ScanVerdict::Unavailable("down".to_string()))
            .validate_and_persist(upload(PNG_BYTES, "cat.png", "image/png"), JobId::new())
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::ScanUnavailable { .. }));
        assert!(!err.is_validation());
        assert_eq!(stored_files(dir.path()), 0);
    }

    #[tokio::test]
    async fn scanner_is_not_consulted_for_invalid_uploads() {
        let dir = tempfile::tempdir().unwrap();
        let scanner = Arc::new(FakeScanner::new(ScanVerdict::Clean));
        let pipeline = TrustPipeline::new(dir.path(), scanner.clone());

        let _ = pipeline
            .validate_and_persist(upload(JPEG_BYTES, "cat.png", "image/png"), JobId::new())
            .await;
        assert_eq!(scanner.calls(), 0);
    }

    #[test]
    fn persist_never_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("existing.png");
        fs::write(&path, b"first").unwrap();

        let err = persist(&mut Cursor::new(b"second".to_vec()), 0, &path).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
        assert_eq!(fs::read(&path).unwrap(), b"first");
    }

    #[tokio::test]
    async fn every_supported_format_passes_with_a_real_header() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path(), ScanVerdict::Clean);
        let samples = media_samples();

        for format in MediaFormat::ALL {
            let covered = samples.iter().any(|(name, _)| {
                validate::check_extension(name).map(|(_, f)| f).ok() == Some(format)
            });
            assert!(covered, "no sample for {:?}", format);
        }

        for (name, bytes) in samples {
            let (_, format) = validate::check_extension(name).unwrap();
            let path = pipeline
                .validate_and_persist(upload(&bytes, name, format.mime_type()), JobId::new())
                .await
                .unwrap_or_else(|e| panic!("{} rejected: {}", name, e));
            assert_eq!(fs::read(&path).unwrap(), bytes, "{} stored incompletely", name);
        }
    }

    #[tokio::test]
    async fn upload_starting_mid_stream_is_stored_from_its_start() {
        let dir = tempfile::tempdir().unwrap();
        let mut framed = b"--boundary\r\n".to_vec();
        let offset = framed.len() as u64;
        framed.extend_from_slice(PNG_BYTES);

        let mut reader = Cursor::new(framed);
        reader.set_position(offset);
        let upload = Upload {
            reader,
            file_name: "cat.png".to_string(),
            content_type: Some("image/png".to_string()),
        };

        let path = pipeline(dir.path(), ScanVerdict::Clean)
            .validate_and_persist(upload, JobId::new())
            .await
            .unwrap();
        assert_eq!(fs::read(&path).unwrap(), PNG_BYTES);
    }
}
