//! Fixtures and in-process fakes shared by unit tests.

use async_trait::async_trait;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::jobs::{JobId, JobRegistry, JobStatus};
use crate::pipeline::{MalwareScanner, ScanVerdict};
use crate::worker::{ToolOutput, Transcoder};

/// 1x1 PNG
pub const PNG_BYTES: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44,
    0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x02, 0x00, 0x00, 0x00, 0x90,
    0x77, 0x53, 0xDE, 0x00, 0x00, 0x00, 0x0C, 0x49, 0x44, 0x41, 0x54, 0x08, 0xD7, 0x63, 0xF8,
    0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x01, 0x00, 0x18, 0xDD, 0x8D, 0x89, 0x00, 0x00, 0x00,
    0x00, 0x49, 0x45, 0x4E, 0x44, 0xAE, 0x42, 0x60, 0x82,
];

/// JFIF header, enough for signature detection
pub const JPEG_BYTES: &[u8] = &[
    0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, 0x4A, 0x46, 0x49, 0x46, 0x00, 0x01, 0x01, 0x00, 0x00,
    0x01, 0x00, 0x01, 0x00, 0x00, 0xFF, 0xD9,
];

/// RIFF/WEBP header with an empty VP8L chunk
pub const WEBP_BYTES: &[u8] = &[
    0x52, 0x49, 0x46, 0x46, 0x1A, 0x00, 0x00, 0x00, 0x57, 0x45, 0x42, 0x50, 0x56, 0x50, 0x38,
    0x4C, 0x0D, 0x00, 0x00, 0x00, 0x2F, 0x00, 0x00, 0x00, 0x10, 0x07, 0x10, 0x11, 0x11, 0x88,
    0x88, 0xFE, 0x07, 0x00,
];

/// EBML header layouts written by common Matroska muxers
#[derive(Debug, Clone, Copy)]
pub enum MkvLayout {
    /// One-byte header size, version elements before the DocType
    Mkvmerge,
    /// Eight-byte header size
    Libavformat,
    /// DocType as the first child
    Compact,
}

/// EBML header with the given DocType, followed by the start of a Segment
pub fn mkv_header(layout: MkvLayout, doc_type: &[u8]) -> Vec<u8> {
    const VERSIONS: [u8; 16] = [
        0x42, 0x86, 0x81, 0x01, 0x42, 0xF7, 0x81, 0x01, 0x42, 0xF2, 0x81, 0x04, 0x42, 0xF3, 0x81,
        0x08,
    ];
    const DOC_TYPE_VERSIONS: [u8; 8] = [0x42, 0x87, 0x81, 0x04, 0x42, 0x85, 0x81, 0x02];

    let mut doc = vec![0x42, 0x82, 0x80 | doc_type.len() as u8];
    doc.extend_from_slice(doc_type);

    let mut body = Vec::new();
    if !matches!(layout, MkvLayout::Compact) {
        body.extend_from_slice(&VERSIONS);
    }
    body.extend_from_slice(&doc);
    body.extend_from_slice(&DOC_TYPE_VERSIONS);

    let mut header = vec![0x1A, 0x45, 0xDF, 0xA3];
    match layout {
        MkvLayout::Libavformat => {
            header.push(0x01);
            header.extend_from_slice(&(body.len() as u64).to_be_bytes()[1..]);
        }
        _ => header.push(0x80 | body.len() as u8),
    }
    header.extend_from_slice(&body);
    header.extend_from_slice(&[0x18, 0x53, 0x80, 0x67, 0x01, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]);
    header.resize(256, 0);
    header
}

/// A realistic leading chunk for every supported format, keyed by file name
///
/// Formats with several common on-disk variants appear more than once.
pub fn media_samples() -> Vec<(&'static str, Vec<u8>)> {
    fn padded(head: &[u8]) -> Vec<u8> {
        let mut bytes = head.to_vec();
        bytes.resize(bytes.len().max(256), 0);
        bytes
    }

    vec![
        ("still.png", PNG_BYTES.to_vec()),
        ("photo.jpg", JPEG_BYTES.to_vec()),
        ("photo.jpeg", JPEG_BYTES.to_vec()),
        ("anim.gif", padded(b"GIF89a\x01\x00\x01\x00\x80\x00\x00\xFF\xFF\xFF\x00\x00\x00!\xF9\x04")),
        (
            "logo.svg",
            b"<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"1\" height=\"1\"/>\n".to_vec(),
        ),
        ("still.webp", WEBP_BYTES.to_vec()),
        ("clip.mp4", padded(b"\x00\x00\x00\x20ftypisom\x00\x00\x02\x00isomiso2avc1mp41\x00\x00\x00\x08free")),
        ("clip-mkvmerge.mkv", mkv_header(MkvLayout::Mkvmerge, b"matroska")),
        ("clip-libav.mkv", mkv_header(MkvLayout::Libavformat, b"matroska")),
        ("clip-compact.mkv", mkv_header(MkvLayout::Compact, b"matroska")),
        (
            "clip.wmv",
            padded(&[
                0x30, 0x26, 0xB2, 0x75, 0x8E, 0x66, 0xCF, 0x11, 0xA6, 0xD9, 0x00, 0xAA, 0x00, 0x62,
                0xCE, 0x6C,
            ]),
        ),
        ("clip.avi", padded(b"RIFF\x00\x10\x00\x00AVI LIST\xC0\x00\x00\x00hdrlavih")),
        ("tagged.mp3", padded(b"ID3\x04\x00\x00\x00\x00\x00\x23TSSE")),
        ("mpeg1.mp3", padded(&[0xFF, 0xFB, 0x90, 0x64])),
        ("mpeg1-crc.mp3", padded(&[0xFF, 0xFA, 0x90, 0x64])),
        ("mpeg2.mp3", padded(&[0xFF, 0xF3, 0x90, 0x64])),
        ("mpeg2-crc.mp3", padded(&[0xFF, 0xF2, 0x90, 0x64])),
        ("mpeg25.mp3", padded(&[0xFF, 0xE3, 0x48, 0x64])),
        ("tone.wav", padded(b"RIFF\x24\x08\x00\x00WAVEfmt \x10\x00\x00\x00\x01\x00\x01\x00")),
        ("tone.flac", padded(b"fLaC\x00\x00\x00\x22\x10\x00\x10\x00")),
        ("tone.aiff", padded(b"FORM\x00\x00\x08\x2EAIFFCOMM\x00\x00\x00\x12")),
        ("tone.aac", padded(&[0xFF, 0xF1, 0x50, 0x80, 0x02, 0x1F, 0xFC])),
    ]
}

/// Scanner returning a fixed verdict
pub struct FakeScanner {
    verdict: ScanVerdict,
    calls: AtomicUsize,
}

impl FakeScanner {
    pub fn new(verdict: ScanVerdict) -> Self {
        Self {
            verdict,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MalwareScanner for FakeScanner {
    async fn scan(&self, path: &Path) -> ScanVerdict {
        assert!(path.exists(), "scanner called before the upload was persisted");
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.verdict.clone()
    }
}

#[derive(Debug, Clone)]
pub enum TranscodeBehavior {
    /// Write these bytes to the output path and exit 0
    WriteOutput(Vec<u8>),
    /// Exit with this code and stderr without touching the output
    Exit(i32, String),
    SpawnError,
    TimedOut,
    Panic,
}

pub struct FakeTranscoder {
    behavior: TranscodeBehavior,
    delay: Duration,
    running: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl FakeTranscoder {
    pub fn new(behavior: TranscodeBehavior) -> Self {
        Self {
            behavior,
            delay: Duration::ZERO,
            running: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Highest number of simultaneous runs observed
    pub fn peak_concurrency(&self) -> Arc<AtomicUsize> {
        self.peak.clone()
    }
}

#[async_trait]
impl Transcoder for FakeTranscoder {
    async fn transcode(&self, _input: &Path, output: &Path) -> io::Result<ToolOutput> {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.running.fetch_sub(1, Ordering::SeqCst);

        match &self.behavior {
            TranscodeBehavior::WriteOutput(bytes) => {
                tokio::fs::write(output, bytes).await?;
                Ok(ToolOutput {
                    code: Some(0),
                    stderr: String::new(),
                })
            }
            TranscodeBehavior::Exit(code, stderr) => Ok(ToolOutput {
                code: Some(*code),
                stderr: stderr.clone(),
            }),
            TranscodeBehavior::SpawnError => Err(io::Error::new(
                io::ErrorKind::NotFound,
                "No such file or directory",
            )),
            TranscodeBehavior::TimedOut => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "conversion exceeded 5 seconds",
            )),
            TranscodeBehavior::Panic => panic!("transcoder blew up"),
        }
    }

    fn name(&self) -> &str {
        "fake"
    }
}

/// Poll until the job leaves `processing`
pub async fn wait_for_terminal(registry: &JobRegistry, id: &JobId) -> JobStatus {
    for _ in 0..500 {
        if let Some(job) = registry.get(id) {
            if job.status.is_terminal() {
                return job.status;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {} did not finish in time", id);
}
