use async_trait::async_trait;
use clamav_client::Tcp;
use std::path::{Path, PathBuf};
use std::str;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Outcome of an antivirus scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanVerdict {
    Clean,
    Infected(String),
    Unavailable(String),
}

/// Antivirus engine consulted on every persisted upload
#[async_trait]
pub trait MalwareScanner: Send + Sync {
    async fn scan(&self, path: &Path) -> ScanVerdict;
}

/// Where the ClamAV daemon listens
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClamdAddress {
    Socket(PathBuf),
    Tcp { host: String, port: u16 },
}

/// Scanner backed by a running `clamd`
///
/// The client API is blocking, so each scan runs on the blocking pool and
/// is bounded by a timeout. Any failure to get an answer is reported as
/// [`ScanVerdict::Unavailable`]; uploads are never waved through.
///
/// A blocking scan cannot be interrupted. When the timeout fires before the
/// task has started, the task is cancelled and never contacts clamd. When it
/// fires mid-scan, the task keeps streaming the already opened file to clamd
/// while the pipeline deletes it, and its late verdict is discarded.
#[derive(Debug, Clone)]
pub struct ClamdScanner {
    address: ClamdAddress,
    timeout: Duration,
}

impl ClamdScanner {
    pub fn new(address: ClamdAddress, timeout: Duration) -> Self {
        Self { address, timeout }
    }
}

#[async_trait]
impl MalwareScanner for ClamdScanner {
    async fn scan(&self, path: &Path) -> ScanVerdict {
        let start = Instant::now();
        debug!(path = %path.display(), address = ?self.address, "Starting ClamAV scan");

        let address = self.address.clone();
        let file_path = path.to_path_buf();
        let cancelled = Arc::new(AtomicBool::new(false));
        let task_cancelled = cancelled.clone();
        let result = tokio::time::timeout(
            self.timeout,
            tokio::task::spawn_blocking(move || {
                scan_unless_cancelled(&address, &file_path, &task_cancelled)
            }),
        )
        .await;

        let verdict = match result {
            Ok(Ok(verdict)) => verdict,
            Ok(Err(e)) => ScanVerdict::Unavailable(format!("scan task failed: {}", e)),
            Err(_) => {
                cancelled.store(true, Ordering::SeqCst);
                ScanVerdict::Unavailable(format!("scan timed out after {:?}", self.timeout))
            }
        };

        let duration_ms = start.elapsed().as_millis();
        match &verdict {
            ScanVerdict::Clean => info!(duration_ms, "File scan completed: clean"),
            ScanVerdict::Infected(signature) => {
                warn!(duration_ms, signature = %signature, "File scan detected malware")
            }
            ScanVerdict::Unavailable(reason) => {
                error!(duration_ms, reason = %reason, "ClamAV scan could not complete")
            }
        }
        verdict
    }
}

fn scan_unless_cancelled(address: &ClamdAddress, path: &Path, cancelled: &AtomicBool) -> ScanVerdict {
    // The caller gave up while this task waited for a blocking thread
    if cancelled.load(Ordering::SeqCst) {
        return ScanVerdict::Unavailable("scan cancelled before it started".to_string());
    }
    scan_file_blocking(address, path)
}

fn scan_file_blocking(address: &ClamdAddress, path: &Path) -> ScanVerdict {
    let response = match address {
        ClamdAddress::Tcp { host, port } => {
            let host_address = format!("{}:{}", host, port);
            clamav_client::scan_file(
                path,
                Tcp {
                    host_address: host_address.as_str(),
                },
                None,
            )
        }
        #[cfg(unix)]
        ClamdAddress::Socket(socket_path) => clamav_client::scan_file(
            path,
            clamav_client::Socket {
                socket_path: socket_path.as_path(),
            },
            None,
        ),
        #[cfg(not(unix))]
        ClamdAddress::Socket(_) => {
            return ScanVerdict::Unavailable(
                "unix socket transport is not supported on this platform".to_string(),
            )
        }
    };

    match response {
        Ok(bytes) => interpret_response(&bytes),
        Err(e) => ScanVerdict::Unavailable(format!("clamd unreachable: {}", e)),
    }
}

/// Parse a clamd reply such as `stream: OK` or `/path: Eicar-Signature FOUND`
fn interpret_response(response: &[u8]) -> ScanVerdict {
    match clamav_client::clean(response) {
        Ok(true) => ScanVerdict::Clean,
        Ok(false) => {
            let text = str::from_utf8(response).unwrap_or("").trim_end_matches('\0').trim();
            if let Some(body) = text.strip_suffix("FOUND") {
                let signature = body
                    .rsplit(':')
                    .next()
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .unwrap_or("unknown");
                ScanVerdict::Infected(signature.to_string())
            } else {
                ScanVerdict::Unavailable(format!("unexpected clamd reply: {}", text))
            }
        }
        Err(e) => ScanVerdict::Unavailable(format!("unreadable clamd reply: {}", e)),
    }
}

/// Scanner used when antivirus is switched off in configuration
#[derive(Debug, Default, Clone)]
pub struct DisabledScanner;

#[async_trait]
impl MalwareScanner for DisabledScanner {
    async fn scan(&self, path: &Path) -> ScanVerdict {
        debug!(path = %path.display(), "Antivirus disabled, skipping scan");
        ScanVerdict::Clean
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_reply_is_clean() {
        assert_eq!(interpret_response(b"stream: OK\0"), ScanVerdict::Clean);
    }

    #[test]
    fn found_reply_names_the_signature() {
        let verdict = interpret_response(b"/srv/uploads/a.png: Win.Test.EICAR_HDB-1 FOUND\0");
        assert_eq!(verdict, ScanVerdict::Infected("Win.Test.EICAR_HDB-1".to_string()));
    }

    #[test]
    fn error_reply_is_unavailable() {
        let verdict = interpret_response(b"/srv/uploads/a.png: lstat() failed. ERROR\0");
        assert!(matches!(verdict, ScanVerdict::Unavailable(_)));
    }

    #[tokio::test]
    async fn unreachable_daemon_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("sample.png");
        std::fs::write(&file, b"data").unwrap();

        let scanner = ClamdScanner::new(
            ClamdAddress::Socket(dir.path().join("missing.sock")),
            Duration::from_secs(5),
        );
        assert!(matches!(scanner.scan(&file).await, ScanVerdict::Unavailable(_)));
    }

    #[tokio::test]
    async fn silent_daemon_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("sample.png");
        std::fs::write(&file, b"data").unwrap();

        // Connections queue in the backlog and never get a reply
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let scanner = ClamdScanner::new(
            ClamdAddress::Tcp {
                host: "127.0.0.1".to_string(),
                port,
            },
            Duration::from_millis(200),
        );

        let verdict = scanner.scan(&file).await;
        assert_eq!(
            verdict,
            ScanVerdict::Unavailable("scan timed out after 200ms".to_string())
        );
        // Resets the queued connection so the detached scan returns
        drop(listener);
    }

    #[test]
    fn cancelled_scan_never_contacts_the_daemon() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("sample.png");
        std::fs::write(&file, b"data").unwrap();

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.set_nonblocking(true).unwrap();
        let address = ClamdAddress::Tcp {
            host: "127.0.0.1".to_string(),
            port: listener.local_addr().unwrap().port(),
        };

        let verdict = scan_unless_cancelled(&address, &file, &AtomicBool::new(true));
        assert!(matches!(verdict, ScanVerdict::Unavailable(reason) if reason.contains("cancelled")));
        assert_eq!(
            listener.accept().unwrap_err().kind(),
            std::io::ErrorKind::WouldBlock
        );
    }

    #[tokio::test]
    async fn disabled_scanner_approves() {
        assert_eq!(DisabledScanner.scan(Path::new("x")).await, ScanVerdict::Clean);
    }
}
