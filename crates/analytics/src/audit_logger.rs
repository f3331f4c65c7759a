//! Asynchronous audit logger that batches records and appends them to a
//! JSON-lines file. Submission never blocks: a full channel drops the record.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use variant_core::config::AuditConfig;
use variant_core::{AuditRecord, AuditSink};

/// Sending half of the audit pipeline. Cheap to clone; the writer task
/// drains and exits once every clone has been dropped.
#[derive(Clone)]
pub struct AuditLogger {
    sender: mpsc::Sender<AuditRecord>,
    dropped: Arc<AtomicU64>,
}

impl AuditLogger {
    /// Spawn the background writer. Must be called from within a Tokio
    /// runtime. The returned handle completes after the final flush.
    pub fn start(config: &AuditConfig) -> anyhow::Result<(Self, JoinHandle<()>)> {
        if config.path.trim().is_empty() {
            anyhow::bail!("audit path must not be empty");
        }
        let (sender, receiver) = mpsc::channel::<AuditRecord>(config.channel_capacity.max(1));

        let writer = BatchWriter {
            path: PathBuf::from(&config.path),
        };
        let batch_size = config.batch_size.max(1);
        let flush_interval = Duration::from_millis(config.flush_interval_ms.max(1));

        let handle = tokio::spawn(async move {
            writer.run(receiver, batch_size, flush_interval).await;
        });

        info!(path = %config.path, "Audit logger initialized");
        Ok((
            Self {
                sender,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            handle,
        ))
    }

    /// Records rejected because the channel was full or closed.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl AuditSink for AuditLogger {
    fn emit(&self, record: AuditRecord) {
        if let Err(e) = self.sender.try_send(record) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("audit.dropped").increment(1);
            warn!("Audit record dropped: {}", e);
        } else {
            metrics::counter!("audit.queued").increment(1);
        }
    }
}

/// Background writer that batches records and appends them to the file.
struct BatchWriter {
    path: PathBuf,
}

impl BatchWriter {
    async fn run(
        self,
        mut receiver: mpsc::Receiver<AuditRecord>,
        batch_size: usize,
        flush_interval: Duration,
    ) {
        let mut buffer: Vec<AuditRecord> = Vec::with_capacity(batch_size);
        let mut interval = tokio::time::interval(flush_interval);

        loop {
            tokio::select! {
                received = receiver.recv() => match received {
                    Some(record) => {
                        buffer.push(record);
                        if buffer.len() >= batch_size {
                            self.flush(&mut buffer).await;
                        }
                    }
                    None => {
                        self.flush(&mut buffer).await;
                        debug!("Audit channel closed, writer exiting");
                        return;
                    }
                },
                _ = interval.tick() => {
                    if !buffer.is_empty() {
                        self.flush(&mut buffer).await;
                    }
                }
            }
        }
    }

    async fn flush(&self, buffer: &mut Vec<AuditRecord>) {
        let count = buffer.len();
        if count == 0 {
            return;
        }
        debug!(count = count, "Flushing audit batch");

        let mut lines = String::new();
        for record in buffer.iter() {
            match serde_json::to_string(record) {
                Ok(json) => {
                    lines.push_str(&json);
                    lines.push('\n');
                }
                Err(e) => warn!(error = %e, "Skipping unserializable audit record"),
            }
        }
        buffer.clear();

        match append(&self.path, lines.as_bytes()).await {
            Ok(()) => {
                metrics::counter!("audit.flushed").increment(count as u64);
            }
            Err(e) => {
                metrics::counter!("audit.flush_errors").increment(1);
                error!(error = %e, count = count, path = %self.path.display(), "Failed to flush audit batch");
            }
        }
    }
}

async fn append(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path).await?;
    file.write_all(bytes).await?;
    file.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use variant_core::{AuditKind, PoolKey};

    fn config(capacity: usize) -> (AuditConfig, PathBuf) {
        let path = std::env::temp_dir().join(format!("audit-{}.jsonl", uuid::Uuid::new_v4()));
        let config = AuditConfig {
            path: path.display().to_string(),
            batch_size: 2,
            flush_interval_ms: 50,
            channel_capacity: capacity,
        };
        (config, path)
    }

    fn record(reason: &str) -> AuditRecord {
        AuditRecord::new(
            PoolKey::new("c1", "youtube"),
            AuditKind::RegenerationSkipped {
                reason: reason.to_string(),
            },
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_records_are_appended_as_json_lines() {
        let (config, path) = config(16);
        let (logger, handle) = AuditLogger::start(&config).unwrap();
        for reason in ["a", "b", "c"] {
            logger.emit(record(reason));
        }
        drop(logger);
        handle.await.unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let records: Vec<AuditRecord> = contents
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(records.len(), 3);
        assert!(matches!(
            &records[2].kind,
            AuditKind::RegenerationSkipped { reason } if reason == "c"
        ));
        let _ = tokio::fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn test_full_channel_drops_without_blocking() {
        // The current-thread runtime does not run the writer until we yield,
        // so only `capacity` records fit.
        let (config, path) = config(2);
        let (logger, handle) = AuditLogger::start(&config).unwrap();
        for i in 0..5 {
            logger.emit(record(&i.to_string()));
        }
        assert_eq!(logger.dropped(), 3);
        drop(logger);
        handle.await.unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(contents.lines().count(), 2);
        let _ = tokio::fs::remove_file(&path).await;
    }

    #[test]
    fn test_rejects_empty_path() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let _guard = runtime.enter();
        let config = AuditConfig {
            path: " ".into(),
            ..AuditConfig::default()
        };
        assert!(AuditLogger::start(&config).is_err());
    }
}
