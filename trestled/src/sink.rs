//! Built-in sinks for trestled.
//!
//! Both sinks write one payload per line. Write errors are reported as
//! retryable so the pump re-attempts the write before routing the unit
//! to the failure outlet.

use async_trait::async_trait;
use tokio::fs::{File, OpenOptions};
use tokio::io::{self, AsyncWrite, AsyncWriteExt, Stdout};

use trestle_bridge::{DeliveryOutcome, Sink, SinkUnit};

async fn write_line<W>(writer: &mut W, payload: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(payload).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}

/// Writes each payload to standard output.
pub struct StdoutSink {
    out: Stdout,
}

impl StdoutSink {
    pub fn new() -> StdoutSink {
        StdoutSink { out: io::stdout() }
    }
}

impl Default for StdoutSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Sink for StdoutSink {
    async fn write(&mut self, unit: &SinkUnit) -> DeliveryOutcome {
        match write_line(&mut self.out, &unit.payload).await {
            Ok(()) => DeliveryOutcome::Delivered,
            Err(err) => DeliveryOutcome::Retryable(err.to_string()),
        }
    }
}

/// Appends each payload to a file.
pub struct FileSink {
    file: File,
}

impl FileSink {
    /// Opens `path` for appending, creating the file if needed.
    pub async fn open(path: &str) -> io::Result<FileSink> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        Ok(FileSink { file })
    }
}

#[async_trait]
impl Sink for FileSink {
    async fn write(&mut self, unit: &SinkUnit) -> DeliveryOutcome {
        match write_line(&mut self.file, &unit.payload).await {
            Ok(()) => DeliveryOutcome::Delivered,
            Err(err) => DeliveryOutcome::Retryable(err.to_string()),
        }
    }
}
