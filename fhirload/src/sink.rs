use std::path::{Path, PathBuf};

use tokio::{
    fs::File,
    io::{AsyncWriteExt, BufWriter},
};

use crate::error::{Error, Result};

/// File name of worker `worker`'s partition inside the output directory.
pub fn partition_file_name(worker: usize) -> String {
    format!("worker_{worker}_output.ndjson")
}

/// NDJSON file owned by exactly one worker for its whole lifetime.
///
/// Partitions are never shared, so writes need no locking.
#[derive(Debug)]
pub struct OutputPartition {
    path: PathBuf,
    writer: BufWriter<File>,
    records: u64,
}

impl OutputPartition {
    /// Creates (or truncates) the partition of `worker` in `dir`.
    pub async fn create(dir: &Path, worker: usize) -> Result<Self> {
        let path = dir.join(partition_file_name(worker));
        let file = File::create(&path).await.map_err(|source| Error::Sink {
            path: path.clone(),
            source,
        })?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
            records: 0,
        })
    }

    /// Appends `body` followed by a newline.
    pub async fn append(&mut self, body: &[u8]) -> Result<()> {
        self.write(body).await.map_err(|source| Error::Sink {
            path: self.path.clone(),
            source,
        })?;
        self.records += 1;
        Ok(())
    }

    async fn write(&mut self, body: &[u8]) -> std::io::Result<()> {
        self.writer.write_all(body).await?;
        self.writer.write_all(b"\n").await
    }

    /// Flushes buffered records. Returns how many were written.
    pub async fn finish(mut self) -> Result<u64> {
        self.writer.flush().await.map_err(|source| Error::Sink {
            path: self.path.clone(),
            source,
        })?;
        Ok(self.records)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Creates the output directory and one partition per worker.
pub async fn create_partitions(dir: &Path, workers: usize) -> Result<Vec<OutputPartition>> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| Error::io(dir, e))?;
    let mut partitions = Vec::with_capacity(workers);
    for worker in 0..workers {
        partitions.push(OutputPartition::create(dir, worker).await?);
    }
    Ok(partitions)
}
