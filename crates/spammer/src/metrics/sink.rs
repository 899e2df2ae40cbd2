//! Flat-file metrics output.
//!
//! Each round appends its lines in `name{labels} value` form with a single
//! write. Labels with empty values are omitted. Write failures are logged and
//! otherwise ignored.

use std::fmt::Display;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Render one metric line.
pub fn metric_line(name: &str, labels: &[(&str, &str)], value: impl Display) -> String {
    let labels = labels
        .iter()
        .filter(|(_, v)| !v.is_empty())
        .map(|(k, v)| format!("{k}=\"{v}\""))
        .collect::<Vec<_>>()
        .join(",");
    format!("{name}{{{labels}}} {value}")
}

/// Append-only metrics file.
#[derive(Clone, Debug)]
pub struct MetricsFile {
    path: PathBuf,
}

impl MetricsFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `lines`, creating the file if needed.
    pub async fn push(&self, lines: &[String]) {
        if lines.is_empty() {
            return;
        }
        let mut buf = lines.join("\n");
        buf.push('\n');

        match self.append(buf.as_bytes()).await {
            Ok(()) => debug!(path = %self.path.display(), lines = lines.len(), "Metrics pushed"),
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to write metrics"),
        }
    }

    async fn append(&self, buf: &[u8]) -> std::io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(buf).await?;
        file.flush().await
    }
}
