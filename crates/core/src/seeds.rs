//! Seed file reader.

use std::path::Path;

use async_trait::async_trait;

use crate::Error;
use crate::traits::LineSource;

/// Reads newline-separated identifiers from the local filesystem.
///
/// Lines are trimmed and blank lines are skipped.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileLines;

#[async_trait]
impl LineSource for FileLines {
    async fn read_lines(&self, path: &Path) -> Result<Vec<String>, Error> {
        let raw = tokio::fs::read_to_string(path).await?;
        let lines: Vec<String> =
            raw.lines().map(str::trim).filter(|line| !line.is_empty()).map(str::to_string).collect();
        tracing::debug!(path = %path.display(), count = lines.len(), "read seed lines");
        Ok(lines)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_lines_skips_blanks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bundles.txt");
        std::fs::write(&path, "com.a\n\n  com.b  \r\n\t\ncom.c").unwrap();

        let lines = FileLines.read_lines(&path).await.unwrap();
        assert_eq!(lines, vec!["com.a", "com.b", "com.c"]);
    }

    #[tokio::test]
    async fn test_read_lines_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = FileLines.read_lines(&dir.path().join("absent.txt")).await;
        assert!(matches!(result, Err(Error::Io(_))));
    }
}
