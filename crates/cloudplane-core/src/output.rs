//! Result-output hook for listing paths

use crate::error::Result;
use serde::Serialize;
use std::path::Path;
use tracing::debug;

/// Write `items` to `path` as pretty-printed JSON, creating parent directories.
pub async fn write_result<T: Serialize>(path: impl AsRef<Path>, items: &[T]) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }

    let content = serde_json::to_string_pretty(items)?;
    tokio::fs::write(path, content).await?;
    debug!(path = %path.display(), count = items.len(), "Wrote result file");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_write_result_creates_parents() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("out/disks.json");

        write_result(&path, &[json!({"DiskId": "disk-1"}), json!({"DiskId": "disk-2"})])
            .await
            .unwrap();

        let written: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written[1]["DiskId"], "disk-2");
    }

    #[tokio::test]
    async fn test_write_empty_list() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("empty.json");
        write_result::<String>(&path, &[]).await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "[]");
    }
}
