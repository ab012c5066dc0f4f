use async_trait::async_trait;
use log::debug;
use std::path::{Path, PathBuf};
use url::Url;

use crate::error::{Result, WptError};

/// Persists result files for a tested URL.
///
/// Implementations must tolerate concurrent writes to distinct filenames.
#[async_trait]
pub trait StorageManager: Send + Sync {
    async fn write_data_for_url(
        &self,
        data: &[u8],
        filename: &str,
        url: &str,
        category: &str,
    ) -> Result<()>;
}

/// Writes files below `<base_dir>/pages/<host>/<path>/data/<category>/`.
pub struct FileStorage {
    base_dir: PathBuf,
}

impl FileStorage {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Directory holding all data of one URL.
    pub fn page_dir(&self, url: &str) -> Result<PathBuf> {
        let parsed =
            Url::parse(url).map_err(|e| WptError::Storage(format!("Invalid URL {url}: {e}")))?;

        let mut dir = self.base_dir.join("pages");
        dir.push(sanitize(parsed.host_str().unwrap_or("unknown-host")));

        if let Some(segments) = parsed.path_segments() {
            for segment in segments.filter(|s| !s.is_empty()) {
                dir.push(sanitize(segment));
            }
        }

        if let Some(query) = parsed.query() {
            dir.push(format!("query-{}", sanitize(query)));
        }

        Ok(dir)
    }
}

#[async_trait]
impl StorageManager for FileStorage {
    async fn write_data_for_url(
        &self,
        data: &[u8],
        filename: &str,
        url: &str,
        category: &str,
    ) -> Result<()> {
        let dir = self.page_dir(url)?.join("data").join(category);
        tokio::fs::create_dir_all(&dir).await?;

        let path = dir.join(filename);
        tokio::fs::write(&path, data).await?;
        debug!("Stored {} bytes at {}", data.len(), path.display());

        Ok(())
    }
}

fn sanitize(part: &str) -> String {
    part.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_page_dir_from_url() {
        let storage = FileStorage::new("/results");
        let dir = storage
            .page_dir("https://www.example.com/docs/intro/?lang=en&v=2")
            .unwrap();

        assert_eq!(
            dir,
            PathBuf::from("/results/pages/www.example.com/docs/intro/query-lang_en_v_2")
        );
    }

    #[test]
    fn test_page_dir_for_root_url() {
        let storage = FileStorage::new("/results");
        let dir = storage.page_dir("https://example.com").unwrap();
        assert_eq!(dir, PathBuf::from("/results/pages/example.com"));
    }

    #[test]
    fn test_page_dir_rejects_invalid_url() {
        let storage = FileStorage::new("/results");
        assert!(matches!(
            storage.page_dir("not a url"),
            Err(WptError::Storage(_))
        ));
    }

    #[test]
    fn test_write_data_for_url() {
        let temp_dir = TempDir::new().unwrap();
        let storage = FileStorage::new(temp_dir.path());

        tokio_test::block_on(storage.write_data_for_url(
            b"image",
            "wpt-1-firstView.png",
            "https://example.com/",
            "screenshots",
        ))
        .unwrap();

        let written = temp_dir
            .path()
            .join("pages/example.com/data/screenshots/wpt-1-firstView.png");
        assert_eq!(std::fs::read(written).unwrap(), b"image");
    }
}
