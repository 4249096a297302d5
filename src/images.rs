use std::fs;
use std::path::PathBuf;

use reqwest::Url;

use crate::error::{Error, Result};

/// Question images on disk, one directory per quiz listing id.
pub struct ImageStore {
    root: PathBuf,
}

impl ImageStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        ImageStore { root: root.into() }
    }

    pub fn quiz_dir(&self, listing_id: i64) -> PathBuf {
        self.root.join(listing_id.to_string())
    }

    /// Where the image at `url` goes for this quiz.
    pub fn path_for(&self, listing_id: i64, url: &str) -> Result<PathBuf> {
        Ok(self.quiz_dir(listing_id).join(file_name(url)?))
    }

    /// Write image bytes, creating the quiz directory if needed.
    pub fn save(&self, listing_id: i64, url: &str, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.path_for(listing_id, url)?;
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(&path, bytes)?;
        Ok(path)
    }
}

/// Last path segment of the image URL, query string dropped.
pub fn file_name(url: &str) -> Result<String> {
    let parsed = Url::parse(url).map_err(|e| Error::parse(format!("image url {}: {}", url, e)))?;
    parsed
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|name| !name.is_empty() && *name != "." && *name != "..")
        .map(str::to_string)
        .ok_or_else(|| Error::parse(format!("image url {} has no file name", url)))
}
