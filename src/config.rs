use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::Result;

const DEFAULT_CONFIG_FILE: &str = "quiz_ingest.toml";
const ENV_PREFIX: &str = "QUIZ";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub db_path: PathBuf,
    pub image_dir: PathBuf,
    /// Host serving the listing and detail pages.
    pub site_base: String,
    pub listing_path: String,
    /// Host serving the embedded quiz payloads.
    pub content_base: String,
    /// How many listing entries are looked at per run.
    pub batch_size: usize,
    pub poll_interval_secs: u64,
    pub http_timeout_secs: u64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub user_agent: String,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            db_path: PathBuf::from("data/quizzes.sqlite"),
            image_dir: PathBuf::from("images"),
            site_base: "https://www.stuff.co.nz".into(),
            listing_path: "/national/quizzes".into(),
            content_base: "https://www.riddle.com".into(),
            batch_size: 10,
            poll_interval_secs: 60,
            http_timeout_secs: 30,
            max_retries: 2,
            retry_backoff_ms: 1000,
            user_agent: concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")).into(),
        }
    }
}

impl Settings {
    /// Defaults, then the config file (if any), then `QUIZ_*` env vars.
    pub fn load(file: Option<&Path>) -> Result<Settings> {
        let mut builder = config::Config::builder();
        builder = match file {
            Some(path) => builder.add_source(config::File::from(path).required(true)),
            None => builder.add_source(config::File::with_name(DEFAULT_CONFIG_FILE).required(false)),
        };
        let settings = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?
            .try_deserialize()?;
        Ok(settings)
    }

    pub fn listing_url(&self) -> String {
        self.absolute(&self.listing_path)
    }

    /// Resolve a site-relative link against `site_base`.
    pub fn absolute(&self, link: &str) -> String {
        if link.starts_with("http://") || link.starts_with("https://") {
            return link.to_string();
        }
        format!("{}/{}", self.site_base.trim_end_matches('/'), link.trim_start_matches('/'))
    }

    pub fn content_url(&self, content_id: i64) -> String {
        format!("{}/a/{}", self.content_base.trim_end_matches('/'), content_id)
    }

    /// Host part of `content_base`, used to find content links on detail pages.
    pub fn content_host(&self) -> &str {
        self.content_base
            .split("//")
            .nth(1)
            .unwrap_or(&self.content_base)
            .trim_end_matches('/')
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls() {
        let s = Settings::default();
        assert_eq!(s.listing_url(), "https://www.stuff.co.nz/national/quizzes");
        assert_eq!(
            s.absolute("/national/quizzes/300123/morning-quiz"),
            "https://www.stuff.co.nz/national/quizzes/300123/morning-quiz"
        );
        assert_eq!(s.absolute("https://elsewhere.test/x"), "https://elsewhere.test/x");
        assert_eq!(s.content_url(42), "https://www.riddle.com/a/42");
        assert_eq!(s.content_host(), "www.riddle.com");
    }

    #[test]
    fn file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(&path, "batch_size = 3\nimage_dir = \"/tmp/pics\"\n").unwrap();
        let s = Settings::load(Some(&path)).unwrap();
        assert_eq!(s.batch_size, 3);
        assert_eq!(s.image_dir, PathBuf::from("/tmp/pics"));
        assert_eq!(s.poll_interval_secs, 60);
    }

    #[test]
    fn bad_settings_are_config_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(&path, "batch_size = \"lots\"\n").unwrap();
        let err = Settings::load(Some(&path)).unwrap_err();
        assert_eq!(err.class(), "config");

        let missing = Settings::load(Some(&dir.path().join("absent.toml"))).unwrap_err();
        assert!(matches!(missing, crate::Error::Config(_)));
    }
}
