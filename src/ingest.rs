use std::sync::Arc;

use indicatif::ProgressBar;
use rusqlite::Connection;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::db::{self, Quiz};
use crate::error::Result;
use crate::fetch::Fetch;
use crate::images::ImageStore;
use crate::normalize;
use crate::parser::listing::{self, ListingEntry};
use crate::parser::{detail, payload};

/// Drives listing → detail → content → normalize → store for each new quiz.
pub struct Ingestor {
    settings: Settings,
    fetcher: Arc<dyn Fetch>,
    images: ImageStore,
    progress: ProgressBar,
    /// Held for the duration of a run.
    running: Mutex<()>,
}

impl Ingestor {
    pub fn new(settings: Settings, fetcher: Arc<dyn Fetch>) -> Self {
        let images = ImageStore::new(settings.image_dir.clone());
        Ingestor {
            settings,
            fetcher,
            images,
            progress: ProgressBar::hidden(),
            running: Mutex::new(()),
        }
    }

    /// Report per-candidate progress on `pb`.
    pub fn with_progress(mut self, pb: ProgressBar) -> Self {
        self.progress = pb;
        self
    }

    /// Run once, waiting for any run already in progress to finish first.
    pub async fn run(&self, conn: &Connection) -> Result<Vec<Quiz>> {
        let _guard = self.running.lock().await;
        self.run_locked(conn).await
    }

    /// Run once unless a run is already in progress, in which case `None`.
    pub async fn try_run(&self, conn: &Connection) -> Option<Result<Vec<Quiz>>> {
        let _guard = self.running.try_lock().ok()?;
        Some(self.run_locked(conn).await)
    }

    async fn run_locked(&self, conn: &Connection) -> Result<Vec<Quiz>> {
        let listing_url = self.settings.listing_url();
        info!("Fetching listing: {}", listing_url);
        let page = self.fetcher.get(&listing_url).await?;
        let mut entries = listing::parse(&String::from_utf8_lossy(&page), &self.settings.listing_path)?;
        entries.truncate(self.settings.batch_size);
        debug!("{} candidate quizzes on listing", entries.len());

        self.progress.set_length(entries.len() as u64);
        self.progress.set_position(0);

        let mut added = Vec::new();
        for entry in &entries {
            match self.ingest_one(conn, entry).await {
                Ok(Some(quiz)) => added.push(quiz),
                Ok(None) => {}
                Err(e) => warn!(
                    link = %entry.link,
                    class = e.class(),
                    "Skipping quiz {:?}: {}",
                    entry.name,
                    e
                ),
            }
            self.progress.inc(1);
        }
        self.progress.finish_and_clear();

        info!("Ingestion run done: {} new of {} candidates", added.len(), entries.len());
        Ok(added)
    }

    /// `Ok(None)` when the quiz is already stored. Everything written for a
    /// quiz goes in one transaction, so a failure leaves no trace in the
    /// database and the quiz is retried next run.
    async fn ingest_one(&self, conn: &Connection, entry: &ListingEntry) -> Result<Option<Quiz>> {
        let listing_id = listing::listing_id(&entry.link)?;
        if db::quiz_exists(conn, listing_id)? {
            debug!(listing_id, "already stored");
            return Ok(None);
        }

        let page = self.fetcher.get(&self.settings.absolute(&entry.link)).await?;
        let content_id = detail::content_id(&page, self.settings.content_host())?;
        let content = self.fetcher.get(&self.settings.content_url(content_id)).await?;
        let payload = payload::extract(&content)?;
        let drafts = normalize::drafts(&payload.questions)?;

        let tx = conn.unchecked_transaction()?;
        let mut quiz = db::upsert_quiz(&tx, listing_id, &entry.name)?;
        db::set_quiz_content(&tx, &mut quiz, content_id, payload.published_at)?;
        let created = normalize::persist(&tx, self.fetcher.as_ref(), &self.images, &quiz, &drafts).await?;
        tx.commit()?;

        info!(
            id = quiz.id,
            listing_id,
            content_id,
            "New quiz {:?} with {} questions",
            quiz.name,
            created
        );
        Ok(Some(quiz))
    }
}
