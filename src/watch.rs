use std::future::Future;
use std::time::Duration;

use rusqlite::Connection;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::db::Quiz;
use crate::ingest::Ingestor;

/// Receives newly ingested quizzes, e.g. to post them in chat.
pub trait Announce {
    fn announce(&self, quiz: &Quiz);
}

/// Prints announcements to stdout.
pub struct Stdout;

impl Announce for Stdout {
    fn announce(&self, quiz: &Quiz) {
        println!("{}", announcement(quiz));
    }
}

pub fn announcement(quiz: &Quiz) -> String {
    format!("New quiz posted: #{} - {}", quiz.id, quiz.name)
}

/// Resolves on Ctrl-C. If the handler can't be installed, logs and never
/// resolves, leaving the default SIGINT behaviour in place.
pub async fn ctrl_c() {
    until_signal(tokio::signal::ctrl_c()).await
}

async fn until_signal(signal: impl Future<Output = std::io::Result<()>>) {
    if let Err(e) = signal.await {
        warn!("Could not listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}

/// Poll for new quizzes every `every` until `shutdown` resolves.
///
/// Ticks that arrive while a run is still going are dropped rather than
/// queued, and a run in progress is allowed to finish.
pub async fn run(
    ingestor: &Ingestor,
    conn: &Connection,
    every: Duration,
    sink: &dyn Announce,
    shutdown: impl Future<Output = ()>,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tokio::pin!(shutdown);

    info!("Polling for new quizzes every {}s", every.as_secs());
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutting down poller");
                return;
            }
            _ = ticker.tick() => match ingestor.try_run(conn).await {
                None => debug!("Previous run still in progress, skipping tick"),
                Some(Ok(added)) => {
                    for quiz in &added {
                        sink.announce(quiz);
                    }
                }
                Some(Err(e)) => warn!(class = e.class(), "Ingestion run failed: {}", e),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::*;
    use crate::config::Settings;
    use crate::db;
    use crate::error::{Error, Result};
    use crate::fetch::Fetch;

    #[derive(Default)]
    struct Collect(RefCell<Vec<String>>);

    impl Announce for Collect {
        fn announce(&self, quiz: &Quiz) {
            self.0.borrow_mut().push(announcement(quiz));
        }
    }

    struct Offline;

    #[async_trait]
    impl Fetch for Offline {
        async fn get(&self, url: &str) -> Result<Vec<u8>> {
            Err(Error::Status { url: url.to_string(), status: 503 })
        }
    }

    #[test]
    fn announcement_text() {
        let quiz = Quiz {
            id: 12,
            listing_id: 300578001,
            content_id: Some(341209),
            name: "Morning quiz: Monday, May 2".into(),
            published_at: None,
        };
        assert_eq!(announcement(&quiz), "New quiz posted: #12 - Morning quiz: Monday, May 2");
    }

    #[tokio::test]
    async fn failing_runs_do_not_stop_polling() {
        let ingestor = Ingestor::new(Settings::default(), Arc::new(Offline));
        let conn = db::open_in_memory().unwrap();
        let sink = Collect::default();

        let shutdown = tokio::time::sleep(Duration::from_millis(100));
        run(&ingestor, &conn, Duration::from_millis(10), &sink, shutdown).await;
        assert!(sink.0.borrow().is_empty());
    }

    #[tokio::test]
    async fn broken_signal_handler_does_not_shut_down() {
        let broken = async { Err(std::io::Error::new(std::io::ErrorKind::Other, "no signals")) };
        let waited = tokio::time::timeout(Duration::from_millis(50), until_signal(broken)).await;
        assert!(waited.is_err());

        let delivered = tokio::time::timeout(Duration::from_millis(50), until_signal(async { Ok(()) })).await;
        assert!(delivered.is_ok());
    }
}
