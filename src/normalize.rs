use rusqlite::Connection;
use tracing::{debug, warn};

use crate::db::{self, Quiz};
use crate::error::{Error, Result};
use crate::fetch::{is_transient, Fetch};
use crate::images::ImageStore;
use crate::parser::payload::QuestionPage;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Kind {
    /// Pick one of `options`; `options[correct]` scores.
    Choice { options: Vec<String>, correct: usize },
    /// Typed answer matched case-insensitively against `accepted` (lowercased).
    FreeText { accepted: Vec<String> },
}

/// A question ready to be stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionDraft {
    pub text: String,
    pub image_url: Option<String>,
    pub kind: Kind,
}

impl QuestionDraft {
    pub fn is_freetext(&self) -> bool {
        matches!(self.kind, Kind::FreeText { .. })
    }

    /// (text, correct) pairs in source order.
    pub fn answers(&self) -> Vec<(&str, bool)> {
        match &self.kind {
            Kind::Choice { options, correct } => options
                .iter()
                .enumerate()
                .map(|(i, label)| (label.as_str(), i == *correct))
                .collect(),
            Kind::FreeText { accepted } => accepted.iter().map(|a| (a.as_str(), false)).collect(),
        }
    }
}

/// Map question pages to drafts, rejecting pages that break the
/// one-correct-choice or at-least-one-accepted-answer rules.
pub fn drafts(pages: &[QuestionPage]) -> Result<Vec<QuestionDraft>> {
    pages.iter().map(draft).collect()
}

fn draft(page: &QuestionPage) -> Result<QuestionDraft> {
    let text = page.title.trim().to_string();
    if text.is_empty() {
        return Err(Error::decode("question with empty title"));
    }

    let kind = match (&page.text_answers, &page.all_answers) {
        (Some(accepted), _) => {
            let mut lowered: Vec<String> = Vec::with_capacity(accepted.len());
            for a in accepted {
                let a = a.trim().to_lowercase();
                if !a.is_empty() && !lowered.contains(&a) {
                    lowered.push(a);
                }
            }
            if lowered.is_empty() {
                return Err(Error::decode(format!("free-text question {:?} has no accepted answers", text)));
            }
            Kind::FreeText { accepted: lowered }
        }
        (None, Some(all)) => {
            let index = page
                .answer_index
                .ok_or_else(|| Error::decode(format!("question {:?} has no answerIndex", text)))?;
            let correct = usize::try_from(index)
                .ok()
                .filter(|i| *i < all.len())
                .ok_or_else(|| {
                    Error::decode(format!("answerIndex {} out of range for {} options in {:?}", index, all.len(), text))
                })?;
            Kind::Choice { options: all.iter().map(|a| a.label.trim().to_string()).collect(), correct }
        }
        (None, None) => return Err(Error::decode(format!("question {:?} has no answers", text))),
    };

    Ok(QuestionDraft { text, image_url: page.image.as_ref().map(|i| i.src.clone()), kind })
}

/// Store drafts under `quiz`, downloading each new question's image into the
/// quiz's image directory. Returns how many questions were newly created.
///
/// A transient image failure fails the quiz so it is retried later. An image
/// that is gone for good (4xx, unusable URL) is logged and the question is
/// stored without one.
pub async fn persist(
    conn: &Connection,
    fetcher: &dyn Fetch,
    images: &ImageStore,
    quiz: &Quiz,
    drafts: &[QuestionDraft],
) -> Result<usize> {
    let mut created = 0;
    for (position, draft) in drafts.iter().enumerate() {
        let image = move || download_image(fetcher, images, quiz.listing_id, draft.image_url.as_deref());
        let (question, is_new) =
            db::upsert_question(conn, quiz, position as i64, &draft.text, draft.is_freetext(), image).await?;
        if is_new {
            created += 1;
        }

        for (i, (text, correct)) in draft.answers().into_iter().enumerate() {
            db::upsert_answer(conn, &question, i as i64, text, correct)?;
        }
        debug!(quiz = quiz.listing_id, question = %question.text, is_new, "stored question");
    }
    Ok(created)
}

async fn download_image(
    fetcher: &dyn Fetch,
    images: &ImageStore,
    listing_id: i64,
    url: Option<&str>,
) -> Result<Option<String>> {
    let Some(url) = url else {
        return Ok(None);
    };
    if let Err(e) = images.path_for(listing_id, url) {
        warn!(quiz = listing_id, "Skipping image {}: {}", url, e);
        return Ok(None);
    }
    let bytes = match fetcher.get(url).await {
        Ok(bytes) => bytes,
        Err(e) if !is_transient(&e) => {
            warn!(quiz = listing_id, class = e.class(), "Skipping image {}: {}", url, e);
            return Ok(None);
        }
        Err(e) => return Err(e),
    };
    let path = images.save(listing_id, url, &bytes)?;
    Ok(Some(path.to_string_lossy().into_owned()))
}
