use std::future::Future;
use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::Result;

pub fn connect(path: &Path) -> Result<Connection> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn open_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    conn.execute_batch("PRAGMA foreign_keys=ON;")?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS quizzes (
            id           INTEGER PRIMARY KEY,
            listing_id   INTEGER UNIQUE NOT NULL,
            content_id   INTEGER,
            name         TEXT NOT NULL,
            published_at TEXT,
            created_at   TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_quizzes_content ON quizzes(content_id);

        CREATE TABLE IF NOT EXISTS questions (
            id         INTEGER PRIMARY KEY,
            quiz_id    INTEGER NOT NULL REFERENCES quizzes(id),
            position   INTEGER NOT NULL,
            text       TEXT NOT NULL,
            image_path TEXT,
            freetext   BOOLEAN NOT NULL DEFAULT 0,
            UNIQUE(quiz_id, text)
        );
        CREATE INDEX IF NOT EXISTS idx_questions_quiz ON questions(quiz_id);

        -- Free-text answers are stored lowercased with correct = 0, so the
        -- same constraint covers both question kinds.
        CREATE TABLE IF NOT EXISTS answers (
            id          INTEGER PRIMARY KEY,
            question_id INTEGER NOT NULL REFERENCES questions(id),
            position    INTEGER NOT NULL,
            text        TEXT NOT NULL,
            correct     BOOLEAN NOT NULL DEFAULT 0,
            UNIQUE(question_id, text, correct)
        );
        CREATE INDEX IF NOT EXISTS idx_answers_question ON answers(question_id);

        -- Owned by the chat layer
        CREATE TABLE IF NOT EXISTS players (
            id         INTEGER PRIMARY KEY,
            discord_id INTEGER UNIQUE NOT NULL,
            name       TEXT NOT NULL,
            ping       BOOLEAN NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS player_quizzes (
            id         INTEGER PRIMARY KEY,
            player_id  INTEGER NOT NULL REFERENCES players(id),
            quiz_id    INTEGER NOT NULL REFERENCES quizzes(id),
            score      INTEGER NOT NULL,
            time_taken INTEGER NOT NULL,
            perfect    BOOLEAN NOT NULL DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS idx_pq_quiz ON player_quizzes(quiz_id);

        CREATE TABLE IF NOT EXISTS guild_config (
            server_id       INTEGER PRIMARY KEY,
            general_channel INTEGER
        );
        ",
    )?;
    Ok(())
}

// ── Rows ──

#[derive(Debug, Clone, PartialEq)]
pub struct Quiz {
    pub id: i64,
    pub listing_id: i64,
    pub content_id: Option<i64>,
    pub name: String,
    pub published_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Question {
    pub id: i64,
    pub quiz_id: i64,
    pub position: i64,
    pub text: String,
    pub image_path: Option<String>,
    pub freetext: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Answer {
    pub id: i64,
    pub question_id: i64,
    pub position: i64,
    pub text: String,
    pub correct: bool,
}

const QUIZ_COLUMNS: &str = "id, listing_id, content_id, name, published_at";
const QUESTION_COLUMNS: &str = "id, quiz_id, position, text, image_path, freetext";
const ANSWER_COLUMNS: &str = "id, question_id, position, text, correct";

fn quiz_from_row(row: &Row) -> rusqlite::Result<Quiz> {
    Ok(Quiz {
        id: row.get(0)?,
        listing_id: row.get(1)?,
        content_id: row.get(2)?,
        name: row.get(3)?,
        published_at: row.get(4)?,
    })
}

fn question_from_row(row: &Row) -> rusqlite::Result<Question> {
    Ok(Question {
        id: row.get(0)?,
        quiz_id: row.get(1)?,
        position: row.get(2)?,
        text: row.get(3)?,
        image_path: row.get(4)?,
        freetext: row.get(5)?,
    })
}

fn answer_from_row(row: &Row) -> rusqlite::Result<Answer> {
    Ok(Answer {
        id: row.get(0)?,
        question_id: row.get(1)?,
        position: row.get(2)?,
        text: row.get(3)?,
        correct: row.get(4)?,
    })
}

// ── Upserts ──

pub fn quiz_exists(conn: &Connection, listing_id: i64) -> Result<bool> {
    let found = conn
        .query_row("SELECT 1 FROM quizzes WHERE listing_id = ?1", [listing_id], |_| Ok(()))
        .optional()?;
    Ok(found.is_some())
}

/// Insert the quiz shell unless one with this listing id exists; returns the stored row.
pub fn upsert_quiz(conn: &Connection, listing_id: i64, name: &str) -> Result<Quiz> {
    conn.execute(
        "INSERT OR IGNORE INTO quizzes (listing_id, name) VALUES (?1, ?2)",
        params![listing_id, name],
    )?;
    let quiz = conn.query_row(
        &format!("SELECT {} FROM quizzes WHERE listing_id = ?1", QUIZ_COLUMNS),
        [listing_id],
        quiz_from_row,
    )?;
    Ok(quiz)
}

/// Back-fill the content identifier and publication time once the payload is known.
pub fn set_quiz_content(
    conn: &Connection,
    quiz: &mut Quiz,
    content_id: i64,
    published_at: DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        "UPDATE quizzes SET content_id = ?2, published_at = ?3 WHERE id = ?1",
        params![quiz.id, content_id, published_at],
    )?;
    quiz.content_id = Some(content_id);
    quiz.published_at = Some(published_at);
    Ok(())
}

/// Upsert a question keyed on (quiz, text).
///
/// `image_path` runs only when the row is new, so an image already recorded
/// for this question is never fetched again. It yields `None` for questions
/// without an image. If it fails the new row is
/// removed and the error returned. The bool is true when the row was created.
pub async fn upsert_question<F, Fut>(
    conn: &Connection,
    quiz: &Quiz,
    position: i64,
    text: &str,
    freetext: bool,
    image_path: F,
) -> Result<(Question, bool)>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Option<String>>>,
{
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO questions (quiz_id, position, text, freetext) VALUES (?1, ?2, ?3, ?4)",
        params![quiz.id, position, text, freetext],
    )?;
    let mut question = conn.query_row(
        &format!("SELECT {} FROM questions WHERE quiz_id = ?1 AND text = ?2", QUESTION_COLUMNS),
        params![quiz.id, text],
        question_from_row,
    )?;
    if inserted == 0 {
        return Ok((question, false));
    }

    match image_path().await {
        Ok(Some(path)) => {
            conn.execute(
                "UPDATE questions SET image_path = ?2 WHERE id = ?1",
                params![question.id, path],
            )?;
            question.image_path = Some(path);
            Ok((question, true))
        }
        Ok(None) => Ok((question, true)),
        Err(e) => {
            conn.execute("DELETE FROM questions WHERE id = ?1", [question.id])?;
            Err(e)
        }
    }
}

/// Upsert an answer keyed on (question, text, correct).
pub fn upsert_answer(
    conn: &Connection,
    question: &Question,
    position: i64,
    text: &str,
    correct: bool,
) -> Result<Answer> {
    conn.execute(
        "INSERT OR IGNORE INTO answers (question_id, position, text, correct) VALUES (?1, ?2, ?3, ?4)",
        params![question.id, position, text, correct],
    )?;
    let answer = conn.query_row(
        &format!(
            "SELECT {} FROM answers WHERE question_id = ?1 AND text = ?2 AND correct = ?3",
            ANSWER_COLUMNS
        ),
        params![question.id, text, correct],
        answer_from_row,
    )?;
    Ok(answer)
}

// ── Reads for the chat layer ──

pub struct QuizSummary {
    pub id: i64,
    pub name: String,
    pub published_at: Option<DateTime<Utc>>,
    pub question_count: i64,
}

/// Most recent quizzes first (highest content id), like the `quiz list` command.
pub fn recent_quizzes(conn: &Connection, limit: usize) -> Result<Vec<QuizSummary>> {
    let mut stmt = conn.prepare(
        "SELECT q.id, q.name, q.published_at, COUNT(qn.id)
         FROM quizzes q
         LEFT JOIN questions qn ON qn.quiz_id = q.id
         GROUP BY q.id
         ORDER BY q.content_id DESC, q.id DESC
         LIMIT ?1",
    )?;
    let rows = stmt
        .query_map([limit as i64], |row| {
            Ok(QuizSummary {
                id: row.get(0)?,
                name: row.get(1)?,
                published_at: row.get(2)?,
                question_count: row.get(3)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub struct QuestionTree {
    pub question: Question,
    pub answers: Vec<Answer>,
}

pub struct QuizTree {
    pub quiz: Quiz,
    pub questions: Vec<QuestionTree>,
}

/// Load a quiz with its questions and answers in source order.
pub fn load_quiz(conn: &Connection, id: i64) -> Result<Option<QuizTree>> {
    let quiz = conn
        .query_row(&format!("SELECT {} FROM quizzes WHERE id = ?1", QUIZ_COLUMNS), [id], quiz_from_row)
        .optional()?;
    let Some(quiz) = quiz else {
        return Ok(None);
    };

    let mut q_stmt = conn.prepare(&format!(
        "SELECT {} FROM questions WHERE quiz_id = ?1 ORDER BY position, id",
        QUESTION_COLUMNS
    ))?;
    let questions = q_stmt
        .query_map([quiz.id], question_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut a_stmt = conn.prepare(&format!(
        "SELECT {} FROM answers WHERE question_id = ?1 ORDER BY position, id",
        ANSWER_COLUMNS
    ))?;
    let mut tree = Vec::with_capacity(questions.len());
    for question in questions {
        let answers = a_stmt
            .query_map([question.id], answer_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        tree.push(QuestionTree { question, answers });
    }

    Ok(Some(QuizTree { quiz, questions: tree }))
}

// ── Stats ──

pub struct Stats {
    pub quizzes: usize,
    pub questions: usize,
    pub answers: usize,
    pub freetext: usize,
    pub images: usize,
}

pub fn get_stats(conn: &Connection) -> Result<Stats> {
    let count = |sql: &str| -> Result<usize> { Ok(conn.query_row(sql, [], |r| r.get(0))?) };
    Ok(Stats {
        quizzes: count("SELECT COUNT(*) FROM quizzes")?,
        questions: count("SELECT COUNT(*) FROM questions")?,
        answers: count("SELECT COUNT(*) FROM answers")?,
        freetext: count("SELECT COUNT(*) FROM questions WHERE freetext = 1")?,
        images: count("SELECT COUNT(*) FROM questions WHERE image_path IS NOT NULL")?,
    })
}
