use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use scraper::{Html, Selector};
use serde::Deserialize;

use crate::error::{Error, Result};

/// The payload lives in the second `<script>` of the content page.
const PAYLOAD_SCRIPT_INDEX: usize = 1;
const ASSIGNMENT_TARGET: &str = "window.riddle_view";
const QUESTION_TEMPLATE: &str = "quiz-question";

static SCRIPT: LazyLock<Selector> = LazyLock::new(|| Selector::parse("script").unwrap());

/// What the rest of the pipeline needs from a content page.
#[derive(Debug, Clone)]
pub struct Payload {
    pub published_at: DateTime<Utc>,
    pub questions: Vec<QuestionPage>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionPage {
    #[serde(rename = "title_plain")]
    pub title: String,
    #[serde(default)]
    pub image: Option<ImageRef>,
    #[serde(default)]
    pub text_answers: Option<Vec<String>>,
    #[serde(default)]
    pub all_answers: Option<Vec<AnswerLabel>>,
    #[serde(default)]
    pub answer_index: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImageRef {
    #[serde(rename = "srcCDN")]
    pub src: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnswerLabel {
    pub label: String,
}

#[derive(Deserialize)]
struct RiddleView {
    data: Envelope,
}

#[derive(Deserialize)]
struct Envelope {
    data: RiddleData,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RiddleData {
    published: Published,
    page_groups: Vec<PageGroup>,
}

#[derive(Deserialize)]
struct Published {
    date: i64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageGroup {
    template_id: String,
    // Only question pages have a known shape.
    #[serde(default)]
    pages: Vec<serde_json::Value>,
}

/// Content page bytes → decoded payload.
pub fn extract(page: &[u8]) -> Result<Payload> {
    let html = String::from_utf8_lossy(page);
    let script = script_body(&html)?;
    decode(&repair(&script))
}

/// Text of the payload script with the `window.riddle_view =` assignment and
/// trailing semicolon removed.
pub fn script_body(html: &str) -> Result<String> {
    let document = Html::parse_document(html);
    let script = document
        .select(&SCRIPT)
        .nth(PAYLOAD_SCRIPT_INDEX)
        .ok_or_else(|| Error::parse("content page has fewer than two <script> elements"))?;

    let text: String = script.text().collect();
    let mut body = text.trim();
    if let Some(rest) = body.strip_prefix(ASSIGNMENT_TARGET) {
        body = rest.trim_start();
        body = body.strip_prefix('=').unwrap_or(body);
    }
    Ok(body.trim().trim_end_matches(';').trim_end().to_string())
}

/// Quote bare object keys (`data:`, `translations:`, `questionBankData:` and
/// any other identifier followed by `:`) so the object literal parses as JSON.
/// String literals are copied through untouched.
pub fn repair(src: &str) -> String {
    let mut out = String::with_capacity(src.len() + 16);
    let mut chars = src.char_indices().peekable();
    let mut in_string = false;
    let mut escaped = false;

    while let Some((i, c)) = chars.next() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        if c == '"' {
            in_string = true;
            out.push(c);
        } else if is_ident_start(c) {
            let mut end = i + c.len_utf8();
            while let Some(&(j, d)) = chars.peek() {
                if !is_ident_char(d) {
                    break;
                }
                end = j + d.len_utf8();
                chars.next();
            }
            let ident = &src[i..end];
            if src[end..].trim_start().starts_with(':') {
                out.push('"');
                out.push_str(ident);
                out.push('"');
            } else {
                out.push_str(ident);
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == '$'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '$'
}

/// Decode repaired JSON into the payload shape.
pub fn decode(json: &str) -> Result<Payload> {
    let view: RiddleView = serde_json::from_str(json)?;
    let data = view.data.data;

    let published_at = DateTime::<Utc>::from_timestamp(data.published.date, 0)
        .ok_or_else(|| Error::decode(format!("publish date {} out of range", data.published.date)))?;

    let group = data
        .page_groups
        .into_iter()
        .find(|g| g.template_id == QUESTION_TEMPLATE)
        .ok_or_else(|| Error::decode(format!("no {} page group", QUESTION_TEMPLATE)))?;
    let questions = group
        .pages
        .into_iter()
        .map(serde_json::from_value)
        .collect::<std::result::Result<Vec<QuestionPage>, _>>()?;

    Ok(Payload { published_at, questions })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn fixture(name: &str) -> Vec<u8> {
        std::fs::read(format!("tests/fixtures/{}", name)).unwrap()
    }

    #[test]
    fn repaired_matches_strict_json() {
        let bare = script_body(&String::from_utf8(fixture("content_341209.html")).unwrap()).unwrap();
        let strict = std::fs::read_to_string("tests/fixtures/content_341209.json").unwrap();
        assert!(serde_json::from_str::<Value>(&bare).is_err());

        let repaired: Value = serde_json::from_str(&repair(&bare)).unwrap();
        let expected: Value = serde_json::from_str(&strict).unwrap();
        assert_eq!(repaired, expected);
    }

    #[test]
    fn repair_named_keys() {
        let src = r#"{data:{x:1},translations:{},questionBankData:null}"#;
        assert_eq!(repair(src), r#"{"data":{"x":1},"translations":{},"questionBankData":null}"#);
    }

    #[test]
    fn repair_leaves_strings_and_literals() {
        let src = r#"{data: "keep data: as is, \"quoted: too\"", "ok": true, n: null, f: false}"#;
        let value: Value = serde_json::from_str(&repair(src)).unwrap();
        assert_eq!(value["data"], r#"keep data: as is, "quoted: too""#);
        assert_eq!(value["ok"], true);
        assert!(value["n"].is_null());
        assert_eq!(value["f"], false);
    }

    #[test]
    fn extract_fixture() {
        let payload = extract(&fixture("content_341209.html")).unwrap();
        assert_eq!(payload.published_at.timestamp(), 1651435200);
        assert_eq!(payload.questions.len(), 3);

        let first = &payload.questions[0];
        assert_eq!(first.title, "Which city hosted the 2022 Commonwealth Games?");
        assert_eq!(first.answer_index, Some(2));
        assert_eq!(first.all_answers.as_ref().unwrap().len(), 4);
        assert!(first.text_answers.is_none());

        let last = &payload.questions[2];
        assert_eq!(last.text_answers.as_deref().unwrap(), ["Wellington", "Te Whanganui-a-Tara"]);
        assert_eq!(last.image.as_ref().unwrap().src, "https://cdn.riddle.com/341209/capital.jpg?w=800");
    }

    #[test]
    fn script_body_takes_second_script() {
        for n in 1..=2 {
            let html = format!(
                "<script>var ads = {{}};</script><script>window.riddle_view = {{data:{{n:{}}}}};</script><script>x()</script>",
                n
            );
            assert_eq!(script_body(&html).unwrap(), format!("{{data:{{n:{}}}}}", n));
        }
    }

    #[test]
    fn too_few_scripts() {
        let html = b"<html><head><script>var a = 1;</script></head></html>";
        assert!(matches!(extract(html), Err(Error::Parse(_))));
    }

    #[test]
    fn malformed_after_repair() {
        let html = b"<script></script><script>window.riddle_view = {data:{data:{published:</script>";
        assert!(matches!(extract(html), Err(Error::Decode(_))));
    }

    #[test]
    fn missing_question_group() {
        let json = r#"{"data":{"data":{"published":{"date":1},"pageGroups":[{"templateId":"quiz-result","pages":[]}]}}}"#;
        assert!(matches!(decode(json), Err(Error::Decode(_))));
    }
}
