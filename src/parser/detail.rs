use regex::Regex;

use crate::error::{Error, Result};

/// Find the content identifier in a quiz detail page, i.e. the digits in the
/// first `https://<content_host>/a/<digits>` link or embed.
pub fn content_id(page: &[u8], content_host: &str) -> Result<i64> {
    let pattern = format!(r"https://{}/a/(\d+)", regex::escape(content_host));
    let re = Regex::new(&pattern).map_err(|e| Error::parse(e.to_string()))?;
    let html = String::from_utf8_lossy(page);

    let digits = re
        .captures(&html)
        .and_then(|c| c.get(1))
        .ok_or_else(|| Error::parse(format!("no {} embed on detail page", content_host)))?;
    digits
        .as_str()
        .parse()
        .map_err(|_| Error::parse(format!("content id {} out of range", digits.as_str())))
}
