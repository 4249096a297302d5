use scraper::{Html, Selector};

use crate::error::{Error, Result};

/// One quiz link found on the listing page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingEntry {
    pub name: String,
    /// Site-relative link, e.g. `/national/quizzes/300123456/morning-quiz`.
    pub link: String,
}

/// Extract quiz links from the listing page, in page order.
///
/// The first matching link is the section header and is dropped, as are links
/// with no visible text (image teasers that repeat a headline link).
pub fn parse(html: &str, listing_path: &str) -> Result<Vec<ListingEntry>> {
    let pattern = format!("a[href*='{}/']", listing_path.trim_matches('/'));
    let selector =
        Selector::parse(&pattern).map_err(|_| Error::parse(format!("bad link selector {}", pattern)))?;

    let document = Html::parse_document(html);
    let entries = document
        .select(&selector)
        .skip(1)
        .filter_map(|a| {
            let href = a.value().attr("href")?;
            let name = a.text().collect::<String>().trim().to_string();
            if name.is_empty() {
                return None;
            }
            Some(ListingEntry { name, link: relative_link(href) })
        })
        .collect();
    Ok(entries)
}

/// Drop scheme and host from an absolute link; relative links pass through.
fn relative_link(href: &str) -> String {
    match href.split_once("//") {
        Some((scheme, rest)) if scheme.is_empty() || scheme.ends_with(':') => match rest.find('/') {
            Some(i) => rest[i..].to_string(),
            None => "/".to_string(),
        },
        _ => href.to_string(),
    }
}

/// Listing identifier: the 4th `/`-separated segment of the link
/// (`/national/quizzes/<id>/<slug>`).
pub fn listing_id(link: &str) -> Result<i64> {
    let segment = link
        .split('/')
        .nth(3)
        .ok_or_else(|| Error::parse(format!("no listing id segment in {}", link)))?;
    segment
        .parse()
        .map_err(|_| Error::parse(format!("listing id {:?} in {} is not numeric", segment, link)))
}
