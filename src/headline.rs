//! Headline normalisation and selection.
//!
//! A headline is uppercased and stripped of its trailing attribution
//! (`" - REUTERS"`, `": LIVE UPDATES"`, `"(ANALYSIS)"`) before it is served.
//! The cleaned form is what players guess and what the ledger deduplicates on.

use once_cell::sync::Lazy;
use rand::Rng;
use rand::seq::SliceRandom;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

pub const DEFAULT_MAX_HEADLINE_LEN: usize = 75;
pub const NO_HEADLINE: &str = "NO HEADLINE AVAILABLE";
pub const NO_SUMMARY: &str = "No summary available.";
pub const UNKNOWN_SOURCE: &str = "Unknown Source";

static TRAILING_SUFFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\s*[-:]\s*[\w\s]+|\s*\(.*\))$").expect("valid trailing suffix pattern")
});

/// Uppercases `raw` and strips trailing attribution until nothing more matches.
pub fn clean(raw: &str) -> String {
    let mut current = raw.to_uppercase().trim().to_string();
    loop {
        let stripped = TRAILING_SUFFIX.replace(&current, "");
        let next = stripped.trim_end();
        if next.len() == current.len() {
            return current;
        }
        current = next.to_string();
    }
}

/// Length gate applied to cleaned titles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeadlineFilter {
    pub max_len: Option<usize>,
}

impl Default for HeadlineFilter {
    fn default() -> Self {
        Self {
            max_len: Some(DEFAULT_MAX_HEADLINE_LEN),
        }
    }
}

impl HeadlineFilter {
    pub fn unlimited() -> Self {
        Self { max_len: None }
    }

    pub fn accepts(&self, cleaned: &str) -> bool {
        if cleaned.is_empty() {
            return false;
        }
        match self.max_len {
            Some(max) => cleaned.chars().count() <= max,
            None => true,
        }
    }
}

/// Article as delivered by the upstream news API.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawArticle {
    #[serde(default)]
    pub source: Option<ArticleSource>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub url_to_image: Option<String>,
    #[serde(default)]
    pub published_at: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArticleSource {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

impl RawArticle {
    pub fn new(title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            url: Some(url.into()),
            ..Self::default()
        }
    }

    fn is_playable(&self) -> bool {
        non_blank(self.title.as_deref()).is_some() && non_blank(self.url.as_deref()).is_some()
    }
}

/// Headline payload handed to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectedArticle {
    pub headline: String,
    pub description: String,
    pub url: String,
    pub url_to_image: String,
    pub source_name: String,
    pub published_at: String,
}

impl SelectedArticle {
    /// Served when the upstream source has no articles at all.
    pub fn unavailable() -> Self {
        Self {
            headline: NO_HEADLINE.to_string(),
            description: String::new(),
            url: "#".to_string(),
            url_to_image: String::new(),
            source_name: UNKNOWN_SOURCE.to_string(),
            published_at: String::new(),
        }
    }

    pub fn is_unavailable(&self) -> bool {
        self.headline == NO_HEADLINE && self.url == "#"
    }

    fn from_raw(article: &RawArticle, headline: String) -> Self {
        Self {
            headline,
            description: non_blank(article.description.as_deref())
                .unwrap_or(NO_SUMMARY)
                .to_string(),
            url: article.url.clone().unwrap_or_default(),
            url_to_image: article.url_to_image.clone().unwrap_or_default(),
            source_name: article
                .source
                .as_ref()
                .and_then(|source| non_blank(source.name.as_deref()))
                .unwrap_or(UNKNOWN_SOURCE)
                .to_string(),
            published_at: article.published_at.clone().unwrap_or_default(),
        }
    }
}

/// Picks a random playable article whose cleaned title is not in `excluded`.
///
/// With `allow_fallback`, an exhausted pool is retried without the exclusion
/// set; the length gate always applies.
pub fn select<R: Rng + ?Sized>(
    candidates: &[RawArticle],
    excluded: &HashSet<String>,
    filter: &HeadlineFilter,
    allow_fallback: bool,
    rng: &mut R,
) -> Option<SelectedArticle> {
    let playable: Vec<(&RawArticle, String)> = candidates
        .iter()
        .filter(|article| article.is_playable())
        .map(|article| (article, clean(article.title.as_deref().unwrap_or_default())))
        .filter(|(_, cleaned)| filter.accepts(cleaned))
        .collect();

    let unseen: Vec<&(&RawArticle, String)> = playable
        .iter()
        .filter(|(_, cleaned)| !excluded.contains(cleaned))
        .collect();

    let chosen = match unseen.choose(rng) {
        Some(pick) => Some(*pick),
        None if allow_fallback => playable.choose(rng),
        None => None,
    };

    chosen.map(|(article, cleaned)| SelectedArticle::from_raw(article, cleaned.clone()))
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
