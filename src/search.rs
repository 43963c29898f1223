//! Client-side relevance search over aggregated entities.
//!
//! The backend has no usable search endpoint, so listings are aggregated and
//! ranked locally. A keyword is split into tokens (runs of ASCII letters,
//! digits and hyphens, plus every CJK ideograph on its own) and each entity
//! is scored against its title, its body text and its module or product
//! name.
//!
//! # Scoring
//!
//! | Part | Rule | Points |
//! |---|---|---|
//! | Title | exact match | 100 |
//! | | keyword is a substring, or every token appears | 80 |
//! | | some tokens appear | 60 × matched / total |
//! | Body | keyword is a substring, or every token appears | 40 |
//! | | some tokens appear | 20 × matched / total |
//! | Module / product | keyword is a substring, or every token appears | 10 |
//! | | some tokens appear | 10 × matched / total |
//!
//! Totals are capped at [`MAX_SCORE`]. Entities scoring 0 are dropped, the
//! rest sort by score, then by descending id.
//!
//! # Examples
//!
//! ```rust
//! use zentao::search::{SearchEngine, SearchRequest};
//! use zentao::types::Bug;
//!
//! let bugs: Vec<Bug> = serde_json::from_str(r#"[
//!     {"id": 1, "title": "Login page crashes", "status": "active"},
//!     {"id": 2, "title": "Export is slow", "status": "active"},
//!     {"id": 3, "title": "login", "status": "closed"}
//! ]"#).unwrap();
//!
//! let request = SearchRequest::builder().keyword("login").build().unwrap();
//! let results = SearchEngine::default().search(bugs, &request);
//!
//! assert_eq!(results.len(), 2);
//! assert_eq!(results[0].entity.id, 3);
//! assert_eq!(results[0].score, 100.0);
//! assert_eq!(results[1].score, 80.0);
//! ```

use async_trait::async_trait;
use chrono::NaiveDate;
use derive_builder::Builder;
use futures::future::join_all;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{Error, Result};
use crate::net::html;
use crate::types::Entity;

/// Upper bound of any score.
pub const MAX_SCORE: f64 = 130.0;

const TITLE_EXACT: f64 = 100.0;
const TITLE_SUBSTRING: f64 = 80.0;
const TITLE_PARTIAL: f64 = 60.0;
const BODY_SUBSTRING: f64 = 40.0;
const BODY_PARTIAL: f64 = 20.0;
const AUX_BONUS: f64 = 10.0;

static TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[a-z0-9-]+|\p{Han}").expect("valid token pattern"));

/// Splits a keyword into tokens. ASCII letters are case-folded.
///
/// Never returns an empty vector: a keyword without any token characters
/// becomes its own single (lower-cased) token.
///
/// ```rust
/// use zentao::search::tokenize;
///
/// assert_eq!(tokenize("大R促活"), vec!["大", "r", "促", "活"]);
/// assert_eq!(tokenize("SSO-login v2"), vec!["sso-login", "v2"]);
/// assert_eq!(tokenize("!!"), vec!["!!"]);
/// ```
pub fn tokenize(keyword: &str) -> Vec<String> {
    let folded = keyword.to_ascii_lowercase();
    let tokens: Vec<String> = TOKEN
        .find_iter(&folded)
        .map(|m| m.as_str().to_string())
        .collect();

    if tokens.is_empty() {
        vec![keyword.to_lowercase()]
    } else {
        tokens
    }
}

/// Per-part points behind a score.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ScoreBreakdown {
    pub title: f64,
    pub body: f64,
    pub aux: f64,
}

impl ScoreBreakdown {
    pub fn total(&self) -> f64 {
        (self.title + self.body + self.aux).clamp(0.0, MAX_SCORE)
    }
}

/// How a lower-cased text relates to the keyword.
enum Match {
    Substring,
    Partial(f64),
    None,
}

fn match_text(text: &str, keyword: &str, tokens: &[String]) -> Match {
    if text.is_empty() || tokens.is_empty() {
        return Match::None;
    }
    if !keyword.is_empty() && text.contains(keyword) {
        return Match::Substring;
    }
    let matched = tokens.iter().filter(|t| text.contains(t.as_str())).count();
    if matched == tokens.len() {
        Match::Substring
    } else if matched > 0 {
        Match::Partial(matched as f64 / tokens.len() as f64)
    } else {
        Match::None
    }
}

/// Scores `entity` part by part. `tokens` should come from
/// [`tokenize`]`(keyword)`.
pub fn score_breakdown<T: Entity>(entity: &T, keyword: &str, tokens: &[String]) -> ScoreBreakdown {
    let keyword = keyword.trim().to_lowercase();
    let title = entity.title().trim().to_lowercase();

    let title_points = if !title.is_empty() && title == keyword {
        TITLE_EXACT
    } else {
        match match_text(&title, &keyword, tokens) {
            Match::Substring => TITLE_SUBSTRING,
            Match::Partial(ratio) => TITLE_PARTIAL * ratio,
            Match::None => 0.0,
        }
    };

    let body = entity
        .body()
        .map(|b| html::plain_text(&b).to_lowercase())
        .unwrap_or_default();
    let body_points = match match_text(&body, &keyword, tokens) {
        Match::Substring => BODY_SUBSTRING,
        Match::Partial(ratio) => BODY_PARTIAL * ratio,
        Match::None => 0.0,
    };

    let aux_points = [entity.module_name(), entity.product_name()]
        .into_iter()
        .flatten()
        .map(|name| match match_text(&name.to_lowercase(), &keyword, tokens) {
            Match::Substring => AUX_BONUS,
            Match::Partial(ratio) => AUX_BONUS * ratio,
            Match::None => 0.0,
        })
        .fold(0.0, f64::max);

    ScoreBreakdown {
        title: title_points,
        body: body_points,
        aux: aux_points,
    }
}

/// Total relevance of `entity` for `keyword`, in `0.0..=MAX_SCORE`.
///
/// ```rust
/// use zentao::search::{score, tokenize};
/// use zentao::types::Story;
///
/// let story: Story = serde_json::from_str(
///     r#"{"id": 8, "title": "大R用户促活方案", "status": "active"}"#,
/// ).unwrap();
/// assert_eq!(score(&story, "大R促活", &tokenize("大R促活")), 80.0);
/// ```
pub fn score<T: Entity>(entity: &T, keyword: &str, tokens: &[String]) -> f64 {
    score_breakdown(entity, keyword, tokens).total()
}

/// An entity with its relevance score.
#[derive(Debug, Clone)]
pub struct ScoredEntity<T> {
    pub entity: T,
    pub score: f64,
}

/// Sorts by descending score, then descending id, and keeps `limit` items.
pub fn rank<T: Entity>(mut scored: Vec<ScoredEntity<T>>, limit: usize) -> Vec<ScoredEntity<T>> {
    scored.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| b.entity.id().cmp(&a.entity.id()))
    });
    scored.truncate(limit);
    scored
}

/// Inclusive creation-date bounds. An empty range accepts everything; any
/// bound rejects entities without a parseable date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DateRange {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl DateRange {
    pub fn new(from: Option<NaiveDate>, to: Option<NaiveDate>) -> Self {
        Self { from, to }
    }

    pub fn is_unbounded(&self) -> bool {
        self.from.is_none() && self.to.is_none()
    }

    pub fn contains<T: Entity>(&self, entity: &T) -> bool {
        self.contains_date(entity.opened_on())
    }

    pub fn contains_date(&self, date: Option<NaiveDate>) -> bool {
        if self.is_unbounded() {
            return true;
        }
        let Some(date) = date else {
            return false;
        };
        self.from.is_none_or(|from| date >= from) && self.to.is_none_or(|to| date <= to)
    }
}

/// Parameters of one search.
///
/// ```rust
/// use zentao::search::SearchRequest;
///
/// let request = SearchRequest::builder()
///     .keyword("crash")
///     .limit(5usize)
///     .deep(true)
///     .build()
///     .unwrap();
/// assert_eq!(request.limit, 5);
/// assert!(request.date_range.is_unbounded());
/// ```
#[derive(Debug, Clone, Builder)]
#[builder(setter(into))]
pub struct SearchRequest {
    pub keyword: String,

    #[builder(default = "20")]
    pub limit: usize,

    #[builder(default)]
    pub date_range: DateRange,

    /// Refine weak matches with detail fetches.
    #[builder(default)]
    pub deep: bool,
}

impl SearchRequest {
    pub fn builder() -> SearchRequestBuilder {
        SearchRequestBuilder::default()
    }
}

impl From<SearchRequestBuilderError> for Error {
    fn from(e: SearchRequestBuilderError) -> Self {
        Error::config(e.to_string())
    }
}

/// Fetches a single record with its full body.
#[async_trait]
pub trait DetailSource: Send + Sync {
    async fn detail<T: Entity>(&self, id: u64) -> Result<T>;
}

/// Scores, filters and ranks entities; optionally refines weak matches.
#[derive(Debug, Clone, Copy)]
pub struct SearchEngine {
    deep_candidates: usize,
    deep_threshold: f64,
}

impl Default for SearchEngine {
    fn default() -> Self {
        Self::new(10, 50.0)
    }
}

impl SearchEngine {
    pub fn new(deep_candidates: usize, deep_threshold: f64) -> Self {
        Self {
            deep_candidates,
            deep_threshold,
        }
    }

    fn score_all<T: Entity>(
        &self,
        entities: Vec<T>,
        request: &SearchRequest,
    ) -> Vec<(ScoredEntity<T>, ScoreBreakdown)> {
        let tokens = tokenize(&request.keyword);
        entities
            .into_iter()
            .filter(|e| request.date_range.contains(e))
            .filter_map(|entity| {
                let breakdown = score_breakdown(&entity, &request.keyword, &tokens);
                let score = breakdown.total();
                (score > 0.0).then_some((ScoredEntity { entity, score }, breakdown))
            })
            .collect()
    }

    /// Ranks `entities` for `request` from the data at hand.
    pub fn search<T: Entity>(&self, entities: Vec<T>, request: &SearchRequest) -> Vec<ScoredEntity<T>> {
        let scored = self
            .score_all(entities, request)
            .into_iter()
            .map(|(scored, _)| scored)
            .collect();
        rank(scored, request.limit)
    }

    /// Like [`search`](Self::search), but matches whose title hit and whose
    /// listing body did not, scoring under the threshold, are re-scored from
    /// their detail record. Only the strongest such candidates are fetched,
    /// and a new score is kept only if it is higher. A failed fetch keeps the
    /// original score.
    pub async fn search_deep<T, D>(
        &self,
        entities: Vec<T>,
        request: &SearchRequest,
        source: &D,
    ) -> Vec<ScoredEntity<T>>
    where
        T: Entity,
        D: DetailSource,
    {
        let tokens = tokenize(&request.keyword);
        let mut scored = self.score_all(entities, request);
        scored.sort_by(|(a, _), (b, _)| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| b.entity.id().cmp(&a.entity.id()))
        });

        let candidates: Vec<usize> = scored
            .iter()
            .enumerate()
            .filter(|(_, (s, parts))| {
                parts.title > 0.0 && parts.body == 0.0 && s.score < self.deep_threshold
            })
            .map(|(index, _)| index)
            .take(self.deep_candidates)
            .collect();

        if !candidates.is_empty() {
            let fetches = candidates.iter().map(|&index| {
                let id = scored[index].0.entity.id();
                async move {
                    let fetched: Result<T> = source.detail(id).await;
                    (index, fetched)
                }
            });
            let refreshed = join_all(fetches).await;

            for (index, fetched) in refreshed {
                match fetched {
                    Ok(detailed) => {
                        let rescored = score(&detailed, &request.keyword, &tokens);
                        let current = &mut scored[index].0;
                        if rescored > current.score {
                            current.score = rescored;
                            current.entity = detailed;
                        }
                    }
                    Err(error) => {
                        tracing::warn!(
                            kind = %T::KIND,
                            id = scored[index].0.entity.id(),
                            %error,
                            "detail fetch failed, keeping listing score"
                        );
                    }
                }
            }
            tracing::debug!(candidates = candidates.len(), "deep search refined");
        }

        rank(
            scored.into_iter().map(|(s, _)| s).collect(),
            request.limit,
        )
    }
}

/// Post-processing helpers for ranked results.
pub trait ScoredResultsExt<T> {
    /// Keeps results scoring at least `min`.
    fn min_score(self, min: f64) -> Self;

    fn ids(&self) -> Vec<u64>;

    fn into_entities(self) -> Vec<T>;
}

impl<T: Entity> ScoredResultsExt<T> for Vec<ScoredEntity<T>> {
    fn min_score(mut self, min: f64) -> Self {
        self.retain(|s| s.score >= min);
        self
    }

    fn ids(&self) -> Vec<u64> {
        self.iter().map(|s| s.entity.id()).collect()
    }

    fn into_entities(self) -> Vec<T> {
        self.into_iter().map(|s| s.entity).collect()
    }
}
