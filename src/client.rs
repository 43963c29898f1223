//! The [`Zentao`] client: one entry point over sessions, listings, search,
//! images and bulk transitions.
//!
//! # Examples
//!
//! ```rust,no_run
//! use zentao::prelude::*;
//!
//! # async fn example() -> zentao::Result<()> {
//! let config = ClientConfig::builder()
//!     .base_url("https://pm.example.com/zentao")
//!     .account("alice")
//!     .password("secret")
//!     .build()?;
//! let client = Zentao::new(config)?;
//!
//! let request = SearchRequest::builder().keyword("login").limit(10usize).build()?;
//! for hit in client.search::<Bug>(3, &FilterSelector::All, &request).await? {
//!     println!("{:>6.1}  #{} {}", hit.score, hit.entity.id, hit.entity.title);
//! }
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::config::ClientConfig;
use crate::download::{DownloadResult, FetchMode, ImageFetcher};
use crate::error::{Error, Result};
use crate::net::endpoint::{self, Endpoint};
use crate::net::{HttpClient, Transport, html, json};
use crate::pagination::PaginatedFetcher;
use crate::search::{DetailSource, ScoredEntity, SearchEngine, SearchRequest};
use crate::session::SessionManager;
use crate::types::{Bug, Entity, EntityKind, FilterSelector, Product, Story, Task, TestCase};

/// Backend client.
///
/// Cheap to share behind an `Arc`; every component inside holds the same
/// [`SessionManager`].
#[derive(Debug)]
pub struct Zentao {
    sessions: Arc<SessionManager>,
    pager: PaginatedFetcher,
    engine: SearchEngine,
    images: ImageFetcher,
}

impl Zentao {
    /// Creates a client over HTTP. No request is made until the first call.
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] if `config` is invalid.
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let http = HttpClient::new("zentao")
            .with_rate_limit(config.min_request_interval_ms)
            .with_max_retries(config.max_transport_retries)
            .with_timeout(config.request_timeout())
            .with_header("Accept", "application/json, text/html;q=0.9, */*;q=0.8");
        Self::with_transport(config, Arc::new(http))
    }

    /// Creates a client over a caller-supplied transport.
    pub fn with_transport(config: ClientConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        let sessions = Arc::new(SessionManager::new(&config, transport)?);
        Ok(Self {
            pager: PaginatedFetcher::new(Arc::clone(&sessions), config.page_size, config.max_pages),
            engine: SearchEngine::new(config.deep_search_candidates, config.deep_search_threshold),
            images: ImageFetcher::new(
                Arc::clone(&sessions),
                config.image_timeout(),
                config.image_concurrency,
            ),
            sessions,
        })
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn pager(&self) -> &PaginatedFetcher {
        &self.pager
    }

    /// Every product visible to the account.
    pub async fn products(&self) -> Result<Vec<Product>> {
        let payload = self.sessions.request(&endpoint::PRODUCT_ALL.path(&[])?).await?;
        decode_products(&payload)
    }

    pub async fn stories(&self, product_id: u64, selector: &FilterSelector) -> Result<Vec<Story>> {
        self.pager.fetch_all(product_id, selector).await
    }

    pub async fn bugs(&self, product_id: u64, selector: &FilterSelector) -> Result<Vec<Bug>> {
        self.pager.fetch_all(product_id, selector).await
    }

    pub async fn tasks(&self, execution_id: u64, selector: &FilterSelector) -> Result<Vec<Task>> {
        self.pager.fetch_all(execution_id, selector).await
    }

    pub async fn test_cases(
        &self,
        product_id: u64,
        selector: &FilterSelector,
    ) -> Result<Vec<TestCase>> {
        self.pager.fetch_all(product_id, selector).await
    }

    /// Records of one scope matching an optional module and status, for the
    /// combination the backend cannot filter on its own.
    pub async fn list_matching<T: Entity>(
        &self,
        scope_id: u64,
        module_id: Option<u64>,
        status: Option<&str>,
    ) -> Result<Vec<T>> {
        self.pager.fetch_all_matching(scope_id, module_id, status).await
    }

    /// The full record of one entity, including its body.
    ///
    /// # Errors
    ///
    /// [`Error::UpstreamData`] if the payload has no record for `id`.
    pub async fn detail<T: Entity>(&self, id: u64) -> Result<T> {
        let path = T::KIND.view_endpoint().path_for_id(id)?;
        let payload = self.sessions.request(&path).await?;
        json::extract_as(&payload, T::KIND.detail_key())
    }

    /// Aggregates one listing and ranks it for `request`. With
    /// `request.deep`, weak matches are refined from their detail records.
    pub async fn search<T: Entity>(
        &self,
        scope_id: u64,
        selector: &FilterSelector,
        request: &SearchRequest,
    ) -> Result<Vec<ScoredEntity<T>>> {
        let entities = self.pager.fetch_all::<T>(scope_id, selector).await?;
        let results = if request.deep {
            self.engine.search_deep(entities, request, self).await
        } else {
            self.engine.search(entities, request)
        };
        tracing::debug!(kind = %T::KIND, hits = results.len(), deep = request.deep, "search finished");
        Ok(results)
    }

    /// Absolute URLs of the images embedded in `entity`'s body.
    pub fn image_urls<T: Entity>(&self, entity: &T) -> Vec<String> {
        entity
            .body()
            .map(|body| html::extract_image_urls(&body, self.sessions.base_url()))
            .unwrap_or_default()
    }

    /// Downloads `urls` after removing duplicates. One result per distinct
    /// URL, in first-seen order.
    pub async fn fetch_images(&self, urls: &[String], mode: FetchMode) -> Vec<DownloadResult> {
        let urls = html::unique_urls(urls.iter().cloned());
        self.images.fetch_all(&urls, mode).await
    }

    /// Applies `transition` to every id in turn. Failures are recorded per
    /// item and never stop the batch.
    pub async fn bulk_transition(&self, transition: &Transition, ids: &[u64]) -> BatchReport {
        let form = transition.form();
        let mut outcomes = Vec::with_capacity(ids.len());

        for &id in ids {
            let result = match transition.endpoint().path_for_id(id) {
                Ok(path) => self.sessions.request_form(&path, &form).await.map(|_| ()),
                Err(e) => Err(e),
            };
            if let Err(error) = &result {
                tracing::warn!(id, %transition, %error, "transition failed");
            }
            outcomes.push(ItemOutcome {
                id,
                result: result.map_err(|e| e.to_string()),
            });
        }

        let report = BatchReport { outcomes };
        tracing::info!(
            %transition,
            total = report.len(),
            failed = report.failed().count(),
            "bulk transition finished"
        );
        report
    }
}

#[async_trait]
impl DetailSource for Zentao {
    async fn detail<T: Entity>(&self, id: u64) -> Result<T> {
        Zentao::detail::<T>(self, id).await
    }
}

fn decode_products(payload: &Value) -> Result<Vec<Product>> {
    match payload.get("products") {
        // `{"1": "Web", "2": "Mobile"}`: id to name
        Some(Value::Object(map)) if map.values().all(Value::is_string) => Ok(map
            .iter()
            .filter_map(|(id, name)| {
                Some(Product {
                    id: id.parse().ok()?,
                    name: name.as_str()?.to_string(),
                    code: None,
                    status: None,
                })
            })
            .collect()),
        _ => json::extract_records(payload, "products")?
            .into_iter()
            .map(|raw| {
                serde_json::from_value(raw)
                    .map_err(|e| Error::upstream(format!("malformed product record: {}", e)))
            })
            .collect(),
    }
}

/// A single state change applied by [`Zentao::bulk_transition`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Resolve a bug, e.g. with resolution `fixed`.
    ResolveBug { resolution: String },
    CloseBug,
    /// Close a story, e.g. with reason `done`.
    CloseStory { reason: String },
    CloseTask,
}

impl Transition {
    pub fn kind(&self) -> EntityKind {
        match self {
            Transition::ResolveBug { .. } | Transition::CloseBug => EntityKind::Bug,
            Transition::CloseStory { .. } => EntityKind::Story,
            Transition::CloseTask => EntityKind::Task,
        }
    }

    fn endpoint(&self) -> &'static Endpoint {
        match self {
            Transition::ResolveBug { .. } => &endpoint::BUG_RESOLVE,
            Transition::CloseBug => &endpoint::BUG_CLOSE,
            Transition::CloseStory { .. } => &endpoint::STORY_CLOSE,
            Transition::CloseTask => &endpoint::TASK_CLOSE,
        }
    }

    fn form(&self) -> Vec<(String, String)> {
        let mut form = match self {
            Transition::ResolveBug { resolution } => vec![
                ("resolution".to_string(), resolution.clone()),
                ("resolvedBuild".to_string(), "trunk".to_string()),
            ],
            Transition::CloseStory { reason } => {
                vec![("closedReason".to_string(), reason.clone())]
            }
            Transition::CloseBug | Transition::CloseTask => Vec::new(),
        };
        form.push(("comment".to_string(), String::new()));
        form
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let endpoint = self.endpoint();
        write!(f, "{}-{}", endpoint.resource, endpoint.verb)
    }
}

/// Outcome of one item in a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemOutcome {
    pub id: u64,
    /// The error message on failure.
    pub result: std::result::Result<(), String>,
}

impl ItemOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Per-item outcomes of a batch operation, in input order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub outcomes: Vec<ItemOutcome>,
}

impl BatchReport {
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn succeeded(&self) -> impl Iterator<Item = &ItemOutcome> {
        self.outcomes.iter().filter(|o| o.is_success())
    }

    pub fn failed(&self) -> impl Iterator<Item = &ItemOutcome> {
        self.outcomes.iter().filter(|o| !o.is_success())
    }

    pub fn is_complete_success(&self) -> bool {
        self.outcomes.iter().all(ItemOutcome::is_success)
    }

    /// Ids of the succeeded items, or [`Error::PartialBatch`] if any failed.
    ///
    /// ```rust
    /// use zentao::client::{BatchReport, ItemOutcome};
    /// use zentao::Error;
    ///
    /// let report = BatchReport {
    ///     outcomes: vec![
    ///         ItemOutcome { id: 1, result: Ok(()) },
    ///         ItemOutcome { id: 2, result: Err("no privilege".into()) },
    ///     ],
    /// };
    /// assert!(matches!(report.into_result(), Err(Error::PartialBatch { failed: 1, total: 2 })));
    /// ```
    pub fn into_result(self) -> Result<Vec<u64>> {
        let failed = self.failed().count();
        if failed > 0 {
            return Err(Error::partial_batch(failed, self.len()));
        }
        Ok(self.outcomes.into_iter().map(|o| o.id).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_products_from_name_map() {
        let payload = json!({"products": {"1": "Web", "2": "Mobile"}});
        let products = decode_products(&payload).unwrap();
        assert_eq!(products.len(), 2);
        assert_eq!(products[0].id, 1);
        assert_eq!(products[1].name, "Mobile");
    }

    #[test]
    fn test_products_from_records() {
        let payload = json!({"products": [{"id": "4", "name": "API", "code": "api", "status": "normal"}]});
        let products = decode_products(&payload).unwrap();
        assert_eq!(products[0].id, 4);
        assert_eq!(products[0].code.as_deref(), Some("api"));
        assert!(decode_products(&json!({})).unwrap().is_empty());
    }

    #[test]
    fn test_transition_forms() {
        let resolve = Transition::ResolveBug {
            resolution: "fixed".into(),
        };
        assert_eq!(resolve.kind(), EntityKind::Bug);
        assert_eq!(resolve.to_string(), "bug-resolve");
        assert!(resolve.form().contains(&("resolution".to_string(), "fixed".to_string())));
        assert_eq!(Transition::CloseTask.to_string(), "task-close");
        assert_eq!(Transition::CloseBug.form().len(), 1);
    }

    #[test]
    fn test_batch_report() {
        let report = BatchReport {
            outcomes: vec![
                ItemOutcome { id: 1, result: Ok(()) },
                ItemOutcome { id: 2, result: Ok(()) },
            ],
        };
        assert!(report.is_complete_success());
        assert_eq!(report.into_result().unwrap(), vec![1, 2]);
    }
}
