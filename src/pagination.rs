//! Multi-page listing aggregation.
//!
//! Listing endpoints accept exactly one filter selector per request (all, one
//! status, or one module) and return records a page at a time with a pager
//! descriptor. [`PaginatedFetcher`] walks the pages strictly in order and
//! concatenates them. Filter combinations the backend cannot express are
//! aggregated by module and narrowed locally.
//!
//! # Examples
//!
//! ```rust,no_run
//! use zentao::prelude::*;
//!
//! # async fn example(client: Zentao) -> zentao::Result<()> {
//! // Active bugs of module 12 in product 3: one module listing, filtered locally.
//! let bugs: Vec<Bug> = client.list_matching(3, Some(12), Some("active")).await?;
//! println!("{} active bugs", bugs.len());
//! # Ok(())
//! # }
//! ```

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::net::json;
use crate::session::SessionManager;
use crate::types::{Entity, EntityKind, FilterSelector, Pager};

/// One decoded listing page.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub records: Vec<T>,
    /// `None` when the payload carried no pager, meaning no further pages.
    pub pager: Option<Pager>,
    /// Module id to name, when the payload includes the module tree.
    pub modules: HashMap<u64, String>,
}

/// Sequential page walker over listing endpoints.
#[derive(Debug, Clone)]
pub struct PaginatedFetcher {
    sessions: Arc<SessionManager>,
    page_size: usize,
    max_pages: usize,
}

impl PaginatedFetcher {
    pub fn new(sessions: Arc<SessionManager>, page_size: usize, max_pages: usize) -> Self {
        Self {
            sessions,
            page_size: page_size.max(1),
            max_pages: max_pages.max(1),
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn max_pages(&self) -> usize {
        self.max_pages
    }

    /// Relative path of one listing page.
    ///
    /// ```rust
    /// use zentao::pagination::PaginatedFetcher;
    /// use zentao::types::{EntityKind, FilterSelector};
    ///
    /// let path = PaginatedFetcher::page_path(EntityKind::Story, 4, &FilterSelector::Status("active".into()), 50, 2).unwrap();
    /// assert_eq!(path, "product-browse-4-0-active-0-id_desc-0-50-2.json");
    /// ```
    pub fn page_path(
        kind: EntityKind,
        scope_id: u64,
        selector: &FilterSelector,
        page_size: usize,
        page: usize,
    ) -> Result<String> {
        let (selector_value, param) = selector.path_args();
        kind.browse_endpoint().path(&[
            (kind.scope_param(), scope_id.to_string()),
            (kind.selector_param(), selector_value),
            ("param", param),
            ("recPerPage", page_size.to_string()),
            ("pageID", page.to_string()),
        ])
    }

    /// Fetches and decodes a single page (1-based).
    ///
    /// # Errors
    ///
    /// Session and transport errors from the request, or
    /// [`Error::UpstreamData`] if a record does not decode.
    pub async fn fetch_page<T: Entity>(
        &self,
        scope_id: u64,
        selector: &FilterSelector,
        page: usize,
    ) -> Result<Page<T>> {
        let path = Self::page_path(T::KIND, scope_id, selector, self.page_size, page)?;
        tracing::debug!(kind = %T::KIND, scope_id, page, "fetching page");
        let payload = self.sessions.request(&path).await?;
        decode_page(T::KIND, &payload)
    }

    /// Every record for one selector, in server order.
    ///
    /// Stops after a page with no records, when no pager is present, once the
    /// pager's page count is reached, or at `max_pages`. Any failed page
    /// aborts the whole aggregation.
    pub async fn fetch_all<T: Entity>(
        &self,
        scope_id: u64,
        selector: &FilterSelector,
    ) -> Result<Vec<T>> {
        let mut records = Vec::new();
        let mut page = 1;

        loop {
            let Page {
                records: batch,
                pager,
                modules,
            } = self.fetch_page::<T>(scope_id, selector, page).await?;

            let received = batch.len();
            records.extend(batch.into_iter().map(|r| attach_module_name(r, &modules)));

            if received == 0 {
                break;
            }
            let Some(pager) = pager else {
                break;
            };
            if page >= pager.total_pages(self.page_size) {
                break;
            }
            if page >= self.max_pages {
                tracing::warn!(
                    kind = %T::KIND,
                    scope_id,
                    max_pages = self.max_pages,
                    rec_total = pager.rec_total,
                    "page cap reached, stopping aggregation"
                );
                break;
            }
            page += 1;
        }

        tracing::info!(
            kind = %T::KIND,
            scope_id,
            records = records.len(),
            pages = page,
            "aggregation complete"
        );
        Ok(records)
    }

    /// Records matching an optional module and an optional status.
    ///
    /// With a module, the module listing is aggregated and the status applied
    /// locally; with only a status, the backend filters.
    pub async fn fetch_all_matching<T: Entity>(
        &self,
        scope_id: u64,
        module_id: Option<u64>,
        status: Option<&str>,
    ) -> Result<Vec<T>> {
        match (module_id, status) {
            (Some(module), status) => {
                let records = self
                    .fetch_all::<T>(scope_id, &FilterSelector::Module(module))
                    .await?;
                Ok(match status {
                    Some(status) => records
                        .into_iter()
                        .filter(|r| r.status() == status)
                        .collect(),
                    None => records,
                })
            }
            (None, Some(status)) => {
                self.fetch_all(scope_id, &FilterSelector::Status(status.to_string()))
                    .await
            }
            (None, None) => self.fetch_all(scope_id, &FilterSelector::All).await,
        }
    }
}

fn decode_page<T: Entity>(kind: EntityKind, payload: &Value) -> Result<Page<T>> {
    let records = json::extract_records(payload, kind.records_key())?
        .into_iter()
        .map(|raw| {
            serde_json::from_value::<T>(raw)
                .map_err(|e| Error::upstream(format!("malformed {} record: {}", kind, e)))
        })
        .collect::<Result<Vec<T>>>()?;

    let pager = match payload.get("pager") {
        Some(raw @ Value::Object(_)) => Some(
            serde_json::from_value::<Pager>(raw.clone())
                .map_err(|e| Error::upstream(format!("malformed pager: {}", e)))?,
        ),
        _ => None,
    };

    Ok(Page {
        records,
        pager,
        modules: module_names(payload),
    })
}

fn module_names(payload: &Value) -> HashMap<u64, String> {
    payload
        .get("modules")
        .and_then(Value::as_object)
        .map(|map| {
            map.iter()
                .filter_map(|(id, name)| {
                    let id = id.parse::<u64>().ok().filter(|id| *id != 0)?;
                    let name = name.as_str()?.trim_start_matches('/');
                    (!name.is_empty()).then(|| (id, name.to_string()))
                })
                .collect()
        })
        .unwrap_or_default()
}

fn attach_module_name<T: Entity>(record: T, modules: &HashMap<u64, String>) -> T {
    if record.module_name().is_some() {
        return record;
    }
    match record.module_id().and_then(|id| modules.get(&id)) {
        Some(name) => {
            let name = name.clone();
            record.with_module_name(name)
        }
        None => record,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Bug, Task};
    use serde_json::json;

    #[test]
    fn test_page_paths_per_kind() {
        let path =
            PaginatedFetcher::page_path(EntityKind::Bug, 1, &FilterSelector::Module(9), 100, 1)
                .unwrap();
        assert_eq!(path, "bug-browse-1-0-bymodule-9-id_desc-0-100-1.json");

        let path =
            PaginatedFetcher::page_path(EntityKind::Task, 7, &FilterSelector::All, 20, 3).unwrap();
        assert_eq!(path, "execution-task-7-all-0-id_desc-0-20-3.json");
    }

    #[test]
    fn test_decode_page_with_object_records_and_modules() {
        let payload = json!({
            "bugs": {
                "5": {"id": "5", "title": "b5", "status": "active", "module": "12"},
                "3": {"id": "3", "title": "b3", "status": "closed", "module": "0"}
            },
            "pager": {"recTotal": "2", "recPerPage": "100", "pageID": "1"},
            "modules": {"0": "/", "12": "/Login"}
        });
        let page: Page<Bug> = decode_page(EntityKind::Bug, &payload).unwrap();
        assert_eq!(page.records.iter().map(|b| b.id).collect::<Vec<_>>(), vec![5, 3]);
        assert_eq!(page.pager.unwrap().rec_total, 2);
        assert_eq!(page.modules.get(&12).map(String::as_str), Some("Login"));
        assert_eq!(page.modules.len(), 1);

        let named = attach_module_name(page.records[0].clone(), &page.modules);
        assert_eq!(named.module_name(), Some("Login"));
        let unnamed = attach_module_name(page.records[1].clone(), &page.modules);
        assert_eq!(unnamed.module_name(), None);
    }

    #[test]
    fn test_decode_page_without_pager() {
        let payload = json!({"tasks": [{"id": 1, "name": "t", "status": "wait"}]});
        let page: Page<Task> = decode_page(EntityKind::Task, &payload).unwrap();
        assert_eq!(page.records.len(), 1);
        assert!(page.pager.is_none());
    }

    #[test]
    fn test_malformed_record_is_upstream_error() {
        let payload = json!({"bugs": [{"id": "x", "title": "t", "status": "active"}]});
        let err = decode_page::<Bug>(EntityKind::Bug, &payload).unwrap_err();
        assert!(matches!(err, Error::UpstreamData(_)));
    }
}
