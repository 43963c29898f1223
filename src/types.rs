//! Core data types for backend entities, pagers and filter selectors.
//!
//! This module defines the records returned by the backend:
//!
//! - [`Story`] - a requirement
//! - [`Bug`] - a defect
//! - [`Task`] - a unit of execution work
//! - [`TestCase`] - a test case
//! - [`Product`] - the container stories, bugs and cases belong to
//!
//! Every entity implements [`Entity`], which is what the pager, the search
//! engine and the image pipeline work against. Entities are value snapshots:
//! each fetch returns fresh records and nothing mutates one once returned.
//!
//! The backend is loose about JSON types: ids and ordinals arrive as numbers
//! or numeric strings, empty strings stand in for null, and `"0"` means "no
//! module". The deserializers here accept all of those.
//!
//! # Examples
//!
//! ```rust
//! use zentao::types::{Bug, BugStatus, Entity};
//!
//! let bug: Bug = serde_json::from_str(
//!     r#"{"id":"42","product":"1","module":"0","title":"Crash on save",
//!         "severity":"2","pri":3,"status":"active",
//!         "openedDate":"2024-03-01 09:30:00"}"#,
//! ).unwrap();
//!
//! assert_eq!(bug.id(), 42);
//! assert_eq!(bug.status, BugStatus::Active);
//! assert_eq!(bug.module_id(), None);
//! assert_eq!(bug.opened_on().unwrap().to_string(), "2024-03-01");
//! ```

use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::borrow::Cow;
use std::fmt;

use crate::net::endpoint::{self, Endpoint};

/// The four entity families the backend lists and searches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Story,
    Bug,
    Task,
    TestCase,
}

impl EntityKind {
    /// Paginated listing endpoint for this kind.
    pub fn browse_endpoint(self) -> &'static Endpoint {
        match self {
            EntityKind::Story => &endpoint::STORY_BROWSE,
            EntityKind::Bug => &endpoint::BUG_BROWSE,
            EntityKind::Task => &endpoint::TASK_BROWSE,
            EntityKind::TestCase => &endpoint::CASE_BROWSE,
        }
    }

    /// Single-record detail endpoint for this kind.
    pub fn view_endpoint(self) -> &'static Endpoint {
        match self {
            EntityKind::Story => &endpoint::STORY_VIEW,
            EntityKind::Bug => &endpoint::BUG_VIEW,
            EntityKind::Task => &endpoint::TASK_VIEW,
            EntityKind::TestCase => &endpoint::CASE_VIEW,
        }
    }

    /// Key of the record collection inside a listing payload.
    pub fn records_key(self) -> &'static str {
        match self {
            EntityKind::Story => "stories",
            EntityKind::Bug => "bugs",
            EntityKind::Task => "tasks",
            EntityKind::TestCase => "cases",
        }
    }

    /// Key of the record inside a detail payload.
    pub fn detail_key(self) -> &'static str {
        match self {
            EntityKind::Story => "story",
            EntityKind::Bug => "bug",
            EntityKind::Task => "task",
            EntityKind::TestCase => "case",
        }
    }

    /// Name of the scope parameter a listing is keyed by.
    pub fn scope_param(self) -> &'static str {
        match self {
            EntityKind::Task => "executionID",
            _ => "productID",
        }
    }

    /// Name of the server-side selector parameter for this kind's listing.
    pub(crate) fn selector_param(self) -> &'static str {
        match self {
            EntityKind::Task => "status",
            _ => "browseType",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EntityKind::Story => "story",
            EntityKind::Bug => "bug",
            EntityKind::Task => "task",
            EntityKind::TestCase => "testcase",
        })
    }
}

/// Common view over every entity record.
///
/// The pager deserializes records through this trait, the search engine scores
/// them through it and the client extracts image URLs from [`Entity::body`].
pub trait Entity: DeserializeOwned + Clone + Send + Sync + 'static {
    const KIND: EntityKind;

    fn id(&self) -> u64;

    fn title(&self) -> &str;

    /// Status as the backend spells it, e.g. `"active"`.
    fn status(&self) -> &str;

    /// Free-text body (description, repro steps, ...), usually HTML.
    fn body(&self) -> Option<Cow<'_, str>>;

    /// Raw creation timestamp as sent by the backend.
    fn opened_date(&self) -> Option<&str>;

    fn module_id(&self) -> Option<u64>;

    fn module_name(&self) -> Option<&str>;

    fn product_name(&self) -> Option<&str>;

    /// Returns the record with `module_name` filled in. Used while a listing
    /// is assembled, before the record is handed to callers.
    fn with_module_name(self, name: String) -> Self;

    /// Date portion of the creation timestamp, if it parses.
    fn opened_on(&self) -> Option<NaiveDate> {
        self.opened_date().and_then(parse_date)
    }
}

/// Parses the date portion of `YYYY-MM-DD[ HH:MM:SS]`.
///
/// The backend writes `0000-00-00 00:00:00` for unset dates; that and any
/// other unparseable value yields `None`.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let date = raw.trim().get(..10)?;
    NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
}

macro_rules! status_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant,)+
            /// A status this crate does not know by name.
            Other(String),
        }

        impl $name {
            pub fn as_str(&self) -> &str {
                match self {
                    $($name::$variant => $text,)+
                    $name::Other(s) => s,
                }
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                match s {
                    $($text => $name::$variant,)+
                    other => $name::Other(other.to_string()),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let raw = String::deserialize(deserializer)?;
                Ok($name::from(raw.as_str()))
            }
        }
    };
}

status_enum!(
    /// Lifecycle state of a [`Story`].
    StoryStatus {
        Draft => "draft",
        Reviewing => "reviewing",
        Active => "active",
        Changed => "changed",
        Closed => "closed",
    }
);

status_enum!(
    /// Lifecycle state of a [`Bug`].
    BugStatus {
        Active => "active",
        Resolved => "resolved",
        Closed => "closed",
    }
);

status_enum!(
    /// Lifecycle state of a [`Task`].
    TaskStatus {
        Wait => "wait",
        Doing => "doing",
        Done => "done",
        Pause => "pause",
        Cancel => "cancel",
        Closed => "closed",
    }
);

status_enum!(
    /// Review state of a [`TestCase`].
    CaseStatus {
        Wait => "wait",
        Normal => "normal",
        Blocked => "blocked",
        Investigate => "investigate",
    }
);

/// A requirement. List views omit `spec`; the detail view carries it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Story {
    #[serde(deserialize_with = "lenient::u64")]
    pub id: u64,

    #[serde(default, deserialize_with = "lenient::u64")]
    pub product: u64,

    #[serde(default, deserialize_with = "lenient::opt_id")]
    pub module: Option<u64>,

    pub title: String,

    #[serde(default, deserialize_with = "lenient::u8")]
    pub pri: u8,

    pub status: StoryStatus,

    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub stage: Option<String>,

    /// Requirement text (HTML).
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub spec: Option<String>,

    /// Acceptance criteria (HTML).
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub verify: Option<String>,

    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub opened_by: Option<String>,

    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub opened_date: Option<String>,

    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub module_name: Option<String>,

    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub product_name: Option<String>,
}

/// A defect.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bug {
    #[serde(deserialize_with = "lenient::u64")]
    pub id: u64,

    #[serde(default, deserialize_with = "lenient::u64")]
    pub product: u64,

    #[serde(default, deserialize_with = "lenient::opt_id")]
    pub module: Option<u64>,

    pub title: String,

    #[serde(default, deserialize_with = "lenient::u8")]
    pub severity: u8,

    #[serde(default, deserialize_with = "lenient::u8")]
    pub pri: u8,

    pub status: BugStatus,

    /// Reproduction steps (HTML).
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub steps: Option<String>,

    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub resolution: Option<String>,

    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub assigned_to: Option<String>,

    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub opened_date: Option<String>,

    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub module_name: Option<String>,

    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub product_name: Option<String>,
}

/// A unit of work inside an execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    #[serde(deserialize_with = "lenient::u64")]
    pub id: u64,

    #[serde(default, deserialize_with = "lenient::u64")]
    pub execution: u64,

    #[serde(default, deserialize_with = "lenient::opt_id")]
    pub module: Option<u64>,

    pub name: String,

    #[serde(default, deserialize_with = "lenient::u8")]
    pub pri: u8,

    pub status: TaskStatus,

    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub desc: Option<String>,

    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub assigned_to: Option<String>,

    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub opened_date: Option<String>,

    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub module_name: Option<String>,

    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub product_name: Option<String>,
}

/// One step of a [`TestCase`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CaseStep {
    #[serde(default)]
    pub desc: String,
    #[serde(default)]
    pub expect: String,
}

/// A test case. Steps are only present in the detail view.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCase {
    #[serde(deserialize_with = "lenient::u64")]
    pub id: u64,

    #[serde(default, deserialize_with = "lenient::u64")]
    pub product: u64,

    #[serde(default, deserialize_with = "lenient::opt_id")]
    pub module: Option<u64>,

    pub title: String,

    #[serde(default, deserialize_with = "lenient::u8")]
    pub pri: u8,

    pub status: CaseStatus,

    #[serde(rename = "type", default, deserialize_with = "lenient::opt_string")]
    pub case_type: Option<String>,

    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub precondition: Option<String>,

    #[serde(default, deserialize_with = "lenient::steps")]
    pub steps: Vec<CaseStep>,

    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub opened_date: Option<String>,

    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub module_name: Option<String>,

    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub product_name: Option<String>,
}

/// A product.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    #[serde(deserialize_with = "lenient::u64")]
    pub id: u64,

    pub name: String,

    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub code: Option<String>,

    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub status: Option<String>,
}

macro_rules! impl_entity_common {
    () => {
        fn id(&self) -> u64 {
            self.id
        }

        fn status(&self) -> &str {
            self.status.as_str()
        }

        fn opened_date(&self) -> Option<&str> {
            self.opened_date.as_deref()
        }

        fn module_id(&self) -> Option<u64> {
            self.module
        }

        fn module_name(&self) -> Option<&str> {
            self.module_name.as_deref()
        }

        fn product_name(&self) -> Option<&str> {
            self.product_name.as_deref()
        }

        fn with_module_name(mut self, name: String) -> Self {
            self.module_name = Some(name);
            self
        }
    };
}

impl Entity for Story {
    const KIND: EntityKind = EntityKind::Story;

    impl_entity_common!();

    fn title(&self) -> &str {
        &self.title
    }

    fn body(&self) -> Option<Cow<'_, str>> {
        match (self.spec.as_deref(), self.verify.as_deref()) {
            (Some(spec), Some(verify)) => Some(Cow::Owned(format!("{}\n{}", spec, verify))),
            (Some(text), None) | (None, Some(text)) => Some(Cow::Borrowed(text)),
            (None, None) => None,
        }
    }
}

impl Entity for Bug {
    const KIND: EntityKind = EntityKind::Bug;

    impl_entity_common!();

    fn title(&self) -> &str {
        &self.title
    }

    fn body(&self) -> Option<Cow<'_, str>> {
        self.steps.as_deref().map(Cow::Borrowed)
    }
}

impl Entity for Task {
    const KIND: EntityKind = EntityKind::Task;

    impl_entity_common!();

    fn title(&self) -> &str {
        &self.name
    }

    fn body(&self) -> Option<Cow<'_, str>> {
        self.desc.as_deref().map(Cow::Borrowed)
    }
}

impl Entity for TestCase {
    const KIND: EntityKind = EntityKind::TestCase;

    impl_entity_common!();

    fn title(&self) -> &str {
        &self.title
    }

    fn body(&self) -> Option<Cow<'_, str>> {
        if self.steps.is_empty() {
            return self.precondition.as_deref().map(Cow::Borrowed);
        }
        let mut text = self.precondition.clone().unwrap_or_default();
        for step in &self.steps {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(&step.desc);
            if !step.expect.is_empty() {
                text.push('\n');
                text.push_str(&step.expect);
            }
        }
        Some(Cow::Owned(text))
    }
}

/// Server-reported pagination state of a listing page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pager {
    #[serde(default, deserialize_with = "lenient::u64")]
    pub rec_total: u64,

    #[serde(default, deserialize_with = "lenient::u64")]
    pub rec_per_page: u64,

    #[serde(rename = "pageID", default, deserialize_with = "lenient::u64")]
    pub page_id: u64,
}

impl Pager {
    /// `ceil(rec_total / rec_per_page)`, falling back to `page_size` when the
    /// server reports a zero page size.
    ///
    /// ```rust
    /// use zentao::types::Pager;
    ///
    /// let pager = Pager { rec_total: 250, rec_per_page: 100, page_id: 1 };
    /// assert_eq!(pager.total_pages(100), 3);
    /// ```
    pub fn total_pages(&self, page_size: usize) -> usize {
        let per_page = if self.rec_per_page == 0 {
            page_size.max(1) as u64
        } else {
            self.rec_per_page
        };
        self.rec_total.div_ceil(per_page) as usize
    }
}

/// The single server-side filter dimension a listing accepts.
///
/// Status and module cannot be combined in one request; see
/// [`PaginatedFetcher::fetch_all_matching`](crate::pagination::PaginatedFetcher::fetch_all_matching).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterSelector {
    All,
    Status(String),
    Module(u64),
}

impl FilterSelector {
    /// The `(selector, param)` pair placed in the listing path.
    ///
    /// ```rust
    /// use zentao::types::FilterSelector;
    ///
    /// assert_eq!(FilterSelector::All.path_args(), ("all".to_string(), "0".to_string()));
    /// assert_eq!(FilterSelector::Module(7).path_args(), ("bymodule".to_string(), "7".to_string()));
    /// ```
    pub fn path_args(&self) -> (String, String) {
        match self {
            FilterSelector::All => ("all".to_string(), "0".to_string()),
            FilterSelector::Status(status) => (status.clone(), "0".to_string()),
            FilterSelector::Module(id) => ("bymodule".to_string(), id.to_string()),
        }
    }
}

/// Deserializers tolerant of the backend's loose JSON typing.
pub(crate) mod lenient {
    use super::CaseStep;
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    fn as_u64<E: serde::de::Error>(value: &Value) -> Result<u64, E> {
        match value {
            Value::Null => Ok(0),
            Value::Number(n) => n
                .as_u64()
                .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
                .ok_or_else(|| E::custom(format!("expected unsigned number, got {}", n))),
            Value::String(s) if s.trim().is_empty() => Ok(0),
            Value::String(s) => s
                .trim()
                .parse::<u64>()
                .map_err(|_| E::custom(format!("expected numeric string, got '{}'", s))),
            other => Err(E::custom(format!("expected number, got {}", other))),
        }
    }

    pub fn u64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        as_u64(&Value::deserialize(deserializer)?)
    }

    pub fn u8<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u8, D::Error> {
        let n = as_u64::<D::Error>(&Value::deserialize(deserializer)?)?;
        u8::try_from(n).map_err(|_| D::Error::custom(format!("ordinal {} out of range", n)))
    }

    /// `0`, `""` and null all mean "no id".
    pub fn opt_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
        let n = as_u64::<D::Error>(&Value::deserialize(deserializer)?)?;
        Ok((n != 0).then_some(n))
    }

    pub fn opt_string<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<String>, D::Error> {
        Ok(match Value::deserialize(deserializer)? {
            Value::String(s) if s.is_empty() => None,
            Value::String(s) => Some(s),
            Value::Null => None,
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            other => return Err(D::Error::custom(format!("expected string, got {}", other))),
        })
    }

    /// Steps arrive either as an array or as an object keyed by step id.
    pub fn steps<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<CaseStep>, D::Error> {
        let values: Vec<Value> = match Value::deserialize(deserializer)? {
            Value::Array(items) => items,
            Value::Object(map) => map.into_iter().map(|(_, v)| v).collect(),
            Value::Null => Vec::new(),
            Value::String(s) if s.is_empty() => Vec::new(),
            other => return Err(D::Error::custom(format!("expected steps, got {}", other))),
        };
        values
            .into_iter()
            .map(|v| serde_json::from_value(v).map_err(D::Error::custom))
            .collect()
    }
}
