//! Declarative table of backend endpoints.
//!
//! Every call the client makes is described once here as a resource, a verb
//! and an ordered parameter list. [`Endpoint::path`] is the only place that
//! turns those into the backend's `{resource}-{verb}-{p1}-{p2}...json` form.
//!
//! ```rust
//! use zentao::net::endpoint::BUG_BROWSE;
//!
//! let path = BUG_BROWSE
//!     .path(&[
//!         ("productID", "3".to_string()),
//!         ("browseType", "bymodule".to_string()),
//!         ("param", "12".to_string()),
//!         ("recPerPage", "100".to_string()),
//!         ("pageID", "2".to_string()),
//!     ])
//!     .unwrap();
//!
//! assert_eq!(path, "bug-browse-3-0-bymodule-12-id_desc-0-100-2.json");
//! ```

use crate::error::{Error, Result};

/// One positional path parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Param {
    pub name: &'static str,
    /// Used when the caller does not supply the parameter; `None` means required.
    pub default: Option<&'static str>,
}

const fn required(name: &'static str) -> Param {
    Param {
        name,
        default: None,
    }
}

const fn optional(name: &'static str, default: &'static str) -> Param {
    Param {
        name,
        default: Some(default),
    }
}

/// A backend call: `{resource}-{verb}[-{param}...].json`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoint {
    pub resource: &'static str,
    pub verb: &'static str,
    pub params: &'static [Param],
}

/// Issues a fresh session id and the query-parameter name it travels under.
pub const SESSION_ID: Endpoint = Endpoint {
    resource: "api",
    verb: "getSessionID",
    params: &[],
};

pub const USER_LOGIN: Endpoint = Endpoint {
    resource: "user",
    verb: "login",
    params: &[],
};

pub const PRODUCT_ALL: Endpoint = Endpoint {
    resource: "product",
    verb: "all",
    params: &[],
};

const PRODUCT_LISTING: &[Param] = &[
    required("productID"),
    optional("branch", "0"),
    optional("browseType", "all"),
    optional("param", "0"),
    optional("orderBy", "id_desc"),
    optional("recTotal", "0"),
    optional("recPerPage", "100"),
    optional("pageID", "1"),
];

pub const STORY_BROWSE: Endpoint = Endpoint {
    resource: "product",
    verb: "browse",
    params: PRODUCT_LISTING,
};

pub const BUG_BROWSE: Endpoint = Endpoint {
    resource: "bug",
    verb: "browse",
    params: PRODUCT_LISTING,
};

pub const CASE_BROWSE: Endpoint = Endpoint {
    resource: "testcase",
    verb: "browse",
    params: PRODUCT_LISTING,
};

pub const TASK_BROWSE: Endpoint = Endpoint {
    resource: "execution",
    verb: "task",
    params: &[
        required("executionID"),
        optional("status", "all"),
        optional("param", "0"),
        optional("orderBy", "id_desc"),
        optional("recTotal", "0"),
        optional("recPerPage", "100"),
        optional("pageID", "1"),
    ],
};

const BY_ID: &[Param] = &[required("id")];

pub const STORY_VIEW: Endpoint = Endpoint {
    resource: "story",
    verb: "view",
    params: BY_ID,
};

pub const BUG_VIEW: Endpoint = Endpoint {
    resource: "bug",
    verb: "view",
    params: BY_ID,
};

pub const TASK_VIEW: Endpoint = Endpoint {
    resource: "task",
    verb: "view",
    params: BY_ID,
};

pub const CASE_VIEW: Endpoint = Endpoint {
    resource: "testcase",
    verb: "view",
    params: BY_ID,
};

pub const BUG_RESOLVE: Endpoint = Endpoint {
    resource: "bug",
    verb: "resolve",
    params: BY_ID,
};

pub const BUG_CLOSE: Endpoint = Endpoint {
    resource: "bug",
    verb: "close",
    params: BY_ID,
};

pub const STORY_CLOSE: Endpoint = Endpoint {
    resource: "story",
    verb: "close",
    params: BY_ID,
};

pub const TASK_CLOSE: Endpoint = Endpoint {
    resource: "task",
    verb: "close",
    params: BY_ID,
};

impl Endpoint {
    /// Formats the relative path for this endpoint.
    ///
    /// Parameters are looked up by name in `args`; missing optional ones take
    /// their default. Values are percent-encoded.
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] when a required parameter is missing or a
    /// value contains `-`, which would shift every following position.
    pub fn path(&self, args: &[(&str, String)]) -> Result<String> {
        let mut path = format!("{}-{}", self.resource, self.verb);
        for param in self.params {
            let value = args
                .iter()
                .find(|(name, _)| *name == param.name)
                .map(|(_, value)| value.as_str())
                .or(param.default)
                .ok_or_else(|| {
                    Error::config(format!(
                        "missing parameter '{}' for {}-{}",
                        param.name, self.resource, self.verb
                    ))
                })?;
            if value.contains('-') {
                return Err(Error::config(format!(
                    "parameter '{}' must not contain '-': '{}'",
                    param.name, value
                )));
            }
            path.push('-');
            path.push_str(&urlencoding::encode(value));
        }
        path.push_str(".json");
        Ok(path)
    }

    /// Shorthand for endpoints keyed by a single `id`.
    pub fn path_for_id(&self, id: u64) -> Result<String> {
        self.path(&[("id", id.to_string())])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parameterless_endpoints() {
        assert_eq!(SESSION_ID.path(&[]).unwrap(), "api-getSessionID.json");
        assert_eq!(USER_LOGIN.path(&[]).unwrap(), "user-login.json");
        assert_eq!(PRODUCT_ALL.path(&[]).unwrap(), "product-all.json");
    }

    #[test]
    fn test_defaults_fill_positions() {
        let path = STORY_BROWSE
            .path(&[("productID", "1".to_string())])
            .unwrap();
        assert_eq!(path, "product-browse-1-0-all-0-id_desc-0-100-1.json");

        let path = TASK_BROWSE
            .path(&[
                ("executionID", "9".to_string()),
                ("status", "doing".to_string()),
                ("pageID", "3".to_string()),
            ])
            .unwrap();
        assert_eq!(path, "execution-task-9-doing-0-id_desc-0-100-3.json");
    }

    #[test]
    fn test_argument_order_does_not_matter() {
        let a = BUG_BROWSE
            .path(&[("pageID", "2".to_string()), ("productID", "5".to_string())])
            .unwrap();
        let b = BUG_BROWSE
            .path(&[("productID", "5".to_string()), ("pageID", "2".to_string())])
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_missing_required_parameter() {
        let err = CASE_BROWSE.path(&[]).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        assert!(err.to_string().contains("productID"));
    }

    #[test]
    fn test_separator_in_value_is_rejected() {
        let err = BUG_BROWSE
            .path(&[
                ("productID", "1".to_string()),
                ("browseType", "by-module".to_string()),
            ])
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_values_are_encoded() {
        let path = BUG_BROWSE
            .path(&[
                ("productID", "1".to_string()),
                ("browseType", "a b".to_string()),
            ])
            .unwrap();
        assert!(path.contains("-a%20b-"));
    }

    #[test]
    fn test_path_for_id() {
        assert_eq!(STORY_VIEW.path_for_id(12).unwrap(), "story-view-12.json");
        assert_eq!(BUG_RESOLVE.path_for_id(3).unwrap(), "bug-resolve-3.json");
    }
}
