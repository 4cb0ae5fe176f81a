//! Header and action allow-lists that drive caching decisions.
//!
//! A [`CachePolicy`] is built once at startup, either from the compiled-in
//! defaults or from a TOML policy file, and shared read-only by the
//! classifier and the fingerprinter.

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

/// Header names whose values participate in request fingerprints, in
/// canonical order.
pub const DEFAULT_FINGERPRINT_HEADERS: &[&str] = &[
    "x-connector-entity",
    "accept",
    "user-agent",
    "Content-Length",
    "Accept-Encoding",
    "Accept-Language",
    "Soapaction",
];

/// Header carrying the SOAP action of a `POST` request.
pub const DEFAULT_ACTION_HEADER: &str = "Soapaction";

/// SOAP actions whose `POST` requests may be served from the cache.
pub const DEFAULT_CACHEABLE_ACTIONS: &[&str] = &["getList", "call", "getMessage"];

/// Errors raised while loading a policy file.
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("failed to read policy file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid policy file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("policy must name an action header")]
    EmptyActionHeader,
}

/// Immutable caching policy.
///
/// # Examples
///
/// ```
/// use hcproxy::cache::CachePolicy;
///
/// let policy = CachePolicy::default();
/// assert_eq!(policy.action_header(), "Soapaction");
/// assert!(policy.is_cacheable_action("getList"));
/// assert!(!policy.is_cacheable_action("GetList"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CachePolicy {
    fingerprint_headers: Vec<String>,
    action_header: String,
    cacheable_actions: Vec<String>,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            fingerprint_headers: to_owned(DEFAULT_FINGERPRINT_HEADERS),
            action_header: DEFAULT_ACTION_HEADER.to_owned(),
            cacheable_actions: to_owned(DEFAULT_CACHEABLE_ACTIONS),
        }
    }
}

impl CachePolicy {
    /// Creates a policy from explicit lists.
    ///
    /// Repeated fingerprint header names (compared case-insensitively) keep
    /// only their first position.
    pub fn new<H, A>(fingerprint_headers: H, action_header: impl Into<String>, actions: A) -> Self
    where
        H: IntoIterator,
        H::Item: Into<String>,
        A: IntoIterator,
        A::Item: Into<String>,
    {
        let mut policy = Self {
            fingerprint_headers: fingerprint_headers.into_iter().map(Into::into).collect(),
            action_header: action_header.into(),
            cacheable_actions: actions.into_iter().map(Into::into).collect(),
        };
        policy.dedup_headers();
        policy
    }

    /// Loads a policy from a TOML file. Keys missing from the file keep their
    /// compiled-in defaults.
    ///
    /// ```toml
    /// fingerprint_headers = ["accept", "Soapaction"]
    /// action_header = "Soapaction"
    /// cacheable_actions = ["getList"]
    /// ```
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, PolicyError> {
        let path = path.as_ref();
        let display = path.display().to_string();
        let raw = std::fs::read_to_string(path).map_err(|source| PolicyError::Read {
            path: display.clone(),
            source,
        })?;
        let mut policy: Self = toml::from_str(&raw).map_err(|source| PolicyError::Parse {
            path: display,
            source,
        })?;
        if policy.action_header.trim().is_empty() {
            return Err(PolicyError::EmptyActionHeader);
        }
        policy.dedup_headers();
        Ok(policy)
    }

    /// Header names that participate in fingerprints, in canonical order.
    pub fn fingerprint_headers(&self) -> &[String] {
        &self.fingerprint_headers
    }

    /// Name of the header holding the SOAP action.
    pub fn action_header(&self) -> &str {
        &self.action_header
    }

    /// Allow-listed SOAP actions.
    pub fn cacheable_actions(&self) -> &[String] {
        &self.cacheable_actions
    }

    /// Exact, case-sensitive membership test against the action allow-list.
    pub fn is_cacheable_action(&self, action: &str) -> bool {
        self.cacheable_actions.iter().any(|a| a == action)
    }

    fn dedup_headers(&mut self) {
        let mut seen: Vec<String> = Vec::with_capacity(self.fingerprint_headers.len());
        self.fingerprint_headers.retain(|name| {
            let lower = name.to_ascii_lowercase();
            if seen.contains(&lower) {
                false
            } else {
                seen.push(lower);
                true
            }
        });
    }
}

fn to_owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_owned()).collect()
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn defaults_match_deployment() {
        let policy = CachePolicy::default();
        assert_eq!(policy.fingerprint_headers().len(), 7);
        assert_eq!(policy.fingerprint_headers()[0], "x-connector-entity");
        assert_eq!(policy.cacheable_actions(), ["getList", "call", "getMessage"]);
    }

    #[test]
    fn duplicate_header_names_keep_first_position() {
        let policy = CachePolicy::new(["Accept", "user-agent", "accept"], "SOAPAction", ["x"]);
        assert_eq!(policy.fingerprint_headers(), ["Accept", "user-agent"]);
    }

    #[test]
    fn file_overrides_only_given_keys() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "cacheable_actions = [\"listOrders\"]").unwrap();

        let policy = CachePolicy::from_file(file.path()).unwrap();
        assert!(policy.is_cacheable_action("listOrders"));
        assert!(!policy.is_cacheable_action("getList"));
        assert_eq!(policy.action_header(), DEFAULT_ACTION_HEADER);
        assert_eq!(policy.fingerprint_headers().len(), 7);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "cachable_actions = [\"typo\"]").unwrap();
        assert!(matches!(
            CachePolicy::from_file(file.path()),
            Err(PolicyError::Parse { .. })
        ));
    }

    #[test]
    fn blank_action_header_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "action_header = \" \"").unwrap();
        assert!(matches!(
            CachePolicy::from_file(file.path()),
            Err(PolicyError::EmptyActionHeader)
        ));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        assert!(matches!(
            CachePolicy::from_file("/nonexistent/policy.toml"),
            Err(PolicyError::Read { .. })
        ));
    }
}
