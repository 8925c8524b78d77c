//! Action catalog: which actions exist and what their base quotas are
//!
//! Static, loaded at startup, validated once. Unknown action ids are a
//! programming error surfaced as `Error::UnknownAction`, never defaulted.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use prahari_common::{Error, Result};

/// Quota tier of an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionCategory {
    /// Cheap lookups (page views, feeds)
    Read,
    /// Content mutations (posts, comments, reactions)
    Write,
    /// Expensive or abuse-prone operations (search, reports)
    Sensitive,
    /// Account-security operations (login, password reset). The base limit
    /// applies to everyone; trust multipliers and role bonuses never loosen it.
    Critical,
}

impl ActionCategory {
    /// Default window length for the tier.
    pub fn default_window(&self) -> Duration {
        match self {
            ActionCategory::Critical => Duration::from_secs(900),
            _ => Duration::from_secs(60),
        }
    }

    /// Default base limit for the tier.
    pub fn default_limit(&self) -> u64 {
        match self {
            ActionCategory::Read => 100,
            ActionCategory::Write => 50,
            ActionCategory::Sensitive => 30,
            ActionCategory::Critical => 5,
        }
    }
}

/// One registered action and its base quota.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionDescriptor {
    pub action: String,
    pub category: ActionCategory,
    pub window: Duration,
    pub base_limit: u64,
}

impl ActionDescriptor {
    fn from_category(action: &str, category: ActionCategory) -> Self {
        Self {
            action: action.to_string(),
            category,
            window: category.default_window(),
            base_limit: category.default_limit(),
        }
    }
}

/// Actions every deployment gets out of the box.
static DEFAULT_ACTIONS: Lazy<Vec<ActionDescriptor>> = Lazy::new(|| {
    [
        ("post:read", ActionCategory::Read),
        ("post:create", ActionCategory::Write),
        ("comment:create", ActionCategory::Write),
        ("reaction:create", ActionCategory::Write),
        ("search:query", ActionCategory::Sensitive),
        ("report:create", ActionCategory::Sensitive),
        ("auth:login", ActionCategory::Critical),
        ("auth:password_reset", ActionCategory::Critical),
        ("http:read", ActionCategory::Read),
        ("http:write", ActionCategory::Write),
    ]
    .into_iter()
    .map(|(action, category)| ActionDescriptor::from_category(action, category))
    .collect()
});

/// Path fragments that mark a route as account-security critical.
const CRITICAL_ROUTE_MARKERS: [&str; 3] = ["/login", "/auth", "/password"];

/// Static lookup from action id to descriptor.
pub struct ActionCatalog {
    actions: HashMap<String, ActionDescriptor>,
}

impl ActionCatalog {
    /// Catalog with the built-in action table.
    pub fn with_defaults() -> Self {
        let actions = DEFAULT_ACTIONS
            .iter()
            .map(|d| (d.action.clone(), d.clone()))
            .collect();
        Self { actions }
    }

    /// Catalog from an explicit descriptor list, validated. Fails with a
    /// fatal configuration error on malformed entries; the process must not
    /// start with a bad limits table.
    pub fn from_descriptors(descriptors: Vec<ActionDescriptor>) -> Result<Self> {
        let mut actions = HashMap::new();
        for descriptor in descriptors {
            Self::validate(&descriptor)?;
            if actions
                .insert(descriptor.action.clone(), descriptor)
                .is_some()
            {
                return Err(Error::Configuration("duplicate action id".to_string()));
            }
        }
        Ok(Self { actions })
    }

    /// Register or replace one action (builder style, startup only).
    pub fn register(mut self, descriptor: ActionDescriptor) -> Result<Self> {
        Self::validate(&descriptor)?;
        self.actions.insert(descriptor.action.clone(), descriptor);
        Ok(self)
    }

    fn validate(descriptor: &ActionDescriptor) -> Result<()> {
        if descriptor.action.is_empty() {
            return Err(Error::Configuration("empty action id".to_string()));
        }
        if descriptor.base_limit == 0 {
            return Err(Error::Configuration(format!(
                "action '{}' has a zero base limit",
                descriptor.action
            )));
        }
        if descriptor.window.is_zero() {
            return Err(Error::Configuration(format!(
                "action '{}' has a zero-length window",
                descriptor.action
            )));
        }
        Ok(())
    }

    /// Look up a registered action. Unregistered ids are integration bugs.
    pub fn describe(&self, action: &str) -> Result<&ActionDescriptor> {
        self.actions
            .get(action)
            .ok_or_else(|| Error::UnknownAction(action.to_string()))
    }

    /// Map an HTTP route onto a registered action for ip-keyed checks.
    /// Auth-shaped paths are critical, other non-GET requests are writes.
    pub fn classify_route(&self, path: &str, method: &str) -> &'static str {
        let path = path.to_ascii_lowercase();
        if CRITICAL_ROUTE_MARKERS.iter().any(|m| path.contains(m)) {
            return "auth:login";
        }
        if method.eq_ignore_ascii_case("GET") || method.eq_ignore_ascii_case("HEAD") {
            "http:read"
        } else {
            "http:write"
        }
    }

    /// Number of registered actions.
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

impl Default for ActionCatalog {
    fn default() -> Self {
        Self::with_defaults()
    }
}
