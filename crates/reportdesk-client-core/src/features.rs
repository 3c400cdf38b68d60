//! Capability gating derived from the server's access grant.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const TIER_NONE: &str = "none";

/// Server-issued entitlement record. Kept as raw JSON: the shape belongs to
/// the backend and a newer grant always replaces an older one wholesale.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccessGrant(Value);

impl AccessGrant {
    #[must_use]
    pub fn new(raw: Value) -> Self {
        Self(raw)
    }

    #[must_use]
    pub fn raw(&self) -> &Value {
        &self.0
    }

    fn feature(&self, name: &str) -> Option<&Value> {
        self.0.get("features").and_then(|features| features.get(name))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    pub app_access: bool,
    pub tier: String,
    pub language_addon: bool,
    pub strategic_master_plan: bool,
    pub advisor_chatbot: bool,
    pub is_admin: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            app_access: false,
            tier: TIER_NONE.to_string(),
            language_addon: false,
            strategic_master_plan: false,
            advisor_chatbot: false,
            is_admin: false,
        }
    }
}

impl Capabilities {
    /// Whether the holder may create and submit jobs.
    #[must_use]
    pub fn can_create_jobs(&self) -> bool {
        self.app_access || self.is_admin
    }
}

/// Derives capabilities from a grant. Total: anything missing or of the wrong
/// type degrades to the restrictive default.
#[must_use]
pub fn capabilities(grant: Option<&AccessGrant>) -> Capabilities {
    let Some(grant) = grant else {
        return Capabilities::default();
    };

    let tier = grant
        .feature("tier")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|tier| !tier.is_empty())
        .unwrap_or(TIER_NONE)
        .to_string();

    Capabilities {
        app_access: flag(grant.feature("app_access")),
        tier,
        language_addon: flag(grant.feature("language_addon")),
        strategic_master_plan: flag(grant.feature("strategic_master_plan")),
        advisor_chatbot: flag(grant.feature("advisor_chatbot")),
        is_admin: flag(
            grant
                .raw()
                .get("subscription")
                .and_then(|subscription| subscription.get("admin")),
        ),
    }
}

// Only a literal JSON `true` grants a capability.
fn flag(value: Option<&Value>) -> bool {
    matches!(value, Some(Value::Bool(true)))
}
