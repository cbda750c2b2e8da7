//! Uniqueness configuration and result types.

use std::collections::{BTreeMap, HashMap};

/// Selects which identity mutations to apply.
///
/// A sparse set of flags: anything left at its default is simply not
/// attempted and never appears in the result's operation map.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UniquenessConfig {
    /// Regenerate the device identifier (android_id)
    pub new_device_id: bool,
    /// Regenerate the advertising identifier
    pub new_advertising_id: bool,
    /// Clear browser cookies and cache
    pub clear_browser_data: bool,
    /// Explicit user-agent override
    pub user_agent: Option<String>,
    /// Pick a random user agent from the rotation pool
    pub random_user_agent: bool,
    /// Timezone: explicit IANA value, derived from a country, or from the proxy
    pub timezone: Option<ValueSource>,
    /// Mock GPS location, same three sources
    pub location: Option<ValueSource>,
    /// Locale derived from a country code
    pub locale_country: Option<String>,
    /// Raw build-property overrides applied via setprop
    pub build_props: HashMap<String, String>,
}

impl UniquenessConfig {
    /// True when no mutation is selected at all
    pub fn is_empty(&self) -> bool {
        !self.new_device_id
            && !self.new_advertising_id
            && !self.clear_browser_data
            && self.user_agent.is_none()
            && !self.random_user_agent
            && self.timezone.is_none()
            && self.location.is_none()
            && self.locale_country.is_none()
            && self.build_props.is_empty()
    }
}

/// Where a timezone / location value comes from
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "source", rename_all = "camelCase")]
pub enum ValueSource {
    /// An explicit value: an IANA timezone name, or `"lat,lon"` for locations
    Explicit { value: String },
    /// Derived from an ISO country code
    Country { code: String },
    /// Derived from the geolocation of the active proxy's public IP
    Proxy,
}

/// Outcome of one sub-operation
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Outcome {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl Outcome {
    pub fn ok() -> Self {
        Self { ok: true, detail: None }
    }

    pub fn ok_with(detail: impl Into<String>) -> Self {
        Self { ok: true, detail: Some(detail.into()) }
    }

    pub fn failed(detail: impl Into<String>) -> Self {
        Self { ok: false, detail: Some(detail.into()) }
    }
}

/// Aggregated result of one uniqueness application.
///
/// `success` is the conjunction over *attempted* operations only — an
/// operation that was never selected is absent from the map, not counted.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UniquenessResult {
    pub success: bool,
    pub operations: BTreeMap<String, Outcome>,
    pub duration_ms: u64,
}

impl UniquenessResult {
    pub fn new() -> Self {
        Self { success: true, operations: BTreeMap::new(), duration_ms: 0 }
    }

    /// Immediate failure with nothing attempted (e.g. no root access)
    pub fn rejected(duration_ms: u64) -> Self {
        Self { success: false, operations: BTreeMap::new(), duration_ms }
    }

    pub fn record(&mut self, operation: &str, outcome: Outcome) {
        self.success = self.success && outcome.ok;
        self.operations.insert(operation.to_string(), outcome);
    }

    pub fn attempted(&self) -> usize {
        self.operations.len()
    }
}

impl Default for UniquenessResult {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_is_conjunction_of_attempted_operations() {
        let mut result = UniquenessResult::new();
        result.record("deviceId", Outcome::ok());
        assert!(result.success);

        result.record("timezone", Outcome::failed("no mechanism stuck"));
        assert!(!result.success);

        // A later success does not repair the batch
        result.record("locale", Outcome::ok());
        assert!(!result.success);
        assert_eq!(result.attempted(), 3);
    }

    #[test]
    fn rejected_result_has_no_operations() {
        let result = UniquenessResult::rejected(5);
        assert!(!result.success);
        assert_eq!(result.attempted(), 0);
    }

    #[test]
    fn empty_config_detects_no_selection() {
        assert!(UniquenessConfig::default().is_empty());

        let config = UniquenessConfig { new_device_id: true, ..Default::default() };
        assert!(!config.is_empty());
    }

    #[test]
    fn value_source_round_trips_through_serde() {
        let tz: ValueSource =
            serde_json::from_str(r#"{"source":"explicit","value":"Europe/Paris"}"#).unwrap();
        assert_eq!(tz, ValueSource::Explicit { value: "Europe/Paris".into() });

        let country: ValueSource =
            serde_json::from_str(r#"{"source":"country","code":"fr"}"#).unwrap();
        assert_eq!(country, ValueSource::Country { code: "fr".into() });

        let proxy: ValueSource = serde_json::from_str(r#"{"source":"proxy"}"#).unwrap();
        assert_eq!(proxy, ValueSource::Proxy);
    }
}
