use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::request::ReleaseVersion;

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    /// An I/O error occurred while reading config files.
    Io(String),
    /// The file could not be parsed as YAML or did not match the schema.
    Parse(String),
    /// The configuration is structurally valid but semantically wrong.
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(msg) => write!(f, "config io error: {msg}"),
            ConfigError::Parse(msg) => write!(f, "config parse error: {msg}"),
            ConfigError::Invalid(msg) => write!(f, "invalid configuration: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// CSE node type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CseType {
    #[serde(rename = "IN")]
    In,
    #[serde(rename = "MN")]
    Mn,
    #[serde(rename = "ASN")]
    Asn,
}

impl CseType {
    /// Wire value of the `cst` attribute.
    pub fn code(self) -> u8 {
        match self {
            CseType::In => 1,
            CseType::Mn => 2,
            CseType::Asn => 3,
        }
    }
}

/// Wire serialization for primitive content.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Serialization {
    #[default]
    #[serde(rename = "json")]
    Json,
    #[serde(rename = "cbor")]
    Cbor,
}

impl Serialization {
    pub fn content_type(self) -> &'static str {
        match self {
            Serialization::Json => "application/json",
            Serialization::Cbor => "application/cbor",
        }
    }
}

/// Preference applied when a request asks for `flexBlocking`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum FlexBlockingPreference {
    #[default]
    #[serde(rename = "blocking")]
    Blocking,
    #[serde(rename = "nonBlocking")]
    NonBlocking,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    #[serde(rename = "enableACPChecks")]
    pub enable_acp_checks: bool,
    #[serde(rename = "fullAccessAdmin")]
    pub full_access_admin: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            enable_acp_checks: true,
            full_access_admin: true,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RegistrarConfig {
    /// Base URL of the registrar's binding, e.g. `http://registrar:8080`.
    pub address: String,
    #[serde(rename = "cseID")]
    pub cse_id: String,
    /// Resource name of the registrar CSEBase.
    #[serde(rename = "cseName")]
    pub cse_name: String,
    /// Seconds between registration attempts and liveness probes.
    #[serde(rename = "checkInterval", default = "default_registrar_interval")]
    pub check_interval: u64,
    #[serde(default)]
    pub serialization: Serialization,
    /// Probe the registrar and invalidate it after three failures.
    #[serde(rename = "enableLiveness", default = "default_true")]
    pub enable_liveness: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnouncementsConfig {
    #[serde(rename = "allowAnnouncementsToHostingCSE")]
    pub allow_to_hosting_cse: bool,
    /// Seconds to hold announcements back after a peer registers.
    #[serde(rename = "delayAfterRegistration")]
    pub delay_after_registration: u64,
    /// Seconds between retry passes over pending announcements.
    #[serde(rename = "checkInterval")]
    pub check_interval: u64,
}

impl Default for AnnouncementsConfig {
    fn default() -> Self {
        Self {
            allow_to_hosting_cse: true,
            delay_after_registration: 3,
            check_interval: 10,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationsConfig {
    /// Deliver notifications from per-subscription worker queues instead of
    /// inline on the event handler.
    #[serde(rename = "asyncSubscriptionNotifications")]
    pub async_subscription_notifications: bool,
    /// Send a verification request (`vrq`) before accepting a subscription.
    #[serde(rename = "enableSubscriptionVerificationRequests")]
    pub enable_verification_requests: bool,
    /// A batch buffer may hold `factor * bn.num` entries before dropping oldest.
    #[serde(rename = "batchBufferFactor")]
    pub batch_buffer_factor: usize,
    /// Seconds between batch-duration flush checks.
    #[serde(rename = "flushInterval")]
    pub flush_interval: u64,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            async_subscription_notifications: true,
            enable_verification_requests: true,
            batch_buffer_factor: 10,
            flush_interval: 1,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StatisticsConfig {
    pub enable: bool,
    /// Seconds between persisted statistics snapshots.
    #[serde(rename = "writeInterval")]
    pub write_interval: u64,
}

impl Default for StatisticsConfig {
    fn default() -> Self {
        Self {
            enable: true,
            write_interval: 60,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub listen: String,
    #[serde(rename = "allowPatchForDelete")]
    pub allow_patch_for_delete: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8080".to_string(),
            allow_patch_for_delete: false,
        }
    }
}

/// Full configuration surface of a CSE instance.
///
/// Loaded from `ocse.yaml` plus an optional profile overlay
/// (`ocse-{profile}.yaml`), `.env` files, and `OCSE_*` environment variables
/// (`__` separates nesting levels, names matched case-insensitively):
///
/// ```text
/// OCSE_CSEID=/id-mn
/// OCSE_SECURITY__FULLACCESSADMIN=false
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CseConfig {
    #[serde(rename = "cseID")]
    pub cse_id: String,
    /// Resource name of the CSEBase.
    #[serde(rename = "cseName")]
    pub cse_name: String,
    #[serde(rename = "serviceProviderID")]
    pub service_provider_id: String,
    #[serde(rename = "cseType")]
    pub cse_type: CseType,
    /// Originator with administrative access (background workers, sweeps).
    #[serde(rename = "adminOriginator")]
    pub admin_originator: String,
    /// Length of generated resource identifiers.
    #[serde(rename = "idLength")]
    pub id_length: usize,
    /// Upper bound, in seconds, on any resource expiration delta.
    #[serde(rename = "maxExpirationDelta")]
    pub max_expiration_delta: u64,
    /// Default deadline, in seconds, for outbound requests.
    #[serde(rename = "requestExpirationDelta")]
    pub request_expiration_delta: u64,
    /// Seconds between expiration sweeps.
    #[serde(rename = "checkExpirationsInterval")]
    pub check_expirations_interval: u64,
    /// Binding-delivered requests executing at once.
    #[serde(rename = "maxConcurrentRequests")]
    pub max_concurrent_requests: usize,
    /// Binding-delivered requests allowed to wait for a slot; beyond this
    /// new requests are rejected.
    #[serde(rename = "maxQueuedRequests")]
    pub max_queued_requests: usize,
    #[serde(rename = "flexBlockingPreference")]
    pub flex_blocking_preference: FlexBlockingPreference,
    #[serde(rename = "supportedReleaseVersions")]
    pub supported_release_versions: Vec<ReleaseVersion>,
    #[serde(rename = "releaseVersion")]
    pub release_version: ReleaseVersion,
    #[serde(rename = "defaultSerialization")]
    pub default_serialization: Serialization,
    #[serde(rename = "enableRemoteCSE")]
    pub enable_remote_cse: bool,
    #[serde(rename = "sortDiscoveredResources")]
    pub sort_discovered_resources: bool,
    /// Directory of flexContainer specialization policy files.
    #[serde(rename = "flexContainerPolicyDir")]
    pub flex_container_policy_dir: Option<PathBuf>,
    pub security: SecurityConfig,
    pub registrar: Option<RegistrarConfig>,
    pub announcements: AnnouncementsConfig,
    pub notifications: NotificationsConfig,
    pub statistics: StatisticsConfig,
    pub http: HttpConfig,
}

impl Default for CseConfig {
    fn default() -> Self {
        Self {
            cse_id: "/id-in".to_string(),
            cse_name: "cse-in".to_string(),
            service_provider_id: "ocse.example".to_string(),
            cse_type: CseType::In,
            admin_originator: "CAdmin".to_string(),
            id_length: 10,
            max_expiration_delta: 60 * 60 * 24 * 365,
            request_expiration_delta: 10,
            check_expirations_interval: 10,
            max_concurrent_requests: 64,
            max_queued_requests: 256,
            flex_blocking_preference: FlexBlockingPreference::Blocking,
            supported_release_versions: vec![
                ReleaseVersion::R2a,
                ReleaseVersion::R3,
                ReleaseVersion::R4,
                ReleaseVersion::R5,
            ],
            release_version: ReleaseVersion::R4,
            default_serialization: Serialization::Json,
            enable_remote_cse: true,
            sort_discovered_resources: true,
            flex_container_policy_dir: None,
            security: SecurityConfig::default(),
            registrar: None,
            announcements: AnnouncementsConfig::default(),
            notifications: NotificationsConfig::default(),
            statistics: StatisticsConfig::default(),
            http: HttpConfig::default(),
        }
    }
}

fn default_registrar_interval() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

impl CseConfig {
    /// Load configuration from a YAML file, without a profile overlay.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        Self::load_with_profile(path, None)
    }

    /// Load configuration with an optional profile overlay.
    ///
    /// For `ocse.yaml` and profile `dev`, the overlay file is
    /// `ocse-dev.yaml` next to it. `.env` is loaded into the process
    /// environment first (never overwriting existing variables), then
    /// `OCSE_*` variables override individual keys.
    pub fn load_with_profile(path: &Path, profile: Option<&str>) -> Result<Self, ConfigError> {
        let base = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let mut value: serde_yaml::Value =
            serde_yaml::from_str(&base).map_err(|e| ConfigError::Parse(e.to_string()))?;

        if let Some(profile) = profile {
            let overlay_path = profile_path(path, profile);
            if overlay_path.exists() {
                let overlay = std::fs::read_to_string(&overlay_path)
                    .map_err(|e| ConfigError::Io(e.to_string()))?;
                let overlay: serde_yaml::Value =
                    serde_yaml::from_str(&overlay).map_err(|e| ConfigError::Parse(e.to_string()))?;
                merge_yaml(&mut value, overlay);
            }
        }

        let _ = dotenvy::dotenv();
        apply_env_overrides(&mut value, std::env::vars());

        let config: CseConfig =
            serde_yaml::from_value(value).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string (for tests).
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: CseConfig =
            serde_yaml::from_str(yaml).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.cse_id.starts_with('/') || self.cse_id.len() < 2 {
            return Err(ConfigError::Invalid(format!(
                "cseID must begin with '/': {}",
                self.cse_id
            )));
        }
        if self.cse_name.is_empty() || self.cse_name.contains('/') {
            return Err(ConfigError::Invalid(format!(
                "cseName must be a plain resource name: {}",
                self.cse_name
            )));
        }
        if self.id_length < 4 {
            return Err(ConfigError::Invalid(
                "idLength must be at least 4".to_string(),
            ));
        }
        if !self
            .supported_release_versions
            .contains(&self.release_version)
        {
            return Err(ConfigError::Invalid(
                "releaseVersion must be in supportedReleaseVersions".to_string(),
            ));
        }
        if let Some(registrar) = &self.registrar {
            if !registrar.cse_id.starts_with('/') {
                return Err(ConfigError::Invalid(format!(
                    "registrar.cseID must begin with '/': {}",
                    registrar.cse_id
                )));
            }
        }
        Ok(())
    }
}

fn profile_path(base: &Path, profile: &str) -> PathBuf {
    let stem = base
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("ocse");
    let ext = base.extension().and_then(|s| s.to_str()).unwrap_or("yaml");
    base.with_file_name(format!("{stem}-{profile}.{ext}"))
}

/// Deep-merge `overlay` into `base`; overlay wins on scalar conflicts.
fn merge_yaml(base: &mut serde_yaml::Value, overlay: serde_yaml::Value) {
    match (base, overlay) {
        (serde_yaml::Value::Mapping(base_map), serde_yaml::Value::Mapping(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_yaml(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Apply `OCSE_*` environment variables onto the YAML tree.
///
/// `__` separates nesting levels; key matching is case-insensitive against
/// the YAML field names.
fn apply_env_overrides(
    value: &mut serde_yaml::Value,
    vars: impl Iterator<Item = (String, String)>,
) {
    for (key, raw) in vars {
        let Some(path) = key.strip_prefix("OCSE_") else {
            continue;
        };
        let segments: Vec<&str> = path.split("__").collect();
        set_path(value, &segments, parse_scalar(&raw));
    }
}

fn set_path(value: &mut serde_yaml::Value, segments: &[&str], scalar: serde_yaml::Value) {
    let Some((head, rest)) = segments.split_first() else {
        return;
    };
    if !value.is_mapping() {
        *value = serde_yaml::Value::Mapping(serde_yaml::Mapping::new());
    }
    let map = value.as_mapping_mut().expect("mapping ensured above");

    // Match case-insensitively against an existing key, else insert lowercase.
    let existing = map.keys().find_map(|k| {
        k.as_str()
            .filter(|s| s.eq_ignore_ascii_case(head))
            .map(|s| s.to_string())
    });
    let key = serde_yaml::Value::String(existing.unwrap_or_else(|| head.to_lowercase()));

    if rest.is_empty() {
        map.insert(key, scalar);
    } else {
        let entry = map
            .entry(key)
            .or_insert(serde_yaml::Value::Mapping(serde_yaml::Mapping::new()));
        set_path(entry, rest, scalar);
    }
}

fn parse_scalar(raw: &str) -> serde_yaml::Value {
    if raw.eq_ignore_ascii_case("true") {
        return serde_yaml::Value::Bool(true);
    }
    if raw.eq_ignore_ascii_case("false") {
        return serde_yaml::Value::Bool(false);
    }
    if let Ok(n) = raw.parse::<i64>() {
        return serde_yaml::Value::Number(n.into());
    }
    serde_yaml::Value::String(raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        CseConfig::default().validate().unwrap();
    }

    #[test]
    fn parse_minimal_yaml() {
        let config = CseConfig::from_yaml_str(
            r#"
cseID: "/id-mn"
cseName: "cse-mn"
cseType: "MN"
"#,
        )
        .unwrap();
        assert_eq!(config.cse_id, "/id-mn");
        assert_eq!(config.cse_type, CseType::Mn);
        // untouched fields keep their defaults
        assert_eq!(config.id_length, 10);
        assert!(config.security.enable_acp_checks);
    }

    #[test]
    fn parse_registrar_section() {
        let config = CseConfig::from_yaml_str(
            r#"
cseID: "/id-mn"
cseType: "MN"
registrar:
  address: "http://registrar:8080"
  cseID: "/id-in"
  cseName: "cse-in"
  checkInterval: 5
"#,
        )
        .unwrap();
        let registrar = config.registrar.unwrap();
        assert_eq!(registrar.cse_id, "/id-in");
        assert_eq!(registrar.check_interval, 5);
        assert!(registrar.enable_liveness);
    }

    #[test]
    fn invalid_cse_id_rejected() {
        assert!(CseConfig::from_yaml_str(r#"cseID: "no-slash""#).is_err());
    }

    #[test]
    fn release_version_must_be_supported() {
        let result = CseConfig::from_yaml_str(
            r#"
supportedReleaseVersions: ["2a", "3"]
releaseVersion: "4"
"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn env_overrides_nested_keys() {
        let mut value: serde_yaml::Value = serde_yaml::from_str(
            r#"
cseID: "/id-in"
security:
  enableACPChecks: true
"#,
        )
        .unwrap();
        apply_env_overrides(
            &mut value,
            vec![
                ("OCSE_CSEID".to_string(), "/id-other".to_string()),
                (
                    "OCSE_SECURITY__ENABLEACPCHECKS".to_string(),
                    "false".to_string(),
                ),
                ("UNRELATED".to_string(), "ignored".to_string()),
            ]
            .into_iter(),
        );
        let config: CseConfig = serde_yaml::from_value(value).unwrap();
        assert_eq!(config.cse_id, "/id-other");
        assert!(!config.security.enable_acp_checks);
    }

    #[test]
    fn load_with_profile_overlay_file() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("ocse.yaml");
        std::fs::write(&base, "cseID: \"/id-in\"\ncseName: \"cse-in\"\n").unwrap();
        std::fs::write(
            dir.path().join("ocse-test.yaml"),
            "cseName: \"cse-test\"\n",
        )
        .unwrap();

        let config = CseConfig::load_with_profile(&base, Some("test")).unwrap();
        assert_eq!(config.cse_id, "/id-in");
        assert_eq!(config.cse_name, "cse-test");

        // a profile without an overlay file keeps the base values
        let config = CseConfig::load_with_profile(&base, Some("missing")).unwrap();
        assert_eq!(config.cse_name, "cse-in");
    }

    #[test]
    fn profile_overlay_merges() {
        let mut base: serde_yaml::Value = serde_yaml::from_str(
            r#"
cseID: "/id-in"
security:
  fullAccessAdmin: true
"#,
        )
        .unwrap();
        let overlay: serde_yaml::Value = serde_yaml::from_str(
            r#"
security:
  fullAccessAdmin: false
"#,
        )
        .unwrap();
        merge_yaml(&mut base, overlay);
        let config: CseConfig = serde_yaml::from_value(base).unwrap();
        assert_eq!(config.cse_id, "/id-in");
        assert!(!config.security.full_access_admin);
    }
}
