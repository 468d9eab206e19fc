use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::collections::HashMap;
use std::env;

fn default_cl_ord_id_prefix() -> String {
    "MIRROR-".to_string()
}

fn default_locate_timeout_seconds() -> u64 {
    30
}

fn default_worker_pool_size() -> usize {
    8
}

fn default_pause_resume_seconds() -> i64 {
    3600
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShadowAccountPolicy {
    #[serde(default)]
    pub ratio: Option<String>,
    #[serde(default)]
    pub replenish_window: Option<u64>,
    #[serde(default)]
    pub holding_window: Option<u64>,
    #[serde(default)]
    pub partial_cancel_window: Option<u64>,
}

/// Deserialized application configuration, per spec §6. Only
/// `primary_session` is required; everything else carries the documented
/// default.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub primary_session: String,

    #[serde(default)]
    pub drop_copy_session_sender_comp_id: Option<String>,
    #[serde(default)]
    pub drop_copy_session_target_comp_id: Option<String>,

    #[serde(default)]
    pub primary_account: Option<String>,
    #[serde(default)]
    pub shadow_sessions: Vec<String>,
    /// Logical name -> account number.
    #[serde(default)]
    pub shadow_accounts: HashMap<String, String>,
    #[serde(default)]
    pub shadow_account_policies: HashMap<String, ShadowAccountPolicy>,

    #[serde(default = "default_cl_ord_id_prefix")]
    pub cl_ord_id_prefix: String,

    #[serde(default)]
    pub logon_username: Option<String>,
    #[serde(default)]
    pub logon_password: Option<String>,

    #[serde(default = "default_locate_timeout_seconds")]
    pub locate_timeout_seconds: u64,

    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,

    /// How long an order-entry session stays paused after a "not trade
    /// day" Logout before the router resumes it (spec §6, "a scheduled
    /// resume at the next configured trading window").
    #[serde(default = "default_pause_resume_seconds")]
    pub pause_resume_seconds: i64,
}

impl Settings {
    /// Layered config resolution, mirroring the order the engine loads
    /// reference data in: an optional global file, an optional project
    /// file, an optional local override, then environment variables
    /// (`REPLICATOR__FOO__BAR`) taking final precedence.
    pub fn new() -> Result<Self, ConfigError> {
        let home = env::var("HOME").unwrap_or_else(|_| ".".into());

        let s = Config::builder()
            .add_source(File::with_name(&format!("{}/.replicator/config", home)).required(false))
            .add_source(File::with_name("config/config").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(Environment::with_prefix("REPLICATOR").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        assert_eq!(default_cl_ord_id_prefix(), "MIRROR-");
        assert_eq!(default_locate_timeout_seconds(), 30);
        assert_eq!(default_worker_pool_size(), 8);
        assert_eq!(default_pause_resume_seconds(), 3600);
    }
}
