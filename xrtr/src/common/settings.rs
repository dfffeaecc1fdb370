use std::env;

/// Process-level settings, as opposed to the routing-policy configuration
/// carried by directive lines (see [`crate::config`]).
#[derive(Debug, Clone)]
pub struct Settings {
    pub daemon_remote_address: String,
    pub daemon_remote_port: u16,
    pub config_path: Option<String>,
    pub reconnect_interval_secs: u64,
    /// This router's own node id, used to decide local delivery and the
    /// forward/return direction for expiration caps. Not carried by any
    /// config directive (see DESIGN.md); left unset means every node is
    /// treated as non-local.
    pub local_admin_node: Option<u64>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            daemon_remote_address: "127.0.0.1".into(),
            daemon_remote_port: 8001,
            config_path: None,
            reconnect_interval_secs: 10,
            local_admin_node: None,
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        let mut settings = Settings::default();
        if let Ok(setting) = env::var("XRTR_REMOTE_ADDRESS") {
            settings.daemon_remote_address = setting;
        }
        if let Ok(setting) = env::var("XRTR_REMOTE_PORT") {
            if let Ok(port) = setting.parse() {
                settings.daemon_remote_port = port;
            }
        }
        if let Ok(setting) = env::var("XRTR_CONFIG_PATH") {
            settings.config_path = Some(setting);
        }
        if let Ok(setting) = env::var("XRTR_RECONNECT_INTERVAL_SECS") {
            if let Ok(v) = setting.parse() {
                settings.reconnect_interval_secs = v;
            }
        }
        if let Ok(setting) = env::var("XRTR_LOCAL_NODE_ID") {
            if let Ok(v) = setting.parse() {
                settings.local_admin_node = Some(v);
            }
        }
        settings
    }
}
