use crate::errors::RelayError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Generates a `Debug` impl that redacts secret fields.
///
/// Field specifiers:
/// - `field_name`: printed normally via `&self.field_name`
/// - `redact(field_name)`: `String` field: shows `[empty]` or `[REDACTED]`
macro_rules! redact_debug {
    (@field $builder:ident, $self:ident, redact($field:ident)) => {
        $builder.field(
            stringify!($field),
            &if $self.$field.is_empty() {
                "[empty]"
            } else {
                "[REDACTED]"
            },
        );
    };
    (@field $builder:ident, $self:ident, $field:ident) => {
        $builder.field(stringify!($field), &$self.$field);
    };

    (@fields $builder:ident, $self:ident,) => {};
    (@fields $builder:ident, $self:ident, redact($field:ident), $($rest:tt)*) => {
        redact_debug!(@field $builder, $self, redact($field));
        redact_debug!(@fields $builder, $self, $($rest)*);
    };
    (@fields $builder:ident, $self:ident, $field:ident, $($rest:tt)*) => {
        redact_debug!(@field $builder, $self, $field);
        redact_debug!(@fields $builder, $self, $($rest)*);
    };

    ($struct_name:ident, $($fields:tt)*) => {
        impl std::fmt::Debug for $struct_name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                let mut builder = f.debug_struct(stringify!($struct_name));
                redact_debug!(@fields builder, self, $($fields)*);
                builder.finish()
            }
        }
    };
}

fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Dedup
// ---------------------------------------------------------------------------

fn default_dedup_max_entries() -> usize {
    crate::dedup::DEFAULT_MAX_ENTRIES
}

fn default_dedup_ttl_secs() -> u64 {
    crate::dedup::DEFAULT_TTL.as_secs()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupConfig {
    #[serde(default = "default_dedup_max_entries", rename = "maxEntries")]
    pub max_entries: usize,
    #[serde(default = "default_dedup_ttl_secs", rename = "ttlSecs")]
    pub ttl_secs: u64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            max_entries: default_dedup_max_entries(),
            ttl_secs: default_dedup_ttl_secs(),
        }
    }
}

// ---------------------------------------------------------------------------
// Pending acks
// ---------------------------------------------------------------------------

fn default_pending_max_age_secs() -> u64 {
    24 * 60 * 60
}

fn default_sweep_interval_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingConfig {
    #[serde(default = "default_pending_max_age_secs", rename = "maxAgeSecs")]
    pub max_age_secs: u64,
    #[serde(default = "default_sweep_interval_secs", rename = "sweepIntervalSecs")]
    pub sweep_interval_secs: u64,
}

impl Default for PendingConfig {
    fn default() -> Self {
        Self {
            max_age_secs: default_pending_max_age_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

// ---------------------------------------------------------------------------
// Webhook receiver
// ---------------------------------------------------------------------------

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    18800
}

fn default_webhook_path() -> String {
    "/webhook".to_string()
}

#[derive(Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_webhook_path")]
    pub path: String,
    /// Token echoed back during the subscription handshake.
    #[serde(default, rename = "verifyToken")]
    pub verify_token: String,
    /// App secret used to check `X-Hub-Signature-256`. Empty disables the check.
    #[serde(default, rename = "appSecret")]
    pub app_secret: String,
}

redact_debug!(
    WebhookConfig,
    host,
    port,
    path,
    redact(verify_token),
    redact(app_secret),
);

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            path: default_webhook_path(),
            verify_token: String::new(),
            app_secret: String::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Messenger
// ---------------------------------------------------------------------------

fn default_graph_api_base() -> String {
    "https://graph.facebook.com/v2.12".to_string()
}

fn default_optin_ack_text() -> String {
    "It's from the checkbox plugin".to_string()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AutoResponseOption {
    #[default]
    None,
    AutoResponseText,
    AutoResponsePostback,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct MessengerConfig {
    #[serde(default, rename = "pageAccessToken")]
    pub page_access_token: String,
    #[serde(default = "default_graph_api_base", rename = "graphApiBase")]
    pub graph_api_base: String,
    /// Text sent back when a checkbox opt-in is diverted to the ref store.
    #[serde(default = "default_optin_ack_text", rename = "optinAckText")]
    pub optin_ack_text: String,
    #[serde(default = "default_true", rename = "displayGetStarted")]
    pub display_get_started: bool,
    #[serde(default, rename = "autoResponseOption")]
    pub auto_response_option: AutoResponseOption,
    #[serde(default, rename = "autoResponseText")]
    pub auto_response_text: String,
    #[serde(default, rename = "autoResponsePostback")]
    pub auto_response_postback: String,
}

redact_debug!(
    MessengerConfig,
    redact(page_access_token),
    graph_api_base,
    optin_ack_text,
    display_get_started,
    auto_response_option,
    auto_response_text,
    auto_response_postback,
);

impl Default for MessengerConfig {
    fn default() -> Self {
        Self {
            page_access_token: String::new(),
            graph_api_base: default_graph_api_base(),
            optin_ack_text: default_optin_ack_text(),
            display_get_started: true,
            auto_response_option: AutoResponseOption::None,
            auto_response_text: String::new(),
            auto_response_postback: String::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Ref store
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RefStoreConfig {
    /// SQLite file; defaults to `<home>/refs.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Root
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub pending: PendingConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
    #[serde(default)]
    pub messenger: MessengerConfig,
    #[serde(default, rename = "refStore")]
    pub ref_store: RefStoreConfig,
}

impl Config {
    pub fn validate(&self) -> Result<(), RelayError> {
        self.validate_dedup()?;
        self.validate_pending()?;
        self.validate_webhook()?;
        self.validate_messenger()?;
        Ok(())
    }

    fn validate_dedup(&self) -> Result<(), RelayError> {
        if self.dedup.max_entries == 0 {
            return Err(RelayError::Config("dedup.maxEntries must be > 0".into()));
        }
        if self.dedup.ttl_secs == 0 {
            return Err(RelayError::Config("dedup.ttlSecs must be > 0".into()));
        }
        Ok(())
    }

    fn validate_pending(&self) -> Result<(), RelayError> {
        if self.pending.max_age_secs == 0 {
            return Err(RelayError::Config("pending.maxAgeSecs must be > 0".into()));
        }
        if self.pending.sweep_interval_secs == 0 {
            return Err(RelayError::Config(
                "pending.sweepIntervalSecs must be > 0".into(),
            ));
        }
        if self.pending.sweep_interval_secs > self.pending.max_age_secs {
            return Err(RelayError::Config(
                "pending.sweepIntervalSecs must not exceed pending.maxAgeSecs".into(),
            ));
        }
        Ok(())
    }

    fn validate_webhook(&self) -> Result<(), RelayError> {
        let w = &self.webhook;
        if w.port == 0 {
            return Err(RelayError::Config("webhook.port must be > 0".into()));
        }
        if w.host.trim().is_empty() {
            return Err(RelayError::Config("webhook.host must not be empty".into()));
        }
        if !w.path.starts_with('/') {
            return Err(RelayError::Config(format!(
                "webhook.path must start with '/', got {:?}",
                w.path
            )));
        }
        if w.path == "/health" {
            return Err(RelayError::Config(
                "webhook.path conflicts with the /health endpoint".into(),
            ));
        }
        Ok(())
    }

    fn validate_messenger(&self) -> Result<(), RelayError> {
        let m = &self.messenger;
        match url::Url::parse(&m.graph_api_base) {
            Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {}
            Ok(parsed) => {
                return Err(RelayError::Config(format!(
                    "messenger.graphApiBase must be http(s), got scheme {}",
                    parsed.scheme()
                )));
            }
            Err(e) => {
                return Err(RelayError::Config(format!(
                    "messenger.graphApiBase is not a valid URL: {}",
                    e
                )));
            }
        }
        match m.auto_response_option {
            AutoResponseOption::AutoResponseText if m.auto_response_text.trim().is_empty() => {
                Err(RelayError::Config(
                    "messenger.autoResponseText is required when autoResponseOption is autoResponseText"
                        .into(),
                ))
            }
            AutoResponseOption::AutoResponsePostback
                if m.auto_response_postback.trim().is_empty() =>
            {
                Err(RelayError::Config(
                    "messenger.autoResponsePostback is required when autoResponseOption is autoResponsePostback"
                        .into(),
                ))
            }
            _ => Ok(()),
        }
    }
}
