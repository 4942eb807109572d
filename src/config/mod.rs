pub mod credentials;
pub mod loader;
pub mod schema;

pub use loader::{get_config_path, load_config, ref_store_path};
pub use schema::{
    AutoResponseOption, Config, DedupConfig, MessengerConfig, PendingConfig, RefStoreConfig,
    WebhookConfig,
};
