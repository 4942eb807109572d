use fbrelay::config::{AutoResponseOption, Config, load_config};
use fbrelay::incoming::{GetStarted, IncomingSettings};

fn default_config() -> Config {
    serde_json::from_str("{}").unwrap()
}

#[test]
fn test_valid_default_passes() {
    let config = default_config();
    assert!(config.validate().is_ok());
}

#[test]
fn test_defaults_match_documented_values() {
    let config = default_config();
    assert_eq!(config.dedup.max_entries, 10_000);
    assert_eq!(config.dedup.ttl_secs, 3600);
    assert_eq!(config.pending.max_age_secs, 86_400);
    assert_eq!(config.webhook.port, 18800);
    assert_eq!(
        config.messenger.graph_api_base,
        "https://graph.facebook.com/v2.12"
    );
    assert!(config.messenger.display_get_started);
}

#[test]
fn test_zero_dedup_ttl_rejected() {
    let mut config = default_config();
    config.dedup.ttl_secs = 0;
    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("ttlSecs"));
}

#[test]
fn test_zero_pending_max_age_rejected() {
    let mut config = default_config();
    config.pending.max_age_secs = 0;
    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("maxAgeSecs"));
}

#[test]
fn test_unknown_auto_response_option_fails_to_parse() {
    let result: Result<Config, _> =
        serde_json::from_str(r#"{"messenger": {"autoResponseOption": "shout"}}"#);
    assert!(result.is_err());
}

#[test]
fn test_legacy_file_loads_into_processor_settings() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(
        &path,
        r#"{
            "accessToken": "EAAB",
            "displayGetStarted": true,
            "autoResponseOption": "autoResponsePostback",
            "autoResponsePostback": "MAIN_MENU",
            "webhook": {"path": "/fb"}
        }"#,
    )
    .unwrap();

    let config = load_config(Some(&path)).unwrap();
    assert_eq!(config.webhook.path, "/fb");
    assert_eq!(
        config.messenger.auto_response_option,
        AutoResponseOption::AutoResponsePostback
    );

    let settings = IncomingSettings::from(&config.messenger);
    assert_eq!(
        settings.get_started,
        GetStarted::InjectPostback("MAIN_MENU".to_string())
    );
}
