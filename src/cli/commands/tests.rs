use super::*;
use clap::CommandFactory;

#[test]
fn test_cli_definition_is_valid() {
    Cli::command().debug_assert();
}

#[test]
fn test_parse_serve_with_config() {
    let cli = Cli::try_parse_from(["fbrelay", "serve", "--config", "/tmp/relay.json"]).unwrap();
    match cli.command {
        Commands::Serve { config } => {
            assert_eq!(config, Some(PathBuf::from("/tmp/relay.json")));
        }
        Commands::CheckConfig { .. } => panic!("expected serve"),
    }
}

#[test]
fn test_parse_check_config_default_path() {
    let cli = Cli::try_parse_from(["fbrelay", "check-config"]).unwrap();
    assert!(matches!(cli.command, Commands::CheckConfig { config: None }));
}

#[test]
fn test_unknown_subcommand_rejected() {
    assert!(Cli::try_parse_from(["fbrelay", "gateway"]).is_err());
}

#[test]
fn test_describe_config_redacts_secrets() {
    let mut config = Config::default();
    config.messenger.page_access_token = "EAAB-secret-token".to_string();
    config.webhook.app_secret = "shh".to_string();

    let text = describe_config(std::path::Path::new("/etc/fbrelay.json"), &config);
    assert!(text.contains("Config OK: /etc/fbrelay.json"));
    assert!(text.contains("page-access-token"));
    assert!(text.contains("app-secret"));
    assert!(!text.contains("EAAB-secret-token"));
    assert!(!text.contains("shh\""));
}

#[test]
fn test_check_config_rejects_invalid_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(&path, r#"{"webhook": {"path": "no-slash"}}"#).unwrap();
    assert!(check_config(Some(path)).is_err());
}

#[tokio::test]
async fn test_build_processor_opens_ref_store() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.ref_store.path = Some(dir.path().join("data").join("refs.db"));

    let (sink, _rx) = ChannelSink::new(4);
    build_processor(
        &config,
        Arc::new(DedupCache::default()),
        Arc::new(PendingAckTable::new()),
        Arc::new(sink),
    )
    .unwrap();
    assert!(dir.path().join("data").join("refs.db").exists());
}
