//! Loading SDK configuration from disk.

use voicelink::SdkConfig;
use voicelink::audio::OverrunPolicy;

#[test]
fn full_config_file_is_applied() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        r#"
[audio]
buffer_capacity = 150
sample_rate = 16000
frame_samples = 160
overrun_policy = "report"

[focus]
promote_delay_ms = 50
release_delay_ms = 500

[directive]
cancel_history = 3

[endpoint]
threshold = 0.02
min_silence_ms = 600
"#,
    )
    .unwrap();

    let config = SdkConfig::from_file(&path).unwrap();
    assert_eq!(config.audio.buffer_capacity, 150);
    assert_eq!(config.audio.overrun_policy, OverrunPolicy::Report);
    assert_eq!(config.focus.promote_delay_ms, 50);
    assert_eq!(config.focus.command_capacity, 64);
    assert_eq!(config.directive.cancel_history, 3);
    assert_eq!(config.endpoint.min_silence_ms, 600);
    assert_eq!(config.endpoint.timeout_ms, 7_000);
}

#[test]
fn unknown_overrun_policy_is_rejected() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[audio]\noverrun_policy = \"panic\"\n").unwrap();

    assert!(SdkConfig::from_file(&path).is_err());
}
