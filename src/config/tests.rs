//! Unit tests for configuration module
//!
//! Tests configuration parsing, validation, serialization/deserialization,
//! and edge cases in configuration handling.

use super::*;
use anyhow::Result;
use serial_test::serial;
use std::fs;
use tempfile::tempdir;

#[test]
fn test_default_configuration_is_valid() {
    let config = FlingerConfig::default();
    assert!(config.validate().is_ok());

    // Timers are opt-in
    assert!(config.scheduler.idle_timer().is_none());
    assert!(config.scheduler.touch_timer().is_none());
    assert!(config.scheduler.display_power_timer().is_none());

    assert_eq!(config.display.vsync_periods_ns.len(), 2);
    assert!(config.display.refresh_rate_switching);
    assert_eq!(config.composition.color_setting, OutputColorSetting::Managed);
}

#[test]
fn test_configuration_serialization_roundtrip() -> Result<()> {
    let mut original = FlingerConfig::default();
    original.scheduler.idle_timer_ms = 250;
    original.composition.force_color_mode = Some(ColorMode::DisplayP3);
    original.composition.flash_dirty_regions_delay_ms = Some(20);

    let toml_string = toml::to_string(&original)?;
    let deserialized: FlingerConfig = toml::from_str(&toml_string)?;

    assert_eq!(original, deserialized);
    Ok(())
}

#[test]
fn test_configuration_from_file() -> Result<()> {
    let dir = tempdir()?;
    let file_path = dir.path().join("flinger.toml");

    let test_config = r#"
[scheduler]
idle_timer_ms = 500
touch_timer_ms = 300
support_kernel_idle_timer = true

[display]
width = 1080
height = 2340
vsync_periods_ns = [16666666, 11111111, 8333333]
active_config = 2

[phase_offsets]
app_ns = 2000000
offset_threshold_ns = 500000

[composition]
color_setting = "enhanced"
force_color_mode = "display_p3"
"#;
    fs::write(&file_path, test_config)?;

    let config = FlingerConfig::load(&file_path)?;

    assert_eq!(config.scheduler.idle_timer(), Some(Duration::from_millis(500)));
    assert_eq!(config.scheduler.touch_timer(), Some(Duration::from_millis(300)));
    assert!(config.scheduler.display_power_timer().is_none());
    assert!(config.scheduler.support_kernel_idle_timer);

    assert_eq!(config.display.width, 1080);
    assert_eq!(config.display.active_config, 2);
    assert!(config.display.secure);

    assert_eq!(config.phase_offsets.app_ns, 2_000_000);
    assert_eq!(config.phase_offsets.sf_ns, 1_000_000);
    assert_eq!(config.phase_offsets.offset_threshold_ns, 500_000);

    assert_eq!(config.composition.color_setting, OutputColorSetting::Enhanced);
    assert_eq!(config.composition.force_color_mode, Some(ColorMode::DisplayP3));

    Ok(())
}

#[test]
fn test_partial_configuration_uses_defaults() -> Result<()> {
    let dir = tempdir()?;
    let file_path = dir.path().join("partial.toml");
    fs::write(&file_path, "[scheduler]\ntouch_timer_ms = 100\n")?;

    let config = FlingerConfig::load(&file_path)?;

    assert_eq!(config.scheduler.touch_timer_ms, 100);
    assert_eq!(config.scheduler.idle_timer_ms, 0);
    assert_eq!(config.display, DisplayConfig::default());
    assert_eq!(config.composition, CompositionConfig::default());

    Ok(())
}

#[test]
fn test_empty_file_is_default() -> Result<()> {
    let dir = tempdir()?;
    let file_path = dir.path().join("empty.toml");
    fs::write(&file_path, "")?;

    assert_eq!(FlingerConfig::load(&file_path)?, FlingerConfig::default());
    Ok(())
}

#[test]
fn test_missing_file_reports_path() {
    let err = FlingerConfig::load("/nonexistent/flinger.toml").unwrap_err();
    assert!(format!("{:#}", err).contains("/nonexistent/flinger.toml"));
}

#[test]
fn test_malformed_file_fails_to_parse() -> Result<()> {
    let dir = tempdir()?;
    let file_path = dir.path().join("broken.toml");
    fs::write(&file_path, "[display\nwidth = ")?;

    let err = FlingerConfig::load(&file_path).unwrap_err();
    assert!(err.to_string().contains("Failed to parse"));
    Ok(())
}

#[test]
fn test_invalid_files_are_rejected_on_load() -> Result<()> {
    let dir = tempdir()?;
    let file_path = dir.path().join("invalid.toml");
    fs::write(&file_path, "[display]\nvsync_periods_ns = []\n")?;

    assert!(FlingerConfig::load(&file_path).is_err());
    Ok(())
}

#[test]
fn test_validation_rejects_bad_display() {
    let mut config = FlingerConfig::default();
    config.display.width = 0;
    assert!(config.validate().is_err());

    let mut config = FlingerConfig::default();
    config.display.vsync_periods_ns = vec![16_666_666, 0];
    assert!(config.validate().is_err());

    let mut config = FlingerConfig::default();
    config.display.active_config = 2;
    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("active_config"));
}

#[test]
fn test_validation_rejects_negative_threshold() {
    let mut config = FlingerConfig::default();
    config.phase_offsets.offset_threshold_ns = -1;
    assert!(config.validate().is_err());
}

#[test]
fn test_validation_bounds_flash_delay() {
    let mut config = FlingerConfig::default();
    config.composition.flash_dirty_regions_delay_ms = Some(MAX_FLASH_DELAY_MS);
    assert!(config.validate().is_ok());

    config.composition.flash_dirty_regions_delay_ms = Some(MAX_FLASH_DELAY_MS + 1);
    assert!(config.validate().is_err());
}

#[test]
fn test_input_configs_follow_period_order() {
    let config = DisplayConfig {
        vsync_periods_ns: vec![11_111_111, 16_666_666],
        ..DisplayConfig::default()
    };
    let inputs = config.input_configs();

    assert_eq!(inputs.len(), 2);
    assert_eq!(inputs[0].hwc_id, 0);
    assert_eq!(inputs[0].vsync_period, 11_111_111);
    assert_eq!(inputs[1].hwc_id, 1);
}

#[test]
fn test_save_and_reload() -> Result<()> {
    let dir = tempdir()?;
    let file_path = dir.path().join("saved.toml");

    let mut config = FlingerConfig::default();
    config.scheduler.display_power_timer_ms = 1000;
    config.composition.color_setting = OutputColorSetting::Unmanaged;
    config.save(&file_path)?;

    assert_eq!(FlingerConfig::load(&file_path)?, config);
    Ok(())
}

#[test]
#[serial]
fn test_tilde_path_expands_to_home() -> Result<()> {
    let dir = tempdir()?;
    fs::write(dir.path().join("flinger.toml"), "[display]\nwidth = 640\n")?;

    let previous = std::env::var("HOME").ok();
    std::env::set_var("HOME", dir.path());
    let loaded = FlingerConfig::load("~/flinger.toml");
    if let Some(home) = previous {
        std::env::set_var("HOME", home);
    }

    assert_eq!(loaded?.display.width, 640);
    Ok(())
}
