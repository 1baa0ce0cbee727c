use std::fs;
use strategy_chart::data_types::{Color, EngineSettings, FetchSettings, LayoutSettings};

#[test]
fn test_missing_fields_use_defaults() {
    let settings = EngineSettings::from_json_str(
        r#"{ "layout": { "min_size_px": 60 }, "legend": { "timezone": "Asia/Tokyo" } }"#,
    )
    .unwrap();
    assert_eq!(settings.layout.min_size_px, 60.0);
    assert_eq!(settings.layout.min_size_ratio, LayoutSettings::default().min_size_ratio);
    assert_eq!(settings.legend.timezone, chrono_tz::Asia::Tokyo);
    assert_eq!(settings.legend.empty_marker, "--");
    assert_eq!(settings.fetch, FetchSettings::default());

    assert_eq!(EngineSettings::from_json_str("{}").unwrap(), EngineSettings::default());
}

#[test]
fn test_invalid_settings_are_errors() {
    assert!(EngineSettings::from_json_str(r#"{ "legend": { "timezone": "Mars/Base" } }"#).is_err());
    assert!(EngineSettings::from_json_str(r#"{ "colors": { "up": "green" } }"#).is_err());
    assert!(EngineSettings::load("/definitely/not/here.json").is_err());
}

#[test]
fn test_load_from_file() {
    let path = std::env::temp_dir().join(format!("strategy_chart_settings_{}.json", std::process::id()));
    fs::write(&path, r##"{ "colors": { "up": "#00ff00" }, "fetch": { "max_attempts": 3 } }"##).unwrap();
    let settings = EngineSettings::load(&path).unwrap();
    fs::remove_file(&path).unwrap();

    assert_eq!(settings.colors.up, Color::rgb(0, 255, 0));
    assert!(settings.fetch.allows_retry(2));
    assert!(!settings.fetch.allows_retry(3));
    assert!(FetchSettings::default().allows_retry(1_000));
}

#[test]
fn test_palette_cycles() {
    let colors = EngineSettings::default().colors;
    let n = colors.palette.len();
    assert_eq!(colors.pick(0), colors.pick(n));
    assert_ne!(colors.pick(0), colors.pick(1));
}
