//! Layered replay configuration: built-in defaults, then TOML or RON
//! layers merged in order, then environment overrides.

use anyhow::{Context, Result};
use fieldlapse_core::ReplayOptions;
use fieldlapse_render::{RenderConfig, Viewport};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::{env, fs, path::Path};
use tracing::{info, warn};

/// Everything the replay command needs beyond CLI flags.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReplaySettings {
    pub replay: ReplayOptions,
    pub render: RenderConfig,
}

impl Default for ReplaySettings {
    fn default() -> Self {
        Self {
            replay: ReplayOptions::default(),
            render: RenderConfig {
                width: 1280,
                height: 720,
                viewport: Viewport {
                    min_lat: -85.0,
                    min_lng: -180.0,
                    max_lat: 85.0,
                    max_lng: 180.0,
                },
            },
        }
    }
}

/// Merge configuration layers over the defaults, then apply environment
/// overrides.
pub fn load_settings(layers: &[impl AsRef<Path>]) -> Result<ReplaySettings> {
    let mut merged = serde_json::to_value(ReplaySettings::default()).expect("serialize defaults");
    for path in layers {
        let path = path.as_ref();
        let layer = load_config_layer(path)?;
        info!(layer = %path.display(), "applying configuration layer");
        merge_layer(&mut merged, layer);
    }
    let mut settings: ReplaySettings = serde_json::from_value(merged)
        .map_err(|err| anyhow::anyhow!("failed to deserialize merged configuration: {err}"))?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

/// Parse one configuration file, RON by extension, TOML otherwise.
pub fn load_config_layer(path: &Path) -> Result<JsonValue> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read configuration layer {}", path.display()))?;

    match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .as_deref()
    {
        Some("ron") => ron::from_str(&contents)
            .with_context(|| format!("failed to parse RON config layer {}", path.display())),
        _ => toml::from_str(&contents)
            .with_context(|| format!("failed to parse TOML config layer {}", path.display())),
    }
}

/// Recursively overlay `layer` onto `base`.
pub fn merge_layer(base: &mut JsonValue, layer: JsonValue) {
    match (base, layer) {
        (JsonValue::Object(base_map), JsonValue::Object(layer_map)) => {
            for (key, value) in layer_map {
                if let Some(existing) = base_map.get_mut(&key) {
                    merge_layer(existing, value);
                } else {
                    base_map.insert(key, value);
                }
            }
        }
        (target, value) => {
            *target = value;
        }
    }
}

fn apply_env_overrides(settings: &mut ReplaySettings) {
    if let Ok(value) = env::var("FIELDLAPSE_STEP_SECONDS") {
        match value.parse::<u32>() {
            Ok(step) => settings.replay.step_seconds = step,
            Err(err) => warn!(%value, %err, "invalid FIELDLAPSE_STEP_SECONDS; keeping configured value"),
        }
    }
    if let Ok(flag) = env::var("FIELDLAPSE_PER_ACTION") {
        settings.replay.per_action = matches!(
            flag.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        );
    }
    if let Ok(value) = env::var("FIELDLAPSE_FRAME_WIDTH") {
        match value.parse::<u32>() {
            Ok(width) => settings.render.width = width,
            Err(err) => warn!(%value, %err, "invalid FIELDLAPSE_FRAME_WIDTH; keeping configured value"),
        }
    }
    if let Ok(value) = env::var("FIELDLAPSE_FRAME_HEIGHT") {
        match value.parse::<u32>() {
            Ok(height) => settings.render.height = height,
            Err(err) => warn!(%value, %err, "invalid FIELDLAPSE_FRAME_HEIGHT; keeping configured value"),
        }
    }
}
