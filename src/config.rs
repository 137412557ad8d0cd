//! Player configuration
//!
//! JSON-backed config records: a `Decoder` section with per-codec entries
//! and a `Synthesizer` section with the reconstruction tunables.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Per-codec decoder settings, keyed by codec name ("hevc", "vvc", "vpcc",
/// "miv").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DecoderCodecConfig {
    pub name: String,
    #[serde(rename = "Thread")]
    pub threads: u32,
    pub hardware_acceleration: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct DecoderConfig {
    /// Hand decoded frames over as GPU textures on a shared context when
    /// the platform decoder supports it.
    pub gpu_interoperability: bool,
    /// Capture per-frame decode deltas in the assembler.
    #[serde(rename = "MeasureFPS")]
    pub measure_fps: bool,
    pub config_list: Vec<DecoderCodecConfig>,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            gpu_interoperability: false,
            measure_fps: false,
            config_list: Vec::new(),
        }
    }
}

impl DecoderConfig {
    pub fn codec(&self, name: &str) -> Option<&DecoderCodecConfig> {
        self.config_list.iter().find(|entry| entry.name == name)
    }
}

/// Reconstruction tunables (defaults match the shipped player).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct SynthesizerConfig {
    pub render_shadow: bool,
    pub max_bbox: f32,
    pub r1: f32,
    pub r2: f32,
    pub vp_cull_factor: f32,
    pub use_dynamic_decimation: bool,
    pub num_vertex_per_point: u32,
    pub decimation_level: u32,
    /// Dump every patch's parameters to the log on each new metadata frame.
    pub export_metadata: bool,
}

impl Default for SynthesizerConfig {
    fn default() -> Self {
        Self {
            render_shadow: false,
            max_bbox: 2048.0,
            r1: 20.0,
            r2: 50.0,
            vp_cull_factor: 1.5,
            use_dynamic_decimation: false,
            num_vertex_per_point: 1,
            decimation_level: 1,
            export_metadata: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct PlayerConfig {
    pub decoder: DecoderConfig,
    pub synthesizer: SynthesizerConfig,
}

impl PlayerConfig {
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SynthesizerConfig::default();
        assert_eq!(config.max_bbox, 2048.0);
        assert_eq!(config.r1, 20.0);
        assert_eq!(config.r2, 50.0);
        assert_eq!(config.vp_cull_factor, 1.5);
        assert_eq!(config.num_vertex_per_point, 1);
        assert_eq!(config.decimation_level, 1);
        assert!(!config.use_dynamic_decimation);
    }

    #[test]
    fn test_parse_player_config() {
        let json = r#"{
            "Decoder": {
                "GpuInteroperability": true,
                "MeasureFPS": true,
                "ConfigList": [
                    {"Name": "hevc", "Thread": 4, "HardwareAcceleration": true},
                    {"Name": "vpcc", "Thread": 2, "HardwareAcceleration": false}
                ]
            },
            "Synthesizer": {
                "RenderShadow": true,
                "MaxBbox": 1024.0,
                "UseDynamicDecimation": true
            }
        }"#;

        let config = PlayerConfig::from_json(json).unwrap();
        assert!(config.decoder.gpu_interoperability);
        assert!(config.decoder.measure_fps);
        assert_eq!(config.decoder.codec("vpcc").unwrap().threads, 2);
        assert!(config.decoder.codec("av1").is_none());
        assert!(config.synthesizer.render_shadow);
        assert_eq!(config.synthesizer.max_bbox, 1024.0);
        // Unspecified fields keep their defaults.
        assert_eq!(config.synthesizer.r2, 50.0);
    }

    #[test]
    fn test_empty_json_is_all_defaults() {
        let config = PlayerConfig::from_json("{}").unwrap();
        assert!(!config.decoder.measure_fps);
        assert_eq!(config.synthesizer.decimation_level, 1);
    }
}
