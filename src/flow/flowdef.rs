// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! JSON flow definition schema types.
//!
//! This module defines Rust structures for parsing and serializing MXL flow
//! definitions, which follow the NMOS IS-04 flow schema format, plus the
//! conversion into the structured [`FlowConfig`] the core consumes. The
//! core itself never interprets JSON: the definition text is stored as the
//! flow's opaque schema blob and handed back verbatim.

use std::{collections::HashMap, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{
    Error, Result,
    flow::{ContinuousConfig, DiscreteConfig, FlowConfig, FlowOptions, VariantConfig},
    time::Rational,
};

/// Ring depth used for flows created from a JSON definition.
const DEFAULT_GRAIN_HISTORY: u64 = 32;

/// Complete flow definition structure following NMOS IS-04 schema.
///
/// This represents the JSON flow definition accepted by
/// [`crate::Instance::create_flow_writer_from_def`]. It contains both
/// common metadata (ID, labels, tags) and format-specific details (video
/// dimensions, audio rates).
///
/// # Examples
///
/// ```
/// use mxl_core::flowdef::FlowDef;
///
/// let json = r#"{
///     "id": "5fbec3b1-1b0f-417d-9059-8b94a47197ed",
///     "format": "urn:x-nmos:format:video",
///     "label": "My Video Flow",
///     "description": "1080p60 video",
///     "tags": {},
///     "parents": [],
///     "media_type": "video/raw",
///     "grain_rate": {"numerator": 60, "denominator": 1},
///     "frame_width": 1920,
///     "frame_height": 1080,
///     "interlace_mode": "progressive",
///     "colorspace": "BT709",
///     "components": [
///         {"name": "Y", "width": 1920, "height": 1080, "bit_depth": 10},
///         {"name": "Cb", "width": 960, "height": 1080, "bit_depth": 10},
///         {"name": "Cr", "width": 960, "height": 1080, "bit_depth": 10}
///     ]
/// }"#;
///
/// let flow_def: FlowDef = serde_json::from_str(json).unwrap();
/// let config = flow_def.to_flow_config().unwrap();
/// ```
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FlowDef {
    /// Unique identifier for this flow (UUID).
    pub id: uuid::Uuid,
    /// Human-readable description.
    pub description: String,
    /// Arbitrary key-value tags for organization.
    #[serde(default)]
    pub tags: HashMap<String, Vec<String>>,
    /// Short human-readable label.
    pub label: String,
    /// List of parent flow IDs (for derived flows).
    #[serde(default)]
    pub parents: Vec<String>,
    /// MIME media type (e.g., "video/raw").
    pub media_type: String,
    /// Format-specific details (flattened into this struct via serde).
    #[serde(flatten)]
    pub details: FlowDefDetails,
}

/// Format-specific flow definition details.
///
/// This enum is used to deserialize the format-specific fields based on the
/// `format` field in the JSON.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "format")]
pub enum FlowDefDetails {
    /// Video flow definition.
    #[serde(rename = "urn:x-nmos:format:video")]
    Video(FlowDefVideo),
    /// Audio flow definition.
    #[serde(rename = "urn:x-nmos:format:audio")]
    Audio(FlowDefAudio),
    /// Generic data flow definition (e.g., ST 291 ancillary packets).
    #[serde(rename = "urn:x-nmos:format:data")]
    Data(FlowDefData),
}

/// Video flow definition details.
///
/// Specifies video-specific parameters like dimensions, frame rate, and
/// color format.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FlowDefVideo {
    /// Frame rate as a rational number (e.g., 30000/1001 for 29.97 fps).
    pub grain_rate: Rate,
    /// Frame width in pixels.
    pub frame_width: i32,
    /// Frame height in pixels (or field height for interlaced).
    pub frame_height: i32,
    /// Interlacing mode.
    pub interlace_mode: InterlaceMode,
    /// Colorspace identifier (e.g., "BT709", "BT2020").
    pub colorspace: String,
    /// Video component descriptions (Y, Cb, Cr, etc.).
    pub components: Vec<Component>,
}

/// Video interlacing mode.
///
/// Interlaced content is accepted and carried through; the core treats
/// grain slices opaquely either way.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub enum InterlaceMode {
    /// Progressive scan (non-interlaced).
    #[serde(rename = "progressive")]
    Progressive,
    /// Interlaced with top field first.
    #[serde(rename = "interlaced_tff")]
    InterlacedTff,
    /// Interlaced with bottom field first.
    #[serde(rename = "interlaced_bff")]
    InterlacedBff,
}

impl FromStr for InterlaceMode {
    type Err = ();

    /// Parses an interlace mode string.
    ///
    /// Accepts: "progressive", "interlaced_tff", or "interlaced_bff".
    fn from_str(s: &str) -> core::result::Result<Self, Self::Err> {
        match s {
            "progressive" => Ok(Self::Progressive),
            "interlaced_tff" => Ok(Self::InterlacedTff),
            "interlaced_bff" => Ok(Self::InterlacedBff),
            _ => Err(()),
        }
    }
}

/// Audio flow definition details.
///
/// Specifies audio-specific parameters like sample rate and channel count.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FlowDefAudio {
    /// Sample rate as a rational number (typically 48000/1 Hz).
    pub sample_rate: Rate,
    /// Number of audio channels.
    pub channel_count: i32,
    /// Bit depth per sample (e.g., 32 for 32-bit float).
    pub bit_depth: u8,
}

/// Generic data flow definition details.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FlowDefData {
    /// Grain rate at which data packets are produced.
    pub grain_rate: Rate,
    /// Maximum payload size of one data grain in bytes.
    pub max_grain_size: u32,
}

/// Rational number representation for rates.
///
/// Used for frame rates (e.g., 30000/1001 for 29.97 fps) and sample rates
/// (e.g., 48000/1 for 48 kHz audio).
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Rate {
    /// Numerator of the rate.
    pub numerator: i32,
    /// Denominator of the rate (defaults to 1 if omitted in JSON).
    #[serde(default = "default_denominator")]
    pub denominator: i32,
}

/// Default denominator for rates (1 Hz).
fn default_denominator() -> i32 {
    1
}

impl From<&Rate> for Rational {
    fn from(value: &Rate) -> Self {
        Rational::new(i64::from(value.numerator), i64::from(value.denominator))
    }
}

/// Video component description (Y, Cb, Cr, alpha, etc.).
///
/// Describes a single component plane in a video frame, including its
/// dimensions and bit depth.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Component {
    /// Component name (e.g., "Y", "Cb", "Cr", "A").
    pub name: String,
    /// Component width in pixels.
    pub width: i32,
    /// Component height in pixels.
    pub height: i32,
    /// Bit depth of this component.
    pub bit_depth: u8,
}

impl Component {
    /// Size of this component plane in bytes, rounded up to whole bytes.
    fn plane_size(&self) -> Result<u64> {
        if self.width <= 0 || self.height <= 0 || self.bit_depth == 0 {
            return Err(Error::Other(format!(
                "Component \"{}\" has invalid geometry.",
                self.name
            )));
        }
        let bits = self.width as u64 * self.height as u64 * u64::from(self.bit_depth);
        Ok(bits.div_ceil(8))
    }
}

impl FlowDef {
    /// Converts this definition into the structured creation parameters the
    /// core consumes.
    ///
    /// The resulting config stores this definition (re-serialized) as the
    /// flow's schema blob; [`crate::Instance::create_flow_writer_from_def`]
    /// substitutes the original JSON text instead so the blob round-trips
    /// byte for byte.
    ///
    /// # Errors
    ///
    /// Returns an error if the definition describes an empty or degenerate
    /// payload (no components, zero dimensions, zero channels).
    pub fn to_flow_config(&self) -> Result<FlowConfig> {
        let schema = serde_json::to_vec(self)
            .map_err(|error| Error::Other(format!("Failed to serialize flow definition: {error}")))?;
        self.to_flow_config_with_schema(schema)
    }

    pub(crate) fn to_flow_config_with_schema(&self, schema: Vec<u8>) -> Result<FlowConfig> {
        let (edit_rate, variant) = match &self.details {
            FlowDefDetails::Video(video) => {
                if video.components.is_empty() {
                    return Err(Error::Other(
                        "Video flow definition has no components.".to_string(),
                    ));
                }
                let mut payload = 0u64;
                for component in &video.components {
                    payload += component.plane_size()?;
                }
                (
                    Rational::from(&video.grain_rate),
                    VariantConfig::Discrete(DiscreteConfig {
                        grain_payload_size: payload,
                        history_depth: DEFAULT_GRAIN_HISTORY,
                        total_slices: 1,
                    }),
                )
            }
            FlowDefDetails::Audio(audio) => {
                if audio.channel_count <= 0 || audio.bit_depth == 0 {
                    return Err(Error::Other(
                        "Audio flow definition has no channels or bit depth.".to_string(),
                    ));
                }
                let rate = Rational::from(&audio.sample_rate);
                if !rate.is_positive() {
                    return Err(Error::BadArg);
                }
                let word = u64::from(audio.bit_depth).div_ceil(8);
                // Roughly one second of per-channel history.
                let samples_per_second =
                    (rate.numerator as u64).div_ceil(rate.denominator as u64);
                let capacity = samples_per_second.next_power_of_two();
                (
                    rate,
                    VariantConfig::Continuous(ContinuousConfig {
                        channel_count: audio.channel_count as u32,
                        sample_word_size: word as u32,
                        buffer_len: capacity * word,
                        options: FlowOptions::default(),
                    }),
                )
            }
            FlowDefDetails::Data(data) => {
                if data.max_grain_size == 0 {
                    return Err(Error::Other(
                        "Data flow definition has a zero grain size.".to_string(),
                    ));
                }
                (
                    Rational::from(&data.grain_rate),
                    VariantConfig::Discrete(DiscreteConfig {
                        grain_payload_size: u64::from(data.max_grain_size),
                        history_depth: DEFAULT_GRAIN_HISTORY,
                        total_slices: 1,
                    }),
                )
            }
        };
        Ok(FlowConfig {
            id: self.id,
            edit_rate,
            schema,
            variant,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VIDEO_DEF: &str = r#"{
        "id": "5fbec3b1-1b0f-417d-9059-8b94a47197ed",
        "format": "urn:x-nmos:format:video",
        "label": "cam 1",
        "description": "1080p50",
        "tags": {},
        "parents": [],
        "media_type": "video/raw",
        "grain_rate": {"numerator": 50},
        "frame_width": 1920,
        "frame_height": 1080,
        "interlace_mode": "progressive",
        "colorspace": "BT709",
        "components": [
            {"name": "Y", "width": 1920, "height": 1080, "bit_depth": 10},
            {"name": "Cb", "width": 960, "height": 1080, "bit_depth": 10},
            {"name": "Cr", "width": 960, "height": 1080, "bit_depth": 10}
        ]
    }"#;

    const AUDIO_DEF: &str = r#"{
        "id": "b3bb5be7-9fe9-4324-a5bb-4c70e1084449",
        "format": "urn:x-nmos:format:audio",
        "label": "mics",
        "description": "stereo 48k",
        "tags": {},
        "parents": [],
        "media_type": "audio/L32",
        "sample_rate": {"numerator": 48000},
        "channel_count": 2,
        "bit_depth": 32
    }"#;

    #[test]
    fn video_definition_maps_to_a_discrete_config() {
        let def: FlowDef = serde_json::from_str(VIDEO_DEF).unwrap();
        assert!(matches!(def.details, FlowDefDetails::Video(_)));
        let config = def.to_flow_config().unwrap();
        assert_eq!(config.edit_rate, Rational::new(50, 1));
        match config.variant {
            VariantConfig::Discrete(discrete) => {
                // Y: 1920*1080*10/8 + Cb/Cr: 960*1080*10/8 each.
                assert_eq!(discrete.grain_payload_size, 2_592_000 + 2 * 1_296_000);
                assert!(discrete.history_depth.is_power_of_two());
            }
            VariantConfig::Continuous(_) => panic!("expected discrete"),
        }
    }

    #[test]
    fn audio_definition_maps_to_a_continuous_config() {
        let def: FlowDef = serde_json::from_str(AUDIO_DEF).unwrap();
        let config = def.to_flow_config().unwrap();
        assert_eq!(config.edit_rate, Rational::new(48000, 1));
        match config.variant {
            VariantConfig::Continuous(continuous) => {
                assert_eq!(continuous.channel_count, 2);
                assert_eq!(continuous.sample_word_size, 4);
                // One second of history, rounded to a power of two.
                assert_eq!(continuous.buffer_len, 65536 * 4);
            }
            VariantConfig::Discrete(_) => panic!("expected continuous"),
        }
    }

    #[test]
    fn default_denominator_is_one() {
        let rate: Rate = serde_json::from_str(r#"{"numerator": 25}"#).unwrap();
        assert_eq!(rate.denominator, 1);
    }

    #[test]
    fn interlace_mode_parses_from_str() {
        assert_eq!(
            InterlaceMode::from_str("progressive"),
            Ok(InterlaceMode::Progressive)
        );
        assert_eq!(
            InterlaceMode::from_str("interlaced_tff"),
            Ok(InterlaceMode::InterlacedTff)
        );
        assert!(InterlaceMode::from_str("weird").is_err());
    }

    #[test]
    fn empty_components_are_rejected() {
        let mut def: FlowDef = serde_json::from_str(VIDEO_DEF).unwrap();
        if let FlowDefDetails::Video(video) = &mut def.details {
            video.components.clear();
        }
        assert!(def.to_flow_config().is_err());
    }
}
