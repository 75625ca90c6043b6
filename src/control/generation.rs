//! Generation configuration and its wire form.
//!
//! Every tunable is a [`Tunable`]: either left to the service
//! ([`Tunable::Auto`]) or fixed by the user ([`Tunable::Pinned`]).  Auto
//! fields are omitted from the pushed config so the service keeps choosing
//! them itself; this is a real value, not a missing default.
//!
//! | Field | Range |
//! |-------|-------|
//! | `temperature` | 0.0 – 3.0 |
//! | `top_k` | 1 – 1000 |
//! | `guidance` | 0.0 – 6.0 |
//! | `seed` | any `u32` |
//! | `bpm` | 60 – 200 |
//! | `density`, `brightness` | 0.0 – 1.0 |

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Tunable
// ---------------------------------------------------------------------------

/// A setting the service may pick on its own or the user may pin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tunable<T> {
    Auto,
    Pinned(T),
}

impl<T> Default for Tunable<T> {
    fn default() -> Self {
        Tunable::Auto
    }
}

impl<T: Copy> Tunable<T> {
    /// The pinned value, `None` when auto.
    pub fn pinned(&self) -> Option<T> {
        match self {
            Tunable::Auto => None,
            Tunable::Pinned(v) => Some(*v),
        }
    }

    pub fn is_auto(&self) -> bool {
        matches!(self, Tunable::Auto)
    }
}

// ---------------------------------------------------------------------------
// Scale
// ---------------------------------------------------------------------------

/// Musical key / scale the service can be pinned to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Scale {
    CMajorAMinor,
    DFlatMajorBFlatMinor,
    DMajorBMinor,
    EFlatMajorCMinor,
    EMajorDFlatMinor,
    FMajorDMinor,
    GFlatMajorEFlatMinor,
    GMajorEMinor,
    AFlatMajorFMinor,
    AMajorGFlatMinor,
    BFlatMajorGMinor,
    BMajorAFlatMinor,
}

impl Scale {
    pub const ALL: [Scale; 12] = [
        Scale::CMajorAMinor,
        Scale::DFlatMajorBFlatMinor,
        Scale::DMajorBMinor,
        Scale::EFlatMajorCMinor,
        Scale::EMajorDFlatMinor,
        Scale::FMajorDMinor,
        Scale::GFlatMajorEFlatMinor,
        Scale::GMajorEMinor,
        Scale::AFlatMajorFMinor,
        Scale::AMajorGFlatMinor,
        Scale::BFlatMajorGMinor,
        Scale::BMajorAFlatMinor,
    ];

    /// Display label, e.g. `"C Major / A Minor"`.
    pub fn label(&self) -> &'static str {
        match self {
            Scale::CMajorAMinor => "C Major / A Minor",
            Scale::DFlatMajorBFlatMinor => "D♭ Major / B♭ Minor",
            Scale::DMajorBMinor => "D Major / B Minor",
            Scale::EFlatMajorCMinor => "E♭ Major / C Minor",
            Scale::EMajorDFlatMinor => "E Major / C♯/D♭ Minor",
            Scale::FMajorDMinor => "F Major / D Minor",
            Scale::GFlatMajorEFlatMinor => "G♭ Major / E♭ Minor",
            Scale::GMajorEMinor => "G Major / E Minor",
            Scale::AFlatMajorFMinor => "A♭ Major / F Minor",
            Scale::AMajorGFlatMinor => "A Major / F♯/G♭ Minor",
            Scale::BFlatMajorGMinor => "B♭ Major / G Minor",
            Scale::BMajorAFlatMinor => "B Major / G♯/A♭ Minor",
        }
    }

    /// Parse the wire name (`C_MAJOR_A_MINOR`, case-insensitive).
    pub fn from_wire_name(name: &str) -> Option<Self> {
        let quoted = format!("\"{}\"", name.to_ascii_uppercase());
        serde_json::from_str(&quoted).ok()
    }
}

// ---------------------------------------------------------------------------
// GenerationConfig
// ---------------------------------------------------------------------------

/// The full set of generation tunables.  Defaults to everything auto.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub temperature: Tunable<f32>,
    pub top_k: Tunable<u32>,
    pub guidance: Tunable<f32>,
    pub seed: Tunable<u32>,
    pub bpm: Tunable<u32>,
    pub density: Tunable<f32>,
    pub brightness: Tunable<f32>,
    pub scale: Tunable<Scale>,
    pub mute_bass: Tunable<bool>,
    pub mute_drums: Tunable<bool>,
    pub only_bass_and_drums: Tunable<bool>,
}

impl GenerationConfig {
    /// Merge `patch` into this config, clamping pinned values into range.
    /// A non-finite float leaves its field unchanged.
    pub fn apply(&mut self, patch: &GenerationPatch) {
        fn merge<T: Copy>(
            slot: &mut Tunable<T>,
            update: Option<Tunable<T>>,
            fix: impl Fn(T) -> Option<T>,
        ) {
            match update {
                None => {}
                Some(Tunable::Auto) => *slot = Tunable::Auto,
                Some(Tunable::Pinned(v)) => match fix(v) {
                    Some(v) => *slot = Tunable::Pinned(v),
                    None => log::warn!("control: ignoring non-finite generation value"),
                },
            }
        }
        fn range(lo: f32, hi: f32) -> impl Fn(f32) -> Option<f32> {
            move |v| v.is_finite().then(|| v.clamp(lo, hi))
        }

        merge(&mut self.temperature, patch.temperature, range(0.0, 3.0));
        merge(&mut self.top_k, patch.top_k, |v| Some(v.clamp(1, 1000)));
        merge(&mut self.guidance, patch.guidance, range(0.0, 6.0));
        merge(&mut self.seed, patch.seed, Some);
        merge(&mut self.bpm, patch.bpm, |v| Some(v.clamp(60, 200)));
        merge(&mut self.density, patch.density, range(0.0, 1.0));
        merge(&mut self.brightness, patch.brightness, range(0.0, 1.0));
        merge(&mut self.scale, patch.scale, Some);
        merge(&mut self.mute_bass, patch.mute_bass, Some);
        merge(&mut self.mute_drums, patch.mute_drums, Some);
        merge(&mut self.only_bass_and_drums, patch.only_bass_and_drums, Some);
    }

    /// The config as pushed to the service; auto fields are left out, and so
    /// are non-finite floats (a hand-edited `settings.toml` can hold `nan`).
    pub fn to_wire(&self) -> WireConfig {
        let finite = |t: Tunable<f32>| t.pinned().filter(|v| v.is_finite());
        WireConfig {
            temperature: finite(self.temperature),
            top_k: self.top_k.pinned(),
            guidance: finite(self.guidance),
            seed: self.seed.pinned(),
            bpm: self.bpm.pinned(),
            density: finite(self.density),
            brightness: finite(self.brightness),
            scale: self.scale.pinned(),
            mute_bass: self.mute_bass.pinned(),
            mute_drums: self.mute_drums.pinned(),
            only_bass_and_drums: self.only_bass_and_drums.pinned(),
        }
    }
}

/// `musicGenerationConfig` payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guidance: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bpm: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub density: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brightness: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scale: Option<Scale>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mute_bass: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mute_drums: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub only_bass_and_drums: Option<bool>,
}

// ---------------------------------------------------------------------------
// GenerationPatch
// ---------------------------------------------------------------------------

/// A partial update: `None` leaves a field alone, `Some(Auto)` un-pins it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationPatch {
    pub temperature: Option<Tunable<f32>>,
    pub top_k: Option<Tunable<u32>>,
    pub guidance: Option<Tunable<f32>>,
    pub seed: Option<Tunable<u32>>,
    pub bpm: Option<Tunable<u32>>,
    pub density: Option<Tunable<f32>>,
    pub brightness: Option<Tunable<f32>>,
    pub scale: Option<Tunable<Scale>>,
    pub mute_bass: Option<Tunable<bool>>,
    pub mute_drums: Option<Tunable<bool>>,
    pub only_bass_and_drums: Option<Tunable<bool>>,
}

/// Reason a textual field update could not be parsed.
#[derive(Debug, Error, PartialEq)]
pub enum PatchError {
    #[error("unknown generation field: {0}")]
    UnknownField(String),

    #[error("invalid value {value:?} for {field}")]
    InvalidValue { field: String, value: String },
}

impl GenerationPatch {
    /// Build a single-field patch from `field` and a textual `value`.
    ///
    /// `value` may be `auto` to un-pin the field.  Field names accept both
    /// `snake_case` and the wire's `camelCase`.
    ///
    /// ```
    /// use promptdj::control::{GenerationPatch, Tunable};
    ///
    /// let patch = GenerationPatch::parse("bpm", "120").unwrap();
    /// assert_eq!(patch.bpm, Some(Tunable::Pinned(120)));
    ///
    /// let patch = GenerationPatch::parse("density", "auto").unwrap();
    /// assert_eq!(patch.density, Some(Tunable::Auto));
    /// ```
    pub fn parse(field: &str, value: &str) -> Result<Self, PatchError> {
        fn tunable<T>(
            field: &str,
            value: &str,
            parse: impl Fn(&str) -> Option<T>,
        ) -> Result<Option<Tunable<T>>, PatchError> {
            if value.eq_ignore_ascii_case("auto") {
                return Ok(Some(Tunable::Auto));
            }
            parse(value)
                .map(|v| Some(Tunable::Pinned(v)))
                .ok_or_else(|| PatchError::InvalidValue {
                    field: field.to_string(),
                    value: value.to_string(),
                })
        }
        let float = |v: &str| v.parse::<f32>().ok().filter(|f| f.is_finite());
        let int = |v: &str| v.parse::<u32>().ok();
        let boolean = |v: &str| match v.to_ascii_lowercase().as_str() {
            "true" | "on" | "1" | "yes" => Some(true),
            "false" | "off" | "0" | "no" => Some(false),
            _ => None,
        };

        let mut patch = Self::default();
        match field {
            "temperature" => patch.temperature = tunable(field, value, float)?,
            "top_k" | "topK" => patch.top_k = tunable(field, value, int)?,
            "guidance" => patch.guidance = tunable(field, value, float)?,
            "seed" => patch.seed = tunable(field, value, int)?,
            "bpm" => patch.bpm = tunable(field, value, int)?,
            "density" => patch.density = tunable(field, value, float)?,
            "brightness" => patch.brightness = tunable(field, value, float)?,
            "scale" => patch.scale = tunable(field, value, Scale::from_wire_name)?,
            "mute_bass" | "muteBass" => patch.mute_bass = tunable(field, value, boolean)?,
            "mute_drums" | "muteDrums" => patch.mute_drums = tunable(field, value, boolean)?,
            "only_bass_and_drums" | "onlyBassAndDrums" => {
                patch.only_bass_and_drums = tunable(field, value, boolean)?
            }
            other => return Err(PatchError::UnknownField(other.to_string())),
        }
        Ok(patch)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_all_auto_and_empty_on_wire() {
        let cfg = GenerationConfig::default();
        assert!(cfg.density.is_auto());
        assert!(cfg.brightness.is_auto());
        let json = serde_json::to_string(&cfg.to_wire()).unwrap();
        assert_eq!(json, "{}");
    }

    #[test]
    fn pinned_fields_use_wire_names() {
        let mut cfg = GenerationConfig::default();
        cfg.apply(&GenerationPatch {
            top_k: Some(Tunable::Pinned(40)),
            scale: Some(Tunable::Pinned(Scale::DFlatMajorBFlatMinor)),
            only_bass_and_drums: Some(Tunable::Pinned(true)),
            ..Default::default()
        });
        let json = serde_json::to_value(cfg.to_wire()).unwrap();
        assert_eq!(json["topK"], 40);
        assert_eq!(json["scale"], "D_FLAT_MAJOR_B_FLAT_MINOR");
        assert_eq!(json["onlyBassAndDrums"], true);
        assert!(json.get("density").is_none());
    }

    #[test]
    fn apply_clamps_and_unpins() {
        let mut cfg = GenerationConfig::default();
        cfg.apply(&GenerationPatch {
            bpm: Some(Tunable::Pinned(400)),
            density: Some(Tunable::Pinned(1.7)),
            ..Default::default()
        });
        assert_eq!(cfg.bpm, Tunable::Pinned(200));
        assert_eq!(cfg.density, Tunable::Pinned(1.0));

        cfg.apply(&GenerationPatch {
            density: Some(Tunable::Auto),
            ..Default::default()
        });
        assert!(cfg.density.is_auto());
        assert_eq!(cfg.bpm, Tunable::Pinned(200));
    }

    #[test]
    fn parse_accepts_camel_case_and_rejects_garbage() {
        let patch = GenerationPatch::parse("muteDrums", "on").unwrap();
        assert_eq!(patch.mute_drums, Some(Tunable::Pinned(true)));

        let patch = GenerationPatch::parse("scale", "g_major_e_minor").unwrap();
        assert_eq!(patch.scale, Some(Tunable::Pinned(Scale::GMajorEMinor)));

        assert_eq!(
            GenerationPatch::parse("volume", "3"),
            Err(PatchError::UnknownField("volume".into()))
        );
        assert!(matches!(
            GenerationPatch::parse("bpm", "fast"),
            Err(PatchError::InvalidValue { .. })
        ));
    }

    #[test]
    fn non_finite_values_never_reach_the_wire() {
        for text in ["NaN", "inf", "-inf"] {
            assert!(matches!(
                GenerationPatch::parse("temperature", text),
                Err(PatchError::InvalidValue { .. })
            ));
        }

        let mut cfg = GenerationConfig::default();
        cfg.apply(&GenerationPatch::parse("temperature", "1.5").unwrap());
        cfg.apply(&GenerationPatch {
            temperature: Some(Tunable::Pinned(f32::NAN)),
            density: Some(Tunable::Pinned(f32::INFINITY)),
            ..Default::default()
        });
        assert_eq!(cfg.temperature, Tunable::Pinned(1.5));
        assert!(cfg.density.is_auto());

        cfg.brightness = Tunable::Pinned(f32::NAN);
        let json = serde_json::to_value(cfg.to_wire()).unwrap();
        assert_eq!(json["temperature"], 1.5);
        assert!(json.get("brightness").is_none());
    }

    #[test]
    fn every_scale_round_trips_its_wire_name() {
        for scale in Scale::ALL {
            let name = serde_json::to_value(scale).unwrap();
            let name = name.as_str().unwrap();
            assert_eq!(Scale::from_wire_name(name), Some(scale));
        }
    }
}
