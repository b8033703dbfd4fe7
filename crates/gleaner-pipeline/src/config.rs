//! Run configuration and transform profiles.
//!
//! Everything here is a closed, serde-deserializable structure with
//! named fields. Unknown keys are rejected at load time and
//! [`PrepareConfig::validate`] rejects out-of-range values before the
//! driver touches the filesystem.

use std::collections::BTreeSet;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::codec::GeometryFormat;
use crate::split::SplitFractions;
pub use crate::split::{DEFAULT_TEST_FRAC, DEFAULT_TRAIN_FRAC, DEFAULT_VAL_FRAC};
use crate::types::DatasetError;

/// Default shuffle seed.
pub const DEFAULT_SEED: u64 = 42;
/// Default multiplier on the per-class average image count.
pub const DEFAULT_BALANCE_FACTOR: f64 = 1.5;
/// Default minimum fraction of a transformed instance left inside the frame.
pub const DEFAULT_MIN_VISIBILITY: f64 = 0.3;
/// Default minimum bounding area of a transformed instance, in px².
pub const DEFAULT_MIN_AREA: f64 = 16.0;
/// Default minimum bounding width/height of a transformed instance, in px.
pub const DEFAULT_MIN_SIDE: f64 = 4.0;
/// Default attempt budget per missing sample.
pub const DEFAULT_ATTEMPTS_PER_SAMPLE: u32 = 10;

fn invalid(msg: impl Into<String>) -> DatasetError {
    DatasetError::InvalidConfig(msg.into())
}

fn check_probability(name: &str, p: f64) -> Result<(), DatasetError> {
    if p.is_finite() && (0.0..=1.0).contains(&p) {
        Ok(())
    } else {
        Err(invalid(format!("{name}.p must lie in [0, 1], got {p}")))
    }
}

/// Closed numeric interval `[lo, hi]` a parameter is drawn from.
///
/// Serialized as a two-element array.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParamRange(pub f64, pub f64);

impl ParamRange {
    /// Create a range.
    #[must_use]
    pub const fn new(lo: f64, hi: f64) -> Self {
        Self(lo, hi)
    }

    /// A degenerate range that always yields `value`.
    #[must_use]
    pub const fn fixed(value: f64) -> Self {
        Self(value, value)
    }

    /// Draw a value uniformly from the range.
    pub fn sample<R: Rng + ?Sized>(self, rng: &mut R) -> f64 {
        if self.0 < self.1 {
            rng.gen_range(self.0..=self.1)
        } else {
            self.0
        }
    }

    fn check(self, name: &str, min: f64, max: f64) -> Result<(), DatasetError> {
        let Self(lo, hi) = self;
        if !lo.is_finite() || !hi.is_finite() {
            return Err(invalid(format!("{name} must be finite, got [{lo}, {hi}]")));
        }
        if lo > hi {
            return Err(invalid(format!("{name} has lo > hi: [{lo}, {hi}]")));
        }
        if lo < min || hi > max {
            return Err(invalid(format!(
                "{name} must lie in [{min}, {max}], got [{lo}, {hi}]"
            )));
        }
        Ok(())
    }
}

/// Inclusive integer count range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountRange(pub u32, pub u32);

impl CountRange {
    /// Draw a count uniformly from the range.
    pub fn sample<R: Rng + ?Sized>(self, rng: &mut R) -> u32 {
        if self.0 < self.1 {
            rng.gen_range(self.0..=self.1)
        } else {
            self.0
        }
    }

    fn check(self, name: &str) -> Result<(), DatasetError> {
        if self.0 > self.1 {
            return Err(invalid(format!(
                "{name} has min > max: [{}, {}]",
                self.0, self.1
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Geometric operators
// ---------------------------------------------------------------------------

/// An operator with no parameters beyond its probability (flips).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Toggle {
    /// Probability of applying the operator.
    pub p: f64,
}

/// Affine transform about the image center.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AffineOp {
    /// Probability of applying the operator.
    pub p: f64,
    /// Isotropic zoom factor.
    pub scale: ParamRange,
    /// Rotation in degrees.
    pub rotate: ParamRange,
    /// Horizontal shear in degrees.
    pub shear: ParamRange,
    /// Translation as a fraction of width/height.
    pub translate: ParamRange,
}

/// Random four-corner perspective warp.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PerspectiveOp {
    /// Probability of applying the operator.
    pub p: f64,
    /// Corner jitter as a fraction of width/height.
    pub scale: ParamRange,
}

/// Smooth random displacement field.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ElasticOp {
    /// Probability of applying the operator.
    pub p: f64,
    /// Peak displacement as a fraction of the shorter image side.
    pub amplitude: ParamRange,
    /// Displacement wavelength as a fraction of the shorter image side.
    pub wavelength: ParamRange,
}

/// Radial barrel/pincushion lens distortion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OpticalOp {
    /// Probability of applying the operator.
    pub p: f64,
    /// Radial coefficient; positive is barrel, negative pincushion.
    pub distort: ParamRange,
    /// Distortion center shift as a fraction of width/height.
    pub shift: ParamRange,
}

/// Geometric operators of a profile. `None` disables an operator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GeometricOps {
    /// Horizontal flip.
    pub hflip: Option<Toggle>,
    /// Vertical flip.
    pub vflip: Option<Toggle>,
    /// Scale, rotate, shear and translate.
    pub affine: Option<AffineOp>,
    /// Perspective warp.
    pub perspective: Option<PerspectiveOp>,
    /// Elastic distortion.
    pub elastic: Option<ElasticOp>,
    /// Optical (lens) distortion.
    pub optical: Option<OpticalOp>,
}

impl GeometricOps {
    fn validate(&self, profile: &str) -> Result<(), DatasetError> {
        for (name, flip) in [("hflip", self.hflip), ("vflip", self.vflip)] {
            if let Some(t) = flip {
                check_probability(&format!("{profile}.{name}"), t.p)?;
            }
        }
        if let Some(op) = &self.affine {
            let n = format!("{profile}.affine");
            check_probability(&n, op.p)?;
            op.scale.check(&format!("{n}.scale"), 0.1, 10.0)?;
            op.rotate.check(&format!("{n}.rotate"), -180.0, 180.0)?;
            op.shear.check(&format!("{n}.shear"), -45.0, 45.0)?;
            op.translate.check(&format!("{n}.translate"), -1.0, 1.0)?;
        }
        if let Some(op) = &self.perspective {
            let n = format!("{profile}.perspective");
            check_probability(&n, op.p)?;
            op.scale.check(&format!("{n}.scale"), 0.0, 0.45)?;
        }
        if let Some(op) = &self.elastic {
            let n = format!("{profile}.elastic");
            check_probability(&n, op.p)?;
            op.amplitude.check(&format!("{n}.amplitude"), 0.0, 0.25)?;
            op.wavelength.check(&format!("{n}.wavelength"), 0.01, 10.0)?;
        }
        if let Some(op) = &self.optical {
            let n = format!("{profile}.optical");
            check_probability(&n, op.p)?;
            op.distort.check(&format!("{n}.distort"), -0.5, 0.5)?;
            op.shift.check(&format!("{n}.shift"), -0.5, 0.5)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Photometric operators
// ---------------------------------------------------------------------------

/// A photometric operator drawing one value from a range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RangeOp {
    /// Probability of applying the operator.
    pub p: f64,
    /// Parameter range; the unit depends on the operator.
    pub range: ParamRange,
}

impl RangeOp {
    /// Create an operator.
    #[must_use]
    pub const fn new(p: f64, lo: f64, hi: f64) -> Self {
        Self {
            p,
            range: ParamRange::new(lo, hi),
        }
    }
}

/// Rectangular occluding holes filled with a constant color.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DropoutOp {
    /// Probability of applying the operator.
    pub p: f64,
    /// Number of holes.
    pub holes: CountRange,
    /// Hole side as a fraction of width/height.
    pub size: ParamRange,
    /// Fill gray level.
    pub fill: u8,
}

/// Contrast-limited adaptive histogram equalization of luma.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClaheOp {
    /// Probability of applying the operator.
    pub p: f64,
    /// Histogram clip limit, as a multiple of the mean bin height.
    pub clip_limit: ParamRange,
    /// Tiles along each image axis.
    pub tiles: u32,
}

/// Linear motion blur along a random direction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MotionBlurOp {
    /// Probability of applying the operator.
    pub p: f64,
    /// Kernel side in pixels; even draws are rounded up to odd.
    pub kernel: CountRange,
}

/// Soil and debris splashes: semi-opaque mud-colored spots.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SpatterOp {
    /// Probability of applying the operator.
    pub p: f64,
    /// Number of spots.
    pub spots: CountRange,
    /// Spot radius as a fraction of the shorter image side.
    pub radius: ParamRange,
    /// Blend weight of the mud color.
    pub opacity: ParamRange,
}

/// Uniform haze blended toward white.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FogOp {
    /// Probability of applying the operator.
    pub p: f64,
    /// Blend coefficient toward the fog color.
    pub coef: ParamRange,
}

/// Slanted rain streaks plus overall dimming.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RainOp {
    /// Probability of applying the operator.
    pub p: f64,
    /// Streak slant in degrees from vertical.
    pub slant: ParamRange,
    /// Streak length as a fraction of image height.
    pub drop_length: f64,
    /// Streaks per 10 000 pixels.
    pub density: f64,
    /// Brightness multiplier applied under the rain.
    pub brightness: f64,
}

/// Bright additive disc in the upper part of the frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FlareOp {
    /// Probability of applying the operator.
    pub p: f64,
    /// Radius as a fraction of image width.
    pub radius: ParamRange,
    /// Peak additive intensity in `[0, 1]`.
    pub intensity: ParamRange,
}

/// Dark random quadrilaterals in the lower part of the frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ShadowOp {
    /// Probability of applying the operator.
    pub p: f64,
    /// Number of shadows.
    pub count: CountRange,
    /// Brightness multiplier inside a shadow.
    pub darkness: ParamRange,
}

/// Photometric operators of a profile. `None` disables an operator.
///
/// Units: brightness and contrast are signed fractions, hue is degrees,
/// saturation is a signed fraction, gamma is the exponent, blur is the
/// Gaussian sigma in pixels and noise is the variance in gray levels².
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PhotometricOps {
    /// Additive brightness shift.
    pub brightness: Option<RangeOp>,
    /// Contrast gain around mid-gray.
    pub contrast: Option<RangeOp>,
    /// Hue rotation.
    pub hue: Option<RangeOp>,
    /// Saturation gain.
    pub saturation: Option<RangeOp>,
    /// Gamma curve.
    pub gamma: Option<RangeOp>,
    /// Local contrast equalization.
    pub clahe: Option<ClaheOp>,
    /// Gaussian blur.
    pub blur: Option<RangeOp>,
    /// Motion blur.
    pub motion_blur: Option<MotionBlurOp>,
    /// Additive Gaussian noise.
    pub noise: Option<RangeOp>,
    /// Coarse dropout.
    pub dropout: Option<DropoutOp>,
    /// Mud spatter.
    pub spatter: Option<SpatterOp>,
    /// Fog.
    pub fog: Option<FogOp>,
    /// Rain.
    pub rain: Option<RainOp>,
    /// Sun flare.
    pub sun_flare: Option<FlareOp>,
    /// Shadows.
    pub shadow: Option<ShadowOp>,
}

impl PhotometricOps {
    fn validate(&self, profile: &str) -> Result<(), DatasetError> {
        let ranged = [
            ("brightness", self.brightness, -1.0, 1.0),
            ("contrast", self.contrast, -0.99, 3.0),
            ("hue", self.hue, -180.0, 180.0),
            ("saturation", self.saturation, -1.0, 3.0),
            ("gamma", self.gamma, 0.05, 10.0),
            ("blur", self.blur, 0.0, 50.0),
            ("noise", self.noise, 0.0, 10_000.0),
        ];
        for (name, op, min, max) in ranged {
            if let Some(op) = op {
                let n = format!("{profile}.{name}");
                check_probability(&n, op.p)?;
                op.range.check(&format!("{n}.range"), min, max)?;
            }
        }
        if let Some(op) = &self.clahe {
            let n = format!("{profile}.clahe");
            check_probability(&n, op.p)?;
            op.clip_limit.check(&format!("{n}.clip_limit"), 1.0, 40.0)?;
            if !(1..=64).contains(&op.tiles) {
                return Err(invalid(format!(
                    "{n}.tiles must lie in [1, 64], got {}",
                    op.tiles
                )));
            }
        }
        if let Some(op) = &self.motion_blur {
            let n = format!("{profile}.motion_blur");
            check_probability(&n, op.p)?;
            op.kernel.check(&format!("{n}.kernel"))?;
            if op.kernel.0 < 3 || op.kernel.1 > 63 {
                return Err(invalid(format!(
                    "{n}.kernel must lie in [3, 63], got [{}, {}]",
                    op.kernel.0, op.kernel.1
                )));
            }
        }
        if let Some(op) = &self.dropout {
            let n = format!("{profile}.dropout");
            check_probability(&n, op.p)?;
            op.holes.check(&format!("{n}.holes"))?;
            op.size.check(&format!("{n}.size"), 0.0, 1.0)?;
        }
        if let Some(op) = &self.spatter {
            let n = format!("{profile}.spatter");
            check_probability(&n, op.p)?;
            op.spots.check(&format!("{n}.spots"))?;
            op.radius.check(&format!("{n}.radius"), 0.0, 0.5)?;
            op.opacity.check(&format!("{n}.opacity"), 0.0, 1.0)?;
        }
        if let Some(op) = &self.fog {
            let n = format!("{profile}.fog");
            check_probability(&n, op.p)?;
            op.coef.check(&format!("{n}.coef"), 0.0, 1.0)?;
        }
        if let Some(op) = &self.rain {
            let n = format!("{profile}.rain");
            check_probability(&n, op.p)?;
            op.slant.check(&format!("{n}.slant"), -60.0, 60.0)?;
            let scalars = [
                ("drop_length", op.drop_length, 0.0, 1.0),
                ("density", op.density, 0.0, 10_000.0),
                ("brightness", op.brightness, 0.0, 1.0),
            ];
            for (field, v, min, max) in scalars {
                if !(v.is_finite() && (min..=max).contains(&v)) {
                    return Err(invalid(format!(
                        "{n}.{field} must lie in [{min}, {max}], got {v}"
                    )));
                }
            }
        }
        if let Some(op) = &self.sun_flare {
            let n = format!("{profile}.sun_flare");
            check_probability(&n, op.p)?;
            op.radius.check(&format!("{n}.radius"), 0.0, 2.0)?;
            op.intensity.check(&format!("{n}.intensity"), 0.0, 1.0)?;
        }
        if let Some(op) = &self.shadow {
            let n = format!("{profile}.shadow");
            check_probability(&n, op.p)?;
            op.count.check(&format!("{n}.count"))?;
            op.darkness.check(&format!("{n}.darkness"), 0.0, 1.0)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Profiles
// ---------------------------------------------------------------------------

/// A named set of geometric and photometric operators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransformProfile {
    /// Profile name, unique within a configuration.
    pub name: String,
    /// Geometric stage.
    #[serde(default)]
    pub geometric: GeometricOps,
    /// Photometric stage.
    #[serde(default)]
    pub photometric: PhotometricOps,
}

impl TransformProfile {
    /// Names of the built-in profiles.
    pub const BUILTIN: [&'static str; 8] = [
        "default",
        "strong-geometric",
        "field",
        "overcast",
        "rainy",
        "midday",
        "evening",
        "windy",
    ];

    /// A profile that changes nothing.
    #[must_use]
    pub fn identity() -> Self {
        Self {
            name: "identity".to_string(),
            geometric: GeometricOps::default(),
            photometric: PhotometricOps::default(),
        }
    }

    /// Mild lighting change with a small rotation and zoom.
    #[must_use]
    pub fn default_profile() -> Self {
        Self {
            name: "default".to_string(),
            geometric: GeometricOps {
                hflip: Some(Toggle { p: 0.5 }),
                affine: Some(AffineOp {
                    p: 0.6,
                    scale: ParamRange::new(0.95, 1.05),
                    rotate: ParamRange::new(-5.0, 5.0),
                    shear: ParamRange::fixed(0.0),
                    translate: ParamRange::fixed(0.0),
                }),
                ..GeometricOps::default()
            },
            photometric: PhotometricOps {
                brightness: Some(RangeOp::new(0.8, -0.2, 0.2)),
                contrast: Some(RangeOp::new(0.8, -0.2, 0.2)),
                ..PhotometricOps::default()
            },
        }
    }

    /// Viewpoint changes: flips, affine, perspective and lens/elastic
    /// distortion.
    #[must_use]
    pub fn strong_geometric() -> Self {
        Self {
            name: "strong-geometric".to_string(),
            geometric: GeometricOps {
                hflip: Some(Toggle { p: 0.5 }),
                vflip: Some(Toggle { p: 0.2 }),
                affine: Some(AffineOp {
                    p: 0.9,
                    scale: ParamRange::new(0.9, 1.1),
                    rotate: ParamRange::new(-10.0, 10.0),
                    shear: ParamRange::new(-5.0, 5.0),
                    translate: ParamRange::new(-0.1, 0.1),
                }),
                perspective: Some(PerspectiveOp {
                    p: 0.4,
                    scale: ParamRange::new(0.05, 0.15),
                }),
                elastic: Some(ElasticOp {
                    p: 0.3,
                    amplitude: ParamRange::new(0.005, 0.02),
                    wavelength: ParamRange::new(0.3, 0.8),
                }),
                optical: Some(OpticalOp {
                    p: 0.2,
                    distort: ParamRange::new(-0.1, 0.1),
                    shift: ParamRange::new(-0.05, 0.05),
                }),
            },
            photometric: PhotometricOps::default(),
        }
    }

    /// Outdoor field conditions: lighting, weather, camera and occlusion
    /// effects plus moderate viewpoint changes.
    #[must_use]
    pub fn field() -> Self {
        let viewpoint = Self::strong_geometric().geometric;
        Self {
            name: "field".to_string(),
            geometric: GeometricOps {
                affine: viewpoint.affine.map(|a| AffineOp { p: 0.6, ..a }),
                ..viewpoint
            },
            photometric: PhotometricOps {
                brightness: Some(RangeOp::new(0.8, -0.3, 0.4)),
                contrast: Some(RangeOp::new(0.8, -0.2, 0.3)),
                hue: Some(RangeOp::new(0.7, -10.0, 10.0)),
                saturation: Some(RangeOp::new(0.7, -0.2, 0.3)),
                gamma: Some(RangeOp::new(0.4, 0.8, 1.4)),
                blur: Some(RangeOp::new(0.4, 0.3, 1.2)),
                noise: Some(RangeOp::new(0.3, 5.0, 30.0)),
                dropout: Some(DropoutOp {
                    p: 0.3,
                    holes: CountRange(1, 8),
                    size: ParamRange::new(0.03, 0.1),
                    fill: 0,
                }),
                spatter: Some(SpatterOp {
                    p: 0.15,
                    spots: CountRange(4, 16),
                    radius: ParamRange::new(0.005, 0.025),
                    opacity: ParamRange::new(0.4, 0.8),
                }),
                fog: Some(FogOp {
                    p: 0.05,
                    coef: ParamRange::new(0.01, 0.1),
                }),
                rain: Some(RainOp {
                    p: 0.1,
                    slant: ParamRange::new(-10.0, 10.0),
                    drop_length: 0.04,
                    density: 8.0,
                    brightness: 0.9,
                }),
                sun_flare: Some(FlareOp {
                    p: 0.05,
                    radius: ParamRange::new(0.1, 0.3),
                    intensity: ParamRange::new(0.3, 0.7),
                }),
                shadow: Some(ShadowOp {
                    p: 0.2,
                    count: CountRange(1, 2),
                    darkness: ParamRange::new(0.5, 0.8),
                }),
                ..PhotometricOps::default()
            },
        }
    }

    /// Flat, dim light with slight softening.
    #[must_use]
    pub fn overcast() -> Self {
        Self {
            name: "overcast".to_string(),
            geometric: GeometricOps {
                hflip: Some(Toggle { p: 0.5 }),
                ..GeometricOps::default()
            },
            photometric: PhotometricOps {
                brightness: Some(RangeOp::new(1.0, -0.2, 0.0)),
                contrast: Some(RangeOp::new(1.0, -0.2, 0.0)),
                gamma: Some(RangeOp::new(0.7, 1.0, 1.4)),
                clahe: Some(ClaheOp {
                    p: 0.5,
                    clip_limit: ParamRange::new(1.0, 2.0),
                    tiles: 8,
                }),
                blur: Some(RangeOp::new(0.3, 0.3, 0.8)),
                fog: Some(FogOp {
                    p: 0.3,
                    coef: ParamRange::new(0.05, 0.2),
                }),
                ..PhotometricOps::default()
            },
        }
    }

    /// Heavy rain: streaks, darkening and blur.
    #[must_use]
    pub fn rainy() -> Self {
        Self {
            name: "rainy".to_string(),
            geometric: GeometricOps {
                hflip: Some(Toggle { p: 0.5 }),
                ..GeometricOps::default()
            },
            photometric: PhotometricOps {
                brightness: Some(RangeOp::new(1.0, -0.3, 0.0)),
                contrast: Some(RangeOp::new(1.0, -0.1, 0.0)),
                blur: Some(RangeOp::new(0.8, 0.5, 1.0)),
                rain: Some(RainOp {
                    p: 1.0,
                    slant: ParamRange::new(-10.0, 10.0),
                    drop_length: 0.05,
                    density: 15.0,
                    brightness: 0.8,
                }),
                ..PhotometricOps::default()
            },
        }
    }

    /// Bright midday sun with vivid color and occasional flare.
    #[must_use]
    pub fn midday() -> Self {
        Self {
            name: "midday".to_string(),
            geometric: GeometricOps {
                hflip: Some(Toggle { p: 0.5 }),
                ..GeometricOps::default()
            },
            photometric: PhotometricOps {
                brightness: Some(RangeOp::new(1.0, 0.0, 0.4)),
                contrast: Some(RangeOp::new(1.0, 0.0, 0.3)),
                saturation: Some(RangeOp::new(0.7, 0.0, 0.2)),
                sun_flare: Some(FlareOp {
                    p: 0.3,
                    radius: ParamRange::new(0.1, 0.3),
                    intensity: ParamRange::new(0.4, 0.8),
                }),
                ..PhotometricOps::default()
            },
        }
    }

    /// Low sun in the early morning or late afternoon: warm hue shift,
    /// muted color and a gamma lift.
    #[must_use]
    pub fn evening() -> Self {
        Self {
            name: "evening".to_string(),
            geometric: GeometricOps {
                hflip: Some(Toggle { p: 0.5 }),
                ..GeometricOps::default()
            },
            photometric: PhotometricOps {
                hue: Some(RangeOp::new(1.0, -20.0, 20.0)),
                saturation: Some(RangeOp::new(1.0, -0.1, 0.0)),
                gamma: Some(RangeOp::new(0.7, 0.6, 1.0)),
                ..PhotometricOps::default()
            },
        }
    }

    /// Wind-moved foliage: elastic distortion and motion blur.
    #[must_use]
    pub fn windy() -> Self {
        Self {
            name: "windy".to_string(),
            geometric: GeometricOps {
                hflip: Some(Toggle { p: 0.5 }),
                elastic: Some(ElasticOp {
                    p: 1.0,
                    amplitude: ParamRange::new(0.01, 0.03),
                    wavelength: ParamRange::new(0.4, 1.0),
                }),
                ..GeometricOps::default()
            },
            photometric: PhotometricOps {
                motion_blur: Some(MotionBlurOp {
                    p: 0.6,
                    kernel: CountRange(3, 5),
                }),
                ..PhotometricOps::default()
            },
        }
    }

    /// Look up a built-in profile by name.
    #[must_use]
    pub fn named(name: &str) -> Option<Self> {
        match name {
            "identity" => Some(Self::identity()),
            "default" => Some(Self::default_profile()),
            "strong-geometric" => Some(Self::strong_geometric()),
            "field" => Some(Self::field()),
            "overcast" => Some(Self::overcast()),
            "rainy" => Some(Self::rainy()),
            "midday" => Some(Self::midday()),
            "evening" => Some(Self::evening()),
            "windy" => Some(Self::windy()),
            _ => None,
        }
    }

    /// Whether any geometric operator is enabled.
    #[must_use]
    pub const fn has_geometry(&self) -> bool {
        let g = &self.geometric;
        g.hflip.is_some()
            || g.vflip.is_some()
            || g.affine.is_some()
            || g.perspective.is_some()
            || g.elastic.is_some()
            || g.optical.is_some()
    }

    /// Validate every enabled operator.
    ///
    /// # Errors
    ///
    /// Returns [`DatasetError::InvalidConfig`] naming the offending field.
    pub fn validate(&self) -> Result<(), DatasetError> {
        if self.name.trim().is_empty() {
            return Err(invalid("profile name must not be empty"));
        }
        self.geometric.validate(&self.name)?;
        self.photometric.validate(&self.name)
    }
}

/// Profiles used when a configuration names none.
#[must_use]
pub fn default_profiles() -> Vec<TransformProfile> {
    vec![
        TransformProfile::default_profile(),
        TransformProfile::strong_geometric(),
        TransformProfile::field(),
        TransformProfile::overcast(),
        TransformProfile::rainy(),
    ]
}

// ---------------------------------------------------------------------------
// Run configuration
// ---------------------------------------------------------------------------

/// Drop thresholds for co-transformed instances.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Minimum fraction of the mapped area left inside the frame.
    pub min_visibility: f64,
    /// Minimum bounding area in px².
    pub min_area: f64,
    /// Minimum bounding width and height in px.
    pub min_side: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            min_visibility: DEFAULT_MIN_VISIBILITY,
            min_area: DEFAULT_MIN_AREA,
            min_side: DEFAULT_MIN_SIDE,
        }
    }
}

/// Parameters of the balancing loop.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BalanceConfig {
    /// Multiplier on the per-class average image count.
    pub balance_factor: f64,
    /// Attempts allowed per missing sample before giving up on a class.
    pub attempts_per_sample: u32,
}

impl Default for BalanceConfig {
    fn default() -> Self {
        Self {
            balance_factor: DEFAULT_BALANCE_FACTOR,
            attempts_per_sample: DEFAULT_ATTEMPTS_PER_SAMPLE,
        }
    }
}

/// Full configuration of a `prepare` run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PrepareConfig {
    /// Training share.
    pub train_frac: f64,
    /// Validation share.
    pub val_frac: f64,
    /// Test share.
    pub test_frac: f64,
    /// Seed for the split shuffle and all augmentation draws.
    pub seed: u64,
    /// Multiplier on the per-class average image count. Must be > 0.
    pub balance_factor: f64,
    /// Minimum visible fraction of a transformed instance.
    pub min_visibility: f64,
    /// Minimum bounding area of a transformed instance, px².
    pub min_area: f64,
    /// Minimum bounding side of a transformed instance, px.
    pub min_side: f64,
    /// Attempt budget per missing sample. Must be >= 1.
    pub attempts_per_sample: u32,
    /// Geometry form written to the output labels.
    pub output_format: GeometryFormat,
    /// Transform profiles drawn from uniformly. Must not be empty.
    pub profiles: Vec<TransformProfile>,
    /// Class names to remove before splitting.
    pub remove_classes: Vec<String>,
    /// Explicit class names in id order.
    pub class_names: Option<Vec<String>>,
}

impl Default for PrepareConfig {
    fn default() -> Self {
        let fractions = SplitFractions::default();
        let filter = FilterConfig::default();
        let balance = BalanceConfig::default();
        Self {
            train_frac: fractions.train,
            val_frac: fractions.val,
            test_frac: fractions.test,
            seed: DEFAULT_SEED,
            balance_factor: balance.balance_factor,
            min_visibility: filter.min_visibility,
            min_area: filter.min_area,
            min_side: filter.min_side,
            attempts_per_sample: balance.attempts_per_sample,
            output_format: GeometryFormat::default(),
            profiles: default_profiles(),
            remove_classes: Vec::new(),
            class_names: None,
        }
    }
}

impl PrepareConfig {
    /// Split fractions.
    #[must_use]
    pub const fn fractions(&self) -> SplitFractions {
        SplitFractions::new(self.train_frac, self.val_frac, self.test_frac)
    }

    /// Instance drop thresholds.
    #[must_use]
    pub const fn filter(&self) -> FilterConfig {
        FilterConfig {
            min_visibility: self.min_visibility,
            min_area: self.min_area,
            min_side: self.min_side,
        }
    }

    /// Balancing loop parameters.
    #[must_use]
    pub const fn balance(&self) -> BalanceConfig {
        BalanceConfig {
            balance_factor: self.balance_factor,
            attempts_per_sample: self.attempts_per_sample,
        }
    }

    /// Class names to remove, deduplicated.
    #[must_use]
    pub fn removal_set(&self) -> BTreeSet<String> {
        self.remove_classes.iter().cloned().collect()
    }

    /// Reject out-of-range values.
    ///
    /// # Errors
    ///
    /// Returns [`DatasetError::InvalidFractions`] for bad split shares and
    /// [`DatasetError::InvalidConfig`] for everything else.
    pub fn validate(&self) -> Result<(), DatasetError> {
        self.fractions().validate()?;

        if !(self.balance_factor.is_finite() && self.balance_factor > 0.0) {
            return Err(invalid(format!(
                "balance_factor must be > 0, got {}",
                self.balance_factor
            )));
        }
        if !(self.min_visibility.is_finite() && (0.0..=1.0).contains(&self.min_visibility)) {
            return Err(invalid(format!(
                "min_visibility must lie in [0, 1], got {}",
                self.min_visibility
            )));
        }
        for (name, v) in [("min_area", self.min_area), ("min_side", self.min_side)] {
            if !(v.is_finite() && v >= 0.0) {
                return Err(invalid(format!("{name} must be >= 0, got {v}")));
            }
        }
        if self.attempts_per_sample == 0 {
            return Err(invalid("attempts_per_sample must be >= 1"));
        }
        if self.profiles.is_empty() {
            return Err(invalid("at least one transform profile is required"));
        }
        let mut seen = BTreeSet::new();
        for profile in &self.profiles {
            profile.validate()?;
            if !seen.insert(profile.name.as_str()) {
                return Err(invalid(format!("duplicate profile name {:?}", profile.name)));
            }
        }
        if let Some(names) = &self.class_names {
            let mut unique = BTreeSet::new();
            for name in names {
                if name.trim().is_empty() {
                    return Err(invalid("class names must not be empty"));
                }
                if !unique.insert(name.as_str()) {
                    return Err(invalid(format!("duplicate class name {name:?}")));
                }
            }
        }
        Ok(())
    }
}
