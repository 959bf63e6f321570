//! Color management types
//!
//! Dataspaces describe how buffer content is encoded (gamut, transfer
//! function). Outputs pick a color mode and render intent that can show every
//! visible layer, promoting to the widest gamut present:
//! sRGB < Display P3 < BT.2020, with PQ/HLG content tracked separately as the
//! HDR dataspace.

pub mod profile;

pub use profile::{DisplayColorProfile, DisplayColorProfileCreationArgs, HdrCapabilities, HdrType};

use cgmath::{Matrix4, SquareMatrix};
use serde::{Deserialize, Serialize};

/// Color encoding descriptor of a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dataspace {
    #[default]
    Unknown,
    V0Srgb,
    V0SrgbLinear,
    V0Scrgb,
    V0ScrgbLinear,
    DisplayP3,
    Bt709,
    Bt2020,
    Bt2020Itu,
    Bt2020Linear,
    DisplayBt2020,
    Bt2020Pq,
    Bt2020ItuPq,
    Bt2020Hlg,
    Bt2020ItuHlg,
}

impl Dataspace {
    /// PQ or HLG transfer function
    pub fn is_hdr(self) -> bool {
        matches!(
            self,
            Dataspace::Bt2020Pq
                | Dataspace::Bt2020ItuPq
                | Dataspace::Bt2020Hlg
                | Dataspace::Bt2020ItuHlg
        )
    }
}

/// Display color mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorMode {
    #[default]
    Native,
    Srgb,
    DisplayP3,
    DisplayBt2020,
    Bt2100Pq,
    Bt2100Hlg,
}

/// How colors are mapped into the display gamut
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RenderIntent {
    #[default]
    Colorimetric,
    Enhance,
    ToneMapColorimetric,
    ToneMapEnhance,
    /// Vendor defined intent, passed through untouched
    Vendor(u32),
}

/// Color management policy requested for outputs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputColorSetting {
    /// No color management: native mode, unknown dataspace
    Unmanaged,
    #[default]
    Managed,
    Enhanced,
    /// Vendor display color setting, used directly as the render intent
    Vendor(u32),
}

/// The color state an output renders with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ColorProfile {
    pub mode: ColorMode,
    pub dataspace: Dataspace,
    pub render_intent: RenderIntent,
    pub color_space_agnostic_dataspace: Dataspace,
}

/// 4x4 color transform applied to `(r, g, b, 1)`
pub type ColorMatrix = Matrix4<f32>;

pub fn identity_color_matrix() -> ColorMatrix {
    Matrix4::identity()
}

/// Outcome of scanning the visible layers' dataspaces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BestDataspace {
    /// One of `V0Srgb`, `DisplayP3`, `DisplayBt2020`
    pub dataspace: Dataspace,
    /// One of `Unknown`, `Bt2020Pq`, `Bt2020Hlg`
    pub hdr_dataspace: Dataspace,
    /// The PQ layer is composed by the GPU, so HDR output is not needed
    pub hdr_client_composition: bool,
}

/// Returns a dataspace that fits all layers
///
/// Layers are given as `(dataspace, force_client_composition)` pairs in
/// z-order. Mixed PQ and HLG content resolves to PQ.
pub fn best_dataspace<I>(layers: I) -> BestDataspace
where
    I: IntoIterator<Item = (Dataspace, bool)>,
{
    let mut best = BestDataspace {
        dataspace: Dataspace::V0Srgb,
        hdr_dataspace: Dataspace::Unknown,
        hdr_client_composition: false,
    };

    for (dataspace, force_client) in layers {
        match dataspace {
            Dataspace::V0Scrgb
            | Dataspace::V0ScrgbLinear
            | Dataspace::Bt2020
            | Dataspace::Bt2020Itu
            | Dataspace::Bt2020Linear
            | Dataspace::DisplayBt2020 => {
                best.dataspace = Dataspace::DisplayBt2020;
            }
            Dataspace::DisplayP3 => {
                best.dataspace = Dataspace::DisplayP3;
            }
            Dataspace::Bt2020Pq | Dataspace::Bt2020ItuPq => {
                best.dataspace = Dataspace::DisplayP3;
                best.hdr_dataspace = Dataspace::Bt2020Pq;
                best.hdr_client_composition = force_client;
            }
            Dataspace::Bt2020Hlg | Dataspace::Bt2020ItuHlg => {
                best.dataspace = Dataspace::DisplayP3;
                if best.hdr_dataspace == Dataspace::Unknown {
                    best.hdr_dataspace = Dataspace::Bt2020Hlg;
                }
            }
            _ => {}
        }
    }

    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_best_dataspace_defaults_to_srgb() {
        let best = best_dataspace(Vec::new());
        assert_eq!(best.dataspace, Dataspace::V0Srgb);
        assert_eq!(best.hdr_dataspace, Dataspace::Unknown);
    }

    #[test]
    fn test_best_dataspace_follows_last_wide_layer() {
        let best = best_dataspace([
            (Dataspace::V0Srgb, false),
            (Dataspace::DisplayP3, false),
        ]);
        assert_eq!(best.dataspace, Dataspace::DisplayP3);

        let best = best_dataspace([
            (Dataspace::DisplayP3, false),
            (Dataspace::Bt2020, false),
        ]);
        assert_eq!(best.dataspace, Dataspace::DisplayBt2020);
    }

    #[test]
    fn test_pq_wins_over_hlg() {
        let best = best_dataspace([
            (Dataspace::Bt2020Pq, false),
            (Dataspace::Bt2020Hlg, false),
        ]);
        assert_eq!(best.hdr_dataspace, Dataspace::Bt2020Pq);

        let best = best_dataspace([(Dataspace::Bt2020ItuHlg, false)]);
        assert_eq!(best.hdr_dataspace, Dataspace::Bt2020Hlg);
        assert_eq!(best.dataspace, Dataspace::DisplayP3);
    }

    #[test]
    fn test_pq_client_composition_flag() {
        let best = best_dataspace([(Dataspace::Bt2020Pq, true)]);
        assert!(best.hdr_client_composition);
    }

    #[test]
    fn test_hdr_dataspaces() {
        assert!(Dataspace::Bt2020Pq.is_hdr());
        assert!(Dataspace::Bt2020ItuHlg.is_hdr());
        assert!(!Dataspace::DisplayBt2020.is_hdr());
    }

    #[test]
    fn test_color_matrix_composes_with_cgmath_operators() {
        let identity = identity_color_matrix();
        assert!(identity.is_identity());

        let dim = ColorMatrix::from_nonuniform_scale(0.5, 0.5, 0.5);
        assert_eq!(identity * dim, dim);
        assert!(!(dim * dim).is_identity());
    }
}
