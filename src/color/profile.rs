//! Per-display color capabilities
//!
//! Built once from what the display reports (wide color gamut support, HDR
//! types, the color modes and render intents the device accepts) and queried
//! by the output when it picks a color profile.

use super::{ColorMode, Dataspace, RenderIntent};
use log::{debug, warn};
use std::collections::HashMap;

/// HDR formats a display can show natively
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HdrType {
    DolbyVision,
    Hdr10,
    Hlg,
}

/// Display luminance range and HDR formats
#[derive(Debug, Clone, PartialEq)]
pub struct HdrCapabilities {
    pub supported_hdr_types: Vec<HdrType>,
    pub max_luminance: f32,
    pub max_average_luminance: f32,
    pub min_luminance: f32,
}

impl HdrCapabilities {
    /// Luminance the render engine should target for HDR tone mapping
    pub fn desired_max_luminance(&self) -> f32 {
        self.max_luminance
    }
}

impl Default for HdrCapabilities {
    fn default() -> Self {
        Self {
            supported_hdr_types: Vec::new(),
            max_luminance: 500.0,
            max_average_luminance: 500.0,
            min_luminance: 0.0,
        }
    }
}

/// Inputs for [`DisplayColorProfile::new`]
#[derive(Debug, Clone, Default)]
pub struct DisplayColorProfileCreationArgs {
    pub has_wide_color_gamut: bool,
    pub hdr_capabilities: HdrCapabilities,
    /// Color modes reported by the device, with the intents each accepts
    pub hwc_color_modes: HashMap<ColorMode, Vec<RenderIntent>>,
}

/// What a display can do with color
#[derive(Debug, Clone)]
pub struct DisplayColorProfile {
    has_wide_color_gamut: bool,
    hdr_capabilities: HdrCapabilities,
    color_modes: HashMap<ColorMode, Vec<RenderIntent>>,
}

impl DisplayColorProfile {
    pub fn new(args: DisplayColorProfileCreationArgs) -> Self {
        debug!(
            "Display color profile: wide_gamut={} modes={:?} hdr={:?}",
            args.has_wide_color_gamut,
            args.hwc_color_modes.keys().collect::<Vec<_>>(),
            args.hdr_capabilities.supported_hdr_types
        );

        Self {
            has_wide_color_gamut: args.has_wide_color_gamut,
            hdr_capabilities: args.hdr_capabilities,
            color_modes: args.hwc_color_modes,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.hdr_capabilities.max_luminance >= self.hdr_capabilities.min_luminance
    }

    pub fn has_wide_color_gamut(&self) -> bool {
        self.has_wide_color_gamut
    }

    pub fn hdr_capabilities(&self) -> &HdrCapabilities {
        &self.hdr_capabilities
    }

    pub fn has_hdr_support(&self, hdr_type: HdrType) -> bool {
        self.hdr_capabilities.supported_hdr_types.contains(&hdr_type)
    }

    pub fn has_color_mode(&self, mode: ColorMode) -> bool {
        self.color_modes.contains_key(&mode)
    }

    /// True when HDR is shown by the device without a dedicated color mode
    pub fn has_legacy_hdr_support(&self, dataspace: Dataspace) -> bool {
        match dataspace {
            Dataspace::Bt2020Pq | Dataspace::Bt2020ItuPq => {
                self.has_hdr_support(HdrType::Hdr10) && !self.has_color_mode(ColorMode::Bt2100Pq)
            }
            Dataspace::Bt2020Hlg | Dataspace::Bt2020ItuHlg => {
                self.has_hdr_support(HdrType::Hlg) && !self.has_color_mode(ColorMode::Bt2100Hlg)
            }
            _ => false,
        }
    }

    /// Picks the device color mode that best shows `dataspace` with `intent`
    ///
    /// Returns `(dataspace, mode, intent)`. Displays without a wide color
    /// gamut, or without any matching mode, render natively.
    pub fn best_color_mode(
        &self,
        dataspace: Dataspace,
        intent: RenderIntent,
    ) -> (Dataspace, ColorMode, RenderIntent) {
        const NATIVE: (Dataspace, ColorMode, RenderIntent) =
            (Dataspace::Unknown, ColorMode::Native, RenderIntent::Colorimetric);

        if !self.has_wide_color_gamut {
            return NATIVE;
        }

        for (mode, mode_dataspace) in candidate_modes(dataspace) {
            let Some(intents) = self.color_modes.get(mode) else {
                continue;
            };
            if let Some(chosen) = fallback_intents(intent)
                .into_iter()
                .find(|candidate| intents.contains(candidate))
            {
                return (*mode_dataspace, *mode, chosen);
            }
        }

        warn!(
            "No color mode for {:?}/{:?} on a wide color gamut display, using native",
            dataspace, intent
        );
        NATIVE
    }

    /// Dataspace the render engine should produce for this color state
    pub fn target_dataspace(
        &self,
        mode: ColorMode,
        dataspace: Dataspace,
        color_space_agnostic_dataspace: Dataspace,
    ) -> Dataspace {
        if dataspace.is_hdr() || mode != ColorMode::Native {
            return dataspace;
        }
        color_space_agnostic_dataspace
    }
}

/// Modes that can show `dataspace`, widest first
fn candidate_modes(dataspace: Dataspace) -> &'static [(ColorMode, Dataspace)] {
    const SRGB: &[(ColorMode, Dataspace)] = &[(ColorMode::Srgb, Dataspace::V0Srgb)];
    const P3: &[(ColorMode, Dataspace)] = &[
        (ColorMode::DisplayP3, Dataspace::DisplayP3),
        (ColorMode::Srgb, Dataspace::V0Srgb),
    ];
    const BT2020: &[(ColorMode, Dataspace)] = &[
        (ColorMode::DisplayBt2020, Dataspace::DisplayBt2020),
        (ColorMode::DisplayP3, Dataspace::DisplayP3),
        (ColorMode::Srgb, Dataspace::V0Srgb),
    ];
    const PQ: &[(ColorMode, Dataspace)] = &[
        (ColorMode::Bt2100Pq, Dataspace::Bt2020Pq),
        (ColorMode::DisplayBt2020, Dataspace::DisplayBt2020),
        (ColorMode::DisplayP3, Dataspace::DisplayP3),
        (ColorMode::Srgb, Dataspace::V0Srgb),
    ];
    const HLG: &[(ColorMode, Dataspace)] = &[
        (ColorMode::Bt2100Hlg, Dataspace::Bt2020Hlg),
        (ColorMode::Bt2100Pq, Dataspace::Bt2020Pq),
        (ColorMode::DisplayBt2020, Dataspace::DisplayBt2020),
        (ColorMode::DisplayP3, Dataspace::DisplayP3),
        (ColorMode::Srgb, Dataspace::V0Srgb),
    ];

    match dataspace {
        Dataspace::DisplayP3 => P3,
        Dataspace::DisplayBt2020 => BT2020,
        Dataspace::Bt2020Pq | Dataspace::Bt2020ItuPq => PQ,
        Dataspace::Bt2020Hlg | Dataspace::Bt2020ItuHlg => HLG,
        _ => SRGB,
    }
}

/// Intents to try for a requested intent, most faithful first
fn fallback_intents(intent: RenderIntent) -> Vec<RenderIntent> {
    match intent {
        RenderIntent::ToneMapEnhance => vec![
            RenderIntent::ToneMapEnhance,
            RenderIntent::ToneMapColorimetric,
            RenderIntent::Colorimetric,
        ],
        RenderIntent::ToneMapColorimetric => vec![
            RenderIntent::ToneMapColorimetric,
            RenderIntent::Colorimetric,
        ],
        RenderIntent::Enhance => vec![RenderIntent::Enhance, RenderIntent::Colorimetric],
        RenderIntent::Colorimetric => vec![RenderIntent::Colorimetric],
        vendor @ RenderIntent::Vendor(_) => vec![vendor, RenderIntent::Colorimetric],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wide_profile() -> DisplayColorProfile {
        let mut modes = HashMap::new();
        modes.insert(ColorMode::Native, vec![RenderIntent::Colorimetric]);
        modes.insert(
            ColorMode::Srgb,
            vec![RenderIntent::Colorimetric, RenderIntent::Enhance],
        );
        modes.insert(ColorMode::DisplayP3, vec![RenderIntent::Colorimetric]);

        DisplayColorProfile::new(DisplayColorProfileCreationArgs {
            has_wide_color_gamut: true,
            hdr_capabilities: HdrCapabilities {
                supported_hdr_types: vec![HdrType::Hdr10],
                ..HdrCapabilities::default()
            },
            hwc_color_modes: modes,
        })
    }

    #[test]
    fn test_narrow_gamut_renders_native() {
        let profile = DisplayColorProfile::new(DisplayColorProfileCreationArgs::default());
        assert_eq!(
            profile.best_color_mode(Dataspace::DisplayP3, RenderIntent::Colorimetric),
            (Dataspace::Unknown, ColorMode::Native, RenderIntent::Colorimetric)
        );
    }

    #[test]
    fn test_p3_mode_selected() {
        let profile = wide_profile();
        assert_eq!(
            profile.best_color_mode(Dataspace::DisplayP3, RenderIntent::Colorimetric),
            (Dataspace::DisplayP3, ColorMode::DisplayP3, RenderIntent::Colorimetric)
        );
    }

    #[test]
    fn test_intent_falls_back() {
        let profile = wide_profile();
        // P3 has no enhance intent; it still wins over sRGB because the gamut
        // matters more than the intent.
        assert_eq!(
            profile.best_color_mode(Dataspace::DisplayP3, RenderIntent::Enhance),
            (Dataspace::DisplayP3, ColorMode::DisplayP3, RenderIntent::Colorimetric)
        );
        assert_eq!(
            profile.best_color_mode(Dataspace::V0Srgb, RenderIntent::Enhance),
            (Dataspace::V0Srgb, ColorMode::Srgb, RenderIntent::Enhance)
        );
    }

    #[test]
    fn test_pq_without_mode_falls_back_to_widest_sdr() {
        let profile = wide_profile();
        assert_eq!(
            profile.best_color_mode(Dataspace::Bt2020Pq, RenderIntent::ToneMapColorimetric),
            (Dataspace::DisplayP3, ColorMode::DisplayP3, RenderIntent::Colorimetric)
        );
    }

    #[test]
    fn test_legacy_hdr_support() {
        let profile = wide_profile();
        assert!(profile.has_legacy_hdr_support(Dataspace::Bt2020Pq));
        assert!(!profile.has_legacy_hdr_support(Dataspace::Bt2020Hlg));
    }

    #[test]
    fn test_target_dataspace() {
        let profile = wide_profile();
        assert_eq!(
            profile.target_dataspace(
                ColorMode::DisplayP3,
                Dataspace::DisplayP3,
                Dataspace::Unknown
            ),
            Dataspace::DisplayP3
        );
        assert_eq!(
            profile.target_dataspace(ColorMode::Native, Dataspace::Unknown, Dataspace::V0Srgb),
            Dataspace::V0Srgb
        );
        assert_eq!(
            profile.target_dataspace(ColorMode::Native, Dataspace::Bt2020Pq, Dataspace::V0Srgb),
            Dataspace::Bt2020Pq
        );
    }
}
