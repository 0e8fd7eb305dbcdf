//! Layer blend modes and their 4-byte PSD keys

use crate::error::PsdError;

/// Layer blend mode
///
/// Keys this crate doesn't know are kept in `Other` so they survive a re-save.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BlendMode {
    PassThrough,
    #[default]
    Normal,
    Dissolve,
    Darken,
    Multiply,
    ColorBurn,
    LinearBurn,
    DarkerColor,
    Lighten,
    Screen,
    ColorDodge,
    LinearDodge,
    LighterColor,
    Overlay,
    SoftLight,
    HardLight,
    VividLight,
    LinearLight,
    PinLight,
    HardMix,
    Difference,
    Exclusion,
    Subtract,
    Divide,
    Hue,
    Saturation,
    Color,
    Luminosity,
    Other([u8; 4]),
}

const BLEND_MODES: [(BlendMode, &[u8; 4]); 28] = [
    (BlendMode::PassThrough, b"pass"),
    (BlendMode::Normal, b"norm"),
    (BlendMode::Dissolve, b"diss"),
    (BlendMode::Darken, b"dark"),
    (BlendMode::Multiply, b"mul "),
    (BlendMode::ColorBurn, b"idiv"),
    (BlendMode::LinearBurn, b"lbrn"),
    (BlendMode::DarkerColor, b"dkCl"),
    (BlendMode::Lighten, b"lite"),
    (BlendMode::Screen, b"scrn"),
    (BlendMode::ColorDodge, b"div "),
    (BlendMode::LinearDodge, b"lddg"),
    (BlendMode::LighterColor, b"lgCl"),
    (BlendMode::Overlay, b"over"),
    (BlendMode::SoftLight, b"sLit"),
    (BlendMode::HardLight, b"hLit"),
    (BlendMode::VividLight, b"vLit"),
    (BlendMode::LinearLight, b"lLit"),
    (BlendMode::PinLight, b"pLit"),
    (BlendMode::HardMix, b"hMix"),
    (BlendMode::Difference, b"diff"),
    (BlendMode::Exclusion, b"smud"),
    (BlendMode::Subtract, b"fsub"),
    (BlendMode::Divide, b"fdiv"),
    (BlendMode::Hue, b"hue "),
    (BlendMode::Saturation, b"sat "),
    (BlendMode::Color, b"colr"),
    (BlendMode::Luminosity, b"lum "),
];

impl BlendMode {
    /// Parse a key read from a file; keys must be printable ASCII
    pub fn from_key(key: [u8; 4]) -> Result<Self, PsdError> {
        if !key.iter().all(|b| b.is_ascii_graphic() || *b == b' ') {
            return Err(PsdError::InvalidLayerHeader(format!(
                "blend mode key {:02X?} is not printable",
                key
            )));
        }
        Ok(BLEND_MODES
            .iter()
            .find(|(_, k)| **k == key)
            .map(|(mode, _)| *mode)
            .unwrap_or(BlendMode::Other(key)))
    }

    pub fn key(&self) -> [u8; 4] {
        if let BlendMode::Other(key) = self {
            return *key;
        }
        BLEND_MODES
            .iter()
            .find(|(mode, _)| mode == self)
            .map(|(_, key)| **key)
            .unwrap_or(*b"norm")
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_known_keys() {
        for (mode, key) in BLEND_MODES {
            assert_eq!(BlendMode::from_key(*key).unwrap(), mode);
            assert_eq!(&mode.key(), key);
        }
        assert_eq!(BlendMode::from_key(*b"mul ").unwrap(), BlendMode::Multiply);
        assert_eq!(&BlendMode::PassThrough.key(), b"pass");
    }

    #[test]
    fn test_unknown_key_preserved() {
        let mode = BlendMode::from_key(*b"zzzz").unwrap();
        assert_eq!(mode, BlendMode::Other(*b"zzzz"));
        assert_eq!(&mode.key(), b"zzzz");
    }

    #[test]
    fn test_unprintable_key_rejected() {
        let err = BlendMode::from_key([0, 1, 2, 3]).unwrap_err();
        assert!(matches!(err, PsdError::InvalidLayerHeader(_)));
    }
}
