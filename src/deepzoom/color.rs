//! Background colour parsing
//!
//! Slides may declare `openslide.background-color` as six hex digits
//! (no `#` prefix). Transparent regions of a tile are filled with this
//! colour before encoding.

use image::Rgba;

use super::types::DeepZoomError;

/// Parse a six-hex-digit colour string (e.g. `ffffff`) into an opaque RGBA.
pub fn parse_hex_color(hex: &str) -> Result<Rgba<u8>, DeepZoomError> {
    if hex.len() != 6 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(DeepZoomError::InvalidColor(hex.to_string()));
    }
    let value = u32::from_str_radix(hex, 16)
        .map_err(|_| DeepZoomError::InvalidColor(hex.to_string()))?;

    let r = (value >> 16) as u8;
    let g = ((value >> 8) & 0xff) as u8;
    let b = (value & 0xff) as u8;

    Ok(Rgba([r, g, b, 0xff]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_white() {
        assert_eq!(parse_hex_color("ffffff").unwrap(), Rgba([255, 255, 255, 255]));
    }

    #[test]
    fn test_parse_channels() {
        assert_eq!(parse_hex_color("ff8000").unwrap(), Rgba([255, 128, 0, 255]));
        assert_eq!(parse_hex_color("000000").unwrap(), Rgba([0, 0, 0, 255]));
        assert_eq!(parse_hex_color("0000ff").unwrap(), Rgba([0, 0, 255, 255]));
    }

    #[test]
    fn test_round_trip() {
        // parse(hexOf(c)) == c for every opaque colour
        for &(r, g, b) in &[(0u8, 0u8, 0u8), (1, 2, 3), (255, 254, 253), (16, 32, 64)] {
            let hex = format!("{:02x}{:02x}{:02x}", r, g, b);
            assert_eq!(parse_hex_color(&hex).unwrap(), Rgba([r, g, b, 255]));
        }
    }

    #[test]
    fn test_parse_invalid() {
        assert!(parse_hex_color("not-a-color").is_err());
        assert!(parse_hex_color("").is_err());
        assert!(parse_hex_color("fff").is_err());
        assert!(parse_hex_color("1234567").is_err());
    }
}
