//! DeepZoom engine types and error definitions

use thiserror::Error;

use crate::slide::SlideError;

/// Errors emitted by the DeepZoom engine
#[derive(Debug, Error)]
pub enum DeepZoomError {
    #[error("invalid tile address: level={level}, col={col}, row={row}")]
    InvalidAddress { level: u32, col: u32, row: u32 },

    #[error("invalid format: {0} (only jpeg or png are allowed)")]
    InvalidFormat(String),

    #[error("cannot parse RGB values {0}")]
    InvalidColor(String),

    #[error("unsupported alpha value {alpha} at ({x}, {y})")]
    UnsupportedAlpha { x: u32, y: u32, alpha: u8 },

    #[error("associated image does not exist: {0}")]
    AssociatedImageNotFound(String),

    #[error(transparent)]
    Slide(#[from] SlideError),

    #[error("image encoding failed: {0}")]
    Codec(String),
}

/// Encoding declared in the pyramid's DZI descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TileFormat {
    Jpeg,
    Png,
}

impl TileFormat {
    /// Parse a descriptor format name (`jpeg` or `png`).
    pub fn parse(s: &str) -> Result<Self, DeepZoomError> {
        match s {
            "jpeg" => Ok(TileFormat::Jpeg),
            "png" => Ok(TileFormat::Png),
            other => Err(DeepZoomError::InvalidFormat(other.to_string())),
        }
    }

    /// Parse a tile URL extension (`jpg` or `png`).
    pub fn from_extension(ext: &str) -> Result<Self, DeepZoomError> {
        match ext {
            "jpg" => Ok(TileFormat::Jpeg),
            "png" => Ok(TileFormat::Png),
            other => Err(DeepZoomError::InvalidFormat(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TileFormat::Jpeg => "jpeg",
            TileFormat::Png => "png",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_format() {
        assert_eq!(TileFormat::parse("jpeg").unwrap(), TileFormat::Jpeg);
        assert_eq!(TileFormat::parse("png").unwrap(), TileFormat::Png);
        assert!(matches!(
            TileFormat::parse("webp"),
            Err(DeepZoomError::InvalidFormat(_))
        ));
        // Descriptor names and URL extensions are distinct vocabularies
        assert!(TileFormat::parse("jpg").is_err());
        assert_eq!(
            TileFormat::from_extension("jpg").unwrap(),
            TileFormat::Jpeg
        );
    }
}
