// ============================================================================
// COLOR PARSING — "#RRGGBB" / "#RGB" hex strings to engine channel order
// ============================================================================

use image::{Rgb, Rgba};

use crate::error::{LayerError, Result};

/// Parse a user-supplied hex color. The leading `#` is optional and the
/// 3-digit shorthand expands each digit (`#abc` == `#aabbcc`).
pub fn parse_hex_color(input: &str) -> Result<Rgb<u8>> {
    let hex = input.trim().trim_start_matches('#');
    let expanded: String = match hex.len() {
        3 => hex.chars().flat_map(|c| [c, c]).collect(),
        6 => hex.to_string(),
        _ => return Err(LayerError::InvalidColor(input.to_string())),
    };
    if !expanded.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(LayerError::InvalidColor(input.to_string()));
    }
    let val = u32::from_str_radix(&expanded, 16)
        .map_err(|_| LayerError::InvalidColor(input.to_string()))?;
    let r = ((val >> 16) & 0xFF) as u8;
    let g = ((val >> 8) & 0xFF) as u8;
    let b = (val & 0xFF) as u8;
    Ok(Rgb([r, g, b]))
}

/// Fully opaque RGBA for a parsed color.
pub fn opaque(color: Rgb<u8>) -> Rgba<u8> {
    Rgba([color[0], color[1], color[2], 255])
}

pub fn to_hex(color: Rgb<u8>) -> String {
    format!("#{:02X}{:02X}{:02X}", color[0], color[1], color[2])
}
