//! Decoding of raw notification payloads into geolocation fixes.
//! The peripheral sends UTF-8 text of the form `"<lat>,<lng>[,...]"`; each
//! notification is a complete, self-contained record.

use log::debug;

use crate::core::track::GeoFix;
use crate::error::DecodeError;

/// Parses one notification payload into a fix.
///
/// Fields beyond the first two are ignored so the peripheral can append data
/// without breaking older clients. Non-finite values (`inf`, `NaN`) are
/// rejected; coordinate ranges are not validated.
pub fn decode(bytes: &[u8]) -> Result<GeoFix, DecodeError> {
    let text = std::str::from_utf8(bytes).map_err(|_| DecodeError::Encoding)?;
    let trimmed = text.trim();

    let mut parts = trimmed.split(',');
    let (lat_text, lng_text) = match (parts.next(), parts.next()) {
        (Some(lat), Some(lng)) => (lat, lng),
        _ => {
            return Err(DecodeError::Malformed(format!(
                "expected \"<lat>,<lng>\", got {:?}",
                trimmed
            )))
        }
    };

    let latitude = parse_coordinate(lat_text, lng_text)?;
    let longitude = parse_coordinate(lng_text, lat_text)?;

    debug!("decoded fix: lat={latitude}, lng={longitude}");
    Ok(GeoFix {
        latitude,
        longitude,
    })
}

fn parse_coordinate(field: &str, other: &str) -> Result<f64, DecodeError> {
    let malformed = || {
        DecodeError::Malformed(format!(
            "unparseable coordinate values: {:?}, {:?}",
            field, other
        ))
    };
    let value: f64 = field.trim().parse().map_err(|_| malformed())?;
    if !value.is_finite() {
        return Err(malformed());
    }
    Ok(value)
}
