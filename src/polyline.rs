//! Encoded polyline codec at precision 5.
//!
//! Every coordinate is stored as the delta from the previous point, scaled by 1e5,
//! zigzag folded and written as 5-bit groups offset by 63 (`?`), with 0x20 marking
//! that another group follows.

use thiserror::Error;

use crate::model::LatLon;

const FACTOR: f64 = 1e5;
const CHAR_OFFSET: u8 = 63;
const CONTINUATION: i64 = 0x20;
const CHUNK_MASK: i64 = 0x1f;
// Last shift that still leaves room for a full 5-bit group in an i64.
const MAX_SHIFT: u32 = 55;

#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum PolylineError {
    #[error("invalid polyline character {byte:#04x} at position {position}")]
    InvalidCharacter { position: usize, byte: u8 },

    #[error("polyline ends in the middle of a value")]
    Truncated,

    #[error("polyline value starting before position {position} does not fit in 64 bits")]
    Overflow { position: usize },

    #[error("polyline has a latitude with no longitude")]
    MissingLongitude,
}

/// Decodes a polyline into points. An empty string decodes to no points.
pub fn decode(encoded: &str) -> Result<Vec<LatLon>, PolylineError> {
    let bytes = encoded.as_bytes();
    let mut points = Vec::with_capacity(bytes.len() / 4);
    let mut index = 0;
    let (mut lat, mut lon) = (0_i64, 0_i64);

    while index < bytes.len() {
        let dlat = next_value(bytes, &mut index)?;
        if index >= bytes.len() {
            return Err(PolylineError::MissingLongitude);
        }
        let dlon = next_value(bytes, &mut index)?;

        lat = lat
            .checked_add(dlat)
            .ok_or(PolylineError::Overflow { position: index })?;
        lon = lon
            .checked_add(dlon)
            .ok_or(PolylineError::Overflow { position: index })?;

        points.push(LatLon::new(lat as f64 / FACTOR, lon as f64 / FACTOR));
    }

    Ok(points)
}

/// Encodes points into a polyline. Coordinates are rounded to 5 decimal places.
pub fn encode(points: &[LatLon]) -> String {
    let mut out = String::with_capacity(points.len() * 8);
    let (mut prev_lat, mut prev_lon) = (0_i64, 0_i64);

    for point in points {
        let lat = scale(point.lat);
        let lon = scale(point.lon);
        write_value(lat - prev_lat, &mut out);
        write_value(lon - prev_lon, &mut out);
        prev_lat = lat;
        prev_lon = lon;
    }

    out
}

fn next_value(bytes: &[u8], index: &mut usize) -> Result<i64, PolylineError> {
    let start = *index;
    let mut result = 0_i64;
    let mut shift = 0_u32;

    loop {
        let position = *index;
        let byte = *bytes.get(position).ok_or(PolylineError::Truncated)?;
        if !(CHAR_OFFSET..=126).contains(&byte) {
            return Err(PolylineError::InvalidCharacter { position, byte });
        }
        if shift > MAX_SHIFT {
            return Err(PolylineError::Overflow { position: start });
        }

        let chunk = i64::from(byte - CHAR_OFFSET);
        result |= (chunk & CHUNK_MASK) << shift;
        shift += 5;
        *index += 1;

        if chunk & CONTINUATION == 0 {
            break;
        }
    }

    // zigzag
    Ok(if result & 1 == 0 { result >> 1 } else { !(result >> 1) })
}

fn write_value(value: i64, out: &mut String) {
    let mut folded = if value < 0 { !(value << 1) } else { value << 1 };
    while folded >= CONTINUATION {
        out.push(to_char((CONTINUATION | (folded & CHUNK_MASK)) as u8));
        folded >>= 5;
    }
    out.push(to_char(folded as u8));
}

fn to_char(group: u8) -> char {
    char::from(group + CHAR_OFFSET)
}

fn scale(degrees: f64) -> i64 {
    (degrees * FACTOR).round() as i64
}
