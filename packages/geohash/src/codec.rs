//! Base-32 geohash encoding and cell hierarchy.
//!
//! Encoding bisects the longitude and latitude ranges alternately
//! (longitude first), packing 5 bits per character. Hierarchy helpers are
//! pure string operations: the parent drops the last character, the
//! children append each alphabet character in alphabet order.

use crate::{BoundingBox, GeohashError, MAX_PRECISION};

/// The geohash alphabet, in bit-value order.
pub const BASE32: &[u8; 32] = b"0123456789bcdefghjkmnpqrstuvwxyz";

const BITS_PER_CHAR: usize = 5;

fn char_value(c: char) -> Option<u8> {
    BASE32
        .iter()
        .position(|&b| char::from(b) == c)
        .and_then(|i| u8::try_from(i).ok())
}

/// Checks that `hash` is a non-empty base-32 geohash.
///
/// # Errors
///
/// Returns [`GeohashError::Empty`] for an empty string and
/// [`GeohashError::InvalidCharacter`] for anything outside the alphabet
/// (including uppercase letters).
pub fn validate(hash: &str) -> Result<(), GeohashError> {
    if hash.is_empty() {
        return Err(GeohashError::Empty);
    }
    if let Some(character) = hash.chars().find(|&c| char_value(c).is_none()) {
        return Err(GeohashError::InvalidCharacter {
            hash: hash.to_string(),
            character,
        });
    }
    Ok(())
}

/// Encodes a coordinate as a geohash of `precision` characters.
///
/// # Errors
///
/// Returns [`GeohashError::InvalidPrecision`] if `precision` is outside
/// `1..=MAX_PRECISION`, or [`GeohashError::InvalidCoordinate`] if the
/// coordinate is not finite or not within WGS84 bounds.
pub fn encode(lat: f64, lon: f64, precision: usize) -> Result<String, GeohashError> {
    if precision == 0 || precision > MAX_PRECISION {
        return Err(GeohashError::InvalidPrecision(precision));
    }
    if !lat.is_finite() || !lon.is_finite() || lat.abs() > 90.0 || lon.abs() > 180.0 {
        return Err(GeohashError::InvalidCoordinate { lat, lon });
    }

    let mut lat_range = (-90.0_f64, 90.0_f64);
    let mut lon_range = (-180.0_f64, 180.0_f64);
    let mut hash = String::with_capacity(precision);
    let mut even_bit = true;

    while hash.len() < precision {
        let mut value = 0usize;
        for _ in 0..BITS_PER_CHAR {
            let (range, coord) = if even_bit {
                (&mut lon_range, lon)
            } else {
                (&mut lat_range, lat)
            };
            let mid = f64::midpoint(range.0, range.1);
            value <<= 1;
            if coord >= mid {
                value |= 1;
                range.0 = mid;
            } else {
                range.1 = mid;
            }
            even_bit = !even_bit;
        }
        hash.push(char::from(BASE32[value]));
    }

    Ok(hash)
}

/// Decodes the bounds of a geohash cell.
///
/// # Errors
///
/// Returns [`GeohashError`] if `hash` is empty or not base-32.
pub fn decode_bbox(hash: &str) -> Result<BoundingBox, GeohashError> {
    if hash.is_empty() {
        return Err(GeohashError::Empty);
    }

    let mut lat_range = (-90.0_f64, 90.0_f64);
    let mut lon_range = (-180.0_f64, 180.0_f64);
    let mut even_bit = true;

    for c in hash.chars() {
        let value = char_value(c).ok_or_else(|| GeohashError::InvalidCharacter {
            hash: hash.to_string(),
            character: c,
        })?;
        for shift in (0..BITS_PER_CHAR).rev() {
            let bit = (value >> shift) & 1;
            let range = if even_bit {
                &mut lon_range
            } else {
                &mut lat_range
            };
            let mid = f64::midpoint(range.0, range.1);
            if bit == 1 {
                range.0 = mid;
            } else {
                range.1 = mid;
            }
            even_bit = !even_bit;
        }
    }

    Ok(BoundingBox {
        lat_min: lat_range.0,
        lon_min: lon_range.0,
        lat_max: lat_range.1,
        lon_max: lon_range.1,
    })
}

/// Decodes a geohash to the center of its cell as `(lat, lon)`.
///
/// # Errors
///
/// Returns [`GeohashError`] if `hash` is empty or not base-32.
pub fn decode(hash: &str) -> Result<(f64, f64), GeohashError> {
    Ok(decode_bbox(hash)?.center())
}

/// The enclosing cell one level up.
///
/// Returns the empty string for single-character and empty hashes; callers
/// walking up the hierarchy stop there.
#[must_use]
pub fn parent(hash: &str) -> String {
    let mut chars = hash.chars();
    chars.next_back();
    chars.as_str().to_string()
}

/// The 32 cells one level down, in alphabet order.
///
/// `children("")` yields the 32 single-character root cells.
#[must_use]
pub fn children(hash: &str) -> Vec<String> {
    BASE32
        .iter()
        .map(|&b| {
            let mut child = String::with_capacity(hash.len() + 1);
            child.push_str(hash);
            child.push(char::from(b));
            child
        })
        .collect()
}

/// The other 31 cells sharing `hash`'s parent, in alphabet order.
///
/// Empty for the empty hash, which has no parent.
#[must_use]
pub fn siblings(hash: &str) -> Vec<String> {
    if hash.is_empty() {
        return Vec::new();
    }
    children(&parent(hash))
        .into_iter()
        .filter(|cell| cell != hash)
        .collect()
}
