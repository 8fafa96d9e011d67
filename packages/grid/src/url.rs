//! Mirrors the selection in a `geohash` URL query parameter.
//!
//! The selection state itself knows nothing about URLs; callers read the
//! parameter on load and write it back whenever the selection changes.

use signal_map_geohash::{GeohashError, validate};

/// Name of the query parameter holding the selected geohash.
pub const GEOHASH_PARAM: &str = "geohash";

fn raw_pairs(query: &str) -> impl Iterator<Item = &str> {
    query
        .trim_start_matches('?')
        .split('&')
        .filter(|pair| !pair.is_empty())
}

fn key_of(pair: &str) -> &str {
    pair.split_once('=').map_or(pair, |(key, _)| key)
}

fn hex_value(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}

/// Decodes `%XX` escapes and `+` as a space. Malformed escapes are kept
/// verbatim.
fn percent_decode(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => decoded.push(b' '),
            b'%' if i + 2 < bytes.len() => {
                match (hex_value(bytes[i + 1]), hex_value(bytes[i + 2])) {
                    (Some(high), Some(low)) => {
                        decoded.push((high << 4) | low);
                        i += 2;
                    }
                    _ => decoded.push(b'%'),
                }
            }
            byte => decoded.push(byte),
        }
        i += 1;
    }
    String::from_utf8_lossy(&decoded).into_owned()
}

/// Reads the selected geohash from a query string (with or without the
/// leading `?`). Keys and values are percent-decoded. The first occurrence
/// wins; an empty value counts as absent.
///
/// # Errors
///
/// * If the parameter is present but not a valid geohash
pub fn read_geohash(query: &str) -> Result<Option<String>, GeohashError> {
    let Some(pair) = raw_pairs(query).find(|pair| percent_decode(key_of(pair)) == GEOHASH_PARAM)
    else {
        return Ok(None);
    };
    let value = percent_decode(pair.split_once('=').map_or("", |(_, value)| value));
    let hash = value.trim().to_ascii_lowercase();
    if hash.is_empty() {
        return Ok(None);
    }
    validate(&hash)?;
    Ok(Some(hash))
}

/// Rewrites a query string so that it carries `hash` as the geohash
/// parameter, or drops the parameter when `hash` is `None`.
///
/// Other parameters keep their order and encoding. The result has no
/// leading `?`.
#[must_use]
pub fn write_geohash(query: &str, hash: Option<&str>) -> String {
    let mut parts: Vec<String> = raw_pairs(query)
        .filter(|pair| percent_decode(key_of(pair)) != GEOHASH_PARAM)
        .map(ToString::to_string)
        .collect();
    if let Some(hash) = hash {
        parts.push(format!("{GEOHASH_PARAM}={hash}"));
    }
    parts.join("&")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_parameter() {
        assert_eq!(
            read_geohash("?layer=geohash&geohash=sx8d").unwrap(),
            Some("sx8d".to_string())
        );
        assert_eq!(
            read_geohash("geohash=SX8D").unwrap(),
            Some("sx8d".to_string())
        );
        assert_eq!(read_geohash("").unwrap(), None);
        assert_eq!(read_geohash("?zoom=4&geohash=").unwrap(), None);
    }

    #[test]
    fn reads_percent_encoded_parameter() {
        assert_eq!(
            read_geohash("geo%68ash=sx%38d").unwrap(),
            Some("sx8d".to_string())
        );
        assert_eq!(read_geohash("geohash=%20").unwrap(), None);
        assert!(read_geohash("geohash=sx8d%2").is_err());
    }

    #[test]
    fn rejects_malformed_parameter() {
        assert!(matches!(
            read_geohash("geohash=sx8a"),
            Err(GeohashError::InvalidCharacter { character: 'a', .. })
        ));
    }

    #[test]
    fn writes_parameter() {
        assert_eq!(write_geohash("", Some("u4pr")), "geohash=u4pr");
        assert_eq!(
            write_geohash("?zoom=4&geohash=u4&debug", Some("u4pr")),
            "zoom=4&debug&geohash=u4pr"
        );
        assert_eq!(write_geohash("zoom=4&geohash=u4", None), "zoom=4");
        assert_eq!(
            write_geohash("q=&name=a%20b&geohash=u4", Some("u4p")),
            "q=&name=a%20b&geohash=u4p"
        );
        assert_eq!(
            read_geohash(&write_geohash("a=1", Some("ezs42"))).unwrap(),
            Some("ezs42".to_string())
        );
    }
}
