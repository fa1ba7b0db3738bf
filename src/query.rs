use std::collections::BTreeMap;

/// Parses a URL query string into a map from key to decoded value.
///
/// Both keys and values are decoded with [`decode`]. When a key occurs more
/// than once, the last occurrence wins. A pair without `=` is kept with an
/// empty value.
///
/// # Arguments
/// * `query` - The raw query string, without the leading `?`.
///
/// # Returns
/// A map of decoded key/value pairs.
#[must_use]
pub fn parse(query: &str) -> BTreeMap<String, String> {
    let mut params = BTreeMap::new();

    for pair in query.split('&').filter(|pair| !pair.is_empty()) {
        let (key, value) = match pair.split_once('=') {
            Some((key, value)) => (key, value),
            None => (pair, ""),
        };
        params.insert(decode(key), decode(value));
    }

    params
}

/// Decodes one form-urlencoded token.
///
/// `+` becomes a space and `%XX` becomes the byte `0xXX`. A malformed escape
/// (truncated, or with non-hex digits) is passed through unchanged instead of
/// aborting the decode.
///
/// # Arguments
/// * `encoded` - The encoded token.
///
/// # Returns
/// The decoded string. Escape sequences that do not form valid UTF-8 are
/// replaced with the Unicode replacement character.
#[must_use]
pub fn decode(encoded: &str) -> String {
    let bytes = encoded.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                decoded.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < bytes.len() => {
                match (hex_value(bytes[i + 1]), hex_value(bytes[i + 2])) {
                    (Some(high), Some(low)) => {
                        decoded.push((high << 4) | low);
                        i += 3;
                    }
                    _ => {
                        decoded.push(b'%');
                        i += 1;
                    }
                }
            }
            other => {
                decoded.push(other);
                i += 1;
            }
        }
    }

    String::from_utf8_lossy(&decoded).into_owned()
}

fn hex_value(digit: u8) -> Option<u8> {
    match digit {
        b'0'..=b'9' => Some(digit - b'0'),
        b'a'..=b'f' => Some(digit - b'a' + 10),
        b'A'..=b'F' => Some(digit - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_plus_as_space() {
        assert_eq!(decode("hello+world"), "hello world");
    }

    #[test]
    fn test_decode_percent_escape() {
        assert_eq!(decode("a%20b"), "a b");
        assert_eq!(decode("%41%62%43"), "AbC");
    }

    #[test]
    fn test_decode_malformed_escape_passes_through() {
        assert_eq!(decode("%zz"), "%zz");
        assert_eq!(decode("100%"), "100%");
        assert_eq!(decode("%4"), "%4");
        assert_eq!(decode("%%41"), "%A");
    }

    #[test]
    fn test_parse_pairs() {
        let params = parse("ssid=My+Net&pass=p%40ss");
        assert_eq!(params.get("ssid").unwrap(), "My Net");
        assert_eq!(params.get("pass").unwrap(), "p@ss");
    }

    #[test]
    fn test_parse_last_key_wins() {
        let params = parse("dry=1&dry=2");
        assert_eq!(params.get("dry").unwrap(), "2");
    }

    #[test]
    fn test_parse_missing_value() {
        let params = parse("dht&dry=1");
        assert_eq!(params.get("dht").unwrap(), "");
        assert_eq!(params.get("dry").unwrap(), "1");
    }

    #[test]
    fn test_parse_empty() {
        assert!(parse("").is_empty());
        assert!(parse("&&").is_empty());
    }
}
