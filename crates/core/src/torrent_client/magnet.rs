//! Magnet URI helpers.

/// Info hash of a `magnet:?xt=urn:btih:` URI as lower-case hex.
///
/// Backends report hashes in hex; magnets may carry the 32-character base32
/// form, which is converted here so the correlation key matches what the
/// backend later returns.
pub fn info_hash(magnet: &str) -> Option<String> {
    let (_, query) = magnet.split_once('?')?;
    let value = query.split('&').find_map(|param| {
        let (key, value) = param.split_once('=')?;
        if !key.eq_ignore_ascii_case("xt") {
            return None;
        }
        let decoded = urlencoding::decode(value).ok()?;
        let lower = decoded.to_ascii_lowercase();
        lower
            .strip_prefix("urn:btih:")
            .map(|hash| hash.to_string())
    })?;

    match value.len() {
        40 if value.chars().all(|c| c.is_ascii_hexdigit()) => Some(value),
        32 => base32_to_hex(&value),
        _ => None,
    }
}

/// RFC 4648 base32 (no padding) to lower-case hex.
fn base32_to_hex(encoded: &str) -> Option<String> {
    let mut bits: u64 = 0;
    let mut bit_count = 0u32;
    let mut bytes = Vec::with_capacity(encoded.len() * 5 / 8);

    for c in encoded.chars() {
        let value = match c.to_ascii_uppercase() {
            c @ 'A'..='Z' => c as u64 - 'A' as u64,
            c @ '2'..='7' => c as u64 - '2' as u64 + 26,
            _ => return None,
        };
        bits = (bits << 5) | value;
        bit_count += 5;
        if bit_count >= 8 {
            bit_count -= 8;
            bytes.push((bits >> bit_count) as u8);
            bits &= (1 << bit_count) - 1;
        }
    }

    Some(bytes.iter().map(|b| format!("{b:02x}")).collect())
}

/// Display name (`dn=`) of a magnet, if present.
pub fn display_name(magnet: &str) -> Option<String> {
    let (_, query) = magnet.split_once('?')?;
    query.split('&').find_map(|param| {
        let value = param.strip_prefix("dn=")?;
        urlencoding::decode(&value.replace('+', " "))
            .ok()
            .map(|s| s.into_owned())
    })
}
