use crate::OffsetError;

/// Parse a client-supplied replay position.
///
/// - `""` → `0` (no replay, live tail only)
/// - non-numeric or out of `i64` range → [`OffsetError::Malformed`]
/// - `< 0` → [`OffsetError::Negative`]
///
/// Offsets are opaque order keys: no upper bound is checked and the
/// value is never validated against what the cache actually holds.
pub fn parse_offset(raw: &str) -> Result<i64, OffsetError> {
    if raw.is_empty() {
        return Ok(0);
    }

    let offset: i64 = raw
        .parse()
        .map_err(|_| OffsetError::Malformed(raw.to_string()))?;
    if offset < 0 {
        return Err(OffsetError::Negative(offset));
    }

    Ok(offset)
}
