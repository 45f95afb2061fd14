//! Bounds-checked byte readers shared by the format sniffers.

pub(crate) fn be_u16(data: &[u8], at: usize) -> Option<u16> {
    let bytes = data.get(at..at.checked_add(2)?)?;
    Some(u16::from_be_bytes([bytes[0], bytes[1]]))
}

pub(crate) fn le_u16(data: &[u8], at: usize) -> Option<u16> {
    let bytes = data.get(at..at.checked_add(2)?)?;
    Some(u16::from_le_bytes([bytes[0], bytes[1]]))
}

pub(crate) fn be_u32(data: &[u8], at: usize) -> Option<u32> {
    let bytes = data.get(at..at.checked_add(4)?)?;
    Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

pub(crate) fn le_u32(data: &[u8], at: usize) -> Option<u32> {
    let bytes = data.get(at..at.checked_add(4)?)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

pub(crate) fn be_u64(data: &[u8], at: usize) -> Option<u64> {
    let bytes = data.get(at..at.checked_add(8)?)?;
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    Some(u64::from_be_bytes(buf))
}

pub(crate) fn le_u64(data: &[u8], at: usize) -> Option<u64> {
    let bytes = data.get(at..at.checked_add(8)?)?;
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    Some(u64::from_le_bytes(buf))
}

/// Unsigned 24-bit little endian.
pub(crate) fn le_u24(data: &[u8], at: usize) -> Option<u32> {
    let bytes = data.get(at..at.checked_add(3)?)?;
    Some(u32::from(bytes[0]) | u32::from(bytes[1]) << 8 | u32::from(bytes[2]) << 16)
}

/// Position of the first occurrence of `needle` at or after `from`.
pub(crate) fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if needle.is_empty() || from >= haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}

/// Position of the last occurrence of `needle`.
pub(crate) fn rfind(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    haystack.windows(needle.len()).rposition(|w| w == needle)
}

/// Count non-overlapping occurrences of `needle`.
pub(crate) fn count(haystack: &[u8], needle: &[u8]) -> usize {
    let mut total = 0;
    let mut at = 0;
    while let Some(pos) = find(haystack, needle, at) {
        total += 1;
        at = pos + needle.len();
    }
    total
}

/// Lowercase a MIME type and drop any parameters.
pub(crate) fn essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Lowercase an extension and drop any leading dot.
pub(crate) fn bare_extension(extension: &str) -> String {
    extension.trim().trim_start_matches('.').to_ascii_lowercase()
}

/// Round seconds to millisecond precision for reporting.
pub(crate) fn round_secs(secs: f64) -> f64 {
    (secs * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_readers_are_bounds_checked() {
        let data = [0x01, 0x02, 0x03];
        assert_eq!(be_u16(&data, 0), Some(0x0102));
        assert_eq!(le_u16(&data, 1), Some(0x0302));
        assert_eq!(be_u32(&data, 0), None);
        assert_eq!(le_u24(&data, 0), Some(0x030201));
        assert_eq!(be_u16(&data, usize::MAX), None);
    }

    #[test]
    fn test_find_and_count() {
        let data = b"/Type /Page /Type /Pages /Type /Page";
        assert_eq!(find(data, b"/Type", 1), Some(12));
        assert_eq!(rfind(data, b"/Type"), Some(25));
        assert_eq!(count(data, b"/Type"), 3);
        assert_eq!(find(data, b"", 0), None);
    }

    #[test]
    fn test_normalizers() {
        assert_eq!(essence("Text/Plain; charset=utf-8"), "text/plain");
        assert_eq!(bare_extension(".JPG"), "jpg");
    }
}
