//! Aegis Utils - Utility Functions
//!
//! Field hashing for uid-derived identifiers, checksums for the persisted
//! engine image, and byte counts for log lines.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use xxhash_rust::xxh3::xxh3_64;

// =============================================================================
// Hashing
// =============================================================================

/// xxh3 of a sequence of fields, each followed by a 0xFF separator so that
/// ("ab", "c") and ("a", "bc") hash differently.
pub fn hash_fields(fields: &[&[u8]]) -> u64 {
    let mut buf = Vec::with_capacity(fields.iter().map(|f| f.len() + 1).sum());
    for field in fields {
        buf.extend_from_slice(field);
        buf.push(0xFF);
    }
    xxh3_64(&buf)
}

// =============================================================================
// Checksums
// =============================================================================

#[inline]
pub fn crc32(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

#[inline]
pub fn verify_crc32(data: &[u8], expected: u32) -> bool {
    crc32(data) == expected
}

// =============================================================================
// Size Formatting
// =============================================================================

/// Byte count with a binary unit, e.g. `"1.50 KiB"`.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["KiB", "MiB", "GiB", "TiB", "PiB"];
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut size = bytes as f64 / 1024.0;
    let mut unit = 0;
    while size >= 1024.0 && unit + 1 < UNITS.len() {
        size /= 1024.0;
        unit += 1;
    }
    format!("{:.2} {}", size, UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(1023), "1023 B");
        assert_eq!(format_size(1536), "1.50 KiB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.00 MiB");
    }

    #[test]
    fn test_hash_fields_separates_boundaries() {
        assert_ne!(hash_fields(&[b"ab", b"c"]), hash_fields(&[b"a", b"bc"]));
        assert_eq!(hash_fields(&[b"urn:x"]), hash_fields(&[b"urn:x"]));
    }

    #[test]
    fn test_crc32_detects_flipped_byte() {
        let image = b"@datastores";
        let checksum = crc32(image);
        assert!(verify_crc32(image, checksum));
        assert!(!verify_crc32(b"@datastoreS", checksum));
    }
}
