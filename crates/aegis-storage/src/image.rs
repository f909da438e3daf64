//! Aegis Image - Persisted Store Image
//!
//! On-disk format of a map store: a fixed header followed by a bincode
//! payload holding every named map. The header carries the payload length
//! and a CRC32 so a truncated or corrupted file is detected on open
//! rather than producing silently wrong maps.
//!
//! Layout:
//! ```text
//! magic "AGHS" | format u16 | flags u16 | payload_len u64 | crc32 u32 | payload
//! ```
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use aegis_common::utils::{crc32, verify_crc32};
use aegis_common::{AegisError, Result};
use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

// =============================================================================
// Constants
// =============================================================================

pub const IMAGE_MAGIC: &[u8; 4] = b"AGHS";
pub const IMAGE_FORMAT_VERSION: u16 = 1;
pub const IMAGE_HEADER_SIZE: usize = 20;

// =============================================================================
// Image Types
// =============================================================================

/// Contents of one named map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapImage {
    pub name: String,
    pub entries: Vec<(Vec<u8>, Vec<u8>)>,
}

/// Contents of every map in a store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreImage {
    pub maps: Vec<MapImage>,
}

impl StoreImage {
    pub fn entry_count(&self) -> usize {
        self.maps.iter().map(|m| m.entries.len()).sum()
    }

    /// Write the framed image. Returns the number of bytes written.
    pub fn write_to(&self, writer: &mut dyn Write) -> Result<u64> {
        let payload = bincode::serialize(&self.maps)?;

        let mut header = Vec::with_capacity(IMAGE_HEADER_SIZE);
        header.put_slice(IMAGE_MAGIC);
        header.put_u16(IMAGE_FORMAT_VERSION);
        header.put_u16(0);
        header.put_u64(payload.len() as u64);
        header.put_u32(crc32(&payload));

        writer.write_all(&header)?;
        writer.write_all(&payload)?;
        writer.flush()?;
        Ok((header.len() + payload.len()) as u64)
    }

    pub fn read_from(reader: &mut dyn Read) -> Result<Self> {
        let mut header = [0u8; IMAGE_HEADER_SIZE];
        reader.read_exact(&mut header).map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => AegisError::Corruption("store image header truncated".to_string()),
            _ => AegisError::Io(e),
        })?;

        let mut buf = &header[..];
        let mut magic = [0u8; 4];
        buf.copy_to_slice(&mut magic);
        if &magic != IMAGE_MAGIC {
            return Err(AegisError::Corruption("not an Aegis store image".to_string()));
        }
        let format = buf.get_u16();
        if format != IMAGE_FORMAT_VERSION {
            return Err(AegisError::Corruption(format!("unsupported image format {}", format)));
        }
        let _flags = buf.get_u16();
        let payload_len = buf.get_u64();
        let checksum = buf.get_u32();

        let mut payload = Vec::new();
        reader.take(payload_len).read_to_end(&mut payload)?;
        if payload.len() as u64 != payload_len {
            return Err(AegisError::Corruption(format!(
                "store image payload truncated: expected {} bytes, found {}",
                payload_len,
                payload.len()
            )));
        }
        if !verify_crc32(&payload, checksum) {
            return Err(AegisError::Corruption("store image checksum mismatch".to_string()));
        }

        let maps: Vec<MapImage> = bincode::deserialize(&payload)?;
        Ok(Self { maps })
    }
}

// =============================================================================
// Tests
// =============================================================================
