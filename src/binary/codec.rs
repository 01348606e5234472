//! Persistent layout of a [`ShaderBinary`].
//!
//! ```text
//! u32        total size, header included
//! [u8; 20]   SHA-1 of everything after the header
//! ShaderConfig, 7 x u32
//! ShaderInfo,   5 x u8 + 2 x u32
//! u32 + bytes  machine code
//! u32 + bytes  disassembly text, length 0 when absent
//! ```
//!
//! All integers are little-endian.

use sha1::{Digest, Sha1};
use thiserror::Error;

use super::{ShaderBinary, ShaderConfig, ShaderInfo};

const CHECKSUM_SIZE: usize = 20;

/// Size of the size + checksum header.
pub const HEADER_SIZE: usize = 4 + CHECKSUM_SIZE;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("binary is truncated: needed {needed} more bytes at offset {offset}")]
    Truncated { offset: usize, needed: usize },

    #[error("declared size {declared} does not match actual size {actual}")]
    SizeMismatch { declared: usize, actual: usize },

    #[error("checksum mismatch")]
    ChecksumMismatch,

    #[error("disassembly text is not valid UTF-8")]
    InvalidText,

    #[error("chunk of {0} bytes is too large to encode")]
    TooLarge(usize),

    #[error("{0} trailing bytes after the last chunk")]
    TrailingBytes(usize),
}

fn chunk_len(len: usize) -> Result<u32, CodecError> {
    // keep total size representable in the u32 header
    u32::try_from(len)
        .ok()
        .filter(|n| *n <= u32::MAX / 4)
        .ok_or(CodecError::TooLarge(len))
}

/// Serialize `binary` into the checksummed layout.
pub fn encode(binary: &ShaderBinary) -> Result<Vec<u8>, CodecError> {
    let code_len = chunk_len(binary.code.len())?;
    let text = binary.disassembly.as_deref().unwrap_or_default();
    let text_len = chunk_len(text.len())?;

    let mut out = Vec::with_capacity(HEADER_SIZE + 64 + binary.code.len() + text.len());
    out.extend_from_slice(&[0; HEADER_SIZE]);

    let c = &binary.config;
    for value in [
        c.num_sgprs,
        c.num_vgprs,
        c.spilled_sgprs,
        c.spilled_vgprs,
        c.scratch_bytes_per_wave,
        c.lds_size,
        c.float_mode,
    ] {
        out.extend_from_slice(&value.to_le_bytes());
    }

    let i = &binary.info;
    out.extend_from_slice(&[
        i.num_input_sgprs,
        i.num_input_vgprs,
        u8::from(i.uses_instanceid),
        i.nr_pos_exports,
        i.nr_param_exports,
    ]);
    out.extend_from_slice(&i.private_mem_vgprs.to_le_bytes());
    out.extend_from_slice(&i.max_simd_waves.to_le_bytes());

    out.extend_from_slice(&code_len.to_le_bytes());
    out.extend_from_slice(&binary.code);
    out.extend_from_slice(&text_len.to_le_bytes());
    out.extend_from_slice(text.as_bytes());

    let total = chunk_len(out.len())?;
    out[..4].copy_from_slice(&total.to_le_bytes());
    let checksum = Sha1::digest(&out[HEADER_SIZE..]);
    out[4..HEADER_SIZE].copy_from_slice(&checksum);
    Ok(out)
}

struct Reader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn bytes(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        let remaining = self.data.len() - self.offset;
        if len > remaining {
            return Err(CodecError::Truncated {
                offset: self.offset,
                needed: len - remaining,
            });
        }
        let slice = &self.data[self.offset..self.offset + len];
        self.offset += len;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.bytes(1)?[0])
    }

    fn u32(&mut self) -> Result<u32, CodecError> {
        let raw = self.bytes(4)?;
        Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    fn chunk(&mut self) -> Result<&'a [u8], CodecError> {
        let len = self.u32()? as usize;
        self.bytes(len)
    }
}

/// Validate and deserialize a buffer produced by [`encode`].
pub fn decode(data: &[u8]) -> Result<ShaderBinary, CodecError> {
    let mut reader = Reader { data, offset: 0 };
    let declared = reader.u32()? as usize;
    if declared != data.len() {
        return Err(CodecError::SizeMismatch {
            declared,
            actual: data.len(),
        });
    }
    let checksum = reader.bytes(CHECKSUM_SIZE)?;
    if Sha1::digest(&data[HEADER_SIZE..]).as_slice() != checksum {
        return Err(CodecError::ChecksumMismatch);
    }

    let config = ShaderConfig {
        num_sgprs: reader.u32()?,
        num_vgprs: reader.u32()?,
        spilled_sgprs: reader.u32()?,
        spilled_vgprs: reader.u32()?,
        scratch_bytes_per_wave: reader.u32()?,
        lds_size: reader.u32()?,
        float_mode: reader.u32()?,
    };
    let info = ShaderInfo {
        num_input_sgprs: reader.u8()?,
        num_input_vgprs: reader.u8()?,
        uses_instanceid: reader.u8()? != 0,
        nr_pos_exports: reader.u8()?,
        nr_param_exports: reader.u8()?,
        private_mem_vgprs: reader.u32()?,
        max_simd_waves: reader.u32()?,
    };
    let code = reader.chunk()?.to_vec();
    let text = reader.chunk()?;
    let disassembly = if text.is_empty() {
        None
    } else {
        Some(
            std::str::from_utf8(text)
                .map_err(|_| CodecError::InvalidText)?
                .to_owned(),
        )
    };

    let trailing = data.len() - reader.offset;
    if trailing != 0 {
        return Err(CodecError::TrailingBytes(trailing));
    }

    Ok(ShaderBinary {
        config,
        info,
        code,
        disassembly,
    })
}
