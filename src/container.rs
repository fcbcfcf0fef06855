//! Binary container reader for GLB-family files (`.glb`, `.vrm`, `.vrma`).
//!
//! The reader validates the 12-byte header and splits the payload into one
//! JSON chunk and any number of binary chunks. Chunk payloads are borrowed
//! from the input.

use crate::{
    diagnostic::{DiagnosticCode, Diagnostics, EntityRef},
    error::ImportError,
};

pub const GLB_MAGIC: u32 = 0x4654_6C67; // "glTF"
pub const GLB_VERSION: u32 = 2;
pub const CHUNK_JSON: u32 = 0x4E4F_534A; // "JSON"
pub const CHUNK_BIN: u32 = 0x004E_4942; // "BIN\0"

const HEADER_LEN: usize = 12;
const CHUNK_HEADER_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkKind {
    Json,
    Binary,
    Unknown(u32),
}

impl From<u32> for ChunkKind {
    fn from(tag: u32) -> Self {
        match tag {
            CHUNK_JSON => ChunkKind::Json,
            CHUNK_BIN => ChunkKind::Binary,
            other => ChunkKind::Unknown(other),
        }
    }
}

/// A typed view over one chunk payload.
#[derive(Debug, Clone, Copy)]
pub struct Chunk<'a> {
    pub kind: ChunkKind,
    pub data: &'a [u8],
}

impl Chunk<'_> {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// A validated container: the JSON chunk plus binary chunks in file order.
#[derive(Debug, Clone)]
pub struct Container<'a> {
    pub json: Chunk<'a>,
    pub binary: Vec<Chunk<'a>>,
}

fn read_u32_le(bytes: &[u8], offset: usize) -> Option<u32> {
    let word = bytes.get(offset..offset.checked_add(4)?)?;
    Some(u32::from_le_bytes([word[0], word[1], word[2], word[3]]))
}

/// Parse and validate a GLB container.
///
/// # Errors
///
/// `MalformedContainer` for header, version, length or chunk-order problems,
/// `TruncatedChunk` when a chunk runs past the end of the input or past the
/// declared length.
pub fn read_container<'a>(
    bytes: &'a [u8],
    diagnostics: &mut Diagnostics,
) -> Result<Container<'a>, ImportError> {
    if bytes.len() < HEADER_LEN {
        return Err(ImportError::malformed(format!(
            "input is {} bytes, shorter than the {HEADER_LEN}-byte header",
            bytes.len()
        )));
    }

    let magic = read_u32_le(bytes, 0).unwrap_or_default();
    if magic != GLB_MAGIC {
        return Err(ImportError::malformed(format!(
            "bad magic 0x{magic:08X}, expected 'glTF'"
        )));
    }
    let version = read_u32_le(bytes, 4).unwrap_or_default();
    if version != GLB_VERSION {
        return Err(ImportError::malformed(format!(
            "unsupported container version {version}"
        )));
    }
    let declared = read_u32_le(bytes, 8).unwrap_or_default() as usize;
    if declared < HEADER_LEN {
        return Err(ImportError::malformed(format!(
            "declared length {declared} is shorter than the header"
        )));
    }
    // A short input is walked as far as it goes so an overrunning chunk is
    // reported as truncated.
    let short = declared > bytes.len();
    if bytes.len() > declared {
        diagnostics.warn(
            DiagnosticCode::TrailingBytes,
            EntityRef::Container,
            format!(
                "ignoring {} bytes after the declared length",
                bytes.len() - declared
            ),
        );
    }
    let body = &bytes[..declared.min(bytes.len())];

    let mut json: Option<Chunk<'a>> = None;
    let mut binary = Vec::new();
    let mut offset = HEADER_LEN;
    let mut index = 0usize;

    while offset < body.len() {
        let remaining = body.len() - offset;
        if remaining < CHUNK_HEADER_LEN {
            return Err(ImportError::TruncatedChunk {
                chunk: index,
                declared: CHUNK_HEADER_LEN,
                available: remaining,
            });
        }
        let length = read_u32_le(body, offset).unwrap_or_default() as usize;
        let tag = read_u32_le(body, offset + 4).unwrap_or_default();
        offset += CHUNK_HEADER_LEN;

        let available = body.len() - offset;
        if length > available {
            return Err(ImportError::TruncatedChunk {
                chunk: index,
                declared: length,
                available,
            });
        }
        let chunk = Chunk {
            kind: ChunkKind::from(tag),
            data: &body[offset..offset + length],
        };
        offset += length;

        match chunk.kind {
            ChunkKind::Json if json.is_some() => {
                return Err(ImportError::malformed(format!(
                    "chunk {index} is a second JSON chunk"
                )));
            }
            ChunkKind::Json => json = Some(chunk),
            _ if index == 0 => {
                return Err(ImportError::malformed("first chunk is not a JSON chunk"));
            }
            ChunkKind::Binary => binary.push(chunk),
            ChunkKind::Unknown(tag) => diagnostics.warn(
                DiagnosticCode::UnknownChunk,
                EntityRef::Chunk(index),
                format!("skipping chunk with unknown type 0x{tag:08X}"),
            ),
        }
        index += 1;
    }

    if short {
        return Err(ImportError::malformed(format!(
            "declared length {declared} exceeds the {} available bytes",
            bytes.len()
        )));
    }
    let json = json.ok_or_else(|| ImportError::malformed("container has no JSON chunk"))?;
    log::debug!(
        "container: {} bytes of JSON, {} binary chunk(s)",
        json.len(),
        binary.len()
    );
    Ok(Container { json, binary })
}
