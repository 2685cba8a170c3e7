//! On-disk metadata image format (spec §3/§6): signature, 64-bit version,
//! a sequence of typed sections, and a literal EOF marker that gates
//! whether an image is considered complete.
//!
//! Section framing (4-byte tag, 8-byte big-endian length, payload) reuses
//! the same `byteorder::BigEndian` codec style as
//! [`crate::transport::framing`]; backup rotation on write reuses
//! [`crate::changelog::rotate_files`], the same cascade the changelog
//! writer uses for its own rotated generations (spec §9 grounding note 4).

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::changelog::rotate_files;
use crate::error::Status;

pub const SIGNATURE_V2: &[u8; 8] = b"MFSM 2.0";
pub const SIGNATURE_V1_5: &[u8; 8] = b"MFSM 1.5";
pub const SIGNATURE_V1_6: &[u8; 8] = b"MFSM 1.6";

/// Literal 16-byte footer marking a complete image (spec §3 "Image file").
pub const EOF_MARKER: &[u8; 16] = b"[MFS EOF MARKER]";

const HEADER_LEN: usize = 16; // 8-byte signature + 8-byte version

/// One typed region of an image. Variants match spec §3's section list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionTag {
    Node,
    Edge,
    Chunk,
    Quota,
    Session,
    Xattr,
    Acl,
    Tape,
    Lock,
}

impl SectionTag {
    fn code(self) -> &'static [u8; 4] {
        match self {
            SectionTag::Node => b"NODE",
            SectionTag::Edge => b"EDGE",
            SectionTag::Chunk => b"CHNK",
            SectionTag::Quota => b"QUOT",
            SectionTag::Session => b"SESS",
            SectionTag::Xattr => b"XATR",
            SectionTag::Acl => b"ACL_",
            SectionTag::Tape => b"TAPE",
            SectionTag::Lock => b"LOCK",
        }
    }

    fn from_code(code: &[u8]) -> Result<Self, Status> {
        Ok(match code {
            b"NODE" => SectionTag::Node,
            b"EDGE" => SectionTag::Edge,
            b"CHNK" => SectionTag::Chunk,
            b"QUOT" => SectionTag::Quota,
            b"SESS" => SectionTag::Session,
            b"XATR" => SectionTag::Xattr,
            b"ACL_" => SectionTag::Acl,
            b"TAPE" => SectionTag::Tape,
            b"LOCK" => SectionTag::Lock,
            _ => return Err(Status::Invalid),
        })
    }
}

/// One section's already-encoded payload. Encoding the namespace/chunk
/// tables into these payloads is the caller's job (this module only owns
/// the container format); [`crate::namespace`] and [`crate::chunk`] types
/// are opaque to it.
#[derive(Debug, Clone)]
pub struct Section {
    pub tag: SectionTag,
    pub payload: Vec<u8>,
}

impl Section {
    pub fn new(tag: SectionTag, payload: Vec<u8>) -> Self {
        Self { tag, payload }
    }
}

/// Whether a parsed image used the current format or a legacy signature
/// read for backward compatibility (spec §3 "Legacy `MFSM 1.5`/`1.6`
/// images are accepted for read").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageHeader {
    pub version: u64,
    pub legacy: bool,
}

/// Writes a complete image: signature, version, every section in order,
/// then the EOF marker, atomically replacing `path` and rotating any
/// previous copy aside.
pub fn write_image(path: &Path, version: u64, sections: &[Section], keep_backups: u32) -> Result<(), Status> {
    let mut tmp_path = path.as_os_str().to_owned();
    tmp_path.push(".tmp");
    let tmp_path = Path::new(&tmp_path);

    let mut file = OpenOptions::new().create(true).write(true).truncate(true).open(tmp_path)?;
    file.write_all(SIGNATURE_V2)?;
    file.write_u64::<BigEndian>(version)?;
    for section in sections {
        file.write_all(section.tag.code())?;
        file.write_u64::<BigEndian>(section.payload.len() as u64)?;
        file.write_all(&section.payload)?;
    }
    file.write_all(EOF_MARKER)?;
    file.flush()?;
    drop(file);

    if path.exists() {
        rotate_files(path, keep_backups);
    }
    std::fs::rename(tmp_path, path)?;
    Ok(())
}

/// Parses an image already read fully into memory (images are bounded by
/// available disk, not something to stream section-by-section from a
/// socket the way [`crate::transport::download`] does). Returns the
/// header and every section found before the footer.
///
/// A current-format (`MFSM 2.0`) image missing its footer is rejected as
/// truncated. A legacy image is accepted even without one, matching the
/// "empty footer convention" spec §3 grants pre-2.0 images.
pub fn read_image(bytes: &[u8]) -> Result<(ImageHeader, Vec<Section>), Status> {
    if bytes.len() < HEADER_LEN {
        return Err(Status::Invalid);
    }
    let signature = &bytes[..8];
    let legacy = signature == SIGNATURE_V1_5 || signature == SIGNATURE_V1_6;
    if !legacy && signature != SIGNATURE_V2 {
        return Err(Status::Invalid);
    }
    let version = (&bytes[8..16]).read_u64::<BigEndian>().map_err(|_| Status::Invalid)?;

    let mut sections = Vec::new();
    let mut pos = HEADER_LEN;
    let footer_present = loop {
        if bytes[pos..].starts_with(EOF_MARKER.as_slice()) {
            break true;
        }
        if pos == bytes.len() {
            break false;
        }
        if pos + 12 > bytes.len() {
            return Err(Status::Invalid);
        }
        let tag = SectionTag::from_code(&bytes[pos..pos + 4])?;
        let len = (&bytes[pos + 4..pos + 12]).read_u64::<BigEndian>().map_err(|_| Status::Invalid)? as usize;
        let payload_start = pos + 12;
        let payload_end = payload_start.checked_add(len).ok_or(Status::Invalid)?;
        if payload_end > bytes.len() {
            return Err(Status::Invalid);
        }
        sections.push(Section::new(tag, bytes[payload_start..payload_end].to_vec()));
        pos = payload_end;
    };

    if !footer_present && !legacy {
        return Err(Status::Invalid);
    }
    Ok((ImageHeader { version, legacy }, sections))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_sections_through_write_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metadata.mfs");
        let sections =
            vec![Section::new(SectionTag::Node, vec![1, 2, 3]), Section::new(SectionTag::Edge, vec![4, 5])];
        write_image(&path, 42, &sections, 3).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        let (header, parsed) = read_image(&bytes).unwrap();
        assert_eq!(header, ImageHeader { version: 42, legacy: false });
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].payload, vec![1, 2, 3]);
        assert_eq!(parsed[1].payload, vec![4, 5]);
    }

    #[test]
    fn missing_footer_on_a_current_format_image_is_rejected() {
        let mut bytes = SIGNATURE_V2.to_vec();
        bytes.extend_from_slice(&1u64.to_be_bytes());
        bytes.extend_from_slice(b"NODE");
        bytes.extend_from_slice(&0u64.to_be_bytes());
        // no EOF marker appended: truncated.
        assert_eq!(read_image(&bytes).unwrap_err(), Status::Invalid);
    }

    #[test]
    fn legacy_image_without_a_footer_is_still_accepted() {
        let mut bytes = SIGNATURE_V1_6.to_vec();
        bytes.extend_from_slice(&7u64.to_be_bytes());
        let (header, sections) = read_image(&bytes).unwrap();
        assert!(header.legacy);
        assert_eq!(header.version, 7);
        assert!(sections.is_empty());
    }

    #[test]
    fn rewriting_an_existing_image_rotates_the_previous_copy() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metadata.mfs");
        write_image(&path, 1, &[], 2).unwrap();
        write_image(&path, 2, &[], 2).unwrap();
        assert!(dir.path().join("metadata.mfs.1").exists());
        let (header, _) = read_image(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(header.version, 2);
    }
}
