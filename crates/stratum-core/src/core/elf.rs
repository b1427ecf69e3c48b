//! Minimal ELF reader: shared-object name and dynamic-library imports.
//!
//! Only the dynamic section is inspected (`DT_SONAME`, `DT_NEEDED`), which
//! is all executable scanning needs. Malformed or unsupported binaries
//! yield `None`; the extractor treats that as "not an ELF worth indexing".

use serde::{Deserialize, Serialize};

const ELF_MAGIC: &[u8; 4] = b"\x7fELF";

const SHT_DYNAMIC: u32 = 6;
const DT_NEEDED: i64 = 1;
const DT_SONAME: i64 = 14;

/// Dynamic-linking metadata of one ELF file.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElfMetadata {
    /// `DT_SONAME` entries (at most one in practice).
    pub sonames: Vec<String>,
    /// `DT_NEEDED` entries, sorted and deduplicated.
    pub imported_libraries: Vec<String>,
}

impl ElfMetadata {
    pub fn is_empty(&self) -> bool {
        self.sonames.is_empty() && self.imported_libraries.is_empty()
    }
}

struct Reader<'a> {
    data: &'a [u8],
    little_endian: bool,
    is_64: bool,
}

impl<'a> Reader<'a> {
    fn u16_at(&self, offset: usize) -> Option<u16> {
        let bytes: [u8; 2] = self.data.get(offset..offset + 2)?.try_into().ok()?;
        Some(if self.little_endian {
            u16::from_le_bytes(bytes)
        } else {
            u16::from_be_bytes(bytes)
        })
    }

    fn u32_at(&self, offset: usize) -> Option<u32> {
        let bytes: [u8; 4] = self.data.get(offset..offset + 4)?.try_into().ok()?;
        Some(if self.little_endian {
            u32::from_le_bytes(bytes)
        } else {
            u32::from_be_bytes(bytes)
        })
    }

    fn u64_at(&self, offset: usize) -> Option<u64> {
        let bytes: [u8; 8] = self.data.get(offset..offset + 8)?.try_into().ok()?;
        Some(if self.little_endian {
            u64::from_le_bytes(bytes)
        } else {
            u64::from_be_bytes(bytes)
        })
    }

    /// Word-sized read: 8 bytes on ELF64, 4 on ELF32.
    fn word_at(&self, offset: usize) -> Option<u64> {
        if self.is_64 {
            self.u64_at(offset)
        } else {
            self.u32_at(offset).map(u64::from)
        }
    }
}

struct Section {
    kind: u32,
    offset: usize,
    size: usize,
    link: u32,
}

/// Parses `data` as an ELF binary, returning its dynamic-linking metadata.
pub fn parse(data: &[u8]) -> Option<ElfMetadata> {
    if data.len() < 64 || data[..4] != ELF_MAGIC[..] {
        return None;
    }
    let is_64 = match data[4] {
        1 => false,
        2 => true,
        _ => return None,
    };
    let little_endian = match data[5] {
        1 => true,
        2 => false,
        _ => return None,
    };
    let reader = Reader {
        data,
        little_endian,
        is_64,
    };

    let (shoff_at, shentsize_at, shnum_at) = if is_64 {
        (0x28, 0x3a, 0x3c)
    } else {
        (0x20, 0x2e, 0x30)
    };
    let shoff = usize::try_from(reader.word_at(shoff_at)?).ok()?;
    let shentsize = usize::from(reader.u16_at(shentsize_at)?);
    let shnum = usize::from(reader.u16_at(shnum_at)?);
    if shoff == 0 || shentsize == 0 || shnum == 0 || shnum > 4096 {
        return None;
    }

    let section = |index: usize| -> Option<Section> {
        let base = shoff.checked_add(index.checked_mul(shentsize)?)?;
        let (type_at, offset_at, size_at, link_at) = if is_64 {
            (base + 0x04, base + 0x18, base + 0x20, base + 0x28)
        } else {
            (base + 0x04, base + 0x10, base + 0x14, base + 0x18)
        };
        Some(Section {
            kind: reader.u32_at(type_at)?,
            offset: usize::try_from(reader.word_at(offset_at)?).ok()?,
            size: usize::try_from(reader.word_at(size_at)?).ok()?,
            link: reader.u32_at(link_at)?,
        })
    };

    let dynamic = (0..shnum)
        .filter_map(section)
        .find(|s| s.kind == SHT_DYNAMIC)?;
    let strtab = section(usize::try_from(dynamic.link).ok()?)?;
    let strtab_bytes = data.get(strtab.offset..strtab.offset.checked_add(strtab.size)?)?;

    let string_at = |offset: u64| -> Option<String> {
        let start = usize::try_from(offset).ok()?;
        let tail = strtab_bytes.get(start..)?;
        let end = tail.iter().position(|c| *c == 0)?;
        std::str::from_utf8(&tail[..end]).ok().map(str::to_string)
    };

    let entry_size = if is_64 { 16 } else { 8 };
    let mut metadata = ElfMetadata::default();
    let dyn_end = dynamic.offset.checked_add(dynamic.size)?.min(data.len());
    let mut at = dynamic.offset;
    while at + entry_size <= dyn_end {
        let (tag, value) = if is_64 {
            (reader.u64_at(at)? as i64, reader.u64_at(at + 8)?)
        } else {
            (i64::from(reader.u32_at(at)? as i32), u64::from(reader.u32_at(at + 4)?))
        };
        match tag {
            0 => break, // DT_NULL terminates the table.
            DT_NEEDED => {
                if let Some(name) = string_at(value) {
                    metadata.imported_libraries.push(name);
                }
            }
            DT_SONAME => {
                if let Some(name) = string_at(value) {
                    metadata.sonames.push(name);
                }
            }
            _ => {}
        }
        at += entry_size;
    }

    metadata.imported_libraries.sort();
    metadata.imported_libraries.dedup();
    if metadata.is_empty() {
        None
    } else {
        Some(metadata)
    }
}
