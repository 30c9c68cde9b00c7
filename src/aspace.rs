use anyhow::Result;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::VA;

#[derive(Debug, Error)]
pub enum AddressSpaceError {
    #[error("address not mapped: {0:#010x}")]
    NotMapped(VA),

    #[error("no file data backing address: {0:#010x}")]
    NoData(VA),

    #[error("sections overlap: {0} and {1}")]
    OverlappingSections(String, String),
}

bitflags! {
    #[derive(Serialize, Deserialize)]
    pub struct Permissions: u8 {
        const R = 0b0000_0001;
        const W = 0b0000_0010;
        const X = 0b0000_0100;
        const RX = Self::R.bits | Self::X.bits;
        const RW = Self::R.bits | Self::W.bits;
    }
}

/// A region of the loaded image.
///
/// `bytes` is present only for sections with file backing (program-bits);
/// other allocated sections reserve their address range without data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub addr:  VA,
    pub size:  u32,
    pub bytes: Option<Vec<u8>>,
    pub perms: Permissions,
    pub name:  String,
}

impl Section {
    pub fn end(&self) -> u64 {
        self.addr as u64 + self.size as u64
    }

    pub fn contains(&self, va: VA) -> bool {
        va >= self.addr && (va as u64) < self.end()
    }
}

/// Flat address-indexed view of the loaded image: an ordered collection of
/// non-overlapping sections. Immutable once built.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AddressSpace {
    sections: Vec<Section>,
}

impl AddressSpace {
    pub fn with_sections(mut sections: Vec<Section>) -> Result<AddressSpace> {
        sections.sort_by_key(|sec| sec.addr);

        for pair in sections.windows(2) {
            if pair[0].end() > pair[1].addr as u64 {
                return Err(
                    AddressSpaceError::OverlappingSections(pair[0].name.clone(), pair[1].name.clone()).into(),
                );
            }
        }

        Ok(AddressSpace { sections })
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn section_for(&self, va: VA) -> Option<&Section> {
        self.sections.iter().find(|sec| sec.contains(va))
    }

    pub fn is_executable(&self, va: VA) -> bool {
        self.section_for(va)
            .map(|sec| sec.perms.contains(Permissions::X))
            .unwrap_or(false)
    }

    pub fn byte_at(&self, va: VA) -> Result<u8> {
        let sec = self.section_for(va).ok_or(AddressSpaceError::NotMapped(va))?;
        let bytes = sec.bytes.as_ref().ok_or(AddressSpaceError::NoData(va))?;
        Ok(bytes[(va - sec.addr) as usize])
    }

    /// Read up to `count` bytes starting at `va`, truncated at the end of the
    /// containing section. This is the decoder's fetch window.
    pub fn read_at_most(&self, va: VA, count: usize) -> Result<Vec<u8>> {
        let sec = self.section_for(va).ok_or(AddressSpaceError::NotMapped(va))?;
        let bytes = sec.bytes.as_ref().ok_or(AddressSpaceError::NoData(va))?;
        let offset = (va - sec.addr) as usize;
        let end = bytes.len().min(offset + count);
        Ok(bytes[offset..end].to_vec())
    }

    /// The `[min_addr, max_addr)` span of the image, if any section is mapped.
    pub fn bounds(&self) -> Option<(VA, u64)> {
        let first = self.sections.first()?;
        let last = self.sections.last()?;
        Some((first.addr, last.end()))
    }
}
