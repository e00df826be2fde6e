//! Paging levels
//!
//! A 4-level hierarchy translates 48-bit addresses, each level consuming 9 bits of the address.

use core::fmt;

use utils::GuestPhysAddr;

/// Number of address bits consumed by each level.
const PAGE_TABLE_INDEX_LEN: u32 = 9;
/// Mask for the last 9 bits, corresponding to the size of page table indexes.
const PAGE_TABLE_INDEX_MASK: u64 = (1 << PAGE_TABLE_INDEX_LEN) - 1;
const L1_INDEX_START: u32 = 12;

/// Size of an entry, in bytes.
pub const ENTRY_SIZE: u64 = 8;

// —————————————————————————————— Page Levels ——————————————————————————————— //

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Level {
    /// PML4
    L4,
    /// Page-directory-pointer table
    L3,
    /// Page directory
    L2,
    /// Page table
    L1,
}

impl Level {
    /// Returns the next level (i.e. the level of pages pointed by the entries of the current
    /// level)
    pub fn next(self) -> Option<Self> {
        match self {
            Level::L4 => Some(Level::L3),
            Level::L3 => Some(Level::L2),
            Level::L2 => Some(Level::L1),
            Level::L1 => None,
        }
    }

    /// Position of the lowest address bit indexing this level.
    pub fn shift(self) -> u32 {
        match self {
            Level::L4 => L1_INDEX_START + 3 * PAGE_TABLE_INDEX_LEN,
            Level::L3 => L1_INDEX_START + 2 * PAGE_TABLE_INDEX_LEN,
            Level::L2 => L1_INDEX_START + PAGE_TABLE_INDEX_LEN,
            Level::L1 => L1_INDEX_START,
        }
    }

    /// Returns the size of the memory region controlled by each entry of this level.
    pub fn area_size(self) -> u64 {
        1 << self.shift()
    }

    /// Returns the index of the entry controlling `addr` in a table of this level.
    pub fn index(self, addr: GuestPhysAddr) -> usize {
        ((addr.as_u64() >> self.shift()) & PAGE_TABLE_INDEX_MASK) as usize
    }

    /// Byte offset of the entry controlling `addr` within a table of this level.
    pub fn entry_offset(self, addr: GuestPhysAddr) -> u64 {
        self.index(addr) as u64 * ENTRY_SIZE
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Level::L4 => "PML4E",
            Level::L3 => "PDPTE",
            Level::L2 => "PDE",
            Level::L1 => "PTE",
        };
        write!(f, "{}", name)
    }
}

// ————————————————————————————————— Tests —————————————————————————————————— //

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn indexes() {
        let addr = GuestPhysAddr::new(0x0000_7f80_4020_1abc);
        assert_eq!(Level::L4.index(addr), addr.l4_index());
        assert_eq!(Level::L3.index(addr), addr.l3_index());
        assert_eq!(Level::L2.index(addr), addr.l2_index());
        assert_eq!(Level::L1.index(addr), addr.l1_index());
        assert_eq!(Level::L4.index(addr), 0xff);
        assert_eq!(Level::L3.entry_offset(addr), 8);
    }

    #[test]
    fn levels() {
        assert_eq!(Level::L4.next(), Some(Level::L3));
        assert_eq!(Level::L1.next(), None);
        assert_eq!(Level::L3.area_size(), 1 << 30);
        assert_eq!(Level::L2.area_size(), 1 << 21);
        assert_eq!(Level::L1.area_size(), 0x1000);
        assert_eq!(format!("{}", Level::L3), "PDPTE");
    }
}
