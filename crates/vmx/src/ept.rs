//! Extended Page Table
//!
//! Layout of the EPT pointer and of the EPT paging-structure entries. See Intel SDM Vol. 3C
//! Section 29.3.2 and Section 25.6.11.
//!
//! Bits not described by a record (e.g. bits 7:3 of a PML4E) are reserved or ignored, they are
//! reported by [`Record::undefined_bits`].

use utils::bits::Record;
use utils::HostPhysAddr;

use crate::bitmaps::EptPermissions;

pub const GIANT_PAGE_SIZE: u64 = 1 << 30;
pub const HUGE_PAGE_SIZE: u64 = 1 << 21;
pub const PAGE_SIZE: u64 = 1 << 12;

/// Number of entries in an EPT paging structure.
pub const ENTRIES_PER_TABLE: usize = 512;

utils::bit_enum! {
    /// Memory types usable for EPT paging structures and mappings.
    pub enum EptMemoryType: 3 {
        Uncacheable = 0,
        WriteCombining = 1,
        WriteThrough = 4,
        WriteProtected = 5,
        WriteBack = 6,
        _ => Reserved,
    }
}

// ——————————————————————————————— EPT Pointer ———————————————————————————————— //

utils::bit_record! {
    /// EPT pointer, [`VmcsField::EptPointer`](crate::fields::VmcsField::EptPointer).
    pub struct Eptp(u64) {
        /// Memory type used to access the paging structures, only UC and WB are valid.
        memory_type, with_memory_type: EptMemoryType = 0, 3;
        page_walk_length_minus_one, with_page_walk_length_minus_one: u8 = 3, 3;
        accessed_dirty, with_accessed_dirty: bool = 6, 1;
        supervisor_shadow_stack, with_supervisor_shadow_stack: bool = 7, 1;
        page_frame_number, with_page_frame_number: u64 = 12, 36;
    }
}

impl Eptp {
    /// An EPT pointer with a write-back, 4-level hierarchy rooted at `root`.
    pub fn new(root: HostPhysAddr) -> Self {
        Self::default()
            .with_memory_type(EptMemoryType::WriteBack)
            .with_page_walk_length_minus_one(3)
            .with_page_frame_number(root.as_u64() >> 12)
    }

    /// Number of levels of the hierarchy.
    pub fn page_walk_length(self) -> u8 {
        self.page_walk_length_minus_one() + 1
    }

    /// Physical address of the root PML4 table.
    pub fn root(self) -> HostPhysAddr {
        HostPhysAddr::new(self.page_frame_number() << 12)
    }
}

// —————————————————————————————— Page Entries —————————————————————————————— //

/// Accessors shared by all EPT paging-structure entries.
pub trait EptEntry: Record {
    /// Access rights granted by the entry.
    fn permissions(self) -> EptPermissions {
        EptPermissions::from_entry(self.to_bits())
    }

    /// An entry is present if it grants any of read, write or execute.
    fn is_present(self) -> bool {
        self.permissions().is_present()
    }

    /// Physical address of the next table or of the mapped page.
    fn address(self) -> HostPhysAddr;
}

utils::bit_record! {
    /// EPT PML4 entry, references an EPT page-directory-pointer table.
    pub struct EptPml4e(u64) {
        [alias] access, with_access: u8 = 0, 3;
        read, with_read: bool = 0, 1;
        write, with_write: bool = 1, 1;
        execute, with_execute: bool = 2, 1;
        accessed, with_accessed: bool = 8, 1;
        user_execute, with_user_execute: bool = 10, 1;
        page_frame_number, with_page_frame_number: u64 = 12, 36;
    }
}

utils::bit_record! {
    /// EPT page-directory-pointer-table entry that references an EPT page directory.
    pub struct EptPdpteTable(u64) {
        [alias] access, with_access: u8 = 0, 3;
        read, with_read: bool = 0, 1;
        write, with_write: bool = 1, 1;
        execute, with_execute: bool = 2, 1;
        /// Always 0 for an entry referencing a table.
        large_page, with_large_page: bool = 7, 1;
        accessed, with_accessed: bool = 8, 1;
        user_execute, with_user_execute: bool = 10, 1;
        page_frame_number, with_page_frame_number: u64 = 12, 36;
    }
}

utils::bit_record! {
    /// EPT page-directory-pointer-table entry that maps a 1-GByte page.
    pub struct EptPdpte1G(u64) {
        [alias] access, with_access: u8 = 0, 3;
        read, with_read: bool = 0, 1;
        write, with_write: bool = 1, 1;
        execute, with_execute: bool = 2, 1;
        memory_type, with_memory_type: EptMemoryType = 3, 3;
        ignore_pat, with_ignore_pat: bool = 6, 1;
        /// Always 1 for an entry mapping a page.
        large_page, with_large_page: bool = 7, 1;
        accessed, with_accessed: bool = 8, 1;
        dirty, with_dirty: bool = 9, 1;
        user_execute, with_user_execute: bool = 10, 1;
        page_frame_number, with_page_frame_number: u32 = 30, 18;
        verify_guest_paging, with_verify_guest_paging: bool = 57, 1;
        paging_write_access, with_paging_write_access: bool = 58, 1;
        supervisor_shadow_stack, with_supervisor_shadow_stack: bool = 60, 1;
        suppress_ve, with_suppress_ve: bool = 63, 1;
    }
}

utils::bit_record! {
    /// EPT page-directory entry that references an EPT page table.
    pub struct EptPdeTable(u64) {
        [alias] access, with_access: u8 = 0, 3;
        read, with_read: bool = 0, 1;
        write, with_write: bool = 1, 1;
        execute, with_execute: bool = 2, 1;
        /// Always 0 for an entry referencing a table.
        large_page, with_large_page: bool = 7, 1;
        accessed, with_accessed: bool = 8, 1;
        user_execute, with_user_execute: bool = 10, 1;
        page_frame_number, with_page_frame_number: u64 = 12, 36;
    }
}

utils::bit_record! {
    /// EPT page-directory entry that maps a 2-MByte page.
    pub struct EptPde2M(u64) {
        [alias] access, with_access: u8 = 0, 3;
        read, with_read: bool = 0, 1;
        write, with_write: bool = 1, 1;
        execute, with_execute: bool = 2, 1;
        memory_type, with_memory_type: EptMemoryType = 3, 3;
        ignore_pat, with_ignore_pat: bool = 6, 1;
        /// Always 1 for an entry mapping a page.
        large_page, with_large_page: bool = 7, 1;
        accessed, with_accessed: bool = 8, 1;
        dirty, with_dirty: bool = 9, 1;
        user_execute, with_user_execute: bool = 10, 1;
        page_frame_number, with_page_frame_number: u32 = 21, 27;
        verify_guest_paging, with_verify_guest_paging: bool = 57, 1;
        paging_write_access, with_paging_write_access: bool = 58, 1;
        supervisor_shadow_stack, with_supervisor_shadow_stack: bool = 60, 1;
        suppress_ve, with_suppress_ve: bool = 63, 1;
    }
}

utils::bit_record! {
    /// EPT page-table entry, maps a 4-KByte page.
    pub struct EptPte(u64) {
        [alias] access, with_access: u8 = 0, 3;
        read, with_read: bool = 0, 1;
        write, with_write: bool = 1, 1;
        execute, with_execute: bool = 2, 1;
        memory_type, with_memory_type: EptMemoryType = 3, 3;
        ignore_pat, with_ignore_pat: bool = 6, 1;
        accessed, with_accessed: bool = 8, 1;
        dirty, with_dirty: bool = 9, 1;
        user_execute, with_user_execute: bool = 10, 1;
        page_frame_number, with_page_frame_number: u64 = 12, 36;
        verify_guest_paging, with_verify_guest_paging: bool = 57, 1;
        paging_write_access, with_paging_write_access: bool = 58, 1;
        supervisor_shadow_stack, with_supervisor_shadow_stack: bool = 60, 1;
        sub_page_write, with_sub_page_write: bool = 61, 1;
        suppress_ve, with_suppress_ve: bool = 63, 1;
    }
}

impl EptEntry for EptPml4e {
    fn address(self) -> HostPhysAddr {
        HostPhysAddr::new(self.page_frame_number() << 12)
    }
}

impl EptEntry for EptPdpteTable {
    fn address(self) -> HostPhysAddr {
        HostPhysAddr::new(self.page_frame_number() << 12)
    }
}

impl EptEntry for EptPdpte1G {
    fn address(self) -> HostPhysAddr {
        HostPhysAddr::new((self.page_frame_number() as u64) << 30)
    }
}

impl EptEntry for EptPdeTable {
    fn address(self) -> HostPhysAddr {
        HostPhysAddr::new(self.page_frame_number() << 12)
    }
}

impl EptEntry for EptPde2M {
    fn address(self) -> HostPhysAddr {
        HostPhysAddr::new((self.page_frame_number() as u64) << 21)
    }
}

impl EptEntry for EptPte {
    fn address(self) -> HostPhysAddr {
        HostPhysAddr::new(self.page_frame_number() << 12)
    }
}

/// Bit 7 of a PDPTE or PDE, selects between a table reference and a page mapping.
const LARGE_PAGE_BIT: u64 = 1 << 7;

/// An EPT page-directory-pointer-table entry.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum EptPdpte {
    Table(EptPdpteTable),
    Page(EptPdpte1G),
}

impl EptPdpte {
    pub fn from_raw(raw: u64) -> Self {
        if raw & LARGE_PAGE_BIT != 0 {
            EptPdpte::Page(EptPdpte1G::from_raw(raw))
        } else {
            EptPdpte::Table(EptPdpteTable::from_raw(raw))
        }
    }

    pub fn raw(self) -> u64 {
        match self {
            EptPdpte::Table(entry) => entry.raw(),
            EptPdpte::Page(entry) => entry.raw(),
        }
    }

    pub fn permissions(self) -> EptPermissions {
        EptPermissions::from_entry(self.raw())
    }
}

/// An EPT page-directory entry.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum EptPde {
    Table(EptPdeTable),
    Page(EptPde2M),
}

impl EptPde {
    pub fn from_raw(raw: u64) -> Self {
        if raw & LARGE_PAGE_BIT != 0 {
            EptPde::Page(EptPde2M::from_raw(raw))
        } else {
            EptPde::Table(EptPdeTable::from_raw(raw))
        }
    }

    pub fn raw(self) -> u64 {
        match self {
            EptPde::Table(entry) => entry.raw(),
            EptPde::Page(entry) => entry.raw(),
        }
    }

    pub fn permissions(self) -> EptPermissions {
        EptPermissions::from_entry(self.raw())
    }
}

// ————————————————————————————————— Tests —————————————————————————————————— //
