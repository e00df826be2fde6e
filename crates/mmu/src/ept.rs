//! EPT translation
//!
//! Software walk of an EPT hierarchy, mirroring what the processor does when translating a
//! guest-physical address. The walk only reads the tables: accessed and dirty flags are reported
//! as found, never set.

use core::fmt;

use utils::{GuestPhysAddr, HostPhysAddr};
use vmx::bitmaps::EptPermissions;
use vmx::ept::{
    EptEntry, EptMemoryType, EptPde, EptPde2M, EptPdpte, EptPdpte1G, EptPml4e, EptPte, Eptp,
    GIANT_PAGE_SIZE, HUGE_PAGE_SIZE, PAGE_SIZE,
};
use vmx::exit_qualification::EptViolationQualification;

use crate::walker::Level;

/// Bits 7:3 of a PML4E are reserved.
const PML4E_RESERVED: u64 = 0b1111_1000;

// ————————————————————————————————— Memory ————————————————————————————————— //

/// The memory holding the EPT paging structures.
pub trait EptMemory {
    /// Reads the 8-byte entry at `addr`, returns `None` if the address is not backed by memory.
    fn read_entry(&self, addr: HostPhysAddr) -> Option<u64>;
}

/// Host physical memory mapped at a fixed offset in the current address space.
pub struct DirectMap {
    offset: u64,
}

impl DirectMap {
    /// Creates a direct map where host physical address `hpa` is accessible at `hpa + offset`.
    ///
    /// # Safety
    ///
    /// Every table reachable from the EPT pointers translated through this map must be mapped and
    /// readable at the offset.
    pub unsafe fn new(offset: u64) -> Self {
        Self { offset }
    }
}

impl EptMemory for DirectMap {
    fn read_entry(&self, addr: HostPhysAddr) -> Option<u64> {
        let ptr = addr.as_u64().wrapping_add(self.offset) as *const u64;
        // SAFETY: the creator of the map guarantees that the tables are mapped.
        Some(unsafe { ptr.read_volatile() })
    }
}

// ————————————————————————————————— Errors ————————————————————————————————— //

/// The walk could not be performed.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum EptError {
    /// Only 4-level hierarchies are supported.
    InvalidWalkLength(u8),
    /// The paging structures must be accessed as UC or WB.
    InvalidMemoryType(EptMemoryType),
    /// A table entry is not backed by memory.
    Unreachable(HostPhysAddr),
}

impl fmt::Display for EptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EptError::InvalidWalkLength(len) => write!(f, "unsupported EPT walk length {}", len),
            EptError::InvalidMemoryType(ty) => write!(f, "invalid EPTP memory type {:?}", ty),
            EptError::Unreachable(addr) => write!(f, "EPT entry at 0x{:x} is not in memory", addr),
        }
    }
}

// —————————————————————————————— Translations —————————————————————————————— //

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PageSize {
    Size4K,
    Size2M,
    Size1G,
}

impl PageSize {
    pub fn bytes(self) -> u64 {
        match self {
            PageSize::Size4K => PAGE_SIZE,
            PageSize::Size2M => HUGE_PAGE_SIZE,
            PageSize::Size1G => GIANT_PAGE_SIZE,
        }
    }
}

/// A successful translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mapping {
    pub guest_phys_addr: GuestPhysAddr,
    pub host_phys_addr: HostPhysAddr,
    /// Size of the page mapping the address.
    pub size: PageSize,
    /// Logical AND of the access rights of every entry of the path.
    pub permissions: EptPermissions,
    pub memory_type: EptMemoryType,
    pub ignore_pat: bool,
    /// Accessed flag of the leaf entry, `None` if the EPT pointer disables A/D flags.
    pub accessed: Option<bool>,
    /// Dirty flag of the leaf entry, `None` if the EPT pointer disables A/D flags.
    pub dirty: Option<bool>,
}

/// The outcome of a walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Translation {
    Mapped(Mapping),
    /// The address is not mapped, or the mapping does not allow the access.
    Violation {
        qualification: EptViolationQualification,
        guest_phys_addr: GuestPhysAddr,
        /// Level at which the walk stopped.
        level: Level,
    },
    /// An entry of the path is invalid.
    Misconfiguration { level: Level, entry: u64 },
}

impl Translation {
    pub fn mapping(&self) -> Option<&Mapping> {
        match self {
            Translation::Mapped(mapping) => Some(mapping),
            _ => None,
        }
    }

    pub fn host_phys_addr(&self) -> Option<HostPhysAddr> {
        self.mapping().map(|mapping| mapping.host_phys_addr)
    }
}

/// The attributes of the entry terminating a walk.
struct Leaf {
    frame: HostPhysAddr,
    size: PageSize,
    memory_type: EptMemoryType,
    ignore_pat: bool,
    accessed: bool,
    dirty: bool,
}

impl From<EptPdpte1G> for Leaf {
    fn from(entry: EptPdpte1G) -> Self {
        Leaf {
            frame: entry.address(),
            size: PageSize::Size1G,
            memory_type: entry.memory_type(),
            ignore_pat: entry.ignore_pat(),
            accessed: entry.accessed(),
            dirty: entry.dirty(),
        }
    }
}

impl From<EptPde2M> for Leaf {
    fn from(entry: EptPde2M) -> Self {
        Leaf {
            frame: entry.address(),
            size: PageSize::Size2M,
            memory_type: entry.memory_type(),
            ignore_pat: entry.ignore_pat(),
            accessed: entry.accessed(),
            dirty: entry.dirty(),
        }
    }
}

impl From<EptPte> for Leaf {
    fn from(entry: EptPte) -> Self {
        Leaf {
            frame: entry.address(),
            size: PageSize::Size4K,
            memory_type: entry.memory_type(),
            ignore_pat: entry.ignore_pat(),
            accessed: entry.accessed(),
            dirty: entry.dirty(),
        }
    }
}

/// Where an entry leads.
enum Step {
    Table(HostPhysAddr),
    Leaf(Leaf),
}

// —————————————————————————————————— Walk —————————————————————————————————— //

/// Checks that the walk can be performed with the given EPT pointer.
pub fn check_eptp(eptp: Eptp) -> Result<(), EptError> {
    if eptp.page_walk_length() != 4 {
        return Err(EptError::InvalidWalkLength(eptp.page_walk_length()));
    }
    match eptp.memory_type() {
        EptMemoryType::Uncacheable | EptMemoryType::WriteBack => Ok(()),
        other => Err(EptError::InvalidMemoryType(other)),
    }
}

/// Translates `gpa` through the hierarchy referenced by `eptp`.
///
/// `access` holds the read, write and execute rights the access requires, an empty set
/// translates without checking permissions.
pub fn translate<M>(
    memory: &M,
    eptp: Eptp,
    gpa: GuestPhysAddr,
    access: EptPermissions,
) -> Result<Translation, EptError>
where
    M: EptMemory + ?Sized,
{
    check_eptp(eptp)?;

    let access = access & EptPermissions::RWX;
    let mut allowed = EptPermissions::RWX | EptPermissions::USER_EXECUTE;
    let mut table = eptp.root();
    let mut level = Level::L4;

    loop {
        let entry_addr = table + level.entry_offset(gpa);
        let entry = memory
            .read_entry(entry_addr)
            .ok_or(EptError::Unreachable(entry_addr))?;
        log::trace!("EPT {} at 0x{:x}: 0x{:x}", level, entry_addr, entry);

        let permissions = EptPermissions::from_entry(entry);
        allowed &= permissions;
        if !permissions.is_present() {
            return Ok(violation(gpa, access, allowed, level));
        }
        let read_write = permissions & (EptPermissions::READ | EptPermissions::WRITE);
        if read_write == EptPermissions::WRITE {
            return Ok(misconfiguration(level, entry));
        }

        let step = match level {
            Level::L4 => {
                if entry & PML4E_RESERVED != 0 {
                    return Ok(misconfiguration(level, entry));
                }
                Step::Table(EptPml4e::from_raw(entry).address())
            }
            Level::L3 => match EptPdpte::from_raw(entry) {
                EptPdpte::Table(next) => Step::Table(next.address()),
                EptPdpte::Page(page) => Step::Leaf(page.into()),
            },
            Level::L2 => match EptPde::from_raw(entry) {
                EptPde::Table(next) => Step::Table(next.address()),
                EptPde::Page(page) => Step::Leaf(page.into()),
            },
            Level::L1 => Step::Leaf(EptPte::from_raw(entry).into()),
        };

        match step {
            Step::Table(next) => {
                table = next;
                // The L1 entry always terminates the walk.
                level = match level.next() {
                    Some(next) => next,
                    None => return Ok(misconfiguration(level, entry)),
                };
            }
            Step::Leaf(leaf) => {
                if let EptMemoryType::Reserved(_) = leaf.memory_type {
                    return Ok(misconfiguration(level, entry));
                }
                if !allowed.contains(access) {
                    return Ok(violation(gpa, access, allowed, level));
                }
                return Ok(Translation::Mapped(mapping(eptp, gpa, leaf, allowed)));
            }
        }
    }
}

fn mapping(eptp: Eptp, gpa: GuestPhysAddr, leaf: Leaf, permissions: EptPermissions) -> Mapping {
    let offset = gpa.as_u64() & (leaf.size.bytes() - 1);
    let ad = eptp.accessed_dirty();
    Mapping {
        guest_phys_addr: gpa,
        host_phys_addr: leaf.frame + offset,
        size: leaf.size,
        permissions,
        memory_type: leaf.memory_type,
        ignore_pat: leaf.ignore_pat,
        accessed: ad.then(|| leaf.accessed),
        dirty: ad.then(|| leaf.dirty),
    }
}

fn violation(
    gpa: GuestPhysAddr,
    access: EptPermissions,
    allowed: EptPermissions,
    level: Level,
) -> Translation {
    log::debug!(
        "EPT violation at {} for 0x{:x}: {:?} not in {:?}",
        level,
        gpa,
        access,
        allowed
    );
    Translation::Violation {
        qualification: EptViolationQualification::new(access, allowed),
        guest_phys_addr: gpa,
        level,
    }
}

fn misconfiguration(level: Level, entry: u64) -> Translation {
    log::debug!("EPT misconfiguration: {} 0x{:x}", level, entry);
    Translation::Misconfiguration { level, entry }
}

// ————————————————————————————————— Tests —————————————————————————————————— //
