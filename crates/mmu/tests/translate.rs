use std::collections::BTreeMap;

use mmu::{translate, EptError, EptMemory, Level, PageSize, Translation};
use utils::{GuestPhysAddr, HostPhysAddr};
use vmx::bitmaps::EptPermissions;
use vmx::ept::{
    EptMemoryType, EptPdeTable, EptPdpte1G, EptPdpteTable, EptPml4e, EptPte, Eptp,
};

const PML4: u64 = 0x1000;
const PDPT: u64 = 0x2000;
const PD: u64 = 0x3000;
const PT: u64 = 0x4000;

/// Sparse physical memory, missing entries read as zero.
#[derive(Default)]
struct Memory {
    words: BTreeMap<u64, u64>,
}

impl Memory {
    fn set(&mut self, table: u64, index: usize, entry: u64) {
        self.words.insert(table + index as u64 * 8, entry);
    }
}

impl EptMemory for Memory {
    fn read_entry(&self, addr: HostPhysAddr) -> Option<u64> {
        if addr.as_u64() >= 1 << 20 {
            return None;
        }
        Some(self.words.get(&addr.as_u64()).copied().unwrap_or(0))
    }
}

fn eptp() -> Eptp {
    Eptp::new(HostPhysAddr::new(PML4))
}

fn pml4e(next: u64) -> u64 {
    EptPml4e::default()
        .with_access(0b111)
        .with_page_frame_number(next >> 12)
        .raw()
}

/// PML4E[0] -> PDPT, PDPTE[1] maps the 1G page at `0x1000 << 30`.
fn giant_page(access: u8) -> Memory {
    let mut memory = Memory::default();
    memory.set(PML4, 0, pml4e(PDPT));
    let page = EptPdpte1G::default()
        .with_access(access)
        .with_large_page(true)
        .with_memory_type(EptMemoryType::WriteBack)
        .with_page_frame_number(0x1000);
    memory.set(PDPT, 1, page.raw());
    memory
}

/// PML4E[0] -> PDPT[0] -> PD[0] -> PT[2] maps the 4K page at 0x8_0000.
fn small_page(pte: EptPte) -> Memory {
    let mut memory = Memory::default();
    memory.set(PML4, 0, pml4e(PDPT));
    let pdpte = EptPdpteTable::default()
        .with_access(0b111)
        .with_user_execute(true)
        .with_page_frame_number(PD >> 12);
    memory.set(PDPT, 0, pdpte.raw());
    let pde = EptPdeTable::default()
        .with_access(0b111)
        .with_user_execute(true)
        .with_page_frame_number(PT >> 12);
    memory.set(PD, 0, pde.raw());
    memory.set(PT, 2, pte.raw());
    memory
}

fn rwx_pte() -> EptPte {
    EptPte::default()
        .with_access(0b111)
        .with_memory_type(EptMemoryType::WriteBack)
        .with_page_frame_number(0x80)
}

#[test]
fn giant_page_translation() {
    let memory = giant_page(0b111);
    let gpa = GuestPhysAddr::new(0x4000_0000);
    let translation = translate(&memory, eptp(), gpa, EptPermissions::RWX).unwrap();

    let mapping = translation.mapping().unwrap();
    assert_eq!(mapping.host_phys_addr, HostPhysAddr::new(0x1000 << 30));
    assert_eq!(mapping.size, PageSize::Size1G);
    assert_eq!(mapping.permissions & EptPermissions::RWX, EptPermissions::RWX);
    assert_eq!(mapping.memory_type, EptMemoryType::WriteBack);
    assert_eq!(mapping.accessed, None);
    assert_eq!(mapping.dirty, None);

    // The offset within the page is carried over.
    let gpa = GuestPhysAddr::new(0x4123_4567);
    let translation = translate(&memory, eptp(), gpa, EptPermissions::READ).unwrap();
    assert_eq!(
        translation.host_phys_addr(),
        Some(HostPhysAddr::new((0x1000 << 30) + 0x123_4567))
    );
}

#[test]
fn write_violation() {
    let memory = giant_page(0b101);
    let gpa = GuestPhysAddr::new(0x4000_0000);

    let translation = translate(&memory, eptp(), gpa, EptPermissions::WRITE).unwrap();
    match translation {
        Translation::Violation {
            qualification,
            guest_phys_addr,
            level,
        } => {
            assert!(qualification.write());
            assert!(!qualification.read());
            assert!(!qualification.writable());
            assert!(qualification.readable());
            assert!(qualification.executable());
            assert_eq!(guest_phys_addr, gpa);
            assert_eq!(level, Level::L3);
        }
        other => panic!("Expected a violation, got {:?}", other),
    }

    // Reads are still allowed.
    let translation = translate(&memory, eptp(), gpa, EptPermissions::READ).unwrap();
    assert!(translation.mapping().is_some());
}

#[test]
fn not_present() {
    let memory = giant_page(0b111);
    let gpa = GuestPhysAddr::new(0x8000_0000);
    let translation = translate(&memory, eptp(), gpa, EptPermissions::READ).unwrap();
    match translation {
        Translation::Violation {
            qualification,
            level,
            ..
        } => {
            assert!(qualification.read());
            assert_eq!(qualification.allowed(), EptPermissions::empty());
            assert_eq!(level, Level::L3);
        }
        other => panic!("Expected a violation, got {:?}", other),
    }
}

#[test]
fn small_page_translation() {
    let memory = small_page(rwx_pte().with_user_execute(true));
    let gpa = GuestPhysAddr::new(0x2abc);
    let mapping = *translate(&memory, eptp(), gpa, EptPermissions::EXECUTE)
        .unwrap()
        .mapping()
        .unwrap();
    assert_eq!(mapping.host_phys_addr, HostPhysAddr::new(0x8_0abc));
    assert_eq!(mapping.size, PageSize::Size4K);
    // The PML4E does not grant user execution.
    assert_eq!(mapping.permissions, EptPermissions::RWX);
}

#[test]
fn permissions_are_combined() {
    let memory = small_page(rwx_pte().with_access(0b001));
    let gpa = GuestPhysAddr::new(0x2000);
    let translation = translate(&memory, eptp(), gpa, EptPermissions::EXECUTE).unwrap();
    match translation {
        Translation::Violation {
            qualification,
            level,
            ..
        } => {
            assert!(qualification.instruction_fetch());
            assert_eq!(qualification.allowed(), EptPermissions::READ);
            assert_eq!(level, Level::L1);
        }
        other => panic!("Expected a violation, got {:?}", other),
    }
}

#[test]
fn accessed_dirty() {
    let memory = small_page(rwx_pte().with_accessed(true));
    let gpa = GuestPhysAddr::new(0x2000);
    let eptp = eptp().with_accessed_dirty(true);
    let mapping = *translate(&memory, eptp, gpa, EptPermissions::READ)
        .unwrap()
        .mapping()
        .unwrap();
    assert_eq!(mapping.accessed, Some(true));
    assert_eq!(mapping.dirty, Some(false));

    // Flags are reported as found, the tables are left untouched.
    assert_eq!(memory.words.get(&(PT + 16)), Some(&rwx_pte().with_accessed(true).raw()));
}

#[test]
fn misconfigurations() {
    // Write without read.
    let memory = small_page(rwx_pte().with_access(0b010));
    let gpa = GuestPhysAddr::new(0x2000);
    let translation = translate(&memory, eptp(), gpa, EptPermissions::empty());
    assert_eq!(
        translation,
        Ok(Translation::Misconfiguration {
            level: Level::L1,
            entry: rwx_pte().with_access(0b010).raw(),
        })
    );

    // Reserved memory type.
    let pte = rwx_pte().with_memory_type(EptMemoryType::Reserved(2));
    let memory = small_page(pte);
    let translation = translate(&memory, eptp(), gpa, EptPermissions::READ);
    assert_eq!(
        translation,
        Ok(Translation::Misconfiguration {
            level: Level::L1,
            entry: pte.raw(),
        })
    );

    // Reserved bits of a PML4E.
    let mut memory = giant_page(0b111);
    let entry = pml4e(PDPT) | 1 << 7;
    memory.set(PML4, 0, entry);
    let gpa = GuestPhysAddr::new(0x4000_0000);
    let translation = translate(&memory, eptp(), gpa, EptPermissions::READ);
    assert_eq!(
        translation,
        Ok(Translation::Misconfiguration {
            level: Level::L4,
            entry,
        })
    );
}

#[test]
fn invalid_eptp() {
    let memory = giant_page(0b111);
    let gpa = GuestPhysAddr::new(0x4000_0000);

    let eptp5 = eptp().with_page_walk_length_minus_one(4);
    assert_eq!(
        translate(&memory, eptp5, gpa, EptPermissions::READ),
        Err(EptError::InvalidWalkLength(5))
    );

    let eptp_wt = eptp().with_memory_type(EptMemoryType::WriteThrough);
    assert_eq!(
        translate(&memory, eptp_wt, gpa, EptPermissions::READ),
        Err(EptError::InvalidMemoryType(EptMemoryType::WriteThrough))
    );

    // Tables outside of memory.
    let eptp_far = Eptp::new(HostPhysAddr::new(1 << 30));
    assert_eq!(
        translate(&memory, eptp_far, gpa, EptPermissions::READ),
        Err(EptError::Unreachable(HostPhysAddr::new(1 << 30)))
    );
}
