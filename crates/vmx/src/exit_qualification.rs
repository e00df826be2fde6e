//! VM-exit qualification
//!
//! The meaning of the exit qualification depends on the basic exit reason. The raw word is only
//! turned into a typed view through [`ExitQualification::decode`] (or
//! [`ExitQualification::decode_exception`] for exception exits), which selects the layout.
//!
//! See Intel SDM Vol. 3C Section 28.2.1.

use crate::bitmaps::EptPermissions;
use crate::errors::{Trapnr, VmxExitReason};
use crate::operands::Register;
use utils::bits::Record;

// ——————————————————————————— Debug Exceptions ———————————————————————————— //

utils::bit_record! {
    /// Qualification of debug exceptions (#DB), Table 28-1.
    pub struct DebugQualification(u64) {
        b0, with_b0: bool = 0, 1;
        b1, with_b1: bool = 1, 1;
        b2, with_b2: bool = 2, 1;
        b3, with_b3: bool = 3, 1;
        /// Bus-lock detected.
        bus_lock, with_bus_lock: bool = 11, 1;
        /// Debug register access detected.
        debug_register_access, with_debug_register_access: bool = 13, 1;
        single_step, with_single_step: bool = 14, 1;
        /// The exception occurred inside an RTM region.
        rtm, with_rtm: bool = 16, 1;
    }
}

impl DebugQualification {
    /// Returns true if the breakpoint condition `idx` (0 to 3) was met.
    pub fn breakpoint(self, idx: u8) -> bool {
        idx < 4 && utils::bits::extract(self.raw(), idx as u32, 1) == 1
    }
}

// —————————————————————————————— Task Switch —————————————————————————————— //

utils::bit_enum! {
    /// What initiated a task switch.
    pub enum TaskSwitchSource: 2 {
        Call = 0,
        Iret = 1,
        Jmp = 2,
        TaskGate = 3,
    }
}

utils::bit_record! {
    /// Qualification of task switches, Table 28-2.
    pub struct TaskSwitchQualification(u64) {
        /// Selector of the task-state segment to switch to.
        selector, with_selector: u16 = 0, 16;
        source, with_source: TaskSwitchSource = 30, 2;
    }
}

// ——————————————————————— Control Register Accesses ——————————————————————— //

utils::bit_enum! {
    pub enum CrAccessType: 2 {
        MovToCr = 0,
        MovFromCr = 1,
        Clts = 2,
        Lmsw = 3,
    }
}

utils::bit_enum! {
    pub enum LmswOperandType: 1 {
        Register = 0,
        Memory = 1,
    }
}

utils::bit_record! {
    /// Qualification of control-register accesses, Table 28-3.
    pub struct ControlRegisterAccess(u64) {
        /// Number of the control register (0 for CLTS and LMSW).
        control_register, with_control_register: u8 = 0, 4;
        access_type, with_access_type: CrAccessType = 4, 2;
        /// LMSW only.
        lmsw_operand_type, with_lmsw_operand_type: LmswOperandType = 6, 1;
        /// MOV CR only.
        general_purpose_register, with_general_purpose_register: Register = 8, 4;
        /// LMSW only.
        lmsw_source_data, with_lmsw_source_data: u16 = 16, 16;
    }
}

// ———————————————————————— Debug Register Accesses ————————————————————————— //

utils::bit_enum! {
    pub enum DrDirection: 1 {
        MovToDr = 0,
        MovFromDr = 1,
    }
}

utils::bit_record! {
    /// Qualification of MOV DR, Table 28-4.
    pub struct DebugRegisterAccess(u64) {
        debug_register, with_debug_register: u8 = 0, 3;
        direction, with_direction: DrDirection = 4, 1;
        general_purpose_register, with_general_purpose_register: Register = 8, 4;
    }
}

// ———————————————————————————— I/O Instructions ———————————————————————————— //

utils::bit_record! {
    /// Qualification of I/O instructions, Table 28-5.
    pub struct IoInstructionQualification(u64) {
        /// Size of the access minus one (0, 1 or 3).
        size, with_size: u8 = 0, 3;
        direction_in, with_direction_in: bool = 3, 1;
        string, with_string: bool = 4, 1;
        rep, with_rep: bool = 5, 1;
        /// The port number is an immediate operand (otherwise it comes from DX).
        immediate, with_immediate: bool = 6, 1;
        port, with_port: u16 = 16, 16;
    }
}

impl IoInstructionQualification {
    /// Size of the access in bytes.
    pub fn access_size(self) -> u8 {
        self.size() + 1
    }
}

// ————————————————————————————— APIC Accesses ——————————————————————————————— //

utils::bit_enum! {
    pub enum ApicAccessType: 4 {
        LinearRead = 0,
        LinearWrite = 1,
        LinearFetch = 2,
        LinearEventDelivery = 3,
        GuestPhysicalEventDelivery = 10,
        GuestPhysicalFetch = 15,
        _ => Undefined,
    }
}

utils::bit_record! {
    /// Qualification of APIC accesses, Table 28-6.
    pub struct ApicAccessQualification(u64) {
        /// Offset within the APIC page, for linear accesses.
        offset, with_offset: u16 = 0, 12;
        access_type, with_access_type: ApicAccessType = 12, 4;
        asynchronous, with_asynchronous: bool = 16, 1;
    }
}

// ——————————————————————— Descriptor Table Accesses ———————————————————————— //

utils::bit_record! {
    /// Qualification of instructions with a memory operand (LGDT, SLDT, ...), the displacement
    /// of the operand, sign-extended.
    pub struct Displacement(u64) {
        displacement, with_displacement: u64 = 0, 64;
    }
}

// ————————————————————————————— EPT Violations ————————————————————————————— //

utils::bit_record! {
    /// Qualification of EPT violations, Table 28-7.
    pub struct EptViolationQualification(u64) {
        [alias] access_attempt, with_access_attempt: u8 = 0, 3;
        read, with_read: bool = 0, 1;
        write, with_write: bool = 1, 1;
        instruction_fetch, with_instruction_fetch: bool = 2, 1;
        [alias] permissions, with_permissions: u8 = 3, 4;
        readable, with_readable: bool = 3, 1;
        writable, with_writable: bool = 4, 1;
        executable, with_executable: bool = 5, 1;
        user_executable, with_user_executable: bool = 6, 1;
        guest_linear_address_valid, with_guest_linear_address_valid: bool = 7, 1;
        /// The access is to the translated linear address (otherwise to a paging structure).
        translated_access, with_translated_access: bool = 8, 1;
        user_mode_linear_address, with_user_mode_linear_address: bool = 9, 1;
        read_write_page, with_read_write_page: bool = 10, 1;
        execute_disable_page, with_execute_disable_page: bool = 11, 1;
        nmi_unblocking, with_nmi_unblocking: bool = 12, 1;
        shadow_stack_access, with_shadow_stack_access: bool = 13, 1;
        supervisor_shadow_stack, with_supervisor_shadow_stack: bool = 14, 1;
        guest_paging_verification, with_guest_paging_verification: bool = 15, 1;
        asynchronous, with_asynchronous: bool = 16, 1;
    }
}

impl EptViolationQualification {
    /// Builds the qualification of a violation from the attempted access and the permissions
    /// granted by the translation.
    pub fn new(attempted: EptPermissions, allowed: EptPermissions) -> Self {
        Self::default()
            .with_read(attempted.contains(EptPermissions::READ))
            .with_write(attempted.contains(EptPermissions::WRITE))
            .with_instruction_fetch(attempted.contains(EptPermissions::EXECUTE))
            .with_readable(allowed.contains(EptPermissions::READ))
            .with_writable(allowed.contains(EptPermissions::WRITE))
            .with_executable(allowed.contains(EptPermissions::EXECUTE))
            .with_user_executable(allowed.contains(EptPermissions::USER_EXECUTE))
    }

    /// The access that caused the violation.
    pub fn attempted(self) -> EptPermissions {
        EptPermissions::from_bits_truncate(self.access_attempt() as u16)
    }

    /// The permissions of the guest-physical address.
    pub fn allowed(self) -> EptPermissions {
        let mut perms = EptPermissions::from_bits_truncate(self.permissions() as u16 & 0b111);
        perms.set(EptPermissions::USER_EXECUTE, self.user_executable());
        perms
    }
}

// ————————————————————————————— Qualification —————————————————————————————— //

/// A decoded exit qualification.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ExitQualification {
    DebugException(DebugQualification),
    TaskSwitch(TaskSwitchQualification),
    ControlRegisterAccess(ControlRegisterAccess),
    DebugRegisterAccess(DebugRegisterAccess),
    IoInstruction(IoInstructionQualification),
    ApicAccess(ApicAccessQualification),
    /// LGDT, LIDT, SGDT or SIDT.
    DescriptorTableAccess(Displacement),
    /// LLDT, LTR, SLDT or STR.
    LdtrTrAccess(Displacement),
    EptViolation(EptViolationQualification),
    /// The exit reason has no qualification, or one that is not modelled.
    Undefined,
}

impl ExitQualification {
    /// Interprets `raw` according to the basic exit reason.
    ///
    /// Exceptions exits (basic reason 0) are decoded as [`ExitQualification::Undefined`], see
    /// [`ExitQualification::decode_exception`]. A word that sets bits the selected layout
    /// reserves (the processor clears them) is not a qualification of that layout and decodes as
    /// [`ExitQualification::Undefined`] too.
    ///
    /// This is the only check: the layout is chosen by the reason alone, and a word written for
    /// another layout that happens to leave the reserved bits clear decodes as a well-formed
    /// qualification of the selected layout. For instance `0x3` (MOV to CR3 from RAX) under the
    /// I/O instruction reason reads as a 4-byte OUT to port 0.
    pub fn decode(reason: VmxExitReason, raw: u64) -> Self {
        let qualification = match reason {
            VmxExitReason::TaskSwitch => {
                Self::TaskSwitch(TaskSwitchQualification::from_raw(raw))
            }
            VmxExitReason::ControlRegisterAccesses => {
                Self::ControlRegisterAccess(ControlRegisterAccess::from_raw(raw))
            }
            VmxExitReason::MovDR => Self::DebugRegisterAccess(DebugRegisterAccess::from_raw(raw)),
            VmxExitReason::IoInstruction => {
                Self::IoInstruction(IoInstructionQualification::from_raw(raw))
            }
            VmxExitReason::ApicAccess => Self::ApicAccess(ApicAccessQualification::from_raw(raw)),
            VmxExitReason::AccessToGdtrOrIdtr => {
                Self::DescriptorTableAccess(Displacement::from_raw(raw))
            }
            VmxExitReason::AccessToLdtrOrTr => Self::LdtrTrAccess(Displacement::from_raw(raw)),
            VmxExitReason::EptViolation => {
                Self::EptViolation(EptViolationQualification::from_raw(raw))
            }
            _ => {
                log::debug!("No exit qualification layout for {:?}", reason);
                return Self::Undefined;
            }
        };
        qualification.well_formed(raw)
    }

    /// Interprets the qualification of an exception or NMI exit, given the vector from the
    /// exit interruption information.
    pub fn decode_exception(vector: u8, raw: u64) -> Self {
        match Trapnr::from_u8(vector) {
            Some(Trapnr::Debug) => {
                Self::DebugException(DebugQualification::from_raw(raw)).well_formed(raw)
            }
            _ => {
                log::debug!("No exit qualification layout for vector {}", vector);
                Self::Undefined
            }
        }
    }

    fn well_formed(self, raw: u64) -> Self {
        let reserved = match self {
            Self::DebugException(q) => q.undefined_bits(),
            Self::TaskSwitch(q) => q.undefined_bits(),
            Self::ControlRegisterAccess(q) => q.undefined_bits(),
            Self::DebugRegisterAccess(q) => q.undefined_bits(),
            Self::IoInstruction(q) if !matches!(q.size(), 0 | 1 | 3) => q.size() as u64,
            Self::IoInstruction(q) => q.undefined_bits(),
            Self::ApicAccess(q) => q.undefined_bits(),
            Self::DescriptorTableAccess(q) | Self::LdtrTrAccess(q) => q.undefined_bits(),
            Self::EptViolation(q) => q.undefined_bits(),
            Self::Undefined => 0,
        };
        if reserved != 0 {
            log::debug!("Malformed exit qualification {:#x} for {:?}", raw, self);
            return Self::Undefined;
        }
        self
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }
}

// ————————————————————————————————— Tests —————————————————————————————————— //

#[cfg(test)]
mod test {
    use super::*;
    use utils::bits::{check_layout, Record};

    #[test]
    fn control_register_access() {
        // MOV to CR3 from RCX.
        let qualification = ExitQualification::decode(VmxExitReason::from_u16(0x1c), 0x103);
        let ExitQualification::ControlRegisterAccess(access) = qualification else {
            panic!("Wrong qualification: {:?}", qualification);
        };
        assert_eq!(access.control_register(), 3);
        assert_eq!(access.access_type(), CrAccessType::MovToCr);
        assert_eq!(access.general_purpose_register(), Register::Rcx);
    }

    #[test]
    fn reserved_bits_reject_foreign_layouts() {
        // Bit 8 is reserved in I/O qualifications.
        assert!(ExitQualification::decode(VmxExitReason::from_u16(0x1e), 0x103).is_undefined());
        assert!(ExitQualification::decode(VmxExitReason::from_u16(0x1f), 0x103).is_undefined());
    }

    #[test]
    fn layout_follows_the_reason() {
        // MOV to CR3 from RAX sets no bit the I/O layout reserves.
        let qualification = ExitQualification::decode(VmxExitReason::from_u16(0x1e), 0x3);
        let ExitQualification::IoInstruction(io) = qualification else {
            panic!("Wrong qualification: {:?}", qualification);
        };
        assert_eq!(io.size(), 3);
        assert_eq!(io.port(), 0);
        assert!(matches!(
            ExitQualification::decode(VmxExitReason::from_u16(0x1c), 0x3),
            ExitQualification::ControlRegisterAccess(_)
        ));
    }

    #[test]
    fn lmsw() {
        let access = ControlRegisterAccess::from_raw(0x0001_0070);
        assert_eq!(access.control_register(), 0);
        assert_eq!(access.access_type(), CrAccessType::Lmsw);
        assert_eq!(access.lmsw_operand_type(), LmswOperandType::Memory);
        assert_eq!(access.lmsw_source_data(), 1);

        let clts = ControlRegisterAccess::default().with_access_type(CrAccessType::Clts);
        assert_eq!(clts.raw(), 0x20);
    }

    #[test]
    fn debug_register_access() {
        let ExitQualification::DebugRegisterAccess(access) =
            ExitQualification::decode(VmxExitReason::MovDR, 0x0f17)
        else {
            panic!("Wrong qualification");
        };
        assert_eq!(access.debug_register(), 7);
        assert_eq!(access.direction(), DrDirection::MovFromDr);
        assert_eq!(access.general_purpose_register(), Register::R15);
    }

    #[test]
    fn io_instruction() {
        // OUT DX, AL on the first serial port.
        let io = IoInstructionQualification::from_raw(0x03f8_0000);
        assert_eq!(io.port(), 0x3f8);
        assert_eq!(io.access_size(), 1);
        assert!(!io.direction_in());
        assert!(!io.string());

        // REP INSD with an immediate port.
        let io = IoInstructionQualification::from_raw(0x0060_007b);
        assert_eq!(io.access_size(), 4);
        assert!(io.direction_in() && io.string() && io.rep() && io.immediate());
        assert_eq!(io.port(), 0x60);

        // There is no 3 bytes access.
        assert!(ExitQualification::decode(VmxExitReason::IoInstruction, 0x2).is_undefined());
    }

    #[test]
    fn task_switch_and_apic() {
        let ExitQualification::TaskSwitch(switch) =
            ExitQualification::decode(VmxExitReason::TaskSwitch, 0xc000_0028)
        else {
            panic!("Wrong qualification");
        };
        assert_eq!(switch.selector(), 0x28);
        assert_eq!(switch.source(), TaskSwitchSource::TaskGate);

        let apic = ApicAccessQualification::from_raw(0x1_10b0);
        assert_eq!(apic.offset(), 0xb0);
        assert_eq!(apic.access_type(), ApicAccessType::LinearWrite);
        assert!(apic.asynchronous());
        assert_eq!(
            ApicAccessQualification::from_raw(0x7000).access_type(),
            ApicAccessType::Undefined(7)
        );
    }

    #[test]
    fn debug_exception() {
        let qualification = ExitQualification::decode_exception(1, 0x4002);
        let ExitQualification::DebugException(debug) = qualification else {
            panic!("Wrong qualification: {:?}", qualification);
        };
        assert!(debug.single_step());
        assert!(debug.breakpoint(1));
        assert!(!debug.breakpoint(0));
        assert!(!debug.breakpoint(7));

        assert!(ExitQualification::decode_exception(14, 0x4002).is_undefined());
        assert!(ExitQualification::decode_exception(1, 0x8000).is_undefined());
        assert!(ExitQualification::decode(VmxExitReason::Exception, 0x4002).is_undefined());
    }

    #[test]
    fn descriptor_tables() {
        let displacement = (-8i64) as u64;
        assert_eq!(
            ExitQualification::decode(VmxExitReason::AccessToGdtrOrIdtr, displacement),
            ExitQualification::DescriptorTableAccess(Displacement::from_raw(displacement))
        );
        assert_eq!(
            ExitQualification::decode(VmxExitReason::AccessToLdtrOrTr, 0x10),
            ExitQualification::LdtrTrAccess(Displacement::from_raw(0x10))
        );
    }

    #[test]
    fn ept_violation() {
        let qualification = EptViolationQualification::new(
            EptPermissions::WRITE,
            EptPermissions::READ | EptPermissions::EXECUTE,
        );
        assert_eq!(qualification.raw(), 0b10_1010);
        assert!(qualification.write());
        assert!(!qualification.writable());
        assert_eq!(qualification.attempted(), EptPermissions::WRITE);
        assert_eq!(qualification.allowed(), EptPermissions::READ | EptPermissions::EXECUTE);

        let decoded = ExitQualification::decode(VmxExitReason::EptViolation, 0x1_0000 | 0x181);
        let ExitQualification::EptViolation(violation) = decoded else {
            panic!("Wrong qualification: {:?}", decoded);
        };
        assert!(violation.read());
        assert!(violation.guest_linear_address_valid());
        assert!(violation.translated_access());
        assert!(violation.asynchronous());
        assert_eq!(violation.allowed(), EptPermissions::empty());
    }

    #[test]
    fn layouts() {
        assert_eq!(check_layout(DebugQualification::FIELDS, 64), Ok(()));
        assert_eq!(check_layout(TaskSwitchQualification::FIELDS, 64), Ok(()));
        assert_eq!(check_layout(ControlRegisterAccess::FIELDS, 64), Ok(()));
        assert_eq!(check_layout(DebugRegisterAccess::FIELDS, 64), Ok(()));
        assert_eq!(check_layout(IoInstructionQualification::FIELDS, 64), Ok(()));
        assert_eq!(check_layout(ApicAccessQualification::FIELDS, 64), Ok(()));
        assert_eq!(check_layout(Displacement::FIELDS, 64), Ok(()));
        assert_eq!(check_layout(EptViolationQualification::FIELDS, 64), Ok(()));
    }
}
