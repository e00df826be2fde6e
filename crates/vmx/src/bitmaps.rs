//! VMX bitmaps.
//!
//! Control fields whose bits are independent flags. See Intel SDM Vol. 3C Chapter 25.

use bitflags::bitflags;

use crate::errors::Trapnr;

bitflags! {
    /// Pin-based VM-execution controls, [`VmcsField::PinBasedControls`].
    ///
    /// See Intel SDM Vol. 3C Section 25.6.1.
    ///
    /// [`VmcsField::PinBasedControls`]: crate::fields::VmcsField::PinBasedControls
    pub struct PinbasedControls: u32 {
        const EXTERNAL_INTERRUPT_EXITING = 1 << 0;
        const NMI_EXITING                = 1 << 3;
        const VIRTUAL_NMIS               = 1 << 5;
        const VMX_PREEMPTION_TIMER       = 1 << 6;
        const POSTED_INTERRUPTS          = 1 << 7;
    }

    /// Primary processor-based VM-execution controls.
    ///
    /// See Intel SDM Vol. 3C Section 25.6.2, Table 25-6.
    pub struct PrimaryControls: u32 {
        const INTERRUPT_WINDOW_EXITING = 1 << 2;
        const USE_TSC_OFFSETTING       = 1 << 3;
        const HLT_EXITING              = 1 << 7;
        const INVLPG_EXITING           = 1 << 9;
        const MWAIT_EXITING            = 1 << 10;
        const RDPMC_EXITING            = 1 << 11;
        const RDTSC_EXITING            = 1 << 12;
        const CR3_LOAD_EXITING         = 1 << 15;
        const CR3_STORE_EXITING        = 1 << 16;
        const TERTIARY_CONTROLS        = 1 << 17;
        const CR8_LOAD_EXITING         = 1 << 19;
        const CR8_STORE_EXITING        = 1 << 20;
        const USE_TPR_SHADOW           = 1 << 21;
        const NMI_WINDOW_EXITING       = 1 << 22;
        const MOV_DR_EXITING           = 1 << 23;
        const UNCOND_IO_EXITING        = 1 << 24;
        const USE_IO_BITMAPS           = 1 << 25;
        const MONITOR_TRAP_FLAG        = 1 << 27;
        const USE_MSR_BITMAPS          = 1 << 28;
        const MONITOR_EXITING          = 1 << 29;
        const PAUSE_EXITING            = 1 << 30;
        const SECONDARY_CONTROLS       = 1 << 31;
    }

    /// Secondary processor-based VM-execution controls.
    ///
    /// See Intel SDM Vol. 3C Section 25.6.2, Table 25-7.
    pub struct SecondaryControls: u32 {
        const VIRTUALIZE_APIC                 = 1 << 0;
        const ENABLE_EPT                      = 1 << 1;
        const DESCRIPTOR_TABLE_EXITING        = 1 << 2;
        const ENABLE_RDTSCP                   = 1 << 3;
        const VIRTUALIZE_X2APIC               = 1 << 4;
        const ENABLE_VPID                     = 1 << 5;
        const WBINVD_EXITING                  = 1 << 6;
        const UNRESTRICTED_GUEST              = 1 << 7;
        const APIC_REGISTER_VIRTUALIZATION    = 1 << 8;
        const VIRTUAL_INTERRUPT_DELIVERY      = 1 << 9;
        const PAUSE_LOOP_EXITING              = 1 << 10;
        const RDRAND_EXITING                  = 1 << 11;
        const ENABLE_INVPCID                  = 1 << 12;
        const ENABLE_VM_FUNCTIONS             = 1 << 13;
        const VMCS_SHADOWING                  = 1 << 14;
        const ENCLS_EXITING                   = 1 << 15;
        const RDSEED_EXITING                  = 1 << 16;
        const ENABLE_PML                      = 1 << 17;
        const EPT_VIOLATION_VE                = 1 << 18;
        const CONCEAL_VMX_FROM_PT             = 1 << 19;
        const ENABLE_XSAVES_XRSTORS           = 1 << 20;
        const PASID_TRANSLATION               = 1 << 21;
        /// Splits EPT execute permission between supervisor and user-mode linear addresses.
        const MODE_BASED_EPT_EXECUTE          = 1 << 22;
        const SUB_PAGE_WRITE_PERMISSIONS      = 1 << 23;
        const PT_USES_GUEST_PHYSICAL_ADDRESSES = 1 << 24;
        const USE_TSC_SCALING                 = 1 << 25;
        const ENABLE_USER_WAIT_AND_PAUSE      = 1 << 26;
        const ENABLE_PCONFIG                  = 1 << 27;
        const ENABLE_ENCLV_EXITING            = 1 << 28;
        const VMM_BUS_LOCK_DETECTION          = 1 << 30;
        const INSTRUCTION_TIMEOUT             = 1 << 31;
    }

    /// Primary VM-exit controls.
    ///
    /// See Intel SDM Vol. 3C Section 25.7.1.
    pub struct ExitControls: u32 {
        const SAVE_DEBUG_CONTROLS        = 1 << 2;
        const HOST_ADDRESS_SPACE_SIZE    = 1 << 9;
        const LOAD_IA32_PERF_GLOBAL_CTRL = 1 << 12;
        const ACK_INTERRUPT_ON_EXIT      = 1 << 15;
        const SAVE_IA32_PAT              = 1 << 18;
        const LOAD_IA32_PAT              = 1 << 19;
        const SAVE_IA32_EFER             = 1 << 20;
        const LOAD_IA32_EFER             = 1 << 21;
        const SAVE_VMX_PREEMPTION_TIMER  = 1 << 22;
        const CLEAR_IA32_BNDCFGS         = 1 << 23;
        const CONCEAL_VMX_FROM_PT        = 1 << 24;
        const CLEAR_IA32_RTIT_CTL        = 1 << 25;
        const CLEAR_IA32_LBR_CTL         = 1 << 26;
        const LOAD_CET_STATE             = 1 << 28;
        const LOAD_PKRS                  = 1 << 29;
        const SAVE_IA32_PERF_GLOBAL_CTRL = 1 << 30;
        const SECONDARY_CONTROLS         = 1 << 31;
    }

    /// VM-entry controls.
    ///
    /// See Intel SDM Vol. 3C Section 25.8.1.
    pub struct EntryControls: u32 {
        const LOAD_DEBUG_CONTROLS        = 1 << 2;
        const IA32E_MODE_GUEST           = 1 << 9;
        const ENTRY_TO_SMM               = 1 << 10;
        const DEACTIVATE_DUAL_MONITOR    = 1 << 11;
        const LOAD_IA32_PERF_GLOBAL_CTRL = 1 << 13;
        const LOAD_IA32_PAT              = 1 << 14;
        const LOAD_IA32_EFER             = 1 << 15;
        const LOAD_IA32_BNDCFGS          = 1 << 16;
        const CONCEAL_VMX_FROM_PT        = 1 << 17;
        const LOAD_IA32_RTIT_CTL         = 1 << 18;
        const LOAD_CET_STATE             = 1 << 20;
        const LOAD_IA32_LBR_CTL          = 1 << 21;
        const LOAD_PKRS                  = 1 << 22;
    }

    /// One bit per exception vector, set to cause a VM exit.
    pub struct ExceptionBitmap: u32 {
        const DIVIDE_ERROR             = 1 << 0;
        const DEBUG                    = 1 << 1;
        const NMI                      = 1 << 2;
        const BREAKPOINT               = 1 << 3;
        const OVERFLOW                 = 1 << 4;
        const BOUND_RANGE_EXCEEDED     = 1 << 5;
        const INVALID_OPCODE           = 1 << 6;
        const DEVICE_NOT_AVAILABLE     = 1 << 7;
        const DOUBLE_FAULT             = 1 << 8;
        const INVALID_TSS              = 1 << 10;
        const SEGMENT_NOT_PRESENT      = 1 << 11;
        const STACK_SEGMENT_FAULT      = 1 << 12;
        const GENERAL_PROTECTION_FAULT = 1 << 13;
        const PAGE_FAULT               = 1 << 14;
        const X87_FLOATING_POINT       = 1 << 16;
        const ALIGNMENT_CHECK          = 1 << 17;
        const MACHINE_CHECK            = 1 << 18;
        const SIMD_FLOATING_POINT      = 1 << 19;
        const VIRTUALIZATION           = 1 << 20;
        const CONTROL_PROTECTION       = 1 << 21;
        const VMM_COMMUNICATION        = 1 << 29;
        const SECURITY_EXCEPTION       = 1 << 30;
    }

    /// Access rights of an EPT paging-structure entry, at their position in the entry.
    ///
    /// `USER_EXECUTE` is only used when mode-based execute control is enabled, `EXECUTE` then
    /// controls supervisor-mode linear addresses.
    pub struct EptPermissions: u16 {
        const READ         = 1 << 0;
        const WRITE        = 1 << 1;
        const EXECUTE      = 1 << 2;
        const USER_EXECUTE = 1 << 10;

        const RW  = Self::READ.bits | Self::WRITE.bits;
        const RWX = Self::RW.bits | Self::EXECUTE.bits;
    }
}

impl ExceptionBitmap {
    /// The bit intercepting a given exception.
    pub fn from_trap(trap: Trapnr) -> Self {
        Self::from_bits_truncate(1 << trap.as_u8())
    }
}

impl EptPermissions {
    /// Extracts the access rights of a raw EPT entry.
    pub fn from_entry(entry: u64) -> Self {
        Self::from_bits_truncate(entry as u16)
    }

    /// Returns true if any of read, write or (supervisor) execute is granted.
    ///
    /// An entry without these three rights is not present.
    pub fn is_present(self) -> bool {
        self.intersects(Self::RWX)
    }
}

// ————————————————————————————————— Tests —————————————————————————————————— //
