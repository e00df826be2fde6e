//! VMX Errors

use core::fmt;

use crate::fields::VmcsField;

/// An error that occured during VMX operations.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum VmxError {
    /// VMCS pointer is valid, but some other error was encountered. Read VM-instruction error
    /// field of VMCS for more details.
    VmFailValid(VmxInstructionError),

    /// VMCS pointer is invalid.
    VmFailInvalid,

    /// The identifier does not name any field of the catalogue.
    UnknownField(u16),

    /// The identifier has its must-be-zero or reserved bit set.
    InvalidEncoding(u16),

    /// The field is read-only (VM-exit information fields).
    FieldNotWritable(VmcsField),

    /// The field is not implemented by the VMCS backing the access.
    UnsupportedField(VmcsField),
}

impl fmt::Display for VmxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VmxError::VmFailValid(err) => write!(f, "VMfailValid: {:?}", err),
            VmxError::VmFailInvalid => write!(f, "VMfailInvalid"),
            VmxError::UnknownField(raw) => write!(f, "unknown VMCS field 0x{:04x}", raw),
            VmxError::InvalidEncoding(raw) => {
                write!(f, "invalid VMCS field encoding 0x{:04x}", raw)
            }
            VmxError::FieldNotWritable(field) => {
                write!(f, "VMCS field {} is read-only", field.name())
            }
            VmxError::UnsupportedField(field) => {
                write!(f, "VMCS field {} is not supported", field.name())
            }
        }
    }
}

/// An error resulting from the execution of a VMX instruction.
///
/// See Intel SDM Vol. 3C Section 31.4.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum VmxInstructionError {
    /// VMCALL executed in VMX root operation.
    VmCallRoot,
    /// VMCLEAR with invalid physical address.
    VmClearInvalid,
    /// VMCLEAR with VMXON pointer.
    VmClearVmxon,
    /// VMLAUNCH with non-clear VMCS.
    VmLaunchNonClear,
    /// VMRESUME with non-launched VMCS.
    VmResumeNonLaunched,
    /// VMRESUME after VMXOFF.
    VmResumeAfterVmxoff,
    /// VM entry with invalid control fields.
    VmEntryInvalidCtrlFields,
    /// VM entry with invalid host-state fields.
    VmEntryInvalidHostState,
    /// VMPTRLD with invalid physical address.
    VmPtrldInvalidPhysAddr,
    /// VMPTRLD with VMXON pointer.
    VmPtrldVmxon,
    /// VMPTRLD with incorrect VMCS revision identifier.
    VmPtrldInvalidRevId,
    /// VMREAD/VMWRITE from/to unsupported VMCS component.
    VmAccessUnsupportedField,
    /// VMWRITE to read-only VMCS component.
    VmWriteToReadOnly,
    /// VMXON executed in VMX root operation.
    VmxonDuringVmxRoot,
    /// VM entry with invalid executive-VMCS pointer.
    VmEntryInvalidVmcs,
    /// VM entry with non-launched executive VMCS.
    VmEntryNonLaunched,
    /// VM entry with executive-VMCS pointer not VMXON pointer.
    VmEntryVmcsNotVmxon,
    /// VMCALL with non-clear VMCS.
    VmCallNonClearVmcs,
    /// VMCALL with invalid VM-exit control fields.
    VmCallInvalidExitCtrlFields,
    /// VMCALL with incorrect MSEG revision identifier.
    VmCallInvalidRevId,
    /// VMXOFF under dual-monitor treatment of SMIs and SMM.
    VmxoffDualMonitor,
    /// VMCALL with invalid SMM-monitor features.
    VmCallInvalidSmmFeatures,
    /// VM entry with invalid VM-execution control fields in executive VMCS.
    VmEntryInvalidExecCtrlFields,
    /// VM entry with events blocked by MOV SS.
    VmEntryBlockedMovSS,
    /// Invalid operand to INVEPT/INVVPID.
    InvalidInvEptInvVpid,
    /// Error number not listed by the manual.
    Unknown,
}

impl VmxInstructionError {
    /// Decodes the VM-instruction error field.
    pub fn from_u64(err: u64) -> VmxInstructionError {
        match err {
            1 => Self::VmCallRoot,
            2 => Self::VmClearInvalid,
            3 => Self::VmClearVmxon,
            4 => Self::VmLaunchNonClear,
            5 => Self::VmResumeNonLaunched,
            6 => Self::VmResumeAfterVmxoff,
            7 => Self::VmEntryInvalidCtrlFields,
            8 => Self::VmEntryInvalidHostState,
            9 => Self::VmPtrldInvalidPhysAddr,
            10 => Self::VmPtrldVmxon,
            11 => Self::VmPtrldInvalidRevId,
            12 => Self::VmAccessUnsupportedField,
            13 => Self::VmWriteToReadOnly,
            15 => Self::VmxonDuringVmxRoot,
            16 => Self::VmEntryInvalidVmcs,
            17 => Self::VmEntryNonLaunched,
            18 => Self::VmEntryVmcsNotVmxon,
            19 => Self::VmCallNonClearVmcs,
            20 => Self::VmCallInvalidExitCtrlFields,
            22 => Self::VmCallInvalidRevId,
            23 => Self::VmxoffDualMonitor,
            24 => Self::VmCallInvalidSmmFeatures,
            25 => Self::VmEntryInvalidExecCtrlFields,
            26 => Self::VmEntryBlockedMovSS,
            28 => Self::InvalidInvEptInvVpid,
            _ => Self::Unknown,
        }
    }
}

// ———————————————————————————— Basic Exit Reasons ———————————————————————————— //

macro_rules! exit_reasons {
    ($( $(#[$meta:meta])* $name:ident = $value:literal, )*) => {
        /// The basic VM exit reason.
        ///
        /// See Intel SDM Vol. 3D Appendix C.
        #[rustfmt::skip]
        #[derive(Debug, PartialEq, Eq, Hash, Copy, Clone)]
        #[repr(u16)]
        pub enum VmxExitReason {
            $( $(#[$meta])* $name = $value, )*
            /// A value the manual does not define.
            Unknown = 0xffff,
        }

        impl VmxExitReason {
            pub fn from_u16(reason: u16) -> Self {
                match reason {
                    $( $value => VmxExitReason::$name, )*
                    _ => VmxExitReason::Unknown,
                }
            }
        }
    };
}

exit_reasons! {
    /// Exception or NMI, subject to the exception bitmap and "NMI exiting".
    Exception                       = 0,
    /// External interrupt with "external-interrupt exiting" set.
    ExternalInterrupt               = 1,
    TripleFault                     = 2,
    InitSignal                      = 3,
    /// SIPI received while in the wait-for-SIPI state.
    StartUpIpi                      = 4,
    /// SMI delivered right after an I/O instruction retired.
    IoSystemManagementInterrupt     = 5,
    OtherSmi                        = 6,
    InterruptWindow                 = 7,
    NmiWindow                       = 8,
    /// The guest attempted a task switch.
    TaskSwitch                      = 9,
    Cpuid                           = 10,
    Getsec                          = 11,
    Hlt                             = 12,
    Invd                            = 13,
    Invlpg                          = 14,
    Rdpmc                           = 15,
    Rdtsc                           = 16,
    /// RSM executed in SMM.
    Rsm                             = 17,
    Vmcall                          = 18,
    Vmclear                         = 19,
    Vmlaunch                        = 20,
    Vmptrld                         = 21,
    Vmptrst                         = 22,
    Vmread                          = 23,
    Vmresume                        = 24,
    Vmwrite                         = 25,
    Vmxoff                          = 26,
    Vmxon                           = 27,
    /// CLTS, LMSW or MOV CR on CR0, CR3, CR4 or CR8 intercepted by the execution controls.
    ControlRegisterAccesses         = 28,
    /// MOV to or from a debug register with "MOV-DR exiting" set.
    MovDR                           = 29,
    /// I/O instruction intercepted by the I/O bitmaps or "unconditional I/O exiting".
    IoInstruction                   = 30,
    Rdmsr                           = 31,
    Wrmsr                           = 32,
    VmEntryFailureInvalidGuestState = 33,
    VmEntryFailureMsrLoading        = 34,
    Mwait                           = 36,
    MonitorTrapFlag                 = 37,
    Monitor                         = 39,
    /// PAUSE, or a PAUSE loop longer than PLE_Window.
    Pause                           = 40,
    VmEntryFailureMachineCheck      = 41,
    TprBelowThreshold               = 43,
    /// Access to the APIC-access page with "virtualize APIC accesses" set.
    ApicAccess                      = 44,
    VirtualizedEoi                  = 45,
    /// LGDT, LIDT, SGDT or SIDT with "descriptor-table exiting" set.
    AccessToGdtrOrIdtr              = 46,
    /// LLDT, LTR, SLDT or STR with "descriptor-table exiting" set.
    AccessToLdtrOrTr                = 47,
    /// Guest-physical access disallowed by the EPT paging structures.
    EptViolation                    = 48,
    /// Guest-physical access through a misconfigured EPT paging-structure entry.
    EptMisconfiguration             = 49,
    Invept                          = 50,
    Rdtscp                          = 51,
    VmxPreemptionTimerExpired       = 52,
    Invvpid                         = 53,
    Wbinvd                          = 54,
    Xsetbv                          = 55,
    /// Write to the virtual-APIC page that must be virtualized by the VMM.
    ApicWrite                       = 56,
    Rdrand                          = 57,
    Invpcid                         = 58,
    Vmfunc                          = 59,
    Encls                           = 60,
    Rdseed                          = 61,
    /// Page-modification log index outside of 0-511.
    PageModificationLogFull         = 62,
    Xsaves                          = 63,
    Xrstors                         = 64,
    Pconfig                         = 65,
    SppRelatedEvent                 = 66,
    Umwait                          = 67,
    Tpause                          = 68,
    Loadiwkey                       = 69,
    Enclv                           = 70,
    EnqcmdPasidTranslationFailure   = 72,
    EnqcmdsPasidTranslationFailure  = 73,
    BusLock                         = 74,
    InstructionTimeout              = 75,
}

impl VmxExitReason {
    #[inline]
    pub fn as_u16(self) -> u16 {
        self as u16
    }
}

// ————————————————————————— Interruptions and Traps —————————————————————————— //

utils::bit_enum! {
    /// Interruption type, bits 10:8 of the interruption-information fields.
    ///
    /// See Intel SDM Vol. 3C Section 25.9.2.
    pub enum InterruptionType: 3 {
        ExternalInterrupt = 0,
        Reserved = 1,
        NonMaskableInterrupt = 2,
        HardwareException = 3,
        SoftwareInterrupt = 4,
        PrivilegedSoftwareException = 5,
        SoftwareException = 6,
        /// Used for MTF injection.
        OtherEvent = 7,
    }
}

/// Trap numbers for interrupt exit vector values.
#[rustfmt::skip]
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
#[repr(u8)]
pub enum Trapnr {
    /// Divide Error #DE.
    DivideError             = 0,
    /// Debug #DB.
    Debug                   = 1,
    /// NMI Interrupt.
    NMI                     = 2,
    /// Breakpoint #BP.
    Breakpoint              = 3,
    /// Overflow #OF.
    Overflow                = 4,
    /// Bound Range Exceeded #BR.
    BoundRangeExceeded      = 5,
    /// Invalid Opcode #UD.
    InvalidOpcode           = 6,
    /// Device Not Available #NM.
    DeviceNotAvailable      = 7,
    /// Double Fault #DF.
    DoubleFault             = 8,
    /// Invalid TSS #TS.
    InvalidTSS              = 10,
    /// Segment Not present #NP.
    SegmentNotPresentFault  = 11,
    /// Stack-Segment #SS.
    StackSegmentFault       = 12,
    /// General Protection #GP.
    GeneralProtectionFault  = 13,
    /// Page fault #PF.
    PageFault               = 14,
    /// x87 FPU fp error #MF.
    FPUError                = 16,
    /// Alignment Check #AC.
    AlignmentCheck          = 17,
    /// Machine Check #MC.
    MachineCheck            = 18,
    /// SIMD fp exception #XM.
    SIMDException           = 19,
    /// Virtualization exception #VE.
    VirtualizationException = 20,
    /// Control protection #CP.
    ControlProtection       = 21,
}

impl Trapnr {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Returns the exception for a vector, `None` for reserved vectors and external interrupts.
    pub fn from_u8(vector: u8) -> Option<Self> {
        let trap = match vector {
            0 => Trapnr::DivideError,
            1 => Trapnr::Debug,
            2 => Trapnr::NMI,
            3 => Trapnr::Breakpoint,
            4 => Trapnr::Overflow,
            5 => Trapnr::BoundRangeExceeded,
            6 => Trapnr::InvalidOpcode,
            7 => Trapnr::DeviceNotAvailable,
            8 => Trapnr::DoubleFault,
            10 => Trapnr::InvalidTSS,
            11 => Trapnr::SegmentNotPresentFault,
            12 => Trapnr::StackSegmentFault,
            13 => Trapnr::GeneralProtectionFault,
            14 => Trapnr::PageFault,
            16 => Trapnr::FPUError,
            17 => Trapnr::AlignmentCheck,
            18 => Trapnr::MachineCheck,
            19 => Trapnr::SIMDException,
            20 => Trapnr::VirtualizationException,
            21 => Trapnr::ControlProtection,
            _ => return None,
        };
        Some(trap)
    }

    /// Returns true if the exception pushes an error code when delivered in protected mode.
    pub fn has_error_code(self) -> bool {
        matches!(
            self,
            Trapnr::DoubleFault
                | Trapnr::InvalidTSS
                | Trapnr::SegmentNotPresentFault
                | Trapnr::StackSegmentFault
                | Trapnr::GeneralProtectionFault
                | Trapnr::PageFault
                | Trapnr::AlignmentCheck
                | Trapnr::ControlProtection
        )
    }
}

// ————————————————————————————————— Tests —————————————————————————————————— //
