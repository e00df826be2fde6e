//! VMX support
//!
//! Typed views over the VMX control structures: the VMCS field encodings, the records stored in
//! VMCS fields and capability MSRs, the EPT paging structures, and the decoders of the VM-exit
//! qualification and instruction information.
//!
//! Inspired and in part copied from the [x86] crate.
//!
//! [x86]: https://docs.rs/x86/latest/x86/bits64/vmx/index.html
#![cfg_attr(not(test), no_std)]

pub mod access;
pub mod bitmaps;
pub mod ept;
pub mod errors;
pub mod exit_qualification;
pub mod fields;
pub mod instruction_info;
pub mod msr;
pub mod operands;
#[cfg(all(feature = "bare_metal", target_arch = "x86_64"))]
pub mod raw;
pub mod records;

pub use utils::{GuestPhysAddr, GuestVirtAddr, HostPhysAddr, HostVirtAddr};

pub use crate::access::{ExitInformation, ShadowVmcs, VmcsAccess};
pub use crate::errors::{InterruptionType, Trapnr, VmxError, VmxExitReason, VmxInstructionError};
pub use crate::exit_qualification::ExitQualification;
pub use crate::fields::{
    VmcsField, VmcsFieldAccessType, VmcsFieldEncoding, VmcsFieldType, VmcsFieldWidth,
};
pub use crate::instruction_info::InstructionInformation;
