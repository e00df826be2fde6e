//! Raw VMX operations
//!
//! This modules exposes the VMREAD, VMWRITE and VMPTRST instructions. The functions here are marked
//! as unsafe because they do not verify the validity of input arguments or processor state. They
//! are intended to be used through [`CurrentVmcs`], which implements [`VmcsAccess`] for the VMCS
//! currently loaded on the logical processor.

use core::arch::asm;
use core::marker::PhantomData;

use bitflags::bitflags;
use utils::HostPhysAddr;

use crate::access::VmcsAccess;
use crate::errors::{VmxError, VmxInstructionError};
use crate::fields::VmcsField;

bitflags! {
    /// The RFLAGS bits VMX instructions report their status with.
    struct RFlags: u64 {
        const CARRY_FLAG = 1 << 0;
        const ZERO_FLAG  = 1 << 6;
    }
}

/// Executes VMWRITE.
///
/// This will write the value to the current VMCS in the provided field.
pub unsafe fn vmwrite(field: u64, value: u64) -> Result<(), VmxError> {
    asm!("vmwrite {1}, {0}", in(reg) field, in(reg) value, options(att_syntax));
    vmx_capture_status()
}

/// Executes VMREAD.
///
/// This will read a field from the current VMCS and return its value.
pub unsafe fn vmread(field: u64) -> Result<u64, VmxError> {
    let value: u64;
    asm!("vmread {0}, {1}", in(reg) field, out(reg) value, options(att_syntax));
    vmx_capture_status().and(Ok(value))
}

/// Executes VMPTRST, returns the physical address of the current VMCS.
pub unsafe fn vmptrst() -> Result<u64, VmxError> {
    let mut value = 0u64;
    asm!(
        "vmptrst ({0})",
        in(reg) core::ptr::addr_of_mut!(value),
        options(att_syntax, nostack)
    );
    vmx_capture_status().and(Ok(value))
}

/// Helper used to extract VMX-specific Result in accordance with
/// conventions described in Intel SDM, Volume 3C, Section 31.2.
//  We inline this to provide an obstruction-free path from this function's
//  call site to the moment where `rflags_read()` reads RFLAGS. Otherwise it's
//  possible for RFLAGS register to be clobbered by a function prologue,
//  see https://github.com/gz/rust-x86/pull/50.
#[inline(always)]
unsafe fn vmx_capture_status() -> Result<(), VmxError> {
    let flags = rflags_read();

    if flags.contains(RFlags::ZERO_FLAG) {
        // A valid VMCS is installed, we can read the error field
        let instr_err_field = VmcsField::VmInstructionError.encoding() as u64;
        let err: u64;
        asm!("vmread {0}, {1}", in(reg) instr_err_field, out(reg) err, options(att_syntax));
        let flags = rflags_read();
        let error = if flags.intersects(RFlags::ZERO_FLAG | RFlags::CARRY_FLAG) {
            // An error occured during VMREAD
            VmxInstructionError::Unknown
        } else {
            VmxInstructionError::from_u64(err)
        };

        Err(VmxError::VmFailValid(error))
    } else if flags.contains(RFlags::CARRY_FLAG) {
        Err(VmxError::VmFailInvalid)
    } else {
        Ok(())
    }
}

/// Returns the current value of the RFLAGS register.
///
/// NOTE: We redefine this function here with an inline(always) hint so that it is always inlined
/// which prevent the flags from being clobbered by function calls.
#[inline(always)]
fn rflags_read() -> RFlags {
    let r: u64;

    unsafe {
        asm!("pushfq; pop {}", out(reg) r, options(nomem, preserves_flags));
    }
    RFlags::from_bits_truncate(r)
}

// ———————————————————————————— Current VMCS ————————————————————————————— //

/// The VMCS currently loaded on this logical processor.
///
/// The current VMCS is a per-processor state, this handle is neither `Send` nor `Sync`.
pub struct CurrentVmcs {
    _not_send: PhantomData<*const ()>,
}

impl CurrentVmcs {
    /// Returns a handle on the current VMCS.
    ///
    /// # Safety
    ///
    /// The processor must be in VMX operation with a VMCS loaded (VMPTRLD), and must stay so for as
    /// long as the handle is alive.
    pub unsafe fn new() -> Self {
        Self { _not_send: PhantomData }
    }

    /// Physical address of the current VMCS.
    pub fn pointer(&self) -> Result<HostPhysAddr, VmxError> {
        let addr = unsafe { vmptrst()? };
        Ok(HostPhysAddr::new(addr))
    }
}

fn unsupported(field: VmcsField, err: VmxError) -> VmxError {
    match err {
        VmxError::VmFailValid(VmxInstructionError::VmAccessUnsupportedField) => {
            log::debug!("{} is not supported by this processor", field.name());
            VmxError::UnsupportedField(field)
        }
        err => err,
    }
}

impl VmcsAccess for CurrentVmcs {
    fn read(&self, field: VmcsField) -> Result<u64, VmxError> {
        // SAFETY: a VMCS is loaded for the lifetime of `self`.
        let value =
            unsafe { vmread(field.encoding() as u64) }.map_err(|err| unsupported(field, err))?;
        Ok(field.width().truncate(value))
    }

    fn write(&mut self, field: VmcsField, value: u64) -> Result<(), VmxError> {
        if !field.is_writable() {
            return Err(VmxError::FieldNotWritable(field));
        }
        let value = field.width().truncate(value);
        // SAFETY: a VMCS is loaded for the lifetime of `self`.
        unsafe { vmwrite(field.encoding() as u64, value) }.map_err(|err| unsupported(field, err))
    }
}
