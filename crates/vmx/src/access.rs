//! VMCS access
//!
//! [`VmcsAccess`] is the seam between the typed records of this crate and a concrete VMCS: the
//! current VMCS of the processor (`raw::CurrentVmcs`, with the `bare_metal` feature) or an
//! in-memory [`ShadowVmcs`].

use core::fmt;

use utils::{GuestPhysAddr, GuestVirtAddr};

use crate::bitmaps::{
    EntryControls, ExceptionBitmap, ExitControls, PinbasedControls, PrimaryControls,
    SecondaryControls,
};
use crate::ept::Eptp;
use crate::errors::{VmxError, VmxExitReason};
use crate::exit_qualification::ExitQualification;
use crate::fields::{VmcsField, VmcsFieldAccessType, VmcsFieldWidth};
use crate::instruction_info::InstructionInformation;
use crate::records::{ExitReason, InterruptionInformation};

/// Mask for keeping only the 32 lower bits.
const LOW_32_BITS_MASK: u64 = (1 << 32) - 1;

macro_rules! controls {
    ($get:ident, $set:ident, $flags:ty, $field:expr) => {
        fn $get(&self) -> Result<$flags, VmxError> {
            Ok(<$flags>::from_bits_truncate(self.read($field)? as u32))
        }

        fn $set(&mut self, flags: $flags) -> Result<(), VmxError> {
            self.write($field, flags.bits() as u64)
        }
    };
}

/// Read and write access to the fields of a VMCS.
pub trait VmcsAccess {
    /// Reads a field, zero-extended to 64 bits.
    fn read(&self, field: VmcsField) -> Result<u64, VmxError>;

    /// Writes a field. Bits that do not fit the width of the field are dropped.
    fn write(&mut self, field: VmcsField, value: u64) -> Result<(), VmxError>;

    /// Returns the exit reason.
    fn exit_reason(&self) -> Result<ExitReason, VmxError> {
        Ok(ExitReason::from_raw(self.read(VmcsField::ExitReason)? as u32))
    }

    /// Returns the exit qualification, decoded according to the exit reason.
    fn exit_qualification(&self) -> Result<ExitQualification, VmxError> {
        Ok(self.exit_information()?.qualification())
    }

    /// Returns the instruction information, decoded according to the exit reason.
    fn instruction_information(&self) -> Result<InstructionInformation, VmxError> {
        Ok(self.exit_information()?.instruction_information())
    }

    /// Collects the exit information fields.
    fn exit_information(&self) -> Result<ExitInformation, VmxError> {
        Ok(ExitInformation {
            reason: self.exit_reason()?,
            qualification: self.read(VmcsField::ExitQualification)?,
            instruction_info: self.read(VmcsField::VmExitInstructionInfo)? as u32,
            interruption_info: InterruptionInformation::from_raw(
                self.read(VmcsField::VmExitInterruptionInfo)? as u32,
            ),
            guest_phys_addr: self.guest_phys_addr()?,
            guest_linear_addr: self.guest_linear_addr()?,
        })
    }

    /// Returns the interruption information of the last exit, if valid.
    fn interrupt_info(&self) -> Result<Option<InterruptionInformation>, VmxError> {
        let info =
            InterruptionInformation::from_raw(self.read(VmcsField::VmExitInterruptionInfo)? as u32);
        Ok(info.valid().then(|| info))
    }

    /// Returns the guest physical address.
    ///
    /// This field is set on VM exits due to EPT violations and EPT misconfigurations.
    fn guest_phys_addr(&self) -> Result<GuestPhysAddr, VmxError> {
        Ok(GuestPhysAddr::new(self.read(VmcsField::GuestPhysicalAddress)?))
    }

    /// Returns the guest linear address.
    fn guest_linear_addr(&self) -> Result<GuestVirtAddr, VmxError> {
        Ok(GuestVirtAddr::new(self.read(VmcsField::GuestLinearAddress)?))
    }

    fn ept_pointer(&self) -> Result<Eptp, VmxError> {
        Ok(Eptp::from_raw(self.read(VmcsField::EptPointer)?))
    }

    fn set_ept_pointer(&mut self, eptp: Eptp) -> Result<(), VmxError> {
        self.write(VmcsField::EptPointer, eptp.raw())
    }

    /// Set guest RIP to the next instruction.
    ///
    /// This function must be called at most once between two VM exits, as the instruction
    /// length is not updated until VM exits again. RIP wraps around as on hardware.
    fn next_instruction(&mut self) -> Result<(), VmxError> {
        let instr_len = self.read(VmcsField::VmExitInstructionLength)?;
        let rip = self.read(VmcsField::GuestRip)?;
        self.write(VmcsField::GuestRip, rip.wrapping_add(instr_len))
    }

    controls!(
        pin_based_controls,
        set_pin_based_controls,
        PinbasedControls,
        VmcsField::PinBasedControls
    );
    controls!(
        primary_controls,
        set_primary_controls,
        PrimaryControls,
        VmcsField::PrimaryProcessorControls
    );
    controls!(
        secondary_controls,
        set_secondary_controls,
        SecondaryControls,
        VmcsField::SecondaryProcessorControls
    );
    controls!(exit_controls, set_exit_controls, ExitControls, VmcsField::PrimaryVmExitControls);
    controls!(entry_controls, set_entry_controls, EntryControls, VmcsField::VmEntryControls);
    controls!(exception_bitmap, set_exception_bitmap, ExceptionBitmap, VmcsField::ExceptionBitmap);
}

// ——————————————————————————— Exit Information ———————————————————————————— //

/// The VM-exit information fields describing a single exit.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct ExitInformation {
    pub reason: ExitReason,
    pub qualification: u64,
    pub instruction_info: u32,
    /// Exception or interrupt that caused the exit, for basic reasons 0 and 1.
    pub interruption_info: InterruptionInformation,
    pub guest_phys_addr: GuestPhysAddr,
    pub guest_linear_addr: GuestVirtAddr,
}

impl ExitInformation {
    /// The exit qualification, decoded according to the basic exit reason.
    ///
    /// For exception exits the layout is selected by the exception vector.
    pub fn qualification(&self) -> ExitQualification {
        match self.reason.reason() {
            VmxExitReason::Exception if self.interruption_info.valid() => {
                ExitQualification::decode_exception(
                    self.interruption_info.vector(),
                    self.qualification,
                )
            }
            reason => ExitQualification::decode(reason, self.qualification),
        }
    }

    /// The instruction information, decoded according to the basic exit reason.
    ///
    /// For I/O exits the field is only defined for string instructions (INS and OUTS).
    pub fn instruction_information(&self) -> InstructionInformation {
        let reason = self.reason.reason();
        if reason == VmxExitReason::IoInstruction {
            match self.qualification() {
                ExitQualification::IoInstruction(io) if io.string() => (),
                _ => {
                    log::debug!("Instruction information undefined for non-string I/O");
                    return InstructionInformation::Undefined;
                }
            }
        }
        InstructionInformation::decode(reason, self.instruction_info)
    }
}

// ————————————————————————————— Shadow VMCS ———————————————————————————————— //

/// An in-memory VMCS image, one slot per known field.
///
/// VM-exit information fields are read-only through [`VmcsAccess::write`], they are filled by
/// [`ShadowVmcs::record_exit`].
#[derive(Clone, PartialEq, Eq)]
pub struct ShadowVmcs {
    values: [u64; VmcsField::COUNT],
}

impl ShadowVmcs {
    pub const fn new() -> Self {
        Self { values: [0; VmcsField::COUNT] }
    }

    /// Reads a field by raw identifier, the high half of 64-bit fields included.
    pub fn read_encoding(&self, encoding: u16) -> Result<u64, VmxError> {
        let (field, access) = VmcsField::lookup(encoding)?;
        let value = self.read(field)?;
        match access {
            VmcsFieldAccessType::Full => Ok(value),
            VmcsFieldAccessType::High => Ok(value >> 32),
        }
    }

    /// Writes a field by raw identifier, the high half of 64-bit fields included.
    pub fn write_encoding(&mut self, encoding: u16, value: u64) -> Result<(), VmxError> {
        let (field, access) = VmcsField::lookup(encoding)?;
        match access {
            VmcsFieldAccessType::Full => self.write(field, value),
            VmcsFieldAccessType::High => {
                let low = self.read(field)? & LOW_32_BITS_MASK;
                self.write(field, ((value & LOW_32_BITS_MASK) << 32) | low)
            }
        }
    }

    /// Fills the VM-exit information fields, as the processor does on VM exit.
    pub fn record_exit(&mut self, info: &ExitInformation) {
        self.store(VmcsField::ExitReason, info.reason.raw() as u64);
        self.store(VmcsField::ExitQualification, info.qualification);
        self.store(VmcsField::VmExitInstructionInfo, info.instruction_info as u64);
        self.store(VmcsField::VmExitInterruptionInfo, info.interruption_info.raw() as u64);
        self.store(VmcsField::GuestPhysicalAddress, info.guest_phys_addr.as_u64());
        self.store(VmcsField::GuestLinearAddress, info.guest_linear_addr.as_u64());
    }

    /// Iterates over the fields holding a non-zero value.
    pub fn iter(&self) -> impl Iterator<Item = (VmcsField, u64)> + '_ {
        VmcsField::ALL
            .iter()
            .map(move |&field| (field, self.values[field.ordinal()]))
            .filter(|&(_, value)| value != 0)
    }

    fn store(&mut self, field: VmcsField, value: u64) {
        self.values[field.ordinal()] = field.width().truncate(value);
    }
}

impl Default for ShadowVmcs {
    fn default() -> Self {
        Self::new()
    }
}

impl VmcsAccess for ShadowVmcs {
    fn read(&self, field: VmcsField) -> Result<u64, VmxError> {
        Ok(self.values[field.ordinal()])
    }

    fn write(&mut self, field: VmcsField, value: u64) -> Result<(), VmxError> {
        if !field.is_writable() {
            log::warn!("Rejected write of {:#x} to read-only {}", value, field.name());
            return Err(VmxError::FieldNotWritable(field));
        }
        if field.width() != VmcsFieldWidth::Width64
            && field.width() != VmcsFieldWidth::WidthNat
            && field.width().truncate(value) != value
        {
            log::trace!("Truncating {:#x} written to {}", value, field.name());
        }
        self.store(field, value);
        Ok(())
    }
}

impl fmt::Debug for ShadowVmcs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.iter().map(|(field, value)| (field.name(), Hex(value))))
            .finish()
    }
}

struct Hex(u64);

impl fmt::Debug for Hex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

// ————————————————————————————————— Tests —————————————————————————————————— //
