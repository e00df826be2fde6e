//! VMX Model Specific Registers
//!
//! A collection of some model specific registers relevant to VMX.

// ——————————————————————————————— Known MSRs ——————————————————————————————— //

pub const IA32_FEATURE_CONTROL: Msr = Msr::new(0x3A);
pub const IA32_SYSENTER_CS: Msr = Msr::new(0x174);
pub const IA32_SYSENTER_ESP: Msr = Msr::new(0x175);
pub const IA32_SYSENTER_EIP: Msr = Msr::new(0x176);
pub const IA32_DEBUGCTL: Msr = Msr::new(0x1D9);
pub const IA32_PAT: Msr = Msr::new(0x277);
pub const IA32_PERF_GLOBAL_CTRL: Msr = Msr::new(0x38F);
pub const IA32_VMX_BASIC: Msr = Msr::new(0x480);
pub const IA32_VMX_PINBASED_CTLS: Msr = Msr::new(0x481);
pub const IA32_VMX_PROCBASED_CTLS: Msr = Msr::new(0x482);
pub const IA32_VMX_EXIT_CTLS: Msr = Msr::new(0x483);
pub const IA32_VMX_ENTRY_CTLS: Msr = Msr::new(0x484);
pub const IA32_VMX_MISC: Msr = Msr::new(0x485);
pub const IA32_VMX_CR0_FIXED0: Msr = Msr::new(0x486);
pub const IA32_VMX_CR0_FIXED1: Msr = Msr::new(0x487);
pub const IA32_VMX_CR4_FIXED0: Msr = Msr::new(0x488);
pub const IA32_VMX_CR4_FIXED1: Msr = Msr::new(0x489);
/// Highest index used in VMCS field encodings, see [`VmcsField::is_supported`].
///
/// [`VmcsField::is_supported`]: crate::fields::VmcsField::is_supported
pub const IA32_VMX_VMCS_ENUM: Msr = Msr::new(0x48A);
pub const IA32_VMX_PROCBASED_CTLS2: Msr = Msr::new(0x48B);
pub const IA32_VMX_EPT_VPID_CAP: Msr = Msr::new(0x48C);
pub const IA32_VMX_TRUE_PINBASED_CTLS: Msr = Msr::new(0x48D);
pub const IA32_VMX_TRUE_PROCBASED_CTLS: Msr = Msr::new(0x48E);
pub const IA32_VMX_TRUE_EXIT_CTLS: Msr = Msr::new(0x48F);
pub const IA32_VMX_TRUE_ENTRY_CTLS: Msr = Msr::new(0x490);
pub const IA32_VMX_VMFUNC: Msr = Msr::new(0x491);
pub const IA32_VMX_PROCBASED_CTLS3: Msr = Msr::new(0x492);
pub const IA32_VMX_EXIT_CTLS2: Msr = Msr::new(0x493);
pub const IA32_EFER: Msr = Msr::new(0xC000_0080);

/// Bits of IA32_FEATURE_CONTROL.
pub mod feature_control {
    pub const LOCK: u64 = 1 << 0;
    pub const VMXON_INSIDE_SMX: u64 = 1 << 1;
    pub const VMXON_OUTSIDE_SMX: u64 = 1 << 2;
}

// —————————————————————————————————— MSR ——————————————————————————————————— //

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Msr(u32);

impl Msr {
    /// Creates a new MSR for it's address.
    pub const fn new(reg: u32) -> Self {
        Self(reg)
    }

    /// Returns the address of this MSR.
    pub const fn address(self) -> u32 {
        self.0
    }

    /// Reads 64 bits MSR register.
    ///
    /// ## Safety
    ///
    /// The caller must ensure that this read operation has no unsafe side
    /// effects.
    #[cfg(all(feature = "bare_metal", target_arch = "x86_64"))]
    #[inline]
    pub unsafe fn read(&self) -> u64 {
        let (high, low): (u32, u32);
        core::arch::asm!(
            "rdmsr",
            in("ecx") self.0,
            out("eax") low, out("edx") high,
            options(nomem, nostack, preserves_flags),
        );
        ((high as u64) << 32) | (low as u64)
    }
}
