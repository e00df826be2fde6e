//! VMX records
//!
//! Fixed-layout words found in the VMCS or reported by the VMX capability MSRs.

use crate::errors::{InterruptionType, Trapnr, VmxExitReason};

// —————————————————————————————— Exit Reason ——————————————————————————————— //

utils::bit_record! {
    /// The 32-bit exit reason, [`VmcsField::ExitReason`](crate::fields::VmcsField::ExitReason).
    ///
    /// See Intel SDM Vol. 3C Section 25.9.1.
    pub struct ExitReason(u32) {
        basic_reason, with_basic_reason: u16 = 0, 16;
        enclave_mode, with_enclave_mode: bool = 27, 1;
        pending_mtf, with_pending_mtf: bool = 28, 1;
        from_vmx_root, with_from_vmx_root: bool = 29, 1;
        entry_failure, with_entry_failure: bool = 31, 1;
    }
}

impl ExitReason {
    /// The basic exit reason.
    pub fn reason(self) -> VmxExitReason {
        VmxExitReason::from_u16(self.basic_reason())
    }
}

impl From<VmxExitReason> for ExitReason {
    fn from(reason: VmxExitReason) -> Self {
        ExitReason::default().with_basic_reason(reason.as_u16())
    }
}

// ———————————————————————— Interruption Information ———————————————————————— //

utils::bit_record! {
    /// Layout shared by the VM-exit interruption information, the IDT-vectoring information and
    /// the VM-entry interruption information.
    ///
    /// See Intel SDM Vol. 3C Sections 25.8.3 and 25.9.2.
    pub struct InterruptionInformation(u32) {
        vector, with_vector: u8 = 0, 8;
        interruption_type, with_interruption_type: InterruptionType = 8, 3;
        error_code_valid, with_error_code_valid: bool = 11, 1;
        /// NMI unblocking due to IRET (exit information only).
        nmi_unblocking, with_nmi_unblocking: bool = 12, 1;
        valid, with_valid: bool = 31, 1;
    }
}

impl InterruptionInformation {
    /// Builds a valid event for injection on VM entry.
    ///
    /// The error code is delivered for hardware exceptions that push one.
    pub fn inject(trap: Trapnr, interruption_type: InterruptionType) -> Self {
        let deliver_error_code =
            interruption_type == InterruptionType::HardwareException && trap.has_error_code();
        InterruptionInformation::default()
            .with_vector(trap.as_u8())
            .with_interruption_type(interruption_type)
            .with_error_code_valid(deliver_error_code)
            .with_valid(true)
    }

    /// The exception carried by the event, if the vector is a known exception.
    pub fn trap(self) -> Option<Trapnr> {
        match self.interruption_type() {
            InterruptionType::ExternalInterrupt | InterruptionType::SoftwareInterrupt => None,
            _ => Trapnr::from_u8(self.vector()),
        }
    }
}

// ——————————————————————————— Guest State Records ——————————————————————————— //

utils::bit_record! {
    /// Segment access rights, as found in the guest-state area.
    ///
    /// See Intel SDM Vol. 3C Section 25.4.1, Table 25-2.
    pub struct SegmentAccessRights(u32) {
        segment_type, with_segment_type: u8 = 0, 4;
        /// 0 for system segments, 1 for code or data.
        descriptor_type, with_descriptor_type: bool = 4, 1;
        dpl, with_dpl: u8 = 5, 2;
        present, with_present: bool = 7, 1;
        available, with_available: bool = 12, 1;
        long_mode, with_long_mode: bool = 13, 1;
        default_big, with_default_big: bool = 14, 1;
        granularity, with_granularity: bool = 15, 1;
        unusable, with_unusable: bool = 16, 1;
    }
}

utils::bit_record! {
    /// Guest interruptibility state.
    ///
    /// See Intel SDM Vol. 3C Section 25.4.2, Table 25-3.
    pub struct InterruptibilityState(u32) {
        blocking_by_sti, with_blocking_by_sti: bool = 0, 1;
        blocking_by_mov_ss, with_blocking_by_mov_ss: bool = 1, 1;
        blocking_by_smi, with_blocking_by_smi: bool = 2, 1;
        blocking_by_nmi, with_blocking_by_nmi: bool = 3, 1;
        enclave_interruption, with_enclave_interruption: bool = 4, 1;
    }
}

utils::bit_enum! {
    /// Guest activity state.
    pub enum ActivityState: 2 {
        Active = 0,
        Hlt = 1,
        Shutdown = 2,
        WaitForSipi = 3,
    }
}

// —————————————————————————— Capability Records ———————————————————————————— //

utils::bit_record! {
    /// Basic VMX information, IA32_VMX_BASIC.
    ///
    /// See Intel SDM Vol. 3D Appendix A.1.
    pub struct VmxBasic(u64) {
        /// The 31-bits VMCS revision identifier used by the CPU.
        revision_id, with_revision_id: u32 = 0, 31;
        /// Bytes to allocate for the VMXON region and any VMCS region.
        vmcs_size, with_vmcs_size: u16 = 32, 13;
        physical_address_width_32, with_physical_address_width_32: bool = 48, 1;
        dual_monitor, with_dual_monitor: bool = 49, 1;
        memory_type, with_memory_type: u8 = 50, 4;
        ins_outs_reporting, with_ins_outs_reporting: bool = 54, 1;
        true_controls, with_true_controls: bool = 55, 1;
        no_error_code_check, with_no_error_code_check: bool = 56, 1;
    }
}

utils::bit_record! {
    /// EPT and VPID capabilities, IA32_VMX_EPT_VPID_CAP.
    ///
    /// See Intel SDM Vol. 3D Appendix A.10.
    pub struct EptVpidCapability(u64) {
        execute_only, with_execute_only: bool = 0, 1;
        page_walk_4, with_page_walk_4: bool = 6, 1;
        page_walk_5, with_page_walk_5: bool = 7, 1;
        uncacheable, with_uncacheable: bool = 8, 1;
        write_back, with_write_back: bool = 14, 1;
        pde_2mb, with_pde_2mb: bool = 16, 1;
        pdpte_1gb, with_pdpte_1gb: bool = 17, 1;
        invept, with_invept: bool = 20, 1;
        accessed_dirty, with_accessed_dirty: bool = 21, 1;
        advanced_exit_information, with_advanced_exit_information: bool = 22, 1;
        supervisor_shadow_stack, with_supervisor_shadow_stack: bool = 23, 1;
        invept_single_context, with_invept_single_context: bool = 25, 1;
        invept_all_context, with_invept_all_context: bool = 26, 1;
        invvpid, with_invvpid: bool = 32, 1;
        invvpid_individual_address, with_invvpid_individual_address: bool = 40, 1;
        invvpid_single_context, with_invvpid_single_context: bool = 41, 1;
        invvpid_all_context, with_invvpid_all_context: bool = 42, 1;
        invvpid_single_context_globals, with_invvpid_single_context_globals: bool = 43, 1;
        hlat_prefix_size, with_hlat_prefix_size: u8 = 48, 6;
    }
}

// ————————————————————————————————— Tests —————————————————————————————————— //

#[cfg(test)]
mod test {
    use super::*;
    use utils::bits::{check_layout, Record};

    #[test]
    fn exit_reason() {
        let reason = ExitReason::from_raw(0x8000_0021);
        assert!(reason.entry_failure());
        assert_eq!(reason.reason(), VmxExitReason::VmEntryFailureInvalidGuestState);

        let reason = ExitReason::from_raw(0x1000_0030);
        assert!(reason.pending_mtf());
        assert_eq!(reason.reason(), VmxExitReason::EptViolation);
        assert_eq!(ExitReason::from(VmxExitReason::Cpuid).raw(), 10);
    }

    #[test]
    fn interruption_information() {
        let info = InterruptionInformation::inject(
            Trapnr::GeneralProtectionFault,
            InterruptionType::HardwareException,
        );
        assert_eq!(info.raw(), 0x8000_0b0d);
        assert_eq!(info.trap(), Some(Trapnr::GeneralProtectionFault));

        let info =
            InterruptionInformation::inject(Trapnr::Breakpoint, InterruptionType::SoftwareException);
        assert_eq!(info.raw(), 0x8000_0603);
        assert!(!info.error_code_valid());

        let external = InterruptionInformation::from_raw(0x8000_0020);
        assert_eq!(external.interruption_type(), InterruptionType::ExternalInterrupt);
        assert_eq!(external.trap(), None);
    }

    #[test]
    fn segment_access_rights() {
        // 64-bit code segment.
        let cs = SegmentAccessRights::from_raw(0xa09b);
        assert_eq!(cs.segment_type(), 0xb);
        assert!(cs.descriptor_type());
        assert_eq!(cs.dpl(), 0);
        assert!(cs.present());
        assert!(cs.long_mode());
        assert!(!cs.default_big());
        assert!(cs.granularity());
        assert!(!cs.unusable());
        assert_eq!(SegmentAccessRights::from_raw(0x1_0000).undefined_bits(), 0);
    }

    #[test]
    fn capabilities() {
        let basic = VmxBasic::from_raw(0x00da_0400_0000_0004);
        assert_eq!(basic.revision_id(), 4);
        assert_eq!(basic.vmcs_size(), 0x400);
        assert_eq!(basic.memory_type(), 6);
        assert!(basic.ins_outs_reporting());
        assert!(basic.true_controls());
        assert!(!basic.no_error_code_check());

        let ept = EptVpidCapability::from_raw(0x0f01_0673_4141);
        assert!(ept.execute_only());
        assert!(ept.page_walk_4());
        assert!(ept.write_back());
        assert!(ept.pde_2mb());
        assert!(ept.pdpte_1gb());
        assert!(ept.accessed_dirty());
        assert!(ept.invvpid());
        assert!(ept.invvpid_all_context());
    }

    #[test]
    fn layouts() {
        assert_eq!(check_layout(ExitReason::FIELDS, ExitReason::BITS), Ok(()));
        assert_eq!(
            check_layout(InterruptionInformation::FIELDS, InterruptionInformation::BITS),
            Ok(())
        );
        assert_eq!(check_layout(SegmentAccessRights::FIELDS, SegmentAccessRights::BITS), Ok(()));
        assert_eq!(
            check_layout(InterruptibilityState::FIELDS, InterruptibilityState::BITS),
            Ok(())
        );
        assert_eq!(check_layout(VmxBasic::FIELDS, VmxBasic::BITS), Ok(()));
        assert_eq!(check_layout(EptVpidCapability::FIELDS, EptVpidCapability::BITS), Ok(()));
    }
}
