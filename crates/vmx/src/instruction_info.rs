//! VM-exit instruction information
//!
//! Like the exit qualification, the layout of the instruction-information field depends on the
//! instruction that caused the exit. Most of the layouts describe a memory operand, the common
//! accessors are provided by [`MemoryOperand`].
//!
//! See Intel SDM Vol. 3C Section 28.2.5.

use crate::errors::VmxExitReason;
use crate::operands::{Register, Segment, Size};

/// Instructions with a memory operand described by scaling, base, index and segment.
pub trait MemoryOperand: Copy {
    /// Index register, `None` if there is none or if the operand is a register.
    fn index(self) -> Option<Register>;

    /// Base register, `None` if there is none or if the operand is a register.
    fn base(self) -> Option<Register>;
}

macro_rules! memory_operand {
    ($name:ident $(, $register_form:ident)?) => {
        impl MemoryOperand for $name {
            fn index(self) -> Option<Register> {
                let register_form = false $(|| self.$register_form())?;
                if register_form || self.index_invalid() {
                    None
                } else {
                    Some(self.index_register())
                }
            }

            fn base(self) -> Option<Register> {
                let register_form = false $(|| self.$register_form())?;
                if register_form || self.base_invalid() {
                    None
                } else {
                    Some(self.base_register())
                }
            }
        }
    };
}

// ——————————————————————————————— INS/OUTS ———————————————————————————————— //

utils::bit_record! {
    /// INS and OUTS, Table 28-8.
    pub struct InsOutsInfo(u32) {
        address_size, with_address_size: Size = 7, 3;
        segment, with_segment: Segment = 15, 3;
    }
}

// ————————————————————————————— Invalidations —————————————————————————————— //

/// Instructions sharing the invalidation layout.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum InvalidationInstruction {
    Invept,
    Invpcid,
    Invvpid,
}

utils::bit_record! {
    /// INVEPT, INVPCID and INVVPID, Table 28-9.
    pub struct InvalidationInfo(u32) {
        scaling, with_scaling: u8 = 0, 2;
        address_size, with_address_size: Size = 7, 3;
        segment, with_segment: Segment = 15, 3;
        index_register, with_index_register: Register = 18, 4;
        index_invalid, with_index_invalid: bool = 22, 1;
        base_register, with_base_register: Register = 23, 4;
        base_invalid, with_base_invalid: bool = 27, 1;
        /// Register holding the invalidation type.
        reg2, with_reg2: Register = 28, 4;
    }
}

memory_operand!(InvalidationInfo);

// ——————————————————————————— Descriptor Tables ———————————————————————————— //

utils::bit_enum! {
    pub enum DescriptorTableInstruction: 2 {
        Sgdt = 0,
        Sidt = 1,
        Lgdt = 2,
        Lidt = 3,
    }
}

utils::bit_record! {
    /// LIDT, LGDT, SIDT and SGDT, Table 28-10.
    pub struct DescriptorTableInfo(u32) {
        scaling, with_scaling: u8 = 0, 2;
        address_size, with_address_size: Size = 7, 3;
        /// 32-bit operand size, 16-bit otherwise. Ignored in 64-bit mode.
        operand_size_32, with_operand_size_32: bool = 11, 1;
        segment, with_segment: Segment = 15, 3;
        index_register, with_index_register: Register = 18, 4;
        index_invalid, with_index_invalid: bool = 22, 1;
        base_register, with_base_register: Register = 23, 4;
        base_invalid, with_base_invalid: bool = 27, 1;
        instruction, with_instruction: DescriptorTableInstruction = 28, 2;
    }
}

memory_operand!(DescriptorTableInfo);

// ——————————————————————————————— LDTR & TR ———————————————————————————————— //

utils::bit_enum! {
    pub enum LdtrTrInstruction: 2 {
        Sldt = 0,
        Str = 1,
        Lldt = 2,
        Ltr = 3,
    }
}

utils::bit_record! {
    /// LLDT, LTR, SLDT and STR, Table 28-11.
    pub struct LdtrTrInfo(u32) {
        scaling, with_scaling: u8 = 0, 2;
        /// Operand register, when `register_operand` is set.
        reg1, with_reg1: Register = 3, 4;
        address_size, with_address_size: Size = 7, 3;
        register_operand, with_register_operand: bool = 10, 1;
        segment, with_segment: Segment = 15, 3;
        index_register, with_index_register: Register = 18, 4;
        index_invalid, with_index_invalid: bool = 22, 1;
        base_register, with_base_register: Register = 23, 4;
        base_invalid, with_base_invalid: bool = 27, 1;
        instruction, with_instruction: LdtrTrInstruction = 28, 2;
    }
}

memory_operand!(LdtrTrInfo, register_operand);

impl LdtrTrInfo {
    /// The register operand, `None` for memory operands.
    pub fn register(self) -> Option<Register> {
        self.register_operand().then(|| self.reg1())
    }
}

// ——————————————————————————— Random Numbers ————————————————————————————— //

/// Instructions sharing the RDRAND layout.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RandomNumberInstruction {
    Rdrand,
    Rdseed,
    Tpause,
    Umwait,
}

utils::bit_record! {
    /// RDRAND, RDSEED, TPAUSE and UMWAIT, Table 28-12.
    pub struct RandomNumberInfo(u32) {
        destination, with_destination: Register = 3, 4;
        operand_size, with_operand_size: Size = 11, 2;
    }
}

// ———————————————————————— VMX Memory Operands ———————————————————————————— //

/// Instructions with a single memory operand.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum VmxMemoryInstruction {
    Vmclear,
    Vmptrld,
    Vmptrst,
    Vmxon,
    Xrstors,
    Xsaves,
}

utils::bit_record! {
    /// VMCLEAR, VMPTRLD, VMPTRST, VMXON, XRSTORS and XSAVES, Table 28-13.
    pub struct VmxMemoryOperandInfo(u32) {
        scaling, with_scaling: u8 = 0, 2;
        address_size, with_address_size: Size = 7, 3;
        segment, with_segment: Segment = 15, 3;
        index_register, with_index_register: Register = 18, 4;
        index_invalid, with_index_invalid: bool = 22, 1;
        base_register, with_base_register: Register = 23, 4;
        base_invalid, with_base_invalid: bool = 27, 1;
    }
}

memory_operand!(VmxMemoryOperandInfo);

// ——————————————————————————— VMREAD & VMWRITE ———————————————————————————— //

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum VmAccessInstruction {
    Vmread,
    Vmwrite,
}

utils::bit_record! {
    /// VMREAD and VMWRITE, Table 28-14.
    pub struct VmreadVmwriteInfo(u32) {
        scaling, with_scaling: u8 = 0, 2;
        /// Register holding the value, when `register_operand` is set.
        reg1, with_reg1: Register = 3, 4;
        address_size, with_address_size: Size = 7, 3;
        register_operand, with_register_operand: bool = 10, 1;
        segment, with_segment: Segment = 15, 3;
        index_register, with_index_register: Register = 18, 4;
        index_invalid, with_index_invalid: bool = 22, 1;
        base_register, with_base_register: Register = 23, 4;
        base_invalid, with_base_invalid: bool = 27, 1;
        /// Register holding the VMCS field encoding.
        reg2, with_reg2: Register = 28, 4;
    }
}

memory_operand!(VmreadVmwriteInfo, register_operand);

impl VmreadVmwriteInfo {
    /// The register holding the value, `None` for memory operands.
    pub fn register(self) -> Option<Register> {
        self.register_operand().then(|| self.reg1())
    }
}

// ———————————————————————— Instruction Information ————————————————————————— //

/// A decoded instruction-information field.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum InstructionInformation {
    InsOuts(InsOutsInfo),
    Invalidation(InvalidationInstruction, InvalidationInfo),
    DescriptorTable(DescriptorTableInfo),
    LdtrTr(LdtrTrInfo),
    RandomNumber(RandomNumberInstruction, RandomNumberInfo),
    VmxMemoryOperand(VmxMemoryInstruction, VmxMemoryOperandInfo),
    VmreadVmwrite(VmAccessInstruction, VmreadVmwriteInfo),
    /// The field is undefined for this exit.
    Undefined,
}

impl InstructionInformation {
    /// Interprets `raw` according to the basic exit reason.
    ///
    /// The INS/OUTS layout is selected for every I/O exit, it is only meaningful for string
    /// instructions (see [`ExitInformation`](crate::ExitInformation)).
    pub fn decode(reason: VmxExitReason, raw: u32) -> Self {
        use InvalidationInstruction as Inv;
        use RandomNumberInstruction as Rng;
        use VmxMemoryInstruction as Mem;

        match reason {
            VmxExitReason::IoInstruction => Self::InsOuts(InsOutsInfo::from_raw(raw)),
            VmxExitReason::Invept => {
                Self::Invalidation(Inv::Invept, InvalidationInfo::from_raw(raw))
            }
            VmxExitReason::Invpcid => {
                Self::Invalidation(Inv::Invpcid, InvalidationInfo::from_raw(raw))
            }
            VmxExitReason::Invvpid => {
                Self::Invalidation(Inv::Invvpid, InvalidationInfo::from_raw(raw))
            }
            VmxExitReason::AccessToGdtrOrIdtr => {
                Self::DescriptorTable(DescriptorTableInfo::from_raw(raw))
            }
            VmxExitReason::AccessToLdtrOrTr => Self::LdtrTr(LdtrTrInfo::from_raw(raw)),
            VmxExitReason::Rdrand => {
                Self::RandomNumber(Rng::Rdrand, RandomNumberInfo::from_raw(raw))
            }
            VmxExitReason::Rdseed => {
                Self::RandomNumber(Rng::Rdseed, RandomNumberInfo::from_raw(raw))
            }
            VmxExitReason::Tpause => {
                Self::RandomNumber(Rng::Tpause, RandomNumberInfo::from_raw(raw))
            }
            VmxExitReason::Umwait => {
                Self::RandomNumber(Rng::Umwait, RandomNumberInfo::from_raw(raw))
            }
            VmxExitReason::Vmclear => {
                Self::VmxMemoryOperand(Mem::Vmclear, VmxMemoryOperandInfo::from_raw(raw))
            }
            VmxExitReason::Vmptrld => {
                Self::VmxMemoryOperand(Mem::Vmptrld, VmxMemoryOperandInfo::from_raw(raw))
            }
            VmxExitReason::Vmptrst => {
                Self::VmxMemoryOperand(Mem::Vmptrst, VmxMemoryOperandInfo::from_raw(raw))
            }
            VmxExitReason::Vmxon => {
                Self::VmxMemoryOperand(Mem::Vmxon, VmxMemoryOperandInfo::from_raw(raw))
            }
            VmxExitReason::Xrstors => {
                Self::VmxMemoryOperand(Mem::Xrstors, VmxMemoryOperandInfo::from_raw(raw))
            }
            VmxExitReason::Xsaves => {
                Self::VmxMemoryOperand(Mem::Xsaves, VmxMemoryOperandInfo::from_raw(raw))
            }
            VmxExitReason::Vmread => Self::VmreadVmwrite(
                VmAccessInstruction::Vmread,
                VmreadVmwriteInfo::from_raw(raw),
            ),
            VmxExitReason::Vmwrite => Self::VmreadVmwrite(
                VmAccessInstruction::Vmwrite,
                VmreadVmwriteInfo::from_raw(raw),
            ),
            _ => {
                log::debug!("No instruction information layout for {:?}", reason);
                Self::Undefined
            }
        }
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
    fn descriptor_table_identity() {
        // LGDT [rax + rbx*4], 64-bits addressing, DS.
        let raw = (2 << 28) | (0 << 23) | (3 << 18) | (3 << 15) | (2 << 7) | 2;
        let info = InstructionInformation::decode(VmxExitReason::AccessToGdtrOrIdtr, raw);
        let InstructionInformation::DescriptorTable(table) = info else {
            panic!("Wrong instruction information: {:?}", info);
        };
        assert_eq!(table.instruction(), DescriptorTableInstruction::Lgdt);
        assert_eq!(table.scaling(), 2);
        assert_eq!(table.address_size(), Size::Bits64);
        assert_eq!(table.segment(), Segment::Ds);
        assert_eq!(table.base(), Some(Register::Rax));
        assert_eq!(table.index(), Some(Register::Rbx));

        // Same operand, no index.
        let table = DescriptorTableInfo::from_raw(raw | (1 << 22));
        assert_eq!(table.index(), None);
        assert_eq!(table.base(), Some(Register::Rax));

        let table = DescriptorTableInfo::from_raw((3 << 28) | (1 << 27) | (1 << 22));
        assert_eq!(table.instruction(), DescriptorTableInstruction::Lidt);
        assert_eq!(table.base(), None);
        assert_eq!(table.index(), None);
    }

    #[test]
    fn ldtr_tr() {
        // LTR cx
        let info = LdtrTrInfo::from_raw((3 << 28) | (1 << 10) | (1 << 3));
        assert_eq!(info.instruction(), LdtrTrInstruction::Ltr);
        assert_eq!(info.register(), Some(Register::Rcx));
        assert_eq!(info.base(), None);
        assert_eq!(info.index(), None);

        // SLDT [rdi]
        let info = LdtrTrInfo::from_raw((7 << 23) | (1 << 22));
        assert_eq!(info.instruction(), LdtrTrInstruction::Sldt);
        assert_eq!(info.register(), None);
        assert_eq!(info.base(), Some(Register::Rdi));
    }

    #[test]
    fn dispatch() {
        assert!(matches!(
            InstructionInformation::decode(VmxExitReason::Invept, 0),
            InstructionInformation::Invalidation(InvalidationInstruction::Invept, _)
        ));
        assert!(matches!(
            InstructionInformation::decode(VmxExitReason::Invpcid, 0),
            InstructionInformation::Invalidation(InvalidationInstruction::Invpcid, _)
        ));
        assert!(matches!(
            InstructionInformation::decode(VmxExitReason::Umwait, 0),
            InstructionInformation::RandomNumber(RandomNumberInstruction::Umwait, _)
        ));
        assert!(matches!(
            InstructionInformation::decode(VmxExitReason::Xsaves, 0),
            InstructionInformation::VmxMemoryOperand(VmxMemoryInstruction::Xsaves, _)
        ));
        assert!(matches!(
            InstructionInformation::decode(VmxExitReason::Vmwrite, 0),
            InstructionInformation::VmreadVmwrite(VmAccessInstruction::Vmwrite, _)
        ));
        assert!(matches!(
            InstructionInformation::decode(VmxExitReason::IoInstruction, 0),
            InstructionInformation::InsOuts(_)
        ));
        assert!(InstructionInformation::decode(VmxExitReason::Cpuid, 0).is_undefined());
        assert!(InstructionInformation::decode(VmxExitReason::EptViolation, 0).is_undefined());
    }

    #[test]
    fn operands() {
        // RDRAND r9d
        let info = RandomNumberInfo::from_raw((1 << 11) | (9 << 3));
        assert_eq!(info.destination(), Register::R9);
        assert_eq!(info.operand_size(), Size::Bits32);
        assert_eq!(RandomNumberInfo::from_raw(3 << 11).operand_size(), Size::Undefined(3));

        // VMREAD rax, rdx
        let info = VmreadVmwriteInfo::from_raw((2 << 28) | (1 << 10));
        assert_eq!(info.register(), Some(Register::Rax));
        assert_eq!(info.reg2(), Register::Rdx);
        assert_eq!(info.base(), None);

        // INVEPT rcx, [rsi]
        let info = InvalidationInfo::from_raw((1 << 28) | (6 << 23) | (1 << 22) | (2 << 7));
        assert_eq!(info.reg2(), Register::Rcx);
        assert_eq!(info.base(), Some(Register::Rsi));
        assert_eq!(info.index(), None);

        let info = InsOutsInfo::from_raw((1 << 7) | (0 << 15));
        assert_eq!(info.address_size(), Size::Bits32);
        assert_eq!(info.segment(), Segment::Es);
    }

    #[test]
    fn layouts() {
        assert_eq!(check_layout(InsOutsInfo::FIELDS, 32), Ok(()));
        assert_eq!(check_layout(InvalidationInfo::FIELDS, 32), Ok(()));
        assert_eq!(check_layout(DescriptorTableInfo::FIELDS, 32), Ok(()));
        assert_eq!(check_layout(LdtrTrInfo::FIELDS, 32), Ok(()));
        assert_eq!(check_layout(RandomNumberInfo::FIELDS, 32), Ok(()));
        assert_eq!(check_layout(VmxMemoryOperandInfo::FIELDS, 32), Ok(()));
        assert_eq!(check_layout(VmreadVmwriteInfo::FIELDS, 32), Ok(()));
    }
}
