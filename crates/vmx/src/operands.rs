//! Operand encodings shared by the exit qualifications and the instruction information.

utils::bit_enum! {
    /// General purpose register numbers.
    pub enum Register: 4 {
        Rax = 0,
        Rcx = 1,
        Rdx = 2,
        Rbx = 3,
        Rsp = 4,
        Rbp = 5,
        Rsi = 6,
        Rdi = 7,
        R8 = 8,
        R9 = 9,
        R10 = 10,
        R11 = 11,
        R12 = 12,
        R13 = 13,
        R14 = 14,
        R15 = 15,
    }
}

utils::bit_enum! {
    /// Segment register numbers.
    pub enum Segment: 3 {
        Es = 0,
        Cs = 1,
        Ss = 2,
        Ds = 3,
        Fs = 4,
        Gs = 5,
        _ => Undefined,
    }
}

utils::bit_enum! {
    /// Address or operand size.
    pub enum Size: 3 {
        Bits16 = 0,
        Bits32 = 1,
        Bits64 = 2,
        _ => Undefined,
    }
}

impl Size {
    /// Size in bytes, `None` for undefined encodings.
    pub fn bytes(self) -> Option<u8> {
        match self {
            Size::Bits16 => Some(2),
            Size::Bits32 => Some(4),
            Size::Bits64 => Some(8),
            Size::Undefined(_) => None,
        }
    }
}

// ————————————————————————————————— Tests —————————————————————————————————— //
