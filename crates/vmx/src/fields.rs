//! VMCS fields
//!
//! Every VMCS component is addressed by a 16-bit identifier that packs its access type, index,
//! type and width. See Intel SDM Vol. 3C Section 25.11.2 and Appendix B.

use crate::errors::VmxError;

// ——————————————————————————— Field Identifiers ———————————————————————————— //

utils::bit_record! {
    /// Raw layout of a VMCS field identifier.
    pub struct VmcsFieldId(u16) {
        /// Set to access the high 32 bits of a 64-bit field.
        high, with_high: bool = 0, 1;
        index, with_index: u16 = 1, 9;
        field_type, with_field_type: VmcsFieldType = 10, 2;
        must_be_zero, with_must_be_zero: bool = 12, 1;
        width, with_width: VmcsFieldWidth = 13, 2;
        reserved, with_reserved: bool = 15, 1;
    }
}

/// Valid VmcsFieldAccessType as encoded in a VMCS.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[repr(u8)]
pub enum VmcsFieldAccessType {
    Full = 0,
    High = 1,
}

utils::bit_enum! {
    /// Width of a VMCS field.
    pub enum VmcsFieldWidth: 2 {
        Width16 = 0,
        Width64 = 1,
        Width32 = 2,
        /// 64 bits on processors supporting Intel 64.
        WidthNat = 3,
    }
}

impl VmcsFieldWidth {
    /// Keeps only the bits a field of this width can hold.
    pub fn truncate(self, value: u64) -> u64 {
        match self {
            VmcsFieldWidth::Width16 => value as u16 as u64,
            VmcsFieldWidth::Width32 => value as u32 as u64,
            VmcsFieldWidth::Width64 | VmcsFieldWidth::WidthNat => value,
        }
    }
}

utils::bit_enum! {
    /// Types of VMCS fields.
    pub enum VmcsFieldType: 2 {
        Control = 0,
        VmExitInformation = 1,
        GuestState = 2,
        HostState = 3,
    }
}

impl VmcsFieldType {
    /// VM-exit information fields are read-only.
    pub fn is_vmwritable(self) -> bool {
        self != VmcsFieldType::VmExitInformation
    }
}

/// The decoded form of a VMCS field identifier.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct VmcsFieldEncoding {
    pub access_type: VmcsFieldAccessType,
    pub index: u16,
    pub tpe: VmcsFieldType,
    pub width: VmcsFieldWidth,
}

impl VmcsFieldEncoding {
    /// Creates the identifier of a full field.
    ///
    /// Only the 9 low bits of `index` are kept.
    pub const fn new(tpe: VmcsFieldType, width: VmcsFieldWidth, index: u16) -> Self {
        Self {
            access_type: VmcsFieldAccessType::Full,
            index: index & 0x1ff,
            tpe,
            width,
        }
    }

    pub fn encode(self) -> u16 {
        VmcsFieldId::default()
            .with_high(self.access_type == VmcsFieldAccessType::High)
            .with_index(self.index)
            .with_field_type(self.tpe)
            .with_width(self.width)
            .raw()
    }

    /// Decodes an identifier of the catalogue, including the high half of a 64-bit field.
    ///
    /// Identifiers with bit 12 or 15 set are rejected with `InvalidEncoding`, well-formed ones
    /// naming no field with `UnknownField`.
    pub fn decode(raw: u16) -> Result<Self, VmxError> {
        let (field, access_type) = VmcsField::lookup(raw)?;
        Ok(Self {
            access_type,
            ..field.descriptor()
        })
    }

    /// Splits an identifier into its parts without consulting the catalogue.
    pub(crate) fn parse(raw: u16) -> Result<Self, VmxError> {
        let id = VmcsFieldId::from_raw(raw);
        if id.must_be_zero() || id.reserved() {
            return Err(VmxError::InvalidEncoding(raw));
        }
        let access_type = if id.high() {
            VmcsFieldAccessType::High
        } else {
            VmcsFieldAccessType::Full
        };
        Ok(Self {
            access_type,
            index: id.index(),
            tpe: id.field_type(),
            width: id.width(),
        })
    }
}

// ———————————————————————————————— Catalogue ————————————————————————————————— //

macro_rules! vmcs_fields {
    ($( $(#[$meta:meta])* $name:ident = $encoding:literal, )*) => {
        /// The VMCS fields.
        ///
        /// 64-bit fields are listed once, by the identifier of their full access.
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
        #[repr(u16)]
        pub enum VmcsField {
            $( $(#[$meta])* $name = $encoding, )*
        }

        /// Dense numbering of the catalogue, in declaration order.
        #[repr(usize)]
        enum Ordinal {
            $( $name, )*
        }

        impl VmcsField {
            /// Every field of the catalogue, sorted by identifier.
            pub const ALL: &'static [VmcsField] = &[ $( VmcsField::$name, )* ];

            /// Number of fields in the catalogue.
            pub const COUNT: usize = Self::ALL.len();

            /// Returns the field with the given full identifier.
            pub fn from_u16(raw: u16) -> Result<VmcsField, VmxError> {
                match raw {
                    $( $encoding => Ok(VmcsField::$name), )*
                    _ => Err(VmxError::UnknownField(raw)),
                }
            }

            /// Symbolic name of the field.
            pub fn name(self) -> &'static str {
                match self {
                    $( VmcsField::$name => stringify!($name), )*
                }
            }

            /// Position of the field in [`VmcsField::ALL`].
            pub(crate) fn ordinal(self) -> usize {
                match self {
                    $( VmcsField::$name => Ordinal::$name as usize, )*
                }
            }
        }
    };
}

#[rustfmt::skip]
vmcs_fields! {
    // 16-bit control fields
    VirtualProcessorId                  = 0x0000,
    PostedInterruptNotificationVector   = 0x0002,
    EptpIndex                           = 0x0004,
    HlatPrefixSize                      = 0x0006,
    LastPidPointerIndex                 = 0x0008,

    // 16-bit guest-state fields
    GuestEsSelector                     = 0x0800,
    GuestCsSelector                     = 0x0802,
    GuestSsSelector                     = 0x0804,
    GuestDsSelector                     = 0x0806,
    GuestFsSelector                     = 0x0808,
    GuestGsSelector                     = 0x080a,
    GuestLdtrSelector                   = 0x080c,
    GuestTrSelector                     = 0x080e,
    GuestInterruptStatus                = 0x0810,
    GuestPmlIndex                       = 0x0812,
    GuestUinv                           = 0x0814,

    // 16-bit host-state fields
    HostEsSelector                      = 0x0c00,
    HostCsSelector                      = 0x0c02,
    HostSsSelector                      = 0x0c04,
    HostDsSelector                      = 0x0c06,
    HostFsSelector                      = 0x0c08,
    HostGsSelector                      = 0x0c0a,
    HostTrSelector                      = 0x0c0c,

    // 64-bit control fields
    IoBitmapA                           = 0x2000,
    IoBitmapB                           = 0x2002,
    MsrBitmaps                          = 0x2004,
    VmExitMsrStoreAddr                  = 0x2006,
    VmExitMsrLoadAddr                   = 0x2008,
    VmEntryMsrLoadAddr                  = 0x200a,
    ExecutiveVmcsPointer                = 0x200c,
    PmlAddress                          = 0x200e,
    TscOffset                           = 0x2010,
    VirtualApicAddress                  = 0x2012,
    ApicAccessAddress                   = 0x2014,
    PostedInterruptDescriptorAddress    = 0x2016,
    VmFunctionControls                  = 0x2018,
    EptPointer                          = 0x201a,
    EoiExitBitmap0                      = 0x201c,
    EoiExitBitmap1                      = 0x201e,
    EoiExitBitmap2                      = 0x2020,
    EoiExitBitmap3                      = 0x2022,
    EptpListAddress                     = 0x2024,
    VmreadBitmapAddress                 = 0x2026,
    VmwriteBitmapAddress                = 0x2028,
    VirtualizationExceptionInfoAddress  = 0x202a,
    XssExitingBitmap                    = 0x202c,
    EnclsExitingBitmap                  = 0x202e,
    SppTablePointer                     = 0x2030,
    TscMultiplier                       = 0x2032,
    TertiaryProcessorControls           = 0x2034,
    EnclvExitingBitmap                  = 0x2036,
    LowPasidDirectoryAddress            = 0x2038,
    HighPasidDirectoryAddress           = 0x203a,
    SharedEptPointer                    = 0x203c,
    PconfigExitingBitmap                = 0x203e,
    HlatPointer                         = 0x2040,
    PidPointerTableAddress              = 0x2042,
    SecondaryVmExitControls             = 0x2044,
    Ia32SpecCtrlMask                    = 0x204a,
    Ia32SpecCtrlShadow                  = 0x204c,

    // 64-bit read-only data fields
    GuestPhysicalAddress                = 0x2400,

    // 64-bit guest-state fields
    VmcsLinkPointer                     = 0x2800,
    GuestIa32Debugctl                   = 0x2802,
    GuestIa32Pat                        = 0x2804,
    GuestIa32Efer                       = 0x2806,
    GuestIa32PerfGlobalCtrl             = 0x2808,
    GuestPdpte0                         = 0x280a,
    GuestPdpte1                         = 0x280c,
    GuestPdpte2                         = 0x280e,
    GuestPdpte3                         = 0x2810,
    GuestIa32Bndcfgs                    = 0x2812,
    GuestIa32RtitCtl                    = 0x2814,
    GuestIa32LbrCtl                     = 0x2816,
    GuestIa32Pkrs                       = 0x2818,

    // 64-bit host-state fields
    HostIa32Pat                         = 0x2c00,
    HostIa32Efer                        = 0x2c02,
    HostIa32PerfGlobalCtrl              = 0x2c04,
    HostIa32Pkrs                        = 0x2c06,

    // 32-bit control fields
    PinBasedControls                    = 0x4000,
    PrimaryProcessorControls            = 0x4002,
    ExceptionBitmap                     = 0x4004,
    PageFaultErrorCodeMask              = 0x4006,
    PageFaultErrorCodeMatch             = 0x4008,
    Cr3TargetCount                      = 0x400a,
    PrimaryVmExitControls               = 0x400c,
    VmExitMsrStoreCount                 = 0x400e,
    VmExitMsrLoadCount                  = 0x4010,
    VmEntryControls                     = 0x4012,
    VmEntryMsrLoadCount                 = 0x4014,
    VmEntryInterruptionInfo             = 0x4016,
    VmEntryExceptionErrorCode           = 0x4018,
    VmEntryInstructionLength            = 0x401a,
    TprThreshold                        = 0x401c,
    SecondaryProcessorControls          = 0x401e,
    PleGap                              = 0x4020,
    PleWindow                           = 0x4022,
    NotifyWindow                        = 0x4024,

    // 32-bit read-only data fields
    VmInstructionError                  = 0x4400,
    ExitReason                          = 0x4402,
    VmExitInterruptionInfo              = 0x4404,
    VmExitInterruptionErrorCode         = 0x4406,
    IdtVectoringInfo                    = 0x4408,
    IdtVectoringErrorCode               = 0x440a,
    VmExitInstructionLength             = 0x440c,
    VmExitInstructionInfo               = 0x440e,

    // 32-bit guest-state fields
    GuestEsLimit                        = 0x4800,
    GuestCsLimit                        = 0x4802,
    GuestSsLimit                        = 0x4804,
    GuestDsLimit                        = 0x4806,
    GuestFsLimit                        = 0x4808,
    GuestGsLimit                        = 0x480a,
    GuestLdtrLimit                      = 0x480c,
    GuestTrLimit                        = 0x480e,
    GuestGdtrLimit                      = 0x4810,
    GuestIdtrLimit                      = 0x4812,
    GuestEsAccessRights                 = 0x4814,
    GuestCsAccessRights                 = 0x4816,
    GuestSsAccessRights                 = 0x4818,
    GuestDsAccessRights                 = 0x481a,
    GuestFsAccessRights                 = 0x481c,
    GuestGsAccessRights                 = 0x481e,
    GuestLdtrAccessRights               = 0x4820,
    GuestTrAccessRights                 = 0x4822,
    GuestInterruptibilityState          = 0x4824,
    GuestActivityState                  = 0x4826,
    GuestSmbase                         = 0x4828,
    GuestIa32SysenterCs                 = 0x482a,
    VmxPreemptionTimerValue             = 0x482e,

    // 32-bit host-state field
    HostIa32SysenterCs                  = 0x4c00,

    // Natural-width control fields
    Cr0GuestHostMask                    = 0x6000,
    Cr4GuestHostMask                    = 0x6002,
    Cr0ReadShadow                       = 0x6004,
    Cr4ReadShadow                       = 0x6006,
    Cr3TargetValue0                     = 0x6008,
    Cr3TargetValue1                     = 0x600a,
    Cr3TargetValue2                     = 0x600c,
    Cr3TargetValue3                     = 0x600e,

    // Natural-width read-only data fields
    ExitQualification                   = 0x6400,
    IoRcx                               = 0x6402,
    IoRsi                               = 0x6404,
    IoRdi                               = 0x6406,
    IoRip                               = 0x6408,
    GuestLinearAddress                  = 0x640a,

    // Natural-width guest-state fields
    GuestCr0                            = 0x6800,
    GuestCr3                            = 0x6802,
    GuestCr4                            = 0x6804,
    GuestEsBase                         = 0x6806,
    GuestCsBase                         = 0x6808,
    GuestSsBase                         = 0x680a,
    GuestDsBase                         = 0x680c,
    GuestFsBase                         = 0x680e,
    GuestGsBase                         = 0x6810,
    GuestLdtrBase                       = 0x6812,
    GuestTrBase                         = 0x6814,
    GuestGdtrBase                       = 0x6816,
    GuestIdtrBase                       = 0x6818,
    GuestDr7                            = 0x681a,
    GuestRsp                            = 0x681c,
    GuestRip                            = 0x681e,
    GuestRflags                         = 0x6820,
    GuestPendingDebugExceptions         = 0x6822,
    GuestIa32SysenterEsp                = 0x6824,
    GuestIa32SysenterEip                = 0x6826,
    GuestIa32SCet                       = 0x6828,
    GuestSsp                            = 0x682a,
    GuestIa32InterruptSspTableAddr      = 0x682c,

    // Natural-width host-state fields
    HostCr0                             = 0x6c00,
    HostCr3                             = 0x6c02,
    HostCr4                             = 0x6c04,
    HostFsBase                          = 0x6c06,
    HostGsBase                          = 0x6c08,
    HostTrBase                          = 0x6c0a,
    HostGdtrBase                        = 0x6c0c,
    HostIdtrBase                        = 0x6c0e,
    HostIa32SysenterEsp                 = 0x6c10,
    HostIa32SysenterEip                 = 0x6c12,
    HostRsp                             = 0x6c14,
    HostRip                             = 0x6c16,
    HostIa32SCet                        = 0x6c18,
    HostSsp                             = 0x6c1a,
    HostIa32InterruptSspTableAddr       = 0x6c1c,
}

impl VmcsField {
    /// The 16-bit identifier of the field.
    #[inline]
    pub fn encoding(self) -> u16 {
        self as u16
    }

    fn id(self) -> VmcsFieldId {
        VmcsFieldId::from_raw(self.encoding())
    }

    /// The decoded identifier.
    pub fn descriptor(self) -> VmcsFieldEncoding {
        VmcsFieldEncoding {
            access_type: VmcsFieldAccessType::Full,
            index: self.index(),
            tpe: self.tpe(),
            width: self.width(),
        }
    }

    pub fn width(self) -> VmcsFieldWidth {
        self.id().width()
    }

    pub fn tpe(self) -> VmcsFieldType {
        self.id().field_type()
    }

    pub fn index(self) -> u16 {
        self.id().index()
    }

    /// Returns false for the read-only VM-exit information fields.
    pub fn is_writable(self) -> bool {
        self.tpe().is_vmwritable()
    }

    /// Resolves an identifier, including the high half of a 64-bit field.
    pub fn lookup(raw: u16) -> Result<(VmcsField, VmcsFieldAccessType), VmxError> {
        let id = VmcsFieldEncoding::parse(raw)?;
        if id.access_type == VmcsFieldAccessType::Full {
            return Self::from_u16(raw).map(|field| (field, VmcsFieldAccessType::Full));
        }

        match Self::from_u16(raw & !1) {
            Ok(field) if field.width() == VmcsFieldWidth::Width64 => {
                Ok((field, VmcsFieldAccessType::High))
            }
            _ => Err(VmxError::UnknownField(raw)),
        }
    }

    /// Returns true if the processor can hold the field, given the content of the
    /// IA32_VMX_VMCS_ENUM MSR (highest index value in bits 9:1).
    ///
    /// See Intel SDM Vol. 3D Appendix A.9.
    pub fn is_supported(self, vmcs_enum: u64) -> bool {
        let highest_index = ((vmcs_enum >> 1) & 0x1ff) as u16;
        self.index() <= highest_index
    }
}

// ————————————————————————————————— Tests —————————————————————————————————— //

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::HashSet;
    use utils::bits::{check_layout, Record};

    #[test]
    fn identifier_layout() {
        assert_eq!(check_layout(VmcsFieldId::FIELDS, VmcsFieldId::BITS), Ok(()));
        assert_eq!(VmcsFieldId::defined_mask(), 0xffff);
    }

    #[rustfmt::skip]
    #[test]
    fn field_properties() {
        assert_eq!(VmcsField::GuestCr3.width(), VmcsFieldWidth::WidthNat);
        assert_eq!(VmcsField::GuestCr3.tpe(), VmcsFieldType::GuestState);
        assert_eq!(VmcsField::GuestCr3.index(), 1);
        assert_eq!(VmcsField::EptPointer.width(), VmcsFieldWidth::Width64);
        assert_eq!(VmcsField::EptPointer.tpe(), VmcsFieldType::Control);
        assert_eq!(VmcsField::EptPointer.index(), 13);
        assert_eq!(VmcsField::ExitReason.width(), VmcsFieldWidth::Width32);
        assert_eq!(VmcsField::ExitReason.tpe(), VmcsFieldType::VmExitInformation);
        assert_eq!(VmcsField::VirtualProcessorId.width(), VmcsFieldWidth::Width16);
        assert_eq!(VmcsField::HostRip.tpe(), VmcsFieldType::HostState);
        assert!(!VmcsField::ExitQualification.is_writable());
        assert!(!VmcsField::GuestPhysicalAddress.is_writable());
        assert!(VmcsField::GuestRip.is_writable());
    }

    #[test]
    fn encoding_bijection() {
        let mut identifiers = HashSet::new();
        let mut triples = HashSet::new();
        let mut names = HashSet::new();
        for field in VmcsField::ALL {
            let raw = field.encoding();
            let decoded = VmcsFieldEncoding::decode(raw).unwrap();
            assert_eq!(decoded, field.descriptor());
            assert_eq!(decoded.access_type, VmcsFieldAccessType::Full);
            assert_eq!(decoded.encode(), raw);
            assert_eq!(VmcsField::from_u16(raw), Ok(*field));
            assert!(identifiers.insert(raw));
            assert!(triples.insert((decoded.tpe, decoded.width, decoded.index)));
            assert!(names.insert(field.name()));
        }
        assert_eq!(identifiers.len(), VmcsField::COUNT);
    }

    #[test]
    fn catalogue_is_sorted_and_dense() {
        for (idx, field) in VmcsField::ALL.iter().enumerate() {
            assert_eq!(field.ordinal(), idx);
        }
        for pair in VmcsField::ALL.windows(2) {
            assert!(pair[0].encoding() < pair[1].encoding());
        }
    }

    #[test]
    fn encode_from_parts() {
        let ept = VmcsFieldEncoding::new(VmcsFieldType::Control, VmcsFieldWidth::Width64, 13);
        assert_eq!(ept.encode(), 0x201a);
        let high = VmcsFieldEncoding {
            access_type: VmcsFieldAccessType::High,
            ..ept
        };
        assert_eq!(high.encode(), 0x201b);
        assert_eq!(VmcsFieldEncoding::decode(0x201b), Ok(high));
    }

    #[test]
    fn reject_invalid_identifiers() {
        assert_eq!(VmcsFieldEncoding::decode(0x1000), Err(VmxError::InvalidEncoding(0x1000)));
        assert_eq!(VmcsFieldEncoding::decode(0x8000), Err(VmxError::InvalidEncoding(0x8000)));
        assert_eq!(VmcsField::from_u16(0x201b), Err(VmxError::UnknownField(0x201b)));
        assert_eq!(VmcsField::from_u16(0x0002 + 0x400), Err(VmxError::UnknownField(0x0402)));
        assert_eq!(VmcsField::lookup(0x1000), Err(VmxError::InvalidEncoding(0x1000)));
    }

    #[test]
    fn decode_outside_catalogue() {
        // Well-formed, but no 16-bit VM-exit information field exists.
        assert_eq!(VmcsFieldEncoding::parse(0x0402).map(|id| id.index), Ok(1));
        assert_eq!(VmcsFieldEncoding::decode(0x0402), Err(VmxError::UnknownField(0x0402)));
        assert_eq!(VmcsFieldEncoding::decode(0x6803), Err(VmxError::UnknownField(0x6803)));
        assert_eq!(VmcsFieldEncoding::decode(0x6bfe), Err(VmxError::UnknownField(0x6bfe)));
    }

    #[test]
    fn lookup_high_halves() {
        assert_eq!(
            VmcsField::lookup(0x201b),
            Ok((VmcsField::EptPointer, VmcsFieldAccessType::High))
        );
        assert_eq!(
            VmcsField::lookup(0x6802),
            Ok((VmcsField::GuestCr3, VmcsFieldAccessType::Full))
        );
        // Only 64-bit fields have a high half.
        assert_eq!(VmcsField::lookup(0x6803), Err(VmxError::UnknownField(0x6803)));
        assert_eq!(VmcsField::lookup(0x4403), Err(VmxError::UnknownField(0x4403)));
    }

    #[test]
    fn width_truncation() {
        assert_eq!(VmcsFieldWidth::Width16.truncate(0x1_2345), 0x2345);
        assert_eq!(VmcsFieldWidth::Width32.truncate(0x1_0000_0001), 1);
        assert_eq!(VmcsFieldWidth::WidthNat.truncate(u64::MAX), u64::MAX);
    }

    #[test]
    fn supported_fields() {
        // A processor reporting 0x13 as highest index.
        let vmcs_enum = 0x13 << 1;
        assert!(VmcsField::GuestIa32SysenterEip.is_supported(vmcs_enum));
        assert!(!VmcsField::GuestIa32SCet.is_supported(vmcs_enum));
    }
}
