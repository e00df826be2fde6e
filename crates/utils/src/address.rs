//! Address representation
use core::ops::Add;

/// Mask for the last 9 bits, corresponding to the size of page table indexes.
const PAGE_TABLE_INDEX_MASK: u64 = 0b111111111;

/// Mask for the offset inside a 4 KiB page.
const PAGE_OFFSET_MASK: u64 = 0xfff;

/// A macro for implementing addresses types.
///
/// An address is just a wrapper around an `u64`, with getter and setter methods. Physical
/// addresses are wider than 32 bits even when the host is not, hence the fixed width.
macro_rules! addr_impl {
    ($name:ident) => {
        #[repr(transparent)]
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default, PartialOrd, Ord)]
        pub struct $name(u64);

        impl $name {
            #[inline]
            pub const fn new(addr: u64) -> Self {
                Self(addr)
            }

            #[inline]
            pub const fn as_u64(self) -> u64 {
                self.0
            }

            #[inline]
            pub const fn as_usize(self) -> usize {
                self.0 as usize
            }

            /// Creates an address that points to `0`.
            #[inline]
            pub const fn zero() -> Self {
                Self(0)
            }

            /// Aligns address downwards.
            #[inline]
            pub const fn align_down(self, align: u64) -> Self {
                assert!(align.is_power_of_two(), "`align` must be a power of two");
                Self::new(self.0 & !(align - 1))
            }

            /// Returns true if the address is a multiple of `align`.
            #[inline]
            pub const fn is_aligned(self, align: u64) -> bool {
                assert!(align.is_power_of_two(), "`align` must be a power of two");
                self.0 & (align - 1) == 0
            }

            /// Returns this address' L4 index (bits 47:39).
            #[inline]
            pub const fn l4_index(self) -> usize {
                ((self.0 >> 39) & PAGE_TABLE_INDEX_MASK) as usize
            }

            /// Returns this address' L3 index (bits 38:30).
            #[inline]
            pub const fn l3_index(self) -> usize {
                ((self.0 >> 30) & PAGE_TABLE_INDEX_MASK) as usize
            }

            /// Returns this address' L2 index (bits 29:21).
            #[inline]
            pub const fn l2_index(self) -> usize {
                ((self.0 >> 21) & PAGE_TABLE_INDEX_MASK) as usize
            }

            /// Returns this address' L1 index (bits 20:12).
            #[inline]
            pub const fn l1_index(self) -> usize {
                ((self.0 >> 12) & PAGE_TABLE_INDEX_MASK) as usize
            }

            /// Returns the offset within the 4 KiB page.
            #[inline]
            pub const fn page_offset(self) -> u64 {
                self.0 & PAGE_OFFSET_MASK
            }
        }

        impl Add<u64> for $name {
            type Output = Self;

            fn add(self, other: u64) -> Self {
                Self::new(self.0 + other)
            }
        }

        impl core::fmt::LowerHex for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::LowerHex::fmt(&self.0, f)
            }
        }
    };
}

addr_impl!(GuestVirtAddr);
addr_impl!(GuestPhysAddr);
addr_impl!(HostPhysAddr);
addr_impl!(HostVirtAddr);

// ————————————————————————————————— Tests —————————————————————————————————— //
