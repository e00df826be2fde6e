//! Bit-range accessors
//!
//! Hardware records are plain integers in which the manual assigns meaning to named ranges of
//! bits. Instead of writing a shift and a mask for every field, a range is described once as an
//! (offset, width) pair and read or written through the two pure functions [`extract`] and
//! [`compose`], both backed by [`BitField`].
//!
//! The [`bit_record!`](crate::bit_record) macro builds typed records on top of those functions:
//! a transparent newtype around the raw word, one getter and one builder per field, and a layout
//! table ([`Record::FIELDS`]) that the layout laws can be checked against.

use core::fmt;
use core::ops::Range;

use bit_field::BitField;

// ———————————————————————————————— Bit Ranges ————————————————————————————————— //

/// A contiguous range of bits inside a word of at most 64 bits.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct BitRange {
    offset: u32,
    width: u32,
}

impl BitRange {
    /// Creates a range starting at bit `offset` and spanning `width` bits.
    ///
    /// Panics if the range is empty or goes past bit 63. Used in a const context (as the records
    /// do) the panic becomes a compilation error.
    pub const fn new(offset: u32, width: u32) -> Self {
        assert!(width > 0, "empty bit range");
        assert!(
            offset < 64 && width <= 64 - offset,
            "bit range exceeds the 64 bits word"
        );
        Self { offset, width }
    }

    #[inline]
    pub const fn offset(self) -> u32 {
        self.offset
    }

    #[inline]
    pub const fn width(self) -> u32 {
        self.width
    }

    /// First bit after the range.
    #[inline]
    pub const fn end(self) -> u32 {
        self.offset + self.width
    }

    /// Mask of the values representable in the range, aligned on bit 0.
    #[inline]
    pub const fn value_mask(self) -> u64 {
        if self.width == 64 {
            u64::MAX
        } else {
            (1 << self.width) - 1
        }
    }

    /// Mask of the range inside the word.
    #[inline]
    pub const fn mask(self) -> u64 {
        self.value_mask() << self.offset
    }

    /// Returns true if the range lies inside a word of `bits` bits.
    #[inline]
    pub const fn fits(self, bits: u32) -> bool {
        self.end() <= bits
    }

    /// The bits covered by the range.
    #[inline]
    pub const fn bits(self) -> Range<usize> {
        self.offset as usize..self.end() as usize
    }

    /// Returns the value stored in the range, zero-extended.
    #[inline]
    pub fn extract(self, word: u64) -> u64 {
        word.get_bits(self.bits())
    }

    /// Returns `word` with the range replaced by `value`.
    ///
    /// Bits of `value` that do not fit in the range are dropped, bits of `word` outside of the
    /// range are preserved.
    #[inline]
    pub fn compose(self, word: u64, value: u64) -> u64 {
        let mut word = word;
        word.set_bits(self.bits(), value & self.value_mask());
        word
    }

    /// Returns true if the two ranges share at least one bit.
    #[inline]
    pub const fn overlaps(self, other: BitRange) -> bool {
        self.mask() & other.mask() != 0
    }

    /// Returns true if every bit of `other` is part of `self`.
    #[inline]
    pub const fn contains(self, other: BitRange) -> bool {
        self.mask() & other.mask() == other.mask()
    }
}

/// Extracts `width` bits of `word` starting at bit `offset`.
///
/// Panics if `offset + width` exceeds 64 bits.
#[inline]
pub fn extract(word: u64, offset: u32, width: u32) -> u64 {
    BitRange::new(offset, width).extract(word)
}

/// Replaces `width` bits of `word` starting at bit `offset` by `value`.
///
/// Panics if `offset + width` exceeds 64 bits.
#[inline]
pub fn compose(word: u64, offset: u32, width: u32, value: u64) -> u64 {
    BitRange::new(offset, width).compose(word, value)
}

// ————————————————————————————————— Records —————————————————————————————————— //

/// A named range of a record.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Field {
    pub name: &'static str,
    pub range: BitRange,
    /// Aliases cover other fields of the same record (e.g. a 3-bits permission field covering the
    /// read, write and execute bits). They are exempt from the non-overlap rule as long as they
    /// fully contain what they overlap.
    pub alias: bool,
}

/// A fixed width hardware record.
pub trait Record: Copy {
    /// Width of the underlying word.
    const BITS: u32;

    /// Layout of the record.
    const FIELDS: &'static [Field];

    /// Builds the record from a raw value, truncated to the word width.
    fn from_bits(raw: u64) -> Self;

    /// Returns the raw value, zero-extended to 64 bits.
    fn to_bits(self) -> u64;

    /// Looks up a field by name.
    fn field(name: &str) -> Option<&'static Field> {
        Self::FIELDS.iter().find(|field| field.name == name)
    }

    /// Reads a field by name.
    fn get(self, name: &str) -> Option<u64> {
        Self::field(name).map(|field| field.range.extract(self.to_bits()))
    }

    /// Writes a field by name, returns `None` if there is no such field.
    fn with(self, name: &str, value: u64) -> Option<Self> {
        Self::field(name).map(|field| Self::from_bits(field.range.compose(self.to_bits(), value)))
    }

    /// Mask of all the bits the record gives a meaning to.
    fn defined_mask() -> u64 {
        Self::FIELDS
            .iter()
            .fold(0, |mask, field| mask | field.range.mask())
    }

    /// Returns the bits that are set but not covered by any field (reserved or ignored bits).
    fn undefined_bits(self) -> u64 {
        self.to_bits() & !Self::defined_mask()
    }
}

/// Value types a record field can be read as.
pub trait FieldValue: Copy {
    /// Number of bits the type can hold.
    const BITS: u32;

    fn from_field(bits: u64) -> Self;
    fn into_field(self) -> u64;
}

impl FieldValue for bool {
    const BITS: u32 = 1;

    #[inline]
    fn from_field(bits: u64) -> Self {
        bits != 0
    }

    #[inline]
    fn into_field(self) -> u64 {
        self as u64
    }
}

macro_rules! field_value_impl {
    ($ty:ty) => {
        impl FieldValue for $ty {
            const BITS: u32 = <$ty>::BITS;

            #[inline]
            fn from_field(bits: u64) -> Self {
                bits as $ty
            }

            #[inline]
            fn into_field(self) -> u64 {
                self as u64
            }
        }
    };
}

field_value_impl!(u8);
field_value_impl!(u16);
field_value_impl!(u32);
field_value_impl!(u64);

// —————————————————————————————— Layout Checks ——————————————————————————————— //

/// A violation of the record layout rules.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum LayoutError {
    /// The field goes past the end of the word.
    OutOfBounds(&'static str),
    /// Two fields share bits without one being an alias of the other.
    Overlap(&'static str, &'static str),
    /// Two fields have the same name.
    Duplicate(&'static str),
}

impl fmt::Display for LayoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayoutError::OutOfBounds(name) => write!(f, "field `{}` exceeds the word", name),
            LayoutError::Overlap(a, b) => write!(f, "fields `{}` and `{}` overlap", a, b),
            LayoutError::Duplicate(name) => write!(f, "field `{}` is declared twice", name),
        }
    }
}

/// Checks that `fields` fit in a `bits` wide word and that no two of them overlap, unless one
/// is an alias containing the other.
pub fn check_layout(fields: &[Field], bits: u32) -> Result<(), LayoutError> {
    for (idx, field) in fields.iter().enumerate() {
        if !field.range.fits(bits) {
            return Err(LayoutError::OutOfBounds(field.name));
        }
        for other in &fields[idx + 1..] {
            if field.name == other.name {
                return Err(LayoutError::Duplicate(field.name));
            }
            if !field.range.overlaps(other.range) {
                continue;
            }
            let aliased = (field.alias && field.range.contains(other.range))
                || (other.alias && other.range.contains(field.range));
            if !aliased {
                return Err(LayoutError::Overlap(field.name, other.name));
            }
        }
    }
    Ok(())
}

// ————————————————————————————— Record Definition ———————————————————————————— //

/// Defines a hardware record.
///
/// ```
/// utils::bit_record! {
///     /// Exit qualification for I/O instructions.
///     pub struct IoAccess(u64) {
///         /// Size of access minus one.
///         size, with_size: u8 = 0, 3;
///         direction_in, with_direction_in: bool = 3, 1;
///         port, with_port: u16 = 16, 16;
///     }
/// }
///
/// let io = IoAccess::default().with_port(0x3f8).with_direction_in(true);
/// assert_eq!(io.raw(), 0x3f8_0008);
/// assert_eq!(io.port(), 0x3f8);
/// ```
///
/// A field prefixed with `[alias]` is allowed to cover other fields.
#[macro_export]
macro_rules! bit_record {
    (@alias) => { false };
    (@alias alias) => { true };
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident($word:ty) {
            $(
                $(#[$fmeta:meta])*
                $([$alias:ident])? $field:ident, $with:ident: $ty:ty = $offset:literal, $width:literal;
            )*
        }
    ) => {
        $(#[$meta])*
        #[repr(transparent)]
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
        $vis struct $name($word);

        $(
            const _: () = {
                assert!($offset + $width <= <$word>::BITS, "field exceeds the record word");
                assert!(
                    $width <= <$ty as $crate::bits::FieldValue>::BITS,
                    "field does not fit its value type"
                );
            };
        )*

        impl $name {
            /// Wraps a raw word.
            #[inline]
            pub const fn from_raw(raw: $word) -> Self {
                Self(raw)
            }

            /// Returns the raw word.
            #[inline]
            pub const fn raw(self) -> $word {
                self.0
            }

            $(
                $(#[$fmeta])*
                #[inline]
                pub fn $field(self) -> $ty {
                    <$ty as $crate::bits::FieldValue>::from_field($crate::bits::extract(
                        self.0 as u64,
                        $offset,
                        $width,
                    ))
                }

                #[inline]
                #[must_use]
                pub fn $with(self, value: $ty) -> Self {
                    let raw = $crate::bits::compose(
                        self.0 as u64,
                        $offset,
                        $width,
                        $crate::bits::FieldValue::into_field(value),
                    );
                    Self(raw as $word)
                }
            )*
        }

        impl $crate::bits::Record for $name {
            const BITS: u32 = <$word>::BITS;
            const FIELDS: &'static [$crate::bits::Field] = &[
                $(
                    $crate::bits::Field {
                        name: stringify!($field),
                        range: $crate::bits::BitRange::new($offset, $width),
                        alias: $crate::bit_record!(@alias $($alias)?),
                    },
                )*
            ];

            #[inline]
            fn from_bits(raw: u64) -> Self {
                Self(raw as $word)
            }

            #[inline]
            fn to_bits(self) -> u64 {
                self.0 as u64
            }
        }

        impl From<$word> for $name {
            fn from(raw: $word) -> Self {
                Self(raw)
            }
        }

        impl From<$name> for $word {
            fn from(record: $name) -> $word {
                record.0
            }
        }

        impl core::fmt::Debug for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.debug_struct(stringify!($name))
                    $(.field(stringify!($field), &self.$field()))*
                    .finish()
            }
        }
    };
}

/// Defines an enumeration stored in a record field.
///
/// The enumeration implements [`FieldValue`] so that it can be used as the type of a
/// [`bit_record!`](crate::bit_record) field. Encodings the manual leaves undefined are kept in a
/// catch-all variant declared with `_ => Variant`, which makes decoding total. When the variants
/// cover every value of the field the catch-all can be omitted.
///
/// The catch-all only round-trips undefined encodings: `Variant(v)` with `v` naming a defined
/// variant decodes back as that variant, and trips a debug assertion when encoded.
#[macro_export]
macro_rules! bit_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident: $bits:literal {
            $( $(#[$vmeta:meta])* $variant:ident = $value:literal, )*
            _ => $other:ident,
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
        $vis enum $name {
            $( $(#[$vmeta])* $variant, )*
            /// Encoding without a defined meaning.
            $other(u8),
        }

        impl $crate::bits::FieldValue for $name {
            const BITS: u32 = $bits;

            #[inline]
            fn from_field(bits: u64) -> Self {
                match bits as u8 {
                    $( $value => Self::$variant, )*
                    other => Self::$other(other),
                }
            }

            #[inline]
            fn into_field(self) -> u64 {
                match self {
                    $( Self::$variant => $value, )*
                    Self::$other(value) => {
                        debug_assert!(
                            Self::from_field(value as u64) == self,
                            "{} encodes a defined variant",
                            stringify!($other),
                        );
                        value as u64
                    }
                }
            }
        }
    };
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident: $bits:literal {
            $( $(#[$vmeta:meta])* $variant:ident = $value:literal, )*
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
        #[repr(u8)]
        $vis enum $name {
            $( $(#[$vmeta])* $variant = $value, )*
        }

        const _: () = {
            let count: u32 = [$($value),*].len() as u32;
            assert!(count == 1 << $bits, "enumeration does not cover its field");
        };

        impl $crate::bits::FieldValue for $name {
            const BITS: u32 = $bits;

            /// Panics if `bits` is wider than the field.
            #[inline]
            fn from_field(bits: u64) -> Self {
                match bits {
                    $( $value => Self::$variant, )*
                    _ => panic!("value does not fit in a {}-bits field", $bits),
                }
            }

            #[inline]
            fn into_field(self) -> u64 {
                self as u64
            }
        }
    };
}

// ————————————————————————————————— Tests —————————————————————————————————— //

#[cfg(test)]
mod test {
    use super::*;

    crate::bit_enum! {
        enum Mode: 2 {
            Off = 0,
            On = 1,
            _ => Other,
        }
    }

    crate::bit_record! {
        struct Sample(u32) {
            [alias] permissions, with_permissions: u8 = 0, 3;
            read, with_read: bool = 0, 1;
            write, with_write: bool = 1, 1;
            execute, with_execute: bool = 2, 1;
            kind, with_kind: u8 = 4, 4;
            tag, with_tag: u16 = 16, 16;
        }
    }

    #[test]
    fn extract_is_masked_and_unsigned() {
        let word = 0xffff_ffff_ffff_ffff;
        assert_eq!(extract(word, 60, 4), 0xf);
        assert_eq!(extract(word, 0, 64), u64::MAX);
        assert_eq!(extract(0x8000_0000_0000_0000, 63, 1), 1);
        assert_eq!(extract(0b1011_0000, 4, 3), 0b011);
    }

    #[test]
    fn compose_preserves_other_bits() {
        let word = 0xdead_beef_dead_beef;
        let composed = compose(word, 8, 8, 0x1ff);
        assert_eq!(composed, 0xdead_beef_dead_ffef);
        assert_eq!(compose(0, 0, 64, 0x1234), 0x1234);
        assert_eq!(compose(u64::MAX, 12, 36, 0), 0xfff0_0000_0000_0fff);
    }

    #[test]
    #[should_panic]
    fn range_past_the_word() {
        extract(0, 60, 5);
    }

    #[test]
    #[should_panic]
    fn empty_range() {
        compose(0, 3, 0, 1);
    }

    #[test]
    fn range_relations() {
        let perms = BitRange::new(0, 3);
        let write = BitRange::new(1, 1);
        let tag = BitRange::new(16, 16);
        assert!(perms.overlaps(write));
        assert!(perms.contains(write));
        assert!(!write.contains(perms));
        assert!(!perms.overlaps(tag));
        assert_eq!(tag.mask(), 0xffff_0000);
        assert!(tag.fits(32));
        assert!(!BitRange::new(30, 4).fits(32));
        assert_eq!(tag.bits(), 16..32);
    }

    #[test]
    fn record_accessors() {
        let sample = Sample::default()
            .with_read(true)
            .with_execute(true)
            .with_tag(0xbeef);
        assert_eq!(sample.raw(), 0xbeef_0005);
        assert_eq!(sample.permissions(), 0b101);
        assert!(!sample.write());
        assert_eq!(Sample::from_raw(0x70).kind(), 7);

        // Values wider than the field are truncated.
        assert_eq!(Sample::default().with_kind(0x1f).raw(), 0xf0);
    }

    #[test]
    fn record_by_name() {
        let sample = Sample::from_raw(0);
        let sample = sample.with("tag", 0x42).unwrap();
        assert_eq!(sample.get("tag"), Some(0x42));
        assert_eq!(sample.get("missing"), None);
        assert!(sample.with("missing", 1).is_none());
        assert_eq!(Sample::defined_mask(), 0xffff_00f7);
        assert_eq!(Sample::from_raw(0x0000_0108).undefined_bits(), 0x0000_0108);
    }

    #[test]
    fn layout_laws() {
        assert_eq!(check_layout(Sample::FIELDS, Sample::BITS), Ok(()));

        let overlapping = [
            Field { name: "a", range: BitRange::new(0, 4), alias: false },
            Field { name: "b", range: BitRange::new(3, 2), alias: false },
        ];
        assert_eq!(check_layout(&overlapping, 32), Err(LayoutError::Overlap("a", "b")));

        let partial_alias = [
            Field { name: "a", range: BitRange::new(0, 4), alias: true },
            Field { name: "b", range: BitRange::new(3, 2), alias: false },
        ];
        assert_eq!(check_layout(&partial_alias, 32), Err(LayoutError::Overlap("a", "b")));

        let too_wide = [Field { name: "a", range: BitRange::new(30, 4), alias: false }];
        assert_eq!(check_layout(&too_wide, 32), Err(LayoutError::OutOfBounds("a")));
    }

    #[test]
    fn debug_lists_fields() {
        let sample = Sample::default().with_write(true);
        assert_eq!(
            format!("{:?}", sample),
            "Sample { permissions: 2, read: false, write: true, execute: false, kind: 0, tag: 0 }"
        );
    }

    #[test]
    fn catch_all_keeps_undefined_encodings() {
        assert_eq!(Mode::from_field(0), Mode::Off);
        assert_eq!(Mode::from_field(1), Mode::On);
        assert_eq!(Mode::from_field(3), Mode::Other(3));
        assert_eq!(Mode::Other(2).into_field(), 2);
    }

    #[test]
    #[should_panic]
    fn catch_all_rejects_defined_encodings() {
        Mode::Other(1).into_field();
    }
}
