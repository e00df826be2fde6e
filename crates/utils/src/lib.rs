//! Utilities shared by the VMX crates
//!
//! Address newtypes and the bit-range machinery every hardware record is built upon.

#![cfg_attr(not(test), no_std)]

mod address;
pub mod bits;

pub use address::{GuestPhysAddr, GuestVirtAddr, HostPhysAddr, HostVirtAddr};
pub use bits::{BitRange, Field, FieldValue, LayoutError, Record};
