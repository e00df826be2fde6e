//! Memory Management Unit
//!
//! Software translation of guest-physical addresses through EPT hierarchies.

#![cfg_attr(not(test), no_std)]

pub mod ept;
pub mod walker;

pub use ept::{translate, EptError, EptMemory, Mapping, PageSize, Translation};
pub use walker::Level;
