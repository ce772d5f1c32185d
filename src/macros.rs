//! # Internal Macros
//!
//! This module provides internal macros for reducing boilerplate in pagekv.
//!
//! ## zerocopy_accessors!
//!
//! Generates getter and setter methods for zerocopy struct fields that use
//! little-endian wrapper types (U32).
//!
//! ### Usage
//!
//! ```ignore
//! use zerocopy::little_endian::U32;
//!
//! #[repr(C)]
//! struct Header {
//!     sequence: U32,
//! }
//!
//! impl Header {
//!     zerocopy_accessors! {
//!         sequence: u32,
//!     }
//! }
//!
//! // Generates:
//! // pub fn sequence(&self) -> u32 { self.sequence.get() }
//! // pub fn set_sequence(&mut self, val: u32) { self.sequence = U32::new(val); }
//! ```

/// Generates getter and setter methods for zerocopy little-endian fields.
#[macro_export]
macro_rules! zerocopy_accessors {
    (@impl $field:ident, u32) => {
        ::paste::paste! {
            #[inline]
            pub fn $field(&self) -> u32 {
                self.$field.get()
            }

            #[inline]
            pub fn [<set_ $field>](&mut self, val: u32) {
                self.$field = ::zerocopy::little_endian::U32::new(val);
            }
        }
    };
    ($($field:ident : $ty:tt),* $(,)?) => {
        $(
            $crate::zerocopy_accessors!(@impl $field, $ty);
        )*
    };
}
