//! Element-type constants for signature decoding and boxing decisions.

#[allow(non_snake_case, dead_code, missing_docs)]
/// Possible bytes that represent various 'Types' for a signature - from coreclr
pub mod ELEMENT_TYPE {
    //Marks end of a list
    pub const END: u8 = 0x00;
    pub const VOID: u8 = 0x01;
    pub const BOOLEAN: u8 = 0x02;
    pub const CHAR: u8 = 0x03;
    pub const I1: u8 = 0x04;
    pub const U1: u8 = 0x05;
    pub const I2: u8 = 0x06;
    pub const U2: u8 = 0x07;
    pub const I4: u8 = 0x08;
    pub const U4: u8 = 0x09;
    pub const I8: u8 = 0x0a;
    pub const U8: u8 = 0x0b;
    pub const R4: u8 = 0x0c;
    pub const R8: u8 = 0x0d;
    pub const STRING: u8 = 0x0e;
    pub const PTR: u8 = 0x0f;
    pub const BYREF: u8 = 0x10;
    pub const VALUETYPE: u8 = 0x11;
    pub const CLASS: u8 = 0x12;
    pub const VAR: u8 = 0x13;
    pub const ARRAY: u8 = 0x14;
    pub const GENERICINST: u8 = 0x15;
    pub const TYPEDBYREF: u8 = 0x16;
    pub const I: u8 = 0x18;
    pub const U: u8 = 0x19;
    pub const FNPTR: u8 = 0x1b;
    pub const OBJECT: u8 = 0x1c;
    pub const SZARRAY: u8 = 0x1d;
    pub const MVAR: u8 = 0x1e;
    pub const CMOD_REQD: u8 = 0x1f;
    pub const CMOD_OPT: u8 = 0x20;
    pub const INTERNAL: u8 = 0x21;
    pub const MODIFIER: u8 = 0x40;
    pub const SENTINEL: u8 = 0x41;
    pub const PINNED: u8 = 0x45;
}

/// Number of element-type slots the primitive boxing-reference table covers.
///
/// Sized so any element-type byte below [`ELEMENT_TYPE::MODIFIER`] indexes in range.
pub const ELEMENT_TYPE_SLOTS: usize = 0x40;

/// Returns `true` for the primitive value types that require boxing before being
/// stored into an object array (`BOOLEAN` through `R8`).
#[must_use]
pub fn is_primitive(element_type: u8) -> bool {
    (ELEMENT_TYPE::BOOLEAN..=ELEMENT_TYPE::R8).contains(&element_type)
}

/// Returns `true` for the generic type variables (`VAR` for class-level, `MVAR` for
/// method-level parameters).
#[must_use]
pub fn is_generic_var(element_type: u8) -> bool {
    element_type == ELEMENT_TYPE::VAR || element_type == ELEMENT_TYPE::MVAR
}
