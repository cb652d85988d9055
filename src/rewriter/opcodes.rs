//! Static per-opcode metadata for the CIL instruction set.
//!
//! Each defined opcode maps to its mnemonic, operand size class and stack-push
//! delta. Two-byte opcodes (lead byte [`PREFIX1`]) live at `0x100 | second_byte`;
//! the reserved lead bytes `0xF8..=0xFD` and `0xFF` have no entries, so decoding
//! them fails as malformed input. [`SWITCH_ARG`] is a synthetic code used only
//! inside the instruction graph to hold one switch case target each; it never
//! appears in an encoded stream as an opcode of its own.

/// Lead byte of the two-byte opcode family (`0xFE`).
pub const PREFIX1: u8 = 0xFE;

/// Synthetic opcode holding a single switch case target inside the graph.
pub const SWITCH_ARG: u16 = 0x200;

/// Operand size class of an opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    /// No operand bytes.
    None,
    /// One inline byte (short variable index or small constant).
    Imm8,
    /// Two inline bytes (wide variable index).
    Imm16,
    /// Four inline bytes (constant, token, or `r4` bit pattern).
    Imm32,
    /// Eight inline bytes (`i8` constant or `r8` bit pattern).
    Imm64,
    /// One-byte signed relative branch displacement.
    BranchShort,
    /// Four-byte signed relative branch displacement.
    BranchLong,
    /// Four-byte case count followed by that many four-byte displacements.
    Switch,
}

impl OperandKind {
    /// Inline operand size in bytes (for [`OperandKind::Switch`], the count field only).
    #[must_use]
    pub fn size(self) -> usize {
        match self {
            OperandKind::None => 0,
            OperandKind::Imm8 | OperandKind::BranchShort => 1,
            OperandKind::Imm16 => 2,
            OperandKind::Imm32 | OperandKind::BranchLong | OperandKind::Switch => 4,
            OperandKind::Imm64 => 8,
        }
    }

    /// Returns `true` for the two relative branch forms.
    #[must_use]
    pub fn is_branch(self) -> bool {
        matches!(self, OperandKind::BranchShort | OperandKind::BranchLong)
    }
}

/// Static metadata of one opcode.
#[derive(Debug, PartialEq, Eq)]
pub struct OpCode {
    /// Assembly mnemonic.
    pub mnemonic: &'static str,
    /// Operand size class.
    pub operand: OperandKind,
    /// Values the instruction pushes onto the evaluation stack.
    pub pushes: u8,
}

/// Opcode constants the rewriter emits or special-cases.
#[allow(missing_docs)]
pub mod code {
    pub const NOP: u16 = 0x00;
    pub const LDARG_0: u16 = 0x02;
    pub const LDNULL: u16 = 0x14;
    pub const LDC_I4: u16 = 0x20;
    pub const LDC_I8: u16 = 0x21;
    pub const CALL: u16 = 0x28;
    pub const RET: u16 = 0x2A;
    pub const BR_S: u16 = 0x2B;
    pub const BLT_UN_S: u16 = 0x37;
    pub const BR: u16 = 0x38;
    pub const BLT_UN: u16 = 0x44;
    pub const SWITCH: u16 = 0x45;
    pub const BOX: u16 = 0x8C;
    pub const NEWARR: u16 = 0x8D;
    pub const STELEM_REF: u16 = 0xA2;
    pub const LEAVE: u16 = 0xDD;
    pub const LEAVE_S: u16 = 0xDE;
    pub const LDARG: u16 = 0x109;
    pub const LDLOC: u16 = 0x10C;
    pub const STLOC: u16 = 0x10E;
}

macro_rules! opcode_table {
    ($( $opcode:literal => $mnemonic:literal, $kind:ident, $pushes:literal; )*) => {
        /// Look up the static metadata for an opcode.
        ///
        /// Returns `None` for encodings the instruction set does not define, which
        /// importers must treat as malformed input.
        #[must_use]
        pub fn lookup(opcode: u16) -> Option<&'static OpCode> {
            match opcode {
                $(
                    $opcode => Some(&OpCode {
                        mnemonic: $mnemonic,
                        operand: OperandKind::$kind,
                        pushes: $pushes,
                    }),
                )*
                SWITCH_ARG => Some(&OpCode {
                    mnemonic: "switch.arg",
                    operand: OperandKind::BranchLong,
                    pushes: 0,
                }),
                _ => None,
            }
        }
    };
}

opcode_table! {
    0x00 => "nop", None, 0;
    0x01 => "break", None, 0;
    0x02 => "ldarg.0", None, 1;
    0x03 => "ldarg.1", None, 1;
    0x04 => "ldarg.2", None, 1;
    0x05 => "ldarg.3", None, 1;
    0x06 => "ldloc.0", None, 1;
    0x07 => "ldloc.1", None, 1;
    0x08 => "ldloc.2", None, 1;
    0x09 => "ldloc.3", None, 1;
    0x0A => "stloc.0", None, 0;
    0x0B => "stloc.1", None, 0;
    0x0C => "stloc.2", None, 0;
    0x0D => "stloc.3", None, 0;
    0x0E => "ldarg.s", Imm8, 1;
    0x0F => "ldarga.s", Imm8, 1;
    0x10 => "starg.s", Imm8, 0;
    0x11 => "ldloc.s", Imm8, 1;
    0x12 => "ldloca.s", Imm8, 1;
    0x13 => "stloc.s", Imm8, 0;
    0x14 => "ldnull", None, 1;
    0x15 => "ldc.i4.m1", None, 1;
    0x16 => "ldc.i4.0", None, 1;
    0x17 => "ldc.i4.1", None, 1;
    0x18 => "ldc.i4.2", None, 1;
    0x19 => "ldc.i4.3", None, 1;
    0x1A => "ldc.i4.4", None, 1;
    0x1B => "ldc.i4.5", None, 1;
    0x1C => "ldc.i4.6", None, 1;
    0x1D => "ldc.i4.7", None, 1;
    0x1E => "ldc.i4.8", None, 1;
    0x1F => "ldc.i4.s", Imm8, 1;
    0x20 => "ldc.i4", Imm32, 1;
    0x21 => "ldc.i8", Imm64, 1;
    0x22 => "ldc.r4", Imm32, 1;
    0x23 => "ldc.r8", Imm64, 1;
    0x25 => "dup", None, 2;
    0x26 => "pop", None, 0;
    0x27 => "jmp", Imm32, 0;
    0x28 => "call", Imm32, 1;
    0x29 => "calli", Imm32, 1;
    0x2A => "ret", None, 0;
    0x2B => "br.s", BranchShort, 0;
    0x2C => "brfalse.s", BranchShort, 0;
    0x2D => "brtrue.s", BranchShort, 0;
    0x2E => "beq.s", BranchShort, 0;
    0x2F => "bge.s", BranchShort, 0;
    0x30 => "bgt.s", BranchShort, 0;
    0x31 => "ble.s", BranchShort, 0;
    0x32 => "blt.s", BranchShort, 0;
    0x33 => "bne.un.s", BranchShort, 0;
    0x34 => "bge.un.s", BranchShort, 0;
    0x35 => "bgt.un.s", BranchShort, 0;
    0x36 => "ble.un.s", BranchShort, 0;
    0x37 => "blt.un.s", BranchShort, 0;
    0x38 => "br", BranchLong, 0;
    0x39 => "brfalse", BranchLong, 0;
    0x3A => "brtrue", BranchLong, 0;
    0x3B => "beq", BranchLong, 0;
    0x3C => "bge", BranchLong, 0;
    0x3D => "bgt", BranchLong, 0;
    0x3E => "ble", BranchLong, 0;
    0x3F => "blt", BranchLong, 0;
    0x40 => "bne.un", BranchLong, 0;
    0x41 => "bge.un", BranchLong, 0;
    0x42 => "bgt.un", BranchLong, 0;
    0x43 => "ble.un", BranchLong, 0;
    0x44 => "blt.un", BranchLong, 0;
    0x45 => "switch", Switch, 0;
    0x46 => "ldind.i1", None, 1;
    0x47 => "ldind.u1", None, 1;
    0x48 => "ldind.i2", None, 1;
    0x49 => "ldind.u2", None, 1;
    0x4A => "ldind.i4", None, 1;
    0x4B => "ldind.u4", None, 1;
    0x4C => "ldind.i8", None, 1;
    0x4D => "ldind.i", None, 1;
    0x4E => "ldind.r4", None, 1;
    0x4F => "ldind.r8", None, 1;
    0x50 => "ldind.ref", None, 1;
    0x51 => "stind.ref", None, 0;
    0x52 => "stind.i1", None, 0;
    0x53 => "stind.i2", None, 0;
    0x54 => "stind.i4", None, 0;
    0x55 => "stind.i8", None, 0;
    0x56 => "stind.r4", None, 0;
    0x57 => "stind.r8", None, 0;
    0x58 => "add", None, 1;
    0x59 => "sub", None, 1;
    0x5A => "mul", None, 1;
    0x5B => "div", None, 1;
    0x5C => "div.un", None, 1;
    0x5D => "rem", None, 1;
    0x5E => "rem.un", None, 1;
    0x5F => "and", None, 1;
    0x60 => "or", None, 1;
    0x61 => "xor", None, 1;
    0x62 => "shl", None, 1;
    0x63 => "shr", None, 1;
    0x64 => "shr.un", None, 1;
    0x65 => "neg", None, 1;
    0x66 => "not", None, 1;
    0x67 => "conv.i1", None, 1;
    0x68 => "conv.i2", None, 1;
    0x69 => "conv.i4", None, 1;
    0x6A => "conv.i8", None, 1;
    0x6B => "conv.r4", None, 1;
    0x6C => "conv.r8", None, 1;
    0x6D => "conv.u4", None, 1;
    0x6E => "conv.u8", None, 1;
    0x6F => "callvirt", Imm32, 1;
    0x70 => "cpobj", Imm32, 0;
    0x71 => "ldobj", Imm32, 1;
    0x72 => "ldstr", Imm32, 1;
    0x73 => "newobj", Imm32, 1;
    0x74 => "castclass", Imm32, 1;
    0x75 => "isinst", Imm32, 1;
    0x76 => "conv.r.un", None, 1;
    0x79 => "unbox", Imm32, 1;
    0x7A => "throw", None, 0;
    0x7B => "ldfld", Imm32, 1;
    0x7C => "ldflda", Imm32, 1;
    0x7D => "stfld", Imm32, 0;
    0x7E => "ldsfld", Imm32, 1;
    0x7F => "ldsflda", Imm32, 1;
    0x80 => "stsfld", Imm32, 0;
    0x81 => "stobj", Imm32, 0;
    0x82 => "conv.ovf.i1.un", None, 1;
    0x83 => "conv.ovf.i2.un", None, 1;
    0x84 => "conv.ovf.i4.un", None, 1;
    0x85 => "conv.ovf.i8.un", None, 1;
    0x86 => "conv.ovf.u1.un", None, 1;
    0x87 => "conv.ovf.u2.un", None, 1;
    0x88 => "conv.ovf.u4.un", None, 1;
    0x89 => "conv.ovf.u8.un", None, 1;
    0x8A => "conv.ovf.i.un", None, 1;
    0x8B => "conv.ovf.u.un", None, 1;
    0x8C => "box", Imm32, 1;
    0x8D => "newarr", Imm32, 1;
    0x8E => "ldlen", None, 1;
    0x8F => "ldelema", Imm32, 1;
    0x90 => "ldelem.i1", None, 1;
    0x91 => "ldelem.u1", None, 1;
    0x92 => "ldelem.i2", None, 1;
    0x93 => "ldelem.u2", None, 1;
    0x94 => "ldelem.i4", None, 1;
    0x95 => "ldelem.u4", None, 1;
    0x96 => "ldelem.i8", None, 1;
    0x97 => "ldelem.i", None, 1;
    0x98 => "ldelem.r4", None, 1;
    0x99 => "ldelem.r8", None, 1;
    0x9A => "ldelem.ref", None, 1;
    0x9B => "stelem.i", None, 0;
    0x9C => "stelem.i1", None, 0;
    0x9D => "stelem.i2", None, 0;
    0x9E => "stelem.i4", None, 0;
    0x9F => "stelem.i8", None, 0;
    0xA0 => "stelem.r4", None, 0;
    0xA1 => "stelem.r8", None, 0;
    0xA2 => "stelem.ref", None, 0;
    0xA3 => "ldelem", Imm32, 1;
    0xA4 => "stelem", Imm32, 0;
    0xA5 => "unbox.any", Imm32, 1;
    0xB3 => "conv.ovf.i1", None, 1;
    0xB4 => "conv.ovf.u1", None, 1;
    0xB5 => "conv.ovf.i2", None, 1;
    0xB6 => "conv.ovf.u2", None, 1;
    0xB7 => "conv.ovf.i4", None, 1;
    0xB8 => "conv.ovf.u4", None, 1;
    0xB9 => "conv.ovf.i8", None, 1;
    0xBA => "conv.ovf.u8", None, 1;
    0xC2 => "refanyval", Imm32, 1;
    0xC3 => "ckfinite", None, 1;
    0xC6 => "mkrefany", Imm32, 1;
    0xD0 => "ldtoken", Imm32, 1;
    0xD1 => "conv.u2", None, 1;
    0xD2 => "conv.u1", None, 1;
    0xD3 => "conv.i", None, 1;
    0xD4 => "conv.ovf.i", None, 1;
    0xD5 => "conv.ovf.u", None, 1;
    0xD6 => "add.ovf", None, 1;
    0xD7 => "add.ovf.un", None, 1;
    0xD8 => "mul.ovf", None, 1;
    0xD9 => "mul.ovf.un", None, 1;
    0xDA => "sub.ovf", None, 1;
    0xDB => "sub.ovf.un", None, 1;
    0xDC => "endfinally", None, 0;
    0xDD => "leave", BranchLong, 0;
    0xDE => "leave.s", BranchShort, 0;
    0xDF => "stind.i", None, 0;
    0xE0 => "conv.u", None, 1;
    0x100 => "arglist", None, 1;
    0x101 => "ceq", None, 1;
    0x102 => "cgt", None, 1;
    0x103 => "cgt.un", None, 1;
    0x104 => "clt", None, 1;
    0x105 => "clt.un", None, 1;
    0x106 => "ldftn", Imm32, 1;
    0x107 => "ldvirtftn", Imm32, 1;
    0x109 => "ldarg", Imm16, 1;
    0x10A => "ldarga", Imm16, 1;
    0x10B => "starg", Imm16, 0;
    0x10C => "ldloc", Imm16, 1;
    0x10D => "ldloca", Imm16, 1;
    0x10E => "stloc", Imm16, 0;
    0x10F => "localloc", None, 1;
    0x111 => "endfilter", None, 0;
    0x112 => "unaligned.", Imm8, 0;
    0x113 => "volatile.", None, 0;
    0x114 => "tail.", None, 0;
    0x115 => "initobj", Imm32, 0;
    0x116 => "constrained.", Imm32, 0;
    0x117 => "cpblk", None, 0;
    0x118 => "initblk", None, 0;
    0x119 => "no.", Imm8, 0;
    0x11A => "rethrow", None, 0;
    0x11C => "sizeof", Imm32, 1;
    0x11D => "refanytype", None, 1;
    0x11E => "readonly.", None, 0;
}

/// Map a short-form branch opcode to its four-byte counterpart.
///
/// Returns `None` for anything that is not a short branch.
#[must_use]
pub fn widen_branch(opcode: u16) -> Option<u16> {
    match opcode {
        code::LEAVE_S => Some(code::LEAVE),
        code::BR_S..=code::BLT_UN_S => Some(opcode - code::BR_S + code::BR),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_known_opcodes() {
        let ret = lookup(code::RET).unwrap();
        assert_eq!(ret.mnemonic, "ret");
        assert_eq!(ret.operand, OperandKind::None);

        let ldc = lookup(code::LDC_I4).unwrap();
        assert_eq!(ldc.operand, OperandKind::Imm32);
        assert_eq!(ldc.pushes, 1);

        let stloc = lookup(code::STLOC).unwrap();
        assert_eq!(stloc.mnemonic, "stloc");
        assert_eq!(stloc.operand, OperandKind::Imm16);
    }

    #[test]
    fn lookup_rejects_undefined() {
        assert!(lookup(0x24).is_none());
        assert!(lookup(0xF8).is_none());
        assert!(lookup(0x108).is_none());
        assert!(lookup(0x1FF).is_none());
    }

    #[test]
    fn switch_arg_is_internal_only() {
        let arg = lookup(SWITCH_ARG).unwrap();
        assert_eq!(arg.operand, OperandKind::BranchLong);
    }

    #[test]
    fn operand_sizes() {
        assert_eq!(OperandKind::None.size(), 0);
        assert_eq!(OperandKind::BranchShort.size(), 1);
        assert_eq!(OperandKind::Imm16.size(), 2);
        assert_eq!(OperandKind::BranchLong.size(), 4);
        assert_eq!(OperandKind::Imm64.size(), 8);
        assert!(OperandKind::BranchShort.is_branch());
        assert!(!OperandKind::Switch.is_branch());
    }

    #[test]
    fn widening_map() {
        assert_eq!(widen_branch(code::BR_S), Some(code::BR));
        assert_eq!(widen_branch(0x2C), Some(0x39)); // brfalse.s -> brfalse
        assert_eq!(widen_branch(code::BLT_UN_S), Some(code::BLT_UN));
        assert_eq!(widen_branch(code::LEAVE_S), Some(code::LEAVE));
        assert_eq!(widen_branch(code::BR), None);
        assert_eq!(widen_branch(code::RET), None);
    }
}
