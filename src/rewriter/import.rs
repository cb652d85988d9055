//! Decoding of a raw instruction stream into the instruction graph.
//!
//! The importer walks the code buffer once, creating one node per instruction (plus
//! one synthetic node per switch case), and records every instruction boundary in an
//! offset lookup table. Branch and switch operands are staged as absolute target
//! offsets during the walk - forward branches reference instructions that do not
//! exist yet - and a second pass resolves each of them to a direct node reference.
//! After import, no raw displacement survives in the graph.

use crate::{
    io::parser::Parser,
    rewriter::{
        graph::{InstrGraph, InstrId, Operand, SENTINEL},
        opcodes::{self, OperandKind, PREFIX1, SWITCH_ARG},
    },
    Result,
};

/// Ceiling on the code size the importer will process.
pub const MAX_CODE_BYTES: usize = 0x00FF_FFFF;

/// Sparse map from byte offset to the instruction node starting there.
///
/// Covers every offset in `[0, n]` for a code buffer of length `n`; offsets inside
/// an instruction map to nothing, and offset `n` maps to the sentinel so "branch to
/// end" and "insert at end" resolve cleanly.
pub struct OffsetTable {
    slots: Vec<Option<InstrId>>,
}

impl OffsetTable {
    fn new(code_size: usize) -> Self {
        let mut slots = vec![None; code_size + 1];
        slots[code_size] = Some(SENTINEL);
        OffsetTable { slots }
    }

    /// Resolve an offset to the node starting there.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the offset is out of range or does not
    /// fall on an instruction boundary.
    pub fn get(&self, offset: usize) -> Result<InstrId> {
        match self.slots.get(offset) {
            Some(Some(id)) => Ok(*id),
            _ => Err(malformed_error!(
                "Offset {} is not an instruction boundary",
                offset
            )),
        }
    }
}

/// Decode `code` into an instruction graph plus its offset lookup table.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] for undefined opcodes (including every
/// multi-byte lead byte other than `0xFE`), truncated operands, and branch or
/// switch targets that do not resolve to an instruction boundary.
pub fn import_il(code: &[u8]) -> Result<(InstrGraph, OffsetTable)> {
    if code.len() > MAX_CODE_BYTES {
        return Err(crate::Error::UnsupportedShape(format!(
            "code of {} bytes exceeds the {} byte ceiling",
            code.len(),
            MAX_CODE_BYTES
        )));
    }

    let mut graph = InstrGraph::new();
    let mut table = OffsetTable::new(code.len());
    let mut parser = Parser::new(code);
    let mut seen_branch = false;

    while parser.has_more_data() {
        let start_offset = parser.pos();

        let first_byte = parser.read_le::<u8>()?;
        let opcode = if first_byte == PREFIX1 {
            if !parser.has_more_data() {
                return Err(malformed_error!(
                    "Truncated two-byte opcode at offset {}",
                    start_offset
                ));
            }
            0x100 | u16::from(parser.read_le::<u8>()?)
        } else {
            u16::from(first_byte)
        };

        let Some(op) = opcodes::lookup(opcode) else {
            return Err(malformed_error!(
                "Invalid opcode {:#05x} at offset {}",
                opcode,
                start_offset
            ));
        };

        if parser.remaining() < op.operand.size() {
            return Err(malformed_error!(
                "Truncated operand for '{}' at offset {}",
                op.mnemonic,
                start_offset
            ));
        }

        let operand = match op.operand {
            OperandKind::None => Operand::None,
            OperandKind::Imm8 => Operand::Imm8(parser.read_le::<i8>()?),
            OperandKind::Imm16 => Operand::Imm16(parser.read_le::<i16>()?),
            OperandKind::Imm32 => Operand::Imm32(parser.read_le::<i32>()?),
            OperandKind::Imm64 => Operand::Imm64(parser.read_le::<i64>()?),
            OperandKind::BranchShort => {
                let displacement = i64::from(parser.read_le::<i8>()?);
                seen_branch = true;
                Operand::Imm32(stage_target(parser.pos(), displacement, code.len())?)
            }
            OperandKind::BranchLong => {
                let displacement = i64::from(parser.read_le::<i32>()?);
                seen_branch = true;
                Operand::Imm32(stage_target(parser.pos(), displacement, code.len())?)
            }
            OperandKind::Switch => {
                let case_count = parser.read_le::<u32>()?;
                let table_bytes = (case_count as usize)
                    .checked_mul(4)
                    .ok_or(crate::Error::OutOfBounds)?;
                if parser.remaining() < table_bytes {
                    return Err(malformed_error!(
                        "Truncated switch table ({} cases) at offset {}",
                        case_count,
                        start_offset
                    ));
                }
                seen_branch = true;

                // Case displacements are relative to the end of the full table
                let base = parser.pos() + table_bytes;
                let switch_id =
                    graph.append_imported(opcode, Operand::SwitchCount(case_count));
                table.slots[start_offset] = Some(switch_id);

                for _ in 0..case_count {
                    let displacement = i64::from(parser.read_le::<i32>()?);
                    let staged = stage_target(base, displacement, code.len())?;
                    graph.append_imported(SWITCH_ARG, Operand::Imm32(staged));
                }
                continue;
            }
        };

        let id = graph.append_imported(opcode, operand);
        table.slots[start_offset] = Some(id);
    }

    if seen_branch {
        resolve_targets(&mut graph, &table)?;
    }

    Ok((graph, table))
}

/// Compute and range-check the absolute target offset of one branch.
fn stage_target(next_offset: usize, displacement: i64, code_size: usize) -> Result<i32> {
    let target = next_offset as i64 + displacement;
    if target < 0 || target > code_size as i64 {
        return Err(malformed_error!(
            "Branch target {} outside code of {} bytes",
            target,
            code_size
        ));
    }

    // MAX_CODE_BYTES keeps this lossless
    Ok(target as i32)
}

/// Convert every staged absolute target offset into a direct node reference.
fn resolve_targets(graph: &mut InstrGraph, table: &OffsetTable) -> Result<()> {
    let ids: Vec<InstrId> = graph.iter().collect();
    for id in ids {
        let instr = graph.instr(id);
        let is_target_carrier = instr.opcode == SWITCH_ARG
            || opcodes::lookup(instr.opcode).is_some_and(|op| op.operand.is_branch());
        if !is_target_carrier {
            continue;
        }

        let Operand::Imm32(target_offset) = instr.operand else {
            return Err(malformed_error!(
                "Branch node without staged target at opcode {:#05x}",
                instr.opcode
            ));
        };

        let target = table.get(target_offset as usize)?;
        graph.instr_mut(id).operand = Operand::Target(target);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rewriter::opcodes::code;

    #[test]
    fn linear_code() {
        let code = [0x00, 0x2A]; // nop, ret
        let (graph, table) = import_il(&code).unwrap();

        assert_eq!(graph.len(), 2);
        let nop = table.get(0).unwrap();
        let ret = table.get(1).unwrap();
        assert_eq!(graph.instr(nop).opcode, code::NOP);
        assert_eq!(graph.instr(ret).opcode, code::RET);
        assert_eq!(table.get(2).unwrap(), SENTINEL);
    }

    #[test]
    fn forward_branch_resolves_to_node() {
        // brfalse.s +1 (over the first ret), ret, ret
        let code = [0x2C, 0x01, 0x2A, 0x2A];
        let (graph, table) = import_il(&code).unwrap();

        let branch = table.get(0).unwrap();
        let target = table.get(3).unwrap();
        assert_eq!(graph.instr(branch).operand, Operand::Target(target));
    }

    #[test]
    fn backward_branch_resolves_to_node() {
        // nop, br.s -3 (back to the nop)
        let code = [0x00, 0x2B, 0xFD];
        let (graph, table) = import_il(&code).unwrap();

        let nop = table.get(0).unwrap();
        let branch = table.get(1).unwrap();
        assert_eq!(graph.instr(branch).operand, Operand::Target(nop));
    }

    #[test]
    fn branch_to_end_resolves_to_sentinel() {
        // br.s +0 lands at offset 2 == code size
        let code = [0x2B, 0x00];
        let (graph, table) = import_il(&code).unwrap();

        let branch = table.get(0).unwrap();
        assert_eq!(graph.instr(branch).operand, Operand::Target(SENTINEL));
    }

    #[test]
    fn switch_fans_out_case_nodes() {
        let code = [
            0x45, 0x02, 0x00, 0x00, 0x00, // switch, 2 cases
            0x00, 0x00, 0x00, 0x00, // case 0: +0 -> offset 13
            0x02, 0x00, 0x00, 0x00, // case 1: +2 -> offset 15
            0x2A, // ret           (offset 13)
            0x00, // nop           (offset 14)
            0x2A, // ret           (offset 15)
        ];
        let (graph, table) = import_il(&code).unwrap();

        // switch + 2 case nodes + ret + nop + ret
        assert_eq!(graph.len(), 6);

        let switch = table.get(0).unwrap();
        assert_eq!(graph.instr(switch).operand, Operand::SwitchCount(2));

        let case0 = graph.next(switch);
        let case1 = graph.next(case0);
        assert_eq!(graph.instr(case0).opcode, SWITCH_ARG);
        assert_eq!(
            graph.instr(case0).operand,
            Operand::Target(table.get(13).unwrap())
        );
        assert_eq!(
            graph.instr(case1).operand,
            Operand::Target(table.get(15).unwrap())
        );
    }

    #[test]
    fn rejects_undefined_opcode() {
        assert!(import_il(&[0x24]).is_err());
    }

    #[test]
    fn rejects_unsupported_lead_bytes() {
        for lead in [0xF8u8, 0xF9, 0xFA, 0xFB, 0xFC, 0xFD, 0xFF] {
            assert!(import_il(&[lead, 0x00]).is_err(), "lead byte {lead:#04x}");
        }
    }

    #[test]
    fn rejects_truncated_two_byte_opcode() {
        assert!(import_il(&[0xFE]).is_err());
        assert!(import_il(&[0xFE, 0xFF]).is_err());
    }

    #[test]
    fn rejects_truncated_operand() {
        // ldc.i4 with only two operand bytes
        assert!(import_il(&[0x20, 0x01, 0x02]).is_err());
        // switch claiming more cases than the buffer holds
        assert!(import_il(&[0x45, 0x10, 0x00, 0x00, 0x00]).is_err());
    }

    #[test]
    fn rejects_branch_into_operand_bytes() {
        // br.s +1 lands inside the ldc.i4 operand
        let code = [0x2B, 0x01, 0x20, 0x00, 0x00, 0x00, 0x00, 0x2A];
        assert!(import_il(&code).is_err());
    }

    #[test]
    fn rejects_branch_before_method_start() {
        let code = [0x2B, 0x80]; // br.s -128
        assert!(import_il(&code).is_err());
    }

    #[test]
    fn two_byte_opcodes_decode() {
        // ldarg 1 (FE 09 01 00), ret
        let code = [0xFE, 0x09, 0x01, 0x00, 0x2A];
        let (graph, table) = import_il(&code).unwrap();

        let ldarg = table.get(0).unwrap();
        assert_eq!(graph.instr(ldarg).opcode, code::LDARG);
        assert_eq!(graph.instr(ldarg).operand, Operand::Imm16(1));
        assert!(table.get(1).is_err());
        assert!(table.get(4).is_ok());
    }
}
