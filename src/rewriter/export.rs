//! Re-serialization of the instruction graph into the binary method-body format.
//!
//! Layout runs as a bounded fixpoint: one pass assigns offsets and emits opcode and
//! operand bytes with branch displacements left as placeholders, a second walk
//! patches every displacement - and any short branch whose delta no longer fits a
//! signed byte is widened to its four-byte form, which dirties the layout and
//! restarts emission. Widening only ever grows offsets, so the pass count is
//! bounded by the number of branch instructions; exceeding the bound is an internal
//! invariant failure, not bad input.
//!
//! The stable code bytes are then packaged behind a tiny or fat header, with the
//! fat-form exception section appended when clauses exist.

use crate::{
    io::buffer::BodyBuffer,
    metadata::{
        method::{MethodBodyFlags, SectionFlags, TINY_MAX_STACK},
        token::Token,
    },
    rewriter::{
        eh::{EhClause, EhHandler},
        graph::{InstrGraph, InstrId, Operand, SENTINEL},
        opcodes::{self, code, OperandKind, PREFIX1, SWITCH_ARG},
    },
    Result,
};

/// Produce the final binary method body from the (possibly mutated) graph.
///
/// `init_locals` and `local_var_sig_token` come from the imported header (the
/// token may have been replaced after extending the locals signature); the
/// max-stack value is the graph's running estimate. `prefer_tiny` keeps a body
/// that was imported with a fat header in fat form even when the compact form
/// would be legal, so an unmutated body round-trips bit-exactly.
///
/// # Errors
/// Returns [`crate::Error::LayoutDiverged`] if branch widening fails to converge
/// (broken internal invariant), [`crate::Error::Malformed`] for operand/width
/// mismatches in the graph, and [`crate::Error::UnsupportedShape`] when a header
/// field ceiling is exceeded.
pub fn export_method_body(
    graph: &mut InstrGraph,
    clauses: &[EhClause],
    prefer_tiny: bool,
    init_locals: bool,
    local_var_sig_token: Token,
) -> Result<Vec<u8>> {
    let code_bytes = layout_code(graph)?;
    assemble_body(
        graph,
        &code_bytes,
        clauses,
        prefer_tiny,
        init_locals,
        local_var_sig_token,
    )
}

/// Run the emission/patch fixpoint until no branch widens, returning the code bytes.
fn layout_code(graph: &mut InstrGraph) -> Result<Vec<u8>> {
    let ids: Vec<InstrId> = graph.iter().collect();
    let pass_cap = graph.branch_count() + 1;
    let mut code = BodyBuffer::new();

    for _ in 0..pass_cap {
        emit_pass(graph, &ids, &mut code)?;
        if !patch_pass(graph, &ids, &mut code)? {
            return Ok(code.into_vec());
        }
    }

    Err(crate::Error::LayoutDiverged(pass_cap))
}

/// Assign offsets and emit opcode plus operand bytes, branch operands as placeholders.
fn emit_pass(graph: &mut InstrGraph, ids: &[InstrId], code: &mut BodyBuffer) -> Result<()> {
    code.clear();

    for &id in ids {
        let opcode = graph.instr(id).opcode;

        if opcode == SWITCH_ARG {
            // Case nodes carry no opcode bytes; the offset marks their operand slot
            graph.instr_mut(id).offset = code.len() as u32;
            code.write_le(0u32);
            continue;
        }

        graph.instr_mut(id).offset = code.len() as u32;
        if opcode >= 0x100 {
            code.write_le(PREFIX1);
        }
        code.write_le((opcode & 0xFF) as u8);

        let Some(op) = opcodes::lookup(opcode) else {
            return Err(malformed_error!("Graph holds undefined opcode {:#05x}", opcode));
        };

        let operand = graph.instr(id).operand;
        match (op.operand, operand) {
            (OperandKind::None, _) => {}
            (OperandKind::Imm8, Operand::Imm8(value)) => code.write_le(value),
            (OperandKind::Imm16, Operand::Imm16(value)) => code.write_le(value),
            (OperandKind::Imm32, Operand::Imm32(value)) => code.write_le(value),
            (OperandKind::Imm64, Operand::Imm64(value)) => code.write_le(value),
            (OperandKind::BranchShort, Operand::Target(_)) => code.write_le(0u8),
            (OperandKind::BranchLong, Operand::Target(_)) => code.write_le(0u32),
            (OperandKind::Switch, Operand::SwitchCount(count)) => code.write_le(count),
            (kind, operand) => {
                return Err(malformed_error!(
                    "Operand {:?} does not fit '{}' ({:?})",
                    operand,
                    op.mnemonic,
                    kind
                ));
            }
        }
    }

    // The sentinel's offset is the total code size; handler regions ending at the
    // end of the method rely on it
    graph.instr_mut(SENTINEL).offset = code.len() as u32;
    Ok(())
}

/// Patch every branch displacement; returns `true` if any instruction widened.
fn patch_pass(graph: &mut InstrGraph, ids: &[InstrId], code: &mut BodyBuffer) -> Result<bool> {
    let mut widened = false;
    let mut switch_base = 0u32;

    for &id in ids {
        let instr = graph.instr(id);
        let opcode = instr.opcode;

        if opcode == code::SWITCH {
            let Operand::SwitchCount(count) = instr.operand else {
                return Err(malformed_error!("Switch node without a case count"));
            };
            switch_base = instr.offset + 1 + 4 * (count + 1);
            continue;
        }

        if opcode == SWITCH_ARG {
            let Operand::Target(target) = instr.operand else {
                return Err(malformed_error!("Switch case without a resolved target"));
            };
            let delta = i64::from(graph.instr(target).offset) - i64::from(switch_base);
            let site = instr.offset as usize;
            code.patch_le(site, delta as i32)?;
            continue;
        }

        let Some(op) = opcodes::lookup(opcode) else {
            continue;
        };
        if !op.operand.is_branch() {
            continue;
        }

        let Operand::Target(target) = instr.operand else {
            return Err(malformed_error!(
                "Branch '{}' without a resolved target",
                op.mnemonic
            ));
        };

        let next = graph.next(id);
        let delta =
            i64::from(graph.instr(target).offset) - i64::from(graph.instr(next).offset);

        match op.operand {
            OperandKind::BranchShort => {
                if i8::try_from(delta).is_err() {
                    // Delta no longer fits the one-byte form; swap in the long
                    // opcode and re-lay-out
                    let Some(wide) = opcodes::widen_branch(opcode) else {
                        return Err(malformed_error!(
                            "Short branch {:#05x} has no long form",
                            opcode
                        ));
                    };
                    graph.instr_mut(id).opcode = wide;
                    widened = true;
                    continue;
                }
                let site = graph.instr(next).offset as usize - 1;
                code.patch_le(site, delta as i8)?;
            }
            OperandKind::BranchLong => {
                let site = graph.instr(next).offset as usize - 4;
                code.patch_le(site, delta as i32)?;
            }
            _ => unreachable!("is_branch covers exactly the two branch kinds"),
        }
    }

    Ok(widened)
}

/// Wrap stable code bytes into the tiny or fat method-body format.
fn assemble_body(
    graph: &InstrGraph,
    code_bytes: &[u8],
    clauses: &[EhClause],
    prefer_tiny: bool,
    init_locals: bool,
    local_var_sig_token: Token,
) -> Result<Vec<u8>> {
    let code_size = code_bytes.len();
    let mut body = BodyBuffer::with_capacity(12 + code_size + 4 + 24 * clauses.len() + 4);

    let use_tiny = prefer_tiny
        && code_size < 64
        && clauses.is_empty()
        && local_var_sig_token.is_nil()
        && graph.max_stack() <= TINY_MAX_STACK;

    if use_tiny {
        body.write_le(MethodBodyFlags::TINY_FORMAT.bits() as u8 | (code_size as u8) << 2);
        body.write_bytes(code_bytes);
        return Ok(body.into_vec());
    }

    let max_stack = u16::try_from(graph.max_stack()).map_err(|_| {
        crate::Error::UnsupportedShape(format!(
            "max-stack estimate {} exceeds the header field",
            graph.max_stack()
        ))
    })?;

    let mut flags = MethodBodyFlags::FAT_FORMAT;
    if init_locals {
        flags |= MethodBodyFlags::INIT_LOCALS;
    }
    if !clauses.is_empty() {
        flags |= MethodBodyFlags::MORE_SECTS;
    }

    // Fat header: flags + header size in words packed into the first u16
    body.write_le(flags.bits() | 3 << 12);
    body.write_le(max_stack);
    body.write_le(code_size as u32);
    body.write_le(local_var_sig_token.value());
    body.write_bytes(code_bytes);

    if !clauses.is_empty() {
        body.align4();

        let section_kind = SectionFlags::EHTABLE | SectionFlags::FAT_FORMAT;
        let data_size = 4 + 24 * clauses.len() as u32;
        body.write_le(u32::from(section_kind.bits()) | data_size << 8);

        for clause in clauses {
            let try_offset = graph.instr(clause.try_begin).offset;
            let try_length = graph.instr(clause.try_end).offset - try_offset;
            let handler_offset = graph.instr(clause.handler_begin).offset;
            // handler_end is inclusive; the exclusive extent is its successor's offset
            let handler_exclusive_end = graph.instr(graph.next(clause.handler_end)).offset;

            body.write_le(clause.flags.bits());
            body.write_le(try_offset);
            body.write_le(try_length);
            body.write_le(handler_offset);
            body.write_le(handler_exclusive_end - handler_offset);
            body.write_le(match clause.handler {
                EhHandler::Class(token) => token.value(),
                EhHandler::Filter(filter) => graph.instr(filter).offset,
            });
        }
    }

    Ok(body.into_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::method::{EhClauseFlags, MethodBody, RawEhClause};
    use crate::rewriter::{eh::import_eh, import::import_il};

    fn roundtrip(code: &[u8]) -> Vec<u8> {
        let (mut graph, _table) = import_il(code).unwrap();
        graph.set_max_stack(TINY_MAX_STACK);
        export_method_body(&mut graph, &[], true, false, Token::nil()).unwrap()
    }

    #[test]
    fn tiny_body_roundtrips() {
        let code = [0x00, 0x2A];
        let body = roundtrip(&code);
        assert_eq!(body, vec![0x0A, 0x00, 0x2A]);
    }

    #[test]
    fn short_branches_keep_their_form() {
        // nop, br.s -3, ret
        let code = [0x00, 0x2B, 0xFD, 0x2A];
        let body = roundtrip(&code);
        assert_eq!(&body[1..], &code);
    }

    #[test]
    fn long_branch_displacement_repatched() {
        // br +0 (to ret), ret
        let code = [0x38, 0x00, 0x00, 0x00, 0x00, 0x2A];
        let body = roundtrip(&code);
        assert_eq!(&body[1..], &code);
    }

    #[test]
    fn switch_table_roundtrips() {
        let code = [
            0x45, 0x02, 0x00, 0x00, 0x00, // switch, 2 cases
            0x00, 0x00, 0x00, 0x00, // case 0: +0
            0x02, 0x00, 0x00, 0x00, // case 1: +2
            0x2A, 0x00, 0x2A,
        ];
        let body = roundtrip(&code);
        assert_eq!(&body[1..], &code);
    }

    #[test]
    fn inserted_code_widens_overflowing_short_branch() {
        // ldc.i4.0, br.s -3: delta is exactly -3; padding nops pushed between the
        // branch and its target force the short form over the i8 range
        let mut graph = InstrGraph::new();
        let target = graph.append_imported(0x16, Operand::None); // ldc.i4.0
        let branch = graph.append_imported(code::BR_S, Operand::Target(target));
        graph.set_max_stack(TINY_MAX_STACK);

        for _ in 0..130 {
            graph.insert_op_before(branch, code::NOP);
        }

        let body = export_method_body(&mut graph, &[], true, false, Token::nil()).unwrap();
        let parsed = MethodBody::parse(&body).unwrap();
        let (exported, table) = import_il(parsed.code(&body).unwrap()).unwrap();

        // 1 + 130 + 5 branch bytes
        assert_eq!(parsed.size_code, 136);
        let widened = table.get(131).unwrap();
        assert_eq!(exported.instr(widened).opcode, code::BR);
        assert_eq!(
            exported.instr(widened).operand,
            Operand::Target(table.get(0).unwrap())
        );
    }

    #[test]
    fn exception_section_follows_aligned_code() {
        // try { nop; leave.s +3 } catch { nop; leave.s +0 } ret
        let code = [0x00, 0xDE, 0x03, 0x00, 0xDE, 0x00, 0x2A];
        let raw = RawEhClause {
            flags: EhClauseFlags::EXCEPTION,
            try_offset: 0,
            try_length: 3,
            handler_offset: 3,
            handler_length: 3,
            handler_data: 0x0200_0001,
        };

        let (mut graph, table) = import_il(&code).unwrap();
        let clauses = import_eh(&[raw], &graph, &table).unwrap();
        graph.set_max_stack(1);
        let body = export_method_body(&mut graph, &clauses, false, true, Token::nil()).unwrap();

        let parsed = MethodBody::parse(&body).unwrap();
        assert!(parsed.is_fat);
        assert!(parsed.is_init_local);
        assert_eq!(parsed.size_code, 7);
        assert_eq!(parsed.exception_clauses.len(), 1);

        let exported = &parsed.exception_clauses[0];
        assert_eq!(exported.try_offset, 0);
        assert_eq!(exported.try_length, 3);
        assert_eq!(exported.handler_offset, 3);
        assert_eq!(exported.handler_length, 3);
        assert_eq!(exported.handler_data, 0x0200_0001);
    }

    #[test]
    fn fat_header_fields() {
        let code = [0x00, 0x2A];
        let (mut graph, _) = import_il(&code).unwrap();
        graph.set_max_stack(2);
        let body =
            export_method_body(&mut graph, &[], false, true, Token::new(0x1100_0005)).unwrap();

        let parsed = MethodBody::parse(&body).unwrap();
        assert!(parsed.is_fat);
        assert_eq!(parsed.size_header, 12);
        assert_eq!(parsed.max_stack, 2);
        assert_eq!(parsed.local_var_sig_token.value(), 0x1100_0005);
        assert_eq!(parsed.code(&body).unwrap(), &code);
    }

    #[test]
    fn tiny_ineligible_when_code_too_large() {
        let mut code = vec![0x00u8; 64];
        code.push(0x2A);
        let body = roundtrip(&code);
        let parsed = MethodBody::parse(&body).unwrap();
        assert!(parsed.is_fat);
        assert_eq!(parsed.size_code, 65);
    }
}
