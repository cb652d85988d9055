//! Synthesis of the entry-probe call sequence.
//!
//! The probe takes exactly two arguments: the receiver (or null for static
//! methods) and an `object[]` of the boxed arguments (or null when the method has
//! none). Everything is built from the graph's insert primitives immediately
//! before the chosen instruction, in emission order, so the original code and all
//! clause boundaries shift back untouched.

use crate::{
    metadata::context::{MethodShape, ModuleTokens},
    rewriter::graph::{InstrGraph, InstrId},
    rewriter::opcodes::code,
    Result,
};

/// Insert the probe-call prefix before `anchor`.
///
/// `args_local_index` is the slot the argument array is staged in, as returned by
/// the locals-signature extension; it is only referenced when the method declares
/// arguments.
///
/// # Errors
/// Returns [`crate::Error::ResolutionFailed`] if the module context is missing a
/// boxing reference the sequence needs: the primitive reference for a value-type
/// argument, or a type-spec matching a generic argument's variable number. The
/// caller must abort instrumentation of this method only.
pub fn insert_enter_probe(
    graph: &mut InstrGraph,
    anchor: InstrId,
    shape: &MethodShape,
    tokens: &ModuleTokens,
    args_local_index: u32,
) -> Result<()> {
    if !tokens.is_valid() {
        return Err(crate::Error::ResolutionFailed(
            "module context lacks object-type or probe-method reference".to_string(),
        ));
    }

    // Receiver: `this` for instance methods, null for static ones
    if shape.is_static {
        graph.insert_op_before(anchor, code::LDNULL);
    } else {
        graph.insert_op_before(anchor, code::LDARG_0);
    }

    let arg_count = shape.arg_count();
    if arg_count == 0 {
        graph.insert_op_before(anchor, code::LDNULL);
    } else {
        let local_index = u16::try_from(args_local_index).map_err(|_| {
            crate::Error::UnsupportedShape(format!(
                "argument-array local index {args_local_index} exceeds the stloc range"
            ))
        })?;

        graph.insert_ldc_i4_before(anchor, arg_count as i32);
        graph.insert_newarr_before(anchor, tokens.object_type);
        graph.insert_stloc_before(anchor, local_index);

        for (index, arg) in shape.args.iter().enumerate() {
            // Argument 0 is `this` on instance methods
            let slot = if shape.is_static { index } else { index + 1 };

            graph.insert_ldloc_before(anchor, local_index);
            graph.insert_ldc_i4_before(anchor, index as i32);
            graph.insert_ldarg_before(anchor, slot as u16);

            if arg.needs_box() {
                let box_token = if arg.is_generic() {
                    tokens
                        .find_generic_spec(arg.element, arg.generic_number)
                        .ok_or_else(|| {
                            crate::Error::ResolutionFailed(format!(
                                "no type-spec for generic variable {} (element {:#04x})",
                                arg.generic_number, arg.element
                            ))
                        })?
                } else {
                    tokens.primitive(arg.element).ok_or_else(|| {
                        crate::Error::ResolutionFailed(format!(
                            "no boxing reference for primitive element {:#04x}",
                            arg.element
                        ))
                    })?
                };

                graph.insert_box_before(anchor, box_token);
            }

            graph.insert_op_before(anchor, code::STELEM_REF);
        }

        graph.insert_ldloc_before(anchor, local_index);
    }

    graph.insert_call_before(anchor, tokens.probe_method);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{
        context::{ArgType, TypeSpec},
        token::Token,
        typesystem::ELEMENT_TYPE,
    };
    use crate::rewriter::graph::Operand;

    fn module_tokens() -> ModuleTokens {
        let mut tokens = ModuleTokens::new(Token::new(0x0100_0001), Token::new(0x0A00_0001));
        tokens.primitives[usize::from(ELEMENT_TYPE::I4)] = Token::new(0x0100_0010);
        tokens.primitives[usize::from(ELEMENT_TYPE::BOOLEAN)] = Token::new(0x0100_0011);
        tokens
    }

    fn opcode_trace(graph: &InstrGraph) -> Vec<u16> {
        graph.iter().map(|id| graph.instr(id).opcode).collect()
    }

    #[test]
    fn instance_method_without_arguments() {
        let mut graph = InstrGraph::new();
        let ret = graph.append_imported(code::RET, Operand::None);
        let shape = MethodShape::new(false, Vec::new());

        insert_enter_probe(&mut graph, ret, &shape, &module_tokens(), 0).unwrap();

        assert_eq!(
            opcode_trace(&graph),
            vec![code::LDARG_0, code::LDNULL, code::CALL, code::RET]
        );
    }

    #[test]
    fn static_method_boxes_primitive_arguments() {
        let mut graph = InstrGraph::new();
        let ret = graph.append_imported(code::RET, Operand::None);
        let shape = MethodShape::new(
            true,
            vec![
                ArgType { element: ELEMENT_TYPE::I4, generic_number: 0 },
                ArgType { element: ELEMENT_TYPE::STRING, generic_number: 0 },
            ],
        );

        insert_enter_probe(&mut graph, ret, &shape, &module_tokens(), 3).unwrap();

        assert_eq!(
            opcode_trace(&graph),
            vec![
                code::LDNULL,
                code::LDC_I4,
                code::NEWARR,
                code::STLOC,
                // arg 0: int32, boxed
                code::LDLOC,
                code::LDC_I4,
                code::LDARG,
                code::BOX,
                code::STELEM_REF,
                // arg 1: string, stored as-is
                code::LDLOC,
                code::LDC_I4,
                code::LDARG,
                code::STELEM_REF,
                code::LDLOC,
                code::CALL,
                code::RET,
            ]
        );

        // argument indices are not shifted for static methods
        let ldarg_operands: Vec<Operand> = graph
            .iter()
            .filter(|&id| graph.instr(id).opcode == code::LDARG)
            .map(|id| graph.instr(id).operand)
            .collect();
        assert_eq!(ldarg_operands, vec![Operand::Imm16(0), Operand::Imm16(1)]);
    }

    #[test]
    fn instance_method_shifts_argument_indices() {
        let mut graph = InstrGraph::new();
        let ret = graph.append_imported(code::RET, Operand::None);
        let shape = MethodShape::new(
            false,
            vec![ArgType { element: ELEMENT_TYPE::OBJECT, generic_number: 0 }],
        );

        insert_enter_probe(&mut graph, ret, &shape, &module_tokens(), 0).unwrap();

        let ldarg_operands: Vec<Operand> = graph
            .iter()
            .filter(|&id| graph.instr(id).opcode == code::LDARG)
            .map(|id| graph.instr(id).operand)
            .collect();
        assert_eq!(ldarg_operands, vec![Operand::Imm16(1)]);
    }

    #[test]
    fn generic_argument_resolves_type_spec() {
        let mut tokens = module_tokens();
        tokens.type_specs.push(TypeSpec {
            token: Token::new(0x1B00_0007),
            signature: vec![ELEMENT_TYPE::VAR, 0x02],
        });

        let mut graph = InstrGraph::new();
        let ret = graph.append_imported(code::RET, Operand::None);
        let shape = MethodShape::new(
            true,
            vec![ArgType { element: ELEMENT_TYPE::VAR, generic_number: 2 }],
        );

        insert_enter_probe(&mut graph, ret, &shape, &tokens, 0).unwrap();

        let box_operand = graph
            .iter()
            .find(|&id| graph.instr(id).opcode == code::BOX)
            .map(|id| graph.instr(id).operand)
            .unwrap();
        assert_eq!(box_operand, Operand::Imm32(0x1B00_0007));
    }

    #[test]
    fn missing_type_spec_aborts_resolution() {
        let mut graph = InstrGraph::new();
        let ret = graph.append_imported(code::RET, Operand::None);
        let shape = MethodShape::new(
            true,
            vec![ArgType { element: ELEMENT_TYPE::MVAR, generic_number: 0 }],
        );

        let err = insert_enter_probe(&mut graph, ret, &shape, &module_tokens(), 0).unwrap_err();
        assert!(matches!(err, crate::Error::ResolutionFailed(_)));
    }

    #[test]
    fn missing_primitive_reference_aborts_resolution() {
        let tokens = ModuleTokens::new(Token::new(0x0100_0001), Token::new(0x0A00_0001));
        let mut graph = InstrGraph::new();
        let ret = graph.append_imported(code::RET, Operand::None);
        let shape = MethodShape::new(
            true,
            vec![ArgType { element: ELEMENT_TYPE::R8, generic_number: 0 }],
        );

        let err = insert_enter_probe(&mut graph, ret, &shape, &tokens, 0).unwrap_err();
        assert!(matches!(err, crate::Error::ResolutionFailed(_)));
    }

    #[test]
    fn invalid_module_context_is_rejected() {
        let tokens = ModuleTokens::default();
        let mut graph = InstrGraph::new();
        let ret = graph.append_imported(code::RET, Operand::None);
        let shape = MethodShape::new(true, Vec::new());

        assert!(insert_enter_probe(&mut graph, ret, &shape, &tokens, 0).is_err());
    }
}
