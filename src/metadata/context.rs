//! Per-method and per-module rewrite context.
//!
//! [`MethodShape`] is the signature-derived view the probe inserter works from: the
//! static/instance split and, per argument, the element-type classification that
//! decides boxing. [`ModuleTokens`] is the read-only record of precomputed metadata
//! references the host resolves once per module; this crate never constructs it
//! from metadata itself.

use crate::{
    io::parser::Parser,
    metadata::{
        token::Token,
        typesystem::{is_generic_var, is_primitive, ELEMENT_TYPE, ELEMENT_TYPE_SLOTS},
    },
    Result,
};

/// Calling-convention bit: the method has a `this` receiver.
pub const CALLCONV_HASTHIS: u8 = 0x20;
/// Calling-convention bit: `this` is passed explicitly in the signature.
pub const CALLCONV_EXPLICITTHIS: u8 = 0x40;
/// Calling-convention bit: the method has generic parameters.
pub const CALLCONV_GENERIC: u8 = 0x10;

/// Upper bound on arguments a method may declare before the rewriter refuses it.
pub const MAX_ARGS: usize = 1024;

const MAX_TYPE_DEPTH: usize = 32;

/// Static-type classification of one argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArgType {
    /// Leading element type of the argument's encoding.
    pub element: u8,
    /// Generic variable number; meaningful only for `VAR` / `MVAR` elements.
    pub generic_number: u32,
}

impl ArgType {
    /// Returns `true` if storing this argument into an object array requires a
    /// preceding box instruction (primitive value types and generic variables).
    #[must_use]
    pub fn needs_box(&self) -> bool {
        is_primitive(self.element) || self.is_generic()
    }

    /// Returns `true` if the argument is typed as a generic variable.
    #[must_use]
    pub fn is_generic(&self) -> bool {
        is_generic_var(self.element)
    }
}

/// The argument/return shape of a method, derived from its signature.
#[derive(Debug, Clone)]
pub struct MethodShape {
    /// `true` when the method has no `this` receiver.
    pub is_static: bool,
    /// Per-argument classification, in declaration order (excluding `this`).
    pub args: Vec<ArgType>,
}

impl MethodShape {
    /// Build a shape directly, for hosts that already hold decoded signatures.
    #[must_use]
    pub fn new(is_static: bool, args: Vec<ArgType>) -> Self {
        MethodShape { is_static, args }
    }

    /// Decode the shape from a raw method-def signature blob (ECMA-335 II.23.2.1).
    ///
    /// Only the information the probe inserter needs is retained: the `HASTHIS` bit
    /// and each parameter's leading element type plus generic variable number. The
    /// return type and any nested encodings are fully consumed but not kept.
    ///
    /// # Errors
    /// Returns an error for empty or truncated signatures, exotic encodings past a
    /// fixed nesting depth, and methods above the [`MAX_ARGS`] ceiling.
    pub fn parse(signature: &[u8]) -> Result<MethodShape> {
        if signature.is_empty() {
            return Err(crate::Error::Empty);
        }

        let mut parser = Parser::new(signature);
        let call_conv = parser.read_le::<u8>()?;
        let is_static = (call_conv & CALLCONV_HASTHIS) != CALLCONV_HASTHIS;

        if (call_conv & CALLCONV_GENERIC) == CALLCONV_GENERIC {
            let _generic_param_count = parser.read_compressed_uint()?;
        }

        let param_count = parser.read_compressed_uint()? as usize;
        if param_count > MAX_ARGS {
            return Err(crate::Error::UnsupportedShape(format!(
                "method declares {param_count} arguments"
            )));
        }

        // Return type precedes the parameters and is skipped
        let _ = read_type(&mut parser, 0)?;

        let mut args = Vec::with_capacity(param_count);
        for _ in 0..param_count {
            args.push(read_type(&mut parser, 0)?);
        }

        Ok(MethodShape { is_static, args })
    }

    /// Number of declared arguments, not counting `this`.
    #[must_use]
    pub fn arg_count(&self) -> usize {
        self.args.len()
    }
}

/// Consume one type encoding, returning its top-level classification.
fn read_type(parser: &mut Parser, depth: usize) -> Result<ArgType> {
    if depth > MAX_TYPE_DEPTH {
        return Err(crate::Error::UnsupportedShape(
            "type encoding nested too deeply".to_string(),
        ));
    }

    let mut element = parser.read_le::<u8>()?;

    // Custom modifiers prefix the type they modify
    while element == ELEMENT_TYPE::CMOD_REQD || element == ELEMENT_TYPE::CMOD_OPT {
        let _modifier_token = parser.read_compressed_uint()?;
        element = parser.read_le::<u8>()?;
    }

    match element {
        ELEMENT_TYPE::VOID
        | ELEMENT_TYPE::BOOLEAN
        | ELEMENT_TYPE::CHAR
        | ELEMENT_TYPE::I1
        | ELEMENT_TYPE::U1
        | ELEMENT_TYPE::I2
        | ELEMENT_TYPE::U2
        | ELEMENT_TYPE::I4
        | ELEMENT_TYPE::U4
        | ELEMENT_TYPE::I8
        | ELEMENT_TYPE::U8
        | ELEMENT_TYPE::R4
        | ELEMENT_TYPE::R8
        | ELEMENT_TYPE::STRING
        | ELEMENT_TYPE::OBJECT
        | ELEMENT_TYPE::I
        | ELEMENT_TYPE::U
        | ELEMENT_TYPE::TYPEDBYREF => Ok(ArgType {
            element,
            generic_number: 0,
        }),

        ELEMENT_TYPE::VALUETYPE | ELEMENT_TYPE::CLASS => {
            let _type_token = parser.read_compressed_uint()?;
            Ok(ArgType {
                element,
                generic_number: 0,
            })
        }

        ELEMENT_TYPE::VAR | ELEMENT_TYPE::MVAR => {
            let generic_number = parser.read_compressed_uint()?;
            Ok(ArgType {
                element,
                generic_number,
            })
        }

        ELEMENT_TYPE::PTR | ELEMENT_TYPE::BYREF | ELEMENT_TYPE::SZARRAY | ELEMENT_TYPE::PINNED => {
            let _inner = read_type(parser, depth + 1)?;
            Ok(ArgType {
                element,
                generic_number: 0,
            })
        }

        ELEMENT_TYPE::GENERICINST => {
            let _kind = parser.read_le::<u8>()?;
            let _type_token = parser.read_compressed_uint()?;
            let arg_count = parser.read_compressed_uint()?;
            for _ in 0..arg_count {
                let _ = read_type(parser, depth + 1)?;
            }
            Ok(ArgType {
                element,
                generic_number: 0,
            })
        }

        ELEMENT_TYPE::ARRAY => {
            let _inner = read_type(parser, depth + 1)?;
            let _rank = parser.read_compressed_uint()?;
            let num_sizes = parser.read_compressed_uint()?;
            for _ in 0..num_sizes {
                let _ = parser.read_compressed_uint()?;
            }
            let num_lo_bounds = parser.read_compressed_uint()?;
            for _ in 0..num_lo_bounds {
                let _ = parser.read_compressed_uint()?;
            }
            Ok(ArgType {
                element,
                generic_number: 0,
            })
        }

        _ => Err(crate::Error::UnsupportedShape(format!(
            "unsupported element type {element:#04x} in signature"
        ))),
    }
}

/// One generic type-specification the host enumerated from the module's metadata.
#[derive(Debug, Clone)]
pub struct TypeSpec {
    /// Token of the TypeSpec row.
    pub token: Token,
    /// Raw signature blob of the specification.
    pub signature: Vec<u8>,
}

/// Precomputed metadata references for one loaded module.
///
/// Built by the host's metadata-resolution layer, cached per module (see
/// [`crate::cache::ModuleCache`]) and treated as read-only here.
#[derive(Debug, Clone)]
pub struct ModuleTokens {
    /// Reference to `System.Object`, the element type of the argument array.
    pub object_type: Token,
    /// Reference to the probe method every instrumented method calls.
    pub probe_method: Token,
    /// Boxing references per primitive element type, indexed by element byte.
    pub primitives: [Token; ELEMENT_TYPE_SLOTS],
    /// The module's generic type-specification catalog.
    pub type_specs: Vec<TypeSpec>,
}

impl Default for ModuleTokens {
    fn default() -> Self {
        ModuleTokens {
            object_type: Token::default(),
            probe_method: Token::default(),
            primitives: [Token::default(); ELEMENT_TYPE_SLOTS],
            type_specs: Vec::new(),
        }
    }
}

impl ModuleTokens {
    /// Create a context with the two mandatory references and no primitives yet.
    #[must_use]
    pub fn new(object_type: Token, probe_method: Token) -> Self {
        ModuleTokens {
            object_type,
            probe_method,
            primitives: [Token::nil(); ELEMENT_TYPE_SLOTS],
            type_specs: Vec::new(),
        }
    }

    /// Returns `true` once both mandatory references are present.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.object_type.is_nil() && !self.probe_method.is_nil()
    }

    /// Boxing reference for a primitive element type, if the host registered one.
    #[must_use]
    pub fn primitive(&self, element: u8) -> Option<Token> {
        self.primitives
            .get(usize::from(element))
            .copied()
            .filter(|token| !token.is_nil())
    }

    /// Scan the type-spec catalog for a generic variable specification.
    ///
    /// A match is a spec whose signature starts with the same element byte
    /// (`VAR`/`MVAR`) followed by the compressed generic variable number.
    #[must_use]
    pub fn find_generic_spec(&self, element: u8, number: u32) -> Option<Token> {
        for spec in &self.type_specs {
            let mut parser = Parser::new(&spec.signature);
            let Ok(lead) = parser.read_le::<u8>() else {
                continue;
            };
            if lead != element {
                continue;
            }
            if parser.read_compressed_uint().ok() == Some(number) {
                return Some(spec.token);
            }
        }

        None
    }
}
