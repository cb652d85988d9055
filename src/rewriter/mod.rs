//! The bytecode rewriter: import, mutate, export.
//!
//! One [`MethodRewriter`] instance covers one rewrite invocation, operating on a
//! private instruction graph and buffers; nothing is shared across invocations, so
//! concurrent rewrites of different methods need no locking. A failure at any step
//! aborts the current method only - the caller keeps the original body.
//!
//! # Key Types
//! - [`graph::InstrGraph`] - the editable instruction list
//! - [`eh::EhClause`] - exception clauses as node references
//! - [`MethodRewriter`] - per-method driver composing the pipeline
//! - [`SignatureRegistry`] - seam to the host's metadata-emit layer
//!
//! # Example
//!
//! ```rust
//! use ilweave::metadata::context::{MethodShape, ModuleTokens};
//! use ilweave::metadata::token::Token;
//! use ilweave::rewriter::{rewrite_method, SignatureRegistry};
//!
//! struct FixedRegistry;
//!
//! impl SignatureRegistry for FixedRegistry {
//!     fn locals_sig_token(&mut self, _blob: &[u8]) -> ilweave::Result<Token> {
//!         Ok(Token::new(0x1100_0001))
//!     }
//! }
//!
//! // tiny body: ldarg.0, ret
//! let body = [0x0A, 0x02, 0x2A];
//! let shape = MethodShape::new(false, Vec::new());
//! let tokens = ModuleTokens::new(Token::new(0x0100_0001), Token::new(0x0A00_0001));
//!
//! let rewritten = rewrite_method(&body, None, &shape, &tokens, &mut FixedRegistry)?;
//! assert_ne!(rewritten, body);
//! # Ok::<(), ilweave::Error>(())
//! ```

pub mod eh;
pub mod export;
pub mod graph;
pub mod import;
pub mod opcodes;
pub mod probe;

use log::{debug, warn};

use crate::{
    metadata::{
        context::{MethodShape, ModuleTokens},
        method::MethodBody,
        signatures::{extend_locals_sig, MAX_SIG_BYTES},
        token::Token,
    },
    Result,
};

use eh::EhClause;
use graph::InstrGraph;

/// Seam to the host's metadata-emit layer.
///
/// The rewriter produces the extended locals-signature blob; turning that blob
/// into a standalone-signature token requires emitting metadata, which is the
/// host's job.
pub trait SignatureRegistry {
    /// Register a locals signature blob, returning its token.
    ///
    /// # Errors
    /// Implementations should fail when the module's metadata cannot be emitted;
    /// the failure aborts the current method's rewrite.
    fn locals_sig_token(&mut self, blob: &[u8]) -> Result<Token>;
}

/// Per-method rewrite driver: import, mutate, export.
pub struct MethodRewriter<'a> {
    graph: InstrGraph,
    clauses: Vec<EhClause>,
    imported_fat: bool,
    init_locals: bool,
    local_var_sig_token: Token,
    shape: &'a MethodShape,
    tokens: &'a ModuleTokens,
}

impl<'a> MethodRewriter<'a> {
    /// Decode a raw method body into an editable state.
    ///
    /// # Errors
    /// Returns an error for malformed headers, bytecode or exception sections.
    pub fn import(
        body_bytes: &[u8],
        shape: &'a MethodShape,
        tokens: &'a ModuleTokens,
    ) -> Result<Self> {
        let body = MethodBody::parse(body_bytes)?;
        let code = body.code(body_bytes)?;

        let (mut graph, offsets) = import::import_il(code)?;
        graph.set_max_stack(body.max_stack);
        let clauses = eh::import_eh(&body.exception_clauses, &graph, &offsets)?;

        Ok(MethodRewriter {
            graph,
            clauses,
            imported_fat: body.is_fat,
            init_locals: body.is_init_local,
            local_var_sig_token: body.local_var_sig_token,
            shape,
            tokens,
        })
    }

    /// The editable instruction graph.
    pub fn graph_mut(&mut self) -> &mut InstrGraph {
        &mut self.graph
    }

    /// The translated exception clauses.
    #[must_use]
    pub fn clauses(&self) -> &[EhClause] {
        &self.clauses
    }

    /// Current locals-signature token (replaced by [`Self::add_args_local`]).
    #[must_use]
    pub fn local_var_sig_token(&self) -> Token {
        self.local_var_sig_token
    }

    /// Grow the locals signature by one `object[]` slot and register the new blob.
    ///
    /// Returns the zero-based index of the appended slot.
    ///
    /// # Errors
    /// Propagates signature-extension failures and registry failures; in both
    /// cases the rewrite of this method must be abandoned.
    pub fn add_args_local(
        &mut self,
        original_locals_sig: Option<&[u8]>,
        registry: &mut dyn SignatureRegistry,
    ) -> Result<u32> {
        let mut blob = [0u8; MAX_SIG_BYTES];
        let extended = extend_locals_sig(original_locals_sig, &mut blob)?;

        self.local_var_sig_token = registry.locals_sig_token(&blob[..extended.len])?;
        Ok(extended.new_slot_index)
    }

    /// Insert the entry-probe sequence before the first original instruction.
    ///
    /// # Errors
    /// Returns [`crate::Error::ResolutionFailed`] when a boxing reference cannot
    /// be resolved from the module context.
    pub fn insert_enter_probe(&mut self, args_local_index: u32) -> Result<()> {
        let anchor = self.graph.first();
        probe::insert_enter_probe(
            &mut self.graph,
            anchor,
            self.shape,
            self.tokens,
            args_local_index,
        )
    }

    /// Re-serialize the mutated graph into a binary method body.
    ///
    /// # Errors
    /// Propagates layout and assembly failures; see [`export::export_method_body`].
    pub fn export(mut self) -> Result<Vec<u8>> {
        export::export_method_body(
            &mut self.graph,
            &self.clauses,
            // A body imported with a fat header stays fat; anything else may
            // compact when eligible
            !self.imported_fat,
            self.init_locals,
            self.local_var_sig_token,
        )
    }
}

/// Rewrite one method: import, allocate the argument-array local, insert the
/// entry probe, export.
///
/// This is the full per-method pipeline the host calls from its JIT-compilation
/// callback. On any error the original body stays in place; the host logs and
/// moves on.
///
/// # Errors
/// Every error aborts this method only; see [`crate::Error`] for the categories.
pub fn rewrite_method(
    body_bytes: &[u8],
    original_locals_sig: Option<&[u8]>,
    shape: &MethodShape,
    tokens: &ModuleTokens,
    registry: &mut dyn SignatureRegistry,
) -> Result<Vec<u8>> {
    debug!(
        "rewriting method body: {} bytes, {} args, {}",
        body_bytes.len(),
        shape.arg_count(),
        if shape.is_static { "static" } else { "instance" }
    );

    let result = (|| {
        let mut rewriter = MethodRewriter::import(body_bytes, shape, tokens)?;
        let args_local_index = rewriter.add_args_local(original_locals_sig, registry)?;
        rewriter.insert_enter_probe(args_local_index)?;
        rewriter.export()
    })();

    match &result {
        Ok(body) => debug!("rewrite complete: {} bytes", body.len()),
        Err(error) => warn!("rewrite aborted, keeping original body: {error}"),
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::context::ArgType;
    use crate::metadata::typesystem::ELEMENT_TYPE;

    struct CountingRegistry {
        calls: usize,
    }

    impl SignatureRegistry for CountingRegistry {
        fn locals_sig_token(&mut self, blob: &[u8]) -> Result<Token> {
            assert_eq!(blob[0], 0x07);
            self.calls += 1;
            Ok(Token::new(0x1100_0000 + self.calls as u32))
        }
    }

    fn module_tokens() -> ModuleTokens {
        let mut tokens = ModuleTokens::new(Token::new(0x0100_0001), Token::new(0x0A00_0001));
        tokens.primitives[usize::from(ELEMENT_TYPE::I4)] = Token::new(0x0100_0010);
        tokens
    }

    #[test]
    fn pipeline_replaces_locals_token() {
        let body = [0x06, 0x2A]; // tiny: ret
        let shape = MethodShape::new(
            true,
            vec![ArgType { element: ELEMENT_TYPE::I4, generic_number: 0 }],
        );
        let tokens = module_tokens();
        let mut registry = CountingRegistry { calls: 0 };

        let rewritten =
            rewrite_method(&body, None, &shape, &tokens, &mut registry).unwrap();

        assert_eq!(registry.calls, 1);
        let parsed = MethodBody::parse(&rewritten).unwrap();
        assert!(parsed.is_fat);
        assert_eq!(parsed.local_var_sig_token.value(), 0x1100_0001);
    }

    #[test]
    fn resolution_failure_leaves_no_output() {
        let body = [0x06, 0x2A];
        let shape = MethodShape::new(
            true,
            vec![ArgType { element: ELEMENT_TYPE::R4, generic_number: 0 }],
        );
        // no primitive references registered
        let tokens = ModuleTokens::new(Token::new(0x0100_0001), Token::new(0x0A00_0001));
        let mut registry = CountingRegistry { calls: 0 };

        assert!(rewrite_method(&body, None, &shape, &tokens, &mut registry).is_err());
    }

    #[test]
    fn malformed_body_is_rejected_before_mutation() {
        let body = [0x06, 0xFF]; // tiny header, undefined opcode
        let shape = MethodShape::new(true, Vec::new());
        let tokens = module_tokens();
        let mut registry = CountingRegistry { calls: 0 };

        assert!(rewrite_method(&body, None, &shape, &tokens, &mut registry).is_err());
        assert_eq!(registry.calls, 0);
    }
}
