//! Convenient re-exports of the most commonly used types and traits.
//!
//! # Example
//!
//! ```rust
//! use ilweave::prelude::*;
//!
//! let tokens = ModuleTokens::new(Token::new(0x0100_0001), Token::new(0x0A00_0001));
//! assert!(tokens.is_valid());
//! ```

pub use crate::cache::ModuleCache;
pub use crate::io::{BodyBuffer, Parser};
pub use crate::metadata::context::{ArgType, MethodShape, ModuleTokens, TypeSpec};
pub use crate::metadata::method::{EhClauseFlags, MethodBody, RawEhClause};
pub use crate::metadata::signatures::extend_locals_sig;
pub use crate::metadata::token::Token;
pub use crate::rewriter::eh::{EhClause, EhHandler};
pub use crate::rewriter::graph::{InstrGraph, InstrId, Operand};
pub use crate::rewriter::{rewrite_method, MethodRewriter, SignatureRegistry};
pub use crate::{Error, Result};
