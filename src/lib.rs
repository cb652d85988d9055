// Copyright 2025 the ilweave authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]

//! # ilweave
//!
//! Load-time CIL method-body rewriting for .NET instrumentation, in pure Rust.
//!
//! `ilweave` parses a method's raw instruction stream and exception-handler table
//! into an editable instruction graph, inserts an entry-probe call sequence, and
//! re-serializes the result into the binary method-body format - with short and
//! long branch encodings re-laid-out until every displacement fits, and exception
//! region boundaries carried as instruction references so they survive mutation
//! untouched.
//!
//! ## Features
//!
//! - **Full stream model** - one-byte and `0xFE`-family opcodes, every operand
//!   width, switch tables, tiny and fat headers, tiny and fat exception sections
//! - **Safe mutation primitives** - arena-indexed instruction graph with O(1)
//!   insert-before/after and stable references across edits
//! - **Convergent re-layout** - bounded branch-widening fixpoint instead of
//!   fragile offset bookkeeping
//! - **Probe synthesis** - receiver plus boxed-argument-array call prefix, with
//!   primitive and generic-variable boxing resolved from a per-module token cache
//! - **Host-friendly failure model** - every error aborts one method's rewrite
//!   only; the original body stays in place
//!
//! ## Quick Start
//!
//! ```rust
//! use ilweave::metadata::context::{MethodShape, ModuleTokens};
//! use ilweave::metadata::token::Token;
//! use ilweave::rewriter::{rewrite_method, SignatureRegistry};
//!
//! struct HostRegistry;
//!
//! impl SignatureRegistry for HostRegistry {
//!     fn locals_sig_token(&mut self, _blob: &[u8]) -> ilweave::Result<Token> {
//!         // a real host emits the blob into the module's metadata here
//!         Ok(Token::new(0x1100_0001))
//!     }
//! }
//!
//! // tiny method body: ldarg.0, ret
//! let original = [0x0A, 0x02, 0x2A];
//! let shape = MethodShape::new(false, Vec::new());
//! let tokens = ModuleTokens::new(Token::new(0x0100_0001), Token::new(0x0A00_0001));
//!
//! let rewritten = rewrite_method(&original, None, &shape, &tokens, &mut HostRegistry)?;
//! assert!(rewritten.len() > original.len());
//! # Ok::<(), ilweave::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`rewriter`] - the core: opcode table, instruction graph, importer,
//!   exception-table translation, probe inserter, exporter
//! - [`metadata`] - the minimal metadata model consumed here: tokens, method-body
//!   headers, locals signatures, method shape and module context
//! - [`io`] - bounds-checked parsing and buffer building
//! - [`cache`] - the concurrent per-module context cache
//! - [`prelude`] - curated re-exports
//!
//! ## Scope
//!
//! The host integration that decides *when* to rewrite (runtime callbacks, body
//! installation, deployment) and the metadata resolution that builds
//! [`metadata::context::ModuleTokens`] stay outside this crate, reached only
//! through narrow seams such as [`rewriter::SignatureRegistry`]. There is no JIT,
//! no verifier, and no optimizer here - just a faithful round trip with probes
//! woven in.
//!
//! ## Standards
//!
//! The binary formats follow the **ECMA-335 specification** (6th edition):
//! method-body headers (II.25.4), the CIL instruction encoding (III), compressed
//! integers and signature blobs (II.23.2).

#[macro_use]
pub(crate) mod error;

/// The concurrent per-module context cache.
pub mod cache;

/// Byte-level parsing and output building.
pub mod io;

/// The minimal ECMA-335 metadata model the rewriter consumes.
pub mod metadata;

/// Convenient re-exports of the most commonly used types.
pub mod prelude;

/// The bytecode rewriter core: import, mutate, export.
pub mod rewriter;

/// `ilweave` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is
/// always [`Error`]; used for all fallible operations in this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// `ilweave` Error type
///
/// Every failure category of a method rewrite; see the variant docs for how the
/// categories map to abort-this-method semantics.
pub use error::Error;
