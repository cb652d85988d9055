//! The minimal ECMA-335 metadata model the rewriter consumes.
//!
//! This is deliberately not a metadata reader: tokens arrive pre-resolved from the
//! host (see [`context::ModuleTokens`]), and the only blobs decoded here are the
//! method-body header, the method-def signature shape, and the locals signature.
//!
//! # Key Components
//! - [`token::Token`] - opaque metadata references
//! - [`method`] - tiny/fat header and raw exception-section decoding
//! - [`signatures`] - locals-signature extension
//! - [`context`] - per-method shape and per-module token record
//! - [`typesystem`] - element-type constants and boxing classification

pub mod context;
pub mod method;
pub mod signatures;
pub mod token;
pub mod typesystem;
