//! Raw exception-handler clauses as they appear in a method body's data section.
//!
//! These are the offset-based rows decoded straight from the EH table; the rewriter
//! translates them into graph-node references (see [`crate::rewriter`]) before any
//! mutation happens, so clause boundaries survive instruction movement.

use bitflags::bitflags;

bitflags! {
    /// Exception clause flags defining the kind of handling region.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EhClauseFlags: u32 {
        /// A typed exception clause; the clause data holds the class token.
        const EXCEPTION = 0x0000;

        /// A filter clause; the clause data holds the filter-begin offset.
        const FILTER = 0x0001;

        /// A finally clause, executed on both normal and exceptional exit.
        const FINALLY = 0x0002;

        /// A fault clause, executed only when an exception is thrown.
        const FAULT = 0x0004;
    }
}

/// One offset-based exception clause row, always held in fat-form field widths.
///
/// Tiny-section rows are widened to these fields during decoding so downstream code
/// only deals with one layout. The `handler_data` field is the 4-byte union slot of
/// the on-disk format: a class token for typed clauses, a filter-begin offset when
/// [`EhClauseFlags::FILTER`] is set.
#[derive(Debug, Clone, Copy)]
pub struct RawEhClause {
    /// Kind of this clause (typed / filter / finally / fault).
    pub flags: EhClauseFlags,
    /// Offset in bytes of the try block from the start of the code.
    pub try_offset: u32,
    /// Length in bytes of the try block.
    pub try_length: u32,
    /// Offset of the handler for this try block.
    pub handler_offset: u32,
    /// Size of the handler code in bytes.
    pub handler_length: u32,
    /// Class token or filter offset, selected by the filter flag.
    pub handler_data: u32,
}

impl RawEhClause {
    /// Returns `true` if this clause uses a filter instead of a class token.
    #[must_use]
    pub fn is_filter(&self) -> bool {
        self.flags.contains(EhClauseFlags::FILTER)
    }
}
