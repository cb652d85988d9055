//! Translation of raw exception clauses into graph-node references.
//!
//! Once translated, a clause's try/handler boundaries are instruction references,
//! not offsets: when the probe inserter moves everything behind it, the boundaries
//! stay valid with no fix-up pass. The handler-end reference is *inclusive* - it
//! names the last real instruction of the handler, found by stepping one node back
//! from the instruction at the exclusive end offset. The exporter's length
//! computation (`handler_end.next.offset - handler_begin.offset`) is written to
//! match; keep the two sides in sync.

use crate::{
    metadata::{method::RawEhClause, token::Token},
    rewriter::{
        graph::{InstrGraph, InstrId, SENTINEL},
        import::OffsetTable,
    },
    Result,
};

pub use crate::metadata::method::EhClauseFlags;

/// What a clause runs when it matches: a typed handler or a filter block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EhHandler {
    /// Typed clause; the token names the exception type being caught.
    Class(Token),
    /// Filter clause; the reference names the first filter instruction.
    Filter(InstrId),
}

/// One exception clause with all boundaries expressed as node references.
#[derive(Debug, Clone, Copy)]
pub struct EhClause {
    /// Kind of this clause (typed / filter / finally / fault).
    pub flags: EhClauseFlags,
    /// First instruction of the try block.
    pub try_begin: InstrId,
    /// First instruction past the try block.
    pub try_end: InstrId,
    /// First instruction of the handler.
    pub handler_begin: InstrId,
    /// Last instruction inside the handler (inclusive).
    pub handler_end: InstrId,
    /// Class token or filter start, selected by the filter flag.
    pub handler: EhHandler,
}

/// Translate the raw clause array into node-reference form.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] if any clause boundary does not land on an
/// instruction boundary inside the graph, or a handler region is empty.
pub fn import_eh(
    raw_clauses: &[RawEhClause],
    graph: &InstrGraph,
    table: &OffsetTable,
) -> Result<Vec<EhClause>> {
    let mut clauses = Vec::with_capacity(raw_clauses.len());

    for raw in raw_clauses {
        let try_begin = table.get(raw.try_offset as usize)?;
        let try_end = table.get((raw.try_offset + raw.try_length) as usize)?;
        let handler_begin = table.get(raw.handler_offset as usize)?;

        let handler_exclusive_end =
            table.get((raw.handler_offset + raw.handler_length) as usize)?;
        let handler_end = graph.prev(handler_exclusive_end);
        if handler_end == SENTINEL {
            return Err(malformed_error!(
                "Exception clause with empty handler at offset {}",
                raw.handler_offset
            ));
        }

        let handler = if raw.is_filter() {
            EhHandler::Filter(table.get(raw.handler_data as usize)?)
        } else {
            EhHandler::Class(Token::new(raw.handler_data))
        };

        clauses.push(EhClause {
            flags: raw.flags,
            try_begin,
            try_end,
            handler_begin,
            handler_end,
            handler,
        });
    }

    Ok(clauses)
}
