//! Method-body header model: tiny/fat headers, data-section flags and raw
//! exception clauses (ECMA-335 II.25.4).

mod body;
mod exceptions;
mod types;

pub use body::{MethodBody, TINY_MAX_STACK};
pub use exceptions::{EhClauseFlags, RawEhClause};
pub use types::{MethodBodyFlags, SectionFlags};
