//! Decoding of CIL method-body headers (ECMA-335 II.25.4).
//!
//! A method body starts with either a one-byte tiny header (code size < 64, no locals,
//! no exception data) or a 12-byte fat header, followed by the code bytes and, for fat
//! bodies with [`MethodBodyFlags::MORE_SECTS`], one or more trailing data sections.
//! The only defined section kind is the exception-handler table, which itself comes in
//! a tiny and a fat layout; both are decoded here into fat-form [`RawEhClause`] rows.

use crate::{
    io::raw::{read_le, read_le_at},
    metadata::{
        method::{EhClauseFlags, MethodBodyFlags, RawEhClause, SectionFlags},
        token::Token,
    },
    Error::OutOfBounds,
    Result,
};

/// Implicit operand-stack depth of a tiny-header method (II.25.4.2).
pub const TINY_MAX_STACK: usize = 8;

/// Describes one method body that has been decoded from raw bytes.
pub struct MethodBody {
    /// Size of the code (length of all instructions, not counting the header) in bytes
    pub size_code: usize,
    /// Size of the method header in bytes
    pub size_header: usize,
    /// Token of the signature describing the method's local variable slots. Nil == no locals
    pub local_var_sig_token: Token,
    /// Maximum number of items on the operand stack
    pub max_stack: usize,
    /// Flag, indicating the type of the method header
    pub is_fat: bool,
    /// Flag, indicating to call default constructor on all local variables
    pub is_init_local: bool,
    /// Offset-based exception clauses decoded from the trailing data sections
    pub exception_clauses: Vec<RawEhClause>,
}

impl MethodBody {
    /// Decode a method body header (and any exception sections) from raw bytes.
    ///
    /// `data` must start at the first header byte and extend at least to the end of
    /// the body, including trailing sections.
    ///
    /// # Errors
    /// Returns an error if the data is empty, truncated, or carries an unknown
    /// header format tag.
    pub fn parse(data: &[u8]) -> Result<MethodBody> {
        if data.is_empty() {
            return Err(crate::Error::Empty);
        }

        let first_byte = read_le::<u8>(data)?;
        match MethodBodyFlags::from_bits_truncate(u16::from(first_byte & 0b_0000_0011_u8)) {
            MethodBodyFlags::TINY_FORMAT => {
                let size_code = (first_byte >> 2) as usize;
                if size_code + 1 > data.len() {
                    return Err(OutOfBounds);
                }

                Ok(MethodBody {
                    size_code,
                    size_header: 1,
                    local_var_sig_token: Token::nil(),
                    // A tiny header cannot encode max-stack; the runtime assumes 8
                    max_stack: TINY_MAX_STACK,
                    is_fat: false,
                    is_init_local: false,
                    exception_clauses: Vec::new(),
                })
            }
            MethodBodyFlags::FAT_FORMAT => {
                if data.len() < 12 {
                    return Err(OutOfBounds);
                }

                let first_duo = read_le::<u16>(data)?;

                let size_header = ((first_duo >> 12) * 4) as usize;
                let size_code = read_le::<u32>(&data[4..])? as usize;
                if data.len() < size_code + size_header {
                    return Err(OutOfBounds);
                }

                let flags_header =
                    MethodBodyFlags::from_bits_truncate(first_duo & 0b_0000_1111_1111_1111_u16);
                let max_stack = read_le::<u16>(&data[2..])? as usize;
                let local_var_sig_token = Token::new(read_le::<u32>(&data[8..])?);

                let mut exception_clauses = Vec::new();
                if flags_header.contains(MethodBodyFlags::MORE_SECTS) {
                    // Sections start at the first 4-byte boundary past the code
                    let mut cursor = (size_header + size_code + 3) & !3;

                    while data.len() > cursor + 4 {
                        let section_flags =
                            SectionFlags::from_bits_truncate(read_le::<u8>(&data[cursor..])?);
                        if !section_flags.contains(SectionFlags::EHTABLE) {
                            break;
                        }

                        if section_flags.contains(SectionFlags::FAT_FORMAT) {
                            let section_size =
                                (read_le::<u32>(&data[cursor + 1..])? & 0x00FF_FFFF) as usize;
                            if section_size < 4 || data.len() < cursor + section_size {
                                break;
                            }

                            cursor += 4;
                            for _ in 0..(section_size - 4) / 24 {
                                exception_clauses.push(RawEhClause {
                                    flags: EhClauseFlags::from_bits_truncate(read_le_at::<u32>(
                                        data,
                                        &mut cursor,
                                    )?),
                                    try_offset: read_le_at::<u32>(data, &mut cursor)?,
                                    try_length: read_le_at::<u32>(data, &mut cursor)?,
                                    handler_offset: read_le_at::<u32>(data, &mut cursor)?,
                                    handler_length: read_le_at::<u32>(data, &mut cursor)?,
                                    handler_data: read_le_at::<u32>(data, &mut cursor)?,
                                });
                            }
                        } else {
                            let section_size = usize::from(read_le::<u8>(&data[cursor + 1..])?);
                            if section_size < 4 || data.len() < cursor + section_size {
                                break;
                            }

                            cursor += 4;
                            for _ in 0..(section_size - 4) / 12 {
                                exception_clauses.push(RawEhClause {
                                    flags: EhClauseFlags::from_bits_truncate(u32::from(
                                        read_le_at::<u16>(data, &mut cursor)?,
                                    )),
                                    try_offset: u32::from(read_le_at::<u16>(data, &mut cursor)?),
                                    try_length: u32::from(read_le_at::<u8>(data, &mut cursor)?),
                                    handler_offset: u32::from(read_le_at::<u16>(
                                        data,
                                        &mut cursor,
                                    )?),
                                    handler_length: u32::from(read_le_at::<u8>(
                                        data,
                                        &mut cursor,
                                    )?),
                                    handler_data: read_le_at::<u32>(data, &mut cursor)?,
                                });
                            }
                        }

                        if !section_flags.contains(SectionFlags::MORE_SECTS) {
                            break;
                        }
                    }
                }

                Ok(MethodBody {
                    size_code,
                    size_header,
                    local_var_sig_token,
                    max_stack,
                    is_fat: true,
                    is_init_local: flags_header.contains(MethodBodyFlags::INIT_LOCALS),
                    exception_clauses,
                })
            }
            _ => Err(malformed_error!(
                "Method header is neither FAT nor TINY - {}",
                first_byte
            )),
        }
    }

    /// Get the full size of this method (header plus code, not counting sections)
    #[must_use]
    pub fn size(&self) -> usize {
        self.size_code + self.size_header
    }

    /// Slice the code bytes of this body out of the buffer it was parsed from.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if `data` does not cover the code range.
    pub fn code<'a>(&self, data: &'a [u8]) -> Result<&'a [u8]> {
        let end = self
            .size_header
            .checked_add(self.size_code)
            .ok_or(OutOfBounds)?;
        if data.len() < end {
            return Err(OutOfBounds);
        }

        Ok(&data[self.size_header..end])
    }
}
