//! Compact mapping from code offsets to source lines.
//!
//! The program is a byte stream in the spirit of the DWARF line program, with
//! fewer opcodes and fixed special-opcode parameters:
//!
//! | byte | meaning |
//! |---|---|
//! | `0` | nop |
//! | `1` + u32 | set the line |
//! | `2` + u32 | set the offset, emit a row |
//! | `3` + varint | advance the line by a signed amount |
//! | `4` + varint | advance the offset, emit a row |
//! | `5..=255` | advance both by a small amount, emit a row |
//!
//! Varints use the UTF-8 bit layout (1 to 4 bytes, values up to `0x10FFFF`),
//! and u32 operands are little-endian. Line advances are zigzag encoded
//! (`0, -1, 1, -2, ..` map to `0, 1, 2, 3, ..`) so a jump back to an earlier
//! line, as at the end of a loop, stays as short as a jump forward.
//!
//! Each row states that the instructions up to and including `offset` belong to
//! `line`. Consecutive instructions on the same line are folded into the last
//! row by rewriting it in place, so a run of same-line emissions usually costs
//! a single byte.

const OP_NOP: u8 = 0;
const OP_SET_LINE: u8 = 1;
const OP_SET_OFFSET: u8 = 2;
const OP_ADVANCE_LINE: u8 = 3;
const OP_ADVANCE_OFFSET: u8 = 4;
const OP_SPECIAL: u8 = 5;

const LINE_START: i64 = -4;
const LINE_RANGE: i64 = 16;

/// Largest value a varint can hold.
const MAX_VARINT: u32 = 0x0010_FFFF;

fn special_line_advance(op: u8) -> i64 {
    (i64::from(op) - i64::from(OP_SPECIAL)) % LINE_RANGE + LINE_START
}

fn special_offset_advance(op: u8) -> i64 {
    (i64::from(op) - i64::from(OP_SPECIAL)) / LINE_RANGE
}

/// Encodes a `(line, offset)` advance pair as a special opcode if it fits.
fn encode_special(line_advance: i64, offset_advance: i64) -> Option<u8> {
    if !(LINE_START..LINE_START + LINE_RANGE).contains(&line_advance) || offset_advance < 0 {
        return None;
    }
    let op = i64::from(OP_SPECIAL) + offset_advance * LINE_RANGE + (line_advance - LINE_START);
    u8::try_from(op).ok()
}

fn varint_size(value: u32) -> usize {
    match value {
        0..=0x7F => 1,
        0x80..=0x7FF => 2,
        0x800..=0xFFFF => 3,
        _ => 4,
    }
}

/// Writes `value` with the UTF-8 bit layout. `value` must not exceed [`MAX_VARINT`].
fn encode_varint(value: u32, out: &mut [u8]) -> usize {
    let byte = |v: u32| v as u8;
    match varint_size(value) {
        1 => {
            out[0] = byte(value);
            1
        }
        2 => {
            out[0] = 0xC0 | byte(value >> 6);
            out[1] = 0x80 | byte(value & 0x3F);
            2
        }
        3 => {
            out[0] = 0xE0 | byte(value >> 12);
            out[1] = 0x80 | byte((value >> 6) & 0x3F);
            out[2] = 0x80 | byte(value & 0x3F);
            3
        }
        _ => {
            out[0] = 0xF0 | byte(value >> 18);
            out[1] = 0x80 | byte((value >> 12) & 0x3F);
            out[2] = 0x80 | byte((value >> 6) & 0x3F);
            out[3] = 0x80 | byte(value & 0x3F);
            4
        }
    }
}

/// Reads a varint, returning the value and its encoded size.
fn decode_varint(bytes: &[u8]) -> Option<(u32, usize)> {
    let first = u32::from(*bytes.first()?);
    let (size, initial) = match first {
        0..=0x7F => return Some((first, 1)),
        0xC0..=0xDF => (2, first & 0x1F),
        0xE0..=0xEF => (3, first & 0x0F),
        0xF0..=0xF7 => (4, first & 0x07),
        _ => return None,
    };
    let tail = bytes.get(1..size)?;
    let value = tail.iter().fold(initial, |acc, &b| (acc << 6) | u32::from(b & 0x3F));
    Some((value, size))
}

fn zigzag(value: i64) -> Option<u32> {
    let encoded = u32::try_from((value << 1) ^ (value >> 63)).ok()?;
    (encoded <= MAX_VARINT).then_some(encoded)
}

fn unzigzag(value: u32) -> i64 {
    let value = i64::from(value);
    (value >> 1) ^ -(value & 1)
}

fn read_u32(bytes: &[u8]) -> Option<u32> {
    let raw: [u8; 4] = bytes.get(..4)?.try_into().ok()?;
    Some(u32::from_le_bytes(raw))
}

/// Incremental encoder owned by the code builder of one function.
#[derive(Debug, Default, Clone)]
pub struct LineProgramBuilder {
    program: Vec<u8>,
    /// Line of the first instruction; zero until something is recorded.
    first_line: u32,
    previous_line: u32,
    /// Offset of the most recently recorded instruction.
    line_offset: u32,
    /// Position of the last row-emitting op, which may be rewritten in place.
    last_op: Option<usize>,
}

impl LineProgramBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn first_line(&self) -> u32 {
        self.first_line
    }

    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.program
    }

    /// Records that the instruction starting at `offset` came from `line`.
    ///
    /// Offsets must be recorded in increasing order.
    pub fn record(&mut self, line: u32, offset: u32) {
        if self.first_line == 0 {
            self.first_line = line;
            self.previous_line = line;
        }
        if line == self.previous_line && self.patch_last(offset) {
            self.line_offset = offset;
            return;
        }

        let line_advance = i64::from(line) - i64::from(self.previous_line);
        let offset_advance = i64::from(offset) - i64::from(self.line_offset);
        if let Some(op) = encode_special(line_advance, offset_advance) {
            self.last_op = Some(self.program.len());
            self.program.push(op);
        } else {
            if line != self.previous_line {
                match zigzag(line_advance) {
                    Some(advance) => self.push_varint(OP_ADVANCE_LINE, advance),
                    None => {
                        self.program.push(OP_SET_LINE);
                        self.program.extend_from_slice(&line.to_le_bytes());
                    }
                }
            }
            self.last_op = Some(self.program.len());
            match u32::try_from(offset_advance) {
                Ok(advance) if advance < MAX_VARINT => self.push_varint(OP_ADVANCE_OFFSET, advance),
                _ => {
                    self.program.push(OP_SET_OFFSET);
                    self.program.extend_from_slice(&offset.to_le_bytes());
                }
            }
        }
        self.previous_line = line;
        self.line_offset = offset;
    }

    /// Tries to extend the last row so it also covers `offset`.
    fn patch_last(&mut self, offset: u32) -> bool {
        let Some(position) = self.last_op else {
            return false;
        };
        match self.program[position] {
            OP_SET_OFFSET => {
                self.program[position + 1..position + 5].copy_from_slice(&offset.to_le_bytes());
                true
            }
            OP_ADVANCE_OFFSET => {
                let Some((previous, _)) = decode_varint(&self.program[position + 1..]) else {
                    return false;
                };
                let row_start = self.line_offset - previous;
                let advance = offset - row_start;
                if advance <= MAX_VARINT && varint_size(previous) == varint_size(advance) {
                    encode_varint(advance, &mut self.program[position + 1..]);
                    true
                } else {
                    false
                }
            }
            op if op >= OP_SPECIAL => {
                let line_advance = special_line_advance(op);
                let row_start = i64::from(self.line_offset) - special_offset_advance(op);
                match encode_special(line_advance, i64::from(offset) - row_start) {
                    Some(patched) => {
                        self.program[position] = patched;
                        true
                    }
                    None => false,
                }
            }
            _ => false,
        }
    }

    fn push_varint(&mut self, op: u8, value: u32) {
        let mut buffer = [0u8; 4];
        let size = encode_varint(value, &mut buffer);
        self.program.push(op);
        self.program.extend_from_slice(&buffer[..size]);
    }

    /// Returns the first line and the encoded program.
    #[must_use]
    pub fn finish(self) -> (u32, Vec<u8>) {
        (self.first_line, self.program)
    }
}

/// One decoded row: instructions up to and including `offset` are on `line`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineRow {
    pub line: u32,
    pub offset: u32,
}

/// Iterator over the rows of an encoded program. Stops at the first malformed op.
#[derive(Debug, Clone)]
pub struct LineRows<'a> {
    program: &'a [u8],
    position: usize,
    line: i64,
    offset: i64,
}

impl<'a> LineRows<'a> {
    #[must_use]
    pub fn new(first_line: u32, program: &'a [u8]) -> Self {
        Self {
            program,
            position: 0,
            line: i64::from(first_line),
            offset: 0,
        }
    }

    fn row(&self) -> Option<LineRow> {
        Some(LineRow {
            line: u32::try_from(self.line).ok()?,
            offset: u32::try_from(self.offset).ok()?,
        })
    }
}

impl Iterator for LineRows<'_> {
    type Item = LineRow;

    fn next(&mut self) -> Option<LineRow> {
        loop {
            let op = *self.program.get(self.position)?;
            let operand = &self.program[self.position + 1..];
            match op {
                OP_NOP => self.position += 1,
                OP_SET_LINE => {
                    self.line = i64::from(read_u32(operand)?);
                    self.position += 5;
                }
                OP_ADVANCE_LINE => {
                    let (advance, size) = decode_varint(operand)?;
                    self.line += unzigzag(advance);
                    self.position += 1 + size;
                }
                OP_SET_OFFSET => {
                    self.offset = i64::from(read_u32(operand)?);
                    self.position += 5;
                    return self.row();
                }
                OP_ADVANCE_OFFSET => {
                    let (advance, size) = decode_varint(operand)?;
                    self.offset += i64::from(advance);
                    self.position += 1 + size;
                    return self.row();
                }
                special => {
                    self.line += special_line_advance(special);
                    self.offset += special_offset_advance(special);
                    self.position += 1;
                    return self.row();
                }
            }
        }
    }
}

/// Returns the line of the instruction starting at `offset`.
///
/// `None` means the offset lies beyond every recorded instruction.
#[must_use]
pub fn line_for_offset(first_line: u32, program: &[u8], offset: u32) -> Option<u32> {
    LineRows::new(first_line, program)
        .find(|row| row.offset >= offset)
        .map(|row| row.line)
}
