//! Instruction emission
//!
//! A growable byte buffer with the write head at the end. Opcodes are single
//! bytes, operands 32-bit little-endian. Control-flow targets that are not
//! yet known are emitted as [`PATCH_SENTINEL`] and overwritten once the
//! target position is reached.

use deva_core::Opcode;

/// Placeholder operand for back-patched jump targets.
pub const PATCH_SENTINEL: u32 = u32::MAX;

#[derive(Debug, Default)]
pub struct InstructionStream {
    bytes: Vec<u8>,
}

impl InstructionStream {
    pub fn new() -> Self {
        InstructionStream { bytes: Vec::with_capacity(1024) }
    }

    /// Current write position; the address of the next instruction.
    pub fn len(&self) -> u32 {
        self.bytes.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn emit(&mut self, op: Opcode) {
        debug_assert_eq!(op.num_operands(), 0, "{} expects operands", op.name());
        self.bytes.push(op.into());
    }

    pub fn emit1(&mut self, op: Opcode, operand: u32) {
        debug_assert_eq!(op.num_operands(), 1, "{} takes {} operands", op.name(), op.num_operands());
        self.bytes.push(op.into());
        self.bytes.extend_from_slice(&operand.to_le_bytes());
    }

    pub fn emit2(&mut self, op: Opcode, a: u32, b: u32) {
        debug_assert_eq!(op.num_operands(), 2, "{} takes {} operands", op.name(), op.num_operands());
        self.bytes.push(op.into());
        self.bytes.extend_from_slice(&a.to_le_bytes());
        self.bytes.extend_from_slice(&b.to_le_bytes());
    }

    /// Byte offset of the operand written `nth_from_end` operands ago
    /// (0 = the last operand emitted). Recorded as a patch site.
    pub fn operand_loc(&self, nth_from_end: usize) -> usize {
        self.bytes.len() - 4 * (nth_from_end + 1)
    }

    /// Overwrite a previously emitted operand.
    pub fn patch(&mut self, loc: usize, value: u32) {
        debug_assert_eq!(
            u32::from_le_bytes(self.bytes[loc..loc + 4].try_into().unwrap()),
            PATCH_SENTINEL,
            "patching an operand that is not a sentinel"
        );
        self.bytes[loc..loc + 4].copy_from_slice(&value.to_le_bytes());
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_and_positions() {
        let mut out = InstructionStream::new();
        out.emit(Opcode::Pop);
        assert_eq!(out.len(), 1);
        out.emit1(Opcode::Push, 7);
        assert_eq!(out.len(), 6);
        out.emit2(Opcode::ExitLoop, PATCH_SENTINEL, 2);
        assert_eq!(out.len(), 15);
        assert_eq!(out.operand_loc(1), 6); // the sentinel address operand
    }

    #[test]
    fn test_backpatch() {
        let mut out = InstructionStream::new();
        out.emit1(Opcode::Jmp, PATCH_SENTINEL);
        let site = out.operand_loc(0);
        out.emit(Opcode::Nop);
        let target = out.len();
        out.patch(site, target);
        let bytes = out.into_bytes();
        assert_eq!(u32::from_le_bytes(bytes[1..5].try_into().unwrap()), 6);
    }
}
