//! Instruction listing
//!
//! Renders a code module's byte stream back into mnemonics, one instruction
//! per line, annotating operands that index the constant pool or the global
//! name table with the value they refer to. Used by `devac disasm` and by
//! tests that compare a compile against its decoded listing.

use crate::code::Code;
use crate::error::{RuntimeError, RuntimeResult};
use crate::opcode::Opcode;

/// One decoded instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedInstruction {
    pub offset: u32,
    pub op: Opcode,
    pub operands: Vec<u32>,
}

/// Decode the whole instruction stream.
pub fn decode(code: &Code) -> RuntimeResult<Vec<DecodedInstruction>> {
    let mut out = Vec::new();
    let mut pos = 0usize;
    while pos < code.bytes.len() {
        let op = Opcode::try_from(code.bytes[pos]).map_err(|_| {
            RuntimeError::internal(format!("invalid opcode byte {} at offset {}", code.bytes[pos], pos))
        })?;
        let n = op.num_operands();
        if pos + 1 + n * 4 > code.bytes.len() {
            return Err(RuntimeError::internal("truncated instruction stream"));
        }
        let mut operands = Vec::with_capacity(n);
        for i in 0..n {
            let at = pos + 1 + i * 4;
            operands.push(u32::from_le_bytes([
                code.bytes[at],
                code.bytes[at + 1],
                code.bytes[at + 2],
                code.bytes[at + 3],
            ]));
        }
        out.push(DecodedInstruction { offset: pos as u32, op, operands });
        pos += 1 + n * 4;
    }
    Ok(out)
}

/// Render the listing as text.
pub fn listing(code: &Code) -> RuntimeResult<String> {
    let mut out = String::new();
    for inst in decode(code)? {
        out.push_str(&format_instruction(code, &inst));
        out.push('\n');
    }
    Ok(out)
}

fn format_instruction(code: &Code, inst: &DecodedInstruction) -> String {
    let mut line = format!("{:06}: {}", inst.offset, inst.op.name());
    for operand in &inst.operands {
        line.push_str(&format!(" {}", operand));
    }
    // annotate pool/name references
    match inst.op {
        Opcode::Push => {
            if let Ok(c) = code.constant(inst.operands[0]) {
                line.push_str(&format!("\t; {}", c));
            }
        }
        Opcode::PushGlobal
        | Opcode::StoreGlobal
        | Opcode::StoreTrue
        | Opcode::StoreFalse
        | Opcode::StoreNull
        | Opcode::Import => {
            if let Ok(n) = code.name(inst.operands[0]) {
                line.push_str(&format!("\t; {}", n));
            }
        }
        _ => {}
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_offsets_and_operands() {
        let mut code = Code::new();
        let k = code.add_num_constant(14.0);
        code.bytes.push(u8::from(Opcode::Push));
        code.bytes.extend_from_slice(&k.to_le_bytes());
        code.bytes.push(u8::from(Opcode::ExitLoop));
        code.bytes.extend_from_slice(&99u32.to_le_bytes());
        code.bytes.extend_from_slice(&2u32.to_le_bytes());
        code.bytes.push(u8::from(Opcode::Halt));

        let decoded = decode(&code).unwrap();
        assert_eq!(decoded.len(), 3);
        assert_eq!(decoded[0].op, Opcode::Push);
        assert_eq!(decoded[0].operands, vec![k]);
        assert_eq!(decoded[1].offset, 5);
        assert_eq!(decoded[1].operands, vec![99, 2]);
        assert_eq!(decoded[2].op, Opcode::Halt);
    }

    #[test]
    fn test_listing_annotates_constants() {
        let mut code = Code::new();
        let k = code.add_str_constant("hi");
        code.bytes.push(u8::from(Opcode::Push));
        code.bytes.extend_from_slice(&k.to_le_bytes());
        let text = listing(&code).unwrap();
        assert!(text.contains("push 0"));
        assert!(text.contains("\"hi\""));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let mut code = Code::new();
        code.bytes.push(200); // not an opcode
        assert!(decode(&code).is_err());
    }
}
