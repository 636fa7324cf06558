//! The `.dvc` compiled-module format
//!
//! Layout, in order:
//!
//! 1. 16-byte header: `"deva\0"`, version string `"1.0.0\0"`, 5 zero bytes.
//! 2. `.const` section: 8-byte tag `".const\0\0"`, u32 record count, then
//!    per record a type byte (0 = number, 1 = string) followed by an 8-byte
//!    IEEE 754 double or a null-terminated UTF-8 string.
//! 3. `.global` section: 8-byte tag `".global\0"`, u32 count, then that many
//!    null-terminated names.
//! 4. `.func` section: 8-byte tag `".func\0\0\0"` truncated to 8 bytes, u32
//!    count, then one record per function (see [`write_function`]).
//! 5. Instruction bytes: the remainder of the image.
//!
//! All multi-byte integers are little-endian. Sections must appear in this
//! order; the reader rejects anything else. Line-number information is not a
//! section of its own: it travels as `line_num` instructions inside the byte
//! stream and the reader rebuilds the in-memory map by scanning for them.

use std::rc::Rc;

use crate::code::{Code, Constant, DefaultValue, FunctionObject, LineMap, ParamDefault};
use crate::error::{ErrorKind, RuntimeError, RuntimeResult};
use crate::opcode::Opcode;

pub const FILE_MAGIC: &[u8; 5] = b"deva\0";
pub const FILE_VERSION: &[u8; 6] = b"1.0.0\0";

const CONST_TAG: &[u8; 8] = b".const\0\0";
const GLOBAL_TAG: &[u8; 8] = b".global\0";
const FUNC_TAG: &[u8; 8] = b".func\0\0\0";

const CONST_KIND_NUM: u8 = 0;
const CONST_KIND_STR: u8 = 1;

const DEFAULT_KIND_CONST: u8 = 0;
const DEFAULT_KIND_TRUE: u8 = 1;
const DEFAULT_KIND_FALSE: u8 = 2;
const DEFAULT_KIND_NULL: u8 = 3;

fn file_error(msg: impl Into<String>) -> RuntimeError {
    RuntimeError::new(ErrorKind::FileError, msg)
}

// ---------------------------------------------------------------------------
// writer
// ---------------------------------------------------------------------------

/// Serialize a code module into a fresh byte image.
pub fn write_code(code: &Code) -> Vec<u8> {
    let mut out = Vec::with_capacity(code.bytes.len() + 256);

    out.extend_from_slice(FILE_MAGIC);
    out.extend_from_slice(FILE_VERSION);
    out.extend_from_slice(&[0u8; 5]);

    out.extend_from_slice(CONST_TAG);
    write_u32(&mut out, code.constants().len() as u32);
    for c in code.constants() {
        match c {
            Constant::Num(n) => {
                out.push(CONST_KIND_NUM);
                out.extend_from_slice(&n.to_le_bytes());
            }
            Constant::Str(s) => {
                out.push(CONST_KIND_STR);
                write_cstr(&mut out, s);
            }
        }
    }

    out.extend_from_slice(GLOBAL_TAG);
    write_u32(&mut out, code.names().len() as u32);
    for name in code.names() {
        write_cstr(&mut out, name);
    }

    out.extend_from_slice(FUNC_TAG);
    write_u32(&mut out, code.functions.len() as u32);
    for f in &code.functions {
        write_function(&mut out, f);
    }

    out.extend_from_slice(&code.bytes);
    out
}

fn write_function(out: &mut Vec<u8>, f: &FunctionObject) {
    write_cstr(out, &f.name);
    write_cstr(out, &f.filename);
    write_u32(out, f.first_line);
    write_u32(out, f.num_params);
    write_u32(out, f.defaults.len() as u32);
    for d in &f.defaults {
        write_u32(out, d.param);
        match d.value {
            DefaultValue::Const(idx) => {
                out.push(DEFAULT_KIND_CONST);
                write_u32(out, idx);
            }
            DefaultValue::True => {
                out.push(DEFAULT_KIND_TRUE);
                write_u32(out, 0);
            }
            DefaultValue::False => {
                out.push(DEFAULT_KIND_FALSE);
                write_u32(out, 0);
            }
            DefaultValue::Null => {
                out.push(DEFAULT_KIND_NULL);
                write_u32(out, 0);
            }
        }
    }
    out.push(f.is_method as u8);
    write_u32(out, f.num_locals);
    for name in &f.local_names {
        write_cstr(out, name);
    }
    write_u32(out, f.names.len() as u32);
    for name in &f.names {
        write_cstr(out, name);
    }
    write_u32(out, f.addr);
}

fn write_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn write_cstr(out: &mut Vec<u8>, s: &str) {
    debug_assert!(!s.as_bytes().contains(&0), "embedded NUL in string");
    out.extend_from_slice(s.as_bytes());
    out.push(0);
}

// ---------------------------------------------------------------------------
// reader
// ---------------------------------------------------------------------------

struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        ByteReader { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> RuntimeResult<&'a [u8]> {
        if self.pos + n > self.buf.len() {
            return Err(file_error("truncated .dvc image"));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_u8(&mut self) -> RuntimeResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn read_u32(&mut self) -> RuntimeResult<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_f64(&mut self) -> RuntimeResult<f64> {
        let b = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(f64::from_le_bytes(raw))
    }

    fn read_cstr(&mut self) -> RuntimeResult<String> {
        let start = self.pos;
        let end = self.buf[start..]
            .iter()
            .position(|&b| b == 0)
            .map(|i| start + i)
            .ok_or_else(|| file_error("unterminated string in .dvc image"))?;
        let s = std::str::from_utf8(&self.buf[start..end])
            .map_err(|_| file_error("non-UTF-8 string in .dvc image"))?;
        self.pos = end + 1;
        Ok(s.to_string())
    }

    fn expect_tag(&mut self, tag: &[u8; 8], section: &str) -> RuntimeResult<()> {
        let found = self.take(8)?;
        if found != tag {
            return Err(file_error(format!("missing or out-of-order {} section", section)));
        }
        Ok(())
    }

    fn rest(&mut self) -> &'a [u8] {
        let slice = &self.buf[self.pos..];
        self.pos = self.buf.len();
        slice
    }
}

/// Parse a `.dvc` byte image into a code module.
pub fn read_code(buf: &[u8]) -> RuntimeResult<Code> {
    let mut r = ByteReader::new(buf);

    let magic = r.take(5)?;
    if magic != FILE_MAGIC {
        return Err(file_error("not a deva compiled file (bad magic)"));
    }
    let version = r.take(6)?;
    if version != FILE_VERSION {
        return Err(file_error(format!(
            "unsupported bytecode version {:?}",
            String::from_utf8_lossy(&version[..version.len().saturating_sub(1)])
        )));
    }
    r.take(5)?; // header padding

    r.expect_tag(CONST_TAG, ".const")?;
    let num_consts = r.read_u32()?;
    let mut constants = Vec::with_capacity(num_consts as usize);
    for _ in 0..num_consts {
        match r.read_u8()? {
            CONST_KIND_NUM => constants.push(Constant::Num(r.read_f64()?)),
            CONST_KIND_STR => constants.push(Constant::Str(Rc::from(r.read_cstr()?.as_str()))),
            k => return Err(file_error(format!("invalid constant type tag {}", k))),
        }
    }

    r.expect_tag(GLOBAL_TAG, ".global")?;
    let num_names = r.read_u32()?;
    let mut names = Vec::with_capacity(num_names as usize);
    for _ in 0..num_names {
        names.push(r.read_cstr()?);
    }

    r.expect_tag(FUNC_TAG, ".func")?;
    let num_funcs = r.read_u32()?;
    let mut functions = Vec::with_capacity(num_funcs as usize);
    for _ in 0..num_funcs {
        functions.push(read_function(&mut r)?);
    }

    let bytes = r.rest().to_vec();

    let mut code = Code::new();
    code.set_pools(constants, names);
    code.functions = functions;
    code.bytes = bytes;
    let lines = scan_line_map(&code)?;
    code.lines = lines;
    Ok(code)
}

fn read_function(r: &mut ByteReader<'_>) -> RuntimeResult<FunctionObject> {
    let name = r.read_cstr()?;
    let filename = r.read_cstr()?;
    let first_line = r.read_u32()?;
    let num_params = r.read_u32()?;
    let num_defaults = r.read_u32()?;
    let mut defaults = Vec::with_capacity(num_defaults as usize);
    for _ in 0..num_defaults {
        let param = r.read_u32()?;
        let kind = r.read_u8()?;
        let payload = r.read_u32()?;
        let value = match kind {
            DEFAULT_KIND_CONST => DefaultValue::Const(payload),
            DEFAULT_KIND_TRUE => DefaultValue::True,
            DEFAULT_KIND_FALSE => DefaultValue::False,
            DEFAULT_KIND_NULL => DefaultValue::Null,
            k => return Err(file_error(format!("invalid default-value kind {}", k))),
        };
        defaults.push(ParamDefault { param, value });
    }
    let is_method = r.read_u8()? != 0;
    let num_locals = r.read_u32()?;
    if num_locals < num_params {
        return Err(file_error(format!(
            "function '{}' declares fewer locals than parameters",
            name
        )));
    }
    let mut local_names = Vec::with_capacity(num_locals as usize);
    for _ in 0..num_locals {
        local_names.push(r.read_cstr()?);
    }
    let num_names = r.read_u32()?;
    let mut names = Vec::with_capacity(num_names as usize);
    for _ in 0..num_names {
        names.push(r.read_cstr()?);
    }
    let addr = r.read_u32()?;
    Ok(FunctionObject {
        name,
        filename,
        first_line,
        num_params,
        defaults,
        num_locals,
        local_names,
        names,
        addr,
        is_method,
    })
}

/// Rebuild the line-number map by scanning the instruction bytes for
/// `line_num` markers.
fn scan_line_map(code: &Code) -> RuntimeResult<LineMap> {
    let mut lines = LineMap::default();
    let mut pos = 0usize;
    while pos < code.bytes.len() {
        let op = Opcode::try_from(code.bytes[pos])
            .map_err(|_| file_error(format!("invalid opcode byte {} at {}", code.bytes[pos], pos)))?;
        let operands = op.num_operands();
        if pos + 1 + operands * 4 > code.bytes.len() {
            return Err(file_error("truncated instruction stream"));
        }
        if op == Opcode::LineNum {
            let line = read_operand(&code.bytes, pos + 1);
            let file_idx = read_operand(&code.bytes, pos + 5);
            if let Constant::Str(file) = code.constant(file_idx)? {
                lines.add(pos as u32, line, file.clone());
            } else {
                return Err(file_error("line_num file operand is not a string constant"));
            }
        }
        pos += 1 + operands * 4;
    }
    Ok(lines)
}

fn read_operand(bytes: &[u8], pos: usize) -> u32 {
    u32::from_le_bytes([bytes[pos], bytes[pos + 1], bytes[pos + 2], bytes[pos + 3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_code() -> Code {
        let mut code = Code::new();
        code.add_num_constant(3.5);
        code.add_str_constant("greeting");
        code.add_name("print");
        code.add_name("counter");
        code.functions.push(FunctionObject {
            name: "@main".to_string(),
            filename: "sample.dv".to_string(),
            first_line: 1,
            num_params: 0,
            defaults: vec![],
            num_locals: 1,
            local_names: vec!["x".to_string()],
            names: vec!["print".to_string()],
            addr: 0,
            is_method: false,
        });
        code.functions.push(FunctionObject {
            name: "helper".to_string(),
            filename: "sample.dv".to_string(),
            first_line: 4,
            num_params: 2,
            defaults: vec![ParamDefault { param: 1, value: DefaultValue::Const(0) }],
            num_locals: 2,
            local_names: vec!["a".to_string(), "b".to_string()],
            names: vec![],
            addr: 9,
            is_method: true,
        });
        code.bytes = vec![
            u8::from(Opcode::Push),
            0,
            0,
            0,
            0,
            u8::from(Opcode::Pop),
            u8::from(Opcode::Halt),
        ];
        code
    }

    #[test]
    fn test_round_trip() {
        let code = sample_code();
        let image = write_code(&code);
        let back = read_code(&image).unwrap();

        assert_eq!(back.constants().len(), code.constants().len());
        assert!(matches!(back.constant(0).unwrap(), Constant::Num(n) if *n == 3.5));
        assert!(matches!(back.constant(1).unwrap(), Constant::Str(s) if &**s == "greeting"));
        assert_eq!(back.names(), code.names());
        assert_eq!(back.functions, code.functions);
        assert_eq!(back.bytes, code.bytes);
    }

    #[test]
    fn test_re_emission_is_byte_identical() {
        let code = sample_code();
        let image = write_code(&code);
        let back = read_code(&image).unwrap();
        assert_eq!(write_code(&back), image);
    }

    #[test]
    fn test_rejects_bad_magic() {
        let mut image = write_code(&sample_code());
        image[0] = b'x';
        let err = read_code(&image).unwrap_err();
        assert_eq!(err.kind, ErrorKind::FileError);
        assert!(err.message.contains("magic"));
    }

    #[test]
    fn test_rejects_wrong_version() {
        let mut image = write_code(&sample_code());
        image[5] = b'9';
        let err = read_code(&image).unwrap_err();
        assert!(err.message.contains("version"));
    }

    #[test]
    fn test_rejects_out_of_order_sections() {
        let code = sample_code();
        let mut image = Vec::new();
        image.extend_from_slice(FILE_MAGIC);
        image.extend_from_slice(FILE_VERSION);
        image.extend_from_slice(&[0u8; 5]);
        // .global before .const
        image.extend_from_slice(GLOBAL_TAG);
        let err = read_code(&image).unwrap_err();
        assert!(err.message.contains(".const"));
        drop(code);
    }

    #[test]
    fn test_rejects_truncated_image() {
        let image = write_code(&sample_code());
        let err = read_code(&image[..20]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::FileError);
    }

    #[test]
    fn test_line_markers_rebuilt_from_stream() {
        let mut code = Code::new();
        let file_idx = code.add_str_constant("lined.dv");
        code.functions.push(FunctionObject {
            name: "@main".to_string(),
            filename: "lined.dv".to_string(),
            first_line: 1,
            num_params: 0,
            defaults: vec![],
            num_locals: 0,
            local_names: vec![],
            names: vec![],
            addr: 0,
            is_method: false,
        });
        code.bytes.push(u8::from(Opcode::LineNum));
        code.bytes.extend_from_slice(&7u32.to_le_bytes());
        code.bytes.extend_from_slice(&file_idx.to_le_bytes());
        code.bytes.push(u8::from(Opcode::Halt));

        let back = read_code(&write_code(&code)).unwrap();
        let entry = back.lines.lookup(0).unwrap();
        assert_eq!(entry.line, 7);
        assert_eq!(&*entry.file, "lined.dv");
    }
}
