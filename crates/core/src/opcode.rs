//! Virtual machine opcodes
//!
//! Instructions are a single opcode byte followed by zero or more 32-bit
//! little-endian operands. Jump targets are absolute offsets into the owning
//! module's instruction bytes.
//!
//! Several high-traffic operations carry no-operand shortcut forms
//! (`pushlocal0`..`pushlocal9`, `push0`..`push3`, ...) that the compiler
//! prefers when the operand is small; the VM treats them identically to the
//! operand-carrying form.

use num_enum::{IntoPrimitive, TryFromPrimitive};

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum Opcode {
    Nop = 0,
    /// Discard tos.
    Pop,
    /// Push constant at pool index `<op0>`.
    Push,
    PushTrue,
    PushFalse,
    PushNull,
    PushZero,
    PushOne,
    // no-operand shortcuts for constant pool slots 0-3
    Push0,
    Push1,
    Push2,
    Push3,
    /// Push local slot `<op0>`.
    PushLocal,
    PushLocal0,
    PushLocal1,
    PushLocal2,
    PushLocal3,
    PushLocal4,
    PushLocal5,
    PushLocal6,
    PushLocal7,
    PushLocal8,
    PushLocal9,
    /// Push the value bound to global name `<op0>`, resolving through
    /// enclosing frames, module globals, the function table and loaded
    /// modules.
    PushGlobal,
    /// Pop tos and store to global name `<op0>`.
    StoreGlobal,
    /// Store `true` to global name `<op0>` without touching the stack.
    StoreTrue,
    StoreFalse,
    StoreNull,
    /// Pop tos and store into local slot `<op0>`.
    StoreLocal,
    StoreLocal0,
    StoreLocal1,
    StoreLocal2,
    StoreLocal3,
    StoreLocal4,
    StoreLocal5,
    StoreLocal6,
    StoreLocal7,
    StoreLocal8,
    StoreLocal9,
    /// Like `storelocal`, but marks slot `<op0>` as belonging to the current
    /// lexical block so `leave` releases it.
    DefLocal,
    DefLocal0,
    DefLocal1,
    DefLocal2,
    DefLocal3,
    DefLocal4,
    DefLocal5,
    DefLocal6,
    DefLocal7,
    DefLocal8,
    DefLocal9,
    /// Pop `2*<op0>` values (key/value pairs) and push a new map.
    NewMap,
    /// Pop `<op0>` values and push a new vector.
    NewVec,
    /// Pop `2*<op0>` key/value pairs and push a new class object.
    NewClass,
    /// Pop `<op0>` constructor arguments and a class object; push a new
    /// instance after running the constructor.
    NewInstance,
    /// Absolute jump to `<op0>`.
    Jmp,
    /// Pop tos; jump to `<op0>` if it coerces to false.
    Jmpf,
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    Or,
    And,
    Neg,
    Not,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    /// Call with `<op0>` arguments on the stack, callee below them.
    Call,
    /// As `call`, with the receiver below the callee passed as implicit self.
    CallMethod,
    /// Pop the return value, tear the frame down, resume the caller.
    Return,
    /// Execute `<op1>` leave ops, then jump to `<op0>`. Break/continue.
    ExitLoop,
    /// Enter a lexical block scope.
    Enter,
    /// Leave a lexical block scope, releasing locals defined inside it.
    Leave,
    /// Call `next()` on the enumerable on tos; push the item, then the
    /// has-more flag.
    ForIter,
    /// As `for_iter` for two-variable loops; pushes key, value, has-more.
    ForIterPair,
    /// tos = tos1[tos]
    TblLoad,
    /// As `tbl_load`, but leaves the receiver below the loaded value for a
    /// following `call_method`. Resolves built-in methods on vector, map and
    /// string receivers.
    MethodLoad,
    /// tos = tos2[tos1 : tos]
    LoadSlice2,
    /// tos = tos3[tos2 : tos1 : tos]
    LoadSlice3,
    /// tos2[tos1] = tos
    TblStore,
    /// tos3[tos2 : tos1] = tos
    StoreSlice2,
    /// tos4[tos3 : tos2 : tos1] = tos
    StoreSlice3,
    /// tos2[tos1] += tos, and the -, *, / and % variants
    AddTblStore,
    SubTblStore,
    MulTblStore,
    DivTblStore,
    ModTblStore,
    /// Duplicate the item `<op0>` below tos onto the top.
    Dup,
    /// Exchange tos and tos1.
    Swap,
    /// Rotate the top `<op0>` items, bringing the deepest to the top.
    Rot,
    /// Load module named at global-name index `<op0>` and bind it.
    Import,
    /// Debug info: set the current source line to `<op0>` in the file at
    /// constant-pool index `<op1>`.
    LineNum,
    /// Stop dispatch.
    Halt,
    /// Never emitted by a correct compiler; executing it is an ICE.
    Illegal = 255,
}

impl Opcode {
    /// Number of 32-bit operands following the opcode byte.
    pub fn num_operands(&self) -> usize {
        use Opcode::*;
        match self {
            Push | PushLocal | PushGlobal | StoreGlobal | StoreTrue | StoreFalse | StoreNull
            | StoreLocal | DefLocal | NewMap | NewVec | NewClass | NewInstance | Jmp | Jmpf
            | Call | CallMethod | Dup | Rot | Import => 1,
            ExitLoop | LineNum => 2,
            _ => 0,
        }
    }

    /// Mnemonic used by the disassembler and error messages.
    pub fn name(&self) -> &'static str {
        use Opcode::*;
        match self {
            Nop => "nop",
            Pop => "pop",
            Push => "push",
            PushTrue => "push_true",
            PushFalse => "push_false",
            PushNull => "push_null",
            PushZero => "push_zero",
            PushOne => "push_one",
            Push0 => "push0",
            Push1 => "push1",
            Push2 => "push2",
            Push3 => "push3",
            PushLocal => "pushlocal",
            PushLocal0 => "pushlocal0",
            PushLocal1 => "pushlocal1",
            PushLocal2 => "pushlocal2",
            PushLocal3 => "pushlocal3",
            PushLocal4 => "pushlocal4",
            PushLocal5 => "pushlocal5",
            PushLocal6 => "pushlocal6",
            PushLocal7 => "pushlocal7",
            PushLocal8 => "pushlocal8",
            PushLocal9 => "pushlocal9",
            PushGlobal => "pushglobal",
            StoreGlobal => "storeglobal",
            StoreTrue => "store_true",
            StoreFalse => "store_false",
            StoreNull => "store_null",
            StoreLocal => "storelocal",
            StoreLocal0 => "storelocal0",
            StoreLocal1 => "storelocal1",
            StoreLocal2 => "storelocal2",
            StoreLocal3 => "storelocal3",
            StoreLocal4 => "storelocal4",
            StoreLocal5 => "storelocal5",
            StoreLocal6 => "storelocal6",
            StoreLocal7 => "storelocal7",
            StoreLocal8 => "storelocal8",
            StoreLocal9 => "storelocal9",
            DefLocal => "def_local",
            DefLocal0 => "def_local0",
            DefLocal1 => "def_local1",
            DefLocal2 => "def_local2",
            DefLocal3 => "def_local3",
            DefLocal4 => "def_local4",
            DefLocal5 => "def_local5",
            DefLocal6 => "def_local6",
            DefLocal7 => "def_local7",
            DefLocal8 => "def_local8",
            DefLocal9 => "def_local9",
            NewMap => "new_map",
            NewVec => "new_vec",
            NewClass => "new_class",
            NewInstance => "new_instance",
            Jmp => "jmp",
            Jmpf => "jmpf",
            Eq => "eq",
            Neq => "neq",
            Lt => "lt",
            Lte => "lte",
            Gt => "gt",
            Gte => "gte",
            Or => "or",
            And => "and",
            Neg => "neg",
            Not => "not",
            Add => "add",
            Sub => "sub",
            Mul => "mul",
            Div => "div",
            Mod => "mod",
            Call => "call",
            CallMethod => "call_method",
            Return => "return",
            ExitLoop => "exit_loop",
            Enter => "enter",
            Leave => "leave",
            ForIter => "for_iter",
            ForIterPair => "for_iter_pair",
            TblLoad => "tbl_load",
            MethodLoad => "method_load",
            LoadSlice2 => "loadslice2",
            LoadSlice3 => "loadslice3",
            TblStore => "tbl_store",
            StoreSlice2 => "storeslice2",
            StoreSlice3 => "storeslice3",
            AddTblStore => "add_tbl_store",
            SubTblStore => "sub_tbl_store",
            MulTblStore => "mul_tbl_store",
            DivTblStore => "div_tbl_store",
            ModTblStore => "mod_tbl_store",
            Dup => "dup",
            Swap => "swap",
            Rot => "rot",
            Import => "import",
            LineNum => "line_num",
            Halt => "halt",
            Illegal => "illegal",
        }
    }

    /// The `pushlocal0`..`pushlocal9` shortcut for `slot`, if one exists.
    pub fn push_local_shortcut(slot: u32) -> Option<Opcode> {
        use Opcode::*;
        const SHORTCUTS: [Opcode; 10] = [
            PushLocal0, PushLocal1, PushLocal2, PushLocal3, PushLocal4, PushLocal5, PushLocal6,
            PushLocal7, PushLocal8, PushLocal9,
        ];
        SHORTCUTS.get(slot as usize).copied()
    }

    pub fn store_local_shortcut(slot: u32) -> Option<Opcode> {
        use Opcode::*;
        const SHORTCUTS: [Opcode; 10] = [
            StoreLocal0,
            StoreLocal1,
            StoreLocal2,
            StoreLocal3,
            StoreLocal4,
            StoreLocal5,
            StoreLocal6,
            StoreLocal7,
            StoreLocal8,
            StoreLocal9,
        ];
        SHORTCUTS.get(slot as usize).copied()
    }

    pub fn def_local_shortcut(slot: u32) -> Option<Opcode> {
        use Opcode::*;
        const SHORTCUTS: [Opcode; 10] = [
            DefLocal0, DefLocal1, DefLocal2, DefLocal3, DefLocal4, DefLocal5, DefLocal6,
            DefLocal7, DefLocal8, DefLocal9,
        ];
        SHORTCUTS.get(slot as usize).copied()
    }

    pub fn push_const_shortcut(idx: u32) -> Option<Opcode> {
        use Opcode::*;
        const SHORTCUTS: [Opcode; 4] = [Push0, Push1, Push2, Push3];
        SHORTCUTS.get(idx as usize).copied()
    }

    /// Decompose a shortcut opcode into its base form and implied operand.
    pub fn shortcut_slot(&self) -> Option<(Opcode, u32)> {
        use Opcode::*;
        let (base, n) = match self {
            Push0 | Push1 | Push2 | Push3 => (Push, *self as u32 - Push0 as u32),
            PushLocal0 | PushLocal1 | PushLocal2 | PushLocal3 | PushLocal4 | PushLocal5
            | PushLocal6 | PushLocal7 | PushLocal8 | PushLocal9 => {
                (PushLocal, *self as u32 - PushLocal0 as u32)
            }
            StoreLocal0 | StoreLocal1 | StoreLocal2 | StoreLocal3 | StoreLocal4 | StoreLocal5
            | StoreLocal6 | StoreLocal7 | StoreLocal8 | StoreLocal9 => {
                (StoreLocal, *self as u32 - StoreLocal0 as u32)
            }
            DefLocal0 | DefLocal1 | DefLocal2 | DefLocal3 | DefLocal4 | DefLocal5 | DefLocal6
            | DefLocal7 | DefLocal8 | DefLocal9 => (DefLocal, *self as u32 - DefLocal0 as u32),
            _ => return None,
        };
        Some((base, n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_round_trip() {
        for byte in 0u8..=255 {
            if let Ok(op) = Opcode::try_from(byte) {
                assert_eq!(u8::from(op), byte);
            }
        }
        assert!(matches!(Opcode::try_from(255u8), Ok(Opcode::Illegal)));
        assert!(Opcode::try_from(200u8).is_err());
    }

    #[test]
    fn test_shortcut_slots() {
        assert_eq!(
            Opcode::PushLocal7.shortcut_slot(),
            Some((Opcode::PushLocal, 7))
        );
        assert_eq!(Opcode::Push2.shortcut_slot(), Some((Opcode::Push, 2)));
        assert_eq!(Opcode::DefLocal0.shortcut_slot(), Some((Opcode::DefLocal, 0)));
        assert_eq!(Opcode::Add.shortcut_slot(), None);
    }

    #[test]
    fn test_shortcut_helpers_cover_range() {
        assert_eq!(Opcode::push_local_shortcut(9), Some(Opcode::PushLocal9));
        assert_eq!(Opcode::push_local_shortcut(10), None);
        assert_eq!(Opcode::push_const_shortcut(3), Some(Opcode::Push3));
        assert_eq!(Opcode::push_const_shortcut(4), None);
    }

    #[test]
    fn test_operand_counts() {
        assert_eq!(Opcode::Add.num_operands(), 0);
        assert_eq!(Opcode::Jmp.num_operands(), 1);
        assert_eq!(Opcode::ExitLoop.num_operands(), 2);
        assert_eq!(Opcode::LineNum.num_operands(), 2);
    }
}
