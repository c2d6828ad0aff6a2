//! Opcode definitions for the bytecode VM.
//!
//! Bytecode is a raw `Vec<u8>`: one byte of opcode followed by its operands.
//! Operand widths are fixed per opcode:
//!
//! - no operand: `Add`, `Pop`, `Return`, ...
//! - `u8`: argument counts and flags (`Call`, `GetIndex`)
//! - `u16` little-endian: constant indexes, local/up-value slots, jump
//!   offsets, element counts
//! - compound: `Invoke` (u16 name + u8 argc), `Method` (u16 name + u8
//!   static flag), `Try` (u16 class + u16 catch + u16 finally), `Closure`
//!   (u16 function + one `(u8, u16)` pair per capture)

use strum::{Display, FromRepr, IntoStaticStr};

/// A single VM instruction tag.
///
/// The discriminant is the byte stored in a [`Blob`](super::Blob); decode
/// with [`Opcode::from_repr`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, FromRepr, IntoStaticStr)]
#[repr(u8)]
pub enum Opcode {
    // constants
    Constant,
    Nil,
    True,
    False,
    Empty,
    One,

    // arithmetic
    Add,
    Subtract,
    Multiply,
    Divide,
    FDivide,
    Reminder,
    Pow,
    Negate,

    // bitwise (integer-truncated operands)
    BitAnd,
    BitOr,
    BitXor,
    LShift,
    RShift,
    BitNot,

    // comparison
    Equal,
    Greater,
    Less,
    Not,

    // stack
    Pop,
    PopN,
    Dup,
    CloseUpValue,

    // jumps
    Jump,
    JumpIfFalse,
    Loop,
    /// Placeholder emitted by `break`; rewritten to a forward [`Opcode::Jump`]
    /// when the enclosing loop is closed. Never reaches the VM.
    BreakPlaceholder,

    // variables
    DefineGlobal,
    GetGlobal,
    SetGlobal,
    GetLocal,
    SetLocal,
    GetUpValue,
    SetUpValue,
    GetProperty,
    SetProperty,
    GetSelfProperty,

    // calls
    Call,
    Invoke,
    InvokeSelf,
    SuperInvoke,
    SuperInvokeSelf,
    Return,

    // closures and classes
    Closure,
    Class,
    Method,
    ClassProperty,
    Inherit,
    GetSuper,

    // containers
    List,
    Range,
    Dict,
    GetIndex,
    GetRangedIndex,
    SetIndex,

    // modules
    CallImport,
    NativeModule,
    SelectImport,
    SelectNativeImport,
    ImportAll,
    ImportAllNative,
    EjectImport,
    EjectNativeImport,

    // exceptions
    Try,
    PopTry,
    PublishTry,
    BeginCatch,
    EndCatch,
    Die,

    // misc
    Echo,
    Stringify,
    Assert,
    Switch,
    Choice,
}

/// Operand sentinel for "no class" in a [`Opcode::Try`] instruction.
pub const TRY_NO_CLASS: u16 = u16::MAX;

/// Operand sentinel for "no catch block" / "no finally block" addresses.
pub const TRY_NO_ADDRESS: u16 = u16::MAX;

impl Opcode {
    /// Returns the total operand width in bytes, excluding the opcode byte.
    ///
    /// [`Opcode::Closure`] is variable-width (the constant operand is
    /// followed by capture descriptors); this returns only the fixed part.
    #[must_use]
    pub fn operand_width(self) -> usize {
        match self {
            Self::Constant
            | Self::PopN
            | Self::Jump
            | Self::JumpIfFalse
            | Self::Loop
            | Self::BreakPlaceholder
            | Self::DefineGlobal
            | Self::GetGlobal
            | Self::SetGlobal
            | Self::GetLocal
            | Self::SetLocal
            | Self::GetUpValue
            | Self::SetUpValue
            | Self::GetProperty
            | Self::SetProperty
            | Self::GetSelfProperty
            | Self::Class
            | Self::GetSuper
            | Self::List
            | Self::Dict
            | Self::CallImport
            | Self::ImportAll
            | Self::ImportAllNative
            | Self::EjectImport
            | Self::EjectNativeImport
            | Self::Switch
            | Self::Closure => 2,
            Self::Call | Self::GetIndex => 1,
            Self::Invoke
            | Self::InvokeSelf
            | Self::SuperInvoke
            | Self::SuperInvokeSelf
            | Self::Method
            | Self::ClassProperty => 3,
            Self::SelectImport | Self::SelectNativeImport | Self::NativeModule => 4,
            Self::Try => 6,
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Opcode;

    #[test]
    fn round_trips_through_repr() {
        for byte in 0..=u8::MAX {
            if let Some(op) = Opcode::from_repr(byte) {
                assert_eq!(op as u8, byte);
            }
        }
        assert_eq!(Opcode::from_repr(Opcode::Choice as u8), Some(Opcode::Choice));
    }

    #[test]
    fn operand_widths_cover_compound_encodings() {
        assert_eq!(Opcode::Try.operand_width(), 6);
        assert_eq!(Opcode::Invoke.operand_width(), 3);
        assert_eq!(Opcode::SelectImport.operand_width(), 4);
        assert_eq!(Opcode::Return.operand_width(), 0);
    }
}
