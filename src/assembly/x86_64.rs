use std::fmt;

/// General-purpose registers used by the backend.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Register {
    Rax,
    Rcx,
    Rdx,
    Rsi,
    Rdi,
    Rsp,
    R8,
    R9,
}

impl Register {
    /// The caller-saved rotation holding simulated operand-stack slots: the
    /// n-th live slot lives in `ROTATION[n % ROTATION.len()]` until the
    /// rotation is exhausted and slots spill to the native stack.
    pub const ROTATION: [Register; 6] = [
        Register::Rcx,
        Register::Rdx,
        Register::Rsi,
        Register::Rdi,
        Register::R8,
        Register::R9,
    ];

    /// System V AMD64 argument registers, in binding order. The receiver of
    /// a method call is the first argument.
    pub const ARGUMENTS: [Register; 6] = [
        Register::Rdi,
        Register::Rsi,
        Register::Rdx,
        Register::Rcx,
        Register::R8,
        Register::R9,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Register::Rax => "rax",
            Register::Rcx => "rcx",
            Register::Rdx => "rdx",
            Register::Rsi => "rsi",
            Register::Rdi => "rdi",
            Register::Rsp => "rsp",
            Register::R8 => "r8",
            Register::R9 => "r9",
        }
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An instruction operand, displayed in Intel syntax.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Operand {
    Register(Register),
    /// `qword ptr [base + offset]`
    Memory { base: Register, offset: i64 },
    Immediate(i64),
}

impl From<Register> for Operand {
    fn from(register: Register) -> Operand {
        Operand::Register(register)
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Operand::Register(register) => write!(f, "{register}"),
            Operand::Memory { base, offset } => {
                if offset == 0 {
                    write!(f, "qword ptr [{base}]")
                } else if offset > 0 {
                    write!(f, "qword ptr [{base} + {offset}]")
                } else {
                    write!(f, "qword ptr [{base} - {}]", -offset)
                }
            }
            Operand::Immediate(value) => write!(f, "{value}"),
        }
    }
}

/// The subset of x86-64 the backend emits, displayed in Intel syntax.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Instruction {
    Mov { dst: Operand, src: Operand },
    Add { dst: Operand, src: Operand },
    Push(Operand),
    Pop(Register),
    Call(String),
    Ret,
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::Mov { dst, src } => write!(f, "mov {dst}, {src}"),
            Instruction::Add { dst, src } => write!(f, "add {dst}, {src}"),
            Instruction::Push(operand) => write!(f, "push {operand}"),
            Instruction::Pop(register) => write!(f, "pop {register}"),
            Instruction::Call(label) => write!(f, "call {label}"),
            Instruction::Ret => f.write_str("ret"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn operands_render_in_intel_syntax() {
        let cases: &[(Operand, &str)] = &[
            (Operand::Register(Register::Rax), "rax"),
            (
                Operand::Memory {
                    base: Register::Rsp,
                    offset: 0,
                },
                "qword ptr [rsp]",
            ),
            (
                Operand::Memory {
                    base: Register::Rsp,
                    offset: 24,
                },
                "qword ptr [rsp + 24]",
            ),
            (
                Operand::Memory {
                    base: Register::Rdi,
                    offset: -8,
                },
                "qword ptr [rdi - 8]",
            ),
            (Operand::Immediate(-1), "-1"),
        ];
        for (operand, expected) in cases {
            assert_eq!(&operand.to_string(), expected);
        }
    }

    #[test]
    fn instructions_render_in_intel_syntax() {
        let mov = Instruction::Mov {
            dst: Register::Rcx.into(),
            src: Operand::Memory {
                base: Register::Rsp,
                offset: 16,
            },
        };
        assert_eq!(mov.to_string(), "mov rcx, qword ptr [rsp + 16]");
        assert_eq!(Instruction::Push(Operand::Immediate(0)).to_string(), "push 0");
        assert_eq!(Instruction::Pop(Register::R9).to_string(), "pop r9");
        assert_eq!(
            Instruction::Call("Integer__PLUS".to_string()).to_string(),
            "call Integer__PLUS"
        );
        assert_eq!(Instruction::Ret.to_string(), "ret");
    }
}
