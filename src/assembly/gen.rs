use std::{fmt, format_args as f, io, marker::PhantomData, str::FromStr};

use crate::{
    assembly::{
        env::{Darwin, Env, Linux},
        x86_64::{Instruction, Operand, Register},
    },
    code::stack::{DirectSubroutine, StackInstruction},
};

/// The qualified method that becomes the program entry point.
const ENTRY_QUALIFIED: &str = "Main::main";

/// Labels of the emitted runtime glue.
const ALLOC_ROUTINE: &str = "mica_alloc";
const PRINT_ROUTINE: &str = "mica_print";
const PRINT_FORMAT_LABEL: &str = ".Lmica_print_fmt";

pub type Result<T> = std::result::Result<T, Error>;

/// Derives an assembler-safe label from a qualified subroutine name:
/// namespace segments join with a double underscore and operator tokens
/// become words (`Integer::+` turns into `Integer__PLUS`).
pub fn mangle(name: &str) -> String {
    let segments: Vec<&str> = name
        .split("::")
        .map(|segment| match segment {
            "+" => "PLUS",
            "-" => "MINUS",
            "*" => "ASTERISK",
            "/" => "SLASH",
            other => other,
        })
        .collect();
    segments.join("__")
}

/// One stack-machine subroutine lowered to x86-64.
///
/// Operand-stack slots live in the caller-saved register rotation; once the
/// rotation is exhausted the oldest in-register slot spills to the native
/// stack (`spilled` counts those). Around every call, all in-register slots
/// are saved oldest-first and restored newest-first, tracked by
/// `registers_saved`; arguments are then bound from their saved stack slots
/// to the System V argument registers, receiver first.
pub struct AssemblySubroutine {
    label: String,
    instructions: Vec<Instruction>,
    /// Simulated operand-stack depth.
    stack_size: usize,
    /// Slots currently spilled to the native stack.
    spilled: usize,
    registers_saved: bool,
    local_count: usize,
}

impl AssemblySubroutine {
    pub fn lower<E: Env>(subroutine: &DirectSubroutine) -> Result<AssemblySubroutine> {
        let mut lowered = AssemblySubroutine {
            label: label_for::<E>(&subroutine.name),
            instructions: Vec::with_capacity(subroutine.instructions().len() * 2),
            stack_size: 0,
            spilled: 0,
            registers_saved: false,
            local_count: subroutine.local_variable_count,
        };
        lowered.prologue();
        for instruction in subroutine.instructions() {
            lowered.lower_instruction(instruction)?;
        }
        lowered.epilogue(subroutine.returns_value);
        Ok(lowered)
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Zero-initialized slots for the frame's local variables.
    fn prologue(&mut self) {
        for _ in 0..self.local_count {
            self.emit(Instruction::Push(Operand::Immediate(0)));
        }
    }

    /// Moves the result (if any) to `rax`, rewinds the native stack and
    /// returns. Every subroutine ends here; `ret` is never omitted.
    fn epilogue(&mut self, returns_value: bool) {
        if returns_value {
            let register = self.pop_slot();
            self.emit(Instruction::Mov {
                dst: Register::Rax.into(),
                src: register.into(),
            });
        }
        let rewind = self.local_count + self.spilled;
        if rewind > 0 {
            self.emit(Instruction::Add {
                dst: Register::Rsp.into(),
                src: Operand::Immediate(8 * rewind as i64),
            });
        }
        self.emit(Instruction::Ret);
    }

    fn lower_instruction(&mut self, instruction: &StackInstruction) -> Result<()> {
        match instruction {
            StackInstruction::Load { from_top } => {
                let register = self.push_slot();
                let src = self.local_operand(*from_top);
                self.emit(Instruction::Mov {
                    dst: register.into(),
                    src,
                });
            }
            StackInstruction::Store { from_top } => {
                let register = self.pop_slot();
                let dst = self.local_operand(*from_top);
                self.emit(Instruction::Mov {
                    dst,
                    src: register.into(),
                });
            }
            StackInstruction::Dereference { offset } => {
                let register = self.top_register();
                self.emit(Instruction::Mov {
                    dst: register.into(),
                    src: Operand::Memory {
                        base: register,
                        offset: *offset as i64,
                    },
                });
            }
            StackInstruction::DereferenceStore { offset } => {
                let value = self.pop_slot();
                let pointer = self.pop_slot();
                self.emit(Instruction::Mov {
                    dst: Operand::Memory {
                        base: pointer,
                        offset: *offset as i64,
                    },
                    src: value.into(),
                });
            }
            StackInstruction::Pop => self.discard_slot(),
            StackInstruction::Call(subroutine) => {
                let label = mangle(subroutine.name());
                self.lower_call(
                    label,
                    subroutine.argument_count(),
                    subroutine.returns_value(),
                )?;
            }
            StackInstruction::LoadConstant(constant) => {
                let register = self.push_slot();
                self.emit(Instruction::Mov {
                    dst: register.into(),
                    src: Operand::Immediate(*constant as i64),
                });
            }
            StackInstruction::Allocate => {
                self.lower_call(ALLOC_ROUTINE.to_string(), 1, true)?;
            }
            StackInstruction::Duplicate => {
                let top = self.top_register();
                let register = self.push_slot();
                self.emit(Instruction::Mov {
                    dst: register.into(),
                    src: top.into(),
                });
            }
            StackInstruction::Print => {
                // Reads the top slot without consuming it.
                self.save_registers();
                self.emit(Instruction::Mov {
                    dst: Register::ARGUMENTS[0].into(),
                    src: Operand::Memory {
                        base: Register::Rsp,
                        offset: 0,
                    },
                });
                self.emit(Instruction::Call(PRINT_ROUTINE.to_string()));
                self.restore_registers();
            }
        }
        Ok(())
    }

    /// Lowers a call consuming `consumed` operand slots (receiver deepest).
    fn lower_call(&mut self, label: String, consumed: usize, returns_value: bool) -> Result<()> {
        if consumed > Register::ARGUMENTS.len() {
            return Err(Error::TooManyArguments {
                routine: label,
                count: consumed,
            });
        }
        debug_assert!(consumed <= self.stack_size, "operand stack underflow");

        self.save_registers();
        // Every live slot now sits on the native stack, the newest at [rsp],
        // so the i-th argument reads from depth `consumed - 1 - i`.
        for (index, &register) in Register::ARGUMENTS[..consumed].iter().enumerate() {
            let depth = consumed - 1 - index;
            self.emit(Instruction::Mov {
                dst: register.into(),
                src: Operand::Memory {
                    base: Register::Rsp,
                    offset: 8 * depth as i64,
                },
            });
        }
        self.emit(Instruction::Call(label));
        self.restore_registers();

        for _ in 0..consumed {
            self.discard_slot();
        }
        if returns_value {
            let register = self.push_slot();
            self.emit(Instruction::Mov {
                dst: register.into(),
                src: Register::Rax.into(),
            });
        }
        Ok(())
    }

    /// Saves all in-register slots to the native stack, oldest first.
    fn save_registers(&mut self) {
        debug_assert!(!self.registers_saved, "registers already saved");
        for index in self.spilled..self.stack_size {
            self.emit(Instruction::Push(Self::slot_register(index).into()));
        }
        self.registers_saved = true;
    }

    /// Restores what [`Self::save_registers`] pushed, newest first.
    fn restore_registers(&mut self) {
        if self.registers_saved {
            for index in (self.spilled..self.stack_size).rev() {
                self.emit(Instruction::Pop(Self::slot_register(index)));
            }
            self.registers_saved = false;
        }
    }

    fn in_registers(&self) -> usize {
        self.stack_size - self.spilled
    }

    fn slot_register(index: usize) -> Register {
        Register::ROTATION[index % Register::ROTATION.len()]
    }

    /// Accounts for a new operand slot and returns its register, spilling
    /// the oldest in-register slot if the rotation is full.
    fn push_slot(&mut self) -> Register {
        if self.in_registers() == Register::ROTATION.len() {
            self.emit(Instruction::Push(Self::slot_register(self.spilled).into()));
            self.spilled += 1;
        }
        let register = Self::slot_register(self.stack_size);
        self.stack_size += 1;
        register
    }

    /// Ensures the top slot is in its rotation register, reloading it from
    /// the native stack if it had spilled.
    fn materialize_top(&mut self) {
        if self.in_registers() == 0 {
            self.spilled -= 1;
            self.emit(Instruction::Pop(Self::slot_register(self.stack_size - 1)));
        }
    }

    fn top_register(&mut self) -> Register {
        self.materialize_top();
        Self::slot_register(self.stack_size - 1)
    }

    fn pop_slot(&mut self) -> Register {
        let register = self.top_register();
        self.stack_size -= 1;
        register
    }

    /// Drops the top slot without reading it.
    fn discard_slot(&mut self) {
        if self.in_registers() == 0 {
            self.emit(Instruction::Add {
                dst: Register::Rsp.into(),
                src: Operand::Immediate(8),
            });
            self.spilled -= 1;
        }
        self.stack_size -= 1;
    }

    /// Address of a local-variable slot. Locals sit below the spill area:
    /// slot `from_top` lives at `rsp + 8 * (spilled + from_top)`.
    fn local_operand(&self, from_top: usize) -> Operand {
        Operand::Memory {
            base: Register::Rsp,
            offset: 8 * (self.spilled + from_top) as i64,
        }
    }

    fn emit(&mut self, instruction: Instruction) {
        self.instructions.push(instruction);
    }
}

impl fmt::Display for AssemblySubroutine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}:", self.label)?;
        for instruction in &self.instructions {
            writeln!(f, "    {instruction}")?;
        }
        Ok(())
    }
}

fn label_for<E: Env>(qualified: &str) -> String {
    if qualified == ENTRY_QUALIFIED {
        E::ENTRY_POINT.to_string()
    } else {
        mangle(qualified)
    }
}

/// Emits a whole program: global prologue, runtime glue, one labeled block
/// per subroutine, read-only data.
pub struct Generator<W, E> {
    writer: W,
    indent: bool,
    _env: PhantomData<E>,
}

impl<W, E> Generator<W, E>
where
    W: io::Write,
    E: Env,
{
    pub fn new(writer: W) -> Generator<W, E> {
        Generator {
            writer,
            indent: false,
            _env: PhantomData,
        }
    }

    pub fn generate(mut self, subroutines: &[DirectSubroutine]) -> Result<()> {
        self.g_prologue();
        self.g_native_routines();
        for subroutine in subroutines {
            self.g_subroutine(subroutine)?;
        }
        self.g_data();
        Ok(())
    }

    fn g_prologue(&mut self) {
        self.out(E::GLOBAL_PROLOGUE.trim_end());
        self.out(f!(".section {}", E::SECTION_TEXT));
        self.out_line();
    }

    /// Backend implementations of the native `Integer` operators and the
    /// allocator/printer glue the `alloc`/`print` instructions call into.
    fn g_native_routines(&mut self) {
        self.out("Integer__PLUS:");
        self.indented(|this| {
            this.out("lea rax, [rdi + rsi]");
            this.out("ret");
        });

        self.out("Integer__MINUS:");
        self.indented(|this| {
            this.out("mov rax, rdi");
            this.out("sub rax, rsi");
            this.out("ret");
        });

        self.out("Integer__ASTERISK:");
        self.indented(|this| {
            this.out("mov rax, rdi");
            this.out("imul rax, rsi");
            this.out("ret");
        });

        self.out("Integer__SLASH:");
        self.indented(|this| {
            this.out("mov rax, rdi");
            this.out("cqo");
            this.out("idiv rsi");
            this.out("ret");
        });

        self.out(f!("{ALLOC_ROUTINE}:"));
        self.indented(|this| {
            this.out(f!("jmp {}", E::MALLOC));
        });

        self.out(f!("{PRINT_ROUTINE}:"));
        self.indented(|this| {
            this.out("mov rsi, rdi");
            this.out(f!("lea rdi, [rip + {PRINT_FORMAT_LABEL}]"));
            this.out("xor eax, eax");
            this.out(f!("jmp {}", E::PRINTF));
        });
    }

    fn g_subroutine(&mut self, subroutine: &DirectSubroutine) -> Result<()> {
        let lowered = AssemblySubroutine::lower::<E>(subroutine)?;
        self.out(f!("# {}", subroutine.name));
        if subroutine.name == ENTRY_QUALIFIED {
            self.out(f!(".global {}", E::ENTRY_POINT));
        }
        self.out(f!("{}:", lowered.label()));
        self.indented(|this| {
            for instruction in lowered.instructions() {
                this.out(instruction);
            }
        });
        Ok(())
    }

    fn g_data(&mut self) {
        self.out(f!(".section {}", E::SECTION_READ_ONLY_DATA));
        self.out(f!("{PRINT_FORMAT_LABEL}:"));
        self.indented(|this| {
            this.out(".asciz \"%ld\\n\"");
        });
    }
}

/// Utility functions.
impl<W, E> Generator<W, E>
where
    W: io::Write,
{
    /// Prints a line.
    fn out(&mut self, f: impl fmt::Display) {
        let indent = if self.indent { "    " } else { "" };
        writeln!(self.writer, "{indent}{f}").expect("failed to write to sink");
    }

    /// Prints an empty line.
    fn out_line(&mut self) {
        writeln!(self.writer).expect("failed to write to sink");
    }

    /// Writes an indented block that is finished with an empty line.
    fn indented<T>(&mut self, f: impl FnOnce(&mut Self) -> T) -> T {
        self.indent = true;
        let res = f(self);
        self.indent = false;
        self.out_line();
        res
    }
}

/// Lowers every subroutine for the given target and writes the program text.
pub fn generate<W>(writer: W, target: Target, subroutines: &[DirectSubroutine]) -> Result<()>
where
    W: io::Write,
{
    match target {
        Target::X86_64Linux => Generator::<_, Linux>::new(writer).generate(subroutines),
        Target::X86_64Darwin => Generator::<_, Darwin>::new(writer).generate(subroutines),
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Target {
    X86_64Linux,
    X86_64Darwin,
}

impl Target {
    pub const ALL: &[Target] = &[Target::X86_64Linux, Target::X86_64Darwin];

    pub const fn triple(&self) -> &'static str {
        match self {
            Target::X86_64Linux => "x86_64-unknown-linux-gnu",
            Target::X86_64Darwin => "x86_64-apple-darwin",
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::X86_64Linux => f.write_str("x86_64-linux"),
            Target::X86_64Darwin => f.write_str("x86_64-darwin"),
        }
    }
}

impl FromStr for Target {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Target, String> {
        match s {
            "x86_64-linux" => Ok(Target::X86_64Linux),
            "x86_64-darwin" => Ok(Target::X86_64Darwin),
            _ => Err(format!("unknown target `{s}`")),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum Error {
    /// More call operands than argument registers. A hard compile-time
    /// limitation of this backend, not a runtime condition.
    TooManyArguments { routine: String, count: usize },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::TooManyArguments { routine, count } => write!(
                f,
                "not yet implemented: `{routine}` takes {count} operands, \
                 but only {} argument registers are available",
                Register::ARGUMENTS.len()
            ),
        }
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::code::stack::{StackInstruction, Subroutine, SubroutineLink};
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use std::rc::Rc;

    fn call(name: &str, argument_count: usize, returns_value: bool) -> StackInstruction {
        StackInstruction::Call(Rc::new(Subroutine::Link(SubroutineLink {
            name: name.to_string(),
            argument_count,
            returns_value,
        })))
    }

    fn subroutine(
        name: &str,
        locals: usize,
        returns_value: bool,
        instructions: Vec<StackInstruction>,
    ) -> DirectSubroutine {
        let mut subroutine = DirectSubroutine::new(name.to_string(), 0, locals, returns_value);
        for instruction in instructions {
            subroutine.add_instruction(instruction);
        }
        subroutine
    }

    #[test]
    fn mangling_replaces_operators_and_joins_segments() {
        let cases = [
            ("Integer::+", "Integer__PLUS"),
            ("Integer::-", "Integer__MINUS"),
            ("Integer::*", "Integer__ASTERISK"),
            ("Integer::/", "Integer__SLASH"),
            ("Point::scale", "Point__scale"),
            ("tick", "tick"),
        ];
        for (name, expected) in cases {
            assert_eq!(mangle(name), expected);
        }
    }

    #[test]
    fn entry_point_label_follows_the_environment() {
        let main = subroutine("Main::main", 0, false, Vec::new());
        let linux = AssemblySubroutine::lower::<Linux>(&main).unwrap();
        assert_eq!(linux.label(), "main");
        let darwin = AssemblySubroutine::lower::<Darwin>(&main).unwrap();
        assert_eq!(darwin.label(), "_main");
    }

    #[test]
    fn rotation_overflow_spills_exactly_the_excess() {
        use StackInstruction::*;
        let live = 8;
        let instructions = (0..live)
            .map(|n| LoadConstant(n))
            .chain((0..live).map(|_| Pop))
            .collect();
        let lowered =
            AssemblySubroutine::lower::<Linux>(&subroutine("test", 0, false, instructions))
                .unwrap();

        // Two slots past the rotation: exactly two spill pushes, matched by
        // two stack rewinds when the spilled slots are popped.
        assert_eq!(
            lowered.instructions(),
            &[
                Instruction::Mov {
                    dst: Register::Rcx.into(),
                    src: Operand::Immediate(0)
                },
                Instruction::Mov {
                    dst: Register::Rdx.into(),
                    src: Operand::Immediate(1)
                },
                Instruction::Mov {
                    dst: Register::Rsi.into(),
                    src: Operand::Immediate(2)
                },
                Instruction::Mov {
                    dst: Register::Rdi.into(),
                    src: Operand::Immediate(3)
                },
                Instruction::Mov {
                    dst: Register::R8.into(),
                    src: Operand::Immediate(4)
                },
                Instruction::Mov {
                    dst: Register::R9.into(),
                    src: Operand::Immediate(5)
                },
                Instruction::Push(Register::Rcx.into()),
                Instruction::Mov {
                    dst: Register::Rcx.into(),
                    src: Operand::Immediate(6)
                },
                Instruction::Push(Register::Rdx.into()),
                Instruction::Mov {
                    dst: Register::Rdx.into(),
                    src: Operand::Immediate(7)
                },
                Instruction::Add {
                    dst: Register::Rsp.into(),
                    src: Operand::Immediate(8)
                },
                Instruction::Add {
                    dst: Register::Rsp.into(),
                    src: Operand::Immediate(8)
                },
                Instruction::Ret,
            ]
        );
    }

    #[test]
    fn calls_are_bracketed_by_save_and_restore_of_live_registers() {
        use StackInstruction::*;
        let lowered = AssemblySubroutine::lower::<Linux>(&subroutine(
            "test",
            0,
            true,
            vec![
                LoadConstant(1),
                LoadConstant(2),
                LoadConstant(3),
                call("Integer::+", 2, true),
            ],
        ))
        .unwrap();

        assert_eq!(
            lowered.instructions(),
            &[
                Instruction::Mov {
                    dst: Register::Rcx.into(),
                    src: Operand::Immediate(1)
                },
                Instruction::Mov {
                    dst: Register::Rdx.into(),
                    src: Operand::Immediate(2)
                },
                Instruction::Mov {
                    dst: Register::Rsi.into(),
                    src: Operand::Immediate(3)
                },
                // Save: the three live rotation registers, oldest first.
                Instruction::Push(Register::Rcx.into()),
                Instruction::Push(Register::Rdx.into()),
                Instruction::Push(Register::Rsi.into()),
                // Bind: receiver from the deeper slot, argument from the top.
                Instruction::Mov {
                    dst: Register::Rdi.into(),
                    src: Operand::Memory {
                        base: Register::Rsp,
                        offset: 8
                    }
                },
                Instruction::Mov {
                    dst: Register::Rsi.into(),
                    src: Operand::Memory {
                        base: Register::Rsp,
                        offset: 0
                    }
                },
                Instruction::Call("Integer__PLUS".to_string()),
                // Restore: newest first.
                Instruction::Pop(Register::Rsi),
                Instruction::Pop(Register::Rdx),
                Instruction::Pop(Register::Rcx),
                // The two consumed slots vanish; the result takes the next
                // rotation register.
                Instruction::Mov {
                    dst: Register::Rdx.into(),
                    src: Register::Rax.into()
                },
                // Epilogue.
                Instruction::Mov {
                    dst: Register::Rax.into(),
                    src: Register::Rdx.into()
                },
                Instruction::Ret,
            ]
        );
    }

    #[test]
    fn locals_are_zeroed_on_entry_and_rewound_on_exit() {
        use StackInstruction::*;
        let lowered = AssemblySubroutine::lower::<Linux>(&subroutine(
            "test",
            2,
            false,
            vec![LoadConstant(9), Store { from_top: 1 }],
        ))
        .unwrap();
        assert_eq!(
            lowered.to_string(),
            indoc! {"
                test:
                    push 0
                    push 0
                    mov rcx, 9
                    mov qword ptr [rsp + 8], rcx
                    add rsp, 16
                    ret
            "}
        );
    }

    #[test]
    fn too_many_call_operands_is_a_backend_limitation() {
        use StackInstruction::*;
        let instructions = (0..7)
            .map(|n| LoadConstant(n))
            .chain([call("Wide::spread", 7, false)])
            .collect();
        let result =
            AssemblySubroutine::lower::<Linux>(&subroutine("test", 0, false, instructions));
        assert_eq!(
            result.err(),
            Some(Error::TooManyArguments {
                routine: "Wide__spread".to_string(),
                count: 7,
            })
        );
    }

    #[test]
    fn program_emission_contains_prologue_natives_and_entry() {
        let main = subroutine("Main::main", 0, false, Vec::new());
        let mut buffer = Vec::with_capacity(1024);
        generate(&mut buffer, Target::X86_64Linux, &[main]).unwrap();
        let text = String::from_utf8(buffer).unwrap();

        for expected in [
            ".intel_syntax noprefix",
            ".section .text",
            "Integer__PLUS:",
            "Integer__SLASH:",
            "mica_alloc:",
            "jmp malloc",
            "# Main::main",
            ".global main",
            "main:",
            ".section .rodata",
        ] {
            assert!(text.contains(expected), "missing `{expected}` in:\n{text}");
        }
    }
}
