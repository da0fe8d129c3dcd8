use std::{collections::HashMap, fmt, rc::Rc};

/// The machine word: every operand-stack and variable-stack slot holds one.
pub type Word = u64;

/// Architecture-neutral stack-machine instructions.
///
/// Instructions operate on an operand stack and a separate variable stack.
/// They are primarily an intermediary format for code generation; the
/// [`StackMachine`] interprets them for correctness testing.
#[derive(Clone)]
pub enum StackInstruction {
    /// Push `variable_stack[top - from_top]` onto the operand stack.
    Load { from_top: usize },
    /// Pop the operand stack into `variable_stack[top - from_top]`.
    Store { from_top: usize },
    /// Pop a pointer, push the word at `pointer + offset`.
    Dereference { offset: usize },
    /// Pop a value and a pointer, write the value to `pointer + offset`.
    DereferenceStore { offset: usize },
    /// Discard the top of the operand stack.
    Pop,
    /// Invoke a subroutine.
    Call(Rc<Subroutine>),
    /// Push a literal word.
    LoadConstant(Word),
    /// Pop a size in bytes, push the address of a fresh block of that size.
    Allocate,
    /// Push a copy of the top of the operand stack.
    Duplicate,
    /// Print the top of the operand stack without popping. Debug only.
    Print,
}

impl fmt::Display for StackInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StackInstruction::Load { from_top } => write!(f, "load {from_top}"),
            StackInstruction::Store { from_top } => write!(f, "store {from_top}"),
            StackInstruction::Dereference { offset } => write!(f, "deref {offset}"),
            StackInstruction::DereferenceStore { offset } => write!(f, "derefstore {offset}"),
            StackInstruction::Pop => f.write_str("pop"),
            StackInstruction::Call(subroutine) => {
                write!(f, "call {} {}", subroutine.name(), subroutine.argument_count())
            }
            StackInstruction::LoadConstant(constant) => write!(f, "const {constant}"),
            StackInstruction::Allocate => f.write_str("alloc"),
            StackInstruction::Duplicate => f.write_str("dup"),
            StackInstruction::Print => f.write_str("print"),
        }
    }
}

/// A callable unit of stack-machine code.
///
/// `argument_count` counts every operand-stack slot the call consumes,
/// receiver included.
pub enum Subroutine {
    /// A subroutine with a body, directly executable and disassemblable.
    Direct(DirectSubroutine),
    /// A named external reference with no body; used for calls to routines
    /// that are resolved later (forward references, native routines).
    Link(SubroutineLink),
}

impl Subroutine {
    pub fn name(&self) -> &str {
        match self {
            Subroutine::Direct(direct) => &direct.name,
            Subroutine::Link(link) => &link.name,
        }
    }

    pub fn argument_count(&self) -> usize {
        match self {
            Subroutine::Direct(direct) => direct.argument_count,
            Subroutine::Link(link) => link.argument_count,
        }
    }

    pub fn returns_value(&self) -> bool {
        match self {
            Subroutine::Direct(direct) => direct.returns_value,
            Subroutine::Link(link) => link.returns_value,
        }
    }
}

pub struct SubroutineLink {
    pub name: String,
    pub argument_count: usize,
    /// Whether a call leaves a result on the operand stack.
    pub returns_value: bool,
}

pub struct DirectSubroutine {
    pub name: String,
    pub argument_count: usize,
    /// Variable-stack slots pushed on entry and popped on exit.
    pub local_variable_count: usize,
    /// Whether the subroutine leaves a result on the operand stack.
    pub returns_value: bool,
    instructions: Vec<StackInstruction>,
}

impl DirectSubroutine {
    pub fn new(
        name: String,
        argument_count: usize,
        local_variable_count: usize,
        returns_value: bool,
    ) -> Self {
        DirectSubroutine {
            name,
            argument_count,
            local_variable_count,
            returns_value,
            instructions: Vec::with_capacity(16),
        }
    }

    pub fn add_instruction(&mut self, instruction: StackInstruction) {
        self.instructions.push(instruction);
    }

    pub fn instructions(&self) -> &[StackInstruction] {
        &self.instructions
    }
}

/// Disassembly: a header followed by one indented line per instruction, in
/// exactly the order the instructions were appended.
impl fmt::Display for DirectSubroutine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "subroutine {} (args {}, locals {})",
            self.name, self.argument_count, self.local_variable_count
        )?;
        for instruction in &self.instructions {
            writeln!(f, "    {instruction}")?;
        }
        Ok(())
    }
}

pub type NativeRoutine = fn(&mut Vec<Word>) -> Result<(), MachineError>;

#[derive(Clone)]
enum Routine {
    Direct(Rc<DirectSubroutine>),
    Native(NativeRoutine),
}

/// The reference interpreter.
///
/// Owns the operand stack, the variable stack, a word-addressed heap for
/// `Allocate`/`Dereference`, and a registry resolving subroutine links by
/// name. The four `Integer` operators are pre-registered as native routines.
pub struct StackMachine {
    pub operands: Vec<Word>,
    pub variables: Vec<Word>,
    heap: Vec<Word>,
    routines: HashMap<String, Routine>,
}

impl StackMachine {
    pub fn new() -> StackMachine {
        let mut machine = StackMachine {
            operands: Vec::with_capacity(32),
            variables: Vec::with_capacity(32),
            // One sentinel word keeps address zero out of circulation.
            heap: vec![0],
            routines: HashMap::new(),
        };
        machine.register_native("Integer::+", native::add);
        machine.register_native("Integer::-", native::sub);
        machine.register_native("Integer::*", native::mul);
        machine.register_native("Integer::/", native::div);
        machine
    }

    /// Makes a direct subroutine resolvable through links carrying its name.
    pub fn register(&mut self, subroutine: Rc<DirectSubroutine>) {
        self.routines
            .insert(subroutine.name.clone(), Routine::Direct(subroutine));
    }

    pub fn register_native(&mut self, name: &str, routine: NativeRoutine) {
        self.routines
            .insert(name.to_string(), Routine::Native(routine));
    }

    /// Executes a subroutine body: pushes its zero-initialized local slots,
    /// runs every instruction in order, then pops the slots again.
    pub fn run(&mut self, subroutine: &DirectSubroutine) -> Result<(), MachineError> {
        let base = self.variables.len();
        self.variables
            .resize(base + subroutine.local_variable_count, 0);
        let result = subroutine
            .instructions
            .iter()
            .try_for_each(|instruction| self.step(instruction));
        self.variables.truncate(base);
        result
    }

    fn step(&mut self, instruction: &StackInstruction) -> Result<(), MachineError> {
        match instruction {
            StackInstruction::Load { from_top } => {
                let value = self.variables[self.slot(*from_top)?];
                self.operands.push(value);
            }
            StackInstruction::Store { from_top } => {
                let value = self.pop()?;
                let slot = self.slot(*from_top)?;
                self.variables[slot] = value;
            }
            StackInstruction::Dereference { offset } => {
                let pointer = self.pop()?;
                let value = self.read_word(pointer + *offset as Word)?;
                self.operands.push(value);
            }
            StackInstruction::DereferenceStore { offset } => {
                let value = self.pop()?;
                let pointer = self.pop()?;
                self.write_word(pointer + *offset as Word, value)?;
            }
            StackInstruction::Pop => {
                self.pop()?;
            }
            StackInstruction::Call(subroutine) => {
                let subroutine = Rc::clone(subroutine);
                self.call(&subroutine)?;
            }
            StackInstruction::LoadConstant(constant) => self.operands.push(*constant),
            StackInstruction::Allocate => {
                let size = self.pop()?;
                let words = (size.div_ceil(8) as usize).max(1);
                let address = (self.heap.len() * 8) as Word;
                self.heap.resize(self.heap.len() + words, 0);
                self.operands.push(address);
            }
            StackInstruction::Duplicate => {
                let top = *self.top()?;
                self.operands.push(top);
            }
            StackInstruction::Print => println!("{}", self.top()?),
        }
        Ok(())
    }

    fn call(&mut self, subroutine: &Subroutine) -> Result<(), MachineError> {
        match subroutine {
            Subroutine::Direct(direct) => self.run(direct),
            Subroutine::Link(link) => {
                let routine = self
                    .routines
                    .get(&link.name)
                    .cloned()
                    .ok_or_else(|| MachineError::UnresolvedCall(link.name.clone()))?;
                match routine {
                    Routine::Direct(direct) => self.run(&direct),
                    Routine::Native(native) => native(&mut self.operands),
                }
            }
        }
    }

    fn pop(&mut self) -> Result<Word, MachineError> {
        self.operands.pop().ok_or(MachineError::StackUnderflow)
    }

    fn top(&self) -> Result<&Word, MachineError> {
        self.operands.last().ok_or(MachineError::StackUnderflow)
    }

    fn slot(&self, from_top: usize) -> Result<usize, MachineError> {
        if from_top < self.variables.len() {
            Ok(self.variables.len() - 1 - from_top)
        } else {
            Err(MachineError::BadSlot { from_top })
        }
    }

    fn word_index(&self, address: Word) -> Result<usize, MachineError> {
        let index = (address / 8) as usize;
        if address % 8 == 0 && index < self.heap.len() {
            Ok(index)
        } else {
            Err(MachineError::BadAddress { address })
        }
    }

    fn read_word(&self, address: Word) -> Result<Word, MachineError> {
        Ok(self.heap[self.word_index(address)?])
    }

    fn write_word(&mut self, address: Word, value: Word) -> Result<(), MachineError> {
        let index = self.word_index(address)?;
        self.heap[index] = value;
        Ok(())
    }
}

impl Default for StackMachine {
    fn default() -> Self {
        StackMachine::new()
    }
}

/// Native routines standing in for backend-implemented subroutines. Each
/// consumes its receiver and argument from the operand stack and pushes the
/// result, matching the calling discipline of generated code.
mod native {
    use super::{MachineError, Word};

    fn binary(
        operands: &mut Vec<Word>,
        apply: impl Fn(i64, i64) -> i64,
    ) -> Result<(), MachineError> {
        let rhs = operands.pop().ok_or(MachineError::StackUnderflow)? as i64;
        let lhs = operands.pop().ok_or(MachineError::StackUnderflow)? as i64;
        operands.push(apply(lhs, rhs) as Word);
        Ok(())
    }

    pub fn add(operands: &mut Vec<Word>) -> Result<(), MachineError> {
        binary(operands, i64::wrapping_add)
    }

    pub fn sub(operands: &mut Vec<Word>) -> Result<(), MachineError> {
        binary(operands, i64::wrapping_sub)
    }

    pub fn mul(operands: &mut Vec<Word>) -> Result<(), MachineError> {
        binary(operands, i64::wrapping_mul)
    }

    pub fn div(operands: &mut Vec<Word>) -> Result<(), MachineError> {
        let rhs = operands.pop().ok_or(MachineError::StackUnderflow)? as i64;
        let lhs = operands.pop().ok_or(MachineError::StackUnderflow)? as i64;
        if rhs == 0 {
            return Err(MachineError::DivisionByZero);
        }
        operands.push(lhs.wrapping_div(rhs) as Word);
        Ok(())
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum MachineError {
    StackUnderflow,
    BadSlot { from_top: usize },
    BadAddress { address: Word },
    UnresolvedCall(String),
    DivisionByZero,
}

impl fmt::Display for MachineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MachineError::StackUnderflow => f.write_str("operand stack underflow"),
            MachineError::BadSlot { from_top } => {
                write!(f, "variable stack has no slot {from_top} from the top")
            }
            MachineError::BadAddress { address } => write!(f, "bad heap address {address:#x}"),
            MachineError::UnresolvedCall(name) => write!(f, "call to unresolved routine `{name}`"),
            MachineError::DivisionByZero => f.write_str("division by zero"),
        }
    }
}

impl std::error::Error for MachineError {}
