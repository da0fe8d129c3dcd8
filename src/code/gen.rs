use std::rc::Rc;

use crate::{
    code::stack::{DirectSubroutine, StackInstruction, Subroutine, SubroutineLink},
    semantic::{
        scope::{FrameLayout, VariableId},
        tree::{CallExpression, Class, Expression, MethodId, Program, Statement, StatementBlock},
    },
    util::intern::Interner,
};

/// Walks attributed method bodies and emits one stack-machine subroutine per
/// method.
///
/// Calls always consume the receiver along with the declared arguments, so a
/// generated subroutine's `argument_count` is the declared count plus one;
/// its entry instructions pop those operands into the method scope's
/// variable slots (receiver deepest, stored last).
pub struct StackCodeGenerator<'a> {
    program: &'a Program,
    interner: &'a Interner,
}

impl<'a> StackCodeGenerator<'a> {
    pub fn new(program: &'a Program, interner: &'a Interner) -> StackCodeGenerator<'a> {
        StackCodeGenerator { program, interner }
    }

    /// Generates every non-native method, in class and then declaration
    /// order.
    pub fn generate(&self) -> Vec<DirectSubroutine> {
        let mut subroutines = Vec::new();
        for (_, class) in self.program.classes() {
            let Class::Effective(class) = class else {
                continue;
            };
            for &method in class.methods() {
                if !self.program.method(method).is_native() {
                    subroutines.push(self.generate_method(method));
                }
            }
        }
        log::debug!("generated {} subroutines", subroutines.len());
        subroutines
    }

    /// Generates the subroutine for one method. Panics on native methods,
    /// which have no body to lower.
    pub fn generate_method(&self, method: MethodId) -> DirectSubroutine {
        let data = self.program.method(method);
        let body = data.body.as_ref().expect("native methods have no body");
        let layout = self.program.scopes.frame_layout(data.scope);

        let mut subroutine = DirectSubroutine::new(
            self.program.qualified_name(method, self.interner),
            data.argument_count + 1,
            layout.local_count(),
            data.return_type.is_some(),
        );
        let mut walker = MethodWalker {
            program: self.program,
            interner: self.interner,
            layout,
            out: &mut subroutine,
        };

        // Entry: bind the operands the caller pushed (receiver deepest,
        // last argument on top) to their variable slots.
        let variables = self.program.scopes.variables(data.scope);
        let formals = &variables[1..=data.argument_count];
        for &formal in formals.iter().rev() {
            walker.store(formal);
        }
        walker.store(variables[0]); // receiver

        walker.block(body);

        // A non-void method returns the final value of `result`.
        if let Some(result) = data.result {
            walker.load(result);
        }

        subroutine
    }
}

struct MethodWalker<'a, 'out> {
    program: &'a Program,
    interner: &'a Interner,
    layout: FrameLayout,
    out: &'out mut DirectSubroutine,
}

impl MethodWalker<'_, '_> {
    fn block(&mut self, block: &StatementBlock) {
        for statement in &block.statements {
            self.statement(statement);
        }
    }

    fn statement(&mut self, statement: &Statement) {
        match statement {
            Statement::Block(block) => self.block(block),
            // Slot allocation is positional; only an initializer emits code.
            Statement::NewVariable(declaration) => {
                if let Some(initializer) = &declaration.initializer {
                    self.expression(initializer);
                    self.store(declaration.variable);
                }
            }
            Statement::Assignment(assignment) => {
                self.expression(&assignment.value);
                self.store(assignment.target);
            }
            Statement::Call(call) => {
                self.call(call);
                // A discarded result must not linger on the operand stack.
                if self.program.method(call.method).return_type.is_some() {
                    self.emit(StackInstruction::Pop);
                }
            }
        }
    }

    fn expression(&mut self, expression: &Expression) {
        match expression {
            Expression::Variable(variable) => self.load(*variable),
            Expression::Call(call) => self.call(call),
            Expression::Binary(operation) => {
                self.expression(&operation.left);
                self.expression(&operation.right);
                self.call_method(operation.method);
            }
            Expression::Unary(operation) => {
                self.expression(&operation.operand);
                self.call_method(operation.method);
            }
            Expression::Int(value) => self.emit(StackInstruction::LoadConstant(*value)),
            Expression::New(class) => {
                let size = self.program.effective(*class).instance_size();
                self.emit(StackInstruction::LoadConstant(size));
                self.emit(StackInstruction::Allocate);
            }
        }
    }

    fn call(&mut self, call: &CallExpression) {
        self.expression(&call.receiver);
        for argument in &call.arguments {
            self.expression(argument);
        }
        self.call_method(call.method);
    }

    fn call_method(&mut self, method: MethodId) {
        let data = self.program.method(method);
        let link = SubroutineLink {
            name: self.program.qualified_name(method, self.interner),
            argument_count: data.argument_count + 1,
            returns_value: data.return_type.is_some(),
        };
        self.emit(StackInstruction::Call(Rc::new(Subroutine::Link(link))));
    }

    fn load(&mut self, variable: VariableId) {
        let from_top = self.layout.from_top(variable);
        self.emit(StackInstruction::Load { from_top });
    }

    fn store(&mut self, variable: VariableId) {
        let from_top = self.layout.from_top(variable);
        self.emit(StackInstruction::Store { from_top });
    }

    fn emit(&mut self, instruction: StackInstruction) {
        self.out.add_instruction(instruction);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{code::stack::StackMachine, parser, semantic::builder};
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    fn generate(src: &str) -> (Interner, Vec<DirectSubroutine>) {
        let mut interner = Interner::with_capacity(64);
        let mut tokens = Vec::with_capacity(256);
        let decls = parser::parse_program(src, &mut tokens, &mut interner).expect("should parse");
        let program = builder::build(&decls, &mut interner).expect("should attribute");
        let subroutines = StackCodeGenerator::new(&program, &interner).generate();
        (interner, subroutines)
    }

    #[test]
    fn assignment_of_operator_call_lowers_to_load_load_call_store() {
        let (_, subroutines) = generate(indoc! {"
            class Calc
                sum(a: Integer, b: Integer): Integer do
                    var x: Integer
                    x := a + b
                    result := x
                end
            end
        "});
        let [sum] = &subroutines[..] else {
            panic!("expected exactly one subroutine");
        };
        assert_eq!(
            sum.to_string(),
            indoc! {"
                subroutine Calc::sum (args 3, locals 5)
                    store 2
                    store 3
                    store 4
                    load 3
                    load 2
                    call Integer::+ 2
                    store 0
                    load 0
                    store 1
                    load 1
            "}
        );
    }

    #[test]
    fn generated_code_computes_through_the_reference_machine() {
        let (_, subroutines) = generate(indoc! {"
            class Calc
                sum(a: Integer, b: Integer): Integer do
                    var x: Integer
                    x := a + b
                    result := x
                end
            end
        "});
        let mut machine = StackMachine::new();
        // Receiver (unused), then the two arguments.
        machine.operands.extend([0, 3, 4]);
        machine.run(&subroutines[0]).expect("should execute");
        assert_eq!(machine.operands, vec![7]);
    }

    #[test]
    fn discarded_call_results_are_popped() {
        let (_, mut subroutines) = generate(indoc! {"
            class T
                tick(): Integer do
                    result := 1
                end

                f() do
                    tick()
                end
            end
        "});
        let f = subroutines.pop().expect("two subroutines were generated");
        assert_eq!(
            f.to_string(),
            indoc! {"
                subroutine T::f (args 1, locals 1)
                    store 0
                    load 0
                    call T::tick 1
                    pop
            "}
        );

        let mut machine = StackMachine::new();
        for subroutine in subroutines {
            machine.register(Rc::new(subroutine));
        }
        machine.operands.push(0); // receiver
        machine.run(&f).expect("should execute");
        assert_eq!(machine.operands, Vec::<u64>::new());
    }

    #[test]
    fn new_expression_allocates_by_field_count() {
        let (_, subroutines) = generate(indoc! {"
            class Point
                x: Integer
                y: Integer
            end

            class T
                make(): Point do
                    result := new Point
                end
            end
        "});
        assert_eq!(
            subroutines[0].to_string(),
            indoc! {"
                subroutine T::make (args 1, locals 2)
                    store 1
                    const 16
                    alloc
                    store 0
                    load 0
            "}
        );
    }
}
