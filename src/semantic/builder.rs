use std::{
    collections::{HashMap, VecDeque},
    fmt,
};

use crate::{
    decl,
    semantic::{
        scope::ScopeId,
        tree::{
            AssignmentStatement, BinaryOperation, CallExpression, Class, ClassId, EffectiveClass,
            Expression, Field, Method, MethodId, NewVariableStatement, Program, Statement,
            StatementBlock, UnaryOperation,
        },
    },
    util::intern::{Interner, Name},
};

pub type Result<T> = std::result::Result<T, Error>;

/// Builds the attributed syntax tree for a parsed compilation unit.
///
/// Resolution is fatal-first-error: the whole build aborts on the first
/// unresolvable name, duplicate declaration, or argument-count mismatch.
pub fn build(decls: &decl::Program, interner: &mut Interner) -> Result<Program> {
    TreeBuilder::new(interner).build(decls)
}

/// Names the builder injects that do not come from source tokens.
struct ImplicitNames {
    this: Name,
    result: Name,
    other: Name,
    integer: Name,
}

struct TreeBuilder<'decl, 'ident> {
    interner: &'ident mut Interner,
    program: Program,
    /// User classes by name, mirroring the global scope's class namespace.
    classes_by_name: HashMap<Name, ClassId>,
    /// Methods whose bodies are lowered only after every class and feature
    /// signature is registered; this queue is what permits forward
    /// references between classes and methods.
    queue: VecDeque<(MethodId, &'decl decl::MethodDeclaration)>,
    names: ImplicitNames,
}

impl<'decl> TreeBuilder<'decl, '_> {
    fn new(interner: &mut Interner) -> TreeBuilder<'decl, '_> {
        let names = ImplicitNames {
            this: interner.intern("this"),
            result: interner.intern("result"),
            other: interner.intern("other"),
            integer: interner.intern("Integer"),
        };
        TreeBuilder {
            interner,
            program: Program::new(),
            classes_by_name: HashMap::new(),
            queue: VecDeque::new(),
            names,
        }
    }

    fn build(mut self, decls: &'decl decl::Program) -> Result<Program> {
        self.register_native_classes();

        for class in &decls.classes {
            self.declare_class(class)?;
        }
        log::debug!("registered {} classes", decls.classes.len());

        for class in &decls.classes {
            self.add_features(class)?;
        }
        log::debug!("queued {} method bodies", self.queue.len());

        while let Some((method, declaration)) = self.queue.pop_front() {
            self.lower_method_body(method, declaration)?;
        }

        Ok(self.program)
    }

    /// Registers the built-in `Integer` class: four operator methods, one
    /// argument each, implemented by the backend rather than by Mica code.
    fn register_native_classes(&mut self) {
        let name = self.names.integer;
        let scope = self.program.scopes.add_scope(Some(self.program.global_scope));
        let id = self
            .program
            .add_class(Class::Effective(EffectiveClass::new(name, scope)));
        self.program
            .scopes
            .add_class(self.program.global_scope, name, id);
        self.program.integer = id;

        for operator in ["+", "-", "*", "/"] {
            let operator = self.interner.intern(operator);
            let method_scope = self.program.scopes.add_scope(Some(scope));
            let this = self
                .program
                .scopes
                .add_variable(method_scope, self.names.this, id);
            self.program
                .scopes
                .add_variable(method_scope, self.names.other, id);
            let result = self
                .program
                .scopes
                .add_variable(method_scope, self.names.result, id);
            let method = self.program.add_method(Method {
                wrapper: id,
                return_type: Some(id),
                name: operator,
                argument_count: 1,
                scope: method_scope,
                this,
                result: Some(result),
                body: None,
            });
            self.program.effective_mut(id).add_method(operator, method);
            self.program.scopes.add_method(scope, operator, method);
        }
    }

    /// Pass 1: register every class by name, with an empty definition and a
    /// fresh scope parented to the global scope.
    fn declare_class(&mut self, class: &decl::ClassDeclaration) -> Result<()> {
        let name = class.name.name;
        if self
            .program
            .scopes
            .find_class_local(self.program.global_scope, name)
            .is_some()
        {
            return Err(self.duplicate("class", name));
        }
        let scope = self.program.scopes.add_scope(Some(self.program.global_scope));
        let id = self
            .program
            .add_class(Class::Effective(EffectiveClass::new(name, scope)));
        self.program
            .scopes
            .add_class(self.program.global_scope, name, id);
        self.classes_by_name.insert(name, id);
        Ok(())
    }

    /// Pass 2: resolve feature signatures and queue method bodies.
    fn add_features(&mut self, declaration: &'decl decl::ClassDeclaration) -> Result<()> {
        let id = self.classes_by_name[&declaration.name.name];

        for feature in &declaration.features {
            match feature {
                decl::FeatureDeclaration::Field(field) => {
                    self.check_fresh_feature(id, field.name.name)?;
                    let ty = self.resolve_type(field.ty)?;
                    self.program.effective_mut(id).add_field(Field {
                        wrapper: id,
                        ty,
                        name: field.name.name,
                    });
                }
                decl::FeatureDeclaration::Method(method) => {
                    self.check_fresh_feature(id, method.name.name)?;
                    let method_id = self.declare_method(id, method)?;
                    self.queue.push_back((method_id, method));
                }
            }
        }
        Ok(())
    }

    fn declare_method(
        &mut self,
        wrapper: ClassId,
        declaration: &decl::MethodDeclaration,
    ) -> Result<MethodId> {
        let return_type = match declaration.return_ty {
            Some(ty) => Some(self.resolve_type(ty)?),
            None => None,
        };

        let class_scope = self.program.effective(wrapper).scope;
        let scope = self.program.scopes.add_scope(Some(class_scope));
        let this = self
            .program
            .scopes
            .add_variable(scope, self.names.this, wrapper);
        for argument in &declaration.arguments {
            let ty = self.resolve_type(argument.ty)?;
            if self
                .program
                .scopes
                .find_variable_local(scope, argument.name.name)
                .is_some()
            {
                return Err(self.duplicate("variable", argument.name.name));
            }
            self.program.scopes.add_variable(scope, argument.name.name, ty);
        }
        let result = return_type.map(|ty| {
            self.program.scopes.add_variable(scope, self.names.result, ty)
        });

        let name = declaration.name.name;
        let method = self.program.add_method(Method {
            wrapper,
            return_type,
            name,
            argument_count: declaration.arguments.len(),
            scope,
            this,
            result,
            body: None,
        });
        self.program.effective_mut(wrapper).add_method(name, method);
        self.program.scopes.add_method(class_scope, name, method);
        Ok(method)
    }

    /// Pass 3: lower one queued method body into attributed statements.
    fn lower_method_body(
        &mut self,
        method: MethodId,
        declaration: &decl::MethodDeclaration,
    ) -> Result<()> {
        let scope = self.program.method(method).scope;
        let block = self.lower_block(scope, &declaration.body)?;
        self.program.method_mut(method).body = Some(block);
        Ok(())
    }

    fn lower_block(
        &mut self,
        parent: ScopeId,
        statements: &[decl::Statement],
    ) -> Result<StatementBlock> {
        let scope = self.program.scopes.add_scope(Some(parent));
        let mut block = StatementBlock::new(scope);
        for statement in statements {
            let lowered = self.lower_statement(scope, statement)?;
            block.push(lowered);
        }
        Ok(block)
    }

    fn lower_statement(
        &mut self,
        scope: ScopeId,
        statement: &decl::Statement,
    ) -> Result<Statement> {
        match statement {
            decl::Statement::Block(statements) => {
                Ok(Statement::Block(self.lower_block(scope, statements)?))
            }
            decl::Statement::NewVariable {
                name,
                ty,
                initializer,
            } => {
                let ty = self.resolve_type(*ty)?;
                // The initializer is resolved before the new name is
                // declared, so it can still see an outer variable of the
                // same name.
                let initializer = match initializer {
                    Some(expression) => {
                        let lowered = self.lower_expression(scope, expression)?;
                        self.require_value(&lowered)?;
                        Some(lowered)
                    }
                    None => None,
                };
                if self
                    .program
                    .scopes
                    .find_variable_local(scope, name.name)
                    .is_some()
                {
                    return Err(self.duplicate("variable", name.name));
                }
                let variable = self.program.scopes.add_variable(scope, name.name, ty);
                Ok(Statement::NewVariable(NewVariableStatement {
                    variable,
                    initializer,
                }))
            }
            decl::Statement::Assignment { target, value } => {
                let value = self.lower_expression(scope, value)?;
                self.require_value(&value)?;
                let variable = self
                    .program
                    .scopes
                    .find_variable(scope, target.name)
                    .ok_or_else(|| Error::UnknownVariable(self.text(target.name)))?;
                Ok(Statement::Assignment(AssignmentStatement {
                    target: variable,
                    value,
                }))
            }
            decl::Statement::Call(call) => match self.lower_call_or_variable(scope, call)? {
                Expression::Call(call) => Ok(Statement::Call(call)),
                _ => Err(Error::NotCallable(self.text(call.name.name))),
            },
        }
    }

    fn lower_expression(
        &mut self,
        scope: ScopeId,
        expression: &decl::Expression,
    ) -> Result<Expression> {
        match expression {
            decl::Expression::Int(value) => Ok(Expression::Int(*value)),
            decl::Expression::New(ty) => {
                let class = self.resolve_type(*ty)?;
                Ok(Expression::New(class))
            }
            decl::Expression::Binary { op, left, right } => {
                let left = self.lower_expression(scope, left)?;
                let right = self.lower_expression(scope, right)?;
                self.require_value(&right)?;
                let method = self.resolve_operator(&left, op.token(), 1)?;
                Ok(Expression::Binary(BinaryOperation {
                    method,
                    left: Box::new(left),
                    right: Box::new(right),
                }))
            }
            decl::Expression::Unary { op, operand } => {
                let operand = self.lower_expression(scope, operand)?;
                let method = self.resolve_operator(&operand, op.token(), 0)?;
                Ok(Expression::Unary(UnaryOperation {
                    method,
                    operand: Box::new(operand),
                }))
            }
            decl::Expression::CallOrVariable(call) => self.lower_call_or_variable(scope, call),
        }
    }

    /// Disambiguates the dual call-or-variable node. A bare name probes the
    /// scope for a method first, then for a variable.
    fn lower_call_or_variable(
        &mut self,
        scope: ScopeId,
        call: &decl::CallOrVariable,
    ) -> Result<Expression> {
        let name = call.name.name;
        match (&call.target, &call.arguments) {
            (None, None) => {
                if let Some(method) = self.program.scopes.find_method(scope, name) {
                    let receiver = self.this_receiver(scope);
                    self.finish_call(method, receiver, Vec::new())
                } else if let Some(variable) = self.program.scopes.find_variable(scope, name) {
                    Ok(Expression::Variable(variable))
                } else {
                    Err(Error::UnknownVariable(self.text(name)))
                }
            }
            (None, Some(arguments)) => {
                let method = self
                    .program
                    .scopes
                    .find_method(scope, name)
                    .ok_or_else(|| Error::UnknownMethod(self.text(name)))?;
                let arguments = self.lower_arguments(scope, arguments)?;
                let receiver = self.this_receiver(scope);
                self.finish_call(method, receiver, arguments)
            }
            (Some(target), arguments) => {
                let receiver = self.lower_expression(scope, target)?;
                let ty = self.require_value(&receiver)?;
                let class_scope = self.program.effective(ty).scope;
                let method = self
                    .program
                    .scopes
                    .find_method(class_scope, name)
                    .ok_or_else(|| Error::UnknownMethod(self.text(name)))?;
                let arguments = match arguments {
                    Some(arguments) => self.lower_arguments(scope, arguments)?,
                    None => Vec::new(),
                };
                self.finish_call(method, receiver, arguments)
            }
        }
    }

    fn lower_arguments(
        &mut self,
        scope: ScopeId,
        arguments: &[decl::Expression],
    ) -> Result<Vec<Expression>> {
        let mut lowered = Vec::with_capacity(arguments.len());
        for argument in arguments {
            let argument = self.lower_expression(scope, argument)?;
            self.require_value(&argument)?;
            lowered.push(argument);
        }
        Ok(lowered)
    }

    fn finish_call(
        &mut self,
        method: MethodId,
        receiver: Expression,
        arguments: Vec<Expression>,
    ) -> Result<Expression> {
        let expected = self.program.method(method).argument_count;
        if arguments.len() != expected {
            return Err(Error::ArgumentCountMismatch {
                method: self.program.qualified_name(method, self.interner),
                expected,
                found: arguments.len(),
            });
        }
        Ok(Expression::Call(CallExpression {
            method,
            receiver: Box::new(receiver),
            arguments,
        }))
    }

    /// Resolves an operator token to a method of the operand's static type.
    fn resolve_operator(
        &mut self,
        operand: &Expression,
        token: &'static str,
        expected_arguments: usize,
    ) -> Result<MethodId> {
        let ty = self.require_value(operand)?;
        let class = self.program.effective(ty);
        let name = self.interner.intern(token);
        let method = self
            .program
            .scopes
            .find_method(class.scope, name)
            .ok_or_else(|| Error::UndefinedOperator {
                class: self.text(class.name),
                operator: token,
            })?;
        let declared = self.program.method(method).argument_count;
        if declared != expected_arguments {
            return Err(Error::ArgumentCountMismatch {
                method: self.program.qualified_name(method, self.interner),
                expected: declared,
                found: expected_arguments,
            });
        }
        Ok(method)
    }

    /// The implicit receiver of a target-less call: the enclosing method's
    /// `this` variable.
    fn this_receiver(&self, scope: ScopeId) -> Expression {
        let this = self
            .program
            .scopes
            .find_variable(scope, self.names.this)
            .expect("method scopes always declare `this`");
        Expression::Variable(this)
    }

    fn resolve_type(&mut self, ident: decl::Ident) -> Result<ClassId> {
        self.program
            .scopes
            .find_class(self.program.global_scope, ident.name)
            .ok_or_else(|| Error::UnknownType(self.text(ident.name)))
    }

    /// Fails with [`Error::VoidValue`] if the expression produces nothing.
    fn require_value(&self, expression: &Expression) -> Result<ClassId> {
        expression.ty(&self.program).ok_or_else(|| {
            let call = match expression {
                Expression::Call(call) => call.method,
                Expression::Binary(op) => op.method,
                Expression::Unary(op) => op.method,
                _ => unreachable!("only calls can be void"),
            };
            Error::VoidValue {
                call: self.program.qualified_name(call, self.interner),
            }
        })
    }

    fn check_fresh_feature(&self, class: ClassId, name: Name) -> Result<()> {
        let effective = self.program.effective(class);
        if effective.field_by_name(name).is_some() || effective.method_by_name(name).is_some() {
            return Err(self.duplicate("feature", name));
        }
        Ok(())
    }

    fn duplicate(&self, kind: &'static str, name: Name) -> Error {
        Error::DuplicateDeclaration {
            kind,
            name: self.text(name),
        }
    }

    fn text(&self, name: Name) -> String {
        self.interner.resolve(name).to_string()
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum Error {
    UnknownType(String),
    UnknownMethod(String),
    UnknownVariable(String),
    DuplicateDeclaration { kind: &'static str, name: String },
    ArgumentCountMismatch {
        method: String,
        expected: usize,
        found: usize,
    },
    UndefinedOperator {
        class: String,
        operator: &'static str,
    },
    NotCallable(String),
    VoidValue { call: String },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::UnknownType(name) => write!(f, "unknown type `{name}`"),
            Error::UnknownMethod(name) => write!(f, "unknown method `{name}`"),
            Error::UnknownVariable(name) => write!(f, "unknown variable `{name}`"),
            Error::DuplicateDeclaration { kind, name } => {
                write!(f, "duplicate {kind} declaration `{name}`")
            }
            Error::ArgumentCountMismatch {
                method,
                expected,
                found,
            } => write!(
                f,
                "`{method}` takes {expected} argument(s), but {found} were supplied"
            ),
            Error::UndefinedOperator { class, operator } => {
                write!(f, "operator `{operator}` is not defined for `{class}`")
            }
            Error::NotCallable(name) => {
                write!(f, "`{name}` is a variable, not a callable method")
            }
            Error::VoidValue { call } => {
                write!(f, "`{call}` returns nothing and cannot be used as a value")
            }
        }
    }
}

impl std::error::Error for Error {}
