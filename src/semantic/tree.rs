use std::collections::HashMap;

use crate::{
    semantic::scope::{ScopeId, ScopeTree, VariableId},
    util::intern::{Interner, Name},
};

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct ClassId(u32);

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct MethodId(u32);

impl ClassId {
    #[cfg(test)]
    pub(crate) fn testing(raw: u32) -> ClassId {
        ClassId(raw)
    }
}

/// A named type. A [`ClassReference`] is an opaque, name-only reference to a
/// class defined elsewhere; an [`EffectiveClass`] carries the full
/// definition.
pub enum Class {
    Reference(ClassReference),
    Effective(EffectiveClass),
}

impl Class {
    pub fn name(&self) -> Name {
        match self {
            Class::Reference(reference) => reference.name,
            Class::Effective(class) => class.name,
        }
    }
}

pub struct ClassReference {
    pub name: Name,
}

/// A fully defined class: ordered fields, ordered methods, and an owned
/// scope (parented to the global scope) through which members resolve.
///
/// Field and method order is insertion order and is significant: field order
/// determines object layout, method order determines emission order.
pub struct EffectiveClass {
    pub name: Name,
    pub scope: ScopeId,
    fields: Vec<Field>,
    methods: Vec<MethodId>,
    field_links: HashMap<Name, usize>,
    method_links: HashMap<Name, MethodId>,
}

impl EffectiveClass {
    pub fn new(name: Name, scope: ScopeId) -> EffectiveClass {
        EffectiveClass {
            name,
            scope,
            fields: Vec::new(),
            methods: Vec::new(),
            field_links: HashMap::new(),
            method_links: HashMap::new(),
        }
    }

    pub fn add_field(&mut self, field: Field) {
        self.field_links.insert(field.name, self.fields.len());
        self.fields.push(field);
    }

    pub fn add_method(&mut self, name: Name, method: MethodId) {
        self.method_links.insert(name, method);
        self.methods.push(method);
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn methods(&self) -> &[MethodId] {
        &self.methods
    }

    pub fn field_by_name(&self, name: Name) -> Option<&Field> {
        self.field_links.get(&name).map(|&index| &self.fields[index])
    }

    pub fn method_by_name(&self, name: Name) -> Option<MethodId> {
        self.method_links.get(&name).copied()
    }

    /// Object size in bytes: one word per field.
    pub fn instance_size(&self) -> u64 {
        8 * self.fields.len() as u64
    }
}

/// A data member. `wrapper` is the defining class.
pub struct Field {
    pub wrapper: ClassId,
    pub ty: ClassId,
    pub name: Name,
}

/// A callable member. `wrapper` is the defining class; `return_type` is
/// `None` for void methods.
///
/// The method scope (a child of the class scope) declares `this`, then the
/// formal arguments, then (for non-void methods) the implicit `result`
/// variable whose final value the method returns. The body is attached by
/// the tree builder's deferred lowering pass and stays `None` for native
/// methods.
pub struct Method {
    pub wrapper: ClassId,
    pub return_type: Option<ClassId>,
    pub name: Name,
    pub argument_count: usize,
    pub scope: ScopeId,
    pub this: VariableId,
    pub result: Option<VariableId>,
    pub body: Option<StatementBlock>,
}

impl Method {
    pub fn is_native(&self) -> bool {
        self.body.is_none()
    }
}

/// The attributed syntax tree of one compilation unit: every name resolved,
/// every expression typed. Classes and methods live in flat arenas and are
/// referenced by id; scopes and variables live in the owned [`ScopeTree`].
pub struct Program {
    pub scopes: ScopeTree,
    pub global_scope: ScopeId,
    classes: Vec<Class>,
    methods: Vec<Method>,
    /// The built-in `Integer` class, the static type of integer literals.
    pub integer: ClassId,
}

impl std::fmt::Debug for Program {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Program")
            .field("global_scope", &self.global_scope)
            .field("class_count", &self.classes.len())
            .field("method_count", &self.methods.len())
            .field("integer", &self.integer)
            .finish_non_exhaustive()
    }
}

impl Program {
    /// An empty program: a fresh scope tree with only the global scope. The
    /// tree builder fills in the classes (native ones first, so `integer`
    /// starts out pointing at the first registered class).
    pub fn new() -> Program {
        let mut scopes = ScopeTree::new();
        let global_scope = scopes.add_scope(None);
        Program {
            scopes,
            global_scope,
            classes: Vec::new(),
            methods: Vec::new(),
            integer: ClassId(0),
        }
    }

    pub fn add_class(&mut self, class: Class) -> ClassId {
        let id = ClassId(u32::try_from(self.classes.len()).expect("class arena out of ids"));
        self.classes.push(class);
        id
    }

    pub fn add_method(&mut self, method: Method) -> MethodId {
        let id = MethodId(u32::try_from(self.methods.len()).expect("method arena out of ids"));
        self.methods.push(method);
        id
    }

    pub fn class(&self, id: ClassId) -> &Class {
        &self.classes[id.0 as usize]
    }

    pub fn class_mut(&mut self, id: ClassId) -> &mut Class {
        &mut self.classes[id.0 as usize]
    }

    /// The class as an [`EffectiveClass`]; panics on a bare reference.
    pub fn effective(&self, id: ClassId) -> &EffectiveClass {
        match self.class(id) {
            Class::Effective(class) => class,
            Class::Reference(_) => panic!("class reference has no definition"),
        }
    }

    pub fn effective_mut(&mut self, id: ClassId) -> &mut EffectiveClass {
        match self.class_mut(id) {
            Class::Effective(class) => class,
            Class::Reference(_) => panic!("class reference has no definition"),
        }
    }

    pub fn method(&self, id: MethodId) -> &Method {
        &self.methods[id.0 as usize]
    }

    pub fn method_mut(&mut self, id: MethodId) -> &mut Method {
        &mut self.methods[id.0 as usize]
    }

    pub fn classes(&self) -> impl Iterator<Item = (ClassId, &Class)> {
        self.classes
            .iter()
            .enumerate()
            .map(|(i, class)| (ClassId(i as u32), class))
    }

    /// `Class::method`, the qualified name used for subroutines and labels.
    pub fn qualified_name(&self, method: MethodId, interner: &Interner) -> String {
        let method = self.method(method);
        let class = self.class(method.wrapper);
        format!(
            "{}::{}",
            interner.resolve(class.name()),
            interner.resolve(method.name)
        )
    }
}

impl Default for Program {
    fn default() -> Self {
        Program::new()
    }
}

/// An attributed statement.
pub enum Statement {
    Block(StatementBlock),
    NewVariable(NewVariableStatement),
    Assignment(AssignmentStatement),
    /// A call in statement position; a non-void result is discarded.
    Call(CallExpression),
}

/// An ordered statement sequence with its own scope (a child of the
/// enclosing scope). Destroying the block destroys its scope subtree with
/// the owning [`ScopeTree`].
pub struct StatementBlock {
    pub scope: ScopeId,
    pub statements: Vec<Statement>,
    /// Running count of variables declared directly in this block.
    pub local_count: usize,
}

impl StatementBlock {
    pub fn new(scope: ScopeId) -> StatementBlock {
        StatementBlock {
            scope,
            statements: Vec::new(),
            local_count: 0,
        }
    }

    /// Appends a statement; declaration statements bump the local counter.
    pub fn push(&mut self, statement: Statement) {
        if matches!(statement, Statement::NewVariable(_)) {
            self.local_count += 1;
        }
        self.statements.push(statement);
    }
}

/// Declares a variable; the slot itself is allocated positionally by the
/// frame layout, so only an initializer emits code.
pub struct NewVariableStatement {
    pub variable: VariableId,
    pub initializer: Option<Expression>,
}

pub struct AssignmentStatement {
    pub target: VariableId,
    pub value: Expression,
}

/// An attributed expression, carrying resolved references instead of names.
pub enum Expression {
    Variable(VariableId),
    /// Dual statement/expression: a resolved method call.
    Call(CallExpression),
    Binary(BinaryOperation),
    Unary(UnaryOperation),
    Int(u64),
    New(ClassId),
}

impl Expression {
    /// The expression's static type; `None` for a call to a void method.
    pub fn ty(&self, program: &Program) -> Option<ClassId> {
        match self {
            Expression::Variable(variable) => Some(program.scopes.variable(*variable).ty),
            Expression::Call(call) => program.method(call.method).return_type,
            Expression::Binary(op) => program.method(op.method).return_type,
            Expression::Unary(op) => program.method(op.method).return_type,
            Expression::Int(_) => Some(program.integer),
            Expression::New(class) => Some(*class),
        }
    }
}

pub struct CallExpression {
    pub method: MethodId,
    pub receiver: Box<Expression>,
    pub arguments: Vec<Expression>,
}

/// An operator application, resolved to an ordinary method of the left
/// operand's static type (uniform access: operators are methods).
pub struct BinaryOperation {
    pub method: MethodId,
    pub left: Box<Expression>,
    pub right: Box<Expression>,
}

pub struct UnaryOperation {
    pub method: MethodId,
    pub operand: Box<Expression>,
}
