//! Plain-text rendering of the declaration tree, used by parser tests and
//! ad hoc debugging.

use std::io::Write;

use crate::decl::*;
use crate::util::intern::Interner;

const INDENT_WIDTH: usize = 2;

fn sp(w: &mut impl Write, i: usize) -> std::io::Result<()> {
    write!(w, "{:width$}", "", width = i * INDENT_WIDTH)
}

pub fn print_program_string(program: &Program, interner: &Interner) -> String {
    let mut buf = Vec::with_capacity(1024);
    print_program(&mut buf, program, interner).unwrap();
    String::from_utf8(buf).unwrap()
}

pub fn print_program(
    w: &mut impl Write,
    program: &Program,
    interner: &Interner,
) -> std::io::Result<()> {
    for class in &program.classes {
        print_class(w, 0, class, interner)?;
    }
    Ok(())
}

fn print_class(
    w: &mut impl Write,
    i: usize,
    class: &ClassDeclaration,
    interner: &Interner,
) -> std::io::Result<()> {
    sp(w, i)?;
    writeln!(w, "class {}", interner.resolve(class.name.name))?;
    for feature in &class.features {
        print_feature(w, i + 1, feature, interner)?;
    }
    Ok(())
}

fn print_feature(
    w: &mut impl Write,
    i: usize,
    feature: &FeatureDeclaration,
    interner: &Interner,
) -> std::io::Result<()> {
    match feature {
        FeatureDeclaration::Field(field) => {
            sp(w, i)?;
            writeln!(
                w,
                "field {}: {}",
                interner.resolve(field.name.name),
                interner.resolve(field.ty.name)
            )?;
        }
        FeatureDeclaration::Method(method) => {
            sp(w, i)?;
            write!(w, "method {}(", interner.resolve(method.name.name))?;
            for (idx, argument) in method.arguments.iter().enumerate() {
                if idx > 0 {
                    write!(w, ", ")?;
                }
                write!(
                    w,
                    "{}: {}",
                    interner.resolve(argument.name.name),
                    interner.resolve(argument.ty.name)
                )?;
            }
            write!(w, ")")?;
            if let Some(ref return_ty) = method.return_ty {
                write!(w, ": {}", interner.resolve(return_ty.name))?;
            }
            writeln!(w)?;
            for statement in &method.body {
                print_statement(w, i + 1, statement, interner)?;
            }
        }
    }
    Ok(())
}

fn print_statement(
    w: &mut impl Write,
    i: usize,
    statement: &Statement,
    interner: &Interner,
) -> std::io::Result<()> {
    match statement {
        Statement::Block(statements) => {
            sp(w, i)?;
            writeln!(w, "block")?;
            for statement in statements {
                print_statement(w, i + 1, statement, interner)?;
            }
        }
        Statement::NewVariable {
            name,
            ty,
            initializer,
        } => {
            sp(w, i)?;
            writeln!(
                w,
                "var {}: {}",
                interner.resolve(name.name),
                interner.resolve(ty.name)
            )?;
            if let Some(initializer) = initializer {
                print_expr(w, i + 1, initializer, interner)?;
            }
        }
        Statement::Assignment { target, value } => {
            sp(w, i)?;
            writeln!(w, "assign {}", interner.resolve(target.name))?;
            print_expr(w, i + 1, value, interner)?;
        }
        Statement::Call(call) => print_call(w, i, call, interner)?,
    }
    Ok(())
}

pub fn print_expr(
    w: &mut impl Write,
    i: usize,
    expr: &Expression,
    interner: &Interner,
) -> std::io::Result<()> {
    match expr {
        Expression::CallOrVariable(call) => print_call(w, i, call, interner)?,
        Expression::Binary { op, left, right } => {
            sp(w, i)?;
            writeln!(w, "binary {}", op.token())?;
            print_expr(w, i + 1, left, interner)?;
            print_expr(w, i + 1, right, interner)?;
        }
        Expression::Unary { op, operand } => {
            sp(w, i)?;
            writeln!(w, "unary {}", op.token())?;
            print_expr(w, i + 1, operand, interner)?;
        }
        Expression::Int(value) => {
            sp(w, i)?;
            writeln!(w, "int {value}")?;
        }
        Expression::New(ty) => {
            sp(w, i)?;
            writeln!(w, "new {}", interner.resolve(ty.name))?;
        }
    }
    Ok(())
}

fn print_call(
    w: &mut impl Write,
    i: usize,
    call: &CallOrVariable,
    interner: &Interner,
) -> std::io::Result<()> {
    sp(w, i)?;
    let name = interner.resolve(call.name.name);
    if call.target.is_none() && call.arguments.is_none() {
        // A bare name; whether it reads a variable or calls a method is
        // only known after attribution.
        return writeln!(w, "name {name}");
    }
    writeln!(w, "call {name}")?;
    if let Some(ref target) = call.target {
        sp(w, i + 1)?;
        writeln!(w, "target")?;
        print_expr(w, i + 2, target, interner)?;
    }
    if let Some(ref arguments) = call.arguments {
        sp(w, i + 1)?;
        writeln!(w, "args")?;
        for argument in arguments {
            print_expr(w, i + 2, argument, interner)?;
        }
    }
    Ok(())
}
