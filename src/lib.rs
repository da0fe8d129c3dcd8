/// The lexer takes the source input, mapping it into a sequence of tokens.
pub mod lexer;

/// The parser takes a sequence of tokens, mapping it into a declaration
/// tree.
pub mod parser;

/// The semantic passes resolve the declaration tree into an attributed
/// syntax tree: scopes, classes, typed statements and expressions.
pub mod semantic {
    pub mod builder;
    pub mod scope;
    pub mod tree;
}

/// The code generator lowers attributed method bodies into the
/// architecture-neutral stack-machine representation.
pub mod code {
    pub mod gen;
    pub mod stack;
}

/// The backend lowers stack-machine subroutines into x86-64 assembly text.
pub mod assembly {
    pub mod env;
    pub mod gen;
    pub mod x86_64;
}

pub mod decl;
pub mod error;
pub mod token;

pub mod util {
    pub mod fmt;
    pub mod intern;
}

pub use assembly::gen::Target;
pub use error::CompileError;

use util::intern::Interner;

/// Runs the whole pipeline on one compilation unit: lex, parse, attribute,
/// generate stack code, emit assembly. Phases run strictly in sequence,
/// each consuming its predecessor's output; the first failure of any phase
/// aborts the build.
pub fn compile(src: &str, target: Target) -> Result<String, CompileError> {
    let mut interner = Interner::with_capacity(256);
    let mut tokens = Vec::with_capacity(lexer::SUGGESTED_TOKENS_CAPACITY);

    let declarations = parser::parse_program(src, &mut tokens, &mut interner)?;
    log::debug!("parsed {} class declarations", declarations.classes.len());

    let program = semantic::builder::build(&declarations, &mut interner)?;
    drop(declarations);

    let subroutines = code::gen::StackCodeGenerator::new(&program, &interner).generate();

    let mut buffer = Vec::with_capacity(16 * 1024);
    assembly::gen::generate(&mut buffer, target, &subroutines)?;
    Ok(String::from_utf8(buffer).expect("generated assembly is ASCII"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    #[test]
    fn compiles_a_program_front_to_back() {
        let assembly = compile(
            indoc! {"
                class Point
                    x: Integer
                    y: Integer

                    norm2(): Integer do
                        var a: Integer := 3
                        var b: Integer := 4
                        result := a * a + b * b
                    end
                end

                class Main
                    main() do
                        var p: Point := new Point
                        p.norm2()
                    end
                end
            "},
            Target::X86_64Linux,
        )
        .expect("program should compile");

        for expected in [
            ".intel_syntax noprefix",
            "Point__norm2:",
            ".global main",
            "main:",
            "call Point__norm2",
            "call Integer__ASTERISK",
            "call Integer__PLUS",
            "call mica_alloc",
            "ret",
        ] {
            assert!(
                assembly.contains(expected),
                "missing `{expected}` in:\n{assembly}"
            );
        }
    }

    #[test]
    fn resolution_failures_surface_as_compile_errors() {
        let error = compile("class T f() do x := 1 end end", Target::X86_64Linux)
            .expect_err("unknown variable should fail the build");
        assert!(matches!(error, CompileError::Resolve(_)));
        assert_eq!(
            error.to_string(),
            "resolution error: unknown variable `x`"
        );
    }

    #[test]
    fn syntax_failures_surface_as_compile_errors() {
        let error = compile("class 1 end", Target::X86_64Linux)
            .expect_err("bad class name should fail the build");
        assert!(matches!(error, CompileError::Parse(_)));
    }
}
