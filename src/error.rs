use std::fmt;

use crate::{assembly, parser, semantic::builder, token::Spanned};

/// Any failure of the compilation pipeline.
///
/// All error paths converge here: one human-readable message, no recovery,
/// no partial output.
#[derive(Debug)]
pub enum CompileError {
    Parse(Spanned<parser::Error>),
    Resolve(builder::Error),
    Backend(assembly::gen::Error),
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileError::Parse(error) => {
                write!(f, "syntax error at {}: {}", error.span, error.item)
            }
            CompileError::Resolve(error) => write!(f, "resolution error: {error}"),
            CompileError::Backend(error) => write!(f, "code generation error: {error}"),
        }
    }
}

impl std::error::Error for CompileError {}

impl From<Spanned<parser::Error>> for CompileError {
    fn from(error: Spanned<parser::Error>) -> CompileError {
        CompileError::Parse(error)
    }
}

impl From<builder::Error> for CompileError {
    fn from(error: builder::Error) -> CompileError {
        CompileError::Resolve(error)
    }
}

impl From<assembly::gen::Error> for CompileError {
    fn from(error: assembly::gen::Error) -> CompileError {
        CompileError::Backend(error)
    }
}
