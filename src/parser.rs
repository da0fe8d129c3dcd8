use std::fmt;

use crate::{
    decl::{
        ArgumentDeclaration, BinaryOperator, CallOrVariable, ClassDeclaration, Expression,
        FeatureDeclaration, FieldDeclaration, Ident, MethodDeclaration, Program, Statement,
        UnaryOperator,
    },
    lexer::{self, extract},
    token::{Span, Spanned, Token, TokenKind},
    util::intern::Interner,
};

pub type Result<T> = std::result::Result<T, Spanned<Error>>;

/// Lexes and parses a whole compilation unit into its declaration tree.
///
/// The first syntax error aborts the parse; there is no recovery or
/// multi-error collection anywhere in the pipeline.
pub fn parse_program(
    src: &str,
    tokens: &mut Vec<Token>,
    interner: &mut Interner,
) -> Result<Program> {
    assert!(tokens.is_empty(), "must pass clean tokens buffer");
    lexer::lex(src, tokens);
    Parser::new(src, tokens, interner).parse_program()
}

struct Parser<'src, 'tok, 'ident> {
    src: &'src str,
    tokens: &'tok [Token],
    interner: &'ident mut Interner,
    cursor: usize,
}

impl Parser<'_, '_, '_> {
    fn parse_program(&mut self) -> Result<Program> {
        let mut classes = Vec::with_capacity(4);
        while !self.at(TokenKind::Eof) {
            classes.push(self.parse_class()?);
        }
        if classes.is_empty() {
            let span = Span::new_of_length(0, u32::try_from(self.src.len()).unwrap());
            return Err(span.wrap(Error::EmptyProgram));
        }
        Ok(Program { classes })
    }

    fn parse_class(&mut self) -> Result<ClassDeclaration> {
        self.consume(TokenKind::Class)?;
        let name = self.parse_ident()?;

        let mut features = Vec::with_capacity(4);
        while !self.take(TokenKind::End) {
            features.push(self.parse_feature()?);
        }

        Ok(ClassDeclaration { name, features })
    }

    fn parse_feature(&mut self) -> Result<FeatureDeclaration> {
        let name = self.parse_ident()?;

        let token = self.advance();
        match token.kind {
            TokenKind::Colon => {
                let ty = self.parse_ident()?;
                Ok(FeatureDeclaration::Field(FieldDeclaration { name, ty }))
            }
            TokenKind::LParen => {
                let arguments = self.parse_arguments_rest()?;
                let return_ty = if self.take(TokenKind::Colon) {
                    Some(self.parse_ident()?)
                } else {
                    None
                };
                let body = self.parse_block()?;
                Ok(FeatureDeclaration::Method(MethodDeclaration {
                    name,
                    arguments,
                    return_ty,
                    body,
                }))
            }
            found => Err(token.span().wrap(Error::unexpected("`:` or `(`", found))),
        }
    }

    /// Parses the formal arguments of a method declaration; the opening
    /// parenthesis has already been consumed.
    fn parse_arguments_rest(&mut self) -> Result<Vec<ArgumentDeclaration>> {
        let mut arguments = Vec::new();
        if self.take(TokenKind::RParen) {
            return Ok(arguments);
        }
        loop {
            let name = self.parse_ident()?;
            self.consume(TokenKind::Colon)?;
            let ty = self.parse_ident()?;
            arguments.push(ArgumentDeclaration { name, ty });
            if !self.take(TokenKind::Comma) {
                break;
            }
        }
        self.consume(TokenKind::RParen)?;
        Ok(arguments)
    }

    fn parse_block(&mut self) -> Result<Vec<Statement>> {
        self.consume(TokenKind::Do)?;
        let mut statements = Vec::with_capacity(4);
        while !self.take(TokenKind::End) {
            statements.push(self.parse_statement()?);
        }
        Ok(statements)
    }

    fn parse_statement(&mut self) -> Result<Statement> {
        let start = self.peek();
        match start.kind {
            TokenKind::Var => {
                self.advance();
                let name = self.parse_ident()?;
                self.consume(TokenKind::Colon)?;
                let ty = self.parse_ident()?;
                let initializer = if self.take(TokenKind::Assign) {
                    Some(self.parse_expr()?)
                } else {
                    None
                };
                Ok(Statement::NewVariable {
                    name,
                    ty,
                    initializer,
                })
            }
            TokenKind::Do => Ok(Statement::Block(self.parse_block()?)),
            _ => {
                let expr = self.parse_expr()?;
                if self.take(TokenKind::Assign) {
                    // Only a bare name is assignable; anything else on the
                    // left of `:=` is rejected here.
                    let target = match expr {
                        Expression::CallOrVariable(CallOrVariable {
                            target: None,
                            name,
                            arguments: None,
                        }) => name,
                        _ => {
                            return Err(start.span().wrap(Error::InvalidAssignmentTarget));
                        }
                    };
                    let value = self.parse_expr()?;
                    Ok(Statement::Assignment { target, value })
                } else {
                    match expr {
                        Expression::CallOrVariable(call) => Ok(Statement::Call(call)),
                        _ => Err(start.span().wrap(Error::ExpectedCall)),
                    }
                }
            }
        }
    }

    fn parse_expr(&mut self) -> Result<Expression> {
        self.parse_expr_bp(0)
    }

    fn parse_expr_bp(&mut self, min_bp: u8) -> Result<Expression> {
        let lhs_token = self.advance();
        let mut lhs = self.parse_nud(lhs_token)?;

        loop {
            let op_token = self.peek();

            if let Some((lbp, rbp)) = Self::infix_binding_power(op_token.kind) {
                if lbp < min_bp {
                    // Operator binds less tightly than the minimum required
                    break;
                }

                self.advance(); // Operator
                lhs = self.parse_led(op_token, lhs, rbp)?;
            } else {
                // Not an infix operator or binds too loosely
                break;
            }
        }

        Ok(lhs)
    }

    /// Parses tokens that start an expression (literals, prefix operators,
    /// grouping, names).
    fn parse_nud(&mut self, token: Token) -> Result<Expression> {
        match token.kind {
            TokenKind::Number => {
                let value = extract::int(token, self.src)
                    .map_err(|_| token.span().wrap(Error::IntegerOutOfRange))?;
                Ok(Expression::Int(value))
            }
            TokenKind::New => {
                let ty = self.parse_ident()?;
                Ok(Expression::New(ty))
            }
            TokenKind::LParen => {
                let expr = self.parse_expr()?;
                self.consume(TokenKind::RParen)?;
                Ok(expr)
            }
            TokenKind::Minus => {
                let operand = self.parse_expr_bp(Self::PREFIX_BP)?;
                Ok(Expression::Unary {
                    op: UnaryOperator::Neg,
                    operand: Box::new(operand),
                })
            }
            TokenKind::Identifier => {
                let name = self.intern_ident(token);
                let arguments = self.parse_call_arguments()?;
                Ok(Expression::CallOrVariable(CallOrVariable {
                    target: None,
                    name,
                    arguments,
                }))
            }
            found => Err(token.span().wrap(Error::unexpected("an expression", found))),
        }
    }

    /// Parses infix and postfix continuations of an expression.
    fn parse_led(&mut self, op: Token, lhs: Expression, rbp: u8) -> Result<Expression> {
        let op = match op.kind {
            TokenKind::Dot => {
                let name = self.parse_ident()?;
                let arguments = self.parse_call_arguments()?;
                return Ok(Expression::CallOrVariable(CallOrVariable {
                    target: Some(Box::new(lhs)),
                    name,
                    arguments,
                }));
            }
            TokenKind::Plus => BinaryOperator::Add,
            TokenKind::Minus => BinaryOperator::Sub,
            TokenKind::Star => BinaryOperator::Mul,
            TokenKind::Slash => BinaryOperator::Div,
            _ => unreachable!("non-infix token in parse_led"),
        };
        let rhs = self.parse_expr_bp(rbp)?;
        Ok(Expression::Binary {
            op,
            left: Box::new(lhs),
            right: Box::new(rhs),
        })
    }

    /// Parses `( expr, ... )` if the next token opens a call; returns `None`
    /// when no parentheses follow (the uniform-access ambiguous form).
    fn parse_call_arguments(&mut self) -> Result<Option<Vec<Expression>>> {
        if !self.take(TokenKind::LParen) {
            return Ok(None);
        }
        let mut arguments = Vec::new();
        if self.take(TokenKind::RParen) {
            return Ok(Some(arguments));
        }
        loop {
            arguments.push(self.parse_expr()?);
            if !self.take(TokenKind::Comma) {
                break;
            }
        }
        self.consume(TokenKind::RParen)?;
        Ok(Some(arguments))
    }

    const PREFIX_BP: u8 = 9;

    fn infix_binding_power(kind: TokenKind) -> Option<(u8, u8)> {
        let bp = match kind {
            TokenKind::Plus | TokenKind::Minus => (5, 6),
            TokenKind::Star | TokenKind::Slash => (7, 8),
            TokenKind::Dot => (11, 12),
            _ => return None,
        };
        Some(bp)
    }
}

/// Token navigation. Trivia (whitespace, comments) is skipped on the fly.
impl Parser<'_, '_, '_> {
    fn new<'src, 'tok, 'ident>(
        src: &'src str,
        tokens: &'tok [Token],
        interner: &'ident mut Interner,
    ) -> Parser<'src, 'tok, 'ident> {
        Parser {
            src,
            tokens,
            interner,
            cursor: 0,
        }
    }

    fn peek(&mut self) -> Token {
        while self.tokens[self.cursor].kind.is_trivia() {
            self.cursor += 1;
        }
        self.tokens[self.cursor]
    }

    fn advance(&mut self) -> Token {
        let token = self.peek();
        if !token.is_eof() {
            self.cursor += 1;
        }
        token
    }

    fn at(&mut self, kind: TokenKind) -> bool {
        self.peek().kind == kind
    }

    fn take(&mut self, kind: TokenKind) -> bool {
        if self.at(kind) {
            self.advance();
            return true;
        }
        false
    }

    fn consume(&mut self, kind: TokenKind) -> Result<Token> {
        let token = self.advance();
        if token.kind == kind {
            Ok(token)
        } else {
            let expected = match kind {
                TokenKind::Identifier => "an identifier",
                TokenKind::Colon => "`:`",
                TokenKind::RParen => "`)`",
                TokenKind::Do => "`do`",
                TokenKind::End => "`end`",
                TokenKind::Class => "`class`",
                _ => "a different token",
            };
            Err(token.span().wrap(Error::unexpected(expected, token.kind)))
        }
    }

    fn parse_ident(&mut self) -> Result<Ident> {
        let token = self.consume(TokenKind::Identifier)?;
        Ok(self.intern_ident(token))
    }

    fn intern_ident(&mut self, token: Token) -> Ident {
        Ident {
            name: self.interner.intern(extract::ident(token, self.src)),
            span: token.span(),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum Error {
    UnexpectedToken {
        expected: &'static str,
        found: TokenKind,
    },
    UnexpectedChar,
    UnclosedComment,
    IntegerOutOfRange,
    InvalidAssignmentTarget,
    ExpectedCall,
    EmptyProgram,
}

impl Error {
    fn unexpected(expected: &'static str, found: TokenKind) -> Error {
        match found {
            TokenKind::ErrorUnexpectedChar => Error::UnexpectedChar,
            TokenKind::ErrorUnclosedComment => Error::UnclosedComment,
            _ => Error::UnexpectedToken { expected, found },
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::UnexpectedToken { expected, found } => {
                write!(f, "expected {expected}, found {found}")
            }
            Error::UnexpectedChar => f.write_str("unexpected character"),
            Error::UnclosedComment => f.write_str("unclosed block comment"),
            Error::IntegerOutOfRange => f.write_str("integer literal does not fit in a word"),
            Error::InvalidAssignmentTarget => {
                f.write_str("left side of `:=` must be a variable name")
            }
            Error::ExpectedCall => f.write_str("expression statement must be a call"),
            Error::EmptyProgram => f.write_str("source contains no class declarations"),
        }
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::fmt::print_program_string;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    fn parse(src: &str) -> (Interner, Result<Program>) {
        let mut interner = Interner::with_capacity(32);
        let mut tokens = Vec::with_capacity(128);
        let result = parse_program(src, &mut tokens, &mut interner);
        (interner, result)
    }

    #[test]
    fn parses_classes_features_and_statements() {
        let (interner, result) = parse(indoc! {"
            class Point
                x: Integer
                y: Integer

                norm2(): Integer do
                    result := x * x + y * y
                end

                scale(factor: Integer) do
                    x := x * factor
                end
            end

            class Main
                main() do
                    var p: Point := new Point
                    p.scale(2)
                end
            end
        "});
        let program = result.expect("program should parse");
        let printed = print_program_string(&program, &interner);
        assert_eq!(
            printed,
            indoc! {"
                class Point
                  field x: Integer
                  field y: Integer
                  method norm2(): Integer
                    assign result
                      binary +
                        binary *
                          name x
                          name x
                        binary *
                          name y
                          name y
                  method scale(factor: Integer)
                    assign x
                      binary *
                        name x
                        name factor
                class Main
                  method main()
                    var p: Point
                      new Point
                    call scale
                      target
                        name p
                      args
                        int 2
            "}
        );
    }

    #[test]
    fn precedence_and_grouping() {
        let (interner, result) = parse(indoc! {"
            class T
                f(): Integer do
                    result := 1 + 2 * 3
                    result := (1 + 2) * 3
                    result := -x + y
                    result := a.b.c(result)
                end
            end
        "});
        let program = result.expect("program should parse");
        let printed = print_program_string(&program, &interner);
        assert_eq!(
            printed,
            indoc! {"
                class T
                  method f(): Integer
                    assign result
                      binary +
                        int 1
                        binary *
                          int 2
                          int 3
                    assign result
                      binary *
                        binary +
                          int 1
                          int 2
                        int 3
                    assign result
                      binary +
                        unary -
                          name x
                        name y
                    assign result
                      call c
                        target
                          call b
                            target
                              name a
                        args
                          name result
            "}
        );
    }

    #[test]
    fn zero_argument_call_keeps_parentheses() {
        let (interner, result) = parse("class T f() do tick() end end");
        let program = result.expect("program should parse");
        let printed = print_program_string(&program, &interner);
        assert_eq!(
            printed,
            indoc! {"
                class T
                  method f()
                    call tick
                      args
            "}
        );
    }

    #[test]
    fn first_error_aborts() {
        let cases: &[(&str, Error)] = &[
            ("", Error::EmptyProgram),
            (
                "class T f() do p.x := 1 end end",
                Error::InvalidAssignmentTarget,
            ),
            ("class T f() do x + 1 end end", Error::ExpectedCall),
            ("class T f() do 1 end end", Error::ExpectedCall),
            (
                "class T f() do var x: Integer := 99999999999999999999 end end",
                Error::IntegerOutOfRange,
            ),
            (
                "class T f() do /* oops end end",
                Error::UnclosedComment,
            ),
            (
                "class T f() do x := ? end end",
                Error::UnexpectedChar,
            ),
        ];
        for (src, expected) in cases {
            let (_, result) = parse(src);
            let error = result.expect_err("source should not parse");
            assert_eq!(&error.item, expected, "for source: {src}");
        }
    }

    #[test]
    fn unexpected_token_reports_expectation() {
        let (_, result) = parse("class T x end end");
        let error = result.expect_err("source should not parse");
        assert_eq!(
            error.item,
            Error::UnexpectedToken {
                expected: "`:` or `(`",
                found: TokenKind::End,
            }
        );
    }
}
