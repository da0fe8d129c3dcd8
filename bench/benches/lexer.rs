use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};
use mica::{lexer, token::TokenKind};

static INPUT: &str = include_str!("../../demos/big.mica");

fn lex(input: &str) {
    let mut i = 0;
    for token in lexer::lex_in_new(input) {
        if matches!(token.kind, TokenKind::Whitespace) {
            continue;
        }
        i += 1;
    }
    black_box(i);
}

fn criterion_benchmark(c: &mut Criterion) {
    c.bench_function("lexer", |b| b.iter(|| lex(black_box(INPUT))));
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
