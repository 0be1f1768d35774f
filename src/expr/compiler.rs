//! Orders lexed tokens into reverse Polish form.

use crate::ast::{Expr, ExprToken};
use crate::error::{Error, ErrorKind, Result};
use crate::expr::lexer::{self, Lexeme};
use crate::expr::operator::{Associativity, BinaryOp, UnaryOp};
use crate::value::format_number;

/// Compile expression source into a token list ready for evaluation.
pub fn compile(expression: &str) -> Result<Expr> {
    let lexemes = lexer::tokenize(expression)?;
    let mut compiler = Compiler::default();
    for lexeme in lexemes {
        compiler.step(lexeme)?;
    }
    compiler.finish(expression)
}

/// Output slots. Marks delimit parenthesized groups until they close.
enum Slot {
    Token(ExprToken),
    ParamMark,
    SubMark,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Pending {
    Binary(BinaryOp),
    Unary(UnaryOp),
    ArrayStart,
    ObjectStart,
    ParamStart,
    SubStart,
}

#[derive(Default)]
struct Compiler {
    output: Vec<Slot>,
    stack: Vec<Pending>,
}

impl Compiler {
    fn push(&mut self, token: ExprToken) {
        self.output.push(Slot::Token(token));
    }

    fn step(&mut self, lexeme: Lexeme) -> Result<()> {
        match lexeme {
            Lexeme::Test { name, negated } => self.push(ExprToken::Test {
                name,
                negated,
                params: None,
            }),
            Lexeme::Comma => {
                while let Some(&top) = self.stack.last() {
                    if !matches!(top, Pending::Binary(_) | Pending::Unary(_)) {
                        break;
                    }
                    self.stack.pop();
                    self.emit(top);
                }
                self.push(ExprToken::Comma);
            }
            Lexeme::Number(value) => self.push(ExprToken::Number { value }),
            Lexeme::String(value) => self.push(ExprToken::String { value }),
            Lexeme::Bool(value) => self.push(ExprToken::Bool { value }),
            Lexeme::Null => self.push(ExprToken::Null),
            Lexeme::Context => self.push(ExprToken::Context),
            Lexeme::Variable(name) => self.push(ExprToken::Variable { name }),
            Lexeme::Lambda { params, body } => {
                let body = compile(&body)?;
                self.push(ExprToken::Lambda { params, body });
            }
            Lexeme::Binary(symbol) if symbol == ":" => self.colon()?,
            Lexeme::Binary(symbol) => {
                let op = BinaryOp::from_symbol(&symbol).ok_or_else(|| unknown_operator(&symbol))?;
                self.flush_operators(op.precedence(), op.associativity());
                self.stack.push(Pending::Binary(op));
            }
            Lexeme::Unary(symbol) => {
                let op = UnaryOp::from_symbol(&symbol).ok_or_else(|| unknown_operator(&symbol))?;
                self.flush_operators(op.precedence(), op.associativity());
                self.stack.push(Pending::Unary(op));
            }
            Lexeme::SubexprStart => {
                self.output.push(Slot::SubMark);
                self.stack.push(Pending::SubStart);
            }
            Lexeme::SubexprEnd => {
                self.drain_to(Pending::SubStart)?;
                let tokens = self.take_group()?;
                self.push(ExprToken::Group { tokens, call: false });
            }
            Lexeme::ParamStart => {
                self.output.push(Slot::ParamMark);
                self.stack.push(Pending::ParamStart);
            }
            Lexeme::ParamEnd => {
                self.drain_to(Pending::ParamStart)?;
                let tokens = self.take_group()?;
                self.attach_params(tokens);
            }
            Lexeme::Slice { start, end } => self.push(ExprToken::Slice { start, end }),
            Lexeme::ArrayStart => {
                self.push(ExprToken::ArrayStart);
                self.stack.push(Pending::ArrayStart);
            }
            Lexeme::ArrayEnd => {
                self.drain_to(Pending::ArrayStart)?;
                self.push(ExprToken::ArrayEnd);
            }
            Lexeme::ObjectStart => {
                self.push(ExprToken::ObjectStart);
                self.stack.push(Pending::ObjectStart);
            }
            Lexeme::ObjectEnd => {
                self.drain_to(Pending::ObjectStart)?;
                self.push(ExprToken::ObjectEnd);
            }
            Lexeme::Filter(name) => self.push(ExprToken::Filter { name, params: None }),
            Lexeme::Function(name) => self.push(ExprToken::Function { name, params: None }),
            Lexeme::KeyPeriod(key) => self.push(ExprToken::KeyPeriod { key }),
            Lexeme::KeyBrackets(text) => {
                let key = compile(&text)?;
                self.push(ExprToken::KeyBrackets { key, params: None });
            }
        }
        Ok(())
    }

    fn emit(&mut self, pending: Pending) {
        match pending {
            Pending::Binary(op) => self.push(ExprToken::Binary { op }),
            Pending::Unary(op) => self.push(ExprToken::Unary { op }),
            // Openers never reach the output through here.
            _ => {}
        }
    }

    /// Move operators that bind at least as tightly as the incoming one.
    fn flush_operators(&mut self, precedence: u8, associativity: Associativity) {
        while let Some(&top) = self.stack.last() {
            let top_precedence = match top {
                Pending::Binary(op) => op.precedence(),
                Pending::Unary(op) => op.precedence(),
                _ => break,
            };
            let pop = match associativity {
                Associativity::LeftToRight => precedence >= top_precedence,
                Associativity::RightToLeft => precedence > top_precedence,
            };
            if !pop {
                break;
            }
            self.stack.pop();
            self.emit(top);
        }
    }

    fn drain_to(&mut self, opener: Pending) -> Result<()> {
        loop {
            match self.stack.pop() {
                Some(top) if top == opener => return Ok(()),
                Some(top @ (Pending::Binary(_) | Pending::Unary(_))) => self.emit(top),
                Some(other) => {
                    return Err(Error::new(ErrorKind::UnparseableExpression(format!(
                        "Mismatched brackets: expected to close {:?}, found {:?}",
                        opener, other
                    ))))
                }
                None => {
                    return Err(Error::new(ErrorKind::UnparseableExpression(format!(
                        "Closing bracket without a matching {:?}",
                        opener
                    ))))
                }
            }
        }
    }

    /// Pop output back to the nearest group mark.
    fn take_group(&mut self) -> Result<Expr> {
        let mut tokens = Vec::new();
        loop {
            match self.output.pop() {
                Some(Slot::Token(token)) => tokens.push(token),
                Some(Slot::ParamMark | Slot::SubMark) => break,
                None => {
                    return Err(Error::new(ErrorKind::UnparseableExpression(
                        "Closing parenthesis without an opening one".into(),
                    )))
                }
            }
        }
        tokens.reverse();
        Ok(tokens)
    }

    /// Parameters bind to a directly preceding call; anything else is a
    /// call-position group resolved at evaluation time.
    fn attach_params(&mut self, tokens: Expr) {
        let takes_params = matches!(
            self.output.last(),
            Some(Slot::Token(
                ExprToken::Function { params: None, .. }
                    | ExprToken::Filter { params: None, .. }
                    | ExprToken::Test { params: None, .. }
                    | ExprToken::KeyBrackets { params: None, .. }
            ))
        );
        if !takes_params {
            self.push(ExprToken::Group { tokens, call: true });
            return;
        }
        if let Some(Slot::Token(
            ExprToken::Function { params, .. }
            | ExprToken::Filter { params, .. }
            | ExprToken::Test { params, .. }
            | ExprToken::KeyBrackets { params, .. },
        )) = self.output.last_mut()
        {
            *params = Some(tokens);
        }
    }

    /// `:` either completes a ternary or ends an object key.
    fn colon(&mut self) -> Result<()> {
        let ternary = BinaryOp::Conditional;
        self.flush_operators(ternary.precedence(), ternary.associativity());

        // Ternaries already completed inside this branch.
        while let Some(&Pending::Binary(BinaryOp::Conditional)) = self.stack.last() {
            self.stack.pop();
            self.push(ExprToken::Binary { op: BinaryOp::Conditional });
        }

        if let Some(top @ Pending::Binary(BinaryOp::ShortConditional)) = self.stack.last_mut() {
            *top = Pending::Binary(BinaryOp::Conditional);
            return Ok(());
        }

        let key = match self.output.pop() {
            Some(Slot::Token(ExprToken::String { value })) => ExprToken::ObjectKey { key: value },
            Some(Slot::Token(ExprToken::Variable { name })) => ExprToken::ObjectKey { key: name },
            Some(Slot::Token(ExprToken::Number { value })) => ExprToken::ObjectKey {
                key: format_number(value),
            },
            Some(Slot::Token(ExprToken::Group { tokens, .. })) => {
                ExprToken::ComputedKey { key: tokens }
            }
            Some(Slot::Token(other)) => {
                return Err(Error::new(ErrorKind::InvalidObjectKey(format!("{:?}", other))))
            }
            Some(_) | None => {
                return Err(Error::new(ErrorKind::InvalidObjectKey("nothing".into())))
            }
        };
        self.push(key);
        Ok(())
    }

    fn finish(mut self, expression: &str) -> Result<Expr> {
        while let Some(top) = self.stack.pop() {
            match top {
                Pending::Binary(_) | Pending::Unary(_) => self.emit(top),
                _ => return Err(unclosed(expression)),
            }
        }
        self.output
            .into_iter()
            .map(|slot| match slot {
                Slot::Token(token) => Ok(token),
                Slot::ParamMark | Slot::SubMark => Err(unclosed(expression)),
            })
            .collect()
    }
}

fn unknown_operator(symbol: &str) -> Error {
    Error::new(ErrorKind::UnparseableExpression(format!(
        "Unknown operator '{}'",
        symbol
    )))
}

fn unclosed(expression: &str) -> Error {
    Error::new(ErrorKind::UnparseableExpression(format!(
        "Unclosed bracket in expression '{}'",
        expression
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ExprToken::*;

    fn num(value: f64) -> ExprToken {
        Number { value }
    }

    fn var(name: &str) -> ExprToken {
        Variable { name: name.into() }
    }

    fn bin(op: BinaryOp) -> ExprToken {
        Binary { op }
    }

    #[test]
    fn precedence_orders_output() {
        assert_eq!(
            compile("2 + 3 * 4").unwrap(),
            vec![num(2.0), num(3.0), num(4.0), bin(BinaryOp::Mul), bin(BinaryOp::Add)]
        );
    }

    #[test]
    fn parentheses_group() {
        assert_eq!(
            compile("(2 + 3) * 4").unwrap(),
            vec![
                Group {
                    tokens: vec![num(2.0), num(3.0), bin(BinaryOp::Add)],
                    call: false,
                },
                num(4.0),
                bin(BinaryOp::Mul),
            ]
        );
    }

    #[test]
    fn power_is_right_associative() {
        assert_eq!(
            compile("2 ** 3 ** 2").unwrap(),
            vec![num(2.0), num(3.0), num(2.0), bin(BinaryOp::Pow), bin(BinaryOp::Pow)]
        );
    }

    #[test]
    fn function_params_attach() {
        assert_eq!(
            compile("max(1, a)").unwrap(),
            vec![Function {
                name: "max".into(),
                params: Some(vec![num(1.0), Comma, var("a")]),
            }]
        );
    }

    #[test]
    fn method_call_becomes_call_group() {
        assert_eq!(
            compile("user.greet('hi')").unwrap(),
            vec![
                var("user"),
                KeyPeriod { key: "greet".into() },
                Group {
                    tokens: vec![String { value: "hi".into() }],
                    call: true,
                },
            ]
        );
    }

    #[test]
    fn ternary_nests_to_the_right() {
        assert_eq!(
            compile("a ? b : c ? d : e").unwrap(),
            vec![
                var("a"),
                var("b"),
                var("c"),
                var("d"),
                var("e"),
                bin(BinaryOp::Conditional),
                bin(BinaryOp::Conditional),
            ]
        );
    }

    #[test]
    fn short_ternary_without_colon() {
        assert_eq!(
            compile("a ? b").unwrap(),
            vec![var("a"), var("b"), bin(BinaryOp::ShortConditional)]
        );
    }

    #[test]
    fn object_keys() {
        assert_eq!(
            compile("{a: 1, 'b': x ?: 2, 3: y}").unwrap(),
            vec![
                ObjectStart,
                ObjectKey { key: "a".into() },
                num(1.0),
                Comma,
                ObjectKey { key: "b".into() },
                var("x"),
                num(2.0),
                bin(BinaryOp::Elvis),
                Comma,
                ObjectKey { key: "3".into() },
                var("y"),
                ObjectEnd,
            ]
        );
    }

    #[test]
    fn filters_bind_to_the_last_value() {
        assert_eq!(
            compile("a ~ b|upper").unwrap(),
            vec![
                var("a"),
                var("b"),
                Filter {
                    name: "upper".into(),
                    params: None,
                },
                bin(BinaryOp::Concat),
            ]
        );
    }

    #[test]
    fn not_binds_before_and() {
        assert_eq!(
            compile("not a and b").unwrap(),
            vec![
                var("a"),
                Unary { op: UnaryOp::Not },
                var("b"),
                bin(BinaryOp::And),
            ]
        );
    }

    #[test]
    fn unbalanced_brackets_fail() {
        assert!(compile("[1, 2").is_err());
        assert!(compile("(1").is_err());
        assert!(compile("{[}").is_err());
    }

    #[test]
    fn bad_object_key() {
        let err = compile("{[1]: 2}").unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::InvalidObjectKey(_)));
    }
}
