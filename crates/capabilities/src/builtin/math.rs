//! Safe arithmetic evaluation.
//!
//! A small recursive-descent parser over `+ - * / % ^`, parentheses,
//! unary minus and the `sqrt`/`abs` functions.  `x`, `×` and `÷` are
//! accepted as operators.  Nothing is ever executed beyond arithmetic.

use std::time::Instant;

use serde_json::{json, Value};
use sy_domain::capability::{
    CapabilityError, CapabilityResult, Invocation, InvocationOutput, Usage,
};

use crate::traits::Capability;

const MAX_EXPRESSION_CHARS: usize = 256;

pub struct MathSolver;

#[async_trait::async_trait]
impl Capability for MathSolver {
    async fn invoke(&self, invocation: Invocation) -> CapabilityResult {
        let started = Instant::now();
        let expression = match invocation.str_field("expression") {
            Some(expr) => expr.trim().to_owned(),
            None => {
                let query = invocation
                    .str_field("query")
                    .ok_or_else(|| CapabilityError::invalid_input("expected 'expression' or 'query'"))?;
                extract_expression(query).ok_or_else(|| {
                    CapabilityError::invalid_input(format!("no arithmetic expression found in {query:?}"))
                })?
            }
        };
        if expression.len() > MAX_EXPRESSION_CHARS {
            return Err(CapabilityError::invalid_input("expression too long"));
        }

        let result = evaluate(&expression).map_err(CapabilityError::invalid_input)?;
        let rendered = render_number(result);
        let output = json!({
            "expression": expression,
            "result": rendered,
            "text": format!("{expression} = {rendered}"),
        });
        Ok(InvocationOutput::new(output)
            .with_usage(Usage::new(started.elapsed().as_secs_f64(), 0.0)))
    }
}

/// Integral values render without a fractional part.
fn render_number(v: f64) -> Value {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        json!(v as i64)
    } else {
        json!(v)
    }
}

fn is_expression_char(c: char) -> bool {
    c.is_ascii_digit() || c.is_whitespace() || "+-*/%^().x×÷".contains(c)
}

/// Pull the longest arithmetic-looking span out of free text.
fn extract_expression(query: &str) -> Option<String> {
    let lowered = query.to_lowercase();
    let mut best: Option<String> = None;
    let mut current = String::new();
    // A trailing NUL flushes the final span.
    for c in lowered.chars().chain(std::iter::once('\0')) {
        if is_expression_char(c) {
            current.push(c);
            continue;
        }
        let span = current.trim();
        if span.chars().any(|c| c.is_ascii_digit())
            && best.as_ref().map_or(true, |b| span.len() > b.len())
        {
            best = Some(span.to_owned());
        }
        current.clear();
    }
    best
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Parser
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(f64),
    Op(char),
    LParen,
    RParen,
    Func(String),
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '0'..='9' | '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let n = text
                    .parse::<f64>()
                    .map_err(|_| format!("invalid number '{text}'"))?;
                tokens.push(Token::Num(n));
            }
            '+' | '-' | '*' | '/' | '%' | '^' => {
                tokens.push(Token::Op(c));
                i += 1;
            }
            'x' | 'X' | '×' => {
                tokens.push(Token::Op('*'));
                i += 1;
            }
            '÷' => {
                tokens.push(Token::Op('/'));
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            c if c.is_ascii_alphabetic() => {
                let start = i;
                while i < chars.len() && chars[i].is_ascii_alphabetic() {
                    i += 1;
                }
                let name: String = chars[start..i].iter().collect::<String>().to_lowercase();
                match name.as_str() {
                    "sqrt" | "abs" => tokens.push(Token::Func(name)),
                    _ => return Err(format!("unknown identifier '{name}'")),
                }
            }
            other => return Err(format!("unexpected character '{other}'")),
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        t
    }

    // expr := term (('+' | '-') term)*
    fn expr(&mut self) -> Result<f64, String> {
        let mut value = self.term()?;
        while let Some(Token::Op(op @ ('+' | '-'))) = self.peek().cloned() {
            self.pos += 1;
            let rhs = self.term()?;
            value = if op == '+' { value + rhs } else { value - rhs };
        }
        Ok(value)
    }

    // term := power (('*' | '/' | '%') power)*
    fn term(&mut self) -> Result<f64, String> {
        let mut value = self.power()?;
        while let Some(Token::Op(op @ ('*' | '/' | '%'))) = self.peek().cloned() {
            self.pos += 1;
            let rhs = self.power()?;
            value = match op {
                '*' => value * rhs,
                _ if rhs == 0.0 => return Err("division by zero".into()),
                '/' => value / rhs,
                _ => value % rhs,
            };
        }
        Ok(value)
    }

    // power := unary ('^' power)?   (right associative)
    fn power(&mut self) -> Result<f64, String> {
        let base = self.unary()?;
        if let Some(Token::Op('^')) = self.peek() {
            self.pos += 1;
            let exp = self.power()?;
            return Ok(base.powf(exp));
        }
        Ok(base)
    }

    fn unary(&mut self) -> Result<f64, String> {
        match self.peek() {
            Some(Token::Op('-')) => {
                self.pos += 1;
                Ok(-self.unary()?)
            }
            Some(Token::Op('+')) => {
                self.pos += 1;
                self.unary()
            }
            _ => self.primary(),
        }
    }

    fn primary(&mut self) -> Result<f64, String> {
        match self.next() {
            Some(Token::Num(n)) => Ok(n),
            Some(Token::LParen) => {
                let v = self.expr()?;
                match self.next() {
                    Some(Token::RParen) => Ok(v),
                    _ => Err("missing closing parenthesis".into()),
                }
            }
            Some(Token::Func(name)) => {
                if self.next() != Some(Token::LParen) {
                    return Err(format!("expected '(' after {name}"));
                }
                let arg = self.expr()?;
                if self.next() != Some(Token::RParen) {
                    return Err(format!("missing closing parenthesis after {name}"));
                }
                match name.as_str() {
                    "sqrt" if arg < 0.0 => Err("square root of a negative number".into()),
                    "sqrt" => Ok(arg.sqrt()),
                    _ => Ok(arg.abs()),
                }
            }
            Some(other) => Err(format!("unexpected token {other:?}")),
            None => Err("unexpected end of expression".into()),
        }
    }
}

/// Evaluate an arithmetic expression.
pub fn evaluate(expression: &str) -> Result<f64, String> {
    let tokens = tokenize(expression)?;
    if tokens.is_empty() {
        return Err("empty expression".into());
    }
    let mut parser = Parser { tokens, pos: 0 };
    let value = parser.expr()?;
    if parser.pos < parser.tokens.len() {
        return Err(format!("unexpected trailing input at token {}", parser.pos));
    }
    if !value.is_finite() {
        return Err("result is not a finite number".into());
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precedence_and_associativity() {
        assert_eq!(evaluate("25 * 17").unwrap(), 425.0);
        assert_eq!(evaluate("2 + 3 * 4").unwrap(), 14.0);
        assert_eq!(evaluate("(2 + 3) * 4").unwrap(), 20.0);
        assert_eq!(evaluate("2 ^ 3 ^ 2").unwrap(), 512.0);
        assert_eq!(evaluate("-3 + 5").unwrap(), 2.0);
        assert_eq!(evaluate("10 % 4").unwrap(), 2.0);
    }

    #[test]
    fn functions_and_alt_operators() {
        assert_eq!(evaluate("sqrt(144)").unwrap(), 12.0);
        assert_eq!(evaluate("abs(-7)").unwrap(), 7.0);
        assert_eq!(evaluate("6 x 7").unwrap(), 42.0);
        assert_eq!(evaluate("8 ÷ 2").unwrap(), 4.0);
    }

    #[test]
    fn errors_are_reported() {
        assert!(evaluate("1 / 0").is_err());
        assert!(evaluate("2 +").is_err());
        assert!(evaluate("(1 + 2").is_err());
        assert!(evaluate("import os").is_err());
        assert!(evaluate("").is_err());
    }

    #[test]
    fn extracts_from_question() {
        assert_eq!(extract_expression("What is 25 * 17?").as_deref(), Some("25 * 17"));
        assert_eq!(extract_expression("hello there"), None);
    }

    #[tokio::test]
    async fn solver_answers_query() {
        let out = MathSolver
            .invoke(Invocation::new(json!({"query": "What is 25 * 17?"})))
            .await
            .unwrap();
        assert_eq!(out.output["result"], json!(425));
        assert_eq!(out.output["text"], "25 * 17 = 425");
    }

    #[tokio::test]
    async fn solver_rejects_non_math() {
        let err = MathSolver
            .invoke(Invocation::new(json!({"query": "tell me a joke"})))
            .await
            .unwrap_err();
        assert_eq!(err.kind, sy_domain::capability::CapabilityErrorKind::InvalidInput);
    }
}
