//! Small arithmetic evaluator shared by prompt templates and the offline
//! `math` model.
//!
//! Supports `+ - * / //`, parentheses, unary signs, numeric variables and the
//! `min`/`max` functions.

use std::collections::HashMap;

use versebatch_shared::{Result, VersebatchError};

/// Deepest allowed nesting of parentheses, calls and unary signs.
const MAX_DEPTH: usize = 256;

/// Evaluate `source` with the given numeric variables.
pub fn evaluate(source: &str, vars: &HashMap<String, f64>) -> Result<f64> {
    let tokens = tokenize(source)?;
    let mut parser = Parser {
        tokens: &tokens,
        pos: 0,
        depth: 0,
        vars,
        source,
    };

    let value = parser.expr()?;
    if parser.pos != tokens.len() {
        return Err(parser.error("unexpected trailing input"));
    }
    Ok(value)
}

/// Render a value the way results are written: integral values without a
/// fractional part.
pub fn format_number(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

// ---------------------------------------------------------------------------
// Tokens
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    FloorDiv,
    LParen,
    RParen,
    Comma,
}

fn tokenize(source: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = source.chars().collect();
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
                let n = text.parse::<f64>().map_err(|_| {
                    VersebatchError::parse(format!("invalid number '{text}' in '{source}'"))
                })?;
                tokens.push(Token::Number(n));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            '/' if chars.get(i + 1) == Some(&'/') => {
                tokens.push(Token::FloorDiv);
                i += 2;
            }
            _ => {
                tokens.push(match c {
                    '+' => Token::Plus,
                    '-' => Token::Minus,
                    '*' => Token::Star,
                    '/' => Token::Slash,
                    '(' => Token::LParen,
                    ')' => Token::RParen,
                    ',' => Token::Comma,
                    other => {
                        return Err(VersebatchError::parse(format!(
                            "unexpected character '{other}' in '{source}'"
                        )));
                    }
                });
                i += 1;
            }
        }
    }

    Ok(tokens)
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    depth: usize,
    vars: &'a HashMap<String, f64>,
    source: &'a str,
}

impl<'a> Parser<'a> {
    fn error(&self, what: &str) -> VersebatchError {
        VersebatchError::parse(format!("{what} in expression '{}'", self.source))
    }

    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<&'a Token> {
        let token = self.tokens.get(self.pos);
        self.pos += 1;
        token
    }

    fn expect(&mut self, expected: &Token) -> Result<()> {
        match self.next() {
            Some(t) if t == expected => Ok(()),
            _ => Err(self.error(&format!("expected {expected:?}"))),
        }
    }

    fn expr(&mut self) -> Result<f64> {
        let mut value = self.term()?;
        loop {
            match self.peek() {
                Some(Token::Plus) => {
                    self.pos += 1;
                    value += self.term()?;
                }
                Some(Token::Minus) => {
                    self.pos += 1;
                    value -= self.term()?;
                }
                _ => return Ok(value),
            }
        }
    }

    fn term(&mut self) -> Result<f64> {
        let mut value = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(op @ (Token::Star | Token::Slash | Token::FloorDiv)) => op.clone(),
                _ => return Ok(value),
            };
            self.pos += 1;
            let rhs = self.unary()?;

            value = match op {
                Token::Star => value * rhs,
                _ if rhs == 0.0 => return Err(self.error("division by zero")),
                Token::Slash => value / rhs,
                _ => (value / rhs).floor(),
            };
        }
    }

    /// Every recursive path passes through here, so this bounds stack use.
    fn unary(&mut self) -> Result<f64> {
        if self.depth >= MAX_DEPTH {
            return Err(VersebatchError::parse("expression nested too deeply"));
        }
        self.depth += 1;
        let value = self.signed();
        self.depth -= 1;
        value
    }

    fn signed(&mut self) -> Result<f64> {
        match self.peek() {
            Some(Token::Minus) => {
                self.pos += 1;
                Ok(-self.unary()?)
            }
            Some(Token::Plus) => {
                self.pos += 1;
                self.unary()
            }
            _ => self.primary(),
        }
    }

    fn primary(&mut self) -> Result<f64> {
        match self.next().cloned() {
            Some(Token::Number(n)) => Ok(n),
            Some(Token::LParen) => {
                let value = self.expr()?;
                self.expect(&Token::RParen)?;
                Ok(value)
            }
            Some(Token::Ident(name)) if self.peek() == Some(&Token::LParen) => {
                self.pos += 1;
                self.call(&name)
            }
            Some(Token::Ident(name)) => self
                .vars
                .get(&name)
                .copied()
                .ok_or_else(|| self.error(&format!("unknown variable '{name}'"))),
            _ => Err(self.error("expected a value")),
        }
    }

    /// Parse call arguments (after the opening paren) and apply `name`.
    fn call(&mut self, name: &str) -> Result<f64> {
        let mut args = vec![self.expr()?];
        while self.peek() == Some(&Token::Comma) {
            self.pos += 1;
            args.push(self.expr()?);
        }
        self.expect(&Token::RParen)?;

        match name {
            "min" => Ok(args.into_iter().fold(f64::INFINITY, f64::min)),
            "max" => Ok(args.into_iter().fold(f64::NEG_INFINITY, f64::max)),
            other => Err(self.error(&format!("unknown function '{other}'"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(source: &str) -> Result<f64> {
        evaluate(source, &HashMap::new())
    }

    #[test]
    fn precedence_and_parentheses() {
        assert_eq!(eval("1+2*3").unwrap(), 7.0);
        assert_eq!(eval("(1+2)*3").unwrap(), 9.0);
        assert_eq!(eval("10 - 4 - 3").unwrap(), 3.0);
        assert_eq!(eval("-(2+3)*-2").unwrap(), 10.0);
    }

    #[test]
    fn division_kinds() {
        assert_eq!(eval("5/2").unwrap(), 2.5);
        assert_eq!(eval("5//2").unwrap(), 2.0);
        assert!(eval("1/0").is_err());
    }

    #[test]
    fn functions_and_variables() {
        let vars = HashMap::from([("a".to_string(), 25.0), ("b".to_string(), 40.0)]);
        assert_eq!(evaluate("min(a, b)", &vars).unwrap(), 25.0);
        assert_eq!(evaluate("max(a, b, 100)", &vars).unwrap(), 100.0);
        assert_eq!(evaluate("a+5+b-3", &vars).unwrap(), 67.0);
        assert!(evaluate("c", &vars).is_err());
        assert!(evaluate("sqrt(a)", &vars).is_err());
    }

    #[test]
    fn malformed_expressions() {
        assert!(eval("a*/2").is_err());
        assert!(eval("(1+2").is_err());
        assert!(eval("1 2").is_err());
        assert!(eval("2 ^ 3").is_err());
        assert!(eval("").is_err());
    }

    #[test]
    fn nesting_is_bounded() {
        let nested = format!("{}1{}", "(".repeat(200), ")".repeat(200));
        assert_eq!(eval(&nested).unwrap(), 1.0);

        for deep in [
            format!("{}1", "(".repeat(200_000)),
            format!("{}1", "-".repeat(200_000)),
            format!("{}1{}", "max(".repeat(5_000), ")".repeat(5_000)),
        ] {
            let err = eval(&deep).unwrap_err();
            assert!(err.to_string().contains("nested too deeply"), "{err}");
        }
    }

    #[test]
    fn formats_integral_values_without_fraction() {
        assert_eq!(format_number(7.0), "7");
        assert_eq!(format_number(-3.0), "-3");
        assert_eq!(format_number(2.5), "2.5");
    }
}
