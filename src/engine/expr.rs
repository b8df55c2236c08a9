//! Rule expression parsing.
//!
//! Two grammars: `var op threshold` for numeric ranges, and propositional
//! logic over identifiers and comparisons for boolean rules.
//!
//! ```text
//! expr    := or ( ("implies" | "=>") expr )?
//! or      := and ( ("or" | "||") and )*
//! and     := unary ( ("and" | "&&") unary )*
//! unary   := ("not" | "!") unary | primary
//! primary := "(" expr ")" | operand ( cmp operand )?
//! operand := ident | number | string | "true" | "false"
//! ```

use crate::error::RuleError;
use crate::oracle::{CmpOp, Formula, Term, Value};

/// Operators accepted by numeric range rules.
const RANGE_OPERATORS: &[&str] = &["<=", ">=", "<", ">", "=="];

/// A parsed `var op threshold` expression.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeExpr {
    /// Variable name.
    pub variable: String,
    /// Comparison operator.
    pub op: CmpOp,
    /// Threshold.
    pub threshold: f64,
}

/// Parse a numeric range expression: exactly three whitespace-separated
/// tokens.
///
/// # Errors
///
/// [`RuleError::InvalidExpression`] on a wrong token count or a non-numeric
/// threshold, [`RuleError::UnknownOperator`] on an operator outside
/// `<= >= < > ==`.
pub fn parse_range(expression: &str) -> Result<RangeExpr, RuleError> {
    let parts: Vec<&str> = expression.split_whitespace().collect();
    let [variable, op, threshold] = parts.as_slice() else {
        return Err(invalid(expression, "expected `<variable> <operator> <threshold>`"));
    };
    if !RANGE_OPERATORS.contains(op) {
        return Err(RuleError::UnknownOperator((*op).to_string()));
    }
    let op = CmpOp::parse(op).ok_or_else(|| RuleError::UnknownOperator((*op).to_string()))?;
    let threshold = threshold
        .parse::<f64>()
        .map_err(|_| invalid(expression, "threshold is not a number"))?;
    Ok(RangeExpr {
        variable: (*variable).to_string(),
        op,
        threshold,
    })
}

/// Parse a boolean expression into a formula.
///
/// # Errors
///
/// Returns [`RuleError::InvalidExpression`] if the text is not in the
/// grammar.
pub fn parse_boolean(expression: &str) -> Result<Formula, RuleError> {
    let tokens = tokenize(expression)?;
    let mut parser = Parser {
        tokens: &tokens,
        pos: 0,
        source: expression,
    };
    let formula = parser.expr()?;
    if parser.pos != tokens.len() {
        return Err(invalid(expression, "unexpected trailing input"));
    }
    Ok(formula)
}

fn invalid(expression: &str, reason: &str) -> RuleError {
    RuleError::InvalidExpression {
        expression: expression.to_string(),
        reason: reason.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Literal(Value),
    And,
    Or,
    Not,
    Implies,
    LParen,
    RParen,
    Cmp(CmpOp),
}

fn tokenize(expression: &str) -> Result<Vec<Token>, RuleError> {
    let chars: Vec<char> = expression.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '&' if next == Some('&') => {
                tokens.push(Token::And);
                i += 2;
            }
            '|' if next == Some('|') => {
                tokens.push(Token::Or);
                i += 2;
            }
            '=' if next == Some('>') => {
                tokens.push(Token::Implies);
                i += 2;
            }
            '=' if next == Some('=') => {
                tokens.push(Token::Cmp(CmpOp::Eq));
                i += 2;
            }
            '=' => {
                tokens.push(Token::Cmp(CmpOp::Eq));
                i += 1;
            }
            '!' if next == Some('=') => {
                tokens.push(Token::Cmp(CmpOp::Ne));
                i += 2;
            }
            '!' => {
                tokens.push(Token::Not);
                i += 1;
            }
            '<' | '>' => {
                let op = match (c, next) {
                    ('<', Some('=')) => CmpOp::Le,
                    ('>', Some('=')) => CmpOp::Ge,
                    ('<', _) => CmpOp::Lt,
                    _ => CmpOp::Gt,
                };
                i += if next == Some('=') { 2 } else { 1 };
                tokens.push(Token::Cmp(op));
            }
            '\'' | '"' => {
                let end = chars[i + 1..]
                    .iter()
                    .position(|&ch| ch == c)
                    .ok_or_else(|| invalid(expression, "unterminated string literal"))?;
                let text: String = chars[i + 1..i + 1 + end].iter().collect();
                tokens.push(Token::Literal(Value::Str(text)));
                i += end + 2;
            }
            c if c.is_ascii_digit() || (c == '-' && next.is_some_and(|n| n.is_ascii_digit())) => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let literal = if text.contains('.') {
                    text.parse::<f64>().ok().map(Value::Real)
                } else {
                    text.parse::<i64>().ok().map(Value::Int)
                };
                let literal = literal.ok_or_else(|| invalid(expression, "malformed number"))?;
                tokens.push(Token::Literal(literal));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '.')
                {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                let token = match word.to_lowercase().as_str() {
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    "implies" => Token::Implies,
                    "true" => Token::Literal(Value::Bool(true)),
                    "false" => Token::Literal(Value::Bool(false)),
                    _ => Token::Ident(word),
                };
                tokens.push(token);
            }
            _ => return Err(invalid(expression, &format!("unexpected character '{c}'"))),
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    source: &'a str,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expr(&mut self) -> Result<Formula, RuleError> {
        let premise = self.or()?;
        if self.eat(&Token::Implies) {
            let conclusion = self.expr()?;
            return Ok(Formula::implies(premise, conclusion));
        }
        Ok(premise)
    }

    fn or(&mut self) -> Result<Formula, RuleError> {
        let mut items = vec![self.and()?];
        while self.eat(&Token::Or) {
            items.push(self.and()?);
        }
        Ok(if items.len() == 1 {
            items.remove(0)
        } else {
            Formula::Or(items)
        })
    }

    fn and(&mut self) -> Result<Formula, RuleError> {
        let mut items = vec![self.unary()?];
        while self.eat(&Token::And) {
            items.push(self.unary()?);
        }
        Ok(if items.len() == 1 {
            items.remove(0)
        } else {
            Formula::And(items)
        })
    }

    fn unary(&mut self) -> Result<Formula, RuleError> {
        if self.eat(&Token::Not) {
            return Ok(Formula::not(self.unary()?));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Formula, RuleError> {
        if self.eat(&Token::LParen) {
            let inner = self.expr()?;
            if !self.eat(&Token::RParen) {
                return Err(invalid(self.source, "missing closing parenthesis"));
            }
            return Ok(inner);
        }
        let lhs = self.operand()?;
        if let Some(Token::Cmp(op)) = self.peek().cloned() {
            self.pos += 1;
            let rhs = self.operand()?;
            return Ok(Formula::Cmp { lhs, op, rhs });
        }
        match lhs {
            Term::Const(Value::Bool(b)) => Ok(Formula::Const(b)),
            Term::Var(_) => Ok(Formula::Atom(lhs)),
            Term::Const(_) => Err(invalid(self.source, "a bare literal is not a condition")),
        }
    }

    fn operand(&mut self) -> Result<Term, RuleError> {
        match self.peek().cloned() {
            Some(Token::Ident(name)) => {
                self.pos += 1;
                Ok(Term::Var(name))
            }
            Some(Token::Literal(value)) => {
                self.pos += 1;
                Ok(Term::Const(value))
            }
            _ => Err(invalid(self.source, "expected an identifier or literal")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::Model;

    #[test]
    fn test_parse_range() {
        let range = parse_range("debt_to_income_ratio <= 0.43").unwrap();
        assert_eq!(range.variable, "debt_to_income_ratio");
        assert_eq!(range.op, CmpOp::Le);
        assert!((range.threshold - 0.43).abs() < f64::EPSILON);
    }

    #[test]
    fn test_parse_range_errors() {
        assert!(matches!(
            parse_range("amount<=100"),
            Err(RuleError::InvalidExpression { .. })
        ));
        assert!(matches!(
            parse_range("amount != 100"),
            Err(RuleError::UnknownOperator(op)) if op == "!="
        ));
        assert!(matches!(
            parse_range("amount <= lots"),
            Err(RuleError::InvalidExpression { .. })
        ));
    }

    #[test]
    fn test_parse_implication() {
        let f = parse_boolean("is_denial implies has_specific_reason").unwrap();
        assert_eq!(
            f,
            Formula::implies(
                Formula::var("is_denial"),
                Formula::var("has_specific_reason")
            )
        );
    }

    #[test]
    fn test_precedence() {
        let f = parse_boolean("not a and b or c").unwrap();
        assert_eq!(
            f,
            Formula::Or(vec![
                Formula::And(vec![Formula::not(Formula::var("a")), Formula::var("b")]),
                Formula::var("c"),
            ])
        );
    }

    #[test]
    fn test_symbolic_operators_and_comparisons() {
        let f = parse_boolean("(dti <= 43 || factors >= 2) && status != 'denied'").unwrap();
        let mut model = Model::new();
        model.insert("dti".into(), Value::Real(45.0));
        model.insert("factors".into(), Value::Int(2));
        model.insert("status".into(), Value::from("approved"));
        assert!(f.eval(&model).unwrap());
        model.insert("factors".into(), Value::Int(1));
        assert!(!f.eval(&model).unwrap());
    }

    #[test]
    fn test_literals() {
        assert_eq!(parse_boolean("true").unwrap(), Formula::Const(true));
        assert_eq!(
            parse_boolean("flag == false").unwrap(),
            Formula::cmp(Term::var("flag"), CmpOp::Eq, false)
        );
    }

    #[test]
    fn test_rejects_prose() {
        assert!(parse_boolean("DTI > 43% requires compensating factors").is_err());
        assert!(parse_boolean("(a and b").is_err());
        assert!(parse_boolean("42").is_err());
    }
}
