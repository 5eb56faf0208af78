//! Cut expressions over table columns.
//!
//! Two layers:
//!
//! - [`CutTemplate`]: a parsed cut with a leg slot. Identifiers starting with the slot
//!   marker (`LEP_` by default) refer to a column of whichever leg the template is
//!   instantiated for: `LEP_PROBNN_E > 0.2` on leg `L1` reads `L1_PROBNN_E`.
//! - [`Predicate`]: a cut over concrete columns, composable with `and` / `or` / `not`
//!   and evaluated column-wise into a boolean mask.
//!
//! Supports arithmetic (+, -, *, /), comparisons (==, !=, <, <=, >, >=),
//! boolean operators (&&, ||, !), and built-in functions (abs, sqrt, log,
//! exp, pow, min, max).

use std::fmt;

use rx_core::{Error, Result};

use crate::table::EventTable;

/// Default leg slot marker.
pub const LEG_SLOT: &str = "LEP_";

// ── AST ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Number(f64),
    Var(usize), // index into the owner's name table
    UnaryNeg(Box<Expr>),
    UnaryNot(Box<Expr>),
    BinOp(BinOp, Box<Expr>, Box<Expr>),
    Call(Func, Vec<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinOp {
    fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::And => "&&",
            BinOp::Or => "||",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Func {
    Abs,
    Sqrt,
    Log,
    Exp,
    Pow,
    Min,
    Max,
}

impl Func {
    fn name(self) -> &'static str {
        match self {
            Func::Abs => "abs",
            Func::Sqrt => "sqrt",
            Func::Log => "log",
            Func::Exp => "exp",
            Func::Pow => "pow",
            Func::Min => "min",
            Func::Max => "max",
        }
    }

    fn arity(self) -> usize {
        match self {
            Func::Pow | Func::Min | Func::Max => 2,
            _ => 1,
        }
    }
}

impl Expr {
    fn shifted(&self, offset: usize) -> Expr {
        match self {
            Expr::Number(n) => Expr::Number(*n),
            Expr::Var(i) => Expr::Var(i + offset),
            Expr::UnaryNeg(a) => Expr::UnaryNeg(Box::new(a.shifted(offset))),
            Expr::UnaryNot(a) => Expr::UnaryNot(Box::new(a.shifted(offset))),
            Expr::BinOp(op, a, b) => {
                Expr::BinOp(*op, Box::new(a.shifted(offset)), Box::new(b.shifted(offset)))
            }
            Expr::Call(f, args) => Expr::Call(*f, args.iter().map(|a| a.shifted(offset)).collect()),
        }
    }

    fn render(&self, names: &[String], out: &mut String) {
        match self {
            Expr::Number(n) => out.push_str(&n.to_string()),
            Expr::Var(i) => out.push_str(&names[*i]),
            Expr::UnaryNeg(a) => {
                out.push('-');
                a.render(names, out);
            }
            Expr::UnaryNot(a) => {
                out.push_str("!(");
                a.render(names, out);
                out.push(')');
            }
            Expr::BinOp(op, a, b) => {
                out.push('(');
                a.render(names, out);
                out.push(' ');
                out.push_str(op.symbol());
                out.push(' ');
                b.render(names, out);
                out.push(')');
            }
            Expr::Call(f, args) => {
                out.push_str(f.name());
                out.push('(');
                for (k, a) in args.iter().enumerate() {
                    if k > 0 {
                        out.push_str(", ");
                    }
                    a.render(names, out);
                }
                out.push(')');
            }
        }
    }
}

fn combine(
    op: BinOp,
    (lhs, lhs_names): (&Expr, &[String]),
    (rhs, rhs_names): (&Expr, &[String]),
) -> (Expr, Vec<String>) {
    let mut names = lhs_names.to_vec();
    names.extend(rhs_names.iter().cloned());
    let ast = Expr::BinOp(op, Box::new(lhs.clone()), Box::new(rhs.shifted(lhs_names.len())));
    (ast, names)
}

// ── Template ───────────────────────────────────────────────────

/// A cut with a leg slot, instantiated per leg into a [`Predicate`].
#[derive(Debug, Clone, PartialEq)]
pub struct CutTemplate {
    ast: Expr,
    /// Identifiers as written; slot identifiers keep their marker.
    names: Vec<String>,
    slot: String,
}

impl CutTemplate {
    /// Parse a template whose leg columns carry the [`LEG_SLOT`] marker.
    pub fn parse(input: &str) -> Result<Self> {
        let (ast, names) = parse(input)?;
        Ok(Self { ast, names, slot: LEG_SLOT.to_string() })
    }

    /// `true` if at least one identifier refers to the leg slot.
    pub fn has_slot(&self) -> bool {
        self.names.iter().any(|n| n.starts_with(&self.slot))
    }

    /// Template that requires both `self` and `other` (same slot marker as `self`).
    pub fn and(&self, other: &CutTemplate) -> CutTemplate {
        let other_names: Vec<String> = other
            .names
            .iter()
            .map(|n| match n.strip_prefix(&other.slot) {
                Some(rest) => format!("{}{rest}", self.slot),
                None => n.clone(),
            })
            .collect();
        let (ast, names) =
            combine(BinOp::And, (&self.ast, &self.names), (&other.ast, &other_names));
        CutTemplate { ast, names, slot: self.slot.clone() }
    }

    /// Substitute the leg prefix into every slot identifier.
    ///
    /// `LEP_PID_E` instantiated for `L2` reads the column `L2_PID_E`.
    pub fn instantiate(&self, leg: &str) -> Predicate {
        let names = self
            .names
            .iter()
            .map(|n| match n.strip_prefix(&self.slot) {
                Some(rest) => format!("{leg}_{rest}"),
                None => n.clone(),
            })
            .collect();
        Predicate { ast: self.ast.clone(), names }
    }
}

impl fmt::Display for CutTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = String::new();
        self.ast.render(&self.names, &mut s);
        f.write_str(&s)
    }
}

// ── Predicate ──────────────────────────────────────────────────

/// A boolean cut over concrete table columns.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    ast: Expr,
    names: Vec<String>,
}

impl Predicate {
    /// Parse a cut over concrete column names.
    pub fn parse(input: &str) -> Result<Self> {
        let (ast, names) = parse(input)?;
        Ok(Self { ast, names })
    }

    /// `column == value`.
    pub fn equals(column: &str, value: f64) -> Self {
        Self {
            ast: Expr::BinOp(BinOp::Eq, Box::new(Expr::Var(0)), Box::new(Expr::Number(value))),
            names: vec![column.to_string()],
        }
    }

    /// `column > value`.
    pub fn greater_than(column: &str, value: f64) -> Self {
        Self {
            ast: Expr::BinOp(BinOp::Gt, Box::new(Expr::Var(0)), Box::new(Expr::Number(value))),
            names: vec![column.to_string()],
        }
    }

    /// Logical AND.
    pub fn and(&self, other: &Predicate) -> Predicate {
        let (ast, names) = combine(BinOp::And, (&self.ast, &self.names), (&other.ast, &other.names));
        Predicate { ast, names }
    }

    /// Columns read by this predicate (deduplicated, first occurrence order).
    pub fn required_columns(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::with_capacity(self.names.len());
        for n in &self.names {
            if !out.contains(n) {
                out.push(n.clone());
            }
        }
        out
    }

    /// Evaluate for a single row.
    ///
    /// `values` follows the internal name order, which may list a column twice after
    /// composition; prefer [`Predicate::mask`] for tables.
    pub fn eval_row(&self, values: &[f64]) -> bool {
        truthy(eval_expr(&self.ast, values))
    }

    /// Evaluate for every row of `table`.
    pub fn mask(&self, table: &EventTable) -> Result<Vec<bool>> {
        let cols = self.names.iter().map(|n| table.float(n)).collect::<Result<Vec<&[f64]>>>()?;
        let n = table.n_rows();
        let mut row = vec![0.0f64; cols.len()];
        let mut out = Vec::with_capacity(n);
        for i in 0..n {
            for (j, col) in cols.iter().enumerate() {
                row[j] = col[i];
            }
            out.push(truthy(eval_expr(&self.ast, &row)));
        }
        Ok(out)
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = String::new();
        self.ast.render(&self.names, &mut s);
        f.write_str(&s)
    }
}

#[inline]
fn truthy(v: f64) -> bool {
    v != 0.0 && !v.is_nan()
}

// ── Evaluation ─────────────────────────────────────────────────

fn as_f64(b: bool) -> f64 {
    if b { 1.0 } else { 0.0 }
}

fn eval_expr(e: &Expr, vals: &[f64]) -> f64 {
    match e {
        Expr::Number(n) => *n,
        Expr::Var(i) => vals[*i],
        Expr::UnaryNeg(a) => -eval_expr(a, vals),
        Expr::UnaryNot(a) => as_f64(!truthy(eval_expr(a, vals))),
        Expr::BinOp(BinOp::And, a, b) => {
            as_f64(truthy(eval_expr(a, vals)) && truthy(eval_expr(b, vals)))
        }
        Expr::BinOp(BinOp::Or, a, b) => {
            as_f64(truthy(eval_expr(a, vals)) || truthy(eval_expr(b, vals)))
        }
        Expr::BinOp(op, a, b) => {
            let lhs = eval_expr(a, vals);
            let rhs = eval_expr(b, vals);
            match op {
                BinOp::Add => lhs + rhs,
                BinOp::Sub => lhs - rhs,
                BinOp::Mul => lhs * rhs,
                BinOp::Div => lhs / rhs,
                BinOp::Eq => as_f64((lhs - rhs).abs() < f64::EPSILON),
                BinOp::Ne => as_f64((lhs - rhs).abs() >= f64::EPSILON),
                BinOp::Lt => as_f64(lhs < rhs),
                BinOp::Le => as_f64(lhs <= rhs),
                BinOp::Gt => as_f64(lhs > rhs),
                BinOp::Ge => as_f64(lhs >= rhs),
                BinOp::And | BinOp::Or => unreachable!("short-circuit ops handled above"),
            }
        }
        Expr::Call(f, args) => {
            let a0 = || eval_expr(&args[0], vals);
            let a1 = || eval_expr(&args[1], vals);
            match f {
                Func::Abs => a0().abs(),
                Func::Sqrt => a0().sqrt(),
                Func::Log => a0().ln(),
                Func::Exp => a0().exp(),
                Func::Pow => a0().powf(a1()),
                Func::Min => a0().min(a1()),
                Func::Max => a0().max(a1()),
            }
        }
    }
}

// ── Tokenizer ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
    Comma,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Not,
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        if let Some(&next) = chars.get(i + 1) {
            let tok = match (c, next) {
                ('&', '&') => Some(Token::And),
                ('|', '|') => Some(Token::Or),
                ('=', '=') => Some(Token::Eq),
                ('!', '=') => Some(Token::Ne),
                ('<', '=') => Some(Token::Le),
                ('>', '=') => Some(Token::Ge),
                _ => None,
            };
            if let Some(t) = tok {
                tokens.push(t);
                i += 2;
                continue;
            }
        }

        let single = match c {
            '+' => Some(Token::Plus),
            '-' => Some(Token::Minus),
            '*' => Some(Token::Star),
            '/' => Some(Token::Slash),
            '(' => Some(Token::LParen),
            ')' => Some(Token::RParen),
            ',' => Some(Token::Comma),
            '<' => Some(Token::Lt),
            '>' => Some(Token::Gt),
            '!' => Some(Token::Not),
            _ => None,
        };
        if let Some(t) = single {
            tokens.push(t);
            i += 1;
            continue;
        }

        if c.is_ascii_digit() || c == '.' {
            let start = i;
            while i < chars.len()
                && (chars[i].is_ascii_digit()
                    || chars[i] == '.'
                    || chars[i] == 'e'
                    || chars[i] == 'E'
                    || ((chars[i] == '+' || chars[i] == '-')
                        && i > start
                        && (chars[i - 1] == 'e' || chars[i - 1] == 'E')))
            {
                i += 1;
            }
            let s: String = chars[start..i].iter().collect();
            let n: f64 =
                s.parse().map_err(|_| Error::Expression(format!("invalid number: '{s}'")))?;
            tokens.push(Token::Num(n));
        } else if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
        } else {
            return Err(Error::Expression(format!("unexpected character: '{c}'")));
        }
    }

    Ok(tokens)
}

// ── Parser (recursive descent) ─────────────────────────────────

fn parse(input: &str) -> Result<(Expr, Vec<String>)> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(Error::Expression("empty expression".into()));
    }
    let mut parser = Parser::new(&tokens);
    let ast = parser.parse_or()?;
    if parser.pos < parser.tokens.len() {
        return Err(Error::Expression(format!(
            "unexpected token after expression: {:?}",
            parser.tokens[parser.pos]
        )));
    }
    Ok((ast, parser.names))
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    names: Vec<String>,
}

impl<'a> Parser<'a> {
    fn new(tokens: &'a [Token]) -> Self {
        Self { tokens, pos: 0, names: Vec::new() }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<&Token> {
        let t = self.tokens.get(self.pos);
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn expect(&mut self, expected: &Token) -> Result<()> {
        match self.advance() {
            Some(t) if t == expected => Ok(()),
            other => Err(Error::Expression(format!("expected {expected:?}, got {other:?}"))),
        }
    }

    fn resolve_var(&mut self, name: &str) -> usize {
        if let Some(i) = self.names.iter().position(|b| b == name) {
            i
        } else {
            self.names.push(name.to_string());
            self.names.len() - 1
        }
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_and()?;
        while matches!(self.peek(), Some(Token::Or)) {
            self.advance();
            let rhs = self.parse_and()?;
            lhs = Expr::BinOp(BinOp::Or, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_cmp()?;
        while matches!(self.peek(), Some(Token::And)) {
            self.advance();
            let rhs = self.parse_cmp()?;
            lhs = Expr::BinOp(BinOp::And, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_cmp(&mut self) -> Result<Expr> {
        let lhs = self.parse_add()?;
        let op = match self.peek() {
            Some(Token::Eq) => BinOp::Eq,
            Some(Token::Ne) => BinOp::Ne,
            Some(Token::Lt) => BinOp::Lt,
            Some(Token::Le) => BinOp::Le,
            Some(Token::Gt) => BinOp::Gt,
            Some(Token::Ge) => BinOp::Ge,
            _ => return Ok(lhs),
        };
        self.advance();
        let rhs = self.parse_add()?;
        Ok(Expr::BinOp(op, Box::new(lhs), Box::new(rhs)))
    }

    fn parse_add(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_mul()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_mul()?;
            lhs = Expr::BinOp(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_mul(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_unary()?;
            lhs = Expr::BinOp(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        match self.peek() {
            Some(Token::Minus) => {
                self.advance();
                Ok(Expr::UnaryNeg(Box::new(self.parse_unary()?)))
            }
            Some(Token::Not) => {
                self.advance();
                Ok(Expr::UnaryNot(Box::new(self.parse_unary()?)))
            }
            _ => self.parse_atom(),
        }
    }

    fn parse_atom(&mut self) -> Result<Expr> {
        match self.advance().cloned() {
            Some(Token::Num(n)) => Ok(Expr::Number(n)),
            Some(Token::LParen) => {
                let e = self.parse_or()?;
                self.expect(&Token::RParen)?;
                Ok(e)
            }
            Some(Token::Ident(name)) => {
                if !matches!(self.peek(), Some(Token::LParen)) {
                    return Ok(Expr::Var(self.resolve_var(&name)));
                }
                self.advance();
                let func = match name.as_str() {
                    "abs" => Func::Abs,
                    "sqrt" => Func::Sqrt,
                    "log" => Func::Log,
                    "exp" => Func::Exp,
                    "pow" => Func::Pow,
                    "min" => Func::Min,
                    "max" => Func::Max,
                    _ => return Err(Error::Expression(format!("unknown function: '{name}'"))),
                };
                let mut args = vec![self.parse_or()?];
                while matches!(self.peek(), Some(Token::Comma)) {
                    self.advance();
                    args.push(self.parse_or()?);
                }
                self.expect(&Token::RParen)?;
                if args.len() != func.arity() {
                    return Err(Error::Expression(format!(
                        "{} expects {} argument(s), got {}",
                        func.name(),
                        func.arity(),
                        args.len()
                    )));
                }
                Ok(Expr::Call(func, args))
            }
            other => Err(Error::Expression(format!(
                "expected number, identifier, or '(', got {other:?}"
            ))),
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Column;

    fn table() -> EventTable {
        EventTable::from_columns(vec![
            ("L1_PID_E".to_string(), Column::Float(vec![3.0, -1.0, 5.0])),
            ("L2_PID_E".to_string(), Column::Float(vec![-2.0, 4.0, 6.0])),
            ("L1_PROBNN_K".to_string(), Column::Float(vec![0.9, 0.1, 0.5])),
            ("B_ID".to_string(), Column::Float(vec![521.0, -521.0, 521.0])),
        ])
        .unwrap()
    }

    #[test]
    fn test_predicate_arithmetic_and_functions() {
        let p = Predicate::parse("sqrt(x) + pow(y, 2) == 7").unwrap();
        assert_eq!(p.required_columns(), vec!["x", "y"]);
        assert!(p.eval_row(&[9.0, 2.0]));
        assert!(!p.eval_row(&[4.0, 2.0]));
    }

    #[test]
    fn test_predicate_boolean_ops() {
        let p = Predicate::parse("njet >= 4 && !(pt_lead < 25.0) || veto").unwrap();
        assert!(p.eval_row(&[4.0, 30.0, 0.0]));
        assert!(!p.eval_row(&[3.0, 30.0, 0.0]));
        assert!(p.eval_row(&[3.0, 30.0, 1.0]));
    }

    #[test]
    fn test_negative_literal_and_scientific_notation() {
        let p = Predicate::parse("B_ID == -521").unwrap();
        assert_eq!(p.mask(&table()).unwrap(), vec![false, true, false]);
        let q = Predicate::parse("x > 1.5e2").unwrap();
        assert!(q.eval_row(&[151.0]));
    }

    #[test]
    fn test_template_instantiates_leg_columns() {
        let t = CutTemplate::parse("LEP_PID_E > 0").unwrap();
        assert!(t.has_slot());
        assert!(!CutTemplate::parse("B_PT > 3").unwrap().has_slot());
        let l1 = t.instantiate("L1");
        assert_eq!(l1.required_columns(), vec!["L1_PID_E"]);
        assert_eq!(l1.mask(&table()).unwrap(), vec![true, false, true]);
        let l2 = t.instantiate("L2");
        assert_eq!(l2.mask(&table()).unwrap(), vec![false, true, true]);
    }

    #[test]
    fn test_template_and_keeps_slots_of_both_sides() {
        let fail = CutTemplate::parse("LEP_PID_E < 4").unwrap();
        let kaon = CutTemplate::parse("LEP_PROBNN_K > 0.2").unwrap();
        let p = fail.and(&kaon).instantiate("L1");
        assert_eq!(p.required_columns(), vec!["L1_PID_E", "L1_PROBNN_K"]);
        assert_eq!(p.mask(&table()).unwrap(), vec![true, false, false]);
    }

    #[test]
    fn test_predicate_composition_with_shared_columns() {
        let ss = Predicate::parse("L1_PID_E > 0").unwrap();
        let os = Predicate::parse("L2_PID_E > 0 && L1_PID_E < 4").unwrap();
        let both = ss.and(&os);
        assert_eq!(both.required_columns(), vec!["L1_PID_E", "L2_PID_E"]);
        assert_eq!(both.mask(&table()).unwrap(), vec![false, false, false]);
    }

    #[test]
    fn test_mask_reports_missing_column() {
        let p = Predicate::parse("L3_PID_E > 0").unwrap();
        assert!(matches!(p.mask(&table()), Err(Error::MissingColumn(c)) if c == "L3_PID_E"));
    }

    #[test]
    fn test_display_renders_instantiated_cut() {
        let p = CutTemplate::parse("LEP_PID_E > 2 && LEP_PROBNN_K < 0.5").unwrap().instantiate("L2");
        assert_eq!(p.to_string(), "((L2_PID_E > 2) && (L2_PROBNN_K < 0.5))");
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(Predicate::parse(""), Err(Error::Expression(_))));
        assert!(matches!(Predicate::parse("x >"), Err(Error::Expression(_))));
        assert!(matches!(Predicate::parse("foo(x)"), Err(Error::Expression(_))));
        assert!(matches!(Predicate::parse("pow(x)"), Err(Error::Expression(_))));
        assert!(matches!(Predicate::parse("x # 2"), Err(Error::Expression(_))));
        assert!(matches!(Predicate::parse("(x > 1"), Err(Error::Expression(_))));
    }

    #[test]
    fn test_column_builders() {
        let t = table();
        assert_eq!(Predicate::equals("B_ID", 521.0).mask(&t).unwrap(), vec![true, false, true]);
        assert_eq!(
            Predicate::greater_than("L1_PROBNN_K", 0.4).mask(&t).unwrap(),
            vec![true, false, true]
        );
    }
}
