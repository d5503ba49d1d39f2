//! ---
//! tsf_section: "02-measurement-data-model"
//! tsf_subsection: "module"
//! tsf_type: "source"
//! tsf_scope: "code"
//! tsf_description: "Measurement identity, values and metadata resolution."
//! tsf_version: "v0.0.0-prealpha"
//! tsf_owner: "tbd"
//! ---
//! `FILTER` expressions over metadata tables.
//!
//! Grammar:
//!
//! ```text
//! FILTER [TOP n] <table> WHERE <predicate> [ORDER BY <column> [ASC|DESC]]
//!
//! predicate  := or
//! or         := and ( OR and )*
//! and        := unary ( AND unary )*
//! unary      := NOT unary | primary
//! primary    := '(' predicate ')' | TRUE | FALSE | operand tail
//! tail       := cmp operand | [NOT] LIKE 'pattern' | [NOT] IN '(' literal, ... ')' | IS [NOT] NULL
//! cmp        := = | == | <> | != | < | <= | > | >=
//! operand    := identifier | 'string' | number | TRUE | FALSE | NULL
//! ```
//!
//! Identifiers and keywords are case-insensitive; string comparisons ignore case.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::data_source::{CellValue, DataRow, DataTable};
use crate::{MeasurementError, Result};

static FILTER_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?is)^\s*FILTER\s+(?:TOP\s+(\d+)\s+)?(\w+)\s+WHERE\s+(.+?)(?:\s+ORDER\s+BY\s+(\w+)(?:\s+(ASC|DESC))?)?\s*;?\s*$",
    )
    .expect("valid filter pattern")
});

/// Returns true when `value` looks like a `FILTER` expression.
pub fn is_filter_expression(value: &str) -> bool {
    value
        .trim_start()
        .get(..6)
        .is_some_and(|head| head.eq_ignore_ascii_case("FILTER"))
}

/// A parsed `FILTER` statement.
#[derive(Debug, Clone)]
pub struct FilterExpression {
    top: Option<usize>,
    table: String,
    predicate: Predicate,
    order_by: Option<OrderBy>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct OrderBy {
    column: String,
    descending: bool,
}

impl FilterExpression {
    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn top(&self) -> Option<usize> {
        self.top
    }

    pub fn predicate(&self) -> &Predicate {
        &self.predicate
    }

    /// Select matching rows from `table`, applying ordering and the `TOP` limit.
    ///
    /// Every column referenced by the predicate or the ordering must exist in the table.
    pub fn evaluate<'a>(&self, table: &'a DataTable) -> Result<Vec<DataRow<'a>>> {
        let bound = self.predicate.bind(table)?;
        let order_index = match &self.order_by {
            Some(order) => Some(table.require_column(&order.column)?),
            None => None,
        };

        let mut rows: Vec<DataRow<'a>> = table
            .rows()
            .filter(|row| bound.matches(row))
            .collect();

        if let (Some(index), Some(order)) = (order_index, &self.order_by) {
            rows.sort_by(|a, b| {
                let ordering = compare_for_sort(a.at(index), b.at(index));
                if order.descending {
                    ordering.reverse()
                } else {
                    ordering
                }
            });
        }

        if let Some(top) = self.top {
            rows.truncate(top);
        }
        Ok(rows)
    }
}

fn compare_for_sort(a: &CellValue, b: &CellValue) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => a.compare(b).unwrap_or(Ordering::Equal),
    }
}

impl FromStr for FilterExpression {
    type Err = MeasurementError;

    fn from_str(s: &str) -> Result<Self> {
        let captures = FILTER_PATTERN.captures(s).ok_or_else(|| {
            MeasurementError::FilterSyntax(format!(
                "expected `FILTER [TOP n] <table> WHERE <expression> [ORDER BY <column>]`, got `{}`",
                s.trim()
            ))
        })?;

        let top = captures
            .get(1)
            .map(|m| {
                m.as_str()
                    .parse::<usize>()
                    .map_err(|err| MeasurementError::FilterSyntax(format!("invalid TOP: {err}")))
            })
            .transpose()?;
        let table = captures
            .get(2)
            .map(|m| m.as_str().to_owned())
            .unwrap_or_default();
        let where_clause = captures.get(3).map(|m| m.as_str()).unwrap_or_default();
        let order_by = captures.get(4).map(|m| OrderBy {
            column: m.as_str().to_owned(),
            descending: captures
                .get(5)
                .is_some_and(|dir| dir.as_str().eq_ignore_ascii_case("DESC")),
        });

        let predicate = where_clause.parse()?;
        Ok(Self {
            top,
            table,
            predicate,
            order_by,
        })
    }
}

/// Comparison operators accepted in predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    fn test(self, ordering: Ordering) -> bool {
        match self {
            CompareOp::Eq => ordering == Ordering::Equal,
            CompareOp::Ne => ordering != Ordering::Equal,
            CompareOp::Lt => ordering == Ordering::Less,
            CompareOp::Le => ordering != Ordering::Greater,
            CompareOp::Gt => ordering == Ordering::Greater,
            CompareOp::Ge => ordering != Ordering::Less,
        }
    }
}

/// Either a column reference or a literal.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Column(String),
    Literal(CellValue),
}

/// Parsed WHERE clause.
#[derive(Debug, Clone)]
pub enum Predicate {
    Constant(bool),
    Not(Box<Predicate>),
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
    Compare(Operand, CompareOp, Operand),
    Like {
        operand: Operand,
        pattern: String,
        negated: bool,
    },
    In {
        operand: Operand,
        values: Vec<CellValue>,
        negated: bool,
    },
    IsNull {
        operand: Operand,
        negated: bool,
    },
}

impl Predicate {
    /// Resolve column names to positions and compile LIKE patterns.
    fn bind(&self, table: &DataTable) -> Result<Bound> {
        Ok(match self {
            Predicate::Constant(value) => Bound::Constant(*value),
            Predicate::Not(inner) => Bound::Not(Box::new(inner.bind(table)?)),
            Predicate::And(a, b) => Bound::And(Box::new(a.bind(table)?), Box::new(b.bind(table)?)),
            Predicate::Or(a, b) => Bound::Or(Box::new(a.bind(table)?), Box::new(b.bind(table)?)),
            Predicate::Compare(a, op, b) => {
                Bound::Compare(bind_operand(a, table)?, *op, bind_operand(b, table)?)
            }
            Predicate::Like {
                operand,
                pattern,
                negated,
            } => Bound::Like {
                operand: bind_operand(operand, table)?,
                regex: like_to_regex(pattern)?,
                negated: *negated,
            },
            Predicate::In {
                operand,
                values,
                negated,
            } => Bound::In {
                operand: bind_operand(operand, table)?,
                values: values.clone(),
                negated: *negated,
            },
            Predicate::IsNull { operand, negated } => Bound::IsNull {
                operand: bind_operand(operand, table)?,
                negated: *negated,
            },
        })
    }
}

impl FromStr for Predicate {
    type Err = MeasurementError;

    fn from_str(s: &str) -> Result<Self> {
        let tokens = tokenize(s)?;
        let mut parser = Parser { tokens, pos: 0 };
        let predicate = parser.parse_or()?;
        if let Some(token) = parser.peek() {
            return Err(MeasurementError::FilterSyntax(format!(
                "unexpected `{}` after expression",
                token
            )));
        }
        Ok(predicate)
    }
}

#[derive(Debug)]
enum BoundOperand {
    Column(usize),
    Literal(CellValue),
}

impl BoundOperand {
    fn value<'a>(&'a self, row: &DataRow<'a>) -> &'a CellValue {
        match self {
            BoundOperand::Column(index) => row.at(*index),
            BoundOperand::Literal(value) => value,
        }
    }
}

fn bind_operand(operand: &Operand, table: &DataTable) -> Result<BoundOperand> {
    Ok(match operand {
        Operand::Column(name) => BoundOperand::Column(table.require_column(name)?),
        Operand::Literal(value) => BoundOperand::Literal(value.clone()),
    })
}

#[derive(Debug)]
enum Bound {
    Constant(bool),
    Not(Box<Bound>),
    And(Box<Bound>, Box<Bound>),
    Or(Box<Bound>, Box<Bound>),
    Compare(BoundOperand, CompareOp, BoundOperand),
    Like {
        operand: BoundOperand,
        regex: Regex,
        negated: bool,
    },
    In {
        operand: BoundOperand,
        values: Vec<CellValue>,
        negated: bool,
    },
    IsNull {
        operand: BoundOperand,
        negated: bool,
    },
}

impl Bound {
    fn matches(&self, row: &DataRow<'_>) -> bool {
        match self {
            Bound::Constant(value) => *value,
            Bound::Not(inner) => !inner.matches(row),
            Bound::And(a, b) => a.matches(row) && b.matches(row),
            Bound::Or(a, b) => a.matches(row) || b.matches(row),
            Bound::Compare(a, op, b) => a
                .value(row)
                .compare(b.value(row))
                .is_some_and(|ordering| op.test(ordering)),
            Bound::Like {
                operand,
                regex,
                negated,
            } => {
                let value = operand.value(row);
                if value.is_null() {
                    return false;
                }
                regex.is_match(&value.to_string()) != *negated
            }
            Bound::In {
                operand,
                values,
                negated,
            } => {
                let value = operand.value(row);
                if value.is_null() {
                    return false;
                }
                let found = values
                    .iter()
                    .any(|candidate| value.compare(candidate) == Some(Ordering::Equal));
                found != *negated
            }
            Bound::IsNull { operand, negated } => operand.value(row).is_null() != *negated,
        }
    }
}

fn like_to_regex(pattern: &str) -> Result<Regex> {
    let mut expression = String::from("(?is)^");
    for ch in pattern.chars() {
        match ch {
            '%' | '*' => expression.push_str(".*"),
            '_' => expression.push('.'),
            other => expression.push_str(&regex::escape(&other.to_string())),
        }
    }
    expression.push('$');
    Regex::new(&expression)
        .map_err(|err| MeasurementError::FilterSyntax(format!("invalid LIKE pattern: {err}")))
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Num(f64),
    Op(&'static str),
    LParen,
    RParen,
    Comma,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Ident(name) => f.write_str(name),
            Token::Str(text) => write!(f, "'{}'", text),
            Token::Num(value) => write!(f, "{}", value),
            Token::Op(op) => f.write_str(op),
            Token::LParen => f.write_str("("),
            Token::RParen => f.write_str(")"),
            Token::Comma => f.write_str(","),
        }
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let ch = chars[i];
        match ch {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '\'' | '"' => {
                let quote = ch;
                let mut text = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => {
                            return Err(MeasurementError::FilterSyntax(
                                "unterminated string literal".into(),
                            ))
                        }
                        Some(&c) if c == quote => {
                            // doubled quote escapes itself
                            if chars.get(i + 1) == Some(&quote) {
                                text.push(quote);
                                i += 2;
                            } else {
                                i += 1;
                                break;
                            }
                        }
                        Some(&c) => {
                            text.push(c);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Str(text));
            }
            '[' => {
                let end = chars[i + 1..]
                    .iter()
                    .position(|&c| c == ']')
                    .ok_or_else(|| {
                        MeasurementError::FilterSyntax("unterminated `[` identifier".into())
                    })?;
                tokens.push(Token::Ident(chars[i + 1..i + 1 + end].iter().collect()));
                i += end + 2;
            }
            '=' => {
                i += if chars.get(i + 1) == Some(&'=') { 2 } else { 1 };
                tokens.push(Token::Op("="));
            }
            '!' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Op("<>"));
                i += 2;
            }
            '<' => match chars.get(i + 1) {
                Some('=') => {
                    tokens.push(Token::Op("<="));
                    i += 2;
                }
                Some('>') => {
                    tokens.push(Token::Op("<>"));
                    i += 2;
                }
                _ => {
                    tokens.push(Token::Op("<"));
                    i += 1;
                }
            },
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Op(">="));
                    i += 2;
                } else {
                    tokens.push(Token::Op(">"));
                    i += 1;
                }
            }
            c if c.is_ascii_digit()
                || (c == '-' && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit()))
                || (c == '.' && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit())) =>
            {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let raw: String = chars[start..i].iter().collect();
                let value = raw.parse::<f64>().map_err(|_| {
                    MeasurementError::FilterSyntax(format!("invalid number `{}`", raw))
                })?;
                tokens.push(Token::Num(value));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => {
                return Err(MeasurementError::FilterSyntax(format!(
                    "unexpected character `{}`",
                    other
                )))
            }
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
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(name)) if name.eq_ignore_ascii_case(keyword))
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.peek_keyword(keyword) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: Token) -> Result<()> {
        match self.next() {
            Some(token) if token == expected => Ok(()),
            Some(token) => Err(MeasurementError::FilterSyntax(format!(
                "expected `{}`, found `{}`",
                expected, token
            ))),
            None => Err(MeasurementError::FilterSyntax(format!(
                "expected `{}`, found end of expression",
                expected
            ))),
        }
    }

    fn parse_or(&mut self) -> Result<Predicate> {
        let mut left = self.parse_and()?;
        while self.eat_keyword("OR") {
            let right = self.parse_and()?;
            left = Predicate::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Predicate> {
        let mut left = self.parse_unary()?;
        while self.eat_keyword("AND") {
            let right = self.parse_unary()?;
            left = Predicate::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Predicate> {
        if self.eat_keyword("NOT") {
            return Ok(Predicate::Not(Box::new(self.parse_unary()?)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Predicate> {
        if self.peek() == Some(&Token::LParen) {
            self.pos += 1;
            let inner = self.parse_or()?;
            self.expect(Token::RParen)?;
            return Ok(inner);
        }

        let operand = self.parse_operand()?;

        let negated = self.eat_keyword("NOT");
        if self.eat_keyword("LIKE") {
            return match self.next() {
                Some(Token::Str(pattern)) => Ok(Predicate::Like {
                    operand,
                    pattern,
                    negated,
                }),
                other => Err(MeasurementError::FilterSyntax(format!(
                    "LIKE requires a string pattern, found `{}`",
                    describe(other.as_ref())
                ))),
            };
        }
        if self.eat_keyword("IN") {
            self.expect(Token::LParen)?;
            let mut values = Vec::new();
            loop {
                match self.parse_operand()? {
                    Operand::Literal(value) => values.push(value),
                    Operand::Column(name) => {
                        return Err(MeasurementError::FilterSyntax(format!(
                            "IN list accepts literals only, found `{}`",
                            name
                        )))
                    }
                }
                match self.next() {
                    Some(Token::Comma) => continue,
                    Some(Token::RParen) => break,
                    other => {
                        return Err(MeasurementError::FilterSyntax(format!(
                            "expected `,` or `)` in IN list, found `{}`",
                            describe(other.as_ref())
                        )))
                    }
                }
            }
            return Ok(Predicate::In {
                operand,
                values,
                negated,
            });
        }
        if negated {
            return Err(MeasurementError::FilterSyntax(
                "NOT must be followed by LIKE or IN here".into(),
            ));
        }
        if self.eat_keyword("IS") {
            let negated = self.eat_keyword("NOT");
            if !self.eat_keyword("NULL") {
                return Err(MeasurementError::FilterSyntax(
                    "IS must be followed by [NOT] NULL".into(),
                ));
            }
            return Ok(Predicate::IsNull { operand, negated });
        }

        let op = match self.peek() {
            Some(Token::Op(op)) => match *op {
                "=" => CompareOp::Eq,
                "<>" => CompareOp::Ne,
                "<" => CompareOp::Lt,
                "<=" => CompareOp::Le,
                ">" => CompareOp::Gt,
                _ => CompareOp::Ge,
            },
            _ => {
                // a lone boolean literal is a predicate on its own
                return match operand {
                    Operand::Literal(CellValue::Bool(value)) => Ok(Predicate::Constant(value)),
                    other => Err(MeasurementError::FilterSyntax(format!(
                        "expected a comparison after `{}`",
                        describe_operand(&other)
                    ))),
                };
            }
        };
        self.pos += 1;
        let right = self.parse_operand()?;
        Ok(Predicate::Compare(operand, op, right))
    }

    fn parse_operand(&mut self) -> Result<Operand> {
        match self.next() {
            Some(Token::Str(text)) => Ok(Operand::Literal(CellValue::Text(text))),
            Some(Token::Num(value)) => Ok(Operand::Literal(CellValue::Number(value))),
            Some(Token::Ident(name)) => {
                if name.eq_ignore_ascii_case("TRUE") {
                    Ok(Operand::Literal(CellValue::Bool(true)))
                } else if name.eq_ignore_ascii_case("FALSE") {
                    Ok(Operand::Literal(CellValue::Bool(false)))
                } else if name.eq_ignore_ascii_case("NULL") {
                    Ok(Operand::Literal(CellValue::Null))
                } else {
                    Ok(Operand::Column(name))
                }
            }
            other => Err(MeasurementError::FilterSyntax(format!(
                "expected a column or literal, found `{}`",
                describe(other.as_ref())
            ))),
        }
    }
}

fn describe(token: Option<&Token>) -> String {
    token
        .map(ToString::to_string)
        .unwrap_or_else(|| "end of expression".to_owned())
}

fn describe_operand(operand: &Operand) -> String {
    match operand {
        Operand::Column(name) => name.clone(),
        Operand::Literal(value) => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_source::DataSource;

    fn source() -> DataSource {
        DataSource::from_json_str(
            r#"{
            "ActiveMeasurements": [
                { "ID": "PPA:1", "PointTag": "SHELBY:FREQ", "SignalType": "FREQ", "Phase": null, "Rate": 30 },
                { "ID": "PPA:2", "PointTag": "SHELBY:VPHM", "SignalType": "VPHM", "Phase": "A", "Rate": 60 },
                { "ID": "PPA:3", "PointTag": "SHELBY:VPHA", "SignalType": "VPHA", "Phase": "A", "Rate": 60 },
                { "ID": "PPA:4", "PointTag": "CORDOVA:FREQ", "SignalType": "FREQ", "Phase": null, "Rate": 120 }
            ]
        }"#,
        )
        .unwrap()
    }

    fn ids(source: &DataSource, expression: &str) -> Vec<String> {
        source
            .query(expression)
            .unwrap()
            .iter()
            .map(|row| row.text("ID").unwrap().to_owned())
            .collect()
    }

    #[test]
    fn parses_statement_parts() {
        let filter: FilterExpression =
            "filter top 2 ActiveMeasurements where SignalType = 'FREQ' order by Rate desc"
                .parse()
                .unwrap();
        assert_eq!(filter.table(), "ActiveMeasurements");
        assert_eq!(filter.top(), Some(2));
        assert!(is_filter_expression("  FILTER x WHERE TRUE"));
        assert!(!is_filter_expression("PPA:1;PPA:2"));
    }

    #[test]
    fn comparison_and_boolean_logic() {
        let source = source();
        assert_eq!(
            ids(&source, "FILTER ActiveMeasurements WHERE SignalType = 'freq'"),
            ["PPA:1", "PPA:4"]
        );
        assert_eq!(
            ids(
                &source,
                "FILTER ActiveMeasurements WHERE Rate >= 60 AND NOT (SignalType <> 'VPHM' AND Rate = 60)"
            ),
            ["PPA:2", "PPA:4"]
        );
        assert_eq!(
            ids(&source, "FILTER ActiveMeasurements WHERE Rate < 60 OR ID = 'PPA:3'"),
            ["PPA:1", "PPA:3"]
        );
        assert_eq!(ids(&source, "FILTER ActiveMeasurements WHERE True").len(), 4);
    }

    #[test]
    fn like_in_and_null_checks() {
        let source = source();
        assert_eq!(
            ids(&source, "FILTER ActiveMeasurements WHERE PointTag LIKE 'shelby:%'"),
            ["PPA:1", "PPA:2", "PPA:3"]
        );
        assert_eq!(
            ids(&source, "FILTER ActiveMeasurements WHERE PointTag LIKE 'SHELBY:VPH_'"),
            ["PPA:2", "PPA:3"]
        );
        assert_eq!(
            ids(&source, "FILTER ActiveMeasurements WHERE SignalType NOT IN ('FREQ', 'VPHA')"),
            ["PPA:2"]
        );
        assert_eq!(
            ids(&source, "FILTER ActiveMeasurements WHERE Phase IS NULL"),
            ["PPA:1", "PPA:4"]
        );
        assert_eq!(
            ids(&source, "FILTER ActiveMeasurements WHERE Phase IS NOT NULL AND Rate != 60"),
            Vec::<String>::new()
        );
    }

    #[test]
    fn ordering_and_top() {
        let source = source();
        assert_eq!(
            ids(&source, "FILTER ActiveMeasurements WHERE Rate > 0 ORDER BY Rate DESC"),
            ["PPA:4", "PPA:2", "PPA:3", "PPA:1"]
        );
        assert_eq!(
            ids(&source, "FILTER TOP 1 ActiveMeasurements WHERE SignalType = 'FREQ' ORDER BY PointTag"),
            ["PPA:4"]
        );
    }

    #[test]
    fn errors_name_the_problem() {
        let source = source();
        assert!(matches!(
            source.query("FILTER Devices WHERE TRUE"),
            Err(MeasurementError::UnknownTable(name)) if name == "Devices"
        ));
        assert!(matches!(
            source.query("FILTER ActiveMeasurements WHERE Bogus = 1"),
            Err(MeasurementError::UnknownColumn { column, .. }) if column == "Bogus"
        ));
        assert!(matches!(
            source.query("FILTER ActiveMeasurements WHERE ID = 'x' ORDER BY Bogus"),
            Err(MeasurementError::UnknownColumn { .. })
        ));
        for bad in [
            "SELECT * FROM ActiveMeasurements",
            "FILTER ActiveMeasurements WHERE (ID = 'a'",
            "FILTER ActiveMeasurements WHERE ID = 'open",
            "FILTER ActiveMeasurements WHERE ID",
            "FILTER ActiveMeasurements WHERE ID IN (PointTag)",
        ] {
            assert!(
                matches!(bad.parse::<FilterExpression>(), Err(MeasurementError::FilterSyntax(_))),
                "{bad} should be a syntax error"
            );
        }
    }
}
