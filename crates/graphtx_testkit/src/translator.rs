//! A small query language for tests.
//!
//! ```text
//! from <Kind> [where <cond> (and <cond>)*] [select <field>(,<field>)*] [rows <start>..<end>]
//!
//! cond    := <field> <op> <operand> | <field> is null | <field> refers <operand>
//! op      := = | <> | < | <= | > | >=
//! operand := ?<n> | <integer> | '<word>'
//! ```
//!
//! `?n` is the n-th positional parameter, counting from 1. Either range
//! bound may be left out.

use graphtx_core::{CoreError, CoreResult, Query, QueryTranslator};
use graphtx_store::{CompareOp, Predicate, Value};

/// Translator for the test query language.
#[derive(Debug, Default, Clone, Copy)]
pub struct SimpleTranslator;

impl QueryTranslator for SimpleTranslator {
    fn translate(&self, query: &str, params: &[Value]) -> CoreResult<Query> {
        Parser {
            tokens: query.split_whitespace().collect(),
            pos: 0,
            params,
        }
        .parse()
    }
}

struct Parser<'a> {
    tokens: Vec<&'a str>,
    pos: usize,
    params: &'a [Value],
}

impl<'a> Parser<'a> {
    fn advance(&mut self) -> Option<&'a str> {
        let token = self.tokens.get(self.pos).copied();
        self.pos += 1;
        token
    }

    fn peek(&self) -> Option<&'a str> {
        self.tokens.get(self.pos).copied()
    }

    fn expect_token(&mut self, what: &str) -> CoreResult<&'a str> {
        self.advance()
            .ok_or_else(|| CoreError::query_invalid(format!("expected {what}, found end of query")))
    }

    fn parse(mut self) -> CoreResult<Query> {
        if !self.advance().is_some_and(|t| t.eq_ignore_ascii_case("from")) {
            return Err(CoreError::query_invalid("query must start with `from`"));
        }
        let mut query = Query::new(self.expect_token("a kind")?);

        if self.peek().is_some_and(|t| t.eq_ignore_ascii_case("where")) {
            self.pos += 1;
            query = query.filter(self.condition()?);
            while self.peek().is_some_and(|t| t.eq_ignore_ascii_case("and")) {
                self.pos += 1;
                query = query.filter(self.condition()?);
            }
        }

        if self.peek().is_some_and(|t| t.eq_ignore_ascii_case("select")) {
            self.pos += 1;
            let columns = self.expect_token("column list")?;
            query = query.project(columns.split(',').filter(|c| !c.is_empty()));
        }

        if self.peek().is_some_and(|t| t.eq_ignore_ascii_case("rows")) {
            self.pos += 1;
            let (start, end) = parse_range(self.expect_token("a range")?)?;
            query = query.range(start, end);
        }

        if let Some(extra) = self.peek() {
            return Err(CoreError::query_invalid(format!("unexpected `{extra}`")));
        }
        Ok(query)
    }

    fn condition(&mut self) -> CoreResult<Predicate> {
        let field = self.expect_token("a field")?;
        let op = self.expect_token("an operator")?;
        let op = match op {
            "=" => CompareOp::Eq,
            "<>" => CompareOp::Ne,
            "<" => CompareOp::Lt,
            "<=" => CompareOp::Le,
            ">" => CompareOp::Gt,
            ">=" => CompareOp::Ge,
            "is" => {
                let null = self.expect_token("`null`")?;
                if !null.eq_ignore_ascii_case("null") {
                    return Err(CoreError::query_invalid(format!("expected `null`, found `{null}`")));
                }
                return Ok(Predicate::IsNull(field.to_owned()));
            }
            "refers" => {
                return match self.operand()? {
                    Value::Ref(target) => Ok(Predicate::refers_to(field, target)),
                    other => Err(CoreError::query_invalid(format!(
                        "`refers` needs a reference operand, got {other}"
                    ))),
                };
            }
            other => return Err(CoreError::query_invalid(format!("unknown operator `{other}`"))),
        };
        Ok(Predicate::compare(field, op, self.operand()?))
    }

    fn operand(&mut self) -> CoreResult<Value> {
        let token = self.expect_token("an operand")?;
        if let Some(index) = token.strip_prefix('?') {
            let n: usize = index
                .parse()
                .map_err(|_| CoreError::query_invalid(format!("bad parameter `{token}`")))?;
            return n
                .checked_sub(1)
                .and_then(|i| self.params.get(i))
                .cloned()
                .ok_or_else(|| CoreError::query_invalid(format!("no value bound for `{token}`")));
        }
        if let Some(text) = token.strip_prefix('\'').and_then(|t| t.strip_suffix('\'')) {
            return Ok(Value::from(text));
        }
        token
            .parse::<i64>()
            .map(Value::from)
            .map_err(|_| CoreError::query_invalid(format!("bad operand `{token}`")))
    }
}

fn parse_range(token: &str) -> CoreResult<(Option<u64>, Option<u64>)> {
    let (start, end) = token
        .split_once("..")
        .ok_or_else(|| CoreError::query_invalid(format!("bad range `{token}`")))?;
    let bound = |s: &str| -> CoreResult<Option<u64>> {
        if s.is_empty() {
            return Ok(None);
        }
        s.parse()
            .map(Some)
            .map_err(|_| CoreError::query_invalid(format!("bad range bound `{s}`")))
    };
    Ok((bound(start)?, bound(end)?))
}
