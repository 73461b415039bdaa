//! Blob name templates
//!
//! Literal text mixed with `{{ expr }}` actions:
//!
//! ```text
//! %Y/%m/{{ resource_attr(0, "service.name") | lower }}/{{ signal }}_%H.json
//! ```
//!
//! Expressions are string and integer literals, the variables `signal`,
//! `resource_count` and `record_count`, calls `f(a, b)`, field access
//! `expr.field` and pipes `expr | f(args)`, which pass the piped value as the
//! last argument. Function names and arity are checked when parsing.

use std::fmt;

use nom::branch::alt;
use nom::bytes::complete::{escaped_transform, is_not, tag, take_until};
use nom::character::complete::{alpha1, alphanumeric1, char, digit1, multispace0};
use nom::combinator::{all_consuming, cut, map, map_res, opt, recognize, rest, value, verify};
use nom::multi::{many0, many0_count, separated_list0};
use nom::sequence::{delimited, pair, preceded, terminated};
use nom::IResult;
use thiserror::Error;

use super::functions::{self, Env, Value};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("Template parse error: {0}")]
    Parse(String),

    #[error("Template evaluation error: {0}")]
    Eval(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Str(String),
    Int(i64),
    Var(String),
    Call { name: String, args: Vec<Expr> },
    Field { target: Box<Expr>, field: String },
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Str(s) => write!(f, "{s:?}"),
            Expr::Int(i) => write!(f, "{i}"),
            Expr::Var(name) => f.write_str(name),
            Expr::Call { name, args } => {
                write!(f, "{name}(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                f.write_str(")")
            }
            Expr::Field { target, field } => write!(f, "{target}.{field}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Text(String),
    Action(Expr),
}

#[derive(Debug, Clone)]
pub struct Template {
    nodes: Vec<Node>,
}

impl Template {
    pub fn parse(source: &str) -> Result<Self, TemplateError> {
        let (_, nodes) = template(source).map_err(|e| syntax_error(source, e))?;
        for node in &nodes {
            if let Node::Action(expr) = node {
                check(expr)?;
            }
        }
        Ok(Self { nodes })
    }

    /// Render against a batch. `%` in substituted values is doubled so the
    /// result can be handed to the time formatter.
    pub fn render(&self, env: &Env<'_>) -> Result<String, TemplateError> {
        let mut out = String::new();
        for node in &self.nodes {
            match node {
                Node::Text(text) => out.push_str(text),
                Node::Action(expr) => match eval(expr, env) {
                    Value::Str(s) => out.push_str(&s.replace('%', "%%")),
                    Value::Int(i) => out.push_str(&i.to_string()),
                    Value::Missing => {
                        return Err(TemplateError::Eval(format!("{expr} has no value")))
                    }
                    Value::Record(_) => {
                        return Err(TemplateError::Eval(format!(
                            "{expr} is a record; select one of its fields"
                        )))
                    }
                },
            }
        }
        Ok(out)
    }

    pub fn has_actions(&self) -> bool {
        self.nodes.iter().any(|n| matches!(n, Node::Action(_)))
    }
}

fn eval(expr: &Expr, env: &Env<'_>) -> Value {
    match expr {
        Expr::Str(s) => Value::Str(s.clone()),
        Expr::Int(i) => Value::Int(*i),
        Expr::Var(name) => functions::variable(name, env),
        Expr::Call { name, args } => {
            let args: Vec<Value> = args.iter().map(|a| eval(a, env)).collect();
            functions::call(name, &args, env)
        }
        Expr::Field { target, field } => eval(target, env).field(field),
    }
}

fn check(expr: &Expr) -> Result<(), TemplateError> {
    match expr {
        Expr::Str(_) | Expr::Int(_) => Ok(()),
        Expr::Var(name) if functions::VARIABLES.contains(&name.as_str()) => Ok(()),
        Expr::Var(name) => Err(TemplateError::Parse(format!("unknown variable {name:?}"))),
        Expr::Call { name, args } => {
            let arity = functions::arity(name)
                .ok_or_else(|| TemplateError::Parse(format!("unknown function {name:?}")))?;
            if args.len() != arity {
                return Err(TemplateError::Parse(format!(
                    "function {name:?} takes {arity} arguments, got {}",
                    args.len()
                )));
            }
            args.iter().try_for_each(check)
        }
        Expr::Field { target, .. } => check(target),
    }
}

fn syntax_error(source: &str, err: nom::Err<nom::error::Error<&str>>) -> TemplateError {
    match err {
        nom::Err::Error(e) | nom::Err::Failure(e) => {
            let offset = source.len() - e.input.len();
            let near: String = e.input.chars().take(16).collect();
            TemplateError::Parse(format!("unexpected input at offset {offset}: {near:?}"))
        }
        nom::Err::Incomplete(_) => TemplateError::Parse("unexpected end of template".to_string()),
    }
}

// ============================================================================
// Grammar
// ============================================================================

type Res<'a, T> = IResult<&'a str, T>;

fn ws<'a, O, F>(inner: F) -> impl FnMut(&'a str) -> Res<'a, O>
where
    F: FnMut(&'a str) -> Res<'a, O>,
{
    delimited(multispace0, inner, multispace0)
}

fn template(input: &str) -> Res<'_, Vec<Node>> {
    all_consuming(many0(alt((
        map(action, Node::Action),
        map(text, |t: &str| Node::Text(t.to_string())),
    ))))(input)
}

fn text(input: &str) -> Res<'_, &str> {
    verify(alt((take_until("{{"), rest)), |t: &str| !t.is_empty())(input)
}

fn action(input: &str) -> Res<'_, Expr> {
    preceded(tag("{{"), cut(terminated(ws(pipeline), tag("}}"))))(input)
}

fn pipeline(input: &str) -> Res<'_, Expr> {
    let (input, first) = primary(input)?;
    let (input, stages) = many0(preceded(ws(char('|')), stage))(input)?;
    let expr = stages.into_iter().fold(first, |piped, (name, mut args)| {
        args.push(piped);
        Expr::Call { name, args }
    });
    Ok((input, expr))
}

/// Pipe target: a function with its leading arguments, parentheses optional
fn stage(input: &str) -> Res<'_, (String, Vec<Expr>)> {
    pair(
        map(identifier, str::to_string),
        map(opt(preceded(multispace0, arguments)), Option::unwrap_or_default),
    )(input)
}

fn primary(input: &str) -> Res<'_, Expr> {
    let (input, base) = atom(input)?;
    let (input, fields) = many0(preceded(char('.'), identifier))(input)?;
    let expr = fields.into_iter().fold(base, |target, field| Expr::Field {
        target: Box::new(target),
        field: field.to_string(),
    });
    Ok((input, expr))
}

fn atom(input: &str) -> Res<'_, Expr> {
    alt((
        map(string_literal, Expr::Str),
        map(integer, Expr::Int),
        call,
        map(identifier, |name: &str| Expr::Var(name.to_string())),
        delimited(char('('), ws(pipeline), char(')')),
    ))(input)
}

fn call(input: &str) -> Res<'_, Expr> {
    map(
        pair(identifier, preceded(multispace0, arguments)),
        |(name, args)| Expr::Call {
            name: name.to_string(),
            args,
        },
    )(input)
}

fn arguments(input: &str) -> Res<'_, Vec<Expr>> {
    delimited(
        char('('),
        separated_list0(char(','), ws(pipeline)),
        preceded(multispace0, char(')')),
    )(input)
}

fn identifier(input: &str) -> Res<'_, &str> {
    recognize(pair(
        alt((alpha1, tag("_"))),
        many0_count(alt((alphanumeric1, tag("_")))),
    ))(input)
}

fn integer(input: &str) -> Res<'_, i64> {
    map_res(recognize(pair(opt(char('-')), digit1)), str::parse)(input)
}

fn string_literal(input: &str) -> Res<'_, String> {
    delimited(
        char('"'),
        map(
            opt(escaped_transform(
                is_not("\\\""),
                '\\',
                alt((
                    value("\\", char('\\')),
                    value("\"", char('"')),
                    value("\n", char('n')),
                )),
            )),
            Option::unwrap_or_default,
        ),
        char('"'),
    )(input)
}
