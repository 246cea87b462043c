//! nom grammar for the query language
//!
//! One parser function per grammar rule. Identifiers are
//! `[A-Za-z0-9_-]+` (a dash only counts when followed by another
//! identifier character, so `x -> json` lexes as `x`, `->`, `json`).
//! Comments run from `//` to end of line and are treated as whitespace.
//! Items in `with`, `headers`, `only`, lists and objects are separated by
//! commas and/or newlines.

use nom::{
    branch::alt,
    bytes::complete::{tag, take_while, take_while1},
    character::complete::{char, digit1, one_of},
    combinator::{map, map_res, opt, recognize},
    multi::{many0, many1, separated_list0, separated_list1},
    sequence::{delimited, preceded},
    IResult, Parser,
};
use serde_json::Value as Json;

use crate::query::ast::{
    ApplyFn, ChainSegment, Method, Modifiers, OnlyFilter, Query, Statement, ValueExpr, WithParam,
};

/// Words that cannot begin a bare chain or an `only` path
const RESERVED: &[&str] = &[
    "from",
    "to",
    "into",
    "update",
    "delete",
    "as",
    "in",
    "use",
    "with",
    "only",
    "headers",
    "timeout",
    "hidden",
    "ignore-errors",
    "max-age",
    "s-max-age",
    "matches",
];

// ============================================================================
// Top-level Rules
// ============================================================================

/// Parse a complete query: `use` defaults followed by one or more statements
pub fn query(input: &str) -> IResult<&str, Query> {
    let (input, uses) = many0(preceded(ws0, use_clause)).parse(input)?;
    let (input, statements) = many1(preceded(ws0, statement)).parse(input)?;
    let (input, _) = ws0(input)?;

    let mut defaults = Modifiers::default();
    for (name, value) in uses {
        match name {
            "timeout" => defaults.timeout = Some(value),
            "max-age" => defaults.max_age = Some(value),
            "s-max-age" => defaults.s_max_age = Some(value),
            _ => unreachable!("use_clause only yields known modifiers"),
        }
    }

    Ok((input, Query { defaults, statements }))
}

/// `use timeout = 800`
fn use_clause(input: &str) -> IResult<&str, (&str, u64)> {
    let (rest, _) = keyword("use")(input)?;
    let (rest, _) = sp1(rest)?;
    let (rest, name) = ident(rest)?;
    if !matches!(name, "timeout" | "max-age" | "s-max-age") {
        return Err(fail(input));
    }
    let (rest, _) = assign_sep(rest)?;
    let (rest, value) = uint(rest)?;
    Ok((rest, (name, value)))
}

/// `METHOD resource [as alias] [in a.b.c]` followed by clauses
fn statement(input: &str) -> IResult<&str, Statement> {
    let (input, method) = method_kw(input)?;
    let (input, _) = sp1(input)?;
    let (input, resource) = ident(input)?;
    let (input, alias) = opt(preceded((sp1, keyword("as"), sp1), ident)).parse(input)?;
    let (input, in_target) = opt(preceded(
        (sp1, keyword("in"), sp1),
        separated_list1(char('.'), ident),
    ))
    .parse(input)?;

    let mut stmt = Statement::new(method, resource);
    stmt.alias = alias.map(String::from);
    stmt.in_target = in_target.map(|path| path.into_iter().map(String::from).collect());

    let (input, clauses) = many0(preceded(ws0, clause)).parse(input)?;
    for c in clauses {
        match c {
            Clause::Headers(pairs) => stmt.headers.extend(pairs),
            Clause::Timeout(v) => stmt.timeout = Some(v),
            Clause::MaxAge(v) => stmt.cache_control.max_age = Some(v),
            Clause::SMaxAge(v) => stmt.cache_control.s_max_age = Some(v),
            Clause::With(params) => stmt.with.extend(params),
            Clause::Only(filters) => stmt.only.extend(filters),
            Clause::Hidden => stmt.hidden = true,
            Clause::IgnoreErrors => stmt.ignore_errors = true,
        }
    }
    Ok((input, stmt))
}

fn method_kw(input: &str) -> IResult<&str, Method> {
    let (rest, word) = ident(input)?;
    let method = match word {
        "from" => Method::From,
        "to" => Method::To,
        "into" => Method::Into,
        "update" => Method::Update,
        "delete" => Method::Delete,
        _ => return Err(fail(input)),
    };
    Ok((rest, method))
}

// ============================================================================
// Statement Clauses
// ============================================================================

enum Clause {
    Headers(Vec<(String, ValueExpr)>),
    Timeout(ValueExpr),
    MaxAge(ValueExpr),
    SMaxAge(ValueExpr),
    With(Vec<WithParam>),
    Only(Vec<OnlyFilter>),
    Hidden,
    IgnoreErrors,
}

fn clause(input: &str) -> IResult<&str, Clause> {
    let (rest, kw) = ident(input)?;
    match kw {
        "headers" => map(
            preceded(ws1, separated_list1(item_sep, header_pair)),
            Clause::Headers,
        )
        .parse(rest),
        "timeout" => map(preceded(assign_sep, value_expr), Clause::Timeout).parse(rest),
        "max-age" => map(preceded(assign_sep, value_expr), Clause::MaxAge).parse(rest),
        "s-max-age" => map(preceded(assign_sep, value_expr), Clause::SMaxAge).parse(rest),
        "with" => map(
            preceded(ws1, separated_list1(item_sep, with_pair)),
            Clause::With,
        )
        .parse(rest),
        "only" => map(
            preceded(ws1, separated_list1(item_sep, only_item)),
            Clause::Only,
        )
        .parse(rest),
        "hidden" => Ok((rest, Clause::Hidden)),
        "ignore-errors" => Ok((rest, Clause::IgnoreErrors)),
        _ => Err(fail(input)),
    }
}

/// `name = value [-> fn]*`
fn with_pair(input: &str) -> IResult<&str, WithParam> {
    let (input, name) = ident(input)?;
    let (input, _) = (sp0, char('='), ws0).parse(input)?;
    let (input, value) = value_expr(input)?;
    let (input, functions) = apply_chain(input)?;
    Ok((
        input,
        WithParam {
            name: name.to_string(),
            value,
            functions,
        },
    ))
}

/// `Header-Name = value`
fn header_pair(input: &str) -> IResult<&str, (String, ValueExpr)> {
    let (input, name) = ident(input)?;
    let (input, _) = (sp0, char('='), ws0).parse(input)?;
    let (input, value) = value_expr(input)?;
    Ok((input, (name.to_string(), value)))
}

/// `a.b.*.c [-> matches("regex")]`
fn only_item(input: &str) -> IResult<&str, OnlyFilter> {
    let (rest, head) = path_segment(input)?;
    if head != "*" && RESERVED.contains(&head.as_str()) {
        return Err(fail(input));
    }
    let (rest, tail) = many0(preceded(char('.'), path_segment)).parse(rest)?;
    let (rest, matches) = opt(preceded(
        (sp0, tag("->"), sp0, keyword("matches"), sp0),
        delimited((char('('), sp0), string_literal, (sp0, char(')'))),
    ))
    .parse(rest)?;

    let mut path = vec![head];
    path.extend(tail);
    Ok((rest, OnlyFilter { path, matches }))
}

fn path_segment(input: &str) -> IResult<&str, String> {
    alt((
        map(tag("*"), |_| "*".to_string()),
        map(ident, String::from),
    ))
    .parse(input)
}

/// `-> fn` applications after a value, in declaration order
fn apply_chain(input: &str) -> IResult<&str, Vec<ApplyFn>> {
    many0(preceded((sp0, tag("->"), ws0), apply_fn)).parse(input)
}

fn apply_fn(input: &str) -> IResult<&str, ApplyFn> {
    let (rest, word) = ident(input)?;
    let f = match word {
        "no-multiplex" => ApplyFn::NoMultiplex,
        "base64" => ApplyFn::Base64,
        "json" => ApplyFn::Json,
        "as-body" => ApplyFn::AsBody,
        "flatten" => ApplyFn::Flatten,
        _ => return Err(fail(input)),
    };
    Ok((rest, f))
}

// ============================================================================
// Value Expressions
// ============================================================================

fn value_expr(input: &str) -> IResult<&str, ValueExpr> {
    alt((
        map(string_literal, |s| ValueExpr::Literal(Json::String(s))),
        map(number, ValueExpr::Literal),
        list,
        object,
        variable,
        bareword,
    ))
    .parse(input)
}

/// `$name.path`: reference into a prior result or client parameter
fn variable(input: &str) -> IResult<&str, ValueExpr> {
    let (input, _) = char('$')(input)?;
    let (input, path) = separated_list1(char('.'), ident).parse(input)?;
    Ok((
        input,
        ValueExpr::Variable(path.into_iter().map(String::from).collect()),
    ))
}

/// Bare words: boolean/null literals, or a chain like `hero.$field.name`
fn bareword(input: &str) -> IResult<&str, ValueExpr> {
    let (rest, word) = ident(input)?;
    match word {
        "true" => Ok((rest, ValueExpr::Literal(Json::Bool(true)))),
        "false" => Ok((rest, ValueExpr::Literal(Json::Bool(false)))),
        "null" => Ok((rest, ValueExpr::Literal(Json::Null))),
        _ if RESERVED.contains(&word) => Err(fail(input)),
        _ => {
            let (rest, tail) = many0(preceded(char('.'), chain_segment)).parse(rest)?;
            let mut segments = vec![ChainSegment::Ident(word.to_string())];
            segments.extend(tail);
            Ok((rest, ValueExpr::Chain(segments)))
        }
    }
}

fn chain_segment(input: &str) -> IResult<&str, ChainSegment> {
    alt((
        map(preceded(char('$'), ident), |s: &str| {
            ChainSegment::Variable(s.to_string())
        }),
        map(ident, |s: &str| ChainSegment::Ident(s.to_string())),
    ))
    .parse(input)
}

fn list(input: &str) -> IResult<&str, ValueExpr> {
    map(
        delimited(
            (char('['), ws0),
            separated_list0(item_sep, value_expr),
            (ws0, char(']')),
        ),
        ValueExpr::List,
    )
    .parse(input)
}

fn object(input: &str) -> IResult<&str, ValueExpr> {
    map(
        delimited(
            (char('{'), ws0),
            separated_list0(item_sep, object_entry),
            (ws0, char('}')),
        ),
        ValueExpr::Object,
    )
    .parse(input)
}

fn object_entry(input: &str) -> IResult<&str, (String, ValueExpr)> {
    let (input, key) = alt((string_literal, map(ident, String::from))).parse(input)?;
    let (input, _) = (sp0, char(':'), ws0).parse(input)?;
    let (input, value) = value_expr(input)?;
    Ok((input, (key, value)))
}

// ============================================================================
// Literals
// ============================================================================

/// Double-quoted string with `\"`, `\\`, `\n`, `\t`, `\r` escapes
fn string_literal(input: &str) -> IResult<&str, String> {
    let (input, _) = char('"')(input)?;
    let mut out = String::new();
    let mut chars = input.char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '"' => return Ok((&input[i + 1..], out)),
            '\\' => match chars.next() {
                Some((_, 'n')) => out.push('\n'),
                Some((_, 't')) => out.push('\t'),
                Some((_, 'r')) => out.push('\r'),
                Some((_, escaped)) => out.push(escaped),
                None => break,
            },
            other => out.push(other),
        }
    }
    Err(fail(input))
}

/// Optionally-signed integer or decimal number
fn number(input: &str) -> IResult<&str, Json> {
    let (rest, text) =
        recognize((opt(one_of("+-")), digit1, opt((char('.'), digit1)))).parse(input)?;
    let value = if text.contains('.') {
        let parsed: f64 = text.parse().map_err(|_| fail(input))?;
        serde_json::Number::from_f64(parsed)
            .map(Json::Number)
            .ok_or_else(|| fail(input))?
    } else {
        let parsed: i64 = text.parse().map_err(|_| fail(input))?;
        Json::from(parsed)
    };
    Ok((rest, value))
}

fn uint(input: &str) -> IResult<&str, u64> {
    map_res(digit1, str::parse::<u64>).parse(input)
}

// ============================================================================
// Lexical Helpers
// ============================================================================

/// `[A-Za-z0-9_-]+`; a dash is only part of the identifier when followed
/// by another identifier character, so `x->y` lexes as `x`, `->`, `y`
fn ident(input: &str) -> IResult<&str, &str> {
    let bytes = input.as_bytes();
    if bytes.is_empty() || !(bytes[0].is_ascii_alphanumeric() || bytes[0] == b'_') {
        return Err(fail(input));
    }
    let mut end = 1;
    while end < bytes.len() {
        let c = bytes[end];
        if c.is_ascii_alphanumeric() || c == b'_' {
            end += 1;
        } else if c == b'-'
            && bytes
                .get(end + 1)
                .is_some_and(|&n| n.is_ascii_alphanumeric() || n == b'_')
        {
            end += 1;
        } else {
            break;
        }
    }
    Ok((&input[end..], &input[..end]))
}

/// Exact identifier match
fn keyword<'a>(word: &'static str) -> impl Fn(&'a str) -> IResult<&'a str, &'a str> {
    move |input| {
        let (rest, w) = ident(input)?;
        if w == word {
            Ok((rest, w))
        } else {
            Err(fail(input))
        }
    }
}

/// Whitespace and comments, possibly empty
fn ws0(input: &str) -> IResult<&str, &str> {
    recognize(many0(alt((
        take_while1(|c: char| c.is_whitespace()),
        comment,
    ))))
    .parse(input)
}

/// Whitespace and comments, at least one character
fn ws1(input: &str) -> IResult<&str, &str> {
    let (rest, consumed) = ws0(input)?;
    if consumed.is_empty() {
        Err(fail(input))
    } else {
        Ok((rest, consumed))
    }
}

fn comment(input: &str) -> IResult<&str, &str> {
    recognize((tag("//"), take_while(|c| c != '\n'))).parse(input)
}

/// Same-line spaces and tabs
fn sp0(input: &str) -> IResult<&str, &str> {
    take_while(|c| c == ' ' || c == '\t')(input)
}

fn sp1(input: &str) -> IResult<&str, &str> {
    take_while1(|c| c == ' ' || c == '\t')(input)
}

/// `=` with surrounding whitespace, or plain mandatory whitespace
fn assign_sep(input: &str) -> IResult<&str, ()> {
    alt((map((sp0, char('='), ws0), |_| ()), map(sp1, |_| ()))).parse(input)
}

/// Item separator inside `with`/`headers`/`only`/lists/objects: a comma
/// (with surrounding whitespace) or whitespace containing a newline
fn item_sep(input: &str) -> IResult<&str, ()> {
    alt((map((sp0, char(','), ws0), |_| ()), newline_sep)).parse(input)
}

fn newline_sep(input: &str) -> IResult<&str, ()> {
    let (rest, consumed) = ws0(input)?;
    if consumed.contains('\n') {
        Ok((rest, ()))
    } else {
        Err(fail(input))
    }
}

fn fail(input: &str) -> nom::Err<nom::error::Error<&str>> {
    nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Tag))
}
