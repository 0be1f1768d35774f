//! Expression tokenizer.
//!
//! Each token kind lists which kinds may follow it. At every position the
//! definitions are tried in a fixed order and the first one that matches
//! and is allowed after the previous token wins.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::{Error, ErrorKind, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Kind {
    Test,
    Comma,
    Number,
    Binary,
    Unary,
    String,
    Lambda,
    SubexprStart,
    SubexprEnd,
    ParamStart,
    ParamEnd,
    Slice,
    ArrayStart,
    ArrayEnd,
    ObjectStart,
    ObjectEnd,
    Filter,
    Function,
    Variable,
    KeyPeriod,
    KeyBrackets,
    Null,
    Context,
    Bool,
}

use Kind::*;

/// Try order at every position.
const DEFINITIONS: &[Kind] = &[
    Test,
    Comma,
    Number,
    Binary,
    Unary,
    String,
    Lambda,
    SubexprStart,
    SubexprEnd,
    ParamStart,
    ParamEnd,
    Slice,
    ArrayStart,
    ArrayEnd,
    ObjectStart,
    ObjectEnd,
    Filter,
    Function,
    Variable,
    KeyPeriod,
    KeyBrackets,
    Null,
    Context,
    Bool,
];

// What may follow a complete value.
const OPERATIONS: &[Kind] = &[
    Filter, Unary, Binary, ArrayEnd, ObjectEnd, ParamEnd, SubexprEnd, Comma, Test,
];

const OPERATIONS_EXTENDED: &[Kind] = &[
    Filter, Unary, Binary, ArrayEnd, ObjectEnd, ParamEnd, SubexprEnd, Comma, Test, KeyPeriod,
    KeyBrackets, Slice,
];

const OPERATIONS_EXTENDED_CALL: &[Kind] = &[
    Filter, Unary, Binary, ArrayEnd, ObjectEnd, ParamEnd, SubexprEnd, Comma, Test, KeyPeriod,
    KeyBrackets, Slice, ParamStart,
];

// What may start a value.
const EXPRESSIONS: &[Kind] = &[
    Function, Bool, String, Variable, Number, Null, Context, ParamStart, ArrayStart,
    ObjectStart, SubexprStart, Unary, Lambda,
];

const AFTER_COMMA: &[Kind] = &[
    Function, Bool, String, Variable, Number, Null, Context, ParamStart, ArrayStart,
    ObjectStart, SubexprStart, Unary, Lambda, ArrayEnd, ObjectEnd,
];

const AFTER_SUBEXPR_START: &[Kind] = &[
    Function, Bool, String, Variable, Number, Null, Context, ParamStart, ArrayStart,
    ObjectStart, SubexprStart, Unary, Lambda, SubexprEnd,
];

const AFTER_PARAM_START: &[Kind] = &[
    Function, Bool, String, Variable, Number, Null, Context, ParamStart, ArrayStart,
    ObjectStart, SubexprStart, Unary, Lambda, ParamEnd,
];

const AFTER_ARRAY_START: &[Kind] = &[
    Function, Bool, String, Variable, Number, Null, Context, ParamStart, ArrayStart,
    ObjectStart, SubexprStart, Unary, Lambda, ArrayEnd,
];

const AFTER_OBJECT_START: &[Kind] = &[
    Function, Bool, String, Variable, Number, Null, Context, ParamStart, ArrayStart,
    ObjectStart, SubexprStart, Unary, Lambda, ObjectEnd,
];

const AFTER_TEST: &[Kind] = &[
    Filter, Unary, Binary, ArrayEnd, ObjectEnd, ParamEnd, SubexprEnd, Comma, Test, ParamStart,
];

impl Kind {
    pub(crate) fn name(self) -> &'static str {
        match self {
            Test => "test",
            Comma => "comma",
            Number => "number",
            Binary => "binary operator",
            Unary => "unary operator",
            String => "string",
            Lambda => "lambda",
            SubexprStart => "subexpression start",
            SubexprEnd => "subexpression end",
            ParamStart => "parameter start",
            ParamEnd => "parameter end",
            Slice => "slice",
            ArrayStart => "array start",
            ArrayEnd => "array end",
            ObjectStart => "object start",
            ObjectEnd => "object end",
            Filter => "filter",
            Function => "function",
            Variable => "variable",
            KeyPeriod => "key period",
            KeyBrackets => "key brackets",
            Null => "null",
            Context => "context",
            Bool => "bool",
        }
    }

    fn next(self) -> &'static [Kind] {
        match self {
            Test => AFTER_TEST,
            Comma => AFTER_COMMA,
            Number | Null | Bool | Lambda => OPERATIONS,
            Binary | Unary => EXPRESSIONS,
            String | SubexprEnd | ParamEnd | Slice | ArrayEnd | ObjectEnd => OPERATIONS_EXTENDED,
            SubexprStart => AFTER_SUBEXPR_START,
            ParamStart => AFTER_PARAM_START,
            ArrayStart => AFTER_ARRAY_START,
            ObjectStart => AFTER_OBJECT_START,
            Filter | Variable | KeyPeriod | KeyBrackets | Context => OPERATIONS_EXTENDED_CALL,
            Function => &[ParamStart],
        }
    }
}

/// A lexed expression token, before operator ordering.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Lexeme {
    Test { name: std::string::String, negated: bool },
    Comma,
    Number(f64),
    Binary(std::string::String),
    Unary(std::string::String),
    String(std::string::String),
    Lambda { params: Vec<std::string::String>, body: std::string::String },
    SubexprStart,
    SubexprEnd,
    ParamStart,
    ParamEnd,
    Slice { start: Option<i64>, end: Option<i64> },
    ArrayStart,
    ArrayEnd,
    ObjectStart,
    ObjectEnd,
    Filter(std::string::String),
    Function(std::string::String),
    Variable(std::string::String),
    KeyPeriod(std::string::String),
    /// Raw text between the brackets, compiled separately.
    KeyBrackets(std::string::String),
    Null,
    Context,
    Bool(bool),
}

impl Lexeme {
    pub(crate) fn kind(&self) -> Kind {
        match self {
            Lexeme::Test { .. } => Test,
            Lexeme::Comma => Comma,
            Lexeme::Number(_) => Number,
            Lexeme::Binary(_) => Binary,
            Lexeme::Unary(_) => Unary,
            Lexeme::String(_) => String,
            Lexeme::Lambda { .. } => Lambda,
            Lexeme::SubexprStart => SubexprStart,
            Lexeme::SubexprEnd => SubexprEnd,
            Lexeme::ParamStart => ParamStart,
            Lexeme::ParamEnd => ParamEnd,
            Lexeme::Slice { .. } => Slice,
            Lexeme::ArrayStart => ArrayStart,
            Lexeme::ArrayEnd => ArrayEnd,
            Lexeme::ObjectStart => ObjectStart,
            Lexeme::ObjectEnd => ObjectEnd,
            Lexeme::Filter(_) => Filter,
            Lexeme::Function(_) => Function,
            Lexeme::Variable(_) => Variable,
            Lexeme::KeyPeriod(_) => KeyPeriod,
            Lexeme::KeyBrackets(_) => KeyBrackets,
            Lexeme::Null => Null,
            Lexeme::Context => Context,
            Lexeme::Bool(_) => Bool,
        }
    }

    /// Source word for tokens that can collide with reserved words.
    fn word(&self) -> &str {
        match self {
            Lexeme::Variable(s) | Lexeme::Function(s) | Lexeme::Binary(s) | Lexeme::Unary(s) => s,
            Lexeme::Bool(true) => "true",
            Lexeme::Bool(false) => "false",
            Lexeme::Null => "null",
            Lexeme::Context => "_context",
            _ => "",
        }
    }
}

const RESERVED: &[&str] = &[
    "true", "false", "null", "none", "TRUE", "FALSE", "NULL", "NONE", "_context", "and", "b-and",
    "or", "b-or", "b-xor", "in", "not in", "not", "if", "matches", "starts", "ends", "with",
];

fn is_reserved(word: &str) -> bool {
    RESERVED.contains(&word)
}

fn pattern(re: &str) -> Regex {
    Regex::new(re).expect("valid expression pattern")
}

static TEST_RE: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"^is\s+(?:(not)\s+)?([a-zA-Z_]\w*(?:\s+(?:as|by))?)"));
static NUMBER_RE: LazyLock<Regex> = LazyLock::new(|| pattern(r"^-?\d+(?:\.\d+)?"));
static WORD_OP_RE: LazyLock<Regex> = LazyLock::new(|| {
    pattern(r"^(b-and|b-xor|b-or|not\s+in|and|or|in|matches|starts\s+with|ends\s+with)\b")
});
static NOT_RE: LazyLock<Regex> = LazyLock::new(|| pattern(r"^not\b"));
static LAMBDA_RE: LazyLock<Regex> = LazyLock::new(|| {
    pattern(r"^(?:([a-zA-Z_]\w*)|\(\s*([a-zA-Z_]\w*(?:\s*,\s*[a-zA-Z_]\w*)*)?\s*\))\s*=>")
});
static SLICE_RE: LazyLock<Regex> = LazyLock::new(|| pattern(r"^\[(-?\d*):(-?\d*)\]"));
static FILTER_RE: LazyLock<Regex> = LazyLock::new(|| pattern(r"^\|\s*([a-zA-Z_]\w*)"));
static FUNCTION_RE: LazyLock<Regex> = LazyLock::new(|| pattern(r"^([a-zA-Z_]\w*)\s*\("));
static NAME_RE: LazyLock<Regex> = LazyLock::new(|| pattern(r"^[a-zA-Z_]\w*"));
static KEY_PERIOD_RE: LazyLock<Regex> = LazyLock::new(|| pattern(r"^\.(\w+)"));
static NULL_RE: LazyLock<Regex> = LazyLock::new(|| pattern(r"^(?:null|NULL|none|NONE)\b"));
static CONTEXT_RE: LazyLock<Regex> = LazyLock::new(|| pattern(r"^_context\b"));
static BOOL_RE: LazyLock<Regex> = LazyLock::new(|| pattern(r"^(true|TRUE|false|FALSE)\b"));

// Longest first where symbols share a prefix.
const SYMBOLS: &[&str] = &[
    "===", "!==", "??", "?:", "==", "!=", "<=", ">=", "**", "//", "..", "<", ">", "+", "-", "~",
    "%", "?", ":", "*", "/",
];

/// Split an expression into lexemes.
pub(crate) fn tokenize(expression: &str) -> Result<Vec<Lexeme>> {
    let mut tokens: Vec<Lexeme> = Vec::new();
    let mut pos = 0;

    loop {
        let rest = expression[pos..].trim_start();
        pos = expression.len() - rest.len();
        if rest.is_empty() {
            break;
        }

        let mut rejected = Vec::new();
        let mut matched = None;
        for &kind in DEFINITIONS {
            let Some((lexeme, len)) = match_kind(kind, rest, &tokens) else {
                continue;
            };
            if let Some(prev) = tokens.last() {
                if !prev.kind().next().contains(&lexeme.kind()) {
                    rejected.push(format!(
                        "{} cannot follow a {} at template:{} near '{}'",
                        lexeme.kind().name(),
                        prev.kind().name(),
                        pos,
                        near(rest, len),
                    ));
                    continue;
                }
            }
            matched = Some((lexeme, len));
            break;
        }

        let Some((lexeme, len)) = matched else {
            let message = if rejected.is_empty() {
                format!("Unable to parse '{}' at template position{}", rest, pos)
            } else {
                rejected.join(" OR ")
            };
            return Err(Error::new(ErrorKind::UnparseableExpression(message)));
        };
        tracing::trace!(kind = lexeme.kind().name(), pos, "expression token");
        tokens.push(lexeme);
        pos += len;
    }

    Ok(tokens)
}

fn near(rest: &str, len: usize) -> &str {
    let text = &rest[..len];
    match text.char_indices().nth(20) {
        Some((i, _)) => &text[..i],
        None => text,
    }
}

/// Expecting the start of a value rather than an operator.
fn expects_value(tokens: &[Lexeme]) -> bool {
    tokens
        .last()
        .map_or(true, |prev| !prev.kind().next().contains(&Binary))
}

/// Kind of the innermost unclosed parenthesis.
fn open_paren(tokens: &[Lexeme]) -> Option<Kind> {
    let mut depth = 0usize;
    for token in tokens.iter().rev() {
        match token.kind() {
            SubexprEnd | ParamEnd => depth += 1,
            kind @ (SubexprStart | ParamStart) => {
                if depth == 0 {
                    return Some(kind);
                }
                depth -= 1;
            }
            _ => {}
        }
    }
    None
}

fn match_kind(kind: Kind, rest: &str, tokens: &[Lexeme]) -> Option<(Lexeme, usize)> {
    match kind {
        Test => {
            let caps = TEST_RE.captures(rest)?;
            let name = caps[2].split_whitespace().collect::<Vec<_>>().join(" ");
            Some((
                Lexeme::Test {
                    name,
                    negated: caps.get(1).is_some(),
                },
                caps[0].len(),
            ))
        }
        Comma => rest.starts_with(',').then(|| (Lexeme::Comma, 1)),
        Number => {
            let m = NUMBER_RE.find(rest)?;
            let value = m.as_str().parse().ok()?;
            Some((Lexeme::Number(value), m.end()))
        }
        Binary => match_binary(rest, tokens),
        Unary => {
            let m = NOT_RE.find(rest)?;
            Some((Lexeme::Unary("not".into()), m.end()))
        }
        String => match_string(rest),
        Lambda => match_lambda(rest),
        SubexprStart => rest.starts_with('(').then(|| (Lexeme::SubexprStart, 1)),
        SubexprEnd => (rest.starts_with(')') && open_paren(tokens) == Some(SubexprStart))
            .then(|| (Lexeme::SubexprEnd, 1)),
        ParamStart => {
            let prev = tokens.last()?;
            (rest.starts_with('(') && !is_reserved(prev.word())).then(|| (Lexeme::ParamStart, 1))
        }
        ParamEnd => (rest.starts_with(')') && open_paren(tokens) == Some(ParamStart))
            .then(|| (Lexeme::ParamEnd, 1)),
        Slice => {
            let caps = SLICE_RE.captures(rest)?;
            let bound = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<i64>().ok());
            Some((
                Lexeme::Slice {
                    start: bound(1),
                    end: bound(2),
                },
                caps[0].len(),
            ))
        }
        ArrayStart => rest.starts_with('[').then(|| (Lexeme::ArrayStart, 1)),
        ArrayEnd => rest.starts_with(']').then(|| (Lexeme::ArrayEnd, 1)),
        ObjectStart => rest.starts_with('{').then(|| (Lexeme::ObjectStart, 1)),
        ObjectEnd => rest.starts_with('}').then(|| (Lexeme::ObjectEnd, 1)),
        Filter => {
            let caps = FILTER_RE.captures(rest)?;
            Some((Lexeme::Filter(caps[1].to_string()), caps[0].len()))
        }
        Function => {
            let caps = FUNCTION_RE.captures(rest)?;
            let name = &caps[1];
            if is_reserved(name) {
                return None;
            }
            // Leave the parenthesis for the parameter list.
            Some((Lexeme::Function(name.to_string()), caps[0].len() - 1))
        }
        Variable => {
            let m = NAME_RE.find(rest)?;
            if is_reserved(m.as_str()) {
                return None;
            }
            Some((Lexeme::Variable(m.as_str().to_string()), m.end()))
        }
        KeyPeriod => {
            let caps = KEY_PERIOD_RE.captures(rest)?;
            Some((Lexeme::KeyPeriod(caps[1].to_string()), caps[0].len()))
        }
        KeyBrackets => match_key_brackets(rest),
        Null => NULL_RE.find(rest).map(|m| (Lexeme::Null, m.end())),
        Context => CONTEXT_RE.find(rest).map(|m| (Lexeme::Context, m.end())),
        Bool => {
            let m = BOOL_RE.find(rest)?;
            Some((Lexeme::Bool(m.as_str().eq_ignore_ascii_case("true")), m.end()))
        }
    }
}

fn match_binary(rest: &str, tokens: &[Lexeme]) -> Option<(Lexeme, usize)> {
    if let Some(m) = WORD_OP_RE.find(rest) {
        let symbol = m.as_str().split_whitespace().collect::<Vec<_>>().join(" ");
        return Some((Lexeme::Binary(symbol), m.end()));
    }

    let symbol = SYMBOLS.iter().find(|s| rest.starts_with(**s))?;
    // A sign where a value is expected.
    if matches!(*symbol, "-" | "+") && expects_value(tokens) {
        return Some((Lexeme::Unary(symbol.to_string()), 1));
    }
    Some((Lexeme::Binary(symbol.to_string()), symbol.len()))
}

fn match_string(rest: &str) -> Option<(Lexeme, usize)> {
    let quote = rest.chars().next().filter(|c| *c == '"' || *c == '\'')?;
    let mut value = std::string::String::new();
    let mut chars = rest.char_indices().skip(1);
    while let Some((i, c)) = chars.next() {
        if c == quote {
            return Some((Lexeme::String(value), i + 1));
        }
        if c == '\\' {
            let (_, escaped) = chars.next()?;
            match escaped {
                'n' => value.push('\n'),
                'r' => value.push('\r'),
                't' => value.push('\t'),
                '\\' | '"' | '\'' => value.push(escaped),
                other => {
                    value.push('\\');
                    value.push(other);
                }
            }
        } else {
            value.push(c);
        }
    }
    None
}

/// Length of a bracketed or lambda body: up to the first comma or closing
/// bracket at depth zero, skipping quoted strings.
fn scan_to_boundary(text: &str, stop_at_comma: bool) -> usize {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (i, c) in text.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => quote = Some(c),
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => {
                if depth == 0 {
                    return i;
                }
                depth -= 1;
            }
            ',' if stop_at_comma && depth == 0 => return i,
            _ => {}
        }
    }
    text.len()
}

fn match_lambda(rest: &str) -> Option<(Lexeme, usize)> {
    let caps = LAMBDA_RE.captures(rest)?;
    let params = match (caps.get(1), caps.get(2)) {
        (Some(single), _) => vec![single.as_str().to_string()],
        (None, Some(list)) => list.as_str().split(',').map(|p| p.trim().to_string()).collect(),
        (None, None) => Vec::new(),
    };
    let head = caps[0].len();
    let body_len = scan_to_boundary(&rest[head..], true);
    let body = rest[head..head + body_len].trim();
    if body.is_empty() {
        return None;
    }
    Some((
        Lexeme::Lambda {
            params,
            body: body.to_string(),
        },
        head + body_len,
    ))
}

fn match_key_brackets(rest: &str) -> Option<(Lexeme, usize)> {
    let inner = rest.strip_prefix('[')?;
    let len = scan_to_boundary(inner, false);
    if !inner[len..].starts_with(']') {
        return None;
    }
    let key = inner[..len].trim();
    let quoted = key.starts_with(|c: char| c == '"' || c == '\'');
    if key.is_empty() || (key.contains(':') && !quoted) {
        return None;
    }
    Some((Lexeme::KeyBrackets(key.to_string()), len + 2))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(expression: &str) -> Vec<Lexeme> {
        tokenize(expression).unwrap()
    }

    #[test]
    fn values_and_operators() {
        assert_eq!(
            lex("2 + 3 * 4"),
            vec![
                Lexeme::Number(2.0),
                Lexeme::Binary("+".into()),
                Lexeme::Number(3.0),
                Lexeme::Binary("*".into()),
                Lexeme::Number(4.0),
            ]
        );
    }

    #[test]
    fn minus_after_value_is_binary() {
        assert_eq!(
            lex("a-1"),
            vec![
                Lexeme::Variable("a".into()),
                Lexeme::Binary("-".into()),
                Lexeme::Number(1.0),
            ]
        );
        assert_eq!(lex("-20"), vec![Lexeme::Number(-20.0)]);
        assert_eq!(
            lex("-a"),
            vec![Lexeme::Unary("-".into()), Lexeme::Variable("a".into())]
        );
    }

    #[test]
    fn word_operators_need_a_boundary() {
        assert_eq!(
            lex("index in items"),
            vec![
                Lexeme::Variable("index".into()),
                Lexeme::Binary("in".into()),
                Lexeme::Variable("items".into()),
            ]
        );
        assert_eq!(
            lex("a not in b"),
            vec![
                Lexeme::Variable("a".into()),
                Lexeme::Binary("not in".into()),
                Lexeme::Variable("b".into()),
            ]
        );
    }

    #[test]
    fn calls_filters_and_keys() {
        assert_eq!(
            lex("user.name|upper(1)"),
            vec![
                Lexeme::Variable("user".into()),
                Lexeme::KeyPeriod("name".into()),
                Lexeme::Filter("upper".into()),
                Lexeme::ParamStart,
                Lexeme::Number(1.0),
                Lexeme::ParamEnd,
            ]
        );
        assert_eq!(
            lex("range(1, 3)")[..2],
            [Lexeme::Function("range".into()), Lexeme::ParamStart]
        );
        assert_eq!(
            lex("a[b[0]]"),
            vec![Lexeme::Variable("a".into()), Lexeme::KeyBrackets("b[0]".into())]
        );
    }

    #[test]
    fn tests_with_negation_and_two_words() {
        assert_eq!(
            lex("x is not divisible by(3)")[1],
            Lexeme::Test {
                name: "divisible by".into(),
                negated: true,
            }
        );
    }

    #[test]
    fn strings_unescape() {
        assert_eq!(lex(r#""a\"b\n""#), vec![Lexeme::String("a\"b\n".into())]);
        assert_eq!(lex(r"'it\'s'"), vec![Lexeme::String("it's".into())]);
    }

    #[test]
    fn lambda_body_stops_at_comma() {
        assert_eq!(
            lex("f((a, b) => a + b, 1)")[2],
            Lexeme::Lambda {
                params: vec!["a".into(), "b".into()],
                body: "a + b".into(),
            }
        );
    }

    #[test]
    fn reserved_words_are_literals() {
        assert_eq!(
            lex("true and null"),
            vec![Lexeme::Bool(true), Lexeme::Binary("and".into()), Lexeme::Null]
        );
        assert_eq!(lex("nullable"), vec![Lexeme::Variable("nullable".into())]);
    }

    #[test]
    fn unexpected_token_names_both_kinds() {
        let err = tokenize("1 2").unwrap_err();
        assert_eq!(
            err.to_string(),
            "number cannot follow a number at template:2 near '2'"
        );
    }

    #[test]
    fn garbage_is_reported_with_position() {
        let err = tokenize("a = b").unwrap_err();
        assert_eq!(err.to_string(), "Unable to parse '= b' at template position2");
    }
}
