//! Control tags: recognizing `{% ... %}` bodies and how tags nest.

use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::ast::{Expr, IncludeArgs, MacroParam, Tag};
use crate::error::{Error, ErrorKind, Result};
use crate::escape::EscapeStrategy;
use crate::expr;
use crate::options::Autoescape;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TagKind {
    If,
    ElseIf,
    Else,
    EndIf,
    For,
    EndFor,
    Set,
    SetCapture,
    EndSet,
    Block,
    EndBlock,
    Extends,
    Use,
    Include,
    Embed,
    EndEmbed,
    Import,
    From,
    Macro,
    EndMacro,
    With,
    EndWith,
    Spaceless,
    EndSpaceless,
    Apply,
    EndApply,
    Filter,
    EndFilter,
    Autoescape,
    EndAutoescape,
    Do,
    Deprecated,
}

impl TagKind {
    pub(crate) fn name(self) -> &'static str {
        match self {
            TagKind::If => "if",
            TagKind::ElseIf => "elseif",
            TagKind::Else => "else",
            TagKind::EndIf => "endif",
            TagKind::For => "for",
            TagKind::EndFor => "endfor",
            TagKind::Set => "set",
            TagKind::SetCapture => "setcapture",
            TagKind::EndSet => "endset",
            TagKind::Block => "block",
            TagKind::EndBlock => "endblock",
            TagKind::Extends => "extends",
            TagKind::Use => "use",
            TagKind::Include => "include",
            TagKind::Embed => "embed",
            TagKind::EndEmbed => "endembed",
            TagKind::Import => "import",
            TagKind::From => "from",
            TagKind::Macro => "macro",
            TagKind::EndMacro => "endmacro",
            TagKind::With => "with",
            TagKind::EndWith => "endwith",
            TagKind::Spaceless => "spaceless",
            TagKind::EndSpaceless => "endspaceless",
            TagKind::Apply => "apply",
            TagKind::EndApply => "endapply",
            TagKind::Filter => "filter",
            TagKind::EndFilter => "endfilter",
            TagKind::Autoescape => "autoescape",
            TagKind::EndAutoescape => "endautoescape",
            TagKind::Do => "do",
            TagKind::Deprecated => "deprecated",
        }
    }

    /// `false` for tags that close or continue an enclosing tag.
    pub(crate) fn is_open(self) -> bool {
        !matches!(
            self,
            TagKind::ElseIf
                | TagKind::Else
                | TagKind::EndIf
                | TagKind::EndFor
                | TagKind::EndSet
                | TagKind::EndBlock
                | TagKind::EndEmbed
                | TagKind::EndMacro
                | TagKind::EndWith
                | TagKind::EndSpaceless
                | TagKind::EndApply
                | TagKind::EndFilter
                | TagKind::EndAutoescape
        )
    }

    /// Tags that may follow this one at the same level. An `else` is
    /// narrowed to its own terminator when it is pushed.
    pub(crate) fn next(self) -> &'static [TagKind] {
        match self {
            TagKind::If => &[TagKind::ElseIf, TagKind::Else, TagKind::EndIf],
            TagKind::ElseIf => &[TagKind::Else, TagKind::ElseIf, TagKind::EndIf],
            TagKind::Else => &[TagKind::EndIf, TagKind::EndFor],
            TagKind::For => &[TagKind::Else, TagKind::EndFor],
            TagKind::SetCapture => &[TagKind::EndSet],
            TagKind::Block => &[TagKind::EndBlock],
            TagKind::Embed => &[TagKind::EndEmbed],
            TagKind::Macro => &[TagKind::EndMacro],
            TagKind::With => &[TagKind::EndWith],
            TagKind::Spaceless => &[TagKind::EndSpaceless],
            TagKind::Apply => &[TagKind::EndApply],
            TagKind::Filter => &[TagKind::EndFilter],
            TagKind::Autoescape => &[TagKind::EndAutoescape],
            _ => &[],
        }
    }
}

/// A recognized tag. End tags carry no payload.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct LogicToken {
    pub kind: TagKind,
    pub tag: Option<Tag>,
}

impl LogicToken {
    pub(crate) fn next(&self) -> &'static [TagKind] {
        match &self.tag {
            // `{% block name expr %}` is complete on its own.
            Some(Tag::Block {
                expression: Some(_),
                ..
            }) => &[],
            _ => self.kind.next(),
        }
    }
}

static TAGS: LazyLock<Vec<(TagKind, Regex)>> = LazyLock::new(|| {
    let table: &[(TagKind, &str)] = &[
        (TagKind::If, r"^if\s+([\s\S]+)$"),
        (TagKind::ElseIf, r"^elseif\s+([\s\S]+)$"),
        (TagKind::Else, r"^else$"),
        (TagKind::EndIf, r"^endif$"),
        (
            TagKind::For,
            r"^for\s+([a-zA-Z0-9_,\s]+?)\s+in\s+([\s\S]+?)(?:\s+if\s+([\s\S]+))?$",
        ),
        (TagKind::EndFor, r"^endfor$"),
        (TagKind::Set, r"^set\s+([a-zA-Z_]\w*)\s*=\s*([\s\S]+)$"),
        (TagKind::SetCapture, r"^set\s+([a-zA-Z_]\w*)$"),
        (TagKind::EndSet, r"^endset$"),
        (TagKind::Block, r"^block\s+([a-zA-Z_][\w-]*)(?:\s+([\s\S]+))?$"),
        (TagKind::EndBlock, r"^endblock(?:\s+[\w-]+)?$"),
        (TagKind::Extends, r"^extends\s+([\s\S]+)$"),
        (TagKind::Use, r"^use\s+([\s\S]+?)(?:\s+with\s+([\s\S]+))?$"),
        (
            TagKind::Include,
            r"^include\s+([\s\S]+?)(\s+ignore\s+missing)?(?:\s+with\s+([\s\S]+?))?(\s+only)?$",
        ),
        (
            TagKind::Embed,
            r"^embed\s+([\s\S]+?)(\s+ignore\s+missing)?(?:\s+with\s+([\s\S]+?))?(\s+only)?$",
        ),
        (TagKind::EndEmbed, r"^endembed$"),
        (TagKind::Import, r"^import\s+([\s\S]+?)\s+as\s+([a-zA-Z_]\w*)$"),
        (TagKind::From, r"^from\s+([\s\S]+?)\s+import\s+([\s\S]+)$"),
        (TagKind::Macro, r"^macro\s+([a-zA-Z_]\w*)\s*\(([\s\S]*)\)$"),
        (TagKind::EndMacro, r"^endmacro(?:\s+\w+)?$"),
        (TagKind::With, r"^with(?:\s+([\s\S]+?))?(\s+only)?$"),
        (TagKind::EndWith, r"^endwith$"),
        (TagKind::Spaceless, r"^spaceless$"),
        (TagKind::EndSpaceless, r"^endspaceless$"),
        (TagKind::Apply, r"^apply\s+([\s\S]+)$"),
        (TagKind::EndApply, r"^endapply$"),
        (TagKind::Filter, r"^filter\s+([\s\S]+)$"),
        (TagKind::EndFilter, r"^endfilter$"),
        (TagKind::Autoescape, r"^autoescape(?:\s+([\s\S]+))?$"),
        (TagKind::EndAutoescape, r"^endautoescape$"),
        (TagKind::Do, r"^do\s+([\s\S]+)$"),
        (TagKind::Deprecated, r"^deprecated\s+([\s\S]+)$"),
    ];
    table
        .iter()
        .map(|(kind, re)| (*kind, Regex::new(re).expect("valid tag pattern")))
        .collect()
});

static PARAM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([a-zA-Z_]\w*)\s*(?:=\s*([\s\S]+))?$").expect("valid macro parameter pattern")
});
static ALIAS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([a-zA-Z_][\w-]*)(?:\s+as\s+([a-zA-Z_][\w-]*))?$").expect("valid alias pattern")
});

/// Recognize the trimmed body of a `{% ... %}` tag.
pub(crate) fn parse(text: &str) -> Result<LogicToken> {
    for (kind, re) in TAGS.iter() {
        if let Some(caps) = re.captures(text) {
            let tag = build(*kind, &caps, text)?;
            tracing::trace!(tag = kind.name(), "logic token");
            return Ok(LogicToken { kind: *kind, tag });
        }
    }
    Err(malformed(text))
}

fn malformed(text: &str) -> Error {
    Error::new(ErrorKind::MalformedTag(text.to_string()))
}

fn group<'t>(caps: &Captures<'t>, i: usize) -> Option<&'t str> {
    caps.get(i).map(|m| m.as_str().trim())
}

fn expression(caps: &Captures<'_>, i: usize) -> Result<Expr> {
    expr::compile(group(caps, i).unwrap_or_default())
}

fn optional_expression(caps: &Captures<'_>, i: usize) -> Result<Option<Expr>> {
    group(caps, i).map(expr::compile).transpose()
}

fn build(kind: TagKind, caps: &Captures<'_>, text: &str) -> Result<Option<Tag>> {
    let tag = match kind {
        TagKind::If => Tag::If {
            condition: expression(caps, 1)?,
        },
        TagKind::ElseIf => Tag::ElseIf {
            condition: expression(caps, 1)?,
        },
        TagKind::Else => Tag::Else,
        TagKind::For => {
            let vars: Vec<&str> = group(caps, 1)
                .unwrap_or_default()
                .split(',')
                .map(str::trim)
                .collect();
            let (key, value) = match vars.as_slice() {
                [value] if !value.is_empty() => (None, value.to_string()),
                [key, value] if !key.is_empty() && !value.is_empty() => {
                    (Some(key.to_string()), value.to_string())
                }
                _ => return Err(malformed(text)),
            };
            Tag::For {
                key,
                value,
                expression: expression(caps, 2)?,
                condition: optional_expression(caps, 3)?,
            }
        }
        TagKind::Set => Tag::Set {
            key: caps[1].to_string(),
            expression: expression(caps, 2)?,
        },
        TagKind::SetCapture => Tag::SetCapture {
            key: caps[1].to_string(),
        },
        TagKind::Block => Tag::Block {
            name: caps[1].to_string(),
            expression: optional_expression(caps, 2)?,
        },
        TagKind::Extends => Tag::Extends {
            expression: expression(caps, 1)?,
        },
        TagKind::Use => {
            let renames = match group(caps, 2) {
                Some(list) => split_top_level(list)
                    .into_iter()
                    .map(|item| match ALIAS_RE.captures(item) {
                        Some(c) => match c.get(2) {
                            Some(alias) => Ok((c[1].to_string(), alias.as_str().to_string())),
                            None => Err(malformed(text)),
                        },
                        None => Err(malformed(text)),
                    })
                    .collect::<Result<Vec<_>>>()?,
                None => Vec::new(),
            };
            Tag::Use {
                expression: expression(caps, 1)?,
                renames,
            }
        }
        TagKind::Include => Tag::Include(include_args(caps)?),
        TagKind::Embed => Tag::Embed(include_args(caps)?),
        TagKind::Import => Tag::Import {
            expression: expression(caps, 1)?,
            alias: caps[2].to_string(),
        },
        TagKind::From => {
            let imports = split_top_level(group(caps, 2).unwrap_or_default())
                .into_iter()
                .map(|item| -> Result<(String, String)> {
                    let c = ALIAS_RE.captures(item).ok_or_else(|| malformed(text))?;
                    let name = c[1].to_string();
                    let alias = c.get(2).map_or_else(|| name.clone(), |m| m.as_str().to_string());
                    Ok((name, alias))
                })
                .collect::<Result<Vec<_>>>()?;
            Tag::From {
                expression: expression(caps, 1)?,
                imports,
            }
        }
        TagKind::Macro => {
            let params = split_top_level(group(caps, 2).unwrap_or_default())
                .into_iter()
                .map(|item| -> Result<MacroParam> {
                    let c = PARAM_RE.captures(item).ok_or_else(|| malformed(text))?;
                    Ok(MacroParam {
                        name: c[1].to_string(),
                        default: optional_expression(&c, 2)?,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            Tag::Macro {
                name: caps[1].to_string(),
                params,
            }
        }
        TagKind::With => {
            let (expression, only) = match (group(caps, 1), caps.get(2).is_some()) {
                (Some("only"), false) => (None, true),
                (Some(expr), only) => (Some(expr::compile(expr)?), only),
                (None, only) => (None, only),
            };
            Tag::With { expression, only }
        }
        TagKind::Spaceless => Tag::Spaceless,
        TagKind::Apply | TagKind::Filter => {
            let filters = group(caps, 1).unwrap_or_default();
            let filters = if filters.starts_with('|') {
                filters.to_string()
            } else {
                format!("|{}", filters)
            };
            Tag::Apply {
                filters: expr::compile(&filters)?,
            }
        }
        TagKind::Autoescape => Tag::Autoescape {
            strategy: autoescape_strategy(group(caps, 1)).ok_or_else(|| malformed(text))?,
        },
        TagKind::Do => Tag::Do {
            expression: expression(caps, 1)?,
        },
        TagKind::Deprecated => Tag::Deprecated {
            message: expression(caps, 1)?,
        },
        TagKind::EndIf
        | TagKind::EndFor
        | TagKind::EndSet
        | TagKind::EndBlock
        | TagKind::EndEmbed
        | TagKind::EndMacro
        | TagKind::EndWith
        | TagKind::EndSpaceless
        | TagKind::EndApply
        | TagKind::EndFilter
        | TagKind::EndAutoescape => return Ok(None),
    };
    Ok(Some(tag))
}

fn include_args(caps: &Captures<'_>) -> Result<IncludeArgs> {
    Ok(IncludeArgs {
        expression: expression(caps, 1)?,
        ignore_missing: caps.get(2).is_some(),
        with: optional_expression(caps, 3)?,
        only: caps.get(4).is_some(),
    })
}

fn autoescape_strategy(arg: Option<&str>) -> Option<Autoescape> {
    let Some(arg) = arg else {
        return Some(Autoescape::On(EscapeStrategy::Html));
    };
    match arg {
        "true" => Some(Autoescape::On(EscapeStrategy::Html)),
        "false" => Some(Autoescape::Off),
        quoted => {
            let name = quoted
                .strip_prefix(|c: char| c == '"' || c == '\'')?
                .strip_suffix(|c: char| c == '"' || c == '\'')?;
            EscapeStrategy::from_name(name).map(Autoescape::On)
        }
    }
}

/// Split on commas that are not nested in brackets or strings.
fn split_top_level(text: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut start = 0;
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
            ')' | ']' | '}' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(text[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    let last = text[start..].trim();
    if !last.is_empty() || !parts.is_empty() {
        parts.push(last);
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::ExprToken;

    fn var(name: &str) -> ExprToken {
        ExprToken::Variable { name: name.into() }
    }

    #[test]
    fn for_with_key_and_guard() {
        let token = parse("for k, v in items if v").unwrap();
        assert_eq!(token.kind, TagKind::For);
        assert_eq!(
            token.tag,
            Some(Tag::For {
                key: Some("k".into()),
                value: "v".into(),
                expression: vec![var("items")],
                condition: Some(vec![var("v")]),
            })
        );
    }

    #[test]
    fn set_forms() {
        assert_eq!(parse("set x = y").unwrap().kind, TagKind::Set);
        assert_eq!(parse("set x").unwrap().kind, TagKind::SetCapture);
        assert_eq!(parse("endset").unwrap().tag, None);
    }

    #[test]
    fn block_shorthand_needs_no_end() {
        let full = parse("block title").unwrap();
        assert_eq!(full.next(), &[TagKind::EndBlock]);
        let short = parse("block title page.title").unwrap();
        assert!(short.next().is_empty());
    }

    #[test]
    fn include_modifiers() {
        let token = parse("include 'a.twig' ignore missing with {x: 1} only").unwrap();
        let Some(Tag::Include(args)) = token.tag else {
            panic!("expected include");
        };
        assert!(args.ignore_missing);
        assert!(args.only);
        assert!(args.with.is_some());
        assert_eq!(
            args.expression,
            vec![ExprToken::String {
                value: "a.twig".into()
            }]
        );
    }

    #[test]
    fn macro_params_with_defaults() {
        let token = parse("macro input(name, value = '', attrs = {a: 1, b: 2})").unwrap();
        let Some(Tag::Macro { name, params }) = token.tag else {
            panic!("expected macro");
        };
        assert_eq!(name, "input");
        let names: Vec<_> = params.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["name", "value", "attrs"]);
        assert!(params[0].default.is_none());
        assert!(params[2].default.is_some());
    }

    #[test]
    fn from_import_aliases() {
        let token = parse("from 'forms.twig' import input, label as lbl").unwrap();
        let Some(Tag::From { imports, .. }) = token.tag else {
            panic!("expected from");
        };
        assert_eq!(
            imports,
            vec![
                ("input".to_string(), "input".to_string()),
                ("label".to_string(), "lbl".to_string()),
            ]
        );
    }

    #[test]
    fn autoescape_arguments() {
        let token = parse("autoescape 'js'").unwrap();
        assert_eq!(
            token.tag,
            Some(Tag::Autoescape {
                strategy: Autoescape::On(EscapeStrategy::Js)
            })
        );
        assert_eq!(
            parse("autoescape false").unwrap().tag,
            Some(Tag::Autoescape {
                strategy: Autoescape::Off
            })
        );
        assert!(parse("autoescape 'xml'").is_err());
    }

    #[test]
    fn terminators_are_not_open() {
        assert!(!TagKind::EndIf.is_open());
        assert!(!TagKind::Else.is_open());
        assert!(TagKind::If.is_open());
        assert!(TagKind::Extends.is_open());
    }

    #[test]
    fn unknown_tag_is_malformed() {
        let err = parse("frobnicate x").unwrap_err();
        assert_eq!(err.to_string(), "Unable to parse logic tag 'frobnicate x'");
    }
}
