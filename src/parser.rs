//! Turns the token stream into a tree of nodes.
//!
//! Tags that expect a terminator are kept on a stack. Content is appended
//! to the innermost open tag; a terminator pops its tag and emits the
//! finished node one level up.

use crate::ast::Node;
use crate::error::{Error, ErrorKind, Result};
use crate::expr;
use crate::lexer::{Token, TokenKind};
use crate::logic::{self, TagKind};

struct Frame {
    kind: TagKind,
    tag: crate::ast::Tag,
    next: &'static [TagKind],
    body: Vec<Node>,
}

pub struct Parser {
    output: Vec<Node>,
    stack: Vec<Frame>,
    trim_next: bool,
}

impl Parser {
    pub fn new() -> Self {
        Self {
            output: Vec::new(),
            stack: Vec::new(),
            trim_next: false,
        }
    }

    /// Where new nodes go: the innermost open tag, else the top level.
    fn target(&mut self) -> &mut Vec<Node> {
        match self.stack.last_mut() {
            Some(frame) => &mut frame.body,
            None => &mut self.output,
        }
    }

    fn emit(&mut self, node: Node) {
        self.target().push(node);
    }

    /// `{{-` and `{%-` strip the end of the text right before them.
    fn trim_previous(&mut self) {
        if let Some(Node::Raw { value }) = self.target().last_mut() {
            let trimmed = value.trim_end().len();
            value.truncate(trimmed);
        }
    }

    pub fn parse(mut self, tokens: Vec<Token>) -> Result<Vec<Node>> {
        for token in tokens {
            let trim_start = std::mem::take(&mut self.trim_next);
            if token.kind.trims_before() {
                self.trim_previous();
            }
            if token.kind.trims_after() {
                self.trim_next = true;
            }

            match token.kind {
                TokenKind::Raw => {
                    let value = if trim_start {
                        token.value.trim_start().to_string()
                    } else {
                        token.value
                    };
                    if !value.is_empty() {
                        self.emit(Node::Raw { value });
                    }
                }
                TokenKind::Comment => {}
                kind if kind.is_output() => {
                    let expression = expr::compile(&token.value)?;
                    self.emit(Node::Output { expression });
                }
                _ => self.logic(&token.value)?,
            }
        }

        if let Some(frame) = self.stack.last() {
            let expected: Vec<&str> = frame.next.iter().map(|k| k.name()).collect();
            return Err(Error::new(ErrorKind::UnterminatedTag {
                tag: frame.kind.name().to_string(),
                expected: expected.join(", "),
            }));
        }
        Ok(self.output)
    }

    fn logic(&mut self, text: &str) -> Result<()> {
        let token = logic::parse(text)?;
        let mut next = token.next();

        if !token.kind.is_open() {
            let Some(frame) = self.stack.pop() else {
                return Err(Error::new(ErrorKind::UnexpectedTag {
                    tag: token.kind.name().to_string(),
                    previous: "template start".to_string(),
                }));
            };
            if !frame.next.contains(&token.kind) {
                return Err(Error::new(ErrorKind::UnexpectedTag {
                    tag: token.kind.name().to_string(),
                    previous: frame.kind.name().to_string(),
                }));
            }
            if token.kind == TagKind::Else {
                next = if frame.kind == TagKind::For {
                    &[TagKind::EndFor]
                } else {
                    &[TagKind::EndIf]
                };
            }
            self.emit(Node::Logic {
                tag: frame.tag,
                body: frame.body,
            });
        }

        let Some(tag) = token.tag else {
            // A plain terminator.
            return Ok(());
        };
        if next.is_empty() {
            self.emit(Node::Logic {
                tag,
                body: Vec::new(),
            });
        } else {
            self.stack.push(Frame {
                kind: token.kind,
                tag,
                next,
                body: Vec::new(),
            });
        }
        Ok(())
    }
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

/// Compile a token stream into the node tree.
pub fn compile(tokens: Vec<Token>) -> Result<Vec<Node>> {
    Parser::new().parse(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{ExprToken, Tag};
    use crate::lexer::tokenize;

    fn tree(source: &str) -> Vec<Node> {
        compile(tokenize(source).unwrap()).unwrap()
    }

    fn raw(value: &str) -> Node {
        Node::Raw {
            value: value.into(),
        }
    }

    fn out(name: &str) -> Node {
        Node::Output {
            expression: vec![ExprToken::Variable { name: name.into() }],
        }
    }

    #[test]
    fn text_and_output() {
        assert_eq!(tree("Hi {{ name }}!"), vec![raw("Hi "), out("name"), raw("!")]);
    }

    #[test]
    fn if_else_become_siblings() {
        let nodes = tree("{% if a %}x{% else %}y{% endif %}");
        assert_eq!(nodes.len(), 2);
        assert!(matches!(&nodes[0], Node::Logic { tag: Tag::If { .. }, body } if body == &vec![raw("x")]));
        assert!(matches!(&nodes[1], Node::Logic { tag: Tag::Else, body } if body == &vec![raw("y")]));
    }

    #[test]
    fn nested_tags_land_in_their_parent() {
        let nodes = tree("{% for i in xs %}{% if i %}{{ i }}{% endif %}{% endfor %}");
        let [Node::Logic { tag: Tag::For { .. }, body }] = nodes.as_slice() else {
            panic!("expected a single for node");
        };
        let [Node::Logic { tag: Tag::If { .. }, body: inner }] = body.as_slice() else {
            panic!("expected if inside for");
        };
        assert_eq!(inner, &vec![out("i")]);
    }

    #[test]
    fn whitespace_control_trims_neighbours() {
        assert_eq!(
            tree("a  {{- x -}}  b"),
            vec![raw("a"), out("x"), raw("b")]
        );
        assert_eq!(
            tree("{% if a -%}\n  x  {%- endif %}"),
            tree("{% if a %}x{% endif %}")
        );
    }

    #[test]
    fn comments_vanish() {
        assert_eq!(tree("a{# hidden #}b"), vec![raw("a"), raw("b")]);
    }

    #[test]
    fn unclosed_tag_names_expected_terminators() {
        let err = compile(tokenize("{% if a %}x").unwrap()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Unable to find an end tag for if, expecting one of elseif, else, endif"
        );
    }

    #[test]
    fn mismatched_terminator() {
        let err = compile(tokenize("{% for x in y %}{% endif %}").unwrap()).unwrap_err();
        assert_eq!(err.to_string(), "endif not expected after a for");
    }

    #[test]
    fn else_after_for_only_accepts_endfor() {
        let err = compile(tokenize("{% for x in y %}{% else %}{% endif %}").unwrap()).unwrap_err();
        assert_eq!(err.to_string(), "endif not expected after a else");
    }

    #[test]
    fn shorthand_block_is_standalone() {
        let nodes = tree("{% block title 'Home' %}");
        assert!(matches!(
            &nodes[0],
            Node::Logic { tag: Tag::Block { expression: Some(_), .. }, body } if body.is_empty()
        ));
    }
}
