//! Formula tokenizer and tree builder.
//!
//! Formula text is split on a fixed delimiter set, nested by parentheses,
//! and folded twice: named function calls first, then infix operators by
//! descending precedence tier. Within a tier operators combine left to
//! right, so a run of same-tier operators folds into a left-nested chain.

use arbor_model::{Expr, Formula, FuncName, RefToken};

use crate::error::{ParseError, Span};

/// Upper bound on formula text length, counted in characters.
const MAX_FORMULA_CHARS: usize = 8_192;
/// Upper bound on parenthesis nesting depth.
const MAX_NESTING_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    LParen,
    RParen,
    Comma,
    Op(FuncName),
    Term(String),
}

#[derive(Debug, Clone, PartialEq)]
struct Token {
    kind: TokenKind,
    span: Span,
}

/// Parse formula text into a raw expression tree.
///
/// Pure function of the input text; relative names are left unresolved
/// (see the resolver). Unbalanced parentheses, operators missing an
/// operand, and empty input are rejected.
pub fn parse(text: &str) -> Result<Formula, ParseError> {
    let char_len = text.chars().count();
    if char_len > MAX_FORMULA_CHARS {
        return Err(ParseError::new(
            format!("formula exceeds the {MAX_FORMULA_CHARS}-character limit (got {char_len})"),
            Span::new(0, text.len()),
        ));
    }
    if text.trim().is_empty() {
        return Err(ParseError::new(
            "formula text is empty",
            Span::new(0, text.len()),
        ));
    }

    let tokens = lex(text);
    let mut cursor = Cursor {
        tokens: &tokens,
        pos: 0,
    };
    let raw = cursor.parse_list(None, 0)?;
    debug_assert_eq!(cursor.pos, tokens.len());
    Ok(Formula::new(fold(raw)?))
}

/// Split the input on the delimiter set, two-character operators first.
/// Everything between delimiters is a whitespace-trimmed term; empty terms
/// are dropped.
fn lex(text: &str) -> Vec<Token> {
    let bytes = text.as_bytes();
    let mut tokens = Vec::new();
    let mut term_start = 0usize;
    let mut i = 0usize;

    while i < bytes.len() {
        let two_char_op = match (bytes[i], bytes.get(i + 1)) {
            (b'>', Some(b'=')) => Some(FuncName::Ge),
            (b'<', Some(b'=')) => Some(FuncName::Le),
            (b'!', Some(b'=')) => Some(FuncName::Ne),
            (b'&', Some(b'&')) => Some(FuncName::AndOp),
            (b'|', Some(b'|')) => Some(FuncName::OrOp),
            _ => None,
        };
        if let Some(op) = two_char_op {
            flush_term(text, term_start, i, &mut tokens);
            tokens.push(Token {
                kind: TokenKind::Op(op),
                span: Span::new(i, i + 2),
            });
            i += 2;
            term_start = i;
            continue;
        }

        let one_char = match bytes[i] {
            b'(' => Some(TokenKind::LParen),
            b')' => Some(TokenKind::RParen),
            b',' => Some(TokenKind::Comma),
            b'+' => Some(TokenKind::Op(FuncName::Add)),
            b'-' => Some(TokenKind::Op(FuncName::Subtract)),
            b'*' => Some(TokenKind::Op(FuncName::Multiply)),
            b'/' => Some(TokenKind::Op(FuncName::Divide)),
            b'>' => Some(TokenKind::Op(FuncName::Gt)),
            b'<' => Some(TokenKind::Op(FuncName::Lt)),
            b'=' => Some(TokenKind::Op(FuncName::Eq)),
            _ => None,
        };
        if let Some(kind) = one_char {
            flush_term(text, term_start, i, &mut tokens);
            tokens.push(Token {
                kind,
                span: Span::new(i, i + 1),
            });
            i += 1;
            term_start = i;
            continue;
        }

        i += 1;
    }
    flush_term(text, term_start, bytes.len(), &mut tokens);
    tokens
}

fn flush_term(text: &str, start: usize, end: usize, tokens: &mut Vec<Token>) {
    let raw = &text[start..end];
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return;
    }
    let lead = raw.len() - raw.trim_start().len();
    let span = Span::new(start + lead, start + lead + trimmed.len());
    tokens.push(Token {
        kind: TokenKind::Term(trimmed.to_string()),
        span,
    });
}

#[derive(Debug)]
enum RawNode {
    Term(String, Span),
    Op(FuncName, Span),
    Group(Vec<RawNode>),
}

/// Explicit token cursor; each nesting level consumes tokens until its
/// closing parenthesis (or end of input at the top level).
struct Cursor<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl Cursor<'_> {
    fn parse_list(&mut self, opened_at: Option<Span>, depth: usize) -> Result<Vec<RawNode>, ParseError> {
        if depth > MAX_NESTING_DEPTH {
            return Err(ParseError::new(
                format!("formula exceeds the nesting depth limit of {MAX_NESTING_DEPTH}"),
                opened_at.unwrap_or(Span::new(0, 0)),
            ));
        }

        let mut out = Vec::new();
        while let Some(token) = self.tokens.get(self.pos) {
            match &token.kind {
                TokenKind::LParen => {
                    let open = token.span;
                    self.pos += 1;
                    out.push(RawNode::Group(self.parse_list(Some(open), depth + 1)?));
                }
                TokenKind::RParen => {
                    if opened_at.is_none() {
                        return Err(ParseError::new("unmatched `)`", token.span));
                    }
                    self.pos += 1;
                    return Ok(out);
                }
                TokenKind::Comma => {
                    self.pos += 1;
                }
                TokenKind::Op(op) => {
                    out.push(RawNode::Op(*op, token.span));
                    self.pos += 1;
                }
                TokenKind::Term(term) => {
                    out.push(RawNode::Term(term.clone(), token.span));
                    self.pos += 1;
                }
            }
        }

        if let Some(open) = opened_at {
            return Err(ParseError::new("unclosed `(`", open));
        }
        Ok(out)
    }
}

enum Part {
    Expr(Expr),
    Op(FuncName, Span),
}

/// Precedence tiers, folded in order. Within a tier, operators combine left
/// to right.
const TIERS: [&[FuncName]; 3] = [
    &[FuncName::Multiply, FuncName::Divide],
    &[FuncName::Add, FuncName::Subtract],
    &[
        FuncName::Gt,
        FuncName::Lt,
        FuncName::Ge,
        FuncName::Le,
        FuncName::Eq,
        FuncName::Ne,
        FuncName::AndOp,
        FuncName::OrOp,
    ],
];

fn fold(nodes: Vec<RawNode>) -> Result<Vec<Expr>, ParseError> {
    // Function folding: a known function word immediately followed by a
    // parenthesized group becomes a call node consuming both.
    let mut parts: Vec<Part> = Vec::new();
    let mut iter = nodes.into_iter().peekable();
    while let Some(node) = iter.next() {
        match node {
            RawNode::Term(term, _span) => {
                if let Some(func) = FuncName::function_from_name(&term) {
                    if matches!(iter.peek(), Some(RawNode::Group(_))) {
                        let Some(RawNode::Group(args)) = iter.next() else {
                            unreachable!("peeked a group");
                        };
                        parts.push(Part::Expr(Expr::Call(func, fold(args)?)));
                        continue;
                    }
                }
                parts.push(Part::Expr(classify_term(term)));
            }
            RawNode::Op(op, span) => parts.push(Part::Op(op, span)),
            RawNode::Group(items) => parts.push(Part::Expr(Expr::Group(fold(items)?))),
        }
    }

    // Operator folding by tier.
    for tier in TIERS {
        let mut i = 0;
        while i < parts.len() {
            let (op, span) = match &parts[i] {
                Part::Op(op, span) if tier.contains(op) => (*op, *span),
                _ => {
                    i += 1;
                    continue;
                }
            };
            if i == 0 || !matches!(parts[i - 1], Part::Expr(_)) {
                return Err(ParseError::new(
                    format!("operator `{op}` is missing its left operand"),
                    span,
                ));
            }
            if i + 1 >= parts.len() || !matches!(parts[i + 1], Part::Expr(_)) {
                return Err(ParseError::new(
                    format!("operator `{op}` is missing its right operand"),
                    span,
                ));
            }
            let Part::Expr(right) = parts.remove(i + 1) else {
                unreachable!("checked above");
            };
            parts.remove(i);
            let Part::Expr(left) = parts.remove(i - 1) else {
                unreachable!("checked above");
            };
            parts.insert(i - 1, Part::Expr(Expr::Call(op, vec![left, right])));
            // The merged node sits at i - 1; the next candidate is at i.
        }
    }

    parts
        .into_iter()
        .map(|part| match part {
            Part::Expr(expr) => Ok(expr),
            Part::Op(op, span) => Err(ParseError::new(
                format!("operator `{op}` is missing its operands"),
                span,
            )),
        })
        .collect()
}

fn classify_term(term: String) -> Expr {
    if let Some(token) = RefToken::parse(&term) {
        return Expr::Ref(token);
    }
    if term.starts_with('.') {
        return Expr::Name(term);
    }
    Expr::Literal(term)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn to_json(formula: &Formula) -> serde_json::Value {
        serde_json::to_value(formula).unwrap()
    }

    #[test]
    fn precedence_multiplication_before_addition() {
        let formula = parse("2 * 3 + 4").unwrap();
        assert_eq!(to_json(&formula), json!([{"+": [{"*": ["2", "3"]}, "4"]}]));
    }

    #[test]
    fn same_tier_operators_fold_left_nested() {
        let formula = parse("A * B * C").unwrap();
        assert_eq!(
            to_json(&formula),
            json!([{"*": [{"*": ["A", "B"]}, "C"]}])
        );
    }

    #[test]
    fn mixed_tiers_and_comparison() {
        let formula = parse("A * B + C * D").unwrap();
        assert_eq!(
            to_json(&formula),
            json!([{"+": [{"*": ["A", "B"]}, {"*": ["C", "D"]}]}])
        );
    }

    #[test]
    fn function_calls_fold_with_their_argument_list() {
        let formula = parse("IF(A >= 0.5, B, C * SUM(D, E))").unwrap();
        assert_eq!(
            to_json(&formula),
            json!([{"IF": [{">=" : ["A", "0.5"]}, "B", {"*": ["C", {"SUM": ["D", "E"]}]}]}])
        );
    }

    #[test]
    fn operators_fold_inside_argument_lists() {
        let formula = parse("SUM(1 + 2, 3)").unwrap();
        assert_eq!(to_json(&formula), json!([{"SUM": [{"+": ["1", "2"]}, "3"]}]));
    }

    #[test]
    fn parenthesized_groups_fold_recursively() {
        let formula = parse("(A + B) * C").unwrap();
        assert_eq!(
            to_json(&formula),
            json!([{"*": [[{"+": ["A", "B"]}], "C"]}])
        );
    }

    #[test]
    fn singleton_formula_is_identity() {
        let formula = parse("A").unwrap();
        assert_eq!(to_json(&formula), json!(["A"]));
    }

    #[test]
    fn relative_names_stay_unresolved() {
        let formula = parse(".base_cost * 2").unwrap();
        assert_eq!(
            formula.items(),
            &[Expr::Call(
                FuncName::Multiply,
                vec![Expr::Name(".base_cost".into()), Expr::Literal("2".into())]
            )]
        );
    }

    #[test]
    fn logical_operators_share_the_comparison_tier() {
        let formula = parse("A > 1 && B < 2").unwrap();
        assert_eq!(
            to_json(&formula),
            json!([{"&&": [{">": ["A", "1"]}, {"<": ["B", "2"]}]}])
        );
    }

    #[test]
    fn unbalanced_parens_are_rejected() {
        let err = parse("SUM(1, 2").unwrap_err();
        assert!(err.message.contains("unclosed"), "{err}");
        let err = parse("1 + 2)").unwrap_err();
        assert!(err.message.contains("unmatched"), "{err}");
    }

    #[test]
    fn dangling_operators_are_rejected() {
        assert!(parse("* 2").unwrap_err().message.contains("left operand"));
        assert!(parse("2 *").unwrap_err().message.contains("right operand"));
        assert!(parse("2 * * 3")
            .unwrap_err()
            .message
            .contains("right operand"));
    }

    #[test]
    fn empty_input_is_rejected() {
        assert!(parse("").is_err());
        assert!(parse("   ").is_err());
    }

    #[test]
    fn function_word_without_arguments_stays_a_literal() {
        let formula = parse("SUM").unwrap();
        assert_eq!(formula.items(), &[Expr::Literal("SUM".into())]);
    }

    #[test]
    fn uuid_terms_become_reference_tokens() {
        let formula = parse("SUM(_9461d5db-72ba-4b72-bbb5-02113deaa637)").unwrap();
        assert_eq!(
            to_json(&formula),
            json!([{"SUM": ["_9461d5db-72ba-4b72-bbb5-02113deaa637"]}])
        );
    }
}
