//! Template parsing.
//!
//! Expressions are parsed with a Pratt (precedence-climbing) parser over the
//! expression token stream. `and`/`or` are right-associative, which falls
//! out of handing the right-hand parse a precedence one below the operator's
//! own; `contains` binds tighter than the comparison operators.
//!
//! Tags are parsed by per-tag functions keyed off the tag name. Block tags
//! parse their bodies until one of their terminator tags and report a
//! precise error when a mismatched `end` tag or the end of the template
//! shows up first. In warn/lax mode, a failed top-level statement is skipped
//! and parsing resumes at the next one.

use crate::ast::{BindClause, Block, ConditionalBranch, Node, ParseTree, WhenClause};
use crate::error::{Error, Mode, Result};
use crate::expression::{
    AssignmentExpression, Expression, FilterCallExpr, FilteredExpression, IdentifierPath,
    InfixOp, LoopExpression, LoopSource, PathElement, PrefixOp,
};
use crate::lex::{TemplateElement, Token, TokenKind, TokenStream, tokenize_expression, tokenize_template};

/// Operator precedence levels.
mod precedence {
    pub const LOWEST: u8 = 1;
    pub const LOGICAL: u8 = 50;
    pub const RELATIONAL: u8 = 60;
    pub const MEMBERSHIP: u8 = 70;
    pub const PREFIX: u8 = 80;
}

fn infix_op(kind: TokenKind) -> Option<InfixOp> {
    Some(match kind {
        TokenKind::Eq => InfixOp::Eq,
        TokenKind::Ne => InfixOp::Ne,
        TokenKind::Lt => InfixOp::Lt,
        TokenKind::Gt => InfixOp::Gt,
        TokenKind::Le => InfixOp::Le,
        TokenKind::Ge => InfixOp::Ge,
        TokenKind::Contains => InfixOp::Contains,
        TokenKind::And => InfixOp::And,
        TokenKind::Or => InfixOp::Or,
        _ => return None,
    })
}

/// Precedence of the token following the cursor.
///
/// Identifiers map to the lowest precedence so a trailing identifier ends
/// the expression; any other non-operator token is an unknown operator.
fn peek_precedence(stream: &TokenStream) -> Result<u8> {
    let token = stream.peek();
    match token.kind {
        TokenKind::And | TokenKind::Or => Ok(precedence::LOGICAL),
        TokenKind::Eq
        | TokenKind::Ne
        | TokenKind::Lt
        | TokenKind::Gt
        | TokenKind::Le
        | TokenKind::Ge => Ok(precedence::RELATIONAL),
        TokenKind::Contains => Ok(precedence::MEMBERSHIP),
        TokenKind::Identifier => Ok(precedence::LOWEST),
        _ => Err(Error::syntax(
            format!("unknown operator '{}'", token.text),
            token.line,
        )),
    }
}

/// Precedence handed to the right-hand side of an infix parse.
///
/// Dropping `and`/`or` one level makes them right-associative.
fn right_hand_precedence(kind: TokenKind) -> u8 {
    match kind {
        TokenKind::And | TokenKind::Or => precedence::LOGICAL - 1,
        TokenKind::Contains => precedence::MEMBERSHIP,
        _ => precedence::RELATIONAL,
    }
}

/// Parses an expression, leaving the cursor on its last token.
pub fn parse_expression(stream: &mut TokenStream, min_precedence: u8) -> Result<Expression> {
    let mut left = parse_primary(stream)?;

    while !matches!(
        stream.peek().kind,
        TokenKind::Eof | TokenKind::Pipe | TokenKind::Comma
    ) && min_precedence < peek_precedence(stream)?
    {
        let Some(op) = infix_op(stream.peek().kind) else {
            return Ok(left);
        };
        let rhs_precedence = right_hand_precedence(stream.peek().kind);
        stream.next_token();
        stream.next_token();
        let right = parse_expression(stream, rhs_precedence)?;
        left = Expression::Infix {
            left: Box::new(left),
            op,
            right: Box::new(right),
        };
    }

    Ok(left)
}

fn parse_primary(stream: &mut TokenStream) -> Result<Expression> {
    let token = stream.current().clone();
    match token.kind {
        TokenKind::True => Ok(Expression::Bool(true)),
        TokenKind::False => Ok(Expression::Bool(false)),
        TokenKind::Nil => Ok(Expression::Nil),
        TokenKind::Empty => Ok(Expression::Empty),
        TokenKind::String => Ok(Expression::Str(token.text)),
        TokenKind::Integer => Ok(Expression::Int(parse_int(&token)?)),
        TokenKind::Float => token
            .text
            .parse()
            .map(Expression::Float)
            .map_err(|_| Error::syntax(format!("invalid float '{}'", token.text), token.line)),
        TokenKind::Identifier => Ok(Expression::Identifier(parse_identifier(stream)?)),
        TokenKind::Minus => {
            stream.next_token();
            let right = parse_expression(stream, precedence::PREFIX)?;
            Ok(Expression::Prefix {
                op: PrefixOp::Minus,
                right: Box::new(right),
            })
        }
        TokenKind::LParen => {
            stream.next_token();
            let start = parse_range_argument(stream)?;
            stream.expect_peek(TokenKind::DotDot)?;
            stream.next_token();
            stream.next_token();
            let stop = parse_range_argument(stream)?;
            stream.expect_peek(TokenKind::RParen)?;
            stream.next_token();
            Ok(Expression::Range {
                start: Box::new(start),
                stop: Box::new(stop),
            })
        }
        TokenKind::Eof => Err(Error::syntax("missing expression", token.line)),
        _ => Err(Error::syntax(
            format!("unknown prefix operator '{}'", token.text),
            token.line,
        )),
    }
}

fn parse_int(token: &Token) -> Result<i64> {
    token
        .text
        .parse()
        .map_err(|_| Error::syntax(format!("invalid integer '{}'", token.text), token.line))
}

/// Parses an identifier path: `.` and `[…]` chaining, with bracketed
/// subscripts holding a string, an integer or a nested identifier.
pub fn parse_identifier(stream: &mut TokenStream) -> Result<IdentifierPath> {
    let first = stream.expect(TokenKind::Identifier)?.clone();
    let mut path = vec![PathElement::Name(first.text)];

    loop {
        match stream.peek().kind {
            TokenKind::Dot => {
                stream.next_token();
                stream.next_token();
                let token = stream.current().clone();
                match token.kind {
                    TokenKind::Identifier => path.push(PathElement::Name(token.text)),
                    TokenKind::Integer => path.push(PathElement::Index(parse_int(&token)?)),
                    _ => {
                        return Err(Error::syntax(
                            format!("invalid identifier, found '{}'", token.text),
                            token.line,
                        ));
                    }
                }
            }
            TokenKind::LBracket => {
                stream.next_token();
                stream.next_token();
                let token = stream.current().clone();
                match token.kind {
                    TokenKind::String => path.push(PathElement::Name(token.text)),
                    TokenKind::Integer => path.push(PathElement::Index(parse_int(&token)?)),
                    TokenKind::Identifier => {
                        path.push(PathElement::Nested(parse_identifier(stream)?));
                    }
                    _ => {
                        return Err(Error::syntax(
                            format!("invalid identifier, found '{}'", token.text),
                            token.line,
                        ));
                    }
                }
                stream.expect_peek(TokenKind::RBracket)?;
                stream.next_token();
            }
            _ => break,
        }
    }

    Ok(IdentifierPath(path))
}

/// Parses a range bound: an integer literal or an identifier.
fn parse_range_argument(stream: &mut TokenStream) -> Result<Expression> {
    let token = stream.current().clone();
    match token.kind {
        TokenKind::Integer => Ok(Expression::Int(parse_int(&token)?)),
        TokenKind::Identifier => Ok(Expression::Identifier(parse_identifier(stream)?)),
        _ => Err(Error::syntax(
            format!("invalid range expression, found '{}'", token.text),
            token.line,
        )),
    }
}

/// Parses one primary expression followed by zero or more filters.
pub fn parse_filtered_expression(stream: &mut TokenStream) -> Result<FilteredExpression> {
    let expr = parse_expression(stream, precedence::LOWEST)?;
    let mut filters = Vec::new();
    while stream.peek().kind != TokenKind::Eof {
        stream.next_token();
        filters.push(parse_filter(stream)?);
    }
    Ok(FilteredExpression { expr, filters })
}

fn parse_filter(stream: &mut TokenStream) -> Result<FilterCallExpr> {
    stream.expect(TokenKind::Pipe)?;
    stream.next_token();
    let name = stream.expect(TokenKind::Identifier)?.text.clone();

    let mut args = Vec::new();
    let mut kwargs = Vec::new();
    if stream.peek().kind == TokenKind::Colon {
        stream.next_token();
        loop {
            stream.next_token();
            if stream.current().kind == TokenKind::Identifier
                && stream.peek().kind == TokenKind::Colon
            {
                let key = stream.current().text.clone();
                stream.next_token();
                stream.next_token();
                kwargs.push((key, parse_expression(stream, precedence::LOWEST)?));
            } else {
                args.push(parse_expression(stream, precedence::LOWEST)?);
            }
            if stream.peek().kind == TokenKind::Comma {
                stream.next_token();
            } else {
                break;
            }
        }
    }

    Ok(FilterCallExpr { name, args, kwargs })
}

/// Parses a boolean tag head (`if`, `unless`, `when` discriminant).
///
/// An empty tag head evaluates as nil, so `{% if %}` is falsy.
pub fn parse_boolean_expression(stream: &mut TokenStream) -> Result<Expression> {
    if stream.at_end() {
        return Ok(Expression::Nil);
    }
    let expr = parse_expression(stream, precedence::LOWEST)?;
    expect_end(stream)?;
    Ok(expr)
}

/// Parses `name = filtered-expression`. The name must be unchained.
pub fn parse_assignment_expression(stream: &mut TokenStream) -> Result<AssignmentExpression> {
    let name = stream.expect(TokenKind::Identifier)?.text.clone();
    stream.expect_peek(TokenKind::Assign)?;
    stream.next_token();
    stream.next_token();
    let value = parse_filtered_expression(stream)?;
    Ok(AssignmentExpression { name, value })
}

/// Parses `name in source` plus any of `limit:`, `offset:`, `cols:` and
/// `reversed`, in any order. A repeated modifier overwrites the earlier one.
pub fn parse_loop_expression(stream: &mut TokenStream) -> Result<LoopExpression> {
    let var = stream.expect(TokenKind::Identifier)?.text.clone();
    stream.expect_peek(TokenKind::In)?;
    stream.next_token();
    stream.next_token();

    let source = match stream.current().kind {
        TokenKind::Identifier => LoopSource::Identifier(parse_identifier(stream)?),
        TokenKind::LParen => {
            stream.next_token();
            let start = parse_range_argument(stream)?;
            stream.expect_peek(TokenKind::DotDot)?;
            stream.next_token();
            stream.next_token();
            let stop = parse_range_argument(stream)?;
            stream.expect_peek(TokenKind::RParen)?;
            stream.next_token();
            LoopSource::Range {
                start: Box::new(start),
                stop: Box::new(stop),
            }
        }
        _ => {
            return Err(Error::syntax(
                format!("invalid loop expression, found '{}'", stream.current().text),
                stream.line(),
            ));
        }
    };

    let mut expr = LoopExpression {
        var,
        source,
        limit: None,
        offset: None,
        cols: None,
        reversed: false,
    };

    loop {
        match stream.peek().kind {
            TokenKind::Reversed => {
                stream.next_token();
                expr.reversed = true;
            }
            kind @ (TokenKind::Limit | TokenKind::Offset | TokenKind::Cols) => {
                stream.next_token();
                stream.expect_peek(TokenKind::Colon)?;
                stream.next_token();
                stream.next_token();
                let arg = parse_range_argument(stream)?;
                match kind {
                    TokenKind::Limit => expr.limit = Some(arg),
                    TokenKind::Offset => expr.offset = Some(arg),
                    _ => expr.cols = Some(arg),
                }
            }
            _ => break,
        }
    }
    expect_end(stream)?;

    Ok(expr)
}

fn parse_string_or_identifier(stream: &mut TokenStream) -> Result<Expression> {
    let token = stream.current().clone();
    match token.kind {
        TokenKind::String => Ok(Expression::Str(token.text)),
        TokenKind::Identifier => Ok(Expression::Identifier(parse_identifier(stream)?)),
        _ => Err(Error::syntax(
            format!("expected a string or identifier, found '{}'", token.text),
            token.line,
        )),
    }
}

fn expect_end(stream: &TokenStream) -> Result<()> {
    let token = stream.peek();
    if token.kind == TokenKind::Eof {
        Ok(())
    } else {
        Err(Error::syntax(
            format!("unexpected '{}'", token.text),
            token.line,
        ))
    }
}

/// The head of a tag element: its name, unparsed expression and line.
#[derive(Debug, Clone)]
struct TagHead {
    name: String,
    expr: String,
    line: usize,
}

impl TagHead {
    fn tokens(&self) -> Result<TokenStream> {
        Ok(TokenStream::new(tokenize_expression(&self.expr, self.line)?))
    }
}

/// Parses template source into a tree, honoring the tolerance mode.
///
/// Returns the tree together with any warnings collected in warn mode.
pub fn parse(source: &str, mode: Mode) -> Result<(ParseTree, Vec<Error>)> {
    let elements = tokenize_template(source)?;
    Parser {
        elements,
        pos: 0,
        mode,
        warnings: Vec::new(),
    }
    .parse()
}

struct Parser {
    elements: Vec<TemplateElement>,
    pos: usize,
    mode: Mode,
    warnings: Vec<Error>,
}

impl Parser {
    fn parse(mut self) -> Result<(ParseTree, Vec<Error>)> {
        let mut tree = ParseTree::default();
        while self.pos < self.elements.len() {
            match self.parse_statement() {
                Ok(node) => tree.statements.push(node),
                Err(err) => {
                    if self.mode == Mode::Strict {
                        return Err(err);
                    }
                    if self.mode == Mode::Warn {
                        self.warnings.push(err);
                    }
                }
            }
        }
        Ok((tree, self.warnings))
    }

    fn parse_statement(&mut self) -> Result<Node> {
        let element = self.elements[self.pos].clone();
        self.pos += 1;
        match element {
            TemplateElement::Literal { text, .. } => Ok(Node::Literal { text }),
            TemplateElement::Output { expr, line } => parse_output(&expr, line),
            TemplateElement::Tag { name, expr, line } => {
                self.parse_tag(&TagHead { name, expr, line })
            }
        }
    }

    fn parse_tag(&mut self, head: &TagHead) -> Result<Node> {
        match head.name.as_str() {
            "assign" => {
                let mut stream = head.tokens()?;
                let expr = parse_assignment_expression(&mut stream)?;
                Ok(Node::Assign { expr, line: head.line })
            }
            "echo" => parse_output(&head.expr, head.line),
            "if" | "unless" => self.parse_conditional(head),
            "case" => self.parse_case(head),
            "for" => self.parse_for(head),
            "tablerow" => self.parse_tablerow(head),
            "capture" => self.parse_capture(head),
            "increment" => Ok(Node::Increment {
                name: single_name(head)?,
                line: head.line,
            }),
            "decrement" => Ok(Node::Decrement {
                name: single_name(head)?,
                line: head.line,
            }),
            "cycle" => parse_cycle(head),
            "break" => Ok(Node::Break { line: head.line }),
            "continue" => Ok(Node::Continue { line: head.line }),
            "include" => parse_include(head),
            "render" => parse_render(head),
            "elsif" | "else" | "when" => Err(Error::syntax(
                format!("unexpected tag '{}'", head.name),
                head.line,
            )),
            name if name.starts_with("end") => Err(Error::syntax(
                format!("unexpected tag '{name}'"),
                head.line,
            )),
            name => Err(Error::syntax(format!("unknown tag '{name}'"), head.line)),
        }
    }

    /// Parses statements until one of `ends` shows up, consuming and
    /// returning the terminating tag. A foreign `end` tag or the end of the
    /// template is a balancing error against `expected_end`.
    fn parse_block_until(
        &mut self,
        ends: &[&str],
        expected_end: &str,
        open_line: usize,
    ) -> Result<(Block, TagHead)> {
        let mut block = Block::default();
        loop {
            let Some(element) = self.elements.get(self.pos) else {
                return Err(Error::syntax(
                    format!("expected '{expected_end}', reached end of template"),
                    open_line,
                ));
            };
            if let TemplateElement::Tag { name, expr, line } = element {
                if ends.contains(&name.as_str()) {
                    let head = TagHead {
                        name: name.clone(),
                        expr: expr.clone(),
                        line: *line,
                    };
                    self.pos += 1;
                    return Ok((block, head));
                }
                if name.starts_with("end") {
                    return Err(Error::syntax(
                        format!("expected '{expected_end}', found '{name}'"),
                        *line,
                    ));
                }
            }
            block.statements.push(self.parse_statement()?);
        }
    }

    fn parse_conditional(&mut self, head: &TagHead) -> Result<Node> {
        let keyword = head.name.clone();
        let end = format!("end{keyword}");
        let mut branches = Vec::new();
        let mut condition = parse_boolean_expression(&mut head.tokens()?)?;
        let mut default = None;

        loop {
            let (block, terminator) =
                self.parse_block_until(&[&end, "elsif", "else"], &end, head.line)?;
            branches.push(ConditionalBranch { condition, block });
            match terminator.name.as_str() {
                "elsif" => {
                    condition = parse_boolean_expression(&mut terminator.tokens()?)?;
                }
                "else" => {
                    let (block, _) = self.parse_block_until(&[&end], &end, terminator.line)?;
                    default = Some(block);
                    break;
                }
                _ => break,
            }
        }

        let line = head.line;
        if keyword == "if" {
            Ok(Node::If { branches, default, line })
        } else {
            Ok(Node::Unless { branches, default, line })
        }
    }

    fn parse_case(&mut self, head: &TagHead) -> Result<Node> {
        let expr = {
            let mut stream = head.tokens()?;
            let expr = parse_expression(&mut stream, precedence::LOWEST)?;
            expect_end(&stream)?;
            expr
        };

        // Content between `case` and the first `when` is discarded.
        let (_, mut terminator) =
            self.parse_block_until(&["when", "else", "endcase"], "endcase", head.line)?;

        let mut whens = Vec::new();
        let mut default = None;
        loop {
            match terminator.name.as_str() {
                "when" => {
                    let candidates = parse_when_candidates(&mut terminator.tokens()?)?;
                    let (block, next) =
                        self.parse_block_until(&["when", "else", "endcase"], "endcase", terminator.line)?;
                    whens.push(WhenClause { candidates, block });
                    terminator = next;
                }
                "else" => {
                    let (block, next) =
                        self.parse_block_until(&["endcase"], "endcase", terminator.line)?;
                    default = Some(block);
                    terminator = next;
                }
                _ => break,
            }
        }

        Ok(Node::Case {
            expr,
            whens,
            default,
            line: head.line,
        })
    }

    fn parse_for(&mut self, head: &TagHead) -> Result<Node> {
        let expr = parse_loop_expression(&mut head.tokens()?)?;
        let (block, terminator) = self.parse_block_until(&["endfor", "else"], "endfor", head.line)?;
        let default = if terminator.name == "else" {
            let (block, _) = self.parse_block_until(&["endfor"], "endfor", terminator.line)?;
            Some(block)
        } else {
            None
        };
        Ok(Node::For {
            expr,
            block,
            default,
            line: head.line,
        })
    }

    fn parse_tablerow(&mut self, head: &TagHead) -> Result<Node> {
        let expr = parse_loop_expression(&mut head.tokens()?)?;
        let (block, _) = self.parse_block_until(&["endtablerow"], "endtablerow", head.line)?;
        Ok(Node::TableRow {
            expr,
            block,
            line: head.line,
        })
    }

    fn parse_capture(&mut self, head: &TagHead) -> Result<Node> {
        let name = single_name(head)?;
        let (block, _) = self.parse_block_until(&["endcapture"], "endcapture", head.line)?;
        Ok(Node::Capture {
            name,
            block,
            line: head.line,
        })
    }
}

fn parse_output(expr: &str, line: usize) -> Result<Node> {
    let mut stream = TokenStream::new(tokenize_expression(expr, line)?);
    let expr = parse_filtered_expression(&mut stream)?;
    Ok(Node::Output { expr, line })
}

/// Parses the single unchained name of `capture`/`increment`/`decrement`.
fn single_name(head: &TagHead) -> Result<String> {
    let mut stream = head.tokens()?;
    let name = stream.expect(TokenKind::Identifier)?.text.clone();
    expect_end(&stream)?;
    Ok(name)
}

/// Parses `when` candidates: primaries separated by commas or `or`.
fn parse_when_candidates(stream: &mut TokenStream) -> Result<Vec<Expression>> {
    let mut candidates = Vec::new();
    loop {
        candidates.push(parse_expression(stream, precedence::LOGICAL)?);
        match stream.peek().kind {
            TokenKind::Comma | TokenKind::Or => {
                stream.next_token();
                stream.next_token();
            }
            _ => break,
        }
    }
    expect_end(stream)?;
    Ok(candidates)
}

fn parse_cycle(head: &TagHead) -> Result<Node> {
    let mut stream = head.tokens()?;
    let mut group = None;

    if matches!(stream.current().kind, TokenKind::String | TokenKind::Identifier)
        && stream.peek().kind == TokenKind::Colon
    {
        let token = stream.current().clone();
        group = Some(match token.kind {
            TokenKind::String => Expression::Str(token.text),
            _ => Expression::Identifier(IdentifierPath(vec![PathElement::Name(token.text)])),
        });
        stream.next_token();
        stream.next_token();
    }

    let mut args = Vec::new();
    loop {
        args.push(parse_expression(&mut stream, precedence::LOWEST)?);
        if stream.peek().kind == TokenKind::Comma {
            stream.next_token();
            stream.next_token();
        } else {
            break;
        }
    }
    expect_end(&stream)?;

    Ok(Node::Cycle {
        group,
        args,
        line: head.line,
    })
}

/// Parses trailing `key: value` arguments of `include`/`render`.
fn parse_tag_kwargs(stream: &mut TokenStream) -> Result<Vec<(String, Expression)>> {
    let mut args = Vec::new();
    loop {
        match stream.peek().kind {
            TokenKind::Eof => break,
            TokenKind::Comma => {
                stream.next_token();
            }
            _ => {}
        }
        if stream.peek().kind == TokenKind::Eof {
            break;
        }
        stream.next_token();
        let key = stream.expect(TokenKind::Identifier)?.text.clone();
        stream.expect_peek(TokenKind::Colon)?;
        stream.next_token();
        stream.next_token();
        args.push((key, parse_expression(stream, precedence::LOWEST)?));
    }
    Ok(args)
}

fn parse_include(head: &TagHead) -> Result<Node> {
    let mut stream = head.tokens()?;
    let name = parse_string_or_identifier(&mut stream)?;

    let mut bind = None;
    if stream.peek().kind == TokenKind::With {
        stream.next_token();
        stream.next_token();
        let value = parse_primary(&mut stream)?;
        let alias = parse_alias(&mut stream)?;
        bind = Some(BindClause { value, alias });
    }
    let args = parse_tag_kwargs(&mut stream)?;

    Ok(Node::Include {
        name,
        bind,
        args,
        line: head.line,
    })
}

fn parse_render(head: &TagHead) -> Result<Node> {
    let mut stream = head.tokens()?;
    let token = stream.expect(TokenKind::String)?.clone();
    let name = Expression::Str(token.text);

    let mut bind = None;
    let mut repeat = false;
    match stream.peek().kind {
        TokenKind::With | TokenKind::For => {
            repeat = stream.peek().kind == TokenKind::For;
            stream.next_token();
            stream.next_token();
            let value = parse_primary(&mut stream)?;
            let alias = parse_alias(&mut stream)?;
            bind = Some(BindClause { value, alias });
        }
        _ => {}
    }
    let args = parse_tag_kwargs(&mut stream)?;

    Ok(Node::Render {
        name,
        bind,
        repeat,
        args,
        line: head.line,
    })
}

fn parse_alias(stream: &mut TokenStream) -> Result<Option<String>> {
    if stream.peek().kind == TokenKind::As {
        stream.next_token();
        stream.next_token();
        Ok(Some(stream.expect(TokenKind::Identifier)?.text.clone()))
    } else {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn parse_strict(source: &str) -> ParseTree {
        parse(source, Mode::Strict).unwrap().0
    }

    fn parse_expr(source: &str) -> Expression {
        let mut stream = TokenStream::new(tokenize_expression(source, 1).unwrap());
        let expr = parse_expression(&mut stream, precedence::LOWEST).unwrap();
        assert_eq!(stream.peek().kind, TokenKind::Eof, "trailing tokens in {source:?}");
        expr
    }

    #[test]
    fn boolean_operators_are_right_associative() {
        let expr = parse_expr("a or b and c");
        assert_eq!(expr.to_string(), "a or b and c");
        let Expression::Infix { op: InfixOp::Or, right, .. } = expr else {
            panic!("expected top-level or");
        };
        assert!(matches!(*right, Expression::Infix { op: InfixOp::And, .. }));
    }

    #[test]
    fn comparison_binds_tighter_than_logical() {
        let expr = parse_expr("a == b or c < d");
        let Expression::Infix { op: InfixOp::Or, left, right } = expr else {
            panic!("expected top-level or");
        };
        assert!(matches!(*left, Expression::Infix { op: InfixOp::Eq, .. }));
        assert!(matches!(*right, Expression::Infix { op: InfixOp::Lt, .. }));
    }

    #[test]
    fn contains_binds_tighter_than_equality() {
        let expr = parse_expr("x == y contains z");
        let Expression::Infix { op: InfixOp::Eq, right, .. } = expr else {
            panic!("expected top-level ==");
        };
        assert!(matches!(*right, Expression::Infix { op: InfixOp::Contains, .. }));
    }

    #[test]
    fn bracketed_subscripts_nest() {
        let expr = parse_expr("a[b.c]");
        let Expression::Identifier(path) = expr else { panic!("expected identifier") };
        assert_eq!(path.0.len(), 2);
        let PathElement::Nested(nested) = &path.0[1] else {
            panic!("expected nested subscript");
        };
        assert_eq!(nested.to_string(), "b.c");
    }

    #[test]
    fn identifier_paths_mix_names_and_indices() {
        let expr = parse_expr("product.tags[0]");
        assert_eq!(expr.to_string(), "product.tags.0");
    }

    #[test]
    fn filters_with_positional_and_named_arguments() {
        let tree = parse_strict("{{ x | default: 'none', allow_false: true | upcase }}");
        let Node::Output { expr, .. } = &tree.statements[0] else {
            panic!("expected output");
        };
        assert_eq!(expr.filters.len(), 2);
        assert_eq!(expr.filters[0].name, "default");
        assert_eq!(expr.filters[0].args.len(), 1);
        assert_eq!(expr.filters[0].kwargs.len(), 1);
        assert_eq!(expr.filters[0].kwargs[0].0, "allow_false");
        assert_eq!(expr.filters[1].name, "upcase");
    }

    #[test]
    fn loop_modifiers_in_any_order_and_last_wins() {
        let mut stream = TokenStream::new(
            tokenize_expression("i in (1..9) reversed offset:2 limit:3 limit:4", 1).unwrap(),
        );
        let expr = parse_loop_expression(&mut stream).unwrap();
        assert!(expr.reversed);
        assert_eq!(expr.offset, Some(Expression::Int(2)));
        assert_eq!(expr.limit, Some(Expression::Int(4)));
    }

    #[test]
    fn assignment_name_must_be_unchained() {
        let mut stream = TokenStream::new(tokenize_expression("a.b = 1", 1).unwrap());
        assert!(parse_assignment_expression(&mut stream).is_err());
    }

    #[test]
    fn missing_in_is_an_error() {
        let mut stream = TokenStream::new(tokenize_expression("i (1..3)", 1).unwrap());
        assert!(parse_loop_expression(&mut stream).is_err());
    }

    #[test]
    fn unbalanced_blocks_report_the_expected_end() {
        let err = parse("{% if true %}{% endfor %}", Mode::Strict).unwrap_err();
        assert_eq!(err.message(), "expected 'endif', found 'endfor'");

        let err = parse("{% for i in (1..2) %}x", Mode::Strict).unwrap_err();
        assert_eq!(err.message(), "expected 'endfor', reached end of template");
    }

    #[test]
    fn unknown_tags_are_errors() {
        let err = parse("{% frobnicate %}", Mode::Strict).unwrap_err();
        assert_eq!(err.message(), "unknown tag 'frobnicate'");
    }

    #[test]
    fn lax_mode_skips_failing_statements() {
        let (tree, _) = parse("a{% frobnicate %}b", Mode::Lax).unwrap();
        assert_eq!(tree.statements.len(), 2);
    }

    #[test]
    fn warn_mode_collects_warnings() {
        let (tree, warnings) = parse("a{% frobnicate %}b", Mode::Warn).unwrap();
        assert_eq!(tree.statements.len(), 2);
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn if_elsif_else_chain() {
        let tree = parse_strict("{% if a %}1{% elsif b %}2{% elsif c %}3{% else %}4{% endif %}");
        let Node::If { branches, default, .. } = &tree.statements[0] else {
            panic!("expected if");
        };
        assert_eq!(branches.len(), 3);
        assert!(default.is_some());
    }

    #[test]
    fn case_with_multi_candidate_when() {
        let tree = parse_strict("{% case x %}{% when 'a' or 'b', 'c' %}hit{% else %}miss{% endcase %}");
        let Node::Case { whens, default, .. } = &tree.statements[0] else {
            panic!("expected case");
        };
        assert_eq!(whens.len(), 1);
        assert_eq!(whens[0].candidates.len(), 3);
        assert!(default.is_some());
    }

    #[test]
    fn render_requires_a_string_literal_name() {
        assert!(parse("{% render partial %}", Mode::Strict).is_err());
        assert!(parse("{% render 'partial' %}", Mode::Strict).is_ok());
    }

    #[test]
    fn include_with_bind_and_arguments() {
        let tree = parse_strict("{% include 'product' with collections[0] as c, extra: 1 %}");
        let Node::Include { bind, args, .. } = &tree.statements[0] else {
            panic!("expected include");
        };
        let bind = bind.as_ref().unwrap();
        assert_eq!(bind.alias.as_deref(), Some("c"));
        assert_eq!(args.len(), 1);
    }

    #[test]
    fn display_round_trips_structurally() {
        let sources = [
            "Hello, {{ you | upcase }}!",
            "{% if a == 'x' or b %}yes{% else %}no{% endif %}",
            "{% for i in (1..3) limit:2 reversed %}{{ i }}{% else %}none{% endfor %}",
            "{% assign x = y | plus: 1 %}{% capture c %}text{% endcapture %}",
            "{% case x %}{% when 'a', 'b' %}ab{% endcase %}",
            "{% cycle 'g': 1, 2 %}{% increment n %}{% break %}",
            "{% tablerow i in rows cols:2 %}{{ i }}{% endtablerow %}",
            "{% render 'p' with a.b as c, k: 1 %}",
        ];
        for source in sources {
            let tree = parse_strict(source);
            let displayed = tree.to_string();
            let reparsed = parse_strict(&displayed);
            assert_eq!(tree, reparsed, "round-trip failed for {source:?} via {displayed:?}");
        }
    }
}
