//! Template lexing.
//!
//! Lexing happens in two phases. The template phase splits source text into
//! literal runs, output statements (`{{ … }}`) and tags (`{% … %}`),
//! applying whitespace control and swallowing `raw` and comment bodies. The
//! expression phase tokenizes the text inside a single output statement or
//! tag head into operator/keyword/literal tokens for the Pratt parser.
//!
//! Both phases track line numbers so every downstream error can point at
//! the opening delimiter of the construct it came from.

use crate::error::{Error, Result};

/// One top-level element of a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateElement {
    /// A run of literal text, already trimmed by whitespace control.
    Literal { text: String, line: usize },
    /// An output statement; `expr` is the text between the delimiters.
    Output { expr: String, line: usize },
    /// A tag; `name` is the leading word, `expr` the rest of the tag head.
    Tag { name: String, expr: String, line: usize },
}

/// Splits template source into literals, outputs and tags.
pub fn tokenize_template(source: &str) -> Result<Vec<TemplateElement>> {
    TemplateLexer::new(source).run()
}

struct TemplateLexer<'s> {
    source: &'s str,
    pos: usize,
    line: usize,
    elements: Vec<TemplateElement>,
    /// Set when the previous delimiter asked to trim the next literal.
    trim_next: bool,
}

impl<'s> TemplateLexer<'s> {
    fn new(source: &'s str) -> Self {
        Self {
            source,
            pos: 0,
            line: 1,
            elements: Vec::new(),
            trim_next: false,
        }
    }

    fn run(mut self) -> Result<Vec<TemplateElement>> {
        while self.pos < self.source.len() {
            let rest = &self.source[self.pos..];
            match rest.find("{{").into_iter().chain(rest.find("{%")).min() {
                Some(offset) => {
                    let literal = &rest[..offset];
                    self.push_literal(literal);
                    self.line += count_newlines(literal);
                    self.pos += offset;
                    self.delimited()?;
                }
                None => {
                    self.push_literal(rest);
                    self.pos = self.source.len();
                }
            }
        }
        Ok(self.elements)
    }

    fn push_literal(&mut self, text: &str) {
        let mut text = text;
        if self.trim_next {
            text = text.trim_start_matches([' ', '\t', '\r', '\n']);
            self.trim_next = false;
        }
        if !text.is_empty() {
            self.elements.push(TemplateElement::Literal {
                text: text.to_string(),
                line: self.line,
            });
        }
    }

    /// Trims trailing whitespace from the most recent literal, for `{{-`.
    fn trim_previous(&mut self) {
        if let Some(TemplateElement::Literal { text, .. }) = self.elements.last_mut() {
            text.truncate(text.trim_end_matches([' ', '\t', '\r', '\n']).len());
            if text.is_empty() {
                self.elements.pop();
            }
        }
    }

    /// Consumes one `{{ … }}` or `{% … %}` construct starting at `self.pos`.
    fn delimited(&mut self) -> Result<()> {
        let open_line = self.line;
        let is_output = self.source[self.pos..].starts_with("{{");
        let close = if is_output { "}}" } else { "%}" };
        let mut inner_start = self.pos + 2;

        if self.source[inner_start..].starts_with('-') {
            self.trim_previous();
            inner_start += 1;
        }

        let Some(close_offset) = self.source[inner_start..].find(close) else {
            let what = if is_output { "output statement" } else { "tag" };
            return Err(Error::syntax(format!("unterminated {what}"), open_line));
        };
        let mut inner_end = inner_start + close_offset;
        self.pos = inner_end + 2;
        if inner_end > inner_start && self.source[..inner_end].ends_with('-') {
            inner_end -= 1;
            self.trim_next = true;
        }

        let inner = &self.source[inner_start..inner_end];
        self.line += count_newlines(inner);

        if is_output {
            self.elements.push(TemplateElement::Output {
                expr: inner.trim().to_string(),
                line: open_line,
            });
            return Ok(());
        }

        let head = inner.trim();
        if head.starts_with('#') {
            // Inline comment: the body is discarded.
            return Ok(());
        }
        let (name, expr) = match head.find(char::is_whitespace) {
            Some(split) => (&head[..split], head[split..].trim_start()),
            None => (head, ""),
        };
        match name {
            "raw" => self.raw_block(open_line),
            "comment" => self.skip_until_end_tag("endcomment", open_line),
            _ => {
                self.elements.push(TemplateElement::Tag {
                    name: name.to_string(),
                    expr: expr.to_string(),
                    line: open_line,
                });
                Ok(())
            }
        }
    }

    /// Captures everything up to the matching `endraw` as a literal.
    fn raw_block(&mut self, open_line: usize) -> Result<()> {
        let (body, body_line) = self.scan_to_end_tag("endraw", open_line)?;
        if !body.is_empty() {
            self.elements.push(TemplateElement::Literal { text: body, line: body_line });
        }
        Ok(())
    }

    fn skip_until_end_tag(&mut self, end: &str, open_line: usize) -> Result<()> {
        self.scan_to_end_tag(end, open_line)?;
        Ok(())
    }

    /// Scans forward to `{% end… %}` without tokenizing the body.
    ///
    /// Returns the body text and its starting line, leaving `self.pos` past
    /// the end tag and `self.trim_next` reflecting the end tag's trailing
    /// whitespace-control mark.
    fn scan_to_end_tag(&mut self, end: &str, open_line: usize) -> Result<(String, usize)> {
        let body_line = self.line;
        let trim_body_start = self.trim_next;
        self.trim_next = false;
        let mut search = self.pos;
        loop {
            let Some(offset) = self.source[search..].find("{%") else {
                return Err(Error::syntax(format!("missing '{end}' tag"), open_line));
            };
            let tag_start = search + offset;
            let mut inner_start = tag_start + 2;
            let mut trims_body_end = false;
            if self.source[inner_start..].starts_with('-') {
                inner_start += 1;
                trims_body_end = true;
            }
            let Some(close_offset) = self.source[inner_start..].find("%}") else {
                return Err(Error::syntax("unterminated tag", open_line));
            };
            let mut inner_end = inner_start + close_offset;
            let after = inner_end + 2;
            if inner_end > inner_start && self.source[..inner_end].ends_with('-') {
                inner_end -= 1;
            }
            if self.source[inner_start..inner_end].trim() == end {
                let mut body = self.source[self.pos..tag_start].to_string();
                if trim_body_start {
                    body = body.trim_start_matches([' ', '\t', '\r', '\n']).to_string();
                }
                if trims_body_end {
                    body.truncate(body.trim_end_matches([' ', '\t', '\r', '\n']).len());
                }
                self.line += count_newlines(&self.source[self.pos..after]);
                self.trim_next = self.source[inner_end..after].starts_with('-');
                self.pos = after;
                return Ok((body, body_line));
            }
            search = after;
        }
    }
}

fn count_newlines(s: &str) -> usize {
    s.bytes().filter(|b| *b == b'\n').count()
}

/// Kinds of expression-phase tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum TokenKind {
    Identifier,
    Integer,
    Float,
    String,
    #[strum(to_string = "'.'")]
    Dot,
    #[strum(to_string = "'..'")]
    DotDot,
    #[strum(to_string = "'['")]
    LBracket,
    #[strum(to_string = "']'")]
    RBracket,
    #[strum(to_string = "'('")]
    LParen,
    #[strum(to_string = "')'")]
    RParen,
    #[strum(to_string = "','")]
    Comma,
    #[strum(to_string = "':'")]
    Colon,
    #[strum(to_string = "'|'")]
    Pipe,
    #[strum(to_string = "'=='")]
    Eq,
    #[strum(to_string = "'!='")]
    Ne,
    #[strum(to_string = "'<'")]
    Lt,
    #[strum(to_string = "'>'")]
    Gt,
    #[strum(to_string = "'<='")]
    Le,
    #[strum(to_string = "'>='")]
    Ge,
    #[strum(to_string = "'='")]
    Assign,
    #[strum(to_string = "'-'")]
    Minus,
    True,
    False,
    Nil,
    Empty,
    Contains,
    And,
    Or,
    In,
    With,
    For,
    As,
    Cols,
    Limit,
    Offset,
    Reversed,
    Eof,
}

/// One expression-phase token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    /// Source text: identifier name, number text, or unquoted string body.
    pub text: String,
    pub line: usize,
}

impl Token {
    fn new(kind: TokenKind, text: impl Into<String>, line: usize) -> Self {
        Self { kind, text: text.into(), line }
    }
}

fn keyword_kind(word: &str) -> Option<TokenKind> {
    Some(match word {
        "true" => TokenKind::True,
        "false" => TokenKind::False,
        "nil" | "null" => TokenKind::Nil,
        "empty" => TokenKind::Empty,
        "contains" => TokenKind::Contains,
        "and" => TokenKind::And,
        "or" => TokenKind::Or,
        "in" => TokenKind::In,
        "with" => TokenKind::With,
        "for" => TokenKind::For,
        "as" => TokenKind::As,
        "cols" => TokenKind::Cols,
        "limit" => TokenKind::Limit,
        "offset" => TokenKind::Offset,
        "reversed" => TokenKind::Reversed,
        _ => return None,
    })
}

/// Tokenizes the inside of a tag or output statement.
///
/// `line` is the line number of the opening delimiter and is carried onto
/// every token (expressions spanning multiple lines keep counting).
pub fn tokenize_expression(expr: &str, line: usize) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = expr.chars().collect();
    let mut pos = 0;
    let mut line = line;

    while pos < chars.len() {
        let c = chars[pos];
        match c {
            '\n' => {
                line += 1;
                pos += 1;
            }
            ' ' | '\t' | '\r' => pos += 1,
            '\'' | '"' => {
                let quote = c;
                let start = pos + 1;
                let mut end = start;
                while end < chars.len() && chars[end] != quote {
                    end += 1;
                }
                if end >= chars.len() {
                    return Err(Error::syntax("unterminated string literal", line));
                }
                let text: String = chars[start..end].iter().collect();
                tokens.push(Token::new(TokenKind::String, text, line));
                pos = end + 1;
            }
            '0'..='9' => {
                let start = pos;
                let mut is_float = false;
                while pos < chars.len() && chars[pos].is_ascii_digit() {
                    pos += 1;
                }
                if pos + 1 < chars.len() && chars[pos] == '.' && chars[pos + 1].is_ascii_digit() {
                    is_float = true;
                    pos += 1;
                    while pos < chars.len() && chars[pos].is_ascii_digit() {
                        pos += 1;
                    }
                }
                let text: String = chars[start..pos].iter().collect();
                let kind = if is_float { TokenKind::Float } else { TokenKind::Integer };
                tokens.push(Token::new(kind, text, line));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = pos;
                while pos < chars.len()
                    && (chars[pos].is_ascii_alphanumeric() || chars[pos] == '_' || chars[pos] == '-')
                {
                    pos += 1;
                }
                let word: String = chars[start..pos].iter().collect();
                match keyword_kind(&word) {
                    Some(kind) => tokens.push(Token::new(kind, word, line)),
                    None => tokens.push(Token::new(TokenKind::Identifier, word, line)),
                }
            }
            '.' => {
                if pos + 1 < chars.len() && chars[pos + 1] == '.' {
                    tokens.push(Token::new(TokenKind::DotDot, "..", line));
                    pos += 2;
                } else {
                    tokens.push(Token::new(TokenKind::Dot, ".", line));
                    pos += 1;
                }
            }
            '[' => {
                tokens.push(Token::new(TokenKind::LBracket, "[", line));
                pos += 1;
            }
            ']' => {
                tokens.push(Token::new(TokenKind::RBracket, "]", line));
                pos += 1;
            }
            '(' => {
                tokens.push(Token::new(TokenKind::LParen, "(", line));
                pos += 1;
            }
            ')' => {
                tokens.push(Token::new(TokenKind::RParen, ")", line));
                pos += 1;
            }
            ',' => {
                tokens.push(Token::new(TokenKind::Comma, ",", line));
                pos += 1;
            }
            ':' => {
                tokens.push(Token::new(TokenKind::Colon, ":", line));
                pos += 1;
            }
            '|' => {
                tokens.push(Token::new(TokenKind::Pipe, "|", line));
                pos += 1;
            }
            '-' => {
                tokens.push(Token::new(TokenKind::Minus, "-", line));
                pos += 1;
            }
            '=' => {
                if pos + 1 < chars.len() && chars[pos + 1] == '=' {
                    tokens.push(Token::new(TokenKind::Eq, "==", line));
                    pos += 2;
                } else {
                    tokens.push(Token::new(TokenKind::Assign, "=", line));
                    pos += 1;
                }
            }
            '!' => {
                if pos + 1 < chars.len() && chars[pos + 1] == '=' {
                    tokens.push(Token::new(TokenKind::Ne, "!=", line));
                    pos += 2;
                } else {
                    return Err(Error::syntax("unexpected character '!'", line));
                }
            }
            '<' => {
                if pos + 1 < chars.len() && chars[pos + 1] == '=' {
                    tokens.push(Token::new(TokenKind::Le, "<=", line));
                    pos += 2;
                } else if pos + 1 < chars.len() && chars[pos + 1] == '>' {
                    tokens.push(Token::new(TokenKind::Ne, "<>", line));
                    pos += 2;
                } else {
                    tokens.push(Token::new(TokenKind::Lt, "<", line));
                    pos += 1;
                }
            }
            '>' => {
                if pos + 1 < chars.len() && chars[pos + 1] == '=' {
                    tokens.push(Token::new(TokenKind::Ge, ">=", line));
                    pos += 2;
                } else {
                    tokens.push(Token::new(TokenKind::Gt, ">", line));
                    pos += 1;
                }
            }
            other => {
                return Err(Error::syntax(format!("unexpected character '{other}'"), line));
            }
        }
    }

    tokens.push(Token::new(TokenKind::Eof, "", line));
    Ok(tokens)
}

/// A peekable cursor over expression tokens.
#[derive(Debug)]
pub struct TokenStream {
    tokens: Vec<Token>,
    pos: usize,
}

impl TokenStream {
    /// Wraps a token list; the list must end with an `Eof` token.
    #[must_use]
    pub fn new(tokens: Vec<Token>) -> Self {
        debug_assert!(matches!(tokens.last(), Some(t) if t.kind == TokenKind::Eof));
        Self { tokens, pos: 0 }
    }

    /// The token under the cursor.
    #[must_use]
    pub fn current(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    /// The token after the cursor.
    #[must_use]
    pub fn peek(&self) -> &Token {
        &self.tokens[(self.pos + 1).min(self.tokens.len() - 1)]
    }

    /// Advances past the current token and returns it.
    pub fn next_token(&mut self) -> Token {
        let token = self.current().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    /// Line number of the current token.
    #[must_use]
    pub fn line(&self) -> usize {
        self.current().line
    }

    /// Returns true if the cursor is on the end-of-expression token.
    #[must_use]
    pub fn at_end(&self) -> bool {
        self.current().kind == TokenKind::Eof
    }

    /// Fails with a syntax error unless the current token has `kind`.
    pub fn expect(&self, kind: TokenKind) -> Result<&Token> {
        let token = self.current();
        if token.kind == kind {
            Ok(token)
        } else {
            Err(Error::syntax(
                format!("expected {kind}, found {}", describe(token)),
                token.line,
            ))
        }
    }

    /// Fails with a syntax error unless the token after the cursor has `kind`.
    pub fn expect_peek(&self, kind: TokenKind) -> Result<&Token> {
        let token = self.peek();
        if token.kind == kind {
            Ok(token)
        } else {
            Err(Error::syntax(
                format!("expected {kind}, found {}", describe(token)),
                token.line,
            ))
        }
    }
}

fn describe(token: &Token) -> String {
    if token.kind == TokenKind::Eof {
        "end of expression".to_string()
    } else {
        format!("'{}'", token.text)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn kinds(expr: &str) -> Vec<TokenKind> {
        tokenize_expression(expr, 1).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn template_phase_splits_literals_outputs_and_tags() {
        let elements = tokenize_template("Hello, {{ you }}!{% assign x = 1 %}").unwrap();
        assert_eq!(
            elements,
            vec![
                TemplateElement::Literal { text: "Hello, ".to_string(), line: 1 },
                TemplateElement::Output { expr: "you".to_string(), line: 1 },
                TemplateElement::Literal { text: "!".to_string(), line: 1 },
                TemplateElement::Tag { name: "assign".to_string(), expr: "x = 1".to_string(), line: 1 },
            ]
        );
    }

    #[test]
    fn whitespace_control_trims_adjacent_literals() {
        let elements = tokenize_template("a  {{- 'b' -}}  c").unwrap();
        assert_eq!(
            elements,
            vec![
                TemplateElement::Literal { text: "a".to_string(), line: 1 },
                TemplateElement::Output { expr: "'b'".to_string(), line: 1 },
                TemplateElement::Literal { text: "c".to_string(), line: 1 },
            ]
        );
    }

    #[test]
    fn whitespace_control_on_tags() {
        let elements = tokenize_template("x\n{%- if a %}").unwrap();
        assert_eq!(
            elements,
            vec![
                TemplateElement::Literal { text: "x".to_string(), line: 1 },
                TemplateElement::Tag { name: "if".to_string(), expr: "a".to_string(), line: 2 },
            ]
        );
    }

    #[test]
    fn raw_disables_tag_recognition() {
        let elements = tokenize_template("{% raw %}{{ not parsed }}{% endraw %}").unwrap();
        assert_eq!(
            elements,
            vec![TemplateElement::Literal { text: "{{ not parsed }}".to_string(), line: 1 }]
        );
    }

    #[test]
    fn comments_are_discarded() {
        let elements = tokenize_template("a{% comment %}ignored {{ x }}{% endcomment %}b{% # inline %}c").unwrap();
        assert_eq!(
            elements,
            vec![
                TemplateElement::Literal { text: "a".to_string(), line: 1 },
                TemplateElement::Literal { text: "b".to_string(), line: 1 },
                TemplateElement::Literal { text: "c".to_string(), line: 1 },
            ]
        );
    }

    #[test]
    fn unterminated_output_reports_opening_line() {
        let err = tokenize_template("ok\n\n{{ you").unwrap_err();
        assert_eq!(err.line(), Some(3));
    }

    #[test]
    fn missing_endraw_is_an_error() {
        assert!(tokenize_template("{% raw %}body").is_err());
    }

    #[test]
    fn line_numbers_span_literals() {
        let elements = tokenize_template("a\nb\n{{ x }}").unwrap();
        assert_eq!(
            elements[1],
            TemplateElement::Output { expr: "x".to_string(), line: 3 }
        );
    }

    #[test]
    fn expression_operators() {
        assert_eq!(
            kinds("a == b != c <> d <= e >= f < g > h"),
            vec![
                TokenKind::Identifier,
                TokenKind::Eq,
                TokenKind::Identifier,
                TokenKind::Ne,
                TokenKind::Identifier,
                TokenKind::Ne,
                TokenKind::Identifier,
                TokenKind::Le,
                TokenKind::Identifier,
                TokenKind::Ge,
                TokenKind::Identifier,
                TokenKind::Lt,
                TokenKind::Identifier,
                TokenKind::Gt,
                TokenKind::Identifier,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn numbers_and_ranges() {
        assert_eq!(
            kinds("(1..3) 4.5 -6"),
            vec![
                TokenKind::LParen,
                TokenKind::Integer,
                TokenKind::DotDot,
                TokenKind::Integer,
                TokenKind::RParen,
                TokenKind::Float,
                TokenKind::Minus,
                TokenKind::Integer,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn identifiers_may_contain_hyphens() {
        let tokens = tokenize_expression("main-title", 1).unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Identifier);
        assert_eq!(tokens[0].text, "main-title");
    }

    #[test]
    fn identifiers_must_not_start_with_a_digit() {
        // `1abc` lexes as an integer followed by an identifier; the parser
        // rejects the sequence.
        let tokens = tokenize_expression("1abc", 1).unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Integer);
        assert_eq!(tokens[1].kind, TokenKind::Identifier);
    }

    #[test]
    fn strings_have_no_escape_sequences() {
        let tokens = tokenize_expression(r#""a\n" 'b'"#, 1).unwrap();
        assert_eq!(tokens[0].text, "a\\n");
        assert_eq!(tokens[1].text, "b");
        assert!(tokenize_expression("'open", 1).is_err());
    }

    #[test]
    fn keywords() {
        assert_eq!(
            kinds("true false nil null empty and or contains in reversed"),
            vec![
                TokenKind::True,
                TokenKind::False,
                TokenKind::Nil,
                TokenKind::Nil,
                TokenKind::Empty,
                TokenKind::And,
                TokenKind::Or,
                TokenKind::Contains,
                TokenKind::In,
                TokenKind::Reversed,
                TokenKind::Eof,
            ]
        );
    }
}
