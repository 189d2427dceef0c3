//! Tokenizer: a chumsky lexer for the flat token stream, followed by a
//! layout pass that turns leading whitespace into INDENT/DEDENT tokens.

use std::fmt;

use chumsky::error::RichReason;
use chumsky::prelude::*;

use super::error::ScriptError;

pub type Span = SimpleSpan;
pub type LexError<'src> = Rich<'src, char, Span>;

/// Deepest bracket nesting (and longest run of unary operators) accepted.
pub const MAX_NESTING: usize = 200;
/// Deepest block indentation accepted.
pub const MAX_INDENT_LEVELS: usize = 100;
/// Most tokens one logical line may hold.
pub const MAX_LINE_TOKENS: usize = 10_000;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Name(String),
    /// Magnitude only; a leading `-` is a separate token.
    Int(u64),
    Float(f64),
    Str(String),
    If,
    Elif,
    Else,
    While,
    For,
    In,
    Break,
    Continue,
    Pass,
    Return,
    And,
    Or,
    Not,
    True,
    False,
    None,
    ParenOpen,
    ParenClose,
    BracketOpen,
    BracketClose,
    BraceOpen,
    BraceClose,
    Comma,
    Colon,
    Plus,
    Minus,
    Star,
    DoubleStar,
    Slash,
    DoubleSlash,
    Percent,
    Assign,
    PlusAssign,
    MinusAssign,
    StarAssign,
    SlashAssign,
    Equal,
    NotEqual,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
    Newline,
    Indent,
    Dedent,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Token::Name(name) => return write!(f, "name '{name}'"),
            Token::Int(value) => return write!(f, "{value}"),
            Token::Float(value) => return write!(f, "{value}"),
            Token::Str(_) => "string literal",
            Token::If => "'if'",
            Token::Elif => "'elif'",
            Token::Else => "'else'",
            Token::While => "'while'",
            Token::For => "'for'",
            Token::In => "'in'",
            Token::Break => "'break'",
            Token::Continue => "'continue'",
            Token::Pass => "'pass'",
            Token::Return => "'return'",
            Token::And => "'and'",
            Token::Or => "'or'",
            Token::Not => "'not'",
            Token::True => "'True'",
            Token::False => "'False'",
            Token::None => "'None'",
            Token::ParenOpen => "'('",
            Token::ParenClose => "')'",
            Token::BracketOpen => "'['",
            Token::BracketClose => "']'",
            Token::BraceOpen => "'{'",
            Token::BraceClose => "'}'",
            Token::Comma => "','",
            Token::Colon => "':'",
            Token::Plus => "'+'",
            Token::Minus => "'-'",
            Token::Star => "'*'",
            Token::DoubleStar => "'**'",
            Token::Slash => "'/'",
            Token::DoubleSlash => "'//'",
            Token::Percent => "'%'",
            Token::Assign => "'='",
            Token::PlusAssign => "'+='",
            Token::MinusAssign => "'-='",
            Token::StarAssign => "'*='",
            Token::SlashAssign => "'/='",
            Token::Equal => "'=='",
            Token::NotEqual => "'!='",
            Token::Less => "'<'",
            Token::LessOrEqual => "'<='",
            Token::Greater => "'>'",
            Token::GreaterOrEqual => "'>='",
            Token::Newline => "end of line",
            Token::Indent => "indent",
            Token::Dedent => "dedent",
        };
        f.write_str(text)
    }
}

fn keyword(word: &str) -> Option<Token> {
    Some(match word {
        "if" => Token::If,
        "elif" => Token::Elif,
        "else" => Token::Else,
        "while" => Token::While,
        "for" => Token::For,
        "in" => Token::In,
        "break" => Token::Break,
        "continue" => Token::Continue,
        "pass" => Token::Pass,
        "return" => Token::Return,
        "and" => Token::And,
        "or" => Token::Or,
        "not" => Token::Not,
        "True" => Token::True,
        "False" => Token::False,
        "None" => Token::None,
        _ => return None,
    })
}

/// Byte offsets of line starts, for turning spans into 1-based line numbers.
#[derive(Debug, Clone)]
pub struct LineIndex {
    starts: Vec<usize>,
}

impl LineIndex {
    pub fn new(source: &str) -> Self {
        let starts = std::iter::once(0)
            .chain(source.match_indices('\n').map(|(i, _)| i + 1))
            .collect();
        Self { starts }
    }

    pub fn line(&self, offset: usize) -> usize {
        self.starts.partition_point(|start| *start <= offset)
    }

    pub fn line_start(&self, offset: usize) -> usize {
        self.starts[self.line(offset).saturating_sub(1)]
    }
}

fn string_literal<'src>(quote: char) -> impl Parser<'src, &'src str, Token, extra::Err<LexError<'src>>> + Clone {
    let body = choice((
        just('\\').then(any()).ignored(),
        any().filter(move |c: &char| *c != quote && *c != '\\' && *c != '\n').ignored(),
    ))
    .repeated()
    .to_slice();

    just(quote)
        .ignore_then(body)
        .then(just(quote).or_not())
        .try_map(|(raw, close): (&str, Option<char>), span| match close {
            Some(_) => Ok(Token::Str(unescape(raw))),
            None => Err(Rich::custom(span, "unterminated string literal")),
        })
}

fn unescape(raw: &str) -> String {
    let mut text = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            text.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => text.push('\n'),
            Some('t') => text.push('\t'),
            Some('r') => text.push('\r'),
            Some('0') => text.push('\0'),
            Some(c @ ('\\' | '\'' | '"')) => text.push(c),
            // backslash-newline continues the literal
            Some('\n') => {}
            Some(other) => {
                text.push('\\');
                text.push(other);
            }
            None => text.push('\\'),
        }
    }
    text
}

/// Flat token stream with spans. Newlines are kept; comments, blanks and
/// backslash continuations are dropped.
pub fn lexer<'src>() -> impl Parser<'src, &'src str, Vec<(Token, Span)>, extra::Err<LexError<'src>>> {
    let digits = any()
        .filter(char::is_ascii_digit)
        .then(any().filter(|c: &char| c.is_ascii_digit() || *c == '_').repeated())
        .to_slice();
    let exponent = one_of("eE").then(one_of("+-").or_not()).then(digits.clone());

    let float = choice((
        digits
            .clone()
            .then(just('.'))
            .then(digits.clone().or_not())
            .then(exponent.clone().or_not())
            .to_slice(),
        just('.').then(digits.clone()).then(exponent.clone().or_not()).to_slice(),
        digits.clone().then(exponent).to_slice(),
    ))
    .try_map(|text: &str, span| {
        text.replace('_', "")
            .parse::<f64>()
            .map(Token::Float)
            .map_err(|_| Rich::custom(span, format!("invalid float literal: {text}")))
    });

    let int = digits.try_map(|text: &str, span| {
        text.replace('_', "")
            .parse::<u64>()
            .map(Token::Int)
            .map_err(|_| Rich::custom(span, format!("integer literal too large: {text}")))
    });

    let word = any()
        .filter(|c: &char| c.is_alphabetic() || *c == '_')
        .then(any().filter(|c: &char| c.is_alphanumeric() || *c == '_').repeated())
        .to_slice()
        .map(|word: &str| keyword(word).unwrap_or_else(|| Token::Name(word.to_string())));

    let compound = choice((
        just("**").to(Token::DoubleStar),
        just("//").to(Token::DoubleSlash),
        just("+=").to(Token::PlusAssign),
        just("-=").to(Token::MinusAssign),
        just("*=").to(Token::StarAssign),
        just("/=").to(Token::SlashAssign),
        just("==").to(Token::Equal),
        just("!=").to(Token::NotEqual),
        just("<=").to(Token::LessOrEqual),
        just(">=").to(Token::GreaterOrEqual),
    ));

    let single = choice((
        just('(').to(Token::ParenOpen),
        just(')').to(Token::ParenClose),
        just('[').to(Token::BracketOpen),
        just(']').to(Token::BracketClose),
        just('{').to(Token::BraceOpen),
        just('}').to(Token::BraceClose),
        just(',').to(Token::Comma),
        just(':').to(Token::Colon),
        just('+').to(Token::Plus),
        just('-').to(Token::Minus),
        just('*').to(Token::Star),
        just('/').to(Token::Slash),
        just('%').to(Token::Percent),
        just('=').to(Token::Assign),
        just('<').to(Token::Less),
        just('>').to(Token::Greater),
    ));

    let attribute = just('.')
        .try_map(|_, span| Err::<Token, _>(Rich::custom(span, "attribute access is not supported")));

    let token = choice((
        float,
        int,
        string_literal('"'),
        string_literal('\''),
        word,
        compound,
        single,
        just('\n').to(Token::Newline),
        attribute,
    ));

    let comment = just('#').then(any().filter(|c: &char| *c != '\n').repeated()).ignored();
    let continuation = just('\\').then(just('\r').or_not()).then(just('\n')).ignored();
    let padding = choice((one_of(" \t\r").ignored(), comment, continuation)).repeated();

    padding
        .clone()
        .ignore_then(
            token
                .map_with(|token, extra| (token, extra.span()))
                .then_ignore(padding)
                .repeated()
                .collect(),
        )
        .then_ignore(end())
}

/// Tokenize `source` and resolve its layout.
pub fn tokenize(source: &str) -> Result<Vec<(Token, Span)>, ScriptError> {
    let lines = LineIndex::new(source);
    let tokens = lexer().parse(source).into_result().map_err(|errors| {
        let error = errors.into_iter().next();
        let line = error.as_ref().map_or(1, |e| lines.line(e.span().start));
        let message = match error.as_ref().map(|e| e.reason()) {
            Some(RichReason::Custom(message)) => message.clone(),
            Some(RichReason::ExpectedFound { found: Some(found), .. }) => {
                format!("invalid character {:?}", **found)
            }
            _ => "unexpected end of input".to_string(),
        };
        ScriptError::syntax(line, message)
    })?;
    Layout::new(source, &lines).run(tokens)
}

/// Hand-written pass over the flat stream: drops newlines inside brackets
/// and on blank lines, emits INDENT/DEDENT, and enforces nesting ceilings.
struct Layout<'a> {
    source: &'a str,
    lines: &'a LineIndex,
    indents: Vec<&'a str>,
    brackets: usize,
    unary_run: usize,
    line_tokens: usize,
    out: Vec<(Token, Span)>,
}

impl<'a> Layout<'a> {
    fn new(source: &'a str, lines: &'a LineIndex) -> Self {
        Self {
            source,
            lines,
            indents: vec![""],
            brackets: 0,
            unary_run: 0,
            line_tokens: 0,
            out: Vec::new(),
        }
    }

    fn error(&self, offset: usize, message: impl Into<String>) -> ScriptError {
        ScriptError::syntax(self.lines.line(offset), message)
    }

    fn run(mut self, tokens: Vec<(Token, Span)>) -> Result<Vec<(Token, Span)>, ScriptError> {
        let mut at_line_start = true;
        for (token, span) in tokens {
            if token == Token::Newline {
                if self.brackets == 0 && !at_line_start {
                    self.out.push((token, span));
                    at_line_start = true;
                    self.line_tokens = 0;
                }
                continue;
            }
            if at_line_start {
                self.indent(span)?;
                at_line_start = false;
            }
            self.check(&token, span)?;
            self.out.push((token, span));
        }

        let end = self.source.len();
        if self.brackets > 0 {
            return Err(self.error(end, "unexpected end of input inside brackets"));
        }
        let eoi = Span::from(end..end);
        if !at_line_start {
            self.out.push((Token::Newline, eoi));
        }
        while self.indents.len() > 1 {
            self.indents.pop();
            self.out.push((Token::Dedent, eoi));
        }
        Ok(self.out)
    }

    fn check(&mut self, token: &Token, span: Span) -> Result<(), ScriptError> {
        self.line_tokens += 1;
        if self.line_tokens > MAX_LINE_TOKENS {
            return Err(self.error(span.start, "statement too long"));
        }
        match token {
            Token::ParenOpen | Token::BracketOpen | Token::BraceOpen => {
                self.brackets += 1;
                if self.brackets > MAX_NESTING {
                    return Err(self.error(span.start, "too many nested parentheses"));
                }
            }
            Token::ParenClose | Token::BracketClose | Token::BraceClose => {
                if self.brackets == 0 {
                    return Err(self.error(span.start, format!("unmatched {token}")));
                }
                self.brackets -= 1;
            }
            _ => {}
        }
        if matches!(token, Token::Minus | Token::Plus | Token::Not) {
            self.unary_run += 1;
            if self.unary_run > MAX_NESTING {
                return Err(self.error(span.start, "too many nested unary operators"));
            }
        } else {
            self.unary_run = 0;
        }
        Ok(())
    }

    fn indent(&mut self, span: Span) -> Result<(), ScriptError> {
        let source = self.source;
        let prefix = &source[self.lines.line_start(span.start)..span.start];
        let marker = Span::from(span.start..span.start);
        let current = self.indents.last().copied().unwrap_or("");
        if prefix == current {
            return Ok(());
        }
        if prefix.len() > current.len() && prefix.starts_with(current) {
            if self.indents.len() > MAX_INDENT_LEVELS {
                return Err(self.error(span.start, "too many levels of indentation"));
            }
            self.indents.push(prefix);
            self.out.push((Token::Indent, marker));
            return Ok(());
        }
        while self.indents.len() > 1 {
            self.indents.pop();
            self.out.push((Token::Dedent, marker));
            if self.indents.last().is_some_and(|level| *level == prefix) {
                return Ok(());
            }
        }
        Err(self.error(span.start, "unindent does not match any outer indentation level"))
    }
}
