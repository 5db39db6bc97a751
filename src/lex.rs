use std::fmt;
use std::sync::Arc;

use enum_kinds::EnumKind;
use nom::{
    branch::alt,
    bytes::complete::{tag, take_until, take_while, take_while1},
    character::complete::{char, digit1, line_ending, multispace1, none_of, not_line_ending, one_of, space0},
    combinator::{eof, map, map_res, opt, recognize, value, verify},
    multi::many0,
    sequence::{pair, preceded, terminated, tuple},
    IResult,
};

use crate::error::Error;

/// Lexer options.
#[derive(Debug, Clone)]
pub struct Options {
    /// Name reported in diagnostic positions.
    pub filename: String,
    /// Hard cap on the number of emitted tokens.
    pub max_tokens: usize,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            filename: String::new(),
            max_tokens: 5000,
        }
    }
}

/// Source location of a token, 1-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Position {
    pub file: Arc<str>,
    pub line: u32,
    pub col: u32,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.file.is_empty() {
            write!(f, "{}:{}", self.line, self.col)
        } else {
            write!(f, "{}:{}:{}", self.file, self.line, self.col)
        }
    }
}

#[derive(Debug, Clone, PartialEq, EnumKind)]
#[enum_kind(TokenKind)]
pub enum Token {
    Identifier(String),
    /// Number with the K/M/G quantifier already applied.
    Number(u64),
    Str(String),
    MultiLine(String),
    /// `:name`, lower-cased, without the colon.
    Tag(String),
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    LParen,
    RParen,
    Comma,
    Semicolon,
}

fn is_idalpha(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_idalphanum(c: char) -> bool {
    is_idalpha(c) || c.is_ascii_digit()
}

fn identifier(input: &str) -> IResult<&str, &str> {
    recognize(pair(take_while1(is_idalpha), take_while(is_idalphanum)))(input)
}

fn hash_comment(input: &str) -> IResult<&str, ()> {
    value((), tuple((char('#'), not_line_ending, alt((line_ending, eof)))))(input)
}

fn bracket_comment(input: &str) -> IResult<&str, ()> {
    value((), tuple((tag("/*"), take_until("*/"), tag("*/"))))(input)
}

fn white_space(input: &str) -> IResult<&str, ()> {
    alt((value((), multispace1), hash_comment, bracket_comment))(input)
}

fn quoted_string(input: &str) -> IResult<&str, String> {
    let escaped = nom::bytes::complete::escaped_transform(
        none_of("\\\""),
        '\\',
        nom::bytes::complete::take(1usize),
    );
    map(
        tuple((char('"'), opt(escaped), char('"'))),
        |(_, s, _)| s.unwrap_or_default(),
    )(input)
}

fn multiline_literal(input: &str) -> IResult<&str, &str> {
    terminated(
        verify(not_line_ending, |s: &str| !s.starts_with('.')),
        line_ending,
    )(input)
}

fn multiline_dotstart(input: &str) -> IResult<&str, &str> {
    preceded(
        char('.'),
        terminated(verify(not_line_ending, |s: &str| !s.is_empty()), line_ending),
    )(input)
}

// RFC 5228 2.4.2.2: `text:`, an ignored rest-of-line, then dot-stuffed
// lines up to a line holding a single `.`.
fn multi_line(input: &str) -> IResult<&str, String> {
    let (input, _) = tuple((
        tag("text:"),
        space0,
        alt((hash_comment, value((), line_ending))),
    ))(input)?;
    terminated(
        map(many0(alt((multiline_literal, multiline_dotstart))), |lines| {
            if lines.is_empty() {
                String::new()
            } else {
                let mut s = lines.join("\r\n");
                s.push_str("\r\n");
                s
            }
        }),
        pair(char('.'), alt((value((), line_ending), value((), eof)))),
    )(input)
}

fn quantifier_weight(q: Option<char>) -> u64 {
    match q {
        Some('K') => 1 << 10,
        Some('M') => 1 << 20,
        Some('G') => 1 << 30,
        _ => 1,
    }
}

fn number(input: &str) -> IResult<&str, u64> {
    map_res(
        pair(digit1, opt(one_of("KMG"))),
        |(digits, q): (&str, Option<char>)| {
            digits
                .parse::<u64>()
                .ok()
                .and_then(|n| n.checked_mul(quantifier_weight(q)))
                .ok_or("number out of range")
        },
    )(input)
}

fn tagged_id(input: &str) -> IResult<&str, &str> {
    preceded(char(':'), identifier)(input)
}

fn punctuation(input: &str) -> IResult<&str, Token> {
    map(one_of("[]{}(),;"), |c| match c {
        '[' => Token::LBracket,
        ']' => Token::RBracket,
        '{' => Token::LBrace,
        '}' => Token::RBrace,
        '(' => Token::LParen,
        ')' => Token::RParen,
        ',' => Token::Comma,
        ';' => Token::Semicolon,
        _ => unreachable!(),
    })(input)
}

fn token(input: &str) -> IResult<&str, Token> {
    alt((
        map(multi_line, Token::MultiLine),
        map(quoted_string, Token::Str),
        map(number, Token::Number),
        map(tagged_id, |t| Token::Tag(t.to_ascii_lowercase())),
        map(identifier, |id| Token::Identifier(id.to_string())),
        punctuation,
    ))(input)
}

fn advance<'a>(rest: &mut &'a str, next: &'a str, line: &mut u32, col: &mut u32) {
    let consumed = &rest[..rest.len() - next.len()];
    for c in consumed.chars() {
        if c == '\n' {
            *line += 1;
            *col = 1;
        } else {
            *col += 1;
        }
    }
    *rest = next;
}

/// Tokenize a whole script. Stops at the first error; the error carries the
/// position of the offending octet.
pub fn lex(src: &str, opts: &Options) -> Result<Vec<(Token, Position)>, Error> {
    let file: Arc<str> = Arc::from(opts.filename.as_str());
    let mut line: u32 = 1;
    let mut col: u32 = 1;
    let mut rest = src;
    let mut toks = Vec::new();

    loop {
        while let Ok((next, ())) = white_space(rest) {
            advance(&mut rest, next, &mut line, &mut col);
        }
        if rest.is_empty() {
            break;
        }
        let pos = Position {
            file: Arc::clone(&file),
            line,
            col,
        };
        match token(rest) {
            Ok((next, tok)) => {
                if toks.len() >= opts.max_tokens {
                    return Err(Error::LimitExceeded(format!(
                        "{}: script has more than {} tokens",
                        pos, opts.max_tokens
                    )));
                }
                toks.push((tok, pos));
                advance(&mut rest, next, &mut line, &mut col);
            }
            Err(_) => {
                let bad = rest.chars().next().unwrap();
                return Err(Error::Lex(pos, format!("unexpected character {:?}", bad)));
            }
        }
    }
    Ok(toks)
}

/// Random-access token cursor handed to the parser.
pub struct TokenStream {
    toks: Vec<(Token, Position)>,
    at: usize,
    eof: Position,
}

impl TokenStream {
    pub fn new(toks: Vec<(Token, Position)>, filename: &str) -> TokenStream {
        let eof = toks
            .last()
            .map(|(_, p)| p.clone())
            .unwrap_or(Position {
                file: Arc::from(filename),
                line: 1,
                col: 1,
            });
        TokenStream { toks, at: 0, eof }
    }

    pub fn peek(&self) -> Option<&Token> {
        self.toks.get(self.at).map(|(t, _)| t)
    }

    pub fn position(&self) -> Position {
        self.toks
            .get(self.at)
            .map(|(_, p)| p.clone())
            .unwrap_or_else(|| self.eof.clone())
    }

    pub fn advance(&mut self) -> Option<(Token, Position)> {
        let item = self.toks.get(self.at).cloned();
        if item.is_some() {
            self.at += 1;
        }
        item
    }
}

#[test]
fn lex_simple() {
    let toks = lex("require \"fileinto\";", &Options::default()).unwrap();
    assert_eq!(toks.len(), 3);
    assert_eq!(toks[0].0, Token::Identifier("require".into()));
    assert_eq!(toks[1].0, Token::Str("fileinto".into()));
    assert_eq!(toks[2].0, Token::Semicolon);
    assert_eq!((toks[0].1.line, toks[0].1.col), (1, 1));
    assert_eq!((toks[1].1.line, toks[1].1.col), (1, 9));
}

#[test]
fn lex_number_quantifier() {
    assert_eq!(number("1234K blah"), Ok((" blah", 1234 * 1024)));
    assert_eq!(number("1234 foo"), Ok((" foo", 1234)));
}

#[test]
fn lex_quoted_escapes() {
    assert_eq!(
        quoted_string(r#""asdf\"jk\\l""#),
        Ok(("", String::from(r#"asdf"jk\l"#)))
    );
    assert_eq!(quoted_string(r#""""#), Ok(("", String::new())));
}

#[test]
fn lex_comments() {
    let toks = lex("keep; # trailing\n/* block\ncomment */ stop;", &Options::default()).unwrap();
    assert_eq!(toks.len(), 4);
    assert_eq!(toks[2].0, Token::Identifier("stop".into()));
}

#[test]
fn lex_multi_line() {
    let (rest, s) =
        multi_line("text: #begin\r\nSome text\r\n.With a dot\r\n..\r\n.\r\n").unwrap();
    assert_eq!(rest, "");
    assert_eq!(s, "Some text\r\nWith a dot\r\n.\r\n");
}

#[test]
fn lex_tags_lowercased() {
    let toks = lex("header :Contains \"a\" \"b\"", &Options::default()).unwrap();
    assert_eq!(toks[1].0, Token::Tag("contains".into()));
}

#[test]
fn lex_token_cap() {
    let opts = Options {
        max_tokens: 2,
        ..Options::default()
    };
    assert!(matches!(
        lex("keep; stop;", &opts),
        Err(Error::LimitExceeded(_))
    ));
}

#[test]
fn lex_bad_character() {
    match lex("keep; %", &Options::default()) {
        Err(Error::Lex(pos, _)) => assert_eq!((pos.line, pos.col), (1, 7)),
        other => panic!("expected lex error, got {:?}", other.map(|v| v.len())),
    }
}
