use crate::error::Error;
use crate::lex::{Position, Token, TokenKind, TokenStream};

/// Parser options.
#[derive(Debug, Clone)]
pub struct Options {
    pub max_block_nesting: usize,
    pub max_test_nesting: usize,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            max_block_nesting: 15,
            max_test_nesting: 15,
        }
    }
}

/// One argument as it appears in the source. Tags are bound to their values
/// (if any) later, by the loader.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Number(u64),
    Str(String),
    List(Vec<String>),
    Tag(String),
}

#[derive(Debug, Clone)]
pub struct Command {
    pub name: String,
    pub position: Position,
    pub args: Vec<Value>,
    pub tests: Vec<Test>,
    pub block: Vec<Command>,
}

#[derive(Debug, Clone)]
pub struct Test {
    pub name: String,
    pub position: Position,
    pub args: Vec<Value>,
    pub tests: Vec<Test>,
}

pub fn parse(stream: TokenStream, opts: &Options) -> Result<Vec<Command>, Error> {
    let mut p = Parser { s: stream, opts };
    let cmds = p.commands(0)?;
    match p.s.peek() {
        None => Ok(cmds),
        Some(_) => Err(p.err("expected a command")),
    }
}

struct Parser<'o> {
    s: TokenStream,
    opts: &'o Options,
}

impl Parser<'_> {
    fn err(&self, msg: impl Into<String>) -> Error {
        Error::Parse(self.s.position(), msg.into())
    }

    fn expect(&mut self, want: &Token, what: &str) -> Result<(), Error> {
        match self.s.peek() {
            Some(t) if t == want => {
                self.s.advance();
                Ok(())
            }
            Some(t) => Err(self.err(format!(
                "expected {}, found {:?}",
                what,
                TokenKind::from(t)
            ))),
            None => Err(self.err(format!("expected {}, found end of script", what))),
        }
    }

    fn commands(&mut self, block_depth: usize) -> Result<Vec<Command>, Error> {
        let mut cmds = Vec::new();
        while let Some(Token::Identifier(_)) = self.s.peek() {
            cmds.push(self.command(block_depth)?);
        }
        Ok(cmds)
    }

    fn command(&mut self, block_depth: usize) -> Result<Command, Error> {
        let position = self.s.position();
        let name = match self.s.advance() {
            Some((Token::Identifier(id), _)) => id.to_ascii_lowercase(),
            _ => return Err(Error::Parse(position, "expected a command name".into())),
        };
        let args = self.arguments()?;
        let tests = self.test_list(0)?;
        let block = match self.s.peek() {
            Some(Token::LBrace) => {
                if block_depth >= self.opts.max_block_nesting {
                    return Err(self.err(format!(
                        "blocks nested deeper than {}",
                        self.opts.max_block_nesting
                    )));
                }
                self.s.advance();
                let block = self.commands(block_depth + 1)?;
                self.expect(&Token::RBrace, "\"}\"")?;
                block
            }
            Some(Token::Semicolon) => {
                self.s.advance();
                Vec::new()
            }
            _ => return Err(self.err("expected \";\" or a block")),
        };
        Ok(Command {
            name,
            position,
            args,
            tests,
            block,
        })
    }

    fn arguments(&mut self) -> Result<Vec<Value>, Error> {
        let mut args = Vec::new();
        loop {
            match self.s.peek() {
                Some(Token::Tag(_)) => {
                    if let Some((Token::Tag(t), _)) = self.s.advance() {
                        args.push(Value::Tag(t));
                    }
                }
                Some(Token::Number(_)) => {
                    if let Some((Token::Number(n), _)) = self.s.advance() {
                        args.push(Value::Number(n));
                    }
                }
                Some(Token::Str(_)) | Some(Token::MultiLine(_)) => {
                    args.push(Value::Str(self.string()?));
                }
                Some(Token::LBracket) => {
                    args.push(Value::List(self.string_list()?));
                }
                _ => return Ok(args),
            }
        }
    }

    fn string(&mut self) -> Result<String, Error> {
        match self.s.advance() {
            Some((Token::Str(s), _)) | Some((Token::MultiLine(s), _)) => Ok(s),
            _ => Err(self.err("expected a string")),
        }
    }

    // '[' string (',' string)* ']'; only strings are allowed inside.
    fn string_list(&mut self) -> Result<Vec<String>, Error> {
        self.expect(&Token::LBracket, "\"[\"")?;
        let mut items = vec![self.string()?];
        loop {
            match self.s.peek() {
                Some(Token::Comma) => {
                    self.s.advance();
                    items.push(self.string()?);
                }
                Some(Token::RBracket) => {
                    self.s.advance();
                    return Ok(items);
                }
                _ => return Err(self.err("expected \",\" or \"]\" in string list")),
            }
        }
    }

    fn test_list(&mut self, test_depth: usize) -> Result<Vec<Test>, Error> {
        match self.s.peek() {
            Some(Token::Identifier(_)) => Ok(vec![self.test(test_depth)?]),
            Some(Token::LParen) => {
                self.s.advance();
                let mut tests = vec![self.test(test_depth)?];
                loop {
                    match self.s.peek() {
                        Some(Token::Comma) => {
                            self.s.advance();
                            tests.push(self.test(test_depth)?);
                        }
                        Some(Token::RParen) => {
                            self.s.advance();
                            return Ok(tests);
                        }
                        _ => return Err(self.err("expected \",\" or \")\" in test list")),
                    }
                }
            }
            _ => Ok(Vec::new()),
        }
    }

    fn test(&mut self, test_depth: usize) -> Result<Test, Error> {
        if test_depth >= self.opts.max_test_nesting {
            return Err(self.err(format!(
                "tests nested deeper than {}",
                self.opts.max_test_nesting
            )));
        }
        let position = self.s.position();
        let name = match self.s.advance() {
            Some((Token::Identifier(id), _)) => id.to_ascii_lowercase(),
            _ => return Err(Error::Parse(position, "expected a test name".into())),
        };
        let args = self.arguments()?;
        let tests = self.test_list(test_depth + 1)?;
        Ok(Test {
            name,
            position,
            args,
            tests,
        })
    }
}

#[cfg(test)]
fn parse_str(src: &str) -> Result<Vec<Command>, Error> {
    let toks = crate::lex::lex(src, &crate::lex::Options::default())?;
    parse(TokenStream::new(toks, ""), &Options::default())
}

#[test]
fn parse_plain_command() {
    let cmds = parse_str("fileinto \"test\";").unwrap();
    assert_eq!(cmds.len(), 1);
    assert_eq!(cmds[0].name, "fileinto");
    assert_eq!(cmds[0].args, vec![Value::Str("test".into())]);
    assert!(cmds[0].block.is_empty());
}

#[test]
fn parse_control_with_tests() {
    let cmds = parse_str("if anyof (exists \"From\", size :over 100K) { keep; }").unwrap();
    assert_eq!(cmds.len(), 1);
    assert_eq!(cmds[0].tests.len(), 1);
    let anyof = &cmds[0].tests[0];
    assert_eq!(anyof.name, "anyof");
    assert_eq!(anyof.tests.len(), 2);
    assert_eq!(anyof.tests[1].args[0], Value::Tag("over".into()));
    assert_eq!(anyof.tests[1].args[1], Value::Number(100 * 1024));
    assert_eq!(cmds[0].block.len(), 1);
}

#[test]
fn parse_string_list() {
    let cmds = parse_str("require [\"fileinto\", \"copy\"];").unwrap();
    assert_eq!(
        cmds[0].args,
        vec![Value::List(vec!["fileinto".into(), "copy".into()])]
    );
}

#[test]
fn parse_rejects_missing_semicolon() {
    assert!(parse_str("keep").is_err());
    assert!(parse_str("keep; }").is_err());
}

#[test]
fn parse_rejects_non_string_in_list() {
    assert!(parse_str("require [\"a\", 5];").is_err());
}

#[test]
fn parse_test_nesting_cap() {
    let mut src = String::from("if ");
    for _ in 0..20 {
        src.push_str("not ");
    }
    src.push_str("true { keep; }");
    assert!(matches!(parse_str(&src), Err(Error::Parse(_, _))));
}

#[test]
fn parse_block_nesting_cap() {
    let mut src = String::new();
    for _ in 0..20 {
        src.push_str("if true { ");
    }
    src.push_str("keep;");
    for _ in 0..20 {
        src.push_str(" }");
    }
    assert!(matches!(parse_str(&src), Err(Error::Parse(_, _))));
}

#[test]
fn parse_positions() {
    let err = parse_str("keep; bad").unwrap_err();
    match err {
        // The stream is exhausted; the error points at the last token.
        Error::Parse(pos, _) => assert_eq!((pos.line, pos.col), (1, 7)),
        other => panic!("unexpected error: {other}"),
    }
}
