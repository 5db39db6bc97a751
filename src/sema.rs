pub(crate) mod cmds_load;
pub(crate) mod spec;
pub(crate) mod tests_load;

use std::collections::HashSet;

use crate::error::Error;
use crate::exec;
use crate::exec::datetime::DatePart;
use crate::lex::Position;
use crate::matcher::{AddressPart, MatcherTest};
use crate::parse;

/// Extensions this implementation knows how to load and evaluate. A script
/// may only `require` names that are both listed here and enabled by the
/// host.
pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    "fileinto",
    "envelope",
    "encoded-character",
    "comparator-i;octet",
    "comparator-i;ascii-casemap",
    "comparator-i;ascii-numeric",
    "comparator-i;unicode-casemap",
    "imap4flags",
    "variables",
    "relational",
    "vacation",
    "copy",
    "regex",
    "date",
    "index",
    "editheader",
    "mailbox",
    "subaddress",
    "vnd.dovecot.testsuite",
];

/// A loaded, immutable script. Safe to share between evaluations.
pub struct Script {
    pub(crate) commands: Vec<Cmd>,
    pub(crate) extensions: HashSet<String>,
    pub(crate) host_enabled: Option<Vec<String>>,
    pub(crate) opts: exec::Options,
}

impl Script {
    /// True when the script itself declared `require "name"`.
    pub fn requires_extension(&self, name: &str) -> bool {
        self.extensions.contains(name)
    }

    /// The extensions the script required, i.e. the set it may use.
    pub fn extensions(&self) -> &HashSet<String> {
        &self.extensions
    }
}

/// `set` value modifiers, ordered by RFC 5229 precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetModifier {
    Lower,
    Upper,
    LowerFirst,
    UpperFirst,
    QuoteWildcard,
    Length,
}

impl SetModifier {
    pub(crate) fn precedence(&self) -> u8 {
        match self {
            SetModifier::Lower | SetModifier::Upper => 40,
            SetModifier::LowerFirst | SetModifier::UpperFirst => 30,
            SetModifier::QuoteWildcard => 20,
            SetModifier::Length => 10,
        }
    }
}

/// A typed, loadtime-checked command.
#[derive(Debug, Clone)]
pub enum Cmd {
    If {
        branches: Vec<(TestNode, Vec<Cmd>)>,
        else_block: Option<Vec<Cmd>>,
    },
    Stop,
    Keep {
        flags: Option<Vec<String>>,
    },
    Discard,
    FileInto {
        mailbox: String,
        copy: bool,
        create: bool,
        flags: Option<Vec<String>>,
    },
    Redirect {
        address: String,
        copy: bool,
    },
    AddHeader {
        field: String,
        value: String,
        last: bool,
    },
    DeleteHeader {
        matcher: MatcherTest,
        field: String,
        index: u64,
        last: bool,
    },
    SetVariable {
        name: String,
        value: String,
        modifiers: Vec<SetModifier>,
    },
    SetFlag {
        flags: Vec<String>,
    },
    AddFlag {
        flags: Vec<String>,
    },
    RemoveFlag {
        flags: Vec<String>,
    },
    Vacation {
        days: u64,
        subject: String,
        from: String,
        addresses: Vec<String>,
        mime: bool,
        handle: String,
        reason: String,
    },
    // vnd.dovecot.testsuite
    TestCase {
        name: String,
        body: Vec<Cmd>,
    },
    TestFail {
        at: Position,
        message: String,
    },
    TestConfigSet {
        key: String,
        value: Option<String>,
    },
    TestSet {
        name: String,
        value: String,
    },
}

/// A typed, loadtime-checked test.
#[derive(Debug, Clone)]
pub enum TestNode {
    Address {
        matcher: MatcherTest,
        address_part: AddressPart,
        headers: Vec<String>,
    },
    Envelope {
        matcher: MatcherTest,
        address_part: AddressPart,
        fields: Vec<String>,
    },
    Header {
        matcher: MatcherTest,
        headers: Vec<String>,
    },
    Exists {
        headers: Vec<String>,
    },
    Size {
        over: bool,
        limit: u64,
    },
    AllOf(Vec<TestNode>),
    AnyOf(Vec<TestNode>),
    Not(Box<TestNode>),
    True,
    False,
    StringTest {
        matcher: MatcherTest,
        source: Vec<String>,
    },
    Date {
        matcher: MatcherTest,
        header: String,
        part: DatePart,
        zone: Option<String>,
        original_zone: bool,
        index: u64,
        last: bool,
    },
    CurrentDate {
        matcher: MatcherTest,
        part: DatePart,
        zone: Option<String>,
    },
    MailboxExists {
        mailboxes: Vec<String>,
    },
    // vnd.dovecot.testsuite
    ScriptCompile {
        path: String,
    },
    ScriptRun,
}

/// Bind a parsed command list to a typed [`Script`], enforcing extension
/// gating and per-command argument grammars.
pub fn load_script(
    cmds: &[parse::Command],
    opts: &exec::Options,
    enabled: Option<&[String]>,
) -> Result<Script, Error> {
    let mut script = Script {
        commands: Vec::new(),
        extensions: HashSet::new(),
        host_enabled: enabled.map(|e| e.to_vec()),
        opts: opts.clone(),
    };

    // `require` may only appear as a prefix of the command list.
    let mut idx = 0;
    while idx < cmds.len() && cmds[idx].name == "require" {
        load_require(&mut script, &cmds[idx])?;
        idx += 1;
    }
    script.commands = load_block(&script, &cmds[idx..])?;
    Ok(script)
}

fn load_require(script: &mut Script, cmd: &parse::Command) -> Result<(), Error> {
    if !cmd.tests.is_empty() || !cmd.block.is_empty() {
        return Err(Error::load(&cmd.position, "require takes no tests or block"));
    }
    let names = match cmd.args.as_slice() {
        [parse::Value::Str(s)] => vec![s.clone()],
        [parse::Value::List(l)] => l.clone(),
        _ => {
            return Err(Error::load(
                &cmd.position,
                "require takes a single string or string list",
            ))
        }
    };
    for name in names {
        let supported = SUPPORTED_EXTENSIONS.contains(&name.as_str());
        let host_enabled = script
            .host_enabled
            .as_ref()
            .is_some_and(|e| e.iter().any(|n| n == &name));
        if !supported || !host_enabled {
            return Err(Error::ExtensionMissing(cmd.position.clone(), name));
        }
        script.extensions.insert(name);
    }
    Ok(())
}

/// Load the commands of one block, assembling if/elsif/else chains.
pub(crate) fn load_block(script: &Script, cmds: &[parse::Command]) -> Result<Vec<Cmd>, Error> {
    let mut loaded = Vec::new();
    let mut idx = 0;
    while idx < cmds.len() {
        let cmd = &cmds[idx];
        match cmd.name.as_str() {
            "require" => {
                return Err(Error::load(
                    &cmd.position,
                    "require must precede all other commands",
                ))
            }
            "if" => {
                let (chain, consumed) = load_if_chain(script, &cmds[idx..])?;
                loaded.push(chain);
                idx += consumed;
            }
            "elsif" | "else" => {
                return Err(Error::load(
                    &cmd.position,
                    format!("{} without a preceding if", cmd.name),
                ))
            }
            _ => {
                loaded.push(cmds_load::load_command(script, cmd)?);
                idx += 1;
            }
        }
    }
    Ok(loaded)
}

fn load_if_chain(script: &Script, cmds: &[parse::Command]) -> Result<(Cmd, usize), Error> {
    let mut branches = vec![load_branch(script, &cmds[0])?];
    let mut else_block = None;
    let mut consumed = 1;
    while consumed < cmds.len() {
        let cmd = &cmds[consumed];
        match cmd.name.as_str() {
            "elsif" => {
                branches.push(load_branch(script, cmd)?);
                consumed += 1;
            }
            "else" => {
                if !cmd.args.is_empty() || !cmd.tests.is_empty() {
                    return Err(Error::load(&cmd.position, "else takes no arguments"));
                }
                else_block = Some(load_block(script, &cmd.block)?);
                consumed += 1;
                break;
            }
            _ => break,
        }
    }
    Ok((
        Cmd::If {
            branches,
            else_block,
        },
        consumed,
    ))
}

fn load_branch(
    script: &Script,
    cmd: &parse::Command,
) -> Result<(TestNode, Vec<Cmd>), Error> {
    if !cmd.args.is_empty() {
        return Err(Error::load(
            &cmd.position,
            format!("{} takes no non-test arguments", cmd.name),
        ));
    }
    if cmd.tests.len() != 1 {
        return Err(Error::load(
            &cmd.position,
            format!("{} takes exactly one test", cmd.name),
        ));
    }
    let test = tests_load::load_test(script, &cmd.tests[0])?;
    let block = load_block(script, &cmd.block)?;
    Ok((test, block))
}
