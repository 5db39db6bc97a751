use std::fmt::Display;
use std::fs;
use std::path::PathBuf;

use crate::exec::Context;

/// Errors returned by host-supplied interfaces. Propagated to the embedder
/// unchanged, wrapped in [`crate::Error::Host`].
pub type HostError = Box<dyn std::error::Error + Send + Sync>;

/// SMTP envelope of the message under evaluation.
pub trait Envelope {
    fn envelope_from(&self) -> String;
    fn envelope_to(&self) -> String;
    fn auth_username(&self) -> String;
}

/// Read-only view of the message under evaluation. Only headers and the
/// total size are consulted; bodies are out of scope.
pub trait Message {
    /// All values of the named header, in order. The name is matched
    /// case-insensitively.
    fn header_get(&self, name: &str) -> Result<Vec<String>, HostError>;
    fn message_size(&self) -> usize;
}

/// Host policy hook. The optional accessors let a policy opt into mailbox
/// checking and creation; the defaults leave both capabilities absent.
pub trait Policy {
    fn mailbox_checker(&self) -> Option<&dyn MailboxChecker> {
        None
    }
    fn mailbox_creator(&self) -> Option<&dyn MailboxCreator> {
        None
    }
}

/// Backs the `mailboxexists` test. When the policy supplies no checker the
/// test is optimistic and reports true.
pub trait MailboxChecker {
    fn mailbox_exists(&self, ctx: &Context, mailbox: &str) -> Result<bool, HostError>;
}

/// Backs `fileinto :create`. When the policy supplies no creator the tag is
/// advisory and creation is deferred to delivery.
pub trait MailboxCreator {
    fn create_mailbox(&self, ctx: &Context, mailbox: &str) -> Result<(), HostError>;
}

/// Read-only file view used by the testsuite dialect to fetch fixture
/// scripts (`test_script_compile`).
pub trait Namespace {
    fn read_file(&self, path: &str) -> Result<Vec<u8>, HostError>;
}

/// Directory-backed [`Namespace`].
pub struct DirNamespace {
    root: PathBuf,
}

impl DirNamespace {
    pub fn new(root: impl Into<PathBuf>) -> DirNamespace {
        DirNamespace { root: root.into() }
    }
}

impl Namespace for DirNamespace {
    fn read_file(&self, path: &str) -> Result<Vec<u8>, HostError> {
        Ok(fs::read(self.root.join(path))?)
    }
}

/// Policy with no capabilities; handy for tests and simple hosts.
#[derive(Debug, Default, Clone, Copy)]
pub struct DummyPolicy;

impl Policy for DummyPolicy {}

#[derive(Debug, Default, Clone)]
pub struct EnvelopeStatic {
    pub from: String,
    pub to: String,
    pub auth: String,
}

impl Envelope for EnvelopeStatic {
    fn envelope_from(&self) -> String {
        self.from.clone()
    }
    fn envelope_to(&self) -> String {
        self.to.clone()
    }
    fn auth_username(&self) -> String {
        self.auth.clone()
    }
}

#[derive(Debug)]
pub enum MessageParseError {
    ContinuationAtBeginning,
    MalformedHeader(String),
}

impl Display for MessageParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageParseError::ContinuationAtBeginning => {
                write!(f, "continuation line at beginning of message")
            }
            MessageParseError::MalformedHeader(line) => {
                write!(f, "malformed header line: {}", line)
            }
        }
    }
}

impl std::error::Error for MessageParseError {}

/// In-memory message: a parsed header block plus a size.
#[derive(Debug, Default, Clone)]
pub struct MessageStatic {
    pub size: usize,
    pub headers: Vec<(String, String)>,
}

impl MessageStatic {
    /// Parse the header block of an RFC 5322 message. Folded lines are
    /// unfolded with a single space; anything after the first empty line is
    /// counted only towards the size.
    pub fn parse(text: &str) -> Result<MessageStatic, MessageParseError> {
        let mut headers: Vec<(String, String)> = Vec::new();
        for line in text.lines() {
            if line.is_empty() {
                break;
            }
            let is_continuation = line.starts_with(|c: char| c == ' ' || c == '\t');
            if is_continuation {
                let (_, value) = headers
                    .last_mut()
                    .ok_or(MessageParseError::ContinuationAtBeginning)?;
                value.push(' ');
                value.push_str(line.trim());
            } else {
                let (name, value) = line
                    .split_once(':')
                    .ok_or_else(|| MessageParseError::MalformedHeader(line.to_string()))?;
                headers.push((name.to_string(), value.trim().to_string()));
            }
        }
        Ok(MessageStatic {
            size: text.len(),
            headers,
        })
    }
}

impl Message for MessageStatic {
    fn header_get(&self, name: &str) -> Result<Vec<String>, HostError> {
        Ok(self
            .headers
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.clone())
            .collect())
    }

    fn message_size(&self) -> usize {
        self.size
    }
}

#[test]
fn parse_header_block() {
    let text = "To: a@example.org\r\nX-Long: first\r\n second\r\nTo: b@example.org\r\n\r\nbody ignored\r\n";
    let msg = MessageStatic::parse(text).unwrap();
    assert_eq!(
        msg.header_get("to").unwrap(),
        vec!["a@example.org", "b@example.org"]
    );
    assert_eq!(msg.header_get("x-long").unwrap(), vec!["first second"]);
    assert!(msg.header_get("absent").unwrap().is_empty());
    assert_eq!(msg.message_size(), text.len());
}

#[test]
fn parse_rejects_leading_continuation() {
    assert!(MessageStatic::parse(" folded\r\n").is_err());
}
