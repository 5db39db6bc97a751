pub(crate) mod address;
pub(crate) mod check;
pub mod datetime;
pub mod headers;
pub(crate) mod testsuite;
pub(crate) mod vars;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tracing::warn;

use crate::error::Error;
use crate::lex::Position;
use crate::message::{Envelope, Message, Namespace, Policy};
use crate::sema::{Cmd, Script};
use self::headers::HeaderEdit;
use self::vars::{apply_modifier, expand_vars};

/// Interpreter options.
#[derive(Debug, Clone)]
pub struct Options {
    pub max_redirects: usize,
    pub max_variable_count: usize,
    pub max_variable_name_len: usize,
    pub max_variable_len: usize,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            max_redirects: 5,
            max_variable_count: 128,
            max_variable_name_len: 32,
            max_variable_len: 4000,
        }
    }
}

pub(crate) const DEFAULT_MAX_VARIABLE_LEN: usize = 4000;

/// Deadline and cancellation carried through one evaluation, including into
/// host-supplied operations.
#[derive(Debug, Clone, Default)]
pub struct Context {
    deadline: Option<Instant>,
    cancel: Option<Arc<AtomicBool>>,
}

impl Context {
    pub fn new() -> Context {
        Context::default()
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Context {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Context {
        self.cancel = Some(flag);
        self
    }

    pub fn is_canceled(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
            || self
                .cancel
                .as_ref()
                .is_some_and(|c| c.load(Ordering::Relaxed))
    }

    pub(crate) fn check(&self) -> Result<(), Error> {
        if self.is_canceled() {
            Err(Error::Canceled)
        } else {
            Ok(())
        }
    }
}

/// An autoresponse computed by the `vacation` command. Sending it, and
/// remembering that it was sent, is the host's business.
#[derive(Debug, Clone, PartialEq)]
pub struct VacationResponse {
    pub from: String,
    pub subject: String,
    pub body: String,
    pub is_mime: bool,
    pub handle: String,
    pub days: u64,
}

/// One failed testsuite case, reported by the `test` harness.
#[derive(Debug, Clone)]
pub struct TestFailure {
    pub name: String,
    pub message: String,
    pub position: Option<Position>,
}

/// Per-message evaluation state. Created fresh for every message, mutated
/// by evaluation, read by the host afterwards. The host must not act on it
/// when `execute` returned an error.
pub struct RuntimeData {
    pub script: Arc<Script>,
    pub policy: Arc<dyn Policy>,
    pub envelope: Arc<dyn Envelope>,
    pub msg: Arc<dyn Message>,

    /// Default delivery still applies. Cleared by discard, vacation and
    /// non-`:copy` fileinto/redirect; never by keep.
    pub implicit_keep: bool,
    /// An explicit `keep` ran.
    pub keep: bool,
    pub mailboxes: Vec<String>,
    pub redirect_addr: Vec<String>,
    /// IMAP flags; lower-cased, de-duplicated, insertion-ordered.
    pub flags: Vec<String>,
    pub variables: HashMap<String, String>,
    pub header_edits: Vec<HeaderEdit>,
    /// Pending autoresponses keyed by envelope sender.
    pub vacation_responses: HashMap<String, VacationResponse>,
    /// File view for testsuite fixture scripts.
    pub namespace: Option<Arc<dyn Namespace>>,
    /// Failures recorded by testsuite `test` cases.
    pub test_report: Vec<TestFailure>,

    pub(crate) limits: Options,
    pub(crate) match_variables: Vec<String>,
    pub(crate) test_fail_message: String,
    pub(crate) test_fail_at: Option<Position>,
    pub(crate) test_script: Option<Arc<Script>>,
}

impl RuntimeData {
    pub fn new(
        script: Arc<Script>,
        policy: Arc<dyn Policy>,
        envelope: Arc<dyn Envelope>,
        msg: Arc<dyn Message>,
    ) -> RuntimeData {
        let limits = script.opts.clone();
        RuntimeData {
            script,
            policy,
            envelope,
            msg,
            implicit_keep: true,
            keep: false,
            mailboxes: Vec::new(),
            redirect_addr: Vec::new(),
            flags: Vec::new(),
            variables: HashMap::new(),
            header_edits: Vec::new(),
            vacation_responses: HashMap::new(),
            namespace: None,
            test_report: Vec::new(),
            limits,
            match_variables: Vec::new(),
            test_fail_message: String::new(),
            test_fail_at: None,
            test_script: None,
        }
    }

    /// Snapshot for an isolated nested evaluation (testsuite cases and
    /// sub-scripts). Mutations of the fork never reach `self`.
    pub fn fork(&self) -> RuntimeData {
        RuntimeData {
            script: Arc::clone(&self.script),
            policy: Arc::clone(&self.policy),
            envelope: Arc::clone(&self.envelope),
            msg: Arc::clone(&self.msg),
            implicit_keep: self.implicit_keep,
            keep: self.keep,
            mailboxes: self.mailboxes.clone(),
            redirect_addr: self.redirect_addr.clone(),
            flags: self.flags.clone(),
            variables: self.variables.clone(),
            header_edits: self.header_edits.clone(),
            vacation_responses: self.vacation_responses.clone(),
            namespace: self.namespace.clone(),
            test_report: Vec::new(),
            limits: self.limits.clone(),
            match_variables: self.match_variables.clone(),
            test_fail_message: String::new(),
            test_fail_at: None,
            test_script: self.test_script.clone(),
        }
    }

    /// Header values with the edit journal applied.
    pub fn header_get(&self, name: &str) -> Result<Vec<String>, Error> {
        let values = self.msg.header_get(name).map_err(Error::Host)?;
        Ok(headers::apply_edits(&self.header_edits, name, values))
    }

    pub(crate) fn set_match_variables(&mut self, captures: Vec<String>) {
        self.match_variables = captures;
    }

    pub(crate) fn set_variable(&mut self, name: &str, value: String) -> Result<(), Error> {
        let name = name.to_ascii_lowercase();
        let mut value = value;
        if value.chars().count() > self.limits.max_variable_len {
            value = value.chars().take(self.limits.max_variable_len).collect();
        }
        if !self.variables.contains_key(&name)
            && self.variables.len() >= self.limits.max_variable_count
        {
            return Err(Error::LimitExceeded(format!(
                "more than {} variables",
                self.limits.max_variable_count
            )));
        }
        self.variables.insert(name, value);
        Ok(())
    }

    fn assign_flags(&mut self, flags: Vec<String>) {
        self.flags.clear();
        self.add_flags(flags);
    }

    fn add_flags(&mut self, flags: Vec<String>) {
        for flag in flags {
            if !self.flags.contains(&flag) {
                self.flags.push(flag);
            }
        }
    }

    fn remove_flags(&mut self, flags: &[String]) {
        self.flags.retain(|f| !flags.contains(f));
    }
}

// Flag lists are case-insensitive; a single string may carry several
// space-separated flags (RFC 5232).
fn canonical_flags(d: &RuntimeData, flags: &[String]) -> Vec<String> {
    let mut out = Vec::new();
    for flag in flags {
        for part in expand_vars(d, flag).split_whitespace() {
            let part = part.to_ascii_lowercase();
            if !out.contains(&part) {
                out.push(part);
            }
        }
    }
    out
}

impl Script {
    /// Evaluate the script against one message. On error the action set in
    /// `d` is partial and must be discarded by the host.
    pub fn execute(&self, ctx: &Context, d: &mut RuntimeData) -> Result<(), Error> {
        match execute_block(ctx, d, &self.commands) {
            Ok(()) | Err(Error::Stop) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

pub(crate) fn execute_block(
    ctx: &Context,
    d: &mut RuntimeData,
    cmds: &[Cmd],
) -> Result<(), Error> {
    for cmd in cmds {
        ctx.check()?;
        execute_command(ctx, d, cmd)?;
    }
    Ok(())
}

fn execute_command(ctx: &Context, d: &mut RuntimeData, cmd: &Cmd) -> Result<(), Error> {
    match cmd {
        Cmd::If {
            branches,
            else_block,
        } => {
            for (test, block) in branches {
                if test.check(ctx, d)? {
                    return execute_block(ctx, d, block);
                }
            }
            if let Some(block) = else_block {
                return execute_block(ctx, d, block);
            }
            Ok(())
        }
        Cmd::Stop => Err(Error::Stop),
        Cmd::Keep { flags } => {
            if let Some(flags) = flags {
                let flags = canonical_flags(d, flags);
                d.assign_flags(flags);
            }
            d.keep = true;
            Ok(())
        }
        Cmd::Discard => {
            d.implicit_keep = false;
            Ok(())
        }
        Cmd::FileInto {
            mailbox,
            copy,
            create,
            flags,
        } => {
            let mailbox = expand_vars(d, mailbox);
            if let Some(flags) = flags {
                let flags = canonical_flags(d, flags);
                d.assign_flags(flags);
            }
            if *create {
                if let Some(creator) = d.policy.mailbox_creator() {
                    ctx.check()?;
                    if let Err(e) = creator.create_mailbox(ctx, &mailbox) {
                        warn!(mailbox = %mailbox, error = %e, "mailbox creation failed");
                    }
                }
            }
            d.mailboxes.push(mailbox);
            if !*copy {
                d.implicit_keep = false;
            }
            Ok(())
        }
        Cmd::Redirect { address, copy } => {
            if d.redirect_addr.len() >= d.limits.max_redirects {
                return Err(Error::LimitExceeded(format!(
                    "more than {} redirects",
                    d.limits.max_redirects
                )));
            }
            d.redirect_addr.push(expand_vars(d, address));
            if !*copy {
                d.implicit_keep = false;
            }
            Ok(())
        }
        Cmd::AddHeader { field, value, last } => {
            let field = expand_vars(d, field);
            let value = expand_vars(d, value);
            // RFC 5293 recommends ignoring invalid names silently.
            if !headers::is_valid_header_name(&field) {
                return Ok(());
            }
            d.header_edits.push(HeaderEdit::Add {
                field,
                value,
                last: *last,
            });
            Ok(())
        }
        Cmd::DeleteHeader {
            matcher,
            field,
            index,
            last,
        } => {
            let field = expand_vars(d, field);
            if !headers::is_valid_header_name(&field) || headers::is_protected_header(&field) {
                return Ok(());
            }
            if matcher.keys.is_empty() {
                d.header_edits.push(HeaderEdit::Delete {
                    field,
                    value: None,
                    index: *index,
                    last: *last,
                });
                return Ok(());
            }
            let values = d.header_get(&field)?;
            if values.is_empty() {
                return Ok(());
            }
            if *index > 0 {
                let idx = if *last {
                    values.len() as i64 - *index as i64
                } else {
                    *index as i64 - 1
                };
                if idx < 0 || idx as usize >= values.len() {
                    return Ok(());
                }
                let value = &values[idx as usize];
                if matcher.try_match(d, value.trim())? {
                    d.header_edits.push(HeaderEdit::Delete {
                        field,
                        value: Some(value.clone()),
                        index: *index,
                        last: *last,
                    });
                }
            } else {
                for value in values {
                    if matcher.try_match(d, value.trim())? {
                        d.header_edits.push(HeaderEdit::Delete {
                            field: field.clone(),
                            value: Some(value),
                            index: 0,
                            last: false,
                        });
                    }
                }
            }
            Ok(())
        }
        Cmd::SetVariable {
            name,
            value,
            modifiers,
        } => {
            let mut value = expand_vars(d, value);
            for m in modifiers {
                value = apply_modifier(*m, &value);
            }
            d.set_variable(name, value)
        }
        Cmd::SetFlag { flags } => {
            let flags = canonical_flags(d, flags);
            d.assign_flags(flags);
            Ok(())
        }
        Cmd::AddFlag { flags } => {
            let flags = canonical_flags(d, flags);
            d.add_flags(flags);
            Ok(())
        }
        Cmd::RemoveFlag { flags } => {
            let flags = canonical_flags(d, flags);
            d.remove_flags(&flags);
            Ok(())
        }
        Cmd::Vacation {
            days,
            subject,
            from,
            addresses,
            mime,
            handle,
            reason,
        } => execute_vacation(d, *days, subject, from, addresses, *mime, handle, reason),
        Cmd::TestCase { name, body } => testsuite::run_test_case(ctx, d, name, body),
        Cmd::TestFail { at, message } => {
            d.test_fail_message = expand_vars(d, message);
            d.test_fail_at = Some(at.clone());
            Err(Error::Stop)
        }
        Cmd::TestConfigSet { key, value } => testsuite::config_set(d, key, value.as_deref()),
        Cmd::TestSet { name, value } => testsuite::test_set(d, name, value),
    }
}

#[allow(clippy::too_many_arguments)]
fn execute_vacation(
    d: &mut RuntimeData,
    days: u64,
    subject: &str,
    from: &str,
    addresses: &[String],
    mime: bool,
    handle: &str,
    reason: &str,
) -> Result<(), Error> {
    let mut subject = expand_vars(d, subject);
    if subject.is_empty() {
        subject = "Automated reply".to_string();
    }
    let from = expand_vars(d, from);
    let reason = expand_vars(d, reason);
    let handle = expand_vars(d, handle);
    let addresses: Vec<String> = addresses.iter().map(|a| expand_vars(d, a)).collect();

    let sender = d.envelope.envelope_from();
    if sender.is_empty() {
        return Err(Error::Host("vacation: no envelope sender".into()));
    }
    // Never autorespond to one of our own addresses.
    if addresses.iter().any(|a| a == &sender) {
        return Ok(());
    }

    d.vacation_responses.insert(
        sender,
        VacationResponse {
            from,
            subject,
            body: reason,
            is_mime: mime,
            handle,
            days,
        },
    );
    d.implicit_keep = false;
    Ok(())
}
