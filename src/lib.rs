//! Embeddable evaluator for the Sieve mail filtering language (RFC 5228)
//! and a curated set of extensions: envelope, fileinto, encoded-character,
//! imap4flags, variables, relational, vacation, copy, regex, date, index,
//! editheader, mailbox, subaddress, plus the `vnd.dovecot.testsuite`
//! self-test dialect.
//!
//! A host compiles a script once with [`load`] and evaluates it against
//! each incoming message:
//!
//! ```
//! use std::sync::Arc;
//! use rsieve::message::{DummyPolicy, EnvelopeStatic, MessageStatic};
//! use rsieve::{load, Context, Options, RuntimeData};
//!
//! let script = load(
//!     r#"require "fileinto"; if header :contains "subject" "sale" { fileinto "ads"; }"#,
//!     Options::with_all_extensions(),
//! )
//! .unwrap();
//! let script = Arc::new(script);
//!
//! let msg = MessageStatic::parse("Subject: BIG SALE\r\n\r\n").unwrap();
//! let mut data = RuntimeData::new(
//!     Arc::clone(&script),
//!     Arc::new(DummyPolicy),
//!     Arc::new(EnvelopeStatic::default()),
//!     Arc::new(msg),
//! );
//! script.execute(&Context::new(), &mut data).unwrap();
//! assert_eq!(data.mailboxes, ["ads"]);
//! assert!(!data.implicit_keep);
//! ```
//!
//! Delivery, autoresponses and mailbox access stay with the host: the
//! evaluator only records the requested actions in [`RuntimeData`].

pub mod error;
pub mod exec;
pub mod lex;
pub mod matcher;
pub mod message;
pub mod parse;
pub mod sema;

pub use error::Error;
pub use exec::{Context, RuntimeData, TestFailure, VacationResponse};
pub use sema::{Script, SUPPORTED_EXTENSIONS};

/// Loading options, nested per stage like the pipeline itself.
#[derive(Debug, Clone, Default)]
pub struct Options {
    pub lexer: lex::Options,
    pub parser: parse::Options,
    pub interp: exec::Options,
    /// Extensions the host offers. `None` disables every optional
    /// extension: only the RFC 5228 core remains available.
    pub enabled_extensions: Option<Vec<String>>,
}

impl Options {
    /// Options with every supported extension enabled.
    pub fn with_all_extensions() -> Options {
        Options {
            enabled_extensions: Some(
                SUPPORTED_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
            ),
            ..Options::default()
        }
    }
}

/// Compile a script: lex, parse, then bind to typed commands while checking
/// extension gates and argument grammars. The result is immutable and may
/// be shared across evaluations.
pub fn load(src: &str, opts: Options) -> Result<Script, Error> {
    let toks = lex::lex(src, &opts.lexer)?;
    let cmds = parse::parse(
        lex::TokenStream::new(toks, &opts.lexer.filename),
        &opts.parser,
    )?;
    sema::load_script(&cmds, &opts.interp, opts.enabled_extensions.as_deref())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::message::{DirNamespace, DummyPolicy, EnvelopeStatic, MessageStatic};

    const EML: &str = "Date: Tue, 1 Apr 1997 09:06:31 -0800 (PST)\n\
                       From: coyote@desert.example.org\n\
                       To: roadrunner@acme.example.com\n\
                       Subject: I have a present for you\n\
                       \n\
                       Look, I'm sorry about the whole anvil thing.\n";

    const EML_SUBADDRESS: &str = "Date: Tue, 1 Apr 1997 09:06:31 -0800 (PST)\n\
                                  From: ken+sieve@example.org\n\
                                  To: user+mailing-list@acme.example.com\n\
                                  Cc: admin+support@example.org\n\
                                  Subject: Test subaddress\n\
                                  \n\
                                  Test message with subaddress\n";

    #[derive(Debug, Default, PartialEq)]
    struct Outcome {
        redirect: Vec<String>,
        fileinto: Vec<String>,
        implicit_keep: bool,
        keep: bool,
        flags: Vec<String>,
    }

    fn kept() -> Outcome {
        Outcome {
            keep: true,
            implicit_keep: true,
            ..Outcome::default()
        }
    }

    fn not_kept() -> Outcome {
        Outcome {
            implicit_keep: true,
            ..Outcome::default()
        }
    }

    fn eval(src: &str, eml: &str, env: EnvelopeStatic) -> Result<RuntimeData, Error> {
        let script = Arc::new(load(src, Options::with_all_extensions())?);
        let msg = MessageStatic::parse(eml).unwrap();
        let mut data = RuntimeData::new(
            Arc::clone(&script),
            Arc::new(DummyPolicy),
            Arc::new(env),
            Arc::new(msg),
        );
        script.execute(&Context::new(), &mut data)?;
        Ok(data)
    }

    fn test_env() -> EnvelopeStatic {
        EnvelopeStatic {
            from: "from@test.com".into(),
            to: "to@test.com".into(),
            auth: String::new(),
        }
    }

    fn run_on(src: &str, eml: &str) -> Result<Outcome, Error> {
        let data = eval(src, eml, test_env())?;
        Ok(Outcome {
            redirect: data.redirect_addr,
            fileinto: data.mailboxes,
            implicit_keep: data.implicit_keep,
            keep: data.keep,
            flags: data.flags,
        })
    }

    fn run(src: &str) -> Outcome {
        run_on(src, EML).unwrap()
    }

    fn fails(src: &str) {
        assert!(run_on(src, EML).is_err(), "expected failure: {src}");
    }

    #[test]
    fn fileinto() {
        assert_eq!(
            run(r#"require "fileinto"; fileinto "test";"#),
            Outcome {
                fileinto: vec!["test".into()],
                ..Outcome::default()
            }
        );
        assert_eq!(
            run(r#"require "fileinto"; fileinto "test"; fileinto "test2";"#),
            Outcome {
                fileinto: vec!["test".into(), "test2".into()],
                ..Outcome::default()
            }
        );
    }

    #[test]
    fn redirect() {
        assert_eq!(
            run(r#"redirect "user@example.com";"#),
            Outcome {
                redirect: vec!["user@example.com".into()],
                ..Outcome::default()
            }
        );
    }

    #[test]
    fn redirect_cap() {
        let src = r#"redirect "a@b.c";"#.repeat(6);
        assert!(matches!(run_on(&src, EML), Err(Error::LimitExceeded(_))));
    }

    #[test]
    fn address() {
        assert_eq!(
            run(r#"if address :is "From" "coyote@desert.example.org" { keep; }"#),
            kept()
        );
        assert_eq!(
            run(r#"if address :contains :domain "To" "acme.example.com" { keep; }"#),
            kept()
        );
        assert_eq!(
            run(r#"if address :localpart "From" "coyote" { keep; }"#),
            kept()
        );
    }

    #[test]
    fn address_with_display_name_and_comment() {
        let eml = "From: Wile E. Coyote <coyote@desert.example.org>\n\
                   Sender: tss(no spam)@fi.iki\n\n";
        assert_eq!(
            run_on(r#"if address :is "from" "coyote@desert.example.org" { keep; }"#, eml)
                .unwrap(),
            kept()
        );
        assert_eq!(
            run_on(r#"if address :is "sender" "tss@fi.iki" { keep; }"#, eml).unwrap(),
            kept()
        );
        // non-address headers are skipped entirely
        assert_eq!(
            run_on(r#"if address :contains "subject" "present" { keep; }"#, EML).unwrap(),
            not_kept()
        );
    }

    #[test]
    fn envelope() {
        assert_eq!(
            run(r#"require "envelope"; if envelope :is "from" "from@test.com" { keep; }"#),
            kept()
        );
        assert_eq!(
            run(
                r#"require ["envelope", "copy"];
                   if envelope :contains "to" "test.com" { redirect :copy "another@example.com"; }"#
            ),
            Outcome {
                redirect: vec!["another@example.com".into()],
                implicit_keep: true,
                ..Outcome::default()
            }
        );
    }

    #[test]
    fn envelope_invalid_address_never_matches() {
        let env = EnvelopeStatic {
            from: "not-an-address".into(),
            to: "to@test.com".into(),
            auth: String::new(),
        };
        let data = eval(
            r#"require "envelope"; if envelope :is "from" "not-an-address" { keep; }"#,
            EML,
            env,
        )
        .unwrap();
        assert!(!data.keep);
    }

    #[test]
    fn exists() {
        assert_eq!(run(r#"if exists "From" { keep; }"#), kept());
        assert_eq!(
            run(r#"if exists "X-Nonexistent-Header" { discard; }"#),
            not_kept()
        );
        assert_eq!(
            run(r#"if exists ["X-Nonexistent-Header", "Subject"] { keep; }"#),
            not_kept()
        );
        assert_eq!(run(r#"if exists ["Subject", "From"] { keep; }"#), kept());
    }

    #[test]
    fn header() {
        assert_eq!(
            run(r#"if header :is "Subject" "I have a present for you" { keep; }"#),
            kept()
        );
        assert_eq!(
            run(r#"if header :contains "From" "desert.example" { keep; }"#),
            kept()
        );
        assert_eq!(
            run(r#"if header :is "Subject" "Not the right subject" { keep; }"#),
            not_kept()
        );
    }

    #[test]
    fn header_count() {
        assert_eq!(
            run(r#"require "relational"; if header :count "ge" ["To", "From"] "2" { keep; }"#),
            kept()
        );
        assert_eq!(
            run(r#"require "relational"; if header :count "gt" ["To", "From"] "2" { keep; }"#),
            not_kept()
        );
    }

    #[test]
    fn regex() {
        assert_eq!(
            run(
                r#"require ["variables", "regex"];
                   set "subject" "I have a present for you";
                   if string :comparator "i;octet" :regex "${subject}" "I have a (.*) for you" { keep; }"#
            ),
            kept()
        );
        assert_eq!(
            run(r#"require "regex"; if header :comparator "i;octet" :regex "Subject" "I have a (.*) for you" { keep; }"#),
            kept()
        );
        assert_eq!(
            run(r#"require "regex"; if header :regex "Subject" "(?i)I HAVE A (.*) FOR YOU" { keep; }"#),
            kept()
        );
        assert_eq!(
            run(r#"require "regex"; if header :regex "Subject" "No match pattern" { keep; }"#),
            not_kept()
        );
        fails(r#"if header :regex "Subject" "test" { keep; }"#);
    }

    #[test]
    fn logical_composition() {
        assert_eq!(
            run(r#"if allof (exists "Subject", size :over 100) { keep; }"#),
            kept()
        );
        assert_eq!(
            run(r#"if allof (exists "X-Nonexistent-Header", size :over 100) { keep; }"#),
            not_kept()
        );
        assert_eq!(
            run(r#"if anyof (exists "X-Nonexistent-Header", size :over 100) { keep; }"#),
            kept()
        );
        assert_eq!(
            run(r#"if anyof (exists "X-Nonexistent-Header", size :under 100) { keep; }"#),
            not_kept()
        );
        assert_eq!(run(r#"if not exists "From" { keep; }"#), not_kept());
        assert_eq!(run(r#"if not exists "X-Nonexistent" { keep; }"#), kept());
        assert_eq!(
            run(r#"if not allof (exists "From", exists "X-Nonexistent") { keep; }"#),
            kept()
        );
    }

    #[test]
    fn size_boundaries() {
        let n = EML.len();
        // strict comparisons on both sides
        assert_eq!(run(&format!("if size :over {} {{ keep; }}", n - 1)), kept());
        assert_eq!(run(&format!("if size :over {n} {{ keep; }}")), not_kept());
        assert_eq!(run(&format!("if size :over {} {{ keep; }}", n + 1)), not_kept());
        assert_eq!(run(&format!("if size :under {} {{ keep; }}", n + 1)), kept());
        assert_eq!(run(&format!("if size :under {n} {{ keep; }}")), not_kept());
        assert_eq!(run(&format!("if size :under {} {{ keep; }}", n - 1)), not_kept());
    }

    #[test]
    fn size_argument_errors() {
        fails(r#"if size 100 { keep; }"#);
        fails(r#"if size :over 100 :under 200 { keep; }"#);
        fails(r#"if size :over "abc" { keep; }"#);
    }

    #[test]
    fn date() {
        assert_eq!(
            run(r#"require "date"; if date :is :originalzone "date" "year" "1997" { keep; }"#),
            kept()
        );
        assert_eq!(
            run(r#"require "date"; if date :is :originalzone "date" "month" "04" { keep; }"#),
            kept()
        );
        assert_eq!(
            run(r#"require "date"; if date :is :originalzone "date" "weekday" "2" { keep; }"#),
            kept()
        );
        assert_eq!(
            run(r#"require "date"; if date :is :originalzone "date" "hour" "09" { keep; }"#),
            kept()
        );
        assert_eq!(
            run(r#"require "date"; if date :is :zone "+0000" "date" "hour" "17" { keep; }"#),
            kept()
        );
        assert_eq!(
            run(r#"require ["date", "relational"]; if date :value "ge" :originalzone "date" "year" "1990" { keep; }"#),
            kept()
        );
        assert_eq!(
            run(r#"require "date"; if date :is :originalzone "date" "year" "2020" { keep; }"#),
            not_kept()
        );
        fails(r#"if date :is "date" "year" "1997" { keep; }"#);
        fails(r#"require "date"; if date :is :zone "+0000" :originalzone "date" "hour" "17" { keep; }"#);
        fails(r#"require "date"; if date :is :originalzone "date" "century" "19" { keep; }"#);
        fails(r#"require "date"; if date :last :is :originalzone "date" "year" "1997" { keep; }"#);
    }

    #[test]
    fn date_index() {
        let eml = "X-Stamp: Tue, 1 Apr 1997 09:06:31 -0800\n\
                   X-Stamp: Wed, 1 Apr 1998 09:06:31 -0800\n\n";
        assert_eq!(
            run_on(
                r#"require ["date", "index"]; if date :index 2 :originalzone "x-stamp" "year" "1998" { keep; }"#,
                eml
            )
            .unwrap(),
            kept()
        );
        assert_eq!(
            run_on(
                r#"require ["date", "index"]; if date :index 1 :last :originalzone "x-stamp" "year" "1998" { keep; }"#,
                eml
            )
            .unwrap(),
            kept()
        );
        fails(r#"require "date"; if date :index 1 :originalzone "date" "year" "1997" { keep; }"#);
    }

    #[test]
    fn currentdate() {
        assert_eq!(
            run(r#"require "date"; if currentdate :matches "year" "2*" { keep; }"#),
            kept()
        );
        assert_eq!(
            run(
                r#"require ["date", "relational"];
                   if allof (
                     currentdate :value "ge" "date" "2020-01-01",
                     currentdate :value "le" "date" "2099-12-31"
                   ) { keep; }"#
            ),
            kept()
        );
    }

    #[test]
    fn editheader() {
        assert_eq!(
            run(r#"require "editheader"; addheader "X-Test" "hello"; if exists "X-Test" { keep; }"#),
            kept()
        );
        assert_eq!(
            run(r#"require "editheader"; addheader "X-Test" "hello world"; if header :contains "X-Test" "hello" { keep; }"#),
            kept()
        );
        assert_eq!(
            run(r#"require "editheader"; addheader :last "X-Test" "world"; if exists "X-Test" { keep; }"#),
            kept()
        );
        assert_eq!(
            run(r#"require "editheader"; addheader "X-Test" "value"; deleteheader "X-Test"; if not exists "X-Test" { keep; }"#),
            kept()
        );
        assert_eq!(
            run(r#"require "editheader"; deleteheader "Subject"; if not exists "Subject" { keep; }"#),
            kept()
        );
        fails(r#"addheader "X-Test" "hello"; keep;"#);
        fails(r#"deleteheader "Subject"; keep;"#);
    }

    #[test]
    fn editheader_protected() {
        assert_eq!(
            run(r#"require "editheader"; deleteheader "Received"; keep;"#),
            kept()
        );
        assert_eq!(
            run(r#"require "editheader"; deleteheader "Auto-Submitted"; keep;"#),
            kept()
        );
    }

    #[test]
    fn editheader_patterns() {
        assert_eq!(
            run(r#"require "editheader"; deleteheader :is "Subject" "I have a present for you"; if not exists "Subject" { keep; }"#),
            kept()
        );
        assert_eq!(
            run(r#"require "editheader"; deleteheader :is "Subject" "wrong value"; if exists "Subject" { keep; }"#),
            kept()
        );
        assert_eq!(
            run(r#"require "editheader"; deleteheader :contains "Subject" "present"; if not exists "Subject" { keep; }"#),
            kept()
        );
        assert_eq!(
            run(r#"require "editheader"; deleteheader :matches "Subject" "I have*"; if not exists "Subject" { keep; }"#),
            kept()
        );
    }

    #[test]
    fn editheader_index_and_case() {
        assert_eq!(
            run(
                r#"require "editheader";
                   addheader "X-Test" "first"; addheader "X-Test" "second";
                   deleteheader :index 1 "X-Test";
                   if exists "X-Test" { keep; }"#
            ),
            kept()
        );
        assert_eq!(
            run(
                r#"require "editheader";
                   addheader "X-Test" "first"; addheader :last "X-Test" "second";
                   deleteheader :index 1 :last "X-Test";
                   if allof (exists "X-Test", not header :is "X-Test" "second") { keep; }"#
            ),
            kept()
        );
        assert_eq!(
            run(r#"require "editheader"; addheader "x-test" "hello"; if exists "X-TEST" { keep; }"#),
            kept()
        );
        assert_eq!(
            run(r#"require "editheader"; deleteheader "SUBJECT"; if not exists "subject" { keep; }"#),
            kept()
        );
        fails(r#"require "editheader"; deleteheader :last "Subject";"#);
    }

    #[test]
    fn editheader_with_variables() {
        assert_eq!(
            run(
                r#"require ["editheader", "variables"];
                   set "tag" "important";
                   addheader "X-Tag" "${tag}";
                   if header :is "X-Tag" "important" { keep; }"#
            ),
            kept()
        );
    }

    #[test]
    fn mailbox() {
        assert_eq!(
            run(r#"require "mailbox"; if mailboxexists "INBOX" { keep; }"#),
            kept()
        );
        assert_eq!(
            run(r#"require "mailbox"; if mailboxexists ["INBOX", "Drafts"] { keep; }"#),
            kept()
        );
        // without a checker the test is optimistic, so "not" never fires
        assert_eq!(
            run(r#"require "mailbox"; if not mailboxexists "NonExistent" { keep; }"#),
            not_kept()
        );
        assert_eq!(
            run(r#"require ["fileinto", "mailbox"]; fileinto :create "NewFolder";"#),
            Outcome {
                fileinto: vec!["NewFolder".into()],
                ..Outcome::default()
            }
        );
        assert_eq!(
            run(r#"require ["fileinto", "mailbox", "copy"]; fileinto :create :copy "NewFolder";"#),
            Outcome {
                fileinto: vec!["NewFolder".into()],
                implicit_keep: true,
                ..Outcome::default()
            }
        );
        assert_eq!(
            run(
                r#"require ["fileinto", "mailbox", "imap4flags"];
                   fileinto :create :flags "\\Seen" "Archive";"#
            ),
            Outcome {
                fileinto: vec!["Archive".into()],
                flags: vec!["\\seen".into()],
                ..Outcome::default()
            }
        );
        fails(r#"if mailboxexists "INBOX" { keep; }"#);
        fails(r#"require "fileinto"; fileinto :create "NewFolder";"#);
    }

    #[test]
    fn subaddress() {
        assert_eq!(
            run(r#"require "subaddress"; if address :user "From" "coyote" { keep; }"#),
            kept()
        );
        // :detail never matches when the separator is absent
        assert_eq!(
            run(r#"require "subaddress"; if address :detail "From" "" { keep; }"#),
            not_kept()
        );
        fails(r#"if address :user "From" "coyote" { keep; }"#);

        let sub = |src| run_on(src, EML_SUBADDRESS).unwrap();
        assert_eq!(
            sub(r#"require "subaddress"; if address :user "From" "ken" { keep; }"#),
            kept()
        );
        assert_eq!(
            sub(r#"require "subaddress"; if address :detail "From" "sieve" { keep; }"#),
            kept()
        );
        assert_eq!(
            sub(r#"require "subaddress"; if address :detail "To" "mailing-list" { keep; }"#),
            kept()
        );
        assert_eq!(
            sub(r#"require "subaddress"; if address :user :contains "From" "k" { keep; }"#),
            kept()
        );
        assert_eq!(
            sub(r#"require "subaddress"; if address :detail :matches "To" "mailing-*" { keep; }"#),
            kept()
        );
        assert_eq!(
            sub(r#"require "subaddress"; if address :user "From" "wrong" { keep; }"#),
            not_kept()
        );
        assert_eq!(
            sub(r#"require "subaddress"; if address :detail "From" "" { keep; }"#),
            not_kept()
        );
        assert_eq!(
            sub(r#"require "subaddress"; if address :user ["From", "Cc"] "admin" { keep; }"#),
            kept()
        );
        assert_eq!(
            sub(r#"require "subaddress"; if address :detail "From" ["other", "sieve", "more"] { keep; }"#),
            kept()
        );
        assert_eq!(
            sub(r#"require "subaddress"; if address :user "From" "KEN" { keep; }"#),
            kept()
        );
        assert_eq!(
            sub(r#"require ["subaddress", "fileinto"]; if address :detail "To" "mailing-list" { fileinto "lists"; }"#),
            Outcome {
                fileinto: vec!["lists".into()],
                ..Outcome::default()
            }
        );
        fails(r#"require "subaddress"; if address :detail :localpart "From" "x" { keep; }"#);
    }

    #[test]
    fn subaddress_capture_into_fileinto() {
        assert_eq!(
            run_on(
                r#"require ["subaddress", "fileinto", "mailbox", "variables"];
                   if address :detail :matches "To" "*" {
                     set :lower "folder" "${1}";
                     fileinto :create "${folder}";
                   }"#,
                EML_SUBADDRESS
            )
            .unwrap(),
            Outcome {
                fileinto: vec!["mailing-list".into()],
                ..Outcome::default()
            }
        );
    }

    #[test]
    fn flags() {
        assert_eq!(
            run(
                r#"require ["fileinto", "imap4flags"];
                   setflag ["flag1", "flag2"]; addflag ["flag2", "flag3"]; removeflag ["flag1"];
                   fileinto "test";"#
            ),
            Outcome {
                fileinto: vec!["test".into()],
                flags: vec!["flag2".into(), "flag3".into()],
                ..Outcome::default()
            }
        );
        assert_eq!(
            run(r#"require "imap4flags"; setflag "Seen"; addflag "FLAGGED"; removeflag "seen"; keep;"#),
            Outcome {
                keep: true,
                implicit_keep: true,
                flags: vec!["flagged".into()],
                ..Outcome::default()
            }
        );
        assert_eq!(
            run(r#"require "imap4flags"; keep :flags ["\\Answered", "MyFlag"];"#),
            Outcome {
                keep: true,
                implicit_keep: true,
                flags: vec!["\\answered".into(), "myflag".into()],
                ..Outcome::default()
            }
        );
        fails(r#"setflag "seen";"#);
    }

    #[test]
    fn copy_modifier() {
        assert_eq!(
            run(r#"require "copy"; redirect :copy "user@example.com";"#),
            Outcome {
                redirect: vec!["user@example.com".into()],
                implicit_keep: true,
                ..Outcome::default()
            }
        );
        assert_eq!(
            run(r#"require ["fileinto", "copy"]; fileinto :copy "Spam";"#),
            Outcome {
                fileinto: vec!["Spam".into()],
                implicit_keep: true,
                ..Outcome::default()
            }
        );
        fails(r#"redirect :copy "user@example.com";"#);
        fails(r#"require "fileinto"; fileinto :copy "Spam";"#);
    }

    // fileinto :copy leaves implicit keep alone while keep stays explicit
    #[test]
    fn copy_plus_keep() {
        let eml = "Subject: Report\n\n";
        assert_eq!(
            run_on(
                r#"require ["fileinto", "copy"];
                   if header :contains "Subject" "Report" { fileinto :copy "Reports"; }
                   keep;"#,
                eml
            )
            .unwrap(),
            Outcome {
                fileinto: vec!["Reports".into()],
                keep: true,
                implicit_keep: true,
                ..Outcome::default()
            }
        );
    }

    #[test]
    fn stop_unwinds() {
        assert_eq!(
            run(r#"require "fileinto"; fileinto "a"; stop; fileinto "b";"#),
            Outcome {
                fileinto: vec!["a".into()],
                ..Outcome::default()
            }
        );
        assert_eq!(
            run(r#"if exists "From" { stop; } keep;"#),
            not_kept()
        );
    }

    #[test]
    fn if_chain() {
        assert_eq!(
            run(
                r#"require "fileinto";
                   if header :is "Subject" "nope" { fileinto "a"; }
                   elsif exists "From" { fileinto "b"; }
                   else { fileinto "c"; }"#
            ),
            Outcome {
                fileinto: vec!["b".into()],
                ..Outcome::default()
            }
        );
        assert_eq!(
            run(
                r#"require "fileinto";
                   if header :is "Subject" "nope" { fileinto "a"; }
                   else { fileinto "c"; }"#
            ),
            Outcome {
                fileinto: vec!["c".into()],
                ..Outcome::default()
            }
        );
        fails(r#"elsif true { keep; }"#);
        fails(r#"else { keep; }"#);
    }

    #[test]
    fn variables() {
        assert_eq!(
            run(
                r#"require ["variables", "fileinto"];
                   set "folder" "Archive";
                   fileinto "${folder}";"#
            ),
            Outcome {
                fileinto: vec!["Archive".into()],
                ..Outcome::default()
            }
        );
        assert_eq!(
            run(
                r#"require "variables";
                   set :upper "a" "hello";
                   if string :is "${a}" "HELLO" { keep; }"#
            ),
            kept()
        );
        assert_eq!(
            run(
                r#"require "variables";
                   set :length "n" "hello";
                   if string :is "${n}" "5" { keep; }"#
            ),
            kept()
        );
        assert_eq!(
            run(
                r#"require "variables";
                   set :quotewildcard "q" "a*b";
                   if string :is "${q}" "a\\*b" { keep; }"#
            ),
            kept()
        );
        // unknown variables expand to nothing
        assert_eq!(
            run(r#"require "variables"; if string :is "x${unset}y" "xy" { keep; }"#),
            kept()
        );
        fails(r#"require "variables"; set :lower :upper "a" "b";"#);
        fails(r#"require "variables"; set "0bad" "b";"#);
        fails(r#"set "a" "b";"#);
    }

    #[test]
    fn variables_numeric_comparator() {
        assert_eq!(
            run(
                r#"require ["variables", "relational", "comparator-i;ascii-numeric"];
                   set "n" "10";
                   if string :value "gt" :comparator "i;ascii-numeric" "${n}" "9" { keep; }"#
            ),
            kept()
        );
        // lexicographic comparison would say "10" < "9"
        assert_eq!(
            run(
                r#"require ["variables", "relational"];
                   set "n" "10";
                   if string :value "gt" "${n}" "9" { keep; }"#
            ),
            not_kept()
        );
        fails(
            r#"require ["variables", "relational", "comparator-i;ascii-numeric"];
               if string :contains :comparator "i;ascii-numeric" "1" "1" { keep; }"#,
        );
    }

    #[test]
    fn match_captures() {
        assert_eq!(
            run(
                r#"require ["variables", "fileinto"];
                   if header :matches "Subject" "I have a * for you" {
                     fileinto "${1}";
                   }"#
            ),
            Outcome {
                fileinto: vec!["present".into()],
                ..Outcome::default()
            }
        );
        assert_eq!(
            run(
                r#"require "variables";
                   if header :matches "Subject" "I have a * for you" { }
                   if string :is "${0}" "i have a present for you" { keep; }"#
            ),
            kept()
        );
    }

    #[test]
    fn encoded_character() {
        assert_eq!(
            run(
                r#"require ["encoded-character", "variables"];
                   if string :is "${hex:40}" "@" { keep; }"#
            ),
            kept()
        );
        assert_eq!(
            run(
                r#"require ["encoded-character", "variables"];
                   if string :is "${unicode:40}" "@" { keep; }"#
            ),
            kept()
        );
    }

    #[test]
    fn vacation_records_response() {
        let env = EnvelopeStatic {
            from: "sender@example.com".into(),
            to: "recipient@example.com".into(),
            auth: String::new(),
        };
        let data = eval(r#"require "vacation"; vacation "I'm on vacation.";"#, EML, env).unwrap();
        assert!(!data.implicit_keep);
        assert_eq!(data.vacation_responses.len(), 1);
        let resp = &data.vacation_responses["sender@example.com"];
        assert_eq!(resp.body, "I'm on vacation.");
        assert_eq!(resp.subject, "Automated reply");
        assert_eq!(resp.days, 7);
        assert!(!resp.is_mime);
    }

    #[test]
    fn vacation_with_parameters() {
        let env = EnvelopeStatic {
            from: "sender@example.com".into(),
            to: "recipient@example.com".into(),
            auth: String::new(),
        };
        let data = eval(
            r#"require "vacation";
               vacation :days 14 :subject "Out of Office" :from "me@example.com"
                        :addresses ["me@example.com", "me2@example.com"]
                        :mime :handle "vacation-001"
                        "I'm on vacation until next week.";"#,
            EML,
            env,
        )
        .unwrap();
        let resp = &data.vacation_responses["sender@example.com"];
        assert_eq!(resp.days, 14);
        assert_eq!(resp.subject, "Out of Office");
        assert_eq!(resp.from, "me@example.com");
        assert_eq!(resp.handle, "vacation-001");
        assert!(resp.is_mime);
    }

    #[test]
    fn vacation_skips_own_addresses() {
        let env = EnvelopeStatic {
            from: "sender@example.com".into(),
            to: "recipient@example.com".into(),
            auth: String::new(),
        };
        let data = eval(
            r#"require "vacation"; vacation :addresses ["sender@example.com"] "Away.";"#,
            EML,
            env,
        )
        .unwrap();
        assert!(data.vacation_responses.is_empty());
    }

    #[test]
    fn require_gating() {
        fails(r#"require "frobnicate";"#);
        fails(r#"keep; require "fileinto";"#);
        fails(r#"require "fileinto"; frobnicate;"#);
        // host offers nothing: even supported extensions are unavailable
        assert!(load(r#"require "fileinto";"#, Options::default()).is_err());
        // the core needs no require
        assert!(load(r#"if exists "From" { keep; }"#, Options::default()).is_ok());
    }

    #[test]
    fn loaded_extension_set() {
        let script = load(
            r#"require ["fileinto", "copy"]; fileinto :copy "a";"#,
            Options::with_all_extensions(),
        )
        .unwrap();
        let mut exts: Vec<_> = script.extensions().iter().cloned().collect();
        exts.sort();
        assert_eq!(exts, ["copy", "fileinto"]);
    }

    #[test]
    fn cancellation() {
        let flag = Arc::new(AtomicBool::new(true));
        let script = Arc::new(load("keep;", Options::default()).unwrap());
        let mut data = RuntimeData::new(
            Arc::clone(&script),
            Arc::new(DummyPolicy),
            Arc::new(EnvelopeStatic::default()),
            Arc::new(MessageStatic::default()),
        );
        let ctx = Context::new().with_cancel_flag(Arc::clone(&flag));
        assert!(matches!(
            script.execute(&ctx, &mut data),
            Err(Error::Canceled)
        ));
        flag.store(false, Ordering::Relaxed);
        assert!(script.execute(&ctx, &mut data).is_ok());
    }

    #[test]
    fn testsuite_cases() {
        let data = eval(
            r#"require "vnd.dovecot.testsuite";
               test "passing" {
                 if exists "From" { }
               }
               test "failing" {
                 test_fail "it went wrong";
               }
               test "after failure still runs" { }"#,
            EML,
            test_env(),
        )
        .unwrap();
        assert_eq!(data.test_report.len(), 1);
        assert_eq!(data.test_report[0].name, "failing");
        assert_eq!(data.test_report[0].message, "it went wrong");
    }

    #[test]
    fn testsuite_isolates_state() {
        let data = eval(
            r#"require ["vnd.dovecot.testsuite", "fileinto"];
               test "actions stay in the fork" {
                 fileinto "inside";
               }"#,
            EML,
            test_env(),
        )
        .unwrap();
        assert!(data.mailboxes.is_empty());
        assert!(data.implicit_keep);
    }

    #[test]
    fn testsuite_set_message_and_envelope() {
        let data = eval(
            "require [\"vnd.dovecot.testsuite\", \"envelope\"];\n\
             test \"swapped message\" {\n\
               test_set \"message\" text:\r\nFrom: a@b.c\r\nSubject: inner\r\n\r\nbody\r\n.\r\n;\n\
               if not header :is \"subject\" \"inner\" { test_fail \"wrong subject\"; }\n\
               test_set \"envelope.from\" \"<x@y.z>\";\n\
               if not envelope :is \"from\" \"x@y.z\" { test_fail \"wrong envelope\"; }\n\
             }",
            EML,
            test_env(),
        )
        .unwrap();
        assert!(data.test_report.is_empty(), "{:?}", data.test_report);
    }

    #[test]
    fn testsuite_config_set_truncates_variables() {
        let data = eval(
            r#"require ["vnd.dovecot.testsuite", "variables"];
               test "max variable size" {
                 test_config_set "sieve_variables_max_variable_size" "4";
                 set "v" "123456";
                 if not string :is "${v}" "1234" { test_fail "not truncated: ${v}"; }
               }"#,
            EML,
            test_env(),
        )
        .unwrap();
        assert!(data.test_report.is_empty(), "{:?}", data.test_report);
    }

    #[test]
    fn testsuite_script_compile_and_run() {
        let dir = std::env::temp_dir().join(format!(
            "rsieve-fixtures-{}-{:?}",
            std::process::id(),
            std::thread::current().id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("good.sieve"), "require \"fileinto\"; fileinto \"x\";\n").unwrap();
        std::fs::write(dir.join("bad.sieve"), "if { nonsense\n").unwrap();

        let script = Arc::new(
            load(
                r#"require "vnd.dovecot.testsuite";
                   test "fixtures" {
                     if not test_script_compile "good.sieve" { test_fail "good did not compile"; }
                     if not test_script_run { test_fail "good did not run"; }
                     if test_script_compile "bad.sieve" { test_fail "bad compiled"; }
                     if test_script_compile "absent.sieve" { test_fail "absent compiled"; }
                   }"#,
                Options::with_all_extensions(),
            )
            .unwrap(),
        );
        let mut data = RuntimeData::new(
            Arc::clone(&script),
            Arc::new(DummyPolicy),
            Arc::new(test_env()),
            Arc::new(MessageStatic::parse(EML).unwrap()),
        );
        data.namespace = Some(Arc::new(DirNamespace::new(&dir)));
        script.execute(&Context::new(), &mut data).unwrap();
        assert!(data.test_report.is_empty(), "{:?}", data.test_report);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn multiline_string_argument() {
        let env = EnvelopeStatic {
            from: "sender@example.com".into(),
            to: String::new(),
            auth: String::new(),
        };
        let data = eval(
            "require \"vacation\";\nvacation text:\r\nI am away.\r\n.\r\n;",
            EML,
            env,
        )
        .unwrap();
        assert_eq!(
            data.vacation_responses["sender@example.com"].body,
            "I am away.\r\n"
        );
    }
}
