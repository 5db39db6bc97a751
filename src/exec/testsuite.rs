//! Runtime of the `vnd.dovecot.testsuite` dialect: in-band self tests that
//! run their bodies, and fixture sub-scripts, against a fork of the
//! current runtime data.

use std::sync::Arc;

use tracing::{debug, error};

use crate::error::Error;
use crate::exec::address::parse_envelope_address;
use crate::exec::vars::expand_vars;
use crate::exec::{execute_block, Context, RuntimeData, TestFailure, DEFAULT_MAX_VARIABLE_LEN};
use crate::message::{EnvelopeStatic, MessageStatic};
use crate::sema::Cmd;

pub(crate) fn run_test_case(
    ctx: &Context,
    d: &mut RuntimeData,
    name: &str,
    body: &[Cmd],
) -> Result<(), Error> {
    let mut fork = d.fork();
    match execute_block(ctx, &mut fork, body) {
        Ok(()) | Err(Error::Stop) => {
            if !fork.test_fail_message.is_empty() {
                error!(test = name, message = %fork.test_fail_message, "test case failed");
                d.test_report.push(TestFailure {
                    name: name.to_string(),
                    message: fork.test_fail_message,
                    position: fork.test_fail_at,
                });
            } else {
                debug!(test = name, "test case passed");
            }
            Ok(())
        }
        Err(e) => Err(e),
    }
}

pub(crate) fn config_set(
    d: &mut RuntimeData,
    key: &str,
    value: Option<&str>,
) -> Result<(), Error> {
    match key {
        "sieve_variables_max_variable_size" => {
            d.limits.max_variable_len = match value {
                None => DEFAULT_MAX_VARIABLE_LEN,
                Some(v) => v
                    .parse()
                    .map_err(|_| Error::Host(format!("bad variable size \"{v}\"").into()))?,
            };
            Ok(())
        }
        _ => Err(Error::Host(
            format!("unknown test_config_set key \"{key}\"").into(),
        )),
    }
}

pub(crate) fn test_set(d: &mut RuntimeData, name: &str, value: &str) -> Result<(), Error> {
    let expanded = expand_vars(d, value);
    match name {
        // The raw value is used for messages so multi-line literals keep
        // their exact octets.
        "message" => {
            let msg = MessageStatic::parse(value)
                .map_err(|e| Error::Host(format!("bad test message: {e}").into()))?;
            d.msg = Arc::new(msg);
            Ok(())
        }
        "envelope.from" => {
            // Keep the raw value for invalid paths so envelope tests can
            // observe the invalidity.
            let parsed = parse_envelope_address(&expanded).unwrap_or(expanded);
            d.envelope = Arc::new(EnvelopeStatic {
                from: parsed,
                to: d.envelope.envelope_to(),
                auth: d.envelope.auth_username(),
            });
            Ok(())
        }
        "envelope.to" => {
            let parsed = parse_envelope_address(&expanded).unwrap_or(expanded);
            d.envelope = Arc::new(EnvelopeStatic {
                from: d.envelope.envelope_from(),
                to: parsed,
                auth: d.envelope.auth_username(),
            });
            Ok(())
        }
        "envelope.auth" => {
            d.envelope = Arc::new(EnvelopeStatic {
                from: d.envelope.envelope_from(),
                to: d.envelope.envelope_to(),
                auth: expanded,
            });
            Ok(())
        }
        _ => d.set_variable(name, value.to_string()),
    }
}

pub(crate) fn check_script_compile(d: &mut RuntimeData, path: &str) -> Result<bool, Error> {
    let namespace = d
        .namespace
        .as_ref()
        .ok_or_else(|| Error::Host("namespace is not set, cannot load scripts".into()))?;
    let path = expand_vars(d, path);
    let bytes = match namespace.read_file(&path) {
        Ok(bytes) => bytes,
        Err(e) => {
            debug!(script = %path, error = %e, "fixture script unreadable");
            return Ok(false);
        }
    };
    let Ok(text) = String::from_utf8(bytes) else {
        return Ok(false);
    };

    let opts = crate::Options {
        lexer: crate::lex::Options {
            filename: path.clone(),
            ..crate::lex::Options::default()
        },
        parser: crate::parse::Options::default(),
        interp: d.script.opts.clone(),
        // Fixture scripts compile against the same extension universe the
        // host granted the outer script.
        enabled_extensions: d.script.host_enabled.clone(),
    };
    match crate::load(&text, opts) {
        Ok(script) => {
            d.test_script = Some(Arc::new(script));
            Ok(true)
        }
        Err(e) => {
            debug!(script = %path, error = %e, "fixture script did not compile");
            Ok(false)
        }
    }
}

pub(crate) fn check_script_run(ctx: &Context, d: &mut RuntimeData) -> Result<bool, Error> {
    let Some(script) = d.test_script.clone() else {
        return Ok(false);
    };
    // The fixture runs as a plain Sieve script on its own fork; its actions
    // are not committed to the enclosing evaluation.
    let mut fork = d.fork();
    fork.limits = script.opts.clone();
    fork.script = Arc::clone(&script);
    Ok(script.execute(ctx, &mut fork).is_ok())
}
