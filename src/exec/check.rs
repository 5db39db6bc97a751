use std::sync::Arc;

use crate::error::Error;
use crate::exec::address::{
    extract_part, parse_address_list, parse_envelope_address, strip_comments,
    ALLOWED_ADDR_HEADERS,
};
use crate::exec::datetime::{self, extract_date_part, parse_date_header, parse_zone_offset};
use crate::exec::vars::expand_vars;
use crate::exec::{testsuite, Context, RuntimeData};
use crate::matcher::{AddressPart, MatcherTest};
use crate::sema::TestNode;

impl TestNode {
    pub(crate) fn check(&self, ctx: &Context, d: &mut RuntimeData) -> Result<bool, Error> {
        match self {
            TestNode::Address {
                matcher,
                address_part,
                headers,
            } => check_address(d, matcher, *address_part, headers),
            TestNode::Envelope {
                matcher,
                address_part,
                fields,
            } => check_envelope(d, matcher, *address_part, fields),
            TestNode::Header { matcher, headers } => check_header(d, matcher, headers),
            TestNode::Exists { headers } => {
                for header in headers {
                    if d.header_get(&expand_vars(d, header))?.is_empty() {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            TestNode::Size { over, limit } => {
                let size = d.msg.message_size() as u64;
                Ok(if *over { size > *limit } else { size < *limit })
            }
            TestNode::AllOf(tests) => {
                for t in tests {
                    if !t.check(ctx, d)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            TestNode::AnyOf(tests) => {
                for t in tests {
                    if t.check(ctx, d)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            TestNode::Not(inner) => Ok(!inner.check(ctx, d)?),
            TestNode::True => Ok(true),
            TestNode::False => Ok(false),
            TestNode::StringTest { matcher, source } => {
                let mut entries: u64 = 0;
                for s in source {
                    let value = expand_vars(d, s);
                    if matcher.is_count() {
                        if !value.is_empty() {
                            entries += 1;
                        }
                        continue;
                    }
                    if matcher.try_match(d, &value)? {
                        return Ok(true);
                    }
                }
                if matcher.is_count() {
                    return Ok(matcher.count_matches(d, entries));
                }
                Ok(false)
            }
            TestNode::Date {
                matcher,
                header,
                part,
                zone,
                original_zone,
                index,
                last,
            } => {
                let values = d.header_get(&expand_vars(d, header))?;
                if matcher.is_count() {
                    // only parseable dates count
                    let valid = values
                        .iter()
                        .filter(|v| parse_date_header(v).is_some())
                        .count() as u64;
                    return Ok(matcher.count_matches(d, valid));
                }
                if values.is_empty() {
                    return Ok(false);
                }
                let value = if *index > 0 {
                    let idx = if *last {
                        values.len() as i64 - *index as i64
                    } else {
                        *index as i64 - 1
                    };
                    if idx < 0 || idx as usize >= values.len() {
                        return Ok(false);
                    }
                    &values[idx as usize]
                } else {
                    &values[0]
                };
                let t = match parse_date_header(value) {
                    Some(t) => t,
                    None => return Ok(false),
                };
                let t = if *original_zone {
                    t
                } else if let Some(zone) = zone {
                    match parse_zone_offset(zone) {
                        Some(offset) => t.with_timezone(&offset),
                        None => t,
                    }
                } else {
                    datetime::to_local(t)
                };
                matcher.try_match(d, &extract_date_part(t, *part))
            }
            TestNode::CurrentDate {
                matcher,
                part,
                zone,
            } => {
                let mut now = datetime::local_now();
                if let Some(zone) = zone {
                    if let Some(offset) = parse_zone_offset(zone) {
                        now = now.with_timezone(&offset);
                    }
                }
                matcher.try_match(d, &extract_date_part(now, *part))
            }
            TestNode::MailboxExists { mailboxes } => {
                let policy = Arc::clone(&d.policy);
                for mailbox in mailboxes {
                    let mailbox = expand_vars(d, mailbox);
                    // no checker means we are optimistic
                    if let Some(checker) = policy.mailbox_checker() {
                        ctx.check()?;
                        if !checker.mailbox_exists(ctx, &mailbox).map_err(Error::Host)? {
                            return Ok(false);
                        }
                    }
                }
                Ok(true)
            }
            TestNode::ScriptCompile { path } => testsuite::check_script_compile(d, path),
            TestNode::ScriptRun => testsuite::check_script_run(ctx, d),
        }
    }
}

fn test_address(
    d: &mut RuntimeData,
    matcher: &MatcherTest,
    part: AddressPart,
    addr: &str,
) -> Result<bool, Error> {
    let addr = if addr == "<>" { "" } else { addr };
    let value = if addr.is_empty() {
        String::new()
    } else {
        match extract_part(part, addr) {
            Some(v) => v,
            None => return Ok(false),
        }
    };
    matcher.try_match(d, &value)
}

fn check_address(
    d: &mut RuntimeData,
    matcher: &MatcherTest,
    part: AddressPart,
    headers: &[String],
) -> Result<bool, Error> {
    let mut entries: u64 = 0;
    for header in headers {
        let header = expand_vars(d, header).to_ascii_lowercase();
        if !ALLOWED_ADDR_HEADERS.contains(&header.as_str()) {
            continue;
        }
        let values = d.header_get(&header)?;
        if values.is_empty() {
            if !matcher.is_count() && test_address(d, matcher, part, "")? {
                return Ok(true);
            }
            continue;
        }
        for value in values {
            let clean = strip_comments(&value);
            match parse_address_list(&clean) {
                // Unparseable values fall back to literal matching; they
                // never contribute to a count.
                None => {
                    if !matcher.is_count() && test_address(d, matcher, part, &clean)? {
                        return Ok(true);
                    }
                }
                Some(addrs) if addrs.is_empty() => {
                    if !matcher.is_count() && test_address(d, matcher, part, "")? {
                        return Ok(true);
                    }
                }
                Some(addrs) => {
                    for addr in addrs {
                        if matcher.is_count() {
                            entries += 1;
                            continue;
                        }
                        if test_address(d, matcher, part, &addr)? {
                            return Ok(true);
                        }
                    }
                }
            }
        }
    }
    if matcher.is_count() {
        return Ok(matcher.count_matches(d, entries));
    }
    Ok(false)
}

fn check_envelope(
    d: &mut RuntimeData,
    matcher: &MatcherTest,
    part: AddressPart,
    fields: &[String],
) -> Result<bool, Error> {
    let mut entries: u64 = 0;
    for field in fields {
        let field = expand_vars(d, field).to_ascii_lowercase();
        let value = match field.as_str() {
            "from" => d.envelope.envelope_from(),
            "to" => d.envelope.envelope_to(),
            "auth" => d.envelope.auth_username(),
            _ => {
                return Err(Error::Host(
                    format!("envelope: unsupported envelope-part \"{field}\"").into(),
                ))
            }
        };
        // A syntactically invalid path stays visible in the envelope but
        // matches nothing.
        if !value.is_empty()
            && (field == "from" || field == "to")
            && parse_envelope_address(&value).is_none()
        {
            continue;
        }
        if matcher.is_count() {
            if !value.is_empty() {
                entries += 1;
            }
            continue;
        }
        if test_address(d, matcher, part, &value)? {
            return Ok(true);
        }
    }
    if matcher.is_count() {
        return Ok(matcher.count_matches(d, entries));
    }
    Ok(false)
}

fn check_header(
    d: &mut RuntimeData,
    matcher: &MatcherTest,
    headers: &[String],
) -> Result<bool, Error> {
    let mut entries: u64 = 0;
    for header in headers {
        let values = d.header_get(&expand_vars(d, header))?;
        for value in values {
            if matcher.is_count() {
                entries += 1;
                continue;
            }
            if matcher.try_match(d, &value)? {
                return Ok(true);
            }
        }
    }
    if matcher.is_count() {
        return Ok(matcher.count_matches(d, entries));
    }
    Ok(false)
}
