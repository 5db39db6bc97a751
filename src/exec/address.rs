use nom::{
    branch::alt,
    bytes::complete::take_while1,
    character::complete::{char, multispace0, none_of},
    combinator::{all_consuming, map, recognize},
    multi::many0,
    sequence::{delimited, pair, preceded, terminated, tuple},
    IResult,
};

use crate::matcher::AddressPart;

/// Headers the `address` test is allowed to inspect: the RFC 5228 set, the
/// RFC 2822 originator/destination fields and the draft-palme list.
pub(crate) const ALLOWED_ADDR_HEADERS: &[&str] = &[
    "from",
    "to",
    "cc",
    "bcc",
    "sender",
    "resent-from",
    "resent-to",
    "reply-to",
    "resent-reply-to",
    "resent-sender",
    "resent-cc",
    "resent-bcc",
    "for-approval",
    "for-handling",
    "for-comment",
    "apparently-to",
    "errors-to",
    "delivered-to",
    "return-receipt-to",
    "x-admin",
    "read-receipt-to",
    "x-confirm-reading-to",
    "return-receipt-requested",
    "registered-mail-reply-requested-by",
    "mail-followup-to",
    "mail-reply-to",
    "abuse-reports-to",
    "x-complaints-to",
    "x-report-abuse-to",
    "x-beenthere",
    "x-original-from",
    "x-original-to",
];

pub(crate) const SUBADDRESS_SEPARATOR: char = '+';

/// Drop RFC 2822 parenthesised comments, quote-aware, and trim the rest.
pub(crate) fn strip_comments(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut depth = 0usize;
    let mut in_quotes = false;
    let mut escaped = false;
    for c in s.chars() {
        if escaped {
            if depth == 0 {
                out.push(c);
            }
            escaped = false;
            continue;
        }
        match c {
            '\\' => {
                escaped = true;
                if depth == 0 {
                    out.push(c);
                }
            }
            '"' if depth == 0 => {
                in_quotes = !in_quotes;
                out.push(c);
            }
            '(' if !in_quotes => depth += 1,
            ')' if !in_quotes && depth > 0 => depth -= 1,
            _ if depth == 0 => out.push(c),
            _ => {}
        }
    }
    out.trim().to_string()
}

fn is_atext(c: char) -> bool {
    c.is_ascii_alphanumeric()
        || "!#$%&'*+-/=?^_`{|}~".contains(c)
}

fn dot_atom(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        take_while1(is_atext),
        many0(pair(char('.'), take_while1(is_atext))),
    ))(input)
}

fn quoted_local(input: &str) -> IResult<&str, &str> {
    recognize(delimited(char('"'), many0(none_of("\"\\")), char('"')))(input)
}

fn domain_literal(input: &str) -> IResult<&str, &str> {
    recognize(delimited(char('['), many0(none_of("[]")), char(']')))(input)
}

fn domain(input: &str) -> IResult<&str, &str> {
    alt((dot_atom, domain_literal))(input)
}

// addr-spec = local-part "@" domain
fn addr_spec(input: &str) -> IResult<&str, String> {
    map(
        tuple((alt((dot_atom, quoted_local)), char('@'), domain)),
        |(local, _, dom)| format!("{local}@{dom}"),
    )(input)
}

fn angle_addr(input: &str) -> IResult<&str, String> {
    delimited(
        pair(multispace0, char('<')),
        addr_spec,
        pair(char('>'), multispace0),
    )(input)
}

fn display_word(input: &str) -> IResult<&str, &str> {
    // display names also allow dots in practice ("John Q. Public")
    preceded(
        multispace0,
        alt((take_while1(|c| is_atext(c) || c == '.'), quoted_local)),
    )(input)
}

// mailbox = [display-name] angle-addr / addr-spec
fn mailbox(input: &str) -> IResult<&str, String> {
    alt((
        preceded(many0(display_word), angle_addr),
        delimited(multispace0, addr_spec, multispace0),
    ))(input)
}

fn mailbox_only(input: &str) -> Result<String, ()> {
    all_consuming(terminated(mailbox, multispace0))(input)
        .map(|(_, m)| m)
        .map_err(|_| ())
}

/// Split one header value into addr-specs. Comments must already be
/// stripped. Returns None when the value does not parse as a mailbox list;
/// the caller then falls back to matching the raw value.
pub(crate) fn parse_address_list(value: &str) -> Option<Vec<String>> {
    if value.trim().is_empty() {
        return Some(Vec::new());
    }
    let mut out = Vec::new();
    for element in split_list(value) {
        let element = element.trim();
        if element.is_empty() {
            continue;
        }
        out.push(mailbox_only(element).ok()?);
    }
    Some(out)
}

// Split on commas that sit outside quotes and angle brackets.
fn split_list(value: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;
    let mut in_angle = false;
    let mut escaped = false;
    for (i, c) in value.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '"' => in_quotes = !in_quotes,
            '<' if !in_quotes => in_angle = true,
            '>' if !in_quotes => in_angle = false,
            ',' if !in_quotes && !in_angle => {
                parts.push(&value[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&value[start..]);
    parts
}

/// Split at the last `@`. `postmaster` is accepted without a domain
/// (RFC 5228 2.7.4); empty local parts or domains fail.
pub(crate) fn split_address(addr: &str) -> Option<(&str, &str)> {
    if addr.eq_ignore_ascii_case("postmaster") {
        return Some((addr, ""));
    }
    let at = addr.rfind('@')?;
    let (local, domain) = (&addr[..at], &addr[at + 1..]);
    if local.is_empty() || domain.is_empty() {
        return None;
    }
    Some((local, domain))
}

/// `user+detail` split of a local part. Detail is None when the separator
/// is absent.
pub(crate) fn split_subaddress(local: &str) -> (&str, Option<&str>) {
    match local.find(SUBADDRESS_SEPARATOR) {
        Some(at) => (&local[..at], Some(&local[at + 1..])),
        None => (local, None),
    }
}

/// Extract the configured part of an address; None means the address fails
/// to match any key (bad syntax, or `:detail` without a separator).
pub(crate) fn extract_part(part: AddressPart, addr: &str) -> Option<String> {
    match part {
        AddressPart::All => Some(addr.to_string()),
        AddressPart::Localpart => split_address(addr).map(|(l, _)| l.to_string()),
        AddressPart::Domain => split_address(addr).map(|(_, d)| d.to_string()),
        AddressPart::User => {
            let (local, _) = split_address(addr)?;
            Some(split_subaddress(local).0.to_string())
        }
        AddressPart::Detail => {
            let (local, _) = split_address(addr)?;
            // RFC 5233 4: no separator, no match.
            split_subaddress(local).1.map(str::to_string)
        }
    }
}

/// Validate an RFC 5321 reverse/forward path. `Some` holds the address with
/// any angle brackets and source route stripped; `None` marks a
/// syntactically invalid path, which envelope tests must skip.
pub(crate) fn parse_envelope_address(addr: &str) -> Option<String> {
    if addr.is_empty() || addr == "<>" {
        return Some(String::new());
    }

    let inner = match addr.strip_prefix('<').and_then(|a| a.strip_suffix('>')) {
        Some(inner) => inner,
        None => {
            // Bare form: tolerate it when it roughly looks like a mailbox.
            if !addr.contains('@') && addr != "MAILER-DAEMON" {
                return None;
            }
            if addr.ends_with('@') || addr.starts_with('@') {
                return None;
            }
            return Some(addr.to_string());
        }
    };

    // Source route: <@relay1,@relay2:user@domain>
    if let Some((route, actual)) = inner.split_once(':') {
        if !route.starts_with('@') {
            return None;
        }
        for hop in route.split(',') {
            let hop = hop.trim();
            let host = hop.strip_prefix('@')?;
            if host.is_empty()
                || host.contains('@')
                || host.contains("..")
                || host.starts_with('.')
                || host.ends_with('.')
            {
                return None;
            }
        }
        return Some(actual.to_string());
    }

    if inner == "MAILER-DAEMON" {
        return Some(inner.to_string());
    }
    match inner.matches('@').count() {
        1 => {
            let (local, domain) = inner.split_once('@').unwrap();
            if local.is_empty() || domain.is_empty() {
                return None;
            }
            Some(inner.to_string())
        }
        _ => None,
    }
}
