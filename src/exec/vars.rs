use crate::exec::RuntimeData;
use crate::sema::SetModifier;

/// Substitute `${name}` and `${N}` references (RFC 5229). Unset variables
/// expand to the empty string; text that is not a valid reference stays
/// verbatim.
pub(crate) fn expand_vars(d: &RuntimeData, s: &str) -> String {
    if !s.contains("${") {
        return s.to_string();
    }
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}').and_then(|end| {
            lookup(d, &after[..end]).map(|value| (value, &after[end + 1..]))
        }) {
            Some((value, tail)) => {
                out.push_str(&value);
                rest = tail;
            }
            None => {
                out.push_str("${");
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

fn lookup(d: &RuntimeData, name: &str) -> Option<String> {
    if name.is_empty() {
        return None;
    }
    if name.bytes().all(|b| b.is_ascii_digit()) {
        // Numbered variables hold the captures of the last successful
        // :matches/:regex; out-of-range references are empty.
        let idx: usize = name.parse().ok()?;
        return Some(d.match_variables.get(idx).cloned().unwrap_or_default());
    }
    if is_variable_name(name) {
        return Some(
            d.variables
                .get(&name.to_ascii_lowercase())
                .cloned()
                .unwrap_or_default(),
        );
    }
    None
}

pub(crate) fn is_variable_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

pub(crate) fn apply_modifier(m: SetModifier, s: &str) -> String {
    match m {
        SetModifier::Lower => s.to_lowercase(),
        SetModifier::Upper => s.to_uppercase(),
        SetModifier::LowerFirst => map_first(s, char::to_lowercase),
        SetModifier::UpperFirst => map_first(s, char::to_uppercase),
        SetModifier::QuoteWildcard => {
            let mut out = String::with_capacity(s.len());
            for c in s.chars() {
                if matches!(c, '*' | '?' | '\\') {
                    out.push('\\');
                }
                out.push(c);
            }
            out
        }
        SetModifier::Length => s.chars().count().to_string(),
    }
}

fn map_first<I: Iterator<Item = char>>(s: &str, f: impl Fn(char) -> I) -> String {
    let mut chars = s.chars();
    match chars.next() {
        None => String::new(),
        Some(first) => f(first).chain(chars).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::RuntimeData;
    use crate::message::{DummyPolicy, EnvelopeStatic, MessageStatic};
    use std::sync::Arc;

    fn data() -> RuntimeData {
        let script = crate::load("", crate::Options::default()).unwrap();
        let mut d = RuntimeData::new(
            Arc::new(script),
            Arc::new(DummyPolicy),
            Arc::new(EnvelopeStatic::default()),
            Arc::new(MessageStatic::default()),
        );
        d.variables.insert("name".into(), "value".into());
        d.match_variables = vec!["whole".into(), "first".into()];
        d
    }

    #[test]
    fn expansion() {
        let d = data();
        assert_eq!(expand_vars(&d, "x ${name} y"), "x value y");
        assert_eq!(expand_vars(&d, "${NAME}"), "value");
        assert_eq!(expand_vars(&d, "${unset}"), "");
        assert_eq!(expand_vars(&d, "${0}-${1}-${2}"), "whole-first-");
        assert_eq!(expand_vars(&d, "${not valid}"), "${not valid}");
        assert_eq!(expand_vars(&d, "no refs"), "no refs");
        assert_eq!(expand_vars(&d, "${"), "${");
    }

    #[test]
    fn modifiers() {
        assert_eq!(apply_modifier(SetModifier::Lower, "AbC"), "abc");
        assert_eq!(apply_modifier(SetModifier::Upper, "AbC"), "ABC");
        assert_eq!(apply_modifier(SetModifier::LowerFirst, "ABC"), "aBC");
        assert_eq!(apply_modifier(SetModifier::UpperFirst, "abc"), "Abc");
        assert_eq!(apply_modifier(SetModifier::QuoteWildcard, "a*b?c\\"), "a\\*b\\?c\\\\");
        assert_eq!(apply_modifier(SetModifier::Length, "héllo"), "5");
    }
}
