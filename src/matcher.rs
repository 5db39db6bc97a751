use std::cmp::Ordering;
use std::iter;

use itertools::Either;
use memmem::{Searcher, TwoWaySearcher};
use regex::{Regex, RegexBuilder};
use tracing::debug;

use crate::error::Error;
use crate::exec::vars::expand_vars;
use crate::exec::RuntimeData;

pub const MAX_PATTERN_LEN: usize = 1000;
pub const MAX_INPUT_LEN: usize = 10000;
const REGEX_SIZE_LIMIT: usize = 1 << 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Comparator {
    Octet,
    #[default]
    AsciiCasemap,
    AsciiNumeric,
    UnicodeCasemap,
}

impl Comparator {
    pub fn from_name(name: &str) -> Option<Comparator> {
        match name {
            "i;octet" => Some(Comparator::Octet),
            "i;ascii-casemap" => Some(Comparator::AsciiCasemap),
            "i;ascii-numeric" => Some(Comparator::AsciiNumeric),
            "i;unicode-casemap" => Some(Comparator::UnicodeCasemap),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Comparator::Octet => "i;octet",
            Comparator::AsciiCasemap => "i;ascii-casemap",
            Comparator::AsciiNumeric => "i;ascii-numeric",
            Comparator::UnicodeCasemap => "i;unicode-casemap",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchType {
    #[default]
    Is,
    Contains,
    Matches,
    Value,
    Count,
    Regex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Relational {
    Gt,
    Ge,
    Lt,
    Le,
    #[default]
    Eq,
    Ne,
}

impl Relational {
    pub fn from_name(name: &str) -> Option<Relational> {
        match name {
            "gt" => Some(Relational::Gt),
            "ge" => Some(Relational::Ge),
            "lt" => Some(Relational::Lt),
            "le" => Some(Relational::Le),
            "eq" => Some(Relational::Eq),
            "ne" => Some(Relational::Ne),
            _ => None,
        }
    }

    fn holds(&self, ord: Ordering) -> bool {
        match self {
            Relational::Gt => ord == Ordering::Greater,
            Relational::Ge => ord != Ordering::Less,
            Relational::Lt => ord == Ordering::Less,
            Relational::Le => ord != Ordering::Greater,
            Relational::Eq => ord == Ordering::Equal,
            Relational::Ne => ord != Ordering::Equal,
        }
    }

    pub fn compare_str(&self, lhs: &str, rhs: &str) -> bool {
        self.holds(lhs.cmp(rhs))
    }

    // RFC 4790 9.1: values without digits sort after every numeric value
    // and are equal to each other.
    pub fn compare_numeric(&self, lhs: Option<u64>, rhs: Option<u64>) -> bool {
        let ord = match (lhs, rhs) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(a), Some(b)) => a.cmp(&b),
        };
        self.holds(ord)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AddressPart {
    #[default]
    All,
    Localpart,
    Domain,
    User,
    Detail,
}

/// Leading decimal run of `s`, or None when `s` does not start with a digit
/// (RFC 4790 9.1).
pub fn numeric_value(s: &str) -> Option<u64> {
    if !s.starts_with(|c: char| c.is_ascii_digit()) {
        return None;
    }
    let digits = &s[..s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len())];
    digits.parse().ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CaseFold {
    None,
    Ascii,
    Unicode,
}

fn fold(s: &str, mode: CaseFold) -> String {
    match mode {
        CaseFold::None => s.to_string(),
        CaseFold::Ascii => s.to_ascii_lowercase(),
        CaseFold::Unicode => s.to_lowercase(),
    }
}

// `*`/`?` become capture groups so a successful match can populate the
// numbered variables of RFC 5229. Returns None on an unterminated escape.
fn glob_to_regex(pattern: &str) -> Option<String> {
    let mut is_escaping = false;
    let translated: String = iter::once('^')
        .chain(pattern.chars().flat_map(|ch| match ch {
            '*' if !is_escaping => Either::Left("(.*)".chars()),
            '?' if !is_escaping => Either::Left("(.)".chars()),
            '\\' if !is_escaping => {
                is_escaping = true;
                Either::Left("".chars())
            }
            _ => {
                is_escaping = false;
                if regex_syntax::is_meta_character(ch) {
                    Either::Right(Either::Left(iter::once('\\').chain(iter::once(ch))))
                } else {
                    Either::Right(Either::Right(iter::once(ch)))
                }
            }
        }))
        .chain(iter::once('$'))
        .collect();
    if is_escaping {
        None
    } else {
        Some(translated)
    }
}

pub(crate) fn compile_regex(pattern: &str) -> Result<Regex, Error> {
    if pattern.len() > MAX_PATTERN_LEN {
        return Err(Error::MatchLimit(format!(
            "pattern is {} octets, limit is {}",
            pattern.len(),
            MAX_PATTERN_LEN
        )));
    }
    RegexBuilder::new(pattern)
        .size_limit(REGEX_SIZE_LIMIT)
        .build()
        .map_err(|e| Error::MatchLimit(format!("regex did not compile: {e}")))
}

fn run_regex(pattern: &str, value: &str) -> Result<Option<Vec<String>>, Error> {
    if value.len() > MAX_INPUT_LEN {
        return Err(Error::MatchLimit(format!(
            "input is {} octets, limit is {}",
            value.len(),
            MAX_INPUT_LEN
        )));
    }
    let re = compile_regex(pattern)?;
    Ok(re.captures(value).map(|caps| {
        caps.iter()
            .map(|g| g.map(|m| m.as_str().to_string()).unwrap_or_default())
            .collect()
    }))
}

fn match_glob(pattern: &str, value: &str, mode: CaseFold) -> Result<Option<Vec<String>>, Error> {
    let pattern = fold(pattern, mode);
    let value = fold(value, mode);
    let translated = glob_to_regex(&pattern)
        .ok_or_else(|| Error::MatchLimit("unterminated escape in pattern".into()))?;
    run_regex(&translated, &value)
}

fn octet_contains(value: &str, key: &str) -> bool {
    key.is_empty()
        || TwoWaySearcher::new(key.as_bytes())
            .search_in(value.as_bytes())
            .is_some()
}

fn hit() -> Result<Option<Vec<String>>, Error> {
    Ok(Some(Vec::new()))
}

fn outcome(matched: bool) -> Result<Option<Vec<String>>, Error> {
    if matched {
        hit()
    } else {
        Ok(None)
    }
}

/// One `(comparator, match-type, relational, value, key)` evaluation.
/// `Some(captures)` means a match; captures are non-empty only for
/// `:matches` and `:regex`.
pub fn test_string(
    comparator: Comparator,
    match_type: MatchType,
    rel: Relational,
    value: &str,
    key: &str,
) -> Result<Option<Vec<String>>, Error> {
    match comparator {
        Comparator::Octet => match match_type {
            MatchType::Contains => outcome(octet_contains(value, key)),
            MatchType::Is => outcome(value == key),
            MatchType::Matches => match_glob(key, value, CaseFold::None),
            MatchType::Regex => run_regex(key, value),
            MatchType::Value => outcome(rel.compare_str(value, key)),
            MatchType::Count => Err(Error::MatchLimit(
                "count match must be aggregated by the caller".into(),
            )),
        },
        Comparator::AsciiNumeric => match match_type {
            MatchType::Is => outcome(
                Relational::Eq.compare_numeric(numeric_value(value), numeric_value(key)),
            ),
            MatchType::Value => {
                outcome(rel.compare_numeric(numeric_value(value), numeric_value(key)))
            }
            _ => Err(Error::MatchLimit(format!(
                "comparator {} does not support this match type",
                comparator.name()
            ))),
        },
        Comparator::AsciiCasemap => match match_type {
            MatchType::Contains => outcome(octet_contains(
                &value.to_ascii_lowercase(),
                &key.to_ascii_lowercase(),
            )),
            MatchType::Is => outcome(value.eq_ignore_ascii_case(key)),
            MatchType::Matches => match_glob(key, value, CaseFold::Ascii),
            // Case-insensitive regex folds the input only; the pattern is
            // applied as written.
            MatchType::Regex => run_regex(key, &value.to_ascii_lowercase()),
            MatchType::Value => outcome(
                rel.compare_str(&value.to_ascii_lowercase(), &key.to_ascii_lowercase()),
            ),
            MatchType::Count => Err(Error::MatchLimit(
                "count match must be aggregated by the caller".into(),
            )),
        },
        Comparator::UnicodeCasemap => match match_type {
            MatchType::Contains => {
                outcome(value.to_lowercase().contains(&key.to_lowercase()))
            }
            MatchType::Is => outcome(value.to_lowercase() == key.to_lowercase()),
            MatchType::Matches => match_glob(key, value, CaseFold::Unicode),
            MatchType::Regex => run_regex(key, &value.to_lowercase()),
            MatchType::Value => outcome(
                rel.compare_str(&value.to_ascii_lowercase(), &key.to_ascii_lowercase()),
            ),
            MatchType::Count => Err(Error::MatchLimit(
                "count match must be aggregated by the caller".into(),
            )),
        },
    }
}

/// Matcher fields shared by every test that takes a key list.
#[derive(Debug, Clone, Default)]
pub struct MatcherTest {
    pub comparator: Comparator,
    pub match_type: MatchType,
    pub relational: Relational,
    pub keys: Vec<String>,
}

impl MatcherTest {
    pub fn is_count(&self) -> bool {
        self.match_type == MatchType::Count
    }

    /// Match `value` against the key list. Limit overruns are absorbed:
    /// the key simply does not match.
    pub(crate) fn try_match(&self, d: &mut RuntimeData, value: &str) -> Result<bool, Error> {
        for key in &self.keys {
            let key = expand_vars(d, key);
            match test_string(self.comparator, self.match_type, self.relational, value, &key) {
                Ok(Some(captures)) => {
                    if matches!(self.match_type, MatchType::Matches | MatchType::Regex) {
                        d.set_match_variables(captures);
                    }
                    return Ok(true);
                }
                Ok(None) => {}
                Err(Error::MatchLimit(reason)) => {
                    debug!(key = %key, %reason, "match limit exceeded, treating as no match");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(false)
    }

    pub(crate) fn count_matches(&self, d: &RuntimeData, count: u64) -> bool {
        self.keys.iter().any(|key| {
            let key = expand_vars(d, key);
            self.relational
                .compare_numeric(Some(count), numeric_value(&key))
        })
    }
}

#[test]
fn numeric_values() {
    assert_eq!(numeric_value("123"), Some(123));
    assert_eq!(numeric_value("123abc456"), Some(123));
    assert_eq!(numeric_value(""), None);
    assert_eq!(numeric_value("abc"), None);
    assert_eq!(numeric_value("99999999999999999999999"), None);
}

#[test]
fn relational_numeric_ordering() {
    // digits beat no-digits
    assert!(Relational::Lt.compare_numeric(Some(5), None));
    assert!(Relational::Eq.compare_numeric(None, None));
    assert!(Relational::Gt.compare_numeric(None, Some(10_000)));
    assert!(Relational::Ge.compare_numeric(Some(7), Some(7)));
}

#[test]
fn glob_translation() {
    assert_eq!(glob_to_regex("a*b?c"), Some("^a(.*)b(.)c$".into()));
    assert_eq!(glob_to_regex(r"a\*b"), Some("^a\\*b$".into()));
    assert_eq!(glob_to_regex("a.b"), Some("^a\\.b$".into()));
    assert_eq!(glob_to_regex("trailing\\"), None);
}

#[test]
fn octet_matching() {
    use Comparator::*;
    use MatchType::*;
    let rel = Relational::Eq;
    assert!(test_string(Octet, Is, rel, "abc", "abc").unwrap().is_some());
    assert!(test_string(Octet, Is, rel, "abc", "ABC").unwrap().is_none());
    assert!(test_string(Octet, Contains, rel, "xabcx", "abc").unwrap().is_some());
    let caps = test_string(Octet, Matches, rel, "user+detail", "*+*")
        .unwrap()
        .unwrap();
    assert_eq!(caps, vec!["user+detail", "user", "detail"]);
}

#[test]
fn casemap_matching() {
    use Comparator::*;
    use MatchType::*;
    let rel = Relational::Eq;
    assert!(test_string(AsciiCasemap, Is, rel, "aBc", "ABc").unwrap().is_some());
    assert!(test_string(AsciiCasemap, Contains, rel, "The Subject", "subject")
        .unwrap()
        .is_some());
    assert!(test_string(UnicodeCasemap, Is, rel, "STRASSE", "strasse")
        .unwrap()
        .is_some());
}

#[test]
fn numeric_comparator_rejects_substring_match() {
    assert!(matches!(
        test_string(
            Comparator::AsciiNumeric,
            MatchType::Contains,
            Relational::Eq,
            "1",
            "1"
        ),
        Err(Error::MatchLimit(_))
    ));
}

#[test]
fn regex_limits_absorbed() {
    let long_pattern = "a".repeat(MAX_PATTERN_LEN + 1);
    assert!(matches!(
        test_string(
            Comparator::Octet,
            MatchType::Regex,
            Relational::Eq,
            "a",
            &long_pattern
        ),
        Err(Error::MatchLimit(_))
    ));
    let long_input = "a".repeat(MAX_INPUT_LEN + 1);
    assert!(matches!(
        test_string(
            Comparator::Octet,
            MatchType::Regex,
            Relational::Eq,
            &long_input,
            "a+"
        ),
        Err(Error::MatchLimit(_))
    ));
}
