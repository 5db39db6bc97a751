use crate::error::Error;
use crate::lex::Position;
use crate::matcher::{self, AddressPart, Comparator, MatchType, MatcherTest, Relational};
use crate::parse::Value;
use crate::sema::Script;

#[derive(Debug, Clone, Copy)]
pub(crate) enum TagKind {
    Flag,
    Num,
    Str { min: usize, max: usize },
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct TagSpec {
    pub name: &'static str,
    pub kind: TagKind,
}

impl TagSpec {
    pub fn flag(name: &'static str) -> TagSpec {
        TagSpec {
            name,
            kind: TagKind::Flag,
        }
    }
    pub fn num(name: &'static str) -> TagSpec {
        TagSpec {
            name,
            kind: TagKind::Num,
        }
    }
    pub fn str1(name: &'static str) -> TagSpec {
        TagSpec {
            name,
            kind: TagKind::Str { min: 1, max: 1 },
        }
    }
    pub fn strs(name: &'static str) -> TagSpec {
        TagSpec {
            name,
            kind: TagKind::Str {
                min: 1,
                max: usize::MAX,
            },
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum PosKind {
    Num,
    Str { min: usize, max: usize },
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct PosSpec {
    pub kind: PosKind,
    pub optional: bool,
}

impl PosSpec {
    pub fn num() -> PosSpec {
        PosSpec {
            kind: PosKind::Num,
            optional: false,
        }
    }
    pub fn str1() -> PosSpec {
        PosSpec {
            kind: PosKind::Str { min: 1, max: 1 },
            optional: false,
        }
    }
    pub fn strs() -> PosSpec {
        PosSpec {
            kind: PosKind::Str {
                min: 1,
                max: usize::MAX,
            },
            optional: false,
        }
    }
    pub fn optional(mut self) -> PosSpec {
        self.optional = true;
        self
    }
}

#[derive(Debug, Clone)]
pub(crate) enum TagValue {
    Flag,
    Num(u64),
    Str(Vec<String>),
}

#[derive(Debug, Clone)]
pub(crate) enum PosValue {
    Num(u64),
    Str(Vec<String>),
}

/// Arguments of one command or test after schema binding.
#[derive(Debug, Default)]
pub(crate) struct Bound {
    tags: Vec<(String, TagValue)>,
    pos: Vec<PosValue>,
}

impl Bound {
    pub fn flag(&self, name: &str) -> bool {
        self.tags.iter().any(|(n, _)| n == name)
    }

    pub fn num(&self, name: &str) -> Option<u64> {
        self.tags.iter().find_map(|(n, v)| match v {
            TagValue::Num(x) if n == name => Some(*x),
            _ => None,
        })
    }

    pub fn strs(&self, name: &str) -> Option<Vec<String>> {
        self.tags.iter().find_map(|(n, v)| match v {
            TagValue::Str(list) if n == name => Some(list.clone()),
            _ => None,
        })
    }

    pub fn str1(&self, name: &str) -> Option<String> {
        self.strs(name).and_then(|mut l| {
            if l.is_empty() {
                None
            } else {
                Some(l.remove(0))
            }
        })
    }

    pub fn pos_num(&self, i: usize) -> Option<u64> {
        match self.pos.get(i) {
            Some(PosValue::Num(n)) => Some(*n),
            _ => None,
        }
    }

    pub fn pos_strs(&self, i: usize) -> Option<Vec<String>> {
        match self.pos.get(i) {
            Some(PosValue::Str(l)) => Some(l.clone()),
            _ => None,
        }
    }

    pub fn pos_str1(&self, i: usize) -> Option<String> {
        self.pos_strs(i).and_then(|mut l| {
            if l.is_empty() {
                None
            } else {
                Some(l.remove(0))
            }
        })
    }
}

/// Walk an argument list left to right, binding tags first (a tag may
/// consume the following value) and positional arguments after, against the
/// given schema. The first mismatch aborts with a positioned load error.
pub(crate) fn bind(
    script: &Script,
    tags: &[TagSpec],
    pos_specs: &[PosSpec],
    position: &Position,
    args: &[Value],
) -> Result<Bound, Error> {
    let mut bound = Bound::default();
    let mut it = args.iter().peekable();

    while let Some(Value::Tag(_)) = it.peek() {
        let name = match it.next() {
            Some(Value::Tag(name)) => name.clone(),
            _ => unreachable!(),
        };
        let spec = tags
            .iter()
            .find(|t| t.name == name)
            .ok_or_else(|| Error::load(position, format!("unknown tag :{name}")))?;
        if bound.flag(&name) {
            return Err(Error::load(position, format!("duplicate tag :{name}")));
        }
        let value = match spec.kind {
            TagKind::Flag => TagValue::Flag,
            TagKind::Num => match it.next() {
                Some(Value::Number(n)) => TagValue::Num(*n),
                _ => {
                    return Err(Error::load(position, format!(":{name} requires a number")));
                }
            },
            TagKind::Str { min, max } => {
                let list = match it.next() {
                    Some(Value::Str(s)) => vec![coerce(script, s)],
                    Some(Value::List(l)) => l.iter().map(|s| coerce(script, s)).collect(),
                    _ => {
                        return Err(Error::load(
                            position,
                            format!(":{name} requires a string or string list"),
                        ));
                    }
                };
                check_str_count(&list, min, max, position, &format!(":{name}"))?;
                TagValue::Str(list)
            }
        };
        bound.tags.push((name, value));
    }

    for arg in it {
        let value = match arg {
            Value::Tag(name) => {
                return Err(Error::load(
                    position,
                    format!("tag :{name} after positional arguments"),
                ));
            }
            Value::Number(n) => PosValue::Num(*n),
            Value::Str(s) => PosValue::Str(vec![coerce(script, s)]),
            Value::List(l) => PosValue::Str(l.iter().map(|s| coerce(script, s)).collect()),
        };
        bound.pos.push(value);
    }

    if bound.pos.len() > pos_specs.len() {
        return Err(Error::load(position, "too many arguments"));
    }
    for (i, spec) in pos_specs.iter().enumerate() {
        match (bound.pos.get(i), spec.kind) {
            (None, _) => {
                if !spec.optional {
                    return Err(Error::load(position, "missing argument"));
                }
            }
            (Some(PosValue::Num(_)), PosKind::Num) => {}
            (Some(PosValue::Num(_)), PosKind::Str { .. }) => {
                return Err(Error::load(position, "expected a string argument"));
            }
            (Some(PosValue::Str(_)), PosKind::Num) => {
                return Err(Error::load(position, "expected a numeric argument"));
            }
            (Some(PosValue::Str(list)), PosKind::Str { min, max }) => {
                check_str_count(list, min, max, position, "argument")?;
            }
        }
    }
    Ok(bound)
}

fn check_str_count(
    list: &[String],
    min: usize,
    max: usize,
    position: &Position,
    what: &str,
) -> Result<(), Error> {
    if list.len() < min {
        return Err(Error::load(
            position,
            format!("{what} requires at least {min} string(s)"),
        ));
    }
    if list.len() > max {
        return Err(Error::load(
            position,
            format!("{what} accepts at most {max} string(s)"),
        ));
    }
    Ok(())
}

// Literal strings get encoded-character substitution exactly once, at load
// time, before any runtime variable expansion (RFC 5228 2.4.2.4).
fn coerce(script: &Script, s: &str) -> String {
    if script.requires_extension("encoded-character") {
        decode_encoded(s)
    } else {
        s.to_string()
    }
}

fn decode_encoded(s: &str) -> String {
    let mut out = String::new();
    let mut rest = s;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}').and_then(|end| {
            decode_encoded_body(&after[..end]).map(|decoded| (decoded, &after[end + 1..]))
        }) {
            Some((decoded, tail)) => {
                out.push_str(&decoded);
                rest = tail;
            }
            None => {
                // Not a valid encoding; keep the text verbatim.
                out.push_str("${");
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_encoded_body(body: &str) -> Option<String> {
    let (kind, spec) = body.split_once(':')?;
    let parts = spec.split_whitespace();
    match kind.trim().to_ascii_lowercase().as_str() {
        "hex" => {
            let mut bytes = Vec::new();
            let mut any = false;
            for p in parts {
                if p.len() != 2 {
                    return None;
                }
                bytes.push(u8::from_str_radix(p, 16).ok()?);
                any = true;
            }
            if !any {
                return None;
            }
            String::from_utf8(bytes).ok()
        }
        "unicode" => {
            let mut out = String::new();
            let mut any = false;
            for p in parts {
                let cp = u32::from_str_radix(p, 16).ok()?;
                out.push(char::from_u32(cp)?);
                any = true;
            }
            if !any {
                return None;
            }
            Some(out)
        }
        _ => None,
    }
}

/// Tags shared by every test that takes a key list.
pub(crate) fn matcher_tag_specs() -> Vec<TagSpec> {
    vec![
        TagSpec::str1("comparator"),
        TagSpec::flag("is"),
        TagSpec::flag("contains"),
        TagSpec::flag("matches"),
        TagSpec::flag("regex"),
        TagSpec::str1("value"),
        TagSpec::str1("count"),
    ]
}

pub(crate) fn address_part_tag_specs() -> Vec<TagSpec> {
    vec![
        TagSpec::flag("all"),
        TagSpec::flag("localpart"),
        TagSpec::flag("domain"),
        TagSpec::flag("user"),
        TagSpec::flag("detail"),
    ]
}

fn require(script: &Script, name: &str, position: &Position) -> Result<(), Error> {
    if script.requires_extension(name) {
        Ok(())
    } else {
        Err(Error::ExtensionMissing(position.clone(), name.to_string()))
    }
}

/// Assemble the matcher fields out of bound arguments, enforcing the
/// comparator-count and match-count invariants and the extension gates.
pub(crate) fn extract_matcher(
    script: &Script,
    bound: &Bound,
    keys: Vec<String>,
    position: &Position,
) -> Result<MatcherTest, Error> {
    let mut m = MatcherTest {
        keys,
        ..MatcherTest::default()
    };
    let mut match_count = 0;

    for (name, mt) in [
        ("is", MatchType::Is),
        ("contains", MatchType::Contains),
        ("matches", MatchType::Matches),
        ("regex", MatchType::Regex),
    ] {
        if bound.flag(name) {
            m.match_type = mt;
            match_count += 1;
        }
    }
    if bound.flag("regex") {
        require(script, "regex", position)?;
    }
    for (name, mt) in [("value", MatchType::Value), ("count", MatchType::Count)] {
        if let Some(rel) = bound.str1(name) {
            require(script, "relational", position)?;
            m.match_type = mt;
            m.relational = Relational::from_name(&rel).ok_or_else(|| {
                Error::load(position, format!("unknown relational operator \"{rel}\""))
            })?;
            match_count += 1;
        }
    }
    if match_count > 1 {
        return Err(Error::load(position, "match type specified twice"));
    }

    if let Some(name) = bound.str1("comparator") {
        m.comparator = Comparator::from_name(&name)
            .ok_or_else(|| Error::load(position, format!("unknown comparator \"{name}\"")))?;
        match m.comparator {
            Comparator::AsciiNumeric => require(script, "comparator-i;ascii-numeric", position)?,
            Comparator::UnicodeCasemap => {
                require(script, "comparator-i;unicode-casemap", position)?
            }
            _ => {}
        }
    }

    validate_matcher(&m, position)?;
    Ok(m)
}

fn validate_matcher(m: &MatcherTest, position: &Position) -> Result<(), Error> {
    if m.comparator == Comparator::AsciiNumeric
        && matches!(
            m.match_type,
            MatchType::Contains | MatchType::Matches | MatchType::Regex
        )
    {
        return Err(Error::load(
            position,
            format!(
                "comparator {} cannot be combined with this match type",
                m.comparator.name()
            ),
        ));
    }
    match m.match_type {
        MatchType::Count => {
            // The aggregate count compares against a single numeric key.
            if m.keys.len() != 1 {
                return Err(Error::load(position, ":count takes exactly one key"));
            }
            let key = &m.keys[0];
            if !key.contains("${") && matcher::numeric_value(key).is_none() {
                return Err(Error::load(position, ":count key must be numeric"));
            }
        }
        MatchType::Regex => {
            for key in m.keys.iter().filter(|k| !k.contains("${")) {
                matcher::compile_regex(key)
                    .map_err(|e| Error::load(position, format!("invalid regex: {e}")))?;
            }
        }
        _ => {}
    }
    Ok(())
}

pub(crate) fn extract_address_part(
    script: &Script,
    bound: &Bound,
    position: &Position,
) -> Result<AddressPart, Error> {
    let mut part = AddressPart::All;
    let mut count = 0;
    for (name, p) in [
        ("all", AddressPart::All),
        ("localpart", AddressPart::Localpart),
        ("domain", AddressPart::Domain),
        ("user", AddressPart::User),
        ("detail", AddressPart::Detail),
    ] {
        if bound.flag(name) {
            part = p;
            count += 1;
        }
    }
    if count > 1 {
        return Err(Error::load(position, "multiple address parts"));
    }
    if matches!(part, AddressPart::User | AddressPart::Detail) {
        require(script, "subaddress", position)?;
    }
    Ok(part)
}

#[test]
fn decode_hex_and_unicode() {
    assert_eq!(decode_encoded("${hex:40}"), "@");
    assert_eq!(decode_encoded("${hex: 40 24 }"), "@$");
    assert_eq!(decode_encoded("${unicode:40}"), "@");
    assert_eq!(decode_encoded("${UNICODE:672c}"), "\u{672c}");
    // invalid encodings stay verbatim
    assert_eq!(decode_encoded("${hex:401}"), "${hex:401}");
    assert_eq!(decode_encoded("${hex:}"), "${hex:}");
    assert_eq!(decode_encoded("${foo}"), "${foo}");
    assert_eq!(decode_encoded("$${hex:40}"), "$@");
}
