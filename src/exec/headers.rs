//! Header edits are journalled, never applied to the message itself. Reads
//! replay the journal over the base values, which keeps evaluation
//! deterministic and leaves the host's message untouched.

/// One journal entry produced by addheader/deleteheader.
#[derive(Debug, Clone, PartialEq)]
pub enum HeaderEdit {
    Add {
        field: String,
        value: String,
        /// Append instead of prepending.
        last: bool,
    },
    Delete {
        field: String,
        /// Delete the first occurrence with this exact value; None deletes
        /// by index or wholesale.
        value: Option<String>,
        /// 1-based occurrence to delete; 0 selects all.
        index: u64,
        /// Count `index` from the end.
        last: bool,
    },
}

impl HeaderEdit {
    fn field(&self) -> &str {
        match self {
            HeaderEdit::Add { field, .. } | HeaderEdit::Delete { field, .. } => field,
        }
    }
}

// RFC 5293 6: these must survive deleteheader.
const PROTECTED_HEADERS: &[&str] = &["received", "auto-submitted"];

pub(crate) fn is_protected_header(name: &str) -> bool {
    PROTECTED_HEADERS
        .iter()
        .any(|p| p.eq_ignore_ascii_case(name))
}

// RFC 5322 ftext: %d33-57 / %d59-126.
pub(crate) fn is_valid_header_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|c| (33..=126).contains(&c) && c != b':')
}

/// Replay the journal over the base values of `field`. Deterministic and
/// idempotent for a fixed journal.
pub fn apply_edits(edits: &[HeaderEdit], field: &str, values: Vec<String>) -> Vec<String> {
    let mut result = values;
    for edit in edits {
        if !edit.field().eq_ignore_ascii_case(field) {
            continue;
        }
        match edit {
            HeaderEdit::Add { value, last, .. } => {
                if *last {
                    result.push(value.clone());
                } else {
                    result.insert(0, value.clone());
                }
            }
            HeaderEdit::Delete {
                value,
                index,
                last,
                ..
            } => {
                if *index > 0 {
                    let idx = if *last {
                        result.len() as i64 - *index as i64
                    } else {
                        *index as i64 - 1
                    };
                    if idx >= 0 && (idx as usize) < result.len() {
                        result.remove(idx as usize);
                    }
                } else if let Some(value) = value {
                    if let Some(at) = result.iter().position(|v| v == value) {
                        result.remove(at);
                    }
                } else {
                    result.clear();
                }
            }
        }
    }
    result
}

#[cfg(test)]
fn add(field: &str, value: &str, last: bool) -> HeaderEdit {
    HeaderEdit::Add {
        field: field.into(),
        value: value.into(),
        last,
    }
}

#[test]
fn overlay_add_order() {
    let edits = vec![
        add("X-Test", "b", false),
        add("X-Test", "a", false),
        add("x-test", "z", true),
    ];
    let out = apply_edits(&edits, "X-Test", vec!["base".into()]);
    assert_eq!(out, vec!["a", "b", "base", "z"]);
}

#[test]
fn overlay_delete_variants() {
    let base = || vec!["one".to_string(), "two".to_string(), "one".to_string()];
    let all = HeaderEdit::Delete {
        field: "H".into(),
        value: None,
        index: 0,
        last: false,
    };
    assert!(apply_edits(&[all], "h", base()).is_empty());

    let by_value = HeaderEdit::Delete {
        field: "H".into(),
        value: Some("one".into()),
        index: 0,
        last: false,
    };
    assert_eq!(apply_edits(&[by_value], "H", base()), vec!["two", "one"]);

    let by_index_last = HeaderEdit::Delete {
        field: "H".into(),
        value: None,
        index: 1,
        last: true,
    };
    assert_eq!(apply_edits(&[by_index_last], "H", base()), vec!["one", "two"]);

    let out_of_range = HeaderEdit::Delete {
        field: "H".into(),
        value: None,
        index: 9,
        last: false,
    };
    assert_eq!(apply_edits(&[out_of_range], "H", base()), base());
}

#[test]
fn overlay_is_field_scoped() {
    let edits = vec![add("A", "x", false)];
    assert!(apply_edits(&edits, "B", vec![]).is_empty());
}

#[test]
fn header_name_validity() {
    assert!(is_valid_header_name("X-Test"));
    assert!(!is_valid_header_name(""));
    assert!(!is_valid_header_name("X:Test"));
    assert!(!is_valid_header_name("X Test"));
    assert!(is_protected_header("Received"));
    assert!(is_protected_header("AUTO-SUBMITTED"));
    assert!(!is_protected_header("Subject"));
}
