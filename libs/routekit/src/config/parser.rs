//! Parser for the sectioned `key = value` configuration format.
//!
//! ```text
//! ; comment
//! [actionmapping]
//! A?B?C = Handler1::doThing
//! hosts = [
//!     alpha,
//!     beta
//! ]
//! ```

use super::same_name;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedSection {
    pub name: String,
    /// `(original key, raw value)` in source order, unique case-insensitively.
    pub entries: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseFailure {
    pub line: usize,
    pub message: String,
}

impl ParseFailure {
    fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

struct Pending {
    key: String,
    value: String,
    depth: i32,
    line: usize,
}

fn bracket_depth(text: &str) -> i32 {
    text.chars().fold(0, |depth, c| match c {
        '[' => depth + 1,
        ']' => depth - 1,
        _ => depth,
    })
}

fn is_comment(line: &str) -> bool {
    line.starts_with(';') || line.starts_with('#')
}

pub fn parse(text: &str) -> Result<Vec<ParsedSection>, ParseFailure> {
    let mut sections: Vec<ParsedSection> = Vec::new();
    let mut current: Option<usize> = None;
    let mut pending: Option<Pending> = None;

    for (idx, raw_line) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw_line.trim();

        if let Some(p) = pending.as_mut() {
            if line.is_empty() || is_comment(line) {
                continue;
            }
            p.value.push('\n');
            p.value.push_str(line);
            p.depth += bracket_depth(line);
            if p.depth <= 0 {
                if let Some(done) = pending.take() {
                    insert(&mut sections, current, done.key, done.value);
                }
            }
            continue;
        }

        if line.is_empty() || is_comment(line) {
            continue;
        }

        if line.starts_with('[') && line.ends_with(']') && !line.contains('=') {
            let name = line[1..line.len() - 1].trim();
            if name.is_empty() {
                return Err(ParseFailure::new(line_no, "empty section name"));
            }
            current = Some(match find_section(&sections, name) {
                Some(pos) => pos,
                None => {
                    sections.push(ParsedSection {
                        name: name.to_string(),
                        entries: Vec::new(),
                    });
                    sections.len() - 1
                }
            });
            continue;
        }

        let Some((key, value)) = line.split_once('=') else {
            return Err(ParseFailure::new(
                line_no,
                format!("expected 'key = value', found '{line}'"),
            ));
        };
        let key = key.trim();
        let value = value.trim();
        if key.is_empty() {
            return Err(ParseFailure::new(line_no, "empty key"));
        }
        if current.is_none() {
            return Err(ParseFailure::new(
                line_no,
                format!("key '{key}' appears before any section header"),
            ));
        }

        let depth = if value.starts_with('[') {
            bracket_depth(value)
        } else {
            0
        };
        if depth > 0 {
            pending = Some(Pending {
                key: key.to_string(),
                value: value.to_string(),
                depth,
                line: line_no,
            });
        } else {
            insert(&mut sections, current, key.to_string(), value.to_string());
        }
    }

    if let Some(p) = pending {
        return Err(ParseFailure::new(
            p.line,
            format!("unterminated list value for key '{}'", p.key),
        ));
    }

    Ok(sections)
}

fn find_section(sections: &[ParsedSection], name: &str) -> Option<usize> {
    sections
        .iter()
        .position(|s| same_name(&s.name, name))
}

fn insert(sections: &mut [ParsedSection], current: Option<usize>, key: String, value: String) {
    let Some(section) = current.and_then(|pos| sections.get_mut(pos)) else {
        return;
    };
    match section
        .entries
        .iter_mut()
        .find(|(k, _)| same_name(k, &key))
    {
        Some(entry) => entry.1 = value,
        None => section.entries.push((key, value)),
    }
}

/// Render sections back into the text format.
pub fn render<'a, I, E>(sections: I) -> String
where
    I: IntoIterator<Item = (&'a str, E)>,
    E: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut out = String::new();
    for (name, entries) in sections {
        if !out.is_empty() {
            out.push('\n');
        }
        out.push('[');
        out.push_str(name);
        out.push_str("]\n");
        for (key, value) in entries {
            out.push_str(key);
            out.push_str(" = ");
            out.push_str(value);
            out.push('\n');
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sections_keys_and_comments() {
        let text = r#"
; routing table
[ActionMapping]
A?B?C = Handler1::doThing
# another comment
Handler1?B?D = Handler2::finish

[request]
__class = Request
"#;
        let parsed = parse(text).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].name, "ActionMapping");
        assert_eq!(
            parsed[0].entries,
            vec![
                ("A?B?C".to_string(), "Handler1::doThing".to_string()),
                ("Handler1?B?D".to_string(), "Handler2::finish".to_string()),
            ]
        );
        assert_eq!(parsed[1].entries[0].0, "__class");
    }

    #[test]
    fn multiline_list_is_joined() {
        let text = "[s]\nitems = [\n  1,\n  ; skipped\n  2\n]\nafter = x\n";
        let parsed = parse(text).unwrap();
        assert_eq!(parsed[0].entries[0].1, "[\n1,\n2\n]");
        assert_eq!(parsed[0].entries[1], ("after".to_string(), "x".to_string()));
    }

    #[test]
    fn repeated_sections_and_keys_merge() {
        let text = "[S]\nk = 1\n[s]\nK = 2\nother = 3\n";
        let parsed = parse(text).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(
            parsed[0].entries,
            vec![
                ("k".to_string(), "2".to_string()),
                ("other".to_string(), "3".to_string())
            ]
        );
    }

    #[test]
    fn errors_carry_line_numbers() {
        let err = parse("k = v\n").unwrap_err();
        assert_eq!(err.line, 1);
        assert!(err.message.contains("before any section"));

        let err = parse("[s]\nnot a pair\n").unwrap_err();
        assert_eq!(err.line, 2);

        let err = parse("[s]\nlist = [1,\n2\n").unwrap_err();
        assert_eq!(err.line, 2);
        assert!(err.message.contains("unterminated"));
    }

    #[test]
    fn render_round_trips_through_parse() {
        let text = "[a]\nx = 1\ny = [1,2]\n\n[b]\nz = Handler::run\n";
        let parsed = parse(text).unwrap();
        let rendered = render(parsed.iter().map(|s| {
            (
                s.name.as_str(),
                s.entries.iter().map(|(k, v)| (k.as_str(), v.as_str())),
            )
        }));
        assert_eq!(rendered, text);
    }
}
