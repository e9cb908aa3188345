//! Decoder for the index feed's newline-delimited records.
//!
//! Each line is a flat object such as:
//!
//! ```text
//! {"Path":"a/b","Version":"v1.0.0","Timestamp":"2022-10-23T14:22:05.247192Z"}
//! ```
//!
//! The decoder does not run a general JSON parser. It walks each line once,
//! looking for the `"Path"`, `"Version"` and `"Timestamp"` keys, and takes
//! the text between the next pair of quotes as the value. Keys may appear in
//! any order and unknown keys are skipped. Values are borrowed from the
//! input; nothing is allocated until an [`IndexEntry`] is built.
//!
//! The whole page must be buffered before decoding. The feed's pages are
//! bounded by `limit`, so a streaming decoder buys nothing here.

use modcrawl_shared::{IndexEntry, IndexTimestamp, ModCrawlError, Result};

/// Shortest buffer that can hold one plausible record.
pub const MIN_RECORD_LEN: usize = 30;

const PATH_KEY: &str = "Path";
const VERSION_KEY: &str = "Version";
const TIMESTAMP_KEY: &str = "Timestamp";

/// A decoded record borrowing its fields from the input buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntryRef<'a> {
    pub path: &'a str,
    pub version: &'a str,
    /// Timestamp text exactly as it appeared on the line.
    pub timestamp: &'a str,
}

impl From<IndexEntryRef<'_>> for IndexEntry {
    fn from(entry: IndexEntryRef<'_>) -> Self {
        IndexEntry {
            path: entry.path.to_string(),
            version: entry.version.to_string(),
            timestamp: IndexTimestamp::new(entry.timestamp),
        }
    }
}

/// Iterator over the records of a buffered page.
///
/// Blank lines are skipped. Line numbers in errors are 1-based and count
/// blank lines.
#[derive(Debug, Clone)]
pub struct Records<'a> {
    lines: std::iter::Enumerate<std::str::Split<'a, char>>,
}

impl<'a> Iterator for Records<'a> {
    type Item = Result<IndexEntryRef<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (index, line) = self.lines.next()?;
            if line.trim().is_empty() {
                continue;
            }
            return Some(decode_line(line, index + 1));
        }
    }
}

/// Start decoding a buffered page.
///
/// Fails with [`ModCrawlError::TruncatedInput`] when the buffer is shorter
/// than [`MIN_RECORD_LEN`]. Callers treat an empty body as the end of the
/// feed before they get here.
pub fn records(input: &str) -> Result<Records<'_>> {
    if input.len() < MIN_RECORD_LEN {
        return Err(ModCrawlError::TruncatedInput {
            len: input.len(),
            min: MIN_RECORD_LEN,
        });
    }
    Ok(Records {
        lines: input.split('\n').enumerate(),
    })
}

/// Decode a buffered page into owned entries, stopping at the first bad line.
pub fn decode(input: &str) -> Result<Vec<IndexEntry>> {
    records(input)?
        .map(|record| record.map(IndexEntry::from))
        .collect()
}

/// Decode a single line. `line_no` is only used for error reporting.
///
/// Surrounding whitespace, including a trailing `\r`, is ignored.
pub fn decode_line(line: &str, line_no: usize) -> Result<IndexEntryRef<'_>> {
    let body = line
        .trim()
        .strip_prefix('{')
        .and_then(|l| l.strip_suffix('}'))
        .ok_or_else(|| ModCrawlError::malformed(line_no, "record is not enclosed in braces"))?;

    let mut path = None;
    let mut version = None;
    let mut timestamp = None;

    let mut rest = body;
    while let Some(start) = rest.find('"') {
        let (key, after_key) = quoted(&rest[start..])
            .ok_or_else(|| ModCrawlError::malformed(line_no, "unterminated string"))?;

        // A quoted string not followed by ':' is a value of some other key.
        let Some(after_colon) = after_key.trim_start().strip_prefix(':') else {
            rest = after_key;
            continue;
        };
        let value_part = after_colon.trim_start();

        let slot = match key {
            PATH_KEY => Some(&mut path),
            VERSION_KEY => Some(&mut version),
            TIMESTAMP_KEY => Some(&mut timestamp),
            _ => None,
        };

        if !value_part.starts_with('"') {
            if slot.is_some() {
                return Err(ModCrawlError::malformed(
                    line_no,
                    format!("field {key} is not a string"),
                ));
            }
            rest = value_part;
            continue;
        }

        let (value, after_value) = quoted(value_part).ok_or_else(|| {
            ModCrawlError::malformed(line_no, format!("unterminated value for {key}"))
        })?;
        if let Some(slot) = slot {
            *slot = Some(value);
        }
        rest = after_value;
    }

    Ok(IndexEntryRef {
        path: require(path, PATH_KEY, line_no)?,
        version: require(version, VERSION_KEY, line_no)?,
        timestamp: require(timestamp, TIMESTAMP_KEY, line_no)?,
    })
}

fn require<'a>(field: Option<&'a str>, name: &str, line_no: usize) -> Result<&'a str> {
    field.ok_or_else(|| ModCrawlError::malformed(line_no, format!("missing field {name}")))
}

/// Split `s`, which must start with `"`, into the quoted text and the
/// remainder after the closing quote. Backslash escapes are skipped over but
/// not unescaped.
fn quoted(s: &str) -> Option<(&str, &str)> {
    let bytes = s.as_bytes();
    if bytes.first() != Some(&b'"') {
        return None;
    }
    let mut i = 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            // '"' is ASCII, so both slices fall on char boundaries.
            b'"' => return Some((&s[1..i], &s[i + 1..])),
            _ => i += 1,
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const LINE_A: &str =
        r#"{"Path":"a/b","Version":"v1.0.0","Timestamp":"2022-10-23T14:22:05.247192Z"}"#;

    #[test]
    fn decodes_single_record() {
        let entries = decode(LINE_A).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path, "a/b");
        assert_eq!(entries[0].version, "v1.0.0");
        assert_eq!(entries[0].timestamp.as_str(), "2022-10-23T14:22:05.247192Z");
    }

    #[test]
    fn field_order_does_not_matter() {
        let shuffled =
            r#"{"Timestamp":"2022-10-23T14:22:05.247192Z","Path":"a/b","Version":"v1.0.0"}"#;
        let reversed =
            r#"{"Version":"v1.0.0","Timestamp":"2022-10-23T14:22:05.247192Z","Path":"a/b"}"#;

        let expected = decode_line(LINE_A, 1).unwrap();
        assert_eq!(decode_line(shuffled, 1).unwrap(), expected);
        assert_eq!(decode_line(reversed, 1).unwrap(), expected);
    }

    #[test]
    fn preserves_fractional_digits_verbatim() {
        let input = concat!(
            r#"{"Path":"x/y","Version":"v0.1.0","Timestamp":"2022-10-23T14:22:05.24719Z"}"#,
            "\n",
            r#"{"Path":"x/z","Version":"v0.2.0","Timestamp":"2022-10-23T14:22:06.100000Z"}"#,
            "\n",
        );
        let entries = decode(input).unwrap();
        assert_eq!(entries[0].timestamp.as_str(), "2022-10-23T14:22:05.24719Z");
        assert_eq!(entries[1].timestamp.as_str(), "2022-10-23T14:22:06.100000Z");
    }

    #[test]
    fn final_newline_is_optional() {
        let with = format!("{LINE_A}\n{LINE_A}\n");
        let without = format!("{LINE_A}\n{LINE_A}");
        assert_eq!(decode(&with).unwrap().len(), 2);
        assert_eq!(decode(&without).unwrap().len(), 2);
    }

    #[test]
    fn tolerates_crlf_and_blank_lines() {
        let input = format!("{LINE_A}\r\n\r\n\n{LINE_A}\r\n");
        let entries = decode(&input).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].timestamp.as_str(), "2022-10-23T14:22:05.247192Z");
    }

    #[test]
    fn skips_unknown_fields() {
        let line = r#"{"Origin":{"VCS":"git"},"Path":"a/b","Retracted":false,"Note":"x:y","Version":"v1.0.0","Timestamp":"2022-10-23T14:22:05.247192Z"}"#;
        let entry = decode_line(line, 1).unwrap();
        assert_eq!(entry.path, "a/b");
        assert_eq!(entry.version, "v1.0.0");
    }

    #[test]
    fn escaped_quotes_do_not_end_a_value() {
        let line = r#"{"Note":"say \"Path\"","Path":"a/b","Version":"v1.0.0","Timestamp":"2022-10-23T14:22:05.247192Z"}"#;
        assert_eq!(decode_line(line, 1).unwrap().path, "a/b");
    }

    #[test]
    fn missing_braces_is_malformed_with_line_number() {
        let input = format!("{LINE_A}\n\"Path\":\"a/b\",\"Version\":\"v1\"\n");
        match decode(&input) {
            Err(ModCrawlError::MalformedRecord { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected malformed record, got {other:?}"),
        }
    }

    #[test]
    fn missing_field_is_malformed() {
        let line = r#"{"Path":"a/b","Timestamp":"2022-10-23T14:22:05.247192Z"}"#;
        let err = decode_line(line, 7).unwrap_err();
        match err {
            ModCrawlError::MalformedRecord { line, reason } => {
                assert_eq!(line, 7);
                assert!(reason.contains("Version"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn unterminated_value_is_malformed() {
        let line = r#"{"Path":"a/b","Version":"v1.0.0","Timestamp":"2022-10-23}"#;
        assert!(matches!(
            decode_line(line, 1),
            Err(ModCrawlError::MalformedRecord { .. })
        ));
    }

    #[test]
    fn non_string_known_field_is_malformed() {
        let line = r#"{"Path":"a/b","Version":1,"Timestamp":"2022-10-23T14:22:05.247192Z"}"#;
        assert!(decode_line(line, 1).is_err());
    }

    #[test]
    fn short_buffer_is_truncated() {
        match decode(r#"{"Path":"a"}"#) {
            Err(ModCrawlError::TruncatedInput { len, min }) => {
                assert_eq!(len, 12);
                assert_eq!(min, MIN_RECORD_LEN);
            }
            other => panic!("expected truncated input, got {other:?}"),
        }
    }

    #[test]
    fn iterator_yields_borrowed_slices() {
        let input = format!("{LINE_A}\n");
        let mut iter = records(&input).unwrap();
        let entry = iter.next().unwrap().unwrap();
        assert!(input.contains(entry.path));
        assert!(iter.next().is_none());
    }

    #[test]
    fn non_ascii_values_are_sliced_safely() {
        let line = r#"{"Path":"example.com/größe","Version":"v1.0.0","Timestamp":"2022-10-23T14:22:05.247192Z"}"#;
        assert_eq!(decode_line(line, 1).unwrap().path, "example.com/größe");
    }
}
