//! Line-level lexing of the text exposition format using `nom`.
//!
//! Each non-empty line is one of: a `# HELP` or `# TYPE` declaration, a
//! free-form comment, or a sample `name{label="value",...} value [timestamp]`.

use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{tag, take_till1, take_while, take_while1},
    character::complete::{char, i64 as integer, space0, space1},
    combinator::{opt, recognize, rest},
    multi::separated_list0,
    sequence::{delimited, pair, preceded},
};

use super::model::MetricType;

/// One lexed line.
#[derive(Debug, Clone, PartialEq)]
pub enum Line<'a> {
    /// Empty or whitespace-only line.
    Blank,
    /// A comment that is neither `HELP` nor `TYPE`.
    Comment,
    /// `# HELP <name> <text>`.
    Help {
        /// Family name.
        name: &'a str,
        /// Unescaped help text.
        text: String,
    },
    /// `# TYPE <name> <type>`.
    Type {
        /// Family name.
        name: &'a str,
        /// Declared type.
        kind: MetricType,
    },
    /// A sample line.
    Sample(RawSample<'a>),
}

/// A sample line before it is attached to a family.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSample<'a> {
    /// Sample name, possibly carrying a `_bucket`, `_sum`, or `_count` suffix.
    pub name: &'a str,
    /// Labels in document order, values unescaped.
    pub labels: Vec<(&'a str, String)>,
    /// Sample value.
    pub value: f64,
    /// Optional millisecond timestamp.
    pub timestamp_ms: Option<i64>,
}

const fn is_name_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == ':'
}

const fn is_name_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == ':'
}

const fn is_label_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

const fn is_label_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn failure(input: &str, kind: nom::error::ErrorKind) -> nom::Err<nom::error::Error<&str>> {
    nom::Err::Failure(nom::error::Error::new(input, kind))
}

fn metric_name(input: &str) -> IResult<&str, &str> {
    recognize(pair(take_while1(is_name_start), take_while(is_name_continue))).parse(input)
}

fn label_name(input: &str) -> IResult<&str, &str> {
    recognize(pair(take_while1(is_label_start), take_while(is_label_continue))).parse(input)
}

/// Parses a double-quoted label value with `\\`, `\"`, and `\n` escapes.
fn label_value(input: &str) -> IResult<&str, String> {
    let (input, _) = char('"')(input)?;
    let mut value = String::new();
    let mut chars = input.char_indices();
    loop {
        match chars.next() {
            Some((idx, '"')) => return Ok((&input[idx + 1..], value)),
            Some((_, '\\')) => match chars.next() {
                Some((_, 'n')) => value.push('\n'),
                Some((_, c @ ('\\' | '"'))) => value.push(c),
                Some((_, c)) => {
                    value.push('\\');
                    value.push(c);
                }
                None => return Err(failure(input, nom::error::ErrorKind::Char)),
            },
            Some((_, c)) => value.push(c),
            None => return Err(failure(input, nom::error::ErrorKind::Char)),
        }
    }
}

fn label(input: &str) -> IResult<&str, (&str, String)> {
    let (input, name) = label_name(input)?;
    let (input, _) = delimited(space0, char('='), space0).parse(input)?;
    let (input, value) = label_value(input)?;
    Ok((input, (name, value)))
}

/// Parses `{a="1", b="2",}`; a trailing comma is allowed.
fn labels(input: &str) -> IResult<&str, Vec<(&str, String)>> {
    let (input, _) = pair(char('{'), space0).parse(input)?;
    let (input, labels) =
        separated_list0(delimited(space0, char(','), space0), label).parse(input)?;
    let (input, _) = (space0, opt(char(',')), space0, char('}')).parse(input)?;
    Ok((input, labels))
}

/// Parses a float value, accepting the `NaN`, `+Inf`, and `-Inf` spellings.
pub fn parse_float(token: &str) -> Option<f64> {
    match token {
        "NaN" | "nan" => Some(f64::NAN),
        "+Inf" | "Inf" | "+inf" | "inf" => Some(f64::INFINITY),
        "-Inf" | "-inf" => Some(f64::NEG_INFINITY),
        _ => token.parse().ok(),
    }
}

fn sample_value(input: &str) -> IResult<&str, f64> {
    let (remaining, token) = take_till1(|c: char| c == ' ' || c == '\t')(input)?;
    parse_float(token)
        .map(|v| (remaining, v))
        .ok_or_else(|| failure(input, nom::error::ErrorKind::Float))
}

fn sample(input: &str) -> IResult<&str, Line<'_>> {
    let (input, name) = metric_name(input)?;
    let (input, labels) = opt(preceded(space0, labels)).parse(input)?;
    let (input, value) = if labels.is_some() {
        preceded(space0, sample_value).parse(input)?
    } else {
        preceded(space1, sample_value).parse(input)?
    };
    let (input, timestamp_ms) = opt(preceded(space1, integer)).parse(input)?;
    let (input, _) = space0(input)?;
    Ok((
        input,
        Line::Sample(RawSample {
            name,
            labels: labels.unwrap_or_default(),
            value,
            timestamp_ms,
        }),
    ))
}

fn unescape_help(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

fn help(input: &str) -> IResult<&str, Line<'_>> {
    let (input, (_, _, name, text)) =
        (tag("HELP"), space1, metric_name, opt(preceded(space1, rest))).parse(input)?;
    Ok((
        input,
        Line::Help {
            name,
            text: unescape_help(text.unwrap_or_default().trim_end()),
        },
    ))
}

fn metric_type(input: &str) -> IResult<&str, MetricType> {
    let (remaining, keyword) = take_while1(|c: char| c.is_ascii_alphabetic())(input)?;
    MetricType::from_keyword(keyword)
        .map(|kind| (remaining, kind))
        .ok_or_else(|| failure(input, nom::error::ErrorKind::Tag))
}

fn type_declaration(input: &str) -> IResult<&str, Line<'_>> {
    let (input, (_, _, name, _, kind, _)) =
        (tag("TYPE"), space1, metric_name, space1, metric_type, space0).parse(input)?;
    Ok((input, Line::Type { name, kind }))
}

fn free_comment(input: &str) -> IResult<&str, Line<'_>> {
    let (input, _) = rest(input)?;
    Ok((input, Line::Comment))
}

fn comment(input: &str) -> IResult<&str, Line<'_>> {
    let (input, _) = pair(char('#'), space0).parse(input)?;
    alt((help, type_declaration, free_comment)).parse(input)
}

/// Lexes one line of an exposition document.
///
/// # Errors
///
/// Returns a description of the problem if the line is neither a comment
/// nor a well-formed sample.
pub fn lex_line(line: &str) -> Result<Line<'_>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(Line::Blank);
    }
    let parsed = if line.starts_with('#') {
        comment(line)
    } else {
        sample(line)
    };
    match parsed {
        Ok(("", lexed)) => Ok(lexed),
        Ok((remaining, _)) => Err(format!("unexpected trailing input {remaining:?}")),
        Err(e) => Err(format!("malformed line {line:?} ({e})")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_of(line: &str) -> RawSample<'_> {
        match lex_line(line).expect("line should lex") {
            Line::Sample(s) => s,
            other => panic!("expected a sample, got {other:?}"),
        }
    }

    #[test]
    fn lex_bare_sample() {
        let s = sample_of("metric_a 1");
        assert_eq!(s.name, "metric_a");
        assert!(s.labels.is_empty());
        assert!((s.value - 1.0).abs() < f64::EPSILON);
        assert_eq!(s.timestamp_ms, None);
    }

    #[test]
    fn lex_labels_and_timestamp() {
        let s = sample_of(r#"http_requests_total{method="post",code="200"} 1027 1395066363000"#);
        assert_eq!(s.name, "http_requests_total");
        assert_eq!(
            s.labels,
            vec![("method", "post".to_string()), ("code", "200".to_string())]
        );
        assert_eq!(s.timestamp_ms, Some(1_395_066_363_000));
    }

    #[test]
    fn lex_label_escapes_and_trailing_comma() {
        let s = sample_of(r#"msdos_file_access_time_seconds{path="C:\\DIR\\FILE.TXT",error="Cannot find file:\n\"FILE.TXT\"",} 1.458255915e9"#);
        assert_eq!(s.labels[0].1, r"C:\DIR\FILE.TXT");
        assert_eq!(s.labels[1].1, "Cannot find file:\n\"FILE.TXT\"");
        assert!((s.value - 1.458_255_915e9).abs() < 1.0);
    }

    #[test]
    fn lex_special_values() {
        assert!(sample_of("m NaN").value.is_nan());
        assert_eq!(sample_of("m +Inf").value, f64::INFINITY);
        assert_eq!(sample_of("m -Inf").value, f64::NEG_INFINITY);
        assert_eq!(sample_of(r#"m_bucket{le="+Inf"} 3"#).labels[0].1, "+Inf");
    }

    #[test]
    fn lex_value_directly_after_labels() {
        let s = sample_of(r#"m{a="x"}10"#);
        assert_eq!(s.labels, vec![("a", "x".to_string())]);
        assert!((s.value - 10.0).abs() < f64::EPSILON);
        assert!((sample_of("up{}1").value - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn lex_empty_label_set() {
        let s = sample_of("up{} 1");
        assert!(s.labels.is_empty());
    }

    #[test]
    fn lex_declarations() {
        assert_eq!(
            lex_line("# TYPE metric_a gauge").unwrap(),
            Line::Type {
                name: "metric_a",
                kind: MetricType::Gauge
            }
        );
        assert_eq!(
            lex_line(r"# HELP metric_a cool\nmetric").unwrap(),
            Line::Help {
                name: "metric_a",
                text: "cool\nmetric".into()
            }
        );
        assert_eq!(lex_line("# just a comment").unwrap(), Line::Comment);
        assert_eq!(lex_line("#").unwrap(), Line::Comment);
        assert_eq!(lex_line("   ").unwrap(), Line::Blank);
    }

    #[test]
    fn unknown_type_is_rejected() {
        assert!(lex_line("# TYPE metric_a thermometer").is_err());
    }

    #[test]
    fn malformed_samples_are_rejected() {
        for line in [
            "metric_a",
            "metric_a one",
            r#"metric_a{first="value1" 1"#,
            r#"metric_a{first=value1} 1"#,
            "metric_a 1 2 3",
            "9metric 1",
        ] {
            assert!(lex_line(line).is_err(), "accepted {line:?}");
        }
    }
}
