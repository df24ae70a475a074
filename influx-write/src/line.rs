//! Line protocol encoding for the `/write` endpoint.
//!
//! Each field becomes its own point, `<measurement> <field>=<value>`, and points are joined with `\n`. No timestamp
//! is written, so the store stamps each point with its arrival time.

use std::borrow::Cow;
use std::fmt::Display;

/// Encodes `fields` as one line per field under `measurement`.
pub fn encode<I, K, V>(measurement: &str, fields: I) -> String
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: Display,
{
    let measurement = escape_measurement(measurement);
    fields
        .into_iter()
        .map(|(key, value)| format!("{} {}={}", measurement, escape_field_key(key.as_ref()), value))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn escape_measurement(name: &str) -> Cow<'_, str> {
    escape(name, &[',', ' '])
}

pub fn escape_field_key(key: &str) -> Cow<'_, str> {
    escape(key, &[',', '=', ' '])
}

fn escape<'a>(raw: &'a str, special: &[char]) -> Cow<'a, str> {
    if !raw.contains(special) {
        return Cow::Borrowed(raw);
    }
    let mut escaped = String::with_capacity(raw.len() + 4);
    for c in raw.chars() {
        if special.contains(&c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    Cow::Owned(escaped)
}

#[cfg(test)]
use pretty_assertions::assert_eq;

#[test]
fn encodes_one_line_per_field() {
    let body = encode("ALL_SENSORS", [("GEN_VOLT", "120.0"), ("GEN_AMPS", "0.500"), ("T_cpu", "47.2")]);
    assert_eq!(
        body,
        "ALL_SENSORS GEN_VOLT=120.0\nALL_SENSORS GEN_AMPS=0.500\nALL_SENSORS T_cpu=47.2"
    );
}

#[test]
fn encodes_nothing_for_no_fields() {
    assert_eq!(encode("ALL_SENSORS", Vec::<(&str, u32)>::new()), "");
}

#[test]
fn leaves_dashes_and_underscores_alone() {
    assert!(matches!(escape_field_key("MAIN-A_WHRS"), Cow::Borrowed("MAIN-A_WHRS")));
}

#[test]
fn escapes_special_characters() {
    assert_eq!(escape_measurement("house power,main"), r"house\ power\,main");
    assert_eq!(escape_field_key("a=b c"), r"a\=b\ c");
    // `=` is legal in a measurement name
    assert_eq!(escape_measurement("a=b"), "a=b");
}
