//! Environment variables.
//!
//! Commands read defaults from here (`loadaddr`, `bootfile`) and publish
//! results (`fileaddr`, `filesize`). Numeric values are stored as bare
//! lowercase hex, without a `0x` prefix.

use std::collections::BTreeMap;

/// Parse a hexadecimal number, with or without a `0x` prefix.
pub fn parse_hex(s: &str) -> Option<u64> {
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    if digits.is_empty() {
        return None;
    }
    u64::from_str_radix(digits, 16).ok()
}

/// Variable store, iterated in name order.
#[derive(Debug, Clone, Default)]
pub struct Env {
    vars: BTreeMap<String, String>,
}

impl Env {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    /// Value of `name` parsed as hex.
    pub fn get_hex(&self, name: &str) -> Option<u64> {
        self.get(name).and_then(parse_hex)
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(name.into(), value.into());
    }

    /// Store `value` as bare hex.
    pub fn set_hex(&mut self, name: impl Into<String>, value: u64) {
        self.set(name, format!("{value:x}"));
    }

    pub fn unset(&mut self, name: &str) -> bool {
        self.vars.remove(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Substitute `$name` and `${name}` references. Unknown names expand
    /// to nothing.
    pub fn expand(&self, word: &str) -> String {
        let mut out = String::with_capacity(word.len());
        let mut rest = word;
        while let Some(pos) = rest.find('$') {
            out.push_str(&rest[..pos]);
            let after = &rest[pos + 1..];
            let (name, tail) = if let Some(braced) = after.strip_prefix('{') {
                match braced.find('}') {
                    Some(end) => (&braced[..end], &braced[end + 1..]),
                    None => ("", after),
                }
            } else {
                let end = after
                    .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                    .unwrap_or(after.len());
                (&after[..end], &after[end..])
            };
            if name.is_empty() {
                out.push('$');
            } else if let Some(value) = self.get(name) {
                out.push_str(value);
            }
            rest = tail;
        }
        out.push_str(rest);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex() {
        assert_eq!(parse_hex("0x1000"), Some(0x1000));
        assert_eq!(parse_hex("42000000"), Some(0x4200_0000));
        assert_eq!(parse_hex("FF"), Some(255));
        assert_eq!(parse_hex("0x"), None);
        assert_eq!(parse_hex("zz"), None);
    }

    #[test]
    fn test_set_hex() {
        let mut env = Env::new();
        env.set_hex("filesize", 42);
        assert_eq!(env.get("filesize"), Some("2a"));
        assert_eq!(env.get_hex("filesize"), Some(42));
        assert!(env.unset("filesize"));
        assert!(env.get("filesize").is_none());
    }

    #[test]
    fn test_expand() {
        let mut env = Env::new();
        env.set("bootfile", "Image");
        env.set("dir", "/boot");
        assert_eq!(env.expand("${dir}/$bootfile"), "/boot/Image");
        assert_eq!(env.expand("$missing-x"), "-x");
        assert_eq!(env.expand("cost$"), "cost$");
        assert_eq!(env.expand("plain"), "plain");
    }
}
