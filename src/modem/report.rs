//! Parser for ModemManager's human-readable reports
//!
//! `mmcli -m N` and `mmcli -b N` print blocks like
//!
//! ```text
//!   --------------------------------
//!   Status   |            connected: yes
//!            |            interface: wwan0
//!   --------------------------------
//!   IPv4 configuration |     method: static
//!            |              address: 10.19.145.184
//!            |                  dns: 10.177.0.34, 10.177.0.210
//! ```
//!
//! Keys such as `address` and `dns` appear under both the IPv4 and IPv6
//! sections, so every lookup names its section.

use super::{BearerHandle, ModemHandle};

/// One `Name | key: value` block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub name: String,
    entries: Vec<(String, Vec<String>)>,
}

impl Section {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: Vec::new(),
        }
    }

    /// All values recorded for `key`, including continuation lines
    pub fn values(&self, key: &str) -> Option<&[String]> {
        let key = key.to_ascii_lowercase();
        self.entries
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_slice())
    }

    /// First value for `key`, treating mmcli's `--` placeholder as absent
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values(key)?
            .first()
            .map(String::as_str)
            .filter(|v| !v.is_empty() && *v != "--")
    }
}

/// Parsed report, sections in output order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusReport {
    sections: Vec<Section>,
}

impl StatusReport {
    pub fn parse(text: &str) -> Self {
        let mut sections: Vec<Section> = Vec::new();

        for raw_line in text.lines() {
            let line = strip_ansi(raw_line);
            let Some((head, body)) = line.split_once('|') else {
                continue;
            };

            let head = head.trim();
            if !head.is_empty() {
                sections.push(Section::new(head));
            }
            let Some(section) = sections.last_mut() else {
                continue;
            };

            let body = body.trim();
            if body.is_empty() {
                continue;
            }

            match split_key_value(body) {
                Some((key, value)) => {
                    let values = if value.is_empty() {
                        Vec::new()
                    } else {
                        vec![value.to_string()]
                    };
                    section.entries.push((key.to_ascii_lowercase(), values));
                }
                None => {
                    // continuation of the previous key, e.g. a second bearer path
                    if let Some((_, values)) = section.entries.last_mut() {
                        values.push(body.to_string());
                    }
                }
            }
        }

        Self { sections }
    }

    /// Section lookup by name, case-insensitive
    pub fn section(&self, name: &str) -> Option<&Section> {
        self.sections
            .iter()
            .find(|s| s.name.eq_ignore_ascii_case(name))
    }

    /// Section-scoped value lookup
    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.section(section)?.get(key)
    }

    /// Section-scoped multi-value lookup
    pub fn get_all(&self, section: &str, key: &str) -> Vec<&str> {
        self.section(section)
            .and_then(|s| s.values(key))
            .map(|v| v.iter().map(String::as_str).filter(|v| *v != "--").collect())
            .unwrap_or_default()
    }
}

/// `key: value` where key is plain words. IPv6 literals never contain ": ".
fn split_key_value(body: &str) -> Option<(&str, &str)> {
    let (key, value) = match body.split_once(": ") {
        Some(kv) => kv,
        None => (body.strip_suffix(':')?, ""),
    };
    let key = key.trim();
    let plain = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, ' ' | '-' | '_' | '.' | '(' | ')'));
    plain.then(|| (key, value.trim()))
}

/// Remove terminal color sequences (`ESC [ ... m`) some mmcli builds emit
pub fn strip_ansi(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\u{1b}' && chars.peek() == Some(&'[') {
            chars.next();
            for c in chars.by_ref() {
                if c.is_ascii_alphabetic() {
                    break;
                }
            }
            continue;
        }
        out.push(c);
    }
    out
}

fn object_ids<'a>(text: &'a str, kind: &'a str) -> impl Iterator<Item = u32> + 'a {
    let marker = format!("/{}/", kind);
    text.lines().filter_map(move |line| {
        let line = strip_ansi(line);
        let start = line.find(&marker)? + marker.len();
        let digits: String = line[start..]
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .collect();
        digits.parse().ok()
    })
}

/// Modem ids from `mmcli -L`, in listed order
pub fn parse_modem_list(text: &str) -> Vec<ModemHandle> {
    object_ids(text, "Modem").map(ModemHandle).collect()
}

/// Bearer ids from any text mentioning bearer object paths
pub fn parse_bearer_paths(text: &str) -> Vec<BearerHandle> {
    object_ids(text, "Bearer").map(BearerHandle).collect()
}

/// Bearer id from the `--create-bearer` response
pub fn parse_created_bearer(text: &str) -> Option<BearerHandle> {
    parse_bearer_paths(text).into_iter().next()
}
