use crate::model::MacAddr;

/// Allow-list of hardware-address patterns. A pattern authorizes an address
/// when it equals it or is a prefix of it; spelling (case, `-`/`.`/`:`) is
/// normalized first. An empty list authorizes everything.
#[derive(Debug, Clone, Default)]
pub struct AllowList {
    patterns: Vec<String>,
}

impl AllowList {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|p| normalize_pattern(p.as_ref()))
            .filter(|p| !p.is_empty())
            .collect();
        Self { patterns }
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn is_authorized(&self, mac: &MacAddr) -> bool {
        if self.patterns.is_empty() {
            return true;
        }
        let addr = mac.as_str();
        self.patterns.iter().any(|p| addr.starts_with(p.as_str()))
    }
}

/// Lower-case and rewrite separators to `:`. A bare hex run such as
/// `aabbcc` is split into octets so it lines up with canonical addresses.
fn normalize_pattern(raw: &str) -> String {
    let lower = raw.trim().to_lowercase().replace(['-', '.'], ":");
    if !lower.contains(':') && lower.chars().all(|c| c.is_ascii_hexdigit()) {
        return lower
            .as_bytes()
            .chunks(2)
            .map(|c| String::from_utf8_lossy(c).into_owned())
            .collect::<Vec<_>>()
            .join(":");
    }
    lower
}
