//! Line model of the torrc file.

/// One line of the torrc: a directive key and its (possibly empty) value.
///
/// An empty value is a flag-only directive; blank lines are kept as an
/// entry with an empty key so positions survive a rewrite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigEntry {
    pub key: String,
    pub value: String,
}

impl ConfigEntry {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Split a raw line at its first space into key and trimmed value.
    pub fn parse_line(line: &str) -> Self {
        match line.find(' ') {
            Some(idx) if idx > 0 => Self::new(line[..idx].trim(), line[idx..].trim()),
            _ => Self::new(line, ""),
        }
    }

    pub fn is_flag(&self) -> bool {
        self.value.is_empty()
    }

    pub fn to_line(&self) -> String {
        if self.value.is_empty() {
            self.key.clone()
        } else {
            format!("{} {}", self.key, self.value)
        }
    }
}

/// An ordered, immutable-by-convention view of the whole torrc.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConfigSnapshot {
    entries: Vec<ConfigEntry>,
}

impl ConfigSnapshot {
    pub fn parse(text: &str) -> Self {
        Self {
            entries: text.lines().map(ConfigEntry::parse_line).collect(),
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            out.push_str(&entry.to_line());
            out.push('\n');
        }
        out
    }

    pub fn entries(&self) -> &[ConfigEntry] {
        &self.entries
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ConfigEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn first(&self, key: &str) -> Option<&ConfigEntry> {
        self.entries.iter().find(|e| e.key == key)
    }

    pub fn count(&self, key: &str) -> usize {
        self.entries.iter().filter(|e| e.key == key).count()
    }

    /// True when the two snapshots differ in length or any positional pair.
    pub fn differs_from(&self, other: &ConfigSnapshot) -> bool {
        self.entries.len() != other.entries.len()
            || self.entries.iter().zip(&other.entries).any(|(a, b)| a != b)
    }
}

impl From<Vec<ConfigEntry>> for ConfigSnapshot {
    fn from(entries: Vec<ConfigEntry>) -> Self {
        Self { entries }
    }
}

impl FromIterator<ConfigEntry> for ConfigSnapshot {
    fn from_iter<I: IntoIterator<Item = ConfigEntry>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for ConfigSnapshot {
    type Item = ConfigEntry;
    type IntoIter = std::vec::IntoIter<ConfigEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}
