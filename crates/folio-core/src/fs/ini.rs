//! Minimal INI reader/writer used by `.trashinfo` files and the
//! persisted authentication store.
//!
//! Only `[group]` headers, `key=value` pairs and `#`/`;` comments are
//! understood. Group and key order is preserved on write.

/// An ordered set of groups, each an ordered set of key/value pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ini {
    groups: Vec<(String, Vec<(String, String)>)>,
}

impl Ini {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses INI text. Lines before the first group header go into the
    /// unnamed group `""`. Malformed lines are skipped.
    pub fn parse(text: &str) -> Self {
        let mut ini = Ini::new();
        let mut current = String::new();
        for raw in text.lines() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                current = name.trim().to_string();
                ini.group_mut(&current);
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                ini.set(&current, key.trim(), value.trim());
            }
        }
        ini
    }

    pub fn get(&self, group: &str, key: &str) -> Option<&str> {
        self.groups
            .iter()
            .find(|(name, _)| name == group)
            .and_then(|(_, pairs)| pairs.iter().find(|(k, _)| k == key))
            .map(|(_, v)| v.as_str())
    }

    pub fn set(&mut self, group: &str, key: &str, value: impl Into<String>) {
        let value = value.into();
        let pairs = self.group_mut(group);
        match pairs.iter_mut().find(|(k, _)| k == key) {
            Some(pair) => pair.1 = value,
            None => pairs.push((key.to_string(), value)),
        }
    }

    pub fn remove_group(&mut self, group: &str) -> bool {
        let before = self.groups.len();
        self.groups.retain(|(name, _)| name != group);
        before != self.groups.len()
    }

    pub fn groups(&self) -> impl Iterator<Item = &str> {
        self.groups.iter().map(|(name, _)| name.as_str())
    }

    fn group_mut(&mut self, group: &str) -> &mut Vec<(String, String)> {
        let index = match self.groups.iter().position(|(name, _)| name == group) {
            Some(index) => index,
            None => {
                self.groups.push((group.to_string(), Vec::new()));
                self.groups.len() - 1
            }
        };
        &mut self.groups[index].1
    }
}

impl std::fmt::Display for Ini {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (name, pairs) in &self.groups {
            if !name.is_empty() {
                writeln!(f, "[{name}]")?;
            }
            for (key, value) in pairs {
                writeln!(f, "{key}={value}")?;
            }
        }
        Ok(())
    }
}
