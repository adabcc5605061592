//! INI/ConfigObj-style config file parsing and emission.
//!
//! The daemon config and the transport config use the two-level dialect of
//! the wider ecosystem: `[section]` headers, `[[subsection]]` headers
//! nested one level deep, `key = value` pairs, `#` comments. Indentation is
//! not significant. Comments and ordering survive a load/save cycle so
//! user edits are preserved.

use std::fs;
use std::io;
use std::path::Path;

/// One line-level entry inside a section or subsection.
#[derive(Debug, Clone)]
enum Item {
    /// A comment or blank line, stored verbatim (trimmed).
    Raw(String),
    /// A `key = value` pair.
    Pair { key: String, value: String },
}

/// A `[[subsection]]` block.
#[derive(Debug, Clone)]
pub struct Subsection {
    name: String,
    items: Vec<Item>,
}

/// A `[section]` block with optional subsections.
#[derive(Debug, Clone)]
pub struct Section {
    name: String,
    items: Vec<Item>,
    subsections: Vec<Subsection>,
}

/// A parsed config file.
#[derive(Debug, Clone, Default)]
pub struct ConfigFile {
    /// Lines before the first section header.
    preamble: Vec<String>,
    sections: Vec<Section>,
}

impl Subsection {
    /// Section name as written between the double brackets.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Value for a key, if present.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.items.iter().find_map(|item| match item {
            Item::Pair { key: k, value } if k == key => Some(value.as_str()),
            _ => None,
        })
    }

    /// Set a key, replacing an existing pair or appending a new one.
    pub fn set(&mut self, key: &str, value: &str) {
        for item in &mut self.items {
            if let Item::Pair { key: k, value: v } = item {
                if k == key {
                    *v = value.to_string();
                    return;
                }
            }
        }
        self.items.push(Item::Pair {
            key: key.to_string(),
            value: value.to_string(),
        });
    }
}

impl Section {
    /// Value for a key directly under this section.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.items.iter().find_map(|item| match item {
            Item::Pair { key: k, value } if k == key => Some(value.as_str()),
            _ => None,
        })
    }

    /// Set a key, replacing an existing pair or appending a new one.
    pub fn set(&mut self, key: &str, value: &str) {
        for item in &mut self.items {
            if let Item::Pair { key: k, value: v } = item {
                if k == key {
                    *v = value.to_string();
                    return;
                }
            }
        }
        self.items.push(Item::Pair {
            key: key.to_string(),
            value: value.to_string(),
        });
    }

    /// Subsection names in file order.
    pub fn subsection_names(&self) -> Vec<String> {
        self.subsections.iter().map(|s| s.name.clone()).collect()
    }

    /// Look up a subsection by name.
    pub fn subsection(&self, name: &str) -> Option<&Subsection> {
        self.subsections.iter().find(|s| s.name == name)
    }

    /// Look up or create a subsection by name.
    pub fn subsection_mut(&mut self, name: &str) -> &mut Subsection {
        if let Some(idx) = self.subsections.iter().position(|s| s.name == name) {
            return &mut self.subsections[idx];
        }
        self.subsections.push(Subsection {
            name: name.to_string(),
            items: Vec::new(),
        });
        self.subsections.last_mut().unwrap()
    }
}

impl ConfigFile {
    /// Parse config text.
    pub fn parse(text: &str) -> Self {
        let mut config = ConfigFile::default();

        for raw in text.lines() {
            let line = raw.trim();

            if let Some(name) = header(line, "[[", "]]") {
                // A subsection outside any section gets an anonymous parent.
                if config.sections.is_empty() {
                    config.sections.push(Section {
                        name: String::new(),
                        items: Vec::new(),
                        subsections: Vec::new(),
                    });
                }
                let section = config.sections.last_mut().unwrap();
                section.subsections.push(Subsection {
                    name: name.to_string(),
                    items: Vec::new(),
                });
                continue;
            }

            if let Some(name) = header(line, "[", "]") {
                config.sections.push(Section {
                    name: name.to_string(),
                    items: Vec::new(),
                    subsections: Vec::new(),
                });
                continue;
            }

            let item = if line.is_empty() || line.starts_with('#') {
                Item::Raw(line.to_string())
            } else if let Some((key, value)) = line.split_once('=') {
                Item::Pair {
                    key: key.trim().to_string(),
                    value: value.trim().to_string(),
                }
            } else {
                Item::Raw(line.to_string())
            };

            match config.sections.last_mut() {
                None => {
                    if let Item::Raw(text) = item {
                        config.preamble.push(text);
                    }
                }
                Some(section) => match section.subsections.last_mut() {
                    Some(sub) => sub.items.push(item),
                    None => section.items.push(item),
                },
            }
        }

        config
    }

    /// Load and parse a config file.
    pub fn load(path: &Path) -> io::Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(Self::parse(&text))
    }

    /// Write the config back to disk.
    pub fn save(&self, path: &Path) -> io::Result<()> {
        fs::write(path, self.to_text())
    }

    /// Whether a top-level section exists.
    pub fn has_section(&self, name: &str) -> bool {
        self.sections.iter().any(|s| s.name == name)
    }

    /// Look up a section by name.
    pub fn section(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.name == name)
    }

    /// Look up or create a section by name.
    pub fn section_mut(&mut self, name: &str) -> &mut Section {
        if let Some(idx) = self.sections.iter().position(|s| s.name == name) {
            return &mut self.sections[idx];
        }
        self.sections.push(Section {
            name: name.to_string(),
            items: Vec::new(),
            subsections: Vec::new(),
        });
        self.sections.last_mut().unwrap()
    }

    /// Emit the config as text.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for line in &self.preamble {
            out.push_str(line);
            out.push('\n');
        }
        for section in &self.sections {
            if !section.name.is_empty() {
                out.push_str(&format!("[{}]\n", section.name));
            }
            for item in &section.items {
                emit_item(&mut out, item, "  ");
            }
            for sub in &section.subsections {
                out.push_str(&format!("  [[{}]]\n", sub.name));
                for item in &sub.items {
                    emit_item(&mut out, item, "    ");
                }
            }
            out.push('\n');
        }
        out
    }
}

fn emit_item(out: &mut String, item: &Item, indent: &str) {
    match item {
        Item::Raw(text) => {
            if text.is_empty() {
                out.push('\n');
            } else {
                out.push_str(indent);
                out.push_str(text);
                out.push('\n');
            }
        }
        Item::Pair { key, value } => {
            out.push_str(indent);
            out.push_str(&format!("{} = {}\n", key, value));
        }
    }
}

fn header<'a>(line: &'a str, open: &str, close: &str) -> Option<&'a str> {
    let inner = line.strip_prefix(open)?.strip_suffix(close)?;
    // Reject `[[x]]` when probing for `[x]`.
    if open == "[" && inner.starts_with('[') {
        return None;
    }
    Some(inner.trim())
}

/// Interpret a config value as a boolean. Accepts the token spellings the
/// wider ecosystem writes: `1`, `y`, `yes`, `true`, `on` (case- and
/// whitespace-insensitive). Everything else is false.
pub fn truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "y" | "yes" | "true" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
[reticulum]
  enable_transport = False

[interfaces]
  # default interface
  [[Default Interface]]
    type = AutoInterface
    interface_enabled = Yes

  [[TCP Client Interface]]
    type = TCPClientInterface
    interface_enabled = Yes
    target_host = example.net
";

    #[test]
    fn test_parse_sections_and_subsections() {
        let config = ConfigFile::parse(SAMPLE);

        assert!(config.has_section("reticulum"));
        assert!(config.has_section("interfaces"));

        let interfaces = config.section("interfaces").unwrap();
        assert_eq!(
            interfaces.subsection_names(),
            vec!["Default Interface", "TCP Client Interface"]
        );

        let tcp = interfaces.subsection("TCP Client Interface").unwrap();
        assert_eq!(tcp.get("type"), Some("TCPClientInterface"));
        assert_eq!(tcp.get("target_host"), Some("example.net"));
    }

    #[test]
    fn test_set_preserves_other_keys() {
        let mut config = ConfigFile::parse(SAMPLE);
        config
            .section_mut("interfaces")
            .subsection_mut("TCP Client Interface")
            .set("interface_enabled", "No");

        let text = config.to_text();
        let reparsed = ConfigFile::parse(&text);
        let tcp = reparsed
            .section("interfaces")
            .unwrap()
            .subsection("TCP Client Interface")
            .unwrap();
        assert_eq!(tcp.get("interface_enabled"), Some("No"));
        assert_eq!(tcp.get("target_host"), Some("example.net"));
    }

    #[test]
    fn test_round_trip_preserves_comments() {
        let config = ConfigFile::parse(SAMPLE);
        let text = config.to_text();
        assert!(text.contains("# default interface"));
    }

    #[test]
    fn test_section_mut_creates_missing() {
        let mut config = ConfigFile::default();
        config.section_mut("logging").set("loglevel", "4");
        assert_eq!(config.section("logging").unwrap().get("loglevel"), Some("4"));
    }

    #[test]
    fn test_subsection_mut_creates_missing() {
        let mut config = ConfigFile::default();
        config
            .section_mut("interfaces")
            .subsection_mut("Serial")
            .set("type", "SerialInterface");

        let text = config.to_text();
        assert!(text.contains("[[Serial]]"));
    }

    #[test]
    fn test_truthy_tokens() {
        for token in ["1", "y", "Yes", " TRUE ", "on"] {
            assert!(truthy(token), "{token} should be truthy");
        }
        for token in ["0", "no", "off", "", "maybe"] {
            assert!(!truthy(token), "{token} should be falsy");
        }
    }

    #[test]
    fn test_load_save_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config");
        std::fs::write(&path, SAMPLE).unwrap();

        let config = ConfigFile::load(&path).unwrap();
        config.save(&path).unwrap();

        let reparsed = ConfigFile::load(&path).unwrap();
        assert!(reparsed.has_section("interfaces"));
        assert_eq!(
            reparsed
                .section("reticulum")
                .unwrap()
                .get("enable_transport"),
            Some("False")
        );
    }
}
