//! Configuration document model.
//!
//! The hypervisor reads an INI-style document of `[section]` blocks with
//! two-space indented `key = "value"` lines. The manager diffs rendered
//! files to detect configuration drift, so rendering must stay byte-stable:
//! sections, properties and blank separators appear exactly in insertion
//! order and nothing is reformatted.

use std::fmt::Write as _;

/// A named section with optional string label and ordered properties.
#[derive(Debug, Clone)]
pub struct Section {
    name: &'static str,
    label: Option<String>,
    props: Vec<(&'static str, String)>,
}

impl Section {
    /// Section without a label, rendered as `[name]`.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            label: None,
            props: Vec::new(),
        }
    }

    /// Section with a label, rendered as `[name "label"]`.
    pub fn labeled(name: &'static str, label: impl Into<String>) -> Self {
        Self {
            name,
            label: Some(label.into()),
            props: Vec::new(),
        }
    }

    /// Append one property. Every value renders double-quoted.
    pub fn prop(mut self, key: &'static str, value: impl ToString) -> Self {
        self.props.push((key, value.to_string()));
        self
    }

    fn render_into(&self, out: &mut String, prefix: &str) {
        match &self.label {
            Some(label) => {
                let _ = writeln!(out, "{}[{} \"{}\"]", prefix, self.name, label);
            }
            None => {
                let _ = writeln!(out, "{}[{}]", prefix, self.name);
            }
        }
        for (key, value) in &self.props {
            let _ = writeln!(out, "{}  {} = \"{}\"", prefix, key, value);
        }
    }
}

#[derive(Debug, Clone)]
enum Item {
    /// Verbatim comment line
    Comment(String),

    /// Empty separator line
    Blank,

    Section(Section),

    /// Section kept in the file for reference but disabled with `#` prefixes
    CommentedSection(Section),
}

/// Ordered sequence of sections, comments and blank separators.
#[derive(Debug, Clone, Default)]
pub struct ConfigDocument {
    items: Vec<Item>,
}

impl ConfigDocument {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a `# text` comment line.
    pub fn comment(&mut self, text: &str) {
        self.items.push(Item::Comment(format!("# {text}")));
    }

    /// Append one empty line.
    pub fn blank(&mut self) {
        self.items.push(Item::Blank);
    }

    /// Append a section.
    pub fn section(&mut self, section: Section) {
        self.items.push(Item::Section(section));
    }

    /// Append a section with every line disabled.
    pub fn commented_section(&mut self, section: Section) {
        self.items.push(Item::CommentedSection(section));
    }

    /// Render the document to its on-disk byte representation.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for item in &self.items {
            match item {
                Item::Comment(line) => {
                    let _ = writeln!(out, "{line}");
                }
                Item::Blank => out.push('\n'),
                Item::Section(section) => section.render_into(&mut out, ""),
                Item::CommentedSection(section) => section.render_into(&mut out, "#"),
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_unlabeled_section() {
        let mut doc = ConfigDocument::new();
        doc.section(Section::new("msg").prop("timestamp", "on"));

        assert_eq!(doc.render(), "[msg]\n  timestamp = \"on\"\n");
    }

    #[test]
    fn renders_labeled_section_with_quoted_values() {
        let mut doc = ConfigDocument::new();
        doc.section(
            Section::labeled("chardev", "charmonitor")
                .prop("backend", "socket")
                .prop("server", "on"),
        );

        assert_eq!(
            doc.render(),
            "[chardev \"charmonitor\"]\n  backend = \"socket\"\n  server = \"on\"\n"
        );
    }

    #[test]
    fn blank_lines_and_comments_render_verbatim() {
        let mut doc = ConfigDocument::new();
        doc.comment("This file is automatically generated by domainmgr");
        doc.section(Section::new("msg").prop("timestamp", "on"));
        doc.blank();
        doc.section(Section::new("realtime").prop("mlock", "off"));

        assert_eq!(
            doc.render(),
            "# This file is automatically generated by domainmgr\n\
             [msg]\n  timestamp = \"on\"\n\
             \n\
             [realtime]\n  mlock = \"off\"\n"
        );
    }

    #[test]
    fn commented_sections_prefix_every_line() {
        let mut doc = ConfigDocument::new();
        doc.commented_section(
            Section::labeled("device", "video0")
                .prop("driver", "qxl-vga")
                .prop("vgamem_mb", 16),
        );

        assert_eq!(
            doc.render(),
            "#[device \"video0\"]\n#  driver = \"qxl-vga\"\n#  vgamem_mb = \"16\"\n"
        );
    }

    #[test]
    fn numeric_values_render_quoted() {
        let mut doc = ConfigDocument::new();
        doc.section(Section::new("memory").prop("size", 10240));

        assert_eq!(doc.render(), "[memory]\n  size = \"10240\"\n");
    }
}
