//! Line-preserving model of an option file.
//!
//! Only option lines inside the managed section are ever rewritten;
//! everything else (other sections, comments, `!include` directives, blank
//! lines) round-trips byte for byte.

use super::schema::normalize_key;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Line {
    Section(String),
    Option { key: String, value: Option<String> },
    /// Comment, blank line, directive or anything unparsed.
    Other,
}

fn classify(line: &str) -> Line {
    let trimmed = line.trim();
    if trimmed.is_empty()
        || trimmed.starts_with('#')
        || trimmed.starts_with(';')
        || trimmed.starts_with('!')
    {
        return Line::Other;
    }
    if let Some(rest) = trimmed.strip_prefix('[') {
        if let Some(end) = rest.find(']') {
            return Line::Section(rest[..end].trim().to_string());
        }
        return Line::Other;
    }
    match trimmed.split_once('=') {
        Some((key, value)) => Line::Option {
            key: key.trim().to_string(),
            value: Some(value.trim().to_string()),
        },
        None => Line::Option {
            key: trimmed.to_string(),
            value: None,
        },
    }
}

/// An option file held as its original lines.
#[derive(Debug, Clone, Default)]
pub struct OptionFile {
    lines: Vec<String>,
}

impl OptionFile {
    pub fn parse(text: &str) -> Self {
        Self {
            lines: text.lines().map(str::to_string).collect(),
        }
    }

    /// Index ranges `(header, end)` of every section named `section`.
    /// `end` is exclusive and stops at the next section header.
    fn section_ranges(&self, section: &str) -> Vec<(usize, usize)> {
        let mut ranges = Vec::new();
        let mut current: Option<usize> = None;
        for (i, line) in self.lines.iter().enumerate() {
            if let Line::Section(name) = classify(line) {
                if let Some(start) = current.take() {
                    ranges.push((start, i));
                }
                if name.eq_ignore_ascii_case(section) {
                    current = Some(i);
                }
            }
        }
        if let Some(start) = current {
            ranges.push((start, self.lines.len()));
        }
        ranges
    }

    /// Options of `section` in file order, as `(key as written, value)`.
    /// Flag options without `=` have no value.
    pub fn entries(&self, section: &str) -> Vec<(String, Option<String>)> {
        let mut entries = Vec::new();
        for (start, end) in self.section_ranges(section) {
            for line in &self.lines[start + 1..end] {
                if let Line::Option { key, value } = classify(line) {
                    entries.push((key, value));
                }
            }
        }
        entries
    }

    /// Set `key=value` in `section`.
    ///
    /// The last existing line for the key (matched with `-`/`_` folded) is
    /// replaced, keeping its key spelling. Otherwise the line goes after the
    /// last non-blank line of the last matching section, and the section is
    /// appended when missing.
    pub fn set(&mut self, section: &str, key: &str, value: &str) {
        let wanted = normalize_key(key);
        let ranges = self.section_ranges(section);

        let existing = ranges
            .iter()
            .flat_map(|(start, end)| start + 1..*end)
            .filter(|&i| {
                matches!(classify(&self.lines[i]), Line::Option { key: k, .. } if normalize_key(&k) == wanted)
            })
            .last();

        if let Some(i) = existing {
            if let Line::Option { key: spelled, .. } = classify(&self.lines[i]) {
                self.lines[i] = format!("{}={}", spelled, value);
            }
            return;
        }

        let line = format!("{}={}", key, value);
        match ranges.last() {
            Some(&(start, end)) => {
                let last_non_blank = (start..end)
                    .rev()
                    .find(|&i| !self.lines[i].trim().is_empty())
                    .unwrap_or(start);
                self.lines.insert(last_non_blank + 1, line);
            }
            None => {
                if self.lines.last().is_some_and(|l| !l.trim().is_empty()) {
                    self.lines.push(String::new());
                }
                self.lines.push(format!("[{}]", section));
                self.lines.push(line);
            }
        }
    }

    pub fn render(&self) -> String {
        let mut out = self.lines.join("\n");
        out.push('\n');
        out
    }
}
