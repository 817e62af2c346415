//! The theme's `config.xml` record.
//!
//! A flat set of named string fields stored at `theme/config.xml`:
//!
//! ```xml
//! <?xml version="1.0"?>
//! <theme>
//!   <name>base</name>
//!   <title>Default</title>
//!   ...
//!   <downloadable>0</downloadable>
//! </theme>
//! ```
//!
//! Reading is lenient about layout (the first occurrence of each known
//! element wins, wherever it sits) but strict about well-formedness. Writing
//! always produces the fixed layout above.

use crate::client::{StorageClient, StorageError};
use crate::types::CONFIG_PATH;
use quick_xml::events::Event;
use quick_xml::reader::Reader;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ThemeConfigError {
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("XML encoding error: {0}")]
    Encoding(#[from] quick_xml::encoding::EncodingError),
    #[error("XML escape error: {0}")]
    Escape(#[from] quick_xml::escape::EscapeError),
    #[error("Malformed config.xml: {0}")]
    Malformed(String),
    #[error("Unknown config field: {0}")]
    UnknownField(String),
    #[error("Theme name must not be empty")]
    EmptyName,
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Element names in document order.
pub const FIELDS: [&str; 9] = [
    "name",
    "title",
    "version",
    "compatibility",
    "author",
    "license",
    "license-url",
    "description",
    "downloadable",
];

const DEFAULT_DESCRIPTION: &str = "Minimally-styled, feature rich responsive style for eXe.\n\n\
                                   iDevice icons by Francisco Javier Pulido Cuadrado.";

/// Name used for downloads when the record has none.
pub const FALLBACK_NAME: &str = "style";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigRecord {
    pub name: String,
    pub title: String,
    pub version: String,
    pub compatibility: String,
    pub author: String,
    pub license: String,
    pub license_url: String,
    pub description: String,
    pub downloadable: String,
}

impl Default for ConfigRecord {
    fn default() -> Self {
        Self {
            name: "base".into(),
            title: "Default".into(),
            version: "2025".into(),
            compatibility: "3.0".into(),
            author: "eXeLearning.net".into(),
            license: "Creative Commons by-sa".into(),
            license_url: "http://creativecommons.org/licenses/by-sa/3.0/".into(),
            description: DEFAULT_DESCRIPTION.into(),
            downloadable: "0".into(),
        }
    }
}

fn normalize_flag(value: &str) -> String {
    if value.trim() == "1" { "1" } else { "0" }.to_string()
}

impl ConfigRecord {
    /// Value of the field with element name `field`.
    pub fn get(&self, field: &str) -> Option<&str> {
        let value = match field {
            "name" => &self.name,
            "title" => &self.title,
            "version" => &self.version,
            "compatibility" => &self.compatibility,
            "author" => &self.author,
            "license" => &self.license,
            "license-url" => &self.license_url,
            "description" => &self.description,
            "downloadable" => &self.downloadable,
            _ => return None,
        };
        Some(value)
    }

    fn slot(&mut self, field: &str) -> Option<&mut String> {
        let slot = match field {
            "name" => &mut self.name,
            "title" => &mut self.title,
            "version" => &mut self.version,
            "compatibility" => &mut self.compatibility,
            "author" => &mut self.author,
            "license" => &mut self.license,
            "license-url" => &mut self.license_url,
            "description" => &mut self.description,
            "downloadable" => &mut self.downloadable,
            _ => return None,
        };
        Some(slot)
    }

    /// Set one field by element name. Values are stored as given; call
    /// [`sanitize`](Self::sanitize) before saving.
    pub fn set(&mut self, field: &str, value: &str) -> Result<(), ThemeConfigError> {
        let slot = self
            .slot(field)
            .ok_or_else(|| ThemeConfigError::UnknownField(field.to_string()))?;
        *slot = value.to_string();
        Ok(())
    }

    /// Trim every field, drop all whitespace from `name` and constrain
    /// `downloadable` to `0`/`1`.
    pub fn sanitize(&mut self) {
        for field in FIELDS {
            if let Some(slot) = self.slot(field) {
                *slot = slot.trim().to_string();
            }
        }
        self.name.retain(|c| !c.is_whitespace());
        self.downloadable = normalize_flag(&self.downloadable);
    }

    pub fn validate(&self) -> Result<(), ThemeConfigError> {
        if self.name.trim().is_empty() {
            return Err(ThemeConfigError::EmptyName);
        }
        Ok(())
    }

    /// `<name>.config.xml`, or `style.config.xml` when the name has no
    /// usable characters.
    pub fn download_file_name(&self) -> String {
        let stem = file_stem(&self.name);
        format!("{}.config.xml", stem.as_deref().unwrap_or(FALLBACK_NAME))
    }

    /// Parse a config document. Elements that are absent keep their
    /// defaults; unknown elements are ignored.
    pub fn from_xml(xml: &str) -> Result<Self, ThemeConfigError> {
        let mut record = Self::default();
        let mut seen = [false; FIELDS.len()];
        let mut reader = Reader::from_str(xml);
        // Whitespace around entity references is significant; values are
        // trimmed once complete.
        reader.config_mut().trim_text(false);

        let mut depth = 0usize;
        let mut saw_root = false;
        // (field index, depth at which it opened, accumulated text)
        let mut capture: Option<(usize, usize, String)> = None;

        loop {
            match reader.read_event()? {
                Event::Start(e) => {
                    if depth == 0 && saw_root {
                        return Err(ThemeConfigError::Malformed(
                            "multiple root elements".into(),
                        ));
                    }
                    saw_root = true;
                    depth += 1;
                    if capture.is_none() {
                        let name = e.name();
                        if let Some(i) = field_index(name.as_ref()).filter(|&i| !seen[i]) {
                            capture = Some((i, depth, String::new()));
                        }
                    }
                }
                Event::Empty(e) => {
                    if depth == 0 && saw_root {
                        return Err(ThemeConfigError::Malformed(
                            "multiple root elements".into(),
                        ));
                    }
                    saw_root = true;
                    if capture.is_none() {
                        let name = e.name();
                        if let Some(i) = field_index(name.as_ref()).filter(|&i| !seen[i]) {
                            seen[i] = true;
                            record.assign(i, "");
                        }
                    }
                }
                Event::End(_) => {
                    if let Some((i, _, text)) = capture.take_if(|(_, opened, _)| *opened == depth) {
                        seen[i] = true;
                        record.assign(i, &text);
                    }
                    depth = depth.saturating_sub(1);
                }
                Event::Text(e) => {
                    if let Some((_, _, text)) = capture.as_mut() {
                        text.push_str(&e.decode()?);
                    }
                }
                Event::CData(e) => {
                    if let Some((_, _, text)) = capture.as_mut() {
                        text.push_str(&reader.decoder().decode(&e)?);
                    }
                }
                Event::GeneralRef(e) => {
                    let entity = format!("&{};", e.decode()?);
                    let resolved = quick_xml::escape::unescape(&entity)?;
                    if let Some((_, _, text)) = capture.as_mut() {
                        text.push_str(&resolved);
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if !saw_root {
            return Err(ThemeConfigError::Malformed("no root element".into()));
        }
        if depth != 0 {
            return Err(ThemeConfigError::Malformed("unclosed element".into()));
        }
        record.downloadable = normalize_flag(&record.downloadable);
        Ok(record)
    }

    fn assign(&mut self, index: usize, raw: &str) {
        let field = FIELDS[index];
        let value = raw.trim();
        // Undo the continuation indent added by `to_xml`.
        let value = if field == "description" {
            value.replace("\n  ", "\n")
        } else {
            value.to_string()
        };
        if let Some(slot) = self.slot(field) {
            *slot = value;
        }
    }

    /// Serialize to the fixed document layout.
    pub fn to_xml(&self) -> String {
        let mut xml = String::from("<?xml version=\"1.0\"?>\n<theme>\n");
        for field in FIELDS {
            let raw = self.get(field).unwrap_or_default().trim();
            let value = match field {
                "description" => raw.replace("\r\n", "\n").replace('\n', "\n  "),
                "downloadable" => normalize_flag(raw),
                _ => raw.to_string(),
            };
            xml.push_str(&format!(
                "  <{field}>{}</{field}>\n",
                quick_xml::escape::escape(&value)
            ));
        }
        xml.push_str("</theme>\n");
        xml
    }

    /// Load the stored record.
    ///
    /// A missing document yields the defaults. A malformed one also yields
    /// the defaults, together with a warning to show the author.
    pub fn load(client: &StorageClient) -> Result<(Self, Option<String>), ThemeConfigError> {
        let Some(xml) = client.read_text(CONFIG_PATH)? else {
            return Ok((Self::default(), None));
        };
        if xml.trim().is_empty() {
            return Ok((Self::default(), None));
        }
        match Self::from_xml(&xml) {
            Ok(record) => Ok((record, None)),
            Err(err) => {
                tracing::warn!(%err, "config.xml is malformed");
                Ok((
                    Self::default(),
                    Some("config.xml is malformed. Showing defaults.".into()),
                ))
            }
        }
    }

    /// Sanitize, validate and write the record to `theme/config.xml`.
    pub fn save(&self, client: &StorageClient) -> Result<Self, ThemeConfigError> {
        let mut record = self.clone();
        record.sanitize();
        record.validate()?;
        client.save_text(CONFIG_PATH, &record.to_xml())?;
        tracing::info!(name = %record.name, "config.xml saved");
        Ok(record)
    }
}

/// A theme name reduced to a single safe path component.
///
/// Whitespace, control characters, path separators and characters reserved
/// on common filesystems are dropped, as are leading dots. `None` when
/// nothing is left.
pub fn file_stem(name: &str) -> Option<String> {
    let kept: String = name
        .chars()
        .filter(|c| !c.is_whitespace() && !c.is_control())
        .filter(|c| !matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|'))
        .collect();
    let stem = kept.trim_start_matches('.');
    (!stem.is_empty()).then(|| stem.to_string())
}

fn field_index(name: &[u8]) -> Option<usize> {
    FIELDS.iter().position(|f| f.as_bytes() == name)
}
