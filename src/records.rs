//! Normalized, embeddable records and the per-kind formatter.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::FormatError;
use crate::extractor::{ClassFields, MemberFields, MemberKind, RawFields, SampleFields};

/// Metadata keys shared with the retrieval side of the index.
pub mod keys {
    /// Record kind (`class`, `property`, `method`, `event`, `sample`).
    pub const KIND: &str = "kind";
    /// Searchable text blob.
    pub const TEXT: &str = "text";
    /// Owning or described class.
    pub const CLASS_NAME: &str = "className";
    /// Member name, regardless of member kind.
    pub const ATTRIBUTE_NAME: &str = "attributeName";
    /// Property member name.
    pub const PROPERTY_NAME: &str = "propertyName";
    /// Method member name.
    pub const METHOD_NAME: &str = "methodName";
    /// Event member name.
    pub const EVENT_NAME: &str = "eventName";
    /// Declared property value type.
    pub const PROPERTY_TYPE: &str = "propertyType";
    /// Serialized parameter rows.
    pub const METHOD_PARAMS: &str = "methodParams";
    /// Serialized return-value rows.
    pub const METHOD_RETURN_VALS: &str = "methodReturnVals";
    /// Language-labelled syntax snippet.
    pub const EXAMPLE_USAGE: &str = "exampleUsage";
    /// Serialized class method table.
    pub const METHODS: &str = "methods";
    /// Serialized class property table.
    pub const PROPERTIES: &str = "properties";
    /// Serialized sample references.
    pub const SAMPLE_IDS: &str = "sampleIds";
    /// Sample title.
    pub const SAMPLE_ID: &str = "sampleId";
    /// Sample code body.
    pub const CODE_SAMPLE: &str = "codeSample";
}

const NOT_AVAILABLE: &str = "N/A";

/// Flat metadata map stored alongside each vector.
pub type Metadata = BTreeMap<String, String>;

/// Record discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    /// Class overview.
    Class,
    /// Property page.
    Property,
    /// Method page.
    Method,
    /// Event page.
    Event,
    /// Code sample.
    Sample,
}

impl RecordKind {
    /// Wire label stored under the `kind` metadata key.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Class => "class",
            Self::Property => "property",
            Self::Method => "method",
            Self::Event => "event",
            Self::Sample => "sample",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<MemberKind> for RecordKind {
    fn from(kind: MemberKind) -> Self {
        match kind {
            MemberKind::Property => Self::Property,
            MemberKind::Method => Self::Method,
            MemberKind::Event => Self::Event,
        }
    }
}

/// Kind-specific structured fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecordBody {
    /// Class overview.
    Class {
        /// Class name.
        class_name: String,
        /// Description text.
        description: String,
        /// `name,description` rows.
        methods: Vec<String>,
        /// `name,description` rows.
        properties: Vec<String>,
        /// Referenced sample titles.
        samples: Vec<String>,
    },
    /// Property page.
    Property {
        /// Owning class.
        class_name: String,
        /// Property name.
        name: String,
        /// Description text.
        description: String,
        /// Declared value type, when recognized.
        value_type: Option<String>,
        /// Syntax snippet.
        example: Option<String>,
    },
    /// Method page.
    Method {
        /// Owning class.
        class_name: String,
        /// Method name.
        name: String,
        /// Description text.
        description: String,
        /// `name,type,description` rows.
        parameters: Vec<String>,
        /// `type,description` rows.
        returns: Vec<String>,
        /// Syntax snippet.
        example: Option<String>,
    },
    /// Event page.
    Event {
        /// Owning class.
        class_name: String,
        /// Event name.
        name: String,
        /// Description text.
        description: String,
        /// Syntax snippet.
        example: Option<String>,
    },
    /// Code sample.
    Sample {
        /// Sample title.
        title: String,
        /// LLM-enhanced (or documented) description.
        description: String,
        /// Full code body.
        code: String,
    },
}

impl RecordBody {
    /// Discriminant of this body.
    pub fn kind(&self) -> RecordKind {
        match self {
            Self::Class { .. } => RecordKind::Class,
            Self::Property { .. } => RecordKind::Property,
            Self::Method { .. } => RecordKind::Method,
            Self::Event { .. } => RecordKind::Event,
            Self::Sample { .. } => RecordKind::Sample,
        }
    }
}

/// One embeddable unit extracted from a single documentation page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRecord {
    /// Stable identifier (`Class` or `Class.member`, sample title for samples).
    pub id: String,
    /// Text submitted to the embedding model.
    pub searchable_text: String,
    /// Structured fields.
    pub body: RecordBody,
}

impl PageRecord {
    /// Record discriminant.
    pub fn kind(&self) -> RecordKind {
        self.body.kind()
    }

    /// Serializes the structured body into the index metadata map.
    pub fn metadata(&self, language: &str) -> Metadata {
        let mut map = Metadata::new();
        map.insert(keys::KIND.into(), self.kind().as_str().into());
        map.insert(keys::TEXT.into(), self.searchable_text.clone());
        match &self.body {
            RecordBody::Class {
                class_name,
                methods,
                properties,
                samples,
                ..
            } => {
                map.insert(keys::CLASS_NAME.into(), class_name.clone());
                map.insert(
                    keys::METHODS.into(),
                    serialize_rows("methods", "name,description", methods),
                );
                map.insert(
                    keys::PROPERTIES.into(),
                    serialize_rows("properties", "name,description", properties),
                );
                map.insert(
                    keys::SAMPLE_IDS.into(),
                    serialize_rows("sampleIds", "name", samples),
                );
            }
            RecordBody::Property {
                class_name,
                name,
                value_type,
                example,
                ..
            } => {
                insert_member(&mut map, class_name, keys::PROPERTY_NAME, name);
                map.insert(
                    keys::PROPERTY_TYPE.into(),
                    value_type.clone().unwrap_or_else(|| NOT_AVAILABLE.into()),
                );
                map.insert(keys::EXAMPLE_USAGE.into(), example_usage(language, example));
            }
            RecordBody::Method {
                class_name,
                name,
                parameters,
                returns,
                example,
                ..
            } => {
                insert_member(&mut map, class_name, keys::METHOD_NAME, name);
                map.insert(
                    keys::METHOD_PARAMS.into(),
                    serialize_optional_rows("methodParams", "name,type,description", parameters),
                );
                map.insert(
                    keys::METHOD_RETURN_VALS.into(),
                    serialize_optional_rows("methodReturnVals", "type,description", returns),
                );
                map.insert(keys::EXAMPLE_USAGE.into(), example_usage(language, example));
            }
            RecordBody::Event {
                class_name,
                name,
                example,
                ..
            } => {
                insert_member(&mut map, class_name, keys::EVENT_NAME, name);
                map.insert(keys::EXAMPLE_USAGE.into(), example_usage(language, example));
            }
            RecordBody::Sample { title, code, .. } => {
                map.insert(keys::SAMPLE_ID.into(), title.clone());
                map.insert(keys::CODE_SAMPLE.into(), code.clone());
            }
        }
        map
    }
}

fn insert_member(map: &mut Metadata, class_name: &str, name_key: &str, name: &str) {
    map.insert(keys::CLASS_NAME.into(), class_name.to_string());
    map.insert(keys::ATTRIBUTE_NAME.into(), name.to_string());
    map.insert(name_key.into(), name.to_string());
}

fn example_usage(language: &str, example: &Option<String>) -> String {
    match example {
        Some(code) => format!("{language}\n{code}"),
        None => NOT_AVAILABLE.to_string(),
    }
}

/// `label[N]{columns}:` followed by one tab-indented row per line.
pub fn serialize_rows(label: &str, columns: &str, rows: &[String]) -> String {
    let mut out = format!("{label}[{}]{{{columns}}}:", rows.len());
    for row in rows {
        out.push_str("\n\t");
        out.push_str(row);
    }
    out
}

fn serialize_optional_rows(label: &str, columns: &str, rows: &[String]) -> String {
    if rows.is_empty() {
        NOT_AVAILABLE.to_string()
    } else {
        serialize_rows(label, columns, rows)
    }
}

/// Formatter limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatterConfig {
    /// Max combined length (characters) of sample text plus code.
    pub max_sample_chars: usize,
}

impl Default for FormatterConfig {
    fn default() -> Self {
        Self {
            max_sample_chars: 5 * 8192,
        }
    }
}

/// Turns extracted fields into [`PageRecord`]s with a fixed text layout per kind.
#[derive(Debug, Clone, Default)]
pub struct RecordFormatter {
    config: FormatterConfig,
}

impl RecordFormatter {
    /// Builds a formatter.
    pub fn new(config: FormatterConfig) -> Self {
        Self { config }
    }

    /// Formats any extracted fields.
    pub fn format(&self, fields: RawFields) -> Result<PageRecord, FormatError> {
        match fields {
            RawFields::Class(fields) => Ok(self.format_class(fields)),
            RawFields::Member(fields) => Ok(self.format_member(fields)),
            RawFields::Sample(fields) => self.format_sample(fields),
        }
    }

    fn format_class(&self, fields: ClassFields) -> PageRecord {
        let searchable_text = TextBlob::new()
            .line("title", &fields.class_name)
            .line("description", &fields.description)
            .finish();
        PageRecord {
            id: fields.class_name.clone(),
            searchable_text,
            body: RecordBody::Class {
                class_name: fields.class_name,
                description: fields.description,
                methods: fields.methods,
                properties: fields.properties,
                samples: fields.samples,
            },
        }
    }

    fn format_member(&self, fields: MemberFields) -> PageRecord {
        let id = format!("{}.{}", fields.class_name, fields.member_name);
        let mut blob = TextBlob::new()
            .line("title", &id)
            .line("description", &fields.description);
        let body = match fields.kind {
            MemberKind::Property => {
                blob = blob.line(
                    "type",
                    fields.declared_type.as_deref().unwrap_or(NOT_AVAILABLE),
                );
                RecordBody::Property {
                    class_name: fields.class_name,
                    name: fields.member_name,
                    description: fields.description,
                    value_type: fields.declared_type,
                    example: fields.example,
                }
            }
            MemberKind::Method => {
                blob = blob
                    .line("parameters", &rows_inline(&fields.parameters))
                    .line("returns", &rows_inline(&fields.returns));
                RecordBody::Method {
                    class_name: fields.class_name,
                    name: fields.member_name,
                    description: fields.description,
                    parameters: fields.parameters,
                    returns: fields.returns,
                    example: fields.example,
                }
            }
            MemberKind::Event => RecordBody::Event {
                class_name: fields.class_name,
                name: fields.member_name,
                description: fields.description,
                example: fields.example,
            },
        };
        PageRecord {
            id,
            searchable_text: blob.finish(),
            body,
        }
    }

    fn format_sample(&self, fields: SampleFields) -> Result<PageRecord, FormatError> {
        let searchable_text = TextBlob::new()
            .line("title", &fields.title)
            .line("description", &fields.description)
            .finish();
        let size = searchable_text.chars().count() + fields.code.chars().count();
        if size > self.config.max_sample_chars {
            return Err(FormatError::TooLarge {
                id: fields.title,
                size,
                limit: self.config.max_sample_chars,
            });
        }
        Ok(PageRecord {
            id: fields.title.clone(),
            searchable_text,
            body: RecordBody::Sample {
                title: fields.title,
                description: fields.description,
                code: fields.code,
            },
        })
    }
}

fn rows_inline(rows: &[String]) -> String {
    if rows.is_empty() {
        NOT_AVAILABLE.to_string()
    } else {
        rows.join("; ")
    }
}

struct TextBlob(String);

impl TextBlob {
    fn new() -> Self {
        Self(String::new())
    }

    fn line(mut self, label: &str, value: &str) -> Self {
        if !self.0.is_empty() {
            self.0.push('\n');
        }
        self.0.push_str(label);
        self.0.push_str(": ");
        self.0.push_str(value.trim());
        self
    }

    fn finish(self) -> String {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn method_fields() -> MemberFields {
        MemberFields {
            class_name: "Sketch".into(),
            member_name: "project".into(),
            kind: MemberKind::Method,
            description: "Projects entities onto the sketch.".into(),
            declared_type: None,
            parameters: vec!["entity,Base,The entity to project.".into()],
            returns: vec!["ObjectCollection,The created curves.".into()],
            example: Some("returnValue = sketch_var.project(entity)".into()),
        }
    }

    #[test]
    fn formatting_is_idempotent() {
        let formatter = RecordFormatter::default();
        let first = formatter.format(RawFields::Member(method_fields())).unwrap();
        let second = formatter.format(RawFields::Member(method_fields())).unwrap();
        assert_eq!(first.searchable_text, second.searchable_text);
        assert_eq!(first.metadata("Python"), second.metadata("Python"));
    }

    #[test]
    fn method_record_layout() {
        let record = RecordFormatter::default()
            .format(RawFields::Member(method_fields()))
            .unwrap();
        assert_eq!(record.id, "Sketch.project");
        assert_eq!(record.kind(), RecordKind::Method);
        assert_eq!(
            record.searchable_text,
            "title: Sketch.project\n\
             description: Projects entities onto the sketch.\n\
             parameters: entity,Base,The entity to project.\n\
             returns: ObjectCollection,The created curves."
        );
        let metadata = record.metadata("Python");
        assert_eq!(metadata[keys::CLASS_NAME], "Sketch");
        assert_eq!(metadata[keys::ATTRIBUTE_NAME], "project");
        assert_eq!(metadata[keys::METHOD_NAME], "project");
        assert_eq!(
            metadata[keys::METHOD_PARAMS],
            "methodParams[1]{name,type,description}:\n\tentity,Base,The entity to project."
        );
        assert_eq!(
            metadata[keys::EXAMPLE_USAGE],
            "Python\nreturnValue = sketch_var.project(entity)"
        );
        assert!(!metadata.contains_key(keys::PROPERTY_NAME));
    }

    #[test]
    fn property_without_type_reports_not_available() {
        let mut fields = method_fields();
        fields.kind = MemberKind::Property;
        fields.member_name = "isVisible".into();
        fields.parameters.clear();
        fields.returns.clear();
        fields.example = None;
        let record = RecordFormatter::default()
            .format(RawFields::Member(fields))
            .unwrap();
        let metadata = record.metadata("Python");
        assert_eq!(metadata[keys::PROPERTY_NAME], "isVisible");
        assert_eq!(metadata[keys::PROPERTY_TYPE], "N/A");
        assert_eq!(metadata[keys::EXAMPLE_USAGE], "N/A");
        assert!(record.searchable_text.ends_with("type: N/A"));
    }

    #[test]
    fn class_tables_are_serialized_with_counts() {
        let record = RecordFormatter::default()
            .format(RawFields::Class(ClassFields {
                class_name: "Sketch".into(),
                description: "A sketch.".into(),
                methods: vec!["project,Projects.".into(), "move,Moves.".into()],
                properties: Vec::new(),
                samples: vec!["Sketch Sample".into()],
            }))
            .unwrap();
        let metadata = record.metadata("Python");
        assert_eq!(
            metadata[keys::METHODS],
            "methods[2]{name,description}:\n\tproject,Projects.\n\tmove,Moves."
        );
        assert_eq!(metadata[keys::PROPERTIES], "properties[0]{name,description}:");
        assert_eq!(metadata[keys::SAMPLE_IDS], "sampleIds[1]{name}:\n\tSketch Sample");
        assert_eq!(record.searchable_text, "title: Sketch\ndescription: A sketch.");
    }

    #[test]
    fn oversized_samples_are_rejected() {
        let formatter = RecordFormatter::new(FormatterConfig {
            max_sample_chars: 64,
        });
        let fields = SampleFields {
            title: "Big Sample".into(),
            description: "Large.".into(),
            code: "x = 1\n".repeat(20),
        };
        assert!(matches!(
            formatter.format(RawFields::Sample(fields)),
            Err(FormatError::TooLarge { limit: 64, .. })
        ));
    }
}
