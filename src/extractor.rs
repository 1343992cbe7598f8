//! Structured field extraction from API reference pages.
//!
//! Page kinds differ in which headings they carry. Every section is read through the
//! same bounded collection rule in [`crate::html`], parametrized by [`SectionLabel`].

use regex::Regex;
use scraper::{Html, Selector};

use crate::error::ExtractionError;
use crate::html;
use crate::taxonomy::BOILERPLATE_ATTRIBUTES;

/// Section headings recognized on reference pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionLabel {
    /// `Description`
    Description,
    /// `Parameters`
    Parameters,
    /// `Return Value` / `Return Values`
    ReturnValues,
    /// `Property Value`
    PropertyValue,
    /// `Methods`
    Methods,
    /// `Properties`
    Properties,
    /// `Samples`
    Samples,
}

impl SectionLabel {
    const ALL: [SectionLabel; 7] = [
        SectionLabel::Description,
        SectionLabel::Parameters,
        SectionLabel::ReturnValues,
        SectionLabel::PropertyValue,
        SectionLabel::Methods,
        SectionLabel::Properties,
        SectionLabel::Samples,
    ];

    /// Human-readable heading text.
    pub fn label(self) -> &'static str {
        match self {
            Self::Description => "Description",
            Self::Parameters => "Parameters",
            Self::ReturnValues => "Return Value",
            Self::PropertyValue => "Property Value",
            Self::Methods => "Methods",
            Self::Properties => "Properties",
            Self::Samples => "Samples",
        }
    }

    fn pattern(self) -> &'static str {
        match self {
            Self::Description => r"(?i)^\s*description\s*$",
            Self::Parameters => r"(?i)^\s*parameters\s*$",
            Self::ReturnValues => r"(?i)^\s*return\s+values?\s*$",
            Self::PropertyValue => r"(?i)^\s*property\s+value\s*$",
            Self::Methods => r"(?i)^\s*methods\s*$",
            Self::Properties => r"(?i)^\s*properties\s*$",
            Self::Samples => r"(?i)^\s*samples\s*$",
        }
    }

    fn index(self) -> usize {
        Self::ALL
            .iter()
            .position(|label| *label == self)
            .unwrap_or_default()
    }
}

/// Which kind of page is being extracted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageKind {
    /// Class overview page (interior taxonomy node).
    Class,
    /// Property, method or event page; the exact kind comes from the page title.
    Member,
    /// Standalone code sample page.
    Sample,
}

/// Member page flavor, parsed from the page title suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MemberKind {
    /// `... Property`
    Property,
    /// `... Method`
    Method,
    /// `... Event`
    Event,
}

impl MemberKind {
    /// Title suffix used by the reference site.
    pub fn suffix(self) -> &'static str {
        match self {
            Self::Property => "Property",
            Self::Method => "Method",
            Self::Event => "Event",
        }
    }
}

/// Result of splitting a member page title.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberTitle {
    /// Owning class.
    pub class_name: String,
    /// Member name.
    pub member_name: String,
    /// Member flavor.
    pub kind: MemberKind,
}

/// Parses `"ClassName.memberName Method"` into its components.
pub fn parse_member_title(title: &str) -> Option<MemberTitle> {
    let title = html::collapse_whitespace(title);
    let title = title.split(" - ").next().unwrap_or(&title).trim();
    let (name, suffix) = title.rsplit_once(' ')?;
    let kind = [MemberKind::Property, MemberKind::Method, MemberKind::Event]
        .into_iter()
        .find(|kind| kind.suffix().eq_ignore_ascii_case(suffix))?;
    let (class_name, member_name) = name.trim().split_once('.')?;
    if class_name.is_empty() || member_name.is_empty() {
        return None;
    }
    Some(MemberTitle {
        class_name: class_name.to_string(),
        member_name: member_name.to_string(),
        kind,
    })
}

/// Extracts `<TYPE>` from "This is a read/write property whose value is a `<TYPE>`."
pub fn parse_declared_type(pattern: &Regex, text: &str) -> Option<String> {
    pattern
        .captures(text)
        .and_then(|captures| captures.name("ty"))
        .map(|ty| ty.as_str().trim().to_string())
        .filter(|ty| !ty.is_empty())
}

/// Fields pulled from a class overview page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassFields {
    /// Canonical class name.
    pub class_name: String,
    /// Description section text.
    pub description: String,
    /// `name,description` rows from the Methods table.
    pub methods: Vec<String>,
    /// `name,description` rows from the Properties table.
    pub properties: Vec<String>,
    /// Sample titles from the Samples table.
    pub samples: Vec<String>,
}

/// Fields pulled from a property, method or event page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberFields {
    /// Owning class.
    pub class_name: String,
    /// Member name.
    pub member_name: String,
    /// Member flavor.
    pub kind: MemberKind,
    /// Description section text (may be empty for properties).
    pub description: String,
    /// Declared value type (properties only, when recognizable).
    pub declared_type: Option<String>,
    /// `name,type,description` rows (methods).
    pub parameters: Vec<String>,
    /// `type,description` rows (methods).
    pub returns: Vec<String>,
    /// Syntax snippet in the configured language.
    pub example: Option<String>,
}

/// Fields pulled from a sample page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleFields {
    /// Sample title (from the taxonomy).
    pub title: String,
    /// Description section text.
    pub description: String,
    /// Full code body.
    pub code: String,
}

/// Raw extraction output, tagged by page kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawFields {
    /// Class overview.
    Class(ClassFields),
    /// Property, method or event.
    Member(MemberFields),
    /// Code sample.
    Sample(SampleFields),
}

/// Extraction tuning knobs.
#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    /// Language label used for code anchors (`div#Python`, `pre#Python_code`).
    pub language: String,
    /// First-cell values dropped from every table.
    pub skip_rows: Vec<String>,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            language: "Python".to_string(),
            skip_rows: BOILERPLATE_ATTRIBUTES
                .iter()
                .map(|name| name.to_string())
                .collect(),
        }
    }
}

/// Stateless page extractor; cheap to share across worker threads.
#[derive(Clone)]
pub struct PageExtractor {
    config: ExtractorConfig,
    selectors: PageSelectors,
    sections: Vec<Regex>,
    declared_type: Regex,
}

#[derive(Clone)]
struct PageSelectors {
    heading: Selector,
    title_heading: Selector,
    title: Selector,
    class_meta: Vec<Selector>,
    table: Selector,
    row: Selector,
    cell: Selector,
    pre: Selector,
    syntax_anchor: Selector,
    sample_code: Selector,
}

impl PageSelectors {
    fn new(language: &str) -> Self {
        let language = css_ident(language);
        Self {
            heading: Selector::parse("h2.api").expect("heading selector"),
            title_heading: Selector::parse("h1.api").expect("title heading selector"),
            title: Selector::parse("title").expect("title selector"),
            class_meta: ["meta[name=\"classname\"]", "meta[name=\"title\"]"]
                .into_iter()
                .map(|css| Selector::parse(css).expect("meta selector"))
                .collect(),
            table: Selector::parse("table").expect("table selector"),
            row: Selector::parse("tr").expect("row selector"),
            cell: Selector::parse("td").expect("cell selector"),
            pre: Selector::parse("pre").expect("pre selector"),
            syntax_anchor: Selector::parse(&format!("div#{language}"))
                .expect("syntax anchor selector"),
            sample_code: Selector::parse(&format!("pre#{language}_code"))
                .expect("sample code selector"),
        }
    }
}

fn css_ident(raw: &str) -> String {
    let ident: String = raw
        .chars()
        .filter(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '_' | '-'))
        .collect();
    if ident.is_empty() {
        "Python".to_string()
    } else {
        ident
    }
}

impl PageExtractor {
    /// Builds an extractor for the given configuration.
    pub fn new(config: ExtractorConfig) -> Self {
        let selectors = PageSelectors::new(&config.language);
        let sections = SectionLabel::ALL
            .iter()
            .map(|label| Regex::new(label.pattern()).expect("section pattern"))
            .collect();
        let declared_type = Regex::new(
            r"(?i)^\s*this is an?\s+(?:read|write)(?:[\s/-]*(?:only|write))?\s+property\s+whose\s+value\s+is\s+an?\s+(?P<ty>.+?)\.(?:\s|$)",
        )
        .expect("declared type pattern");
        Self {
            config,
            selectors,
            sections,
            declared_type,
        }
    }

    /// Extracts the fields `kind` calls for from `page_html`.
    ///
    /// `taxonomy_title` names class and sample pages when the page carries no better name.
    pub fn extract(
        &self,
        page_html: &str,
        kind: PageKind,
        taxonomy_title: &str,
    ) -> Result<RawFields, ExtractionError> {
        let document = Html::parse_document(page_html);
        match kind {
            PageKind::Class => Ok(RawFields::Class(self.class_fields(&document, taxonomy_title))),
            PageKind::Member => self.member_fields(&document).map(RawFields::Member),
            PageKind::Sample => self
                .sample_fields(&document, taxonomy_title)
                .map(RawFields::Sample),
        }
    }

    fn class_fields(&self, document: &Html, taxonomy_title: &str) -> ClassFields {
        let class_name = self
            .meta_class_name(document)
            .unwrap_or_else(|| taxonomy_title.trim().to_string());
        ClassFields {
            class_name,
            description: self.section(document, SectionLabel::Description).unwrap_or_default(),
            methods: self.table(document, SectionLabel::Methods, 2),
            properties: self.table(document, SectionLabel::Properties, 2),
            samples: self.table(document, SectionLabel::Samples, 1),
        }
    }

    fn member_fields(&self, document: &Html) -> Result<MemberFields, ExtractionError> {
        let heading = document
            .select(&self.selectors.title_heading)
            .next()
            .map(|h1| html::element_text(&h1))
            .filter(|text| !text.is_empty());
        let page_title = document
            .select(&self.selectors.title)
            .next()
            .map(|title| html::element_text(&title));
        let title = heading
            .as_deref()
            .and_then(parse_member_title)
            .or_else(|| page_title.as_deref().and_then(parse_member_title))
            .ok_or_else(|| {
                ExtractionError::UnrecognizedTitle(
                    heading.or(page_title).unwrap_or_default(),
                )
            })?;

        let description = self.section(document, SectionLabel::Description);
        let mut declared_type = None;
        match title.kind {
            MemberKind::Method | MemberKind::Event if description.is_none() => {
                return Err(ExtractionError::MissingSection {
                    section: SectionLabel::Description.label(),
                });
            }
            MemberKind::Property => {
                let value = self.section(document, SectionLabel::PropertyValue).ok_or(
                    ExtractionError::MissingSection {
                        section: SectionLabel::PropertyValue.label(),
                    },
                )?;
                declared_type = parse_declared_type(&self.declared_type, &value);
            }
            _ => {}
        }

        let (parameters, returns) = if title.kind == MemberKind::Method {
            (
                self.table(document, SectionLabel::Parameters, 3),
                self.table(document, SectionLabel::ReturnValues, 2),
            )
        } else {
            (Vec::new(), Vec::new())
        };

        Ok(MemberFields {
            class_name: title.class_name,
            member_name: title.member_name,
            kind: title.kind,
            description: description.unwrap_or_default(),
            declared_type,
            parameters,
            returns,
            example: self.syntax(document),
        })
    }

    fn sample_fields(
        &self,
        document: &Html,
        taxonomy_title: &str,
    ) -> Result<SampleFields, ExtractionError> {
        let code = document
            .select(&self.selectors.sample_code)
            .next()
            .map(html::code_text)
            .filter(|code| !code.is_empty())
            .ok_or_else(|| ExtractionError::MissingCode {
                language: self.config.language.clone(),
            })?;
        Ok(SampleFields {
            title: taxonomy_title.trim().to_string(),
            description: self.section(document, SectionLabel::Description).unwrap_or_default(),
            code,
        })
    }

    /// Text of the `label` section, `None` when the heading is absent.
    pub fn section(&self, document: &Html, label: SectionLabel) -> Option<String> {
        html::find_heading(document, &self.selectors.heading, &self.sections[label.index()])
            .map(html::section_text)
    }

    /// Serialized rows of the first table in the `label` section.
    pub fn table(&self, document: &Html, label: SectionLabel, columns: usize) -> Vec<String> {
        let Some(heading) =
            html::find_heading(document, &self.selectors.heading, &self.sections[label.index()])
        else {
            return Vec::new();
        };
        let Some(table) = html::section_table(heading, &self.selectors.table) else {
            return Vec::new();
        };
        let skip: Vec<&str> = self.config.skip_rows.iter().map(String::as_str).collect();
        html::table_rows(table, &self.selectors.row, &self.selectors.cell, columns, &skip)
    }

    fn syntax(&self, document: &Html) -> Option<String> {
        let anchor = document.select(&self.selectors.syntax_anchor).next()?;
        html::next_pre(anchor, &self.selectors.pre)
            .map(html::code_text)
            .filter(|code| !code.is_empty())
    }

    fn meta_class_name(&self, document: &Html) -> Option<String> {
        self.selectors.class_meta.iter().find_map(|selector| {
            let content = document.select(selector).next()?.value().attr("content")?;
            let name = content.trim();
            let name = name
                .strip_suffix(" Object")
                .or_else(|| name.strip_suffix(" Class"))
                .unwrap_or(name)
                .trim();
            (!name.is_empty()).then(|| name.to_string())
        })
    }
}

impl Default for PageExtractor {
    fn default() -> Self {
        Self::new(ExtractorConfig::default())
    }
}
