use std::fs;
use std::path::PathBuf;

use docrag::extractor::{MemberKind, RawFields};
use docrag::{ExtractionError, PageExtractor, PageKind};
use pretty_assertions::assert_eq;

fn fixture(name: &str) -> String {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures/html")
        .join(name);
    fs::read_to_string(&path).unwrap_or_else(|err| panic!("read {}: {err}", path.display()))
}

fn extract(name: &str, kind: PageKind, title: &str) -> Result<RawFields, ExtractionError> {
    PageExtractor::default().extract(&fixture(name), kind, title)
}

#[test]
fn class_page_tables_skip_boilerplate_rows() {
    let RawFields::Class(fields) = extract("sketch_class.htm", PageKind::Class, "Sketch").unwrap()
    else {
        panic!("expected class fields");
    };
    assert_eq!(fields.class_name, "Sketch");
    assert_eq!(
        fields.description,
        "Represents a sketch within a component. A sketch contains curves and constraints."
    );
    assert_eq!(
        fields.methods,
        vec![
            "project,Projects the specified entity onto the sketch.",
            "deleteMe,Deletes the sketch.",
        ]
    );
    assert_eq!(
        fields.properties,
        vec![
            "isVisible,Gets and sets if the sketch is visible.",
            "name,Gets and sets the name of the sketch.",
        ]
    );
    assert_eq!(fields.samples, vec!["Spur Gear Sample"]);
}

#[test]
fn property_page_reads_declared_type_and_usage() {
    let RawFields::Member(fields) =
        extract("sketch_is_visible.htm", PageKind::Member, "isVisible").unwrap()
    else {
        panic!("expected member fields");
    };
    assert_eq!(fields.kind, MemberKind::Property);
    assert_eq!(fields.class_name, "Sketch");
    assert_eq!(fields.member_name, "isVisible");
    assert_eq!(fields.declared_type.as_deref(), Some("boolean"));
    assert_eq!(
        fields.example.as_deref(),
        Some("value = sketch_var.isVisible\nsketch_var.isVisible = True")
    );
    assert!(fields.parameters.is_empty());
}

#[test]
fn read_only_property_keeps_its_declared_type() {
    let RawFields::Member(fields) = extract("profile_area.htm", PageKind::Member, "area").unwrap()
    else {
        panic!("expected member fields");
    };
    assert_eq!(fields.kind, MemberKind::Property);
    assert_eq!(fields.class_name, "Profile");
    assert_eq!(fields.declared_type.as_deref(), Some("double"));
    assert_eq!(fields.example.as_deref(), Some("returnValue = profile_var.area"));
}

#[test]
fn method_page_reads_parameters_and_return_values() {
    let RawFields::Member(fields) =
        extract("sketch_project.htm", PageKind::Member, "project").unwrap()
    else {
        panic!("expected member fields");
    };
    assert_eq!(fields.kind, MemberKind::Method);
    assert_eq!(
        fields.description,
        "Projects the specified entity onto the x-y plane of the sketch."
    );
    assert_eq!(fields.parameters, vec!["entity,Base,The entity to project."]);
    assert_eq!(
        fields.returns,
        vec!["ObjectCollection,The sketch entities created by the projection."]
    );
    assert_eq!(
        fields.example.as_deref(),
        Some("returnValue = sketch_var.project(entity)")
    );
    assert_eq!(fields.declared_type, None);
}

#[test]
fn event_page_has_no_tables() {
    let RawFields::Member(fields) =
        extract("command_created.htm", PageKind::Member, "commandCreated").unwrap()
    else {
        panic!("expected member fields");
    };
    assert_eq!(fields.kind, MemberKind::Event);
    assert_eq!(fields.class_name, "CommandDefinition");
    assert_eq!(fields.member_name, "commandCreated");
    assert!(fields.parameters.is_empty());
    assert!(fields.returns.is_empty());
}

#[test]
fn method_without_description_is_rejected() {
    let err = extract("no_description_method.htm", PageKind::Member, "deleteMe").unwrap_err();
    assert_eq!(
        err,
        ExtractionError::MissingSection {
            section: "Description"
        }
    );
}

#[test]
fn sample_page_keeps_code_out_of_description() {
    let RawFields::Sample(fields) =
        extract("spur_gear_sample.htm", PageKind::Sample, " Spur Gear Sample ").unwrap()
    else {
        panic!("expected sample fields");
    };
    assert_eq!(fields.title, "Spur Gear Sample");
    assert_eq!(
        fields.description,
        "Creates a spur gear component driven by user parameters."
    );
    assert!(fields.code.starts_with("import adsk.core"), "{}", fields.code);
}

#[test]
fn sample_page_without_code_is_rejected() {
    let err = extract("broken_sample.htm", PageKind::Sample, "Broken Sample").unwrap_err();
    assert_eq!(
        err,
        ExtractionError::MissingCode {
            language: "Python".to_string()
        }
    );
}
