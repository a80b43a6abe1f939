//! `#[derive(Describe)]` against serde attributes

#![allow(dead_code)]

use std::collections::HashMap;

use eventwire::schema::{walk, Describe as _, Primitive, RecordDescriptor, SchemaError};
use eventwire::{Describe, Schema, TypeDescriptor};
use serde::Serialize;

fn field_names(descriptor: &TypeDescriptor) -> Vec<&str> {
    match descriptor {
        TypeDescriptor::Record(record) => record.fields.iter().map(|f| f.name.as_str()).collect(),
        other => panic!("expected a record, got {}", other),
    }
}

fn record_name(descriptor: &TypeDescriptor) -> &str {
    match descriptor {
        TypeDescriptor::Record(record) => &record.name,
        other => panic!("expected a record, got {}", other),
    }
}

#[derive(Serialize, Describe)]
#[serde(rename_all = "camelCase")]
struct Order {
    order_id: String,
    customer_id: String,
    line_count: u32,
    #[serde(rename = "total")]
    total_cents: i64,
}

#[test]
fn test_rename_all_camel_case() {
    let descriptor = walk::<Order>().unwrap();
    assert_eq!(
        field_names(&descriptor),
        vec!["customerId", "lineCount", "orderId", "total"]
    );

    let order = Order {
        order_id: "o-1".into(),
        customer_id: "c-1".into(),
        line_count: 2,
        total_cents: 1999,
    };
    let json = serde_json::to_value(&order).unwrap();
    let mut serialized: Vec<&str> = json.as_object().unwrap().keys().map(String::as_str).collect();
    serialized.sort_unstable();
    assert_eq!(serialized, field_names(&descriptor));
}

#[derive(Serialize, Describe)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
struct Screaming {
    retry_count: u8,
}

#[derive(Serialize, Describe)]
#[serde(rename_all = "kebab-case")]
struct Kebab {
    retry_count: u8,
}

#[derive(Serialize, Describe)]
#[serde(rename_all = "PascalCase")]
struct Pascal {
    retry_count: u8,
}

#[test]
fn test_other_rename_rules() {
    assert_eq!(field_names(&Screaming::describe()), vec!["RETRY_COUNT"]);
    assert_eq!(field_names(&Kebab::describe()), vec!["retry-count"]);
    assert_eq!(field_names(&Pascal::describe()), vec!["RetryCount"]);
}

#[derive(Serialize, Describe)]
#[serde(rename = "BookRecord")]
struct Book {
    id: String,
    #[serde(skip)]
    cache_key: String,
    #[serde(skip_serializing)]
    internal_notes: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    subtitle: Option<String>,
    #[serde(rename(serialize = "authorId", deserialize = "author"))]
    author_id: String,
}

#[test]
fn test_container_rename_and_skips() {
    let descriptor = walk::<Book>().unwrap();
    assert_eq!(record_name(&descriptor), "BookRecord");
    assert_eq!(field_names(&descriptor), vec!["authorId", "id", "subtitle"]);

    // Option is transparent.
    match &descriptor {
        TypeDescriptor::Record(record) => assert_eq!(
            record.get("subtitle"),
            Some(&TypeDescriptor::Primitive(Primitive::Named("string")))
        ),
        _ => unreachable!(),
    }

    let schema = Schema::of::<Book>().unwrap();
    assert_eq!(schema.name(), "BookRecord");
}

#[derive(Serialize, Describe)]
struct Page<T> {
    items: Vec<T>,
    total: u64,
}

#[derive(Serialize, Describe)]
struct Tag {
    label: String,
}

#[test]
fn test_generic_record() {
    let descriptor = walk::<Page<Tag>>().unwrap();
    let expected: TypeDescriptor = RecordDescriptor::new("Page")
        .field(
            "items",
            TypeDescriptor::array(RecordDescriptor::new("Tag").field("label", String::describe()).into()),
        )
        .field("total", u64::describe())
        .into();
    assert_eq!(descriptor, expected);

    assert_eq!(
        Schema::of::<Page<Tag>>().unwrap().canonical_text(),
        r#"{"type":"record","name":"Page","fields":[{"name":"items","type":{"type":"array","items":{"type":"record","name":"Tag","fields":[{"name":"label","type":"string"}]}}},{"name":"total","type":"long"}]}"#
    );
}

#[derive(Serialize, Describe)]
struct Token {
    r#type: String,
    r#ref: String,
    scopes: HashMap<String, bool>,
}

#[test]
fn test_raw_identifiers() {
    let descriptor = walk::<Token>().unwrap();
    assert_eq!(field_names(&descriptor), vec!["ref", "scopes", "type"]);

    let token = Token {
        r#type: "bearer".into(),
        r#ref: "t-1".into(),
        scopes: HashMap::new(),
    };
    let json = serde_json::to_value(&token).unwrap();
    assert!(json.get("type").is_some());
    assert!(json.get("ref").is_some());
}

#[derive(Describe)]
struct Collides {
    name: String,
    #[serde(rename = "name")]
    display_name: String,
}

#[test]
fn test_renamed_collision_is_rejected() {
    match walk::<Collides>() {
        Err(SchemaError::DuplicateField { record, field }) => {
            assert_eq!(record, "Collides");
            assert_eq!(field, "name");
        }
        other => panic!("expected a duplicate field error, got {:?}", other),
    }
}
