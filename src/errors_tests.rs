use super::*;
use validator::{Validate, ValidationError};

#[derive(Debug, Validate)]
struct TestStruct {
    #[validate(length(min = 3))]
    name: String,
    #[validate(length(min = 1, message = "at least one plan is required"))]
    plans: Vec<String>,
}

fn validate_schema(test: &SchemaTest) -> Result<(), ValidationError> {
    if test.value.is_none() {
        let mut error = ValidationError::new("missing_value");
        error.message = Some("value required".into());
        return Err(error);
    }
    Ok(())
}

#[derive(Debug, Validate)]
#[validate(schema(function = "validate_schema"))]
struct SchemaTest {
    value: Option<String>,
}

#[test]
fn test_format_validation_errors_with_custom_messages() {
    let test = TestStruct {
        name: "ab".to_string(),
        plans: vec![],
    };
    let errors = test.validate().unwrap_err();
    let formatted = format_validation_errors(&errors);

    assert!(formatted.contains("at least one plan is required"));
    assert!(formatted.contains("invalid value for field 'name'"));
}

#[test]
fn test_format_validation_errors_includes_schema_errors() {
    let test = SchemaTest { value: None };
    let errors = test.validate().unwrap_err();
    let formatted = format_validation_errors(&errors);

    assert!(formatted.contains("value required"));
}

#[test]
fn test_from_validation_produces_template_parse_error() {
    let test = TestStruct {
        name: "widget".to_string(),
        plans: vec![],
    };
    let errors = test.validate().unwrap_err();
    let err = BrokerError::from_validation("widget", &errors);

    assert_eq!(err.kind(), "template_parse");
    assert_eq!(
        err.to_string(),
        "Template 'widget' is malformed: at least one plan is required"
    );
}

#[test]
fn test_kind_tags_are_stable() {
    let cases = vec![
        (BrokerError::conflict("x"), "conflict"),
        (BrokerError::dependency_violation("x"), "dependency_violation"),
        (BrokerError::invalid_parameters("x"), "invalid_parameters"),
        (BrokerError::not_found("x"), "not_found"),
        (BrokerError::credential_resolution("x"), "credential_resolution"),
        (BrokerError::provisioning_failed("x"), "provisioning_failed"),
        (BrokerError::cloud(anyhow::anyhow!("x")), "cloud_error"),
        (BrokerError::catalog_fetch(anyhow::anyhow!("x")), "catalog_fetch"),
        (BrokerError::template_parse("t", "x"), "template_parse"),
        (BrokerError::storage(anyhow::anyhow!("x")), "storage_error"),
        (BrokerError::internal(anyhow::anyhow!("x")), "internal_error"),
    ];

    for (err, expected) in cases {
        assert_eq!(err.kind(), expected, "unexpected kind for {err}");
    }
}

#[test]
fn test_client_errors_are_classified() {
    assert!(BrokerError::conflict("dup").is_client_error());
    assert!(BrokerError::dependency_violation("bound").is_client_error());
    assert!(BrokerError::not_found("gone").is_client_error());
    assert!(!BrokerError::provisioning_failed("rollback").is_client_error());
    assert!(!BrokerError::storage(anyhow::anyhow!("down")).is_client_error());
}

#[test]
fn test_anyhow_converts_to_internal() {
    let err: BrokerError = anyhow::anyhow!("boom").into();

    assert!(matches!(err, BrokerError::Internal(_)));
    assert_eq!(err.to_string(), "Internal error: boom");
}

#[test]
fn test_display_includes_source_chain() {
    let source = anyhow::anyhow!("connection reset").context("Failed to list templates");
    let err = BrokerError::catalog_fetch(source);

    assert_eq!(
        err.to_string(),
        "Catalog fetch failed: Failed to list templates: connection reset"
    );
}
