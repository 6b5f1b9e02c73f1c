use super::*;
use crate::models::{PlanParameter, TemplateRef};
use serde_json::json;

fn parameter(name: &str, default: Option<&str>) -> PlanParameter {
    PlanParameter {
        name: name.into(),
        description: None,
        default: default.map(str::to_string),
        allowed_values: vec![],
    }
}

fn definition() -> ServiceDefinition {
    ServiceDefinition {
        id: "widget".into(),
        name: "widget".into(),
        display_name: "Widget".into(),
        description: String::new(),
        bindable: true,
        tags: vec![],
        plans: vec![Plan {
            id: "small".into(),
            name: "small".into(),
            description: String::new(),
            free: false,
            prescribed: BTreeMap::from([("InstanceType".to_string(), "t3.small".to_string())]),
        }],
        parameters: vec![
            parameter("InstanceType", Some("t3.micro")),
            parameter("Size", Some("1")),
            parameter("VpcId", None),
        ],
        template: TemplateRef {
            bucket: "bucket".into(),
            key: "widget-main.yaml".into(),
            region: "us-east-1".into(),
        },
    }
}

fn params(value: JsonValue) -> Params {
    serde_json::from_value(value).unwrap()
}

#[test]
fn test_caller_values_and_plan_values_are_merged() {
    let definition = definition();
    let overrides = HashMap::new();
    let policy = OverridePolicy::new(&overrides, true);

    let resolved = policy
        .stack_parameters(
            &definition,
            &definition.plans[0],
            &params(json!({"Size": 3, "VpcId": "vpc-1"})),
        )
        .unwrap();

    assert_eq!(resolved["Size"], "3");
    assert_eq!(resolved["VpcId"], "vpc-1");
    assert_eq!(resolved["InstanceType"], "t3.small");
}

#[test]
fn test_session_keys_are_not_forwarded() {
    let definition = definition();
    let overrides = HashMap::new();
    let policy = OverridePolicy::new(&overrides, true);

    let resolved = policy
        .stack_parameters(
            &definition,
            &definition.plans[0],
            &params(json!({"VpcId": "vpc-1", "region": "eu-west-1"})),
        )
        .unwrap();

    assert!(!resolved.contains_key("region"));
}

#[test]
fn test_plan_prescribed_parameter_is_rejected() {
    let definition = definition();
    let overrides = HashMap::new();
    let policy = OverridePolicy::new(&overrides, true);

    let err = policy
        .stack_parameters(
            &definition,
            &definition.plans[0],
            &params(json!({"InstanceType": "m5.large", "VpcId": "vpc-1"})),
        )
        .unwrap_err();

    assert_eq!(err.kind(), "invalid_parameters");
    assert!(err.to_string().contains("fixed by plan"));
}

#[test]
fn test_unknown_parameter_is_rejected() {
    let definition = definition();
    let overrides = HashMap::new();
    let policy = OverridePolicy::new(&overrides, true);

    let err = policy
        .stack_parameters(
            &definition,
            &definition.plans[0],
            &params(json!({"Colour": "blue", "VpcId": "vpc-1"})),
        )
        .unwrap_err();

    assert!(err.to_string().contains("has no parameter 'Colour'"));
}

#[test]
fn test_missing_required_parameter_is_rejected() {
    let definition = definition();
    let overrides = HashMap::new();
    let policy = OverridePolicy::new(&overrides, true);

    let err = policy
        .stack_parameters(&definition, &definition.plans[0], &Params::new())
        .unwrap_err();

    assert!(err.to_string().contains("missing required parameters: VpcId"));
}

#[test]
fn test_prescribed_overrides_win_and_are_hidden() {
    let definition = definition();
    let overrides = HashMap::from([("VpcId".to_string(), "vpc-global".to_string())]);
    let policy = OverridePolicy::new(&overrides, true);

    assert!(policy.is_hidden("VpcId"));

    let resolved = policy
        .stack_parameters(&definition, &definition.plans[0], &Params::new())
        .unwrap();
    assert_eq!(resolved["VpcId"], "vpc-global");

    let err = policy
        .stack_parameters(
            &definition,
            &definition.plans[0],
            &params(json!({"VpcId": "vpc-mine"})),
        )
        .unwrap_err();
    assert!(err.to_string().contains("managed by the broker"));
}

#[test]
fn test_non_prescribed_overrides_act_as_defaults() {
    let definition = definition();
    let overrides = HashMap::from([("VpcId".to_string(), "vpc-global".to_string())]);
    let policy = OverridePolicy::new(&overrides, false);

    assert!(!policy.is_hidden("VpcId"));

    let resolved = policy
        .stack_parameters(&definition, &definition.plans[0], &Params::new())
        .unwrap();
    assert_eq!(resolved["VpcId"], "vpc-global");

    let resolved = policy
        .stack_parameters(
            &definition,
            &definition.plans[0],
            &params(json!({"VpcId": "vpc-mine"})),
        )
        .unwrap();
    assert_eq!(resolved["VpcId"], "vpc-mine");
}

#[test]
fn test_lowercased_override_keys_match_parameters() {
    let definition = definition();
    let overrides = HashMap::from([("vpcid".to_string(), "vpc-global".to_string())]);
    let policy = OverridePolicy::new(&overrides, true);

    assert!(policy.is_hidden("VpcId"));

    let resolved = policy
        .stack_parameters(&definition, &definition.plans[0], &Params::new())
        .unwrap();
    assert_eq!(resolved["VpcId"], "vpc-global");
    assert!(!resolved.contains_key("vpcid"));
}

#[test]
fn test_overrides_for_undeclared_parameters_are_dropped() {
    let definition = definition();
    let overrides = HashMap::from([
        ("VpcId".to_string(), "vpc-global".to_string()),
        ("Unrelated".to_string(), "x".to_string()),
    ]);
    let policy = OverridePolicy::new(&overrides, true);

    let resolved = policy
        .stack_parameters(&definition, &definition.plans[0], &Params::new())
        .unwrap();

    assert!(!resolved.contains_key("Unrelated"));
}

#[test]
fn test_session_overrides_merge_caller_keys() {
    let overrides = HashMap::from([
        ("region".to_string(), "us-west-2".to_string()),
        ("VpcId".to_string(), "vpc-global".to_string()),
    ]);
    let policy = OverridePolicy::new(&overrides, false);

    let merged = policy.session_overrides(&params(json!({
        "region": "eu-west-1",
        "target_account_id": "210987654321",
        "Size": 2
    })));

    assert_eq!(merged.len(), 2);
    assert_eq!(merged["region"], "eu-west-1");
    assert_eq!(merged["target_account_id"], "210987654321");
}

#[test]
fn test_session_overrides_respect_prescribed_keys() {
    let overrides = HashMap::from([("region".to_string(), "us-west-2".to_string())]);
    let policy = OverridePolicy::new(&overrides, true);

    let merged = policy.session_overrides(&params(json!({"region": "eu-west-1"})));

    assert_eq!(merged["region"], "us-west-2");
}

#[test]
fn test_param_to_string() {
    assert_eq!(param_to_string(&json!("text")), "text");
    assert_eq!(param_to_string(&json!(1)), "1");
    assert_eq!(param_to_string(&json!(true)), "true");
    assert_eq!(param_to_string(&json!(null)), "");
}
