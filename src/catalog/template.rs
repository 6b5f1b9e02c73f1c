use crate::{
    errors::{BrokerError, Result},
    models::{Plan, PlanParameter, ServiceDefinition, TemplateRef},
};
use serde::Deserialize;
use serde_yaml::Value as YamlValue;
use std::collections::BTreeMap;
use validator::Validate;

const SPECIFICATION_KEY: &str = "AWS::ServiceBroker::Specification";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TemplateDocument {
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    metadata: BTreeMap<String, YamlValue>,
    #[serde(default)]
    parameters: BTreeMap<String, TemplateParameter>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TemplateParameter {
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    default: Option<YamlValue>,
    #[serde(default)]
    allowed_values: Vec<YamlValue>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Specification {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    long_description: Option<String>,
    #[serde(default = "default_bindable")]
    bindable: bool,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    service_plans: BTreeMap<String, PlanSpecification>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PlanSpecification {
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    long_description: Option<String>,
    #[serde(default)]
    cost: Option<String>,
    #[serde(default)]
    parameter_values: BTreeMap<String, YamlValue>,
}

fn default_bindable() -> bool {
    true
}

fn scalar_to_string(value: &YamlValue) -> Option<String> {
    match value {
        YamlValue::String(s) => Some(s.clone()),
        YamlValue::Number(n) => Some(n.to_string()),
        YamlValue::Bool(b) => Some(b.to_string()),
        YamlValue::Tagged(tagged) => scalar_to_string(&tagged.value),
        YamlValue::Null | YamlValue::Sequence(_) | YamlValue::Mapping(_) => None,
    }
}

fn is_free(cost: Option<&str>) -> bool {
    cost.map(|c| c.trim().eq_ignore_ascii_case("free"))
        .unwrap_or(false)
}

/// Parses a template body into the definition advertised for `name`.
///
/// The service id is the template name; a template may not rename itself.
pub fn parse_template(name: &str, body: &str, template: TemplateRef) -> Result<ServiceDefinition> {
    let document: TemplateDocument = serde_yaml::from_str(body)
        .map_err(|err| BrokerError::template_parse(name, err.to_string()))?;

    let specification = document
        .metadata
        .get(SPECIFICATION_KEY)
        .cloned()
        .ok_or_else(|| {
            BrokerError::template_parse(name, format!("missing Metadata.{}", SPECIFICATION_KEY))
        })?;
    let specification: Specification = serde_yaml::from_value(specification)
        .map_err(|err| BrokerError::template_parse(name, err.to_string()))?;

    let plans = specification
        .service_plans
        .into_iter()
        .map(|(plan_key, plan)| {
            let prescribed = plan
                .parameter_values
                .iter()
                .filter_map(|(key, value)| Some((key.clone(), scalar_to_string(value)?)))
                .collect();

            Plan {
                id: plan_key.to_lowercase(),
                name: plan.display_name.unwrap_or_else(|| plan_key.clone()),
                description: plan
                    .description
                    .or(plan.long_description)
                    .unwrap_or_default(),
                free: is_free(plan.cost.as_deref()),
                prescribed,
            }
        })
        .collect();

    let parameters = document
        .parameters
        .into_iter()
        .map(|(param_name, param)| PlanParameter {
            name: param_name,
            description: param.description,
            default: param.default.as_ref().and_then(scalar_to_string),
            allowed_values: param
                .allowed_values
                .iter()
                .filter_map(scalar_to_string)
                .collect(),
        })
        .collect();

    let definition = ServiceDefinition {
        id: name.to_string(),
        name: specification.name.unwrap_or_default(),
        display_name: specification
            .display_name
            .unwrap_or_else(|| name.to_string()),
        description: specification
            .long_description
            .or(document.description)
            .unwrap_or_default(),
        bindable: specification.bindable,
        tags: specification.tags,
        plans,
        parameters,
        template,
    };

    definition
        .validate()
        .map_err(|errors| BrokerError::from_validation(name, &errors))?;

    Ok(definition)
}

#[cfg(test)]
#[path = "template_tests.rs"]
mod tests;
