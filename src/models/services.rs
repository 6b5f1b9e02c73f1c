use crate::utils;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use validator::Validate;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateRef {
    pub bucket: String,
    pub key: String,
    pub region: String,
}

impl TemplateRef {
    pub fn url(&self) -> String {
        match self.region.as_str() {
            "" | "us-east-1" => format!("https://{}.s3.amazonaws.com/{}", self.bucket, self.key),
            region => format!(
                "https://{}.s3.{}.amazonaws.com/{}",
                self.bucket, region, self.key
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanParameter {
    pub name: String,
    pub description: Option<String>,
    pub default: Option<String>,
    #[serde(default)]
    pub allowed_values: Vec<String>,
}

impl PlanParameter {
    pub fn is_required(&self) -> bool {
        self.default.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct Plan {
    #[validate(length(min = 1, max = 64), regex(path = *utils::regex::PLAN_ID))]
    pub id: String,
    pub name: String,
    pub description: String,
    pub free: bool,
    /// Stack parameter values fixed by the plan. Callers cannot override these.
    #[serde(default)]
    pub prescribed: BTreeMap<String, String>,
}

/// Catalog entry parsed from a template. Replaced wholesale on refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct ServiceDefinition {
    #[validate(length(min = 1, max = 64), regex(path = *utils::regex::SERVICE_ID))]
    pub id: String,
    #[validate(length(min = 1, message = "service name is required"))]
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub bindable: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    #[validate(
        length(min = 1, message = "at least one service plan is required"),
        nested
    )]
    pub plans: Vec<Plan>,
    #[serde(default)]
    pub parameters: Vec<PlanParameter>,
    pub template: TemplateRef,
}

impl ServiceDefinition {
    pub fn plan(&self, plan_id: &str) -> Option<&Plan> {
        self.plans
            .iter()
            .find(|plan| plan.id == plan_id || plan.name.eq_ignore_ascii_case(plan_id))
    }

    pub fn parameter(&self, name: &str) -> Option<&PlanParameter> {
        self.parameters.iter().find(|param| param.name == name)
    }

    /// Template parameters a caller may set for `plan`.
    pub fn open_parameters<'a>(
        &'a self,
        plan: &'a Plan,
        is_hidden: impl Fn(&str) -> bool + 'a,
    ) -> impl Iterator<Item = &'a PlanParameter> + 'a {
        self.parameters.iter().filter(move |param| {
            !plan.prescribed.contains_key(&param.name) && !is_hidden(&param.name)
        })
    }

    pub fn without_parameters(&self, is_hidden: impl Fn(&str) -> bool) -> ServiceDefinition {
        let mut definition = self.clone();
        definition.parameters.retain(|param| !is_hidden(&param.name));
        definition
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceLastUpdate {
    pub name: String,
    pub date: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceNeedsUpdate {
    pub name: String,
    pub update: bool,
}

#[cfg(test)]
#[path = "services_tests.rs"]
mod tests;
