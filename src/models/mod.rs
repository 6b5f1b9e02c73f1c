pub mod broker;
pub mod instances;
pub mod services;

pub use broker::BrokerIdentity;
pub use instances::{
    BindRequest, BindResponse, InstanceState, LastOperation, OperationKind, OperationState, Params,
    ProvisionRequest, ProvisionResponse, ServiceBinding, ServiceInstance,
};
pub use services::{
    Plan, PlanParameter, ServiceDefinition, ServiceLastUpdate, ServiceNeedsUpdate, TemplateRef,
};
