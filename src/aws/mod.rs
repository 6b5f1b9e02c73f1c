pub mod clients;
pub mod session;
pub mod stack;

pub use clients::{
    AwsClientFactory, CallerIdentity, ClientFactory, CreateStackRequest, Orchestrator,
    ParameterStore, StackDescription,
};
pub use session::{AwsSessionFactory, CredentialInputs, Session, SessionFactory};
pub use stack::StackStatus;
