use super::*;
use crate::models::{InstanceState, ProvisionRequest};

fn instance(id: &str) -> ServiceInstance {
    ServiceInstance::new(
        &ProvisionRequest {
            instance_id: id.into(),
            service_id: "widget".into(),
            plan_id: "small".into(),
            params: Default::default(),
        },
        "stack-1".into(),
    )
}

#[test]
fn test_registry_accessors() {
    let state = BrokerState::new();
    state.put_instance(instance("inst-1"));

    let mut stored = state.instance("inst-1").unwrap();
    stored.transition(InstanceState::Active, None);

    // returned values are copies
    assert_eq!(
        state.instance("inst-1").unwrap().state,
        InstanceState::Provisioning
    );

    state.put_instance(stored);
    assert_eq!(state.instance("inst-1").unwrap().state, InstanceState::Active);
    assert_eq!(state.instance_count(), 1);

    assert!(state.remove_instance("inst-1").is_some());
    assert!(state.instance("inst-1").is_none());
}

#[test]
fn test_second_operation_on_same_id_conflicts() {
    let state = BrokerState::new();
    let _guard = state.begin(&[OperationKey::Instance("inst-1")]).unwrap();

    let err = state
        .begin(&[OperationKey::Instance("inst-1")])
        .unwrap_err();

    assert_eq!(err.kind(), "conflict");
    assert!(err.to_string().contains("instance 'inst-1'"));
}

#[test]
fn test_guard_releases_on_drop() {
    let state = BrokerState::new();
    let key = OperationKey::Instance("inst-1");

    {
        let _guard = state.begin(&[key]).unwrap();
        assert!(state.is_in_flight(&key));
    }

    assert!(!state.is_in_flight(&key));
    assert!(state.begin(&[key]).is_ok());
}

#[test]
fn test_failed_claim_takes_nothing() {
    let state = BrokerState::new();
    let _binding = state.begin(&[OperationKey::Binding("bind-1")]).unwrap();

    let result = state.begin(&[
        OperationKey::Instance("inst-1"),
        OperationKey::Binding("bind-1"),
    ]);

    assert!(result.is_err());
    assert!(!state.is_in_flight(&OperationKey::Instance("inst-1")));
}

#[test]
fn test_instance_and_binding_ids_are_separate() {
    let state = BrokerState::new();
    let _instance = state.begin(&[OperationKey::Instance("same")]).unwrap();

    assert!(state.begin(&[OperationKey::Binding("same")]).is_ok());
}

#[test]
fn test_clones_share_the_arena() {
    let state = BrokerState::new();
    let other = state.clone();
    let _guard = state.begin(&[OperationKey::Instance("inst-1")]).unwrap();

    assert!(other.is_in_flight(&OperationKey::Instance("inst-1")));
}
