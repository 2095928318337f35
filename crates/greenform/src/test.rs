use std::{collections::BTreeMap, path::PathBuf, sync::Mutex};

use serde_json::json;

use crate::{
    arn::Arn,
    bundle::ThingCertPolicy,
    component::{ComponentDeployment, ComponentList},
    config::StackConfig,
    controller::{AdoptionPolicy, LifecycleController},
    descriptor::*,
    event::{CustomResourceEvent, RequestType},
    lifecycle::LifecycleState,
    local::LocalStore,
    registry::ProviderRegistry,
    store::{RemoteError, ResourceStore},
    Error,
};

const ACCOUNT_PREFIX: &str = "arn:aws:iot:us-west-2:123456789012";

/// An in-memory store that records every call made to it.
#[derive(Default)]
struct RecordingStore {
    calls: Mutex<Vec<String>>,
    records: Mutex<BTreeMap<String, (ResourceFamily, String, ResourceRecord)>>,
    fail_provision: Option<ResourceFamily>,
    fail_describe: bool,
    dependents: Option<String>,
}

impl RecordingStore {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record_call(&self, call: String) {
        log::trace!("store call: {call}");
        self.calls.lock().unwrap().push(call);
    }

    fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }
}

fn resource_type(family: ResourceFamily) -> &'static str {
    match family {
        ResourceFamily::Thing => "thing",
        ResourceFamily::Certificate => "cert",
        ResourceFamily::Policy => "policy",
        ResourceFamily::RoleAlias => "rolealias",
        ResourceFamily::ThingGroup => "thinggroup",
        ResourceFamily::Component => "component",
        ResourceFamily::Deployment => "deployment",
    }
}

impl ResourceStore for RecordingStore {
    async fn describe(
        &self,
        family: ResourceFamily,
        name: &str,
    ) -> Result<Option<ResourceRecord>, RemoteError> {
        self.record_call(format!("describe {family} {name}"));
        if self.fail_describe {
            return Err(RemoteError::Service {
                message: "unreachable".into(),
            });
        }
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .find(|(id, (f, n, _))| *f == family && (id.as_str() == name || n == name))
            .map(|(_, (_, _, record))| record.clone()))
    }

    async fn provision(&self, desired: &ResourceDescriptor) -> Result<ResourceRecord, RemoteError> {
        let family = desired.family();
        let name = desired.desired_name();
        self.record_call(format!("provision {family} {name}"));
        if self.fail_provision == Some(family) {
            return Err(RemoteError::Service {
                message: "throttled".into(),
            });
        }
        let physical_id = match family {
            ResourceFamily::Certificate => format!("cert-{name}"),
            _ => name.clone(),
        };
        let arn = format!("{ACCOUNT_PREFIX}:{}/{physical_id}", resource_type(family))
            .parse()
            .unwrap();
        let record = ResourceRecord::new(&physical_id, arn);
        self.records
            .lock()
            .unwrap()
            .insert(physical_id, (family, name, record.clone()));
        Ok(record)
    }

    async fn modify(
        &self,
        desired: &ResourceDescriptor,
        previous: &ResourceRecord,
    ) -> Result<ResourceRecord, RemoteError> {
        let family = desired.family();
        self.record_call(format!("modify {family} {}", previous.physical_id));
        let mut records = self.records.lock().unwrap();
        let (_, _, record) = records
            .get_mut(&previous.physical_id)
            .ok_or_else(|| RemoteError::NotFound {
                id: previous.physical_id.clone(),
            })?;
        let revision = record.attribute("Revision").unwrap_or("0").parse::<u32>().unwrap();
        record
            .attributes
            .insert("Revision".into(), (revision + 1).to_string());
        Ok(record.clone())
    }

    async fn remove(
        &self,
        family: ResourceFamily,
        previous: &ResourceRecord,
    ) -> Result<(), RemoteError> {
        self.record_call(format!("remove {family} {}", previous.physical_id));
        if let Some(dependents) = &self.dependents {
            return Err(RemoteError::HasDependents {
                id: previous.physical_id.clone(),
                dependents: dependents.clone(),
            });
        }
        match self.records.lock().unwrap().remove(&previous.physical_id) {
            Some(_) => Ok(()),
            None => Err(RemoteError::NotFound {
                id: previous.physical_id.clone(),
            }),
        }
    }
}

fn thing(name: &str) -> ResourceDescriptor {
    ResourceDescriptor::new(
        "test1",
        ResourceSpec::Thing(ThingSpec {
            thing_name: name.into(),
            attributes: BTreeMap::new(),
        }),
    )
}

fn thing_with_attribute(name: &str, key: &str, value: &str) -> ResourceDescriptor {
    let mut attributes = BTreeMap::new();
    attributes.insert(key.to_owned(), value.to_owned());
    ResourceDescriptor::new(
        "test1",
        ResourceSpec::Thing(ThingSpec {
            thing_name: name.into(),
            attributes,
        }),
    )
}

fn controller(store: RecordingStore) -> LifecycleController<RecordingStore> {
    LifecycleController::new(ResourceFamily::Thing, std::sync::Arc::new(store))
}

fn test_config() -> StackConfig {
    StackConfig {
        stack_name: "test1".into(),
        region: "us-west-2".into(),
        account: "123456789012".into(),
        partition: "aws".into(),
    }
}

/// A fresh, empty directory for a local store.
fn test_store_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("greenform-{name}-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    dir
}

fn properties(desc: &ResourceDescriptor) -> serde_json::Map<String, serde_json::Value> {
    desc.to_properties().unwrap()
}

#[tokio::test]
async fn unchanged_update_makes_no_store_calls() {
    let _ = env_logger::builder().is_test(true).try_init();

    let controller = controller(RecordingStore::default());
    let desc = thing("core-1");
    let record = controller.create(&desc).await.unwrap();
    let calls_after_create = controller_calls(&controller);
    assert_eq!(
        vec!["describe thing core-1", "provision thing core-1"],
        calls_after_create
    );

    let updated = controller.update(&desc, &desc, &record).await.unwrap();
    assert_eq!(record, updated);
    assert_eq!(calls_after_create, controller_calls(&controller));
}

fn controller_calls(controller: &LifecycleController<RecordingStore>) -> Vec<String> {
    controller.store().calls()
}

#[tokio::test]
async fn deleting_a_missing_resource_succeeds() {
    let _ = env_logger::builder().is_test(true).try_init();

    let controller = controller(RecordingStore::default());
    let record = ResourceRecord::new(
        "ghost",
        format!("{ACCOUNT_PREFIX}:thing/ghost").parse().unwrap(),
    );
    controller.delete(&record).await.unwrap();
    assert_eq!(vec!["remove thing ghost"], controller_calls(&controller));
}

#[tokio::test]
async fn replacement_provisions_before_removing() {
    let _ = env_logger::builder().is_test(true).try_init();

    let controller = controller(RecordingStore::default());
    let previous = thing("core-a");
    let record = controller.create(&previous).await.unwrap();

    let desired = thing("core-b");
    let replacement = controller.update(&desired, &previous, &record).await.unwrap();
    assert_eq!("core-b", replacement.physical_id);
    assert_eq!(
        vec![
            "describe thing core-a",
            "provision thing core-a",
            "describe thing core-b",
            "provision thing core-b",
            "remove thing core-a",
        ],
        controller_calls(&controller)
    );
    assert_eq!(1, controller.store().len());
}

#[tokio::test]
async fn replacement_tolerates_previous_already_gone() {
    let _ = env_logger::builder().is_test(true).try_init();

    let controller = controller(RecordingStore::default());
    let previous = thing("core-a");
    let record = ResourceRecord::new(
        "core-a",
        format!("{ACCOUNT_PREFIX}:thing/core-a").parse().unwrap(),
    );
    let replacement = controller
        .update(&thing("core-b"), &previous, &record)
        .await
        .unwrap();
    assert_eq!("core-b", replacement.physical_id);
}

#[tokio::test]
async fn replacement_cleanup_failure_carries_new_record() {
    let _ = env_logger::builder().is_test(true).try_init();

    let controller = controller(RecordingStore {
        dependents: Some("certificate 'cert-core-a'".into()),
        ..Default::default()
    });
    let previous = thing("core-a");
    let record = controller.create(&previous).await.unwrap();
    let err = controller
        .update(&thing("core-b"), &previous, &record)
        .await
        .unwrap_err();
    match err {
        Error::ReplacementCleanup { record, .. } => assert_eq!("core-b", record.physical_id),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn in_place_update_modifies() {
    let _ = env_logger::builder().is_test(true).try_init();

    let controller = controller(RecordingStore::default());
    let previous = thing("core-1");
    let record = controller.create(&previous).await.unwrap();
    let desired = thing_with_attribute("core-1", "site", "lab");
    let updated = controller.update(&desired, &previous, &record).await.unwrap();
    assert_eq!(Some("1"), updated.attribute("Revision"));
    assert_eq!(
        Some(&"modify thing core-1".to_string()),
        controller_calls(&controller).last()
    );
}

#[tokio::test]
async fn existing_name_fails_or_adopts() {
    let _ = env_logger::builder().is_test(true).try_init();

    let store = std::sync::Arc::new(RecordingStore::default());
    let strict = LifecycleController::new(ResourceFamily::Thing, store.clone());
    let desc = thing("core-1");
    let record = strict.create(&desc).await.unwrap();
    assert!(matches!(
        strict.create(&desc).await,
        Err(Error::AlreadyExists {
            family: ResourceFamily::Thing,
            ..
        })
    ));

    let adopting = LifecycleController::new(ResourceFamily::Thing, store.clone())
        .with_adoption(AdoptionPolicy::Adopt);
    assert_eq!(record, adopting.create(&desc).await.unwrap());
    let provisions = store
        .calls()
        .into_iter()
        .filter(|call| call.starts_with("provision"))
        .count();
    assert_eq!(1, provisions);
}

#[tokio::test]
async fn delete_with_dependents_is_refused() {
    let _ = env_logger::builder().is_test(true).try_init();

    let controller = controller(RecordingStore {
        dependents: Some("thing-group 'group-1'".into()),
        ..Default::default()
    });
    let record = controller.create(&thing("core-1")).await.unwrap();
    let err = controller.delete(&record).await.unwrap_err();
    assert!(
        matches!(&err, Error::DependencyExists { dependents, .. } if dependents.contains("group-1")),
        "{err}"
    );
}

#[tokio::test]
async fn remote_failure_names_the_failed_state() {
    let _ = env_logger::builder().is_test(true).try_init();

    let controller = controller(RecordingStore {
        fail_provision: Some(ResourceFamily::Thing),
        ..Default::default()
    });
    let err = controller.create(&thing("core-1")).await.unwrap_err();
    match &err {
        Error::RemoteOperationFailed {
            family,
            name,
            state,
            source,
        } => {
            assert_eq!(ResourceFamily::Thing, *family);
            assert_eq!("core-1", name);
            assert_eq!(LifecycleState::CreateFailed, *state);
            assert!(matches!(source, RemoteError::Service { .. }));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn lookup_failure_reports_nothing_known() {
    let _ = env_logger::builder().is_test(true).try_init();

    let controller = controller(RecordingStore {
        fail_describe: true,
        ..Default::default()
    });
    let err = controller.lookup("core-1").await.unwrap_err();
    assert!(
        matches!(
            &err,
            Error::RemoteOperationFailed {
                state: LifecycleState::NotExists,
                source: RemoteError::Service { .. },
                ..
            }
        ),
        "{err}"
    );
}

#[tokio::test]
async fn adopting_replacement_removes_the_previous_resource() {
    let _ = env_logger::builder().is_test(true).try_init();

    let store = std::sync::Arc::new(RecordingStore::default());
    let controller = LifecycleController::new(ResourceFamily::Thing, store.clone())
        .with_adoption(AdoptionPolicy::Adopt);
    let old = controller.create(&thing("old-1")).await.unwrap();
    let new = controller.create(&thing("new-1")).await.unwrap();

    let adopted = controller
        .update(&thing("new-1"), &thing("old-1"), &old)
        .await
        .unwrap();
    assert_eq!(new, adopted);
    assert_eq!(
        Some(&"remove thing old-1".to_string()),
        store.calls().last()
    );
    assert_eq!(1, store.len());
    assert!(controller.lookup("old-1").await.unwrap().is_none());
}

fn component(recipe: serde_json::Value) -> ResourceDescriptor {
    ResourceDescriptor::new(
        "test1",
        ResourceSpec::Component(ComponentSpec {
            component_name: "ggAccel.example.HelloWorld".into(),
            component_version: "1.0.0".into(),
            recipe,
            target_bucket: None,
            artifact_key_name: None,
        }),
    )
}

#[tokio::test]
async fn component_version_is_never_removed_before_its_replacement() {
    let _ = env_logger::builder().is_test(true).try_init();

    let store = std::sync::Arc::new(RecordingStore {
        fail_provision: Some(ResourceFamily::Component),
        ..Default::default()
    });
    let id = "ggAccel.example.HelloWorld:1.0.0";
    let record = ResourceRecord::new(
        id,
        format!("{ACCOUNT_PREFIX}:component/{id}").parse().unwrap(),
    );
    store.records.lock().unwrap().insert(
        id.to_owned(),
        (ResourceFamily::Component, id.to_owned(), record.clone()),
    );

    let components = LifecycleController::new(ResourceFamily::Component, store.clone());
    let previous = component(json!({"ComponentName": "COMPONENT_NAME"}));
    let desired = component(json!({"ComponentName": "COMPONENT_NAME", "Lifecycle": {}}));
    let err = components
        .update(&desired, &previous, &record)
        .await
        .unwrap_err();
    assert!(
        matches!(
            &err,
            Error::AlreadyExists {
                family: ResourceFamily::Component,
                ..
            }
        ),
        "{err}"
    );
    assert_eq!(vec![format!("describe component {id}")], store.calls());
    assert_eq!(Some(record), components.lookup(id).await.unwrap());
}

#[tokio::test]
async fn validation_precedes_store_calls() {
    let _ = env_logger::builder().is_test(true).try_init();

    let controller = controller(RecordingStore::default());
    assert!(matches!(
        controller.create(&thing("not a thing name")).await,
        Err(Error::NamingConstraint { .. })
    ));

    let policy = ResourceDescriptor::new(
        "test1",
        ResourceSpec::Policy(PolicySpec {
            policy_name: "p".into(),
            document: "{}".into(),
            certificate_arn: None,
        }),
    );
    assert!(matches!(
        controller.create(&policy).await,
        Err(Error::FamilyMismatch {
            expected: ResourceFamily::Thing,
            found: ResourceFamily::Policy,
        })
    ));
    assert!(controller_calls(&controller).is_empty());
}

#[test]
fn registry_creates_each_controller_once() {
    let mut registry = ProviderRegistry::new(RecordingStore::default());
    assert!(registry.is_empty());
    let a = registry.controller(ResourceFamily::Thing);
    let b = registry.controller(ResourceFamily::Thing);
    assert!(std::sync::Arc::ptr_eq(&a, &b));
    assert_eq!(1, registry.len());
    let c = registry.controller(ResourceFamily::Policy);
    assert!(!std::sync::Arc::ptr_eq(&a, &c));
    assert_eq!(2, registry.len());
}

const POLICY_TEMPLATE: &str = r#"{
  "Version": "2012-10-17",
  "Statement": [
    {
      "Effect": "Allow",
      "Action": ["iot:Connect"],
      "Resource": "arn:aws:iot:<% region %>:<% account %>:client/<% thingname %>"
    }
  ]
}"#;

fn bundle() -> ThingCertPolicy {
    let mut parameters = BTreeMap::new();
    parameters.insert("region".to_owned(), "us-west-2".to_owned());
    parameters.insert("account".to_owned(), "123456789012".to_owned());
    ThingCertPolicy {
        thing_name: "test-thing".into(),
        policy_name: "test-thing-policy".into(),
        policy_template: POLICY_TEMPLATE.into(),
        parameters,
    }
}

#[tokio::test]
async fn bundle_provisions_in_dependency_order() {
    let _ = env_logger::builder().is_test(true).try_init();

    let dir = test_store_dir("bundle");
    let mut registry = ProviderRegistry::new(LocalStore::new(&dir, &test_config()));
    let output = bundle().provision(&mut registry, "test1").await.unwrap();

    let thing_arn = output.thing_arn.to_string();
    assert_eq!(format!("{ACCOUNT_PREFIX}:thing/test-thing"), thing_arn);
    output.thing_arn.expect_kind("iot", &["thing"]).unwrap();
    output.certificate_arn.expect_kind("iot", &["cert"]).unwrap();
    assert_eq!(64, output.certificate_arn.resource_id().len());
    assert_eq!(
        format!("{ACCOUNT_PREFIX}:policy/test-thing-policy"),
        output.iot_policy_arn.to_string()
    );
    assert_eq!(
        Some("/test1/test-thing/certificate_pem"),
        output.certificate_pem_parameter.as_deref()
    );
    assert_eq!(
        Some("/test1/test-thing/private_key"),
        output.private_key_secret_parameter.as_deref()
    );

    // the thing cannot go while its certificate still refers to it
    let things = registry.controller(ResourceFamily::Thing);
    assert!(matches!(
        things.delete(&output.thing).await,
        Err(Error::DependencyExists { .. })
    ));

    ThingCertPolicy::destroy(&mut registry, &output).await.unwrap();
    assert!(registry.store().records().await.unwrap().is_empty());
    std::fs::remove_dir_all(&dir).unwrap();
}

#[tokio::test]
async fn bundle_rolls_back_on_policy_failure() {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut registry = ProviderRegistry::new(RecordingStore {
        fail_provision: Some(ResourceFamily::Policy),
        ..Default::default()
    });
    let err = bundle().provision(&mut registry, "test1").await.unwrap_err();
    assert!(matches!(
        err,
        Error::RemoteOperationFailed {
            family: ResourceFamily::Policy,
            ..
        }
    ));
    assert_eq!(
        vec![
            "describe thing test-thing",
            "provision thing test-thing",
            "provision certificate test-thing",
            "describe policy test-thing-policy",
            "provision policy test-thing-policy",
            "remove certificate cert-test-thing",
            "remove thing test-thing",
        ],
        registry.store().calls()
    );
    assert_eq!(0, registry.store().len());
}

#[tokio::test]
async fn bundle_with_missing_parameter_never_reaches_the_store() {
    let mut registry = ProviderRegistry::new(RecordingStore::default());
    let mut bundle = bundle();
    bundle.parameters.remove("account");
    assert!(matches!(
        bundle.provision(&mut registry, "test1").await,
        Err(Error::MissingParameter { name }) if name == "account"
    ));
    assert!(registry.store().calls().is_empty());
}

#[tokio::test]
async fn events_round_trip_through_local_store() {
    let _ = env_logger::builder().is_test(true).try_init();

    let dir = test_store_dir("events");
    let mut registry = ProviderRegistry::new(LocalStore::new(&dir, &test_config()));
    let things = registry.controller(ResourceFamily::Thing);

    let v1 = thing("core-1");
    let created = things
        .handle(&CustomResourceEvent::create("GreengrassCore", properties(&v1)))
        .await
        .unwrap();
    assert_eq!("core-1", created.physical_resource_id);
    assert_eq!(
        Some(&format!("{ACCOUNT_PREFIX}:thing/core-1")),
        created.data.get(attribute::THING_ARN)
    );

    // same properties again: nothing changes
    let same = things
        .handle(&CustomResourceEvent::update(
            "GreengrassCore",
            &created.physical_resource_id,
            properties(&v1),
            properties(&v1),
        ))
        .await
        .unwrap();
    assert_eq!(created, same);

    // a new name replaces the thing
    let v2 = thing("core-2");
    let replaced = things
        .handle(&CustomResourceEvent::update(
            "GreengrassCore",
            &created.physical_resource_id,
            properties(&v2),
            properties(&v1),
        ))
        .await
        .unwrap();
    assert_eq!("core-2", replaced.physical_resource_id);
    assert!(things.lookup("core-1").await.unwrap().is_none());

    let delete = CustomResourceEvent::delete("GreengrassCore", "core-2", properties(&v2));
    assert_eq!(RequestType::Delete, delete.request_type);
    let deleted = things.handle(&delete).await.unwrap();
    assert_eq!("core-2", deleted.physical_resource_id);
    // deleting again is still a success
    let deleted = things.handle(&delete).await.unwrap();
    assert_eq!("core-2", deleted.physical_resource_id);

    std::fs::remove_dir_all(&dir).unwrap();
}

#[tokio::test]
async fn things_differing_only_in_punctuation_are_kept_apart() {
    let _ = env_logger::builder().is_test(true).try_init();

    let dir = test_store_dir("punctuation");
    let mut registry = ProviderRegistry::new(LocalStore::new(&dir, &test_config()));
    let things = registry.controller(ResourceFamily::Thing);
    things.create(&thing("core:1")).await.unwrap();
    things.create(&thing("core_1")).await.unwrap();

    for name in ["core:1", "core_1"] {
        let record = things.lookup(name).await.unwrap();
        assert_eq!(Some(name), record.as_ref().map(|r| r.physical_id.as_str()));
    }
    assert_eq!(2, registry.store().records().await.unwrap().len());
    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn local_store_checks_dependencies() {
    let _ = env_logger::builder().is_test(true).try_init();

    let dir = test_store_dir("dependencies");
    let mut registry = ProviderRegistry::new(LocalStore::new(&dir, &test_config()));
    let certs = registry.controller(ResourceFamily::Certificate);
    let cert = ResourceDescriptor::new(
        "test1",
        ResourceSpec::Certificate(CertificateSpec {
            thing_name: "nobody".into(),
            thing_arn: format!("{ACCOUNT_PREFIX}:thing/nobody").parse().unwrap(),
        }),
    );
    let err = certs.create(&cert).await.unwrap_err();
    assert!(
        matches!(
            &err,
            Error::RemoteOperationFailed {
                source: RemoteError::MissingDependency { .. },
                ..
            }
        ),
        "{err}"
    );
    assert!(registry.store().records().await.unwrap().is_empty());
    let _ = std::fs::remove_dir_all(&dir);
}

fn deployment(target: &Arn, components: ComponentList) -> ResourceDescriptor {
    ResourceDescriptor::new(
        "test1",
        ResourceSpec::Deployment(DeploymentSpec {
            target_arn: target.clone(),
            deployment_name: "test1-deployment".into(),
            components,
            deployment_policies: Some(json!({
                "failureHandlingPolicy": "ROLLBACK",
                "componentUpdatePolicy": {"timeoutInSeconds": 60, "action": "NOTIFY_COMPONENTS"}
            })),
            iot_job_configuration: None,
        }),
    )
}

#[tokio::test]
async fn deployment_revises_in_place_and_replaces_on_new_target() {
    let _ = env_logger::builder().is_test(true).try_init();

    let dir = test_store_dir("deployment");
    let mut registry = ProviderRegistry::new(LocalStore::new(&dir, &test_config()));

    let core = registry
        .controller(ResourceFamily::Thing)
        .create(&thing("core-1"))
        .await
        .unwrap();
    let group = registry
        .controller(ResourceFamily::ThingGroup)
        .create(&ResourceDescriptor::new(
            "test1",
            ResourceSpec::ThingGroup(ThingGroupSpec {
                thing_arns: vec![core.arn.clone()],
                ..ThingGroupSpec::new("test1-group")
            }),
        ))
        .await
        .unwrap();
    assert_eq!(
        Some("test1-group"),
        group.attribute(attribute::THING_GROUP_NAME)
    );

    let deployments = registry.controller(ResourceFamily::Deployment);
    let nucleus = ComponentList::new()
        .add_component("aws.greengrass.Nucleus", ComponentDeployment::new("2.10.3"))
        .unwrap();
    let v1 = deployment(&group.arn, nucleus.clone());
    let first = deployments.create(&v1).await.unwrap();
    assert_eq!(Some("1"), first.attribute(attribute::REVISION));
    first.arn.expect_kind("greengrass", &["deployments"]).unwrap();

    let v2 = deployment(
        &group.arn,
        nucleus
            .add_component("aws.greengrass.Cli", ComponentDeployment::new("2.10.3"))
            .unwrap(),
    );
    let revised = deployments.update(&v2, &v1, &first).await.unwrap();
    assert_eq!(first.physical_id, revised.physical_id);
    assert_eq!(Some("2"), revised.attribute(attribute::REVISION));
    assert_ne!(
        first.attribute(attribute::IOT_JOB_ID),
        revised.attribute(attribute::IOT_JOB_ID)
    );

    // the group cannot go while a deployment targets it
    assert!(matches!(
        registry
            .controller(ResourceFamily::ThingGroup)
            .delete(&group)
            .await,
        Err(Error::DependencyExists { .. })
    ));

    let v3 = deployment(&core.arn, v2_components(&v2));
    let moved = deployments.update(&v3, &v2, &revised).await.unwrap();
    assert_ne!(revised.physical_id, moved.physical_id);
    assert!(deployments.lookup(&revised.physical_id).await.unwrap().is_none());

    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn delete_of_a_replaced_deployment_keeps_the_replacement() {
    let _ = env_logger::builder().is_test(true).try_init();

    let dir = test_store_dir("replaced-delete");
    let mut registry = ProviderRegistry::new(LocalStore::new(&dir, &test_config()));
    let core = registry
        .controller(ResourceFamily::Thing)
        .create(&thing("core-1"))
        .await
        .unwrap();
    let group = registry
        .controller(ResourceFamily::ThingGroup)
        .create(&ResourceDescriptor::new(
            "test1",
            ResourceSpec::ThingGroup(ThingGroupSpec {
                thing_arns: vec![core.arn.clone()],
                ..ThingGroupSpec::new("test1-group")
            }),
        ))
        .await
        .unwrap();

    let deployments = registry.controller(ResourceFamily::Deployment);
    let components = ComponentList::new()
        .add_component("aws.greengrass.Nucleus", ComponentDeployment::new("2.10.3"))
        .unwrap();
    let v1 = deployment(&group.arn, components.clone());
    let v2 = deployment(&core.arn, components);

    let created = deployments
        .handle(&CustomResourceEvent::create("Deployment", properties(&v1)))
        .await
        .unwrap();
    let replaced = deployments
        .handle(&CustomResourceEvent::update(
            "Deployment",
            &created.physical_resource_id,
            properties(&v2),
            properties(&v1),
        ))
        .await
        .unwrap();
    assert_ne!(created.physical_resource_id, replaced.physical_resource_id);

    // the stack cleans up the replaced resource by its old id
    let deleted = deployments
        .handle(&CustomResourceEvent::delete(
            "Deployment",
            &created.physical_resource_id,
            properties(&v1),
        ))
        .await
        .unwrap();
    assert_eq!(created.physical_resource_id, deleted.physical_resource_id);
    let survivor = deployments
        .lookup(&replaced.physical_resource_id)
        .await
        .unwrap();
    assert_eq!(
        Some(replaced.physical_resource_id.as_str()),
        survivor.as_ref().map(|r| r.physical_id.as_str())
    );

    let _ = std::fs::remove_dir_all(&dir);
}

fn v2_components(desc: &ResourceDescriptor) -> ComponentList {
    match desc.spec() {
        ResourceSpec::Deployment(spec) => spec.components.clone(),
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn component_recipe_is_stored_rendered() {
    let _ = env_logger::builder().is_test(true).try_init();

    let dir = test_store_dir("component");
    let store = LocalStore::new(&dir, &test_config());
    let component = ResourceDescriptor::new(
        "test1",
        ResourceSpec::Component(ComponentSpec {
            component_name: "ggAccel.example.HelloWorld".into(),
            component_version: "1.0.0".into(),
            recipe: json!({
                "RecipeFormatVersion": "2020-01-25",
                "ComponentName": "COMPONENT_NAME",
                "ComponentVersion": "COMPONENT_VERSION",
                "Manifests": [{"Artifacts": [{"URI": "s3://COMPONENT_BUCKET/ARTIFACT_KEY_NAME"}]}]
            }),
            target_bucket: Some("test1-components".into()),
            artifact_key_name: Some("hello_world.zip".into()),
        }),
    );
    let record = store.provision(&component).await.unwrap();
    assert_eq!(
        "arn:aws:greengrass:us-west-2:123456789012:components:ggAccel.example.HelloWorld:versions:1.0.0",
        record.physical_id
    );
    let recipe: serde_json::Value =
        serde_json::from_str(record.attribute(attribute::RECIPE).unwrap()).unwrap();
    assert_eq!("ggAccel.example.HelloWorld", recipe["ComponentName"]);
    assert_eq!(
        "s3://test1-components/hello_world.zip",
        recipe["Manifests"][0]["Artifacts"][0]["URI"]
    );

    // same name and version again is a conflict
    assert!(matches!(
        store.provision(&component).await,
        Err(RemoteError::AlreadyExists { .. })
    ));
    assert_eq!(
        Some(record.clone()),
        store
            .describe(ResourceFamily::Component, "ggAccel.example.HelloWorld:1.0.0")
            .await
            .unwrap()
    );
    store.remove(ResourceFamily::Component, &record).await.unwrap();
    assert!(matches!(
        store.remove(ResourceFamily::Component, &record).await,
        Err(RemoteError::NotFound { .. })
    ));
    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn policy_update_bumps_default_version() {
    let _ = env_logger::builder().is_test(true).try_init();

    let dir = test_store_dir("policy");
    let mut registry = ProviderRegistry::new(LocalStore::new(&dir, &test_config()));
    let policies = registry.controller(ResourceFamily::Policy);
    let policy = |document: &str| {
        ResourceDescriptor::new(
            "test1",
            ResourceSpec::Policy(PolicySpec {
                policy_name: "test1-policy".into(),
                document: document.into(),
                certificate_arn: None,
            }),
        )
    };
    let v1 = policy(r#"{"Version": "2012-10-17", "Statement": []}"#);
    let v2 = policy(r#"{"Version": "2012-10-17", "Statement": [{"Effect": "Allow", "Action": "iot:Connect", "Resource": "*"}]}"#);
    let first = policies.create(&v1).await.unwrap();
    assert_eq!(Some("1"), first.attribute(attribute::DEFAULT_VERSION_ID));
    let second = policies.update(&v2, &v1, &first).await.unwrap();
    assert_eq!(first.physical_id, second.physical_id);
    assert_eq!(Some("2"), second.attribute(attribute::DEFAULT_VERSION_ID));
    let _ = std::fs::remove_dir_all(&dir);
}
