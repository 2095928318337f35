//! Desired-state descriptors and the records a store keeps for them.
//!
//! A [`ResourceDescriptor`] is the typed desired state of one resource.
//! Conversion to and from the untyped custom-resource property map
//! happens only through [`ResourceDescriptor::to_properties`] and
//! [`ResourceDescriptor::from_properties`].
use std::collections::{BTreeMap, BTreeSet};

use serde_json::{Map, Value};
use snafu::prelude::*;

use crate::{
    arn::Arn, component::ComponentList, naming::CharClass, Dependencies, EmptyDeploymentSnafu,
    Error, HasDependencies, InvalidPolicyDocumentSnafu, InvalidPropertySnafu,
    MissingPropertySnafu, NamingConstraintSnafu,
};

/// Property key carrying the owning stack's name.
pub const STACK_NAME: &str = "StackName";

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub enum ResourceFamily {
    Thing,
    Certificate,
    Policy,
    RoleAlias,
    ThingGroup,
    Component,
    Deployment,
}

impl core::fmt::Display for ResourceFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ResourceFamily {
    pub const ALL: [ResourceFamily; 7] = [
        ResourceFamily::Thing,
        ResourceFamily::Certificate,
        ResourceFamily::Policy,
        ResourceFamily::RoleAlias,
        ResourceFamily::ThingGroup,
        ResourceFamily::Component,
        ResourceFamily::Deployment,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceFamily::Thing => "thing",
            ResourceFamily::Certificate => "certificate",
            ResourceFamily::Policy => "policy",
            ResourceFamily::RoleAlias => "role-alias",
            ResourceFamily::ThingGroup => "thing-group",
            ResourceFamily::Component => "component",
            ResourceFamily::Deployment => "deployment",
        }
    }

    /// Whether two resources of this family may share a desired name.
    ///
    /// Certificates are named after their thing and deployments may be
    /// revised any number of times, so neither is unique by name.
    pub fn unique_names(&self) -> bool {
        !matches!(self, ResourceFamily::Certificate | ResourceFamily::Deployment)
    }

    /// Property keys that must be present to build a descriptor.
    pub fn required_properties(&self) -> &'static [&'static str] {
        match self {
            ResourceFamily::Thing => &["ThingName"],
            ResourceFamily::Certificate => &["ThingName", "ThingArn"],
            ResourceFamily::Policy => &["IoTPolicyName", "IotPolicy"],
            ResourceFamily::RoleAlias => &["IotRoleAliasName", "IamRoleArn"],
            ResourceFamily::ThingGroup => &["ThingGroupName"],
            ResourceFamily::Component => &["ComponentName", "ComponentVersion", "Recipe"],
            ResourceFamily::Deployment => &["TargetArn", "DeploymentName", "Components"],
        }
    }
}

/// Record attribute keys.
pub mod attribute {
    pub const THING_ARN: &str = "ThingArn";
    pub const THING_NAME: &str = "ThingName";
    pub const CERTIFICATE_ARN: &str = "CertificateArn";
    pub const CERTIFICATE_ID: &str = "CertificateId";
    pub const CERTIFICATE_PEM_PARAMETER: &str = "CertificatePemParameter";
    pub const PRIVATE_KEY_SECRET_PARAMETER: &str = "PrivateKeySecretParameter";
    pub const IOT_POLICY_ARN: &str = "IotPolicyArn";
    pub const DEFAULT_VERSION_ID: &str = "DefaultVersionId";
    pub const ROLE_ALIAS_ARN: &str = "RoleAliasArn";
    pub const ROLE_ALIAS_NAME: &str = "RoleAliasName";
    pub const THING_GROUP_NAME: &str = "ThingGroupName";
    pub const THING_GROUP_ARN: &str = "ThingGroupArn";
    pub const THING_GROUP_ID: &str = "ThingGroupId";
    pub const COMPONENT_ARN: &str = "ComponentArn";
    pub const RECIPE: &str = "Recipe";
    pub const DEPLOYMENT_ID: &str = "DeploymentId";
    pub const IOT_JOB_ID: &str = "IotJobId";
    pub const IOT_JOB_ARN: &str = "IotJobArn";
    pub const REVISION: &str = "Revision";
}

fn default_thing_group_description() -> String {
    "CloudFormation generated group".to_owned()
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize, crate::HasDependencies)]
#[serde(rename_all = "PascalCase")]
pub struct ThingSpec {
    pub thing_name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

/// A certificate and private key for a thing. The certificate is
/// attached to the thing as its principal.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize, crate::HasDependencies)]
#[serde(rename_all = "PascalCase")]
pub struct CertificateSpec {
    pub thing_name: String,
    pub thing_arn: Arn,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize, crate::HasDependencies)]
pub struct PolicySpec {
    #[serde(rename = "IoTPolicyName")]
    pub policy_name: String,
    /// Rendered JSON policy document.
    #[serde(rename = "IotPolicy")]
    pub document: String,
    /// Certificate the policy is attached to.
    #[serde(
        rename = "CertificateArn",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub certificate_arn: Option<Arn>,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize, crate::HasDependencies)]
pub struct RoleAliasSpec {
    #[serde(rename = "IotRoleAliasName")]
    pub role_alias_name: String,
    #[serde(rename = "IamRoleArn")]
    pub iam_role_arn: Arn,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize, crate::HasDependencies)]
pub struct ThingGroupSpec {
    #[serde(rename = "ThingGroupName")]
    pub thing_group_name: String,
    #[serde(
        rename = "ThingGroupDescription",
        default = "default_thing_group_description"
    )]
    pub description: String,
    /// Things added to the group.
    #[serde(rename = "ThingArnList", default)]
    pub thing_arns: Vec<Arn>,
}

impl ThingGroupSpec {
    pub fn new(thing_group_name: impl Into<String>) -> Self {
        Self {
            thing_group_name: thing_group_name.into(),
            description: default_thing_group_description(),
            thing_arns: vec![],
        }
    }
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize, crate::HasDependencies)]
#[serde(rename_all = "PascalCase")]
pub struct ComponentSpec {
    pub component_name: String,
    pub component_version: String,
    /// Recipe document, which may reference `COMPONENT_NAME`,
    /// `COMPONENT_VERSION`, `COMPONENT_BUCKET` and `ARTIFACT_KEY_NAME`.
    pub recipe: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_bucket: Option<String>,
    #[serde(
        rename = "TargetArtifactKeyName",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub artifact_key_name: Option<String>,
}

fn replace_in(value: &Value, from: &str, to: &str) -> Value {
    match value {
        Value::String(s) => Value::String(s.replace(from, to)),
        Value::Array(items) => Value::Array(items.iter().map(|v| replace_in(v, from, to)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), replace_in(v, from, to)))
                .collect(),
        ),
        other => other.clone(),
    }
}

impl ComponentSpec {
    /// The recipe with its variables substituted.
    ///
    /// Bucket and artifact variables are only replaced when a value was
    /// given.
    pub fn rendered_recipe(&self) -> Value {
        let mut recipe = replace_in(&self.recipe, "COMPONENT_NAME", &self.component_name);
        recipe = replace_in(&recipe, "COMPONENT_VERSION", &self.component_version);
        if let Some(bucket) = &self.target_bucket {
            recipe = replace_in(&recipe, "COMPONENT_BUCKET", bucket);
        }
        if let Some(key) = &self.artifact_key_name {
            recipe = replace_in(&recipe, "ARTIFACT_KEY_NAME", key);
        }
        recipe
    }
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize, crate::HasDependencies)]
#[serde(rename_all = "PascalCase")]
pub struct DeploymentSpec {
    /// A thing or thing group.
    pub target_arn: Arn,
    pub deployment_name: String,
    pub components: ComponentList,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_policies: Option<Value>,
    #[serde(
        rename = "IotJobExecution",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub iot_job_configuration: Option<Value>,
}

/// Typed desired state, one variant per resource family.
#[derive(Clone, Debug, PartialEq)]
pub enum ResourceSpec {
    Thing(ThingSpec),
    Certificate(CertificateSpec),
    Policy(PolicySpec),
    RoleAlias(RoleAliasSpec),
    ThingGroup(ThingGroupSpec),
    Component(ComponentSpec),
    Deployment(DeploymentSpec),
}

impl HasDependencies for ResourceSpec {
    fn dependencies(&self) -> Dependencies {
        match self {
            ResourceSpec::Thing(s) => s.dependencies(),
            ResourceSpec::Certificate(s) => s.dependencies(),
            ResourceSpec::Policy(s) => s.dependencies(),
            ResourceSpec::RoleAlias(s) => s.dependencies(),
            ResourceSpec::ThingGroup(s) => s.dependencies(),
            ResourceSpec::Component(s) => s.dependencies(),
            ResourceSpec::Deployment(s) => s.dependencies(),
        }
    }
}

fn check_document(name: &str, document: &str) -> Result<(), Error> {
    serde_json::from_str::<Value>(document).context(InvalidPolicyDocumentSnafu { name })?;
    Ok(())
}

impl ResourceSpec {
    pub fn family(&self) -> ResourceFamily {
        match self {
            ResourceSpec::Thing(_) => ResourceFamily::Thing,
            ResourceSpec::Certificate(_) => ResourceFamily::Certificate,
            ResourceSpec::Policy(_) => ResourceFamily::Policy,
            ResourceSpec::RoleAlias(_) => ResourceFamily::RoleAlias,
            ResourceSpec::ThingGroup(_) => ResourceFamily::ThingGroup,
            ResourceSpec::Component(_) => ResourceFamily::Component,
            ResourceSpec::Deployment(_) => ResourceFamily::Deployment,
        }
    }

    /// The name the resource is known by in the store.
    pub fn desired_name(&self) -> String {
        match self {
            ResourceSpec::Thing(s) => s.thing_name.clone(),
            ResourceSpec::Certificate(s) => s.thing_name.clone(),
            ResourceSpec::Policy(s) => s.policy_name.clone(),
            ResourceSpec::RoleAlias(s) => s.role_alias_name.clone(),
            ResourceSpec::ThingGroup(s) => s.thing_group_name.clone(),
            ResourceSpec::Component(s) => format!("{}:{}", s.component_name, s.component_version),
            ResourceSpec::Deployment(s) => s.deployment_name.clone(),
        }
    }

    /// Whether moving from `previous` to `self` needs a new resource
    /// rather than an in-place modification.
    pub fn requires_replacement(&self, previous: &ResourceSpec) -> bool {
        match (self, previous) {
            (ResourceSpec::Thing(a), ResourceSpec::Thing(b)) => a.thing_name != b.thing_name,
            (ResourceSpec::Policy(a), ResourceSpec::Policy(b)) => a.policy_name != b.policy_name,
            (ResourceSpec::RoleAlias(a), ResourceSpec::RoleAlias(b)) => {
                a.role_alias_name != b.role_alias_name
            }
            (ResourceSpec::ThingGroup(a), ResourceSpec::ThingGroup(b)) => {
                a.thing_group_name != b.thing_group_name
            }
            // certificates and component versions are immutable
            (ResourceSpec::Certificate(a), ResourceSpec::Certificate(b)) => a != b,
            (ResourceSpec::Component(a), ResourceSpec::Component(b)) => a != b,
            (ResourceSpec::Deployment(a), ResourceSpec::Deployment(b)) => {
                a.target_arn != b.target_arn
            }
            _ => true,
        }
    }

    /// Checks everything that can be checked without the store.
    pub fn validate(&self) -> Result<(), Error> {
        match self {
            ResourceSpec::Thing(s) => CharClass::IotThing.check(&s.thing_name),
            ResourceSpec::Certificate(s) => {
                CharClass::IotThing.check(&s.thing_name)?;
                s.thing_arn.expect_kind("iot", &["thing"])
            }
            ResourceSpec::Policy(s) => {
                CharClass::IotPolicy.check(&s.policy_name)?;
                check_document(&s.policy_name, &s.document)?;
                if let Some(arn) = &s.certificate_arn {
                    arn.expect_kind("iot", &["cert"])?;
                }
                Ok(())
            }
            ResourceSpec::RoleAlias(s) => {
                CharClass::RoleAlias.check(&s.role_alias_name)?;
                s.iam_role_arn.expect_kind("iam", &["role"])
            }
            ResourceSpec::ThingGroup(s) => {
                CharClass::IotThing.check(&s.thing_group_name)?;
                for arn in s.thing_arns.iter() {
                    arn.expect_kind("iot", &["thing"])?;
                }
                Ok(())
            }
            ResourceSpec::Component(s) => {
                ensure!(
                    !s.component_name.is_empty()
                        && s.component_name
                            .chars()
                            .all(|c| c.is_ascii_alphanumeric() || "._-".contains(c)),
                    NamingConstraintSnafu {
                        name: s.component_name.clone(),
                        reason: "component names are made of [a-zA-Z0-9._-]",
                    }
                );
                ensure!(
                    !s.component_version.is_empty(),
                    NamingConstraintSnafu {
                        name: s.component_name.clone(),
                        reason: "component version is empty",
                    }
                );
                Ok(())
            }
            ResourceSpec::Deployment(s) => {
                s.target_arn.expect_kind("iot", &["thing", "thinggroup"])?;
                ensure!(
                    !s.components.is_empty(),
                    EmptyDeploymentSnafu {
                        name: s.deployment_name.clone()
                    }
                );
                Ok(())
            }
        }
    }

    fn to_value(&self) -> Result<Value, serde_json::Error> {
        match self {
            ResourceSpec::Thing(s) => serde_json::to_value(s),
            ResourceSpec::Certificate(s) => serde_json::to_value(s),
            ResourceSpec::Policy(s) => serde_json::to_value(s),
            ResourceSpec::RoleAlias(s) => serde_json::to_value(s),
            ResourceSpec::ThingGroup(s) => serde_json::to_value(s),
            ResourceSpec::Component(s) => serde_json::to_value(s),
            ResourceSpec::Deployment(s) => serde_json::to_value(s),
        }
    }

    fn from_value(family: ResourceFamily, value: Value) -> Result<Self, serde_json::Error> {
        Ok(match family {
            ResourceFamily::Thing => ResourceSpec::Thing(serde_json::from_value(value)?),
            ResourceFamily::Certificate => ResourceSpec::Certificate(serde_json::from_value(value)?),
            ResourceFamily::Policy => ResourceSpec::Policy(serde_json::from_value(value)?),
            ResourceFamily::RoleAlias => ResourceSpec::RoleAlias(serde_json::from_value(value)?),
            ResourceFamily::ThingGroup => ResourceSpec::ThingGroup(serde_json::from_value(value)?),
            ResourceFamily::Component => ResourceSpec::Component(serde_json::from_value(value)?),
            ResourceFamily::Deployment => ResourceSpec::Deployment(serde_json::from_value(value)?),
        })
    }
}

/// The desired state of one resource.
///
/// Descriptors are immutable; the dependency set is derived from the
/// ARN-typed fields of the spec when the descriptor is built.
#[derive(Clone, Debug, PartialEq)]
pub struct ResourceDescriptor {
    stack_name: String,
    spec: ResourceSpec,
    dependencies: BTreeSet<Arn>,
}

impl ResourceDescriptor {
    pub fn new(stack_name: impl Into<String>, spec: ResourceSpec) -> Self {
        let dependencies = spec.dependencies().into_iter().collect();
        Self {
            stack_name: stack_name.into(),
            spec,
            dependencies,
        }
    }

    pub fn stack_name(&self) -> &str {
        &self.stack_name
    }

    pub fn spec(&self) -> &ResourceSpec {
        &self.spec
    }

    pub fn family(&self) -> ResourceFamily {
        self.spec.family()
    }

    pub fn desired_name(&self) -> String {
        self.spec.desired_name()
    }

    /// ARNs that must resolve before this resource can be provisioned.
    pub fn dependencies(&self) -> &BTreeSet<Arn> {
        &self.dependencies
    }

    pub fn validate(&self) -> Result<(), Error> {
        self.spec.validate()
    }

    /// The custom-resource property map for this descriptor.
    pub fn to_properties(&self) -> Result<Map<String, Value>, Error> {
        let value = self.spec.to_value().context(InvalidPropertySnafu {
            family: self.family(),
        })?;
        let mut properties = match value {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        properties.insert(STACK_NAME.to_owned(), Value::String(self.stack_name.clone()));
        Ok(properties)
    }

    /// Builds a descriptor of `family` from a custom-resource property map.
    pub fn from_properties(
        family: ResourceFamily,
        properties: &Map<String, Value>,
    ) -> Result<Self, Error> {
        for key in std::iter::once(&STACK_NAME).chain(family.required_properties()) {
            ensure!(
                properties.get(*key).is_some_and(|v| !v.is_null()),
                MissingPropertySnafu { family, key: *key }
            );
        }
        let stack_name = properties
            .get(STACK_NAME)
            .and_then(Value::as_str)
            .context(MissingPropertySnafu {
                family,
                key: STACK_NAME,
            })?
            .to_owned();
        let spec = ResourceSpec::from_value(family, Value::Object(properties.clone()))
            .context(InvalidPropertySnafu { family })?;
        Ok(Self::new(stack_name, spec))
    }
}

/// The state of a resource as the store sees it.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ResourceRecord {
    /// Identifier the store knows the resource by.
    pub physical_id: String,
    pub arn: Arn,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl ResourceRecord {
    pub fn new(physical_id: impl Into<String>, arn: Arn) -> Self {
        Self {
            physical_id: physical_id.into(),
            arn,
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: &str, value: impl Into<String>) -> Self {
        self.attributes.insert(key.to_owned(), value.into());
        self
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}
