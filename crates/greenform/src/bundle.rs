//! An IoT thing with its certificate and policy, provisioned as one unit.
use std::{collections::BTreeMap, sync::Arc};

use crate::{
    arn::Arn,
    controller::LifecycleController,
    descriptor::{
        attribute, CertificateSpec, PolicySpec, ResourceDescriptor, ResourceFamily,
        ResourceRecord, ResourceSpec, ThingSpec,
    },
    policy::render_policy,
    registry::ProviderRegistry,
    store::ResourceStore,
    Error,
};

/// Parameter name the thing's own name is rendered into the policy as.
pub const THING_NAME_PARAMETER: &str = "thingname";

/// A thing, a certificate attached to it, and an IoT policy rendered from
/// a template and attached to the certificate.
#[derive(Clone, Debug, PartialEq)]
pub struct ThingCertPolicy {
    pub thing_name: String,
    pub policy_name: String,
    pub policy_template: String,
    /// Template parameters. `thingname` is always set to `thing_name`.
    pub parameters: BTreeMap<String, String>,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ThingCertPolicyOutput {
    pub thing_arn: Arn,
    pub certificate_arn: Arn,
    pub iot_policy_arn: Arn,
    pub certificate_pem_parameter: Option<String>,
    pub private_key_secret_parameter: Option<String>,
    pub thing: ResourceRecord,
    pub certificate: ResourceRecord,
    pub policy: ResourceRecord,
}

type Created<S> = Vec<(Arc<LifecycleController<S>>, ResourceRecord)>;

async fn roll_back<S: ResourceStore>(created: Created<S>) {
    for (controller, record) in created.into_iter().rev() {
        log::warn!(
            "rolling back {} '{}'",
            controller.family(),
            record.physical_id
        );
        if let Err(e) = controller.delete(&record).await {
            log::error!("could not roll back '{}': {e}", record.physical_id);
        }
    }
}

impl ThingCertPolicy {
    fn policy_descriptor(
        &self,
        stack_name: &str,
        document: &str,
        certificate_arn: Option<Arn>,
    ) -> ResourceDescriptor {
        ResourceDescriptor::new(
            stack_name,
            ResourceSpec::Policy(PolicySpec {
                policy_name: self.policy_name.clone(),
                document: document.to_owned(),
                certificate_arn,
            }),
        )
    }

    /// Creates the thing, then the certificate, then the policy.
    ///
    /// If any step fails, whatever was already created is deleted again in
    /// reverse order and the step's error is returned.
    pub async fn provision<S: ResourceStore>(
        &self,
        registry: &mut ProviderRegistry<S>,
        stack_name: &str,
    ) -> Result<ThingCertPolicyOutput, Error> {
        let mut parameters = self.parameters.clone();
        parameters.insert(THING_NAME_PARAMETER.to_owned(), self.thing_name.clone());
        let document = render_policy(&self.policy_template, &parameters)?;

        let thing_desc = ResourceDescriptor::new(
            stack_name,
            ResourceSpec::Thing(ThingSpec {
                thing_name: self.thing_name.clone(),
                attributes: BTreeMap::new(),
            }),
        );
        thing_desc.validate()?;
        self.policy_descriptor(stack_name, &document, None)
            .validate()?;

        let things = registry.controller(ResourceFamily::Thing);
        let certificates = registry.controller(ResourceFamily::Certificate);
        let policies = registry.controller(ResourceFamily::Policy);
        let mut created: Created<S> = vec![];

        let thing = things.create(&thing_desc).await?;
        created.push((things, thing.clone()));

        let cert_desc = ResourceDescriptor::new(
            stack_name,
            ResourceSpec::Certificate(CertificateSpec {
                thing_name: self.thing_name.clone(),
                thing_arn: thing.arn.clone(),
            }),
        );
        let certificate = match certificates.create(&cert_desc).await {
            Ok(record) => record,
            Err(e) => {
                roll_back(created).await;
                return Err(e);
            }
        };
        created.push((certificates, certificate.clone()));

        let policy_desc =
            self.policy_descriptor(stack_name, &document, Some(certificate.arn.clone()));
        let policy = match policies.create(&policy_desc).await {
            Ok(record) => record,
            Err(e) => {
                roll_back(created).await;
                return Err(e);
            }
        };

        log::info!(
            "provisioned '{}' with certificate {} and policy '{}'",
            self.thing_name,
            certificate.physical_id,
            self.policy_name
        );
        Ok(ThingCertPolicyOutput {
            thing_arn: thing.arn.clone(),
            certificate_arn: certificate.arn.clone(),
            iot_policy_arn: policy.arn.clone(),
            certificate_pem_parameter: certificate
                .attribute(attribute::CERTIFICATE_PEM_PARAMETER)
                .map(str::to_owned),
            private_key_secret_parameter: certificate
                .attribute(attribute::PRIVATE_KEY_SECRET_PARAMETER)
                .map(str::to_owned),
            thing,
            certificate,
            policy,
        })
    }

    /// Deletes the policy, then the certificate, then the thing.
    pub async fn destroy<S: ResourceStore>(
        registry: &mut ProviderRegistry<S>,
        output: &ThingCertPolicyOutput,
    ) -> Result<(), Error> {
        registry
            .controller(ResourceFamily::Policy)
            .delete(&output.policy)
            .await?;
        registry
            .controller(ResourceFamily::Certificate)
            .delete(&output.certificate)
            .await?;
        registry
            .controller(ResourceFamily::Thing)
            .delete(&output.thing)
            .await?;
        Ok(())
    }
}
