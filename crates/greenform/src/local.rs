//! A resource store kept as JSON files on the local filesystem.
//!
//! Each record lives at `<dir>/<family>/<encoded physical id>.json`, where
//! the physical id is encoded as lowercase base32. ARNs are minted from the
//! [`StackConfig`] as AWS would mint them, which makes the store a
//! stand-in for an AWS account when exercising controllers.
use std::path::{Path, PathBuf};

use ring::rand::SecureRandom;
use serde_json::{Map, Value};
use snafu::prelude::*;
use tokio::io::AsyncWriteExt;

use crate::{
    arn::Arn,
    config::StackConfig,
    descriptor::{attribute, ResourceDescriptor, ResourceFamily, ResourceRecord, ResourceSpec},
    store::{
        AlreadyExistsSnafu, CodecSnafu, HasDependentsSnafu, IoSnafu, MissingDependencySnafu,
        NotFoundSnafu, RemoteError, ResourceStore, ServiceSnafu,
    },
};

/// The on-disk form of one record.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
struct StoredResource {
    family: ResourceFamily,
    name: String,
    record: ResourceRecord,
    properties: Map<String, Value>,
    dependencies: Vec<Arn>,
}

/// Maps a physical id onto a file name. Distinct ids never share a file.
fn file_stem(physical_id: &str) -> String {
    data_encoding::BASE32_DNSSEC.encode(physical_id.as_bytes())
}

pub struct LocalStore {
    dir: PathBuf,
    config: StackConfig,
    rng: ring::rand::SystemRandom,
}

impl LocalStore {
    pub fn new(dir: impl AsRef<Path>, config: &StackConfig) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            config: config.clone(),
            rng: ring::rand::SystemRandom::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn family_dir(&self, family: ResourceFamily) -> PathBuf {
        self.dir.join(family.as_str())
    }

    fn path(&self, family: ResourceFamily, physical_id: &str) -> PathBuf {
        self.family_dir(family)
            .join(format!("{}.json", file_stem(physical_id)))
    }

    /// `len` random bytes, hex encoded.
    fn random_hex(&self, len: usize) -> Result<String, RemoteError> {
        let mut bytes = vec![0u8; len];
        self.rng.fill(&mut bytes).ok().context(ServiceSnafu {
            message: "system random number generator failed",
        })?;
        Ok(data_encoding::HEXLOWER.encode(&bytes))
    }

    fn random_uuid(&self) -> Result<String, RemoteError> {
        let hex = self.random_hex(16)?;
        Ok(format!(
            "{}-{}-{}-{}-{}",
            &hex[0..8],
            &hex[8..12],
            &hex[12..16],
            &hex[16..20],
            &hex[20..32]
        ))
    }

    async fn read(&self, path: &Path) -> Result<Option<StoredResource>, RemoteError> {
        let contents = match tokio::fs::read_to_string(path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(source).context(IoSnafu { path });
            }
        };
        let stored = serde_json::from_str(&contents).context(CodecSnafu { path })?;
        Ok(Some(stored))
    }

    async fn write(&self, stored: &StoredResource) -> Result<(), RemoteError> {
        let dir = self.family_dir(stored.family);
        tokio::fs::create_dir_all(&dir)
            .await
            .context(IoSnafu { path: dir })?;
        let path = self.path(stored.family, &stored.record.physical_id);
        log::trace!("writing '{}' to {path:?}", stored.record.physical_id);
        let contents =
            serde_json::to_string_pretty(stored).context(CodecSnafu { path: path.clone() })?;
        let mut file = tokio::fs::File::create(&path)
            .await
            .context(IoSnafu { path: path.clone() })?;
        file.write_all(contents.as_bytes())
            .await
            .context(IoSnafu { path })?;
        Ok(())
    }

    async fn list(&self, family: ResourceFamily) -> Result<Vec<StoredResource>, RemoteError> {
        let dir = self.family_dir(family);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(source) => return Err(source).context(IoSnafu { path: dir }),
        };
        let mut paths = vec![];
        while let Some(entry) = entries
            .next_entry()
            .await
            .context(IoSnafu { path: dir.clone() })?
        {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut stored = vec![];
        for path in paths {
            if let Some(resource) = self.read(&path).await? {
                stored.push(resource);
            }
        }
        Ok(stored)
    }

    async fn list_all(&self) -> Result<Vec<StoredResource>, RemoteError> {
        let mut all = vec![];
        for family in ResourceFamily::ALL {
            all.extend(self.list(family).await?);
        }
        Ok(all)
    }

    /// Every record in the store, by family.
    pub async fn records(&self) -> Result<Vec<(ResourceFamily, ResourceRecord)>, RemoteError> {
        Ok(self
            .list_all()
            .await?
            .into_iter()
            .map(|stored| (stored.family, stored.record))
            .collect())
    }

    async fn check_dependencies(&self, desired: &ResourceDescriptor) -> Result<(), RemoteError> {
        let all = self.list_all().await?;
        for arn in desired.dependencies() {
            // only resources this store can hold are checked
            if !matches!(arn.service(), "iot" | "greengrass") {
                continue;
            }
            ensure!(
                all.iter().any(|stored| &stored.record.arn == arn),
                MissingDependencySnafu {
                    arn: arn.to_string()
                }
            );
        }
        Ok(())
    }

    fn mint(&self, desired: &ResourceDescriptor) -> Result<ResourceRecord, RemoteError> {
        let config = &self.config;
        let record = match desired.spec() {
            ResourceSpec::Thing(spec) => {
                let arn = config.arn("iot", format!("thing/{}", spec.thing_name));
                ResourceRecord::new(&spec.thing_name, arn.clone())
                    .with_attribute(attribute::THING_ARN, arn)
                    .with_attribute(attribute::THING_NAME, &spec.thing_name)
            }
            ResourceSpec::Certificate(spec) => {
                let id = self.random_hex(32)?;
                let arn = config.arn("iot", format!("cert/{id}"));
                let stack = desired.stack_name();
                let thing = &spec.thing_name;
                ResourceRecord::new(&id, arn.clone())
                    .with_attribute(attribute::CERTIFICATE_ARN, arn)
                    .with_attribute(attribute::CERTIFICATE_ID, id)
                    .with_attribute(attribute::THING_NAME, thing)
                    .with_attribute(
                        attribute::CERTIFICATE_PEM_PARAMETER,
                        format!("/{stack}/{thing}/certificate_pem"),
                    )
                    .with_attribute(
                        attribute::PRIVATE_KEY_SECRET_PARAMETER,
                        format!("/{stack}/{thing}/private_key"),
                    )
            }
            ResourceSpec::Policy(spec) => {
                let arn = config.arn("iot", format!("policy/{}", spec.policy_name));
                ResourceRecord::new(&spec.policy_name, arn.clone())
                    .with_attribute(attribute::IOT_POLICY_ARN, arn)
                    .with_attribute(attribute::DEFAULT_VERSION_ID, "1")
            }
            ResourceSpec::RoleAlias(spec) => {
                let arn = config.arn("iot", format!("rolealias/{}", spec.role_alias_name));
                ResourceRecord::new(&spec.role_alias_name, arn.clone())
                    .with_attribute(attribute::ROLE_ALIAS_ARN, arn)
                    .with_attribute(attribute::ROLE_ALIAS_NAME, &spec.role_alias_name)
            }
            ResourceSpec::ThingGroup(spec) => {
                let arn = config.arn("iot", format!("thinggroup/{}", spec.thing_group_name));
                ResourceRecord::new(&spec.thing_group_name, arn.clone())
                    .with_attribute(attribute::THING_GROUP_ARN, arn)
                    .with_attribute(attribute::THING_GROUP_NAME, &spec.thing_group_name)
                    .with_attribute(attribute::THING_GROUP_ID, self.random_uuid()?)
            }
            ResourceSpec::Component(spec) => {
                let arn = config.arn(
                    "greengrass",
                    format!(
                        "components:{}:versions:{}",
                        spec.component_name, spec.component_version
                    ),
                );
                let recipe = serde_json::to_string(&spec.rendered_recipe()).context(CodecSnafu {
                    path: self.family_dir(ResourceFamily::Component),
                })?;
                ResourceRecord::new(arn.to_string(), arn.clone())
                    .with_attribute(attribute::COMPONENT_ARN, arn)
                    .with_attribute(attribute::RECIPE, recipe)
            }
            ResourceSpec::Deployment(_) => {
                let id = self.random_uuid()?;
                let arn = config.arn("greengrass", format!("deployments:{id}"));
                let mut record = ResourceRecord::new(&id, arn)
                    .with_attribute(attribute::DEPLOYMENT_ID, &id)
                    .with_attribute(attribute::REVISION, "1");
                self.new_job(&mut record)?;
                record
            }
        };
        Ok(record)
    }

    fn new_job(&self, record: &mut ResourceRecord) -> Result<(), RemoteError> {
        let job_id = self.random_uuid()?;
        let job_arn = self.config.arn("iot", format!("job/{job_id}"));
        record
            .attributes
            .insert(attribute::IOT_JOB_ARN.to_owned(), job_arn.to_string());
        record
            .attributes
            .insert(attribute::IOT_JOB_ID.to_owned(), job_id);
        Ok(())
    }

    fn stored(
        &self,
        desired: &ResourceDescriptor,
        record: ResourceRecord,
    ) -> Result<StoredResource, RemoteError> {
        let path = self.path(desired.family(), &record.physical_id);
        let properties = desired.to_properties().map_err(|e| RemoteError::Service {
            message: format!("{path:?}: {e}"),
        })?;
        Ok(StoredResource {
            family: desired.family(),
            name: desired.desired_name(),
            record,
            properties,
            dependencies: desired.dependencies().iter().cloned().collect(),
        })
    }
}

fn bump(record: &mut ResourceRecord, key: &str) {
    let next = record
        .attribute(key)
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0)
        + 1;
    record.attributes.insert(key.to_owned(), next.to_string());
}

impl ResourceStore for LocalStore {
    async fn describe(
        &self,
        family: ResourceFamily,
        name: &str,
    ) -> Result<Option<ResourceRecord>, RemoteError> {
        if let Some(stored) = self.read(&self.path(family, name)).await? {
            if stored.record.physical_id == name {
                return Ok(Some(stored.record));
            }
        }
        Ok(self
            .list(family)
            .await?
            .into_iter()
            .find(|stored| stored.name == name)
            .map(|stored| stored.record))
    }

    async fn provision(&self, desired: &ResourceDescriptor) -> Result<ResourceRecord, RemoteError> {
        let family = desired.family();
        let name = desired.desired_name();
        if family.unique_names() {
            let taken = self
                .list(family)
                .await?
                .into_iter()
                .any(|stored| stored.name == name);
            ensure!(!taken, AlreadyExistsSnafu { name });
        }
        self.check_dependencies(desired).await?;

        let record = self.mint(desired)?;
        let stored = self.stored(desired, record)?;
        self.write(&stored).await?;
        log::debug!("stored {family} '{name}' as {}", stored.record.physical_id);
        Ok(stored.record)
    }

    async fn modify(
        &self,
        desired: &ResourceDescriptor,
        previous: &ResourceRecord,
    ) -> Result<ResourceRecord, RemoteError> {
        let family = desired.family();
        let path = self.path(family, &previous.physical_id);
        let current = self.read(&path).await?.context(NotFoundSnafu {
            id: previous.physical_id.clone(),
        })?;
        self.check_dependencies(desired).await?;

        let mut record = current.record;
        match desired.spec() {
            ResourceSpec::Certificate(_) | ResourceSpec::Component(_) => {
                return ServiceSnafu {
                    message: format!("{family} '{}' cannot be modified", previous.physical_id),
                }
                .fail();
            }
            ResourceSpec::Policy(_) => bump(&mut record, attribute::DEFAULT_VERSION_ID),
            ResourceSpec::Deployment(_) => {
                bump(&mut record, attribute::REVISION);
                self.new_job(&mut record)?;
            }
            ResourceSpec::Thing(_) | ResourceSpec::RoleAlias(_) | ResourceSpec::ThingGroup(_) => {}
        }
        let stored = self.stored(desired, record)?;
        self.write(&stored).await?;
        Ok(stored.record)
    }

    async fn remove(
        &self,
        family: ResourceFamily,
        previous: &ResourceRecord,
    ) -> Result<(), RemoteError> {
        let path = self.path(family, &previous.physical_id);
        ensure!(
            self.read(&path).await?.is_some(),
            NotFoundSnafu {
                id: previous.physical_id.clone()
            }
        );
        let dependents = self
            .list_all()
            .await?
            .into_iter()
            .filter(|stored| stored.dependencies.contains(&previous.arn))
            .map(|stored| format!("{} '{}'", stored.family, stored.name))
            .collect::<Vec<_>>();
        ensure!(
            dependents.is_empty(),
            HasDependentsSnafu {
                id: previous.physical_id.clone(),
                dependents: dependents.join(", "),
            }
        );
        tokio::fs::remove_file(&path)
            .await
            .context(IoSnafu { path })?;
        Ok(())
    }
}
