//! Amazon resource names.
//!
//! `arn:partition:service:region:account:resource`, where `resource` is
//! usually `resource-type/resource-id` (IoT) or
//! `resource-type:resource-id[:...]` (Greengrass).
use std::str::FromStr;

use snafu::prelude::*;

use crate::{Dependencies, Error, HasDependencies, InvalidArnSnafu};

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Arn {
    partition: String,
    service: String,
    region: String,
    account: String,
    resource: String,
}

impl Arn {
    pub fn new(
        partition: impl Into<String>,
        service: impl Into<String>,
        region: impl Into<String>,
        account: impl Into<String>,
        resource: impl Into<String>,
    ) -> Self {
        Self {
            partition: partition.into(),
            service: service.into(),
            region: region.into(),
            account: account.into(),
            resource: resource.into(),
        }
    }

    pub fn partition(&self) -> &str {
        &self.partition
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// The resource segment up to the first `/` or `:`.
    pub fn resource_type(&self) -> &str {
        self.resource
            .split(['/', ':'])
            .next()
            .unwrap_or(&self.resource)
    }

    /// Everything after the resource type and its delimiter.
    pub fn resource_id(&self) -> &str {
        let ty = self.resource_type();
        self.resource
            .get(ty.len() + 1..)
            .unwrap_or_default()
    }

    /// Errs unless this ARN belongs to `service` and names one of `types`.
    pub fn expect_kind(&self, service: &str, types: &[&str]) -> Result<(), Error> {
        ensure!(
            self.service == service,
            InvalidArnSnafu {
                arn: self.to_string(),
                reason: format!("expected service '{service}', found '{}'", self.service),
            }
        );
        ensure!(
            types.contains(&self.resource_type()),
            InvalidArnSnafu {
                arn: self.to_string(),
                reason: format!(
                    "expected resource type {}, found '{}'",
                    types.join(" or "),
                    self.resource_type()
                ),
            }
        );
        ensure!(
            !self.resource_id().is_empty(),
            InvalidArnSnafu {
                arn: self.to_string(),
                reason: "missing resource id",
            }
        );
        Ok(())
    }
}

impl FromStr for Arn {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| {
            InvalidArnSnafu {
                arn: s.to_owned(),
                reason,
            }
            .build()
        };
        let mut parts = s.splitn(6, ':');
        let prefix = parts.next().unwrap_or_default();
        ensure!(prefix == "arn", InvalidArnSnafu { arn: s, reason: "must start with 'arn:'" });
        let mut next = |what: &str| {
            parts
                .next()
                .ok_or_else(|| invalid(&format!("missing {what}")))
        };
        let partition = next("partition")?;
        let service = next("service")?;
        let region = next("region")?;
        let account = next("account")?;
        let resource = next("resource")?;

        ensure!(!partition.is_empty(), InvalidArnSnafu { arn: s, reason: "empty partition" });
        ensure!(!service.is_empty(), InvalidArnSnafu { arn: s, reason: "empty service" });
        ensure!(!resource.is_empty(), InvalidArnSnafu { arn: s, reason: "empty resource" });
        ensure!(
            account.is_empty() || account == "aws" || account.chars().all(|c| c.is_ascii_digit()),
            InvalidArnSnafu {
                arn: s,
                reason: "account must be numeric"
            }
        );

        Ok(Arn::new(partition, service, region, account, resource))
    }
}

impl TryFrom<String> for Arn {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Arn> for String {
    fn from(arn: Arn) -> Self {
        arn.to_string()
    }
}

impl core::fmt::Display for Arn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "arn:{}:{}:{}:{}:{}",
            self.partition, self.service, self.region, self.account, self.resource
        )
    }
}

impl HasDependencies for Arn {
    fn dependencies(&self) -> Dependencies {
        Dependencies::single(self.clone())
    }
}
