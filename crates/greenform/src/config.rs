//! Stack configuration.
//!
//! ```toml
//! stack_name = "test1"
//! region = "us-west-2"
//! account = "123456789012"
//! # partition = "aws"
//! ```
use std::path::Path;

use snafu::prelude::*;

use crate::{arn::Arn, ConfigParseSnafu, ConfigReadSnafu, Error, InvalidConfigSnafu};

/// Stack names longer than this leave no room in generated resource names.
pub const MAX_STACK_NAME_LEN: usize = 20;

fn default_partition() -> String {
    "aws".to_owned()
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct StackConfig {
    pub stack_name: String,
    pub region: String,
    pub account: String,
    #[serde(default = "default_partition")]
    pub partition: String,
}

impl StackConfig {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        log::debug!("reading config from {path:?}");
        let contents = std::fs::read_to_string(path).context(ConfigReadSnafu { path })?;
        let config: StackConfig = toml::from_str(&contents).context(ConfigParseSnafu { path })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        let name = &self.stack_name;
        ensure!(
            !name.is_empty() && name.len() <= MAX_STACK_NAME_LEN,
            InvalidConfigSnafu {
                reason: format!(
                    "stack_name '{name}' must be between 1 and {MAX_STACK_NAME_LEN} characters"
                ),
            }
        );
        ensure!(
            name.starts_with(|c: char| c.is_ascii_alphabetic())
                && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-'),
            InvalidConfigSnafu {
                reason: format!(
                    "stack_name '{name}' must start with a letter and contain only letters, digits and hyphens"
                ),
            }
        );
        ensure!(
            self.account.len() == 12 && self.account.chars().all(|c| c.is_ascii_digit()),
            InvalidConfigSnafu {
                reason: format!("account '{}' must be 12 digits", self.account),
            }
        );
        ensure!(
            !self.region.is_empty()
                && self
                    .region
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'),
            InvalidConfigSnafu {
                reason: format!("region '{}' is not a region name", self.region),
            }
        );
        ensure!(
            !self.partition.is_empty(),
            InvalidConfigSnafu {
                reason: "partition is empty",
            }
        );
        Ok(())
    }

    /// An ARN for `resource` of `service` in this stack's account and region.
    pub fn arn(&self, service: &str, resource: impl Into<String>) -> Arn {
        Arn::new(
            &self.partition,
            service,
            &self.region,
            &self.account,
            resource,
        )
    }
}

impl std::str::FromStr for StackConfig {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let config: StackConfig = toml::from_str(s).context(ConfigParseSnafu { path: "<inline>" })?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_with_default_partition() {
        let config: StackConfig = r#"
            stack_name = "test1"
            region = "us-west-2"
            account = "123456789012"
        "#
        .parse()
        .unwrap();
        assert_eq!("aws", config.partition);
        assert_eq!(
            "arn:aws:iot:us-west-2:123456789012:thing/core-1",
            config.arn("iot", "thing/core-1").to_string()
        );
    }

    #[test]
    fn rejects_bad_values() {
        let cases = [
            ("test1", "us-west-2", "1234"),
            ("a-stack-name-that-is-too-long", "us-west-2", "123456789012"),
            ("1stack", "us-west-2", "123456789012"),
            ("test1", "US West", "123456789012"),
        ];
        for (stack_name, region, account) in cases {
            let toml = format!(
                "stack_name = \"{stack_name}\"\nregion = \"{region}\"\naccount = \"{account}\"\n"
            );
            assert!(
                matches!(toml.parse::<StackConfig>(), Err(Error::InvalidConfig { .. })),
                "{toml}"
            );
        }
        assert!(matches!(
            "stack_name = 1".parse::<StackConfig>(),
            Err(Error::ConfigParse { .. })
        ));
    }

    #[test]
    fn reads_from_path() {
        let dir = std::env::temp_dir().join(format!("greenform-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("stack.toml");
        std::fs::write(
            &path,
            "stack_name = \"test1\"\nregion = \"eu-west-1\"\naccount = \"123456789012\"\npartition = \"aws\"\n",
        )
        .unwrap();
        let config = StackConfig::from_path(&path).unwrap();
        assert_eq!("eu-west-1", config.region);
        assert!(matches!(
            StackConfig::from_path(dir.join("missing.toml")),
            Err(Error::ConfigRead { .. })
        ));
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
