//! Resource name generation.
//!
//! Names take the form `STACKNAME-BASENAME-SUFFIX`. Characters outside of
//! the target resource's allowed class are stripped and the prefix is
//! truncated to fit, so the suffix always survives intact.
use snafu::prelude::*;

use crate::{Error, NamingConstraintSnafu};

/// Separator placed between the prefix and the suffix.
pub const SEPARATOR: char = '-';

/// The longest suffix [`stable_suffix`] can produce.
pub const MAX_SUFFIX_LEN: usize = 52;

/// Character classes and length limits enforced by AWS.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CharClass {
    /// IAM role names, `[\w+=,.@-]`, at most 64 characters.
    IamRole,
    /// IoT role alias names, `[\w=,@-]`, at most 128 characters.
    RoleAlias,
    /// IoT thing and thing group names, `[a-zA-Z0-9:_-]`, at most 128 characters.
    IotThing,
    /// IoT policy names, `[\w+=,.@-]`, at most 128 characters.
    IotPolicy,
}

impl CharClass {
    pub fn max_length(&self) -> usize {
        match self {
            CharClass::IamRole => 64,
            CharClass::RoleAlias | CharClass::IotThing | CharClass::IotPolicy => 128,
        }
    }

    pub fn allows(&self, c: char) -> bool {
        // `\w` is ASCII alphanumerics and underscore
        let word = c.is_ascii_alphanumeric() || c == '_';
        match self {
            CharClass::IamRole | CharClass::IotPolicy => word || "+=,.@-".contains(c),
            CharClass::RoleAlias => word || "=,@-".contains(c),
            CharClass::IotThing => word || c == ':' || c == '-',
        }
    }

    /// Validates an already built name against this class.
    pub fn check(&self, name: &str) -> Result<(), Error> {
        ensure!(
            !name.is_empty(),
            NamingConstraintSnafu {
                name,
                reason: "name is empty",
            }
        );
        let len = name.chars().count();
        ensure!(
            len <= self.max_length(),
            NamingConstraintSnafu {
                name,
                reason: format!("{len} characters exceeds the limit of {}", self.max_length()),
            }
        );
        if let Some(c) = name.chars().find(|c| !self.allows(*c)) {
            return NamingConstraintSnafu {
                name,
                reason: format!("character {c:?} is not allowed for {self:?} names"),
            }
            .fail();
        }
        Ok(())
    }
}

/// Inputs to [`generate_name`].
#[derive(Clone, Debug, PartialEq)]
pub struct NamePolicy {
    pub stack_name: String,
    pub base_name: String,
    pub suffix: String,
    pub class: CharClass,
    pub max_length: usize,
}

impl NamePolicy {
    /// A policy using the class's own length limit.
    pub fn new(
        stack_name: impl Into<String>,
        base_name: impl Into<String>,
        suffix: impl Into<String>,
        class: CharClass,
    ) -> Self {
        Self {
            stack_name: stack_name.into(),
            base_name: base_name.into(),
            suffix: suffix.into(),
            class,
            max_length: class.max_length(),
        }
    }

    pub fn with_max_length(mut self, max_length: usize) -> Self {
        self.max_length = max_length;
        self
    }
}

/// Derives `stack-base-suffix`, stripped to `policy.class` and truncated to
/// `policy.max_length`.
///
/// ## Errors
/// Errs if the suffix plus separator does not fit in `max_length`, or if the
/// suffix itself contains characters outside of the class.
pub fn generate_name(policy: &NamePolicy) -> Result<String, Error> {
    let NamePolicy {
        stack_name,
        base_name,
        suffix,
        class,
        max_length,
    } = policy;
    let suffix_len = suffix.chars().count();
    let budget = max_length
        .checked_sub(suffix_len + 1)
        .context(NamingConstraintSnafu {
            name: format!("{stack_name}-{base_name}"),
            reason: format!(
                "suffix '{suffix}' leaves no room within a maximum length of {max_length}"
            ),
        })?;
    if let Some(c) = suffix.chars().find(|c| !class.allows(*c)) {
        return NamingConstraintSnafu {
            name: suffix.clone(),
            reason: format!("suffix character {c:?} is not allowed for {class:?} names"),
        }
        .fail();
    }

    let prefix: String = format!("{stack_name}-{base_name}")
        .chars()
        .filter(|c| class.allows(*c))
        .take(budget)
        .collect();
    let name = format!("{prefix}{SEPARATOR}{suffix}");
    log::trace!("generated {class:?} name '{name}' from '{stack_name}' + '{base_name}'");
    Ok(name)
}

/// A reproducible, name-safe suffix for the resource `logical_id` of
/// `stack_name`.
///
/// The same inputs always produce the same suffix, so re-deploying a stack
/// yields the same names.
pub fn stable_suffix(stack_name: &str, logical_id: &str, len: usize) -> Result<String, Error> {
    ensure!(
        (1..=MAX_SUFFIX_LEN).contains(&len),
        NamingConstraintSnafu {
            name: format!("{stack_name}/{logical_id}"),
            reason: format!("suffix length must be within 1..={MAX_SUFFIX_LEN}, got {len}"),
        }
    );
    let digest = ring::digest::digest(
        &ring::digest::SHA256,
        format!("{stack_name}/{logical_id}").as_bytes(),
    );
    let mut encoded = data_encoding::BASE32_DNSSEC.encode(digest.as_ref());
    encoded.truncate(len);
    Ok(encoded)
}
