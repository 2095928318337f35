//! IoT policy document templates.
//!
//! Templates mark parameters with `<% name %>` (or `<%= name %>`). Every
//! placeholder must have a value; a placeholder left in a live policy
//! document is worse than a failed deployment.
use std::collections::BTreeMap;

use snafu::prelude::*;

use crate::{Error, MalformedTemplateSnafu, MissingParameterSnafu};

const OPEN: &str = "<%";
const CLOSE: &str = "%>";

#[derive(Clone, Debug, PartialEq)]
enum Segment {
    Literal(String),
    Placeholder(String),
}

/// A parsed policy template.
#[derive(Clone, Debug, PartialEq)]
pub struct PolicyTemplate {
    segments: Vec<Segment>,
}

fn is_parameter_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-')
}

impl PolicyTemplate {
    pub fn parse(template: &str) -> Result<Self, Error> {
        let mut segments = vec![];
        let mut rest = template;
        let mut offset = 0;
        while let Some(start) = rest.find(OPEN) {
            if start > 0 {
                segments.push(Segment::Literal(rest[..start].to_owned()));
            }
            let after_open = &rest[start + OPEN.len()..];
            let end = after_open.find(CLOSE).context(MalformedTemplateSnafu {
                offset: offset + start,
                reason: "unterminated placeholder",
            })?;
            let inner = after_open[..end].trim();
            let name = inner.strip_prefix('=').unwrap_or(inner).trim();
            ensure!(
                is_parameter_name(name),
                MalformedTemplateSnafu {
                    offset: offset + start,
                    reason: format!("'{name}' is not a parameter name"),
                }
            );
            segments.push(Segment::Placeholder(name.to_owned()));

            let consumed = start + OPEN.len() + end + CLOSE.len();
            offset += consumed;
            rest = &rest[consumed..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Literal(rest.to_owned()));
        }
        Ok(Self { segments })
    }

    /// Names of all placeholders, in order of first appearance.
    pub fn placeholders(&self) -> Vec<&str> {
        let mut names: Vec<&str> = vec![];
        for segment in self.segments.iter() {
            if let Segment::Placeholder(name) = segment {
                if !names.contains(&name.as_str()) {
                    names.push(name);
                }
            }
        }
        names
    }

    pub fn render(&self, parameters: &BTreeMap<String, String>) -> Result<String, Error> {
        let mut output = String::new();
        for segment in self.segments.iter() {
            match segment {
                Segment::Literal(s) => output.push_str(s),
                Segment::Placeholder(name) => {
                    let value = parameters
                        .get(name)
                        .context(MissingParameterSnafu { name })?;
                    output.push_str(value);
                }
            }
        }
        Ok(output)
    }
}

/// Substitutes every `<% name %>` in `template` with `parameters[name]`.
///
/// The output is not validated as a policy document.
pub fn render_policy(
    template: &str,
    parameters: &BTreeMap<String, String>,
) -> Result<String, Error> {
    let rendered = PolicyTemplate::parse(template)?.render(parameters)?;
    log::trace!("rendered policy:\n{rendered}");
    Ok(rendered)
}

#[cfg(test)]
mod test {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn substitutes_placeholder() {
        let out = render_policy(
            r#"{"Resource": "<% thingname %>"}"#,
            &params(&[("thingname", "core-1")]),
        )
        .unwrap();
        assert_eq!(r#"{"Resource": "core-1"}"#, out);
    }

    #[test]
    fn substitutes_many_and_repeated() {
        let template = "arn:aws:iot:<%region%>:<% account %>:client/<%= thingname %>*,\
                        arn:aws:iot:<% region %>:<% account %>:rolealias/<% rolealiasname %>";
        let out = render_policy(
            template,
            &params(&[
                ("region", "us-west-2"),
                ("account", "123456789012"),
                ("thingname", "core-1"),
                ("rolealiasname", "alias"),
                ("unused", "ignored"),
            ]),
        )
        .unwrap();
        assert_eq!(
            "arn:aws:iot:us-west-2:123456789012:client/core-1*,\
             arn:aws:iot:us-west-2:123456789012:rolealias/alias",
            out
        );
        assert_eq!(
            vec!["region", "account", "thingname", "rolealiasname"],
            PolicyTemplate::parse(template).unwrap().placeholders()
        );
    }

    #[test]
    fn missing_parameter_is_an_error() {
        let err = render_policy("<% thingname %>", &BTreeMap::new()).unwrap_err();
        assert!(
            matches!(&err, Error::MissingParameter { name } if name == "thingname"),
            "{err}"
        );
    }

    #[test]
    fn malformed_templates_are_errors() {
        assert!(matches!(
            PolicyTemplate::parse("abc <% open"),
            Err(Error::MalformedTemplate { offset: 4, .. })
        ));
        assert!(PolicyTemplate::parse("<%  %>").is_err());
        assert!(PolicyTemplate::parse("<% two words %>").is_err());
    }

    #[test]
    fn no_placeholders_is_identity() {
        let doc = r#"{"Version": "2012-10-17", "Statement": []}"#;
        assert_eq!(doc, render_policy(doc, &BTreeMap::new()).unwrap());
    }
}
