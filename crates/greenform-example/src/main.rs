//! Example: the Greengrass "base implementation" stack, managed with
//! greenform.
//!
//! Declares an IoT role alias, a Greengrass core thing with its
//! certificate and policy, a thing group, a HelloWorld component and a
//! deployment of that component plus the Greengrass nucleus, CLI and local
//! debug console.
//!
//! Resources are kept in a local store on disk, standing in for an AWS
//! account. Every change is sent through the same custom-resource events a
//! CloudFormation stack would send. Run with `RUST_LOG=info` to see what
//! greenform does under the hood.
//!
//! ```sh
//! cargo run -p greenform-example -- --config crates/greenform-example/stack.toml plan
//! cargo run -p greenform-example -- --config crates/greenform-example/stack.toml apply
//! cargo run -p greenform-example -- --config crates/greenform-example/stack.toml destroy --force
//! ```

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::Colorize;
use green::{
    arn::Arn,
    component::{ComponentDeployment, ComponentList},
    config::StackConfig,
    descriptor::{
        attribute, CertificateSpec, ComponentSpec, DeploymentSpec, PolicySpec,
        ResourceDescriptor, ResourceFamily, ResourceSpec, RoleAliasSpec, ThingGroupSpec,
        ThingSpec,
    },
    event::CustomResourceEvent,
    local::LocalStore,
    naming::{generate_name, stable_suffix, CharClass, NamePolicy},
    policy::render_policy,
    registry::ProviderRegistry,
};
use serde_json::{Map, Value};

const CORE_POLICY_TEMPLATE: &str = include_str!("../assets/greengrass-core-policy.json");
const HELLO_WORLD_RECIPE: &str = include_str!("../assets/ggAccel.example.HelloWorld-1.0.0.json");

#[derive(Parser)]
#[command(name = "infra", about = "Manage a Greengrass base implementation stack")]
struct Cli {
    /// Stack configuration file.
    #[arg(long, env = "GREENFORM_CONFIG", default_value = "stack.toml")]
    config: PathBuf,

    /// Directory for greenform state files.
    #[arg(long, default_value = "state")]
    state_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show what would change without applying.
    Plan,
    /// Plan and apply changes.
    Apply,
    /// Tear down the whole stack.
    Destroy {
        #[clap(long, short, default_value = "false")]
        force: bool,
    },
}

/// Resources of the stack in dependency order.
const RESOURCES: [(&str, ResourceFamily); 7] = [
    ("IoTRoleAlias", ResourceFamily::RoleAlias),
    ("GreengrassCore", ResourceFamily::Thing),
    ("GreengrassCoreCertificate", ResourceFamily::Certificate),
    ("GreengrassCorePolicy", ResourceFamily::Policy),
    ("DeploymentGroup", ResourceFamily::ThingGroup),
    ("HelloWorldComponent", ResourceFamily::Component),
    ("GreengrassDeployment", ResourceFamily::Deployment),
];

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// What was last applied for one logical resource.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
struct Deployed {
    family: ResourceFamily,
    physical_id: String,
    properties: Map<String, Value>,
    data: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
struct State {
    resources: BTreeMap<String, Deployed>,
}

impl State {
    async fn load(path: &Path) -> anyhow::Result<Self> {
        match tokio::fs::read_to_string(path).await {
            Ok(contents) => {
                serde_json::from_str(&contents).with_context(|| format!("parsing {path:?}"))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e).with_context(|| format!("reading {path:?}")),
        }
    }

    async fn save(&self, path: &Path) -> anyhow::Result<()> {
        let contents = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, contents)
            .await
            .with_context(|| format!("writing {path:?}"))
    }

    /// An ARN output of an already applied resource.
    fn arn(&self, logical_id: &str, key: &str) -> anyhow::Result<Arn> {
        let value = self
            .resources
            .get(logical_id)
            .and_then(|deployed| deployed.data.get(key))
            .with_context(|| format!("'{logical_id}' has no '{key}' output yet"))?;
        Ok(value.parse()?)
    }
}

// ---------------------------------------------------------------------------
// Stack declaration
// ---------------------------------------------------------------------------

struct Stack {
    config: StackConfig,
    role_alias_name: String,
    iam_role_name: String,
    thing_name: String,
    policy_name: String,
    group_name: String,
}

impl Stack {
    fn new(config: StackConfig) -> anyhow::Result<Self> {
        let stack_name = config.stack_name.clone();
        let suffix = stable_suffix(&stack_name, "BaseImplementation", 8)?;
        let name = |base: &str, class: CharClass| {
            generate_name(&NamePolicy::new(&stack_name, base, &suffix, class))
        };
        Ok(Self {
            role_alias_name: name("GreengrassV2TokenExchangeRole", CharClass::RoleAlias)?,
            iam_role_name: name("RoleForIoTRoleAlias", CharClass::IamRole)?,
            thing_name: name("greengrass-core", CharClass::IotThing)?,
            policy_name: name("greengrass-minimal-policy", CharClass::IotPolicy)?,
            group_name: name("greengrass-deployment-group", CharClass::IotThing)?,
            config,
        })
    }

    fn stack_name(&self) -> &str {
        &self.config.stack_name
    }

    fn component_bucket(&self) -> String {
        format!(
            "{}-ggcomponents-{}-{}",
            self.config.stack_name, self.config.account, self.config.region
        )
    }

    fn components(&self) -> anyhow::Result<ComponentList> {
        let hello = ComponentList::new().add_component(
            "ggAccel.example.HelloWorld",
            ComponentDeployment::new("1.0.0").with_merge(
                serde_json::json!({"Message": "Welcome from the Greengrass accelerator stack"})
                    .to_string(),
            ),
        )?;
        let runtime: ComponentList = [
            ("aws.greengrass.Nucleus", "2.10.3"),
            ("aws.greengrass.Cli", "2.10.3"),
        ]
        .into_iter()
        .map(|(name, version)| (name.to_owned(), ComponentDeployment::new(version)))
        .collect();
        let components = hello.merge(&runtime)?.add_component(
            "aws.greengrass.LocalDebugConsole",
            ComponentDeployment::new("2.3.0")
                .with_merge(serde_json::json!({"httpsEnabled": "false"}).to_string()),
        )?;
        Ok(components)
    }

    /// The desired state of `logical_id`, given what has been applied so far.
    fn declare(&self, logical_id: &str, state: &State) -> anyhow::Result<ResourceDescriptor> {
        let spec = match logical_id {
            "IoTRoleAlias" => ResourceSpec::RoleAlias(RoleAliasSpec {
                role_alias_name: self.role_alias_name.clone(),
                iam_role_arn: Arn::new(
                    &self.config.partition,
                    "iam",
                    "",
                    &self.config.account,
                    format!("role/{}", self.iam_role_name),
                ),
            }),
            "GreengrassCore" => ResourceSpec::Thing(ThingSpec {
                thing_name: self.thing_name.clone(),
                attributes: BTreeMap::new(),
            }),
            "GreengrassCoreCertificate" => ResourceSpec::Certificate(CertificateSpec {
                thing_name: self.thing_name.clone(),
                thing_arn: state.arn("GreengrassCore", attribute::THING_ARN)?,
            }),
            "GreengrassCorePolicy" => {
                let mut parameters = BTreeMap::new();
                parameters.insert("thingname".to_owned(), self.thing_name.clone());
                parameters.insert("region".to_owned(), self.config.region.clone());
                parameters.insert("account".to_owned(), self.config.account.clone());
                parameters.insert("rolealiasname".to_owned(), self.role_alias_name.clone());
                ResourceSpec::Policy(PolicySpec {
                    policy_name: self.policy_name.clone(),
                    document: render_policy(CORE_POLICY_TEMPLATE, &parameters)?,
                    certificate_arn: Some(
                        state.arn("GreengrassCoreCertificate", attribute::CERTIFICATE_ARN)?,
                    ),
                })
            }
            "DeploymentGroup" => ResourceSpec::ThingGroup(ThingGroupSpec {
                thing_arns: vec![state.arn("GreengrassCore", attribute::THING_ARN)?],
                ..ThingGroupSpec::new(&self.group_name)
            }),
            "HelloWorldComponent" => ResourceSpec::Component(ComponentSpec {
                component_name: "ggAccel.example.HelloWorld".to_owned(),
                component_version: "1.0.0".to_owned(),
                recipe: serde_json::from_str(HELLO_WORLD_RECIPE)?,
                target_bucket: Some(self.component_bucket()),
                artifact_key_name: Some("ggAccel.example.HelloWorld.zip".to_owned()),
            }),
            "GreengrassDeployment" => ResourceSpec::Deployment(DeploymentSpec {
                target_arn: state.arn("DeploymentGroup", attribute::THING_GROUP_ARN)?,
                deployment_name: format!("{} - Example deployment", self.stack_name()),
                components: self.components()?,
                deployment_policies: None,
                iot_job_configuration: None,
            }),
            other => anyhow::bail!("no resource '{other}' in this stack"),
        };
        Ok(ResourceDescriptor::new(self.stack_name(), spec))
    }
}

// ---------------------------------------------------------------------------
// Plan
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq)]
enum Action {
    Create,
    Update,
    Replace,
    Unchanged,
    Destroy,
}

impl core::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Action::Create => "+ create".green(),
            Action::Update => "~ update".yellow(),
            Action::Replace => "± replace".magenta(),
            Action::Unchanged => "  unchanged".dimmed(),
            Action::Destroy => "- destroy".red(),
        };
        write!(f, "{s}")
    }
}

fn plan(stack: &Stack, state: &State) -> anyhow::Result<Vec<(&'static str, Action)>> {
    let mut actions = vec![];
    for (logical_id, family) in RESOURCES {
        let action = match state.resources.get(logical_id) {
            None => Action::Create,
            Some(deployed) => {
                let desired = stack.declare(logical_id, state)?;
                let previous = ResourceDescriptor::from_properties(family, &deployed.properties)?;
                if desired == previous {
                    Action::Unchanged
                } else if desired.spec().requires_replacement(previous.spec()) {
                    Action::Replace
                } else {
                    Action::Update
                }
            }
        };
        actions.push((logical_id, action));
    }
    Ok(actions)
}

fn print_plan(actions: &[(&str, Action)]) {
    let changes = actions
        .iter()
        .filter(|(_, action)| *action != Action::Unchanged)
        .count();
    println!("Plan: {changes} change(s)");
    for (logical_id, action) in actions {
        println!("  {action} {}", logical_id.bold());
    }
}

// ---------------------------------------------------------------------------
// Apply and destroy
// ---------------------------------------------------------------------------

async fn apply(
    stack: &Stack,
    registry: &mut ProviderRegistry<LocalStore>,
    state: &mut State,
    state_path: &Path,
) -> anyhow::Result<()> {
    for (logical_id, family) in RESOURCES {
        let desired = stack.declare(logical_id, state)?;
        let properties = desired.to_properties()?;
        let event = match state.resources.get(logical_id) {
            None => CustomResourceEvent::create(logical_id, properties.clone()),
            Some(deployed) => CustomResourceEvent::update(
                logical_id,
                &deployed.physical_id,
                properties.clone(),
                deployed.properties.clone(),
            ),
        };
        let response = registry
            .controller(family)
            .handle(&event)
            .await
            .with_context(|| format!("applying '{logical_id}'"))?;
        state.resources.insert(
            logical_id.to_owned(),
            Deployed {
                family,
                physical_id: response.physical_resource_id,
                properties,
                data: response.data,
            },
        );
        state.save(state_path).await?;
    }
    Ok(())
}

async fn destroy(
    registry: &mut ProviderRegistry<LocalStore>,
    state: &mut State,
    state_path: &Path,
) -> anyhow::Result<()> {
    for (logical_id, _) in RESOURCES.iter().rev() {
        let Some(deployed) = state.resources.get(*logical_id).cloned() else {
            continue;
        };
        let event =
            CustomResourceEvent::delete(*logical_id, &deployed.physical_id, deployed.properties);
        registry
            .controller(deployed.family)
            .handle(&event)
            .await
            .with_context(|| format!("destroying '{logical_id}'"))?;
        state.resources.remove(*logical_id);
        state.save(state_path).await?;
    }
    Ok(())
}

fn print_outputs(state: &State) {
    let outputs = [
        ("IotRoleAliasName", "IoTRoleAlias", attribute::ROLE_ALIAS_NAME),
        ("RoleAliasArn", "IoTRoleAlias", attribute::ROLE_ALIAS_ARN),
        ("ThingArn", "GreengrassCore", attribute::THING_ARN),
        ("ThingName", "GreengrassCore", attribute::THING_NAME),
        ("CertificateArn", "GreengrassCoreCertificate", attribute::CERTIFICATE_ARN),
        (
            "CertificatePemParameter",
            "GreengrassCoreCertificate",
            attribute::CERTIFICATE_PEM_PARAMETER,
        ),
        (
            "PrivateKeySecretParameter",
            "GreengrassCoreCertificate",
            attribute::PRIVATE_KEY_SECRET_PARAMETER,
        ),
        ("IotPolicyArn", "GreengrassCorePolicy", attribute::IOT_POLICY_ARN),
        ("DeploymentId", "GreengrassDeployment", attribute::DEPLOYMENT_ID),
    ];
    println!("Outputs:");
    for (output, logical_id, key) in outputs {
        if let Some(value) = state
            .resources
            .get(logical_id)
            .and_then(|deployed| deployed.data.get(key))
        {
            println!("  {} = {value}", output.cyan());
        }
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let config = StackConfig::from_path(&cli.config)?;
    log::info!(
        "stack '{}' in {} ({})",
        config.stack_name,
        config.region,
        config.account
    );
    tokio::fs::create_dir_all(&cli.state_dir)
        .await
        .with_context(|| format!("creating {:?}", cli.state_dir))?;
    let state_path = cli.state_dir.join(format!("{}.json", config.stack_name));
    let mut state = State::load(&state_path).await?;
    let mut registry = ProviderRegistry::new(LocalStore::new(cli.state_dir.join("store"), &config));
    let stack = Stack::new(config)?;

    match cli.command {
        Command::Plan => {
            print_plan(&plan(&stack, &state)?);
        }
        Command::Apply => {
            print_plan(&plan(&stack, &state)?);
            println!();
            println!("Applying...");
            apply(&stack, &mut registry, &mut state, &state_path).await?;
            println!("Done.");
            println!();
            print_outputs(&state);
        }
        Command::Destroy { force } => {
            let actions = RESOURCES
                .iter()
                .rev()
                .filter(|(logical_id, _)| state.resources.contains_key(*logical_id))
                .map(|(logical_id, _)| (*logical_id, Action::Destroy))
                .collect::<Vec<_>>();
            print_plan(&actions);
            if force {
                println!();
                println!("Applying...");
                destroy(&mut registry, &mut state, &state_path).await?;
                println!("Done.");
            } else {
                println!();
                println!("Please call `destroy --force` to delete these resources.");
            }
        }
    }
    Ok(())
}
