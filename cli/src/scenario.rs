//! Scenario files: a class hierarchy, some call sites and a script of calls
//! and method-table mutations to push through them.
//!
//! ```toml
//! [[class]]
//! name = "Dog"
//!
//! [[method]]
//! class = "Dog"
//! name = "speak"
//! returns = '"woof"'
//!
//! [[site]]
//! name = "speak"
//!
//! [[step]]
//! op = "call"
//! site = "speak"
//! receiver = "new Dog"
//! expect = '"woof"'
//! ```

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use sendcache_core::{
    CallSite, ChainReport, ClassId, ClassRegistry, DispatchConfig, DispatchContext, MethodDef, MethodResolver,
    MissingBehavior, Outcome, SiteOptions, Value,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Scenario {
    /// Dispatch settings; `--config` and `--max-chain-length` take precedence.
    #[serde(default)]
    pub config: Option<DispatchConfig>,
    #[serde(default, rename = "class")]
    pub classes: Vec<ClassSpec>,
    #[serde(default, rename = "method")]
    pub methods: Vec<MethodSpec>,
    #[serde(default, rename = "site")]
    pub sites: Vec<SiteSpec>,
    #[serde(default, rename = "step")]
    pub steps: Vec<StepSpec>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClassSpec {
    pub name: String,
    pub superclass: Option<String>,
    /// Lookups on this class are never cached.
    #[serde(default)]
    pub uncacheable: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MethodSpec {
    pub class: String,
    pub name: String,
    /// Receiver-literal syntax, e.g. `'"text"'`, `"42"`, `":sym"`.
    pub returns: Option<String>,
    /// Fail with this message instead of returning.
    pub fails: Option<String>,
    #[serde(default)]
    pub private: bool,
    #[serde(default)]
    pub always_clone: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionSpec {
    #[default]
    Invoke,
    Probe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingSpec {
    MethodMissing,
    ReturnMissing,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SiteSpec {
    pub name: String,
    /// Message sent by the site; defaults to the site name.
    pub method: Option<String>,
    #[serde(default)]
    pub action: ActionSpec,
    /// Defaults to `method_missing` for invoke sites and `return_missing`
    /// for probe sites.
    pub missing: Option<MissingSpec>,
    #[serde(default)]
    pub ignore_visibility: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum StepSpec {
    Call {
        site: String,
        receiver: String,
        #[serde(default)]
        args: Vec<String>,
        /// Dynamic message name (`send`-style); defaults to the site's method.
        send: Option<String>,
        expect: Option<String>,
    },
    Define(MethodSpec),
    Remove {
        class: String,
        name: String,
    },
}

impl Scenario {
    pub fn from_toml_str(source: &str) -> Result<Self> {
        toml::from_str(source).context("invalid scenario")
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = fs::read_to_string(path).with_context(|| format!("failed to read scenario {}", path.display()))?;
        Self::from_toml_str(&source).with_context(|| format!("in {}", path.display()))
    }

    /// Validate every reference and literal without performing any call.
    pub fn check(&self) -> Result<Summary> {
        let world = World::build(self, &self.config.clone().unwrap_or_default())?;
        for (index, step) in self.steps.iter().enumerate() {
            world.check_step(step).with_context(|| format!("step {}", index + 1))?;
        }
        Ok(Summary {
            classes: self.classes.len(),
            methods: self.methods.len(),
            sites: self.sites.len(),
            steps: self.steps.len(),
        })
    }

    pub fn run(&self, config: &DispatchConfig) -> Result<RunReport> {
        let world = World::build(self, config)?;
        let mut steps = Vec::with_capacity(self.steps.len());
        for (index, step) in self.steps.iter().enumerate() {
            let report = world.run_step(index + 1, step).with_context(|| format!("step {}", index + 1))?;
            steps.push(report);
        }
        let sites = world.sites.iter().map(|(_, site)| world.describe(site)).collect();
        Ok(RunReport {
            max_chain_length: config.max_chain_length,
            steps,
            sites,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub classes: usize,
    pub methods: usize,
    pub sites: usize,
    pub steps: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub max_chain_length: usize,
    pub steps: Vec<StepReport>,
    pub sites: Vec<ChainReport>,
}

impl RunReport {
    pub fn mismatches(&self) -> usize {
        self.steps.iter().filter(|step| step.matched == Some(false)).count()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub index: usize,
    pub description: String,
    pub result: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched: Option<bool>,
}

/// Registry and call sites materialized from a scenario.
struct World {
    registry: Arc<ClassRegistry>,
    sites: Vec<(String, CallSite)>,
    site_index: HashMap<String, usize>,
}

impl World {
    fn build(scenario: &Scenario, config: &DispatchConfig) -> Result<Self> {
        let registry = Arc::new(ClassRegistry::new());
        for class in &scenario.classes {
            let superclass = class.superclass.as_deref().map(|name| lookup_class(&registry, name)).transpose()?;
            let id = registry
                .define_class(&class.name, superclass)
                .with_context(|| format!("class {}", class.name))?;
            if class.uncacheable {
                registry.set_cacheable(id, false)?;
            }
        }
        for method in &scenario.methods {
            define(&registry, method).with_context(|| format!("method {}#{}", method.class, method.name))?;
        }

        let ctx = DispatchContext::direct(registry.clone(), config.clone());
        let mut sites = Vec::with_capacity(scenario.sites.len());
        let mut site_index = HashMap::new();
        for spec in &scenario.sites {
            if site_index.insert(spec.name.clone(), sites.len()).is_some() {
                bail!("duplicate site {}", spec.name);
            }
            let message = spec.method.as_deref().unwrap_or(&spec.name);
            sites.push((spec.name.clone(), CallSite::with_options(message, site_options(spec), &ctx)));
        }
        Ok(Self {
            registry,
            sites,
            site_index,
        })
    }

    fn site(&self, name: &str) -> Result<&CallSite> {
        self.site_index
            .get(name)
            .map(|&index| &self.sites[index].1)
            .ok_or_else(|| anyhow!("unknown site {name}"))
    }

    fn check_step(&self, step: &StepSpec) -> Result<()> {
        match step {
            StepSpec::Call { site, receiver, args, .. } => {
                self.site(site)?;
                parse_literal(&self.registry, receiver)?;
                for arg in args {
                    parse_literal(&self.registry, arg)?;
                }
            }
            StepSpec::Define(method) => {
                lookup_class(&self.registry, &method.class)?;
                method_def(&self.registry, method)?;
            }
            StepSpec::Remove { class, .. } => {
                lookup_class(&self.registry, class)?;
            }
        }
        Ok(())
    }

    fn run_step(&self, index: usize, step: &StepSpec) -> Result<StepReport> {
        match step {
            StepSpec::Call {
                site: site_name,
                receiver,
                args,
                send,
                expect,
            } => {
                let site = self.site(site_name)?;
                let receiver_value = parse_literal(&self.registry, receiver)?;
                let arg_values = args
                    .iter()
                    .map(|arg| parse_literal(&self.registry, arg))
                    .collect::<Result<Vec<_>>>()?;
                let message = send.as_deref().unwrap_or(site.name());
                let outcome = site.send(message, &receiver_value, &arg_values, None);
                let result = match outcome {
                    Ok(outcome) => render_outcome(&outcome),
                    Err(err) => format!("error: {err}"),
                };
                debug!(target: "sendcache::cli", step = index, site = %site_name, %result, "call");
                let matched = expect.as_ref().map(|expected| *expected == result);
                Ok(StepReport {
                    index,
                    description: format!("{site_name}: {message}({receiver}{})", render_args(args)),
                    result,
                    expected: expect.clone(),
                    matched,
                })
            }
            StepSpec::Define(method) => {
                define(&self.registry, method)?;
                Ok(StepReport {
                    index,
                    description: format!("define {}#{}", method.class, method.name),
                    result: "ok".to_string(),
                    expected: None,
                    matched: None,
                })
            }
            StepSpec::Remove { class, name } => {
                let id = lookup_class(&self.registry, class)?;
                let removed = self.registry.remove_method(id, name)?;
                Ok(StepReport {
                    index,
                    description: format!("remove {class}#{name}"),
                    result: if removed { "ok" } else { "not defined" }.to_string(),
                    expected: None,
                    matched: None,
                })
            }
        }
    }

    fn describe(&self, site: &CallSite) -> ChainReport {
        let mut report = site.describe();
        // Shapes of object receivers print as class ids; show class names instead.
        for branch in report.nodes.iter_mut().flat_map(|node| node.branches.iter_mut()) {
            if let Some(id) = branch.shape.strip_prefix("class #").and_then(|id| id.parse().ok()) {
                branch.shape = self.registry.class_name(ClassId(id)).to_string();
            }
        }
        report
    }
}

fn site_options(spec: &SiteSpec) -> SiteOptions {
    let base = match spec.action {
        ActionSpec::Invoke => SiteOptions::default(),
        ActionSpec::Probe => SiteOptions::probe(),
    };
    let base = match spec.missing {
        Some(MissingSpec::MethodMissing) => base.with_missing(MissingBehavior::CallMethodMissing),
        Some(MissingSpec::ReturnMissing) => base.with_missing(MissingBehavior::ReturnMissing),
        None => base,
    };
    base.with_ignore_visibility(spec.ignore_visibility)
}

fn lookup_class(registry: &ClassRegistry, name: &str) -> Result<ClassId> {
    registry.class_id(name).ok_or_else(|| anyhow!("unknown class {name}"))
}

fn method_def(registry: &ClassRegistry, spec: &MethodSpec) -> Result<MethodDef> {
    let def = match (&spec.returns, &spec.fails) {
        (Some(literal), None) => MethodDef::constant(&spec.name, parse_literal(registry, literal)?),
        (None, Some(message)) => {
            let message = message.clone();
            MethodDef::new(&spec.name, move |_, _, _| Err(anyhow!("{message}")))
        }
        (Some(_), Some(_)) => bail!("`returns` and `fails` are mutually exclusive"),
        (None, None) => bail!("one of `returns` or `fails` is required"),
    };
    let def = if spec.private { def.private() } else { def };
    Ok(if spec.always_clone { def.always_clone() } else { def })
}

fn define(registry: &ClassRegistry, spec: &MethodSpec) -> Result<()> {
    let class = lookup_class(registry, &spec.class)?;
    registry.define_method(class, method_def(registry, spec)?)?;
    Ok(())
}

/// Parse a receiver/argument literal: `nil`, `true`, `false`, integers,
/// floats, `:symbol`, `"string"` or `new ClassName`.
pub fn parse_literal(registry: &ClassRegistry, raw: &str) -> Result<Value> {
    let text = raw.trim();
    let value = match text {
        "nil" => Value::Nil,
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => {
            if let Some(class) = text.strip_prefix("new ") {
                Value::object(lookup_class(registry, class.trim())?)
            } else if let Some(symbol) = text.strip_prefix(':') {
                if symbol.is_empty() {
                    bail!("empty symbol literal");
                }
                Value::symbol(symbol)
            } else if let Some(body) = text.strip_prefix('"').and_then(|rest| rest.strip_suffix('"')) {
                Value::str(body)
            } else if let Ok(int) = text.parse::<i64>() {
                Value::Int(int)
            } else if let Ok(float) = text.parse::<f64>() {
                Value::Float(float)
            } else {
                bail!("invalid literal `{raw}`");
            }
        }
    };
    Ok(value)
}

fn render_outcome(outcome: &Outcome) -> String {
    match outcome {
        Outcome::Returned(value) => value.to_string(),
        Outcome::Responds(responds) => format!("responds {responds}"),
        Outcome::Missing => "missing".to_string(),
    }
}

fn render_args(args: &[String]) -> String {
    if args.is_empty() {
        String::new()
    } else {
        format!(", {}", args.join(", "))
    }
}
