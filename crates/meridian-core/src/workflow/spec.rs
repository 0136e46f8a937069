//! YAML workflow definitions: templates, steps, and DAG validation.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{MeridianError, Result};

/// A full workflow document as loaded from YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSpec {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Named config templates; a step may reference one via `template`, and
    /// the step's own `config` is merged over the template (step wins).
    #[serde(default)]
    pub templates: HashMap<String, Value>,
    pub steps: Vec<StepSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub step_type: String,
    #[serde(default)]
    pub template: Option<String>,
    #[serde(default)]
    pub config: Value,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default, rename = "if")]
    pub condition: Option<String>,
    #[serde(default)]
    pub outputs: Vec<String>,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    300_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_max_attempts() -> u32 {
    1
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
        }
    }
}

impl WorkflowSpec {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| MeridianError::Config(format!("invalid workflow yaml: {e}")))
    }

    /// Merge each step's template config (if any) under the step's own
    /// `config`, with the step's own keys taking precedence, then validate
    /// the resulting DAG.
    pub fn resolve(mut self) -> Result<ResolvedWorkflow> {
        for step in &mut self.steps {
            if let Some(template_name) = &step.template {
                let template_config = self.templates.get(template_name).ok_or_else(|| {
                    MeridianError::Config(format!(
                        "step {:?} references unknown template {:?}",
                        step.name, template_name
                    ))
                })?;
                step.config = merge_config(template_config, &step.config);
            }
        }

        validate_dag(&self.steps)?;

        Ok(ResolvedWorkflow {
            name: self.name,
            description: self.description,
            steps: self.steps,
        })
    }
}

/// Merge `override_value` over `base`: object keys in `override_value` win,
/// keys present only in `base` are kept, non-object values are replaced
/// wholesale.
fn merge_config(base: &Value, override_value: &Value) -> Value {
    match (base, override_value) {
        (Value::Object(base_map), Value::Object(override_map)) => {
            let mut merged = base_map.clone();
            for (k, v) in override_map {
                merged.insert(k.clone(), v.clone());
            }
            Value::Object(merged)
        }
        (_, Value::Null) => base.clone(),
        _ => override_value.clone(),
    }
}

/// A workflow whose templates have been merged and DAG validated.
#[derive(Debug, Clone)]
pub struct ResolvedWorkflow {
    pub name: String,
    pub description: Option<String>,
    pub steps: Vec<StepSpec>,
}

fn validate_dag(steps: &[StepSpec]) -> Result<()> {
    let names: HashSet<&str> = steps.iter().map(|s| s.name.as_str()).collect();
    if names.len() != steps.len() {
        return Err(MeridianError::Config("duplicate step name in workflow".to_string()));
    }

    let mut position = HashMap::new();
    for (idx, step) in steps.iter().enumerate() {
        position.insert(step.name.as_str(), idx);
    }

    for step in steps {
        for dep in &step.depends_on {
            let Some(&dep_idx) = position.get(dep.as_str()) else {
                return Err(MeridianError::Config(format!(
                    "step {:?} depends_on unknown step {:?}",
                    step.name, dep
                )));
            };
            let step_idx = position[step.name.as_str()];
            if dep_idx >= step_idx {
                return Err(MeridianError::Config(format!(
                    "step {:?} depends_on {:?}, which does not precede it",
                    step.name, dep
                )));
            }
        }
    }

    // Cycle check via Kahn's algorithm, defense-in-depth beyond the
    // precedes-in-list check above (a future relaxation of declaration
    // order should not silently reintroduce cycles).
    let mut indegree: HashMap<&str, usize> =
        steps.iter().map(|s| (s.name.as_str(), s.depends_on.len())).collect();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    for step in steps {
        for dep in &step.depends_on {
            dependents.entry(dep.as_str()).or_default().push(step.name.as_str());
        }
    }

    let mut queue: Vec<&str> = indegree
        .iter()
        .filter(|(_, &deg)| deg == 0)
        .map(|(&name, _)| name)
        .collect();
    let mut visited = 0;
    while let Some(name) = queue.pop() {
        visited += 1;
        if let Some(next) = dependents.get(name) {
            for &dependent in next {
                let deg = indegree.get_mut(dependent).unwrap();
                *deg -= 1;
                if *deg == 0 {
                    queue.push(dependent);
                }
            }
        }
    }

    if visited != steps.len() {
        return Err(MeridianError::Config("workflow step graph contains a cycle".to_string()));
    }

    Ok(())
}
