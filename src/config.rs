//! TOML configuration: store location, scheduler tuning and agents.
//!
//! ```toml
//! [store]
//! data_dir = "./.mindgraph"
//!
//! [scheduler]
//! failure_threshold = 5
//! max_runs_per_tick = 0
//!
//! [[agents]]
//! name = "similarity-closure"
//! period = 1
//! priority = 10
//! pattern = { atom_type = "Similarity", arity = 2 }
//! rule = { kind = "symmetric" }
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::agent::derive::DerivationRule;
use crate::agent::{AgentId, QueryProcessor, QueryProcessorConfig};
use crate::error::{ConfigError, MindResult};
use crate::pattern::Pattern;
use crate::scheduler::{Scheduler, SchedulerConfig};
use crate::store::KnowledgeStore;

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Where the store image lives.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory of the redb image. `None` keeps the store in memory only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
}

/// One `[[agents]]` entry: a [`QueryProcessor`] plus its schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSpecConfig {
    pub name: String,
    #[serde(default = "default_period")]
    pub period: u64,
    #[serde(default)]
    pub priority: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_assertions_per_cycle: Option<usize>,
    #[serde(default)]
    pub pattern: Pattern,
    pub rule: DerivationRule,
}

fn default_period() -> u64 {
    1
}

impl AgentSpecConfig {
    pub fn processor_config(&self) -> QueryProcessorConfig {
        QueryProcessorConfig {
            name: self.name.clone(),
            pattern: self.pattern.clone(),
            rule: self.rule.clone(),
            max_assertions_per_cycle: self.max_assertions_per_cycle,
        }
    }
}

/// Complete configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MindConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub agents: Vec<AgentSpecConfig>,
}

impl MindConfig {
    /// Load and validate a TOML file.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::parse(&content, &path.display().to_string())
    }

    /// Parse and validate TOML text; `origin` names the source in errors.
    pub fn parse(content: &str, origin: &str) -> ConfigResult<Self> {
        let config: MindConfig = toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: origin.to_string(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Save to a TOML file.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let content = toml::to_string_pretty(self).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.display().to_string(),
                source: e,
            })?;
        }
        std::fs::write(path, content).map_err(|e| ConfigError::Write {
            path: path.display().to_string(),
            source: e,
        })
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.scheduler.failure_threshold == 0 {
            return Err(ConfigError::Invalid {
                message: "scheduler.failure_threshold must be at least 1".into(),
            });
        }
        let mut names = HashSet::new();
        for agent in &self.agents {
            if agent.period == 0 {
                return Err(ConfigError::Invalid {
                    message: format!("agent \"{}\": period must be at least 1", agent.name),
                });
            }
            if !names.insert(agent.name.as_str()) {
                return Err(ConfigError::Invalid {
                    message: format!("agent name \"{}\" is used more than once", agent.name),
                });
            }
        }
        Ok(())
    }

    /// Build a scheduler over `store` with every configured agent registered,
    /// in file order.
    pub fn build_scheduler(&self, store: Arc<KnowledgeStore>) -> MindResult<(Scheduler, Vec<AgentId>)> {
        let scheduler = Scheduler::new(store, self.scheduler.clone());
        let mut ids = Vec::with_capacity(self.agents.len());
        for agent in &self.agents {
            let processor = QueryProcessor::from_config(agent.processor_config());
            ids.push(scheduler.register(processor, agent.period, agent.priority)?);
        }
        Ok((scheduler, ids))
    }
}
