//! Typed runtime configuration assembled from environment variables.
//!
//! A plain struct with manual defaults, no configuration-file crate. Every variable in this
//! module is read once, at process start, by
//! [`Config::from_env`], which fails fast with a specific message naming the offending variable
//! rather than deferring validation to first use.

use std::env;
use std::path::PathBuf;

use crate::errors::PipelineError;

/// Which LLM deployment mode agents should talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelProvider {
    /// A hosted, internet-reachable model provider.
    Online,
    /// A locally hosted/self-served model.
    Local,
}

/// Which fixed Robot Framework library rules bundle [`crate::library_rules`] should hand out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RobotLibrary {
    /// SeleniumLibrary-flavored rules and code-assembly bundle.
    Selenium,
    /// Browser (Playwright-backed) library rules and code-assembly bundle.
    Browser,
}

/// Process-wide configuration, loaded once at startup.
///
/// See [`Config::from_env`] for the full list of recognized environment variables and their
/// defaults.
#[derive(Debug, Clone)]
pub struct Config {
    pub model_provider: ModelProvider,
    pub online_model: String,
    pub local_model: String,
    pub robot_library: RobotLibrary,
    pub max_agent_iterations: u8,
    pub enable_custom_actions: bool,
    pub custom_action_timeout_secs: u32,
    pub max_locator_strategies: u8,
    pub prefer_remote_docker_image: bool,
    pub remote_docker_image: String,
    pub optimization_enabled: bool,
    pub enable_context_pruning: bool,
    pub t_cat: f64,
    pub t_pred: f64,
    pub docker_image_tag: String,
    pub docker_build_context_dir: PathBuf,
    pub robot_tests_dir: PathBuf,
    pub pattern_db_path: PathBuf,
    pub keyword_db_path: PathBuf,
    pub metrics_journal_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            model_provider: ModelProvider::Online,
            online_model: "gpt-5-nano".to_string(),
            local_model: "llama3".to_string(),
            robot_library: RobotLibrary::Browser,
            max_agent_iterations: 3,
            enable_custom_actions: true,
            custom_action_timeout_secs: 5,
            max_locator_strategies: 21,
            prefer_remote_docker_image: true,
            remote_docker_image: "monkscode/nlrf:latest".to_string(),
            optimization_enabled: true,
            enable_context_pruning: true,
            t_cat: 0.8,
            t_pred: 0.7,
            docker_image_tag: "robot-test-runner:latest".to_string(),
            docker_build_context_dir: PathBuf::from("./docker"),
            robot_tests_dir: PathBuf::from("./robot_tests"),
            pattern_db_path: PathBuf::from("./data/patterns.db"),
            keyword_db_path: PathBuf::from("./data/keywords.db"),
            metrics_journal_path: PathBuf::from("./data/metrics_journal.jsonl"),
        }
    }
}

impl Config {
    /// Assemble configuration from environment variables, falling back to [`Config::default`]
    /// values for anything unset. Fails fast with a message naming the offending variable when a
    /// value is present but cannot be parsed, is out of range, or names an unrecognized enum
    /// member.
    pub fn from_env() -> Result<Self, PipelineError> {
        let defaults = Config::default();

        let model_provider = match env_opt("MODEL_PROVIDER")? {
            Some(v) => match v.to_lowercase().as_str() {
                "online" => ModelProvider::Online,
                "local" => ModelProvider::Local,
                other => {
                    return Err(PipelineError::Input(format!(
                        "MODEL_PROVIDER must be 'online' or 'local', got '{other}'"
                    )))
                }
            },
            None => defaults.model_provider,
        };

        let robot_library = match env_opt("ROBOT_LIBRARY")? {
            Some(v) => match v.to_lowercase().as_str() {
                "selenium" => RobotLibrary::Selenium,
                "browser" => RobotLibrary::Browser,
                other => {
                    return Err(PipelineError::Input(format!(
                        "ROBOT_LIBRARY must be 'selenium' or 'browser', got '{other}'"
                    )))
                }
            },
            None => defaults.robot_library,
        };

        let max_agent_iterations =
            parse_ranged_int("MAX_AGENT_ITERATIONS", defaults.max_agent_iterations as i64, 1, 5)?
                as u8;

        let custom_action_timeout_secs = parse_ranged_int(
            "CUSTOM_ACTION_TIMEOUT",
            defaults.custom_action_timeout_secs as i64,
            1,
            i64::from(u32::MAX),
        )? as u32;

        let max_locator_strategies =
            parse_ranged_int("MAX_LOCATOR_STRATEGIES", defaults.max_locator_strategies as i64, 1, 50)?
                as u8;

        Ok(Config {
            model_provider,
            online_model: env_or("ONLINE_MODEL", &defaults.online_model)?,
            local_model: env_or("LOCAL_MODEL", &defaults.local_model)?,
            robot_library,
            max_agent_iterations,
            enable_custom_actions: parse_bool("ENABLE_CUSTOM_ACTIONS", defaults.enable_custom_actions)?,
            custom_action_timeout_secs,
            max_locator_strategies,
            prefer_remote_docker_image: parse_bool(
                "PREFER_REMOTE_DOCKER_IMAGE",
                defaults.prefer_remote_docker_image,
            )?,
            remote_docker_image: env_or("REMOTE_DOCKER_IMAGE", &defaults.remote_docker_image)?,
            optimization_enabled: parse_bool("OPTIMIZATION_ENABLED", defaults.optimization_enabled)?,
            enable_context_pruning: parse_bool(
                "ENABLE_CONTEXT_PRUNING",
                defaults.enable_context_pruning,
            )?,
            t_cat: parse_float("T_CAT", defaults.t_cat)?,
            t_pred: parse_float("T_PRED", defaults.t_pred)?,
            docker_image_tag: env_or("DOCKER_IMAGE_TAG", &defaults.docker_image_tag)?,
            docker_build_context_dir: env_path_or(
                "DOCKER_BUILD_CONTEXT_DIR",
                &defaults.docker_build_context_dir,
            )?,
            robot_tests_dir: env_path_or("ROBOT_TESTS_DIR", &defaults.robot_tests_dir)?,
            pattern_db_path: env_path_or("PATTERN_DB_PATH", &defaults.pattern_db_path)?,
            keyword_db_path: env_path_or("KEYWORD_DB_PATH", &defaults.keyword_db_path)?,
            metrics_journal_path: env_path_or(
                "METRICS_JOURNAL_PATH",
                &defaults.metrics_journal_path,
            )?,
        })
    }

    /// The model identifier to use for the currently configured provider.
    pub fn active_model(&self) -> &str {
        match self.model_provider {
            ModelProvider::Online => &self.online_model,
            ModelProvider::Local => &self.local_model,
        }
    }
}

fn env_opt(name: &str) -> Result<Option<String>, PipelineError> {
    match env::var(name) {
        Ok(v) => Ok(Some(v)),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(env::VarError::NotUnicode(_)) => Err(PipelineError::Input(format!(
            "{name} contains invalid (non-unicode) data"
        ))),
    }
}

fn env_or(name: &str, default: &str) -> Result<String, PipelineError> {
    Ok(env_opt(name)?.unwrap_or_else(|| default.to_string()))
}

fn env_path_or(name: &str, default: &PathBuf) -> Result<PathBuf, PipelineError> {
    Ok(env_opt(name)?
        .map(PathBuf::from)
        .unwrap_or_else(|| default.clone()))
}

fn parse_bool(name: &str, default: bool) -> Result<bool, PipelineError> {
    match env_opt(name)? {
        None => Ok(default),
        Some(v) => match v.to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => Err(PipelineError::Input(format!(
                "{name} must be a boolean, got '{other}'"
            ))),
        },
    }
}

fn parse_float(name: &str, default: f64) -> Result<f64, PipelineError> {
    match env_opt(name)? {
        None => Ok(default),
        Some(v) => v
            .parse::<f64>()
            .map_err(|_| PipelineError::Input(format!("{name} must be a number, got '{v}'"))),
    }
}

fn parse_ranged_int(name: &str, default: i64, min: i64, max: i64) -> Result<i64, PipelineError> {
    match env_opt(name)? {
        None => Ok(default),
        Some(v) => {
            let parsed: i64 = v
                .parse()
                .map_err(|_| PipelineError::Input(format!("{name} must be an integer, got '{v}'")))?;
            if parsed < min || parsed > max {
                return Err(PipelineError::Input(format!(
                    "{name} must be in [{min},{max}], got {parsed}"
                )));
            }
            Ok(parsed)
        }
    }
}
