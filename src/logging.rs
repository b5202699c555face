//! Logging setup.
//!
//! Everything logs through the `log` macros. At startup the binary builds one
//! `simplelog` logger per configured target override plus a main logger for the
//! rest, so each module can be filtered to its own level or muted entirely.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use simplelog::{
    ColorChoice, CombinedLogger, ConfigBuilder, LevelFilter, SharedLogger, TermLogger,
    TerminalMode, WriteLogger,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// Level for every target without an override
    pub level: String,
    /// Log to this file instead of stderr
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
    /// Per-target overrides, e.g. `textmark::matcher: trace`
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub target_levels: BTreeMap<String, String>,
    /// Targets whose messages are dropped
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub muted_targets: Vec<String>,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            target_levels: BTreeMap::new(),
            muted_targets: Vec::new(),
        }
    }
}

/// One logger of the combined set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggerPlan {
    pub level: LevelFilter,
    pub allow: Vec<String>,
    pub ignore: Vec<String>,
}

pub fn parse_level(level: &str) -> Result<LevelFilter> {
    level
        .trim()
        .parse::<LevelFilter>()
        .with_context(|| format!("Unknown log level {level:?}"))
}

/// Works out the loggers for `settings`: one per target override, then the
/// main logger which ignores overridden and muted targets.
pub fn plan_loggers(settings: &LogSettings) -> Result<Vec<LoggerPlan>> {
    let mut plans = Vec::new();
    for (target, level) in &settings.target_levels {
        if settings.muted_targets.contains(target) {
            continue;
        }
        plans.push(LoggerPlan {
            level: parse_level(level)?,
            allow: vec![target.clone()],
            ignore: Vec::new(),
        });
    }

    let ignore = settings
        .target_levels
        .keys()
        .chain(settings.muted_targets.iter())
        .cloned()
        .collect();
    plans.push(LoggerPlan {
        level: parse_level(&settings.level)?,
        allow: Vec::new(),
        ignore,
    });
    Ok(plans)
}

fn build_config(plan: &LoggerPlan) -> simplelog::Config {
    let mut builder = ConfigBuilder::new();
    for target in &plan.allow {
        builder.add_filter_allow(target.clone());
    }
    for target in &plan.ignore {
        builder.add_filter_ignore(target.clone());
    }
    builder.build()
}

/// Installs the global logger. Can only succeed once per process.
pub fn init_logging(settings: &LogSettings) -> Result<()> {
    let plans = plan_loggers(settings)?;
    let file = match &settings.file {
        Some(path) => Some(
            File::create(path).with_context(|| format!("Failed to create log file {path:?}"))?,
        ),
        None => None,
    };

    let mut loggers: Vec<Box<dyn SharedLogger>> = Vec::with_capacity(plans.len());
    for plan in &plans {
        let config = build_config(plan);
        match &file {
            Some(file) => {
                let writer = file.try_clone().context("Failed to share log file handle")?;
                loggers.push(WriteLogger::new(plan.level, config, writer));
            }
            None => loggers.push(TermLogger::new(
                plan.level,
                config,
                TerminalMode::Stderr,
                ColorChoice::Auto,
            )),
        }
    }

    CombinedLogger::init(loggers).context("Logger already initialized")
}
