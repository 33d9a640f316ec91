use std::collections::HashMap;
use std::fs;
use std::path::Path;
use log::{debug, info, LevelFilter};
use serde::{Deserialize, Serialize};
use env_logger::{Builder, Target, WriteStyle};
use std::io::Write;

/// Logging subsystems that can get their own level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoggingSubsystem {
    /// Everything in this crate
    #[serde(rename = "main")]
    Main,
    /// Session facade, connection handles and the reconciler
    #[serde(rename = "session")]
    Session,
    /// Background state monitor
    #[serde(rename = "monitor")]
    Monitor,
    /// Queue cache
    #[serde(rename = "queue")]
    Queue,
    /// MPD transport
    #[serde(rename = "transport")]
    Transport,
    /// Third-party dependencies
    #[serde(rename = "deps")]
    Dependencies,
}

impl LoggingSubsystem {
    /// Module prefixes covered by this subsystem, comma separated
    pub fn module_prefix(&self) -> &'static str {
        match self {
            LoggingSubsystem::Main => "mpdsession",
            LoggingSubsystem::Session => "mpdsession::session::session,mpdsession::session::connection,mpdsession::session::reconciler",
            LoggingSubsystem::Monitor => "mpdsession::session::monitor",
            LoggingSubsystem::Queue => "mpdsession::session::queue",
            LoggingSubsystem::Transport => "mpdsession::transport",
            LoggingSubsystem::Dependencies => "mpd",
        }
    }

    pub fn all() -> Vec<LoggingSubsystem> {
        vec![
            LoggingSubsystem::Main,
            LoggingSubsystem::Session,
            LoggingSubsystem::Monitor,
            LoggingSubsystem::Queue,
            LoggingSubsystem::Transport,
            LoggingSubsystem::Dependencies,
        ]
    }

    fn parse(name: &str) -> Option<LoggingSubsystem> {
        match name.to_lowercase().as_str() {
            "main" => Some(LoggingSubsystem::Main),
            "session" => Some(LoggingSubsystem::Session),
            "monitor" => Some(LoggingSubsystem::Monitor),
            "queue" => Some(LoggingSubsystem::Queue),
            "transport" => Some(LoggingSubsystem::Transport),
            "deps" | "dependencies" => Some(LoggingSubsystem::Dependencies),
            _ => None,
        }
    }
}

/// Logging configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Global log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// stdout or stderr
    #[serde(default = "default_target")]
    pub target: String,

    #[serde(default = "default_timestamps")]
    pub timestamps: bool,

    #[serde(default = "default_colors")]
    pub colors: bool,

    /// Subsystem-specific log levels, unknown names are used as module paths
    #[serde(default)]
    pub subsystems: HashMap<String, String>,

    #[serde(default)]
    pub include_module_path: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_target() -> String {
    "stderr".to_string()
}

fn default_timestamps() -> bool {
    true
}

fn default_colors() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
            target: default_target(),
            timestamps: default_timestamps(),
            colors: default_colors(),
            subsystems: HashMap::new(),
            include_module_path: false,
        }
    }
}

impl LoggingConfig {
    /// Load logging configuration from a file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, String> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| format!("Failed to read logging config file: {}", e))?;
        Self::from_json(&content)
    }

    pub fn from_json(json: &str) -> Result<Self, String> {
        serde_json::from_str(json)
            .map_err(|e| format!("Failed to parse logging config JSON: {}", e))
    }

    fn parse_log_level(level: &str) -> LevelFilter {
        match level.to_lowercase().as_str() {
            "off" => LevelFilter::Off,
            "error" => LevelFilter::Error,
            "warn" => LevelFilter::Warn,
            "info" => LevelFilter::Info,
            "debug" => LevelFilter::Debug,
            "trace" => LevelFilter::Trace,
            _ => {
                eprintln!("Warning: Unknown log level '{}', defaulting to 'info'", level);
                LevelFilter::Info
            }
        }
    }

    /// (module, level) pairs for every configured subsystem, sorted by module
    fn module_filters(&self) -> Vec<(String, String)> {
        let mut filters = Vec::new();
        for (name, level) in &self.subsystems {
            match LoggingSubsystem::parse(name) {
                Some(subsystem) => {
                    for prefix in subsystem.module_prefix().split(',') {
                        filters.push((prefix.trim().to_string(), level.clone()));
                    }
                }
                None => filters.push((name.clone(), level.clone())),
            }
        }
        filters.sort();
        filters
    }

    /// Filter string in env_logger syntax
    pub fn build_filter_string(&self) -> String {
        let mut parts = vec![self.level.clone()];
        parts.extend(self.module_filters().into_iter().map(|(module, level)| format!("{}={}", module, level)));
        parts.join(",")
    }

    pub fn initialize_logger(&self) -> Result<(), String> {
        let filter_string = self.build_filter_string();
        debug!("Using logging filter: {}", filter_string);

        let mut builder = Builder::new();
        builder.parse_env("RUST_LOG");
        builder.filter(None, Self::parse_log_level(&self.level));
        for (module, level) in self.module_filters() {
            builder.filter(Some(&module), Self::parse_log_level(&level));
        }

        builder.write_style(if self.colors { WriteStyle::Auto } else { WriteStyle::Never });

        match self.target.to_lowercase().as_str() {
            "stdout" => {
                builder.target(Target::Stdout);
            }
            "stderr" => {
                builder.target(Target::Stderr);
            }
            _ => return Err(format!("Unknown logging target: {}", self.target)),
        }

        let timestamps = self.timestamps;
        let include_module_path = self.include_module_path;
        builder.format(move |buf, record| {
            let mut output = String::new();
            if timestamps {
                output.push_str(&format!("[{}] ", chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f")));
            }
            output.push_str(&format!("[{}] ", record.level()));
            if include_module_path {
                if let Some(module) = record.module_path() {
                    output.push_str(&format!("[{}] ", module));
                }
            }
            output.push_str(&format!("{}", record.args()));
            writeln!(buf, "{}", output)
        });

        builder.try_init()
            .map_err(|e| format!("Failed to initialize logger: {}", e))?;

        info!("Logging initialized with filter: {}", filter_string);
        Ok(())
    }
}

/// Initialize logging from a configuration file path
pub fn initialize_logging_from_file<P: AsRef<Path>>(config_path: P) -> Result<(), String> {
    LoggingConfig::from_file(config_path)?.initialize_logger()
}

/// Initialize logging with default configuration
pub fn initialize_default_logging() -> Result<(), String> {
    LoggingConfig::default().initialize_logger()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_filter_string_expands_subsystems() {
        let mut config = LoggingConfig::default();
        config.level = "warn".to_string();
        config.subsystems.insert("monitor".to_string(), "trace".to_string());
        config.subsystems.insert("mpd".to_string(), "error".to_string());

        assert_eq!(
            config.build_filter_string(),
            "warn,mpd=error,mpdsession::session::monitor=trace"
        );
    }

    #[test]
    fn test_session_subsystem_covers_several_modules() {
        let prefixes: Vec<_> = LoggingSubsystem::Session.module_prefix().split(',').collect();
        assert_eq!(prefixes.len(), 3);
        assert!(LoggingSubsystem::all().contains(&LoggingSubsystem::Queue));
    }

    #[test]
    fn test_from_file_applies_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "level": "debug", "subsystems": {{ "queue": "trace" }} }}"#).unwrap();

        let config = LoggingConfig::from_file(file.path()).unwrap();
        assert_eq!(config.level, "debug");
        assert_eq!(config.target, "stderr");
        assert!(config.timestamps);
        assert_eq!(config.subsystems.get("queue").map(String::as_str), Some("trace"));
    }

    #[test]
    #[serial]
    fn test_unknown_target_is_rejected() {
        let config = LoggingConfig {
            target: "syslog".to_string(),
            ..Default::default()
        };
        assert!(config.initialize_logger().is_err());
    }
}
