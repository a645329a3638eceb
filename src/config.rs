//! Configuration management for scanban.
//!
//! The main file is YAML. Every `*.yaml`/`*.yml` file of the drop-in
//! directory is merged on top of it in lexical order. Rules inherit
//! `ip_regex`, `action`, `unban_action`, `bantime` and `threshold` from the
//! top level when they do not set their own.

use anyhow::{bail, Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::actions::ActionMap;
use crate::error::ScanbanError;
use crate::rules::Rule;
use crate::scan::Source;
use crate::unban::DEFAULT_UNBAN_FILE;
use crate::validation::{parse_interval, validate_whitelist_entry};
use crate::whitelist::Whitelist;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/scanban/config.yaml";
pub const DEFAULT_DROPIN_DIR: &str = "/etc/scanban/config.d";

/// Longest accepted ban, in hours (100 years)
pub const MAX_BANTIME_HOURS: u64 = 100 * 365 * 24;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Sources: paths, `docker://<name>`, or `-` for stdin
    pub files: Vec<String>,

    /// IPs and CIDRs that are never banned
    pub whitelist: Vec<String>,

    /// Default IP pattern for rules, first capture group is the IP
    pub ip_regex: String,

    /// Default action names for rules, comma separated
    pub action: String,

    /// Default unban action for rules, an action name or a template
    pub unban_action: String,

    /// Default ban duration in hours
    pub bantime: u64,

    /// Default number of hits suppressed before acting
    pub threshold: u32,

    /// Where pending unbans are persisted
    pub unban_list: PathBuf,

    /// How often due unbans are run
    pub unban_interval: String,

    /// Kill ban/unban commands running longer than this
    pub command_timeout: Option<String>,

    /// Action name to command template
    pub actions: HashMap<String, String>,

    pub rules: Vec<RuleConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            files: Vec::new(),
            whitelist: Vec::new(),
            ip_regex: String::new(),
            action: String::new(),
            unban_action: String::new(),
            bantime: 24,
            threshold: 0,
            unban_list: PathBuf::from(DEFAULT_UNBAN_FILE),
            unban_interval: "1h".to_string(),
            command_timeout: None,
            actions: HashMap::new(),
            rules: Vec::new(),
        }
    }
}

/// One rule as written in the configuration. Unset fields are inherited.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleConfig {
    /// Single body pattern, folded into `patterns`
    pub pattern: String,
    pub patterns: Vec<String>,
    pub ip_regex: Option<String>,
    pub action: Option<String>,
    pub unban_action: Option<String>,
    pub bantime: Option<u64>,
    pub threshold: Option<u32>,
    pub desc: String,
}

impl RuleConfig {
    /// All body patterns, `pattern` last.
    pub fn all_patterns(&self) -> Vec<&str> {
        self.patterns
            .iter()
            .map(String::as_str)
            .chain(Some(self.pattern.as_str()))
            .filter(|p| !p.is_empty())
            .collect()
    }
}

/// Own value unless unset or empty, else the top-level default.
fn inherit<'a>(own: &'a Option<String>, default: &'a str) -> &'a str {
    match own.as_deref() {
        Some(value) if !value.is_empty() => value,
        _ => default,
    }
}

impl Config {
    /// Load configuration from a YAML file and validate it.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Self::read(path.as_ref())?;
        config.validate()?;
        Ok(config)
    }

    /// Load the main file, merge the drop-in directory, then validate.
    pub fn load_with_dropins(path: &Path, dropin_dir: Option<&Path>) -> Result<Self> {
        let mut config = Self::read(path)?;
        if let Some(dir) = dropin_dir {
            config.merge_dropin(dir);
        }
        config.validate()?;
        Ok(config)
    }

    fn read(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        Self::parse(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }

    /// Decode YAML without validating.
    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(content)?;
        Ok(config)
    }

    /// Merge another configuration into this one.
    ///
    /// Whitelist, files and rules are appended; actions override by name.
    pub fn merge(&mut self, other: Config) {
        self.whitelist.extend(other.whitelist);
        self.files.extend(other.files);
        self.rules.extend(other.rules);
        self.actions.extend(other.actions);
    }

    /// Merge every `*.yaml`/`*.yml` file of `dir` in lexical order.
    ///
    /// A file that fails to load is logged and skipped. Returns how many
    /// files were merged.
    pub fn merge_dropin(&mut self, dir: &Path) -> usize {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!("No drop-in directory {}: {}", dir.display(), e);
                return 0;
            }
        };

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file())
            .filter(|p| {
                matches!(
                    p.extension().and_then(|ext| ext.to_str()),
                    Some("yaml") | Some("yml")
                )
            })
            .collect();
        paths.sort();

        let mut merged = 0;
        for path in paths {
            match Self::read(&path) {
                Ok(other) => {
                    self.merge(other);
                    merged += 1;
                    info!("Merged {}", path.display());
                }
                Err(e) => warn!("Failed to merge {}: {:#}", path.display(), e),
            }
        }
        merged
    }

    /// Validate configuration values.
    ///
    /// Malformed intervals, rules without patterns or IP pattern, and invalid
    /// regexes are errors. Unknown action names and malformed whitelist
    /// entries are only warned about.
    pub fn validate(&self) -> Result<()> {
        self.unban_interval()?;
        self.command_timeout()?;

        if self.bantime > MAX_BANTIME_HOURS {
            bail!(ScanbanError::Config(format!(
                "bantime {}h exceeds the maximum of {}h",
                self.bantime, MAX_BANTIME_HOURS
            )));
        }

        for (idx, rule) in self.rules.iter().enumerate() {
            if let Some(bantime) = rule.bantime.filter(|b| *b > MAX_BANTIME_HOURS) {
                bail!(ScanbanError::Config(format!(
                    "rule {} bantime {}h exceeds the maximum of {}h",
                    idx, bantime, MAX_BANTIME_HOURS
                )));
            }
            if rule.all_patterns().is_empty() {
                bail!(ScanbanError::Config(format!("rule {} has no pattern", idx)));
            }
            if inherit(&rule.ip_regex, &self.ip_regex).is_empty() {
                bail!(ScanbanError::Config(format!(
                    "rule {} has no ip_regex and there is no default",
                    idx
                )));
            }

            let action = inherit(&rule.action, &self.action);
            for name in action.split(',').map(str::trim).filter(|n| !n.is_empty()) {
                if !self.actions.contains_key(name) {
                    warn!("Rule {} uses unknown action '{}'", idx, name);
                }
            }
        }

        self.compile()?;

        for entry in &self.whitelist {
            if let Err(e) = validate_whitelist_entry(entry) {
                warn!("Whitelist: {}", e);
            }
        }

        if self.files.is_empty() {
            warn!("No files configured");
        }

        Ok(())
    }

    pub fn unban_interval(&self) -> Result<Duration> {
        Ok(parse_interval(&self.unban_interval)?)
    }

    pub fn command_timeout(&self) -> Result<Option<Duration>> {
        match self.command_timeout.as_deref() {
            Some(t) if !t.is_empty() => Ok(Some(parse_interval(t)?)),
            _ => Ok(None),
        }
    }

    /// A registered action name resolves to its template, anything else is
    /// used as a template as is.
    pub fn resolve_unban_action(&self, value: &str) -> String {
        self.actions
            .get(value.trim())
            .cloned()
            .unwrap_or_else(|| value.to_string())
    }

    /// Compile every rule, inheriting unset fields from the top level.
    pub fn compile(&self) -> std::result::Result<Vec<Rule>, ScanbanError> {
        self.rules
            .iter()
            .enumerate()
            .map(|(idx, rule)| self.compile_rule(idx, rule))
            .collect()
    }

    fn compile_rule(&self, idx: usize, rule: &RuleConfig) -> std::result::Result<Rule, ScanbanError> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|source| ScanbanError::Pattern { rule: idx, source })
        };

        let ip_regex = compile(inherit(&rule.ip_regex, &self.ip_regex))?;
        let patterns = rule
            .all_patterns()
            .into_iter()
            .map(compile)
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let unban_action = inherit(&rule.unban_action, &self.unban_action);

        Ok(Rule::new(ip_regex, patterns)
            .with_action(inherit(&rule.action, &self.action))
            .with_unban_action(self.resolve_unban_action(unban_action))
            .with_bantime(rule.bantime.unwrap_or(self.bantime))
            .with_threshold(rule.threshold.unwrap_or(self.threshold))
            .with_desc(rule.desc.clone()))
    }

    pub fn action_map(&self) -> ActionMap {
        self.actions.clone()
    }

    pub fn whitelist(&self) -> Whitelist {
        Whitelist::new(&self.whitelist)
    }

    pub fn sources(&self) -> Vec<Source> {
        self.files.iter().map(|f| Source::parse(f)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SAMPLE: &str = r#"
files:
  - /var/log/auth.log
  - docker://nginx
whitelist:
  - 127.0.0.1
  - 192.168.1.0/24
ip_regex: '(\d+\.\d+\.\d+\.\d+)'
action: ipsetblock
unban_action: ipsetunblock
bantime: 24
threshold: 3
actions:
  ipsetblock: "ipset add scanban $ip"
  ipsetunblock: "ipset del scanban $ip"
  notify: "notify-send $desc"
rules:
  - pattern: "Failed password"
    desc: ssh brute force
  - patterns: ["wp-login.php", "xmlrpc.php"]
    pattern: "phpmyadmin"
    ip_regex: '^(\S+) '
    action: "ipsetblock,notify"
    unban_action: "iptables -D INPUT -s $ip -j DROP"
    bantime: 12
    threshold: 0
"#;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.bantime, 24);
        assert_eq!(config.unban_list, PathBuf::from(DEFAULT_UNBAN_FILE));
        assert_eq!(config.unban_interval().unwrap(), Duration::from_secs(3600));
        assert_eq!(config.command_timeout().unwrap(), None);
    }

    #[test]
    fn test_parse_and_validate_sample() {
        let config = Config::parse(SAMPLE).unwrap();
        config.validate().unwrap();
        assert_eq!(config.files.len(), 2);
        assert_eq!(config.rules.len(), 2);
        assert_eq!(
            config.sources(),
            vec![
                Source::File(PathBuf::from("/var/log/auth.log")),
                Source::Container("nginx".to_string()),
            ]
        );
    }

    #[test]
    fn test_rules_inherit_defaults() {
        let config = Config::parse(SAMPLE).unwrap();
        let rules = config.compile().unwrap();

        let first = &rules[0];
        assert_eq!(first.action, "ipsetblock");
        assert_eq!(first.unban_action, "ipset del scanban $ip");
        assert_eq!(first.bantime, 24);
        assert_eq!(first.threshold, 3);
        assert_eq!(first.desc, "ssh brute force");
        assert_eq!(first.ip_regex().as_str(), r"(\d+\.\d+\.\d+\.\d+)");
    }

    #[test]
    fn test_rule_overrides_and_pattern_folding() {
        let config = Config::parse(SAMPLE).unwrap();
        let rules = config.compile().unwrap();

        let second = &rules[1];
        assert_eq!(second.action, "ipsetblock,notify");
        assert_eq!(second.unban_action, "iptables -D INPUT -s $ip -j DROP");
        assert_eq!(second.bantime, 12);
        assert_eq!(second.threshold, 0, "explicit zero overrides the default");
        let patterns: Vec<_> = second.patterns().iter().map(|p| p.as_str()).collect();
        assert_eq!(patterns, vec!["wp-login.php", "xmlrpc.php", "phpmyadmin"]);
    }

    #[test]
    fn test_invalid_regex_is_fatal() {
        let mut config = Config::parse(SAMPLE).unwrap();
        config.rules[1].patterns.push("(unclosed".to_string());
        let err = config.validate().unwrap_err();
        let err = err.downcast::<ScanbanError>().unwrap();
        assert!(matches!(err, ScanbanError::Pattern { rule: 1, .. }));
    }

    #[test]
    fn test_rule_without_pattern_is_invalid() {
        let mut config = Config::parse(SAMPLE).unwrap();
        config.rules.push(RuleConfig::default());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rule_without_ip_regex_is_invalid() {
        let mut config = Config::parse(SAMPLE).unwrap();
        config.ip_regex.clear();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("ip_regex"));
    }

    #[test]
    fn test_bad_interval_is_invalid() {
        let mut config = Config::parse(SAMPLE).unwrap();
        config.unban_interval = "soon".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::parse(SAMPLE).unwrap();
        config.command_timeout = Some("30x".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bantime_is_bounded() {
        let mut config = Config::parse(SAMPLE).unwrap();
        config.bantime = MAX_BANTIME_HOURS;
        assert!(config.validate().is_ok());

        config.bantime = 3_000_000_000;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("bantime"));

        let mut config = Config::parse(SAMPLE).unwrap();
        config.rules[1].bantime = Some(MAX_BANTIME_HOURS + 1);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("rule 1 bantime"));
    }

    #[test]
    fn test_unknown_action_and_bad_whitelist_only_warn() {
        let mut config = Config::parse(SAMPLE).unwrap();
        config.action = "missing".to_string();
        config.whitelist.push("10.0.0.0/99".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_resolve_unban_action() {
        let config = Config::parse(SAMPLE).unwrap();
        assert_eq!(
            config.resolve_unban_action("ipsetunblock"),
            "ipset del scanban $ip"
        );
        assert_eq!(config.resolve_unban_action("echo $ip"), "echo $ip");
        assert_eq!(config.resolve_unban_action(""), "");
    }

    #[test]
    fn test_merge_dropin() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("20-web.yaml"),
            "files: [/var/log/nginx/access.log]\nactions:\n  ipsetblock: \"ipset add web $ip\"\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("10-office.yml"),
            "whitelist: [10.1.0.0/16]\nrules:\n  - pattern: \"Invalid user\"\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("30-broken.yaml"), "files: [unclosed\n").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "not: [merged]\n").unwrap();

        let mut config = Config::parse(SAMPLE).unwrap();
        assert_eq!(config.merge_dropin(dir.path()), 2);

        assert_eq!(config.files.len(), 3);
        assert_eq!(config.whitelist.last().unwrap(), "10.1.0.0/16");
        assert_eq!(config.rules.len(), 3);
        assert_eq!(config.actions["ipsetblock"], "ipset add web $ip");

        // Drop-in rules inherit from the main file
        let rules = config.compile().unwrap();
        assert_eq!(rules[2].threshold, 3);
        assert_eq!(rules[2].action, "ipsetblock");
    }

    #[test]
    fn test_merge_dropin_missing_dir() {
        let mut config = Config::default();
        assert_eq!(config.merge_dropin(Path::new("/nonexistent/scanban.d")), 0);
    }

    #[test]
    fn test_load_with_dropins() {
        let dir = TempDir::new().unwrap();
        let main = dir.path().join("config.yaml");
        std::fs::write(&main, SAMPLE).unwrap();
        let dropins = dir.path().join("config.d");
        std::fs::create_dir(&dropins).unwrap();
        std::fs::write(dropins.join("extra.yaml"), "files: [\"-\"]\n").unwrap();

        let config = Config::load_with_dropins(&main, Some(&dropins)).unwrap();
        assert_eq!(config.sources().last(), Some(&Source::Stdin));
    }

    #[test]
    fn test_load_missing_file() {
        let err = Config::load("/nonexistent/scanban.yaml").unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
