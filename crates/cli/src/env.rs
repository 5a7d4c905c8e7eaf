use engine_config::error::ConfigError;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// The variables visible to `${NAME}` references in the properties file:
/// the process environment, optionally overlaid with a `KEY=VALUE` env file
/// (file entries win).
#[derive(Debug, Clone)]
pub struct EnvManager {
    vars: HashMap<String, String>,
}

impl EnvManager {
    pub fn new() -> Self {
        Self {
            vars: std::env::vars().collect(),
        }
    }

    /// Loads variables from an env file over the current set.
    pub fn load_from_file<P: AsRef<Path>>(&mut self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            ConfigError::Malformed(format!("Failed to read env file {}: {e}", path.display()))
        })?;
        self.parse_env_content(&content)
    }

    pub fn vars(&self) -> &HashMap<String, String> {
        &self.vars
    }

    fn parse_env_content(&mut self, content: &str) -> Result<(), ConfigError> {
        for (line_num, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let Some(eq_pos) = line.find('=') else {
                return Err(ConfigError::Malformed(format!(
                    "env file line {} is not KEY=VALUE",
                    line_num + 1
                )));
            };

            let key = line[..eq_pos].trim();
            if key.is_empty() {
                return Err(ConfigError::Malformed(format!(
                    "env file has an empty key at line {}",
                    line_num + 1
                )));
            }

            let value = unquote(line[eq_pos + 1..].trim());
            self.vars.insert(key.to_string(), value);
        }
        Ok(())
    }
}

impl Default for EnvManager {
    fn default() -> Self {
        Self::new()
    }
}

fn unquote(value: &str) -> String {
    if value.len() >= 2
        && ((value.starts_with('"') && value.ends_with('"'))
            || (value.starts_with('\'') && value.ends_with('\'')))
    {
        value[1..value.len() - 1].to_string()
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty() -> EnvManager {
        EnvManager {
            vars: HashMap::new(),
        }
    }

    #[test]
    fn parses_basic_entries() {
        let mut env = empty();
        env.parse_env_content("# comment\nKEY1=value1\nKEY2=value2\n")
            .unwrap();
        assert_eq!(env.vars().get("KEY1").unwrap(), "value1");
        assert_eq!(env.vars().get("KEY2").unwrap(), "value2");
    }

    #[test]
    fn unquotes_values() {
        let mut env = empty();
        env.parse_env_content("QUOTED=\"value with spaces\"\nSINGLE='single quoted'\nBARE=x")
            .unwrap();
        assert_eq!(env.vars().get("QUOTED").unwrap(), "value with spaces");
        assert_eq!(env.vars().get("SINGLE").unwrap(), "single quoted");
        assert_eq!(env.vars().get("BARE").unwrap(), "x");
    }

    #[test]
    fn file_entries_override_earlier_values() {
        let mut env = empty();
        env.parse_env_content("HOST=first\nHOST=second").unwrap();
        assert_eq!(env.vars().get("HOST").unwrap(), "second");
    }

    #[test]
    fn rejects_malformed_lines() {
        assert!(empty().parse_env_content("NOT A PROPERTY").is_err());
        assert!(empty().parse_env_content("=value").is_err());
    }
}
