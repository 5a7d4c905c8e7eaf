use crate::error::ConfigError;
use std::collections::HashMap;
use std::fmt::Display;
use std::path::Path;
use std::str::FromStr;

/// A parsed `key=value` properties file. Entries keep file order, which is
/// significant for ordered maps such as the column mapping.
#[derive(Debug, Clone, Default)]
pub struct Properties {
    entries: Vec<(String, String)>,
}

impl Properties {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Self::load_with_vars(path, &process_env())
    }

    /// Loads the file, resolving `${NAME}` references against `vars` (the
    /// process environment, optionally overlaid with an env file).
    pub fn load_with_vars<P: AsRef<Path>>(
        path: P,
        vars: &HashMap<String, String>,
    ) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse_with_vars(&content, vars)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Self::parse_with_vars(content, &process_env())
    }

    pub fn parse_with_vars(
        content: &str,
        vars: &HashMap<String, String>,
    ) -> Result<Self, ConfigError> {
        let mut entries = Vec::new();

        for (line_num, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let Some(eq_pos) = line.find('=') else {
                return Err(ConfigError::Malformed(format!(
                    "line {} is not KEY=VALUE",
                    line_num + 1
                )));
            };

            let key = line[..eq_pos].trim();
            if key.is_empty() {
                return Err(ConfigError::Malformed(format!(
                    "empty key at line {}",
                    line_num + 1
                )));
            }

            let raw = unquote(line[eq_pos + 1..].trim());
            let value = expand_vars(key, &raw, vars)?;
            entries.push((key.to_string(), value));
        }

        Ok(Properties { entries })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        // Last occurrence wins, matching java-properties behavior.
        self.entries
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    pub fn require(&self, key: &str) -> Result<&str, ConfigError> {
        self.get(key)
            .ok_or_else(|| ConfigError::MissingKey(key.to_string()))
    }

    pub fn get_parse<T>(&self, key: &str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        match self.get(key) {
            None => Ok(None),
            Some(raw) => raw
                .parse::<T>()
                .map(Some)
                .map_err(|e| ConfigError::invalid(key, e.to_string())),
        }
    }

    pub fn get_parse_or<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        Ok(self.get_parse(key)?.unwrap_or(default))
    }

    pub fn get_bool(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => match raw.to_ascii_lowercase().as_str() {
                "true" => Ok(true),
                "false" => Ok(false),
                other => Err(ConfigError::invalid(key, format!("{other} is not a boolean"))),
            },
        }
    }

    /// All entries under `prefix.`, with the prefix stripped, in file order.
    pub fn with_prefix(&self, prefix: &str) -> Vec<(String, String)> {
        let dotted = format!("{prefix}.");
        self.entries
            .iter()
            .filter_map(|(k, v)| {
                k.strip_prefix(&dotted)
                    .map(|rest| (rest.to_string(), v.clone()))
            })
            .collect()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }
}

fn unquote(value: &str) -> String {
    if value.len() >= 2
        && ((value.starts_with('"') && value.ends_with('"'))
            || (value.starts_with('\'') && value.ends_with('\'')))
    {
        return value[1..value.len() - 1].to_string();
    }
    value.to_string()
}

fn process_env() -> HashMap<String, String> {
    std::env::vars().collect()
}

/// Expands `${NAME}` references from `vars`. A referenced but unset variable
/// is a configuration error, not an empty string.
fn expand_vars(
    key: &str,
    value: &str,
    vars: &HashMap<String, String>,
) -> Result<String, ConfigError> {
    if !value.contains("${") {
        return Ok(value.to_string());
    }

    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let tail = &rest[start + 2..];
        let Some(end) = tail.find('}') else {
            return Err(ConfigError::invalid(key, "unterminated ${ reference"));
        };
        let name = &tail[..end];
        match vars.get(name) {
            Some(v) => out.push_str(v),
            None => {
                return Err(ConfigError::invalid(
                    key,
                    format!("environment variable {name} is not set"),
                ));
            }
        }
        rest = &tail[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_basic_entries() {
        let props = Properties::parse(
            r#"
# comment
target.hosts=a,b,c
insert.mode=COPY
        "#,
        )
        .unwrap();
        assert_eq!(props.get("target.hosts"), Some("a,b,c"));
        assert_eq!(props.get("insert.mode"), Some("COPY"));
        assert_eq!(props.get("missing"), None);
    }

    #[test]
    fn unquotes_values() {
        let props = Properties::parse("a=\"with spaces\"\nb='single'\nc=bare").unwrap();
        assert_eq!(props.get("a"), Some("with spaces"));
        assert_eq!(props.get("b"), Some("single"));
        assert_eq!(props.get("c"), Some("bare"));
    }

    #[test]
    fn last_occurrence_wins() {
        let props = Properties::parse("k=first\nk=second").unwrap();
        assert_eq!(props.get("k"), Some("second"));
    }

    #[test]
    fn prefix_scan_preserves_file_order() {
        let props =
            Properties::parse("table.columnMapping.zeta=z\ntable.columnMapping.alpha=a").unwrap();
        let mapping = props.with_prefix("table.columnMapping");
        assert_eq!(
            mapping,
            vec![
                ("zeta".to_string(), "z".to_string()),
                ("alpha".to_string(), "a".to_string())
            ]
        );
    }

    #[test]
    fn rejects_malformed_lines() {
        assert!(Properties::parse("NOT A PROPERTY").is_err());
        assert!(Properties::parse("=value").is_err());
    }

    #[test]
    fn expands_environment_references() {
        unsafe { std::env::set_var("CARAVAN_TEST_PW", "s3cret") };
        let props = Properties::parse("target.password=${CARAVAN_TEST_PW}").unwrap();
        assert_eq!(props.get("target.password"), Some("s3cret"));

        assert!(Properties::parse("x=${CARAVAN_TEST_UNSET_VAR}").is_err());
    }

    #[test]
    fn explicit_vars_overlay_the_process_environment() {
        unsafe { std::env::set_var("CARAVAN_TEST_HOST", "from-process") };
        let mut vars = super::process_env();
        vars.insert("CARAVAN_TEST_HOST".to_string(), "from-file".to_string());
        vars.insert("CARAVAN_TEST_ONLY_FILE".to_string(), "extra".to_string());

        let props = Properties::parse_with_vars(
            "a=${CARAVAN_TEST_HOST}\nb=${CARAVAN_TEST_ONLY_FILE}",
            &vars,
        )
        .unwrap();
        assert_eq!(props.get("a"), Some("from-file"));
        assert_eq!(props.get("b"), Some("extra"));
    }
}
