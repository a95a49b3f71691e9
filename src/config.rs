use std::path::PathBuf;

/// Overrides the scripts directory.
pub const SCRIPTS_DIR_ENV: &str = "ONNX2DML_SCRIPTS_DIR";
/// Installation root; its `scripts` directory holds the `nn/layers` library.
pub const SYSTEMDS_ROOT_ENV: &str = "SYSTEMDS_ROOT";

#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Directory the layer imports resolve against, emitted as `setwd(...)`
    /// whenever a script has imports.
    pub scripts_dir: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> Self {
        Self::resolve(None, |key| std::env::var(key).ok())
    }

    /// Explicit value first, then `ONNX2DML_SCRIPTS_DIR`, then
    /// `$SYSTEMDS_ROOT/scripts`.
    pub fn resolve(explicit: Option<PathBuf>, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let lookup_non_empty = |key: &str| lookup(key).filter(|value| !value.is_empty());
        let scripts_dir = explicit
            .or_else(|| lookup_non_empty(SCRIPTS_DIR_ENV).map(PathBuf::from))
            .or_else(|| lookup_non_empty(SYSTEMDS_ROOT_ENV).map(|root| PathBuf::from(root).join("scripts")));
        Self { scripts_dir }
    }

    pub fn with_scripts_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scripts_dir = Some(dir.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn explicit_dir_wins() {
        let config = Config::resolve(Some("/cli".into()), lookup(&[(SCRIPTS_DIR_ENV, "/env")]));
        assert_eq!(config.scripts_dir, Some(PathBuf::from("/cli")));
    }

    #[test]
    fn scripts_dir_env_before_root() {
        let config = Config::resolve(None, lookup(&[(SCRIPTS_DIR_ENV, "/env"), (SYSTEMDS_ROOT_ENV, "/root")]));
        assert_eq!(config.scripts_dir, Some(PathBuf::from("/env")));
    }

    #[test]
    fn root_gets_scripts_suffix() {
        let config = Config::resolve(None, lookup(&[(SYSTEMDS_ROOT_ENV, "/opt/systemds")]));
        assert_eq!(config.scripts_dir, Some(PathBuf::from("/opt/systemds/scripts")));
    }

    #[test]
    fn empty_values_are_ignored() {
        let config = Config::resolve(None, lookup(&[(SCRIPTS_DIR_ENV, ""), (SYSTEMDS_ROOT_ENV, "")]));
        assert_eq!(config.scripts_dir, None);
    }
}
