//! Configuration loading helpers
//!
//! Services describe their configuration as serde structs and load them
//! here. Merge order: config file (format picked by extension), then
//! environment variables with the service prefix. Later sources win.

use std::path::Path;

use figment::providers::{Env, Format, Json, Toml, Yaml};
use figment::Figment;
use serde::de::DeserializeOwned;

use errors::{EdgeError, EdgeResult};

/// Load a service configuration from `path`, overridable via `PREFIX_`
/// environment variables (figment nested keys, e.g. `BRIDGESRV_CYCLE_MS`).
pub fn load_config<T, P>(path: P, env_prefix: &str) -> EdgeResult<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let extension = path
        .extension()
        .and_then(|s| s.to_str())
        .ok_or_else(|| EdgeError::config(format!("Invalid config extension: {}", path.display())))?;

    let figment = match extension {
        "json" => Figment::new().merge(Json::file(path)),
        "toml" => Figment::new().merge(Toml::file(path)),
        "yaml" | "yml" => Figment::new().merge(Yaml::file(path)),
        other => {
            return Err(EdgeError::config(format!(
                "Unsupported config format: {other}"
            )))
        },
    };

    figment
        .merge(Env::prefixed(env_prefix))
        .extract()
        .map_err(|e| EdgeError::config(format!("Failed to parse config: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::io::Write;

    #[derive(Debug, Deserialize)]
    struct DemoConfig {
        cycle_ms: u64,
        name: String,
    }

    #[test]
    fn test_load_yaml() {
        let mut f = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(f, "cycle_ms: 1000\nname: edge0").unwrap();

        let cfg: DemoConfig = load_config(f.path(), "DEMOCFG_").unwrap();
        assert_eq!(cfg.cycle_ms, 1000);
        assert_eq!(cfg.name, "edge0");
    }

    #[test]
    fn test_unsupported_extension() {
        let f = tempfile::Builder::new().suffix(".ini").tempfile().unwrap();
        let result: EdgeResult<DemoConfig> = load_config(f.path(), "DEMOCFG_");
        assert!(matches!(result, Err(EdgeError::Configuration(_))));
    }
}
