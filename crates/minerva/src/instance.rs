use std::env;
use std::path::{Path, PathBuf};

use log::debug;

use super::error::{ConfigurationError, Error};

pub const INSTANCE_ROOT_ENV_VAR: &str = "MINERVA_INSTANCE_ROOT";

/// Directory holding the definitions of a Minerva instance.
///
/// ```text
/// <root>/trend/<trend store>.yaml
/// <root>/materialization/<part>.yaml
/// <root>/relation/<relation>.yaml
/// <root>/aggregation/<aggregation>.yaml
/// ```
#[derive(Debug, Clone)]
pub struct MinervaInstance {
    pub root: PathBuf,
}

impl MinervaInstance {
    #[must_use]
    pub fn new(root: PathBuf) -> MinervaInstance {
        MinervaInstance { root }
    }

    /// Instance at `root` when specified, else at the path in
    /// `MINERVA_INSTANCE_ROOT`, else at the current directory.
    pub fn load(root: Option<&Path>) -> Result<MinervaInstance, Error> {
        let root = match root {
            Some(root) => root.to_path_buf(),
            None => match env::var_os(INSTANCE_ROOT_ENV_VAR) {
                Some(root) => PathBuf::from(root),
                None => env::current_dir().map_err(|e| {
                    ConfigurationError::from_msg(format!(
                        "Could not determine current directory: {e}"
                    ))
                })?,
            },
        };

        if !root.is_dir() {
            return Err(ConfigurationError::from_msg(format!(
                "Instance root '{}' is not a directory",
                root.display()
            ))
            .into());
        }

        debug!("Using instance root '{}'", root.display());

        Ok(MinervaInstance { root })
    }

    pub fn trend_store_file_path(&self, name: &str) -> PathBuf {
        self.root.join("trend").join(format!("{name}.yaml"))
    }

    pub fn materialization_file_path(&self, name: &str) -> PathBuf {
        self.root.join("materialization").join(format!("{name}.yaml"))
    }

    /// `path` relative to the instance root, or unchanged when it is outside
    /// of the instance.
    #[must_use]
    pub fn make_relative(&self, path: &Path) -> PathBuf {
        match path.strip_prefix(&self.root) {
            Ok(relative) => relative.to_path_buf(),
            Err(_) => path.to_path_buf(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn definition_paths() {
        let instance = MinervaInstance::new(PathBuf::from("/srv/minerva"));

        assert_eq!(
            instance.trend_store_file_path("hub_node_15m"),
            PathBuf::from("/srv/minerva/trend/hub_node_15m.yaml")
        );
        assert_eq!(
            instance.materialization_file_path("hub_node_main_1d"),
            PathBuf::from("/srv/minerva/materialization/hub_node_main_1d.yaml")
        );
    }

    #[test]
    fn relative_paths() {
        let instance = MinervaInstance::new(PathBuf::from("/srv/minerva"));

        assert_eq!(
            instance.make_relative(Path::new("/srv/minerva/aggregation/x.yaml")),
            PathBuf::from("aggregation/x.yaml")
        );
        assert_eq!(
            instance.make_relative(Path::new("/tmp/x.yaml")),
            PathBuf::from("/tmp/x.yaml")
        );
    }

    #[test]
    fn explicit_root_must_exist() {
        let instance_root = tempfile::tempdir().unwrap();

        let instance = MinervaInstance::load(Some(instance_root.path())).unwrap();

        assert_eq!(instance.root, instance_root.path());
        assert!(MinervaInstance::load(Some(&instance_root.path().join("missing"))).is_err());
    }
}
