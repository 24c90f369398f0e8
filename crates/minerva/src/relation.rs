use std::fmt;
use std::path::{Path, PathBuf};

use log::info;
use serde::{Deserialize, Serialize};

use super::error::{ConfigurationError, Error};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Relation {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_entity_type: Option<String>,
    pub target_entity_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Relation({})", &self.name)
    }
}

/// Source of relation definitions by name.
pub trait RelationLookup {
    fn relation(&self, name: &str) -> Result<Relation, Error>;
}

/// Relations defined in the `relation` directory of an instance.
pub struct RelationDirectory {
    pub instance_root: PathBuf,
}

impl RelationLookup for RelationDirectory {
    fn relation(&self, name: &str) -> Result<Relation, Error> {
        load_relation(&self.instance_root, name)
    }
}

impl RelationLookup for [Relation] {
    fn relation(&self, name: &str) -> Result<Relation, Error> {
        self.iter()
            .find(|relation| relation.name == name)
            .cloned()
            .ok_or_else(|| {
                ConfigurationError::from_msg(format!("No such relation '{name}'")).into()
            })
    }
}

impl RelationLookup for Vec<Relation> {
    fn relation(&self, name: &str) -> Result<Relation, Error> {
        self.as_slice().relation(name)
    }
}

/// Load a relation definition.
///
/// `relation` can be a path, a file name in the relation directory of the
/// instance, or a name without extension in that directory. The variants are
/// tried in that order.
pub fn load_relation(instance_root: &Path, relation: &str) -> Result<Relation, Error> {
    let relation_dir = instance_root.join("relation");

    let path_variants = [
        PathBuf::from(relation),
        relation_dir.join(relation),
        relation_dir.join(format!("{relation}.yaml")),
    ];

    let path = path_variants
        .iter()
        .find(|path| path.is_file())
        .ok_or_else(|| ConfigurationError::from_msg(format!("No such relation '{relation}'")))?;

    info!("Using relation definition '{}'", path.display());

    load_relation_from_file(path)
}

pub fn load_relation_from_file(path: &Path) -> Result<Relation, Error> {
    let f = std::fs::File::open(path).map_err(|e| {
        ConfigurationError::from_msg(format!(
            "Could not open relation definition file '{}': {}",
            path.display(),
            e
        ))
    })?;

    if path.extension() == Some(std::ffi::OsStr::new("json")) {
        serde_json::from_reader(f).map_err(|e| {
            ConfigurationError::from_msg(format!(
                "Could not read relation definition from file '{}': {}",
                path.display(),
                e
            ))
            .into()
        })
    } else {
        serde_yaml::from_reader(f).map_err(|e| {
            ConfigurationError::from_msg(format!(
                "Could not read relation definition from file '{}': {}",
                path.display(),
                e
            ))
            .into()
        })
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    const RELATION_DEFINITION: &str = r#"
name: node->region
source_entity_type: node
target_entity_type: region
query: SELECT n.id AS source_id, r.id AS target_id FROM entity.node n JOIN entity.region r ON r.name = n.region
"#;

    #[test]
    fn lookup_variants() {
        let instance_root = tempfile::tempdir().unwrap();
        let relation_dir = instance_root.path().join("relation");

        fs::create_dir(&relation_dir).unwrap();
        fs::write(relation_dir.join("node->region.yaml"), RELATION_DEFINITION).unwrap();

        let by_name = load_relation(instance_root.path(), "node->region").unwrap();
        let by_file_name = load_relation(instance_root.path(), "node->region.yaml").unwrap();

        let full_path = relation_dir.join("node->region.yaml");
        let by_path = load_relation(instance_root.path(), &full_path.to_string_lossy()).unwrap();

        assert_eq!(by_name.target_entity_type, "region");
        assert_eq!(by_name.source_entity_type.as_deref(), Some("node"));
        assert_eq!(by_name, by_file_name);
        assert_eq!(by_name, by_path);
    }

    #[test]
    fn missing_relation() {
        let instance_root = tempfile::tempdir().unwrap();

        let result = load_relation(instance_root.path(), "node->nowhere");

        match result {
            Err(Error::Configuration(e)) => assert_eq!(e.msg, "No such relation 'node->nowhere'"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn in_memory_lookup() {
        let relations = vec![Relation {
            name: "cell->site".to_string(),
            source_entity_type: None,
            target_entity_type: "site".to_string(),
            query: None,
        }];

        assert_eq!(relations.relation("cell->site").unwrap().target_entity_type, "site");
        assert!(relations.relation("site->cell").is_err());
    }
}
