//! Config file resolution and installation files

use std::io::Write;
use std::path::PathBuf;

use serial_test::serial;
use sfe_core::config::{resolve_config_path, TomlConfig, CONFIG_ENV_VAR};
use sfe_core::db::init_database;
use sfe_core::{Environment, PersistableFilterRegistry, Value};
use tempfile::{NamedTempFile, TempDir};

const INSTALL_FILE: &str = r#"
[[group]]
symbolic = "submission=>string"
display_name = "Submission to string"
input_type = "class::lib.pkp.classes.submission.Submission"
output_type = "primitive::string"

[[group]]
symbolic = "string=>string"
display_name = "String rewrite"
input_type = "primitive::string"
output_type = "primitive::string"

[[filter]]
class = "sequencer"
group = "submission=>string"
display_name = "Shouted title"
settings = { settings_mapping = { case = ["seq2_case"] }, case = "upper" }

[[filter.sub_filter]]
class = "field_extract"
group = "submission=>string"
settings = { field = "title" }

[[filter.sub_filter]]
class = "string_case"
group = "string=>string"
"#;

fn write_file(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
#[serial]
fn cli_argument_beats_environment_variable() {
    let from_env = write_file("[logging]\nlevel = \"warn\"\n");
    let from_cli = write_file("[logging]\nlevel = \"debug\"\n");
    std::env::set_var(CONFIG_ENV_VAR, from_env.path());

    assert_eq!(
        resolve_config_path(Some(from_cli.path())),
        Some(from_cli.path().to_path_buf())
    );
    let config = TomlConfig::resolve(Some(from_cli.path())).unwrap();
    assert_eq!(config.logging.level, "debug");

    assert_eq!(resolve_config_path(None), Some(from_env.path().to_path_buf()));
    let config = TomlConfig::resolve(None).unwrap();
    assert_eq!(config.logging.level, "warn");

    std::env::remove_var(CONFIG_ENV_VAR);
}

#[test]
#[serial]
fn explicit_missing_file_is_an_error() {
    std::env::set_var(CONFIG_ENV_VAR, "/nonexistent/sfe/config.toml");
    assert!(TomlConfig::resolve(None).is_err());

    std::env::set_var(CONFIG_ENV_VAR, "");
    assert_ne!(
        resolve_config_path(None),
        Some(PathBuf::from("/nonexistent/sfe/config.toml"))
    );

    std::env::remove_var(CONFIG_ENV_VAR);
}

#[tokio::test]
async fn install_file_end_to_end() {
    let dir = TempDir::new().unwrap();
    let pool = init_database(&dir.path().join("filters.db")).await.unwrap();
    let registry = PersistableFilterRegistry::new(pool, Environment::default());
    let file = write_file(INSTALL_FILE);

    let report = registry.install_file(file.path()).await.unwrap();
    assert_eq!(report.groups.len(), 2);
    assert_eq!(report.filters.len(), 1);

    let mut filter = registry.load(report.filters[0]).await.unwrap();
    assert_eq!(filter.display_name(), "Shouted title");
    assert_eq!(filter.get_data("case").unwrap(), Some(Value::from("upper")));

    let submission = sfe_core::Object::new("classes.article.Article")
        .extends("lib.pkp.classes.submission.Submission")
        .with_field("title", "installed");
    assert_eq!(
        filter.execute(Value::Object(submission)).unwrap(),
        Value::from("INSTALLED")
    );

    // Reinstalling finds the equivalent filter instead of storing a copy
    let again = registry.install_file(file.path()).await.unwrap();
    assert_eq!(again.groups, report.groups);
    assert_eq!(again.filters, report.filters);
}

#[tokio::test]
async fn install_file_updates_changed_groups() {
    let dir = TempDir::new().unwrap();
    let pool = init_database(&dir.path().join("filters.db")).await.unwrap();
    let registry = PersistableFilterRegistry::new(pool, Environment::default());

    let first = write_file(INSTALL_FILE);
    registry.install_file(first.path()).await.unwrap();

    let renamed = INSTALL_FILE.replace("\"String rewrite\"", "\"Rewrite strings\"");
    let second = write_file(&renamed);
    registry.install_file(second.path()).await.unwrap();

    let group = registry.get_group("string=>string").await.unwrap().unwrap();
    assert_eq!(group.display_name, "Rewrite strings");
    assert_eq!(registry.list_groups().await.unwrap().len(), 2);
}
