//! End-to-end collection through the YAML config path and the default
//! registry.

use std::io::Write;

use sstart::{Collector, default_registry};
use sstart_types::Config;

fn write_env(dir: &tempfile::TempDir, name: &str, content: &str) -> String {
    let path = dir.path().join(name);
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(content.as_bytes()).unwrap();
    path.to_string_lossy().into_owned()
}

fn parse(yaml: &str) -> Config {
    let config: Config = serde_yaml::from_str(yaml).unwrap();
    config.validate().unwrap();
    config
}

#[tokio::test]
async fn rename_and_override_across_two_dotenv_providers() {
    let dir = tempfile::tempdir().unwrap();
    let p1 = write_env(&dir, "p1.env", "A=1\nB=2\n");
    let p2 = write_env(&dir, "p2.env", "A=9\nC=3\n");

    let config = parse(&format!(
        r#"
cache:
  enabled: false
providers:
  - kind: dotenv
    id: p1
    config:
      path: "{p1}"
    keys:
      A: "=="
  - kind: dotenv
    id: p2
    config:
      path: "{p2}"
    keys:
      A: "=="
      C: "=="
"#
    ));

    let collector = Collector::new(config, default_registry()).unwrap();
    let secrets = collector.collect(&[]).await.unwrap();

    assert_eq!(secrets.get("A").map(String::as_str), Some("9"));
    assert_eq!(secrets.get("C").map(String::as_str), Some("3"));
    assert!(!secrets.contains_key("B"));
    assert_eq!(secrets.len(), 2);
}

#[tokio::test]
async fn template_composes_across_providers_with_uses() {
    let dir = tempfile::tempdir().unwrap();
    let prod = write_env(&dir, "prod.env", "PG_USER=u\nPG_PASS=p\n");
    let generic = write_env(&dir, "generic.env", "PG_HOST=h\n");

    let config = parse(&format!(
        r#"
cache:
  enabled: false
providers:
  - kind: dotenv
    id: aws_prod
    config:
      path: "{prod}"
  - kind: dotenv
    id: aws_generic
    config:
      path: "{generic}"
  - kind: template
    uses: [aws_prod, aws_generic]
    templates:
      PG_URI: "pgsql://{{{{.aws_prod.PG_USER}}}}:{{{{.aws_prod.PG_PASS}}}}@{{{{.aws_generic.PG_HOST}}}}"
"#
    ));

    let collector = Collector::new(config, default_registry()).unwrap();
    let secrets = collector.collect(&[]).await.unwrap();
    assert_eq!(
        secrets.get("PG_URI").map(String::as_str),
        Some("pgsql://u:p@h")
    );
}

#[tokio::test]
async fn template_without_uses_renders_no_value() {
    let dir = tempfile::tempdir().unwrap();
    let prod = write_env(&dir, "prod.env", "PG_USER=u\n");

    let config = parse(&format!(
        r#"
cache:
  enabled: false
providers:
  - kind: dotenv
    id: aws_prod
    config:
      path: "{prod}"
  - kind: template
    templates:
      PG_URI: "pgsql://{{{{.aws_prod.PG_USER}}}}"
"#
    ));

    let collector = Collector::new(config, default_registry()).unwrap();
    let secrets = collector.collect(&[]).await.unwrap();
    assert_eq!(
        secrets.get("PG_URI").map(String::as_str),
        Some("pgsql://<no value>")
    );
}

#[tokio::test]
async fn get_env_expansion_reaches_provider_configs() {
    let dir = tempfile::tempdir().unwrap();
    let env_file = write_env(&dir, "x.env", "K=v\n");
    unsafe { std::env::set_var("SSTART_COLLECT_TEST_PATH", &env_file) };

    let config = parse(
        r#"
cache:
  enabled: false
providers:
  - kind: dotenv
    config:
      path: '{{ get_env(name="SSTART_COLLECT_TEST_PATH") }}'
"#,
    );

    let collector = Collector::new(config, default_registry()).unwrap();
    let secrets = collector.collect(&[]).await.unwrap();
    assert_eq!(secrets.get("K").map(String::as_str), Some("v"));
}

#[test]
fn redaction_masks_collected_values() {
    let mut secrets = sstart::Secrets::new();
    secrets.insert("TOKEN".into(), "hunter2".into());

    let log_line = format!("connecting with token={}", "hunter2");
    assert_eq!(
        sstart::redact(&log_line, &secrets),
        "connecting with token=*******"
    );
    assert_eq!(sstart::mask("super-secret-token"), "su****en");
}
