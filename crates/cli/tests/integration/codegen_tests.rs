use predicates::prelude::*;

use super::common::TestEnv;

fn tool(name: &str, script: &str, outputs: &str) -> String {
  format!(
    r#"{{"type": "adhoc_tool", "name": "{}", "runnable": "sh", "args": ["-c", "{}"],
        "extra_env_vars": ["PATH=/usr/bin:/bin"], "output_directories": ["{}"],
        "root_output_directory": "./{}"}}"#,
    name, script, outputs, outputs
  )
}

fn manifest_with(tools: &[String]) -> String {
  format!(
    r#"{{"targets": [{{"type": "system_binary", "name": "sh", "binary_name": "sh"}}, {}]}}"#,
    tools.join(", ")
  )
}

#[test]
fn export_merges_every_producer_into_dist_codegen() {
  let env = TestEnv::new();
  let manifest = env.manifest(
    "",
    &manifest_with(&[
      tool("api", "mkdir -p out/api && echo api > out/api/client.rs", "out"),
      tool("db", "mkdir -p gen/db && echo db > gen/db/schema.rs", "gen"),
    ]),
  );

  env
    .adhoc_cmd()
    .arg("export-codegen")
    .arg(&manifest)
    .assert()
    .success()
    .stdout(predicate::str::contains("Wrote codegen"))
    .stdout(predicate::str::contains("Files: 2"));

  assert_eq!(env.read("dist/codegen/api/client.rs"), "api\n");
  assert_eq!(env.read("dist/codegen/db/schema.rs"), "db\n");
}

#[test]
fn export_honors_dist_dir_override() {
  let env = TestEnv::new();
  let manifest = env.manifest("", &manifest_with(&[tool("api", "mkdir -p out && echo a > out/a.rs", "out")]));

  env
    .adhoc_cmd()
    .args(["export-codegen", "--dist-dir", "build/dist"])
    .arg(&manifest)
    .assert()
    .success();

  assert!(env.exists("build/dist/codegen/a.rs"));
  assert!(!env.exists("dist"));
}

#[test]
fn export_without_producers_is_a_noop() {
  let env = TestEnv::new();
  env.write_file("src/a.txt", "a");
  let manifest = env.manifest("", r#"{"targets": [{"type": "files", "name": "srcs", "sources": ["src/a.txt"]}]}"#);

  env
    .adhoc_cmd()
    .arg("export-codegen")
    .arg(&manifest)
    .assert()
    .success()
    .stderr(predicate::str::contains("No codegen targets matched"))
    .stderr(predicate::str::contains("adhoc_tool"));

  assert!(!env.exists("dist"));
}

#[test]
fn export_fails_on_conflicting_outputs() {
  let env = TestEnv::new();
  let manifest = env.manifest(
    "",
    &manifest_with(&[
      tool("one", "mkdir -p out && echo 1 > out/same.rs", "out"),
      tool("two", "mkdir -p out && echo 2 > out/same.rs", "out"),
    ]),
  );

  env
    .adhoc_cmd()
    .arg("export-codegen")
    .arg(&manifest)
    .assert()
    .failure()
    .stderr(predicate::str::contains("conflicting output at `same.rs`"));

  assert!(!env.exists("dist/codegen/same.rs"));
}

#[test]
fn export_identical_outputs_do_not_conflict() {
  let env = TestEnv::new();
  let manifest = env.manifest(
    "",
    &manifest_with(&[
      tool("one", "mkdir -p out && echo same > out/same.rs", "out"),
      tool("two", "mkdir -p out && echo same > out/same.rs", "out"),
    ]),
  );

  env
    .adhoc_cmd()
    .arg("export-codegen")
    .arg(&manifest)
    .assert()
    .success();

  assert_eq!(env.read("dist/codegen/same.rs"), "same\n");
}

#[test]
fn export_json_lists_producers() {
  let env = TestEnv::new();
  let manifest = env.manifest("", &manifest_with(&[tool("api", "mkdir -p out && echo a > out/a.rs", "out")]));

  env
    .adhoc_cmd()
    .args(["export-codegen", "-o", "json"])
    .arg(&manifest)
    .assert()
    .success()
    .stdout(predicate::str::contains("//:api (adhoc_tool -> files)"));
}
