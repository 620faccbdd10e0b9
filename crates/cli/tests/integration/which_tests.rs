use predicates::prelude::*;

use super::common::TestEnv;

#[test]
fn which_prints_first_match_in_search_order() {
  let env = TestEnv::new();
  env.write_script("tools/a/tool", "echo a");
  env.write_script("tools/b/tool", "echo b");
  let manifest = env.manifest(
    "",
    r#"{"targets": [{"type": "system_binary", "name": "tool", "binary_name": "tool",
       "extra_search_paths": ["tools/b", "tools/a"]}]}"#,
  );

  // Relative search paths are resolved against the build root.
  env
    .adhoc_cmd()
    .arg("which")
    .arg(&manifest)
    .arg("tool")
    .assert()
    .success()
    .stdout(predicate::str::contains(format!("{}/tools/b/tool", env.root().display())));
}

#[test]
fn which_applies_fingerprint_pattern() {
  let env = TestEnv::new();
  env.write_script("old/tool", "echo 'tool 1.0'");
  env.write_script("new/tool", "echo 'tool 2.3'");
  let root = env.root();
  let manifest = env.manifest(
    "",
    &format!(
      r#"{{"targets": [{{"type": "system_binary", "name": "tool", "binary_name": "tool",
         "extra_search_paths": ["{0}/old", "{0}/new"],
         "fingerprint": "tool 2\\.", "fingerprint_args": ["--version"]}}]}}"#,
      root.display()
    ),
  );

  env
    .adhoc_cmd()
    .args(["which", "-o", "json"])
    .arg(&manifest)
    .arg("tool")
    .assert()
    .success()
    .stdout(predicate::str::contains(format!("{}/new/tool", root.display())))
    .stdout(predicate::str::contains("\"fingerprint\""));
}

#[test]
fn which_reports_searched_directories_when_nothing_matches() {
  let env = TestEnv::new();
  env.write_script("only/tool", "echo 'tool 1.0'");
  let root = env.root();
  let manifest = env.manifest(
    "",
    &format!(
      r#"{{"targets": [{{"type": "system_binary", "name": "tool", "binary_name": "tool",
         "extra_search_paths": ["{}/only"], "fingerprint": "tool 9"}}]}}"#,
      root.display()
    ),
  );

  env
    .adhoc_cmd()
    .arg("which")
    .arg(&manifest)
    .arg("tool")
    .assert()
    .failure()
    .stderr(predicate::str::contains("cannot find `tool`"))
    .stderr(predicate::str::contains("only"));
}

#[test]
fn which_rejects_non_binary_targets() {
  let env = TestEnv::new();
  let manifest = env.manifest("", r#"{"targets": [{"type": "files", "name": "srcs", "sources": []}]}"#);

  env
    .adhoc_cmd()
    .arg("which")
    .arg(&manifest)
    .arg("srcs")
    .assert()
    .failure()
    .stderr(predicate::str::contains("is a files"));
}
