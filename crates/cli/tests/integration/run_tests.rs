use predicates::prelude::*;

use super::common::TestEnv;

const SHELL: &str = r#"{"type": "system_binary", "name": "sh", "binary_name": "sh"}"#;

fn manifest_with(targets: &[&str]) -> String {
  format!(r#"{{"targets": [{}, {}]}}"#, SHELL, targets.join(", "))
}

#[test]
fn run_reports_outputs_relative_to_root_output_directory() {
  let env = TestEnv::new();
  env.write_file("pkg/schema.txt", "fields");
  let manifest = env.manifest(
    "pkg",
    &manifest_with(&[
      r#"{"type": "files", "name": "schema", "sources": ["schema.txt"]}"#,
      r#"{"type": "adhoc_tool", "name": "gen", "runnable": "sh",
          "args": ["-c", "mkdir -p out && cat schema.txt > out/gen.txt"],
          "extra_env_vars": ["PATH=/usr/bin:/bin"],
          "execution_dependencies": ["schema"], "output_directories": ["out"],
          "root_output_directory": "./out"}"#,
    ]),
  );

  env
    .adhoc_cmd()
    .arg("run")
    .arg(&manifest)
    .arg("gen")
    .arg("--out")
    .arg(env.path("result"))
    .assert()
    .success()
    .stdout(predicate::str::contains("Ran //pkg:gen"))
    .stdout(predicate::str::contains("gen.txt"));

  assert_eq!(env.read("result/gen.txt"), "fields");
}

#[test]
fn run_json_includes_exit_code_and_stdout() {
  let env = TestEnv::new();
  let manifest = env.manifest(
    "",
    &manifest_with(&[r#"{"type": "adhoc_tool", "name": "gen", "runnable": "sh",
        "args": ["-c", "echo hello; echo x > x.txt"], "output_files": ["x.txt"]}"#]),
  );

  env
    .adhoc_cmd()
    .args(["run", "-o", "json"])
    .arg(&manifest)
    .arg("gen")
    .assert()
    .success()
    .stdout(predicate::str::contains(r#""exit_code": 0"#))
    .stdout(predicate::str::contains(r#""stdout": "hello\n""#))
    .stdout(predicate::str::contains(r#""cache_scope": "only-on-success""#));
}

#[test]
fn run_failure_shows_exit_code_and_stderr() {
  let env = TestEnv::new();
  let manifest = env.manifest(
    "",
    &manifest_with(&[r#"{"type": "adhoc_tool", "name": "gen", "runnable": "sh",
        "args": ["-c", "echo broken >&2; exit 3"], "output_files": ["x.txt"]}"#]),
  );

  env
    .adhoc_cmd()
    .arg("run")
    .arg(&manifest)
    .arg("gen")
    .assert()
    .failure()
    .stderr(predicate::str::contains("exit code 3"))
    .stderr(predicate::str::contains("broken"));
}

#[test]
fn run_missing_command_hints_at_runnable_dependencies() {
  let env = TestEnv::new();
  let manifest = env.manifest(
    "",
    &manifest_with(&[r#"{"type": "adhoc_tool", "name": "gen", "runnable": "sh",
        "args": ["-c", "definitely-not-a-command"], "output_files": ["x.txt"]}"#]),
  );

  env
    .adhoc_cmd()
    .arg("run")
    .arg(&manifest)
    .arg("gen")
    .assert()
    .failure()
    .stderr(predicate::str::contains("runnable_dependencies"));
}

#[test]
fn run_timeout_override_kills_the_tool() {
  let env = TestEnv::new();
  let manifest = env.manifest(
    "",
    &manifest_with(&[r#"{"type": "adhoc_tool", "name": "gen", "runnable": "sh",
        "args": ["-c", "while :; do :; done"], "output_files": ["x.txt"], "timeout": 600}"#]),
  );

  env
    .adhoc_cmd()
    .arg("run")
    .arg(&manifest)
    .arg("gen")
    .args(["--timeout", "1s"])
    .timeout(std::time::Duration::from_secs(60))
    .assert()
    .failure()
    .stderr(predicate::str::contains("timed out after 1s"));
}

#[test]
fn run_sub_second_timeout_rounds_up() {
  let env = TestEnv::new();
  let manifest = env.manifest(
    "",
    &manifest_with(&[r#"{"type": "adhoc_tool", "name": "gen", "runnable": "sh",
        "args": ["-c", "echo ok > ok.txt"], "output_files": ["ok.txt"]}"#]),
  );

  env
    .adhoc_cmd()
    .arg("run")
    .arg(&manifest)
    .arg("gen")
    .args(["--timeout", "500ms"])
    .assert()
    .success()
    .stdout(predicate::str::contains("ok.txt"));
}

#[test]
fn run_zero_timeout_is_rejected_at_parse_time() {
  let env = TestEnv::new();
  let manifest = env.manifest("", r#"{"targets": []}"#);

  env
    .adhoc_cmd()
    .arg("run")
    .arg(&manifest)
    .arg("gen")
    .args(["--timeout", "0s"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("timeout must be greater than zero"));
}

#[test]
fn run_missing_declared_output_fails() {
  let env = TestEnv::new();
  let manifest = env.manifest(
    "",
    &manifest_with(&[r#"{"type": "adhoc_tool", "name": "gen", "runnable": "sh",
        "args": ["-c", "true"], "output_files": ["never.txt"]}"#]),
  );

  env
    .adhoc_cmd()
    .arg("run")
    .arg(&manifest)
    .arg("gen")
    .assert()
    .failure()
    .stderr(predicate::str::contains("never.txt"));
}

#[test]
fn run_rejects_ambiguous_output_declaration() {
  let env = TestEnv::new();
  let manifest = env.manifest(
    "",
    &manifest_with(&[r#"{"type": "adhoc_tool", "name": "gen", "runnable": "sh", "args": ["-c", "true"]}"#]),
  );

  env
    .adhoc_cmd()
    .arg("run")
    .arg(&manifest)
    .arg("gen")
    .assert()
    .failure();
  assert!(!env.exists("dist"));
}

#[test]
fn run_accepts_manifest_directory() {
  let env = TestEnv::new();
  env.manifest(
    "tools",
    &manifest_with(&[r#"{"type": "adhoc_tool", "name": "gen", "runnable": "sh",
        "args": ["-c", "echo ok > ok.txt"], "output_files": ["ok.txt"]}"#]),
  );

  env
    .adhoc_cmd()
    .args(["run", "tools", "gen"])
    .assert()
    .success()
    .stdout(predicate::str::contains("ok.txt"));
}

#[test]
fn run_shell_command_target() {
  let env = TestEnv::new();
  env.write_file("pkg/in.txt", "data");
  let manifest = env.manifest(
    "pkg",
    r#"{"targets": [
      {"type": "files", "name": "srcs", "sources": ["in.txt"]},
      {"type": "shell_command", "name": "stamp", "tools": ["cat"], "execution_dependencies": ["srcs"],
       "command": "cat in.txt > made.txt; printf ' by %s' \"$0\" >> made.txt",
       "output_files": ["made.txt"], "root_output_directory": "."}
    ]}"#,
  );

  env
    .adhoc_cmd()
    .arg("run")
    .arg(&manifest)
    .arg("stamp")
    .arg("--out")
    .arg(env.path("result"))
    .assert()
    .success()
    .stdout(predicate::str::contains("Ran //pkg:stamp"));

  assert_eq!(env.read("result/made.txt"), "data by //pkg:stamp");
}

#[test]
fn run_shell_command_missing_tool_hints_at_tools() {
  let env = TestEnv::new();
  let manifest = env.manifest(
    "",
    r#"{"targets": [{"type": "shell_command", "name": "stamp",
        "command": ": > x; definitely-not-a-command", "output_files": ["x"]}]}"#,
  );

  env
    .adhoc_cmd()
    .arg("run")
    .arg(&manifest)
    .arg("stamp")
    .assert()
    .failure()
    .stderr(predicate::str::contains("exit code 127"))
    .stderr(predicate::str::contains("`tools`"));
}
