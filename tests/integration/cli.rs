//! End-to-end runs of the `varia` binary.

use varia_cli::test_utils::RecipeFixture;

use crate::common::TestProject;

fn python_recipe(project: &TestProject) {
    project
        .write_recipe(
            &RecipeFixture::new(
                "pyrun",
                "package:\n  name: pyrun\n  version: 1.0\nrequirements:\n  run:\n    - python {{ python }}\n",
            )
            .with_config("python:\n  - '3.11'\n  - '3.12'\nnumpy:\n  - '1.26'\n  - '2.0'\n"),
        )
        .unwrap();
}

#[test]
fn test_render_yaml_documents() {
    let project = TestProject::new().unwrap();
    python_recipe(&project);

    let output = project.run_varia(&["render", "pyrun", "--platform", "linux-64"]).unwrap();
    output.assert_success();
    assert_eq!(output.stdout.matches("---\n").count(), 1, "{}", output.stdout);
    output.assert_stdout_contains("# pyrun-1.0-h").assert_stdout_contains("python 3.12");
}

#[test]
fn test_render_json_summary() {
    let project = TestProject::new().unwrap();
    python_recipe(&project);

    let output = project.run_varia(&["render", "pyrun", "--platform", "linux-64", "--format", "json"]).unwrap();
    output.assert_success();
    let json = output.json();
    let summaries = json.as_array().unwrap();
    assert_eq!(summaries.len(), 2);
    for summary in summaries {
        assert_eq!(summary["used_vars"], serde_json::json!(["python"]));
        assert!(summary["variant"].get("numpy").is_none());
        assert_eq!(summary["document"]["package"]["name"], "pyrun");
        assert_eq!(summary["needs_download"], false);
    }
    assert_ne!(summaries[0]["identity"], summaries[1]["identity"]);
}

#[test]
fn test_render_override_and_output_file() {
    let project = TestProject::new().unwrap();
    python_recipe(&project);

    let output = project
        .run_varia(&["render", "pyrun", "--variant", "python=3.13", "--format", "json", "-o", "out.json"])
        .unwrap();
    output.assert_success().assert_stderr_contains("Wrote out.json");
    assert!(output.stdout.is_empty());

    let written = std::fs::read_to_string(project.project_path().join("out.json")).unwrap();
    let json: serde_json::Value = serde_json::from_str(&written).unwrap();
    assert_eq!(json.as_array().unwrap().len(), 1);
    assert_eq!(json[0]["variant"]["python"], "3.13");
}

#[test]
fn test_missing_recipe_fails() {
    let project = TestProject::new().unwrap();
    let output = project.run_varia(&["render", "nowhere"]).unwrap();
    output.assert_failure().assert_stderr_contains("Recipe not found");
    assert_eq!(output.code, Some(1));
}

#[test]
fn test_unresolved_variable_fails_without_best_effort() {
    let project = TestProject::new().unwrap();
    project
        .write_recipe(&RecipeFixture::new("holes", "package:\n  name: holes\n  version: {{ missing_version }}\n"))
        .unwrap();

    let output = project.run_varia(&["render", "holes"]).unwrap();
    output.assert_failure().assert_stderr_contains("missing_version");
}

#[test]
fn test_variants_listing() {
    let project = TestProject::new().unwrap();
    python_recipe(&project);

    let output = project.run_varia(&["variants", "pyrun", "--json", "--platform", "linux-64"]).unwrap();
    output.assert_success();
    let json = output.json();
    assert_eq!(json["recipe"], "pyrun");
    assert_eq!(json["target_platform"], "linux-64");
    assert_eq!(json["used_vars"], serde_json::json!(["python"]));
    assert_eq!(json["loop_vars"], serde_json::json!(["python"]));
    assert_eq!(json["variants"].as_array().unwrap().len(), 2);
    assert_eq!(json["specification"]["numpy"]["values"], serde_json::json!(["1.26", "2.0"]));

    let text = project.run_varia(&["variants", "pyrun", "--platform", "linux-64"]).unwrap();
    text.assert_success().assert_stdout_contains("Used variables: python");
}

#[test]
fn test_validate_good_and_bad_files() {
    let project = TestProject::new().unwrap();
    project.write_file("good.yaml", "python: ['3.11', '3.12']\nnumpy: ['1.26', '2.0']\nzip_keys:\n  - [python, numpy]\n").unwrap();
    project.write_file("bad.yaml", "python: ['3.11', '3.12']\nnumpy: ['1.26']\nzip_keys:\n  - [python, numpy]\n").unwrap();

    project.run_varia(&["validate", "good.yaml"]).unwrap().assert_success().assert_stdout_contains("good.yaml");

    let output = project.run_varia(&["validate", "good.yaml", "bad.yaml", "--format", "json"]).unwrap();
    output.assert_failure().assert_stderr_contains("1 of 2 variant config file(s) are invalid");
    let json = output.json();
    assert_eq!(json["valid"], false);
    assert_eq!(json["files"][0]["valid"], true);
    assert_eq!(json["files"][1]["valid"], false);
    assert!(!json["files"][1]["errors"].as_array().unwrap().is_empty());
}

#[test]
fn test_global_config_sets_platform() {
    let project = TestProject::new().unwrap();
    project
        .write_recipe(&RecipeFixture::new(
            "plat",
            "package:\n  name: plat\n  version: 1.0\nrequirements:\n  build:\n    - winonly  # [win]\n    - unixonly  # [unix]\n",
        ))
        .unwrap();
    let config = project.write_file("varia.toml", "target_platform = \"win-64\"\n").unwrap();
    let config = config.display().to_string();

    let output = project.run_varia(&["render", "plat", "-c", &config, "--format", "json"]).unwrap();
    output.assert_success();
    let json = output.json();
    assert_eq!(json[0]["document"]["requirements"]["build"], serde_json::json!(["winonly"]));

    let output = project.run_varia(&["render", "plat", "-c", &config, "--platform", "osx-arm64", "--format", "json"]).unwrap();
    output.assert_success();
    assert_eq!(output.json()[0]["document"]["requirements"]["build"], serde_json::json!(["unixonly"]));
}

#[test]
fn test_help_lists_commands() {
    use assert_cmd::Command;
    use predicates::prelude::*;

    Command::cargo_bin("varia")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("render").and(predicate::str::contains("variants")).and(predicate::str::contains("validate")));
}
