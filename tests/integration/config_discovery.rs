//! Layering of variant config files, observed through `varia variants --json`.

use std::fs;

use varia_cli::test_utils::RecipeFixture;

use crate::common::TestProject;

fn zlib_recipe() -> RecipeFixture {
    RecipeFixture::new("zdemo", "package:\n  name: zdemo\n  version: 1.0\nrequirements:\n  host:\n    - zlib\n")
}

fn zlib_values(project: &TestProject, args: &[&str]) -> (Vec<String>, String) {
    let mut full = vec!["variants", "zdemo", "--json", "--platform", "linux-64"];
    full.extend_from_slice(args);
    let output = project.run_varia(&full).unwrap();
    output.assert_success();
    let json = output.json();
    let entry = &json["specification"]["zlib"];
    let values = entry["values"].as_array().unwrap().iter().map(|v| v.as_str().unwrap().to_string()).collect();
    (values, entry["origin"].as_str().unwrap_or_default().to_string())
}

#[test]
fn test_user_file_then_working_directory_then_recipe() {
    let project = TestProject::new().unwrap();
    project.write_recipe(&zlib_recipe()).unwrap();
    fs::write(project.home_path().join("conda_build_config.yaml"), "zlib: ['1.0']\n").unwrap();

    let (values, origin) = zlib_values(&project, &[]);
    assert_eq!(values, vec!["1.0"]);
    assert!(origin.ends_with("conda_build_config.yaml"));

    project.write_file("conda_build_config.yaml", "zlib: ['1.1']\n").unwrap();
    assert_eq!(zlib_values(&project, &[]).0, vec!["1.1"]);

    project.write_file("zdemo/conda_build_config.yaml", "zlib: ['1.2']\n").unwrap();
    assert_eq!(zlib_values(&project, &[]).0, vec!["1.2"]);
}

#[test]
fn test_ignore_system_variants_skips_user_and_cwd_files() {
    let project = TestProject::new().unwrap();
    project.write_recipe(&zlib_recipe().with_config("zlib: ['1.2']\n")).unwrap();
    fs::write(project.home_path().join("conda_build_config.yaml"), "openssl: ['3']\n").unwrap();
    project.write_file("conda_build_config.yaml", "zlib: ['9.9']\nlibpng: ['1.6']\n").unwrap();

    let output = project.run_varia(&["variants", "zdemo", "--json", "--ignore-system-variants"]).unwrap();
    output.assert_success();
    let json = output.json();
    assert!(json["specification"].get("openssl").is_none());
    assert!(json["specification"].get("libpng").is_none());
    assert_eq!(json["specification"]["zlib"]["values"][0], "1.2");
}

#[test]
fn test_extra_files_and_overrides_win() {
    let project = TestProject::new().unwrap();
    project.write_recipe(&zlib_recipe().with_config("zlib: ['1.2']\n")).unwrap();
    project.write_file("extra.yaml", "zlib: ['1.3']\n").unwrap();

    assert_eq!(zlib_values(&project, &["-m", "extra.yaml"]).0, vec!["1.3"]);

    let (values, origin) = zlib_values(&project, &["-m", "extra.yaml", "--variant", "zlib=1.4,1.5"]);
    assert_eq!(values, vec!["1.4", "1.5"]);
    assert_eq!(origin, "command line");

    let (values, origin) = zlib_values(&project, &["--variants", "{zlib: ['2.0']}"]);
    assert_eq!(values, vec!["2.0"]);
    assert_eq!(origin, "--variants");
}

#[test]
fn test_exclusive_files_disable_discovery() {
    let project = TestProject::new().unwrap();
    project.write_recipe(&zlib_recipe().with_config("zlib: ['1.2']\nopenssl: ['3']\n")).unwrap();
    project.write_file("only.yaml", "zlib: ['1.1']\n").unwrap();

    let output = project.run_varia(&["variants", "zdemo", "--json", "-e", "only.yaml"]).unwrap();
    output.assert_success();
    let json = output.json();
    assert_eq!(json["specification"]["zlib"]["values"][0], "1.1");
    assert!(json["specification"].get("openssl").is_none());
}

#[test]
fn test_global_config_names_the_user_file() {
    let project = TestProject::new().unwrap();
    project.write_recipe(&zlib_recipe()).unwrap();
    let user_file = project.home_path().join("variants").join("mine.yaml");
    fs::create_dir_all(user_file.parent().unwrap()).unwrap();
    fs::write(&user_file, "zlib: ['1.7']\n").unwrap();
    let global = project
        .write_file("global.toml", &format!("variant_config_file = {:?}\n", user_file.display().to_string()))
        .unwrap();

    let global = global.display().to_string();
    assert_eq!(zlib_values(&project, &["-c", &global]).0, vec!["1.7"]);
}
