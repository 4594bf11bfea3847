//! Failure handling and best-effort mode.

use varia_cli::core::VariaError;
use varia_cli::test_utils::RecipeFixture;

use crate::common::TestProject;

fn flaky_recipe() -> RecipeFixture {
    RecipeFixture::new(
        "flaky",
        "\
package:
  name: flaky
  version: 1.0
requirements:
  host:
    - openssl
{% if openssl == '1.1' %}
about:
  license: {{ license_of_old_openssl }}
{% endif %}
",
    )
    .with_config("openssl:\n  - '1.1'\n  - '3'\n")
}

#[test]
fn test_unresolved_variable_fails_the_render() {
    let project = TestProject::new().unwrap();
    let recipe = project.write_recipe(&flaky_recipe()).unwrap();

    let err = project.render(&recipe, &project.render_config("linux-64")).unwrap_err();
    match err.downcast::<VariaError>().unwrap() {
        VariaError::UnresolvedVariable {
            variables,
            ..
        } => assert_eq!(variables, vec!["license_of_old_openssl".to_string()]),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_best_effort_keeps_surviving_variants() {
    let project = TestProject::new().unwrap();
    let recipe = project.write_recipe(&flaky_recipe()).unwrap();

    let mut config = project.render_config("linux-64");
    config.best_effort = true;
    let report = project.render(&recipe, &config).unwrap();

    assert_eq!(report.metadata.len(), 1);
    assert_eq!(report.metadata[0].variant().get_str("openssl"), Some("3"));
    assert_eq!(report.warnings.len(), 1);
    assert!(report.warnings[0].contains("openssl=1.1"), "{}", report.warnings[0]);
}

#[test]
fn test_best_effort_with_no_survivors_is_an_error() {
    let project = TestProject::new().unwrap();
    let fixture = RecipeFixture::new("doomed", "package:\n  name: doomed\n  version: {{ never_defined }}\n")
        .with_config("zlib: ['1.2']\n");
    let recipe = project.write_recipe(&fixture).unwrap();

    let mut config = project.render_config("linux-64");
    config.best_effort = true;
    let err = project.render(&recipe, &config).unwrap_err();
    assert!(matches!(err.downcast::<VariaError>().unwrap(), VariaError::UnresolvedVariable { .. }));
}

#[test]
fn test_template_syntax_error_is_fatal() {
    let project = TestProject::new().unwrap();
    let fixture = RecipeFixture::new("broken", "package:\n  name: broken\n  version: {{ 1.0\n");
    let recipe = project.write_recipe(&fixture).unwrap();

    let mut config = project.render_config("linux-64");
    config.best_effort = true;
    let err = project.render(&recipe, &config).unwrap_err();
    assert!(matches!(err.downcast::<VariaError>().unwrap(), VariaError::Template(_)));
}

#[test]
fn test_unknown_helper_is_fatal() {
    let project = TestProject::new().unwrap();
    let fixture =
        RecipeFixture::new("helperless", "package:\n  name: helperless\n  version: {{ make_version() }}\n");
    let recipe = project.write_recipe(&fixture).unwrap();

    let err = project.render(&recipe, &project.render_config("linux-64")).unwrap_err();
    match err.downcast::<VariaError>().unwrap() {
        VariaError::UnknownHelper {
            name,
            ..
        } => assert_eq!(name, "make_version"),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_configuration_problems_are_reported_together() {
    let project = TestProject::new().unwrap();
    let fixture = RecipeFixture::python_only()
        .with_config("bad-name: ['1']\nzip_keys:\n  - [python, numpy]\npython: ['3.10', '3.11']\nnumpy: ['1.26']\n");
    let recipe = project.write_recipe(&fixture).unwrap();

    let err = project.render(&recipe, &project.render_config("linux-64")).unwrap_err();
    match err.downcast::<VariaError>().unwrap() {
        VariaError::VariantConfigError {
            problems,
        } => assert!(problems.len() >= 2, "{problems:?}"),
        other => panic!("unexpected error: {other}"),
    }
}
