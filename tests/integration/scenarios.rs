//! Reference scenarios of variant reduction.

use varia_cli::core::VariaError;
use varia_cli::test_utils::{RecipeFixture, init_test_logging};

use crate::common::TestProject;

const PYTHON_RUN_RECIPE: &str = "\
package:
  name: pyrun
  version: 1.0
requirements:
  run:
    - python {{ python }}
";

const PYTHON_NUMPY_CONFIG: &str = "\
python:
  - '2.7'
  - '3.5'
numpy:
  - '1.10'
  - '1.11'
";

/// Unused configuration axes do not multiply the output.
#[test]
fn test_scenario_a_unused_axis_is_ignored() {
    init_test_logging(None);
    let project = TestProject::new().unwrap();
    let recipe =
        project.write_recipe(&RecipeFixture::new("pyrun", PYTHON_RUN_RECIPE).with_config(PYTHON_NUMPY_CONFIG)).unwrap();

    let report = project.render(&recipe, &project.render_config("linux-64")).unwrap();

    assert_eq!(report.metadata.len(), 2);
    let pythons: Vec<_> = report.metadata.iter().map(|m| m.variant().get_str("python").unwrap()).collect();
    assert_eq!(pythons, vec!["2.7", "3.5"]);
    assert_ne!(report.metadata[0].identity(), report.metadata[1].identity());
    for meta in &report.metadata {
        assert!(!meta.used_vars().contains("numpy"));
        assert_eq!(meta.get_str("requirements/run/0"), Some(format!("python {}", meta.variant().get_str("python").unwrap()).as_str()));
    }
}

/// A single-value override replaces the whole sequence.
#[test]
fn test_scenario_b_override_fixes_python() {
    let project = TestProject::new().unwrap();
    let recipe =
        project.write_recipe(&RecipeFixture::new("pyrun", PYTHON_RUN_RECIPE).with_config(PYTHON_NUMPY_CONFIG)).unwrap();
    let override_file = project.write_file("override.yaml", "python: '2.7'\n").unwrap();

    let mut config = project.render_config("linux-64");
    config.variant_config_files.push(override_file);

    let spec = config.combined_spec(&varia_cli::render::RecipeSource::load(&recipe).unwrap()).unwrap();
    assert_eq!(spec.get("python").unwrap().len(), 1);

    let report = project.render(&recipe, &config).unwrap();
    assert_eq!(report.metadata.len(), 1);
    assert_eq!(report.metadata[0].variant().get_str("python"), Some("2.7"));
}

/// An output that reads nothing renders once, whatever the specification holds.
#[test]
fn test_scenario_c_outputs_expand_independently() {
    let project = TestProject::new().unwrap();
    let fixture = RecipeFixture::new(
        "pair",
        "\
package:
  name: pair
  version: 3.1
outputs:
  - name: a
    requirements:
      host:
        - zlib
  - name: b
",
    )
    .with_config("zlib:\n  - '1.2.11'\n  - '1.2.13'\n  - '1.3'\nopenssl:\n  - '1.1'\n  - '3'\n");
    let recipe = project.write_recipe(&fixture).unwrap();

    let report = project.render(&recipe, &project.render_config("linux-64")).unwrap();
    let named = |name: &str| report.metadata.iter().filter(|m| m.name() == name).collect::<Vec<_>>();

    assert_eq!(named("a").len(), 3);
    assert_eq!(named("b").len(), 1);
    assert!(named("b")[0].used_vars().is_empty());
    assert_eq!(named("a")[2].get_str("requirements/host/0"), Some("zlib 1.3"));
}

/// Applicability predicates remove the combinations they reject.
#[test]
fn test_scenario_d_predicates_filter_combinations() {
    let project = TestProject::new().unwrap();
    let fixture = RecipeFixture::new(
        "vcdemo",
        "\
package:
  name: vcdemo
  version: 1.0
requirements:
  build:
    - vc {{ vc }}
",
    )
    .with_config(
        "\
target_platform:
  - linux-64
  - win-64
vc:
  - '14'
  - '15'  # [win]
",
    );
    let recipe = project.write_recipe(&fixture).unwrap();

    let report = project.render(&recipe, &project.render_config("linux-64")).unwrap();
    let pairs: Vec<(String, String)> = report
        .metadata
        .iter()
        .map(|m| {
            (
                m.variant().get_str("target_platform").unwrap().to_string(),
                m.variant().get_str("vc").unwrap().to_string(),
            )
        })
        .collect();

    assert_eq!(pairs.len(), 3);
    assert!(!pairs.contains(&("linux-64".to_string(), "15".to_string())));
    assert!(pairs.contains(&("win-64".to_string(), "15".to_string())));
}

/// Mutually exclusive predicates leave nothing, which is an error rather than an empty success.
#[test]
fn test_scenario_e_unsatisfiable_configuration() {
    let project = TestProject::new().unwrap();
    let fixture = RecipeFixture::new(
        "nowhere",
        "\
package:
  name: nowhere
  version: 1.0
requirements:
  build:
    - {{ only_win }}
    - {{ only_osx }}
",
    )
    .with_config(
        "\
target_platform:
  - linux-64
only_win:
  - vs2019  # [win]
only_osx:
  - clang  # [osx]
",
    );
    let recipe = project.write_recipe(&fixture).unwrap();

    let err = project.render(&recipe, &project.render_config("linux-64")).unwrap_err();
    let err = err.downcast::<VariaError>().unwrap();
    assert!(matches!(err, VariaError::Unsatisfiable { .. }), "{err}");
}

/// Zipped variables advance together in every emitted variant.
#[test]
fn test_zip_groups_stay_aligned() {
    let project = TestProject::new().unwrap();
    let fixture = RecipeFixture::new(
        "zipped",
        "\
package:
  name: zipped
  version: 1.0
requirements:
  host:
    - python
    - numpy
",
    )
    .with_config(
        "\
python:
  - '3.10'
  - '3.11'
  - '3.12'
numpy:
  - '1.22'
  - '1.23'
  - '1.26'
zip_keys:
  - [python, numpy]
",
    );
    let recipe = project.write_recipe(&fixture).unwrap();

    let report = project.render(&recipe, &project.render_config("linux-64")).unwrap();
    let pairs: Vec<(&str, &str)> = report
        .metadata
        .iter()
        .map(|m| (m.variant().get_str("python").unwrap(), m.variant().get_str("numpy").unwrap()))
        .collect();
    assert_eq!(pairs, vec![("3.10", "1.22"), ("3.11", "1.23"), ("3.12", "1.26")]);
}

/// Variants differing only in unused variables collapse to one identity.
#[test]
fn test_identity_ignores_unused_variables() {
    let project = TestProject::new().unwrap();
    let fixture = RecipeFixture::new("plain", "package:\n  name: plain\n  version: 0.1\n")
        .with_config("python: ['3.11', '3.12']\nzlib: ['1.2', '1.3']\n");
    let recipe = project.write_recipe(&fixture).unwrap();

    let report = project.render(&recipe, &project.render_config("linux-64")).unwrap();
    assert_eq!(report.metadata.len(), 1);
    assert_eq!(report.metadata[0].dist(), "plain-0.1-0");
    assert!(report.loop_vars().is_empty());
}
