//! Multi-output recipes.

use varia_cli::test_utils::RecipeFixture;

use crate::common::TestProject;

#[test]
fn test_parent_lists_compatible_outputs() {
    let project = TestProject::new().unwrap();
    let recipe = project.write_recipe(&RecipeFixture::multi_output()).unwrap();

    let report = project.render(&recipe, &project.render_config("linux-64")).unwrap();
    let names: Vec<&str> = report.metadata.iter().map(|m| m.name()).collect();
    assert_eq!(names, vec!["multi", "libmulti", "libmulti", "multi-tools"]);

    let parent = &report.metadata[0];
    let described: Vec<&str> = parent.outputs().iter().map(|o| o.name.as_str()).collect();
    assert_eq!(described, vec!["libmulti", "multi-tools"]);
    assert_eq!(parent.outputs()[0].identity, report.metadata[1].identity());
    assert!(parent.outputs()[0].used_vars.contains("zlib"));
    assert!(parent.outputs()[1].used_vars.is_empty());

    // The recipe as a whole uses zlib, even though only one output does
    assert!(report.used_vars.contains("zlib"));
}

#[test]
fn test_outputs_inherit_version_and_build_number() {
    let project = TestProject::new().unwrap();
    let fixture = RecipeFixture::new(
        "inherit",
        "\
package:
  name: inherit
  version: 4.2.0
build:
  number: 3
outputs:
  - name: inherit-core
  - name: inherit-extra
    version: 0.9
    build:
      number: 0
",
    );
    let recipe = project.write_recipe(&fixture).unwrap();

    let report = project.render(&recipe, &project.render_config("linux-64")).unwrap();
    let core = report.metadata.iter().find(|m| m.name() == "inherit-core").unwrap();
    let extra = report.metadata.iter().find(|m| m.name() == "inherit-extra").unwrap();

    assert_eq!(core.version(), "4.2.0");
    assert_eq!(core.build_number(), "3");
    assert_eq!(extra.version(), "0.9");
    assert_eq!(extra.build_number(), "0");
}

#[test]
fn test_output_pins_its_sibling() {
    let project = TestProject::new().unwrap();
    let fixture = RecipeFixture::new(
        "pins",
        "\
package:
  name: pins
  version: 2.1.0
outputs:
  - name: libpins
  - name: pins-cli
    requirements:
      run:
        - {{ pin_subpackage('libpins', max_pin='x.x') }}
",
    );
    let recipe = project.write_recipe(&fixture).unwrap();

    let report = project.render(&recipe, &project.render_config("linux-64")).unwrap();
    let cli = report.metadata.iter().find(|m| m.name() == "pins-cli").unwrap();
    assert_eq!(cli.get_str("requirements/run/0"), Some("libpins >=2.1.0,<2.2a0"));
}

#[test]
fn test_output_selected_by_variable_uses_only_what_it_reads() {
    let project = TestProject::new().unwrap();
    let fixture = RecipeFixture::new(
        "pyext",
        "\
package:
  name: pyext
  version: 1.0
outputs:
  - name: pyext-lib
    requirements:
      host:
        - openssl
  - name: pyext-py
    requirements:
      host:
        - python
        - openssl
",
    )
    .with_config("python: ['3.11', '3.12']\nopenssl: ['3']\n");
    let recipe = project.write_recipe(&fixture).unwrap();

    let report = project.render(&recipe, &project.render_config("linux-64")).unwrap();
    let count = |name: &str| report.metadata.iter().filter(|m| m.name() == name).count();
    assert_eq!(count("pyext-lib"), 1);
    assert_eq!(count("pyext-py"), 2);

    let lib = report.metadata.iter().find(|m| m.name() == "pyext-lib").unwrap();
    assert!(!lib.used_vars().contains("python"));
}

#[test]
fn test_output_renders_while_parent_compares_python() {
    let project = TestProject::new().unwrap();
    let fixture = RecipeFixture::new(
        "cmp-parent",
        "\
package:
  name: cmp-parent
  version: 1.0
requirements:
  host:
    - python
{% if py >= 38 %}
    - newthing
{% endif %}
outputs:
  - name: libb
",
    )
    .with_config("python: ['3.7', '3.9']\n");
    let recipe = project.write_recipe(&fixture).unwrap();

    let report = project.render(&recipe, &project.render_config("linux-64")).unwrap();
    let parents: Vec<_> = report.metadata.iter().filter(|m| m.name() == "cmp-parent").collect();
    assert_eq!(parents.len(), 2);
    assert_eq!(parents[0].get_str("requirements/host/1"), None);
    assert_eq!(parents[1].get_str("requirements/host/1"), Some("newthing"));

    let libb: Vec<_> = report.metadata.iter().filter(|m| m.name() == "libb").collect();
    assert_eq!(libb.len(), 1);
    assert!(libb[0].used_vars().is_empty());
}

#[test]
fn test_output_compares_python_and_parent_reads_nothing() {
    let project = TestProject::new().unwrap();
    let fixture = RecipeFixture::new(
        "cmp-output",
        "\
package:
  name: cmp-output
  version: 1.0
outputs:
  - name: liba
    requirements:
      run:
        - base
{% if py >= 38 %}
        - newthing
{% endif %}
",
    )
    .with_config("python: ['3.7', '3.9']\n");
    let recipe = project.write_recipe(&fixture).unwrap();

    let report = project.render(&recipe, &project.render_config("linux-64")).unwrap();
    assert_eq!(report.metadata.iter().filter(|m| m.name() == "cmp-output").count(), 1);

    let liba: Vec<_> = report.metadata.iter().filter(|m| m.name() == "liba").collect();
    assert_eq!(liba.len(), 2);
    assert_eq!(liba[0].variant().get_str("python"), Some("3.7"));
    assert_eq!(liba[0].get_str("requirements/run/1"), None);
    assert_eq!(liba[1].get_str("requirements/run/1"), Some("newthing"));
}
