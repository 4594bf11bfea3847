//! Ordering, idempotence and parallel/serial agreement.

use std::thread;

use varia_cli::metadata::RenderedMetadata;
use varia_cli::test_utils::RecipeFixture;

use crate::common::TestProject;

fn matrix_recipe() -> RecipeFixture {
    RecipeFixture::new(
        "matrix",
        "\
package:
  name: matrix
  version: 5.0
requirements:
  build:
    - {{ compiler('c') }}
  host:
    - python
    - openssl
    - zlib  # [linux]
  run:
    - python
outputs:
  - name: matrix-lib
    requirements:
      host:
        - openssl
  - name: matrix-py
    requirements:
      host:
        - python
",
    )
    .with_config(
        "\
python:
  - '3.10'
  - '3.11'
  - '3.12'
openssl:
  - '1.1'
  - '3'
zlib:
  - '1.2'
  - '1.3'
c_compiler:
  - gcc
c_compiler_version:
  - '12'
  - '13'
zip_keys:
  - [c_compiler_version, zlib]
",
    )
}

fn identities(metadata: &[RenderedMetadata]) -> Vec<String> {
    metadata.iter().map(RenderedMetadata::identity).collect()
}

#[test]
fn test_repeated_renders_are_identical() {
    let project = TestProject::new().unwrap();
    let recipe = project.write_recipe(&matrix_recipe()).unwrap();
    let config = project.render_config("linux-64");

    let first = project.render(&recipe, &config).unwrap();
    for _ in 0..4 {
        let again = project.render(&recipe, &config).unwrap();
        assert_eq!(identities(&again.metadata), identities(&first.metadata));
        assert_eq!(again.used_vars, first.used_vars);
    }
}

#[test]
fn test_parallel_and_serial_agree() {
    let project = TestProject::new().unwrap();
    let recipe = project.write_recipe(&matrix_recipe()).unwrap();

    let mut serial = project.render_config("linux-64");
    serial.parallel = false;
    let mut parallel = project.render_config("linux-64");
    parallel.parallel = true;

    let serial = project.render(&recipe, &serial).unwrap();
    let parallel = project.render(&recipe, &parallel).unwrap();
    assert_eq!(identities(&serial.metadata), identities(&parallel.metadata));
    let documents = |r: &varia_cli::render::RenderReport| r.metadata.iter().map(|m| m.document().clone()).collect::<Vec<_>>();
    assert_eq!(documents(&serial), documents(&parallel));
}

#[test]
fn test_identities_are_unique() {
    let project = TestProject::new().unwrap();
    let recipe = project.write_recipe(&matrix_recipe()).unwrap();
    let report = project.render(&recipe, &project.render_config("linux-64")).unwrap();

    let ids = identities(&report.metadata);
    let mut unique = ids.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), ids.len());

    // The top-level recipe multiplies over python, openssl and the zipped compiler/zlib pair
    let top = report.metadata.iter().filter(|m| m.name() == "matrix").count();
    assert_eq!(top, 3 * 2 * 2);
    assert_eq!(report.metadata.iter().filter(|m| m.name() == "matrix-lib").count(), 2);
    assert_eq!(report.metadata.iter().filter(|m| m.name() == "matrix-py").count(), 3);
}

#[test]
fn test_converged_set_is_a_fixed_point() {
    let project = TestProject::new().unwrap();
    let recipe = project.write_recipe(&matrix_recipe()).unwrap();
    let config = project.render_config("linux-64");
    let report = project.render(&recipe, &config).unwrap();

    // Pinning the used set to its own first values changes neither the set nor the names
    let mut pinned = config.clone();
    let first = &report.metadata[0];
    for name in &report.used_vars {
        if let Some(value) = first.variant().get_str(name) {
            pinned.variant_overrides.push(format!("{name}={value}"));
        }
    }
    let again = project.render(&recipe, &pinned).unwrap();
    assert_eq!(again.used_vars, report.used_vars);
    assert_eq!(again.metadata[0].identity(), first.identity());
}

#[test]
fn test_concurrent_renders_are_isolated() {
    let project = TestProject::new().unwrap();
    let recipe = project.write_recipe(&matrix_recipe()).unwrap();
    let config = project.render_config("linux-64");
    let expected = identities(&project.render(&recipe, &config).unwrap().metadata);

    let results: Vec<Vec<String>> = thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|_| scope.spawn(|| identities(&project.render(&recipe, &config).unwrap().metadata)))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    for result in results {
        assert_eq!(result, expected);
    }
}
