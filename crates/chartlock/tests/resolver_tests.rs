//! Integration tests for dependency resolution against cached catalogs

mod common;

use chartlock::matcher::MatchError;
use chartlock::{hash_requirements, Dependency, Requirements, ResolveError, Resolver};
use common::{index_yaml, write_local_chart, Fixture, INCUBATOR, STABLE};

fn resolver(fixture: &Fixture) -> Resolver {
    Resolver::new(&fixture.chart, fixture.settings.repositories().unwrap())
}

fn two_repo_fixture() -> Fixture {
    let fixture = Fixture::new();
    fixture.add_repository("stable", STABLE);
    fixture.add_repository("incubator", INCUBATOR);
    fixture.write_cache(
        "stable",
        &index_yaml(&[("alpine", "0.2.0"), ("alpine", "0.1.0"), ("mariadb", "4.3.1")]),
    );
    fixture.write_cache("incubator", &index_yaml(&[("kafka", "0.9.0"), ("kafka", "0.8.1")]));
    fixture
}

#[test]
fn test_alpine_example() {
    let fixture = two_repo_fixture();

    let lock = resolver(&fixture)
        .resolve(&[Dependency::new("alpine", "", STABLE)])
        .unwrap();
    assert_eq!(lock.dependencies[0].version, "0.2.0");

    let lock = resolver(&fixture)
        .resolve(&[Dependency::new("alpine", "0.1.0", STABLE)])
        .unwrap();
    assert_eq!(lock.dependencies[0].version, "0.1.0");
    assert_eq!(
        lock.dependencies[0].url.as_deref(),
        Some("https://charts.example.com/stable/alpine-0.1.0.tgz")
    );
}

#[test]
fn test_digest_independent_of_declaration_order() {
    let fixture = two_repo_fixture();

    let forward = Requirements::from_str(
        r#"
dependencies:
  - name: alpine
    version: ">=0.1.0"
    repository: https://charts.example.com/stable
  - name: kafka
    version: ~0.8
    repository: "@incubator"
    condition: kafka.enabled
  - name: mariadb
    version: 4.x
    repository: https://charts.example.com/stable/
"#,
    )
    .unwrap();
    let mut reversed = forward.dependencies.clone();
    reversed.reverse();

    let a = resolver(&fixture).resolve(&forward.dependencies).unwrap();
    let b = resolver(&fixture).resolve(&reversed).unwrap();

    assert_eq!(a.digest, b.digest);
    assert_eq!(a.digest, hash_requirements(&forward.dependencies).unwrap());

    // Declared order is kept in the lock
    let names: Vec<_> = a.dependencies.iter().map(|d| d.name.as_str()).collect();
    assert_eq!(names, vec!["alpine", "kafka", "mariadb"]);
    let versions: Vec<_> = a.dependencies.iter().map(|d| d.version.as_str()).collect();
    assert_eq!(versions, vec!["0.2.0", "0.8.1", "4.3.1"]);
}

#[test]
fn test_no_partial_lock() {
    let fixture = two_repo_fixture();
    let deps = vec![
        Dependency::new("alpine", "", STABLE),
        Dependency::new("kafka", "^2.0.0", INCUBATOR),
        Dependency::new("mariadb", "", STABLE),
    ];

    match resolver(&fixture).resolve(&deps) {
        Err(ResolveError::Match(MatchError::NoMatchingVersion { name, .. })) => {
            assert_eq!(name, "kafka")
        }
        other => panic!("expected NoMatchingVersion, got {:?}", other),
    }
}

#[test]
fn test_invalid_constraint_fails_resolution() {
    let fixture = two_repo_fixture();
    let deps = vec![Dependency::new("alpine", "=>0.1", STABLE)];
    assert!(matches!(
        resolver(&fixture).resolve(&deps),
        Err(ResolveError::Match(MatchError::InvalidConstraint { .. }))
    ));
}

#[test]
fn test_unknown_repository_names_the_url() {
    let fixture = two_repo_fixture();
    let deps = vec![Dependency::new("x", "", "https://nope.example/charts")];
    let err = resolver(&fixture).resolve(&deps).unwrap_err();
    assert!(matches!(err, ResolveError::UnknownRepository { .. }));
    assert!(err.to_string().contains("https://nope.example/charts"));
}

#[test]
fn test_catalogs_are_read_fresh_each_call() {
    let fixture = two_repo_fixture();
    let resolver = resolver(&fixture);
    let deps = vec![Dependency::new("alpine", "", STABLE)];

    assert_eq!(resolver.resolve(&deps).unwrap().dependencies[0].version, "0.2.0");

    fixture.write_cache("stable", &index_yaml(&[("alpine", "0.3.0"), ("alpine", "0.2.0")]));
    assert_eq!(resolver.resolve(&deps).unwrap().dependencies[0].version, "0.3.0");
}

#[test]
fn test_unsynced_repository() {
    let fixture = Fixture::new();
    fixture.add_repository("stable", STABLE);
    let deps = vec![Dependency::new("alpine", "", STABLE)];
    assert!(matches!(
        resolver(&fixture).resolve(&deps),
        Err(ResolveError::Catalog(chartlock::CatalogError::NotFound(_)))
    ));
}

#[test]
fn test_local_dependency() {
    let fixture = Fixture::new();
    write_local_chart(&fixture.temp.path().join("common"), "common", "1.4.0");

    let lock = resolver(&fixture)
        .resolve(&[Dependency::new("common", "^1.0.0", "file://../common")])
        .unwrap();
    assert_eq!(lock.dependencies[0].version, "1.4.0");
    assert_eq!(lock.dependencies[0].repository, "file://../common");
    assert_eq!(lock.dependencies[0].url, None);

    assert!(matches!(
        resolver(&fixture).resolve(&[Dependency::new("common", "^2.0.0", "file://../common")]),
        Err(ResolveError::Match(MatchError::NoMatchingVersion { .. }))
    ));
    assert!(matches!(
        resolver(&fixture).resolve(&[Dependency::new("gone", "", "file://../gone")]),
        Err(ResolveError::LocalChart { .. })
    ));
}

#[test]
fn test_index_digest_is_locked() {
    let fixture = two_repo_fixture();
    let lock = resolver(&fixture)
        .resolve(&[Dependency::new("mariadb", "", "@stable")])
        .unwrap();
    let expected = chartlock::provenance::digest(&common::archive("mariadb", "4.3.1"));
    assert_eq!(lock.dependencies[0].digest.as_deref(), Some(expected.as_str()));
}
