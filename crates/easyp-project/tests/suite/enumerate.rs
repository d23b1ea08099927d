use easyp_project::{
    enumerate_files, open_project, DiagnosticCode, EnumerateOptions, RootSource,
};
use pretty_assertions::assert_eq;

use super::fixture::Project;

const WITH_IMPORTS: EnumerateOptions = EnumerateOptions {
    include_imports: true,
};

fn import_paths(set: &easyp_project::ProtoFileSet) -> Vec<(String, String)> {
    set.files
        .iter()
        .map(|f| (f.source.to_string(), f.import_path.clone()))
        .collect()
}

fn local(import_path: &str) -> (String, String) {
    ("local-input".to_string(), import_path.to_string())
}

#[test]
fn local_inputs_come_first_then_modules_in_lockfile_order() {
    let project = Project::new();
    project
        .write("proto/acme/api/v1/service.proto", "")
        .write("proto/acme/api/v1/types.proto", "");
    project.install(
        "github.com/z/last",
        "v1.0.0",
        &[("z/z.proto", "")],
    );
    project.install(
        "github.com/googleapis/googleapis",
        "v0.0.0-20240222234643-3a1b2c3d4e5f",
        &[("google/api/http.proto", ""), ("google/api/annotations.proto", "")],
    );
    let config = project.config(
        "generate:\n  inputs:\n    - directory: { path: proto/acme, root: proto }\n",
    );

    let set = enumerate_files(&project.root, &config, &project.storage(), WITH_IMPORTS).unwrap();

    assert_eq!(
        set.roots
            .iter()
            .map(|root| root.source.to_string())
            .collect::<Vec<_>>(),
        vec![
            "local-input",
            "module:github.com/googleapis/googleapis@v0.0.0-20240222234643-3a1b2c3d4e5f",
            "module:github.com/z/last@v1.0.0",
        ]
    );
    assert_eq!(set.roots[0].path, project.root.join("proto"));

    let googleapis = "module:github.com/googleapis/googleapis@v0.0.0-20240222234643-3a1b2c3d4e5f";
    assert_eq!(
        import_paths(&set),
        vec![
            local("acme/api/v1/service.proto"),
            local("acme/api/v1/types.proto"),
            (googleapis.into(), "google/api/annotations.proto".into()),
            (googleapis.into(), "google/api/http.proto".into()),
            ("module:github.com/z/last@v1.0.0".into(), "z/z.proto".into()),
        ]
    );
    assert!(set.errors.is_empty(), "{:?}", set.errors);

    let http = set.find("google/api/http.proto").unwrap();
    assert_eq!(
        http.path,
        project
            .storage()
            .install_dir(
                "github.com/googleapis/googleapis",
                "v0.0.0-20240222234643-3a1b2c3d4e5f"
            )
            .join("google/api/http.proto")
    );
}

#[test]
fn imports_are_skipped_unless_requested() {
    let project = Project::new();
    project.write("a.proto", "");
    project.install("github.com/acme/common", "v1.0.0", &[("common/c.proto", "")]);
    let config = project.config("");

    let set = enumerate_files(
        &project.root,
        &config,
        &project.storage(),
        EnumerateOptions::default(),
    )
    .unwrap();
    assert_eq!(set.roots.len(), 1);
    assert_eq!(import_paths(&set), vec![local("a.proto")]);
}

#[test]
fn project_root_input_ignores_vendor_hidden_dirs_and_non_protos() {
    let project = Project::new();
    project
        .write("api/a.proto", "")
        .write("api/readme.md", "")
        .write("easyp_vendor/google/api/http.proto", "")
        .write(".git/hooks/x.proto", "");

    let set = enumerate_files(
        &project.root,
        &project.config(""),
        &project.storage(),
        EnumerateOptions::default(),
    )
    .unwrap();
    assert_eq!(import_paths(&set), vec![local("api/a.proto")]);
}

#[test]
fn collision_keeps_first_file_and_reports_both() {
    let project = Project::new();
    project.write("google/api/http.proto", "local copy");
    let installed = project.install(
        "github.com/googleapis/googleapis",
        "v1.0.0",
        &[("google/api/http.proto", "upstream")],
    );

    let set = enumerate_files(
        &project.root,
        &project.config(""),
        &project.storage(),
        WITH_IMPORTS,
    )
    .unwrap();

    assert_eq!(set.files.len(), 1);
    assert_eq!(set.files[0].source, RootSource::LocalInput);

    // The module root now has no placed files, but it is not empty.
    assert_eq!(set.errors.len(), 1, "{:?}", set.errors);
    let collision = &set.errors[0];
    assert_eq!(collision.code, DiagnosticCode::ImportPathCollision);
    assert_eq!(
        collision.paths,
        vec![
            project.root.join("google/api/http.proto"),
            installed.join("google/api/http.proto"),
        ]
    );
}

#[test]
fn missing_install_dir_and_empty_roots_are_reported() {
    let project = Project::new();
    project.write("proto/.keep", "");
    project.lock_only("github.com/acme/gone", "v1.0.0");
    let config = project.config(
        "generate:\n  inputs:\n    - directory: proto\n    - directory: missing\n",
    );

    let set = enumerate_files(&project.root, &config, &project.storage(), WITH_IMPORTS).unwrap();

    let codes: Vec<DiagnosticCode> = set.errors.iter().map(|d| d.code).collect();
    assert_eq!(
        codes,
        vec![
            DiagnosticCode::EmptyRoot,
            DiagnosticCode::EmptyRoot,
            DiagnosticCode::MissingInstallDir,
        ]
    );
    assert_eq!(set.roots.len(), 2, "missing install dirs are not roots");
    assert!(set.files.is_empty());
    assert_eq!(
        set.errors[2].paths,
        vec![project
            .storage()
            .install_dir("github.com/acme/gone", "v1.0.0")]
    );
}

#[test]
fn file_set_serializes_with_stable_codes() {
    let project = Project::new();
    project.lock_only("github.com/acme/gone", "v1.0.0");
    project.write("a.proto", "");

    let set = enumerate_files(
        &project.root,
        &project.config(""),
        &project.storage(),
        WITH_IMPORTS,
    )
    .unwrap();
    let json = serde_json::to_value(&set).unwrap();
    assert_eq!(json["errors"][0]["code"], "missing-install-dir");
    assert_eq!(json["files"][0]["source"]["kind"], "local_input");
}

#[test]
fn open_project_reads_config_and_lockfile() {
    let project = Project::new();
    project
        .write(
            "easyp.yaml",
            "deps:\n  - github.com/acme/common@v1.0.0\ngenerate:\n  inputs:\n    - directory: api\n",
        )
        .write("api/a.proto", "")
        .write("other/b.proto", "");
    project.install("github.com/acme/common", "v1.0.0", &[("common/c.proto", "")]);

    let (config, storage) = open_project(&project.root, &project.cache_config()).unwrap();
    assert_eq!(config.deps, vec!["github.com/acme/common@v1.0.0".to_string()]);

    let set = enumerate_files(&project.root, &config, &storage, WITH_IMPORTS).unwrap();
    assert_eq!(
        import_paths(&set),
        vec![
            local("a.proto"),
            (
                "module:github.com/acme/common@v1.0.0".to_string(),
                "common/c.proto".to_string()
            ),
        ]
    );
}

#[test]
fn overlapping_inputs_with_shared_root_are_not_collisions() {
    let project = Project::new();
    project
        .write("proto/api/v1/a.proto", "")
        .write("proto/common/c.proto", "");
    let config = project.config(
        "generate:\n  inputs:\n    - directory: proto\n    - directory: { path: proto/api, root: proto }\n",
    );

    let set = enumerate_files(
        &project.root,
        &config,
        &project.storage(),
        EnumerateOptions::default(),
    )
    .unwrap();

    assert!(set.errors.is_empty(), "{:?}", set.errors);
    assert_eq!(
        set.roots.iter().map(|root| root.path.clone()).collect::<Vec<_>>(),
        vec![project.root.join("proto")]
    );
    assert_eq!(
        import_paths(&set),
        vec![local("api/v1/a.proto"), local("common/c.proto")]
    );
}
