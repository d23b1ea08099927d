use std::fs;

use easyp_project::{vendor, DiagnosticCode, VENDOR_DIR};

use super::fixture::Project;

#[test]
fn vendors_module_files_by_import_path() {
    let project = Project::new();
    project.write("api/service.proto", "import \"google/api/http.proto\";");
    project.install(
        "github.com/googleapis/googleapis",
        "v1.0.0",
        &[("google/api/http.proto", "message Http {}")],
    );

    let report = vendor(&project.root, &project.config(""), &project.storage()).unwrap();

    assert_eq!(report.dir, project.root.join(VENDOR_DIR));
    assert_eq!(report.files, 1);
    assert!(report.diagnostics.is_empty());
    assert_eq!(
        fs::read_to_string(report.dir.join("google/api/http.proto")).unwrap(),
        "message Http {}"
    );
    assert!(!report.dir.join("api/service.proto").exists());
}

#[test]
fn vendor_dir_is_recreated() {
    let project = Project::new();
    project
        .write("api/a.proto", "")
        .write("easyp_vendor/stale/old.proto", "");
    project.install("github.com/acme/common", "v1.0.0", &[("common/c.proto", "")]);

    let report = vendor(&project.root, &project.config(""), &project.storage()).unwrap();

    assert_eq!(report.files, 1);
    assert!(!report.dir.join("stale").exists());
    assert!(report.dir.join("common/c.proto").is_file());

    // Vendored files are not picked up as local sources on the next run.
    let again = vendor(&project.root, &project.config(""), &project.storage()).unwrap();
    assert_eq!(again.files, 1);
    assert!(again.diagnostics.is_empty(), "{:?}", again.diagnostics);
}

#[test]
fn colliding_module_files_are_not_vendored() {
    let project = Project::new();
    project.write("google/api/http.proto", "local");
    project.install(
        "github.com/googleapis/googleapis",
        "v1.0.0",
        &[("google/api/http.proto", "upstream"), ("google/api/annotations.proto", "")],
    );

    let report = vendor(&project.root, &project.config(""), &project.storage()).unwrap();

    assert_eq!(report.files, 1);
    assert_eq!(report.diagnostics.len(), 1);
    assert_eq!(report.diagnostics[0].code, DiagnosticCode::ImportPathCollision);
    assert!(!report.dir.join("google/api/http.proto").exists());
    assert!(report.dir.join("google/api/annotations.proto").is_file());
}
