use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use easyp_config::ProjectConfig;
use easyp_mod::{DirWalker, LocalWalker, LockfileInfo, Storage};

use crate::model::{Diagnostic, DiagnosticCode, ProtoFile, ProtoFileSet, ProtoRoot, RootSource};
use crate::{ProjectError, VENDOR_DIR};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnumerateOptions {
    /// Also walk the install directories of every locked module.
    pub include_imports: bool,
}

/// Collect the `.proto` files visible to a project.
///
/// Local inputs come first in declaration order, then (with `include_imports`) installed
/// modules in lockfile order. Within a root, files are ordered by import path. When two
/// roots provide the same import path the earlier one is kept and a
/// [`DiagnosticCode::ImportPathCollision`] is reported.
pub fn enumerate_files(
    project_root: &Path,
    config: &ProjectConfig,
    storage: &Storage,
    options: EnumerateOptions,
) -> Result<ProtoFileSet, ProjectError> {
    let mut collector = Collector::default();

    for input in config.local_inputs() {
        let root = project_root.join(&input.root);
        let scan = project_root.join(&input.path);
        let skip_project_dirs = is_project_root(&input.path);
        collector.add_root(RootSource::LocalInput, root, &scan, skip_project_dirs)?;
    }

    if options.include_imports {
        let locked: Vec<LockfileInfo> = storage.lockfile().lock().deps_iter().collect();
        for entry in locked {
            let dir = storage.install_dir(&entry.name, &entry.version);
            let source = RootSource::Module {
                name: entry.name,
                version: entry.version,
            };
            if !dir.is_dir() {
                collector.set.errors.push(Diagnostic {
                    code: DiagnosticCode::MissingInstallDir,
                    message: format!("{source} is locked but not installed"),
                    paths: vec![dir],
                });
                continue;
            }
            collector.add_root(source, dir.clone(), &dir, false)?;
        }
    }

    let set = collector.set;
    tracing::debug!(
        target = "easyp.project",
        roots = set.roots.len(),
        files = set.files.len(),
        errors = set.errors.len(),
        "enumerated proto files"
    );
    Ok(set)
}

#[derive(Default)]
struct Collector {
    set: ProtoFileSet,
    // import path -> index into `set.files`
    placed: HashMap<String, usize>,
}

impl Collector {
    fn add_root(
        &mut self,
        source: RootSource,
        root: PathBuf,
        scan: &Path,
        skip_project_dirs: bool,
    ) -> Result<(), ProjectError> {
        let mut found: Vec<(String, PathBuf)> = Vec::new();
        LocalWalker::new(scan).walk(&mut |rel| {
            if !rel.ends_with(".proto") {
                return Ok(());
            }
            if skip_project_dirs && is_ignored_project_path(rel) {
                return Ok(());
            }
            let path = scan.join(rel);
            let import_path = match path.strip_prefix(&root) {
                Ok(under_root) => slash_path(under_root),
                Err(_) => rel.to_string(),
            };
            found.push((import_path, path));
            Ok(())
        })?;
        found.sort_by(|a, b| a.0.cmp(&b.0));

        if found.is_empty() {
            self.set.errors.push(Diagnostic {
                code: DiagnosticCode::EmptyRoot,
                message: format!("{source} root {} contains no .proto files", scan.display()),
                paths: vec![scan.to_path_buf()],
            });
        }

        for (import_path, path) in found {
            if let Some(&index) = self.placed.get(&import_path) {
                let winner = &self.set.files[index];
                // Overlapping inputs reach the same file more than once.
                if winner.path == path {
                    continue;
                }
                self.set.errors.push(Diagnostic {
                    code: DiagnosticCode::ImportPathCollision,
                    message: format!(
                        "import path {import_path} is provided by both {} and {source}",
                        winner.source
                    ),
                    paths: vec![winner.path.clone(), path],
                });
                continue;
            }
            self.placed.insert(import_path.clone(), self.set.files.len());
            self.set.files.push(ProtoFile {
                source: source.clone(),
                import_path,
                path,
                root: root.clone(),
            });
        }

        let known = self
            .set
            .roots
            .iter()
            .any(|known| known.source == source && known.path == root);
        if !known {
            self.set.roots.push(ProtoRoot { source, path: root });
        }
        Ok(())
    }
}

fn is_project_root(path: &Path) -> bool {
    path.components().all(|c| matches!(c, Component::CurDir))
}

// Hidden directories and the vendor output are not sources when the project root is an input.
fn is_ignored_project_path(rel: &str) -> bool {
    let components: Vec<&str> = rel.split('/').collect();
    let Some((_file, dirs)) = components.split_last() else {
        return false;
    };
    dirs.first() == Some(&VENDOR_DIR) || dirs.iter().any(|dir| dir.starts_with('.'))
}

fn slash_path(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
