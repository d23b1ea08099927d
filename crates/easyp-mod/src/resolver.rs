//! Requested version -> concrete [`Revision`].

use easyp_process::CancellationToken;

use crate::error::{ModError, Result};
use crate::repository::{RemoteRef, Repository};
use crate::version::{GeneratedVersion, RequestedVersion, Revision};

/// Resolve `requested` against the module's remote.
///
/// - generated versions are fetched by their embedded commit prefix
/// - tags are looked up with `ls-remote`, preferring the peeled commit of annotated tags
/// - an omitted version resolves to the default branch head, named by a tag pointing at
///   it when one exists and by a generated version otherwise
///
/// Failures of the underlying `git` commands surface as [`ModError::VersionNotFound`].
pub fn resolve<R: Repository + ?Sized>(
    repo: &R,
    requested: &RequestedVersion,
    cancel: &CancellationToken,
) -> Result<Revision> {
    let not_found = || ModError::VersionNotFound {
        module: repo.module_name().to_string(),
        version: requested.to_string(),
    };

    let revision = if requested.is_generated() {
        resolve_generated(repo, requested, cancel)
    } else if requested.is_omitted() {
        resolve_latest(repo, cancel)
    } else {
        resolve_tag(repo, requested.as_str(), cancel)
    };

    let revision = match revision {
        Ok(Some(revision)) if !revision.commit_hash.is_empty() => revision,
        Ok(_) => return Err(not_found()),
        Err(ModError::Command { command, stderr, .. }) => {
            tracing::debug!(
                target = "easyp.resolver",
                module = repo.module_name(),
                requested = %requested,
                command,
                stderr,
                "git failed while resolving version"
            );
            return Err(not_found());
        }
        Err(err) => return Err(err),
    };

    tracing::debug!(
        target = "easyp.resolver",
        module = repo.module_name(),
        requested = %requested,
        commit = %revision.commit_hash,
        version = %revision.version,
        "resolved version"
    );
    Ok(revision)
}

fn resolve_generated<R: Repository + ?Sized>(
    repo: &R,
    requested: &RequestedVersion,
    cancel: &CancellationToken,
) -> Result<Option<Revision>> {
    let generated = requested.parse_generated()?;
    let revision = Revision {
        commit_hash: generated.commit_hash_prefix,
        version: requested.as_str().to_string(),
    };
    repo.fetch(&revision, cancel)?;
    Ok(Some(revision))
}

fn resolve_tag<R: Repository + ?Sized>(
    repo: &R,
    tag: &str,
    cancel: &CancellationToken,
) -> Result<Option<Revision>> {
    let refs = repo.ls_remote(Some(tag), cancel)?;
    let exact = format!("refs/tags/{tag}");
    let peeled = format!("{exact}^{{}}");

    let commit = refs
        .iter()
        .find(|r| r.name == peeled)
        .or_else(|| refs.iter().find(|r| r.name == exact))
        .map(|r| r.commit_hash.clone());

    Ok(commit.map(|commit_hash| Revision {
        commit_hash,
        version: tag.to_string(),
    }))
}

fn resolve_latest<R: Repository + ?Sized>(
    repo: &R,
    cancel: &CancellationToken,
) -> Result<Option<Revision>> {
    let head = repo.ls_remote(Some("HEAD"), cancel)?;
    let Some(head) = head.into_iter().next() else {
        return Ok(None);
    };
    tracing::trace!(
        target = "easyp.resolver",
        module = repo.module_name(),
        commit = %head.commit_hash,
        reference = %head.name,
        "remote head"
    );

    let refs = repo.ls_remote(None, cancel)?;
    if let Some(tag) = tag_for_commit(&refs, &head.commit_hash) {
        return Ok(Some(Revision {
            commit_hash: head.commit_hash,
            version: tag.to_string(),
        }));
    }

    let mut revision = Revision {
        commit_hash: head.commit_hash,
        version: String::new(),
    };
    repo.fetch(&revision, cancel)?;
    let committed_at = repo.commit_time(&revision.commit_hash, cancel)?;
    revision.version = GeneratedVersion::new(committed_at, &revision.commit_hash).to_string();
    Ok(Some(revision))
}

// First tag in remote order whose (peeled) commit is `commit_hash`.
fn tag_for_commit<'a>(refs: &'a [RemoteRef], commit_hash: &str) -> Option<&'a str> {
    refs.iter()
        .filter(|r| r.commit_hash == commit_hash)
        .find_map(RemoteRef::tag_name)
}
