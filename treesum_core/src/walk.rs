//! Filesystem walking as enter/visit/leave events.
//!
//! The `ignore` walker yields entries in pre-order with their depth. Depth
//! changes tell us when a directory has been left, which turns the flat
//! stream into the visitor callbacks the graph builder needs.

use crate::config::RunConfig;
use crate::error::{Error, Result};
use crate::task::{EntryKind, EntryMetadata};
use std::path::{Path, PathBuf};

/// Receives depth-first traversal events.
pub trait TreeVisitor {
    /// A directory is about to be walked (pre-order).
    fn enter_directory(&mut self, path: &Path, metadata: EntryMetadata) -> Result<()>;

    /// A regular file inside the current directory.
    fn visit_file(&mut self, path: &Path, metadata: EntryMetadata) -> Result<()>;

    /// Every entry below `path` has been delivered (post-order).
    fn leave_directory(&mut self, path: &Path) -> Result<()>;

    /// An entry inside the current directory that cannot be walked or read.
    fn visit_fault(&mut self, path: &Path, kind: EntryKind, error: Error) -> Result<()>;

    /// The listing of the currently open directory failed.
    fn directory_fault(&mut self, path: &Path, error: Error) -> Result<()>;
}

/// Walk `root` depth-first and report every entry to `visitor`.
pub fn walk_tree<V: TreeVisitor>(root: &Path, config: &RunConfig, visitor: &mut V) -> Result<()> {
    let walker = ignore::WalkBuilder::new(root)
        .follow_links(config.follow_links)
        .hidden(!config.include_hidden)
        .git_ignore(config.git_ignore)
        .git_exclude(config.git_ignore)
        .git_global(config.git_ignore)
        .ignore(config.git_ignore)
        .parents(config.git_ignore)
        .require_git(false)
        .build();

    let mut open: Vec<PathBuf> = Vec::new();
    for item in walker {
        match item {
            Ok(entry) => handle_entry(&entry, &mut open, visitor)?,
            Err(err) => handle_error(err, &mut open, visitor)?,
        }
    }
    close_to_depth(0, &mut open, visitor)
}

fn handle_entry<V: TreeVisitor>(
    entry: &ignore::DirEntry,
    open: &mut Vec<PathBuf>,
    visitor: &mut V,
) -> Result<()> {
    close_to_depth(entry.depth(), open, visitor)?;

    let path = entry.path();
    let Some(file_type) = entry.file_type() else {
        // Only stdin entries lack a file type.
        return Ok(());
    };

    if file_type.is_dir() {
        let metadata = entry
            .metadata()
            .map(|m| EntryMetadata::from_metadata(&m))
            .unwrap_or_else(|_| EntryMetadata::probe(path));
        visitor.enter_directory(path, metadata)?;
        open.push(path.to_path_buf());
    } else if file_type.is_file() {
        match entry.metadata() {
            Ok(m) => visitor.visit_file(path, EntryMetadata::from_metadata(&m))?,
            Err(err) => {
                let (_, _, inner) = unwrap_error(err);
                visitor.visit_fault(path, EntryKind::File, entry_error(path, inner))?;
            }
        }
    } else if file_type.is_symlink() {
        tracing::debug!(path = %path.display(), "skipping symlink (links not followed)");
    } else {
        tracing::warn!(path = %path.display(), "skipping special file");
    }
    Ok(())
}

fn handle_error<V: TreeVisitor>(
    err: ignore::Error,
    open: &mut Vec<PathBuf>,
    visitor: &mut V,
) -> Result<()> {
    let (path, depth, inner) = unwrap_error(err);
    match inner {
        ignore::Error::Loop { ancestor, child } => {
            if !close_to_parent(&child, open, visitor)? {
                return Ok(());
            }
            let error = Error::symlink_cycle(&child, &ancestor);
            visitor.visit_fault(&child, EntryKind::Directory, error)
        }
        other => match path {
            Some(path) if open.last() == Some(&path) => {
                visitor.directory_fault(&path, entry_error(&path, other))
            }
            Some(path) => {
                if !close_to_parent(&path, open, visitor)? {
                    return Ok(());
                }
                visitor.visit_fault(&path, EntryKind::File, entry_error(&path, other))
            }
            None => {
                // A failed read of a directory's next entry carries the depth
                // of that entry, so its directory is the one at `depth - 1`.
                if let Some(depth) = depth {
                    close_to_depth(depth, open, visitor)?;
                }
                match open.last().cloned() {
                    Some(dir) => visitor.directory_fault(&dir, entry_error(&dir, other)),
                    None => {
                        tracing::warn!(error = %other, "walk error outside the walked root");
                        Ok(())
                    }
                }
            }
        },
    }
}

/// Leave directories until at most `depth` remain open.
fn close_to_depth<V: TreeVisitor>(
    depth: usize,
    open: &mut Vec<PathBuf>,
    visitor: &mut V,
) -> Result<()> {
    while open.len() > depth {
        if let Some(dir) = open.pop() {
            visitor.leave_directory(&dir)?;
        }
    }
    Ok(())
}

/// Leave directories until the top one contains `path`. Returns `false` if
/// `path` lies outside every open directory.
fn close_to_parent<V: TreeVisitor>(
    path: &Path,
    open: &mut Vec<PathBuf>,
    visitor: &mut V,
) -> Result<bool> {
    while let Some(top) = open.last() {
        if path != top && path.starts_with(top) {
            return Ok(true);
        }
        if let Some(dir) = open.pop() {
            visitor.leave_directory(&dir)?;
        }
    }
    tracing::warn!(path = %path.display(), "walk error outside the walked root");
    Ok(false)
}

/// Strip depth, line and path wrappers, keeping the innermost path and the
/// outermost depth.
fn unwrap_error(mut err: ignore::Error) -> (Option<PathBuf>, Option<usize>, ignore::Error) {
    let mut path = None;
    let mut depth = None;
    loop {
        err = match err {
            ignore::Error::WithDepth { depth: d, err } => {
                depth.get_or_insert(d);
                *err
            }
            ignore::Error::WithLineNumber { err, .. } => *err,
            ignore::Error::WithPath { path: p, err } => {
                path = Some(p);
                *err
            }
            other => return (path, depth, other),
        };
    }
}

fn entry_error(path: &Path, err: ignore::Error) -> Error {
    match err {
        ignore::Error::Io(source) => Error::entry_io(path, source),
        other => Error::entry_io(path, std::io::Error::other(other.to_string())),
    }
}
