//! C6: folder lister. Two recursive descents — rooted at the inbox path
//! and at the general path — with subfolder-style-dependent recursion
//! and INBOX-overlap deduplication (spec.md §4.5).

use std::fs;
use std::path::{Path, PathBuf};

use log::warn;
use walkdir::WalkDir;

use crate::config::{StoreConfig, SubfolderStyle};
use crate::error::Result;
use crate::path::INBOX;
use crate::validate::CUR;

/// Which roots to recurse (spec.md §6 `list` flags).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ListScope {
    Inbox,
    Path,
    Both,
}

/// Lists logical folder names visible under the scope requested, with
/// `INBOX` suppressed from double-listing when it nests inside (or
/// contains) the general root.
pub fn list(config: &StoreConfig, scope: ListScope) -> Result<Vec<String>> {
    let inbox_canon = fs::canonicalize(&config.inbox).ok();
    let path_canon = config.path.as_ref().and_then(|p| fs::canonicalize(p).ok());
    let path_nests_in_inbox = match (&inbox_canon, &path_canon) {
        (Some(i), Some(p)) => i != p && p.starts_with(i),
        _ => false,
    };

    let mut names = Vec::new();

    if matches!(scope, ListScope::Inbox | ListScope::Both) {
        names.push(INBOX.to_string());
        let mut nested = Vec::new();
        discover(&config.inbox, config.subfolders, &mut nested);
        for sub in nested {
            names.push(format!("{INBOX}/{sub}"));
        }
    }

    // When the general root is nested inside the inbox and only the
    // general root was requested, list it here inline — an inbox-only
    // listing in a separate call wouldn't otherwise reach it.
    let should_list_path = match scope {
        ListScope::Path => true,
        ListScope::Both => !path_nests_in_inbox,
        ListScope::Inbox => false,
    };

    if should_list_path {
        if let Some(root) = &config.path {
            discover_into_names(root, config, &mut names);
        }
    }

    Ok(names)
}

fn discover_into_names(root: &Path, config: &StoreConfig, names: &mut Vec<String>) {
    let mut entries = Vec::new();
    discover(root, config.subfolders, &mut entries);

    let inbox_canon = fs::canonicalize(&config.inbox).ok();

    for name in entries {
        let candidate = crate::path::resolve(config, &name).unwrap_or_else(|_| root.join(&name));
        if inbox_canon.is_some() && fs::canonicalize(&candidate).ok() == inbox_canon {
            warn!("the real INBOX folder was found nested under the general root at {}, skipping", candidate.display());
            continue;
        }
        names.push(name);
    }
}

/// Recursively walks `root`, pushing logical (already-translated-back)
/// folder names into `out`. Does not include `root` itself.
fn discover(root: &Path, style: SubfolderStyle, out: &mut Vec<String>) {
    match style {
        SubfolderStyle::Unset => {}
        SubfolderStyle::Verbatim => walk_verbatim(root, PathBuf::new(), out),
        SubfolderStyle::MaildirPlusPlus => walk_maildirpp(root, out),
        SubfolderStyle::Legacy => walk_legacy(root, PathBuf::new(), out),
    }
}

fn is_maildir(dir: &Path) -> bool {
    dir.join(CUR).is_dir()
}

fn walk_verbatim(root: &Path, _prefix: PathBuf, out: &mut Vec<String>) {
    let walker = WalkDir::new(root)
        .follow_links(true)
        .min_depth(1)
        .into_iter()
        .filter_entry(|entry| !entry.file_name().to_string_lossy().starts_with('.'));

    for entry in walker.filter_map(|e| e.ok()) {
        if !entry.file_type().is_dir() {
            continue;
        }
        if is_maildir(entry.path()) {
            if let Ok(rel) = entry.path().strip_prefix(root) {
                out.push(rel.to_string_lossy().replace('\\', "/"));
            }
        }
    }
}

fn walk_legacy(dir: &Path, prefix: PathBuf, out: &mut Vec<String>) {
    let Ok(entries) = fs::read_dir(dir) else { return };
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let Some(raw_name) = entry.file_name().to_str().map(str::to_string) else { continue };
        if raw_name == "cur" || raw_name == "new" || raw_name == "tmp" {
            continue;
        }
        if let Some(name) = raw_name.strip_prefix('.') {
            let logical = prefix.join(name);
            if is_maildir(&path) {
                out.push(logical.to_string_lossy().replace('\\', "/"));
            }
            walk_legacy(&path, logical, out);
        } else if !raw_name.starts_with('.') {
            // Non-dotted entries are descended into but never emitted
            // themselves (spec.md §4.5).
            walk_legacy(&path, prefix.clone(), out);
        }
    }
}

fn walk_maildirpp(root: &Path, out: &mut Vec<String>) {
    let Ok(entries) = fs::read_dir(root) else { return };
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let Some(raw_name) = entry.file_name().to_str().map(str::to_string) else { continue };
        let Some(dotted) = raw_name.strip_prefix('.') else { continue };
        if dotted.starts_with('.') {
            continue;
        }
        if !is_maildir(&path) {
            continue;
        }
        out.push(dotted.replace('.', "/"));
    }
}
