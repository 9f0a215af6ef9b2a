use std::path::PathBuf;

use crate::config::{StoreConfig, SubfolderStyle};
use crate::error::{Error, Result};

/// `INBOX` is reserved: it rebases onto the configured inbox path rather
/// than the general root, per spec.md §4.1.
pub const INBOX: &str = "INBOX";

/// Resolves a logical folder name to its on-disk path, applying the
/// reserved `INBOX` rebasing rule and the store's configured subfolder
/// style.
pub fn resolve(config: &StoreConfig, name: &str) -> Result<PathBuf> {
    if name == INBOX {
        return Ok(config.inbox.clone());
    }

    if let Some(sub) = name.strip_prefix("INBOX/") {
        return subfolder_path(&config.inbox, sub, config.subfolders);
    }

    let root = config
        .path
        .as_ref()
        .ok_or_else(|| Error::BadRootError(config.inbox.clone()))?;

    subfolder_path(root, name, config.subfolders)
}

fn subfolder_path(root: &std::path::Path, name: &str, style: SubfolderStyle) -> Result<PathBuf> {
    if name.is_empty() {
        return Ok(root.to_path_buf());
    }

    match style {
        SubfolderStyle::Unset => Err(Error::SubfoldersUnsetError(name.to_string())),
        SubfolderStyle::Verbatim => Ok(root.join(name)),
        SubfolderStyle::MaildirPlusPlus => {
            if name.split('/').any(|part| part.contains('.')) {
                return Err(Error::InvalidFolderNameError(name.to_string()));
            }
            let mut flattened = String::new();
            for (i, part) in name.split('/').enumerate() {
                if i == 0 {
                    flattened.push('/');
                } else {
                    flattened.push('.');
                }
                flattened.push_str(part);
            }
            Ok(root.join(flattened.trim_start_matches('/')))
        }
        SubfolderStyle::Legacy => {
            let dotted: Vec<String> = name.split('/').map(|part| format!(".{part}")).collect();
            Ok(root.join(dotted.join("/")))
        }
    }
}
