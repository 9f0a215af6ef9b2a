use std::path::PathBuf;

/// The three subfolder-naming conventions this driver understands, plus
/// the `Unset` state that makes subfolders a configuration error.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum SubfolderStyle {
    #[default]
    Unset,
    Verbatim,
    #[cfg_attr(feature = "serde", serde(rename = "maildir++"))]
    MaildirPlusPlus,
    Legacy,
}

/// Which backend [`crate::uidstore`] should use to persist UIDs for a
/// folder.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum UidBackend {
    /// `.uidvalidity` two-line text file, UID embedded in the filename.
    #[default]
    FilenameEmbedded,
    /// `.isyncuidmap.db` hash database, UID keyed by filename stem.
    HashDb,
}

/// Immutable per-run store configuration (spec.md §3 "Store
/// configuration").
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub struct StoreConfig {
    pub name: String,
    pub inbox: PathBuf,
    pub path: Option<PathBuf>,
    pub trash: Option<String>,
    pub subfolders: SubfolderStyle,
    pub info_delimiter: char,
    pub alt_map: bool,
    pub max_size: Option<u64>,
}

impl StoreConfig {
    pub fn new(name: impl Into<String>, inbox: impl Into<PathBuf>) -> Self {
        StoreConfig {
            name: name.into(),
            inbox: inbox.into(),
            path: None,
            trash: None,
            subfolders: SubfolderStyle::Unset,
            info_delimiter: default_info_delimiter(),
            alt_map: false,
            max_size: None,
        }
    }

    pub fn uid_backend(&self) -> UidBackend {
        if self.alt_map {
            UidBackend::HashDb
        } else {
            UidBackend::FilenameEmbedded
        }
    }
}

#[cfg(unix)]
fn default_info_delimiter() -> char {
    ':'
}
#[cfg(not(unix))]
fn default_info_delimiter() -> char {
    ';'
}

/// A directive recognized directly by this driver's `MaildirStore` block;
/// everything else is handed to the caller's generic-store sink, matching
/// `drv_maildir.c`'s fallthrough to the shared config parser.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Directive {
    Inbox(PathBuf),
    Path(PathBuf),
    AltMap(bool),
    InfoDelimiter(char),
    SubFolders(SubfolderStyle),
    Generic { key: String, value: String },
}

/// Parses a `MaildirStore <name>` directive block out of a line stream.
///
/// Recognizes the directive table from spec.md §6; every other
/// `Key Value` line is passed through as [`Directive::Generic`] rather
/// than rejected, so a caller's shared generic-store parser (trash,
/// max-size, etc.) can consume it.
pub fn parse_store<'a>(name: &str, lines: impl Iterator<Item = &'a str>) -> (StoreConfig, Vec<Directive>) {
    let mut config = StoreConfig::new(name, PathBuf::from("~/Maildir"));
    let mut generic = Vec::new();

    for line in lines {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once(char::is_whitespace) else {
            continue;
        };
        let value = value.trim();

        match key {
            "Inbox" => config.inbox = PathBuf::from(value),
            "Path" => config.path = Some(PathBuf::from(value)),
            "AltMap" => config.alt_map = parse_bool(value),
            "InfoDelimiter" => {
                if let Some(c) = value.chars().next() {
                    config.info_delimiter = c;
                }
            }
            "SubFolders" => {
                config.subfolders = match value {
                    "Verbatim" => SubfolderStyle::Verbatim,
                    "Maildir++" => SubfolderStyle::MaildirPlusPlus,
                    "Legacy" => SubfolderStyle::Legacy,
                    _ => SubfolderStyle::Unset,
                }
            }
            _ => generic.push(Directive::Generic {
                key: key.to_string(),
                value: value.to_string(),
            }),
        }
    }

    (config, generic)
}

fn parse_bool(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "yes" | "true" | "1" | "on")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_directives_and_passes_through_the_rest() {
        let text = "Inbox /home/user/Maildir\nPath /home/user/Mail\nAltMap yes\nSubFolders Maildir++\nTrash Trash\n";
        let (config, generic) = parse_store("work", text.lines());
        assert_eq!(config.inbox, PathBuf::from("/home/user/Maildir"));
        assert_eq!(config.path, Some(PathBuf::from("/home/user/Mail")));
        assert!(config.alt_map);
        assert_eq!(config.subfolders, SubfolderStyle::MaildirPlusPlus);
        assert_eq!(
            generic,
            vec![Directive::Generic {
                key: "Trash".into(),
                value: "Trash".into()
            }]
        );
    }
}
