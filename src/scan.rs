//! C4 (directory scanner) + C5 (UID assignor): produces the canonical,
//! UID-sorted message list for the selected folder, assigning UIDs to
//! anything that doesn't have one yet.

use std::collections::HashSet;
use std::fs;
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use std::thread;
use std::time::{Duration, SystemTime};

use log::{debug, trace, warn};

use crate::config::{StoreConfig, UidBackend};
use crate::error::{Error, Result};
use crate::filename::{self, ParsedName};
use crate::ids;
use crate::message::Message;
use crate::uidstore::UidStore;
use crate::validate::{Freshness, CUR, NEW};

/// Scan filters and options, threaded through from the driver façade's
/// `load_box` call (spec.md §4.4, §6).
#[derive(Clone, Debug)]
pub struct ScanParams {
    pub minuid: u32,
    pub maxuid: u32,
    pub newuid: u32,
    pub excluded: HashSet<u32>,
    pub zero_delay: bool,
    pub want_flags: bool,
    pub want_size: bool,
    pub want_tuid: bool,
}

impl Default for ScanParams {
    fn default() -> Self {
        ScanParams {
            minuid: 0,
            maxuid: u32::MAX,
            newuid: u32::MAX,
            excluded: HashSet::new(),
            zero_delay: false,
            want_flags: true,
            want_size: false,
            want_tuid: false,
        }
    }
}

struct Candidate {
    parsed: ParsedName,
    filename: String,
    recent: bool,
}

/// Runs the scan-assign-dedup pipeline to completion, retrying from the
/// top whenever a concurrent writer is detected (spec.md §4.4 steps 1
/// and 5).
pub fn scan(
    folder: &Path,
    config: &StoreConfig,
    uidstore: &mut UidStore,
    freshness: Freshness,
    params: &ScanParams,
) -> Result<Vec<Message>> {
    loop {
        match scan_once(folder, config, uidstore, freshness, params) {
            Ok(Some(messages)) => return Ok(messages),
            Ok(None) => {
                debug!("detected concurrent mutation of {}, rescanning", folder.display());
                continue;
            }
            Err(Error::RenameError(_, _, ref io_err)) if io_err.kind() == io::ErrorKind::NotFound => {
                debug!("rename raced with an external unlink, rescanning");
                continue;
            }
            Err(e) => return Err(e),
        }
    }
}

/// One pass of steps 1–9. Returns `Ok(None)` when step 5's revalidation
/// finds the directories changed underneath it, asking the caller to
/// restart from the top.
fn scan_once(
    folder: &Path,
    config: &StoreConfig,
    uidstore: &mut UidStore,
    freshness: Freshness,
    params: &ScanParams,
) -> Result<Option<Vec<Message>>> {
    let cur_dir = folder.join(CUR);
    let new_dir = folder.join(NEW);

    let cur_mtime_before = fence(&cur_dir, freshness.cur, params.zero_delay)?;
    let new_mtime_before = fence(&new_dir, freshness.new, params.zero_delay)?;

    let mut candidates = Vec::new();
    enumerate(&new_dir, true, config.info_delimiter, &mut candidates)?;
    enumerate(&cur_dir, false, config.info_delimiter, &mut candidates)?;

    let backend = config.uid_backend();
    for candidate in &candidates {
        if backend == UidBackend::HashDb {
            let stem = filename::stem_up_to_info(&candidate.filename, config.info_delimiter);
            uidstore.mark_seen(stem)?;
        }
    }

    let mut entries: Vec<(ParsedName, String, bool, u32)> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let uid = resolve_uid(&candidate, config, uidstore)?;
        entries.push((candidate.parsed, candidate.filename, candidate.recent, uid));
    }

    entries.retain(|(_, _, _, uid)| *uid <= params.maxuid && (*uid >= params.minuid || params.excluded.contains(uid)));

    let cur_mtime_after = stat_mtime(&cur_dir)?;
    let new_mtime_after = stat_mtime(&new_dir)?;
    if cur_mtime_after != cur_mtime_before || new_mtime_after != new_mtime_before {
        return Ok(None);
    }

    if config.uid_backend() == UidBackend::HashDb {
        uidstore.garbage_collect()?;
    }

    entries.sort_by(|(a, fa, _, ua), (b, fb, _, ub)| {
        ua.cmp(ub).then_with(|| {
            if *ua == Message::UNASSIGNED {
                ids::compare_unassigned(&a.unique, &b.unique)
            } else {
                fa.cmp(fb)
            }
        })
    });

    let mut messages = Vec::with_capacity(entries.len());
    for (parsed, filename, recent, uid) in entries {
        let mut message = Message::new(filename, recent);
        message.flags = parsed.flags;
        message.status.flags_loaded = true;
        message.uid = uid;
        messages.push(message);
    }

    assign_uids(folder, config, uidstore, &mut messages)?;

    for window in messages.windows(2) {
        if window[0].uid == window[1].uid {
            return Err(Error::DuplicateUidError(window[0].uid));
        }
    }

    post_process(folder, &mut messages, params)?;

    Ok(Some(messages))
}

fn fence(dir: &Path, freshly_created: bool, zero_delay: bool) -> Result<SystemTime> {
    loop {
        let mtime = stat_mtime(dir)?;
        if freshly_created || zero_delay {
            return Ok(mtime);
        }
        if is_this_second(mtime) {
            trace!("{} has this-second mtime, sleeping to avoid a race", dir.display());
            thread::sleep(Duration::from_secs(1));
            continue;
        }
        return Ok(mtime);
    }
}

fn is_this_second(mtime: SystemTime) -> bool {
    let now = SystemTime::now();
    match (mtime.duration_since(std::time::UNIX_EPOCH), now.duration_since(std::time::UNIX_EPOCH)) {
        (Ok(m), Ok(n)) => m.as_secs() == n.as_secs(),
        _ => false,
    }
}

fn stat_mtime(dir: &Path) -> Result<SystemTime> {
    fs::metadata(dir)
        .and_then(|m| m.modified())
        .map_err(|e| Error::StatError(e, dir.to_path_buf()))
}

fn enumerate(dir: &Path, recent: bool, delim: char, out: &mut Vec<Candidate>) -> Result<()> {
    let entries = match fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(Error::ReadDirError(e, dir.to_path_buf())),
    };

    for entry in entries {
        let entry = entry.map_err(|e| Error::ReadDirError(e, dir.to_path_buf()))?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with('.') {
            continue;
        }
        let parsed = filename::parse(&name, delim);
        out.push(Candidate {
            parsed,
            filename: name.into_owned(),
            recent,
        });
    }
    Ok(())
}

fn resolve_uid(candidate: &Candidate, config: &StoreConfig, uidstore: &mut UidStore) -> Result<u32> {
    match config.uid_backend() {
        UidBackend::HashDb => {
            let stem = filename::stem_up_to_info(&candidate.filename, config.info_delimiter);
            Ok(uidstore.lookup(stem)?.unwrap_or(Message::UNASSIGNED))
        }
        UidBackend::FilenameEmbedded => Ok(candidate.parsed.uid.unwrap_or(Message::UNASSIGNED)),
    }
}

/// Step 8: traverses the sorted, assigned-or-not list and allocates UIDs
/// to every unassigned entry, in the tie-break order already established
/// by the sort.
fn assign_uids(folder: &Path, config: &StoreConfig, uidstore: &mut UidStore, messages: &mut [Message]) -> Result<()> {
    for message in messages.iter_mut() {
        if !message.is_unassigned() {
            continue;
        }

        let uid = uidstore.obtain_uid()?;

        match config.uid_backend() {
            UidBackend::HashDb => {
                let stem = filename::stem_up_to_info(&message.filename, config.info_delimiter);
                uidstore.insert_mapping(stem, uid)?;
            }
            UidBackend::FilenameEmbedded => {
                let parsed = filename::parse(&message.filename, config.info_delimiter);
                let new_unique = filename::inject_uid(&parsed.unique, uid);
                let new_filename = if parsed.has_info {
                    format!("{new_unique}{}", &message.filename[parsed.unique.len()..])
                } else {
                    new_unique
                };

                let parent = folder.join(if message.status.recent { NEW } else { CUR });
                let old_path = parent.join(&message.filename);
                let new_path = parent.join(&new_filename);
                fs::rename(&old_path, &new_path).map_err(|e| Error::RenameError(old_path, new_path, e))?;
                message.filename = new_filename;
            }
        }

        message.uid = uid;
        debug!("assigned uid {uid} to {}", message.filename);
    }
    Ok(())
}

fn post_process(folder: &Path, messages: &mut [Message], params: &ScanParams) -> Result<()> {
    if !params.want_size && !params.want_tuid {
        return Ok(());
    }

    for message in messages.iter_mut() {
        let parent = folder.join(if message.status.recent { NEW } else { CUR });
        let path = parent.join(&message.filename);

        if params.want_size {
            let metadata = fs::metadata(&path).map_err(|e| Error::StatError(e, path.clone()))?;
            message.size = metadata.len();
        }

        if params.want_tuid && message.uid >= params.newuid {
            if let Some(tuid) = scan_tuid(&path)? {
                message.tuid = Some(tuid);
            }
        }
    }
    Ok(())
}

/// Scans header lines up to the first blank line for `X-TUID: <12
/// bytes>\n` (spec.md §4.4 step 10). This is the only message-body
/// interaction this driver performs; it never parses or interprets the
/// body itself.
fn scan_tuid(path: &Path) -> Result<Option<[u8; 12]>> {
    let file = fs::File::open(path).map_err(|e| Error::OpenMessageError(e, path.to_path_buf()))?;
    let mut reader = BufReader::new(file);
    let mut line = String::new();

    loop {
        line.clear();
        let n = reader.read_line(&mut line).map_err(|e| Error::ReadMessageError(e, path.to_path_buf()))?;
        if n == 0 || line.trim_end_matches(['\r', '\n']).is_empty() {
            return Ok(None);
        }
        if let Some(rest) = line.strip_prefix("X-TUID: ") {
            let bytes = rest.trim_end_matches(['\r', '\n']).as_bytes();
            if bytes.len() >= 12 {
                let mut tuid = [0u8; 12];
                tuid.copy_from_slice(&bytes[..12]);
                return Ok(Some(tuid));
            }
            warn!("X-TUID header in {} is shorter than 12 bytes", path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::validate;
    use tempfile::tempdir;

    fn config() -> StoreConfig {
        let mut c = StoreConfig::new("t", "/unused");
        c.info_delimiter = ':';
        c
    }

    #[test]
    fn empty_folder_scans_to_an_empty_list() {
        let dir = tempdir().unwrap();
        let folder = dir.path().join("Foo");
        validate::validate(&folder, true).unwrap();
        let config = config();
        let mut uidstore = UidStore::open(&folder, config.uid_backend(), true).unwrap();
        let params = ScanParams::default();
        let messages = scan(&folder, &config, &mut uidstore, Freshness::default(), &params).unwrap();
        assert!(messages.is_empty());
    }

    #[test]
    fn assigns_sequential_uids_to_new_files_in_filename_mode() {
        let dir = tempdir().unwrap();
        let folder = dir.path().join("Foo");
        let fresh = validate::validate(&folder, true).unwrap();
        let config = config();
        let mut uidstore = UidStore::open(&folder, config.uid_backend(), true).unwrap();

        fs::write(folder.join(NEW).join("1700000000.1_1.host"), b"one").unwrap();
        fs::write(folder.join(NEW).join("1700000000.1_2.host"), b"two").unwrap();

        let params = ScanParams {
            zero_delay: true,
            ..ScanParams::default()
        };
        let messages = scan(&folder, &config, &mut uidstore, fresh, &params).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].uid, 1);
        assert_eq!(messages[1].uid, 2);
        assert!(messages[1].filename.contains(",U=2"), "{}", messages[1].filename);
        assert_eq!(uidstore.next_uid(), 2);
    }

    #[test]
    fn duplicate_uid_is_fatal() {
        let dir = tempdir().unwrap();
        let folder = dir.path().join("Foo");
        let fresh = validate::validate(&folder, true).unwrap();
        let config = config();
        let mut uidstore = UidStore::open(&folder, config.uid_backend(), true).unwrap();

        fs::write(folder.join(CUR).join("a,U=5:2,"), b"a").unwrap();
        fs::write(folder.join(NEW).join("b,U=5.host"), b"b").unwrap();

        let params = ScanParams {
            zero_delay: true,
            ..ScanParams::default()
        };
        let err = scan(&folder, &config, &mut uidstore, fresh, &params).unwrap_err();
        assert!(matches!(err, Error::DuplicateUidError(5)));
    }

    #[test]
    fn db_mode_assigns_uids_without_renaming() {
        let dir = tempdir().unwrap();
        let folder = dir.path().join("Foo");
        let fresh = validate::validate(&folder, true).unwrap();
        let mut config = config();
        config.alt_map = true;
        let mut uidstore = UidStore::open(&folder, config.uid_backend(), true).unwrap();

        fs::write(folder.join(NEW).join("1700000000.1_1.host"), b"one").unwrap();

        let params = ScanParams {
            zero_delay: true,
            ..ScanParams::default()
        };
        let messages = scan(&folder, &config, &mut uidstore, fresh, &params).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].uid, 1);
        assert_eq!(messages[0].filename, "1700000000.1_1.host");
    }
}
