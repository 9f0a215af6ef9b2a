use crate::flag::FlagSet;

/// A parsed Maildir filename: `<unique>[,U=<uid>]<delim>2,<flags>`.
///
/// The `,U=` run is this driver's own UID encoding (not part of the
/// Maildir spec); when the folder uses the hash-DB backend instead, `uid`
/// is always `None` here and the mapping lives in the database.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ParsedName {
    pub unique: String,
    pub uid: Option<u32>,
    pub flags: FlagSet,
    pub has_info: bool,
}

/// Parses a filename given the folder's configured info delimiter.
///
/// Unparseable UID runs are treated as absent (matching spec.md §4.4
/// step 3: "UID = unassigned" for anything we can't confidently read).
pub fn parse(filename: &str, delim: char) -> ParsedName {
    let (stem, info) = match filename.rsplit_once(delim) {
        Some((stem, info)) => (stem, Some(info)),
        None => (filename, None),
    };

    let (unique, uid) = extract_uid(stem);

    let flags = match info {
        Some(info) => match info.strip_prefix("2,") {
            Some(letters) => FlagSet::parse(letters),
            None => FlagSet::EMPTY,
        },
        None => FlagSet::EMPTY,
    };

    ParsedName {
        unique,
        uid,
        flags,
        has_info: info.is_some(),
    }
}

/// Splits `<unique>,U=<digits>` into `(unique, Some(uid))`, or returns
/// the whole stem unchanged with `None` if there is no `,U=` run.
fn extract_uid(stem: &str) -> (String, Option<u32>) {
    if let Some(pos) = stem.find(",U=") {
        let after = &stem[pos + 3..];
        let digits_len = after.find(|c: char| !c.is_ascii_digit()).unwrap_or(after.len());
        if digits_len > 0 {
            if let Ok(uid) = after[..digits_len].parse::<u32>() {
                let mut unique = stem[..pos].to_string();
                unique.push_str(&after[digits_len..]);
                return (unique, Some(uid));
            }
        }
    }
    (stem.to_string(), None)
}

/// Up to the first info character (or the whole filename): the key used
/// by the hash-DB backend, per spec.md §3.
pub fn stem_up_to_info(filename: &str, delim: char) -> &str {
    filename.split(delim).next().unwrap_or(filename)
}

/// Builds the info suffix `<delim>2,<flags>`.
pub fn info_suffix(delim: char, flags: FlagSet) -> String {
    format!("{delim}2,{flags}")
}

/// Injects `,U=<uid>` into a unique name that doesn't have one yet,
/// right after the unique-name prefix and before any existing `,U=…` run
/// (there shouldn't be one, by construction) or the info delimiter,
/// whichever comes first (spec.md §4.4 step 8).
pub fn inject_uid(unique: &str, uid: u32) -> String {
    format!("{unique},U={uid}")
}
