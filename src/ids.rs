use std::cmp::Ordering;
use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};
use std::time::{SystemTime, UNIX_EPOCH};

use gethostname::gethostname;

use crate::error::{Error, Result};

static COUNTER: AtomicU32 = AtomicU32::new(0);

/// Generates a fresh Maildir unique name `<secs>.<pid>_<counter>.<host>`,
/// the base that `store_msg` (C7) builds filenames from. Grounded in the
/// teacher's `generate_tmp_id`, but the teacher composes the process
/// identity into an already-distinct path; this driver needs the
/// unique-name *alone* so it can still compare two such names before any
/// filesystem state exists (the scanner's tie-break heuristic, below).
pub fn generate_unique_name() -> Result<String> {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(Error::ClockError)?
        .as_secs();
    let pid = std::process::id();
    let counter = COUNTER.fetch_add(1, AtomicOrdering::SeqCst);
    let host = gethostname().to_string_lossy().into_owned();
    Ok(format!("{secs}.{pid}_{counter}.{host}"))
}

/// Orders two as-yet-unassigned candidates by the arrival-time heuristic
/// from spec.md §4.4 step 7: seconds field (length-then-lex), then the
/// microsecond/counter field, then the PID (wraparound-tolerant), then
/// the per-boot sequence, then raw lexical order. Only load-bearing for
/// files that have not yet been assigned a UID.
pub fn compare_unassigned(a: &str, b: &str) -> Ordering {
    let (secs_a, rest_a) = split_secs(a);
    let (secs_b, rest_b) = split_secs(b);

    length_then_lex(secs_a, secs_b)
        .then_with(|| compare_field(rest_a, rest_b, 'M'))
        .then_with(|| compare_pid(rest_a, rest_b))
        .then_with(|| compare_field(rest_a, rest_b, 'Q'))
        .then_with(|| a.cmp(b))
}

fn split_secs(name: &str) -> (&str, &str) {
    match name.split_once('.') {
        Some((secs, rest)) => (secs, rest),
        None => (name, ""),
    }
}

fn length_then_lex(a: &str, b: &str) -> Ordering {
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

fn extract_numeric_field<'a>(rest: &'a str, marker_any: &[char]) -> Option<&'a str> {
    for marker in marker_any {
        if let Some(pos) = rest.find(*marker) {
            let tail = &rest[pos + marker.len_utf8()..];
            let end = tail.find(|c: char| !c.is_ascii_digit()).unwrap_or(tail.len());
            if end > 0 {
                return Some(&tail[..end]);
            }
        }
    }
    None
}

fn compare_field(a: &str, b: &str, marker: char) -> Ordering {
    let markers: &[char] = if marker == 'M' { &['M', '#'] } else { &[marker] };
    match (extract_numeric_field(a, markers), extract_numeric_field(b, markers)) {
        (Some(x), Some(y)) => length_then_lex(x, y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// PID comparison tolerates wraparound: treat a difference whose
/// magnitude exceeds 20000 as going the other way (spec.md §4.4 step 7).
fn compare_pid(a: &str, b: &str) -> Ordering {
    match (extract_numeric_field(a, &['P']), extract_numeric_field(b, &['P'])) {
        (Some(x), Some(y)) => {
            let (Ok(x), Ok(y)) = (x.parse::<i64>(), y.parse::<i64>()) else {
                return length_then_lex(x, y);
            };
            let diff = x - y;
            if diff.abs() > 20_000 {
                if diff > 0 {
                    Ordering::Less
                } else {
                    Ordering::Greater
                }
            } else {
                x.cmp(&y)
            }
        }
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_names_are_well_formed_and_unique() {
        let a = generate_unique_name().unwrap();
        let b = generate_unique_name().unwrap();
        assert_ne!(a, b);
        assert!(a.contains('.'));
        assert!(a.contains('_'));
    }

    #[test]
    fn seconds_field_dominates_the_ordering() {
        assert_eq!(compare_unassigned("100.1_1.host", "99.1_1.host"), Ordering::Greater);
    }

    #[test]
    fn counter_field_breaks_ties_on_equal_seconds() {
        assert_eq!(compare_unassigned("100.1_1.host", "100.1_2.host"), Ordering::Less);
    }

    #[test]
    fn pid_wraparound_is_tolerated() {
        // a PID of 1 looks smaller than 40000 lexically, but a difference
        // this large is treated as the PID counter having wrapped, so the
        // ordering flips.
        let a = "100.P1.host";
        let b = "100.P40000.host";
        assert_eq!(compare_unassigned(a, b), Ordering::Greater);
    }

    #[test]
    fn falls_back_to_raw_lex_order() {
        assert_eq!(compare_unassigned("same", "same"), Ordering::Equal);
        assert_eq!(compare_unassigned("a", "b"), Ordering::Less);
    }
}
