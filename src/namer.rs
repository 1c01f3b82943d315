//! Destination filenames for relayed copies.
//!
//! First sight of a path: `[<tag>]_<basename>`.
//! Reprocessing (the path is already in the ledger):
//! `[<tag>]_<stem>_<YYYYMMDD_HHMMSS>.<ext>`.
//!
//! The extension is whatever follows the last dot. Names without a dot, with
//! only a leading dot (`.env`), or ending in a dot are extensionless, and the
//! timestamp is appended without a trailing dot.
//!
//! When a name is already taken in the destination, [`candidate_names`]
//! continues with `_1`, `_2`, ... after the timestamp.

use chrono::{DateTime, TimeZone};

/// Timestamp layout used for reprocessed names.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Highest `_<n>` counter tried before giving up on a free name.
pub const MAX_NAME_COUNTER: usize = 99;

/// Split a basename into stem and extension on the last dot.
///
/// Returns `None` for the extension when the name has no usable one.
pub fn split_extension(basename: &str) -> (&str, Option<&str>) {
    match basename.rfind('.') {
        Some(0) | None => (basename, None),
        Some(idx) if idx + 1 == basename.len() => (&basename[..idx], None),
        Some(idx) => (&basename[..idx], Some(&basename[idx + 1..])),
    }
}

/// Compute the destination filename.
pub fn destination_name<Tz>(
    basename: &str,
    tag: &str,
    reprocessing: bool,
    now: &DateTime<Tz>,
) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    if !reprocessing {
        return format!("[{tag}]_{basename}");
    }
    stamped_name(basename, tag, &now.format(TIMESTAMP_FORMAT).to_string(), 0)
}

/// Destination names to try in order until one is free.
///
/// Starts with [`destination_name`], falls back to the timestamped name on
/// first sight, then numbers the timestamped name up to [`MAX_NAME_COUNTER`].
pub fn candidate_names<Tz>(
    basename: &str,
    tag: &str,
    reprocessing: bool,
    now: &DateTime<Tz>,
) -> impl Iterator<Item = String> + use<Tz>
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    let plain = (!reprocessing).then(|| format!("[{tag}]_{basename}"));
    let stamp = now.format(TIMESTAMP_FORMAT).to_string();
    let basename = basename.to_string();
    let tag = tag.to_string();

    plain.into_iter().chain(
        (0..=MAX_NAME_COUNTER).map(move |counter| stamped_name(&basename, &tag, &stamp, counter)),
    )
}

fn stamped_name(basename: &str, tag: &str, stamp: &str, counter: usize) -> String {
    let suffix = match counter {
        0 => stamp.to_string(),
        n => format!("{stamp}_{n}"),
    };
    match split_extension(basename) {
        (stem, Some(ext)) => format!("[{tag}]_{stem}_{suffix}.{ext}"),
        (stem, None) => format!("[{tag}]_{stem}_{suffix}"),
    }
}
