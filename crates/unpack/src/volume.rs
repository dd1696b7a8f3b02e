//! Multi-volume archive classification and enumeration.
//!
//! Filenames are partitioned into main volumes (the file handed to the
//! extraction engine), secondary volumes (skipped during discovery, handled
//! only for whole-set disposition) and non-archives. `.exe` files classify
//! as main pending confirmation by the SFX detector.

use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};

static RAR_PART: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\.part(\d+)\.rar$").unwrap());
static EXE_PART: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\.part(\d+)\.exe$").unwrap());
static SEVENZIP_PART: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\.7z\.(\d+)$").unwrap());
static ZIP_PART: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\.z(\d+)$").unwrap());
static RAR_RNN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\.r\d{2}$").unwrap());
static PART_SUFFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\.part\d+$").unwrap());

fn file_name_lower(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("")
        .to_lowercase()
}

/// `.partN.rar` / `.partN.exe` part number, when the pattern matches.
fn part_number(re: &Regex, name: &str) -> Option<u32> {
    re.captures(name)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

pub(crate) fn is_rar_split_part(name: &str) -> bool {
    RAR_RNN.is_match(name)
}

pub(crate) fn is_sevenzip_split_part(name: &str) -> bool {
    SEVENZIP_PART.is_match(name)
}

pub(crate) fn is_zip_split_part(name: &str) -> bool {
    ZIP_PART.is_match(name)
}

/// Whether this file starts extraction of a (possibly multi-part) archive.
///
/// `.exe` returns true here; the caller must still confirm an embedded
/// payload via the SFX detector before treating it as an archive.
pub fn is_main_volume(path: &Path) -> bool {
    let name = file_name_lower(path);

    if name.ends_with(".exe") {
        // .partN.exe with N > 1 is a trailing SFX volume
        return match part_number(&EXE_PART, &name) {
            Some(n) => n == 1,
            None => true,
        };
    }

    if name.ends_with(".7z") {
        return true;
    }
    if let Some(n) = SEVENZIP_PART
        .captures(&name)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
    {
        return n == "001";
    }

    if name.ends_with(".rar") {
        return match part_number(&RAR_PART, &name) {
            Some(n) => n == 1,
            None => true,
        };
    }

    name.ends_with(".zip")
}

/// Whether this file is a non-first part of a multi-part archive.
pub fn is_secondary_volume(path: &Path) -> bool {
    let name = file_name_lower(path);

    if let Some(n) = part_number(&EXE_PART, &name) {
        return n != 1;
    }
    if let Some(n) = SEVENZIP_PART
        .captures(&name)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
    {
        return n != "001";
    }
    if let Some(n) = part_number(&RAR_PART, &name) {
        return n != 1;
    }
    ZIP_PART.is_match(&name)
}

/// Base name of the logical archive, with volume and extension suffixes
/// stripped. Used to name destination folders.
pub fn archive_base_name(path: &Path) -> String {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("archive")
        .to_string();
    let lower = name.to_lowercase();

    if lower.ends_with(".exe") {
        let base = &name[..name.len() - 4];
        if let Some(m) = PART_SUFFIX.find(base) {
            return base[..m.start()].to_string();
        }
        return base.to_string();
    }
    if let Some(m) = RAR_PART.find(&name) {
        return name[..m.start()].to_string();
    }
    if lower.ends_with(".rar") || lower.ends_with(".zip") {
        return name[..name.len() - 4].to_string();
    }
    if lower.ends_with(".7z") {
        return name[..name.len() - 3].to_string();
    }
    if let Some(m) = SEVENZIP_PART.find(&name) {
        return name[..m.start()].to_string();
    }
    if let Some(m) = ZIP_PART.find(&name) {
        return name[..m.start()].to_string();
    }

    match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem.to_string(),
        _ => name,
    }
}

/// Enumerate every volume belonging to the set started by `main`.
///
/// Always includes `main` first; multi-part sets come back in ascending part
/// order. Siblings are only looked up in the main volume's directory. The
/// result is used for whole-set disposition, never for extraction.
pub fn find_archive_volumes(main: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut volumes = vec![main.to_path_buf()];
    let dir = main.parent().unwrap_or_else(|| Path::new("."));
    let name = file_name_lower(main);

    if name.ends_with(".rar") && !RAR_PART.is_match(&name) {
        // Legacy split RAR keeps trailing volumes in .r00 .. .r99
        let stem = stem_of(main);
        for i in 0..100 {
            let candidate = dir.join(format!("{stem}.r{i:02}"));
            if candidate.exists() {
                volumes.push(candidate);
            }
        }
    } else if part_number(&RAR_PART, &name) == Some(1) {
        collect_part_siblings(dir, main, &RAR_PART, &mut volumes)?;
    } else if name.ends_with(".7z.001") {
        let orig = main.file_name().and_then(|n| n.to_str()).unwrap_or("");
        // "set.7z.001" -> "set.7z."
        let base = &orig[..orig.len() - 3];
        for i in 2..1000 {
            let candidate = dir.join(format!("{base}{i:03}"));
            if candidate.exists() {
                volumes.push(candidate);
            } else {
                break;
            }
        }
    } else if name.ends_with(".zip") {
        let stem = stem_of(main);
        for i in 1..100 {
            let candidate = dir.join(format!("{stem}.z{i:02}"));
            if candidate.exists() {
                volumes.push(candidate);
            }
        }
    } else if part_number(&EXE_PART, &name) == Some(1) {
        collect_part_siblings(dir, main, &EXE_PART, &mut volumes)?;
    }

    Ok(volumes)
}

/// Gather `base.partNNN.<ext>` siblings of a multi-part main volume, sorted
/// by part number.
fn collect_part_siblings(
    dir: &Path,
    main: &Path,
    re: &Regex,
    volumes: &mut Vec<PathBuf>,
) -> std::io::Result<()> {
    let main_lower = main
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("")
        .to_lowercase();
    let base = match re.find(&main_lower) {
        Some(m) => main_lower[..m.start()].to_string(),
        None => return Ok(()),
    };

    let mut parts: Vec<(u32, PathBuf)> = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = match name.to_str() {
            Some(n) => n,
            None => continue,
        };
        let lower = name.to_lowercase();
        if let Some(m) = re.find(&lower) {
            if lower[..m.start()] == base && entry.path() != main {
                if let Some(n) = part_number(re, &lower) {
                    parts.push((n, entry.path()));
                }
            }
        }
    }
    parts.sort_by_key(|(n, _)| *n);
    volumes.extend(parts.into_iter().map(|(_, p)| p));
    Ok(())
}

fn stem_of(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("")
        .to_string()
}
