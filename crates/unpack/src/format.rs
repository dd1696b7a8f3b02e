//! Closed set of container formats the pipeline recognizes.

use serde::Serialize;
use std::fmt;
use std::path::Path;

/// Container format of an archive candidate.
///
/// Produced once during classification and matched exhaustively downstream;
/// no extension is re-parsed after this point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveFormat {
    Rar,
    SevenZip,
    Zip,
    Cab,
    Arj,
    Unknown,
}

impl ArchiveFormat {
    /// Magic bytes identifying this format inside a byte stream.
    ///
    /// Used by the SFX scanner; `Unknown` has no signature.
    pub fn signature(self) -> &'static [u8] {
        match self {
            ArchiveFormat::Rar => b"Rar!",
            ArchiveFormat::SevenZip => b"\x37\x7A\xBC\xAF\x27\x1C",
            ArchiveFormat::Zip => b"PK\x03\x04",
            ArchiveFormat::Cab => b"MSCF",
            ArchiveFormat::Arj => b"\x60\xEA",
            ArchiveFormat::Unknown => &[],
        }
    }

    /// Formats with a scannable signature, in scan priority order.
    pub fn scannable() -> &'static [ArchiveFormat] {
        &[
            ArchiveFormat::Rar,
            ArchiveFormat::SevenZip,
            ArchiveFormat::Zip,
            ArchiveFormat::Cab,
            ArchiveFormat::Arj,
        ]
    }

    /// Guess the format from the candidate's filename.
    ///
    /// `.exe` maps to `Unknown` until the SFX detector has identified the
    /// embedded payload.
    pub fn from_path(path: &Path) -> ArchiveFormat {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("")
            .to_lowercase();

        if name.ends_with(".rar") || crate::volume::is_rar_split_part(&name) {
            ArchiveFormat::Rar
        } else if name.ends_with(".7z") || crate::volume::is_sevenzip_split_part(&name) {
            ArchiveFormat::SevenZip
        } else if name.ends_with(".zip") || crate::volume::is_zip_split_part(&name) {
            ArchiveFormat::Zip
        } else if name.ends_with(".cab") {
            ArchiveFormat::Cab
        } else if name.ends_with(".arj") {
            ArchiveFormat::Arj
        } else {
            ArchiveFormat::Unknown
        }
    }
}

impl fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ArchiveFormat::Rar => "RAR",
            ArchiveFormat::SevenZip => "7Z",
            ArchiveFormat::Zip => "ZIP",
            ArchiveFormat::Cab => "CAB",
            ArchiveFormat::Arj => "ARJ",
            ArchiveFormat::Unknown => "UNKNOWN",
        };
        f.write_str(name)
    }
}
