//! Self-extracting archive detection.
//!
//! An SFX file is a native PE executable with an archive payload appended
//! after the last section. Detection never fails: malformed or unreadable
//! input produces a "not SFX" report carrying the error text.

use crate::format::ArchiveFormat;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use tracing::debug;

/// Trailing payload smaller than this is assumed to be overlay noise
/// (certificates, debug data) rather than an embedded archive.
const MIN_TRAILING_PAYLOAD: u64 = 10 * 1024;

/// Bounded sequential scan window after the executable image.
const MAX_SCAN_BYTES: u64 = 10 * 1024 * 1024;

/// Fixed offsets used by known 7z SFX stub variants.
const SEVENZIP_VARIANT_OFFSETS: &[u64] = &[0x80000, 0x88000, 0x8A000, 0x8C000, 0x90000];

/// Result of walking the PE headers of a candidate executable.
#[derive(Debug, Clone, Default)]
pub struct PeAnalysis {
    /// Whether the file parsed as a well-formed PE image
    pub valid: bool,
    /// Total file size in bytes
    pub file_size: u64,
    /// End offset of the executable image (max section raw end)
    pub executable_end: u64,
    /// Parse error, if the walk aborted
    pub error: Option<String>,
}

/// A container signature located inside the file.
#[derive(Debug, Clone, Copy)]
pub struct SignatureHit {
    /// Format whose magic bytes matched
    pub format: ArchiveFormat,
    /// Byte offset of the match
    pub offset: u64,
}

/// Full detection report for one candidate file.
#[derive(Debug, Clone, Default)]
pub struct SfxReport {
    /// Final verdict
    pub is_sfx: bool,
    /// PE structure analysis
    pub pe: PeAnalysis,
    /// Signature found after the executable image, if any
    pub signature: Option<SignatureHit>,
    /// WinRAR SFX stub marker present in the header region
    pub rar_marker: bool,
    /// Bytes trailing the executable image (0 when PE parse failed)
    pub trailing_bytes: u64,
    /// I/O or structural error encountered during detection
    pub error: Option<String>,
}

impl SfxReport {
    fn rejected(error: impl Into<String>) -> Self {
        SfxReport {
            error: Some(error.into()),
            ..SfxReport::default()
        }
    }

    /// Format of the embedded payload, when a signature was found.
    pub fn payload_format(&self) -> Option<ArchiveFormat> {
        self.signature.map(|s| s.format)
    }
}

/// Convenience wrapper returning only the verdict.
pub fn is_sfx(path: &Path) -> bool {
    inspect(path).is_sfx
}

/// Analyze a file and report whether it carries an embedded archive.
///
/// Verdict is true when any of the following holds:
/// - a container signature was found after the executable image,
/// - a WinRAR SFX stub marker is present,
/// - the PE parsed cleanly and more than 10 KiB trail the last section.
pub fn inspect(path: &Path) -> SfxReport {
    let mut file = match File::open(path) {
        Ok(f) => f,
        Err(e) => return SfxReport::rejected(format!("cannot open file: {e}")),
    };

    match starts_with_mz(&mut file) {
        Ok(true) => {}
        Ok(false) => return SfxReport::rejected("not an executable (no MZ header)"),
        Err(e) => return SfxReport::rejected(format!("cannot read file: {e}")),
    }

    let pe = analyze_pe(&mut file);
    let rar_marker = has_rar_marker(&mut file).unwrap_or(false);

    let mut signature = None;
    if pe.valid {
        signature = find_signature_after(&mut file, pe.executable_end, pe.file_size)
            .ok()
            .flatten();
    }
    if signature.is_none() {
        if let Ok(Some(offset)) = find_sevenzip_variant(&mut file) {
            signature = Some(SignatureHit {
                format: ArchiveFormat::SevenZip,
                offset,
            });
        }
    }

    let trailing_bytes = if pe.valid {
        pe.file_size.saturating_sub(pe.executable_end)
    } else {
        0
    };

    let is_sfx = signature.is_some()
        || rar_marker
        || (pe.valid && trailing_bytes > MIN_TRAILING_PAYLOAD);

    debug!(
        path = %path.display(),
        is_sfx,
        rar_marker,
        trailing_bytes,
        signature = ?signature,
        "sfx inspection finished"
    );

    SfxReport {
        is_sfx,
        error: pe.error.clone(),
        pe,
        signature,
        rar_marker,
        trailing_bytes,
    }
}

/// Check the two-byte DOS magic without reading anything else.
fn starts_with_mz(file: &mut File) -> std::io::Result<bool> {
    let mut magic = [0u8; 2];
    file.seek(SeekFrom::Start(0))?;
    match file.read_exact(&mut magic) {
        Ok(()) => Ok(&magic == b"MZ"),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Walk DOS header, PE signature, file header and section table to find the
/// end of the executable image.
fn analyze_pe(file: &mut File) -> PeAnalysis {
    let mut result = PeAnalysis::default();

    match try_analyze_pe(file, &mut result) {
        Ok(()) => result,
        Err(e) => {
            result.valid = false;
            if result.error.is_none() {
                result.error = Some(e.to_string());
            }
            result
        }
    }
}

fn try_analyze_pe(file: &mut File, result: &mut PeAnalysis) -> std::io::Result<()> {
    result.file_size = file.seek(SeekFrom::End(0))?;
    file.seek(SeekFrom::Start(0))?;

    // DOS header; the PE offset lives in the last dword.
    let mut dos_header = [0u8; 64];
    if file.read_exact(&mut dos_header).is_err() {
        result.error = Some("file too small for a DOS header".into());
        return Ok(());
    }
    if &dos_header[..2] != b"MZ" {
        result.error = Some("not a valid PE file (MZ header)".into());
        return Ok(());
    }

    let pe_offset = u32::from_le_bytes([
        dos_header[60],
        dos_header[61],
        dos_header[62],
        dos_header[63],
    ]) as u64;
    if pe_offset == 0 || pe_offset >= result.file_size {
        result.error = Some("invalid PE header offset".into());
        return Ok(());
    }

    file.seek(SeekFrom::Start(pe_offset))?;
    let mut pe_sig = [0u8; 4];
    if file.read_exact(&mut pe_sig).is_err() || &pe_sig != b"PE\0\0" {
        result.error = Some("not a valid PE file (PE signature)".into());
        return Ok(());
    }

    // COFF file header: section count at +2, optional header size at +16.
    let mut file_header = [0u8; 20];
    if file.read_exact(&mut file_header).is_err() {
        result.error = Some("truncated COFF file header".into());
        return Ok(());
    }
    let num_sections = u16::from_le_bytes([file_header[2], file_header[3]]);
    let optional_header_size = u16::from_le_bytes([file_header[16], file_header[17]]);

    file.seek(SeekFrom::Start(pe_offset + 24 + optional_header_size as u64))?;

    // Track the furthest raw-data end over all sections.
    let mut max_end = 0u64;
    for _ in 0..num_sections {
        let mut section = [0u8; 40];
        if file.read_exact(&mut section).is_err() {
            break;
        }
        let raw_size = u32::from_le_bytes([section[16], section[17], section[18], section[19]]);
        let raw_ptr = u32::from_le_bytes([section[20], section[21], section[22], section[23]]);
        if raw_ptr > 0 {
            max_end = max_end.max(raw_ptr as u64 + raw_size as u64);
        }
    }

    result.executable_end = max_end;
    result.valid = true;
    Ok(())
}

/// Search container signatures starting at the end of the executable image.
///
/// SFX stubs usually append the payload at a 512- or 4096-byte aligned
/// offset, so aligned candidates are probed first; a bounded sequential scan
/// is the fallback.
fn find_signature_after(
    file: &mut File,
    start_offset: u64,
    file_size: u64,
) -> std::io::Result<Option<SignatureHit>> {
    let mut offsets: Vec<u64> = Vec::new();

    let first_512 = if start_offset % 512 != 0 {
        start_offset + (512 - start_offset % 512)
    } else {
        start_offset
    };
    offsets.push(first_512);
    for i in 1..10u64 {
        offsets.push(first_512 + i * 512);
    }
    if start_offset % 4096 != 0 {
        offsets.push(start_offset + (4096 - start_offset % 4096));
    }
    offsets.push(start_offset);
    // Fixed offsets used by some legacy stubs.
    offsets.push(0x800);
    offsets.push(0x1000);

    offsets.sort_unstable();
    offsets.dedup();

    let mut block = vec![0u8; 4096];
    for offset in offsets {
        if offset >= file_size {
            continue;
        }
        let read = read_block_at(file, offset, &mut block)?;
        if let Some(hit) = match_signatures(&block[..read], offset) {
            return Ok(Some(hit));
        }
    }

    // Aligned probes found nothing; scan sequentially, bounded to 10 MiB.
    // Consecutive blocks overlap by one signature length so a match
    // straddling a block boundary is still seen.
    let max_scan = MAX_SCAN_BYTES.min(file_size.saturating_sub(start_offset));
    if max_scan > 0 {
        let overlap = ArchiveFormat::scannable()
            .iter()
            .map(|f| f.signature().len())
            .max()
            .unwrap_or(1) as u64
            - 1;
        let mut scan_block = vec![0u8; 1024 * 1024];
        let mut offset = start_offset;
        while offset < start_offset + max_scan {
            let read = read_block_at(file, offset, &mut scan_block)?;
            if read == 0 {
                break;
            }
            if let Some(hit) = match_signatures(&scan_block[..read], offset) {
                return Ok(Some(hit));
            }
            if read as u64 <= overlap {
                break;
            }
            offset += read as u64 - overlap;
        }
    }

    Ok(None)
}

/// Probe fixed offsets used by known 7z SFX stub builds.
fn find_sevenzip_variant(file: &mut File) -> std::io::Result<Option<u64>> {
    let file_size = file.seek(SeekFrom::End(0))?;
    let sig = ArchiveFormat::SevenZip.signature();
    let mut buf = vec![0u8; sig.len()];

    for &offset in SEVENZIP_VARIANT_OFFSETS {
        if offset + sig.len() as u64 > file_size {
            continue;
        }
        file.seek(SeekFrom::Start(offset))?;
        if file.read_exact(&mut buf).is_ok() && buf == sig {
            return Ok(Some(offset));
        }
    }
    Ok(None)
}

/// Look for WinRAR SFX stub markers at their known positions and anywhere in
/// the first 8 KiB.
fn has_rar_marker(file: &mut File) -> std::io::Result<bool> {
    let file_size = file.seek(SeekFrom::End(0))?;

    let fixed_markers: &[(u64, &[u8])] = &[
        (0x100, b"WinRAR SFX"),
        (0x400, b"WINRAR"),
        (0x400, b"WinRAR"),
    ];

    for &(offset, marker) in fixed_markers {
        if offset + marker.len() as u64 > file_size {
            continue;
        }
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; marker.len()];
        if file.read_exact(&mut buf).is_ok() && buf == marker {
            return Ok(true);
        }
    }

    let mut header = vec![0u8; 8192];
    let read = read_block_at(file, 0, &mut header)?;
    let header = &header[..read];
    Ok(find_subslice(header, b"WINRAR").is_some() || find_subslice(header, b"WinRAR").is_some())
}

fn read_block_at(file: &mut File, offset: u64, buf: &mut [u8]) -> std::io::Result<usize> {
    file.seek(SeekFrom::Start(offset))?;
    let mut read = 0;
    while read < buf.len() {
        let n = file.read(&mut buf[read..])?;
        if n == 0 {
            break;
        }
        read += n;
    }
    Ok(read)
}

fn match_signatures(block: &[u8], base_offset: u64) -> Option<SignatureHit> {
    for &format in ArchiveFormat::scannable() {
        if let Some(pos) = find_subslice(block, format.signature()) {
            return Some(SignatureHit {
                format,
                offset: base_offset + pos as u64,
            });
        }
    }
    None
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_file(dir: &TempDir, name: &str, bytes: &[u8]) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut f = File::create(&path).unwrap();
        f.write_all(bytes).unwrap();
        path
    }

    #[test]
    fn test_non_mz_file_is_not_sfx() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "plain.exe", b"just some text, not a binary");
        let report = inspect(&path);
        assert!(!report.is_sfx);
        assert!(report.error.is_some());
    }

    #[test]
    fn test_missing_file_is_not_sfx() {
        let report = inspect(Path::new("/nonexistent/file.exe"));
        assert!(!report.is_sfx);
        assert!(report.error.is_some());
    }

    #[test]
    fn test_truncated_mz_is_not_sfx() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "stub.exe", b"MZ");
        let report = inspect(&path);
        assert!(!report.is_sfx);
        assert!(!report.pe.valid);
    }

    #[test]
    fn test_find_subslice() {
        assert_eq!(find_subslice(b"abcPK\x03\x04xyz", b"PK\x03\x04"), Some(3));
        assert_eq!(find_subslice(b"abc", b"abcd"), None);
        assert_eq!(find_subslice(b"abcd", b""), None);
    }
}
