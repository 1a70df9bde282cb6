//! ZIP central-directory introspector (C3): reads only the EOCD, optional
//! ZIP64 locator/EOCD, and central directory of a remote archive — never
//! the compressed payload — by seeking directly to the trailer, exactly as
//! `original_source/Gateway/app/core/nds_client.py::get_zip_info` does.

use byteorder::{LittleEndian, ReadBytesExt};
use nds_core::error::{NdsError, NdsResult};
use nds_core::model::{extract_enodebid, ZipEntry};

use crate::client::RemoteSession;

const SIG_CENTRAL_DIR: u32 = 0x0201_4b50;
const SIG_LOCAL_HEADER: u32 = 0x0403_4b50;
const SIG_EOCD: u32 = 0x0605_4b50;
const SIG_ZIP64_LOCATOR: u32 = 0x0706_4b50;
const SIG_ZIP64_EOCD: u32 = 0x0606_4b50;

const EOCD_FIXED_SIZE: u64 = 22;
const ZIP64_LOCATOR_SIZE: u64 = 20;
const ZIP64_EOCD_FIXED_SIZE: u64 = 56;
const CENTRAL_DIR_FIXED_SIZE: u64 = 46;
const LOCAL_HEADER_FIXED_SIZE: u64 = 30;
/// Comment field is at most a u16 in length; this bounds how far back we
/// must search for the EOCD signature.
const MAX_COMMENT_SIZE: u64 = 65535;

struct Eocd {
    /// Offset of the EOCD record itself, absolute within the remote file.
    absolute_offset: u64,
    total_entries: u64,
    central_dir_size: u64,
    central_dir_offset: u64,
    is_zip64: bool,
}

/// Fetches and parses the trailer of `path` (a file of `file_size` bytes)
/// entirely over `session`, returning one `ZipEntry` per central directory
/// record.
pub async fn get_zip_info(
    session: &RemoteSession,
    path: &str,
    file_size: u64,
) -> NdsResult<Vec<ZipEntry>> {
    // `nds_client.py::get_zip_info` reads the local file header sitting at
    // the very start of the archive once, and reuses its size (30 fixed
    // bytes plus that one entry's filename/extra fields) for every central
    // directory record's payload offset below. This assumes a single-entry
    // archive, which is what these NDS packages are in practice.
    let header_size = read_local_header_size(session, path).await?;
    let eocd = read_eocd(session, path, file_size).await?;

    // `location_adjust`: if the archive's bytes are prefixed by data that
    // isn't part of the ZIP (e.g. an envelope header), the offsets recorded
    // in the central directory are relative to the ZIP's own start, not the
    // absolute file. We derive the adjustment by comparing where the
    // central directory is declared to end (offset + size) against where
    // the EOCD we just found actually sits in the file.
    let declared_cd_end = eocd.central_dir_offset + eocd.central_dir_size;
    let location_adjust = eocd.absolute_offset as i64 - declared_cd_end as i64;

    let cd_start = (eocd.central_dir_offset as i64 + location_adjust).max(0) as u64;
    let cd_bytes = session
        .read_at(path, cd_start, eocd.central_dir_size)
        .await?;

    parse_central_directory(&cd_bytes, &eocd, location_adjust, header_size)
}

/// Reads the fixed 30-byte local file header at absolute offset 0 and
/// returns its total size including the variable-length filename/extra
/// fields, so callers can skip straight to the first entry's payload.
async fn read_local_header_size(session: &RemoteSession, path: &str) -> NdsResult<u64> {
    let buf = session.read_at(path, 0, LOCAL_HEADER_FIXED_SIZE).await?;
    parse_local_header_size(&buf)
}

fn parse_local_header_size(buf: &[u8]) -> NdsResult<u64> {
    if (buf.len() as u64) < LOCAL_HEADER_FIXED_SIZE {
        return Err(NdsError::Zip("truncated local file header".into()));
    }
    let mut cursor = &buf[..4];
    let sig = cursor.read_u32::<LittleEndian>().map_err(zip_io_err)?;
    if sig != SIG_LOCAL_HEADER {
        return Err(NdsError::Zip("missing local file header magic at offset 0".into()));
    }
    let mut lengths = &buf[26..30];
    let name_len = lengths.read_u16::<LittleEndian>().map_err(zip_io_err)? as u64;
    let extra_len = lengths.read_u16::<LittleEndian>().map_err(zip_io_err)? as u64;
    Ok(LOCAL_HEADER_FIXED_SIZE + name_len + extra_len)
}

async fn read_eocd(session: &RemoteSession, path: &str, file_size: u64) -> NdsResult<Eocd> {
    let search_size = (EOCD_FIXED_SIZE + MAX_COMMENT_SIZE).min(file_size);
    let read_from = file_size - search_size;
    let tail = session.read_at(path, read_from, search_size).await?;

    let eocd_pos = find_signature_from_end(&tail, SIG_EOCD)
        .ok_or_else(|| NdsError::Zip(format!("{path}: end-of-central-directory record not found")))?;
    let eocd_absolute = read_from + eocd_pos as u64;

    let mut cursor = &tail[eocd_pos + 4..];
    let _disk_num = cursor.read_u16::<LittleEndian>().map_err(zip_io_err)?;
    let _disk_start = cursor.read_u16::<LittleEndian>().map_err(zip_io_err)?;
    let disk_entries = cursor.read_u16::<LittleEndian>().map_err(zip_io_err)?;
    let total_entries = cursor.read_u16::<LittleEndian>().map_err(zip_io_err)?;
    let central_dir_size = cursor.read_u32::<LittleEndian>().map_err(zip_io_err)?;
    let central_dir_offset = cursor.read_u32::<LittleEndian>().map_err(zip_io_err)?;

    let needs_zip64 = disk_entries == 0xFFFF
        || total_entries == 0xFFFF
        || central_dir_size == 0xFFFF_FFFF
        || central_dir_offset == 0xFFFF_FFFF;

    if !needs_zip64 {
        return Ok(Eocd {
            absolute_offset: eocd_absolute,
            total_entries: total_entries as u64,
            central_dir_size: central_dir_size as u64,
            central_dir_offset: central_dir_offset as u64,
            is_zip64: false,
        });
    }

    // The ZIP64 locator sits immediately before the EOCD we just found.
    if eocd_absolute < ZIP64_LOCATOR_SIZE {
        return Err(NdsError::Zip(format!("{path}: zip64 marker present but file too short for locator")));
    }
    let locator_offset = eocd_absolute - ZIP64_LOCATOR_SIZE;
    let locator_bytes = session
        .read_at(path, locator_offset, ZIP64_LOCATOR_SIZE)
        .await?;
    let mut lc = &locator_bytes[..];
    let sig = lc.read_u32::<LittleEndian>().map_err(zip_io_err)?;
    if sig != SIG_ZIP64_LOCATOR {
        return Err(NdsError::Zip(format!("{path}: missing zip64 end-of-central-directory locator")));
    }
    let _disk_with_eocd64 = lc.read_u32::<LittleEndian>().map_err(zip_io_err)?;
    let eocd64_offset = lc.read_u64::<LittleEndian>().map_err(zip_io_err)?;

    let eocd64_bytes = session
        .read_at(path, eocd64_offset, ZIP64_EOCD_FIXED_SIZE)
        .await?;
    let mut rc = &eocd64_bytes[..];
    let sig64 = rc.read_u32::<LittleEndian>().map_err(zip_io_err)?;
    if sig64 != SIG_ZIP64_EOCD {
        return Err(NdsError::Zip(format!("{path}: malformed zip64 end-of-central-directory record")));
    }
    let _record_size = rc.read_u64::<LittleEndian>().map_err(zip_io_err)?;
    let _version_made_by = rc.read_u16::<LittleEndian>().map_err(zip_io_err)?;
    let _version_needed = rc.read_u16::<LittleEndian>().map_err(zip_io_err)?;
    let _disk_num = rc.read_u32::<LittleEndian>().map_err(zip_io_err)?;
    let _disk_start = rc.read_u32::<LittleEndian>().map_err(zip_io_err)?;
    let _disk_entries = rc.read_u64::<LittleEndian>().map_err(zip_io_err)?;
    let total_entries64 = rc.read_u64::<LittleEndian>().map_err(zip_io_err)?;
    let central_dir_size64 = rc.read_u64::<LittleEndian>().map_err(zip_io_err)?;
    let central_dir_offset64 = rc.read_u64::<LittleEndian>().map_err(zip_io_err)?;

    Ok(Eocd {
        absolute_offset: eocd_absolute,
        total_entries: total_entries64,
        central_dir_size: central_dir_size64,
        central_dir_offset: central_dir_offset64,
        is_zip64: true,
    })
}

fn parse_central_directory(
    buf: &[u8],
    eocd: &Eocd,
    location_adjust: i64,
    header_size: u64,
) -> NdsResult<Vec<ZipEntry>> {
    let mut entries = Vec::with_capacity(eocd.total_entries as usize);
    let mut pos = 0usize;
    while pos + 4 <= buf.len() {
        let sig = u32::from_le_bytes([buf[pos], buf[pos + 1], buf[pos + 2], buf[pos + 3]]);
        if sig != SIG_CENTRAL_DIR {
            break;
        }
        if pos + CENTRAL_DIR_FIXED_SIZE as usize > buf.len() {
            return Err(NdsError::Zip("truncated central directory record".into()));
        }
        let mut rec = &buf[pos + 4..];
        let _version_made_by = rec.read_u16::<LittleEndian>().map_err(zip_io_err)?;
        let _version_needed = rec.read_u16::<LittleEndian>().map_err(zip_io_err)?;
        let flag_bits = rec.read_u16::<LittleEndian>().map_err(zip_io_err)?;
        let compress_type = rec.read_u16::<LittleEndian>().map_err(zip_io_err)?;
        let _mod_time = rec.read_u16::<LittleEndian>().map_err(zip_io_err)?;
        let _mod_date = rec.read_u16::<LittleEndian>().map_err(zip_io_err)?;
        let _crc32 = rec.read_u32::<LittleEndian>().map_err(zip_io_err)?;
        let mut compressed_size = rec.read_u32::<LittleEndian>().map_err(zip_io_err)? as u64;
        let mut uncompressed_size = rec.read_u32::<LittleEndian>().map_err(zip_io_err)? as u64;
        let name_len = rec.read_u16::<LittleEndian>().map_err(zip_io_err)? as usize;
        let extra_len = rec.read_u16::<LittleEndian>().map_err(zip_io_err)? as usize;
        let comment_len = rec.read_u16::<LittleEndian>().map_err(zip_io_err)? as usize;
        let _disk_start = rec.read_u16::<LittleEndian>().map_err(zip_io_err)?;
        let _internal_attrs = rec.read_u16::<LittleEndian>().map_err(zip_io_err)?;
        let _external_attrs = rec.read_u32::<LittleEndian>().map_err(zip_io_err)?;
        let mut header_offset = rec.read_u32::<LittleEndian>().map_err(zip_io_err)? as u64;

        let name_start = pos + CENTRAL_DIR_FIXED_SIZE as usize;
        let name_end = name_start + name_len;
        let extra_start = name_end;
        let extra_end = extra_start + extra_len;
        let comment_end = extra_end + comment_len;
        if comment_end > buf.len() {
            return Err(NdsError::Zip("central directory record overruns buffer".into()));
        }
        let name_bytes = &buf[name_start..name_end];
        let extra_bytes = &buf[extra_start..extra_end];

        // UTF-8 flag (bit 11); otherwise decode as IBM codepage 437.
        let sub_file_name = if flag_bits & 0x0800 != 0 {
            String::from_utf8_lossy(name_bytes).into_owned()
        } else {
            decode_cp437(name_bytes)
        };

        apply_zip64_extra(
            extra_bytes,
            &mut uncompressed_size,
            &mut compressed_size,
            &mut header_offset,
        );

        // Payload offset: past this entry's own local file header, using
        // the header size sampled from the archive's first entry (see
        // `get_zip_info`'s doc comment on this approximation).
        let adjusted_offset = (header_offset as i64 + location_adjust).max(0) as u64 + header_size;
        let enodebid = extract_enodebid(&sub_file_name);

        entries.push(ZipEntry {
            file_path: String::new(),
            sub_file_name,
            header_offset: adjusted_offset,
            compressed_size,
            uncompressed_size,
            flag_bits,
            compress_type,
            enodebid,
        });

        pos = comment_end;
    }
    let _ = eocd.is_zip64;
    Ok(entries)
}

/// When the fixed-width fields are all-ones, the real value lives in the
/// ZIP64 extra field, in the fixed order: uncompressed size, compressed
/// size, local header offset, disk start.
fn apply_zip64_extra(
    extra: &[u8],
    uncompressed_size: &mut u64,
    compressed_size: &mut u64,
    header_offset: &mut u64,
) {
    let mut pos = 0;
    while pos + 4 <= extra.len() {
        let id = u16::from_le_bytes([extra[pos], extra[pos + 1]]);
        let size = u16::from_le_bytes([extra[pos + 2], extra[pos + 3]]) as usize;
        let data_start = pos + 4;
        let data_end = data_start + size;
        if data_end > extra.len() {
            break;
        }
        if id == 0x0001 {
            let mut data = &extra[data_start..data_end];
            if *uncompressed_size == 0xFFFF_FFFF && data.len() >= 8 {
                if let Ok(v) = data.read_u64::<LittleEndian>() {
                    *uncompressed_size = v;
                }
            }
            if *compressed_size == 0xFFFF_FFFF && data.len() >= 8 {
                if let Ok(v) = data.read_u64::<LittleEndian>() {
                    *compressed_size = v;
                }
            }
            if *header_offset == 0xFFFF_FFFF && data.len() >= 8 {
                if let Ok(v) = data.read_u64::<LittleEndian>() {
                    *header_offset = v;
                }
            }
            break;
        }
        pos = data_end;
    }
}

fn find_signature_from_end(buf: &[u8], sig: u32) -> Option<usize> {
    let needle = sig.to_le_bytes();
    if buf.len() < needle.len() {
        return None;
    }
    (0..=buf.len() - needle.len())
        .rev()
        .find(|&i| buf[i..i + needle.len()] == needle)
}

fn zip_io_err(e: std::io::Error) -> NdsError {
    NdsError::Zip(e.to_string())
}

/// IBM code page 437: bytes 0x00-0x7F map to ASCII, 0x80-0xFF to the
/// table below. Used for legacy ZIP filenames lacking the UTF-8 flag bit.
fn decode_cp437(bytes: &[u8]) -> String {
    const HIGH: [char; 128] = [
        'Ç', 'ü', 'é', 'â', 'ä', 'à', 'å', 'ç', 'ê', 'ë', 'è', 'ï', 'î', 'ì', 'Ä', 'Å', 'É', 'æ',
        'Æ', 'ô', 'ö', 'ò', 'û', 'ù', 'ÿ', 'Ö', 'Ü', '¢', '£', '¥', '₧', 'ƒ', 'á', 'í', 'ó', 'ú',
        'ñ', 'Ñ', 'ª', 'º', '¿', '⌐', '¬', '½', '¼', '¡', '«', '»', '░', '▒', '▓', '│', '┤', '╡',
        '╢', '╖', '╕', '╣', '║', '╗', '╝', '╜', '╛', '┐', '└', '┴', '┬', '├', '─', '┼', '╞', '╟',
        '╚', '╔', '╩', '╦', '╠', '═', '╬', '╧', '╨', '╤', '╥', '╙', '╘', '╒', '╓', '╫', '╪', '┘',
        '┌', '█', '▄', '▌', '▐', '▀', 'α', 'ß', 'Γ', 'π', 'Σ', 'σ', 'µ', 'τ', 'Φ', 'Θ', 'Ω', 'δ',
        '∞', 'φ', 'ε', '∩', '≡', '±', '≥', '≤', '⌠', '⌡', '÷', '≈', '°', '∙', '·', '√', 'ⁿ', '²',
        '■', '\u{00a0}',
    ];
    bytes
        .iter()
        .map(|&b| if b < 0x80 { b as char } else { HIGH[(b - 0x80) as usize] })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cp437_ascii_passthrough() {
        assert_eq!(decode_cp437(b"MRO_1234567_file.xml"), "MRO_1234567_file.xml");
    }

    #[test]
    fn find_signature_finds_last_occurrence() {
        let mut buf = vec![0u8; 64];
        buf[10..14].copy_from_slice(&SIG_EOCD.to_le_bytes());
        buf[40..44].copy_from_slice(&SIG_EOCD.to_le_bytes());
        assert_eq!(find_signature_from_end(&buf, SIG_EOCD), Some(40));
    }

    #[test]
    fn local_header_size_includes_name_and_extra() {
        let mut buf = vec![0u8; 34];
        buf[0..4].copy_from_slice(&SIG_LOCAL_HEADER.to_le_bytes());
        buf[26..28].copy_from_slice(&4u16.to_le_bytes()); // filename length
        buf[28..30].copy_from_slice(&0u16.to_le_bytes()); // extra length
        assert_eq!(parse_local_header_size(&buf).unwrap(), 34);
    }

    #[test]
    fn local_header_size_rejects_bad_magic() {
        let buf = vec![0u8; 30];
        assert!(parse_local_header_size(&buf).is_err());
    }

    #[test]
    fn zip64_extra_overrides_placeholder_fields() {
        let mut extra = Vec::new();
        extra.extend_from_slice(&0x0001u16.to_le_bytes());
        extra.extend_from_slice(&24u16.to_le_bytes());
        extra.extend_from_slice(&500_000_000_000u64.to_le_bytes());
        extra.extend_from_slice(&400_000_000_000u64.to_le_bytes());
        extra.extend_from_slice(&12345u64.to_le_bytes());

        let mut uncompressed = 0xFFFF_FFFFu64;
        let mut compressed = 0xFFFF_FFFFu64;
        let mut offset = 0xFFFF_FFFFu64;
        apply_zip64_extra(&extra, &mut uncompressed, &mut compressed, &mut offset);
        assert_eq!(uncompressed, 500_000_000_000);
        assert_eq!(compressed, 400_000_000_000);
        assert_eq!(offset, 12345);
    }
}
