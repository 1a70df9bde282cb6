//! Shared data model (spec §3).

use serde::{Deserialize, Serialize};

/// Identity of a storage endpoint. Immutable after registration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoteServer {
    pub id: String,
    pub protocol: Protocol,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub pool_size: usize,
    /// C7 scans each data type under its own root with its own filter
    /// regex (`MRO_Path`/`MRO_Filter`, `MDT_Path`/`MDT_Filter` in the
    /// original config).
    pub mro_path: String,
    pub mro_filter: String,
    pub mdt_path: String,
    pub mdt_filter: String,
}

impl RemoteServer {
    /// The two scan targets C7 walks every cycle, paired with the
    /// `DataType` newly discovered files under each root are tagged with.
    pub fn scan_targets(&self) -> [(DataType, &str, &str); 2] {
        [
            (DataType::Mro, self.mro_path.as_str(), self.mro_filter.as_str()),
            (DataType::Mdt, self.mdt_path.as_str(), self.mdt_filter.as_str()),
        ]
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    Ftp,
    Sftp,
}

impl std::str::FromStr for Protocol {
    type Err = crate::error::NdsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "FTP" => Ok(Protocol::Ftp),
            "SFTP" => Ok(Protocol::Sftp),
            other => Err(crate::error::NdsError::Config(format!(
                "unsupported protocol: {other}"
            ))),
        }
    }
}

/// One central-directory record of a remote ZIP archive (spec §3 ZipEntry).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ZipEntry {
    pub file_path: String,
    pub sub_file_name: String,
    pub header_offset: u64,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub flag_bits: u16,
    pub compress_type: u16,
    pub enodebid: u64,
}

/// A `ZipEntry` tagged with the owning server and data type — the unit
/// C7 accumulates into `batch_add_tasks` batches (spec §4.7 step 4),
/// grounded on `scanner.py::scan_loop`'s `current_data` list comprehension
/// (`{**item, 'ndsId': nds_id, 'data_type': file['type']}`).
#[derive(Debug, Clone, Serialize)]
pub struct TaggedZipEntry {
    #[serde(flatten)]
    pub entry: ZipEntry,
    pub nds_id: String,
    pub data_type: DataType,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum DataType {
    Mro,
    Mdt,
}

impl DataType {
    pub fn inner_suffix(self) -> &'static str {
        match self {
            DataType::Mro => ".xml",
            DataType::Mdt => ".csv",
        }
    }

    pub fn table_name(self) -> &'static str {
        match self {
            DataType::Mro => "LTE_MRO",
            DataType::Mdt => "LTE_MDT",
        }
    }
}

/// A unit of work consumed from C6 (spec §3 Task). `header_offset` is the
/// compressed entry's payload offset (past its local file header, per C3's
/// `get_zip_info`), so `read(header_offset, size=compress_size)` returns
/// exactly the bytes `compress_type` describes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub nds_id: String,
    pub file_path: String,
    pub file_hash: String,
    pub sub_file_name: String,
    pub data_type: DataType,
    pub header_offset: u64,
    pub compress_size: u64,
    pub compress_type: u16,
}

/// Three-valued task status (spec §3): absence of an update means retryable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i8)]
pub enum TaskStatus {
    Success = 2,
    SourceMissing = -1,
    ParseFailure = -2,
}

// No serde_repr dependency in the workspace; (de)serialize through the raw
// i8 by hand instead of pulling in another crate for three enum values.
impl Serialize for TaskStatus {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        (*self as i8).serialize(s)
    }
}

impl<'de> Deserialize<'de> for TaskStatus {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let v = i8::deserialize(d)?;
        match v {
            2 => Ok(TaskStatus::Success),
            -1 => Ok(TaskStatus::SourceMissing),
            -2 => Ok(TaskStatus::ParseFailure),
            other => Err(serde::de::Error::custom(format!(
                "invalid task status: {other}"
            ))),
        }
    }
}

/// Extract a 6-8 digit run between underscores (domain concession, spec §3).
pub fn extract_enodebid(sub_file_name: &str) -> u64 {
    use regex::Regex;
    use std::sync::OnceLock;
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"_(\d{6,8})_").unwrap());
    re.captures(sub_file_name)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0)
}

/// Extract the embedded `[_-]YYYYMMDDHHMMSS` timestamp used to order newly
/// discovered files (spec §4.7 step 3). Files without a match sort first.
pub fn extract_timestamp(filename: &str) -> Option<chrono::NaiveDateTime> {
    use regex::Regex;
    use std::sync::OnceLock;
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"[_-](\d{14})").unwrap());
    let digits = re.captures(filename)?.get(1)?.as_str();
    chrono::NaiveDateTime::parse_from_str(digits, "%Y%m%d%H%M%S").ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enodebid_extraction() {
        assert_eq!(extract_enodebid("MRO_12345678_20240101.xml"), 12345678);
        assert_eq!(extract_enodebid("MRO_123456_20240101.xml"), 123456);
        assert_eq!(extract_enodebid("no_number_here.xml"), 0);
    }

    #[test]
    fn timestamp_extraction_orders_unmatched_first() {
        let a = extract_timestamp("A_20240102030405_foo.zip").unwrap();
        let b = extract_timestamp("B_20240103030405_foo.zip").unwrap();
        assert!(a < b);
        assert!(extract_timestamp("no_timestamp.zip").is_none());
    }
}
