//! Schema normalization: from sparse, dynamically-keyed guest configs to a
//! rectangular table.
//!
//! Proxmox guest configurations have no fixed shape. Each guest exposes its
//! own set of keys (`scsi0`, `virtio3`, `net0`, `ide2`, ...) and many values
//! are property strings, a compact comma-separated sub-grammar of bare
//! tokens and `key=value` pairs such as
//! `local-lvm:vm-100-disk-0,format=qcow2,size=32G`.
//!
//! The [`Normalizer`] consumes one raw config per guest, decomposes property
//! strings of known field families into `<field>.<subkey>` columns and keeps
//! an export schema that is the union of every column seen so far, in
//! first-seen order. Values that do not parse cleanly stay verbatim under
//! their original field name; the normalizer never fails on a config value.
//! Emission happens in a second pass, once all guests are in: the column set
//! is only fully known after the last config.

use crate::client::GuestRef;
use serde_json::{Map, Value};
use std::collections::HashMap;
use tracing::debug;

/// Columns seeded from enumeration metadata. Registered before any
/// config-derived column so they lead the CSV, and populated for every row
/// including failed fetches.
pub const IDENTIFIER_COLUMNS: [&str; 5] = ["node", "vmid", "type", "name", "status"];

/// Column carrying the failure cause of a guest whose config fetch failed.
pub const ERROR_COLUMN: &str = "error";

/// One guest's flattened values, keyed by canonical column name. Keys are
/// always a subset of the schema of the [`Normalizer`] that produced it.
pub type Record = HashMap<String, String>;

/// Accumulates normalized records and the growing export schema.
pub struct Normalizer {
    columns: Vec<String>,
    index: HashMap<String, usize>,
    rows: Vec<Record>,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Normalizer {
    /// Create a normalizer with the identifier columns pre-registered.
    pub fn new() -> Self {
        let mut normalizer = Self {
            columns: Vec::new(),
            index: HashMap::new(),
            rows: Vec::new(),
        };
        for column in IDENTIFIER_COLUMNS {
            normalizer.register(column);
        }
        normalizer
    }

    /// Normalize one guest's raw config into a record and buffer it.
    ///
    /// `enrichment` carries pre-packed extra columns (agent filesystem info);
    /// they are taken verbatim as scalars. Config fields are visited in the
    /// map's order, which `serde_json` keeps sorted, so identical input
    /// sequences always produce the identical schema.
    pub fn push_guest(
        &mut self,
        guest: &GuestRef,
        config: &Map<String, Value>,
        enrichment: &[(String, String)],
    ) {
        let mut record = self.identifier_record(guest);
        for (field, value) in config {
            self.normalize_field(&mut record, field, value);
        }
        for (column, value) in enrichment {
            self.set(&mut record, column, value.clone());
        }
        self.rows.push(record);
    }

    /// Buffer a row for a guest whose config could not be fetched: identifier
    /// columns plus the failure cause under the `error` column.
    pub fn push_error_row(&mut self, guest: &GuestRef, message: &str) {
        let mut record = self.identifier_record(guest);
        self.set(&mut record, ERROR_COLUMN, message.to_string());
        self.rows.push(record);
    }

    /// Number of buffered rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Freeze the schema and hand the buffered rows to the exporter.
    pub fn finish(self) -> Table {
        Table {
            columns: self.columns,
            rows: self.rows,
        }
    }

    fn identifier_record(&self, guest: &GuestRef) -> Record {
        let mut record = Record::new();
        record.insert("node".to_string(), guest.node.clone());
        record.insert("vmid".to_string(), guest.vmid.to_string());
        record.insert("type".to_string(), guest.kind.to_string());
        record.insert("name".to_string(), guest.name.clone());
        record.insert("status".to_string(), guest.status.clone());
        record
    }

    fn normalize_field(&mut self, record: &mut Record, field: &str, value: &Value) {
        if let Value::String(raw) = value {
            if let Some(family) = FieldFamily::classify(field) {
                if family.wants_decompose(raw) {
                    match decompose(family, raw) {
                        Some(pairs) => {
                            for (subkey, subvalue) in pairs {
                                self.set(record, &format!("{}.{}", field, subkey), subvalue);
                            }
                            return;
                        }
                        None => {
                            debug!(
                                "Value of {} is not a clean property string, keeping it verbatim",
                                field
                            );
                        }
                    }
                }
            }
        }
        self.set(record, field, scalar_value(value));
    }

    fn set(&mut self, record: &mut Record, column: &str, value: String) {
        self.register(column);
        record.insert(column.to_string(), value);
    }

    fn register(&mut self, column: &str) {
        if !self.index.contains_key(column) {
            self.index.insert(column.to_string(), self.columns.len());
            self.columns.push(column.to_string());
        }
    }
}

/// A frozen export schema plus the row buffer, ready for CSV emission.
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Record>,
}

impl Table {
    /// Canonical column names in first-seen order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Buffered records in enumeration order.
    pub fn rows(&self) -> &[Record] {
        &self.rows
    }
}

/// Known field families with a property-string value. Anything outside these
/// stays scalar regardless of content; the semantics of undocumented fields
/// are not guessed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldFamily {
    /// `scsi<N>`, `ide<N>`, `virtio<N>`, `rootfs`, `mp<N>`, ... The leading
    /// positional token is the volume specifier `storage[:volume]`.
    Disk,
    /// `net<N>`. A leading bare token is the NIC model.
    Net,
    /// `agent`, `cpu`, `vga`, ... No positional head slot; a lone bare token
    /// (`cpu: host`) stays scalar.
    Keyed,
}

const DISK_PREFIXES: [&str; 8] = [
    "scsi", "ide", "sata", "virtio", "efidisk", "tpmstate", "unused", "mp",
];
const KEYED_FIELDS: [&str; 8] = [
    "agent", "cpu", "vga", "smbios1", "features", "audio0", "rng0", "watchdog",
];
const KEYED_PREFIXES: [&str; 3] = ["ipconfig", "hostpci", "usb"];

impl FieldFamily {
    fn classify(field: &str) -> Option<Self> {
        if field == "rootfs" {
            return Some(FieldFamily::Disk);
        }
        if DISK_PREFIXES.iter().any(|p| has_numeric_suffix(field, p)) {
            return Some(FieldFamily::Disk);
        }
        if has_numeric_suffix(field, "net") {
            return Some(FieldFamily::Net);
        }
        if KEYED_FIELDS.contains(&field) {
            return Some(FieldFamily::Keyed);
        }
        if KEYED_PREFIXES.iter().any(|p| has_numeric_suffix(field, p)) {
            return Some(FieldFamily::Keyed);
        }
        None
    }

    /// Disk and net values decompose unconditionally (a bare `local-lvm:...`
    /// is still a volume specifier); keyed-only values need at least one
    /// delimiter to be worth decomposing.
    fn wants_decompose(&self, raw: &str) -> bool {
        match self {
            FieldFamily::Keyed => raw.contains(',') || raw.contains('='),
            _ => true,
        }
    }

    /// Conventional subkey for the leading positional token, if the family
    /// has one.
    fn head_slot(&self) -> Option<&'static str> {
        match self {
            FieldFamily::Disk => Some("storage"),
            FieldFamily::Net => Some("model"),
            FieldFamily::Keyed => None,
        }
    }
}

fn has_numeric_suffix(field: &str, prefix: &str) -> bool {
    field
        .strip_prefix(prefix)
        .is_some_and(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()))
}

/// Decompose a property string into subkey/value pairs.
///
/// Returns `None` for malformed input (empty segment, empty subkey,
/// duplicated subkey); the caller then falls back to the verbatim scalar so
/// no information is lost or misattributed. Positional tokens beyond the
/// family's head slot are preserved joined under `extra`.
fn decompose(family: FieldFamily, raw: &str) -> Option<Vec<(String, String)>> {
    let mut pairs: Vec<(String, String)> = Vec::new();
    let mut extras: Vec<&str> = Vec::new();

    for (position, segment) in raw.split(',').enumerate() {
        if segment.is_empty() {
            return None;
        }
        if let Some((key, value)) = segment.split_once('=') {
            if key.is_empty() {
                return None;
            }
            if pairs.iter().any(|(existing, _)| existing == key) {
                return None;
            }
            pairs.push((key.to_string(), value.to_string()));
        } else if position == 0 && family.head_slot().is_some() {
            match family {
                FieldFamily::Disk => match segment.split_once(':') {
                    Some((storage, volume)) => {
                        pairs.push(("storage".to_string(), storage.to_string()));
                        pairs.push(("volume".to_string(), volume.to_string()));
                    }
                    None => pairs.push(("storage".to_string(), segment.to_string())),
                },
                FieldFamily::Net => pairs.push(("model".to_string(), segment.to_string())),
                FieldFamily::Keyed => unreachable!(),
            }
        } else {
            extras.push(segment);
        }
    }

    if !extras.is_empty() {
        pairs.push(("extra".to_string(), extras.join(",")));
    }
    Some(pairs)
}

/// Render a JSON config value as a cell. Booleans use the `1`/`0` style of
/// the PVE API itself; nested structures are not produced by the config
/// endpoint but are tolerated as compact JSON.
fn scalar_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(true) => "1".to_string(),
        Value::Bool(false) => "0".to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
