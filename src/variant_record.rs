//! Parsing and rewriting of single VCF data lines describing structural variants
//!
//! Records are treated as immutable once parsed. All updates return a new record through the
//! `with_*` methods so that a record read by one component can't be modified underneath another.
//!

use std::fmt;
use std::str::FromStr;

use simple_error::{SimpleError, SimpleResult, bail};

/// Minimum number of tab-separated fields in a VCF data line
pub const MIN_VCF_FIELD_COUNT: usize = 8;

const CHROM_FIELD: usize = 0;
const POS_FIELD: usize = 1;
const ID_FIELD: usize = 2;
const REF_FIELD: usize = 3;
const ALT_FIELD: usize = 4;
const INFO_FIELD: usize = 7;

pub const SVTYPE_INFO_KEY: &str = "SVTYPE";
pub const SVLEN_INFO_KEY: &str = "SVLEN";
pub const SEQ_INFO_KEY: &str = "SEQ";
pub const END_INFO_KEY: &str = "END";

/// The SV types handled by the refinement process
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
pub enum SvType {
    #[strum(serialize = "INS")]
    Insertion,
    #[strum(serialize = "DEL")]
    Deletion,
}

impl SvType {
    /// Offset from the VCF POS value to the variant footprint start
    ///
    /// The footprint start is the first reference base after an insertion point, or the first
    /// deleted base. Deletion records carry the anchor base before the deletion at POS.
    ///
    pub fn footprint_offset(&self) -> i64 {
        match self {
            SvType::Insertion => 0,
            SvType::Deletion => 1,
        }
    }
}

/// Identity of a variant record, formatted as `chrom:pos:type:id`
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct VariantKey {
    pub chrom: String,
    pub pos: i64,
    pub sv_type: String,
    pub id: String,
}

impl fmt::Display for VariantKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}:{}", self.chrom, self.pos, self.sv_type, self.id)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct VariantRecord {
    fields: Vec<String>,
}

impl VariantRecord {
    pub fn from_line(line: &str) -> SimpleResult<Self> {
        let fields = line
            .trim_end_matches(['\n', '\r'])
            .split('\t')
            .map(|x| x.to_string())
            .collect::<Vec<_>>();
        if fields.len() < MIN_VCF_FIELD_COUNT {
            bail!(
                "VCF line has {} fields, at least {MIN_VCF_FIELD_COUNT} are required: '{line}'",
                fields.len()
            );
        }
        Ok(Self { fields })
    }

    pub fn chrom(&self) -> &str {
        &self.fields[CHROM_FIELD]
    }

    pub fn pos(&self) -> SimpleResult<i64> {
        let pos_str = &self.fields[POS_FIELD];
        pos_str
            .parse::<i64>()
            .map_err(|_| SimpleError::new(format!("Invalid VCF position: '{pos_str}'")))
    }

    pub fn id(&self) -> &str {
        &self.fields[ID_FIELD]
    }

    pub fn ref_allele(&self) -> &str {
        &self.fields[REF_FIELD]
    }

    pub fn alt_allele(&self) -> &str {
        &self.fields[ALT_FIELD]
    }

    /// Iterate over the `key=value` entries of the INFO field, skipping flags
    fn info_entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields[INFO_FIELD]
            .split(';')
            .filter_map(|x| x.split_once('='))
    }

    /// Value of the given INFO key, None if the key is absent
    ///
    /// A key which is present with an empty value returns `Some("")`
    ///
    pub fn get_info(&self, key: &str) -> Option<&str> {
        self.info_entries()
            .find(|(k, _)| *k == key)
            .map(|(_, value)| value)
    }

    /// Value of the given INFO key, or an empty string if the key is absent
    pub fn info_or_empty(&self, key: &str) -> &str {
        self.get_info(key).unwrap_or("")
    }

    pub fn has_info(&self, key: &str) -> bool {
        self.get_info(key).is_some()
    }

    /// SV type label from SVTYPE, or inferred from the REF/ALT lengths if SVTYPE is missing
    ///
    pub fn sv_type_label(&self) -> String {
        let label = self.info_or_empty(SVTYPE_INFO_KEY);
        if !label.is_empty() {
            return label.to_string();
        }
        let ref_len = self.ref_allele().len();
        let alt_len = self.alt_allele().len();
        use std::cmp::Ordering::*;
        match ref_len.cmp(&alt_len) {
            Less => SvType::Insertion.to_string(),
            Greater => SvType::Deletion.to_string(),
            Equal => String::new(),
        }
    }

    /// SV type if it is one of the refinable types
    pub fn sv_type(&self) -> Option<SvType> {
        self.sv_type_label().parse::<SvType>().ok()
    }

    /// Variant sequence
    ///
    /// Taken from the SEQ INFO field when present, otherwise derived from REF/ALT by removing any
    /// shared padding. Symbolic alleles without SEQ yield an empty sequence.
    ///
    pub fn seq(&self) -> String {
        if let Some(seq) = self.get_info(SEQ_INFO_KEY) {
            return seq.to_string();
        }
        let (mut ref_allele, mut alt_allele) = (self.ref_allele(), self.alt_allele());
        if alt_allele.starts_with('<') {
            return String::new();
        }

        // Treat a deletion as an insertion with REF and ALT swapped
        if self.sv_type() == Some(SvType::Deletion) {
            std::mem::swap(&mut ref_allele, &mut alt_allele);
        }

        let is_placeholder = |x: &str| x == "X" || x == "N";
        if is_placeholder(ref_allele) {
            alt_allele.to_string()
        } else if is_placeholder(alt_allele) {
            ref_allele.to_string()
        } else {
            strip_shared_padding(ref_allele.as_bytes(), alt_allele.as_bytes())
        }
    }

    /// Signed SV length, positive for insertions and negative for other types
    ///
    /// Taken from SVLEN when it parses as a number, and from the variant sequence otherwise.
    ///
    pub fn length(&self) -> i64 {
        if let Some(x) = self
            .get_info(SVLEN_INFO_KEY)
            .and_then(|x| x.parse::<f64>().ok())
        {
            return x.round() as i64;
        }
        let seq_len = self.seq().len() as i64;
        if self.sv_type() == Some(SvType::Insertion) {
            seq_len
        } else {
            -seq_len
        }
    }

    pub fn key(&self) -> SimpleResult<VariantKey> {
        Ok(VariantKey {
            chrom: self.chrom().to_string(),
            pos: self.pos()?,
            sv_type: self.sv_type_label(),
            id: self.id().to_string(),
        })
    }

    /// First reference base of the variant footprint, see [SvType::footprint_offset]
    pub fn footprint_start(&self) -> SimpleResult<i64> {
        let offset = self.sv_type().map_or(0, |x| x.footprint_offset());
        Ok(self.pos()? + offset)
    }

    fn with_field(&self, index: usize, value: String) -> Self {
        let mut fields = self.fields.clone();
        fields[index] = value;
        Self { fields }
    }

    pub fn with_pos(&self, pos: i64) -> Self {
        self.with_field(POS_FIELD, pos.to_string())
    }

    pub fn with_ref_allele(&self, ref_allele: &str) -> Self {
        self.with_field(REF_FIELD, ref_allele.to_string())
    }

    pub fn with_alt_allele(&self, alt_allele: &str) -> Self {
        self.with_field(ALT_FIELD, alt_allele.to_string())
    }

    /// Set an INFO value, replacing the first entry with this key or appending a new entry
    ///
    pub fn with_info(&self, key: &str, value: &str) -> Self {
        let info = &self.fields[INFO_FIELD];
        let new_entry = format!("{key}={value}");
        if info.is_empty() || info == "." {
            return self.with_field(INFO_FIELD, new_entry);
        }

        let mut entries = info.split(';').map(|x| x.to_string()).collect::<Vec<_>>();
        match entries
            .iter()
            .position(|x| x.split_once('=').is_some_and(|(k, _)| k == key))
        {
            Some(index) => entries[index] = new_entry,
            None => entries.push(new_entry),
        }
        self.with_field(INFO_FIELD, entries.join(";"))
    }
}

impl FromStr for VariantRecord {
    type Err = SimpleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_line(s)
    }
}

impl fmt::Display for VariantRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.fields.join("\t"))
    }
}

/// Remove the bases of `short` from the start and end of `long`, returning the inner sequence
///
/// If `short` can't be fully matched against the edges of `long`, `long` is returned unchanged.
///
fn strip_shared_padding(short: &[u8], long: &[u8]) -> String {
    let total_pad = short.len();
    let mut start_pad = 0;
    let mut end_pad = 0;
    while start_pad + end_pad < total_pad && start_pad + end_pad < long.len() {
        if short[start_pad] == long[start_pad] {
            start_pad += 1;
        } else if short[short.len() - 1 - end_pad] == long[long.len() - 1 - end_pad] {
            end_pad += 1;
        } else {
            break;
        }
    }
    let seq = if start_pad + end_pad == total_pad {
        &long[start_pad..long.len() - end_pad]
    } else {
        long
    };
    String::from_utf8_lossy(seq).to_string()
}
