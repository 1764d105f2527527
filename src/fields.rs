//! The fixed extraction schema: six loan fields and the per-page / merged
//! result record built over them.
//!
//! The schema is closed and known at compile time, so fields are a plain
//! enum and every per-field loop is an exhaustive walk over
//! [`LoanField::ALL`]. Wire names (`cif`, `loanNumber`, …) are what the VLM
//! is asked to emit and what the JSON API returns.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// One of the six fields extracted from a loan document.
///
/// Variant order is schema order; `Ord` follows it, so a
/// `BTreeMap<LoanField, _>` iterates deterministically in schema order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LoanField {
    /// Customer Information File number.
    Cif,
    LoanNumber,
    AccountNumber,
    FullName,
    /// National ID / passport number.
    IdNumber,
    LoanAmount,
}

impl LoanField {
    /// All fields in schema order.
    pub const ALL: [LoanField; 6] = [
        LoanField::Cif,
        LoanField::LoanNumber,
        LoanField::AccountNumber,
        LoanField::FullName,
        LoanField::IdNumber,
        LoanField::LoanAmount,
    ];

    /// JSON key used on the wire.
    pub fn wire_name(self) -> &'static str {
        match self {
            LoanField::Cif => "cif",
            LoanField::LoanNumber => "loanNumber",
            LoanField::AccountNumber => "accountNumber",
            LoanField::FullName => "fullName",
            LoanField::IdNumber => "idNumber",
            LoanField::LoanAmount => "loanAmount",
        }
    }

    /// Inverse of [`wire_name`](Self::wire_name). Unknown names yield `None`.
    pub fn from_wire_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.wire_name() == name)
    }
}

impl fmt::Display for LoanField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// Structured extraction result for one page, or the merged result for a
/// whole document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedFields {
    pub cif: Option<String>,
    pub loan_number: Option<String>,
    pub account_number: Option<String>,
    pub full_name: Option<String>,
    pub id_number: Option<String>,
    pub loan_amount: Option<String>,
    /// Names of fields that were found, in order.
    #[serde(default)]
    pub fields_found: Vec<LoanField>,
    /// Names of fields that were not found, in order.
    #[serde(default)]
    pub fields_not_found: Vec<LoanField>,
    /// Per-field confidence (0–100), only for fields that were found.
    #[serde(default)]
    pub confidence: BTreeMap<LoanField, u8>,
}

impl ExtractedFields {
    /// Value of `field`, treating empty strings as absent.
    pub fn value(&self, field: LoanField) -> Option<&str> {
        let slot = match field {
            LoanField::Cif => &self.cif,
            LoanField::LoanNumber => &self.loan_number,
            LoanField::AccountNumber => &self.account_number,
            LoanField::FullName => &self.full_name,
            LoanField::IdNumber => &self.id_number,
            LoanField::LoanAmount => &self.loan_amount,
        };
        slot.as_deref().filter(|v| !v.is_empty())
    }

    pub fn set_value(&mut self, field: LoanField, value: Option<String>) {
        let slot = match field {
            LoanField::Cif => &mut self.cif,
            LoanField::LoanNumber => &mut self.loan_number,
            LoanField::AccountNumber => &mut self.account_number,
            LoanField::FullName => &mut self.full_name,
            LoanField::IdNumber => &mut self.id_number,
            LoanField::LoanAmount => &mut self.loan_amount,
        };
        *slot = value;
    }

    /// Confidence reported for `field`, 0 when the map has no entry.
    pub fn confidence_of(&self, field: LoanField) -> u8 {
        self.confidence.get(&field).copied().unwrap_or(0)
    }

    /// Recompute `fields_found` / `fields_not_found` from the field values,
    /// in schema order.
    pub fn rebuild_field_lists(&mut self) {
        let (found, not_found): (Vec<LoanField>, Vec<LoanField>) =
            LoanField::ALL.into_iter().partition(|&f| self.value(f).is_some());
        self.fields_found = found;
        self.fields_not_found = not_found;
    }

    /// Rounded mean of the confidence map values; 0 when the map is empty.
    pub fn average_confidence(&self) -> u8 {
        if self.confidence.is_empty() {
            return 0;
        }
        let sum: u32 = self.confidence.values().map(|&c| u32::from(c)).sum();
        let mean = f64::from(sum) / self.confidence.len() as f64;
        mean.round() as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_names_round_trip() {
        for field in LoanField::ALL {
            assert_eq!(LoanField::from_wire_name(field.wire_name()), Some(field));
        }
        assert_eq!(LoanField::from_wire_name("loan_number"), None);
    }

    #[test]
    fn empty_value_is_absent() {
        let mut fields = ExtractedFields::default();
        fields.set_value(LoanField::FullName, Some(String::new()));
        assert_eq!(fields.value(LoanField::FullName), None);
    }

    #[test]
    fn field_lists_follow_schema_order() {
        let mut fields = ExtractedFields::default();
        fields.set_value(LoanField::LoanAmount, Some("500,000,000".into()));
        fields.set_value(LoanField::Cif, Some("CIF001".into()));
        fields.rebuild_field_lists();

        assert_eq!(fields.fields_found, vec![LoanField::Cif, LoanField::LoanAmount]);
        assert_eq!(
            fields.fields_not_found,
            vec![
                LoanField::LoanNumber,
                LoanField::AccountNumber,
                LoanField::FullName,
                LoanField::IdNumber,
            ]
        );
    }

    #[test]
    fn average_confidence_rounds() {
        let mut fields = ExtractedFields::default();
        fields.confidence.insert(LoanField::Cif, 90);
        fields.confidence.insert(LoanField::FullName, 85);
        assert_eq!(fields.average_confidence(), 88); // 87.5 rounds up
        assert_eq!(ExtractedFields::default().average_confidence(), 0);
    }

    #[test]
    fn serialises_with_wire_names() {
        let mut fields = ExtractedFields::default();
        fields.set_value(LoanField::LoanNumber, Some("LN-42".into()));
        fields.confidence.insert(LoanField::LoanNumber, 77);
        fields.rebuild_field_lists();

        let json = serde_json::to_value(&fields).expect("serialise");
        assert_eq!(json["loanNumber"], "LN-42");
        assert_eq!(json["fieldsFound"][0], "loanNumber");
        assert_eq!(json["confidence"]["loanNumber"], 77);
        assert!(json["cif"].is_null());
    }
}
