//! License Field Schema
//!
//! Declares the fixed set of fields extracted from a Myanmar driving
//! license. The schema is static configuration: backends use the per-field
//! guidance as their extraction target, and scoring uses the field names to
//! know which ground-truth keys are comparable.

/// A single field declared by the schema
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    /// Stable field identifier (e.g. "NRC_no")
    pub name: &'static str,
    /// Extraction guidance handed to the backend
    pub description: &'static str,
    /// Base field this one is the Burmese-script counterpart of, if any.
    /// Script variants are independent fields for extraction but paired
    /// with their base for display.
    pub script_variant_of: Option<&'static str>,
}

/// Ordered, immutable set of fields for one schema version
#[derive(Debug, Clone)]
pub struct FieldSchema {
    fields: Vec<FieldSpec>,
}

impl FieldSchema {
    /// The Myanmar driving license schema
    pub fn license() -> Self {
        Self::new(vec![
            FieldSpec {
                name: "No",
                description: "The license number/ID from the card.",
                script_variant_of: None,
            },
            FieldSpec {
                name: "Name",
                description: "The full name of the license holder, exactly as written (English/Transliteration).",
                script_variant_of: None,
            },
            FieldSpec {
                name: "Name_Burmese",
                description: "The full name of the license holder as written in Burmese script (e.g. ကျော်စွာမင်း).",
                script_variant_of: Some("Name"),
            },
            FieldSpec {
                name: "NRC_no",
                description: "The National Registration Card number (e.g. 12/ABC(N)XXXXXX).",
                script_variant_of: None,
            },
            FieldSpec {
                name: "NRC_no_Burmese",
                description: "The numeric/code portion of the NRC number written in Burmese (e.g. ၁၂/ဒဂန(နိုင်)၀၃၅၃၄၄).",
                script_variant_of: Some("NRC_no"),
            },
            FieldSpec {
                name: "DOB",
                description: "The Date of Birth in DD-MM-YYYY format.",
                script_variant_of: None,
            },
            FieldSpec {
                name: "Blood_Type",
                description: "The Blood Type (e.g. A, B, O, AB).",
                script_variant_of: None,
            },
            FieldSpec {
                name: "Valid_up_to",
                description: "The expiry date of the license in DD-MM-YYYY format.",
                script_variant_of: None,
            },
        ])
    }

    /// Build a schema from an ordered field list.
    ///
    /// Field names must be unique; a script variant must name a field that
    /// exists in the same schema.
    fn new(fields: Vec<FieldSpec>) -> Self {
        debug_assert!(
            fields
                .iter()
                .enumerate()
                .all(|(i, f)| fields[..i].iter().all(|g| g.name != f.name)),
            "duplicate field name in schema"
        );
        debug_assert!(
            fields.iter().all(|f| f
                .script_variant_of
                .map_or(true, |base| fields.iter().any(|g| g.name == base))),
            "script variant references unknown base field"
        );
        Self { fields }
    }

    /// Fields in declaration order
    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    /// Whether a field name is declared by this schema
    pub fn contains(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f.name == name)
    }

    /// Look up a field by name
    pub fn get(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Number of declared fields
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
