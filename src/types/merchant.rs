//! Merchant lookup entries
//!
//! A merchant maps the name printed on a card statement to the merchant category
//! code that should be used for category matching, regardless of the code the card
//! network reported.

/// Merchant name to MCC mapping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Merchant {
    /// Merchant name exactly as it arrives on requests
    pub name: String,

    /// Merchant category code to use for this merchant
    pub mcc: String,
}

impl Merchant {
    /// Create a merchant entry
    pub fn new(name: impl Into<String>, mcc: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mcc: mcc.into(),
        }
    }
}
