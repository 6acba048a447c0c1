use chrono::NaiveDate;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocumentKind {
    Cpf,
    Cnpj,
}

/// A taxpayer identifier reduced to its digits. Only the length is checked.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaxDocument(String);

impl TaxDocument {
    pub fn from_digits(digits: &str) -> Option<Self> {
        let valid_length = matches!(digits.len(), 11 | 14);
        (valid_length && digits.bytes().all(|byte| byte.is_ascii_digit()))
            .then(|| Self(digits.to_owned()))
    }

    pub fn digits(&self) -> &str {
        &self.0
    }

    pub fn kind(&self) -> DocumentKind {
        if self.0.len() == 11 {
            DocumentKind::Cpf
        } else {
            DocumentKind::Cnpj
        }
    }

    /// `000.000.000-00` for CPF, `00.000.000/0000-00` for CNPJ.
    pub fn formatted(&self) -> String {
        let d = &self.0;
        match self.kind() {
            DocumentKind::Cpf => format!("{}.{}.{}-{}", &d[0..3], &d[3..6], &d[6..9], &d[9..11]),
            DocumentKind::Cnpj => {
                format!("{}.{}.{}/{}-{}", &d[0..2], &d[2..5], &d[5..8], &d[8..12], &d[12..14])
            }
        }
    }
}

/// Workspace credentials for the back-office billing system. Absent credentials
/// are a configuration error recovered inside the billing flow.
#[derive(Clone, Debug)]
pub struct BillingCredentials {
    pub api_url: String,
    pub api_token: SecretString,
}

impl BillingCredentials {
    pub fn from_workspace_metadata(metadata: &Value) -> Option<Self> {
        let api_url = metadata.get("ixcApiUrl")?.as_str()?.trim();
        let api_token = metadata.get("ixcApiToken")?.as_str()?.trim();
        if api_url.is_empty() || api_token.is_empty() {
            return None;
        }
        Some(Self { api_url: api_url.to_owned(), api_token: api_token.to_owned().into() })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingCustomer {
    pub id: String,
    pub name: String,
    pub document: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: String,
    pub customer_id: String,
    pub amount_cents: i64,
    pub due_date: NaiveDate,
    pub document_number: Option<String>,
    pub payment_reference: Option<String>,
}

impl Invoice {
    /// Due strictly before `today`; an invoice due today is not overdue yet.
    pub fn is_overdue(&self, today: NaiveDate) -> bool {
        self.due_date < today
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnblockOutcome {
    Unblocked { message: String },
    AlreadyReleased { message: String },
    Failed { message: String },
}

impl UnblockOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Failed { .. })
    }
}

/// A rendered invoice statement ready to be delivered as a document.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Statement {
    pub invoice_id: String,
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}
