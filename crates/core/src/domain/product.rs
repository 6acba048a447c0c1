use serde::{Deserialize, Serialize};

use crate::domain::workspace::WorkspaceId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProductId(pub i64);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub workspace_id: WorkspaceId,
    pub sku: String,
    pub name: String,
    /// Price in centavos.
    pub price_cents: i64,
    pub quantity: i64,
    pub description: Option<String>,
}

/// Catalog row before it has been assigned an id. Saving is keyed by
/// `(workspace_id, sku)`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProduct {
    pub workspace_id: WorkspaceId,
    pub sku: String,
    pub name: String,
    pub price_cents: i64,
    pub quantity: i64,
    pub description: Option<String>,
}

/// Renders minor units as Brazilian reais, e.g. `R$ 1.234,56`.
pub fn format_brl(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let absolute = cents.unsigned_abs();
    let reais = (absolute / 100).to_string();
    let centavos = absolute % 100;

    let mut grouped = String::with_capacity(reais.len() + reais.len() / 3);
    for (index, digit) in reais.chars().enumerate() {
        if index > 0 && (reais.len() - index) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(digit);
    }

    format!("{sign}R$ {grouped},{centavos:02}")
}
