//! Product entity

use crate::identity::{ProductId, Timestamp};
use serde::{Deserialize, Serialize};

/// Mutable fields of a product, as supplied by create and update requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductFields {
    pub name: String,
    pub price: f64,
    #[serde(default)]
    pub description: String,
}

impl ProductFields {
    pub fn new(name: impl Into<String>, price: f64, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            price,
            description: description.into(),
        }
    }
}

/// A product row, either persisted or still waiting in the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub price: f64,
    #[serde(default)]
    pub description: String,
    pub created_at: Timestamp,
}

impl Product {
    /// Build a product from its id, fields and creation time.
    pub fn from_fields(id: ProductId, fields: ProductFields, created_at: Timestamp) -> Self {
        Self {
            id,
            name: fields.name,
            price: fields.price,
            description: fields.description,
            created_at,
        }
    }

    /// The mutable part of this product.
    pub fn fields(&self) -> ProductFields {
        ProductFields {
            name: self.name.clone(),
            price: self.price,
            description: self.description.clone(),
        }
    }

    /// Replace the mutable fields, keeping id and creation time.
    pub fn merged(&self, fields: ProductFields) -> Self {
        Self::from_fields(self.id, fields, self.created_at)
    }

    /// The same product under a different id.
    pub fn with_id(&self, id: ProductId) -> Self {
        Self {
            id,
            ..self.clone()
        }
    }
}
