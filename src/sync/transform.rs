//! Maps source item detail onto the stored document shape.

use std::collections::BTreeSet;

use thiserror::Error;

use crate::models::item::{Tags, Variant, Variants};
use crate::repositories::ItemRecord;
use crate::source::SourceItem;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransformError {
    #[error("item {item_id} has no title")]
    MissingTitle { item_id: String },

    #[error("requested item {requested} but source returned {returned}")]
    IdMismatch { requested: String, returned: String },
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Build the record to upsert for `requested_id`
pub fn transform_item(
    store_id: &str,
    requested_id: &str,
    item: SourceItem,
) -> Result<ItemRecord, TransformError> {
    if item.id != requested_id {
        return Err(TransformError::IdMismatch {
            requested: requested_id.to_string(),
            returned: item.id,
        });
    }

    let title = non_blank(item.title).ok_or_else(|| TransformError::MissingTitle {
        item_id: item.id.clone(),
    })?;

    let tags: BTreeSet<String> = item
        .tags
        .into_iter()
        .map(|tag| tag.trim().to_string())
        .filter(|tag| !tag.is_empty())
        .collect();

    let variants = item
        .variants
        .into_iter()
        .map(|variant| Variant {
            variant_id: variant.id,
            price: variant.price,
            sku: variant.sku.unwrap_or_default(),
            compare_at_price: non_blank(variant.compare_at_price),
            inventory_qty: variant.inventory_quantity,
            inventory_item_id: variant.inventory_item_id,
        })
        .collect();

    Ok(ItemRecord {
        store_id: store_id.to_string(),
        item_id: item.id,
        title,
        description: non_blank(item.description),
        handle: non_blank(item.handle),
        category: non_blank(item.category),
        vendor: non_blank(item.vendor),
        tags: Tags(tags),
        variants: Variants(variants),
        source_created_at: item.created_at.map(|ts| ts.fixed_offset()),
        source_updated_at: item.updated_at.map(|ts| ts.fixed_offset()),
    })
}
