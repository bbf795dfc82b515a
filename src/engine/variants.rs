//! # Variant Resolver
//!
//! Maps the identifier a client sent for a cart line to a concrete variant.
//! Long-lived carts sometimes carry a product id where a variant id belongs;
//! those are recovered to the product's first available variant, and every
//! recovery is logged on the `variant_recovery` target so its use can be
//! tracked and eventually retired.

use tracing::warn;

use crate::error::FulfillmentError;
use crate::models::ProductVariant;
use crate::store::VariantSource;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedVariant {
    pub variant: ProductVariant,
    /// The product id the client actually sent, when recovery kicked in.
    pub recovered_from_product: Option<String>,
}

impl ResolvedVariant {
    pub fn was_recovered(&self) -> bool {
        self.recovered_from_product.is_some()
    }
}

/// Direct variant lookup, then product-id recovery, then `ItemNotFound`.
///
/// Runs against the checkout transaction so the chosen variant is the one
/// current at commit time.
pub async fn resolve_variant<S>(
    source: &mut S,
    requested_id: &str,
) -> Result<ResolvedVariant, FulfillmentError>
where
    S: VariantSource + ?Sized,
{
    if let Some(variant) = source.find_variant(requested_id).await? {
        return Ok(ResolvedVariant {
            variant,
            recovered_from_product: None,
        });
    }

    if let Some(variant) = source.first_variant_of_product(requested_id).await? {
        warn!(
            target: "variant_recovery",
            requested_id = %requested_id,
            product_id = %variant.product_id,
            variant_id = %variant.id,
            "Cart line referenced a product id; substituted its first variant"
        );
        return Ok(ResolvedVariant {
            variant,
            recovered_from_product: Some(requested_id.to_string()),
        });
    }

    Err(FulfillmentError::ItemNotFound {
        id: requested_id.to_string(),
    })
}
