//! The request a coordinator currently cares about.

use serde_json::Value;
use waybill_core::{QueryParams, RequestKey, ViewId};

/// A coordinator's current `(view, params)` and the generation of the
/// report that set it.
///
/// Two contexts describe the same request when view and params are equal;
/// the generation only tells reports apart.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveRequestContext {
    pub view: ViewId,
    pub params: QueryParams,
    pub generation: u64,
}

impl ActiveRequestContext {
    pub fn new(view: ViewId, params: QueryParams, generation: u64) -> Self {
        Self {
            view,
            params,
            generation,
        }
    }

    /// Returns true if this context describes `(view, params)`.
    pub fn same_request(&self, view: &ViewId, params: &Value) -> bool {
        &self.view == view && &self.params == params
    }

    pub fn key(&self) -> RequestKey {
        RequestKey::new(&self.view, &self.params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;
    use waybill_test_utils::generators::{arb_params, arb_view_id};

    #[test]
    fn test_same_request_ignores_generation_and_field_order() {
        let context = ActiveRequestContext::new(
            ViewId::new("utr"),
            json!({ "week": 3, "region": "north" }),
            7,
        );
        assert!(context.same_request(&ViewId::new("utr"), &json!({ "region": "north", "week": 3 })));
        assert!(!context.same_request(&ViewId::new("otd"), &json!({ "region": "north", "week": 3 })));
        assert!(!context.same_request(&ViewId::new("utr"), &json!({ "week": 4, "region": "north" })));
    }

    proptest! {
        #[test]
        fn prop_key_follows_request_not_generation(
            view in arb_view_id(),
            params in arb_params(),
            generation in any::<u64>(),
        ) {
            let context = ActiveRequestContext::new(view.clone(), params.clone(), generation);
            prop_assert!(context.same_request(&view, &params));
            prop_assert_eq!(context.key(), RequestKey::new(&view, &params));

            let next = ActiveRequestContext::new(view, params, generation.wrapping_add(1));
            prop_assert_ne!(&next, &context);
            prop_assert_eq!(next.key(), context.key());
        }
    }
}
