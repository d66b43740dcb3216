//! Emulated hot-tier `HotStore` and durable `WarmStore` for chronow, both
//! backed by MongoDB. Use this crate when running without Redis: the hot
//! tier polls three collections (`kv`, `streams`, `groups`) for the same
//! contract `chronow-redis` gives natively.

mod hot_store;
mod warm_store;

pub use hot_store::MongoHotStore;
pub use warm_store::MongoWarmStore;

#[cfg(test)]
mod tests {
    //! Cross-cutting conversions that don't fit one submodule; per-submodule
    //! document <-> domain-type conversions are tested beside the code that
    //! does them (`hot_store::tests`, `warm_store::tests`).
    use bson::doc;

    #[test]
    fn document_to_fields_skips_non_string_values() {
        let doc = doc! { "payload": "{}", "size": 42i64 };
        let fields = crate::hot_store::document_to_fields(&doc);
        assert_eq!(fields.get("payload"), Some(&"{}".to_string()));
        assert_eq!(fields.get("size"), None);
    }
}
