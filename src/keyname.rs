//! Key Namer (C5): deterministic, collision-free hot-store key composition.
//!
//! Every hot-store key has the shape `<prefix><tenant>:<namespace>:<kind>:<name>`
//! (spec §6.2, invariant I8). `kind` is always one of a closed set so two
//! components can never collide on the same key space even if `name` overlaps.

/// The closed set of key "kinds" that appear under a tenant/namespace scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    SharedMemory,
    Topic,
    Subscription,
    Retry,
    DeadLetter,
}

impl Kind {
    fn as_str(self) -> &'static str {
        match self {
            Kind::SharedMemory => "sm",
            Kind::Topic => "topic",
            Kind::Subscription => "sub",
            Kind::Retry => "retry",
            Kind::DeadLetter => "dlq",
        }
    }
}

/// Composes hot-store keys for one `(prefix, tenant, namespace)` scope.
#[derive(Debug, Clone)]
pub struct KeyNamer {
    prefix: String,
    tenant: String,
    namespace: String,
}

impl KeyNamer {
    pub fn new(prefix: impl Into<String>, tenant: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            tenant: tenant.into(),
            namespace: namespace.into(),
        }
    }

    /// `<prefix><tenant>:<namespace>:<kind>:<name>`
    pub fn key(&self, kind: Kind, name: &str) -> String {
        format!("{}{}:{}:{}:{}", self.prefix, self.tenant, self.namespace, kind.as_str(), name)
    }

    pub fn topic_log(&self, topic: &str) -> String {
        self.key(Kind::Topic, topic)
    }

    pub fn retry_key(&self, topic: &str, subscription: &str) -> String {
        self.key(Kind::Retry, &format!("{topic}:{subscription}"))
    }

    pub fn dlq_log(&self, topic: &str) -> String {
        self.key(Kind::DeadLetter, topic)
    }

    pub fn shared_memory_key(&self, name: &str) -> String {
        self.key(Kind::SharedMemory, name)
    }

    /// The consumer-group name registered against a topic log for `subscription`.
    pub fn group_name(subscription: &str) -> String {
        format!("sub:{subscription}")
    }

    /// Hash key storing a subscription's durable JSON config.
    pub fn subscription_config_key(&self, topic: &str, subscription: &str) -> String {
        format!("{}:sub:{}:config", self.topic_log(topic), subscription)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn namer() -> KeyNamer {
        KeyNamer::new("cw:", "t1", "ns")
    }

    #[test]
    fn topic_log_matches_layout() {
        assert_eq!(namer().topic_log("orders"), "cw:t1:ns:topic:orders");
    }

    #[test]
    fn retry_key_matches_layout() {
        assert_eq!(namer().retry_key("orders", "fraud"), "cw:t1:ns:retry:orders:fraud");
    }

    #[test]
    fn dlq_log_matches_layout() {
        assert_eq!(namer().dlq_log("orders"), "cw:t1:ns:dlq:orders");
    }

    #[test]
    fn group_name_prefixes_sub() {
        assert_eq!(KeyNamer::group_name("fraud"), "sub:fraud");
    }

    #[test]
    fn subscription_config_key_nests_under_topic() {
        assert_eq!(
            namer().subscription_config_key("orders", "fraud"),
            "cw:t1:ns:topic:orders:sub:fraud:config"
        );
    }

    #[test]
    fn distinct_tenants_never_collide() {
        let a = KeyNamer::new("cw:", "t1", "ns1").topic_log("orders");
        let b = KeyNamer::new("cw:", "t2", "ns2").topic_log("orders");
        assert_ne!(a, b);
    }

    #[test]
    fn distinct_kinds_never_collide_for_same_name() {
        let n = namer();
        let topic = n.key(Kind::Topic, "orders");
        let dlq = n.key(Kind::DeadLetter, "orders");
        let sm = n.key(Kind::SharedMemory, "orders");
        assert_ne!(topic, dlq);
        assert_ne!(topic, sm);
        assert_ne!(dlq, sm);
    }
}
