//! Hierarchical store key construction.
//!
//! Keys are built by joining ordered parts with `:`. The same parts always
//! produce the same key, which cache addressing and queue naming rely on.

use crate::jobs::JobClass;

/// Separator between key parts.
pub const SEPARATOR: &str = ":";

/// Join key parts with [`SEPARATOR`].
///
/// # Example
///
/// ```rust
/// use couponq::keys::rk;
///
/// assert_eq!(rk(["queue", "email", "dlq"]), "queue:email:dlq");
/// ```
pub fn rk<I, S>(parts: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut key = String::new();
    for (i, part) in parts.into_iter().enumerate() {
        if i > 0 {
            key.push_str(SEPARATOR);
        }
        key.push_str(part.as_ref());
    }
    key
}

/// Key builder with an optional namespace prefix.
///
/// The prefix lets several deployments (or test runs) share one Redis
/// database without their keys colliding.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Keyspace {
    namespace: Option<String>,
}

impl Keyspace {
    /// Keyspace without a prefix; keys match [`rk`] exactly.
    #[must_use]
    pub const fn root() -> Self {
        Self { namespace: None }
    }

    /// Keyspace whose keys all start with `namespace:`.
    ///
    /// An empty namespace is treated as no namespace.
    #[must_use]
    pub fn namespaced(namespace: impl Into<String>) -> Self {
        let namespace = namespace.into();
        Self {
            namespace: (!namespace.is_empty()).then_some(namespace),
        }
    }

    /// The prefix, if any.
    #[must_use]
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// Build a key from parts under this keyspace.
    pub fn key<I, S>(&self, parts: I) -> String
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let parts = parts.into_iter();
        match &self.namespace {
            Some(ns) => {
                let mut key = ns.clone();
                for part in parts {
                    key.push_str(SEPARATOR);
                    key.push_str(part.as_ref());
                }
                key
            }
            None => rk(parts),
        }
    }

    /// Main FIFO queue for a job class.
    #[must_use]
    pub fn queue(&self, class: JobClass) -> String {
        self.key(["queue", class.as_str()])
    }

    /// In-flight lease set for a job class.
    #[must_use]
    pub fn processing(&self, class: JobClass) -> String {
        self.key(["queue", class.as_str(), "processing"])
    }

    /// Dead-letter list for a job class.
    #[must_use]
    pub fn dead_letter(&self, class: JobClass) -> String {
        self.key(["queue", class.as_str(), "dlq"])
    }

    /// Fixed-window counter for a rate-limit identifier.
    #[must_use]
    pub fn rate_limit(&self, identifier: &str) -> String {
        self.key(["rate_limit", identifier])
    }

    /// Lock key.
    #[must_use]
    pub fn lock(&self, name: &str) -> String {
        self.key(["lock", name])
    }

    /// Click counter for an offer.
    #[must_use]
    pub fn offer_clicks(&self, offer_id: &str) -> String {
        self.key(["offer", offer_id, "clicks"])
    }

    /// Viewer set for an offer.
    #[must_use]
    pub fn offer_viewers(&self, offer_id: &str) -> String {
        self.key(["offer", offer_id, "viewers"])
    }

    /// Trending offers ranking.
    #[must_use]
    pub fn trending(&self) -> String {
        self.key(["offers", "trending"])
    }

    /// Referral earnings leaderboard.
    #[must_use]
    pub fn leaderboard(&self) -> String {
        self.key(["leaderboard", "referrals"])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_rk_joins_parts() {
        assert_eq!(rk(["rate_limit", "user:42"]), "rate_limit:user:42");
        assert_eq!(rk(["single"]), "single");
        assert_eq!(rk(Vec::<String>::new()), "");
    }

    #[test]
    fn test_queue_keys() {
        let keys = Keyspace::root();
        assert_eq!(keys.queue(JobClass::Email), "queue:email");
        assert_eq!(keys.processing(JobClass::Sms), "queue:sms:processing");
        assert_eq!(keys.dead_letter(JobClass::Cashback), "queue:cashback:dlq");
    }

    #[test]
    fn test_namespaced_keys() {
        let keys = Keyspace::namespaced("staging");
        assert_eq!(keys.queue(JobClass::Email), "staging:queue:email");
        assert_eq!(keys.lock("cashback-sync"), "staging:lock:cashback-sync");
        assert_eq!(Keyspace::namespaced(""), Keyspace::root());
    }

    #[test]
    fn test_ranking_keys() {
        let keys = Keyspace::root();
        assert_eq!(keys.offer_clicks("7"), "offer:7:clicks");
        assert_eq!(keys.offer_viewers("7"), "offer:7:viewers");
        assert_eq!(keys.trending(), "offers:trending");
        assert_eq!(keys.leaderboard(), "leaderboard:referrals");
    }

    proptest! {
        #[test]
        fn prop_identical_parts_give_identical_keys(parts in prop::collection::vec("[a-z0-9_]{0,12}", 0..6)) {
            prop_assert_eq!(rk(&parts), rk(parts.clone()));
            let keys = Keyspace::namespaced("ns");
            prop_assert_eq!(keys.key(&parts), keys.key(parts.iter().map(String::as_str)));
        }

        #[test]
        fn prop_root_keyspace_matches_rk(parts in prop::collection::vec("[a-z]{1,8}", 1..5)) {
            prop_assert_eq!(Keyspace::root().key(&parts), rk(&parts));
        }
    }
}
