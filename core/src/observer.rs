//! Observer capability: a sink for query/mutation state transitions, independent of any
//! one query's own `watch` channel — used by devtools-style integrations that want every
//! transition across the whole registry rather than subscribing key-by-key.

use crate::mutation::MutationState;
use crate::query::QueryState;
use serde_json::Value;
use std::fmt;

/// One state transition reported to an [`Observer`].
#[derive(Debug, Clone)]
pub struct Transition<S> {
    pub key: String,
    pub previous: Option<S>,
    pub current: S,
    pub meta: Option<Value>,
}

/// Receives query and mutation lifecycle events. Implementors typically forward these to a
/// devtools panel, a metrics sink, or a test spy; the registry owns no opinion on what an
/// observer does with them.
pub trait Observer<TQuery, TMutation>: Send + Sync {
    fn on_query_loading(&self, _transition: &Transition<QueryState<TQuery>>) {}
    fn on_query_success(&self, _transition: &Transition<QueryState<TQuery>>) {}
    fn on_query_error(&self, _transition: &Transition<QueryState<TQuery>>) {}
    fn on_query_settled(&self, _transition: &Transition<QueryState<TQuery>>) {}

    fn on_mutation_loading(&self, _transition: &Transition<MutationState<TMutation>>) {}
    fn on_mutation_success(&self, _transition: &Transition<MutationState<TMutation>>) {}
    fn on_mutation_error(&self, _transition: &Transition<MutationState<TMutation>>) {}
    fn on_mutation_settled(&self, _transition: &Transition<MutationState<TMutation>>) {}
}

impl<TQuery, TMutation> fmt::Debug for dyn Observer<TQuery, TMutation> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Observer(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::QueryStatus;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Spy {
        successes: Arc<AtomicUsize>,
    }

    impl Observer<i32, i32> for Spy {
        fn on_query_success(&self, _transition: &Transition<QueryState<i32>>) {
            self.successes.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn observer_default_methods_are_no_ops() {
        struct Silent;
        impl Observer<i32, i32> for Silent {}
        let silent = Silent;
        let transition = Transition {
            key: "k".to_string(),
            previous: None,
            current: QueryState::<i32> {
                status: QueryStatus::Success,
                data: Some(1),
                error: None,
                is_fetching: false,
                is_stale: false,
                updated_at: None,
            },
            meta: None,
        };
        silent.on_query_success(&transition);
    }

    #[test]
    fn spy_observer_counts_successes() {
        let successes = Arc::new(AtomicUsize::new(0));
        let spy = Spy {
            successes: successes.clone(),
        };
        let transition = Transition {
            key: "k".to_string(),
            previous: None,
            current: QueryState::<i32> {
                status: QueryStatus::Success,
                data: Some(1),
                error: None,
                is_fetching: false,
                is_stale: false,
                updated_at: None,
            },
            meta: None,
        };
        spy.on_query_success(&transition);
        assert_eq!(successes.load(Ordering::SeqCst), 1);
    }
}
