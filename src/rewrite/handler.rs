/*   Copyright 2025 The canary-split Authors
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 *
 *  SPDX-License-Identifier: Apache-2.0
 *
 *  The handler that sits in the query pipeline.  It consults the configured
 *  rewrite rules, renames the query when one applies, and forwards to the
 *  next handler exactly once either way.
 */

use std::sync::Arc;

use lazy_static::lazy_static;
use prometheus::{register_int_counter_vec, IntCounterVec};

use super::selector::{EntropySource, ThreadEntropy};
use crate::config::SharedConfig;

lazy_static! {
    static ref REWRITE_DECISIONS: IntCounterVec = register_int_counter_vec!(
        "dns_canary_rewrite_decisions",
        "Canary rewrite decisions by outcome",
        &["outcome"]
    )
    .unwrap();
}

/// One inbound query, as seen by the rewrite engine.  The transport source
/// address doubles as the client key for sticky selection.
#[derive(Debug, Clone)]
pub struct Query {
    pub qid: u16,
    pub remote_addr: std::net::SocketAddr,
    pub name: String,
}

#[derive(Debug)]
pub enum Error {
    Downstream(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Downstream(e) => write!(f, "Downstream handler error: {}", e),
        }
    }
}

impl std::error::Error for Error {}

#[async_trait::async_trait]
pub trait QueryHandler: Send + Sync {
    async fn handle_query(&self, query: Query) -> Result<Query, Error>;
}

/// Applies the first matching rewrite rule, then hands the query to `next`.
pub struct SplitHandler<N: QueryHandler> {
    conf: SharedConfig,
    entropy: Arc<dyn EntropySource>,
    next: N,
}

impl<N: QueryHandler> SplitHandler<N> {
    pub fn new(conf: SharedConfig, next: N) -> Self {
        SplitHandler {
            conf,
            entropy: Arc::new(ThreadEntropy),
            next,
        }
    }

    pub fn with_entropy(conf: SharedConfig, entropy: Arc<dyn EntropySource>, next: N) -> Self {
        SplitHandler { conf, entropy, next }
    }
}

#[async_trait::async_trait]
impl<N: QueryHandler> QueryHandler for SplitHandler<N> {
    async fn handle_query(&self, query: Query) -> Result<Query, Error> {
        /* Rule evaluation never suspends; the only await is the forward. */
        let client_key = query.remote_addr.to_string();
        for rule in &self.conf.canary_rewrites {
            if let Some(new_name) = rule.evaluate(&client_key, &query.name, &*self.entropy) {
                log::debug!("[{:x}] Rewrote {} to {}", query.qid, query.name, new_name);
                REWRITE_DECISIONS.with_label_values(&["rewritten"]).inc();
                return self
                    .next
                    .handle_query(Query {
                        name: new_name,
                        ..query
                    })
                    .await;
            }
        }
        log::trace!("[{:x}] No rewrite for {}", query.qid, query.name);
        REWRITE_DECISIONS.with_label_values(&["passthrough"]).inc();
        self.next.handle_query(query).await
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::load_config_from_string_for_test;
    use crate::rewrite::selector::FixedEntropy;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /* Terminal handler that records how often it was reached. */
    struct Terminal {
        forwards: AtomicUsize,
    }

    impl Terminal {
        fn new() -> Self {
            Terminal {
                forwards: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl QueryHandler for Terminal {
        async fn handle_query(&self, query: Query) -> Result<Query, Error> {
            self.forwards.fetch_add(1, Ordering::SeqCst);
            Ok(query)
        }
    }

    fn mk_query(name: &str) -> Query {
        Query {
            qid: 0x1234,
            remote_addr: "10.240.0.1:40212".parse().unwrap(),
            name: name.into(),
        }
    }

    fn mk_handler(config: &str, draw: f64) -> SplitHandler<Terminal> {
        let conf = load_config_from_string_for_test(config).expect("config should parse");
        SplitHandler::with_entropy(conf, Arc::new(FixedEntropy(draw)), Terminal::new())
    }

    #[tokio::test]
    async fn rewrites_matching_query() {
        let handler = mk_handler(
            "---
canary-rewrites:
 - suffix random 1.0 fabric.dog fabric.dog-canary
",
            0.0,
        );
        let out = handler
            .handle_query(mk_query("db.shard7.fabric.dog"))
            .await
            .expect("forward should succeed");
        assert_eq!(out.name, "db.shard7.fabric.dog-canary");
        assert_eq!(out.qid, 0x1234);
        assert_eq!(handler.next.forwards.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn passes_through_unselected_client() {
        let handler = mk_handler(
            "---
canary-rewrites:
 - suffix random 0.0 fabric.dog fabric.dog-canary
",
            0.0,
        );
        let out = handler
            .handle_query(mk_query("db.shard7.fabric.dog"))
            .await
            .expect("forward should succeed");
        assert_eq!(out.name, "db.shard7.fabric.dog");
        assert_eq!(handler.next.forwards.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn passes_through_non_matching_name() {
        let handler = mk_handler(
            "---
canary-rewrites:
 - suffix random 1.0 fabric.dog fabric.dog-canary
",
            0.0,
        );
        let out = handler
            .handle_query(mk_query("www.example.org"))
            .await
            .expect("forward should succeed");
        assert_eq!(out.name, "www.example.org");
        assert_eq!(handler.next.forwards.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn first_matching_rule_wins() {
        let handler = mk_handler(
            "---
canary-rewrites:
 - suffix random 1.0 fabric.dog fabric.dog-blue
 - suffix random 1.0 fabric.dog fabric.dog-green
",
            0.0,
        );
        let out = handler
            .handle_query(mk_query("db.fabric.dog"))
            .await
            .expect("forward should succeed");
        /* Only the first rule applies; the rewritten name is forwarded as-is,
         * never re-evaluated against later rules.
         */
        assert_eq!(out.name, "db.fabric.dog-blue");
        assert_eq!(handler.next.forwards.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn later_rule_applies_when_earlier_does_not_match() {
        let handler = mk_handler(
            "---
canary-rewrites:
 - suffix random 1.0 fabric.cat fabric.cat-canary
 - suffix random 1.0 fabric.dog fabric.dog-canary
",
            0.0,
        );
        let out = handler
            .handle_query(mk_query("db.fabric.dog"))
            .await
            .expect("forward should succeed");
        assert_eq!(out.name, "db.fabric.dog-canary");
    }

    #[tokio::test]
    async fn empty_config_is_passthrough() {
        let handler = mk_handler(
            "---
canary-rewrites:
",
            0.0,
        );
        let out = handler
            .handle_query(mk_query("db.fabric.dog"))
            .await
            .expect("forward should succeed");
        assert_eq!(out.name, "db.fabric.dog");
        assert_eq!(handler.next.forwards.load(Ordering::SeqCst), 1);
    }
}
