// Demo mode: synthetic pageviews from a handful of fake visitors
//
// Each visitor keeps its user agent and address, so the memstore folds their
// pageviews into one session. A few hits carry a spam referrer or a crawler
// user agent to show those being filtered out on persist.
//
// Run with: HITKEEPER_DEMO=1 cargo run --release

use crate::hit::Hit;
use crate::memstore::Memstore;
use chrono::Utc;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::sleep;

/// Host the demo site is registered under
pub const DEMO_HOST: &str = "demo.hitkeeper.localhost";

struct Visitor {
    user_agent: &'static str,
    remote_addr: &'static str,
    location: &'static str,
}

const VISITORS: &[Visitor] = &[
    Visitor {
        user_agent: "Mozilla/5.0 (X11; Linux x86_64; rv:121.0) Gecko/20100101 Firefox/121.0",
        remote_addr: "198.51.100.23",
        location: "NL",
    },
    Visitor {
        user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_2) AppleWebKit/605.1.15 Safari/605.1.15",
        remote_addr: "203.0.113.80",
        location: "US-CA",
    },
    Visitor {
        user_agent: "Mozilla/5.0 (iPhone; CPU iPhone OS 17_1 like Mac OS X) Mobile/15E148",
        remote_addr: "192.0.2.144",
        location: "DE",
    },
    Visitor {
        user_agent: "Mozilla/5.0 (compatible; Googlebot/2.1; +http://www.google.com/bot.html)",
        remote_addr: "66.249.66.1",
        location: "",
    },
];

const PATHS: &[&str] = &["/", "/blog", "/blog/rust-sessions", "/about", "/pricing"];

const REFERRERS: &[&str] = &[
    "",
    "",
    "https://news.ycombinator.com/item?id=1",
    "https://duckduckgo.com/",
    "https://semalt.com/crawler",
];

const SIZES: &[&str] = &["1920,1080,1", "390,844,3", "2560,1440,2"];

fn random_hit(site: i64) -> Hit {
    let mut rng = rand::rng();
    let visitor = &VISITORS[rng.random_range(0..VISITORS.len())];

    Hit::new(site, PATHS[rng.random_range(0..PATHS.len())], Utc::now())
        .user_agent(visitor.user_agent)
        .remote_addr(visitor.remote_addr)
        .location(visitor.location)
        .referrer(REFERRERS[rng.random_range(0..REFERRERS.len())])
        .size(SIZES[rng.random_range(0..SIZES.len())])
}

/// Append a pageview every `interval` until shutdown
pub async fn run_demo(
    mem: Arc<Memstore>,
    site: i64,
    interval: Duration,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    tracing::info!(site, "Demo producer started");
    let mut produced = 0u64;

    loop {
        tokio::select! {
            _ = &mut shutdown_rx => {
                tracing::info!(produced, "Demo received shutdown signal");
                return;
            }
            _ = sleep(interval) => {
                mem.append([random_hit(site)]);
                produced += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memstore::{Backends, MemstoreOptions};
    use crate::refspam::RefspamList;
    use crate::site::Site;
    use crate::store::MemoryStore;
    use crate::util::SystemClock;

    #[test]
    fn test_random_hits_are_valid() {
        let store = Arc::new(MemoryStore::with_sites([Site::new(1, DEMO_HOST)]));
        let mem = Memstore::new(
            MemstoreOptions::default(),
            Backends::from_store(store.clone(), Arc::new(RefspamList::with_builtin(Vec::<String>::new()))),
            Arc::new(SystemClock),
        );

        mem.append((0..200).map(|_| random_hit(1)));
        let stored = mem.persist().unwrap();

        let m = mem.metrics();
        // Everything is either stored or deliberately filtered
        assert_eq!(stored.len() as u64 + m.refspam + m.ignored, 200);
        assert_eq!(m.invalid, 0);
        assert!(stored.iter().all(|h| h.session.is_some()));
        // At most three human visitors
        let sessions: std::collections::HashSet<_> = stored.iter().map(|h| h.session).collect();
        assert!(sessions.len() <= 3);
    }

    #[tokio::test]
    async fn test_run_demo_stops_on_shutdown() {
        let store = Arc::new(MemoryStore::with_sites([Site::new(1, DEMO_HOST)]));
        let mem = Arc::new(Memstore::new(
            MemstoreOptions::default(),
            Backends::from_store(store, Arc::new(RefspamList::default())),
            Arc::new(SystemClock),
        ));

        let (tx, rx) = oneshot::channel();
        let handle = tokio::spawn(run_demo(mem.clone(), 1, Duration::from_millis(5), rx));
        sleep(Duration::from_millis(100)).await;
        tx.send(()).unwrap();
        handle.await.unwrap();

        assert!(!mem.is_empty());
    }
}
