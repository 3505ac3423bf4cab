use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, trace};

use crate::error::{CoreError, RpcError};

pub(crate) type Completion = oneshot::Sender<Result<Value, CoreError>>;

struct PendingRequest {
    method: String,
    completion: Completion,
}

/// Correlates request ids with their waiting callers.
///
/// Ids come from one counter for the whole client lifetime, so they keep
/// increasing across reconnects and a late response from an old socket can
/// never complete a newer request.
pub(crate) struct RequestDispatcher {
    next_id: AtomicU64,
    pending: Mutex<HashMap<u64, PendingRequest>>,
}

impl RequestDispatcher {
    pub(crate) fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Allocate an id and park a completion under it.
    pub(crate) fn register(&self, method: &str) -> (u64, oneshot::Receiver<Result<Value, CoreError>>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (completion, receiver) = oneshot::channel();
        self.table().insert(
            id,
            PendingRequest {
                method: method.to_owned(),
                completion,
            },
        );
        (id, receiver)
    }

    /// Complete the request `id`. Unknown ids are ignored.
    pub(crate) fn resolve(&self, id: u64, outcome: Result<Value, RpcError>) {
        let Some(request) = self.table().remove(&id) else {
            debug!(rpc.id = id, "response for unknown request id ignored");
            return;
        };
        trace!(rpc.id = id, rpc.method = %request.method, ok = outcome.is_ok(), "rpc response");
        // The caller may have given up waiting; nothing to do then.
        let _ = request.completion.send(outcome.map_err(CoreError::from));
    }

    /// Drop a request whose bytes never reached the socket.
    pub(crate) fn cancel(&self, id: u64) {
        self.table().remove(&id);
    }

    /// Fail every pending request, typically with `ConnectionLost`.
    pub(crate) fn fail_all(&self, make_err: impl Fn() -> CoreError) -> usize {
        let drained: Vec<(u64, PendingRequest)> = self.table().drain().collect();
        let count = drained.len();
        for (id, request) in drained {
            trace!(rpc.id = id, rpc.method = %request.method, "failing pending request");
            let _ = request.completion.send(Err(make_err()));
        }
        count
    }

    pub(crate) fn pending_len(&self) -> usize {
        self.table().len()
    }

    fn table(&self) -> std::sync::MutexGuard<'_, HashMap<u64, PendingRequest>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_strictly_increasing() {
        let dispatcher = RequestDispatcher::new();
        let (a, _ra) = dispatcher.register("server.ping");
        let (b, _rb) = dispatcher.register("server.ping");
        let (c, _rc) = dispatcher.register("server.ping");
        assert!(a < b && b < c);
        assert_eq!(dispatcher.pending_len(), 3);
    }

    #[tokio::test]
    async fn responses_resolve_by_id_in_any_order() {
        let dispatcher = RequestDispatcher::new();
        let (first, rx_first) = dispatcher.register("blockchain.scripthash.get_balance");
        let (second, rx_second) = dispatcher.register("blockchain.estimatefee");

        dispatcher.resolve(second, Ok(serde_json::json!(0.01)));
        dispatcher.resolve(first, Ok(serde_json::json!({"confirmed": 1, "unconfirmed": 0})));

        let first_value = rx_first.await.expect("sender kept").expect("success");
        let second_value = rx_second.await.expect("sender kept").expect("success");
        assert_eq!(first_value["confirmed"], 1);
        assert_eq!(second_value, serde_json::json!(0.01));
        assert_eq!(dispatcher.pending_len(), 0);
    }

    #[tokio::test]
    async fn server_error_fails_the_completion() {
        let dispatcher = RequestDispatcher::new();
        let (id, rx) = dispatcher.register("blockchain.transaction.broadcast");

        dispatcher.resolve(
            id,
            Err(RpcError::ServerError {
                code: Some(1),
                message: "dust".into(),
            }),
        );

        let err = rx.await.expect("sender kept").expect_err("must fail");
        assert!(matches!(err, CoreError::Rpc(RpcError::ServerError { ref message, .. }) if message == "dust"));
    }

    #[tokio::test]
    async fn unknown_id_is_ignored() {
        let dispatcher = RequestDispatcher::new();
        let (id, mut rx) = dispatcher.register("server.version");

        dispatcher.resolve(id + 100, Ok(Value::Null));

        assert_eq!(dispatcher.pending_len(), 1);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn fail_all_rejects_everything_pending() {
        let dispatcher = RequestDispatcher::new();
        let (_, rx_a) = dispatcher.register("a");
        let (_, rx_b) = dispatcher.register("b");

        assert_eq!(dispatcher.fail_all(|| CoreError::ConnectionLost), 2);

        for rx in [rx_a, rx_b] {
            let err = rx.await.expect("sender kept").expect_err("must fail");
            assert!(matches!(err, CoreError::ConnectionLost));
        }
        assert_eq!(dispatcher.pending_len(), 0);
    }

    #[test]
    fn cancel_removes_the_entry() {
        let dispatcher = RequestDispatcher::new();
        let (id, _rx) = dispatcher.register("a");
        dispatcher.cancel(id);
        assert_eq!(dispatcher.pending_len(), 0);
    }
}
