//! Service calls: the payload of Invoke and Notify command messages.
//!
//! An outbound Invoke that expects a reply is wrapped in a
//! [`PendingServiceCall`] and parked in the connection's pending-call
//! map under a fresh transaction id until the peer answers or the
//! connection closes.  A [`DeferredResult`] covers the opposite
//! direction: an inbound Invoke whose answer the application produces
//! later, outside the handler.

mod status;

pub use self::status::{codes, Status, StatusLevel};

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use log::warn;
use rml_amf0::Amf0Value;

use crate::connection::RtmpConnection;
use crate::messages::RtmpMessage;

/// Lifecycle of a service call.
#[derive(Eq, PartialEq, Debug, Copy, Clone)]
pub enum CallStatus {
    Pending,
    SuccessResult,
    SuccessNull,
    SuccessVoid,
    ServiceNotFound,
    MethodNotFound,
    AccessDenied,
    InvocationFailure,
    GeneralException,
    AppShutdown,
    /// Stamped on calls that were still pending when their connection
    /// closed.
    NotConnected,
}

/// A call to a named method, optionally scoped to a service.
#[derive(PartialEq, Debug, Clone)]
pub struct ServiceCall {
    pub service_name: Option<String>,
    pub method: String,
    pub arguments: Vec<Amf0Value>,
    pub status: CallStatus,
}

impl ServiceCall {
    pub fn new(method: &str, arguments: Vec<Amf0Value>) -> ServiceCall {
        ServiceCall {
            service_name: None,
            method: method.to_string(),
            arguments,
            status: CallStatus::Pending,
        }
    }

    pub fn with_service(service_name: &str, method: &str, arguments: Vec<Amf0Value>) -> ServiceCall {
        ServiceCall {
            service_name: Some(service_name.to_string()),
            ..ServiceCall::new(method, arguments)
        }
    }

    pub fn is_success(&self) -> bool {
        match self.status {
            CallStatus::SuccessResult | CallStatus::SuccessNull | CallStatus::SuccessVoid => true,
            _ => false,
        }
    }
}

/// Callback invoked when a pending call completes or fails.
pub type CallResultCallback = Box<dyn Fn(&ServiceCall) + Send + Sync>;

/// An outbound call awaiting the peer's reply.
pub struct PendingServiceCall {
    call: ServiceCall,
    result: Option<Amf0Value>,
    callbacks: Vec<CallResultCallback>,
}

impl PendingServiceCall {
    pub fn new(call: ServiceCall) -> PendingServiceCall {
        PendingServiceCall {
            call,
            result: None,
            callbacks: Vec::new(),
        }
    }

    pub fn call(&self) -> &ServiceCall {
        &self.call
    }

    pub fn result(&self) -> Option<&Amf0Value> {
        self.result.as_ref()
    }

    pub fn register_callback(&mut self, callback: CallResultCallback) {
        self.callbacks.push(callback);
    }

    /// Records the peer's reply and notifies every registered callback.
    pub fn result_received(&mut self, result: Amf0Value) {
        self.call.status = CallStatus::SuccessResult;
        self.result = Some(result);
        for callback in &self.callbacks {
            callback(&self.call);
        }
    }

    /// Fails the call because its connection closed.  Each callback is
    /// notified exactly once; the call is consumed.
    pub(crate) fn fail_not_connected(mut self) {
        self.call.status = CallStatus::NotConnected;
        for callback in &self.callbacks {
            callback(&self.call);
        }
    }
}

impl fmt::Debug for PendingServiceCall {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("PendingServiceCall")
            .field("call", &self.call)
            .field("result", &self.result)
            .field("callbacks", &self.callbacks.len())
            .finish()
    }
}

static NEXT_DEFERRED_RESULT_ID: AtomicU64 = AtomicU64::new(1);

/// An inbound Invoke whose result is produced after the handler
/// returns.  `set_result` answers the peer on the command channel with
/// the remembered transaction id, exactly once.
pub struct DeferredResult {
    id: u64,
    transaction_id: u32,
    connection: Weak<RtmpConnection>,
    completed: AtomicBool,
}

impl DeferredResult {
    pub fn new(transaction_id: u32, connection: Weak<RtmpConnection>) -> Arc<DeferredResult> {
        Arc::new(DeferredResult {
            id: NEXT_DEFERRED_RESULT_ID.fetch_add(1, Ordering::SeqCst),
            transaction_id,
            connection,
            completed: AtomicBool::new(false),
        })
    }

    pub fn transaction_id(&self) -> u32 {
        self.transaction_id
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub fn set_result(&self, result: Amf0Value) {
        if self
            .completed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!(
                "Result already sent for deferred call with transaction id {}",
                self.transaction_id
            );
            return;
        }
        if let Some(connection) = self.connection.upgrade() {
            let mut call = ServiceCall::new("_result", vec![result]);
            call.status = CallStatus::SuccessResult;
            connection.get_channel(3).write(RtmpMessage::Invoke {
                transaction_id: self.transaction_id,
                call,
            });
            connection.unregister_deferred_result(self);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    #[test]
    fn result_notifies_all_callbacks() {
        let invocations = Arc::new(AtomicUsize::new(0));
        let observed_status = Arc::new(Mutex::new(None));

        let mut pending = PendingServiceCall::new(ServiceCall::new("echo", Vec::new()));
        for _ in 0..2 {
            let invocations = invocations.clone();
            let observed_status = observed_status.clone();
            pending.register_callback(Box::new(move |call| {
                invocations.fetch_add(1, Ordering::SeqCst);
                *observed_status.lock().unwrap() = Some(call.status);
            }));
        }

        pending.result_received(Amf0Value::Number(42.0));

        assert_eq!(invocations.load(Ordering::SeqCst), 2);
        assert_eq!(
            *observed_status.lock().unwrap(),
            Some(CallStatus::SuccessResult)
        );
        assert_eq!(pending.result(), Some(&Amf0Value::Number(42.0)));
    }

    #[test]
    fn failing_a_call_marks_it_not_connected() {
        let observed_status = Arc::new(Mutex::new(None));
        let mut pending = PendingServiceCall::new(ServiceCall::new("echo", Vec::new()));
        {
            let observed_status = observed_status.clone();
            pending.register_callback(Box::new(move |call| {
                *observed_status.lock().unwrap() = Some(call.status);
            }));
        }

        pending.fail_not_connected();

        assert_eq!(
            *observed_status.lock().unwrap(),
            Some(CallStatus::NotConnected)
        );
    }

    #[test]
    fn deferred_result_ids_are_unique() {
        let first = DeferredResult::new(1, Weak::new());
        let second = DeferredResult::new(1, Weak::new());
        assert_ne!(first.id(), second.id());
    }

    #[test]
    fn deferred_result_without_connection_completes_quietly() {
        let deferred = DeferredResult::new(9, Weak::new());
        deferred.set_result(Amf0Value::Null);
        deferred.set_result(Amf0Value::Null);
    }
}
