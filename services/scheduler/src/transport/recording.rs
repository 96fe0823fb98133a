//! Transport that records calls instead of sending them.

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;
use fleet_events::{Call, CallKind};
use tracing::debug;

use super::{ManagerTransport, TransportError};

/// Records every call; optionally rejects calls of chosen kinds.
#[derive(Default)]
pub struct RecordingTransport {
    calls: Mutex<Vec<Call>>,
    failing: Mutex<HashSet<CallKind>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every subsequent call of `kind`.
    pub fn fail_on(&self, kind: CallKind) {
        self.failing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(kind);
    }

    /// All calls received so far, in order. Rejected calls are included.
    pub fn calls(&self) -> Vec<Call> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Kinds of all calls received so far, in order.
    pub fn kinds(&self) -> Vec<CallKind> {
        self.calls().iter().map(Call::kind).collect()
    }
}

#[async_trait]
impl ManagerTransport for RecordingTransport {
    async fn send(&self, call: Call) -> Result<(), TransportError> {
        let kind = call.kind();
        debug!(call = %kind, "[RECORDING] Call sent");
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(call);

        if self
            .failing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&kind)
        {
            return Err(TransportError::Rejected {
                kind,
                message: "configured to fail".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_id::TaskId;

    #[tokio::test]
    async fn test_records_and_fails_selected_kinds() {
        let transport = RecordingTransport::new();
        transport.fail_on(CallKind::Kill);

        transport.send(Call::Teardown).await.unwrap();
        let err = transport
            .send(Call::kill(TaskId::parse("0.a.b.c").unwrap(), None))
            .await
            .unwrap_err();

        assert!(matches!(err, TransportError::Rejected { kind: CallKind::Kill, .. }));
        assert_eq!(transport.kinds(), vec![CallKind::Teardown, CallKind::Kill]);
    }
}
