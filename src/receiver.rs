use log::{info, warn};
use serde::{Deserialize, Serialize};

pub mod display;
pub mod error;
pub mod imap;
pub mod message;
pub mod settings;

use crate::receiver::error::ReceiverError;
use crate::receiver::imap::{ImapTransport, MailTransport};
use crate::receiver::message::{normalize, NormalizedMessage};
use crate::receiver::settings::ConnectionSpec;

/// Parameters for one execution. `max_results` bounds how many unseen
/// messages are fetched; it defaults to 10 and must be positive.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct FetchRequest {
    pub max_results: Option<u32>,
}

impl FetchRequest {
    pub const DEFAULT_MAX_RESULTS: u32 = 10;

    fn limit(&self) -> Result<usize, ReceiverError> {
        match self.max_results {
            Some(0) => Err(ReceiverError::Configuration(
                "max_results must be a positive integer".to_string(),
            )),
            Some(n) => Ok(n as usize),
            None => Ok(Self::DEFAULT_MAX_RESULTS as usize),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct FetchResult {
    pub count: usize,
    pub messages: Vec<NormalizedMessage>,
}

/// Entry point for the mail-ingestion pipeline.
///
/// Must be initialized with a validated [`ConnectionSpec`] before the
/// first execution. Each [`execute`](Self::execute) call owns its own
/// transport session for its whole duration and closes it on every
/// exit path; nothing is shared or cached between calls.
#[derive(Debug, Default)]
pub struct EmailReceiver {
    spec: Option<ConnectionSpec>,
}

impl EmailReceiver {
    pub fn new() -> Self {
        Self::default()
    }

    /// One-time setup. Rejects specs with missing required fields
    /// before any network I/O can happen.
    pub fn initialize(&mut self, spec: ConnectionSpec) -> Result<(), ReceiverError> {
        spec.validate()?;
        self.spec = Some(spec);
        Ok(())
    }

    /// Connect, locate unseen messages, fetch a bounded subset in
    /// mailbox order, normalize each, and disconnect.
    ///
    /// Any failure after the connection is established still logs out
    /// first; a logout failure during cleanup is logged and never
    /// masks the pipeline error.
    pub async fn execute(&self, request: &FetchRequest) -> Result<FetchResult, ReceiverError> {
        let spec = self.spec.as_ref().ok_or(ReceiverError::NotInitialized)?;
        let limit = request.limit()?;

        let mut transport = ImapTransport::connect(spec).await?;
        run_and_disconnect(&mut transport, limit).await
    }
}

// Everything that happens after a transport session exists: run the
// pipeline, then log out no matter how it went. A logout failure
// during cleanup is logged and never masks the pipeline outcome.
async fn run_and_disconnect(
    transport: &mut dyn MailTransport,
    limit: usize,
) -> Result<FetchResult, ReceiverError> {
    let messages = run_pipeline(transport, limit).await;
    if let Err(e) = transport.logout().await {
        warn!("logout after execution failed: {}", e);
    }
    let messages = messages?;

    info!("Retrieved {} emails.", messages.len());
    Ok(FetchResult {
        count: messages.len(),
        messages,
    })
}

// Sequential locate-fetch-normalize loop. A single fetch or decode
// failure aborts the whole batch, matching the reference behavior.
async fn run_pipeline(
    transport: &mut dyn MailTransport,
    limit: usize,
) -> Result<Vec<NormalizedMessage>, ReceiverError> {
    let ids = transport.search_unseen().await?;

    let mut messages = Vec::new();
    for id in ids.into_iter().take(limit) {
        let raw = transport.fetch(id).await?;
        messages.push(normalize(&raw)?);
    }
    Ok(messages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    /// In-memory transport serving generated messages, recording how
    /// often logout is called.
    struct MockTransport {
        ids: Vec<u32>,
        fail_fetch_of: Option<u32>,
        fail_logout: bool,
        logout_calls: u32,
    }

    impl MockTransport {
        fn with_messages(count: u32) -> Self {
            Self {
                ids: (1..=count).collect(),
                fail_fetch_of: None,
                fail_logout: false,
                logout_calls: 0,
            }
        }
    }

    #[async_trait]
    impl MailTransport for MockTransport {
        async fn search_unseen(&mut self) -> Result<Vec<u32>, ReceiverError> {
            Ok(self.ids.clone())
        }

        async fn fetch(&mut self, id: u32) -> Result<Vec<u8>, ReceiverError> {
            if self.fail_fetch_of == Some(id) {
                return Err(ReceiverError::Fetch {
                    id,
                    reason: "simulated failure".to_string(),
                });
            }
            let raw = format!(
                "From: sender@example.com\r\nSubject: msg {}\r\nDate: Mon, 2 Jun 2025 10:00:00 +0000\r\n\r\nbody {}\r\n",
                id, id
            );
            Ok(raw.into_bytes())
        }

        async fn logout(&mut self) -> Result<(), ReceiverError> {
            self.logout_calls += 1;
            if self.fail_logout {
                return Err(ReceiverError::Connection(
                    "simulated logout failure".to_string(),
                ));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn fetch_is_truncated_to_the_limit_in_order() {
        let mut transport = MockTransport::with_messages(15);
        let result = run_and_disconnect(&mut transport, 10).await.unwrap();

        assert_eq!(result.count, 10);
        assert_eq!(result.messages.len(), 10);
        for (i, message) in result.messages.iter().enumerate() {
            assert_eq!(message.metadata.subject, format!("msg {}", i + 1));
        }
    }

    #[tokio::test]
    async fn fewer_located_than_limit_fetches_all() {
        let mut transport = MockTransport::with_messages(3);
        let result = run_and_disconnect(&mut transport, 10).await.unwrap();
        assert_eq!(result.count, 3);
    }

    #[tokio::test]
    async fn mid_batch_fetch_failure_aborts_but_still_logs_out_once() {
        let mut transport = MockTransport::with_messages(5);
        transport.fail_fetch_of = Some(3);

        let outcome = run_and_disconnect(&mut transport, 10).await;
        assert!(matches!(outcome, Err(ReceiverError::Fetch { id: 3, .. })));
        assert_eq!(transport.logout_calls, 1);
    }

    #[tokio::test]
    async fn successful_batch_logs_out_exactly_once() {
        let mut transport = MockTransport::with_messages(2);
        run_and_disconnect(&mut transport, 10).await.unwrap();
        assert_eq!(transport.logout_calls, 1);
    }

    #[tokio::test]
    async fn logout_failure_does_not_mask_the_batch_outcome() {
        let mut transport = MockTransport::with_messages(2);
        transport.fail_logout = true;

        let result = run_and_disconnect(&mut transport, 10).await.unwrap();
        assert_eq!(result.count, 2);
        assert_eq!(transport.logout_calls, 1);
    }

    #[tokio::test]
    async fn logout_failure_keeps_the_original_fetch_error() {
        let mut transport = MockTransport::with_messages(5);
        transport.fail_fetch_of = Some(2);
        transport.fail_logout = true;

        let outcome = run_and_disconnect(&mut transport, 10).await;
        assert!(matches!(outcome, Err(ReceiverError::Fetch { id: 2, .. })));
    }

    #[tokio::test]
    async fn ids_within_one_result_set_never_collide() {
        let mut transport = MockTransport::with_messages(10);
        let result = run_and_disconnect(&mut transport, 10).await.unwrap();

        let mut ids: Vec<&str> = result.messages.iter().map(|m| m.id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), result.messages.len());
    }

    #[tokio::test]
    async fn execute_before_initialize_is_rejected() {
        let receiver = EmailReceiver::new();
        let outcome = receiver.execute(&FetchRequest::default()).await;
        assert!(matches!(outcome, Err(ReceiverError::NotInitialized)));
    }

    #[test]
    fn initialize_rejects_incomplete_spec() {
        let mut receiver = EmailReceiver::new();
        let spec = ConnectionSpec {
            host: String::new(),
            port: 993,
            use_ssl: true,
            username: "user".to_string(),
            password: "secret".to_string(),
            from: "user@example.com".to_string(),
        };
        assert!(matches!(
            receiver.initialize(spec),
            Err(ReceiverError::Configuration(_))
        ));
    }

    #[test]
    fn limit_defaults_to_ten_and_rejects_zero() {
        assert_eq!(FetchRequest::default().limit().unwrap(), 10);
        assert_eq!(
            FetchRequest {
                max_results: Some(25)
            }
            .limit()
            .unwrap(),
            25
        );
        assert!(matches!(
            FetchRequest {
                max_results: Some(0)
            }
            .limit(),
            Err(ReceiverError::Configuration(_))
        ));
    }
}
