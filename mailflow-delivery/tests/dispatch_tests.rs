//! End-to-end dispatch flows over the in-memory store, object store,
//! and mock transport.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;

use chrono::{Duration, Utc};
use pretty_assertions::assert_eq;

use mailflow_common::config::EngineConfig;
use mailflow_common::model::{
    Attachment, EmailTemplate, EmailTemplateLayout, LogStatus, Placeholder, QueueStatus,
    Recipients, SmtpServer,
};
use mailflow_delivery::{
    DispatchError, Dispatcher, EmlArchiver, EnqueueRequest, QueueManager, QueueOutcome,
    SendRequest,
};
use mailflow_smtp::{MockTransport, TransportError};
use mailflow_store::{MemoryObjectStore, MemoryStore, ObjectStore};

struct Harness {
    store: Arc<MemoryStore>,
    objects: Arc<MemoryObjectStore>,
    transport: Arc<MockTransport>,
    dispatcher: Arc<Dispatcher>,
    server_id: u64,
    template_id: u64,
}

fn harness() -> Harness {
    harness_with(EngineConfig::default(), None)
}

fn harness_with(config: EngineConfig, rate_limit: Option<u32>) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let objects = Arc::new(MemoryObjectStore::new());
    let transport = Arc::new(MockTransport::new());

    let server = store.add_server(SmtpServer {
        name: "primary".to_string(),
        host: "smtp.example.com".to_string(),
        from_email: "noreply@example.com".to_string(),
        from_name: "Example".to_string(),
        rate_limit_per_hour: rate_limit,
        is_default: true,
        ..SmtpServer::default()
    });

    let template = store
        .add_template(EmailTemplate {
            name: "Welcome".to_string(),
            subject: "Welcome, {{name}}!".to_string(),
            content_html: "<p>Hello {{name}}</p>".to_string(),
            content_text: Some("Hello {{name}}".to_string()),
            placeholders: vec![Placeholder {
                name: "name".to_string(),
                required: true,
                ..Placeholder::default()
            }],
            ..EmailTemplate::default()
        })
        .unwrap();

    let archiver = EmlArchiver::new(
        objects.clone() as Arc<dyn ObjectStore>,
        config.eml.clone(),
    );
    let dispatcher = Arc::new(Dispatcher::new(
        store.clone(),
        transport.clone(),
        archiver,
        &config,
    ));

    Harness {
        store,
        objects,
        transport,
        dispatcher,
        server_id: server.id,
        template_id: template.id,
    }
}

fn data(pairs: &[(&str, &str)]) -> ahash::AHashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

fn request(h: &Harness) -> SendRequest {
    SendRequest {
        template_id: h.template_id,
        server_id: None,
        recipients: Recipients::to_single("rcpt@example.com"),
        data: data(&[("name", "Ada")]),
        ..SendRequest::default()
    }
}

#[tokio::test]
async fn send_success_records_and_archives() {
    let h = harness();

    let log = h.dispatcher.send(request(&h)).await.unwrap();

    assert_eq!(log.status, LogStatus::Sent);
    assert_eq!(log.subject, "Welcome, Ada!");
    assert!(log.sent_at.is_some());
    assert_eq!(log.error_message, None);

    // Wire and artifact carry the same composition.
    let message = h.transport.last_message().unwrap();
    assert_eq!(message.subject, "Welcome, Ada!");

    let path = log.eml_file_path.unwrap();
    let artifact = h.objects.get(&path).await.unwrap();
    let parsed = mailparse::parse_mail(&artifact).unwrap();
    let subject = parsed
        .headers
        .iter()
        .find(|header| header.get_key() == "Subject")
        .unwrap()
        .get_value();
    assert_eq!(subject, "Welcome, Ada!");
}

#[tokio::test]
async fn send_wraps_html_in_referenced_layout() {
    let h = harness();

    let layout = h
        .store
        .add_layout(EmailTemplateLayout {
            name: "branded".to_string(),
            wrapper_html: "<html>[{{content}}]</html>".to_string(),
            ..EmailTemplateLayout::default()
        })
        .unwrap();

    let template = h
        .store
        .add_template(EmailTemplate {
            name: "Welcome Branded".to_string(),
            subject: "Welcome, {{name}}!".to_string(),
            content_html: "<p>Hello {{name}}</p>".to_string(),
            content_text: Some("Hello {{name}}".to_string()),
            layout_id: Some(layout.id),
            ..EmailTemplate::default()
        })
        .unwrap();

    let log = h
        .dispatcher
        .send(SendRequest {
            template_id: template.id,
            ..request(&h)
        })
        .await
        .unwrap();
    assert_eq!(log.body_html, "<html>[<p>Hello Ada</p>]</html>");
    // Plain-text body stays unwrapped.
    assert_eq!(log.body_text.as_deref(), Some("Hello Ada"));
}

#[tokio::test]
async fn template_without_layout_ignores_default_layout() {
    let h = harness();

    // A default layout exists, but the template does not reference it;
    // the default flag only preselects a layout for editors.
    let layout = h
        .store
        .add_layout(EmailTemplateLayout {
            name: "branded".to_string(),
            wrapper_html: "<html>WRAPPED[{{content}}]</html>".to_string(),
            is_default: true,
            ..EmailTemplateLayout::default()
        })
        .unwrap();
    h.store.set_default_layout(layout.id).unwrap();

    let log = h.dispatcher.send(request(&h)).await.unwrap();
    assert_eq!(log.body_html, "<p>Hello Ada</p>");
}

#[tokio::test]
async fn send_failure_records_error_and_propagates() {
    let h = harness();
    h.transport.fail_next(TransportError::Rejected {
        phase: "RCPT TO",
        code: 550,
        message: "no such user".to_string(),
    });

    let err = h.dispatcher.send(request(&h)).await.unwrap_err();
    assert!(matches!(err, DispatchError::Transport(_)));

    let logs = h.store.logs();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].status, LogStatus::Failed);
    assert!(logs[0].failed_at.is_some());
    assert!(
        logs[0]
            .error_message
            .as_deref()
            .unwrap()
            .contains("no such user")
    );
    assert!(logs[0].eml_file_path.is_none());
}

#[tokio::test]
async fn missing_required_placeholder_fails_before_logging() {
    let h = harness();

    let err = h
        .dispatcher
        .send(SendRequest {
            data: data(&[]),
            ..request(&h)
        })
        .await
        .unwrap_err();

    match err {
        DispatchError::MissingPlaceholders(names) => assert_eq!(names, vec!["name"]),
        other => panic!("unexpected error: {other}"),
    }
    assert!(h.store.logs().is_empty());
}

#[tokio::test]
async fn rate_limit_opens_as_window_slides() {
    let h = harness_with(EngineConfig::default(), Some(2));

    h.dispatcher.send(request(&h)).await.unwrap();
    h.dispatcher.send(request(&h)).await.unwrap();

    let err = h.dispatcher.send(request(&h)).await.unwrap_err();
    assert!(err.is_rate_limited());

    // Age one send past the window; one slot frees up.
    let first = h.store.logs()[0].id;
    h.store
        .set_log_sent_at(first, Utc::now() - Duration::minutes(61))
        .unwrap();

    let log = h.dispatcher.send(request(&h)).await.unwrap();
    assert_eq!(log.status, LogStatus::Sent);
    assert_eq!(h.transport.sent_count(), 3);
}

#[tokio::test]
async fn inactive_server_and_template_are_refused() {
    let h = harness();

    let mut server = h.store.server(h.server_id).unwrap();
    server.is_active = false;
    h.store.update_server(server).unwrap();

    let err = h.dispatcher.send(request(&h)).await.unwrap_err();
    assert!(matches!(err, DispatchError::InactiveServer(_)));

    let mut server = h.store.server(h.server_id).unwrap();
    server.is_active = true;
    h.store.update_server(server).unwrap();

    let dormant = h
        .store
        .add_template(EmailTemplate {
            name: "Dormant".to_string(),
            subject: "unused".to_string(),
            content_html: "<p>unused</p>".to_string(),
            is_active: false,
            ..EmailTemplate::default()
        })
        .unwrap();

    let err = h
        .dispatcher
        .send(SendRequest {
            template_id: dormant.id,
            ..request(&h)
        })
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::InactiveTemplate(_)));

    assert!(h.store.logs().is_empty());
}

#[tokio::test]
async fn attachments_flow_into_wire_message() {
    let h = harness();
    h.objects
        .put("files/invoice.pdf", b"%PDF-1.4 fake")
        .await
        .unwrap();

    let log = h
        .dispatcher
        .send(SendRequest {
            attachments: vec![Attachment {
                name: "invoice.pdf".to_string(),
                path: "files/invoice.pdf".to_string(),
                mime: "application/pdf".to_string(),
                size: 13,
            }],
            ..request(&h)
        })
        .await
        .unwrap();

    let artifact = h.objects.get(&log.eml_file_path.unwrap()).await.unwrap();
    let parsed = mailparse::parse_mail(&artifact).unwrap();
    // multipart/mixed: alternative body + one attachment.
    assert_eq!(parsed.subparts.len(), 2);
    assert_eq!(
        parsed.subparts[1].get_body_raw().unwrap(),
        b"%PDF-1.4 fake".to_vec()
    );
}

#[tokio::test]
async fn bcc_survives_the_artifact_round_trip() {
    let h = harness();

    let log = h
        .dispatcher
        .send(SendRequest {
            recipients: Recipients {
                to: vec!["to@example.com".to_string()],
                cc: vec!["cc@example.com".to_string()],
                bcc: vec!["bcc@example.com".to_string()],
            },
            ..request(&h)
        })
        .await
        .unwrap();

    let artifact = h.objects.get(&log.eml_file_path.unwrap()).await.unwrap();
    let parsed = mailparse::parse_mail(&artifact).unwrap();
    let bcc = parsed
        .headers
        .iter()
        .find(|header| header.get_key() == "Bcc")
        .unwrap()
        .get_value();
    assert_eq!(bcc, "bcc@example.com");
}

#[tokio::test]
async fn preview_reports_placeholder_usage() {
    let h = harness();

    let preview = h
        .dispatcher
        .preview(h.template_id, &data(&[("name", "Ada"), ("extra", "x")]))
        .unwrap();

    assert_eq!(preview.subject, "Welcome, Ada!");
    assert_eq!(preview.placeholders_used, vec!["extra", "name"]);
    assert!(preview.missing_placeholders.is_empty());

    // Optional placeholders show up as missing without failing the render.
    let preview = {
        let mut template = h.store.template(h.template_id).unwrap();
        template.placeholders.push(Placeholder {
            name: "coupon".to_string(),
            required: false,
            ..Placeholder::default()
        });
        // A second template carrying an optional placeholder.
        template.name = "Welcome 2".to_string();
        template.slug = String::new();
        template.id = 0;
        let template = h.store.add_template(template).unwrap();
        h.dispatcher
            .preview(template.id, &data(&[("name", "Ada")]))
            .unwrap()
    };
    assert_eq!(preview.missing_placeholders, vec!["coupon"]);
}

#[tokio::test]
async fn test_email_carries_caller_subject() {
    let h = harness();

    h.dispatcher
        .send_test_email(h.server_id, "ops@example.com", Some("Smoke check"))
        .await
        .unwrap();
    assert_eq!(h.transport.last_message().unwrap().subject, "Smoke check");

    h.dispatcher
        .send_test_email(h.server_id, "ops@example.com", None)
        .await
        .unwrap();
    assert!(h.transport.last_message().unwrap().subject.contains("primary"));

    // Probes never reach the audit log.
    assert!(h.store.logs().is_empty());
}

#[tokio::test]
async fn statistics_aggregate_outcomes() {
    let h = harness();

    h.dispatcher.send(request(&h)).await.unwrap();
    h.transport.fail_next(TransportError::ConnectionClosed);
    let _ = h.dispatcher.send(request(&h)).await;

    let stats = h.dispatcher.statistics();
    assert_eq!(stats.total, 2);
    assert_eq!(stats.sent, 1);
    assert_eq!(stats.failed, 1);
    assert!((stats.success_rate() - 50.0).abs() < f64::EPSILON);
}

fn fast_queue_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.queue.backoff_secs = vec![0];
    config.queue.delay_between_emails_secs = 0;
    config
}

#[tokio::test]
async fn queue_item_delivers_and_completes() {
    let config = fast_queue_config();
    let h = harness_with(config.clone(), None);
    let manager = QueueManager::new(h.dispatcher.clone(), config.queue);

    let item = manager
        .enqueue(EnqueueRequest {
            template_id: h.template_id,
            recipients: Recipients::to_single("rcpt@example.com"),
            data: data(&[("name", "Ada")]),
            ..EnqueueRequest::default()
        })
        .unwrap();

    let outcome = manager.process_one(item.id).await.unwrap();
    let QueueOutcome::Sent(log_id) = outcome else {
        panic!("expected delivery, got {outcome:?}");
    };

    assert_eq!(h.store.log(log_id).unwrap().status, LogStatus::Sent);
    assert_eq!(
        h.store.queue_item(item.id).unwrap().status,
        QueueStatus::Sent
    );
}

#[tokio::test]
async fn queue_retries_transient_then_succeeds() {
    let config = fast_queue_config();
    let h = harness_with(config.clone(), None);
    let manager = QueueManager::new(h.dispatcher.clone(), config.queue);

    h.transport.fail_next(TransportError::ConnectionClosed);
    h.transport.fail_next(TransportError::Timeout { phase: "DATA" });

    let item = manager
        .enqueue(EnqueueRequest {
            template_id: h.template_id,
            recipients: Recipients::to_single("rcpt@example.com"),
            data: data(&[("name", "Ada")]),
            ..EnqueueRequest::default()
        })
        .unwrap();

    let outcome = manager.process_one(item.id).await.unwrap();
    assert!(matches!(outcome, QueueOutcome::Sent(_)));

    let stored = h.store.queue_item(item.id).unwrap();
    assert_eq!(stored.attempts, 3);
    assert_eq!(stored.status, QueueStatus::Sent);
}

#[tokio::test]
async fn queue_forecloses_on_permanent_failure() {
    let config = fast_queue_config();
    let h = harness_with(config.clone(), None);
    let manager = QueueManager::new(h.dispatcher.clone(), config.queue);

    h.transport.fail_next(TransportError::Auth {
        code: 535,
        message: "denied".to_string(),
    });

    let item = manager
        .enqueue(EnqueueRequest {
            template_id: h.template_id,
            recipients: Recipients::to_single("rcpt@example.com"),
            data: data(&[("name", "Ada")]),
            ..EnqueueRequest::default()
        })
        .unwrap();

    let outcome = manager.process_one(item.id).await.unwrap();
    assert_eq!(outcome, QueueOutcome::Failed);

    let stored = h.store.queue_item(item.id).unwrap();
    assert_eq!(stored.status, QueueStatus::Failed);
    assert_eq!(stored.attempts, 1);
    assert!(stored.error_message.as_deref().unwrap().contains("denied"));
}

#[tokio::test]
async fn queue_exhausts_retry_budget() {
    let config = fast_queue_config();
    let h = harness_with(config.clone(), None);
    let manager = QueueManager::new(h.dispatcher.clone(), config.queue.clone());

    for _ in 0..config.queue.max_attempts {
        h.transport.fail_next(TransportError::ConnectionClosed);
    }

    let item = manager
        .enqueue(EnqueueRequest {
            template_id: h.template_id,
            recipients: Recipients::to_single("rcpt@example.com"),
            data: data(&[("name", "Ada")]),
            ..EnqueueRequest::default()
        })
        .unwrap();

    let outcome = manager.process_one(item.id).await.unwrap();
    assert_eq!(outcome, QueueOutcome::Failed);
    assert_eq!(
        h.store.queue_item(item.id).unwrap().attempts,
        config.queue.max_attempts
    );
}

#[tokio::test]
async fn queue_enqueue_validates_eagerly() {
    let config = fast_queue_config();
    let h = harness_with(config.clone(), None);
    let manager = QueueManager::new(h.dispatcher.clone(), config.queue);

    // Missing required placeholder is refused at enqueue time.
    let err = manager
        .enqueue(EnqueueRequest {
            template_id: h.template_id,
            recipients: Recipients::to_single("rcpt@example.com"),
            ..EnqueueRequest::default()
        })
        .unwrap_err();
    assert!(matches!(err, DispatchError::MissingPlaceholders(_)));

    let err = manager
        .enqueue(EnqueueRequest {
            template_id: h.template_id,
            data: data(&[("name", "Ada")]),
            ..EnqueueRequest::default()
        })
        .unwrap_err();
    assert!(matches!(err, DispatchError::NoRecipients));

    assert!(h.store.queue_items().is_empty());
}

#[tokio::test]
async fn queue_bulk_staggers_schedules() {
    let config = fast_queue_config();
    let h = harness_with(EngineConfig::default(), None);
    let mut queue_config = config.queue;
    queue_config.delay_between_emails_secs = 2;
    let manager = QueueManager::new(h.dispatcher.clone(), queue_config);

    let now = Utc::now();
    let recipients: Vec<String> = (0..3).map(|i| format!("user{i}@example.com")).collect();

    let items = manager
        .enqueue_bulk(
            &EnqueueRequest {
                template_id: h.template_id,
                data: data(&[("name", "Ada")]),
                ..EnqueueRequest::default()
            },
            &recipients,
            now,
        )
        .unwrap();

    assert_eq!(items.len(), 3);
    for (index, item) in items.iter().enumerate() {
        let expected = now + Duration::seconds(2 * i64::try_from(index).unwrap());
        assert_eq!(item.scheduled_at, Some(expected));
        assert_eq!(item.recipients.to, vec![format!("user{index}@example.com")]);
    }
}

#[tokio::test]
async fn cancelled_item_cannot_be_processed() {
    let config = fast_queue_config();
    let h = harness_with(config.clone(), None);
    let manager = QueueManager::new(h.dispatcher.clone(), config.queue);

    let item = manager
        .enqueue(EnqueueRequest {
            template_id: h.template_id,
            recipients: Recipients::to_single("rcpt@example.com"),
            data: data(&[("name", "Ada")]),
            ..EnqueueRequest::default()
        })
        .unwrap();

    manager.cancel(item.id).unwrap();
    assert!(manager.process_one(item.id).await.is_err());
    assert_eq!(h.transport.sent_count(), 0);
}
