//! Integration tests for the email library

use email::provider::{MockOutcome, MockProvider};
use email::{
    Branding, DeliveryEvent, EmailTemplate, JobState, MailService, MailServiceConfig,
    TemplateRenderer, TransportProvider,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

fn start(mock: &Arc<MockProvider>) -> MailService {
    MailService::start(MailServiceConfig::default(), Arc::new(mock.clone()))
        .expect("Failed to start mail service")
}

/// Collect events until `terminal` jobs have finished.
async fn collect_events(
    rx: &mut broadcast::Receiver<DeliveryEvent>,
    terminal: usize,
) -> Vec<DeliveryEvent> {
    let mut events = Vec::new();
    let mut finished = 0;

    while finished < terminal {
        let event = tokio::time::timeout(Duration::from_secs(60), rx.recv())
            .await
            .expect("Timed out waiting for delivery events")
            .expect("Event channel closed");
        if event.state.is_terminal() {
            finished += 1;
        }
        events.push(event);
    }

    events
}

fn summary(events: &[DeliveryEvent]) -> Vec<(String, u32, JobState)> {
    events
        .iter()
        .map(|e| (e.recipient.clone(), e.attempt, e.state))
        .collect()
}

mod queue_tests {
    use super::*;

    #[tokio::test]
    async fn test_retry_goes_to_back_of_queue() {
        let mock = Arc::new(MockProvider::new().with_script([
            MockOutcome::Reject("421 try again later".into()),
            MockOutcome::Deliver,
            MockOutcome::Deliver,
        ]));
        let service = start(&mock);
        let mut rx = service.subscribe();

        service.send_mail("a@x.com", EmailTemplate::otp("111111"));
        service.send_mail("b@x.com", EmailTemplate::otp("222222"));

        let events = collect_events(&mut rx, 2).await;
        let a = "a@x.com".to_string();
        let b = "b@x.com".to_string();
        assert_eq!(
            summary(&events),
            vec![
                (a.clone(), 1, JobState::InFlight),
                (a.clone(), 1, JobState::Pending),
                (b.clone(), 1, JobState::InFlight),
                (b.clone(), 1, JobState::Delivered),
                (a.clone(), 2, JobState::InFlight),
                (a.clone(), 2, JobState::Delivered),
            ]
        );

        let order: Vec<_> = mock
            .attempts()
            .await
            .into_iter()
            .map(|email| email.to_email)
            .collect();
        assert_eq!(order, vec![a.clone(), b, a]);
    }

    #[tokio::test]
    async fn test_retry_lands_after_jobs_already_queued() {
        let mock = Arc::new(
            MockProvider::new()
                .gated()
                .with_script([MockOutcome::Reject("421".into())]),
        );
        let service = start(&mock);
        let mut rx = service.subscribe();

        service.send_mail("a@x.com", EmailTemplate::otp("1"));
        mock.wait_for_attempts(1).await;
        service.send_mail("b@x.com", EmailTemplate::otp("2"));
        service.send_mail("c@x.com", EmailTemplate::otp("3"));

        mock.release(10);
        collect_events(&mut rx, 3).await;

        let order: Vec<_> = mock
            .attempts()
            .await
            .into_iter()
            .map(|email| email.to_email)
            .collect();
        assert_eq!(order, vec!["a@x.com", "b@x.com", "c@x.com", "a@x.com"]);
    }

    #[tokio::test]
    async fn test_job_dropped_after_four_attempts() {
        let mock = Arc::new(MockProvider::rejecting("550 mailbox unavailable"));
        let service = start(&mock);
        let mut rx = service.subscribe();

        service.send_mail("a@x.com", EmailTemplate::otp("123456"));

        let events = collect_events(&mut rx, 1).await;
        let last = events.last().expect("No events");
        assert_eq!(last.state, JobState::Dropped);
        assert_eq!(last.attempt, 4);
        assert!(last.error.as_deref().unwrap_or_default().contains("550"));

        let in_flight: Vec<_> = events
            .iter()
            .filter(|e| e.state == JobState::InFlight)
            .map(|e| e.attempt)
            .collect();
        assert_eq!(in_flight, vec![1, 2, 3, 4]);

        service.wait_idle().await;
        assert_eq!(mock.attempt_count(), 4);
        assert_eq!(mock.delivered_count().await, 0);
        assert!(!service.queue().is_worker_active());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_sends_share_one_worker() {
        const JOBS: usize = 20;

        let mock = Arc::new(MockProvider::new().gated());
        let service = Arc::new(start(&mock));

        service.send_mail("first@x.com", EmailTemplate::otp("0"));
        mock.wait_for_attempts(1).await;

        let handles: Vec<_> = (1..JOBS)
            .map(|i| {
                let service = Arc::clone(&service);
                tokio::spawn(async move {
                    service.send_mail(format!("user{}@x.com", i), EmailTemplate::otp(i.to_string()))
                })
            })
            .collect();
        for handle in handles {
            handle.await.expect("Sender task panicked");
        }

        assert_eq!(service.pending(), JOBS - 1);
        assert_eq!(service.queue().workers_started(), 1);

        mock.release(JOBS);
        assert!(service.shutdown(Duration::from_secs(10)).await);

        assert_eq!(mock.delivered_count().await, JOBS);
        assert_eq!(mock.max_in_flight(), 1);
        assert_eq!(service.queue().workers_started(), 1);
    }

    #[tokio::test]
    async fn test_queue_restarts_after_going_idle() {
        let mock = Arc::new(MockProvider::new());
        let service = start(&mock);

        service.send_mail("a@x.com", EmailTemplate::otp("1"));
        service.wait_idle().await;
        service.send_mail("b@x.com", EmailTemplate::otp("2"));
        service.wait_idle().await;

        assert_eq!(mock.delivered_count().await, 2);
        assert_eq!(service.queue().workers_started(), 2);
    }
}

mod timeout_tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_hung_send_counts_as_failed_attempt() {
        let mock = Arc::new(MockProvider::new().with_script([MockOutcome::Hang]));
        let service = start(&mock);
        let mut rx = service.subscribe();
        let started = tokio::time::Instant::now();

        service.send_mail("a@x.com", EmailTemplate::otp("123456"));

        let events = collect_events(&mut rx, 1).await;
        assert_eq!(events[1].state, JobState::Pending);
        assert!(events[1]
            .error
            .as_deref()
            .unwrap_or_default()
            .contains("timed out"));

        let last = events.last().expect("No events");
        assert_eq!(last.state, JobState::Delivered);
        assert_eq!(last.attempt, 2);
        assert!(started.elapsed() >= Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_success_is_ignored() {
        let mock = Arc::new(MockProvider::new().with_script([
            MockOutcome::Delay(Duration::from_secs(20)),
            MockOutcome::Deliver,
        ]));
        let service = start(&mock);
        let mut rx = service.subscribe();

        service.send_mail("a@x.com", EmailTemplate::otp("123456"));
        collect_events(&mut rx, 1).await;

        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(mock.attempt_count(), 2);
        assert_eq!(mock.delivered_count().await, 1);
        assert!(rx.try_recv().is_err(), "No events after the terminal one");
        assert_eq!(service.pending(), 0);
    }
}

mod transport_tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_see_one_connection() {
        let mock = Arc::new(MockProvider::new().with_verify_delay(Duration::from_secs(1)));
        let transport = Arc::new(TransportProvider::new(Arc::new(mock.clone())));

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let transport = Arc::clone(&transport);
                tokio::spawn(async move { transport.get_connection().await })
            })
            .collect();

        let mut connections = Vec::new();
        for handle in handles {
            connections.push(
                handle
                    .await
                    .expect("Task panicked")
                    .expect("Connection failed"),
            );
        }

        assert!(connections.iter().all(|c| Arc::ptr_eq(c, &connections[0])));
        assert_eq!(transport.handshake_count(), 1);
        assert_eq!(mock.health_checks(), 1);
    }

    #[tokio::test]
    async fn test_delivery_recovers_after_failed_verification() {
        let mock = Arc::new(MockProvider::new().with_verify_failures(2));
        let service = start(&mock);
        let mut rx = service.subscribe();

        service.send_mail("a@x.com", EmailTemplate::otp("123456"));

        let events = collect_events(&mut rx, 1).await;
        let last = events.last().expect("No events");
        assert_eq!(last.state, JobState::Delivered);
        assert_eq!(last.attempt, 3);
        assert_eq!(service.transport().handshake_count(), 3);
        assert!(service.transport().is_ready());
    }
}

mod template_tests {
    use super::*;

    #[tokio::test]
    async fn test_same_props_render_once() {
        let renderer = TemplateRenderer::new(Branding::default()).expect("Failed to build renderer");
        let template =
            EmailTemplate::password_reset("Ada", "https://bobo.app/reset/abc", "ada@x.com");

        let first = renderer.render(&template).await.expect("Render failed");
        let second = renderer.render(&template.clone()).await.expect("Render failed");

        assert_eq!(first.subject, second.subject);
        assert_eq!(first.body.as_bytes(), second.body.as_bytes());
        assert_eq!(renderer.render_count(), 1);
    }

    #[tokio::test]
    async fn test_repeated_sends_reuse_cached_body() {
        let mock = Arc::new(MockProvider::new());
        let service = start(&mock);

        for _ in 0..3 {
            service.send_mail("a@x.com", EmailTemplate::otp("123456"));
        }
        service.wait_idle().await;

        assert_eq!(mock.delivered_count().await, 3);
        assert_eq!(service.renderer().render_count(), 1);
    }
}

mod end_to_end_tests {
    use super::*;

    #[tokio::test]
    async fn test_otp_email_delivered_once() {
        let mock = Arc::new(MockProvider::new());
        let service = start(&mock);
        let mut rx = service.subscribe();

        let job_id = service.send_mail("a@x.com", EmailTemplate::otp("123456"));

        let events = collect_events(&mut rx, 1).await;
        assert_eq!(
            events.iter().map(|e| e.state).collect::<Vec<_>>(),
            vec![JobState::InFlight, JobState::Delivered]
        );
        assert!(events.iter().all(|e| e.job_id == job_id && e.attempt == 1));

        let delivered = mock.delivered().await;
        assert_eq!(mock.attempt_count(), 1);
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].to_email, "a@x.com");
        assert_eq!(delivered[0].subject, "Verify your email");
        assert!(delivered[0].html_body.contains("123456"));

        service.wait_idle().await;
        assert_eq!(service.pending(), 0);
    }

    #[tokio::test]
    async fn test_always_rejecting_transport_never_reaches_caller() {
        let mock = Arc::new(MockProvider::rejecting("550 no such user"));
        let service = start(&mock);
        let mut rx = service.subscribe();

        // Returns immediately whatever the transport does
        let job_id = service.send_mail("ghost@x.com", EmailTemplate::otp("000000"));

        let events = collect_events(&mut rx, 1).await;
        let last = events.last().expect("No events");
        assert_eq!(last.job_id, job_id);
        assert_eq!(last.state, JobState::Dropped);
        assert_eq!(mock.attempt_count(), 4);

        assert!(service.shutdown(Duration::from_secs(1)).await);
    }
}
