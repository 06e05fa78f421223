//! End-to-end tests of the decision pipeline over the in-memory store.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tollgate_core::{
    Application, ApplicationId, AuthParams, EntityState, Metric, MetricId, Period,
    RejectionReason, ResolutionError, Service, ServiceId, StatusDocument, Transaction, Usage,
    UsageLimit, UsageValue,
};
use tollgate_state::{StateKey, StateStore};
use tollgate_state_memory::MemoryStateStore;
use tollgate_transactor::notify::{AUTHORIZE, CREATE_MULTIPLE, TRANSACTIONS};
use tollgate_transactor::{
    DecisionSource, MemoryReportQueue, RecordingNotifier, TokenCredentials, Transactor,
    TransactorBuilder, TransactorConfig, UsageRecorder, keys,
};

// -- Fixtures --

const SERVICE: &str = "1001";
const PROVIDER: &str = "pk-1";
const APP: &str = "app-1";

struct Harness {
    store: Arc<MemoryStateStore>,
    queue: Arc<MemoryReportQueue>,
    notifier: Arc<RecordingNotifier>,
    transactor: Transactor,
}

impl Harness {
    async fn start() -> Self {
        Self::with_config(TransactorConfig::default()).await
    }

    async fn with_config(config: TransactorConfig) -> Self {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();

        let store = Arc::new(MemoryStateStore::new());
        let queue = Arc::new(MemoryReportQueue::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let transactor = TransactorBuilder::new()
            .state(store.clone())
            .queue(queue.clone())
            .notifier(notifier.clone())
            .config(config)
            .build()
            .unwrap();

        let entities = transactor.entities();
        entities
            .save_service(
                &Service::new(SERVICE, PROVIDER).with_metric(Metric::new("m1", "hits")),
            )
            .await
            .unwrap();
        entities.save_application(&app()).await.unwrap();

        Self {
            store,
            queue,
            notifier,
            transactor,
        }
    }

    /// Apply every queued job to the usage counters.
    async fn record_queued(&self) {
        let recorder = UsageRecorder::new(self.store.clone());
        for job in self.queue.drain() {
            recorder.apply(&job).await.unwrap();
        }
    }

    async fn set_counter(&self, value: i64) {
        self.store
            .set(&day_counter(), &value.to_string(), None)
            .await
            .unwrap();
    }

    fn notified(&self, counter: &str) -> i64 {
        self.notifier
            .totals(PROVIDER)
            .get(counter)
            .copied()
            .unwrap_or(0)
    }
}

fn app() -> Application {
    Application::new(SERVICE, APP).with_limit(UsageLimit::new("m1", Period::Day, 10))
}

fn day_counter() -> StateKey {
    keys::application_usage(
        &ServiceId::new(SERVICE),
        &ApplicationId::new(APP),
        &MetricId::new("m1"),
        Period::Day,
        &Utc::now(),
    )
}

fn hits(n: i64) -> Usage {
    Usage::from([("hits".to_owned(), UsageValue::Increment(n))])
}

fn params() -> AuthParams {
    AuthParams::for_app(APP)
}

// -- Cache Tests --

mod caching {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn second_identical_request_is_served_from_cache() {
        let h = Harness::start().await;

        let first = h.transactor.authorize(PROVIDER, &params()).await.unwrap();
        assert_eq!(first.source, DecisionSource::Computed);
        assert!(first.is_authorized());

        let second = h.transactor.authorize(PROVIDER, &params()).await.unwrap();
        assert_eq!(second.source, DecisionSource::Cached);
        assert!(second.is_authorized());
        assert_eq!(second.application_id.as_str(), APP);
        assert_eq!(second.status.application_usage, first.status.application_usage);

        let metrics = h.transactor.metrics().snapshot();
        assert_eq!(metrics.cache_misses, 1);
        assert_eq!(metrics.cache_hits, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn entity_change_invalidates_the_combination() {
        let h = Harness::start().await;
        h.transactor.authorize(PROVIDER, &params()).await.unwrap();

        let mut suspended = app();
        suspended.state = EntityState::Suspended;
        h.transactor.entities().save_application(&suspended).await.unwrap();

        let decision = h.transactor.authorize(PROVIDER, &params()).await.unwrap();
        assert_eq!(decision.source, DecisionSource::Computed);
        assert_eq!(decision.reason(), Some(RejectionReason::ApplicationNotActive));
    }

    #[tokio::test(start_paused = true)]
    async fn cached_status_is_patched_with_reported_usage() {
        let h = Harness::start().await;
        let request = params().with_usage(hits(3));

        let first = h.transactor.authrep(PROVIDER, &request).await.unwrap();
        assert_eq!(first.source, DecisionSource::Computed);
        assert_eq!(first.status.application_usage[0].current_value, 3);

        let second = h.transactor.authrep(PROVIDER, &request).await.unwrap();
        assert_eq!(second.source, DecisionSource::Cached);
        assert!(second.is_authorized());
        assert_eq!(second.status.application_usage[0].current_value, 6);
    }

    #[tokio::test(start_paused = true)]
    async fn limit_crossing_falls_back_to_full_validation() {
        let h = Harness::start().await;
        h.transactor
            .authrep(PROVIDER, &params().with_usage(hits(3)))
            .await
            .unwrap();
        // Record behind the cache's back so the cached document survives.
        let _ = h.queue.drain();
        h.set_counter(3).await;

        let decision = h
            .transactor
            .authrep(PROVIDER, &params().with_usage(hits(8)))
            .await
            .unwrap();
        assert_eq!(decision.source, DecisionSource::Computed);
        assert_eq!(decision.reason(), Some(RejectionReason::LimitsExceeded));
        assert_eq!(decision.status.application_usage[0].current_value, 3);
        assert_eq!(h.transactor.metrics().snapshot().cache_fallbacks, 1);
        assert!(h.queue.is_empty(), "denied usage is not recorded");
    }

    #[tokio::test(start_paused = true)]
    async fn fast_path_hits_accumulate_usage() {
        let h = Harness::start().await;
        let request = params().with_usage(hits(3));

        let mut seen = Vec::new();
        for _ in 0..3 {
            let decision = h.transactor.authrep(PROVIDER, &request).await.unwrap();
            assert!(decision.is_authorized());
            seen.push((
                decision.source,
                decision.status.application_usage[0].current_value,
            ));
        }
        assert_eq!(
            seen,
            [
                (DecisionSource::Computed, 3),
                (DecisionSource::Cached, 6),
                (DecisionSource::Cached, 9),
            ]
        );

        let raw = h
            .store
            .get(&keys::application_status(SERVICE, "app-1::"))
            .await
            .unwrap()
            .unwrap();
        let cached: StatusDocument = serde_json::from_str(&raw).unwrap();
        assert_eq!(cached.application_usage[0].current_value, 9);

        let fourth = h.transactor.authrep(PROVIDER, &request).await.unwrap();
        assert_eq!(fourth.source, DecisionSource::Computed);
        assert_eq!(h.transactor.metrics().snapshot().cache_fallbacks, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_authreps_never_exceed_the_limit() {
        let h = Harness::start().await;
        let request = params().with_usage(hits(3));

        let mut authorized = 0;
        for _ in 0..6 {
            let decision = h.transactor.authrep(PROVIDER, &request).await.unwrap();
            if decision.is_authorized() {
                authorized += 1;
            } else {
                assert_eq!(decision.reason(), Some(RejectionReason::LimitsExceeded));
            }
            h.record_queued().await;
        }

        assert_eq!(authorized, 3);
        let counter = h.store.get(&day_counter()).await.unwrap();
        assert_eq!(counter.as_deref(), Some("9"));
    }

    #[tokio::test(start_paused = true)]
    async fn reported_usage_reaches_cached_decisions() {
        let h = Harness::start().await;
        h.transactor.authorize(PROVIDER, &params()).await.unwrap();
        let cached = h.transactor.authorize(PROVIDER, &params()).await.unwrap();
        assert_eq!(cached.source, DecisionSource::Cached);

        h.transactor
            .report(
                PROVIDER,
                None,
                vec![Transaction::for_application(APP, hits(11))],
                HashMap::new(),
            )
            .await
            .unwrap();
        h.record_queued().await;

        let decision = h.transactor.authorize(PROVIDER, &params()).await.unwrap();
        assert_eq!(decision.source, DecisionSource::Computed);
        assert_eq!(decision.reason(), Some(RejectionReason::LimitsExceeded));
    }

    #[tokio::test(start_paused = true)]
    async fn request_specific_denials_stay_out_of_the_cache() {
        let h = Harness::start().await;
        h.transactor.authorize(PROVIDER, &params()).await.unwrap();
        let cached = h.transactor.authorize(PROVIDER, &params()).await.unwrap();
        assert_eq!(cached.source, DecisionSource::Cached);

        let bogus = params().with_usage(Usage::from([(
            "bogus".to_owned(),
            UsageValue::Increment(1),
        )]));
        let too_much = params().with_usage(hits(11));
        for _ in 0..2 {
            let denied = h.transactor.authorize(PROVIDER, &bogus).await.unwrap();
            assert_eq!(denied.reason(), Some(RejectionReason::MetricInvalid));
            assert_eq!(denied.source, DecisionSource::Computed);

            let denied = h.transactor.authorize(PROVIDER, &too_much).await.unwrap();
            assert_eq!(denied.reason(), Some(RejectionReason::LimitsExceeded));
            assert_eq!(denied.source, DecisionSource::Computed);

            let decision = h.transactor.authorize(PROVIDER, &params()).await.unwrap();
            assert!(decision.is_authorized());
            assert_eq!(decision.source, DecisionSource::Cached);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn redirect_url_denial_does_not_reach_other_oauth_requests() {
        let h = Harness::start().await;
        let mut app = app();
        app.redirect_url = Some("https://cb.example.com".into());
        h.transactor.entities().save_application(&app).await.unwrap();

        let good = AuthParams {
            redirect_url: Some("https://cb.example.com".into()),
            ..params()
        };
        let bad = AuthParams {
            redirect_url: Some("https://evil.example.com".into()),
            ..params()
        };
        h.transactor.oauth_authorize(PROVIDER, &good).await.unwrap();

        for _ in 0..2 {
            let denied = h.transactor.oauth_authorize(PROVIDER, &bad).await.unwrap();
            assert_eq!(denied.reason(), Some(RejectionReason::RedirectUrlInvalid));

            let decision = h.transactor.oauth_authorize(PROVIDER, &good).await.unwrap();
            assert!(decision.is_authorized());
            assert_eq!(decision.source, DecisionSource::Cached);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn key_denials_are_cached_for_the_requested_key_only() {
        let h = Harness::start().await;
        let locked = app().with_key("k1");
        h.transactor.entities().save_application(&locked).await.unwrap();

        let good = AuthParams {
            app_key: Some("k1".into()),
            ..params()
        };
        let wrong = AuthParams {
            app_key: Some("k2".into()),
            ..params()
        };
        h.transactor.authorize(PROVIDER, &good).await.unwrap();

        for _ in 0..2 {
            let denied = h.transactor.authorize(PROVIDER, &wrong).await.unwrap();
            assert_eq!(denied.reason(), Some(RejectionReason::ApplicationKeyInvalid));
        }
        let again = h.transactor.authorize(PROVIDER, &wrong).await.unwrap();
        assert_eq!(again.source, DecisionSource::Cached);

        let decision = h.transactor.authorize(PROVIDER, &good).await.unwrap();
        assert!(decision.is_authorized());
        assert_eq!(decision.source, DecisionSource::Cached);
    }

    #[tokio::test(start_paused = true)]
    async fn any_key_of_a_keyless_application_is_cached() {
        let h = Harness::start().await;
        let request = AuthParams {
            app_key: Some("whatever".into()),
            ..params()
        };
        let first = h.transactor.authorize(PROVIDER, &request).await.unwrap();
        assert!(first.is_authorized());
        let second = h.transactor.authorize(PROVIDER, &request).await.unwrap();
        assert_eq!(second.source, DecisionSource::Cached);
    }

    #[tokio::test(start_paused = true)]
    async fn huge_increment_is_denied_without_overflow() {
        let h = Harness::start().await;
        h.transactor
            .authrep(PROVIDER, &params().with_usage(hits(3)))
            .await
            .unwrap();

        let decision = h
            .transactor
            .authrep(PROVIDER, &params().with_usage(hits(i64::MAX)))
            .await
            .unwrap();
        assert_eq!(decision.reason(), Some(RejectionReason::LimitsExceeded));
        assert_eq!(h.queue.len(), 1, "only the first call is queued");
    }

    #[tokio::test(start_paused = true)]
    async fn cached_denial_is_kept_until_an_override_cures_it() {
        let h = Harness::start().await;
        h.set_counter(11).await;

        let denied = h
            .transactor
            .authrep(PROVIDER, &params().with_usage(hits(5)))
            .await
            .unwrap();
        assert_eq!(denied.reason(), Some(RejectionReason::LimitsExceeded));

        let again = h
            .transactor
            .authrep(PROVIDER, &params().with_usage(hits(5)))
            .await
            .unwrap();
        assert_eq!(again.source, DecisionSource::Cached);
        assert!(!again.is_authorized());

        let reset = Usage::from([("hits".to_owned(), UsageValue::Set(2))]);
        let cured = h
            .transactor
            .authrep(PROVIDER, &params().with_usage(reset))
            .await
            .unwrap();
        assert_eq!(cured.source, DecisionSource::Computed);
        assert!(cured.is_authorized());
        assert_eq!(cured.status.application_usage[0].current_value, 2);
        assert_eq!(h.transactor.metrics().snapshot().cache_fallbacks, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn denial_fans_out_to_every_identity() {
        let h = Harness::start().await;
        let mut locked = app()
            .with_key("k1")
            .with_key("k2")
            .with_referrer_filter("example.com");
        locked.state = EntityState::Suspended;
        h.transactor.entities().save_application(&locked).await.unwrap();

        let request = AuthParams {
            app_key: Some("k1".into()),
            referrer: Some("example.com".into()),
            ..params()
        };
        let decision = h.transactor.authorize(PROVIDER, &request).await.unwrap();
        assert!(!decision.is_authorized());

        let written = [
            keys::application_status(SERVICE, "app-1:k1:example.com"),
            keys::application_status(SERVICE, "app-1:k2:example.com"),
        ];
        for key in &written {
            assert!(h.store.get(key).await.unwrap().is_some(), "{key} written");
            assert!(
                h.store
                    .set_contains(&keys::limit_violations(), &key.canonical())
                    .await
                    .unwrap()
            );
        }

        locked.state = EntityState::Active;
        h.transactor.entities().save_application(&locked).await.unwrap();
        let decision = h.transactor.authorize(PROVIDER, &request).await.unwrap();
        assert!(decision.is_authorized());
        for key in &written {
            assert!(
                !h.store
                    .set_contains(&keys::limit_violations(), &key.canonical())
                    .await
                    .unwrap()
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn user_scoped_decisions_are_cached_per_user() {
        let h = Harness::start().await;
        let mut app = app();
        app.user_required = true;
        h.transactor.entities().save_application(&app).await.unwrap();

        let request = AuthParams {
            user_id: Some("bob".into()),
            ..params()
        };
        // The first call creates the user, which bumps its version once.
        for _ in 0..2 {
            h.transactor.authorize(PROVIDER, &request).await.unwrap();
        }
        let decision = h.transactor.authorize(PROVIDER, &request).await.unwrap();
        assert_eq!(decision.source, DecisionSource::Cached);
        assert_eq!(decision.user_id.as_deref(), Some("bob"));
        assert!(decision.status.user_scoped);
    }

    #[tokio::test(start_paused = true)]
    async fn store_toggle_disables_the_fast_path() {
        let h = Harness::start().await;
        h.transactor.disable_caching().await.unwrap();
        assert!(!h.transactor.caching_enabled().await.unwrap());

        for _ in 0..2 {
            let decision = h.transactor.authorize(PROVIDER, &params()).await.unwrap();
            assert_eq!(decision.source, DecisionSource::Computed);
        }

        h.transactor.enable_caching().await.unwrap();
        h.transactor.authorize(PROVIDER, &params()).await.unwrap();
        let decision = h.transactor.authorize(PROVIDER, &params()).await.unwrap();
        assert_eq!(decision.source, DecisionSource::Cached);
    }

    #[tokio::test(start_paused = true)]
    async fn configuration_disables_the_cache_entirely() {
        let config = TransactorConfig::from_toml("[caching]\nenabled = false").unwrap();
        let h = Harness::with_config(config).await;

        for _ in 0..2 {
            let decision = h.transactor.authorize(PROVIDER, &params()).await.unwrap();
            assert_eq!(decision.source, DecisionSource::Computed);
        }
        let doc = h
            .store
            .get(&keys::application_status(SERVICE, "app-1::"))
            .await
            .unwrap();
        assert!(doc.is_none());
    }
}

// -- Report Tests --

mod reporting {
    use super::*;

    #[tokio::test]
    async fn report_enqueues_one_job_regardless_of_limits() {
        let h = Harness::start().await;
        let transactions = vec![
            Transaction::for_application(APP, hits(1_000_000)),
            Transaction::for_application(APP, hits(1)),
        ];

        let service_id = h
            .transactor
            .report(PROVIDER, None, transactions, HashMap::new())
            .await
            .unwrap();
        assert_eq!(service_id.as_str(), SERVICE);
        assert_eq!(h.queue.len(), 1);
        assert_eq!(h.queue.jobs()[0].transactions.len(), 2);
        assert_eq!(h.notified(CREATE_MULTIPLE), 1);
        assert_eq!(h.notified(TRANSACTIONS), 2);
    }

    #[tokio::test]
    async fn report_only_fails_on_service_resolution() {
        let h = Harness::start().await;
        let err = h
            .transactor
            .report("nope", None, Vec::new(), HashMap::new())
            .await
            .unwrap_err();
        assert_eq!(
            err.as_resolution(),
            Some(&ResolutionError::ProviderKeyInvalid("nope".into()))
        );

        let err = h
            .transactor
            .report(PROVIDER, Some("2002"), Vec::new(), HashMap::new())
            .await
            .unwrap_err();
        assert_eq!(
            err.as_resolution(),
            Some(&ResolutionError::ServiceIdInvalid("2002".into()))
        );
        assert!(h.queue.is_empty());
    }

    #[tokio::test]
    async fn recorded_usage_is_seen_by_the_next_validation() {
        let h = Harness::start().await;
        h.transactor
            .report(
                PROVIDER,
                Some(SERVICE),
                vec![Transaction::for_application(APP, hits(10))],
                HashMap::new(),
            )
            .await
            .unwrap();
        h.record_queued().await;

        let decision = h
            .transactor
            .authorize(PROVIDER, &params().with_usage(hits(1)))
            .await
            .unwrap();
        assert_eq!(decision.reason(), Some(RejectionReason::LimitsExceeded));
    }
}

// -- Authrep Tests --

mod authrep {
    use super::*;

    #[tokio::test]
    async fn authorized_usage_is_enqueued() {
        let h = Harness::start().await;
        let decision = h
            .transactor
            .authrep(PROVIDER, &params().with_usage(hits(2)))
            .await
            .unwrap();
        assert!(decision.is_authorized());

        let jobs = h.queue.jobs();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].service_id.as_str(), SERVICE);
        let tx = &jobs[0].transactions[0];
        assert_eq!(tx.application_id.as_deref(), Some(APP));
        assert_eq!(tx.usage, hits(2));

        assert_eq!(h.notified(AUTHORIZE), 1);
        assert_eq!(h.notified(CREATE_MULTIPLE), 1);
        assert_eq!(h.notified(TRANSACTIONS), 1);
    }

    #[tokio::test]
    async fn nothing_to_record_enqueues_nothing() {
        let h = Harness::start().await;
        h.transactor.authrep(PROVIDER, &params()).await.unwrap();
        h.transactor
            .authrep(PROVIDER, &params().with_usage(Usage::new()))
            .await
            .unwrap();

        assert!(h.queue.is_empty());
        assert_eq!(h.notified(AUTHORIZE), 2);
        assert_eq!(h.notified(CREATE_MULTIPLE), 0);
    }

    #[tokio::test]
    async fn a_log_alone_is_enqueued() {
        let h = Harness::start().await;
        let request = AuthParams {
            log: Some(HashMap::from([("code".to_owned(), "200".to_owned())])),
            ..params()
        };
        h.transactor.authrep(PROVIDER, &request).await.unwrap();
        assert_eq!(h.queue.len(), 1);
        assert!(h.queue.jobs()[0].transactions[0].usage.is_empty());
    }

    #[tokio::test]
    async fn denied_usage_is_not_enqueued() {
        let h = Harness::start().await;
        let decision = h
            .transactor
            .authrep(PROVIDER, &params().with_usage(hits(11)))
            .await
            .unwrap();
        assert_eq!(decision.reason(), Some(RejectionReason::LimitsExceeded));
        assert!(h.queue.is_empty());
        assert_eq!(h.notified(AUTHORIZE), 1);
    }

    #[tokio::test]
    async fn unknown_application_still_counts_as_an_authorize_call() {
        let h = Harness::start().await;
        let err = h
            .transactor
            .authrep(PROVIDER, &AuthParams::for_app("ghost"))
            .await
            .unwrap_err();
        assert_eq!(
            err.as_resolution(),
            Some(&ResolutionError::ApplicationNotFound(Some("ghost".into())))
        );
        assert_eq!(h.notified(AUTHORIZE), 1);

        h.transactor
            .authorize(PROVIDER, &AuthParams::for_app("ghost"))
            .await
            .unwrap_err();
        assert_eq!(h.notified(AUTHORIZE), 1, "authorize errors are not counted");
    }
}

// -- Resolution Tests --

mod resolution {
    use super::*;

    #[tokio::test]
    async fn unknown_provider_key() {
        let h = Harness::start().await;
        let err = h
            .transactor
            .authorize("nope", &params())
            .await
            .unwrap_err();
        assert_eq!(
            err.as_resolution(),
            Some(&ResolutionError::ProviderKeyInvalid("nope".into()))
        );
    }

    #[tokio::test]
    async fn service_of_another_provider() {
        let h = Harness::start().await;
        h.transactor
            .entities()
            .save_service(&Service::new("2002", "pk-2"))
            .await
            .unwrap();
        let request = AuthParams {
            service_id: Some("2002".into()),
            ..params()
        };
        let err = h.transactor.authorize(PROVIDER, &request).await.unwrap_err();
        assert_eq!(
            err.as_resolution(),
            Some(&ResolutionError::ServiceIdInvalid("2002".into()))
        );
    }

    #[tokio::test]
    async fn user_key_lookup() {
        let h = Harness::start().await;
        let mut app = app();
        app.user_key = Some("uk-1".into());
        h.transactor.entities().save_application(&app).await.unwrap();

        let request = AuthParams {
            user_key: Some("uk-1".into()),
            ..AuthParams::default()
        };
        let decision = h.transactor.authorize(PROVIDER, &request).await.unwrap();
        assert_eq!(decision.application_id.as_str(), APP);

        let request = AuthParams {
            user_key: Some("uk-2".into()),
            ..AuthParams::default()
        };
        let err = h.transactor.authorize(PROVIDER, &request).await.unwrap_err();
        assert_eq!(
            err.as_resolution(),
            Some(&ResolutionError::UserKeyInvalid("uk-2".into()))
        );
    }

    #[tokio::test]
    async fn user_required_without_user() {
        let h = Harness::start().await;
        let mut app = app();
        app.user_required = true;
        h.transactor.entities().save_application(&app).await.unwrap();

        let err = h
            .transactor
            .authrep(PROVIDER, &params())
            .await
            .unwrap_err();
        assert_eq!(
            err.as_resolution(),
            Some(&ResolutionError::UserNotDefined(APP.into()))
        );
        assert_eq!(h.notified(AUTHORIZE), 1);
    }

    #[tokio::test]
    async fn unregistered_user() {
        let h = Harness::start().await;
        let mut service = Service::new(SERVICE, PROVIDER).with_metric(Metric::new("m1", "hits"));
        service.user_registration_required = true;
        h.transactor.entities().save_service(&service).await.unwrap();
        let mut app = app();
        app.user_required = true;
        h.transactor.entities().save_application(&app).await.unwrap();

        let request = AuthParams {
            user_id: Some("bob".into()),
            ..params()
        };
        let err = h.transactor.authorize(PROVIDER, &request).await.unwrap_err();
        assert_eq!(
            err.as_resolution(),
            Some(&ResolutionError::UserRequiresRegistration {
                service_id: SERVICE.into(),
                user_id: "bob".into(),
            })
        );
    }
}

// -- OAuth Tests --

mod oauth {
    use super::*;

    async fn with_token(h: &Harness) {
        h.transactor
            .entities()
            .save_access_token(
                &ServiceId::new(SERVICE),
                "tok",
                &TokenCredentials {
                    application_id: ApplicationId::new(APP),
                    user_id: None,
                },
                None,
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn token_supplies_the_application() {
        let h = Harness::start().await;
        with_token(&h).await;
        let request = AuthParams {
            access_token: Some("tok".into()),
            ..AuthParams::default()
        };
        let decision = h.transactor.oauth_authorize(PROVIDER, &request).await.unwrap();
        assert!(decision.is_authorized());
        assert_eq!(decision.application_id.as_str(), APP);
    }

    #[tokio::test]
    async fn no_token_and_no_application() {
        let h = Harness::start().await;
        let err = h
            .transactor
            .oauth_authorize(PROVIDER, &AuthParams::default())
            .await
            .unwrap_err();
        assert_eq!(
            err.as_resolution(),
            Some(&ResolutionError::ApplicationNotFound(None))
        );
    }

    #[tokio::test]
    async fn bad_token_is_tolerated_with_an_explicit_application() {
        let h = Harness::start().await;
        let request = AuthParams {
            access_token: Some("bogus".into()),
            ..params()
        };
        let decision = h.transactor.oauth_authorize(PROVIDER, &request).await.unwrap();
        assert!(decision.is_authorized());

        let request = AuthParams {
            access_token: Some("bogus".into()),
            ..AuthParams::default()
        };
        let err = h
            .transactor
            .oauth_authorize(PROVIDER, &request)
            .await
            .unwrap_err();
        assert_eq!(
            err.as_resolution(),
            Some(&ResolutionError::AccessTokenInvalid("bogus".into()))
        );
    }

    #[tokio::test]
    async fn redirect_url_is_checked_instead_of_keys() {
        let h = Harness::start().await;
        let mut app = app().with_key("secret");
        app.redirect_url = Some("https://cb.example.com".into());
        h.transactor.entities().save_application(&app).await.unwrap();

        let decision = h.transactor.oauth_authorize(PROVIDER, &params()).await.unwrap();
        assert!(decision.is_authorized());

        let request = AuthParams {
            redirect_url: Some("https://evil.example.com".into()),
            ..params()
        };
        let decision = h.transactor.oauth_authorize(PROVIDER, &request).await.unwrap();
        assert_eq!(decision.reason(), Some(RejectionReason::RedirectUrlInvalid));
    }

    #[tokio::test]
    async fn oauth_authrep_records_usage() {
        let h = Harness::start().await;
        with_token(&h).await;
        let request = AuthParams {
            access_token: Some("tok".into()),
            ..AuthParams::default()
        }
        .with_usage(hits(1));
        h.transactor.oauth_authrep(PROVIDER, &request).await.unwrap();
        assert_eq!(h.queue.len(), 1);
    }
}

// -- Utilization Tests --

mod utilization {
    use super::*;

    #[tokio::test]
    async fn reports_the_most_utilized_limit() {
        let h = Harness::start().await;
        let app = app().with_limit(UsageLimit::new("m1", Period::Eternity, 1000));
        h.transactor.entities().save_application(&app).await.unwrap();
        h.set_counter(7).await;

        let utilization = h.transactor.utilization(SERVICE, APP).await.unwrap();
        assert_eq!(utilization.reports.len(), 2);
        let max = utilization.max_record.unwrap();
        assert_eq!(max.period, Period::Day);
        assert_eq!(utilization.max_utilization, 70);
    }

    #[tokio::test]
    async fn unknown_application() {
        let h = Harness::start().await;
        let err = h.transactor.utilization(SERVICE, "ghost").await.unwrap_err();
        assert_eq!(
            err.as_resolution(),
            Some(&ResolutionError::ApplicationNotFound(Some("ghost".into())))
        );
    }
}
