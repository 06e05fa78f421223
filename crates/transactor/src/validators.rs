//! The checks a full validation runs against a resolved request.

use regex::Regex;

use tollgate_core::{Application, AuthParams, RejectionReason, Service, Status, User};

/// Everything a validator may look at.
pub struct ValidationContext<'a> {
    pub service: &'a Service,
    pub application: &'a Application,
    pub user: Option<&'a User>,
    pub params: &'a AuthParams,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validator {
    /// The application key must be one of the application's keys.
    Key,
    /// The referrer must match one of the application's filters.
    Referrer,
    /// The OAuth redirect URL must be the registered one.
    RedirectUrl,
    /// Application and user must be active.
    State,
    /// Every usage metric must exist on the service.
    Metrics,
    /// No usage limit may be exceeded, counting the requested usage.
    Limits,
}

/// Chain for key-authenticated requests.
pub const STANDARD: &[Validator] = &[
    Validator::Key,
    Validator::Referrer,
    Validator::State,
    Validator::Metrics,
    Validator::Limits,
];

/// Chain for OAuth requests.
pub const OAUTH: &[Validator] = &[
    Validator::RedirectUrl,
    Validator::State,
    Validator::Metrics,
    Validator::Limits,
];

/// Run every validator of `chain`; the first rejection is the one kept.
pub fn apply_chain(chain: &[Validator], ctx: &ValidationContext<'_>, status: &mut Status) {
    for validator in chain {
        if let Some(reason) = validator.check(ctx, status) {
            status.reject(reason);
        }
    }
}

impl Validator {
    /// Returns the rejection reason, or `None` when the check passes.
    pub fn check(&self, ctx: &ValidationContext<'_>, status: &Status) -> Option<RejectionReason> {
        let passed = match self {
            Self::Key => check_key(ctx.application, ctx.params),
            Self::Referrer => check_referrer(ctx.application, ctx.params),
            Self::RedirectUrl => check_redirect_url(ctx.application, ctx.params),
            Self::State => {
                if !ctx.application.is_active() {
                    return Some(RejectionReason::ApplicationNotActive);
                }
                ctx.user.is_none_or(User::is_active)
            }
            Self::Metrics => ctx.params.usage.as_ref().is_none_or(|usage| {
                usage
                    .keys()
                    .all(|name| ctx.service.metric_by_name(name).is_some())
            }),
            Self::Limits => check_limits(status),
        };
        if passed {
            None
        } else {
            Some(self.reason())
        }
    }

    fn reason(self) -> RejectionReason {
        match self {
            Self::Key => RejectionReason::ApplicationKeyInvalid,
            Self::Referrer => RejectionReason::ReferrerNotAllowed,
            Self::RedirectUrl => RejectionReason::RedirectUrlInvalid,
            Self::State => RejectionReason::UserNotActive,
            Self::Metrics => RejectionReason::MetricInvalid,
            Self::Limits => RejectionReason::LimitsExceeded,
        }
    }
}

fn check_key(application: &Application, params: &AuthParams) -> bool {
    application.keys.is_empty() || params.app_key().is_some_and(|k| application.has_key(k))
}

fn check_referrer(application: &Application, params: &AuthParams) -> bool {
    if application.referrer_filters.is_empty() {
        return true;
    }
    let Some(referrer) = params.referrer() else {
        return false;
    };
    application
        .referrer_filters
        .iter()
        .any(|filter| referrer_matches(filter, referrer))
}

/// Match a referrer against a filter where `*` stands for any run of
/// characters.
pub fn referrer_matches(filter: &str, referrer: &str) -> bool {
    let pattern = format!("^{}$", regex::escape(filter).replace(r"\*", ".*"));
    Regex::new(&pattern).is_ok_and(|re| re.is_match(referrer))
}

fn check_redirect_url(application: &Application, params: &AuthParams) -> bool {
    params
        .redirect_url()
        .is_none_or(|url| application.redirect_url.as_deref() == Some(url))
}

fn check_limits(status: &Status) -> bool {
    let pending = status.usage.as_ref();
    status
        .application_usage
        .iter()
        .chain(status.user_usage.iter())
        .all(|report| {
            let value = pending
                .and_then(|usage| usage.get(&report.metric_name))
                .map_or(report.current_value, |v| v.apply_to(report.current_value));
            value <= report.max_value
        })
}

#[cfg(test)]
mod tests {
    use chrono::DateTime;
    use tollgate_core::{
        EntityState, Metric, MetricId, Period, Usage, UsageReport, UsageValue,
    };

    use super::*;

    fn service() -> Service {
        Service::new("1", "pk").with_metric(Metric::new("m1", "hits"))
    }

    fn status_with(current: i64, max: i64, usage: Option<Usage>) -> Status {
        let mut status = Status::new(
            "1".into(),
            "app".into(),
            None,
            vec![UsageReport {
                metric_id: MetricId::new("m1"),
                metric_name: "hits".into(),
                period: Period::Day,
                period_start: DateTime::UNIX_EPOCH,
                current_value: current,
                max_value: max,
            }],
            Vec::new(),
        );
        status.usage = usage;
        status
    }

    fn hits(n: i64) -> Usage {
        Usage::from([("hits".to_owned(), UsageValue::Increment(n))])
    }

    fn run(
        chain: &[Validator],
        app: &Application,
        user: Option<&User>,
        params: &AuthParams,
        status: &mut Status,
    ) {
        let service = service();
        let ctx = ValidationContext {
            service: &service,
            application: app,
            user,
            params,
        };
        apply_chain(chain, &ctx, status);
    }

    #[test]
    fn referrer_wildcards() {
        assert!(referrer_matches("*.example.com", "api.example.com"));
        assert!(referrer_matches("example.com", "example.com"));
        assert!(!referrer_matches("example.com", "evil-example.com"));
        assert!(!referrer_matches("a.b", "axb"), "dots are literal");
        assert!(referrer_matches("*", "anything"));
    }

    #[test]
    fn key_is_required_only_when_the_application_has_keys() {
        let open = Application::new("1", "app");
        let locked = Application::new("1", "app").with_key("k1");
        let params = AuthParams::for_app("app");

        let mut status = status_with(0, 10, None);
        run(STANDARD, &open, None, &params, &mut status);
        assert!(status.is_authorized());

        let mut status = status_with(0, 10, None);
        run(STANDARD, &locked, None, &params, &mut status);
        assert_eq!(status.reason(), Some(RejectionReason::ApplicationKeyInvalid));

        let params = AuthParams {
            app_key: Some("k1".into()),
            ..params
        };
        let mut status = status_with(0, 10, None);
        run(STANDARD, &locked, None, &params, &mut status);
        assert!(status.is_authorized());
    }

    #[test]
    fn missing_referrer_is_rejected_when_filters_exist() {
        let app = Application::new("1", "app").with_referrer_filter("*.example.com");
        let mut status = status_with(0, 10, None);
        run(STANDARD, &app, None, &AuthParams::for_app("app"), &mut status);
        assert_eq!(status.reason(), Some(RejectionReason::ReferrerNotAllowed));
    }

    #[test]
    fn inactive_entities() {
        let mut app = Application::new("1", "app");
        app.state = EntityState::Suspended;
        let mut status = status_with(0, 10, None);
        run(STANDARD, &app, None, &AuthParams::for_app("app"), &mut status);
        assert_eq!(status.reason(), Some(RejectionReason::ApplicationNotActive));

        let app = Application::new("1", "app");
        let mut user = User::new("1", "bob");
        user.state = EntityState::Suspended;
        let mut status = status_with(0, 10, None);
        run(STANDARD, &app, Some(&user), &AuthParams::for_app("app"), &mut status);
        assert_eq!(status.reason(), Some(RejectionReason::UserNotActive));
    }

    #[test]
    fn unknown_metric_is_rejected() {
        let app = Application::new("1", "app");
        let params = AuthParams::for_app("app").with_usage(Usage::from([(
            "bogus".to_owned(),
            UsageValue::Increment(1),
        )]));
        let mut status = status_with(0, 10, None);
        run(STANDARD, &app, None, &params, &mut status);
        assert_eq!(status.reason(), Some(RejectionReason::MetricInvalid));
    }

    #[test]
    fn limits_count_the_pending_usage() {
        let app = Application::new("1", "app");
        let params = AuthParams::for_app("app");

        let mut status = status_with(8, 10, Some(hits(2)));
        run(STANDARD, &app, None, &params, &mut status);
        assert!(status.is_authorized(), "reaching the limit is allowed");

        let mut status = status_with(8, 10, Some(hits(3)));
        run(STANDARD, &app, None, &params, &mut status);
        assert_eq!(status.reason(), Some(RejectionReason::LimitsExceeded));

        let mut status = status_with(11, 10, None);
        run(STANDARD, &app, None, &params, &mut status);
        assert_eq!(status.reason(), Some(RejectionReason::LimitsExceeded));

        let absolute = Usage::from([("hits".to_owned(), UsageValue::Set(4))]);
        let mut status = status_with(11, 10, Some(absolute));
        run(STANDARD, &app, None, &params, &mut status);
        assert!(status.is_authorized(), "an absolute value replaces the counter");
    }

    #[test]
    fn first_failure_wins_but_every_validator_runs() {
        let mut app = Application::new("1", "app").with_key("k1");
        app.state = EntityState::Suspended;
        let mut status = status_with(11, 10, None);
        run(STANDARD, &app, None, &AuthParams::for_app("app"), &mut status);
        assert_eq!(status.reason(), Some(RejectionReason::ApplicationKeyInvalid));
        assert_eq!(status.application_usage.len(), 1);
    }

    #[test]
    fn oauth_chain_checks_redirect_url_not_keys() {
        let mut app = Application::new("1", "app").with_key("k1");
        app.redirect_url = Some("https://cb.example.com".into());

        let mut status = status_with(0, 10, None);
        run(OAUTH, &app, None, &AuthParams::for_app("app"), &mut status);
        assert!(status.is_authorized());

        let params = AuthParams {
            redirect_url: Some("https://evil.example.com".into()),
            ..AuthParams::for_app("app")
        };
        let mut status = status_with(0, 10, None);
        run(OAUTH, &app, None, &params, &mut status);
        assert_eq!(status.reason(), Some(RejectionReason::RedirectUrlInvalid));
    }
}
