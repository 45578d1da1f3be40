use crate::{
    api_client::{DeviceAuthApi, DeviceLoginPoll},
    error::AuthError,
};
use std::time::Duration;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// A one-time login code pair issued by the server, alive for a single login.
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub code: String,
    pub display_code: String,
    pub auth_url: String,
    pub issued_at: Instant,
    pub expires_in: Duration,
}

impl AuthSession {
    pub fn deadline(&self) -> Instant {
        self.issued_at + self.expires_in
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdentity {
    pub user_id: String,
    pub email: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub token: String,
    pub expires_at: OffsetDateTime,
    pub user: UserIdentity,
}

#[derive(Debug, Clone)]
pub struct DeviceLoginOptions {
    pub poll_interval: Duration,
    /// Try to open the authorization URL in a local graphical browser.
    pub open_browser: bool,
    /// Stops polling when cancelled. Nothing is sent to the server; the code expires on its own.
    pub cancel: Option<CancellationToken>,
}

impl Default for DeviceLoginOptions {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            open_browser: true,
            cancel: None,
        }
    }
}

#[derive(Debug)]
enum PollOutcome {
    Pending,
    Authorized(Credential),
    Denied(String),
}

fn classify(poll: DeviceLoginPoll) -> Result<PollOutcome, AuthError> {
    let token = poll.token.unwrap_or_default();
    if poll.status == "authorized" && !token.is_empty() {
        let raw_expiry = poll.expires_at.unwrap_or_default();
        let expires_at = OffsetDateTime::parse(&raw_expiry, &Rfc3339).map_err(|err| {
            AuthError::MalformedCredential(format!("invalid expiry '{raw_expiry}': {err}"))
        })?;
        let user = poll.user.unwrap_or_default();
        return Ok(PollOutcome::Authorized(Credential {
            token,
            expires_at,
            user: UserIdentity {
                user_id: user.user_id,
                email: user.email,
                name: user.name,
            },
        }));
    }

    if let Some(error) = poll.error.filter(|error| !error.is_empty()) {
        return Ok(PollOutcome::Denied(error));
    }
    if poll.status == "denied" {
        return Ok(PollOutcome::Denied("the login request was denied".into()));
    }
    Ok(PollOutcome::Pending)
}

/// Run the device authorization flow to completion.
///
/// `present` is called once with the freshly issued session so the caller can show the
/// display code and URL. The server is then polled every `poll_interval` until it
/// authorizes or denies the code, or the code's validity window runs out. A poll
/// that fails in transit or returns an undecodable body is retried on the next tick.
pub async fn authorize<A: DeviceAuthApi>(
    api: &A,
    options: &DeviceLoginOptions,
    present: impl FnOnce(&AuthSession),
) -> Result<Credential, AuthError> {
    let login = api
        .start_device_login()
        .await
        .map_err(AuthError::Initiate)?;
    let session = AuthSession {
        code: login.code,
        display_code: login.display_code,
        auth_url: login.auth_url,
        issued_at: Instant::now(),
        expires_in: Duration::from_secs(login.expires_in),
    };
    present(&session);
    if options.open_browser {
        open_in_browser(&session.auth_url);
    }

    let cancel = options.cancel.clone().unwrap_or_default();
    let deadline = session.deadline();
    let mut attempt = 0u32;
    while Instant::now() < deadline {
        attempt += 1;
        let polled = tokio::select! {
            polled = api.poll_device_login(&session.code) => polled,
            _ = sleep_until(deadline) => break,
            _ = cancel.cancelled() => return Err(AuthError::Cancelled),
        };
        match polled {
            Ok(poll) => match classify(poll)? {
                PollOutcome::Authorized(credential) => {
                    info!(
                        "login authorized for {} after {attempt} poll(s)",
                        credential.user.email
                    );
                    return Ok(credential);
                }
                PollOutcome::Denied(reason) => return Err(AuthError::Denied(reason)),
                PollOutcome::Pending => debug!("authorization pending (attempt {attempt})"),
            },
            Err(err) => debug!(error = ?err, "login poll attempt {attempt} failed, retrying"),
        }

        let wake_at = deadline.min(Instant::now() + options.poll_interval);
        tokio::select! {
            _ = sleep_until(wake_at) => {}
            _ = cancel.cancelled() => return Err(AuthError::Cancelled),
        }
    }

    Err(AuthError::Expired)
}

fn open_in_browser(url: &str) {
    if !has_graphical_session() {
        debug!("no graphical session detected - not opening a browser");
        return;
    }
    match open::that_detached(url) {
        Ok(()) => info!("opened authorization url in browser"),
        Err(err) => debug!("failed to open browser: {err}"),
    }
}

// Terminal browsers would take over the session the code is displayed in.
fn has_graphical_session() -> bool {
    if cfg!(any(target_os = "macos", target_os = "windows")) {
        return true;
    }
    std::env::var_os("DISPLAY").is_some() || std::env::var_os("WAYLAND_DISPLAY").is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        api_client::{DeviceLoginResponse, PollUser},
        error::ApiError,
    };
    use reqwest::StatusCode;
    use std::{collections::VecDeque, sync::Mutex};

    struct MockAuth {
        expires_in: u64,
        fail_start: bool,
        poll_delay: Duration,
        script: Mutex<VecDeque<Result<DeviceLoginPoll, ApiError>>>,
        polled_at: Mutex<Vec<Instant>>,
    }

    impl MockAuth {
        fn new(expires_in: u64, script: Vec<Result<DeviceLoginPoll, ApiError>>) -> Self {
            Self {
                expires_in,
                fail_start: false,
                poll_delay: Duration::ZERO,
                script: Mutex::new(script.into()),
                polled_at: Mutex::new(Vec::new()),
            }
        }

        fn polled_at(&self) -> Vec<Instant> {
            self.polled_at.lock().unwrap().clone()
        }
    }

    impl DeviceAuthApi for MockAuth {
        async fn start_device_login(&self) -> Result<DeviceLoginResponse, ApiError> {
            if self.fail_start {
                return Err(ApiError::Status {
                    operation: "initiate login",
                    status: StatusCode::SERVICE_UNAVAILABLE,
                    body: String::new(),
                });
            }
            Ok(DeviceLoginResponse {
                code: "0f6e2c1a-machine-code".into(),
                display_code: "0F6E2C1A".into(),
                auth_url: "https://drop.example.com/?cli_auth=0f6e2c1a".into(),
                expires_in: self.expires_in,
            })
        }

        async fn poll_device_login(&self, code: &str) -> Result<DeviceLoginPoll, ApiError> {
            assert_eq!(code, "0f6e2c1a-machine-code");
            self.polled_at.lock().unwrap().push(Instant::now());
            if !self.poll_delay.is_zero() {
                tokio::time::sleep(self.poll_delay).await;
            }
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(pending()))
        }
    }

    fn pending() -> DeviceLoginPoll {
        DeviceLoginPoll {
            status: "pending".into(),
            ..Default::default()
        }
    }

    fn authorized() -> DeviceLoginPoll {
        DeviceLoginPoll {
            status: "authorized".into(),
            token: Some("cli-token".into()),
            expires_at: Some("2026-11-17T08:00:00Z".into()),
            user: Some(PollUser {
                user_id: "u-1".into(),
                email: "ada@example.com".into(),
                name: "Ada".into(),
            }),
            error: None,
        }
    }

    fn options() -> DeviceLoginOptions {
        DeviceLoginOptions {
            open_browser: false,
            ..Default::default()
        }
    }

    fn transient() -> ApiError {
        ApiError::Status {
            operation: "poll login",
            status: StatusCode::BAD_GATEWAY,
            body: String::new(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn authorizes_after_pending_polls() {
        let api = MockAuth::new(600, vec![Ok(pending()), Ok(pending()), Ok(pending()), Ok(authorized())]);
        let mut presented = None;

        let credential = authorize(&api, &options(), |session| {
            presented = Some(session.display_code.clone())
        })
        .await
        .unwrap();

        assert_eq!(presented.as_deref(), Some("0F6E2C1A"));
        assert_eq!(credential.token, "cli-token");
        assert_eq!(credential.user.email, "ada@example.com");
        assert_eq!(
            credential.expires_at,
            OffsetDateTime::parse("2026-11-17T08:00:00Z", &Rfc3339).unwrap()
        );

        let polled_at = api.polled_at();
        assert_eq!(polled_at.len(), 4);
        assert!(
            polled_at
                .windows(2)
                .all(|w| w[1] - w[0] >= DEFAULT_POLL_INTERVAL)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn expires_when_deadline_passes() {
        let api = MockAuth::new(9, Vec::new());
        let started = Instant::now();

        let err = authorize(&api, &options(), |_| {}).await.unwrap_err();

        assert!(matches!(err, AuthError::Expired));
        let polled_at = api.polled_at();
        assert_eq!(polled_at.len(), 5);
        assert!(
            polled_at
                .iter()
                .all(|at| *at < started + Duration::from_secs(9))
        );
        assert!(Instant::now() - started <= Duration::from_secs(9));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_poll_is_cut_off_at_deadline() {
        let mut api = MockAuth::new(3, vec![Ok(authorized())]);
        api.poll_delay = Duration::from_secs(10);
        let started = Instant::now();

        let err = authorize(&api, &options(), |_| {}).await.unwrap_err();

        assert!(matches!(err, AuthError::Expired));
        assert_eq!(api.polled_at().len(), 1);
        assert_eq!(Instant::now() - started, Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_error_is_denial() {
        let api = MockAuth::new(
            600,
            vec![
                Ok(pending()),
                Ok(DeviceLoginPoll {
                    error: Some("Invalid or expired code".into()),
                    ..Default::default()
                }),
            ],
        );

        let err = authorize(&api, &options(), |_| {}).await.unwrap_err();

        assert!(matches!(err, AuthError::Denied(ref msg) if msg == "Invalid or expired code"));
        assert_eq!(api.polled_at().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_poll_failures_are_retried() {
        let api = MockAuth::new(600, vec![Err(transient()), Err(transient()), Ok(authorized())]);

        let credential = authorize(&api, &options(), |_| {}).await.unwrap();

        assert_eq!(credential.user.name, "Ada");
        assert_eq!(api.polled_at().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn authorized_without_token_keeps_waiting() {
        let api = MockAuth::new(
            600,
            vec![
                Ok(DeviceLoginPoll {
                    status: "authorized".into(),
                    ..Default::default()
                }),
                Ok(authorized()),
            ],
        );

        authorize(&api, &options(), |_| {}).await.unwrap();
        assert_eq!(api.polled_at().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn unparseable_expiry_is_rejected() {
        let api = MockAuth::new(
            600,
            vec![Ok(DeviceLoginPoll {
                expires_at: Some("next tuesday".into()),
                ..authorized()
            })],
        );

        let err = authorize(&api, &options(), |_| {}).await.unwrap_err();
        assert!(matches!(err, AuthError::MalformedCredential(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_polling() {
        let api = MockAuth::new(600, Vec::new());
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            trigger.cancel();
        });

        let err = authorize(
            &api,
            &DeviceLoginOptions {
                cancel: Some(cancel),
                ..options()
            },
            |_| {},
        )
        .await
        .unwrap_err();

        assert!(matches!(err, AuthError::Cancelled));
        assert_eq!(api.polled_at().len(), 3);
    }

    #[tokio::test]
    async fn failed_initiation_never_presents() {
        let mut api = MockAuth::new(600, Vec::new());
        api.fail_start = true;
        let mut presented = false;

        let err = authorize(&api, &options(), |_| presented = true)
            .await
            .unwrap_err();

        assert!(matches!(err, AuthError::Initiate(_)));
        assert!(!presented);
        assert!(api.polled_at().is_empty());
    }
}
