use tracing::info;

/// Sends the user agent to the login entry point.
///
/// Implemented for any `Fn()` so tests and front-ends can pass a closure.
pub trait LoginRedirect: Send + Sync {
    fn redirect_to_login(&self);
}

impl<F> LoginRedirect for F
where
    F: Fn() + Send + Sync,
{
    fn redirect_to_login(&self) {
        self()
    }
}

/// Redirect that only records the navigation in the log
#[derive(Debug, Clone)]
pub struct LogRedirect {
    login_path: String,
}

impl LogRedirect {
    pub fn new(login_path: impl Into<String>) -> Self {
        Self {
            login_path: login_path.into(),
        }
    }
}

impl LoginRedirect for LogRedirect {
    fn redirect_to_login(&self) {
        info!(path = %self.login_path, "Redirecting to login");
    }
}
